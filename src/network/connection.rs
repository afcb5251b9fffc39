// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::trace;

use crate::{AppError, AppResult};

pub fn compose_address(host: &str, port: u16) -> String {
    format!("{}:{}", host, port)
}

/// Splits `host:port`. Anything other than exactly two `:`-separated parts is
/// rejected, which also rules out bracketed IPv6 addresses.
pub fn split_host_port(address: &str) -> AppResult<(String, u16)> {
    let parts: Vec<&str> = address.split(':').collect();
    match parts.as_slice() {
        [host, port] => {
            let port = port.parse::<u16>().map_err(|_| {
                AppError::InvalidAddress(format!("invalid port in address: {}", address))
            })?;
            Ok((host.to_string(), port))
        }
        [_] => Err(AppError::InvalidAddress(format!(
            "missing port in address: {}",
            address
        ))),
        _ => Err(AppError::InvalidAddress(format!(
            "too many parameters in address: {}",
            address
        ))),
    }
}

/// Local and remote endpoint of a connection, resolved once at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub local_host: String,
    pub local_port: u16,
    pub remote_host: String,
    pub remote_port: u16,
}

impl Endpoints {
    pub fn local_address(&self) -> String {
        compose_address(&self.local_host, self.local_port)
    }

    pub fn remote_address(&self) -> String {
        compose_address(&self.remote_host, self.remote_port)
    }
}

/// Exclusive owner of one TCP connection.
///
/// `close` consumes the handle, so a connection can only be closed once.
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    endpoints: Endpoints,
}

impl Connection {
    /// Dials `host:port`. The remote endpoint keeps the host as requested.
    pub async fn connect(host: &str, port: u16) -> AppResult<Connection> {
        let address = compose_address(host, port);
        let stream = TcpStream::connect(&address)
            .await
            .map_err(|e| AppError::Dial(format!("{}: {}", address, e)))?;
        stream.set_nodelay(true)?;

        let (local_host, local_port) = split_host_port(&stream.local_addr()?.to_string())?;
        trace!("connected {}:{} -> {}", local_host, local_port, address);

        Ok(Connection {
            stream,
            endpoints: Endpoints {
                local_host,
                local_port,
                remote_host: host.to_string(),
                remote_port: port,
            },
        })
    }

    /// Wraps an accepted stream.
    pub fn from_stream(stream: TcpStream) -> AppResult<Connection> {
        let (local_host, local_port) = split_host_port(&stream.local_addr()?.to_string())?;
        let (remote_host, remote_port) = split_host_port(&stream.peer_addr()?.to_string())?;
        stream.set_nodelay(true)?;

        Ok(Connection {
            stream,
            endpoints: Endpoints {
                local_host,
                local_port,
                remote_host,
                remote_port,
            },
        })
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub async fn read_exact(&mut self, len: usize) -> AppResult<Bytes> {
        read_full(&mut self.stream, len).await
    }

    pub async fn send_all(&mut self, data: &[u8]) -> AppResult<usize> {
        write_full(&mut self.stream, data).await
    }

    pub async fn close(mut self) -> AppResult<()> {
        self.stream.shutdown().await?;
        Ok(())
    }

    /// Splits into independently owned halves. The socket is released once
    /// both halves are dropped.
    pub fn into_split(self) -> (ConnectionReader, ConnectionWriter, Endpoints) {
        let (read_half, write_half) = self.stream.into_split();
        (
            ConnectionReader { half: read_half },
            ConnectionWriter { half: write_half },
            self.endpoints,
        )
    }
}

#[derive(Debug)]
pub struct ConnectionReader {
    half: OwnedReadHalf,
}

impl ConnectionReader {
    pub async fn read_exact(&mut self, len: usize) -> AppResult<Bytes> {
        read_full(&mut self.half, len).await
    }
}

#[derive(Debug)]
pub struct ConnectionWriter {
    half: OwnedWriteHalf,
}

impl ConnectionWriter {
    pub async fn send_all(&mut self, data: &[u8]) -> AppResult<usize> {
        write_full(&mut self.half, data).await
    }
}

/// Reads exactly `len` bytes. End of stream before the first byte is
/// `ConnectionClosed`; end of stream part way through is `ShortRead`.
async fn read_full<R>(reader: &mut R, len: usize) -> AppResult<Bytes>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = BytesMut::zeroed(len);
    let mut received = 0;
    while received < len {
        let n = reader.read(&mut buffer[received..]).await?;
        if n == 0 {
            return if received == 0 {
                Err(AppError::ConnectionClosed)
            } else {
                Err(AppError::ShortRead {
                    expected: len,
                    received,
                })
            };
        }
        received += n;
    }
    Ok(buffer.freeze())
}

async fn write_full<W>(writer: &mut W, data: &[u8]) -> AppResult<usize>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0;
    while written < data.len() {
        let n = writer.write(&data[written..]).await?;
        if n == 0 {
            return Err(AppError::ShortWrite {
                expected: data.len(),
                written,
            });
        }
        written += n;
    }
    writer.flush().await?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use tokio::io::duplex;
    use tokio::net::TcpListener;

    use super::*;

    #[rstest]
    #[case("127.0.0.1:8080", "127.0.0.1", 8080)]
    #[case("localhost:0", "localhost", 0)]
    #[case(":65535", "", 65535)]
    fn test_split_host_port(
        #[case] address: &str,
        #[case] host: &str,
        #[case] port: u16,
    ) -> AppResult<()> {
        assert_eq!(split_host_port(address)?, (host.to_string(), port));
        Ok(())
    }

    #[rstest]
    #[case("127.0.0.1")]
    #[case("[::1]:8080")]
    #[case("a:b:c")]
    #[case("127.0.0.1:http")]
    #[case("127.0.0.1:70000")]
    fn test_split_host_port_rejects(#[case] address: &str) {
        assert!(matches!(
            split_host_port(address),
            Err(AppError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_compose_address() {
        assert_eq!(compose_address("10.0.0.1", 18080), "10.0.0.1:18080");
    }

    #[tokio::test]
    async fn test_read_full_short_read() {
        let (mut client, mut server) = duplex(64);
        client.write_all(&[1, 2]).await.unwrap();
        drop(client);

        let result = read_full(&mut server, 4).await;
        assert!(matches!(
            result,
            Err(AppError::ShortRead {
                expected: 4,
                received: 2
            })
        ));
    }

    #[tokio::test]
    async fn test_read_full_closed_before_first_byte() {
        let (client, mut server) = duplex(64);
        drop(client);

        let result = read_full(&mut server, 4).await;
        assert!(matches!(result, Err(AppError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_read_full_zero_length() -> AppResult<()> {
        let (_client, mut server) = duplex(64);
        let bytes = read_full(&mut server, 0).await?;
        assert!(bytes.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_read_full_across_chunks() -> AppResult<()> {
        // a buffer smaller than the payload forces several partial reads
        let (mut client, mut server) = duplex(3);
        let writer = tokio::spawn(async move {
            write_full(&mut client, b"hello world").await
        });

        let bytes = read_full(&mut server, 11).await?;
        assert_eq!(bytes.as_ref(), b"hello world");
        assert_eq!(writer.await.unwrap()?, 11);
        Ok(())
    }

    #[tokio::test]
    async fn test_connect_and_accept_endpoints() -> AppResult<()> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();

        let (outbound, accepted) = tokio::join!(Connection::connect("127.0.0.1", port), async {
            listener.accept().await
        });
        let mut outbound = outbound?;
        let (stream, _) = accepted?;
        let mut inbound = Connection::from_stream(stream)?;

        assert_eq!(outbound.endpoints().remote_address(), format!("127.0.0.1:{}", port));
        assert_eq!(inbound.endpoints().local_port, port);
        assert_eq!(
            inbound.endpoints().remote_port,
            outbound.endpoints().local_port
        );
        assert_eq!(inbound.endpoints().remote_host, "127.0.0.1");

        assert_eq!(outbound.send_all(b"abc").await?, 3);
        assert_eq!(inbound.read_exact(3).await?.as_ref(), b"abc");

        outbound.close().await?;
        assert!(matches!(
            inbound.read_exact(1).await,
            Err(AppError::ConnectionClosed)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_connect_refused() -> AppResult<()> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        drop(listener);

        let result = Connection::connect("127.0.0.1", port).await;
        assert!(matches!(result, Err(AppError::Dial(_))));
        Ok(())
    }
}
