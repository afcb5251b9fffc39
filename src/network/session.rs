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

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::Mutex;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::codec::{LengthPrefixCodec, PacketCodec, DEFAULT_MAX_PACKET_SIZE};
use super::connection::{Connection, ConnectionReader, ConnectionWriter, Endpoints};
use crate::service::SessionConfig;
use crate::{AppError, AppResult};

/// Session event callbacks. Every method defaults to a no-op, so implementors
/// only override the events they care about.
///
/// Callbacks run on the session's read loop task (or the sender's task for
/// `on_write`) and must not block.
pub trait SessionHandler: Send + Sync {
    fn on_read(&self, _session: &Arc<Session>, _payload: Bytes) {}

    fn on_write(&self, _session: &Arc<Session>, _bytes_written: usize) {}

    fn on_error(&self, _session: &Arc<Session>, _error: &AppError) {}

    fn on_disconnected(&self, _session: &Arc<Session>) {}
}

/// Handler that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

impl SessionHandler for NoopHandler {}

/// Template from which sessions are built.
#[derive(Clone)]
pub struct SessionSettings {
    /// Largest body the read loop accepts; 0 means [`DEFAULT_MAX_PACKET_SIZE`].
    pub max_recv_buff_size: usize,
    /// Largest payload `send_packet` accepts; 0 means [`DEFAULT_MAX_PACKET_SIZE`].
    pub max_send_buff_size: usize,
    /// Idle limit for each header or body read.
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
    pub codec: Arc<dyn PacketCodec>,
    pub handler: Arc<dyn SessionHandler>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        SessionSettings {
            max_recv_buff_size: DEFAULT_MAX_PACKET_SIZE,
            max_send_buff_size: DEFAULT_MAX_PACKET_SIZE,
            read_timeout: None,
            write_timeout: None,
            codec: Arc::new(LengthPrefixCodec),
            handler: Arc::new(NoopHandler),
        }
    }
}

impl SessionSettings {
    pub fn from_config(config: &SessionConfig) -> Self {
        SessionSettings {
            max_recv_buff_size: config.max_recv_buff_size,
            max_send_buff_size: config.max_send_buff_size,
            read_timeout: config.read_timeout(),
            write_timeout: config.write_timeout(),
            ..Default::default()
        }
    }

    pub fn with_handler(mut self, handler: Arc<dyn SessionHandler>) -> Self {
        self.handler = handler;
        self
    }

    pub fn with_codec(mut self, codec: Arc<dyn PacketCodec>) -> Self {
        self.codec = codec;
        self
    }
}

impl fmt::Debug for SessionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionSettings")
            .field("max_recv_buff_size", &self.max_recv_buff_size)
            .field("max_send_buff_size", &self.max_send_buff_size)
            .field("read_timeout", &self.read_timeout)
            .field("write_timeout", &self.write_timeout)
            .field("codec", &self.codec)
            .finish_non_exhaustive()
    }
}

/// One connection's framing, read loop and lifecycle.
///
/// A session moves idle -> running -> stopped. `start` spawns the read loop,
/// which decodes one packet at a time and hands it to
/// [`SessionHandler::on_read`]. Any read failure is terminal: the handler sees
/// `on_error`, the connection is released, then `on_disconnected` fires.
/// An explicit [`Session::stop`] releases the connection without further
/// callbacks. Stopping is idempotent and safe from any task.
pub struct Session {
    id: u64,
    endpoints: Endpoints,
    max_recv_buff_size: usize,
    max_send_buff_size: usize,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    codec: Arc<dyn PacketCodec>,
    handler: Arc<dyn SessionHandler>,
    // taken by the read loop on start
    reader: parking_lot::Mutex<Option<ConnectionReader>>,
    // held across encode-then-write so concurrent senders never interleave
    writer: Mutex<Option<ConnectionWriter>>,
    stopped: AtomicBool,
    stop_token: CancellationToken,
}

impl Session {
    pub fn new(settings: SessionSettings, id: u64, connection: Connection) -> Arc<Session> {
        let (reader, writer, endpoints) = connection.into_split();
        let or_default = |size: usize| {
            if size == 0 {
                DEFAULT_MAX_PACKET_SIZE
            } else {
                size
            }
        };
        Arc::new(Session {
            id,
            endpoints,
            max_recv_buff_size: or_default(settings.max_recv_buff_size),
            max_send_buff_size: or_default(settings.max_send_buff_size),
            read_timeout: settings.read_timeout,
            write_timeout: settings.write_timeout,
            codec: settings.codec,
            handler: settings.handler,
            reader: parking_lot::Mutex::new(Some(reader)),
            writer: Mutex::new(Some(writer)),
            stopped: AtomicBool::new(false),
            stop_token: CancellationToken::new(),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub fn local_address(&self) -> String {
        self.endpoints.local_address()
    }

    pub fn remote_address(&self) -> String {
        self.endpoints.remote_address()
    }

    pub fn max_recv_buff_size(&self) -> usize {
        self.max_recv_buff_size
    }

    pub fn max_send_buff_size(&self) -> usize {
        self.max_send_buff_size
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Spawns the read loop. Fails if the session was already started or stopped.
    pub fn start(self: &Arc<Self>) -> AppResult<()> {
        if self.is_stopped() {
            return Err(AppError::IllegalStateError(format!(
                "session {} is stopped",
                self.id
            )));
        }
        let reader = self.reader.lock().take().ok_or_else(|| {
            AppError::IllegalStateError(format!("session {} already started", self.id))
        })?;

        let session = Arc::clone(self);
        tokio::spawn(session.recv_loop(reader));
        Ok(())
    }

    /// Stops the session and releases the connection. Later calls are no-ops.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(session_id = self.id, "session stopped");
        self.release();
    }

    /// Encodes `payload` and writes the whole packet.
    ///
    /// A payload over the send limit is reported through `on_error` and
    /// returned as an error, but leaves the session running since nothing was
    /// written. A write failure is terminal for the session.
    pub async fn send_packet(self: &Arc<Self>, payload: &[u8]) -> AppResult<usize> {
        if self.is_stopped() {
            return Err(self.stopped_error());
        }
        if payload.len() > self.max_send_buff_size {
            let err = AppError::FrameTooLarge {
                size: payload.len(),
                limit: self.max_send_buff_size,
            };
            self.handler.on_error(self, &err);
            return Err(err);
        }
        let packet = self.codec.encode_packet(payload)?;

        let mut guard = self.writer.lock().await;
        let result = match guard.as_mut() {
            Some(writer) => {
                tokio::select! {
                    biased;
                    _ = self.stop_token.cancelled() => Err(self.stopped_error()),
                    res = within(self.write_timeout, "write", writer.send_all(&packet)) => res,
                }
            }
            None => Err(self.stopped_error()),
        };
        if self.stop_token.is_cancelled() {
            // stop() could not take the writer while this send held the lock
            guard.take();
        }
        drop(guard);

        match result {
            Ok(written) => {
                trace!(session_id = self.id, written, "packet sent");
                // a stop that raced the write silences the callback
                if !self.is_stopped() {
                    self.handler.on_write(self, written);
                }
                Ok(written)
            }
            Err(err) => {
                self.fail(&err);
                Err(err)
            }
        }
    }

    async fn recv_loop(self: Arc<Self>, mut reader: ConnectionReader) {
        debug!(
            session_id = self.id,
            peer = %self.endpoints.remote_address(),
            "session read loop started"
        );
        loop {
            let packet = tokio::select! {
                biased;
                _ = self.stop_token.cancelled() => break,
                res = self.read_packet(&mut reader) => res,
            };
            match packet {
                Ok(payload) => {
                    if self.is_stopped() {
                        break;
                    }
                    self.handler.on_read(&self, payload);
                }
                Err(err) => {
                    drop(reader);
                    self.fail(&err);
                    debug!(session_id = self.id, "session read loop exited on error");
                    return;
                }
            }
        }
        debug!(session_id = self.id, "session read loop exited");
    }

    async fn read_packet(&self, reader: &mut ConnectionReader) -> AppResult<Bytes> {
        let header = within(
            self.read_timeout,
            "header read",
            reader.read_exact(self.codec.header_len()),
        )
        .await?;
        let body_size = self.codec.decode_header(&header)?;
        if body_size > self.max_recv_buff_size {
            return Err(AppError::FrameTooLarge {
                size: body_size,
                limit: self.max_recv_buff_size,
            });
        }
        within(self.read_timeout, "body read", reader.read_exact(body_size)).await
    }

    /// Terminal failure: error callback, release, disconnected callback.
    /// Does nothing if the session was already stopped.
    fn fail(self: &Arc<Self>, err: &AppError) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(session_id = self.id, error = %err, "session failed");
        self.handler.on_error(self, err);
        self.release();
        self.handler.on_disconnected(self);
    }

    fn release(&self) {
        self.stop_token.cancel();
        self.reader.lock().take();
        // a sender holding the lock drops the writer itself once it sees the cancellation
        if let Ok(mut writer) = self.writer.try_lock() {
            writer.take();
        }
    }

    fn stopped_error(&self) -> AppError {
        AppError::IllegalStateError(format!("session {} is stopped", self.id))
    }
}

async fn within<T, F>(limit: Option<Duration>, what: &str, fut: F) -> AppResult<T>
where
    F: Future<Output = AppResult<T>>,
{
    match limit {
        Some(limit) => time::timeout(limit, fut)
            .await
            .map_err(|_| AppError::Timeout(format!("{} exceeded {:?}", what, limit)))?,
        None => fut.await,
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("endpoints", &self.endpoints)
            .field("stopped", &self.is_stopped())
            .finish_non_exhaustive()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        trace!(session_id = self.id, "session dropped");
    }
}
