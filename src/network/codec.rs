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

use std::fmt::Debug;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{AppError, AppResult};

pub const DEFAULT_MAX_PACKET_SIZE: usize = 10 * 1024 * 1024;

/// Framing strategy used by a session.
///
/// The read loop reads exactly `header_len()` bytes, asks `decode_header` for
/// the declared body size, checks it against the session's receive limit and
/// then reads the body. The send path hands the whole payload to
/// `encode_packet` and writes the result in one piece.
pub trait PacketCodec: Send + Sync + Debug {
    fn header_len(&self) -> usize;

    /// Returns the declared body size. `header` is always `header_len()` bytes.
    fn decode_header(&self, header: &[u8]) -> AppResult<usize>;

    fn encode_packet(&self, payload: &[u8]) -> AppResult<Bytes>;
}

/// `[u32 big-endian body length][body]`, no magic, no checksum.
#[derive(Debug, Default, Clone, Copy)]
pub struct LengthPrefixCodec;

impl LengthPrefixCodec {
    pub const HEADER_LEN: usize = 4;
}

impl PacketCodec for LengthPrefixCodec {
    fn header_len(&self) -> usize {
        Self::HEADER_LEN
    }

    fn decode_header(&self, mut header: &[u8]) -> AppResult<usize> {
        if header.len() != Self::HEADER_LEN {
            return Err(AppError::MalformedHeader(format!(
                "expected {} header bytes, got {}",
                Self::HEADER_LEN,
                header.len()
            )));
        }
        Ok(header.get_u32() as usize)
    }

    fn encode_packet(&self, payload: &[u8]) -> AppResult<Bytes> {
        let body_size = u32::try_from(payload.len()).map_err(|_| AppError::FrameTooLarge {
            size: payload.len(),
            limit: u32::MAX as usize,
        })?;
        let mut packet = BytesMut::with_capacity(Self::HEADER_LEN + payload.len());
        packet.put_u32(body_size);
        packet.put_slice(payload);
        Ok(packet.freeze())
    }
}
