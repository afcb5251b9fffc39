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

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// general errors
    #[error("illegal state: {0}")]
    IllegalStateError(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("config file error: {0}")]
    ConfigFileError(#[from] config::ConfigError),

    /// listener errors
    #[error("bind error: {0}")]
    Bind(String),

    #[error("accept error: {0}")]
    Accept(String),

    #[error("id generator error: {0}")]
    IdGenerator(String),

    /// outbound errors
    #[error("dial error: {0}")]
    Dial(String),

    /// session errors
    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("short read: expected {expected} bytes, received {received}")]
    ShortRead { expected: usize, received: usize },

    #[error("short write: expected {expected} bytes, written {written}")]
    ShortWrite { expected: usize, written: usize },

    #[error("frame of length {size} exceeds limit {limit}")]
    FrameTooLarge { size: usize, limit: usize },

    #[error("malformed header: {0}")]
    MalformedHeader(String),

    #[error("timed out: {0}")]
    Timeout(String),
}
