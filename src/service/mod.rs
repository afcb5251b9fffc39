pub use app_error::{AppError, AppResult};
pub use config::{AppConfig, LogConfig, NetworkConfig, SessionConfig};
pub use tracing_config::setup_tracing;

mod app_error;
mod config;
mod tracing_config;
