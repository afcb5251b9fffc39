mod network;
mod service;

pub use network::{
    compose_address, split_host_port, Acceptor, AcceptorHandler, AcceptorSettings, Connection,
    ConnectionReader, ConnectionWriter, Connector, ConnectorHandler, ConnectorSettings, Endpoints,
    IdGenerator, LengthPrefixCodec, NoopHandler, PacketCodec, SequentialIdGenerator, Session,
    SessionHandler, SessionSettings, DEFAULT_MAX_PACKET_SIZE,
};
pub use service::{
    setup_tracing, AppConfig, AppError, AppResult, LogConfig, NetworkConfig, SessionConfig,
};
