use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use framenet::{
    setup_tracing, Acceptor, AcceptorHandler, AcceptorSettings, AppConfig, AppError, AppResult,
    Connector, ConnectorHandler, ConnectorSettings, Session, SessionHandler, SessionSettings,
};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::{runtime, signal, time};
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(version)]
pub struct CommandLine {
    /// path to config file
    #[arg(short, long)]
    pub conf: Option<String>,
    #[command(subcommand)]
    pub command: Command,
    /// log level (v: info, vv: debug, vvv: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Command {
    /// run an echo server on the configured address
    Serve,
    /// send packets to the configured address and print the echoes
    Ping {
        #[arg(short, long, default_value = "ping")]
        message: String,
        #[arg(short = 'n', long, default_value_t = 1)]
        count: usize,
        /// seconds to wait for each echo
        #[arg(short, long, default_value_t = 5)]
        timeout: u64,
    },
    PrintConfig,
}

fn level_directive(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Echoes every packet back. Each session gets one writer task fed through a
/// channel so echoes leave in the order the packets arrived.
#[derive(Default)]
struct EchoHandler {
    writers: Mutex<HashMap<u64, mpsc::UnboundedSender<Bytes>>>,
}

impl EchoHandler {
    fn spawn_writer(session: &Arc<Session>) -> mpsc::UnboundedSender<Bytes> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
        let session = Arc::clone(session);
        tokio::spawn(async move {
            while let Some(payload) = rx.recv().await {
                if let Err(e) = session.send_packet(&payload).await {
                    warn!(session_id = session.id(), "echo failed: {}", e);
                    break;
                }
            }
        });
        tx
    }
}

impl SessionHandler for EchoHandler {
    fn on_read(&self, session: &Arc<Session>, payload: Bytes) {
        let mut writers = self.writers.lock();
        let writer = writers
            .entry(session.id())
            .or_insert_with(|| Self::spawn_writer(session));
        // a closed channel means the session already failed
        let _ = writer.send(payload);
    }

    fn on_error(&self, session: &Arc<Session>, error: &AppError) {
        info!(session_id = session.id(), "session error: {}", error);
    }

    fn on_disconnected(&self, session: &Arc<Session>) {
        self.writers.lock().remove(&session.id());
        info!(session_id = session.id(), peer = %session.remote_address(), "session disconnected");
    }
}

struct ServerEvents;

impl AcceptorHandler for ServerEvents {
    fn on_listen(&self, acceptor: &Acceptor) {
        if let Some(addr) = acceptor.local_addr() {
            info!("echo server listening on {}", addr);
        }
    }

    fn on_new_session(&self, _acceptor: &Acceptor, session: Arc<Session>) {
        info!(session_id = session.id(), peer = %session.remote_address(), "new session");
    }

    fn on_error(&self, _acceptor: &Acceptor, error: &AppError) {
        error!("acceptor error: {}", error);
    }
}

async fn serve(config: AppConfig) -> AppResult<()> {
    let acceptor = Acceptor::new(AcceptorSettings {
        handler: Arc::new(ServerEvents),
        session_settings: SessionSettings::from_config(&config.session)
            .with_handler(Arc::new(EchoHandler::default())),
        ..Default::default()
    });
    acceptor
        .start(&config.network.ip, config.network.port)
        .await?;

    tokio::select! {
        _ = acceptor.join() => {
            warn!("accept loop exited");
        }
        _ = signal::ctrl_c() => {
            info!("get shutdown signal");
            acceptor.stop().await;
        }
    }
    Ok(())
}

struct ReplyForwarder(mpsc::UnboundedSender<Bytes>);

impl SessionHandler for ReplyForwarder {
    fn on_read(&self, _session: &Arc<Session>, payload: Bytes) {
        let _ = self.0.send(payload);
    }
}

struct ClientEvents;

impl ConnectorHandler for ClientEvents {
    fn on_disconnected(&self, _connector: &Connector, session: &Arc<Session>) {
        warn!(peer = %session.remote_address(), "server closed the connection");
    }

    fn on_error(&self, _connector: &Connector, error: &AppError) {
        error!("connector error: {}", error);
    }
}

async fn ping(config: AppConfig, message: String, count: usize, timeout: u64) -> AppResult<()> {
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel();
    let connector = Connector::new(ConnectorSettings {
        handler: Arc::new(ClientEvents),
        session_settings: SessionSettings::from_config(&config.session)
            .with_handler(Arc::new(ReplyForwarder(reply_tx))),
    });
    let session = connector
        .connect(&config.network.ip, config.network.port)
        .await?;
    connector.start()?;

    for seq in 0..count {
        session.send_packet(message.as_bytes()).await?;
        match time::timeout(Duration::from_secs(timeout), reply_rx.recv()).await {
            Ok(Some(reply)) => println!(
                "{} bytes from {}: seq={} {}",
                reply.len(),
                session.remote_address(),
                seq,
                String::from_utf8_lossy(&reply)
            ),
            Ok(None) => break,
            Err(_) => {
                connector.stop();
                return Err(AppError::Timeout(format!("no echo for seq {}", seq)));
            }
        }
    }
    connector.stop();
    Ok(())
}

fn main() -> AppResult<()> {
    // load .env file
    dotenv().ok();

    let commandline: CommandLine = CommandLine::parse();
    let config_path = commandline.conf.as_ref().map_or_else(
        || {
            let mut path = PathBuf::from("./");
            path.push("conf.toml");
            path
        },
        PathBuf::from,
    );
    let config = AppConfig::set_up_config(config_path)?;

    let _log_guard = setup_tracing(&config.log, level_directive(commandline.verbose))?;

    // startup tokio runtime
    let rt = runtime::Builder::new_multi_thread().enable_all().build()?;

    match commandline.command {
        Command::Serve => rt.block_on(serve(config)),
        Command::Ping {
            message,
            count,
            timeout,
        } => rt.block_on(ping(config, message, count, timeout)),
        Command::PrintConfig => {
            println!("{:#?}", config);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_pipelined_echoes_keep_order() -> AppResult<()> {
        let acceptor = Acceptor::new(AcceptorSettings {
            session_settings: SessionSettings::default()
                .with_handler(Arc::new(EchoHandler::default())),
            ..Default::default()
        });
        acceptor.start("127.0.0.1", 0).await?;
        let port = acceptor.local_addr().unwrap().port();

        let (reply_tx, mut reply_rx) = mpsc::unbounded_channel();
        let connector = Connector::new(ConnectorSettings {
            session_settings: SessionSettings::default()
                .with_handler(Arc::new(ReplyForwarder(reply_tx))),
            ..Default::default()
        });
        let session = connector.connect("127.0.0.1", port).await?;
        connector.start()?;

        // send everything before reading any echo
        for seq in 0..200u32 {
            session.send_packet(&seq.to_be_bytes()).await?;
        }
        for seq in 0..200u32 {
            let reply = time::timeout(Duration::from_secs(5), reply_rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(reply.as_ref(), seq.to_be_bytes());
        }

        connector.stop();
        acceptor.stop().await;
        Ok(())
    }
}
