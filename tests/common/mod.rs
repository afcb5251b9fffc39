#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use framenet::{
    Acceptor, AcceptorHandler, AcceptorSettings, AppError, Session, SessionHandler, SessionSettings,
};
use tokio::sync::mpsc;
use tokio::time;

/// Everything a handler can observe, tagged with the session id.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Read(u64, Bytes),
    Write(u64, usize),
    Error(u64, String),
    Disconnected(u64),
}

pub struct Recorder(pub mpsc::UnboundedSender<Event>);

impl SessionHandler for Recorder {
    fn on_read(&self, session: &Arc<Session>, payload: Bytes) {
        let _ = self.0.send(Event::Read(session.id(), payload));
    }
    fn on_write(&self, session: &Arc<Session>, bytes_written: usize) {
        let _ = self.0.send(Event::Write(session.id(), bytes_written));
    }
    fn on_error(&self, session: &Arc<Session>, error: &AppError) {
        let _ = self.0.send(Event::Error(session.id(), error.to_string()));
    }
    fn on_disconnected(&self, session: &Arc<Session>) {
        let _ = self.0.send(Event::Disconnected(session.id()));
    }
}

/// Forwards every accepted session to the test.
pub struct SessionSink(pub mpsc::UnboundedSender<Arc<Session>>);

impl AcceptorHandler for SessionSink {
    fn on_new_session(&self, _acceptor: &Acceptor, session: Arc<Session>) {
        let _ = self.0.send(session);
    }
}

pub struct Server {
    pub acceptor: Acceptor,
    pub port: u16,
    pub sessions: mpsc::UnboundedReceiver<Arc<Session>>,
    pub events: mpsc::UnboundedReceiver<Event>,
}

/// Starts an acceptor on an ephemeral loopback port whose sessions report to
/// `events`.
pub async fn start_server(session_settings: SessionSettings) -> Server {
    let (session_tx, sessions) = mpsc::unbounded_channel();
    let (event_tx, events) = mpsc::unbounded_channel();
    let acceptor = Acceptor::new(AcceptorSettings {
        handler: Arc::new(SessionSink(session_tx)),
        session_settings: session_settings.with_handler(Arc::new(Recorder(event_tx))),
        ..Default::default()
    });
    acceptor.start("127.0.0.1", 0).await.unwrap();
    let port = acceptor.local_addr().unwrap().port();
    Server {
        acceptor,
        port,
        sessions,
        events,
    }
}

pub async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("channel closed")
}

/// Asserts nothing arrives within a short grace period.
pub async fn assert_quiet<T: std::fmt::Debug>(rx: &mut mpsc::UnboundedReceiver<T>) {
    if let Ok(Some(event)) = time::timeout(Duration::from_millis(200), rx.recv()).await {
        panic!("unexpected event: {:?}", event);
    }
}
