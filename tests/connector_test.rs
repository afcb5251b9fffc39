mod common;

use std::sync::Arc;

use bytes::Bytes;
use common::{assert_quiet, next, start_server, Event, Recorder};
use framenet::{
    AppError, AppResult, Connector, ConnectorHandler, ConnectorSettings, Session, SessionSettings,
};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

#[derive(Debug, PartialEq)]
enum ConnectorEvent {
    Connected,
    Disconnected(u64),
    Error(String),
}

struct ConnectorRecorder(mpsc::UnboundedSender<ConnectorEvent>);

impl ConnectorHandler for ConnectorRecorder {
    fn on_connected(&self, _connector: &Connector) {
        let _ = self.0.send(ConnectorEvent::Connected);
    }

    fn on_disconnected(&self, _connector: &Connector, session: &Arc<Session>) {
        let _ = self.0.send(ConnectorEvent::Disconnected(session.id()));
    }

    fn on_error(&self, _connector: &Connector, error: &AppError) {
        let _ = self.0.send(ConnectorEvent::Error(error.to_string()));
    }
}

struct Client {
    connector: Connector,
    connector_events: mpsc::UnboundedReceiver<ConnectorEvent>,
    session_events: mpsc::UnboundedReceiver<Event>,
}

fn recording_client() -> Client {
    let (connector_tx, connector_events) = mpsc::unbounded_channel();
    let (session_tx, session_events) = mpsc::unbounded_channel();
    let connector = Connector::new(ConnectorSettings {
        handler: Arc::new(ConnectorRecorder(connector_tx)),
        session_settings: SessionSettings::default().with_handler(Arc::new(Recorder(session_tx))),
    });
    Client {
        connector,
        connector_events,
        session_events,
    }
}

#[tokio::test]
async fn test_dial_failure() -> AppResult<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    drop(listener);

    let mut client = recording_client();
    let result = client.connector.connect("127.0.0.1", port).await;

    assert!(matches!(result, Err(AppError::Dial(_))));
    assert!(matches!(
        next(&mut client.connector_events).await,
        ConnectorEvent::Error(e) if e.starts_with("dial error")
    ));
    assert!(client.connector.session().is_none());
    Ok(())
}

#[tokio::test]
async fn test_reading_waits_for_start() -> AppResult<()> {
    let mut server = start_server(SessionSettings::default()).await;
    let mut client = recording_client();

    let session = client.connector.connect("127.0.0.1", server.port).await?;
    assert_eq!(
        next(&mut client.connector_events).await,
        ConnectorEvent::Connected
    );
    assert_eq!(session.remote_address(), format!("127.0.0.1:{}", server.port));
    assert_eq!(session.id(), 0);

    let server_session = next(&mut server.sessions).await;
    server_session.send_packet(b"hello").await?;

    // nothing is consumed until the caller starts the session
    assert_quiet(&mut client.session_events).await;
    client.connector.start()?;
    assert_eq!(
        next(&mut client.session_events).await,
        Event::Read(0, Bytes::from_static(b"hello"))
    );
    Ok(())
}

#[tokio::test]
async fn test_peer_close_reports_disconnect() -> AppResult<()> {
    let mut server = start_server(SessionSettings::default()).await;
    let mut client = recording_client();
    client.connector.connect("127.0.0.1", server.port).await?;
    client.connector.start()?;
    let _ = next(&mut client.connector_events).await;

    let server_session = next(&mut server.sessions).await;
    server_session.stop();

    assert_eq!(
        next(&mut client.session_events).await,
        Event::Error(0, AppError::ConnectionClosed.to_string())
    );
    assert_eq!(
        next(&mut client.session_events).await,
        Event::Disconnected(0)
    );
    assert_eq!(
        next(&mut client.connector_events).await,
        ConnectorEvent::Disconnected(0)
    );
    assert!(client.connector.session().unwrap().is_stopped());
    Ok(())
}

#[tokio::test]
async fn test_stop_closes_connection() -> AppResult<()> {
    let mut server = start_server(SessionSettings::default()).await;
    let mut client = recording_client();
    let session = client.connector.connect("127.0.0.1", server.port).await?;
    client.connector.start()?;
    let server_id = next(&mut server.sessions).await.id();

    client.connector.stop();
    assert!(session.is_stopped());
    assert!(client.connector.session().is_none());

    // the server side sees the close, the client side stays silent
    assert_eq!(
        next(&mut server.events).await,
        Event::Error(server_id, AppError::ConnectionClosed.to_string())
    );
    assert_eq!(
        next(&mut server.events).await,
        Event::Disconnected(server_id)
    );
    assert_quiet(&mut client.session_events).await;
    assert_eq!(
        next(&mut client.connector_events).await,
        ConnectorEvent::Connected
    );
    assert_quiet(&mut client.connector_events).await;
    Ok(())
}

#[tokio::test]
async fn test_set_id() {
    let connector = Connector::new(ConnectorSettings::default());
    assert_eq!(connector.id(), 0);
    connector.set_id(9);
    assert_eq!(connector.id(), 9);
}
