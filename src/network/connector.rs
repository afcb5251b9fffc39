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
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use super::connection::{compose_address, Connection};
use super::session::{NoopHandler, Session, SessionHandler, SessionSettings};
use crate::{AppError, AppResult};

/// Connector event callbacks, each defaulting to a no-op.
pub trait ConnectorHandler: Send + Sync {
    fn on_connected(&self, _connector: &Connector) {}

    /// The retained session failed and has been released.
    fn on_disconnected(&self, _connector: &Connector, _session: &Arc<Session>) {}

    fn on_error(&self, _connector: &Connector, _error: &AppError) {}
}

impl ConnectorHandler for NoopHandler {}

#[derive(Clone)]
pub struct ConnectorSettings {
    pub handler: Arc<dyn ConnectorHandler>,
    pub session_settings: SessionSettings,
}

impl Default for ConnectorSettings {
    fn default() -> Self {
        ConnectorSettings {
            handler: Arc::new(NoopHandler),
            session_settings: SessionSettings::default(),
        }
    }
}

impl fmt::Debug for ConnectorSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectorSettings")
            .field("session_settings", &self.session_settings)
            .finish_non_exhaustive()
    }
}

struct ConnectorInner {
    id: AtomicI64,
    settings: RwLock<ConnectorSettings>,
    session: Mutex<Option<Arc<Session>>>,
}

/// Dials out and keeps the session of the latest successful connect.
#[derive(Clone)]
pub struct Connector {
    inner: Arc<ConnectorInner>,
}

/// Wraps the configured session handler so a session failure also reaches
/// [`ConnectorHandler::on_disconnected`].
struct RetainedSessionHandler {
    session_handler: Arc<dyn SessionHandler>,
    connector: Weak<ConnectorInner>,
}

impl SessionHandler for RetainedSessionHandler {
    fn on_read(&self, session: &Arc<Session>, payload: Bytes) {
        self.session_handler.on_read(session, payload);
    }

    fn on_write(&self, session: &Arc<Session>, bytes_written: usize) {
        self.session_handler.on_write(session, bytes_written);
    }

    fn on_error(&self, session: &Arc<Session>, error: &AppError) {
        self.session_handler.on_error(session, error);
    }

    fn on_disconnected(&self, session: &Arc<Session>) {
        self.session_handler.on_disconnected(session);
        if let Some(inner) = self.connector.upgrade() {
            let connector = Connector { inner };
            connector.handler().on_disconnected(&connector, session);
        }
    }
}

impl Connector {
    pub fn new(settings: ConnectorSettings) -> Connector {
        Connector {
            inner: Arc::new(ConnectorInner {
                id: AtomicI64::new(0),
                settings: RwLock::new(settings),
                session: Mutex::new(None),
            }),
        }
    }

    /// Replaces the callbacks and session template used by the next connect.
    pub fn set_connector_settings(&self, settings: ConnectorSettings) {
        *self.inner.settings.write() = settings;
    }

    pub fn id(&self) -> i64 {
        self.inner.id.load(Ordering::Relaxed)
    }

    pub fn set_id(&self, id: i64) {
        self.inner.id.store(id, Ordering::Relaxed);
    }

    /// The session retained from the latest successful connect.
    pub fn session(&self) -> Option<Arc<Session>> {
        self.inner.session.lock().clone()
    }

    fn handler(&self) -> Arc<dyn ConnectorHandler> {
        self.inner.settings.read().handler.clone()
    }

    /// Dials `host:port` and retains an idle session for it. A previously
    /// retained session is stopped and replaced.
    pub async fn connect(&self, host: &str, port: u16) -> AppResult<Arc<Session>> {
        let connection = match Connection::connect(host, port).await {
            Ok(connection) => connection,
            Err(err) => {
                debug!(
                    "connector {} failed to dial {}: {}",
                    self.id(),
                    compose_address(host, port),
                    err
                );
                self.handler().on_error(self, &err);
                return Err(err);
            }
        };

        let settings = self.inner.settings.read().clone();
        let session_settings = SessionSettings {
            handler: Arc::new(RetainedSessionHandler {
                session_handler: settings.session_settings.handler.clone(),
                connector: Arc::downgrade(&self.inner),
            }),
            ..settings.session_settings
        };
        let session = Session::new(session_settings, 0, connection);
        debug!(
            "connector {} connected {} -> {}",
            self.id(),
            session.local_address(),
            session.remote_address()
        );

        let previous = self.inner.session.lock().replace(Arc::clone(&session));
        if let Some(previous) = previous {
            debug!("connector {} replacing retained session", self.id());
            previous.stop();
        }
        settings.handler.on_connected(self);
        Ok(session)
    }

    /// Starts the retained session's read loop.
    pub fn start(&self) -> AppResult<()> {
        match self.session() {
            Some(session) => session.start(),
            None => Err(AppError::IllegalStateError(format!(
                "connector {} is not connected",
                self.id()
            ))),
        }
    }

    /// Stops and releases the retained session, if any.
    pub fn stop(&self) {
        let session = self.inner.session.lock().take();
        if let Some(session) = session {
            session.stop();
        }
    }
}

impl fmt::Debug for Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connector")
            .field("id", &self.id())
            .field("session", &self.session())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;

    #[tokio::test]
    async fn test_start_before_connect() {
        let connector = Connector::new(ConnectorSettings::default());
        assert!(connector.session().is_none());
        assert!(matches!(
            connector.start(),
            Err(AppError::IllegalStateError(_))
        ));
        // stopping an unconnected connector is harmless
        connector.stop();
    }

    #[tokio::test]
    async fn test_reconnect_replaces_session() -> AppResult<()> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        let connector = Connector::new(ConnectorSettings::default());

        let first = connector.connect("127.0.0.1", port).await?;
        let _ = listener.accept().await?;
        let second = connector.connect("127.0.0.1", port).await?;
        let _ = listener.accept().await?;

        assert!(first.is_stopped());
        assert!(!second.is_stopped());
        assert!(Arc::ptr_eq(&connector.session().unwrap(), &second));
        assert_eq!(second.id(), 0);

        connector.stop();
        assert!(second.is_stopped());
        assert!(connector.session().is_none());
        Ok(())
    }
}
