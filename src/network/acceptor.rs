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
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::net::TcpListener;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, trace};

use super::connection::{compose_address, Connection};
use super::session::{NoopHandler, Session, SessionSettings};
use crate::{AppError, AppResult};

/// Acceptor event callbacks, each defaulting to a no-op.
pub trait AcceptorHandler: Send + Sync {
    fn on_listen(&self, _acceptor: &Acceptor) {}

    /// Ownership of `session` passes to the handler. The acceptor starts the
    /// session's read loop right after this returns, unless the handler
    /// stopped it.
    fn on_new_session(&self, _acceptor: &Acceptor, _session: Arc<Session>) {}

    fn on_error(&self, _acceptor: &Acceptor, _error: &AppError) {}
}

impl AcceptorHandler for NoopHandler {}

/// Source of session ids for accepted connections.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> AppResult<u64>;
}

/// Hands out 1, 2, 3, ...
#[derive(Debug, Default)]
pub struct SequentialIdGenerator {
    last: AtomicU64,
}

impl IdGenerator for SequentialIdGenerator {
    fn next_id(&self) -> AppResult<u64> {
        Ok(self.last.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

#[derive(Clone)]
pub struct AcceptorSettings {
    pub handler: Arc<dyn AcceptorHandler>,
    pub id_generator: Arc<dyn IdGenerator>,
    /// Template cloned into every accepted session.
    pub session_settings: SessionSettings,
}

impl Default for AcceptorSettings {
    fn default() -> Self {
        AcceptorSettings {
            handler: Arc::new(NoopHandler),
            id_generator: Arc::new(SequentialIdGenerator::default()),
            session_settings: SessionSettings::default(),
        }
    }
}

impl fmt::Debug for AcceptorSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcceptorSettings")
            .field("session_settings", &self.session_settings)
            .finish_non_exhaustive()
    }
}

struct Listening {
    generation: u64,
    local_addr: SocketAddr,
    stop_token: CancellationToken,
    // cancelled once the accept loop has exited and the listener is closed
    closed: CancellationToken,
}

struct AcceptorInner {
    id: AtomicI64,
    settings: RwLock<AcceptorSettings>,
    listening: Mutex<Option<Listening>>,
    generation: AtomicU64,
}

/// Listens on one address and turns every inbound connection into a running
/// [`Session`].
///
/// Cloning yields another handle to the same acceptor.
#[derive(Clone)]
pub struct Acceptor {
    inner: Arc<AcceptorInner>,
}

impl Acceptor {
    pub fn new(settings: AcceptorSettings) -> Acceptor {
        Acceptor {
            inner: Arc::new(AcceptorInner {
                id: AtomicI64::new(0),
                settings: RwLock::new(settings),
                listening: Mutex::new(None),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Replaces the callbacks and session template. Takes effect for the next
    /// accepted connection.
    pub fn set_acceptor_settings(&self, settings: AcceptorSettings) {
        *self.inner.settings.write() = settings;
    }

    pub fn id(&self) -> i64 {
        self.inner.id.load(Ordering::Relaxed)
    }

    pub fn set_id(&self, id: i64) {
        self.inner.id.store(id, Ordering::Relaxed);
    }

    pub fn is_running(&self) -> bool {
        self.inner.listening.lock().is_some()
    }

    /// Address actually bound, useful after listening on port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.listening.lock().as_ref().map(|l| l.local_addr)
    }

    fn handler(&self) -> Arc<dyn AcceptorHandler> {
        self.inner.settings.read().handler.clone()
    }

    /// Binds `host:port` and spawns the accept loop. Returns as soon as the
    /// listener is bound; a bind failure is reported to `on_error` and returned.
    pub async fn start(&self, host: &str, port: u16) -> AppResult<()> {
        if self.is_running() {
            return Err(AppError::IllegalStateError(format!(
                "acceptor {} is already listening",
                self.id()
            )));
        }
        let address = compose_address(host, port);
        let listener = match TcpListener::bind(&address).await {
            Ok(listener) => listener,
            Err(e) => {
                let err = AppError::Bind(format!("{}: {}", address, e));
                debug!("acceptor {} failed to bind {}: {}", self.id(), address, e);
                self.handler().on_error(self, &err);
                return Err(err);
            }
        };
        let local_addr = listener.local_addr()?;

        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let stop_token = CancellationToken::new();
        let closed = CancellationToken::new();
        {
            let mut listening = self.inner.listening.lock();
            if listening.is_some() {
                return Err(AppError::IllegalStateError(format!(
                    "acceptor {} is already listening",
                    self.id()
                )));
            }
            *listening = Some(Listening {
                generation,
                local_addr,
                stop_token: stop_token.clone(),
                closed: closed.clone(),
            });
        }
        debug!("acceptor {} listening on {}", self.id(), local_addr);
        self.handler().on_listen(self);

        let acceptor = self.clone();
        tokio::spawn(acceptor.accept_loop(listener, stop_token, closed.drop_guard(), generation));
        Ok(())
    }

    /// Ends the accept loop and closes the listener. Once this returns the
    /// address is free and `start` may be called again. Sessions already handed
    /// out keep running.
    pub async fn stop(&self) {
        let Some(listening) = self.inner.listening.lock().take() else {
            return;
        };
        debug!("acceptor {} stopping", self.id());
        listening.stop_token.cancel();
        listening.closed.cancelled().await;
    }

    /// Waits until the accept loop has exited and the listener is closed.
    pub async fn join(&self) {
        let closed = self
            .inner
            .listening
            .lock()
            .as_ref()
            .map(|listening| listening.closed.clone());
        if let Some(closed) = closed {
            closed.cancelled().await;
        }
    }

    async fn accept_loop(
        self,
        listener: TcpListener,
        stop_token: CancellationToken,
        _closed: DropGuard,
        generation: u64,
    ) {
        loop {
            let accepted = tokio::select! {
                biased;
                _ = stop_token.cancelled() => {
                    debug!("acceptor {} exit accept loop after stop", self.id());
                    break;
                }
                res = listener.accept() => res,
            };

            let stream = match accepted {
                Ok((stream, _)) => stream,
                Err(e) => {
                    self.fail(AppError::Accept(e.to_string()));
                    break;
                }
            };

            let settings = self.inner.settings.read().clone();
            let id = match settings.id_generator.next_id() {
                Ok(id) => id,
                Err(err) => {
                    self.fail(err);
                    break;
                }
            };

            // a peer whose address cannot be resolved only costs its own connection
            let connection = match Connection::from_stream(stream) {
                Ok(connection) => connection,
                Err(err) => {
                    trace!("acceptor {} rejected connection: {}", self.id(), err);
                    settings.handler.on_error(&self, &err);
                    continue;
                }
            };
            debug!(
                session_id = id,
                peer = %connection.endpoints().remote_address(),
                "accept new connection"
            );

            let session = Session::new(settings.session_settings, id, connection);
            settings.handler.on_new_session(&self, Arc::clone(&session));
            if !session.is_stopped() {
                if let Err(err) = session.start() {
                    settings.handler.on_error(&self, &err);
                }
            }
        }

        drop(listener);
        // after a stop the slot may already hold a newer listener
        let mut listening = self.inner.listening.lock();
        if listening.as_ref().is_some_and(|l| l.generation == generation) {
            *listening = None;
        }
        debug!("acceptor {} listener closed", self.id());
    }

    fn fail(&self, err: AppError) {
        debug!("acceptor {} accept loop failed: {}", self.id(), err);
        self.handler().on_error(self, &err);
    }
}

impl fmt::Debug for Acceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Acceptor")
            .field("id", &self.id())
            .field("local_addr", &self.local_addr())
            .finish()
    }
}
