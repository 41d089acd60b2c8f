use std::sync::Arc;
use std::time::Duration;

use super::Client;
use crate::backend::Backend;
use crate::backend::ConnectionTarget;
use crate::backend::MemoryBackend;
use crate::handler;
use crate::ClientConfig;
use crate::Connection;
use crate::Context;
use crate::DispatchMode;
use crate::HandlerEntry;
use crate::HandlerResult;
use crate::Notification;
use crate::Result;

pub struct ClientBuilder {
    target: String,
    config: ClientConfig,
    backend: Option<Arc<dyn Backend>>,
    global_watcher: Option<HandlerEntry>,
}

impl ClientBuilder {
    /// Builder for `host:port[,host:port...][/chroot]` with default config.
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            config: ClientConfig::default(),
            backend: None,
            global_watcher: None,
        }
    }

    /// Upper bound `build` waits for the session to connect (default: 10s)
    pub fn connect_timeout(
        mut self,
        timeout: Duration,
    ) -> Self {
        self.config.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Session timeout handed to the backend (default: 10s)
    pub fn session_timeout(
        mut self,
        timeout: Duration,
    ) -> Self {
        self.config.session_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// How long `close` waits for the dispatch thread (default: 3s)
    pub fn dispatch_join_grace(
        mut self,
        grace: Duration,
    ) -> Self {
        self.config.dispatch_join_grace_ms = grace.as_millis() as u64;
        self
    }

    pub fn dispatch_mode(
        mut self,
        mode: DispatchMode,
    ) -> Self {
        self.config.dispatch_mode = mode;
        self
    }

    /// Completely replaces the configuration, including anything set through
    /// the individual setters before.
    pub fn set_config(
        mut self,
        config: ClientConfig,
    ) -> Self {
        self.config = config;
        self
    }

    /// Backend to drive. Defaults to an in-process [`MemoryBackend`].
    pub fn backend(
        mut self,
        backend: Arc<dyn Backend>,
    ) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Handler for session events and anything addressed to the global watcher.
    pub fn global_watcher<F>(
        mut self,
        f: F,
        context: Option<Context>,
    ) -> Self
    where
        F: Fn(&Notification) -> HandlerResult + Send + Sync + 'static,
    {
        self.global_watcher = Some(HandlerEntry::new(handler(f), context));
        self
    }

    /// Validate the settings and open the connection.
    pub fn build(self) -> Result<Client> {
        let target = ConnectionTarget::parse(&self.target)?;
        let config = self.config.validate()?;
        let backend = self
            .backend
            .unwrap_or_else(|| Arc::new(MemoryBackend::new()));
        let connect_timeout = config.connect_timeout();

        let connection = Connection::new(target, config, backend, self.global_watcher);
        connection.open(connect_timeout)?;

        Ok(Client {
            connection: Arc::new(connection),
        })
    }
}
