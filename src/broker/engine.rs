use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::broker::hub::Hub;
use crate::broker::message::Message;
use crate::config::BrokerSettings;
use crate::session;
use crate::utils::error::SessionError;

/// Top-level broker object. Owns the [`Hub`] and hands each accepted
/// transport to a session task.
///
/// Cloning is cheap; every clone shares the same hub.
#[derive(Debug, Clone)]
pub struct Broker {
    hub: Arc<Hub>,
}

impl Default for Broker {
    fn default() -> Self {
        Self::new(BrokerSettings::default())
    }
}

impl Broker {
    pub fn new(settings: BrokerSettings) -> Self {
        Self::from_hub(Hub::new(settings))
    }

    /// Wraps a hub configured with an authenticator or observer.
    pub fn from_hub(hub: Hub) -> Self {
        Self { hub: Arc::new(hub) }
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// Runs one connection to completion on the current task.
    pub async fn serve<T>(&self, transport: T) -> Result<(), SessionError>
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        session::run(Arc::clone(&self.hub), transport).await
    }

    /// Spawns a task running one connection and logs how it ended.
    pub fn accept<T>(&self, transport: T) -> JoinHandle<()>
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let hub = Arc::clone(&self.hub);
        tokio::spawn(async move {
            match session::run(hub, transport).await {
                Ok(()) => debug!("connection closed"),
                Err(SessionError::Io(error)) => debug!(%error, "connection dropped"),
                Err(error) => warn!(%error, "connection closed with error"),
            }
        })
    }

    /// Publishes a message from inside the process, as if a client had sent
    /// it. Returns the number of sessions it was queued for.
    pub fn publish(&self, message: &Message) -> usize {
        self.hub.dispatch(message)
    }

    /// Asks every live session to close.
    pub fn shutdown(&self) {
        self.hub.shutdown();
    }
}
