//! Broadcast hub task.
//!
//! A single task owns the [`ConnectionRegistry`] and applies commands from an
//! unbounded queue one at a time. Relay targets are read from the registry
//! when a relay command is applied, never from a snapshot taken earlier.

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::protocol::ServerEvent;
use crate::registry::{ConnectionRegistry, Outbound, RegistryError};
use crate::types::{ChatMessage, ConnectionId, IdentityClaim};

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("hub is not running")]
    Closed,

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

enum HubCommand {
    Connect {
        connection_id: ConnectionId,
        claim: IdentityClaim,
        outbound: Outbound,
        reply: oneshot::Sender<Result<(), RegistryError>>,
    },
    RelayChat {
        from: ConnectionId,
        message: ChatMessage,
    },
    RelayFeedback {
        payload: Value,
    },
    Disconnect {
        connection_id: ConnectionId,
    },
    ClientsTotal {
        reply: oneshot::Sender<usize>,
    },
}

/// Cloneable handle for talking to the hub task
#[derive(Clone)]
pub struct HubHandle {
    tx: mpsc::UnboundedSender<HubCommand>,
}

impl HubHandle {
    /// Admit an authenticated connection. Resolves once the new total has
    /// been announced.
    pub async fn connect(
        &self,
        connection_id: ConnectionId,
        claim: IdentityClaim,
        outbound: Outbound,
    ) -> Result<(), HubError> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::Connect {
            connection_id,
            claim,
            outbound,
            reply,
        })?;
        rx.await.map_err(|_| HubError::Closed)??;
        Ok(())
    }

    /// Relay a stored chat message to every connection except `from`
    pub fn relay_chat(&self, from: ConnectionId, message: ChatMessage) -> Result<(), HubError> {
        self.send(HubCommand::RelayChat { from, message })
    }

    /// Relay a feedback payload to every connection
    pub fn relay_feedback(&self, payload: Value) -> Result<(), HubError> {
        self.send(HubCommand::RelayFeedback { payload })
    }

    /// Drop a connection. Safe to call more than once.
    pub fn disconnect(&self, connection_id: ConnectionId) -> Result<(), HubError> {
        self.send(HubCommand::Disconnect { connection_id })
    }

    /// Current number of live connections.
    ///
    /// Answered after every command queued before it has been applied.
    pub async fn clients_total(&self) -> Result<usize, HubError> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::ClientsTotal { reply })?;
        rx.await.map_err(|_| HubError::Closed)
    }

    fn send(&self, command: HubCommand) -> Result<(), HubError> {
        self.tx.send(command).map_err(|_| HubError::Closed)
    }
}

struct Hub {
    registry: ConnectionRegistry,
}

impl Hub {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<HubCommand>) {
        while let Some(command) = rx.recv().await {
            self.apply(command);
        }
        tracing::info!("Broadcast hub stopped");
    }

    fn apply(&mut self, command: HubCommand) {
        match command {
            HubCommand::Connect {
                connection_id,
                claim,
                outbound,
                reply,
            } => {
                let user_id = claim.user_id().to_string();
                let result = self.registry.admit(connection_id.clone(), claim, outbound);
                match &result {
                    Ok(()) => tracing::info!(
                        connection_id = %connection_id,
                        user_id = %user_id,
                        clients_total = self.registry.size(),
                        "Connection admitted"
                    ),
                    Err(e) => tracing::error!(error = %e, "Refusing duplicate admission"),
                }
                // The session may have gone away while waiting
                let _ = reply.send(result);
            }

            HubCommand::RelayChat { from, message } => {
                let delivered = self
                    .registry
                    .broadcast_except(&from, &ServerEvent::ChatMessage(message));
                tracing::debug!(connection_id = %from, delivered, "Relayed chat message");
            }

            HubCommand::RelayFeedback { payload } => {
                let delivered = self.registry.broadcast(&ServerEvent::Feedback(payload));
                tracing::debug!(delivered, "Relayed feedback");
            }

            HubCommand::Disconnect { connection_id } => {
                if self.registry.remove(&connection_id) {
                    tracing::info!(
                        connection_id = %connection_id,
                        clients_total = self.registry.size(),
                        "Connection removed"
                    );
                }
            }

            HubCommand::ClientsTotal { reply } => {
                let _ = reply.send(self.registry.size());
            }
        }
    }
}

/// Spawn the hub task. It runs until every handle has been dropped.
pub fn spawn_hub() -> HubHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let hub = Hub {
        registry: ConnectionRegistry::new(),
    };
    tokio::spawn(hub.run(rx));
    HubHandle { tx }
}
