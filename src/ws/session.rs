//! Per-connection state machine.
//!
//! `Connecting -> Authenticated -> Disconnected`. A failed verification goes
//! straight from `Connecting` to `Disconnected` without ever touching the
//! registry. Each inbound event maps to one transition method; the socket
//! pump calls them one at a time, so a connection's own events are handled
//! in the order they arrived.

use serde_json::Value;
use std::fmt::Display;
use std::sync::Arc;

use crate::auth::{AuthError, TokenVerifier};
use crate::hub::{HubError, HubHandle};
use crate::protocol::ClientEvent;
use crate::registry::Outbound;
use crate::store::MessageStore;
use crate::types::{ConnectionId, IdentityClaim, MessageDraft};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Authenticated(IdentityClaim),
    Disconnected,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Hub(#[from] HubError),

    #[error("connection is not authenticated")]
    NotAuthenticated,

    #[error("connection has already been authenticated or closed")]
    AlreadyStarted,
}

pub struct Session {
    connection_id: ConnectionId,
    state: SessionState,
    hub: HubHandle,
    store: Arc<dyn MessageStore>,
}

impl Session {
    pub fn new(connection_id: ConnectionId, hub: HubHandle, store: Arc<dyn MessageStore>) -> Self {
        Self {
            connection_id,
            state: SessionState::Connecting,
            hub,
            store,
        }
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// `Connecting -> Authenticated` on a verified credential (the registry
    /// admits the connection and announces the new total), otherwise
    /// `Connecting -> Disconnected` with the specific [`AuthError`].
    pub async fn authenticate(
        &mut self,
        verifier: &TokenVerifier,
        credential: Option<&str>,
        outbound: Outbound,
    ) -> Result<(), SessionError> {
        if self.state != SessionState::Connecting {
            return Err(SessionError::AlreadyStarted);
        }

        let claim = match verifier.verify(credential) {
            Ok(claim) => claim,
            Err(e) => {
                tracing::warn!(
                    connection_id = %self.connection_id,
                    error = %e,
                    "Socket auth failed"
                );
                self.state = SessionState::Disconnected;
                return Err(e.into());
            }
        };

        if let Err(e) = self
            .hub
            .connect(self.connection_id.clone(), claim.clone(), outbound)
            .await
        {
            self.state = SessionState::Disconnected;
            return Err(e.into());
        }

        self.state = SessionState::Authenticated(claim);
        Ok(())
    }

    /// Dispatch one decoded client event
    pub async fn handle(&self, event: ClientEvent) -> Result<(), SessionError> {
        match event {
            ClientEvent::Message(draft) => self.on_message(draft).await,
            ClientEvent::Feedback(payload) => self.on_feedback(payload),
        }
    }

    /// `Authenticated --message--> Authenticated`: stamp the sender, persist,
    /// then relay to every other connection.
    ///
    /// A persistence failure is logged and the relay still happens.
    pub async fn on_message(&self, draft: MessageDraft) -> Result<(), SessionError> {
        let claim = self.claim()?;
        let message = draft.stamp(claim);

        tracing::debug!(
            connection_id = %self.connection_id,
            user_id = %message.user_id,
            "Chat message received"
        );

        if let Err(e) = self.store.append(message.clone()).await {
            tracing::error!(
                connection_id = %self.connection_id,
                error = %e,
                "Failed to persist chat message, relaying anyway"
            );
        }

        self.hub.relay_chat(self.connection_id.clone(), message)?;
        Ok(())
    }

    /// `Authenticated --feedback--> Authenticated`: relay verbatim to everyone
    pub fn on_feedback(&self, payload: Value) -> Result<(), SessionError> {
        self.claim()?;
        self.hub.relay_feedback(payload)?;
        Ok(())
    }

    /// Transport errors that leave the socket open are only reported
    pub fn on_transport_error(&self, error: &dyn Display) {
        tracing::warn!(connection_id = %self.connection_id, error = %error, "WebSocket error");
    }

    /// `Authenticated -> Disconnected`. Idempotent.
    pub fn close(&mut self) {
        let previous = std::mem::replace(&mut self.state, SessionState::Disconnected);
        if let SessionState::Authenticated(claim) = previous {
            tracing::info!(
                connection_id = %self.connection_id,
                user_id = %claim.user_id(),
                "Socket disconnected"
            );
            if self.hub.disconnect(self.connection_id.clone()).is_err() {
                tracing::debug!(connection_id = %self.connection_id, "Hub already stopped");
            }
        }
    }

    fn claim(&self) -> Result<&IdentityClaim, SessionError> {
        match &self.state {
            SessionState::Authenticated(claim) => Ok(claim),
            _ => Err(SessionError::NotAuthenticated),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}
