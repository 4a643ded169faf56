//! Live, authenticated connections.
//!
//! The registry is owned by the hub task and mutated only from there, so it
//! carries no lock. Every admission or removal announces the new total to
//! every connection registered at that instant.

use tokio::sync::mpsc;

use crate::protocol::ServerEvent;
use crate::types::{ConnectionId, IdentityClaim};

/// Outbound queue of one connection
pub type Outbound = mpsc::UnboundedSender<ServerEvent>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("connection {0} is already registered")]
    Duplicate(ConnectionId),
}

/// One live socket and its owner
#[derive(Debug)]
pub struct ConnectionEntry {
    pub id: ConnectionId,
    pub claim: IdentityClaim,
    outbound: Outbound,
}

impl ConnectionEntry {
    /// Queue an event for this connection. Returns false if its socket is gone.
    fn push(&self, event: ServerEvent) -> bool {
        if self.outbound.send(event).is_err() {
            tracing::debug!(connection_id = %self.id, "Outbound queue closed, skipping");
            return false;
        }
        true
    }
}

/// Entries in admission order
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    entries: Vec<ConnectionEntry>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit an authenticated connection and announce the new total to all,
    /// the newcomer included.
    pub fn admit(
        &mut self,
        id: ConnectionId,
        claim: IdentityClaim,
        outbound: Outbound,
    ) -> Result<(), RegistryError> {
        if self.get(&id).is_some() {
            return Err(RegistryError::Duplicate(id));
        }

        self.entries.push(ConnectionEntry {
            id,
            claim,
            outbound,
        });
        self.announce_size();
        Ok(())
    }

    /// Remove a connection and announce the new total to the rest.
    ///
    /// Removing an unknown id is a no-op and announces nothing; returns
    /// whether an entry was actually removed.
    pub fn remove(&mut self, id: &str) -> bool {
        let Some(pos) = self.entries.iter().position(|e| e.id == id) else {
            return false;
        };

        self.entries.remove(pos);
        self.announce_size();
        true
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, id: &str) -> Option<&ConnectionEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.id.as_str())
    }

    /// Send to every live connection. Returns how many queues accepted it.
    pub fn broadcast(&self, event: &ServerEvent) -> usize {
        self.entries
            .iter()
            .filter(|e| e.push(event.clone()))
            .count()
    }

    /// Send to every live connection except `exclude`.
    pub fn broadcast_except(&self, exclude: &str, event: &ServerEvent) -> usize {
        self.entries
            .iter()
            .filter(|e| e.id != exclude)
            .filter(|e| e.push(event.clone()))
            .count()
    }

    fn announce_size(&self) {
        self.broadcast(&ServerEvent::ClientsTotal(self.size()));
    }
}
