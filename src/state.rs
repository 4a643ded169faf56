use std::sync::Arc;

use crate::auth::TokenVerifier;
use crate::config::Heartbeat;
use crate::hub::HubHandle;
use crate::store::MessageStore;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub verifier: TokenVerifier,
    pub store: Arc<dyn MessageStore>,
    /// Handle to the broadcast hub task
    pub hub: HubHandle,
    /// Keepalive applied to every socket
    pub heartbeat: Heartbeat,
}

impl AppState {
    pub fn new(verifier: TokenVerifier, store: Arc<dyn MessageStore>, hub: HubHandle) -> Self {
        Self {
            verifier,
            store,
            hub,
            heartbeat: Heartbeat::default(),
        }
    }

    pub fn with_heartbeat(mut self, heartbeat: Heartbeat) -> Self {
        self.heartbeat = heartbeat;
        self
    }
}
