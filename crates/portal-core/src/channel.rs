use tokio::sync::broadcast;

use crate::types::AuthStateChange;

/// Receiver half of an auth-state subscription. Dropping it unsubscribes.
pub type AuthStateStream = broadcast::Receiver<AuthStateChange>;

/// Fan-out channel backend adapters use to publish auth-state changes.
#[derive(Clone, Debug)]
pub struct AuthStateChannel {
    event_tx: broadcast::Sender<AuthStateChange>,
}

impl AuthStateChannel {
    pub fn new(buffer: usize) -> Self {
        let (event_tx, _) = broadcast::channel(buffer.max(1));
        Self { event_tx }
    }

    /// Subscribe to future auth-state changes.
    pub fn subscribe(&self) -> AuthStateStream {
        self.event_tx.subscribe()
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.event_tx.receiver_count()
    }

    /// Publish to all subscribers.
    ///
    /// Emission is best-effort; having no subscriber is not an error.
    pub fn emit(&self, change: AuthStateChange) {
        let _ = self.event_tx.send(change);
    }
}

impl Default for AuthStateChannel {
    fn default() -> Self {
        Self::new(32)
    }
}
