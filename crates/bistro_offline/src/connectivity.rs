//! Online/offline signal.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Shared connectivity flag.
///
/// The embedding UI flips it; the client skips the network entirely while it
/// reads offline, and a transition back online wakes anything subscribed.
/// Clones share the same flag.
#[derive(Debug, Clone)]
pub struct Connectivity {
    state: Arc<watch::Sender<bool>>,
}

impl Connectivity {
    /// A flag starting in the given state.
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { state: Arc::new(tx) }
    }

    /// Whether the network is reported reachable.
    pub fn is_online(&self) -> bool {
        *self.state.borrow()
    }

    /// Reports the network state. Subscribers are notified only on change.
    pub fn set_online(&self, online: bool) {
        let changed = self.state.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            info!(online, "connectivity changed");
        }
    }

    /// A receiver of the latest state. Changes made in quick succession may
    /// be observed as one.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_see_transitions() {
        let connectivity = Connectivity::new(false);
        let mut rx = connectivity.subscribe();
        assert!(!connectivity.is_online());

        connectivity.set_online(true);
        rx.changed().await.unwrap();
        assert!(*rx.borrow_and_update());
    }

    #[test]
    fn same_state_is_not_a_change() {
        let connectivity = Connectivity::default();
        let rx = connectivity.subscribe();
        connectivity.set_online(true);
        assert!(!rx.has_changed().unwrap());
        connectivity.clone().set_online(false);
        assert!(rx.has_changed().unwrap());
    }
}
