use serde::{Deserialize, Serialize};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Connectivity {
    Online,
    Offline,
}

impl Connectivity {
    pub fn is_online(self) -> bool {
        self == Connectivity::Online
    }
}

/// What subscribers observe: the current status plus how many times the
/// network has come back since the monitor was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectivityState {
    pub status: Connectivity,
    pub reconnects: u64,
}

/// Network reachability as reported by the host platform.
///
/// Only real changes are published. A watch receiver can miss intermediate
/// values, so every offline to online edge bumps `reconnects` and a
/// subscriber compares counters instead of statuses.
#[derive(Clone)]
pub struct ConnectivityMonitor {
    tx: watch::Sender<ConnectivityState>,
}

impl ConnectivityMonitor {
    pub fn new(initial: Connectivity) -> Self {
        let (tx, _rx) = watch::channel(ConnectivityState {
            status: initial,
            reconnects: 0,
        });
        Self { tx }
    }

    pub fn current(&self) -> Connectivity {
        self.tx.borrow().status
    }

    pub fn is_online(&self) -> bool {
        self.current().is_online()
    }

    pub fn reconnects(&self) -> u64 {
        self.tx.borrow().reconnects
    }

    pub fn set(&self, next: Connectivity) {
        let changed = self.tx.send_if_modified(|state| {
            if state.status == next {
                return false;
            }
            if next.is_online() {
                state.reconnects += 1;
            }
            state.status = next;
            true
        });
        if changed {
            log::info!("Connectivity changed to {next:?}");
        }
    }

    pub fn set_online(&self, online: bool) {
        self.set(if online {
            Connectivity::Online
        } else {
            Connectivity::Offline
        });
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
        self.tx.subscribe()
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(Connectivity::Online)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn only_publishes_changes() {
        let monitor = ConnectivityMonitor::new(Connectivity::Online);
        let mut rx = monitor.subscribe();

        monitor.set_online(true);
        assert!(!rx.has_changed().unwrap());

        monitor.set_online(false);
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().status, Connectivity::Offline);
        assert!(!monitor.is_online());

        monitor.set_online(false);
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn reconnects_survive_coalesced_updates() {
        let monitor = ConnectivityMonitor::new(Connectivity::Online);
        let mut rx = monitor.subscribe();
        let seen = rx.borrow_and_update().reconnects;

        // The receiver only gets to look after the flap is over.
        monitor.set_online(false);
        monitor.set_online(true);
        monitor.set_online(false);
        monitor.set_online(true);

        let state = *rx.borrow_and_update();
        assert_eq!(state.status, Connectivity::Online);
        assert_eq!(state.reconnects, seen + 2);
        assert_eq!(monitor.reconnects(), 2);
    }
}
