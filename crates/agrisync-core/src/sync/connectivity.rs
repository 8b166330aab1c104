//! Reachability monitor publishing online/offline transitions.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::transport::Transport;

/// Binary connectivity signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Connectivity {
    Online,
    Offline,
}

impl Connectivity {
    pub const fn from_reachable(reachable: bool) -> Self {
        if reachable {
            Self::Online
        } else {
            Self::Offline
        }
    }

    pub const fn is_online(self) -> bool {
        matches!(self, Self::Online)
    }
}

/// Probes the transport on an interval and publishes changes.
///
/// The probe task stops when the monitor is dropped.
pub struct ConnectivityMonitor {
    receiver: watch::Receiver<Connectivity>,
    task: JoinHandle<()>,
}

impl ConnectivityMonitor {
    /// Start probing. The first probe runs immediately.
    pub fn spawn(transport: Arc<dyn Transport>, interval: Duration, initial: Connectivity) -> Self {
        let (sender, receiver) = watch::channel(initial);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let observed = Connectivity::from_reachable(transport.probe().await);
                let changed = sender.send_if_modified(|current| {
                    if *current == observed {
                        false
                    } else {
                        *current = observed;
                        true
                    }
                });
                if changed {
                    tracing::info!(connectivity = ?observed, "Connectivity changed");
                }
                if sender.is_closed() {
                    break;
                }
            }
        });

        Self { receiver, task }
    }

    pub fn subscribe(&self) -> watch::Receiver<Connectivity> {
        self.receiver.clone()
    }

    pub fn current(&self) -> Connectivity {
        *self.receiver.borrow()
    }
}

impl Drop for ConnectivityMonitor {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::testing::ScriptedTransport;

    #[tokio::test(start_paused = true)]
    async fn publishes_transitions_only() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.set_online(false);

        let monitor =
            ConnectivityMonitor::spawn(transport.clone(), Duration::from_secs(5), Connectivity::Online);
        let mut receiver = monitor.subscribe();

        receiver.changed().await.unwrap();
        assert_eq!(*receiver.borrow_and_update(), Connectivity::Offline);

        transport.set_online(true);
        receiver.changed().await.unwrap();
        assert_eq!(*receiver.borrow_and_update(), Connectivity::Online);
        assert!(monitor.current().is_online());

        // Steady state publishes nothing new
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(!receiver.has_changed().unwrap());
    }
}
