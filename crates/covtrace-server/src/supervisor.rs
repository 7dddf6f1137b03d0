//! Background loops and cooperative shutdown
//!
//! Each loop is a two-branch `select!` between the shutdown signal and its
//! work source. [`Supervisor::shutdown`] raises the signal and waits for
//! every loop to exit; only then may the caller close the broker and store.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::broker::{Subscription, TaskMessage};
use crate::storage::Store;
use crate::worker::RecordValidator;

/// Interval between expired activation code purges
pub const PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// Receiving side of the shutdown signal
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Resolves once shutdown was requested (or the sender is gone)
    pub async fn cancelled(&mut self) {
        let _ = self.rx.wait_for(|stop| *stop).await;
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }
}

/// Sending side of the shutdown signal
#[derive(Debug)]
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Owns the process's background loops
#[derive(Debug, Default)]
pub struct Supervisor {
    shutdown: Shutdown,
    loops: Vec<(&'static str, JoinHandle<()>)>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal(&self) -> ShutdownSignal {
        self.shutdown.signal()
    }

    /// Number of running loops
    pub fn len(&self) -> usize {
        self.loops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }

    /// Log messages the broker could not route
    pub fn spawn_return_monitor(&mut self, mut returns: mpsc::UnboundedReceiver<TaskMessage>) {
        let mut signal = self.signal();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = signal.cancelled() => break,
                    returned = returns.recv() => match returned {
                        Some(message) => warn!(
                            kind = %message.kind,
                            message_id = %message.message_id,
                            did = message.header(crate::broker::DID_HEADER).unwrap_or("-"),
                            "Message returned by broker"
                        ),
                        None => break,
                    },
                }
            }
            debug!("Return monitor stopped");
        });
        self.loops.push(("return-monitor", handle));
    }

    /// Dispatch deliveries to detached validation tasks.
    ///
    /// `max_in_flight` bounds concurrent tasks; 0 means unbounded. Tasks still
    /// running when shutdown is requested are awaited before the loop exits.
    pub fn spawn_worker(
        &mut self,
        validator: RecordValidator,
        mut deliveries: Subscription,
        max_in_flight: usize,
    ) {
        let mut signal = self.signal();
        let limit = (max_in_flight > 0).then(|| Arc::new(Semaphore::new(max_in_flight)));

        let handle = tokio::spawn(async move {
            let mut in_flight = JoinSet::new();
            info!(max_in_flight, "Worker loop started");

            loop {
                while let Some(finished) = in_flight.try_join_next() {
                    if let Err(e) = finished {
                        error!(error = %e, "Validation task panicked");
                    }
                }

                let permit = match &limit {
                    Some(semaphore) => tokio::select! {
                        _ = signal.cancelled() => break,
                        permit = semaphore.clone().acquire_owned() => match permit {
                            Ok(permit) => Some(permit),
                            Err(_) => break,
                        },
                    },
                    None => None,
                };

                tokio::select! {
                    _ = signal.cancelled() => break,
                    delivery = deliveries.recv() => match delivery {
                        Some(delivery) => {
                            let validator = validator.clone();
                            in_flight.spawn(async move {
                                let _permit = permit;
                                validator.handle(delivery).await;
                            });
                        }
                        None => {
                            warn!("Task subscription closed");
                            break;
                        }
                    },
                }
            }

            let pending = in_flight.len();
            if pending > 0 {
                info!(pending, "Waiting for in-flight tasks");
            }
            while in_flight.join_next().await.is_some() {}
            info!("Worker loop stopped");
        });
        self.loops.push(("worker", handle));
    }

    /// Periodically remove expired activation codes
    pub fn spawn_code_purge(&mut self, store: Arc<dyn Store>, interval: Duration) {
        let mut signal = self.signal();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = signal.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = store.purge_expired_codes().await {
                            warn!(error = %e, "Failed to purge activation codes");
                        }
                    }
                }
            }
            debug!("Code purge stopped");
        });
        self.loops.push(("code-purge", handle));
    }

    /// Signal every loop and wait for them to exit
    pub async fn shutdown(self) {
        self.shutdown.trigger();
        for (name, handle) in self.loops {
            if let Err(e) = handle.await {
                error!(task = name, error = %e, "Background task failed");
            }
        }
        info!("Background tasks stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{Consumer, MemoryBroker, Publisher, LOCATION_RECORD, TASKS_EXCHANGE};
    use crate::storage::MemoryStore;
    use crate::worker::DisabledPublisher;
    use covtrace_resolver::ResolverRegistry;

    fn validator() -> RecordValidator {
        RecordValidator::new(
            Arc::new(ResolverRegistry::new()),
            Arc::new(MemoryStore::new()),
            Arc::new(DisabledPublisher),
        )
    }

    #[tokio::test]
    async fn test_signal_observed() {
        let shutdown = Shutdown::new();
        let mut signal = shutdown.signal();
        assert!(!signal.is_cancelled());

        shutdown.trigger();
        signal.cancelled().await;
        assert!(signal.is_cancelled());
    }

    #[tokio::test]
    async fn test_worker_acks_every_delivery() {
        let broker = Arc::new(MemoryBroker::new().with_queue(TASKS_EXCHANGE));
        let deliveries = broker.subscribe(TASKS_EXCHANGE).await.unwrap();

        let mut supervisor = Supervisor::new();
        supervisor.spawn_worker(validator(), deliveries, 2);

        for kind in [LOCATION_RECORD, "bogus", LOCATION_RECORD] {
            broker
                .publish(TASKS_EXCHANGE, TaskMessage::new(kind, b"junk".to_vec()))
                .await
                .unwrap();
        }

        for _ in 0..50 {
            if broker.acked() == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        supervisor.shutdown().await;

        assert_eq!(broker.acked(), 3);
        assert_eq!(broker.unacked(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_stops_all_loops() {
        let broker = Arc::new(MemoryBroker::new().with_queue(TASKS_EXCHANGE));
        let deliveries = broker.subscribe(TASKS_EXCHANGE).await.unwrap();

        let mut supervisor = Supervisor::new();
        supervisor.spawn_return_monitor(broker.take_returns().unwrap());
        supervisor.spawn_worker(validator(), deliveries, 0);
        supervisor.spawn_code_purge(Arc::new(MemoryStore::new()), PURGE_INTERVAL);
        assert_eq!(supervisor.len(), 3);

        tokio::time::timeout(Duration::from_secs(5), supervisor.shutdown())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_purge_runs() {
        let store = Arc::new(MemoryStore::new());
        let mut code = crate::storage::ActivationCode::new("did:bryk:1", covtrace_core::Role::User, "c");
        code.created_at = chrono::Utc::now() - chrono::Duration::seconds(300);
        store.insert_activation_code(code).await.unwrap();

        let mut supervisor = Supervisor::new();
        supervisor.spawn_code_purge(store.clone(), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(50)).await;
        supervisor.shutdown().await;

        assert_eq!(store.code_entries(), 0);
    }
}
