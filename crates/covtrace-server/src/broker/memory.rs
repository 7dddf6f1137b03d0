//! In-process broker
//!
//! Exchanges map one-to-one onto queues of the same name. Publishing to an
//! exchange with no declared queue is unroutable: the message is handed to
//! the return channel and the publish reports `false`. Messages published to
//! a declared queue without a live subscriber are buffered until one
//! subscribes.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::{Acknowledger, BrokerError, Consumer, Delivery, Publisher, Subscription, TaskMessage};

#[derive(Debug, Default)]
struct Queue {
    buffered: VecDeque<TaskMessage>,
    subscriber: Option<mpsc::UnboundedSender<Delivery>>,
}

#[derive(Debug, Default)]
struct Shared {
    queues: Mutex<HashMap<String, Queue>>,
    unacked: Mutex<HashSet<String>>,
    acked: AtomicU64,
}

/// In-memory broker implementing both publisher and consumer
#[derive(Debug)]
pub struct MemoryBroker {
    shared: Arc<Shared>,
    returns_tx: mpsc::UnboundedSender<TaskMessage>,
    returns_rx: Mutex<Option<mpsc::UnboundedReceiver<TaskMessage>>>,
    closed: AtomicBool,
}

impl MemoryBroker {
    /// Create a broker with no queues
    pub fn new() -> Self {
        let (returns_tx, returns_rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(Shared::default()),
            returns_tx,
            returns_rx: Mutex::new(Some(returns_rx)),
            closed: AtomicBool::new(false),
        }
    }

    /// Declare a queue bound to the exchange of the same name
    pub fn declare_queue(&self, name: &str) {
        self.shared
            .queues
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default();
    }

    /// Add a queue (builder style)
    pub fn with_queue(self, name: &str) -> Self {
        self.declare_queue(name);
        self
    }

    /// Messages waiting for a subscriber on `queue`
    pub fn buffered(&self, queue: &str) -> usize {
        self.shared
            .queues
            .lock()
            .unwrap()
            .get(queue)
            .map(|q| q.buffered.len())
            .unwrap_or(0)
    }

    /// Number of acknowledged messages
    pub fn acked(&self) -> u64 {
        self.shared.acked.load(Ordering::SeqCst)
    }

    /// Number of delivered but unacknowledged messages
    pub fn unacked(&self) -> usize {
        self.shared.unacked.lock().unwrap().len()
    }

    fn deliver(&self, sender: &mpsc::UnboundedSender<Delivery>, message: TaskMessage) -> Result<(), TaskMessage> {
        let id = message.message_id.clone();
        self.shared.unacked.lock().unwrap().insert(id.clone());
        let acker = Box::new(MemoryAcker {
            shared: self.shared.clone(),
        });
        sender.send(Delivery::new(message, acker)).map_err(|err| {
            self.shared.unacked.lock().unwrap().remove(&id);
            err.0.message
        })
    }

    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::Closed);
        }
        Ok(())
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

struct MemoryAcker {
    shared: Arc<Shared>,
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn ack(&self, message: &TaskMessage) -> Result<(), BrokerError> {
        if !self.shared.unacked.lock().unwrap().remove(&message.message_id) {
            return Err(BrokerError::Ack(format!(
                "message {} is not awaiting acknowledgement",
                message.message_id
            )));
        }
        self.shared.acked.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl Publisher for MemoryBroker {
    async fn publish(&self, exchange: &str, message: TaskMessage) -> Result<bool, BrokerError> {
        self.ensure_open()?;
        let mut queues = self.shared.queues.lock().unwrap();

        let Some(queue) = queues.get_mut(exchange) else {
            debug!(exchange = %exchange, message_id = %message.message_id, "Unroutable message");
            self.returns_tx
                .send(message)
                .map_err(|_| BrokerError::Publish("return channel closed".into()))?;
            return Ok(false);
        };

        let message = match &queue.subscriber {
            Some(sender) => match self.deliver(sender, message) {
                Ok(()) => return Ok(true),
                Err(message) => {
                    queue.subscriber = None;
                    message
                }
            },
            None => message,
        };
        queue.buffered.push_back(message);
        Ok(true)
    }

    fn take_returns(&self) -> Option<mpsc::UnboundedReceiver<TaskMessage>> {
        self.returns_rx.lock().unwrap().take()
    }

    async fn ping(&self) -> Result<(), BrokerError> {
        self.ensure_open()
    }

    async fn close(&self) -> Result<(), BrokerError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let mut queues = self.shared.queues.lock().unwrap();
            for queue in queues.values_mut() {
                queue.subscriber = None;
            }
            info!("Memory broker closed");
        }
        Ok(())
    }
}

#[async_trait]
impl Consumer for MemoryBroker {
    async fn subscribe(&self, queue_name: &str) -> Result<Subscription, BrokerError> {
        self.ensure_open()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let mut queues = self.shared.queues.lock().unwrap();
        let queue = queues.entry(queue_name.to_string()).or_default();

        while let Some(message) = queue.buffered.pop_front() {
            if let Err(message) = self.deliver(&tx, message) {
                queue.buffered.push_front(message);
                break;
            }
        }
        queue.subscriber = Some(tx);
        info!(queue = %queue_name, "Subscribed to queue");
        Ok(rx)
    }

    async fn close(&self) -> Result<(), BrokerError> {
        Publisher::close(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{LOCATION_RECORD, TASKS_EXCHANGE};

    #[tokio::test]
    async fn test_publish_and_consume() {
        let broker = MemoryBroker::new().with_queue(TASKS_EXCHANGE);
        let mut sub = broker.subscribe(TASKS_EXCHANGE).await.unwrap();

        let message = TaskMessage::new(LOCATION_RECORD, b"body".to_vec());
        let id = message.message_id.clone();
        assert!(broker.publish(TASKS_EXCHANGE, message).await.unwrap());

        let delivery = sub.recv().await.unwrap();
        assert_eq!(delivery.message.message_id, id);
        assert_eq!(broker.unacked(), 1);

        delivery.ack().await.unwrap();
        assert_eq!(broker.unacked(), 0);
        assert_eq!(broker.acked(), 1);
    }

    #[tokio::test]
    async fn test_acks_leave_no_per_message_state() {
        let broker = MemoryBroker::new().with_queue(TASKS_EXCHANGE);
        let mut sub = broker.subscribe(TASKS_EXCHANGE).await.unwrap();

        for _ in 0..500 {
            broker
                .publish(TASKS_EXCHANGE, TaskMessage::new(LOCATION_RECORD, vec![]))
                .await
                .unwrap();
            sub.recv().await.unwrap().ack().await.unwrap();
        }

        assert_eq!(broker.acked(), 500);
        assert_eq!(broker.unacked(), 0);
        assert_eq!(broker.buffered(TASKS_EXCHANGE), 0);
        assert!(broker.shared.unacked.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_buffered_until_subscribed() {
        let broker = MemoryBroker::new().with_queue(TASKS_EXCHANGE);
        for _ in 0..3 {
            broker
                .publish(TASKS_EXCHANGE, TaskMessage::new(LOCATION_RECORD, vec![]))
                .await
                .unwrap();
        }
        assert_eq!(broker.buffered(TASKS_EXCHANGE), 3);

        let mut sub = broker.subscribe(TASKS_EXCHANGE).await.unwrap();
        assert_eq!(broker.buffered(TASKS_EXCHANGE), 0);
        for _ in 0..3 {
            assert!(sub.recv().await.is_some());
        }
    }

    #[tokio::test]
    async fn test_unroutable_message_returned() {
        let broker = MemoryBroker::new();
        let mut returns = broker.take_returns().unwrap();
        assert!(broker.take_returns().is_none());

        let message = TaskMessage::new(LOCATION_RECORD, vec![]);
        let id = message.message_id.clone();
        assert!(!broker.publish("nowhere", message).await.unwrap());

        let returned = returns.recv().await.unwrap();
        assert_eq!(returned.message_id, id);
    }

    #[tokio::test]
    async fn test_dropped_subscriber_buffers() {
        let broker = MemoryBroker::new().with_queue(TASKS_EXCHANGE);
        let sub = broker.subscribe(TASKS_EXCHANGE).await.unwrap();
        drop(sub);

        assert!(broker
            .publish(TASKS_EXCHANGE, TaskMessage::new(LOCATION_RECORD, vec![]))
            .await
            .unwrap());
        assert_eq!(broker.buffered(TASKS_EXCHANGE), 1);
        assert_eq!(broker.unacked(), 0);
    }

    #[tokio::test]
    async fn test_double_ack_rejected() {
        let broker = MemoryBroker::new().with_queue(TASKS_EXCHANGE);
        let mut sub = broker.subscribe(TASKS_EXCHANGE).await.unwrap();
        let message = TaskMessage::new(LOCATION_RECORD, vec![]);
        broker.publish(TASKS_EXCHANGE, message.clone()).await.unwrap();

        sub.recv().await.unwrap().ack().await.unwrap();
        let forged = Delivery::new(
            message,
            Box::new(MemoryAcker {
                shared: broker.shared.clone(),
            }),
        );
        assert!(matches!(forged.ack().await, Err(BrokerError::Ack(_))));
    }

    #[tokio::test]
    async fn test_closed_broker() {
        let broker = MemoryBroker::new().with_queue(TASKS_EXCHANGE);
        Publisher::close(&broker).await.unwrap();

        assert!(matches!(
            broker
                .publish(TASKS_EXCHANGE, TaskMessage::new(LOCATION_RECORD, vec![]))
                .await,
            Err(BrokerError::Closed)
        ));
        assert!(matches!(broker.ping().await, Err(BrokerError::Closed)));
    }
}
