//! Redis broker
//!
//! Reliable-queue pattern over Redis lists: publishers `LPUSH` onto the
//! queue, consumers `BRPOPLPUSH` into `<queue>:processing` and acknowledge
//! with `LREM`. Entries left in the processing list by a crashed consumer
//! are moved back onto the queue when a new subscription starts.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::{Acknowledger, BrokerError, Consumer, Delivery, Publisher, Subscription, TaskMessage};

/// Seconds a blocking pop waits before re-checking for shutdown
const POLL_TIMEOUT_SECS: u64 = 1;

impl From<redis::RedisError> for BrokerError {
    fn from(err: redis::RedisError) -> Self {
        BrokerError::Connection(err.to_string())
    }
}

fn processing_list(queue: &str) -> String {
    format!("{queue}:processing")
}

/// Redis-backed broker
#[derive(Clone)]
pub struct RedisBroker {
    client: redis::Client,
    connection: ConnectionManager,
    closed: Arc<AtomicBool>,
}

impl std::fmt::Debug for RedisBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBroker")
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

impl RedisBroker {
    /// Connect to the Redis server at `url`
    pub async fn connect(url: &str) -> Result<Self, BrokerError> {
        let client = redis::Client::open(url)?;
        let connection = ConnectionManager::new(client.clone()).await?;
        info!("Connected to Redis broker");
        Ok(Self {
            client,
            connection,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::Closed);
        }
        Ok(())
    }

    /// Move unacknowledged entries back onto `queue`
    async fn recover(&self, queue: &str) -> Result<u64, BrokerError> {
        let mut conn = self.connection.clone();
        let processing = processing_list(queue);
        let mut recovered = 0;
        loop {
            let moved: Option<String> = conn.rpoplpush(&processing, queue).await?;
            if moved.is_none() {
                break;
            }
            recovered += 1;
        }
        if recovered > 0 {
            warn!(queue = %queue, recovered, "Requeued unacknowledged messages");
        }
        Ok(recovered)
    }
}

struct RedisAcker {
    connection: ConnectionManager,
    processing: String,
    raw: String,
}

#[async_trait]
impl Acknowledger for RedisAcker {
    async fn ack(&self, message: &TaskMessage) -> Result<(), BrokerError> {
        let mut conn = self.connection.clone();
        let removed: i64 = conn.lrem(&self.processing, 1, &self.raw).await?;
        if removed == 0 {
            return Err(BrokerError::Ack(format!(
                "message {} is not awaiting acknowledgement",
                message.message_id
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Publisher for RedisBroker {
    async fn publish(&self, exchange: &str, message: TaskMessage) -> Result<bool, BrokerError> {
        self.ensure_open()?;
        let payload = String::from_utf8(message.to_bytes()?)
            .map_err(|e| BrokerError::Serialization(e.to_string()))?;
        let mut conn = self.connection.clone();
        let _: i64 = conn
            .lpush(exchange, payload)
            .await
            .map_err(|e| BrokerError::Publish(e.to_string()))?;
        debug!(exchange = %exchange, message_id = %message.message_id, "Published message");
        Ok(true)
    }

    fn take_returns(&self) -> Option<mpsc::UnboundedReceiver<TaskMessage>> {
        // Lists accept every push; nothing is ever returned
        None
    }

    async fn ping(&self) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let mut conn = self.connection.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!("Redis broker closed");
        }
        Ok(())
    }
}

#[async_trait]
impl Consumer for RedisBroker {
    async fn subscribe(&self, queue: &str) -> Result<Subscription, BrokerError> {
        self.ensure_open()?;
        self.recover(queue).await?;

        // Blocking pops get a dedicated connection
        let mut blocking = ConnectionManager::new(self.client.clone()).await?;
        let acks = self.connection.clone();
        let closed = self.closed.clone();
        let queue = queue.to_string();
        let processing = processing_list(&queue);
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            info!(queue = %queue, "Subscribed to queue");
            while !closed.load(Ordering::SeqCst) && !tx.is_closed() {
                let popped: Option<String> = match blocking
                    .brpoplpush(&queue, &processing, POLL_TIMEOUT_SECS as f64)
                    .await
                {
                    Ok(popped) => popped,
                    Err(e) => {
                        error!(queue = %queue, error = %e, "Failed to pop from queue");
                        tokio::time::sleep(std::time::Duration::from_secs(POLL_TIMEOUT_SECS)).await;
                        continue;
                    }
                };
                let Some(raw) = popped else { continue };

                let message = match TaskMessage::from_slice(raw.as_bytes()) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!(queue = %queue, error = %e, "Discarding undecodable message");
                        let mut conn = acks.clone();
                        let _: Result<i64, _> = conn.lrem(&processing, 1, &raw).await;
                        continue;
                    }
                };

                let acker = Box::new(RedisAcker {
                    connection: acks.clone(),
                    processing: processing.clone(),
                    raw,
                });
                if tx.send(Delivery::new(message, acker)).is_err() {
                    break;
                }
            }
            debug!(queue = %queue, "Subscription loop finished");
        });

        Ok(rx)
    }

    async fn close(&self) -> Result<(), BrokerError> {
        Publisher::close(self).await
    }
}
