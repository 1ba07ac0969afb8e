//! RabbitMQ transport adapter: translates the core queue abstraction to a
//! durable broker. The adapter owns a private current-thread runtime and
//! blocks on it, so the synchronous worker can drive it directly.
//!
//! Deduplication is delegated to upstream publishers; unlike the local
//! queue, the broker adapter never rejects a duplicate id.

use lapin::options::{
    BasicGetOptions, BasicPublishOptions, ConfirmSelectOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use tokio::runtime::Runtime;
use tracing::{debug, info};

use esteira_core::{Message, MessageStatus, Transport, TransportError};

/// Suffix appended to the main queue name to form the dead-letter queue.
const DLQ_SUFFIX: &str = "-dlq";

fn dlq_name(queue: &str) -> String {
    format!("{queue}{DLQ_SUFFIX}")
}

fn broker_err(err: lapin::Error) -> TransportError {
    TransportError::Broker(err.to_string())
}

/// [`Transport`] over RabbitMQ. Publishes block until the broker confirms
/// acceptance; consumption uses `basic_get` without acks, keeping the
/// at-most-once contract across the transport boundary.
pub struct AmqpTransport {
    runtime: Runtime,
    // The connection only needs to outlive the channel.
    _connection: Connection,
    channel: Channel,
    queue: String,
    dlq: String,
}

impl AmqpTransport {
    /// Connect to the broker, enable publisher confirms, and declare the
    /// durable main queue and its dead-letter sibling.
    pub fn connect(uri: &str, queue: &str) -> Result<Self, TransportError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| TransportError::Broker(e.to_string()))?;

        let dlq = dlq_name(queue);
        let declare = QueueDeclareOptions {
            durable: true,
            ..QueueDeclareOptions::default()
        };

        let (connection, channel) = runtime.block_on(async {
            let connection = Connection::connect(uri, ConnectionProperties::default()).await?;
            let channel = connection.create_channel().await?;
            channel
                .confirm_select(ConfirmSelectOptions::default())
                .await?;
            channel
                .queue_declare(queue, declare, FieldTable::default())
                .await?;
            channel
                .queue_declare(&dlq, declare, FieldTable::default())
                .await?;
            Ok::<_, lapin::Error>((connection, channel))
        })
        .map_err(broker_err)?;

        info!(queue, dlq = %dlq, "connected to broker");
        Ok(Self {
            runtime,
            _connection: connection,
            channel,
            queue: queue.to_string(),
            dlq,
        })
    }

    pub fn queue_name(&self) -> &str {
        &self.queue
    }

    pub fn dlq_queue_name(&self) -> &str {
        &self.dlq
    }

    /// Publish to `queue`, blocking until the broker has accepted it. The
    /// body is the UTF-8 JSON wire schema; the broker's message-id and
    /// timestamp properties mirror the message's.
    fn publish(&self, queue: &str, message: &Message) -> Result<(), TransportError> {
        let body = serde_json::to_vec(message)?;
        let properties = BasicProperties::default()
            .with_message_id(message.id.to_string().into())
            .with_timestamp(message.timestamp.timestamp().max(0) as u64)
            .with_content_type("application/json".into());

        self.runtime
            .block_on(async {
                let confirm = self
                    .channel
                    .basic_publish("", queue, BasicPublishOptions::default(), &body, properties)
                    .await?;
                confirm.await?;
                Ok::<_, lapin::Error>(())
            })
            .map_err(broker_err)?;
        debug!(msg_id = %message.id, queue, "published");
        Ok(())
    }

    fn take(&self, queue: &str) -> Result<Option<Message>, TransportError> {
        let delivery = self
            .runtime
            .block_on(
                self.channel
                    .basic_get(queue, BasicGetOptions { no_ack: true }),
            )
            .map_err(broker_err)?;
        let Some(delivery) = delivery else {
            return Ok(None);
        };
        let mut message: Message = serde_json::from_slice(&delivery.delivery.data)?;
        message.status = MessageStatus::Received;
        Ok(Some(message))
    }

    fn count(&self, queue: &str) -> Result<usize, TransportError> {
        let passive = QueueDeclareOptions {
            durable: true,
            passive: true,
            ..QueueDeclareOptions::default()
        };
        let declared = self
            .runtime
            .block_on(
                self.channel
                    .queue_declare(queue, passive, FieldTable::default()),
            )
            .map_err(broker_err)?;
        Ok(declared.message_count() as usize)
    }
}

impl Transport for AmqpTransport {
    fn enqueue(&self, mut message: Message) -> Result<(), TransportError> {
        message.status = MessageStatus::Sent;
        self.publish(&self.queue, &message)
    }

    fn dequeue(&self) -> Result<Option<Message>, TransportError> {
        self.take(&self.queue)
    }

    fn depth(&self) -> Result<usize, TransportError> {
        self.count(&self.queue)
    }

    fn enqueue_dlq(&self, message: Message) -> Result<(), TransportError> {
        self.publish(&self.dlq, &message)
    }

    fn dequeue_dlq(&self) -> Result<Option<Message>, TransportError> {
        self.take(&self.dlq)
    }

    fn dlq_depth(&self) -> Result<usize, TransportError> {
        self.count(&self.dlq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dlq_name_is_derived_from_the_queue() {
        assert_eq!(dlq_name("esteira"), "esteira-dlq");
        assert_eq!(dlq_name("orders"), "orders-dlq");
    }

    #[test]
    fn wire_body_uses_the_snapshot_field_schema() {
        let message = Message::new("TestSystem", "Test payload");
        let body = serde_json::to_vec(&message).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        for field in ["MessageId", "Timestamp", "SourceSystem", "Payload", "Status"] {
            assert!(value.get(field).is_some(), "missing wire field {field}");
        }
        assert!(value["Status"].is_u64());
    }
}
