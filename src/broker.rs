//! The seam between the connector/worker/publisher and the AMQP client.
//!
//! Everything above this module talks to a broker through [`Dialer`],
//! [`Subscriber`], [`PublishTransport`] and [`BrokerChannel`]. The `lapin`
//! implementations live here as well.

use crate::delivery::Delivery;
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use futures_util::{FutureExt, StreamExt};
use lapin::{
    options::{BasicConsumeOptions, BasicPublishOptions},
    types::FieldTable,
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

/// How often the return observer drains messages bounced by the broker.
const RETURN_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// How often the close observer checks whether the channel is still connected.
const CLOSE_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Deliveries of one subscription, in broker order.
pub type DeliveryStream = BoxStream<'static, Result<Delivery, lapin::Error>>;

/// Starts queue subscriptions.
#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Subscribes to `queue` with explicit acknowledgements.
    async fn subscribe(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream, lapin::Error>;
}

/// Sends messages to an exchange.
#[async_trait]
pub trait PublishTransport: Send + Sync {
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        options: BasicPublishOptions,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<(), lapin::Error>;
}

/// A message the broker could not route and returned to the publisher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturnedMessage {
    pub exchange: String,
    pub routing_key: String,
    pub reply_code: u16,
    pub reply_text: String,
    pub data: Vec<u8>,
}

impl From<lapin::message::BasicReturnMessage> for ReturnedMessage {
    fn from(msg: lapin::message::BasicReturnMessage) -> Self {
        Self {
            exchange: msg.delivery.exchange.as_str().to_string(),
            routing_key: msg.delivery.routing_key.as_str().to_string(),
            reply_code: msg.reply_code,
            reply_text: msg.reply_text.as_str().to_string(),
            data: msg.delivery.data,
        }
    }
}

/// An open channel usable for consuming and publishing, with lifecycle events.
pub trait BrokerChannel: Subscriber + PublishTransport + Clone + 'static {
    /// Resolves once with the error that closed the channel, or `None` when the
    /// channel went away without one.
    fn notify_close(&self) -> BoxFuture<'static, Option<lapin::Error>>;

    /// Messages returned as unroutable, until the channel closes.
    fn notify_return(&self) -> BoxStream<'static, ReturnedMessage>;
}

/// Opens a connection and a channel on it.
#[async_trait]
pub trait Dialer: Send + Sync {
    type Channel: BrokerChannel;

    async fn dial(&self, uri: &str) -> Result<Self::Channel, lapin::Error>;
}

/// Dials RabbitMQ with `lapin`.
#[derive(Clone, Default)]
pub struct AmqpDialer {
    properties: ConnectionProperties,
}

impl AmqpDialer {
    pub fn new(properties: ConnectionProperties) -> Self {
        Self { properties }
    }
}

#[async_trait]
impl Dialer for AmqpDialer {
    type Channel = AmqpChannel;

    async fn dial(&self, uri: &str) -> Result<AmqpChannel, lapin::Error> {
        let connection = Connection::connect(uri, self.properties.clone()).await?;
        match connection.create_channel().await {
            Ok(channel) => Ok(AmqpChannel::new(connection, channel)),
            Err(e) => {
                if let Err(close_err) = connection.close(0, "channel open failed").await {
                    log::warn!("Failed to close connection after channel open error: {}", close_err);
                }
                Err(e)
            }
        }
    }
}

/// Resolves with the error sent on `rx`, or with `None` once `connected`
/// reports the channel gone without one.
fn close_signal<F>(mut rx: oneshot::Receiver<lapin::Error>, connected: F) -> BoxFuture<'static, Option<lapin::Error>>
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    async move {
        let disconnected = async {
            while connected() {
                tokio::time::sleep(CLOSE_POLL_INTERVAL).await;
            }
        };
        tokio::select! {
            biased;
            res = &mut rx => res.ok(),
            _ = disconnected => rx.try_recv().ok(),
        }
    }
    .boxed()
}

/// A `lapin` channel together with the connection that owns it.
#[derive(Clone)]
pub struct AmqpChannel {
    connection: Arc<Connection>,
    channel: Channel,
    close_listeners: Arc<Mutex<Vec<oneshot::Sender<lapin::Error>>>>,
}

impl AmqpChannel {
    fn new(connection: Connection, channel: Channel) -> Self {
        let close_listeners: Arc<Mutex<Vec<oneshot::Sender<lapin::Error>>>> = Arc::default();
        let listeners = close_listeners.clone();
        channel.on_error(move |err| {
            if let Ok(mut listeners) = listeners.lock() {
                for tx in listeners.drain(..) {
                    let _ = tx.send(err.clone());
                }
            }
        });
        Self {
            connection: Arc::new(connection),
            channel,
            close_listeners,
        }
    }

    /// The underlying `lapin` channel.
    pub fn inner(&self) -> &Channel {
        &self.channel
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }
}

#[async_trait]
impl Subscriber for AmqpChannel {
    async fn subscribe(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream, lapin::Error> {
        let consumer = self
            .channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions { no_ack: false, ..Default::default() },
                FieldTable::default(),
            )
            .await?;

        Ok(consumer.map(|item| item.map(Delivery::from)).boxed())
    }
}

#[async_trait]
impl PublishTransport for AmqpChannel {
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        options: BasicPublishOptions,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<(), lapin::Error> {
        // Confirms are not enabled, so the returned confirmation carries nothing.
        self.channel
            .basic_publish(exchange, routing_key, options, payload, properties)
            .await?;
        Ok(())
    }
}

impl BrokerChannel for AmqpChannel {
    fn notify_close(&self) -> BoxFuture<'static, Option<lapin::Error>> {
        let (tx, rx) = oneshot::channel();
        if let Ok(mut listeners) = self.close_listeners.lock() {
            listeners.push(tx);
        }
        // on_error only fires for failures; a clean close is seen through the status.
        let channel = self.channel.clone();
        close_signal(rx, move || channel.status().connected())
    }

    fn notify_return(&self) -> BoxStream<'static, ReturnedMessage> {
        // lapin buffers basic.return frames on the channel; draining them is
        // the only way to observe them.
        let channel = self.channel.clone();
        futures_util::stream::unfold(channel, |channel| async move {
            loop {
                if !channel.status().connected() {
                    return None;
                }
                match channel.wait_for_confirms().await {
                    Ok(returned) if !returned.is_empty() => {
                        let batch: Vec<ReturnedMessage> = returned.into_iter().map(ReturnedMessage::from).collect();
                        return Some((futures_util::stream::iter(batch), channel));
                    }
                    Ok(_) => tokio::time::sleep(RETURN_POLL_INTERVAL).await,
                    Err(_) => return None,
                }
            }
        })
        .flatten()
        .boxed()
    }
}
