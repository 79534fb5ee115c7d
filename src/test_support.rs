//! In-memory broker doubles shared by the unit tests.

use crate::broker::{BrokerChannel, DeliveryStream, PublishTransport, ReturnedMessage, Subscriber};
use crate::delivery::{Acknowledger, Delivery};
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use futures_util::{FutureExt, StreamExt};
use lapin::{
    options::{BasicAckOptions, BasicNackOptions, BasicPublishOptions, BasicRejectOptions},
    BasicProperties,
};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

pub(crate) fn io_error(msg: &str) -> lapin::Error {
    lapin::Error::IOError(Arc::new(std::io::Error::new(std::io::ErrorKind::ConnectionRefused, msg.to_string())))
}

/// Polls `cond` until it holds or two seconds pass.
pub(crate) async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

/// A single settle call observed by [`RecordingAcker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Settle {
    Ack { tag: u64, multiple: bool },
    Nack { tag: u64, multiple: bool, requeue: bool },
    Reject { tag: u64, requeue: bool },
}

pub(crate) type SettleLog = Arc<Mutex<Vec<Settle>>>;

/// Records settle calls for one delivery into a shared log.
pub(crate) struct RecordingAcker {
    tag: u64,
    log: SettleLog,
    fail: bool,
}

impl RecordingAcker {
    pub(crate) fn new(tag: u64, log: SettleLog) -> Self {
        Self { tag, log, fail: false }
    }

    pub(crate) fn failing(tag: u64, log: SettleLog) -> Self {
        Self { tag, log, fail: true }
    }

    fn result(&self) -> Result<(), lapin::Error> {
        if self.fail {
            Err(io_error("channel closed"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Acknowledger for RecordingAcker {
    async fn ack(&self, options: BasicAckOptions) -> Result<(), lapin::Error> {
        self.log.lock().unwrap().push(Settle::Ack { tag: self.tag, multiple: options.multiple });
        self.result()
    }

    async fn nack(&self, options: BasicNackOptions) -> Result<(), lapin::Error> {
        self.log.lock().unwrap().push(Settle::Nack {
            tag: self.tag,
            multiple: options.multiple,
            requeue: options.requeue,
        });
        self.result()
    }

    async fn reject(&self, options: BasicRejectOptions) -> Result<(), lapin::Error> {
        self.log.lock().unwrap().push(Settle::Reject { tag: self.tag, requeue: options.requeue });
        self.result()
    }
}

pub(crate) fn delivery(tag: u64, log: &SettleLog) -> Delivery {
    Delivery::new(tag, format!("message {}", tag).into_bytes(), Arc::new(RecordingAcker::new(tag, log.clone())))
}

/// A message captured by [`MockChannel`]'s publish transport.
#[derive(Debug, Clone)]
pub(crate) struct Published {
    pub exchange: String,
    pub routing_key: String,
    pub options: BasicPublishOptions,
    pub payload: Vec<u8>,
    pub properties: BasicProperties,
}

/// A channel whose subscriptions share one in-memory queue, the way competing
/// consumers share a broker queue.
#[derive(Clone)]
pub(crate) struct MockChannel {
    sender: Arc<Mutex<Option<mpsc::UnboundedSender<Delivery>>>>,
    receiver: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Delivery>>>,
    pub subscriptions: Arc<Mutex<Vec<(String, String)>>>,
    failing_queues: Arc<Mutex<HashSet<String>>>,
    pub published: Arc<Mutex<Vec<Published>>>,
    publish_fails: bool,
    close_listeners: Arc<Mutex<Vec<oneshot::Sender<lapin::Error>>>>,
    return_listeners: Arc<Mutex<Vec<mpsc::UnboundedSender<ReturnedMessage>>>>,
}

impl MockChannel {
    pub(crate) fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            sender: Arc::new(Mutex::new(Some(tx))),
            receiver: Arc::new(tokio::sync::Mutex::new(rx)),
            subscriptions: Arc::default(),
            failing_queues: Arc::default(),
            published: Arc::default(),
            publish_fails: false,
            close_listeners: Arc::default(),
            return_listeners: Arc::default(),
        }
    }

    pub(crate) fn failing_publish() -> Self {
        Self { publish_fails: true, ..Self::new() }
    }

    pub(crate) fn fail_subscribe(&self, queue: &str) {
        self.failing_queues.lock().unwrap().insert(queue.to_string());
    }

    pub(crate) fn push(&self, delivery: Delivery) {
        if let Some(tx) = self.sender.lock().unwrap().as_ref() {
            let _ = tx.send(delivery);
        }
    }

    pub(crate) fn close_watchers(&self) -> usize {
        self.close_listeners.lock().unwrap().len()
    }

    pub(crate) fn return_watchers(&self) -> usize {
        self.return_listeners.lock().unwrap().len()
    }

    pub(crate) fn return_message(&self, msg: ReturnedMessage) {
        for tx in self.return_listeners.lock().unwrap().iter() {
            let _ = tx.send(msg.clone());
        }
    }

    /// Same as [`MockChannel::close`] without an error: close listeners are
    /// dropped instead of notified.
    pub(crate) fn close_cleanly(&self) {
        self.sender.lock().unwrap().take();
        self.return_listeners.lock().unwrap().clear();
        self.close_listeners.lock().unwrap().clear();
    }

    /// Ends every subscription stream once buffered deliveries are drained and
    /// fires the close notification.
    pub(crate) fn close(&self) {
        self.sender.lock().unwrap().take();
        self.return_listeners.lock().unwrap().clear();
        for tx in self.close_listeners.lock().unwrap().drain(..) {
            let _ = tx.send(io_error("channel closed by test"));
        }
    }
}

#[async_trait]
impl Subscriber for MockChannel {
    async fn subscribe(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream, lapin::Error> {
        if self.failing_queues.lock().unwrap().contains(queue) {
            return Err(io_error("NOT_FOUND - no queue"));
        }
        self.subscriptions
            .lock()
            .unwrap()
            .push((queue.to_string(), consumer_tag.to_string()));

        let receiver = self.receiver.clone();
        let stream = futures_util::stream::unfold(receiver, |receiver| async move {
            let next = receiver.lock().await.recv().await;
            next.map(|delivery| (Ok::<_, lapin::Error>(delivery), receiver))
        });
        Ok(stream.boxed())
    }
}

#[async_trait]
impl PublishTransport for MockChannel {
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        options: BasicPublishOptions,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<(), lapin::Error> {
        if self.publish_fails {
            return Err(io_error("connection reset"));
        }
        self.published.lock().unwrap().push(Published {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            options,
            payload: payload.to_vec(),
            properties,
        });
        Ok(())
    }
}

impl BrokerChannel for MockChannel {
    fn notify_close(&self) -> BoxFuture<'static, Option<lapin::Error>> {
        let (tx, rx) = oneshot::channel();
        self.close_listeners.lock().unwrap().push(tx);
        rx.map(|res| res.ok()).boxed()
    }

    fn notify_return(&self) -> BoxStream<'static, ReturnedMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.return_listeners.lock().unwrap().push(tx);
        futures_util::stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|msg| (msg, rx)) }).boxed()
    }
}
