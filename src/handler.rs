//! Defines the core trait for message handling logic.

use crate::delivery::Delivery;
use crate::error::HandlerError;
use async_trait::async_trait;
use futures_util::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Handlers keyed by consumer id.
pub type HandlerRegistry = HashMap<String, Arc<dyn DeliveryHandler>>;

/// Processes messages delivered from a RabbitMQ queue.
///
/// Returning `Ok(())` acknowledges the delivery. Returning an error, or
/// panicking, negatively acknowledges it without requeue.
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    async fn handle_delivery(&self, delivery: &Delivery) -> Result<(), HandlerError>;
}

/// Adapts a plain function or closure into a [`DeliveryHandler`].
pub struct HandlerFn<F>(F);

/// Wraps `f` as a handler.
pub fn handler_fn<F>(f: F) -> HandlerFn<F>
where
    F: Fn(&Delivery) -> Result<(), HandlerError> + Send + Sync,
{
    HandlerFn(f)
}

#[async_trait]
impl<F> DeliveryHandler for HandlerFn<F>
where
    F: Fn(&Delivery) -> Result<(), HandlerError> + Send + Sync,
{
    async fn handle_delivery(&self, delivery: &Delivery) -> Result<(), HandlerError> {
        (self.0)(delivery)
    }
}

/// Runs `handler` on `delivery`, turning a panic into [`HandlerError::Panic`].
///
/// This is the only place panics are caught; a panicking handler never takes
/// its worker down with it.
pub async fn invoke(handler: &dyn DeliveryHandler, delivery: &Delivery) -> Result<(), HandlerError> {
    let call = async { handler.handle_delivery(delivery).await };
    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(HandlerError::Panic(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
