use async_trait::async_trait;
use lapin::{types::FieldTable, ConnectionProperties};
use rabbitmq_workers::{
    handler_fn, AmqpDialer, BrokerClientConfig, BrokerConnectionConfig, Connector, ConsumerConfig, Delivery, DeliveryHandler,
    HandlerError, HandlerRegistry, Publisher,
};
use serde::Deserialize;
use std::sync::Arc;

// 1. Define your message struct
#[derive(Deserialize, Debug, Clone)]
struct OrderCreated {
    id: u32,
    content: String,
}

// 2. Implement the `DeliveryHandler` trait for your logic
struct OrderHandler;

#[async_trait]
impl DeliveryHandler for OrderHandler {
    async fn handle_delivery(&self, delivery: &Delivery) -> Result<(), HandlerError> {
        let order: OrderCreated =
            serde_json::from_slice(&delivery.data).map_err(|e| HandlerError::Other(Box::new(e)))?;

        log::info!("Received order with ID: {}. Content: '{}'", order.id, order.content);

        if order.id % 2 != 0 {
            return Err(HandlerError::from(format!("Failed to process order with odd ID: {}", order.id)));
        }
        if order.id == 42 {
            panic!("order 42 is cursed");
        }
        Ok(())
    }
}

fn config() -> BrokerClientConfig {
    // Prefer a `broker.json` under $OFCONFIGPATH (or the working directory).
    BrokerClientConfig::load("broker.json").unwrap_or_else(|e| {
        log::warn!("Falling back to the built-in config: {}", e);
        BrokerClientConfig {
            connection: BrokerConnectionConfig {
                user: "guest".to_string(),
                pass: "guest".to_string(),
                host: "localhost".to_string(),
                port: 5672,
                attempts: 5,
                error_log_enable: true,
                return_log_enable: true,
            },
            consumers: vec![
                ConsumerConfig {
                    id: "orders".to_string(),
                    queue: "orders".to_string(),
                    workers: 3,
                },
                ConsumerConfig {
                    id: "audit".to_string(),
                    queue: "audit".to_string(),
                    workers: 1,
                },
            ],
        }
    })
}

// 3. Connect, start the consumers and publish a message
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let connector = Connector::with_dialer(config(), AmqpDialer::new(ConnectionProperties::default()));
    let channel = connector.channel().await?;
    log::info!(
        "Channel {} open, {} queue(s) configured",
        channel.inner().id(),
        connector.config().consumers.len()
    );

    let mut handlers = HandlerRegistry::new();
    handlers.insert("orders".to_string(), Arc::new(OrderHandler));
    let audit: Arc<dyn DeliveryHandler> = Arc::new(handler_fn(|d: &Delivery| {
        log::info!("audit: {} byte(s) via '{}'", d.data.len(), d.routing_key);
        Ok(())
    }));
    handlers.insert("audit".to_string(), audit);

    let workers = connector.consume(&channel, &handlers).await?;
    log::info!("{} worker(s) running", workers.len());

    let publisher = Publisher::new(channel.clone(), "amq.direct");
    publisher
        .publish(br#"{"id": 2, "content": "hello"}"#, FieldTable::default(), "orders")
        .await?;

    tokio::signal::ctrl_c().await?;
    log::info!("Ctrl+C received. Shutting down.");
    for worker in &workers {
        worker.abort();
    }
    channel.connection().close(200, "shutdown").await?;

    Ok(())
}
