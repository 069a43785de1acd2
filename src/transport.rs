// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Broker Transport
//!
//! This module defines the narrow seam between the engine and the AMQP
//! client library, plus the lapin-backed production implementation. The
//! engine only ever needs five channel operations: declaring a durable
//! queue, opening a manual-ack consumer, acknowledging a delivery,
//! publishing a persistent message to the default exchange, and closing.
//! Keeping the seam this small lets the engine's reliability semantics be
//! exercised against a mocked transport.

use crate::{
    endpoint::BrokerEndpoint,
    errors::EngineError,
    retry::requeue_headers,
};
use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use lapin::{
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
        QueueDeclareOptions,
    },
    types::{FieldTable, ShortString},
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use std::{pin::Pin, sync::Arc};
use tracing::{debug, error};
use uuid::Uuid;

/// A message delivered by the broker, before the engine takes ownership
/// of it as an in-flight message.
#[derive(Debug, Clone)]
pub struct InboundDelivery {
    pub delivery_tag: u64,
    pub body: Vec<u8>,
    pub headers: Option<FieldTable>,
}

/// Stream of deliveries produced by an active consumer.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Result<InboundDelivery, EngineError>> + Send>>;

/// Connection factory for a broker.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establishes a connection and opens a channel on it.
    async fn connect(&self, endpoint: &BrokerEndpoint)
        -> Result<Arc<dyn TransportChannel>, EngineError>;
}

/// Operations available on an open channel.
///
/// A channel is exclusively owned by one engine instance; the engine
/// serializes all calls, so implementations never see concurrent use.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TransportChannel: Send + Sync {
    /// Declares a queue. Declarations are idempotent on the broker side.
    async fn declare_queue(&self, name: &str, durable: bool) -> Result<(), EngineError>;

    /// Starts a manual-acknowledgement consumer on the given queue.
    async fn consume(&self, queue: &str, consumer_tag: &str)
        -> Result<DeliveryStream, EngineError>;

    /// Acknowledges a single delivery.
    async fn ack(&self, delivery_tag: u64) -> Result<(), EngineError>;

    /// Publishes a persistent message to the default exchange, carrying
    /// the given requeue count in its headers.
    async fn publish(
        &self,
        routing_key: &str,
        body: &[u8],
        requeue_count: i64,
    ) -> Result<(), EngineError>;

    /// Closes the channel and its connection.
    async fn close(&self) -> Result<(), EngineError>;
}

/// Lapin-backed transport for RabbitMQ.
#[derive(Debug, Default)]
pub struct AmqpTransport;

impl AmqpTransport {
    pub fn new() -> AmqpTransport {
        AmqpTransport {}
    }
}

#[async_trait]
impl Transport for AmqpTransport {
    /// Connects to the broker and creates a channel with a prefetch of
    /// one, so the broker cooperates with the engine's one-in-flight
    /// processing model.
    async fn connect(
        &self,
        endpoint: &BrokerEndpoint,
    ) -> Result<Arc<dyn TransportChannel>, EngineError> {
        debug!("creating amqp connection...");

        let connection = match Connection::connect(
            &endpoint.amqp_uri(),
            ConnectionProperties::default(),
        )
        .await
        {
            Ok(c) => Ok(c),
            Err(err) => {
                error!(error = err.to_string(), "failure to connect");
                Err(EngineError::TransportConnect(err.to_string()))
            }
        }?;
        debug!("amqp connected");

        debug!("creating amqp channel...");
        let channel = match connection.create_channel().await {
            Ok(c) => Ok(c),
            Err(err) => {
                error!(error = err.to_string(), "error to create the channel");
                Err(EngineError::TransportConnect(err.to_string()))
            }
        }?;

        if let Err(err) = channel.basic_qos(1, BasicQosOptions::default()).await {
            error!(error = err.to_string(), "error to configure qos");
            return Err(EngineError::TransportConnect(err.to_string()));
        }
        debug!("channel created");

        Ok(Arc::new(AmqpChannel { connection, channel }))
    }
}

/// An open lapin channel together with the connection that owns it.
struct AmqpChannel {
    connection: Connection,
    channel: Channel,
}

#[async_trait]
impl TransportChannel for AmqpChannel {
    async fn declare_queue(&self, name: &str, durable: bool) -> Result<(), EngineError> {
        debug!("creating queue: {}", name);

        match self
            .channel
            .queue_declare(
                name,
                QueueDeclareOptions {
                    durable,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), name, "error to declare the queue");
                Err(EngineError::TransportConnect(err.to_string()))
            }
            _ => {
                debug!("queue: {} was created", name);
                Ok(())
            }
        }
    }

    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
    ) -> Result<DeliveryStream, EngineError> {
        let consumer = match self
            .channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions {
                    no_local: false,
                    no_ack: false,
                    exclusive: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to create the consumer");
                Err(EngineError::TransportRuntime(err.to_string()))
            }
            Ok(c) => Ok(c),
        }?;

        let stream = consumer.map(|result| match result {
            Ok(delivery) => Ok(InboundDelivery {
                delivery_tag: delivery.delivery_tag,
                headers: delivery.properties.headers().clone(),
                body: delivery.data,
            }),
            Err(err) => Err(EngineError::TransportRuntime(err.to_string())),
        });

        Ok(Box::pin(stream))
    }

    async fn ack(&self, delivery_tag: u64) -> Result<(), EngineError> {
        match self
            .channel
            .basic_ack(delivery_tag, BasicAckOptions { multiple: false })
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error whiling ack msg");
                Err(EngineError::TransportRuntime(err.to_string()))
            }
            _ => Ok(()),
        }
    }

    async fn publish(
        &self,
        routing_key: &str,
        body: &[u8],
        requeue_count: i64,
    ) -> Result<(), EngineError> {
        match self
            .channel
            .basic_publish(
                "",
                routing_key,
                BasicPublishOptions {
                    immediate: false,
                    mandatory: false,
                },
                body,
                BasicProperties::default()
                    // delivery_mode 2 marks the message persistent
                    .with_delivery_mode(2)
                    .with_message_id(ShortString::from(Uuid::new_v4().to_string()))
                    .with_headers(requeue_headers(requeue_count)),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error publishing message");
                Err(EngineError::TransportRuntime(err.to_string()))
            }
            _ => Ok(()),
        }
    }

    async fn close(&self) -> Result<(), EngineError> {
        match self.connection.close(200, "shutdown").await {
            Err(err) => {
                error!(error = err.to_string(), "error to close the connection");
                Err(EngineError::TransportRuntime(err.to_string()))
            }
            _ => Ok(()),
        }
    }
}
