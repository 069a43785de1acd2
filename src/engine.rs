// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queue Consumer Engine
//!
//! This module provides the engine that owns a broker connection, declares
//! the configured queues, consumes messages one at a time and applies the
//! failure policy: requeue with an incremented counter while retries
//! remain, route to the error queue once they are exhausted, or drop with
//! a warning when no error queue is configured.
//!
//! One engine instance owns one connection and one channel exclusively.
//! Several instances may consume the same queue as competing consumers;
//! they share no in-process state.

use crate::{
    endpoint::BrokerEndpoint,
    errors::EngineError,
    handler::MessageHandler,
    retry::{self, RetryPolicy},
    topology::QueueTopology,
    transport::{InboundDelivery, Transport, TransportChannel},
};
use futures_util::StreamExt;
use std::sync::Arc;
use tokio::{
    sync::{watch, RwLock},
    time::{sleep, Duration},
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Pause between connection attempts.
pub const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Lifecycle state of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Consuming,
}

/// The delivery currently owned by the engine.
///
/// At most one of these exists per engine; it is settled with exactly one
/// terminal action (ack after success, ack after a republication, or ack
/// after a documented drop) before the next delivery is taken.
#[derive(Debug, Clone)]
pub struct InFlightMessage {
    pub body: Vec<u8>,
    pub delivery_tag: u64,
    pub requeue_count: i64,
}

impl InFlightMessage {
    fn new(delivery: InboundDelivery) -> InFlightMessage {
        let requeue_count = retry::requeue_count(delivery.headers.as_ref());
        InFlightMessage {
            body: delivery.body,
            delivery_tag: delivery.delivery_tag,
            requeue_count,
        }
    }
}

/// A resilient consumer of one primary queue.
///
/// The engine is driven by the caller: `connect()` establishes the
/// connection and declares the topology with bounded retry, `consume()`
/// blocks and dispatches deliveries to the handler, `disconnect()` shuts
/// down and may be called from another task to stop an active loop.
/// Delivery is at-least-once: a message interrupted between handling and
/// acknowledgement is redelivered by the broker.
pub struct QueueConsumerEngine {
    transport: Arc<dyn Transport>,
    endpoint: BrokerEndpoint,
    topology: QueueTopology,
    policy: RetryPolicy,
    handler: Arc<dyn MessageHandler>,
    consumption_limit: i64,
    state: RwLock<ConnectionState>,
    channel: RwLock<Option<Arc<dyn TransportChannel>>>,
    stop: watch::Sender<bool>,
}

impl QueueConsumerEngine {
    /// Creates a new engine.
    ///
    /// # Parameters
    /// * `transport` - Broker transport, `AmqpTransport` in production
    /// * `endpoint` - Broker coordinates
    /// * `topology` - Queues to declare and consume from
    /// * `policy` - Retry ceiling for connects and message requeues
    /// * `handler` - Caller-supplied processing logic
    /// * `consumption_limit` - Messages to process before `consume()`
    ///   returns; negative means unbounded
    pub fn new(
        transport: Arc<dyn Transport>,
        endpoint: BrokerEndpoint,
        topology: QueueTopology,
        policy: RetryPolicy,
        handler: Arc<dyn MessageHandler>,
        consumption_limit: i64,
    ) -> QueueConsumerEngine {
        let (stop, _) = watch::channel(false);

        QueueConsumerEngine {
            transport,
            endpoint,
            topology,
            policy,
            handler,
            consumption_limit,
            state: RwLock::new(ConnectionState::Disconnected),
            channel: RwLock::new(None),
            stop,
        }
    }

    /// Establishes the connection and declares the configured queues.
    ///
    /// Transport-level failures are retried up to `max_retries` times with
    /// a pause of [`CONNECT_RETRY_DELAY`] between attempts, tearing down
    /// any partially opened connection first. Any other failure gives up
    /// immediately.
    ///
    /// # Returns
    /// true when connected, false when all attempts failed
    pub async fn connect(&self) -> bool {
        if self.is_connected().await {
            return true;
        }

        *self.state.write().await = ConnectionState::Connecting;

        let mut attempt: u32 = 0;
        loop {
            match self.try_connect().await {
                Ok(channel) => {
                    *self.channel.write().await = Some(channel);
                    let _ = self.stop.send_replace(false);
                    *self.state.write().await = ConnectionState::Connected;
                    info!(queue = self.topology.queue_name(), "broker connected");
                    return true;
                }
                Err(EngineError::TransportConnect(reason)) => {
                    attempt += 1;
                    if attempt > self.policy.max_retries {
                        error!(
                            error = reason,
                            attempts = attempt,
                            "failure to connect, retries exhausted"
                        );
                        *self.state.write().await = ConnectionState::Disconnected;
                        return false;
                    }

                    warn!(error = reason, attempt, "failure to connect, retrying");
                    sleep(CONNECT_RETRY_DELAY).await;
                }
                Err(err) => {
                    error!(
                        error = err.to_string(),
                        "unexpected failure while connecting"
                    );
                    *self.state.write().await = ConnectionState::Disconnected;
                    return false;
                }
            }
        }
    }

    async fn try_connect(&self) -> Result<Arc<dyn TransportChannel>, EngineError> {
        let channel = self.transport.connect(&self.endpoint).await?;

        if let Err(err) = self.declare_topology(channel.as_ref()).await {
            // Tear the partial connection down before reporting.
            if let Err(close_err) = channel.close().await {
                warn!(
                    error = close_err.to_string(),
                    "failure while tearing down a partial connection"
                );
            }
            return Err(err);
        }

        Ok(channel)
    }

    /// Declares the primary queue and, when configured, the error and
    /// dead-letter queues. All durable; declarations are idempotent.
    async fn declare_topology(&self, channel: &dyn TransportChannel) -> Result<(), EngineError> {
        channel.declare_queue(self.topology.queue_name(), true).await?;

        if let Some(name) = self.topology.error_queue() {
            channel.declare_queue(name, true).await?;
        }

        if let Some(name) = self.topology.dead_letter_queue() {
            channel.declare_queue(name, true).await?;
        }

        Ok(())
    }

    /// Consumes from the primary queue until the consumption limit is
    /// reached, `disconnect()` is called, or the transport fails.
    ///
    /// Deliveries are processed strictly one at a time; the in-flight
    /// message is settled before the next one is taken. Handler failures
    /// are recovered internally and never surface here. A transport
    /// failure disconnects the engine and is returned to the caller, who
    /// decides whether to reconnect and resume.
    pub async fn consume(&self) -> Result<(), EngineError> {
        if *self.state.read().await != ConnectionState::Connected {
            return Err(EngineError::Configuration(
                "consume requires a successful connect".to_owned(),
            ));
        }

        let Some(channel) = self.channel.read().await.clone() else {
            return Err(EngineError::Configuration(
                "consume requires a successful connect".to_owned(),
            ));
        };

        let consumer_tag = format!("{}-{}", self.topology.queue_name(), Uuid::new_v4());
        let mut deliveries = match channel
            .consume(self.topology.queue_name(), &consumer_tag)
            .await
        {
            Ok(stream) => stream,
            Err(err) => {
                error!(error = err.to_string(), "error to create the consumer");
                self.disconnect().await;
                return Err(err);
            }
        };

        *self.state.write().await = ConnectionState::Consuming;
        info!(
            queue = self.topology.queue_name(),
            consumer_tag, "consuming"
        );

        let mut stop = self.stop.subscribe();
        let mut remaining = self.consumption_limit;

        let result = loop {
            if remaining == 0 {
                break Ok(());
            }

            tokio::select! {
                _ = stop.changed() => break Ok(()),
                next = deliveries.next() => match next {
                    Some(Ok(delivery)) => {
                        if let Err(err) = self.dispatch(channel.as_ref(), delivery).await {
                            break Err(err);
                        }
                        if remaining > 0 {
                            remaining -= 1;
                        }
                    }
                    Some(Err(err)) => break Err(err),
                    None => {
                        break Err(EngineError::TransportRuntime(
                            "delivery stream closed by the broker".to_owned(),
                        ))
                    }
                },
            }
        };

        match result {
            Ok(()) => {
                let mut state = self.state.write().await;
                if *state == ConnectionState::Consuming {
                    *state = ConnectionState::Connected;
                }
                Ok(())
            }
            Err(err) => {
                error!(error = err.to_string(), "fatal failure while consuming");
                self.disconnect().await;
                Err(err)
            }
        }
    }

    /// Processes one delivery and settles it.
    async fn dispatch(
        &self,
        channel: &dyn TransportChannel,
        delivery: InboundDelivery,
    ) -> Result<(), EngineError> {
        let message = InFlightMessage::new(delivery);

        match self.handler.handle(&message.body).await {
            Ok(()) => {
                debug!(
                    delivery_tag = message.delivery_tag,
                    "message successfully processed"
                );
            }
            Err(err) => {
                if message.requeue_count < self.policy.max_retries as i64 {
                    // Republish to the primary queue with the counter bumped
                    warn!(
                        error = err.to_string(),
                        requeue_count = message.requeue_count,
                        "error whiling handling msg, requeuing for latter"
                    );
                    channel
                        .publish(
                            self.topology.queue_name(),
                            &message.body,
                            message.requeue_count + 1,
                        )
                        .await?;
                } else if let Some(terminal) = self.topology.terminal_queue() {
                    error!(
                        error = err.to_string(),
                        "too many attempts, sending to the error queue"
                    );
                    channel.publish(terminal, &message.body, 0).await?;
                } else {
                    // Documented failure mode: without an error queue the
                    // message is lost after its final attempt.
                    warn!(
                        error = err.to_string(),
                        queue = self.topology.queue_name(),
                        requeue_count = message.requeue_count,
                        "retries exhausted and no error queue configured, dropping message"
                    );
                }
            }
        }

        // The original delivery is settled exactly once; a republished
        // copy is a new message.
        channel.ack(message.delivery_tag).await
    }

    /// Shuts the engine down.
    ///
    /// Stops an active consume loop after its in-flight message settles,
    /// closes the connection if one is open, and resets the state.
    /// Idempotent: safe to call repeatedly or on a never-connected engine.
    ///
    /// # Returns
    /// true when shutdown was clean, false when closing the connection
    /// reported an error
    pub async fn disconnect(&self) -> bool {
        let _ = self.stop.send_replace(true);

        let channel = self.channel.write().await.take();
        let mut closed = true;
        if let Some(channel) = channel {
            if let Err(err) = channel.close().await {
                warn!(
                    error = err.to_string(),
                    "failure while closing the connection"
                );
                closed = false;
            }
        }

        *self.state.write().await = ConnectionState::Disconnected;
        debug!("broker disconnected");
        closed
    }

    /// Whether the engine currently holds a usable connection.
    pub async fn is_connected(&self) -> bool {
        matches!(
            *self.state.read().await,
            ConnectionState::Connected | ConnectionState::Consuming
        )
    }

    /// The current lifecycle state.
    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }
}
