// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Retry Policy and Requeue Headers
//!
//! The engine tracks how many times a logical message has been redelivered
//! through a counter carried in the message headers. This module owns the
//! header name, the tolerant extraction of the counter from inbound
//! properties, and the construction of outbound headers for a
//! republication.

use lapin::types::{AMQPValue, FieldTable, ShortString};
use serde::{Deserialize, Serialize};

/// Header carrying the number of times a message has been requeued.
pub const AMQP_HEADERS_REQUEUE_COUNT: &str = "x-requeue-count";

/// Bound on how many times a failing message is requeued before being
/// routed to the error queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
}

impl RetryPolicy {
    /// Creates a policy with the given retry ceiling.
    pub fn new(max_retries: u32) -> RetryPolicy {
        RetryPolicy { max_retries }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy { max_retries: 3 }
    }
}

/// Extracts the requeue count from message headers.
///
/// Publishers on other stacks may encode the counter with different AMQP
/// integer widths, so all of them are accepted. A missing header or an
/// unexpected value type means the message has never been requeued.
///
/// # Parameters
/// * `headers` - Headers of the inbound delivery, if any
///
/// # Returns
/// The requeue count, defaulting to 0
pub fn requeue_count(headers: Option<&FieldTable>) -> i64 {
    match headers.and_then(|table| table.inner().get(AMQP_HEADERS_REQUEUE_COUNT)) {
        Some(AMQPValue::LongLongInt(count)) => *count,
        Some(AMQPValue::LongInt(count)) => *count as i64,
        Some(AMQPValue::ShortInt(count)) => *count as i64,
        Some(AMQPValue::LongUInt(count)) => *count as i64,
        _ => 0,
    }
}

/// Builds the headers for a message republished by the engine.
pub fn requeue_headers(count: i64) -> FieldTable {
    let mut headers = FieldTable::default();
    headers.insert(
        ShortString::from(AMQP_HEADERS_REQUEUE_COUNT),
        AMQPValue::LongLongInt(count),
    );
    headers
}
