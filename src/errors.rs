// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the Consumption Engine
//!
//! This module provides the error type used across the engine. The
//! `EngineError` enum separates connectivity failures from processing
//! failures so that callers and the engine itself can apply the right
//! recovery policy to each: connect failures are retried with a bound,
//! runtime transport failures are propagated, handler failures are
//! recovered via requeue or dead-letter routing, and configuration
//! mistakes are reported as such instead of being string-matched.

use thiserror::Error;

/// Represents errors raised by the queue-consumption engine.
///
/// Each variant identifies which recovery policy applies, rather than
/// which low-level operation failed. The payload carries the underlying
/// error rendered as text for logging.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Failure to establish a connection, channel or topology while
    /// connecting. Retried locally by `connect()` up to the policy limit.
    #[error("failure to connect to the broker: {0}")]
    TransportConnect(String),

    /// Transport failure while a consumer is active (socket drop, channel
    /// close). Never retried internally; propagated by `consume()`.
    #[error("transport failure during consumption: {0}")]
    TransportRuntime(String),

    /// Failure reported by the caller-supplied message handler. Recovered
    /// inside the engine via requeue or dead-letter routing.
    #[error("handler failure: {0}")]
    Handler(String),

    /// The engine was used or configured in an unsupported way, such as
    /// consuming before a successful connect.
    #[error("configuration error: {0}")]
    Configuration(String),
}
