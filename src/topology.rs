// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queue Topology
//!
//! This module defines the set of queues an engine declares and works
//! with: the primary queue it consumes from, an optional error queue that
//! receives messages whose retries are exhausted, and an optional
//! dead-letter queue. All queues are declared durable and declarations
//! are idempotent, so several engine instances can safely declare the
//! same topology.

use serde::{Deserialize, Serialize};

/// Definition of the queues owned by one consumer engine.
///
/// This struct implements the builder pattern. The error and dead-letter
/// queue names are derived from the primary queue name by default and can
/// be overridden explicitly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueTopology {
    pub(crate) queue: String,
    pub(crate) error_queue: Option<String>,
    pub(crate) dead_letter_queue: Option<String>,
}

impl QueueTopology {
    /// Creates a new topology around the given primary queue.
    ///
    /// # Parameters
    /// * `queue` - Name of the queue the engine consumes from
    ///
    /// # Returns
    /// A topology with no error or dead-letter queue configured
    pub fn new(queue: &str) -> QueueTopology {
        QueueTopology {
            queue: queue.to_owned(),
            error_queue: None,
            dead_letter_queue: None,
        }
    }

    /// Adds an error queue to the topology.
    ///
    /// Messages whose retries are exhausted are published here. The name
    /// will be the primary queue name with an `-error` suffix.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn with_error_queue(mut self) -> Self {
        self.error_queue = Some(format!("{}-error", self.queue));
        self
    }

    /// Adds an error queue with an explicit name.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn error_queue_named(mut self, name: &str) -> Self {
        self.error_queue = Some(name.to_owned());
        self
    }

    /// Adds a dead-letter queue to the topology.
    ///
    /// The name will be the primary queue name with a `-dlq` suffix. The
    /// dead-letter queue also serves as the retry-exhausted destination
    /// when no error queue is configured.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn with_dlq(mut self) -> Self {
        self.dead_letter_queue = Some(format!("{}-dlq", self.queue));
        self
    }

    /// Adds a dead-letter queue with an explicit name.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn dlq_named(mut self, name: &str) -> Self {
        self.dead_letter_queue = Some(name.to_owned());
        self
    }

    /// The name of the primary queue.
    pub fn queue_name(&self) -> &str {
        &self.queue
    }

    /// The configured error queue, if any.
    pub fn error_queue(&self) -> Option<&str> {
        self.error_queue.as_deref()
    }

    /// The configured dead-letter queue, if any.
    pub fn dead_letter_queue(&self) -> Option<&str> {
        self.dead_letter_queue.as_deref()
    }

    /// Resolves the destination for messages whose retries are exhausted.
    ///
    /// The error queue takes precedence; the dead-letter queue is the
    /// fallback. `None` means such messages are dropped with a warning.
    pub fn terminal_queue(&self) -> Option<&str> {
        self.error_queue().or_else(|| self.dead_letter_queue())
    }
}
