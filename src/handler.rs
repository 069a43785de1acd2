// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Handler

use crate::errors::EngineError;
use async_trait::async_trait;

/// Caller-supplied processing logic for delivered messages.
///
/// The engine invokes `handle` once per delivery with the raw payload and
/// waits for completion before fetching the next message. Returning an
/// error signals a processing failure: the engine then requeues the
/// message with an incremented counter or, once the retry ceiling is
/// reached, routes it to the error queue.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, body: &[u8]) -> Result<(), EngineError>;
}
