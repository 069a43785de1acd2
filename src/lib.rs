// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

pub mod endpoint;
pub mod engine;
pub mod errors;
pub mod handler;
pub mod retry;
pub mod topology;
pub mod transport;
