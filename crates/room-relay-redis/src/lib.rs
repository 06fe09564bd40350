//! Redis adapter for room-relay
//!
//! This crate provides `RedisBackbone`: cross-instance fan-out of room
//! broadcasts over Redis Pub/Sub.

mod backbone;

pub use backbone::{RedisBackbone, RedisBackboneOptions};
