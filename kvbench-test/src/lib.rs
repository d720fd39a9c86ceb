//! Test utilities for kvbench and its client.
//!
//! This crate provides utilities to facilitate testing of the benchmark harness and the store
//! bindings without a real key-value store. See the modules for all available utilities.

pub mod gateway;
pub mod grpc;
pub mod memory;
pub mod tracing;
