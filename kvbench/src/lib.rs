//! A benchmark harness for the write and watch paths of a key-value store.
//!
//! A run spawns a fixed number of writer tasks, each issuing a fixed number of sequential puts
//! of the same key. Optionally, a watch consumer subscribes to that key before the writers start
//! and drains change events until it has observed every put. The harness reports the wall-clock
//! time of this concurrent region.
//!
//! The store is reached through a [`StoreClient`](kvbench_client::StoreClient). The transport is
//! chosen at build time: the `kvbench-http` binary talks to the HTTP+JSON gateway, while
//! `kvbench-grpc` uses the native gRPC API. Both share [`cli::execute`].
//!
//! Any failure, whether connecting, authenticating, subscribing or a single put, aborts the run.
//! Nothing is retried.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod cli;
pub mod config;
pub mod connect;
pub mod harness;
pub mod observability;
pub mod report;
pub mod workload;

pub use crate::harness::{RunReport, run};
