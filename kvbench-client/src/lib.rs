//! # kvbench Client
//!
//! The client is the benchmark's only view of the key-value store. It reduces the store to the
//! three capabilities a load run needs (put, get and watch) behind the [`StoreClient`] trait,
//! plus the [`Authenticator`] for stores that require a token.
//!
//! Two interchangeable bindings implement these traits:
//!
//! - [`HttpStore`] talks to the store's HTTP+JSON gateway, transmitting keys and values as base64
//!   strings.
//! - [`GrpcStore`] talks to the store's gRPC API, transmitting keys and values as raw bytes.
//!
//! No call is ever retried. Put, get and authenticate are bounded by the request timeout of
//! [`ClientOptions`].
//!
//! ## Usage
//!
//! ```no_run
//! use kvbench_client::{ClientOptions, Connect, HttpStore, StoreClient};
//!
//! # async fn example() -> kvbench_client::Result<()> {
//! let store = HttpStore::connect(&ClientOptions::new("http://localhost:2379")).await?;
//! let revision = store.put(b"foo", b"bar").await?;
//! println!("stored at revision {revision}");
//! # Ok(())
//! # }
//! ```
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

mod auth;
mod client;
mod error;
mod grpc;
mod http;
pub mod proto;
mod watch;

pub use auth::*;
pub use client::{
    Authenticator, ClientOptions, Connect, DEFAULT_CONNECT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT,
    Revision, StoreClient,
};
pub use error::*;
pub use grpc::{GrpcStore, TOKEN_METADATA_KEY};
pub use http::HttpStore;
pub use watch::*;
