//! Connection acceptance and HTTP request-dispatch core for a streaming
//! media server.
//!
//! Owns the listen sockets, the accept loop, the non-blocking request
//! preamble state machine, the legacy password-first protocol adapter and
//! the dispatcher that routes a parsed request to one of the listener,
//! source, stats or admin collaborators. The worker pool that drives
//! per-client operations thereafter, the streaming format layer, the
//! config-file schema and per-mount source logic are external collaborators
//! this crate only defines interfaces for.

#![warn(rust_2018_idioms)]
#![warn(clippy::all)]
#![allow(clippy::type_complexity)]

pub mod accept;
pub mod auth;
pub mod client;
pub mod collaborators;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod io;
pub mod ip_access;
pub mod legacy;
pub mod listener;
pub mod preamble;
pub mod signals;
#[cfg(feature = "tls")]
pub mod tls;
pub mod worker;

pub use client::{Client, HandlerRole, OperationSet};
pub use collaborators::{Collaborators, HandoffOutcome};
pub use config::{CoreConfig, ListenerConfig, UriAlias};
pub use connection::Connection;
pub use error::{Error, Result};
pub use ip_access::IpAccessCache;
