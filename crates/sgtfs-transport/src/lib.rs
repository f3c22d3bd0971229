#![warn(missing_docs)]

//! sgtfs transport subsystem: remote cluster clients, contact-node routing, HTTP+JSON binding
//!
//! [`TransportRouter::get_client`] turns a remote cluster name into a
//! [`RoutedClient`] bound to a live node, reporting every failed contact to
//! cluster membership so repeatedly failing nodes get blacklisted.

pub mod client;
pub mod error;
pub mod http;
pub mod router;
pub mod wire;

pub use client::{ClientFactory, RemoteClient};
pub use error::{Result, TransportError};
pub use http::{HttpClient, HttpClientFactory};
pub use router::{RoutedClient, TransportConfig, TransportRouter};
pub use wire::{WireError, WireErrorKind};
