//! Repository connector: moves artifacts between a local filesystem and a
//! remote HTTP repository.
//!
//! [`RepositoryConnector`] runs batches of [`Download`]s and [`Upload`]s.
//! Every request is driven by a [`TransferController`] reacting to
//! [`Transport`] callbacks; downloads are then checked against sibling
//! checksum resources by the [`ChecksumVerifier`]. Lifecycle events go to
//! the listeners registered on the connector.

pub mod accumulator;
pub mod config;
mod connector;
pub mod controller;
pub mod error;
mod http;
pub mod transport;
pub mod verifier;

#[cfg(test)]
mod test_support;

pub use accumulator::ResponseAccumulator;
pub use config::ConnectorConfig;
pub use connector::{Download, RepositoryConnector, Upload};
pub use controller::{ControllerState, TransferController};
pub use error::{ConnectorError, TransportError};
pub use http::HttpTransport;
pub use transport::{
    Control, HttpRequest, RequestBody, ResponseHandler, Transport, TransportFuture,
};
pub use verifier::ChecksumVerifier;
