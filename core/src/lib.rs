//! Client-side HTTP request lifecycle manager.
//!
//! # Overview
//! [`Client::dispatch`] turns a declarative [`RequestOptions`] into a live
//! HTTP or HTTPS request and calls back exactly once with a [`Completion`]:
//! the buffered (optionally JSON-decoded) response, the raw body stream, or
//! a [`Failure`]. [`Client::request`] is the same thing as a future.
//!
//! # Design
//! - Validation is synchronous; everything after it runs in one tokio task
//!   per request that races the response against the transport error path,
//!   an overall deadline, an idle timer and caller aborts.
//! - The outcome crosses a single-use gate, so late events (a second abort,
//!   a timer after the response) are logged no-ops.
//! - Request bodies are an explicit [`RequestBody`] enum classified once at
//!   dispatch: verbatim text or bytes, a piped stream, or serialized JSON.
//! - The transport is `reqwest` with redirects disabled; a caller-supplied
//!   [`Agent`] is used as is.
//! - [`concat`] is the byte/object aggregator the response path buffers
//!   through, exposed for reuse.

pub mod body;
pub mod concat;
mod deferred;
pub mod delivery;
pub mod error;
pub mod lifecycle;
pub mod options;
pub mod response;
mod target;
mod timer;
mod transport;

pub use body::{BodyStream, RequestBody};
pub use delivery::RequestHandle;
pub use error::{Error, Failure, TimeoutKind, TransportErrorKind};
pub use lifecycle::Client;
pub use options::{Agent, RequestOptions, TlsOptions};
pub use response::{Completion, Reply, ResponseBody, ResponseMetadata, ResponseStream};
