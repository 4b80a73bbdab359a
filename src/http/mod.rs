// HTTP module.
// Provides the request/response model and the transport the cache calls on a miss.

pub mod client;
pub mod types;

pub use client::{ReqwestTransport, Transport, TransportError};
pub use types::{Headers, HttpRequest, HttpResponse, RequestBody, RequestOptions};
