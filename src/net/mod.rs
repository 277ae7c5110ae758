//! Network plumbing: request/response values, the transport seam, and the
//! single-flight request lifecycle used by UI-level callers.

pub mod error;
pub mod lifecycle;
pub mod transport;
pub mod types;

pub use error::{CancelReason, FetchError};
pub use lifecycle::RequestLifecycle;
pub use transport::{HttpTransport, Transport};
pub use types::{Destination, Method, Request, Response};
