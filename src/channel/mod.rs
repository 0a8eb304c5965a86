//! Requester side of the coordinator channel
//!
//! - `ChannelGuard`: synchronous liveness probe
//! - `ResilientRequester`: per-attempt timeout and bounded retry
//! - `PortTransport`: correlation-id bookkeeping over a host port

mod error;
mod guard;
mod port;
mod requester;

pub use error::{ChannelError, TransportError};
pub use guard::ChannelGuard;
pub use port::PortTransport;
pub use requester::{RequestPolicy, ResilientRequester, Transport};
