pub mod client;
pub mod engine;
pub mod error;
pub mod outbound;

pub use client::{
    HttpMethod, OutboundRequest, UpstreamBody, UpstreamClient, UpstreamResponse,
    WreqUpstreamClient,
};
pub use engine::{RelayEngine, RelayResponse};
pub use error::{TransportErrorKind, UpstreamFailure};
