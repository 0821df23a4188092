//! Application Services
//!
//! - `Connection`: facade that selects a transport, cascades to the next
//!   candidate on failure and owns the session credentials
//! - `TransportRegistry`: maps transport names to their builders

mod connection;
mod registry;

pub use connection::{
    Connection, ConnectionOptions, FacadeState, QueryParams, TotalFailureCallback,
};
pub use registry::{TransportCandidate, TransportRegistry};
