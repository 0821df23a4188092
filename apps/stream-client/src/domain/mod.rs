//! Domain Layer - Canonical connection types.
//!
//! Types shared by every transport: connection states, the canonical
//! message envelope, session context and transport names. Nothing here
//! touches the network.

/// Connection states, envelopes, session context and transport kinds.
pub mod connection;
