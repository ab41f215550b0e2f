//! HTTP layer for the Roster registration demo.
//!
//! Adapts inbound registration requests to the roster's [`UserStore`] and
//! maps outcomes to the wire contract, alongside the simulated content
//! loader and operational endpoints.
//!
//! [`UserStore`]: roster_registry::UserStore

pub mod server;


pub use server::{start_server, AppState, DYNAMIC_CONTENT};
