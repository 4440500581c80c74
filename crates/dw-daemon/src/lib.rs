//! dw-daemon library surface.
//!
//! `main.rs` stays thin; everything testable lives here so the scenario
//! tests can compose the router and the loops directly.

pub mod api_types;
pub mod loops;
pub mod routes;
pub mod state;
