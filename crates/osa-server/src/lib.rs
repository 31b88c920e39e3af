//! Server assembly: handler wiring, shared HTTP state and routes.
//!
//! `main.rs` is intentionally thin — it loads configuration, connects the
//! pool, builds the wiring from this crate and starts the HTTP surface.

pub mod routes;
pub mod state;
pub mod wiring;
