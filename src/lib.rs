//! Gemini Bridge — serve a synchronous generateContent API off a single,
//! intermittently-connected browser worker.
//!
//! The core is the request–response correlation broker in [`broker`]; the
//! [`server`] module is a thin axum adapter layer over it.

pub mod broker;
pub mod clock;
pub mod config;
pub mod error;
pub mod protocol;
pub mod server;
