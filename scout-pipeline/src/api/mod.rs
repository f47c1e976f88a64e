//! HTTP step service
//!
//! Exposes each step as one POST route taking and returning the same
//! envelopes the in-process invoker uses.

pub mod health;
pub mod steps;

pub use health::health_routes;
pub use steps::step_routes;
