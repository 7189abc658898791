//! Closed-loop CPU thermal governor.
//!
//! Polls a temperature sensor, maps each reading onto a throttle level and
//! clamps the CPU frequency ceiling to match. See [`thermal`] for the control
//! loop, [`backend`] for the hardware it talks to and [`api`] for the runtime
//! control surface.

pub mod api;
pub mod api_client;
pub mod backend;
pub mod config;
pub mod error;
pub mod thermal;
pub mod tracing;
pub mod types;
