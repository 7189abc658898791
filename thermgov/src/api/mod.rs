//! HTTP API for inspecting and steering the governor.

pub mod commands;
mod server;
mod v0;

pub use server::{SharedState, router, serve};
