//! Client for the fleet-management backend.
//!
//! Wraps the session login and the terminal setup endpoints and implements
//! [`tunnel_engine::Backend`] on top of them.

pub mod client;
pub mod error;

pub use client::{Client, SystemInfo};
pub use error::{ApiError, ApiResult};
