//! HTTP server module
//!
//! This module handles HTTP request routing and handling:
//! - Axum router with the control surface
//! - Stream and overlay handlers
//! - Static serving of the segment output under `/live`
//! - CORS middleware

pub mod handlers;
pub mod overlays;
pub mod routes;
pub mod streams;

pub use routes::create_router;
