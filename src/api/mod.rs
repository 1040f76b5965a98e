//! API Module
//!
//! HTTP handlers and routing for the cache server REST API.
//!
//! # Endpoints
//! - `PUT /rows` - Store a row
//! - `POST /rows/lookup` - Read a cached row
//! - `DELETE /rows` - Delete a row
//! - `GET /stats` - Cache and pipeline counters
//! - `GET /health` - Health check endpoint

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
