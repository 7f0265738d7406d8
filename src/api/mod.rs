//! REST API module
//!
//! This module provides the HTTP server and the operational endpoints:
//! - API routing and request handling
//! - Trace-id propagation middleware
//! - Request/response models

pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod server;

pub use handlers::AppState;
pub use middleware::{trace_id_middleware, TraceId, TRACE_ID_HEADER};
pub use server::ApiServer;
