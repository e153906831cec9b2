//! HTTP server layer for pictor.
//!
//! Exposes the image engine over HTTP.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         HTTP Layer                              │
//! │      GET /image?uri=...&width=&height=   GET /cache/stats       │
//! │                                                                 │
//! │  ┌──────────────────────────┐  ┌─────────────────────────────┐  │
//! │  │        handlers          │  │          routes             │  │
//! │  │ (query → ImageRequest)   │  │  (CORS, tracing, state)     │  │
//! │  └──────────────────────────┘  └─────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                          ImageEngine
//! ```

pub mod handlers;
pub mod routes;

pub use handlers::{
    cache_stats_handler, health_handler, image_handler, status_for, AppState, ErrorResponse,
    HealthResponse, ImageQueryParams, DEFAULT_ALLOWED_SCHEMES, MAX_DIMENSION,
};
pub use routes::{create_router, RouterConfig};
