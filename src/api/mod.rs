//! HTTP trigger surface.
//!
//! - `GET /api/health`
//! - `POST /api/workflows/:name` with the workflow's trigger as the JSON body

mod routes;

pub use routes::{router, serve, status_for, AppState};
