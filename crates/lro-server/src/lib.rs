//! lro-server - REST API over the analysis operation orchestrator
//!
//! - **routes**: `/health` and `/api/operations`
//! - **middleware**: bearer-token authentication
//! - **services**: background janitor
//! - **state**: shared state and tickets held for HTTP callers

pub mod config;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod services;
pub mod state;

pub use config::Config;
pub use routes::create_router;
pub use state::AppState;
