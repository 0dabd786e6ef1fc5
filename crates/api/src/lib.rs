// API crate clippy configuration
// Test code patterns:
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! CoursePay API Library
//!
//! HTTP surface for coupon quotes, Stripe checkout and the checkout return.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;

pub use config::{Config, ConfigError, LogFormat};
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::{AppState, PgAppState};
