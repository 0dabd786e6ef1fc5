//! API routes

pub mod enrol;

use axum::{
    routing::{get, post},
    Router,
};
use coursepay_billing::{checkout::RETURN_PATH, EnrolmentStore, Notifier, PaymentProvider};

use crate::state::AppState;

/// Create the main router
pub fn create_router<S, P, N>(state: AppState<S, P, N>) -> Router
where
    S: EnrolmentStore + 'static,
    P: PaymentProvider + 'static,
    N: Notifier + 'static,
{
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/coupons/apply", post(enrol::apply_coupon::<S, P, N>))
        .route("/api/v1/checkout", post(enrol::start_checkout::<S, P, N>))
        .route(RETURN_PATH, get(enrol::complete_checkout::<S, P, N>))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}
