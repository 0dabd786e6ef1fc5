//! Coupon, checkout and checkout-return routes

use axum::{
    extract::{Query, State},
    response::{Html, IntoResponse, Redirect, Response},
    Json,
};
use coursepay_billing::{
    coupon::normalize_coupon_id, notify::escape_html, CheckoutOutcome, ConfirmationOutcome,
    ConfirmationRequest, CouponQuote, EnrolmentStore, Notifier, PaymentProvider,
};
use serde::Deserialize;
use subtle::ConstantTimeEq;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ApplyCouponRequest {
    pub coupon_id: String,
    pub instance_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub user_id: i64,
    #[serde(default)]
    pub coupon_id: String,
    pub instance_id: i64,
}

/// Query Stripe appends to on the way back from checkout
#[derive(Debug, Deserialize)]
pub struct CompleteQuery {
    #[serde(default)]
    pub token: String,
    pub session_id: String,
    pub user_id: i64,
    #[serde(default)]
    pub coupon_id: String,
    pub instance_id: i64,
}

/// POST /api/v1/coupons/apply
pub async fn apply_coupon<S, P, N>(
    State(state): State<AppState<S, P, N>>,
    Json(req): Json<ApplyCouponRequest>,
) -> ApiResult<Json<CouponQuote>>
where
    S: EnrolmentStore + 'static,
    P: PaymentProvider + 'static,
    N: Notifier + 'static,
{
    let quote = state
        .enrolment
        .coupons
        .apply_coupon(&req.coupon_id, req.instance_id)
        .await?;

    Ok(Json(quote))
}

/// POST /api/v1/checkout
pub async fn start_checkout<S, P, N>(
    State(state): State<AppState<S, P, N>>,
    Json(req): Json<CheckoutRequest>,
) -> ApiResult<Json<CheckoutOutcome>>
where
    S: EnrolmentStore + 'static,
    P: PaymentProvider + 'static,
    N: Notifier + 'static,
{
    let outcome = state
        .enrolment
        .checkout
        .start_checkout(req.user_id, &req.coupon_id, req.instance_id)
        .await?;

    if let CheckoutOutcome::Failed { code, message } = &outcome {
        tracing::info!(
            user_id = req.user_id,
            instance_id = req.instance_id,
            code = %code,
            message = %message,
            "Checkout not started"
        );
    }

    Ok(Json(outcome))
}

/// GET /api/v1/checkout/complete
pub async fn complete_checkout<S, P, N>(
    State(state): State<AppState<S, P, N>>,
    Query(query): Query<CompleteQuery>,
) -> ApiResult<Response>
where
    S: EnrolmentStore + 'static,
    P: PaymentProvider + 'static,
    N: Notifier + 'static,
{
    if !token_matches(state.return_token(), &query.token) {
        tracing::warn!(
            user_id = query.user_id,
            instance_id = query.instance_id,
            "Checkout return with invalid token"
        );
        return Err(ApiError::Unauthorized);
    }

    let request = ConfirmationRequest {
        session_id: query.session_id,
        user_id: query.user_id,
        coupon_id: normalize_coupon_id(&query.coupon_id),
        instance_id: query.instance_id,
    };

    let outcome = state
        .enrolment
        .confirmation
        .confirm_payment(&request)
        .await?;

    Ok(match outcome {
        ConfirmationOutcome::Enrolled { redirect_url, .. } => {
            Redirect::to(&redirect_url).into_response()
        }
        ConfirmationOutcome::RedirectHome { url } => Redirect::to(&url).into_response(),
        ConfirmationOutcome::NotEnrolled {
            course_url,
            message,
        } => Html(notice_page(&message, &course_url)).into_response(),
    })
}

/// Constant-time token check; an unset expected token never matches
fn token_matches(expected: Option<&str>, provided: &str) -> bool {
    match expected {
        Some(expected) => expected.as_bytes().ct_eq(provided.as_bytes()).into(),
        None => false,
    }
}

fn notice_page(message: &str, continue_url: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>Enrolment</title></head>\n\
         <body>\n<p>{}</p>\n<p><a href=\"{}\">Continue</a></p>\n</body>\n</html>\n",
        escape_html(message),
        escape_html(continue_url)
    )
}
