//! API error types and their JSON responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use coursepay_billing::BillingError;
use serde::Serialize;
use thiserror::Error;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Billing(#[from] BillingError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Billing(e) => match e {
                BillingError::Validation(_) | BillingError::InvalidCoupon(_) => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                e if e.is_client_error() => StatusCode::BAD_REQUEST,
                BillingError::Config(_) => StatusCode::SERVICE_UNAVAILABLE,
                BillingError::StripeApi(_) | BillingError::StripeResourceMissing(_) => {
                    StatusCode::BAD_GATEWAY
                }
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthorized => "unauthorized",
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Billing(e) => e.code(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Infrastructure details stay in the logs
        let message = if status.is_server_error() {
            tracing::error!(error = %self, code = self.code(), "Request failed");
            match &self {
                ApiError::Billing(BillingError::Config(msg)) => msg.clone(),
                _ => "Internal server error".to_string(),
            }
        } else {
            match &self {
                ApiError::Billing(e @ BillingError::InvalidCoupon(_)) => e.to_string(),
                ApiError::Billing(BillingError::InvalidInput(msg)) => msg.clone(),
                other => other.to_string(),
            }
        };

        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code().to_string(),
                message,
            },
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coursepay_billing::{CouponRejection, ValidationFailure};

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ApiError::from(BillingError::InvalidCoupon(CouponRejection::Expired)).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ApiError::from(BillingError::Validation(ValidationFailure::Instance(3))).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ApiError::from(BillingError::InvalidInput("x".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(BillingError::Config("no key".into())).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::from(BillingError::StripeApi("down".into())).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ApiError::from(BillingError::Database("gone".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_body_hides_internal_details() {
        let response = ApiError::from(BillingError::Database("password=hunter2".into())).into_response();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(body["error"]["code"], "database_error");
        assert_eq!(body["error"]["message"], "Internal server error");
    }

    #[tokio::test]
    async fn test_coupon_message_passed_through() {
        let response =
            ApiError::from(BillingError::InvalidCoupon(CouponRejection::NotFound)).into_response();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(body["error"]["code"], "invalid_coupon");
        assert_eq!(body["error"]["message"], "Invalid coupon!");
    }
}
