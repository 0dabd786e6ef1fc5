//! Billing error types

use thiserror::Error;

pub type BillingResult<T> = Result<T, BillingError>;

/// Why a coupon was refused
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CouponRejection {
    /// Stripe has no coupon with this id
    NotFound,
    /// Coupon exists but Stripe reports it as not valid
    Inactive,
    /// `redeem_by` is in the past
    Expired,
    /// `times_redeemed` reached `max_redemptions`
    Exhausted,
    /// Fixed-amount coupon in a different currency than the instance
    CurrencyMismatch { coupon: String, instance: String },
    /// Neither `percent_off` nor `amount_off` is set
    UnsupportedType,
}

impl std::fmt::Display for CouponRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CouponRejection::NotFound => write!(f, "Invalid coupon!"),
            CouponRejection::Inactive => write!(f, "Invalid coupon!"),
            CouponRejection::Expired => write!(f, "Coupon has expired"),
            CouponRejection::Exhausted => write!(f, "Coupon usage limit exceeded"),
            CouponRejection::CurrencyMismatch { coupon, instance } => write!(
                f,
                "Coupon currency ({}) does not match course currency ({})",
                coupon, instance
            ),
            CouponRejection::UnsupportedType => write!(f, "Invalid coupon type"),
        }
    }
}

/// Which part of the enrolment context failed to resolve
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationFailure {
    Instance(i64),
    Course(i64),
    Context(i64),
    User(i64),
    EnrolmentClosed(String),
    MaxEnrolled,
}

impl std::fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationFailure::Instance(id) => write!(f, "Not a valid instance id! ({})", id),
            ValidationFailure::Course(id) => write!(f, "Not a valid course id! ({})", id),
            ValidationFailure::Context(id) => write!(f, "Not a valid context id! ({})", id),
            ValidationFailure::User(id) => write!(f, "Not a valid user id ({})", id),
            ValidationFailure::EnrolmentClosed(reason) => write!(f, "{}", reason),
            ValidationFailure::MaxEnrolled => write!(
                f,
                "Maximum number of users allowed to stripepayment-enrol was already reached."
            ),
        }
    }
}

#[derive(Error, Debug)]
pub enum BillingError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{0}")]
    InvalidCoupon(CouponRejection),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Stripe API error: {0}")]
    StripeApi(String),

    /// Stripe reported the object unknown or inaccessible with the current key
    #[error("Stripe resource missing: {0}")]
    StripeResourceMissing(String),

    #[error("Validation failed: {0}")]
    Validation(ValidationFailure),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Notification delivery failed: {0}")]
    Notification(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl BillingError {
    /// Machine-readable code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            BillingError::InvalidInput(_) => "invalid_input",
            BillingError::InvalidCoupon(_) => "invalid_coupon",
            BillingError::Config(_) => "configuration_error",
            BillingError::StripeApi(_) | BillingError::StripeResourceMissing(_) => {
                "provider_error"
            }
            BillingError::Validation(_) => "validation_error",
            BillingError::Database(_) => "database_error",
            BillingError::Notification(_) => "notification_error",
            BillingError::InvalidRequest(_) => "invalid_request",
        }
    }

    /// Errors the caller caused, as opposed to infrastructure faults
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            BillingError::InvalidInput(_)
                | BillingError::InvalidCoupon(_)
                | BillingError::Validation(_)
                | BillingError::InvalidRequest(_)
        )
    }
}

impl From<sqlx::Error> for BillingError {
    fn from(e: sqlx::Error) -> Self {
        BillingError::Database(e.to_string())
    }
}

impl From<stripe::StripeError> for BillingError {
    fn from(e: stripe::StripeError) -> Self {
        match &e {
            stripe::StripeError::Stripe(req) => {
                let message = req.message.clone().unwrap_or_default();
                if req.http_status == 404 || is_missing_resource_message(&message) {
                    BillingError::StripeResourceMissing(message)
                } else {
                    BillingError::StripeApi(e.to_string())
                }
            }
            _ => BillingError::StripeApi(e.to_string()),
        }
    }
}

/// Stripe phrases used when an id is unknown or belongs to another account/mode
pub(crate) fn is_missing_resource_message(message: &str) -> bool {
    message.contains("No such") || message.contains("You do not have access")
}
