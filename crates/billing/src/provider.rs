//! Payment provider seam
//!
//! The flows only see these plain records; [`crate::client::StripeClient`]
//! is the production implementation.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::error::BillingResult;

#[derive(Debug, Clone, Default)]
pub struct ProviderCoupon {
    pub id: String,
    pub name: Option<String>,
    pub valid: bool,
    pub percent_off: Option<Decimal>,
    /// Minor units of `currency`
    pub amount_off: Option<i64>,
    pub currency: Option<String>,
    /// Unix timestamp
    pub redeem_by: Option<i64>,
    pub max_redemptions: Option<i64>,
    pub times_redeemed: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderCustomer {
    pub id: String,
    pub email: Option<String>,
}

/// Everything needed to open a hosted checkout page for one course
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewCheckoutSession {
    pub customer_id: String,
    /// Minor units
    pub unit_amount: i64,
    pub currency: String,
    pub product_name: String,
    pub course_id: i64,
    pub course_shortname: String,
    pub coupon_id: Option<String>,
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPaymentStatus {
    Paid,
    Unpaid,
    NoPaymentRequired,
}

impl SessionPaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionPaymentStatus::Paid => "paid",
            SessionPaymentStatus::Unpaid => "unpaid",
            SessionPaymentStatus::NoPaymentRequired => "no_payment_required",
        }
    }
}

impl std::fmt::Display for SessionPaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct ProviderCheckoutSession {
    pub id: String,
    pub url: Option<String>,
    pub payment_status: SessionPaymentStatus,
    pub payment_intent_id: Option<String>,
    pub customer_id: Option<String>,
    pub customer_email: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ProviderPaymentIntent {
    pub id: String,
    /// Minor units
    pub amount: i64,
    pub currency: String,
    pub status: String,
    pub receipt_email: Option<String>,
    pub payment_method: Option<String>,
    pub failure_message: Option<String>,
    pub failure_code: Option<String>,
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn retrieve_coupon(&self, coupon_id: &str) -> BillingResult<ProviderCoupon>;

    /// Fails with `StripeResourceMissing` when the id is unknown to the current key
    async fn retrieve_customer(&self, customer_id: &str) -> BillingResult<ProviderCustomer>;

    async fn find_customers_by_email(&self, email: &str) -> BillingResult<Vec<ProviderCustomer>>;

    async fn create_customer(&self, email: &str, name: &str) -> BillingResult<ProviderCustomer>;

    async fn create_checkout_session(
        &self,
        params: &NewCheckoutSession,
    ) -> BillingResult<ProviderCheckoutSession>;

    async fn retrieve_checkout_session(
        &self,
        session_id: &str,
    ) -> BillingResult<ProviderCheckoutSession>;

    async fn retrieve_payment_intent(&self, intent_id: &str)
        -> BillingResult<ProviderPaymentIntent>;
}
