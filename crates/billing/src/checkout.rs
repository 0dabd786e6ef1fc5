//! Checkout session initiation
//!
//! Every business failure comes back as [`CheckoutOutcome::Failed`]; only a
//! fatal provider error while verifying a stored customer, or a store
//! failure, escapes as `Err`.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use time::OffsetDateTime;

use crate::coupon::{base_price, normalize_coupon_id, CouponService};
use crate::currency;
use crate::customer::CustomerResolver;
use crate::enrolment::{check_availability, resolve_target};
use crate::error::{BillingError, BillingResult};
use crate::provider::{NewCheckoutSession, PaymentProvider};
use crate::settings::{PluginSettings, SiteConfig};
use crate::store::EnrolmentStore;

/// Path the confirmation handler is served on
pub const RETURN_PATH: &str = "/api/v1/checkout/complete";

/// Replaced by Stripe with the session id on redirect
const SESSION_ID_PLACEHOLDER: &str = "{CHECKOUT_SESSION_ID}";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CheckoutOutcome {
    /// Send the learner to Stripe
    Redirect {
        redirect_url: String,
        session_id: String,
    },
    /// Nothing to charge or describe; back to the course page
    ReturnToCourse { url: String },
    Failed { code: String, message: String },
}

impl CheckoutOutcome {
    fn failed(code: &str, message: impl Into<String>) -> Self {
        CheckoutOutcome::Failed {
            code: code.to_string(),
            message: message.into(),
        }
    }

    fn from_error(err: &BillingError) -> Self {
        Self::failed(err.code(), err.to_string())
    }
}

/// URL Stripe redirects to after payment, carrying everything confirmation needs
pub fn return_url(
    site: &SiteConfig,
    token: &str,
    user_id: i64,
    coupon_id: Option<&str>,
    instance_id: i64,
) -> String {
    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("token", token)
        .append_pair("user_id", &user_id.to_string())
        .append_pair("coupon_id", coupon_id.unwrap_or_default())
        .append_pair("instance_id", &instance_id.to_string())
        .finish();
    format!(
        "{}{}?{}&session_id={}",
        site.api_url, RETURN_PATH, query, SESSION_ID_PLACEHOLDER
    )
}

pub struct CheckoutService<S, P> {
    store: Arc<S>,
    provider: Arc<P>,
    settings: Arc<PluginSettings>,
    site: Arc<SiteConfig>,
    coupons: CouponService<S, P>,
    customers: CustomerResolver<S, P>,
}

impl<S: EnrolmentStore, P: PaymentProvider> CheckoutService<S, P> {
    pub fn new(
        store: Arc<S>,
        provider: Arc<P>,
        settings: Arc<PluginSettings>,
        site: Arc<SiteConfig>,
    ) -> Self {
        Self {
            coupons: CouponService::new(store.clone(), provider.clone(), settings.clone()),
            customers: CustomerResolver::new(store.clone(), provider.clone()),
            store,
            provider,
            settings,
            site,
        }
    }

    pub async fn start_checkout(
        &self,
        user_id: i64,
        coupon_id: &str,
        instance_id: i64,
    ) -> BillingResult<CheckoutOutcome> {
        if user_id <= 0 {
            return Ok(CheckoutOutcome::failed("invalid_input", "Invalid user ID"));
        }
        if instance_id <= 0 {
            return Ok(CheckoutOutcome::failed("invalid_input", "Invalid instance ID"));
        }

        let Some(token) = self.settings.webservice_token() else {
            return Ok(CheckoutOutcome::failed(
                "configuration_error",
                "Web service token not configured",
            ));
        };

        let now = OffsetDateTime::now_utc();
        let target = match resolve_target(self.store.as_ref(), user_id, instance_id).await {
            Ok(target) => target,
            Err(BillingError::Validation(failure)) => {
                tracing::info!(user_id, instance_id, reason = %failure, "Checkout validation failed");
                return Ok(CheckoutOutcome::failed(
                    "validation_error",
                    format!("Validation failed: {}", failure),
                ));
            }
            Err(e) => return Err(e),
        };

        let enrolled = self.store.count_enrolments(instance_id).await?;
        if let Err(failure) = check_availability(&target.instance, enrolled, now) {
            tracing::info!(user_id, instance_id, reason = %failure, "Enrolment not available");
            return Ok(CheckoutOutcome::from_error(&BillingError::Validation(failure)));
        }

        let course_url = self.site.course_url(target.course.id);
        let (base, currency_code) = base_price(&target.instance, &self.settings);
        let description = target.course.fullname.trim().to_string();
        if self.settings.secret_key().is_none() {
            tracing::warn!(instance_id, mode = %self.settings.mode, "Stripe secret key not configured, returning to course");
            return Ok(CheckoutOutcome::ReturnToCourse { url: course_url });
        }
        if base <= Decimal::ZERO || description.is_empty() {
            tracing::info!(instance_id, course_id = target.course.id, "Nothing to charge, returning to course");
            return Ok(CheckoutOutcome::ReturnToCourse { url: course_url });
        }

        let coupon_id = normalize_coupon_id(coupon_id);
        if let Some(coupon_id) = &coupon_id {
            match self
                .coupons
                .quote_for_instance(&target.instance, coupon_id, now)
                .await
            {
                Ok(quote) if quote.below_minimum => {
                    return Ok(CheckoutOutcome::failed("invalid_coupon", quote.message));
                }
                Ok(_) => {}
                Err(e) => return Ok(CheckoutOutcome::from_error(&e)),
            }
        }

        let unit_amount = match currency::to_minor_units(base, &currency_code) {
            Ok(amount) => amount,
            Err(e) => return Ok(CheckoutOutcome::from_error(&e)),
        };

        let customer_id = match self.customers.verified_mapping(&target.user).await? {
            Some(id) => id,
            None => match self.customers.lookup_or_create(&target.user).await {
                Ok(id) => id,
                Err(e) => {
                    tracing::error!(user_id, error = %e, "Could not create Stripe customer");
                    return Ok(CheckoutOutcome::failed(
                        "provider_error",
                        format!("Could not create customer in Stripe: {}", e),
                    ));
                }
            },
        };

        let params = NewCheckoutSession {
            customer_id,
            unit_amount,
            currency: currency_code,
            product_name: target.course.fullname.clone(),
            course_id: target.course.id,
            course_shortname: target.course.shortname.clone(),
            success_url: return_url(&self.site, token, user_id, coupon_id.as_deref(), instance_id),
            coupon_id,
            cancel_url: course_url,
        };

        match self.provider.create_checkout_session(&params).await {
            Ok(session) => match session.url {
                Some(redirect_url) => Ok(CheckoutOutcome::Redirect {
                    redirect_url,
                    session_id: session.id,
                }),
                None => Ok(CheckoutOutcome::failed(
                    "provider_error",
                    "Stripe returned a session without a checkout URL",
                )),
            },
            Err(e) => {
                tracing::error!(user_id, instance_id, error = %e, "Checkout session creation failed");
                Ok(CheckoutOutcome::from_error(&e))
            }
        }
    }
}
