//! Payment confirmation
//!
//! Runs when Stripe redirects the learner back. Validation and unpaid
//! sessions alert the site admin and send the learner home; unexpected
//! failures alert the admin and surface as `InvalidRequest`.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use time::OffsetDateTime;

use crate::currency;
use crate::enrolment::{resolve_target, DispatchOutcome, EnrolmentDispatcher, EnrolmentTarget};
use crate::error::{BillingError, BillingResult};
use crate::notify::{alert_admins, Notifier};
use crate::provider::{
    PaymentProvider, ProviderCheckoutSession, ProviderPaymentIntent, SessionPaymentStatus,
};
use crate::settings::{PluginSettings, SiteConfig};
use crate::store::{EnrolmentStore, NewTransaction};

const NOT_AVAILABLE: &str = "NA";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ConfirmationOutcome {
    /// Redirect to the course with a thank-you notice
    Enrolled { redirect_url: String, message: String },
    /// Payment recorded but the enrolment is not visible yet
    NotEnrolled { course_url: String, message: String },
    RedirectHome { url: String },
}

pub fn thank_you_message(course_fullname: &str) -> String {
    format!(
        "Thank you for your payment! You are now enrolled in the course: {}",
        course_fullname
    )
}

pub fn sorry_message(course_fullname: &str) -> String {
    format!(
        "Thank you for your payment! Unfortunately your payment has not yet been fully processed, \
         and you are not yet registered to enter the course \"{}\". Please try continuing to the \
         course in a few seconds, but if you continue to have trouble then please alert the \
         Teacher or the site administrator",
        course_fullname
    )
}

/// Charge details for the transaction row, from the intent when there is one
#[derive(Debug, Clone, PartialEq)]
pub struct ChargeDetails {
    pub txn_id: String,
    pub email: Option<String>,
    pub payment_status: String,
    pub price: Decimal,
    pub memo: String,
    pub pending_reason: String,
    pub reason_code: String,
    pub payment_type: &'static str,
}

impl ChargeDetails {
    pub fn from_parts(
        session: &ProviderCheckoutSession,
        intent: Option<&ProviderPaymentIntent>,
    ) -> Self {
        match intent {
            Some(intent) => Self {
                txn_id: intent.id.clone(),
                email: intent.receipt_email.clone(),
                payment_status: intent.status.clone(),
                price: currency::from_minor_units(intent.amount, &intent.currency),
                memo: intent
                    .payment_method
                    .clone()
                    .unwrap_or_else(|| "none".to_string()),
                pending_reason: intent
                    .failure_message
                    .clone()
                    .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
                reason_code: intent
                    .failure_code
                    .clone()
                    .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
                payment_type: "stripe",
            },
            None => Self {
                txn_id: session.id.clone(),
                email: session.customer_email.clone(),
                payment_status: session.payment_status.as_str().to_string(),
                price: Decimal::ZERO,
                memo: "none".to_string(),
                pending_reason: NOT_AVAILABLE.to_string(),
                reason_code: NOT_AVAILABLE.to_string(),
                payment_type: "free",
            },
        }
    }

    pub fn into_transaction(
        self,
        target: &EnrolmentTarget,
        session: &ProviderCheckoutSession,
        coupon_id: Option<String>,
    ) -> NewTransaction {
        NewTransaction {
            user_id: target.user.id,
            course_id: target.course.id,
            instance_id: target.instance.id,
            coupon_id,
            receiver_email: target.user.email.clone(),
            receiver_id: session.customer_id.clone(),
            txn_id: self.txn_id,
            price: self.price,
            memo: self.memo,
            payment_status: self.payment_status,
            pending_reason: self.pending_reason,
            reason_code: self.reason_code,
            item_name: target.course.fullname.clone(),
            payment_type: self.payment_type.to_string(),
        }
    }
}

/// Return-URL parameters
#[derive(Debug, Clone)]
pub struct ConfirmationRequest {
    pub session_id: String,
    pub user_id: i64,
    pub coupon_id: Option<String>,
    pub instance_id: i64,
}

pub struct ConfirmationService<S, P, N> {
    store: Arc<S>,
    provider: Arc<P>,
    notifier: Arc<N>,
    site: Arc<SiteConfig>,
    dispatcher: EnrolmentDispatcher<S, N>,
}

impl<S, P, N> ConfirmationService<S, P, N>
where
    S: EnrolmentStore,
    P: PaymentProvider,
    N: Notifier,
{
    pub fn new(
        store: Arc<S>,
        provider: Arc<P>,
        notifier: Arc<N>,
        settings: Arc<PluginSettings>,
        site: Arc<SiteConfig>,
    ) -> Self {
        Self {
            dispatcher: EnrolmentDispatcher::new(
                store.clone(),
                notifier.clone(),
                settings,
                site.clone(),
            ),
            store,
            provider,
            notifier,
            site,
        }
    }

    pub async fn confirm_payment(
        &self,
        request: &ConfirmationRequest,
    ) -> BillingResult<ConfirmationOutcome> {
        match self.process(request).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                tracing::error!(session_id = %request.session_id, error = %e, "Payment confirmation failed");
                self.alert(&e.to_string(), &[("sessionid", request.session_id.clone())])
                    .await;
                Err(BillingError::InvalidRequest(e.to_string()))
            }
        }
    }

    async fn process(&self, request: &ConfirmationRequest) -> BillingResult<ConfirmationOutcome> {
        let session = self
            .provider
            .retrieve_checkout_session(&request.session_id)
            .await?;
        let intent = match &session.payment_intent_id {
            Some(id) => Some(self.provider.retrieve_payment_intent(id).await?),
            None => None,
        };
        let charge = ChargeDetails::from_parts(&session, intent.as_ref());

        let home = ConfirmationOutcome::RedirectHome {
            url: self.site.home_url(),
        };

        let target = match resolve_target(self.store.as_ref(), request.user_id, request.instance_id).await
        {
            Ok(target) => target,
            Err(BillingError::Validation(failure)) => {
                self.alert(
                    &failure.to_string(),
                    &[
                        ("userid", request.user_id.to_string()),
                        ("instanceid", request.instance_id.to_string()),
                    ],
                )
                .await;
                return Ok(home);
            }
            Err(e) => return Err(e),
        };

        if session.payment_status != SessionPaymentStatus::Paid {
            self.alert(
                &format!("Payment status: {}", session.payment_status),
                &[
                    ("couponid", request.coupon_id.clone().unwrap_or_default()),
                    ("stripeEmail", charge.email.clone().unwrap_or_default()),
                    ("courseid", target.course.id.to_string()),
                    ("instanceid", target.instance.id.to_string()),
                    ("userid", target.user.id.to_string()),
                    (
                        "timeupdated",
                        OffsetDateTime::now_utc().unix_timestamp().to_string(),
                    ),
                ],
            )
            .await;
            return Ok(home);
        }

        let transaction = charge.into_transaction(&target, &session, request.coupon_id.clone());
        let outcome = self
            .dispatcher
            .dispatch(&target, &transaction, OffsetDateTime::now_utc())
            .await?;

        if outcome == DispatchOutcome::Duplicate {
            tracing::info!(session_id = %session.id, "Repeated confirmation for recorded payment");
        }

        let course_url = self.site.course_url(target.course.id);
        if self
            .store
            .is_enrolled(target.course.id, target.user.id)
            .await?
        {
            Ok(ConfirmationOutcome::Enrolled {
                redirect_url: course_url,
                message: thank_you_message(&target.course.fullname),
            })
        } else {
            tracing::warn!(
                user_id = target.user.id,
                course_id = target.course.id,
                "Payment recorded but user not enrolled"
            );
            Ok(ConfirmationOutcome::NotEnrolled {
                course_url,
                message: sorry_message(&target.course.fullname),
            })
        }
    }

    async fn alert(&self, subject: &str, fields: &[(&str, String)]) {
        alert_admins(
            self.store.as_ref(),
            self.notifier.as_ref(),
            &self.site,
            subject,
            fields,
        )
        .await;
    }
}
