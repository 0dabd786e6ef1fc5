// Billing crate clippy configuration
#![allow(clippy::result_large_err)] // BillingError carries coupon rejection details
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! CoursePay Billing Module
//!
//! Paid course enrolment through Stripe Checkout.
//!
//! ## Features
//!
//! - **Coupons**: Validate Stripe coupons and quote the discounted price
//! - **Checkout**: Resolve the learner's Stripe customer and open a hosted checkout session
//! - **Confirmation**: Verify the returned session, record the transaction and enrol
//! - **Notifications**: Student, teacher and admin emails plus admin error alerts
//! - **Upgrades**: Versioned settings and legacy schema steps

pub mod checkout;
pub mod client;
pub mod confirmation;
pub mod coupon;
pub mod currency;
pub mod customer;
pub mod email;
pub mod enrolment;
pub mod error;
pub mod notify;
pub mod pg;
pub mod provider;
pub mod settings;
pub mod store;
pub mod upgrade;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;


// Checkout
pub use checkout::{CheckoutOutcome, CheckoutService};

// Client
pub use client::{StripeClient, StripeConfig};

// Confirmation
pub use confirmation::{ConfirmationOutcome, ConfirmationRequest, ConfirmationService};

// Coupon
pub use coupon::{CouponQuote, CouponService, Discount, ShowSections, UiState};

// Customer
pub use customer::CustomerResolver;

// Email
pub use email::{EmailConfig, EmailNotifier};

// Enrolment
pub use enrolment::{DispatchOutcome, EnrolmentDispatcher, EnrolmentTarget};

// Error
pub use error::{BillingError, BillingResult, CouponRejection, ValidationFailure};

// Notify
pub use notify::{Message, Notifier, Sender};

// Postgres
pub use pg::PgStore;

// Provider
pub use provider::PaymentProvider;

// Settings
pub use settings::{PluginSettings, SiteConfig, StripeMode};

// Store
pub use store::{ConfigStore, EnrolmentStore};

use std::sync::Arc;

use sqlx::PgPool;

/// All enrolment flows over one store, provider and notifier
pub struct EnrolmentService<S, P, N> {
    pub coupons: CouponService<S, P>,
    pub checkout: CheckoutService<S, P>,
    pub confirmation: ConfirmationService<S, P, N>,
    settings: Arc<PluginSettings>,
}

/// Production wiring
pub type PgEnrolmentService = EnrolmentService<PgStore, StripeClient, EmailNotifier>;

impl<S, P, N> EnrolmentService<S, P, N>
where
    S: EnrolmentStore,
    P: PaymentProvider,
    N: Notifier,
{
    pub fn new(
        store: Arc<S>,
        provider: Arc<P>,
        notifier: Arc<N>,
        settings: PluginSettings,
        site: SiteConfig,
    ) -> Self {
        let settings = Arc::new(settings);
        let site = Arc::new(site);

        Self {
            coupons: CouponService::new(store.clone(), provider.clone(), settings.clone()),
            checkout: CheckoutService::new(
                store.clone(),
                provider.clone(),
                settings.clone(),
                site.clone(),
            ),
            confirmation: ConfirmationService::new(
                store,
                provider,
                notifier,
                settings.clone(),
                site,
            ),
            settings,
        }
    }

    pub fn settings(&self) -> &PluginSettings {
        &self.settings
    }
}

impl PgEnrolmentService {
    /// Run pending upgrade steps, load settings and wire the Stripe client
    pub async fn from_pool(
        pool: PgPool,
        site: SiteConfig,
        email: EmailConfig,
    ) -> BillingResult<Self> {
        let store = Arc::new(PgStore::new(pool));

        let version = upgrade::run_pending(store.as_ref()).await?;
        let settings = PluginSettings::from_map(&store.load_config().await?);

        tracing::info!(
            version,
            stripe = %settings.mode_status(),
            mail_students = settings.mail_students,
            mail_teachers = settings.mail_teachers,
            mail_admins = settings.mail_admins,
            "Enrolment settings loaded"
        );

        let stripe = Arc::new(StripeClient::from_settings(&settings));
        let notifier = EmailNotifier::new(email);
        if notifier.is_enabled() {
            tracing::info!("Enrolment email notifications enabled");
        } else {
            tracing::warn!("Enrolment email notifications not configured (missing RESEND_API_KEY)");
        }

        Ok(Self::new(
            store,
            stripe,
            Arc::new(notifier),
            settings,
            site,
        ))
    }
}
