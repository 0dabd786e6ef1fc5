//! Application state

use std::sync::Arc;

use coursepay_billing::{
    EmailNotifier, EnrolmentService, EnrolmentStore, Notifier, PaymentProvider, PgStore,
    StripeClient,
};

/// Shared application state
pub struct AppState<S, P, N> {
    pub enrolment: Arc<EnrolmentService<S, P, N>>,
}

/// Production state
pub type PgAppState = AppState<PgStore, StripeClient, EmailNotifier>;

impl<S, P, N> Clone for AppState<S, P, N> {
    fn clone(&self) -> Self {
        Self {
            enrolment: self.enrolment.clone(),
        }
    }
}

impl<S, P, N> AppState<S, P, N>
where
    S: EnrolmentStore,
    P: PaymentProvider,
    N: Notifier,
{
    pub fn new(enrolment: EnrolmentService<S, P, N>) -> Self {
        if enrolment.settings().webservice_token().is_none() {
            tracing::warn!("Web service token not configured; checkout returns will be rejected");
        }
        Self {
            enrolment: Arc::new(enrolment),
        }
    }

    /// Token the checkout return URL must carry
    pub fn return_token(&self) -> Option<&str> {
        self.enrolment.settings().webservice_token()
    }
}
