//! Stripe customer resolution
//!
//! One customer per email. A stored id is reused while Stripe still knows it;
//! otherwise the customer is looked up by email or created, and the mapping
//! refreshed.

use std::sync::Arc;

use crate::error::{BillingError, BillingResult};
use crate::provider::PaymentProvider;
use crate::store::{EnrolmentStore, User};

pub struct CustomerResolver<S, P> {
    store: Arc<S>,
    provider: Arc<P>,
}

impl<S: EnrolmentStore, P: PaymentProvider> CustomerResolver<S, P> {
    pub fn new(store: Arc<S>, provider: Arc<P>) -> Self {
        Self { store, provider }
    }

    /// Stored customer id, if Stripe still resolves it.
    ///
    /// Missing or inaccessible customers yield `None`; any other provider
    /// failure is returned as an error.
    pub async fn verified_mapping(&self, user: &User) -> BillingResult<Option<String>> {
        let Some(mapping) = self.store.customer_mapping(&user.email).await? else {
            return Ok(None);
        };

        match self.provider.retrieve_customer(&mapping.customer_id).await {
            Ok(_) => Ok(Some(mapping.customer_id)),
            Err(BillingError::StripeResourceMissing(reason)) => {
                tracing::warn!(
                    user_id = user.id,
                    customer_id = %mapping.customer_id,
                    reason = %reason,
                    "Stored Stripe customer no longer resolvable, discarding"
                );
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// First customer Stripe has for the email, else a new one; persists the mapping
    pub async fn lookup_or_create(&self, user: &User) -> BillingResult<String> {
        let existing = self.provider.find_customers_by_email(&user.email).await?;

        let customer_id = match existing.into_iter().next() {
            Some(customer) => {
                tracing::debug!(user_id = user.id, customer_id = %customer.id, "Reusing Stripe customer found by email");
                customer.id
            }
            None => {
                self.provider
                    .create_customer(&user.email, &user.fullname())
                    .await?
                    .id
            }
        };

        self.store
            .save_customer_mapping(&user.email, user.id, &customer_id)
            .await?;

        Ok(customer_id)
    }
}
