//! Stripe client wrapper

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use stripe::{
    CheckoutSession, CheckoutSessionId, CheckoutSessionMode, CheckoutSessionPaymentStatus,
    Client, Coupon, CouponId, CreateCheckoutSession, CreateCheckoutSessionDiscounts,
    CreateCheckoutSessionLineItems, CreateCheckoutSessionLineItemsPriceData,
    CreateCheckoutSessionLineItemsPriceDataProductData, CreateCheckoutSessionPaymentIntentData,
    CreateCheckoutSessionPaymentMethodTypes, CreateCustomer, Currency, Customer, CustomerId,
    ListCustomers, PaymentIntent, PaymentIntentId,
};

use crate::error::{BillingError, BillingResult};
use crate::provider::{
    NewCheckoutSession, PaymentProvider, ProviderCheckoutSession, ProviderCoupon,
    ProviderCustomer, ProviderPaymentIntent, SessionPaymentStatus,
};
use crate::settings::{PluginSettings, StripeMode};

/// Key pair for the active mode
#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub mode: StripeMode,
    pub secret_key: String,
    pub publishable_key: String,
}

impl StripeConfig {
    pub fn from_settings(settings: &PluginSettings) -> Self {
        Self {
            mode: settings.mode,
            secret_key: settings.secret_key().unwrap_or_default().to_string(),
            publishable_key: settings.publishable_key().unwrap_or_default().to_string(),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.secret_key.is_empty()
    }
}

/// Cheap to clone; shares the underlying HTTP client
#[derive(Clone)]
pub struct StripeClient {
    client: Client,
    config: Arc<StripeConfig>,
}

impl StripeClient {
    pub fn new(config: StripeConfig) -> Self {
        if !config.is_configured() {
            tracing::warn!(mode = %config.mode, "Stripe secret key not configured for mode");
        }
        Self {
            client: Client::new(config.secret_key.clone()),
            config: Arc::new(config),
        }
    }

    pub fn from_settings(settings: &PluginSettings) -> Self {
        Self::new(StripeConfig::from_settings(settings))
    }
}

/// Stripe's lowercase currency enum from an ISO code
fn parse_currency(code: &str) -> BillingResult<Currency> {
    serde_json::from_value(serde_json::Value::String(code.to_lowercase()))
        .map_err(|_| BillingError::InvalidInput(format!("Unsupported currency: {}", code)))
}

fn currency_code(currency: Currency) -> String {
    currency.to_string().to_uppercase()
}

fn to_provider_customer(customer: &Customer) -> ProviderCustomer {
    ProviderCustomer {
        id: customer.id.to_string(),
        email: customer.email.clone(),
    }
}

fn to_provider_session(session: CheckoutSession) -> ProviderCheckoutSession {
    let payment_status = match session.payment_status {
        CheckoutSessionPaymentStatus::Paid => SessionPaymentStatus::Paid,
        CheckoutSessionPaymentStatus::Unpaid => SessionPaymentStatus::Unpaid,
        CheckoutSessionPaymentStatus::NoPaymentRequired => SessionPaymentStatus::NoPaymentRequired,
    };

    ProviderCheckoutSession {
        id: session.id.to_string(),
        url: session.url.clone(),
        payment_status,
        payment_intent_id: session.payment_intent.as_ref().map(|pi| pi.id().to_string()),
        customer_id: session.customer.as_ref().map(|c| c.id().to_string()),
        customer_email: session
            .customer_details
            .as_ref()
            .and_then(|details| details.email.clone()),
    }
}

#[async_trait]
impl PaymentProvider for StripeClient {
    async fn retrieve_coupon(&self, coupon_id: &str) -> BillingResult<ProviderCoupon> {
        let id = coupon_id
            .parse::<CouponId>()
            .map_err(|e| BillingError::InvalidInput(format!("Invalid coupon ID: {}", e)))?;

        let coupon = Coupon::retrieve(&self.client, &id, &[]).await?;

        Ok(ProviderCoupon {
            id: coupon.id.to_string(),
            name: coupon.name.clone(),
            valid: coupon.valid.unwrap_or(false),
            percent_off: coupon.percent_off.and_then(|pct| Decimal::try_from(pct).ok()),
            amount_off: coupon.amount_off,
            currency: coupon.currency.map(currency_code),
            redeem_by: coupon.redeem_by,
            max_redemptions: coupon.max_redemptions,
            times_redeemed: coupon.times_redeemed.unwrap_or(0),
        })
    }

    async fn retrieve_customer(&self, customer_id: &str) -> BillingResult<ProviderCustomer> {
        let id = customer_id.parse::<CustomerId>().map_err(|e| {
            BillingError::StripeResourceMissing(format!("Invalid customer ID: {}", e))
        })?;

        let customer = Customer::retrieve(&self.client, &id, &[]).await?;
        Ok(to_provider_customer(&customer))
    }

    async fn find_customers_by_email(&self, email: &str) -> BillingResult<Vec<ProviderCustomer>> {
        let mut params = ListCustomers::new();
        params.email = Some(email);
        params.limit = Some(1);

        let customers = Customer::list(&self.client, &params).await?;
        Ok(customers.data.iter().map(to_provider_customer).collect())
    }

    async fn create_customer(&self, email: &str, name: &str) -> BillingResult<ProviderCustomer> {
        let mut metadata = HashMap::new();
        metadata.insert("platform".to_string(), "coursepay".to_string());

        let params = CreateCustomer {
            email: Some(email),
            name: Some(name),
            metadata: Some(metadata),
            ..Default::default()
        };

        let customer = Customer::create(&self.client, params).await?;

        tracing::info!(customer_id = %customer.id, mode = %self.config.mode, "Created Stripe customer");

        Ok(to_provider_customer(&customer))
    }

    async fn create_checkout_session(
        &self,
        params: &NewCheckoutSession,
    ) -> BillingResult<ProviderCheckoutSession> {
        let customer_id = params
            .customer_id
            .parse::<CustomerId>()
            .map_err(|e| BillingError::StripeApi(format!("Invalid customer ID: {}", e)))?;
        let currency = parse_currency(&params.currency)?;

        let mut product_metadata = HashMap::new();
        product_metadata.insert("pro_id".to_string(), params.course_id.to_string());

        let mut metadata = HashMap::new();
        metadata.insert(
            "course_shortname".to_string(),
            params.course_shortname.clone(),
        );
        metadata.insert("course_id".to_string(), params.course_id.to_string());
        if let Some(coupon_id) = &params.coupon_id {
            metadata.insert("couponid".to_string(), coupon_id.clone());
        }

        let line_item = CreateCheckoutSessionLineItems {
            price_data: Some(CreateCheckoutSessionLineItemsPriceData {
                currency,
                unit_amount: Some(params.unit_amount),
                product_data: Some(CreateCheckoutSessionLineItemsPriceDataProductData {
                    name: params.product_name.clone(),
                    description: Some(params.product_name.clone()),
                    metadata: Some(product_metadata),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            quantity: Some(1),
            ..Default::default()
        };

        let discounts = params.coupon_id.as_ref().map(|coupon_id| {
            vec![CreateCheckoutSessionDiscounts {
                coupon: Some(coupon_id.clone()),
                ..Default::default()
            }]
        });

        let request = CreateCheckoutSession {
            customer: Some(customer_id),
            mode: Some(CheckoutSessionMode::Payment),
            payment_method_types: Some(vec![CreateCheckoutSessionPaymentMethodTypes::Card]),
            payment_intent_data: Some(CreateCheckoutSessionPaymentIntentData {
                description: Some(params.product_name.clone()),
                ..Default::default()
            }),
            line_items: Some(vec![line_item]),
            discounts,
            metadata: Some(metadata),
            success_url: Some(&params.success_url),
            cancel_url: Some(&params.cancel_url),
            ..Default::default()
        };

        let session = CheckoutSession::create(&self.client, request).await?;

        tracing::info!(
            session_id = %session.id,
            mode = %self.config.mode,
            course_id = params.course_id,
            unit_amount = params.unit_amount,
            coupon_id = ?params.coupon_id,
            "Created checkout session"
        );

        Ok(to_provider_session(session))
    }

    async fn retrieve_checkout_session(
        &self,
        session_id: &str,
    ) -> BillingResult<ProviderCheckoutSession> {
        let id = session_id
            .parse::<CheckoutSessionId>()
            .map_err(|e| BillingError::InvalidInput(format!("Invalid session ID: {}", e)))?;

        let session = CheckoutSession::retrieve(&self.client, &id, &[]).await?;
        Ok(to_provider_session(session))
    }

    async fn retrieve_payment_intent(
        &self,
        intent_id: &str,
    ) -> BillingResult<ProviderPaymentIntent> {
        let id = intent_id
            .parse::<PaymentIntentId>()
            .map_err(|e| BillingError::StripeApi(format!("Invalid payment intent ID: {}", e)))?;

        let intent = PaymentIntent::retrieve(&self.client, &id, &[]).await?;
        let last_error = intent.last_payment_error.as_ref();

        Ok(ProviderPaymentIntent {
            id: intent.id.to_string(),
            amount: intent.amount,
            currency: currency_code(intent.currency),
            status: intent.status.as_str().to_string(),
            receipt_email: intent.receipt_email.clone(),
            payment_method: intent.payment_method.as_ref().map(|pm| pm.id().to_string()),
            failure_message: last_error.and_then(|e| e.message.clone()),
            failure_code: last_error.and_then(|e| e.decline_code.clone()),
        })
    }
}
