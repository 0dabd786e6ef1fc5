//! Coupon pricing
//!
//! [`quote`] is the pure price computation; [`CouponService`] wraps it with
//! instance lookup and coupon retrieval.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use time::OffsetDateTime;

use crate::currency;
use crate::error::{BillingError, BillingResult, CouponRejection, ValidationFailure};
use crate::provider::{PaymentProvider, ProviderCoupon};
use crate::settings::PluginSettings;
use crate::store::{EnrolmentInstance, EnrolmentStore};

pub const COUPON_APPLIED_MESSAGE: &str = "Coupon applied successfully.";

/// `None` for empty, whitespace, "none" or "null"
pub fn normalize_coupon_id(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty()
        || trimmed.eq_ignore_ascii_case("none")
        || trimmed.eq_ignore_ascii_case("null")
    {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Instance cost and currency when set, otherwise the site defaults
pub fn base_price(instance: &EnrolmentInstance, settings: &PluginSettings) -> (Decimal, String) {
    let cost = if instance.cost > Decimal::ZERO {
        instance.cost
    } else {
        settings.default_cost
    };
    let currency_code = if instance.currency.trim().is_empty() {
        &settings.default_currency
    } else {
        &instance.currency
    };
    (currency::round_money(cost), currency::normalize(currency_code))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UiState {
    Paid,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Discount {
    /// Percentage off, e.g. `20` for 20%
    PercentOff(Decimal),
    /// Major units of the instance currency
    AmountOff(Decimal),
}

impl Discount {
    pub fn kind(&self) -> &'static str {
        match self {
            Discount::PercentOff(_) => "percent_off",
            Discount::AmountOff(_) => "amount_off",
        }
    }

    pub fn value(&self) -> Decimal {
        match self {
            Discount::PercentOff(v) | Discount::AmountOff(v) => *v,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ShowSections {
    /// Pay button visible
    pub paid_enrollment: bool,
    pub discount_section: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CouponQuote {
    pub coupon_id: String,
    pub coupon_name: String,
    pub discount: Discount,
    pub base_price: Decimal,
    /// Price after discount, clamped at zero
    pub price: Decimal,
    pub discount_amount: Decimal,
    pub currency: String,
    pub minimum_amount: Decimal,
    pub below_minimum: bool,
    pub ui_state: UiState,
    pub message: String,
    pub show_sections: ShowSections,
}

/// Reject coupons that are inactive, past `redeem_by` or fully redeemed
pub fn check_redeemable(coupon: &ProviderCoupon, now: OffsetDateTime) -> Result<(), CouponRejection> {
    if !coupon.valid {
        return Err(CouponRejection::Inactive);
    }
    if coupon
        .redeem_by
        .is_some_and(|deadline| deadline < now.unix_timestamp())
    {
        return Err(CouponRejection::Expired);
    }
    if coupon
        .max_redemptions
        .is_some_and(|max| coupon.times_redeemed >= max)
    {
        return Err(CouponRejection::Exhausted);
    }
    Ok(())
}

/// Discount a base price by a redeemable coupon
pub fn quote(
    base: Decimal,
    currency_code: &str,
    coupon: &ProviderCoupon,
) -> Result<CouponQuote, CouponRejection> {
    let currency_code = currency::normalize(currency_code);

    let (discount, raw_discount) = if let Some(pct) = coupon.percent_off {
        (Discount::PercentOff(pct), base * pct / Decimal::ONE_HUNDRED)
    } else if let Some(amount_off) = coupon.amount_off {
        if let Some(coupon_currency) = &coupon.currency {
            let coupon_currency = currency::normalize(coupon_currency);
            if coupon_currency != currency_code {
                return Err(CouponRejection::CurrencyMismatch {
                    coupon: coupon_currency,
                    instance: currency_code,
                });
            }
        }
        let off = currency::from_minor_units(amount_off, &currency_code);
        (Discount::AmountOff(off), off)
    } else {
        return Err(CouponRejection::UnsupportedType);
    };

    let price = currency::round_money((base - raw_discount).max(Decimal::ZERO));
    let discount_amount = currency::round_money(base - price);
    let minimum = currency::minimum_amount(&currency_code);
    let below_minimum = price > Decimal::ZERO && price < minimum;

    let (ui_state, message) = if below_minimum {
        (
            UiState::Error,
            format!(
                "After applying the coupon, the amount ({}) is less than the supported minimum ({}). Please contact admin for assistance.",
                currency::format_amount(&currency_code, price),
                currency::format_amount(&currency_code, minimum),
            ),
        )
    } else {
        (UiState::Paid, COUPON_APPLIED_MESSAGE.to_string())
    };

    Ok(CouponQuote {
        coupon_id: coupon.id.clone(),
        coupon_name: coupon.name.clone().unwrap_or_else(|| coupon.id.clone()),
        discount,
        base_price: base,
        price,
        discount_amount,
        currency: currency_code,
        minimum_amount: minimum,
        below_minimum,
        ui_state,
        message,
        show_sections: ShowSections {
            paid_enrollment: !below_minimum,
            discount_section: discount_amount > Decimal::ZERO,
        },
    })
}

pub struct CouponService<S, P> {
    store: Arc<S>,
    provider: Arc<P>,
    settings: Arc<PluginSettings>,
}

impl<S: EnrolmentStore, P: PaymentProvider> CouponService<S, P> {
    pub fn new(store: Arc<S>, provider: Arc<P>, settings: Arc<PluginSettings>) -> Self {
        Self {
            store,
            provider,
            settings,
        }
    }

    /// Price a course instance with a coupon
    pub async fn apply_coupon(&self, coupon_id: &str, instance_id: i64) -> BillingResult<CouponQuote> {
        let coupon_id = normalize_coupon_id(coupon_id)
            .ok_or_else(|| BillingError::InvalidInput("Coupon code cannot be empty".into()))?;
        if instance_id <= 0 {
            return Err(BillingError::InvalidInput("Invalid instance ID format".into()));
        }

        let instance = self
            .store
            .active_instance(instance_id)
            .await?
            .ok_or(BillingError::Validation(ValidationFailure::Instance(instance_id)))?;

        if self.settings.secret_key().is_none() {
            return Err(BillingError::Config("Stripe configuration incomplete".into()));
        }

        let quote = self
            .quote_for_instance(&instance, &coupon_id, OffsetDateTime::now_utc())
            .await?;

        tracing::debug!(
            instance_id,
            coupon_id = %quote.coupon_id,
            price = %quote.price,
            currency = %quote.currency,
            ui_state = ?quote.ui_state,
            "Coupon quoted"
        );

        Ok(quote)
    }

    /// Fetch, check and apply a coupon to an already-resolved instance
    pub(crate) async fn quote_for_instance(
        &self,
        instance: &EnrolmentInstance,
        coupon_id: &str,
        now: OffsetDateTime,
    ) -> BillingResult<CouponQuote> {
        let coupon = match self.provider.retrieve_coupon(coupon_id).await {
            Ok(coupon) => coupon,
            Err(BillingError::StripeResourceMissing(_)) => {
                return Err(BillingError::InvalidCoupon(CouponRejection::NotFound))
            }
            Err(e) => return Err(e),
        };

        let rejected = |reason: CouponRejection| {
            tracing::info!(coupon_id, instance_id = instance.id, reason = %reason, "Coupon rejected");
            BillingError::InvalidCoupon(reason)
        };

        check_redeemable(&coupon, now).map_err(rejected)?;

        let (base, currency_code) = base_price(instance, &self.settings);
        quote(base, &currency_code, &coupon).map_err(rejected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use time::macros::datetime;

    fn percent(pct: Decimal) -> ProviderCoupon {
        ProviderCoupon {
            id: "SAVE".into(),
            name: Some("Save".into()),
            valid: true,
            percent_off: Some(pct),
            ..Default::default()
        }
    }

    fn amount(minor: i64, currency: &str) -> ProviderCoupon {
        ProviderCoupon {
            id: "FLAT".into(),
            valid: true,
            amount_off: Some(minor),
            currency: Some(currency.into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_base_price_falls_back_to_site_defaults() {
        let settings = PluginSettings {
            default_cost: dec!(12.5),
            default_currency: "EUR".into(),
            ..Default::default()
        };
        let mut instance = crate::testing::MemoryStore::sample_instance(1, 2);
        instance.cost = Decimal::ZERO;
        instance.currency = String::new();
        assert_eq!(base_price(&instance, &settings), (dec!(12.50), "EUR".to_string()));

        instance.currency = "gbp".into();
        assert_eq!(base_price(&instance, &settings).1, "GBP");

        instance.currency = String::new();
        assert_eq!(base_price(&instance, &PluginSettings::default()).1, "USD");
    }

    #[test]
    fn test_normalize_coupon_id() {
        assert_eq!(normalize_coupon_id(""), None);
        assert_eq!(normalize_coupon_id("   "), None);
        assert_eq!(normalize_coupon_id("None"), None);
        assert_eq!(normalize_coupon_id("NULL"), None);
        assert_eq!(normalize_coupon_id(" SPRING25 "), Some("SPRING25".into()));
    }

    #[test]
    fn test_percent_quote_rounds_half_away_from_zero() {
        let q = quote(dec!(10.05), "USD", &percent(dec!(50))).unwrap();
        assert_eq!(q.price, dec!(5.03));
        assert_eq!(q.discount_amount, dec!(5.02));
        assert_eq!(q.discount.kind(), "percent_off");
    }

    #[test]
    fn test_full_discount_is_free_not_below_minimum() {
        let q = quote(dec!(49.00), "USD", &percent(dec!(100))).unwrap();
        assert_eq!(q.price, Decimal::ZERO);
        assert!(!q.below_minimum);
        assert_eq!(q.ui_state, UiState::Paid);
        assert!(q.show_sections.paid_enrollment);
    }

    #[test]
    fn test_amount_off_never_goes_negative() {
        let q = quote(dec!(5.00), "USD", &amount(1_000, "usd")).unwrap();
        assert_eq!(q.price, Decimal::ZERO);
        assert_eq!(q.discount_amount, dec!(5.00));
    }

    #[test]
    fn test_amount_off_zero_decimal_currency() {
        let q = quote(dec!(1000), "JPY", &amount(300, "jpy")).unwrap();
        assert_eq!(q.discount, Discount::AmountOff(dec!(300)));
        assert_eq!(q.price, dec!(700));
    }

    #[test]
    fn test_coupon_without_discount_is_unsupported() {
        let coupon = ProviderCoupon {
            id: "ODD".into(),
            valid: true,
            ..Default::default()
        };
        assert_eq!(
            quote(dec!(10), "USD", &coupon),
            Err(CouponRejection::UnsupportedType)
        );
    }

    #[test]
    fn test_coupon_name_falls_back_to_id() {
        let q = quote(dec!(10), "USD", &amount(100, "usd")).unwrap();
        assert_eq!(q.coupon_name, "FLAT");
    }

    #[test]
    fn test_check_redeemable() {
        let now = datetime!(2025-06-01 00:00 UTC);

        let mut coupon = percent(dec!(10));
        assert!(check_redeemable(&coupon, now).is_ok());

        coupon.redeem_by = Some(datetime!(2025-05-31 00:00 UTC).unix_timestamp());
        assert_eq!(check_redeemable(&coupon, now), Err(CouponRejection::Expired));

        coupon.redeem_by = None;
        coupon.max_redemptions = Some(3);
        coupon.times_redeemed = 3;
        assert_eq!(check_redeemable(&coupon, now), Err(CouponRejection::Exhausted));

        coupon.valid = false;
        assert_eq!(check_redeemable(&coupon, now), Err(CouponRejection::Inactive));
    }
}
