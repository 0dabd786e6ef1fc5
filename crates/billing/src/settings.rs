//! Plugin settings
//!
//! Settings live in the `plugin_config` name/value table and are loaded once
//! at start-up, after upgrade steps have run.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::currency;

pub const KEY_MODE: &str = "stripemode";
pub const KEY_TEST_SECRET: &str = "testsecretkey";
pub const KEY_TEST_PUBLISHABLE: &str = "testpublishablekey";
pub const KEY_LIVE_SECRET: &str = "livesecretkey";
pub const KEY_LIVE_PUBLISHABLE: &str = "livepublishablekey";
pub const KEY_LEGACY_SECRET: &str = "secretkey";
pub const KEY_LEGACY_PUBLISHABLE: &str = "publishablekey";
pub const KEY_MAIL_STUDENTS: &str = "mailstudents";
pub const KEY_MAIL_TEACHERS: &str = "mailteachers";
pub const KEY_MAIL_ADMINS: &str = "mailadmins";
pub const KEY_COST: &str = "cost";
pub const KEY_CURRENCY: &str = "currency";
pub const KEY_WEBSERVICE_TOKEN: &str = "webservice_token";
pub const KEY_VERSION: &str = "version";

/// Which Stripe key pair is active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StripeMode {
    #[default]
    Test,
    Live,
}

impl StripeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StripeMode::Test => "test",
            StripeMode::Live => "live",
        }
    }

    /// Anything other than "live" is test mode
    pub fn parse(s: &str) -> Self {
        if s.trim().eq_ignore_ascii_case("live") {
            StripeMode::Live
        } else {
            StripeMode::Test
        }
    }
}

impl std::fmt::Display for StripeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Default)]
pub struct PluginSettings {
    pub mode: StripeMode,
    pub test_secret_key: String,
    pub test_publishable_key: String,
    pub live_secret_key: String,
    pub live_publishable_key: String,
    pub mail_students: bool,
    pub mail_teachers: bool,
    pub mail_admins: bool,
    /// Site-wide default cost, used when an instance has none
    pub default_cost: Decimal,
    pub default_currency: String,
    /// Token embedded in the Stripe return URL
    pub webservice_token: String,
    pub version: i64,
}

impl PluginSettings {
    pub fn from_map(values: &HashMap<String, String>) -> Self {
        let get = |key: &str| values.get(key).map(|v| v.trim().to_string()).unwrap_or_default();
        let flag = |key: &str| matches!(get(key).as_str(), "1" | "true" | "yes" | "on");

        Self {
            mode: StripeMode::parse(&get(KEY_MODE)),
            test_secret_key: get(KEY_TEST_SECRET),
            test_publishable_key: get(KEY_TEST_PUBLISHABLE),
            live_secret_key: get(KEY_LIVE_SECRET),
            live_publishable_key: get(KEY_LIVE_PUBLISHABLE),
            mail_students: flag(KEY_MAIL_STUDENTS),
            mail_teachers: flag(KEY_MAIL_TEACHERS),
            mail_admins: flag(KEY_MAIL_ADMINS),
            default_cost: get(KEY_COST).parse().unwrap_or(Decimal::ZERO),
            default_currency: currency::normalize(&get(KEY_CURRENCY)),
            webservice_token: get(KEY_WEBSERVICE_TOKEN),
            version: get(KEY_VERSION).parse().unwrap_or(0),
        }
    }

    /// Secret key for the active mode, `None` when unset
    pub fn secret_key(&self) -> Option<&str> {
        let key = match self.mode {
            StripeMode::Test => &self.test_secret_key,
            StripeMode::Live => &self.live_secret_key,
        };
        (!key.is_empty()).then_some(key.as_str())
    }

    pub fn publishable_key(&self) -> Option<&str> {
        let key = match self.mode {
            StripeMode::Test => &self.test_publishable_key,
            StripeMode::Live => &self.live_publishable_key,
        };
        (!key.is_empty()).then_some(key.as_str())
    }

    pub fn webservice_token(&self) -> Option<&str> {
        (!self.webservice_token.is_empty()).then_some(self.webservice_token.as_str())
    }

    /// One-line summary for start-up logs
    pub fn mode_status(&self) -> String {
        let configured = self.secret_key().is_some() && self.publishable_key().is_some();
        format!(
            "{} mode ({})",
            self.mode,
            if configured {
                "keys configured"
            } else {
                "keys missing"
            }
        )
    }
}

/// Site identity used in URLs and message bodies
#[derive(Debug, Clone)]
pub struct SiteConfig {
    /// Public root URL without trailing slash
    pub wwwroot: String,
    pub site_name: String,
    /// Public root of this service, for Stripe return URLs
    pub api_url: String,
}

impl SiteConfig {
    pub fn new(wwwroot: &str, site_name: &str) -> Self {
        let wwwroot = wwwroot.trim_end_matches('/').to_string();
        Self {
            api_url: wwwroot.clone(),
            wwwroot,
            site_name: site_name.to_string(),
        }
    }

    pub fn with_api_url(mut self, api_url: &str) -> Self {
        self.api_url = api_url.trim_end_matches('/').to_string();
        self
    }

    pub fn course_url(&self, course_id: i64) -> String {
        format!("{}/course/view.php?id={}", self.wwwroot, course_id)
    }

    pub fn home_url(&self) -> String {
        self.wwwroot.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let settings = PluginSettings::from_map(&HashMap::new());
        assert_eq!(settings.mode, StripeMode::Test);
        assert_eq!(settings.default_currency, "USD");
        assert_eq!(settings.default_cost, Decimal::ZERO);
        assert!(settings.secret_key().is_none());
        assert!(!settings.mail_admins);
    }

    #[test]
    fn test_secret_key_follows_mode() {
        let values = map(&[
            (KEY_TEST_SECRET, "sk_test_abc"),
            (KEY_LIVE_SECRET, "sk_live_xyz"),
        ]);
        let test = PluginSettings::from_map(&values);
        assert_eq!(test.secret_key(), Some("sk_test_abc"));

        let mut values = values;
        values.insert(KEY_MODE.into(), "live".into());
        let live = PluginSettings::from_map(&values);
        assert_eq!(live.secret_key(), Some("sk_live_xyz"));
    }

    #[test]
    fn test_flags_and_cost() {
        let settings = PluginSettings::from_map(&map(&[
            (KEY_MAIL_STUDENTS, "1"),
            (KEY_MAIL_TEACHERS, "0"),
            (KEY_MAIL_ADMINS, "true"),
            (KEY_COST, "25.50"),
            (KEY_CURRENCY, "eur"),
        ]));
        assert!(settings.mail_students);
        assert!(!settings.mail_teachers);
        assert!(settings.mail_admins);
        assert_eq!(settings.default_cost, Decimal::new(2550, 2));
        assert_eq!(settings.default_currency, "EUR");
    }

    #[test]
    fn test_site_urls() {
        let site = SiteConfig::new("https://learn.example.com/", "Example");
        assert_eq!(site.home_url(), "https://learn.example.com");
        assert_eq!(site.api_url, "https://learn.example.com");
        let site = site.with_api_url("https://pay.example.com/");
        assert_eq!(site.api_url, "https://pay.example.com");
        assert_eq!(
            site.course_url(7),
            "https://learn.example.com/course/view.php?id=7"
        );
    }
}
