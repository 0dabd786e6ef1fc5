//! Versioned upgrade steps
//!
//! Each step runs once, when the stored `version` setting is below it, and
//! stamps its version afterwards.

use crate::error::BillingResult;
use crate::settings::{
    StripeMode, KEY_LEGACY_PUBLISHABLE, KEY_LEGACY_SECRET, KEY_LIVE_PUBLISHABLE, KEY_LIVE_SECRET,
    KEY_MODE, KEY_TEST_PUBLISHABLE, KEY_TEST_SECRET, KEY_VERSION,
};
use crate::store::ConfigStore;

pub const LEGACY_TRANSACTIONS_TABLE: &str = "enrol_stripepayment";

pub const STEP_2025082100: i64 = 2025082100;

/// Latest schema/settings version this build knows about
pub const CURRENT_VERSION: i64 = STEP_2025082100;

const LEGACY_DROPPED_COLUMNS: &[&str] = &[
    "business",
    "option_name1",
    "option_selection1_x",
    "option_name2",
    "option_selection2_x",
    "parent_txn_id",
];

const LEGACY_RENAMED_COLUMNS: &[(&str, &str)] = &[
    ("tax", "price"),
    ("receiver_email", "receiveremail"),
    ("receiver_id", "receiverid"),
    ("item_name", "itemname"),
    ("coupon_id", "couponid"),
    ("payment_status", "paymentstatus"),
    ("pending_reason", "pendingreason"),
    ("reason_code", "reasoncode"),
    ("txn_id", "txnid"),
    ("payment_type", "paymenttype"),
];

/// Mode-scoped destination of a legacy single key pair, by key prefix
pub fn classify_legacy_keys(secret: &str, publishable: &str) -> Option<StripeMode> {
    if secret.is_empty() || publishable.is_empty() {
        return None;
    }
    if secret.starts_with("sk_test_") && publishable.starts_with("pk_test_") {
        Some(StripeMode::Test)
    } else if secret.starts_with("sk_live_") && publishable.starts_with("pk_live_") {
        Some(StripeMode::Live)
    } else {
        None
    }
}

/// Apply every step above `from_version`; returns the resulting version
pub async fn run<C: ConfigStore + ?Sized>(store: &C, from_version: i64) -> BillingResult<i64> {
    let mut version = from_version;

    if version < STEP_2025082100 {
        tracing::info!(from_version, to_version = STEP_2025082100, "Running upgrade step");
        upgrade_legacy_table(store).await?;
        migrate_legacy_keys(store).await?;
        store
            .set_config(KEY_VERSION, &STEP_2025082100.to_string())
            .await?;
        version = STEP_2025082100;
    }

    Ok(version)
}

/// Read the stored version and run pending steps
pub async fn run_pending<C: ConfigStore + ?Sized>(store: &C) -> BillingResult<i64> {
    let config = store.load_config().await?;
    let stored = config
        .get(KEY_VERSION)
        .and_then(|v| v.trim().parse::<i64>().ok())
        .unwrap_or(0);

    if stored >= CURRENT_VERSION {
        tracing::debug!(version = stored, "Settings up to date");
        return Ok(stored);
    }
    run(store, stored).await
}

async fn upgrade_legacy_table<C: ConfigStore + ?Sized>(store: &C) -> BillingResult<()> {
    let columns = store.table_columns(LEGACY_TRANSACTIONS_TABLE).await?;
    if columns.is_empty() {
        tracing::debug!(table = LEGACY_TRANSACTIONS_TABLE, "No legacy table, skipping column upgrade");
        return Ok(());
    }
    let has = |name: &str| columns.iter().any(|c| c == name);

    for &column in LEGACY_DROPPED_COLUMNS {
        if has(column) {
            store.drop_column(LEGACY_TRANSACTIONS_TABLE, column).await?;
            tracing::info!(column, "Dropped legacy column");
        }
    }

    for &(from, to) in LEGACY_RENAMED_COLUMNS {
        if has(from) && !has(to) {
            store.rename_column(LEGACY_TRANSACTIONS_TABLE, from, to).await?;
            tracing::info!(from, to, "Renamed legacy column");
        }
    }

    Ok(())
}

async fn migrate_legacy_keys<C: ConfigStore + ?Sized>(store: &C) -> BillingResult<()> {
    let config = store.load_config().await?;
    let get = |key: &str| config.get(key).map(|v| v.trim()).unwrap_or_default();

    let secret = get(KEY_LEGACY_SECRET);
    let publishable = get(KEY_LEGACY_PUBLISHABLE);

    let Some(mode) = classify_legacy_keys(secret, publishable) else {
        if !secret.is_empty() || !publishable.is_empty() {
            tracing::warn!("Legacy Stripe keys present but not a matching test/live pair, left in place");
        }
        return Ok(());
    };

    let (secret_key, publishable_key) = match mode {
        StripeMode::Test => (KEY_TEST_SECRET, KEY_TEST_PUBLISHABLE),
        StripeMode::Live => (KEY_LIVE_SECRET, KEY_LIVE_PUBLISHABLE),
    };

    store.set_config(publishable_key, publishable).await?;
    store.set_config(secret_key, secret).await?;
    store.set_config(KEY_MODE, mode.as_str()).await?;
    store.set_config(KEY_LEGACY_PUBLISHABLE, "").await?;
    store.set_config(KEY_LEGACY_SECRET, "").await?;

    tracing::info!(mode = %mode, "Migrated legacy Stripe keys");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryStore;

    #[test]
    fn test_classify_legacy_keys() {
        assert_eq!(classify_legacy_keys("sk_test_a", "pk_test_b"), Some(StripeMode::Test));
        assert_eq!(classify_legacy_keys("sk_live_a", "pk_live_b"), Some(StripeMode::Live));
        assert_eq!(classify_legacy_keys("sk_live_a", "pk_test_b"), None);
        assert_eq!(classify_legacy_keys("", "pk_test_b"), None);
        assert_eq!(classify_legacy_keys("rk_live_a", "pk_live_b"), None);
    }

    #[tokio::test]
    async fn test_migrates_live_pair_and_clears_legacy() {
        let store = MemoryStore::default();
        store.set_config(KEY_LEGACY_SECRET, "sk_live_abc").await.unwrap();
        store.set_config(KEY_LEGACY_PUBLISHABLE, "pk_live_def").await.unwrap();

        let version = run_pending(&store).await.unwrap();
        assert_eq!(version, STEP_2025082100);

        let config = store.load_config().await.unwrap();
        assert_eq!(config[KEY_LIVE_SECRET], "sk_live_abc");
        assert_eq!(config[KEY_LIVE_PUBLISHABLE], "pk_live_def");
        assert_eq!(config[KEY_MODE], "live");
        assert_eq!(config[KEY_LEGACY_SECRET], "");
        assert_eq!(config[KEY_LEGACY_PUBLISHABLE], "");
        assert_eq!(config[KEY_VERSION], "2025082100");
    }

    #[tokio::test]
    async fn test_mismatched_legacy_keys_left_alone() {
        let store = MemoryStore::default();
        store.set_config(KEY_LEGACY_SECRET, "sk_live_abc").await.unwrap();
        store.set_config(KEY_LEGACY_PUBLISHABLE, "pk_test_def").await.unwrap();

        run(&store, 0).await.unwrap();

        let config = store.load_config().await.unwrap();
        assert_eq!(config[KEY_LEGACY_SECRET], "sk_live_abc");
        assert!(!config.contains_key(KEY_LIVE_SECRET));
        assert!(!config.contains_key(KEY_TEST_SECRET));
    }

    #[tokio::test]
    async fn test_legacy_table_columns_upgraded() {
        let store = MemoryStore::default();
        store.add_table(
            LEGACY_TRANSACTIONS_TABLE,
            &["id", "business", "tax", "receiver_email", "txn_id", "courseid"],
        );

        run(&store, 0).await.unwrap();

        assert_eq!(
            store.table_columns(LEGACY_TRANSACTIONS_TABLE).await.unwrap(),
            vec!["id", "price", "receiveremail", "txnid", "courseid"]
        );
    }

    #[tokio::test]
    async fn test_steps_run_once() {
        let store = MemoryStore::default();
        store
            .set_config(KEY_VERSION, &CURRENT_VERSION.to_string())
            .await
            .unwrap();
        store.set_config(KEY_LEGACY_SECRET, "sk_test_abc").await.unwrap();
        store.set_config(KEY_LEGACY_PUBLISHABLE, "pk_test_def").await.unwrap();

        run_pending(&store).await.unwrap();

        let config = store.load_config().await.unwrap();
        assert_eq!(config[KEY_LEGACY_SECRET], "sk_test_abc");
        assert!(!config.contains_key(KEY_TEST_SECRET));
    }

    #[tokio::test]
    async fn test_missing_legacy_table_is_noop() {
        let store = MemoryStore::default();
        assert_eq!(run(&store, 0).await.unwrap(), STEP_2025082100);
        assert!(store
            .table_columns(LEGACY_TRANSACTIONS_TABLE)
            .await
            .unwrap()
            .is_empty());
    }
}
