//! Storage seam
//!
//! Records owned by the host course platform (instances, courses, users,
//! enrolments) are read through [`EnrolmentStore`]; the tables this crate
//! owns (customer mappings, transactions) are written through it.

use std::collections::HashMap;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use time::OffsetDateTime;

use crate::error::BillingResult;

/// Per-course enrolment configuration (read-only here)
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct EnrolmentInstance {
    pub id: i64,
    pub course_id: i64,
    pub name: String,
    pub cost: Decimal,
    pub currency: String,
    pub role_id: i64,
    /// Zero means unlimited
    pub enrol_period_secs: i64,
    pub enrol_start_date: Option<OffsetDateTime>,
    pub enrol_end_date: Option<OffsetDateTime>,
    /// Zero means no limit
    pub max_enrolled: i32,
}

impl EnrolmentInstance {
    pub fn enrol_period(&self) -> Option<time::Duration> {
        (self.enrol_period_secs > 0).then(|| time::Duration::seconds(self.enrol_period_secs))
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Course {
    pub id: i64,
    pub fullname: String,
    pub shortname: String,
}

/// Permission scope of a course
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CourseContext {
    pub course_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub firstname: String,
    pub lastname: String,
}

impl User {
    pub fn fullname(&self) -> String {
        format!("{} {}", self.firstname, self.lastname)
            .trim()
            .to_string()
    }
}

/// Local email -> Stripe customer association
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct CustomerMapping {
    pub email: String,
    pub customer_id: String,
    pub user_id: i64,
    pub updated_at: OffsetDateTime,
}

/// Row written once per confirmed payment
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewTransaction {
    pub user_id: i64,
    pub course_id: i64,
    pub instance_id: i64,
    pub coupon_id: Option<String>,
    pub receiver_email: String,
    pub receiver_id: Option<String>,
    pub txn_id: String,
    pub price: Decimal,
    pub memo: String,
    pub payment_status: String,
    pub pending_reason: String,
    pub reason_code: String,
    pub item_name: String,
    pub payment_type: String,
}

/// `[start, end)`; `end == None` means unbounded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EnrolmentWindow {
    pub start: OffsetDateTime,
    pub end: Option<OffsetDateTime>,
}

impl EnrolmentWindow {
    pub fn starting_at(start: OffsetDateTime, period: Option<time::Duration>) -> Self {
        Self {
            start,
            end: period.map(|p| start + p),
        }
    }

    pub fn contains(&self, at: OffsetDateTime) -> bool {
        at >= self.start && self.end.map_or(true, |end| at < end)
    }
}

#[async_trait]
pub trait EnrolmentStore: Send + Sync {
    /// Instance with the given id, only if enabled
    async fn active_instance(&self, instance_id: i64) -> BillingResult<Option<EnrolmentInstance>>;

    async fn course(&self, course_id: i64) -> BillingResult<Option<Course>>;

    async fn course_context(&self, course_id: i64) -> BillingResult<Option<CourseContext>>;

    async fn user(&self, user_id: i64) -> BillingResult<Option<User>>;

    async fn count_enrolments(&self, instance_id: i64) -> BillingResult<i64>;

    async fn customer_mapping(&self, email: &str) -> BillingResult<Option<CustomerMapping>>;

    /// Insert or refresh the mapping for `email`
    async fn save_customer_mapping(
        &self,
        email: &str,
        user_id: i64,
        customer_id: &str,
    ) -> BillingResult<()>;

    /// Insert the transaction and grant (or renew) the instance's role for
    /// the window as one unit: on error neither is kept.
    ///
    /// Returns `false`, granting nothing, when a row with the same `txn_id`
    /// already exists.
    async fn record_and_enrol(
        &self,
        txn: &NewTransaction,
        instance: &EnrolmentInstance,
        window: EnrolmentWindow,
    ) -> BillingResult<bool>;

    /// Active enrolment in any instance of the course right now
    async fn is_enrolled(&self, course_id: i64, user_id: i64) -> BillingResult<bool>;

    /// Highest-authority user allowed to update the course
    async fn course_teacher(&self, course_id: i64) -> BillingResult<Option<User>>;

    /// Site administrators, primary admin first
    async fn site_admins(&self) -> BillingResult<Vec<User>>;
}

/// Settings table and schema primitives used by [`crate::upgrade`]
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn load_config(&self) -> BillingResult<HashMap<String, String>>;

    async fn set_config(&self, name: &str, value: &str) -> BillingResult<()>;

    /// Column names of `table`, empty when the table does not exist
    async fn table_columns(&self, table: &str) -> BillingResult<Vec<String>>;

    async fn drop_column(&self, table: &str, column: &str) -> BillingResult<()>;

    async fn rename_column(&self, table: &str, from: &str, to: &str) -> BillingResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_unbounded_window() {
        let start = datetime!(2025-01-01 00:00 UTC);
        let window = EnrolmentWindow::starting_at(start, None);
        assert_eq!(window.end, None);
        assert!(window.contains(datetime!(2099-01-01 00:00 UTC)));
        assert!(!window.contains(datetime!(2024-12-31 23:59 UTC)));
    }

    #[test]
    fn test_bounded_window_is_half_open() {
        let start = datetime!(2025-01-01 00:00 UTC);
        let window = EnrolmentWindow::starting_at(start, Some(time::Duration::days(30)));
        assert_eq!(window.end, Some(datetime!(2025-01-31 00:00 UTC)));
        assert!(window.contains(datetime!(2025-01-30 23:59 UTC)));
        assert!(!window.contains(datetime!(2025-01-31 00:00 UTC)));
    }

    #[test]
    fn test_enrol_period() {
        let mut instance = EnrolmentInstance {
            id: 1,
            course_id: 2,
            name: String::new(),
            cost: Decimal::ZERO,
            currency: "USD".into(),
            role_id: 5,
            enrol_period_secs: 0,
            enrol_start_date: None,
            enrol_end_date: None,
            max_enrolled: 0,
        };
        assert!(instance.enrol_period().is_none());
        instance.enrol_period_secs = 86_400;
        assert_eq!(instance.enrol_period(), Some(time::Duration::days(1)));
    }

    #[test]
    fn test_user_fullname() {
        let user = User {
            id: 1,
            email: "a@example.com".into(),
            firstname: "Ada".into(),
            lastname: "Lovelace".into(),
        };
        assert_eq!(user.fullname(), "Ada Lovelace");
    }
}
