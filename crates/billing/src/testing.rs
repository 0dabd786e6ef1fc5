//! In-memory fakes for the store, provider and notifier seams

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use rust_decimal::Decimal;
use time::OffsetDateTime;

use crate::error::{BillingError, BillingResult};
use crate::notify::{Message, Notifier};
use crate::provider::{
    NewCheckoutSession, PaymentProvider, ProviderCheckoutSession, ProviderCoupon,
    ProviderCustomer, ProviderPaymentIntent, SessionPaymentStatus,
};
use crate::store::{
    ConfigStore, Course, CourseContext, CustomerMapping, EnrolmentInstance, EnrolmentStore,
    EnrolmentWindow, NewTransaction, User,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnrolmentGrant {
    pub instance_id: i64,
    pub course_id: i64,
    pub user_id: i64,
    pub role_id: i64,
    pub window: EnrolmentWindow,
}

#[derive(Default)]
struct StoreState {
    instances: HashMap<i64, EnrolmentInstance>,
    courses: HashMap<i64, Course>,
    users: HashMap<i64, User>,
    teachers: HashMap<i64, User>,
    admins: Vec<User>,
    mappings: HashMap<String, CustomerMapping>,
    transactions: Vec<NewTransaction>,
    grants: Vec<EnrolmentGrant>,
    preset_enrolments: HashMap<i64, i64>,
    hide_enrolments: bool,
    grant_failures: u32,
    config: HashMap<String, String>,
    tables: HashMap<String, Vec<String>>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    /// Enabled 100.00 USD instance, unlimited period, student role 5
    pub fn sample_instance(id: i64, course_id: i64) -> EnrolmentInstance {
        EnrolmentInstance {
            id,
            course_id,
            name: "Stripe".to_string(),
            cost: Decimal::ONE_HUNDRED,
            currency: "USD".to_string(),
            role_id: 5,
            enrol_period_secs: 0,
            enrol_start_date: None,
            enrol_end_date: None,
            max_enrolled: 0,
        }
    }

    pub fn sample_transaction(
        txn_id: &str,
        user_id: i64,
        course_id: i64,
        instance_id: i64,
    ) -> NewTransaction {
        NewTransaction {
            user_id,
            course_id,
            instance_id,
            coupon_id: None,
            receiver_email: "learner@example.com".to_string(),
            receiver_id: Some("cus_1".to_string()),
            txn_id: txn_id.to_string(),
            price: Decimal::ONE_HUNDRED,
            memo: "pm_1".to_string(),
            payment_status: "succeeded".to_string(),
            pending_reason: "NA".to_string(),
            reason_code: "NA".to_string(),
            item_name: "Course".to_string(),
            payment_type: "stripe".to_string(),
        }
    }

    pub fn add_instance(&self, instance: EnrolmentInstance) {
        lock(&self.state).instances.insert(instance.id, instance);
    }

    pub fn add_course(&self, course: Course) {
        lock(&self.state).courses.insert(course.id, course);
    }

    pub fn add_user(&self, user: User) {
        lock(&self.state).users.insert(user.id, user);
    }

    pub fn add_teacher(&self, course_id: i64, teacher: User) {
        lock(&self.state).teachers.insert(course_id, teacher);
    }

    pub fn add_admin(&self, id: i64, email: &str) {
        lock(&self.state).admins.push(User {
            id,
            email: email.to_string(),
            firstname: "Admin".to_string(),
            lastname: id.to_string(),
        });
    }

    /// Existing enrolments counted against `max_enrolled`
    pub fn preset_enrolments(&self, instance_id: i64, count: i64) {
        lock(&self.state)
            .preset_enrolments
            .insert(instance_id, count);
    }

    /// Grants are recorded but `is_enrolled` reports false
    pub fn hide_enrolments(&self) {
        lock(&self.state).hide_enrolments = true;
    }

    /// The next `times` record-and-enrol calls fail and keep nothing
    pub fn fail_grants(&self, times: u32) {
        lock(&self.state).grant_failures = times;
    }

    pub fn add_table(&self, name: &str, columns: &[&str]) {
        lock(&self.state).tables.insert(
            name.to_string(),
            columns.iter().map(|c| c.to_string()).collect(),
        );
    }

    pub fn transactions(&self) -> Vec<NewTransaction> {
        lock(&self.state).transactions.clone()
    }

    pub fn enrolment_grants(&self) -> Vec<EnrolmentGrant> {
        lock(&self.state).grants.clone()
    }
}

#[async_trait]
impl EnrolmentStore for MemoryStore {
    async fn active_instance(&self, instance_id: i64) -> BillingResult<Option<EnrolmentInstance>> {
        Ok(lock(&self.state).instances.get(&instance_id).cloned())
    }

    async fn course(&self, course_id: i64) -> BillingResult<Option<Course>> {
        Ok(lock(&self.state).courses.get(&course_id).cloned())
    }

    async fn course_context(&self, course_id: i64) -> BillingResult<Option<CourseContext>> {
        Ok(lock(&self.state)
            .courses
            .contains_key(&course_id)
            .then_some(CourseContext { course_id }))
    }

    async fn user(&self, user_id: i64) -> BillingResult<Option<User>> {
        Ok(lock(&self.state).users.get(&user_id).cloned())
    }

    async fn count_enrolments(&self, instance_id: i64) -> BillingResult<i64> {
        let state = lock(&self.state);
        let granted = state
            .grants
            .iter()
            .filter(|g| g.instance_id == instance_id)
            .count() as i64;
        Ok(granted + state.preset_enrolments.get(&instance_id).copied().unwrap_or(0))
    }

    async fn customer_mapping(&self, email: &str) -> BillingResult<Option<CustomerMapping>> {
        Ok(lock(&self.state).mappings.get(email).cloned())
    }

    async fn save_customer_mapping(
        &self,
        email: &str,
        user_id: i64,
        customer_id: &str,
    ) -> BillingResult<()> {
        lock(&self.state).mappings.insert(
            email.to_string(),
            CustomerMapping {
                email: email.to_string(),
                customer_id: customer_id.to_string(),
                user_id,
                updated_at: OffsetDateTime::now_utc(),
            },
        );
        Ok(())
    }

    async fn record_and_enrol(
        &self,
        txn: &NewTransaction,
        instance: &EnrolmentInstance,
        window: EnrolmentWindow,
    ) -> BillingResult<bool> {
        let mut state = lock(&self.state);
        if state.transactions.iter().any(|t| t.txn_id == txn.txn_id) {
            return Ok(false);
        }
        if state.grant_failures > 0 {
            state.grant_failures -= 1;
            return Err(BillingError::Database("connection reset".to_string()));
        }
        state.transactions.push(txn.clone());
        state
            .grants
            .retain(|g| !(g.instance_id == instance.id && g.user_id == txn.user_id));
        state.grants.push(EnrolmentGrant {
            instance_id: instance.id,
            course_id: instance.course_id,
            user_id: txn.user_id,
            role_id: instance.role_id,
            window,
        });
        Ok(true)
    }

    async fn is_enrolled(&self, course_id: i64, user_id: i64) -> BillingResult<bool> {
        let state = lock(&self.state);
        if state.hide_enrolments {
            return Ok(false);
        }
        let now = OffsetDateTime::now_utc();
        Ok(state
            .grants
            .iter()
            .any(|g| g.course_id == course_id && g.user_id == user_id && g.window.contains(now)))
    }

    async fn course_teacher(&self, course_id: i64) -> BillingResult<Option<User>> {
        Ok(lock(&self.state).teachers.get(&course_id).cloned())
    }

    async fn site_admins(&self) -> BillingResult<Vec<User>> {
        Ok(lock(&self.state).admins.clone())
    }
}

#[async_trait]
impl ConfigStore for MemoryStore {
    async fn load_config(&self) -> BillingResult<HashMap<String, String>> {
        Ok(lock(&self.state).config.clone())
    }

    async fn set_config(&self, name: &str, value: &str) -> BillingResult<()> {
        lock(&self.state)
            .config
            .insert(name.to_string(), value.to_string());
        Ok(())
    }

    async fn table_columns(&self, table: &str) -> BillingResult<Vec<String>> {
        Ok(lock(&self.state).tables.get(table).cloned().unwrap_or_default())
    }

    async fn drop_column(&self, table: &str, column: &str) -> BillingResult<()> {
        if let Some(columns) = lock(&self.state).tables.get_mut(table) {
            columns.retain(|c| c != column);
        }
        Ok(())
    }

    async fn rename_column(&self, table: &str, from: &str, to: &str) -> BillingResult<()> {
        if let Some(columns) = lock(&self.state).tables.get_mut(table) {
            for column in columns.iter_mut().filter(|c| c.as_str() == from) {
                *column = to.to_string();
            }
        }
        Ok(())
    }
}

#[derive(Default)]
struct ProviderState {
    coupons: HashMap<String, ProviderCoupon>,
    customers: Vec<ProviderCustomer>,
    created_customers: Vec<ProviderCustomer>,
    sessions: HashMap<String, ProviderCheckoutSession>,
    created_sessions: Vec<NewCheckoutSession>,
    intents: HashMap<String, ProviderPaymentIntent>,
    customer_retrieve_error: Option<String>,
    customer_create_error: Option<String>,
    session_create_error: Option<String>,
}

/// Scriptable stand-in for Stripe
#[derive(Default)]
pub struct MockProvider {
    state: Mutex<ProviderState>,
}

impl MockProvider {
    pub fn add_coupon(&self, coupon: ProviderCoupon) {
        lock(&self.state).coupons.insert(coupon.id.clone(), coupon);
    }

    pub fn add_customer(&self, id: &str, email: &str) {
        lock(&self.state).customers.push(ProviderCustomer {
            id: id.to_string(),
            email: Some(email.to_string()),
        });
    }

    pub fn add_session(&self, session: ProviderCheckoutSession) {
        lock(&self.state)
            .sessions
            .insert(session.id.clone(), session);
    }

    pub fn add_intent(&self, intent: ProviderPaymentIntent) {
        lock(&self.state).intents.insert(intent.id.clone(), intent);
    }

    /// Non-"missing" failure on every customer retrieve
    pub fn fail_customer_retrieve(&self, message: &str) {
        lock(&self.state).customer_retrieve_error = Some(message.to_string());
    }

    pub fn fail_customer_create(&self, message: &str) {
        lock(&self.state).customer_create_error = Some(message.to_string());
    }

    pub fn fail_session_create(&self, message: &str) {
        lock(&self.state).session_create_error = Some(message.to_string());
    }

    pub fn created_customers(&self) -> Vec<ProviderCustomer> {
        lock(&self.state).created_customers.clone()
    }

    pub fn created_sessions(&self) -> Vec<NewCheckoutSession> {
        lock(&self.state).created_sessions.clone()
    }
}

#[async_trait]
impl PaymentProvider for MockProvider {
    async fn retrieve_coupon(&self, coupon_id: &str) -> BillingResult<ProviderCoupon> {
        lock(&self.state)
            .coupons
            .get(coupon_id)
            .cloned()
            .ok_or_else(|| {
                BillingError::StripeResourceMissing(format!("No such coupon: '{}'", coupon_id))
            })
    }

    async fn retrieve_customer(&self, customer_id: &str) -> BillingResult<ProviderCustomer> {
        let state = lock(&self.state);
        if let Some(message) = &state.customer_retrieve_error {
            return Err(BillingError::StripeApi(message.clone()));
        }
        state
            .customers
            .iter()
            .find(|c| c.id == customer_id)
            .cloned()
            .ok_or_else(|| {
                BillingError::StripeResourceMissing(format!("No such customer: '{}'", customer_id))
            })
    }

    async fn find_customers_by_email(&self, email: &str) -> BillingResult<Vec<ProviderCustomer>> {
        Ok(lock(&self.state)
            .customers
            .iter()
            .filter(|c| c.email.as_deref() == Some(email))
            .cloned()
            .collect())
    }

    async fn create_customer(&self, email: &str, _name: &str) -> BillingResult<ProviderCustomer> {
        let mut state = lock(&self.state);
        if let Some(message) = &state.customer_create_error {
            return Err(BillingError::StripeApi(message.clone()));
        }
        let customer = ProviderCustomer {
            id: format!("cus_mock_{}", state.customers.len() + 1),
            email: Some(email.to_string()),
        };
        state.customers.push(customer.clone());
        state.created_customers.push(customer.clone());
        Ok(customer)
    }

    async fn create_checkout_session(
        &self,
        params: &NewCheckoutSession,
    ) -> BillingResult<ProviderCheckoutSession> {
        let mut state = lock(&self.state);
        if let Some(message) = &state.session_create_error {
            return Err(BillingError::StripeApi(message.clone()));
        }
        state.created_sessions.push(params.clone());
        let id = format!("cs_test_mock_{}", state.created_sessions.len());
        let session = ProviderCheckoutSession {
            url: Some(format!("https://checkout.stripe.com/c/pay/{}", id)),
            id: id.clone(),
            payment_status: SessionPaymentStatus::Unpaid,
            payment_intent_id: None,
            customer_id: Some(params.customer_id.clone()),
            customer_email: None,
        };
        state.sessions.insert(id, session.clone());
        Ok(session)
    }

    async fn retrieve_checkout_session(
        &self,
        session_id: &str,
    ) -> BillingResult<ProviderCheckoutSession> {
        lock(&self.state)
            .sessions
            .get(session_id)
            .cloned()
            .ok_or_else(|| {
                BillingError::StripeResourceMissing(format!(
                    "No such checkout.session: '{}'",
                    session_id
                ))
            })
    }

    async fn retrieve_payment_intent(
        &self,
        intent_id: &str,
    ) -> BillingResult<ProviderPaymentIntent> {
        lock(&self.state)
            .intents
            .get(intent_id)
            .cloned()
            .ok_or_else(|| {
                BillingError::StripeResourceMissing(format!(
                    "No such payment_intent: '{}'",
                    intent_id
                ))
            })
    }
}

/// Keeps every delivered message; `failing()` rejects them all
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Message>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            sent: Mutex::default(),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<Message> {
        lock(&self.sent).clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, message: &Message) -> BillingResult<()> {
        if self.fail {
            return Err(BillingError::Notification("mailbox unavailable".into()));
        }
        lock(&self.sent).push(message.clone());
        Ok(())
    }
}
