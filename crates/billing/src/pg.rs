//! Postgres-backed store

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::PgPool;

use crate::error::BillingResult;
use crate::store::{
    ConfigStore, Course, CourseContext, CustomerMapping, EnrolmentInstance, EnrolmentStore,
    EnrolmentWindow, NewTransaction, User,
};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Double-quoted SQL identifier
fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

#[async_trait]
impl EnrolmentStore for PgStore {
    async fn active_instance(&self, instance_id: i64) -> BillingResult<Option<EnrolmentInstance>> {
        let instance = sqlx::query_as::<_, EnrolmentInstance>(
            r#"
            SELECT id, course_id, name, cost, currency, role_id, enrol_period_secs,
                   enrol_start_date, enrol_end_date, max_enrolled
            FROM enrol_instances
            WHERE id = $1 AND status = 0
            "#,
        )
        .bind(instance_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(instance)
    }

    async fn course(&self, course_id: i64) -> BillingResult<Option<Course>> {
        let course = sqlx::query_as::<_, Course>(
            "SELECT id, fullname, shortname FROM courses WHERE id = $1",
        )
        .bind(course_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(course)
    }

    async fn course_context(&self, course_id: i64) -> BillingResult<Option<CourseContext>> {
        let id: Option<i64> = sqlx::query_scalar("SELECT id FROM courses WHERE id = $1")
            .bind(course_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(id.map(|course_id| CourseContext { course_id }))
    }

    async fn user(&self, user_id: i64) -> BillingResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, email, firstname, lastname FROM users WHERE id = $1 AND NOT deleted",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn count_enrolments(&self, instance_id: i64) -> BillingResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM user_enrolments WHERE instance_id = $1")
                .bind(instance_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }

    async fn customer_mapping(&self, email: &str) -> BillingResult<Option<CustomerMapping>> {
        let mapping = sqlx::query_as::<_, CustomerMapping>(
            "SELECT email, customer_id, user_id, updated_at FROM stripe_customers WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(mapping)
    }

    async fn save_customer_mapping(
        &self,
        email: &str,
        user_id: i64,
        customer_id: &str,
    ) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO stripe_customers (email, customer_id, user_id, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (email) DO UPDATE
            SET customer_id = EXCLUDED.customer_id,
                user_id = EXCLUDED.user_id,
                updated_at = NOW()
            "#,
        )
        .bind(email)
        .bind(customer_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        tracing::debug!(user_id, customer_id, "Saved Stripe customer mapping");
        Ok(())
    }

    async fn record_and_enrol(
        &self,
        txn: &NewTransaction,
        instance: &EnrolmentInstance,
        window: EnrolmentWindow,
    ) -> BillingResult<bool> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO stripe_transactions (
                user_id, course_id, instance_id, coupon_id, receiver_email, receiver_id,
                txn_id, price, memo, payment_status, pending_reason, reason_code,
                item_name, payment_type
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (txn_id) DO NOTHING
            "#,
        )
        .bind(txn.user_id)
        .bind(txn.course_id)
        .bind(txn.instance_id)
        .bind(&txn.coupon_id)
        .bind(&txn.receiver_email)
        .bind(&txn.receiver_id)
        .bind(&txn.txn_id)
        .bind(txn.price)
        .bind(&txn.memo)
        .bind(&txn.payment_status)
        .bind(&txn.pending_reason)
        .bind(&txn.reason_code)
        .bind(&txn.item_name)
        .bind(&txn.payment_type)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            == 1;

        if !inserted {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO user_enrolments (instance_id, user_id, status, time_start, time_end)
            VALUES ($1, $2, 0, $3, $4)
            ON CONFLICT (instance_id, user_id) DO UPDATE
            SET status = 0,
                time_start = EXCLUDED.time_start,
                time_end = EXCLUDED.time_end,
                updated_at = NOW()
            "#,
        )
        .bind(instance.id)
        .bind(txn.user_id)
        .bind(window.start)
        .bind(window.end)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO role_assignments (course_id, user_id, role_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (course_id, user_id, role_id) DO NOTHING
            "#,
        )
        .bind(instance.course_id)
        .bind(txn.user_id)
        .bind(instance.role_id)
        .execute(&mut *tx)
        .await?;

        // Dropping `tx` on any error above rolls back the transaction row too
        tx.commit().await?;
        Ok(true)
    }

    async fn is_enrolled(&self, course_id: i64, user_id: i64) -> BillingResult<bool> {
        let enrolled: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1
                FROM user_enrolments ue
                JOIN enrol_instances ei ON ei.id = ue.instance_id
                WHERE ei.course_id = $1
                  AND ue.user_id = $2
                  AND ue.status = 0
                  AND ei.status = 0
                  AND ue.time_start <= NOW()
                  AND (ue.time_end IS NULL OR ue.time_end > NOW())
            )
            "#,
        )
        .bind(course_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(enrolled)
    }

    async fn course_teacher(&self, course_id: i64) -> BillingResult<Option<User>> {
        let teacher = sqlx::query_as::<_, User>(
            r#"
            SELECT u.id, u.email, u.firstname, u.lastname
            FROM role_assignments ra
            JOIN roles r ON r.id = ra.role_id
            JOIN users u ON u.id = ra.user_id
            WHERE ra.course_id = $1
              AND r.can_update_course
              AND NOT u.deleted
            ORDER BY r.sortorder ASC, u.id ASC
            LIMIT 1
            "#,
        )
        .bind(course_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(teacher)
    }

    async fn site_admins(&self) -> BillingResult<Vec<User>> {
        let admins = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, firstname, lastname
            FROM users
            WHERE is_site_admin AND NOT deleted
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(admins)
    }
}

#[async_trait]
impl ConfigStore for PgStore {
    async fn load_config(&self) -> BillingResult<HashMap<String, String>> {
        let rows: Vec<(String, String)> = sqlx::query_as("SELECT name, value FROM plugin_config")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().collect())
    }

    async fn set_config(&self, name: &str, value: &str) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO plugin_config (name, value, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (name) DO UPDATE
            SET value = EXCLUDED.value, updated_at = NOW()
            "#,
        )
        .bind(name)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn table_columns(&self, table: &str) -> BillingResult<Vec<String>> {
        let columns: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT column_name::text
            FROM information_schema.columns
            WHERE table_schema = current_schema() AND table_name = $1
            ORDER BY ordinal_position
            "#,
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        Ok(columns)
    }

    async fn drop_column(&self, table: &str, column: &str) -> BillingResult<()> {
        let sql = format!(
            "ALTER TABLE {} DROP COLUMN IF EXISTS {}",
            quote_ident(table),
            quote_ident(column)
        );
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    async fn rename_column(&self, table: &str, from: &str, to: &str) -> BillingResult<()> {
        let sql = format!(
            "ALTER TABLE {} RENAME COLUMN {} TO {}",
            quote_ident(table),
            quote_ident(from),
            quote_ident(to)
        );
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("receiver_email"), "\"receiver_email\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }
}
