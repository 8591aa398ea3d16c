//! Ledger repository
//!
//! Row types and SQL for accounts, charges, referral relations, and prepaid
//! codes. Locking
//! statements take a `&mut PgConnection` so they run on the caller's
//! transaction; read-only statements run on the pool.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use core_kernel::{ChargeId, Money, UserId};
use domain_ledger::charge::NON_QUALIFYING_TYPES;
use domain_ledger::{
    Account, AccountFilter, Charge, ChargeFilter, ChargeTotals, Invitee, Pagination, PreCharge, PreChargeFilter,
    SortDirection,
};

use crate::error::DatabaseError;

const ACCOUNT_COLUMNS: &str = "user_id, balance, frozen_balance, consumption, level, owed, inviter, \
     deleted, created_at, updated_at, deleted_at";

const CHARGE_COLUMNS: &str = "charge_id, user_id, operator, value, type AS charge_type, come_from, \
     trading_number, charge_time, remarks, created_at";

const INVITEE_COLUMNS: &str = "inviter, invitee, charged, reward_value, created_at, rewarded_at";

const PRECHARGE_COLUMNS: &str = "code, price, operator, user_id, used, dispatched, deleted, remarks, \
     expired_at, created_at, used_at, deleted_at";

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AccountRow {
    pub user_id: String,
    pub balance: Decimal,
    pub frozen_balance: Decimal,
    pub consumption: Decimal,
    pub level: i32,
    pub owed: bool,
    pub inviter: Option<String>,
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl From<AccountRow> for Account {
    fn from(row: AccountRow) -> Self {
        Account {
            user_id: UserId::new(row.user_id),
            balance: Money::new(row.balance),
            frozen_balance: Money::new(row.frozen_balance),
            consumption: Money::new(row.consumption),
            level: row.level,
            owed: row.owed,
            inviter: row.inviter.map(UserId::new),
            deleted: row.deleted,
            created_at: row.created_at,
            updated_at: row.updated_at,
            deleted_at: row.deleted_at,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ChargeRow {
    pub charge_id: Uuid,
    pub user_id: String,
    pub operator: String,
    pub value: Decimal,
    pub charge_type: String,
    pub come_from: String,
    pub trading_number: Option<String>,
    pub charge_time: DateTime<Utc>,
    pub remarks: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<ChargeRow> for Charge {
    fn from(row: ChargeRow) -> Self {
        Charge {
            charge_id: ChargeId::from_uuid(row.charge_id),
            user_id: UserId::new(row.user_id),
            operator: UserId::new(row.operator),
            value: Money::new(row.value),
            charge_type: row.charge_type.into(),
            come_from: row.come_from,
            trading_number: row.trading_number,
            charge_time: row.charge_time,
            remarks: row.remarks,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct InviteeRow {
    pub inviter: String,
    pub invitee: String,
    pub charged: bool,
    pub reward_value: Decimal,
    pub created_at: DateTime<Utc>,
    pub rewarded_at: Option<DateTime<Utc>>,
}

impl From<InviteeRow> for Invitee {
    fn from(row: InviteeRow) -> Self {
        Invitee {
            inviter: UserId::new(row.inviter),
            invitee: UserId::new(row.invitee),
            charged: row.charged,
            reward_value: Money::new(row.reward_value),
            created_at: row.created_at,
            rewarded_at: row.rewarded_at,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PreChargeRow {
    pub code: String,
    pub price: Decimal,
    pub operator: String,
    pub user_id: Option<String>,
    pub used: bool,
    pub dispatched: bool,
    pub deleted: bool,
    pub remarks: Option<String>,
    pub expired_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl From<PreChargeRow> for PreCharge {
    fn from(row: PreChargeRow) -> Self {
        PreCharge {
            code: row.code,
            price: Money::new(row.price),
            operator: UserId::new(row.operator),
            user_id: row.user_id.map(UserId::new),
            used: row.used,
            dispatched: row.dispatched,
            deleted: row.deleted,
            remarks: row.remarks,
            expired_at: row.expired_at,
            created_at: row.created_at,
            used_at: row.used_at,
            deleted_at: row.deleted_at,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct TotalsRow {
    total_value: Decimal,
    count: i64,
}

fn direction(sort: SortDirection) -> &'static str {
    match sort {
        SortDirection::Ascending => "ASC",
        SortDirection::Descending => "DESC",
    }
}

fn push_page(builder: &mut QueryBuilder<'_, Postgres>, page: &Pagination) {
    if let Some(limit) = page.limit {
        builder.push(" LIMIT ").push_bind(limit);
    }
    if let Some(offset) = page.offset {
        builder.push(" OFFSET ").push_bind(offset);
    }
}

fn push_charge_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &ChargeFilter) {
    builder.push(" WHERE TRUE");
    if let Some(user_id) = &filter.user_id {
        builder.push(" AND user_id = ").push_bind(user_id.as_str().to_string());
    }
    if let Some(charge_type) = &filter.charge_type {
        builder.push(" AND type = ").push_bind(charge_type.as_str().to_string());
    }
    if let Some(range) = filter.time_range {
        builder.push(" AND charge_time >= ").push_bind(range.start());
        builder.push(" AND charge_time < ").push_bind(range.end());
    }
}

fn push_account_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &AccountFilter) {
    builder.push(" WHERE TRUE");
    if !filter.include_deleted {
        builder.push(" AND deleted = FALSE");
    }
    if let Some(owed) = filter.owed {
        builder.push(" AND owed = ").push_bind(owed);
    }
}

fn push_precharge_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &PreChargeFilter) {
    builder.push(" WHERE deleted = FALSE");
    if let Some(user_id) = &filter.user_id {
        builder.push(" AND user_id = ").push_bind(user_id.as_str().to_string());
    }
}

/// Builds the newest-first prepaid code listing
pub fn precharge_query(filter: &PreChargeFilter, page: &Pagination) -> QueryBuilder<'static, Postgres> {
    let mut builder = QueryBuilder::new(format!("SELECT {PRECHARGE_COLUMNS} FROM precharges"));
    push_precharge_filter(&mut builder, filter);
    builder.push(" ORDER BY created_at DESC, code DESC");
    push_page(&mut builder, page);
    builder
}

/// Builds the paginated charge history query
pub fn charge_query(filter: &ChargeFilter, page: &Pagination) -> QueryBuilder<'static, Postgres> {
    let mut builder = QueryBuilder::new(format!("SELECT {CHARGE_COLUMNS} FROM charges"));
    push_charge_filter(&mut builder, filter);
    let dir = direction(page.sort);
    builder.push(format!(" ORDER BY charge_time {dir}, id {dir}"));
    push_page(&mut builder, page);
    builder
}

/// Builds the sum/count query over the same predicate as [`charge_query`]
pub fn charge_totals_query(filter: &ChargeFilter) -> QueryBuilder<'static, Postgres> {
    let mut builder =
        QueryBuilder::new("SELECT COALESCE(SUM(value), 0) AS total_value, COUNT(*) AS count FROM charges");
    push_charge_filter(&mut builder, filter);
    builder
}

/// Read-only ledger queries against the pool
#[derive(Debug, Clone)]
pub struct LedgerRepository {
    pool: PgPool,
}

impl LedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn find_account(&self, user_id: &UserId) -> Result<Option<AccountRow>, DatabaseError> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE user_id = $1 AND deleted = FALSE");
        Ok(sqlx::query_as::<_, AccountRow>(&sql)
            .bind(user_id.as_str())
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn list_accounts(
        &self,
        filter: &AccountFilter,
        page: &Pagination,
    ) -> Result<(Vec<AccountRow>, u64), DatabaseError> {
        let mut rows = QueryBuilder::<Postgres>::new(format!("SELECT {ACCOUNT_COLUMNS} FROM accounts"));
        push_account_filter(&mut rows, filter);
        let dir = direction(page.sort);
        rows.push(format!(" ORDER BY created_at {dir}, user_id {dir}"));
        push_page(&mut rows, page);
        let accounts = rows.build_query_as::<AccountRow>().fetch_all(&self.pool).await?;

        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM accounts");
        push_account_filter(&mut count, filter);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        Ok((accounts, total as u64))
    }

    pub async fn list_invitees(
        &self,
        inviter: &UserId,
        page: &Pagination,
    ) -> Result<(Vec<InviteeRow>, u64), DatabaseError> {
        let mut rows = QueryBuilder::<Postgres>::new(format!("SELECT {INVITEE_COLUMNS} FROM invitees WHERE inviter = "));
        rows.push_bind(inviter.as_str().to_string());
        let dir = direction(page.sort);
        rows.push(format!(" ORDER BY created_at {dir}, invitee {dir}"));
        push_page(&mut rows, page);
        let invitees = rows.build_query_as::<InviteeRow>().fetch_all(&self.pool).await?;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM invitees WHERE inviter = $1")
            .bind(inviter.as_str())
            .fetch_one(&self.pool)
            .await?;

        Ok((invitees, total as u64))
    }

    pub async fn find_precharge(&self, code: &str) -> Result<Option<PreChargeRow>, DatabaseError> {
        let sql = format!("SELECT {PRECHARGE_COLUMNS} FROM precharges WHERE code = $1 AND deleted = FALSE");
        Ok(sqlx::query_as::<_, PreChargeRow>(&sql)
            .bind(code)
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn list_precharges(
        &self,
        filter: &PreChargeFilter,
        page: &Pagination,
    ) -> Result<(Vec<PreChargeRow>, u64), DatabaseError> {
        let precharges = precharge_query(filter, page)
            .build_query_as::<PreChargeRow>()
            .fetch_all(&self.pool)
            .await?;

        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM precharges");
        push_precharge_filter(&mut count, filter);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        Ok((precharges, total as u64))
    }

    pub async fn query_charges(&self, filter: &ChargeFilter, page: &Pagination) -> Result<Vec<ChargeRow>, DatabaseError> {
        Ok(charge_query(filter, page)
            .build_query_as::<ChargeRow>()
            .fetch_all(&self.pool)
            .await?)
    }

    pub async fn charge_totals(&self, filter: &ChargeFilter) -> Result<ChargeTotals, DatabaseError> {
        let row = charge_totals_query(filter)
            .build_query_as::<TotalsRow>()
            .fetch_one(&self.pool)
            .await?;
        Ok(ChargeTotals {
            total_value: Money::new(row.total_value),
            count: row.count as u64,
        })
    }
}

/// Statements that run on an open transaction
pub mod locked {
    use super::*;

    pub async fn set_lock_timeout(conn: &mut PgConnection, millis: u128) -> Result<(), DatabaseError> {
        // SET does not accept bind parameters
        sqlx::query(&format!("SET LOCAL lock_timeout = '{millis}ms'"))
            .execute(conn)
            .await?;
        Ok(())
    }

    pub async fn select_account_for_update(
        conn: &mut PgConnection,
        user_id: &UserId,
    ) -> Result<Option<AccountRow>, DatabaseError> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE user_id = $1 AND deleted = FALSE FOR UPDATE");
        Ok(sqlx::query_as::<_, AccountRow>(&sql)
            .bind(user_id.as_str())
            .fetch_optional(conn)
            .await?)
    }

    pub async fn insert_account(conn: &mut PgConnection, account: &Account) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO accounts (
                user_id, balance, frozen_balance, consumption, level, owed,
                inviter, deleted, created_at, updated_at, deleted_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(account.user_id.as_str())
        .bind(account.balance.amount())
        .bind(account.frozen_balance.amount())
        .bind(account.consumption.amount())
        .bind(account.level)
        .bind(account.owed)
        .bind(account.inviter.as_ref().map(|id| id.as_str()))
        .bind(account.deleted)
        .bind(account.created_at)
        .bind(account.updated_at)
        .bind(account.deleted_at)
        .execute(conn)
        .await?;
        Ok(())
    }

    pub async fn update_account(conn: &mut PgConnection, account: &Account) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET balance = $2, frozen_balance = $3, consumption = $4, level = $5,
                owed = $6, deleted = $7, updated_at = $8, deleted_at = $9
            WHERE user_id = $1
            "#,
        )
        .bind(account.user_id.as_str())
        .bind(account.balance.amount())
        .bind(account.frozen_balance.amount())
        .bind(account.consumption.amount())
        .bind(account.level)
        .bind(account.owed)
        .bind(account.deleted)
        .bind(account.updated_at)
        .bind(account.deleted_at)
        .execute(conn)
        .await?;

        if result.rows_affected() != 1 {
            return Err(DatabaseError::not_found("Account", &account.user_id));
        }
        Ok(())
    }

    pub async fn has_top_up(conn: &mut PgConnection, user_id: &UserId, include_debits: bool) -> Result<bool, DatabaseError> {
        let excluded: Vec<String> = NON_QUALIFYING_TYPES.iter().map(|t| t.to_string()).collect();
        Ok(sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM charges
                WHERE user_id = $1
                  AND type <> ALL($2)
                  AND (value > 0 OR ($3 AND value <> 0))
            )
            "#,
        )
        .bind(user_id.as_str())
        .bind(excluded)
        .bind(include_debits)
        .fetch_one(conn)
        .await?)
    }

    pub async fn insert_charge(conn: &mut PgConnection, charge: &Charge) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO charges (
                charge_id, user_id, operator, value, type, come_from,
                trading_number, charge_time, remarks, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(*charge.charge_id.as_uuid())
        .bind(charge.user_id.as_str())
        .bind(charge.operator.as_str())
        .bind(charge.value.amount())
        .bind(charge.charge_type.as_str())
        .bind(&charge.come_from)
        .bind(charge.trading_number.as_deref())
        .bind(charge.charge_time)
        .bind(charge.remarks.as_deref())
        .bind(charge.created_at)
        .execute(conn)
        .await?;
        Ok(())
    }

    pub async fn select_invitee_for_update(
        conn: &mut PgConnection,
        invitee: &UserId,
    ) -> Result<Option<InviteeRow>, DatabaseError> {
        let sql = format!("SELECT {INVITEE_COLUMNS} FROM invitees WHERE invitee = $1 FOR UPDATE");
        Ok(sqlx::query_as::<_, InviteeRow>(&sql)
            .bind(invitee.as_str())
            .fetch_optional(conn)
            .await?)
    }

    /// Inserts a code unless it is taken; a taken code is `DuplicateEntry`
    ///
    /// `ON CONFLICT DO NOTHING` keeps the transaction usable after a
    /// collision so the caller can retry with a fresh code.
    pub async fn insert_precharge(conn: &mut PgConnection, precharge: &PreCharge) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            r#"
            INSERT INTO precharges (
                code, price, operator, user_id, used, dispatched, deleted,
                remarks, expired_at, created_at, used_at, deleted_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (code) DO NOTHING
            "#,
        )
        .bind(&precharge.code)
        .bind(precharge.price.amount())
        .bind(precharge.operator.as_str())
        .bind(precharge.user_id.as_ref().map(|id| id.as_str()))
        .bind(precharge.used)
        .bind(precharge.dispatched)
        .bind(precharge.deleted)
        .bind(precharge.remarks.as_deref())
        .bind(precharge.expired_at)
        .bind(precharge.created_at)
        .bind(precharge.used_at)
        .bind(precharge.deleted_at)
        .execute(conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::DuplicateEntry(format!("prepaid code {}", precharge.code)));
        }
        Ok(())
    }

    pub async fn select_precharge_for_update(
        conn: &mut PgConnection,
        code: &str,
    ) -> Result<Option<PreChargeRow>, DatabaseError> {
        let sql = format!("SELECT {PRECHARGE_COLUMNS} FROM precharges WHERE code = $1 AND deleted = FALSE FOR UPDATE");
        Ok(sqlx::query_as::<_, PreChargeRow>(&sql)
            .bind(code)
            .fetch_optional(conn)
            .await?)
    }

    pub async fn update_precharge(conn: &mut PgConnection, precharge: &PreCharge) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE precharges
            SET user_id = $2, used = $3, dispatched = $4, deleted = $5,
                remarks = $6, used_at = $7, deleted_at = $8
            WHERE code = $1
            "#,
        )
        .bind(&precharge.code)
        .bind(precharge.user_id.as_ref().map(|id| id.as_str()))
        .bind(precharge.used)
        .bind(precharge.dispatched)
        .bind(precharge.deleted)
        .bind(precharge.remarks.as_deref())
        .bind(precharge.used_at)
        .bind(precharge.deleted_at)
        .execute(conn)
        .await?;

        if result.rows_affected() != 1 {
            return Err(DatabaseError::not_found("PreCharge", &precharge.code));
        }
        Ok(())
    }

    pub async fn upsert_invitee(conn: &mut PgConnection, relation: &Invitee) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO invitees (inviter, invitee, charged, reward_value, created_at, rewarded_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (invitee) DO UPDATE
            SET charged = EXCLUDED.charged,
                reward_value = EXCLUDED.reward_value,
                rewarded_at = EXCLUDED.rewarded_at
            "#,
        )
        .bind(relation.inviter.as_str())
        .bind(relation.invitee.as_str())
        .bind(relation.charged)
        .bind(relation.reward_value.amount())
        .bind(relation.created_at)
        .bind(relation.rewarded_at)
        .execute(conn)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use core_kernel::TimeRange;
    use domain_ledger::ChargeType;

    #[test]
    fn test_charge_query_defaults_to_newest_first() {
        let sql = charge_query(&ChargeFilter::default(), &Pagination::all()).into_sql();
        assert!(sql.ends_with("ORDER BY charge_time DESC, id DESC"));
        assert!(!sql.contains("LIMIT"));
    }

    #[test]
    fn test_charge_query_binds_every_filter() {
        let range = TimeRange::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap(),
        )
        .unwrap();
        let filter = ChargeFilter::for_user("tenant-1").of_type(ChargeType::Money).within(range);
        let sql = charge_query(&filter, &Pagination::new(10, 20).ascending()).into_sql();

        assert!(sql.contains("user_id = $1"));
        assert!(sql.contains("type = $2"));
        assert!(sql.contains("charge_time >= $3"));
        assert!(sql.contains("charge_time < $4"));
        assert!(sql.contains("ORDER BY charge_time ASC, id ASC LIMIT $5 OFFSET $6"));
    }

    #[test]
    fn test_totals_query_ignores_pagination() {
        let sql = charge_totals_query(&ChargeFilter::for_user("tenant-1")).into_sql();
        assert!(sql.starts_with("SELECT COALESCE(SUM(value), 0)"));
        assert!(!sql.contains("ORDER BY"));
    }

    #[test]
    fn test_precharge_query_hides_deleted_and_pages_newest_first() {
        let sql = precharge_query(&PreChargeFilter::redeemed_by("tenant-1"), &Pagination::new(10, 0)).into_sql();
        assert!(sql.contains("WHERE deleted = FALSE AND user_id = $1"));
        assert!(sql.contains("ORDER BY created_at DESC, code DESC LIMIT $2 OFFSET $3"));

        let sql = precharge_query(&PreChargeFilter::default(), &Pagination::all()).into_sql();
        assert!(!sql.contains("user_id ="));
    }

    #[test]
    fn test_precharge_row_maps_holder() {
        let now = Utc::now();
        let precharge: PreCharge = PreChargeRow {
            code: "ABCDEF0123456789".into(),
            price: Decimal::new(500000, 4),
            operator: "admin".into(),
            user_id: Some("tenant-1".into()),
            used: true,
            dispatched: true,
            deleted: false,
            remarks: Some("campaign".into()),
            expired_at: now,
            created_at: now,
            used_at: Some(now),
            deleted_at: None,
        }
        .into();

        assert_eq!(precharge.user_id, Some(UserId::from("tenant-1")));
        assert_eq!(precharge.price, Money::from_units(50));
        assert!(precharge.used);
    }

    #[test]
    fn test_charge_row_maps_unknown_type_to_other() {
        let now = Utc::now();
        let charge: Charge = ChargeRow {
            charge_id: Uuid::new_v4(),
            user_id: "tenant-1".into(),
            operator: "admin".into(),
            value: Decimal::new(12345, 4),
            charge_type: "alipay".into(),
            come_from: "console".into(),
            trading_number: None,
            charge_time: now,
            remarks: None,
            created_at: now,
        }
        .into();

        assert_eq!(charge.charge_type, ChargeType::Other("alipay".into()));
        assert_eq!(charge.value.to_string(), "1.2345");
    }
}
