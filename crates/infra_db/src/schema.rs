//! Ledger schema

use tracing::info;

use crate::error::DatabaseError;
use crate::pool::DatabasePool;

/// DDL for accounts, charges, invitees, prepaid codes, and orders
pub const LEDGER_SCHEMA: &str = include_str!("../../../migrations/20240101_000001_ledger_schema.sql");

/// Applies the ledger schema; every statement is idempotent
pub async fn apply_schema(pool: &DatabasePool) -> Result<(), DatabaseError> {
    sqlx::raw_sql(LEDGER_SCHEMA)
        .execute(pool)
        .await
        .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;
    info!("ledger schema applied");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_defines_ledger_tables() {
        for table in ["accounts", "charges", "invitees", "precharges", "orders"] {
            assert!(
                LEDGER_SCHEMA.contains(&format!("CREATE TABLE IF NOT EXISTS {table}")),
                "missing table {table}"
            );
        }
    }
}
