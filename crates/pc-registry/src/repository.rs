//! Subscriber persistence
//!
//! `SubscriberRepository` is the storage boundary of the registry;
//! `SqliteSubscriberRepository` is the sqlx implementation.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use pc_common::{AccountType, PlanAssignment, Subscriber};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use crate::error::{RegistryError, Result};

/// Everything needed to store a new subscriber
#[derive(Clone)]
pub struct SubscriberDraft {
    pub account_type: AccountType,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub telephone: String,
    pub address: String,
    pub organization_name: Option<String>,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait SubscriberRepository: Send + Sync {
    async fn find_by_id(&self, id: i64) -> Result<Option<Subscriber>>;

    async fn find_by_email(&self, email: &str) -> Result<Option<Subscriber>>;

    /// Fails with `Duplicate` when the email is taken
    async fn insert(&self, draft: SubscriberDraft) -> Result<Subscriber>;

    /// Write all three plan columns atomically and return the committed row
    async fn update_plan(&self, id: i64, plan: PlanAssignment) -> Result<Subscriber>;

    /// Newest first
    async fn list_all(&self) -> Result<Vec<Subscriber>>;
}

const SELECT_SUBSCRIBER: &str = r#"
    SELECT id, account_type, first_name, last_name, email, telephone, address,
           organization_name, password_hash, subscription_type, max_users,
           max_resources, created_at
    FROM subscribers
"#;

/// SQLite-backed subscriber store
pub struct SqliteSubscriberRepository {
    pool: SqlitePool,
}

impl SqliteSubscriberRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the schema if it does not exist
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS subscribers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                account_type TEXT NOT NULL,
                first_name TEXT NOT NULL,
                last_name TEXT NOT NULL,
                email TEXT NOT NULL UNIQUE,
                telephone TEXT NOT NULL,
                address TEXT NOT NULL,
                organization_name TEXT,
                password_hash TEXT NOT NULL,
                subscription_type TEXT,
                max_users INTEGER,
                max_resources INTEGER,
                created_at TEXT NOT NULL,
                CHECK ((subscription_type IS NULL) = (max_users IS NULL)
                   AND (max_users IS NULL) = (max_resources IS NULL))
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_subscribers_created_at
            ON subscribers (created_at)
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("Subscriber schema initialized");
        Ok(())
    }
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn subscriber_from_row(row: &SqliteRow) -> Result<Subscriber> {
    let id: i64 = row.try_get("id")?;
    let corrupt = |reason: String| RegistryError::CorruptRecord { id, reason };

    let account_type: String = row.try_get("account_type")?;
    let account_type = account_type
        .parse::<AccountType>()
        .map_err(|e| corrupt(e.to_string()))?;

    let subscription_type: Option<String> = row.try_get("subscription_type")?;
    let plan = PlanAssignment::from_parts(
        subscription_type.as_deref(),
        row.try_get("max_users")?,
        row.try_get("max_resources")?,
    )
    .map_err(|e| corrupt(e.to_string()))?;

    let created_at: String = row.try_get("created_at")?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| corrupt(format!("created_at: {}", e)))?
        .with_timezone(&Utc);

    Ok(Subscriber {
        id,
        account_type,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        email: row.try_get("email")?,
        telephone: row.try_get("telephone")?,
        address: row.try_get("address")?,
        organization_name: row.try_get("organization_name")?,
        password_hash: row.try_get("password_hash")?,
        plan,
        created_at,
    })
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[async_trait]
impl SubscriberRepository for SqliteSubscriberRepository {
    async fn find_by_id(&self, id: i64) -> Result<Option<Subscriber>> {
        let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_SUBSCRIBER))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(subscriber_from_row).transpose()
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Subscriber>> {
        let row = sqlx::query(&format!("{} WHERE email = ?", SELECT_SUBSCRIBER))
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(subscriber_from_row).transpose()
    }

    async fn insert(&self, draft: SubscriberDraft) -> Result<Subscriber> {
        let result = sqlx::query(
            r#"
            INSERT INTO subscribers (
                account_type, first_name, last_name, email, telephone, address,
                organization_name, password_hash, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(draft.account_type.as_str())
        .bind(&draft.first_name)
        .bind(&draft.last_name)
        .bind(&draft.email)
        .bind(&draft.telephone)
        .bind(&draft.address)
        .bind(&draft.organization_name)
        .bind(&draft.password_hash)
        .bind(format_timestamp(&draft.created_at))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                RegistryError::duplicate_email(draft.email.clone())
            } else {
                RegistryError::Database(e)
            }
        })?;

        let id = result.last_insert_rowid();
        debug!(subscriber_id = id, "Subscriber inserted");

        Ok(Subscriber {
            id,
            account_type: draft.account_type,
            first_name: draft.first_name,
            last_name: draft.last_name,
            email: draft.email,
            telephone: draft.telephone,
            address: draft.address,
            organization_name: draft.organization_name,
            password_hash: draft.password_hash,
            plan: None,
            created_at: draft.created_at,
        })
    }

    async fn update_plan(&self, id: i64, plan: PlanAssignment) -> Result<Subscriber> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE subscribers
            SET subscription_type = ?, max_users = ?, max_resources = ?
            WHERE id = ?
            "#,
        )
        .bind(plan.subscription_type.as_str())
        .bind(plan.max_users)
        .bind(plan.max_resources)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(RegistryError::NotFound { id });
        }

        let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_SUBSCRIBER))
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;
        let subscriber = subscriber_from_row(&row)?;

        tx.commit().await?;

        debug!(subscriber_id = id, plan = %plan.subscription_type, "Plan committed");
        Ok(subscriber)
    }

    async fn list_all(&self) -> Result<Vec<Subscriber>> {
        let rows = sqlx::query(&format!("{} ORDER BY created_at DESC, id DESC", SELECT_SUBSCRIBER))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(subscriber_from_row).collect()
    }
}
