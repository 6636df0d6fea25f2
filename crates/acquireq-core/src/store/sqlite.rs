//! `SQLite` store using `SQLx`.
//!
//! - Connection pooling (no Arc<Mutex<>>)
//! - Simple embedded schema (no migration files)
//! - One transaction per save, guarded by the resource revision

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Sqlite, SqlitePool, Transaction,
};

use super::{LeaseStore, PendingOffer};
use crate::{
    model::{Claimant, ClaimantId, ClaimantInfo, QueueEntry, Resource, ResourceId, ResourceState},
    Error, Result,
};

/// Database schema as SQL string - executed once on open
const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS claimants (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    label TEXT NOT NULL,
    contact TEXT,
    joined_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS resources (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT,
    offer_duration_secs INTEGER NOT NULL DEFAULT 60 CHECK(offer_duration_secs > 0),
    admin_secret TEXT NOT NULL,
    current_holder_id INTEGER REFERENCES claimants(id),
    offer_deadline TEXT,
    last_order INTEGER NOT NULL DEFAULT 0,
    revision INTEGER NOT NULL DEFAULT 0,
    CHECK(current_holder_id IS NULL OR offer_deadline IS NULL)
);

CREATE TABLE IF NOT EXISTS queue_items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    resource_id TEXT NOT NULL REFERENCES resources(id),
    claimant_id INTEGER NOT NULL REFERENCES claimants(id),
    sort_order INTEGER NOT NULL,
    UNIQUE(resource_id, claimant_id)
);

CREATE INDEX IF NOT EXISTS idx_queue_resource_order ON queue_items(resource_id, sort_order);
CREATE INDEX IF NOT EXISTS idx_resources_deadline ON resources(offer_deadline);
";

type ResourceRow = (
    String,
    String,
    Option<String>,
    i64,
    String,
    Option<i64>,
    Option<String>,
    i64,
    i64,
);

type ClaimantRow = (i64, String, Option<String>, String);

/// Lease store backed by a `SQLite` pool
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open or create a database file and initialize the schema
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    Error::IoError(format!("Failed to create parent directory: {e}"))
                })?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .map_err(|e| Error::DatabaseError(format!("Failed to connect to database: {e}")))?;

        Self::from_pool(pool).await
    }

    /// Private in-memory database, mainly for tests
    pub async fn open_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| Error::DatabaseError(format!("Failed to create in-memory pool: {e}")))?;

        Self::from_pool(pool).await
    }

    /// Wrap an existing pool, creating tables if needed
    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::query(SCHEMA)
            .execute(&pool)
            .await
            .map_err(|e| Error::DatabaseError(format!("Failed to initialize schema: {e}")))?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl LeaseStore for SqliteStore {
    async fn create_resource(&self, resource: &Resource) -> Result<ResourceState> {
        sqlx::query(
            "INSERT INTO resources (id, name, description, offer_duration_secs, admin_secret)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(resource.id.as_str())
        .bind(&resource.name)
        .bind(resource.description.as_deref())
        .bind(i64::from(resource.offer_duration_secs))
        .bind(&resource.admin_secret)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::DatabaseError(format!("Failed to create resource: {e}")))?;

        Ok(ResourceState::new(resource.clone()))
    }

    async fn load_state(&self, id: &ResourceId) -> Result<Option<ResourceState>> {
        let mut tx = self.pool.begin().await?;
        let state = load_in_tx(&mut tx, id).await?;
        tx.commit().await?;
        Ok(state)
    }

    async fn save_state(&self, state: &ResourceState) -> Result<ResourceState> {
        let mut tx = self.pool.begin().await?;
        write_in_tx(&mut tx, state).await?;
        tx.commit()
            .await
            .map_err(|e| Error::DatabaseError(format!("Failed to commit transition: {e}")))?;

        let mut saved = state.clone();
        saved.revision += 1;
        Ok(saved)
    }

    async fn save_with_new_claimant(
        &self,
        state: &ResourceState,
        info: &ClaimantInfo,
        enqueue: &(dyn for<'s> Fn(&'s mut ResourceState, Claimant) + Send + Sync),
    ) -> Result<(ResourceState, Claimant)> {
        let mut tx = self.pool.begin().await?;

        let joined_at = Utc::now().trunc_subsecs(3);
        let result = sqlx::query("INSERT INTO claimants (label, contact, joined_at) VALUES (?, ?, ?)")
            .bind(&info.label)
            .bind(info.contact.as_deref())
            .bind(encode_timestamp(joined_at))
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::DatabaseError(format!("Failed to create claimant: {e}")))?;
        let claimant = Claimant {
            id: ClaimantId::new(result.last_insert_rowid()),
            label: info.label.clone(),
            contact: info.contact.clone(),
            joined_at,
        };

        let mut joined = state.clone();
        enqueue(&mut joined, claimant.clone());
        write_in_tx(&mut tx, &joined).await?;
        tx.commit()
            .await
            .map_err(|e| Error::DatabaseError(format!("Failed to commit join: {e}")))?;

        joined.revision += 1;
        Ok((joined, claimant))
    }

    async fn get_claimant(&self, id: ClaimantId) -> Result<Option<Claimant>> {
        let row: Option<ClaimantRow> =
            sqlx::query_as("SELECT id, label, contact, joined_at FROM claimants WHERE id = ?")
                .bind(id.get())
                .fetch_optional(&self.pool)
                .await?;
        row.map(claimant_from_row).transpose()
    }

    async fn pending_offers(&self) -> Result<Vec<PendingOffer>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT id, offer_deadline FROM resources
             WHERE offer_deadline IS NOT NULL
             ORDER BY offer_deadline ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(pending_from_row).collect()
    }

    async fn offers_past_deadline(&self, now: DateTime<Utc>) -> Result<Vec<PendingOffer>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT id, offer_deadline FROM resources
             WHERE offer_deadline IS NOT NULL AND offer_deadline <= ?
             ORDER BY offer_deadline ASC",
        )
        .bind(encode_timestamp(now))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(pending_from_row).collect()
    }
}

/// Revision-checked write of holder, deadline and queue
async fn write_in_tx(tx: &mut Transaction<'_, Sqlite>, state: &ResourceState) -> Result<()> {
    let updated = sqlx::query(
        "UPDATE resources
         SET current_holder_id = ?, offer_deadline = ?, last_order = ?, revision = revision + 1
         WHERE id = ? AND revision = ?",
    )
    .bind(state.holder_id().map(ClaimantId::get))
    .bind(state.offer_deadline.map(encode_timestamp))
    .bind(state.last_order)
    .bind(state.id().as_str())
    .bind(state.revision)
    .execute(&mut **tx)
    .await
    .map_err(|e| Error::DatabaseError(format!("Failed to update resource: {e}")))?;

    if updated.rows_affected() == 0 {
        let exists: Option<(i64,)> = sqlx::query_as("SELECT revision FROM resources WHERE id = ?")
            .bind(state.id().as_str())
            .fetch_optional(&mut **tx)
            .await?;
        return Err(match exists {
            Some(_) => Error::Conflict {
                resource_id: state.id().to_string(),
                expected: state.revision,
            },
            None => Error::ResourceNotFound(state.id().to_string()),
        });
    }

    sqlx::query("DELETE FROM queue_items WHERE resource_id = ?")
        .bind(state.id().as_str())
        .execute(&mut **tx)
        .await
        .map_err(|e| Error::DatabaseError(format!("Failed to clear queue: {e}")))?;

    for entry in &state.queue {
        sqlx::query("INSERT INTO queue_items (resource_id, claimant_id, sort_order) VALUES (?, ?, ?)")
            .bind(state.id().as_str())
            .bind(entry.claimant.id.get())
            .bind(entry.order)
            .execute(&mut **tx)
            .await
            .map_err(|e| Error::DatabaseError(format!("Failed to write queue item: {e}")))?;
    }
    Ok(())
}

async fn load_in_tx(
    tx: &mut Transaction<'_, Sqlite>,
    id: &ResourceId,
) -> Result<Option<ResourceState>> {
    let row: Option<ResourceRow> = sqlx::query_as(
        "SELECT id, name, description, offer_duration_secs, admin_secret,
                current_holder_id, offer_deadline, last_order, revision
         FROM resources WHERE id = ?",
    )
    .bind(id.as_str())
    .fetch_optional(&mut **tx)
    .await?;

    let Some((
        rid,
        name,
        description,
        duration,
        admin_secret,
        holder_id,
        deadline,
        last_order,
        revision,
    )) = row
    else {
        return Ok(None);
    };

    let holder = match holder_id {
        Some(holder_id) => {
            let row: Option<ClaimantRow> =
                sqlx::query_as("SELECT id, label, contact, joined_at FROM claimants WHERE id = ?")
                    .bind(holder_id)
                    .fetch_optional(&mut **tx)
                    .await?;
            let row = row.ok_or(Error::ClaimantNotFound(holder_id))?;
            Some(claimant_from_row(row)?)
        }
        None => None,
    };

    let queue_rows: Vec<(i64, String, Option<String>, String, i64)> = sqlx::query_as(
        "SELECT c.id, c.label, c.contact, c.joined_at, q.sort_order
         FROM queue_items q JOIN claimants c ON c.id = q.claimant_id
         WHERE q.resource_id = ?
         ORDER BY q.sort_order ASC",
    )
    .bind(id.as_str())
    .fetch_all(&mut **tx)
    .await?;

    let queue = queue_rows
        .into_iter()
        .map(|(cid, label, contact, joined_at, order)| {
            Ok(QueueEntry {
                claimant: claimant_from_row((cid, label, contact, joined_at))?,
                order,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let offer_duration_secs = u32::try_from(duration)
        .map_err(|e| Error::ParseError(format!("Invalid offer duration {duration}: {e}")))?;

    Ok(Some(ResourceState {
        resource: Resource {
            id: ResourceId::new(rid),
            name,
            description,
            offer_duration_secs,
            admin_secret,
        },
        holder,
        offer_deadline: deadline.as_deref().map(parse_timestamp).transpose()?,
        queue,
        last_order,
        revision,
    }))
}

fn claimant_from_row((id, label, contact, joined_at): ClaimantRow) -> Result<Claimant> {
    Ok(Claimant {
        id: ClaimantId::new(id),
        label,
        contact,
        joined_at: parse_timestamp(&joined_at)?,
    })
}

fn pending_from_row((id, deadline): (String, String)) -> Result<PendingOffer> {
    Ok(PendingOffer {
        resource_id: ResourceId::new(id),
        deadline: parse_timestamp(&deadline)?,
    })
}

/// Fixed-width RFC 3339 so text comparison in SQL orders chronologically
fn encode_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::ParseError(format!("Invalid timestamp '{raw}': {e}")))
}
