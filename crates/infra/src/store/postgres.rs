//! Postgres-backed drive store.
//!
//! Reads and updates the drive database tables directly:
//!
//! | table | role |
//! |-------|------|
//! | `deleted_folders` | folder backlog (`folder_id`, `enqueued`, `processed`, timestamps) |
//! | `deleted_files` | file backlog (`file_id`, `network_file_id`, `enqueued`, `processed`, timestamps) |
//! | `folders` | hierarchy (`id`, `uuid`, `parent_id`, `removed`, `removed_at`) |
//! | `files` | hierarchy (`id`, `folder_id`, `status`) |
//!
//! The `enqueued` column holds the backlog "claimed" flag.
//!
//! ## Error Mapping
//!
//! | SQLx Error | StoreError |
//! |------------|------------|
//! | `PoolClosed`, `PoolTimedOut`, `Io`, `Tls` | `Connection` |
//! | `RowNotFound`, `ColumnDecode`, `ColumnNotFound`, `Decode` | `Decode` |
//! | anything else | `Query` |

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgRow, PgSslMode};
use sqlx::{PgPool, Row};
use tracing::{Span, instrument};
use uuid::Uuid;

use sweeper_core::{BacklogRecord, BacklogState, DeletedFile, DeletedFolder, EntityId};

use super::{BacklogStore, DriveStore, HierarchyStore, StoreError};

const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Where the drive database lives.
#[derive(Clone, PartialEq, Eq)]
pub enum PgSettings {
    Url(String),
    Parts {
        host: String,
        port: u16,
        user: String,
        password: String,
        database: String,
    },
}

impl fmt::Debug for PgSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PgSettings::Url(_) => f.debug_tuple("Url").field(&"<redacted>").finish(),
            PgSettings::Parts {
                host,
                port,
                user,
                database,
                ..
            } => f
                .debug_struct("Parts")
                .field("host", host)
                .field("port", port)
                .field("user", user)
                .field("database", database)
                .finish_non_exhaustive(),
        }
    }
}

impl PgSettings {
    /// Connect options; TLS is attempted without certificate verification.
    pub fn connect_options(&self) -> Result<PgConnectOptions, StoreError> {
        let options = match self {
            PgSettings::Url(url) => {
                PgConnectOptions::from_str(url).map_err(|e| StoreError::Connection(e.to_string()))?
            }
            PgSettings::Parts {
                host,
                port,
                user,
                password,
                database,
            } => PgConnectOptions::new()
                .host(host)
                .port(*port)
                .username(user)
                .password(password)
                .database(database),
        };
        Ok(options.ssl_mode(PgSslMode::Prefer))
    }
}

/// Drive database access over a sqlx connection pool.
#[derive(Debug, Clone)]
pub struct PostgresDriveStore {
    pool: PgPool,
}

impl PostgresDriveStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[instrument(skip(options), fields(host = options.get_host(), database = ?options.get_database()), err)]
    pub async fn connect(options: PgConnectOptions) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(DEFAULT_MAX_CONNECTIONS)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Table metadata for one backlog record type.
trait PgBacklogRow: BacklogRecord {
    const TABLE: &'static str;
    const ID_COLUMN: &'static str;

    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error>;
}

fn backlog_state(row: &PgRow) -> Result<BacklogState, sqlx::Error> {
    Ok(BacklogState {
        claimed: row.try_get("enqueued")?,
        processed: row.try_get("processed")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        claimed_at: row.try_get("enqueued_at")?,
        processed_at: row.try_get("processed_at")?,
    })
}

impl PgBacklogRow for DeletedFolder {
    const TABLE: &'static str = "deleted_folders";
    const ID_COLUMN: &'static str = "folder_id";

    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            folder_id: EntityId::from_uuid(row.try_get::<Uuid, _>("folder_id")?),
            state: backlog_state(row)?,
        })
    }
}

impl PgBacklogRow for DeletedFile {
    const TABLE: &'static str = "deleted_files";
    const ID_COLUMN: &'static str = "file_id";

    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            file_id: EntityId::from_uuid(row.try_get::<Uuid, _>("file_id")?),
            network_file_id: row.try_get("network_file_id")?,
            state: backlog_state(row)?,
        })
    }
}

fn uuids(ids: &[EntityId]) -> Vec<Uuid> {
    ids.iter().map(|id| *id.as_uuid()).collect()
}

impl PostgresDriveStore {
    async fn fetch_rows<R: PgBacklogRow>(&self, limit: usize) -> Result<Vec<R>, StoreError> {
        let sql = format!(
            "SELECT * FROM {} WHERE processed = false AND enqueued = false LIMIT $1",
            R::TABLE
        );
        let rows = sqlx::query(&sql)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("fetch_eligible", e))?;

        let records = rows
            .iter()
            .map(R::from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| map_sqlx_error("fetch_eligible", e))?;

        Span::current().record("rows", records.len());
        Ok(records)
    }

    async fn claim_rows<R: PgBacklogRow>(&self, ids: &[EntityId]) -> Result<Vec<EntityId>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        // Conditional on `enqueued = false`: a concurrent claimer that got
        // there first keeps the row, and RETURNING reports only what we won.
        let sql = format!(
            r#"
            UPDATE {table}
            SET enqueued = true, enqueued_at = NOW(), updated_at = NOW()
            WHERE {id} = ANY($1) AND enqueued = false AND processed = false
            RETURNING {id}
            "#,
            table = R::TABLE,
            id = R::ID_COLUMN,
        );
        let rows = sqlx::query(&sql)
            .bind(uuids(ids))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("claim", e))?;

        let won = rows
            .iter()
            .map(|row| row.try_get::<Uuid, _>(0).map(EntityId::from_uuid))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| map_sqlx_error("claim", e))?;

        Span::current().record("won", won.len());
        Ok(won)
    }

    async fn process_rows<R: PgBacklogRow>(&self, ids: &[EntityId]) -> Result<u64, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let sql = format!(
            r#"
            UPDATE {table}
            SET processed = true, processed_at = NOW(), updated_at = NOW()
            WHERE {id} = ANY($1) AND enqueued = true AND processed = false
            "#,
            table = R::TABLE,
            id = R::ID_COLUMN,
        );
        let result = sqlx::query(&sql)
            .bind(uuids(ids))
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("mark_processed", e))?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl BacklogStore<DeletedFolder> for PostgresDriveStore {
    #[instrument(skip(self), fields(table = "deleted_folders", rows = tracing::field::Empty), err)]
    async fn fetch_eligible(&self, limit: usize) -> Result<Vec<DeletedFolder>, StoreError> {
        self.fetch_rows(limit).await
    }

    #[instrument(skip(self, ids), fields(table = "deleted_folders", requested = ids.len(), won = tracing::field::Empty), err)]
    async fn claim(&self, ids: &[EntityId]) -> Result<Vec<EntityId>, StoreError> {
        self.claim_rows::<DeletedFolder>(ids).await
    }

    #[instrument(skip(self, ids), fields(table = "deleted_folders", requested = ids.len()), err)]
    async fn mark_processed(&self, ids: &[EntityId]) -> Result<u64, StoreError> {
        self.process_rows::<DeletedFolder>(ids).await
    }
}

#[async_trait]
impl BacklogStore<DeletedFile> for PostgresDriveStore {
    #[instrument(skip(self), fields(table = "deleted_files", rows = tracing::field::Empty), err)]
    async fn fetch_eligible(&self, limit: usize) -> Result<Vec<DeletedFile>, StoreError> {
        self.fetch_rows(limit).await
    }

    #[instrument(skip(self, ids), fields(table = "deleted_files", requested = ids.len(), won = tracing::field::Empty), err)]
    async fn claim(&self, ids: &[EntityId]) -> Result<Vec<EntityId>, StoreError> {
        self.claim_rows::<DeletedFile>(ids).await
    }

    #[instrument(skip(self, ids), fields(table = "deleted_files", requested = ids.len()), err)]
    async fn mark_processed(&self, ids: &[EntityId]) -> Result<u64, StoreError> {
        self.process_rows::<DeletedFile>(ids).await
    }
}

#[async_trait]
impl HierarchyStore for PostgresDriveStore {
    #[instrument(skip(self), fields(folder_id = %folder_id), err)]
    async fn mark_descendant_files_deleted_batch(
        &self,
        folder_id: EntityId,
        limit: usize,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE files
            SET updated_at = NOW(), status = 'DELETED'
            WHERE id IN (
                SELECT id
                FROM files
                WHERE folder_id = (SELECT id FROM folders WHERE uuid = $1)
                AND status != 'DELETED'
                LIMIT $2
            )
            "#,
        )
        .bind(folder_id.as_uuid())
        .bind(limit as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("mark_descendant_files_deleted", e))?;

        Ok(result.rows_affected())
    }

    #[instrument(skip(self), fields(folder_id = %folder_id), err)]
    async fn mark_descendant_folders_removed_batch(
        &self,
        folder_id: EntityId,
        limit: usize,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE folders
            SET updated_at = NOW(), removed = true, removed_at = NOW()
            WHERE id IN (
                SELECT id
                FROM folders
                WHERE parent_id = (SELECT id FROM folders WHERE uuid = $1)
                AND removed = false
                LIMIT $2
            )
            "#,
        )
        .bind(folder_id.as_uuid())
        .bind(limit as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("mark_descendant_folders_removed", e))?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl DriveStore for PostgresDriveStore {
    async fn disconnect(&self) -> Result<(), StoreError> {
        self.pool.close().await;
        Ok(())
    }
}

fn map_sqlx_error(operation: &'static str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::PoolClosed
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_) => StoreError::Connection(format!("{operation}: {err}")),
        sqlx::Error::RowNotFound
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::Decode(_) => StoreError::Decode {
            operation,
            message: err.to_string(),
        },
        sqlx::Error::Database(db_err) => StoreError::query(
            operation,
            format!("database error: {}", db_err.message()),
        ),
        other => StoreError::query(operation, other.to_string()),
    }
}
