use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Error as SqlxError;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use crate::storage::{DiagramStore, StorageError};

/// Postgres-backed access to the diagram tables owned by the CRUD API.
pub struct DbDiagrams {
    pool: PgPool,
}

impl DbDiagrams {
    /// Create a new database connection pool
    ///
    /// # Arguments
    /// * `database_url` - PostgreSQL connection string
    ///
    /// # Returns
    /// * `Result<Self, SqlxError>` - Database connection pool or error
    pub async fn new(database_url: &str) -> Result<Self, SqlxError> {
        info!("Connecting to database...");

        let pool = PgPoolOptions::new()
            .max_connections(20)
            .min_connections(2)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600)) // Close idle connections after 10 minutes
            .max_lifetime(Duration::from_secs(1800)) // Recycle connections after 30 minutes
            .connect(database_url)
            .await?;

        info!("Database connection pool created successfully");

        Ok(Self { pool })
    }

    /// Check whether a diagram exists and has not been soft-deleted.
    ///
    /// Diagram ids are opaque to the collaboration engine; anything that is
    /// not a UUID can never match a row, so it is reported as absent rather
    /// than as an error.
    pub async fn diagram_exists(&self, diagram_id: &str) -> Result<bool, SqlxError> {
        let diagram_uuid = match Uuid::parse_str(diagram_id) {
            Ok(uuid) => uuid,
            Err(_) => return Ok(false),
        };

        let query_sql = r#"
            SELECT 1 AS present
            FROM diagrams
            WHERE id = $1 AND deleted = false
        "#;

        let row = sqlx::query(query_sql)
            .bind(diagram_uuid)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.is_some())
    }
}

#[async_trait]
impl DiagramStore for DbDiagrams {
    async fn diagram_exists(&self, diagram_id: &str) -> Result<bool, StorageError> {
        DbDiagrams::diagram_exists(self, diagram_id)
            .await
            .map_err(|e| StorageError::Unavailable(e.to_string()))
    }
}
