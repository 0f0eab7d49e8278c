//! Interaction history store
//!
//! SQLite-backed durable record of answered queries, used by the context
//! builder to derive per-user domain preferences. Writes happen off the
//! request path, after the response has been returned.

use crate::error::{BraidError, Result};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// One answered query, as recorded for a user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub user_id: String,
    pub session_id: String,
    pub query: String,
    pub query_type: String,
    /// Domains the query was routed to
    pub domains: Vec<String>,
    /// Unix seconds
    pub created_at: i64,
}

/// History store with migration support
pub struct HistoryStore {
    pool: DbPool,
}

impl HistoryStore {
    /// Open (or create) the history database
    pub fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| BraidError::Io {
                source: e,
                context: format!("Failed to create database directory: {:?}", parent),
            })?;
        }

        let manager = SqliteConnectionManager::file(db_path);

        let pool = Pool::builder()
            .max_size(16)
            .build(manager)
            .map_err(|e| BraidError::Config(format!("Failed to create connection pool: {}", e)))?;

        {
            let conn = pool
                .get()
                .map_err(|e| BraidError::Config(format!("Failed to get connection: {}", e)))?;

            // WAL keeps history appends from blocking concurrent context reads
            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                PRAGMA foreign_keys = ON;
                PRAGMA busy_timeout = 5000;
                ",
            )?;
        }

        let store = Self { pool };
        store.migrate()?;

        Ok(store)
    }

    /// Get a connection from the pool
    pub fn get_conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| BraidError::Config(format!("Failed to get connection: {}", e)))
    }

    /// Run database migrations
    fn migrate(&self) -> Result<()> {
        let conn = self.get_conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
            [],
        )?;

        let current_version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM _migrations",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        for (version, migration) in MIGRATIONS.iter().enumerate() {
            let version = version as i32 + 1;

            if version > current_version {
                tracing::info!("Applying migration {}", version);

                conn.execute_batch(migration)?;

                conn.execute(
                    "INSERT INTO _migrations (version, applied_at) VALUES (?1, datetime('now'))",
                    params![version],
                )?;
            }
        }

        Ok(())
    }

    /// Append one interaction record
    pub fn append(&self, record: &InteractionRecord) -> Result<()> {
        let domains = serde_json::to_string(&record.domains).map_err(|e| BraidError::Json {
            source: e,
            context: "Failed to serialize interaction domains".to_string(),
        })?;

        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO interactions (user_id, session_id, query, query_type, domains, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                &record.user_id,
                &record.session_id,
                &record.query,
                &record.query_type,
                &domains,
                record.created_at,
            ],
        )?;

        Ok(())
    }

    /// Fetch the most recent interactions for a user, newest first
    pub fn recent(&self, user_id: &str, limit: usize) -> Result<Vec<InteractionRecord>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT user_id, session_id, query, query_type, domains, created_at
             FROM interactions
             WHERE user_id = ?1
             ORDER BY created_at DESC, id DESC
             LIMIT ?2",
        )?;

        let rows = stmt.query_map(params![user_id, limit as i64], |row| {
            let domains_json: String = row.get(4)?;
            Ok(InteractionRecord {
                user_id: row.get(0)?,
                session_id: row.get(1)?,
                query: row.get(2)?,
                query_type: row.get(3)?,
                domains: serde_json::from_str(&domains_json).unwrap_or_default(),
                created_at: row.get(5)?,
            })
        })?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }

        Ok(records)
    }

    /// Get store statistics
    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.get_conn()?;

        let interaction_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM interactions", [], |row| row.get(0))?;

        let user_count: i64 = conn.query_row(
            "SELECT COUNT(DISTINCT user_id) FROM interactions",
            [],
            |row| row.get(0),
        )?;

        Ok(StoreStats {
            interaction_count: interaction_count as usize,
            user_count: user_count as usize,
        })
    }
}

/// History store statistics
#[derive(Debug)]
pub struct StoreStats {
    pub interaction_count: usize,
    pub user_count: usize,
}

/// Database migrations (each string is one migration)
const MIGRATIONS: &[&str] = &[
    // Migration 1: Initial schema
    r#"
    CREATE TABLE interactions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id TEXT NOT NULL,
        session_id TEXT NOT NULL,
        query TEXT NOT NULL,
        query_type TEXT NOT NULL,
        domains TEXT NOT NULL,
        created_at INTEGER NOT NULL
    );

    CREATE INDEX idx_interactions_user ON interactions(user_id, created_at);
    CREATE INDEX idx_interactions_session ON interactions(session_id);
    "#,
];
