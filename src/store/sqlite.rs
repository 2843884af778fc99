//! SQLite implementation of the persistent store.
//!
//! One database file holds all tracked repositories. Statements run on the
//! blocking thread pool via `tokio::task::spawn_blocking`, behind a single
//! mutex-guarded connection; the engine never assumes cross-statement
//! transactions, only sequential statement execution per connection.
//!
//! # Schema Versioning
//!
//! The database has a `schema_version` table that tracks the schema version.
//! When the schema needs to change, increment `CURRENT_SCHEMA_VERSION` and add
//! a migration in `run_migrations()`. Migrations run sequentially from the
//! current version to the target version.

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::{Connection, OptionalExtension, params};

use crate::types::{PrNumber, RepoId, ReviewScore, Sha, UserId};

use super::{PrField, PullRequestRecord, StoreError};

/// Current schema version. Increment this when making schema changes and add
/// corresponding migration logic in `run_migrations()`.
const CURRENT_SCHEMA_VERSION: i64 = 1;

/// SQLite-backed store for PR metadata and review scores.
///
/// Cheap to clone; clones share the same connection.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Opens (or creates) the database at the given path and prepares the
    /// schema idempotently.
    ///
    /// The database is configured with `journal_mode = WAL` for crash safety
    /// and a 5 s busy timeout for concurrent access.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path_ref = path.as_ref();

        if let Some(parent) = path_ref.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path_ref)?;
        Self::init(conn)
    }

    /// Opens an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        // WAL is a no-op for in-memory databases; SQLite reports "memory".
        let _journal_mode: String =
            conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        conn.execute_batch("PRAGMA busy_timeout = 5000;")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                version INTEGER NOT NULL
            );
            "#,
        )?;

        let current_version: i64 = conn
            .query_row("SELECT version FROM schema_version WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()?
            .unwrap_or(0);

        run_migrations(&conn, current_version)?;

        Ok(Store {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs a closure against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().expect("store connection mutex poisoned");
            f(&guard)
        })
        .await
        .map_err(|e| StoreError::TaskPanicked(e.to_string()))?
    }

    /// Inserts or refreshes a PR row. Returns whether anything changed.
    ///
    /// - No row for `number`: insert, return `true`.
    /// - Row exists but `id`/`title`/`author_id`/`author_login` disagree with
    ///   the incoming record: fail with [`StoreError::CorruptedRecord`].
    /// - Assignee id differs from stored: refresh assignee, head SHA and
    ///   target branch, return `true`.
    /// - Otherwise: no-op, return `false` (repeated identical notifications).
    pub async fn upsert_pull_request(
        &self,
        repo: &RepoId,
        record: PullRequestRecord,
    ) -> Result<bool, StoreError> {
        let repo = repo.clone();
        self.with_conn(move |conn| upsert_pull_request(conn, &repo, &record))
            .await
    }

    /// Records a reviewer's latest score for a PR. Last write wins; no
    /// history is retained.
    pub async fn upsert_review(
        &self,
        repo: &RepoId,
        number: PrNumber,
        reviewer: UserId,
        score: ReviewScore,
    ) -> Result<(), StoreError> {
        let repo = repo.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO reviews (repo, number, reviewer_id, score)
                 VALUES (?1, ?2, ?3, ?4)",
                params![repo.full_name(), number.0 as i64, reviewer.0 as i64, score.as_i64()],
            )?;
            Ok(())
        })
        .await
    }

    /// The score recorded by the PR's *current* assignee, or 0 if the
    /// assignee hasn't scored (or there is no assignee).
    ///
    /// A score stored by a previous assignee stays persisted but is invisible
    /// until that person is reassigned.
    pub async fn assignee_score(&self, repo: &RepoId, number: PrNumber) -> Result<i64, StoreError> {
        let repo = repo.clone();
        self.with_conn(move |conn| {
            let score: Option<i64> = conn
                .query_row(
                    "SELECT r.score
                     FROM pull_requests p
                     JOIN reviews r
                       ON r.repo = p.repo
                      AND r.number = p.number
                      AND r.reviewer_id = p.assignee_id
                     WHERE p.repo = ?1 AND p.number = ?2",
                    params![repo.full_name(), number.0 as i64],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(score.unwrap_or(0))
        })
        .await
    }

    /// Fetches the full PR row, if persisted.
    pub async fn get_record(
        &self,
        repo: &RepoId,
        number: PrNumber,
    ) -> Result<Option<PullRequestRecord>, StoreError> {
        let repo = repo.clone();
        self.with_conn(move |conn| get_record(conn, &repo, number)).await
    }

    /// Generic single-column lookup (target branch, author login, ...).
    pub async fn get_field(
        &self,
        repo: &RepoId,
        number: PrNumber,
        field: PrField,
    ) -> Result<Option<String>, StoreError> {
        let repo = repo.clone();
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {} FROM pull_requests WHERE repo = ?1 AND number = ?2",
                field.column()
            );
            let value: Option<Option<String>> = conn
                .query_row(&sql, params![repo.full_name(), number.0 as i64], |row| {
                    row.get(0)
                })
                .optional()?;
            Ok(value.flatten())
        })
        .await
    }

    /// Whether the PR's author and assignee are the same identity.
    ///
    /// Returns false for an unknown PR or an unassigned one.
    pub async fn is_self_assigned(
        &self,
        repo: &RepoId,
        number: PrNumber,
    ) -> Result<bool, StoreError> {
        let repo = repo.clone();
        self.with_conn(move |conn| {
            let matched: Option<bool> = conn
                .query_row(
                    "SELECT assignee_id IS NOT NULL AND assignee_id = author_id
                     FROM pull_requests WHERE repo = ?1 AND number = ?2",
                    params![repo.full_name(), number.0 as i64],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(matched.unwrap_or(false))
        })
        .await
    }
}

/// Runs migrations from `from_version` to `CURRENT_SCHEMA_VERSION`.
fn run_migrations(conn: &Connection, from_version: i64) -> Result<(), StoreError> {
    if from_version > CURRENT_SCHEMA_VERSION {
        return Err(StoreError::SchemaTooNew {
            found: from_version,
            supported: CURRENT_SCHEMA_VERSION,
        });
    }

    if from_version == CURRENT_SCHEMA_VERSION {
        return Ok(());
    }

    if from_version < 1 {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS pull_requests (
                repo TEXT NOT NULL,
                number INTEGER NOT NULL,
                pr_id INTEGER NOT NULL,
                title TEXT NOT NULL,
                author_id INTEGER NOT NULL,
                author_login TEXT NOT NULL,
                assignee_id INTEGER,
                assignee_login TEXT,
                head_sha TEXT NOT NULL,
                target_branch TEXT NOT NULL,
                PRIMARY KEY (repo, number)
            );

            CREATE TABLE IF NOT EXISTS reviews (
                repo TEXT NOT NULL,
                number INTEGER NOT NULL,
                reviewer_id INTEGER NOT NULL,
                score INTEGER NOT NULL,
                PRIMARY KEY (repo, number, reviewer_id)
            );
            "#,
        )?;
    }

    conn.execute(
        "INSERT OR REPLACE INTO schema_version (id, version) VALUES (1, ?1)",
        params![CURRENT_SCHEMA_VERSION],
    )?;

    Ok(())
}

fn get_record(
    conn: &Connection,
    repo: &RepoId,
    number: PrNumber,
) -> Result<Option<PullRequestRecord>, StoreError> {
    let record = conn
        .query_row(
            "SELECT number, pr_id, title, author_id, author_login,
                    assignee_id, assignee_login, head_sha, target_branch
             FROM pull_requests WHERE repo = ?1 AND number = ?2",
            params![repo.full_name(), number.0 as i64],
            |row| {
                Ok(PullRequestRecord {
                    number: PrNumber(row.get::<_, i64>(0)? as u64),
                    id: row.get::<_, i64>(1)? as u64,
                    title: row.get(2)?,
                    author_id: UserId(row.get::<_, i64>(3)? as u64),
                    author_login: row.get(4)?,
                    assignee_id: row.get::<_, Option<i64>>(5)?.map(|id| UserId(id as u64)),
                    assignee_login: row.get(6)?,
                    head_sha: Sha::new(row.get::<_, String>(7)?),
                    target_branch: row.get(8)?,
                })
            },
        )
        .optional()?;
    Ok(record)
}

fn upsert_pull_request(
    conn: &Connection,
    repo: &RepoId,
    record: &PullRequestRecord,
) -> Result<bool, StoreError> {
    let stored = match get_record(conn, repo, record.number)? {
        None => {
            conn.execute(
                "INSERT INTO pull_requests
                     (repo, number, pr_id, title, author_id, author_login,
                      assignee_id, assignee_login, head_sha, target_branch)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    repo.full_name(),
                    record.number.0 as i64,
                    record.id as i64,
                    record.title,
                    record.author_id.0 as i64,
                    record.author_login,
                    record.assignee_id.map(|id| id.0 as i64),
                    record.assignee_login,
                    record.head_sha.as_str(),
                    record.target_branch,
                ],
            )?;
            return Ok(true);
        }
        Some(stored) => stored,
    };

    check_immutable(repo, record, "pr_id", stored.id, record.id)?;
    check_immutable(repo, record, "title", &stored.title, &record.title)?;
    check_immutable(repo, record, "author_id", stored.author_id, record.author_id)?;
    check_immutable(
        repo,
        record,
        "author_login",
        &stored.author_login,
        &record.author_login,
    )?;

    if stored.assignee_id == record.assignee_id {
        // Repeated identical notification: nothing to refresh.
        return Ok(false);
    }

    conn.execute(
        "UPDATE pull_requests
         SET assignee_id = ?3, assignee_login = ?4, head_sha = ?5, target_branch = ?6
         WHERE repo = ?1 AND number = ?2",
        params![
            repo.full_name(),
            record.number.0 as i64,
            record.assignee_id.map(|id| id.0 as i64),
            record.assignee_login,
            record.head_sha.as_str(),
            record.target_branch,
        ],
    )?;
    Ok(true)
}

fn check_immutable<T: std::fmt::Debug + PartialEq>(
    repo: &RepoId,
    record: &PullRequestRecord,
    field: &'static str,
    stored: T,
    incoming: T,
) -> Result<(), StoreError> {
    if stored == incoming {
        return Ok(());
    }
    Err(StoreError::CorruptedRecord {
        repo: repo.clone(),
        number: record.number,
        field,
        stored: format!("{:?}", stored),
        incoming: format!("{:?}", incoming),
    })
}
