use crate::errors::JournalError;
use crate::models::RunOutcome;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use uuid::Uuid;

// One journal line per run
#[derive(Debug, Clone, PartialEq)]
pub struct RunRecord {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: String,
    pub entries: i64,
    pub message: Option<String>,
}

impl RunRecord {
    pub fn new(id: Uuid, started_at: DateTime<Utc>, outcome: &RunOutcome) -> Self {
        let (entries, message) = match outcome {
            RunOutcome::Success(rows) => (rows.len() as i64, None),
            RunOutcome::Failure(message) => (0, Some(message.clone())),
            RunOutcome::Skipped => (0, Some("previous run still in progress".to_string())),
        };
        Self {
            id,
            started_at,
            finished_at: Utc::now(),
            outcome: outcome.label().to_string(),
            entries,
            message,
        }
    }
}

/// Local record of every run, kept next to the daemon so an operator can
/// see what happened even when the bot message never arrived.
pub struct RunJournal {
    pool: SqlitePool,
}

impl RunJournal {
    pub async fn connect(db_url: &str) -> Result<Self, JournalError> {
        let options = SqliteConnectOptions::from_str(db_url)?.create_if_missing(true);

        // each in-memory connection would get its own empty database
        let max_connections = if db_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        Self::init_schema(&pool).await?;
        Ok(Self { pool })
    }

    async fn init_schema(pool: &SqlitePool) -> Result<(), JournalError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS runs (
                id TEXT PRIMARY KEY,
                started_at TEXT NOT NULL,
                finished_at TEXT NOT NULL,
                outcome TEXT NOT NULL,
                entries INTEGER NOT NULL,
                message TEXT
            );
            "#,
        )
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn record(&self, run: &RunRecord) -> Result<(), JournalError> {
        sqlx::query(
            r#"
            INSERT INTO runs (id, started_at, finished_at, outcome, entries, message)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(run.id.to_string())
        .bind(run.started_at.to_rfc3339())
        .bind(run.finished_at.to_rfc3339())
        .bind(&run.outcome)
        .bind(run.entries)
        .bind(&run.message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // Newest first
    pub async fn recent_runs(&self, limit: i64) -> Result<Vec<RunRecord>, JournalError> {
        let rows = sqlx::query(
            r#"
            SELECT id, started_at, finished_at, outcome, entries, message
            FROM runs
            ORDER BY started_at DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(RunRecord {
                    id: parse_column(&row, "id", |s| Uuid::parse_str(s).ok())?,
                    started_at: parse_column(&row, "started_at", parse_time)?,
                    finished_at: parse_column(&row, "finished_at", parse_time)?,
                    outcome: row.get("outcome"),
                    entries: row.get("entries"),
                    message: row.get("message"),
                })
            })
            .collect()
    }
}

fn parse_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.with_timezone(&Utc))
}

fn parse_column<T>(
    row: &sqlx::sqlite::SqliteRow,
    column: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<T, JournalError> {
    let raw: String = row.get(column);
    parse(&raw).ok_or_else(|| {
        JournalError(sqlx::Error::ColumnDecode {
            index: column.to_string(),
            source: format!("unparseable value {:?}", raw).into(),
        })
    })
}
