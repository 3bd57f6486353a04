use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};

use crate::job::{format_ts, ClaimedJob, Job, JobId, JobState, Lease, QueueStats};

use super::{LeaseRelease, Result, Storage, StorageError};

pub struct SqliteStorage {
    pub pool: SqlitePool,
}

impl SqliteStorage {
    /// Connect to (and if needed create) the database at `database_url`.
    pub async fn new(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        Self::from_pool(pool).await
    }

    /// Private in-memory database. Pinned to a single connection, since every
    /// new SQLite connection to `:memory:` would see an empty database.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        let storage = Self { pool };
        storage.migrate().await?;
        Ok(storage)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                payload TEXT NOT NULL,
                target_url TEXT,
                due_at TEXT NOT NULL,
                state TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                max_attempts INTEGER NOT NULL DEFAULT 1,
                claimed_by TEXT,
                lease_token TEXT,
                lease_expires_at TEXT,
                last_error TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Serves both the delayed index (due_at scan) and the ready index
        // (oldest first, enqueue order on ties).
        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_jobs_state_due ON jobs(state, due_at, seq)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_jobs_state_lease ON jobs(state, lease_expires_at)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_jobs_state_updated ON jobs(state, updated_at)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn row_to_job(&self, row: &SqliteRow) -> Result<Job> {
        let id: String = row.try_get("id")?;
        let name: String = row.try_get("name")?;
        let payload: String = row.try_get("payload")?;
        let target_url: Option<String> = row.try_get("target_url")?;
        let due_at: String = row.try_get("due_at")?;
        let state: String = row.try_get("state")?;
        let attempts: i64 = row.try_get("attempts")?;
        let max_attempts: i64 = row.try_get("max_attempts")?;
        let claimed_by: Option<String> = row.try_get("claimed_by")?;
        let lease_expires_at: Option<String> = row.try_get("lease_expires_at")?;
        let last_error: Option<String> = row.try_get("last_error")?;
        let created_at: String = row.try_get("created_at")?;
        let updated_at: String = row.try_get("updated_at")?;

        let corrupt = |reason: String| StorageError::Corrupt {
            id: id.clone(),
            reason,
        };

        let state = JobState::from_str(&state).map_err(|e| corrupt(e.to_string()))?;
        let attempts = u32::try_from(attempts)
            .map_err(|_| corrupt(format!("attempts out of range: {attempts}")))?;
        let max_attempts = u32::try_from(max_attempts)
            .map_err(|_| corrupt(format!("max_attempts out of range: {max_attempts}")))?;
        let lease_expires_at = lease_expires_at
            .map(|s| parse_ts(&s).map_err(corrupt))
            .transpose()?;

        Ok(Job {
            payload: serde_json::from_str(&payload)?,
            name,
            target_url,
            due_at: parse_ts(&due_at).map_err(corrupt)?,
            state,
            attempts,
            max_attempts,
            claimed_by,
            lease_expires_at,
            last_error,
            created_at: parse_ts(&created_at).map_err(corrupt)?,
            updated_at: parse_ts(&updated_at).map_err(corrupt)?,
            id: JobId(id),
        })
    }

    fn row_to_claimed(&self, row: &SqliteRow) -> Result<ClaimedJob> {
        let job = self.row_to_job(row)?;
        let token: Option<String> = row.try_get("lease_token")?;

        let (Some(token), Some(worker_id), Some(expires_at)) =
            (token, job.claimed_by.clone(), job.lease_expires_at)
        else {
            return Err(StorageError::Corrupt {
                id: job.id.0.clone(),
                reason: "active job without a complete lease".to_string(),
            });
        };

        let lease = Lease {
            job_id: job.id.clone(),
            worker_id,
            token,
            expires_at,
        };
        Ok(ClaimedJob { job, lease })
    }
}

fn parse_ts(s: &str) -> std::result::Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("bad timestamp {s:?}: {e}"))
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn insert(&self, job: &Job) -> Result<()> {
        let payload = serde_json::to_string(&job.payload)?;

        sqlx::query(
            r#"
            INSERT INTO jobs (id, name, payload, target_url, due_at, state, attempts, max_attempts, last_error, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id.0)
        .bind(&job.name)
        .bind(payload)
        .bind(&job.target_url)
        .bind(format_ts(job.due_at))
        .bind(job.state.as_str())
        .bind(job.attempts as i64)
        .bind(job.max_attempts as i64)
        .bind(&job.last_error)
        .bind(format_ts(job.created_at))
        .bind(format_ts(job.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn promote_due(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'ready', updated_at = ?
            WHERE state = 'delayed'
              AND due_at <= ?
            "#,
        )
        .bind(format_ts(now))
        .bind(format_ts(now))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn claim_next(
        &self,
        worker_id: &str,
        lease_token: &str,
        now: DateTime<Utc>,
        lease_expires_at: DateTime<Utc>,
    ) -> Result<Option<Job>> {
        // Select and update in one statement so two claimers can never both
        // see the same ready row.
        let row = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'active', claimed_by = ?, lease_token = ?, lease_expires_at = ?, updated_at = ?
            WHERE id = (
                SELECT id FROM jobs
                WHERE state = 'ready'
                ORDER BY due_at ASC, seq ASC
                LIMIT 1
            )
              AND state = 'ready'
            RETURNING *
            "#,
        )
        .bind(worker_id)
        .bind(lease_token)
        .bind(format_ts(lease_expires_at))
        .bind(format_ts(now))
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| self.row_to_job(&row)).transpose()
    }

    async fn release_lease(&self, lease: &Lease, release: &LeaseRelease) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET state = ?,
                due_at = COALESCE(?, due_at),
                last_error = COALESCE(?, last_error),
                attempts = attempts + 1,
                claimed_by = NULL,
                lease_token = NULL,
                lease_expires_at = NULL,
                updated_at = ?
            WHERE id = ?
              AND state = 'active'
              AND lease_token = ?
              AND (? IS NULL OR lease_expires_at > ?)
            "#,
        )
        .bind(release.state.as_str())
        .bind(release.due_at.map(format_ts))
        .bind(&release.last_error)
        .bind(format_ts(release.at))
        .bind(&lease.job_id.0)
        .bind(&lease.token)
        .bind(release.live_at.map(format_ts))
        .bind(release.live_at.map(format_ts))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn expired_leases(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<ClaimedJob>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM jobs
            WHERE state = 'active'
              AND lease_expires_at <= ?
            ORDER BY lease_expires_at ASC
            LIMIT ?
            "#,
        )
        .bind(format_ts(now))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|row| self.row_to_claimed(row)).collect()
    }

    async fn get_job(&self, id: &JobId) -> Result<Option<Job>> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = ?")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| self.row_to_job(&row)).transpose()
    }

    async fn jobs_by_state(&self, state: JobState, limit: u32) -> Result<Vec<Job>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM jobs
            WHERE state = ?
            ORDER BY updated_at DESC, seq DESC
            LIMIT ?
            "#,
        )
        .bind(state.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|row| self.row_to_job(row)).collect()
    }

    async fn stats(&self) -> Result<QueueStats> {
        let rows = sqlx::query("SELECT state, COUNT(*) AS n FROM jobs GROUP BY state")
            .fetch_all(&self.pool)
            .await?;

        let mut stats = QueueStats::default();
        for row in rows {
            let state: String = row.try_get("state")?;
            let n: i64 = row.try_get("n")?;
            let slot = match JobState::from_str(&state) {
                Ok(JobState::Delayed) => &mut stats.delayed,
                Ok(JobState::Ready) => &mut stats.ready,
                Ok(JobState::Active) => &mut stats.active,
                Ok(JobState::Completed) => &mut stats.completed,
                Ok(JobState::Failed) => &mut stats.failed,
                Err(_) => continue,
            };
            *slot = n as u64;
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use serde_json::json;

    fn job(state: JobState, due_at: DateTime<Utc>) -> Job {
        let now = Utc::now();
        Job {
            id: JobId::new(),
            name: "test".to_string(),
            payload: json!({"n": 1}),
            target_url: None,
            due_at,
            state,
            attempts: 0,
            max_attempts: 3,
            claimed_by: None,
            lease_expires_at: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn insert_and_get_preserves_record() {
        let store = SqliteStorage::in_memory().await.unwrap();
        let mut original = job(JobState::Delayed, Utc::now());
        original.target_url = Some("http://example.test/hook".to_string());
        original.payload = json!({"nested": {"list": [1, 2, 3]}, "s": "x"});
        store.insert(&original).await.unwrap();

        let loaded = store.get_job(&original.id).await.unwrap().unwrap();
        assert_eq!(loaded.payload, original.payload);
        assert_eq!(loaded.target_url, original.target_url);
        assert_eq!(loaded.state, JobState::Delayed);
        assert_eq!(format_ts(loaded.due_at), format_ts(original.due_at));
    }

    #[tokio::test]
    async fn get_unknown_job_is_none() {
        let store = SqliteStorage::in_memory().await.unwrap();
        assert!(store.get_job(&JobId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_id_is_rejected() {
        let store = SqliteStorage::in_memory().await.unwrap();
        let j = job(JobState::Ready, Utc::now());
        store.insert(&j).await.unwrap();
        assert!(store.insert(&j).await.is_err());
    }

    #[tokio::test]
    async fn promote_only_moves_due_jobs() {
        let store = SqliteStorage::in_memory().await.unwrap();
        let now = Utc::now();
        let due = job(JobState::Delayed, now - TimeDelta::seconds(1));
        let later = job(JobState::Delayed, now + TimeDelta::seconds(60));
        store.insert(&due).await.unwrap();
        store.insert(&later).await.unwrap();

        assert_eq!(store.promote_due(now).await.unwrap(), 1);
        assert_eq!(store.promote_due(now).await.unwrap(), 0);

        assert_eq!(store.get_job(&due.id).await.unwrap().unwrap().state, JobState::Ready);
        assert_eq!(store.get_job(&later.id).await.unwrap().unwrap().state, JobState::Delayed);
    }

    #[tokio::test]
    async fn claim_is_fifo_on_equal_due_time() {
        let store = SqliteStorage::in_memory().await.unwrap();
        let now = Utc::now();
        let first = job(JobState::Ready, now);
        let second = job(JobState::Ready, now);
        store.insert(&first).await.unwrap();
        store.insert(&second).await.unwrap();

        let expires = now + TimeDelta::seconds(30);
        let a = store.claim_next("w", "t1", now, expires).await.unwrap().unwrap();
        let b = store.claim_next("w", "t2", now, expires).await.unwrap().unwrap();
        assert_eq!(a.id, first.id);
        assert_eq!(b.id, second.id);
        assert!(store.claim_next("w", "t3", now, expires).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn release_requires_current_token() {
        let store = SqliteStorage::in_memory().await.unwrap();
        let now = Utc::now();
        let j = job(JobState::Ready, now);
        store.insert(&j).await.unwrap();
        let expires = now + TimeDelta::seconds(30);
        store.claim_next("w", "good", now, expires).await.unwrap().unwrap();

        let release = LeaseRelease {
            state: JobState::Completed,
            due_at: None,
            last_error: None,
            at: now,
            live_at: Some(now),
        };
        let stale = Lease {
            job_id: j.id.clone(),
            worker_id: "w".to_string(),
            token: "stale".to_string(),
            expires_at: expires,
        };
        assert!(!store.release_lease(&stale, &release).await.unwrap());

        let current = Lease {
            token: "good".to_string(),
            ..stale
        };
        assert!(store.release_lease(&current, &release).await.unwrap());
        assert!(!store.release_lease(&current, &release).await.unwrap());

        let done = store.get_job(&j.id).await.unwrap().unwrap();
        assert_eq!(done.state, JobState::Completed);
        assert_eq!(done.attempts, 1);
        assert!(done.lease_expires_at.is_none());
        assert!(done.claimed_by.is_none());
    }

    #[tokio::test]
    async fn release_with_live_at_rejects_expired_lease() {
        let store = SqliteStorage::in_memory().await.unwrap();
        let now = Utc::now();
        let j = job(JobState::Ready, now);
        store.insert(&j).await.unwrap();
        let expires = now + TimeDelta::seconds(30);
        store.claim_next("w", "tok", now, expires).await.unwrap().unwrap();

        let lease = Lease {
            job_id: j.id.clone(),
            worker_id: "w".to_string(),
            token: "tok".to_string(),
            expires_at: expires,
        };
        let late = now + TimeDelta::seconds(120);
        let worker_report = LeaseRelease {
            state: JobState::Completed,
            due_at: None,
            last_error: None,
            at: late,
            live_at: Some(late),
        };
        assert!(!store.release_lease(&lease, &worker_report).await.unwrap());
        assert_eq!(store.get_job(&j.id).await.unwrap().unwrap().state, JobState::Active);

        let reap = LeaseRelease {
            state: JobState::Failed,
            due_at: None,
            last_error: Some("LeaseExpired".to_string()),
            at: late,
            live_at: None,
        };
        assert!(store.release_lease(&lease, &reap).await.unwrap());
        assert_eq!(store.get_job(&j.id).await.unwrap().unwrap().state, JobState::Failed);
    }

    #[tokio::test]
    async fn out_of_range_attempts_are_reported_as_corrupt() {
        let store = SqliteStorage::in_memory().await.unwrap();
        let j = job(JobState::Ready, Utc::now());
        store.insert(&j).await.unwrap();
        sqlx::query("UPDATE jobs SET attempts = -1 WHERE id = ?")
            .bind(&j.id.0)
            .execute(&store.pool)
            .await
            .unwrap();

        let err = store.get_job(&j.id).await.unwrap_err();
        assert!(matches!(err, StorageError::Corrupt { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn expired_leases_returns_lease_details() {
        let store = SqliteStorage::in_memory().await.unwrap();
        let now = Utc::now();
        store.insert(&job(JobState::Ready, now)).await.unwrap();
        store.insert(&job(JobState::Ready, now)).await.unwrap();
        store
            .claim_next("w1", "t1", now, now + TimeDelta::seconds(1))
            .await
            .unwrap();
        store
            .claim_next("w2", "t2", now, now + TimeDelta::seconds(60))
            .await
            .unwrap();

        let expired = store
            .expired_leases(now + TimeDelta::seconds(5), 10)
            .await
            .unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].lease.worker_id, "w1");
        assert_eq!(expired[0].lease.token, "t1");
    }

    #[tokio::test]
    async fn stats_count_each_state() {
        let store = SqliteStorage::in_memory().await.unwrap();
        let now = Utc::now();
        store.insert(&job(JobState::Delayed, now)).await.unwrap();
        store.insert(&job(JobState::Ready, now)).await.unwrap();
        store.insert(&job(JobState::Ready, now)).await.unwrap();
        store.insert(&job(JobState::Failed, now)).await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.delayed, 1);
        assert_eq!(stats.ready, 2);
        assert_eq!(stats.active, 0);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.total(), 4);
    }
}
