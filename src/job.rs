use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{fmt, str::FromStr};

/// Unique identifier for a job
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for JobId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Lifecycle state of a job.
///
/// `Delayed -> Ready -> Active -> Completed | Delayed | Failed`. A job leaving
/// `Active` for another attempt always goes back through `Delayed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Delayed,
    Ready,
    Active,
    Completed,
    Failed,
}

impl JobState {
    pub const ALL: [JobState; 5] = [
        JobState::Delayed,
        JobState::Ready,
        JobState::Active,
        JobState::Completed,
        JobState::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Delayed => "delayed",
            JobState::Ready => "ready",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown job state: {0}")]
pub struct UnknownState(pub String);

impl FromStr for JobState {
    type Err = UnknownState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "delayed" => Ok(JobState::Delayed),
            "ready" => Ok(JobState::Ready),
            "active" => Ok(JobState::Active),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            other => Err(UnknownState(other.to_string())),
        }
    }
}

/// A persisted job record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub name: String,
    pub payload: Value,
    pub target_url: Option<String>,
    pub due_at: DateTime<Utc>,
    pub state: JobState,
    pub attempts: u32,
    pub max_attempts: u32,
    pub claimed_by: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A submission waiting to be turned into a [`Job`].
///
/// The payload stays optional here so that the engine, not the caller,
/// decides what counts as missing.
#[derive(Debug, Clone, Default)]
pub struct NewJob {
    pub name: String,
    pub payload: Option<Value>,
    pub execute_at: Option<DateTime<Utc>>,
    pub delay: Option<TimeDelta>,
    pub target_url: Option<String>,
    pub max_attempts: Option<u32>,
}

impl NewJob {
    pub fn new<S: Into<String>>(name: S, payload: Value) -> Self {
        Self {
            name: name.into(),
            payload: Some(payload),
            ..Default::default()
        }
    }

    pub fn with_delay(mut self, delay: TimeDelta) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_delay_ms(self, delay_ms: i64) -> Self {
        self.with_delay(delay_from_ms(delay_ms))
    }

    pub fn execute_at(mut self, at: DateTime<Utc>) -> Self {
        self.execute_at = Some(at);
        self
    }

    pub fn with_target_url<S: Into<String>>(mut self, url: S) -> Self {
        self.target_url = Some(url.into());
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Absolute time wins over a relative delay; anything in the past is
    /// clamped to `now`. Returns `None` when the due time is later than
    /// [`latest_ts`].
    pub fn resolve_due_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let due = match (self.execute_at, self.delay) {
            (Some(at), _) => at,
            (None, Some(delay)) if delay > TimeDelta::zero() => now.checked_add_signed(delay)?,
            (None, _) => now,
        };
        let due = due.max(now);
        (due <= latest_ts()).then_some(due)
    }
}

/// Exclusive, time-bounded claim on an active job.
///
/// The token is regenerated on every claim, so a worker holding a stale lease
/// can never complete or fail a job that has since been claimed again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub job_id: JobId,
    pub worker_id: String,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// A job handed to a worker together with its lease
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub job: Job,
    pub lease: Lease,
}

impl std::ops::Deref for ClaimedJob {
    type Target = Job;

    fn deref(&self) -> &Self::Target {
        &self.job
    }
}

/// Job counts per state, served by the admin interface
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub delayed: u64,
    pub ready: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
}

impl QueueStats {
    pub fn get(&self, state: JobState) -> u64 {
        match state {
            JobState::Delayed => self.delayed,
            JobState::Ready => self.ready,
            JobState::Active => self.active,
            JobState::Completed => self.completed,
            JobState::Failed => self.failed,
        }
    }

    pub fn total(&self) -> u64 {
        self.delayed + self.ready + self.active + self.completed + self.failed
    }
}

/// Out-of-range millisecond delays saturate: negative ones to zero (due
/// now), positive ones to the largest delta, which enqueue then rejects.
pub(crate) fn delay_from_ms(delay_ms: i64) -> TimeDelta {
    TimeDelta::try_milliseconds(delay_ms).unwrap_or(if delay_ms < 0 {
        TimeDelta::zero()
    } else {
        TimeDelta::MAX
    })
}

/// Latest instant the store can hold. Past year 9999 RFC 3339 needs a
/// signed, wider year and text ordering no longer matches time ordering.
pub fn latest_ts() -> DateTime<Utc> {
    DateTime::from_timestamp(253_402_300_799, 999_999_000).unwrap_or_default()
}

/// Fixed-width RFC 3339 so stored timestamps sort and compare as text.
/// Callers keep values at or before [`latest_ts`].
pub(crate) fn format_ts(dt: DateTime<Utc>) -> String {
    dt.min(latest_ts()).to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-01-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn due_at_defaults_to_now() {
        let job = NewJob::new("ping", json!({}));
        assert_eq!(job.resolve_due_at(now()), Some(now()));
    }

    #[test]
    fn due_at_applies_delay() {
        let job = NewJob::new("ping", json!({})).with_delay_ms(5_000);
        assert_eq!(job.resolve_due_at(now()), Some(now() + TimeDelta::seconds(5)));
    }

    #[test]
    fn absolute_time_wins_over_delay() {
        let at = now() + TimeDelta::minutes(10);
        let job = NewJob::new("ping", json!({}))
            .with_delay_ms(5_000)
            .execute_at(at);
        assert_eq!(job.resolve_due_at(now()), Some(at));
    }

    #[test]
    fn past_times_are_clamped() {
        let job = NewJob::new("ping", json!({})).with_delay_ms(-60_000);
        assert_eq!(job.resolve_due_at(now()), Some(now()));

        let job = NewJob::new("ping", json!({})).execute_at(now() - TimeDelta::hours(1));
        assert_eq!(job.resolve_due_at(now()), Some(now()));
    }

    #[test]
    fn extreme_delays_do_not_overflow() {
        let job = NewJob::new("ping", json!({})).with_delay_ms(i64::MIN);
        assert_eq!(job.resolve_due_at(now()), Some(now()));

        let job = NewJob::new("ping", json!({})).with_delay_ms(i64::MAX);
        assert_eq!(job.resolve_due_at(now()), None);
    }

    #[test]
    fn due_at_beyond_year_9999_is_out_of_range() {
        let job = NewJob::new("ping", json!({})).with_delay_ms(400_000_000_000_000);
        assert_eq!(job.resolve_due_at(now()), None);

        let job = NewJob::new("ping", json!({})).execute_at(latest_ts() + TimeDelta::seconds(1));
        assert_eq!(job.resolve_due_at(now()), None);

        let job = NewJob::new("ping", json!({})).execute_at(latest_ts());
        assert_eq!(job.resolve_due_at(now()), Some(latest_ts()));
    }

    #[test]
    fn latest_timestamp_stays_fixed_width() {
        assert_eq!(format_ts(latest_ts()), "9999-12-31T23:59:59.999999Z");
        assert!(format_ts(now()) < format_ts(latest_ts()));
    }

    #[test]
    fn state_round_trips_through_str() {
        for state in JobState::ALL {
            assert_eq!(state.as_str().parse::<JobState>().unwrap(), state);
        }
        assert!("processing".parse::<JobState>().is_err());
    }

    #[test]
    fn timestamps_sort_as_text() {
        let a = format_ts(now());
        let b = format_ts(now() + TimeDelta::microseconds(1));
        let c = format_ts(now() + TimeDelta::days(400));
        assert!(a < b && b < c);
        assert!(a.ends_with('Z'));
    }
}
