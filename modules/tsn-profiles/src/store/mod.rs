// Store seams for the profile pipeline.
//
// - LogReader: read-only queries over the transcription log tables
// - ProfileSink: writes to profile tables inside batch transactions
// - CallsignRegistry: `callsigns` mutations used by validation
//
// PgStore implements all three against Postgres; testing.rs has in-memory
// versions so the whole pipeline runs without a database.

pub mod pg;
mod row;

pub use pg::PgStore;
pub use row::{Row, SqlValue, Table};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use tsn_common::Result;

use crate::capabilities::{StoreCapabilities, TranscriptTable};

// ---------------------------------------------------------------------------
// Read-side records
// ---------------------------------------------------------------------------

/// Segment counts for one callsign from `callsign_log`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SegmentCounts {
    pub total: i64,
    pub last_seen: Option<DateTime<Utc>>,
}

/// Distinct nets a callsign appeared in, from `net_participation`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParticipationSummary {
    pub distinct_nets: i64,
    pub last_seen: Option<DateTime<Utc>>,
}

/// Aggregates over a set of `net_data` sessions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionMetrics {
    pub count: i64,
    pub unique_nets: i64,
    pub avg_checkins: Option<f64>,
    pub avg_duration_min: Option<f64>,
    pub first_start: Option<DateTime<Utc>>,
    pub last_start: Option<DateTime<Utc>>,
}

/// One `net_data` session row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetSession {
    pub id: i64,
    pub net_id: String,
    pub start_transcript_id: Option<i64>,
    pub end_transcript_id: Option<i64>,
    pub ncs_callsign: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl NetSession {
    /// Inclusive transcript id bounds, when both are set and ordered.
    pub fn transcript_span(&self) -> Option<(i64, i64)> {
        match (self.start_transcript_id, self.end_transcript_id) {
            (Some(st), Some(en)) if st > 0 && en >= st => Some((st, en)),
            _ => None,
        }
    }
}

/// Transcript text row.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptRow {
    pub id: i64,
    pub filename: Option<String>,
    pub text: Option<String>,
}

// ---------------------------------------------------------------------------
// LogReader
// ---------------------------------------------------------------------------

/// Parameterized read queries over the log tables. Every `since` bound keeps
/// rows whose timestamp is NULL.
#[async_trait]
pub trait LogReader: Send + Sync {
    async fn capabilities(&self) -> Result<StoreCapabilities>;

    /// `SELECT callsign FROM callsigns`
    async fn registered_callsigns(&self) -> Result<Vec<String>>;

    /// `SELECT DISTINCT callsign FROM callsign_log`
    async fn logged_callsigns(&self) -> Result<Vec<String>>;

    async fn segment_counts(&self, callsign: &str, since: DateTime<Utc>) -> Result<SegmentCounts>;

    /// Segments joined to `transcription_analysis` with `is_net = 1`.
    async fn net_segment_count(&self, callsign: &str, since: DateTime<Utc>) -> Result<i64>;

    async fn participation(&self, callsign: &str, since: DateTime<Utc>)
        -> Result<ParticipationSummary>;

    /// Newest-first distinct transcript ids linked to `callsign`.
    async fn recent_transcript_ids(
        &self,
        callsign: &str,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<i64>>;

    /// Rows from one transcript table, newest first.
    async fn transcripts(&self, table: TranscriptTable, ids: &[i64]) -> Result<Vec<TranscriptRow>>;

    /// Non-empty `net_id`s from `net_data`.
    async fn session_net_ids(&self) -> Result<Vec<String>>;

    /// Non-empty `net_id`s from `net_participation`.
    async fn participation_net_ids(&self) -> Result<Vec<String>>;

    /// Most recent sessions of a net, by id descending.
    async fn net_sessions(&self, net_id: &str, since: DateTime<Utc>, limit: i64)
        -> Result<Vec<NetSession>>;

    async fn net_session_metrics(
        &self,
        net_id: &str,
        since: DateTime<Utc>,
        with_checkins: bool,
    ) -> Result<SessionMetrics>;

    async fn net_participants(&self, net_id: &str, since: DateTime<Utc>, limit: i64)
        -> Result<Vec<String>>;

    /// Distinct `net_data.ncs_callsign` within the window.
    async fn session_ncs_callsigns(&self, since: DateTime<Utc>) -> Result<Vec<String>>;

    /// Distinct `net_participation.callsign` with `role = 'NCS'` within the window.
    async fn role_ncs_callsigns(&self, since: DateTime<Utc>) -> Result<Vec<String>>;

    /// Sessions led by `callsign`.
    async fn ncs_session_metrics(
        &self,
        callsign: &str,
        since: DateTime<Utc>,
        with_checkins: bool,
    ) -> Result<SessionMetrics>;

    async fn ncs_role_count(&self, callsign: &str, since: DateTime<Utc>) -> Result<i64>;

    async fn ncs_sessions(&self, callsign: &str, since: DateTime<Utc>, limit: i64)
        -> Result<Vec<NetSession>>;
}

// ---------------------------------------------------------------------------
// ProfileSink
// ---------------------------------------------------------------------------

/// Lineage row registered at the start of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct NewModelRun {
    pub run_uuid: String,
    pub model_name: String,
    pub model_params: serde_json::Value,
    pub prompt_hash: String,
    pub code_version: String,
    pub notes: String,
}

/// Writes go into an open batch transaction until `commit`. Each entity's
/// writes sit between `begin_entity` and `end_entity` so a failed entity
/// rolls back alone.
#[async_trait]
pub trait ProfileSink: Send + Sync {
    /// Take the run-level lock. `false` when another run holds it.
    async fn try_lock_run(&self) -> Result<bool>;

    async fn unlock_run(&self) -> Result<()>;

    /// Insert the lineage row outside any batch and return its id.
    async fn start_model_run(&self, run: &NewModelRun) -> Result<i64>;

    async fn finish_model_run(&self, model_run_id: i64) -> Result<()>;

    async fn begin_entity(&self) -> Result<()>;

    /// Keep (`succeeded`) or discard the writes since `begin_entity`.
    async fn end_entity(&self, succeeded: bool) -> Result<()>;

    /// Insert, or update every non-key column on key conflict.
    async fn upsert(&self, row: Row) -> Result<()>;

    /// Plain insert into an append-only table.
    async fn insert(&self, row: Row) -> Result<()>;

    async fn commit(&self) -> Result<()>;
}

// ---------------------------------------------------------------------------
// CallsignRegistry
// ---------------------------------------------------------------------------

#[async_trait]
pub trait CallsignRegistry: Send + Sync {
    /// `callsigns` rows with `validated = 0`.
    async fn unvalidated_callsigns(&self) -> Result<Vec<String>>;

    async fn mark_validated(&self, callsign: &str) -> Result<()>;

    async fn delete_callsign(&self, callsign: &str) -> Result<()>;
}
