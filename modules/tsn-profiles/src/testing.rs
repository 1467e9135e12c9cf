// In-memory doubles for the pipeline seams.
//
// - MemoryLogStore (LogReader + CallsignRegistry): builder-populated log tables
// - MemoryProfileStore (ProfileSink): pending writes, per-entity rollback, commits
// - CannedChat (JsonChat): fixed replies keyed by system prompt

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Mutex;

use ai_client::{AiError, JsonChat};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tsn_common::{ProfileError, Result};

use crate::capabilities::{StoreCapabilities, TranscriptTable};
use crate::store::{
    CallsignRegistry, LogReader, NetSession, NewModelRun, ParticipationSummary, ProfileSink, Row,
    SegmentCounts, SessionMetrics, Table, TranscriptRow,
};

fn within(at: Option<DateTime<Utc>>, since: DateTime<Utc>) -> bool {
    at.map_or(true, |t| t >= since)
}

fn same(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

// ---------------------------------------------------------------------------
// MemoryLogStore
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Segment {
    callsign: String,
    transcript_id: Option<i64>,
    at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct Participation {
    net_id: String,
    callsign: String,
    role: Option<String>,
    at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct Session {
    session: NetSession,
    checkins: Option<i64>,
}

/// Log tables held in memory. Builder pattern: `.segment()`, `.participant()`,
/// `.session()`, `.transcript()`, `.fail_on()`.
pub struct MemoryLogStore {
    caps: StoreCapabilities,
    registry: Mutex<Vec<(String, bool)>>,
    segments: Vec<Segment>,
    net_transcripts: HashSet<i64>,
    participation: Vec<Participation>,
    sessions: Vec<Session>,
    transcripts: BTreeMap<i64, String>,
    large_transcripts: BTreeMap<i64, String>,
    failing: HashSet<String>,
}

impl Default for MemoryLogStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLogStore {
    /// Every optional table present, all empty.
    pub fn new() -> Self {
        Self {
            caps: StoreCapabilities::all(),
            registry: Mutex::new(Vec::new()),
            segments: Vec::new(),
            net_transcripts: HashSet::new(),
            participation: Vec::new(),
            sessions: Vec::new(),
            transcripts: BTreeMap::new(),
            large_transcripts: BTreeMap::new(),
            failing: HashSet::new(),
        }
    }

    pub fn with_capabilities(mut self, caps: StoreCapabilities) -> Self {
        self.caps = caps;
        self
    }

    /// Row in `callsigns`, not yet validated.
    pub fn register(self, callsign: &str) -> Self {
        self.push_registry(callsign, false)
    }

    pub fn register_validated(self, callsign: &str) -> Self {
        self.push_registry(callsign, true)
    }

    fn push_registry(self, callsign: &str, validated: bool) -> Self {
        if let Ok(mut registry) = self.registry.lock() {
            registry.push((callsign.to_string(), validated));
        }
        self
    }

    /// Row in `callsign_log`.
    pub fn segment(mut self, callsign: &str, transcript_id: i64, at: DateTime<Utc>) -> Self {
        self.segments.push(Segment {
            callsign: callsign.to_string(),
            transcript_id: Some(transcript_id),
            at: Some(at),
        });
        self
    }

    /// `transcription_analysis` row with `is_net = 1`.
    pub fn net_transcript(mut self, transcript_id: i64) -> Self {
        self.net_transcripts.insert(transcript_id);
        self
    }

    pub fn participant(
        mut self,
        net_id: &str,
        callsign: &str,
        role: Option<&str>,
        at: DateTime<Utc>,
    ) -> Self {
        self.participation.push(Participation {
            net_id: net_id.to_string(),
            callsign: callsign.to_string(),
            role: role.map(str::to_string),
            at: Some(at),
        });
        self
    }

    /// Row in `net_data`.
    pub fn session(mut self, session: NetSession, checkins: Option<i64>) -> Self {
        self.sessions.push(Session { session, checkins });
        self
    }

    pub fn transcript(mut self, id: i64, text: &str) -> Self {
        self.transcripts.insert(id, text.to_string());
        self
    }

    pub fn large_transcript(mut self, id: i64, text: &str) -> Self {
        self.large_transcripts.insert(id, text.to_string());
        self
    }

    /// Every per-entity query for `key` (callsign or net id) errors.
    pub fn fail_on(mut self, key: &str) -> Self {
        self.failing.insert(key.to_uppercase());
        self
    }

    /// `(callsign, validated)` rows currently in `callsigns`.
    pub fn registry(&self) -> Vec<(String, bool)> {
        self.registry
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    fn check(&self, key: &str) -> Result<()> {
        if self.failing.contains(&key.to_uppercase()) {
            return Err(ProfileError::Validation(format!(
                "MemoryLogStore: injected failure for {key}"
            )));
        }
        Ok(())
    }

    fn segments_of<'s>(
        &'s self,
        callsign: &'s str,
        since: DateTime<Utc>,
    ) -> impl Iterator<Item = &'s Segment> + 's {
        self.segments
            .iter()
            .filter(move |s| same(&s.callsign, callsign) && within(s.at, since))
    }

    fn sessions_where<'s>(
        &'s self,
        pred: impl Fn(&NetSession) -> bool + 's,
        since: DateTime<Utc>,
    ) -> impl Iterator<Item = &'s Session> + 's {
        self.sessions
            .iter()
            .filter(move |s| pred(&s.session) && within(s.session.start_time, since))
    }

    fn newest_sessions<'s>(
        &'s self,
        pred: impl Fn(&NetSession) -> bool + 's,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Vec<NetSession> {
        let mut sessions: Vec<NetSession> = self
            .sessions_where(pred, since)
            .map(|s| s.session.clone())
            .collect();
        sessions.sort_by(|a, b| b.id.cmp(&a.id));
        sessions.truncate(limit.max(0) as usize);
        sessions
    }
}

fn metrics<'s>(sessions: impl Iterator<Item = &'s Session>, with_checkins: bool) -> SessionMetrics {
    let sessions: Vec<&Session> = sessions.collect();
    let mean = |values: Vec<f64>| {
        (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
    };

    let checkins = sessions
        .iter()
        .filter_map(|s| s.checkins)
        .map(|c| c as f64)
        .collect();
    let durations = sessions
        .iter()
        .filter_map(|s| match (s.session.start_time, s.session.end_time) {
            (Some(start), Some(end)) => Some((end - start).num_seconds() as f64 / 60.0),
            _ => None,
        })
        .collect();
    let starts: Vec<DateTime<Utc>> = sessions.iter().filter_map(|s| s.session.start_time).collect();

    SessionMetrics {
        count: sessions.len() as i64,
        unique_nets: sessions
            .iter()
            .map(|s| s.session.net_id.as_str())
            .collect::<BTreeSet<_>>()
            .len() as i64,
        avg_checkins: if with_checkins { mean(checkins) } else { None },
        avg_duration_min: mean(durations),
        first_start: starts.iter().min().copied(),
        last_start: starts.iter().max().copied(),
    }
}

#[async_trait]
impl LogReader for MemoryLogStore {
    async fn capabilities(&self) -> Result<StoreCapabilities> {
        Ok(self.caps)
    }

    async fn registered_callsigns(&self) -> Result<Vec<String>> {
        Ok(self.registry().into_iter().map(|(cs, _)| cs).collect())
    }

    async fn logged_callsigns(&self) -> Result<Vec<String>> {
        Ok(self
            .segments
            .iter()
            .map(|s| s.callsign.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect())
    }

    async fn segment_counts(&self, callsign: &str, since: DateTime<Utc>) -> Result<SegmentCounts> {
        self.check(callsign)?;
        let segments: Vec<&Segment> = self.segments_of(callsign, since).collect();
        Ok(SegmentCounts {
            total: segments.len() as i64,
            last_seen: segments.iter().filter_map(|s| s.at).max(),
        })
    }

    async fn net_segment_count(&self, callsign: &str, since: DateTime<Utc>) -> Result<i64> {
        self.check(callsign)?;
        Ok(self
            .segments_of(callsign, since)
            .filter(|s| {
                s.transcript_id
                    .is_some_and(|id| self.net_transcripts.contains(&id))
            })
            .count() as i64)
    }

    async fn participation(
        &self,
        callsign: &str,
        since: DateTime<Utc>,
    ) -> Result<ParticipationSummary> {
        self.check(callsign)?;
        let rows: Vec<&Participation> = self
            .participation
            .iter()
            .filter(|p| same(&p.callsign, callsign) && within(p.at, since))
            .collect();
        Ok(ParticipationSummary {
            distinct_nets: rows
                .iter()
                .map(|p| p.net_id.as_str())
                .collect::<BTreeSet<_>>()
                .len() as i64,
            last_seen: rows.iter().filter_map(|p| p.at).max(),
        })
    }

    async fn recent_transcript_ids(
        &self,
        callsign: &str,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<i64>> {
        self.check(callsign)?;
        let ids: BTreeSet<i64> = self
            .segments_of(callsign, since)
            .filter_map(|s| s.transcript_id)
            .filter(|id| *id > 0)
            .collect();
        Ok(ids.into_iter().rev().take(limit.max(0) as usize).collect())
    }

    async fn transcripts(&self, table: TranscriptTable, ids: &[i64]) -> Result<Vec<TranscriptRow>> {
        let source = match table {
            TranscriptTable::Primary => &self.transcripts,
            TranscriptTable::Overflow => &self.large_transcripts,
        };
        let wanted: BTreeSet<i64> = ids.iter().copied().collect();
        Ok(wanted
            .into_iter()
            .rev()
            .filter_map(|id| {
                source.get(&id).map(|text| TranscriptRow {
                    id,
                    filename: Some(format!("{id}.wav")),
                    text: Some(text.clone()),
                })
            })
            .collect())
    }

    async fn session_net_ids(&self) -> Result<Vec<String>> {
        Ok(self
            .sessions
            .iter()
            .map(|s| s.session.net_id.clone())
            .filter(|n| !n.is_empty())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect())
    }

    async fn participation_net_ids(&self) -> Result<Vec<String>> {
        Ok(self
            .participation
            .iter()
            .map(|p| p.net_id.clone())
            .filter(|n| !n.is_empty())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect())
    }

    async fn net_sessions(
        &self,
        net_id: &str,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<NetSession>> {
        self.check(net_id)?;
        let net_id = net_id.to_string();
        Ok(self.newest_sessions(move |s| s.net_id == net_id, since, limit))
    }

    async fn net_session_metrics(
        &self,
        net_id: &str,
        since: DateTime<Utc>,
        with_checkins: bool,
    ) -> Result<SessionMetrics> {
        self.check(net_id)?;
        let net_id = net_id.to_string();
        Ok(metrics(
            self.sessions_where(move |s| s.net_id == net_id, since),
            with_checkins,
        ))
    }

    async fn net_participants(
        &self,
        net_id: &str,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<String>> {
        self.check(net_id)?;
        Ok(self
            .participation
            .iter()
            .filter(|p| p.net_id == net_id && within(p.at, since))
            .map(|p| p.callsign.trim().to_uppercase())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn session_ncs_callsigns(&self, since: DateTime<Utc>) -> Result<Vec<String>> {
        Ok(self
            .sessions_where(|_| true, since)
            .filter_map(|s| s.session.ncs_callsign.clone())
            .filter(|cs| !cs.is_empty())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect())
    }

    async fn role_ncs_callsigns(&self, since: DateTime<Utc>) -> Result<Vec<String>> {
        Ok(self
            .participation
            .iter()
            .filter(|p| p.role.as_deref() == Some("NCS") && within(p.at, since))
            .map(|p| p.callsign.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect())
    }

    async fn ncs_session_metrics(
        &self,
        callsign: &str,
        since: DateTime<Utc>,
        with_checkins: bool,
    ) -> Result<SessionMetrics> {
        self.check(callsign)?;
        let callsign = callsign.to_string();
        Ok(metrics(
            self.sessions_where(
                move |s| s.ncs_callsign.as_deref().is_some_and(|n| same(n, &callsign)),
                since,
            ),
            with_checkins,
        ))
    }

    async fn ncs_role_count(&self, callsign: &str, since: DateTime<Utc>) -> Result<i64> {
        self.check(callsign)?;
        Ok(self
            .participation
            .iter()
            .filter(|p| {
                same(&p.callsign, callsign)
                    && p.role.as_deref() == Some("NCS")
                    && within(p.at, since)
            })
            .count() as i64)
    }

    async fn ncs_sessions(
        &self,
        callsign: &str,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<NetSession>> {
        self.check(callsign)?;
        let callsign = callsign.to_string();
        Ok(self.newest_sessions(
            move |s| s.ncs_callsign.as_deref().is_some_and(|n| same(n, &callsign)),
            since,
            limit,
        ))
    }
}

#[async_trait]
impl CallsignRegistry for MemoryLogStore {
    async fn unvalidated_callsigns(&self) -> Result<Vec<String>> {
        let mut pending: Vec<String> = self
            .registry()
            .into_iter()
            .filter(|(_, validated)| !validated)
            .map(|(cs, _)| cs)
            .collect();
        pending.sort();
        Ok(pending)
    }

    async fn mark_validated(&self, callsign: &str) -> Result<()> {
        let mut registry = self
            .registry
            .lock()
            .map_err(|_| ProfileError::Validation("registry lock poisoned".into()))?;
        for entry in registry.iter_mut().filter(|(cs, _)| cs == callsign) {
            entry.1 = true;
        }
        Ok(())
    }

    async fn delete_callsign(&self, callsign: &str) -> Result<()> {
        let mut registry = self
            .registry
            .lock()
            .map_err(|_| ProfileError::Validation("registry lock poisoned".into()))?;
        registry.retain(|(cs, _)| cs != callsign);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryProfileStore
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct ModelRunRecord {
    pub id: i64,
    pub run: NewModelRun,
    pub finished: bool,
}

#[derive(Debug, Clone)]
enum Write {
    Upsert(Row),
    Insert(Row),
}

#[derive(Default)]
struct SinkState {
    keyed: BTreeMap<Table, BTreeMap<Vec<String>, Row>>,
    appended: Vec<Row>,
    pending: Vec<Write>,
    entity_start: Option<usize>,
    model_runs: Vec<ModelRunRecord>,
    locked: bool,
    commits: usize,
}

impl SinkState {
    fn apply(&mut self, write: Write) {
        match write {
            Write::Insert(row) => self.appended.push(row),
            Write::Upsert(row) => {
                let table = self.keyed.entry(row.table).or_default();
                let key = row.key();
                let merged = match table.remove(&key) {
                    Some(existing) => row
                        .columns
                        .into_iter()
                        .fold(existing, |acc, (c, v)| acc.set(c, v)),
                    None => row,
                };
                table.insert(key, merged);
            }
        }
    }
}

/// Profile tables held in memory. Writes stay pending until `commit`; a
/// failed entity drops its own pending writes.
#[derive(Default)]
pub struct MemoryProfileStore {
    state: Mutex<SinkState>,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<std::sync::MutexGuard<'_, SinkState>> {
        self.state
            .lock()
            .map_err(|_| ProfileError::Validation("MemoryProfileStore lock poisoned".into()))
    }

    /// Pretend another run holds the run lock.
    pub fn hold_lock(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.locked = true;
        }
    }

    pub fn is_locked(&self) -> bool {
        self.state.lock().map(|s| s.locked).unwrap_or(false)
    }

    /// Committed rows of `table`. Keyed tables come back in key order.
    pub fn rows(&self, table: Table) -> Vec<Row> {
        let Ok(state) = self.state.lock() else {
            return Vec::new();
        };
        if table.is_append_only() {
            state
                .appended
                .iter()
                .filter(|r| r.table == table)
                .cloned()
                .collect()
        } else {
            state
                .keyed
                .get(&table)
                .map(|rows| rows.values().cloned().collect())
                .unwrap_or_default()
        }
    }

    /// Committed row of a keyed table.
    pub fn row(&self, table: Table, key: &[&str]) -> Option<Row> {
        let key: Vec<String> = key.iter().map(|k| k.to_string()).collect();
        let state = self.state.lock().ok()?;
        state.keyed.get(&table)?.get(&key).cloned()
    }

    pub fn count(&self, table: Table) -> usize {
        self.rows(table).len()
    }

    pub fn model_runs(&self) -> Vec<ModelRunRecord> {
        self.state
            .lock()
            .map(|s| s.model_runs.clone())
            .unwrap_or_default()
    }

    pub fn commits(&self) -> usize {
        self.state.lock().map(|s| s.commits).unwrap_or(0)
    }

    /// Writes not yet committed.
    pub fn pending(&self) -> usize {
        self.state.lock().map(|s| s.pending.len()).unwrap_or(0)
    }
}

#[async_trait]
impl ProfileSink for MemoryProfileStore {
    async fn try_lock_run(&self) -> Result<bool> {
        let mut state = self.state()?;
        if state.locked {
            return Ok(false);
        }
        state.locked = true;
        Ok(true)
    }

    async fn unlock_run(&self) -> Result<()> {
        self.state()?.locked = false;
        Ok(())
    }

    async fn start_model_run(&self, run: &NewModelRun) -> Result<i64> {
        let mut state = self.state()?;
        let id = state.model_runs.len() as i64 + 1;
        state.model_runs.push(ModelRunRecord {
            id,
            run: run.clone(),
            finished: false,
        });
        Ok(id)
    }

    async fn finish_model_run(&self, model_run_id: i64) -> Result<()> {
        let mut state = self.state()?;
        let run = state
            .model_runs
            .iter_mut()
            .find(|r| r.id == model_run_id)
            .ok_or_else(|| ProfileError::Validation(format!("unknown model run {model_run_id}")))?;
        run.finished = true;
        Ok(())
    }

    async fn begin_entity(&self) -> Result<()> {
        let mut state = self.state()?;
        state.entity_start = Some(state.pending.len());
        Ok(())
    }

    async fn end_entity(&self, succeeded: bool) -> Result<()> {
        let mut state = self.state()?;
        if let Some(start) = state.entity_start.take() {
            if !succeeded {
                state.pending.truncate(start);
            }
        }
        Ok(())
    }

    async fn upsert(&self, row: Row) -> Result<()> {
        if row.table.is_append_only() || !row.has_key_columns() {
            return Err(ProfileError::Validation(format!(
                "upsert into {} needs its key columns",
                row.table.name()
            )));
        }
        self.state()?.pending.push(Write::Upsert(row));
        Ok(())
    }

    async fn insert(&self, row: Row) -> Result<()> {
        if !row.table.is_append_only() {
            return Err(ProfileError::Validation(format!(
                "{} is not append-only",
                row.table.name()
            )));
        }
        self.state()?.pending.push(Write::Insert(row));
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        let mut state = self.state()?;
        let pending = std::mem::take(&mut state.pending);
        for write in pending {
            state.apply(write);
        }
        state.entity_start = None;
        state.commits += 1;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// CannedChat
// ---------------------------------------------------------------------------

/// Returns a fixed JSON reply per system prompt. Prompts mentioning a
/// registered marker fail with a permanent API error.
#[derive(Default)]
pub struct CannedChat {
    replies: Vec<(String, Value)>,
    failing: Vec<String>,
    calls: Mutex<Vec<String>>,
}

impl CannedChat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(mut self, system_prompt: &str, reply: Value) -> Self {
        self.replies.push((system_prompt.to_string(), reply));
        self
    }

    pub fn fail_when_prompt_mentions(mut self, marker: &str) -> Self {
        self.failing.push(marker.to_string());
        self
    }

    /// User prompts received so far.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl JsonChat for CannedChat {
    async fn chat_json(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        _schema_hint: Option<&Value>,
    ) -> std::result::Result<Value, AiError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(user_prompt.to_string());
        }
        if self.failing.iter().any(|m| user_prompt.contains(m.as_str())) {
            return Err(AiError::Api {
                status: 400,
                body: "CannedChat: rejected prompt".into(),
            });
        }
        self.replies
            .iter()
            .find(|(system, _)| system == system_prompt)
            .map(|(_, reply)| reply.clone())
            .ok_or_else(|| AiError::Parse("CannedChat: no reply registered".into()))
    }
}
