use std::collections::{BTreeSet, HashSet};

use ai_client::take_chars;
use chrono::{DateTime, Utc};
use tracing::debug;

use tsn_common::{normalize_callsign, Result};

use crate::budget::{
    CharBudget, EvidenceBudgets, CALLSIGN_SNIPPET_CHARS, NCS_SESSION_LIMIT, NCS_SNIPPET_CHARS,
    NET_PARTICIPANT_LIMIT, NET_SESSION_LIMIT, NET_SNIPPET_CHARS, TRANSCRIPT_CHUNK_SIZE,
    TRANSCRIPT_LOOKUP_LIMIT,
};
use crate::capabilities::StoreCapabilities;
use crate::store::{LogReader, NetSession, SessionMetrics, TranscriptRow};

// ---------------------------------------------------------------------------
// Evidence records
// ---------------------------------------------------------------------------

/// One transcript excerpt offered to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct Snippet {
    pub id: i64,
    pub filename: Option<String>,
    pub text: String,
}

impl Snippet {
    /// Length in characters, the unit budgets are counted in.
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }

    fn from_row(row: TranscriptRow, cap: usize) -> Option<Self> {
        let text = row.text.as_deref().map(str::trim).unwrap_or_default();
        if text.is_empty() {
            return None;
        }
        Some(Self {
            id: row.id,
            filename: row.filename,
            text: take_chars(text, cap).to_string(),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallsignActivity {
    pub total_segments: i64,
    pub net_segments: i64,
    /// Segments outside nets: `max(0, total - net)`.
    pub open_qso_count: i64,
    /// Distinct nets participated in.
    pub net_count: i64,
    /// Sessions led as NCS.
    pub ncs_count: i64,
    pub last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct CallsignEvidence {
    pub activity: CallsignActivity,
    pub snippets: Vec<Snippet>,
}

impl CallsignEvidence {
    pub fn is_empty(&self) -> bool {
        let a = &self.activity;
        a.total_segments == 0 && a.net_count == 0 && a.ncs_count == 0 && self.snippets.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct NetEvidence {
    pub sessions: Vec<NetSession>,
    pub metrics: SessionMetrics,
    pub snippets: Vec<Snippet>,
}

impl NetEvidence {
    /// Sessions in the window, falling back to the sampled count.
    pub fn instances_count(&self) -> i64 {
        if self.metrics.count > 0 {
            self.metrics.count
        } else {
            self.sessions.len() as i64
        }
    }

    pub fn is_empty(&self) -> bool {
        self.instances_count() == 0 && self.snippets.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NcsStats {
    pub nets_led_count: i64,
    pub nets_led_unique: i64,
    pub avg_checkins: Option<f64>,
    pub avg_duration_min: Option<f64>,
    pub last_led: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct NcsEvidence {
    pub stats: NcsStats,
    pub snippets: Vec<Snippet>,
}

impl NcsEvidence {
    pub fn is_empty(&self) -> bool {
        self.stats.nets_led_count == 0 && self.snippets.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Sampling
// ---------------------------------------------------------------------------

/// `n` evenly spaced ids across `[start, end]`, deduplicated and ascending.
pub fn even_sample_ids(start: i64, end: i64, n: i64) -> Vec<i64> {
    if end < start || n <= 0 {
        return Vec::new();
    }
    let span = end - start + 1;
    let denom = (n - 1).max(1);
    (0..n)
        .map(|i| start + i * (span - 1) / denom)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Transcripts sampled from one net session.
pub fn net_sample_count(span: i64) -> i64 {
    span.clamp(3, 10)
}

/// Transcripts sampled from one session an NCS led.
pub fn ncs_sample_count(span: i64) -> i64 {
    (span / 5).clamp(3, 8)
}

// ---------------------------------------------------------------------------
// EvidenceExtractor
// ---------------------------------------------------------------------------

/// Activity counts and budgeted snippets for each entity kind. Tables the
/// store lacks contribute nothing.
pub struct EvidenceExtractor<'a> {
    reader: &'a dyn LogReader,
    caps: StoreCapabilities,
    budgets: EvidenceBudgets,
    since: DateTime<Utc>,
}

impl<'a> EvidenceExtractor<'a> {
    pub fn new(
        reader: &'a dyn LogReader,
        caps: StoreCapabilities,
        budgets: EvidenceBudgets,
        since: DateTime<Utc>,
    ) -> Self {
        Self {
            reader,
            caps,
            budgets,
            since,
        }
    }

    pub fn capabilities(&self) -> &StoreCapabilities {
        &self.caps
    }

    pub fn budgets(&self) -> &EvidenceBudgets {
        &self.budgets
    }

    // --- Enumeration -------------------------------------------------------

    /// Normalized, sorted, capped at `limit`.
    pub async fn callsigns(&self, limit: usize) -> Result<Vec<String>> {
        let raw = if self.caps.callsigns {
            self.reader.registered_callsigns().await?
        } else if self.caps.callsign_log {
            self.reader.logged_callsigns().await?
        } else {
            Vec::new()
        };
        Ok(normalized_set(raw).into_iter().take(limit).collect())
    }

    pub async fn net_ids(&self) -> Result<Vec<String>> {
        if self.caps.net_data {
            self.reader.session_net_ids().await
        } else if self.caps.net_participation {
            self.reader.participation_net_ids().await
        } else {
            Ok(Vec::new())
        }
    }

    /// Session leaders from `net_data` plus `role = 'NCS'` participants.
    pub async fn ncs_callsigns(&self) -> Result<Vec<String>> {
        let mut raw = Vec::new();
        if self.caps.net_data {
            raw.extend(self.reader.session_ncs_callsigns(self.since).await?);
        }
        if self.caps.net_participation_role {
            raw.extend(self.reader.role_ncs_callsigns(self.since).await?);
        }
        Ok(normalized_set(raw).into_iter().collect())
    }

    // --- Callsigns ---------------------------------------------------------

    pub async fn callsign_activity(&self, callsign: &str) -> Result<CallsignActivity> {
        let mut activity = CallsignActivity::default();

        if self.caps.callsign_log {
            let segments = self.reader.segment_counts(callsign, self.since).await?;
            activity.total_segments = segments.total;
            activity.last_seen = segments.last_seen;
        }
        if self.caps.can_classify_segments() {
            activity.net_segments = self.reader.net_segment_count(callsign, self.since).await?;
        }
        activity.open_qso_count = (activity.total_segments - activity.net_segments).max(0);

        if self.caps.net_participation {
            let p = self.reader.participation(callsign, self.since).await?;
            activity.net_count = p.distinct_nets;
            activity.last_seen = latest(activity.last_seen, p.last_seen);
        }
        if self.caps.net_data {
            let led = self
                .reader
                .ncs_session_metrics(callsign, self.since, false)
                .await?;
            activity.ncs_count = led.count;
            activity.last_seen = latest(activity.last_seen, led.last_start);
        }

        Ok(activity)
    }

    /// Newest-first snippets linked to `callsign`, within `ceiling` characters.
    pub async fn callsign_snippets(&self, callsign: &str, ceiling: usize) -> Result<Vec<Snippet>> {
        if !self.caps.callsign_log {
            return Ok(Vec::new());
        }
        let ids = self
            .reader
            .recent_transcript_ids(callsign, self.since, TRANSCRIPT_LOOKUP_LIMIT)
            .await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut rows = Vec::new();
        let mut seen = HashSet::new();
        for chunk in ids.chunks(TRANSCRIPT_CHUNK_SIZE) {
            self.fetch_transcripts(chunk, &mut seen, &mut rows).await?;
        }
        rows.sort_by(|a, b| b.id.cmp(&a.id));

        let mut budget = CharBudget::new(ceiling);
        let mut snippets = Vec::new();
        for snippet in rows
            .into_iter()
            .filter_map(|r| Snippet::from_row(r, CALLSIGN_SNIPPET_CHARS))
        {
            if !budget.try_take(snippet.char_len()) {
                break;
            }
            snippets.push(snippet);
        }
        Ok(snippets)
    }

    pub async fn callsign_evidence(&self, callsign: &str) -> Result<CallsignEvidence> {
        let activity = self.callsign_activity(callsign).await?;
        let snippets = self
            .callsign_snippets(callsign, self.budgets.callsign)
            .await?;
        debug!(
            callsign,
            segments = activity.total_segments,
            snippets = snippets.len(),
            "Gathered callsign evidence"
        );
        Ok(CallsignEvidence { activity, snippets })
    }

    // --- Nets --------------------------------------------------------------

    pub async fn net_evidence(&self, net_id: &str) -> Result<NetEvidence> {
        let mut evidence = NetEvidence::default();

        if self.caps.net_data {
            evidence.sessions = self
                .reader
                .net_sessions(net_id, self.since, NET_SESSION_LIMIT)
                .await?;
            evidence.metrics = self
                .reader
                .net_session_metrics(net_id, self.since, self.caps.net_data_checkins)
                .await?;

            let mut budget = CharBudget::new(self.budgets.net);
            evidence.snippets = self
                .session_snippets(&evidence.sessions, net_sample_count, NET_SNIPPET_CHARS, &mut budget)
                .await?;
        } else if self.caps.net_participation {
            let participants = self
                .reader
                .net_participants(net_id, self.since, NET_PARTICIPANT_LIMIT)
                .await?;

            let share = self.budgets.participant_share();
            let mut budget = CharBudget::new(self.budgets.net);
            'participants: for callsign in participants {
                let Some(callsign) = normalize_callsign(&callsign) else {
                    continue;
                };
                for snippet in self.callsign_snippets(&callsign, share).await? {
                    if !budget.try_take(snippet.char_len()) {
                        break 'participants;
                    }
                    evidence.snippets.push(snippet);
                }
            }
        }

        debug!(
            net_id,
            sessions = evidence.sessions.len(),
            snippets = evidence.snippets.len(),
            "Gathered net evidence"
        );
        Ok(evidence)
    }

    // --- NCS ---------------------------------------------------------------

    pub async fn ncs_evidence(&self, callsign: &str) -> Result<NcsEvidence> {
        let mut evidence = NcsEvidence::default();

        if self.caps.net_data {
            let m = self
                .reader
                .ncs_session_metrics(callsign, self.since, self.caps.net_data_checkins)
                .await?;
            evidence.stats = NcsStats {
                nets_led_count: m.count,
                nets_led_unique: m.unique_nets,
                avg_checkins: m.avg_checkins,
                avg_duration_min: m.avg_duration_min,
                last_led: m.last_start,
            };
        }
        if evidence.stats.nets_led_count == 0 && self.caps.net_participation_role {
            evidence.stats.nets_led_count =
                self.reader.ncs_role_count(callsign, self.since).await?;
        }

        if self.caps.net_data {
            let sessions = self
                .reader
                .ncs_sessions(callsign, self.since, NCS_SESSION_LIMIT)
                .await?;
            let mut budget = CharBudget::new(self.budgets.ncs);
            evidence.snippets = self
                .session_snippets(&sessions, ncs_sample_count, NCS_SNIPPET_CHARS, &mut budget)
                .await?;
        }

        debug!(
            callsign,
            nets_led = evidence.stats.nets_led_count,
            snippets = evidence.snippets.len(),
            "Gathered NCS evidence"
        );
        Ok(evidence)
    }

    // --- Shared ------------------------------------------------------------

    /// Evenly spaced transcripts from each session's id span, newest session
    /// first, until the budget closes.
    async fn session_snippets(
        &self,
        sessions: &[NetSession],
        sample_count: fn(i64) -> i64,
        cap: usize,
        budget: &mut CharBudget,
    ) -> Result<Vec<Snippet>> {
        let mut snippets = Vec::new();
        let mut seen = HashSet::new();

        for session in sessions {
            let Some((st, en)) = session.transcript_span() else {
                continue;
            };
            let ids = even_sample_ids(st, en, sample_count(en - st + 1));

            let mut rows = Vec::new();
            self.fetch_transcripts(&ids, &mut seen, &mut rows).await?;
            rows.sort_by(|a, b| b.id.cmp(&a.id));

            for snippet in rows.into_iter().filter_map(|r| Snippet::from_row(r, cap)) {
                if !budget.try_take(snippet.char_len()) {
                    return Ok(snippets);
                }
                snippets.push(snippet);
            }
        }

        Ok(snippets)
    }

    /// Look ids up in each transcript table, primary first, skipping ids
    /// already collected.
    async fn fetch_transcripts(
        &self,
        ids: &[i64],
        seen: &mut HashSet<i64>,
        out: &mut Vec<TranscriptRow>,
    ) -> Result<()> {
        for table in self.caps.transcript_tables() {
            for row in self.reader.transcripts(table, ids).await? {
                if seen.insert(row.id) {
                    out.push(row);
                }
            }
        }
        Ok(())
    }
}

fn normalized_set(raw: Vec<String>) -> BTreeSet<String> {
    raw.iter().filter_map(|s| normalize_callsign(s)).collect()
}

fn latest(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_spans_whole_session() {
        assert_eq!(even_sample_ids(100, 109, 10), (100..=109).collect::<Vec<_>>());
        assert_eq!(even_sample_ids(1, 100, 3), vec![1, 50, 100]);
    }

    #[test]
    fn short_spans_collapse_duplicates() {
        assert_eq!(even_sample_ids(7, 7, 3), vec![7]);
        assert_eq!(even_sample_ids(10, 11, 3), vec![10, 11]);
    }

    #[test]
    fn inverted_span_samples_nothing() {
        assert!(even_sample_ids(20, 10, 5).is_empty());
    }

    #[test]
    fn sample_counts_are_bounded() {
        assert_eq!(net_sample_count(1), 3);
        assert_eq!(net_sample_count(7), 7);
        assert_eq!(net_sample_count(5000), 10);
        assert_eq!(ncs_sample_count(4), 3);
        assert_eq!(ncs_sample_count(30), 6);
        assert_eq!(ncs_sample_count(500), 8);
    }

    #[test]
    fn snippets_are_trimmed_and_capped() {
        let row = TranscriptRow {
            id: 1,
            filename: None,
            text: Some(format!("  {}  ", "é".repeat(50))),
        };
        let s = Snippet::from_row(row, 10).unwrap();
        assert_eq!(s.char_len(), 10);

        let blank = TranscriptRow {
            id: 2,
            filename: None,
            text: Some("   ".into()),
        };
        assert!(Snippet::from_row(blank, 10).is_none());
    }

    #[test]
    fn latest_prefers_newer() {
        let a = DateTime::<Utc>::from_timestamp(100, 0);
        let b = DateTime::<Utc>::from_timestamp(200, 0);
        assert_eq!(latest(a, b), b);
        assert_eq!(latest(None, a), a);
        assert_eq!(latest(None, None), None);
    }
}
