//! System prompts, per-kind prompt contexts and the typed replies the model
//! must produce.

mod assessment;
mod lenient;

pub use assessment::{CallsignAssessment, NcsAssessment, NetAssessment};

use std::fmt::Write;

use ai_client::SchemaHint;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::budget::{PROMPT_EVIDENCE_LINES, PROMPT_INSTANCE_LINES};
use crate::evidence::{NcsStats, Snippet};
use crate::store::NetSession;

pub const CALLSIGN_SYSTEM: &str = "You are an analyst of amateur-radio conversations (Part 97).
Infer polite, neutral, evidence-based operator profiles from short transcript snippets.
Use only the provided text and never guess personal data. Output STRICT JSON.
Scores range from 0.0 to 1.0. Keep reasons concise.";

pub const NET_SYSTEM: &str = "You analyze recurring ham-radio nets (series). Build a canonical profile from sampled instances.
Return STRICT JSON. Stay concise, evidence-based and neutral. Scores range from 0.0 to 1.0.";

pub const NCS_SYSTEM: &str = "You analyze net control operators (NCS) across many nets.
Return STRICT JSON. Scores range from 0.0 to 1.0. Stay concise and neutral.";

const NO_TEXT: &str = "(no text samples found)";
const NO_META: &str = "(no structured instance meta available)";

/// SHA-256 hex of every system prompt and schema hint. Recorded on the model
/// run so rows can be traced to the prompt set that produced them.
pub fn prompt_fingerprint() -> String {
    // serde_json maps are sorted, so the serialization is canonical.
    let blob = serde_json::json!({
        "callsign_system": CALLSIGN_SYSTEM,
        "callsign_schema": CallsignAssessment::schema_hint(),
        "net_system": NET_SYSTEM,
        "net_schema": NetAssessment::schema_hint(),
        "ncs_system": NCS_SYSTEM,
        "ncs_schema": NcsAssessment::schema_hint(),
    });
    hex::encode(Sha256::digest(blob.to_string().as_bytes()))
}

fn evidence_lines(out: &mut String, snippets: &[Snippet]) {
    if snippets.is_empty() {
        out.push_str(NO_TEXT);
        out.push('\n');
        return;
    }
    for s in snippets.iter().take(PROMPT_EVIDENCE_LINES) {
        let _ = writeln!(out, "[{}] {}", s.id, s.text);
    }
}

fn or_na<T: ToString>(value: Option<T>) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| v.to_string())
}

fn timestamp(value: Option<DateTime<Utc>>) -> String {
    or_na(value.map(|t| t.format("%Y-%m-%d %H:%M UTC")))
}

fn decimal(value: Option<f64>) -> String {
    or_na(value.map(|v| format!("{v:.1}")))
}

// ---------------------------------------------------------------------------
// Contexts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct CallsignContext<'a> {
    pub callsign: &'a str,
    /// Newest first.
    pub snippets: &'a [Snippet],
}

impl CallsignContext<'_> {
    pub fn user_prompt(&self) -> String {
        let mut out = format!(
            "You will summarize the on-air behavior for callsign: {}\n\nSnippets (recent-first):\n",
            self.callsign
        );
        evidence_lines(&mut out, self.snippets);
        out.push_str("\nReturn one JSON object matching the schema hint.");
        out
    }
}

#[derive(Debug, Clone, Copy)]
pub struct NetContext<'a> {
    pub net_id: &'a str,
    /// Most recent first.
    pub sessions: &'a [NetSession],
    pub snippets: &'a [Snippet],
    pub avg_checkins: Option<f64>,
    pub avg_duration_min: Option<f64>,
}

impl NetContext<'_> {
    pub fn user_prompt(&self) -> String {
        let mut out = format!(
            "Net slug: {}\nSampled instance metadata (most recent first):\n",
            self.net_id
        );
        if self.sessions.is_empty() {
            out.push_str(NO_META);
            out.push('\n');
        }
        for s in self.sessions.iter().take(PROMPT_INSTANCE_LINES) {
            let _ = writeln!(
                out,
                "- id:{} ncs:{} start:{} end:{} span:{}..{}",
                s.id,
                s.ncs_callsign.as_deref().unwrap_or("n/a"),
                timestamp(s.start_time),
                timestamp(s.end_time),
                or_na(s.start_transcript_id),
                or_na(s.end_transcript_id),
            );
        }
        let _ = writeln!(
            out,
            "Average check-ins: {}\nAverage duration (min): {}",
            decimal(self.avg_checkins),
            decimal(self.avg_duration_min)
        );
        out.push_str("\nText samples:\n");
        evidence_lines(&mut out, self.snippets);
        out.push_str("\nReturn one JSON object matching the schema hint.");
        out
    }
}

#[derive(Debug, Clone, Copy)]
pub struct NcsContext<'a> {
    pub callsign: &'a str,
    pub stats: &'a NcsStats,
    pub snippets: &'a [Snippet],
}

impl NcsContext<'_> {
    pub fn user_prompt(&self) -> String {
        let mut out = String::new();
        let _ = write!(
            out,
            "NCS callsign: {}\n\nContext:\n\
             - Nets led count: {}\n\
             - Nets led (unique slugs): {}\n\
             - Avg checkins: {}\n\
             - Avg duration (min): {}\n\n\
             Text samples from nets where this operator likely acted as NCS:\n",
            self.callsign,
            self.stats.nets_led_count,
            self.stats.nets_led_unique,
            decimal(self.stats.avg_checkins),
            decimal(self.stats.avg_duration_min),
        );
        evidence_lines(&mut out, self.snippets);
        out.push_str("\nReturn one JSON object matching the schema hint.");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snippet(id: i64, text: &str) -> Snippet {
        Snippet {
            id,
            filename: None,
            text: text.to_string(),
        }
    }

    #[test]
    fn fingerprint_is_stable_hex() {
        let a = prompt_fingerprint();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(a, prompt_fingerprint());
    }

    #[test]
    fn callsign_prompt_lists_evidence() {
        let snippets = vec![snippet(9, "CQ CQ"), snippet(4, "73 all")];
        let prompt = CallsignContext {
            callsign: "KK7NQN",
            snippets: &snippets,
        }
        .user_prompt();

        assert!(prompt.contains("callsign: KK7NQN"));
        assert!(prompt.contains("[9] CQ CQ\n[4] 73 all\n"));
    }

    #[test]
    fn evidence_lines_are_capped() {
        let snippets: Vec<Snippet> = (0..250).map(|i| snippet(i, "x")).collect();
        let prompt = CallsignContext {
            callsign: "W1AW",
            snippets: &snippets,
        }
        .user_prompt();
        assert_eq!(prompt.matches("] x").count(), PROMPT_EVIDENCE_LINES);
    }

    #[test]
    fn net_prompt_placeholders() {
        let prompt = NetContext {
            net_id: "pnw-2m",
            sessions: &[],
            snippets: &[],
            avg_checkins: None,
            avg_duration_min: Some(42.34),
        }
        .user_prompt();

        assert!(prompt.contains(NO_META));
        assert!(prompt.contains(NO_TEXT));
        assert!(prompt.contains("Average check-ins: n/a"));
        assert!(prompt.contains("Average duration (min): 42.3"));
    }

    #[test]
    fn net_prompt_meta_line() {
        let sessions = vec![NetSession {
            id: 7,
            net_id: "pnw-2m".into(),
            start_transcript_id: Some(100),
            end_transcript_id: Some(140),
            ncs_callsign: Some("W7ABC".into()),
            start_time: DateTime::<Utc>::from_timestamp(0, 0),
            end_time: None,
        }];
        let prompt = NetContext {
            net_id: "pnw-2m",
            sessions: &sessions,
            snippets: &[],
            avg_checkins: None,
            avg_duration_min: None,
        }
        .user_prompt();
        assert!(prompt.contains(
            "- id:7 ncs:W7ABC start:1970-01-01 00:00 UTC end:n/a span:100..140"
        ));
    }

    #[test]
    fn ncs_prompt_context() {
        let stats = NcsStats {
            nets_led_count: 12,
            nets_led_unique: 3,
            avg_checkins: Some(18.0),
            ..Default::default()
        };
        let prompt = NcsContext {
            callsign: "W7ABC",
            stats: &stats,
            snippets: &[],
        }
        .user_prompt();
        assert!(prompt.contains("- Nets led count: 12"));
        assert!(prompt.contains("- Avg checkins: 18.0"));
        assert!(prompt.contains("- Avg duration (min): n/a"));
    }
}
