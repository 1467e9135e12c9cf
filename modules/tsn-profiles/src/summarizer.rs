//! Turns a prompt context into a typed assessment, either through the model
//! endpoint or through fixed offline values.

use std::collections::BTreeMap;
use std::sync::Arc;

use ai_client::{AiError, JsonChat, SchemaHint};
use async_trait::async_trait;
use tracing::debug;
use tsn_common::Result;

use crate::prompts::{
    CallsignAssessment, CallsignContext, NcsAssessment, NcsContext, NetAssessment, NetContext,
    CALLSIGN_SYSTEM, NCS_SYSTEM, NET_SYSTEM,
};
use crate::topics;

pub const FALLBACK_SUMMARY: &str = "Automated fallback summary.";
const FALLBACK_REASON: &str = "fallback";

#[async_trait]
pub trait Summarizer: Send + Sync {
    /// `"llm"` or `"offline"`, recorded in run notes.
    fn mode(&self) -> &'static str;

    async fn callsign(&self, ctx: &CallsignContext<'_>) -> Result<CallsignAssessment>;

    async fn net(&self, ctx: &NetContext<'_>) -> Result<NetAssessment>;

    async fn ncs(&self, ctx: &NcsContext<'_>) -> Result<NcsAssessment>;
}

// ---------------------------------------------------------------------------
// LLM
// ---------------------------------------------------------------------------

pub struct LlmSummarizer {
    chat: Arc<dyn JsonChat>,
}

impl LlmSummarizer {
    pub fn new(chat: Arc<dyn JsonChat>) -> Self {
        Self { chat }
    }

    async fn ask<T: SchemaHint>(&self, system: &str, user: String) -> Result<T> {
        let hint = T::schema_hint();
        debug!(reply = %T::type_name(), prompt_chars = user.chars().count(), "Requesting assessment");
        let value = self.chat.chat_json(system, &user, Some(&hint)).await?;
        // Derived structs also accept sequences, filling fields by position.
        if !value.is_object() {
            return Err(AiError::Schema(format!(
                "{}: expected a JSON object, got {}",
                T::type_name(),
                json_kind(&value)
            ))
            .into());
        }
        serde_json::from_value(value)
            .map_err(|e| AiError::Schema(format!("{}: {e}", T::type_name())).into())
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

#[async_trait]
impl Summarizer for LlmSummarizer {
    fn mode(&self) -> &'static str {
        "llm"
    }

    async fn callsign(&self, ctx: &CallsignContext<'_>) -> Result<CallsignAssessment> {
        self.ask(CALLSIGN_SYSTEM, ctx.user_prompt()).await
    }

    async fn net(&self, ctx: &NetContext<'_>) -> Result<NetAssessment> {
        self.ask(NET_SYSTEM, ctx.user_prompt()).await
    }

    async fn ncs(&self, ctx: &NcsContext<'_>) -> Result<NcsAssessment> {
        self.ask(NCS_SYSTEM, ctx.user_prompt()).await
    }
}

// ---------------------------------------------------------------------------
// Offline
// ---------------------------------------------------------------------------

/// Deterministic stand-in used when AI is disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineSummarizer;

fn fallback_reasons(keys: &[&str]) -> BTreeMap<String, String> {
    keys.iter()
        .map(|k| (k.to_string(), FALLBACK_REASON.to_string()))
        .collect()
}

/// `value or default`, treating zero as missing.
fn or_default(value: Option<f64>, default: f64) -> i64 {
    value.filter(|v| *v != 0.0).unwrap_or(default) as i64
}

#[async_trait]
impl Summarizer for OfflineSummarizer {
    fn mode(&self) -> &'static str {
        "offline"
    }

    async fn callsign(&self, ctx: &CallsignContext<'_>) -> Result<CallsignAssessment> {
        let hits = topics::topic_hits(ctx.snippets.iter().map(|s| s.text.as_str()));
        let top = topics::dominant_topic(&hits).unwrap_or_default().to_string();
        Ok(CallsignAssessment {
            callsign: ctx.callsign.to_string(),
            latest_topic: top.clone(),
            most_topic: top,
            topic_coverage: topics::coverage(&hits),
            summary: FALLBACK_SUMMARY.to_string(),
            personal_summary: String::new(),
            friendly_score: Some(0.6),
            serious_score: Some(0.5),
            focus_score: Some(0.5),
            helpful_score: Some(0.5),
            technical_score: Some(0.5),
            civility_score: Some(0.8),
            metric_reasons: fallback_reasons(&["friendly_score", "civility_score"]),
        })
    }

    async fn net(&self, ctx: &NetContext<'_>) -> Result<NetAssessment> {
        Ok(NetAssessment {
            net_id: ctx.net_id.to_string(),
            canonical_summary: FALLBACK_SUMMARY.to_string(),
            friendliness_score: Some(0.7),
            focus_score: Some(0.6),
            diversity_score: Some(0.5),
            activity_score: Some(0.6),
            helpfulness_score: Some(0.5),
            civility_score: Some(0.9),
            typical_duration_min: Some(or_default(ctx.avg_duration_min, 60.0)),
            typical_checkins: Some(or_default(ctx.avg_checkins, 30.0)),
            schedule_hint: String::new(),
            topic_coverage: BTreeMap::new(),
            metric_reasons: fallback_reasons(&["friendliness_score"]),
        })
    }

    async fn ncs(&self, ctx: &NcsContext<'_>) -> Result<NcsAssessment> {
        Ok(NcsAssessment {
            callsign: ctx.callsign.to_string(),
            control_style_summary: FALLBACK_SUMMARY.to_string(),
            friendliness_score: Some(0.7),
            structure_score: Some(0.6),
            inclusivity_score: Some(0.6),
            clarity_score: Some(0.7),
            civility_score: Some(0.9),
            metric_reasons: fallback_reasons(&["clarity_score"]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::{NcsStats, Snippet};
    use serde_json::{json, Value};
    use std::sync::Mutex;
    use tsn_common::ProfileError;

    struct CannedChat {
        reply: Value,
        seen: Mutex<Vec<(String, String, bool)>>,
    }

    #[async_trait]
    impl JsonChat for CannedChat {
        async fn chat_json(
            &self,
            system_prompt: &str,
            user_prompt: &str,
            schema_hint: Option<&Value>,
        ) -> std::result::Result<Value, AiError> {
            self.seen.lock().unwrap().push((
                system_prompt.to_string(),
                user_prompt.to_string(),
                schema_hint.is_some(),
            ));
            Ok(self.reply.clone())
        }
    }

    fn canned(reply: Value) -> Arc<CannedChat> {
        Arc::new(CannedChat {
            reply,
            seen: Mutex::new(Vec::new()),
        })
    }

    #[tokio::test]
    async fn llm_reply_is_typed() {
        let chat = canned(json!({"callsign": "W1AW", "friendly_score": 0.9}));
        let summarizer = LlmSummarizer::new(chat.clone());
        let snippets = vec![Snippet {
            id: 1,
            filename: None,
            text: "good morning".into(),
        }];
        let ctx = CallsignContext {
            callsign: "W1AW",
            snippets: &snippets,
        };

        let a = summarizer.callsign(&ctx).await.unwrap();
        assert_eq!(a.friendly_score, Some(0.9));

        let seen = chat.seen.lock().unwrap();
        assert_eq!(seen[0].0, CALLSIGN_SYSTEM);
        assert!(seen[0].1.contains("[1] good morning"));
        assert!(seen[0].2);
    }

    #[tokio::test]
    async fn llm_shape_mismatch_is_schema_error() {
        let summarizer = LlmSummarizer::new(canned(json!(["not", "an", "object"])));
        let stats = NcsStats::default();
        let ctx = NcsContext {
            callsign: "W7ABC",
            stats: &stats,
            snippets: &[],
        };
        let err = summarizer.ncs(&ctx).await.unwrap_err();
        assert!(matches!(err, ProfileError::Ai(AiError::Schema(_))));
    }

    #[tokio::test]
    async fn positional_array_reply_is_rejected() {
        let chat = canned(json!([
            "W9EVIL",
            "dx",
            "antenna",
            {},
            "positional summary",
            "",
            0.9
        ]));
        let summarizer = LlmSummarizer::new(chat);
        let ctx = CallsignContext {
            callsign: "KK7NQN",
            snippets: &[],
        };

        let err = summarizer.callsign(&ctx).await.unwrap_err();
        match err {
            ProfileError::Ai(AiError::Schema(msg)) => assert!(msg.contains("an array")),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn offline_callsign_uses_keyword_topics() {
        let snippets: Vec<Snippet> = ["new antenna up", "antenna and dx", "dx tonight"]
            .iter()
            .enumerate()
            .map(|(i, t)| Snippet {
                id: i as i64,
                filename: None,
                text: t.to_string(),
            })
            .collect();
        let a = OfflineSummarizer
            .callsign(&CallsignContext {
                callsign: "KK7NQN",
                snippets: &snippets,
            })
            .await
            .unwrap();

        assert_eq!(a.most_topic, "antenna");
        assert_eq!(a.topic_coverage["antenna"], 0.4);
        assert_eq!(a.topic_coverage["dx"], 0.4);
        assert_eq!(a.civility_score, Some(0.8));
        assert_eq!(a.metric_reasons["friendly_score"], "fallback");
        assert_eq!(a.summary, FALLBACK_SUMMARY);
    }

    #[tokio::test]
    async fn offline_net_defaults() {
        let ctx = NetContext {
            net_id: "pnw-2m",
            sessions: &[],
            snippets: &[],
            avg_checkins: Some(0.0),
            avg_duration_min: Some(47.8),
        };
        let n = OfflineSummarizer.net(&ctx).await.unwrap();
        assert_eq!(n.typical_checkins, Some(30));
        assert_eq!(n.typical_duration_min, Some(47));
        assert_eq!(n.civility_score, Some(0.9));
    }
}
