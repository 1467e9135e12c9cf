//! Profile builders. Each runs in two steps. Preparing gathers evidence and
//! summarizes it without writing anything. Persisting writes a zeroed
//! activity row when there was nothing to look at, and otherwise derives the
//! computed scores and writes snapshot, history, reasons and topics.

mod callsign;
mod ncs;
mod net;

pub use callsign::{persist_callsign_profile, prepare_callsign_profile, CallsignPlan};
pub use ncs::{persist_ncs_profile, prepare_ncs_profile, NcsPlan};
pub use net::{persist_net_profile, prepare_net_profile, NetPlan};

use std::collections::BTreeMap;

use ai_client::take_chars;
use serde_json::Value;
use tsn_common::{AnalysisWindow, EntityKind, Result};

use crate::evidence::EvidenceExtractor;
use crate::store::{ProfileSink, Row, Table};
use crate::summarizer::Summarizer;

/// Longest reason text stored.
pub const REASON_MAX_CHARS: usize = 1000;
/// Longest topic key stored.
pub const TOPIC_MAX_CHARS: usize = 256;
/// Longest metric key stored.
const METRIC_KEY_MAX_CHARS: usize = 128;

/// Everything a builder needs for one entity.
pub struct BuildContext<'a> {
    pub extractor: &'a EvidenceExtractor<'a>,
    pub summarizer: &'a dyn Summarizer,
    pub sink: &'a dyn ProfileSink,
    pub window: AnalysisWindow,
    pub model_run_id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    Profiled,
    /// Only a zeroed activity row was written.
    NoData,
}

/// A prepared entity of any kind.
pub enum ProfilePlan {
    Callsign(CallsignPlan),
    Net(NetPlan),
    Ncs(NcsPlan),
}

impl ProfilePlan {
    /// Reads evidence and calls the summarizer. Writes nothing.
    pub async fn prepare(cx: &BuildContext<'_>, kind: EntityKind, id: &str) -> anyhow::Result<Self> {
        Ok(match kind {
            EntityKind::Callsign => Self::Callsign(prepare_callsign_profile(cx, id).await?),
            EntityKind::Net => Self::Net(prepare_net_profile(cx, id).await?),
            EntityKind::Ncs => Self::Ncs(prepare_ncs_profile(cx, id).await?),
        })
    }

    pub async fn persist(&self, cx: &BuildContext<'_>) -> anyhow::Result<BuildOutcome> {
        match self {
            Self::Callsign(plan) => persist_callsign_profile(cx, plan).await,
            Self::Net(plan) => persist_net_profile(cx, plan).await,
            Self::Ncs(plan) => persist_ncs_profile(cx, plan).await,
        }
    }
}

impl BuildContext<'_> {
    fn windowed(&self, row: Row) -> Row {
        row.set("window_start", self.window.start())
            .set("window_end", self.window.end())
            .set("model_run_id", self.model_run_id)
    }

    async fn insert_history(&self, table: Table, key: (&'static str, &str), payload: Value) -> Result<()> {
        let row = self.windowed(Row::new(table).set(key.0, key.1)).set("payload", payload);
        self.sink.insert(row).await
    }

    /// One append-only row per metric key the model explained.
    async fn insert_reasons(
        &self,
        table: Table,
        key: (&'static str, &str),
        reasons: &BTreeMap<String, String>,
        evidence: Value,
    ) -> Result<()> {
        for (metric, text) in reasons {
            let row = Row::new(table)
                .set(key.0, key.1)
                .set("metric_key", take_chars(metric, METRIC_KEY_MAX_CHARS))
                .set("reason_text", take_chars(text, REASON_MAX_CHARS))
                .set("evidence", evidence.clone())
                .set("model_run_id", self.model_run_id);
            self.sink.insert(row).await?;
        }
        Ok(())
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| anyhow::Error::from(e).into())
}
