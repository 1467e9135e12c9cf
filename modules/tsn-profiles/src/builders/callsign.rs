use anyhow::Context;
use serde_json::json;
use tracing::debug;

use ai_client::take_chars;

use super::{to_json, BuildContext, BuildOutcome, TOPIC_MAX_CHARS};
use crate::evidence::{CallsignActivity, CallsignEvidence};
use crate::prompts::{CallsignAssessment, CallsignContext};
use crate::scoring::{bias_method, compute_bias_score, evidence_confidence};
use crate::store::{Row, Table};

fn activity_row(callsign: &str, a: &CallsignActivity) -> Row {
    Row::new(Table::CallsignActivityStats)
        .set("callsign", callsign)
        .set("total_tx_segments", a.total_segments)
        .set("open_qso_count", a.open_qso_count)
        .set("net_count", a.net_count)
        .set("ncs_count", a.ncs_count)
        .set("last_seen", a.last_seen)
}

/// Evidence for one callsign and, when there was any, the model's read of it.
pub struct CallsignPlan {
    callsign: String,
    evidence: CallsignEvidence,
    assessment: Option<CallsignAssessment>,
}

pub async fn prepare_callsign_profile(cx: &BuildContext<'_>, callsign: &str) -> anyhow::Result<CallsignPlan> {
    let evidence = cx
        .extractor
        .callsign_evidence(callsign)
        .await
        .context("gathering callsign evidence")?;

    let assessment = if evidence.is_empty() {
        debug!(callsign, "No activity in window");
        None
    } else {
        let assessment = cx
            .summarizer
            .callsign(&CallsignContext {
                callsign,
                snippets: &evidence.snippets,
            })
            .await
            .context("summarizing callsign")?
            .normalized();
        Some(assessment)
    };

    Ok(CallsignPlan {
        callsign: callsign.to_string(),
        evidence,
        assessment,
    })
}

pub async fn persist_callsign_profile(cx: &BuildContext<'_>, plan: &CallsignPlan) -> anyhow::Result<BuildOutcome> {
    let callsign = plan.callsign.as_str();
    let evidence = &plan.evidence;
    let Some(assessment) = &plan.assessment else {
        cx.sink
            .upsert(activity_row(callsign, &CallsignActivity::default()))
            .await?;
        return Ok(BuildOutcome::NoData);
    };
    let a = &evidence.activity;
    cx.sink.upsert(activity_row(callsign, a)).await?;

    let snapshot = cx
        .windowed(Row::new(Table::CallsignProfiles).set("callsign", callsign))
        .set("latest_topic", assessment.latest_topic.as_str())
        .set("most_topic", assessment.most_topic.as_str())
        .set("topic_coverage", to_json(&assessment.topic_coverage)?)
        .set("summary", assessment.summary.as_str())
        .set("personal_summary", assessment.personal_summary.as_str())
        .set("friendly_score", assessment.friendly_score)
        .set("serious_score", assessment.serious_score)
        .set("focus_score", assessment.focus_score)
        .set("helpful_score", assessment.helpful_score)
        .set("technical_score", assessment.technical_score)
        .set("civility_score", assessment.civility_score)
        .set("open_qso_count", a.open_qso_count)
        .set("net_count", a.net_count)
        .set("ncs_count", a.ncs_count)
        .set("open_vs_net_bias_score", compute_bias_score(a.net_count, a.open_qso_count))
        .set("open_vs_net_bias_window", bias_method())
        .set("confidence", evidence_confidence(a.total_segments))
        .set("data_freshness", a.last_seen);
    cx.sink.upsert(snapshot).await?;

    let key = ("callsign", callsign);
    let payload = json!({
        "callsign": callsign,
        "activity": {
            "total_tx_segments": a.total_segments,
            "open_qso_count": a.open_qso_count,
            "net_count": a.net_count,
            "ncs_count": a.ncs_count,
            "last_seen": a.last_seen,
        },
        "llm": to_json(assessment)?,
    });
    cx.insert_history(Table::CallsignProfileHistory, key, payload).await?;
    cx.insert_reasons(
        Table::CallsignMetricReasons,
        key,
        &assessment.metric_reasons,
        json!({"sample_count": evidence.snippets.len()}),
    )
    .await?;

    for (topic, weight) in &assessment.topic_coverage {
        // TODO: fill the count columns from per-transcript topic hits once
        // segments carry their own classification.
        let row = Row::new(Table::CallsignTopicStats)
            .set("callsign", callsign)
            .set("topic", take_chars(topic, TOPIC_MAX_CHARS))
            .set("count_total", 0i64)
            .set("count_open_qso", 0i64)
            .set("count_net", 0i64)
            .set("first_seen", None::<chrono::DateTime<chrono::Utc>>)
            .set("last_seen", a.last_seen)
            .set("weight", *weight);
        cx.sink.upsert(row).await?;
    }

    Ok(BuildOutcome::Profiled)
}
