use anyhow::Context;
use serde_json::json;
use tracing::debug;

use super::{to_json, BuildContext, BuildOutcome};
use crate::evidence::{NcsEvidence, NcsStats};
use crate::prompts::{NcsAssessment, NcsContext};
use crate::scoring::presence_confidence;
use crate::store::{Row, Table};

fn activity_row(callsign: &str, s: &NcsStats) -> Row {
    Row::new(Table::NcsActivityStats)
        .set("callsign", callsign)
        .set("nets_led_count", s.nets_led_count)
        .set("nets_led_unique", s.nets_led_unique)
        .set("avg_checkins", s.avg_checkins)
        .set("avg_duration_min", s.avg_duration_min)
        .set("last_led", s.last_led)
}

pub struct NcsPlan {
    callsign: String,
    evidence: NcsEvidence,
    assessment: Option<NcsAssessment>,
}

pub async fn prepare_ncs_profile(cx: &BuildContext<'_>, callsign: &str) -> anyhow::Result<NcsPlan> {
    let evidence = cx
        .extractor
        .ncs_evidence(callsign)
        .await
        .context("gathering NCS evidence")?;

    let assessment = if evidence.is_empty() {
        debug!(callsign, "No led sessions in window");
        None
    } else {
        let assessment = cx
            .summarizer
            .ncs(&NcsContext {
                callsign,
                stats: &evidence.stats,
                snippets: &evidence.snippets,
            })
            .await
            .context("summarizing NCS")?
            .normalized();
        Some(assessment)
    };

    Ok(NcsPlan {
        callsign: callsign.to_string(),
        evidence,
        assessment,
    })
}

pub async fn persist_ncs_profile(cx: &BuildContext<'_>, plan: &NcsPlan) -> anyhow::Result<BuildOutcome> {
    let callsign = plan.callsign.as_str();
    let evidence = &plan.evidence;
    let Some(assessment) = &plan.assessment else {
        cx.sink
            .upsert(activity_row(callsign, &NcsStats::default()))
            .await?;
        return Ok(BuildOutcome::NoData);
    };
    let s = &evidence.stats;
    cx.sink.upsert(activity_row(callsign, s)).await?;

    let snapshot = cx
        .windowed(Row::new(Table::NcsProfiles).set("callsign", callsign))
        .set("nets_led_count", s.nets_led_count)
        .set("nets_led_unique", s.nets_led_unique)
        .set("avg_checkins", s.avg_checkins)
        .set("avg_duration_min", s.avg_duration_min)
        .set("control_style_summary", assessment.control_style_summary.as_str())
        .set("friendliness_score", assessment.friendliness_score)
        .set("structure_score", assessment.structure_score)
        .set("inclusivity_score", assessment.inclusivity_score)
        .set("clarity_score", assessment.clarity_score)
        .set("civility_score", assessment.civility_score)
        .set("confidence", presence_confidence(!evidence.snippets.is_empty()))
        .set("data_freshness", s.last_led);
    cx.sink.upsert(snapshot).await?;

    let key = ("callsign", callsign);
    let payload = json!({
        "llm": to_json(assessment)?,
        "text_samples": evidence.snippets.len(),
    });
    cx.insert_history(Table::NcsProfileHistory, key, payload).await?;
    cx.insert_reasons(
        Table::NcsMetricReasons,
        key,
        &assessment.metric_reasons,
        json!({"text_samples": evidence.snippets.len()}),
    )
    .await?;

    Ok(BuildOutcome::Profiled)
}
