use anyhow::Context;
use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::debug;

use ai_client::take_chars;

use super::{to_json, BuildContext, BuildOutcome, TOPIC_MAX_CHARS};
use crate::evidence::NetEvidence;
use crate::prompts::{NetAssessment, NetContext};
use crate::scoring::presence_confidence;
use crate::store::{Row, Table};

pub struct NetPlan {
    net_id: String,
    evidence: NetEvidence,
    assessment: Option<NetAssessment>,
}

pub async fn prepare_net_profile(cx: &BuildContext<'_>, net_id: &str) -> anyhow::Result<NetPlan> {
    let evidence = cx
        .extractor
        .net_evidence(net_id)
        .await
        .context("gathering net evidence")?;

    let assessment = if evidence.is_empty() {
        debug!(net_id, "No sessions in window");
        None
    } else {
        let m = &evidence.metrics;
        let assessment = cx
            .summarizer
            .net(&NetContext {
                net_id,
                sessions: &evidence.sessions,
                snippets: &evidence.snippets,
                avg_checkins: m.avg_checkins,
                avg_duration_min: m.avg_duration_min,
            })
            .await
            .context("summarizing net")?
            .normalized();
        Some(assessment)
    };

    Ok(NetPlan {
        net_id: net_id.to_string(),
        evidence,
        assessment,
    })
}

pub async fn persist_net_profile(cx: &BuildContext<'_>, plan: &NetPlan) -> anyhow::Result<BuildOutcome> {
    let net_id = plan.net_id.as_str();
    let evidence = &plan.evidence;
    let Some(assessment) = &plan.assessment else {
        let row = Row::new(Table::NetActivityStats)
            .set("net_id", net_id)
            .set("instances_count", 0i64)
            .set("total_checkins", 0i64)
            .set("avg_checkins", None::<f64>)
            .set("avg_duration_min", None::<f64>)
            .set("first_seen", None::<DateTime<Utc>>)
            .set("last_seen", None::<DateTime<Utc>>)
            .set("topic_coverage", json!({}));
        cx.sink.upsert(row).await?;
        return Ok(BuildOutcome::NoData);
    };
    let m = &evidence.metrics;
    let instances = evidence.instances_count();
    let coverage = to_json(&assessment.topic_coverage)?;

    let snapshot = cx
        .windowed(Row::new(Table::NetProfiles).set("net_id", net_id))
        .set("canonical_summary", assessment.canonical_summary.as_str())
        .set("friendliness_score", assessment.friendliness_score)
        .set("focus_score", assessment.focus_score)
        .set("diversity_score", assessment.diversity_score)
        .set("activity_score", assessment.activity_score)
        .set("helpfulness_score", assessment.helpfulness_score)
        .set("civility_score", assessment.civility_score)
        .set("typical_duration_min", assessment.typical_duration_min)
        .set("typical_checkins", assessment.typical_checkins)
        .set("schedule_hint", assessment.schedule_hint.as_str())
        .set("topic_coverage", coverage.clone())
        .set("confidence", presence_confidence(!evidence.snippets.is_empty()))
        .set("data_freshness", m.last_start);
    cx.sink.upsert(snapshot).await?;

    let total_checkins = m
        .avg_checkins
        .map(|avg| (avg * instances as f64).floor() as i64)
        .unwrap_or(0);
    let stats = Row::new(Table::NetActivityStats)
        .set("net_id", net_id)
        .set("instances_count", instances)
        .set("total_checkins", total_checkins)
        .set("avg_checkins", m.avg_checkins)
        .set("avg_duration_min", m.avg_duration_min)
        .set("first_seen", m.first_start)
        .set("last_seen", m.last_start)
        .set("topic_coverage", coverage);
    cx.sink.upsert(stats).await?;

    let sampled = json!({
        "instances_sampled": evidence.sessions.len(),
        "text_samples": evidence.snippets.len(),
    });
    let key = ("net_id", net_id);
    let payload = json!({
        "llm": to_json(assessment)?,
        "instances_sampled": evidence.sessions.len(),
        "text_samples": evidence.snippets.len(),
    });
    cx.insert_history(Table::NetProfileHistory, key, payload).await?;
    cx.insert_reasons(Table::NetMetricReasons, key, &assessment.metric_reasons, sampled)
        .await?;

    for (topic, weight) in &assessment.topic_coverage {
        let row = Row::new(Table::NetTopicStats)
            .set("net_id", net_id)
            .set("topic", take_chars(topic, TOPIC_MAX_CHARS))
            .set("weight", *weight)
            .set("last_seen", m.last_start);
        cx.sink.upsert(row).await?;
    }

    Ok(BuildOutcome::Profiled)
}
