//! One pipeline run: take the run lock, register the model run, profile
//! callsigns then nets then NCS operators, stamp the model run finished.

use std::fmt;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, error, info, warn};
use tsn_common::{AnalysisWindow, Config, EntityKind, ProfileError};
use uuid::Uuid;

use crate::budget::EvidenceBudgets;
use crate::builders::{BuildContext, BuildOutcome, ProfilePlan};
use crate::evidence::EvidenceExtractor;
use crate::prompts::prompt_fingerprint;
use crate::store::{LogReader, NewModelRun, ProfileSink};
use crate::summarizer::Summarizer;

pub const CALLSIGN_COMMIT_EVERY: usize = 20;
pub const NET_COMMIT_EVERY: usize = 10;
pub const NCS_COMMIT_EVERY: usize = 10;

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub model_name: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub ai_enabled: bool,
    pub ai_max_chars: usize,
    pub window_days: u32,
    pub batch_callsigns: usize,
    pub code_version: String,
    /// End of the analysis window.
    pub now: DateTime<Utc>,
}

impl RunOptions {
    pub fn from_config(config: &Config, now: DateTime<Utc>) -> Self {
        Self {
            model_name: config.openai_model.clone(),
            temperature: 0.2,
            max_tokens: 1500,
            ai_enabled: config.ai_enabled,
            ai_max_chars: config.ai_max_chars,
            window_days: config.window_days,
            batch_callsigns: config.batch_callsigns,
            code_version: config.code_version.clone(),
            now,
        }
    }

    pub fn model_params(&self) -> serde_json::Value {
        json!({
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "ai_max_chars": self.ai_max_chars,
            "window_days": self.window_days,
            "ai_enabled": self.ai_enabled,
        })
    }
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseStats {
    pub total: usize,
    pub profiled: usize,
    pub no_data: usize,
    pub failed: usize,
}

impl fmt::Display for PhaseStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} total, {} profiled, {} no data, {} failed",
            self.total, self.profiled, self.no_data, self.failed
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    pub model_run_id: i64,
    pub callsigns: PhaseStats,
    pub nets: PhaseStats,
    pub ncs: PhaseStats,
}

impl RunStats {
    pub fn failed(&self) -> usize {
        self.callsigns.failed + self.nets.failed + self.ncs.failed
    }
}

impl fmt::Display for RunStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Model run {}", self.model_run_id)?;
        writeln!(f, "  callsigns: {}", self.callsigns)?;
        writeln!(f, "  nets:      {}", self.nets)?;
        write!(f, "  ncs:       {}", self.ncs)
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

pub struct ProfileRunner<'a> {
    reader: &'a dyn LogReader,
    sink: &'a dyn ProfileSink,
    summarizer: &'a dyn Summarizer,
    options: RunOptions,
}

impl<'a> ProfileRunner<'a> {
    pub fn new(
        reader: &'a dyn LogReader,
        sink: &'a dyn ProfileSink,
        summarizer: &'a dyn Summarizer,
        options: RunOptions,
    ) -> Self {
        Self {
            reader,
            sink,
            summarizer,
            options,
        }
    }

    /// Fails with [`ProfileError::RunLockConflict`] before registering a
    /// model run when another run holds the lock.
    pub async fn run(&self) -> anyhow::Result<RunStats> {
        let window = AnalysisWindow::trailing(self.options.now, self.options.window_days)?;

        if !self.sink.try_lock_run().await.context("taking run lock")? {
            return Err(ProfileError::RunLockConflict.into());
        }

        let result = self.run_locked(window).await;

        if let Err(e) = self.sink.unlock_run().await {
            warn!(error = %e, "Failed to release run lock");
        }
        result
    }

    async fn run_locked(&self, window: AnalysisWindow) -> anyhow::Result<RunStats> {
        let caps = self
            .reader
            .capabilities()
            .await
            .context("detecting log tables")?;
        info!(?caps, "Log store capabilities");

        let model_run_id = self
            .sink
            .start_model_run(&NewModelRun {
                run_uuid: Uuid::new_v4().to_string(),
                model_name: self.options.model_name.clone(),
                model_params: self.options.model_params(),
                prompt_hash: prompt_fingerprint(),
                code_version: self.options.code_version.clone(),
                notes: format!("Extended profiles ({} summaries)", self.summarizer.mode()),
            })
            .await
            .context("registering model run")?;
        info!(
            model_run_id,
            window_start = %window.start(),
            window_end = %window.end(),
            mode = self.summarizer.mode(),
            "Model run started"
        );

        let extractor = EvidenceExtractor::new(
            self.reader,
            caps,
            EvidenceBudgets::from_max_chars(self.options.ai_max_chars),
            window.start(),
        );
        let cx = BuildContext {
            extractor: &extractor,
            summarizer: self.summarizer,
            sink: self.sink,
            window,
            model_run_id,
        };

        let callsigns = extractor
            .callsigns(self.options.batch_callsigns)
            .await
            .context("listing callsigns")?;
        let callsign_stats = self
            .run_phase(&cx, EntityKind::Callsign, &callsigns, CALLSIGN_COMMIT_EVERY)
            .await?;

        let nets = extractor.net_ids().await.context("listing nets")?;
        let net_stats = self
            .run_phase(&cx, EntityKind::Net, &nets, NET_COMMIT_EVERY)
            .await?;

        let operators = extractor
            .ncs_callsigns()
            .await
            .context("listing NCS callsigns")?;
        let ncs_stats = self
            .run_phase(&cx, EntityKind::Ncs, &operators, NCS_COMMIT_EVERY)
            .await?;

        self.sink
            .finish_model_run(model_run_id)
            .await
            .context("finishing model run")?;

        let stats = RunStats {
            model_run_id,
            callsigns: callsign_stats,
            nets: net_stats,
            ncs: ncs_stats,
        };
        info!(model_run_id, failed = stats.failed(), "Model run finished");
        Ok(stats)
    }

    /// Entities go in batches of `commit_every`. Each batch is gathered and
    /// summarized before any write, then written one savepoint per entity and
    /// committed. A failed entity rolls back its own writes and the phase
    /// moves on.
    async fn run_phase(
        &self,
        cx: &BuildContext<'_>,
        kind: EntityKind,
        entities: &[String],
        commit_every: usize,
    ) -> anyhow::Result<PhaseStats> {
        info!(%kind, count = entities.len(), "Profiling {kind} entities");
        let mut stats = PhaseStats {
            total: entities.len(),
            ..Default::default()
        };

        for batch in entities.chunks(commit_every.max(1)) {
            let mut plans = Vec::with_capacity(batch.len());
            for entity in batch {
                debug!(%kind, entity = %entity, "Preparing profile");
                match ProfilePlan::prepare(cx, kind, entity).await {
                    Ok(plan) => plans.push((entity, plan)),
                    Err(e) => {
                        let chain = format!("{e:#}");
                        error!(%kind, entity = %entity, error = %chain, "Profile build failed");
                        stats.failed += 1;
                    }
                }
            }

            for (entity, plan) in plans {
                self.sink.begin_entity().await?;
                let written = plan.persist(cx).await;
                self.sink.end_entity(written.is_ok()).await?;
                match written {
                    Ok(BuildOutcome::Profiled) => stats.profiled += 1,
                    Ok(BuildOutcome::NoData) => stats.no_data += 1,
                    Err(e) => {
                        let chain = format!("{e:#}");
                        error!(%kind, entity = %entity, error = %chain, "Profile write failed");
                        stats.failed += 1;
                    }
                }
            }

            self.sink.commit().await.context("committing batch")?;
            info!(%kind, done = stats.profiled + stats.no_data + stats.failed, "Committed batch");
        }

        info!(%kind, %stats, "Phase complete");
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_params_record_request_shape() {
        let config = Config::from_lookup(|_| None).unwrap();
        let options = RunOptions::from_config(&config, Utc::now());
        let params = options.model_params();
        assert_eq!(params["max_tokens"], 1500);
        assert_eq!(params["window_days"], 365);
        assert_eq!(params["ai_enabled"], true);
    }

    #[test]
    fn stats_display() {
        let stats = RunStats {
            model_run_id: 7,
            callsigns: PhaseStats {
                total: 3,
                profiled: 1,
                no_data: 1,
                failed: 1,
            },
            ..Default::default()
        };
        let text = stats.to_string();
        assert!(text.starts_with("Model run 7"));
        assert!(text.contains("callsigns: 3 total, 1 profiled, 1 no data, 1 failed"));
        assert_eq!(stats.failed(), 1);
    }
}
