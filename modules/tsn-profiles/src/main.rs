use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use ai_client::OpenAi;
use qrz_client::QrzSession;
use tsn_common::Config;
use tsn_profiles::{
    validate_callsigns, LlmSummarizer, OfflineSummarizer, PgStore, ProfileRunner, RunOptions,
    Summarizer,
};

#[derive(Parser)]
#[command(name = "tsn-profiles", about = "Callsign, net and NCS profile builder")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build profiles for every known callsign, net and NCS operator
    Run {
        /// Use the offline fallback instead of the model endpoint
        #[arg(long)]
        no_ai: bool,
        /// Cap on callsigns processed (BATCH_CALLSIGNS)
        #[arg(long)]
        limit: Option<usize>,
        /// Analysis window length in days (WINDOW_DAYS)
        #[arg(long)]
        window_days: Option<u32>,
    },
    /// Confirm unvalidated callsigns with QRZ and drop unknown ones
    ValidateCallsigns,
    /// Create or update the profile tables
    Migrate,
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("tsn=info,ai_client=info,qrz_client=info"))?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;
    let cli = Cli::parse();

    let mut config = Config::from_env()?;
    if let Command::Run {
        no_ai,
        limit,
        window_days,
    } = &cli.command
    {
        if *no_ai {
            config.ai_enabled = false;
        }
        if let Some(limit) = limit {
            config.batch_callsigns = *limit;
        }
        if let Some(days) = window_days {
            config.window_days = *days;
        }
    }
    config.log_redacted();

    let store = PgStore::connect(&config.database_url)
        .await
        .context("connecting to database")?;

    match cli.command {
        Command::Migrate => {
            store.migrate().await.context("running migrations")?;
            info!("Profile tables up to date");
        }
        Command::Run { .. } => {
            store.migrate().await.context("running migrations")?;

            let mut options = RunOptions::from_config(&config, Utc::now());
            let summarizer: Box<dyn Summarizer> = if config.ai_enabled {
                let ai = OpenAi::new(&config.openai_api_key, &config.openai_model)
                    .with_base_url(&config.openai_base_url);
                options.temperature = ai.temperature();
                options.max_tokens = ai.max_tokens();
                Box::new(LlmSummarizer::new(Arc::new(ai)))
            } else {
                Box::new(OfflineSummarizer)
            };

            let runner = ProfileRunner::new(&store, &store, summarizer.as_ref(), options);
            let stats = runner.run().await?;
            info!(model_run_id = stats.model_run_id, "Run complete");
            println!("{stats}");
        }
        Command::ValidateCallsigns => {
            let Some((username, password)) = config.qrz_credentials() else {
                bail!("QRZ_USERNAME and QRZ_PASSWORD are required for validate-callsigns");
            };
            let mut session = QrzSession::new(username, password);
            let stats = validate_callsigns(&store, &mut session).await?;
            println!("{stats}");
        }
    }

    Ok(())
}
