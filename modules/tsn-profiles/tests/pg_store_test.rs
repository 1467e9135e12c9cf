//! Integration tests for the Postgres store.
//!
//! These tests create the log tables the pipeline reads, run the offline
//! profile pipeline against them, and check what lands in the profile tables.
//!
//! Requirements: Docker (for Postgres via testcontainers)
//!
//! Run with: cargo test -p tsn-profiles --features test-utils --test pg_store_test

#![cfg(feature = "test-utils")]

use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;

use tsn_common::Config;
use tsn_profiles::store::ProfileSink;
use tsn_profiles::{
    validate_callsigns, CallsignLookup, LogReader, OfflineSummarizer, PgStore, ProfileRunner,
    RunOptions,
};

const LOG_SCHEMA: &str = r#"
CREATE TABLE callsigns (
    callsign   TEXT PRIMARY KEY,
    validated  INT NOT NULL DEFAULT 0
);
CREATE TABLE callsign_log (
    id             BIGSERIAL PRIMARY KEY,
    callsign       TEXT NOT NULL,
    transcript_id  BIGINT,
    "timestamp"    TIMESTAMPTZ
);
CREATE TABLE transcription_analysis (
    transcription_id  BIGINT PRIMARY KEY,
    is_net            INT NOT NULL DEFAULT 0
);
CREATE TABLE net_participation (
    net_id           TEXT NOT NULL,
    callsign         TEXT NOT NULL,
    role             TEXT,
    first_seen_time  TIMESTAMPTZ,
    last_seen_time   TIMESTAMPTZ
);
CREATE TABLE net_data (
    id                   BIGSERIAL PRIMARY KEY,
    net_id               TEXT NOT NULL,
    start_transcript_id  BIGINT,
    end_transcript_id    BIGINT,
    ncs_callsign         TEXT,
    start_time           TIMESTAMPTZ,
    end_time             TIMESTAMPTZ,
    checkins             INT
);
CREATE TABLE transcriptions (
    id             BIGINT PRIMARY KEY,
    filename       TEXT,
    transcription  TEXT
);
CREATE TABLE transcriptions_large (
    id             BIGINT PRIMARY KEY,
    filename       TEXT,
    transcription  TEXT
)
"#;

async fn setup() -> (impl std::any::Any, PgStore) {
    let (container, store) = tsn_profiles::testutil::postgres_container().await;
    for statement in LOG_SCHEMA.split(';').filter(|s| !s.trim().is_empty()) {
        sqlx::query(statement)
            .execute(store.pool())
            .await
            .expect("Failed to create log table");
    }
    (container, store)
}

async fn seed(pool: &PgPool, now: DateTime<Utc>) {
    let day = Duration::days(1);
    sqlx::query("INSERT INTO callsigns (callsign) VALUES ('KK7NQN'), ('W7NCS')")
        .execute(pool)
        .await
        .expect("seed callsigns");

    for id in 1..=6i64 {
        sqlx::query(
            r#"INSERT INTO callsign_log (callsign, transcript_id, "timestamp") VALUES ('kk7nqn', $1, $2)"#,
        )
        .bind(id)
        .bind(now - day * (10 - id as i32))
        .execute(pool)
        .await
        .expect("seed callsign_log");
        sqlx::query("INSERT INTO transcriptions (id, filename, transcription) VALUES ($1, $2, $3)")
            .bind(id)
            .bind(format!("{id}.wav"))
            .bind(format!("KK7NQN here, antenna report number {id}"))
            .execute(pool)
            .await
            .expect("seed transcriptions");
    }
    sqlx::query("INSERT INTO transcription_analysis (transcription_id, is_net) VALUES (1, 1), (2, 1)")
        .execute(pool)
        .await
        .expect("seed transcription_analysis");

    sqlx::query(
        "INSERT INTO net_participation (net_id, callsign, role, first_seen_time, last_seen_time) \
         VALUES ('pnw-2m', 'KK7NQN', NULL, $1, $1), ('pnw-2m', 'W7NCS', 'NCS', $1, $1)",
    )
    .bind(now - day * 3)
    .execute(pool)
    .await
    .expect("seed net_participation");

    sqlx::query(
        "INSERT INTO net_data (net_id, start_transcript_id, end_transcript_id, ncs_callsign, start_time, end_time, checkins) \
         VALUES ('pnw-2m', 1, 6, 'W7NCS', $1, $2, 14)",
    )
    .bind(now - day * 3)
    .bind(now - day * 3 + Duration::minutes(45))
    .execute(pool)
    .await
    .expect("seed net_data");
}

fn options(now: DateTime<Utc>) -> RunOptions {
    let config = Config::from_lookup(|_| None).expect("default config");
    let mut options = RunOptions::from_config(&config, now);
    options.ai_enabled = false;
    options
}

async fn scalar(pool: &PgPool, sql: &str) -> i64 {
    sqlx::query_scalar::<_, i64>(sql)
        .fetch_one(pool)
        .await
        .expect("scalar query")
}

#[tokio::test]
async fn detects_log_tables_and_optional_columns() {
    let (_container, store) = setup().await;

    let caps = store.capabilities().await.unwrap();
    assert!(caps.callsigns && caps.callsign_log && caps.net_data);
    assert!(caps.net_data_checkins);
    assert!(caps.net_participation_role);
    assert!(caps.transcriptions_large);
}

#[tokio::test]
async fn offline_run_writes_profiles_and_reruns_cleanly() {
    let (_container, store) = setup().await;
    let now = Utc::now();
    seed(store.pool(), now).await;
    let summarizer = OfflineSummarizer;

    let first = ProfileRunner::new(&store, &store, &summarizer, options(now))
        .run()
        .await
        .unwrap();
    assert_eq!(first.callsigns.profiled, 2);
    assert_eq!(first.nets.profiled, 1);
    assert_eq!(first.ncs.profiled, 1);
    assert_eq!(first.failed(), 0);

    let second = ProfileRunner::new(&store, &store, &summarizer, options(now))
        .run()
        .await
        .unwrap();
    assert!(second.model_run_id > first.model_run_id);

    let pool = store.pool();
    assert_eq!(scalar(pool, "SELECT COUNT(*) FROM callsign_profiles").await, 2);
    assert_eq!(
        scalar(pool, "SELECT COUNT(*) FROM callsign_profile_history WHERE callsign = 'KK7NQN'").await,
        2
    );
    assert_eq!(
        scalar(pool, "SELECT model_run_id FROM callsign_profiles WHERE callsign = 'KK7NQN'").await,
        second.model_run_id
    );
    assert_eq!(
        scalar(pool, "SELECT total_tx_segments FROM callsign_activity_stats WHERE callsign = 'KK7NQN'").await,
        6
    );
    assert_eq!(
        scalar(pool, "SELECT open_qso_count FROM callsign_activity_stats WHERE callsign = 'KK7NQN'").await,
        4
    );
    assert_eq!(
        scalar(pool, "SELECT nets_led_count FROM ncs_activity_stats WHERE callsign = 'W7NCS'").await,
        1
    );
    assert_eq!(
        scalar(pool, "SELECT COUNT(*) FROM profile_model_runs WHERE finished_at IS NOT NULL").await,
        2
    );
}

#[tokio::test]
async fn run_lock_is_exclusive_across_stores() {
    let (_container, store) = setup().await;
    let other = PgStore::new(store.pool().clone());

    assert!(store.try_lock_run().await.unwrap());
    assert!(!other.try_lock_run().await.unwrap());

    store.unlock_run().await.unwrap();
    assert!(other.try_lock_run().await.unwrap());
    other.unlock_run().await.unwrap();
}

#[tokio::test]
async fn failed_entity_rolls_back_to_savepoint() {
    use tsn_profiles::store::{Row, Table};

    let (_container, store) = setup().await;

    store.begin_entity().await.unwrap();
    store
        .upsert(Row::new(Table::CallsignActivityStats).set("callsign", "K1KEEP"))
        .await
        .unwrap();
    store.end_entity(true).await.unwrap();

    store.begin_entity().await.unwrap();
    store
        .upsert(Row::new(Table::CallsignActivityStats).set("callsign", "K2DROP"))
        .await
        .unwrap();
    store.end_entity(false).await.unwrap();
    store.commit().await.unwrap();

    assert_eq!(
        scalar(store.pool(), "SELECT COUNT(*) FROM callsign_activity_stats").await,
        1
    );
    assert_eq!(
        scalar(store.pool(), "SELECT COUNT(*) FROM callsign_activity_stats WHERE callsign = 'K1KEEP'").await,
        1
    );
}

#[tokio::test]
async fn padded_log_callsigns_still_match() {
    let (_container, store) = setup().await;
    let pool = store.pool();
    let now = Utc::now();
    let day = Duration::days(1);

    sqlx::query("INSERT INTO callsigns (callsign) VALUES (' k9pad ')")
        .execute(pool)
        .await
        .expect("seed callsigns");
    for (id, raw) in [(11i64, " k9pad "), (12, "K9PAD  ")] {
        sqlx::query(
            r#"INSERT INTO callsign_log (callsign, transcript_id, "timestamp") VALUES ($1, $2, $3)"#,
        )
        .bind(raw)
        .bind(id)
        .bind(now - day)
        .execute(pool)
        .await
        .expect("seed callsign_log");
    }
    sqlx::query(
        "INSERT INTO net_participation (net_id, callsign, role, first_seen_time, last_seen_time) \
         VALUES ('pnw-2m', ' K9PAD ', 'NCS', $1, $1)",
    )
    .bind(now - day * 2)
    .execute(pool)
    .await
    .expect("seed net_participation");
    sqlx::query(
        "INSERT INTO net_data (net_id, start_transcript_id, end_transcript_id, ncs_callsign, start_time, end_time, checkins) \
         VALUES ('pnw-2m', 11, 12, ' k9pad ', $1, $2, 9)",
    )
    .bind(now - day * 2)
    .bind(now - day * 2 + Duration::minutes(30))
    .execute(pool)
    .await
    .expect("seed net_data");

    let report = ProfileRunner::new(&store, &store, &OfflineSummarizer, options(now))
        .run()
        .await
        .unwrap();
    assert_eq!(report.callsigns.profiled, 1);
    assert_eq!(report.ncs.profiled, 1);

    assert_eq!(
        scalar(pool, "SELECT total_tx_segments FROM callsign_activity_stats WHERE callsign = 'K9PAD'").await,
        2
    );
    assert_eq!(
        scalar(pool, "SELECT nets_led_count FROM ncs_activity_stats WHERE callsign = 'K9PAD'").await,
        1
    );
}

struct KnowsOnly(&'static str);

#[async_trait::async_trait]
impl CallsignLookup for KnowsOnly {
    async fn lookup(&mut self, callsign: &str) -> Result<qrz_client::Lookup, qrz_client::QrzError> {
        Ok(if callsign == self.0 {
            qrz_client::Lookup::Valid
        } else {
            qrz_client::Lookup::Invalid(format!("Not found: {callsign}"))
        })
    }
}

#[tokio::test]
async fn validation_updates_the_callsigns_table() {
    let (_container, store) = setup().await;
    seed(store.pool(), Utc::now()).await;

    let stats = validate_callsigns(&store, &mut KnowsOnly("KK7NQN")).await.unwrap();
    assert_eq!(stats.validated, 1);
    assert_eq!(stats.deleted, 1);

    assert_eq!(
        scalar(store.pool(), "SELECT validated::bigint FROM callsigns WHERE callsign = 'KK7NQN'").await,
        1
    );
    assert_eq!(scalar(store.pool(), "SELECT COUNT(*) FROM callsigns").await, 1);
}
