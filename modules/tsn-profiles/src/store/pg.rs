use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder, Transaction};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use tsn_common::{ProfileError, Result};

use super::{
    CallsignRegistry, LogReader, NetSession, NewModelRun, ParticipationSummary, ProfileSink, Row,
    SegmentCounts, SessionMetrics, SqlValue, TranscriptRow,
};
use crate::capabilities::{StoreCapabilities, TranscriptTable, OPTIONAL_TABLES};

/// Advisory lock key shared by every profile run ("tsn_prof").
const RUN_LOCK_KEY: i64 = 0x7473_6e5f_7072_6f66;

const ENTITY_SAVEPOINT: &str = "profile_entity";

type SessionTuple = (
    i64,
    String,
    Option<i64>,
    Option<i64>,
    Option<String>,
    Option<DateTime<Utc>>,
    Option<DateTime<Utc>>,
);

type MetricsTuple = (
    i64,
    i64,
    Option<f64>,
    Option<f64>,
    Option<DateTime<Utc>>,
    Option<DateTime<Utc>>,
);

/// Postgres-backed log reader and profile writer.
///
/// Profile writes go through one lazily opened transaction that `commit`
/// closes. The run lock lives on a dedicated connection because advisory
/// locks belong to the session that took them.
pub struct PgStore {
    pool: PgPool,
    tx: Mutex<Option<Transaction<'static, Postgres>>>,
    lock_conn: Mutex<Option<PoolConnection<Postgres>>>,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            tx: Mutex::new(None),
            lock_conn: Mutex::new(None),
        }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .connect(database_url)
            .await?;
        info!("Connected to database");
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run the embedded SQL migrations for the profile tables.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| ProfileError::Database(e.into()))?;
        Ok(())
    }

    async fn execute_in_tx(&self, mut qb: QueryBuilder<'static, Postgres>) -> Result<()> {
        let mut guard = self.tx.lock().await;
        if guard.is_none() {
            *guard = Some(self.pool.begin().await?);
        }
        let Some(tx) = guard.as_mut() else {
            return Err(ProfileError::Validation("no open transaction".into()));
        };
        qb.build().execute(&mut **tx).await?;
        Ok(())
    }

    async fn session_metrics(
        &self,
        filter: &str,
        key: &str,
        since: DateTime<Utc>,
        with_checkins: bool,
    ) -> Result<SessionMetrics> {
        let checkins = if with_checkins {
            "AVG(checkins)::float8"
        } else {
            "NULL::float8"
        };
        let sql = format!(
            r#"
            SELECT COUNT(*)::bigint,
                   COUNT(DISTINCT net_id)::bigint,
                   {checkins},
                   AVG(EXTRACT(EPOCH FROM (end_time - start_time)) / 60.0)::float8,
                   MIN(start_time)::timestamptz,
                   MAX(start_time)::timestamptz
            FROM net_data
            WHERE {filter}
              AND (start_time IS NULL OR start_time >= $2)
            "#
        );

        let (count, unique_nets, avg_checkins, avg_duration_min, first_start, last_start) =
            sqlx::query_as::<_, MetricsTuple>(&sql)
                .bind(key)
                .bind(since)
                .fetch_one(&self.pool)
                .await?;

        Ok(SessionMetrics {
            count,
            unique_nets,
            avg_checkins,
            avg_duration_min,
            first_start,
            last_start,
        })
    }

    async fn sessions(
        &self,
        filter: &str,
        key: &str,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<NetSession>> {
        let sql = format!(
            r#"
            SELECT id::bigint, net_id::text, start_transcript_id::bigint, end_transcript_id::bigint,
                   ncs_callsign::text, start_time::timestamptz, end_time::timestamptz
            FROM net_data
            WHERE {filter}
              AND (start_time IS NULL OR start_time >= $2)
            ORDER BY id DESC
            LIMIT $3
            "#
        );

        let rows = sqlx::query_as::<_, SessionTuple>(&sql)
            .bind(key)
            .bind(since)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(row_to_session).collect())
    }

    async fn strings(&self, sql: &str) -> Result<Vec<String>> {
        let rows = sqlx::query_as::<_, (Option<String>,)>(sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().filter_map(|(s,)| s).collect())
    }

    async fn strings_since(&self, sql: &str, since: DateTime<Utc>) -> Result<Vec<String>> {
        let rows = sqlx::query_as::<_, (Option<String>,)>(sql)
            .bind(since)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().filter_map(|(s,)| s).collect())
    }
}

fn row_to_session(r: SessionTuple) -> NetSession {
    NetSession {
        id: r.0,
        net_id: r.1,
        start_transcript_id: r.2,
        end_transcript_id: r.3,
        ncs_callsign: r.4,
        start_time: r.5,
        end_time: r.6,
    }
}

/// `INSERT INTO t (cols) VALUES (binds)` plus, for upserts, the conflict clause.
fn build_write(row: Row, upsert: bool) -> Result<QueryBuilder<'static, Postgres>> {
    if row.columns.is_empty() {
        return Err(ProfileError::Validation(format!(
            "empty row for {}",
            row.table.name()
        )));
    }
    let keys = row.table.conflict_keys();
    if upsert && (keys.is_empty() || !row.has_key_columns()) {
        return Err(ProfileError::Validation(format!(
            "upsert into {} is missing its key columns",
            row.table.name()
        )));
    }

    let column_names: Vec<&'static str> = row.columns.iter().map(|(c, _)| *c).collect();

    let mut qb = QueryBuilder::new("INSERT INTO ");
    qb.push(row.table.name());
    qb.push(" (");
    qb.push(column_names.join(", "));
    qb.push(") VALUES (");
    {
        let mut values = qb.separated(", ");
        for (_, value) in row.columns {
            match value {
                SqlValue::Int(v) => {
                    values.push_bind(v);
                }
                SqlValue::Float(v) => {
                    values.push_bind(v);
                }
                SqlValue::Text(v) => {
                    values.push_bind(v);
                }
                SqlValue::Json(v) => {
                    values.push_bind(v);
                }
                SqlValue::Timestamp(v) => {
                    values.push_bind(v);
                }
            }
        }
    }
    qb.push(")");

    if upsert {
        qb.push(" ON CONFLICT (");
        qb.push(keys.join(", "));
        qb.push(")");

        let updates: Vec<String> = column_names
            .iter()
            .filter(|c| !keys.contains(*c))
            .map(|c| format!("{c} = EXCLUDED.{c}"))
            .collect();
        if updates.is_empty() {
            qb.push(" DO NOTHING");
        } else {
            qb.push(" DO UPDATE SET ");
            qb.push(updates.join(", "));
        }
    }

    Ok(qb)
}

// ---------------------------------------------------------------------------
// LogReader
// ---------------------------------------------------------------------------

#[async_trait]
impl LogReader for PgStore {
    async fn capabilities(&self) -> Result<StoreCapabilities> {
        let wanted: Vec<String> = OPTIONAL_TABLES.iter().map(|t| t.to_string()).collect();

        let tables: HashSet<String> = sqlx::query_as::<_, (String,)>(
            r#"
            SELECT table_name::text
            FROM information_schema.tables
            WHERE table_schema = current_schema()
              AND table_name = ANY($1)
            "#,
        )
        .bind(&wanted)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|(t,)| t)
        .collect();

        let columns: HashSet<(String, String)> = sqlx::query_as::<_, (String, String)>(
            r#"
            SELECT table_name::text, column_name::text
            FROM information_schema.columns
            WHERE table_schema = current_schema()
              AND (table_name, column_name) IN (('net_data', 'checkins'), ('net_participation', 'role'))
            "#,
        )
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .collect();

        let caps = StoreCapabilities::from_catalog(&tables, &columns);
        debug!(?caps, "Detected store capabilities");
        Ok(caps)
    }

    async fn registered_callsigns(&self) -> Result<Vec<String>> {
        self.strings("SELECT callsign::text FROM callsigns").await
    }

    async fn logged_callsigns(&self) -> Result<Vec<String>> {
        self.strings("SELECT DISTINCT callsign::text FROM callsign_log").await
    }

    async fn segment_counts(&self, callsign: &str, since: DateTime<Utc>) -> Result<SegmentCounts> {
        let (total, last_seen) = sqlx::query_as::<_, (i64, Option<DateTime<Utc>>)>(
            r#"
            SELECT COUNT(*)::bigint, MAX("timestamp")::timestamptz
            FROM callsign_log
            WHERE UPPER(TRIM(callsign)) = $1
              AND ("timestamp" IS NULL OR "timestamp" >= $2)
            "#,
        )
        .bind(callsign)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(SegmentCounts { total, last_seen })
    }

    async fn net_segment_count(&self, callsign: &str, since: DateTime<Utc>) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)::bigint
            FROM callsign_log cl
            JOIN transcription_analysis ta ON ta.transcription_id = cl.transcript_id
            WHERE UPPER(TRIM(cl.callsign)) = $1
              AND (cl."timestamp" IS NULL OR cl."timestamp" >= $2)
              AND ta.is_net::int = 1
            "#,
        )
        .bind(callsign)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn participation(
        &self,
        callsign: &str,
        since: DateTime<Utc>,
    ) -> Result<ParticipationSummary> {
        let (distinct_nets, last_seen) = sqlx::query_as::<_, (i64, Option<DateTime<Utc>>)>(
            r#"
            SELECT COUNT(DISTINCT net_id)::bigint, MAX(last_seen_time)::timestamptz
            FROM net_participation
            WHERE UPPER(TRIM(callsign)) = $1
              AND (last_seen_time IS NULL OR last_seen_time >= $2)
            "#,
        )
        .bind(callsign)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(ParticipationSummary {
            distinct_nets,
            last_seen,
        })
    }

    async fn recent_transcript_ids(
        &self,
        callsign: &str,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<i64>> {
        let ids = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT DISTINCT transcript_id::bigint
            FROM callsign_log
            WHERE UPPER(TRIM(callsign)) = $1
              AND transcript_id IS NOT NULL AND transcript_id > 0
              AND ("timestamp" IS NULL OR "timestamp" >= $2)
            ORDER BY 1 DESC
            LIMIT $3
            "#,
        )
        .bind(callsign)
        .bind(since)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn transcripts(&self, table: TranscriptTable, ids: &[i64]) -> Result<Vec<TranscriptRow>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT id::bigint, filename::text, transcription::text FROM {} WHERE id = ANY($1) ORDER BY id DESC",
            table.table_name()
        );
        let rows = sqlx::query_as::<_, (i64, Option<String>, Option<String>)>(&sql)
            .bind(ids.to_vec())
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(id, filename, text)| TranscriptRow { id, filename, text })
            .collect())
    }

    async fn session_net_ids(&self) -> Result<Vec<String>> {
        self.strings(
            "SELECT DISTINCT net_id::text FROM net_data WHERE net_id IS NOT NULL AND net_id::text <> '' ORDER BY 1",
        )
        .await
    }

    async fn participation_net_ids(&self) -> Result<Vec<String>> {
        self.strings(
            "SELECT DISTINCT net_id::text FROM net_participation WHERE net_id IS NOT NULL AND net_id::text <> '' ORDER BY 1",
        )
        .await
    }

    async fn net_sessions(
        &self,
        net_id: &str,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<NetSession>> {
        self.sessions("net_id::text = $1", net_id, since, limit).await
    }

    async fn net_session_metrics(
        &self,
        net_id: &str,
        since: DateTime<Utc>,
        with_checkins: bool,
    ) -> Result<SessionMetrics> {
        self.session_metrics("net_id::text = $1", net_id, since, with_checkins)
            .await
    }

    async fn net_participants(
        &self,
        net_id: &str,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<String>> {
        let rows = sqlx::query_scalar::<_, String>(
            r#"
            SELECT DISTINCT UPPER(TRIM(callsign))::text
            FROM net_participation
            WHERE net_id::text = $1
              AND callsign IS NOT NULL
              AND (last_seen_time IS NULL OR last_seen_time >= $2)
            ORDER BY 1
            LIMIT $3
            "#,
        )
        .bind(net_id)
        .bind(since)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn session_ncs_callsigns(&self, since: DateTime<Utc>) -> Result<Vec<String>> {
        self.strings_since(
            r#"
            SELECT DISTINCT ncs_callsign::text
            FROM net_data
            WHERE ncs_callsign IS NOT NULL AND ncs_callsign <> ''
              AND (start_time IS NULL OR start_time >= $1)
            "#,
            since,
        )
        .await
    }

    async fn role_ncs_callsigns(&self, since: DateTime<Utc>) -> Result<Vec<String>> {
        self.strings_since(
            r#"
            SELECT DISTINCT callsign::text
            FROM net_participation
            WHERE role = 'NCS' AND callsign IS NOT NULL
              AND (last_seen_time IS NULL OR last_seen_time >= $1)
            "#,
            since,
        )
        .await
    }

    async fn ncs_session_metrics(
        &self,
        callsign: &str,
        since: DateTime<Utc>,
        with_checkins: bool,
    ) -> Result<SessionMetrics> {
        self.session_metrics("UPPER(TRIM(ncs_callsign)) = $1", callsign, since, with_checkins)
            .await
    }

    async fn ncs_role_count(&self, callsign: &str, since: DateTime<Utc>) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)::bigint
            FROM net_participation
            WHERE UPPER(TRIM(callsign)) = $1 AND role = 'NCS'
              AND (last_seen_time IS NULL OR last_seen_time >= $2)
            "#,
        )
        .bind(callsign)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn ncs_sessions(
        &self,
        callsign: &str,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<NetSession>> {
        self.sessions("UPPER(TRIM(ncs_callsign)) = $1", callsign, since, limit)
            .await
    }
}

// ---------------------------------------------------------------------------
// ProfileSink
// ---------------------------------------------------------------------------

#[async_trait]
impl ProfileSink for PgStore {
    async fn try_lock_run(&self) -> Result<bool> {
        let mut conn = self.pool.acquire().await?;
        let locked = sqlx::query_scalar::<_, bool>("SELECT pg_try_advisory_lock($1)")
            .bind(RUN_LOCK_KEY)
            .fetch_one(&mut *conn)
            .await?;
        if locked {
            *self.lock_conn.lock().await = Some(conn);
        }
        Ok(locked)
    }

    async fn unlock_run(&self) -> Result<()> {
        if let Some(mut conn) = self.lock_conn.lock().await.take() {
            let released = sqlx::query_scalar::<_, bool>("SELECT pg_advisory_unlock($1)")
                .bind(RUN_LOCK_KEY)
                .fetch_one(&mut *conn)
                .await?;
            if !released {
                warn!("Run lock was not held at release");
            }
        }
        Ok(())
    }

    async fn start_model_run(&self, run: &NewModelRun) -> Result<i64> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO profile_model_runs
                (run_uuid, model_name, model_params, prompt_hash, code_version, notes)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(&run.run_uuid)
        .bind(&run.model_name)
        .bind(&run.model_params)
        .bind(&run.prompt_hash)
        .bind(&run.code_version)
        .bind(&run.notes)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn finish_model_run(&self, model_run_id: i64) -> Result<()> {
        sqlx::query("UPDATE profile_model_runs SET finished_at = now() WHERE id = $1")
            .bind(model_run_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn begin_entity(&self) -> Result<()> {
        let mut qb = QueryBuilder::new("SAVEPOINT ");
        qb.push(ENTITY_SAVEPOINT);
        self.execute_in_tx(qb).await
    }

    async fn end_entity(&self, succeeded: bool) -> Result<()> {
        let mut qb = QueryBuilder::new(if succeeded {
            "RELEASE SAVEPOINT "
        } else {
            "ROLLBACK TO SAVEPOINT "
        });
        qb.push(ENTITY_SAVEPOINT);
        self.execute_in_tx(qb).await
    }

    async fn upsert(&self, row: Row) -> Result<()> {
        let qb = build_write(row, true)?;
        self.execute_in_tx(qb).await
    }

    async fn insert(&self, row: Row) -> Result<()> {
        let qb = build_write(row, false)?;
        self.execute_in_tx(qb).await
    }

    async fn commit(&self) -> Result<()> {
        if let Some(tx) = self.tx.lock().await.take() {
            tx.commit().await?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// CallsignRegistry
// ---------------------------------------------------------------------------

#[async_trait]
impl CallsignRegistry for PgStore {
    async fn unvalidated_callsigns(&self) -> Result<Vec<String>> {
        self.strings("SELECT callsign::text FROM callsigns WHERE validated::int = 0 ORDER BY callsign")
            .await
    }

    async fn mark_validated(&self, callsign: &str) -> Result<()> {
        sqlx::query("UPDATE callsigns SET validated = 1 WHERE callsign = $1")
            .bind(callsign)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_callsign(&self, callsign: &str) -> Result<()> {
        sqlx::query("DELETE FROM callsigns WHERE callsign = $1")
            .bind(callsign)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Table;

    #[test]
    fn upsert_updates_non_key_columns() {
        let row = Row::new(Table::CallsignActivityStats)
            .set("callsign", "KK7NQN")
            .set("total_tx_segments", 15i64)
            .set("last_seen", None::<DateTime<Utc>>);
        let qb = build_write(row, true).unwrap();
        assert_eq!(
            qb.sql(),
            "INSERT INTO callsign_activity_stats (callsign, total_tx_segments, last_seen) \
             VALUES ($1, $2, $3) ON CONFLICT (callsign) DO UPDATE SET \
             total_tx_segments = EXCLUDED.total_tx_segments, last_seen = EXCLUDED.last_seen"
        );
    }

    #[test]
    fn key_only_upsert_does_nothing_on_conflict() {
        let row = Row::new(Table::CallsignTopicStats)
            .set("callsign", "KK7NQN")
            .set("topic", "dx");
        let qb = build_write(row, true).unwrap();
        assert!(qb.sql().ends_with("ON CONFLICT (callsign, topic) DO NOTHING"));
    }

    #[test]
    fn upsert_without_key_is_rejected() {
        let row = Row::new(Table::NetProfiles).set("canonical_summary", "x");
        assert!(build_write(row, true).is_err());
        let history = Row::new(Table::NetProfileHistory).set("net_id", "n");
        assert!(build_write(history, true).is_err());
    }

    #[test]
    fn insert_has_no_conflict_clause() {
        let row = Row::new(Table::NcsMetricReasons)
            .set("callsign", "W7ABC")
            .set("metric_key", "clarity_score");
        let qb = build_write(row, false).unwrap();
        assert_eq!(
            qb.sql(),
            "INSERT INTO ncs_metric_reasons (callsign, metric_key) VALUES ($1, $2)"
        );
    }
}
