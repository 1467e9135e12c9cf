use chrono::{DateTime, Utc};

/// Profile tables the pipeline writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Table {
    CallsignActivityStats,
    CallsignProfiles,
    CallsignProfileHistory,
    CallsignMetricReasons,
    CallsignTopicStats,
    NetActivityStats,
    NetProfiles,
    NetProfileHistory,
    NetMetricReasons,
    NetTopicStats,
    NcsActivityStats,
    NcsProfiles,
    NcsProfileHistory,
    NcsMetricReasons,
}

impl Table {
    pub fn name(&self) -> &'static str {
        match self {
            Table::CallsignActivityStats => "callsign_activity_stats",
            Table::CallsignProfiles => "callsign_profiles",
            Table::CallsignProfileHistory => "callsign_profile_history",
            Table::CallsignMetricReasons => "callsign_metric_reasons",
            Table::CallsignTopicStats => "callsign_topic_stats",
            Table::NetActivityStats => "net_activity_stats",
            Table::NetProfiles => "net_profiles",
            Table::NetProfileHistory => "net_profile_history",
            Table::NetMetricReasons => "net_metric_reasons",
            Table::NetTopicStats => "net_topic_stats",
            Table::NcsActivityStats => "ncs_activity_stats",
            Table::NcsProfiles => "ncs_profiles",
            Table::NcsProfileHistory => "ncs_profile_history",
            Table::NcsMetricReasons => "ncs_metric_reasons",
        }
    }

    /// Columns of the uniqueness constraint used for upserts. Empty for
    /// append-only tables.
    pub fn conflict_keys(&self) -> &'static [&'static str] {
        match self {
            Table::CallsignActivityStats | Table::CallsignProfiles => &["callsign"],
            Table::CallsignTopicStats => &["callsign", "topic"],
            Table::NetActivityStats | Table::NetProfiles => &["net_id"],
            Table::NetTopicStats => &["net_id", "topic"],
            Table::NcsActivityStats | Table::NcsProfiles => &["callsign"],
            Table::CallsignProfileHistory
            | Table::CallsignMetricReasons
            | Table::NetProfileHistory
            | Table::NetMetricReasons
            | Table::NcsProfileHistory
            | Table::NcsMetricReasons => &[],
        }
    }

    pub fn is_append_only(&self) -> bool {
        self.conflict_keys().is_empty()
    }
}

/// A typed, nullable column value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Int(Option<i64>),
    Float(Option<f64>),
    Text(Option<String>),
    Json(serde_json::Value),
    Timestamp(Option<DateTime<Utc>>),
}

impl SqlValue {
    /// Stable text form used to compare key columns.
    pub fn key_text(&self) -> String {
        match self {
            SqlValue::Int(v) => v.map(|v| v.to_string()).unwrap_or_default(),
            SqlValue::Float(v) => v.map(|v| v.to_string()).unwrap_or_default(),
            SqlValue::Text(v) => v.clone().unwrap_or_default(),
            SqlValue::Json(v) => v.to_string(),
            SqlValue::Timestamp(v) => v.map(|v| v.to_rfc3339()).unwrap_or_default(),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SqlValue::Float(v) => *v,
            SqlValue::Int(v) => v.map(|v| v as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Int(v) => *v,
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(v) => v.as_deref(),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        match self {
            SqlValue::Int(v) => v.is_none(),
            SqlValue::Float(v) => v.is_none(),
            SqlValue::Text(v) => v.is_none(),
            SqlValue::Json(v) => v.is_null(),
            SqlValue::Timestamp(v) => v.is_none(),
        }
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int(Some(v))
    }
}

impl From<Option<i64>> for SqlValue {
    fn from(v: Option<i64>) -> Self {
        SqlValue::Int(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Float(Some(v))
    }
}

impl From<Option<f64>> for SqlValue {
    fn from(v: Option<f64>) -> Self {
        SqlValue::Float(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(Some(v.to_string()))
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(Some(v))
    }
}

impl From<Option<String>> for SqlValue {
    fn from(v: Option<String>) -> Self {
        SqlValue::Text(v)
    }
}

impl From<serde_json::Value> for SqlValue {
    fn from(v: serde_json::Value) -> Self {
        SqlValue::Json(v)
    }
}

impl From<DateTime<Utc>> for SqlValue {
    fn from(v: DateTime<Utc>) -> Self {
        SqlValue::Timestamp(Some(v))
    }
}

impl From<Option<DateTime<Utc>>> for SqlValue {
    fn from(v: Option<DateTime<Utc>>) -> Self {
        SqlValue::Timestamp(v)
    }
}

/// One row destined for a profile table, columns in insertion order.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub table: Table,
    pub columns: Vec<(&'static str, SqlValue)>,
}

impl Row {
    pub fn new(table: Table) -> Self {
        Self {
            table,
            columns: Vec::new(),
        }
    }

    pub fn set(mut self, column: &'static str, value: impl Into<SqlValue>) -> Self {
        let value = value.into();
        match self.columns.iter_mut().find(|(c, _)| *c == column) {
            Some(slot) => slot.1 = value,
            None => self.columns.push((column, value)),
        }
        self
    }

    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .find(|(c, _)| *c == column)
            .map(|(_, v)| v)
    }

    /// Values of the table's conflict keys, in key order.
    pub fn key(&self) -> Vec<String> {
        self.table
            .conflict_keys()
            .iter()
            .map(|k| self.get(k).map(SqlValue::key_text).unwrap_or_default())
            .collect()
    }

    /// Every conflict key column is present.
    pub fn has_key_columns(&self) -> bool {
        self.table
            .conflict_keys()
            .iter()
            .all(|k| self.get(k).is_some_and(|v| !v.is_null()))
    }
}
