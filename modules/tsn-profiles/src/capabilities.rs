use std::collections::HashSet;

/// Which optional log tables and columns exist in the connected store.
///
/// Detected once per run; the evidence extractor branches on these flags
/// instead of probing with queries that may fail.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCapabilities {
    pub callsigns: bool,
    pub callsign_log: bool,
    pub transcription_analysis: bool,
    pub net_participation: bool,
    pub net_data: bool,
    pub transcriptions: bool,
    pub transcriptions_large: bool,
    /// `net_data.checkins`
    pub net_data_checkins: bool,
    /// `net_participation.role`
    pub net_participation_role: bool,
}

/// Log tables the pipeline reads when present.
pub const OPTIONAL_TABLES: &[&str] = &[
    "callsigns",
    "callsign_log",
    "transcription_analysis",
    "net_participation",
    "net_data",
    "transcriptions",
    "transcriptions_large",
];

impl StoreCapabilities {
    /// Everything present.
    pub fn all() -> Self {
        Self {
            callsigns: true,
            callsign_log: true,
            transcription_analysis: true,
            net_participation: true,
            net_data: true,
            transcriptions: true,
            transcriptions_large: true,
            net_data_checkins: true,
            net_participation_role: true,
        }
    }

    /// Build from catalog listings of table names and `(table, column)` pairs.
    pub fn from_catalog(tables: &HashSet<String>, columns: &HashSet<(String, String)>) -> Self {
        let has = |t: &str| tables.contains(t);
        let has_col = |t: &str, c: &str| columns.contains(&(t.to_string(), c.to_string()));

        Self {
            callsigns: has("callsigns"),
            callsign_log: has("callsign_log"),
            transcription_analysis: has("transcription_analysis"),
            net_participation: has("net_participation"),
            net_data: has("net_data"),
            transcriptions: has("transcriptions"),
            transcriptions_large: has("transcriptions_large"),
            net_data_checkins: has("net_data") && has_col("net_data", "checkins"),
            net_participation_role: has("net_participation") && has_col("net_participation", "role"),
        }
    }

    /// Transcript text tables in lookup order, primary first.
    pub fn transcript_tables(&self) -> Vec<TranscriptTable> {
        let mut out = Vec::with_capacity(2);
        if self.transcriptions {
            out.push(TranscriptTable::Primary);
        }
        if self.transcriptions_large {
            out.push(TranscriptTable::Overflow);
        }
        out
    }

    /// Net segment classification needs both the log and the analysis table.
    pub fn can_classify_segments(&self) -> bool {
        self.callsign_log && self.transcription_analysis
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TranscriptTable {
    Primary,
    Overflow,
}

impl TranscriptTable {
    pub fn table_name(&self) -> &'static str {
        match self {
            TranscriptTable::Primary => "transcriptions",
            TranscriptTable::Overflow => "transcriptions_large",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn columns_require_their_table() {
        let tables: HashSet<String> = ["callsign_log", "transcriptions"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let columns: HashSet<(String, String)> =
            [("net_data".to_string(), "checkins".to_string())].into_iter().collect();

        let caps = StoreCapabilities::from_catalog(&tables, &columns);
        assert!(caps.callsign_log);
        assert!(!caps.net_data);
        assert!(!caps.net_data_checkins);
        assert!(!caps.can_classify_segments());
        assert_eq!(caps.transcript_tables(), vec![TranscriptTable::Primary]);
    }

    #[test]
    fn primary_table_is_read_first() {
        assert_eq!(
            StoreCapabilities::all().transcript_tables(),
            vec![TranscriptTable::Primary, TranscriptTable::Overflow]
        );
    }
}
