use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ProfileError, Result};

/// The three things the pipeline profiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Callsign,
    Net,
    Ncs,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Callsign => "callsign",
            EntityKind::Net => "net",
            EntityKind::Ncs => "ncs",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Half-open analysis window `[start, end)`. `start < end` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl AnalysisWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if start >= end {
            return Err(ProfileError::Validation(format!(
                "analysis window start {start} is not before end {end}"
            )));
        }
        Ok(Self { start, end })
    }

    /// The `days` days ending at `now`.
    pub fn trailing(now: DateTime<Utc>, days: u32) -> Result<Self> {
        Self::new(now - Duration::days(i64::from(days)), now)
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }
}

/// Trim and upper-case a callsign; `None` when nothing is left.
pub fn normalize_callsign(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_uppercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn window_rejects_empty_range() {
        let t = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        assert!(AnalysisWindow::new(t, t).is_err());
        assert!(AnalysisWindow::new(t, t - Duration::seconds(1)).is_err());
    }

    #[test]
    fn trailing_window_spans_requested_days() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let w = AnalysisWindow::trailing(now, 365).unwrap();
        assert_eq!(w.end(), now);
        assert_eq!(w.end() - w.start(), Duration::days(365));
    }

    #[test]
    fn zero_day_window_is_invalid() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        assert!(AnalysisWindow::trailing(now, 0).is_err());
    }

    #[test]
    fn callsigns_are_normalized() {
        assert_eq!(normalize_callsign("  kk7nqn ").as_deref(), Some("KK7NQN"));
        assert_eq!(normalize_callsign("   "), None);
    }

    #[test]
    fn entity_kind_names() {
        assert_eq!(EntityKind::Ncs.to_string(), "ncs");
        assert_eq!(EntityKind::Callsign.as_str(), "callsign");
    }
}
