//! Keyword-presence topic hints for the offline summarizer.
//!
//! Not topic modeling: a snippet counts toward a topic when the keyword
//! appears anywhere in its lower-cased text.

use std::collections::BTreeMap;

pub const TOPIC_VOCABULARY: &[&str] = &[
    "antenna",
    "amp",
    "propagation",
    "aprs",
    "dmr",
    "fusion",
    "winlink",
    "emcomm",
    "contest",
    "dx",
    "astronomy",
    "rv",
    "science",
    "tech",
    "net",
    "check-in",
    "qso",
    "license",
    "newbie",
    "gear",
];

/// Hits needed for a full coverage weight.
const FULL_COVERAGE_HITS: f64 = 5.0;

/// Snippets mentioning each topic, in vocabulary order, topics without hits omitted.
pub fn topic_hits<'a>(texts: impl IntoIterator<Item = &'a str>) -> Vec<(&'static str, usize)> {
    let mut counts = vec![0usize; TOPIC_VOCABULARY.len()];
    for text in texts {
        let lower = text.to_lowercase();
        for (i, key) in TOPIC_VOCABULARY.iter().enumerate() {
            if lower.contains(key) {
                counts[i] += 1;
            }
        }
    }

    TOPIC_VOCABULARY
        .iter()
        .zip(counts)
        .filter(|(_, n)| *n > 0)
        .map(|(k, n)| (*k, n))
        .collect()
}

/// `min(1, hits / 5)` per topic.
pub fn coverage(hits: &[(&'static str, usize)]) -> BTreeMap<String, f64> {
    hits.iter()
        .map(|(k, n)| (k.to_string(), (*n as f64 / FULL_COVERAGE_HITS).min(1.0)))
        .collect()
}

/// Topic with the most hits; ties go to the earlier vocabulary entry.
pub fn dominant_topic(hits: &[(&'static str, usize)]) -> Option<&'static str> {
    hits.iter()
        .fold(None::<(&'static str, usize)>, |best, &(k, n)| match best {
            Some((_, m)) if m >= n => best,
            _ => Some((k, n)),
        })
        .map(|(k, _)| k)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_snippets_not_occurrences() {
        let hits = topic_hits(["DX DX dx", "Working DX on 20m", "new antenna"]);
        assert_eq!(hits, vec![("antenna", 1), ("dx", 2)]);
    }

    #[test]
    fn coverage_saturates_at_five() {
        let cov = coverage(&[("dmr", 2), ("aprs", 9)]);
        assert_eq!(cov["dmr"], 0.4);
        assert_eq!(cov["aprs"], 1.0);
    }

    #[test]
    fn ties_prefer_vocabulary_order() {
        let hits = topic_hits(["winlink and aprs tonight"]);
        assert_eq!(dominant_topic(&hits), Some("aprs"));
        assert_eq!(dominant_topic(&[]), None);
    }

    #[test]
    fn highest_count_wins() {
        let hits = vec![("antenna", 1), ("contest", 3), ("qso", 2)];
        assert_eq!(dominant_topic(&hits), Some("contest"));
    }
}
