use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::lenient;
use crate::scoring::clamp_score;

/// Structured judgment of one operator's on-air behavior.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CallsignAssessment {
    /// The callsign being described
    #[serde(default, deserialize_with = "lenient::text")]
    pub callsign: String,
    /// Most recent topic discussed
    #[serde(default, deserialize_with = "lenient::text")]
    pub latest_topic: String,
    /// Most frequently discussed topic
    #[serde(default, deserialize_with = "lenient::text")]
    pub most_topic: String,
    /// Topic name to relevance weight from 0.0 to 1.0
    #[serde(default, deserialize_with = "lenient::weights")]
    #[schemars(with = "BTreeMap<String, f64>")]
    pub topic_coverage: BTreeMap<String, f64>,
    /// Short neutral summary
    #[serde(default, deserialize_with = "lenient::text")]
    pub summary: String,
    /// Short respectful bio-like line based ONLY on radio behavior
    #[serde(default, deserialize_with = "lenient::text")]
    pub personal_summary: String,
    /// 0.0 to 1.0
    #[serde(default, deserialize_with = "lenient::score")]
    #[schemars(with = "Option<f64>")]
    pub friendly_score: Option<f64>,
    /// 0.0 to 1.0
    #[serde(default, deserialize_with = "lenient::score")]
    #[schemars(with = "Option<f64>")]
    pub serious_score: Option<f64>,
    /// 0.0 to 1.0
    #[serde(default, deserialize_with = "lenient::score")]
    #[schemars(with = "Option<f64>")]
    pub focus_score: Option<f64>,
    /// 0.0 to 1.0
    #[serde(default, deserialize_with = "lenient::score")]
    #[schemars(with = "Option<f64>")]
    pub helpful_score: Option<f64>,
    /// 0.0 to 1.0
    #[serde(default, deserialize_with = "lenient::score")]
    #[schemars(with = "Option<f64>")]
    pub technical_score: Option<f64>,
    /// 0.0 to 1.0
    #[serde(default, deserialize_with = "lenient::score")]
    #[schemars(with = "Option<f64>")]
    pub civility_score: Option<f64>,
    /// Metric key to a one-sentence reason cited from the evidence
    #[serde(default, deserialize_with = "lenient::reasons")]
    #[schemars(with = "BTreeMap<String, String>")]
    pub metric_reasons: BTreeMap<String, String>,
}

impl CallsignAssessment {
    /// Scores and topic weights clamped to [0, 1].
    pub fn normalized(mut self) -> Self {
        for score in [
            &mut self.friendly_score,
            &mut self.serious_score,
            &mut self.focus_score,
            &mut self.helpful_score,
            &mut self.technical_score,
            &mut self.civility_score,
        ] {
            *score = clamp_score(*score);
        }
        self.topic_coverage = clamp_weights(self.topic_coverage);
        self
    }
}

/// Canonical profile of a recurring net.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NetAssessment {
    /// Net slug
    #[serde(default, deserialize_with = "lenient::text")]
    pub net_id: String,
    /// Short neutral description
    #[serde(default, deserialize_with = "lenient::text")]
    pub canonical_summary: String,
    /// 0.0 to 1.0
    #[serde(default, deserialize_with = "lenient::score")]
    #[schemars(with = "Option<f64>")]
    pub friendliness_score: Option<f64>,
    /// 0.0 to 1.0
    #[serde(default, deserialize_with = "lenient::score")]
    #[schemars(with = "Option<f64>")]
    pub focus_score: Option<f64>,
    /// 0.0 to 1.0
    #[serde(default, deserialize_with = "lenient::score")]
    #[schemars(with = "Option<f64>")]
    pub diversity_score: Option<f64>,
    /// 0.0 to 1.0
    #[serde(default, deserialize_with = "lenient::score")]
    #[schemars(with = "Option<f64>")]
    pub activity_score: Option<f64>,
    /// 0.0 to 1.0
    #[serde(default, deserialize_with = "lenient::score")]
    #[schemars(with = "Option<f64>")]
    pub helpfulness_score: Option<f64>,
    /// 0.0 to 1.0
    #[serde(default, deserialize_with = "lenient::score")]
    #[schemars(with = "Option<f64>")]
    pub civility_score: Option<f64>,
    /// Best estimate of session length in minutes
    #[serde(default, deserialize_with = "lenient::whole")]
    #[schemars(with = "Option<i64>")]
    pub typical_duration_min: Option<i64>,
    /// Best estimate of check-ins per session
    #[serde(default, deserialize_with = "lenient::whole")]
    #[schemars(with = "Option<i64>")]
    pub typical_checkins: Option<i64>,
    /// Schedule like 'Daily 09:00 PT' if clear, else empty
    #[serde(default, deserialize_with = "lenient::text")]
    pub schedule_hint: String,
    /// Topic name to relevance weight from 0.0 to 1.0
    #[serde(default, deserialize_with = "lenient::weights")]
    #[schemars(with = "BTreeMap<String, f64>")]
    pub topic_coverage: BTreeMap<String, f64>,
    /// Metric key to a one-sentence reason
    #[serde(default, deserialize_with = "lenient::reasons")]
    #[schemars(with = "BTreeMap<String, String>")]
    pub metric_reasons: BTreeMap<String, String>,
}

impl NetAssessment {
    pub fn normalized(mut self) -> Self {
        for score in [
            &mut self.friendliness_score,
            &mut self.focus_score,
            &mut self.diversity_score,
            &mut self.activity_score,
            &mut self.helpfulness_score,
            &mut self.civility_score,
        ] {
            *score = clamp_score(*score);
        }
        self.typical_duration_min = self.typical_duration_min.filter(|v| *v >= 0);
        self.typical_checkins = self.typical_checkins.filter(|v| *v >= 0);
        self.topic_coverage = clamp_weights(self.topic_coverage);
        self
    }
}

/// Control style of a net control station.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NcsAssessment {
    /// The NCS callsign
    #[serde(default, deserialize_with = "lenient::text")]
    pub callsign: String,
    /// Short description of how this operator runs nets
    #[serde(default, deserialize_with = "lenient::text")]
    pub control_style_summary: String,
    /// 0.0 to 1.0
    #[serde(default, deserialize_with = "lenient::score")]
    #[schemars(with = "Option<f64>")]
    pub friendliness_score: Option<f64>,
    /// 0.0 to 1.0
    #[serde(default, deserialize_with = "lenient::score")]
    #[schemars(with = "Option<f64>")]
    pub structure_score: Option<f64>,
    /// 0.0 to 1.0
    #[serde(default, deserialize_with = "lenient::score")]
    #[schemars(with = "Option<f64>")]
    pub inclusivity_score: Option<f64>,
    /// 0.0 to 1.0
    #[serde(default, deserialize_with = "lenient::score")]
    #[schemars(with = "Option<f64>")]
    pub clarity_score: Option<f64>,
    /// 0.0 to 1.0
    #[serde(default, deserialize_with = "lenient::score")]
    #[schemars(with = "Option<f64>")]
    pub civility_score: Option<f64>,
    /// Metric key to a one-sentence reason
    #[serde(default, deserialize_with = "lenient::reasons")]
    #[schemars(with = "BTreeMap<String, String>")]
    pub metric_reasons: BTreeMap<String, String>,
}

impl NcsAssessment {
    pub fn normalized(mut self) -> Self {
        for score in [
            &mut self.friendliness_score,
            &mut self.structure_score,
            &mut self.inclusivity_score,
            &mut self.clarity_score,
            &mut self.civility_score,
        ] {
            *score = clamp_score(*score);
        }
        self
    }
}

fn clamp_weights(weights: BTreeMap<String, f64>) -> BTreeMap<String, f64> {
    weights
        .into_iter()
        .filter_map(|(k, w)| clamp_score(Some(w)).map(|w| (k, w)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ai_client::SchemaHint;
    use serde_json::json;

    #[test]
    fn accepts_loose_model_output() {
        let a: CallsignAssessment = serde_json::from_value(json!({
            "callsign": "KK7NQN",
            "summary": null,
            "friendly_score": "0.8",
            "serious_score": 1.4,
            "focus_score": "n/a",
            "topic_coverage": {"dx": 0.5, "aprs": "0.25", "bogus": "lots"},
            "metric_reasons": {"friendly_score": "Greets everyone", "focus_score": 3}
        }))
        .unwrap();
        let a = a.normalized();

        assert_eq!(a.summary, "");
        assert_eq!(a.friendly_score, Some(0.8));
        assert_eq!(a.serious_score, Some(1.0));
        assert_eq!(a.focus_score, None);
        assert_eq!(a.technical_score, None);
        assert_eq!(a.topic_coverage.len(), 2);
        assert_eq!(a.topic_coverage["aprs"], 0.25);
        assert_eq!(a.metric_reasons["focus_score"], "3");
    }

    #[test]
    fn wrong_types_are_rejected() {
        let err = serde_json::from_value::<NcsAssessment>(json!({"clarity_score": [0.5]}));
        assert!(err.is_err());
        let err = serde_json::from_value::<NetAssessment>(json!({"metric_reasons": "none"}));
        assert!(err.is_err());
    }

    #[test]
    fn whole_numbers_truncate() {
        let n: NetAssessment = serde_json::from_value(json!({
            "typical_duration_min": 45.9,
            "typical_checkins": "22"
        }))
        .unwrap();
        assert_eq!(n.typical_duration_min, Some(45));
        assert_eq!(n.typical_checkins, Some(22));
    }

    #[test]
    fn schema_hint_lists_every_key() {
        let hint = NcsAssessment::schema_hint();
        let props = hint["properties"].as_object().unwrap();
        for key in ["callsign", "control_style_summary", "clarity_score", "metric_reasons"] {
            assert!(props.contains_key(key), "missing {key}");
        }
        assert_eq!(hint["required"].as_array().unwrap().len(), props.len());
    }
}
