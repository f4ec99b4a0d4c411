use serde::{Deserialize, Serialize};

use super::error::{Result, TreeError};

/// Thresholds steering one tree build. Immutable once the build starts.
///
/// The JSON field names match the run records written by earlier tooling, so a
/// stored `training_parameters` object can be fed back in unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingParameters {
    /// Nodes whose coefficient of variation falls below this become leaves.
    pub cv_limit: f64,
    /// Nodes with at most this many rows become leaves.
    pub total_count_limit: u64,
    pub cv_decimal_places: u32,
    pub average_decimal_places: u32,
    #[serde(rename = "maxDepth")]
    pub max_depth: u32,
    /// Number of leading remaining columns considered at each split.
    #[serde(rename = "maxFeatures")]
    pub max_features: usize,
    #[serde(rename = "debugMessages")]
    pub debug_messages: bool,
}

impl Default for TrainingParameters {
    fn default() -> Self {
        Self {
            cv_limit: 10.0,
            total_count_limit: 1,
            cv_decimal_places: 5,
            average_decimal_places: 2,
            max_depth: 15,
            max_features: 8,
            debug_messages: false,
        }
    }
}

impl TrainingParameters {
    /// Parses a (possibly partial) JSON object, filling gaps from the defaults.
    pub fn from_json_overrides(json: &str) -> Result<Self> {
        let parameters: TrainingParameters = serde_json::from_str(json)?;
        parameters.validate()?;
        Ok(parameters)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.cv_limit.is_finite() {
            return Err(TreeError::Configuration(format!(
                "cv_limit must be a finite number, got {}",
                self.cv_limit
            )));
        }

        // f64 formatting and power-of-ten rounding both stop being exact well before this
        if self.cv_decimal_places > 15 || self.average_decimal_places > 15 {
            return Err(TreeError::Configuration(
                "decimal places must not exceed 15".to_string(),
            ));
        }

        Ok(())
    }
}

/// Rounds half away from zero to `places` decimals.
pub fn round_to(value: f64, places: u32) -> f64 {
    let factor = 10f64.powi(places as i32);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let parameters = TrainingParameters::default();
        assert_eq!(parameters.cv_limit, 10.0);
        assert_eq!(parameters.total_count_limit, 1);
        assert_eq!(parameters.cv_decimal_places, 5);
        assert_eq!(parameters.average_decimal_places, 2);
        assert_eq!(parameters.max_depth, 15);
        assert_eq!(parameters.max_features, 8);
        assert!(!parameters.debug_messages);
    }

    #[test]
    fn test_partial_overrides_merge_over_defaults() {
        let parameters =
            TrainingParameters::from_json_overrides(r#"{"maxDepth": 3, "cv_limit": 2.5, "debugMessages": true}"#)
                .unwrap();

        assert_eq!(parameters.max_depth, 3);
        assert_eq!(parameters.cv_limit, 2.5);
        assert!(parameters.debug_messages);
        assert_eq!(parameters.max_features, 8);
        assert_eq!(parameters.average_decimal_places, 2);
    }

    #[test]
    fn test_serialized_keys() {
        let json = serde_json::to_value(TrainingParameters::default()).unwrap();
        let object = json.as_object().unwrap();
        for key in [
            "cv_limit",
            "total_count_limit",
            "cv_decimal_places",
            "average_decimal_places",
            "maxDepth",
            "maxFeatures",
            "debugMessages",
        ] {
            assert!(object.contains_key(key), "missing key {key}");
        }
    }

    #[test]
    fn test_rejects_excessive_decimal_places() {
        let result = TrainingParameters::from_json_overrides(r#"{"cv_decimal_places": 40}"#);
        assert!(matches!(result, Err(TreeError::Configuration(_))));
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(12.3456, 2), 12.35);
        assert_eq!(round_to(-1.005, 0), -1.0);
        assert_eq!(round_to(7.0, 5), 7.0);
    }
}
