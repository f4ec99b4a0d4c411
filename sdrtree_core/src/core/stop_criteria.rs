use super::{
    error::{Result, TreeError},
    node::StopReason,
    parameters::{TrainingParameters, round_to},
    providers::traits::NodeStats,
};

#[derive(Debug, Clone, PartialEq)]
pub enum StopDecision {
    /// No rows reach this node; the parent drops it.
    Prune,
    Leaf { prediction: f64, reason: StopReason },
    Split {
        prediction: f64,
        coefficient_of_variation: f64,
        /// CoV formatted to `cv_decimal_places`, as reported in debug output.
        coefficient_text: String,
    },
}

/// `stddev / mean * 100`, zero for a zero mean.
pub fn coefficient_of_variation(mean: f64, stddev: f64) -> f64 {
    if mean == 0.0 { 0.0 } else { stddev / mean * 100.0 }
}

/// Decides whether a node stops. Checks run in a fixed order and the first
/// hit wins: empty partition, depth, exhausted columns, row count, CoV.
pub fn evaluate(
    stats: &NodeStats,
    depth: u32,
    remaining_columns: &[String],
    parameters: &TrainingParameters,
) -> StopDecision {
    let Some(mean) = stats.mean else {
        return StopDecision::Prune;
    };

    let prediction = round_to(mean, parameters.average_decimal_places);

    if depth >= parameters.max_depth {
        return StopDecision::Leaf {
            prediction,
            reason: StopReason::MaxDepthReached {
                limit: parameters.max_depth,
                value: depth,
            },
        };
    }

    if remaining_columns.is_empty() {
        return StopDecision::Leaf {
            prediction,
            reason: StopReason::LastAttribute,
        };
    }

    if stats.count <= 1 || stats.count <= parameters.total_count_limit {
        return StopDecision::Leaf {
            prediction,
            reason: StopReason::BelowChildRecordCountLimit {
                limit: parameters.total_count_limit,
                value: stats.count,
            },
        };
    }

    let places = parameters.cv_decimal_places;
    let cov = round_to(
        coefficient_of_variation(mean, stats.stddev.unwrap_or(0.0)),
        places,
    );
    let coefficient_text = format!("{:.*}", places as usize, cov);

    if cov < parameters.cv_limit {
        return StopDecision::Leaf {
            prediction,
            reason: StopReason::BelowCvThreshold {
                limit: parameters.cv_limit,
                value: coefficient_text,
            },
        };
    }

    StopDecision::Split {
        prediction,
        coefficient_of_variation: cov,
        coefficient_text,
    }
}

/// Last line of defence before splitting. The checks above should already have
/// turned these partitions into leaves, so hitting one means the provider
/// broke its contract and the build cannot be trusted.
pub fn validate_split_stage(stats: &NodeStats) -> Result<f64> {
    if stats.count == 0 {
        return Err(TreeError::Validation(
            "the number of records reaching the split stage was zero".to_string(),
        ));
    }

    match stats.stddev {
        Some(stddev) if stddev != 0.0 && stddev.is_finite() => Ok(stddev),
        _ => Err(TreeError::Validation(format!(
            "the standard deviation reaching the split stage was {:?} over {} records",
            stats.stddev, stats.count
        ))),
    }
}
