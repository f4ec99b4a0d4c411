use log::debug;

use super::{
    cancel::CancelSignal,
    context::PartitionContext,
    error::{Result, TreeError},
    providers::traits::{ColumnReduction, StatsProvider},
    query,
};
use crate::configuration::QueryPolicy;

/// The first `max_features` remaining columns, in their declared order.
pub fn candidate_columns(remaining_columns: &[String], max_features: usize) -> Result<&[String]> {
    let take = remaining_columns.len().min(max_features);
    if take == 0 {
        return Err(TreeError::Configuration(format!(
            "no split candidates (max features {}, {} remaining columns)",
            max_features,
            remaining_columns.len()
        )));
    }

    Ok(&remaining_columns[..take])
}

/// Picks the candidate with the largest reduction. Candidates are walked in
/// declared order and only a strictly larger reduction replaces the current
/// pick, so ties go to the earlier column whatever order the provider used.
pub fn choose(candidates: &[String], ranked: &[ColumnReduction]) -> Result<ColumnReduction> {
    let mut best: Option<ColumnReduction> = None;

    for candidate in candidates {
        let Some(reduction) = ranked
            .iter()
            .find(|r| &r.column == candidate)
            .map(|r| r.reduction)
        else {
            continue;
        };

        if reduction.is_nan() {
            continue;
        }

        match &best {
            Some(current) if reduction <= current.reduction => {}
            _ => {
                best = Some(ColumnReduction {
                    column: candidate.clone(),
                    reduction,
                })
            }
        }
    }

    best.ok_or_else(|| {
        TreeError::Validation(format!(
            "provider returned no usable reduction for candidates {:?}",
            candidates
        ))
    })
}

/// Ranks the node's candidate columns through the provider and returns the
/// chosen split.
pub async fn select_split<P: StatsProvider>(
    provider: &P,
    context: &PartitionContext,
    prior_stddev: f64,
    policy: &QueryPolicy,
    cancel: &CancelSignal,
) -> Result<ColumnReduction> {
    let candidates = candidate_columns(&context.remaining_columns, context.parameters.max_features)?;

    let table = &*context.table_name;
    let filter = &context.filter;
    let bindings = context.bindings.as_slice();
    let target = &*context.target;

    let ranked = query::guarded(policy, cancel, "column_variance_reduction", move || {
        provider.column_variance_reduction(table, filter, bindings, target, candidates, prior_stddev)
    })
    .await?;

    let chosen = choose(candidates, &ranked)?;
    debug!(
        "Selected next column: {} (reduction {:.5}) at depth {}",
        chosen.column, chosen.reduction, context.depth
    );

    Ok(chosen)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{
        parameters::TrainingParameters,
        providers::mock::{Call, ScriptedStatsProvider},
    };

    fn columns(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn reduction(column: &str, reduction: f64) -> ColumnReduction {
        ColumnReduction { column: column.to_string(), reduction }
    }

    #[test]
    fn test_candidates_are_a_fixed_prefix() {
        let remaining = columns(&["a", "b", "c"]);
        assert_eq!(candidate_columns(&remaining, 2).unwrap(), &columns(&["a", "b"])[..]);
        assert_eq!(candidate_columns(&remaining, 10).unwrap(), &remaining[..]);
        assert!(matches!(candidate_columns(&remaining, 0), Err(TreeError::Configuration(_))));
        assert!(matches!(candidate_columns(&[], 3), Err(TreeError::Configuration(_))));
    }

    #[test]
    fn test_choose_breaks_ties_by_declared_order() {
        let candidates = columns(&["b", "a", "c"]);
        // Provider lists "a" first, but "b" is declared first
        let ranked = vec![reduction("a", 4.0), reduction("b", 4.0), reduction("c", 1.0)];
        assert_eq!(choose(&candidates, &ranked).unwrap().column, "b");
    }

    #[test]
    fn test_choose_ignores_non_candidates_and_nan() {
        let candidates = columns(&["a", "b"]);
        let ranked = vec![
            reduction("c", 5.0),
            reduction("b", f64::NAN),
            reduction("a", 3.0),
        ];
        assert_eq!(choose(&candidates, &ranked).unwrap(), reduction("a", 3.0));

        let unusable = vec![reduction("c", 5.0)];
        assert!(matches!(choose(&candidates, &unusable), Err(TreeError::Validation(_))));
    }

    #[tokio::test]
    async fn test_max_features_restricts_selection() {
        let provider = ScriptedStatsProvider::new();
        provider.set_reduction("C", 5.0);
        provider.set_reduction("A", 3.0);
        provider.set_reduction("B", 1.0);

        let parameters = TrainingParameters { max_features: 2, ..Default::default() };
        let context = PartitionContext::root("t", "y", &columns(&["A", "B", "C"]), parameters).unwrap();

        let chosen = select_split(
            &provider,
            &context,
            2.0,
            &QueryPolicy::default(),
            &CancelSignal::new(),
        )
        .await
        .unwrap();

        assert_eq!(chosen.column, "A");
        assert_eq!(
            provider.calls(),
            vec![Call::Reduction { bindings: vec![], candidates: columns(&["A", "B"]) }]
        );
    }
}
