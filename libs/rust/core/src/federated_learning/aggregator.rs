//! FedAvg over one cycle's node results.
//!
//! Accuracy is weighted by each node's sample count; parameters are the element-wise
//! mean of every successful result that matches the cycle's majority shape. Both are
//! pure so they can be driven directly from tests.

use super::model::{ModelParameters, NodeResult, ParameterShape};

/// Sample-weighted mean accuracy of the successful results, rounded to 3 decimals.
/// Returns exactly `0.0` when no weight is present.
pub fn aggregate_accuracy(results: &[NodeResult]) -> f64 {
    // weights summed as f64: node-reported sample counts can exceed u64 when added
    let (weighted, total) = results
        .iter()
        .filter_map(NodeResult::update)
        .fold((0.0f64, 0.0f64), |(acc, n), u| {
            let w = u.sample_count as f64;
            (acc + u.accuracy * w, n + w)
        });
    if total <= 0.0 {
        return 0.0;
    }
    round3((weighted / total).clamp(0.0, 1.0))
}

fn round3(v: f64) -> f64 { (v * 1000.0).round() / 1000.0 }

/// Most common parameter shape among successful results. Ties go to the shape seen first.
pub fn majority_shape(results: &[NodeResult]) -> Option<ParameterShape> {
    let mut counts: Vec<(ParameterShape, usize)> = Vec::new();
    for shape in results.iter().filter_map(NodeResult::update).filter_map(|u| u.parameters.shape()) {
        match counts.iter_mut().find(|(s, _)| *s == shape) {
            Some((_, n)) => *n += 1,
            None => counts.push((shape, 1)),
        }
    }
    counts
        .into_iter()
        .fold(None, |best: Option<(ParameterShape, usize)>, (shape, n)| match best {
            Some((_, best_n)) if best_n >= n => best,
            _ => Some((shape, n)),
        })
        .map(|(shape, _)| shape)
}

/// Indices of successful results left out of the parameter mean.
pub fn shape_outliers(results: &[NodeResult]) -> Vec<usize> {
    let majority = majority_shape(results);
    results
        .iter()
        .enumerate()
        .filter_map(|(i, r)| r.update().map(|u| (i, u.parameters.shape())))
        .filter(|(_, shape)| shape.is_none() || *shape != majority)
        .map(|(i, _)| i)
        .collect()
}

pub fn aggregate_parameters(results: &[NodeResult]) -> Option<ModelParameters> {
    let shape = majority_shape(results)?;
    let members: Vec<&ModelParameters> = results
        .iter()
        .filter_map(NodeResult::update)
        .map(|u| &u.parameters)
        .filter(|p| p.shape() == Some(shape))
        .collect();
    if members.is_empty() {
        return None;
    }

    let mut coefficients = vec![vec![0.0f64; shape.cols]; shape.rows];
    let mut intercepts = vec![0.0f64; shape.intercepts];
    for p in &members {
        for (acc_row, row) in coefficients.iter_mut().zip(&p.coefficients) {
            for (acc, v) in acc_row.iter_mut().zip(row) { *acc += v; }
        }
        for (acc, v) in intercepts.iter_mut().zip(&p.intercepts) { *acc += v; }
    }
    let n = members.len() as f64;
    coefficients.iter_mut().flatten().chain(intercepts.iter_mut()).for_each(|v| *v /= n);
    Some(ModelParameters { coefficients, intercepts })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::federated_learning::model::{LocalUpdate, NodeErrorKind};

    fn ok(name: &str, accuracy: f64, samples: u64, coef: Vec<f64>, intercept: f64) -> NodeResult {
        NodeResult::trained(name, LocalUpdate { accuracy, sample_count: samples, parameters: ModelParameters::new(vec![coef], vec![intercept]), hospital: None })
    }

    fn close(a: f64, b: f64) -> bool { (a - b).abs() < 1e-9 }

    #[test]
    fn equal_weights_average_accuracy() {
        let results = vec![ok("A", 0.9, 100, vec![0.0], 0.0), ok("B", 0.5, 100, vec![0.0], 0.0)];
        assert_eq!(aggregate_accuracy(&results), 0.7);
    }

    #[test]
    fn sample_count_weights_accuracy() {
        let results = vec![ok("A", 0.9, 300, vec![0.0], 0.0), ok("B", 0.3, 100, vec![0.0], 0.0)];
        assert_eq!(aggregate_accuracy(&results), 0.75);
    }

    #[test]
    fn failures_are_ignored_and_no_success_yields_zero() {
        let results = vec![ok("A", 0.8, 50, vec![0.0], 0.0), NodeResult::failed("B", NodeErrorKind::Timeout, "t")];
        assert_eq!(aggregate_accuracy(&results), 0.8);
        let none = vec![NodeResult::failed("A", NodeErrorKind::Unreachable, "x"), NodeResult::failed("B", NodeErrorKind::InvalidResponse, "y")];
        assert_eq!(aggregate_accuracy(&none), 0.0);
        assert_eq!(aggregate_accuracy(&[]), 0.0);
        assert_eq!(aggregate_parameters(&none), None);
    }

    #[test]
    fn huge_sample_counts_do_not_overflow() {
        let results = vec![ok("A", 0.9, u64::MAX, vec![0.0], 0.0), ok("B", 0.5, 2, vec![0.0], 0.0)];
        assert_eq!(aggregate_accuracy(&results), 0.9);
        let both = vec![ok("A", 0.9, u64::MAX, vec![0.0], 0.0), ok("B", 0.5, u64::MAX, vec![0.0], 0.0)];
        assert_eq!(aggregate_accuracy(&both), 0.7);
    }

    #[test]
    fn accuracy_stays_in_unit_interval() {
        let cases = [(0.0, 1), (1.0, 7), (0.333, 13), (0.999, 10_000), (0.001, 3)];
        for window in cases.windows(2) {
            let results: Vec<NodeResult> = window.iter().enumerate().map(|(i, (a, n))| ok(&format!("n{i}"), *a, *n, vec![0.0], 0.0)).collect();
            let acc = aggregate_accuracy(&results);
            assert!((0.0..=1.0).contains(&acc), "{acc} out of range");
        }
    }

    #[test]
    fn parameters_are_element_wise_mean() {
        let results = vec![ok("A", 0.9, 10, vec![0.2, 0.4, 0.6], 0.1), ok("B", 0.5, 990, vec![0.4, 0.6, 0.8], 0.3)];
        let p = aggregate_parameters(&results).expect("aggregate");
        let expected = [0.3, 0.5, 0.7];
        assert_eq!(p.coefficients.len(), 1);
        for (got, want) in p.coefficients[0].iter().zip(expected) { assert!(close(*got, want), "{got} != {want}"); }
        assert!(close(p.intercepts[0], 0.2));
    }

    #[test]
    fn minority_shapes_are_excluded() {
        let results = vec![
            ok("A", 0.9, 10, vec![1.0, 1.0], 0.0),
            ok("B", 0.9, 10, vec![3.0, 3.0], 0.0),
            ok("C", 0.9, 10, vec![100.0, 100.0, 100.0], 0.0),
        ];
        assert_eq!(majority_shape(&results), Some(ParameterShape { rows: 1, cols: 2, intercepts: 1 }));
        assert_eq!(shape_outliers(&results), vec![2]);
        let p = aggregate_parameters(&results).unwrap();
        assert_eq!(p.coefficients, vec![vec![2.0, 2.0]]);
    }

    #[test]
    fn shape_tie_keeps_first_seen() {
        let results = vec![ok("A", 0.9, 10, vec![1.0], 0.0), ok("B", 0.9, 10, vec![3.0, 3.0], 0.0)];
        assert_eq!(majority_shape(&results).map(|s| s.cols), Some(1));
        assert_eq!(shape_outliers(&results), vec![1]);
    }

    #[test]
    fn aggregation_is_deterministic() {
        let results = vec![ok("A", 0.61, 17, vec![0.11, -0.7], 0.05), ok("B", 0.77, 23, vec![0.31, 0.2], -0.4)];
        assert_eq!(aggregate_parameters(&results), aggregate_parameters(&results));
        assert_eq!(aggregate_accuracy(&results), aggregate_accuracy(&results));
    }
}
