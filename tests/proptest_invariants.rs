use std::collections::HashSet;

use matchlift::forecast::{forecast_counterfactual, ForecastConfig};
use matchlift::incrementality::{estimate_incrementality, IncrementalityOptions};
use matchlift::pairing::{pair, PairingRequest, SplitPolicy};
use matchlift::power::matched_pairs_power;
use matchlift::similarity::{similarity, SimilarityMatrix};
use matchlift::tiering::assign_tiers;
use matchlift::types::{
    CounterfactualPoint, CounterfactualResult, FeatureBatch, FeatureVector, ModelFit,
    ScoredMarket, TimeSeries,
};
use matchlift::EngineError;
use proptest::prelude::*;
use proptest::test_runner::Config as ProptestConfig;

const MIN_PROPTEST_CASES: u32 = 128;

fn proptest_cases() -> u32 {
    std::env::var("PROPTEST_CASES")
        .ok()
        .and_then(|raw| raw.parse::<u32>().ok())
        .map(|parsed| parsed.max(MIN_PROPTEST_CASES))
        .unwrap_or(MIN_PROPTEST_CASES)
}

fn batch_from(rows: &[Vec<f64>]) -> FeatureBatch {
    let d = rows.first().map_or(0, Vec::len);
    FeatureBatch {
        features: (0..d).map(|k| format!("f{k}")).collect(),
        vectors: rows
            .iter()
            .enumerate()
            .map(|(i, values)| FeatureVector {
                market_id: format!("M{i}"),
                values: values.clone(),
            })
            .collect(),
        stats: Vec::new(),
    }
}

/// `n` markets with `d` features each.
fn feature_rows() -> impl Strategy<Value = Vec<Vec<f64>>> {
    (2usize..12, 1usize..4).prop_flat_map(|(n, d)| {
        prop::collection::vec(prop::collection::vec(-5.0f64..5.0, d), n)
    })
}

fn best_total_by_brute_force(m: &SimilarityMatrix, tests: &[usize], controls: &[usize]) -> f64 {
    fn go(m: &SimilarityMatrix, tests: &[usize], controls: &[usize], used: &mut Vec<bool>) -> f64 {
        let Some((&t, rest)) = tests.split_first() else {
            return 0.0;
        };
        // leaving a test unmatched is allowed only when controls run out
        let mut best = if controls.len() < tests.len() {
            go(m, rest, controls, used)
        } else {
            f64::NEG_INFINITY
        };
        for (k, &c) in controls.iter().enumerate() {
            if used[k] {
                continue;
            }
            used[k] = true;
            best = best.max(m.at(t, c) + go(m, rest, controls, used));
            used[k] = false;
        }
        if best == f64::NEG_INFINITY {
            0.0
        } else {
            best
        }
    }
    go(m, tests, controls, &mut vec![false; controls.len()])
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: proptest_cases(),
        .. ProptestConfig::default()
    })]

    #[test]
    fn similarity_is_symmetric_with_unit_diagonal(rows in feature_rows()) {
        let m = similarity(&batch_from(&rows), None, None).expect("valid batch");
        for i in 0..m.len() {
            prop_assert_eq!(m.at(i, i), 1.0);
            for j in 0..m.len() {
                prop_assert_eq!(m.at(i, j), m.at(j, i));
                prop_assert!(m.at(i, j) > 0.0 && m.at(i, j) <= 1.0);
            }
        }
    }

    #[test]
    fn tiers_partition_the_input(
        scores in prop::collection::vec(-100.0f64..100.0, 0..40),
        tier_count in 1usize..7,
    ) {
        let scored: Vec<ScoredMarket> = scores
            .iter()
            .enumerate()
            .map(|(i, s)| ScoredMarket { market_id: format!("M{i}"), score: *s })
            .collect();
        let tiers = assign_tiers(&scored, tier_count).expect("valid input");

        let members: Vec<(u32, &str, f64)> = tiers
            .iter()
            .flat_map(|t| t.members.iter().map(move |m| (t.tier, m.market_id.as_str(), m.score)))
            .collect();
        prop_assert_eq!(members.len(), scored.len());
        let ids: HashSet<&str> = members.iter().map(|m| m.1).collect();
        prop_assert_eq!(ids.len(), scored.len());
        prop_assert!(tiers.len() <= tier_count);

        // higher score never lands in a worse tier
        for a in &members {
            for b in &members {
                if a.2 > b.2 {
                    prop_assert!(a.0 <= b.0);
                }
            }
        }
        for t in &tiers {
            let ranks: HashSet<u32> = t.members.iter().map(|m| m.rank).collect();
            prop_assert_eq!(ranks.len(), t.members.len());
        }
    }

    #[test]
    fn pairs_are_disjoint(
        rows in feature_rows(),
        halves in any::<bool>(),
    ) {
        let m = similarity(&batch_from(&rows), None, None).expect("valid batch");
        let request = PairingRequest {
            split: if halves { SplitPolicy::InputOrderHalves } else { SplitPolicy::GreedyMostSimilar },
            ..PairingRequest::default()
        };
        let pairs = pair(&m, &request).expect("at least two markets");

        let tests: HashSet<&str> = pairs.iter().map(|p| p.test_market.as_str()).collect();
        let controls: HashSet<&str> = pairs.iter().map(|p| p.control_market.as_str()).collect();
        prop_assert_eq!(tests.len(), pairs.len());
        prop_assert_eq!(controls.len(), pairs.len());
        prop_assert!(tests.is_disjoint(&controls));
        prop_assert_eq!(pairs.len(), m.len() / 2);
        for w in pairs.windows(2) {
            prop_assert!(w[0].similarity >= w[1].similarity);
        }
    }

    #[test]
    fn subset_pairs_respect_exclusions(
        rows in feature_rows(),
        roles in prop::collection::vec(0u8..3, 12),
    ) {
        let m = similarity(&batch_from(&rows), None, None).expect("valid batch");
        let ids = m.markets().to_vec();
        // 0 = test, 1 = excluded, 2 = control candidate
        let pick = |role: u8| -> Vec<String> {
            ids.iter().zip(&roles).filter(|(_, r)| **r == role).map(|(id, _)| id.clone()).collect()
        };
        let (tests, excluded, others) = (pick(0), pick(1), pick(2));
        let request = PairingRequest {
            test_markets: Some(tests.clone()),
            exclude: excluded.clone(),
            ..PairingRequest::default()
        };

        match pair(&m, &request) {
            Ok(pairs) => {
                let test_set: HashSet<&str> = pairs.iter().map(|p| p.test_market.as_str()).collect();
                let control_set: HashSet<&str> = pairs.iter().map(|p| p.control_market.as_str()).collect();
                prop_assert_eq!(test_set.len(), pairs.len());
                prop_assert_eq!(control_set.len(), pairs.len());
                prop_assert!(test_set.is_disjoint(&control_set));
                prop_assert!(test_set.iter().all(|t| tests.iter().any(|x| x.as_str() == *t)));
                prop_assert!(control_set.iter().all(|c| others.iter().any(|x| x.as_str() == *c)));
                prop_assert_eq!(pairs.len(), tests.len().min(others.len()));
            }
            Err(_) => prop_assert!(
                tests.is_empty() || others.is_empty() || tests.len() + others.len() < 2
            ),
        }
    }

    #[test]
    fn explicit_subset_matching_is_optimal(
        rows in (4usize..9, 1usize..3).prop_flat_map(|(n, d)| {
            prop::collection::vec(prop::collection::vec(-5.0f64..5.0, d), n)
        }),
        n_tests in 1usize..4,
    ) {
        let m = similarity(&batch_from(&rows), None, None).expect("valid batch");
        let n_tests = n_tests.min(m.len() - 1);
        let test_ids: Vec<String> = m.markets()[..n_tests].to_vec();
        let request = PairingRequest {
            test_markets: Some(test_ids),
            ..PairingRequest::default()
        };
        let pairs = pair(&m, &request).expect("controls remain");
        let total: f64 = pairs.iter().map(|p| p.similarity).sum();

        let tests: Vec<usize> = (0..n_tests).collect();
        let controls: Vec<usize> = (n_tests..m.len()).collect();
        let best = best_total_by_brute_force(&m, &tests, &controls);
        prop_assert!((total - best).abs() < 1e-9, "total={} best={}", total, best);
    }

    #[test]
    fn counterfactual_matches_test_periods(
        control in prop::collection::vec(0.0f64..100.0, 10..40),
        noise in prop::collection::vec(-1.0f64..1.0, 40),
        start in -50i64..50,
    ) {
        let n = control.len();
        let test = TimeSeries::from_pairs(
            "T",
            (0..n).map(|i| (start + i as i64, 3.0 + 0.8 * control[i] + noise[i])),
        ).expect("valid");
        let control = TimeSeries::from_pairs(
            "C",
            control.iter().enumerate().map(|(i, v)| (start + i as i64, *v)),
        ).expect("valid");

        match forecast_counterfactual(&test, &control, &ForecastConfig::default()) {
            Ok(result) => {
                let periods: Vec<i64> = result.points.iter().map(|p| p.period).collect();
                prop_assert_eq!(periods, test.periods().collect::<Vec<_>>());
                let horizon = result.forecast_points().count();
                prop_assert_eq!(horizon, (n / 4).max(1));
                prop_assert!(result.points[n - horizon..].iter().all(|p| p.is_forecast));
            }
            Err(EngineError::InsufficientHistory(_)) => prop_assert!(n - (n / 4).max(1) < 8),
            Err(EngineError::InsufficientData(_)) => {}
            Err(other) => prop_assert!(false, "unexpected error {}", other),
        }
    }

    #[test]
    fn identical_counterfactual_has_zero_lift(
        values in prop::collection::vec(1.0f64..1000.0, 1..30),
    ) {
        let result = CounterfactualResult {
            test_market: "T".to_string(),
            control_market: "C".to_string(),
            horizon: values.len(),
            points: values
                .iter()
                .enumerate()
                .map(|(i, v)| CounterfactualPoint {
                    period: i as i64,
                    actual: *v,
                    predicted: *v,
                    is_forecast: true,
                })
                .collect(),
            model: ModelFit {
                intercept: 0.0,
                control_coef: 1.0,
                trend_coef: None,
                ar_coef: None,
                r_squared: None,
                training_periods: 0,
            },
        };
        let report = estimate_incrementality(&result, &IncrementalityOptions::default())
            .expect("forecast periods present");
        prop_assert_eq!(report.absolute_lift, 0.0);
        prop_assert_eq!(report.percent_lift, Some(0.0));
    }

    #[test]
    fn matched_pairs_power_is_monotone(
        n in 2u64..500,
        extra in 1u64..200,
        effect in 0.01f64..3.0,
        bump in 0.0f64..2.0,
        variance in 0.1f64..10.0,
        rho in -0.9f64..0.9,
    ) {
        let power = |n, effect| {
            matched_pairs_power(n, variance, rho, 0.05, Some(effect))
                .expect("valid inputs")
                .power
                .expect("effect supplied")
        };
        prop_assert!(power(n + extra, effect) >= power(n, effect));
        prop_assert!(power(n, effect + bump) >= power(n, effect));
    }
}

#[test]
fn near_duplicate_markets_pair_together() {
    let rows = vec![
        vec![0.0, 0.0],
        vec![0.0, 0.1],
        vec![5.0, 5.0],
        vec![5.0, 5.1],
    ];
    let mut batch = batch_from(&rows);
    for (v, id) in batch.vectors.iter_mut().zip(["A", "B", "C", "D"]) {
        v.market_id = id.to_string();
    }
    let m = similarity(&batch, None, None).expect("valid batch");
    assert!(m.get("A", "B").expect("present") > m.get("A", "C").expect("present"));

    let pairs = pair(&m, &PairingRequest::default()).expect("four markets");
    let mut matched: Vec<(String, String)> = pairs
        .iter()
        .map(|p| {
            let mut ends = [p.test_market.clone(), p.control_market.clone()];
            ends.sort();
            (ends[0].clone(), ends[1].clone())
        })
        .collect();
    matched.sort();
    assert_eq!(
        matched,
        vec![
            ("A".to_string(), "B".to_string()),
            ("C".to_string(), "D".to_string())
        ]
    );
    assert!(pairs.iter().all(|p| (p.similarity - 1.0 / 1.1).abs() < 1e-12));
}
