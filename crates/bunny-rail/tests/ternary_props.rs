//! Property tests for the ternary rule generator.
//!
//! Tests cover:
//! - Every input matches exactly one rule
//! - The matching rule's class contains the input
//! - Rule counts stay within the table budget
//! - Function entries installed on the agent evaluate like the rule set

use bunny_rail::codec::{FunctionEntry, Selector};
use bunny_rail::ternary::{self, prefixes, TernaryRule};
use bunny_rail::{Command, TableStore};
use proptest::prelude::*;

fn sum_bounds(lo: i64, hi: i64) -> i64 {
    lo.wrapping_add(hi)
}

fn rules_for(precision: u32) -> Vec<TernaryRule> {
    ternary::encode(sum_bounds, precision).unwrap()
}

proptest! {
    #[test]
    fn every_input_matches_once(precision in 0u32..=6, input in any::<i64>()) {
        let rules = rules_for(precision);
        let hits = rules.iter().filter(|r| r.matches(input)).count();
        prop_assert_eq!(hits, 1);
    }

    #[test]
    fn small_inputs_match_once(precision in 0u32..=6, input in -4096i64..4096) {
        let rules = rules_for(precision);
        prop_assert_eq!(rules.iter().filter(|r| r.matches(input)).count(), 1);
    }

    #[test]
    fn matching_class_contains_input(precision in 0u32..=6, input in any::<i64>()) {
        let prefix = prefixes(precision)
            .unwrap()
            .find(|p| (input as u64) & p.mask() == p.bits)
            .unwrap();
        let (min, max) = prefix.range();
        prop_assert!(min <= input && input <= max);
        prop_assert_eq!(ternary::lookup(&rules_for(precision), input), Some(sum_bounds(min, max)));
    }

    #[test]
    fn scaled_output_tracks_input(c in -8.0f64..8.0, input in -1_000_000i64..1_000_000) {
        // With 6 significant bits a class spans less than 1/32 of its magnitude.
        let rules = ternary::encode(ternary::multiplicator(c), 6).unwrap();
        let out = ternary::lookup(&rules, input).unwrap() as f64;
        let exact = c * input as f64;
        prop_assert!((out - exact).abs() <= (exact.abs() / 16.0).max(c.abs() * 2.0) + 1.0);
    }
}

#[test]
fn rule_count_budget() {
    for precision in 1..=10 {
        let count = ternary::rule_count(precision).unwrap();
        assert!(count <= 2 * 62 * (1 << precision));
        assert_eq!(prefixes(precision).unwrap().count() as u64, count);
    }
}

#[test]
fn installed_tables_evaluate_like_rules() {
    let weights = ternary::FunctionWeights {
        actual: 1.0,
        target: -2.0,
        difference: 0.25,
    };
    let mut store = TableStore::new();
    for command in ternary::weighting_commands(&weights, 3).unwrap() {
        store.apply(&command).unwrap();
    }

    let target = ternary::encode(ternary::multiplicator(-2.0), 3).unwrap();
    for input in [-1_000_000i64, -17, -1, 0, 1, 2, 99, 123_456_789] {
        assert_eq!(
            store.evaluate(Selector::TargetSpeed, input),
            ternary::lookup(&target, input)
        );
    }

    // Reinstalling replaces the tables instead of stacking them.
    store.apply(&Command::ClearFunctions).unwrap();
    assert!(store.function_rules(Selector::ActualSpeed).is_empty());
    let entry = FunctionEntry::from_rule(Selector::ActualSpeed, &target[0]);
    store.apply(&Command::AddFunctionEntry(entry)).unwrap();
    assert_eq!(store.function_rules(Selector::ActualSpeed), &target[..1]);
}
