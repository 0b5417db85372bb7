//! Ternary (value/mask) rule generation for table-based function approximation.
//!
//! The controller evaluates scaling functions with TCAM lookups keyed on a
//! 64-bit signed input. A table cannot hold one entry per input, so the
//! domain is split into prefix classes the way a float splits it into
//! exponent and mantissa:
//!
//! - the *sign run* (`k` copies of the sign bit, then the first bit that
//!   differs from it) plays the role of the exponent;
//! - the next `precision` bits are kept as the mantissa;
//! - everything below is wildcarded.
//!
//! ```text
//! positive:  0..0 1 mmmm ****...
//!            \_k_/  \p_/
//! negative:  1..1 0 mmmm ****...
//! near zero: 0...0 mmmm *        (63 - p sign bits, one wildcard bit)
//! ```
//!
//! Every class becomes one rule whose output is the target function
//! evaluated on the class' `[min, max]` range. The rule count is
//! `2 * (63 - precision) * 2^precision`, independent of the input range,
//! and the rules of one table match disjoint inputs that together cover all
//! 2^64 keys.

use crate::codec::{FunctionEntry, Selector};
use crate::command::Command;
use crate::error::{RailError, Result};

/// Largest supported number of significant bits.
pub const MAX_PRECISION: u32 = 62;

/// Precision used when installing the scaling tables.
pub const DEFAULT_PRECISION: u32 = 4;

/// One TCAM entry: inputs agreeing with `match_value` on the bits set in
/// `match_mask` produce `output`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TernaryRule {
    pub match_value: u64,
    pub match_mask: u64,
    pub output: i64,
}

impl TernaryRule {
    /// Whether `input` falls in this rule's class.
    #[inline]
    pub fn matches(&self, input: i64) -> bool {
        (input as u64) & self.match_mask == self.match_value & self.match_mask
    }
}

/// A left-aligned bit prefix of a 64-bit key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Prefix {
    /// Prefix bits, padded with zeros on the right.
    pub bits: u64,
    /// Number of significant leading bits.
    pub len: u32,
}

impl Prefix {
    fn new(pattern: u64, len: u32) -> Self {
        Self {
            bits: pattern << (64 - len),
            len,
        }
    }

    /// Mask with the first `len` bits set.
    pub fn mask(&self) -> u64 {
        u64::MAX.checked_shl(64 - self.len).unwrap_or(0)
    }

    /// Smallest and largest signed value carrying this prefix.
    pub fn range(&self) -> (i64, i64) {
        let zero_padded = self.bits as i64;
        let one_padded = (self.bits | !self.mask()) as i64;
        (zero_padded.min(one_padded), zero_padded.max(one_padded))
    }
}

fn check_precision(precision: u32) -> Result<()> {
    if precision > MAX_PRECISION {
        return Err(RailError::InvalidPrecision {
            precision,
            max: MAX_PRECISION,
        });
    }
    Ok(())
}

/// Number of rules `encode` emits for `precision`.
pub fn rule_count(precision: u32) -> Result<u64> {
    check_precision(precision)?;
    Ok(2 * (63 - precision as u64) * (1u64 << precision))
}

/// All prefix classes for `precision` significant bits.
pub fn prefixes(precision: u32) -> Result<impl Iterator<Item = Prefix>> {
    check_precision(precision)?;
    let p = precision;
    let mantissas = 1u64 << p;

    // Sign runs 1..=62-p leave room for the differing bit and the mantissa.
    let levels = move |negative: bool| {
        (1..=62 - p).flat_map(move |k| {
            (0..mantissas).map(move |m| {
                let run = if negative { ((1u64 << k) - 1) << (p + 1) } else { 1u64 << p };
                Prefix::new(run | m, k + 1 + p)
            })
        })
    };
    let near_zero = move |negative: bool| {
        (0..mantissas).map(move |m| {
            let run = if negative { ((1u64 << (63 - p)) - 1) << p } else { 0 };
            Prefix::new(run | m, 63)
        })
    };

    Ok(levels(false)
        .chain(near_zero(false))
        .chain(levels(true))
        .chain(near_zero(true)))
}

/// Approximate `f` with ternary rules.
///
/// `f` receives the inclusive `[min, max]` bounds of each prefix class.
pub fn encode<F>(f: F, precision: u32) -> Result<Vec<TernaryRule>>
where
    F: Fn(i64, i64) -> i64,
{
    let rules = prefixes(precision)?
        .map(|prefix| {
            let (min, max) = prefix.range();
            TernaryRule {
                match_value: prefix.bits,
                match_mask: prefix.mask(),
                output: f(min, max),
            }
        })
        .collect();
    Ok(rules)
}

/// Output of the first rule matching `input`.
pub fn lookup(rules: &[TernaryRule], input: i64) -> Option<i64> {
    rules.iter().find(|r| r.matches(input)).map(|r| r.output)
}

/// Linear scaling `x -> round(c * x)` evaluated at the class minimum.
///
/// The product wraps to 64 bits like the controller's register arithmetic.
pub fn multiplicator(c: f64) -> impl Fn(i64, i64) -> i64 {
    move |lo, hi| {
        let scaled = (c * lo.min(hi) as f64).round();
        (scaled as i128) as i64
    }
}

/// Scaling constants for the three function tables.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FunctionWeights {
    pub actual: f64,
    pub target: f64,
    pub difference: f64,
}

impl FunctionWeights {
    pub fn weight(&self, selector: Selector) -> f64 {
        match selector {
            Selector::ActualSpeed => self.actual,
            Selector::TargetSpeed => self.target,
            Selector::PositionDifference => self.difference,
        }
    }
}

/// Commands replacing all three scaling tables.
///
/// The tables are cleared first so no partial rule set from an earlier
/// upload stays visible next to the new one.
pub fn weighting_commands(weights: &FunctionWeights, precision: u32) -> Result<Vec<Command>> {
    let mut commands = vec![Command::ClearFunctions];
    for selector in Selector::ALL {
        let rules = encode(multiplicator(weights.weight(selector)), precision)?;
        commands.extend(
            rules
                .iter()
                .map(|rule| Command::AddFunctionEntry(FunctionEntry::from_rule(selector, rule))),
        );
    }
    Ok(commands)
}
