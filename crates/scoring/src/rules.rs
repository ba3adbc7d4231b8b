//! Ordered classification tables.
//!
//! A table holds safety `overrides`, ordinary `rules` and a `fallback`.
//! Overrides always run first so a narrower rule can never shadow them;
//! within each list the first satisfied predicate wins. Order is part of the
//! contract.

pub struct Rule<C, L> {
    pub name: &'static str,
    pub when: fn(&C) -> bool,
    pub then: L,
}

pub struct RuleTable<C: 'static, L: 'static> {
    pub overrides: &'static [Rule<C, L>],
    pub rules: &'static [Rule<C, L>],
    pub fallback: L,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Override,
    /// Position of the winning rule in `rules`.
    Rule(usize),
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict<L> {
    pub outcome: L,
    pub rule: &'static str,
    pub kind: MatchKind,
}

pub const FALLBACK_RULE: &str = "fallback";

impl<C: 'static, L: Copy + 'static> RuleTable<C, L> {
    pub fn evaluate(&self, ctx: &C) -> Verdict<L> {
        if let Some(rule) = self.overrides.iter().find(|rule| (rule.when)(ctx)) {
            return Verdict {
                outcome: rule.then,
                rule: rule.name,
                kind: MatchKind::Override,
            };
        }

        if let Some((index, rule)) = self
            .rules
            .iter()
            .enumerate()
            .find(|(_, rule)| (rule.when)(ctx))
        {
            return Verdict {
                outcome: rule.then,
                rule: rule.name,
                kind: MatchKind::Rule(index),
            };
        }

        Verdict {
            outcome: self.fallback,
            rule: FALLBACK_RULE,
            kind: MatchKind::Fallback,
        }
    }
}

/// Maps `value` to the first band whose inclusive upper bound covers it;
/// anything above every bound lands in `top`.
pub fn bucket<B: Copy>(value: u8, bounds: &[(u8, B)], top: B) -> B {
    bounds
        .iter()
        .find(|(upper, _)| value <= *upper)
        .map_or(top, |(_, band)| *band)
}

/// Counts the satisfied indicators.
pub fn count_indicators(indicators: &[bool]) -> u8 {
    indicators.iter().filter(|hit| **hit).count() as u8
}
