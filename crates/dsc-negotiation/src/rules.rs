//! Rule validation and rule-set comparison.
//!
//! Two rule lists are equivalent when they contain the same rules,
//! regardless of order, duplicates, rule identifiers or titles. A rule is
//! identified by its normalized target, its kind, its action and its set
//! of constraints. Equivalence is exact: an agreement that narrows or
//! widens the requested rules does not match.

use std::collections::{BTreeMap, BTreeSet};

use dsc_types::{normalize_uri, Action, Constraint, Rule, RuleKind};

use crate::error::NegotiationError;

/// The comparison key of a single rule.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct RuleKey {
    pub target: String,
    pub kind: RuleKind,
    pub action: Action,
    pub constraints: BTreeSet<Constraint>,
}

impl RuleKey {
    /// Builds the key of `rule`, or `None` if the rule names no target.
    pub fn of(rule: &Rule) -> Option<Self> {
        let target = rule.target.as_deref()?;
        Some(Self {
            target: normalize_uri(target),
            kind: rule.kind,
            action: rule.action,
            constraints: rule.constraints.iter().cloned().collect(),
        })
    }
}

/// Returns the key set of `rules`, skipping rules without a target.
pub fn rule_set(rules: &[Rule]) -> BTreeSet<RuleKey> {
    rules.iter().filter_map(RuleKey::of).collect()
}

/// Returns `true` if both rule lists are equivalent.
pub fn rules_match(a: &[Rule], b: &[Rule]) -> bool {
    rule_set(a) == rule_set(b)
}

/// Checks that a requested rule list is usable for negotiation.
///
/// # Errors
///
/// Returns `NegotiationError::MissingRules` if `rules` is empty, or
/// `NegotiationError::MissingTargetInRule` for the first rule whose
/// target is absent or blank.
pub fn validate_rules(rules: &[Rule]) -> Result<(), NegotiationError> {
    if rules.is_empty() {
        return Err(NegotiationError::MissingRules);
    }
    for (index, rule) in rules.iter().enumerate() {
        if rule.target.as_deref().map_or(true, |t| t.trim().is_empty()) {
            return Err(NegotiationError::MissingTargetInRule { index });
        }
    }
    Ok(())
}

/// Groups rules by their normalized target, preserving request order
/// within each group. Rules without a target are dropped.
pub fn rules_by_target(rules: &[Rule]) -> BTreeMap<String, Vec<Rule>> {
    let mut map: BTreeMap<String, Vec<Rule>> = BTreeMap::new();
    for rule in rules {
        if let Some(target) = rule.target.as_deref() {
            map.entry(normalize_uri(target))
                .or_default()
                .push(rule.clone());
        }
    }
    map
}

/// Binds every untargeted rule of an offer to `target`.
///
/// Offers stored for a resource may leave the target open, in which case
/// the rule applies to each artifact of that resource.
pub fn bind_offer_rules(rules: &[Rule], target: &str) -> Vec<Rule> {
    rules
        .iter()
        .map(|rule| {
            let mut rule = rule.clone();
            if rule.target.is_none() {
                rule.target = Some(target.to_string());
            }
            rule
        })
        .filter(|rule| {
            rule.target
                .as_deref()
                .is_some_and(|t| normalize_uri(t) == normalize_uri(target))
        })
        .collect()
}
