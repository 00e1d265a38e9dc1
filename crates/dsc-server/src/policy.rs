//! Usage decisions for artifact delivery.
//!
//! The transfer pipeline asks a [`PolicyDecision`] about every rule the
//! agreement holds for the requested artifact. Delivery needs at least one
//! permission and no denial. [`RuleEvaluator`] is the built-in decision
//! point; deployments with a dedicated usage-control engine plug it in
//! behind the same trait.

use chrono::{DateTime, Utc};
use dsc_types::{uris_equal, Action, Constraint, Operator, Rule, RuleKind};

/// Result of evaluating one rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyOutcome {
    Permit,
    /// Denied; the text is for the local log only.
    Deny(String),
}

/// What a rule is evaluated against.
#[derive(Debug, Clone, Copy)]
pub struct PolicyContext<'a> {
    /// Connector asking for the data.
    pub consumer: &'a str,
    pub artifact: &'a str,
    pub agreement: &'a str,
    pub now: DateTime<Utc>,
}

/// A yes/no usage decision for one rule.
pub trait PolicyDecision: Send + Sync {
    fn evaluate(&self, rule: &Rule, context: &PolicyContext<'_>) -> PolicyOutcome;
}

/// Constraint operand naming the evaluation instant.
pub const EVALUATION_TIME: &str = "POLICY_EVALUATION_TIME";

/// Constraint operand naming the consuming connector.
pub const CONNECTOR: &str = "CONNECTOR";

/// Built-in rule evaluator.
///
/// - a prohibition of `USE` or `READ` denies;
/// - a permission permits when every constraint holds;
/// - duties and prohibitions of other actions do not gate delivery.
///
/// Constraints on [`EVALUATION_TIME`] (RFC 3339 right operand) and
/// [`CONNECTOR`] are understood; any other constraint denies.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleEvaluator;

impl PolicyDecision for RuleEvaluator {
    fn evaluate(&self, rule: &Rule, context: &PolicyContext<'_>) -> PolicyOutcome {
        match rule.kind {
            RuleKind::Prohibition if matches!(rule.action, Action::Use | Action::Read) => {
                PolicyOutcome::Deny(format!("{:?} is prohibited", rule.action))
            }
            RuleKind::Prohibition | RuleKind::Duty => PolicyOutcome::Permit,
            RuleKind::Permission => rule
                .constraints
                .iter()
                .find_map(|constraint| check_constraint(constraint, context).err())
                .map_or(PolicyOutcome::Permit, PolicyOutcome::Deny),
        }
    }
}

fn check_constraint(constraint: &Constraint, context: &PolicyContext<'_>) -> Result<(), String> {
    let holds = match constraint.left_operand.as_str() {
        EVALUATION_TIME => {
            let bound = DateTime::parse_from_rfc3339(&constraint.right_operand)
                .map_err(|e| format!("unparseable time bound '{}': {}", constraint.right_operand, e))?
                .with_timezone(&Utc);
            match constraint.operator {
                Operator::After | Operator::Gt => context.now > bound,
                Operator::Gteq => context.now >= bound,
                Operator::Before | Operator::Lt => context.now < bound,
                Operator::Lteq => context.now <= bound,
                Operator::Eq | Operator::In => {
                    return Err(format!(
                        "operator {:?} is not supported on {}",
                        constraint.operator, EVALUATION_TIME
                    ))
                }
            }
        }
        CONNECTOR => match constraint.operator {
            Operator::Eq => uris_equal(context.consumer, &constraint.right_operand),
            Operator::In => constraint
                .right_operand
                .split(',')
                .any(|c| uris_equal(context.consumer, c)),
            other => {
                return Err(format!(
                    "operator {:?} is not supported on {}",
                    other, CONNECTOR
                ))
            }
        },
        other => return Err(format!("unknown constraint operand '{}'", other)),
    };

    if holds {
        Ok(())
    } else {
        Err(format!(
            "constraint {} {:?} {} does not hold",
            constraint.left_operand, constraint.operator, constraint.right_operand
        ))
    }
}

/// Evaluates every rule and combines the outcomes.
///
/// Denies if any rule denies or if no rule is a permission.
pub fn decide(
    policy: &dyn PolicyDecision,
    rules: &[Rule],
    context: &PolicyContext<'_>,
) -> PolicyOutcome {
    if !rules.iter().any(|r| r.kind == RuleKind::Permission) {
        return PolicyOutcome::Deny(format!(
            "agreement {} grants no permission on {}",
            context.agreement, context.artifact
        ));
    }
    for rule in rules {
        if let PolicyOutcome::Deny(why) = policy.evaluate(rule, context) {
            return PolicyOutcome::Deny(why);
        }
    }
    PolicyOutcome::Permit
}
