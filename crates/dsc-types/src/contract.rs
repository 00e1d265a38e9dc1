//! Usage rules, contract offers, requests and agreements.
//!
//! A contract is a list of [`Rule`]s, each of which grants, forbids or
//! obliges an [`Action`] on a single target artifact, optionally narrowed
//! by [`Constraint`]s. Offers are what a provider advertises, requests are
//! what a consumer asks for, and agreements are what both sides end up
//! holding after negotiation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// The three kinds of usage rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleKind {
    /// The action is allowed.
    Permission,
    /// The action is forbidden.
    Prohibition,
    /// The action must be performed.
    Duty,
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleKind::Permission => write!(f, "PERMISSION"),
            RuleKind::Prohibition => write!(f, "PROHIBITION"),
            RuleKind::Duty => write!(f, "DUTY"),
        }
    }
}

impl FromStr for RuleKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PERMISSION" => Ok(RuleKind::Permission),
            "PROHIBITION" => Ok(RuleKind::Prohibition),
            "DUTY" => Ok(RuleKind::Duty),
            _ => Err(format!("Invalid rule kind: {}", s)),
        }
    }
}

/// Actions a rule can refer to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Use,
    Read,
    Modify,
    Distribute,
    Delete,
    Log,
    Notify,
    Anonymize,
}

/// Comparison operators for constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operator {
    Eq,
    Lt,
    Lteq,
    Gt,
    Gteq,
    In,
    After,
    Before,
}

/// A single condition narrowing a rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Constraint {
    /// What is being constrained, e.g. `POLICY_EVALUATION_TIME` or `COUNT`.
    pub left_operand: String,
    /// How the left operand relates to the right operand.
    pub operator: Operator,
    /// The literal value compared against.
    pub right_operand: String,
}

/// A usage rule bound to one target artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    /// Identifier of the rule, if it has one.
    #[serde(rename = "@id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Permission, prohibition or duty.
    pub kind: RuleKind,
    /// The governed action.
    pub action: Action,
    /// URI of the artifact this rule applies to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Conditions under which the rule applies.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constraints: Vec<Constraint>,
    /// Human-readable title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl Rule {
    /// Creates an unconstrained rule for `action` on `target`.
    pub fn new(kind: RuleKind, action: Action, target: impl Into<String>) -> Self {
        Self {
            id: None,
            kind,
            action,
            target: Some(target.into()),
            constraints: Vec::new(),
            title: None,
        }
    }

    /// Adds a constraint to the rule.
    pub fn with_constraint(
        mut self,
        left_operand: impl Into<String>,
        operator: Operator,
        right_operand: impl Into<String>,
    ) -> Self {
        self.constraints.push(Constraint {
            left_operand: left_operand.into(),
            operator,
            right_operand: right_operand.into(),
        });
        self
    }
}

/// Returns the distinct targets named by `rules`, ignoring rules without one.
pub fn targets_of(rules: &[Rule]) -> BTreeSet<String> {
    rules.iter().filter_map(|r| r.target.clone()).collect()
}

/// A contract a provider advertises for one of its resources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractOffer {
    #[serde(rename = "@id")]
    pub id: String,
    /// Restricts the offer to a single consumer connector.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_start: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_end: Option<DateTime<Utc>>,
    pub rules: Vec<Rule>,
}

impl ContractOffer {
    /// Returns `true` if `consumer` may accept this offer.
    pub fn is_open_to(&self, consumer: &str) -> bool {
        self.consumer
            .as_deref()
            .map_or(true, |c| crate::uri::uris_equal(c, consumer))
    }
}

/// A contract a consumer asks a provider to agree to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractRequest {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_start: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_end: Option<DateTime<Utc>>,
    /// Ordered rule list; must be non-empty and every rule must name a target.
    #[serde(default)]
    pub rules: Vec<Rule>,
}

/// The contract both parties hold once negotiation succeeds.
///
/// Agreements are immutable once persisted; only the set of artifacts a
/// stored agreement is linked to may change afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractAgreement {
    #[serde(rename = "@id")]
    pub id: String,
    /// The connector that will use the data.
    pub consumer: String,
    /// The connector that offers the data.
    pub provider: String,
    /// When the agreement was drawn up.
    pub contract_date: DateTime<Utc>,
    pub contract_start: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_end: Option<DateTime<Utc>>,
    pub rules: Vec<Rule>,
}

impl ContractAgreement {
    /// Returns `true` if the agreement's end date lies before `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.contract_end.is_some_and(|end| end < now)
    }

    /// Returns `true` if the agreement has not started yet at `now`.
    pub fn is_pending_at(&self, now: DateTime<Utc>) -> bool {
        now < self.contract_start
    }

    /// Returns the distinct artifact targets this agreement governs.
    pub fn targets(&self) -> BTreeSet<String> {
        targets_of(&self.rules)
    }

    /// Returns the rules governing `artifact`, comparing URIs normalized.
    pub fn rules_for<'a>(&'a self, artifact: &'a str) -> impl Iterator<Item = &'a Rule> + 'a {
        self.rules.iter().filter(move |rule| {
            rule.target
                .as_deref()
                .is_some_and(|t| crate::uri::uris_equal(t, artifact))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn make_agreement(end: Option<DateTime<Utc>>) -> ContractAgreement {
        let now = Utc::now();
        ContractAgreement {
            id: "https://provider.example.com/agreements/1".to_string(),
            consumer: "https://consumer.example.com".to_string(),
            provider: "https://provider.example.com".to_string(),
            contract_date: now,
            contract_start: now,
            contract_end: end,
            rules: vec![
                Rule::new(
                    RuleKind::Permission,
                    Action::Use,
                    "https://provider.example.com/artifacts/1",
                ),
                Rule::new(
                    RuleKind::Prohibition,
                    Action::Distribute,
                    "https://provider.example.com/artifacts/1",
                ),
                Rule::new(
                    RuleKind::Permission,
                    Action::Read,
                    "https://provider.example.com/artifacts/2",
                ),
            ],
        }
    }

    #[test]
    fn rule_json_uses_wire_labels() {
        let rule = Rule::new(RuleKind::Permission, Action::Use, "https://a.example/1")
            .with_constraint("POLICY_EVALUATION_TIME", Operator::Before, "2030-01-01T00:00:00Z");
        let value = serde_json::to_value(&rule).unwrap();
        assert_eq!(value["kind"], "PERMISSION");
        assert_eq!(value["action"], "USE");
        assert_eq!(value["target"], "https://a.example/1");
        assert_eq!(value["constraints"][0]["operator"], "BEFORE");
        assert_eq!(value["constraints"][0]["leftOperand"], "POLICY_EVALUATION_TIME");
        assert!(value.get("@id").is_none());
    }

    #[test]
    fn rule_without_target_deserializes() {
        let rule: Rule =
            serde_json::from_str(r#"{"kind":"DUTY","action":"LOG"}"#).unwrap();
        assert_eq!(rule.kind, RuleKind::Duty);
        assert!(rule.target.is_none());
    }

    #[test]
    fn agreement_without_end_never_expires() {
        let agreement = make_agreement(None);
        assert!(!agreement.is_expired_at(Utc::now() + Duration::days(3650)));
    }

    #[test]
    fn agreement_past_end_is_expired() {
        let agreement = make_agreement(Some(Utc::now() - Duration::hours(1)));
        assert!(agreement.is_expired_at(Utc::now()));
    }

    #[test]
    fn agreement_targets_are_distinct() {
        let agreement = make_agreement(None);
        let targets = agreement.targets();
        assert_eq!(targets.len(), 2);
    }

    #[test]
    fn rules_for_matches_normalized_target() {
        let agreement = make_agreement(None);
        let rules: Vec<_> = agreement
            .rules_for("HTTPS://provider.example.com:443/artifacts/1")
            .collect();
        assert_eq!(rules.len(), 2);
    }

    #[test]
    fn offer_restricted_to_consumer() {
        let offer = ContractOffer {
            id: "https://provider.example.com/offers/1".to_string(),
            consumer: Some("https://consumer.example.com".to_string()),
            provider: None,
            contract_start: None,
            contract_end: None,
            rules: vec![],
        };
        assert!(offer.is_open_to("https://consumer.example.com/"));
        assert!(!offer.is_open_to("https://other.example.com"));
    }

    #[test]
    fn rule_kind_parses_labels() {
        assert_eq!("DUTY".parse::<RuleKind>().unwrap(), RuleKind::Duty);
        assert_eq!(RuleKind::Prohibition.to_string(), "PROHIBITION");
        assert!("OBLIGATION".parse::<RuleKind>().is_err());
    }
}
