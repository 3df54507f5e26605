//! Attribute-based filter criteria
//!
//! A condition-based policy carries a boolean tree of attribute tests. The
//! same tree has two consumers:
//! - [`evaluate`] decides it against one resolved entity in memory
//! - [`compile`] turns it into a search-engine bool query for bulk filtering
//!
//! Both must agree for any entity indexed verbatim.

mod compile;
mod evaluate;

pub use compile::{compile, match_none};
pub use evaluate::{attribute_values, evaluate};

use crate::model::Policy;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Boolean connective of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Condition {
    And,
    Or,
}

/// Attribute comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operator {
    Equals,
    NotEquals,
    StartsWith,
    EndsWith,
    In,
    NotIn,
}

/// Right-hand side of a comparison
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Single(String),
    Multiple(Vec<String>),
}

impl AttributeValue {
    pub fn values(&self) -> Vec<&str> {
        match self {
            AttributeValue::Single(v) => vec![v.as_str()],
            AttributeValue::Multiple(vs) => vs.iter().map(String::as_str).collect(),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::Single(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::Single(value)
    }
}

impl From<Vec<String>> for AttributeValue {
    fn from(values: Vec<String>) -> Self {
        AttributeValue::Multiple(values)
    }
}

/// Leaf test: `attributeName operator attributeValue`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Criterion {
    pub attribute_name: String,
    pub operator: Operator,
    pub attribute_value: AttributeValue,
}

impl Criterion {
    pub fn new(
        attribute_name: impl Into<String>,
        operator: Operator,
        attribute_value: impl Into<AttributeValue>,
    ) -> Self {
        Criterion {
            attribute_name: attribute_name.into(),
            operator,
            attribute_value: attribute_value.into(),
        }
    }
}

/// Child of a condition node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CriterionNode {
    Group(ConditionNode),
    Leaf(Criterion),
}

/// Boolean tree node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionNode {
    pub condition: Condition,
    #[serde(default)]
    pub criterion: Vec<CriterionNode>,
}

impl ConditionNode {
    pub fn and(criterion: Vec<CriterionNode>) -> Self {
        ConditionNode {
            condition: Condition::And,
            criterion,
        }
    }

    pub fn or(criterion: Vec<CriterionNode>) -> Self {
        ConditionNode {
            condition: Condition::Or,
            criterion,
        }
    }
}

impl From<Criterion> for CriterionNode {
    fn from(leaf: Criterion) -> Self {
        CriterionNode::Leaf(leaf)
    }
}

impl From<ConditionNode> for CriterionNode {
    fn from(group: ConditionNode) -> Self {
        CriterionNode::Group(group)
    }
}

/// Stored `filterCriteria` document of a condition-based policy
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterCriteria {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<ConditionNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_one_entity: Option<ConditionNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_two_entity: Option<ConditionNode>,
}

impl FilterCriteria {
    pub fn parse(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Criteria of a policy, or `None` when absent or malformed
    ///
    /// A malformed document makes the policy contribute nothing; it never
    /// fails the evaluation as a whole.
    pub fn of_policy(policy: &Policy) -> Option<FilterCriteria> {
        let raw = policy.filter_criteria.as_deref()?;
        if raw.trim().is_empty() {
            return None;
        }
        match Self::parse(raw) {
            Ok(criteria) => Some(criteria),
            Err(e) => {
                warn!(policy = policy.display_id(), error = %e, "skipping malformed filter criteria");
                None
            }
        }
    }
}
