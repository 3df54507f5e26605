//! In-memory evaluation of a condition tree against one entity

use super::{Condition, ConditionNode, Criterion, CriterionNode, Operator};
use crate::model::Entity;
use serde_json::Value;

/// Search-engine field suffixes that alias the plain attribute
const FIELD_SUFFIXES: [&str; 2] = [".text", ".keyword"];

/// Evaluate `node` against `entity`
///
/// Children are folded without short-circuiting; an empty criterion list
/// is `false` for either connective.
///
/// # Examples
/// ```
/// use persona_authz::criteria::{evaluate, ConditionNode, Criterion, Operator};
/// use persona_authz::model::Entity;
///
/// let node = ConditionNode::and(vec![
///     Criterion::new("__typeName", Operator::Equals, "Table").into(),
/// ]);
/// assert!(evaluate(&node, &Entity::new("g1", "Table")));
/// assert!(!evaluate(&node, &Entity::new("g2", "Column")));
/// ```
pub fn evaluate(node: &ConditionNode, entity: &Entity) -> bool {
    if node.criterion.is_empty() {
        return false;
    }

    let results = node.criterion.iter().map(|child| match child {
        CriterionNode::Group(group) => evaluate(group, entity),
        CriterionNode::Leaf(leaf) => evaluate_criterion(leaf, entity),
    });

    match node.condition {
        Condition::And => results.fold(true, |acc, r| acc & r),
        Condition::Or => results.fold(false, |acc, r| acc | r),
    }
}

fn evaluate_criterion(criterion: &Criterion, entity: &Entity) -> bool {
    let actual = attribute_values(entity, &criterion.attribute_name);
    let expected = criterion.attribute_value.values();

    let is_member = || actual.iter().any(|v| expected.contains(&v.as_str()));

    match criterion.operator {
        Operator::Equals | Operator::In => is_member(),
        Operator::NotEquals | Operator::NotIn => !is_member(),
        Operator::StartsWith => actual
            .iter()
            .any(|v| expected.iter().any(|prefix| v.starts_with(prefix))),
        Operator::EndsWith => actual
            .iter()
            .any(|v| expected.iter().any(|suffix| v.ends_with(suffix))),
    }
}

/// Values of a (possibly synthetic) attribute, as indexed for search
pub fn attribute_values(entity: &Entity, attribute_name: &str) -> Vec<String> {
    let name = FIELD_SUFFIXES
        .iter()
        .find_map(|suffix| attribute_name.strip_suffix(suffix))
        .unwrap_or(attribute_name);

    match name {
        "__typeName" => vec![entity.type_name.clone()],
        "__superTypeNames" => entity.type_and_ancestors().into_iter().collect(),
        "__guid" => vec![entity.guid.clone()],
        "__traitNames" => entity.direct_classifications(),
        "__propagatedTraitNames" => entity.propagated_classifications(),
        "__meaningNames" => entity.meaning_names.clone(),
        _ => entity
            .attributes
            .get(name)
            .map(flatten_value)
            .unwrap_or_default(),
    }
}

/// Primitive values become one entry, arrays expand element-wise
fn flatten_value(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().filter_map(primitive_to_string).collect(),
        other => primitive_to_string(other).into_iter().collect(),
    }
}

fn primitive_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}
