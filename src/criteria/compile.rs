//! Compilation of a condition tree into a search-engine bool query
//!
//! The output mirrors the tree node for node:
//! - AND -> `bool.filter`
//! - OR -> `bool.should` with `minimum_should_match: 1`
//! - leaves -> `term` / `terms` / `wildcard`, negated with `bool.must_not`

use super::{Condition, ConditionNode, Criterion, CriterionNode, Operator};
use serde_json::{json, Value};

/// Compile `node` into a query fragment
///
/// # Examples
/// ```
/// use persona_authz::criteria::{compile, ConditionNode, Criterion, Operator};
/// use serde_json::json;
///
/// let node = ConditionNode::and(vec![
///     Criterion::new("__typeName.keyword", Operator::Equals, "Table").into(),
/// ]);
/// assert_eq!(
///     compile(&node),
///     json!({"bool": {"filter": [{"term": {"__typeName.keyword": "Table"}}]}})
/// );
/// ```
pub fn compile(node: &ConditionNode) -> Value {
    if node.criterion.is_empty() {
        return match_none();
    }

    let clauses: Vec<Value> = node
        .criterion
        .iter()
        .map(|child| match child {
            CriterionNode::Group(group) => compile(group),
            CriterionNode::Leaf(leaf) => compile_criterion(leaf),
        })
        .collect();

    match node.condition {
        Condition::And => json!({"bool": {"filter": clauses}}),
        Condition::Or => json!({"bool": {"should": clauses, "minimum_should_match": 1}}),
    }
}

/// Query matching no document
pub fn match_none() -> Value {
    json!({"bool": {"must_not": {"match_all": {}}}})
}

fn compile_criterion(criterion: &Criterion) -> Value {
    let field = criterion.attribute_name.as_str();
    let values = criterion.attribute_value.values();

    match criterion.operator {
        Operator::Equals => exact(field, &values),
        Operator::NotEquals => negate(exact(field, &values)),
        Operator::StartsWith => wildcard_any(field, &values, |v| format!("{}*", v)),
        Operator::EndsWith => wildcard_any(field, &values, |v| format!("*{}", v)),
        Operator::In => json!({"terms": {field: values}}),
        Operator::NotIn => negate(json!({"terms": {field: values}})),
    }
}

fn exact(field: &str, values: &[&str]) -> Value {
    match values {
        [single] => json!({"term": {field: single}}),
        many => json!({"terms": {field: many}}),
    }
}

fn negate(clause: Value) -> Value {
    json!({"bool": {"must_not": [clause]}})
}

fn wildcard_any(field: &str, values: &[&str], shape: impl Fn(&str) -> String) -> Value {
    let clauses: Vec<Value> = values
        .iter()
        .map(|v| json!({"wildcard": {field: shape(&escape_wildcard(v))}}))
        .collect();

    match clauses.len() {
        1 => clauses.into_iter().next().unwrap_or_else(match_none),
        0 => match_none(),
        _ => json!({"bool": {"should": clauses, "minimum_should_match": 1}}),
    }
}

/// Literal `*`, `?` and `\` in a value must not act as wildcard syntax
fn escape_wildcard(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '*' | '?' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::criteria::AttributeValue;

    fn leaf(name: &str, op: Operator, value: &str) -> CriterionNode {
        Criterion::new(name, op, value).into()
    }

    #[test]
    fn test_or_requires_one_match() {
        let node = ConditionNode::or(vec![
            leaf("__traitNames", Operator::Equals, "PII"),
            leaf("__propagatedTraitNames", Operator::Equals, "PII"),
        ]);
        assert_eq!(
            compile(&node),
            json!({"bool": {
                "should": [
                    {"term": {"__traitNames": "PII"}},
                    {"term": {"__propagatedTraitNames": "PII"}}
                ],
                "minimum_should_match": 1
            }})
        );
    }

    #[test]
    fn test_leaf_primitives() {
        let compiled = compile(&ConditionNode::and(vec![
            leaf("qualifiedName", Operator::StartsWith, "db/"),
            leaf("qualifiedName", Operator::EndsWith, "_tmp"),
            leaf("__typeName", Operator::NotEquals, "Column"),
        ]));
        let filter = &compiled["bool"]["filter"];
        assert_eq!(filter[0], json!({"wildcard": {"qualifiedName": "db/*"}}));
        assert_eq!(filter[1], json!({"wildcard": {"qualifiedName": "*_tmp"}}));
        assert_eq!(
            filter[2],
            json!({"bool": {"must_not": [{"term": {"__typeName": "Column"}}]}})
        );
    }

    #[test]
    fn test_set_membership() {
        let node = ConditionNode::and(vec![
            Criterion {
                attribute_name: "__traitNames".into(),
                operator: Operator::In,
                attribute_value: AttributeValue::Multiple(vec!["PII".into(), "PHI".into()]),
            }
            .into(),
            Criterion {
                attribute_name: "ownerGroups".into(),
                operator: Operator::NotIn,
                attribute_value: AttributeValue::Single("contractors".into()),
            }
            .into(),
        ]);
        let compiled = compile(&node);
        assert_eq!(
            compiled["bool"]["filter"][0],
            json!({"terms": {"__traitNames": ["PII", "PHI"]}})
        );
        assert_eq!(
            compiled["bool"]["filter"][1],
            json!({"bool": {"must_not": [{"terms": {"ownerGroups": ["contractors"]}}]}})
        );
    }

    #[test]
    fn test_empty_node_matches_nothing() {
        assert_eq!(compile(&ConditionNode::or(vec![])), match_none());
        assert_eq!(compile(&ConditionNode::and(vec![])), match_none());
    }

    #[test]
    fn test_wildcard_value_escaped() {
        let compiled = compile(&ConditionNode::and(vec![leaf(
            "name",
            Operator::StartsWith,
            "a*b?",
        )]));
        assert_eq!(
            compiled["bool"]["filter"][0],
            json!({"wildcard": {"name": "a\\*b\\?*"}})
        );
    }
}
