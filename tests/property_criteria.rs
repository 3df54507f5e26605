//! Property-based tests for filter criteria
//!
//! A compiled query run against an indexed entity must agree with the
//! in-memory evaluation of the same tree.

use persona_authz::criteria::{
    compile, evaluate, AttributeValue, Condition, ConditionNode, Criterion, CriterionNode, Operator,
};
use persona_authz::memory::query_matches;
use persona_authz::model::{Classification, Entity};
use proptest::prelude::*;
use serde_json::json;

const ATTRIBUTES: [&str; 6] = [
    "__typeName",
    "__typeName.keyword",
    "__superTypeNames.keyword",
    "__traitNames",
    "__propagatedTraitNames",
    "ownerUsers",
];

fn word() -> impl Strategy<Value = String> {
    "[a-c]{0,3}"
}

fn operator() -> impl Strategy<Value = Operator> {
    prop_oneof![
        Just(Operator::Equals),
        Just(Operator::NotEquals),
        Just(Operator::StartsWith),
        Just(Operator::EndsWith),
        Just(Operator::In),
        Just(Operator::NotIn),
    ]
}

fn value() -> impl Strategy<Value = AttributeValue> {
    prop_oneof![
        word().prop_map(AttributeValue::Single),
        prop::collection::vec(word(), 1..4).prop_map(AttributeValue::Multiple),
    ]
}

fn leaf() -> impl Strategy<Value = CriterionNode> {
    (prop::sample::select(ATTRIBUTES.to_vec()), operator(), value()).prop_map(|(name, op, value)| {
        CriterionNode::Leaf(Criterion {
            attribute_name: name.to_string(),
            operator: op,
            attribute_value: value,
        })
    })
}

fn tree() -> impl Strategy<Value = ConditionNode> {
    let node = leaf().prop_recursive(3, 24, 4, |inner| {
        (any::<bool>(), prop::collection::vec(inner, 0..4)).prop_map(|(and, criterion)| {
            CriterionNode::Group(ConditionNode {
                condition: if and { Condition::And } else { Condition::Or },
                criterion,
            })
        })
    });
    (any::<bool>(), prop::collection::vec(node, 0..4)).prop_map(|(and, criterion)| ConditionNode {
        condition: if and { Condition::And } else { Condition::Or },
        criterion,
    })
}

fn entity() -> impl Strategy<Value = Entity> {
    (
        word(),
        prop::collection::vec(word(), 0..3),
        prop::collection::vec(word(), 0..3),
        prop::collection::vec(word(), 0..3),
        prop::collection::vec(word(), 0..3),
    )
        .prop_map(|(type_name, supers, direct, propagated, owners)| {
            let mut entity = Entity::new("g1", type_name)
                .with_super_types(supers)
                .with_attribute("ownerUsers", json!(owners));
            for tag in direct {
                entity = entity.with_classification(Classification::direct(tag));
            }
            for tag in propagated {
                entity = entity.with_classification(Classification::propagated(tag, "g0"));
            }
            entity
        })
}

proptest! {
    #[test]
    fn prop_compiled_query_agrees_with_evaluation(node in tree(), entity in entity()) {
        let mut names = Vec::new();
        let searched = query_matches(&compile(&node), &entity, &mut names).unwrap();
        prop_assert_eq!(searched, evaluate(&node, &entity), "tree {:?}", node);
    }

    #[test]
    fn prop_negation_is_complement(
        name in prop::sample::select(ATTRIBUTES.to_vec()),
        value in value(),
        entity in entity()
    ) {
        let with = |op: Operator| ConditionNode::and(vec![Criterion::new(name, op, value.clone()).into()]);
        prop_assert_ne!(
            evaluate(&with(Operator::In), &entity),
            evaluate(&with(Operator::NotIn), &entity)
        );
        prop_assert_eq!(
            evaluate(&with(Operator::Equals), &entity),
            evaluate(&with(Operator::In), &entity)
        );
    }
}

#[test]
fn test_empty_tree_matches_nothing() {
    let entity = Entity::new("g1", "Table");
    for node in [ConditionNode::and(Vec::new()), ConditionNode::or(Vec::new())] {
        let mut names = Vec::new();
        assert!(!evaluate(&node, &entity));
        assert!(!query_matches(&compile(&node), &entity, &mut names).unwrap());
    }
}
