//! Search-engine pre-filters built from the relevant policies
//!
//! Every policy becomes one named clause. The clause name is the policy id,
//! suffixed `_deny` for deny-type policies, so a search response's matched
//! query names tell which policies admitted a hit. Relationship clauses are
//! prefixed `end-one-` / `end-two-` by the end they apply to.

use super::evaluator::{AccessEvaluator, AccessResult};
use crate::criteria::{compile, match_none, FilterCriteria};
use crate::model::actions::{
    RES_ENTITY, RES_ENTITY_CLASSIFICATION, RES_ENTITY_TYPE, RES_RELATIONSHIP_TYPE, RES_TAG,
    USER_PLACEHOLDER, WILDCARD,
};
use crate::model::{Effect, Policy, PolicyService, ResourceCategory, ResourceMap};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, instrument};

pub const DENY_SUFFIX: &str = "_deny";
pub const END_ONE_PREFIX: &str = "end-one-";
pub const END_TWO_PREFIX: &str = "end-two-";

const QUALIFIED_NAME_FIELD: &str = "qualifiedName";
const TYPE_FIELD: &str = "__typeName.keyword";
const SUPER_TYPES_FIELD: &str = "__superTypeNames.keyword";
const TRAITS_FIELD: &str = "__traitNames";
const PROPAGATED_TRAITS_FIELD: &str = "__propagatedTraitNames";
const GUID_FIELD: &str = "__guid";

/// Clause name of a policy for one effect
pub fn clause_name(policy_id: &str, effect: Effect) -> String {
    match effect {
        Effect::Allow => policy_id.to_string(),
        Effect::Deny => format!("{}{}", policy_id, DENY_SUFFIX),
    }
}

impl AccessEvaluator {
    /// Bulk pre-filter restricting a search to what `user` may see
    ///
    /// `bool { filter: bool { should: allow, minimum_should_match: 1 }, must_not: deny }`;
    /// with no allow clause at all nothing can match.
    #[instrument(level = "debug", skip(self))]
    pub fn prefilter(&self, user: &str, actions: &[&str]) -> Value {
        let allow = self.entity_clauses(user, actions, Effect::Allow);
        if allow.is_empty() {
            return match_none();
        }
        let deny = self.entity_clauses(user, actions, Effect::Deny);
        debug!(allow = allow.len(), deny = deny.len(), "pre-filter clauses");

        json!({"bool": {
            "filter": {"bool": {
                "should": chunked(allow, self.max_clause_limit),
                "minimum_should_match": 1
            }},
            "must_not": chunked(deny, self.max_clause_limit)
        }})
    }

    /// Query whose single hit names the policies admitting `guid`
    ///
    /// Allow and deny clauses are both `should` members here so that deny
    /// matches show up in the matched query names.
    pub fn entity_check_query(&self, user: &str, guid: &str, action: &str) -> Value {
        let mut clauses = self.entity_clauses(user, &[action], Effect::Allow);
        clauses.extend(self.entity_clauses(user, &[action], Effect::Deny));
        if clauses.is_empty() {
            return match_none();
        }

        json!({"bool": {"filter": [
            {"bool": {
                "should": chunked(clauses, self.max_clause_limit),
                "minimum_should_match": 1
            }},
            {"term": {GUID_FIELD: guid}}
        ]}})
    }

    /// Query over both ends of a relationship with end-scoped clause names
    pub fn relationship_check_query(
        &self,
        user: &str,
        action: &str,
        relationship_type: &str,
        end_one_guid: &str,
        end_two_guid: &str,
    ) -> Value {
        let mut clauses = Vec::new();
        for effect in [Effect::Allow, Effect::Deny] {
            for policy in self.relationship_policies(user, action, relationship_type, effect) {
                let id = policy.display_id();
                for prefix in [END_ONE_PREFIX, END_TWO_PREFIX] {
                    if let Some(clause) = end_clause(&policy, prefix, user) {
                        let name = clause_name(&format!("{}{}", prefix, id), effect);
                        clauses.push(named(clause, &name));
                    }
                }
            }
        }
        if clauses.is_empty() {
            return match_none();
        }

        json!({"bool": {"filter": [
            {"bool": {
                "should": chunked(clauses, self.max_clause_limit),
                "minimum_should_match": 1
            }},
            {"terms": {GUID_FIELD: [end_one_guid, end_two_guid]}}
        ]}})
    }

    fn entity_clauses(&self, user: &str, actions: &[&str], effect: Effect) -> Vec<Value> {
        let mut clauses = Vec::new();
        for service in [PolicyService::Condition, PolicyService::Resource, PolicyService::Tag] {
            for policy in self.policies_for_actions(user, actions, effect, ResourceCategory::Entity, service) {
                if let Some(clause) = self.entity_clause(&policy, user) {
                    clauses.push(named(clause, &clause_name(policy.display_id(), effect)));
                }
            }
        }
        clauses
    }

    fn entity_clause(&self, policy: &Policy, user: &str) -> Option<Value> {
        match policy.service {
            PolicyService::Condition => FilterCriteria::of_policy(policy)
                .and_then(|c| c.entity)
                .map(|node| compile(&node)),
            PolicyService::Tag => Some(tag_clause(policy.resource(RES_TAG).unwrap_or(&[]))),
            PolicyService::Resource => Some(resource_clause(&policy.resources, user)),
            PolicyService::Data => None,
        }
    }

    fn policies_for_actions(
        &self,
        user: &str,
        actions: &[&str],
        effect: Effect,
        category: ResourceCategory,
        service: PolicyService,
    ) -> Vec<Arc<Policy>> {
        let mut seen = BTreeMap::new();
        for action in actions {
            for policy in self.relevant(Some(user), action, effect, category, service) {
                seen.entry(policy.display_id().to_string()).or_insert(policy);
            }
        }
        seen.into_values().collect()
    }

    /// Relationship policies whose type dimension admits `relationship_type`
    fn relationship_policies(
        &self,
        user: &str,
        action: &str,
        relationship_type: &str,
        effect: Effect,
    ) -> Vec<Arc<Policy>> {
        [PolicyService::Condition, PolicyService::Resource, PolicyService::Tag]
            .into_iter()
            .flat_map(|service| {
                self.relevant(Some(user), action, effect, ResourceCategory::Relationship, service)
            })
            .filter(|p| match p.resource(RES_RELATIONSHIP_TYPE) {
                Some(patterns) => self
                    .patterns()
                    .matches_any(patterns, [relationship_type], user),
                None => true,
            })
            .collect()
    }

    /// Resolve a search-engine response for [`entity_check_query`](Self::entity_check_query)
    pub fn decide_from_matches(matched: &[String]) -> AccessResult {
        if let Some(denied) = matched.iter().find(|m| m.ends_with(DENY_SUFFIX)) {
            let id = denied.trim_end_matches(DENY_SUFFIX);
            return AccessResult::deny(Some(id.to_string()));
        }
        match matched.first() {
            Some(id) => AccessResult::allow(id.clone()),
            None => AccessResult::deny(None),
        }
    }
}

/// Clause for one end of a relationship policy
fn end_clause(policy: &Policy, prefix: &str, user: &str) -> Option<Value> {
    match policy.service {
        PolicyService::Condition => {
            let criteria = FilterCriteria::of_policy(policy)?;
            let node = if prefix == END_ONE_PREFIX {
                criteria.end_one_entity?
            } else {
                criteria.end_two_entity?
            };
            Some(compile(&node))
        }
        PolicyService::Resource | PolicyService::Tag => {
            let end: ResourceMap = policy
                .resources
                .iter()
                .filter_map(|(dimension, values)| {
                    dimension
                        .strip_prefix(prefix)
                        .map(|rest| (rest.to_string(), values.clone()))
                })
                .collect();
            Some(resource_clause(&end, user))
        }
        PolicyService::Data => None,
    }
}

/// Resource-pattern dimensions as filters over indexed fields
///
/// Dimensions the index cannot express are left unconstrained, as the
/// in-memory matcher does.
fn resource_clause(resources: &ResourceMap, user: &str) -> Value {
    let dim = |name: &str| resources.get(name).filter(|v| !v.iter().any(|x| x == WILDCARD));

    let mut filters = Vec::new();
    if let Some(patterns) = dim(RES_ENTITY) {
        filters.push(qualified_name_clause(patterns, user));
    }
    if let Some(types) = dim(RES_ENTITY_TYPE) {
        filters.push(any_of(vec![
            field_patterns(TYPE_FIELD, types),
            field_patterns(SUPER_TYPES_FIELD, types),
        ]));
    }
    for tag_dimension in [RES_ENTITY_CLASSIFICATION, RES_TAG] {
        if let Some(tags) = dim(tag_dimension) {
            filters.push(tag_clause(tags));
        }
    }

    if filters.is_empty() {
        json!({"match_all": {}})
    } else {
        json!({"bool": {"filter": filters}})
    }
}

fn tag_clause(tags: &[String]) -> Value {
    if tags.iter().any(|t| t == WILDCARD) {
        return json!({"match_all": {}});
    }
    any_of(vec![
        field_patterns(TRAITS_FIELD, tags),
        field_patterns(PROPAGATED_TRAITS_FIELD, tags),
    ])
}

fn qualified_name_clause(patterns: &[String], user: &str) -> Value {
    let substituted: Vec<String> = patterns
        .iter()
        .map(|p| p.replace(USER_PLACEHOLDER, user))
        .collect();
    field_patterns(QUALIFIED_NAME_FIELD, &substituted)
}

/// Exact values as one `terms`, `*` patterns as `wildcard` clauses
fn field_patterns(field: &str, patterns: &[String]) -> Value {
    let (wild, exact): (Vec<&String>, Vec<&String>) =
        patterns.iter().partition(|p| p.contains('*'));

    let mut clauses = Vec::new();
    if !exact.is_empty() {
        clauses.push(json!({"terms": {field: exact}}));
    }
    for pattern in wild {
        clauses.push(json!({"wildcard": {field: escape_literal(pattern)}}));
    }
    any_of(clauses)
}

/// Keep `*` as wildcard syntax, neutralize `?` and `\`
fn escape_literal(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    for c in pattern.chars() {
        if matches!(c, '?' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn any_of(mut clauses: Vec<Value>) -> Value {
    match clauses.len() {
        0 => match_none(),
        1 => clauses.remove(0),
        _ => json!({"bool": {"should": clauses, "minimum_should_match": 1}}),
    }
}

fn named(clause: Value, name: &str) -> Value {
    json!({"bool": {"filter": [clause], "_name": name}})
}

/// Split an over-long clause list into nested `should` groups
fn chunked(clauses: Vec<Value>, limit: usize) -> Vec<Value> {
    if clauses.len() <= limit {
        return clauses;
    }
    clauses
        .chunks(limit)
        .map(|chunk| json!({"bool": {"should": chunk, "minimum_should_match": 1}}))
        .collect()
}
