//! In-memory allow/deny decisions
//!
//! Each request runs `DENY_CHECK -> ALLOW_CHECK -> RESULT`:
//! 1. deny-type condition policies, then deny-type resource and tag policies;
//!    the first match denies unconditionally
//! 2. allow-type condition policies, then allow-type resource and tag
//!    policies as plain pattern matches; the first match allows
//! 3. nothing matched: denied with no policy
//!
//! Entity requests only see `ENTITY` policies and relationship requests only
//! `RELATIONSHIP` policies.

use super::pattern::PatternCache;
use super::resources::ResourceMatcher;
use crate::audit::{AuditLogger, AuditRecord};
use crate::criteria::{evaluate, FilterCriteria};
use crate::model::{Effect, Entity, Policy, PolicyService, RelationshipTarget, ResourceCategory};
use crate::store::{PolicyQuery, PolicyStore};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Outcome of one decision
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessResult {
    pub allowed: bool,
    /// Policy that decided the outcome; `None` when nothing matched
    pub policy_id: Option<String>,
}

impl AccessResult {
    pub fn allow(policy_id: impl Into<String>) -> Self {
        AccessResult {
            allowed: true,
            policy_id: Some(policy_id.into()),
        }
    }

    pub fn deny(policy_id: Option<String>) -> Self {
        AccessResult {
            allowed: false,
            policy_id,
        }
    }
}

/// Subjects granted and denied one action on one target
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Accessors {
    pub users: BTreeSet<String>,
    pub groups: BTreeSet<String>,
    pub roles: BTreeSet<String>,
    pub denied_users: BTreeSet<String>,
    pub denied_groups: BTreeSet<String>,
    pub denied_roles: BTreeSet<String>,
}

impl Accessors {
    fn collect(&mut self, policy: &Policy, effect: Effect, action: &str) {
        let (users, groups, roles) = match effect {
            Effect::Allow => (&mut self.users, &mut self.groups, &mut self.roles),
            Effect::Deny => (
                &mut self.denied_users,
                &mut self.denied_groups,
                &mut self.denied_roles,
            ),
        };
        for item in policy.items(effect).iter().filter(|i| i.accesses.contains(action)) {
            users.extend(item.users.iter().cloned());
            groups.extend(item.groups.iter().cloned());
            roles.extend(item.roles.iter().cloned());
        }
    }
}

/// Access evaluator over a shared [`PolicyStore`]
pub struct AccessEvaluator {
    store: Arc<PolicyStore>,
    patterns: Arc<PatternCache>,
    audit: Option<Arc<AuditLogger>>,
    pub(crate) max_clause_limit: usize,
}

impl AccessEvaluator {
    pub fn new(store: Arc<PolicyStore>, patterns: Arc<PatternCache>) -> Self {
        AccessEvaluator {
            store,
            patterns,
            audit: None,
            max_clause_limit: 1024,
        }
    }

    /// Emit one audit record per decision
    pub fn with_audit(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Partition bulk pre-filter should-lists above this size
    pub fn with_clause_limit(mut self, limit: usize) -> Self {
        self.max_clause_limit = limit.max(2);
        self
    }

    pub fn store(&self) -> &Arc<PolicyStore> {
        &self.store
    }

    pub fn patterns(&self) -> &PatternCache {
        &self.patterns
    }

    /// Decide `action` on `entity` for `user` and record the decision
    #[instrument(level = "debug", skip(self, entity), fields(target = %entity.guid))]
    pub fn is_entity_access_allowed(&self, user: &str, action: &str, entity: &Entity) -> AccessResult {
        let result = match self.entity_match(user, action, entity, Effect::Deny) {
            Some(policy_id) => AccessResult::deny(Some(policy_id)),
            None => match self.entity_match(user, action, entity, Effect::Allow) {
                Some(policy_id) => AccessResult::allow(policy_id),
                None => AccessResult::deny(None),
            },
        };
        debug!(allowed = result.allowed, policy = ?result.policy_id, "entity decision");
        self.record(user, action, entity.display_target(), &result);
        result
    }

    /// Decide `action` on a relationship and record the decision
    #[instrument(level = "debug", skip(self, target), fields(relationship = %target.relationship_type))]
    pub fn is_relationship_access_allowed(
        &self,
        user: &str,
        action: &str,
        target: &RelationshipTarget,
    ) -> AccessResult {
        let result = match self.relationship_match(user, action, target, Effect::Deny) {
            Some(policy_id) => AccessResult::deny(Some(policy_id)),
            None => match self.relationship_match(user, action, target, Effect::Allow) {
                Some(policy_id) => AccessResult::allow(policy_id),
                None => AccessResult::deny(None),
            },
        };
        debug!(allowed = result.allowed, policy = ?result.policy_id, "relationship decision");
        self.record(user, action, target.display_target(), &result);
        result
    }

    /// Everyone granted or denied `action` on `entity`
    ///
    /// There is no requesting user here, so `{USER}` patterns resolve against
    /// the empty string and per-user grants are not reported.
    pub fn entity_accessors(&self, action: &str, entity: &Entity) -> Accessors {
        let matcher = ResourceMatcher::new(&self.patterns, "");
        let mut accessors = Accessors::default();

        for effect in [Effect::Allow, Effect::Deny] {
            for policy in self.relevant(None, action, effect, ResourceCategory::Entity, PolicyService::Condition) {
                if condition_matches_entity(&policy, entity) {
                    accessors.collect(&policy, effect, action);
                }
            }
            for service in [PolicyService::Resource, PolicyService::Tag] {
                for policy in self.relevant(None, action, effect, ResourceCategory::Entity, service) {
                    if matcher.entity_matches(&policy, entity) {
                        accessors.collect(&policy, effect, action);
                    }
                }
            }
        }
        accessors
    }

    /// Everyone granted or denied `action` on a relationship
    pub fn relationship_accessors(&self, action: &str, target: &RelationshipTarget) -> Accessors {
        let matcher = ResourceMatcher::new(&self.patterns, "");
        let mut accessors = Accessors::default();
        let category = ResourceCategory::Relationship;

        for effect in [Effect::Allow, Effect::Deny] {
            for policy in self.relevant(None, action, effect, category, PolicyService::Condition) {
                if condition_matches_relationship(&policy, target) {
                    accessors.collect(&policy, effect, action);
                }
            }
            for service in [PolicyService::Resource, PolicyService::Tag] {
                for policy in self.relevant(None, action, effect, category, service) {
                    if matcher.relationship_matches(&policy, target) {
                        accessors.collect(&policy, effect, action);
                    }
                }
            }
        }
        accessors
    }

    pub(crate) fn relevant(
        &self,
        user: Option<&str>,
        action: &str,
        effect: Effect,
        category: ResourceCategory,
        service: PolicyService,
    ) -> Vec<Arc<Policy>> {
        let mut query = PolicyQuery::new(service, effect)
            .action(action)
            .category(category);
        query.user = user.map(str::to_string);
        self.store.relevant_policies(&query)
    }

    pub(crate) fn record(&self, user: &str, action: &str, target: String, result: &AccessResult) {
        if let Some(audit) = &self.audit {
            audit.log(AuditRecord::new(
                user,
                action,
                target,
                result.policy_id.clone(),
                result.allowed,
            ));
        }
    }

    fn entity_match(&self, user: &str, action: &str, entity: &Entity, effect: Effect) -> Option<String> {
        let category = ResourceCategory::Entity;

        let by_condition = self
            .relevant(Some(user), action, effect, category, PolicyService::Condition)
            .into_iter()
            .find(|p| condition_matches_entity(p, entity));
        if let Some(policy) = by_condition {
            return Some(policy.display_id().to_string());
        }

        let matcher = ResourceMatcher::new(&self.patterns, user);
        [PolicyService::Resource, PolicyService::Tag]
            .into_iter()
            .flat_map(|service| self.relevant(Some(user), action, effect, category, service))
            .find(|p| matcher.entity_matches(p, entity))
            .map(|p| p.display_id().to_string())
    }

    fn relationship_match(
        &self,
        user: &str,
        action: &str,
        target: &RelationshipTarget,
        effect: Effect,
    ) -> Option<String> {
        let category = ResourceCategory::Relationship;

        let by_condition = self
            .relevant(Some(user), action, effect, category, PolicyService::Condition)
            .into_iter()
            .find(|p| condition_matches_relationship(p, target));
        if let Some(policy) = by_condition {
            return Some(policy.display_id().to_string());
        }

        let matcher = ResourceMatcher::new(&self.patterns, user);
        [PolicyService::Resource, PolicyService::Tag]
            .into_iter()
            .flat_map(|service| self.relevant(Some(user), action, effect, category, service))
            .find(|p| matcher.relationship_matches(p, target))
            .map(|p| p.display_id().to_string())
    }
}

fn condition_matches_entity(policy: &Policy, entity: &Entity) -> bool {
    FilterCriteria::of_policy(policy)
        .and_then(|c| c.entity)
        .is_some_and(|node| evaluate(&node, entity))
}

/// Both end criteria must be present and hold
fn condition_matches_relationship(policy: &Policy, target: &RelationshipTarget) -> bool {
    let Some(criteria) = FilterCriteria::of_policy(policy) else {
        return false;
    };
    match (&criteria.end_one_entity, &criteria.end_two_entity) {
        (Some(one), Some(two)) => evaluate(one, &target.end_one) && evaluate(two, &target.end_two),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PolicyItem, Role};
    use crate::store::{PolicySnapshot, SubjectResolver, SubjectSnapshot};
    use ahash::AHashMap;

    const READ: &str = "entity-read";

    fn evaluator(policies: Vec<Policy>) -> AccessEvaluator {
        let subjects = Arc::new(SubjectResolver::with_snapshot(SubjectSnapshot::new(
            vec![Role::new("analysts").with_users(["alice"])],
            AHashMap::new(),
        )));
        let store = Arc::new(PolicyStore::with_snapshot(
            subjects,
            PolicySnapshot::from_policies(policies),
        ));
        AccessEvaluator::new(store, Arc::new(PatternCache::new(64)))
    }

    fn resource(name: &str, effect: Effect, entity: &str) -> Policy {
        let mut p = Policy::new(name, PolicyService::Resource)
            .with_resource("entity", [entity])
            .with_resource("entity-type", ["*"])
            .with_item(effect, PolicyItem::for_role([READ], "analysts"));
        p.id = Some(name.to_string());
        p
    }

    fn orders() -> Entity {
        Entity::new("g1", "Table").with_qualified_name("db/schema/orders")
    }

    #[test]
    fn test_allow_by_resource_pattern() {
        let ev = evaluator(vec![resource("allow-schema", Effect::Allow, "db/schema/*")]);
        assert_eq!(
            ev.is_entity_access_allowed("alice", READ, &orders()),
            AccessResult::allow("allow-schema")
        );
        assert!(!ev.is_entity_access_allowed("bob", READ, &orders()).allowed);
    }

    #[test]
    fn test_deny_overrides_allow() {
        let ev = evaluator(vec![
            resource("allow-all", Effect::Allow, "*"),
            resource("deny-orders", Effect::Deny, "db/schema/orders"),
        ]);
        let result = ev.is_entity_access_allowed("alice", READ, &orders());
        assert!(!result.allowed);
        assert_eq!(result.policy_id.as_deref(), Some("deny-orders"));
    }

    #[test]
    fn test_condition_policy_checked_first() {
        let mut abac = Policy::new("abac-tables", PolicyService::Condition)
            .with_filter_criteria(
                r#"{"entity":{"condition":"AND","criterion":[
                    {"attributeName":"__typeName","operator":"EQUALS","attributeValue":"Table"}]}}"#,
            )
            .with_item(Effect::Allow, PolicyItem::for_role([READ], "analysts"));
        abac.id = Some("abac-tables".into());

        let ev = evaluator(vec![abac, resource("allow-schema", Effect::Allow, "db/*")]);
        assert_eq!(
            ev.is_entity_access_allowed("alice", READ, &orders()).policy_id.as_deref(),
            Some("abac-tables")
        );
    }

    #[test]
    fn test_malformed_criteria_contributes_nothing() {
        let broken = Policy::new("broken", PolicyService::Condition)
            .with_filter_criteria("{oops")
            .with_item(Effect::Deny, PolicyItem::for_role([READ], "analysts"));
        let ev = evaluator(vec![broken, resource("allow", Effect::Allow, "*")]);
        assert!(ev.is_entity_access_allowed("alice", READ, &orders()).allowed);
    }

    #[test]
    fn test_relationship_policy_ignored_for_entities() {
        let rel = resource("rel", Effect::Allow, "*").with_category(ResourceCategory::Relationship);
        let ev = evaluator(vec![rel]);
        assert!(!ev.is_entity_access_allowed("alice", READ, &orders()).allowed);
    }

    fn relationship_condition(name: &str, effect: Effect, criteria: &str) -> Policy {
        let mut p = Policy::new(name, PolicyService::Condition)
            .with_category(ResourceCategory::Relationship)
            .with_filter_criteria(criteria)
            .with_item(effect, PolicyItem::for_role([READ], "analysts"));
        p.id = Some(name.to_string());
        p
    }

    fn term_to_table() -> RelationshipTarget {
        RelationshipTarget {
            relationship_type: "AtlasGlossarySemanticAssignment".into(),
            end_one: Entity::new("t1", "AtlasGlossaryTerm").with_qualified_name("glossary/revenue"),
            end_two: orders(),
        }
    }

    const TERM_TO_TABLE: &str = r#"{
        "endOneEntity":{"condition":"AND","criterion":[
            {"attributeName":"__typeName","operator":"EQUALS","attributeValue":"AtlasGlossaryTerm"}]},
        "endTwoEntity":{"condition":"AND","criterion":[
            {"attributeName":"__typeName","operator":"EQUALS","attributeValue":"Table"}]}}"#;

    #[test]
    fn test_relationship_condition_checks_both_ends() {
        let ev = evaluator(vec![relationship_condition("term-links", Effect::Allow, TERM_TO_TABLE)]);
        assert_eq!(
            ev.is_relationship_access_allowed("alice", READ, &term_to_table()),
            AccessResult::allow("term-links")
        );

        let mut wrong_end_one = term_to_table();
        wrong_end_one.end_one = Entity::new("c1", "AtlasGlossaryCategory");
        assert_eq!(
            ev.is_relationship_access_allowed("alice", READ, &wrong_end_one),
            AccessResult::deny(None)
        );

        let mut wrong_end_two = term_to_table();
        wrong_end_two.end_two = Entity::new("v1", "View").with_qualified_name("db/schema/v");
        assert_eq!(
            ev.is_relationship_access_allowed("alice", READ, &wrong_end_two),
            AccessResult::deny(None)
        );
        assert!(!ev.is_relationship_access_allowed("bob", READ, &term_to_table()).allowed);
    }

    #[test]
    fn test_relationship_condition_needs_both_ends() {
        let one_sided = relationship_condition(
            "one-sided",
            Effect::Allow,
            r#"{"endOneEntity":{"condition":"AND","criterion":[
                {"attributeName":"__typeName","operator":"EQUALS","attributeValue":"AtlasGlossaryTerm"}]}}"#,
        );
        let ev = evaluator(vec![one_sided]);
        assert!(!ev.is_relationship_access_allowed("alice", READ, &term_to_table()).allowed);
    }

    #[test]
    fn test_relationship_deny_condition_overrides_resource_allow() {
        let allow = resource("rel-allow", Effect::Allow, "*").with_category(ResourceCategory::Relationship);
        let ev = evaluator(vec![allow.clone()]);
        assert_eq!(
            ev.is_relationship_access_allowed("alice", READ, &term_to_table()),
            AccessResult::allow("rel-allow")
        );

        let deny = relationship_condition("no-term-links", Effect::Deny, TERM_TO_TABLE);
        let ev = evaluator(vec![allow, deny]);
        assert_eq!(
            ev.is_relationship_access_allowed("alice", READ, &term_to_table()),
            AccessResult::deny(Some("no-term-links".to_string()))
        );

        let mut other = term_to_table();
        other.end_one = Entity::new("c1", "AtlasGlossaryCategory");
        assert!(ev.is_relationship_access_allowed("alice", READ, &other).allowed);
    }

    #[test]
    fn test_user_placeholder() {
        let mut p = resource("home", Effect::Allow, "home/{USER}/*");
        p.policy_items[0].users = vec!["bob".into()];
        let ev = evaluator(vec![p]);
        let mine = Entity::new("g2", "Table").with_qualified_name("home/bob/scratch");
        let theirs = Entity::new("g3", "Table").with_qualified_name("home/carol/scratch");
        assert!(ev.is_entity_access_allowed("bob", READ, &mine).allowed);
        assert!(!ev.is_entity_access_allowed("bob", READ, &theirs).allowed);
    }

    #[test]
    fn test_accessors_skip_per_user_patterns() {
        let mut home = resource("home", Effect::Allow, "home/{USER}/*");
        home.policy_items[0].users = vec!["bob".into()];
        let shared = resource("shared", Effect::Allow, "home/*");
        let ev = evaluator(vec![home, shared]);

        let scratch = Entity::new("g2", "Table").with_qualified_name("home/bob/scratch");
        assert!(ev.is_entity_access_allowed("bob", READ, &scratch).allowed);

        let accessors = ev.entity_accessors(READ, &scratch);
        assert!(accessors.roles.contains("analysts"));
        assert!(!accessors.users.contains("bob"));
    }

    #[test]
    fn test_accessors() {
        let mut grant = resource("grant", Effect::Allow, "db/*");
        grant.policy_items[0].users = vec!["carol".into()];
        let deny = resource("deny", Effect::Deny, "*");
        let ev = evaluator(vec![grant, deny]);

        let accessors = ev.entity_accessors(READ, &orders());
        assert!(accessors.users.contains("carol"));
        assert!(accessors.roles.contains("analysts"));
        assert!(accessors.denied_roles.contains("analysts"));
        assert!(accessors.denied_users.is_empty());
    }
}
