//! Cached policy collections and relevance queries

use super::subjects::{Subject, SubjectResolver};
use crate::model::{Effect, Policy, PolicyService, ResourceCategory};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, instrument};

/// The three evaluated collections at one point in time
#[derive(Debug, Default)]
pub struct PolicySnapshot {
    resource: Vec<Arc<Policy>>,
    tag: Vec<Arc<Policy>>,
    condition: Vec<Arc<Policy>>,
}

impl PolicySnapshot {
    pub fn new(resource: Vec<Policy>, tag: Vec<Policy>, condition: Vec<Policy>) -> Self {
        let wrap = |v: Vec<Policy>| v.into_iter().map(Arc::new).collect();
        PolicySnapshot {
            resource: wrap(resource),
            tag: wrap(tag),
            condition: wrap(condition),
        }
    }

    /// Partition a mixed list by service; data policies are not evaluated here
    pub fn from_policies(policies: impl IntoIterator<Item = Policy>) -> Self {
        let mut snapshot = PolicySnapshot::default();
        for policy in policies {
            match policy.service {
                PolicyService::Resource => snapshot.resource.push(Arc::new(policy)),
                PolicyService::Tag => snapshot.tag.push(Arc::new(policy)),
                PolicyService::Condition => snapshot.condition.push(Arc::new(policy)),
                PolicyService::Data => {}
            }
        }
        snapshot
    }

    pub fn collection(&self, service: PolicyService) -> &[Arc<Policy>] {
        match service {
            PolicyService::Resource => &self.resource,
            PolicyService::Tag => &self.tag,
            PolicyService::Condition => &self.condition,
            PolicyService::Data => &[],
        }
    }

    pub fn len(&self) -> usize {
        self.resource.len() + self.tag.len() + self.condition.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Parameters of a relevance query
#[derive(Debug, Clone)]
pub struct PolicyQuery {
    pub service: PolicyService,
    pub effect: Effect,
    pub actions: Vec<String>,
    /// `None` skips subject filtering
    pub user: Option<String>,
    pub name_prefix: Option<String>,
    pub category: Option<ResourceCategory>,
}

impl PolicyQuery {
    pub fn new(service: PolicyService, effect: Effect) -> Self {
        PolicyQuery {
            service,
            effect,
            actions: Vec::new(),
            user: None,
            name_prefix: None,
            category: None,
        }
    }

    pub fn action(mut self, action: &str) -> Self {
        self.actions.push(action.to_string());
        self
    }

    pub fn actions<I, S>(mut self, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.actions.extend(actions.into_iter().map(Into::into));
        self
    }

    pub fn user(mut self, user: &str) -> Self {
        self.user = Some(user.to_string());
        self
    }

    pub fn name_prefix(mut self, prefix: &str) -> Self {
        self.name_prefix = Some(prefix.to_string());
        self
    }

    pub fn category(mut self, category: ResourceCategory) -> Self {
        self.category = Some(category);
        self
    }
}

/// Holder of the latest policy snapshot plus the subject resolver
pub struct PolicyStore {
    current: RwLock<Arc<PolicySnapshot>>,
    subjects: Arc<SubjectResolver>,
}

impl PolicyStore {
    pub fn new(subjects: Arc<SubjectResolver>) -> Self {
        PolicyStore {
            current: RwLock::new(Arc::new(PolicySnapshot::default())),
            subjects,
        }
    }

    pub fn with_snapshot(subjects: Arc<SubjectResolver>, snapshot: PolicySnapshot) -> Self {
        PolicyStore {
            current: RwLock::new(Arc::new(snapshot)),
            subjects,
        }
    }

    pub fn snapshot(&self) -> Arc<PolicySnapshot> {
        Arc::clone(&self.current.read())
    }

    pub fn publish(&self, snapshot: PolicySnapshot) {
        *self.current.write() = Arc::new(snapshot);
    }

    pub fn subjects(&self) -> &Arc<SubjectResolver> {
        &self.subjects
    }

    /// Policies of one collection relevant to a query
    ///
    /// Filters, in order:
    /// 1. enabled, and the resource category if one was requested
    /// 2. name prefix, when non-empty
    /// 3. subject: the first item of the requested effect names the user,
    ///    one of the user's groups, or one of the user's effective roles
    /// 4. actions: that same first item grants at least one requested action
    ///
    /// Only the first item is consulted; synthesized policies carry one item
    /// per role so this is sufficient for them.
    #[instrument(level = "debug", skip(self), fields(service = query.service.as_str()))]
    pub fn relevant_policies(&self, query: &PolicyQuery) -> Vec<Arc<Policy>> {
        let snapshot = self.snapshot();
        let subject = query.user.as_deref().map(|u| self.subjects.resolve(u));

        let relevant: Vec<Arc<Policy>> = snapshot
            .collection(query.service)
            .iter()
            .filter(|p| p.is_enabled)
            .filter(|p| query.category.map_or(true, |c| p.policy_resource_category == c))
            .filter(|p| match query.name_prefix.as_deref() {
                Some(prefix) if !prefix.is_empty() => p.name.starts_with(prefix),
                _ => true,
            })
            .filter(|p| subject.as_ref().map_or(true, |s| first_item_names(p, query.effect, s)))
            .filter(|p| {
                query.actions.is_empty()
                    || p.first_item(query.effect)
                        .is_some_and(|item| item.grants_any(&query.actions))
            })
            .cloned()
            .collect();

        debug!(count = relevant.len(), "relevant policies");
        relevant
    }
}

fn first_item_names(policy: &Policy, effect: Effect, subject: &Subject) -> bool {
    policy
        .first_item(effect)
        .is_some_and(|item| item.includes_subject(&subject.user, &subject.groups, &subject.roles))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PolicyItem, Role};
    use crate::store::SubjectSnapshot;
    use ahash::AHashMap;
    use std::collections::BTreeSet;

    fn store() -> PolicyStore {
        let mut groups = AHashMap::new();
        groups.insert("bob".to_string(), BTreeSet::from(["eng".to_string()]));
        let subjects = Arc::new(SubjectResolver::with_snapshot(SubjectSnapshot::new(
            vec![
                Role::new("readers").with_users(["alice"]),
                Role::new("super-readers").with_member_roles(["readers"]),
            ],
            groups,
        )));

        let by_user = Policy::new("user-read", PolicyService::Resource).with_item(
            Effect::Allow,
            PolicyItem {
                accesses: ["entity-read".to_string()].into(),
                users: vec!["carol".into()],
                ..Default::default()
            },
        );
        let by_group = Policy::new("group-update", PolicyService::Resource).with_item(
            Effect::Allow,
            PolicyItem {
                accesses: ["entity-update".to_string()].into(),
                groups: vec!["eng".into()],
                ..Default::default()
            },
        );
        let by_nested_role = Policy::new("persona-x", PolicyService::Resource)
            .with_item(Effect::Allow, PolicyItem::for_role(["entity-read"], "super-readers"));
        let deny = Policy::new("deny-delete", PolicyService::Resource)
            .with_item(Effect::Deny, PolicyItem::for_role(["entity-delete"], "readers"));
        let second_item_only = Policy::new("second", PolicyService::Resource)
            .with_item(Effect::Allow, PolicyItem::for_role(["entity-read"], "nobody"))
            .with_item(Effect::Allow, PolicyItem::for_role(["entity-read"], "readers"));
        let mut disabled = Policy::new("disabled", PolicyService::Resource)
            .with_item(Effect::Allow, PolicyItem::for_role(["entity-read"], "readers"));
        disabled.is_enabled = false;

        PolicyStore::with_snapshot(
            subjects,
            PolicySnapshot::from_policies([
                by_user,
                by_group,
                by_nested_role,
                deny,
                second_item_only,
                disabled,
            ]),
        )
    }

    fn names(policies: &[Arc<Policy>]) -> Vec<&str> {
        policies.iter().map(|p| p.name.as_str()).collect()
    }

    #[test]
    fn test_nested_role_grants_relevance() {
        let store = store();
        let q = PolicyQuery::new(PolicyService::Resource, Effect::Allow)
            .action("entity-read")
            .user("alice");
        assert_eq!(names(&store.relevant_policies(&q)), vec!["persona-x"]);
    }

    #[test]
    fn test_group_membership() {
        let store = store();
        let q = PolicyQuery::new(PolicyService::Resource, Effect::Allow)
            .action("entity-update")
            .user("bob");
        assert_eq!(names(&store.relevant_policies(&q)), vec!["group-update"]);
    }

    #[test]
    fn test_only_first_item_consulted() {
        let store = store();
        let q = PolicyQuery::new(PolicyService::Resource, Effect::Allow)
            .action("entity-read")
            .user("alice");
        assert!(!names(&store.relevant_policies(&q)).contains(&"second"));
    }

    #[test]
    fn test_effect_selects_item_list() {
        let store = store();
        let q = PolicyQuery::new(PolicyService::Resource, Effect::Deny)
            .action("entity-delete")
            .user("alice");
        assert_eq!(names(&store.relevant_policies(&q)), vec!["deny-delete"]);
    }

    #[test]
    fn test_name_prefix_and_no_user() {
        let store = store();
        let q = PolicyQuery::new(PolicyService::Resource, Effect::Allow).name_prefix("persona-");
        assert_eq!(names(&store.relevant_policies(&q)), vec!["persona-x"]);

        let everyone = PolicyQuery::new(PolicyService::Resource, Effect::Allow).action("entity-read");
        assert_eq!(
            names(&store.relevant_policies(&everyone)),
            vec!["user-read", "persona-x", "second"]
        );
    }

    #[test]
    fn test_other_collections_empty() {
        let store = store();
        let q = PolicyQuery::new(PolicyService::Tag, Effect::Allow);
        assert!(store.relevant_policies(&q).is_empty());
        assert_eq!(store.snapshot().len(), 6);
    }
}
