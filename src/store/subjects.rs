//! Subject resolution: user -> groups and effective roles

use crate::model::Role;
use ahash::AHashMap;
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Immutable view of roles and group membership
#[derive(Debug, Default)]
pub struct SubjectSnapshot {
    roles: Vec<Role>,
    user_groups: AHashMap<String, BTreeSet<String>>,
}

impl SubjectSnapshot {
    pub fn new(roles: Vec<Role>, user_groups: AHashMap<String, BTreeSet<String>>) -> Self {
        SubjectSnapshot { roles, user_groups }
    }

    pub fn roles(&self) -> &[Role] {
        &self.roles
    }

    pub fn role(&self, name: &str) -> Option<&Role> {
        self.roles.iter().find(|r| r.name == name)
    }

    pub fn groups_for(&self, user: &str) -> BTreeSet<String> {
        self.user_groups.get(user).cloned().unwrap_or_default()
    }

    /// Direct roles plus every role reachable through member-role edges
    ///
    /// A role is direct when it names the user or one of the user's groups.
    /// Closure repeats until no new role is added, so cycles terminate.
    pub fn roles_for(&self, user: &str) -> BTreeSet<String> {
        let groups = self.groups_for(user);

        let mut resolved: BTreeSet<String> = self
            .roles
            .iter()
            .filter(|r| r.has_user(user) || r.groups.iter().any(|g| groups.contains(g)))
            .map(|r| r.name.clone())
            .collect();

        loop {
            let nested: Vec<String> = self
                .roles
                .iter()
                .filter(|r| !resolved.contains(&r.name))
                .filter(|r| r.roles.iter().any(|member| resolved.contains(member)))
                .map(|r| r.name.clone())
                .collect();

            if nested.is_empty() {
                return resolved;
            }
            resolved.extend(nested);
        }
    }
}

/// Resolved subject of a request
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Subject {
    pub user: String,
    pub groups: BTreeSet<String>,
    pub roles: BTreeSet<String>,
}

/// Holder of the latest subject snapshot
///
/// Readers clone the current `Arc` and never wait on a refresh in progress;
/// the refresher swaps in a whole new snapshot.
#[derive(Debug, Default)]
pub struct SubjectResolver {
    current: RwLock<Arc<SubjectSnapshot>>,
}

impl SubjectResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: SubjectSnapshot) -> Self {
        SubjectResolver {
            current: RwLock::new(Arc::new(snapshot)),
        }
    }

    pub fn snapshot(&self) -> Arc<SubjectSnapshot> {
        Arc::clone(&self.current.read())
    }

    pub fn publish(&self, snapshot: SubjectSnapshot) {
        *self.current.write() = Arc::new(snapshot);
    }

    pub fn resolve(&self, user: &str) -> Subject {
        let snapshot = self.snapshot();
        Subject {
            user: user.to_string(),
            groups: snapshot.groups_for(user),
            roles: snapshot.roles_for(user),
        }
    }
}
