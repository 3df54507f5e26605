//! Shared fixtures for integration tests

#![allow(dead_code)]

use ahash::AHashMap;
use persona_authz::access::{AccessEvaluator, PatternCache};
use persona_authz::memory::{MemoryPersonaCatalog, MemoryPolicyAuthority};
use persona_authz::model::{
    Classification, Effect, Entity, EntityStatus, Persona, PersonaPolicy, Policy, PolicyCategory,
    PolicyItem, PolicyService, Role,
};
use persona_authz::persona::PersonaService;
use persona_authz::store::{PolicySnapshot, PolicyStore, SubjectResolver, SubjectSnapshot};
use persona_authz::AuthzConfig;
use std::collections::BTreeSet;
use std::sync::Arc;

pub const ADMIN: &str = "admin";
pub const CONNECTION: &str = "conn-1";

/// Roles: `analysts` holds alice, `engineers` holds the `eng` group
pub fn subjects() -> Arc<SubjectResolver> {
    let roles = vec![
        Role::new("analysts").with_users(["alice"]),
        Role::new("engineers").with_groups(["eng"]),
        Role::new(format!("connection_admins_{}", CONNECTION)).with_users([ADMIN]),
    ];
    let mut groups = AHashMap::new();
    groups.insert("bob".to_string(), BTreeSet::from(["eng".to_string()]));
    Arc::new(SubjectResolver::with_snapshot(SubjectSnapshot::new(roles, groups)))
}

pub fn evaluator(policies: Vec<Policy>) -> AccessEvaluator {
    let store = PolicyStore::with_snapshot(subjects(), PolicySnapshot::from_policies(policies));
    AccessEvaluator::new(Arc::new(store), Arc::new(PatternCache::new(256)))
}

/// Resource policy granting `action` to a role over `entity` patterns
pub fn resource_policy(id: &str, effect: Effect, role: &str, action: &str, entity: &[&str]) -> Policy {
    let mut policy = Policy::new(id, PolicyService::Resource)
        .with_resource("entity", entity.iter().copied())
        .with_resource("entity-type", ["*"])
        .with_resource("entity-classification", ["*"])
        .with_item(effect, PolicyItem::for_role([action], role));
    policy.id = Some(id.to_string());
    policy
}

pub fn table(guid: &str, qualified_name: &str) -> Entity {
    Entity::new(guid, "Table")
        .with_qualified_name(qualified_name)
        .with_super_types(["SQL", "Catalog", "Asset"])
}

pub fn classified(guid: &str, qualified_name: &str, tag: &str) -> Entity {
    table(guid, qualified_name).with_classification(Classification::direct(tag))
}

pub fn persona_policy(
    persona_guid: &str,
    name: &str,
    category: PolicyCategory,
    actions: &[&str],
    assets: &[&str],
) -> PersonaPolicy {
    PersonaPolicy {
        guid: String::new(),
        persona_guid: persona_guid.to_string(),
        name: name.to_string(),
        qualified_name: String::new(),
        category,
        actions: actions.iter().map(|a| a.to_string()).collect(),
        assets: assets.iter().map(|a| a.to_string()).collect(),
        connection_id: Some(CONNECTION.to_string()),
        allow: true,
        mask_type: None,
        status: EntityStatus::Active,
    }
}

/// Persona service over in-memory collaborators
pub struct Harness {
    pub authority: Arc<MemoryPolicyAuthority>,
    pub catalog: Arc<MemoryPersonaCatalog>,
    pub service: PersonaService,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(AuthzConfig {
            search_page_size: 2,
            ..AuthzConfig::default()
        })
    }

    pub fn with_config(config: AuthzConfig) -> Self {
        let authority = Arc::new(MemoryPolicyAuthority::new());
        let catalog = Arc::new(MemoryPersonaCatalog::new());
        let service = PersonaService::new(authority.clone(), catalog.clone(), subjects(), &config);
        Harness {
            authority,
            catalog,
            service,
        }
    }

    pub async fn persona(&self, name: &str) -> Persona {
        let mut persona = Persona::new(name);
        persona.users = vec!["alice".to_string()];
        self.service
            .create_persona(persona)
            .await
            .expect("persona created")
    }

    /// Concrete policies carrying `label`
    pub fn labeled(&self, label: &str) -> Vec<Policy> {
        self.authority
            .policies()
            .into_iter()
            .filter(|p| p.labels.contains(label))
            .collect()
    }
}
