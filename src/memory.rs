//! In-memory collaborators
//!
//! Used by tests, benches and the CLI dry-run. [`MemorySearchEngine`]
//! interprets the subset of the query DSL this crate emits over a set of
//! entities indexed the way [`attribute_values`] reads them.

use crate::authority::{
    EntitySource, Page, PersonaCatalog, PolicyAuthority, PolicySource, SearchEngine, SearchHit,
};
use crate::criteria::attribute_values;
use crate::error::{AuthzError, Result};
use crate::model::{Entity, Persona, PersonaPolicy, Policy, PolicyService, ResourceMap, Role};
use ahash::AHashMap;
use async_trait::async_trait;
use parking_lot::Mutex;
use regex::Regex;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use uuid::Uuid;

#[derive(Debug, Default)]
struct AuthorityState {
    policies: BTreeMap<String, Policy>,
    roles: BTreeMap<String, Role>,
    user_groups: AHashMap<String, BTreeSet<String>>,
    next_id: u64,
    failing: BTreeSet<String>,
}

impl AuthorityState {
    fn next_id(&mut self, kind: &str) -> String {
        self.next_id += 1;
        format!("{}-{:04}", kind, self.next_id)
    }

    fn check_failure(&self, operation: &str, name: &str) -> Result<()> {
        if self.failing.contains(name) {
            return Err(AuthzError::authority(operation, format!("injected failure for {}", name)));
        }
        Ok(())
    }
}

/// Policy Authority and policy source backed by maps
#[derive(Debug, Default)]
pub struct MemoryPolicyAuthority {
    state: Mutex<AuthorityState>,
    mutations: AtomicUsize,
}

impl MemoryPolicyAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store policies as-is, assigning ids where missing; not counted as mutations
    pub fn seed(&self, policies: impl IntoIterator<Item = Policy>) {
        let mut state = self.state.lock();
        for mut policy in policies {
            let id = match &policy.id {
                Some(id) => id.clone(),
                None => state.next_id("policy"),
            };
            policy.id = Some(id.clone());
            state.policies.insert(id, policy);
        }
    }

    pub fn seed_role(&self, role: Role) -> Role {
        let mut state = self.state.lock();
        let mut role = role;
        let id = role.id.clone().unwrap_or_else(|| state.next_id("role"));
        role.id = Some(id.clone());
        state.roles.insert(id, role.clone());
        role
    }

    pub fn set_user_groups(&self, user: &str, groups: impl IntoIterator<Item = String>) {
        self.state
            .lock()
            .user_groups
            .insert(user.to_string(), groups.into_iter().collect());
    }

    /// Make every create/update/delete of the named policy fail
    pub fn fail_on(&self, policy_name: &str) {
        self.state.lock().failing.insert(policy_name.to_string());
    }

    pub fn clear_failures(&self) {
        self.state.lock().failing.clear();
    }

    /// Policy creates, updates and deletes performed so far
    pub fn mutation_count(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    pub fn policies(&self) -> Vec<Policy> {
        self.state.lock().policies.values().cloned().collect()
    }

    pub fn policy(&self, id: &str) -> Option<Policy> {
        self.state.lock().policies.get(id).cloned()
    }

    pub fn roles(&self) -> Vec<Role> {
        self.state.lock().roles.values().cloned().collect()
    }

    fn mutated(&self) {
        self.mutations.fetch_add(1, Ordering::SeqCst);
    }
}

fn paginate<T>(items: Vec<T>, page: Page) -> Vec<T> {
    items.into_iter().skip(page.offset).take(page.limit).collect()
}

/// Every requested dimension is present and shares at least one value
fn overlaps(candidate: &ResourceMap, requested: &ResourceMap) -> bool {
    requested.iter().all(|(dimension, values)| {
        candidate
            .get(dimension)
            .is_some_and(|have| values.iter().any(|v| have.contains(v)))
    })
}

#[async_trait]
impl PolicyAuthority for MemoryPolicyAuthority {
    async fn create_policy(&self, policy: &Policy) -> Result<Policy> {
        let mut state = self.state.lock();
        state.check_failure("create policy", &policy.name)?;
        let mut created = policy.clone();
        let id = state.next_id("policy");
        created.id = Some(id.clone());
        state.policies.insert(id, created.clone());
        drop(state);
        self.mutated();
        Ok(created)
    }

    async fn update_policy(&self, policy: &Policy) -> Result<Policy> {
        let id = policy
            .id
            .clone()
            .ok_or_else(|| AuthzError::authority("update policy", "policy has no id"))?;
        let mut state = self.state.lock();
        state.check_failure("update policy", &policy.name)?;
        if !state.policies.contains_key(&id) {
            return Err(AuthzError::authority("update policy", format!("no policy {}", id)));
        }
        state.policies.insert(id, policy.clone());
        drop(state);
        self.mutated();
        Ok(policy.clone())
    }

    async fn delete_policy(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock();
        let name = state.policies.get(id).map(|p| p.name.clone()).unwrap_or_default();
        state.check_failure("delete policy", &name)?;
        if state.policies.remove(id).is_none() {
            return Err(AuthzError::authority("delete policy", format!("no policy {}", id)));
        }
        drop(state);
        self.mutated();
        Ok(())
    }

    async fn list_by_label(&self, label: &str, page: Page) -> Result<Vec<Policy>> {
        let matching: Vec<Policy> = self
            .state
            .lock()
            .policies
            .values()
            .filter(|p| p.labels.contains(label))
            .cloned()
            .collect();
        Ok(paginate(matching, page))
    }

    async fn list_by_resources(
        &self,
        service: PolicyService,
        resources: &ResourceMap,
        page: Page,
    ) -> Result<Vec<Policy>> {
        let matching: Vec<Policy> = self
            .state
            .lock()
            .policies
            .values()
            .filter(|p| p.service == service && overlaps(&p.resources, resources))
            .cloned()
            .collect();
        Ok(paginate(matching, page))
    }

    async fn create_role(&self, role: &Role) -> Result<Role> {
        let mut state = self.state.lock();
        if state.roles.values().any(|r| r.name == role.name) {
            return Err(AuthzError::authority("create role", format!("role {} exists", role.name)));
        }
        let mut created = role.clone();
        let id = state.next_id("role");
        created.id = Some(id.clone());
        state.roles.insert(id, created.clone());
        Ok(created)
    }

    async fn update_role(&self, role: &Role) -> Result<Role> {
        let id = role
            .id
            .clone()
            .ok_or_else(|| AuthzError::authority("update role", "role has no id"))?;
        let mut state = self.state.lock();
        if !state.roles.contains_key(&id) {
            return Err(AuthzError::authority("update role", format!("no role {}", id)));
        }
        state.roles.insert(id, role.clone());
        Ok(role.clone())
    }

    async fn delete_role(&self, id: &str) -> Result<()> {
        self.state.lock().roles.remove(id);
        Ok(())
    }

    async fn get_role(&self, id: &str) -> Result<Option<Role>> {
        Ok(self.state.lock().roles.get(id).cloned())
    }
}

#[async_trait]
impl PolicySource for MemoryPolicyAuthority {
    async fn fetch_policies(&self, service: PolicyService) -> Result<Vec<Policy>> {
        Ok(self
            .state
            .lock()
            .policies
            .values()
            .filter(|p| p.service == service)
            .cloned()
            .collect())
    }

    async fn fetch_roles(&self) -> Result<Vec<Role>> {
        Ok(self.roles())
    }

    async fn fetch_user_groups(&self) -> Result<AHashMap<String, BTreeSet<String>>> {
        Ok(self.state.lock().user_groups.clone())
    }
}

/// Entities and the type hierarchy
#[derive(Debug, Default)]
pub struct MemoryEntitySource {
    entities: Mutex<BTreeMap<String, Entity>>,
    /// type -> direct parents
    parents: Mutex<BTreeMap<String, Vec<String>>>,
}

impl MemoryEntitySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, entity: Entity) {
        self.entities.lock().insert(entity.guid.clone(), entity);
    }

    pub fn define_type<I, S>(&self, type_name: &str, parents: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.parents
            .lock()
            .insert(type_name.to_string(), parents.into_iter().map(Into::into).collect());
    }
}

#[async_trait]
impl EntitySource for MemoryEntitySource {
    async fn resolve_entity(&self, guid: &str) -> Result<Option<Entity>> {
        Ok(self.entities.lock().get(guid).cloned())
    }

    async fn resolve_by_qualified_name(
        &self,
        type_name: &str,
        qualified_name: &str,
    ) -> Result<Option<Entity>> {
        Ok(self
            .entities
            .lock()
            .values()
            .find(|e| e.type_name == type_name && e.qualified_name() == Some(qualified_name))
            .cloned())
    }

    async fn type_ancestors(&self, type_name: &str) -> Result<BTreeSet<String>> {
        let parents = self.parents.lock();
        let mut seen = BTreeSet::new();
        let mut pending: Vec<&str> = vec![type_name];
        while let Some(current) = pending.pop() {
            for parent in parents.get(current).into_iter().flatten() {
                if seen.insert(parent.clone()) {
                    pending.push(parent);
                }
            }
        }
        seen.remove(type_name);
        Ok(seen)
    }
}

/// Search engine over indexed entities
#[derive(Debug, Default)]
pub struct MemorySearchEngine {
    documents: Mutex<Vec<Entity>>,
}

impl MemorySearchEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn index(&self, entity: Entity) {
        self.documents.lock().push(entity);
    }
}

#[async_trait]
impl SearchEngine for MemorySearchEngine {
    async fn search(&self, query: &Value, size: usize) -> Result<Vec<SearchHit>> {
        let documents = self.documents.lock();
        let mut hits = Vec::new();
        for doc in documents.iter() {
            let mut names = Vec::new();
            if query_matches(query, doc, &mut names)? {
                names.sort();
                names.dedup();
                hits.push(SearchHit {
                    guid: doc.guid.clone(),
                    matched_queries: names,
                });
                if hits.len() >= size {
                    break;
                }
            }
        }
        Ok(hits)
    }
}

/// Evaluate a query against one document, collecting matched `_name`s
///
/// Supports `bool` (`filter`, `must`, `should`, `must_not`,
/// `minimum_should_match`), `term`, `terms`, `wildcard` and `match_all`.
pub fn query_matches(query: &Value, doc: &Entity, names: &mut Vec<String>) -> Result<bool> {
    let object = query
        .as_object()
        .ok_or_else(|| AuthzError::Search(format!("query is not an object: {}", query)))?;
    let (kind, body) = object
        .iter()
        .next()
        .ok_or_else(|| AuthzError::Search("empty query".into()))?;

    let matched = match kind.as_str() {
        "match_all" => true,
        "bool" => bool_matches(body, doc, names)?,
        "term" => {
            let (field, value) = single_field(body)?;
            let expected = scalar(value)?;
            attribute_values(doc, field).contains(&expected)
        }
        "terms" => {
            let (field, values) = single_field(body)?;
            let expected: Vec<String> = values
                .as_array()
                .ok_or_else(|| AuthzError::Search("terms expects an array".into()))?
                .iter()
                .map(scalar)
                .collect::<Result<_>>()?;
            attribute_values(doc, field).iter().any(|v| expected.contains(v))
        }
        "wildcard" => {
            let (field, pattern) = single_field(body)?;
            let regex = wildcard_regex(&scalar(pattern)?)?;
            attribute_values(doc, field).iter().any(|v| regex.is_match(v))
        }
        other => return Err(AuthzError::Search(format!("unsupported query kind {}", other))),
    };

    if matched {
        if let Some(name) = body.get("_name").and_then(Value::as_str) {
            names.push(name.to_string());
        }
    }
    Ok(matched)
}

fn bool_matches(body: &Value, doc: &Entity, names: &mut Vec<String>) -> Result<bool> {
    let clauses = |key: &str| -> Vec<&Value> {
        match body.get(key) {
            Some(Value::Array(items)) => items.iter().collect(),
            Some(single) => vec![single],
            None => Vec::new(),
        }
    };

    let mut ok = true;
    for clause in clauses("filter").into_iter().chain(clauses("must")) {
        ok &= query_matches(clause, doc, names)?;
    }
    for clause in clauses("must_not") {
        let mut ignored = Vec::new();
        ok &= !query_matches(clause, doc, &mut ignored)?;
    }

    let should = clauses("should");
    let has_required = body.get("filter").is_some() || body.get("must").is_some();
    let minimum = match body.get("minimum_should_match").and_then(Value::as_u64) {
        Some(n) => n as usize,
        None if should.is_empty() || has_required => 0,
        None => 1,
    };
    let mut satisfied = 0;
    for clause in should {
        if query_matches(clause, doc, names)? {
            satisfied += 1;
        }
    }
    Ok(ok && satisfied >= minimum)
}

fn single_field(body: &Value) -> Result<(&str, &Value)> {
    body.as_object()
        .and_then(|o| o.iter().find(|(k, _)| k.as_str() != "_name"))
        .map(|(k, v)| (k.as_str(), v))
        .ok_or_else(|| AuthzError::Search(format!("expected one field in {}", body)))
}

fn scalar(value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Object(o) => o
            .get("value")
            .map(scalar)
            .unwrap_or_else(|| Err(AuthzError::Search(format!("no value in {}", value)))),
        other => Err(AuthzError::Search(format!("not a scalar: {}", other))),
    }
}

/// `*` any run, `?` one character, `\` escapes the next character
fn wildcard_regex(pattern: &str) -> Result<Regex> {
    let mut source = String::from("^(?s:");
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '*' => source.push_str(".*"),
            '?' => source.push('.'),
            '\\' => {
                if let Some(escaped) = chars.next() {
                    source.push_str(&regex::escape(&escaped.to_string()));
                }
            }
            other => source.push_str(&regex::escape(&other.to_string())),
        }
    }
    source.push_str(")$");
    Regex::new(&source).map_err(|e| AuthzError::Search(e.to_string()))
}

#[derive(Debug, Default)]
struct CatalogState {
    personas: BTreeMap<String, Persona>,
    policies: BTreeMap<String, PersonaPolicy>,
}

/// Persona and persona-policy storage
#[derive(Debug, Default)]
pub struct MemoryPersonaCatalog {
    state: Mutex<CatalogState>,
}

impl MemoryPersonaCatalog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PersonaCatalog for MemoryPersonaCatalog {
    async fn get_persona(&self, guid: &str) -> Result<Option<Persona>> {
        Ok(self.state.lock().personas.get(guid).cloned())
    }

    async fn list_personas(&self) -> Result<Vec<Persona>> {
        Ok(self.state.lock().personas.values().cloned().collect())
    }

    async fn save_persona(&self, persona: &Persona) -> Result<Persona> {
        let mut saved = persona.clone();
        if saved.guid.is_empty() {
            saved.guid = Uuid::new_v4().to_string();
        }
        self.state
            .lock()
            .personas
            .insert(saved.guid.clone(), saved.clone());
        Ok(saved)
    }

    async fn delete_persona(&self, guid: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.personas.remove(guid);
        state.policies.retain(|_, p| p.persona_guid != guid);
        Ok(())
    }

    async fn get_persona_policy(&self, guid: &str) -> Result<Option<PersonaPolicy>> {
        Ok(self.state.lock().policies.get(guid).cloned())
    }

    async fn persona_policies(&self, persona_guid: &str) -> Result<Vec<PersonaPolicy>> {
        Ok(self
            .state
            .lock()
            .policies
            .values()
            .filter(|p| p.persona_guid == persona_guid)
            .cloned()
            .collect())
    }

    async fn save_persona_policy(&self, policy: &PersonaPolicy) -> Result<PersonaPolicy> {
        let mut saved = policy.clone();
        if saved.guid.is_empty() {
            saved.guid = Uuid::new_v4().to_string();
        }
        self.state
            .lock()
            .policies
            .insert(saved.guid.clone(), saved.clone());
        Ok(saved)
    }

    async fn delete_persona_policy(&self, guid: &str) -> Result<()> {
        self.state.lock().policies.remove(guid);
        Ok(())
    }
}
