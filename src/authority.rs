//! Collaborator boundaries
//!
//! The crate never talks to a concrete backend. Everything external sits
//! behind one of these traits:
//! - [`PolicyAuthority`]: durable owner of concrete policies and roles
//! - [`PolicySource`]: bulk reads feeding the refresher
//! - [`EntitySource`]: entity and type-hierarchy lookups
//! - [`SearchEngine`]: bulk search with named clauses
//! - [`PersonaCatalog`]: storage of personas and persona policies
//!
//! "Not found" is `Ok(None)`; `Err` is reserved for failed calls.

use crate::error::{AuthzError, Result};
use crate::model::{Entity, Persona, PersonaPolicy, Policy, PolicyService, ResourceMap, Role};
use ahash::AHashMap;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;

/// Offset/limit window of a paginated listing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

impl Page {
    pub fn first(limit: usize) -> Self {
        Page { offset: 0, limit }
    }

    pub fn next(self) -> Self {
        Page {
            offset: self.offset + self.limit,
            limit: self.limit,
        }
    }
}

#[async_trait]
pub trait PolicyAuthority: Send + Sync {
    /// Create a policy; the returned copy carries the assigned id
    async fn create_policy(&self, policy: &Policy) -> Result<Policy>;

    /// Replace a policy wholesale; there is no field-level update
    async fn update_policy(&self, policy: &Policy) -> Result<Policy>;

    async fn delete_policy(&self, id: &str) -> Result<()>;

    /// Policies carrying `label`
    async fn list_by_label(&self, label: &str, page: Page) -> Result<Vec<Policy>>;

    /// Policies of `service` whose resources include the given values
    ///
    /// Results are candidates; callers compare signatures for exact matches.
    async fn list_by_resources(
        &self,
        service: PolicyService,
        resources: &ResourceMap,
        page: Page,
    ) -> Result<Vec<Policy>>;

    async fn create_role(&self, role: &Role) -> Result<Role>;

    async fn update_role(&self, role: &Role) -> Result<Role>;

    async fn delete_role(&self, id: &str) -> Result<()>;

    async fn get_role(&self, id: &str) -> Result<Option<Role>>;
}

/// Bulk reads backing the policy store refresh
#[async_trait]
pub trait PolicySource: Send + Sync {
    async fn fetch_policies(&self, service: PolicyService) -> Result<Vec<Policy>>;

    async fn fetch_roles(&self) -> Result<Vec<Role>>;

    /// user -> group names
    async fn fetch_user_groups(&self) -> Result<AHashMap<String, BTreeSet<String>>>;
}

#[async_trait]
pub trait EntitySource: Send + Sync {
    async fn resolve_entity(&self, guid: &str) -> Result<Option<Entity>>;

    async fn resolve_by_qualified_name(
        &self,
        type_name: &str,
        qualified_name: &str,
    ) -> Result<Option<Entity>>;

    /// Every ancestor of `type_name`, excluding the type itself
    async fn type_ancestors(&self, type_name: &str) -> Result<BTreeSet<String>>;
}

/// One search hit with the names of the clauses it satisfied
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub guid: String,
    #[serde(default)]
    pub matched_queries: Vec<String>,
}

#[async_trait]
pub trait SearchEngine: Send + Sync {
    async fn search(&self, query: &Value, size: usize) -> Result<Vec<SearchHit>>;
}

#[async_trait]
pub trait PersonaCatalog: Send + Sync {
    async fn get_persona(&self, guid: &str) -> Result<Option<Persona>>;

    async fn list_personas(&self) -> Result<Vec<Persona>>;

    /// Insert or replace; an empty guid is assigned on insert
    async fn save_persona(&self, persona: &Persona) -> Result<Persona>;

    async fn delete_persona(&self, guid: &str) -> Result<()>;

    async fn get_persona_policy(&self, guid: &str) -> Result<Option<PersonaPolicy>>;

    async fn persona_policies(&self, persona_guid: &str) -> Result<Vec<PersonaPolicy>>;

    async fn save_persona_policy(&self, policy: &PersonaPolicy) -> Result<PersonaPolicy>;

    async fn delete_persona_policy(&self, guid: &str) -> Result<()>;
}

/// Run `call` under a deadline, mapping expiry to [`AuthzError::Timeout`]
pub async fn with_timeout<T, F>(operation: &str, after: Duration, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(after, call).await {
        Ok(result) => result,
        Err(_) => Err(AuthzError::Timeout {
            operation: operation.to_string(),
            after,
        }),
    }
}

/// Drain every page of a label listing
pub async fn list_all_by_label(
    authority: &dyn PolicyAuthority,
    label: &str,
    page_size: usize,
) -> Result<Vec<Policy>> {
    let mut page = Page::first(page_size.max(1));
    let mut all = Vec::new();
    loop {
        let batch = authority.list_by_label(label, page).await?;
        let done = batch.len() < page.limit;
        all.extend(batch);
        if done {
            return Ok(all);
        }
        page = page.next();
    }
}

/// First existing policy with exactly the same target as `provisional`
///
/// Pages through resource-lookup candidates until one has the same
/// resource signature, policy type and service.
pub async fn find_same_target(
    authority: &dyn PolicyAuthority,
    provisional: &Policy,
    page_size: usize,
) -> Result<Option<Policy>> {
    let mut page = Page::first(page_size.max(1));
    loop {
        let batch = authority
            .list_by_resources(provisional.service, &provisional.resources, page)
            .await?;
        let done = batch.len() < page.limit;
        if let Some(found) = batch.into_iter().find(|p| p.same_target(provisional)) {
            return Ok(Some(found));
        }
        if done {
            return Ok(None);
        }
        page = page.next();
    }
}
