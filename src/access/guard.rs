//! Caller-facing access checks
//!
//! Wraps the evaluator with entity resolution, search-backed checks and
//! [`AuthzError::Unauthorized`] on a negative decision.

use super::evaluator::{AccessEvaluator, AccessResult};
use super::prefilter::{DENY_SUFFIX, END_ONE_PREFIX, END_TWO_PREFIX};
use crate::authority::{with_timeout, EntitySource, SearchEngine};
use crate::error::{AuthzError, Result};
use crate::model::{Entity, RelationshipTarget};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

pub struct AccessGuard {
    evaluator: Arc<AccessEvaluator>,
    entities: Arc<dyn EntitySource>,
    search: Arc<dyn SearchEngine>,
    timeout: Duration,
}

impl AccessGuard {
    pub fn new(
        evaluator: Arc<AccessEvaluator>,
        entities: Arc<dyn EntitySource>,
        search: Arc<dyn SearchEngine>,
        timeout: Duration,
    ) -> Self {
        AccessGuard {
            evaluator,
            entities,
            search,
            timeout,
        }
    }

    pub fn evaluator(&self) -> &Arc<AccessEvaluator> {
        &self.evaluator
    }

    /// `Ok` with the deciding policy, or `Unauthorized`
    pub fn verify_entity_access(&self, user: &str, action: &str, entity: &Entity) -> Result<AccessResult> {
        let result = self.evaluator.is_entity_access_allowed(user, action, entity);
        ensure_allowed(result, user, action, || entity.display_target())
    }

    pub fn verify_relationship_access(
        &self,
        user: &str,
        action: &str,
        target: &RelationshipTarget,
    ) -> Result<AccessResult> {
        let result = self.evaluator.is_relationship_access_allowed(user, action, target);
        ensure_allowed(result, user, action, || target.display_target())
    }

    /// Resolve `guid` and its type ancestors, then verify
    #[instrument(level = "debug", skip(self))]
    pub async fn verify_entity_by_guid(&self, user: &str, action: &str, guid: &str) -> Result<AccessResult> {
        let entity = self.resolve(guid).await?;
        self.verify_entity_access(user, action, &entity)
    }

    /// Decide through the search engine's matched query names
    ///
    /// Denied when any matched name carries the deny suffix or when the
    /// entity is not a hit at all.
    #[instrument(level = "debug", skip(self))]
    pub async fn check_by_search(&self, user: &str, guid: &str, action: &str) -> Result<AccessResult> {
        let query = self.evaluator.entity_check_query(user, guid, action);
        let hits = with_timeout("access search", self.timeout, self.search.search(&query, 1)).await?;

        let matched: Vec<String> = hits
            .into_iter()
            .find(|h| h.guid == guid)
            .map(|h| h.matched_queries)
            .unwrap_or_default();
        debug!(?matched, "search access matches");

        let result = AccessEvaluator::decide_from_matches(&matched);
        self.evaluator.record(user, action, guid.to_string(), &result);
        Ok(result)
    }

    /// Search-backed relationship check
    ///
    /// A policy applies when its end-one clause matched the first end and its
    /// end-two clause matched the second. Deny policies are checked first.
    pub async fn check_relationship_by_search(
        &self,
        user: &str,
        action: &str,
        relationship_type: &str,
        end_one_guid: &str,
        end_two_guid: &str,
    ) -> Result<AccessResult> {
        let query = self.evaluator.relationship_check_query(
            user,
            action,
            relationship_type,
            end_one_guid,
            end_two_guid,
        );
        let hits = with_timeout("relationship access search", self.timeout, self.search.search(&query, 2))
            .await?;

        let names_for = |guid: &str| -> BTreeSet<String> {
            hits.iter()
                .filter(|h| h.guid == guid)
                .flat_map(|h| h.matched_queries.iter().cloned())
                .collect()
        };
        let one = names_for(end_one_guid);
        let two = names_for(end_two_guid);

        let both_ends = |deny: bool| -> Option<String> {
            one.iter()
                .filter_map(|name| name.strip_prefix(END_ONE_PREFIX))
                .filter(|id| id.ends_with(DENY_SUFFIX) == deny)
                .find(|id| two.contains(&format!("{}{}", END_TWO_PREFIX, id)))
                .map(|id| id.trim_end_matches(DENY_SUFFIX).to_string())
        };

        let result = match both_ends(true) {
            Some(id) => AccessResult::deny(Some(id)),
            None => match both_ends(false) {
                Some(id) => AccessResult::allow(id),
                None => AccessResult::deny(None),
            },
        };
        let target = format!("{}({} -> {})", relationship_type, end_one_guid, end_two_guid);
        self.evaluator.record(user, action, target, &result);
        Ok(result)
    }

    async fn resolve(&self, guid: &str) -> Result<Entity> {
        let mut entity = with_timeout("resolve entity", self.timeout, self.entities.resolve_entity(guid))
            .await?
            .ok_or_else(|| AuthzError::NotFound(format!("entity {}", guid)))?;

        if entity.super_type_names.is_empty() {
            let ancestors = with_timeout(
                "type ancestors",
                self.timeout,
                self.entities.type_ancestors(&entity.type_name),
            )
            .await?;
            entity.super_type_names = ancestors.into_iter().collect();
        }
        Ok(entity)
    }
}

fn ensure_allowed(
    result: AccessResult,
    user: &str,
    action: &str,
    target: impl FnOnce() -> String,
) -> Result<AccessResult> {
    if result.allowed {
        Ok(result)
    } else {
        Err(AuthzError::Unauthorized {
            principal: user.to_string(),
            action: action.to_string(),
            target: target(),
        })
    }
}
