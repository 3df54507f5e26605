//! Static resource-pattern matching for resource and tag policies

use super::pattern::PatternCache;
use crate::model::actions::{
    RES_ENTITY, RES_ENTITY_BUSINESS_METADATA, RES_ENTITY_CLASSIFICATION, RES_ENTITY_TYPE,
    RES_RELATIONSHIP_TYPE, RES_TAG, WILDCARD,
};
use crate::model::{Entity, Policy, RelationshipTarget};

const END_ONE: &str = "end-one-";
const END_TWO: &str = "end-two-";

/// Matches policy resource maps against targets for one user
pub struct ResourceMatcher<'a> {
    patterns: &'a PatternCache,
    user: &'a str,
}

impl<'a> ResourceMatcher<'a> {
    pub fn new(patterns: &'a PatternCache, user: &'a str) -> Self {
        ResourceMatcher { patterns, user }
    }

    /// Every declared dimension admits the entity
    pub fn entity_matches(&self, policy: &Policy, entity: &Entity) -> bool {
        if policy.is_all_wildcard() {
            return true;
        }
        policy
            .resources
            .iter()
            .all(|(dimension, values)| self.dimension_matches(dimension, values, entity))
    }

    /// Relationship type plus both ends admit the target
    ///
    /// `end-one-*` dimensions are checked against the first end and
    /// `end-two-*` against the second; unknown dimensions are ignored.
    pub fn relationship_matches(&self, policy: &Policy, target: &RelationshipTarget) -> bool {
        if policy.is_all_wildcard() {
            return true;
        }
        policy.resources.iter().all(|(dimension, values)| {
            if has_wildcard(values) {
                return true;
            }
            if dimension == RES_RELATIONSHIP_TYPE {
                return self.any_pattern(values, [target.relationship_type.as_str()]);
            }
            if let Some(rest) = dimension.strip_prefix(END_ONE) {
                return self.dimension_matches(rest, values, &target.end_one);
            }
            if let Some(rest) = dimension.strip_prefix(END_TWO) {
                return self.dimension_matches(rest, values, &target.end_two);
            }
            true
        })
    }

    fn dimension_matches(&self, dimension: &str, values: &[String], entity: &Entity) -> bool {
        if has_wildcard(values) {
            return true;
        }
        match dimension {
            RES_ENTITY | RES_ENTITY_BUSINESS_METADATA => match entity.qualified_name() {
                Some(qn) => self.any_pattern(values, [qn]),
                None => false,
            },
            RES_ENTITY_TYPE => {
                let types = entity.type_and_ancestors();
                self.any_pattern(values, types.iter().map(String::as_str))
            }
            RES_TAG | RES_ENTITY_CLASSIFICATION => {
                let tags = entity.all_classifications();
                self.any_pattern(values, tags.iter().map(String::as_str))
            }
            _ => true,
        }
    }

    fn any_pattern<'v, I>(&self, patterns: &[String], values: I) -> bool
    where
        I: IntoIterator<Item = &'v str>,
    {
        self.patterns.matches_any(patterns, values, self.user)
    }
}

fn has_wildcard(values: &[String]) -> bool {
    values.iter().any(|v| v == WILDCARD)
}
