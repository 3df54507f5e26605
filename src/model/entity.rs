//! Catalog entities as seen by the evaluator

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

pub const QUALIFIED_NAME: &str = "qualifiedName";

/// Classification attached to an entity, directly or by propagation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    pub type_name: String,
    /// Entity the classification was attached to; `None` means this entity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_guid: Option<String>,
}

impl Classification {
    pub fn direct(type_name: impl Into<String>) -> Self {
        Classification {
            type_name: type_name.into(),
            entity_guid: None,
        }
    }

    pub fn propagated(type_name: impl Into<String>, from_guid: impl Into<String>) -> Self {
        Classification {
            type_name: type_name.into(),
            entity_guid: Some(from_guid.into()),
        }
    }
}

/// Entity with everything the evaluator needs resolved up front
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    #[serde(default)]
    pub guid: String,
    pub type_name: String,
    /// Ancestors of `type_name`, nearest first
    #[serde(default)]
    pub super_type_names: Vec<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
    #[serde(default)]
    pub classifications: Vec<Classification>,
    /// Display names of linked glossary terms
    #[serde(default)]
    pub meaning_names: Vec<String>,
}

impl Entity {
    pub fn new(guid: impl Into<String>, type_name: impl Into<String>) -> Self {
        Entity {
            guid: guid.into(),
            type_name: type_name.into(),
            ..Default::default()
        }
    }

    pub fn with_qualified_name(self, qualified_name: impl Into<String>) -> Self {
        self.with_attribute(QUALIFIED_NAME, Value::String(qualified_name.into()))
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    pub fn with_super_types<I, S>(mut self, super_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.super_type_names = super_types.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_classification(mut self, classification: Classification) -> Self {
        self.classifications.push(classification);
        self
    }

    pub fn qualified_name(&self) -> Option<&str> {
        self.attributes.get(QUALIFIED_NAME).and_then(Value::as_str)
    }

    /// Own type plus every ancestor
    pub fn type_and_ancestors(&self) -> BTreeSet<String> {
        std::iter::once(self.type_name.clone())
            .chain(self.super_type_names.iter().cloned())
            .collect()
    }

    /// Classification names attached to this entity itself
    pub fn direct_classifications(&self) -> Vec<String> {
        self.classifications
            .iter()
            .filter(|c| c.entity_guid.as_deref().map_or(true, |g| g.is_empty() || g == self.guid))
            .map(|c| c.type_name.clone())
            .collect()
    }

    /// Classification names inherited from another entity
    pub fn propagated_classifications(&self) -> Vec<String> {
        self.classifications
            .iter()
            .filter(|c| matches!(c.entity_guid.as_deref(), Some(g) if !g.is_empty() && g != self.guid))
            .map(|c| c.type_name.clone())
            .collect()
    }

    /// Every classification name, direct or propagated
    pub fn all_classifications(&self) -> Vec<String> {
        self.classifications.iter().map(|c| c.type_name.clone()).collect()
    }

    /// Short identity for logs and audit records
    pub fn display_target(&self) -> String {
        match self.qualified_name() {
            Some(qn) => format!("{}:{}", self.type_name, qn),
            None => format!("{}:{}", self.type_name, self.guid),
        }
    }
}

/// Operation on the relationship between two entities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipTarget {
    pub relationship_type: String,
    pub end_one: Entity,
    pub end_two: Entity,
}

impl RelationshipTarget {
    pub fn display_target(&self) -> String {
        format!(
            "{}({} -> {})",
            self.relationship_type,
            self.end_one.display_target(),
            self.end_two.display_target()
        )
    }
}
