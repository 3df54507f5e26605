//! Personas and the user-facing policies attached to them

use crate::error::{AuthzError, Result};
use crate::model::policy::{Effect, PolicyService, PolicyType};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeSet;
use validator::{Validate, ValidationError, ValidationErrors};

/// Lifecycle status of a catalog object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntityStatus {
    #[default]
    Active,
    Deleted,
}

/// Named grouping of subjects backed by one authority role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Persona {
    #[serde(default)]
    pub guid: String,

    #[validate(length(min = 1, message = "Please provide a name for the persona"))]
    pub name: String,

    /// `<tenant>/<uuid>`; doubles as the authority role name
    #[serde(default)]
    pub qualified_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,

    #[serde(default = "enabled_by_default")]
    pub enabled: bool,

    /// Authority role id, set once the role exists
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_id: Option<String>,

    #[serde(default)]
    pub users: Vec<String>,

    #[serde(default)]
    pub groups: Vec<String>,

    #[serde(default)]
    pub status: EntityStatus,
}

fn enabled_by_default() -> bool {
    true
}

impl Persona {
    pub fn new(name: impl Into<String>) -> Self {
        Persona {
            guid: String::new(),
            name: name.into(),
            qualified_name: String::new(),
            tenant_id: None,
            enabled: true,
            role_id: None,
            users: Vec::new(),
            groups: Vec::new(),
            status: EntityStatus::Active,
        }
    }

    /// Name of the authority role carrying this persona's grants
    pub fn role_name(&self) -> &str {
        &self.qualified_name
    }

    pub fn is_active(&self) -> bool {
        self.status == EntityStatus::Active
    }

    /// Collection and connection personas are not restricted by entity type
    pub fn is_type_unrestricted(&self) -> bool {
        self.name.starts_with("collection") || self.name.starts_with("connection")
    }
}

/// Which template set a persona policy synthesizes with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyCategory {
    Metadata,
    Glossary,
    Data,
}

impl PolicyCategory {
    /// Connection id is mandatory for asset-scoped categories
    pub fn requires_connection(&self) -> bool {
        matches!(self, PolicyCategory::Metadata | PolicyCategory::Data)
    }
}

/// User-facing statement of actions over assets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
#[validate(schema(function = "validate_connection", skip_on_field_errors = false))]
pub struct PersonaPolicy {
    #[serde(default)]
    pub guid: String,

    pub persona_guid: String,

    #[validate(length(min = 1, message = "Please provide a name for persona policy"))]
    pub name: String,

    #[serde(default)]
    pub qualified_name: String,

    pub category: PolicyCategory,

    #[validate(length(min = 1, message = "Please provide actions for persona policy"))]
    pub actions: BTreeSet<String>,

    #[validate(length(min = 1, message = "Please provide assets for persona policy"))]
    pub assets: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,

    #[serde(default = "enabled_by_default")]
    pub allow: bool,

    /// Data category only; presence makes this a masking policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask_type: Option<String>,

    #[serde(default)]
    pub status: EntityStatus,
}

fn validate_connection(policy: &PersonaPolicy) -> std::result::Result<(), ValidationError> {
    let missing = policy
        .connection_id
        .as_deref()
        .map_or(true, |id| id.trim().is_empty());

    if policy.category.requires_connection() && missing {
        let mut err = ValidationError::new("connection_id");
        err.message = Some(Cow::Borrowed(
            "Please provide connectionGuid for persona policy",
        ));
        return Err(err);
    }
    Ok(())
}

impl PersonaPolicy {
    pub fn is_active(&self) -> bool {
        self.status == EntityStatus::Active
    }

    pub fn is_data_mask(&self) -> bool {
        self.category == PolicyCategory::Data
            && self.mask_type.as_deref().is_some_and(|m| !m.is_empty())
    }

    pub fn effect(&self) -> Effect {
        if self.allow {
            Effect::Allow
        } else {
            Effect::Deny
        }
    }

    pub fn policy_type(&self) -> PolicyType {
        if self.is_data_mask() {
            PolicyType::DataMask
        } else {
            PolicyType::Access
        }
    }

    pub fn service(&self) -> PolicyService {
        match self.category {
            PolicyCategory::Data => PolicyService::Data,
            _ => PolicyService::Resource,
        }
    }

    /// Field-level checks, reported as one validation error
    pub fn check(&self) -> Result<()> {
        self.validate()
            .map_err(|e| AuthzError::Validation(describe(&e)))
    }

    /// Asset lists compared as sets
    pub fn same_assets(&self, other: &PersonaPolicy) -> bool {
        let a: BTreeSet<&String> = self.assets.iter().collect();
        let b: BTreeSet<&String> = other.assets.iter().collect();
        a == b
    }

    /// Mask type added or removed (a change between two mask types is not)
    pub fn mask_kind_changed(&self, prior: &PersonaPolicy) -> bool {
        self.category == PolicyCategory::Data && self.is_data_mask() != prior.is_data_mask()
    }
}

fn describe(errors: &ValidationErrors) -> String {
    let mut messages: Vec<String> = errors
        .field_errors()
        .values()
        .flat_map(|errs| errs.iter())
        .map(|e| {
            e.message
                .as_ref()
                .map(|m| m.to_string())
                .unwrap_or_else(|| e.code.to_string())
        })
        .collect();
    messages.sort();
    messages.join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata_policy() -> PersonaPolicy {
        PersonaPolicy {
            guid: "pp1".into(),
            persona_guid: "p1".into(),
            name: "read schema".into(),
            qualified_name: String::new(),
            category: PolicyCategory::Metadata,
            actions: ["entity-read".to_string()].into(),
            assets: vec!["db/schema".into()],
            connection_id: Some("conn1".into()),
            allow: true,
            mask_type: None,
            status: EntityStatus::Active,
        }
    }

    #[test]
    fn test_valid_policy_passes() {
        assert!(metadata_policy().check().is_ok());
    }

    #[test]
    fn test_missing_actions_rejected() {
        let mut policy = metadata_policy();
        policy.actions.clear();
        let err = policy.check().unwrap_err();
        assert!(err.to_string().contains("actions"));
    }

    #[test]
    fn test_missing_assets_rejected() {
        let mut policy = metadata_policy();
        policy.assets.clear();
        assert!(matches!(policy.check(), Err(AuthzError::Validation(_))));
    }

    #[test]
    fn test_connection_required_for_metadata_and_data() {
        let mut policy = metadata_policy();
        policy.connection_id = None;
        let err = policy.check().unwrap_err();
        assert!(err.to_string().contains("connectionGuid"));

        policy.category = PolicyCategory::Data;
        assert!(policy.check().is_err());

        policy.category = PolicyCategory::Glossary;
        assert!(policy.check().is_ok());
    }

    #[test]
    fn test_mask_kind() {
        let mut policy = metadata_policy();
        policy.category = PolicyCategory::Data;
        assert!(!policy.is_data_mask());
        assert_eq!(policy.policy_type(), PolicyType::Access);
        assert_eq!(policy.service(), PolicyService::Data);

        let prior = policy.clone();
        policy.mask_type = Some("MASK_HASH".into());
        assert!(policy.is_data_mask());
        assert!(policy.mask_kind_changed(&prior));

        let mut other_mask = policy.clone();
        other_mask.mask_type = Some("MASK_NULL".into());
        assert!(!other_mask.mask_kind_changed(&policy));
    }

    #[test]
    fn test_same_assets_ignores_order() {
        let mut a = metadata_policy();
        a.assets = vec!["x".into(), "y".into()];
        let mut b = a.clone();
        b.assets = vec!["y".into(), "x".into()];
        assert!(a.same_assets(&b));

        b.assets.push("z".into());
        assert!(!a.same_assets(&b));
    }

    #[test]
    fn test_type_unrestricted_personas() {
        assert!(Persona::new("collection-finance").is_type_unrestricted());
        assert!(Persona::new("connection-snowflake").is_type_unrestricted());
        assert!(!Persona::new("analysts").is_type_unrestricted());
    }
}
