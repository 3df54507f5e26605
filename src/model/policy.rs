//! Concrete policy objects as exchanged with the Policy Authority
//!
//! A policy targets a set of objects through its resource map and grants or
//! denies accesses to subjects through its items. The resource signature is
//! the canonical identity of that target set.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

/// Resource dimension name -> ordered patterns (`*` is a wildcard)
pub type ResourceMap = BTreeMap<String, Vec<String>>;

/// Policy collection a policy belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PolicyService {
    /// Resource-pattern policies
    #[serde(rename = "atlas")]
    Resource,
    /// Tag-pattern policies
    #[serde(rename = "atlas_tag")]
    Tag,
    /// Condition-based (ABAC) policies
    #[serde(rename = "atlas_abac")]
    Condition,
    /// Data access and masking policies
    #[serde(rename = "heka")]
    Data,
}

impl PolicyService {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyService::Resource => "atlas",
            PolicyService::Tag => "atlas_tag",
            PolicyService::Condition => "atlas_abac",
            PolicyService::Data => "heka",
        }
    }
}

/// Access policies grant or deny; masking policies transform data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyType {
    #[default]
    Access,
    DataMask,
}

/// Whether a policy targets entities or relationships between entities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResourceCategory {
    #[default]
    Entity,
    Relationship,
}

/// Which item list of a policy is consulted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    /// `policyItems`
    Allow,
    /// `denyPolicyItems` (takes precedence over Allow)
    Deny,
}

/// Grant of accesses to a set of subjects
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyItem {
    #[serde(default)]
    pub accesses: BTreeSet<String>,
    #[serde(default)]
    pub users: Vec<String>,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub delegate_admin: bool,
}

impl PolicyItem {
    /// Item granting `accesses` to a single role
    pub fn for_role<I, S>(accesses: I, role: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        PolicyItem {
            accesses: accesses.into_iter().map(Into::into).collect(),
            roles: vec![role.to_string()],
            ..Default::default()
        }
    }

    /// An item with no users, groups or roles grants nothing
    pub fn has_subjects(&self) -> bool {
        !(self.users.is_empty() && self.groups.is_empty() && self.roles.is_empty())
    }

    /// Item also grants to users or groups besides its roles
    pub fn is_shared(&self) -> bool {
        !self.users.is_empty() || !self.groups.is_empty()
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// Copy of this item without `role`
    pub fn without_role(&self, role: &str) -> PolicyItem {
        PolicyItem {
            roles: self.roles.iter().filter(|r| *r != role).cloned().collect(),
            ..self.clone()
        }
    }

    /// Whether any requested action is granted
    pub fn grants_any(&self, actions: &[String]) -> bool {
        actions.iter().any(|a| self.accesses.contains(a))
    }

    /// Whether the subject is named directly or through a group or role
    pub fn includes_subject(
        &self,
        user: &str,
        groups: &BTreeSet<String>,
        roles: &BTreeSet<String>,
    ) -> bool {
        self.users.iter().any(|u| u == user)
            || self.groups.iter().any(|g| groups.contains(g))
            || self.roles.iter().any(|r| roles.contains(r))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataMaskInfo {
    pub data_mask_type: String,
}

/// Policy item of a masking policy
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataMaskPolicyItem {
    #[serde(flatten)]
    pub item: PolicyItem,
    pub data_mask_info: DataMaskInfo,
}

fn default_enabled() -> bool {
    true
}

/// Concrete policy evaluated at request time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    /// Assigned by the Policy Authority on create
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    pub name: String,

    pub service: PolicyService,

    #[serde(default)]
    pub policy_type: PolicyType,

    #[serde(default)]
    pub policy_resource_category: ResourceCategory,

    #[serde(default)]
    pub resources: ResourceMap,

    #[serde(default)]
    pub policy_items: Vec<PolicyItem>,

    #[serde(default)]
    pub deny_policy_items: Vec<PolicyItem>,

    #[serde(default)]
    pub data_mask_policy_items: Vec<DataMaskPolicyItem>,

    /// Raw condition tree JSON, condition-based policies only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_criteria: Option<String>,

    #[serde(default, rename = "policyLabels")]
    pub labels: BTreeSet<String>,

    #[serde(default = "default_enabled")]
    pub is_enabled: bool,
}

impl Policy {
    /// Create an empty, enabled access policy
    pub fn new(name: impl Into<String>, service: PolicyService) -> Self {
        Policy {
            id: None,
            name: name.into(),
            service,
            policy_type: PolicyType::Access,
            policy_resource_category: ResourceCategory::Entity,
            resources: ResourceMap::new(),
            policy_items: Vec::new(),
            deny_policy_items: Vec::new(),
            data_mask_policy_items: Vec::new(),
            filter_criteria: None,
            labels: BTreeSet::new(),
            is_enabled: true,
        }
    }

    /// Builder-style resource dimension
    pub fn with_resource<I, S>(mut self, dimension: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.resources.insert(
            dimension.to_string(),
            values.into_iter().map(Into::into).collect(),
        );
        self
    }

    pub fn with_item(mut self, effect: Effect, item: PolicyItem) -> Self {
        self.items_mut(effect).push(item);
        self
    }

    pub fn with_category(mut self, category: ResourceCategory) -> Self {
        self.policy_resource_category = category;
        self
    }

    pub fn with_filter_criteria(mut self, criteria: impl Into<String>) -> Self {
        self.filter_criteria = Some(criteria.into());
        self
    }

    /// Id if assigned, else name; used in logs and audit records
    pub fn display_id(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.name)
    }

    pub fn items(&self, effect: Effect) -> &[PolicyItem] {
        match effect {
            Effect::Allow => &self.policy_items,
            Effect::Deny => &self.deny_policy_items,
        }
    }

    pub fn items_mut(&mut self, effect: Effect) -> &mut Vec<PolicyItem> {
        match effect {
            Effect::Allow => &mut self.policy_items,
            Effect::Deny => &mut self.deny_policy_items,
        }
    }

    /// First item of the given effect; the only one consulted for relevance
    pub fn first_item(&self, effect: Effect) -> Option<&PolicyItem> {
        self.items(effect).first()
    }

    /// A policy with no allow, deny or mask items must be deleted
    pub fn has_no_items(&self) -> bool {
        self.policy_items.is_empty()
            && self.deny_policy_items.is_empty()
            && self.data_mask_policy_items.is_empty()
    }

    /// Every declared dimension is the bare wildcard
    pub fn is_all_wildcard(&self) -> bool {
        self.resources
            .values()
            .all(|values| values.iter().any(|v| v == "*"))
    }

    pub fn resource(&self, dimension: &str) -> Option<&[String]> {
        self.resources.get(dimension).map(Vec::as_slice)
    }

    /// Canonical digest of the resource map
    pub fn resource_signature(&self) -> String {
        resource_signature(&self.resources)
    }

    /// Same resource signature, policy type and service
    pub fn same_target(&self, other: &Policy) -> bool {
        self.policy_type == other.policy_type
            && self.service == other.service
            && self.resource_signature() == other.resource_signature()
    }
}

/// Hex SHA-256 over the sorted dimensions and sorted values
///
/// Independent of dimension insertion order and of value order within a
/// dimension, so two maps describing the same object set always agree.
pub fn resource_signature(resources: &ResourceMap) -> String {
    let canonical: BTreeMap<&str, Vec<&str>> = resources
        .iter()
        .map(|(dimension, values)| {
            let mut sorted: Vec<&str> = values.iter().map(String::as_str).collect();
            sorted.sort_unstable();
            (dimension.as_str(), sorted)
        })
        .collect();

    let mut hasher = Sha256::new();
    for (dimension, values) in &canonical {
        hasher.update(dimension.as_bytes());
        hasher.update([0x1f]);
        for value in values {
            hasher.update((value.len() as u64).to_le_bytes());
            hasher.update(value.as_bytes());
        }
        hasher.update([0x1e]);
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Policy {
        Policy::new("CRUD-1", PolicyService::Resource)
            .with_resource("entity-type", ["Process", "Catalog"])
            .with_resource("entity", ["db/schema", "db/schema/*"])
            .with_item(
                Effect::Allow,
                PolicyItem::for_role(["entity-read"], "tenant/p1"),
            )
    }

    #[test]
    fn test_signature_ignores_value_order() {
        let a = sample();
        let b = Policy::new("other", PolicyService::Resource)
            .with_resource("entity", ["db/schema/*", "db/schema"])
            .with_resource("entity-type", ["Catalog", "Process"]);

        assert_eq!(a.resource_signature(), b.resource_signature());
    }

    #[test]
    fn test_signature_distinguishes_dimensions() {
        let a = Policy::new("a", PolicyService::Resource).with_resource("entity", ["x"]);
        let b = Policy::new("b", PolicyService::Resource).with_resource("entity-type", ["x"]);
        assert_ne!(a.resource_signature(), b.resource_signature());

        // value boundaries are length-prefixed
        let c = Policy::new("c", PolicyService::Resource).with_resource("entity", ["ab", "c"]);
        let d = Policy::new("d", PolicyService::Resource).with_resource("entity", ["a", "bc"]);
        assert_ne!(c.resource_signature(), d.resource_signature());
    }

    #[test]
    fn test_same_target_checks_type_and_service() {
        let a = sample();
        let mut b = sample();
        assert!(a.same_target(&b));

        b.policy_type = PolicyType::DataMask;
        assert!(!a.same_target(&b));

        let mut c = sample();
        c.service = PolicyService::Data;
        assert!(!a.same_target(&c));
    }

    #[test]
    fn test_item_subjects() {
        let item = PolicyItem::for_role(["entity-read"], "r1");
        assert!(item.has_subjects());
        assert!(!item.is_shared());
        assert!(!item.without_role("r1").has_subjects());

        let shared = PolicyItem {
            users: vec!["bob".into()],
            ..item.clone()
        };
        assert!(shared.is_shared());
        assert!(shared.without_role("r1").has_subjects());
    }

    #[test]
    fn test_includes_subject() {
        let item = PolicyItem {
            users: vec!["alice".into()],
            groups: vec!["eng".into()],
            roles: vec!["admins".into()],
            ..Default::default()
        };
        let none = BTreeSet::new();
        let eng: BTreeSet<String> = ["eng".to_string()].into();
        let admins: BTreeSet<String> = ["admins".to_string()].into();

        assert!(item.includes_subject("alice", &none, &none));
        assert!(item.includes_subject("bob", &eng, &none));
        assert!(item.includes_subject("bob", &none, &admins));
        assert!(!item.includes_subject("bob", &none, &none));
    }

    #[test]
    fn test_all_wildcard() {
        let p = Policy::new("all", PolicyService::Resource)
            .with_resource("entity", ["*"])
            .with_resource("entity-type", ["*"]);
        assert!(p.is_all_wildcard());
        assert!(!sample().is_all_wildcard());
    }

    #[test]
    fn test_wire_format() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["service"], "atlas");
        assert_eq!(json["policyType"], "access");
        assert_eq!(json["policyResourceCategory"], "ENTITY");
        assert!(json["policyItems"].is_array());
        assert!(json.get("id").is_none());

        let parsed: Policy = serde_json::from_value(serde_json::json!({
            "name": "mask",
            "service": "heka",
            "policyType": "datamask",
            "dataMaskPolicyItems": [{
                "accesses": ["select"],
                "roles": ["r"],
                "dataMaskInfo": {"dataMaskType": "MASK_HASH"}
            }]
        }))
        .unwrap();
        assert_eq!(parsed.service, PolicyService::Data);
        assert!(parsed.is_enabled);
        assert_eq!(parsed.data_mask_policy_items[0].item.roles, vec!["r"]);
        assert_eq!(
            parsed.data_mask_policy_items[0].data_mask_info.data_mask_type,
            "MASK_HASH"
        );
    }
}
