//! Expansion of a persona policy into provisional concrete policies
//!
//! Actions are grouped into fixed families. Every family with at least one
//! requested action yields exactly one provisional policy, built from the
//! family's dimension template and the persona policy's assets. Each one
//! carries the persona labels and a single item whose only role is the
//! persona's role.

use crate::model::actions::{
    self, labels_for_persona_policy, ADD_RELATIONSHIP, ADD_TERMS, CLASSIFICATION_ACTIONS,
    ENTITY_ACTIONS, ENTITY_CREATE, ENTITY_UPDATE_BUSINESS_METADATA, GLOSSARY_TERM_RELATIONSHIP,
    LABEL_ACTIONS, LINK_ASSETS, RELATED_TERMS, RELATIONSHIP_ACTIONS, REMOVE_RELATIONSHIP, SELECT,
    TERM_ACTIONS, WILDCARD,
};
use crate::model::{
    DataMaskInfo, DataMaskPolicyItem, Persona, PersonaPolicy, Policy, PolicyCategory, PolicyItem,
    PolicyType, ResourceCategory,
};
use std::collections::BTreeSet;
use uuid::Uuid;

const METADATA_TYPES: [&str; 2] = ["Process", "Catalog"];
const GLOSSARY_TYPES: [&str; 3] = ["AtlasGlossary", "AtlasGlossaryTerm", "AtlasGlossaryCategory"];
const GLOSSARY_TERM_TYPE: &str = "AtlasGlossaryTerm";
const LINKABLE_TYPES: [&str; 7] = [
    "Catalog",
    "Connection",
    "Dataset",
    "Infrastructure",
    "Process",
    "ProcessExecution",
    "Namespace",
];

/// Provisional policies for every action of `policy`
pub fn synthesize(persona: &Persona, policy: &PersonaPolicy) -> Vec<Policy> {
    synthesize_actions(persona, policy, &policy.actions)
}

/// Provisional policies for a subset of actions
///
/// Used with removed actions to find the concrete policies they lived in.
pub fn synthesize_actions(
    persona: &Persona,
    policy: &PersonaPolicy,
    actions: &BTreeSet<String>,
) -> Vec<Policy> {
    let builder = Builder { persona, policy };
    match policy.category {
        PolicyCategory::Metadata => builder.metadata(actions),
        PolicyCategory::Glossary => builder.glossary(actions),
        PolicyCategory::Data => builder.data(),
    }
}

struct Builder<'a> {
    persona: &'a Persona,
    policy: &'a PersonaPolicy,
}

impl Builder<'_> {
    fn metadata(&self, actions: &BTreeSet<String>) -> Vec<Policy> {
        let assets = hierarchical_assets(&self.policy.assets);
        let types: Vec<&str> = if self.persona.is_type_unrestricted() {
            vec![WILDCARD]
        } else {
            METADATA_TYPES.to_vec()
        };
        let entity_scoped = |name: &str| {
            self.base(name)
                .with_resource(actions::RES_ENTITY_TYPE, types.iter().copied())
                .with_resource(actions::RES_ENTITY_CLASSIFICATION, [WILDCARD])
                .with_resource(actions::RES_ENTITY, assets.iter().cloned())
        };

        let mut out = Vec::new();

        let crud = requested(actions, &ENTITY_ACTIONS);
        if !crud.is_empty() {
            out.push(self.grant(entity_scoped("CRUD-"), crud));
        }

        let classification = requested(actions, &CLASSIFICATION_ACTIONS);
        if !classification.is_empty() {
            let p = entity_scoped("classification-")
                .with_resource(actions::RES_CLASSIFICATION, [WILDCARD]);
            out.push(self.grant(p, classification));
        }

        if actions.contains(ENTITY_UPDATE_BUSINESS_METADATA) {
            let p = entity_scoped("entity-business-metadata-")
                .with_resource(actions::RES_ENTITY_BUSINESS_METADATA, [WILDCARD]);
            out.push(self.grant(p, vec![ENTITY_UPDATE_BUSINESS_METADATA]));
        }

        let terms = requested(actions, &TERM_ACTIONS);
        if !terms.is_empty() {
            let accesses = terms
                .iter()
                .map(|a| match *a {
                    ADD_TERMS => ADD_RELATIONSHIP,
                    _ => REMOVE_RELATIONSHIP,
                })
                .collect();
            let p = self
                .relationship("terms-")
                .with_resource(actions::RES_END_ONE_ENTITY, [WILDCARD])
                .with_resource(actions::RES_END_ONE_ENTITY_TYPE, [GLOSSARY_TERM_TYPE])
                .with_resource(actions::RES_END_ONE_ENTITY_CLASSIFICATION, [WILDCARD])
                .with_resource(actions::RES_END_TWO_ENTITY, assets.iter().cloned())
                .with_resource(actions::RES_END_TWO_ENTITY_TYPE, [WILDCARD])
                .with_resource(actions::RES_END_TWO_ENTITY_CLASSIFICATION, [WILDCARD]);
            out.push(self.grant(p, accesses));
        }

        if actions.contains(LINK_ASSETS) {
            let p = self
                .relationship("link-assets-")
                .with_resource(actions::RES_END_ONE_ENTITY, assets.iter().cloned())
                .with_resource(actions::RES_END_ONE_ENTITY_TYPE, [WILDCARD])
                .with_resource(actions::RES_END_ONE_ENTITY_CLASSIFICATION, [WILDCARD])
                .with_resource(actions::RES_END_TWO_ENTITY, [WILDCARD])
                .with_resource(actions::RES_END_TWO_ENTITY_TYPE, LINKABLE_TYPES)
                .with_resource(actions::RES_END_TWO_ENTITY_CLASSIFICATION, [WILDCARD]);
            out.push(self.grant(p, vec![ADD_RELATIONSHIP, REMOVE_RELATIONSHIP]));
        }

        out
    }

    fn glossary(&self, actions: &BTreeSet<String>) -> Vec<Policy> {
        let assets: Vec<String> = self
            .policy
            .assets
            .iter()
            .map(|a| format!("*{}*", a))
            .collect();
        let glossary_scoped = |name: &str| {
            self.base(name)
                .with_resource(actions::RES_ENTITY_TYPE, GLOSSARY_TYPES)
                .with_resource(actions::RES_ENTITY_CLASSIFICATION, [WILDCARD])
                .with_resource(actions::RES_ENTITY, assets.iter().cloned())
        };
        let both_ends = |name: &str, one: &[String], two: &[String]| {
            self.relationship(name)
                .with_resource(actions::RES_END_ONE_ENTITY, one.iter().cloned())
                .with_resource(actions::RES_END_ONE_ENTITY_TYPE, [WILDCARD])
                .with_resource(actions::RES_END_ONE_ENTITY_CLASSIFICATION, [WILDCARD])
                .with_resource(actions::RES_END_TWO_ENTITY, two.iter().cloned())
                .with_resource(actions::RES_END_TWO_ENTITY_TYPE, [WILDCARD])
                .with_resource(actions::RES_END_TWO_ENTITY_CLASSIFICATION, [WILDCARD])
        };
        let any = [WILDCARD.to_string()];

        let mut out = Vec::new();

        if actions.contains(ENTITY_CREATE) || actions.contains(GLOSSARY_TERM_RELATIONSHIP) {
            let p = both_ends("Glossary-term-relationship-", &assets, &assets);
            out.push(self.grant(p, RELATIONSHIP_ACTIONS.to_vec()));
        }

        let crud = requested(actions, &ENTITY_ACTIONS);
        if !crud.is_empty() {
            out.push(self.grant(glossary_scoped("Glossary-"), crud));
        }

        let labels = requested(actions, &LABEL_ACTIONS);
        if !labels.is_empty() {
            let p = glossary_scoped("Glossary-labels-")
                .with_resource(actions::RES_ENTITY_LABEL, [WILDCARD]);
            out.push(self.grant(p, labels));
        }

        let classification = requested(actions, &CLASSIFICATION_ACTIONS);
        if !classification.is_empty() {
            let p = glossary_scoped("Glossary-classification-")
                .with_resource(actions::RES_CLASSIFICATION, [WILDCARD]);
            out.push(self.grant(p, classification));
        }

        if actions.contains(ENTITY_UPDATE_BUSINESS_METADATA) {
            let p = glossary_scoped("Glossary-entity-business-metadata-")
                .with_resource(actions::RES_ENTITY_BUSINESS_METADATA, [WILDCARD]);
            out.push(self.grant(p, vec![ENTITY_UPDATE_BUSINESS_METADATA]));
        }

        let link = actions.contains(LINK_ASSETS);
        if link {
            let p = both_ends("Glossary-relationship-", &assets, &any);
            out.push(self.grant(p, RELATIONSHIP_ACTIONS.to_vec()));
        }

        // linking assets to a term always brings the related-terms family along
        if link || actions.contains(RELATED_TERMS) {
            let p = both_ends("Glossary-related-terms-", &any, &assets);
            out.push(self.grant(p, RELATIONSHIP_ACTIONS.to_vec()));
        }

        out
    }

    fn data(&self) -> Vec<Policy> {
        let mask = self.policy.mask_type.as_deref().filter(|m| !m.is_empty());
        let name = if mask.is_some() { "dataPolicy-mask" } else { "dataPolicy-" };

        let mut policy = self
            .base(name)
            .with_resource(actions::RES_ENTITY_TYPE, [WILDCARD])
            .with_resource(actions::RES_ENTITY, self.policy.assets.iter().cloned());

        match mask {
            Some(mask_type) => {
                policy.policy_type = PolicyType::DataMask;
                policy.data_mask_policy_items.push(DataMaskPolicyItem {
                    item: PolicyItem::for_role([SELECT], self.persona.role_name()),
                    data_mask_info: DataMaskInfo {
                        data_mask_type: mask_type.to_string(),
                    },
                });
                vec![policy]
            }
            None => vec![self.grant(policy, vec![SELECT])],
        }
    }

    fn base(&self, prefix: &str) -> Policy {
        let mut policy = Policy::new(format!("{}{}", prefix, Uuid::new_v4()), self.policy.service());
        policy.labels = labels_for_persona_policy(&self.persona.guid, &self.policy.guid)
            .into_iter()
            .collect();
        policy
    }

    fn relationship(&self, prefix: &str) -> Policy {
        self.base(prefix)
            .with_category(ResourceCategory::Relationship)
            .with_resource(actions::RES_RELATIONSHIP_TYPE, [WILDCARD])
    }

    fn grant(&self, policy: Policy, accesses: Vec<&str>) -> Policy {
        let item = PolicyItem::for_role(accesses, self.persona.role_name());
        policy.with_item(self.policy.effect(), item)
    }
}

/// Each asset covers itself and everything below it
fn hierarchical_assets(assets: &[String]) -> Vec<String> {
    assets
        .iter()
        .cloned()
        .chain(assets.iter().map(|a| format!("{}/*", a)))
        .collect()
}

fn requested<'f>(actions: &BTreeSet<String>, family: &[&'f str]) -> Vec<&'f str> {
    family
        .iter()
        .copied()
        .filter(|a| actions.contains(*a))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Effect, EntityStatus, PolicyService};

    fn persona(name: &str) -> Persona {
        let mut p = Persona::new(name);
        p.guid = "persona-1".into();
        p.qualified_name = "tenant/abc".into();
        p
    }

    fn persona_policy(category: PolicyCategory, actions: &[&str], assets: &[&str]) -> PersonaPolicy {
        PersonaPolicy {
            guid: "pp-1".into(),
            persona_guid: "persona-1".into(),
            name: "policy".into(),
            qualified_name: String::new(),
            category,
            actions: actions.iter().map(|a| a.to_string()).collect(),
            assets: assets.iter().map(|a| a.to_string()).collect(),
            connection_id: Some("conn".into()),
            allow: true,
            mask_type: None,
            status: EntityStatus::Active,
        }
    }

    fn values<'p>(policy: &'p Policy, dimension: &str) -> Vec<&'p str> {
        policy
            .resource(dimension)
            .unwrap_or(&[])
            .iter()
            .map(String::as_str)
            .collect()
    }

    #[test]
    fn test_metadata_crud_family() {
        let pp = persona_policy(
            PolicyCategory::Metadata,
            &["entity-read", "entity-create"],
            &["db/schema"],
        );
        let out = synthesize(&persona("analysts"), &pp);
        assert_eq!(out.len(), 1);

        let p = &out[0];
        assert!(p.name.starts_with("CRUD-"));
        assert_eq!(p.service, PolicyService::Resource);
        assert_eq!(values(p, "entity-type"), vec!["Process", "Catalog"]);
        assert_eq!(values(p, "entity"), vec!["db/schema", "db/schema/*"]);
        assert_eq!(p.policy_items.len(), 1);
        assert_eq!(
            p.policy_items[0].accesses,
            ["entity-read".to_string(), "entity-create".to_string()].into()
        );
        assert_eq!(p.policy_items[0].roles, vec!["tenant/abc"]);
        assert!(p.labels.contains("persona:persona-1"));
        assert!(p.labels.contains("persona:policy:pp-1"));
        assert!(p.labels.contains("type:persona"));
    }

    #[test]
    fn test_unrestricted_persona_types() {
        let pp = persona_policy(PolicyCategory::Metadata, &["entity-read"], &["db"]);
        let out = synthesize(&persona("connection-admins"), &pp);
        assert_eq!(values(&out[0], "entity-type"), vec!["*"]);
    }

    #[test]
    fn test_metadata_families() {
        let pp = persona_policy(
            PolicyCategory::Metadata,
            &[
                "entity-add-classification",
                "entity-update-business-metadata",
                "add-terms",
                "remove-terms",
                "link-assets",
            ],
            &["db"],
        );
        let out = synthesize(&persona("analysts"), &pp);
        let names: Vec<&str> = out
            .iter()
            .map(|p| p.name.rsplitn(6, '-').last().unwrap_or(""))
            .collect();
        assert_eq!(
            names,
            vec!["classification", "entity-business-metadata", "terms", "link-assets"]
        );

        let terms = &out[2];
        assert_eq!(terms.policy_resource_category, ResourceCategory::Relationship);
        assert_eq!(values(terms, "end-one-entity-type"), vec!["AtlasGlossaryTerm"]);
        assert_eq!(values(terms, "end-two-entity"), vec!["db", "db/*"]);
        assert_eq!(
            terms.policy_items[0].accesses,
            ["add-relationship".to_string(), "remove-relationship".to_string()].into()
        );

        let link = &out[3];
        assert_eq!(values(link, "end-one-entity"), vec!["db", "db/*"]);
        assert_eq!(values(link, "end-two-entity-type").len(), 7);
    }

    #[test]
    fn test_glossary_link_assets_brings_related_terms() {
        let pp = persona_policy(PolicyCategory::Glossary, &["link-assets"], &["g1"]);
        let out = synthesize(&persona("analysts"), &pp);
        assert_eq!(out.len(), 2);
        assert!(out[0].name.starts_with("Glossary-relationship-"));
        assert_eq!(values(&out[0], "end-one-entity"), vec!["*g1*"]);
        assert!(out[1].name.starts_with("Glossary-related-terms-"));
        assert_eq!(values(&out[1], "end-two-entity"), vec!["*g1*"]);
    }

    #[test]
    fn test_glossary_create_adds_term_relationship() {
        let pp = persona_policy(
            PolicyCategory::Glossary,
            &["entity-create", "entity-add-label"],
            &["g1"],
        );
        let out = synthesize(&persona("analysts"), &pp);
        let prefixes: Vec<bool> = vec![
            out[0].name.starts_with("Glossary-term-relationship-"),
            out[1].name.starts_with("Glossary-") && values(&out[1], "entity-label").is_empty(),
            out[2].name.starts_with("Glossary-labels-"),
        ];
        assert_eq!(prefixes, vec![true, true, true]);
        assert_eq!(
            values(&out[1], "entity-type"),
            vec!["AtlasGlossary", "AtlasGlossaryTerm", "AtlasGlossaryCategory"]
        );
    }

    #[test]
    fn test_data_policies() {
        let mut pp = persona_policy(PolicyCategory::Data, &["select"], &["db/t1"]);
        pp.allow = false;
        let out = synthesize(&persona("analysts"), &pp);
        assert_eq!(out[0].service, PolicyService::Data);
        assert!(out[0].name.starts_with("dataPolicy-"));
        assert_eq!(out[0].items(Effect::Deny).len(), 1);

        pp.mask_type = Some("MASK_HASH".into());
        let masked = synthesize(&persona("analysts"), &pp);
        assert!(masked[0].name.starts_with("dataPolicy-mask"));
        assert_eq!(masked[0].policy_type, PolicyType::DataMask);
        assert_eq!(
            masked[0].data_mask_policy_items[0].data_mask_info.data_mask_type,
            "MASK_HASH"
        );
        assert!(masked[0].policy_items.is_empty());
    }

    #[test]
    fn test_deny_goes_to_deny_items() {
        let mut pp = persona_policy(PolicyCategory::Metadata, &["entity-delete"], &["db"]);
        pp.allow = false;
        let out = synthesize(&persona("analysts"), &pp);
        assert!(out[0].policy_items.is_empty());
        assert_eq!(out[0].deny_policy_items.len(), 1);
    }
}
