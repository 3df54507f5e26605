//! Action names, resource dimensions and labels shared with the Policy Authority
//!
//! These strings are part of the wire contract and must not change.

pub const ENTITY_READ: &str = "entity-read";
pub const ENTITY_CREATE: &str = "entity-create";
pub const ENTITY_UPDATE: &str = "entity-update";
pub const ENTITY_DELETE: &str = "entity-delete";

pub const ENTITY_READ_CLASSIFICATION: &str = "entity-read-classification";
pub const ENTITY_ADD_CLASSIFICATION: &str = "entity-add-classification";
pub const ENTITY_UPDATE_CLASSIFICATION: &str = "entity-update-classification";
pub const ENTITY_REMOVE_CLASSIFICATION: &str = "entity-remove-classification";

pub const ENTITY_ADD_LABEL: &str = "entity-add-label";
pub const ENTITY_UPDATE_LABEL: &str = "entity-update-label";
pub const ENTITY_REMOVE_LABEL: &str = "entity-remove-label";

pub const ENTITY_UPDATE_BUSINESS_METADATA: &str = "entity-update-business-metadata";

pub const ADD_TERMS: &str = "add-terms";
pub const REMOVE_TERMS: &str = "remove-terms";
pub const LINK_ASSETS: &str = "link-assets";
pub const RELATED_TERMS: &str = "related-terms";
pub const GLOSSARY_TERM_RELATIONSHIP: &str = "glossary-term-relationship";
pub const SELECT: &str = "select";

pub const ADD_RELATIONSHIP: &str = "add-relationship";
pub const UPDATE_RELATIONSHIP: &str = "update-relationship";
pub const REMOVE_RELATIONSHIP: &str = "remove-relationship";

pub const ENTITY_ACTIONS: [&str; 4] = [ENTITY_READ, ENTITY_CREATE, ENTITY_UPDATE, ENTITY_DELETE];
pub const CLASSIFICATION_ACTIONS: [&str; 3] = [
    ENTITY_ADD_CLASSIFICATION,
    ENTITY_UPDATE_CLASSIFICATION,
    ENTITY_REMOVE_CLASSIFICATION,
];
pub const LABEL_ACTIONS: [&str; 3] = [ENTITY_ADD_LABEL, ENTITY_UPDATE_LABEL, ENTITY_REMOVE_LABEL];
pub const TERM_ACTIONS: [&str; 2] = [ADD_TERMS, REMOVE_TERMS];
pub const RELATIONSHIP_ACTIONS: [&str; 3] =
    [ADD_RELATIONSHIP, UPDATE_RELATIONSHIP, REMOVE_RELATIONSHIP];

/// Actions evaluated against a single entity
pub const ENTITY_TARGET_ACTIONS: [&str; 11] = [
    ENTITY_READ,
    ENTITY_CREATE,
    ENTITY_UPDATE,
    ENTITY_DELETE,
    ENTITY_READ_CLASSIFICATION,
    ENTITY_ADD_CLASSIFICATION,
    ENTITY_UPDATE_CLASSIFICATION,
    ENTITY_REMOVE_CLASSIFICATION,
    ENTITY_UPDATE_BUSINESS_METADATA,
    ENTITY_ADD_LABEL,
    ENTITY_REMOVE_LABEL,
];

pub fn is_entity_action(action: &str) -> bool {
    ENTITY_TARGET_ACTIONS.contains(&action)
}

pub fn is_relationship_action(action: &str) -> bool {
    RELATIONSHIP_ACTIONS.contains(&action)
}

// Resource dimensions
pub const RES_ENTITY: &str = "entity";
pub const RES_ENTITY_TYPE: &str = "entity-type";
pub const RES_ENTITY_CLASSIFICATION: &str = "entity-classification";
pub const RES_ENTITY_LABEL: &str = "entity-label";
pub const RES_ENTITY_BUSINESS_METADATA: &str = "entity-business-metadata";
pub const RES_CLASSIFICATION: &str = "classification";
pub const RES_TAG: &str = "tag";
pub const RES_RELATIONSHIP_TYPE: &str = "relationship-type";
pub const RES_END_ONE_ENTITY: &str = "end-one-entity";
pub const RES_END_ONE_ENTITY_TYPE: &str = "end-one-entity-type";
pub const RES_END_ONE_ENTITY_CLASSIFICATION: &str = "end-one-entity-classification";
pub const RES_END_TWO_ENTITY: &str = "end-two-entity";
pub const RES_END_TWO_ENTITY_TYPE: &str = "end-two-entity-type";
pub const RES_END_TWO_ENTITY_CLASSIFICATION: &str = "end-two-entity-classification";

pub const WILDCARD: &str = "*";
pub const USER_PLACEHOLDER: &str = "{USER}";

// Policy labels
pub const LABEL_PREFIX_PERSONA: &str = "persona:";
pub const LABEL_PREFIX_PERSONA_POLICY: &str = "persona:policy:";
pub const LABEL_TYPE_PERSONA: &str = "type:persona";

pub fn persona_label(persona_guid: &str) -> String {
    format!("{}{}", LABEL_PREFIX_PERSONA, persona_guid)
}

pub fn persona_policy_label(policy_guid: &str) -> String {
    format!("{}{}", LABEL_PREFIX_PERSONA_POLICY, policy_guid)
}

/// Labels carried by every concrete policy synthesized for a persona policy
pub fn labels_for_persona_policy(persona_guid: &str, policy_guid: &str) -> Vec<String> {
    vec![
        persona_label(persona_guid),
        persona_policy_label(policy_guid),
        LABEL_TYPE_PERSONA.to_string(),
    ]
}

/// Role whose members administer a connection
pub fn connection_admin_role(connection_guid: &str) -> String {
    format!("connection_admins_{}", connection_guid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_formats() {
        assert_eq!(persona_label("p1"), "persona:p1");
        assert_eq!(persona_policy_label("x9"), "persona:policy:x9");
        assert_eq!(
            labels_for_persona_policy("p1", "x9"),
            vec!["persona:p1", "persona:policy:x9", "type:persona"]
        );
    }

    #[test]
    fn test_action_kinds() {
        assert!(is_entity_action(ENTITY_READ));
        assert!(is_entity_action(ENTITY_UPDATE_BUSINESS_METADATA));
        assert!(!is_entity_action(ADD_RELATIONSHIP));
        assert!(is_relationship_action(REMOVE_RELATIONSHIP));
        assert!(!is_relationship_action(LINK_ASSETS));
    }
}
