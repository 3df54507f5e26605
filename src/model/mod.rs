//! Domain objects shared by the store, evaluator and synthesizer

pub mod actions;
mod entity;
mod persona;
mod policy;
mod role;

pub use entity::{Classification, Entity, RelationshipTarget, QUALIFIED_NAME};
pub use persona::{EntityStatus, Persona, PersonaPolicy, PolicyCategory};
pub use policy::{
    resource_signature, DataMaskInfo, DataMaskPolicyItem, Effect, Policy, PolicyItem,
    PolicyService, PolicyType, ResourceCategory, ResourceMap,
};
pub use role::Role;
