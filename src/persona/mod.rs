//! Persona policy synthesis
//!
//! Expands user-facing persona policies into concrete Policy Authority
//! policies and keeps the two in step across create, update and delete.

mod fanout;
mod reconcile;
mod service;
mod templates;

pub use fanout::{FailedMutation, FanOut, FanOutReport};
pub use reconcile::{merge_role_item, strip_labels, strip_role, Mutation, ReconcilePlan, Stripped, Target};
pub use service::{PersonaOutcome, PersonaService, PolicyOutcome};
pub use templates::{synthesize, synthesize_actions};
