//! # persona-authz - Authorization core for a metadata catalog
//!
//! `persona-authz` decides whether a user may act on catalog entities and
//! relationships, and keeps the concrete policies behind user-facing
//! personas in step with what those personas declare:
//!
//! - **Policy store** with copy-on-refresh snapshots of resource, tag and
//!   condition policies, plus role and group resolution
//! - **Filter-criteria compiler** turning attribute condition trees into
//!   search DSL and evaluating them in memory
//! - **Access evaluator** with deny-overrides-allow semantics, search
//!   pre-filters and audit records
//! - **Persona synthesizer** expanding persona policies into concrete
//!   policies and reconciling them on every change
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use persona_authz::access::{AccessEvaluator, PatternCache};
//! use persona_authz::model::{Effect, Entity, Policy, PolicyItem, PolicyService};
//! use persona_authz::store::{PolicySnapshot, PolicyStore, SubjectResolver};
//! use std::sync::Arc;
//!
//! let policy = Policy::new("read-sales", PolicyService::Resource)
//!     .with_resource("entity", ["sales/*"])
//!     .with_resource("entity-type", ["*"])
//!     .with_item(Effect::Allow, PolicyItem { users: vec!["alice".into()], ..PolicyItem::for_role(["entity-read"], "analysts") });
//!
//! let subjects = Arc::new(SubjectResolver::new());
//! let store = Arc::new(PolicyStore::with_snapshot(subjects, PolicySnapshot::from_policies([policy])));
//! let evaluator = AccessEvaluator::new(store, Arc::new(PatternCache::new(256)));
//!
//! let entity = Entity::new("g1", "Table").with_qualified_name("sales/orders");
//! assert!(evaluator.is_entity_access_allowed("alice", "entity-read", &entity).allowed);
//! ```

pub mod access;
pub mod audit;
pub mod authority;
pub mod config;
pub mod criteria;
pub mod error;
pub mod memory;
pub mod model;
pub mod persona;
pub mod store;

pub use access::{AccessEvaluator, AccessGuard, AccessResult, Accessors, PatternCache};
pub use audit::{AuditLogger, AuditRecord, AuditSink};
pub use authority::{EntitySource, PersonaCatalog, PolicyAuthority, PolicySource, SearchEngine};
pub use config::{AuditConfig, AuthzConfig};
pub use criteria::{compile, evaluate, ConditionNode, FilterCriteria};
pub use error::{AuthzError, Result};
pub use model::{Entity, Persona, PersonaPolicy, Policy, PolicyItem, RelationshipTarget, Role};
pub use persona::{FanOutReport, PersonaService};
pub use store::{PolicyRefresher, PolicyStore, SubjectResolver};
