//! Access decisions for entity and relationship operations
//!
//! - [`AccessEvaluator`]: in-memory deny-then-allow evaluation
//! - [`AccessGuard`]: verify wrappers and search-backed checks
//! - the pre-filter builders on [`AccessEvaluator`] for bulk search

mod evaluator;
mod guard;
mod pattern;
mod prefilter;
mod resources;

pub use evaluator::{AccessEvaluator, AccessResult, Accessors};
pub use guard::AccessGuard;
pub use pattern::PatternCache;
pub use prefilter::{clause_name, DENY_SUFFIX, END_ONE_PREFIX, END_TWO_PREFIX};
pub use resources::ResourceMatcher;
