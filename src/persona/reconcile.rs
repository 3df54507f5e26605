//! Pure policy transforms and the per-request working set
//!
//! Nothing here talks to the Policy Authority. A reconciliation loads the
//! concrete policies it touches into a [`ReconcilePlan`], applies the
//! transforms below, and only then turns the plan into [`Mutation`]s.

use crate::model::actions::{LABEL_PREFIX_PERSONA, LABEL_TYPE_PERSONA};
use crate::model::{DataMaskPolicyItem, Effect, Policy, PolicyItem, PolicyType};
use std::collections::BTreeMap;

/// One Policy Authority write
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Create(Policy),
    Update(Policy),
    Delete { id: String, name: String },
}

impl Mutation {
    /// Short label for logs and failure reports
    pub fn describe(&self) -> String {
        match self {
            Mutation::Create(p) => format!("create {}", p.name),
            Mutation::Update(p) => format!("update {}", p.display_id()),
            Mutation::Delete { id, name } => format!("delete {} ({})", id, name),
        }
    }
}

/// Outcome of removing a role from a policy
#[derive(Debug, Clone, PartialEq)]
pub enum Stripped {
    /// Nothing referenced the role or the labels
    Unchanged,
    Updated(Policy),
    /// No items remain
    Emptied(Policy),
}

/// Merge the single role item of `provisional` into `existing`
///
/// Returns `None` when `existing` already grants exactly that. An item the
/// role shares with users or groups is split rather than rewritten so the
/// other subjects keep their grant.
pub fn merge_role_item(existing: &Policy, provisional: &Policy, role: &str) -> Option<Policy> {
    let mut merged = existing.clone();

    let items_changed = if provisional.policy_type == PolicyType::DataMask {
        match provisional.data_mask_policy_items.first() {
            Some(wanted) => merge_mask_item(&mut merged.data_mask_policy_items, wanted, role),
            None => false,
        }
    } else {
        let effect = if provisional.policy_items.is_empty() {
            Effect::Deny
        } else {
            Effect::Allow
        };
        match provisional.first_item(effect) {
            Some(wanted) => merge_item(merged.items_mut(effect), wanted, role),
            None => false,
        }
    };

    let labels_changed = !provisional.labels.is_subset(&merged.labels);
    merged.labels.extend(provisional.labels.iter().cloned());

    (items_changed || labels_changed).then_some(merged)
}

fn merge_item(items: &mut Vec<PolicyItem>, wanted: &PolicyItem, role: &str) -> bool {
    let Some(pos) = items.iter().position(|i| i.has_role(role)) else {
        items.push(wanted.clone());
        return true;
    };
    if items[pos].accesses == wanted.accesses {
        return false;
    }
    if items[pos].is_shared() {
        let rest = items[pos].without_role(role);
        items[pos] = rest;
        items.push(wanted.clone());
    } else {
        items[pos].accesses = wanted.accesses.clone();
    }
    true
}

fn merge_mask_item(items: &mut Vec<DataMaskPolicyItem>, wanted: &DataMaskPolicyItem, role: &str) -> bool {
    let Some(pos) = items.iter().position(|i| i.item.has_role(role)) else {
        items.push(wanted.clone());
        return true;
    };
    let current = &items[pos];
    if current.item.accesses == wanted.item.accesses && current.data_mask_info == wanted.data_mask_info {
        return false;
    }
    if current.item.is_shared() {
        let rest = current.item.without_role(role);
        items[pos].item = rest;
        items.push(wanted.clone());
    } else {
        items[pos].item.accesses = wanted.item.accesses.clone();
        items[pos].data_mask_info = wanted.data_mask_info.clone();
    }
    true
}

/// Remove `role` from every item and drop `labels`
///
/// Items left without subjects are removed. `type:persona` goes too once no
/// persona label remains.
pub fn strip_role(policy: &Policy, role: &str, labels: &[String]) -> Stripped {
    let mut stripped = policy.clone();

    let mut items_changed = false;
    for effect in [Effect::Allow, Effect::Deny] {
        items_changed |= strip_items(stripped.items_mut(effect), role);
    }
    let before = stripped.data_mask_policy_items.len();
    let mut masks_touched = false;
    for mask in stripped.data_mask_policy_items.iter_mut() {
        if mask.item.has_role(role) {
            mask.item = mask.item.without_role(role);
            masks_touched = true;
        }
    }
    stripped.data_mask_policy_items.retain(|m| m.item.has_subjects());
    items_changed |= masks_touched || before != stripped.data_mask_policy_items.len();

    let labels_changed = strip_labels(&mut stripped, labels);

    if stripped.has_no_items() {
        Stripped::Emptied(stripped)
    } else if items_changed || labels_changed {
        Stripped::Updated(stripped)
    } else {
        Stripped::Unchanged
    }
}

fn strip_items(items: &mut Vec<PolicyItem>, role: &str) -> bool {
    let mut changed = false;
    for item in items.iter_mut() {
        if item.has_role(role) {
            *item = item.without_role(role);
            changed = true;
        }
    }
    let before = items.len();
    items.retain(PolicyItem::has_subjects);
    changed || before != items.len()
}

/// Drop `labels`, then `type:persona` if no persona label is left
pub fn strip_labels(policy: &mut Policy, labels: &[String]) -> bool {
    let before = policy.labels.len();
    for label in labels {
        policy.labels.remove(label);
    }
    let persona_left = policy
        .labels
        .iter()
        .any(|l| l.starts_with(LABEL_PREFIX_PERSONA));
    if !persona_left {
        policy.labels.remove(LABEL_TYPE_PERSONA);
    }
    before != policy.labels.len()
}

#[derive(Debug, Clone, PartialEq)]
enum State {
    Unchanged(Policy),
    Updated(Policy),
    Deleted(Policy),
}

impl State {
    fn policy(&self) -> &Policy {
        match self {
            State::Unchanged(p) | State::Updated(p) | State::Deleted(p) => p,
        }
    }
}

/// Concrete policies touched by one reconciliation, keyed by id
///
/// Later steps see the effects of earlier ones, so the same policy is never
/// written twice and a policy emptied earlier can be revived by a later
/// provisional policy with the same target.
#[derive(Debug, Default)]
pub struct ReconcilePlan {
    touched: BTreeMap<String, State>,
    creates: Vec<Policy>,
}

impl ReconcilePlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a policy read from the authority; a no-op if already tracked
    pub fn load(&mut self, policy: Policy) {
        if let Some(id) = policy.id.clone() {
            self.touched.entry(id).or_insert(State::Unchanged(policy));
        }
    }

    /// Working copy of a tracked policy, including emptied ones
    pub fn get(&self, id: &str) -> Option<&Policy> {
        self.touched.get(id).map(State::policy)
    }

    pub fn is_deleted(&self, id: &str) -> bool {
        matches!(self.touched.get(id), Some(State::Deleted(_)))
    }

    /// Record a new version of a tracked policy
    pub fn put(&mut self, policy: Policy) {
        match policy.id.clone() {
            Some(id) => {
                self.touched.insert(id, State::Updated(policy));
            }
            None => self.creates.push(policy),
        }
    }

    pub fn delete(&mut self, policy: Policy) {
        if let Some(id) = policy.id.clone() {
            self.touched.insert(id, State::Deleted(policy));
        }
    }

    pub fn create(&mut self, policy: Policy) {
        self.creates.push(policy);
    }

    /// Apply a role strip outcome to the working set
    pub fn apply(&mut self, outcome: Stripped) {
        match outcome {
            Stripped::Unchanged => {}
            Stripped::Updated(p) => self.put(p),
            Stripped::Emptied(p) => self.delete(p),
        }
    }

    /// Tracked or planned policy with the same target as `provisional`
    ///
    /// Returns the index into planned creates for untracked matches.
    pub fn find_same_target(&self, provisional: &Policy) -> Option<Target> {
        if let Some((id, _)) = self
            .touched
            .iter()
            .find(|(_, s)| s.policy().same_target(provisional))
        {
            return Some(Target::Tracked(id.clone()));
        }
        self.creates
            .iter()
            .position(|p| p.same_target(provisional))
            .map(Target::Planned)
    }

    pub fn planned(&self, index: usize) -> Option<&Policy> {
        self.creates.get(index)
    }

    pub fn replace_planned(&mut self, index: usize, policy: Policy) {
        if let Some(slot) = self.creates.get_mut(index) {
            *slot = policy;
        }
    }

    /// Writes needed to reach the planned state; unchanged policies are skipped
    pub fn into_mutations(self) -> Vec<Mutation> {
        let mut out: Vec<Mutation> = self
            .touched
            .into_iter()
            .filter_map(|(id, state)| match state {
                State::Unchanged(_) => None,
                State::Updated(p) => Some(Mutation::Update(p)),
                State::Deleted(p) => Some(Mutation::Delete { id, name: p.name }),
            })
            .collect();
        out.extend(self.creates.into_iter().map(Mutation::Create));
        out
    }
}

/// Where a same-target match lives in the plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Tracked(String),
    Planned(usize),
}
