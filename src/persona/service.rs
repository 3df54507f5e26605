//! Persona and persona-policy lifecycle
//!
//! Every operation validates first, then builds a [`ReconcilePlan`] from
//! reads against the Policy Authority, and finally applies the planned
//! writes through a [`FanOut`]. Read failures abort the request before any
//! write is issued; write failures land in the returned [`FanOutReport`].

use super::fanout::{FanOut, FanOutReport};
use super::reconcile::{merge_role_item, strip_role, ReconcilePlan, Target};
use super::templates::{synthesize, synthesize_actions};
use crate::authority::{find_same_target, list_all_by_label, PersonaCatalog, PolicyAuthority};
use crate::config::AuthzConfig;
use crate::error::{AuthzError, Result};
use crate::model::actions::{connection_admin_role, persona_label, persona_policy_label};
use crate::model::{Persona, PersonaPolicy, Policy, Role};
use crate::store::SubjectResolver;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;
use validator::Validate;

/// Saved persona policy plus what happened to its concrete policies
#[derive(Debug, Clone)]
pub struct PolicyOutcome {
    pub policy: PersonaPolicy,
    pub report: FanOutReport,
}

/// Saved persona plus what happened to its concrete policies
#[derive(Debug, Clone)]
pub struct PersonaOutcome {
    pub persona: Persona,
    pub report: FanOutReport,
}

pub struct PersonaService {
    authority: Arc<dyn PolicyAuthority>,
    catalog: Arc<dyn PersonaCatalog>,
    subjects: Arc<SubjectResolver>,
    fan_out: FanOut,
    page_size: usize,
    default_tenant: String,
}

impl PersonaService {
    pub fn new(
        authority: Arc<dyn PolicyAuthority>,
        catalog: Arc<dyn PersonaCatalog>,
        subjects: Arc<SubjectResolver>,
        config: &AuthzConfig,
    ) -> Self {
        let fan_out = FanOut::new(
            Arc::clone(&authority),
            config.worker_pool_size,
            config.authority_timeout(),
        );
        PersonaService {
            authority,
            catalog,
            subjects,
            fan_out,
            page_size: config.search_page_size,
            default_tenant: config.default_tenant.clone(),
        }
    }

    /// Create a persona and its authority role
    #[instrument(skip(self, persona), fields(name = %persona.name))]
    pub async fn create_persona(&self, persona: Persona) -> Result<Persona> {
        persona
            .validate()
            .map_err(|e| AuthzError::Validation(e.to_string()))?;
        self.ensure_unique_persona_name(&persona.name, None).await?;

        let mut persona = persona;
        let tenant = persona
            .tenant_id
            .clone()
            .unwrap_or_else(|| self.default_tenant.clone());
        persona.qualified_name = format!("{}/{}", tenant, Uuid::new_v4());

        let role = Role::new(persona.role_name())
            .with_users(persona.users.iter().cloned())
            .with_groups(persona.groups.iter().cloned());
        let role = self.authority.create_role(&role).await?;
        persona.role_id = role.id;

        let saved = self.catalog.save_persona(&persona).await?;
        info!(guid = %saved.guid, role = %saved.role_name(), "persona created");
        Ok(saved)
    }

    /// Rename, toggle or change membership of a persona
    ///
    /// Disabling removes the persona's role from every labeled policy;
    /// enabling synthesizes all its active persona policies again.
    #[instrument(skip(self, update), fields(guid = %update.guid))]
    pub async fn update_persona(&self, update: Persona) -> Result<PersonaOutcome> {
        update
            .validate()
            .map_err(|e| AuthzError::Validation(e.to_string()))?;
        let existing = self.require_persona(&update.guid).await?;
        if !existing.is_active() {
            return Err(AuthzError::Validation(format!(
                "persona {} is not active",
                existing.guid
            )));
        }
        if update.role_id.is_some() && update.role_id != existing.role_id {
            return Err(AuthzError::Validation(
                "persona role id cannot be changed".to_string(),
            ));
        }
        if update.name != existing.name {
            self.ensure_unique_persona_name(&update.name, Some(&existing.guid))
                .await?;
        }

        let mut persona = update;
        persona.qualified_name = existing.qualified_name.clone();
        persona.tenant_id = existing.tenant_id.clone();
        persona.role_id = existing.role_id.clone();
        persona.status = existing.status;

        if persona.users != existing.users || persona.groups != existing.groups {
            self.update_role_members(&persona).await?;
        }

        let mut plan = ReconcilePlan::new();
        match (existing.enabled, persona.enabled) {
            (true, false) => self.plan_clean_persona(&persona, &mut plan).await?,
            (false, true) => {
                for policy in self.catalog.persona_policies(&persona.guid).await? {
                    if policy.is_active() {
                        self.plan_create(&persona, &policy, &mut plan).await?;
                    }
                }
            }
            _ => {}
        }

        let report = self.fan_out.execute(plan.into_mutations()).await;
        let persona = self.catalog.save_persona(&persona).await?;
        Ok(PersonaOutcome { persona, report })
    }

    /// Remove the persona's grants, its role and the persona itself
    #[instrument(skip(self))]
    pub async fn delete_persona(&self, guid: &str) -> Result<FanOutReport> {
        let persona = self.require_persona(guid).await?;

        let mut plan = ReconcilePlan::new();
        self.plan_clean_persona(&persona, &mut plan).await?;
        let report = self.fan_out.execute(plan.into_mutations()).await;

        if let Some(role_id) = persona.role_id.as_deref() {
            self.authority.delete_role(role_id).await?;
        }
        self.catalog.delete_persona(guid).await?;
        info!(guid, "persona deleted");
        Ok(report)
    }

    /// Create a persona policy, or update it when one with its guid exists
    #[instrument(skip(self, policy), fields(name = %policy.name, category = ?policy.category))]
    pub async fn create_or_update_persona_policy(
        &self,
        user: &str,
        policy: PersonaPolicy,
    ) -> Result<PolicyOutcome> {
        policy.check()?;

        let persona = self.require_persona(&policy.persona_guid).await?;
        if !persona.is_active() {
            return Err(AuthzError::Validation(format!(
                "persona {} is not active",
                persona.guid
            )));
        }

        let prior = if policy.guid.is_empty() {
            None
        } else {
            self.catalog.get_persona_policy(&policy.guid).await?
        };
        if let Some(prior) = &prior {
            if prior.category != policy.category {
                return Err(AuthzError::Validation(
                    "persona policy category cannot be changed".to_string(),
                ));
            }
            if !prior.is_active() {
                return Err(AuthzError::Validation(format!(
                    "persona policy {} is not active",
                    prior.guid
                )));
            }
        }

        let siblings = self.catalog.persona_policies(&persona.guid).await?;
        ensure_unique_name(&policy, &siblings)?;
        self.ensure_connection_admin(user, &policy)?;
        ensure_unique_assets(&policy, &siblings)?;

        let mut policy = policy;
        if policy.qualified_name.is_empty() {
            policy.qualified_name = format!("{}/{}", persona.qualified_name, Uuid::new_v4());
        }
        let saved = self.catalog.save_persona_policy(&policy).await?;

        let mut plan = ReconcilePlan::new();
        if persona.enabled {
            match &prior {
                None => self.plan_create(&persona, &saved, &mut plan).await?,
                Some(prior) => self.plan_update(&persona, prior, &saved, &mut plan).await?,
            }
        } else {
            debug!(persona = %persona.guid, "persona disabled, concrete policies deferred");
        }

        let report = self.fan_out.execute(plan.into_mutations()).await;
        Ok(PolicyOutcome {
            policy: saved,
            report,
        })
    }

    /// Strip the persona policy from every concrete policy it labels
    #[instrument(skip(self))]
    pub async fn delete_persona_policy(&self, guid: &str) -> Result<FanOutReport> {
        let policy = self
            .catalog
            .get_persona_policy(guid)
            .await?
            .ok_or_else(|| AuthzError::NotFound(format!("persona policy {}", guid)))?;
        let persona = self.require_persona(&policy.persona_guid).await?;

        let mut plan = ReconcilePlan::new();
        self.plan_strip_policy(&persona, &policy, &mut plan).await?;
        let report = self.fan_out.execute(plan.into_mutations()).await;

        self.catalog.delete_persona_policy(guid).await?;
        info!(guid, "persona policy deleted");
        Ok(report)
    }

    async fn plan_create(
        &self,
        persona: &Persona,
        policy: &PersonaPolicy,
        plan: &mut ReconcilePlan,
    ) -> Result<()> {
        for provisional in synthesize(persona, policy) {
            self.place(provisional, persona.role_name(), plan).await?;
        }
        Ok(())
    }

    async fn plan_update(
        &self,
        persona: &Persona,
        prior: &PersonaPolicy,
        policy: &PersonaPolicy,
        plan: &mut ReconcilePlan,
    ) -> Result<()> {
        let role = persona.role_name();
        let existing = list_all_by_label(
            self.authority.as_ref(),
            &persona_policy_label(&policy.guid),
            self.page_size,
        )
        .await?;
        for p in &existing {
            plan.load(p.clone());
        }

        let recreate = prior.allow != policy.allow
            || !prior.same_assets(policy)
            || policy.mask_kind_changed(prior);

        if recreate {
            debug!(guid = %policy.guid, "target changed, recreating concrete policies");
            let labels = strip_labels_for(persona, policy);
            for p in &existing {
                plan.apply(strip_role(p, role, &labels));
            }
            for provisional in synthesize(persona, policy) {
                self.place(provisional, role, plan).await?;
            }
            return Ok(());
        }

        let mut mapped = BTreeSet::new();
        for provisional in synthesize(persona, policy) {
            match existing.iter().find(|e| e.same_target(&provisional)) {
                Some(counterpart) => {
                    if let Some(id) = counterpart.id.clone() {
                        mapped.insert(id);
                    }
                    self.merge_into_tracked(counterpart, &provisional, role, plan);
                }
                None => self.place(provisional, role, plan).await?,
            }
        }

        // every labeled policy no provisional maps to is stale, whether the
        // actions were just dropped or an earlier run left it behind
        let excess: Vec<&Policy> = existing
            .iter()
            .filter(|p| p.id.as_ref().is_some_and(|id| !mapped.contains(id)))
            .collect();
        if excess.is_empty() {
            return Ok(());
        }

        let removed: BTreeSet<String> = prior.actions.difference(&policy.actions).cloned().collect();
        let dropped = synthesize_actions(persona, policy, &removed);
        let labels = strip_labels_for(persona, policy);
        for stale in excess {
            if dropped.iter().any(|target| stale.same_target(target)) {
                debug!(policy = %stale.display_id(), "removing role for dropped actions");
            } else {
                debug!(policy = %stale.display_id(), "removing role from leftover policy");
            }
            plan.apply(strip_role(stale, role, &labels));
        }
        Ok(())
    }

    /// Strip one persona policy's role and labels from its concrete policies
    async fn plan_strip_policy(
        &self,
        persona: &Persona,
        policy: &PersonaPolicy,
        plan: &mut ReconcilePlan,
    ) -> Result<()> {
        let labeled = list_all_by_label(
            self.authority.as_ref(),
            &persona_policy_label(&policy.guid),
            self.page_size,
        )
        .await?;
        let labels = strip_labels_for(persona, policy);
        for p in labeled {
            plan.load(p.clone());
            plan.apply(strip_role(&p, persona.role_name(), &labels));
        }
        Ok(())
    }

    /// Strip the persona's role and all its labels from every labeled policy
    async fn plan_clean_persona(&self, persona: &Persona, plan: &mut ReconcilePlan) -> Result<()> {
        let labeled = list_all_by_label(
            self.authority.as_ref(),
            &persona_label(&persona.guid),
            self.page_size,
        )
        .await?;

        let mut labels = vec![persona_label(&persona.guid)];
        labels.extend(
            self.catalog
                .persona_policies(&persona.guid)
                .await?
                .iter()
                .map(|p| persona_policy_label(&p.guid)),
        );

        for p in labeled {
            plan.load(p.clone());
            plan.apply(strip_role(&p, persona.role_name(), &labels));
        }
        Ok(())
    }

    /// Merge into an existing same-target policy, or plan a create
    async fn place(&self, provisional: Policy, role: &str, plan: &mut ReconcilePlan) -> Result<()> {
        let target = match plan.find_same_target(&provisional) {
            Some(target) => Some(target),
            None => {
                let found =
                    find_same_target(self.authority.as_ref(), &provisional, self.page_size).await?;
                found.map(|existing| {
                    let id = existing.id.clone().unwrap_or_default();
                    plan.load(existing);
                    Target::Tracked(id)
                })
            }
        };

        match target {
            Some(Target::Tracked(id)) => {
                if let Some(existing) = plan.get(&id).cloned() {
                    self.merge_into_tracked(&existing, &provisional, role, plan);
                }
            }
            Some(Target::Planned(index)) => {
                let merged = plan
                    .planned(index)
                    .and_then(|planned| merge_role_item(planned, &provisional, role));
                if let Some(merged) = merged {
                    plan.replace_planned(index, merged);
                }
            }
            None => {
                debug!(name = %provisional.name, "no existing policy for target, creating");
                plan.create(provisional);
            }
        }
        Ok(())
    }

    fn merge_into_tracked(&self, existing: &Policy, provisional: &Policy, role: &str, plan: &mut ReconcilePlan) {
        let id = existing.id.as_deref().unwrap_or_default();
        // the working copy may already carry earlier changes
        let current = plan.get(id).cloned().unwrap_or_else(|| existing.clone());
        match merge_role_item(&current, provisional, role) {
            Some(merged) => plan.put(merged),
            None if plan.is_deleted(id) => plan.put(current),
            None => {}
        }
    }

    async fn require_persona(&self, guid: &str) -> Result<Persona> {
        self.catalog
            .get_persona(guid)
            .await?
            .ok_or_else(|| AuthzError::NotFound(format!("persona {}", guid)))
    }

    async fn ensure_unique_persona_name(&self, name: &str, except: Option<&str>) -> Result<()> {
        let taken = self
            .catalog
            .list_personas()
            .await?
            .iter()
            .any(|p| p.name == name && p.is_active() && Some(p.guid.as_str()) != except);
        if taken {
            return Err(AuthzError::Validation(format!(
                "persona with name {} already exists",
                name
            )));
        }
        Ok(())
    }

    async fn update_role_members(&self, persona: &Persona) -> Result<()> {
        let Some(role_id) = persona.role_id.as_deref() else {
            return Ok(());
        };
        let role = self
            .authority
            .get_role(role_id)
            .await?
            .ok_or_else(|| AuthzError::NotFound(format!("role {}", role_id)))?;
        let role = Role {
            users: persona.users.clone(),
            groups: persona.groups.clone(),
            ..role
        };
        self.authority.update_role(&role).await?;
        Ok(())
    }

    fn ensure_connection_admin(&self, user: &str, policy: &PersonaPolicy) -> Result<()> {
        if !policy.category.requires_connection() {
            return Ok(());
        }
        let connection = policy.connection_id.as_deref().unwrap_or_default();
        let admin_role = connection_admin_role(connection);
        if self.subjects.resolve(user).roles.contains(&admin_role) {
            Ok(())
        } else {
            Err(AuthzError::Unauthorized {
                principal: user.to_string(),
                action: "manage persona policy".to_string(),
                target: format!("connection {}", connection),
            })
        }
    }
}

/// Labels removed when a persona policy lets go of a concrete policy
fn strip_labels_for(persona: &Persona, policy: &PersonaPolicy) -> Vec<String> {
    vec![persona_policy_label(&policy.guid), persona_label(&persona.guid)]
}

fn ensure_unique_name(policy: &PersonaPolicy, siblings: &[PersonaPolicy]) -> Result<()> {
    let taken = siblings
        .iter()
        .any(|s| s.guid != policy.guid && s.is_active() && s.name == policy.name);
    if taken {
        return Err(AuthzError::Validation(format!(
            "persona policy with name {} already exists",
            policy.name
        )));
    }
    Ok(())
}

fn ensure_unique_assets(policy: &PersonaPolicy, siblings: &[PersonaPolicy]) -> Result<()> {
    let duplicate = siblings.iter().find(|s| {
        s.guid != policy.guid
            && s.is_active()
            && s.category == policy.category
            && s.same_assets(policy)
            && s.is_data_mask() == policy.is_data_mask()
    });
    match duplicate {
        Some(other) => Err(AuthzError::Conflict(format!(
            "persona policy {} already targets the same assets",
            other.name
        ))),
        None => Ok(()),
    }
}
