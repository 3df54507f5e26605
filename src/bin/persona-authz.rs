//! persona-authz command line
//!
//! Offline access decisions, criteria compilation and persona policy
//! synthesis over JSON files

use ahash::AHashMap;
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use persona_authz::access::{AccessEvaluator, PatternCache};
use persona_authz::audit::{AuditLogger, TracingSink};
use persona_authz::criteria::{compile, FilterCriteria};
use persona_authz::model::{Entity, Persona, PersonaPolicy, Policy, RelationshipTarget, Role};
use persona_authz::persona::synthesize;
use persona_authz::store::{PolicySnapshot, PolicyStore, SubjectResolver, SubjectSnapshot};
use persona_authz::AuthzConfig;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "persona-authz")]
#[command(about = "Authorization core for a metadata catalog")]
struct Args {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Decide one entity or relationship request against policy files
    Evaluate {
        /// Request JSON: user, action, entity or relationship
        #[arg(short, long)]
        request: PathBuf,

        /// JSON arrays of policies; services are taken from each policy
        #[arg(short, long, required = true)]
        policies: Vec<PathBuf>,
    },

    /// Compile a filterCriteria document to search DSL
    Compile {
        #[arg(short = 'f', long)]
        criteria: PathBuf,
    },

    /// Expand a persona policy into provisional concrete policies
    Synthesize {
        #[arg(long)]
        persona: PathBuf,

        #[arg(long)]
        policy: PathBuf,
    },
}

/// Request file accepted by `evaluate`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EvaluateRequest {
    user: String,
    action: String,
    #[serde(default)]
    groups: BTreeSet<String>,
    #[serde(default)]
    roles: Vec<Role>,
    entity: Option<Entity>,
    relationship: Option<RelationshipTarget>,
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

fn evaluate(config: &AuthzConfig, request: &Path, policy_files: &[PathBuf]) -> Result<()> {
    let request: EvaluateRequest = read_json(request)?;

    let mut policies = Vec::new();
    for path in policy_files {
        let batch: Vec<Policy> = read_json(path)?;
        debug!(file = %path.display(), count = batch.len(), "loaded policies");
        policies.extend(batch);
    }

    let mut user_groups = AHashMap::new();
    user_groups.insert(request.user.clone(), request.groups.clone());
    let subjects = Arc::new(SubjectResolver::with_snapshot(SubjectSnapshot::new(
        request.roles.clone(),
        user_groups,
    )));
    let store = Arc::new(PolicyStore::with_snapshot(
        subjects,
        PolicySnapshot::from_policies(policies),
    ));

    let audit = Arc::new(AuditLogger::started(&config.audit, Arc::new(TracingSink)));
    let evaluator = AccessEvaluator::new(
        store,
        Arc::new(PatternCache::new(config.pattern_cache_capacity)),
    )
    .with_audit(Arc::clone(&audit))
    .with_clause_limit(config.max_clause_limit);

    let result = match (&request.entity, &request.relationship) {
        (Some(entity), None) => {
            evaluator.is_entity_access_allowed(&request.user, &request.action, entity)
        }
        (None, Some(target)) => {
            evaluator.is_relationship_access_allowed(&request.user, &request.action, target)
        }
        _ => bail!("request must carry exactly one of entity or relationship"),
    };

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn compile_criteria(path: &Path) -> Result<()> {
    let criteria: FilterCriteria = read_json(path)?;
    let compiled = json!({
        "entity": criteria.entity.as_ref().map(compile),
        "endOneEntity": criteria.end_one_entity.as_ref().map(compile),
        "endTwoEntity": criteria.end_two_entity.as_ref().map(compile),
    });
    println!("{}", serde_json::to_string_pretty(&compiled)?);
    Ok(())
}

fn synthesize_policies(persona: &Path, policy: &Path) -> Result<()> {
    let persona: Persona = read_json(persona)?;
    let policy: PersonaPolicy = read_json(policy)?;
    policy.check()?;

    let provisional = synthesize(&persona, &policy);
    info!(count = provisional.len(), "synthesized provisional policies");
    println!("{}", serde_json::to_string_pretty(&provisional)?);
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => AuthzConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => AuthzConfig::default(),
    };

    match &args.command {
        Command::Evaluate { request, policies } => evaluate(&config, request, policies),
        Command::Compile { criteria } => compile_criteria(criteria),
        Command::Synthesize { persona, policy } => synthesize_policies(persona, policy),
    }
}
