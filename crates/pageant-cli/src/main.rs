use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use pageant_core::{
    build_leaderboard_update, entity_action_allowed, EntityAction, PageantId, PageantSnapshot,
    PageantStage, PermissionRule, PermissionSet, PermissionUpdate, RankDirection, Role,
    ScoreEntry, DEFAULT_EPSILON,
};
use serde_json::Value;
use time::OffsetDateTime;
use ulid::Ulid;

const CLI_CONTRACT_VERSION: &str = "pgt.v1";

#[derive(Debug, Parser)]
#[command(name = "pgt")]
#[command(about = "Pageant tabulation CLI")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Rank {
        #[command(subcommand)]
        command: RankCommand,
    },
    Permission {
        #[command(subcommand)]
        command: PermissionCommand,
    },
    Policy {
        #[command(subcommand)]
        command: PolicyCommand,
    },
}

#[derive(Debug, Subcommand)]
enum RankCommand {
    Compute(RankComputeArgs),
}

#[derive(Debug, Args)]
struct RankComputeArgs {
    /// JSON file with an array of {entry_id, value} score rows.
    #[arg(long)]
    scores: PathBuf,
    #[arg(long, value_enum, default_value_t = DirectionArg::Desc)]
    direction: DirectionArg,
    #[arg(long, default_value_t = DEFAULT_EPSILON)]
    epsilon: f64,
    #[arg(long)]
    pageant_id: Option<String>,
    #[arg(long)]
    as_of: Option<String>,
}

#[derive(Debug, Subcommand)]
enum PermissionCommand {
    Check(PermissionCheckArgs),
    Grant(PermissionGrantArgs),
}

#[derive(Debug, Args)]
struct PermissionCheckArgs {
    /// JSON file with an array of {role, key, granted} rule rows.
    #[arg(long)]
    rules: PathBuf,
    #[arg(long, value_enum)]
    role: RoleArg,
    #[arg(long)]
    key: String,
}

#[derive(Debug, Args)]
struct PermissionGrantArgs {
    #[arg(long)]
    rules: PathBuf,
    #[arg(long, value_enum)]
    role: RoleArg,
    /// One or more key=true|false upserts.
    #[arg(long = "set", required = true)]
    set: Vec<String>,
}

#[derive(Debug, Subcommand)]
enum PolicyCommand {
    Check(PolicyCheckArgs),
}

#[derive(Debug, Args)]
struct PolicyCheckArgs {
    #[arg(long, value_enum)]
    role: RoleArg,
    #[arg(long, value_enum)]
    action: ActionArg,
    #[arg(long, value_enum)]
    stage: StageArg,
    #[arg(long, default_value_t = false)]
    temporary_edit: bool,
    #[arg(long, default_value_t = false)]
    assigned: bool,
    #[arg(long)]
    pageant_id: Option<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RoleArg {
    Admin,
    Organizer,
    Judge,
    Tabulator,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StageArg {
    Setup,
    Ongoing,
    Completed,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ActionArg {
    View,
    Create,
    Update,
    Delete,
    Restore,
    ForceDelete,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DirectionArg {
    Asc,
    Desc,
}

impl RoleArg {
    fn into_role(self) -> Role {
        match self {
            Self::Admin => Role::Admin,
            Self::Organizer => Role::Organizer,
            Self::Judge => Role::Judge,
            Self::Tabulator => Role::Tabulator,
        }
    }
}

impl StageArg {
    fn into_stage(self) -> PageantStage {
        match self {
            Self::Setup => PageantStage::Setup,
            Self::Ongoing => PageantStage::Ongoing,
            Self::Completed => PageantStage::Completed,
        }
    }
}

impl ActionArg {
    fn into_action(self) -> EntityAction {
        match self {
            Self::View => EntityAction::View,
            Self::Create => EntityAction::Create,
            Self::Update => EntityAction::Update,
            Self::Delete => EntityAction::Delete,
            Self::Restore => EntityAction::Restore,
            Self::ForceDelete => EntityAction::ForceDelete,
        }
    }
}

impl DirectionArg {
    fn into_direction(self) -> RankDirection {
        match self {
            Self::Asc => RankDirection::Ascending,
            Self::Desc => RankDirection::Descending,
        }
    }
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Rank { command } => run_rank(command),
        Command::Permission { command } => run_permission(command),
        Command::Policy { command } => run_policy(command),
    }
}

fn run_rank(command: RankCommand) -> Result<()> {
    match command {
        RankCommand::Compute(args) => {
            let entries = read_scores_file(&args.scores)?;
            let pageant_id = match args.pageant_id.as_deref() {
                Some(raw) => parse_pageant_id(raw)?,
                None => PageantId::new(),
            };
            let generated_at = parse_optional_rfc3339(args.as_of.as_deref())?;

            let update = build_leaderboard_update(
                pageant_id,
                &entries,
                args.direction.into_direction(),
                args.epsilon,
                generated_at,
            )?;

            emit_json(
                serde_json::to_value(&update)
                    .context("failed to serialize leaderboard update")?,
            )
        }
    }
}

fn run_permission(command: PermissionCommand) -> Result<()> {
    match command {
        PermissionCommand::Check(args) => {
            let set = read_rules_file(&args.rules)?;
            let role = args.role.into_role();
            let granted = set.has_permission(role, &args.key);

            emit_json(serde_json::json!({
                "role": role.as_str(),
                "key": args.key,
                "granted": granted
            }))
        }
        PermissionCommand::Grant(args) => {
            let mut set = read_rules_file(&args.rules)?;
            let role = args.role.into_role();
            let updates = args
                .set
                .iter()
                .map(|raw| parse_grant(raw))
                .collect::<Result<Vec<_>>>()?;

            set.apply_updates(role, &updates)?;
            write_rules_file(&args.rules, &set)?;

            emit_json(serde_json::json!({
                "role": role.as_str(),
                "updates": updates,
                "rules_path": args.rules,
                "total_rules": set.len()
            }))
        }
    }
}

fn run_policy(command: PolicyCommand) -> Result<()> {
    match command {
        PolicyCommand::Check(args) => {
            let pageant_id = match args.pageant_id.as_deref() {
                Some(raw) => parse_pageant_id(raw)?,
                None => PageantId::new(),
            };
            let role = args.role.into_role();
            let action = args.action.into_action();
            let pageant = PageantSnapshot {
                pageant_id,
                stage: args.stage.into_stage(),
                temporary_edit: args.temporary_edit,
            };

            let allowed = entity_action_allowed(role, action, &pageant, args.assigned);

            emit_json(serde_json::json!({
                "role": role.as_str(),
                "action": action.as_str(),
                "stage": pageant.stage.as_str(),
                "temporary_edit": pageant.temporary_edit,
                "assigned": args.assigned,
                "allowed": allowed
            }))
        }
    }
}

fn read_scores_file(path: &Path) -> Result<Vec<ScoreEntry>> {
    let body = fs::read_to_string(path)
        .with_context(|| format!("failed to read scores file {}", path.display()))?;
    serde_json::from_str(&body)
        .with_context(|| format!("failed to parse scores file {}", path.display()))
}

fn read_rules_file(path: &Path) -> Result<PermissionSet> {
    let body = fs::read_to_string(path)
        .with_context(|| format!("failed to read rules file {}", path.display()))?;
    let rules: Vec<PermissionRule> = serde_json::from_str(&body)
        .with_context(|| format!("failed to parse rules file {}", path.display()))?;
    Ok(PermissionSet::from_rules(rules))
}

fn write_rules_file(path: &Path, set: &PermissionSet) -> Result<()> {
    let body = serde_json::to_vec_pretty(&set.rules())
        .context("failed to serialize permission rules")?;
    fs::write(path, body)
        .with_context(|| format!("failed to write rules file {}", path.display()))
}

fn parse_grant(raw: &str) -> Result<PermissionUpdate> {
    let (key, granted) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("grant MUST be formatted as key=true|false (received: {raw})"))?;
    let granted = match granted {
        "true" => true,
        "false" => false,
        other => {
            return Err(anyhow!(
                "grant value MUST be true or false (received: {other})"
            ));
        }
    };

    Ok(PermissionUpdate { key: key.to_string(), granted })
}

fn parse_pageant_id(value: &str) -> Result<PageantId> {
    let parsed = Ulid::from_string(value).with_context(|| format!("invalid ULID: {value}"))?;
    Ok(PageantId(parsed))
}

fn parse_optional_rfc3339(value: Option<&str>) -> Result<OffsetDateTime> {
    match value {
        Some(raw) => parse_rfc3339(raw),
        None => Ok(OffsetDateTime::now_utc()),
    }
}

fn parse_rfc3339(value: &str) -> Result<OffsetDateTime> {
    let parsed = OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
        .with_context(|| format!("invalid RFC3339 UTC timestamp: {value}"))?;

    if parsed.offset() != time::UtcOffset::UTC {
        return Err(anyhow!("timestamp MUST use UTC offset Z (received: {value})"));
    }

    Ok(parsed)
}
