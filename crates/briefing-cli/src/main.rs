use std::fs;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use briefing_api::{
    parse_tier_set_yaml, AddAnalystRequest, AddBriefingRequest, BriefingApi, DueQuery, DueSort,
    SchedulerSettings, DEFAULT_PAGE_LIMIT,
};
use briefing_core::{
    AnalystId, AnalystStatus, AttendeeRole, BriefingAttendee, BriefingId, BriefingStatus,
    BriefingTransition, ConversationId, Influence,
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::Value;
use time::{OffsetDateTime, UtcOffset};
use tracing::debug;

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "arbrief")]
#[command(about = "Analyst relations briefing scheduler")]
struct Cli {
    #[arg(long, env = "ARBRIEF_DB", default_value = "./briefings.sqlite3")]
    db: PathBuf,

    /// Scheduler settings YAML; defaults apply when absent.
    #[arg(long, env = "ARBRIEF_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
    Tier {
        #[command(subcommand)]
        command: TierCommand,
    },
    Analyst {
        #[command(subcommand)]
        command: Box<AnalystCommand>,
    },
    Briefing {
        #[command(subcommand)]
        command: Box<BriefingCommand>,
    },
    Conversation {
        #[command(subcommand)]
        command: ConversationCommand,
    },
    /// List analysts whose next briefing is due.
    Due(DueArgs),
    Outreach {
        #[command(subcommand)]
        command: OutreachCommand,
    },
    /// Show the meeting slots outreach would propose.
    Slots(AsOfArgs),
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    SchemaVersion,
    Migrate(DbMigrateArgs),
    IntegrityCheck,
    Backup(DbBackupArgs),
}

#[derive(Debug, Args)]
struct DbMigrateArgs {
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct DbBackupArgs {
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Subcommand)]
enum TierCommand {
    /// Replace the whole tier set from a YAML file.
    Set(TierSetArgs),
    List,
}

#[derive(Debug, Args)]
struct TierSetArgs {
    #[arg(long)]
    file: PathBuf,
}

#[derive(Debug, Subcommand)]
enum AnalystCommand {
    Add(AnalystAddArgs),
    List(AnalystListArgs),
    Status(AnalystStatusArgs),
    Influence(AnalystInfluenceArgs),
}

#[derive(Debug, Args)]
struct AnalystAddArgs {
    #[arg(long)]
    first_name: String,
    #[arg(long)]
    last_name: String,
    #[arg(long)]
    email: String,
    #[arg(long)]
    company: String,
    #[arg(long)]
    title: Option<String>,
    #[arg(long, value_enum)]
    influence: InfluenceArg,
    #[arg(long, value_enum)]
    status: Option<AnalystStatusArg>,
}

#[derive(Debug, Args)]
struct AnalystListArgs {
    #[arg(long, value_enum)]
    status: Option<AnalystStatusArg>,
}

#[derive(Debug, Args)]
struct AnalystStatusArgs {
    #[arg(long)]
    analyst_id: String,
    #[arg(long, value_enum)]
    status: AnalystStatusArg,
}

#[derive(Debug, Args)]
struct AnalystInfluenceArgs {
    #[arg(long)]
    analyst_id: String,
    #[arg(long, value_enum)]
    influence: InfluenceArg,
}

#[derive(Debug, Subcommand)]
enum BriefingCommand {
    Add(BriefingAddArgs),
    Complete(BriefingCompleteArgs),
    Cancel(BriefingIdArgs),
    Reschedule(BriefingRescheduleArgs),
    List(BriefingListArgs),
}

#[derive(Debug, Args)]
struct BriefingAddArgs {
    #[arg(long)]
    title: String,
    #[arg(long)]
    scheduled_at: String,
    /// Record a briefing that already took place.
    #[arg(long)]
    completed_at: Option<String>,
    #[arg(long = "primary")]
    primary: Vec<String>,
    #[arg(long = "secondary")]
    secondary: Vec<String>,
    #[arg(long)]
    calendar_event_id: Option<String>,
    #[arg(long)]
    summary: Option<String>,
}

#[derive(Debug, Args)]
struct BriefingIdArgs {
    #[arg(long)]
    briefing_id: String,
}

#[derive(Debug, Args)]
struct BriefingCompleteArgs {
    #[arg(long)]
    briefing_id: String,
    #[arg(long)]
    completed_at: Option<String>,
    #[arg(long)]
    summary: Option<String>,
}

#[derive(Debug, Args)]
struct BriefingRescheduleArgs {
    #[arg(long)]
    briefing_id: String,
    #[arg(long)]
    scheduled_at: String,
}

#[derive(Debug, Args)]
struct BriefingListArgs {
    #[arg(long)]
    analyst_id: String,
}

#[derive(Debug, Subcommand)]
enum ConversationCommand {
    List,
    Close(ConversationCloseArgs),
}

#[derive(Debug, Args)]
struct ConversationCloseArgs {
    #[arg(long)]
    conversation_id: String,
    #[arg(long)]
    as_of: Option<String>,
}

#[derive(Debug, Args)]
struct DueArgs {
    #[arg(long)]
    as_of: Option<String>,
    #[arg(long)]
    tier: Option<String>,
    #[arg(long, value_enum, default_value_t = SortArg::OverdueDays)]
    sort: SortArg,
    #[arg(long, default_value_t = 1)]
    page: u32,
    #[arg(long, default_value_t = DEFAULT_PAGE_LIMIT)]
    limit: u32,
}

#[derive(Debug, Subcommand)]
enum OutreachCommand {
    /// Open scheduling conversations for every due analyst.
    Run(AsOfArgs),
}

#[derive(Debug, Args)]
struct AsOfArgs {
    #[arg(long)]
    as_of: Option<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum InfluenceArg {
    Low,
    Medium,
    High,
    VeryHigh,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum AnalystStatusArg {
    Active,
    Inactive,
    Archived,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SortArg {
    OverdueDays,
    Tier,
    Name,
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
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let settings = SchedulerSettings::load(cli.config.as_deref())?;
    debug!(db = %cli.db.display(), "running arbrief command");
    let api = BriefingApi::with_settings(cli.db, settings);

    match cli.command {
        Command::Db { command } => run_db(command, &api),
        Command::Tier { command } => run_tier(command, &api),
        Command::Analyst { command } => run_analyst(*command, &api),
        Command::Briefing { command } => run_briefing(*command, &api),
        Command::Conversation { command } => run_conversation(command, &api),
        Command::Due(args) => run_due(args, &api),
        Command::Outreach { command: OutreachCommand::Run(args) } => {
            let summary = api.run_outreach(parse_optional_rfc3339(args.as_of.as_deref())?)?;
            emit_json(serde_json::to_value(summary)?)
        }
        Command::Slots(args) => {
            let slots = api.suggested_times(parse_optional_rfc3339(args.as_of.as_deref())?)?;
            emit_json(serde_json::json!({ "suggested_times": slots }))
        }
    }
}

fn run_db(command: DbCommand, api: &BriefingApi) -> Result<()> {
    match command {
        DbCommand::SchemaVersion => {
            let status = api.schema_status()?;
            emit_json(serde_json::json!({
                "current_version": status.current_version,
                "target_version": status.target_version,
                "pending_versions": status.pending_versions,
                "up_to_date": status.pending_versions.is_empty(),
                "inferred_from_legacy": status.inferred_from_legacy
            }))
        }
        DbCommand::Migrate(args) => emit_json(serde_json::to_value(api.migrate(args.dry_run)?)?),
        DbCommand::IntegrityCheck => emit_json(serde_json::to_value(api.integrity_check()?)?),
        DbCommand::Backup(args) => {
            let result = api.backup(&args.out)?;
            emit_json(serde_json::json!({
                "backup_path": result.backup_path,
                "status": "ok"
            }))
        }
    }
}

fn run_tier(command: TierCommand, api: &BriefingApi) -> Result<()> {
    match command {
        TierCommand::Set(args) => {
            let raw = fs::read_to_string(&args.file)
                .with_context(|| format!("failed to read tier file {}", args.file.display()))?;
            let inputs = parse_tier_set_yaml(&raw)
                .with_context(|| format!("invalid tier file {}", args.file.display()))?;
            let tiers = api.replace_tiers(inputs)?;
            emit_json(serde_json::json!({ "tiers": tiers }))
        }
        TierCommand::List => emit_json(serde_json::json!({ "tiers": api.list_tiers()? })),
    }
}

fn run_analyst(command: AnalystCommand, api: &BriefingApi) -> Result<()> {
    match command {
        AnalystCommand::Add(args) => {
            let analyst = api.add_analyst(AddAnalystRequest {
                first_name: args.first_name,
                last_name: args.last_name,
                email: args.email,
                company: args.company,
                title: args.title,
                influence: args.influence.into_influence(),
                status: args.status.map(AnalystStatusArg::into_status),
                created_at: None,
            })?;
            emit_json(serde_json::to_value(analyst)?)
        }
        AnalystCommand::List(args) => {
            let analysts = api.list_analysts(args.status.map(AnalystStatusArg::into_status))?;
            emit_json(serde_json::json!({ "analysts": analysts }))
        }
        AnalystCommand::Status(args) => {
            let analyst_id = AnalystId::parse(&args.analyst_id)?;
            let analyst = api.set_analyst_status(analyst_id, args.status.into_status())?;
            emit_json(serde_json::to_value(analyst)?)
        }
        AnalystCommand::Influence(args) => {
            let analyst = api.set_analyst_influence(
                AnalystId::parse(&args.analyst_id)?,
                args.influence.into_influence(),
            )?;
            emit_json(serde_json::to_value(analyst)?)
        }
    }
}

fn run_briefing(command: BriefingCommand, api: &BriefingApi) -> Result<()> {
    let briefing = match command {
        BriefingCommand::Add(args) => {
            let mut attendees = Vec::with_capacity(args.primary.len() + args.secondary.len());
            for raw in &args.primary {
                attendees.push(BriefingAttendee {
                    analyst_id: AnalystId::parse(raw)?,
                    role: AttendeeRole::Primary,
                });
            }
            for raw in &args.secondary {
                attendees.push(BriefingAttendee {
                    analyst_id: AnalystId::parse(raw)?,
                    role: AttendeeRole::Secondary,
                });
            }
            let completed_at = args.completed_at.as_deref().map(parse_rfc3339).transpose()?;
            api.add_briefing(AddBriefingRequest {
                title: args.title,
                scheduled_at: parse_rfc3339(&args.scheduled_at)?,
                status: completed_at.map(|_| BriefingStatus::Completed),
                completed_at,
                calendar_event_id: args.calendar_event_id,
                summary: args.summary,
                attendees,
            })?
        }
        BriefingCommand::Complete(args) => api.set_briefing_status(
            BriefingId::parse(&args.briefing_id)?,
            BriefingTransition::Complete {
                completed_at: parse_optional_rfc3339(args.completed_at.as_deref())?
                    .unwrap_or_else(OffsetDateTime::now_utc),
                summary: args.summary,
            },
        )?,
        BriefingCommand::Cancel(args) => api.set_briefing_status(
            BriefingId::parse(&args.briefing_id)?,
            BriefingTransition::Cancel,
        )?,
        BriefingCommand::Reschedule(args) => api.set_briefing_status(
            BriefingId::parse(&args.briefing_id)?,
            BriefingTransition::Reschedule { scheduled_at: parse_rfc3339(&args.scheduled_at)? },
        )?,
        BriefingCommand::List(args) => {
            let briefings = api.list_briefings_for_analyst(AnalystId::parse(&args.analyst_id)?)?;
            return emit_json(serde_json::json!({ "briefings": briefings }));
        }
    };
    emit_json(serde_json::to_value(briefing)?)
}

fn run_conversation(command: ConversationCommand, api: &BriefingApi) -> Result<()> {
    match command {
        ConversationCommand::List => {
            emit_json(serde_json::json!({ "conversations": api.list_active_conversations()? }))
        }
        ConversationCommand::Close(args) => {
            let conversation = api.close_conversation(
                ConversationId::parse(&args.conversation_id)?,
                parse_optional_rfc3339(args.as_of.as_deref())?,
            )?;
            emit_json(serde_json::to_value(conversation)?)
        }
    }
}

fn run_due(args: DueArgs, api: &BriefingApi) -> Result<()> {
    let listing = api.briefings_due(DueQuery {
        as_of: parse_optional_rfc3339(args.as_of.as_deref())?,
        tier: args.tier,
        sort: args.sort.into_due_sort(),
        page: args.page,
        limit: args.limit,
    })?;
    emit_json(serde_json::to_value(listing)?)
}

fn parse_optional_rfc3339(value: Option<&str>) -> Result<Option<OffsetDateTime>> {
    value.map(parse_rfc3339).transpose()
}

/// Any offset is accepted; values are normalized to UTC.
fn parse_rfc3339(value: &str) -> Result<OffsetDateTime> {
    let parsed = OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
        .with_context(|| format!("invalid RFC3339 timestamp: {value}"))?;
    if parsed.year() < 1970 {
        return Err(anyhow!("timestamp before 1970 is not supported (received: {value})"));
    }
    Ok(parsed.to_offset(UtcOffset::UTC))
}

impl InfluenceArg {
    fn into_influence(self) -> Influence {
        match self {
            Self::Low => Influence::Low,
            Self::Medium => Influence::Medium,
            Self::High => Influence::High,
            Self::VeryHigh => Influence::VeryHigh,
        }
    }
}

impl AnalystStatusArg {
    fn into_status(self) -> AnalystStatus {
        match self {
            Self::Active => AnalystStatus::Active,
            Self::Inactive => AnalystStatus::Inactive,
            Self::Archived => AnalystStatus::Archived,
        }
    }
}

impl SortArg {
    fn into_due_sort(self) -> DueSort {
        match self {
            Self::OverdueDays => DueSort::OverdueDays,
            Self::Tier => DueSort::Tier,
            Self::Name => DueSort::Name,
        }
    }
}
