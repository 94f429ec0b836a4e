use std::cmp::Reverse;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use briefing_core::{
    assemble_candidates, compute_due_report, effective_lookback_days, suggested_times, Analyst,
    AnalystId, AnalystStatus, Briefing, BriefingAttendee, BriefingId, BriefingStatus,
    BriefingTransition, ConversationId, DueAnalyst, DueReport, Frequency, Influence,
    InfluenceTier, SchedulingConversation, SchedulingError, SkippedAnalyst, SuggestedTime, TierId,
};
use briefing_store_sqlite::{IntegrityReport, SchemaStatus, SqliteStore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use tracing::info;

pub mod outreach;
pub mod settings;

pub use outreach::{OutreachNotifier, OutreachRequested, OutreachSummary, WebhookNotifier};
pub use settings::{SchedulerSettings, SlotConfig, WebhookConfig};

pub const API_CONTRACT_VERSION: &str = "api.v1";

pub const DEFAULT_PAGE_LIMIT: u32 = 50;
pub const MAX_PAGE_LIMIT: u32 = 200;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrateResult {
    pub dry_run: bool,
    pub current_version: i64,
    pub target_version: i64,
    pub would_apply_versions: Vec<i64>,
    pub inferred_from_legacy: bool,
    pub after_version: Option<i64>,
    pub up_to_date: Option<bool>,
}

/// One tier as written by operators; influence accepts legacy spellings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TierInput {
    pub name: String,
    pub influence: String,
    pub briefing_frequency: Frequency,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub description: Option<String>,
}

fn default_true() -> bool {
    true
}

impl TierInput {
    fn into_tier(self) -> Result<InfluenceTier> {
        let influence = Influence::parse(&self.influence).ok_or_else(|| {
            SchedulingError::Validation(format!("unknown influence `{}`", self.influence))
        })?;
        Ok(InfluenceTier {
            tier_id: TierId::new(),
            name: self.name.trim().to_string(),
            influence,
            briefing_frequency: self.briefing_frequency,
            is_active: self.is_active,
            description: self.description,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TierSetFile {
    pub tiers: Vec<TierInput>,
}

/// Parse a YAML tier set document (`tiers: [...]`).
///
/// # Errors
/// Returns an error when the YAML is malformed.
pub fn parse_tier_set_yaml(raw: &str) -> Result<Vec<TierInput>> {
    let file: TierSetFile = serde_yaml::from_str(raw).context("failed to parse tier set YAML")?;
    Ok(file.tiers)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AddAnalystRequest {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub company: String,
    #[serde(default)]
    pub title: Option<String>,
    pub influence: Influence,
    #[serde(default)]
    pub status: Option<AnalystStatus>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub created_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AddBriefingRequest {
    pub title: String,
    #[serde(with = "time::serde::rfc3339")]
    pub scheduled_at: OffsetDateTime,
    #[serde(default)]
    pub status: Option<BriefingStatus>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub calendar_event_id: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    pub attendees: Vec<BriefingAttendee>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DueSort {
    #[default]
    OverdueDays,
    Tier,
    Name,
}

impl DueSort {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OverdueDays => "overdue_days",
            Self::Tier => "tier",
            Self::Name => "name",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DueQuery {
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub as_of: Option<OffsetDateTime>,
    #[serde(default)]
    pub tier: Option<String>,
    #[serde(default)]
    pub sort: DueSort,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_page() -> u32 {
    1
}

fn default_limit() -> u32 {
    DEFAULT_PAGE_LIMIT
}

impl Default for DueQuery {
    fn default() -> Self {
        Self {
            as_of: None,
            tier: None,
            sort: DueSort::default(),
            page: 1,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

impl DueQuery {
    fn validate(&self) -> Result<(), SchedulingError> {
        if self.page == 0 {
            return Err(SchedulingError::Validation("page MUST be >= 1".to_string()));
        }
        if self.limit == 0 || self.limit > MAX_PAGE_LIMIT {
            return Err(SchedulingError::Validation(format!(
                "limit MUST be between 1 and {MAX_PAGE_LIMIT}"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: usize,
    pub total_pages: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DueFilters {
    pub tier: Option<String>,
    pub sort: DueSort,
    #[serde(with = "time::serde::rfc3339")]
    pub as_of: OffsetDateTime,
    pub lookback_days: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DueListing {
    pub snapshot_id: String,
    pub items: Vec<DueAnalyst>,
    pub skipped: Vec<SkippedAnalyst>,
    pub pagination: Pagination,
    pub filters: DueFilters,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackupResult {
    pub backup_path: String,
}

#[derive(Clone)]
pub struct BriefingApi {
    db_path: PathBuf,
    settings: SchedulerSettings,
    notifier: Option<Arc<dyn OutreachNotifier>>,
}

impl BriefingApi {
    #[must_use]
    pub fn new(db_path: PathBuf) -> Self {
        Self::with_settings(db_path, SchedulerSettings::default())
    }

    /// Build an API whose outreach runs post to the configured webhook, if any.
    #[must_use]
    pub fn with_settings(db_path: PathBuf, settings: SchedulerSettings) -> Self {
        let notifier = settings
            .webhook
            .as_ref()
            .map(|config| Arc::new(WebhookNotifier::new(config)) as Arc<dyn OutreachNotifier>);
        Self { db_path, settings, notifier }
    }

    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn OutreachNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    fn open_store(&self) -> Result<SqliteStore> {
        SqliteStore::open(&self.db_path)
    }

    fn open_migrated_store(&self) -> Result<SqliteStore> {
        let mut store = self.open_store()?;
        store.migrate()?;
        Ok(store)
    }

    /// Inspect schema status without mutating data.
    ///
    /// # Errors
    /// Returns an error when the `SQLite` database cannot be opened or queried.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        let store = self.open_store()?;
        store.schema_status()
    }

    /// Apply pending migrations, or return planned versions for dry-run mode.
    ///
    /// # Errors
    /// Returns an error when migration planning or execution fails.
    pub fn migrate(&self, dry_run: bool) -> Result<MigrateResult> {
        let mut store = self.open_store()?;
        let before = store.schema_status()?;
        if dry_run {
            return Ok(MigrateResult {
                dry_run: true,
                current_version: before.current_version,
                target_version: before.target_version,
                would_apply_versions: before.pending_versions,
                inferred_from_legacy: before.inferred_from_legacy,
                after_version: None,
                up_to_date: None,
            });
        }

        let planned_versions = before.pending_versions;
        store.migrate()?;
        let after = store.schema_status()?;
        Ok(MigrateResult {
            dry_run: false,
            current_version: before.current_version,
            target_version: before.target_version,
            would_apply_versions: planned_versions,
            inferred_from_legacy: before.inferred_from_legacy,
            after_version: Some(after.current_version),
            up_to_date: Some(after.pending_versions.is_empty()),
        })
    }

    /// # Errors
    /// Returns an error when quick-check or schema checks fail to run.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        let store = self.open_store()?;
        store.integrity_check()
    }

    /// # Errors
    /// Returns an error when the backup cannot be written.
    pub fn backup(&self, out_file: &Path) -> Result<BackupResult> {
        let store = self.open_store()?;
        store.backup_database(out_file)?;
        Ok(BackupResult { backup_path: out_file.display().to_string() })
    }

    /// Replace the whole tier set in one transaction.
    ///
    /// # Errors
    /// Returns an error when an influence is unknown, two tiers share one, or persistence fails.
    pub fn replace_tiers(&self, inputs: Vec<TierInput>) -> Result<Vec<InfluenceTier>> {
        let tiers = inputs.into_iter().map(TierInput::into_tier).collect::<Result<Vec<_>>>()?;
        let mut store = self.open_migrated_store()?;
        store.replace_tiers(&tiers)?;
        store.list_tiers()
    }

    /// # Errors
    /// Returns an error when the store cannot be read.
    pub fn list_tiers(&self) -> Result<Vec<InfluenceTier>> {
        self.open_migrated_store()?.list_tiers()
    }

    /// # Errors
    /// Returns an error when validation or persistence fails.
    pub fn add_analyst(&self, input: AddAnalystRequest) -> Result<Analyst> {
        let created_at = input.created_at.unwrap_or_else(OffsetDateTime::now_utc);
        let analyst = Analyst {
            analyst_id: AnalystId::new(),
            first_name: input.first_name.trim().to_string(),
            last_name: input.last_name.trim().to_string(),
            email: input.email.trim().to_string(),
            company: input.company.trim().to_string(),
            title: input.title,
            status: input.status.unwrap_or(AnalystStatus::Active),
            influence: input.influence,
            created_at,
            updated_at: created_at,
        };
        let mut store = self.open_migrated_store()?;
        store.insert_analyst(&analyst)?;
        Ok(analyst)
    }

    /// # Errors
    /// Returns an error when the store cannot be read.
    pub fn list_analysts(&self, status: Option<AnalystStatus>) -> Result<Vec<Analyst>> {
        self.open_migrated_store()?.list_analysts(status)
    }

    /// # Errors
    /// Returns an error when the analyst is unknown or the update fails.
    pub fn set_analyst_status(
        &self,
        analyst_id: AnalystId,
        status: AnalystStatus,
    ) -> Result<Analyst> {
        let mut store = self.open_migrated_store()?;
        store.set_analyst_status(analyst_id, status, OffsetDateTime::now_utc())
    }

    /// # Errors
    /// Returns an error when the analyst is unknown or the update fails.
    pub fn set_analyst_influence(
        &self,
        analyst_id: AnalystId,
        influence: Influence,
    ) -> Result<Analyst> {
        let mut store = self.open_migrated_store()?;
        store.set_analyst_influence(analyst_id, influence, OffsetDateTime::now_utc())
    }

    /// # Errors
    /// Returns an error when validation fails, an attendee is unknown, or persistence fails.
    pub fn add_briefing(&self, input: AddBriefingRequest) -> Result<Briefing> {
        let briefing = Briefing {
            briefing_id: BriefingId::new(),
            title: input.title.trim().to_string(),
            scheduled_at: input.scheduled_at,
            completed_at: input.completed_at,
            status: input.status.unwrap_or(BriefingStatus::Scheduled),
            calendar_event_id: input.calendar_event_id,
            summary: input.summary,
            attendees: input.attendees,
            created_at: OffsetDateTime::now_utc(),
        };
        let mut store = self.open_migrated_store()?;
        store.insert_briefing(&briefing)?;
        Ok(briefing)
    }

    /// # Errors
    /// Returns an error when the briefing is unknown, terminal, or the update fails.
    pub fn set_briefing_status(
        &self,
        briefing_id: BriefingId,
        transition: BriefingTransition,
    ) -> Result<Briefing> {
        let mut store = self.open_migrated_store()?;
        store.update_briefing_status(briefing_id, transition)
    }

    /// # Errors
    /// Returns an error when the analyst is unknown or the store cannot be read.
    pub fn list_briefings_for_analyst(&self, analyst_id: AnalystId) -> Result<Vec<Briefing>> {
        self.open_migrated_store()?.list_briefings_for_analyst(analyst_id)
    }

    /// # Errors
    /// Returns an error when the conversation is unknown, already closed, or the update fails.
    pub fn close_conversation(
        &self,
        conversation_id: ConversationId,
        as_of: Option<OffsetDateTime>,
    ) -> Result<SchedulingConversation> {
        let mut store = self.open_migrated_store()?;
        store.close_conversation(conversation_id, as_of.unwrap_or_else(OffsetDateTime::now_utc))
    }

    /// # Errors
    /// Returns an error when the store cannot be read.
    pub fn list_active_conversations(&self) -> Result<Vec<SchedulingConversation>> {
        self.open_migrated_store()?.list_active_conversations()
    }

    /// Evaluate every analyst and return the due list with explained exclusions.
    ///
    /// # Errors
    /// Returns an error when the store cannot be read; never an empty report in that case.
    pub fn due_report(&self, as_of: Option<OffsetDateTime>) -> Result<DueReport> {
        let store = self.open_migrated_store()?;
        self.load_due_report(&store, as_of.unwrap_or_else(OffsetDateTime::now_utc))
    }

    fn load_due_report(&self, store: &SqliteStore, now: OffsetDateTime) -> Result<DueReport> {
        let tiers = store.list_tiers()?;
        let lookback_days = effective_lookback_days(self.settings.lookback_days, &tiers);
        let snapshot = store
            .load_scheduling_snapshot(now, lookback_days)
            .context("failed to load scheduling snapshot")?;
        let candidates = assemble_candidates(
            &snapshot.analysts,
            &snapshot.tiers,
            &snapshot.briefings,
            &snapshot.active_conversations,
            now,
        );
        let report = compute_due_report(&candidates, now, lookback_days);
        info!(
            due = report.due.len(),
            skipped = report.skipped.len(),
            lookback_days,
            "computed briefing due report"
        );
        Ok(report)
    }

    /// Filtered, sorted and paginated due list.
    ///
    /// # Errors
    /// Returns an error when pagination is out of range or the store cannot be read.
    pub fn briefings_due(&self, query: DueQuery) -> Result<DueListing> {
        query.validate()?;
        let report = self.due_report(query.as_of)?;
        let tier_filter = query
            .tier
            .as_deref()
            .map(str::trim)
            .filter(|tier| !tier.is_empty())
            .map(str::to_string);

        let mut items = report
            .due
            .into_iter()
            .filter(|item| match tier_filter.as_deref() {
                Some(tier) => item.tier_name.eq_ignore_ascii_case(tier),
                None => true,
            })
            .collect::<Vec<_>>();
        sort_due(&mut items, query.sort);

        let snapshot_id = compute_snapshot_id(
            &items,
            report.generated_at,
            query.sort,
            tier_filter.as_deref(),
            report.lookback_days,
        );
        let total = items.len();
        let limit = query.limit as usize;
        let offset = (query.page as usize - 1).saturating_mul(limit);
        let page_items = items.into_iter().skip(offset).take(limit).collect::<Vec<_>>();

        Ok(DueListing {
            snapshot_id,
            items: page_items,
            skipped: report.skipped,
            pagination: Pagination {
                page: query.page,
                limit: query.limit,
                total,
                total_pages: total.div_ceil(limit),
            },
            filters: DueFilters {
                tier: tier_filter,
                sort: query.sort,
                as_of: report.generated_at,
                lookback_days: report.lookback_days,
            },
        })
    }

    /// Meeting slots that outreach would propose at `as_of`.
    ///
    /// # Errors
    /// Returns an error when slot settings are invalid.
    pub fn suggested_times(&self, as_of: Option<OffsetDateTime>) -> Result<Vec<SuggestedTime>> {
        let settings = self.settings.slot_settings()?;
        Ok(suggested_times(as_of.unwrap_or_else(OffsetDateTime::now_utc), &settings)?)
    }

    /// Open conversations for every due analyst and notify the webhook.
    ///
    /// # Errors
    /// Returns an error when the store fails; webhook failures are reported in the summary.
    pub fn run_outreach(&self, as_of: Option<OffsetDateTime>) -> Result<OutreachSummary> {
        let now = as_of.unwrap_or_else(OffsetDateTime::now_utc);
        let mut store = self.open_migrated_store()?;
        let report = self.load_due_report(&store, now)?;
        let slots = suggested_times(now, &self.settings.slot_settings()?)?;
        outreach::initiate_outreach(
            &mut store,
            self.notifier.as_deref(),
            &report,
            &slots,
            &self.settings.subject_prefix,
            now,
        )
    }
}

fn sort_due(items: &mut [DueAnalyst], sort: DueSort) {
    match sort {
        DueSort::OverdueDays => items.sort_by(|left, right| {
            right
                .overdue_days
                .cmp(&left.overdue_days)
                .then_with(|| right.days_since_last_briefing.cmp(&left.days_since_last_briefing))
                .then_with(|| by_name(left, right))
                .then_with(|| left.analyst_id.cmp(&right.analyst_id))
        }),
        DueSort::Tier => items.sort_by(|left, right| {
            right
                .influence
                .rank()
                .cmp(&left.influence.rank())
                .then_with(|| right.overdue_days.cmp(&left.overdue_days))
                .then_with(|| by_name(left, right))
                .then_with(|| left.analyst_id.cmp(&right.analyst_id))
        }),
        DueSort::Name => items.sort_by_key(|item| {
            (item.analyst_name.to_lowercase(), Reverse(item.overdue_days), item.analyst_id)
        }),
    }
}

fn by_name(left: &DueAnalyst, right: &DueAnalyst) -> std::cmp::Ordering {
    left.analyst_name.to_lowercase().cmp(&right.analyst_name.to_lowercase())
}

fn compute_snapshot_id(
    items: &[DueAnalyst],
    as_of: OffsetDateTime,
    sort: DueSort,
    tier_filter: Option<&str>,
    lookback_days: u32,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(as_of.unix_timestamp().to_string().as_bytes());
    hasher.update(lookback_days.to_string().as_bytes());
    hasher.update(sort.as_str().as_bytes());
    if let Some(tier) = tier_filter {
        hasher.update(tier.to_lowercase().as_bytes());
    }

    let mut entries = items
        .iter()
        .map(|item| format!("{}:{}", item.analyst_id, item.overdue_days))
        .collect::<Vec<_>>();
    entries.sort_unstable();
    for entry in entries {
        hasher.update(entry.as_bytes());
    }

    let digest = hasher.finalize();
    let digest_hex = format!("{digest:x}");
    format!("due_{}", &digest_hex[..16])
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    use anyhow::anyhow;
    use briefing_core::{AttendeeRole, SkipReason, MAX_FREQUENCY_DAYS};
    use time::Duration;

    use super::*;

    struct CountingNotifier {
        delivered: AtomicUsize,
    }

    impl OutreachNotifier for CountingNotifier {
        fn notify(&self, _request: &OutreachRequested) -> Result<()> {
            self.delivered.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn unique_temp_db_path() -> PathBuf {
        std::env::temp_dir().join(format!("arbrief-api-{}.sqlite3", ulid::Ulid::new()))
    }

    fn cleanup(db_path: &Path) {
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{}", db_path.display(), suffix));
        }
    }

    fn fixture_now() -> OffsetDateTime {
        OffsetDateTime::UNIX_EPOCH + Duration::days(20_000)
    }

    fn standard_tiers() -> Result<Vec<TierInput>> {
        parse_tier_set_yaml(
            r"
tiers:
  - name: Very High
    influence: VERY_HIGH
    briefing_frequency: 14
  - name: High
    influence: high
    briefing_frequency: 30
  - name: Medium
    influence: Medium
    briefing_frequency: 60
  - name: Low
    influence: low
    briefing_frequency: -1
",
        )
    }

    fn add_analyst(api: &BriefingApi, first_name: &str, influence: Influence) -> Result<Analyst> {
        api.add_analyst(AddAnalystRequest {
            first_name: first_name.to_string(),
            last_name: "Analyst".to_string(),
            email: format!("{}@research.example", first_name.to_ascii_lowercase()),
            company: "Example Research".to_string(),
            title: None,
            influence,
            status: None,
            created_at: Some(fixture_now() - Duration::days(400)),
        })
    }

    fn add_completed(api: &BriefingApi, analyst: &Analyst, days_ago: i64) -> Result<Briefing> {
        let at = fixture_now() - Duration::days(days_ago);
        api.add_briefing(AddBriefingRequest {
            title: "Roadmap briefing".to_string(),
            scheduled_at: at,
            status: Some(BriefingStatus::Completed),
            completed_at: Some(at),
            calendar_event_id: None,
            summary: None,
            attendees: vec![BriefingAttendee {
                analyst_id: analyst.analyst_id,
                role: AttendeeRole::Primary,
            }],
        })
    }

    // Test IDs: TAPI-001
    #[test]
    fn due_listing_applies_policy_sort_and_pagination() -> Result<()> {
        let db_path = unique_temp_db_path();
        let api = BriefingApi::new(db_path.clone());
        let tiers = api.replace_tiers(standard_tiers()?)?;
        assert_eq!(tiers.len(), 4);
        assert_eq!(tiers[3].briefing_frequency, Frequency::Never);

        let high = add_analyst(&api, "Hana", Influence::High)?;
        add_completed(&api, &high, 45)?;
        let very_high = add_analyst(&api, "Vik", Influence::VeryHigh)?;
        add_completed(&api, &very_high, 20)?;
        let booked = add_analyst(&api, "Bo", Influence::High)?;
        add_completed(&api, &booked, 60)?;
        api.add_briefing(AddBriefingRequest {
            title: "Follow-up".to_string(),
            scheduled_at: fixture_now() + Duration::days(5),
            status: None,
            completed_at: None,
            calendar_event_id: None,
            summary: None,
            attendees: vec![BriefingAttendee {
                analyst_id: booked.analyst_id,
                role: AttendeeRole::Primary,
            }],
        })?;
        let never = add_analyst(&api, "Lou", Influence::Low)?;
        let fresh = add_analyst(&api, "Mo", Influence::Medium)?;

        let listing =
            api.briefings_due(DueQuery { as_of: Some(fixture_now()), ..DueQuery::default() })?;
        let names =
            listing.items.iter().map(|item| item.contact.first_name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["Hana", "Vik", "Mo"]);
        assert_eq!(listing.items[0].overdue_days, 15);
        assert_eq!(listing.items[0].days_since_last_briefing, 45);
        assert_eq!(listing.items[1].overdue_days, 6);
        assert_eq!(listing.items[2].overdue_days, 0);
        assert_eq!(listing.pagination.total, 3);
        assert_eq!(listing.pagination.total_pages, 1);
        assert_eq!(listing.filters.lookback_days, 60);
        assert!(listing.snapshot_id.starts_with("due_"));

        let skipped = |id: AnalystId| {
            listing.skipped.iter().find(|entry| entry.analyst_id == id).map(|entry| entry.reason)
        };
        assert_eq!(skipped(booked.analyst_id), Some(SkipReason::FutureBriefingScheduled));
        assert_eq!(skipped(never.analyst_id), Some(SkipReason::TierNeverDue));
        assert!(listing.items.iter().any(|item| item.analyst_id == fresh.analyst_id));

        let by_tier = api.briefings_due(DueQuery {
            as_of: Some(fixture_now()),
            sort: DueSort::Tier,
            ..DueQuery::default()
        })?;
        assert_eq!(by_tier.items[0].contact.first_name, "Vik");

        let filtered = api.briefings_due(DueQuery {
            as_of: Some(fixture_now()),
            tier: Some("HIGH".to_string()),
            sort: DueSort::Name,
            page: 1,
            limit: 1,
        })?;
        assert_eq!(filtered.items.len(), 1);
        assert_eq!(filtered.items[0].contact.first_name, "Hana");
        assert_eq!(filtered.pagination.total, 1);

        let second_page = api.briefings_due(DueQuery {
            as_of: Some(fixture_now()),
            sort: DueSort::Name,
            page: 2,
            limit: 2,
            tier: None,
        })?;
        assert_eq!(second_page.items.len(), 1);
        assert_eq!(second_page.items[0].contact.first_name, "Vik");
        assert_eq!(second_page.pagination.total_pages, 2);

        cleanup(&db_path);
        Ok(())
    }

    // Test IDs: TAPI-002
    #[test]
    fn out_of_range_pagination_is_a_validation_error() -> Result<()> {
        let db_path = unique_temp_db_path();
        let api = BriefingApi::new(db_path.clone());

        for query in [
            DueQuery { page: 0, ..DueQuery::default() },
            DueQuery { limit: 0, ..DueQuery::default() },
            DueQuery { limit: MAX_PAGE_LIMIT + 1, ..DueQuery::default() },
        ] {
            let Err(err) = api.briefings_due(query) else {
                return Err(anyhow!("out-of-range pagination should fail"));
            };
            assert!(matches!(
                err.downcast_ref::<SchedulingError>(),
                Some(SchedulingError::Validation(_))
            ));
        }

        cleanup(&db_path);
        Ok(())
    }

    // Test IDs: TAPI-003
    #[test]
    fn store_failure_is_an_error_not_an_empty_list() -> Result<()> {
        let db_path = unique_temp_db_path();
        std::fs::write(&db_path, "not a sqlite database\n".repeat(256))?;
        let api = BriefingApi::new(db_path.clone());

        assert!(api.briefings_due(DueQuery::default()).is_err());
        assert!(api.run_outreach(None).is_err());

        cleanup(&db_path);
        Ok(())
    }

    // Test IDs: TAPI-004
    #[test]
    fn concurrent_outreach_runs_open_each_conversation_once() -> Result<()> {
        let db_path = unique_temp_db_path();
        let notifier = Arc::new(CountingNotifier { delivered: AtomicUsize::new(0) });
        let api = BriefingApi::new(db_path.clone()).with_notifier(notifier.clone());
        api.replace_tiers(standard_tiers()?)?;
        for name in ["Ana", "Ben", "Cleo", "Dev"] {
            add_analyst(&api, name, Influence::High)?;
        }

        let handles = (0..2)
            .map(|_| {
                let api = api.clone();
                thread::spawn(move || api.run_outreach(Some(fixture_now())))
            })
            .collect::<Vec<_>>();

        let mut opened = 0;
        for handle in handles {
            let Ok(summary) = handle.join() else {
                return Err(anyhow!("outreach thread panicked"));
            };
            opened += summary?.conversations_opened;
        }

        assert_eq!(opened, 4);
        assert_eq!(notifier.delivered.load(Ordering::SeqCst), 4);
        assert_eq!(api.list_active_conversations()?.len(), 4);

        let rerun = api.run_outreach(Some(fixture_now()))?;
        assert_eq!(rerun.due, 0);
        assert_eq!(rerun.conversations_opened, 0);

        cleanup(&db_path);
        Ok(())
    }

    // Test IDs: TAPI-005
    #[test]
    fn closing_conversation_makes_analyst_due_again() -> Result<()> {
        let db_path = unique_temp_db_path();
        let api = BriefingApi::new(db_path.clone());
        api.replace_tiers(standard_tiers()?)?;
        let analyst = add_analyst(&api, "Ivy", Influence::High)?;

        let summary = api.run_outreach(Some(fixture_now()))?;
        assert_eq!(summary.conversations_opened, 1);
        let while_active =
            api.briefings_due(DueQuery { as_of: Some(fixture_now()), ..DueQuery::default() })?;
        assert!(while_active.items.is_empty());

        api.close_conversation(summary.opened_conversation_ids[0], Some(fixture_now()))?;
        let listing =
            api.briefings_due(DueQuery { as_of: Some(fixture_now()), ..DueQuery::default() })?;
        assert_eq!(listing.items.len(), 1);
        assert_eq!(listing.items[0].analyst_id, analyst.analyst_id);

        cleanup(&db_path);
        Ok(())
    }

    // Test IDs: TAPI-006
    #[test]
    fn tier_set_rejects_unknown_influence_and_keeps_previous_set() -> Result<()> {
        let db_path = unique_temp_db_path();
        let api = BriefingApi::new(db_path.clone());
        api.replace_tiers(standard_tiers()?)?;

        let bad = parse_tier_set_yaml(
            "tiers:\n  - name: Critical\n    influence: critical\n    briefing_frequency: 7\n",
        )?;
        assert!(api.replace_tiers(bad).is_err());
        assert!(parse_tier_set_yaml(
            "tiers:\n  - name: Zero\n    influence: low\n    briefing_frequency: 0\n"
        )
        .is_err());
        assert_eq!(api.list_tiers()?.len(), 4);

        let shipped = parse_tier_set_yaml(include_str!("../../../config/tiers.yaml"))?;
        let replaced = api.replace_tiers(shipped)?;
        assert_eq!(replaced.len(), 4);
        assert_eq!(
            api.list_tiers()?.iter().map(|tier| tier.briefing_frequency.days()).collect::<Vec<_>>(),
            vec![Some(30), Some(60), Some(90), None]
        );

        cleanup(&db_path);
        Ok(())
    }

    // Test IDs: TAPI-007
    #[test]
    fn migrate_dry_run_reports_pending_versions() -> Result<()> {
        let db_path = unique_temp_db_path();
        let api = BriefingApi::new(db_path.clone());

        let planned = api.migrate(true)?;
        assert_eq!(planned.would_apply_versions, vec![1, 2]);
        assert!(planned.after_version.is_none());

        let applied = api.migrate(false)?;
        assert_eq!(applied.after_version, Some(2));
        assert_eq!(applied.up_to_date, Some(true));

        cleanup(&db_path);
        Ok(())
    }

    // Test IDs: TAPI-008
    #[test]
    fn briefing_older_than_lookback_still_drives_overdue_days() -> Result<()> {
        let db_path = unique_temp_db_path();
        let api = BriefingApi::new(db_path.clone());
        api.replace_tiers(parse_tier_set_yaml(
            "tiers:\n  - name: High\n    influence: high\n    briefing_frequency: 30\n",
        )?)?;
        let hana = add_analyst(&api, "Hana", Influence::High)?;
        add_completed(&api, &hana, 400)?;
        let last = add_completed(&api, &hana, 45)?;

        let listing =
            api.briefings_due(DueQuery { as_of: Some(fixture_now()), ..DueQuery::default() })?;
        assert_eq!(listing.filters.lookback_days, 30);
        assert_eq!(listing.items.len(), 1);
        let item = &listing.items[0];
        assert_eq!(item.days_since_last_briefing, 45);
        assert_eq!(item.overdue_days, 15);
        assert_eq!(
            item.last_briefing.as_ref().map(|briefing| briefing.briefing_id),
            Some(last.briefing_id)
        );

        cleanup(&db_path);
        Ok(())
    }

    // Test IDs: TAPI-009
    #[test]
    fn snapshot_id_ignores_tier_filter_padding() -> Result<()> {
        let db_path = unique_temp_db_path();
        let api = BriefingApi::new(db_path.clone());
        api.replace_tiers(standard_tiers()?)?;
        let hana = add_analyst(&api, "Hana", Influence::High)?;
        add_completed(&api, &hana, 45)?;

        let due_for = |tier: Option<&str>| {
            api.briefings_due(DueQuery {
                as_of: Some(fixture_now()),
                tier: tier.map(str::to_string),
                ..DueQuery::default()
            })
        };
        let plain = due_for(Some("high"))?;
        let padded = due_for(Some(" High "))?;
        assert_eq!(plain.items.len(), 1);
        assert_eq!(plain.snapshot_id, padded.snapshot_id);
        assert_eq!(due_for(Some("   "))?.snapshot_id, due_for(None)?.snapshot_id);

        cleanup(&db_path);
        Ok(())
    }

    // Test IDs: TAPI-010
    #[test]
    fn tier_frequency_above_one_century_is_rejected() -> Result<()> {
        let parsed = parse_tier_set_yaml(
            "tiers:\n  - name: High\n    influence: high\n    briefing_frequency: 1000000000\n",
        );
        assert!(parsed.is_err());

        let db_path = unique_temp_db_path();
        let api = BriefingApi::new(db_path.clone());
        let mut tiers = standard_tiers()?;
        tiers[0].briefing_frequency = Frequency::every_days(MAX_FREQUENCY_DAYS)?;
        api.replace_tiers(tiers)?;
        let vik = add_analyst(&api, "Vik", Influence::VeryHigh)?;
        add_completed(&api, &vik, 10)?;

        let listing =
            api.briefings_due(DueQuery { as_of: Some(fixture_now()), ..DueQuery::default() })?;
        assert_eq!(listing.filters.lookback_days, MAX_FREQUENCY_DAYS);
        assert!(listing.items.is_empty());

        cleanup(&db_path);
        Ok(())
    }

    #[test]
    fn suggested_times_follow_configured_zone() -> Result<()> {
        let settings = SchedulerSettings::from_yaml_str(
            "slots:\n  morning: '09:30'\n  afternoon: '15:00'\n  \
             utc_offset_hours: 0\n  zone_label: UTC\n",
        )?;
        let api = BriefingApi::with_settings(unique_temp_db_path(), settings);

        let slots = api.suggested_times(Some(fixture_now()))?;
        assert_eq!(slots.len(), 6);
        assert!(slots[0].label.ends_with("at 9:30 AM UTC"));
        assert!(slots[1].label.ends_with("at 3:00 PM UTC"));
        Ok(())
    }
}
