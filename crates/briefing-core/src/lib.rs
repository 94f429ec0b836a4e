use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};
use std::num::NonZeroU32;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use ulid::Ulid;

pub mod slots;

pub use slots::{suggested_times, SlotSettings, SuggestedTime};

/// Lookback used for "last briefing" scans when nothing else is configured.
pub const DEFAULT_LOOKBACK_DAYS: u32 = 30;

/// Longest cadence or lookback accepted, roughly one century.
pub const MAX_FREQUENCY_DAYS: u32 = 36_500;

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum SchedulingError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("format error: {0}")]
    Format(String),
    #[error("not found: {0}")]
    NotFound(String),
}

macro_rules! ulid_id {
    ($name:ident, $label:literal) => {
        #[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
        pub struct $name(pub Ulid);

        impl $name {
            #[must_use]
            pub fn new() -> Self {
                Self(Ulid::new())
            }

            /// Parse a ULID string into this identifier.
            ///
            /// # Errors
            /// Returns [`SchedulingError::Validation`] when `raw` is not a valid ULID.
            pub fn parse(raw: &str) -> Result<Self, SchedulingError> {
                Ulid::from_string(raw.trim()).map(Self).map_err(|err| {
                    SchedulingError::Validation(format!("invalid {} `{raw}`: {err}", $label))
                })
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

ulid_id!(TierId, "tier_id");
ulid_id!(AnalystId, "analyst_id");
ulid_id!(BriefingId, "briefing_id");
ulid_id!(ConversationId, "conversation_id");

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Influence {
    Low,
    Medium,
    High,
    VeryHigh,
}

impl Influence {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::VeryHigh => "very_high",
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
            Self::VeryHigh => "Very High",
        }
    }

    /// Higher rank means more influential.
    #[must_use]
    pub fn rank(self) -> u8 {
        match self {
            Self::VeryHigh => 4,
            Self::High => 3,
            Self::Medium => 2,
            Self::Low => 1,
        }
    }

    /// Accepts `very_high`, `VERY_HIGH`, `Very High` and `very-high` alike.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value
            .trim()
            .chars()
            .map(|ch| if ch == ' ' || ch == '-' { '_' } else { ch.to_ascii_lowercase() })
            .collect::<String>();
        match normalized.as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "very_high" => Some(Self::VeryHigh),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AnalystStatus {
    Active,
    Inactive,
    Archived,
}

impl AnalystStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Archived => "archived",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "active" => Some(Self::Active),
            "inactive" => Some(Self::Inactive),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BriefingStatus {
    Scheduled,
    Completed,
    Cancelled,
    Rescheduled,
}

impl BriefingStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Rescheduled => "rescheduled",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "scheduled" => Some(Self::Scheduled),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            "rescheduled" => Some(Self::Rescheduled),
            _ => None,
        }
    }

    /// A pending booking that suppresses new outreach when it lies in the future.
    #[must_use]
    pub fn is_pending(self) -> bool {
        matches!(self, Self::Scheduled | Self::Rescheduled)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AttendeeRole {
    Primary,
    Secondary,
}

impl AttendeeRole {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "primary" => Some(Self::Primary),
            "secondary" => Some(Self::Secondary),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Active,
    Closed,
}

impl ConversationStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Closed => "closed",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "active" => Some(Self::Active),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

/// How often analysts on a tier should be briefed.
///
/// On the wire this is a positive day count, or `null` for never. The legacy
/// `-1` sentinel is accepted on input and read as [`Frequency::Never`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(try_from = "Option<i64>", into = "Option<u32>")]
pub enum Frequency {
    Never,
    EveryDays(NonZeroU32),
}

impl Frequency {
    /// Build a day-based cadence.
    ///
    /// # Errors
    /// Returns [`SchedulingError::Validation`] when `days` is zero or above
    /// [`MAX_FREQUENCY_DAYS`].
    pub fn every_days(days: u32) -> Result<Self, SchedulingError> {
        if days > MAX_FREQUENCY_DAYS {
            return Err(SchedulingError::Validation(format!(
                "briefing frequency MUST be <= {MAX_FREQUENCY_DAYS} days, got {days}"
            )));
        }
        NonZeroU32::new(days).map(Self::EveryDays).ok_or_else(|| {
            SchedulingError::Validation("briefing frequency MUST be >= 1 day".to_string())
        })
    }

    #[must_use]
    pub fn days(self) -> Option<u32> {
        match self {
            Self::Never => None,
            Self::EveryDays(days) => Some(days.get()),
        }
    }
}

impl TryFrom<Option<i64>> for Frequency {
    type Error = SchedulingError;

    fn try_from(value: Option<i64>) -> Result<Self, Self::Error> {
        match value {
            None | Some(-1) => Ok(Self::Never),
            Some(days) if days >= 1 => {
                let days = u32::try_from(days).map_err(|_| {
                    SchedulingError::Validation(format!("briefing frequency {days} is too large"))
                })?;
                Self::every_days(days)
            }
            Some(days) => Err(SchedulingError::Validation(format!(
                "briefing frequency MUST be >= 1 day or null for never, got {days}"
            ))),
        }
    }
}

impl From<Frequency> for Option<u32> {
    fn from(value: Frequency) -> Self {
        value.days()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct InfluenceTier {
    pub tier_id: TierId,
    pub name: String,
    pub influence: Influence,
    pub briefing_frequency: Frequency,
    pub is_active: bool,
    pub description: Option<String>,
}

/// Check a full tier set before it replaces the stored one.
///
/// # Errors
/// Returns [`SchedulingError::Validation`] for blank names or when two tiers
/// claim the same influence level.
pub fn validate_tier_set(tiers: &[InfluenceTier]) -> Result<(), SchedulingError> {
    let mut seen = BTreeSet::new();
    for tier in tiers {
        if tier.name.trim().is_empty() {
            return Err(SchedulingError::Validation("tier name MUST be non-empty".to_string()));
        }
        if !seen.insert(tier.influence) {
            return Err(SchedulingError::Validation(format!(
                "influence `{}` is assigned to more than one tier",
                tier.influence.as_str()
            )));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Analyst {
    pub analyst_id: AnalystId,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub company: String,
    pub title: Option<String>,
    pub status: AnalystStatus,
    pub influence: Influence,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Analyst {
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name.trim(), self.last_name.trim())
    }

    #[must_use]
    pub fn contact(&self) -> AnalystContact {
        AnalystContact {
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            email: self.email.clone(),
            company: self.company.clone(),
            title: self.title.clone(),
        }
    }

    /// # Errors
    /// Returns [`SchedulingError::Validation`] when names are blank or the email is malformed.
    pub fn validate(&self) -> Result<(), SchedulingError> {
        if self.first_name.trim().is_empty() || self.last_name.trim().is_empty() {
            return Err(SchedulingError::Validation(
                "analyst first_name and last_name MUST be provided".to_string(),
            ));
        }
        let email = self.email.trim();
        let Some((local, domain)) = email.split_once('@') else {
            return Err(SchedulingError::Validation(format!("invalid analyst email `{email}`")));
        };
        if local.is_empty() || domain.is_empty() || domain.contains('@') {
            return Err(SchedulingError::Validation(format!("invalid analyst email `{email}`")));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct AnalystContact {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub company: String,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
pub struct BriefingAttendee {
    pub analyst_id: AnalystId,
    pub role: AttendeeRole,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Briefing {
    pub briefing_id: BriefingId,
    pub title: String,
    #[serde(with = "time::serde::rfc3339")]
    pub scheduled_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    pub status: BriefingStatus,
    pub calendar_event_id: Option<String>,
    pub summary: Option<String>,
    pub attendees: Vec<BriefingAttendee>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Briefing {
    /// When the meeting actually happened, falling back to the booked start.
    #[must_use]
    pub fn occurred_at(&self) -> OffsetDateTime {
        self.completed_at.unwrap_or(self.scheduled_at)
    }

    #[must_use]
    pub fn reference(&self, at: OffsetDateTime) -> BriefingRef {
        BriefingRef {
            briefing_id: self.briefing_id,
            title: self.title.clone(),
            status: self.status,
            at,
        }
    }

    /// # Errors
    /// Returns [`SchedulingError::Validation`] for a blank title, missing or
    /// duplicated attendees, or a completion timestamp on a non-completed briefing.
    pub fn validate(&self) -> Result<(), SchedulingError> {
        if self.title.trim().is_empty() {
            return Err(SchedulingError::Validation("briefing title MUST be non-empty".to_string()));
        }
        if self.attendees.is_empty() {
            return Err(SchedulingError::Validation(
                "briefing MUST have at least one analyst attendee".to_string(),
            ));
        }
        let mut seen = BTreeSet::new();
        for attendee in &self.attendees {
            if !seen.insert(attendee.analyst_id) {
                return Err(SchedulingError::Validation(format!(
                    "analyst {} is listed twice on one briefing",
                    attendee.analyst_id
                )));
            }
        }
        if self.completed_at.is_some() && self.status != BriefingStatus::Completed {
            return Err(SchedulingError::Validation(
                "completed_at is only allowed on completed briefings".to_string(),
            ));
        }
        Ok(())
    }
}

/// A status change requested for an existing briefing.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum BriefingTransition {
    Complete {
        #[serde(with = "time::serde::rfc3339")]
        completed_at: OffsetDateTime,
        summary: Option<String>,
    },
    Cancel,
    Reschedule {
        #[serde(with = "time::serde::rfc3339")]
        scheduled_at: OffsetDateTime,
    },
}

impl Briefing {
    /// Apply `transition`, returning the updated briefing.
    ///
    /// Only scheduled or rescheduled briefings can change; completed and
    /// cancelled are terminal.
    ///
    /// # Errors
    /// Returns [`SchedulingError::Validation`] when the briefing is terminal.
    pub fn apply(&self, transition: BriefingTransition) -> Result<Self, SchedulingError> {
        if !self.status.is_pending() {
            return Err(SchedulingError::Validation(format!(
                "briefing {} is {} and cannot change status",
                self.briefing_id,
                self.status.as_str()
            )));
        }

        let mut next = self.clone();
        match transition {
            BriefingTransition::Complete { completed_at, summary } => {
                next.status = BriefingStatus::Completed;
                next.completed_at = Some(completed_at);
                if summary.is_some() {
                    next.summary = summary;
                }
            }
            BriefingTransition::Cancel => next.status = BriefingStatus::Cancelled,
            BriefingTransition::Reschedule { scheduled_at } => {
                next.status = BriefingStatus::Rescheduled;
                next.scheduled_at = scheduled_at;
            }
        }
        Ok(next)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct SchedulingConversation {
    pub conversation_id: ConversationId,
    pub analyst_id: AnalystId,
    pub status: ConversationStatus,
    pub subject: String,
    pub suggested_times: Vec<SuggestedTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub closed_at: Option<OffsetDateTime>,
}

impl SchedulingConversation {
    #[must_use]
    pub fn open(
        analyst_id: AnalystId,
        subject: String,
        suggested_times: Vec<SuggestedTime>,
        now: OffsetDateTime,
    ) -> Self {
        Self {
            conversation_id: ConversationId::new(),
            analyst_id,
            status: ConversationStatus::Active,
            subject,
            suggested_times,
            created_at: now,
            closed_at: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct BriefingRef {
    pub briefing_id: BriefingId,
    pub title: String,
    pub status: BriefingStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
}

/// One analyst with everything the due-date policy needs to judge them.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct SchedulingCandidate {
    pub analyst: Analyst,
    pub tier: Option<InfluenceTier>,
    pub last_completed_briefing: Option<BriefingRef>,
    pub next_scheduled_briefing: Option<BriefingRef>,
    pub has_active_conversation: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    AnalystNotActive,
    TierUnresolved,
    TierInactive,
    TierNeverDue,
    FutureBriefingScheduled,
    ActiveConversation,
    WithinCadence,
}

impl SkipReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AnalystNotActive => "analyst_not_active",
            Self::TierUnresolved => "tier_unresolved",
            Self::TierInactive => "tier_inactive",
            Self::TierNeverDue => "tier_never_due",
            Self::FutureBriefingScheduled => "future_briefing_scheduled",
            Self::ActiveConversation => "active_conversation",
            Self::WithinCadence => "within_cadence",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct DueAnalyst {
    pub analyst_id: AnalystId,
    pub analyst_name: String,
    pub contact: AnalystContact,
    pub influence: Influence,
    pub tier_name: String,
    pub briefing_frequency_days: u32,
    pub days_since_last_briefing: u32,
    pub overdue_days: u32,
    pub last_briefing: Option<BriefingRef>,
    pub next_briefing: Option<BriefingRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct SkippedAnalyst {
    pub analyst_id: AnalystId,
    pub analyst_name: String,
    pub reason: SkipReason,
    pub tier_name: Option<String>,
    pub days_since_last_briefing: Option<u32>,
    pub next_briefing: Option<BriefingRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub enum Evaluation {
    Due(DueAnalyst),
    Skipped(SkippedAnalyst),
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct DueReport {
    #[serde(with = "time::serde::rfc3339")]
    pub generated_at: OffsetDateTime,
    pub lookback_days: u32,
    pub due: Vec<DueAnalyst>,
    pub skipped: Vec<SkippedAnalyst>,
}

/// Whole days from `earlier` to `later`, truncated and never negative.
#[must_use]
pub fn whole_days_between(earlier: OffsetDateTime, later: OffsetDateTime) -> u32 {
    let days = (later - earlier).whole_days().max(0);
    u32::try_from(days).unwrap_or(u32::MAX)
}

/// Prefetch window for completed briefings, in days.
///
/// At least the longest active cadence, capped at [`MAX_FREQUENCY_DAYS`]. The
/// window only bounds the bulk read; an analyst with nothing inside it still
/// gets their latest completed briefing.
#[must_use]
pub fn effective_lookback_days(configured: u32, tiers: &[InfluenceTier]) -> u32 {
    tiers
        .iter()
        .filter(|tier| tier.is_active)
        .filter_map(|tier| tier.briefing_frequency.days())
        .fold(configured.max(1), u32::max)
        .min(MAX_FREQUENCY_DAYS)
}

#[derive(Debug, Default)]
struct BriefingWindow<'a> {
    last_completed: Option<(&'a Briefing, OffsetDateTime)>,
    next_scheduled: Option<&'a Briefing>,
}

fn later_completion<'a>(
    current: Option<(&'a Briefing, OffsetDateTime)>,
    briefing: &'a Briefing,
    at: OffsetDateTime,
) -> Option<(&'a Briefing, OffsetDateTime)> {
    match current {
        Some((existing, existing_at))
            if existing_at > at
                || (existing_at == at && existing.briefing_id <= briefing.briefing_id) =>
        {
            Some((existing, existing_at))
        }
        _ => Some((briefing, at)),
    }
}

fn earlier_booking<'a>(
    current: Option<&'a Briefing>,
    briefing: &'a Briefing,
) -> Option<&'a Briefing> {
    match current {
        Some(existing)
            if existing.scheduled_at < briefing.scheduled_at
                || (existing.scheduled_at == briefing.scheduled_at
                    && existing.briefing_id <= briefing.briefing_id) =>
        {
            Some(existing)
        }
        _ => Some(briefing),
    }
}

fn briefing_windows(
    briefings: &[Briefing],
    now: OffsetDateTime,
) -> BTreeMap<AnalystId, BriefingWindow<'_>> {
    let mut windows: BTreeMap<AnalystId, BriefingWindow<'_>> = BTreeMap::new();

    for briefing in briefings {
        for attendee in &briefing.attendees {
            let window = windows.entry(attendee.analyst_id).or_default();
            match briefing.status {
                BriefingStatus::Completed => {
                    let at = briefing.occurred_at();
                    if at <= now {
                        window.last_completed =
                            later_completion(window.last_completed, briefing, at);
                    }
                }
                BriefingStatus::Scheduled | BriefingStatus::Rescheduled => {
                    if briefing.scheduled_at > now {
                        window.next_scheduled = earlier_booking(window.next_scheduled, briefing);
                    }
                }
                BriefingStatus::Cancelled => {}
            }
        }
    }

    windows
}

/// Join analysts with their tier, briefing window and conversation state.
///
/// Tiers are matched on the shared [`Influence`] level. Every completed
/// briefing up to `now` is considered, however old. The output keeps the
/// order of `analysts`.
#[must_use]
pub fn assemble_candidates(
    analysts: &[Analyst],
    tiers: &[InfluenceTier],
    briefings: &[Briefing],
    active_conversations: &BTreeSet<AnalystId>,
    now: OffsetDateTime,
) -> Vec<SchedulingCandidate> {
    let tiers_by_influence =
        tiers.iter().map(|tier| (tier.influence, tier)).collect::<BTreeMap<_, _>>();
    let windows = briefing_windows(briefings, now);

    analysts
        .iter()
        .map(|analyst| {
            let window = windows.get(&analyst.analyst_id);
            SchedulingCandidate {
                analyst: analyst.clone(),
                tier: tiers_by_influence.get(&analyst.influence).map(|tier| (*tier).clone()),
                last_completed_briefing: window
                    .and_then(|window| window.last_completed)
                    .map(|(briefing, at)| briefing.reference(at)),
                next_scheduled_briefing: window
                    .and_then(|window| window.next_scheduled)
                    .map(|briefing| briefing.reference(briefing.scheduled_at)),
                has_active_conversation: active_conversations.contains(&analyst.analyst_id),
            }
        })
        .collect()
}

fn skipped(
    candidate: &SchedulingCandidate,
    reason: SkipReason,
    days_since_last_briefing: Option<u32>,
) -> SkippedAnalyst {
    SkippedAnalyst {
        analyst_id: candidate.analyst.analyst_id,
        analyst_name: candidate.analyst.full_name(),
        reason,
        tier_name: candidate.tier.as_ref().map(|tier| tier.name.clone()),
        days_since_last_briefing,
        next_briefing: candidate.next_scheduled_briefing.clone(),
    }
}

/// Decide whether one analyst needs a briefing initiated at `now`.
#[must_use]
pub fn evaluate_candidate(candidate: &SchedulingCandidate, now: OffsetDateTime) -> Evaluation {
    if candidate.analyst.status != AnalystStatus::Active {
        return Evaluation::Skipped(skipped(candidate, SkipReason::AnalystNotActive, None));
    }

    let Some(tier) = candidate.tier.as_ref() else {
        return Evaluation::Skipped(skipped(candidate, SkipReason::TierUnresolved, None));
    };
    if !tier.is_active {
        return Evaluation::Skipped(skipped(candidate, SkipReason::TierInactive, None));
    }
    let Some(frequency_days) = tier.briefing_frequency.days() else {
        return Evaluation::Skipped(skipped(candidate, SkipReason::TierNeverDue, None));
    };

    let days_since = candidate
        .last_completed_briefing
        .as_ref()
        .map(|briefing| whole_days_between(briefing.at, now));

    // A pending booking outranks any overdue amount.
    if candidate.next_scheduled_briefing.is_some() {
        return Evaluation::Skipped(skipped(
            candidate,
            SkipReason::FutureBriefingScheduled,
            days_since,
        ));
    }
    if candidate.has_active_conversation {
        return Evaluation::Skipped(skipped(candidate, SkipReason::ActiveConversation, days_since));
    }

    let (days_since_last_briefing, overdue_days) = match days_since {
        None => (0, 0),
        Some(days) if days >= frequency_days => (days, days - frequency_days),
        Some(days) => {
            return Evaluation::Skipped(skipped(candidate, SkipReason::WithinCadence, Some(days)));
        }
    };

    Evaluation::Due(DueAnalyst {
        analyst_id: candidate.analyst.analyst_id,
        analyst_name: candidate.analyst.full_name(),
        contact: candidate.analyst.contact(),
        influence: tier.influence,
        tier_name: tier.name.clone(),
        briefing_frequency_days: frequency_days,
        days_since_last_briefing,
        overdue_days,
        last_briefing: candidate.last_completed_briefing.clone(),
        next_briefing: candidate.next_scheduled_briefing.clone(),
    })
}

/// Run the due-date policy over every candidate, keeping input order.
#[must_use]
pub fn compute_due_report(
    candidates: &[SchedulingCandidate],
    now: OffsetDateTime,
    lookback_days: u32,
) -> DueReport {
    let mut due = Vec::new();
    let mut skipped = Vec::new();
    for candidate in candidates {
        match evaluate_candidate(candidate, now) {
            Evaluation::Due(entry) => due.push(entry),
            Evaluation::Skipped(entry) => skipped.push(entry),
        }
    }

    DueReport { generated_at: now, lookback_days, due, skipped }
}

pub const DEFAULT_SUBJECT_PREFIX: &str = "Briefing request";

/// Subject line for an outreach conversation, e.g.
/// `Briefing request: Jane Doe (Example Research)`.
#[must_use]
pub fn outreach_subject(prefix: &str, contact: &AnalystContact) -> String {
    let prefix = match prefix.trim() {
        "" => DEFAULT_SUBJECT_PREFIX,
        trimmed => trimmed,
    };
    format!(
        "{prefix}: {} {} ({})",
        contact.first_name.trim(),
        contact.last_name.trim(),
        contact.company.trim()
    )
}
