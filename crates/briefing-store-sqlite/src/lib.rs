use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use briefing_core::{
    validate_tier_set, Analyst, AnalystId, AnalystStatus, AttendeeRole, Briefing,
    BriefingAttendee, BriefingId, BriefingStatus, BriefingTransition, ConversationId,
    ConversationStatus, Frequency, Influence, InfluenceTier, SchedulingConversation,
    SchedulingError, SuggestedTime, TierId, MAX_FREQUENCY_DAYS,
};
use rusqlite::{params, Connection, DatabaseName, ErrorCode, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime, UtcOffset};
use tracing::{debug, info};

const LATEST_SCHEMA_VERSION: i64 = 2;

const ONE_ACTIVE_CONVERSATION_INDEX: &str = "ux_scheduling_conversations_one_active";

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS influence_tiers (
  tier_id TEXT PRIMARY KEY,
  name TEXT NOT NULL CHECK (length(trim(name)) > 0),
  influence TEXT NOT NULL UNIQUE CHECK (influence IN ('low','medium','high','very_high')),
  briefing_frequency_days INTEGER
    CHECK (briefing_frequency_days IS NULL OR briefing_frequency_days >= 1),
  is_active INTEGER NOT NULL CHECK (is_active IN (0, 1)),
  description TEXT
);

CREATE TABLE IF NOT EXISTS analysts (
  analyst_id TEXT PRIMARY KEY,
  first_name TEXT NOT NULL,
  last_name TEXT NOT NULL,
  email TEXT NOT NULL UNIQUE,
  company TEXT NOT NULL,
  title TEXT,
  status TEXT NOT NULL CHECK (status IN ('active','inactive','archived')),
  influence TEXT NOT NULL CHECK (influence IN ('low','medium','high','very_high')),
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS briefings (
  briefing_id TEXT PRIMARY KEY,
  title TEXT NOT NULL,
  scheduled_at TEXT NOT NULL,
  completed_at TEXT,
  status TEXT NOT NULL CHECK (status IN ('scheduled','completed','cancelled','rescheduled')),
  calendar_event_id TEXT,
  summary TEXT,
  created_at TEXT NOT NULL,
  CHECK (completed_at IS NULL OR status = 'completed')
);

CREATE TABLE IF NOT EXISTS briefing_attendees (
  briefing_id TEXT NOT NULL,
  analyst_id TEXT NOT NULL,
  role TEXT NOT NULL CHECK (role IN ('primary','secondary')),
  PRIMARY KEY (briefing_id, analyst_id),
  FOREIGN KEY (briefing_id) REFERENCES briefings(briefing_id),
  FOREIGN KEY (analyst_id) REFERENCES analysts(analyst_id)
);

CREATE TABLE IF NOT EXISTS scheduling_conversations (
  conversation_id TEXT PRIMARY KEY,
  analyst_id TEXT NOT NULL,
  status TEXT NOT NULL CHECK (status IN ('active','closed')),
  subject TEXT NOT NULL,
  suggested_times_json TEXT NOT NULL,
  created_at TEXT NOT NULL,
  closed_at TEXT,
  FOREIGN KEY (analyst_id) REFERENCES analysts(analyst_id)
);

CREATE INDEX IF NOT EXISTS idx_analysts_status ON analysts(status);
CREATE INDEX IF NOT EXISTS idx_briefings_status_scheduled_at ON briefings(status, scheduled_at);
CREATE INDEX IF NOT EXISTS idx_briefing_attendees_analyst ON briefing_attendees(analyst_id);
CREATE INDEX IF NOT EXISTS idx_scheduling_conversations_analyst
  ON scheduling_conversations(analyst_id);
";

// Older databases may hold several active conversations per analyst; keep the newest.
const MIGRATION_002_CLOSE_DUPLICATES_SQL: &str = r"
UPDATE scheduling_conversations
SET status = 'closed', closed_at = ?1
WHERE status = 'active'
  AND conversation_id NOT IN (
    SELECT MAX(conversation_id)
    FROM scheduling_conversations
    WHERE status = 'active'
    GROUP BY analyst_id
  )
";

const MIGRATION_002_INDEX_SQL: &str = r"
CREATE UNIQUE INDEX IF NOT EXISTS ux_scheduling_conversations_one_active
  ON scheduling_conversations(analyst_id)
  WHERE status = 'active';
";

const TIER_COLUMNS: &str =
    "tier_id, name, influence, briefing_frequency_days, is_active, description";
const ANALYST_COLUMNS: &str = "analyst_id, first_name, last_name, email, company, title, status, \
                               influence, created_at, updated_at";
const BRIEFING_COLUMNS: &str = "briefing_id, title, scheduled_at, completed_at, status, \
                                calendar_event_id, summary, created_at";
const CONVERSATION_COLUMNS: &str =
    "conversation_id, analyst_id, status, subject, suggested_times_json, created_at, closed_at";

pub struct SqliteStore {
    conn: Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
    pub inferred_from_legacy: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForeignKeyViolation {
    pub table: String,
    pub rowid: i64,
    pub parent: String,
    pub fk_index: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntegrityReport {
    pub quick_check_ok: bool,
    pub quick_check_message: String,
    pub foreign_key_violations: Vec<ForeignKeyViolation>,
    pub schema_status: SchemaStatus,
}

/// Result of trying to open a scheduling conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ConversationOpen {
    Opened { conversation: SchedulingConversation },
    AlreadyActive { existing_conversation_id: Option<ConversationId> },
}

/// Everything the due-date policy reads, loaded from one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulingSnapshot {
    pub analysts: Vec<Analyst>,
    pub tiers: Vec<InfluenceTier>,
    pub briefings: Vec<Briefing>,
    pub active_conversations: BTreeSet<AnalystId>,
}

impl SqliteStore {
    /// Open a SQLite-backed briefing store and configure required runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Report current and target schema versions plus pending migrations.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read or initialized.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;
        let (current_version, inferred_from_legacy) = detect_effective_schema_version(&self.conn)?;
        let pending_versions = if current_version < LATEST_SCHEMA_VERSION {
            ((current_version + 1)..=LATEST_SCHEMA_VERSION).collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        Ok(SchemaStatus {
            current_version,
            target_version: LATEST_SCHEMA_VERSION,
            pending_versions,
            inferred_from_legacy,
        })
    }

    /// Apply all forward migrations up to the latest supported schema version.
    ///
    /// # Errors
    /// Returns an error when migration bootstrapping or any migration step fails.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let mut version = current_schema_version(&self.conn)?;

        if version == 0 {
            version = self.bootstrap_schema_version()?;
        }

        if version < 2 {
            self.apply_migration_2()?;
            version = current_schema_version(&self.conn)?;
        }

        if version != LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {version}; expected {LATEST_SCHEMA_VERSION}"
            ));
        }

        Ok(())
    }

    fn bootstrap_schema_version(&self) -> Result<i64> {
        if !table_exists(&self.conn, "analysts")? {
            apply_migration_1(&self.conn)?;
            info!(version = 1, "applied schema migration");
            return Ok(1);
        }

        if index_exists(&self.conn, ONE_ACTIVE_CONVERSATION_INDEX)? {
            // Tables already carry the v2 index but the migration rows are missing.
            record_schema_version(&self.conn, 1)?;
            record_schema_version(&self.conn, 2)?;
            return Ok(2);
        }

        if table_exists(&self.conn, "scheduling_conversations")? {
            record_schema_version(&self.conn, 1)?;
            return Ok(1);
        }

        Err(anyhow!(
            "database schema is invalid: analysts exists without scheduling_conversations"
        ))
    }

    fn apply_migration_2(&mut self) -> Result<()> {
        let tx = self.conn.transaction().context("failed to start migration v2 transaction")?;

        let now = now_rfc3339()?;
        let closed = tx
            .execute(MIGRATION_002_CLOSE_DUPLICATES_SQL, params![now])
            .context("failed to close duplicate active conversations")?;
        tx.execute_batch(MIGRATION_002_INDEX_SQL)
            .context("failed to create active conversation unique index")?;
        tx.execute(
            "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
            params![2_i64, now],
        )
        .context("failed to record migration version 2")?;

        tx.commit().context("failed to commit migration v2")?;
        info!(version = 2, closed_duplicate_conversations = closed, "applied schema migration");
        Ok(())
    }

    /// Atomically replace the whole influence tier set.
    ///
    /// # Errors
    /// Returns an error when the set is invalid or any write fails; the
    /// previous set is kept in that case.
    pub fn replace_tiers(&mut self, tiers: &[InfluenceTier]) -> Result<()> {
        validate_tier_set(tiers)?;

        let tx = self.conn.transaction().context("failed to start transaction")?;
        tx.execute("DELETE FROM influence_tiers", []).context("failed to clear influence tiers")?;
        for tier in tiers {
            tx.execute(
                "INSERT INTO influence_tiers(
                    tier_id, name, influence, briefing_frequency_days, is_active, description
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    tier.tier_id.to_string(),
                    tier.name.trim(),
                    tier.influence.as_str(),
                    tier.briefing_frequency.days().map(i64::from),
                    tier.is_active,
                    tier.description,
                ],
            )
            .with_context(|| format!("failed to insert influence tier {}", tier.name))?;
        }
        tx.commit().context("failed to commit tier replacement")?;

        info!(tiers = tiers.len(), "replaced influence tier set");
        Ok(())
    }

    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn list_tiers(&self) -> Result<Vec<InfluenceTier>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {TIER_COLUMNS} FROM influence_tiers
             ORDER BY CASE influence
               WHEN 'very_high' THEN 0 WHEN 'high' THEN 1 WHEN 'medium' THEN 2 ELSE 3
             END"
        ))?;
        let mut rows = stmt.query([])?;
        let mut tiers = Vec::new();
        while let Some(row) = rows.next()? {
            tiers.push(tier_from_row(row)?);
        }
        Ok(tiers)
    }

    /// Persist a new analyst.
    ///
    /// # Errors
    /// Returns an error when validation fails, the email is already taken, or the insert fails.
    pub fn insert_analyst(&mut self, analyst: &Analyst) -> Result<()> {
        analyst.validate()?;

        let inserted = self.conn.execute(
            &format!(
                "INSERT INTO analysts({ANALYST_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
            ),
            params![
                analyst.analyst_id.to_string(),
                analyst.first_name.trim(),
                analyst.last_name.trim(),
                analyst.email.trim(),
                analyst.company.trim(),
                analyst.title,
                analyst.status.as_str(),
                analyst.influence.as_str(),
                rfc3339(analyst.created_at)?,
                rfc3339(analyst.updated_at)?,
            ],
        );

        match inserted {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => Err(SchedulingError::Validation(format!(
                "an analyst with email `{}` already exists",
                analyst.email.trim()
            ))
            .into()),
            Err(err) => Err(err).context("failed to insert analyst"),
        }
    }

    /// # Errors
    /// Returns an error when the row cannot be read or decoded.
    pub fn get_analyst(&self, analyst_id: AnalystId) -> Result<Option<Analyst>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {ANALYST_COLUMNS} FROM analysts WHERE analyst_id = ?1"))?;
        let mut rows = stmt.query(params![analyst_id.to_string()])?;
        match rows.next()? {
            Some(row) => Ok(Some(analyst_from_row(row)?)),
            None => Ok(None),
        }
    }

    fn require_analyst(&self, analyst_id: AnalystId) -> Result<Analyst> {
        self.get_analyst(analyst_id)?
            .ok_or_else(|| SchedulingError::NotFound(format!("analyst {analyst_id}")).into())
    }

    /// List analysts, optionally restricted to one status, alphabetically by name.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn list_analysts(&self, status: Option<AnalystStatus>) -> Result<Vec<Analyst>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ANALYST_COLUMNS} FROM analysts
             WHERE ?1 IS NULL OR status = ?1
             ORDER BY first_name ASC, last_name ASC, analyst_id ASC"
        ))?;
        let mut rows = stmt.query(params![status.map(AnalystStatus::as_str)])?;
        let mut analysts = Vec::new();
        while let Some(row) = rows.next()? {
            analysts.push(analyst_from_row(row)?);
        }
        Ok(analysts)
    }

    /// # Errors
    /// Returns an error when the analyst does not exist or the update fails.
    pub fn set_analyst_status(
        &mut self,
        analyst_id: AnalystId,
        status: AnalystStatus,
        now: OffsetDateTime,
    ) -> Result<Analyst> {
        let changed = self
            .conn
            .execute(
                "UPDATE analysts SET status = ?2, updated_at = ?3 WHERE analyst_id = ?1",
                params![analyst_id.to_string(), status.as_str(), rfc3339(now)?],
            )
            .context("failed to update analyst status")?;
        if changed == 0 {
            return Err(SchedulingError::NotFound(format!("analyst {analyst_id}")).into());
        }
        self.require_analyst(analyst_id)
    }

    /// # Errors
    /// Returns an error when the analyst does not exist or the update fails.
    pub fn set_analyst_influence(
        &mut self,
        analyst_id: AnalystId,
        influence: Influence,
        now: OffsetDateTime,
    ) -> Result<Analyst> {
        let changed = self
            .conn
            .execute(
                "UPDATE analysts SET influence = ?2, updated_at = ?3 WHERE analyst_id = ?1",
                params![analyst_id.to_string(), influence.as_str(), rfc3339(now)?],
            )
            .context("failed to update analyst influence")?;
        if changed == 0 {
            return Err(SchedulingError::NotFound(format!("analyst {analyst_id}")).into());
        }
        self.require_analyst(analyst_id)
    }

    /// Persist a briefing and its attendee rows in one transaction.
    ///
    /// # Errors
    /// Returns an error when validation fails, an attendee is unknown, or any write fails.
    pub fn insert_briefing(&mut self, briefing: &Briefing) -> Result<()> {
        briefing.validate()?;
        for attendee in &briefing.attendees {
            self.require_analyst(attendee.analyst_id)?;
        }

        let tx = self.conn.transaction().context("failed to start transaction")?;
        tx.execute(
            &format!(
                "INSERT INTO briefings({BRIEFING_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
            ),
            params![
                briefing.briefing_id.to_string(),
                briefing.title.trim(),
                rfc3339(briefing.scheduled_at)?,
                briefing.completed_at.map(rfc3339).transpose()?,
                briefing.status.as_str(),
                briefing.calendar_event_id,
                briefing.summary,
                rfc3339(briefing.created_at)?,
            ],
        )
        .context("failed to insert briefing")?;

        for attendee in &briefing.attendees {
            tx.execute(
                "INSERT INTO briefing_attendees(briefing_id, analyst_id, role) VALUES (?1, ?2, ?3)",
                params![
                    briefing.briefing_id.to_string(),
                    attendee.analyst_id.to_string(),
                    attendee.role.as_str(),
                ],
            )
            .context("failed to insert briefing attendee")?;
        }

        tx.commit().context("failed to commit briefing")?;
        Ok(())
    }

    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn get_briefing(&self, briefing_id: BriefingId) -> Result<Option<Briefing>> {
        let mut briefings = self.query_briefings(
            &format!("SELECT {BRIEFING_COLUMNS} FROM briefings WHERE briefing_id = ?1"),
            params![briefing_id.to_string()],
        )?;
        Ok(briefings.pop())
    }

    /// Apply a status transition to a stored briefing.
    ///
    /// # Errors
    /// Returns an error when the briefing is unknown, the transition is not
    /// allowed from its current status, or the update fails.
    pub fn update_briefing_status(
        &mut self,
        briefing_id: BriefingId,
        transition: BriefingTransition,
    ) -> Result<Briefing> {
        let current = self
            .get_briefing(briefing_id)?
            .ok_or_else(|| SchedulingError::NotFound(format!("briefing {briefing_id}")))?;
        let next = current.apply(transition)?;

        self.conn
            .execute(
                "UPDATE briefings
                 SET status = ?2, scheduled_at = ?3, completed_at = ?4, summary = ?5
                 WHERE briefing_id = ?1",
                params![
                    briefing_id.to_string(),
                    next.status.as_str(),
                    rfc3339(next.scheduled_at)?,
                    next.completed_at.map(rfc3339).transpose()?,
                    next.summary,
                ],
            )
            .context("failed to update briefing status")?;

        debug!(%briefing_id, status = next.status.as_str(), "briefing status updated");
        Ok(next)
    }

    /// Briefings an analyst attended or is booked for, most recent first.
    ///
    /// # Errors
    /// Returns an error when the analyst is unknown or rows cannot be decoded.
    pub fn list_briefings_for_analyst(&self, analyst_id: AnalystId) -> Result<Vec<Briefing>> {
        self.require_analyst(analyst_id)?;
        let mut briefings = self.query_briefings(
            &format!(
                "SELECT {BRIEFING_COLUMNS} FROM briefings
                 WHERE briefing_id IN (
                   SELECT briefing_id FROM briefing_attendees WHERE analyst_id = ?1
                 )"
            ),
            params![analyst_id.to_string()],
        )?;
        briefings.sort_by(|left, right| {
            right
                .scheduled_at
                .cmp(&left.scheduled_at)
                .then_with(|| left.briefing_id.cmp(&right.briefing_id))
        });
        Ok(briefings)
    }

    /// Open a conversation unless the analyst already has an active one.
    ///
    /// The unique partial index decides races between concurrent callers:
    /// exactly one insert wins, the others see [`ConversationOpen::AlreadyActive`].
    ///
    /// # Errors
    /// Returns an error when the analyst is unknown or the insert fails for
    /// any reason other than an existing active conversation.
    pub fn open_conversation(
        &mut self,
        conversation: &SchedulingConversation,
    ) -> Result<ConversationOpen> {
        if conversation.status != ConversationStatus::Active {
            return Err(SchedulingError::Validation(
                "new scheduling conversations MUST be active".to_string(),
            )
            .into());
        }
        self.require_analyst(conversation.analyst_id)?;

        let suggested_times = serde_json::to_string(&conversation.suggested_times)
            .context("failed to serialize suggested times")?;
        let inserted = self.conn.execute(
            &format!(
                "INSERT INTO scheduling_conversations({CONVERSATION_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
            ),
            params![
                conversation.conversation_id.to_string(),
                conversation.analyst_id.to_string(),
                conversation.status.as_str(),
                conversation.subject,
                suggested_times,
                rfc3339(conversation.created_at)?,
                Option::<String>::None,
            ],
        );

        match inserted {
            Ok(_) => Ok(ConversationOpen::Opened { conversation: conversation.clone() }),
            Err(err) if is_unique_violation(&err) => {
                let existing = self.active_conversation_for(conversation.analyst_id)?;
                debug!(
                    analyst_id = %conversation.analyst_id,
                    "scheduling conversation already active"
                );
                Ok(ConversationOpen::AlreadyActive {
                    existing_conversation_id: existing.map(|found| found.conversation_id),
                })
            }
            Err(err) => Err(err).context("failed to insert scheduling conversation"),
        }
    }

    /// # Errors
    /// Returns an error when the row cannot be read or decoded.
    pub fn active_conversation_for(
        &self,
        analyst_id: AnalystId,
    ) -> Result<Option<SchedulingConversation>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM scheduling_conversations
             WHERE analyst_id = ?1 AND status = 'active'"
        ))?;
        let mut rows = stmt.query(params![analyst_id.to_string()])?;
        match rows.next()? {
            Some(row) => Ok(Some(conversation_from_row(row)?)),
            None => Ok(None),
        }
    }

    /// # Errors
    /// Returns an error when the conversation is unknown, already closed, or the update fails.
    pub fn close_conversation(
        &mut self,
        conversation_id: ConversationId,
        now: OffsetDateTime,
    ) -> Result<SchedulingConversation> {
        let changed = self
            .conn
            .execute(
                "UPDATE scheduling_conversations SET status = 'closed', closed_at = ?2
                 WHERE conversation_id = ?1 AND status = 'active'",
                params![conversation_id.to_string(), rfc3339(now)?],
            )
            .context("failed to close scheduling conversation")?;

        let conversation = self
            .conn
            .query_row(
                &format!(
                    "SELECT {CONVERSATION_COLUMNS} FROM scheduling_conversations
                     WHERE conversation_id = ?1"
                ),
                params![conversation_id.to_string()],
                |row| Ok(conversation_from_row(row)),
            )
            .optional()
            .context("failed to read scheduling conversation")?
            .transpose()?
            .ok_or_else(|| SchedulingError::NotFound(format!("conversation {conversation_id}")))?;

        if changed == 0 {
            return Err(SchedulingError::Validation(format!(
                "conversation {conversation_id} is already closed"
            ))
            .into());
        }
        Ok(conversation)
    }

    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn list_active_conversations(&self) -> Result<Vec<SchedulingConversation>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM scheduling_conversations
             WHERE status = 'active'
             ORDER BY created_at ASC, conversation_id ASC"
        ))?;
        let mut rows = stmt.query([])?;
        let mut conversations = Vec::new();
        while let Some(row) = rows.next()? {
            conversations.push(conversation_from_row(row)?);
        }
        Ok(conversations)
    }

    /// Load analysts, tiers, relevant briefings and active conversations.
    ///
    /// Completed briefings are bulk-read from the `lookback_days` window ending
    /// at `now`. An analyst with nothing completed in that window still gets
    /// their latest completed briefing up to `now`, however old. Pending
    /// briefings are loaded only when they start after `now`. Cancelled
    /// briefings are never loaded.
    ///
    /// # Errors
    /// Returns an error when any of the underlying reads fail.
    pub fn load_scheduling_snapshot(
        &self,
        now: OffsetDateTime,
        lookback_days: u32,
    ) -> Result<SchedulingSnapshot> {
        let analysts = self.list_analysts(None)?;
        let tiers = self.list_tiers()?;

        let window_start = now
            .checked_sub(Duration::days(i64::from(lookback_days.min(MAX_FREQUENCY_DAYS))))
            .ok_or_else(|| anyhow!("lookback of {lookback_days} days is out of range"))?;
        let window_start = rfc3339(window_start)?;
        let now_text = rfc3339(now)?;
        let mut briefings = self.query_briefings(
            &format!(
                "SELECT {BRIEFING_COLUMNS} FROM briefings
                 WHERE (
                   status = 'completed'
                   AND julianday(COALESCE(completed_at, scheduled_at)) >= julianday(?1)
                   AND julianday(COALESCE(completed_at, scheduled_at)) <= julianday(?2)
                 ) OR (
                   status IN ('scheduled', 'rescheduled')
                   AND julianday(scheduled_at) > julianday(?2)
                 )"
            ),
            params![window_start, now_text],
        )?;

        let mut loaded =
            briefings.iter().map(|briefing| briefing.briefing_id).collect::<BTreeSet<_>>();
        let covered = briefings
            .iter()
            .filter(|briefing| briefing.status == BriefingStatus::Completed)
            .flat_map(|briefing| briefing.attendees.iter().map(|attendee| attendee.analyst_id))
            .collect::<BTreeSet<_>>();
        let mut older = 0_usize;
        for analyst in analysts.iter().filter(|analyst| !covered.contains(&analyst.analyst_id)) {
            let latest = self.latest_completed_briefing_id(analyst.analyst_id, &now_text)?;
            let Some(briefing_id) = latest.filter(|briefing_id| loaded.insert(*briefing_id)) else {
                continue;
            };
            if let Some(briefing) = self.get_briefing(briefing_id)? {
                briefings.push(briefing);
                older += 1;
            }
        }
        if older > 0 {
            briefings.sort_by(|left, right| {
                left.scheduled_at
                    .cmp(&right.scheduled_at)
                    .then_with(|| left.briefing_id.cmp(&right.briefing_id))
            });
        }

        let active_conversations = self
            .list_active_conversations()?
            .into_iter()
            .map(|conversation| conversation.analyst_id)
            .collect();

        debug!(
            analysts = analysts.len(),
            tiers = tiers.len(),
            briefings = briefings.len(),
            older_completed = older,
            lookback_days,
            "loaded scheduling snapshot"
        );

        Ok(SchedulingSnapshot { analysts, tiers, briefings, active_conversations })
    }

    fn latest_completed_briefing_id(
        &self,
        analyst_id: AnalystId,
        now_text: &str,
    ) -> Result<Option<BriefingId>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT b.briefing_id FROM briefings b
             JOIN briefing_attendees a ON a.briefing_id = b.briefing_id
             WHERE a.analyst_id = ?1
               AND b.status = 'completed'
               AND julianday(COALESCE(b.completed_at, b.scheduled_at)) <= julianday(?2)
             ORDER BY julianday(COALESCE(b.completed_at, b.scheduled_at)) DESC, b.briefing_id DESC
             LIMIT 1",
        )?;
        let raw: Option<String> = stmt
            .query_row(params![analyst_id.to_string(), now_text], |row| row.get(0))
            .optional()?;
        Ok(raw.map(|raw| BriefingId::parse(&raw)).transpose()?)
    }

    fn query_briefings(&self, sql: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<Briefing>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query(args)?;
        let mut briefings = Vec::new();
        while let Some(row) = rows.next()? {
            briefings.push(briefing_from_row(row)?);
        }
        drop(rows);

        for briefing in &mut briefings {
            briefing.attendees = self.load_attendees(briefing.briefing_id)?;
        }
        briefings.sort_by(|left, right| {
            left.scheduled_at
                .cmp(&right.scheduled_at)
                .then_with(|| left.briefing_id.cmp(&right.briefing_id))
        });
        Ok(briefings)
    }

    fn load_attendees(&self, briefing_id: BriefingId) -> Result<Vec<BriefingAttendee>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT analyst_id, role FROM briefing_attendees
             WHERE briefing_id = ?1
             ORDER BY role ASC, analyst_id ASC",
        )?;
        let mut rows = stmt.query(params![briefing_id.to_string()])?;
        let mut attendees = Vec::new();
        while let Some(row) = rows.next()? {
            let analyst_id_raw: String = row.get(0)?;
            let role_raw: String = row.get(1)?;
            attendees.push(BriefingAttendee {
                analyst_id: AnalystId::parse(&analyst_id_raw)?,
                role: AttendeeRole::parse(&role_raw)
                    .ok_or_else(|| anyhow!("unknown attendee role: {role_raw}"))?,
            });
        }
        Ok(attendees)
    }

    /// Create a `SQLite` backup file of the current main database.
    ///
    /// # Errors
    /// Returns an error when backup directories cannot be created or backup fails.
    pub fn backup_database(&self, out_file: &Path) -> Result<()> {
        if let Some(parent) = out_file.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create parent directory for backup file {}", out_file.display())
            })?;
        }

        self.conn
            .backup(DatabaseName::Main, out_file, None)
            .with_context(|| format!("failed to create sqlite backup at {}", out_file.display()))
    }

    /// Run quick-check, foreign-key-check, and schema status health checks.
    ///
    /// # Errors
    /// Returns an error when any integrity check query fails.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        let quick_check_message: String = self
            .conn
            .query_row("PRAGMA quick_check", [], |row| row.get::<_, String>(0))
            .context("failed to run PRAGMA quick_check")?;

        let mut stmt = self
            .conn
            .prepare("PRAGMA foreign_key_check")
            .context("failed to prepare PRAGMA foreign_key_check")?;
        let rows = stmt.query_map([], |row| {
            Ok(ForeignKeyViolation {
                table: row.get(0)?,
                rowid: row.get(1)?,
                parent: row.get(2)?,
                fk_index: row.get(3)?,
            })
        })?;

        let mut foreign_key_violations = Vec::new();
        for row in rows {
            foreign_key_violations.push(row?);
        }

        let schema_status = self.schema_status()?;
        Ok(IntegrityReport {
            quick_check_ok: quick_check_message == "ok",
            quick_check_message,
            foreign_key_violations,
            schema_status,
        })
    }
}

fn tier_from_row(row: &Row<'_>) -> Result<InfluenceTier> {
    let tier_id_raw: String = row.get(0)?;
    let influence_raw: String = row.get(2)?;
    let frequency_raw: Option<i64> = row.get(3)?;
    Ok(InfluenceTier {
        tier_id: TierId::parse(&tier_id_raw)?,
        name: row.get(1)?,
        influence: Influence::parse(&influence_raw)
            .ok_or_else(|| anyhow!("unknown influence: {influence_raw}"))?,
        briefing_frequency: Frequency::try_from(frequency_raw)?,
        is_active: row.get(4)?,
        description: row.get(5)?,
    })
}

fn analyst_from_row(row: &Row<'_>) -> Result<Analyst> {
    let analyst_id_raw: String = row.get(0)?;
    let status_raw: String = row.get(6)?;
    let influence_raw: String = row.get(7)?;
    let created_at_raw: String = row.get(8)?;
    let updated_at_raw: String = row.get(9)?;
    Ok(Analyst {
        analyst_id: AnalystId::parse(&analyst_id_raw)?,
        first_name: row.get(1)?,
        last_name: row.get(2)?,
        email: row.get(3)?,
        company: row.get(4)?,
        title: row.get(5)?,
        status: AnalystStatus::parse(&status_raw)
            .ok_or_else(|| anyhow!("unknown analyst status: {status_raw}"))?,
        influence: Influence::parse(&influence_raw)
            .ok_or_else(|| anyhow!("unknown influence: {influence_raw}"))?,
        created_at: parse_rfc3339(&created_at_raw)?,
        updated_at: parse_rfc3339(&updated_at_raw)?,
    })
}

fn briefing_from_row(row: &Row<'_>) -> Result<Briefing> {
    let briefing_id_raw: String = row.get(0)?;
    let scheduled_at_raw: String = row.get(2)?;
    let completed_at_raw: Option<String> = row.get(3)?;
    let status_raw: String = row.get(4)?;
    let created_at_raw: String = row.get(7)?;
    Ok(Briefing {
        briefing_id: BriefingId::parse(&briefing_id_raw)?,
        title: row.get(1)?,
        scheduled_at: parse_rfc3339(&scheduled_at_raw)?,
        completed_at: completed_at_raw.as_deref().map(parse_rfc3339).transpose()?,
        status: BriefingStatus::parse(&status_raw)
            .ok_or_else(|| anyhow!("unknown briefing status: {status_raw}"))?,
        calendar_event_id: row.get(5)?,
        summary: row.get(6)?,
        attendees: Vec::new(),
        created_at: parse_rfc3339(&created_at_raw)?,
    })
}

fn conversation_from_row(row: &Row<'_>) -> Result<SchedulingConversation> {
    let conversation_id_raw: String = row.get(0)?;
    let analyst_id_raw: String = row.get(1)?;
    let status_raw: String = row.get(2)?;
    let suggested_times_raw: String = row.get(4)?;
    let created_at_raw: String = row.get(5)?;
    let closed_at_raw: Option<String> = row.get(6)?;
    let suggested_times: Vec<SuggestedTime> = serde_json::from_str(&suggested_times_raw)
        .context("failed to decode suggested_times_json")?;
    Ok(SchedulingConversation {
        conversation_id: ConversationId::parse(&conversation_id_raw)?,
        analyst_id: AnalystId::parse(&analyst_id_raw)?,
        status: ConversationStatus::parse(&status_raw)
            .ok_or_else(|| anyhow!("unknown conversation status: {status_raw}"))?,
        subject: row.get(3)?,
        suggested_times,
        created_at: parse_rfc3339(&created_at_raw)?,
        closed_at: closed_at_raw.as_deref().map(parse_rfc3339).transpose()?,
    })
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == ErrorCode::ConstraintViolation
                && failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

fn apply_migration_1(conn: &Connection) -> Result<()> {
    conn.execute_batch(MIGRATION_001_SQL).context("failed to apply migration v1")?;
    record_schema_version(conn, 1)?;
    Ok(())
}

fn table_exists(conn: &Connection, table_name: &str) -> Result<bool> {
    sqlite_object_exists(conn, "table", table_name)
}

fn index_exists(conn: &Connection, index_name: &str) -> Result<bool> {
    sqlite_object_exists(conn, "index", index_name)
}

fn sqlite_object_exists(conn: &Connection, kind: &str, name: &str) -> Result<bool> {
    let exists = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = ?1 AND name = ?2)",
            params![kind, name],
            |row| row.get::<_, i64>(0),
        )
        .with_context(|| format!("failed to check if {kind} exists: {name}"))?;
    Ok(exists == 1)
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let version = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
            row.get::<_, i64>(0)
        })
        .context("failed to read current schema version")?;
    Ok(version)
}

fn detect_effective_schema_version(conn: &Connection) -> Result<(i64, bool)> {
    let recorded = current_schema_version(conn)?;
    if recorded > 0 {
        return Ok((recorded, false));
    }

    if !table_exists(conn, "analysts")? {
        return Ok((0, false));
    }

    if index_exists(conn, ONE_ACTIVE_CONVERSATION_INDEX)? {
        return Ok((2, true));
    }

    if table_exists(conn, "scheduling_conversations")? {
        return Ok((1, true));
    }

    Err(anyhow!("database schema is invalid: analysts exists without scheduling_conversations"))
}

fn record_schema_version(conn: &Connection, version: i64) -> Result<()> {
    let now = now_rfc3339()?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        params![version, now],
    )
    .with_context(|| format!("failed to record migration version {version}"))?;
    Ok(())
}

fn now_rfc3339() -> Result<String> {
    rfc3339(OffsetDateTime::now_utc())
}

// Stored in UTC so text order and julianday() agree.
fn rfc3339(value: OffsetDateTime) -> Result<String> {
    value
        .to_offset(UtcOffset::UTC)
        .format(&time::format_description::well_known::Rfc3339)
        .context("failed to format RFC3339 timestamp")
}

fn parse_rfc3339(value: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
        .with_context(|| format!("invalid RFC3339 timestamp: {value}"))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::{Arc, Barrier};
    use std::thread;

    use briefing_core::{suggested_times, SlotSettings};
    use ulid::Ulid;

    use super::*;

    fn fixture_now() -> OffsetDateTime {
        OffsetDateTime::UNIX_EPOCH + Duration::days(20_000)
    }

    fn migrated_store() -> Result<SqliteStore> {
        let mut store = SqliteStore::open(Path::new(":memory:"))?;
        store.migrate()?;
        Ok(store)
    }

    fn mk_tier(influence: Influence, days: Option<u32>) -> Result<InfluenceTier> {
        Ok(InfluenceTier {
            tier_id: TierId::new(),
            name: influence.label().to_string(),
            influence,
            briefing_frequency: match days {
                Some(days) => Frequency::every_days(days)?,
                None => Frequency::Never,
            },
            is_active: true,
            description: None,
        })
    }

    fn mk_analyst(first_name: &str, influence: Influence) -> Analyst {
        Analyst {
            analyst_id: AnalystId::new(),
            first_name: first_name.to_string(),
            last_name: "Analyst".to_string(),
            email: format!("{}@research.example", first_name.to_ascii_lowercase()),
            company: "Example Research".to_string(),
            title: None,
            status: AnalystStatus::Active,
            influence,
            created_at: fixture_now(),
            updated_at: fixture_now(),
        }
    }

    fn mk_briefing(
        analyst_id: AnalystId,
        status: BriefingStatus,
        scheduled_at: OffsetDateTime,
    ) -> Briefing {
        Briefing {
            briefing_id: BriefingId::new(),
            title: "Platform roadmap briefing".to_string(),
            scheduled_at,
            completed_at: (status == BriefingStatus::Completed).then_some(scheduled_at),
            status,
            calendar_event_id: Some("evt-123".to_string()),
            summary: None,
            attendees: vec![BriefingAttendee { analyst_id, role: AttendeeRole::Primary }],
            created_at: scheduled_at,
        }
    }

    fn mk_conversation(analyst: &Analyst) -> Result<SchedulingConversation> {
        let slots = suggested_times(fixture_now(), &SlotSettings::default())?;
        Ok(SchedulingConversation::open(
            analyst.analyst_id,
            format!("Briefing request: {}", analyst.full_name()),
            slots,
            fixture_now(),
        ))
    }

    fn cleanup_sqlite_files(db_path: &Path) -> Result<()> {
        for suffix in ["", "-wal", "-shm"] {
            let path = if suffix.is_empty() {
                db_path.to_path_buf()
            } else {
                PathBuf::from(format!("{}{}", db_path.display(), suffix))
            };
            if path.exists() {
                fs::remove_file(&path)
                    .with_context(|| format!("failed to cleanup sqlite file {}", path.display()))?;
            }
        }
        Ok(())
    }

    // Test IDs: TSTORE-001
    #[test]
    fn migrate_reaches_latest_schema_and_is_idempotent() -> Result<()> {
        let mut store = migrated_store()?;
        store.migrate()?;

        let status = store.schema_status()?;
        assert_eq!(status.current_version, LATEST_SCHEMA_VERSION);
        assert!(status.pending_versions.is_empty());
        assert!(!status.inferred_from_legacy);
        Ok(())
    }

    // Test IDs: TSTORE-002
    #[test]
    fn legacy_database_closes_duplicate_active_conversations() -> Result<()> {
        let mut store = SqliteStore::open(Path::new(":memory:"))?;
        store.conn.execute_batch(MIGRATION_001_SQL)?;

        let analyst = mk_analyst("Legacy", Influence::High);
        store.insert_analyst(&analyst)?;
        let older = SchedulingConversation {
            conversation_id: ConversationId(Ulid::from_parts(1_000, 7)),
            ..mk_conversation(&analyst)?
        };
        let newer = SchedulingConversation {
            conversation_id: ConversationId(Ulid::from_parts(2_000, 7)),
            ..mk_conversation(&analyst)?
        };
        for conversation in [&older, &newer] {
            store.conn.execute(
                "INSERT INTO scheduling_conversations(
                    conversation_id, analyst_id, status, subject, suggested_times_json, created_at
                 ) VALUES (?1, ?2, 'active', ?3, '[]', ?4)",
                params![
                    conversation.conversation_id.to_string(),
                    analyst.analyst_id.to_string(),
                    conversation.subject,
                    rfc3339(conversation.created_at)?,
                ],
            )?;
        }

        let before = store.schema_status()?;
        assert_eq!(before.current_version, 1);
        assert_eq!(before.pending_versions, vec![2]);
        assert!(before.inferred_from_legacy);

        store.migrate()?;
        let active = store.list_active_conversations()?;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].conversation_id, newer.conversation_id);
        Ok(())
    }

    // Test IDs: TSTORE-003
    #[test]
    fn sqlite_checks_reject_zero_frequency_and_unknown_influence() -> Result<()> {
        let store = migrated_store()?;

        let zero_frequency = store.conn.execute(
            "INSERT INTO influence_tiers
               (tier_id, name, influence, briefing_frequency_days, is_active)
             VALUES (?1, 'High', 'high', 0, 1)",
            params![TierId::new().to_string()],
        );
        assert!(zero_frequency.is_err());

        let unknown_influence = store.conn.execute(
            "INSERT INTO influence_tiers
               (tier_id, name, influence, briefing_frequency_days, is_active)
             VALUES (?1, 'Critical', 'critical', 7, 1)",
            params![TierId::new().to_string()],
        );
        assert!(unknown_influence.is_err());
        Ok(())
    }

    // Test IDs: TSTORE-004
    #[test]
    fn tier_replacement_is_atomic() -> Result<()> {
        let mut store = migrated_store()?;
        store.replace_tiers(&[
            mk_tier(Influence::VeryHigh, Some(14))?,
            mk_tier(Influence::High, Some(30))?,
            mk_tier(Influence::Low, None)?,
        ])?;

        let duplicate = store.replace_tiers(&[
            mk_tier(Influence::High, Some(30))?,
            mk_tier(Influence::High, Some(45))?,
        ]);
        assert!(duplicate.is_err());

        let tiers = store.list_tiers()?;
        assert_eq!(tiers.len(), 3);
        assert_eq!(tiers[0].influence, Influence::VeryHigh);
        assert_eq!(tiers[2].briefing_frequency, Frequency::Never);

        store.replace_tiers(&[mk_tier(Influence::Medium, Some(60))?])?;
        let tiers = store.list_tiers()?;
        assert_eq!(tiers.len(), 1);
        assert_eq!(tiers[0].briefing_frequency.days(), Some(60));
        Ok(())
    }

    // Test IDs: TSTORE-005
    #[test]
    fn analysts_round_trip_and_filter_by_status() -> Result<()> {
        let mut store = migrated_store()?;
        let zoe = mk_analyst("Zoe", Influence::High);
        let adam = mk_analyst("Adam", Influence::Medium);
        store.insert_analyst(&zoe)?;
        store.insert_analyst(&adam)?;

        let all = store.list_analysts(None)?;
        assert_eq!(
            all.iter().map(|analyst| analyst.first_name.as_str()).collect::<Vec<_>>(),
            vec!["Adam", "Zoe"]
        );
        assert_eq!(store.get_analyst(zoe.analyst_id)?, Some(zoe.clone()));

        let later = fixture_now() + Duration::days(1);
        let archived = store.set_analyst_status(zoe.analyst_id, AnalystStatus::Archived, later)?;
        assert_eq!(archived.status, AnalystStatus::Archived);
        assert_eq!(archived.updated_at, later);

        let active = store.list_analysts(Some(AnalystStatus::Active))?;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].analyst_id, adam.analyst_id);

        let promoted = store.set_analyst_influence(adam.analyst_id, Influence::VeryHigh, later)?;
        assert_eq!(promoted.influence, Influence::VeryHigh);
        Ok(())
    }

    // Test IDs: TSTORE-006
    #[test]
    fn duplicate_email_and_unknown_analyst_are_domain_errors() -> Result<()> {
        let mut store = migrated_store()?;
        let analyst = mk_analyst("Rosa", Influence::High);
        store.insert_analyst(&analyst)?;

        let duplicate = Analyst { analyst_id: AnalystId::new(), ..analyst.clone() };
        let Err(err) = store.insert_analyst(&duplicate) else {
            return Err(anyhow!("duplicate email should be rejected"));
        };
        assert!(matches!(
            err.downcast_ref::<SchedulingError>(),
            Some(SchedulingError::Validation(_))
        ));

        let Err(err) =
            store.set_analyst_status(AnalystId::new(), AnalystStatus::Inactive, fixture_now())
        else {
            return Err(anyhow!("unknown analyst should be rejected"));
        };
        assert!(matches!(
            err.downcast_ref::<SchedulingError>(),
            Some(SchedulingError::NotFound(_))
        ));
        Ok(())
    }

    // Test IDs: TSTORE-007
    #[test]
    fn briefing_lifecycle_persists_transitions() -> Result<()> {
        let mut store = migrated_store()?;
        let primary = mk_analyst("Ana", Influence::High);
        let secondary = mk_analyst("Ben", Influence::Medium);
        store.insert_analyst(&primary)?;
        store.insert_analyst(&secondary)?;

        let at = fixture_now() + Duration::days(3);
        let mut briefing = mk_briefing(primary.analyst_id, BriefingStatus::Scheduled, at);
        briefing.attendees.push(BriefingAttendee {
            analyst_id: secondary.analyst_id,
            role: AttendeeRole::Secondary,
        });
        store.insert_briefing(&briefing)?;
        assert_eq!(store.get_briefing(briefing.briefing_id)?, Some(briefing.clone()));

        let completed_at = fixture_now() + Duration::days(3) + Duration::hours(1);
        let completed = store.update_briefing_status(
            briefing.briefing_id,
            BriefingTransition::Complete { completed_at, summary: Some("Went well".to_string()) },
        )?;
        assert_eq!(completed.status, BriefingStatus::Completed);
        assert_eq!(store.get_briefing(briefing.briefing_id)?, Some(completed));

        let terminal =
            store.update_briefing_status(briefing.briefing_id, BriefingTransition::Cancel);
        assert!(terminal.is_err());

        let for_secondary = store.list_briefings_for_analyst(secondary.analyst_id)?;
        assert_eq!(for_secondary.len(), 1);
        assert_eq!(for_secondary[0].attendees.len(), 2);
        Ok(())
    }

    // Test IDs: TSTORE-008
    #[test]
    fn briefing_with_unknown_attendee_is_rejected() -> Result<()> {
        let mut store = migrated_store()?;
        let briefing = mk_briefing(AnalystId::new(), BriefingStatus::Scheduled, fixture_now());

        let Err(err) = store.insert_briefing(&briefing) else {
            return Err(anyhow!("unknown attendee should be rejected"));
        };
        assert!(matches!(
            err.downcast_ref::<SchedulingError>(),
            Some(SchedulingError::NotFound(_))
        ));
        assert!(store.get_briefing(briefing.briefing_id)?.is_none());
        Ok(())
    }

    // Test IDs: TSTORE-009
    #[test]
    fn snapshot_loads_window_and_skips_cancelled() -> Result<()> {
        let mut store = migrated_store()?;
        let analyst = mk_analyst("Chen", Influence::High);
        store.insert_analyst(&analyst)?;
        let now = fixture_now();
        let id = analyst.analyst_id;

        let recent = mk_briefing(id, BriefingStatus::Completed, now - Duration::days(10));
        let stale = mk_briefing(id, BriefingStatus::Completed, now - Duration::days(45));
        let cancelled = mk_briefing(id, BriefingStatus::Cancelled, now + Duration::days(2));
        let upcoming = mk_briefing(id, BriefingStatus::Rescheduled, now + Duration::days(6));
        let missed = mk_briefing(id, BriefingStatus::Scheduled, now - Duration::days(1));
        for briefing in [&recent, &stale, &cancelled, &upcoming, &missed] {
            store.insert_briefing(briefing)?;
        }
        store.open_conversation(&mk_conversation(&analyst)?)?;

        let snapshot = store.load_scheduling_snapshot(now, 30)?;
        let loaded =
            snapshot.briefings.iter().map(|briefing| briefing.briefing_id).collect::<Vec<_>>();
        assert_eq!(loaded, vec![recent.briefing_id, upcoming.briefing_id]);
        assert_eq!(snapshot.analysts.len(), 1);
        assert!(snapshot.active_conversations.contains(&id));
        Ok(())
    }

    // Test IDs: TSTORE-013
    #[test]
    fn snapshot_keeps_latest_completed_briefing_older_than_window() -> Result<()> {
        let mut store = migrated_store()?;
        let ada = mk_analyst("Ada", Influence::High);
        let ben = mk_analyst("Ben", Influence::High);
        store.insert_analyst(&ada)?;
        store.insert_analyst(&ben)?;
        let now = fixture_now();

        let ancient =
            mk_briefing(ada.analyst_id, BriefingStatus::Completed, now - Duration::days(400));
        let mut shared =
            mk_briefing(ada.analyst_id, BriefingStatus::Completed, now - Duration::days(45));
        shared
            .attendees
            .push(BriefingAttendee { analyst_id: ben.analyst_id, role: AttendeeRole::Secondary });
        let future_completed =
            mk_briefing(ben.analyst_id, BriefingStatus::Completed, now + Duration::days(3));
        for briefing in [&ancient, &shared, &future_completed] {
            store.insert_briefing(briefing)?;
        }

        let snapshot = store.load_scheduling_snapshot(now, 30)?;
        let loaded =
            snapshot.briefings.iter().map(|briefing| briefing.briefing_id).collect::<Vec<_>>();
        assert_eq!(loaded, vec![shared.briefing_id]);
        assert_eq!(snapshot.briefings[0].attendees.len(), 2);

        let huge_lookback = store.load_scheduling_snapshot(now, u32::MAX)?;
        assert_eq!(huge_lookback.briefings.len(), 2);
        Ok(())
    }

    // Test IDs: TSTORE-010
    #[test]
    fn second_open_reports_already_active_until_closed() -> Result<()> {
        let mut store = migrated_store()?;
        let analyst = mk_analyst("Kofi", Influence::High);
        store.insert_analyst(&analyst)?;

        let first = mk_conversation(&analyst)?;
        let ConversationOpen::Opened { conversation } = store.open_conversation(&first)? else {
            return Err(anyhow!("first conversation should open"));
        };
        assert_eq!(conversation.suggested_times.len(), 6);

        let second = store.open_conversation(&mk_conversation(&analyst)?)?;
        assert_eq!(
            second,
            ConversationOpen::AlreadyActive {
                existing_conversation_id: Some(first.conversation_id)
            }
        );

        let closed = store.close_conversation(first.conversation_id, fixture_now())?;
        assert_eq!(closed.status, ConversationStatus::Closed);
        assert!(store.close_conversation(first.conversation_id, fixture_now()).is_err());

        let third = store.open_conversation(&mk_conversation(&analyst)?)?;
        assert!(matches!(third, ConversationOpen::Opened { .. }));
        Ok(())
    }

    // Test IDs: TSTORE-011
    #[test]
    fn integrity_check_reports_clean_database() -> Result<()> {
        let store = migrated_store()?;

        let report = store.integrity_check()?;
        assert!(report.quick_check_ok);
        assert!(report.foreign_key_violations.is_empty());
        assert_eq!(report.schema_status.current_version, LATEST_SCHEMA_VERSION);
        Ok(())
    }

    // Test IDs: TSTORE-012
    #[test]
    fn backup_contains_stored_analysts() -> Result<()> {
        let mut store = migrated_store()?;
        let analyst = mk_analyst("Mia", Influence::Low);
        store.insert_analyst(&analyst)?;

        let backup_path =
            std::env::temp_dir().join(format!("arbrief-backup-{}.sqlite3", Ulid::new()));
        store.backup_database(&backup_path)?;

        let restored = SqliteStore::open(&backup_path)?;
        assert_eq!(restored.get_analyst(analyst.analyst_id)?, Some(analyst));
        drop(restored);
        cleanup_sqlite_files(&backup_path)
    }

    // Test IDs: TCONC-001
    #[test]
    fn concurrent_opens_create_exactly_one_active_conversation() -> Result<()> {
        let db_path =
            std::env::temp_dir().join(format!("arbrief-concurrency-{}.sqlite3", Ulid::new()));
        let analyst = mk_analyst("Race", Influence::VeryHigh);
        {
            let mut init = SqliteStore::open(&db_path)?;
            init.migrate()?;
            init.insert_analyst(&analyst)?;
        }

        let threads = 6;
        let barrier = Arc::new(Barrier::new(threads));
        let mut handles = Vec::new();
        for _ in 0..threads {
            let path = db_path.clone();
            let barrier = Arc::clone(&barrier);
            let analyst = analyst.clone();
            handles.push(thread::spawn(move || -> Result<ConversationOpen> {
                let mut store = SqliteStore::open(&path)?;
                store.migrate()?;
                let conversation = mk_conversation(&analyst)?;
                barrier.wait();
                store.open_conversation(&conversation)
            }));
        }

        let mut opened = 0;
        let mut already_active = 0;
        for handle in handles {
            let Ok(thread_result) = handle.join() else {
                return Err(anyhow!("concurrency thread panicked"));
            };
            match thread_result? {
                ConversationOpen::Opened { .. } => opened += 1,
                ConversationOpen::AlreadyActive { .. } => already_active += 1,
            }
        }
        assert_eq!(opened, 1);
        assert_eq!(already_active, threads - 1);

        let store = SqliteStore::open(&db_path)?;
        assert_eq!(store.list_active_conversations()?.len(), 1);
        let report = store.integrity_check()?;
        assert!(report.quick_check_ok);
        drop(store);

        cleanup_sqlite_files(&db_path)
    }
}
