use std::time::Duration as StdDuration;

use anyhow::{Context, Result};
use briefing_core::{
    outreach_subject, AnalystId, ConversationId, DueReport, SchedulingConversation, SuggestedTime,
};
use briefing_store_sqlite::{ConversationOpen, SqliteStore};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::settings::WebhookConfig;

pub const OUTREACH_EVENT: &str = "briefing.outreach_requested";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutreachAnalyst {
    pub id: AnalystId,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub company: String,
    pub title: Option<String>,
}

/// Webhook body announcing that a scheduling conversation was opened.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutreachRequested {
    pub event: String,
    pub analyst: OutreachAnalyst,
    pub tier_name: String,
    pub overdue_days: u32,
    pub subject: String,
    pub suggested_times: Vec<String>,
    pub conversation_id: ConversationId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotificationFailure {
    pub analyst_id: AnalystId,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutreachSummary {
    pub evaluated: usize,
    pub due: usize,
    pub conversations_opened: usize,
    pub skipped_active: usize,
    pub notified: usize,
    pub notification_failures: Vec<NotificationFailure>,
    pub opened_conversation_ids: Vec<ConversationId>,
}

pub trait OutreachNotifier: Send + Sync {
    /// Deliver one outreach request downstream.
    ///
    /// # Errors
    /// Returns an error when delivery fails; the caller logs it and moves on.
    fn notify(&self, request: &OutreachRequested) -> Result<()>;
}

/// Posts outreach requests as JSON to a configured URL.
pub struct WebhookNotifier {
    url: String,
    agent: ureq::Agent,
}

impl WebhookNotifier {
    #[must_use]
    pub fn new(config: &WebhookConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(StdDuration::from_secs(config.timeout_secs))
            .build();
        Self { url: config.url.clone(), agent }
    }
}

impl OutreachNotifier for WebhookNotifier {
    fn notify(&self, request: &OutreachRequested) -> Result<()> {
        self.agent
            .post(&self.url)
            .send_json(request)
            .with_context(|| format!("webhook POST to {} failed", self.url))?;
        Ok(())
    }
}

/// Open a conversation for every due analyst and announce each new one.
///
/// A conversation that already exists counts as `skipped_active` and is not
/// announced. Notification failures are recorded per analyst and never undo
/// the conversation or stop the batch.
///
/// # Errors
/// Returns an error when the store fails to open a conversation.
pub fn initiate_outreach(
    store: &mut SqliteStore,
    notifier: Option<&dyn OutreachNotifier>,
    report: &DueReport,
    suggested_times: &[SuggestedTime],
    subject_prefix: &str,
    now: OffsetDateTime,
) -> Result<OutreachSummary> {
    let mut summary = OutreachSummary {
        evaluated: report.due.len() + report.skipped.len(),
        due: report.due.len(),
        ..OutreachSummary::default()
    };
    let labels = suggested_times.iter().map(|slot| slot.label.clone()).collect::<Vec<_>>();

    for due in &report.due {
        let subject = outreach_subject(subject_prefix, &due.contact);
        let conversation = SchedulingConversation::open(
            due.analyst_id,
            subject.clone(),
            suggested_times.to_vec(),
            now,
        );

        let opened = store.open_conversation(&conversation).with_context(|| {
            format!("failed to open conversation for analyst {}", due.analyst_id)
        })?;
        let conversation = match opened {
            ConversationOpen::Opened { conversation } => conversation,
            ConversationOpen::AlreadyActive { .. } => {
                summary.skipped_active += 1;
                continue;
            }
        };
        summary.conversations_opened += 1;
        summary.opened_conversation_ids.push(conversation.conversation_id);
        info!(
            analyst_id = %due.analyst_id,
            conversation_id = %conversation.conversation_id,
            overdue_days = due.overdue_days,
            "opened scheduling conversation"
        );

        let Some(notifier) = notifier else {
            continue;
        };
        let request = OutreachRequested {
            event: OUTREACH_EVENT.to_string(),
            analyst: OutreachAnalyst {
                id: due.analyst_id,
                first_name: due.contact.first_name.clone(),
                last_name: due.contact.last_name.clone(),
                email: due.contact.email.clone(),
                company: due.contact.company.clone(),
                title: due.contact.title.clone(),
            },
            tier_name: due.tier_name.clone(),
            overdue_days: due.overdue_days,
            subject,
            suggested_times: labels.clone(),
            conversation_id: conversation.conversation_id,
        };
        match notifier.notify(&request) {
            Ok(()) => summary.notified += 1,
            Err(err) => {
                let error = format!("{err:#}");
                warn!(analyst_id = %due.analyst_id, error = %error, "outreach notification failed");
                summary
                    .notification_failures
                    .push(NotificationFailure { analyst_id: due.analyst_id, error });
            }
        }
    }

    info!(
        evaluated = summary.evaluated,
        due = summary.due,
        opened = summary.conversations_opened,
        skipped_active = summary.skipped_active,
        notified = summary.notified,
        failures = summary.notification_failures.len(),
        "outreach run finished"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::path::Path;
    use std::sync::Mutex;

    use anyhow::anyhow;
    use briefing_core::{
        assemble_candidates, compute_due_report, suggested_times, Analyst, AnalystStatus,
        Frequency, Influence, InfluenceTier, SlotSettings, TierId,
    };

    use super::*;

    #[derive(Default)]
    struct RecordingNotifier {
        fail_for: BTreeSet<String>,
        delivered: Mutex<Vec<OutreachRequested>>,
    }

    impl OutreachNotifier for RecordingNotifier {
        fn notify(&self, request: &OutreachRequested) -> Result<()> {
            if self.fail_for.contains(&request.analyst.email) {
                return Err(anyhow!("connection refused"));
            }
            self.delivered
                .lock()
                .map_err(|_| anyhow!("notifier lock poisoned"))?
                .push(request.clone());
            Ok(())
        }
    }

    fn fixture_now() -> OffsetDateTime {
        OffsetDateTime::UNIX_EPOCH + time::Duration::days(20_000)
    }

    fn seeded_store(names: &[&str]) -> Result<(SqliteStore, DueReport)> {
        let mut store = SqliteStore::open(Path::new(":memory:"))?;
        store.migrate()?;
        let tiers = vec![InfluenceTier {
            tier_id: TierId::new(),
            name: "High".to_string(),
            influence: Influence::High,
            briefing_frequency: Frequency::every_days(30)?,
            is_active: true,
            description: None,
        }];
        store.replace_tiers(&tiers)?;

        let analysts = names
            .iter()
            .map(|name| Analyst {
                analyst_id: AnalystId::new(),
                first_name: (*name).to_string(),
                last_name: "Analyst".to_string(),
                email: format!("{}@research.example", name.to_ascii_lowercase()),
                company: "Example Research".to_string(),
                title: Some("Principal Analyst".to_string()),
                status: AnalystStatus::Active,
                influence: Influence::High,
                created_at: fixture_now(),
                updated_at: fixture_now(),
            })
            .collect::<Vec<_>>();
        for analyst in &analysts {
            store.insert_analyst(analyst)?;
        }

        let candidates =
            assemble_candidates(&analysts, &tiers, &[], &BTreeSet::new(), fixture_now());
        let report = compute_due_report(&candidates, fixture_now(), 30);
        Ok((store, report))
    }

    // Test IDs: TOUT-001
    #[test]
    fn webhook_failure_keeps_conversation_and_continues_batch() -> Result<()> {
        let (mut store, report) = seeded_store(&["Ana", "Ben", "Cleo"])?;
        let slots = suggested_times(fixture_now(), &SlotSettings::default())?;
        let notifier = RecordingNotifier {
            fail_for: BTreeSet::from(["ben@research.example".to_string()]),
            ..RecordingNotifier::default()
        };

        let summary = initiate_outreach(
            &mut store,
            Some(&notifier),
            &report,
            &slots,
            "Briefing request",
            fixture_now(),
        )?;

        assert_eq!(summary.due, 3);
        assert_eq!(summary.conversations_opened, 3);
        assert_eq!(summary.notified, 2);
        assert_eq!(summary.notification_failures.len(), 1);
        assert!(summary.notification_failures[0].error.contains("connection refused"));
        assert_eq!(store.list_active_conversations()?.len(), 3);

        let delivered = notifier.delivered.lock().map_err(|_| anyhow!("lock poisoned"))?;
        assert_eq!(delivered[0].event, OUTREACH_EVENT);
        assert_eq!(delivered[0].subject, "Briefing request: Ana Analyst (Example Research)");
        assert_eq!(delivered[0].suggested_times.len(), 6);
        assert_eq!(delivered[1].analyst.first_name, "Cleo");
        Ok(())
    }

    // Test IDs: TOUT-002
    #[test]
    fn repeated_run_on_stale_report_opens_nothing_and_notifies_nobody() -> Result<()> {
        let (mut store, report) = seeded_store(&["Dana", "Eli"])?;
        let notifier = RecordingNotifier::default();

        let first =
            initiate_outreach(&mut store, Some(&notifier), &report, &[], "", fixture_now())?;
        let second =
            initiate_outreach(&mut store, Some(&notifier), &report, &[], "", fixture_now())?;

        assert_eq!(first.conversations_opened, 2);
        assert_eq!(second.conversations_opened, 0);
        assert_eq!(second.skipped_active, 2);
        assert_eq!(second.notified, 0);
        let delivered = notifier.delivered.lock().map_err(|_| anyhow!("lock poisoned"))?;
        assert_eq!(delivered.len(), 2);
        Ok(())
    }

    // Test IDs: TOUT-003
    #[test]
    fn outreach_without_notifier_still_records_conversations() -> Result<()> {
        let (mut store, report) = seeded_store(&["Fay"])?;

        let summary = initiate_outreach(&mut store, None, &report, &[], "", fixture_now())?;

        assert_eq!(summary.conversations_opened, 1);
        assert_eq!(summary.notified, 0);
        assert!(summary.notification_failures.is_empty());
        let active = store.list_active_conversations()?;
        assert_eq!(active[0].subject, "Briefing request: Fay Analyst (Example Research)");
        Ok(())
    }

    #[test]
    fn payload_serializes_with_event_and_analyst_block() -> Result<()> {
        let request = OutreachRequested {
            event: OUTREACH_EVENT.to_string(),
            analyst: OutreachAnalyst {
                id: AnalystId::new(),
                first_name: "Gus".to_string(),
                last_name: "Analyst".to_string(),
                email: "gus@research.example".to_string(),
                company: "Example Research".to_string(),
                title: None,
            },
            tier_name: "High".to_string(),
            overdue_days: 15,
            subject: "Briefing request: Gus Analyst (Example Research)".to_string(),
            suggested_times: vec!["Monday, October 19 at 10:00 AM ET".to_string()],
            conversation_id: ConversationId::new(),
        };

        let value = serde_json::to_value(&request)?;
        assert_eq!(value["event"], "briefing.outreach_requested");
        assert_eq!(value["analyst"]["email"], "gus@research.example");
        assert_eq!(value["overdue_days"], 15);
        Ok(())
    }
}
