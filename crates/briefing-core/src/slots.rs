//! Proposed meeting slots sent along with an outreach request.

use serde::{Deserialize, Serialize};
use time::format_description::{self, FormatItem};
use time::{Duration, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset, Weekday};

use crate::SchedulingError;

/// Calendar days after "today" that are considered for slots.
pub const SUGGESTION_WINDOW_DAYS: i64 = 5;
pub const MAX_SUGGESTED_SLOTS: usize = 6;

const LABEL_FORMAT: &str = "[weekday], [month repr:long] [day padding:none] at \
                            [hour repr:12 padding:none]:[minute] [period]";

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SlotSettings {
    pub morning: Time,
    pub afternoon: Time,
    pub utc_offset: UtcOffset,
    pub zone_label: String,
}

impl Default for SlotSettings {
    fn default() -> Self {
        Self {
            morning: Time::from_hms(10, 0, 0).unwrap_or(Time::MIDNIGHT),
            afternoon: Time::from_hms(14, 0, 0).unwrap_or(Time::MIDNIGHT),
            utc_offset: UtcOffset::from_hms(-5, 0, 0).unwrap_or(UtcOffset::UTC),
            zone_label: "ET".to_string(),
        }
    }
}

impl SlotSettings {
    /// # Errors
    /// Returns [`SchedulingError::Validation`] unless morning comes strictly
    /// before afternoon and a zone label is set.
    pub fn validate(&self) -> Result<(), SchedulingError> {
        if self.morning >= self.afternoon {
            return Err(SchedulingError::Validation(
                "morning slot MUST be earlier than afternoon slot".to_string(),
            ));
        }
        if self.zone_label.trim().is_empty() {
            return Err(SchedulingError::Validation(
                "slot zone_label MUST be non-empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct SuggestedTime {
    #[serde(with = "time::serde::rfc3339")]
    pub starts_at: OffsetDateTime,
    pub label: String,
}

fn label_for(
    instant: OffsetDateTime,
    format: &[FormatItem<'_>],
    zone_label: &str,
) -> Result<String, SchedulingError> {
    let rendered = instant
        .format(format)
        .map_err(|err| SchedulingError::Format(format!("cannot render slot label: {err}")))?;
    Ok(format!("{rendered} {zone_label}"))
}

/// Weekday morning and afternoon slots over the next few days, earliest first.
///
/// Days are counted in the reference zone of `settings`, starting the day
/// after `now`. Weekends are skipped and at most [`MAX_SUGGESTED_SLOTS`] are
/// returned.
///
/// # Errors
/// Returns [`SchedulingError`] when the settings are invalid or a label
/// cannot be rendered.
pub fn suggested_times(
    now: OffsetDateTime,
    settings: &SlotSettings,
) -> Result<Vec<SuggestedTime>, SchedulingError> {
    settings.validate()?;
    let format = format_description::parse(LABEL_FORMAT)
        .map_err(|err| SchedulingError::Format(format!("invalid slot label format: {err}")))?;

    let today = now.to_offset(settings.utc_offset).date();
    let mut slots = Vec::with_capacity(MAX_SUGGESTED_SLOTS);

    for offset_days in 1..=SUGGESTION_WINDOW_DAYS {
        let Some(day) = today.checked_add(Duration::days(offset_days)) else {
            break;
        };
        if matches!(day.weekday(), Weekday::Saturday | Weekday::Sunday) {
            continue;
        }
        for time in [settings.morning, settings.afternoon] {
            if slots.len() == MAX_SUGGESTED_SLOTS {
                return Ok(slots);
            }
            let starts_at = PrimitiveDateTime::new(day, time).assume_offset(settings.utc_offset);
            slots.push(SuggestedTime {
                starts_at,
                label: label_for(starts_at, &format, &settings.zone_label)?,
            });
        }
    }

    Ok(slots)
}
