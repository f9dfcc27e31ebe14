//! Publish state machine for one (post, network) link. Pure transitions, no
//! side effects; persistence maps the enum onto three nullable columns and a
//! CHECK constraint keeps raw SQL honest too.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::AppError;

/// Where a publish link stands. Scheduling and being posted are mutually
/// exclusive by construction: posting consumes the schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PublishStatus {
    Unscheduled,
    Scheduled {
        at: DateTime<Utc>,
    },
    Posted {
        at: DateTime<Utc>,
        external_id: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("link is already posted and can no longer change")]
    AlreadyPosted,

    #[error("scheduled time is in the past")]
    PastSchedule,
}

impl From<TransitionError> for AppError {
    fn from(e: TransitionError) -> Self {
        AppError::InvalidState(e.to_string())
    }
}

impl PublishStatus {
    pub fn state_name(&self) -> &'static str {
        match self {
            Self::Unscheduled => "unscheduled",
            Self::Scheduled { .. } => "scheduled",
            Self::Posted { .. } => "posted",
        }
    }

    pub fn is_posted(&self) -> bool {
        matches!(self, Self::Posted { .. })
    }

    pub fn scheduled_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Scheduled { at } => Some(*at),
            _ => None,
        }
    }

    pub fn external_id(&self) -> Option<&str> {
        match self {
            Self::Posted { external_id, .. } => Some(external_id),
            _ => None,
        }
    }

    /// Schedule or reschedule. Past times and posted links are rejected.
    pub fn schedule(
        self,
        at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Self, TransitionError> {
        if self.is_posted() {
            return Err(TransitionError::AlreadyPosted);
        }
        if at <= now {
            return Err(TransitionError::PastSchedule);
        }
        Ok(Self::Scheduled { at })
    }

    pub fn unschedule(self) -> Result<Self, TransitionError> {
        if self.is_posted() {
            return Err(TransitionError::AlreadyPosted);
        }
        Ok(Self::Unscheduled)
    }

    /// The one-way transition. Whatever schedule existed is consumed.
    pub fn post(
        self,
        now: DateTime<Utc>,
        external_id: String,
    ) -> Result<Self, TransitionError> {
        if self.is_posted() {
            return Err(TransitionError::AlreadyPosted);
        }
        Ok(Self::Posted {
            at: now,
            external_id,
        })
    }

    /// Rebuild the status from row columns. The schema rejects the
    /// scheduled+posted combination, so seeing one here means corruption.
    pub fn from_columns(
        scheduled_at: Option<String>,
        posted_at: Option<String>,
        external_id: Option<String>,
    ) -> Result<Self, AppError> {
        match (scheduled_at, posted_at) {
            (None, None) => Ok(Self::Unscheduled),
            (Some(at), None) => Ok(Self::Scheduled {
                at: parse_timestamp(&at)?,
            }),
            (None, Some(at)) => {
                let external_id = external_id.ok_or_else(|| {
                    AppError::Internal("posted link is missing its external id".into())
                })?;
                Ok(Self::Posted {
                    at: parse_timestamp(&at)?,
                    external_id,
                })
            }
            (Some(_), Some(_)) => Err(AppError::Internal(
                "publish link is both scheduled and posted".into(),
            )),
        }
    }

    /// Column values for persistence: (scheduled_at, posted_at, external_id).
    pub fn to_columns(&self) -> (Option<String>, Option<String>, Option<String>) {
        match self {
            Self::Unscheduled => (None, None, None),
            Self::Scheduled { at } => (Some(format_timestamp(*at)), None, None),
            Self::Posted { at, external_id } => {
                (None, Some(format_timestamp(*at)), Some(external_id.clone()))
            }
        }
    }
}

/// Canonical timestamp format for publish columns: RFC 3339, UTC, second
/// precision, `Z` suffix. Lexicographic order equals chronological order, so
/// the scheduler's `scheduled_at <= now` comparison works as plain TEXT.
pub fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, AppError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AppError::Internal(format!("bad timestamp {s:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn schedule_and_reschedule() {
        let now = Utc::now();
        let status = PublishStatus::Unscheduled
            .schedule(now + Duration::hours(1), now)
            .unwrap();
        assert_eq!(status.state_name(), "scheduled");

        // Rescheduling an already-scheduled link is allowed.
        let status = status.schedule(now + Duration::hours(2), now).unwrap();
        assert_eq!(status.scheduled_at(), Some(now + Duration::hours(2)));
    }

    #[test]
    fn past_schedule_rejected() {
        let now = Utc::now();
        let err = PublishStatus::Unscheduled
            .schedule(now - Duration::seconds(1), now)
            .unwrap_err();
        assert_eq!(err, TransitionError::PastSchedule);

        // Exactly-now counts as past.
        let err = PublishStatus::Unscheduled.schedule(now, now).unwrap_err();
        assert_eq!(err, TransitionError::PastSchedule);
    }

    #[test]
    fn posting_consumes_the_schedule() {
        let now = Utc::now();
        let status = PublishStatus::Scheduled {
            at: now + Duration::hours(1),
        }
        .post(now, "ext-9".into())
        .unwrap();

        assert!(status.is_posted());
        assert_eq!(status.scheduled_at(), None);
        assert_eq!(status.external_id(), Some("ext-9"));
    }

    #[test]
    fn posted_is_terminal() {
        let now = Utc::now();
        let posted = PublishStatus::Posted {
            at: now,
            external_id: "ext-1".into(),
        };

        assert_eq!(
            posted.clone().schedule(now + Duration::hours(1), now),
            Err(TransitionError::AlreadyPosted)
        );
        assert_eq!(
            posted.clone().unschedule(),
            Err(TransitionError::AlreadyPosted)
        );
        assert_eq!(
            posted.post(now, "ext-2".into()),
            Err(TransitionError::AlreadyPosted)
        );
    }

    #[test]
    fn column_round_trip() {
        let now = Utc::now();
        for status in [
            PublishStatus::Unscheduled,
            PublishStatus::Scheduled {
                at: parse_timestamp(&format_timestamp(now)).unwrap(),
            },
            PublishStatus::Posted {
                at: parse_timestamp(&format_timestamp(now)).unwrap(),
                external_id: "ext-1".into(),
            },
        ] {
            let (scheduled, posted, external) = status.to_columns();
            let rebuilt = PublishStatus::from_columns(scheduled, posted, external).unwrap();
            assert_eq!(rebuilt, status);
        }
    }

    #[test]
    fn corrupt_columns_are_refused() {
        let ts = format_timestamp(Utc::now());

        // Both timestamps set.
        assert!(
            PublishStatus::from_columns(Some(ts.clone()), Some(ts.clone()), None).is_err()
        );
        // Posted without an external id.
        assert!(PublishStatus::from_columns(None, Some(ts), None).is_err());
    }

    #[test]
    fn timestamps_sort_lexicographically() {
        let earlier = format_timestamp(Utc::now());
        let later = format_timestamp(Utc::now() + Duration::hours(1));
        assert!(earlier < later);
        assert!(earlier.ends_with('Z'));
    }

    #[test]
    fn serializes_tagged() {
        let json = serde_json::to_value(PublishStatus::Unscheduled).unwrap();
        assert_eq!(json["state"], "unscheduled");

        let json = serde_json::to_value(PublishStatus::Posted {
            at: Utc::now(),
            external_id: "ext-1".into(),
        })
        .unwrap();
        assert_eq!(json["state"], "posted");
        assert_eq!(json["external_id"], "ext-1");
    }
}
