//! Periodic trigger for publishing issues

use std::time::Duration;

use chrono::{DateTime, Days, FixedOffset, TimeDelta, TimeZone, Utc};
use gazette_common::{Signal, internal};
use serde::Deserialize;
use tokio::sync::broadcast;

use crate::{error::GazetteError, publisher::IssuePublisher};

/// When the scheduler publishes
///
/// ```ron
/// schedule: Daily(hour: 8, minute: 0, utc_offset_hours: 9),
/// schedule: Interval(secs: 3600),
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Schedule {
    /// Once a day at a wall-clock time in a fixed UTC offset
    Daily {
        hour: u32,
        #[serde(default)]
        minute: u32,
        #[serde(default)]
        utc_offset_hours: i32,
    },
    /// Every `secs` seconds
    Interval { secs: u64 },
}

impl Default for Schedule {
    fn default() -> Self {
        Self::Daily {
            hour: 8,
            minute: 0,
            utc_offset_hours: 9,
        }
    }
}

impl Schedule {
    /// Check that the schedule can produce trigger times
    ///
    /// # Errors
    /// [`GazetteError::Config`] if the time of day or offset is out of range,
    /// or the interval is zero
    pub fn validate(&self) -> Result<(), GazetteError> {
        match *self {
            Self::Daily {
                hour,
                minute,
                utc_offset_hours,
            } => {
                if hour > 23 || minute > 59 {
                    return Err(GazetteError::Config(format!(
                        "Invalid daily schedule time {hour:02}:{minute:02}"
                    )));
                }
                if offset(utc_offset_hours).is_none() {
                    return Err(GazetteError::Config(format!(
                        "Invalid UTC offset {utc_offset_hours}"
                    )));
                }
                Ok(())
            }
            Self::Interval { secs: 0 } => Err(GazetteError::Config(
                "Schedule interval must be at least one second".to_string(),
            )),
            Self::Interval { .. } => Ok(()),
        }
    }

    /// The first trigger strictly after `now`
    ///
    /// `None` if the schedule is invalid.
    #[must_use]
    pub fn next_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match *self {
            Self::Daily {
                hour,
                minute,
                utc_offset_hours,
            } => {
                let offset = offset(utc_offset_hours)?;
                let local = now.with_timezone(&offset);
                let at = local.date_naive().and_hms_opt(hour, minute, 0)?;
                let today = offset.from_local_datetime(&at).single()?;

                let next = if today > local {
                    today
                } else {
                    today.checked_add_days(Days::new(1))?
                };
                Some(next.with_timezone(&Utc))
            }
            Self::Interval { secs: 0 } => None,
            Self::Interval { secs } => {
                now.checked_add_signed(TimeDelta::try_seconds(i64::try_from(secs).ok()?)?)
            }
        }
    }
}

fn offset(hours: i32) -> Option<FixedOffset> {
    FixedOffset::east_opt(hours.checked_mul(3600)?)
}

/// Timer loop that asks the publisher for the next issue
#[derive(Debug)]
pub struct Scheduler {
    schedule: Schedule,
    publisher: IssuePublisher,
}

impl Scheduler {
    pub const fn new(schedule: Schedule, publisher: IssuePublisher) -> Self {
        Self {
            schedule,
            publisher,
        }
    }

    /// Run until shutdown
    ///
    /// Publishing failures are logged and retried at the next trigger, except
    /// fatal ones, which stop the scheduler.
    ///
    /// # Errors
    /// If the schedule is invalid or publishing fails fatally
    pub async fn serve(
        &self,
        mut shutdown: broadcast::Receiver<Signal>,
    ) -> Result<(), GazetteError> {
        self.schedule.validate()?;
        internal!(level = INFO, "Scheduler starting with {:?}", self.schedule);

        loop {
            let now = Utc::now();
            let next = self
                .schedule
                .next_after(now)
                .ok_or_else(|| GazetteError::Config(format!("{:?}", self.schedule)))?;
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);

            tracing::debug!(next = %next, "Next publication scheduled");

            tokio::select! {
                () = tokio::time::sleep(wait) => {
                    match self.publisher.publish_next().await {
                        Ok(_) => {}
                        Err(e) if e.is_fatal() => {
                            tracing::error!(error = %e, "Scheduler stopping");
                            return Err(e);
                        }
                        Err(e) => tracing::error!(error = %e, "Failed to publish issue"),
                    }
                }
                sig = shutdown.recv() => {
                    if let Err(e) = sig {
                        tracing::error!("Scheduler shutdown channel error: {e}");
                    }
                    internal!("Scheduler received shutdown signal");
                    break;
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use gazette_common::Issue;
    use gazette_store::MemoryDeliveryLog;

    use super::*;
    use crate::{
        publisher::dispatch_channel,
        sequencer::{GapPolicy, IssueSequencer, StaticIssueSource},
    };

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_daily_at_0800_plus_nine() {
        let schedule = Schedule::default();

        // 22:30 UTC is 07:30 the next morning at +09:00
        assert_eq!(
            schedule.next_after(utc("2026-03-01T22:30:00Z")),
            Some(utc("2026-03-01T23:00:00Z"))
        );
        // Exactly on the trigger moves to the following day
        assert_eq!(
            schedule.next_after(utc("2026-03-01T23:00:00Z")),
            Some(utc("2026-03-02T23:00:00Z"))
        );
        assert_eq!(
            schedule.next_after(utc("2026-03-02T01:00:00Z")),
            Some(utc("2026-03-02T23:00:00Z"))
        );
    }

    #[test]
    fn test_interval() {
        let schedule = Schedule::Interval { secs: 90 };
        assert_eq!(
            schedule.next_after(utc("2026-03-01T00:00:00Z")),
            Some(utc("2026-03-01T00:01:30Z"))
        );
    }

    #[test]
    fn test_validation() {
        assert!(Schedule::default().validate().is_ok());
        assert!(Schedule::Interval { secs: 0 }.validate().is_err());
        assert!(
            Schedule::Daily {
                hour: 24,
                minute: 0,
                utc_offset_hours: 0
            }
            .validate()
            .is_err()
        );
        assert!(
            Schedule::Daily {
                hour: 8,
                minute: 0,
                utc_offset_hours: 30
            }
            .validate()
            .is_err()
        );
    }

    #[test]
    fn test_schedule_from_ron() {
        let schedule: Schedule = ron::from_str("Daily(hour: 6)").unwrap();
        assert_eq!(
            schedule,
            Schedule::Daily {
                hour: 6,
                minute: 0,
                utc_offset_hours: 0
            }
        );

        let schedule: Schedule = ron::from_str("Interval(secs: 60)").unwrap();
        assert_eq!(schedule, Schedule::Interval { secs: 60 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_publishes_on_each_tick() {
        let source = StaticIssueSource::new([Issue::new("n1.md", "one")]);
        let sequencer = IssueSequencer::new(
            Arc::new(source),
            Arc::new(MemoryDeliveryLog::new()),
            GapPolicy::Fail,
        );
        let (tx, mut rx) = dispatch_channel(8);
        let scheduler = Scheduler::new(
            Schedule::Interval { secs: 60 },
            IssuePublisher::new(sequencer, tx),
        );
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = tokio::spawn(async move { scheduler.serve(shutdown_rx).await });

        // Nothing is logged as sent, so each tick republishes the first issue
        assert_eq!(rx.recv().await.unwrap().issue_label, "n1.md");
        assert_eq!(rx.recv().await.unwrap().issue_label, "n1.md");

        shutdown_tx.send(Signal::Shutdown).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_invalid_schedule_fails_fast() {
        let sequencer = IssueSequencer::new(
            Arc::new(StaticIssueSource::default()),
            Arc::new(MemoryDeliveryLog::new()),
            GapPolicy::Fail,
        );
        let (tx, _rx) = dispatch_channel(1);
        let scheduler = Scheduler::new(
            Schedule::Interval { secs: 0 },
            IssuePublisher::new(sequencer, tx),
        );
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);

        assert!(scheduler.serve(shutdown_rx).await.unwrap_err().is_fatal());
    }
}
