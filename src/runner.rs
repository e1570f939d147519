//! Per-source fetch → compose → deliver sequence and the run summary.
//!
//! Sources run one after another. A failure anywhere in one source's sequence
//! is recorded in the [`RunReport`] and the next source still runs.

use crate::notify::{Delivery, Notifier};
use crate::sources::EventSource;
use std::error::Error;
use std::time::Instant;
use tracing::{error, info, instrument};

/// How one source's sequence ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceOutcome {
    /// Nothing to announce.
    NoEvents,
    /// A payload was built and handed to the notifier.
    Delivered { events: usize, delivery: Delivery },
}

/// Run one source end to end.
#[instrument(level = "info", skip_all, fields(source = source.name()))]
pub async fn run_source<S, N>(source: &S, notifier: &N) -> Result<SourceOutcome, Box<dyn Error>>
where
    S: EventSource,
    N: Notifier,
{
    let events = source.fetch_events().await?;
    if events.is_empty() {
        info!("No events found");
        return Ok(SourceOutcome::NoEvents);
    }
    info!(count = events.len(), "Found events");

    let Some(payload) = source.compose_message(&events).await else {
        return Ok(SourceOutcome::NoEvents);
    };
    let delivery = notifier.send(&payload).await?;
    Ok(SourceOutcome::Delivered {
        events: payload.event_count(),
        delivery,
    })
}

/// Outcome of every source processed in one run.
#[derive(Debug, Default)]
pub struct RunReport {
    entries: Vec<(&'static str, Result<SourceOutcome, String>)>,
}

impl RunReport {
    /// Run `source` through [`run_source`], recording rather than propagating
    /// its failure.
    pub async fn run<S, N>(&mut self, source: &S, notifier: &N)
    where
        S: EventSource,
        N: Notifier,
    {
        let t0 = Instant::now();
        let result = run_source(source, notifier).await;
        let elapsed_ms = t0.elapsed().as_millis();
        match &result {
            Ok(outcome) => info!(source = source.name(), ?outcome, elapsed_ms, "Source finished"),
            Err(e) => error!(source = source.name(), error = %e, elapsed_ms, "Source failed"),
        }
        self.record(source.name(), result.map_err(|e| e.to_string()));
    }

    /// Record a source that could not even be constructed.
    pub fn record(&mut self, name: &'static str, result: Result<SourceOutcome, String>) {
        self.entries.push((name, result));
    }

    #[cfg(test)]
    pub fn entries(&self) -> &[(&'static str, Result<SourceOutcome, String>)] {
        &self.entries
    }

    /// `true` when at least one source ran and every one of them failed.
    pub fn all_failed(&self) -> bool {
        !self.entries.is_empty() && self.entries.iter().all(|(_, r)| r.is_err())
    }

    pub fn log_summary(&self) {
        let failed = self.entries.iter().filter(|(_, r)| r.is_err()).count();
        let delivered: usize = self
            .entries
            .iter()
            .filter_map(|(_, r)| match r {
                Ok(SourceOutcome::Delivered { events, .. }) => Some(*events),
                _ => None,
            })
            .sum();
        info!(
            sources = self.entries.len(),
            failed,
            events_announced = delivered,
            "Run summary"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{self, Payload, SourceStyle};
    use crate::models::{EventRecord, ScheduleRow};
    use std::cell::RefCell;

    struct StubSource {
        name: &'static str,
        events: Result<Vec<EventRecord>, &'static str>,
    }

    impl EventSource for StubSource {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn fetch_events(&self) -> Result<Vec<EventRecord>, Box<dyn Error>> {
            self.events.clone().map_err(|e| e.into())
        }

        async fn compose_message(&self, events: &[EventRecord]) -> Option<Payload> {
            message::compose("stub", SourceStyle::Schedule, events, &[])
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        sent: RefCell<Vec<Payload>>,
        fail: bool,
    }

    impl Notifier for RecordingNotifier {
        async fn send(&self, payload: &Payload) -> Result<Delivery, Box<dyn Error>> {
            if self.fail {
                return Err("webhook returned 500".into());
            }
            self.sent.borrow_mut().push(payload.clone());
            Ok(Delivery::Sent)
        }
    }

    fn events(n: usize) -> Vec<EventRecord> {
        (0..n)
            .map(|i| {
                ScheduleRow {
                    date_text: "22(土)".to_string(),
                    title: format!("event {i}"),
                    ..Default::default()
                }
                .into_record()
            })
            .collect()
    }

    #[tokio::test]
    async fn test_empty_source_sends_nothing() {
        let source = StubSource {
            name: "empty",
            events: Ok(vec![]),
        };
        let notifier = RecordingNotifier::default();
        let outcome = run_source(&source, &notifier).await.unwrap();
        assert_eq!(outcome, SourceOutcome::NoEvents);
        assert!(notifier.sent.borrow().is_empty());
    }

    #[tokio::test]
    async fn test_delivers_capped_payload() {
        let source = StubSource {
            name: "many",
            events: Ok(events(15)),
        };
        let notifier = RecordingNotifier::default();
        let outcome = run_source(&source, &notifier).await.unwrap();
        assert_eq!(
            outcome,
            SourceOutcome::Delivered {
                events: 10,
                delivery: Delivery::Sent
            }
        );
        assert_eq!(notifier.sent.borrow().len(), 1);
    }

    #[tokio::test]
    async fn test_failing_source_does_not_stop_the_next() {
        let broken = StubSource {
            name: "broken",
            events: Err("connection reset"),
        };
        let healthy = StubSource {
            name: "healthy",
            events: Ok(events(2)),
        };
        let notifier = RecordingNotifier::default();

        let mut report = RunReport::default();
        report.run(&broken, &notifier).await;
        report.run(&healthy, &notifier).await;

        assert_eq!(report.entries().len(), 2);
        assert!(report.entries()[0].1.is_err());
        assert_eq!(
            report.entries()[1].1,
            Ok(SourceOutcome::Delivered {
                events: 2,
                delivery: Delivery::Sent
            })
        );
        assert!(!report.all_failed());
        assert_eq!(notifier.sent.borrow().len(), 1);
    }

    #[tokio::test]
    async fn test_delivery_failure_is_recorded() {
        let source = StubSource {
            name: "s",
            events: Ok(events(1)),
        };
        let notifier = RecordingNotifier {
            fail: true,
            ..Default::default()
        };
        let mut report = RunReport::default();
        report.run(&source, &notifier).await;
        assert!(report.all_failed());
    }

    #[test]
    fn test_empty_report_is_not_a_failure() {
        assert!(!RunReport::default().all_failed());
    }
}
