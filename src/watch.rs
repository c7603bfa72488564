//! Polling loop: runs the change detector on a timer or on demand and hands
//! the resulting events to the notifier.

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::detector::{events, failures, ChangeDetector};
use crate::notify::Notifier;

/// Counters for one detection pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub terms_checked: usize,
    pub failed_terms: usize,
    pub events: usize,
    pub delivered: usize,
    pub delivery_failures: usize,
}

/// Run one detection pass over `terms` and deliver every new entry.
///
/// Term failures and delivery failures are logged and counted; neither stops
/// the rest of the pass.
pub async fn run_cycle(
    detector: &mut ChangeDetector,
    notifier: &Notifier,
    terms: &[String],
) -> CycleSummary {
    tracing::info!(terms = terms.len(), "Checking for updates...");

    let reports = detector.detect_changes(terms).await;

    let mut summary = CycleSummary {
        terms_checked: reports.len(),
        ..CycleSummary::default()
    };

    for (term, error) in failures(&reports) {
        summary.failed_terms += 1;
        tracing::warn!(term = %term, error = %error, "Could not check term, will retry next cycle");
    }

    for event in events(&reports) {
        summary.events += 1;
        match notifier.deliver(event).await {
            Ok(()) => summary.delivered += 1,
            Err(e) => {
                summary.delivery_failures += 1;
                tracing::warn!(
                    term = %event.term,
                    entry = %event.entry.name,
                    error = %e,
                    "Failed to deliver announcement"
                );
            }
        }
    }

    if summary.events == 0 {
        tracing::info!("No updates found.");
    } else {
        tracing::info!(
            events = summary.events,
            delivered = summary.delivered,
            "Up-to-date."
        );
    }

    summary
}

/// Poll every `interval` (first pass immediately) and whenever a message
/// arrives on `triggers`, until `shutdown` resolves.
///
/// Passes never overlap: a trigger received during a pass is handled after
/// it. Returns the number of passes completed.
pub async fn run<F>(
    detector: &mut ChangeDetector,
    notifier: &Notifier,
    terms: &[String],
    interval: Duration,
    mut triggers: mpsc::Receiver<()>,
    shutdown: F,
) -> u64
where
    F: Future<Output = ()>,
{
    let mut ticker = tokio::time::interval(interval);
    // A slow pass should not be followed by a burst of catch-up passes
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::pin!(shutdown);

    let mut triggers_open = true;
    let mut cycles = 0u64;

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => {
                tracing::info!(cycles, "Shutting down");
                break;
            }
            _ = ticker.tick() => {}
            trigger = triggers.recv(), if triggers_open => {
                if trigger.is_none() {
                    triggers_open = false;
                    continue;
                }
                tracing::info!("Manual update requested");
            }
        }

        run_cycle(detector, notifier, terms).await;
        cycles += 1;
    }

    cycles
}
