//! Bad-entry collection.
//!
//! One [`BadCollector`] is shared by every worker of an import. Entries are
//! counted with atomics, the first `max_retained` are kept in memory for the
//! caller, and every entry is written to a report by a dedicated writer thread
//! fed through a bounded channel. Callers only block when that channel is full.

mod entry;

use std::fmt;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use chrono::Utc;
use crossbeam_channel::{bounded, Receiver, Sender};
use serde::{Deserialize, Serialize};

use crate::error::{CollectorError, ImportError, ImportResult};

pub use entry::{BadEntry, BadEntryKind, Side};

/// How many bad entries an import tolerates before failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tolerance {
    /// Fail when the count exceeds `n`. `Bounded(0)` fails on the first entry.
    Bounded(u64),
    /// Never fail because of the count.
    Unbounded,
}

impl Tolerance {
    /// Returns true if `count` entries are more than tolerated.
    #[must_use]
    pub const fn is_exceeded_by(&self, count: u64) -> bool {
        match self {
            Self::Bounded(limit) => count > *limit,
            Self::Unbounded => false,
        }
    }
}

impl fmt::Display for Tolerance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bounded(limit) => write!(f, "{limit}"),
            Self::Unbounded => write!(f, "unbounded"),
        }
    }
}

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    pub tolerance: Tolerance,
    /// Collect duplicate node ids; when false the first duplicate fails the import.
    pub collect_duplicates: bool,
    /// Collect unresolved endpoints; when false the first one fails the import.
    pub collect_unresolved: bool,
    /// Max report lines queued for the writer thread.
    pub queue_capacity: usize,
    /// Max entries kept in memory for `entries()`.
    pub max_retained: usize,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            tolerance: Tolerance::Bounded(1000),
            collect_duplicates: true,
            collect_unresolved: true,
            queue_capacity: 4096,
            max_retained: 10_000,
        }
    }
}

/// Counts of collected entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CollectorSummary {
    pub duplicates: u64,
    pub unresolved: u64,
    pub total: u64,
    pub threshold_exceeded: bool,
}

enum ReportMsg {
    Line(String),
    Close { reply: Sender<Option<String>> },
}

/// Concurrent sink for [`BadEntry`] values.
pub struct BadCollector {
    cfg: CollectorConfig,
    tx: Sender<ReportMsg>,
    duplicates: AtomicU64,
    unresolved: AtomicU64,
    total: AtomicU64,
    exceeded: AtomicBool,
    closed: AtomicBool,
    retained_count: AtomicUsize,
    retained: Mutex<Vec<BadEntry>>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl BadCollector {
    /// A collector whose report is discarded.
    ///
    /// # Errors
    /// If the writer thread cannot be spawned.
    pub fn new(cfg: CollectorConfig) -> ImportResult<Self> {
        Self::with_report(cfg, Box::new(io::sink()))
    }

    /// A collector that writes one line per entry to `report`.
    ///
    /// # Errors
    /// If the writer thread cannot be spawned.
    pub fn with_report(cfg: CollectorConfig, report: Box<dyn Write + Send>) -> ImportResult<Self> {
        let (tx, rx) = bounded::<ReportMsg>(cfg.queue_capacity.max(1));
        let join = thread::Builder::new()
            .name("kyro-import-bad-entries".to_string())
            .spawn(move || writer_loop(report, rx))?;

        Ok(Self {
            cfg,
            tx,
            duplicates: AtomicU64::new(0),
            unresolved: AtomicU64::new(0),
            total: AtomicU64::new(0),
            exceeded: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            retained_count: AtomicUsize::new(0),
            retained: Mutex::new(Vec::new()),
            join: Mutex::new(Some(join)),
        })
    }

    /// Configuration in effect.
    #[must_use]
    pub const fn config(&self) -> &CollectorConfig {
        &self.cfg
    }

    /// Record a bad entry.
    ///
    /// # Errors
    /// - `NotCollected` if this kind of entry is configured to fail immediately
    /// - `ToleranceExceeded` once the total passes the tolerance; every later
    ///   call fails the same way
    /// - `Closed` if the collector was closed; the entry is not counted
    pub fn collect(&self, entry: BadEntry) -> ImportResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CollectorError::Closed.into());
        }
        let enabled = match entry.kind() {
            BadEntryKind::DuplicateNode => self.cfg.collect_duplicates,
            BadEntryKind::UnresolvedEndpoint => self.cfg.collect_unresolved,
        };
        if !enabled {
            self.exceeded.store(true, Ordering::Release);
            return Err(CollectorError::NotCollected {
                entry: entry.to_string(),
            }
            .into());
        }

        // A send that loses the race with close() must not be counted either.
        let line = entry.to_string();
        self.tx
            .send(ReportMsg::Line(line.clone()))
            .map_err(|_| ImportError::from(CollectorError::Closed))?;

        match entry.kind() {
            BadEntryKind::DuplicateNode => self.duplicates.fetch_add(1, Ordering::AcqRel),
            BadEntryKind::UnresolvedEndpoint => self.unresolved.fetch_add(1, Ordering::AcqRel),
        };
        let total = self.total.fetch_add(1, Ordering::AcqRel) + 1;
        self.retain(entry);

        if self.cfg.tolerance.is_exceeded_by(total) {
            if !self.exceeded.swap(true, Ordering::AcqRel) {
                tracing::warn!(
                    total,
                    tolerance = %self.cfg.tolerance,
                    "bad entry tolerance exceeded"
                );
            }
            return Err(CollectorError::ToleranceExceeded {
                total,
                duplicates: self.duplicates(),
                unresolved: self.unresolved(),
                tolerance: self.cfg.tolerance.to_string(),
                last: line,
            }
            .into());
        }
        Ok(())
    }

    fn retain(&self, entry: BadEntry) {
        if self.retained_count.load(Ordering::Acquire) >= self.cfg.max_retained {
            return;
        }
        let mut retained = self.retained.lock().unwrap_or_else(PoisonError::into_inner);
        if retained.len() < self.cfg.max_retained {
            retained.push(entry);
            self.retained_count.store(retained.len(), Ordering::Release);
        }
    }

    /// Returns true once the import must stop.
    #[must_use]
    pub fn threshold_exceeded(&self) -> bool {
        self.exceeded.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn duplicates(&self) -> u64 {
        self.duplicates.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn unresolved(&self) -> u64 {
        self.unresolved.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Acquire)
    }

    /// Entries retained in memory, in collection order.
    #[must_use]
    pub fn entries(&self) -> Vec<BadEntry> {
        self.retained
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn summary(&self) -> CollectorSummary {
        CollectorSummary {
            duplicates: self.duplicates(),
            unresolved: self.unresolved(),
            total: self.total(),
            threshold_exceeded: self.threshold_exceeded(),
        }
    }

    /// Flush the report and stop the writer thread. Idempotent.
    ///
    /// # Errors
    /// `ReportWrite` if any report line could not be written.
    pub fn close(&self) -> ImportResult<CollectorSummary> {
        self.closed.store(true, Ordering::Release);
        let handle = self
            .join
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(handle) = handle else {
            return Ok(self.summary());
        };

        let (reply_tx, reply_rx) = bounded::<Option<String>>(1);
        let write_error = match self.tx.send(ReportMsg::Close { reply: reply_tx }) {
            Ok(()) => reply_rx.recv().unwrap_or(None),
            Err(_) => None,
        };
        if handle.join().is_err() {
            return Err(ImportError::internal("bad-entry writer panicked"));
        }

        if let Some(message) = write_error {
            return Err(CollectorError::ReportWrite { message }.into());
        }
        Ok(self.summary())
    }
}

impl fmt::Debug for BadCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BadCollector")
            .field("cfg", &self.cfg)
            .field("summary", &self.summary())
            .finish_non_exhaustive()
    }
}

impl Drop for BadCollector {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            tracing::warn!(error = %err, "closing bad-entry collector failed");
        }
    }
}

fn writer_loop(mut report: Box<dyn Write + Send>, rx: Receiver<ReportMsg>) {
    let mut error: Option<String> = None;
    let header = format!("# kyro-import bad entries, started {}", Utc::now().to_rfc3339());
    if let Err(e) = writeln!(report, "{header}") {
        error = Some(e.to_string());
    }

    for msg in rx {
        match msg {
            ReportMsg::Line(line) => {
                // Keep draining after a failed write so senders never block forever.
                if error.is_none() {
                    if let Err(e) = writeln!(report, "{line}") {
                        error = Some(e.to_string());
                    }
                }
            }
            ReportMsg::Close { reply } => {
                if error.is_none() {
                    if let Err(e) = report.flush() {
                        error = Some(e.to_string());
                    }
                }
                let _ = reply.send(error);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::input::{ExternalId, Group, InputRelationship};

    fn duplicate(n: u64) -> BadEntry {
        BadEntry::DuplicateNode {
            group: Group::global(),
            id: ExternalId::Int(7),
            canonical: 0,
            duplicate: n,
        }
    }

    fn unresolved(position: u64) -> BadEntry {
        BadEntry::UnresolvedEndpoint {
            position,
            relationship: Box::new(InputRelationship::new("x", "R", "y")),
            side: Side::End,
        }
    }

    fn with_tolerance(tolerance: Tolerance) -> BadCollector {
        BadCollector::new(CollectorConfig {
            tolerance,
            ..CollectorConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn tolerance_t_trips_on_entry_t_plus_one() {
        let collector = with_tolerance(Tolerance::Bounded(2));
        collector.collect(duplicate(1)).unwrap();
        collector.collect(unresolved(0)).unwrap();
        assert!(!collector.threshold_exceeded());

        let err = collector.collect(duplicate(2)).unwrap_err();
        assert!(err.is_tolerance_exceeded());
        assert!(collector.threshold_exceeded());
        assert_eq!(collector.duplicates(), 2);
        assert_eq!(collector.unresolved(), 1);
        assert_eq!(collector.entries().len(), 3);
    }

    #[test]
    fn zero_tolerance_trips_on_first_entry() {
        let collector = with_tolerance(Tolerance::Bounded(0));
        assert!(collector.collect(unresolved(9)).is_err());
        assert!(collector.threshold_exceeded());
    }

    #[test]
    fn unbounded_tolerance_never_trips() {
        let collector = with_tolerance(Tolerance::Unbounded);
        for i in 0..500 {
            collector.collect(duplicate(i)).unwrap();
        }
        assert!(!collector.threshold_exceeded());
        assert_eq!(collector.total(), 500);
    }

    #[test]
    fn disabled_kind_fails_immediately() {
        let collector = BadCollector::new(CollectorConfig {
            tolerance: Tolerance::Unbounded,
            collect_duplicates: false,
            ..CollectorConfig::default()
        })
        .unwrap();
        collector.collect(unresolved(1)).unwrap();
        let err = collector.collect(duplicate(1)).unwrap_err();
        assert!(matches!(err, ImportError::Collector(CollectorError::NotCollected { .. })));
        assert!(collector.threshold_exceeded());
    }

    #[test]
    fn concurrent_collect_loses_nothing() {
        let collector = Arc::new(BadCollector::new(CollectorConfig {
            tolerance: Tolerance::Unbounded,
            queue_capacity: 8,
            max_retained: 100_000,
            ..CollectorConfig::default()
        })
        .unwrap());

        std::thread::scope(|scope| {
            for t in 0..8u64 {
                let collector = Arc::clone(&collector);
                scope.spawn(move || {
                    for i in 0..1000 {
                        collector.collect(duplicate(t * 1000 + i)).unwrap();
                    }
                });
            }
        });

        let summary = collector.close().unwrap();
        assert_eq!(summary.total, 8000);
        assert_eq!(summary.duplicates, 8000);
        assert_eq!(collector.entries().len(), 8000);
    }

    #[test]
    fn retention_is_capped() {
        let collector = BadCollector::new(CollectorConfig {
            tolerance: Tolerance::Unbounded,
            max_retained: 3,
            ..CollectorConfig::default()
        })
        .unwrap();
        for i in 0..10 {
            collector.collect(unresolved(i)).unwrap();
        }
        assert_eq!(collector.entries().len(), 3);
        assert_eq!(collector.total(), 10);
    }

    #[test]
    fn collect_after_close_is_rejected() {
        let collector = with_tolerance(Tolerance::Unbounded);
        collector.close().unwrap();
        collector.close().unwrap();
        let err = collector.collect(duplicate(1)).unwrap_err();
        assert!(matches!(err, ImportError::Collector(CollectorError::Closed)));
    }

    #[test]
    fn rejected_collect_after_close_is_not_counted() {
        let collector = with_tolerance(Tolerance::Unbounded);
        collector.collect(unresolved(0)).unwrap();
        collector.close().unwrap();

        assert!(collector.collect(duplicate(1)).is_err());
        assert!(collector.collect(unresolved(1)).is_err());
        assert_eq!(collector.total(), 1);
        assert_eq!(collector.duplicates(), 0);
        assert_eq!(collector.unresolved(), 1);
        assert_eq!(collector.entries().len(), 1);
        assert_eq!(collector.summary().total, 1);
    }
}
