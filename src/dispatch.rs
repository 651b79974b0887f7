//! Admission-controlled dispatcher.
//!
//! A run moves through [`Phase`]s in order:
//!
//! 1. `LoadingCatalog`: load the catalog snapshot, querying the catalog
//!    source and persisting the snapshot only if none exists yet.
//! 2. `Dispatching`: walk the snapshot, skip settled descriptors, submit the
//!    rest while keeping the in-flight window between the watermarks.
//! 3. `Draining`: wait out what is left in the window, oldest first, with a
//!    bounded wait per task.
//! 4. `Done`.
//!
//! The window is a ring of handles in submission order. Above the low-water
//! mark, each submission is followed by one bounded poll of the oldest
//! handle. At the high-water mark, submission stops and the ring is rotated
//! (poll the front, push it to the back on timeout) until a slot frees up.
//!
//! Each settled result is persisted immediately. A descriptor whose task
//! produced nothing usable is left undone and is picked up by the next run
//! against the same data directory.

use std::collections::{HashSet, VecDeque};
use std::fmt;

use tracing::{debug, info, warn};

use crate::config::DispatchConfig;
use crate::envelope::{Entity, Envelope, EnvelopeError, Variant};
use crate::external::{CatalogError, CatalogSource};
use crate::model::{AnalysisResult, RepoDescriptor};
use crate::queue::{QueueError, TaskHandle, TaskQueue, WaitError};
use crate::storage::{Storage, StorageError};

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("catalog source failed: {0}")]
    Catalog(#[from] CatalogError),

    #[error("storage failed: {0}")]
    Storage(#[from] StorageError),

    #[error("task submission failed: {0}")]
    Queue(#[from] QueueError),

    #[error("failed to encode task: {0}")]
    Envelope(#[from] EnvelopeError),
}

pub type Result<T> = core::result::Result<T, DispatchError>;

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    LoadingCatalog,
    Dispatching,
    Draining,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::LoadingCatalog => "loading-catalog",
            Self::Dispatching => "dispatching",
            Self::Draining => "draining",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

/// Counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Descriptors in the snapshot.
    pub total: usize,
    /// Already settled before this run.
    pub skipped: usize,
    /// Dropped because an earlier entry maps to the same result path.
    pub duplicates: usize,
    pub submitted: usize,
    pub persisted: usize,
    /// Tasks that came back empty or undecodable.
    pub discarded: usize,
    /// Tasks abandoned when the final drain timed out.
    pub requeued: usize,
    pub peak_in_flight: usize,
}

impl RunSummary {
    /// Descriptors that are still undone after this run.
    pub fn undone(&self) -> usize {
        self.discarded + self.requeued
    }
}

/// Load the catalog snapshot, creating it from `source` if it is missing.
///
/// With `refresh`, the source is queried again and the snapshot replaced.
pub fn load_catalog(
    storage: &Storage,
    source: &dyn CatalogSource,
    refresh: bool,
) -> Result<Vec<RepoDescriptor>> {
    if !refresh && storage.has_catalog() {
        let catalog = storage.load_catalog()?;
        info!(count = catalog.len(), "loaded catalog snapshot");
        return Ok(catalog);
    }

    let catalog = source.discover()?;
    storage.save_catalog(&catalog)?;
    info!(
        count = catalog.len(),
        path = %storage.catalog_path().display(),
        "wrote catalog snapshot"
    );
    Ok(catalog)
}

struct InFlight<H> {
    descriptor: RepoDescriptor,
    handle: H,
}

/// Drives one run over a task queue.
pub struct Dispatcher<'a, Q: TaskQueue> {
    queue: &'a Q,
    storage: &'a Storage,
    settings: &'a DispatchConfig,
    window: VecDeque<InFlight<Q::Handle>>,
    phase: Phase,
    summary: RunSummary,
}

impl<'a, Q: TaskQueue> Dispatcher<'a, Q> {
    pub fn new(queue: &'a Q, storage: &'a Storage, settings: &'a DispatchConfig) -> Self {
        Self {
            queue,
            storage,
            settings,
            window: VecDeque::with_capacity(settings.max_in_flight),
            phase: Phase::LoadingCatalog,
            summary: RunSummary::default(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Run every phase to completion.
    ///
    /// Storage failures abort the run: a result that cannot be persisted
    /// would otherwise be silently lost.
    pub fn run(&mut self, source: &dyn CatalogSource) -> Result<RunSummary> {
        self.enter(Phase::LoadingCatalog);
        let catalog = load_catalog(self.storage, source, false)?;

        self.enter(Phase::Dispatching);
        self.dispatch(&catalog)?;

        self.enter(Phase::Draining);
        self.drain_all()?;

        self.enter(Phase::Done);
        let summary = std::mem::take(&mut self.summary);
        info!(
            total = summary.total,
            skipped = summary.skipped,
            submitted = summary.submitted,
            persisted = summary.persisted,
            discarded = summary.discarded,
            requeued = summary.requeued,
            peak_in_flight = summary.peak_in_flight,
            "run finished"
        );
        Ok(summary)
    }

    fn enter(&mut self, phase: Phase) {
        debug!(from = %self.phase, to = %phase, "phase");
        self.phase = phase;
    }

    fn dispatch(&mut self, catalog: &[RepoDescriptor]) -> Result<()> {
        let mut seen = HashSet::new();
        for descriptor in catalog {
            self.summary.total += 1;

            if !seen.insert(self.storage.path_for(descriptor)) {
                debug!(repo = %descriptor.full_name, language = %descriptor.language, "duplicate");
                self.summary.duplicates += 1;
                continue;
            }
            if self.storage.is_settled(descriptor) {
                debug!(repo = %descriptor.full_name, language = %descriptor.language, "already settled");
                self.summary.skipped += 1;
                continue;
            }

            self.relieve_pressure()?;
            self.submit(descriptor)?;

            if self.window.len() > self.settings.min_in_flight {
                self.poll_oldest()?;
            }
        }
        Ok(())
    }

    fn submit(&mut self, descriptor: &RepoDescriptor) -> Result<()> {
        let payload = Envelope::encode(descriptor)?.to_bytes()?;
        let handle = self.queue.submit(payload)?;
        self.window.push_back(InFlight {
            descriptor: descriptor.clone(),
            handle,
        });

        self.summary.submitted += 1;
        self.summary.peak_in_flight = self.summary.peak_in_flight.max(self.window.len());
        info!(
            repo = %descriptor.full_name,
            language = %descriptor.language,
            period = descriptor.period(),
            in_flight = self.window.len(),
            "submitted"
        );
        Ok(())
    }

    /// Rotate through the window until there is room for one more task.
    fn relieve_pressure(&mut self) -> Result<()> {
        let timeout = self.settings.poll_timeout();
        while self.window.len() >= self.settings.max_in_flight {
            let Some(mut entry) = self.window.pop_front() else {
                break;
            };
            match entry.handle.get(Some(timeout)) {
                Ok(reply) => self.settle(&entry.descriptor, reply)?,
                Err(WaitError::Timeout) => self.window.push_back(entry),
            }
        }
        Ok(())
    }

    /// One bounded poll of the oldest task; it keeps its place on timeout.
    fn poll_oldest(&mut self) -> Result<()> {
        let Some(mut entry) = self.window.pop_front() else {
            return Ok(());
        };
        match entry.handle.get(Some(self.settings.poll_timeout())) {
            Ok(reply) => self.settle(&entry.descriptor, reply),
            Err(WaitError::Timeout) => {
                self.window.push_front(entry);
                Ok(())
            }
        }
    }

    fn drain_all(&mut self) -> Result<()> {
        let timeout = self.settings.final_drain_timeout();
        while let Some(mut entry) = self.window.pop_front() {
            match entry.handle.get(Some(timeout)) {
                Ok(reply) => self.settle(&entry.descriptor, reply)?,
                Err(WaitError::Timeout) => {
                    warn!(
                        repo = %entry.descriptor.full_name,
                        language = %entry.descriptor.language,
                        ?timeout,
                        "task did not finish; leaving it for the next run"
                    );
                    self.summary.requeued += 1;
                }
            }
        }
        Ok(())
    }

    /// Persist a task's reply, or discard it if there is nothing usable.
    fn settle(&mut self, descriptor: &RepoDescriptor, reply: Option<Vec<u8>>) -> Result<()> {
        let Some(bytes) = reply else {
            warn!(repo = %descriptor.full_name, language = %descriptor.language, "task produced no result");
            self.summary.discarded += 1;
            return Ok(());
        };

        let result = match decode_result(&bytes) {
            Ok(result) => result,
            Err(e) => {
                warn!(repo = %descriptor.full_name, error = %e, "undecodable task result");
                self.summary.discarded += 1;
                return Ok(());
            }
        };

        if result.target_identity != *descriptor {
            warn!(
                repo = %descriptor.full_name,
                got = %result.target_identity.full_name,
                got_period = result.target_identity.period(),
                "task result is for a different descriptor"
            );
            self.summary.discarded += 1;
            return Ok(());
        }

        let path = self.storage.persist(&result)?;
        self.summary.persisted += 1;
        info!(
            repo = %descriptor.full_name,
            success = result.success,
            reason = result.failure_reason.as_deref().unwrap_or(""),
            path = %path.display(),
            "persisted"
        );
        Ok(())
    }
}

fn decode_result(bytes: &[u8]) -> core::result::Result<AnalysisResult, EnvelopeError> {
    match Envelope::from_bytes(bytes)?.decode()? {
        Entity::AnalysisResult(result) => Ok(result),
        other => Err(EnvelopeError::UnexpectedVariant {
            expected: AnalysisResult::TAG,
            found: other.tag().to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::cell::{Cell, RefCell};
    use std::fs;
    use std::rc::Rc;
    use std::time::Duration;

    use tempfile::TempDir;

    use crate::external::CommandError;
    use crate::model::LineStats;

    // ── Fakes ──

    struct FakeSource {
        catalog: Vec<RepoDescriptor>,
        calls: Cell<usize>,
    }

    impl FakeSource {
        fn new(catalog: Vec<RepoDescriptor>) -> Self {
            Self {
                catalog,
                calls: Cell::new(0),
            }
        }
    }

    impl CatalogSource for FakeSource {
        fn discover(&self) -> core::result::Result<Vec<RepoDescriptor>, CatalogError> {
            self.calls.set(self.calls.get() + 1);
            Ok(self.catalog.clone())
        }
    }

    /// A queue whose tasks complete after a fixed number of short polls.
    ///
    /// Tasks named in `faulty` reply nothing, those in `stuck` never finish,
    /// those in `foreign` reply with a value of the wrong type, and those in
    /// `misfiled` reply with a result for the other period.
    #[derive(Default)]
    struct FakeQueue {
        polls_until_ready: usize,
        faulty: HashSet<String>,
        stuck: HashSet<String>,
        foreign: HashSet<String>,
        misfiled: HashSet<String>,
        outstanding: Rc<Cell<usize>>,
        peak: Cell<usize>,
        submitted: RefCell<Vec<String>>,
    }

    impl FakeQueue {
        fn with_delay(polls_until_ready: usize) -> Self {
            Self {
                polls_until_ready,
                ..Self::default()
            }
        }
    }

    struct FakeHandle {
        reply: Option<Vec<u8>>,
        polls_left: usize,
        stuck: bool,
        outstanding: Rc<Cell<usize>>,
    }

    impl TaskQueue for FakeQueue {
        type Handle = FakeHandle;

        fn submit(&self, payload: Vec<u8>) -> core::result::Result<FakeHandle, QueueError> {
            let descriptor: RepoDescriptor =
                Envelope::from_bytes(&payload).unwrap().decode_as().unwrap();
            let name = descriptor.full_name.clone();
            self.submitted.borrow_mut().push(name.clone());

            let reply = if self.faulty.contains(&name) {
                None
            } else if self.foreign.contains(&name) {
                Some(Envelope::encode(&LineStats::default()).unwrap().to_bytes().unwrap())
            } else {
                let stats = LineStats {
                    code: 100,
                    comment: 10,
                    blank: 5,
                };
                let mut identity = descriptor;
                if self.misfiled.contains(&name) {
                    identity.is_old_period = !identity.is_old_period;
                }
                let result = AnalysisResult::succeeded(identity, "abc123".into(), stats);
                Some(Envelope::encode(&result).unwrap().to_bytes().unwrap())
            };

            self.outstanding.set(self.outstanding.get() + 1);
            self.peak.set(self.peak.get().max(self.outstanding.get()));
            Ok(FakeHandle {
                reply,
                polls_left: self.polls_until_ready,
                stuck: self.stuck.contains(&name),
                outstanding: Rc::clone(&self.outstanding),
            })
        }
    }

    impl TaskHandle for FakeHandle {
        fn get(
            &mut self,
            timeout: Option<Duration>,
        ) -> core::result::Result<Option<Vec<u8>>, WaitError> {
            let timeout = timeout.expect("dispatcher must never wait unbounded");
            if self.stuck {
                return Err(WaitError::Timeout);
            }
            // Short polls count down; the long final-drain wait always completes.
            if self.polls_left > 0 && timeout < Duration::from_secs(1) {
                self.polls_left -= 1;
                return Err(WaitError::Timeout);
            }
            self.outstanding.set(self.outstanding.get() - 1);
            Ok(self.reply.take())
        }
    }

    struct FailingSource;

    impl CatalogSource for FailingSource {
        fn discover(&self) -> core::result::Result<Vec<RepoDescriptor>, CatalogError> {
            Err(CatalogError::NoData {
                failed: 2,
                last: Box::new(CatalogError::Command(CommandError::Failed {
                    command: "gh api search/repositories".into(),
                    stderr: "gh: Bad credentials (HTTP 401)".into(),
                })),
            })
        }
    }

    // ── Helpers ──

    fn settings(min_in_flight: usize, max_in_flight: usize) -> DispatchConfig {
        DispatchConfig {
            workers: 1,
            min_in_flight,
            max_in_flight,
            poll_timeout_ms: 1,
            final_drain_timeout_secs: 60,
        }
    }

    fn repos(n: usize) -> Vec<RepoDescriptor> {
        (0..n)
            .map(|i| RepoDescriptor::from_github_name(&format!("octo/repo-{i}"), "python", i % 2 == 0))
            .collect()
    }

    fn test_storage() -> (TempDir, Storage) {
        let dir = TempDir::new().unwrap();
        let storage = Storage::new(dir.path().join("data")).unwrap();
        (dir, storage)
    }

    fn run(
        queue: &FakeQueue,
        storage: &Storage,
        settings: &DispatchConfig,
        source: &FakeSource,
    ) -> RunSummary {
        let mut dispatcher = Dispatcher::new(queue, storage, settings);
        let summary = dispatcher.run(source).unwrap();
        assert_eq!(dispatcher.phase(), Phase::Done);
        summary
    }

    // ── Tests ──

    #[test]
    fn window_never_exceeds_high_water() {
        let (_dir, storage) = test_storage();
        let queue = FakeQueue::with_delay(3);
        let source = FakeSource::new(repos(10));

        let summary = run(&queue, &storage, &settings(2, 5), &source);

        assert!(queue.peak.get() <= 5, "peak was {}", queue.peak.get());
        assert!(summary.peak_in_flight <= 5);
        assert!(summary.peak_in_flight > 2);
        assert_eq!(summary.submitted, 10);
        assert_eq!(summary.persisted, 10);
        assert_eq!(summary.undone(), 0);
        for repo in repos(10) {
            assert!(storage.is_settled(&repo));
        }
    }

    #[test]
    fn immediate_completion_stays_near_low_water() {
        let (_dir, storage) = test_storage();
        let queue = FakeQueue::with_delay(0);
        let source = FakeSource::new(repos(10));

        let summary = run(&queue, &storage, &settings(2, 5), &source);

        assert_eq!(summary.peak_in_flight, 3);
        assert_eq!(summary.persisted, 10);
    }

    #[test]
    fn second_run_does_no_work() {
        let (_dir, storage) = test_storage();
        let source = FakeSource::new(repos(10));
        let config = settings(2, 5);

        let first = run(&FakeQueue::with_delay(1), &storage, &config, &source);
        assert_eq!(first.persisted, 10);

        let queue = FakeQueue::with_delay(1);
        let second = run(&queue, &storage, &config, &source);
        assert_eq!(second.submitted, 0);
        assert_eq!(second.skipped, 10);
        assert!(queue.submitted.borrow().is_empty());
    }

    #[test]
    fn catalog_is_queried_once_per_data_dir() {
        let (_dir, storage) = test_storage();
        let source = FakeSource::new(repos(3));
        let config = settings(1, 2);

        run(&FakeQueue::default(), &storage, &config, &source);
        run(&FakeQueue::default(), &storage, &config, &source);

        assert_eq!(source.calls.get(), 1);
        assert!(storage.has_catalog());
        assert_eq!(storage.load_catalog().unwrap(), repos(3));
    }

    #[test]
    fn refresh_requeries_catalog() {
        let (_dir, storage) = test_storage();
        let source = FakeSource::new(repos(2));

        load_catalog(&storage, &source, false).unwrap();
        load_catalog(&storage, &source, false).unwrap();
        load_catalog(&storage, &source, true).unwrap();

        assert_eq!(source.calls.get(), 2);
    }

    #[test]
    fn faulted_task_is_retried_next_run() {
        let (_dir, storage) = test_storage();
        let source = FakeSource::new(repos(4));
        let config = settings(1, 3);

        let mut queue = FakeQueue::with_delay(1);
        queue.faulty.insert("octo/repo-2".into());
        let first = run(&queue, &storage, &config, &source);

        assert_eq!(first.discarded, 1);
        assert_eq!(first.persisted, 3);
        assert!(!storage.is_settled(&repos(4)[2]));

        let retry = FakeQueue::with_delay(1);
        let second = run(&retry, &storage, &config, &source);
        assert_eq!(*retry.submitted.borrow(), vec!["octo/repo-2".to_string()]);
        assert_eq!(second.persisted, 1);
        assert!(storage.is_settled(&repos(4)[2]));
    }

    #[test]
    fn stuck_task_is_abandoned_at_final_drain() {
        let (_dir, storage) = test_storage();
        let source = FakeSource::new(repos(3));

        let mut queue = FakeQueue::with_delay(0);
        queue.stuck.insert("octo/repo-2".into());
        let summary = run(&queue, &storage, &settings(5, 10), &source);

        assert_eq!(summary.requeued, 1);
        assert_eq!(summary.persisted, 2);
        assert!(!storage.is_settled(&repos(3)[2]));
    }

    #[test]
    fn stuck_task_does_not_block_high_water_rotation() {
        let (_dir, storage) = test_storage();
        let source = FakeSource::new(repos(8));

        let mut queue = FakeQueue::with_delay(2);
        queue.stuck.insert("octo/repo-0".into());
        let summary = run(&queue, &storage, &settings(1, 2), &source);

        assert!(summary.peak_in_flight <= 2);
        assert_eq!(summary.persisted, 7);
        assert_eq!(summary.requeued, 1);
    }

    #[test]
    fn wrong_result_type_is_discarded() {
        let (_dir, storage) = test_storage();
        let source = FakeSource::new(repos(2));

        let mut queue = FakeQueue::default();
        queue.foreign.insert("octo/repo-1".into());
        let summary = run(&queue, &storage, &settings(1, 2), &source);

        assert_eq!(summary.discarded, 1);
        assert_eq!(summary.persisted, 1);
        assert!(!storage.is_settled(&repos(2)[1]));
    }

    #[test]
    fn result_for_other_period_is_discarded() {
        let (_dir, storage) = test_storage();
        let source = FakeSource::new(repos(2));

        let mut queue = FakeQueue::default();
        queue.misfiled.insert("octo/repo-0".into());
        let summary = run(&queue, &storage, &settings(1, 2), &source);

        assert_eq!(summary.discarded, 1);
        assert_eq!(summary.persisted, 1);
        assert!(!storage.is_settled(&repos(2)[0]));
    }

    #[test]
    fn failed_catalog_query_writes_no_snapshot() {
        let (_dir, storage) = test_storage();
        let queue = FakeQueue::default();
        let config = settings(1, 2);
        let mut dispatcher = Dispatcher::new(&queue, &storage, &config);

        let err = dispatcher.run(&FailingSource).unwrap_err();

        assert!(matches!(err, DispatchError::Catalog(CatalogError::NoData { .. })));
        assert_eq!(dispatcher.phase(), Phase::LoadingCatalog);
        assert!(!storage.has_catalog());
        assert!(queue.submitted.borrow().is_empty());

        let source = FakeSource::new(repos(2));
        let summary = run(&queue, &storage, &config, &source);
        assert_eq!(source.calls.get(), 1);
        assert_eq!(summary.persisted, 2);
    }

    #[test]
    fn duplicates_are_dropped_but_languages_are_distinct() {
        let (_dir, storage) = test_storage();
        let widgets_c = RepoDescriptor::from_github_name("octo/widgets", "c", false);
        let widgets_cpp = RepoDescriptor::from_github_name("octo/widgets", "c++", false);
        let source = FakeSource::new(vec![
            widgets_c.clone(),
            widgets_cpp.clone(),
            widgets_c.clone(),
        ]);

        let queue = FakeQueue::default();
        let summary = run(&queue, &storage, &settings(1, 4), &source);

        assert_eq!(summary.total, 3);
        assert_eq!(summary.duplicates, 1);
        assert_eq!(summary.submitted, 2);
        assert!(storage.is_settled(&widgets_c));
        assert!(storage.is_settled(&widgets_cpp));
    }

    #[test]
    fn persistence_failure_aborts_the_run() {
        let (dir, storage) = test_storage();
        let results = dir.path().join("data").join("results");
        fs::remove_dir_all(&results).unwrap();
        fs::write(&results, "not a directory").unwrap();

        let source = FakeSource::new(repos(2));
        let queue = FakeQueue::default();
        let config = settings(0, 2);
        let mut dispatcher = Dispatcher::new(&queue, &storage, &config);

        let err = dispatcher.run(&source).unwrap_err();
        assert!(matches!(err, DispatchError::Storage(_)));
    }

    #[test]
    fn phase_names() {
        assert_eq!(Phase::LoadingCatalog.to_string(), "loading-catalog");
        assert_eq!(Phase::Done.to_string(), "done");
    }
}
