//! Execution Coordinator
//!
//! Decides, for every run request, whether to answer from the result cache,
//! join a job already running the same query, or start a new job.
//!
//! ## Design
//!
//! The fingerprint→job table is a `DashMap`. Its entry API holds the shard
//! lock across "is there a live job?" and "register mine", which makes the
//! dedupe step a single atomic operation. A table entry that points at a
//! finished, evicted or expired job counts as absent and is overwritten in
//! place.
//!
//! Callers never block: `run_query` returns as soon as the job is queued.
//! Workers pick jobs from a priority queue and report back through the job
//! store, whose subscribers get every transition.
//!
//! Lock order is table shard, then job store. Nothing takes a table shard
//! while holding the store lock.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::broadcast::{self, error::RecvError};

use super::cache::{CachedResult, MaxAge, ResultCache, ResultId};
use super::clock::{Clock, SystemClock};
use super::data_source::{DataSource, ExecutorError, QueryResultData};
use super::fingerprint::Fingerprint;
use super::job::{Job, JobDescriptor, JobError, JobId, JobMetadata, JobState};
use super::store::{JobStore, MemoryJobStore};
use super::timeout::{CancelHandle, Interrupted, QueryTimeout};
use super::worker::WorkerPool;
use super::{ExecutionError, ExecutionResult};
use crate::config::{Config, ExecutionConfig};
use crate::query::ParameterizedQuery;

/// Default priority of interactive runs
pub const ADHOC_PRIORITY: i32 = 10;
/// Default priority of scheduled refreshes
pub const SCHEDULED_PRIORITY: i32 = 0;

/// Per-request execution options
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub max_age: MaxAge,
    /// Caller may run queries that fail the safety check
    pub allow_unsafe: bool,
    pub scheduled: bool,
    /// Overrides the ad-hoc/scheduled default
    pub priority: Option<i32>,
    pub apply_auto_limit: bool,
    pub metadata: JobMetadata,
}

impl RunOptions {
    pub fn with_max_age(max_age: MaxAge) -> Self {
        RunOptions {
            max_age,
            ..RunOptions::default()
        }
    }

    fn priority(&self) -> i32 {
        self.priority.unwrap_or(if self.scheduled {
            SCHEDULED_PRIORITY
        } else {
            ADHOC_PRIORITY
        })
    }
}

/// What a run request resolved to
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Cached(Arc<CachedResult>),
    Job(JobDescriptor),
}

impl RunOutcome {
    pub fn job(&self) -> Option<&JobDescriptor> {
        match self {
            RunOutcome::Job(job) => Some(job),
            RunOutcome::Cached(_) => None,
        }
    }

    pub fn cached(&self) -> Option<&Arc<CachedResult>> {
        match self {
            RunOutcome::Cached(result) => Some(result),
            RunOutcome::Job(_) => None,
        }
    }
}

struct Inner {
    config: ExecutionConfig,
    cache: Arc<ResultCache>,
    store: Arc<dyn JobStore>,
    clock: Arc<dyn Clock>,
    /// Fingerprint → job currently owning it
    owners: DashMap<Fingerprint, JobId>,
    /// Data source of each queued job, taken by the worker
    pending: DashMap<JobId, Arc<dyn DataSource>>,
    running: DashMap<JobId, CancelHandle>,
}

pub struct ExecutionCoordinator {
    inner: Arc<Inner>,
    pool: WorkerPool,
}

impl ExecutionCoordinator {
    /// Coordinator with an in-memory job store and the wall clock.
    pub fn new(config: &Config) -> ExecutionResult<Self> {
        ExecutionCoordinator::from_parts(
            config.execution.clone(),
            Arc::new(ResultCache::new(config.cache.max_entries)),
            Arc::new(MemoryJobStore::new()),
            Arc::new(SystemClock),
        )
    }

    pub fn from_parts(
        config: ExecutionConfig,
        cache: Arc<ResultCache>,
        store: Arc<dyn JobStore>,
        clock: Arc<dyn Clock>,
    ) -> ExecutionResult<Self> {
        let workers = config.worker_count();
        let inner = Arc::new(Inner {
            config,
            cache,
            store,
            clock,
            owners: DashMap::new(),
            pending: DashMap::new(),
            running: DashMap::new(),
        });

        let worker_inner = Arc::clone(&inner);
        let pool = WorkerPool::start(workers, Arc::new(move |id| worker_inner.process(id)))
            .map_err(|e| ExecutionError::WorkerSpawn(e.to_string()))?;

        Ok(ExecutionCoordinator { inner, pool })
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.inner.cache
    }

    /// Answer from cache, join a live job or start a new one.
    ///
    /// Checks run in order: paused data source, missing parameters, safety,
    /// cache, dedupe.
    pub fn run_query(
        &self,
        query: &ParameterizedQuery,
        source: Arc<dyn DataSource>,
        options: &RunOptions,
    ) -> ExecutionResult<RunOutcome> {
        if source.paused() {
            return Err(ExecutionError::DataSourcePaused {
                name: source.name().to_string(),
                reason: source.pause_reason(),
            });
        }

        let missing = query.missing_params();
        if !missing.is_empty() {
            return Err(ExecutionError::MissingParameters {
                names: missing.into_iter().collect(),
            });
        }

        if !options.allow_unsafe && !query.is_safe() {
            return Err(ExecutionError::UnsafeQuery);
        }

        if self.pool.is_shut_down() {
            return Err(ExecutionError::ShutDown);
        }

        let text = source.apply_auto_limit(query.text(), options.apply_auto_limit);
        let fingerprint = Fingerprint::new(source.id(), &text);
        let now = self.inner.clock.now();

        if let Some(result) = self.inner.cache.get_latest(&fingerprint, options.max_age, now) {
            tracing::debug!(
                query_hash = %fingerprint.query_hash,
                data_source_id = fingerprint.data_source_id,
                result_id = result.id,
                "serving cached result"
            );
            return Ok(RunOutcome::Cached(result));
        }

        self.inner.evict_expired();

        let (job, created) = self.inner.enqueue(fingerprint, text, source, options, now);
        if created && !self.pool.submit(job.id, job.priority) {
            // Shut down between the check above and now.
            let _ = self.inner.cancel_job(&job.id);
            return Err(ExecutionError::ShutDown);
        }

        Ok(RunOutcome::Job(job.descriptor()))
    }

    pub fn fetch(&self, id: &JobId) -> ExecutionResult<JobDescriptor> {
        self.inner.evict_expired();
        self.inner
            .store
            .get(id)
            .map(|job| job.descriptor())
            .ok_or_else(|| JobError::NotFound(*id).into())
    }

    /// Payload a finished job points at.
    pub fn result(&self, id: ResultId) -> Option<Arc<CachedResult>> {
        self.inner.cache.get(id)
    }

    /// Cancel a waiting or running job. A running executor is signalled
    /// through its [`QueryTimeout`].
    pub fn cancel(&self, id: &JobId) -> ExecutionResult<JobDescriptor> {
        Ok(self.inner.cancel_job(id)?.descriptor())
    }

    /// Every later transition of jobs with this fingerprint.
    pub fn subscribe(&self, fingerprint: &Fingerprint) -> broadcast::Receiver<JobDescriptor> {
        self.inner.store.subscribe(fingerprint)
    }

    /// Resolve once the job reaches a terminal state.
    pub async fn wait(&self, id: &JobId, timeout: Duration) -> ExecutionResult<JobDescriptor> {
        let store = &self.inner.store;
        let job = store.get(id).ok_or(JobError::NotFound(*id))?;
        if job.state.is_terminal() {
            return Ok(job.descriptor());
        }

        let mut updates = store.subscribe(&job.fingerprint);
        // It may have finished before the subscription existed.
        if let Some(job) = store.get(id) {
            if job.state.is_terminal() {
                return Ok(job.descriptor());
            }
        }

        tokio::time::timeout(timeout, next_terminal(store.as_ref(), &mut updates, *id))
            .await
            .map_err(|_| ExecutionError::WaitTimeout { id: *id, timeout })?
    }

    /// Drop finished jobs past their retention window. Returns how many.
    pub fn evict_expired(&self) -> usize {
        self.inner.evict_expired()
    }

    /// Jobs queued but not yet picked up by a worker
    pub fn queued(&self) -> usize {
        self.pool.queued()
    }

    /// Stop the workers after their current job. Jobs still waiting are
    /// cancelled.
    pub fn shutdown(&self) {
        let pending = self.pool.shutdown();
        for id in &pending {
            let _ = self.inner.cancel_job(id);
        }
        if !pending.is_empty() {
            tracing::info!(cancelled = pending.len(), "cancelled queued jobs on shutdown");
        }
    }
}

impl Drop for ExecutionCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn next_terminal(
    store: &dyn JobStore,
    updates: &mut broadcast::Receiver<JobDescriptor>,
    id: JobId,
) -> ExecutionResult<JobDescriptor> {
    loop {
        match updates.recv().await {
            Ok(descriptor) if descriptor.id == id && descriptor.state.is_terminal() => {
                return Ok(descriptor);
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!(job_id = %id, skipped, "subscriber lagged, re-reading job");
                match store.get(&id) {
                    Some(job) if job.state.is_terminal() => return Ok(job.descriptor()),
                    Some(_) => {}
                    None => return Err(JobError::NotFound(id).into()),
                }
            }
            Err(RecvError::Closed) => {
                return store
                    .get(&id)
                    .map(|job| job.descriptor())
                    .ok_or_else(|| JobError::NotFound(id).into());
            }
        }
    }
}

impl Inner {
    /// Register a new job for `fingerprint` unless a live one exists.
    /// Returns the job and whether it was created by this call.
    fn enqueue(
        &self,
        fingerprint: Fingerprint,
        text: String,
        source: Arc<dyn DataSource>,
        options: &RunOptions,
        now: DateTime<Utc>,
    ) -> (Job, bool) {
        match self.owners.entry(fingerprint.clone()) {
            Entry::Occupied(mut entry) => {
                if let Some(existing) = self.live_job(entry.get(), now) {
                    tracing::debug!(
                        job_id = %existing.id,
                        query_hash = %fingerprint.query_hash,
                        "joining running job"
                    );
                    return (existing, false);
                }
                let job = self.create_job(fingerprint, text, source, options, now);
                entry.insert(job.id);
                (job, true)
            }
            Entry::Vacant(entry) => {
                let job = self.create_job(fingerprint, text, source, options, now);
                entry.insert(job.id);
                (job, true)
            }
        }
    }

    fn live_job(&self, id: &JobId, now: DateTime<Utc>) -> Option<Job> {
        let job = self.store.get(id)?;
        if job.state.is_terminal() {
            return None;
        }
        if age_at_least(job.created_at, now, self.config.job_expiry()) {
            tracing::warn!(
                job_id = %job.id,
                state = %job.state,
                "dedupe entry expired, starting a new job"
            );
            return None;
        }
        Some(job)
    }

    fn create_job(
        &self,
        fingerprint: Fingerprint,
        text: String,
        source: Arc<dyn DataSource>,
        options: &RunOptions,
        now: DateTime<Utc>,
    ) -> Job {
        let mut job = Job::new(JobId::new(), fingerprint, text, now);
        job.priority = options.priority();
        job.scheduled = options.scheduled;
        job.metadata = options.metadata.clone();
        job.time_limit = self.config.time_limit(options.scheduled);

        self.pending.insert(job.id, source);
        self.store.save(&job);

        tracing::info!(
            job_id = %job.id,
            query_hash = %job.fingerprint.query_hash,
            data_source_id = job.fingerprint.data_source_id,
            priority = job.priority,
            scheduled = job.scheduled,
            "job created"
        );
        job
    }

    /// Worker entry point.
    fn process(&self, id: JobId) {
        // Cancelled while waiting: the entry is already gone.
        let Some((_, source)) = self.pending.remove(&id) else {
            return;
        };

        let started = self.clock.now();
        let job = match self.store.update(&id, &mut |job| job.start(started)) {
            Ok(job) => job,
            Err(err) => {
                tracing::debug!(job_id = %id, error = %err, "skipping job");
                return;
            }
        };

        let timeout = QueryTimeout::new(job.time_limit);
        self.running.insert(id, timeout.cancel_handle());
        if self
            .store
            .get(&id)
            .is_none_or(|current| current.state != JobState::Processing)
        {
            timeout.cancel();
        }

        tracing::info!(
            job_id = %id,
            query_hash = %job.fingerprint.query_hash,
            data_source_id = job.fingerprint.data_source_id,
            "executing query"
        );

        let text = self.executed_text(&job, source.as_ref());
        let clock = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| source.execute(&text, &timeout)))
            .unwrap_or_else(|_| Err(ExecutorError::query("Query executor panicked")));
        let runtime = clock.elapsed();
        self.running.remove(&id);

        let finished = self.clock.now();
        match outcome {
            Ok(payload) => self.complete(&job, payload, runtime, finished),
            Err(ExecutorError::Interrupted(Interrupted::Cancelled)) => {
                let _ = self.store.update(&id, &mut |job| job.cancel(finished));
                tracing::info!(job_id = %id, "query cancelled");
            }
            Err(err) => {
                let message = err.to_string();
                match self.store.update(&id, &mut |job| job.fail(message.clone(), finished)) {
                    Ok(_) => tracing::warn!(
                        job_id = %id,
                        query_hash = %job.fingerprint.query_hash,
                        error = %message,
                        "query failed"
                    ),
                    Err(_) => tracing::debug!(job_id = %id, "dropping failure of cancelled job"),
                }
            }
        }

        self.release(&job);
    }

    fn complete(&self, job: &Job, payload: QueryResultData, runtime: Duration, now: DateTime<Utc>) {
        let still_running = self
            .store
            .get(&job.id)
            .is_some_and(|current| current.state == JobState::Processing);
        if !still_running {
            tracing::info!(job_id = %job.id, "discarding result of cancelled job");
            return;
        }

        let result = self.cache.store(
            job.fingerprint.clone(),
            job.query_text.clone(),
            payload,
            now,
            runtime,
        );
        match self.store.update(&job.id, &mut |current| current.finish(result.id, now)) {
            Ok(_) => tracing::info!(
                job_id = %job.id,
                query_hash = %job.fingerprint.query_hash,
                result_id = result.id,
                runtime_ms = runtime.as_millis() as u64,
                "query finished"
            ),
            Err(_) => {
                // Cancelled between the check and the update.
                self.cache.remove(result.id);
                tracing::info!(job_id = %job.id, "discarding result of cancelled job");
            }
        }
    }

    fn executed_text(&self, job: &Job, source: &dyn DataSource) -> String {
        if !(self.config.annotate_queries && source.supports_annotation()) {
            return job.query_text.clone();
        }
        let username = job.metadata.username.as_deref().unwrap_or("unknown");
        let query_id = job
            .metadata
            .query_id
            .map_or_else(|| "adhoc".to_string(), |id| id.to_string());
        format!(
            "/* Username: {username}, Query ID: {query_id}, Job ID: {}, Query Hash: {}, Scheduled: {} */ {}",
            job.id, job.fingerprint.query_hash, job.scheduled, job.query_text
        )
    }

    fn cancel_job(&self, id: &JobId) -> Result<Job, JobError> {
        let now = self.clock.now();
        let job = self.store.update(id, &mut |job| job.cancel(now))?;
        self.pending.remove(id);
        if let Some(handle) = self.running.get(id) {
            handle.cancel();
        }
        self.release(&job);
        tracing::info!(
            job_id = %id,
            query_hash = %job.fingerprint.query_hash,
            "job cancelled"
        );
        Ok(job)
    }

    fn release(&self, job: &Job) {
        self.owners
            .remove_if(&job.fingerprint, |_, owner| *owner == job.id);
    }

    fn evict_expired(&self) -> usize {
        let now = self.clock.now();
        let done_ttl = self.config.job_expiry();
        let failure_ttl = self.config.failure_ttl();

        let evicted = self.store.evict(&|job| {
            let Some(finished) = job.finished_at else {
                return false;
            };
            let ttl = if job.state == JobState::Done {
                done_ttl
            } else {
                failure_ttl
            };
            age_at_least(finished, now, ttl)
        });

        if !evicted.is_empty() {
            self.owners
                .retain(|_, owner| evicted.iter().all(|job| job.id != *owner));
            tracing::debug!(evicted = evicted.len(), "evicted expired jobs");
        }
        evicted.len()
    }
}

fn age_at_least(since: DateTime<Utc>, now: DateTime<Utc>, window: Duration) -> bool {
    (now - since).to_std().is_ok_and(|age| age >= window)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::clock::ManualClock;
    use crate::execution::data_source::Column;

    struct Echo;

    impl DataSource for Echo {
        fn id(&self) -> u64 {
            1
        }
        fn name(&self) -> &str {
            "echo"
        }
        fn supports_annotation(&self) -> bool {
            true
        }
        fn execute(
            &self,
            query: &str,
            _timeout: &QueryTimeout,
        ) -> Result<QueryResultData, ExecutorError> {
            let mut row = serde_json::Map::new();
            row.insert("query".into(), query.into());
            Ok(QueryResultData::new(vec![Column::new("query")], vec![row]))
        }
    }

    fn coordinator() -> (ExecutionCoordinator, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let config = ExecutionConfig {
            workers: 1,
            ..ExecutionConfig::default()
        };
        let coordinator = ExecutionCoordinator::from_parts(
            config,
            Arc::new(ResultCache::new(10)),
            Arc::new(MemoryJobStore::new()),
            Arc::clone(&clock) as Arc<dyn Clock>,
        )
        .unwrap();
        (coordinator, clock)
    }

    #[test]
    fn test_priority_defaults() {
        assert_eq!(RunOptions::default().priority(), ADHOC_PRIORITY);
        let scheduled = RunOptions {
            scheduled: true,
            ..RunOptions::default()
        };
        assert_eq!(scheduled.priority(), SCHEDULED_PRIORITY);
    }

    #[test]
    fn test_age_at_least() {
        let now = Utc::now();
        let earlier = now - chrono::Duration::seconds(10);
        assert!(age_at_least(earlier, now, Duration::from_secs(10)));
        assert!(!age_at_least(earlier, now, Duration::from_secs(11)));
        assert!(!age_at_least(now, earlier, Duration::ZERO));
    }

    #[tokio::test]
    async fn test_annotation_reaches_executor_but_not_fingerprint() {
        let (coordinator, _clock) = coordinator();
        let query = ParameterizedQuery::new("SELECT 1", None);
        let options = RunOptions {
            metadata: JobMetadata {
                username: Some("ana".into()),
                query_id: Some(42),
            },
            ..RunOptions::default()
        };

        let outcome = coordinator.run_query(&query, Arc::new(Echo), &options).unwrap();
        let job = outcome.job().unwrap().clone();
        let done = coordinator
            .wait(&job.id, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(done.state, JobState::Done);

        let result = coordinator.result(done.result_id.unwrap()).unwrap();
        assert_eq!(result.fingerprint, Fingerprint::new(1, "SELECT 1"));
        assert_eq!(result.query_text, "SELECT 1");
        let executed = result.payload.rows[0]["query"].as_str().unwrap().to_string();
        assert!(executed.starts_with("/* Username: ana, Query ID: 42, Job ID: "));
        assert!(executed.ends_with("Scheduled: false */ SELECT 1"));
    }

    #[test]
    fn test_expired_jobs_are_evicted() {
        let (coordinator, clock) = coordinator();
        let query = ParameterizedQuery::new("SELECT 1", None);
        let outcome = coordinator
            .run_query(&query, Arc::new(Echo), &RunOptions::default())
            .unwrap();
        let id = outcome.job().unwrap().id;

        let deadline = Instant::now() + Duration::from_secs(5);
        while coordinator.fetch(&id).unwrap().status != 3 {
            assert!(Instant::now() < deadline, "job never finished");
            std::thread::sleep(Duration::from_millis(5));
        }

        clock.advance_secs(43_199);
        assert_eq!(coordinator.evict_expired(), 0);
        clock.advance_secs(2);
        assert_eq!(coordinator.evict_expired(), 1);
        assert!(matches!(
            coordinator.fetch(&id),
            Err(ExecutionError::Job(JobError::NotFound(_)))
        ));
    }
}
