//! Job persistence and change notification.
//!
//! Every saved or updated job is published to the subscribers of its
//! fingerprint, so waiting callers learn about transitions without polling.

use std::collections::HashMap;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::broadcast;

use super::fingerprint::Fingerprint;
use super::job::{Job, JobDescriptor, JobError, JobId};

const CHANNEL_CAPACITY: usize = 64;

pub trait JobStore: Send + Sync {
    /// Insert or overwrite a job and notify subscribers.
    fn save(&self, job: &Job);

    fn get(&self, id: &JobId) -> Option<Job>;

    /// Atomically apply `change` to a stored job. The job is only written
    /// back (and published) when `change` succeeds.
    fn update(
        &self,
        id: &JobId,
        change: &mut dyn FnMut(&mut Job) -> Result<(), JobError>,
    ) -> Result<Job, JobError>;

    /// Descriptors of every later save/update for this fingerprint.
    fn subscribe(&self, fingerprint: &Fingerprint) -> broadcast::Receiver<JobDescriptor>;

    /// Remove and return every job matching `predicate`.
    fn evict(&self, predicate: &dyn Fn(&Job) -> bool) -> Vec<Job>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-process job store
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
    channels: DashMap<Fingerprint, broadcast::Sender<JobDescriptor>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        MemoryJobStore::default()
    }

    fn publish(&self, job: &Job) {
        if let Some(sender) = self.channels.get(&job.fingerprint) {
            // No receivers is fine.
            let _ = sender.send(job.descriptor());
        }
    }
}

impl JobStore for MemoryJobStore {
    fn save(&self, job: &Job) {
        self.jobs.write().insert(job.id, job.clone());
        self.publish(job);
    }

    fn get(&self, id: &JobId) -> Option<Job> {
        self.jobs.read().get(id).cloned()
    }

    fn update(
        &self,
        id: &JobId,
        change: &mut dyn FnMut(&mut Job) -> Result<(), JobError>,
    ) -> Result<Job, JobError> {
        let updated = {
            let mut jobs = self.jobs.write();
            let stored = jobs.get_mut(id).ok_or(JobError::NotFound(*id))?;
            let mut draft = stored.clone();
            change(&mut draft)?;
            *stored = draft.clone();
            draft
        };
        self.publish(&updated);
        Ok(updated)
    }

    fn subscribe(&self, fingerprint: &Fingerprint) -> broadcast::Receiver<JobDescriptor> {
        self.channels
            .entry(fingerprint.clone())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    fn evict(&self, predicate: &dyn Fn(&Job) -> bool) -> Vec<Job> {
        let evicted: Vec<Job> = {
            let mut jobs = self.jobs.write();
            let ids: Vec<JobId> = jobs
                .values()
                .filter(|job| predicate(job))
                .map(|job| job.id)
                .collect();
            ids.iter().filter_map(|id| jobs.remove(id)).collect()
        };

        self.channels
            .retain(|_, sender| sender.receiver_count() > 0);
        evicted
    }

    fn len(&self) -> usize {
        self.jobs.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn job(text: &str) -> Job {
        Job::new(JobId::new(), Fingerprint::new(1, text), text.into(), Utc::now())
    }

    #[test]
    fn test_save_and_get() {
        let store = MemoryJobStore::new();
        let job = job("select 1");
        store.save(&job);
        assert_eq!(store.get(&job.id).unwrap().id, job.id);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_failed_update_writes_nothing() {
        let store = MemoryJobStore::new();
        let job = job("select 1");
        store.save(&job);

        let err = store
            .update(&job.id, &mut |j| j.finish(1, Utc::now()))
            .unwrap_err();
        assert!(matches!(err, JobError::IllegalTransition { .. }));
        assert!(store.get(&job.id).unwrap().result_id.is_none());
    }

    #[test]
    fn test_update_missing_job() {
        let store = MemoryJobStore::new();
        let id = JobId::new();
        assert_eq!(
            store.update(&id, &mut |j| j.start(Utc::now())).unwrap_err(),
            JobError::NotFound(id)
        );
    }

    #[test]
    fn test_subscribers_see_updates() {
        let store = MemoryJobStore::new();
        let job = job("select 1");
        let mut rx = store.subscribe(&job.fingerprint);

        store.save(&job);
        store.update(&job.id, &mut |j| j.start(Utc::now())).unwrap();

        assert_eq!(rx.try_recv().unwrap().status, 1);
        assert_eq!(rx.try_recv().unwrap().status, 2);
    }

    #[test]
    fn test_evict_by_predicate() {
        let store = MemoryJobStore::new();
        let keep = job("select 1");
        let mut drop = job("select 2");
        drop.cancel(Utc::now()).unwrap();
        store.save(&keep);
        store.save(&drop);

        let evicted = store.evict(&|j| j.state.is_terminal());
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].id, drop.id);
        assert!(store.get(&keep.id).is_some());
        assert!(store.get(&drop.id).is_none());
    }
}
