// Progress store - single source of truth for job state
//
// Each record lives in one DashMap shard; `update` merges under the shard's
// write lock, so a concurrent `get` sees either the old or the merged record.

use dashmap::DashMap;
use tracing::debug;

use super::errors::DownloadError;
use super::models::{Job, JobId, JobPatch};

#[derive(Debug, Default)]
pub struct ProgressStore {
    jobs: DashMap<JobId, Job>,
}

impl ProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record. An existing record for the same id is left untouched.
    pub fn create(&self, id: JobId, initial: Job) {
        self.jobs.entry(id).or_insert(initial);
    }

    pub fn get(&self, id: &JobId) -> Result<Job, DownloadError> {
        self.jobs
            .get(id)
            .map(|job| job.value().clone())
            .ok_or_else(|| DownloadError::NotFound(id.to_string()))
    }

    pub fn update(&self, id: &JobId, patch: JobPatch) -> Result<(), DownloadError> {
        let mut job = self
            .jobs
            .get_mut(id)
            .ok_or_else(|| DownloadError::NotFound(id.to_string()))?;

        if !job.apply(patch) {
            debug!(job_id = %id, status = %job.status, "dropped update for terminal job");
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::models::JobStatus;
    use std::sync::Arc;

    #[test]
    fn unknown_id_is_not_found() {
        let store = ProgressStore::new();
        let id = JobId::new();

        assert!(matches!(store.get(&id), Err(DownloadError::NotFound(_))));
        assert!(matches!(
            store.update(&id, JobPatch::new().percent(5)),
            Err(DownloadError::NotFound(_))
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn update_merges_fields() {
        let store = ProgressStore::new();
        let id = JobId::new();
        store.create(id, Job::starting("Attempt 1/3..."));

        store
            .update(
                &id,
                JobPatch::new()
                    .status(JobStatus::Downloading)
                    .percent(12)
                    .speed("2.0 MiB/s"),
            )
            .unwrap();

        let job = store.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Downloading);
        assert_eq!(job.percent, 12);
        assert_eq!(job.speed, "2.0 MiB/s");
        assert_eq!(job.title, "Attempt 1/3...");
    }

    #[test]
    fn create_does_not_overwrite() {
        let store = ProgressStore::new();
        let id = JobId::new();
        store.create(id, Job::starting("first"));
        store.create(id, Job::starting("second"));
        assert_eq!(store.get(&id).unwrap().title, "first");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn concurrent_writers_never_mix_records() {
        let store = Arc::new(ProgressStore::new());
        let ids: Vec<JobId> = (0..16).map(|_| JobId::new()).collect();
        for id in &ids {
            store.create(*id, Job::starting(id.to_string()));
        }

        let handles: Vec<_> = ids
            .iter()
            .copied()
            .map(|id| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for p in 0..=100u8 {
                        store
                            .update(
                                &id,
                                JobPatch::new()
                                    .status(JobStatus::Downloading)
                                    .percent(p)
                                    .speed(format!("{}", id)),
                            )
                            .unwrap();
                        let seen = store.get(&id).unwrap();
                        // title and speed are both written with this job's id only
                        assert_eq!(seen.title, id.to_string());
                        assert_eq!(seen.speed, id.to_string());
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        for id in &ids {
            assert_eq!(store.get(id).unwrap().percent, 100);
        }
    }
}
