//! Durable delay queue.
//!
//! Jobs live in memory ordered by due time and are mirrored to a JSONL
//! file; every mutation rewrites the file atomically, so a restart resumes
//! with exactly the jobs that were pending. The worker polls [`DelayQueue::
//! take_due`] on its tick.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use sentra_domain::{Error, Result};

use crate::write_atomic;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelayedJob {
    pub job_id: String,
    pub due_at_ms: i64,
    pub payload: Value,
    #[serde(default)]
    pub attempts: u32,
}

impl DelayedJob {
    pub fn new(due_at_ms: i64, payload: Value) -> Self {
        Self {
            job_id: uuid::Uuid::new_v4().to_string(),
            due_at_ms,
            payload,
            attempts: 0,
        }
    }
}

pub struct DelayQueue {
    path: PathBuf,
    jobs: Mutex<Vec<DelayedJob>>,
}

impl DelayQueue {
    /// Load pending jobs from `dir/jobs.jsonl` (created on first push).
    pub fn new(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join("jobs.jsonl");

        let mut jobs = Vec::new();
        if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            for line in raw.lines() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<DelayedJob>(line) {
                    Ok(job) => jobs.push(job),
                    Err(e) => tracing::warn!(error = %e, "skipping malformed delay-queue line"),
                }
            }
        }
        jobs.sort_by_key(|j| j.due_at_ms);

        Ok(Self { path, jobs: Mutex::new(jobs) })
    }

    pub fn push(&self, job: DelayedJob) -> Result<()> {
        let mut jobs = self.jobs.lock();
        let idx = jobs.partition_point(|j| j.due_at_ms <= job.due_at_ms);
        jobs.insert(idx, job);
        self.persist(&jobs)
    }

    /// Remove and return every job due at `now_ms`, earliest first.
    pub fn take_due(&self, now_ms: i64) -> Result<Vec<DelayedJob>> {
        let mut jobs = self.jobs.lock();
        let split = jobs.partition_point(|j| j.due_at_ms <= now_ms);
        if split == 0 {
            return Ok(Vec::new());
        }
        let due: Vec<DelayedJob> = jobs.drain(..split).collect();
        self.persist(&jobs)?;
        Ok(due)
    }

    /// Put a deferred job back with one more attempt and a new due time.
    pub fn requeue(&self, mut job: DelayedJob, due_at_ms: i64) -> Result<()> {
        job.attempts += 1;
        job.due_at_ms = due_at_ms;
        self.push(job)
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }

    fn persist(&self, jobs: &[DelayedJob]) -> Result<()> {
        let mut buf = String::new();
        for job in jobs {
            buf.push_str(&serde_json::to_string(job)?);
            buf.push('\n');
        }
        write_atomic(&self.path, &buf).map_err(Error::Io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn queue() -> (tempfile::TempDir, DelayQueue) {
        let dir = tempfile::tempdir().unwrap();
        let q = DelayQueue::new(dir.path()).unwrap();
        (dir, q)
    }

    #[test]
    fn take_due_returns_only_due_jobs_in_order() {
        let (_d, q) = queue();
        q.push(DelayedJob::new(300, json!({"n": 3}))).unwrap();
        q.push(DelayedJob::new(100, json!({"n": 1}))).unwrap();
        q.push(DelayedJob::new(200, json!({"n": 2}))).unwrap();

        let due = q.take_due(250).unwrap();
        assert_eq!(due.len(), 2);
        assert_eq!(due[0].payload["n"], 1);
        assert_eq!(due[1].payload["n"], 2);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn take_due_with_nothing_due() {
        let (_d, q) = queue();
        q.push(DelayedJob::new(1_000, json!({}))).unwrap();
        assert!(q.take_due(500).unwrap().is_empty());
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        {
            let q = DelayQueue::new(dir.path()).unwrap();
            q.push(DelayedJob::new(42, json!({"keep": true}))).unwrap();
        }
        let q2 = DelayQueue::new(dir.path()).unwrap();
        assert_eq!(q2.len(), 1);
        let due = q2.take_due(100).unwrap();
        assert_eq!(due[0].payload["keep"], true);
        assert!(q2.is_empty());
    }

    #[test]
    fn requeue_bumps_attempts() {
        let (_d, q) = queue();
        q.push(DelayedJob::new(10, json!({}))).unwrap();
        let job = q.take_due(20).unwrap().remove(0);
        assert_eq!(job.attempts, 0);

        q.requeue(job, 500).unwrap();
        let job = q.take_due(1_000).unwrap().remove(0);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.due_at_ms, 500);
    }

    #[test]
    fn equal_due_times_keep_insertion_order() {
        let (_d, q) = queue();
        let a = DelayedJob::new(100, json!({"id": "a"}));
        let b = DelayedJob::new(100, json!({"id": "b"}));
        q.push(a).unwrap();
        q.push(b).unwrap();
        let due = q.take_due(100).unwrap();
        assert_eq!(due[0].payload["id"], "a");
        assert_eq!(due[1].payload["id"], "b");
    }
}
