//! Parent job state shared between the steps of one cubing job.
//!
//! The only piece of job state this crate writes is the chosen
//! [`CubingAlgorithm`]; later build steps read it back through the same
//! [`JobStore`].

use std::{collections::HashMap, fmt, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use tokio::sync::Mutex;

use crate::{
    algorithm::CubingAlgorithm,
    layout::job_record_path,
    resource_store::{ResourceStore, StoreError},
};

/// Errors raised by a [`JobStore`].
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum JobStoreError {
    /// The job id does not map to a valid record key.
    #[snafu(display("Invalid job id {job_id:?}: {source}"))]
    InvalidJobId {
        /// Offending job id.
        job_id: String,
        /// Key validation error.
        source: StoreError,
    },

    /// Reading or writing the job record failed.
    #[snafu(display("Job store error for job {job_id}: {source}"))]
    JobStorage {
        /// Job being accessed.
        job_id: String,
        /// Underlying store error.
        #[snafu(backtrace)]
        source: StoreError,
    },

    /// The stored record is not valid JSON.
    #[snafu(display("Corrupt record for job {job_id}: {source}"))]
    CorruptJobRecord {
        /// Job being accessed.
        job_id: String,
        /// JSON error.
        source: serde_json::Error,
    },
}

/// Persisted job state.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobRecord {
    /// Cubing job id.
    pub job_id: String,
    /// Chosen algorithm, once decided.
    #[serde(default)]
    pub algorithm: Option<CubingAlgorithm>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

/// Read and write the algorithm decision attached to a cubing job.
#[async_trait]
pub trait JobStore: Send + Sync + fmt::Debug {
    /// Record `algorithm` on `job_id`, replacing any previous decision.
    async fn set_algorithm(&self, job_id: &str, algorithm: CubingAlgorithm) -> Result<(), JobStoreError>;

    /// The decision recorded on `job_id`, if any.
    async fn algorithm(&self, job_id: &str) -> Result<Option<CubingAlgorithm>, JobStoreError>;
}

fn log_overwrite(job_id: &str, previous: Option<CubingAlgorithm>, algorithm: CubingAlgorithm) {
    match previous {
        Some(prev) if prev != algorithm => {
            warn!("job {job_id} already had cube algorithm {prev}; replacing with {algorithm}");
        }
        _ => info!("set cube algorithm {algorithm} on job {job_id}"),
    }
}

/// Job store kept in process memory.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: Mutex<HashMap<String, CubingAlgorithm>>,
}

impl InMemoryJobStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn set_algorithm(&self, job_id: &str, algorithm: CubingAlgorithm) -> Result<(), JobStoreError> {
        let previous = self.jobs.lock().await.insert(job_id.to_string(), algorithm);
        log_overwrite(job_id, previous, algorithm);
        Ok(())
    }

    async fn algorithm(&self, job_id: &str) -> Result<Option<CubingAlgorithm>, JobStoreError> {
        Ok(self.jobs.lock().await.get(job_id).copied())
    }
}

/// Job store persisting [`JobRecord`]s as `execute/<job_id>.json` in a
/// [`ResourceStore`].
#[derive(Clone, Debug)]
pub struct ResourceJobStore {
    store: Arc<dyn ResourceStore>,
}

impl ResourceJobStore {
    /// Create a job store on top of `store`.
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self { store }
    }

    /// Load the full record for `job_id`.
    pub async fn record(&self, job_id: &str) -> Result<Option<JobRecord>, JobStoreError> {
        let key = job_record_path(job_id).context(InvalidJobIdSnafu { job_id })?;
        let Some(resource) = self
            .store
            .get_resource(&key)
            .await
            .context(JobStorageSnafu { job_id })?
        else {
            return Ok(None);
        };

        let record = serde_json::from_slice(&resource.content)
            .context(CorruptJobRecordSnafu { job_id })?;
        Ok(Some(record))
    }
}

#[async_trait]
impl JobStore for ResourceJobStore {
    async fn set_algorithm(&self, job_id: &str, algorithm: CubingAlgorithm) -> Result<(), JobStoreError> {
        let key = job_record_path(job_id).context(InvalidJobIdSnafu { job_id })?;
        let previous = self.record(job_id).await?.and_then(|r| r.algorithm);
        log_overwrite(job_id, previous, algorithm);

        let updated_at = Utc::now();
        let record = JobRecord {
            job_id: job_id.to_string(),
            algorithm: Some(algorithm),
            updated_at,
        };
        let json = serde_json::to_vec(&record).context(CorruptJobRecordSnafu { job_id })?;

        self.store
            .put_resource(&key, Bytes::from(json), updated_at)
            .await
            .context(JobStorageSnafu { job_id })
    }

    async fn algorithm(&self, job_id: &str) -> Result<Option<CubingAlgorithm>, JobStoreError> {
        Ok(self.record(job_id).await?.and_then(|r| r.algorithm))
    }
}
