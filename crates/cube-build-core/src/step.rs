//! The save-statistics build step.
//!
//! [`SaveStatisticsStep`] runs once per scheduling:
//!
//! 1. resolve the target segment from the catalog;
//! 2. ingest the transient statistics artifact into the metadata store;
//! 3. select the cubing algorithm from the ingested statistics;
//! 4. record the decision on the parent cubing job.
//!
//! Every collaborator comes from the [`ExecutableContext`]; the step keeps
//! no global state. Failures end the step in [`StepState::Error`] with a
//! message and a [`RetryClass`] for the orchestrator.

use std::{
    fmt,
    path::PathBuf,
    sync::{Arc, Mutex, PoisonError},
};

use log::{error, info};
use rand::{SeedableRng, rngs::StdRng};
use snafu::prelude::*;

use crate::{
    algorithm::{CubingAlgorithm, SelectError, Selection},
    config::BuildConfig,
    ingest::{IngestError, StatisticsIngestor, TransientStorage},
    job::{JobStore, JobStoreError},
    layout::{statistics_resource_path, transient_artifact_path},
    metadata::{CubeCatalog, catalog::ResolveError},
    resource_store::{ResourceStore, StoreError},
    stats::EncodedStats,
};

/// Whether a failed step may be rescheduled as is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryClass {
    /// Nothing durable changed; rerunning the step is safe.
    Retryable,
    /// Needs operator attention, or the transient input is already consumed.
    NonRetryable,
}

/// Lifecycle of a step.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StepState {
    /// Scheduled, not yet run.
    #[default]
    Pending,
    /// Currently executing.
    Running,
    /// Finished successfully.
    Succeeded,
    /// Finished with an error.
    Error,
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StepState::Pending => "PENDING",
            StepState::Running => "RUNNING",
            StepState::Succeeded => "SUCCEEDED",
            StepState::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// Errors that end a step in [`StepState::Error`].
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StepError {
    /// Unknown cube or segment.
    #[snafu(display("{source}"))]
    Integrity {
        /// Resolution failure.
        source: ResolveError,
    },

    /// Cube or segment id cannot form a statistics key.
    #[snafu(display("Cannot derive statistics key: {source}"))]
    InvalidKey {
        /// Key validation error.
        #[snafu(backtrace)]
        source: StoreError,
    },

    /// Statistics ingestion failed.
    #[snafu(display("{source}"))]
    Ingest {
        /// Ingestion failure.
        #[snafu(backtrace)]
        source: IngestError,
    },

    /// Algorithm selection failed.
    #[snafu(display("{source}"))]
    Select {
        /// Selection failure.
        source: SelectError,
    },

    /// The decision could not be written to the job.
    #[snafu(display("Cannot record cube algorithm on job {job_id}: {source}"))]
    RecordDecision {
        /// Cubing job id.
        job_id: String,
        /// Job store failure.
        source: JobStoreError,
    },

    /// The step has already run.
    #[snafu(display("Step already executed (state {state})"))]
    AlreadyExecuted {
        /// State found at the second call.
        state: StepState,
    },
}

impl StepError {
    /// Retry classification for the orchestrator.
    ///
    /// Ingestion failures keep the transient artifact, so they are retryable.
    /// Anything after a successful ingest is not: the artifact is gone.
    pub fn retry_class(&self) -> RetryClass {
        match self {
            StepError::Ingest { .. } => RetryClass::Retryable,
            StepError::Integrity { .. }
            | StepError::InvalidKey { .. }
            | StepError::Select { .. }
            | StepError::RecordDecision { .. }
            | StepError::AlreadyExecuted { .. } => RetryClass::NonRetryable,
        }
    }
}

/// Terminal result reported to the orchestrator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExecuteResult {
    /// The step succeeded.
    Succeed {
        /// Short message.
        output: String,
        /// Decision recorded on the job.
        algorithm: CubingAlgorithm,
    },
    /// The step failed.
    Error {
        /// Message of the triggering failure.
        output: String,
        /// Whether the orchestrator may retry.
        retry: RetryClass,
    },
}

impl ExecuteResult {
    /// Whether this is [`ExecuteResult::Succeed`].
    pub fn is_succeed(&self) -> bool {
        matches!(self, ExecuteResult::Succeed { .. })
    }

    /// The attached message.
    pub fn output(&self) -> &str {
        match self {
            ExecuteResult::Succeed { output, .. } | ExecuteResult::Error { output, .. } => output,
        }
    }
}

/// Parameters of a save-statistics step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StepParams {
    /// Target cube.
    pub cube_name: String,
    /// Target segment uuid.
    pub segment_id: String,
    /// Transient directory holding `cuboid_statistics.json`.
    pub statistics_path: PathBuf,
    /// Parent cubing job that receives the decision.
    pub cubing_job_id: String,
}

/// Collaborators handed to a step at execution time.
#[derive(Debug)]
pub struct ExecutableContext {
    catalog: Arc<dyn CubeCatalog>,
    resource_store: Arc<dyn ResourceStore>,
    transient: Arc<dyn TransientStorage>,
    jobs: Arc<dyn JobStore>,
    config: BuildConfig,
    rng: Mutex<StdRng>,
}

impl ExecutableContext {
    /// Assemble a context. The testing-mode RNG is seeded from
    /// `cube.random_seed` when set, from entropy otherwise.
    pub fn new(
        catalog: Arc<dyn CubeCatalog>,
        resource_store: Arc<dyn ResourceStore>,
        transient: Arc<dyn TransientStorage>,
        jobs: Arc<dyn JobStore>,
        config: BuildConfig,
    ) -> Self {
        let rng = match config.cube.random_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            catalog,
            resource_store,
            transient,
            jobs,
            config,
            rng: Mutex::new(rng),
        }
    }

    /// Replace the randomness source.
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = Mutex::new(rng);
        self
    }
}

/// Ingests segment statistics and decides the cubing algorithm.
#[derive(Debug)]
pub struct SaveStatisticsStep {
    params: StepParams,
    state: StepState,
}

impl SaveStatisticsStep {
    /// A pending step for `params`.
    pub fn new(params: StepParams) -> Self {
        Self {
            params,
            state: StepState::Pending,
        }
    }

    /// Current state.
    pub fn state(&self) -> StepState {
        self.state
    }

    /// Run the step. A second call returns an error without touching any
    /// collaborator.
    pub async fn execute(&mut self, ctx: &ExecutableContext) -> ExecuteResult {
        if self.state != StepState::Pending {
            let err = AlreadyExecutedSnafu { state: self.state }.build();
            return ExecuteResult::Error {
                output: err.to_string(),
                retry: err.retry_class(),
            };
        }

        self.state = StepState::Running;
        match self.run(ctx).await {
            Ok(selection) => {
                self.state = StepState::Succeeded;
                ExecuteResult::Succeed {
                    output: "succeed".to_string(),
                    algorithm: selection.algorithm,
                }
            }
            Err(e) => {
                error!(
                    "fail to save cuboid statistics for cube {} segment {}: {e}",
                    self.params.cube_name, self.params.segment_id
                );
                self.state = StepState::Error;
                ExecuteResult::Error {
                    output: e.to_string(),
                    retry: e.retry_class(),
                }
            }
        }
    }

    async fn run(&self, ctx: &ExecutableContext) -> Result<Selection, StepError> {
        let params = &self.params;

        let segment = ctx
            .catalog
            .resolve_segment(&params.cube_name, &params.segment_id)
            .context(IntegritySnafu)?;
        let key =
            statistics_resource_path(segment.cube_name(), segment.id()).context(InvalidKeySnafu)?;
        let artifact = transient_artifact_path(&params.statistics_path);

        let report = StatisticsIngestor::new(ctx.transient.as_ref())
            .ingest(&artifact, &key, ctx.resource_store.as_ref())
            .await
            .context(IngestSnafu)?;

        let cost = EncodedStats::new(report.content);
        let selector = ctx.config.cube.selector();
        let selection = {
            let mut rng = ctx.rng.lock().unwrap_or_else(PoisonError::into_inner);
            selector.select(&segment, &cost, &mut *rng)
        }
        .context(SelectSnafu)?;

        ctx.jobs
            .set_algorithm(&params.cubing_job_id, selection.algorithm)
            .await
            .context(RecordDecisionSnafu {
                job_id: params.cubing_job_id.as_str(),
            })?;
        info!(
            "recorded cube algorithm {} for {segment} on job {}",
            selection.algorithm, params.cubing_job_id
        );

        Ok(selection)
    }
}
