//! Harvest job orchestration.
//!
//! This module provides the [`JobOrchestrator`] that owns the lifecycle of
//! one harvest job at a time:
//! - One tokio task per [`SourceCollector`], all writing into the shared
//!   [`EntityStore`]
//! - Enrichment of newly-created organizations via [`EnrichmentExecutor`]
//! - A [`JobStatus`] snapshot published through a `watch` channel, so status
//!   reads never wait on collector progress
//! - A per-job `CancellationToken` threaded into every outbound request

use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::domain::normalize_domain;
use crate::executor::EnrichmentExecutor;
use crate::harvest::traits::SourceCollector;
use crate::model::{OrganizationId, SearchCriteria, SourceId};
use crate::store::{EntityStore, StoreError};
use crate::traits::IdentityRotator;

// ============================================================================
// Status Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPhase {
    Idle,
    Running,
    Completed,
    Failed,
}

impl JobPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobPhase::Completed | JobPhase::Failed)
    }
}

/// Monotonic counters for the current job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobProgress {
    /// Candidates received from all collectors
    pub candidates_seen: u64,

    /// Candidates that created a new organization
    pub organizations_created: u64,

    /// Candidates dropped at the store boundary
    pub candidates_rejected: u64,

    /// Enrichments that finished and were persisted
    pub enrichments_completed: u64,
}

/// A source whose stream ended early.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceFailure {
    pub source: SourceId,
    pub error: String,
}

/// Point-in-time snapshot of the orchestrator's job state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobStatus {
    pub job_id: Option<u64>,
    pub phase: JobPhase,
    pub criteria: Option<SearchCriteria>,
    pub collectors_remaining: BTreeSet<SourceId>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub progress: JobProgress,
    pub failed_sources: Vec<SourceFailure>,
    /// Why the job could not start (`Failed` only)
    pub error: Option<String>,
}

impl JobStatus {
    pub fn idle() -> Self {
        Self {
            job_id: None,
            phase: JobPhase::Idle,
            criteria: None,
            collectors_remaining: BTreeSet::new(),
            started_at: None,
            finished_at: None,
            progress: JobProgress::default(),
            failed_sources: Vec::new(),
            error: None,
        }
    }
}

// ============================================================================
// Orchestrator Errors
// ============================================================================

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum OrchestratorError {
    /// A job is already running; the new request was not queued
    #[error("a harvest job is already running")]
    JobAlreadyRunning,

    /// The job could not start any collector
    #[error("invalid criteria: {0}")]
    InvalidCriteria(String),
}

// ============================================================================
// Job Handle
// ============================================================================

/// Handle to an accepted job.
#[derive(Debug, Clone)]
pub struct JobHandle {
    pub job_id: u64,
    pub criteria: SearchCriteria,
    pub started_at: DateTime<Utc>,
    status: watch::Receiver<JobStatus>,
}

impl JobHandle {
    /// Waits until this job reaches a terminal phase and returns that snapshot.
    pub async fn wait(mut self) -> JobStatus {
        loop {
            {
                let status = self.status.borrow_and_update();
                let replaced = status.job_id != Some(self.job_id);
                if replaced || status.phase.is_terminal() {
                    return status.clone();
                }
            }
            if self.status.changed().await.is_err() {
                return self.status.borrow().clone();
            }
        }
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

/// What a running job's tasks share.
#[derive(Clone)]
struct JobContext {
    job_id: u64,
    store: Arc<dyn EntityStore>,
    enrichment: Option<Arc<EnrichmentExecutor>>,
    rotator: Option<Arc<dyn IdentityRotator>>,
    status: Arc<watch::Sender<JobStatus>>,
}

impl JobContext {
    /// Applies `f` to the status if it still belongs to this job.
    fn update(&self, f: impl FnOnce(&mut JobStatus)) {
        self.status.send_if_modified(|status| {
            if status.job_id != Some(self.job_id) {
                return false;
            }
            f(status);
            true
        });
    }

    fn finish_collector(&self, source: SourceId, failure: Option<String>) {
        self.update(|status| {
            status.collectors_remaining.remove(&source);
            if let Some(error) = failure {
                status.failed_sources.push(SourceFailure { source, error });
            }
        });
    }
}

/// Runs harvest jobs; at most one is `Running` at a time.
///
/// Dropping the orchestrator cancels any in-flight job's requests.
///
/// # Example
///
/// ```ignore
/// let orchestrator = JobOrchestrator::new(store, default_collectors(fetcher, browser, &config))
///     .with_enrichment(Arc::new(executor));
///
/// let handle = orchestrator.submit(SearchCriteria::new("berlin"))?;
/// let finished = handle.wait().await;
/// println!("{} organizations", finished.progress.organizations_created);
/// ```
pub struct JobOrchestrator {
    store: Arc<dyn EntityStore>,
    collectors: Vec<Arc<dyn SourceCollector>>,
    enrichment: Option<Arc<EnrichmentExecutor>>,
    rotator: Option<Arc<dyn IdentityRotator>>,
    status: Arc<watch::Sender<JobStatus>>,
    next_job_id: AtomicU64,
    shutdown: CancellationToken,
}

impl JobOrchestrator {
    pub fn new(store: Arc<dyn EntityStore>, collectors: Vec<Arc<dyn SourceCollector>>) -> Self {
        let (status, _) = watch::channel(JobStatus::idle());
        Self {
            store,
            collectors,
            enrichment: None,
            rotator: None,
            status: Arc::new(status),
            next_job_id: AtomicU64::new(1),
            shutdown: CancellationToken::new(),
        }
    }

    /// Enables enrichment of newly-created organizations.
    pub fn with_enrichment(mut self, executor: Arc<EnrichmentExecutor>) -> Self {
        self.enrichment = Some(executor);
        self
    }

    /// Rotates network identity before each high-volume collector starts.
    pub fn with_identity_rotator(mut self, rotator: Arc<dyn IdentityRotator>) -> Self {
        self.rotator = Some(rotator);
        self
    }

    pub fn store(&self) -> Arc<dyn EntityStore> {
        self.store.clone()
    }

    /// Current snapshot. Never waits on collector progress.
    pub fn status(&self) -> JobStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<JobStatus> {
        self.status.subscribe()
    }

    /// Accepts a harvest request and starts every collector.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`OrchestratorError::JobAlreadyRunning`] while a job is `Running`;
    ///   the current status is left untouched.
    /// - [`OrchestratorError::InvalidCriteria`] when the location is blank or
    ///   no collector is configured; the status moves to `Failed`.
    pub fn submit(&self, criteria: SearchCriteria) -> Result<JobHandle, OrchestratorError> {
        let criteria = SearchCriteria {
            location: criteria.location.trim().to_string(),
            role_filter: criteria.role().map(str::to_string),
        };
        let invalid = if criteria.location.is_empty() {
            Some("Location is required".to_string())
        } else if self.collectors.is_empty() {
            Some("no source collectors configured".to_string())
        } else {
            None
        };

        let job_id = self.next_job_id.fetch_add(1, Ordering::SeqCst);
        let started_at = Utc::now();
        let mut outcome = Ok(());

        // Check-and-transition happens inside one send, so two concurrent
        // submissions cannot both observe a non-running phase.
        self.status.send_if_modified(|status| {
            if status.phase == JobPhase::Running {
                outcome = Err(OrchestratorError::JobAlreadyRunning);
                return false;
            }

            let mut next = JobStatus::idle();
            next.job_id = Some(job_id);
            next.criteria = Some(criteria.clone());
            next.started_at = Some(started_at);

            match &invalid {
                Some(reason) => {
                    next.phase = JobPhase::Failed;
                    next.finished_at = Some(started_at);
                    next.error = Some(reason.clone());
                    outcome = Err(OrchestratorError::InvalidCriteria(reason.clone()));
                }
                None => {
                    next.phase = JobPhase::Running;
                    next.collectors_remaining =
                        self.collectors.iter().map(|c| c.source_id()).collect();
                }
            }

            *status = next;
            true
        });

        if let Err(e) = outcome {
            warn!(job_id, error = %e, "Harvest request rejected");
            return Err(e);
        }

        info!(
            job_id,
            location = %criteria.location,
            role = ?criteria.role_filter,
            collectors = self.collectors.len(),
            "Starting harvest job"
        );

        let handle = JobHandle {
            job_id,
            criteria: criteria.clone(),
            started_at,
            status: self.status.subscribe(),
        };

        let context = JobContext {
            job_id,
            store: self.store.clone(),
            enrichment: self.enrichment.clone(),
            rotator: self.rotator.clone(),
            status: self.status.clone(),
        };
        tokio::spawn(drive_job(
            context,
            self.collectors.clone(),
            Arc::new(criteria),
            self.shutdown.child_token(),
        ));

        Ok(handle)
    }
}

impl Drop for JobOrchestrator {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

// ============================================================================
// Job Tasks
// ============================================================================

async fn drive_job(
    context: JobContext,
    collectors: Vec<Arc<dyn SourceCollector>>,
    criteria: Arc<SearchCriteria>,
    cancel: CancellationToken,
) {
    // Enrichment handles live outside the collector tasks so a crashed
    // collector cannot orphan the enrichments it already started.
    let (enrichment_tx, mut enrichment_rx) = mpsc::unbounded_channel();

    let collector_tasks: Vec<(SourceId, JoinHandle<()>)> = collectors
        .into_iter()
        .map(|collector| {
            let source = collector.source_id();
            let task = tokio::spawn(run_collector(
                context.clone(),
                collector,
                criteria.clone(),
                enrichment_tx.clone(),
                cancel.child_token(),
            ));
            (source, task)
        })
        .collect();
    drop(enrichment_tx);

    for (source, task) in collector_tasks {
        if let Err(e) = task.await {
            warn!(job_id = context.job_id, source = %source, error = %e, "Collector task aborted");
            context.finish_collector(source, Some(format!("collector task aborted: {e}")));
        }
    }

    // Ends once every collector task has dropped its sender.
    while let Some(enrichment) = enrichment_rx.recv().await {
        if let Err(e) = enrichment.await {
            warn!(job_id = context.job_id, error = %e, "Enrichment task aborted");
        }
    }

    let finished_at = Utc::now();
    context.update(|status| {
        status.phase = JobPhase::Completed;
        status.finished_at = Some(finished_at);
    });

    let status = context.status.borrow().clone();
    info!(
        job_id = context.job_id,
        candidates = status.progress.candidates_seen,
        created = status.progress.organizations_created,
        failed_sources = status.failed_sources.len(),
        "Harvest job completed"
    );
}

/// Drains one collector into the store. Every enrichment it schedules is
/// handed to `enrichments` so the job can await it before completing.
#[instrument(skip_all, fields(job_id = context.job_id, source = %collector.source_id()))]
async fn run_collector(
    context: JobContext,
    collector: Arc<dyn SourceCollector>,
    criteria: Arc<SearchCriteria>,
    enrichments: mpsc::UnboundedSender<JoinHandle<()>>,
    cancel: CancellationToken,
) {
    let source = collector.source_id();

    if collector.high_volume() {
        if let Some(rotator) = &context.rotator {
            tokio::select! {
                result = rotator.rotate() => {
                    if let Err(e) = result {
                        warn!(error = %e, "Identity rotation failed; continuing with current identity");
                    }
                }
                _ = cancel.cancelled() => {
                    info!("Job cancelled during identity rotation");
                    context.finish_collector(source, Some("cancelled during identity rotation".to_string()));
                    return;
                }
            }
        }
    }

    let mut failure = None;
    let mut stream = collector.collect(&criteria, cancel.clone());

    while let Some(item) = stream.next().await {
        let candidate = match item {
            Ok(candidate) => candidate,
            Err(e) => {
                info!(error = %e, "Source stopped early");
                failure = Some(e.to_string());
                break;
            }
        };

        context.update(|s| s.progress.candidates_seen += 1);

        match context.store.upsert_organization(&candidate).await {
            Ok(outcome) if outcome.was_new => {
                context.update(|s| s.progress.organizations_created += 1);
                debug!(id = outcome.id, domain = %candidate.domain, "Created organization");

                if let (Some(executor), Ok(domain)) =
                    (&context.enrichment, normalize_domain(&candidate.domain))
                {
                    let handle = spawn_enrichment(
                        context.clone(),
                        executor.clone(),
                        outcome.id,
                        domain,
                        cancel.child_token(),
                    );
                    if enrichments.send(handle).is_err() {
                        warn!("Job driver gone; enrichment left unsupervised");
                    }
                }
            }
            Ok(_) => {}
            Err(StoreError::InvalidDomain(raw)) => {
                context.update(|s| s.progress.candidates_rejected += 1);
                debug!(domain = %raw, "Dropped candidate with invalid domain");
            }
            Err(e) => {
                context.update(|s| s.progress.candidates_rejected += 1);
                warn!(domain = %candidate.domain, error = %e, "Failed to store candidate");
            }
        }
    }
    drop(stream);

    context.finish_collector(source, failure);
    debug!("Collector finished");
}

fn spawn_enrichment(
    context: JobContext,
    executor: Arc<EnrichmentExecutor>,
    organization_id: OrganizationId,
    domain: String,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        match executor.execute(organization_id, domain.clone(), cancel).await {
            Ok(_) => context.update(|s| s.progress.enrichments_completed += 1),
            Err(e) => warn!(domain = %domain, error = %e, "Enrichment failed"),
        }
    })
}

// ============================================================================
// Tests
// ============================================================================
