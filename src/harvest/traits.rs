//! Core traits and types for source collection.
//!
//! This module defines the seam between the job orchestrator and the
//! individual sources it harvests from:
//! - Source adapters via [`SourceCollector`]
//! - The lazy candidate sequence each adapter produces ([`CandidateStream`])
//! - The terminal error a sequence may end with ([`CollectError`])

use futures::Stream;
use std::pin::Pin;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::model::{CandidateOrganization, SearchCriteria, SourceId};
use crate::traits::{FetchError, ParseError};

// ============================================================================
// Collector Trait
// ============================================================================

/// Lazy, finite, non-restartable sequence of candidates from one source.
///
/// An `Err` item is always the last item: the source stopped early and
/// everything yielded before it remains valid.
pub type CandidateStream<'a> =
    Pin<Box<dyn Stream<Item = Result<CandidateOrganization, CollectError>> + Send + 'a>>;

/// Adapter turning a search criterion into candidates from one external source.
///
/// Each implementation owns its request pacing. On a fetch failure or a
/// rate-limit signal it ends its stream instead of retrying, so a failing
/// source never stalls or invalidates its siblings.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; the orchestrator runs every
/// collector on its own task.
pub trait SourceCollector: Send + Sync {
    /// Identifier tracked in the job's remaining-collector set.
    fn source_id(&self) -> SourceId;

    /// Whether the orchestrator should rotate network identity before
    /// starting this source.
    fn high_volume(&self) -> bool {
        false
    }

    /// Starts collecting. Candidates are yielded as soon as they are parsed,
    /// not buffered until the source is exhausted.
    ///
    /// `cancel` is threaded into every outbound request.
    fn collect<'a>(
        &'a self,
        criteria: &'a SearchCriteria,
        cancel: CancellationToken,
    ) -> CandidateStream<'a>;
}

// ============================================================================
// Error Types
// ============================================================================

/// Reason a candidate stream ended early.
#[derive(Error, Debug)]
pub enum CollectError {
    /// A request failed (timeout, network, non-2xx, rate limit)
    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),

    /// A whole response was unusable
    #[error("Unparseable response: {0}")]
    Parse(#[from] ParseError),
}

impl CollectError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, CollectError::Fetch(e) if e.is_rate_limited())
    }
}
