//! Orchestrator: the public entry point for imports.
//!
//! Per record the pipeline moves `fetching → converting → integrating` and
//! ends in exactly one [`ImportOutcome`]. Batch and range runs drive records
//! through a bounded pool of in-flight futures and stop enqueuing when the
//! cancellation token fires; in-flight records always finish.

use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use kiln_catalog::Collector;
use kiln_core::{EntityType, ImportOutcome, ImportReport, NormalizedEntity, SkipReason};
use kiln_db::ImportStore;
use kiln_formula::{Evaluator, RuleStore};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::converter::Converter;
use crate::error::ImportError;
use crate::integrator::Integrator;
use crate::triage::{PeekTriage, RecordingTriage};

/// Progress hooks for batch and range runs. Both default to no-ops.
pub trait ImportObserver: Send + Sync {
    fn record_started(&self, _external_id: u64) {}
    fn record_finished(&self, _external_id: u64, _outcome: &ImportOutcome) {}
}

impl ImportObserver for () {}

pub struct Orchestrator {
    collector: Collector,
    converter: Converter,
    integrator: Integrator,
    store: Arc<ImportStore>,
    recording: RecordingTriage,
    peek: PeekTriage,
    concurrency: usize,
}

impl Orchestrator {
    /// Wire the pipeline. `concurrency` is clamped to at least one.
    #[must_use]
    pub fn new(
        collector: Collector,
        rules: Arc<RuleStore>,
        evaluator: Evaluator,
        store: Arc<ImportStore>,
        concurrency: usize,
    ) -> Self {
        Self {
            collector,
            converter: Converter::new(Arc::clone(&rules), evaluator),
            integrator: Integrator::new(Arc::clone(&store), rules),
            recording: RecordingTriage::new(Arc::clone(&store)),
            peek: PeekTriage::new(Arc::clone(&store)),
            store,
            concurrency: concurrency.max(1),
        }
    }

    #[must_use]
    pub const fn collector(&self) -> &Collector {
        &self.collector
    }

    #[must_use]
    pub const fn store(&self) -> &Arc<ImportStore> {
        &self.store
    }

    #[must_use]
    pub const fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Full pipeline for one id. Errors become `skipped` or `failed`
    /// outcomes, never panics or early returns.
    #[tracing::instrument(skip(self))]
    pub async fn import_one(&self, entity_type: EntityType, external_id: u64) -> ImportOutcome {
        match self.run(entity_type, external_id).await {
            Ok(outcome) => {
                tracing::debug!(outcome = outcome.label(), "record imported");
                outcome
            }
            Err(err) => {
                let outcome = err.into_outcome();
                match &outcome {
                    ImportOutcome::Failed { kind, message } => {
                        tracing::warn!(%kind, %message, "record failed");
                    }
                    ImportOutcome::Skipped { reason } => {
                        tracing::info!(%reason, "record skipped");
                    }
                    _ => {}
                }
                outcome
            }
        }
    }

    async fn run(
        &self,
        entity_type: EntityType,
        external_id: u64,
    ) -> Result<ImportOutcome, ImportError> {
        let record = self
            .collector
            .fetch(entity_type, external_id)
            .instrument(tracing::debug_span!("fetching"))
            .await?;
        let entity = self
            .converter
            .convert(&record, &self.recording)
            .instrument(tracing::debug_span!("converting"))
            .await?;
        self.integrator
            .integrate(&entity)
            .instrument(tracing::debug_span!("integrating"))
            .await
    }

    /// Import every id. One record's failure never stops the others.
    pub async fn import_batch(
        &self,
        entity_type: EntityType,
        external_ids: &[u64],
        cancel: &CancellationToken,
    ) -> ImportReport {
        self.import_ids(entity_type, external_ids.iter().copied(), cancel, &())
            .await
    }

    /// [`Self::import_batch`] with progress hooks.
    pub async fn import_batch_with(
        &self,
        entity_type: EntityType,
        external_ids: &[u64],
        cancel: &CancellationToken,
        observer: &dyn ImportObserver,
    ) -> ImportReport {
        self.import_ids(entity_type, external_ids.iter().copied(), cancel, observer)
            .await
    }

    /// Import a contiguous id range. Ids missing upstream are skipped.
    pub async fn import_range(
        &self,
        entity_type: EntityType,
        ids: RangeInclusive<u64>,
        cancel: &CancellationToken,
    ) -> ImportReport {
        self.import_ids(entity_type, ids, cancel, &()).await
    }

    /// [`Self::import_range`] with progress hooks.
    pub async fn import_range_with(
        &self,
        entity_type: EntityType,
        ids: RangeInclusive<u64>,
        cancel: &CancellationToken,
        observer: &dyn ImportObserver,
    ) -> ImportReport {
        self.import_ids(entity_type, ids, cancel, observer).await
    }

    /// Bounded worker loop. Ids are pulled lazily, so at most
    /// `concurrency` records are in flight and only out-of-order results
    /// wait in memory. The report lists every id in request order; ids never
    /// enqueued because of cancellation are `skipped(cancelled)`.
    async fn import_ids(
        &self,
        entity_type: EntityType,
        ids: impl IntoIterator<Item = u64>,
        cancel: &CancellationToken,
        observer: &dyn ImportObserver,
    ) -> ImportReport {
        let mut report = ImportReport::new(entity_type);
        let mut pending = ids.into_iter().enumerate();
        let mut in_flight = FuturesUnordered::new();
        let mut finished: BTreeMap<usize, (u64, ImportOutcome)> = BTreeMap::new();
        let mut next_index = 0;

        loop {
            while in_flight.len() < self.concurrency && !cancel.is_cancelled() {
                let Some((index, external_id)) = pending.next() else {
                    break;
                };
                observer.record_started(external_id);
                in_flight.push(async move {
                    let outcome = self.import_one(entity_type, external_id).await;
                    (index, external_id, outcome)
                });
            }
            let Some((index, external_id, outcome)) = in_flight.next().await else {
                break;
            };
            observer.record_finished(external_id, &outcome);
            finished.insert(index, (external_id, outcome));
            while let Some((external_id, outcome)) = finished.remove(&next_index) {
                report.push(external_id, outcome);
                next_index += 1;
            }
        }

        let mut not_started = 0_usize;
        for (_, external_id) in pending {
            report.push(external_id, ImportOutcome::skipped(SkipReason::Cancelled));
            not_started += 1;
        }
        if not_started > 0 {
            tracing::info!(%entity_type, not_started, "run cancelled");
        }
        tracing::info!(
            %entity_type,
            created = report.counts.created,
            updated = report.counts.updated,
            skipped = report.counts.skipped,
            failed = report.counts.failed,
            "import run finished"
        );
        report
    }

    /// Fetch and convert without writing anything. Triage decisions are
    /// read, never recorded.
    ///
    /// # Errors
    ///
    /// [`ImportError::Fetch`] or [`ImportError::Convert`], including a
    /// blocked category.
    #[tracing::instrument(skip(self))]
    pub async fn preview(
        &self,
        entity_type: EntityType,
        external_id: u64,
    ) -> Result<NormalizedEntity, ImportError> {
        let record = self.collector.fetch(entity_type, external_id).await?;
        Ok(self.converter.convert(&record, &self.peek).await?)
    }
}
