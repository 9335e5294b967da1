use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::analysis::AnalysisTaskRunner;
use crate::cost::{CostLedger, CostTotals};
use crate::formats::{
    ArticleConfig, CoveredPoints, GenerationContext, GenerationStatus, SectionPlan, SectionResult,
};
use crate::keywords::{FrequencyExtractor, KeywordExtractor};
use crate::llm::{LanguageModel, MeteredModel};
use crate::plan::build_section_plan;
use crate::rag::{ContextFilter, ExclusionFilter};
use crate::session::{SessionRecorder, SessionSnapshot};
use crate::writer::{LlmSectionWriter, SectionRequest, SectionWriter};

pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct GenerateOptions {
    /// Overrides `ArticleConfig::turbo_mode` when set.
    pub turbo: Option<bool>,
    /// Maximum concurrent section writes in turbo mode. `None` submits all.
    pub concurrency: Option<usize>,
    pub settle_delay: Duration,
    /// A user-edited plan that replaces the built one.
    pub plan_override: Option<SectionPlan>,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            turbo: None,
            concurrency: None,
            settle_delay: DEFAULT_SETTLE_DELAY,
            plan_override: None,
        }
    }
}

/// Progress callbacks. Every method defaults to a no-op.
pub trait GenerationObserver: Send + Sync {
    fn on_status(&self, _status: GenerationStatus) {}
    fn on_content(&self, _content: &str) {}
    fn on_section(&self, _result: &SectionResult) {}
    fn on_cost(&self, _totals: CostTotals) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl GenerationObserver for NoopObserver {}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOutcome {
    pub status: GenerationStatus,
    pub content: String,
    pub sections: Vec<SectionResult>,
    pub plan: Option<SectionPlan>,
    pub covered_points: CoveredPoints,
    pub cost: CostTotals,
    pub error: Option<String>,
    /// Style description from the visual analysis, once analysis finished.
    pub visual_style: Option<String>,
    pub stopped: bool,
}

impl From<SessionSnapshot> for GenerationOutcome {
    fn from(snapshot: SessionSnapshot) -> Self {
        Self {
            status: snapshot.status,
            content: snapshot.content,
            sections: snapshot.sections,
            plan: snapshot.plan,
            covered_points: snapshot.covered_points,
            cost: snapshot.cost,
            error: snapshot.error,
            visual_style: snapshot.visual_style,
            stopped: false,
        }
    }
}

/// Per-run mutable state. Owned by the orchestrator task; writers only ever
/// see copies.
#[derive(Debug, Default)]
struct RunState {
    status: GenerationStatus,
    plan: Option<SectionPlan>,
    slots: Vec<SectionResult>,
    pending: Vec<bool>,
    covered: CoveredPoints,
    error: Option<String>,
    visual_style: Option<String>,
}

impl RunState {
    fn open_slots(&mut self, plan: &SectionPlan) {
        self.slots = plan
            .entries
            .iter()
            .enumerate()
            .map(|(index, entry)| SectionResult {
                index,
                title: entry.title.clone(),
                ..SectionResult::default()
            })
            .collect();
        self.pending = vec![false; self.slots.len()];
        self.plan = Some(plan.clone());
    }

    fn complete(&mut self, result: SectionResult) -> Option<&SectionResult> {
        let index = result.index;
        let slot = self.slots.get_mut(index)?;
        self.covered.extend(result.used_points.iter().cloned());
        *slot = result;
        if let Some(pending) = self.pending.get_mut(index) {
            *pending = false;
        }
        Some(&self.slots[index])
    }

    /// Live view: placeholders for sections still being written.
    fn render_live(&self) -> String {
        self.slots
            .iter()
            .zip(&self.pending)
            .filter_map(|(slot, pending)| {
                if *pending {
                    Some(format!("_Writing \"{}\"..._", slot.title))
                } else {
                    (!slot.content.is_empty()).then(|| slot.content.clone())
                }
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    fn render_final(&self) -> String {
        merge_sections(&self.slots)
    }

    fn snapshot(&self, content: String, cost: CostTotals) -> SessionSnapshot {
        SessionSnapshot {
            status: self.status,
            content,
            sections: self.slots.clone(),
            plan: self.plan.clone(),
            covered_points: self.covered.clone(),
            cost,
            error: self.error.clone(),
            visual_style: self.visual_style.clone(),
            updated_at: None,
        }
    }
}

/// Runs one section write on its own task, so a panicking writer fails only
/// that section.
async fn write_isolated(
    writer: Arc<dyn SectionWriter>,
    request: SectionRequest,
    cancel: CancellationToken,
) -> SectionResult {
    let failed = request.failed_result();
    let task = tokio::spawn(async move { writer.write(request, &cancel).await });
    match task.await {
        Ok(result) => result,
        Err(err) => {
            tracing::warn!(
                index = failed.index,
                section = %failed.title,
                error = %err,
                "section task failed"
            );
            failed
        }
    }
}

/// Non-empty sections in plan order, separated by a blank line.
pub fn merge_sections(sections: &[SectionResult]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .filter(|c| !c.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub struct GenerationOrchestrator {
    model: MeteredModel,
    extractor: Arc<dyn KeywordExtractor>,
    writer: Arc<dyn SectionWriter>,
    observer: Arc<dyn GenerationObserver>,
    session: Option<SessionRecorder>,
}

impl GenerationOrchestrator {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        let model = MeteredModel::new(model, Arc::new(CostLedger::new()));
        let writer = Arc::new(LlmSectionWriter::new(
            model.clone(),
            Arc::new(ExclusionFilter),
        ));
        Self {
            model,
            extractor: Arc::new(FrequencyExtractor::default()),
            writer,
            observer: Arc::new(NoopObserver),
            session: None,
        }
    }

    pub fn with_context_filter(mut self, filter: Arc<dyn ContextFilter>) -> Self {
        self.writer = Arc::new(LlmSectionWriter::new(self.model.clone(), filter));
        self
    }

    pub fn with_writer(mut self, writer: Arc<dyn SectionWriter>) -> Self {
        self.writer = writer;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn GenerationObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_session(mut self, session: SessionRecorder) -> Self {
        self.session = Some(session);
        self
    }

    pub fn ledger(&self) -> &Arc<CostLedger> {
        self.model.ledger()
    }

    /// Returns the stored outcome of an earlier run for this session. Only
    /// the first call consults the store.
    pub async fn restore(&mut self) -> Option<GenerationOutcome> {
        let snapshot = self.session.as_mut()?.restore().await?;
        tracing::info!(
            status = ?snapshot.status,
            sections = snapshot.sections.len(),
            "restored session"
        );
        Some(snapshot.into())
    }

    /// Runs one full generation. Always returns an outcome; failures are
    /// reported through `status` and `error`.
    pub async fn generate(
        &mut self,
        config: &ArticleConfig,
        options: GenerateOptions,
        cancel: &CancellationToken,
    ) -> GenerationOutcome {
        self.ledger().reset();
        let mut run = RunState::default();
        let turbo = options.turbo.unwrap_or(config.turbo_mode);
        tracing::info!(title = %config.title, turbo, "generation started");

        self.transition(&mut run, GenerationStatus::Analyzing).await;

        let status = match self.run_stages(config, &options, turbo, cancel, &mut run).await {
            Ok(()) => {
                if !options.settle_delay.is_zero() {
                    tokio::time::sleep(options.settle_delay).await;
                }
                GenerationStatus::Completed
            }
            Err(err) => {
                let message = format!("{err:#}");
                tracing::error!(error = %message, "generation failed");
                run.error = Some(message);
                GenerationStatus::Error
            }
        };

        let content = run.render_final();
        self.observer.on_content(&content);
        self.transition(&mut run, status).await;

        let cost = self.ledger().totals();
        self.observer.on_cost(cost);
        tracing::info!(
            status = ?status,
            sections = run.slots.iter().filter(|s| !s.content.is_empty()).count(),
            total_tokens = cost.total_tokens,
            total_cost = cost.total_cost,
            stopped = cancel.is_cancelled(),
            "generation finished"
        );

        GenerationOutcome {
            status,
            content,
            sections: run.slots,
            plan: run.plan,
            covered_points: run.covered,
            cost,
            error: run.error,
            visual_style: run.visual_style,
            stopped: cancel.is_cancelled(),
        }
    }

    async fn run_stages(
        &mut self,
        config: &ArticleConfig,
        options: &GenerateOptions,
        turbo: bool,
        cancel: &CancellationToken,
        run: &mut RunState,
    ) -> anyhow::Result<()> {
        let analysis = AnalysisTaskRunner::new(self.model.clone(), Arc::clone(&self.extractor));
        let results = analysis.run(config, cancel).await?;
        let context = Arc::new(results.into_context(config));
        run.visual_style = Some(context.visual_style.clone());

        let plan = match options.plan_override.clone() {
            Some(plan) if !plan.entries.is_empty() => plan,
            _ => build_section_plan(config.sample_outline.as_deref(), Some(&context.structure)),
        };
        tracing::info!(
            sections = plan.entries.len(),
            custom_outline = plan.is_using_custom_outline,
            "section plan ready"
        );
        run.open_slots(&plan);
        self.transition(run, GenerationStatus::Streaming).await;

        if cancel.is_cancelled() {
            tracing::info!("stop requested before writing");
            return Ok(());
        }

        if turbo {
            self.write_turbo(&plan, context, options.concurrency, cancel, run)
                .await;
        } else {
            self.write_sequential(&plan, context, cancel, run).await;
        }
        Ok(())
    }

    async fn write_sequential(
        &mut self,
        plan: &SectionPlan,
        context: Arc<GenerationContext>,
        cancel: &CancellationToken,
        run: &mut RunState,
    ) {
        let mut injected_so_far = 0u32;
        for index in 0..plan.entries.len() {
            if cancel.is_cancelled() {
                tracing::info!(next_section = index, "stop requested; skipping remaining sections");
                break;
            }
            let Some(request) = SectionRequest::from_plan(
                &plan.entries,
                index,
                run.covered.as_slice(),
                injected_so_far,
                Arc::clone(&context),
            ) else {
                break;
            };

            let result = write_isolated(Arc::clone(&self.writer), request, cancel.clone()).await;
            if cancel.is_cancelled() {
                tracing::info!(index, "stop requested; discarding in-flight section");
                break;
            }
            injected_so_far = injected_so_far.saturating_add(result.injected_count);
            self.apply_section(run, result).await;
        }
    }

    async fn write_turbo(
        &mut self,
        plan: &SectionPlan,
        context: Arc<GenerationContext>,
        concurrency: Option<usize>,
        cancel: &CancellationToken,
        run: &mut RunState,
    ) {
        // Every writer sees the same pre-fan-out snapshot, so parallel
        // sections may overlap on key facts.
        let covered_snapshot = run.covered.as_slice().to_vec();
        let limit = concurrency
            .filter(|limit| *limit > 0)
            .map(|limit| Arc::new(Semaphore::new(limit)));

        run.pending = vec![true; run.slots.len()];
        self.observer.on_content(&run.render_live());

        let mut join_set = JoinSet::new();
        for index in 0..plan.entries.len() {
            let Some(request) = SectionRequest::from_plan(
                &plan.entries,
                index,
                &covered_snapshot,
                0,
                Arc::clone(&context),
            ) else {
                continue;
            };
            let writer = Arc::clone(&self.writer);
            let cancel = cancel.clone();
            let limit = limit.clone();
            join_set.spawn(async move {
                let _permit = match limit {
                    Some(limit) => limit.acquire_owned().await.ok(),
                    None => None,
                };
                if cancel.is_cancelled() {
                    return None;
                }
                Some(write_isolated(writer, request, cancel).await)
            });
        }

        loop {
            let joined = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!(
                        in_flight = join_set.len(),
                        "stop requested; detaching in-flight sections"
                    );
                    join_set.detach_all();
                    break;
                }
                joined = join_set.join_next() => joined,
            };
            let Some(joined) = joined else {
                break;
            };
            let result = match joined {
                Ok(Some(result)) => result,
                Ok(None) => continue,
                Err(err) => {
                    tracing::warn!(error = %err, "section task failed");
                    continue;
                }
            };
            if cancel.is_cancelled() {
                join_set.detach_all();
                break;
            }
            self.apply_section(run, result).await;
        }

        run.pending.iter_mut().for_each(|pending| *pending = false);
    }

    async fn apply_section(&mut self, run: &mut RunState, result: SectionResult) {
        let Some(applied) = run.complete(result) else {
            return;
        };
        self.observer.on_section(applied);
        self.observer.on_content(&run.render_live());
        let cost = self.ledger().totals();
        self.observer.on_cost(cost);
        if let Some(session) = self.session.as_mut() {
            session.record(&run.snapshot(run.render_live(), cost)).await;
        }
    }

    async fn transition(&mut self, run: &mut RunState, status: GenerationStatus) {
        tracing::debug!(from = ?run.status, to = ?status, "status transition");
        run.status = status;
        self.observer.on_status(status);
        if let Some(session) = self.session.as_mut() {
            let content = if status == GenerationStatus::Streaming {
                run.render_live()
            } else {
                run.render_final()
            };
            session
                .flush(&run.snapshot(content, self.model.ledger().totals()))
                .await;
        }
    }
}
