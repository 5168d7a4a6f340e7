//! Research tree controller.
//!
//! The tree is expanded level by level. Every node of a level runs as its
//! own task; the controller waits for the whole level, emits one `deepening`
//! event, then starts the children. Nodes are plain descriptors and all
//! results accumulate in one [`SharedState`].

use crate::analysis::{Analysis, ResearchAnalyzer};
use crate::budget::{CharEstimator, ContextBudget, LengthEstimator};
use crate::clarify::{ClarificationHandler, ClarificationStage, ClarifyOutcome};
use crate::config::ResearchConfig;
use crate::error::ResearchError;
use crate::events::{self, LevelComplete, NodeProgress, SynthesisInfo};
use crate::executor::SearchExecutor;
use crate::extractor::LearningExtractor;
use crate::limiter::CallLimiter;
use crate::planner::{PlanInput, QueryPlanner};
use crate::state::SharedState;
use crate::synthesis::{ReportSynthesizer, SynthesisInput};
use crate::types::{
    Learning, NodeState, ResearchNode, ResearchOutcome, ResearchRequest, RunStats, SearchQuery,
};

use delver_core::{ContentFetcher, LlmClient, ProgressEvent, ProgressSink, SearchRegistry};
use futures_util::future::join_all;
use futures_util::Stream;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Collaborators and run-scoped handles for one research run
#[derive(Clone)]
pub struct ResearchContext {
    /// Text-generation client shared by every pipeline step
    pub llm: LlmClient,

    /// Search providers; the request's source selects one
    pub search: SearchRegistry,

    /// Page fetcher used when content enrichment is enabled
    pub fetcher: Option<Arc<dyn ContentFetcher>>,

    /// Answers clarifying questions; defaults apply when absent
    pub clarifier: Option<Arc<dyn ClarificationHandler>>,

    /// Cancels planning, searching and extraction; synthesis still runs
    pub cancellation_token: CancellationToken,

    /// Unit the context budgets are measured in
    pub estimator: Arc<dyn LengthEstimator>,
}

impl std::fmt::Debug for ResearchContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResearchContext")
            .field("llm", &self.llm)
            .field("search", &self.search)
            .field("fetcher", &self.fetcher.is_some())
            .field("clarifier", &self.clarifier.is_some())
            .field("cancelled", &self.cancellation_token.is_cancelled())
            .field("estimator", &self.estimator)
            .finish()
    }
}

impl ResearchContext {
    pub fn new(llm: LlmClient, search: SearchRegistry) -> Self {
        Self {
            llm,
            search,
            fetcher: None,
            clarifier: None,
            cancellation_token: CancellationToken::new(),
            estimator: Arc::new(CharEstimator),
        }
    }

    #[must_use]
    pub fn with_fetcher(mut self, fetcher: Arc<dyn ContentFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    #[must_use]
    pub fn with_clarifier(mut self, clarifier: Arc<dyn ClarificationHandler>) -> Self {
        self.clarifier = Some(clarifier);
        self
    }

    #[must_use]
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }

    #[must_use]
    pub fn with_estimator(mut self, estimator: Arc<dyn LengthEstimator>) -> Self {
        self.estimator = estimator;
        self
    }
}

/// Recursive, breadth-by-depth research agent
///
/// # Example
///
/// ```no_run
/// use delver_core::{LlmClient, LlmConfig, OpenAiBackend, SearchRegistry, SearchSource, TavilyProvider};
/// use delver_deep_research::{DeepResearcher, ResearchConfig, ResearchContext, ResearchRequest};
/// use futures_util::StreamExt;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let llm = LlmClient::new(Arc::new(OpenAiBackend::new("sk-...")?), LlmConfig::default());
/// let search = SearchRegistry::new().with_provider(
///     SearchSource::Tavily,
///     Arc::new(TavilyProvider::new("tvly-...", Duration::from_secs(30))?),
/// );
/// let researcher = DeepResearcher::new(ResearchConfig::default())?;
/// let request = ResearchRequest::new("State of WebAssembly GC").with_source(SearchSource::Tavily);
///
/// let stream = researcher.execute(request, ResearchContext::new(llm, search));
/// futures_util::pin_mut!(stream);
/// while let Some(event) = stream.next().await {
///     println!("[{}] {}", event.stage, event.message);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct DeepResearcher {
    config: ResearchConfig,
}

impl DeepResearcher {
    /// Create a researcher with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `ResearchError::InvalidConfig` listing every invalid setting.
    pub fn new(config: ResearchConfig) -> Result<Self, ResearchError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ResearchConfig {
        &self.config
    }

    /// Run one research request to completion.
    ///
    /// Progress goes to `sink`, which always receives exactly one terminal
    /// event: `completed` carrying the outcome, or `error`.
    pub async fn run(
        &self,
        request: ResearchRequest,
        context: &ResearchContext,
        sink: &ProgressSink,
    ) -> Result<ResearchOutcome, ResearchError> {
        let result = self.run_inner(request, context, sink).await;
        match &result {
            Ok(outcome) => sink.emit(events::completed(outcome)),
            Err(e) => {
                log::error!("Research failed: {}", e);
                sink.emit(events::error(e.to_string(), e.is_cancelled()));
            }
        }
        result
    }

    /// Run a request, streaming its progress events.
    ///
    /// The run starts when the stream is first polled. The last item is
    /// always a `completed` or `error` event. Dropping the stream cancels the
    /// run (the caller's token is not affected).
    pub fn execute(
        &self,
        request: ResearchRequest,
        context: ResearchContext,
    ) -> impl Stream<Item = ProgressEvent> + Send + 'static {
        let researcher = self.clone();

        async_stream::stream! {
            let token = context.cancellation_token.child_token();
            let _cancel_on_drop = token.clone().drop_guard();
            let context = context.with_cancellation_token(token);
            let (sink, mut rx) = ProgressSink::channel();

            let handle = tokio::spawn(async move {
                // The sink lives in the task, so the receiver closes when it ends.
                let _ = researcher.run(request, &context, &sink).await;
            });

            let mut terminal_seen = false;
            while let Some(event) = rx.recv().await {
                terminal_seen = event.is_terminal();
                yield event;
            }

            if let Err(e) = handle.await {
                if !terminal_seen {
                    yield events::error(format!("Research task failed: {}", e), false);
                }
            }
        }
    }

    async fn run_inner(
        &self,
        request: ResearchRequest,
        context: &ResearchContext,
        sink: &ProgressSink,
    ) -> Result<ResearchOutcome, ResearchError> {
        request.validate()?;
        let provider = context.search.get(request.source)?;

        let token = &context.cancellation_token;
        let limiter = CallLimiter::new(self.config.concurrency);
        let prompts = Arc::new(self.config.prompts.clone());
        let budget = ContextBudget::new(self.config.context_size, Arc::clone(&context.estimator));
        let original_topic = request.topic.trim().to_string();

        log::debug!(
            "Researching '{}' (breadth {}, depth {}, {} via {})",
            original_topic,
            request.breadth,
            request.depth,
            request.mode,
            provider.name()
        );

        let clarification = ClarificationStage::new(
            context.llm.clone(),
            limiter.clone(),
            Arc::clone(&prompts),
            self.config.max_clarifying_questions,
        );
        let (topic, assumptions) = match clarification
            .run(&request, context.clarifier.as_deref(), sink, token)
            .await
        {
            ClarifyOutcome::DirectAnswer { topic, answer } => {
                log::debug!("Answered '{}' without research", topic);
                return Ok(ResearchOutcome {
                    topic,
                    original_topic,
                    answer,
                    mode: request.mode,
                    assumptions: Vec::new(),
                    learnings: Vec::new(),
                    sources: Vec::new(),
                    gaps: Vec::new(),
                    recommendations: Vec::new(),
                    stats: RunStats::default(),
                });
            }
            ClarifyOutcome::Proceed { topic, assumptions } => (topic, assumptions),
        };

        let mut executor = SearchExecutor::new(provider, limiter.clone(), self.config.search.clone());
        if self.config.fetch_content {
            match &context.fetcher {
                Some(fetcher) => {
                    executor = executor.with_fetcher(Arc::clone(fetcher), self.config.fetch_min_chars)
                }
                None => log::warn!("Content fetching enabled but no fetcher configured"),
            }
        }

        let tree = Arc::new(TreeRunner {
            planner: QueryPlanner::new(context.llm.clone(), limiter.clone(), Arc::clone(&prompts)),
            executor,
            extractor: LearningExtractor::new(
                context.llm.clone(),
                limiter.clone(),
                Arc::clone(&prompts),
                budget.with_max(self.config.extraction_content_budget),
            )
            .with_limits(self.config.max_learnings_per_query, self.config.max_follow_ups)
            .with_history(request.history()),
            state: SharedState::with_estimator(Arc::clone(&context.estimator)),
            budget: budget.clone(),
            topic: topic.clone(),
            history: request.history().to_string(),
            child_divisor: self.config.breadth_divisor,
            sink: sink.clone(),
            token: token.clone(),
        });

        self.expand(&tree, ResearchNode::root(&topic, request.breadth, request.depth))
            .await;

        let state = &tree.state;
        if token.is_cancelled() && state.learning_count() == 0 {
            state.update_stats(|s| s.cancelled = true);
            return Err(ResearchError::Cancelled);
        }

        let analysis = if self.config.analyze && !token.is_cancelled() && state.learning_count() > 0 {
            let analyzer =
                ResearchAnalyzer::new(context.llm.clone(), limiter.clone(), Arc::clone(&prompts));
            self.analyze(&analyzer, &budget, state, &topic, request.history(), token)
                .await
        } else {
            Analysis::default()
        };

        let cancelled = token.is_cancelled();
        state.update_stats(|s| s.cancelled = cancelled);

        let learnings = state.learnings();
        let sources = state.sources();
        let synthesizer = ReportSynthesizer::new(context.llm.clone(), limiter, prompts, budget);
        let fitted = synthesizer.fit(&learnings);
        sink.emit(events::synthesizing(&SynthesisInfo {
            mode: request.mode,
            learnings_included: fitted.included,
            learnings_dropped: fitted.dropped,
            sources: sources.len(),
            partial: cancelled,
            gaps: analysis.gaps.clone(),
            recommendations: analysis.recommendations.clone(),
        }));

        let answer = synthesizer
            .synthesize(SynthesisInput {
                topic: &topic,
                context: &fitted,
                sources: &sources,
                gaps: &analysis.gaps,
                mode: request.mode,
                history: request.history(),
            })
            .await?;

        Ok(ResearchOutcome {
            topic,
            original_topic,
            answer,
            mode: request.mode,
            assumptions,
            learnings,
            sources,
            gaps: analysis.gaps,
            recommendations: analysis.recommendations,
            stats: state.stats(),
        })
    }

    /// Final analysis over everything learned; its findings join the learnings.
    ///
    /// Optional: any failure leaves the analysis empty and synthesis proceeds.
    async fn analyze(
        &self,
        analyzer: &ResearchAnalyzer,
        budget: &ContextBudget,
        state: &SharedState,
        topic: &str,
        history: &str,
        token: &CancellationToken,
    ) -> Analysis {
        let context = budget.fit_learnings(&state.learnings());
        match analyzer.analyze(topic, &context, history, token).await {
            Ok(analysis) => {
                let findings = analysis.findings.iter().map(Learning::new).collect();
                let added = state.merge_learnings(findings);
                log::debug!(
                    "Analysis: {} new findings, {} gaps, {} recommendations",
                    added,
                    analysis.gaps.len(),
                    analysis.recommendations.len()
                );
                analysis
            }
            Err(e) if e.is_cancelled() => Analysis::default(),
            Err(e) => {
                log::warn!("Final analysis failed, synthesizing without it: {}", e);
                Analysis::default()
            }
        }
    }

    /// Expand the tree from `root`, one level at a time, until no node
    /// produces children or the run is cancelled.
    async fn expand(&self, tree: &Arc<TreeRunner>, root: ResearchNode) {
        let mut nodes = vec![root];
        let mut level = 0;

        while !nodes.is_empty() {
            if tree.token.is_cancelled() {
                log::debug!("Cancelled before level {}", level);
                break;
            }

            let reports = run_level(tree, &nodes).await;
            if tree.token.is_cancelled() {
                log::debug!("Level {} interrupted by cancellation", level);
                break;
            }

            let mut node_states = BTreeMap::new();
            let mut next = Vec::new();
            for (node, report) in nodes.iter().zip(reports) {
                node_states.insert(node.id.clone(), report.state);
                next.extend(report.children);
            }
            let failed = node_states
                .values()
                .filter(|s| **s == NodeState::Failed)
                .count();
            tree.state.update_stats(|s| {
                s.levels_completed += 1;
                s.nodes_run += nodes.len();
                s.nodes_failed += failed;
            });

            tree.sink.emit(events::level_complete(&LevelComplete {
                level,
                node_states,
                next_nodes: next.len(),
                learnings: tree.state.learning_count(),
                sources: tree.state.source_count(),
            }));

            nodes = next;
            level += 1;
        }
    }
}

/// What a finished node hands back to the controller
#[derive(Debug)]
struct NodeReport {
    state: NodeState,
    children: Vec<ResearchNode>,
}

impl NodeReport {
    fn failed() -> Self {
        Self {
            state: NodeState::Failed,
            children: Vec::new(),
        }
    }

    fn done(children: Vec<ResearchNode>) -> Self {
        let state = if children.is_empty() {
            NodeState::Done
        } else {
            NodeState::Deepening
        };
        Self { state, children }
    }
}

/// Run every node of a level as its own task and wait for all of them.
///
/// Reports come back in the order of `nodes`. A node whose task panicked
/// counts as failed.
async fn run_level(tree: &Arc<TreeRunner>, nodes: &[ResearchNode]) -> Vec<NodeReport> {
    let (tx, mut rx) = mpsc::channel::<(usize, NodeReport)>(nodes.len().max(1));

    for (index, node) in nodes.iter().enumerate() {
        let tx = tx.clone();
        let tree = Arc::clone(tree);
        let node = node.clone();

        tokio::spawn(async move {
            let report = tree.run_node(&node).await;
            if tx.send((index, report)).await.is_err() {
                log::debug!("Level receiver dropped, node {} report discarded", node.id);
            }
        });
    }
    drop(tx);

    let mut reports: Vec<Option<NodeReport>> = nodes.iter().map(|_| None).collect();
    while let Some((index, report)) = rx.recv().await {
        reports[index] = Some(report);
    }

    reports
        .into_iter()
        .zip(nodes)
        .map(|(report, node)| {
            report.unwrap_or_else(|| {
                log::error!("Node {} ended without a report", node.id);
                NodeReport::failed()
            })
        })
        .collect()
}

/// Per-run components shared by every node task
struct TreeRunner {
    planner: QueryPlanner,
    executor: SearchExecutor,
    extractor: LearningExtractor,
    state: SharedState,
    budget: ContextBudget,
    topic: String,
    history: String,
    child_divisor: usize,
    sink: ProgressSink,
    token: CancellationToken,
}

impl TreeRunner {
    fn progress(&self, node: &ResearchNode, state: NodeState, queries: &[SearchQuery], results: usize) {
        self.sink.emit(events::node(&NodeProgress {
            node_id: node.id.clone(),
            depth: node.depth,
            level: node.level(),
            state,
            queries: queries.iter().map(|q| q.query.clone()).collect(),
            results,
        }));
    }

    fn child_breadth(&self, parent: usize) -> usize {
        (parent / self.child_divisor.max(1)).max(1)
    }

    /// Planning, then searching, then extracting for one node.
    async fn run_node(&self, node: &ResearchNode) -> NodeReport {
        if self.token.is_cancelled() {
            return NodeReport::failed();
        }

        self.progress(node, NodeState::Planning, &[], 0);
        let queries = match self.plan(node).await {
            Some(queries) => queries,
            None => {
                log::warn!("Node {} has nothing to search", node.id);
                return NodeReport::failed();
            }
        };

        self.progress(node, NodeState::Searching, &queries, 0);
        let outcomes = self.executor.execute(queries, &self.state, &self.token).await;
        let searches_failed = outcomes.iter().filter(|o| o.failed()).count();
        if searches_failed > 0 {
            self.state.update_stats(|s| s.searches_failed += searches_failed);
        }
        if self.token.is_cancelled() {
            return NodeReport::done(Vec::new());
        }
        if searches_failed == outcomes.len() {
            log::warn!("Node {}: every search failed", node.id);
            return NodeReport::failed();
        }

        let total_results = outcomes.iter().map(|o| o.results.len()).sum();
        self.progress(node, NodeState::Extracting, &[], total_results);
        let extractions = join_all(
            outcomes
                .iter()
                .map(|o| self.extractor.extract(&o.query, &o.results, &self.token)),
        )
        .await;

        let mut children = Vec::new();
        let breadth = self.child_breadth(node.breadth);
        let attempted = extractions.len();
        let mut failed = 0;
        let mut added_total = 0;
        for (index, (outcome, extraction)) in outcomes.into_iter().zip(extractions).enumerate() {
            let extraction = match extraction {
                Ok(extraction) => extraction,
                Err(e) if e.is_cancelled() => continue,
                Err(e) => {
                    log::warn!("Extraction for '{}' failed: {}", outcome.query.query, e);
                    failed += 1;
                    continue;
                }
            };

            let added = self.state.merge_learnings(extraction.learnings);
            added_total += added;
            log::debug!("Node {}: '{}' added {} learnings", node.id, outcome.query.query, added);

            if node.can_recurse() && !extraction.follow_ups.is_empty() && children.len() < node.breadth {
                children.push(node.child(index, outcome.query, extraction.follow_ups, breadth));
            }
        }
        if failed > 0 {
            self.state.update_stats(|s| s.extractions_failed += failed);
        }

        if failed > 0 && failed == attempted && added_total == 0 && children.is_empty() {
            log::warn!("Node {}: every extraction failed", node.id);
            return NodeReport::failed();
        }
        NodeReport::done(children)
    }

    /// Planned queries, or a direct search of the node's own query or
    /// follow-ups when planning produced nothing.
    async fn plan(&self, node: &ResearchNode) -> Option<Vec<SearchQuery>> {
        let context = self.budget.fit_learnings(&self.state.learnings());
        let input = PlanInput {
            topic: &self.topic,
            seed: &node.query.query,
            follow_ups: &node.follow_ups,
            learnings: &context.text,
            history: &self.history,
            count: node.breadth,
        };

        match self.planner.plan(input, &self.state, &self.token).await {
            Ok(queries) if !queries.is_empty() => return Some(queries),
            Ok(_) => log::debug!("Node {}: planner produced no new queries", node.id),
            Err(e) if e.is_cancelled() => return None,
            Err(e) => log::warn!("Node {}: planning failed: {}", node.id, e),
        }

        // Fall back to searching the node's own line of inquiry directly.
        let candidates = std::iter::once(node.query.query.clone())
            .chain(node.follow_ups.iter().cloned())
            .map(|q| SearchQuery::new(q, "direct search"))
            .collect();
        let direct = self.state.reserve_queries(candidates, 1);
        (!direct.is_empty()).then_some(direct)
    }
}
