//! The coordinator: public facade over the whole pipeline.
//!
//! Composes the session store, strategy registry and executor, input
//! router, ontology view, reasoner gateway, and broadcaster under one
//! error and cost model. Nothing escapes the public boundary as a panic or
//! raw error: every failure is packed into a [`ServiceError`] carrying its
//! stable code, the offending fragment where one exists, and whatever cost
//! had accumulated by the time things went wrong.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::broadcast::{KbUpdate, KbUpdateBroadcaster};
use crate::config::{DebugLevel, ServiceConfig, SessionStoreKind};
use crate::error::{Error, ErrorCode, Result};
use crate::llm::{
    AnthropicProvider, CostTracker, GenerateRequest, LlmGateway, LlmProvider, OpenAiProvider,
    ProviderConfig,
};
use crate::logic;
use crate::ontology::{render_snapshot, MemoryOntologies, OntologySource};
use crate::perf::PerformanceDb;
use crate::prompt::{self, PromptDebug, PromptRegistry, PromptTemplate};
use crate::reasoner::{BuiltinReasoner, ReasonerBackend, ReasonerGateway, Solutions};
use crate::router::InputRouter;
use crate::session::{
    FileSessionStore, MemorySessionStore, Session, SessionStore,
};
use crate::strategy::{
    ContextSeed, Operation, PipelineContext, Strategy, StrategyExecutor, StrategyOutput,
    StrategyRegistry,
};

/// Structured failure crossing the service boundary.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceError {
    pub error_code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<CostTracker>,
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.error_code, self.message)
    }
}

impl std::error::Error for ServiceError {}

impl ServiceError {
    fn new(err: Error) -> Self {
        let details = match &err {
            // internal surprises keep their message in details behind a
            // generic code
            Error::Internal(msg) => Some(msg.clone()),
            Error::Serialization(e) => Some(e.to_string()),
            _ => err.detail(),
        };
        Self {
            error_code: err.code(),
            message: err.to_string(),
            details,
            strategy_id: None,
            cost: None,
        }
    }

    fn with_strategy(mut self, strategy_id: impl Into<String>) -> Self {
        self.strategy_id = Some(strategy_id.into());
        self
    }

    fn with_cost(mut self, cost: CostTracker) -> Self {
        self.cost = Some(cost);
        self
    }
}

impl From<Error> for ServiceError {
    fn from(err: Error) -> Self {
        Self::new(err)
    }
}

/// Result type every public coordinator method returns.
pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

/// Diagnostic bundle attached to query and explain responses. Fidelity is
/// controlled by the configured debug level.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prolog_query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub solutions: Option<Solutions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub knowledge_base: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ontology_error: Option<String>,
}

impl DebugInfo {
    fn build(
        level: DebugLevel,
        strategy_id: &str,
        query: &str,
        solutions: Option<&Solutions>,
        kb: &str,
        ontology_error: Option<String>,
    ) -> Self {
        match level {
            DebugLevel::None => Self::default(),
            DebugLevel::Basic => Self {
                strategy_id: Some(strategy_id.to_string()),
                prolog_query: Some(query.to_string()),
                ontology_error,
                ..Self::default()
            },
            DebugLevel::Verbose => Self {
                strategy_id: Some(strategy_id.to_string()),
                prolog_query: Some(query.to_string()),
                solutions: solutions.cloned(),
                knowledge_base: Some(kb.to_string()),
                ontology_error,
            },
        }
    }
}

/// Successful assertion.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssertResponse {
    pub added_clauses: Vec<String>,
    pub strategy_id: String,
    pub cost: CostTracker,
}

/// Successful raw-clause assertion.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAssertResponse {
    pub added_clauses: Vec<String>,
}

/// Successful query.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    pub answer: String,
    pub debug_info: DebugInfo,
    pub cost: CostTracker,
}

/// Successful explanation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplainResponse {
    pub explanation: String,
    pub debug_info: DebugInfo,
    pub cost: CostTracker,
}

/// Successful sessionless NL-to-clauses translation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslateResponse {
    pub clauses: Vec<String>,
    pub strategy_id: String,
    pub cost: CostTracker,
}

/// Successful clauses-to-NL translation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplanationResponse {
    pub explanation: String,
    pub cost: CostTracker,
}

/// Options for [`Coordinator::query_nl`].
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Extra ontology text folded into this query's knowledge base only
    pub dynamic_ontology: Option<String>,
    /// Answer style hint passed to the synthesis prompt
    pub style: Option<String>,
}

/// Clause input for [`Coordinator::translate_clauses_to_nl`]: either a
/// newline-joined string or an explicit sequence.
#[derive(Debug, Clone)]
pub enum ClausesInput {
    Text(String),
    List(Vec<String>),
}

impl From<&str> for ClausesInput {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for ClausesInput {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Vec<String>> for ClausesInput {
    fn from(list: Vec<String>) -> Self {
        Self::List(list)
    }
}

impl ClausesInput {
    /// Normalize to one clause per element, trimmed, period-terminated.
    fn normalize(self) -> Vec<String> {
        let lines = match self {
            Self::Text(text) => text.lines().map(str::to_string).collect::<Vec<_>>(),
            Self::List(list) => list,
        };
        lines
            .into_iter()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .map(|line| {
                if line.ends_with('.') {
                    line
                } else {
                    format!("{line}.")
                }
            })
            .collect()
    }
}

const DEFAULT_ANSWER_STYLE: &str = "concise";

/// Builder wiring the coordinator's collaborators, with config-driven
/// defaults for anything not injected.
#[derive(Default)]
pub struct CoordinatorBuilder {
    config: ServiceConfig,
    provider: Option<Arc<dyn LlmProvider>>,
    store: Option<Arc<dyn SessionStore>>,
    reasoner: Option<Arc<dyn ReasonerBackend>>,
    router: Option<Arc<dyn InputRouter>>,
    ontologies: Option<Arc<dyn OntologySource>>,
    strategies: Option<StrategyRegistry>,
    prompts: Option<PromptRegistry>,
}

impl CoordinatorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: ServiceConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_reasoner(mut self, reasoner: Arc<dyn ReasonerBackend>) -> Self {
        self.reasoner = Some(reasoner);
        self
    }

    pub fn with_router(mut self, router: Arc<dyn InputRouter>) -> Self {
        self.router = Some(router);
        self
    }

    pub fn with_ontologies(mut self, ontologies: Arc<dyn OntologySource>) -> Self {
        self.ontologies = Some(ontologies);
        self
    }

    pub fn with_strategies(mut self, strategies: StrategyRegistry) -> Self {
        self.strategies = Some(strategies);
        self
    }

    pub fn with_prompts(mut self, prompts: PromptRegistry) -> Self {
        self.prompts = Some(prompts);
        self
    }

    pub async fn build(self) -> Result<Coordinator> {
        let config = self.config;

        let provider: Arc<dyn LlmProvider> = match self.provider {
            Some(provider) => provider,
            None => match config.llm.provider.as_str() {
                "anthropic" => {
                    let mut pc = ProviderConfig::new(&config.llm.api_key, &config.llm.model);
                    if let Some(url) = &config.llm.base_url {
                        pc = pc.with_base_url(url);
                    }
                    Arc::new(AnthropicProvider::new(pc))
                }
                "openai" => {
                    let mut pc = ProviderConfig::new(&config.llm.api_key, &config.llm.model);
                    if let Some(url) = &config.llm.base_url {
                        pc = pc.with_base_url(url);
                    }
                    Arc::new(OpenAiProvider::new(pc))
                }
                other => {
                    return Err(Error::NotImplemented(format!(
                        "unknown llm provider `{other}`"
                    )))
                }
            },
        };

        let store: Arc<dyn SessionStore> = match self.store {
            Some(store) => store,
            None => match config.session_store.kind {
                SessionStoreKind::Memory => Arc::new(MemorySessionStore::new()),
                SessionStoreKind::File => {
                    let directory =
                        config.session_store.directory.clone().ok_or_else(|| {
                            Error::InvalidInput(
                                "file session store requires a directory".to_string(),
                            )
                        })?;
                    Arc::new(FileSessionStore::open(directory).await?)
                }
            },
        };

        let backend: Arc<dyn ReasonerBackend> = match self.reasoner {
            Some(backend) => backend,
            None => match config.reasoner.provider.as_str() {
                "builtin" => Arc::new(BuiltinReasoner::new()),
                other => {
                    return Err(Error::NotImplemented(format!(
                        "unknown reasoner provider `{other}`"
                    )))
                }
            },
        };

        let llm = Arc::new(LlmGateway::new(
            provider,
            Duration::from_millis(config.llm_timeout_ms),
        ));
        let reasoner = Arc::new(ReasonerGateway::new(
            backend,
            Duration::from_millis(config.reasoner_timeout_ms),
        ));
        let prompts = Arc::new(self.prompts.unwrap_or_else(PromptRegistry::with_defaults));
        let strategies = Arc::new(
            self.strategies
                .unwrap_or_else(StrategyRegistry::with_defaults),
        );
        let ontologies: Arc<dyn OntologySource> = self
            .ontologies
            .unwrap_or_else(|| Arc::new(MemoryOntologies::new()));

        let executor = StrategyExecutor::new(
            Arc::clone(&llm),
            Arc::clone(&prompts),
            Arc::clone(&reasoner),
        );

        Ok(Coordinator {
            config,
            store,
            ontologies,
            strategies,
            prompts,
            llm,
            reasoner,
            router: self.router,
            executor,
            broadcaster: Arc::new(KbUpdateBroadcaster::new()),
        })
    }
}

/// The public service facade.
pub struct Coordinator {
    config: ServiceConfig,
    store: Arc<dyn SessionStore>,
    ontologies: Arc<dyn OntologySource>,
    strategies: Arc<StrategyRegistry>,
    prompts: Arc<PromptRegistry>,
    llm: Arc<LlmGateway>,
    reasoner: Arc<ReasonerGateway>,
    router: Option<Arc<dyn InputRouter>>,
    executor: StrategyExecutor,
    broadcaster: Arc<KbUpdateBroadcaster>,
}

impl Coordinator {
    pub fn builder() -> CoordinatorBuilder {
        CoordinatorBuilder::new()
    }

    /// Build straight from configuration with all-default collaborators.
    pub async fn from_config(config: ServiceConfig) -> Result<Self> {
        CoordinatorBuilder::new().with_config(config).build().await
    }

    /// The broadcaster transports subscribe on.
    pub fn broadcaster(&self) -> &KbUpdateBroadcaster {
        &self.broadcaster
    }

    // ==================== sessions ====================

    pub async fn create_session(&self, id: Option<String>) -> ServiceResult<Session> {
        Ok(self.store.create_session(id).await?)
    }

    pub async fn get_session(&self, id: &str) -> ServiceResult<Session> {
        self.store
            .get_session(id)
            .await?
            .ok_or_else(|| ServiceError::new(Error::session_not_found(id)))
    }

    pub async fn delete_session(&self, id: &str) -> ServiceResult<()> {
        if self.store.delete_session(id).await? {
            Ok(())
        } else {
            Err(ServiceError::new(Error::session_not_found(id)))
        }
    }

    pub async fn list_sessions(&self) -> ServiceResult<Vec<Session>> {
        Ok(self.store.list_sessions().await?)
    }

    pub async fn get_knowledge_base(&self, id: &str) -> ServiceResult<String> {
        self.store
            .knowledge_base(id)
            .await?
            .ok_or_else(|| ServiceError::new(Error::session_not_found(id)))
    }

    pub async fn get_lexicon_summary(&self, id: &str) -> ServiceResult<String> {
        self.store
            .lexicon_summary(id)
            .await?
            .ok_or_else(|| ServiceError::new(Error::session_not_found(id)))
    }

    // ==================== strategy management ====================

    /// The session's effective base strategy id, falling back to the
    /// system default.
    pub async fn get_active_strategy_id(&self, session_id: &str) -> ServiceResult<String> {
        self.get_session(session_id).await?;
        let override_id = match self.store.active_strategy(session_id).await {
            Ok(id) => id,
            // stores without the capability degrade to the default
            Err(Error::NotImplemented(_)) => None,
            Err(e) => return Err(e.into()),
        };
        Ok(override_id.unwrap_or_else(|| self.config.translation_strategy.clone()))
    }

    pub async fn set_active_strategy_for_session(
        &self,
        session_id: &str,
        strategy_id: &str,
    ) -> ServiceResult<()> {
        self.get_session(session_id).await?;
        if !self.strategies.knows_base(strategy_id) {
            return Err(ServiceError::new(Error::strategy_not_found(strategy_id)));
        }
        if !self.store.supports_strategy_override() {
            return Err(ServiceError::new(Error::NotImplemented(
                "this session store cannot persist a strategy override".to_string(),
            )));
        }
        Ok(self
            .store
            .set_active_strategy(session_id, strategy_id)
            .await?)
    }

    // ==================== prompts ====================

    pub fn get_prompts(&self) -> BTreeMap<String, PromptTemplate> {
        self.prompts
            .all()
            .iter()
            .map(|(name, template)| (name.clone(), template.clone()))
            .collect()
    }

    pub fn debug_format_prompt(
        &self,
        name: &str,
        vars: &BTreeMap<String, String>,
    ) -> ServiceResult<PromptDebug> {
        Ok(self.prompts.debug_format(name, vars)?)
    }

    // ==================== assertion ====================

    /// Translate a natural-language statement into clauses and append them
    /// to the session's knowledge base.
    pub async fn assert_nl(&self, session_id: &str, text: &str) -> ServiceResult<AssertResponse> {
        let mut cost = CostTracker::new();
        if text.trim().is_empty() {
            return Err(ServiceError::new(Error::InvalidInput(
                "assertion text must not be empty".to_string(),
            )));
        }

        let session = self.get_session(session_id).await?;
        let strategy = self
            .resolve_strategy(&session, text, Operation::Assert)
            .await
            .map_err(|e| ServiceError::new(e).with_cost(cost.clone()))?;

        let (seed, _ontology_error) = self.assemble_seed(&session).await;
        let context = PipelineContext::for_assert(text, &seed);

        let fail = |e: Error, cost: &CostTracker| {
            ServiceError::new(e)
                .with_strategy(strategy.id.clone())
                .with_cost(cost.clone())
        };

        let output = match self.executor.run(&strategy, context, &mut cost).await {
            Ok(output) => output,
            Err(e) => return Err(fail(e, &cost)),
        };
        let clauses = match output {
            StrategyOutput::Clauses(clauses) => normalize_clauses(clauses),
            StrategyOutput::Query(_) => {
                return Err(fail(
                    Error::StrategyInvalidOutput {
                        strategy_id: strategy.id.clone(),
                        message: "assert strategy produced a query".to_string(),
                    },
                    &cost,
                ))
            }
        };

        if clauses.is_empty() {
            return Err(fail(Error::NoFactsExtracted, &cost));
        }

        if let Err(e) = self.reasoner.validate_all(&clauses).await {
            return Err(fail(e, &cost));
        }

        self.append_and_broadcast(session_id, &clauses)
            .await
            .map_err(|e| fail(e, &cost))?;

        debug!(session = session_id, strategy = %strategy.id, added = clauses.len(), "assertion complete");
        Ok(AssertResponse {
            added_clauses: clauses,
            strategy_id: strategy.id.clone(),
            cost,
        })
    }

    /// Append pre-formed clause text without translation: split on terminal
    /// periods, validate each clause, append the batch.
    pub async fn assert_raw_clauses(
        &self,
        session_id: &str,
        text: &str,
    ) -> ServiceResult<RawAssertResponse> {
        if text.trim().is_empty() {
            return Err(ServiceError::new(Error::InvalidInput(
                "clause text must not be empty".to_string(),
            )));
        }
        self.get_session(session_id).await?;

        let clauses = logic::split_clause_strings(text)
            .map_err(|e| ServiceError::new(Error::InvalidInput(e.to_string())))?;
        if clauses.is_empty() {
            return Err(ServiceError::new(Error::NoFactsExtracted));
        }

        self.reasoner.validate_all(&clauses).await?;
        self.append_and_broadcast(session_id, &clauses).await?;

        Ok(RawAssertResponse {
            added_clauses: clauses,
        })
    }

    async fn append_and_broadcast(&self, session_id: &str, clauses: &[String]) -> Result<()> {
        self.store
            .add_clauses(session_id, clauses)
            .await
            .map_err(|e| match e {
                Error::SessionNotFound { .. } => e,
                other => Error::SessionAddFacts {
                    session_id: session_id.to_string(),
                    message: other.to_string(),
                },
            })?;

        let full_kb = self
            .store
            .knowledge_base(session_id)
            .await?
            .ok_or_else(|| {
                error!(session = session_id, "session vanished after append");
                Error::InternalKbNotFound {
                    session_id: session_id.to_string(),
                }
            })?;

        self.broadcaster.broadcast(KbUpdate {
            session_id: session_id.to_string(),
            new_clauses: clauses.to_vec(),
            full_knowledge_base: full_kb,
        });
        Ok(())
    }

    // ==================== query ====================

    /// Answer a natural-language question against the session's knowledge
    /// base plus the ontology snapshot.
    pub async fn query_nl(
        &self,
        session_id: &str,
        question: &str,
        options: QueryOptions,
    ) -> ServiceResult<QueryResponse> {
        let mut cost = CostTracker::new();
        let prepared = self
            .prepare_query(session_id, question, &options, &mut cost)
            .await?;

        let fail = |e: Error, cost: &CostTracker| {
            ServiceError::new(e)
                .with_strategy(prepared.strategy_id.clone())
                .with_cost(cost.clone())
        };

        let solutions = match self
            .reasoner
            .execute_query(&prepared.kb, &prepared.query)
            .await
        {
            Ok(solutions) => solutions,
            Err(e) => return Err(fail(e, &cost)),
        };

        let solutions_json = serde_json::to_string(&solutions)
            .map_err(|e| fail(Error::Serialization(e), &cost))?;
        let style = options
            .style
            .unwrap_or_else(|| DEFAULT_ANSWER_STYLE.to_string());

        let vars = string_map(&[
            ("question", question),
            ("solutionsJson", &solutions_json),
            ("style", &style),
        ]);
        let filled = self
            .prompts
            .fill(prompt::LOGIC_TO_NL_ANSWER, &vars)
            .map_err(|e| fail(e, &cost))?;
        let generation = self
            .llm
            .generate(GenerateRequest::new(filled.system, filled.user), &mut cost)
            .await
            .map_err(|e| fail(e, &cost))?;

        let debug_info = DebugInfo::build(
            self.config.debug_level,
            &prepared.strategy_id,
            &prepared.query,
            Some(&solutions),
            &prepared.kb,
            prepared.ontology_error,
        );

        Ok(QueryResponse {
            answer: generation.text.trim().to_string(),
            debug_info,
            cost,
        })
    }

    /// Explain what the translated query asks, without executing it.
    pub async fn explain_query(
        &self,
        session_id: &str,
        question: &str,
    ) -> ServiceResult<ExplainResponse> {
        let mut cost = CostTracker::new();
        let prepared = self
            .prepare_query(session_id, question, &QueryOptions::default(), &mut cost)
            .await?;

        let fail = |e: Error, cost: &CostTracker| {
            ServiceError::new(e)
                .with_strategy(prepared.strategy_id.clone())
                .with_cost(cost.clone())
        };

        let vars = string_map(&[
            ("question", question),
            ("prologQuery", &prepared.query),
            ("knowledgeBase", &prepared.kb),
        ]);
        let filled = self
            .prompts
            .fill(prompt::EXPLAIN_PROLOG_QUERY, &vars)
            .map_err(|e| fail(e, &cost))?;
        let generation = self
            .llm
            .generate(GenerateRequest::new(filled.system, filled.user), &mut cost)
            .await
            .map_err(|e| match e {
                Error::LlmEmptyResponse => fail(Error::EmptyExplanation, &cost),
                other => fail(other, &cost),
            })?;

        let debug_info = DebugInfo::build(
            self.config.debug_level,
            &prepared.strategy_id,
            &prepared.query,
            None,
            &prepared.kb,
            prepared.ontology_error,
        );

        Ok(ExplainResponse {
            explanation: generation.text.trim().to_string(),
            debug_info,
            cost,
        })
    }

    // ==================== direct translation ====================

    /// Translate text to clauses without touching any session.
    pub async fn translate_nl_to_clauses(
        &self,
        text: &str,
        strategy_id: Option<&str>,
    ) -> ServiceResult<TranslateResponse> {
        let mut cost = CostTracker::new();
        if text.trim().is_empty() {
            return Err(ServiceError::new(Error::InvalidInput(
                "text must not be empty".to_string(),
            )));
        }

        let base = strategy_id.unwrap_or(&self.config.translation_strategy);
        let strategy = self
            .strategies
            .resolve(base, Operation::Assert)
            .ok_or_else(|| ServiceError::new(Error::strategy_not_found(base)))?;

        let fail = |e: Error, cost: &CostTracker| {
            ServiceError::new(e)
                .with_strategy(strategy.id.clone())
                .with_cost(cost.clone())
        };

        let (ontology_rules, _) = self.ontology_snapshot().await;
        let seed = ContextSeed {
            existing_facts: String::new(),
            ontology_rules,
            lexicon_summary: "(no predicates defined)".to_string(),
            llm_model_id: self.llm.model_id().to_string(),
        };
        let context = PipelineContext::for_assert(text, &seed);

        let output = match self.executor.run(&strategy, context, &mut cost).await {
            Ok(output) => output,
            Err(e) => return Err(fail(e, &cost)),
        };
        let clauses = match output {
            StrategyOutput::Clauses(clauses) => normalize_clauses(clauses),
            StrategyOutput::Query(_) => {
                return Err(fail(
                    Error::StrategyInvalidOutput {
                        strategy_id: strategy.id.clone(),
                        message: "assert strategy produced a query".to_string(),
                    },
                    &cost,
                ))
            }
        };
        if clauses.is_empty() {
            return Err(fail(Error::NoFactsExtracted, &cost));
        }
        if let Err(e) = self.reasoner.validate_all(&clauses).await {
            return Err(fail(e, &cost));
        }

        Ok(TranslateResponse {
            clauses,
            strategy_id: strategy.id.clone(),
            cost,
        })
    }

    /// Translate text expected to contain general statements into rules
    /// (clauses with a body). Facts in the output are discarded.
    pub async fn translate_nl_to_rules(&self, text: &str) -> ServiceResult<TranslateResponse> {
        let translated = self.translate_nl_to_clauses(text, None).await?;
        let rules: Vec<String> = translated
            .clauses
            .into_iter()
            .filter(|clause| clause.contains(":-"))
            .collect();
        if rules.is_empty() {
            return Err(ServiceError::new(Error::NoRulesExtracted)
                .with_strategy(translated.strategy_id)
                .with_cost(translated.cost));
        }
        Ok(TranslateResponse {
            clauses: rules,
            strategy_id: translated.strategy_id,
            cost: translated.cost,
        })
    }

    /// Render clauses into natural language.
    pub async fn translate_clauses_to_nl(
        &self,
        clauses: impl Into<ClausesInput>,
        style: Option<&str>,
    ) -> ServiceResult<ExplanationResponse> {
        let mut cost = CostTracker::new();
        let clauses = clauses.into().normalize();
        if clauses.is_empty() {
            return Err(ServiceError::new(Error::InvalidInput(
                "no clauses to translate".to_string(),
            )));
        }

        let vars = string_map(&[
            ("clauses", &clauses.join("\n")),
            ("style", style.unwrap_or(DEFAULT_ANSWER_STYLE)),
        ]);
        let filled = self
            .prompts
            .fill(prompt::CLAUSES_TO_NL, &vars)
            .map_err(ServiceError::new)?;
        let generation = self
            .llm
            .generate(GenerateRequest::new(filled.system, filled.user), &mut cost)
            .await
            .map_err(|e| {
                let e = match e {
                    Error::LlmEmptyResponse => Error::EmptyExplanation,
                    other => other,
                };
                ServiceError::new(e).with_cost(cost.clone())
            })?;

        Ok(ExplanationResponse {
            explanation: generation.text.trim().to_string(),
            cost,
        })
    }

    // ==================== internals ====================

    /// Strategy resolution order: per-session override, then router
    /// recommendation, then the configured system default.
    async fn resolve_strategy(
        &self,
        session: &Session,
        text: &str,
        operation: Operation,
    ) -> Result<Arc<Strategy>> {
        if let Some(base) = &session.active_strategy_id {
            if let Some(strategy) = self.strategies.resolve(base, operation) {
                return Ok(strategy);
            }
            warn!(
                session = %session.id,
                strategy = %base,
                "session override not in registry; using system default"
            );
        } else if let Some(router) = &self.router {
            if let Some(hash) = router.route(text, self.llm.model_id()).await {
                match self.strategies.get_by_hash(&hash) {
                    Some(strategy) if strategy.operation == operation => {
                        debug!(strategy = %strategy.id, "router recommendation accepted");
                        return Ok(strategy);
                    }
                    Some(strategy) => {
                        // recommendation exists for the other operation;
                        // retry the lookup through its base id
                        if let Some(sibling) = self.strategies.resolve(&strip_suffix(&strategy.id), operation) {
                            return Ok(sibling);
                        }
                    }
                    None => {
                        warn!(hash = %hash, "router recommended an unregistered strategy hash");
                    }
                }
            }
        }

        let default = &self.config.translation_strategy;
        self.strategies
            .resolve(default, operation)
            .ok_or_else(|| Error::strategy_not_found(format!("{default}-{}", operation.suffix())))
    }

    async fn ontology_snapshot(&self) -> (String, Option<String>) {
        match self.ontologies.snapshot().await {
            Ok(snapshot) => (render_snapshot(&snapshot), None),
            Err(e) => {
                // recorded in debug info, never fails the pipeline
                warn!(error = %e, "ontology snapshot failed; continuing with empty ontology");
                (String::new(), Some(e.to_string()))
            }
        }
    }

    async fn assemble_seed(&self, session: &Session) -> (ContextSeed, Option<String>) {
        let (ontology_rules, ontology_error) = self.ontology_snapshot().await;
        let seed = ContextSeed {
            existing_facts: session.knowledge_base(),
            ontology_rules,
            lexicon_summary: session.lexicon_summary(),
            llm_model_id: self.llm.model_id().to_string(),
        };
        (seed, ontology_error)
    }

    /// Shared front half of query and explain: resolve the strategy, run
    /// the query pipeline, check the output shape, assemble the KB.
    async fn prepare_query(
        &self,
        session_id: &str,
        question: &str,
        options: &QueryOptions,
        cost: &mut CostTracker,
    ) -> ServiceResult<PreparedQuery> {
        if question.trim().is_empty() {
            return Err(ServiceError::new(Error::InvalidInput(
                "question must not be empty".to_string(),
            )));
        }

        // the session read is the query's one snapshot of clause state
        let session = self.get_session(session_id).await?;
        let strategy = self
            .resolve_strategy(&session, question, Operation::Query)
            .await
            .map_err(ServiceError::new)?;

        let fail = |e: Error, cost: &CostTracker| {
            ServiceError::new(e)
                .with_strategy(strategy.id.clone())
                .with_cost(cost.clone())
        };

        let (seed, ontology_error) = self.assemble_seed(&session).await;
        let context = PipelineContext::for_query(question, &seed);

        let output = match self.executor.run(&strategy, context, cost).await {
            Ok(output) => output,
            Err(e) => return Err(fail(e, cost)),
        };
        let query = match output {
            StrategyOutput::Query(query) => query,
            StrategyOutput::Clauses(_) => {
                return Err(fail(
                    Error::StrategyInvalidOutput {
                        strategy_id: strategy.id.clone(),
                        message: "query strategy produced a clause array".to_string(),
                    },
                    cost,
                ))
            }
        };

        // exactly one period-terminated query
        match logic::split_clause_strings(&query) {
            Ok(parts) if parts.len() == 1 => {}
            Ok(parts) => {
                return Err(fail(
                    Error::StrategyInvalidOutput {
                        strategy_id: strategy.id.clone(),
                        message: format!("expected one query, got {}", parts.len()),
                    },
                    cost,
                ))
            }
            Err(_) => {
                return Err(fail(
                    Error::StrategyInvalidOutput {
                        strategy_id: strategy.id.clone(),
                        message: "query is not terminated by a period".to_string(),
                    },
                    cost,
                ))
            }
        }

        let mut kb = String::new();
        kb.push_str("% --- session ---\n");
        kb.push_str(&seed.existing_facts);
        if !seed.ontology_rules.is_empty() {
            kb.push('\n');
            kb.push_str(&seed.ontology_rules);
        }
        if let Some(dynamic) = &options.dynamic_ontology {
            if !dynamic.trim().is_empty() {
                kb.push_str("\n% --- dynamic ontology ---\n");
                kb.push_str(dynamic.trim());
            }
        }

        Ok(PreparedQuery {
            strategy_id: strategy.id.clone(),
            query,
            kb,
            ontology_error,
        })
    }
}

struct PreparedQuery {
    strategy_id: String,
    query: String,
    kb: String,
    ontology_error: Option<String>,
}

/// Trim and terminate every produced clause.
fn normalize_clauses(clauses: Vec<String>) -> Vec<String> {
    clauses
        .into_iter()
        .map(|clause| {
            let clause = clause.trim().to_string();
            if clause.ends_with('.') {
                clause
            } else {
                format!("{clause}.")
            }
        })
        .collect()
}

/// `SIR-R1-Assert` -> `SIR-R1`; ids without an operation suffix pass
/// through unchanged.
fn strip_suffix(id: &str) -> String {
    id.strip_suffix("-Assert")
        .or_else(|| id.strip_suffix("-Query"))
        .unwrap_or(id)
        .to_string()
}

fn string_map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedProvider;
    use crate::perf::PerformanceDb;
    use crate::router::KeywordRouter;
    use pretty_assertions::assert_eq;

    async fn service(responses: Vec<&str>) -> Coordinator {
        Coordinator::builder()
            .with_provider(Arc::new(ScriptedProvider::new(responses)))
            .build()
            .await
            .unwrap()
    }

    const SKY_SIR: &str =
        r#"[{"type": "attribute", "predicate": "is_color", "entity": "sky", "value": "blue"}]"#;
    const GRASS_SIR: &str =
        r#"[{"type": "attribute", "predicate": "is_color", "entity": "grass", "value": "green"}]"#;

    #[tokio::test]
    async fn test_create_assert_query_round_trip() {
        // scenario: create a session, assert a fact, query it back
        let service = service(vec![SKY_SIR, "is_color(sky, X).", "Blue."]).await;
        let session = service.create_session(Some("s1".to_string())).await.unwrap();

        let asserted = service.assert_nl(&session.id, "The sky is blue.").await.unwrap();
        assert_eq!(asserted.added_clauses, vec!["is_color(sky, blue)."]);
        assert_eq!(asserted.strategy_id, "SIR-R1-Assert");
        assert!(asserted.cost.request_count > 0);

        let session = service.get_session("s1").await.unwrap();
        assert_eq!(session.clause_count(), 1);

        let response = service
            .query_nl("s1", "What color is the sky?", QueryOptions::default())
            .await
            .unwrap();
        assert_eq!(response.answer, "Blue.");
        assert_eq!(
            response.debug_info.prolog_query.as_deref(),
            Some("is_color(sky, X).")
        );
    }

    #[tokio::test]
    async fn test_invalid_generated_clause_leaves_session_unchanged() {
        // the direct strategy passes the malformed clause straight to
        // validation
        let config = ServiceConfig::new().with_translation_strategy("Direct");
        let service = Coordinator::builder()
            .with_config(config)
            .with_provider(Arc::new(ScriptedProvider::new(vec![
                r#"["is_color(sky blue)."]"#,
            ])))
            .build()
            .await
            .unwrap();
        service.create_session(Some("s".to_string())).await.unwrap();

        let err = service.assert_nl("s", "garbled input").await.unwrap_err();
        assert_eq!(err.error_code, ErrorCode::InvalidGeneratedProlog);
        assert!(err.details.unwrap().contains("is_color(sky blue)."));
        // cost of the failed attempt is reported
        assert_eq!(err.cost.unwrap().request_count, 1);

        let session = service.get_session("s").await.unwrap();
        assert_eq!(session.clause_count(), 0);
    }

    #[tokio::test]
    async fn test_query_unknown_session() {
        let service = service(vec![]).await;
        let err = service
            .query_nl("nope", "anything?", QueryOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.error_code, ErrorCode::SessionNotFound);
    }

    #[tokio::test]
    async fn test_per_session_strategy_override() {
        let service = service(vec![SKY_SIR]).await;
        let session = service.create_session(Some("s".to_string())).await.unwrap();

        service
            .set_active_strategy_for_session(&session.id, "SIR-R2-FewShot")
            .await
            .unwrap();
        let asserted = service.assert_nl("s", "The sky is blue.").await.unwrap();
        assert_eq!(asserted.strategy_id, "SIR-R2-FewShot-Assert");

        // deletion clears the override; a recreated session sees the default
        service.delete_session("s").await.unwrap();
        service.create_session(Some("s".to_string())).await.unwrap();
        assert_eq!(service.get_active_strategy_id("s").await.unwrap(), "SIR-R1");
    }

    #[tokio::test]
    async fn test_unknown_override_rejected() {
        let service = service(vec![]).await;
        service.create_session(Some("s".to_string())).await.unwrap();
        let err = service
            .set_active_strategy_for_session("s", "No-Such-Strategy")
            .await
            .unwrap_err();
        assert_eq!(err.error_code, ErrorCode::StrategyNotFound);
    }

    #[tokio::test]
    async fn test_router_fallback_to_system_default() {
        // empty performance database: the router declines, the default wins
        let db = Arc::new(PerformanceDb::in_memory().unwrap());
        let service = Coordinator::builder()
            .with_provider(Arc::new(ScriptedProvider::new(vec![SKY_SIR])))
            .with_router(Arc::new(KeywordRouter::new(db)))
            .build()
            .await
            .unwrap();
        service.create_session(Some("s".to_string())).await.unwrap();

        let asserted = service.assert_nl("s", "The sky is blue.").await.unwrap();
        assert_eq!(asserted.strategy_id, "SIR-R1-Assert");
    }

    #[tokio::test]
    async fn test_broadcast_after_assert() {
        let service = service(vec![GRASS_SIR, GRASS_SIR]).await;
        service.create_session(Some("s".to_string())).await.unwrap();

        let (subscriber, mut receiver) = crate::broadcast::Subscriber::channel();
        service.broadcaster().subscribe("s", &subscriber);

        let asserted = service.assert_nl("s", "Grass is green.").await.unwrap();
        assert_eq!(asserted.added_clauses, vec!["is_color(grass, green)."]);

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.session_id, "s");
        assert_eq!(event.new_clauses, vec!["is_color(grass, green)."]);
        assert_eq!(event.full_knowledge_base, "is_color(grass, green).");
        assert!(receiver.try_recv().is_err());

        service.broadcaster().unsubscribe("s", &subscriber);
        service.assert_nl("s", "Grass is green.").await.unwrap();
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_assert_raw_clauses_round_trip() {
        let service = service(vec![]).await;
        service.create_session(Some("s".to_string())).await.unwrap();

        let clauses = vec!["a(1).".to_string(), "b(X) :- a(X).".to_string()];
        let added = service
            .assert_raw_clauses("s", &clauses.join("\n"))
            .await
            .unwrap();
        assert_eq!(added.added_clauses, clauses);

        let kb = service.get_knowledge_base("s").await.unwrap();
        assert_eq!(logic::split_clause_strings(&kb).unwrap(), clauses);
    }

    #[tokio::test]
    async fn test_assert_raw_rejects_malformed_text() {
        let service = service(vec![]).await;
        service.create_session(Some("s".to_string())).await.unwrap();

        let err = service
            .assert_raw_clauses("s", "a(1). unterminated(2")
            .await
            .unwrap_err();
        assert_eq!(err.error_code, ErrorCode::InvalidInput);

        let err = service
            .assert_raw_clauses("s", "is_color(sky blue).")
            .await
            .unwrap_err();
        assert_eq!(err.error_code, ErrorCode::InvalidGeneratedProlog);
        assert_eq!(service.get_session("s").await.unwrap().clause_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_strategy_output_is_structured_failure() {
        let service = service(vec!["[]"]).await;
        service.create_session(Some("s".to_string())).await.unwrap();

        let err = service.assert_nl("s", "Hmm.").await.unwrap_err();
        assert_eq!(err.error_code, ErrorCode::NoFactsExtracted);
        assert_eq!(err.strategy_id.as_deref(), Some("SIR-R1-Assert"));
    }

    #[tokio::test]
    async fn test_query_uses_dynamic_ontology() {
        let service = service(vec!["planet(X).", "Mars."]).await;
        service.create_session(Some("s".to_string())).await.unwrap();

        let response = service
            .query_nl(
                "s",
                "Which planets are there?",
                QueryOptions {
                    dynamic_ontology: Some("planet(mars).".to_string()),
                    style: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(response.answer, "Mars.");
    }

    #[tokio::test]
    async fn test_query_bad_translation_is_typed() {
        // the model produces two queries where one was required
        let service = service(vec!["a(X). b(X)."]).await;
        service.create_session(Some("s".to_string())).await.unwrap();

        let err = service
            .query_nl("s", "what?", QueryOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.error_code, ErrorCode::StrategyInvalidOutput);
    }

    #[tokio::test]
    async fn test_query_syntax_error_from_reasoner() {
        let service = service(vec!["is_color(sky, X."]).await;
        service.create_session(Some("s".to_string())).await.unwrap();

        let err = service
            .query_nl("s", "what color?", QueryOptions::default())
            .await
            .unwrap_err();
        // one unterminated pseudo-clause: caught before the reasoner
        assert_eq!(err.error_code, ErrorCode::StrategyInvalidOutput);
    }

    #[tokio::test]
    async fn test_query_time_syntax_error_surfaces_as_prolog_query_syntax() {
        // splits as one terminated clause but is not a valid query
        let service = service(vec!["is_color(sky, X) :- foo."]).await;
        service.create_session(Some("s".to_string())).await.unwrap();

        let err = service
            .query_nl("s", "what color?", QueryOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.error_code, ErrorCode::PrologQuerySyntax);
        assert_eq!(err.strategy_id.as_deref(), Some("SIR-R1-Query"));
    }

    #[tokio::test]
    async fn test_explain_does_not_execute() {
        let service = service(vec!["is_color(sky, X).", "It asks for the sky's color."]).await;
        service.create_session(Some("s".to_string())).await.unwrap();

        let response = service.explain_query("s", "What color is the sky?").await.unwrap();
        assert_eq!(response.explanation, "It asks for the sky's color.");
        assert_eq!(
            response.debug_info.prolog_query.as_deref(),
            Some("is_color(sky, X).")
        );
        assert!(response.debug_info.solutions.is_none());
    }

    #[tokio::test]
    async fn test_translate_nl_to_clauses_sessionless() {
        let service = service(vec![SKY_SIR]).await;
        let translated = service
            .translate_nl_to_clauses("The sky is blue.", None)
            .await
            .unwrap();
        assert_eq!(translated.clauses, vec!["is_color(sky, blue)."]);
        assert_eq!(translated.strategy_id, "SIR-R1-Assert");
    }

    #[tokio::test]
    async fn test_translate_unknown_strategy() {
        let service = service(vec![]).await;
        let err = service
            .translate_nl_to_clauses("text", Some("Bogus"))
            .await
            .unwrap_err();
        assert_eq!(err.error_code, ErrorCode::StrategyNotFound);
    }

    #[tokio::test]
    async fn test_translate_nl_to_rules_filters_facts() {
        let sir = r#"[
            {"type": "membership", "instance": "tweety", "class": "bird"},
            {"type": "rule",
             "head": {"predicate": "can_fly", "args": ["X"]},
             "body": [{"predicate": "bird", "args": ["X"]}]}
        ]"#;
        let service = service(vec![sir, SKY_SIR]).await;

        let rules = service
            .translate_nl_to_rules("Birds fly. Tweety is a bird.")
            .await
            .unwrap();
        assert_eq!(rules.clauses, vec!["can_fly(X) :- bird(X)."]);

        // an output with no rules is a typed failure
        let err = service
            .translate_nl_to_rules("The sky is blue.")
            .await
            .unwrap_err();
        assert_eq!(err.error_code, ErrorCode::NoRulesExtracted);
    }

    #[tokio::test]
    async fn test_translate_clauses_to_nl_accepts_both_shapes() {
        let service = service(vec!["Tweety is a bird.", "Tweety is a bird."]).await;

        let from_list = service
            .translate_clauses_to_nl(vec!["bird(tweety)".to_string()], None)
            .await
            .unwrap();
        assert_eq!(from_list.explanation, "Tweety is a bird.");

        let from_text = service
            .translate_clauses_to_nl("bird(tweety).", Some("plain"))
            .await
            .unwrap();
        assert_eq!(from_text.explanation, "Tweety is a bird.");
    }

    #[tokio::test]
    async fn test_debug_level_none_hides_bundle() {
        let service = Coordinator::builder()
            .with_config(ServiceConfig::new().with_debug_level(DebugLevel::None))
            .with_provider(Arc::new(ScriptedProvider::new(vec![
                "is_color(sky, X).",
                "Blue.",
            ])))
            .build()
            .await
            .unwrap();
        service.create_session(Some("s".to_string())).await.unwrap();

        let response = service
            .query_nl("s", "what color?", QueryOptions::default())
            .await
            .unwrap();
        assert!(response.debug_info.prolog_query.is_none());
        assert!(response.debug_info.strategy_id.is_none());
    }

    #[tokio::test]
    async fn test_debug_level_verbose_includes_solutions_and_kb() {
        let service = Coordinator::builder()
            .with_config(ServiceConfig::new().with_debug_level(DebugLevel::Verbose))
            .with_provider(Arc::new(ScriptedProvider::new(vec![
                SKY_SIR,
                "is_color(sky, X).",
                "Blue.",
            ])))
            .build()
            .await
            .unwrap();
        service.create_session(Some("s".to_string())).await.unwrap();
        service.assert_nl("s", "The sky is blue.").await.unwrap();

        let response = service
            .query_nl("s", "what color?", QueryOptions::default())
            .await
            .unwrap();
        assert!(response.debug_info.solutions.is_some());
        assert!(response
            .debug_info
            .knowledge_base
            .unwrap()
            .contains("is_color(sky, blue)."));
    }

    #[tokio::test]
    async fn test_empty_inputs_rejected() {
        let service = service(vec![]).await;
        service.create_session(Some("s".to_string())).await.unwrap();

        for err in [
            service.assert_nl("s", "   ").await.unwrap_err(),
            service
                .query_nl("s", "", QueryOptions::default())
                .await
                .unwrap_err(),
            service.translate_nl_to_clauses(" ", None).await.unwrap_err(),
        ] {
            assert_eq!(err.error_code, ErrorCode::InvalidInput);
        }
    }

    #[tokio::test]
    async fn test_lexicon_summary_via_service() {
        let service = service(vec![]).await;
        service.create_session(Some("s".to_string())).await.unwrap();
        service
            .assert_raw_clauses("s", "bird(tweety). can_fly(X) :- bird(X).")
            .await
            .unwrap();

        let summary = service.get_lexicon_summary("s").await.unwrap();
        assert_eq!(summary, "Predicates in use: bird/1, can_fly/1");
    }

    #[tokio::test]
    async fn test_prompt_surface() {
        let service = service(vec![]).await;
        assert!(service.get_prompts().contains_key(prompt::LOGIC_TO_NL_ANSWER));

        let debug = service
            .debug_format_prompt(
                prompt::CLAUSES_TO_NL,
                &string_map(&[("clauses", "bird(tweety)."), ("style", "plain")]),
            )
            .unwrap();
        assert!(debug.formatted.user.contains("bird(tweety)."));

        let err = service
            .debug_format_prompt(prompt::CLAUSES_TO_NL, &string_map(&[("style", "plain")]))
            .unwrap_err();
        assert_eq!(err.error_code, ErrorCode::PromptFormattingFailed);
        assert!(err.message.contains("clauses"));
    }

    #[tokio::test]
    async fn test_service_error_wire_shape() {
        let err = ServiceError::new(Error::session_not_found("x"))
            .with_strategy("SIR-R1-Assert")
            .with_cost(CostTracker::new());
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["errorCode"], "SESSION_NOT_FOUND");
        assert!(json["strategyId"].is_string());
        assert!(json["cost"].is_object());
    }
}
