//! # nlr-core
//!
//! Core of a neurosymbolic reasoning service: clients assert natural
//! language facts that are translated into logic clauses, and ask natural
//! language questions that are translated into logic queries, executed
//! against the session's knowledge base plus mounted ontologies, and
//! answered in natural language.
//!
//! ## Core Components
//!
//! - **Coordinator**: the public facade composing everything below
//! - **Strategy Executor**: dataflow interpreter over translation DAGs
//! - **Session Store**: per-session clause sets, memory- or file-backed
//! - **Reasoner Gateway**: validates clauses and executes logic queries
//! - **Input Router**: recommends a strategy per input from past results
//!
//! ## Example
//!
//! ```rust,ignore
//! use nlr_core::{Coordinator, QueryOptions, ServiceConfig};
//!
//! let service = Coordinator::from_config(ServiceConfig::default()).await?;
//! let session = service.create_session(None).await?;
//!
//! service.assert_nl(&session.id, "The sky is blue.").await?;
//! let response = service
//!     .query_nl(&session.id, "What color is the sky?", QueryOptions::default())
//!     .await?;
//! println!("{}", response.answer);
//! ```

pub mod broadcast;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod llm;
pub mod logic;
pub mod ontology;
pub mod perf;
pub mod prompt;
pub mod reasoner;
pub mod router;
pub mod session;
pub mod sir;
pub mod strategy;

// Re-exports for convenience
pub use broadcast::{KbUpdate, KbUpdateBroadcaster, Subscriber};
pub use config::{
    DebugLevel, LlmConfig, ReasonerConfig, ServiceConfig, SessionStoreConfig, SessionStoreKind,
};
pub use coordinator::{
    AssertResponse, ClausesInput, Coordinator, CoordinatorBuilder, DebugInfo, ExplainResponse,
    ExplanationResponse, QueryOptions, QueryResponse, RawAssertResponse, ServiceError,
    ServiceResult, TranslateResponse,
};
pub use error::{Error, ErrorCode, Result};
pub use llm::{
    AnthropicProvider, CostTracker, GenerateRequest, Generation, LlmGateway, LlmProvider,
    ModelPricing, OpenAiProvider, ProviderConfig, TokenUsage,
};
pub use ontology::{MemoryOntologies, NamedOntology, OntologySource};
pub use perf::{PerformanceDb, StrategyScore};
pub use prompt::{FilledPrompt, PromptDebug, PromptRegistry, PromptTemplate};
pub use reasoner::{
    BuiltinReasoner, ClauseCheck, ReasonerBackend, ReasonerGateway, Solutions,
};
pub use router::{
    archetype_catalog, classify_keyword, Archetype, InputKind, InputRouter, KeywordRouter,
    SemanticRouter,
};
pub use session::{FileSessionStore, MemorySessionStore, Session, SessionStore};
pub use strategy::{
    builtin_strategies, ContextSeed, Operation, PipelineContext, Strategy, StrategyExecutor,
    StrategyNode, StrategyOutput, StrategyRegistry,
};
