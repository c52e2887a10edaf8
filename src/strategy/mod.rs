//! Translation strategies: definitions, registry, and the executor.

mod executor;
mod registry;
mod types;

pub use executor::{
    ContextSeed, PipelineContext, StrategyExecutor, StrategyOutput, CTX_EXISTING_FACTS,
    CTX_LEXICON_SUMMARY, CTX_LLM_MODEL_ID, CTX_NL_QUESTION, CTX_NL_TEXT, CTX_ONTOLOGY_RULES,
};
pub use registry::{builtin_strategies, StrategyRegistry};
pub use types::{Operation, Strategy, StrategyNode};
