//! The strategy executor: a deterministic interpreter over node DAGs.
//!
//! All pipeline state lives in the per-run [`PipelineContext`]; the executor
//! itself holds only handles to the LLM gateway, prompt registry, and
//! reasoner gateway. Nodes run in definition order (the node list is its own
//! topological order) and each writes exactly one fresh context name.

use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::debug;

use crate::error::{Error, Result};
use crate::llm::{CostTracker, GenerateRequest, LlmGateway};
use crate::prompt::PromptRegistry;
use crate::reasoner::ReasonerGateway;
use crate::sir;

use super::types::{Strategy, StrategyNode};

/// Context names the coordinator seeds before a run.
pub const CTX_NL_TEXT: &str = "naturalLanguageText";
pub const CTX_NL_QUESTION: &str = "naturalLanguageQuestion";
pub const CTX_EXISTING_FACTS: &str = "existingFacts";
pub const CTX_ONTOLOGY_RULES: &str = "ontologyRules";
pub const CTX_LEXICON_SUMMARY: &str = "lexiconSummary";
pub const CTX_LLM_MODEL_ID: &str = "llm_model_id";

/// The shared name/value map one pipeline run reads and extends.
#[derive(Debug, Default)]
pub struct PipelineContext {
    values: HashMap<String, Value>,
}

/// Inputs common to assert and query seeds.
#[derive(Debug, Clone, Default)]
pub struct ContextSeed {
    pub existing_facts: String,
    pub ontology_rules: String,
    pub lexicon_summary: String,
    pub llm_model_id: String,
}

impl PipelineContext {
    /// Seed a context for an assert run.
    pub fn for_assert(text: &str, seed: &ContextSeed) -> Self {
        let mut context = Self::default();
        context.seed(CTX_NL_TEXT, text, seed);
        context
    }

    /// Seed a context for a query run.
    pub fn for_query(question: &str, seed: &ContextSeed) -> Self {
        let mut context = Self::default();
        context.seed(CTX_NL_QUESTION, question, seed);
        context
    }

    fn seed(&mut self, input_name: &str, input: &str, seed: &ContextSeed) {
        self.values
            .insert(input_name.to_string(), Value::String(input.to_string()));
        self.values.insert(
            CTX_EXISTING_FACTS.to_string(),
            Value::String(seed.existing_facts.clone()),
        );
        self.values.insert(
            CTX_ONTOLOGY_RULES.to_string(),
            Value::String(seed.ontology_rules.clone()),
        );
        self.values.insert(
            CTX_LEXICON_SUMMARY.to_string(),
            Value::String(seed.lexicon_summary.clone()),
        );
        self.values.insert(
            CTX_LLM_MODEL_ID.to_string(),
            Value::String(seed.llm_model_id.clone()),
        );
    }

    /// Bind a fresh name. Names are unique per execution.
    pub fn insert(&mut self, name: &str, value: Value) -> Result<()> {
        if self.values.contains_key(name) {
            return Err(Error::execution(format!(
                "context name `{name}` is already bound"
            )));
        }
        self.values.insert(name.to_string(), value);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&Value> {
        self.values
            .get(name)
            .ok_or_else(|| Error::execution(format!("context name `{name}` is not bound")))
    }

    fn get_str(&self, name: &str) -> Result<&str> {
        self.get(name)?.as_str().ok_or_else(|| {
            Error::execution(format!("context name `{name}` is not a string"))
        })
    }

    fn get_string_array(&self, name: &str) -> Result<Vec<String>> {
        let value = self.get(name)?;
        let items = value.as_array().ok_or_else(|| {
            Error::execution(format!("context name `{name}` is not an array"))
        })?;
        items
            .iter()
            .map(|item| {
                item.as_str().map(str::to_string).ok_or_else(|| {
                    Error::execution(format!(
                        "context name `{name}` contains a non-string element"
                    ))
                })
            })
            .collect()
    }
}

/// A pipeline's result value.
#[derive(Debug, Clone, PartialEq)]
pub enum StrategyOutput {
    /// Ordered clause strings (Assert strategies)
    Clauses(Vec<String>),
    /// A single query string (Query strategies)
    Query(String),
}

/// Render a context value into a prompt binding string.
fn binding_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => serde_json::to_string_pretty(other).unwrap_or_default(),
    }
}

/// Strip a Markdown code fence (```json ... ``` or ``` ... ```), if the
/// whole payload is fenced; otherwise return the input unchanged.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(rest) = rest.strip_suffix("```") else {
        return trimmed;
    };
    // drop the info string ("json", "prolog", ...) on the opening fence line
    match rest.split_once('\n') {
        Some((_, body)) => body.trim(),
        None => rest.trim(),
    }
}

/// Interprets strategy DAGs using the LLM gateway, prompt registry, and
/// reasoner gateway as primitives.
pub struct StrategyExecutor {
    llm: Arc<LlmGateway>,
    prompts: Arc<PromptRegistry>,
    reasoner: Arc<ReasonerGateway>,
}

impl StrategyExecutor {
    pub fn new(
        llm: Arc<LlmGateway>,
        prompts: Arc<PromptRegistry>,
        reasoner: Arc<ReasonerGateway>,
    ) -> Self {
        Self {
            llm,
            prompts,
            reasoner,
        }
    }

    /// Run `strategy` over `context`, accumulating cost into `costs`.
    ///
    /// The tracker is written as calls complete, so when a later node fails
    /// the caller still sees everything spent up to the failure.
    pub async fn run(
        &self,
        strategy: &Strategy,
        mut context: PipelineContext,
        costs: &mut CostTracker,
    ) -> Result<StrategyOutput> {
        debug!(strategy = %strategy.id, nodes = strategy.nodes.len(), "executing strategy");

        for node in &strategy.nodes {
            match node {
                StrategyNode::LlmCall {
                    prompt_name,
                    input_bindings,
                    output_name,
                } => {
                    let mut vars = BTreeMap::new();
                    for (placeholder, context_name) in input_bindings {
                        let value = context.get(context_name)?;
                        vars.insert(placeholder.clone(), binding_string(value));
                    }
                    let filled = self.prompts.fill(prompt_name, &vars)?;
                    let generation = self
                        .llm
                        .generate(GenerateRequest::new(filled.system, filled.user), costs)
                        .await?;
                    context.insert(output_name, Value::String(generation.text))?;
                }
                StrategyNode::ParseJson {
                    input,
                    output_name,
                    schema_tag: _,
                } => {
                    let raw = context.get_str(input)?;
                    let body = strip_code_fence(raw);
                    let parsed: Value =
                        serde_json::from_str(body).map_err(|e| Error::JsonParsing {
                            message: e.to_string(),
                            snippet: raw.chars().take(200).collect(),
                        })?;
                    context.insert(output_name, parsed)?;
                }
                StrategyNode::SirTransform { input, output_name } => {
                    let records = context.get(input)?;
                    let clauses = sir::records_to_clauses(records)?;
                    let value = Value::Array(
                        clauses.into_iter().map(Value::String).collect(),
                    );
                    context.insert(output_name, value)?;
                }
                StrategyNode::ValidateClauses { input } => {
                    let clauses = context.get_string_array(input)?;
                    self.reasoner.validate_all(&clauses).await?;
                }
                StrategyNode::Return { input } => {
                    let value = context.get(input)?;
                    return self.shape_output(strategy, value);
                }
            }
        }

        Err(Error::StrategyInvalidOutput {
            strategy_id: strategy.id.clone(),
            message: "strategy has no Return node".to_string(),
        })
    }

    fn shape_output(&self, strategy: &Strategy, value: &Value) -> Result<StrategyOutput> {
        use super::types::Operation;

        let invalid = |message: String| Error::StrategyInvalidOutput {
            strategy_id: strategy.id.clone(),
            message,
        };

        match strategy.operation {
            Operation::Assert => {
                let items = value
                    .as_array()
                    .ok_or_else(|| invalid("expected an array of clause strings".to_string()))?;
                let clauses = items
                    .iter()
                    .map(|item| {
                        item.as_str()
                            .filter(|s| !s.trim().is_empty())
                            .map(|s| s.trim().to_string())
                            .ok_or_else(|| {
                                invalid("clause array contains a non-string or empty element"
                                    .to_string())
                            })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(StrategyOutput::Clauses(clauses))
            }
            Operation::Query => {
                let query = value
                    .as_str()
                    .map(|s| strip_code_fence(s).trim().to_string())
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| invalid("expected a single query string".to_string()))?;
                Ok(StrategyOutput::Query(query))
            }
        }
    }
}
