//! Prompt registry with typed placeholder bindings.
//!
//! Templates are `(system, user)` text pairs using literal `{{name}}`
//! placeholders. Each template declares its variable set up front;
//! registration rejects templates whose declaration disagrees with the
//! placeholders actually present, which keeps the runtime fill path total:
//! a fill either supplies every declared variable or fails naming the first
//! missing one.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::OnceLock;

use crate::error::{Error, Result};

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{([a-zA-Z_][a-zA-Z0-9_]*)\}\}").unwrap())
}

/// Collect the placeholder names appearing in a template body.
fn placeholders_in(text: &str) -> BTreeSet<String> {
    placeholder_regex()
        .captures_iter(text)
        .map(|c| c[1].to_string())
        .collect()
}

/// A named (system, user) template pair with a declared variable schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub name: String,
    pub system: String,
    pub user: String,
    /// Declared placeholder names; must match the placeholders in the text.
    pub variables: BTreeSet<String>,
}

impl PromptTemplate {
    pub fn new(
        name: impl Into<String>,
        system: impl Into<String>,
        user: impl Into<String>,
        variables: &[&str],
    ) -> Self {
        Self {
            name: name.into(),
            system: system.into(),
            user: user.into(),
            variables: variables.iter().map(|v| v.to_string()).collect(),
        }
    }

    /// Check the declaration against the placeholders actually used.
    fn validate(&self) -> Result<()> {
        let mut used = placeholders_in(&self.system);
        used.extend(placeholders_in(&self.user));

        if used != self.variables {
            let declared: Vec<_> = self.variables.iter().cloned().collect();
            let found: Vec<_> = used.into_iter().collect();
            return Err(Error::InvalidInput(format!(
                "template `{}` declares variables [{}] but uses [{}]",
                self.name,
                declared.join(", "),
                found.join(", ")
            )));
        }
        Ok(())
    }

    /// Fill the template, failing on the first declared variable that is
    /// absent from `vars`. Unknown keys in `vars` are ignored.
    pub fn fill(&self, vars: &BTreeMap<String, String>) -> Result<FilledPrompt> {
        for variable in &self.variables {
            match vars.get(variable) {
                None => {
                    return Err(Error::PromptFormatting {
                        template: self.name.clone(),
                        message: format!("missing variable `{variable}`"),
                    })
                }
                Some(value) if value.contains("{{") => {
                    return Err(Error::PromptFormatting {
                        template: self.name.clone(),
                        message: format!("variable `{variable}` introduces nested placeholders"),
                    })
                }
                Some(_) => {}
            }
        }

        let substitute = |text: &str| {
            placeholder_regex()
                .replace_all(text, |caps: &regex::Captures<'_>| {
                    vars.get(&caps[1]).cloned().unwrap_or_default()
                })
                .into_owned()
        };

        Ok(FilledPrompt {
            system: substitute(&self.system),
            user: substitute(&self.user),
        })
    }
}

/// A template with every placeholder resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilledPrompt {
    pub system: String,
    pub user: String,
}

/// Holds static and dynamically-added templates keyed by name.
#[derive(Debug, Default)]
pub struct PromptRegistry {
    templates: HashMap<String, PromptTemplate>,
}

impl PromptRegistry {
    /// Empty registry, for hosts that supply their own template set.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry pre-loaded with the built-in translation templates.
    pub fn with_defaults() -> Self {
        let mut registry = Self::default();
        for template in default_templates() {
            registry
                .register(template)
                .expect("built-in templates are well-formed");
        }
        registry
    }

    /// Add a template; rejects duplicate names and declaration mismatches.
    pub fn register(&mut self, template: PromptTemplate) -> Result<()> {
        template.validate()?;
        if self.templates.contains_key(&template.name) {
            return Err(Error::InvalidInput(format!(
                "template `{}` is already registered",
                template.name
            )));
        }
        self.templates.insert(template.name.clone(), template);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&PromptTemplate> {
        self.templates
            .get(name)
            .ok_or_else(|| Error::PromptTemplateNotFound {
                name: name.to_string(),
            })
    }

    /// All templates, keyed by name.
    pub fn all(&self) -> &HashMap<String, PromptTemplate> {
        &self.templates
    }

    /// Fill a template by name.
    pub fn fill(&self, name: &str, vars: &BTreeMap<String, String>) -> Result<FilledPrompt> {
        self.get(name)?.fill(vars)
    }

    /// Diagnostic view of a fill: raw template, formatted output, and the
    /// variables used.
    pub fn debug_format(
        &self,
        name: &str,
        vars: &BTreeMap<String, String>,
    ) -> Result<PromptDebug> {
        let template = self.get(name)?.clone();
        let formatted = template.fill(vars)?;
        Ok(PromptDebug {
            template,
            formatted,
            vars: vars.clone(),
        })
    }
}

/// Result of [`PromptRegistry::debug_format`].
#[derive(Debug, Clone, Serialize)]
pub struct PromptDebug {
    pub template: PromptTemplate,
    pub formatted: FilledPrompt,
    pub vars: BTreeMap<String, String>,
}

// Template names used by the built-in strategies and the coordinator.
pub const NL_TO_SIR_ASSERT: &str = "NL_TO_SIR_ASSERT";
pub const NL_TO_SIR_ASSERT_FEWSHOT: &str = "NL_TO_SIR_ASSERT_FEWSHOT";
pub const NL_TO_CLAUSES_DIRECT: &str = "NL_TO_CLAUSES_DIRECT";
pub const NL_TO_QUERY: &str = "NL_TO_QUERY";
pub const NL_TO_QUERY_FEWSHOT: &str = "NL_TO_QUERY_FEWSHOT";
pub const LOGIC_TO_NL_ANSWER: &str = "LOGIC_TO_NL_ANSWER";
pub const EXPLAIN_PROLOG_QUERY: &str = "EXPLAIN_PROLOG_QUERY";
pub const CLAUSES_TO_NL: &str = "CLAUSES_TO_NL";

fn default_templates() -> Vec<PromptTemplate> {
    vec![
        PromptTemplate::new(
            NL_TO_SIR_ASSERT,
            "You translate natural language statements into a structured intermediate \
             representation (SIR) for a logic knowledge base. Reply with a JSON array of \
             records. Each record has a \"type\" field: one of membership, relation, \
             attribute, composition, definition, rule, plus the fields that type requires. \
             Use lowercase snake_case for predicates and constants and ALL_CAPS for \
             variables. Reuse predicates from the known lexicon where they fit.",
            "Statement:\n{{naturalLanguageText}}\n\nExisting facts:\n{{existingFacts}}\n\n\
             Ontology rules:\n{{ontologyRules}}\n\nKnown lexicon:\n{{lexiconSummary}}",
            &[
                "naturalLanguageText",
                "existingFacts",
                "ontologyRules",
                "lexiconSummary",
            ],
        ),
        PromptTemplate::new(
            NL_TO_SIR_ASSERT_FEWSHOT,
            "You translate natural language statements into a structured intermediate \
             representation (SIR) for a logic knowledge base. Reply with a JSON array of \
             records, each carrying a \"type\" field and that type's required fields.\n\n\
             Example: \"Tweety is a bird.\" becomes\n\
             [{\"type\": \"membership\", \"instance\": \"tweety\", \"class\": \"bird\"}]\n\
             Example: \"The sky is blue.\" becomes\n\
             [{\"type\": \"attribute\", \"predicate\": \"is_color\", \"entity\": \"sky\", \
             \"value\": \"blue\"}]\n\
             Example: \"Every bird can fly.\" becomes\n\
             [{\"type\": \"rule\", \"head\": {\"predicate\": \"can_fly\", \"args\": [\"X\"]}, \
             \"body\": [{\"predicate\": \"bird\", \"args\": [\"X\"]}]}]",
            "Statement:\n{{naturalLanguageText}}\n\nExisting facts:\n{{existingFacts}}\n\n\
             Ontology rules:\n{{ontologyRules}}\n\nKnown lexicon:\n{{lexiconSummary}}",
            &[
                "naturalLanguageText",
                "existingFacts",
                "ontologyRules",
                "lexiconSummary",
            ],
        ),
        PromptTemplate::new(
            NL_TO_CLAUSES_DIRECT,
            "You translate natural language statements directly into logic clauses. Reply \
             with a JSON array of clause strings, each a single fact or rule terminated by \
             a period. Use lowercase snake_case predicates and constants and ALL_CAPS \
             variables. Reuse predicates from the known lexicon where they fit.",
            "Statement:\n{{naturalLanguageText}}\n\nExisting facts:\n{{existingFacts}}\n\n\
             Ontology rules:\n{{ontologyRules}}\n\nKnown lexicon:\n{{lexiconSummary}}",
            &[
                "naturalLanguageText",
                "existingFacts",
                "ontologyRules",
                "lexiconSummary",
            ],
        ),
        PromptTemplate::new(
            NL_TO_QUERY,
            "You translate a natural language question into a single logic query against \
             the given knowledge base. Reply with only the query, terminated by a period. \
             Use variables (ALL_CAPS) for the unknowns the question asks about, and prefer \
             predicates that already occur in the knowledge base.",
            "Question:\n{{naturalLanguageQuestion}}\n\nKnowledge base:\n{{existingFacts}}\n\n\
             Ontology rules:\n{{ontologyRules}}\n\nKnown lexicon:\n{{lexiconSummary}}",
            &[
                "naturalLanguageQuestion",
                "existingFacts",
                "ontologyRules",
                "lexiconSummary",
            ],
        ),
        PromptTemplate::new(
            NL_TO_QUERY_FEWSHOT,
            "You translate a natural language question into a single logic query against \
             the given knowledge base. Reply with only the query, terminated by a period.\n\n\
             Example: \"What color is the sky?\" over a KB containing is_color/2 becomes\n\
             is_color(sky, X).\n\
             Example: \"Can Tweety fly?\" becomes\n\
             can_fly(tweety).",
            "Question:\n{{naturalLanguageQuestion}}\n\nKnowledge base:\n{{existingFacts}}\n\n\
             Ontology rules:\n{{ontologyRules}}\n\nKnown lexicon:\n{{lexiconSummary}}",
            &[
                "naturalLanguageQuestion",
                "existingFacts",
                "ontologyRules",
                "lexiconSummary",
            ],
        ),
        PromptTemplate::new(
            LOGIC_TO_NL_ANSWER,
            "You turn the solutions of a logic query into a natural language answer to the \
             user's question. Answer concisely in the requested style. If the solutions are \
             empty or false, say the knowledge base cannot answer the question.",
            "Question:\n{{question}}\n\nQuery solutions (JSON):\n{{solutionsJson}}\n\n\
             Style: {{style}}",
            &["question", "solutionsJson", "style"],
        ),
        PromptTemplate::new(
            EXPLAIN_PROLOG_QUERY,
            "You explain what a logic query asks of a knowledge base: which predicates it \
             touches, what its variables stand for, and what a solution would mean. Do not \
             execute the query; describe it.",
            "Question:\n{{question}}\n\nQuery:\n{{prologQuery}}\n\nKnowledge base:\n{{knowledgeBase}}",
            &["question", "prologQuery", "knowledgeBase"],
        ),
        PromptTemplate::new(
            CLAUSES_TO_NL,
            "You translate logic clauses into clear natural language. Describe what the \
             facts and rules say, in the requested style, without logic jargon.",
            "Clauses:\n{{clauses}}\n\nStyle: {{style}}",
            &["clauses", "style"],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn vars(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_register_cleanly() {
        let registry = PromptRegistry::with_defaults();
        assert!(registry.get(NL_TO_SIR_ASSERT).is_ok());
        assert!(registry.get(LOGIC_TO_NL_ANSWER).is_ok());
        assert_eq!(registry.all().len(), 8);
    }

    #[test]
    fn test_fill_substitutes_all_placeholders() {
        let template = PromptTemplate::new(
            "T",
            "sys {{a}}",
            "user {{a}} and {{b}}",
            &["a", "b"],
        );
        let filled = template.fill(&vars(&[("a", "1"), ("b", "2"), ("extra", "x")])).unwrap();
        assert_eq!(filled.system, "sys 1");
        assert_eq!(filled.user, "user 1 and 2");
    }

    #[test]
    fn test_fill_names_first_missing_variable() {
        let template = PromptTemplate::new("T", "{{a}}", "{{b}} {{c}}", &["a", "b", "c"]);
        let err = template.fill(&vars(&[("a", "1"), ("c", "3")])).unwrap_err();
        match err {
            Error::PromptFormatting { template, message } => {
                assert_eq!(template, "T");
                assert!(message.contains("`b`"), "message was: {message}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_fill_rejects_nested_placeholders() {
        let template = PromptTemplate::new("T", "{{a}}", "u", &["a"]);
        let err = template.fill(&vars(&[("a", "sneaky {{b}}")])).unwrap_err();
        assert!(matches!(err, Error::PromptFormatting { .. }));
    }

    #[test]
    fn test_registration_rejects_declaration_mismatch() {
        let mut registry = PromptRegistry::empty();
        // declares `a`, uses `b`
        let err = registry
            .register(PromptTemplate::new("T", "{{b}}", "u", &["a"]))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_registration_rejects_duplicates() {
        let mut registry = PromptRegistry::empty();
        registry
            .register(PromptTemplate::new("T", "s", "u", &[]))
            .unwrap();
        assert!(registry
            .register(PromptTemplate::new("T", "s", "u", &[]))
            .is_err());
    }

    #[test]
    fn test_unknown_template_is_typed_error() {
        let registry = PromptRegistry::with_defaults();
        let err = registry.fill("NOPE", &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, Error::PromptTemplateNotFound { .. }));
    }

    #[test]
    fn test_debug_format_round_trip() {
        let registry = PromptRegistry::with_defaults();
        let debug = registry
            .debug_format(
                CLAUSES_TO_NL,
                &vars(&[("clauses", "bird(tweety)."), ("style", "formal")]),
            )
            .unwrap();
        assert!(debug.formatted.user.contains("bird(tweety)."));
        assert!(debug.template.user.contains("{{clauses}}"));
        assert_eq!(debug.vars.len(), 2);
    }
}
