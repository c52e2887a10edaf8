//! Clause parsing and the built-in resolution engine.

mod engine;
mod term;

pub use engine::{project_solutions, solve, SolveError, SolveLimits};
pub use term::{
    parse_clause, parse_program, parse_query, predicate_indicator, split_clause_strings, Clause,
    SyntaxError, Term,
};
