//! Depth-bounded SLD resolution over parsed clauses.
//!
//! Deliberately small: unification, backtracking search, and the handful of
//! builtins the translation pipeline's output actually uses (`true`, `fail`,
//! `=`, `\=`, `\+`). Solution order is deterministic: clause order in the
//! program, goal order in the query.

use std::collections::HashMap;

use super::term::{Clause, Term};

/// Search limits. The step budget bounds runaway recursion (for example a
/// left-recursive rule), the solution cap bounds enumeration.
#[derive(Debug, Clone, Copy)]
pub struct SolveLimits {
    pub max_steps: usize,
    pub max_solutions: usize,
}

impl Default for SolveLimits {
    fn default() -> Self {
        Self {
            max_steps: 100_000,
            max_solutions: 256,
        }
    }
}

/// Why a solve run gave up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SolveError {
    StepLimitExceeded { max_steps: usize },
    UnknownBuiltin { indicator: String },
}

impl std::fmt::Display for SolveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StepLimitExceeded { max_steps } => {
                write!(f, "inference step limit exceeded ({max_steps})")
            }
            Self::UnknownBuiltin { indicator } => {
                write!(f, "unknown predicate or builtin: {indicator}")
            }
        }
    }
}

impl std::error::Error for SolveError {}

type Bindings = HashMap<String, Term>;

/// Resolve a variable chain to its current value.
fn walk(term: &Term, bindings: &Bindings) -> Term {
    let mut current = term.clone();
    while let Term::Var(name) = &current {
        match bindings.get(name) {
            Some(next) => current = next.clone(),
            None => break,
        }
    }
    current
}

/// Fully substitute bindings through a term.
fn resolve(term: &Term, bindings: &Bindings) -> Term {
    let walked = walk(term, bindings);
    match walked {
        Term::Compound(name, args) => {
            Term::Compound(name, args.iter().map(|a| resolve(a, bindings)).collect())
        }
        Term::List(items, tail) => {
            let items: Vec<Term> = items.iter().map(|i| resolve(i, bindings)).collect();
            match tail {
                None => Term::List(items, None),
                Some(tail) => match resolve(&tail, bindings) {
                    // flatten a resolved list tail into the elements
                    Term::List(mut more, tail2) => {
                        let mut all = items;
                        all.append(&mut more);
                        Term::List(all, tail2)
                    }
                    other => Term::List(items, Some(Box::new(other))),
                },
            }
        }
        other => other,
    }
}

fn unify(a: &Term, b: &Term, bindings: &mut Bindings) -> bool {
    let a = walk(a, bindings);
    let b = walk(b, bindings);
    match (&a, &b) {
        (Term::Var(x), Term::Var(y)) if x == y => true,
        (Term::Var(x), _) => {
            bindings.insert(x.clone(), b);
            true
        }
        (_, Term::Var(y)) => {
            bindings.insert(y.clone(), a);
            true
        }
        (Term::Atom(x), Term::Atom(y)) => x == y,
        (Term::Int(x), Term::Int(y)) => x == y,
        (Term::Float(x), Term::Float(y)) => x == y,
        (Term::Str(x), Term::Str(y)) => x == y,
        (Term::Compound(f, xs), Term::Compound(g, ys)) => {
            f == g && xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| unify(x, y, bindings))
        }
        (Term::List(_, _), Term::List(_, _)) => unify_lists(&a, &b, bindings),
        _ => false,
    }
}

/// Unify two (possibly partial) lists element by element.
fn unify_lists(a: &Term, b: &Term, bindings: &mut Bindings) -> bool {
    let (a_items, a_tail) = match a {
        Term::List(items, tail) => (items.as_slice(), tail.as_deref()),
        _ => return false,
    };
    let (b_items, b_tail) = match b {
        Term::List(items, tail) => (items.as_slice(), tail.as_deref()),
        _ => return false,
    };

    let common = a_items.len().min(b_items.len());
    for (x, y) in a_items[..common].iter().zip(&b_items[..common]) {
        if !unify(x, y, bindings) {
            return false;
        }
    }

    let rest_of = |items: &[Term], tail: Option<&Term>| -> Term {
        if items.is_empty() {
            tail.cloned().unwrap_or(Term::List(Vec::new(), None))
        } else {
            Term::List(items.to_vec(), tail.map(|t| Box::new(t.clone())))
        }
    };
    let a_rest = rest_of(&a_items[common..], a_tail);
    let b_rest = rest_of(&b_items[common..], b_tail);
    match (&a_rest, &b_rest) {
        (Term::List(x, None), Term::List(y, None)) if x.is_empty() && y.is_empty() => true,
        _ => unify(&a_rest, &b_rest, bindings),
    }
}

/// Rename clause variables apart with a unique suffix.
fn rename_clause(clause: &Clause, counter: &mut u64) -> Clause {
    *counter += 1;
    let suffix = *counter;
    let mut head = clause.head.clone();
    let mut body = clause.body.clone();
    rename_term(&mut head, suffix);
    for goal in &mut body {
        rename_term(goal, suffix);
    }
    Clause { head, body }
}

fn rename_term(term: &mut Term, suffix: u64) {
    match term {
        Term::Var(name) => *name = format!("{name}#{suffix}"),
        Term::Compound(_, args) => {
            for arg in args {
                rename_term(arg, suffix);
            }
        }
        Term::List(items, tail) => {
            for item in items {
                rename_term(item, suffix);
            }
            if let Some(tail) = tail {
                rename_term(tail, suffix);
            }
        }
        _ => {}
    }
}

/// Run a goal conjunction against a program.
///
/// Returns one `Bindings` per solution, restricted later by the caller to
/// the variables it cares about.
pub fn solve(
    program: &[Clause],
    goals: &[Term],
    limits: SolveLimits,
) -> Result<Vec<Bindings>, SolveError> {
    let mut solutions = Vec::new();
    let mut steps = 0usize;
    let mut counter = 0u64;
    solve_goals(
        program,
        goals,
        Bindings::new(),
        &mut steps,
        &mut counter,
        limits,
        &mut solutions,
    )?;
    Ok(solutions)
}

#[allow(clippy::too_many_arguments)]
fn solve_goals(
    program: &[Clause],
    goals: &[Term],
    bindings: Bindings,
    steps: &mut usize,
    counter: &mut u64,
    limits: SolveLimits,
    solutions: &mut Vec<Bindings>,
) -> Result<(), SolveError> {
    if solutions.len() >= limits.max_solutions {
        return Ok(());
    }
    let Some((goal, rest)) = goals.split_first() else {
        solutions.push(bindings);
        return Ok(());
    };

    *steps += 1;
    if *steps > limits.max_steps {
        return Err(SolveError::StepLimitExceeded {
            max_steps: limits.max_steps,
        });
    }

    let goal = walk(goal, &bindings);
    match &goal {
        Term::Atom(name) if name == "true" => {
            return solve_goals(program, rest, bindings, steps, counter, limits, solutions)
        }
        Term::Atom(name) if name == "fail" || name == "false" => return Ok(()),
        Term::Compound(name, args) if name == "=" && args.len() == 2 => {
            let mut attempt = bindings.clone();
            if unify(&args[0], &args[1], &mut attempt) {
                return solve_goals(program, rest, attempt, steps, counter, limits, solutions);
            }
            return Ok(());
        }
        Term::Compound(name, args) if name == "\\=" && args.len() == 2 => {
            let mut attempt = bindings.clone();
            if !unify(&args[0], &args[1], &mut attempt) {
                return solve_goals(program, rest, bindings, steps, counter, limits, solutions);
            }
            return Ok(());
        }
        Term::Compound(name, args) if name == "\\+" && args.len() == 1 => {
            let mut sub = Vec::new();
            let sub_limits = SolveLimits {
                max_solutions: 1,
                ..limits
            };
            solve_goals(
                program,
                &[args[0].clone()],
                bindings.clone(),
                steps,
                counter,
                sub_limits,
                &mut sub,
            )?;
            if sub.is_empty() {
                return solve_goals(program, rest, bindings, steps, counter, limits, solutions);
            }
            return Ok(());
        }
        _ => {}
    }

    let Some((functor, arity)) = goal.indicator() else {
        return Err(SolveError::UnknownBuiltin {
            indicator: goal.to_string(),
        });
    };

    for clause in program {
        let matches = clause
            .head
            .indicator()
            .map_or(false, |(f, a)| f == functor && a == arity);
        if !matches {
            continue;
        }
        let renamed = rename_clause(clause, counter);
        let mut attempt = bindings.clone();
        if unify(&goal, &renamed.head, &mut attempt) {
            let mut next: Vec<Term> = renamed.body;
            next.extend_from_slice(rest);
            solve_goals(program, &next, attempt, steps, counter, limits, solutions)?;
            if solutions.len() >= limits.max_solutions {
                return Ok(());
            }
        }
    }
    Ok(())
}

/// Project each raw solution onto the query's own variables, fully resolved.
pub fn project_solutions(
    goals: &[Term],
    raw: &[Bindings],
) -> Vec<Vec<(String, Term)>> {
    let mut vars = Vec::new();
    for goal in goals {
        goal.collect_vars(&mut vars);
    }
    // leading-underscore variables are "don't care" and never reported
    vars.retain(|v| !v.starts_with('_'));

    raw.iter()
        .map(|bindings| {
            vars.iter()
                .map(|v| (v.clone(), resolve(&Term::Var(v.clone()), bindings)))
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::term::{parse_program, parse_query};
    use pretty_assertions::assert_eq;

    fn run(program: &str, query: &str) -> Vec<Vec<(String, Term)>> {
        let program = parse_program(program).unwrap();
        let goals = parse_query(query).unwrap();
        let raw = solve(&program, &goals, SolveLimits::default()).unwrap();
        project_solutions(&goals, &raw)
    }

    #[test]
    fn test_fact_lookup() {
        let solutions = run("is_color(sky, blue).", "is_color(sky, X).");
        assert_eq!(solutions.len(), 1);
        assert_eq!(solutions[0][0], ("X".to_string(), Term::Atom("blue".into())));
    }

    #[test]
    fn test_ground_query() {
        let solutions = run("bird(tweety).", "bird(tweety).");
        assert_eq!(solutions.len(), 1);
        assert!(solutions[0].is_empty());

        let solutions = run("bird(tweety).", "bird(felix).");
        assert!(solutions.is_empty());
    }

    #[test]
    fn test_rule_chaining() {
        let program = "human(socrates). mortal(X) :- human(X).";
        let solutions = run(program, "mortal(Who).");
        assert_eq!(solutions.len(), 1);
        assert_eq!(
            solutions[0][0],
            ("Who".to_string(), Term::Atom("socrates".into()))
        );
    }

    #[test]
    fn test_solution_order_follows_clause_order() {
        let program = "likes(mary, wine). likes(mary, code). likes(john, code).";
        let solutions = run(program, "likes(mary, X).");
        let values: Vec<String> = solutions
            .iter()
            .map(|s| s[0].1.to_string())
            .collect();
        assert_eq!(values, vec!["wine", "code"]);
    }

    #[test]
    fn test_conjunction() {
        let program = "likes(mary, wine). likes(john, wine). rich(john).";
        let solutions = run(program, "likes(P, wine), rich(P).");
        assert_eq!(solutions.len(), 1);
        assert_eq!(solutions[0][0].1, Term::Atom("john".into()));
    }

    #[test]
    fn test_negation_as_failure() {
        let program = "bird(tweety). bird(pingu). penguin(pingu). \
                       can_fly(X) :- bird(X), \\+ penguin(X).";
        let solutions = run(program, "can_fly(X).");
        assert_eq!(solutions.len(), 1);
        assert_eq!(solutions[0][0].1, Term::Atom("tweety".into()));
    }

    #[test]
    fn test_unification_builtins() {
        let solutions = run("value(a). value(b).", "value(X), X \\= a.");
        assert_eq!(solutions.len(), 1);
        assert_eq!(solutions[0][0].1, Term::Atom("b".into()));

        let solutions = run("", "X = blue.");
        assert_eq!(solutions.len(), 1);
        assert_eq!(solutions[0][0].1, Term::Atom("blue".into()));
    }

    #[test]
    fn test_list_unification() {
        let program = "composed_of(water, [hydrogen, oxygen]).";
        let solutions = run(program, "composed_of(water, [A, B]).");
        assert_eq!(solutions.len(), 1);
        assert_eq!(solutions[0][0].1, Term::Atom("hydrogen".into()));
        assert_eq!(solutions[0][1].1, Term::Atom("oxygen".into()));

        let solutions = run(program, "composed_of(water, [H | T]).");
        assert_eq!(solutions[0][0].1, Term::Atom("hydrogen".into()));
        assert_eq!(
            solutions[0][1].1,
            Term::List(vec![Term::Atom("oxygen".into())], None)
        );
    }

    #[test]
    fn test_recursive_rules() {
        let program = "parent(a, b). parent(b, c). parent(c, d). \
                       ancestor(X, Y) :- parent(X, Y). \
                       ancestor(X, Y) :- parent(X, Z), ancestor(Z, Y).";
        let solutions = run(program, "ancestor(a, X).");
        let values: Vec<String> = solutions.iter().map(|s| s[0].1.to_string()).collect();
        assert_eq!(values, vec!["b", "c", "d"]);
    }

    #[test]
    fn test_step_limit_stops_left_recursion() {
        let program = parse_program("loop(X) :- loop(X). loop(a).").unwrap();
        let goals = parse_query("loop(Z).").unwrap();
        let err = solve(
            &program,
            &goals,
            SolveLimits {
                max_steps: 1000,
                max_solutions: 16,
            },
        )
        .unwrap_err();
        assert!(matches!(err, SolveError::StepLimitExceeded { .. }));
    }

    #[test]
    fn test_underscore_vars_not_reported() {
        let solutions = run("pair(a, b).", "pair(X, _Y).");
        assert_eq!(solutions.len(), 1);
        assert_eq!(solutions[0].len(), 1);
        assert_eq!(solutions[0][0].0, "X");
    }
}
