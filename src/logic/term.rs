//! Terms, clauses, and the clause-text parser.
//!
//! The parser accepts the Prolog subset the translation pipeline emits:
//! atoms (bare or quoted), variables, integers, floats, double-quoted
//! strings, lists with optional `|` tails, compound terms, `:-` rules,
//! comma conjunction, `\+` negation, and `=` / `\=` goals. `%` comments run
//! to end of line.

use serde::Serialize;
use std::fmt;

/// A syntax error with the character position it was detected at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyntaxError {
    pub position: usize,
    pub message: String,
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at position {}", self.message, self.position)
    }
}

impl std::error::Error for SyntaxError {}

/// A logic term.
#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    Atom(String),
    Var(String),
    Int(i64),
    Float(f64),
    Str(String),
    Compound(String, Vec<Term>),
    /// Proper or partial list: elements plus an optional tail term.
    List(Vec<Term>, Option<Box<Term>>),
}

impl Term {
    /// Functor name and arity, for callable terms.
    pub fn indicator(&self) -> Option<(&str, usize)> {
        match self {
            Term::Atom(name) => Some((name, 0)),
            Term::Compound(name, args) => Some((name, args.len())),
            _ => None,
        }
    }

    /// Whether the term contains no variables.
    pub fn is_ground(&self) -> bool {
        match self {
            Term::Var(_) => false,
            Term::Atom(_) | Term::Int(_) | Term::Float(_) | Term::Str(_) => true,
            Term::Compound(_, args) => args.iter().all(Term::is_ground),
            Term::List(items, tail) => {
                items.iter().all(Term::is_ground)
                    && tail.as_ref().map_or(true, |t| t.is_ground())
            }
        }
    }

    /// Collect variable names in first-appearance order.
    pub fn collect_vars(&self, out: &mut Vec<String>) {
        match self {
            Term::Var(name) => {
                if !out.iter().any(|v| v == name) {
                    out.push(name.clone());
                }
            }
            Term::Compound(_, args) => {
                for arg in args {
                    arg.collect_vars(out);
                }
            }
            Term::List(items, tail) => {
                for item in items {
                    item.collect_vars(out);
                }
                if let Some(tail) = tail {
                    tail.collect_vars(out);
                }
            }
            _ => {}
        }
    }
}

fn atom_needs_quotes(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {
            !chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => true,
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Atom(name) => {
                if atom_needs_quotes(name) {
                    write!(f, "'{}'", name.replace('\\', "\\\\").replace('\'', "\\'"))
                } else {
                    f.write_str(name)
                }
            }
            Term::Var(name) => f.write_str(name),
            Term::Int(n) => write!(f, "{n}"),
            Term::Float(x) => write!(f, "{x}"),
            Term::Str(s) => write!(f, "\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")),
            Term::Compound(name, args) if name == "\\+" && args.len() == 1 => {
                write!(f, "\\+ {}", args[0])
            }
            Term::Compound(name, args) if (name == "=" || name == "\\=") && args.len() == 2 => {
                write!(f, "{} {} {}", args[0], name, args[1])
            }
            Term::Compound(name, args) => {
                if atom_needs_quotes(name) {
                    write!(f, "'{}'(", name.replace('\\', "\\\\").replace('\'', "\\'"))?;
                } else {
                    write!(f, "{name}(")?;
                }
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(")")
            }
            Term::List(items, tail) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                if let Some(tail) = tail {
                    write!(f, " | {tail}")?;
                }
                f.write_str("]")
            }
        }
    }
}

/// One fact or rule. Facts have an empty body.
#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    pub head: Term,
    pub body: Vec<Term>,
}

impl Clause {
    pub fn fact(head: Term) -> Self {
        Self { head, body: Vec::new() }
    }

    pub fn is_fact(&self) -> bool {
        self.body.is_empty()
    }
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.head)?;
        if !self.body.is_empty() {
            f.write_str(" :- ")?;
            for (i, goal) in self.body.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{goal}")?;
            }
        }
        f.write_str(".")
    }
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn new(text: &str) -> Self {
        Self {
            chars: text.chars().collect(),
            pos: 0,
        }
    }

    fn error(&self, message: impl Into<String>) -> SyntaxError {
        SyntaxError {
            position: self.pos,
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn skip_ws(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.pos += 1;
            } else if c == '%' {
                while let Some(c) = self.peek() {
                    self.pos += 1;
                    if c == '\n' {
                        break;
                    }
                }
            } else {
                break;
            }
        }
    }

    fn eat(&mut self, expected: char) -> Result<(), SyntaxError> {
        self.skip_ws();
        match self.peek() {
            Some(c) if c == expected => {
                self.pos += 1;
                Ok(())
            }
            Some(c) => Err(self.error(format!("expected `{expected}`, found `{c}`"))),
            None => Err(self.error(format!("expected `{expected}`, found end of input"))),
        }
    }

    fn accept(&mut self, expected: char) -> bool {
        self.skip_ws();
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn accept_str(&mut self, expected: &str) -> bool {
        self.skip_ws();
        let chars: Vec<char> = expected.chars().collect();
        if self.chars[self.pos..].starts_with(&chars) {
            self.pos += chars.len();
            true
        } else {
            false
        }
    }

    fn ident(&mut self) -> String {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                self.pos += 1;
            } else {
                break;
            }
        }
        self.chars[start..self.pos].iter().collect()
    }

    fn quoted(&mut self, delim: char) -> Result<String, SyntaxError> {
        // opening delimiter already consumed
        let mut out = String::new();
        loop {
            match self.bump() {
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some(c) => out.push(c),
                    None => return Err(self.error("unterminated escape")),
                },
                Some(c) if c == delim => return Ok(out),
                Some(c) => out.push(c),
                None => return Err(self.error(format!("unterminated `{delim}` literal"))),
            }
        }
    }

    fn number(&mut self) -> Result<Term, SyntaxError> {
        let start = self.pos;
        if self.peek() == Some('-') {
            self.pos += 1;
        }
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.pos += 1;
        }
        let mut is_float = false;
        if self.peek() == Some('.') && matches!(self.peek_at(1), Some(c) if c.is_ascii_digit()) {
            is_float = true;
            self.pos += 1;
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        if is_float {
            text.parse::<f64>()
                .map(Term::Float)
                .map_err(|_| self.error(format!("invalid number `{text}`")))
        } else {
            text.parse::<i64>()
                .map(Term::Int)
                .map_err(|_| self.error(format!("invalid number `{text}`")))
        }
    }

    fn term(&mut self) -> Result<Term, SyntaxError> {
        self.skip_ws();
        match self.peek() {
            None => Err(self.error("expected a term, found end of input")),
            Some('(') => {
                self.pos += 1;
                let inner = self.term()?;
                self.eat(')')?;
                Ok(inner)
            }
            Some('[') => self.list(),
            Some('"') => {
                self.pos += 1;
                Ok(Term::Str(self.quoted('"')?))
            }
            Some('\'') => {
                self.pos += 1;
                let name = self.quoted('\'')?;
                self.atom_or_compound(name)
            }
            Some(c) if c.is_ascii_digit() => self.number(),
            Some('-') if matches!(self.peek_at(1), Some(d) if d.is_ascii_digit()) => self.number(),
            Some(c) if c.is_ascii_uppercase() || c == '_' => {
                let start = self.pos;
                let name = self.ident();
                if name == "_" {
                    // every bare underscore is a fresh variable
                    return Ok(Term::Var(format!("_G{start}")));
                }
                Ok(Term::Var(name))
            }
            Some(c) if c.is_ascii_lowercase() => {
                let name = self.ident();
                self.atom_or_compound(name)
            }
            Some(c) => Err(self.error(format!("unexpected character `{c}`"))),
        }
    }

    fn atom_or_compound(&mut self, name: String) -> Result<Term, SyntaxError> {
        // no whitespace allowed between functor and argument list
        if self.peek() == Some('(') {
            self.pos += 1;
            let mut args = vec![self.term()?];
            while self.accept(',') {
                args.push(self.term()?);
            }
            self.eat(')')?;
            Ok(Term::Compound(name, args))
        } else {
            Ok(Term::Atom(name))
        }
    }

    fn list(&mut self) -> Result<Term, SyntaxError> {
        self.eat('[')?;
        if self.accept(']') {
            return Ok(Term::List(Vec::new(), None));
        }
        let mut items = vec![self.term()?];
        while self.accept(',') {
            items.push(self.term()?);
        }
        let tail = if self.accept('|') {
            Some(Box::new(self.term()?))
        } else {
            None
        };
        self.eat(']')?;
        Ok(Term::List(items, tail))
    }

    fn goal(&mut self) -> Result<Term, SyntaxError> {
        self.skip_ws();
        if self.accept_str("\\+") {
            let inner = self.goal()?;
            return Ok(Term::Compound("\\+".to_string(), vec![inner]));
        }
        let left = self.term()?;
        self.skip_ws();
        if self.accept_str("\\=") {
            let right = self.term()?;
            return Ok(Term::Compound("\\=".to_string(), vec![left, right]));
        }
        // `=` but not the head of `=..` or `==`
        if self.peek() == Some('=') && self.peek_at(1) != Some('=') && self.peek_at(1) != Some('.') {
            self.pos += 1;
            let right = self.term()?;
            return Ok(Term::Compound("=".to_string(), vec![left, right]));
        }
        Ok(left)
    }

    fn goals(&mut self) -> Result<Vec<Term>, SyntaxError> {
        let mut goals = vec![self.goal()?];
        while self.accept(',') {
            goals.push(self.goal()?);
        }
        Ok(goals)
    }

    fn end_of_clause(&mut self) -> Result<(), SyntaxError> {
        self.eat('.')?;
        self.skip_ws();
        match self.peek() {
            None => Ok(()),
            Some(c) => Err(self.error(format!("trailing input after clause: `{c}`"))),
        }
    }
}

fn require_callable(term: &Term, what: &str, parser: &Parser) -> Result<(), SyntaxError> {
    match term {
        Term::Atom(_) | Term::Compound(_, _) => Ok(()),
        other => Err(parser.error(format!("{what} must be callable, found `{other}`"))),
    }
}

/// Parse one period-terminated clause (fact or rule).
pub fn parse_clause(text: &str) -> Result<Clause, SyntaxError> {
    let mut parser = Parser::new(text);
    let head = parser.term()?;
    require_callable(&head, "clause head", &parser)?;
    let body = if parser.accept_str(":-") {
        let goals = parser.goals()?;
        for goal in &goals {
            require_callable(goal, "body goal", &parser)?;
        }
        goals
    } else {
        Vec::new()
    };
    parser.end_of_clause()?;
    Ok(Clause { head, body })
}

/// Parse one period-terminated query (a goal conjunction).
pub fn parse_query(text: &str) -> Result<Vec<Term>, SyntaxError> {
    let mut parser = Parser::new(text);
    let goals = parser.goals()?;
    for goal in &goals {
        require_callable(goal, "query goal", &parser)?;
    }
    parser.end_of_clause()?;
    Ok(goals)
}

/// Parse a whole program text into clauses.
pub fn parse_program(text: &str) -> Result<Vec<Clause>, SyntaxError> {
    split_clause_strings(text)?
        .iter()
        .map(|clause| parse_clause(clause))
        .collect()
}

/// Split program text into individual clause strings, each keeping its
/// terminating period. Quote-, comment-, and bracket-aware; a period only
/// terminates a clause at nesting depth zero when followed by whitespace,
/// a comment, or end of input.
pub fn split_clause_strings(text: &str) -> Result<Vec<String>, SyntaxError> {
    let chars: Vec<char> = text.chars().collect();
    let mut clauses = Vec::new();
    let mut start = 0;
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    // non-comment, non-whitespace input seen since the last terminator
    let mut pending = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match quote {
            Some(q) => {
                pending = true;
                if c == '\\' {
                    i += 1; // skip escaped char
                } else if c == q {
                    quote = None;
                }
            }
            None => match c {
                '\'' | '"' => {
                    quote = Some(c);
                    pending = true;
                }
                '%' => {
                    while i < chars.len() && chars[i] != '\n' {
                        i += 1;
                    }
                }
                '(' | '[' => {
                    depth += 1;
                    pending = true;
                }
                ')' | ']' => {
                    depth -= 1;
                    pending = true;
                }
                '.' if depth == 0 => {
                    let next = chars.get(i + 1);
                    let terminal =
                        next.map_or(true, |n| n.is_whitespace() || *n == '%');
                    // a digit on both sides means a float, not a terminator
                    let in_number = i > 0
                        && chars[i - 1].is_ascii_digit()
                        && next.map_or(false, |n| n.is_ascii_digit());
                    if terminal && !in_number {
                        let clause: String = chars[start..=i].iter().collect();
                        let clause = clause.trim().to_string();
                        if clause != "." {
                            clauses.push(clause);
                        }
                        start = i + 1;
                        pending = false;
                    } else {
                        pending = true;
                    }
                }
                c if !c.is_whitespace() => pending = true,
                _ => {}
            },
        }
        i += 1;
    }

    if pending {
        let rest: String = chars[start..].iter().collect();
        return Err(SyntaxError {
            position: start,
            message: format!("clause not terminated by a period: `{}`", rest.trim()),
        });
    }
    Ok(clauses)
}

/// Predicate name and arity of a clause's head, if it parses.
pub fn predicate_indicator(clause_text: &str) -> Option<(String, usize)> {
    let clause = parse_clause(clause_text).ok()?;
    clause
        .head
        .indicator()
        .map(|(name, arity)| (name.to_string(), arity))
}
