//! Query evaluation for object lists and views.
//!
//! The default evaluator understands a small s-expression language:
//!
//! ```text
//! (and (occur-in-time-range? (make-time "20240101T000000Z")
//!                            (make-time "20240201T000000Z"))
//!      (contains? "summary" "standup"))
//! ```

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::component::Component;
use crate::error::{CalError, CalResult};
use crate::recurrence::occurs_in_range;
use crate::timezone::Resolver;

/// Text fields `contains?` can search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextField {
    Summary,
    Description,
    Location,
    Any,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    True,
    False,
    And(Vec<Query>),
    Or(Vec<Query>),
    Not(Box<Query>),
    Uid(String),
    Contains { field: TextField, text: String },
    OccurInRange { start: DateTime<Utc>, end: DateTime<Utc> },
    HasRecurrences,
    HasAlarms,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub source: String,
    pub expr: Query,
}

/// What a predicate may consult besides the component itself.
pub struct QueryContext<'a> {
    pub resolver: Resolver<'a>,
}

pub trait QueryEvaluator: Send + Sync {
    fn compile(&self, expr: &str) -> CalResult<CompiledQuery>;

    fn matches(&self, query: &CompiledQuery, component: &Component, ctx: &QueryContext<'_>) -> bool;

    /// Unix-second window every match must occur in, when one can be
    /// derived. Used to narrow candidates through the interval index.
    fn extract_time_bounds(&self, query: &CompiledQuery) -> Option<(i64, i64)>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SexpEvaluator;

impl QueryEvaluator for SexpEvaluator {
    fn compile(&self, expr: &str) -> CalResult<CompiledQuery> {
        let tokens = tokenize(expr)?;
        let mut pos = 0;
        let sexp = read(&tokens, &mut pos)?;
        if pos != tokens.len() {
            return Err(CalError::InvalidQuery(format!("Trailing input in '{expr}'")));
        }
        Ok(CompiledQuery {
            source: expr.to_string(),
            expr: build(&sexp)?,
        })
    }

    fn matches(&self, query: &CompiledQuery, component: &Component, ctx: &QueryContext<'_>) -> bool {
        eval(&query.expr, component, ctx)
    }

    fn extract_time_bounds(&self, query: &CompiledQuery) -> Option<(i64, i64)> {
        bounds(&query.expr)
    }
}

// ============================================================================
// Reading
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Open,
    Close,
    Str(String),
    Atom(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Sexp {
    List(Vec<Sexp>),
    Str(String),
    Atom(String),
}

fn tokenize(input: &str) -> CalResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&ch) = chars.peek() {
        match ch {
            '(' => {
                chars.next();
                tokens.push(Token::Open);
            }
            ')' => {
                chars.next();
                tokens.push(Token::Close);
            }
            '"' => {
                chars.next();
                let mut text = String::new();
                loop {
                    match chars.next() {
                        Some('\\') => match chars.next() {
                            Some(escaped) => text.push(escaped),
                            None => return Err(CalError::InvalidQuery("Unterminated string".into())),
                        },
                        Some('"') => break,
                        Some(c) => text.push(c),
                        None => return Err(CalError::InvalidQuery("Unterminated string".into())),
                    }
                }
                tokens.push(Token::Str(text));
            }
            c if c.is_whitespace() => {
                chars.next();
            }
            _ => {
                let mut atom = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() || c == '(' || c == ')' || c == '"' {
                        break;
                    }
                    atom.push(c);
                    chars.next();
                }
                tokens.push(Token::Atom(atom));
            }
        }
    }

    Ok(tokens)
}

fn read(tokens: &[Token], pos: &mut usize) -> CalResult<Sexp> {
    let token = tokens
        .get(*pos)
        .ok_or_else(|| CalError::InvalidQuery("Unexpected end of query".into()))?;
    *pos += 1;
    match token {
        Token::Open => {
            let mut items = Vec::new();
            loop {
                match tokens.get(*pos) {
                    Some(Token::Close) => {
                        *pos += 1;
                        return Ok(Sexp::List(items));
                    }
                    Some(_) => items.push(read(tokens, pos)?),
                    None => return Err(CalError::InvalidQuery("Missing ')'".into())),
                }
            }
        }
        Token::Close => Err(CalError::InvalidQuery("Unexpected ')'".into())),
        Token::Str(s) => Ok(Sexp::Str(s.clone())),
        Token::Atom(a) => Ok(Sexp::Atom(a.clone())),
    }
}

fn build(sexp: &Sexp) -> CalResult<Query> {
    match sexp {
        Sexp::Atom(a) if a == "#t" => Ok(Query::True),
        Sexp::Atom(a) if a == "#f" => Ok(Query::False),
        Sexp::List(items) => {
            let Some(Sexp::Atom(head)) = items.first() else {
                return Err(CalError::InvalidQuery("Expected a function name".into()));
            };
            let args = &items[1..];
            match head.as_str() {
                "and" => Ok(Query::And(args.iter().map(build).collect::<CalResult<_>>()?)),
                "or" => Ok(Query::Or(args.iter().map(build).collect::<CalResult<_>>()?)),
                "not" => match args {
                    [inner] => Ok(Query::Not(Box::new(build(inner)?))),
                    _ => Err(CalError::InvalidQuery("not takes one argument".into())),
                },
                "uid?" => match args {
                    [Sexp::Str(uid)] => Ok(Query::Uid(uid.clone())),
                    _ => Err(CalError::InvalidQuery("uid? takes one string".into())),
                },
                "contains?" => match args {
                    [Sexp::Str(field), Sexp::Str(text)] => Ok(Query::Contains {
                        field: parse_field(field)?,
                        text: text.to_lowercase(),
                    }),
                    _ => Err(CalError::InvalidQuery("contains? takes a field and a string".into())),
                },
                "occur-in-time-range?" => match args {
                    [start, end] => Ok(Query::OccurInRange {
                        start: make_time(start)?,
                        end: make_time(end)?,
                    }),
                    _ => Err(CalError::InvalidQuery("occur-in-time-range? takes two times".into())),
                },
                "has-recurrences?" => Ok(Query::HasRecurrences),
                "has-alarms?" => Ok(Query::HasAlarms),
                other => Err(CalError::InvalidQuery(format!("Unknown function '{other}'"))),
            }
        }
        other => Err(CalError::InvalidQuery(format!("Unexpected {other:?}"))),
    }
}

fn parse_field(field: &str) -> CalResult<TextField> {
    match field.to_ascii_lowercase().as_str() {
        "summary" => Ok(TextField::Summary),
        "description" => Ok(TextField::Description),
        "location" => Ok(TextField::Location),
        "any" => Ok(TextField::Any),
        other => Err(CalError::InvalidQuery(format!("Unknown field '{other}'"))),
    }
}

fn make_time(sexp: &Sexp) -> CalResult<DateTime<Utc>> {
    let text = match sexp {
        Sexp::List(items) => match items.as_slice() {
            [Sexp::Atom(f), Sexp::Str(text)] if f == "make-time" => text,
            _ => return Err(CalError::InvalidQuery("Expected (make-time \"...\")".into())),
        },
        _ => return Err(CalError::InvalidQuery("Expected (make-time \"...\")".into())),
    };
    parse_time(text).ok_or_else(|| CalError::InvalidQuery(format!("Invalid time '{text}'")))
}

/// `20240101T000000Z`, `20240101T000000` (read as UTC) or RFC 3339.
pub fn parse_time(text: &str) -> Option<DateTime<Utc>> {
    let trimmed = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    let naive = trimmed.strip_suffix('Z').unwrap_or(trimmed);
    NaiveDateTime::parse_from_str(naive, "%Y%m%dT%H%M%S")
        .ok()
        .map(|dt| dt.and_utc())
}

// ============================================================================
// Evaluation
// ============================================================================

fn contains(haystack: Option<&str>, needle: &str) -> bool {
    haystack
        .map(|h| h.to_lowercase().contains(needle))
        .unwrap_or(false)
}

fn eval(query: &Query, comp: &Component, ctx: &QueryContext<'_>) -> bool {
    match query {
        Query::True => true,
        Query::False => false,
        Query::And(items) => items.iter().all(|q| eval(q, comp, ctx)),
        Query::Or(items) => items.iter().any(|q| eval(q, comp, ctx)),
        Query::Not(inner) => !eval(inner, comp, ctx),
        Query::Uid(uid) => comp.uid() == Some(uid.as_str()),
        Query::Contains { field, text } => match field {
            TextField::Summary => contains(comp.summary(), text),
            TextField::Description => contains(comp.description(), text),
            TextField::Location => contains(comp.location(), text),
            TextField::Any => comp
                .properties
                .iter()
                .any(|p| p.value.to_lowercase().contains(text.as_str())),
        },
        Query::OccurInRange { start, end } => occurs_in_range(comp, &ctx.resolver, *start, *end),
        Query::HasRecurrences => comp.has_recurrences(),
        Query::HasAlarms => comp.has_alarms(),
    }
}

fn bounds(query: &Query) -> Option<(i64, i64)> {
    match query {
        Query::OccurInRange { start, end } => Some((start.timestamp(), end.timestamp())),
        Query::And(items) => items
            .iter()
            .filter_map(bounds)
            .reduce(|(s1, e1), (s2, e2)| (s1.max(s2), e1.min(e2))),
        Query::Or(items) if !items.is_empty() => {
            let all: Option<Vec<(i64, i64)>> = items.iter().map(bounds).collect();
            all?.into_iter()
                .reduce(|(s1, e1), (s2, e2)| (s1.min(s2), e1.max(e2)))
        }
        _ => None,
    }
}
