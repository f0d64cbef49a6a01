//! Scalar filter expressions over document metadata.
//!
//! Grammar:
//!
//! ```text
//! expr   := "" | clause (("and" | "&&") clause)*
//! clause := "page_number" op integer
//!         | "source" ("==" | "!=") "\"" text "\""
//! op     := "==" | "!=" | ">" | ">=" | "<" | "<="
//! ```
//!
//! An empty expression matches every document.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

use crate::document::Document;
use crate::error::{RagError, Result};

static CLAUSE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^\s*(?:page_number\s*(==|!=|>=|<=|>|<)\s*(-?\d+)|source\s*(==|!=)\s*"((?:[^"\\]|\\.)*)")\s*"#,
    )
    .expect("clause pattern is valid")
});

static CONJUNCTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?i:and\s+|&&\s*)").expect("conjunction pattern is valid"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl CompareOp {
    fn parse(op: &str) -> Option<Self> {
        Some(match op {
            "==" => CompareOp::Eq,
            "!=" => CompareOp::Ne,
            ">" => CompareOp::Gt,
            ">=" => CompareOp::Ge,
            "<" => CompareOp::Lt,
            "<=" => CompareOp::Le,
            _ => return None,
        })
    }

    fn holds(self, left: i64, right: i64) -> bool {
        match self {
            CompareOp::Eq => left == right,
            CompareOp::Ne => left != right,
            CompareOp::Gt => left > right,
            CompareOp::Ge => left >= right,
            CompareOp::Lt => left < right,
            CompareOp::Le => left <= right,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Clause {
    Page { op: CompareOp, value: i64 },
    Source { negated: bool, value: String },
}

impl Clause {
    fn matches(&self, doc: &Document) -> bool {
        match self {
            Clause::Page { op, value } => op.holds(doc.page_number, *value),
            Clause::Source { negated, value } => (doc.source == *value) != *negated,
        }
    }
}

/// A parsed conjunction of metadata predicates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterExpr {
    clauses: Vec<Clause>,
}

impl FilterExpr {
    /// Parse `input`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidParameter`] when `input` does not follow the
    /// grammar.
    pub fn parse(input: &str) -> Result<Self> {
        let mut clauses = Vec::new();
        let mut rest = input.trim();

        while !rest.is_empty() {
            let caps = CLAUSE_RE.captures(rest).ok_or_else(|| malformed(input, rest))?;
            let clause = if let (Some(op), Some(value)) = (caps.get(1), caps.get(2)) {
                let op = CompareOp::parse(op.as_str()).ok_or_else(|| malformed(input, rest))?;
                let value = value.as_str().parse::<i64>().map_err(|e| {
                    RagError::InvalidParameter(format!("filter '{input}': bad page number: {e}"))
                })?;
                Clause::Page { op, value }
            } else if let (Some(op), Some(value)) = (caps.get(3), caps.get(4)) {
                Clause::Source { negated: op.as_str() == "!=", value: unescape(value.as_str()) }
            } else {
                return Err(malformed(input, rest));
            };
            clauses.push(clause);
            rest = &rest[caps.get(0).map_or(0, |m| m.end())..];

            if rest.is_empty() {
                break;
            }
            let conj = CONJUNCTION_RE.find(rest).ok_or_else(|| malformed(input, rest))?;
            rest = &rest[conj.end()..];
            if rest.trim().is_empty() {
                return Err(malformed(input, rest));
            }
        }

        Ok(Self { clauses })
    }

    /// Whether `doc` satisfies every clause.
    pub fn matches(&self, doc: &Document) -> bool {
        self.clauses.iter().all(|c| c.matches(doc))
    }

    /// Whether this expression matches everything.
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }
}

impl FromStr for FilterExpr {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for FilterExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, clause) in self.clauses.iter().enumerate() {
            if i > 0 {
                f.write_str(" and ")?;
            }
            match clause {
                Clause::Page { op, value } => write!(f, "page_number {} {value}", op.as_str())?,
                Clause::Source { negated, value } => {
                    let op = if *negated { "!=" } else { "==" };
                    write!(f, "source {op} \"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))?;
                }
            }
        }
        Ok(())
    }
}

fn malformed(input: &str, at: &str) -> RagError {
    RagError::InvalidParameter(format!("malformed filter expression '{input}' near '{at}'"))
}

fn unescape(quoted: &str) -> String {
    let mut out = String::with_capacity(quoted.len());
    let mut chars = quoted.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}
