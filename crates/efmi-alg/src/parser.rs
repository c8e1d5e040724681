//! Algorithm Code parser (pest).
//!
//! The parser only produces the concrete parse tree; `builder` turns it into
//! the typed AST. Syntax errors carry the 1-based line and column of the
//! offending token.

use pest::error::{Error as PestError, LineColLocation};
use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;
use thiserror::Error;

#[derive(Parser)]
#[grammar = "algorithm_code.pest"]
pub struct AlgorithmCodeParser;

pub type TokenPair<'i> = Pair<'i, Rule>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("syntax error on line {line}, column {column}: {message}")]
pub struct ParseError {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl From<PestError<Rule>> for ParseError {
    fn from(err: PestError<Rule>) -> Self {
        let (line, column) = match err.line_col {
            LineColLocation::Pos((line, column)) => (line, column),
            LineColLocation::Span((line, column), _) => (line, column),
        };
        Self {
            line,
            column,
            message: err.variant.message().into_owned(),
        }
    }
}

/// Parse a complete Algorithm Code file (`block ... end Name;`).
///
/// Returns the `algorithm_code` pair; its children are the `block` pair and
/// `EOI`.
pub fn parse_algorithm_code(source: &str) -> Result<TokenPair<'_>, ParseError> {
    parse_rule(Rule::algorithm_code, source)
}

/// Parse a single expression, e.g. for tests and tooling.
pub fn parse_expression(source: &str) -> Result<TokenPair<'_>, ParseError> {
    parse_rule(Rule::standalone_expression, source)
}

fn parse_rule(rule: Rule, source: &str) -> Result<TokenPair<'_>, ParseError> {
    let source = source.strip_prefix('\u{feff}').unwrap_or(source);
    let mut pairs = AlgorithmCodeParser::parse(rule, source)?;
    pairs.next().ok_or_else(|| ParseError {
        line: 1,
        column: 1,
        message: "empty parse result".to_string(),
    })
}

/// 1-based source line where `pair` starts.
pub fn line_of(pair: &TokenPair<'_>) -> usize {
    pair.as_span().start_pos().line_col().0
}

/// Keyword tokens carry no information once the tree shape is known.
pub(crate) fn is_keyword_token(rule: Rule) -> bool {
    matches!(
        rule,
        Rule::kw_block
            | Rule::kw_protected
            | Rule::kw_public
            | Rule::kw_end
            | Rule::kw_record
            | Rule::kw_algorithm
            | Rule::kw_signals
            | Rule::kw_signal
            | Rule::kw_if
            | Rule::kw_then
            | Rule::kw_elseif
            | Rule::kw_else
            | Rule::kw_for
            | Rule::kw_in
            | Rule::kw_loop
            | Rule::kw_limit
            | Rule::kw_self
            | Rule::kw_size
            | Rule::EOI
    )
}

/// Children of `pair` with keyword tokens removed.
pub(crate) fn significant<'i>(pair: TokenPair<'i>) -> impl Iterator<Item = TokenPair<'i>> {
    pair.into_inner().filter(|p| !is_keyword_token(p.as_rule()))
}
