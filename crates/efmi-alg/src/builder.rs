//! Parse tree → typed AST.
//!
//! The builder walks the pest tree once and produces an owned
//! [`AlgorithmCodeModule`]:
//! - binary levels are folded left to right (`a - b - c` is `(a - b) - c`)
//! - `for` loops are unrolled with the iterator substituted by its value
//! - `x := {..}` / `m := {{..}, {..}}` are split into per-element bindings
//! - declarations land in the module's tables (arrays expanded per element)
//!
//! A tree shape no rule here recognizes is a grammar/builder mismatch and is
//! returned as [`BuildError::UnexpectedRule`] instead of being skipped.

use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

use crate::ast::*;
use crate::diagnostics::{Diagnostic, DiagnosticCode, Severity};
use crate::parser::{line_of, parse_algorithm_code, parse_expression, significant, ParseError, Rule, TokenPair};
use crate::table::{TableMode, VariableEntry, VariableTable};

/// Unrolling stops here; the loop is reported and skipped.
pub const MAX_LOOP_ITERATIONS: i64 = 100_000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("unexpected `{rule}` in {context} on line {line}")]
    UnexpectedRule {
        rule: String,
        context: &'static str,
        line: usize,
    },

    #[error("invalid literal `{text}` on line {line}")]
    InvalidLiteral { text: String, line: usize },
}

impl BuildError {
    pub fn line(&self) -> usize {
        match self {
            BuildError::Parse(e) => e.line,
            BuildError::UnexpectedRule { line, .. } | BuildError::InvalidLiteral { line, .. } => *line,
        }
    }
}

/// Parse and build a complete Algorithm Code file.
pub fn build_algorithm_code(source: &str) -> Result<AlgorithmCodeModule, BuildError> {
    let root = parse_algorithm_code(source)?;
    let mut builder = AstBuilder::default();
    let module = builder.module(root)?;
    debug!(
        block = %module.name,
        functions = module.functions.len(),
        bindings = module.binding_count(),
        issues = module.issues.len(),
        "built algorithm code module"
    );
    Ok(module)
}

/// Parse and build one expression outside of any block.
pub fn build_expression(source: &str) -> Result<Expression, BuildError> {
    let root = parse_expression(source)?;
    let mut builder = AstBuilder::default();
    let expr = first_child(root, "standalone expression")?;
    builder.expression(expr, &LoopScope::default())
}

fn unexpected(pair: &TokenPair<'_>, context: &'static str) -> BuildError {
    BuildError::UnexpectedRule {
        rule: format!("{:?}", pair.as_rule()),
        context,
        line: line_of(pair),
    }
}

fn first_child<'i>(pair: TokenPair<'i>, context: &'static str) -> Result<TokenPair<'i>, BuildError> {
    let line = line_of(&pair);
    let rule = format!("{:?}", pair.as_rule());
    significant(pair)
        .next()
        .ok_or(BuildError::UnexpectedRule { rule, context, line })
}

fn is_name(rule: Rule) -> bool {
    matches!(rule, Rule::ident | Rule::quoted_name)
}

// ============================================================================
// Loop scope
// ============================================================================

/// Loop iterators bound by the enclosing `for` headers; innermost wins.
#[derive(Debug, Clone, Default)]
struct LoopScope {
    bound: Vec<(Name, i64)>,
}

impl LoopScope {
    fn lookup(&self, name: &str) -> Option<i64> {
        self.bound
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }

    fn with(&self, name: &str, value: i64) -> LoopScope {
        let mut inner = self.clone();
        inner.bound.push((name.to_string(), value));
        inner
    }
}

/// Integer value of a subscript, bound or loop header expression.
///
/// Handles literals, bound iterators, unary minus, parentheses, `+`, `-`
/// and `*`. Anything else is not constant.
fn const_eval(pair: &TokenPair<'_>, scope: &LoopScope) -> Option<i64> {
    match pair.as_rule() {
        Rule::expression
        | Rule::or_expression
        | Rule::and_expression
        | Rule::equality_expression
        | Rule::relational_expression
        | Rule::power_expression
        | Rule::parenthesized => {
            let mut children = significant(pair.clone());
            let only = children.next()?;
            if children.next().is_some() {
                return None;
            }
            const_eval(&only, scope)
        }
        Rule::additive_expression | Rule::multiplicative_expression => {
            let mut children = significant(pair.clone());
            let mut acc = const_eval(&children.next()?, scope)?;
            while let Some(op) = children.next() {
                let rhs = const_eval(&children.next()?, scope)?;
                acc = match op.as_str() {
                    "+" => acc.checked_add(rhs)?,
                    "-" => acc.checked_sub(rhs)?,
                    "*" => acc.checked_mul(rhs)?,
                    _ => return None,
                };
            }
            Some(acc)
        }
        Rule::unary_expression => {
            let mut children = significant(pair.clone());
            let op = children.next()?;
            if op.as_str() != "-" {
                return None;
            }
            const_eval(&children.next()?, scope)?.checked_neg()
        }
        Rule::constant => {
            let literal = significant(pair.clone()).next()?;
            match literal.as_rule() {
                Rule::integer_literal => literal.as_str().parse().ok(),
                _ => None,
            }
        }
        Rule::reference => bound_iterator(pair, scope),
        _ => None,
    }
}

/// Value of `pair` when it is a bare reference to a bound loop iterator.
fn bound_iterator(pair: &TokenPair<'_>, scope: &LoopScope) -> Option<i64> {
    let inner = significant(pair.clone()).next()?;
    if inner.as_rule() != Rule::local_reference {
        return None;
    }
    let segment = significant(inner).next()?;
    let mut parts = significant(segment);
    let name = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    scope.lookup(name.as_str())
}

/// The `array_constructor` an expression consists of, looking through
/// single-operand precedence levels and parentheses.
fn constructor_of<'i>(pair: &TokenPair<'i>) -> Option<TokenPair<'i>> {
    match pair.as_rule() {
        Rule::array_constructor => Some(pair.clone()),
        Rule::expression
        | Rule::or_expression
        | Rule::and_expression
        | Rule::equality_expression
        | Rule::relational_expression
        | Rule::additive_expression
        | Rule::multiplicative_expression
        | Rule::power_expression
        | Rule::parenthesized => {
            let mut children = significant(pair.clone());
            let only = children.next()?;
            if children.next().is_some() {
                return None;
            }
            constructor_of(&only)
        }
        _ => None,
    }
}

// ============================================================================
// Builder
// ============================================================================

#[derive(Default)]
struct AstBuilder {
    records: BTreeMap<Name, RecordDeclaration>,
    issues: Vec<Diagnostic>,
}

impl AstBuilder {
    fn issue(&mut self, diagnostic: Diagnostic) {
        // Loop bodies are visited once per iteration.
        if !self.issues.contains(&diagnostic) {
            self.issues.push(diagnostic);
        }
    }

    fn unsupported(&mut self, message: String, line: usize) {
        self.issue(
            Diagnostic::new(Severity::Warning, DiagnosticCode::UnsupportedConstruct, message)
                .at_line(line),
        );
    }

    fn check_end_name(&mut self, kind: &str, opened: &str, closed: &TokenPair<'_>) {
        if closed.as_str() != opened {
            let line = line_of(closed);
            self.issue(
                Diagnostic::error(
                    DiagnosticCode::MismatchedEndName,
                    format!(
                        "The {kind} {opened} is closed by `end {}` (line {line})",
                        closed.as_str()
                    ),
                )
                .at_line(line),
            );
        }
    }

    fn module(&mut self, root: TokenPair<'_>) -> Result<AlgorithmCodeModule, BuildError> {
        let block = first_child(root, "algorithm code")?;
        if block.as_rule() != Rule::block {
            return Err(unexpected(&block, "algorithm code"));
        }
        let line = line_of(&block);
        let mut children = significant(block);
        let name = children
            .next()
            .filter(|p| is_name(p.as_rule()))
            .ok_or(BuildError::UnexpectedRule {
                rule: "block".to_string(),
                context: "block header",
                line,
            })?;
        let mut module = AlgorithmCodeModule::new(name.as_str(), line);

        for child in children {
            match child.as_rule() {
                Rule::state_entity_declaration => {
                    let mut parts = significant(child.clone());
                    let direction = parts.next().ok_or_else(|| unexpected(&child, "block entity"))?;
                    let decl = parts.next().ok_or_else(|| unexpected(&child, "block entity"))?;
                    let decl = self.declaration(decl, Causality::parse(direction.as_str()))?;
                    self.declare(&mut module.block_variables, &decl);
                }
                Rule::protected_section => self.protected_section(child, &mut module)?,
                Rule::public_section => {
                    for function in significant(child) {
                        if function.as_rule() != Rule::function_declaration {
                            return Err(unexpected(&function, "public section"));
                        }
                        let record = self.function(function)?;
                        module.functions.push(record);
                    }
                }
                rule if is_name(rule) => {
                    let opened = module.name.clone();
                    self.check_end_name("block", &opened, &child);
                }
                _ => return Err(unexpected(&child, "block")),
            }
        }

        module.records = self.records.values().cloned().collect();
        module.records.sort_by_key(|r| r.line);
        module.issues = std::mem::take(&mut self.issues);
        Ok(module)
    }

    fn protected_section(
        &mut self,
        section: TokenPair<'_>,
        module: &mut AlgorithmCodeModule,
    ) -> Result<(), BuildError> {
        // Records may be used before they are declared.
        for child in significant(section.clone()) {
            if child.as_rule() == Rule::record_declaration {
                let record = self.record(child)?;
                self.records.insert(record.name.clone(), record);
            }
        }

        for child in significant(section) {
            match child.as_rule() {
                Rule::record_declaration => {}
                Rule::signal_declaration => {
                    for signal in significant(child) {
                        module.signals.push(SignalDeclaration {
                            name: signal.as_str().to_string(),
                            line: line_of(&signal),
                        });
                    }
                }
                Rule::function_declaration => {
                    let record = self.function(child)?;
                    module.functions.push(record);
                }
                Rule::protected_variable => {
                    let decl = self.directed_declaration(child, Causality::State)?;
                    self.declare(&mut module.protected_variables, &decl);
                }
                _ => return Err(unexpected(&child, "protected section")),
            }
        }
        Ok(())
    }

    fn record(&mut self, pair: TokenPair<'_>) -> Result<RecordDeclaration, BuildError> {
        let line = line_of(&pair);
        let mut children = significant(pair.clone());
        let name = children
            .next()
            .filter(|p| is_name(p.as_rule()))
            .ok_or_else(|| unexpected(&pair, "record"))?;
        let mut record = RecordDeclaration {
            name: name.as_str().to_string(),
            fields: Vec::new(),
            line,
        };
        for child in children {
            match child.as_rule() {
                Rule::protected_variable => {
                    let field = self.directed_declaration(child, Causality::State)?;
                    record.fields.push(field);
                }
                rule if is_name(rule) => {
                    let opened = record.name.clone();
                    self.check_end_name("record", &opened, &child);
                }
                _ => return Err(unexpected(&child, "record")),
            }
        }
        Ok(record)
    }

    /// `[direction] Type name ...;` with `default` used when undirected.
    fn directed_declaration(
        &mut self,
        pair: TokenPair<'_>,
        default: Causality,
    ) -> Result<VariableDeclaration, BuildError> {
        let mut causality = default;
        for child in significant(pair.clone()) {
            match child.as_rule() {
                Rule::data_flow_direction => causality = Causality::parse(child.as_str()),
                Rule::variable_declaration => return self.declaration(child, causality),
                _ => return Err(unexpected(&child, "variable declaration")),
            }
        }
        Err(unexpected(&pair, "variable declaration"))
    }

    fn declaration(
        &mut self,
        pair: TokenPair<'_>,
        causality: Causality,
    ) -> Result<VariableDeclaration, BuildError> {
        let line = line_of(&pair);
        let mut ty = None;
        let mut name = None;
        let mut dimensions = Vec::new();
        let mut range = None;

        for child in significant(pair.clone()) {
            match child.as_rule() {
                Rule::primitive_type => {
                    let primitive = child
                        .as_str()
                        .parse::<PrimitiveType>()
                        .map_err(|_| unexpected(&child, "type"))?;
                    ty = Some(DeclaredType::Primitive(primitive));
                }
                Rule::record_type => ty = Some(DeclaredType::Record(child.as_str().to_string())),
                rule if is_name(rule) => name = Some(child.as_str().to_string()),
                Rule::dimensions => {
                    for dimension in significant(child) {
                        dimensions.push(self.dimension(dimension)?);
                    }
                }
                Rule::range_specification => range = Some(self.range(child)?),
                _ => return Err(unexpected(&child, "variable declaration")),
            }
        }

        match (ty, name) {
            (Some(ty), Some(name)) => Ok(VariableDeclaration {
                name,
                ty,
                causality,
                dimensions,
                range,
                line,
            }),
            _ => Err(unexpected(&pair, "variable declaration")),
        }
    }

    fn dimension(&mut self, pair: TokenPair<'_>) -> Result<DimensionSpec, BuildError> {
        let inner = first_child(pair, "dimension")?;
        Ok(match inner.as_rule() {
            Rule::derived_dimension => DimensionSpec::Derived,
            Rule::expression => match const_eval(&inner, &LoopScope::default()) {
                Some(n) if n >= 0 => DimensionSpec::Fixed(n as usize),
                _ => DimensionSpec::Symbolic(inner.as_str().trim().to_string()),
            },
            _ => return Err(unexpected(&inner, "dimension")),
        })
    }

    fn range(&mut self, pair: TokenPair<'_>) -> Result<ValueRange, BuildError> {
        let mut range = ValueRange::default();
        for bound in significant(pair) {
            let mut parts = significant(bound.clone());
            let (Some(kind), Some(number)) = (parts.next(), parts.next()) else {
                return Err(unexpected(&bound, "range specification"));
            };
            let text: String = number.as_str().split_whitespace().collect();
            match kind.as_str() {
                "min" => range.min = Some(text),
                "max" => range.max = Some(text),
                _ => return Err(unexpected(&kind, "range specification")),
            }
        }
        Ok(range)
    }

    /// Enter a declaration into `table`, expanding arrays and record fields.
    fn declare(&mut self, table: &mut VariableTable, decl: &VariableDeclaration) {
        self.declare_prefixed(table, decl, &decl.name, &decl.causality, &mut Vec::new());
    }

    fn declare_prefixed(
        &mut self,
        table: &mut VariableTable,
        decl: &VariableDeclaration,
        key: &str,
        causality: &Causality,
        open_records: &mut Vec<Name>,
    ) {
        match &decl.ty {
            DeclaredType::Primitive(ty) => {
                let mut entry = VariableEntry::new(*ty, causality.clone(), decl.line)
                    .with_range(decl.range.clone());
                if let Some(sizes) = decl.fixed_dimensions() {
                    entry = entry.with_dimensions(sizes);
                }
                if let Some(previous) = table.declare(key, entry, TableMode::Element) {
                    self.issue(
                        Diagnostic::warning(
                            DiagnosticCode::DuplicateDeclaration,
                            format!(
                                "The variable {key} (line {}) is already declared on line {}",
                                decl.line, previous.line
                            ),
                        )
                        .at_line(decl.line),
                    );
                }
            }
            DeclaredType::Record(record_name) => {
                if open_records.contains(record_name) {
                    self.unsupported(
                        format!("The record {record_name} contains itself (line {})", decl.line),
                        decl.line,
                    );
                    return;
                }
                let Some(record) = self.records.get(record_name).cloned() else {
                    self.issue(
                        Diagnostic::error(
                            DiagnosticCode::UndeclaredVariable,
                            format!(
                                "The record type {record_name} of variable {key} (line {}) is not declared anywhere in the Algorithm code block",
                                decl.line
                            ),
                        )
                        .at_line(decl.line),
                    );
                    return;
                };
                open_records.push(record_name.clone());
                for field in &record.fields {
                    let field_key = format!("{key}.{}", field.name);
                    self.declare_prefixed(table, field, &field_key, &Causality::State, open_records);
                }
                open_records.pop();
            }
        }
    }

    // ------------------------------------------------------------------------
    // Functions and statements
    // ------------------------------------------------------------------------

    fn function(&mut self, pair: TokenPair<'_>) -> Result<FunctionRecord, BuildError> {
        let line = line_of(&pair);
        let mut children = significant(pair.clone());
        let kind = match children.next().map(|p| p.as_str().to_string()).as_deref() {
            Some("function") => FunctionKind::Function,
            Some("method") => FunctionKind::Method,
            _ => return Err(unexpected(&pair, "function header")),
        };
        let name = children
            .next()
            .filter(|p| is_name(p.as_rule()))
            .ok_or_else(|| unexpected(&pair, "function header"))?;
        let mut function = FunctionRecord::new(name.as_str(), kind, line);
        let scope = LoopScope::default();

        for child in children {
            match child.as_rule() {
                Rule::signal_interface => {
                    function
                        .signals
                        .extend(significant(child).map(|s| s.as_str().to_string()));
                }
                Rule::parameter_declaration => {
                    let mut parts = significant(child.clone());
                    let (Some(direction), Some(decl)) = (parts.next(), parts.next()) else {
                        return Err(unexpected(&child, "parameter declaration"));
                    };
                    let decl = self.declaration(decl, Causality::parse(direction.as_str()))?;
                    self.declare(&mut function.locals, &decl);
                }
                Rule::local_section => {
                    for local in significant(child) {
                        let decl = self.declaration(local, Causality::Local)?;
                        self.declare(&mut function.locals, &decl);
                    }
                }
                Rule::statement => self.statement(child, &mut function, &scope)?,
                rule if is_name(rule) => {
                    let opened = function.name.clone();
                    self.check_end_name(kind.as_str(), &opened, &child);
                }
                _ => return Err(unexpected(&child, "function")),
            }
        }

        debug!(
            function = %function.name,
            locals = function.locals.len(),
            bindings = function.bindings.len(),
            "built function"
        );
        Ok(function)
    }

    fn statement(
        &mut self,
        pair: TokenPair<'_>,
        function: &mut FunctionRecord,
        scope: &LoopScope,
    ) -> Result<(), BuildError> {
        let stmt = first_child(pair, "statement")?;
        let line = line_of(&stmt);
        match stmt.as_rule() {
            Rule::single_assignment => {
                let mut parts = significant(stmt.clone());
                let (Some(target), Some(value)) = (parts.next(), parts.next()) else {
                    return Err(unexpected(&stmt, "assignment"));
                };
                let target = self.reference(target, scope)?;
                match constructor_of(&value) {
                    Some(ctor) => self.bind_constructor(function, &target, ctor, scope, 1)?,
                    None => {
                        let value = self.expression(value, scope)?;
                        function.bind(target, value, line);
                    }
                }
            }
            Rule::multi_assignment => {
                let mut targets = Vec::new();
                let mut call = None;
                for part in significant(stmt) {
                    match part.as_rule() {
                        Rule::reference => targets.push(self.reference(part, scope)?),
                        Rule::function_call => call = Some(self.function_call(part, scope)?),
                        _ => return Err(unexpected(&part, "multi assignment")),
                    }
                }
                let call = call.ok_or(BuildError::UnexpectedRule {
                    rule: "multi_assignment".to_string(),
                    context: "multi assignment",
                    line,
                })?;
                function.calls.push(CallStatement { targets, call, line });
            }
            Rule::call_statement => {
                let call = self.function_call(first_child(stmt, "call statement")?, scope)?;
                function.calls.push(CallStatement {
                    targets: Vec::new(),
                    call,
                    line,
                });
            }
            Rule::if_statement => {
                for part in significant(stmt) {
                    match part.as_rule() {
                        Rule::condition => {
                            let condition = self.condition(part, scope)?;
                            function.conditions.push(condition);
                        }
                        Rule::statement => self.statement(part, function, scope)?,
                        Rule::elseif_branch | Rule::else_branch => {
                            for inner in significant(part) {
                                match inner.as_rule() {
                                    Rule::condition => {
                                        let condition = self.condition(inner, scope)?;
                                        function.conditions.push(condition);
                                    }
                                    Rule::statement => self.statement(inner, function, scope)?,
                                    _ => return Err(unexpected(&inner, "if statement")),
                                }
                            }
                        }
                        _ => return Err(unexpected(&part, "if statement")),
                    }
                }
            }
            Rule::for_statement => self.for_loop(stmt, function, scope)?,
            Rule::signal_statement => {
                function.raised_signals.push(SignalRaise {
                    signals: significant(stmt).map(|s| s.as_str().to_string()).collect(),
                    line,
                });
            }
            Rule::limit_statement => {
                let mut targets = Vec::new();
                for target in significant(stmt) {
                    // A bare `self` limits every state; nothing to resolve.
                    if let Some(reference) = significant(target).next() {
                        targets.push(self.reference(reference, scope)?);
                    }
                }
                function.limits.push(LimitStatement { targets, line });
            }
            _ => return Err(unexpected(&stmt, "statement")),
        }
        Ok(())
    }

    fn for_loop(
        &mut self,
        pair: TokenPair<'_>,
        function: &mut FunctionRecord,
        scope: &LoopScope,
    ) -> Result<(), BuildError> {
        let line = line_of(&pair);
        let mut children = significant(pair.clone());
        let header = children
            .next()
            .filter(|p| p.as_rule() == Rule::loop_header)
            .ok_or_else(|| unexpected(&pair, "for loop"))?;
        let body: Vec<TokenPair<'_>> = children.collect();

        let mut iterator = None;
        let mut bounds = Vec::new();
        for part in significant(header.clone()) {
            match part.as_rule() {
                Rule::loop_iterator => iterator = Some(part.as_str().trim().to_string()),
                Rule::expression => bounds.push(part),
                _ => return Err(unexpected(&part, "loop header")),
            }
        }
        let evaluated: Option<Vec<i64>> = bounds.iter().map(|b| const_eval(b, scope)).collect();
        let (start, step, end) = match evaluated.as_deref() {
            Some([start, end]) => (*start, 1, *end),
            Some([start, step, end]) => (*start, *step, *end),
            Some(_) => return Err(unexpected(&header, "loop header")),
            None => {
                self.unsupported(
                    format!(
                        "The bounds of the for loop `{}` (line {line}) are not constant integer expressions",
                        header.as_str().trim()
                    ),
                    line,
                );
                return Ok(());
            }
        };
        if step == 0 {
            self.unsupported(format!("The for loop on line {line} has a zero step"), line);
            return Ok(());
        }

        // Widened so full-range bounds cannot overflow.
        let iterations: i128 = if (step > 0 && end >= start) || (step < 0 && end <= start) {
            (i128::from(end) - i128::from(start)) / i128::from(step) + 1
        } else {
            0
        };
        if iterations > i128::from(MAX_LOOP_ITERATIONS) {
            self.unsupported(
                format!("The for loop on line {line} runs {iterations} iterations, more than {MAX_LOOP_ITERATIONS}"),
                line,
            );
            return Ok(());
        }

        let mut value = start;
        for _ in 0..iterations {
            let inner = match &iterator {
                Some(name) => scope.with(name, value),
                None => scope.clone(),
            };
            for stmt in &body {
                self.statement(stmt.clone(), function, &inner)?;
            }
            value = value.saturating_add(step);
        }
        Ok(())
    }

    /// `target := {e1, e2, ..}` as one binding per element.
    fn bind_constructor(
        &mut self,
        function: &mut FunctionRecord,
        target: &Reference,
        ctor: TokenPair<'_>,
        scope: &LoopScope,
        depth: usize,
    ) -> Result<(), BuildError> {
        for (position, element) in significant(ctor).enumerate() {
            let element_target = target.element(&[position + 1]);
            let line = line_of(&element);
            match constructor_of(&element) {
                Some(nested) if depth < 2 => {
                    self.bind_constructor(function, &element_target, nested, scope, depth + 1)?
                }
                Some(_) => self.unsupported(
                    format!(
                        "The array constructor assigned to {} (line {line}) is nested deeper than two levels",
                        target.name
                    ),
                    line,
                ),
                None => {
                    let value = self.expression(element, scope)?;
                    function.bind(element_target, value, line);
                }
            }
        }
        Ok(())
    }

    fn condition(&mut self, pair: TokenPair<'_>, scope: &LoopScope) -> Result<Condition, BuildError> {
        let inner = first_child(pair, "condition")?;
        let line = line_of(&inner);
        match inner.as_rule() {
            Rule::expression => Ok(Condition::Expression {
                expression: self.expression(inner, scope)?,
                line,
            }),
            Rule::signal_condition => {
                let mut condition = SignalCondition {
                    signal: None,
                    negated: false,
                    members: Vec::new(),
                    fallback: None,
                    line,
                };
                for part in significant(inner) {
                    match part.as_rule() {
                        Rule::ident => condition.signal = Some(part.as_str().to_string()),
                        Rule::signal_membership => {
                            for member in significant(part) {
                                match member.as_rule() {
                                    Rule::signal_negation => condition.negated = true,
                                    Rule::ident => condition.members.push(member.as_str().to_string()),
                                    _ => return Err(unexpected(&member, "signal membership")),
                                }
                            }
                        }
                        Rule::op_or => {}
                        Rule::expression => condition.fallback = Some(self.expression(part, scope)?),
                        _ => return Err(unexpected(&part, "signal condition")),
                    }
                }
                Ok(Condition::Signal(condition))
            }
            _ => Err(unexpected(&inner, "condition")),
        }
    }

    // ------------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------------

    fn expression(&mut self, pair: TokenPair<'_>, scope: &LoopScope) -> Result<Expression, BuildError> {
        let line = line_of(&pair);
        match pair.as_rule() {
            Rule::expression | Rule::parenthesized => {
                let inner = first_child(pair, "expression")?;
                self.expression(inner, scope)
            }
            Rule::or_expression
            | Rule::and_expression
            | Rule::equality_expression
            | Rule::relational_expression
            | Rule::additive_expression
            | Rule::multiplicative_expression
            | Rule::power_expression => {
                let mut children = significant(pair.clone());
                let first = children.next().ok_or_else(|| unexpected(&pair, "operation"))?;
                let mut left = self.expression(first, scope)?;
                while let Some(op_pair) = children.next() {
                    let op = BinaryOperator::from_symbol(op_pair.as_str())
                        .ok_or_else(|| unexpected(&op_pair, "operator"))?;
                    let operand = children.next().ok_or_else(|| unexpected(&op_pair, "operation"))?;
                    let right = self.expression(operand, scope)?;
                    left = Expression::Binary(BinaryOperation {
                        left: Box::new(left),
                        op,
                        right: Box::new(right),
                        line,
                    });
                }
                Ok(left)
            }
            Rule::unary_expression => {
                let mut children = significant(pair.clone());
                let (Some(op_pair), Some(operand)) = (children.next(), children.next()) else {
                    return Err(unexpected(&pair, "unary operation"));
                };
                let op = UnaryOperator::from_symbol(op_pair.as_str())
                    .ok_or_else(|| unexpected(&op_pair, "unary operator"))?;
                Ok(Expression::Unary(UnaryOperation {
                    op,
                    operand: Box::new(self.expression(operand, scope)?),
                    line,
                }))
            }
            Rule::if_expression => self.if_expression(pair, scope),
            Rule::array_constructor => {
                self.unsupported(
                    format!(
                        "The array constructor `{}` (line {line}) is only checked element by element",
                        pair.as_str().trim()
                    ),
                    line,
                );
                let mut elements = Vec::new();
                for element in significant(pair) {
                    elements.push(self.expression(element, scope)?);
                }
                Ok(Expression::Array(ArrayConstructor { elements, line }))
            }
            Rule::size_query => {
                let mut children = significant(pair.clone());
                let (Some(array), Some(dimension)) = (children.next(), children.next()) else {
                    return Err(unexpected(&pair, "size query"));
                };
                Ok(Expression::Call(FunctionCall {
                    name: "size".to_string(),
                    args: vec![
                        Expression::Reference(self.reference(array, scope)?),
                        self.expression(dimension, scope)?,
                    ],
                    line,
                }))
            }
            Rule::function_call => Ok(Expression::Call(self.function_call(pair, scope)?)),
            Rule::constant => self.constant(pair),
            Rule::reference => match bound_iterator(&pair, scope) {
                Some(value) => Ok(Expression::Constant(Constant {
                    ty: PrimitiveType::Integer,
                    text: value.to_string(),
                    line,
                })),
                None => Ok(Expression::Reference(self.reference(pair, scope)?)),
            },
            _ => Err(unexpected(&pair, "expression")),
        }
    }

    fn if_expression(&mut self, pair: TokenPair<'_>, scope: &LoopScope) -> Result<Expression, BuildError> {
        let line = line_of(&pair);
        let mut plain = Vec::new();
        let mut else_ifs = Vec::new();
        for part in significant(pair.clone()) {
            match part.as_rule() {
                Rule::expression => plain.push(self.expression(part, scope)?),
                Rule::elseif_expression => {
                    let mut branch = significant(part.clone());
                    let (Some(condition), Some(then)) = (branch.next(), branch.next()) else {
                        return Err(unexpected(&part, "elseif expression"));
                    };
                    else_ifs.push(ElseIf {
                        condition: self.expression(condition, scope)?,
                        then: self.expression(then, scope)?,
                    });
                }
                _ => return Err(unexpected(&part, "if expression")),
            }
        }
        let mut plain = plain.into_iter();
        let (Some(condition), Some(then), Some(otherwise), None) =
            (plain.next(), plain.next(), plain.next(), plain.next())
        else {
            return Err(unexpected(&pair, "if expression"));
        };
        Ok(Expression::If(IfExpression {
            conditions: vec![condition],
            thens: vec![then],
            else_ifs,
            otherwise: Some(Box::new(otherwise)),
            line,
        }))
    }

    fn function_call(&mut self, pair: TokenPair<'_>, scope: &LoopScope) -> Result<FunctionCall, BuildError> {
        let line = line_of(&pair);
        let mut children = significant(pair.clone());
        let name = children
            .next()
            .filter(|p| is_name(p.as_rule()))
            .ok_or_else(|| unexpected(&pair, "function call"))?;
        let mut args = Vec::new();
        for arg in children {
            args.push(self.expression(arg, scope)?);
        }
        Ok(FunctionCall {
            name: name.as_str().to_string(),
            args,
            line,
        })
    }

    fn constant(&mut self, pair: TokenPair<'_>) -> Result<Expression, BuildError> {
        let line = line_of(&pair);
        let literal = first_child(pair, "constant")?;
        let text = literal.as_str().to_string();
        let ty = match literal.as_rule() {
            Rule::boolean_literal => PrimitiveType::Boolean,
            Rule::real_literal => {
                text.parse::<f64>()
                    .map_err(|_| BuildError::InvalidLiteral { text: text.clone(), line })?;
                PrimitiveType::Real
            }
            Rule::integer_literal => {
                text.parse::<i64>()
                    .map_err(|_| BuildError::InvalidLiteral { text: text.clone(), line })?;
                PrimitiveType::Integer
            }
            _ => return Err(unexpected(&literal, "constant")),
        };
        Ok(Expression::Constant(Constant { ty, text, line }))
    }

    /// Resolve a `reference` pair to its table key.
    fn reference(&mut self, pair: TokenPair<'_>, scope: &LoopScope) -> Result<Reference, BuildError> {
        let line = line_of(&pair);
        let inner = first_child(pair, "reference")?;
        let state = match inner.as_rule() {
            Rule::state_reference => true,
            Rule::local_reference => false,
            _ => return Err(unexpected(&inner, "reference")),
        };

        let mut segments = Vec::new();
        let mut index_references = Vec::new();
        for segment in significant(inner) {
            if segment.as_rule() != Rule::reference_segment {
                return Err(unexpected(&segment, "reference"));
            }
            let mut parts = significant(segment.clone());
            let name = parts
                .next()
                .filter(|p| is_name(p.as_rule()))
                .ok_or_else(|| unexpected(&segment, "reference segment"))?;
            let mut text = name.as_str().to_string();

            if let Some(subscripts) = parts.next() {
                let indices: Vec<TokenPair<'_>> = significant(subscripts).collect();
                let resolved: Option<Vec<i64>> = indices.iter().map(|i| const_eval(i, scope)).collect();
                match resolved {
                    Some(values) => {
                        let joined = values
                            .iter()
                            .map(|v| v.to_string())
                            .collect::<Vec<_>>()
                            .join(",");
                        text.push_str(&format!("[{joined}]"));
                    }
                    None => {
                        for index in indices {
                            let expr = self.expression(index, scope)?;
                            index_references.extend(expr.references().into_iter().cloned());
                        }
                    }
                }
            }
            segments.push(text);
        }

        Ok(Reference {
            name: segments.join("."),
            state,
            line,
            index_references,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(body: &str) -> String {
        format!(
            "block B\n  input Real u;\n  output Real y;\nprotected\n  Real x[3];\n  Integer n;\n  Boolean b;\npublic\n  method M\n  algorithm\n{body}\n  end M;\nend B;\n"
        )
    }

    fn method(module: &AlgorithmCodeModule) -> &FunctionRecord {
        module.function("M").expect("method M")
    }

    #[test]
    fn folds_each_level_left_to_right() {
        let e = build_expression("a - b - c").expect("build");
        assert_eq!(e.to_string(), "(a - b) - c");
        let e = build_expression("a or b and c").expect("build");
        assert_eq!(e.to_string(), "a or (b and c)");
        let e = build_expression("a + b * c ^ d").expect("build");
        assert_eq!(e.to_string(), "a + (b * (c ^ d))");
    }

    #[test]
    fn literals_are_typed() {
        let types: Vec<PrimitiveType> = ["1", "1.0", "2e3", "true"]
            .iter()
            .map(|s| match build_expression(s) {
                Ok(Expression::Constant(c)) => c.ty,
                other => panic!("{s}: {other:?}"),
            })
            .collect();
        assert_eq!(
            types,
            vec![
                PrimitiveType::Integer,
                PrimitiveType::Real,
                PrimitiveType::Real,
                PrimitiveType::Boolean
            ]
        );
    }

    #[test]
    fn state_references_drop_self_and_resolve_subscripts() {
        let module = build_algorithm_code(&block("    self.x[2] := u;")).expect("build");
        let binding = &method(&module).bindings[0];
        assert_eq!(binding.target.name, "x[2]");
        assert!(binding.target.state);
    }

    #[test]
    fn unresolved_subscripts_keep_index_variables() {
        let module = build_algorithm_code(&block("    y := self.x[n + 1];")).expect("build");
        let Expression::Reference(r) = &method(&module).bindings[0].value else {
            panic!("expected reference");
        };
        assert_eq!(r.name, "x");
        assert_eq!(r.index_references.len(), 1);
        assert_eq!(r.index_references[0].name, "n");
    }

    #[test]
    fn loops_unroll_with_offsets() {
        let body = "    for i in 1:2 loop\n      self.x[i + 1] := self.x[i] * 2.0;\n    end for;";
        let module = build_algorithm_code(&block(body)).expect("build");
        let targets: Vec<&str> = method(&module)
            .bindings
            .iter()
            .map(|b| b.target.name.as_str())
            .collect();
        assert_eq!(targets, vec!["x[2]", "x[3]"]);
    }

    #[test]
    fn loops_honour_step() {
        let body = "    for i in 3:-1:1 loop\n      self.x[i] := 0.0;\n    end for;";
        let module = build_algorithm_code(&block(body)).expect("build");
        let targets: Vec<&str> = method(&module)
            .bindings
            .iter()
            .map(|b| b.target.name.as_str())
            .collect();
        assert_eq!(targets, vec!["x[3]", "x[2]", "x[1]"]);
    }

    #[test]
    fn bare_iterator_becomes_integer_constant() {
        let body = "    for i in 1:1 loop\n      n := i;\n    end for;";
        let module = build_algorithm_code(&block(body)).expect("build");
        let binding = &method(&module).bindings[0];
        assert_eq!(binding.kind(), BindingKind::Constant);
        assert_eq!(binding.value.to_string(), "1");
    }

    #[test]
    fn non_constant_bounds_are_reported_and_skipped() {
        let body = "    for i in 1:n loop\n      self.x[i] := 0.0;\n    end for;";
        let module = build_algorithm_code(&block(body)).expect("build");
        assert!(method(&module).bindings.is_empty());
        assert_eq!(module.issues.len(), 1);
        assert_eq!(module.issues[0].code, DiagnosticCode::UnsupportedConstruct);
    }

    #[test]
    fn full_range_loop_bounds_are_reported_not_unrolled() {
        for header in [
            "i in 9223372036854775807:-1:-9223372036854775807",
            "i in -9223372036854775807:9223372036854775807",
        ] {
            let body = format!("    for {header} loop\n      self.x[1] := 0.0;\n    end for;");
            let module = build_algorithm_code(&block(&body)).expect("build");
            assert!(method(&module).bindings.is_empty(), "{header}");
            assert_eq!(module.issues.len(), 1, "{header}");
            assert_eq!(module.issues[0].code, DiagnosticCode::UnsupportedConstruct);
        }
    }

    #[test]
    fn constructors_decompose_into_elements() {
        let body = "    self.x := {1.0, 2.0, u};";
        let module = build_algorithm_code(&block(body)).expect("build");
        let targets: Vec<&str> = method(&module)
            .bindings
            .iter()
            .map(|b| b.target.name.as_str())
            .collect();
        assert_eq!(targets, vec!["x[1]", "x[2]", "x[3]"]);
    }

    #[test]
    fn two_dimensional_constructors_use_both_indices() {
        let source = "block B\nprotected\n  Real m[2,2];\npublic\n  method M\n  algorithm\n    self.m := {{1.0, 2.0}, {3.0, 4.0}};\n  end M;\nend B;";
        let module = build_algorithm_code(source).expect("build");
        let targets: Vec<&str> = method(&module)
            .bindings
            .iter()
            .map(|b| b.target.name.as_str())
            .collect();
        assert_eq!(targets, vec!["m[1,1]", "m[1,2]", "m[2,1]", "m[2,2]"]);
    }

    #[test]
    fn three_level_constructors_are_unsupported() {
        let body = "    self.x := {{{1.0}}};";
        let module = build_algorithm_code(&block(body)).expect("build");
        assert!(method(&module).bindings.is_empty());
        assert_eq!(module.issues[0].code, DiagnosticCode::UnsupportedConstruct);
    }

    #[test]
    fn declarations_fill_tables_with_causalities() {
        let source = r#"
block B
  input Real u;
  parameter Integer k;
protected
  Real s[2];
  output Boolean flag;
  function F
    input Real a;
    output Real r;
  protected
    Integer tmp;
  algorithm
    r := a;
  end F;
public
end B;
"#;
        let module = build_algorithm_code(source).expect("build");
        assert_eq!(module.block_variables.get("u").map(|e| e.causality.clone()), Some(Causality::Input));
        assert_eq!(module.block_variables.get("k").map(|e| e.causality.clone()), Some(Causality::Parameter));
        assert_eq!(module.protected_variables.get("s[2]").map(|e| e.causality.clone()), Some(Causality::State));
        assert_eq!(module.protected_variables.get("flag").map(|e| e.causality.clone()), Some(Causality::Output));
        let f = module.function("F").expect("F");
        assert_eq!(f.kind, FunctionKind::Function);
        assert_eq!(f.locals.get("a").map(|e| e.causality.clone()), Some(Causality::Input));
        assert_eq!(f.locals.get("r").map(|e| e.causality.clone()), Some(Causality::Output));
        assert_eq!(f.locals.get("tmp").map(|e| e.causality.clone()), Some(Causality::Local));
    }

    #[test]
    fn record_variables_expand_fields() {
        let source = r#"
block B
protected
  Controller c;
  record Controller
    Real gain;
    Integer mode;
  end Controller;
public
end B;
"#;
        let module = build_algorithm_code(source).expect("build");
        assert_eq!(module.records.len(), 1);
        assert_eq!(module.protected_variables.get("c.gain").map(|e| e.ty), Some(PrimitiveType::Real));
        assert_eq!(module.protected_variables.get("c.mode").map(|e| e.ty), Some(PrimitiveType::Integer));
    }

    #[test]
    fn duplicate_declarations_warn_and_keep_last() {
        let source = "block B\nprotected\n  Real x;\n  Integer x;\npublic\nend B;";
        let module = build_algorithm_code(source).expect("build");
        assert_eq!(module.protected_variables.get("x").map(|e| e.ty), Some(PrimitiveType::Integer));
        assert_eq!(module.issues.len(), 1);
        assert_eq!(module.issues[0].code, DiagnosticCode::DuplicateDeclaration);
        assert_eq!(module.issues[0].line, Some(4));
    }

    #[test]
    fn mismatched_end_name_is_reported() {
        let source = "block B\nprotected\npublic\n  method M\n  algorithm\n  end N;\nend B;";
        let module = build_algorithm_code(source).expect("build");
        assert_eq!(module.issues.len(), 1);
        assert_eq!(module.issues[0].code, DiagnosticCode::MismatchedEndName);
    }

    #[test]
    fn statements_other_than_assignments_are_recorded() {
        let body = r#"
    if b then
      y := 1.0;
    elseif signal in overflow then
      y := 2.0;
    else
      signal overflow;
    end if;
    (y, n) := helper(u);
    limit self.x, self;
"#;
        let module = build_algorithm_code(&block(body)).expect("build");
        let m = method(&module);
        assert_eq!(m.bindings.len(), 2);
        assert_eq!(m.conditions.len(), 2);
        assert!(matches!(&m.conditions[1], Condition::Signal(s) if s.members == vec!["overflow".to_string()]));
        assert_eq!(m.raised_signals[0].signals, vec!["overflow".to_string()]);
        assert_eq!(m.calls[0].targets.len(), 2);
        assert_eq!(m.limits[0].targets.len(), 1);
    }

    #[test]
    fn range_specifications_are_kept() {
        let source = "block B\nprotected\n  Real x(min = -1.5, max = 2);\npublic\nend B;";
        let module = build_algorithm_code(source).expect("build");
        let range = module.protected_variables.get("x").and_then(|e| e.range.clone());
        assert_eq!(
            range,
            Some(ValueRange {
                min: Some("-1.5".to_string()),
                max: Some("2".to_string())
            })
        );
    }

    #[test]
    fn syntax_errors_surface_as_parse_errors() {
        let err = build_algorithm_code("block B\nprotected\npublic\nend").expect_err("fails");
        assert!(matches!(err, BuildError::Parse(_)));
    }
}
