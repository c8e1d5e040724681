//! Semantic checks over a built [`AlgorithmCodeModule`].
//!
//! Per function, in this order:
//! - every referenced variable is declared somewhere in scope
//! - every binding's right-hand side fits the declared type of its target
//! - every statement condition is a logical expression
//! - every raised or tested signal is declared
//!
//! Lookups walk function locals, protected variables, block entities and
//! finally the manifest table. Checking never stops early and never mutates
//! the tables.

use std::collections::BTreeSet;
use tracing::debug;

use crate::ast::*;
use crate::diagnostics::{Diagnostic, DiagnosticCode};
use crate::table::{is_expanded, VariableEntry, VariableTable};

// ============================================================================
// Scope
// ============================================================================

/// Ordered chain of tables; the first table declaring a name wins.
#[derive(Debug, Clone)]
pub struct Scope<'a> {
    layers: Vec<&'a VariableTable>,
}

impl<'a> Scope<'a> {
    pub fn new(layers: Vec<&'a VariableTable>) -> Self {
        Self { layers }
    }

    pub fn for_function(
        module: &'a AlgorithmCodeModule,
        function: &'a FunctionRecord,
        manifest: &'a VariableTable,
    ) -> Self {
        Self::new(vec![
            &function.locals,
            &module.protected_variables,
            &module.block_variables,
            manifest,
        ])
    }

    /// Entry for a reference name.
    ///
    /// Falls back to the variable behind `'previous(x)'`, and to the
    /// aggregate (`x[2]` → `x`) only when the aggregate has no per-element
    /// keys, so an out-of-range element of an expanded array stays undeclared.
    pub fn lookup(&self, name: &str) -> Option<&'a VariableEntry> {
        lookup_candidates(name).iter().find_map(|(candidate, aggregate)| {
            self.layers
                .iter()
                .find_map(|t| t.get(candidate))
                .filter(|entry| !*aggregate || !is_expanded(&entry.dimensions))
        })
    }
}

fn strip_subscripts(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut depth = 0usize;
    for c in name.chars() {
        match c {
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }
    out
}

/// Names to try in order; the flag marks a subscript-stripped aggregate.
fn lookup_candidates(name: &str) -> Vec<(String, bool)> {
    let mut candidates = vec![(name.to_string(), false)];
    let mut push = |c: String, aggregate: bool| {
        if !candidates.iter().any(|(existing, _)| *existing == c) {
            candidates.push((c, aggregate));
        }
    };
    push(strip_subscripts(name), true);
    if let Some(inner) = name
        .strip_prefix("'previous(")
        .and_then(|rest| rest.strip_suffix(")'"))
    {
        push(inner.to_string(), false);
        push(strip_subscripts(inner), true);
    }
    candidates
}

// ============================================================================
// Classification
// ============================================================================

/// What an expression evaluates to, as far as declarations tell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueClass {
    Logical,
    Numeric,
    /// Unknown function result or undeclared variable; fits either context.
    Unknown,
    /// Operands that no operator accepts.
    Invalid,
}

impl ValueClass {
    pub fn is_logical(self) -> bool {
        matches!(self, ValueClass::Logical | ValueClass::Unknown)
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, ValueClass::Numeric | ValueClass::Unknown)
    }

    fn combine(self, other: ValueClass) -> ValueClass {
        match (self, other) {
            (ValueClass::Invalid, _) | (_, ValueClass::Invalid) => ValueClass::Invalid,
            (ValueClass::Unknown, c) | (c, ValueClass::Unknown) => c,
            (a, b) if a == b => a,
            _ => ValueClass::Invalid,
        }
    }
}

/// Return type of a builtin function, if it is one.
pub fn builtin_return_type(name: &str) -> Option<PrimitiveType> {
    match name {
        "real" | "sqrt" | "abs" | "sin" | "cos" | "tan" | "asin" | "acos" | "atan" | "atan2"
        | "exp" | "log" | "log10" | "sinh" | "cosh" | "tanh" => Some(PrimitiveType::Real),
        "integer" | "size" => Some(PrimitiveType::Integer),
        _ => None,
    }
}

/// Arguments of these calls are converted, so their types are not compared
/// with the assignment target.
fn converts_arguments(name: &str) -> bool {
    matches!(name, "real" | "sqrt" | "integer" | "size")
}

pub fn classify(expr: &Expression, scope: &Scope<'_>) -> ValueClass {
    match expr {
        Expression::Constant(c) if c.ty == PrimitiveType::Boolean => ValueClass::Logical,
        Expression::Constant(_) => ValueClass::Numeric,
        Expression::Reference(r) => match scope.lookup(&r.name) {
            Some(entry) if entry.ty == PrimitiveType::Boolean => ValueClass::Logical,
            Some(_) => ValueClass::Numeric,
            None => ValueClass::Unknown,
        },
        Expression::Unary(u) => {
            let operand = classify(&u.operand, scope);
            match u.op {
                UnaryOperator::Not if operand.is_logical() => ValueClass::Logical,
                UnaryOperator::Negate if operand.is_numeric() => ValueClass::Numeric,
                _ => ValueClass::Invalid,
            }
        }
        Expression::Binary(b) => {
            let left = classify(&b.left, scope);
            let right = classify(&b.right, scope);
            if left == ValueClass::Invalid || right == ValueClass::Invalid {
                return ValueClass::Invalid;
            }
            if b.op.is_logical() {
                if left.is_logical() && right.is_logical() {
                    return ValueClass::Logical;
                }
            } else if left.is_numeric() && right.is_numeric() {
                return if b.op.is_comparison() {
                    ValueClass::Logical
                } else {
                    ValueClass::Numeric
                };
            }
            ValueClass::Invalid
        }
        Expression::Call(c) => match builtin_return_type(&c.name) {
            Some(_) => ValueClass::Numeric,
            None => ValueClass::Unknown,
        },
        Expression::If(i) => i
            .branches()
            .map(|branch| classify(branch, scope))
            .fold(ValueClass::Unknown, ValueClass::combine),
        Expression::Array(a) => a
            .elements
            .iter()
            .map(|e| classify(e, scope))
            .fold(ValueClass::Unknown, ValueClass::combine),
    }
}

/// True when `expr` can be used where a Boolean is required.
pub fn is_logical(expr: &Expression, scope: &Scope<'_>) -> bool {
    classify(expr, scope).is_logical()
}

// ============================================================================
// Entry points
// ============================================================================

/// Check every function of `module` against its declarations and `manifest`.
pub fn check_module(module: &AlgorithmCodeModule, manifest: &VariableTable) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    for function in &module.functions {
        diagnostics.extend(check_function(module, function, manifest));
    }
    diagnostics
}

pub fn check_function(
    module: &AlgorithmCodeModule,
    function: &FunctionRecord,
    manifest: &VariableTable,
) -> Vec<Diagnostic> {
    let scope = Scope::for_function(module, function, manifest);
    let mut out = Vec::new();

    check_declarations(function, &scope, &mut out);
    for binding in &function.bindings {
        check_binding(binding, &scope, &mut out);
    }
    for condition in &function.conditions {
        check_condition(condition, &scope, &mut out);
    }
    check_signals(module, function, &mut out);

    debug!(
        function = %function.name,
        bindings = function.bindings.len(),
        diagnostics = out.len(),
        "checked function"
    );
    out
}

// ============================================================================
// Declarations
// ============================================================================

fn function_references(function: &FunctionRecord) -> Vec<&Reference> {
    let mut refs = Vec::new();
    for binding in &function.bindings {
        push_reference(&binding.target, &mut refs);
        refs.extend(binding.value.references());
    }
    for condition in &function.conditions {
        match condition {
            Condition::Expression { expression, .. } => refs.extend(expression.references()),
            Condition::Signal(signal) => {
                if let Some(fallback) = &signal.fallback {
                    refs.extend(fallback.references());
                }
            }
        }
    }
    for call in &function.calls {
        for target in &call.targets {
            push_reference(target, &mut refs);
        }
        for arg in &call.call.args {
            refs.extend(arg.references());
        }
    }
    for limit in &function.limits {
        for target in &limit.targets {
            push_reference(target, &mut refs);
        }
    }
    refs
}

fn check_declarations(function: &FunctionRecord, scope: &Scope<'_>, out: &mut Vec<Diagnostic>) {
    let mut reported = BTreeSet::new();
    for reference in function_references(function) {
        if scope.lookup(&reference.name).is_some() {
            continue;
        }
        if reported.insert((reference.name.clone(), reference.line)) {
            out.push(
                Diagnostic::error(
                    DiagnosticCode::UndeclaredVariable,
                    format!(
                        "The variable {} which is contained in the expressions (line {}) is not declared anywhere in the Algorithm code block",
                        reference.name, reference.line
                    ),
                )
                .at_line(reference.line),
            );
        }
    }
}

// ============================================================================
// Bindings
// ============================================================================

fn check_binding(binding: &BoundExpression, scope: &Scope<'_>, out: &mut Vec<Diagnostic>) {
    // Undeclared targets were reported above.
    let Some(entry) = scope.lookup(&binding.target.name) else {
        return;
    };
    check_assignment(&binding.target.name, entry.ty, &binding.value, binding.line, scope, out);
}

fn type_mismatch(line: usize, message: String) -> Diagnostic {
    Diagnostic::error(DiagnosticCode::TypeMismatch, message).at_line(line)
}

fn check_assignment(
    target: &str,
    ty: PrimitiveType,
    value: &Expression,
    line: usize,
    scope: &Scope<'_>,
    out: &mut Vec<Diagnostic>,
) {
    match value {
        Expression::Unary(u) => {
            let fits = match u.op {
                UnaryOperator::Not => ty == PrimitiveType::Boolean,
                UnaryOperator::Negate => ty != PrimitiveType::Boolean,
            };
            if !fits {
                out.push(type_mismatch(
                    line,
                    format!(
                        "Expression in line {line} contains variables type mismatch: The {target} variable is of type {ty} and cannot hold the result of the unary operator `{}`",
                        u.op.symbol()
                    ),
                ));
                return;
            }
            check_assignment(target, ty, &u.operand, line, scope, out);
        }
        Expression::Constant(c) => {
            if c.ty != ty {
                out.push(type_mismatch(
                    line,
                    format!(
                        "The value {} assigned to the {target} variable in the expression (line {line}) does not match the declared variable type of {ty}",
                        c.text
                    ),
                ));
            }
        }
        Expression::Reference(r) => {
            if let Some(entry) = scope.lookup(&r.name) {
                if entry.ty != ty {
                    out.push(type_mismatch(
                        line,
                        format!(
                            "Expression in line {line} contains variables type mismatch: The {target} variable is of type {ty} and the variable {} is of type {}, types must match",
                            r.name, entry.ty
                        ),
                    ));
                }
            }
        }
        Expression::Binary(_) => check_operation(target, ty, value, line, scope, out),
        Expression::If(i) => {
            for condition in i.all_conditions() {
                if !is_logical(condition, scope) {
                    out.push(
                        Diagnostic::error(
                            DiagnosticCode::IllogicalCondition,
                            format!(
                                "The condition `{condition}` of the if-expression assigned to {target} (line {line}) cannot be evaluated as a logical expression"
                            ),
                        )
                        .at_line(line),
                    );
                }
            }
            for branch in i.branches() {
                check_assignment(target, ty, branch, line, scope, out);
            }
        }
        Expression::Call(c) => {
            if let Some(returned) = builtin_return_type(&c.name) {
                if returned != ty {
                    out.push(type_mismatch(
                        line,
                        format!(
                            "Expression in line {line} contains variables type mismatch: The {target} variable is of type {ty} while the function {} returns {returned}, types must match",
                            c.name
                        ),
                    ));
                }
            }
        }
        Expression::Array(a) => {
            for element in &a.elements {
                check_assignment(target, ty, element, line, scope, out);
            }
        }
    }
}

/// `target := left op right`.
fn check_operation(
    target: &str,
    ty: PrimitiveType,
    value: &Expression,
    line: usize,
    scope: &Scope<'_>,
    out: &mut Vec<Diagnostic>,
) {
    let class = classify(value, scope);
    let fits = match ty {
        PrimitiveType::Boolean => class.is_logical(),
        PrimitiveType::Real | PrimitiveType::Integer => class.is_numeric(),
    };
    if !fits {
        out.push(type_mismatch(
            line,
            format!(
                "Expression in line {line} contains variables type mismatch: The {target} variable is of type {ty} while the expression in the right is not of type {ty}, types must match"
            ),
        ));
        return;
    }
    if ty == PrimitiveType::Boolean {
        return;
    }

    let mut operands = Vec::new();
    operand_variables(value, &mut operands);
    let mut reported = BTreeSet::new();
    for operand in operands {
        let Some(entry) = scope.lookup(&operand.name) else {
            continue;
        };
        if entry.ty != ty && reported.insert(operand.name.as_str()) {
            out.push(type_mismatch(
                line,
                format!(
                    "Expression in line {line} contains variables type mismatch: The {target} variable is of type {ty} and the variable {} is of type {}, types must match",
                    operand.name, entry.ty
                ),
            ));
        }
    }
}

/// Variables whose values flow into an operation's result.
///
/// Skips subscripts, if-expression conditions and converted call arguments.
fn operand_variables<'e>(expr: &'e Expression, out: &mut Vec<&'e Reference>) {
    match expr {
        Expression::Constant(_) => {}
        Expression::Reference(r) => out.push(r),
        Expression::Binary(b) => {
            operand_variables(&b.left, out);
            operand_variables(&b.right, out);
        }
        Expression::Unary(u) => operand_variables(&u.operand, out),
        Expression::If(i) => i.branches().for_each(|b| operand_variables(b, out)),
        Expression::Call(c) if converts_arguments(&c.name) => {}
        Expression::Call(c) => c.args.iter().for_each(|a| operand_variables(a, out)),
        Expression::Array(a) => a.elements.iter().for_each(|e| operand_variables(e, out)),
    }
}

// ============================================================================
// Conditions and signals
// ============================================================================

fn check_condition(condition: &Condition, scope: &Scope<'_>, out: &mut Vec<Diagnostic>) {
    let (expression, line) = match condition {
        Condition::Expression { expression, line } => (expression, *line),
        Condition::Signal(SignalCondition {
            fallback: Some(expression),
            line,
            ..
        }) => (expression, *line),
        Condition::Signal(_) => return,
    };
    if !is_logical(expression, scope) {
        out.push(
            Diagnostic::error(
                DiagnosticCode::IllogicalCondition,
                format!("The condition `{expression}` in line {line} cannot be evaluated as a logical expression"),
            )
            .at_line(line),
        );
    }
}

fn check_signals(module: &AlgorithmCodeModule, function: &FunctionRecord, out: &mut Vec<Diagnostic>) {
    let declared: BTreeSet<&str> = module
        .signals
        .iter()
        .map(|s| s.name.as_str())
        .chain(function.signals.iter().map(String::as_str))
        .collect();

    let mut used: Vec<(&str, usize)> = Vec::new();
    for raise in &function.raised_signals {
        used.extend(raise.signals.iter().map(|s| (s.as_str(), raise.line)));
    }
    for condition in &function.conditions {
        if let Condition::Signal(signal) = condition {
            used.extend(signal.signal.iter().map(|s| (s.as_str(), signal.line)));
            used.extend(signal.members.iter().map(|s| (s.as_str(), signal.line)));
        }
    }

    for (name, line) in used {
        if !declared.contains(name) {
            out.push(
                Diagnostic::error(
                    DiagnosticCode::UndeclaredSignal,
                    format!("The signal {name} (line {line}) is not declared anywhere in the Algorithm code block"),
                )
                .at_line(line),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::TableMode;

    fn table(vars: &[(&str, PrimitiveType)]) -> VariableTable {
        let mut t = VariableTable::new();
        for (name, ty) in vars {
            t.declare(name, VariableEntry::new(*ty, Causality::Input, 1), TableMode::Element);
        }
        t
    }

    fn expr(source: &str) -> Expression {
        crate::builder::build_expression(source).expect("expression")
    }

    #[test]
    fn classification_follows_operators() {
        let vars = table(&[
            ("b", PrimitiveType::Boolean),
            ("x", PrimitiveType::Real),
            ("n", PrimitiveType::Integer),
        ]);
        let scope = Scope::new(vec![&vars]);
        assert_eq!(classify(&expr("b and x > 0"), &scope), ValueClass::Logical);
        assert_eq!(classify(&expr("x * n + 1"), &scope), ValueClass::Numeric);
        assert_eq!(classify(&expr("b and n"), &scope), ValueClass::Invalid);
        assert_eq!(classify(&expr("b + 1"), &scope), ValueClass::Invalid);
        assert_eq!(classify(&expr("f(x)"), &scope), ValueClass::Unknown);
        assert_eq!(classify(&expr("not b"), &scope), ValueClass::Logical);
        assert_eq!(classify(&expr("if b then x else 1.0"), &scope), ValueClass::Numeric);
        assert_eq!(classify(&expr("if b then x else false"), &scope), ValueClass::Invalid);
    }

    #[test]
    fn unknown_calls_fit_either_context() {
        let vars = table(&[("b", PrimitiveType::Boolean)]);
        let scope = Scope::new(vec![&vars]);
        assert!(is_logical(&expr("f(1) and b"), &scope));
        assert!(!is_logical(&expr("sqrt(2.0) and b"), &scope));
    }

    #[test]
    fn lookup_falls_back_to_aggregate_and_previous() {
        let mut vars = VariableTable::new();
        vars.declare("v", VariableEntry::new(PrimitiveType::Real, Causality::State, 1), TableMode::Element);
        let scope = Scope::new(vec![&vars]);
        assert!(scope.lookup("v[7]").is_some());
        assert!(scope.lookup("'previous(v)'").is_some());
        assert!(scope.lookup("w").is_none());
    }

    #[test]
    fn expanded_arrays_only_resolve_declared_elements() {
        let mut vars = VariableTable::new();
        vars.declare(
            "x",
            VariableEntry::new(PrimitiveType::Real, Causality::State, 1).with_dimensions(vec![3]),
            TableMode::Element,
        );
        let scope = Scope::new(vec![&vars]);
        assert!(scope.lookup("x").is_some());
        assert!(scope.lookup("x[3]").is_some());
        assert!(scope.lookup("'previous(x[2])'").is_some());
        assert!(scope.lookup("x[4]").is_none());
        assert!(scope.lookup("x[0]").is_none());
        assert!(scope.lookup("'previous(x[4])'").is_none());
    }

    #[test]
    fn first_layer_wins() {
        let inner = table(&[("x", PrimitiveType::Integer)]);
        let outer = table(&[("x", PrimitiveType::Real)]);
        let scope = Scope::new(vec![&inner, &outer]);
        assert_eq!(scope.lookup("x").map(|e| e.ty), Some(PrimitiveType::Integer));
    }
}
