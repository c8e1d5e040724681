//! Typed AST for eFMI Algorithm Code.
//!
//! The builder returns one [`AlgorithmCodeModule`] per parse; nothing here is
//! shared between parses. Assignments are flattened into an ordered sequence
//! of [`BoundExpression`]s per function (loops unrolled, array constructors
//! decomposed), which is what the semantic checker consumes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::diagnostics::Diagnostic;
use crate::table::VariableTable;

pub type Name = String;

// ============================================================================
// Types and causalities
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PrimitiveType {
    Real,
    Integer,
    Boolean,
}

impl PrimitiveType {
    pub fn as_str(self) -> &'static str {
        match self {
            PrimitiveType::Real => "Real",
            PrimitiveType::Integer => "Integer",
            PrimitiveType::Boolean => "Boolean",
        }
    }
}

impl fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PrimitiveType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Real" => Ok(PrimitiveType::Real),
            "Integer" => Ok(PrimitiveType::Integer),
            "Boolean" => Ok(PrimitiveType::Boolean),
            other => Err(format!("unknown primitive type `{other}`")),
        }
    }
}

/// Data-flow role of a variable.
///
/// Manifests spell causalities as free strings (`blockCausality`); anything
/// not listed here is kept verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Causality {
    Input,
    Output,
    Parameter,
    Constant,
    State,
    Local,
    TunableParameter,
    DependentParameter,
    /// Equation Code manifests carry no causality.
    Unspecified,
    Other(String),
}

impl Causality {
    pub fn parse(s: &str) -> Self {
        match s.trim() {
            "" => Causality::Unspecified,
            "input" => Causality::Input,
            "output" => Causality::Output,
            "parameter" => Causality::Parameter,
            "constant" => Causality::Constant,
            "state" => Causality::State,
            "local" => Causality::Local,
            "tunableParameter" => Causality::TunableParameter,
            "dependentParameter" => Causality::DependentParameter,
            other => Causality::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Causality::Input => "input",
            Causality::Output => "output",
            Causality::Parameter => "parameter",
            Causality::Constant => "constant",
            Causality::State => "state",
            Causality::Local => "local",
            Causality::TunableParameter => "tunableParameter",
            Causality::DependentParameter => "dependentParameter",
            Causality::Unspecified => "",
            Causality::Other(s) => s,
        }
    }

    /// Causalities kept in aggregate (cross-manifest) tables.
    pub fn is_interface(&self) -> bool {
        matches!(
            self,
            Causality::Unspecified | Causality::Input | Causality::Output
        )
    }

    /// Manifest causality `self` against the Algorithm Code causality `declared`.
    ///
    /// Tunable and dependent parameters are declared as `parameter`; every
    /// other causality must match exactly.
    pub fn accepts_declared(&self, declared: &Causality) -> bool {
        match self {
            Causality::TunableParameter | Causality::DependentParameter => {
                *declared == Causality::Parameter
            }
            other => other == declared,
        }
    }
}

impl fmt::Display for Causality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Causality::Unspecified => f.write_str("(none)"),
            other => f.write_str(other.as_str()),
        }
    }
}

impl From<String> for Causality {
    fn from(s: String) -> Self {
        Causality::parse(&s)
    }
}

impl From<Causality> for String {
    fn from(c: Causality) -> Self {
        c.as_str().to_string()
    }
}

// ============================================================================
// Expressions
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOperator {
    Or,
    And,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Add,
    Subtract,
    Multiply,
    Divide,
    Power,
}

impl BinaryOperator {
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        Some(match symbol {
            "or" => BinaryOperator::Or,
            "and" => BinaryOperator::And,
            "==" => BinaryOperator::Equal,
            "<>" => BinaryOperator::NotEqual,
            "<" => BinaryOperator::Less,
            "<=" => BinaryOperator::LessEqual,
            ">" => BinaryOperator::Greater,
            ">=" => BinaryOperator::GreaterEqual,
            "+" => BinaryOperator::Add,
            "-" => BinaryOperator::Subtract,
            "*" => BinaryOperator::Multiply,
            "/" => BinaryOperator::Divide,
            "^" => BinaryOperator::Power,
            _ => return None,
        })
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOperator::Or => "or",
            BinaryOperator::And => "and",
            BinaryOperator::Equal => "==",
            BinaryOperator::NotEqual => "<>",
            BinaryOperator::Less => "<",
            BinaryOperator::LessEqual => "<=",
            BinaryOperator::Greater => ">",
            BinaryOperator::GreaterEqual => ">=",
            BinaryOperator::Add => "+",
            BinaryOperator::Subtract => "-",
            BinaryOperator::Multiply => "*",
            BinaryOperator::Divide => "/",
            BinaryOperator::Power => "^",
        }
    }

    /// `and` / `or`.
    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOperator::Or | BinaryOperator::And)
    }

    /// Relational and equality operators: numeric operands, Boolean result.
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOperator::Equal
                | BinaryOperator::NotEqual
                | BinaryOperator::Less
                | BinaryOperator::LessEqual
                | BinaryOperator::Greater
                | BinaryOperator::GreaterEqual
        )
    }
}

impl fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOperator {
    Negate,
    Not,
}

impl UnaryOperator {
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol {
            "-" => Some(UnaryOperator::Negate),
            "not" => Some(UnaryOperator::Not),
            _ => None,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOperator::Negate => "-",
            UnaryOperator::Not => "not",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constant {
    pub ty: PrimitiveType,
    /// Literal as written (`1`, `2.5e-3`, `true`).
    pub text: String,
    pub line: usize,
}

/// A resolved variable access.
///
/// `name` is the table key: `self.` is dropped, segments are joined with `.`,
/// and subscripts that resolve to integers are appended (`x[2]`, `m[1,3]`).
/// When a subscript cannot be resolved the aggregate name is used and the
/// variables the subscript mentions are kept in `index_references`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    pub name: Name,
    pub state: bool,
    pub line: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub index_references: Vec<Reference>,
}

impl Reference {
    pub fn new(name: impl Into<Name>, line: usize) -> Self {
        Self {
            name: name.into(),
            state: false,
            line,
            index_references: Vec::new(),
        }
    }

    /// Element of this reference at 1-based `indices`; `m[2]` + `[3]` is `m[2,3]`.
    pub fn element(&self, indices: &[usize]) -> Reference {
        let joined = indices
            .iter()
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let name = match self.name.strip_suffix(']') {
            Some(open) => format!("{open},{joined}]"),
            None => format!("{}[{joined}]", self.name),
        };
        Reference {
            name,
            state: self.state,
            line: self.line,
            index_references: self.index_references.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinaryOperation {
    pub left: Box<Expression>,
    pub op: BinaryOperator,
    pub right: Box<Expression>,
    pub line: usize,
}

/// `-e` / `not e`. The operand keeps its own variant so callers can match the
/// inner kind directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnaryOperation {
    pub op: UnaryOperator,
    pub operand: Box<Expression>,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElseIf {
    pub condition: Expression,
    pub then: Expression,
}

/// Invariant: `conditions.len() == thens.len()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IfExpression {
    pub conditions: Vec<Expression>,
    pub thens: Vec<Expression>,
    pub else_ifs: Vec<ElseIf>,
    pub otherwise: Option<Box<Expression>>,
    pub line: usize,
}

impl IfExpression {
    /// All conditions, top-level first.
    pub fn all_conditions(&self) -> impl Iterator<Item = &Expression> {
        self.conditions
            .iter()
            .chain(self.else_ifs.iter().map(|e| &e.condition))
    }

    /// Every value branch: thens, elseif-thens, else.
    pub fn branches(&self) -> impl Iterator<Item = &Expression> {
        self.thens
            .iter()
            .chain(self.else_ifs.iter().map(|e| &e.then))
            .chain(self.otherwise.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: Name,
    pub args: Vec<Expression>,
    pub line: usize,
}

/// `{a, b, ...}` used inside a larger expression (assignment right-hand sides
/// are decomposed by the builder instead).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayConstructor {
    pub elements: Vec<Expression>,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Expression {
    Constant(Constant),
    Reference(Reference),
    Binary(BinaryOperation),
    Unary(UnaryOperation),
    If(IfExpression),
    Call(FunctionCall),
    Array(ArrayConstructor),
}

impl Expression {
    /// Every variable access in evaluation order, including the variables
    /// mentioned by unresolved subscripts and by if-expression conditions.
    pub fn references(&self) -> Vec<&Reference> {
        let mut out = Vec::new();
        self.collect_references(&mut out);
        out
    }

    fn collect_references<'a>(&'a self, out: &mut Vec<&'a Reference>) {
        match self {
            Expression::Constant(_) => {}
            Expression::Reference(r) => push_reference(r, out),
            Expression::Binary(b) => {
                b.left.collect_references(out);
                b.right.collect_references(out);
            }
            Expression::Unary(u) => u.operand.collect_references(out),
            Expression::If(i) => {
                for (condition, then) in i.conditions.iter().zip(&i.thens) {
                    condition.collect_references(out);
                    then.collect_references(out);
                }
                for e in &i.else_ifs {
                    e.condition.collect_references(out);
                    e.then.collect_references(out);
                }
                if let Some(otherwise) = &i.otherwise {
                    otherwise.collect_references(out);
                }
            }
            Expression::Call(c) => c.args.iter().for_each(|a| a.collect_references(out)),
            Expression::Array(a) => a.elements.iter().for_each(|e| e.collect_references(out)),
        }
    }
}

pub(crate) fn push_reference<'a>(r: &'a Reference, out: &mut Vec<&'a Reference>) {
    out.push(r);
    for index in &r.index_references {
        push_reference(index, out);
    }
}

fn fmt_operand(e: &Expression, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match e {
        Expression::Binary(_) => write!(f, "({e})"),
        other => write!(f, "{other}"),
    }
}

/// Source-like rendering; nested binary operations are parenthesized so the
/// grouping is explicit (`a or (b and c)`).
impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Constant(c) => f.write_str(&c.text),
            Expression::Reference(r) => f.write_str(&r.name),
            Expression::Binary(b) => {
                fmt_operand(&b.left, f)?;
                write!(f, " {} ", b.op)?;
                fmt_operand(&b.right, f)
            }
            Expression::Unary(u) => {
                match u.op {
                    UnaryOperator::Negate => f.write_str("-")?,
                    UnaryOperator::Not => f.write_str("not ")?,
                }
                fmt_operand(&u.operand, f)
            }
            Expression::If(i) => {
                f.write_str("(")?;
                for (n, (condition, then)) in i.conditions.iter().zip(&i.thens).enumerate() {
                    let keyword = if n == 0 { "if" } else { " elseif" };
                    write!(f, "{keyword} {condition} then {then}")?;
                }
                for e in &i.else_ifs {
                    write!(f, " elseif {} then {}", e.condition, e.then)?;
                }
                if let Some(otherwise) = &i.otherwise {
                    write!(f, " else {otherwise}")?;
                }
                f.write_str(")")
            }
            Expression::Call(c) => {
                write!(f, "{}(", c.name)?;
                for (n, arg) in c.args.iter().enumerate() {
                    if n > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(")")
            }
            Expression::Array(a) => {
                f.write_str("{")?;
                for (n, e) in a.elements.iter().enumerate() {
                    if n > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{e}")?;
                }
                f.write_str("}")
            }
        }
    }
}

// ============================================================================
// Bound expressions and statements
// ============================================================================

/// Category of a bound expression's right-hand side, looking through unary
/// operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingKind {
    Constant,
    Reference,
    BinaryOperation,
    IfExpression,
    FunctionCall,
    ArrayConstructor,
}

/// One `target := value` registration, in statement order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundExpression {
    pub id: usize,
    pub target: Reference,
    pub value: Expression,
    pub line: usize,
}

impl BoundExpression {
    pub fn kind(&self) -> BindingKind {
        kind_of(&self.value)
    }
}

fn kind_of(value: &Expression) -> BindingKind {
    match value {
        Expression::Unary(u) => kind_of(&u.operand),
        Expression::Constant(_) => BindingKind::Constant,
        Expression::Reference(_) => BindingKind::Reference,
        Expression::Binary(_) => BindingKind::BinaryOperation,
        Expression::If(_) => BindingKind::IfExpression,
        Expression::Call(_) => BindingKind::FunctionCall,
        Expression::Array(_) => BindingKind::ArrayConstructor,
    }
}

/// `signal x`, `signal in a, b`, `signal not in a or cond`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalCondition {
    pub signal: Option<Name>,
    pub negated: bool,
    pub members: Vec<Name>,
    pub fallback: Option<Expression>,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Condition {
    Expression { expression: Expression, line: usize },
    Signal(SignalCondition),
}

/// `f(x);` or `(a, b) := f(x);`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallStatement {
    pub targets: Vec<Reference>,
    pub call: FunctionCall,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitStatement {
    pub targets: Vec<Reference>,
    pub line: usize,
}

/// `signal a, b;`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRaise {
    pub signals: Vec<Name>,
    pub line: usize,
}

// ============================================================================
// Declarations
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum DeclaredType {
    Primitive(PrimitiveType),
    Record(Name),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DimensionSpec {
    Fixed(usize),
    /// `:`
    Derived,
    /// Not reducible to an integer at parse time; kept as written.
    Symbolic(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValueRange {
    pub min: Option<String>,
    pub max: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableDeclaration {
    pub name: Name,
    pub ty: DeclaredType,
    pub causality: Causality,
    pub dimensions: Vec<DimensionSpec>,
    pub range: Option<ValueRange>,
    pub line: usize,
}

impl VariableDeclaration {
    /// Dimension sizes when every dimension is a fixed integer.
    pub fn fixed_dimensions(&self) -> Option<Vec<usize>> {
        self.dimensions
            .iter()
            .map(|d| match d {
                DimensionSpec::Fixed(n) => Some(*n),
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordDeclaration {
    pub name: Name,
    pub fields: Vec<VariableDeclaration>,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalDeclaration {
    pub name: Name,
    pub line: usize,
}

// ============================================================================
// Functions and modules
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionKind {
    Function,
    Method,
}

impl FunctionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FunctionKind::Function => "function",
            FunctionKind::Method => "method",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionRecord {
    pub name: Name,
    pub kind: FunctionKind,
    pub line: usize,
    /// `signals a, b;` interface.
    pub signals: Vec<Name>,
    /// Parameters (`input`/`output`) and protected locals (`local`).
    pub locals: VariableTable,
    pub bindings: Vec<BoundExpression>,
    pub conditions: Vec<Condition>,
    pub calls: Vec<CallStatement>,
    pub limits: Vec<LimitStatement>,
    pub raised_signals: Vec<SignalRaise>,
}

impl FunctionRecord {
    pub fn new(name: impl Into<Name>, kind: FunctionKind, line: usize) -> Self {
        Self {
            name: name.into(),
            kind,
            line,
            signals: Vec::new(),
            locals: VariableTable::new(),
            bindings: Vec::new(),
            conditions: Vec::new(),
            calls: Vec::new(),
            limits: Vec::new(),
            raised_signals: Vec::new(),
        }
    }

    /// Register `target := value`; ids follow insertion order.
    pub fn bind(&mut self, target: Reference, value: Expression, line: usize) {
        let id = self.bindings.len();
        self.bindings.push(BoundExpression {
            id,
            target,
            value,
            line,
        });
    }

    /// Bindings of one category, in insertion order.
    pub fn bindings_of(&self, kind: BindingKind) -> impl Iterator<Item = &BoundExpression> {
        self.bindings.iter().filter(move |b| b.kind() == kind)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmCodeModule {
    pub name: Name,
    pub line: usize,
    /// Block-level `input`/`output`/`parameter`/`constant` entities.
    pub block_variables: VariableTable,
    /// Variables of the `protected` section (`state` unless directed).
    pub protected_variables: VariableTable,
    pub records: Vec<RecordDeclaration>,
    pub signals: Vec<SignalDeclaration>,
    pub functions: Vec<FunctionRecord>,
    /// Non-fatal findings raised while building (duplicates, unsupported
    /// constructs).
    pub issues: Vec<Diagnostic>,
}

impl AlgorithmCodeModule {
    pub fn new(name: impl Into<Name>, line: usize) -> Self {
        Self {
            name: name.into(),
            line,
            block_variables: VariableTable::new(),
            protected_variables: VariableTable::new(),
            records: Vec::new(),
            signals: Vec::new(),
            functions: Vec::new(),
            issues: Vec::new(),
        }
    }

    pub fn function(&self, name: &str) -> Option<&FunctionRecord> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn binding_count(&self) -> usize {
        self.functions.iter().map(|f| f.bindings.len()).sum()
    }
}
