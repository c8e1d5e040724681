use efmi_alg::ast::Causality;
use efmi_alg::{
    build_algorithm_code, check_module, DiagnosticCode, PrimitiveType, TableMode, VariableEntry,
    VariableTable,
};

fn wrap(declarations: &str, body: &str) -> String {
    format!(
        "block Controller\n  input Real u;\n  output Real y;\nprotected\n{declarations}\npublic\n  method DoStep\n  algorithm\n{body}\n  end DoStep;\nend Controller;\n"
    )
}

fn codes(declarations: &str, body: &str) -> Vec<DiagnosticCode> {
    codes_with_manifest(declarations, body, &VariableTable::new())
}

fn codes_with_manifest(declarations: &str, body: &str, manifest: &VariableTable) -> Vec<DiagnosticCode> {
    let module = build_algorithm_code(&wrap(declarations, body)).expect("build");
    check_module(&module, manifest).into_iter().map(|d| d.code).collect()
}

#[test]
fn boolean_target_rejects_mixed_logical_operands() {
    let source = wrap(
        "  Boolean flag;\n  Real x;\n  Integer n;",
        "    self.flag := (self.x > 0) and self.n;",
    );
    let module = build_algorithm_code(&source).expect("build");
    let diagnostics = check_module(&module, &VariableTable::new());
    assert_eq!(diagnostics.len(), 1, "{diagnostics:?}");
    assert_eq!(diagnostics[0].code, DiagnosticCode::TypeMismatch);
    assert!(diagnostics[0].message.contains("flag"));
    assert!(diagnostics[0].message.contains("type mismatch"));
    assert_eq!(diagnostics[0].line, Some(11));

    let fixed = codes(
        "  Boolean flag;\n  Real x;\n  Boolean n;",
        "    self.flag := (self.x > 0) and self.n;",
    );
    assert!(fixed.is_empty(), "{fixed:?}");
}

#[test]
fn comparisons_assign_to_booleans() {
    assert!(codes("  Boolean flag;\n  Real x;", "    self.flag := self.x > 0.0;").is_empty());
}

#[test]
fn constants_must_match_declared_type() {
    assert_eq!(
        codes("  Integer n;", "    self.n := 1.5;"),
        vec![DiagnosticCode::TypeMismatch]
    );
    assert!(codes("  Integer n;", "    self.n := 3;").is_empty());
    assert!(codes("  Boolean b;", "    self.b := not true;").is_empty());
}

#[test]
fn references_must_match_declared_type() {
    assert_eq!(
        codes("  Integer n;", "    y := self.n;"),
        vec![DiagnosticCode::TypeMismatch]
    );
    assert!(codes("  Real x;", "    y := -self.x;").is_empty());
}

#[test]
fn unary_operators_constrain_the_target() {
    assert_eq!(
        codes("  Boolean b;", "    y := not self.b;"),
        vec![DiagnosticCode::TypeMismatch]
    );
    assert_eq!(
        codes("  Boolean b;", "    self.b := -self.b;"),
        vec![DiagnosticCode::TypeMismatch]
    );
}

#[test]
fn conversion_arguments_are_exempt() {
    assert!(codes("  Integer n;", "    y := real(self.n) * 2.0 + sqrt(self.n);").is_empty());

    let mismatches = codes("  Integer n;", "    y := self.n * 2.0 + self.n;");
    assert_eq!(mismatches, vec![DiagnosticCode::TypeMismatch]);
}

#[test]
fn builtin_return_types_are_checked() {
    assert_eq!(
        codes("  Integer n;", "    self.n := sin(u);"),
        vec![DiagnosticCode::TypeMismatch]
    );
    assert!(codes("  Integer n;", "    self.n := integer(u);").is_empty());
    assert!(codes("  Integer n;", "    self.n := lookup(u);").is_empty());
}

#[test]
fn undeclared_variables_are_reported_once_per_line() {
    let source = wrap("  Real x;", "    self.x := z + z * 2.0;\n    y := z;");
    let module = build_algorithm_code(&source).expect("build");
    let diagnostics = check_module(&module, &VariableTable::new());
    assert_eq!(diagnostics.len(), 2, "{diagnostics:?}");
    assert!(diagnostics.iter().all(|d| d.code == DiagnosticCode::UndeclaredVariable));
    assert!(diagnostics[0].message.contains("The variable z"));
    assert!(diagnostics[0].message.contains("(line 9)"));
    assert_eq!(diagnostics[1].line, Some(10));
}

#[test]
fn manifest_variables_are_in_scope() {
    let mut manifest = VariableTable::new();
    manifest.declare(
        "gain",
        VariableEntry::new(PrimitiveType::Real, Causality::Parameter, 3),
        TableMode::Element,
    );
    assert!(codes_with_manifest("  Real x;", "    self.x := gain * u;", &manifest).is_empty());
    assert_eq!(
        codes("  Real x;", "    self.x := gain * u;"),
        vec![DiagnosticCode::UndeclaredVariable]
    );
}

#[test]
fn index_variables_must_be_declared() {
    assert_eq!(
        codes("  Real v[3];", "    y := self.v[k];"),
        vec![DiagnosticCode::UndeclaredVariable]
    );
}

#[test]
fn elements_outside_declared_sizes_are_undeclared() {
    let source = wrap(
        "  Real x[3];",
        "    self.x[4] := 1.0;\n    self.x[99,2] := self.x[0];\n    self.x[3] := 1.0;",
    );
    let module = build_algorithm_code(&source).expect("build");
    let diagnostics = check_module(&module, &VariableTable::new());
    let found: Vec<(DiagnosticCode, Option<usize>)> =
        diagnostics.iter().map(|d| (d.code, d.line)).collect();
    assert_eq!(
        found,
        vec![
            (DiagnosticCode::UndeclaredVariable, Some(9)),
            (DiagnosticCode::UndeclaredVariable, Some(10)),
            (DiagnosticCode::UndeclaredVariable, Some(10)),
        ],
        "{diagnostics:?}"
    );
    assert!(diagnostics[0].message.contains("x[4]"));
}

#[test]
fn previous_values_resolve_to_their_variable() {
    assert!(codes("  Real x;", "    self.x := 'previous(x)' + u;").is_empty());
}

#[test]
fn if_expression_conditions_must_be_logical() {
    assert_eq!(
        codes("  Integer n;\n  Real x;", "    self.x := if self.n then 1.0 else 2.0;"),
        vec![DiagnosticCode::IllogicalCondition]
    );
    assert_eq!(
        codes("  Boolean b;\n  Real x;", "    self.x := if self.b then 1.0 elseif self.b then 2 else 3.0;"),
        vec![DiagnosticCode::TypeMismatch]
    );
}

#[test]
fn statement_conditions_must_be_logical() {
    let body = "    if u then\n      y := 1.0;\n    end if;";
    assert_eq!(codes("  Real x;", body), vec![DiagnosticCode::IllogicalCondition]);
    let body = "    if u > 1.0 or u < -1.0 then\n      y := 1.0;\n    end if;";
    assert!(codes("  Real x;", body).is_empty());
}

#[test]
fn signals_must_be_declared() {
    let body = "    if u > 1.0 then\n      signal overflow;\n    end if;";
    assert_eq!(codes("  Real x;", body), vec![DiagnosticCode::UndeclaredSignal]);
    assert!(codes("  Real x;\n  signal overflow;", body).is_empty());
}

#[test]
fn function_locals_shadow_block_variables() {
    let source = r#"
block B
protected
  Boolean x;
  function F
    input Real x;
    output Real r;
  algorithm
    r := x * 2.0;
  end F;
public
end B;
"#;
    let module = build_algorithm_code(source).expect("build");
    assert!(check_module(&module, &VariableTable::new()).is_empty());
}
