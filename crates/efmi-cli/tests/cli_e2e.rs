use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn efmi_check_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_efmi-check"))
}

const CONTROLLER: &str = "block Controller
  input Real u;
  output Real y;
protected
  Real gain;
public
  method DoStep
  algorithm
    self.y := self.u * self.gain;
  end DoStep;
end Controller;
";

fn manifest(gain_type: &str) -> String {
    format!(
        r#"<Manifest id="{{alg}}">
  <Files><File name="Controller.alg" role="Code"/></Files>
  <Variables>
    <RealVariable name="u" blockCausality="input"/>
    <RealVariable name="y" blockCausality="output"/>
    <{gain_type}Variable name="gain" blockCausality="state"/>
  </Variables>
</Manifest>
"#
    )
}

const CONTENT: &str = r#"<Content>
  <ModelRepresentation kind="AlgorithmCode" name="AlgorithmCode" manifest="./manifest.xml" manifestRefId="{alg}"/>
</Content>
"#;

fn write_efmu(dir: &Path, gain_type: &str) {
    fs::create_dir_all(dir.join("AlgorithmCode")).expect("mkdir");
    fs::write(dir.join("__content.xml"), CONTENT).expect("write content");
    fs::write(dir.join("AlgorithmCode/manifest.xml"), manifest(gain_type)).expect("write manifest");
    fs::write(dir.join("AlgorithmCode/Controller.alg"), CONTROLLER).expect("write alg");
}

fn run(args: &[&str]) -> Output {
    Command::new(efmi_check_bin())
        .args(args)
        .env("NO_COLOR", "1")
        .env_remove("RUST_LOG")
        .output()
        .expect("run efmi-check")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn parse_prints_a_summary() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_efmu(dir.path(), "Real");
    let alg = dir.path().join("AlgorithmCode/Controller.alg");
    let output = run(&["parse", alg.to_str().expect("utf-8 path")]);
    assert!(output.status.success(), "{output:?}");
    let text = stdout(&output);
    assert!(text.contains("block=Controller"), "{text}");
    assert!(text.contains("functions=1"), "{text}");
}

#[test]
fn consistent_efmu_passes_with_json_report() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_efmu(dir.path(), "Real");
    let output = run(&["audit", dir.path().to_str().expect("utf-8 path"), "--format", "json"]);
    assert!(output.status.success(), "{output:?}");
    let report: serde_json::Value = serde_json::from_str(&stdout(&output)).expect("json report");
    assert_eq!(report["version"], "efmi_audit_report_v1");
    assert_eq!(report["summary"]["error_count"], 0);
}

#[test]
fn errors_fail_the_process_unless_no_fail() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_efmu(dir.path(), "Integer");
    let path = dir.path().to_str().expect("utf-8 path");

    let failing = run(&["audit", path]);
    assert_eq!(failing.status.code(), Some(1));
    assert!(stdout(&failing).contains("[type-mismatch]"));

    let tolerated = run(&["audit", path, "--no-fail"]);
    assert!(tolerated.status.success(), "{tolerated:?}");
}

#[test]
fn reports_are_deterministic() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_efmu(dir.path(), "Integer");
    let path = dir.path().to_str().expect("utf-8 path");
    let first = run(&["audit", path, "--format", "json", "--no-fail"]);
    let second = run(&["audit", path, "--format", "json", "--no-fail"]);
    assert_eq!(first.stdout, second.stdout);
}

#[test]
fn config_file_selects_format_and_out_writes_the_report() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_efmu(dir.path(), "Real");
    let config = dir.path().join("audit.json");
    fs::write(&config, r#"{"format": "json"}"#).expect("write config");
    let out = dir.path().join("report.json");

    let output = run(&[
        "check",
        "--manifest",
        dir.path().join("AlgorithmCode/manifest.xml").to_str().expect("utf-8 path"),
        "--config",
        config.to_str().expect("utf-8 path"),
        "--out",
        out.to_str().expect("utf-8 path"),
    ]);
    assert!(output.status.success(), "{output:?}");
    let report: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&out).expect("read report")).expect("json");
    assert_eq!(report["command"], "check");
    assert_eq!(report["inputs"].as_array().map(Vec::len), Some(2));
}
