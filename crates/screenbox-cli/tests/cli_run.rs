// Test module - relaxed lint rules
#![allow(clippy::indexing_slicing)]
#![allow(clippy::panic)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(missing_docs)]
#![cfg(unix)]

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

const BIN: &str = env!("CARGO_BIN_EXE_screenbox");

const DEFINITION: &str = r#"{
  "id": "oversold-rsi",
  "name": "Oversold RSI",
  "type": "template",
  "source": {"type": "code", "content": "def screen_stocks(data):\n    return {\"matches\": []}\n"},
  "configuration": {"universe": ["AAPL", "MSFT"]}
}"#;

fn write_definition(dir: &Path) -> PathBuf {
    let path = dir.join("screener.json");
    fs::write(&path, DEFINITION).unwrap();
    path
}

fn write_config(dir: &Path, interpreter: &str) -> PathBuf {
    let path = dir.join("config.yaml");
    let artifacts = dir.join("artifacts");
    let config = format!(
        "interpreter: {interpreter}\ninterpreter_args: []\nartifact_dir: {}\nlibraries:\n  strategy: skip\n",
        artifacts.display()
    );
    fs::write(&path, config).unwrap();
    path
}

fn run(args: &[&str]) -> Output {
    Command::new(BIN).args(args).output().unwrap()
}

fn stdout_json(output: &Output) -> serde_json::Value {
    let text = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str(text.trim()).unwrap_or_else(|err| panic!("bad json {text:?}: {err}"))
}

#[test]
fn assemble_prints_program_with_one_marker_pair() {
    let dir = tempfile::tempdir().unwrap();
    let definition = write_definition(dir.path());

    let output = run(&["assemble", "--definition", definition.to_str().unwrap()]);

    assert!(output.status.success());
    let program = String::from_utf8(output.stdout).unwrap();
    assert_eq!(program.matches("RESULT_JSON_START").count(), 1);
    assert_eq!(program.matches("RESULT_JSON_END").count(), 1);
    assert!(program.contains("def screen_stocks(data):"));
    assert!(program.contains("UNIVERSE = [\"AAPL\", \"MSFT\"]"));
}

#[test]
fn extract_reads_captured_output_file() {
    let dir = tempfile::tempdir().unwrap();
    let captured = dir.path().join("stdout.txt");
    fs::write(
        &captured,
        "loading...\nRESULT_JSON_START\n{\"matches\": [\"AAPL\"], \"details\": {\"AAPL\": {\"rsi\": 27.1}}}\nRESULT_JSON_END\n",
    )
    .unwrap();

    let output = run(&["extract", "--input", captured.to_str().unwrap()]);

    assert!(output.status.success());
    let result = stdout_json(&output);
    assert_eq!(result["success"], true);
    assert_eq!(result["matches"], serde_json::json!(["AAPL"]));
    assert_eq!(result["strategy"], "marker");
}

#[test]
fn extract_reads_stdin_and_reports_parse_failure() {
    let mut child = Command::new(BIN)
        .arg("extract")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    child
        .stdin
        .take()
        .unwrap()
        .write_all(b"no markers here\n")
        .unwrap();
    let output = child.wait_with_output().unwrap();

    assert_eq!(output.status.code(), Some(6));
    let result = stdout_json(&output);
    assert_eq!(result["success"], false);
    assert_eq!(result["error"]["code"], "E_OUTPUT_PARSE");
    assert_eq!(result["diagnostics"]["stdout"], "no markers here\n");
}

#[test]
fn run_reports_spawn_failure() {
    let dir = tempfile::tempdir().unwrap();
    let definition = write_definition(dir.path());
    let config = write_config(dir.path(), "/nonexistent/python3");

    let output = run(&[
        "run",
        "--json",
        "--definition",
        definition.to_str().unwrap(),
        "--config",
        config.to_str().unwrap(),
    ]);

    assert_eq!(output.status.code(), Some(4));
    let result = stdout_json(&output);
    assert_eq!(result["error"]["code"], "E_PROCESS_SPAWN");
    assert_eq!(fs::read_dir(dir.path().join("artifacts")).unwrap().count(), 0);
}

#[test]
fn run_reports_nonzero_exit_without_payload() {
    let dir = tempfile::tempdir().unwrap();
    let definition = write_definition(dir.path());
    let config = write_config(dir.path(), "/bin/false");

    let output = run(&[
        "run",
        "--json",
        "--definition",
        definition.to_str().unwrap(),
        "--config",
        config.to_str().unwrap(),
    ]);

    assert_eq!(output.status.code(), Some(5));
    let result = stdout_json(&output);
    assert_eq!(result["success"], false);
    assert_eq!(result["error"]["code"], "E_PROCESS_EXIT");
    assert_eq!(result["exit"]["code"], 1);
}

#[test]
fn run_reports_unparseable_output() {
    let dir = tempfile::tempdir().unwrap();
    let definition = write_definition(dir.path());
    let config = write_config(dir.path(), "/bin/cat");

    let output = run(&[
        "run",
        "--json",
        "--definition",
        definition.to_str().unwrap(),
        "--config",
        config.to_str().unwrap(),
    ]);

    assert_eq!(output.status.code(), Some(6));
    let result = stdout_json(&output);
    assert_eq!(result["error"]["code"], "E_OUTPUT_PARSE");
    assert!(result["diagnostics"]["stdout"]
        .as_str()
        .unwrap()
        .contains("def screen_stocks"));
}

#[test]
fn human_mode_prints_user_message_to_stderr() {
    let dir = tempfile::tempdir().unwrap();
    let definition = write_definition(dir.path());
    let config = write_config(dir.path(), "/bin/false");

    let output = run(&[
        "--color",
        "never",
        "run",
        "--definition",
        definition.to_str().unwrap(),
        "--config",
        config.to_str().unwrap(),
    ]);

    assert_eq!(output.status.code(), Some(5));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("interpreter exited with code 1"), "{stderr}");
}

#[test]
fn interpreter_flag_overrides_config() {
    let dir = tempfile::tempdir().unwrap();
    let definition = write_definition(dir.path());
    let config = write_config(dir.path(), "/bin/cat");

    let output = run(&[
        "run",
        "--json",
        "--definition",
        definition.to_str().unwrap(),
        "--config",
        config.to_str().unwrap(),
        "--interpreter",
        "/nonexistent/python3",
    ]);

    assert_eq!(output.status.code(), Some(4));
}

#[test]
fn dangerous_config_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let definition = write_definition(dir.path());
    let config = dir.path().join("config.json");
    fs::write(&config, r#"{"env": {"set": {"LD_PRELOAD": "/tmp/x.so"}}}"#).unwrap();

    let output = run(&[
        "run",
        "--json",
        "--definition",
        definition.to_str().unwrap(),
        "--config",
        config.to_str().unwrap(),
        "--skip-libraries",
    ]);

    assert_eq!(output.status.code(), Some(2));
    assert_eq!(stdout_json(&output)["code"], "E_CONFIG");
}

#[test]
fn batch_prints_one_line_per_definition_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let first = write_definition(dir.path());
    let second = dir.path().join("second.json");
    fs::write(&second, DEFINITION.replace("oversold-rsi", "second")).unwrap();
    let config = write_config(dir.path(), "/bin/false");

    let output = run(&[
        "batch",
        "--config",
        config.to_str().unwrap(),
        "--definition",
        first.to_str().unwrap(),
        second.to_str().unwrap(),
    ]);

    assert_eq!(output.status.code(), Some(5));
    let text = String::from_utf8_lossy(&output.stdout);
    let lines: Vec<serde_json::Value> = text
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(lines.len(), 2);
    assert!(lines
        .iter()
        .all(|line| line["error"]["code"] == "E_PROCESS_EXIT"));
}

#[test]
fn completions_are_generated() {
    let output = run(&["completions", "bash"]);

    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("screenbox"));
}
