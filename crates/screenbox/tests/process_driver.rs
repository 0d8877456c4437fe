// Test module - relaxed lint rules
#![allow(clippy::indexing_slicing)]
#![allow(clippy::panic)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(missing_docs)]
#![cfg(unix)]

use screenbox::artifact::{artifact_file_name, ExecutionArtifact};
use screenbox::process::{ProcessDriver, ProcessError, ProcessExit, ProcessHandle, ProcessState};
use screenbox::runner::ErrorCode;
use screenbox::{Budgets, ExecutionId, ExecutorConfig};
use std::process::Command;
use std::time::Duration;

fn sh_driver(budgets: Budgets) -> ProcessDriver {
    let config = ExecutorConfig {
        interpreter: "/bin/sh".to_string(),
        interpreter_args: Vec::new(),
        budgets,
        ..ExecutorConfig::default()
    };
    ProcessDriver::from_config(&config)
}

fn script(driver: &ProcessDriver, body: &str) -> screenbox::process::ProcessOutput {
    driver
        .run_with_args(&["-c".to_string(), body.to_string()])
        .unwrap()
}

#[test]
fn captures_both_streams_and_exit_code() {
    let driver = sh_driver(Budgets::default());

    let output = script(&driver, "echo out; echo err >&2; exit 5");

    assert_eq!(output.stdout, "out\n");
    assert_eq!(output.stderr, "err\n");
    assert_eq!(output.exit, ProcessExit::Code(5));
    assert!(!output.exit.success());
    assert_eq!(output.exit.to_record().code, Some(5));
}

#[test]
fn large_output_is_drained_without_deadlock() {
    let driver = sh_driver(Budgets::default());

    let output = script(&driver, "i=0; while [ $i -lt 20000 ]; do echo 0123456789; i=$((i+1)); done");

    assert!(output.exit.success());
    assert_eq!(output.stdout.len(), 20000 * 11);
}

#[test]
fn overrun_by_a_fast_exiting_process_is_still_a_limit_stop() {
    let driver = sh_driver(Budgets {
        max_runtime_ms: 10_000,
        max_output_bytes: 4096,
        kill_grace_ms: 200,
    });

    let output = script(&driver, "head -c 8000 /dev/zero | tr '\\0' a");

    assert_eq!(output.exit, ProcessExit::OutputLimitExceeded);
    assert!(output.exit.to_record().output_truncated);
    assert!(output.stdout.len() <= 4096);
}

#[test]
fn handle_reports_running_state_until_waited() {
    let mut command = Command::new("/bin/sh");
    command.args(["-c", "exit 0"]);

    let handle = ProcessHandle::spawn(command, 1024).unwrap();

    assert_eq!(handle.state(), ProcessState::Running { pid: handle.pid() });
    let output = handle
        .wait(Duration::from_secs(10), Duration::from_millis(200))
        .unwrap();
    assert_eq!(output.exit, ProcessExit::Code(0));
}

#[test]
fn signal_death_is_reported() {
    let driver = sh_driver(Budgets::default());

    let output = script(&driver, "kill -9 $$");

    assert_eq!(output.exit, ProcessExit::Signal(9));
    assert_eq!(output.exit.to_record().signal, Some(9));
}

#[test]
fn timeout_escalates_when_sigterm_is_ignored() {
    let driver = sh_driver(Budgets {
        max_runtime_ms: 200,
        max_output_bytes: 1024,
        kill_grace_ms: 200,
    });

    let output = script(&driver, "trap '' TERM; while :; do sleep 0.05; done");

    assert_eq!(output.exit, ProcessExit::TimedOut);
    assert!(output.elapsed < Duration::from_secs(5));
}

#[test]
fn missing_interpreter_is_a_spawn_error() {
    let config = ExecutorConfig {
        interpreter: "/nonexistent/python".to_string(),
        ..ExecutorConfig::default()
    };

    let err = ProcessDriver::from_config(&config)
        .run_with_args(&[])
        .unwrap_err();

    assert!(matches!(err, ProcessError::Spawn { .. }));
}

#[test]
fn artifact_is_private_unique_and_removed_on_drop() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let id = ExecutionId::new();

    let artifact = ExecutionArtifact::create(dir.path(), &id, "rsi/../x", "echo hi\n", "sh").unwrap();
    let path = artifact.path().to_path_buf();

    assert_eq!(std::fs::read_to_string(&path).unwrap(), "echo hi\n");
    let mode = std::fs::metadata(&path).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);
    assert_eq!(path.parent().unwrap(), dir.path());
    assert_eq!(
        path.file_name().unwrap().to_str().unwrap(),
        artifact_file_name(&id, "rsi/../x", "sh")
    );

    let again = ExecutionArtifact::create(dir.path(), &id, "rsi/../x", "", "sh").unwrap_err();
    assert_eq!(again.code, ErrorCode::Io);

    drop(artifact);
    assert!(!path.exists());
}

#[test]
fn artifact_names_are_filesystem_safe() {
    let id = ExecutionId::new();

    let name = artifact_file_name(&id, "a b/c:d", "py");
    assert!(name.starts_with("screener-a_b_c_d-"));
    assert!(name.ends_with(&format!("{}.py", id.simple())));

    assert!(artifact_file_name(&id, "", "py").starts_with("screener-anonymous-"));
}

#[test]
fn artifact_can_be_kept() {
    let dir = tempfile::tempdir().unwrap();
    let artifact =
        ExecutionArtifact::create(dir.path(), &ExecutionId::new(), "keep", "x", "py").unwrap();

    let kept = artifact.keep().unwrap();

    assert!(kept.exists());
}
