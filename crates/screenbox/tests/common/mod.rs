// Shared test support - relaxed lint rules
#![allow(dead_code)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(missing_docs)]

use screenbox::assembler::{
    check_body, check_markers, AssembledProgram, AssemblyError, ProgramAssembler, ProgramTemplate,
    Slot,
};
use screenbox::library::{normalize_package_name, LibraryError, LibraryManifest, PackageBackend};
use screenbox::runner::Executor;
use screenbox::{
    Budgets, ExecutorConfig, LibraryPolicy, LibraryStrategy, ScreenerDefinition, ScreenerSource,
    ScreenerType, RESULT_END_MARKER, RESULT_START_MARKER,
};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Assembles POSIX shell programs with the same slot layout and stdout
/// protocol as the Python dialect. Bodies define `screen_stocks`, which
/// prints the result JSON.
#[derive(Debug, Default)]
pub struct ShellAssembler;

impl ProgramAssembler for ShellAssembler {
    fn assemble(&self, definition: &ScreenerDefinition) -> Result<AssembledProgram, AssemblyError> {
        let body = check_body(definition)?;
        let harness = format!(
            r#"emit() {{
  printf '\n%s\n%s\n%s\n' '{RESULT_START_MARKER}' "$1" '{RESULT_END_MARKER}'
}}
if payload=$(screen_stocks); then
  emit "$payload"
else
  emit '{{"success": false, "error": "screen_stocks failed", "traceback": "shell trace", "matches": [], "details": {{}}}}'
  exit 1
fi
"#
        );
        let source = ProgramTemplate::new("#")
            .fill(Slot::Preamble, "SCREENER_ID='test'\n")?
            .fill(Slot::Helpers, "log() { echo \"$1\" >&2; }\n")?
            .fill(Slot::Body, body)?
            .fill(Slot::Harness, harness)?
            .render()?;
        check_markers(&definition.id, &source)?;
        Ok(AssembledProgram {
            source,
            extension: "sh",
        })
    }
}

#[derive(Debug, Default)]
pub struct FakeState {
    pub installed: BTreeSet<String>,
    pub installs: Vec<Vec<String>>,
    pub list_calls: usize,
    pub fail_install: bool,
    pub fail_listing: bool,
}

/// In-memory package backend recording every call.
#[derive(Clone, Debug, Default)]
pub struct FakeBackend {
    pub state: Arc<Mutex<FakeState>>,
}

impl FakeBackend {
    pub fn with_installed(names: &[&str]) -> Self {
        let backend = Self::default();
        backend.state.lock().unwrap().installed =
            names.iter().map(|name| normalize_package_name(name)).collect();
        backend
    }

    pub fn installs(&self) -> Vec<Vec<String>> {
        self.state.lock().unwrap().installs.clone()
    }

    pub fn list_calls(&self) -> usize {
        self.state.lock().unwrap().list_calls
    }
}

impl PackageBackend for FakeBackend {
    fn installed(&self) -> Result<BTreeSet<String>, LibraryError> {
        let mut state = self.state.lock().unwrap();
        state.list_calls += 1;
        if state.fail_listing {
            return Err(LibraryError::Listing("fake listing failure".to_string()));
        }
        Ok(state.installed.clone())
    }

    fn install(&self, requirements: &[String]) -> Result<(), LibraryError> {
        let mut state = self.state.lock().unwrap();
        state.installs.push(requirements.to_vec());
        if state.fail_install {
            return Err(LibraryError::Failed {
                status: "code 1".to_string(),
                stderr: "no network".to_string(),
            });
        }
        for requirement in requirements {
            state.installed.insert(normalize_package_name(requirement));
        }
        Ok(())
    }
}

pub fn definition(id: &str, body: &str) -> ScreenerDefinition {
    ScreenerDefinition {
        id: id.to_string(),
        name: format!("{id} screener"),
        description: String::new(),
        screener_type: ScreenerType::Custom,
        source: ScreenerSource::Code {
            content: body.to_string(),
        },
        configuration: serde_json::Map::new(),
    }
}

/// Config running `/bin/sh` with artifacts under `artifact_dir`.
pub fn shell_config(artifact_dir: &Path) -> ExecutorConfig {
    ExecutorConfig {
        interpreter: "/bin/sh".to_string(),
        interpreter_args: Vec::new(),
        artifact_dir: Some(artifact_dir.to_path_buf()),
        budgets: Budgets {
            max_runtime_ms: 10_000,
            max_output_bytes: 1024 * 1024,
            kill_grace_ms: 200,
        },
        libraries: LibraryPolicy {
            strategy: LibraryStrategy::Skip,
            required: vec!["pandas".to_string()],
            install_timeout_ms: 1_000,
        },
        ..ExecutorConfig::default()
    }
}

pub fn shell_executor(config: ExecutorConfig, backend: FakeBackend) -> Executor {
    Executor::with_parts(
        config,
        Box::new(ShellAssembler),
        Arc::new(LibraryManifest::new(backend)),
    )
    .expect("valid test config")
}

pub fn artifact_count(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|entries| entries.count()).unwrap_or(0)
}
