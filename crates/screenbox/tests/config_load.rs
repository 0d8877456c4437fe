// Test module - relaxed lint rules
#![allow(clippy::indexing_slicing)]
#![allow(clippy::panic)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(missing_docs)]

use screenbox::config::{load_config_file, load_definition_file, validate_config};
use screenbox::runner::ErrorCode;
use screenbox::{DataProvider, ExecutorConfig, LibraryStrategy, ScreenerType};
use std::fs;

#[test]
fn empty_document_yields_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    fs::write(&path, "{}").unwrap();

    let config = load_config_file(&path).unwrap();

    assert_eq!(config.interpreter, "python3");
    assert_eq!(config.interpreter_args, vec!["-u".to_string()]);
    assert_eq!(config.budgets.max_runtime_ms, 300_000);
    assert_eq!(config.data.batch_size, 50);
    assert_eq!(config.data.batch_delay_ms, 500);
    assert_eq!(config.data.default_provider, DataProvider::Alpaca);
    assert_eq!(config.libraries.strategy, LibraryStrategy::Eager);
    assert_eq!(config.diagnostics.excerpt_chars, 500);
    assert!(config.env.inherit);
    validate_config(&config).unwrap();
}

#[test]
fn yaml_config_is_selected_by_extension() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    fs::write(
        &path,
        "interpreter: /usr/bin/python3.12\nbudgets:\n  max_runtime_ms: 60000\nlibraries:\n  strategy: after_import_failure\n  required: [pandas, ta-lib]\ndata:\n  default_provider: yahoo\n",
    )
    .unwrap();

    let config = load_config_file(&path).unwrap();

    assert_eq!(config.interpreter, "/usr/bin/python3.12");
    assert_eq!(config.budgets.max_runtime_ms, 60_000);
    assert_eq!(config.budgets.kill_grace_ms, 2_000);
    assert_eq!(config.libraries.strategy, LibraryStrategy::AfterImportFailure);
    assert_eq!(config.libraries.required.len(), 2);
    assert_eq!(config.data.default_provider, DataProvider::YahooFinance);
}

#[test]
fn malformed_config_is_a_protocol_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    fs::write(&path, "{\"budgets\": ").unwrap();

    let err = load_config_file(&path).unwrap_err();

    assert_eq!(err.code, ErrorCode::Protocol);
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();

    let err = load_config_file(&dir.path().join("absent.json")).unwrap_err();

    assert_eq!(err.code, ErrorCode::Io);
}

#[test]
fn definition_loads_from_json_and_yaml() {
    let dir = tempfile::tempdir().unwrap();
    let json_path = dir.path().join("screener.json");
    fs::write(
        &json_path,
        r#"{"id": "rsi-1", "name": "RSI", "type": "ai-generated",
            "source": {"type": "code", "content": "def screen_stocks(data):\n    return []\n"},
            "configuration": {"universe": ["aapl"], "data_source": "alpaca"}}"#,
    )
    .unwrap();
    let yaml_path = dir.path().join("screener.yml");
    fs::write(
        &yaml_path,
        "id: tpl-1\nname: Template\ntype: template\nsource:\n  type: code\n  content: |\n    def screen_stocks(data):\n        return []\n",
    )
    .unwrap();

    let from_json = load_definition_file(&json_path).unwrap();
    let from_yaml = load_definition_file(&yaml_path).unwrap();

    assert_eq!(from_json.screener_type, ScreenerType::AiGenerated);
    assert_eq!(from_json.universe(), Some(vec!["AAPL".to_string()]));
    assert_eq!(from_json.data_provider(), Some(DataProvider::Alpaca));
    assert_eq!(from_yaml.screener_type, ScreenerType::Template);
    assert!(from_yaml.source.content().starts_with("def screen_stocks"));
    assert!(from_yaml.configuration.is_empty());
}

#[test]
fn validation_rejects_zero_budgets_and_bad_module() {
    let mut config = ExecutorConfig::default();
    config.budgets.max_output_bytes = 0;
    assert_eq!(validate_config(&config).unwrap_err().code, ErrorCode::Config);

    let mut config = ExecutorConfig::default();
    config.data.batch_size = 0;
    assert_eq!(validate_config(&config).unwrap_err().code, ErrorCode::Config);

    let mut config = ExecutorConfig::default();
    config.data.provider_module = "not a module".to_string();
    assert_eq!(validate_config(&config).unwrap_err().code, ErrorCode::Config);

    let mut config = ExecutorConfig::default();
    config.interpreter = "  ".to_string();
    assert_eq!(validate_config(&config).unwrap_err().code, ErrorCode::Config);
}

#[test]
fn validation_blocks_loader_injection_variables() {
    for var in ["LD_PRELOAD", "ld_audit", "DYLD_INSERT_LIBRARIES", "dyld_anything"] {
        let mut config = ExecutorConfig::default();
        config.env.set.insert(var.to_string(), "x".to_string());
        let err = validate_config(&config).unwrap_err();
        assert_eq!(err.code, ErrorCode::Config, "{var} should be blocked");
        assert_eq!(err.context.unwrap()["var"], var);
    }

    let mut config = ExecutorConfig::default();
    config
        .env
        .set
        .insert("ALPACA_API_KEY".to_string(), "key".to_string());
    validate_config(&config).unwrap();
}

#[test]
fn error_codes_round_trip_through_wire_strings() {
    for code in [
        ErrorCode::Assembly,
        ErrorCode::LibraryInstall,
        ErrorCode::ProcessSpawn,
        ErrorCode::ProcessExit,
        ErrorCode::OutputParse,
        ErrorCode::UserLogic,
        ErrorCode::Timeout,
        ErrorCode::OutputLimit,
        ErrorCode::Config,
        ErrorCode::Protocol,
        ErrorCode::Io,
    ] {
        assert_eq!(ErrorCode::parse(code.as_str()), Some(code));
        assert_ne!(code.exit_code(), 0);
    }
    assert_eq!(ErrorCode::parse("E_NOPE"), None);
}
