//! Config File Integration Tests

use std::path::PathBuf;

use cascade_orchestrator::{AppError, ConfigLoader, OrchestratorConfig, TurnOrchestrator};

fn example_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config/orchestrator.example.toml")
}

#[test]
fn test_example_config_loads() {
    let config = ConfigLoader::load(example_path()).unwrap();

    assert_eq!(config.executor.max_concurrent, 3);
    assert_eq!(config.stage.gathering.providers.len(), 4);
    assert_eq!(config.stage.gathering.dependencies["synthesize"].len(), 3);
    assert_eq!(config.speculation.predictions["greeting"].len(), 2);
    assert_eq!(config.fast_path.templates["greeting"].len(), 2);
    // Keys the example leaves out keep their defaults
    assert_eq!(config.cache.max_key_bytes, 256);
}

#[tokio::test]
async fn test_example_config_builds_an_orchestrator() {
    let config = ConfigLoader::load(example_path()).unwrap();
    assert!(TurnOrchestrator::builder(config).build().await.is_ok());
}

#[test]
fn test_cyclic_stage_in_file_is_rejected() {
    let err = ConfigLoader::from_toml_str(
        r#"
[stage.synthesis]
providers = ["memory", "report"]

[stage.synthesis.dependencies]
report = ["memory"]
memory = ["report"]
"#,
    )
    .unwrap_err();

    match err {
        AppError::Validation(message) => assert!(message.starts_with("stage:")),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_json_and_toml_agree() {
    let from_toml = ConfigLoader::from_toml_str("[executor]\nmax_concurrent = 6\n").unwrap();
    let from_json = ConfigLoader::from_json_str(r#"{"executor": {"max_concurrent": 6}}"#).unwrap();
    assert_eq!(from_toml, from_json);
    assert_ne!(from_toml, OrchestratorConfig::default());
}
