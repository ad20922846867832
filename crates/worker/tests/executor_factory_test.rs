use jobrunner_core::SchedulerError;
use jobrunner_domain::UnitRegistry;
use jobrunner_infrastructure::LocalUnitRegistry;
use jobrunner_worker::{register_builtin_units, BUILTIN_AUTHORITY};
use serde_json::{json, Map};

#[tokio::test]
async fn test_register_builtin_units() {
    let registry = LocalUnitRegistry::new();
    register_builtin_units(&registry).await.unwrap();

    let codes: Vec<String> = registry.list_units().await.into_iter().map(|d| d.code).collect();
    assert_eq!(codes, vec!["shell", "sleep"]);

    let shell = registry
        .describe(BUILTIN_AUTHORITY, "shell")
        .await
        .unwrap()
        .unwrap();
    let bound = shell.descriptor().bind(&json!({ "command": "true" })).unwrap();
    let unit = shell.create(bound).await.unwrap();
    assert!(unit.supports_interrupt());
    assert_eq!(unit.descriptor().code, "shell");
}

#[tokio::test]
async fn test_registering_twice_fails() {
    let registry = LocalUnitRegistry::new();
    register_builtin_units(&registry).await.unwrap();
    let err = register_builtin_units(&registry).await.unwrap_err();
    assert!(matches!(err, SchedulerError::Configuration(_)));
}

#[tokio::test]
async fn test_create_rejects_unparseable_parameters() {
    let registry = LocalUnitRegistry::new();
    register_builtin_units(&registry).await.unwrap();

    let sleep = registry.describe(BUILTIN_AUTHORITY, "sleep").await.unwrap().unwrap();
    let mut raw = Map::new();
    raw.insert("duration_ms".to_string(), json!(-5));
    let err = sleep.create(raw).await.err().unwrap();
    assert!(matches!(err, SchedulerError::InvalidParameters(_)));
}
