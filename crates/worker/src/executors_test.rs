#[cfg(test)]
mod tests {
    use crate::executors::{parse_params, ShellTaskParams, SleepTaskParams};
    use crate::{ShellUnitFactory, SleepUnitFactory};
    use jobrunner_core::SchedulerError;
    use jobrunner_domain::UnitFactory;
    use serde_json::json;

    #[test]
    fn test_shell_params_from_bound_values() {
        let factory = ShellUnitFactory::new();
        let bound = factory
            .descriptor()
            .bind(&json!({ "command": "ls", "env_vars": { "LANG": "C" } }))
            .unwrap();

        let params: ShellTaskParams = parse_params(factory.descriptor(), bound).unwrap();
        assert_eq!(params.command, "ls");
        assert!(params.args.is_empty());
        assert_eq!(params.env_vars.get("LANG").map(String::as_str), Some("C"));
        assert_eq!(params.timeout_seconds, None);
    }

    #[test]
    fn test_shell_params_reject_non_string_args() {
        let factory = ShellUnitFactory::new();
        let bound = factory
            .descriptor()
            .bind(&json!({ "command": "ls", "args": [1, 2] }))
            .unwrap();

        let err = parse_params::<ShellTaskParams>(factory.descriptor(), bound).unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidParameters(_)));
    }

    #[test]
    fn test_sleep_params_defaults() {
        let factory = SleepUnitFactory::new();
        let bound = factory.descriptor().bind(&json!({ "duration_ms": 500 })).unwrap();

        let params: SleepTaskParams = parse_params(factory.descriptor(), bound).unwrap();
        assert_eq!(params.duration_ms, 500);
        assert_eq!(params.steps, 10);
        assert_eq!(params.warn_at_step, None);
    }

    #[test]
    fn test_descriptor_requires_inputs() {
        assert!(ShellUnitFactory::new().descriptor().bind(&json!({})).is_err());
        assert!(SleepUnitFactory::new()
            .descriptor()
            .bind(&json!({ "duration_ms": "soon" }))
            .is_err());
    }
}
