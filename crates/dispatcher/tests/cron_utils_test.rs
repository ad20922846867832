#[cfg(test)]
mod cron_utils_tests {
    use jobrunner_core::SchedulerError;
    use jobrunner_dispatcher::cron_utils::*;

    use chrono::{Duration, TimeZone, Timelike, Utc};

    #[test]
    fn test_cron_trigger_creation() {
        assert!(CronTrigger::new("0 0 0 * * *", None).is_ok());
        assert!(CronTrigger::new("0 * * * * ?", None).is_ok());

        let err = CronTrigger::new("invalid", None).unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidCronExpression { .. }));
    }

    #[test]
    fn test_validate_cron_expression() {
        assert!(CronTrigger::validate_cron_expression("0 0 0 * * *").is_ok());
        assert!(CronTrigger::validate_cron_expression("0 */5 * * * *").is_ok());
        assert!(CronTrigger::validate_cron_expression("0 0 9-17 * * 1-5").is_ok());
        assert!(CronTrigger::validate_cron_expression("0 0 12 1 1 * 2030").is_ok());
        assert!(CronTrigger::validate_cron_expression("invalid").is_err());
        assert!(CronTrigger::validate_cron_expression("0 0 0 32 * *").is_err());
        assert!(CronTrigger::validate_cron_expression("").is_err());
    }

    #[test]
    fn test_next_fire_after() {
        let trigger = CronTrigger::new("0 0 0 * * *", None).unwrap();

        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let next = trigger.next_fire_after(now).unwrap();

        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_end_date_stops_firing() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let trigger =
            CronTrigger::new("0 * * * * *", Some(start + Duration::seconds(90))).unwrap();

        let first = trigger.next_fire_after(start).unwrap();
        assert_eq!(first.minute(), 1);
        assert!(trigger.next_fire_after(first).is_none());
        assert!(!trigger.may_fire_again(first));
    }

    #[test]
    fn test_end_date_is_inclusive() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 1, 12, 2, 0).unwrap();
        let trigger = CronTrigger::new("0 * * * * *", Some(end)).unwrap();

        assert_eq!(trigger.upcoming_times(start, 10).len(), 2);
    }

    #[test]
    fn test_upcoming_times() {
        let trigger = CronTrigger::new("0 0 * * * *", None).unwrap();

        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 30, 0).unwrap();
        let upcoming = trigger.upcoming_times(now, 3);

        assert_eq!(upcoming.len(), 3);
        assert_eq!(upcoming[0].hour(), 13);
        assert_eq!(upcoming[1].hour(), 14);
        assert_eq!(upcoming[2].hour(), 15);
    }

    #[test]
    fn test_time_until_next_fire() {
        let trigger = CronTrigger::new("0 0 * * * *", None).unwrap();

        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 30, 0).unwrap();
        let duration = trigger.time_until_next_fire(now).unwrap();

        assert_eq!(duration.num_minutes(), 30);
    }
}
