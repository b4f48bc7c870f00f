//! Sample data shared by tests.

use crate::extract::{DailyMetrics, DayMetrics, Measurement};
use crate::registry::RawParams;
use crate::scheduler::{ActionConfig, CronFields, EmailAction, ScheduleConfig};

/// Two days of running and walking distances, with 2022-01-02 missing.
#[must_use]
pub fn sample_document() -> DailyMetrics {
    let day = |running: f64, walking: f64| -> DayMetrics {
        DayMetrics::from([
            ("running".to_string(), Measurement::scalar(running, "meter")),
            ("walking".to_string(), Measurement::scalar(walking, "meter")),
        ])
    };
    DailyMetrics::from([
        ("2022-01-01".to_string(), day(300.0, 150.0)),
        ("2022-01-03".to_string(), day(500.0, 200.0)),
    ])
}

/// A daily 06:00 email schedule for `pipeline` over 2022-01-01..=2022-01-03.
#[must_use]
pub fn sample_schedule(pipeline: &str) -> ScheduleConfig {
    ScheduleConfig {
        pipeline_id: pipeline.to_string(),
        from: "2022-01-01".to_string(),
        to: "2022-01-03".to_string(),
        extract_params: RawParams::new(),
        cron: CronFields::new().with_hour(6).with_minute(0),
        action: ActionConfig::Email(EmailAction {
            to_email: "me@example.com".to_string(),
            subject: "Daily metrics".to_string(),
            body: "Graphs attached".to_string(),
        }),
    }
}
