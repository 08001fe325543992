//! Machine state derivation from the newest datalog rows.

use crate::core::features::parse_hms;
use crate::db::MachineReading;
use chrono::NaiveDateTime;
use serde::Serialize;
use std::fmt;

/// Operating state of the packaging machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MachineState {
    Running,
    Idle,
    Stopped,
    Unknown,
}

impl MachineState {
    /// Indicator symbol used in CLI output.
    pub fn symbol(&self) -> &'static str {
        match self {
            MachineState::Running => "🟢",
            MachineState::Idle => "🟡",
            MachineState::Stopped => "🔴",
            MachineState::Unknown => "⚪",
        }
    }
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MachineState::Running => "Running",
            MachineState::Idle => "Idle",
            MachineState::Stopped => "Stopped",
            MachineState::Unknown => "Unknown",
        };
        write!(f, "{label}")
    }
}

/// Derived machine status.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub state: MachineState,
    /// Change in accumulated output time between the two newest samples
    pub output_time_delta_secs: i64,
    /// Timestamp of the newest sample, if any
    pub latest_at: Option<NaiveDateTime>,
}

impl StatusReport {
    fn unknown() -> Self {
        Self {
            state: MachineState::Unknown,
            output_time_delta_secs: 0,
            latest_at: None,
        }
    }
}

/// Derive the machine state from the newest rows (newest first).
///
/// The PLC status code alone is not trustworthy: code 2 is only reported as
/// Running when the machine has actually produced output, either a positive
/// output counter or forward movement of the accumulated output time.
pub fn machine_status(latest: &[MachineReading]) -> StatusReport {
    let Some(newest) = latest.first() else {
        return StatusReport::unknown();
    };

    let output_time_delta_secs = if latest.len() > 1 {
        parse_hms(&newest.output_time).unwrap_or(0)
            - parse_hms(&latest[1].output_time).unwrap_or(0)
    } else {
        0
    };

    let state = if newest.status_code == 2
        && (newest.counter_output > 0 || output_time_delta_secs > 0)
    {
        MachineState::Running
    } else if newest.status_code == 1 && newest.speed_rpm == 0.0 {
        MachineState::Idle
    } else if newest.status_code == 3 {
        MachineState::Stopped
    } else {
        MachineState::Unknown
    };

    StatusReport {
        state,
        output_time_delta_secs,
        latest_at: Some(newest.times),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn reading(status: i32, speed: f64, output: i64, output_time: &str) -> MachineReading {
        MachineReading {
            times: NaiveDate::from_ymd_opt(2024, 3, 4)
                .unwrap()
                .and_hms_opt(8, 0, 0)
                .unwrap(),
            status_code: status,
            speed_rpm: speed,
            counter_output: output,
            counter_reject: 0,
            availability: 0.0,
            performance: 0.0,
            quality: 0.0,
            oee: 0.0,
            seal_temp_vertical_upper: 0.0,
            seal_temp_vertical_lower: 0.0,
            seal_temp_horizontal_front: 0.0,
            seal_temp_horizontal_rear: 0.0,
            downtime: "00:00:00".to_string(),
            output_time: output_time.to_string(),
            total_time: "00:00:00".to_string(),
        }
    }

    #[test]
    fn test_empty_is_unknown() {
        let report = machine_status(&[]);
        assert_eq!(report.state, MachineState::Unknown);
        assert!(report.latest_at.is_none());
    }

    #[test]
    fn test_running_with_output_counter() {
        let rows = vec![reading(2, 60.0, 500, "01:00:00")];
        assert_eq!(machine_status(&rows).state, MachineState::Running);
    }

    #[test]
    fn test_running_with_output_time_advance() {
        let rows = vec![
            reading(2, 60.0, 0, "01:00:30"),
            reading(2, 60.0, 0, "01:00:00"),
        ];
        let report = machine_status(&rows);
        assert_eq!(report.state, MachineState::Running);
        assert_eq!(report.output_time_delta_secs, 30);
    }

    #[test]
    fn test_status_two_without_production_is_unknown() {
        let rows = vec![
            reading(2, 60.0, 0, "01:00:00"),
            reading(2, 60.0, 0, "01:00:00"),
        ];
        assert_eq!(machine_status(&rows).state, MachineState::Unknown);
    }

    #[test]
    fn test_idle_and_stopped() {
        assert_eq!(
            machine_status(&[reading(1, 0.0, 100, "01:00:00")]).state,
            MachineState::Idle
        );
        assert_eq!(
            machine_status(&[reading(3, 0.0, 100, "01:00:00")]).state,
            MachineState::Stopped
        );
    }

    #[test]
    fn test_idle_requires_zero_speed() {
        assert_eq!(
            machine_status(&[reading(1, 30.0, 100, "01:00:00")]).state,
            MachineState::Unknown
        );
    }
}
