use std::time::SystemTime;

/// Alarm severity attached to a value delivered by the data source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    #[default]
    NoAlarm,
    Minor,
    Major,
    Invalid,
}

/// Metadata delivered together with a channel value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PvMeta {
    pub timestamp: Option<SystemTime>,
    /// Alarm status code as reported by the data source; 0 means no alarm.
    pub status: i16,
    pub severity: Severity,
    pub message: Option<String>,
}

impl PvMeta {
    /// Metadata for a value read at `timestamp` without any alarm.
    pub fn at(timestamp: SystemTime) -> Self {
        Self {
            timestamp: Some(timestamp),
            ..Self::default()
        }
    }

    pub fn with_alarm(mut self, status: i16, severity: Severity) -> Self {
        self.status = status;
        self.severity = severity;
        self
    }
}
