use chrono::{Datelike, NaiveDateTime, Timelike};
use serde::Deserialize;

use crate::error::EngineError;

/// The shape of the remote `latest.json` descriptor. Only `date` is needed;
/// any other fields are ignored. Tolerant of exactly this shape — anything
/// else is a parse error, never a silent default.
#[derive(Deserialize)]
struct LatestDescriptor {
    date: String,
}

/// Identifies which capture's tiles to fetch.
///
/// Created once per refresh cycle from the remote descriptor and never
/// mutated; consumed to build tile URLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureIdentity {
    year: i32,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
    second: u32,
}

impl CaptureIdentity {
    /// Parses the raw descriptor body (a JSON object with a `date` field
    /// formatted `yyyy-MM-dd HH:mm:ss`).
    pub fn parse_descriptor(body: &[u8]) -> Result<Self, EngineError> {
        let descriptor: LatestDescriptor = serde_json::from_slice(body)
            .map_err(|e| EngineError::Parse(format!("descriptor is not valid JSON: {e}")))?;
        Self::parse_timestamp(&descriptor.date)
    }

    /// Parses a bare `yyyy-MM-dd HH:mm:ss` timestamp.
    pub fn parse_timestamp(timestamp: &str) -> Result<Self, EngineError> {
        let dt = NaiveDateTime::parse_from_str(timestamp, "%Y-%m-%d %H:%M:%S")
            .map_err(|e| EngineError::Parse(format!("bad timestamp '{timestamp}': {e}")))?;
        Ok(Self {
            year: dt.year(),
            month: dt.month(),
            day: dt.day(),
            hour: dt.hour(),
            minute: dt.minute(),
            second: dt.second(),
        })
    }

    /// The `yyyy/MM/dd` path segment of a tile URL.
    pub fn date_path(&self) -> String {
        format!("{}/{:02}/{:02}", self.year, self.month, self.day)
    }

    /// The `HHmmss` filename prefix of a tile URL.
    pub fn time_stamp(&self) -> String {
        format!("{:02}{:02}{:02}", self.hour, self.minute, self.second)
    }
}

impl std::fmt::Display for CaptureIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )
    }
}
