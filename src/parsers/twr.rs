//! `twr req` ranging results.
//!
//! The `twr_aloha` application prints one JSON object per completed
//! exchange, e.g. `{"t": 31948, "src": "0D:1B", "dst": "08:A4", "d_cm": 36}`.

use super::{ParseError, ShellParser};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TwrMeasurement {
    /// Device timestamp in milliseconds.
    pub t: u64,
    pub src: String,
    pub dst: String,
    pub d_cm: i64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TwrRequestParser;

impl ShellParser for TwrRequestParser {
    type Output = Vec<TwrMeasurement>;

    fn command(&self) -> &'static str {
        "twr req"
    }

    fn parse(&self, output: &str) -> Result<Vec<TwrMeasurement>, ParseError> {
        let mut measurements = Vec::new();
        for line in output.lines() {
            let line = line.trim();
            if !(line.starts_with('{') && line.contains("\"d_cm\"")) {
                continue;
            }
            let m: TwrMeasurement = serde_json::from_str(line)
                .map_err(|e| ParseError::new("twr req", format!("bad measurement: {e}"), output))?;
            measurements.push(m);
        }
        if measurements.is_empty() {
            return Err(ParseError::new("twr req", "no measurement reported", output));
        }
        Ok(measurements)
    }
}

/// Distances in centimetres, in report order.
pub fn distances_cm(measurements: &[TwrMeasurement]) -> Vec<i64> {
    measurements.iter().map(|m| m.d_cm).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_measurements() {
        let out = "[twr]: start ranging\n\
                   {\"t\": 31948, \"src\": \"0D:1B\", \"dst\": \"08:A4\", \"d_cm\": 36}\n\
                   {\"t\": 32048, \"src\": \"0D:1B\", \"dst\": \"08:A4\", \"d_cm\": 41}\n";
        let res = TwrRequestParser.parse(out).unwrap();
        assert_eq!(distances_cm(&res), vec![36, 41]);
        assert_eq!(res[0].src, "0D:1B");
    }

    #[test]
    fn test_truncated_measurement_is_an_error() {
        let err = TwrRequestParser
            .parse("{\"t\": 31948, \"src\": \"0D:1B\", \"d_cm\": 3")
            .unwrap_err();
        assert!(err.reason.starts_with("bad measurement"));
    }

    #[test]
    fn test_no_measurement_is_an_error() {
        assert!(TwrRequestParser.parse("[twr]: start ranging\n").is_err());
    }
}
