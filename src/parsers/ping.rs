//! `ping6` output.

use super::{ParseError, ShellParser};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

static REPLY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?P<size>\d+) bytes from (?P<source>[0-9a-fA-F:.]+(?:%\S+)?): icmp_seq=(?P<seq>\d+) ttl=(?P<ttl>\d+)(?: rssi=(?P<rssi>-?\d+) dBm)?(?: time=(?P<rtt>\d+(?:\.\d+)?) ms)?(?P<dup> \(DUP!\))?",
    )
    .expect("ping reply regex is valid")
});

static STATS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?P<tx>\d+) packets transmitted, (?P<rx>\d+) packets received, (?:(?P<dup>\d+) duplicates, )?(?P<loss>\d+)% packet loss",
    )
    .expect("ping statistics regex is valid")
});

static RTT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"round-trip min/avg/max = (?P<min>\d+(?:\.\d+)?)/(?P<avg>\d+(?:\.\d+)?)/(?P<max>\d+(?:\.\d+)?) ms",
    )
    .expect("ping round-trip regex is valid")
});

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PingReply {
    pub size: u32,
    pub source: String,
    pub seq: u32,
    pub ttl: u8,
    pub rssi: Option<i16>,
    pub rtt_ms: Option<f64>,
    pub duplicate: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoundTrip {
    pub min_ms: f64,
    pub avg_ms: f64,
    pub max_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PingStats {
    pub transmitted: u32,
    pub received: u32,
    pub duplicates: u32,
    /// Percentage as printed by the device.
    pub packet_loss: u8,
    pub rtt: Option<RoundTrip>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PingResult {
    pub replies: Vec<PingReply>,
    pub stats: PingStats,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PingParser;

impl ShellParser for PingParser {
    type Output = PingResult;

    fn command(&self) -> &'static str {
        "ping6"
    }

    fn parse(&self, output: &str) -> Result<PingResult, ParseError> {
        let num = |value: &str| {
            value
                .parse::<u32>()
                .map_err(|e| ParseError::new("ping6", format!("bad number '{value}': {e}"), output))
        };

        let mut replies = Vec::new();
        for caps in REPLY_RE.captures_iter(output) {
            replies.push(PingReply {
                size: num(&caps["size"])?,
                source: caps["source"].to_string(),
                seq: num(&caps["seq"])?,
                ttl: caps["ttl"]
                    .parse()
                    .map_err(|_| ParseError::new("ping6", "ttl out of range", output))?,
                rssi: caps.name("rssi").and_then(|m| m.as_str().parse().ok()),
                rtt_ms: caps.name("rtt").and_then(|m| m.as_str().parse().ok()),
                duplicate: caps.name("dup").is_some(),
            });
        }

        let caps = STATS_RE
            .captures(output)
            .ok_or_else(|| ParseError::new("ping6", "no statistics line", output))?;
        let transmitted = num(&caps["tx"])?;
        let received = num(&caps["rx"])?;
        let duplicates = caps.name("dup").map(|m| num(m.as_str())).transpose()?.unwrap_or(0);
        let packet_loss = caps["loss"]
            .parse::<u8>()
            .ok()
            .filter(|loss| *loss <= 100)
            .ok_or_else(|| ParseError::new("ping6", "packet loss is not a percentage", output))?;

        let rtt = match RTT_RE.captures(output) {
            Some(caps) => {
                let ms = |name: &str| {
                    caps[name]
                        .parse::<f64>()
                        .map_err(|e| ParseError::new("ping6", format!("bad round-trip time: {e}"), output))
                };
                Some(RoundTrip {
                    min_ms: ms("min")?,
                    avg_ms: ms("avg")?,
                    max_ms: ms("max")?,
                })
            }
            None => None,
        };

        if received > transmitted + duplicates {
            return Err(ParseError::new(
                "ping6",
                "more packets received than transmitted",
                output,
            ));
        }

        Ok(PingResult {
            replies,
            stats: PingStats {
                transmitted,
                received,
                duplicates,
                packet_loss,
                rtt,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PING_OUTPUT: &str = "
12 bytes from ::1: icmp_seq=0 ttl=64
12 bytes from ::1: icmp_seq=1 ttl=64
12 bytes from ::1: icmp_seq=2 ttl=64

--- ::1 PING statistics ---
3 packets transmitted, 3 packets received, 0% packet loss";

    #[test]
    fn test_parse_summary_only() {
        let res = PingParser
            .parse("3 packets transmitted, 3 packets received, 0% packet loss")
            .unwrap();
        assert_eq!(res.stats.packet_loss, 0);
        assert_eq!(res.stats.transmitted, 3);
        assert_eq!(res.stats.received, 3);
        assert!(res.replies.is_empty());
    }

    #[test]
    fn test_parse_replies() {
        let res = PingParser.parse(PING_OUTPUT).unwrap();
        assert_eq!(res.replies.len(), 3);
        assert_eq!(res.replies[2].seq, 2);
        assert_eq!(res.replies[0].source, "::1");
        assert_eq!(res.stats.rtt, None);
    }

    #[test]
    fn test_parse_radio_replies_with_rtt() {
        let out = "\
12 bytes from fe80::1%6: icmp_seq=0 ttl=64 rssi=-34 dBm time=6.624 ms
12 bytes from fe80::1%6: icmp_seq=0 ttl=64 rssi=-34 dBm time=7.001 ms (DUP!)

--- fe80::1 PING statistics ---
2 packets transmitted, 1 packets received, 1 duplicates, 50% packet loss
round-trip min/avg/max = 6.624/6.812/7.001 ms";
        let res = PingParser.parse(out).unwrap();
        assert_eq!(res.replies[0].rssi, Some(-34));
        assert_eq!(res.replies[0].source, "fe80::1%6");
        assert!(res.replies[1].duplicate);
        assert_eq!(res.stats.duplicates, 1);
        assert_eq!(res.stats.packet_loss, 50);
        assert_eq!(res.stats.rtt.as_ref().unwrap().max_ms, 7.001);
    }

    #[test]
    fn test_missing_statistics_is_an_error() {
        let err = PingParser
            .parse("12 bytes from ::1: icmp_seq=0 ttl=64")
            .unwrap_err();
        assert_eq!(err.parser, "ping6");
        assert!(err.text.contains("icmp_seq=0"));
    }
}
