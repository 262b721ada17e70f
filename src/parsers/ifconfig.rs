//! `ifconfig` interface listing.

use super::{ParseError, ShellParser};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

static IFACE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Iface\s+(?P<name>\S+)").expect("iface regex is valid"));
static HWADDR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|\s)HWaddr: (?P<addr>[0-9A-Fa-f:]+)").expect("hwaddr regex is valid")
});
static LONG_HWADDR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Long HWaddr: (?P<addr>[0-9A-Fa-f:]+)").expect("long hwaddr regex is valid")
});
static CHANNEL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Channel: (?P<v>\d+)").expect("channel regex is valid"));
static PAGE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Page: (?P<v>\d+)").expect("page regex is valid"));
static NID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"NID: (?P<v>\S+)").expect("nid regex is valid"));
static MTU_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|\s)MTU:(?P<v>\d+)").expect("mtu regex is valid"));
static HL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|\s)HL:(?P<v>\d+)").expect("hop limit regex is valid"));
static INET6_ADDR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"inet6 addr: (?P<addr>[0-9a-fA-F:]+)(?:/\d+)?\s+scope: (?P<scope>\w+)(?:\s+(?P<state>[A-Z]+))?",
    )
    .expect("inet6 addr regex is valid")
});
static INET6_GROUP_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"inet6 group: (?P<addr>[0-9a-fA-F:]+)").expect("inet6 group regex is valid")
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ipv6Addr {
    pub addr: String,
    pub scope: String,
    pub state: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Netif {
    pub name: String,
    pub hwaddr: Option<String>,
    pub long_hwaddr: Option<String>,
    pub channel: Option<u16>,
    pub page: Option<u8>,
    pub nid: Option<String>,
    pub mtu: Option<u16>,
    pub hop_limit: Option<u8>,
    pub ipv6_addrs: Vec<Ipv6Addr>,
    pub ipv6_groups: Vec<String>,
}

impl Netif {
    fn addr_with_scope(&self, scope: &str) -> Option<&str> {
        self.ipv6_addrs
            .iter()
            .find(|a| a.scope == scope)
            .map(|a| a.addr.as_str())
    }

    pub fn lladdr(&self) -> Option<&str> {
        self.addr_with_scope("link")
    }

    pub fn global_addr(&self) -> Option<&str> {
        self.addr_with_scope("global")
    }
}

/// Interfaces in the order `ifconfig` listed them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Interfaces(pub Vec<Netif>);

impl Interfaces {
    pub fn first(&self) -> Option<&Netif> {
        self.0.first()
    }

    pub fn get(&self, name: &str) -> Option<&Netif> {
        self.0.iter().find(|n| n.name == name)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Netif> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IfconfigParser;

/// Numeric field of `line`; `None` when absent, an error when present but
/// out of range.
fn capture<T>(re: &Regex, field: &str, line: &str, output: &str) -> Result<Option<T>, ParseError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let Some(caps) = re.captures(line) else {
        return Ok(None);
    };
    caps["v"]
        .parse()
        .map(Some)
        .map_err(|e| ParseError::new("ifconfig", format!("bad {field} {:?}: {e}", &caps["v"]), output))
}

impl ShellParser for IfconfigParser {
    type Output = Interfaces;

    fn command(&self) -> &'static str {
        "ifconfig"
    }

    fn parse(&self, output: &str) -> Result<Interfaces, ParseError> {
        let mut netifs: Vec<Netif> = Vec::new();

        for line in output.lines() {
            let trimmed = line.trim();
            if let Some(caps) = IFACE_RE.captures(trimmed) {
                netifs.push(Netif {
                    name: caps["name"].to_string(),
                    ..Default::default()
                });
            }
            let Some(netif) = netifs.last_mut() else {
                continue;
            };

            if let Some(caps) = INET6_ADDR_RE.captures(trimmed) {
                netif.ipv6_addrs.push(Ipv6Addr {
                    addr: caps["addr"].to_lowercase(),
                    scope: caps["scope"].to_string(),
                    state: caps.name("state").map(|m| m.as_str().to_string()),
                });
                continue;
            }
            if let Some(caps) = INET6_GROUP_RE.captures(trimmed) {
                netif.ipv6_groups.push(caps["addr"].to_lowercase());
                continue;
            }

            if let Some(caps) = LONG_HWADDR_RE.captures(trimmed) {
                netif.long_hwaddr = Some(caps["addr"].to_string());
            } else if let Some(caps) = HWADDR_RE.captures(trimmed) {
                netif.hwaddr = Some(caps["addr"].to_string());
            }
            if let Some(channel) = capture(&CHANNEL_RE, "channel", trimmed, output)? {
                netif.channel = Some(channel);
            }
            if let Some(page) = capture(&PAGE_RE, "page", trimmed, output)? {
                netif.page = Some(page);
            }
            if let Some(caps) = NID_RE.captures(trimmed) {
                netif.nid = Some(caps["v"].to_string());
            }
            if let Some(mtu) = capture(&MTU_RE, "MTU", trimmed, output)? {
                netif.mtu = Some(mtu);
            }
            if let Some(hl) = capture(&HL_RE, "hop limit", trimmed, output)? {
                netif.hop_limit = Some(hl);
            }
        }

        if netifs.is_empty() {
            return Err(ParseError::new("ifconfig", "no interface listed", output));
        }
        Ok(Interfaces(netifs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NATIVE_OUTPUT: &str = "
Iface  6  HWaddr: 6A:2E:4F:3D:DF:CB
          L2-PDU:1500  MTU:1500  HL:64  RTR
          RTR_ADV
          Source address length: 6
          Link type: wired
          inet6 addr: fe80::682e:4fff:fe3d:dfcb  scope: link  VAL
          inet6 addr: 2001:db8::682e:4fff:fe3d:dfcb  scope: global  VAL
          inet6 group: ff02::2
          inet6 group: ff02::1
          inet6 group: ff02::1:ff3d:dfcb
";

    const RADIO_OUTPUT: &str = "
Iface  7  HWaddr: 4B:5A  Channel: 26  Page: 0  NID: 0x23  PHY: O-QPSK
          Long HWaddr: 79:67:08:77:01:9F:33:1E
          TX-Power: 0dBm  State: IDLE  max. Retrans.: 3  CSMA Retries: 4
          L2-PDU:102  MTU:1280  HL:64  RTR
          6LO  IPHC
          inet6 addr: fe80::7b67:877:19f:331e  scope: link  VAL
Iface  8  HWaddr: 02:00:00:00:00:01
          inet6 addr: fe80::1  scope: link  TNT[1]
";

    #[test]
    fn test_native_interface() {
        let netifs = IfconfigParser.parse(NATIVE_OUTPUT).unwrap();
        assert_eq!(netifs.len(), 1);
        let netif = netifs.first().unwrap();
        assert_eq!(netif.name, "6");
        assert_eq!(netif.hwaddr.as_deref(), Some("6A:2E:4F:3D:DF:CB"));
        assert_eq!(netif.mtu, Some(1500));
        assert_eq!(netif.lladdr(), Some("fe80::682e:4fff:fe3d:dfcb"));
        assert_eq!(netif.global_addr(), Some("2001:db8::682e:4fff:fe3d:dfcb"));
        assert_eq!(netif.ipv6_groups.len(), 3);
    }

    #[test]
    fn test_radio_interfaces() {
        let netifs = IfconfigParser.parse(RADIO_OUTPUT).unwrap();
        assert_eq!(netifs.len(), 2);
        let radio = netifs.get("7").unwrap();
        assert_eq!(radio.hwaddr.as_deref(), Some("4B:5A"));
        assert_eq!(radio.long_hwaddr.as_deref(), Some("79:67:08:77:01:9F:33:1E"));
        assert_eq!(radio.channel, Some(26));
        assert_eq!(radio.nid.as_deref(), Some("0x23"));
        assert_eq!(radio.mtu, Some(1280));
        let second = netifs.get("8").unwrap();
        assert_eq!(second.ipv6_addrs[0].state.as_deref(), Some("TNT"));
    }

    #[test]
    fn test_interface_without_lladdr() {
        let netifs = IfconfigParser
            .parse("Iface  4  HWaddr: 6A:2E:4F:3D:DF:CB\n          L2-PDU:1500")
            .unwrap();
        assert_eq!(netifs.first().unwrap().lladdr(), None);
    }

    #[test]
    fn test_out_of_range_field_is_an_error() {
        let err = IfconfigParser
            .parse("Iface  7  HWaddr: 4B:5A  Channel: 70000  Page: 0")
            .unwrap_err();
        assert!(err.reason.contains("channel"), "{err}");
        assert!(IfconfigParser.parse("Iface  7  HWaddr: 4B:5A
  MTU:1280  HL:300").is_err());
    }

    #[test]
    fn test_no_interface_is_an_error() {
        assert!(IfconfigParser.parse("ifconfig: command not found").is_err());
    }
}
