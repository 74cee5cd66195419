//! Wake-on-LAN primitives: MAC parsing, magic packet layout and name syntax checks.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// Length of a magic packet: 6 sync bytes followed by 16 copies of the MAC.
pub const MAGIC_PACKET_LEN: usize = 102;

/// A parsed 48-bit hardware address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddress([u8; 6]);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MacParseError {
    #[error("bad mac length")]
    Length,
    #[error("bad mac hex")]
    Hex,
    #[error("mixed mac separators")]
    Separator,
}

impl MacAddress {
    pub fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    pub fn bytes(&self) -> [u8; 6] {
        self.0
    }

    /// Uppercase hex without separators, e.g. `001122AABBCC`.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02X}")).collect()
    }
}

impl FromStr for MacAddress {
    type Err = MacParseError;

    /// Accepts `00:11:22:33:44:55`, `00-11-22-33-44-55` and `001122334455`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let groups: Vec<&str> = if s.contains(':') && s.contains('-') {
            return Err(MacParseError::Separator);
        } else if s.contains(':') {
            s.split(':').collect()
        } else if s.contains('-') {
            s.split('-').collect()
        } else {
            if s.len() != 12 {
                return Err(MacParseError::Length);
            }
            if !s.is_ascii() {
                return Err(MacParseError::Hex);
            }
            (0..6).map(|i| &s[i * 2..i * 2 + 2]).collect()
        };

        if groups.len() != 6 {
            return Err(MacParseError::Length);
        }
        let mut out = [0u8; 6];
        for (i, group) in groups.iter().enumerate() {
            if group.len() != 2 || !group.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(MacParseError::Hex);
            }
            out[i] = u8::from_str_radix(group, 16).map_err(|_| MacParseError::Hex)?;
        }
        Ok(Self(out))
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl TryFrom<String> for MacAddress {
    type Error = MacParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MacAddress> for String {
    fn from(mac: MacAddress) -> Self {
        mac.to_string()
    }
}

/// Builds the standard magic packet for `mac`.
pub fn magic_packet(mac: MacAddress) -> [u8; MAGIC_PACKET_LEN] {
    let mut pkt = [0u8; MAGIC_PACKET_LEN];
    pkt[..6].fill(0xFF);
    for i in 0..16 {
        let base = 6 + i * 6;
        pkt[base..base + 6].copy_from_slice(&mac.0);
    }
    pkt
}

/// Key form of a MAC: normalized when it parses, trimmed input otherwise.
pub fn normalize_mac(raw: &str) -> String {
    raw.parse::<MacAddress>()
        .map(|m| m.to_string())
        .unwrap_or_else(|_| raw.trim().to_string())
}

/// RFC 1123 host name: dot-separated labels of 1..=63 alphanumerics or
/// hyphens, no leading/trailing hyphen, 253 characters at most.
pub fn is_valid_host_name(name: &str) -> bool {
    let name = name.strip_suffix('.').unwrap_or(name);
    if name.is_empty() || name.len() > 253 {
        return false;
    }
    name.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}

/// A computer name is usable when it is a host name or an IP literal.
pub fn is_valid_computer_name(name: &str) -> bool {
    name.parse::<IpAddr>().is_ok() || is_valid_host_name(name)
}
