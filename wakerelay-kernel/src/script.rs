//! Builds the script a proxy runs to broadcast magic packets.
//!
//! The builder is pure: it only renders text. Inputs are already-parsed
//! `MacAddress` values and numeric ports, so nothing user-controlled is
//! interpolated verbatim.

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

use crate::wol::{magic_packet, MacAddress};

/// Interpreter the proxy runs scripts with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptFlavor {
    #[default]
    #[serde(alias = "pwsh")]
    PowerShell,
    Python,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MagicPacketScriptBuilder {
    flavor: ScriptFlavor,
}

impl MagicPacketScriptBuilder {
    pub fn new(flavor: ScriptFlavor) -> Self {
        Self { flavor }
    }

    pub fn flavor(&self) -> ScriptFlavor {
        self.flavor
    }

    /// One script sending one broadcast per `(mac, port)` pair, in order.
    pub fn build(&self, packets: &[(MacAddress, u16)]) -> String {
        match self.flavor {
            ScriptFlavor::PowerShell => Self::powershell(packets),
            ScriptFlavor::Python => Self::python(packets),
        }
    }

    fn powershell(packets: &[(MacAddress, u16)]) -> String {
        let mut targets = String::new();
        for (mac, port) in packets {
            let _ = writeln!(targets, "    @{{ Mac = '{mac}'; Port = {port} }}");
        }

        format!(
            r#"$ErrorActionPreference = 'Stop'
$targets = @(
{targets})
$client = New-Object System.Net.Sockets.UdpClient
$client.EnableBroadcast = $true
try {{
    foreach ($t in $targets) {{
        $macBytes = [byte[]]($t.Mac -split ':' | ForEach-Object {{ [Convert]::ToByte($_, 16) }})
        $packet = [byte[]](@(0xFF) * 6 + $macBytes * 16)
        $endpoint = New-Object System.Net.IPEndPoint ([System.Net.IPAddress]::Broadcast), $t.Port
        [void]$client.Send($packet, $packet.Length, $endpoint)
        Write-Output "sent $($t.Mac) port $($t.Port)"
    }}
}} finally {{
    $client.Close()
}}
"#
        )
    }

    fn python(packets: &[(MacAddress, u16)]) -> String {
        let mut targets = String::new();
        for (mac, port) in packets {
            let hex: String = magic_packet(*mac).iter().map(|b| format!("{b:02x}")).collect();
            let _ = writeln!(targets, "    ('{mac}', {port}, '{hex}'),");
        }

        format!(
            r#"import socket
targets = [
{targets}]
s = socket.socket(socket.AF_INET, socket.SOCK_DGRAM)
s.setsockopt(socket.SOL_SOCKET, socket.SO_BROADCAST, 1)
try:
    for mac, port, payload in targets:
        s.sendto(bytes.fromhex(payload), ('255.255.255.255', port))
        print('sent %s port %d' % (mac, port))
finally:
    s.close()
"#
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac(s: &str) -> MacAddress {
        s.parse().unwrap()
    }

    #[test]
    fn test_powershell_script_lists_every_pair() {
        let script = MagicPacketScriptBuilder::new(ScriptFlavor::PowerShell).build(&[
            (mac("00:11:22:33:44:55"), 9),
            (mac("aa-bb-cc-dd-ee-ff"), 7),
        ]);
        assert!(script.contains("@{ Mac = '00:11:22:33:44:55'; Port = 9 }"));
        assert!(script.contains("@{ Mac = 'AA:BB:CC:DD:EE:FF'; Port = 7 }"));
        assert!(script.contains("EnableBroadcast = $true"));
        let first = script.find("00:11:22:33:44:55").unwrap();
        let second = script.find("AA:BB:CC:DD:EE:FF").unwrap();
        assert!(first < second);
    }

    #[test]
    fn test_python_script_embeds_packet() {
        let script = MagicPacketScriptBuilder::new(ScriptFlavor::Python)
            .build(&[(mac("00:11:22:33:44:55"), 9)]);
        let expected = format!("ffffffffffff{}", "001122334455".repeat(16));
        assert!(script.contains(&expected));
        assert!(script.contains("SO_BROADCAST"));
    }

    #[test]
    fn test_flavor_from_yaml_name() {
        let flavor: ScriptFlavor = serde_yaml::from_str("python").unwrap();
        assert_eq!(flavor, ScriptFlavor::Python);
        let flavor: ScriptFlavor = serde_yaml::from_str("pwsh").unwrap();
        assert_eq!(flavor, ScriptFlavor::PowerShell);
    }
}
