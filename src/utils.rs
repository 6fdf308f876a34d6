//! Small helpers shared by the CLI, the HTTP client and the reports.

use std::fmt;
use std::net::{IpAddr, UdpSocket};
use std::time::Duration;

use http::HeaderMap;

/// Unit suffixes accepted by [`parse_duration_str`] and their length in
/// milliseconds. `ms` must come before `s`.
const DURATION_UNITS: &[(&str, f64)] = &[
    ("ms", 1.0),
    ("s", 1_000.0),
    ("m", 60_000.0),
    ("h", 3_600_000.0),
];

/// Parse `500ms`, `30s`, `1.5m`, `1h` or a bare number of seconds.
pub fn parse_duration_str(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Ok(secs) = s.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let (value, millis) = DURATION_UNITS
        .iter()
        .find_map(|(unit, millis)| s.strip_suffix(unit).map(|v| (v, *millis)))?;
    let value: f64 = value.trim().parse().ok()?;
    Duration::try_from_secs_f64(value * millis / 1_000.0).ok()
}

/// clap value parser wrapper around [`parse_duration_str`].
pub fn parse_duration_arg(s: &str) -> Result<Duration, String> {
    parse_duration_str(s).ok_or_else(|| format!("invalid duration '{}'", s))
}

/// Human readable byte count, e.g. `1.50KB`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ByteSize(pub f64);

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const KB: f64 = 1024.0;
        const MB: f64 = KB * 1024.0;
        const GB: f64 = MB * 1024.0;

        let (value, suffix) = if self.0 > GB {
            (self.0 / GB, "GB")
        } else if self.0 > MB {
            (self.0 / MB, "MB")
        } else if self.0 > KB {
            (self.0 / KB, "KB")
        } else {
            (self.0, "bytes")
        };
        write!(f, "{:.2}{}", value, suffix)
    }
}

/// Approximate serialized size of response headers: one `key: value\r\n`
/// line per value plus the terminating blank line.
pub fn estimate_headers_size(headers: &HeaderMap) -> usize {
    let mut size = 0;
    for key in headers.keys() {
        size += key.as_str().len() + ": \r\n".len();
        for value in headers.get_all(key) {
            size += value.len();
        }
    }
    size + "\r\n".len()
}

/// First non-loopback IPv4 address of this host, empty when unknown.
///
/// Connecting a UDP socket sends no packets; it only asks the OS which local
/// address would route to the given destination.
pub fn local_ip() -> String {
    let probe = || -> std::io::Result<IpAddr> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect("8.8.8.8:80")?;
        Ok(socket.local_addr()?.ip())
    };
    match probe() {
        Ok(ip) if ip.is_ipv4() && !ip.is_loopback() => ip.to_string(),
        _ => String::new(),
    }
}
