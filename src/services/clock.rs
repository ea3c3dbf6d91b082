/// Time sources for the refresh loop.
/// Each produces the current minute as a `TimeKey`; the NTP source asks a
/// list of SNTP servers and never falls back to the local clock on its own.
use std::io::Cursor;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use byteorder::{BigEndian, ReadBytesExt};
use chrono::{DateTime, Local, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::quotes::model::TimeKey;

pub const DEFAULT_NTP_SERVERS: &[&str] = &[
    "time.google.com",
    "time.windows.com",
    "time.apple.com",
    "pool.ntp.org",
    "time.nist.gov",
];

const NTP_PORT: u16 = 123;
const NTP_PACKET_LEN: usize = 48;
/// Seconds between 1900-01-01 (NTP era 0) and 1970-01-01
const NTP_UNIX_OFFSET: i64 = 2_208_988_800;
const NTP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum TimeSourceError {
    #[error("time server {server}: {source}")]
    Io {
        server: String,
        #[source]
        source: std::io::Error,
    },
    #[error("time server {server}: {reason}")]
    BadResponse { server: String, reason: String },
    #[error("no time server answered ({0} tried)")]
    AllServersFailed(usize),
}

/// Produces the current minute
pub trait TimeSource: Send {
    fn now(&mut self) -> Result<TimeKey, TimeSourceError>;

    fn describe(&self) -> String;
}

/// Local wall clock
#[derive(Debug, Default)]
pub struct LocalClock;

impl TimeSource for LocalClock {
    fn now(&mut self) -> Result<TimeKey, TimeSourceError> {
        Ok(TimeKey::from_time(&Local::now()))
    }

    fn describe(&self) -> String {
        "local clock".to_string()
    }
}

/// Always reports the same minute
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub TimeKey);

impl TimeSource for FixedClock {
    fn now(&mut self) -> Result<TimeKey, TimeSourceError> {
        Ok(self.0)
    }

    fn describe(&self) -> String {
        format!("fixed time {}", self.0)
    }
}

/// SNTP client over UDP
#[derive(Debug)]
pub struct NtpClock {
    servers: Vec<String>,
    timeout: Duration,
}

impl NtpClock {
    /// A custom server, if given, is asked before the default pool
    pub fn new(custom: Option<String>) -> Self {
        let mut servers: Vec<String> = custom.into_iter().collect();
        servers.extend(DEFAULT_NTP_SERVERS.iter().map(|s| s.to_string()));
        Self {
            servers,
            timeout: NTP_TIMEOUT,
        }
    }

    pub fn with_servers(servers: Vec<String>, timeout: Duration) -> Self {
        Self { servers, timeout }
    }

    fn query(&self, server: &str) -> Result<DateTime<Utc>, TimeSourceError> {
        let io_err = |source| TimeSourceError::Io {
            server: server.to_string(),
            source,
        };

        let addr = with_default_port(server)
            .to_socket_addrs()
            .map_err(io_err)?
            .next()
            .ok_or_else(|| TimeSourceError::BadResponse {
                server: server.to_string(),
                reason: "host did not resolve".into(),
            })?;

        let bind = if addr.is_ipv6() { "[::]:0" } else { "0.0.0.0:0" };
        let socket = UdpSocket::bind(bind).map_err(io_err)?;
        socket.set_read_timeout(Some(self.timeout)).map_err(io_err)?;
        socket.connect(addr).map_err(io_err)?;
        socket.send(&request_packet()).map_err(io_err)?;

        let mut buf = [0u8; NTP_PACKET_LEN];
        let n = socket.recv(&mut buf).map_err(io_err)?;
        parse_response(&buf[..n]).map_err(|reason| TimeSourceError::BadResponse {
            server: server.to_string(),
            reason,
        })
    }
}

impl TimeSource for NtpClock {
    fn now(&mut self) -> Result<TimeKey, TimeSourceError> {
        for server in &self.servers {
            debug!("Querying NTP server {}", server);
            match self.query(server) {
                Ok(utc) => {
                    let local = utc.with_timezone(&Local);
                    let key = TimeKey::from_time(&local);
                    info!("Current time (NTP from {}): {}", server, key);
                    return Ok(key);
                }
                Err(e) => warn!("NTP query failed: {}", e),
            }
        }
        Err(TimeSourceError::AllServersFailed(self.servers.len()))
    }

    fn describe(&self) -> String {
        format!("NTP ({})", self.servers.join(", "))
    }
}

fn with_default_port(server: &str) -> String {
    if server.parse::<SocketAddr>().is_ok() {
        return server.to_string();
    }
    let bare = server.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = bare.parse::<IpAddr>() {
        return SocketAddr::new(ip, NTP_PORT).to_string();
    }
    match server.rsplit_once(':') {
        Some((_, port)) if port.parse::<u16>().is_ok() => server.to_string(),
        _ => format!("{server}:{NTP_PORT}"),
    }
}

/// Client request: LI = 0, VN = 3, Mode = 3 (client)
fn request_packet() -> [u8; NTP_PACKET_LEN] {
    let mut packet = [0u8; NTP_PACKET_LEN];
    packet[0] = 0x1B;
    packet
}

/// Decode the transmit timestamp of a server reply
fn parse_response(buf: &[u8]) -> Result<DateTime<Utc>, String> {
    if buf.len() < NTP_PACKET_LEN {
        return Err(format!("short reply ({} bytes)", buf.len()));
    }
    let mode = buf[0] & 0x07;
    if mode != 4 && mode != 5 {
        return Err(format!("unexpected mode {mode}"));
    }
    if buf[1] == 0 {
        return Err("kiss-of-death (stratum 0)".into());
    }

    let mut rdr = Cursor::new(&buf[40..48]);
    let secs = rdr.read_u32::<BigEndian>().map_err(|e| e.to_string())?;
    let frac = rdr.read_u32::<BigEndian>().map_err(|e| e.to_string())?;
    if secs == 0 {
        return Err("empty transmit timestamp".into());
    }

    let unix = secs as i64 - NTP_UNIX_OFFSET;
    let nanos = ((frac as u64 * 1_000_000_000) >> 32) as u32;
    DateTime::from_timestamp(unix, nanos).ok_or_else(|| format!("timestamp {unix} out of range"))
}
