//! DNS SRV Resolution
//!
//! A directory resolver capability: given a record name, return SRV
//! target/port tuples. [`DnsSrvResolver`] speaks plain DNS over UDP to a list
//! of servers, which are either configured explicitly or read from
//! `/etc/resolv.conf`. A truncated UDP answer is repeated over TCP.
//!
//! Only what SRV lookups need is implemented: a single-question query with
//! recursion desired, and a response parser that follows name compression
//! pointers.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, BytesMut};
use cluster_config::defaults::discovery::DNS_PORT;
use regex::Regex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::{NetworkError, Result};

const RECORD_TYPE_SRV: u16 = 33;
const CLASS_IN: u16 = 1;
const HEADER_LEN: usize = 12;
const FLAG_QR: u16 = 0x8000;
const FLAG_TC: u16 = 0x0200;
const FLAG_RD: u16 = 0x0100;
const RCODE_MASK: u16 = 0x000F;
const RCODE_NXDOMAIN: u16 = 3;
const MAX_LABEL_LEN: usize = 63;
const MAX_NAME_LEN: usize = 255;
const MAX_POINTER_JUMPS: usize = 16;
const MAX_DATAGRAM: usize = 4096;
const RESOLV_CONF: &str = "/etc/resolv.conf";

/// One SRV answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrvRecord {
    pub priority: u16,
    pub weight: u16,
    pub port: u16,
    /// Fully qualified target, with its trailing dot
    pub target: String,
}

/// Looks up SRV records
#[async_trait]
pub trait SrvResolver: Send + Sync {
    /// Records for `name`; `NameNotFound` when the name has none
    async fn query_srv(&self, name: &str) -> Result<Vec<SrvRecord>>;

    /// Release the resolver; later queries fail
    async fn close(&self) -> Result<()> {
        Ok(())
    }

    /// Short description for logs
    fn describe(&self) -> String;
}

/// SRV lookups over UDP, trying each server in turn
pub struct DnsSrvResolver {
    servers: Vec<SocketAddr>,
    timeout: Duration,
    closed: AtomicBool,
}

impl DnsSrvResolver {
    pub fn new(servers: Vec<SocketAddr>, timeout: Duration) -> Self {
        Self {
            servers,
            timeout,
            closed: AtomicBool::new(false),
        }
    }

    /// Resolver over the system's configured name servers
    pub async fn system(timeout: Duration) -> Self {
        let servers = match tokio::fs::read_to_string(RESOLV_CONF).await {
            Ok(contents) => parse_resolv_conf(&contents),
            Err(e) => {
                warn!("Could not read {}: {}", RESOLV_CONF, e);
                Vec::new()
            }
        };

        if servers.is_empty() {
            Self::new(vec![SocketAddr::new(Ipv4Addr::LOCALHOST.into(), DNS_PORT)], timeout)
        } else {
            Self::new(servers, timeout)
        }
    }

    /// One resolver per server in `servers`, or the system resolver if unset
    pub async fn from_server_list(servers: Option<&str>, timeout: Duration) -> Result<Vec<Self>> {
        let servers = match servers.map(str::trim).filter(|s| !s.is_empty()) {
            Some(servers) => servers,
            None => return Ok(vec![Self::system(timeout).await]),
        };

        let mut resolvers = Vec::new();
        for (host, port) in parse_server_list(servers)? {
            let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host.as_str(), port))
                .await
                .map_err(|e| {
                    NetworkError::connection_with_source(
                        "Failed to resolve DNS server",
                        Some(host.as_str()),
                        e,
                    )
                })?
                .collect();
            if addrs.is_empty() {
                return Err(NetworkError::configuration(
                    format!("DNS server {} has no address", host),
                    Some("discovery.srv_servers"),
                ));
            }
            resolvers.push(Self::new(addrs, timeout));
        }
        Ok(resolvers)
    }

    pub fn servers(&self) -> &[SocketAddr] {
        &self.servers
    }

    async fn query_server(&self, server: SocketAddr, name: &str) -> Result<Vec<SrvRecord>> {
        let deadline = Instant::now() + self.timeout;
        let (id, packet) = self.exchange_udp(server, name, deadline).await?;
        if is_truncated(&packet) {
            debug!(%server, %name, "DNS answer truncated, retrying over TCP");
            return self.query_server_tcp(server, name, deadline).await;
        }
        parse_response(id, &packet, name)
    }

    /// Send one query datagram and return the id and the matching answer
    async fn exchange_udp(&self, server: SocketAddr, name: &str, deadline: Instant) -> Result<(u16, Vec<u8>)> {
        let local: SocketAddr = match server.ip() {
            IpAddr::V4(_) => SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), 0),
            IpAddr::V6(_) => SocketAddr::new(Ipv6Addr::UNSPECIFIED.into(), 0),
        };
        let socket = UdpSocket::bind(local).await?;

        let id: u16 = rand::random();
        let query = build_query(id, name)?;
        socket.send_to(&query, server).await?;

        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let (len, _) = tokio::time::timeout_at(deadline, socket.recv_from(&mut buf))
                .await
                .map_err(|_| self.query_timeout(server))??;

            // late answers to earlier queries carry other ids
            if len < 2 || BigEndian::read_u16(&buf[..2]) != id {
                debug!(%server, "Ignoring unrelated DNS datagram");
                continue;
            }
            buf.truncate(len);
            return Ok((id, buf));
        }
    }

    /// Same query over TCP, each message prefixed with its 16-bit length
    async fn query_server_tcp(&self, server: SocketAddr, name: &str, deadline: Instant) -> Result<Vec<SrvRecord>> {
        let id: u16 = rand::random();
        let query = build_query(id, name)?;
        let len = u16::try_from(query.len())
            .map_err(|_| NetworkError::protocol(format!("DNS query of {} bytes too large", query.len())))?;

        let exchange = async {
            let mut stream = TcpStream::connect(server).await?;
            let mut framed = BytesMut::with_capacity(2 + query.len());
            framed.put_u16(len);
            framed.put_slice(&query);
            stream.write_all(&framed).await?;

            let answer_len = stream.read_u16().await? as usize;
            let mut packet = vec![0u8; answer_len];
            stream.read_exact(&mut packet).await?;
            Ok::<_, NetworkError>(packet)
        };

        let packet = tokio::time::timeout_at(deadline, exchange)
            .await
            .map_err(|_| self.query_timeout(server))??;
        parse_response(id, &packet, name)
    }

    fn query_timeout(&self, server: SocketAddr) -> NetworkError {
        NetworkError::timeout(format!("SRV query to {}", server), self.timeout.as_millis() as u64)
    }
}

#[async_trait]
impl SrvResolver for DnsSrvResolver {
    async fn query_srv(&self, name: &str) -> Result<Vec<SrvRecord>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(NetworkError::illegal_state("Resolver closed."));
        }

        let mut last_error = None;
        for server in &self.servers {
            match self.query_server(*server, name).await {
                Ok(records) => return Ok(records),
                Err(e @ NetworkError::NameNotFound { .. }) => return Err(e),
                Err(e) => {
                    debug!(%server, error = %e, "SRV query failed, trying next server");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| NetworkError::discovery("No DNS servers configured")))
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    fn describe(&self) -> String {
        let servers: Vec<String> = self.servers.iter().map(ToString::to_string).collect();
        format!("dns({})", servers.join(", "))
    }
}

/// Split a server list into host/port pairs
///
/// Entries are separated by whitespace or commas and take the form
/// `dns://host:port`, `host:port` or `host`; IPv6 hosts use brackets.
pub fn parse_server_list(servers: &str) -> Result<Vec<(String, u16)>> {
    let pattern = Regex::new(r"^(?:dns://)?(?:\[([0-9A-Fa-f:.]+)\]|([^\s:/\[\]]+))(?::(\d{1,5}))?/?$")
        .map_err(|e| NetworkError::configuration(format!("Invalid server pattern: {}", e), None))?;

    servers.split(|c: char| c.is_whitespace() || c == ',')
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let captures = pattern.captures(entry).ok_or_else(|| {
                NetworkError::configuration(
                    format!("Invalid DNS server {:?}", entry),
                    Some("discovery.srv_servers"),
                )
            })?;
            let host = captures
                .get(1)
                .or_else(|| captures.get(2))
                .map(|m| m.as_str().to_string())
                .unwrap_or_default();
            let port = match captures.get(3) {
                Some(port) => port.as_str().parse::<u16>().map_err(|_| {
                    NetworkError::configuration(
                        format!("Invalid DNS server port in {:?}", entry),
                        Some("discovery.srv_servers"),
                    )
                })?,
                None => DNS_PORT,
            };
            Ok((host, port))
        })
        .collect()
}

/// Name servers listed in resolv.conf contents
pub fn parse_resolv_conf(contents: &str) -> Vec<SocketAddr> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.starts_with('#') && !line.starts_with(';'))
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            match (parts.next(), parts.next()) {
                (Some("nameserver"), Some(addr)) => addr.parse::<IpAddr>().ok(),
                _ => None,
            }
        })
        .map(|ip| SocketAddr::new(ip, DNS_PORT))
        .collect()
}

fn write_name(buf: &mut Vec<u8>, name: &str) -> Result<()> {
    let trimmed = name.strip_suffix('.').unwrap_or(name);
    if trimmed.len() > MAX_NAME_LEN {
        return Err(NetworkError::protocol(format!("Name too long: {}", name)));
    }
    if !trimmed.is_empty() {
        for label in trimmed.split('.') {
            if label.is_empty() || label.len() > MAX_LABEL_LEN {
                return Err(NetworkError::protocol(format!("Invalid label in {:?}", name)));
            }
            buf.put_u8(label.len() as u8);
            buf.put_slice(label.as_bytes());
        }
    }
    buf.put_u8(0);
    Ok(())
}

/// Single-question SRV query with recursion desired
pub fn build_query(id: u16, name: &str) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(HEADER_LEN + name.len() + 6);
    buf.put_u16(id);
    buf.put_u16(FLAG_RD);
    buf.put_u16(1); // questions
    buf.put_u16(0);
    buf.put_u16(0);
    buf.put_u16(0);
    write_name(&mut buf, name)?;
    buf.put_u16(RECORD_TYPE_SRV);
    buf.put_u16(CLASS_IN);
    Ok(buf)
}

fn truncated() -> NetworkError {
    NetworkError::protocol("Truncated DNS message")
}

/// Read a possibly compressed name at `offset`; returns the name and the
/// offset just past it in the original stream
fn read_name(packet: &[u8], offset: usize) -> Result<(String, usize)> {
    let mut labels: Vec<String> = Vec::new();
    let mut pos = offset;
    let mut end = None;
    let mut jumps = 0;

    loop {
        let len = *packet.get(pos).ok_or_else(truncated)? as usize;
        match len & 0xC0 {
            0xC0 => {
                let low = *packet.get(pos + 1).ok_or_else(truncated)? as usize;
                end.get_or_insert(pos + 2);
                jumps += 1;
                if jumps > MAX_POINTER_JUMPS {
                    return Err(NetworkError::protocol("DNS compression loop"));
                }
                pos = ((len & 0x3F) << 8) | low;
            }
            0x00 if len == 0 => {
                let name = format!("{}.", labels.join("."));
                return Ok((name, end.unwrap_or(pos + 1)));
            }
            0x00 => {
                let label = packet.get(pos + 1..pos + 1 + len).ok_or_else(truncated)?;
                labels.push(String::from_utf8_lossy(label).into_owned());
                pos += 1 + len;
            }
            _ => return Err(NetworkError::protocol("Unsupported DNS label type")),
        }
    }
}

/// Whether the server set the truncation flag
pub fn is_truncated(packet: &[u8]) -> bool {
    packet.len() >= 4 && BigEndian::read_u16(&packet[2..4]) & FLAG_TC != 0
}

/// Extract the SRV answers of a response to query `id`
pub fn parse_response(id: u16, packet: &[u8], name: &str) -> Result<Vec<SrvRecord>> {
    if packet.len() < HEADER_LEN {
        return Err(truncated());
    }
    if BigEndian::read_u16(&packet[0..2]) != id {
        return Err(NetworkError::protocol("DNS response id mismatch"));
    }

    let flags = BigEndian::read_u16(&packet[2..4]);
    if flags & FLAG_QR == 0 {
        return Err(NetworkError::protocol("DNS message is not a response"));
    }
    match flags & RCODE_MASK {
        0 => {}
        RCODE_NXDOMAIN => return Err(NetworkError::name_not_found(name)),
        rcode => {
            return Err(NetworkError::discovery(format!(
                "DNS server answered {} with rcode {}",
                name, rcode
            )))
        }
    }
    if flags & FLAG_TC != 0 {
        warn!(%name, "DNS response truncated; using the records received");
    }

    let questions = BigEndian::read_u16(&packet[4..6]);
    let answers = BigEndian::read_u16(&packet[6..8]);

    let mut offset = HEADER_LEN;
    for _ in 0..questions {
        offset = read_name(packet, offset)?.1 + 4;
    }

    let mut records = Vec::new();
    for _ in 0..answers {
        offset = read_name(packet, offset)?.1;
        let fixed = packet.get(offset..offset + 10).ok_or_else(truncated)?;
        let record_type = BigEndian::read_u16(&fixed[0..2]);
        let rdata_len = BigEndian::read_u16(&fixed[8..10]) as usize;

        let rdata_start = offset + 10;
        let rdata_end = rdata_start + rdata_len;
        let rdata = packet.get(rdata_start..rdata_end).ok_or_else(truncated)?;

        if record_type == RECORD_TYPE_SRV {
            if rdata.len() < 7 {
                return Err(NetworkError::protocol("Short SRV record"));
            }
            let (target, _) = read_name(packet, rdata_start + 6)?;
            records.push(SrvRecord {
                priority: BigEndian::read_u16(&rdata[0..2]),
                weight: BigEndian::read_u16(&rdata[2..4]),
                port: BigEndian::read_u16(&rdata[4..6]),
                target,
            });
        }
        offset = rdata_end;
    }

    if records.is_empty() {
        return Err(NetworkError::name_not_found(name));
    }
    Ok(records)
}
