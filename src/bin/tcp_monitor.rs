//! tcp_monitor: print every TCP header the host receives
//!
//! Opens a raw `IPPROTO_TCP` IPv4 socket, strips the IPv4 header and decodes
//! the TCP header with the crate's codec. Requires root (or `CAP_NET_RAW`).
//!
//! ```bash
//! sudo ./tcp_monitor            # everything
//! sudo ./tcp_monitor --port 80  # segments to or from port 80
//! sudo ./tcp_monitor -n 10      # stop after ten headers
//! ```

use std::io::Read;
use std::net::Ipv4Addr;

use anyhow::{bail, Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use ya_proxy::codec::{decode, TcpHeader};

/// Largest IPv4 datagram
const RECV_BUFFER_SIZE: usize = 65_535;

/// Minimum IPv4 header length in bytes
const MIN_IPV4_HEADER_LEN: usize = 20;

struct Args {
    port: Option<u16>,
    count: Option<u64>,
}

impl Args {
    fn parse() -> Result<Self> {
        let mut args = std::env::args().skip(1);
        let mut parsed = Self {
            port: None,
            count: None,
        };

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--port" => {
                    let value = args.next().context("Missing value for --port")?;
                    parsed.port = Some(value.parse().context("Invalid port")?);
                }
                "-n" | "--count" => {
                    let value = args.next().context("Missing value for --count")?;
                    parsed.count = Some(value.parse().context("Invalid count")?);
                }
                "-h" | "--help" => {
                    println!("USAGE: tcp_monitor [--port <PORT>] [-n <COUNT>]");
                    std::process::exit(0);
                }
                _ => bail!("Unknown argument: {arg}"),
            }
        }

        Ok(parsed)
    }

    fn matches(&self, header: &TcpHeader) -> bool {
        self.port
            .map_or(true, |p| header.source_port == p || header.destination_port == p)
    }
}

/// Source, destination and TCP segment of an IPv4 datagram
fn split_ipv4(datagram: &[u8]) -> Option<(Ipv4Addr, Ipv4Addr, &[u8])> {
    if datagram.len() < MIN_IPV4_HEADER_LEN || datagram[0] >> 4 != 4 {
        return None;
    }

    let ihl = usize::from(datagram[0] & 0x0f) * 4;
    if ihl < MIN_IPV4_HEADER_LEN || ihl > datagram.len() {
        return None;
    }

    let src = Ipv4Addr::new(datagram[12], datagram[13], datagram[14], datagram[15]);
    let dst = Ipv4Addr::new(datagram[16], datagram[17], datagram[18], datagram[19]);
    Some((src, dst, &datagram[ihl..]))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .with_target(false)
        .init();

    let args = Args::parse()?;

    let mut socket = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::TCP))
        .context("Failed to open raw TCP socket (root or CAP_NET_RAW required)")?;

    info!("Listening for TCP segments on a raw IPv4 socket");

    let mut buf = vec![0u8; RECV_BUFFER_SIZE];
    let mut seen = 0u64;

    loop {
        let n = match socket.read(&mut buf) {
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e).context("Raw socket receive failed"),
        };

        let Some((src, dst, segment)) = split_ipv4(&buf[..n]) else {
            debug!("Skipping {} bytes that are not an IPv4 datagram", n);
            continue;
        };

        let header = match decode(segment) {
            Ok(header) => header,
            Err(e) => {
                warn!("{} -> {}: undecodable TCP header: {}", src, dst, e);
                continue;
            }
        };

        if !args.matches(&header) {
            continue;
        }

        info!(
            "{}:{} -> {}:{} payload={} {}",
            src,
            header.source_port,
            dst,
            header.destination_port,
            segment.len().saturating_sub(header.payload_offset()),
            header
        );

        seen += 1;
        if args.count.is_some_and(|limit| seen >= limit) {
            return Ok(());
        }
    }
}
