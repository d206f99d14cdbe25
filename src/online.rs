//! Online state probing
//!
//! Two interchangeable strategies decide whether a re-dial is needed: ask
//! the portal, or ping a well-known host and compare the reply ratio with a
//! threshold.

use crate::config::OnlineCheckConfig;
use crate::error::PortalError;
use crate::portal::CaptivePortal;
use crate::shutdown::Shutdown;
use async_trait::async_trait;
use pnet::packet::icmp::echo_reply::EchoReplyPacket;
use pnet::packet::icmp::echo_request::MutableEchoRequestPacket;
use pnet::packet::icmp::{self, IcmpPacket, IcmpTypes};
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::Packet;
use pnet::transport::{
    icmp_packet_iter, transport_channel, IcmpTransportChannelIterator, TransportChannelType,
    TransportProtocol,
};
use std::net::{IpAddr, Ipv4Addr};
use std::time::{Duration, Instant};

const REPLY_TIMEOUT: Duration = Duration::from_secs(1);
const PAYLOAD: &[u8] = b"ping";

#[derive(Debug, Clone, PartialEq)]
pub enum Strategy {
    Portal,
    Ping {
        host: String,
        count: u16,
        threshold: f64,
    },
}

impl Strategy {
    /// `None` for an unrecognised method name
    pub fn from_config(cfg: &OnlineCheckConfig) -> Option<Self> {
        match cfg.method.trim() {
            "" | "portal" => Some(Strategy::Portal),
            "ping" => Some(Strategy::Ping {
                host: cfg.host.clone(),
                count: cfg.count,
                threshold: cfg.threshold,
            }),
            _ => None,
        }
    }
}

/// Sends ICMP echo requests. Raw sockets need privileges, so the prober
/// only sees this trait.
#[async_trait]
pub trait PingProbe: Send + Sync {
    /// Send `count` echo requests one at a time, waiting up to `timeout`
    /// for each reply. One entry per request: `true` if it was answered.
    async fn probe(&self, host: &str, count: u16, timeout: Duration)
        -> Result<Vec<bool>, PortalError>;
}

pub struct OnlineProber<'a> {
    method: &'a str,
    strategy: Option<Strategy>,
    portal: &'a dyn CaptivePortal,
    ping: &'a dyn PingProbe,
}

impl<'a> OnlineProber<'a> {
    pub fn new(
        cfg: &'a OnlineCheckConfig,
        portal: &'a dyn CaptivePortal,
        ping: &'a dyn PingProbe,
    ) -> Self {
        Self {
            method: &cfg.method,
            strategy: Strategy::from_config(cfg),
            portal,
            ping,
        }
    }

    /// An unknown method is treated as "not online" so the dial proceeds.
    pub async fn is_online(&self, shutdown: &Shutdown) -> Result<bool, PortalError> {
        match &self.strategy {
            Some(Strategy::Portal) => self.portal.is_online(shutdown).await,
            Some(Strategy::Ping {
                host,
                count,
                threshold,
            }) => {
                let replies = tokio::select! {
                    res = self.ping.probe(host, *count, REPLY_TIMEOUT) => res?,
                    _ = shutdown.cancelled() => return Err(PortalError::Cancelled),
                };
                let online = reply_ratio_reaches(&replies, *count, *threshold);
                tracing::debug!(
                    "{}/{} echo replies from {}",
                    replies.iter().filter(|r| **r).count(),
                    count,
                    host
                );
                Ok(online)
            }
            None => {
                tracing::warn!("Unknown online check method: {}", self.method);
                Ok(false)
            }
        }
    }
}

fn reply_ratio_reaches(replies: &[bool], count: u16, threshold: f64) -> bool {
    if count == 0 {
        return false;
    }
    let answered = replies.iter().filter(|r| **r).count();
    answered as f64 / f64::from(count) >= threshold
}

/// Raw-socket ICMP probe; needs CAP_NET_RAW
pub struct IcmpProbe;

#[async_trait]
impl PingProbe for IcmpProbe {
    async fn probe(
        &self,
        host: &str,
        count: u16,
        timeout: Duration,
    ) -> Result<Vec<bool>, PortalError> {
        let target = resolve_ipv4(host).await?;
        let identifier = (std::process::id() & 0xffff) as u16;

        tokio::task::spawn_blocking(move || echo_blocking(target, identifier, count, timeout))
            .await
            .map_err(|e| PortalError::Ping(std::io::Error::other(e)))?
    }
}

async fn resolve_ipv4(host: &str) -> Result<Ipv4Addr, PortalError> {
    if let Ok(ip) = host.parse::<Ipv4Addr>() {
        return Ok(ip);
    }
    tokio::net::lookup_host((host, 0))
        .await
        .map_err(PortalError::Ping)?
        .find_map(|addr| match addr.ip() {
            IpAddr::V4(v4) => Some(v4),
            IpAddr::V6(_) => None,
        })
        .ok_or_else(|| {
            PortalError::Ping(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no IPv4 address for {}", host),
            ))
        })
}

fn echo_blocking(
    target: Ipv4Addr,
    identifier: u16,
    count: u16,
    timeout: Duration,
) -> Result<Vec<bool>, PortalError> {
    let protocol =
        TransportChannelType::Layer4(TransportProtocol::Ipv4(IpNextHeaderProtocols::Icmp));
    let (mut tx, mut rx) = transport_channel(1024, protocol).map_err(PortalError::Ping)?;
    let mut replies = icmp_packet_iter(&mut rx);

    let mut results = Vec::with_capacity(usize::from(count));
    for seq in 0..count {
        let mut buf = vec![0u8; MutableEchoRequestPacket::minimum_packet_size() + PAYLOAD.len()];
        let request = build_echo_request(&mut buf, identifier, seq)?;
        tx.send_to(request, IpAddr::V4(target))
            .map_err(PortalError::Ping)?;

        let answered = await_reply(&mut replies, target, identifier, seq, timeout);
        results.push(answered);
    }
    Ok(results)
}

/// Reads packets until our reply to `seq` arrives or `timeout` elapses.
/// Unrelated packets and receive errors do not end the wait.
fn await_reply(
    replies: &mut IcmpTransportChannelIterator<'_>,
    target: Ipv4Addr,
    identifier: u16,
    seq: u16,
    timeout: Duration,
) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return false;
        }
        match replies.next_with_timeout(remaining) {
            Ok(Some((packet, from))) => {
                if from == IpAddr::V4(target) && is_echo_reply(&packet, identifier, seq) {
                    return true;
                }
            }
            Ok(None) => return false,
            Err(e) => tracing::debug!("Echo {} to {}: {}", seq, target, e),
        }
    }
}

fn build_echo_request(
    buf: &mut [u8],
    identifier: u16,
    seq: u16,
) -> Result<MutableEchoRequestPacket<'_>, PortalError> {
    let mut packet = MutableEchoRequestPacket::new(buf).ok_or_else(|| {
        PortalError::Ping(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "echo buffer too small",
        ))
    })?;
    packet.set_icmp_type(IcmpTypes::EchoRequest);
    packet.set_identifier(identifier);
    packet.set_sequence_number(seq);
    packet.set_payload(PAYLOAD);

    let checksum = IcmpPacket::new(packet.packet())
        .map(|p| icmp::checksum(&p))
        .unwrap_or_default();
    packet.set_checksum(checksum);
    Ok(packet)
}

fn is_echo_reply(packet: &IcmpPacket<'_>, identifier: u16, seq: u16) -> bool {
    if packet.get_icmp_type() != IcmpTypes::EchoReply {
        return false;
    }
    EchoReplyPacket::new(packet.packet())
        .map(|reply| reply.get_identifier() == identifier && reply.get_sequence_number() == seq)
        .unwrap_or(false)
}
