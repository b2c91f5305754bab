//! Peer addressing and its stable wire form.
//!
//! A peer advertises one primary socket (IP plus separate TCP and UDP ports),
//! reachability flags, and — when it sits behind a firewall and is served by
//! relays — the sockets of up to [`MAX_RELAYS`] relay peers. Other nodes may
//! only contact a relayed peer through one of those relay sockets.

use std::fmt;
use std::net::IpAddr;

use bytes::{Buf, BufMut};

use crate::errors::DecodeError;
use crate::id::Id160;

/// Upper bound on advertised relay sockets.
pub const MAX_RELAYS: usize = 5;

const OPT_FIREWALLED_TCP: u8 = 0x01;
const OPT_FIREWALLED_UDP: u8 = 0x02;
const OPT_RELAYED: u8 = 0x04;

const ADDR_TYPE_V4: u8 = 0;
const ADDR_TYPE_V6: u8 = 1;

/// One reachable socket: IP address plus the peer's TCP and UDP ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerSocket {
    pub ip: IpAddr,
    pub tcp_port: u16,
    pub udp_port: u16,
}

impl PeerSocket {
    pub fn new(ip: IpAddr, tcp_port: u16, udp_port: u16) -> Self {
        Self {
            ip,
            tcp_port,
            udp_port,
        }
    }

    /// Loopback socket with the same port for both transports.
    pub fn localhost(port: u16) -> Self {
        Self::new(IpAddr::from([127, 0, 0, 1]), port, port)
    }

    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        match self.ip {
            IpAddr::V4(v4) => {
                buf.put_u8(ADDR_TYPE_V4);
                buf.put_slice(&v4.octets());
            }
            IpAddr::V6(v6) => {
                buf.put_u8(ADDR_TYPE_V6);
                buf.put_slice(&v6.octets());
            }
        }
        buf.put_u16(self.tcp_port);
        buf.put_u16(self.udp_port);
    }

    pub fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        if buf.remaining() < 1 {
            return Err(DecodeError::UnexpectedEnd("address type"));
        }
        let addr_type = buf.get_u8();
        let ip = match addr_type {
            ADDR_TYPE_V4 => {
                if buf.remaining() < 4 {
                    return Err(DecodeError::UnexpectedEnd("ipv4 address"));
                }
                let mut octets = [0u8; 4];
                buf.copy_to_slice(&mut octets);
                IpAddr::from(octets)
            }
            ADDR_TYPE_V6 => {
                if buf.remaining() < 16 {
                    return Err(DecodeError::UnexpectedEnd("ipv6 address"));
                }
                let mut octets = [0u8; 16];
                buf.copy_to_slice(&mut octets);
                IpAddr::from(octets)
            }
            other => return Err(DecodeError::UnknownAddressType(other)),
        };
        if buf.remaining() < 4 {
            return Err(DecodeError::UnexpectedEnd("ports"));
        }
        let tcp_port = buf.get_u16();
        let udp_port = buf.get_u16();
        Ok(Self {
            ip,
            tcp_port,
            udp_port,
        })
    }
}

/// A peer's full advertised identity: id, primary socket, reachability flags
/// and (for relayed peers) the relay socket list.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PeerAddress {
    pub peer_id: Id160,
    pub socket: PeerSocket,
    pub firewalled_tcp: bool,
    pub firewalled_udp: bool,
    pub relayed: bool,
    /// Relay sockets, present only when `relayed` is set. At most
    /// [`MAX_RELAYS`] entries survive encoding.
    pub relay_sockets: Vec<PeerSocket>,
}

impl PeerAddress {
    pub fn new(peer_id: Id160, socket: PeerSocket) -> Self {
        Self {
            peer_id,
            socket,
            firewalled_tcp: false,
            firewalled_udp: false,
            relayed: false,
            relay_sockets: Vec::new(),
        }
    }

    /// Mark the peer unreachable on both transports.
    pub fn firewalled(mut self) -> Self {
        self.firewalled_tcp = true;
        self.firewalled_udp = true;
        self
    }

    /// Rewrite the address into its relayed form.
    pub fn with_relays(mut self, relay_sockets: Vec<PeerSocket>) -> Self {
        self.relayed = !relay_sockets.is_empty();
        self.relay_sockets = relay_sockets;
        self
    }

    /// True when the peer accepts no direct incoming connections.
    pub fn is_unreachable(&self) -> bool {
        self.firewalled_tcp && self.firewalled_udp
    }

    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        let mut options = 0u8;
        if self.firewalled_tcp {
            options |= OPT_FIREWALLED_TCP;
        }
        if self.firewalled_udp {
            options |= OPT_FIREWALLED_UDP;
        }
        if self.relayed {
            options |= OPT_RELAYED;
        }
        buf.put_u8(options);
        self.peer_id.encode(buf);
        self.socket.encode(buf);
        if self.relayed {
            let count = self.relay_sockets.len().min(MAX_RELAYS);
            buf.put_u8(count as u8);
            for relay in self.relay_sockets.iter().take(count) {
                relay.encode(buf);
            }
        }
    }

    pub fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        if buf.remaining() < 1 {
            return Err(DecodeError::UnexpectedEnd("options"));
        }
        let options = buf.get_u8();
        let peer_id = Id160::decode(buf)?;
        let socket = PeerSocket::decode(buf)?;
        let relayed = options & OPT_RELAYED != 0;
        let relay_sockets = if relayed {
            if buf.remaining() < 1 {
                return Err(DecodeError::UnexpectedEnd("relay count"));
            }
            let count = buf.get_u8() as usize;
            if count > MAX_RELAYS {
                return Err(DecodeError::TooManyRelays { max: MAX_RELAYS });
            }
            let mut relays = Vec::with_capacity(count);
            for _ in 0..count {
                relays.push(PeerSocket::decode(buf)?);
            }
            relays
        } else {
            Vec::new()
        };
        Ok(Self {
            peer_id,
            socket,
            firewalled_tcp: options & OPT_FIREWALLED_TCP != 0,
            firewalled_udp: options & OPT_FIREWALLED_UDP != 0,
            relayed,
            relay_sockets,
        })
    }
}

impl fmt::Debug for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PeerAddress({:?} @ {}:{}/{}",
            self.peer_id, self.socket.ip, self.socket.tcp_port, self.socket.udp_port
        )?;
        if self.relayed {
            write!(f, " relayed×{}", self.relay_sockets.len())?;
        }
        if self.is_unreachable() {
            write!(f, " firewalled")?;
        }
        write!(f, ")")
    }
}
