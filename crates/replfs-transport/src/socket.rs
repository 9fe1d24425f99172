//! The multicast datagram channel: join the group, send with simulated
//! loss, receive one datagram per call. Grounded on the source protocol's
//! `netInit`/`sendPacket` (`examples/original_source/replfs_net.cpp`).

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::time::Duration;

use rand::Rng;
use socket2::{Domain, Protocol, Socket, Type};

use replfs_wire::Record;

use crate::error::TransportError;

/// `224.1.1.1`, matching `spec.md` §6.
pub const MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(224, 1, 1, 1);
/// Per `spec.md` §6: "DO NOT use a value > 32".
pub const MULTICAST_TTL: u32 = 32;

pub struct MulticastChannel {
    socket: UdpSocket,
    group_addr: SocketAddrV4,
    drop_percent: u8,
}

impl MulticastChannel {
    pub fn new(port: u16, drop_percent: u8) -> Result<Self, TransportError> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .map_err(TransportError::Socket)?;
        socket.set_reuse_address(true).map_err(TransportError::Socket)?;
        #[cfg(unix)]
        socket.set_reuse_port(true).map_err(TransportError::Socket)?;

        let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
        socket
            .bind(&bind_addr.into())
            .map_err(|source| TransportError::Bind { port, source })?;

        socket
            .set_multicast_ttl_v4(MULTICAST_TTL)
            .map_err(TransportError::Ttl)?;
        socket
            .join_multicast_v4(&MULTICAST_GROUP, &Ipv4Addr::UNSPECIFIED)
            .map_err(|source| TransportError::Join {
                group: MULTICAST_GROUP,
                source,
            })?;

        Ok(Self {
            socket: socket.into(),
            group_addr: SocketAddrV4::new(MULTICAST_GROUP, port),
            drop_percent: drop_percent.min(100),
        })
    }

    /// Multicasts `record` to the group, simulating loss at `drop_percent`.
    /// A simulated drop is not a caller-visible error - it is logged and
    /// treated as a successful send, matching the source's fire-and-forget
    /// `sendPacket` semantics for the caller.
    pub fn send(&self, record: &Record) -> std::io::Result<()> {
        if self.should_drop() {
            log::debug!(
                "simulated drop of record tag 0x{:02x} ({} bytes)",
                record.tag(),
                record.wire_len()
            );
            return Ok(());
        }
        let bytes = record.encode();
        self.socket.send_to(&bytes, self.group_addr)?;
        Ok(())
    }

    fn should_drop(&self) -> bool {
        self.drop_percent > 0 && rand::thread_rng().gen_range(0..100) < self.drop_percent as u32
    }

    pub(crate) fn set_read_timeout(&self, timeout: Option<Duration>) -> std::io::Result<()> {
        self.socket.set_read_timeout(timeout)
    }

    pub(crate) fn recv_raw(&self, buf: &mut [u8]) -> std::io::Result<(usize, SocketAddr)> {
        self.socket.recv_from(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replfs_wire::RollCallAckBody;

    #[test]
    fn never_drops_at_zero_percent() {
        let channel = MulticastChannel::new(44_601, 0).unwrap();
        for _ in 0..50 {
            assert!(!channel.should_drop());
        }
    }

    #[test]
    fn always_drops_at_full_percent() {
        let channel = MulticastChannel::new(44_602, 100).unwrap();
        for _ in 0..50 {
            assert!(channel.should_drop());
        }
    }

    #[test]
    fn send_on_a_bound_socket_succeeds() {
        let channel = MulticastChannel::new(44_603, 0).unwrap();
        let record = Record::RollCallAck(RollCallAckBody { proposed_id: 42 });
        channel.send(&record).unwrap();
    }
}
