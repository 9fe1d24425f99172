//! The single blocking event source (`spec.md` §4.2, §5).
//!
//! Exactly one thread, one socket, one pending heartbeat deadline.
//! Suspension only happens inside [`EventSource::next_event`].

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use replfs_wire::Record;

use crate::socket::MulticastChannel;

/// Default heartbeat cadence (`spec.md` §4.2).
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_millis(200);

/// Largest possible datagram: a WRITE_BLOCK record.
const MAX_DATAGRAM: usize = 1 + 4 + 4 + 1 + 4 + 4 + 512;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Packet { source: SocketAddr, record: Record },
    Heartbeat,
}

pub struct EventSource {
    channel: MulticastChannel,
    tick: Duration,
    deadline: Instant,
    buf: Box<[u8; MAX_DATAGRAM]>,
}

impl EventSource {
    pub fn new(channel: MulticastChannel) -> Self {
        Self::with_heartbeat(channel, DEFAULT_HEARTBEAT)
    }

    pub fn with_heartbeat(channel: MulticastChannel, tick: Duration) -> Self {
        Self {
            channel,
            tick,
            deadline: Instant::now() + tick,
            buf: Box::new([0u8; MAX_DATAGRAM]),
        }
    }

    pub fn channel(&self) -> &MulticastChannel {
        &self.channel
    }

    /// Blocks until either a datagram arrives and decodes cleanly, or the
    /// heartbeat deadline passes. Datagrams that fail to decode (unknown
    /// tag, truncated body) are logged and skipped within the same
    /// heartbeat budget - they never surface as an `Event`, matching
    /// `spec.md` §4.1's "reject unknown tags by ignoring the datagram".
    pub fn next_event(&mut self) -> Event {
        loop {
            let now = Instant::now();
            let remaining = self.deadline.saturating_duration_since(now);
            if remaining.is_zero() {
                self.deadline += self.tick;
                return Event::Heartbeat;
            }

            if let Err(e) = self.channel.set_read_timeout(Some(remaining)) {
                log::warn!("failed to set read timeout: {e}");
                self.deadline += self.tick;
                return Event::Heartbeat;
            }

            match self.channel.recv_raw(self.buf.as_mut_slice()) {
                Ok((n, source)) => match Record::decode(&self.buf[..n]) {
                    Ok(record) => return Event::Packet { source, record },
                    Err(e) => {
                        log::debug!("ignoring undecodable datagram from {source}: {e}");
                        continue;
                    }
                },
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    self.deadline += self.tick;
                    return Event::Heartbeat;
                }
                Err(e) => {
                    log::warn!("socket receive error: {e}");
                    continue;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::MulticastChannel;
    use replfs_wire::RollCallAckBody;

    #[test]
    fn heartbeat_fires_when_nothing_arrives() {
        let channel = MulticastChannel::new(44_610, 0).unwrap();
        let mut source = EventSource::with_heartbeat(channel, Duration::from_millis(20));
        assert_eq!(source.next_event(), Event::Heartbeat);
    }

    #[test]
    fn packet_event_carries_the_decoded_record() {
        let receiver = MulticastChannel::new(44_611, 0).unwrap();
        let sender = MulticastChannel::new(44_611, 0).unwrap();
        let record = Record::RollCallAck(RollCallAckBody { proposed_id: 9 });
        sender.send(&record).unwrap();

        let mut source = EventSource::with_heartbeat(receiver, Duration::from_secs(1));
        match source.next_event() {
            Event::Packet { record: got, .. } => assert_eq!(got, record),
            Event::Heartbeat => panic!("expected a packet, got a heartbeat"),
        }
    }
}
