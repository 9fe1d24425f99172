//! The server's main loop: block on [`EventSource::next_event`], dispatch,
//! multicast the reply. Grounded on `examples/original_source/server.cpp`'s
//! `main` loop (`spec.md` §4.2, §5).

use replfs_transport::{Event, EventSource};

use crate::state::ServerInstance;

impl ServerInstance {
    /// Runs forever. Heartbeats are currently a no-op for the server side
    /// (it has no timers of its own, `spec.md` §4.3) but still drive the
    /// loop so a future liveness check has somewhere to live.
    pub fn run(&mut self, events: &mut EventSource) -> ! {
        loop {
            match events.next_event() {
                Event::Packet { source, record } => {
                    log::trace!("received {:?} from {source}", record.tag());
                    if let Some(reply) = self.handle(record) {
                        if let Err(e) = events.channel().send(&reply) {
                            log::warn!("failed to send reply: {e}");
                        }
                    }
                }
                Event::Heartbeat => {}
            }
        }
    }
}
