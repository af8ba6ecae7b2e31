use std::sync::{
    atomic::{AtomicU64, AtomicUsize, Ordering},
    mpsc::{channel, Receiver, Sender},
    Arc,
};

use log::warn;

pub const DEFAULT_EVENT_QUEUE_DEPTH: usize = 16;

/// Something the BLE stack reported. Produced on the stack's context, consumed
/// by the control loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    Connected { conn_handle: u16, address: String },
    Disconnected { conn_handle: u16, reason: i32 },
    AuthenticationComplete { conn_handle: u16, encrypted: bool },
    CommandWritten(Vec<u8>),
    MtuChanged { conn_handle: u16, mtu: u16 },
}

impl BridgeEvent {
    /// Connection lifecycle events are never dropped; losing one would leave
    /// the session out of step with the stack.
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            Self::Connected { .. } | Self::Disconnected { .. } | Self::AuthenticationComplete { .. }
        )
    }
}

#[derive(Debug, Clone)]
pub struct EventSender {
    tx: Sender<BridgeEvent>,
    pending: Arc<AtomicUsize>,
    depth: usize,
    dropped: Arc<AtomicU64>,
}

impl EventSender {
    /// Never blocks. Returns false when the event was dropped.
    ///
    /// At most `depth` writes and MTU updates wait in the queue at once;
    /// lifecycle events always get through.
    pub fn push(&self, event: BridgeEvent) -> bool {
        let bounded = !event.is_lifecycle();
        if bounded && !self.reserve() {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            warn!("event queue full, dropping {event:?} ({dropped} dropped so far)");
            return false;
        }

        if self.tx.send(event).is_err() {
            if bounded {
                self.pending.fetch_sub(1, Ordering::AcqRel);
            }
            warn!("event queue closed");
            return false;
        }
        true
    }

    fn reserve(&self) -> bool {
        self.pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |pending| {
                (pending < self.depth).then_some(pending + 1)
            })
            .is_ok()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[derive(Debug)]
pub struct EventReceiver {
    rx: Receiver<BridgeEvent>,
    pending: Arc<AtomicUsize>,
}

impl EventReceiver {
    pub fn drain(&self) -> Vec<BridgeEvent> {
        let events: Vec<BridgeEvent> = self.rx.try_iter().collect();
        let bounded = events.iter().filter(|event| !event.is_lifecycle()).count();
        if bounded > 0 {
            self.pending.fetch_sub(bounded, Ordering::AcqRel);
        }
        events
    }
}

pub fn event_queue(depth: usize) -> (EventSender, EventReceiver) {
    let (tx, rx) = channel();
    let pending = Arc::new(AtomicUsize::new(0));
    (
        EventSender {
            tx,
            pending: pending.clone(),
            depth: depth.max(1),
            dropped: Arc::new(AtomicU64::new(0)),
        },
        EventReceiver { rx, pending },
    )
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        bridge::{BridgeAction, BridgeEngine},
        config::RuntimeConfig,
        session::SessionAction,
    };

    fn write(payload: &str) -> BridgeEvent {
        BridgeEvent::CommandWritten(payload.as_bytes().to_vec())
    }

    #[test]
    fn drains_in_arrival_order() {
        let (tx, rx) = event_queue(DEFAULT_EVENT_QUEUE_DEPTH);
        tx.push(BridgeEvent::Connected {
            conn_handle: 1,
            address: "aa".to_string(),
        });
        tx.push(write("MODE:off"));

        assert_eq!(
            rx.drain(),
            vec![
                BridgeEvent::Connected {
                    conn_handle: 1,
                    address: "aa".to_string(),
                },
                write("MODE:off"),
            ]
        );
        assert!(rx.drain().is_empty());
    }

    #[test]
    fn full_queue_drops_newest_writes() {
        let (tx, rx) = event_queue(2);
        let producer = tx.clone();

        assert!(tx.push(write("1")));
        assert!(producer.push(write("2")));
        assert!(!producer.push(write("3")));
        assert!(!producer.push(BridgeEvent::MtuChanged {
            conn_handle: 1,
            mtu: 185,
        }));

        assert_eq!(tx.dropped(), 2);
        assert_eq!(rx.drain().len(), 2);
        assert!(tx.push(write("4")));
    }

    #[test]
    fn lifecycle_events_pass_a_full_queue_in_order() {
        let (tx, rx) = event_queue(2);
        assert!(tx.push(write("1")));
        assert!(tx.push(write("2")));
        assert!(tx.push(BridgeEvent::AuthenticationComplete {
            conn_handle: 1,
            encrypted: false,
        }));
        assert!(tx.push(BridgeEvent::Disconnected {
            conn_handle: 1,
            reason: 0x13,
        }));

        let events = rx.drain();
        assert_eq!(events.len(), 4);
        assert_eq!(events[1], write("2"));
        assert_eq!(
            events[3],
            BridgeEvent::Disconnected {
                conn_handle: 1,
                reason: 0x13,
            }
        );
        assert_eq!(tx.dropped(), 0);
    }

    #[test]
    fn disconnect_after_write_burst_restarts_advertising() {
        let (tx, rx) = event_queue(DEFAULT_EVENT_QUEUE_DEPTH);
        let mut engine = BridgeEngine::new(&RuntimeConfig::default(), 0);
        engine.handle_event(
            BridgeEvent::Connected {
                conn_handle: 1,
                address: "peer".to_string(),
            },
            0,
        );

        for round in 0..DEFAULT_EVENT_QUEUE_DEPTH + 4 {
            tx.push(write(&format!("TEMP:{};MODE:COOL;", 16 + round % 10)));
        }
        assert!(tx.push(BridgeEvent::Disconnected {
            conn_handle: 1,
            reason: 0x13,
        }));

        let mut actions = Vec::new();
        for event in rx.drain() {
            actions.extend(engine.handle_event(event, 1_000));
        }

        assert!(!engine.session().is_connected());
        assert_eq!(
            actions.last(),
            Some(&BridgeAction::Session(SessionAction::RestartAdvertising))
        );
        assert_eq!(tx.dropped(), 4);
    }

    #[test]
    fn push_after_receiver_dropped_fails() {
        let (tx, rx) = event_queue(4);
        drop(rx);
        assert!(!tx.push(BridgeEvent::MtuChanged {
            conn_handle: 0,
            mtu: 185,
        }));
        assert!(!tx.push(BridgeEvent::Disconnected {
            conn_handle: 0,
            reason: 0,
        }));
    }
}
