//! message relay between parties
//!
//! the relay routes envelopes by phone number and nothing else; it sees
//! only ciphertext. [`MemoryRelay`] is an in-process queue used by the
//! simulator and tests.

use std::collections::VecDeque;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::codec::{Decode, Encode, Reader, Writer};
use crate::user::User;
use crate::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageType {
    PairingResponse,
    PairingAck,
    KeepAliveRequest,
    KeepAliveResponse,
    LockboxShareRetrievalRequest,
    LockboxShareRetrievalResponse,
    LockboxShareInfoRequest,
    LockboxShareInfoUpdate,
}

impl MessageType {
    pub fn tag(self) -> u8 {
        match self {
            MessageType::PairingResponse => 0,
            MessageType::PairingAck => 1,
            MessageType::KeepAliveRequest => 2,
            MessageType::KeepAliveResponse => 3,
            MessageType::LockboxShareRetrievalRequest => 4,
            MessageType::LockboxShareRetrievalResponse => 5,
            MessageType::LockboxShareInfoRequest => 6,
            MessageType::LockboxShareInfoUpdate => 7,
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self> {
        Ok(match tag {
            0 => MessageType::PairingResponse,
            1 => MessageType::PairingAck,
            2 => MessageType::KeepAliveRequest,
            3 => MessageType::KeepAliveResponse,
            4 => MessageType::LockboxShareRetrievalRequest,
            5 => MessageType::LockboxShareRetrievalResponse,
            6 => MessageType::LockboxShareInfoRequest,
            7 => MessageType::LockboxShareInfoUpdate,
            _ => return Err(Error::UnknownTag { kind: "message type", tag }),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    pub from_phone: String,
    pub to_phone: String,
    pub message_type: MessageType,
    /// empty for bare requests
    pub data: Vec<u8>,
}

impl Envelope {
    pub fn new(from_phone: &str, to_phone: &str, message_type: MessageType, data: Vec<u8>) -> Self {
        Self {
            from_phone: from_phone.to_string(),
            to_phone: to_phone.to_string(),
            message_type,
            data,
        }
    }
}

/// framing for relays that carry envelopes as bytes; data runs to the end
impl Encode for Envelope {
    fn encode(&self, w: &mut Writer) -> Result<()> {
        w.put_str(&self.from_phone)?;
        w.put_str(&self.to_phone)?;
        w.put_u8(self.message_type.tag());
        w.put_raw(&self.data);
        Ok(())
    }
}

impl Decode for Envelope {
    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            from_phone: r.string()?,
            to_phone: r.string()?,
            message_type: MessageType::from_tag(r.u8()?)?,
            data: r.rest().to_vec(),
        })
    }
}

/// transport for envelopes; delivery is best effort
pub trait Relay: Send + Sync {
    /// make `user` reachable at their phone
    fn register(&self, user: &User);

    fn send(&self, envelope: Envelope);
}

#[derive(Debug, Default)]
struct Bus {
    registered: HashSet<String>,
    queue: VecDeque<Envelope>,
    sent: Vec<(MessageType, String, String)>,
}

/// in-process relay; clones share one bus
#[derive(Clone, Debug, Default)]
pub struct MemoryRelay {
    bus: Arc<Mutex<Bus>>,
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// next envelope awaiting delivery
    pub fn pop(&self) -> Option<Envelope> {
        self.bus.lock().ok()?.queue.pop_front()
    }

    pub fn pending(&self) -> usize {
        self.bus.lock().map(|b| b.queue.len()).unwrap_or(0)
    }

    /// how many envelopes of a type were accepted for delivery so far
    pub fn sent_count(&self, message_type: MessageType) -> usize {
        self.bus
            .lock()
            .map(|b| b.sent.iter().filter(|(t, _, _)| *t == message_type).count())
            .unwrap_or(0)
    }

    /// sent count of a type from one phone to another
    pub fn sent_between(&self, message_type: MessageType, from: &str, to: &str) -> usize {
        self.bus
            .lock()
            .map(|b| {
                b.sent
                    .iter()
                    .filter(|(t, f, d)| *t == message_type && f == from && d == to)
                    .count()
            })
            .unwrap_or(0)
    }
}

impl Relay for MemoryRelay {
    fn register(&self, user: &User) {
        if let Ok(mut bus) = self.bus.lock() {
            bus.registered.insert(user.phone.clone());
        }
    }

    fn send(&self, envelope: Envelope) {
        let Ok(mut bus) = self.bus.lock() else {
            return;
        };
        if !bus.registered.contains(&envelope.to_phone) {
            debug!("dropping {:?} to unregistered {}", envelope.message_type, envelope.to_phone);
            return;
        }
        bus.sent.push((
            envelope.message_type,
            envelope.from_phone.clone(),
            envelope.to_phone.clone(),
        ));
        bus.queue.push_back(envelope);
    }
}
