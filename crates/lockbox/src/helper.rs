//! helper records: one per trusted contact
//!
//! the serialized form carries identity, pairing state, the peer's mode
//! and the session. liveness and the share a peer entrusted to us are
//! runtime state: they are refreshed over the relay and never nested
//! inside our own lockbox.

use crate::codec::{Decode, Encode, Reader, Writer};
use crate::handshake::{HandshakePacket, PairingRequest};
use crate::session::PairingSession;
use crate::user::{OperatingMode, User};
use crate::{Error, Result};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum HelperState {
    #[default]
    Pending,
    Paired,
}

impl HelperState {
    pub fn tag(self) -> u8 {
        match self {
            HelperState::Pending => 0,
            HelperState::Paired => 1,
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(HelperState::Pending),
            1 => Ok(HelperState::Paired),
            _ => Err(Error::UnknownTag { kind: "helper state", tag }),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Helper {
    pub user: User,
    /// last known operating mode of the peer
    pub operating_mode: OperatingMode,
    pub state: HelperState,
    pub session: PairingSession,
    /// share of the peer's lockbox that we hold for them
    pub lockbox_share: Vec<u8>,
    pub lockbox_share_timestamp: Option<u64>,
    pub in_sync: bool,
    /// seconds; zero until the first successful contact
    pub last_sync_time: u64,
    /// set on the placeholder while our own request is displayed
    pub(crate) pairing_request: Option<PairingRequest>,
    /// response from a recovering peer awaiting operator confirmation
    pub(crate) recovering_response: Option<HandshakePacket>,
}

impl Helper {
    pub fn new(user: User, operating_mode: OperatingMode) -> Self {
        Self {
            user,
            operating_mode,
            state: HelperState::Pending,
            session: PairingSession::new(),
            lockbox_share: Vec::new(),
            lockbox_share_timestamp: None,
            in_sync: false,
            last_sync_time: 0,
            pairing_request: None,
            recovering_response: None,
        }
    }

    /// fresh record for an in-flight pairing
    pub fn pairing_placeholder(operating_mode: OperatingMode) -> Self {
        Self::new(User::pairing_placeholder(), operating_mode)
    }

    /// rebuild a helper recovered from a lockbox; the session key is
    /// re-derived from the stored keys and peer key
    pub fn restored(recovered: &Helper) -> Result<Self> {
        let session = &recovered.session;
        let mut helper = Self::new(recovered.user.clone(), recovered.operating_mode);
        helper.state = recovered.state;
        helper.session = PairingSession::restore(session.keys().clone(), *session.iv(), session.peer_public_key())?;
        Ok(helper)
    }

    pub fn phone(&self) -> &str {
        &self.user.phone
    }

    pub fn name(&self) -> &str {
        &self.user.name
    }

    pub fn is_paired(&self) -> bool {
        self.state == HelperState::Paired
    }

    pub fn is_placeholder(&self) -> bool {
        self.user.is_placeholder()
    }

    pub fn mark_synced(&mut self, now_secs: u64) {
        self.in_sync = true;
        self.last_sync_time = now_secs;
    }

    pub fn set_lockbox_share(&mut self, share: Vec<u8>, now_millis: u64) {
        self.lockbox_share = share;
        self.lockbox_share_timestamp = Some(now_millis);
    }

    /// copy the retained peer share from a record being replaced
    pub fn inherit_share(&mut self, old: &Helper) {
        self.lockbox_share = old.lockbox_share.clone();
        self.lockbox_share_timestamp = old.lockbox_share_timestamp;
    }

    /// equality over the persisted fields
    pub fn same_record(&self, other: &Helper) -> bool {
        self.user == other.user
            && self.state == other.state
            && self.operating_mode == other.operating_mode
            && self.session == other.session
    }
}

impl Encode for Helper {
    fn encode(&self, w: &mut Writer) -> Result<()> {
        w.put(&self.user)?;
        w.put_u8(self.state.tag());
        w.put(&self.session)?;
        w.put_u8(self.operating_mode.tag());
        Ok(())
    }
}

impl Decode for Helper {
    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        let user: User = r.get()?;
        let state = HelperState::from_tag(r.u8()?)?;
        let session: PairingSession = r.get()?;
        let operating_mode = OperatingMode::from_tag(r.u8()?)?;
        let mut helper = Self::new(user, operating_mode);
        helper.state = state;
        helper.session = session;
        Ok(helper)
    }
}
