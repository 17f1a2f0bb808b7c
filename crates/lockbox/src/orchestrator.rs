//! orchestrator: the single owner of one local identity
//!
//! holds the user, vault, helpers and lockbox engine, and turns the two
//! external event sources (relay messages and the periodic tick) plus
//! operator commands into state changes and outbound envelopes. every
//! handler runs to completion over in-memory state before returning.
//!
//! pairing, from the requester's side (the one showing qr codes):
//!
//! ```text
//! start_pairing_process -> qr codes -> [peer scans]
//!   <- PairingResponse  (peer iv, peer key, sealed handshake packet)
//!   -> PairingAck       requester is Paired
//!                       responder is Paired once the ack decrypts
//! ```

use std::sync::Arc;

use rand::Rng;
use tracing::{debug, info, warn};

use crate::account::{Account, Vault};
use crate::callbacks::{Notification, OperatorCallbacks};
use crate::clock::Clock;
use crate::codec::{Encode, MAX_FIELD_LEN};
use crate::config::Config;
use crate::handshake::{
    self, AcceptedRequest, HandshakePacket, PairingRequest, RequestAccumulator, PAIRING_ACK,
};
use crate::helper::{Helper, HelperState};
use crate::keys::KeyPair;
use crate::lockbox::{LockboxEngine, RecoveredLockbox};
use crate::policy::{self, PolicyEvent};
use crate::relay::{Envelope, MessageType, Relay};
use crate::storage::KeyValueStore;
use crate::user::{normalize_phone, OperatingMode, PauseMode, User, PAIRING_PLACEHOLDER_PHONE};
use crate::{Error, Result};

/// external services an orchestrator talks to
#[derive(Clone)]
pub struct Collaborators {
    pub relay: Arc<dyn Relay>,
    pub store: Arc<dyn KeyValueStore>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum StorageAction {
    Persist,
    Reset,
}

pub struct Orchestrator {
    user: User,
    config: Config,
    operating_mode: OperatingMode,
    pause_mode: PauseMode,
    vault: Vault,
    helpers: Vec<Helper>,
    lockbox: LockboxEngine,
    scanned: RequestAccumulator,
    notifications: Vec<Notification>,
    storage_pending: Option<StorageAction>,
    relay: Arc<dyn Relay>,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    callbacks: OperatorCallbacks,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("user", &self.user)
            .field("operating_mode", &self.operating_mode)
            .field("pause_mode", &self.pause_mode)
            .field("accounts", &self.vault.len())
            .field("helpers", &self.helpers.len())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// validates the config and registers the user with the relay
    pub fn new(user: User, config: Config, collaborators: Collaborators, callbacks: OperatorCallbacks) -> Result<Self> {
        config.validate()?;
        let Collaborators { relay, store, clock } = collaborators;
        relay.register(&user);
        info!("orchestrator ready for {} ({})", user.name, user.phone);

        Ok(Self {
            scanned: RequestAccumulator::new(config.pairing_consecutive_counters),
            user,
            config,
            operating_mode: OperatingMode::Normal,
            pause_mode: PauseMode::Active,
            vault: Vault::new(),
            helpers: Vec::new(),
            lockbox: LockboxEngine::new(),
            notifications: Vec::new(),
            storage_pending: None,
            relay,
            store,
            clock,
            callbacks,
        })
    }

    // === accessors ===

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn operating_mode(&self) -> OperatingMode {
        self.operating_mode
    }

    pub fn pause_mode(&self) -> PauseMode {
        self.pause_mode
    }

    pub fn vault(&self) -> &Vault {
        &self.vault
    }

    pub fn helpers(&self) -> &[Helper] {
        &self.helpers
    }

    pub fn helper(&self, phone: &str) -> Option<&Helper> {
        let phone = normalize_phone(phone);
        self.helpers.iter().find(|h| h.phone() == phone)
    }

    pub fn lockbox(&self) -> &LockboxEngine {
        &self.lockbox
    }

    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }

    pub fn can_protect(&self) -> bool {
        policy::can_protect(&self.helpers, self.config.min_helpers)
    }

    // === operator commands ===

    /// entering recovery discards the lockbox secret; storage is wiped on
    /// the next flush
    pub fn set_operating_mode(&mut self, mode: OperatingMode) {
        if mode == OperatingMode::Recovery {
            self.lockbox.regenerate();
            self.storage_pending = Some(StorageAction::Reset);
        }
        info!("{} operating mode {:?}", self.user.name, mode);
        self.operating_mode = mode;
        self.callbacks.state_changed();
    }

    pub fn toggle_pause_mode(&mut self) -> PauseMode {
        self.pause_mode = self.pause_mode.toggled();
        info!("{} now {:?}", self.user.name, self.pause_mode);
        self.callbacks.state_changed();
        self.pause_mode
    }

    pub fn delete_notification(&mut self, ts: u64) {
        self.notifications.retain(|n| n.ts != ts);
        self.callbacks.state_changed();
    }

    pub fn delete_all_notifications(&mut self) {
        self.notifications.clear();
        self.callbacks.state_changed();
    }

    /// returns the new account's id
    pub fn add_account(&mut self, name: &str, account_id: &str, network: &str, key: KeyPair) -> Result<String> {
        let account = Account::new(name, account_id, network, key, self.clock.now_millis());
        self.insert_account(account)
    }

    /// the vault is only touched once the account is known to fit the
    /// lockbox wire format
    fn insert_account(&mut self, account: Account) -> Result<String> {
        account.serialize()?;
        if self.vault.len() >= MAX_FIELD_LEN {
            return Err(Error::FieldTooLong {
                len: self.vault.len() + 1,
            });
        }
        let id = account.id.clone();
        let name = account.name.clone();
        if !self.vault.add(account) {
            return Err(Error::DuplicateAccount(id));
        }
        debug!("added account {} ({})", name, id);
        self.apply_policy(PolicyEvent::AccountAdded { name })?;
        self.callbacks.state_changed();
        Ok(id)
    }

    pub fn remove_account(&mut self, id: &str) -> Result<bool> {
        if self.vault.remove(id).is_none() {
            return Ok(false);
        }
        self.apply_policy(PolicyEvent::AccountRemoved)?;
        self.callbacks.state_changed();
        Ok(true)
    }

    pub fn remove_helper(&mut self, phone: &str) -> Result<bool> {
        let Some(idx) = self.helper_index(&normalize_phone(phone)) else {
            return Ok(false);
        };
        let removed = self.helpers.remove(idx);
        info!("removed helper {} ({})", removed.name(), removed.phone());
        if !removed.is_placeholder() {
            self.apply_policy(PolicyEvent::HelperRemoved {
                name: removed.user.name,
            })?;
        }
        self.callbacks.state_changed();
        Ok(true)
    }

    // === storage ===

    /// adopt the persisted lockbox secret (normal mode) or wipe storage
    /// and store a fresh one (recovery mode)
    pub async fn load_lockbox_secret(&mut self) -> Result<()> {
        if self.operating_mode == OperatingMode::Recovery {
            self.lockbox.reset_storage(self.store.as_ref()).await?;
        } else {
            let outcome = self.lockbox.load_or_generate(self.store.as_ref()).await?;
            debug!("lockbox secret load: {:?}", outcome);
        }
        self.storage_pending = None;
        Ok(())
    }

    pub fn needs_storage_flush(&self) -> bool {
        self.storage_pending.is_some()
    }

    /// write out secret changes made by synchronous handlers
    pub async fn flush_storage(&mut self) -> Result<()> {
        match self.storage_pending.take() {
            Some(StorageAction::Persist) => self.lockbox.persist(self.store.as_ref()).await,
            Some(StorageAction::Reset) => self.lockbox.reset_storage(self.store.as_ref()).await,
            None => Ok(()),
        }
    }

    // === pairing ===

    /// replace any previous placeholder and return the qr codes to show
    pub fn start_pairing_process(&mut self) -> Result<Vec<String>> {
        self.helpers.retain(|h| h.phone() != PAIRING_PLACEHOLDER_PHONE);
        self.scanned.reset();

        let mut placeholder = Helper::pairing_placeholder(self.operating_mode);
        let request = PairingRequest::generate(
            &self.user,
            self.operating_mode,
            placeholder.session.public_key(),
            self.config.pairing_num_counters,
            self.config.qr_min_len,
        )?;
        let codes = request.qr_codes();
        placeholder.pairing_request = Some(request);
        self.helpers.push(placeholder);

        info!("{} started pairing ({} qr codes)", self.user.name, codes.len());
        self.callbacks.state_changed();
        Ok(codes)
    }

    /// qr codes of the pairing in progress, if any
    pub fn pairing_qr_codes(&self) -> Vec<String> {
        self.placeholder_index()
            .and_then(|idx| self.helpers[idx].pairing_request.as_ref())
            .map(PairingRequest::qr_codes)
            .unwrap_or_default()
    }

    /// feed one scanned qr chunk. returns true once a request was accepted
    /// and answered. unreadable or stray chunks are ignored.
    pub fn handle_scanned_qr_code(&mut self, text: &str) -> Result<bool> {
        let packet = match handshake::decode_qr_chunk(text).and_then(|bytes| HandshakePacket::parse(&bytes)) {
            Ok(packet) => packet,
            Err(e) => {
                debug!("ignoring unreadable qr chunk: {}", e);
                return Ok(false);
            }
        };
        if normalize_phone(&packet.phone) == self.user.phone {
            debug!("ignoring our own qr chunk");
            return Ok(false);
        }
        match self.scanned.push(packet) {
            Some(AcceptedRequest { packet, counters }) => {
                debug!("accepted pairing request from {} (counters {:?})", packet.phone, counters);
                self.handle_new_helper_pairing_request(&packet)
            }
            None => Ok(false),
        }
    }

    /// answer an accepted pairing request from the scanned peer
    pub fn handle_new_helper_pairing_request(&mut self, request: &HandshakePacket) -> Result<bool> {
        let Some(idx) = self.placeholder_index() else {
            debug!("no pairing in progress, ignoring request from {}", request.phone);
            return Ok(false);
        };
        if !self.admit_peer(request) {
            self.callbacks.state_changed();
            return Ok(false);
        }
        if let Err(e) = self.helpers[idx].session.set_peer_public_key(&request.public_key) {
            warn!("pairing request from {} has unusable key: {}", request.phone, e);
            return Ok(false);
        }
        let Some(idx) = self.adopt_peer(request) else {
            return Ok(false);
        };

        let nonces: Vec<u8> = {
            let mut rng = rand::thread_rng();
            (0..request.nonces.len().max(1)).map(|_| rng.gen()).collect()
        };
        let helper = &self.helpers[idx];
        let reply = HandshakePacket::new(
            request.counter,
            nonces,
            self.operating_mode,
            &self.user,
            helper.session.public_key(),
        );
        let sealed = helper.session.encrypt(&reply.encode(0)?)?;
        let payload = handshake::encode_response(helper.session.iv(), helper.session.public_key(), &sealed)?;
        let phone = helper.phone().to_string();
        self.send(&phone, MessageType::PairingResponse, payload);

        info!("{} answered pairing request from {}", self.user.name, phone);
        self.callbacks.state_changed();
        Ok(true)
    }

    /// complete a pairing held back because the peer declared recovery
    pub fn confirm_pairing_with_recovering_peer(&mut self) -> Result<bool> {
        let Some(packet) = self
            .placeholder_index()
            .and_then(|idx| self.helpers[idx].recovering_response.take())
        else {
            return Ok(false);
        };
        self.complete_requester_pairing(&packet)?;
        self.callbacks.state_changed();
        Ok(true)
    }

    pub fn reject_pairing_with_recovering_peer(&mut self) {
        if let Some(idx) = self.placeholder_index() {
            if let Some(packet) = self.helpers[idx].recovering_response.take() {
                info!("rejected recovering peer {}", packet.phone);
            }
        }
        self.callbacks.state_changed();
    }

    fn handle_pairing_response(&mut self, envelope: &Envelope) -> Result<()> {
        let Some(idx) = self.placeholder_index() else {
            debug!("no pairing in progress, dropping response from {}", envelope.from_phone);
            return Ok(());
        };
        let placeholder = &self.helpers[idx];
        let Some(request) = placeholder.pairing_request.as_ref() else {
            debug!("placeholder has no displayed request, dropping response");
            return Ok(());
        };
        let frame = match handshake::parse_response(&envelope.data) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("malformed pairing response from {}: {}", envelope.from_phone, e);
                return Ok(());
            }
        };

        // work on a copy so a bad response leaves the placeholder untouched
        let mut session = placeholder.session.clone();
        if let Err(e) = session.set_iv(frame.iv).and_then(|_| session.set_peer_public_key(frame.public_key)) {
            warn!("pairing response from {} has unusable keys: {}", envelope.from_phone, e);
            return Ok(());
        }
        let plaintext = session.decrypt(frame.ciphertext)?;
        if plaintext.is_empty() {
            warn!("pairing response from {} did not decrypt", envelope.from_phone);
            return Ok(());
        }
        let packet = match HandshakePacket::parse(&plaintext) {
            Ok(packet) => packet,
            Err(e) => {
                warn!("pairing response from {} unreadable: {}", envelope.from_phone, e);
                return Ok(());
            }
        };
        if !request.contains_counter(packet.counter) {
            warn!("pairing response from {} names counter {} we never showed", envelope.from_phone, packet.counter);
            return Ok(());
        }

        self.helpers[idx].session = session;
        if packet.operating_mode == OperatingMode::Recovery {
            info!("{} is recovering, awaiting confirmation", packet.name);
            self.helpers[idx].recovering_response = Some(packet.clone());
            self.callbacks.confirm_pairing_with_recovering_peer(&packet);
            return Ok(());
        }
        self.complete_requester_pairing(&packet)
    }

    fn complete_requester_pairing(&mut self, packet: &HandshakePacket) -> Result<()> {
        let Some(placeholder) = self.placeholder_index() else {
            return Ok(());
        };
        // sealed before any record changes
        let ack = self.helpers[placeholder].session.encrypt(&PAIRING_ACK)?;
        if !self.admit_peer(packet) {
            return Ok(());
        }
        let Some(idx) = self.adopt_peer(packet) else {
            return Ok(());
        };
        let helper = &mut self.helpers[idx];
        helper.state = HelperState::Paired;
        helper.pairing_request = None;
        info!("{} paired with {} ({})", self.user.name, helper.name(), helper.phone());

        self.callbacks.pairing_handshake_response_matched();
        let phone = self.helpers[idx].phone().to_string();
        self.send(&phone, MessageType::PairingAck, ack);
        self.pairing_successful(idx)
    }

    fn on_pairing_ack(&mut self, idx: usize, plaintext: &[u8]) -> Result<()> {
        if self.helpers[idx].is_paired() {
            debug!("duplicate ack from {}", self.helpers[idx].phone());
            return Ok(());
        }
        if !handshake::is_valid_ack(plaintext) {
            warn!("invalid ack from {}", self.helpers[idx].phone());
            return Ok(());
        }
        let helper = &mut self.helpers[idx];
        helper.state = HelperState::Paired;
        helper.pairing_request = None;
        info!("{} paired with {} ({})", self.user.name, helper.name(), helper.phone());
        self.pairing_successful(idx)
    }

    fn pairing_successful(&mut self, idx: usize) -> Result<()> {
        let now = self.clock.now_secs();
        let helper = &mut self.helpers[idx];
        helper.mark_synced(now);
        let name = helper.name().to_string();
        let phone = helper.phone().to_string();

        self.apply_policy(PolicyEvent::HelperPaired { name })?;
        if self.operating_mode == OperatingMode::Recovery {
            debug!("asking {} for our lockbox share", phone);
            self.send(&phone, MessageType::LockboxShareRetrievalRequest, Vec::new());
        }
        Ok(())
    }

    /// a peer declaring recovery must already be one of our helpers
    fn admit_peer(&mut self, peer: &HandshakePacket) -> bool {
        if peer.operating_mode != OperatingMode::Recovery {
            return true;
        }
        let phone = normalize_phone(&peer.phone);
        if self.helper_index(&phone).is_some() {
            return true;
        }
        warn!("unknown peer {} ({}) tried to recover", peer.name, phone);
        self.notify(
            "Recovery attempt failed",
            &format!("Previously unpaired User {} is trying to recover", peer.name),
        );
        false
    }

    /// turn the placeholder into the record for `peer`, replacing any
    /// older record with the same phone. a recovering peer keeps the share
    /// we held for it.
    fn adopt_peer(&mut self, peer: &HandshakePacket) -> Option<usize> {
        let phone = normalize_phone(&peer.phone);
        self.placeholder_index()?;
        let old = self.helper_index(&phone).map(|i| self.helpers.remove(i));
        let idx = self.placeholder_index()?;
        let helper = &mut self.helpers[idx];
        if let Some(old) = old {
            if peer.operating_mode == OperatingMode::Recovery {
                helper.inherit_share(&old);
            }
            debug!("replacing helper record for {}", phone);
        }
        helper.user = User::new(peer.name.clone(), &phone);
        helper.operating_mode = peer.operating_mode;
        Some(idx)
    }

    // === messages ===

    /// process one relay envelope to completion
    pub fn handle_message(&mut self, envelope: &Envelope) -> Result<()> {
        if envelope.to_phone != self.user.phone {
            debug!("dropping envelope addressed to {}", envelope.to_phone);
            return Ok(());
        }
        if envelope.message_type == MessageType::PairingResponse {
            self.handle_pairing_response(envelope)?;
            self.callbacks.state_changed();
            return Ok(());
        }

        let Some(idx) = self.helper_index(&envelope.from_phone) else {
            debug!("dropping {:?} from unknown {}", envelope.message_type, envelope.from_phone);
            return Ok(());
        };
        if !self.helpers[idx].session.has_session_key() {
            warn!("dropping {:?} from {}: no session yet", envelope.message_type, envelope.from_phone);
            return Ok(());
        }
        let plaintext = if envelope.data.is_empty() {
            Vec::new()
        } else {
            let plaintext = self.helpers[idx].session.decrypt(&envelope.data)?;
            if plaintext.is_empty() {
                warn!("dropping {:?} from {}: did not decrypt", envelope.message_type, envelope.from_phone);
                return Ok(());
            }
            plaintext
        };

        match envelope.message_type {
            MessageType::PairingResponse => {}
            MessageType::PairingAck => self.on_pairing_ack(idx, &plaintext)?,
            MessageType::KeepAliveRequest => {
                if self.pause_mode == PauseMode::Active {
                    self.send(&envelope.from_phone, MessageType::KeepAliveResponse, Vec::new());
                }
            }
            MessageType::KeepAliveResponse => self.on_keepalive_response(idx)?,
            MessageType::LockboxShareRetrievalRequest => {
                if self.helpers[idx].lockbox_share.is_empty() {
                    debug!("no share held for {}", envelope.from_phone);
                } else {
                    let share = self.helpers[idx].lockbox_share.clone();
                    self.send_sealed(idx, MessageType::LockboxShareRetrievalResponse, &share)?;
                }
            }
            MessageType::LockboxShareRetrievalResponse => {
                if self.operating_mode != OperatingMode::Recovery {
                    debug!("not recovering, ignoring share from {}", envelope.from_phone);
                } else if !plaintext.is_empty() {
                    let phone = self.helpers[idx].phone().to_string();
                    if let Some(recovered) = self.lockbox.store_retrieved_share_and_attempt_recovery(&phone, plaintext) {
                        self.recovery_successful(recovered)?;
                    }
                }
            }
            MessageType::LockboxShareInfoRequest => {
                self.distribute_lockbox()?;
            }
            MessageType::LockboxShareInfoUpdate => {
                if !plaintext.is_empty() {
                    let now = self.clock.now_millis();
                    let helper = &mut self.helpers[idx];
                    helper.set_lockbox_share(plaintext, now);
                    if helper.operating_mode == OperatingMode::Recovery {
                        helper.operating_mode = OperatingMode::Normal;
                    }
                    debug!("holding {} byte share for {}", helper.lockbox_share.len(), helper.phone());
                }
            }
        }
        self.callbacks.state_changed();
        Ok(())
    }

    fn on_keepalive_response(&mut self, idx: usize) -> Result<()> {
        let now = self.clock.now_secs();
        let helper = &mut self.helpers[idx];
        if !helper.is_paired() {
            return Ok(());
        }
        let was_in_sync = helper.in_sync;
        let previously_synced = helper.last_sync_time != 0;
        helper.mark_synced(now);
        if !was_in_sync {
            info!("sync achieved with {}", helper.phone());
            let name = helper.name().to_string();
            self.apply_policy(PolicyEvent::SyncRestored { name, previously_synced })?;
        }
        Ok(())
    }

    // === liveness ===

    /// send keepalives and expire helpers that went quiet
    pub fn handle_periodic_tasks(&mut self) -> Result<()> {
        let now = self.clock.now_secs();

        if self.pause_mode == PauseMode::Active {
            let targets: Vec<String> = self
                .helpers
                .iter()
                .filter(|h| h.is_paired() && !h.is_placeholder())
                .map(|h| h.phone().to_string())
                .collect();
            for phone in targets {
                self.send(&phone, MessageType::KeepAliveRequest, Vec::new());
            }
        }

        let timeout = self.config.keepalive_timeout_secs;
        let mut lost = Vec::new();
        for helper in self.helpers.iter_mut().filter(|h| h.is_paired() && !h.is_placeholder()) {
            let fresh = helper.last_sync_time != 0 && now.saturating_sub(helper.last_sync_time) < timeout;
            if helper.in_sync && !fresh {
                helper.in_sync = false;
                warn!("sync lost with {}", helper.phone());
                lost.push(helper.name().to_string());
            }
        }
        for name in lost {
            self.apply_policy(PolicyEvent::SyncLost { name })?;
        }
        self.callbacks.state_changed();
        Ok(())
    }

    // === lockbox ===

    /// split and send the lockbox. only in normal mode, and only when at
    /// least the configured minimum of helpers is paired.
    pub fn distribute_lockbox(&mut self) -> Result<usize> {
        if self.operating_mode != OperatingMode::Normal {
            debug!("recovering, not distributing");
            return Ok(0);
        }
        let deliveries = self.lockbox.distribute(&self.helpers, &self.vault, self.config.min_helpers)?;
        for delivery in &deliveries {
            self.send(&delivery.phone, MessageType::LockboxShareInfoUpdate, delivery.payload.clone());
        }
        if !deliveries.is_empty() {
            info!("{} distributed lockbox to {} helpers", self.user.name, deliveries.len());
        }
        Ok(deliveries.len())
    }

    fn recovery_successful(&mut self, recovered: RecoveredLockbox) -> Result<()> {
        let RecoveredLockbox { helpers, vault } = recovered;
        let mut peers = Vec::new();
        let mut restored = Vec::new();
        for record in &helpers {
            if record.is_placeholder() || record.phone() == self.user.phone {
                continue;
            }
            peers.push(record.phone().to_string());
            if self.helper_index(record.phone()).is_some() {
                continue;
            }
            match Helper::restored(record) {
                Ok(helper) => restored.push(helper),
                Err(e) => warn!("could not restore helper {}: {}", record.phone(), e),
            }
        }

        // everything fallible is done; commit
        for helper in restored {
            debug!("restored helper {} ({})", helper.name(), helper.phone());
            self.helpers.push(helper);
        }
        self.vault = vault;
        self.operating_mode = OperatingMode::Normal;
        self.storage_pending = Some(StorageAction::Persist);
        info!(
            "{} recovered {} accounts and {} helpers",
            self.user.name,
            self.vault.len(),
            self.helpers.len()
        );

        for phone in &peers {
            self.send(phone, MessageType::LockboxShareInfoRequest, Vec::new());
        }

        let accounts = self.vault.len();
        let body = format!(
            "Restored {} {}, and {} helpers!",
            accounts,
            if accounts == 1 { "account" } else { "accounts" },
            self.helpers.len()
        );
        self.notify("Recovery Successful", &body);
        self.distribute_lockbox()?;
        Ok(())
    }

    // === internals ===

    fn apply_policy(&mut self, event: PolicyEvent) -> Result<()> {
        let in_sync = policy::in_sync_paired_count(&self.helpers);
        let decision = policy::evaluate(&event, in_sync, self.config.min_helpers, self.operating_mode);
        if let Some(notice) = decision.notice {
            self.notify(&notice.title, &notice.body);
        }
        if decision.distribute {
            self.distribute_lockbox()?;
        }
        Ok(())
    }

    fn notify(&mut self, title: &str, body: &str) {
        info!("[{}] {}: {}", self.user.name, title, body);
        self.notifications.push(Notification {
            ts: self.clock.now_millis(),
            title: title.to_string(),
            body: body.to_string(),
        });
        self.callbacks.show_user_notification(title, body);
    }

    fn helper_index(&self, phone: &str) -> Option<usize> {
        self.helpers.iter().position(|h| h.phone() == phone)
    }

    fn placeholder_index(&self) -> Option<usize> {
        self.helper_index(PAIRING_PLACEHOLDER_PHONE)
    }

    fn send(&self, to: &str, message_type: MessageType, data: Vec<u8>) {
        self.relay.send(Envelope::new(&self.user.phone, to, message_type, data));
    }

    fn send_sealed(&self, idx: usize, message_type: MessageType, plaintext: &[u8]) -> Result<()> {
        let helper = &self.helpers[idx];
        let sealed = helper.session.encrypt(plaintext)?;
        self.send(helper.phone(), message_type, sealed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::relay::MemoryRelay;
    use crate::storage::MemoryStore;

    fn node(name: &str, phone: &str, relay: &MemoryRelay, clock: &ManualClock) -> Orchestrator {
        let collaborators = Collaborators {
            relay: Arc::new(relay.clone()),
            store: Arc::new(MemoryStore::new()),
            clock: Arc::new(clock.clone()),
        };
        Orchestrator::new(User::new(name, phone), Config::default(), collaborators, OperatorCallbacks::new()).unwrap()
    }

    fn deliver(relay: &MemoryRelay, nodes: &mut [&mut Orchestrator]) {
        while let Some(env) = relay.pop() {
            if let Some(n) = nodes.iter_mut().find(|n| n.user().phone == env.to_phone) {
                n.handle_message(&env).unwrap();
            }
        }
    }

    fn pair(relay: &MemoryRelay, requester: &mut Orchestrator, scanner: &mut Orchestrator) {
        let codes = requester.start_pairing_process().unwrap();
        scanner.start_pairing_process().unwrap();
        let mut answered = false;
        for code in &codes[..3] {
            answered |= scanner.handle_scanned_qr_code(code).unwrap();
        }
        assert!(answered);
        deliver(relay, &mut [requester, scanner]);
    }

    #[test]
    fn test_pairing_makes_both_sides_paired() {
        let relay = MemoryRelay::new();
        let clock = ManualClock::new(1_000_000);
        let mut gm = node("Grand Ma", "12345", &relay, &clock);
        let mut alice = node("Alice", "11", &relay, &clock);

        pair(&relay, &mut gm, &mut alice);

        let a = gm.helper("11").unwrap();
        assert!(a.is_paired() && a.in_sync);
        assert_eq!(a.name(), "Alice");
        let g = alice.helper("12345").unwrap();
        assert!(g.is_paired());
        assert_eq!(relay.sent_count(MessageType::PairingAck), 1);

        // both sides ended with exactly one record, no placeholder left on the requester
        assert_eq!(gm.helpers().len(), 1);
        assert_eq!(
            gm.notifications().last().unwrap().title,
            "Alice added as a helper - Vault is not protected!"
        );
    }

    #[test]
    fn test_replayed_ack_is_noop() {
        let relay = MemoryRelay::new();
        let clock = ManualClock::new(1_000_000);
        let mut gm = node("Grand Ma", "12345", &relay, &clock);
        let mut alice = node("Alice", "11", &relay, &clock);

        let codes = gm.start_pairing_process().unwrap();
        alice.start_pairing_process().unwrap();
        for code in &codes[2..5] {
            alice.handle_scanned_qr_code(code).unwrap();
        }
        let response = relay.pop().unwrap();
        gm.handle_message(&response).unwrap();
        let ack = relay.pop().unwrap();
        assert_eq!(ack.message_type, MessageType::PairingAck);

        alice.handle_message(&ack).unwrap();
        let notes = alice.notifications().len();
        alice.handle_message(&ack).unwrap();
        assert_eq!(alice.notifications().len(), notes);

        // a replayed response finds no placeholder on the requester
        gm.handle_message(&response).unwrap();
        assert_eq!(gm.helpers().len(), 1);
    }

    #[test]
    fn test_garbled_and_own_chunks_ignored() {
        let relay = MemoryRelay::new();
        let clock = ManualClock::new(0);
        let mut gm = node("Grand Ma", "12345", &relay, &clock);
        let codes = gm.start_pairing_process().unwrap();
        assert!(!gm.handle_scanned_qr_code("lowercase is not base45").unwrap());
        for code in &codes {
            assert!(!gm.handle_scanned_qr_code(code).unwrap());
        }
        assert_eq!(relay.pending(), 0);
    }

    #[test]
    fn test_tampered_response_changes_nothing() {
        let relay = MemoryRelay::new();
        let clock = ManualClock::new(0);
        let mut gm = node("Grand Ma", "12345", &relay, &clock);
        let mut alice = node("Alice", "11", &relay, &clock);

        let codes = gm.start_pairing_process().unwrap();
        alice.start_pairing_process().unwrap();
        for code in &codes[..3] {
            alice.handle_scanned_qr_code(code).unwrap();
        }
        let mut response = relay.pop().unwrap();
        let last = response.data.len() - 1;
        response.data[last] ^= 0xff;
        let before = gm.helpers()[0].session.clone();
        gm.handle_message(&response).unwrap();
        assert_eq!(gm.helpers()[0].session, before);
        assert!(!gm.helpers()[0].is_paired());
        assert_eq!(relay.pending(), 0);
    }

    #[test]
    fn test_unknown_recovering_peer_rejected() {
        let relay = MemoryRelay::new();
        let clock = ManualClock::new(0);
        let mut gm = node("Grand Ma", "12345", &relay, &clock);
        let mut stranger = node("Mallory", "666", &relay, &clock);
        stranger.set_operating_mode(OperatingMode::Recovery);

        let codes = stranger.start_pairing_process().unwrap();
        gm.start_pairing_process().unwrap();
        for code in &codes[..3] {
            assert!(!gm.handle_scanned_qr_code(code).unwrap());
        }
        let last = gm.notifications().last().unwrap();
        assert_eq!(last.title, "Recovery attempt failed");
        assert_eq!(last.body, "Previously unpaired User Mallory is trying to recover");
        assert_eq!(relay.pending(), 0);
    }

    #[test]
    fn test_keepalive_timeout_and_pause() {
        let relay = MemoryRelay::new();
        let clock = ManualClock::new(1_000_000);
        let mut gm = node("Grand Ma", "12345", &relay, &clock);
        let mut alice = node("Alice", "11", &relay, &clock);
        pair(&relay, &mut gm, &mut alice);

        alice.toggle_pause_mode();
        clock.advance(std::time::Duration::from_secs(11));
        gm.handle_periodic_tasks().unwrap();
        deliver(&relay, &mut [&mut gm, &mut alice]);

        assert!(!gm.helper("11").unwrap().in_sync);
        let last = gm.notifications().last().unwrap();
        assert_eq!(last.title, "Communication lost with Alice");
        assert_eq!(last.body, "Vault no longer protected!");

        alice.toggle_pause_mode();
        gm.handle_periodic_tasks().unwrap();
        deliver(&relay, &mut [&mut gm, &mut alice]);
        assert!(gm.helper("11").unwrap().in_sync);
        assert_eq!(gm.notifications().last().unwrap().title, "Communication restored with Alice");
    }

    #[test]
    fn test_notification_log() {
        let relay = MemoryRelay::new();
        let clock = ManualClock::new(10);
        let mut gm = node("Grand Ma", "12345", &relay, &clock);
        gm.add_account("Savings", "1abc", "polkadot", KeyPair::generate_ed25519()).unwrap();
        clock.advance(std::time::Duration::from_millis(5));
        let id = gm.add_account("Cold", "bc1q", "bitcoin", KeyPair::generate_ecdsa()).unwrap();
        assert_eq!(gm.notifications().len(), 2);
        assert_eq!(gm.notifications()[0].title, "Account (Savings) added");

        gm.delete_notification(10);
        assert_eq!(gm.notifications().len(), 1);
        assert!(gm.remove_account(&id).unwrap());
        assert!(!gm.remove_account(&id).unwrap());
        assert_eq!(gm.notifications().last().unwrap().title, "Account deleted");
        gm.delete_all_notifications();
        assert!(gm.notifications().is_empty());
    }

    #[test]
    fn test_oversized_account_leaves_vault_untouched() {
        let relay = MemoryRelay::new();
        let clock = ManualClock::new(1_000_000);
        let mut gm = node("Grand Ma", "12345", &relay, &clock);
        let mut alice = node("Alice", "11", &relay, &clock);
        let mut bob = node("Bob", "22", &relay, &clock);
        let mut carol = node("Carol", "33", &relay, &clock);
        pair(&relay, &mut gm, &mut alice);
        pair(&relay, &mut gm, &mut bob);
        pair(&relay, &mut gm, &mut carol);
        assert!(gm.can_protect());

        gm.add_account("Savings", "1abc", "polkadot", KeyPair::generate_ed25519()).unwrap();
        let sent = relay.sent_count(MessageType::LockboxShareInfoUpdate);
        let notes = gm.notifications().len();

        let err = gm
            .add_account(&"x".repeat(70_000), "1abc", "polkadot", KeyPair::generate_ed25519())
            .unwrap_err();
        assert!(matches!(err, Error::FieldTooLong { len: 70_000 }));
        assert_eq!(gm.vault().len(), 1);
        assert_eq!(gm.notifications().len(), notes);
        assert_eq!(relay.sent_count(MessageType::LockboxShareInfoUpdate), sent);

        // later accounts still get distributed
        gm.add_account("Cold", "bc1q", "bitcoin", KeyPair::generate_ecdsa()).unwrap();
        assert_eq!(gm.vault().len(), 2);
        assert_eq!(relay.sent_count(MessageType::LockboxShareInfoUpdate), sent + 3);
    }

    #[test]
    fn test_duplicate_account_id_rejected() {
        let relay = MemoryRelay::new();
        let clock = ManualClock::new(0);
        let mut gm = node("Grand Ma", "12345", &relay, &clock);
        let account = Account::new("Savings", "1abc", "polkadot", KeyPair::generate_ed25519(), 0);
        let id = gm.insert_account(account.clone()).unwrap();

        let err = gm.insert_account(account).unwrap_err();
        assert!(matches!(err, Error::DuplicateAccount(dup) if dup == id));
        assert_eq!(gm.vault().len(), 1);
        assert_eq!(gm.notifications().len(), 1);
    }

    #[test]
    fn test_retrieval_without_share_gets_no_answer() {
        let relay = MemoryRelay::new();
        let clock = ManualClock::new(0);
        let mut gm = node("Grand Ma", "12345", &relay, &clock);
        let mut alice = node("Alice", "11", &relay, &clock);
        pair(&relay, &mut gm, &mut alice);
        assert!(alice.helper("12345").unwrap().lockbox_share.is_empty());
        assert_eq!(relay.pending(), 0);

        let request = Envelope::new("12345", "11", MessageType::LockboxShareRetrievalRequest, Vec::new());
        alice.handle_message(&request).unwrap();
        assert_eq!(relay.pending(), 0);
        assert_eq!(relay.sent_count(MessageType::LockboxShareRetrievalResponse), 0);
    }

    #[tokio::test]
    async fn test_entering_recovery_resets_storage() {
        let relay = MemoryRelay::new();
        let clock = ManualClock::new(0);
        let store = MemoryStore::new();
        let collaborators = Collaborators {
            relay: Arc::new(relay.clone()),
            store: Arc::new(store.clone()),
            clock: Arc::new(clock.clone()),
        };
        let mut gm = Orchestrator::new(User::new("Grand Ma", "12345"), Config::default(), collaborators, OperatorCallbacks::new()).unwrap();
        gm.load_lockbox_secret().await.unwrap();
        let before = gm.lockbox().secret().clone();
        store.set("other", "x".into()).await.unwrap();

        gm.set_operating_mode(OperatingMode::Recovery);
        assert!(gm.needs_storage_flush());
        gm.flush_storage().await.unwrap();
        assert!(!gm.needs_storage_flush());
        assert_ne!(gm.lockbox().secret(), &before);
        assert!(store.get("other").await.unwrap().is_none());
        assert_eq!(store.len(), 2);
    }
}
