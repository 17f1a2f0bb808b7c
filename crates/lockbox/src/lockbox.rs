//! lockbox engine
//!
//! the lockbox is our helper list plus the vault, encrypted under a
//! long-lived xchacha20poly1305 key. the key and nonce are split with
//! shamir across the paired helpers; each helper receives
//!
//! ```text
//! u16 share | share | sealed lockbox
//! ```
//!
//! encrypted under its own pairing session. during recovery, returned
//! packets are pooled by phone until the shares open the lockbox.
//!
//! the secret is persisted through a [`KeyValueStore`]. loads are
//! asynchronous, so every load carries the engine generation it started
//! under; a load that completes after the engine was regenerated is
//! discarded.

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::account::Vault;
use crate::codec::{Decode, Encode, Reader, Writer};
use crate::crypto::{self, LOCKBOX_KEY_LEN, LOCKBOX_NONCE_LEN};
use crate::helper::Helper;
use crate::storage::{KeyValueStore, LOCKBOX_KEY_SLOT, LOCKBOX_NONCE_SLOT};
use crate::vss::{self, Share};
use crate::{Error, Result};

/// key and nonce protecting the lockbox
#[derive(Clone, PartialEq, Eq)]
pub struct LockboxSecret {
    key: Zeroizing<[u8; LOCKBOX_KEY_LEN]>,
    nonce: [u8; LOCKBOX_NONCE_LEN],
}

impl std::fmt::Debug for LockboxSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockboxSecret").finish_non_exhaustive()
    }
}

impl LockboxSecret {
    pub fn generate() -> Self {
        Self {
            key: Zeroizing::new(crypto::random_bytes()),
            nonce: crypto::random_bytes(),
        }
    }

    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        crypto::lockbox_seal(&self.key, &self.nonce, plaintext)
    }

    pub fn open(&self, ciphertext: &[u8]) -> Option<Vec<u8>> {
        crypto::lockbox_open(&self.key, &self.nonce, ciphertext)
    }

    fn from_slices(key: &[u8], nonce: &[u8]) -> Result<Self> {
        let key: [u8; LOCKBOX_KEY_LEN] = key
            .try_into()
            .map_err(|_| Error::InvalidKey(format!("lockbox key is {} bytes", key.len())))?;
        let nonce: [u8; LOCKBOX_NONCE_LEN] = nonce
            .try_into()
            .map_err(|_| Error::InvalidKey(format!("lockbox nonce is {} bytes", nonce.len())))?;
        Ok(Self {
            key: Zeroizing::new(key),
            nonce,
        })
    }

    fn from_storage(key: &str, nonce: &str) -> Result<Self> {
        let key = Zeroizing::new(BASE64.decode(key).map_err(|e| Error::Storage(e.to_string()))?);
        let nonce = BASE64.decode(nonce).map_err(|e| Error::Storage(e.to_string()))?;
        Self::from_slices(&key, &nonce)
    }
}

impl Encode for LockboxSecret {
    fn encode(&self, w: &mut Writer) -> Result<()> {
        w.put_bytes(self.key.as_slice())?;
        w.put_bytes(&self.nonce)
    }
}

impl Decode for LockboxSecret {
    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        let key = r.bytes()?;
        let nonce = r.bytes()?;
        Self::from_slices(key, nonce)
    }
}

/// decrypted lockbox contents
#[derive(Clone, Debug)]
pub struct RecoveredLockbox {
    pub helpers: Vec<Helper>,
    pub vault: Vault,
}

/// a distribution packet ready to send to one helper
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShareDelivery {
    pub phone: String,
    /// already encrypted under the helper's session
    pub payload: Vec<u8>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoadTicket {
    generation: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadOutcome {
    /// stored secret adopted
    Loaded,
    /// nothing usable stored; the current secret should be persisted
    Missing,
    /// engine was regenerated while the load was in flight
    Stale,
}

#[derive(Debug)]
pub struct LockboxEngine {
    secret: LockboxSecret,
    generation: u64,
    /// recovery packets keyed by the phone that returned them
    retrieved: BTreeMap<String, Vec<u8>>,
}

impl Default for LockboxEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl LockboxEngine {
    pub fn new() -> Self {
        Self {
            secret: LockboxSecret::generate(),
            generation: 0,
            retrieved: BTreeMap::new(),
        }
    }

    /// fresh secret; invalidates in-flight loads and pooled shares
    pub fn regenerate(&mut self) {
        self.secret = LockboxSecret::generate();
        self.generation += 1;
        self.retrieved.clear();
    }

    pub fn secret(&self) -> &LockboxSecret {
        &self.secret
    }

    pub fn retrieved_count(&self) -> usize {
        self.retrieved.len()
    }

    /// encrypt helpers and vault; placeholder records are left out
    pub fn seal(&self, helpers: &[Helper], vault: &Vault) -> Result<Vec<u8>> {
        let kept: Vec<&Helper> = helpers.iter().filter(|h| !h.is_placeholder()).collect();
        let mut w = Writer::new();
        w.put_len(kept.len())?;
        for helper in kept {
            w.put(helper)?;
        }
        w.put(vault)?;
        self.secret.seal(&w.into_bytes())
    }

    /// decrypt and decode; `None` if it does not authenticate or parse
    pub fn open(secret: &LockboxSecret, ciphertext: &[u8]) -> Option<RecoveredLockbox> {
        let plaintext = Zeroizing::new(secret.open(ciphertext)?);
        let mut r = Reader::new(&plaintext);
        let decoded = (|| -> Result<RecoveredLockbox> {
            let count = r.len()?;
            let mut helpers = Vec::with_capacity(count.min(r.remaining()));
            for _ in 0..count {
                helpers.push(r.get()?);
            }
            let vault = r.get()?;
            Ok(RecoveredLockbox { helpers, vault })
        })();
        match decoded {
            Ok(lockbox) if r.remaining() == 0 => Some(lockbox),
            Ok(_) => {
                warn!("lockbox has trailing bytes");
                None
            }
            Err(e) => {
                warn!("lockbox decoded badly: {}", e);
                None
            }
        }
    }

    /// split the secret across paired helpers and build their packets.
    ///
    /// returns nothing when fewer than `min_helpers` are paired.
    /// recipients are ordered by phone, descending.
    pub fn distribute(&self, helpers: &[Helper], vault: &Vault, min_helpers: usize) -> Result<Vec<ShareDelivery>> {
        let mut recipients: Vec<&Helper> = helpers
            .iter()
            .filter(|h| h.is_paired() && !h.is_placeholder() && h.session.has_session_key())
            .collect();
        if recipients.len() < min_helpers || recipients.is_empty() {
            debug!("not distributing: {} paired, {} required", recipients.len(), min_helpers);
            return Ok(Vec::new());
        }
        recipients.sort_by(|a, b| b.phone().cmp(a.phone()));

        let threshold = vss::majority_threshold(recipients.len());
        let secret_bytes = Zeroizing::new(self.secret.serialize()?);
        let shares = vss::split_secret(&secret_bytes, recipients.len(), threshold)?;
        let sealed = self.seal(helpers, vault)?;

        let mut deliveries = Vec::with_capacity(recipients.len());
        for (helper, share) in recipients.into_iter().zip(shares) {
            let mut w = Writer::new();
            w.put_bytes(&share.to_bytes())?;
            w.put_raw(&sealed);
            deliveries.push(ShareDelivery {
                phone: helper.phone().to_string(),
                payload: helper.session.encrypt(&w.into_bytes())?,
            });
        }
        info!("lockbox split {}-of-{}", threshold, deliveries.len());
        Ok(deliveries)
    }

    /// pool a returned packet and try to open the lockbox with
    /// everything pooled so far. on success the recovered secret
    /// becomes ours and the pool is emptied.
    pub fn store_retrieved_share_and_attempt_recovery(&mut self, phone: &str, packet: Vec<u8>) -> Option<RecoveredLockbox> {
        self.retrieved.insert(phone.to_string(), packet);

        let mut shares = Vec::new();
        let mut sealed: Vec<&[u8]> = Vec::new();
        for packet in self.retrieved.values() {
            let mut r = Reader::new(packet);
            let Ok(share) = r.bytes().map_err(|_| ()).and_then(|b| Share::from_bytes(b).map_err(|_| ())) else {
                warn!("ignoring malformed recovery packet");
                continue;
            };
            shares.push(share);
            let lockbox = r.rest();
            if !sealed.contains(&lockbox) {
                sealed.push(lockbox);
            }
        }

        let secret = vss::combine_shares(&shares)
            .ok()
            .map(Zeroizing::new)
            .and_then(|bytes| LockboxSecret::deserialize(&bytes).ok())
            .map(|(secret, _)| secret)?;

        let recovered = sealed.iter().find_map(|ct| Self::open(&secret, ct));
        match recovered {
            Some(lockbox) => {
                info!("lockbox recovered from {} shares", shares.len());
                self.secret = secret;
                self.retrieved.clear();
                Some(lockbox)
            }
            None => {
                debug!("{} shares not enough to open lockbox", shares.len());
                None
            }
        }
    }

    // === persistence ===

    pub fn begin_load(&self) -> LoadTicket {
        LoadTicket {
            generation: self.generation,
        }
    }

    /// finish a load started with [`begin_load`](Self::begin_load)
    pub fn complete_load(&mut self, ticket: LoadTicket, key: Option<String>, nonce: Option<String>) -> LoadOutcome {
        if ticket.generation != self.generation {
            debug!("discarding stale lockbox secret load");
            return LoadOutcome::Stale;
        }
        let (Some(key), Some(nonce)) = (key, nonce) else {
            return LoadOutcome::Missing;
        };
        match LockboxSecret::from_storage(&key, &nonce) {
            Ok(secret) => {
                self.secret = secret;
                LoadOutcome::Loaded
            }
            Err(e) => {
                warn!("stored lockbox secret unusable: {}", e);
                LoadOutcome::Missing
            }
        }
    }

    /// adopt the stored secret, or store the current one if none exists
    pub async fn load_or_generate(&mut self, store: &dyn KeyValueStore) -> Result<LoadOutcome> {
        let ticket = self.begin_load();
        let key = store.get(LOCKBOX_KEY_SLOT).await?;
        let nonce = store.get(LOCKBOX_NONCE_SLOT).await?;
        let outcome = self.complete_load(ticket, key, nonce);
        if outcome == LoadOutcome::Missing {
            self.persist(store).await?;
        }
        Ok(outcome)
    }

    pub async fn persist(&self, store: &dyn KeyValueStore) -> Result<()> {
        store.set(LOCKBOX_KEY_SLOT, BASE64.encode(self.secret.key.as_slice())).await?;
        store.set(LOCKBOX_NONCE_SLOT, BASE64.encode(self.secret.nonce)).await
    }

    /// wipe storage and write the current secret
    pub async fn reset_storage(&self, store: &dyn KeyValueStore) -> Result<()> {
        store.clear().await?;
        self.persist(store).await
    }
}
