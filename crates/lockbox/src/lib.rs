//! # lockbox
//!
//! social recovery for a vault of signing keys.
//!
//! the vault is sealed into a lockbox whose key is shamir-split across
//! trusted contacts ("helpers"). losing the device loses nothing: pairing
//! again with half of the original helpers brings back the vault and the
//! rest of the helper list.
//!
//! ## architecture
//!
//! ```text
//!   qr codes (base45)                relay (phone addressed)
//!         │                                  │
//!         ▼                                  ▼
//!   ┌───────────┐   session keys   ┌──────────────────┐
//!   │ handshake │ ───────────────► │   orchestrator   │ ◄── periodic tick
//!   └───────────┘                  └────────┬─────────┘
//!                                           │ policy
//!                         ┌─────────────────┼──────────────────┐
//!                         ▼                 ▼                  ▼
//!                   ┌──────────┐     ┌────────────┐     ┌────────────┐
//!                   │  helpers │     │  lockbox   │     │  storage   │
//!                   │ sessions │     │ shamir+aead│     │ (key/nonce)│
//!                   └──────────┘     └────────────┘     └────────────┘
//! ```
//!
//! ## security properties
//!
//! - the relay only ever sees ciphertext
//! - fewer than ⌈n/2⌉ helpers learn nothing about the lockbox key
//! - pairing needs a run of consecutive qr frames, so stray frames of an
//!   older request are not accepted
//! - a peer declaring recovery must already be a known helper
//!
//! ## usage
//!
//! ```rust,ignore
//! use lockbox::{Orchestrator, Collaborators, Config, OperatorCallbacks, User};
//!
//! let mut me = Orchestrator::new(User::new("Grand Ma", "12345"), Config::default(), collaborators, OperatorCallbacks::new())?;
//! me.load_lockbox_secret().await?;
//!
//! // show these to a helper's camera
//! let codes = me.start_pairing_process()?;
//!
//! // on the helper's device, for each scanned code
//! helper.handle_scanned_qr_code(&codes[0])?;
//!
//! // then feed relay envelopes and ticks
//! me.handle_message(&envelope)?;
//! me.handle_periodic_tasks()?;
//! ```

pub mod account;
pub mod base45;
pub mod callbacks;
pub mod clock;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod error;
pub mod handshake;
pub mod helper;
pub mod keys;
pub mod lockbox;
pub mod orchestrator;
pub mod policy;
pub mod relay;
pub mod session;
pub mod storage;
pub mod user;
pub mod vss;

pub use account::{Account, Vault};
pub use callbacks::{Notification, OperatorCallbacks};
pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::{Decode, Encode};
pub use config::Config;
pub use error::{Error, Result};
pub use handshake::{HandshakePacket, PairingRequest};
pub use helper::{Helper, HelperState};
pub use keys::{KeyPair, KeyType};
pub use lockbox::LockboxEngine;
pub use orchestrator::{Collaborators, Orchestrator};
pub use relay::{Envelope, MemoryRelay, MessageType, Relay};
pub use session::PairingSession;
pub use storage::{KeyValueStore, MemoryStore};
pub use user::{OperatingMode, PauseMode, User};
pub use vss::{combine_shares, split_secret};
