//! protection policy
//!
//! one pure function decides, for every structural change, whether the
//! vault is protected, whether to redistribute, and what to tell the
//! user. protected means at least `min_helpers` paired helpers are in
//! sync. nothing is ever distributed while recovering.

use crate::helper::Helper;
use crate::user::OperatingMode;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PolicyEvent {
    HelperPaired { name: String },
    HelperRemoved { name: String },
    AccountAdded { name: String },
    AccountRemoved,
    /// `previously_synced` is false for a helper's first ever contact
    SyncRestored { name: String, previously_synced: bool },
    SyncLost { name: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notice {
    pub title: String,
    pub body: String,
}

impl Notice {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PolicyDecision {
    pub protected: bool,
    pub distribute: bool,
    pub notice: Option<Notice>,
}

pub fn in_sync_paired_count(helpers: &[Helper]) -> usize {
    helpers
        .iter()
        .filter(|h| h.is_paired() && h.in_sync && !h.is_placeholder())
        .count()
}

pub fn can_protect(helpers: &[Helper], min_helpers: usize) -> bool {
    in_sync_paired_count(helpers) >= min_helpers
}

const REDISTRIBUTING: &str = "Redistributing Vault";

pub fn evaluate(event: &PolicyEvent, in_sync_paired: usize, min_helpers: usize, mode: OperatingMode) -> PolicyDecision {
    let protected = in_sync_paired >= min_helpers;
    let min = min_helpers;

    if mode == OperatingMode::Recovery {
        let notice = match event {
            PolicyEvent::HelperPaired { name } => Some(Notice::new(
                format!("{name} added as a helper - Recovery in progress"),
                "Please continue pairing with half of your original helpers",
            )),
            _ => None,
        };
        return PolicyDecision {
            protected,
            distribute: false,
            notice,
        };
    }

    let unprotected_now = format!("Unprotected vault - You have less than {min} active paired helpers now");
    let requires_min = format!("Vault protection requires minimum {min} active paired helpers");
    let pick = |yes: &str, no: String| if protected { yes.to_string() } else { no };

    let notice = match event {
        PolicyEvent::HelperPaired { name } if protected => {
            Some(Notice::new(format!("{name} added as a helper"), REDISTRIBUTING))
        }
        PolicyEvent::HelperPaired { name } => Some(Notice::new(
            format!("{name} added as a helper - Vault is not protected!"),
            format!("You have less than {min} active paired helpers"),
        )),
        PolicyEvent::AccountAdded { name } => {
            Some(Notice::new(format!("Account ({name}) added"), pick(REDISTRIBUTING, requires_min)))
        }
        PolicyEvent::AccountRemoved => Some(Notice::new("Account deleted", pick(REDISTRIBUTING, requires_min))),
        PolicyEvent::HelperRemoved { name } => Some(Notice::new(
            format!("{name} removed as a helper"),
            pick(REDISTRIBUTING, unprotected_now),
        )),
        PolicyEvent::SyncRestored {
            name,
            previously_synced: true,
        } => Some(Notice::new(
            format!("Communication restored with {name}"),
            pick(REDISTRIBUTING, unprotected_now),
        )),
        PolicyEvent::SyncRestored { .. } => None,
        PolicyEvent::SyncLost { name } => Some(Notice::new(
            format!("Communication lost with {name}"),
            pick(REDISTRIBUTING, "Vault no longer protected!".to_string()),
        )),
    };

    PolicyDecision {
        protected,
        distribute: protected,
        notice,
    }
}
