//! hooks into the host application
//!
//! every hook is optional; an orchestrator without callbacks still keeps
//! its notification log.

use crate::handshake::HandshakePacket;

type NotifyFn = Box<dyn FnMut(&str, &str) + Send>;
type ConfirmFn = Box<dyn FnMut(&HandshakePacket) + Send>;
type SignalFn = Box<dyn FnMut() + Send>;

#[derive(Default)]
pub struct OperatorCallbacks {
    show_user_notification: Option<NotifyFn>,
    confirm_pairing_with_recovering_peer: Option<ConfirmFn>,
    pairing_handshake_response_matched: Option<SignalFn>,
    state_changed: Option<SignalFn>,
}

impl std::fmt::Debug for OperatorCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperatorCallbacks")
            .field("show_user_notification", &self.show_user_notification.is_some())
            .field("confirm_pairing_with_recovering_peer", &self.confirm_pairing_with_recovering_peer.is_some())
            .field("pairing_handshake_response_matched", &self.pairing_handshake_response_matched.is_some())
            .field("state_changed", &self.state_changed.is_some())
            .finish()
    }
}

impl OperatorCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_notification(mut self, f: impl FnMut(&str, &str) + Send + 'static) -> Self {
        self.show_user_notification = Some(Box::new(f));
        self
    }

    /// a recovering peer answered our qr code; the host should ask the
    /// user and then call `confirm_pairing_with_recovering_peer`
    pub fn on_recovering_peer(mut self, f: impl FnMut(&HandshakePacket) + Send + 'static) -> Self {
        self.confirm_pairing_with_recovering_peer = Some(Box::new(f));
        self
    }

    /// our displayed request was answered; the host can close the qr view
    pub fn on_response_matched(mut self, f: impl FnMut() + Send + 'static) -> Self {
        self.pairing_handshake_response_matched = Some(Box::new(f));
        self
    }

    pub fn on_state_changed(mut self, f: impl FnMut() + Send + 'static) -> Self {
        self.state_changed = Some(Box::new(f));
        self
    }

    pub(crate) fn show_user_notification(&mut self, title: &str, body: &str) {
        if let Some(f) = self.show_user_notification.as_mut() {
            f(title, body);
        }
    }

    pub(crate) fn confirm_pairing_with_recovering_peer(&mut self, packet: &HandshakePacket) {
        if let Some(f) = self.confirm_pairing_with_recovering_peer.as_mut() {
            f(packet);
        }
    }

    pub(crate) fn pairing_handshake_response_matched(&mut self) {
        if let Some(f) = self.pairing_handshake_response_matched.as_mut() {
            f();
        }
    }

    pub(crate) fn state_changed(&mut self) {
        if let Some(f) = self.state_changed.as_mut() {
            f();
        }
    }
}

/// entry in the notification log
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    /// milliseconds
    pub ts: u64,
    pub title: String,
    pub body: String,
}
