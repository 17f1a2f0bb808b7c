//! in-memory network of orchestrators sharing one relay and one clock

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use lockbox::{
    Collaborators, Config, HandshakePacket, ManualClock, MemoryRelay, MemoryStore, OperatingMode,
    OperatorCallbacks, Orchestrator, User,
};

pub struct Net {
    pub relay: MemoryRelay,
    pub clock: ManualClock,
    pub config: Config,
    pub nodes: Vec<Orchestrator>,
    /// (node name, recovering peer name) for every confirmation request
    pub confirmations: Arc<Mutex<Vec<(String, String)>>>,
}

impl Net {
    pub fn new(config: Config) -> Self {
        Self {
            relay: MemoryRelay::new(),
            clock: ManualClock::new(1_700_000_000_000),
            config,
            nodes: Vec::new(),
            confirmations: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn build(&self, name: &str, phone: &str) -> Orchestrator {
        let collaborators = Collaborators {
            relay: Arc::new(self.relay.clone()),
            store: Arc::new(MemoryStore::new()),
            clock: Arc::new(self.clock.clone()),
        };
        let sink = self.confirmations.clone();
        let me = name.to_string();
        let callbacks = OperatorCallbacks::new().on_recovering_peer(move |packet: &HandshakePacket| {
            sink.lock().unwrap().push((me.clone(), packet.name.clone()));
        });
        Orchestrator::new(User::new(name, phone), self.config.clone(), collaborators, callbacks).unwrap()
    }

    pub async fn add(&mut self, name: &str, phone: &str) {
        let mut node = self.build(name, phone);
        node.load_lockbox_secret().await.unwrap();
        self.nodes.push(node);
    }

    /// simulate a lost device: a blank install under the same identity,
    /// switched to recovery mode
    pub async fn lose_device(&mut self, name: &str) {
        let idx = self.idx(name);
        let phone = self.nodes[idx].user().phone.clone();
        let mut node = self.build(name, &phone);
        node.set_operating_mode(OperatingMode::Recovery);
        node.load_lockbox_secret().await.unwrap();
        self.nodes[idx] = node;
    }

    pub fn idx(&self, name: &str) -> usize {
        self.nodes
            .iter()
            .position(|n| n.user().name == name)
            .unwrap_or_else(|| panic!("no node named {name}"))
    }

    pub fn node(&self, name: &str) -> &Orchestrator {
        &self.nodes[self.idx(name)]
    }

    pub fn node_mut(&mut self, name: &str) -> &mut Orchestrator {
        let idx = self.idx(name);
        &mut self.nodes[idx]
    }

    /// deliver until the relay is quiet
    pub fn pump(&mut self) {
        while let Some(env) = self.relay.pop() {
            if let Some(node) = self.nodes.iter_mut().find(|n| n.user().phone == env.to_phone) {
                node.handle_message(&env).unwrap();
            }
        }
    }

    /// one keepalive round for everybody
    pub fn tick(&mut self) {
        for node in self.nodes.iter_mut() {
            node.handle_periodic_tasks().unwrap();
        }
        self.pump();
    }

    pub fn advance(&mut self, by: Duration) {
        self.clock.advance(by);
    }

    /// `requester` shows its qr codes, `scanner` reads three of them
    pub fn pair(&mut self, requester: &str, scanner: &str) {
        let codes = self.node_mut(requester).start_pairing_process().unwrap();
        self.node_mut(scanner).start_pairing_process().unwrap();
        for code in codes.iter().skip(1).take(3) {
            self.node_mut(scanner).handle_scanned_qr_code(code).unwrap();
        }
        self.pump();
        self.tick();
    }

    pub fn last_notification(&self, name: &str) -> (String, String) {
        let n = self
            .node(name)
            .notifications()
            .last()
            .unwrap_or_else(|| panic!("{name} has no notifications"));
        (n.title.clone(), n.body.clone())
    }

    pub fn has_notification(&self, name: &str, title: &str, body: &str) -> bool {
        self.node(name)
            .notifications()
            .iter()
            .any(|n| n.title == title && n.body == body)
    }
}

pub fn note(title: &str, body: &str) -> (String, String) {
    (title.to_string(), body.to_string())
}
