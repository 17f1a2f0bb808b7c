//! one relay, one clock and a handful of phones

use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use lockbox::{
    Collaborators, Config, HandshakePacket, ManualClock, MemoryRelay, MemoryStore, OperatingMode,
    OperatorCallbacks, Orchestrator, User,
};
use tracing::{debug, info, warn};

pub struct Net {
    relay: MemoryRelay,
    clock: ManualClock,
    config: Config,
    nodes: Vec<Orchestrator>,
}

impl Net {
    pub fn new(config: Config, start_millis: u64) -> Self {
        Self {
            relay: MemoryRelay::new(),
            clock: ManualClock::new(start_millis),
            config,
            nodes: Vec::new(),
        }
    }

    pub fn relay(&self) -> &MemoryRelay {
        &self.relay
    }

    fn build(&self, name: &str, phone: &str) -> Result<Orchestrator> {
        let collaborators = Collaborators {
            relay: Arc::new(self.relay.clone()),
            store: Arc::new(MemoryStore::new()),
            clock: Arc::new(self.clock.clone()),
        };
        let who = name.to_string();
        let who_too = who.clone();
        let callbacks = OperatorCallbacks::new()
            .on_notification(move |title, body| info!(node = %who, "{}: {}", title, body))
            .on_recovering_peer(move |packet: &HandshakePacket| {
                warn!(node = %who_too, "{} ({}) wants to pair while recovering", packet.name, packet.phone)
            });
        Ok(Orchestrator::new(User::new(name, phone), self.config.clone(), collaborators, callbacks)?)
    }

    pub async fn join(&mut self, name: &str, phone: &str) -> Result<()> {
        let mut node = self.build(name, phone)?;
        node.load_lockbox_secret().await?;
        self.nodes.push(node);
        Ok(())
    }

    /// replace a node with a blank install of the same identity in recovery mode
    pub async fn lose_device(&mut self, name: &str) -> Result<()> {
        let idx = self.idx(name)?;
        let phone = self.nodes[idx].user().phone.clone();
        let mut node = self.build(name, &phone)?;
        node.set_operating_mode(OperatingMode::Recovery);
        node.load_lockbox_secret().await?;
        self.nodes[idx] = node;
        Ok(())
    }

    fn idx(&self, name: &str) -> Result<usize> {
        self.nodes
            .iter()
            .position(|n| n.user().name == name)
            .ok_or_else(|| anyhow!("no phone named {name}"))
    }

    pub fn node(&self, name: &str) -> Result<&Orchestrator> {
        Ok(&self.nodes[self.idx(name)?])
    }

    pub fn node_mut(&mut self, name: &str) -> Result<&mut Orchestrator> {
        let idx = self.idx(name)?;
        Ok(&mut self.nodes[idx])
    }

    /// deliver until the relay is quiet
    pub fn pump(&mut self) -> Result<usize> {
        let mut delivered = 0;
        while let Some(env) = self.relay.pop() {
            debug!("{} -> {} {:?}", env.from_phone, env.to_phone, env.message_type);
            if let Some(node) = self.nodes.iter_mut().find(|n| n.user().phone == env.to_phone) {
                node.handle_message(&env)?;
                delivered += 1;
            }
        }
        Ok(delivered)
    }

    /// advance one keepalive period and run everybody's periodic tasks
    pub fn tick(&mut self) -> Result<()> {
        self.clock.advance(self.config.keepalive_period());
        for node in self.nodes.iter_mut() {
            node.handle_periodic_tasks()?;
        }
        self.pump()?;
        Ok(())
    }

    /// `requester` shows its codes, `scanner` points the camera at them
    pub fn pair(&mut self, requester: &str, scanner: &str) -> Result<()> {
        let codes = self.node_mut(requester)?.start_pairing_process()?;
        self.node_mut(scanner)?.start_pairing_process()?;

        let mut answered = false;
        for code in &codes {
            if self.node_mut(scanner)?.handle_scanned_qr_code(code)? {
                answered = true;
                break;
            }
        }
        if !answered {
            bail!("{scanner} never accepted the pairing request from {requester}");
        }
        self.pump()?;
        self.tick()?;

        let phone = self.node(scanner)?.user().phone.clone();
        match self.node(requester)?.helper(&phone) {
            Some(helper) if helper.is_paired() => Ok(()),
            _ => bail!("{requester} did not end up paired with {scanner}"),
        }
    }
}
