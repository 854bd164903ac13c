// Election - Pure leader-election state machine
//
// follower --(election window silent)--> leader
// leader   --(loses conflict)----------> follower
//
// Conflict between two leaders: a syncing leader wins, otherwise the higher
// instance id wins. Candidates yield silently to a higher competing request.

use tracing::{debug, info};

use super::message::{InstanceId, LeaderMessage, MessageKind};
use crate::config::LeaderConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Follower,
    Leader,
}

/// What the driver has to do after a transition
#[derive(Debug, Default, PartialEq)]
pub struct Effects {
    pub messages: Vec<LeaderMessage>,
    pub became_leader: bool,
    pub stepped_down: bool,
    /// Stepped down while holding the sync lock
    pub lost_lock: bool,
}

impl Effects {
    fn send(&mut self, message: LeaderMessage) {
        self.messages.push(message);
    }
}

/// Election state of one instance; driven by messages and ticks
#[derive(Debug, Clone)]
pub struct ElectionState {
    id: InstanceId,
    config: LeaderConfig,
    role: Role,
    leader: Option<InstanceId>,
    last_leader_seen_ms: u64,
    /// Start of our own candidacy window
    election_started_ms: Option<u64>,
    last_heartbeat_ms: u64,
    syncing: bool,
}

impl ElectionState {
    pub fn new(id: InstanceId, config: LeaderConfig, now_ms: u64) -> Self {
        Self {
            id,
            config,
            role: Role::Follower,
            leader: None,
            last_leader_seen_ms: now_ms,
            election_started_ms: None,
            last_heartbeat_ms: now_ms,
            syncing: false,
        }
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_leader(&self) -> bool {
        self.role == Role::Leader
    }

    pub fn leader(&self) -> Option<InstanceId> {
        self.leader
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing
    }

    /// Only a leader may sync; returns whether the flag changed
    pub fn set_syncing(&mut self, syncing: bool) -> bool {
        if syncing && !self.is_leader() {
            return false;
        }
        let changed = self.syncing != syncing;
        self.syncing = syncing;
        changed
    }

    /// Message from this instance, carrying the sync flag where it matters
    pub fn message(&self, kind: MessageKind, now_ms: u64) -> LeaderMessage {
        let message = LeaderMessage::new(kind, self.id, now_ms);
        match kind {
            MessageKind::LeaderAnnounce | MessageKind::Heartbeat => {
                message.with_syncing(self.syncing)
            }
            _ => message,
        }
    }

    /// Open a candidacy window
    pub fn start_election(&mut self, now_ms: u64) -> Effects {
        let mut effects = Effects::default();
        if self.is_leader() || self.election_started_ms.is_some() {
            return effects;
        }

        debug!("Instance {} requesting leadership", self.id);
        self.leader = None;
        self.election_started_ms = Some(now_ms);
        effects.send(self.message(MessageKind::LeaderRequest, now_ms));
        effects
    }

    pub fn on_tick(&mut self, now_ms: u64) -> Effects {
        let mut effects = Effects::default();

        match self.role {
            Role::Leader => {
                let since_heartbeat = now_ms.saturating_sub(self.last_heartbeat_ms);
                if since_heartbeat >= self.config.heartbeat_interval_ms {
                    self.last_heartbeat_ms = now_ms;
                    effects.send(self.message(MessageKind::Heartbeat, now_ms));
                }
            }
            Role::Follower => {
                if let Some(started) = self.election_started_ms {
                    if now_ms.saturating_sub(started) >= self.config.election_timeout_ms {
                        self.claim(now_ms, &mut effects);
                    }
                } else if now_ms.saturating_sub(self.last_leader_seen_ms)
                    > self.config.leader_timeout_ms
                {
                    if let Some(dead) = self.leader {
                        info!("💀 Leader {} silent, starting election", dead);
                    }
                    effects = self.start_election(now_ms);
                }
            }
        }

        effects
    }

    pub fn on_message(&mut self, message: &LeaderMessage, now_ms: u64) -> Effects {
        let mut effects = Effects::default();
        if message.from == self.id {
            return effects;
        }

        match message.kind {
            MessageKind::LeaderRequest => match self.role {
                Role::Leader => effects.send(self.message(MessageKind::LeaderAnnounce, now_ms)),
                Role::Follower => {
                    if self.election_started_ms.is_some() && message.from > self.id {
                        debug!("Instance {} yields to {}", self.id, message.from);
                        self.election_started_ms = None;
                        self.last_leader_seen_ms = now_ms;
                    }
                }
            },

            MessageKind::LeaderAnnounce | MessageKind::Heartbeat => match self.role {
                Role::Leader => {
                    if self.wins_conflict(message) {
                        effects.send(self.message(MessageKind::LeaderAnnounce, now_ms));
                    } else {
                        info!("Instance {} stepping down for {}", self.id, message.from);
                        if self.syncing {
                            self.syncing = false;
                            effects.lost_lock = true;
                            effects.send(self.message(MessageKind::SyncComplete, now_ms));
                        }
                        self.role = Role::Follower;
                        self.follow(message.from, now_ms);
                        effects.stepped_down = true;
                    }
                }
                Role::Follower => self.follow(message.from, now_ms),
            },

            MessageKind::SyncStart | MessageKind::SyncComplete | MessageKind::Pong => {
                if self.leader == Some(message.from) {
                    self.last_leader_seen_ms = now_ms;
                }
            }

            MessageKind::Ping => {
                if self.is_leader() {
                    effects.send(self.message(MessageKind::Pong, now_ms));
                }
            }
        }

        effects
    }

    fn follow(&mut self, leader: InstanceId, now_ms: u64) {
        if self.leader != Some(leader) {
            debug!("Instance {} follows leader {}", self.id, leader);
        }
        self.leader = Some(leader);
        self.last_leader_seen_ms = now_ms;
        self.election_started_ms = None;
    }

    fn claim(&mut self, now_ms: u64, effects: &mut Effects) {
        info!("👑 Instance {} is now leader", self.id);
        self.role = Role::Leader;
        self.leader = Some(self.id);
        self.election_started_ms = None;
        self.last_heartbeat_ms = now_ms;
        effects.became_leader = true;
        effects.send(self.message(MessageKind::LeaderAnnounce, now_ms));
    }

    /// Two leaders: syncing beats idle, then the higher id wins
    fn wins_conflict(&self, other: &LeaderMessage) -> bool {
        match (self.syncing, other.syncing()) {
            (true, false) => true,
            (false, true) => false,
            _ => self.id > other.from,
        }
    }
}
