//! The replication peer's decision core.
//!
//! Grounded on the pure `(state, event) -> (new_state, output)` shape the
//! cluster's consensus layer uses everywhere else in this stack: no
//! sockets, no threads, no clocks in here, only the election and
//! failover decisions themselves. The surrounding [`crate::peer`] module
//! drives this core from real timers and real connections.
//!
//! This is a structural borrowing, not a literal one: there is no
//! quorum-backed view change here, only a heartbeat timeout and
//! highest-identity tie-break. See `SPEC_FULL.md` for why that
//! best-effort design is kept rather than "upgraded" into a real
//! quorum protocol.

use std::collections::BTreeSet;

use outpost_types::{ReplicaId, ReplicaRole};

use outpost_wire::ReplicationKind;

/// Where an outbound replication message should be delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    All,
    Peer(ReplicaId),
}

/// A replication message this replica needs to send, and to whom.
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub target: Target,
    pub kind: ReplicationKind,
}

impl Outbound {
    fn all(kind: ReplicationKind) -> Self {
        Self {
            target: Target::All,
            kind,
        }
    }

    fn to(peer: ReplicaId, kind: ReplicationKind) -> Self {
        Self {
            target: Target::Peer(peer),
            kind,
        }
    }
}

/// What happened as a result of applying an [`Event`] to the core.
///
/// Mirrors the cluster's `ReplicaOutput` convention: state mutation,
/// messages to send, and side effects the caller (the peer/Chat Core
/// boundary) must carry out, all handed back in one value instead of
/// performed inline.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Output {
    pub role_changed: Option<ReplicaRole>,
    pub outbound: Vec<Outbound>,
    pub request_sync_from: Option<ReplicaId>,
}

impl Output {
    fn role(role: ReplicaRole) -> Self {
        Self {
            role_changed: Some(role),
            ..Self::default()
        }
    }

    fn with_outbound(mut self, msg: Outbound) -> Self {
        self.outbound.push(msg);
        self
    }

    fn with_sync_from(mut self, peer: ReplicaId) -> Self {
        self.request_sync_from = Some(peer);
        self
    }
}

/// Inputs the decision core reacts to. Everything time-based (ticks) is
/// injected by the caller rather than read from a clock, so the core
/// stays pure and unit-testable.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A peer connected and exchanged `HELLO`.
    PeerJoined { peer_id: ReplicaId, role: ReplicaRole },
    /// A peer link dropped.
    PeerLeft { peer_id: ReplicaId },
    /// `HEARTBEAT` received from the primary.
    HeartbeatReceived,
    /// The heartbeat emitter's timer fired; if PRIMARY, emit one.
    HeartbeatTick,
    /// The failure monitor's timer fired.
    MonitorTick { missed_heartbeat_budget_exceeded: bool },
    /// `ELECTION` received from `peer_id`.
    ElectionReceived { peer_id: ReplicaId },
    /// `ELECTION_ACK` received (currently advisory only, see
    /// `SPEC_FULL.md`'s best-effort election note).
    ElectionAckReceived,
    /// `ELECTED` received from `peer_id`.
    ElectedReceived { peer_id: ReplicaId },
    /// `STATE_CHANGE` received from `peer_id`.
    StateChangeReceived { peer_id: ReplicaId, role: ReplicaRole },
    /// The election wait timer (`T_elect`) elapsed while still CANDIDATE.
    ElectionWaitElapsed,
}

/// The replication peer's election state. Pure and deterministic: every
/// state transition is driven by [`Core::apply`].
#[derive(Debug)]
pub struct Core {
    self_id: ReplicaId,
    role: ReplicaRole,
    missed_heartbeats: u32,
    max_missed_heartbeats: u32,
    known_peers: BTreeSet<ReplicaId>,
}

impl Core {
    pub fn new(self_id: ReplicaId, initial_role: ReplicaRole) -> Self {
        Self::with_missed_heartbeat_budget(self_id, initial_role, 3)
    }

    /// Same as [`Core::new`] but with an explicit `M_missed` budget
    /// (specification §4.3: consecutive missed-heartbeat ticks before a
    /// BACKUP starts an election; default 3).
    pub fn with_missed_heartbeat_budget(
        self_id: ReplicaId,
        initial_role: ReplicaRole,
        max_missed_heartbeats: u32,
    ) -> Self {
        Self {
            self_id,
            role: initial_role,
            missed_heartbeats: 0,
            max_missed_heartbeats: max_missed_heartbeats.max(1),
            known_peers: BTreeSet::new(),
        }
    }

    pub fn role(&self) -> ReplicaRole {
        self.role
    }

    pub fn self_id(&self) -> &ReplicaId {
        &self.self_id
    }

    /// Applies one event, returning what the caller must do as a result.
    pub fn apply(&mut self, event: Event) -> Output {
        match event {
            Event::PeerJoined { peer_id, .. } => {
                // No sync-pull here: pulling from whichever peer happens to
                // join can hand a stale/reconnecting BACKUP's pre-deletion
                // state back to the PRIMARY. The one-time initial pull a
                // freshly elected PRIMARY needs is already handled by
                // `become_primary` below.
                self.known_peers.insert(peer_id);
                Output::default()
            }
            Event::PeerLeft { peer_id } => {
                self.known_peers.remove(&peer_id);
                Output::default()
            }
            Event::HeartbeatReceived => {
                self.missed_heartbeats = 0;
                Output::default()
            }
            Event::HeartbeatTick => {
                if self.role.is_primary() {
                    Output::default().with_outbound(Outbound::all(ReplicationKind::Heartbeat))
                } else {
                    Output::default()
                }
            }
            Event::MonitorTick {
                missed_heartbeat_budget_exceeded,
            } => {
                if self.role == ReplicaRole::Backup {
                    if missed_heartbeat_budget_exceeded {
                        self.missed_heartbeats += 1;
                        if self.missed_heartbeats >= self.max_missed_heartbeats {
                            self.start_election()
                        } else {
                            Output::default()
                        }
                    } else {
                        self.missed_heartbeats = 0;
                        Output::default()
                    }
                } else {
                    Output::default()
                }
            }
            Event::ElectionReceived { peer_id } => {
                if peer_id < self.self_id {
                    // We have the higher id: contest by starting our own
                    // election rather than acknowledging theirs.
                    self.start_election()
                } else {
                    Output::default().with_outbound(Outbound::to(
                        peer_id,
                        ReplicationKind::ElectionAck,
                    ))
                }
            }
            Event::ElectionAckReceived => Output::default(),
            Event::ElectedReceived { peer_id } => {
                // A CANDIDATE must also step down: it has not yet won its
                // own election, so letting it keep running its
                // `ElectionWaitElapsed` timer risks a second self-promotion
                // racing the real winner, violating "at most one PRIMARY".
                let mut out = if self.role.is_primary() || self.role.is_candidate() {
                    self.step_down()
                } else {
                    Output::default()
                };
                out.request_sync_from = Some(peer_id);
                out
            }
            Event::StateChangeReceived { peer_id, role } => {
                if role.is_primary() {
                    if self.role.is_primary() && peer_id > self.self_id {
                        self.step_down()
                    } else {
                        self.known_peers.insert(peer_id);
                        Output::default()
                    }
                } else {
                    Output::default()
                }
            }
            Event::ElectionWaitElapsed => {
                if self.role == ReplicaRole::Candidate {
                    self.become_primary()
                } else {
                    Output::default()
                }
            }
        }
    }

    fn start_election(&mut self) -> Output {
        if self.role.is_primary() || self.role == ReplicaRole::Candidate {
            return Output::default();
        }
        self.role = ReplicaRole::Candidate;
        Output::role(ReplicaRole::Candidate).with_outbound(Outbound::all(
            ReplicationKind::Election {
                peer_id: self.self_id.clone(),
            },
        ))
    }

    fn become_primary(&mut self) -> Output {
        self.role = ReplicaRole::Primary;
        self.missed_heartbeats = 0;
        let mut out = Output::role(ReplicaRole::Primary).with_outbound(Outbound::all(
            ReplicationKind::Elected {
                peer_id: self.self_id.clone(),
            },
        ));
        // Specification §4.3: a newly elected PRIMARY pulls one SYNC_REQUEST
        // from an arbitrary live peer before it opens for writes.
        if let Some(peer_id) = self.known_peers.iter().next() {
            out = out.with_sync_from(peer_id.clone());
        }
        out
    }

    fn step_down(&mut self) -> Output {
        self.role = ReplicaRole::Backup;
        self.missed_heartbeats = 0;
        Output::role(ReplicaRole::Backup).with_outbound(Outbound::all(
            ReplicationKind::StateChange {
                role: ReplicaRole::Backup,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> ReplicaId {
        ReplicaId::new(s)
    }

    #[test]
    fn backup_starts_election_after_budget_exceeded() {
        let mut core = Core::with_missed_heartbeat_budget(id("r1"), ReplicaRole::Backup, 3);
        for _ in 0..2 {
            let out = core.apply(Event::MonitorTick {
                missed_heartbeat_budget_exceeded: true,
            });
            assert!(out.role_changed.is_none());
        }
        let out = core.apply(Event::MonitorTick {
            missed_heartbeat_budget_exceeded: true,
        });
        assert_eq!(out.role_changed, Some(ReplicaRole::Candidate));
        assert_eq!(core.role(), ReplicaRole::Candidate);
    }

    #[test]
    fn missed_heartbeat_counter_resets_when_heartbeat_resumes() {
        let mut core = Core::with_missed_heartbeat_budget(id("r1"), ReplicaRole::Backup, 3);
        core.apply(Event::MonitorTick {
            missed_heartbeat_budget_exceeded: true,
        });
        core.apply(Event::MonitorTick {
            missed_heartbeat_budget_exceeded: false,
        });
        let out = core.apply(Event::MonitorTick {
            missed_heartbeat_budget_exceeded: true,
        });
        assert!(out.role_changed.is_none());
    }

    #[test]
    fn candidate_self_promotes_after_wait_elapses() {
        let mut core = Core::new(id("r1"), ReplicaRole::Candidate);
        let out = core.apply(Event::ElectionWaitElapsed);
        assert_eq!(out.role_changed, Some(ReplicaRole::Primary));
        assert!(out
            .outbound
            .iter()
            .any(|m| matches!(m.kind, ReplicationKind::Elected { .. })));
    }

    #[test]
    fn candidate_steps_down_on_elected_from_the_actual_winner() {
        let mut core = Core::new(id("r1"), ReplicaRole::Candidate);
        let out = core.apply(Event::ElectedReceived { peer_id: id("r2") });
        assert_eq!(out.role_changed, Some(ReplicaRole::Backup));
        assert_eq!(core.role(), ReplicaRole::Backup);
    }

    #[test]
    fn lower_id_acknowledges_election_from_higher_id() {
        let mut core = Core::new(id("a"), ReplicaRole::Backup);
        let out = core.apply(Event::ElectionReceived { peer_id: id("z") });
        assert!(out.role_changed.is_none());
        assert!(matches!(
            out.outbound.as_slice(),
            [Outbound {
                kind: ReplicationKind::ElectionAck,
                ..
            }]
        ));
    }

    #[test]
    fn higher_id_contests_election_from_lower_id() {
        let mut core = Core::new(id("z"), ReplicaRole::Backup);
        let out = core.apply(Event::ElectionReceived { peer_id: id("a") });
        assert_eq!(out.role_changed, Some(ReplicaRole::Candidate));
    }

    #[test]
    fn primary_steps_down_to_higher_id_primary() {
        let mut core = Core::new(id("a"), ReplicaRole::Primary);
        let out = core.apply(Event::StateChangeReceived {
            peer_id: id("z"),
            role: ReplicaRole::Primary,
        });
        assert_eq!(out.role_changed, Some(ReplicaRole::Backup));
    }

    #[test]
    fn primary_keeps_role_against_lower_id_primary() {
        let mut core = Core::new(id("z"), ReplicaRole::Primary);
        let out = core.apply(Event::StateChangeReceived {
            peer_id: id("a"),
            role: ReplicaRole::Primary,
        });
        assert!(out.role_changed.is_none());
        assert_eq!(core.role(), ReplicaRole::Primary);
    }

    #[test]
    fn heartbeat_tick_only_emits_while_primary() {
        let mut core = Core::with_missed_heartbeat_budget(id("a"), ReplicaRole::Backup, 1);
        assert!(core.apply(Event::HeartbeatTick).outbound.is_empty());

        core.apply(Event::MonitorTick {
            missed_heartbeat_budget_exceeded: true,
        });
        core.apply(Event::ElectionWaitElapsed);
        assert_eq!(core.role(), ReplicaRole::Primary);
        assert!(!core.apply(Event::HeartbeatTick).outbound.is_empty());
    }
}
