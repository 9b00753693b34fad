use std::sync::Arc;
use std::thread;
use std::time::Duration;

use sucursal_base::{protocol, BranchId, ErrorKind, Result};
use sucursal_proto::{ControlMsg, Op};
use sucursal_store::{LocalStore, MembershipRegistry};
use tracing::{debug, error, info, warn};

use crate::mutex::MasterMutex;
use crate::round::{Phase, Round};
use crate::transport::Transport;

/// Tunables read from the same config file as the membership table
/// (SPEC_FULL §4.5/§6): how long a node waits on a quorum wait loop before
/// treating the missing party as failed, and how long Failover sleeps after
/// promoting a new master to let peers converge.
#[derive(Clone, Copy, Debug)]
pub struct NodeConfig {
    pub round_timeout: Duration,
    pub failover_settle: Duration,
}

impl Default for NodeConfig {
    fn default() -> NodeConfig {
        NodeConfig {
            round_timeout: Duration::from_secs(5),
            failover_settle: Duration::from_secs(5),
        }
    }
}

/// One branch's coordination state: the master-mutex, the single round
/// slot, and the collaborators (registry, store, transport) it drives them
/// through. This is the Quorum Coordinator, Quorum Participant and
/// Failover Controller combined into one per-node object, matching the
/// source's single `Nodo` class playing all three roles.
pub struct Node {
    registry: Arc<MembershipRegistry>,
    store: Arc<dyn LocalStore>,
    transport: Arc<dyn Transport>,
    mutex: MasterMutex,
    round: Round,
    config: NodeConfig,
    /// What a participant proposes when forwarding its own vote, given the
    /// command it received. Defaults to re-broadcasting verbatim (spec
    /// §4.5: "if the participant has no independent opinion it simply
    /// re-broadcasts the received C"); business-rule opinions like
    /// normalizing an empty address belong to the Local Store Adapter /
    /// UI layer, not here, so tests inject them through this hook.
    local_opinion: Box<dyn Fn(&str) -> String + Send + Sync>,
}

impl Node {
    pub fn new(
        registry: Arc<MembershipRegistry>,
        store: Arc<dyn LocalStore>,
        transport: Arc<dyn Transport>,
        config: NodeConfig,
    ) -> Node {
        Node {
            registry,
            store,
            transport,
            mutex: MasterMutex::new(),
            round: Round::new(),
            config,
            local_opinion: Box::new(|c| c.to_string()),
        }
    }

    pub fn with_local_opinion(
        registry: Arc<MembershipRegistry>,
        store: Arc<dyn LocalStore>,
        transport: Arc<dyn Transport>,
        config: NodeConfig,
        local_opinion: impl Fn(&str) -> String + Send + Sync + 'static,
    ) -> Node {
        let mut node = Node::new(registry, store, transport, config);
        node.local_opinion = Box::new(local_opinion);
        node
    }

    pub fn registry(&self) -> &MembershipRegistry {
        self.registry.as_ref()
    }

    pub fn store(&self) -> &dyn LocalStore {
        self.store.as_ref()
    }

    // ---- inbound dispatch -------------------------------------------------

    /// Entry point for every inbound connection's payload (wired as the
    /// `sucursal_net::Handler` the listener drives, or called directly by
    /// an in-memory transport double in tests). Takes `Arc<Self>` because
    /// `StartConsensus`/`ContinueConsensus` hand work to a background
    /// thread rather than blocking the accept loop (spec §9).
    pub fn handle_message(self: &Arc<Self>, payload: &str) -> Option<String> {
        match ControlMsg::decode(payload) {
            Ok(msg) => self.dispatch(msg),
            Err(e) => {
                warn!(error = %e, payload = %payload, "dropping malformed message");
                None
            }
        }
    }

    fn dispatch(self: &Arc<Self>, msg: ControlMsg) -> Option<String> {
        match msg {
            ControlMsg::AcquirePermission => {
                if !self.mutex.acquire_write_lock(self.config.round_timeout) {
                    warn!("timed out granting write_lock to a peer");
                    return None;
                }
                Some(ControlMsg::AuthorizedPermission.encode())
            }
            ControlMsg::ReleasePermission => {
                self.mutex.release_write_lock();
                None
            }
            ControlMsg::AuthorizedPermission => {
                // Only meaningful as a synchronous reply to `request`; seeing
                // it as a fire-and-forget inbound message is a protocol
                // mismatch we simply log.
                warn!("received authorized_permission outside of a pending request");
                None
            }
            ControlMsg::StartConsensus { initiator_id, command } => {
                let node = self.clone();
                thread::spawn(move || node.on_start_consensus(initiator_id, command));
                None
            }
            ControlMsg::ContinueConsensus { sender_id, command } => {
                self.round.record_vote(sender_id, command);
                None
            }
            ControlMsg::ConsensusOver => {
                self.round.record_ack();
                None
            }
            ControlMsg::NewMasterNode { old_id, new_id } => {
                if let Err(e) = self.registry.set_master(old_id, new_id) {
                    error!(error = %e, "failed to apply new_master_node");
                }
                info!(old = %old_id, new = %new_id, "master changed by broadcast");
                None
            }
        }
    }

    // ---- master mutex (spec §4.4) -----------------------------------------

    /// Acquires the global write lock, running Failover and retrying if the
    /// current master is unreachable. Terminates because each failover
    /// either promotes this node (the next iteration is a local, infallible
    /// acquire) or promotes a peer this node currently believes is live.
    pub fn acquire_permission(self: &Arc<Self>) -> Result<()> {
        loop {
            if self.registry.is_self_master() {
                return if self.mutex.acquire_write_lock(self.config.round_timeout) {
                    Ok(())
                } else {
                    Err(sucursal_base::transport("timed out acquiring local write lock"))
                };
            }

            let (ip, port) = self.registry.master_ip()?;
            let reply = self
                .transport
                .request(&ip, port, &ControlMsg::AcquirePermission.encode(), self.config.round_timeout);

            match reply {
                Ok(Some(text)) if text == ControlMsg::AuthorizedPermission.encode() => return Ok(()),
                Ok(Some(other)) => {
                    return Err(protocol(format!("unexpected reply to acquire_permission: {other:?}")))
                }
                Ok(None) => return Err(sucursal_base::transport("master closed connection without authorizing")),
                Err(e) if e.kind() == ErrorKind::Transport => {
                    warn!(error = %e, "master unreachable, running failover");
                    self.failover()?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub fn release_permission(&self) -> Result<()> {
        if self.registry.is_self_master() {
            self.mutex.release_write_lock();
            return Ok(());
        }
        let (ip, port) = self.registry.master_ip()?;
        self.transport.send(&ip, port, &ControlMsg::ReleasePermission.encode())
    }

    // ---- failover (spec §4.6) ---------------------------------------------

    /// Promotes a new master and broadcasts the change. Arbitrates by
    /// lowest surviving node id rather than unconditional self-promotion
    /// (SPEC_FULL §9 REDESIGN FLAG 2): when every detector observes the same
    /// live set, they all compute the same winner instead of racing to
    /// promote themselves.
    fn failover(self: &Arc<Self>) -> Result<()> {
        let old = self.registry.master_id().unwrap_or(self.registry.self_id());
        // `old` is still marked Up in the registry at this point — nothing
        // has demoted it yet, that happens below in `set_master` — so it
        // has to be excluded by hand or it would "win" arbitration against
        // itself whenever it also held the lowest id.
        let mut live: Vec<BranchId> = self
            .registry
            .live_node_ids()
            .into_iter()
            .filter(|id| *id != old)
            .collect();
        live.sort();
        let new = *live.first().unwrap_or(&self.registry.self_id());

        info!(old = %old, new = %new, "failover: promoting new master");
        let msg = ControlMsg::NewMasterNode { old_id: old, new_id: new }.encode();
        // Every other live node needs this, including the node being
        // promoted: otherwise a detector that isn't the winner leaves the
        // new master's own registry still pointing at the dead one.
        for peer in self.registry.active_peers() {
            if let Err(e) = self.transport.send(&peer.ip, peer.port, &msg) {
                warn!(peer = %peer.id, error = %e, "failed to notify peer of new master");
            }
        }
        self.registry.set_master(old, new)?;
        thread::sleep(self.config.failover_settle);
        Ok(())
    }

    // ---- quorum coordinator (initiator side, spec §4.5) -------------------

    /// Drives one mutation through INITIATE -> COLLECT -> DECIDE ->
    /// APPLY-LOCAL -> NOTIFY-DONE -> COMPLETE, holding the master mutex for
    /// the duration. The mutex is always released before returning, even on
    /// failure (spec §4.4 deadlock avoidance).
    pub fn initiate(self: &Arc<Self>, op: Op) -> Result<()> {
        self.acquire_permission()?;
        let result = self.run_round(op);
        if let Err(e) = self.release_permission() {
            warn!(error = %e, "failed to release master mutex after round");
        }
        result
    }

    fn run_round(self: &Arc<Self>, op: Op) -> Result<()> {
        let self_id = self.registry.self_id();
        let command = op.encode();
        let candidates = self.registry.active_peers();

        let start_msg = ControlMsg::StartConsensus { initiator_id: self_id, command: command.clone() }.encode();
        let mut live_peers = Vec::with_capacity(candidates.len());
        for peer in &candidates {
            match self.transport.send(&peer.ip, peer.port, &start_msg) {
                Ok(()) => live_peers.push(peer.id),
                Err(e) => {
                    warn!(peer = %peer.id, error = %e, "start_consensus unreachable; excluding peer from round");
                    self.registry.mark_down(peer.id);
                }
            }
        }

        let expected_votes = live_peers.len() + 1;
        self.round.begin(self_id, expected_votes, live_peers.len())?;
        self.round.record_vote(self_id, command);

        let decision = match self.round.wait_for_decision(self.config.round_timeout) {
            Some(d) => d,
            None => {
                self.round.reset();
                return Err(protocol("timed out waiting for quorum votes"));
            }
        };

        self.apply_decision(&decision);
        self.round.mark_applied();
        self.round.begin_waiting_completion();

        if !self.round.wait_for_all_acks(self.config.round_timeout) {
            warn!("timed out waiting for consensus_over from every live peer; proceeding");
        }
        self.round.reset();
        Ok(())
    }

    // ---- quorum participant (spec §4.5) -----------------------------------

    fn on_start_consensus(self: Arc<Self>, initiator_id: BranchId, command: String) {
        let self_id = self.registry.self_id();
        let local_command = (self.local_opinion)(&command);
        let peers = self.registry.active_peers();
        let forward = ControlMsg::ContinueConsensus { sender_id: self_id, command: local_command.clone() }.encode();

        // Forward to every live peer, including the initiator (full mesh,
        // spec §9 REDESIGN FLAG). A peer this node can't actually reach is
        // excluded from `expected_votes` the same way the initiator excludes
        // unreachable peers from its own count: otherwise one silently-down
        // peer would make every *other* participant time out and drop the
        // round without applying, instead of just excluding that one peer.
        let mut reachable_others = 0usize;
        for peer in &peers {
            match self.transport.send(&peer.ip, peer.port, &forward) {
                Ok(()) => {
                    if peer.id != initiator_id {
                        reachable_others += 1;
                    }
                }
                Err(e) => {
                    warn!(peer = %peer.id, error = %e, "continue_consensus forward failed; excluding peer from round");
                    self.registry.mark_down(peer.id);
                }
            }
        }

        // Self and the initiator are guaranteed voters regardless of
        // whether the forward back to the initiator above succeeded: this
        // node votes locally, and the initiator's vote arrived with the
        // start_consensus message itself.
        let expected_votes = reachable_others + 2;
        if let Err(e) = self.round.begin(initiator_id, expected_votes, 0) {
            warn!(error = %e, "dropping start_consensus");
            return;
        }
        self.round.record_vote(initiator_id, command);
        self.round.record_vote(self_id, local_command);

        let decision = match self.round.wait_for_decision(self.config.round_timeout) {
            Some(d) => d,
            None => {
                warn!(initiator = %initiator_id, "round timed out waiting for decision; abandoning");
                self.round.reset();
                return;
            }
        };

        self.apply_decision(&decision);
        self.round.mark_applied();

        if let Some(initiator) = self.registry.get(initiator_id) {
            let ack = ControlMsg::ConsensusOver.encode();
            if let Err(e) = self.transport.send(&initiator.ip, initiator.port, &ack) {
                warn!(error = %e, "failed to notify initiator of completion");
            }
        }
        self.round.reset();
    }

    /// APPLY-LOCAL: parse failure or a store rejection is logged and the
    /// command dropped rather than propagated as an error (spec §4.5 step
    /// 5, §7 ProtocolError/StoreError policy) — every node ran the same
    /// decision, so the "applied identically" invariant holds even when one
    /// node can't actually apply it.
    fn apply_decision(&self, decision: &str) {
        debug!(command = %decision, "applying decided command");
        match Op::decode(decision) {
            Ok(op) => {
                if let Err(e) = self.store.apply(&op) {
                    error!(error = %e, command = %decision, "store rejected the decided command");
                }
            }
            Err(e) => {
                warn!(error = %e, command = %decision, "dropping undecodable decision");
            }
        }
    }

    pub fn phase(&self) -> Phase {
        self.round.phase()
    }
}
