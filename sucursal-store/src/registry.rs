use std::collections::BTreeMap;

use parking_lot::RwLock;
use serde::Deserialize;
use sucursal_base::{err, BranchId, ErrorKind, Result};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NodeStatus {
    Up,
    Down,
}

/// One row of the persisted branch table (spec §3 Node/Branch). `is_self`
/// is exactly true for one row per process; `is_master` is at most true
/// for one row among `status = Up`, cluster-wide.
#[derive(Clone, Debug)]
pub struct BranchInfo {
    pub id: BranchId,
    pub ip: String,
    pub port: u16,
    pub is_self: bool,
    pub is_master: bool,
    pub status: NodeStatus,
    pub capacity: i64,
    pub used: i64,
}

/// The config-file shape a `BranchInfo` is seeded from (spec §4.2/§6: the
/// bootstrap table is no longer one hard-coded constant shared by every
/// process — it's read per-deployment from a config file, with exactly one
/// row marked `is_self`).
#[derive(Clone, Debug, Deserialize)]
pub struct BranchSeed {
    pub id: i64,
    pub ip: String,
    pub port: u16,
    pub is_self: bool,
    pub is_master: bool,
    pub capacity: i64,
}

/// Read-mostly table of all nodes, mutated only by the Failover controller
/// (`set_master`). Held behind a single `RwLock` — reads (the common case:
/// every quorum round and every UI action consults it) never block each
/// other; `set_master` is the only writer and is a single atomic swap.
pub struct MembershipRegistry {
    self_id: BranchId,
    nodes: RwLock<BTreeMap<BranchId, BranchInfo>>,
}

impl MembershipRegistry {
    pub fn from_seeds(seeds: Vec<BranchSeed>) -> Result<MembershipRegistry> {
        let mut nodes = BTreeMap::new();
        let mut self_id = None;
        let mut master_id = None;
        for seed in seeds {
            let id = BranchId(seed.id);
            if seed.is_self {
                if self_id.replace(id).is_some() {
                    return Err(err(ErrorKind::Fatal, "more than one branch row marked is_self"));
                }
            }
            if seed.is_master {
                if master_id.replace(id).is_some() {
                    return Err(err(ErrorKind::Fatal, "more than one branch row marked is_master"));
                }
            }
            nodes.insert(
                id,
                BranchInfo {
                    id,
                    ip: seed.ip,
                    port: seed.port,
                    is_self: seed.is_self,
                    is_master: seed.is_master,
                    status: NodeStatus::Up,
                    capacity: seed.capacity,
                    used: 0,
                },
            );
        }
        let self_id = self_id.ok_or_else(|| err(ErrorKind::Fatal, "no branch row marked is_self"))?;
        if master_id.is_none() {
            return Err(err(ErrorKind::Fatal, "no branch row marked is_master"));
        }
        Ok(MembershipRegistry {
            self_id,
            nodes: RwLock::new(nodes),
        })
    }

    pub fn self_id(&self) -> BranchId {
        self.self_id
    }

    pub fn self_ip(&self) -> (String, u16) {
        let nodes = self.nodes.read();
        let me = &nodes[&self.self_id];
        (me.ip.clone(), me.port)
    }

    pub fn master_id(&self) -> Result<BranchId> {
        let nodes = self.nodes.read();
        nodes
            .values()
            .find(|n| n.is_master && matches!(n.status, NodeStatus::Up))
            .map(|n| n.id)
            .ok_or_else(|| err(ErrorKind::Internal, "no live master in registry"))
    }

    pub fn master_ip(&self) -> Result<(String, u16)> {
        let id = self.master_id()?;
        let nodes = self.nodes.read();
        let m = &nodes[&id];
        Ok((m.ip.clone(), m.port))
    }

    pub fn is_self_master(&self) -> bool {
        self.master_id().map(|id| id == self.self_id).unwrap_or(false)
    }

    /// All live nodes except self, in ascending id order.
    pub fn active_peers(&self) -> Vec<BranchInfo> {
        let nodes = self.nodes.read();
        nodes
            .values()
            .filter(|n| !n.is_self && matches!(n.status, NodeStatus::Up))
            .cloned()
            .collect()
    }

    /// Every node this process currently believes is live, including self.
    /// Used by failover arbitration to compute the lowest surviving id.
    pub fn live_node_ids(&self) -> Vec<BranchId> {
        let nodes = self.nodes.read();
        nodes
            .values()
            .filter(|n| matches!(n.status, NodeStatus::Up))
            .map(|n| n.id)
            .collect()
    }

    pub fn get(&self, id: BranchId) -> Option<BranchInfo> {
        self.nodes.read().get(&id).cloned()
    }

    pub fn all(&self) -> Vec<BranchInfo> {
        self.nodes.read().values().cloned().collect()
    }

    /// Atomically demotes `old` (non-master, `status = Down` — deliberately,
    /// per spec §4.2: a downed master stays excluded until an operator
    /// restarts it) and promotes `new` to master.
    pub fn set_master(&self, old: BranchId, new: BranchId) -> Result<()> {
        let mut nodes = self.nodes.write();
        if let Some(old_node) = nodes.get_mut(&old) {
            old_node.is_master = false;
            old_node.status = NodeStatus::Down;
        }
        if let Some(new_node) = nodes.get_mut(&new) {
            new_node.is_master = true;
        } else {
            return Err(err(ErrorKind::Internal, "set_master: new master id not in registry"));
        }
        Ok(())
    }

    /// Marks a node down without a master change (a non-master peer found
    /// unreachable during a round's COLLECT phase is excluded, not failed
    /// over — spec §4.5 edge policy).
    pub fn mark_down(&self, id: BranchId) {
        let mut nodes = self.nodes.write();
        if let Some(n) = nodes.get_mut(&id) {
            n.status = NodeStatus::Down;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeds() -> Vec<BranchSeed> {
        vec![
            BranchSeed { id: 1, ip: "10.0.0.1".into(), port: 2222, is_self: true, is_master: true, capacity: 2 },
            BranchSeed { id: 2, ip: "10.0.0.2".into(), port: 2222, is_self: false, is_master: false, capacity: 3 },
            BranchSeed { id: 3, ip: "10.0.0.3".into(), port: 2222, is_self: false, is_master: false, capacity: 5 },
        ]
    }

    #[test]
    fn set_master_is_atomic_and_downs_the_old_master() {
        let reg = MembershipRegistry::from_seeds(seeds()).unwrap();
        assert_eq!(reg.master_id().unwrap(), BranchId(1));
        reg.set_master(BranchId(1), BranchId(2)).unwrap();
        assert_eq!(reg.master_id().unwrap(), BranchId(2));
        let old = reg.get(BranchId(1)).unwrap();
        assert!(!old.is_master);
        assert!(matches!(old.status, NodeStatus::Down));
    }

    #[test]
    fn active_peers_excludes_self_and_down_nodes() {
        let reg = MembershipRegistry::from_seeds(seeds()).unwrap();
        reg.mark_down(BranchId(3));
        let peers: Vec<_> = reg.active_peers().into_iter().map(|n| n.id).collect();
        assert_eq!(peers, vec![BranchId(2)]);
    }

    #[test]
    fn rejects_more_than_one_self_row() {
        let mut s = seeds();
        s[1].is_self = true;
        assert!(MembershipRegistry::from_seeds(s).is_err());
    }
}
