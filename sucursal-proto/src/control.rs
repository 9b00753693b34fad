use sucursal_base::{protocol, BranchId, Result};

use crate::wire::split_once_byte;

/// The control-message grammar from spec §4.3. Unlike `Op`, these are the
/// messages that actually travel alone over a connection; `StartConsensus`
/// and `ContinueConsensus` carry an `Op`'s encoded command string as an
/// opaque payload (decoded separately by the participant once it needs to
/// apply the decided command).
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ControlMsg {
    AcquirePermission,
    ReleasePermission,
    AuthorizedPermission,
    StartConsensus { initiator_id: BranchId, command: String },
    ContinueConsensus { sender_id: BranchId, command: String },
    ConsensusOver,
    NewMasterNode { old_id: BranchId, new_id: BranchId },
}

const ACQUIRE_PERMISSION: &str = "acquire_permission";
const RELEASE_PERMISSION: &str = "release_permission";
const AUTHORIZED_PERMISSION: &str = "authorized_permission";
const CONSENSUS_OVER: &str = "consensus_over";
const START_CONSENSUS_PREFIX: &str = "start_consensus-";
const CONTINUE_CONSENSUS_PREFIX: &str = "continue_consensus-";
const NEW_MASTER_NODE: &str = "new_master_node";

impl ControlMsg {
    pub fn encode(&self) -> String {
        match self {
            ControlMsg::AcquirePermission => ACQUIRE_PERMISSION.to_string(),
            ControlMsg::ReleasePermission => RELEASE_PERMISSION.to_string(),
            ControlMsg::AuthorizedPermission => AUTHORIZED_PERMISSION.to_string(),
            ControlMsg::ConsensusOver => CONSENSUS_OVER.to_string(),
            ControlMsg::StartConsensus { initiator_id, command } => {
                format!("{START_CONSENSUS_PREFIX}{initiator_id}|{command}")
            }
            ControlMsg::ContinueConsensus { sender_id, command } => {
                format!("{CONTINUE_CONSENSUS_PREFIX}{sender_id}|{command}")
            }
            ControlMsg::NewMasterNode { old_id, new_id } => {
                format!("{NEW_MASTER_NODE}|{old_id}|{new_id}")
            }
        }
    }

    pub fn decode(s: &str) -> Result<ControlMsg> {
        if s == ACQUIRE_PERMISSION {
            return Ok(ControlMsg::AcquirePermission);
        }
        if s == RELEASE_PERMISSION {
            return Ok(ControlMsg::ReleasePermission);
        }
        if s == AUTHORIZED_PERMISSION {
            return Ok(ControlMsg::AuthorizedPermission);
        }
        if s == CONSENSUS_OVER {
            return Ok(ControlMsg::ConsensusOver);
        }
        if let Some(rest) = s.strip_prefix(START_CONSENSUS_PREFIX) {
            let (id, command) =
                split_once_byte(rest, b'|').ok_or_else(|| protocol("start_consensus missing command"))?;
            let initiator_id = BranchId(
                id.parse()
                    .map_err(|e| protocol(format!("bad initiator id {id:?}: {e}")))?,
            );
            return Ok(ControlMsg::StartConsensus {
                initiator_id,
                command: command.to_string(),
            });
        }
        if let Some(rest) = s.strip_prefix(CONTINUE_CONSENSUS_PREFIX) {
            let (id, command) =
                split_once_byte(rest, b'|').ok_or_else(|| protocol("continue_consensus missing command"))?;
            let sender_id = BranchId(
                id.parse()
                    .map_err(|e| protocol(format!("bad sender id {id:?}: {e}")))?,
            );
            return Ok(ControlMsg::ContinueConsensus {
                sender_id,
                command: command.to_string(),
            });
        }
        if let Some(rest) = s.strip_prefix(NEW_MASTER_NODE) {
            let rest = rest
                .strip_prefix('|')
                .ok_or_else(|| protocol("new_master_node missing fields"))?;
            let (old, new) =
                split_once_byte(rest, b'|').ok_or_else(|| protocol("new_master_node missing new id"))?;
            let old_id = BranchId(
                old.parse()
                    .map_err(|e| protocol(format!("bad old master id {old:?}: {e}")))?,
            );
            let new_id = BranchId(
                new.parse()
                    .map_err(|e| protocol(format!("bad new master id {new:?}: {e}")))?,
            );
            return Ok(ControlMsg::NewMasterNode { old_id, new_id });
        }
        Err(protocol(format!("unrecognized control message: {s:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(msg: ControlMsg) {
        let encoded = msg.encode();
        let decoded = ControlMsg::decode(&encoded).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn roundtrips_every_control_message() {
        roundtrip(ControlMsg::AcquirePermission);
        roundtrip(ControlMsg::ReleasePermission);
        roundtrip(ControlMsg::AuthorizedPermission);
        roundtrip(ControlMsg::ConsensusOver);
        roundtrip(ControlMsg::StartConsensus {
            initiator_id: BranchId(1),
            command: "create_cliente|alice|Alice|Main St 1|4111".into(),
        });
        roundtrip(ControlMsg::ContinueConsensus {
            sender_id: BranchId(2),
            command: "create_cliente|alice|Alice|Main St 1|4111".into(),
        });
        roundtrip(ControlMsg::NewMasterNode {
            old_id: BranchId(5),
            new_id: BranchId(1),
        });
    }

    #[test]
    fn rejects_garbage() {
        assert!(ControlMsg::decode("not_a_real_message").is_err());
    }

    #[test]
    fn start_consensus_requires_authoritative_id_suffix() {
        // A participant that hasn't seen prior context still learns the
        // initiator id from the message itself, not from connection state.
        let msg = ControlMsg::decode("start_consensus-3|restock_articulo|1001").unwrap();
        assert_eq!(
            msg,
            ControlMsg::StartConsensus {
                initiator_id: BranchId(3),
                command: "restock_articulo|1001".into(),
            }
        );
    }
}
