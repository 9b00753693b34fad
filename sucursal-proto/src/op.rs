use sucursal_base::{protocol, BranchId, Result, RowId};

use crate::wire::split_pipe;

/// The mutation codec's tagged variant set. This is the only place in the
/// workspace that names wire verb strings; every other crate deals in
/// `Op` values. See spec §4.3 and §9 REDESIGN FLAGS (dynamic dispatch on
/// verb strings replaced by a tagged enum).
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Op {
    CreateCliente {
        username: String,
        name: String,
        address: String,
        card: i64,
    },
    UpdateCliente {
        username: String,
        name: String,
        address: String,
        card: i64,
    },
    ActivateCliente {
        username: String,
    },
    DeactivateCliente {
        username: String,
    },
    CreateArticulo {
        code: i64,
        name: String,
        price: OrderedF64,
        branch_id: BranchId,
    },
    UpdateArticulo {
        code: i64,
        name: String,
        price: OrderedF64,
    },
    RestockArticulo {
        code: i64,
    },
    DeactivateArticulo {
        code: i64,
    },
    CreateGuiaEnvio {
        customer_id: RowId,
        article_id: RowId,
        branch_id: BranchId,
        serial: i64,
        amount: OrderedF64,
        purchase_ts: String,
    },
}

/// A thin wrapper giving `f64` the `Eq`/`Ord`/`Hash` the codec's data
/// structures need (command strings are compared and counted during the
/// plurality vote). Prices and amounts are never NaN on this wire, so
/// bitwise comparison is sound.
#[derive(Clone, Copy, Debug)]
pub struct OrderedF64(pub f64);

impl PartialEq for OrderedF64 {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}
impl Eq for OrderedF64 {}
impl PartialOrd for OrderedF64 {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for OrderedF64 {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}
impl std::hash::Hash for OrderedF64 {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state)
    }
}
impl std::fmt::Display for OrderedF64 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

const CREATE_CLIENTE: &str = "create_cliente";
const UPDATE_CLIENTE: &str = "update_cliente";
const ACTIVATE_CLIENTE: &str = "activate_cliente";
const DEACTIVATE_CLIENTE: &str = "deactivate_cliente";
const CREATE_ARTICULO: &str = "create_articulo";
const UPDATE_ARTICULO: &str = "update_articulo";
const RESTOCK_ARTICULO: &str = "restock_articulo";
const DEACTIVATE_ARTICULO: &str = "deactivate_articulo";
const CREATE_GUIA_ENVIO: &str = "create_guia_envio";

impl Op {
    /// Encodes this operation as its canonical pipe-delimited command
    /// string — the wire form carried inside `start_consensus`/
    /// `continue_consensus` payloads.
    pub fn encode(&self) -> String {
        match self {
            Op::CreateCliente {
                username,
                name,
                address,
                card,
            } => format!("{CREATE_CLIENTE}|{username}|{name}|{address}|{card}"),
            Op::UpdateCliente {
                username,
                name,
                address,
                card,
            } => format!("{UPDATE_CLIENTE}|{username}|{name}|{address}|{card}"),
            Op::ActivateCliente { username } => format!("{ACTIVATE_CLIENTE}|{username}"),
            Op::DeactivateCliente { username } => format!("{DEACTIVATE_CLIENTE}|{username}"),
            Op::CreateArticulo {
                code,
                name,
                price,
                branch_id,
            } => format!("{CREATE_ARTICULO}|{code}|{name}|{price}|{branch_id}"),
            Op::UpdateArticulo { code, name, price } => {
                format!("{UPDATE_ARTICULO}|{code}|{name}|{price}")
            }
            Op::RestockArticulo { code } => format!("{RESTOCK_ARTICULO}|{code}"),
            Op::DeactivateArticulo { code } => format!("{DEACTIVATE_ARTICULO}|{code}"),
            Op::CreateGuiaEnvio {
                customer_id,
                article_id,
                branch_id,
                serial,
                amount,
                purchase_ts,
            } => format!(
                "{CREATE_GUIA_ENVIO}|{customer_id}|{article_id}|{branch_id}|{serial}|{amount}|{purchase_ts}"
            ),
        }
    }

    /// Decodes a canonical command string back into an `Op`. Unknown verbs
    /// or wrong arity are `ErrorKind::Protocol` — malformed commands are
    /// logged and dropped by the caller, never panics here.
    pub fn decode(s: &str) -> Result<Op> {
        let parts = split_pipe(s);
        if parts.is_empty() {
            return Err(protocol("empty command string"));
        }
        let verb = parts[0];
        let args = &parts[1..];
        match verb {
            CREATE_CLIENTE if args.len() == 4 => Ok(Op::CreateCliente {
                username: args[0].to_string(),
                name: args[1].to_string(),
                address: args[2].to_string(),
                card: parse_i64(args[3])?,
            }),
            UPDATE_CLIENTE if args.len() == 4 => Ok(Op::UpdateCliente {
                username: args[0].to_string(),
                name: args[1].to_string(),
                address: args[2].to_string(),
                card: parse_i64(args[3])?,
            }),
            ACTIVATE_CLIENTE if args.len() == 1 => Ok(Op::ActivateCliente {
                username: args[0].to_string(),
            }),
            DEACTIVATE_CLIENTE if args.len() == 1 => Ok(Op::DeactivateCliente {
                username: args[0].to_string(),
            }),
            CREATE_ARTICULO if args.len() == 4 => Ok(Op::CreateArticulo {
                code: parse_i64(args[0])?,
                name: args[1].to_string(),
                price: OrderedF64(parse_f64(args[2])?),
                branch_id: BranchId(parse_i64(args[3])?),
            }),
            UPDATE_ARTICULO if args.len() == 3 => Ok(Op::UpdateArticulo {
                code: parse_i64(args[0])?,
                name: args[1].to_string(),
                price: OrderedF64(parse_f64(args[2])?),
            }),
            RESTOCK_ARTICULO if args.len() == 1 => Ok(Op::RestockArticulo {
                code: parse_i64(args[0])?,
            }),
            DEACTIVATE_ARTICULO if args.len() == 1 => Ok(Op::DeactivateArticulo {
                code: parse_i64(args[0])?,
            }),
            CREATE_GUIA_ENVIO if args.len() == 6 => Ok(Op::CreateGuiaEnvio {
                customer_id: RowId(parse_i64(args[0])?),
                article_id: RowId(parse_i64(args[1])?),
                branch_id: BranchId(parse_i64(args[2])?),
                serial: parse_i64(args[3])?,
                amount: OrderedF64(parse_f64(args[4])?),
                purchase_ts: args[5].to_string(),
            }),
            other => Err(protocol(format!(
                "unknown verb or wrong arity: {other} ({} args)",
                args.len()
            ))),
        }
    }
}

fn parse_i64(s: &str) -> Result<i64> {
    s.parse::<i64>()
        .map_err(|e| protocol(format!("bad integer field {s:?}: {e}")))
}

fn parse_f64(s: &str) -> Result<f64> {
    s.parse::<f64>()
        .map_err(|e| protocol(format!("bad float field {s:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(op: Op) {
        let encoded = op.encode();
        let decoded = Op::decode(&encoded).unwrap();
        assert_eq!(op, decoded);
    }

    #[test]
    fn roundtrips_every_verb() {
        roundtrip(Op::CreateCliente {
            username: "alice".into(),
            name: "Alice".into(),
            address: "Main St 1".into(),
            card: 4111,
        });
        roundtrip(Op::UpdateCliente {
            username: "alice".into(),
            name: "Alice".into(),
            address: "Main St 2".into(),
            card: 4112,
        });
        roundtrip(Op::ActivateCliente {
            username: "alice".into(),
        });
        roundtrip(Op::DeactivateCliente {
            username: "alice".into(),
        });
        roundtrip(Op::CreateArticulo {
            code: 1001,
            name: "Widget".into(),
            price: OrderedF64(9.99),
            branch_id: BranchId(1),
        });
        roundtrip(Op::UpdateArticulo {
            code: 1001,
            name: "Widget Pro".into(),
            price: OrderedF64(12.5),
        });
        roundtrip(Op::RestockArticulo { code: 1001 });
        roundtrip(Op::DeactivateArticulo { code: 1001 });
        roundtrip(Op::CreateGuiaEnvio {
            customer_id: RowId(1),
            article_id: RowId(1001),
            branch_id: BranchId(3),
            serial: 20260726010203,
            amount: OrderedF64(9.99),
            purchase_ts: "2026-07-26 01:02:03".into(),
        });
    }

    #[test]
    fn rejects_unknown_verb() {
        assert!(Op::decode("explode|1|2").is_err());
    }

    #[test]
    fn rejects_wrong_arity() {
        assert!(Op::decode("create_cliente|alice|Alice").is_err());
    }

    #[test]
    fn empty_address_field_is_preserved() {
        let op = Op::decode("create_cliente|bob|Bob||9999").unwrap();
        match op {
            Op::CreateCliente { address, .. } => assert_eq!(address, ""),
            _ => panic!("wrong variant"),
        }
    }
}
