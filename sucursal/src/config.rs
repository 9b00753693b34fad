use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use sucursal_base::{fatal, Result};
use sucursal_coord::NodeConfig;
use sucursal_store::BranchSeed;

/// The on-disk shape of `sucursal.toml` (spec §4.2/§6): the branch table,
/// one row per node in the realm, plus the round/failover tunables that
/// used to be hard-coded constants in the source.
#[derive(Debug, Deserialize)]
pub struct Config {
    pub branch: Vec<BranchSeed>,
    #[serde(default = "default_round_timeout_ms")]
    pub round_timeout_ms: u64,
    #[serde(default = "default_failover_settle_ms")]
    pub failover_settle_ms: u64,
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

fn default_round_timeout_ms() -> u64 {
    5_000
}

fn default_failover_settle_ms() -> u64 {
    5_000
}

fn default_db_path() -> String {
    "sucursal.db".to_string()
}

impl Config {
    pub fn load(path: &Path) -> Result<Config> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| fatal(format!("reading config file {}: {e}", path.display())))?;
        toml::from_str(&text).map_err(|e| fatal(format!("parsing config file {}: {e}", path.display())))
    }

    /// Overrides which branch row is `is_self`, for deployments that share
    /// one config file across the fleet and pick their row via `--node-id`
    /// instead of maintaining a separate file per process.
    pub fn select_self(&mut self, node_id: i64) -> Result<()> {
        let mut found = false;
        for b in &mut self.branch {
            b.is_self = b.id == node_id;
            found |= b.is_self;
        }
        if !found {
            return Err(fatal(format!("no branch row with id {node_id}")));
        }
        Ok(())
    }

    pub fn node_config(&self) -> NodeConfig {
        NodeConfig {
            round_timeout: Duration::from_millis(self.round_timeout_ms),
            failover_settle: Duration::from_millis(self.failover_settle_ms),
        }
    }

    /// The db file path for this process, suffixed with the self node's id
    /// so a fleet of processes sharing one checked-out repo doesn't clobber
    /// each other's store (spec §6: "one file per node").
    pub fn db_path_for_self(&self) -> Result<String> {
        let self_row = self
            .branch
            .iter()
            .find(|b| b.is_self)
            .ok_or_else(|| fatal("no branch row marked is_self in config"))?;
        Ok(format!("{}.{}", self_row.id, self.db_path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_minimal_config() {
        let toml_text = r#"
            round_timeout_ms = 1000
            failover_settle_ms = 500

            [[branch]]
            id = 1
            ip = "127.0.0.1"
            port = 2222
            is_self = true
            is_master = true
            capacity = 100
        "#;
        let cfg: Config = toml::from_str(toml_text).unwrap();
        assert_eq!(cfg.branch.len(), 1);
        assert_eq!(cfg.round_timeout_ms, 1000);
        assert_eq!(cfg.db_path_for_self().unwrap(), "1.sucursal.db");
    }

    #[test]
    fn tunables_default_when_absent() {
        let toml_text = r#"
            [[branch]]
            id = 1
            ip = "127.0.0.1"
            port = 2222
            is_self = true
            is_master = true
            capacity = 100
        "#;
        let cfg: Config = toml::from_str(toml_text).unwrap();
        assert_eq!(cfg.round_timeout_ms, 5_000);
        assert_eq!(cfg.failover_settle_ms, 5_000);
    }
}
