use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use sucursal_base::{fatal, Result};
use sucursal_coord::{Node, TcpTransport};
use sucursal_net::Listener;
use sucursal_store::{LocalStore, MembershipRegistry, SqliteStore};
use tracing::info;

use crate::config::Config;
use crate::menu;

/// Owns the listener thread and the running flag the UI's "quit" command
/// clears (spec §4.7). Dropping the supervisor stops the listener and waits
/// for the accept loop to exit; in-flight handler threads are not joined.
pub struct Supervisor {
    node: Arc<Node>,
    listener: Listener,
    running: Arc<AtomicBool>,
}

impl Supervisor {
    /// Binds the listener at `(self_ip, port)` first, per spec §6/§7: a
    /// bind failure is `ErrorKind::Fatal` and the caller exits 1 before
    /// anything else starts.
    pub fn start(config: &Config) -> Result<Supervisor> {
        let registry = Arc::new(MembershipRegistry::from_seeds(config.branch.clone())?);
        let (self_ip, port) = registry.self_ip();

        let db_path = config.db_path_for_self()?;
        let store: Arc<dyn LocalStore> = Arc::new(SqliteStore::open(&db_path)?);

        let node = Arc::new(Node::new(registry, store, Arc::new(TcpTransport), config.node_config()));

        let handler_node = node.clone();
        let listener = Listener::spawn(&self_ip, port, move |_peer, payload| handler_node.handle_message(payload))
            .map_err(|e| fatal(format!("binding {self_ip}:{port}: {e}")))?;

        let running = Arc::new(AtomicBool::new(true));
        let sigint_running = running.clone();
        ctrlc::set_handler(move || {
            info!("signal received, shutting down");
            sigint_running.store(false, Ordering::SeqCst);
            std::process::exit(0);
        })
        .map_err(|e| fatal(format!("installing signal handler: {e}")))?;

        info!(ip = %self_ip, port = %port, "listening");
        Ok(Supervisor { node, listener, running })
    }

    /// Drives the CLI menu until "quit" clears the running flag, then stops
    /// the listener and returns. Exit code is the caller's responsibility
    /// (spec §6: 0 clean quit, 1 bind failure — the latter never reaches
    /// here since `start` already returned an error).
    pub fn run(&mut self) {
        menu::main_menu(&self.node, &self.running);
        self.listener.stop();
    }
}
