// Framed TCP transport. Single port per node, one pipe-delimited text
// message per inbound connection (spec §4.1). This is intentionally a thin
// synchronous layer: no persistent peer objects, no connection pooling — a
// fresh outbound connection per send, matching the cyclic mesh design note
// in spec §9 ("each node keeps a read-only Membership Registry snapshot and
// opens a fresh outbound connection per send").

use std::io::{Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use sucursal_base::{protocol, Result};
use tracing::{debug, warn};

/// Maximum payload size for a single message, per spec §4.1. Frames larger
/// than this are a protocol error.
pub const MAX_FRAME: usize = 1024;

/// Receives one decoded inbound message and optionally produces a response
/// to write back over the same connection before it closes (this is how
/// `acquire_permission` gets its `authorized_permission` reply: one
/// connection, two frames).
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, peer: std::net::SocketAddr, payload: &str) -> Option<String>;
}

impl<F> Handler for F
where
    F: Fn(std::net::SocketAddr, &str) -> Option<String> + Send + Sync + 'static,
{
    fn handle(&self, peer: std::net::SocketAddr, payload: &str) -> Option<String> {
        self(peer, payload)
    }
}

/// A running listener. Dropping or calling `stop` signals the accept loop
/// to stop taking new connections and waits for it to exit; in-flight
/// handler threads are not joined (they are expected to be short-lived).
pub struct Listener {
    shutdown: Arc<AtomicBool>,
    join: Option<thread::JoinHandle<()>>,
}

impl Listener {
    /// Binds `(bind_ip, port)` and starts accepting connections on a
    /// background thread. A bind failure is `ErrorKind::Fatal` territory
    /// for the caller (spec §6/§7): the caller should exit the process
    /// with status 1.
    pub fn spawn<H: Handler>(bind_ip: &str, port: u16, handler: H) -> Result<Listener> {
        let tcp = TcpListener::bind((bind_ip, port))?;
        tcp.set_nonblocking(true)?;
        let shutdown = Arc::new(AtomicBool::new(false));
        let loop_shutdown = shutdown.clone();
        let handler = Arc::new(handler);
        let join = thread::spawn(move || accept_loop(tcp, loop_shutdown, handler));
        Ok(Listener {
            shutdown,
            join: Some(join),
        })
    }

    /// Stops accepting new connections and waits for the accept loop to
    /// exit. Already-accepted connections finish on their own threads.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_loop<H: Handler>(tcp: TcpListener, shutdown: Arc<AtomicBool>, handler: Arc<H>) {
    while !shutdown.load(Ordering::SeqCst) {
        match tcp.accept() {
            Ok((stream, addr)) => {
                let handler = handler.clone();
                // A server must continue to accept new connections while
                // prior ones are being handled (spec §4.1): each handler
                // runs on its own thread.
                thread::spawn(move || {
                    if let Err(e) = handle_connection(stream, addr, handler.as_ref()) {
                        warn!(peer = %addr, error = %e, "connection handling failed");
                    }
                });
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(20));
            }
            Err(e) => {
                warn!(error = %e, "accept failed");
                thread::sleep(Duration::from_millis(20));
            }
        }
    }
}

fn handle_connection<H: Handler>(
    mut stream: TcpStream,
    addr: std::net::SocketAddr,
    handler: &H,
) -> Result<()> {
    stream.set_read_timeout(Some(Duration::from_secs(30)))?;
    let buf = read_frame(&mut stream).map_err(|e| {
        if e.kind() == std::io::ErrorKind::InvalidData {
            protocol("oversized frame (>= 1024 bytes)")
        } else {
            e.into()
        }
    })?;
    if buf.is_empty() {
        return Ok(());
    }
    let text = std::str::from_utf8(&buf).map_err(|e| protocol(format!("non-UTF-8 payload: {e}")))?;
    debug!(peer = %addr, payload = %text, "received message");
    if let Some(response) = handler.handle(addr, text) {
        stream.write_all(response.as_bytes())?;
    }
    Ok(())
}

/// Reads a single message off `stream` until the peer shuts down its write
/// half (the sender always half-closes after writing, see `request` below),
/// looping since one `read` call is not guaranteed to return a whole
/// message that arrived split across TCP segments. Empty return means a
/// peer that connected and closed without sending anything. Returns the raw
/// `io::Error` (rather than the workspace `Error`) so callers that need to
/// distinguish a read timeout, like `request`, still can.
fn read_frame<R: Read>(stream: &mut R) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 512];
    loop {
        let n = stream.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.len() >= MAX_FRAME {
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "oversized frame (>= 1024 bytes)"));
        }
    }
    Ok(buf)
}

/// Sends a message, fire-and-forget: connect, write, close. Used for
/// every control/continuation message that doesn't need a reply
/// (`release_permission`, `continue_consensus-...`, `consensus_over`,
/// `new_master_node|...`).
pub fn send(peer_ip: &str, port: u16, payload: &str) -> Result<()> {
    request(peer_ip, port, payload, Duration::from_millis(0)).map(|_| ())
}

/// Sends a message and waits up to `timeout` for a single response frame
/// on the same connection, returning `None` if the peer closes without
/// writing one. Used by `acquire_permission` (reply: `authorized_permission`)
/// and by the quorum initiator's synchronous forwarding.
///
/// `timeout` of zero means "don't wait for a reply at all" — used by the
/// fire-and-forget `send` above.
pub fn request(peer_ip: &str, port: u16, payload: &str, timeout: Duration) -> Result<Option<String>> {
    if payload.len() >= MAX_FRAME {
        return Err(protocol("outgoing payload too large (>= 1024 bytes)"));
    }
    let addr = (peer_ip, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| protocol(format!("unresolvable address: {peer_ip}:{port}")))?;
    let connect_timeout = if timeout.is_zero() {
        Duration::from_secs(5)
    } else {
        timeout
    };
    let mut stream = TcpStream::connect_timeout(&addr, connect_timeout)?;
    stream.write_all(payload.as_bytes())?;
    stream.shutdown(Shutdown::Write)?;

    if timeout.is_zero() {
        return Ok(None);
    }

    stream.set_read_timeout(Some(timeout))?;
    match read_frame(&mut stream) {
        Ok(buf) if buf.is_empty() => Ok(None),
        Ok(buf) => {
            let text = std::str::from_utf8(&buf).map_err(|e| protocol(format!("non-UTF-8 response: {e}")))?;
            Ok(Some(text.to_string()))
        }
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut => {
            Err(sucursal_base::transport(format!("timed out waiting for reply from {peer_ip}")))
        }
        Err(e) if e.kind() == std::io::ErrorKind::InvalidData => Err(protocol("oversized reply (>= 1024 bytes)")),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn echoes_and_closes() {
        let bound = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = bound.local_addr().unwrap().port();
        drop(bound);

        let (tx, rx) = mpsc::channel();
        let handler = move |_peer: std::net::SocketAddr, payload: &str| {
            tx.send(payload.to_string()).unwrap();
            Some("authorized_permission".to_string())
        };
        let mut l = Listener::spawn("127.0.0.1", port, handler).unwrap();
        let response = request("127.0.0.1", port, "acquire_permission", Duration::from_secs(2)).unwrap();
        assert_eq!(response.as_deref(), Some("authorized_permission"));
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), "acquire_permission");
        l.stop();
    }

    #[test]
    fn fire_and_forget_does_not_block_on_missing_reply() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let mut l = Listener::spawn("127.0.0.1", port, |_peer, _payload: &str| None).unwrap();
        send("127.0.0.1", port, "release_permission").unwrap();
        l.stop();
    }

    #[test]
    fn read_frame_assembles_a_message_sent_in_several_writes() {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            tx.send(listener.local_addr().unwrap().port()).unwrap();
            let (mut stream, _) = listener.accept().unwrap();
            for chunk in ["create_clien", "te|alice|", "a@b.com|123"] {
                stream.write_all(chunk.as_bytes()).unwrap();
                thread::sleep(Duration::from_millis(20));
            }
        });
        let port = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let buf = read_frame(&mut stream).unwrap();
        assert_eq!(buf, b"create_cliente|alice|a@b.com|123");
    }

    #[test]
    fn connection_refused_when_nothing_listening() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let err = request("127.0.0.1", port, "acquire_permission", Duration::from_millis(200)).unwrap_err();
        assert_eq!(err.kind(), sucursal_base::ErrorKind::Transport);
    }
}
