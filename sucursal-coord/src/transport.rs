use std::time::Duration;

use sucursal_base::Result;

/// What the coordinator needs from the network: fire-and-forget `send` for
/// every control/continuation message, and a synchronous `request` for
/// `acquire_permission`'s `authorized_permission` reply. `sucursal-net`
/// provides the real TCP implementation; tests substitute an in-process
/// double so the six scenarios in spec §8 run deterministically without a
/// socket or a toolchain.
pub trait Transport: Send + Sync {
    fn send(&self, ip: &str, port: u16, payload: &str) -> Result<()>;
    fn request(&self, ip: &str, port: u16, payload: &str, timeout: Duration) -> Result<Option<String>>;
}

/// The production transport: a fresh outbound TCP connection per call,
/// exactly as `sucursal-net` provides it (spec §9: "no persistent peer
/// objects").
pub struct TcpTransport;

impl Transport for TcpTransport {
    fn send(&self, ip: &str, port: u16, payload: &str) -> Result<()> {
        sucursal_net::send(ip, port, payload)
    }

    fn request(&self, ip: &str, port: u16, payload: &str, timeout: Duration) -> Result<Option<String>> {
        sucursal_net::request(ip, port, payload, timeout)
    }
}
