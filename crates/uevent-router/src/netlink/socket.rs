//! Low-level async netlink socket operations.

use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicU32, Ordering};
use std::task::{Context, Poll};

use bytes::BytesMut;
use netlink_sys::{Socket, SocketAddr, protocols};
use tokio::io::Interest;
use tokio::io::unix::AsyncFd;

use super::error::Result;

/// Scan `/proc` for a running `systemd-udevd` or `udevd` with parent pid
/// 1 (spec.md §6 "Environment"), preferring `systemd-udevd` since a host
/// never runs both at once.
pub fn find_peer_udevd_pid() -> Option<u32> {
    find_proc_by_comm_and_ppid("systemd-udevd", 1).or_else(|| find_proc_by_comm_and_ppid("udevd", 1))
}

fn find_proc_by_comm_and_ppid(comm: &str, want_ppid: u32) -> Option<u32> {
    let entries = std::fs::read_dir("/proc").ok()?;
    for entry in entries.flatten() {
        let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) else {
            continue;
        };
        let Ok(stat) = std::fs::read_to_string(format!("/proc/{pid}/stat")) else {
            continue;
        };
        if let Some((found_comm, ppid)) = parse_stat_comm_ppid(&stat) {
            if found_comm == comm && ppid == want_ppid {
                return Some(pid);
            }
        }
    }
    None
}

/// The portid to request for our own netlink socket: our own pid,
/// unless that happens to collide with `peer_pid`, in which case `0`
/// asks the kernel to autobind instead.
fn preferred_portid(peer_pid: Option<u32>) -> u32 {
    let own = std::process::id();
    match peer_pid {
        Some(p) if p == own => 0,
        _ => own,
    }
}

/// Parse the `comm` and `ppid` fields out of a `/proc/<pid>/stat` line.
/// `comm` is parenthesized and may itself contain spaces or parens, so
/// it's located by the outermost paren pair rather than whitespace
/// splitting.
fn parse_stat_comm_ppid(stat: &str) -> Option<(&str, u32)> {
    let open = stat.find('(')?;
    let close = stat.rfind(')')?;
    if close <= open {
        return None;
    }
    let comm = &stat[open + 1..close];
    let mut fields = stat[close + 1..].split_whitespace();
    let _state = fields.next()?;
    let ppid = fields.next()?.parse().ok()?;
    Some((comm, ppid))
}

/// Netlink protocol families this crate speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Kernel hotplug uevents (`NETLINK_KOBJECT_UEVENT`).
    KobjectUevent,
}

impl Protocol {
    fn as_isize(self) -> isize {
        match self {
            Protocol::KobjectUevent => protocols::NETLINK_KOBJECT_UEVENT,
        }
    }
}

/// Multicast group carrying kernel hotplug uevents.
///
/// The kernel always delivers these to sockets bound in the initial
/// network namespace; there is no per-container uevent multicast group,
/// which is why the dispatcher's socket is never namespace-scoped.
pub const UEVENT_GROUP: u32 = 1;

/// Async netlink socket.
pub struct NetlinkSocket {
    /// The underlying async file descriptor.
    fd: AsyncFd<Socket>,
    /// Sequence number counter.
    seq: AtomicU32,
    /// Local port ID (assigned by kernel).
    pid: u32,
    /// Protocol this socket uses.
    protocol: Protocol,
}

impl NetlinkSocket {
    /// Create a new netlink socket for the given protocol, autobinding a
    /// portid distinct from any other socket on the host.
    pub fn new(protocol: Protocol) -> Result<Self> {
        Self::create_socket(protocol, None)
    }

    /// Create a new netlink socket for the given protocol, preferring to
    /// bind a portid distinct from `peer_pid` — the pid of a discovered
    /// peer udev daemon (spec.md §6 "Environment": `find_peer_udevd_pid`),
    /// so this socket and the peer's own uevent socket can never collide
    /// on the portid the kernel would otherwise pick for both from the
    /// same pool.
    pub fn new_with_peer(protocol: Protocol, peer_pid: Option<u32>) -> Result<Self> {
        Self::create_socket(protocol, peer_pid)
    }

    /// Internal helper to create the socket.
    fn create_socket(protocol: Protocol, peer_pid: Option<u32>) -> Result<Self> {
        let mut socket = Socket::new(protocol.as_isize())?;
        socket.set_non_blocking(true)?;

        let mut addr = SocketAddr::new(preferred_portid(peer_pid), 0);
        match socket.bind(&addr) {
            Ok(()) => {}
            // The preferred portid is taken (or collides with the peer);
            // fall back to letting the kernel autobind an unused one.
            Err(_) if peer_pid.is_some() => {
                addr = SocketAddr::new(0, 0);
                socket.bind(&addr)?;
            }
            Err(e) => return Err(e.into()),
        }
        socket.get_address(&mut addr)?;
        let pid = addr.port_number();

        // Enable extended ACK for better error messages
        socket.set_ext_ack(true).ok(); // Ignore if not supported

        let fd = AsyncFd::new(socket)?;

        Ok(Self {
            fd,
            seq: AtomicU32::new(1),
            pid,
            protocol,
        })
    }

    /// Get the next sequence number.
    pub fn next_seq(&self) -> u32 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Get the local port ID.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Get the protocol.
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Subscribe to multicast groups.
    pub fn add_membership(&mut self, group: u32) -> Result<()> {
        self.fd.get_mut().add_membership(group)?;
        Ok(())
    }

    /// Unsubscribe from multicast groups.
    pub fn drop_membership(&mut self, group: u32) -> Result<()> {
        self.fd.get_mut().drop_membership(group)?;
        Ok(())
    }

    /// Send a message.
    pub async fn send(&self, msg: &[u8]) -> Result<()> {
        loop {
            let mut guard = self.fd.ready(Interest::WRITABLE).await?;

            match guard.try_io(|inner| inner.get_ref().send(msg, 0)) {
                Ok(result) => {
                    result?;
                    return Ok(());
                }
                Err(_would_block) => continue,
            }
        }
    }

    /// Receive a message, allocating a buffer.
    pub async fn recv_msg(&self) -> Result<Vec<u8>> {
        // Allocate buffer with capacity - don't resize, let recv fill it
        let mut buf = BytesMut::with_capacity(32768);

        loop {
            let mut guard = self.fd.ready(Interest::READABLE).await?;

            match guard.try_io(|inner| inner.get_ref().recv(&mut buf, 0)) {
                Ok(result) => {
                    let _n = result?;
                    // buf has been advanced by recv, so buf[..] contains the data
                    return Ok(buf.to_vec());
                }
                Err(_would_block) => continue,
            }
        }
    }

    /// Poll for incoming data.
    ///
    /// This is the poll-based version of `recv_msg()` for use with `Stream` implementations.
    /// Returns `Poll::Ready(Ok(data))` when data is available.
    pub fn poll_recv(&self, cx: &mut Context<'_>) -> Poll<Result<Vec<u8>>> {
        let mut buf = BytesMut::with_capacity(32768);

        loop {
            let mut guard = match self.fd.poll_read_ready(cx) {
                Poll::Ready(Ok(guard)) => guard,
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e.into())),
                Poll::Pending => return Poll::Pending,
            };

            match guard.try_io(|inner| inner.get_ref().recv(&mut buf, 0)) {
                Ok(result) => match result {
                    Ok(_n) => return Poll::Ready(Ok(buf.to_vec())),
                    Err(e) => return Poll::Ready(Err(e.into())),
                },
                Err(_would_block) => continue,
            }
        }
    }
}

impl AsRawFd for NetlinkSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.get_ref().as_raw_fd()
    }
}
