//! The router singleton: owns the kernel-uevent netlink socket and the
//! routing tables, drives the main read loop, and exposes the
//! administrative API (spec.md §5, §6).
//!
//! Grounded on the original's single owning struct that bundles a
//! netlink socket with its protocol state (`netlink/socket.rs`'s
//! `NetlinkSocket`), generalized to also own the collaborator set.

use std::sync::Arc;

use crate::coldboot;
use crate::collaborators::{
    CgroupDevicePolicy, ContainerId, ContainerRegistry, IdShift, NetworkOps, PhysNetifRegistry,
    TokenSubsystem,
};
use crate::dispatcher::{self, RouterShared};
use crate::netlink::error::Result;
use crate::netlink::{NetlinkSocket, Protocol, UEVENT_GROUP, find_peer_udevd_pid};
use crate::nic_mover::RenameCounters;
use crate::routing::{PnetCfg, RoutingTables, UsbDevice};

/// The uevent router. Generic over the six collaborator traits so an
/// embedder can plug in its own container manager without this crate
/// depending on it directly (spec.md §1).
pub struct UeventRouter<R, C, I, T, P, N> {
    socket: NetlinkSocket,
    shared: RouterShared<R, C, I, T, P, N>,
}

impl<R, C, I, T, P, N> UeventRouter<R, C, I, T, P, N>
where
    R: ContainerRegistry + Send + Sync + 'static,
    C: CgroupDevicePolicy + Send + Sync + 'static,
    I: IdShift + Send + Sync + 'static,
    T: TokenSubsystem + Send + Sync + 'static,
    P: PhysNetifRegistry + Send + Sync + 'static,
    N: NetworkOps + Send + Sync + 'static,
{
    /// Open the netlink socket and join the kernel uevent multicast
    /// group (spec.md §4.A). `hosted_mode` disables the physical-NIC
    /// fast path (spec.md §4.G).
    ///
    /// Before binding, discovers a peer `systemd-udevd`/`udevd` daemon
    /// under `/proc` (spec.md §6 "Environment") and prefers a portid
    /// distinct from it.
    pub fn init(registry: R, cgroup: C, id_shift: I, tokens: T, phys: P, net_ops: N, hosted_mode: bool) -> Result<Self> {
        let peer_udevd_pid = find_peer_udevd_pid();
        if let Some(pid) = peer_udevd_pid {
            tracing::debug!(pid, "found peer udev daemon");
        }
        let mut socket = NetlinkSocket::new_with_peer(Protocol::KobjectUevent, peer_udevd_pid)?;
        socket.add_membership(UEVENT_GROUP)?;

        Ok(Self {
            socket,
            shared: RouterShared {
                registry: Arc::new(registry),
                cgroup: Arc::new(cgroup),
                id_shift: Arc::new(id_shift),
                tokens: Arc::new(tokens),
                phys: Arc::new(phys),
                net_ops: Arc::new(net_ops),
                tables: Arc::new(tokio::sync::Mutex::new(RoutingTables::new())),
                counters: Arc::new(RenameCounters::new()),
                hosted_mode,
            },
        })
    }

    /// Leave the multicast group. The socket itself closes on drop.
    pub fn deinit(&mut self) -> Result<()> {
        self.socket.drop_membership(UEVENT_GROUP)
    }

    /// Run the main event loop (spec.md §5): read one frame, hand it to
    /// the dispatcher, repeat. Parse failures on the socket itself
    /// (truncated reads, kernel errors) are logged and the loop
    /// continues — only a protocol-fatal condition propagates.
    pub async fn run(&self) -> Result<()> {
        loop {
            let raw = match self.socket.recv_msg().await {
                Ok(raw) => raw,
                Err(e) if e.is_recoverable() => {
                    tracing::warn!(error = %e, "transient netlink read failure");
                    continue;
                }
                Err(e) => return Err(e),
            };

            if let Err(e) = dispatcher::handle_message(raw, &self.shared).await {
                tracing::warn!(error = %e, "dropping unparsable uevent frame");
            }
        }
    }

    /// Walk `/sys/devices` and synthesize `add <uuid>` events for every
    /// device already present, so `container` sees the devices that
    /// existed before it started (spec.md §4.H), run off the blocking
    /// thread pool.
    pub async fn udev_trigger_coldboot(&self, container: ContainerId) -> Result<()> {
        coldboot::trigger(container, &self.shared).await
    }

    /// Register a USB device for pass-through to `container` (spec.md
    /// §6). Idempotent by identity.
    pub async fn register_usbdevice(&self, container: ContainerId, usbdev: UsbDevice) {
        self.shared.tables.lock().await.register_usb(container, usbdev);
    }

    /// Unregister by identity; returns whether an entry was removed.
    pub async fn unregister_usbdevice(
        &self,
        container: ContainerId,
        id_vendor: u16,
        id_product: u16,
        i_serial: &str,
    ) -> bool {
        self.shared
            .tables
            .lock()
            .await
            .unregister_usb(container, id_vendor, id_product, i_serial)
    }

    /// Register a NET mapping for `container`. Fails with
    /// `RegistrationInvalid` if `pnet_cfg.pnet_name` is not a MAC
    /// address (spec.md §6).
    pub async fn register_netdev(&self, container: ContainerId, pnet_cfg: PnetCfg) -> Result<()> {
        self.shared.tables.lock().await.register_net(container, pnet_cfg)
    }

    /// Unregister by (container, mac); returns whether an entry was
    /// removed.
    pub async fn unregister_netdev(&self, container: ContainerId, mac: [u8; 6]) -> bool {
        self.shared.tables.lock().await.unregister_net(container, mac)
    }
}
