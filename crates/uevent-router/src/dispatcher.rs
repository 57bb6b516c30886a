//! Top-level classifier: udev vs kernel framing, the action filter, the
//! USB short-circuit, synth-uuid routing, and the kernel handler's
//! NIC-move/fan-out decision (spec.md §4.G).
//!
//! Grounded on spec.md §4.G. `router::UeventRouter::run`'s read loop over
//! the netlink socket plays the role of the original's IO-readiness
//! callback; this module is that callback's body.

use std::sync::Arc;

use crate::codec::{self, UeventFrame};
use crate::collaborators::{
    CgroupDevicePolicy, ContainerRegistry, IdShift, NetworkOps, PhysNetifRegistry, TokenSubsystem,
};
use crate::device_node;
use crate::netlink::error::Result;
use crate::nic_mover::{self, RenameCounters};
use crate::routing::RoutingTables;
use crate::usb;

/// Every collaborator, the routing tables, and the rename counters the
/// dispatcher needs, bundled behind `Arc` so a NIC settle task can be
/// `tokio::spawn`ed without threading six generic parameters through the
/// call by hand.
pub struct RouterShared<R, C, I, T, P, N> {
    pub registry: Arc<R>,
    pub cgroup: Arc<C>,
    pub id_shift: Arc<I>,
    pub tokens: Arc<T>,
    pub phys: Arc<P>,
    pub net_ops: Arc<N>,
    pub tables: Arc<tokio::sync::Mutex<RoutingTables>>,
    pub counters: Arc<RenameCounters>,
    /// Hosted mode suppresses the physical-NIC fast path (spec.md §4.G
    /// kernel handler: "not in hosted mode").
    pub hosted_mode: bool,
}

impl<R, C, I, T, P, N> Clone for RouterShared<R, C, I, T, P, N> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            cgroup: self.cgroup.clone(),
            id_shift: self.id_shift.clone(),
            tokens: self.tokens.clone(),
            phys: self.phys.clone(),
            net_ops: self.net_ops.clone(),
            tables: self.tables.clone(),
            counters: self.counters.clone(),
            hosted_mode: self.hosted_mode,
        }
    }
}

/// Handle one frame received from the uevent netlink socket.
///
/// Never returns an error that should tear down the daemon: everything
/// this function can fail on (malformed framing, a target container
/// gone, a denied device) is logged and the event dropped, per spec.md
/// §7's propagation policy. The only propagated errors are parse
/// failures the caller should count for diagnostics.
pub async fn handle_message<R, C, I, T, P, N>(raw: Vec<u8>, shared: &RouterShared<R, C, I, T, P, N>) -> Result<()>
where
    R: ContainerRegistry + Send + Sync + 'static,
    C: CgroupDevicePolicy + Send + Sync + 'static,
    I: IdShift + Send + Sync + 'static,
    T: TokenSubsystem + Send + Sync + 'static,
    P: PhysNetifRegistry + Send + Sync + 'static,
    N: NetworkOps + Send + Sync + 'static,
{
    let frame = UeventFrame::from_raw(raw);
    let raw = frame.as_bytes();

    // Dispatcher step 2: udev-framed messages are parsed (to validate
    // magic/offsets) and traced, never forwarded.
    if raw.len() >= 7 && &raw[..7] == b"libudev" {
        codec::parse(&frame)?;
        codec::trace(&frame);
        return Ok(());
    }

    // Dispatcher step 3 + kernel handler's action filter.
    let view = codec::parse(&frame)?;
    if !matches!(view.action, "add" | "remove" | "change") {
        return Ok(());
    }

    if view.subsystem == "usb" && view.devtype == "usb_device" {
        let consumed = {
            let mut tables = shared.tables.lock().await;
            usb::dispatch(&view, &mut tables, &*shared.tokens, &*shared.cgroup)
        };
        if consumed {
            return Ok(());
        }
    }

    if !view.synth_uuid.is_empty() {
        if let Some(container) = shared.registry.get_by_uuid(view.synth_uuid) {
            let rewritten = codec::rewrite(&frame, view.synth_uuid.as_bytes(), b"0")?;
            let rewritten_view = codec::parse(&rewritten)?;
            if let Err(e) = device_node::project(
                &rewritten_view,
                rewritten.as_bytes().to_vec(),
                container,
                &*shared.registry,
                &*shared.cgroup,
                &*shared.id_shift,
            )
            .await
            {
                tracing::warn!(error = %e, "device-node projection for synth-uuid route failed");
            }
            return Ok(());
        }
    }

    if view.action == "add"
        && view.subsystem == "net"
        && !view.devpath.contains("virtual")
        && !shared.hosted_mode
    {
        shared.phys.netif_phys_add(view.interface);
        let owned_frame = frame.clone();
        let shared = shared.clone();
        tokio::spawn(async move {
            if let Err(e) = nic_mover::settle_and_move(
                owned_frame,
                &*shared.registry,
                &*shared.net_ops,
                &*shared.phys,
                &shared.tables,
                &*shared.counters,
            )
            .await
            {
                tracing::warn!(error = %e, "NIC move failed");
            }
        });
        return Ok(());
    }

    for container in shared.registry.iter() {
        if let Err(e) = device_node::project(
            &view,
            frame.as_bytes().to_vec(),
            container,
            &*shared.registry,
            &*shared.cgroup,
            &*shared.id_shift,
        )
        .await
        {
            tracing::warn!(error = %e, ?container, "device-node fan-out failed for one container");
        }
    }
    Ok(())
}
