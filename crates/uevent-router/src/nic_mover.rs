//! NIC mover: renames a fresh interface uniquely on the host, attaches it
//! to a container's netns, and forwards the mutated event.
//!
//! Grounded on spec.md §4.C. Two Open Questions are resolved here (see
//! DESIGN.md): the liveness check is a positive membership test
//! ([`ContainerState::accepts_nic_move`]), and the post-rename frame is
//! produced by chaining two `codec::rewrite` calls into one final frame
//! instead of discarding the first — the original's leaked second frame.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::codec::{self, UeventFrame, UeventView};
use crate::collaborators::{ContainerRegistry, NetworkOps, PhysNetifRegistry};
use crate::injector::{self, InjectTarget};
use crate::netlink::error::{Error, Result};
use crate::routing::{PnetCfg, RoutingTables};

/// Upper bound on 100 ms settle-timer retries before giving up on a wifi
/// interface that never reports ready (Design Notes §9: the original
/// repeats forever).
const MAX_SETTLE_RETRIES: u32 = 50;

/// Per-kind monotonic rename counters (`cml<kind><N>`), never reset for
/// the life of the process (Design Notes §9).
#[derive(Debug, Default)]
pub struct RenameCounters {
    wlan: AtomicU32,
    eth: AtomicU32,
}

impl RenameCounters {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_name(&self, devtype: &str) -> String {
        if devtype == "wlan" {
            let n = self.wlan.fetch_add(1, Ordering::Relaxed);
            format!("cmlwlan{n}")
        } else {
            let n = self.eth.fetch_add(1, Ordering::Relaxed);
            format!("cmleth{n}")
        }
    }
}

/// Steps 1–7 of the move contract (spec.md §4.C), given a view already
/// known to describe a live `net add` event on a non-virtual devpath.
pub async fn move_interface<R, N, P>(
    frame: &UeventFrame,
    view: &UeventView<'_>,
    registry: &R,
    net_ops: &N,
    phys: &P,
    tables: &RoutingTables,
    counters: &RenameCounters,
) -> Result<()>
where
    R: ContainerRegistry,
    N: NetworkOps,
    P: PhysNetifRegistry,
{
    let old_name = if view.interface.is_empty() {
        view.devname
    } else {
        view.interface
    };
    if old_name.is_empty() {
        return Err(Error::MalformedFrame(
            "net add event carries no interface name".into(),
        ));
    }

    // Step 1.
    let mac = net_ops.mac_of_interface(old_name).ok_or_else(|| {
        Error::TransientIo {
            operation: format!("reading MAC of {old_name}"),
            source: std::io::Error::new(std::io::ErrorKind::Other, "interface has no MAC"),
        }
    })?;

    // Step 2.
    let (container, pnet_cfg) = match tables.find_net_by_mac(mac) {
        Some(mapping) => (mapping.container, mapping.pnet_cfg.clone()),
        None => {
            let c0 = registry.get_c0().ok_or(Error::TargetGone)?;
            // Step 3: no mapping, synthesize a pnet_cfg from the event.
            (c0, PnetCfg::new(old_name, false))
        }
    };
    let state = registry.get_state(container).ok_or(Error::TargetGone)?;
    if !state.accepts_nic_move() {
        return Err(Error::TargetGone);
    }

    // Step 4: rename on the host and merge both frame rewrites.
    let new_name = counters.next_name(view.devtype);
    let frame_to_send = if net_ops.rename_interface(old_name, &new_name).is_ok() {
        phys.netif_phys_remove(old_name);
        phys.netif_phys_add(&new_name);
        merge_rename(frame, view, old_name, &new_name).unwrap_or_else(|_| frame.clone())
    } else {
        frame.clone()
    };

    // Step 5.
    let pid = registry.get_pid(container).ok_or(Error::TargetGone)?;
    net_ops.attach_to_netns(&new_name, pid)?;

    // Step 6.
    if pnet_cfg.mac_filter {
        return Ok(());
    }

    // Step 7.
    let has_userns = registry.has_userns(container);
    injector::inject(
        InjectTarget { pid, has_userns },
        frame_to_send.as_bytes().to_vec(),
    )
    .await
}

/// Substitute `old_name` with `new_name` everywhere it appears as a
/// recognized property value (`INTERFACE`, and the occurrence within
/// `DEVPATH`), chaining the rewrites into a single final frame rather
/// than producing two frames and using only one.
fn merge_rename(
    frame: &UeventFrame,
    view: &UeventView<'_>,
    old_name: &str,
    new_name: &str,
) -> Result<UeventFrame> {
    let mut current = frame.clone();

    if !view.interface.is_empty() {
        current = codec::rewrite(&current, view.interface.as_bytes(), new_name.as_bytes())?;
    }

    let reparsed = codec::parse(&current)?;
    match reparsed.devpath.find(old_name) {
        Some(pos) => {
            let old_slice = &reparsed.devpath.as_bytes()[pos..pos + old_name.len()];
            current = codec::rewrite(&current, old_slice, new_name.as_bytes())?;
        }
        // spec.md §4.C step 4: both substitutions must succeed or neither
        // applies. Erroring here (rather than returning the
        // interface-only rewrite) lets the caller's fallback restore the
        // untouched original frame instead of forwarding one with a
        // renamed INTERFACE but a stale DEVPATH.
        None => {
            return Err(Error::MalformedFrame(format!(
                "devpath {:?} has no occurrence of interface name {old_name:?} to rename",
                reparsed.devpath
            )));
        }
    }

    Ok(current)
}

/// Drive the 100 ms settle timer (spec.md §4.C "Timer"): re-check
/// `devtype == "wlan"` readiness via sysfs on each tick, bounded to
/// [`MAX_SETTLE_RETRIES`] attempts, then perform the move.
///
/// `tables` is locked only for the final `move_interface` call, not held
/// across ticks, so the administrative API can still register/unregister
/// mappings while a NIC is settling.
pub async fn settle_and_move<R, N, P>(
    frame: UeventFrame,
    registry: &R,
    net_ops: &N,
    phys: &P,
    tables: &Arc<tokio::sync::Mutex<RoutingTables>>,
    counters: &RenameCounters,
) -> Result<()>
where
    R: ContainerRegistry,
    N: NetworkOps,
    P: PhysNetifRegistry,
{
    let mut ticker = tokio::time::interval(std::time::Duration::from_millis(100));
    ticker.tick().await; // the first tick fires immediately; consume it

    for _ in 0..MAX_SETTLE_RETRIES {
        let view = codec::parse(&frame)?;
        if view.devtype == "wlan" && !net_ops.is_wifi(view.interface) {
            ticker.tick().await;
            continue;
        }
        let tables = tables.lock().await;
        return move_interface(&frame, &view, registry, net_ops, phys, &tables, counters).await;
    }

    tracing::warn!(
        interface = %codec::parse(&frame).map(|v| v.interface).unwrap_or_default(),
        retries = MAX_SETTLE_RETRIES,
        "NIC settle timer exhausted retries without detecting wifi readiness"
    );
    Err(Error::TargetGone)
}
