//! `run` subcommand: drive the real kernel uevent socket and fan every
//! event out to a single demo container. Requires `CAP_NET_ADMIN` to
//! join the uevent multicast group and `CAP_MKNOD`/`CAP_SYS_ADMIN` for
//! the device-node and netns side effects to actually take hold.

use clap::Args;
use uevent_router::netlink::Result;
use uevent_router::router::UeventRouter;

use crate::demo::{AllowAllCgroup, DemoRegistry, NoopIdShift, NoopNetworkOps, NoopPhys, NoopTokens};

#[derive(Args)]
pub struct RunArgs {
    /// UUID to answer to for SYNTH_UUID-routed events
    #[arg(long, default_value = "demo")]
    uuid: String,

    /// PID the demo container's events are delivered into
    #[arg(long)]
    pid: u32,

    /// Container root filesystem, for device-node creation
    #[arg(long)]
    rootdir: String,

    /// Suppress the physical-NIC fast path (spec.md §4.G)
    #[arg(long)]
    hosted_mode: bool,
}

pub async fn run(args: RunArgs) -> Result<()> {
    let registry = DemoRegistry {
        uuid: args.uuid,
        pid: args.pid,
        rootdir: args.rootdir.into(),
    };
    let router = UeventRouter::init(
        registry,
        AllowAllCgroup,
        NoopIdShift,
        NoopTokens,
        NoopPhys,
        NoopNetworkOps,
        args.hosted_mode,
    )?;

    tracing::info!(pid = args.pid, "ucd demo router starting");
    router.run().await
}
