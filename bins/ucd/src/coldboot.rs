//! `coldboot` subcommand: trigger a `/sys/devices` walk for a demo
//! container, writing `add <uuid>` into matching `uevent` files.

use clap::Args;
use uevent_router::netlink::Result;
use uevent_router::router::UeventRouter;

use crate::demo::{AllowAllCgroup, DemoRegistry, DEMO_CONTAINER, NoopIdShift, NoopNetworkOps, NoopPhys, NoopTokens};

#[derive(Args)]
pub struct ColdbootArgs {
    /// UUID the synthesized events should carry as SYNTH_UUID
    #[arg(long)]
    uuid: String,

    /// PID of the target container's init process
    #[arg(long)]
    pid: u32,

    /// Container root filesystem (unused by coldboot itself, required to
    /// construct the demo registry)
    #[arg(long, default_value = "/")]
    rootdir: String,
}

pub async fn run(args: ColdbootArgs) -> Result<()> {
    let registry = DemoRegistry {
        uuid: args.uuid.clone(),
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
        false,
    )?;

    router.udev_trigger_coldboot(DEMO_CONTAINER).await?;
    tracing::info!(uuid = %args.uuid, "coldboot scan complete");
    Ok(())
}
