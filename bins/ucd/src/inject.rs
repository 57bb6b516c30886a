//! `inject` subcommand: hand-build a kernel-framed uevent and re-emit it
//! inside a target pid's namespaces, bypassing the dispatcher entirely.
//! Useful for confirming a container's udev monitor sees what the
//! injector sends without waiting for a real hotplug event.

use clap::Args;
use uevent_router::injector::{self, InjectTarget};
use uevent_router::netlink::Result;

#[derive(Args)]
pub struct InjectArgs {
    /// PID of the target container's init process
    #[arg(long)]
    pid: u32,

    /// The container has its own user namespace
    #[arg(long)]
    has_userns: bool,

    /// Event action, e.g. "add"
    action: String,

    /// Sysfs devpath, e.g. "/devices/virtual/mem/null"
    devpath: String,

    /// Additional KEY=VALUE properties
    #[arg(value_parser = parse_property)]
    properties: Vec<(String, String)>,
}

fn parse_property(s: &str) -> std::result::Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("'{s}' is not KEY=VALUE"))
}

pub async fn run(args: InjectArgs) -> Result<()> {
    let mut raw = Vec::new();
    raw.extend_from_slice(args.action.as_bytes());
    raw.push(b'@');
    raw.extend_from_slice(args.devpath.as_bytes());
    raw.push(0);
    for (k, v) in &args.properties {
        raw.extend_from_slice(k.as_bytes());
        raw.push(b'=');
        raw.extend_from_slice(v.as_bytes());
        raw.push(0);
    }

    injector::inject(
        InjectTarget {
            pid: args.pid,
            has_userns: args.has_userns,
        },
        raw,
    )
    .await?;
    tracing::info!(pid = args.pid, action = %args.action, "injection complete");
    Ok(())
}
