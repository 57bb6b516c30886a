//! Kernel hotplug uevent router for a container manager.
//!
//! This crate listens for kernel hotplug uevents on a `NETLINK_KOBJECT_UEVENT`
//! socket, classifies them, and projects the ones that matter into guest
//! containers: creating device nodes, moving physical/virtual NICs into a
//! container's network namespace, and re-injecting the original frame so
//! that `udevd` inside the container sees it too.
//!
//! The container manager itself (container registry, cgroup device policy,
//! id-shifting, the token subsystem, the physical-NIC registry, and general
//! network helpers) is modeled as a set of traits in [`collaborators`] so
//! this crate builds and tests standalone; an embedder supplies the real
//! implementations and drives the router through [`router::UeventRouter`].
//!
//! # Example
//!
//! ```ignore
//! use uevent_router::router::UeventRouter;
//!
//! #[tokio::main]
//! async fn main() -> uevent_router::netlink::Result<()> {
//!     let router = UeventRouter::init(
//!         registry, cgroup, id_shift, tokens, phys, net_ops, /* hosted_mode */ false,
//!     )?;
//!     router.run().await
//! }
//! ```

pub mod codec;
pub mod coldboot;
pub mod collaborators;
pub mod device_node;
pub mod dispatcher;
pub mod injector;
pub mod netlink;
pub mod nic_mover;
pub mod routing;
pub mod router;
pub mod usb;

pub use netlink::{Error, Result};
pub use router::UeventRouter;
