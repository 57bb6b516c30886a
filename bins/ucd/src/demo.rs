//! Trivial collaborator implementations for exercising the router from
//! the command line without a real container manager attached.
//!
//! A single synthetic container is modeled; cgroup policy always
//! allows, id-shift and token handling are no-ops. Not meant to stand
//! in for a production embedder — see `uevent_router::collaborators`.

use std::path::PathBuf;

use uevent_router::collaborators::{
    CgroupDevicePolicy, ContainerId, ContainerRegistry, ContainerState, IdShift, NetworkOps,
    PhysNetifRegistry, TokenSubsystem,
};
use uevent_router::netlink::Result;

pub const DEMO_CONTAINER: ContainerId = ContainerId(0);

pub struct DemoRegistry {
    pub uuid: String,
    pub pid: u32,
    pub rootdir: PathBuf,
}

impl ContainerRegistry for DemoRegistry {
    fn get_by_uuid(&self, uuid: &str) -> Option<ContainerId> {
        (uuid == self.uuid).then_some(DEMO_CONTAINER)
    }

    fn get_by_index(&self, index: usize) -> Option<ContainerId> {
        (index == 0).then_some(DEMO_CONTAINER)
    }

    fn get_count(&self) -> usize {
        1
    }

    fn get_c0(&self) -> Option<ContainerId> {
        Some(DEMO_CONTAINER)
    }

    fn get_state(&self, _container: ContainerId) -> Option<ContainerState> {
        Some(ContainerState::Running)
    }

    fn get_pid(&self, _container: ContainerId) -> Option<u32> {
        Some(self.pid)
    }

    fn get_rootdir(&self, _container: ContainerId) -> Option<PathBuf> {
        Some(self.rootdir.clone())
    }

    fn has_userns(&self, _container: ContainerId) -> bool {
        false
    }

    fn get_name(&self, _container: ContainerId) -> Option<String> {
        Some("demo".to_string())
    }

    fn get_uuid(&self, _container: ContainerId) -> Option<String> {
        Some(self.uuid.clone())
    }
}

#[derive(Default)]
pub struct AllowAllCgroup;

impl CgroupDevicePolicy for AllowAllCgroup {
    fn device_allow(&self, _container: ContainerId, _major: i32, _minor: i32, _assign: bool) -> Result<()> {
        Ok(())
    }

    fn device_deny(&self, _container: ContainerId, _major: i32, _minor: i32) -> Result<()> {
        Ok(())
    }

    fn is_device_allowed(&self, _container: ContainerId, _major: i32, _minor: i32) -> bool {
        true
    }
}

#[derive(Default)]
pub struct NoopIdShift;

impl IdShift for NoopIdShift {
    fn shift_node(&self, _container: ContainerId, _path: &std::path::Path) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
pub struct NoopTokens;

impl TokenSubsystem for NoopTokens {
    fn token_detach(&self, _devpath: &str) -> bool {
        false
    }

    fn token_attach(&self, _serial: &str, _devpath: &str) -> bool {
        false
    }
}

#[derive(Default)]
pub struct NoopPhys;

impl PhysNetifRegistry for NoopPhys {
    fn netif_phys_add(&self, _name: &str) {}
    fn netif_phys_remove(&self, _name: &str) {}
    fn netif_phys_list(&self) -> Vec<String> {
        Vec::new()
    }
}

#[derive(Default)]
pub struct NoopNetworkOps;

impl NetworkOps for NoopNetworkOps {
    fn mac_of_interface(&self, _name: &str) -> Option<[u8; 6]> {
        None
    }

    fn rename_interface(&self, _old: &str, _new: &str) -> Result<()> {
        Ok(())
    }

    fn is_wifi(&self, _name: &str) -> bool {
        false
    }

    fn attach_to_netns(&self, _name: &str, _pid: u32) -> Result<()> {
        Ok(())
    }
}
