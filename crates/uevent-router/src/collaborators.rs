//! Trait boundary for every external interface this subsystem consumes
//! but does not own: the container registry, cgroup device policy,
//! id-shift, the token subsystem, the physical-NIC registry, and general
//! network helpers (spec.md §1, "out of scope").
//!
//! A production embedder implements these traits against its own
//! container manager; the [`fake`] submodule provides in-memory doubles
//! so this crate's own tests (§8's scenarios) run standalone.

use std::path::PathBuf;

use crate::netlink::error::Result;

/// Opaque handle to a container, analogous to the original's
/// `container_t*` pointer. Never dereferenced by this crate; always
/// passed back to a [`ContainerRegistry`] to resolve state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContainerId(pub u32);

/// Lifecycle states a container can be in, as reported by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Stopped,
    Starting,
    Booting,
    Setup,
    Running,
    Shutdown,
    Rebooting,
    Zombie,
}

impl ContainerState {
    /// Whether the NIC mover should target a container in this state
    /// (spec.md §4.C step 2: `{BOOTING, RUNNING, STARTING}`).
    ///
    /// The original source tests this with a chain of `!=` conditions
    /// that is always true; this is a positive membership test instead.
    pub fn accepts_nic_move(self) -> bool {
        matches!(
            self,
            ContainerState::Booting | ContainerState::Running | ContainerState::Starting
        )
    }

    /// Whether the device-node projector should target a container in
    /// this state (spec.md §4.D: `{BOOTING, RUNNING, SETUP}`).
    pub fn accepts_device_node(self) -> bool {
        matches!(
            self,
            ContainerState::Booting | ContainerState::Running | ContainerState::Setup
        )
    }
}

/// The container registry: lookup and metadata queries the router needs
/// but never mutates.
///
/// `Send + Sync` so `router::UeventRouter` can hold it behind an `Arc`
/// and share it with the `tokio::spawn`ed NIC settle tasks.
pub trait ContainerRegistry: Send + Sync {
    fn get_by_uuid(&self, uuid: &str) -> Option<ContainerId>;
    fn get_by_index(&self, index: usize) -> Option<ContainerId>;
    fn get_count(&self) -> usize;
    /// The primary guest container, used as the NIC mover's fallback
    /// target when no NetMapping matches.
    fn get_c0(&self) -> Option<ContainerId>;
    fn get_state(&self, container: ContainerId) -> Option<ContainerState>;
    fn get_pid(&self, container: ContainerId) -> Option<u32>;
    fn get_rootdir(&self, container: ContainerId) -> Option<PathBuf>;
    fn has_userns(&self, container: ContainerId) -> bool;
    fn get_name(&self, container: ContainerId) -> Option<String>;
    fn get_uuid(&self, container: ContainerId) -> Option<String>;

    /// All registered containers, for the dispatcher's fan-out path.
    fn iter(&self) -> Vec<ContainerId> {
        (0..self.get_count())
            .filter_map(|i| self.get_by_index(i))
            .collect()
    }
}

/// The cgroup device allow/deny actuator.
///
/// Takes `&self`: a production implementation wraps whatever locking its
/// own cgroup writer needs, since the NIC settle timer (§4.C) may hold a
/// shared reference to this trait across an `.await` point alongside the
/// dispatcher's own use of it.
pub trait CgroupDevicePolicy: Send + Sync {
    fn device_allow(&self, container: ContainerId, major: i32, minor: i32, assign: bool) -> Result<()>;
    fn device_deny(&self, container: ContainerId, major: i32, minor: i32) -> Result<()>;
    fn is_device_allowed(&self, container: ContainerId, major: i32, minor: i32) -> bool;
}

/// Ownership translation for device nodes created inside a container's
/// user-namespace-shifted rootfs.
pub trait IdShift: Send + Sync {
    fn shift_node(&self, container: ContainerId, path: &std::path::Path) -> Result<()>;
}

/// The token attach/detach subsystem, consulted before USB devices are
/// routed through the cgroup device policy.
pub trait TokenSubsystem: Send + Sync {
    /// Returns `true` if `devpath` identified a registered token device
    /// and it was detached (the event is then fully consumed).
    fn token_detach(&self, devpath: &str) -> bool;
    /// Returns `true` if `serial`/`devpath` identified a token device and
    /// it was attached (the event is then fully consumed).
    fn token_attach(&self, serial: &str, devpath: &str) -> bool;
}

/// The host's registry of physical network interfaces, updated as NICs
/// are renamed and moved into containers.
pub trait PhysNetifRegistry: Send + Sync {
    fn netif_phys_add(&self, name: &str);
    fn netif_phys_remove(&self, name: &str);
    fn netif_phys_list(&self) -> Vec<String>;
}

/// Host-side network operations: MAC lookup, interface rename, wifi
/// detection, and netns attach.
pub trait NetworkOps: Send + Sync {
    fn mac_of_interface(&self, name: &str) -> Option<[u8; 6]>;
    fn rename_interface(&self, old: &str, new: &str) -> Result<()>;
    /// Whether sysfs currently reports `name` as a wifi device. Used by
    /// the NIC settle timer (spec.md §4.C "Timer").
    fn is_wifi(&self, name: &str) -> bool;
    /// Move `name` into the network namespace of `pid`.
    fn attach_to_netns(&self, name: &str, pid: u32) -> Result<()>;
}

/// In-memory test doubles for every collaborator trait, used by this
/// crate's own unit tests so the testable properties in spec.md §8 can be
/// exercised without root or a live kernel.
#[cfg(test)]
pub mod fake {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// A single fake container's metadata.
    #[derive(Debug, Clone)]
    pub struct FakeContainer {
        pub uuid: String,
        pub name: String,
        pub state: ContainerState,
        pub pid: u32,
        pub rootdir: PathBuf,
        pub has_userns: bool,
    }

    #[derive(Debug, Default)]
    pub struct FakeRegistry {
        containers: Vec<FakeContainer>,
        c0: Option<ContainerId>,
    }

    impl FakeRegistry {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn add(&mut self, container: FakeContainer) -> ContainerId {
            let id = ContainerId(self.containers.len() as u32);
            self.containers.push(container);
            id
        }

        pub fn set_c0(&mut self, id: ContainerId) {
            self.c0 = Some(id);
        }

        pub fn set_state(&mut self, id: ContainerId, state: ContainerState) {
            self.containers[id.0 as usize].state = state;
        }
    }

    impl ContainerRegistry for FakeRegistry {
        fn get_by_uuid(&self, uuid: &str) -> Option<ContainerId> {
            self.containers
                .iter()
                .position(|c| c.uuid == uuid)
                .map(|i| ContainerId(i as u32))
        }

        fn get_by_index(&self, index: usize) -> Option<ContainerId> {
            if index < self.containers.len() {
                Some(ContainerId(index as u32))
            } else {
                None
            }
        }

        fn get_count(&self) -> usize {
            self.containers.len()
        }

        fn get_c0(&self) -> Option<ContainerId> {
            self.c0
        }

        fn get_state(&self, container: ContainerId) -> Option<ContainerState> {
            self.containers.get(container.0 as usize).map(|c| c.state)
        }

        fn get_pid(&self, container: ContainerId) -> Option<u32> {
            self.containers.get(container.0 as usize).map(|c| c.pid)
        }

        fn get_rootdir(&self, container: ContainerId) -> Option<PathBuf> {
            self.containers
                .get(container.0 as usize)
                .map(|c| c.rootdir.clone())
        }

        fn has_userns(&self, container: ContainerId) -> bool {
            self.containers
                .get(container.0 as usize)
                .is_some_and(|c| c.has_userns)
        }

        fn get_name(&self, container: ContainerId) -> Option<String> {
            self.containers
                .get(container.0 as usize)
                .map(|c| c.name.clone())
        }

        fn get_uuid(&self, container: ContainerId) -> Option<String> {
            self.containers
                .get(container.0 as usize)
                .map(|c| c.uuid.clone())
        }
    }

    #[derive(Debug, Default)]
    pub struct FakeCgroup {
        pub allowed: Mutex<HashMap<(ContainerId, i32, i32), bool>>,
        pub allow_calls: Mutex<Vec<(ContainerId, i32, i32, bool)>>,
        pub deny_calls: Mutex<Vec<(ContainerId, i32, i32)>>,
    }

    impl FakeCgroup {
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl CgroupDevicePolicy for FakeCgroup {
        fn device_allow(&self, container: ContainerId, major: i32, minor: i32, assign: bool) -> Result<()> {
            self.allowed.lock().unwrap().insert((container, major, minor), true);
            self.allow_calls.lock().unwrap().push((container, major, minor, assign));
            Ok(())
        }

        fn device_deny(&self, container: ContainerId, major: i32, minor: i32) -> Result<()> {
            self.allowed.lock().unwrap().remove(&(container, major, minor));
            self.deny_calls.lock().unwrap().push((container, major, minor));
            Ok(())
        }

        fn is_device_allowed(&self, container: ContainerId, major: i32, minor: i32) -> bool {
            self.allowed
                .lock()
                .unwrap()
                .get(&(container, major, minor))
                .copied()
                .unwrap_or(true)
        }
    }

    #[derive(Debug, Default)]
    pub struct FakeIdShift;

    impl IdShift for FakeIdShift {
        fn shift_node(&self, _container: ContainerId, _path: &std::path::Path) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Debug, Default)]
    pub struct FakeTokenSubsystem {
        pub tokens: Mutex<Vec<String>>,
    }

    impl FakeTokenSubsystem {
        pub fn with_tokens(tokens: impl IntoIterator<Item = impl Into<String>>) -> Self {
            Self {
                tokens: Mutex::new(tokens.into_iter().map(Into::into).collect()),
            }
        }
    }

    impl TokenSubsystem for FakeTokenSubsystem {
        fn token_detach(&self, devpath: &str) -> bool {
            let mut tokens = self.tokens.lock().unwrap();
            if let Some(pos) = tokens.iter().position(|p| p == devpath) {
                tokens.remove(pos);
                true
            } else {
                false
            }
        }

        fn token_attach(&self, _serial: &str, devpath: &str) -> bool {
            let mut tokens = self.tokens.lock().unwrap();
            if tokens.iter().any(|p| p == devpath) {
                tokens.push(devpath.to_string());
                true
            } else {
                false
            }
        }
    }

    #[derive(Debug, Default)]
    pub struct FakePhysNetifRegistry {
        pub names: Mutex<Vec<String>>,
    }

    impl PhysNetifRegistry for FakePhysNetifRegistry {
        fn netif_phys_add(&self, name: &str) {
            self.names.lock().unwrap().push(name.to_string());
        }

        fn netif_phys_remove(&self, name: &str) {
            self.names.lock().unwrap().retain(|n| n != name);
        }

        fn netif_phys_list(&self) -> Vec<String> {
            self.names.lock().unwrap().clone()
        }
    }

    #[derive(Debug, Default)]
    pub struct FakeNetworkOps {
        pub macs: HashMap<String, [u8; 6]>,
        pub wifi: HashMap<String, bool>,
        pub renames: Mutex<Vec<(String, String)>>,
        pub attaches: Mutex<Vec<(String, u32)>>,
    }

    impl FakeNetworkOps {
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl NetworkOps for FakeNetworkOps {
        fn mac_of_interface(&self, name: &str) -> Option<[u8; 6]> {
            self.macs.get(name).copied()
        }

        fn rename_interface(&self, old: &str, new: &str) -> Result<()> {
            self.renames.lock().unwrap().push((old.to_string(), new.to_string()));
            Ok(())
        }

        fn is_wifi(&self, name: &str) -> bool {
            self.wifi.get(name).copied().unwrap_or(false)
        }

        fn attach_to_netns(&self, name: &str, pid: u32) -> Result<()> {
            self.attaches.lock().unwrap().push((name.to_string(), pid));
            Ok(())
        }
    }
}
