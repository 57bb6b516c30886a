//! Device-node projector: creates or removes a character/block device
//! node inside a container's root filesystem and forwards the event.
//!
//! Grounded on spec.md §4.D. `mknod`/`makedev` are raw `libc` calls the
//! way the injector (`injector.rs`) and the teacher's `netlink/socket.rs`
//! already reach for `libc` where std has no equivalent.

use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

use crate::codec::UeventView;
use crate::collaborators::{CgroupDevicePolicy, ContainerId, ContainerRegistry, IdShift};
use crate::injector::{self, InjectTarget};
use crate::netlink::error::{Error, Result};

/// Create/remove the device node for `view` inside `container`'s rootfs
/// and forward `frame_bytes` via the injector. `container` has already
/// been checked live by the caller's routing decision; this still
/// re-validates state so the projector is safe to call directly from
/// tests.
pub async fn project<R, C, I>(
    view: &UeventView<'_>,
    frame_bytes: Vec<u8>,
    container: ContainerId,
    registry: &R,
    cgroup: &C,
    id_shift: &I,
) -> Result<()>
where
    R: ContainerRegistry,
    C: CgroupDevicePolicy,
    I: IdShift,
{
    let state = registry.get_state(container).ok_or(Error::TargetGone)?;
    if !state.accepts_device_node() {
        return Err(Error::TargetGone);
    }

    if !cgroup.is_device_allowed(container, view.major, view.minor) {
        tracing::trace!(
            major = view.major,
            minor = view.minor,
            "device denied by cgroup policy"
        );
        return Err(Error::PolicyDeny {
            major: view.major,
            minor: view.minor,
        });
    }

    let rootdir = registry.get_rootdir(container).ok_or(Error::TargetGone)?;
    let path = device_path(&rootdir, view.devname);

    match view.action {
        "add" => {
            if !path.exists() {
                create_node(&path, view)?;
            }
            id_shift.shift_node(container, &path)?;
        }
        "remove" => match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "device node already absent on remove");
            }
            Err(e) => {
                return Err(Error::TransientIo {
                    operation: format!("unlinking {}", path.display()),
                    source: e,
                });
            }
        },
        other => {
            return Err(Error::MalformedFrame(format!(
                "device-node projector invoked for unsupported action {other:?}"
            )));
        }
    }

    let pid = registry.get_pid(container).ok_or(Error::TargetGone)?;
    let has_userns = registry.has_userns(container);
    if let Err(e) = injector::inject(InjectTarget { pid, has_userns }, frame_bytes).await {
        tracing::warn!(error = %e, "device-node injection failed; node creation stands");
    }
    Ok(())
}

/// `<rootdir>/dev/<devname>`, or `<rootdir><devname>` when `devname`
/// already carries a `/dev/` prefix (spec.md §4.D step 2).
fn device_path(rootdir: &Path, devname: &str) -> PathBuf {
    if let Some(rest) = devname.strip_prefix("/dev/") {
        rootdir.join("dev").join(rest)
    } else {
        rootdir.join("dev").join(devname.trim_start_matches('/'))
    }
}

fn create_node(path: &Path, view: &UeventView<'_>) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::DirBuilder::new()
            .recursive(true)
            .mode(0o755)
            .create(parent)
            .map_err(|e| Error::TransientIo {
                operation: format!("creating {}", parent.display()),
                source: e,
            })?;
    }

    let mode = if view.devtype == "disk" {
        libc::S_IFBLK
    } else {
        libc::S_IFCHR
    };
    // SAFETY: major/minor are plain integers; makedev performs no I/O.
    let dev = unsafe { libc::makedev(view.major as u32, view.minor as u32) };
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| Error::MalformedFrame("device path contains a NUL byte".into()))?;

    // SAFETY: c_path is a valid NUL-terminated path whose parent
    // directories were just created; mode/dev describe the char or
    // block special file the event's devtype/major/minor designate.
    let ret = unsafe { libc::mknod(c_path.as_ptr(), mode, dev) };
    if ret != 0 {
        return Err(Error::TransientIo {
            operation: format!("mknod {}", path.display()),
            source: std::io::Error::last_os_error(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::fake::{FakeCgroup, FakeContainer, FakeIdShift, FakeRegistry};
    use crate::collaborators::ContainerState;

    fn frame_and_view() -> crate::codec::UeventFrame {
        let mut raw = Vec::new();
        raw.extend_from_slice(b"add@/devices/virtual/mem/null\0");
        raw.extend_from_slice(b"SUBSYSTEM=mem\0DEVNAME=null\0MAJOR=1\0MINOR=3\0DEVTYPE=\0");
        crate::codec::UeventFrame::from_raw(raw)
    }

    #[test]
    fn device_path_joins_rootdir_dev_and_devname() {
        let path = device_path(Path::new("/var/lib/lxc/c1/rootfs"), "null");
        assert_eq!(path, PathBuf::from("/var/lib/lxc/c1/rootfs/dev/null"));
    }

    #[test]
    fn device_path_respects_absolute_devname() {
        let path = device_path(Path::new("/var/lib/lxc/c1/rootfs"), "/dev/null");
        assert_eq!(path, PathBuf::from("/var/lib/lxc/c1/rootfs/dev/null"));
    }

    #[tokio::test]
    async fn policy_deny_stops_before_touching_the_filesystem() {
        let frame = frame_and_view();
        let view = crate::codec::parse(&frame).unwrap();

        let tmp = tempfile::tempdir().unwrap();
        let mut registry = FakeRegistry::new();
        let id = registry.add(FakeContainer {
            uuid: "c1".into(),
            name: "c1".into(),
            state: ContainerState::Running,
            pid: 100,
            rootdir: tmp.path().to_path_buf(),
            has_userns: false,
        });

        let cgroup = FakeCgroup::new();
        cgroup
            .allowed
            .lock()
            .unwrap()
            .insert((id, view.major, view.minor), false);
        let id_shift = FakeIdShift;

        let err = project(&view, frame.as_bytes().to_vec(), id, &registry, &cgroup, &id_shift)
            .await
            .unwrap_err();
        assert!(err.is_policy_deny());
        assert!(!tmp.path().join("dev").exists());
    }

    #[tokio::test]
    async fn target_not_live_is_rejected_before_policy_check() {
        let frame = frame_and_view();
        let view = crate::codec::parse(&frame).unwrap();

        let mut registry = FakeRegistry::new();
        let id = registry.add(FakeContainer {
            uuid: "c1".into(),
            name: "c1".into(),
            state: ContainerState::Stopped,
            pid: 100,
            rootdir: "/nonexistent".into(),
            has_userns: false,
        });

        let cgroup = FakeCgroup::new();
        let id_shift = FakeIdShift;

        let err = project(&view, frame.as_bytes().to_vec(), id, &registry, &cgroup, &id_shift)
            .await
            .unwrap_err();
        assert!(err.is_target_gone());
    }

    // Exercises the real mknod/unlink path; requires CAP_MKNOD, so it is
    // gated the same way the namespace-crossing injector tests are.
    #[cfg(feature = "integration")]
    #[tokio::test]
    async fn add_then_remove_round_trips_on_disk() {
        let frame = frame_and_view();
        let view = crate::codec::parse(&frame).unwrap();

        let tmp = tempfile::tempdir().unwrap();
        let mut registry = FakeRegistry::new();
        let id = registry.add(FakeContainer {
            uuid: "c1".into(),
            name: "c1".into(),
            state: ContainerState::Running,
            pid: 100,
            rootdir: tmp.path().to_path_buf(),
            has_userns: false,
        });
        let cgroup = FakeCgroup::new();
        let id_shift = FakeIdShift;

        project(&view, frame.as_bytes().to_vec(), id, &registry, &cgroup, &id_shift)
            .await
            .unwrap();
        assert!(tmp.path().join("dev/null").exists());
    }
}
