//! Coldboot driver: walks `/sys/devices` and synthesizes `add <uuid>`
//! uevents for everything already present, so a freshly started
//! container sees devices that existed before it (spec.md §4.H).
//!
//! Grounded on the original's recursive `dir_foreach` over sysfs;
//! reexpressed as a plain recursive `std::fs::read_dir` walk, run off
//! the blocking thread pool via `tokio::task::spawn_blocking` the same
//! way the injector (`injector.rs`) moves its `waitpid` off the async
//! task.

use std::ffi::OsStr;
use std::fs;
use std::path::Path;

use crate::collaborators::{CgroupDevicePolicy, ContainerId, ContainerRegistry};
use crate::dispatcher::RouterShared;
use crate::netlink::error::{Error, Result};

const SYS_DEVICES_ROOT: &str = "/sys/devices";

/// Trigger a coldboot scan for `container`. Spawned onto the blocking
/// pool since a full `/sys/devices` walk can touch thousands of files.
pub async fn trigger<R, C, I, T, P, N>(
    container: ContainerId,
    shared: &RouterShared<R, C, I, T, P, N>,
) -> Result<()>
where
    R: ContainerRegistry + 'static,
    C: CgroupDevicePolicy + 'static,
{
    let uuid = shared.registry.get_uuid(container).ok_or(Error::TargetGone)?;
    let cgroup = shared.cgroup.clone();

    tokio::task::spawn_blocking(move || walk(Path::new(SYS_DEVICES_ROOT), container, &uuid, &*cgroup))
        .await
        .unwrap_or_else(|e| Err(Error::Fatal(format!("coldboot task panicked: {e}"))))
}

/// Recurse into `dir`, visiting every `uevent` attribute file found.
/// Missing directories (a device that vanished mid-walk) are not an
/// error; anything else reading a directory is.
fn walk<C: CgroupDevicePolicy>(dir: &Path, container: ContainerId, uuid: &str, cgroup: &C) -> Result<()> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => {
            return Err(Error::TransientIo {
                operation: format!("reading directory {}", dir.display()),
                source: e,
            });
        }
    };

    for entry in entries {
        let Ok(entry) = entry else { continue };
        let Ok(file_type) = entry.file_type() else { continue };
        let path = entry.path();

        if file_type.is_dir() {
            walk(&path, container, uuid, cgroup)?;
        } else if path.file_name() == Some(OsStr::new("uevent")) {
            visit_uevent_file(&path, container, uuid, cgroup);
        }
    }
    Ok(())
}

/// Read the sibling `dev` file, parse `major:minor`, check cgroup
/// policy, and write the trigger string. Any failure here is per-device
/// and logged, never aborts the walk (spec.md §4.H has no rollback).
fn visit_uevent_file<C: CgroupDevicePolicy>(uevent_path: &Path, container: ContainerId, uuid: &str, cgroup: &C) {
    let Some(parent) = uevent_path.parent() else {
        return;
    };
    let Ok(contents) = fs::read_to_string(parent.join("dev")) else {
        return;
    };
    let Some((major, minor)) = parse_major_minor(contents.trim()) else {
        return;
    };

    if !cgroup.is_device_allowed(container, major, minor) {
        tracing::trace!(
            major,
            minor,
            path = %uevent_path.display(),
            "coldboot: device denied by cgroup policy"
        );
        return;
    }

    // Some kernels reject the `SYNTH_UUID`-carrying argument form; fall
    // back to a bare trigger rather than silently skip the device.
    if fs::write(uevent_path, format!("add {uuid}")).is_err() {
        if let Err(e) = fs::write(uevent_path, "add") {
            tracing::warn!(
                error = %e,
                path = %uevent_path.display(),
                "coldboot: uevent trigger write failed"
            );
        }
    }
}

fn parse_major_minor(s: &str) -> Option<(i32, i32)> {
    let (maj, min) = s.split_once(':')?;
    Some((maj.parse().ok()?, min.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::fake::FakeCgroup;

    fn make_device(root: &Path, rel: &str, dev: &str) {
        let dir = root.join(rel);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("dev"), dev).unwrap();
        fs::write(dir.join("uevent"), "").unwrap();
    }

    #[test]
    fn parses_major_minor() {
        assert_eq!(parse_major_minor("1:3"), Some((1, 3)));
        assert_eq!(parse_major_minor("garbage"), None);
    }

    #[test]
    fn walk_writes_trigger_for_allowed_device_only() {
        let tmp = tempfile::tempdir().unwrap();
        make_device(tmp.path(), "pci0000:00/0000:00:01.0/usb1", "189:0\n");
        make_device(tmp.path(), "pci0000:00/0000:00:02.0/mem", "1:3\n");

        let cgroup = FakeCgroup::new();
        cgroup.allowed.lock().unwrap().insert((ContainerId(1), 189, 0), false);

        walk(tmp.path(), ContainerId(1), "c1-uuid", &cgroup).unwrap();

        let usb_uevent = fs::read_to_string(tmp.path().join("pci0000:00/0000:00:01.0/usb1/uevent")).unwrap();
        assert_eq!(usb_uevent, "");

        let mem_uevent = fs::read_to_string(tmp.path().join("pci0000:00/0000:00:02.0/mem/uevent")).unwrap();
        assert_eq!(mem_uevent, "add c1-uuid");
    }

    #[test]
    fn walk_over_missing_root_is_not_an_error() {
        let cgroup = FakeCgroup::new();
        walk(Path::new("/does/not/exist/anywhere"), ContainerId(0), "uuid", &cgroup).unwrap();
    }
}
