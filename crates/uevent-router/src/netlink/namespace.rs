//! Linux namespace utilities.
//!
//! The injector needs to join both a container's network namespace and its
//! user namespace before re-emitting a uevent frame inside it (see
//! `crate::injector`), so this module covers both kinds rather than only
//! the network namespace the original transport layer needed. It only
//! ever opens a process's own `/proc/<pid>/ns/*` namespace files — named
//! (`ip netns add`-style) namespaces are never involved in injection, so
//! that surface isn't carried here.

use std::fs::File;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};

use super::error::{Error, Result};

/// Which namespace kind a path or fd refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamespaceKind {
    /// Network namespace (`CLONE_NEWNET`).
    Net,
    /// User namespace (`CLONE_NEWUSER`).
    User,
}

impl NamespaceKind {
    fn clone_flag(self) -> libc::c_int {
        match self {
            Self::Net => libc::CLONE_NEWNET,
            Self::User => libc::CLONE_NEWUSER,
        }
    }

    fn proc_leaf(self) -> &'static str {
        match self {
            Self::Net => "net",
            Self::User => "user",
        }
    }
}

/// Path of a process's namespace file of the given kind under `/proc`.
pub fn pid_ns_path(pid: u32, kind: NamespaceKind) -> PathBuf {
    PathBuf::from(format!("/proc/{}/ns/{}", pid, kind.proc_leaf()))
}

/// Open a namespace file by path and return its file descriptor.
fn open_path<P: AsRef<Path>>(path: P, kind: NamespaceKind) -> Result<NamespaceFd> {
    let file = File::open(path.as_ref()).map_err(|e| {
        Error::InvalidMessage(format!(
            "cannot open namespace '{}': {}",
            path.as_ref().display(),
            e
        ))
    })?;
    Ok(NamespaceFd { file, kind })
}

/// Open a process's namespace of the given kind and return its file
/// descriptor.
pub fn open_pid(pid: u32, kind: NamespaceKind) -> Result<NamespaceFd> {
    open_path(pid_ns_path(pid, kind), kind)
}

/// A handle to an open namespace file.
#[derive(Debug)]
pub struct NamespaceFd {
    file: File,
    kind: NamespaceKind,
}

impl NamespaceFd {
    /// Get the raw file descriptor.
    pub fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }

    /// Which kind of namespace this descriptor refers to.
    pub fn kind(&self) -> NamespaceKind {
        self.kind
    }

    /// Join this namespace on the calling thread.
    ///
    /// # Safety
    ///
    /// Affects the entire calling thread/process's namespace membership.
    /// Only safe to call from a freshly forked child that will not return
    /// to the parent's namespace (see `crate::injector`).
    pub unsafe fn setns(&self) -> Result<()> {
        // SAFETY: self.file is a namespace file opened from /proc/<pid>/ns/*,
        // and kind.clone_flag() matches the namespace type it was opened as.
        let ret = unsafe { libc::setns(self.file.as_raw_fd(), self.kind.clone_flag()) };
        if ret < 0 {
            return Err(Error::Io(std::io::Error::last_os_error()));
        }
        Ok(())
    }
}

impl AsRawFd for NamespaceFd {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}
