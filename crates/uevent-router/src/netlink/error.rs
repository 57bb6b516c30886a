//! Error types for netlink transport and uevent-routing operations.

use std::io;

/// Result type used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while transporting or routing uevents.
///
/// `Io`, `Truncated`, and `InvalidMessage` come from the netlink
/// transport layer (`netlink/message.rs`, `netlink/namespace.rs`). The
/// rest are the seven routing error kinds (spec.md §7): `TransientIo`,
/// `MalformedFrame`, `PolicyDeny`, `TargetGone`, `InjectionFailure`,
/// `RegistrationInvalid`, and `Fatal`. The dispatcher logs and skips on
/// all of them; none tear down daemon state.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error from socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Message was truncated.
    #[error("message truncated: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Expected message length.
        expected: usize,
        /// Actual bytes received.
        actual: usize,
    },

    /// Invalid message format.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// A recoverable transport failure: `recv` failed, or a sysfs read
    /// failed. Logged and skipped; the event loop continues.
    #[error("transient I/O failure during {operation}: {source}")]
    TransientIo {
        /// What was being attempted.
        operation: String,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// A frame failed to parse: bad magic, truncated header, or a rewrite
    /// that would overflow the buffer. Traced and dropped.
    #[error("malformed uevent frame: {0}")]
    MalformedFrame(String),

    /// cgroup device policy forbids the (major, minor) pair. Traced and
    /// dropped.
    #[error("device {major}:{minor} forbidden by cgroup policy")]
    PolicyDeny {
        /// Device major number.
        major: i32,
        /// Device minor number.
        minor: i32,
    },

    /// The target container is not in a live state. Warned and dropped.
    #[error("target container is not in a live state")]
    TargetGone,

    /// The injector's child process exited non-zero, or the parent
    /// could not reap it. Warned; the node creation or NIC move that
    /// preceded it is not undone.
    #[error("injection into container namespace failed: {0}")]
    InjectionFailure(String),

    /// A registration call was rejected (e.g. a `pnet_name` that does not
    /// parse as a MAC address).
    #[error("invalid registration: {0}")]
    RegistrationInvalid(String),

    /// The forked injector child could not reach a namespace file or
    /// otherwise could not proceed. Never observed outside the child;
    /// the parent only ever sees it surface as `InjectionFailure`.
    #[error("fatal child error: {0}")]
    Fatal(String),
}

impl Error {
    /// Whether the policy layer denied this device.
    pub fn is_policy_deny(&self) -> bool {
        matches!(self, Self::PolicyDeny { .. })
    }

    /// Whether the target container had already gone away.
    pub fn is_target_gone(&self) -> bool {
        matches!(self, Self::TargetGone)
    }

    /// Whether re-injection into the container's namespace failed.
    pub fn is_injection_failure(&self) -> bool {
        matches!(self, Self::InjectionFailure(_))
    }

    /// Whether this error should be logged and the current event skipped
    /// without tearing down any router state.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::TransientIo { .. }
                | Self::MalformedFrame(_)
                | Self::PolicyDeny { .. }
                | Self::TargetGone
                | Self::InjectionFailure(_)
        )
    }
}
