//! Injector: forks into a target container's user+network namespace and
//! re-emits a uevent frame on a freshly created socket there.
//!
//! Grounded on spec.md §4.F; the namespace switches reuse the teacher's
//! raw `libc::setns` idiom from `netlink/namespace.rs`, and the message
//! is built with the teacher's `NlMsgHdr` and ack-verified the way
//! `netlink/message.rs`'s `NlMsgError::is_ack()` is used by the teacher's
//! connection layer. Crossing namespaces needs a dedicated process because
//! namespace membership is per-task; any fatal error in the child is
//! isolated from the daemon by construction.

use std::ffi::c_void;
use std::mem;

use crate::netlink::error::{Error, Result};
use crate::netlink::message::{
    NLM_F_ACK, NLM_F_REQUEST, NLMSG_HDRLEN, NlMsgError, NlMsgHdr, NlMsgType, nlmsg_align,
};
use crate::netlink::namespace::{self, NamespaceKind};

/// Where to re-inject a frame: the container's pid and whether it has its
/// own user namespace.
#[derive(Debug, Clone, Copy)]
pub struct InjectTarget {
    pub pid: u32,
    pub has_userns: bool,
}

/// Fork into `target`'s namespaces and re-emit `frame` there.
///
/// Runs on a blocking thread: `fork`, `setns`, and `waitpid` are all
/// synchronous syscalls, and the child must not touch the async runtime
/// it was forked from. Returns `Ok(())` iff the child exited with status
/// 0; any other outcome is an [`Error::InjectionFailure`].
pub async fn inject(target: InjectTarget, frame: Vec<u8>) -> Result<()> {
    tokio::task::spawn_blocking(move || inject_blocking(target, &frame))
        .await
        .map_err(|e| Error::InjectionFailure(format!("injector task panicked: {e}")))?
}

fn inject_blocking(target: InjectTarget, frame: &[u8]) -> Result<()> {
    // SAFETY: the child performs a bounded sequence of raw syscalls and
    // terminates via `_exit` without returning to, or sharing state with,
    // the parent's other threads.
    let pid = unsafe { libc::fork() };
    if pid < 0 {
        return Err(Error::Io(std::io::Error::last_os_error()));
    }
    if pid == 0 {
        let status = match child_inject(target, frame) {
            Ok(()) => 0,
            Err(_) => 1,
        };
        // SAFETY: terminates the forked child directly, skipping parent
        // destructors and atexit handlers that must not run twice.
        unsafe { libc::_exit(status) };
    }
    wait_for_child(pid)
}

fn wait_for_child(pid: libc::pid_t) -> Result<()> {
    let mut status: libc::c_int = 0;
    // SAFETY: pid was just returned by a successful fork() in this
    // process and is owned exclusively until reaped here.
    let ret = unsafe { libc::waitpid(pid, &mut status, 0) };
    if ret < 0 {
        return Err(Error::Io(std::io::Error::last_os_error()));
    }
    if libc::WIFEXITED(status) && libc::WEXITSTATUS(status) == 0 {
        Ok(())
    } else {
        Err(Error::InjectionFailure(format!(
            "injector child exited abnormally (status {status:#x})"
        )))
    }
}

fn child_inject(target: InjectTarget, frame: &[u8]) -> Result<()> {
    if target.has_userns {
        let userns = namespace::open_pid(target.pid, NamespaceKind::User)
            .map_err(|e| Error::Fatal(format!("opening user namespace: {e}")))?;
        // SAFETY: single-threaded forked child; no other thread observes
        // this namespace switch.
        unsafe { userns.setns() }
            .map_err(|e| Error::Fatal(format!("entering user namespace: {e}")))?;
    }

    // SAFETY: raw syscalls taking no pointers besides the null groups
    // list explicitly allowed by setgroups(2) when count is 0.
    unsafe {
        if libc::setuid(0) != 0 {
            return Err(Error::Fatal(format!(
                "setuid(0): {}",
                std::io::Error::last_os_error()
            )));
        }
        if libc::setgid(0) != 0 {
            return Err(Error::Fatal(format!(
                "setgid(0): {}",
                std::io::Error::last_os_error()
            )));
        }
        if libc::setgroups(0, std::ptr::null()) != 0 {
            return Err(Error::Fatal(format!(
                "setgroups(0): {}",
                std::io::Error::last_os_error()
            )));
        }
    }

    let netns = namespace::open_pid(target.pid, NamespaceKind::Net)
        .map_err(|e| Error::Fatal(format!("opening network namespace: {e}")))?;
    // SAFETY: see the userns switch above.
    unsafe { netns.setns() }
        .map_err(|e| Error::Fatal(format!("entering network namespace: {e}")))?;

    send_and_ack(frame)
}

fn send_and_ack(frame: &[u8]) -> Result<()> {
    // SAFETY: AF_NETLINK/SOCK_RAW/NETLINK_KOBJECT_UEVENT is a valid
    // domain/type/protocol triple for a kobject uevent socket.
    let fd = unsafe {
        libc::socket(
            libc::AF_NETLINK,
            libc::SOCK_RAW,
            netlink_sys::protocols::NETLINK_KOBJECT_UEVENT as libc::c_int,
        )
    };
    if fd < 0 {
        return Err(Error::Fatal(format!(
            "socket(): {}",
            std::io::Error::last_os_error()
        )));
    }

    let mut addr: libc::sockaddr_nl = unsafe { mem::zeroed() };
    addr.nl_family = libc::AF_NETLINK as u16;
    addr.nl_pid = 0;
    addr.nl_groups = 0;

    // SAFETY: fd was just created above; addr is a fully initialized
    // sockaddr_nl of the size bind(2) expects.
    let bind_ret = unsafe {
        libc::bind(
            fd,
            &addr as *const libc::sockaddr_nl as *const libc::sockaddr,
            mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t,
        )
    };
    if bind_ret < 0 {
        let err = Error::Fatal(format!("bind(): {}", std::io::Error::last_os_error()));
        unsafe { libc::close(fd) };
        return Err(err);
    }

    let msg = build_message(1, frame);
    // SAFETY: fd is bound; msg is a fully initialized buffer of msg.len()
    // bytes.
    let sent = unsafe { libc::send(fd, msg.as_ptr() as *const c_void, msg.len(), 0) };
    if sent < 0 || sent as usize != msg.len() {
        let err = Error::Fatal(format!("send(): {}", std::io::Error::last_os_error()));
        unsafe { libc::close(fd) };
        return Err(err);
    }

    let mut buf = vec![0u8; 4096];
    // SAFETY: buf is a valid, correctly sized receive buffer.
    let received = unsafe { libc::recv(fd, buf.as_mut_ptr() as *mut c_void, buf.len(), 0) };
    unsafe { libc::close(fd) };
    if received < 0 {
        return Err(Error::Fatal(format!(
            "recv(): {}",
            std::io::Error::last_os_error()
        )));
    }
    buf.truncate(received as usize);

    let header = NlMsgHdr::from_bytes(&buf)?;
    if !header.is_error() {
        return Err(Error::InjectionFailure(format!(
            "expected an ACK, got message type {}",
            header.nlmsg_type
        )));
    }
    let ack = NlMsgError::from_bytes(&buf[NLMSG_HDRLEN..])?;
    if !ack.is_ack() {
        return Err(Error::InjectionFailure(format!(
            "kernel rejected injection: errno {}",
            -ack.error
        )));
    }
    Ok(())
}

fn build_message(seq: u32, payload: &[u8]) -> Vec<u8> {
    let total_len = NLMSG_HDRLEN + payload.len();
    let mut buf = vec![0u8; nlmsg_align(total_len)];
    let header = NlMsgHdr {
        nlmsg_len: total_len as u32,
        nlmsg_type: NlMsgType::UEVENT_SEND,
        nlmsg_flags: NLM_F_REQUEST | NLM_F_ACK,
        nlmsg_seq: seq,
        nlmsg_pid: 0,
    };
    buf[..NLMSG_HDRLEN].copy_from_slice(header.as_bytes());
    buf[NLMSG_HDRLEN..total_len].copy_from_slice(payload);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_message_sets_type_and_flags() {
        let msg = build_message(7, b"ACTION=add\0");
        let header = NlMsgHdr::from_bytes(&msg).unwrap();
        assert_eq!(header.nlmsg_type, NlMsgType::UEVENT_SEND);
        assert_eq!(header.nlmsg_flags, NLM_F_REQUEST | NLM_F_ACK);
        assert_eq!(header.nlmsg_seq, 7);
        assert_eq!(header.nlmsg_len as usize, NLMSG_HDRLEN + 11);
    }

    // Fork/setns/sendmsg paths require root and a live kernel; exercised
    // only under `cargo test --features integration` on a real host.
    #[cfg(feature = "integration")]
    #[tokio::test]
    async fn inject_into_self_netns_round_trips() {
        let target = InjectTarget {
            pid: std::process::id(),
            has_userns: false,
        };
        inject(target, b"add@/devices/test\0ACTION=add\0".to_vec())
            .await
            .unwrap();
    }
}
