//! Low-level netlink transport: sockets, message framing, namespace
//! helpers, and the error taxonomy the rest of the crate builds on.
//!
//! # Example
//!
//! ```ignore
//! use uevent_router::netlink::{NetlinkSocket, Protocol};
//!
//! let mut socket = NetlinkSocket::new(Protocol::KobjectUevent)?;
//! socket.add_membership(uevent_router::netlink::UEVENT_GROUP)?;
//! let frame = socket.recv_msg().await?;
//! ```

pub mod error;
pub mod message;
pub mod namespace;
mod socket;

pub use error::{Error, Result};
pub use message::{MessageIter, NLMSG_HDRLEN, NlMsgError, NlMsgHdr, NlMsgType};
pub use socket::{NetlinkSocket, Protocol, UEVENT_GROUP, find_peer_udevd_pid};
