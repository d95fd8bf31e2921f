//! Wire types shared by the Parker master daemon and its plugins.
//!
//! Two surfaces are described here. The registration socket carries
//! length-prefixed JSON frames ([`codec`]) exchanged between a plugin and the
//! master: a [`PluginFrame::Register`] handshake, an [`AckFrame`] reply, and a
//! stream of [`PluginFrame::Heartbeat`] frames. The command socket carries
//! single-line JSON requests ([`CommandRequest`]) and replies
//! ([`CommandReply`]) for callers that want a command routed.
//!
//! Commands are addressed as `<namespace>.<action>`; [`Namespace`] and
//! [`CommandId`] validate that shape once so downstream code never has to.

pub mod codec;
pub mod command;
pub mod frame;
pub mod namespace;

pub use self::codec::{FrameError, MAX_FRAME_LEN, read_frame, write_frame};
pub use self::command::{CommandReply, CommandRequest, ReplyErrorKind};
pub use self::frame::{AckFrame, AckStatus, MasterFrame, PluginFrame, RegisterFrame, RejectReason};
pub use self::namespace::{Command, CommandId, CommandIdError, Namespace, NamespaceError};
