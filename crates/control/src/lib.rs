//! Power-control logic independent of the messaging transport: who may act,
//! what each action does, and how the live status message is kept current.

mod action;
mod context;
mod dispatch;
mod registry;
mod status;
mod surface;

pub use action::{ActionKind, AllowList, KEYBOARD_LAYOUT, UserId};
pub use context::{ControlContext, ControlParts};
pub use dispatch::{DispatchOutcome, Dispatcher};
pub use registry::TaskRegistry;
pub use status::{StatusBroadcaster, StatusProbe, StatusSnapshot};
pub use surface::{EditOutcome, Responder, SurfaceEditor, SurfaceError, SurfaceId};

/// Fixed user-facing texts.
pub mod messages {
    pub const REJECTED: &str = "You do not have access to this bot.";
    pub const STATUS_PLACEHOLDER: &str = "Please wait, fetching status...";
    pub const WAKE_SENT: &str = "Wake-on-LAN packet sent.";
    pub const WAKE_FAILED: &str = "Failed to send the Wake-on-LAN packet.";
    pub const ACTION_FAILED: &str = "An error occurred while sending the command.";
}
