//! WebDriver sessions
//!
//! A session binds a client to one device, one launched app and one local
//! endpoint port. [`SessionRegistry`] owns creation and teardown ordering;
//! the guards in [`lease`] make sure a reserved device is never leaked.

pub mod capabilities;
pub mod lease;
pub mod registry;

pub use capabilities::Capabilities;
pub use lease::{Outcome, PortLease};
pub use registry::{
    wait_for_endpoint, Session, SessionId, SessionRegistry, SessionSettings, SessionState,
};
