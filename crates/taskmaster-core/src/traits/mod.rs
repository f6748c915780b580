//! Collaborator interfaces consumed by the security and scheduler crates.

pub mod clock;
pub mod mailer;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use mailer::{EmailTransport, OutgoingEmail};
pub use store::{TaskStore, UserStore};
