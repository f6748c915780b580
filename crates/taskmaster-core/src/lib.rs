//! # TaskMaster Core
//!
//! Shared domain types, collaborator traits, errors and configuration for the
//! access-control and deadline-notification subsystem.

pub mod config;
pub mod error;
pub mod memory;
pub mod traits;
pub mod types;

pub use config::TaskmasterConfig;
pub use error::{Result, TaskmasterError};
pub use memory::MemoryStore;
pub use traits::{Clock, EmailTransport, ManualClock, OutgoingEmail, SystemClock, TaskStore, UserStore};
pub use types::{
    NotificationFlag, NotificationFlags, Principal, Recipient, Role, TaskSnapshot, TaskStatus,
};
