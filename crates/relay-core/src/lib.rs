//! Transfer orchestration for the media relay.
//!
//! Composes the WebDAV executor, the two telemetry aggregators, the per-task
//! control table, the durable pending set and the transfer history behind
//! [`Relay`].

pub mod control;
pub mod coordinator;
pub mod error;
pub mod history;
pub mod pending;
pub mod relay;
mod settings;

pub use control::{Gate, TaskControlTable};
pub use coordinator::{RelayOutcome, RelayRequest, TransferCoordinator};
pub use error::RelayError;
pub use history::History;
pub use pending::PendingSet;
pub use relay::{ActiveTask, Relay, RelayStatus};
