//! Agent records and the registry that holds them

mod record;
mod status;
mod store;

pub use record::{Agent, AgentId, AgentIdentity, AgentSnapshot, MergePreferences};
pub use status::{AgentStatus, WaitingFor};
pub use store::AgentStore;

#[cfg(test)]
pub(crate) use record::test_identity;
