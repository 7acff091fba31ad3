// pca-core/src/lib.rs

pub mod acquire;
pub mod agent;
pub mod install;
pub mod ledger;
pub mod lock;
pub mod logbuf;
pub mod scheduler;
pub mod system;

#[cfg(test)]
pub(crate) mod test_support;

pub use acquire::Acquisition;
pub use agent::{find_application_update, Agent, AppUpdate, AppUpdateQuery, AGENT_VERSION};
pub use install::{BackendFactory, PackageBackend, SystemBackendFactory, Transaction};
pub use ledger::Ledger;
pub use lock::{LockLease, OperationLock};
pub use logbuf::LogBuffer;
pub use scheduler::{NextRun, ScheduledTask, Scheduler, TaskHandle};
