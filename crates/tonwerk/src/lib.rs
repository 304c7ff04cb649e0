pub mod activity;
pub mod automation;
pub mod config;
pub mod encode;
pub mod error;
pub mod fsops;
pub mod ledger;
pub mod naming;
pub mod perf;
pub mod probe;
pub mod report;
pub mod scan;
pub mod store;
pub mod validate;
pub mod worker;

pub use config::{Rules, Settings};
pub use error::PreflightError;
pub use ledger::{QuarantineJob, QuarantineLedger, QuarantineStatus};
pub use report::{JobRecord, JobStatus, RunReport};
pub use validate::{validate_audio, AudioCheck};
