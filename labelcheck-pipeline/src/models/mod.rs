//! Data models for the compliance pipeline
//!
//! - Job lifecycle state machine
//! - Claim ledger records
//! - Transport messages and handler outcomes
//! - Check results and the assembled report

pub mod check;
pub mod facts;
pub mod job;
pub mod messages;
pub mod outcome;
pub mod report;
pub mod unit_record;

pub use check::{CheckKind, CheckResult, Verdict};
pub use facts::LabelFacts;
pub use job::{Job, JobStatus, JobStatusView};
pub use messages::{CompletionMessage, FanOutMessage, UploadTrigger};
pub use outcome::HandlerOutcome;
pub use report::{GroupSection, Report, ReportSummary};
pub use unit_record::{UnitKind, UnitRecord, UnitStatus, REPORT_CLAIM};
