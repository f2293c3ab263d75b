//! The content-intelligence digest pipeline.
//!
//! A run moves one `Digest` through `pending → fetching → analyzing →
//! generating → delivering → completed`, persisting every transition so a
//! failed run can be retried on the same digest id. See [`Orchestrator`].

pub mod analyzer;
pub mod collaborators;
pub mod delivery;
pub mod drafts;
pub mod orchestrator;
pub mod review;
pub mod sources;
pub mod store;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use analyzer::{Analysis, Analyzer, BudgetReport};
pub use collaborators::{
    ApproveTask, Collaborators, DocumentExporter, MessageRelay, NewTask, RenderedDocument,
    SopAssociation, TaskStore, TemplateStore,
};
pub use delivery::{Delivery, DeliveryReport, RelayQueue};
pub use drafts::DraftGenerator;
pub use orchestrator::{
    Orchestrator, PreparedRun, RunOptions, RunOutcome, RunStart, SkipReason, JOB_NAME,
};
pub use review::{BulkFailure, BulkOutcome, ReviewService};
pub use sources::{SourceAdmin, SourceTestReport};
pub use store::{DigestStore, DigestUpdate, PgDigestStore};
