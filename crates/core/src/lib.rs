pub mod approvals;
pub mod audit;
pub mod clock;
pub mod config;
pub mod domain;
pub mod errors;
pub mod lifecycle;
pub mod numbering;
pub mod revisions;
pub mod store;

pub use approvals::{
    ApprovalGate, ApprovalWorkflow, DecisionOutcome, DenialReason, DiscountPolicy, GateDecision,
    GateDenial,
};
pub use audit::{AuditEvent, AuditSink, RequestContext};
pub use clock::{Clock, FixedClock, SystemClock};
pub use domain::approval::{ApprovalDecision, ApprovalId, ApprovalRecord, ApprovalStatus};
pub use domain::directory::{ClientId, ClientProfile, UserId, UserProfile};
pub use domain::proposal::{LineItem, Proposal, ProposalId, ProposalStatus};
pub use domain::revision::{FieldChange, RevisionRecord};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use lifecycle::{
    Collaborators, CreateOutcome, LifecycleSettings, LineItemInput, NewProposal, ProposalChanges,
    ProposalLifecycle, UpdateOutcome,
};
pub use numbering::{AllocationError, NumberAllocator, NumberResult, NumberingPolicy};
pub use revisions::RevisionAuditor;
pub use store::{ApprovalFilter, StoreError};
