//! Client-side collection state: paged loading, visibility-driven fetching
//! and apply-on-success mutations on top of the [`api::ExpenseApi`] trait.

pub mod debts;
pub mod error;
pub mod loader;
pub mod mutation;
pub mod notice;
pub mod source;
pub mod visibility;

pub use debts::{DebtBoard, DebtRow};
pub use error::SyncError;
pub use loader::{FetchOutcome, LoadPhase, Loader, PagedCollection, ResetHook, SkipReason};
pub use mutation::Mutation;
pub use notice::{Notice, Severity};
pub use source::{DebtPages, EventPages, PageSource, ParticipantPages};
pub use visibility::{
    FetchDriver, Intersection, ObserverOptions, SentinelEvent, SentinelId, Viewport,
};
