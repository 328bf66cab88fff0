//! Per-dialog persistence: the append-only message journal, reasoning and
//! file-edit side tables, usage accounting, session/branch rows and the
//! out-of-band tool-result store.

pub mod compress;
pub mod domain;
pub mod error;
pub mod results;
pub mod schema;
pub mod sqlite;

pub use domain::{
    BranchPointer, BranchType, EnvelopeMetadata, FileEditRecord, Message, ReasoningBlock,
    ResultRef, SessionRecord, SessionState, StoredToolResult, SummaryRecord, ToolCallRecord,
    ToolResultEnvelope, ToolResultStatus, UsageTotals,
};
pub use error::{SessionError, SessionResult};
pub use results::ToolResultStore;
pub use sqlite::{DialogJournal, SliceItem};
