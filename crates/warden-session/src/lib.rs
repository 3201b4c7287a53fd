//! Session tracking for supervised agent invocations.
//!
//! A session is one agent-CLI run: registered when the tool call is
//! dispatched, mutated by the supervisor while streaming, finished with a
//! terminal state, and eventually reaped by the TTL sweeper. Each record
//! carries a bounded ring of diagnostic entries that clients can tail with
//! a cursor.

mod diagnostics;
mod registry;

pub use diagnostics::{DiagnosticEntry, DiagnosticEntryView, DiagnosticKind};
pub use registry::{
    new_temporary_id, DiagnosticsTail, RegistryOptions, SessionDetailView, SessionRegistry,
    SessionState, SessionView,
};
