//! Agent backend invocation: runs one pipeline step against an opaque
//! agent subprocess and reduces its streamed events into a result the
//! worker pipeline can act on (spec §4.5, C5).

pub mod invoker;
pub mod message;
pub mod reducer;

pub use invoker::{StepParams, run_step};
pub use message::StepMessage;
pub use reducer::StepResult;
