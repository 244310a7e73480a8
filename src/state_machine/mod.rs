mod job;
mod status;

pub use job::{JobSummary, LINE_SEPARATOR, Message, RawMessage, all_settled};
pub use status::{JobStatus, MessageStatus, StatusMachine, Transition};
