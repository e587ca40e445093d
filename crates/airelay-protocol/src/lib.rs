pub mod context;
pub mod repair;
pub mod sse;
pub mod usage;

pub use context::RequestContext;
pub use repair::{repair_dangling_tool_use, RepairOutcome};
pub use sse::{SseEvent, SseParser};
pub use usage::{Dialect, TokenUsage, UsageAccumulator};
