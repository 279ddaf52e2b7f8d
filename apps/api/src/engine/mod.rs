//! Auto-apply orchestration: scheduling, quota, dedup, token lifecycle and
//! the per-cycle pipeline.

pub mod commands;
pub mod dedup;
pub mod pipeline;
pub mod quota;
pub mod scheduler;
pub mod token;
