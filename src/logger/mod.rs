//! Activity journal: JSONL writer and the channel-fed writer thread.

pub mod journal;
pub mod jsonl;
