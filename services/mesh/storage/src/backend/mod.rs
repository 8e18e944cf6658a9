//! Identity storage backend implementations

pub mod file;
pub mod mem;
