//! Storage for mentorgate.
//!
//! Persistence ports for cooldown windows and resume records, with
//! file-based and in-memory implementations.

pub mod file;
pub mod memory;
pub mod traits;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use traits::{CooldownStore, ResumeStore};
