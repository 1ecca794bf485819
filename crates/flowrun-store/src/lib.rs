pub mod memory;
pub mod sqlite;

pub use memory::MemoryRecorder;
pub use sqlite::SqliteRecorder;
