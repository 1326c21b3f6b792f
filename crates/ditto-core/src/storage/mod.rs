pub mod models;
pub mod queries;
pub mod sqlite;

pub use queries::GroupBatchStats;
pub use sqlite::{Database, ReadConn};
