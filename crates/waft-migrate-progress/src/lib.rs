mod record;
mod store;

pub use record::{parse_progress, ProgressRecord, ProgressRecords};
pub use store::ProgressStore;
