pub mod lock;
pub mod paths;
pub mod record;
pub mod state_store;

pub use lock::FileLock;
pub use paths::{JobDir, RootLayout};
pub use record::{JobRecord, JobState};
pub use state_store::{ScanEntry, StateStore};
