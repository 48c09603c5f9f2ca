pub mod error;
pub mod history;
pub mod json_store;
pub mod sqlite_store;
pub mod store;

pub use error::StoreError;
pub use history::SignalHistory;
pub use json_store::JsonFileStore;
pub use sqlite_store::SqliteSignalStore;
pub use store::SignalStore;
