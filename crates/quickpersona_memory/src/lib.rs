pub mod backup;
pub mod profile;
pub mod sqlite;

pub use backup::{BackupError, BackupStore, LoadReport, PersonaBackup};
pub use profile::{
    format_messages, BufferedMessage, MessageBuffer, ProfileMode, ProfileMonitor, UserProfile,
};
pub use sqlite::SqliteProfileStore;
