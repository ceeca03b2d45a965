use std::{
    env,
    path::{Path, PathBuf},
};

/// Explicit process-wide configuration: filesystem roots and the database
/// location. Owned by the caller and passed down; the core keeps no
/// singletons.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Root of the active collection's artifact storage
    /// (`<collection_root>/artifacts/<type_plural>/<name>/...`).
    pub collection_root: PathBuf,
    /// Root of the content-addressed snapshot blob store.
    pub snapshots_root: PathBuf,
    /// SQLite database file.
    pub database_path: PathBuf,
}

impl CoreConfig {
    /// Resolve from SKILLMEAT_DATA_DIR, falling back to the platform data
    /// directory.
    pub fn from_env() -> Self {
        let data_dir = env::var_os("SKILLMEAT_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                dirs::data_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("skillmeat")
            });
        Self::in_data_dir(&data_dir)
    }

    pub fn in_data_dir(data_dir: &Path) -> Self {
        CoreConfig {
            collection_root: data_dir.join("collection"),
            snapshots_root: data_dir.join("snapshots"),
            database_path: data_dir.join("skillmeat.db"),
        }
    }
}
