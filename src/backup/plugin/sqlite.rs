use crate::backup::function_path;
use crate::backup::plugin::{Plugin, PluginContext};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::{convert_error_vec, Result};
use crate::backup::result_error::{AddFunctionName, AddMsg};
use bon::Builder;
use function_name::named;
use getset::Getters;
use rusqlite::{Connection, OpenFlags, MAIN_DB};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use validator::Validate;

pub static SQLITE_DUMP_EXT: &str = "sqlite3";

/// Consistent snapshots of live SQLite databases, taken with the online
/// backup API so writers are not blocked.
#[derive(Clone, Debug, Serialize, Deserialize, Validate, Builder, Getters)]
#[getset(get = "pub")]
pub struct SqlitePlugin {
    #[validate(length(min = 1), nested)]
    #[builder(into)]
    databases: Vec<SqliteDatabase>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate, Builder, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct SqliteDatabase {
    #[builder(into)]
    path: PathBuf,
    /// Snapshot file stem; defaults to the database file stem.
    #[validate(length(min = 1))]
    #[builder(into)]
    name: Option<String>,
}

impl SqliteDatabase {
    fn snapshot_name(&self) -> String {
        let stem = self.name.clone().unwrap_or_else(|| {
            self.path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "database".to_string())
        });
        format!("{stem}.{SQLITE_DUMP_EXT}")
    }

    #[named]
    fn snapshot(&self, dest_dir: &Path) -> Result<PathBuf> {
        let dest = dest_dir.join(self.snapshot_name());
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(Error::from)
        .add_msg(format!("Cannot open database {:?}", self.path))
        .add_fn_name(function_path!())?;
        conn.backup(MAIN_DB, &dest, None)
            .map_err(Error::from)
            .add_msg(format!("Backup of {:?} to {:?} failed", self.path, dest))
            .add_fn_name(function_path!())?;
        Ok(dest)
    }
}

impl Plugin for SqlitePlugin {
    fn exec(&self, target: &Path, _ctx: &PluginContext) -> Result<()> {
        let errors: Vec<Error> = self
            .databases
            .iter()
            .filter_map(|db| match db.snapshot(target) {
                Ok(dest) => {
                    tracing::info!("Snapshot of {:?} written to {:?}", db.path, dest);
                    None
                }
                Err(e) => Some(e),
            })
            .collect();
        convert_error_vec(errors)
    }
}
