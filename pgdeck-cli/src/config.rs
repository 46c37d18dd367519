//! Environment loading
//!
//! `.env` files are read before argument parsing so that clap's `env`
//! fallbacks see their values. Variables already set in the process
//! environment always win.

use std::path::{Path, PathBuf};

/// Get the pgdeck config directory path (~/.pgdeck)
pub fn config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".pgdeck"))
}

/// Load `.env` from the current directory, then `~/.pgdeck/.env`.
///
/// Returns a description of each file loaded. Tracing is not initialized
/// yet when this runs, so the caller logs the result.
pub fn load_dotenv() -> Vec<String> {
    let mut loaded_from = Vec::new();

    if let Ok(path) = dotenvy::dotenv() {
        loaded_from.push(format!("current directory ({})", path.display()));
    }

    if let Some(env_file) = config_dir().map(|dir| dir.join(".env")) {
        if load_env_file(&env_file) {
            loaded_from.push(format!("~/.pgdeck/.env ({})", env_file.display()));
        }
    }

    loaded_from
}

/// Load one env file if it exists. dotenvy never overwrites set variables.
fn load_env_file(path: &Path) -> bool {
    path.exists() && dotenvy::from_path(path).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn env_file_fills_missing_vars_only() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "PGDECK_TEST_FROM_FILE=file").unwrap();
        writeln!(file, "PGDECK_TEST_PRESET=file").unwrap();
        std::env::set_var("PGDECK_TEST_PRESET", "process");

        assert!(load_env_file(file.path()));
        assert_eq!(std::env::var("PGDECK_TEST_FROM_FILE").unwrap(), "file");
        assert_eq!(std::env::var("PGDECK_TEST_PRESET").unwrap(), "process");
    }

    #[test]
    fn missing_env_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!load_env_file(&dir.path().join(".env")));
    }
}
