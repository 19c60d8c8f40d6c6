//! JSON configuration file helpers.

use std::fs;
use std::path::Path;

use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Read and deserialize a JSON document from `path`.
pub fn read_json_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path)?;
    if raw.trim().is_empty() {
        return Err(Error::config(format!("{} is empty", path.display())));
    }
    debug!(path = %path.display(), bytes = raw.len(), "loaded config file");
    Ok(serde_json::from_str(&raw)?)
}

/// Serialize `value` as pretty JSON and write it to `path`.
pub fn write_json_file<T: Serialize>(path: impl AsRef<Path>, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        name: String,
        count: u32,
    }

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("xrpilot-common-{}-{name}", std::process::id()))
    }

    #[test]
    fn test_json_file_write_then_read() {
        let path = temp_path("sample.json");
        let sample = Sample {
            name: "stereo".to_string(),
            count: 2,
        };
        write_json_file(&path, &sample).unwrap();
        let loaded: Sample = read_json_file(&path).unwrap();
        assert_eq!(loaded, sample);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result: Result<Sample> = read_json_file(temp_path("does-not-exist.json"));
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[test]
    fn test_empty_file_is_config_error() {
        let path = temp_path("empty.json");
        fs::write(&path, "  \n").unwrap();
        let result: Result<Sample> = read_json_file(&path);
        assert!(matches!(result, Err(Error::Config(_))));
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_malformed_json_is_serialization_error() {
        let path = temp_path("bad.json");
        fs::write(&path, "{ not json").unwrap();
        let result: Result<Sample> = read_json_file(&path);
        assert!(matches!(result, Err(Error::Serialization(_))));
        let _ = fs::remove_file(&path);
    }
}
