//! Format-aware loading of configuration and manifest files.

use std::path::Path;

use serde::de::DeserializeOwned;

use crate::error::{Error, Result};

/// Supported document formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Toml,
    Yaml,
    Json,
}

impl Format {
    /// Pick a format from the file extension.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedFormat`] for unknown or missing extensions.
    pub fn from_path(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);

        match extension.as_deref() {
            Some("toml") => Ok(Self::Toml),
            Some("yaml" | "yml") => Ok(Self::Yaml),
            Some("json") => Ok(Self::Json),
            _ => Err(Error::UnsupportedFormat {
                path: path.to_path_buf(),
            }),
        }
    }
}

/// Deserialize `content` in the given format.
///
/// # Errors
///
/// Returns the format-specific parse error.
pub fn parse_str<T: DeserializeOwned>(content: &str, format: Format) -> Result<T> {
    match format {
        Format::Toml => {
            toml::from_str(content).map_err(|e| Error::toml_parse_failed(e.to_string()))
        }
        Format::Yaml => {
            serde_yaml::from_str(content).map_err(|e| Error::yaml_parse_failed(e.to_string()))
        }
        Format::Json => {
            serde_json::from_str(content).map_err(|e| Error::json_parse_failed(e.to_string()))
        }
    }
}

/// Read and deserialize a file, choosing the format by extension.
///
/// # Errors
///
/// Returns an error if the extension is unsupported, the file cannot be read,
/// or its content does not parse.
pub fn load_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let format = Format::from_path(path)?;
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::file_read_failed(path, e.to_string()))?;

    tracing::debug!(path = %path.display(), ?format, "Loading file");

    parse_str(&content, format)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::io::Write;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Sample {
        workers: usize,
        #[serde(default)]
        label: Option<String>,
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(Format::from_path(Path::new("a.toml")).ok(), Some(Format::Toml));
        assert_eq!(Format::from_path(Path::new("a.YML")).ok(), Some(Format::Yaml));
        assert_eq!(Format::from_path(Path::new("a.yaml")).ok(), Some(Format::Yaml));
        assert_eq!(Format::from_path(Path::new("a.json")).ok(), Some(Format::Json));
        assert!(Format::from_path(Path::new("a.ini")).is_err());
        assert!(Format::from_path(Path::new("noext")).is_err());
    }

    #[test]
    fn test_parse_each_format() {
        let toml: Sample = parse_str("workers = 3", Format::Toml).unwrap();
        let yaml: Sample = parse_str("workers: 3\nlabel: x", Format::Yaml).unwrap();
        let json: Sample = parse_str(r#"{"workers": 3}"#, Format::Json).unwrap();

        assert_eq!(toml.workers, 3);
        assert_eq!(yaml.label.as_deref(), Some("x"));
        assert_eq!(json, toml);
    }

    #[test]
    fn test_parse_error_is_typed() {
        let err = parse_str::<Sample>("workers = \"many\"", Format::Toml).unwrap_err();
        assert!(matches!(err, Error::TomlParseFailed { .. }));
    }

    #[test]
    fn test_load_file_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registrar.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "workers: 5").unwrap();

        let sample: Sample = load_file(&path).unwrap();
        assert_eq!(sample.workers, 5);
    }

    #[test]
    fn test_load_missing_file_fails() {
        let err = load_file::<Sample>(Path::new("/nonexistent/registrar.toml")).unwrap_err();
        assert!(matches!(err, Error::FileReadFailed { .. }));
    }
}
