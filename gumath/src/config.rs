//! Engine Configuration
//!
//! Options controlling registry capacity, built-in kernels and the order in
//! which calling conventions are tried.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{GumathError, Result};
use crate::kernel::Convention;

/// Default bound on kernel sets per function.
pub const MAX_KERNELS: usize = 128;

/// Configuration for a [`Registry`](crate::Registry).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of kernel sets per function.
    pub max_kernels: usize,

    /// Register the built-in kernel families on construction.
    pub builtin_kernels: bool,

    /// Calling conventions in order of preference.
    pub conventions: Vec<Convention>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_kernels: MAX_KERNELS,
            builtin_kernels: true,
            conventions: Convention::ALL.to_vec(),
        }
    }
}

impl EngineConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Self::parse(text, Path::new("<string>"))
    }

    /// Load and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text, path)
    }

    fn parse(text: &str, path: &Path) -> Result<Self> {
        let config: EngineConfig = toml::from_str(text).map_err(|e| GumathError::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        config.validate().map_err(|message| GumathError::Config {
            path: path.to_path_buf(),
            message,
        })?;
        Ok(config)
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.max_kernels == 0 {
            return Err("max_kernels must be at least 1".to_string());
        }
        if self.conventions.is_empty() {
            return Err("conventions must not be empty".to_string());
        }
        for (i, c) in self.conventions.iter().enumerate() {
            if self.conventions[..i].contains(c) {
                return Err(format!("convention `{c}` listed more than once"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_kernels, 128);
        assert!(config.builtin_kernels);
        assert_eq!(
            config.conventions,
            vec![Convention::C, Convention::Fortran, Convention::Strided, Convention::Xnd]
        );
    }

    #[test]
    fn test_partial_document_keeps_defaults() {
        let config = EngineConfig::from_toml_str("max_kernels = 8").unwrap();
        assert_eq!(config.max_kernels, 8);
        assert!(config.builtin_kernels);
        assert_eq!(config.conventions.len(), 4);
    }

    #[test]
    fn test_convention_order() {
        let config = EngineConfig::from_toml_str(r#"conventions = ["xnd", "strided"]"#).unwrap();
        assert_eq!(config.conventions, vec![Convention::Xnd, Convention::Strided]);
    }

    #[test]
    fn test_invalid_values() {
        assert!(EngineConfig::from_toml_str("max_kernels = 0").is_err());
        assert!(EngineConfig::from_toml_str("conventions = []").is_err());
        assert!(EngineConfig::from_toml_str(r#"conventions = ["c", "c"]"#).is_err());
        assert!(EngineConfig::from_toml_str(r#"conventions = ["cuda"]"#).is_err());
    }

    #[test]
    fn test_load_reports_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_kernels = 0").unwrap();
        let err = EngineConfig::load(file.path()).unwrap_err();
        match err {
            GumathError::Config { path, message } => {
                assert_eq!(path, file.path());
                assert!(message.contains("max_kernels"));
            }
            other => panic!("expected config error, got {other:?}"),
        }
    }
}
