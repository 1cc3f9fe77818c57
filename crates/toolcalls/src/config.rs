//! Tunables for detection and repair.

use std::{fmt, path::Path, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Default bound on the number of closers the repairer will synthesize.
pub const DEFAULT_MAX_AUTOCLOSE_DEPTH: usize = 3;

/// Which mutating call survives when a response contains several.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutatingPolicy {
    /// Keep the last mutating call in scan order.
    #[default]
    Last,
    /// Keep the first mutating call in scan order.
    First,
}

impl FromStr for MutatingPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "last" => Ok(Self::Last),
            "first" => Ok(Self::First),
            other => Err(Error::message(format!("unknown mutating policy: {other}"))),
        }
    }
}

impl fmt::Display for MutatingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Last => f.write_str("last"),
            Self::First => f.write_str("first"),
        }
    }
}

/// Configuration for a [`crate::Detector`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Maximum number of closing tokens the repairer may append to a
    /// truncated tool-call fragment. Deeper truncation is left unrepaired.
    pub max_autoclose_depth: usize,

    /// Which mutating call to keep when several are detected.
    pub mutating_policy: MutatingPolicy,

    /// Treat argument-only objects (e.g. `{repo, path, start_line}`) as calls
    /// to the tool whose shape they match.
    pub infer_bare_shapes: bool,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            max_autoclose_depth: DEFAULT_MAX_AUTOCLOSE_DEPTH,
            mutating_policy: MutatingPolicy::default(),
            infer_bare_shapes: true,
        }
    }
}

impl DetectionConfig {
    /// Parse a configuration from TOML. Missing keys take their defaults.
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&data)
    }

    fn validate(&self) -> Result<()> {
        if self.max_autoclose_depth == 0 {
            return Err(Error::message("max_autoclose_depth must be at least 1"));
        }
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, std::io::Write};

    #[test]
    fn defaults() {
        let config = DetectionConfig::default();
        assert_eq!(config.max_autoclose_depth, 3);
        assert_eq!(config.mutating_policy, MutatingPolicy::Last);
        assert!(config.infer_bare_shapes);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = DetectionConfig::from_toml_str("mutating_policy = \"first\"").unwrap();
        assert_eq!(config.mutating_policy, MutatingPolicy::First);
        assert_eq!(config.max_autoclose_depth, 3);
    }

    #[test]
    fn empty_toml_is_default() {
        let config = DetectionConfig::from_toml_str("").unwrap();
        assert_eq!(config, DetectionConfig::default());
    }

    #[test]
    fn zero_depth_rejected() {
        let err = DetectionConfig::from_toml_str("max_autoclose_depth = 0").unwrap_err();
        assert!(matches!(err, Error::Message(_)));
    }

    #[test]
    fn unknown_policy_rejected() {
        assert!(DetectionConfig::from_toml_str("mutating_policy = \"random\"").is_err());
        assert!("random".parse::<MutatingPolicy>().is_err());
        assert_eq!("FIRST".parse::<MutatingPolicy>().unwrap(), MutatingPolicy::First);
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_autoclose_depth = 5\ninfer_bare_shapes = false").unwrap();
        let config = DetectionConfig::load(file.path()).unwrap();
        assert_eq!(config.max_autoclose_depth, 5);
        assert!(!config.infer_bare_shapes);
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let err = DetectionConfig::load("/nonexistent/mend.toml").unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
