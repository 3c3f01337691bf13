//! Autosave tuning loaded from TOML.

use std::path::{Path, PathBuf};
use std::time::Duration;

use quill_worker::BackoffPolicy;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::classify::{DEFAULT_ERROR_HEADER, ErrorClassifier};

/// Errors that can occur when loading settings.
#[derive(Debug, Error)]
pub enum SettingsError {
	#[error("failed to parse autosave settings: {0}")]
	Parse(#[from] toml::de::Error),

	#[error("I/O error reading {path}: {error}")]
	Io { path: PathBuf, error: std::io::Error },

	#[error("invalid setting '{key}': {reason}")]
	Invalid { key: &'static str, reason: String },
}

/// Tunables for one autosave session.
///
/// ```toml
/// initial_backoff_ms = 1000
/// max_backoff_ms = 120000
/// error_header = "X-Cloud-Playground-Error"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AutosaveSettings {
	/// Delay before the first sweep after an edit, and the floor after a success.
	pub initial_backoff_ms: u64,
	/// Ceiling for the doubled retry delay.
	pub max_backoff_ms: u64,
	/// Response header marking backend-signaled application errors.
	pub error_header: String,
}

impl Default for AutosaveSettings {
	fn default() -> Self {
		Self {
			initial_backoff_ms: 1000,
			max_backoff_ms: 120_000,
			error_header: DEFAULT_ERROR_HEADER.to_string(),
		}
	}
}

impl AutosaveSettings {
	pub fn from_toml_str(text: &str) -> Result<Self, SettingsError> {
		let settings: Self = toml::from_str(text)?;
		settings.validate()?;
		Ok(settings)
	}

	pub fn load(path: &Path) -> Result<Self, SettingsError> {
		let text = std::fs::read_to_string(path).map_err(|error| SettingsError::Io {
			path: path.to_path_buf(),
			error,
		})?;
		Self::from_toml_str(&text)
	}

	pub fn validate(&self) -> Result<(), SettingsError> {
		if self.max_backoff_ms < self.initial_backoff_ms {
			return Err(SettingsError::Invalid {
				key: "max_backoff_ms",
				reason: format!("{} is below initial_backoff_ms ({})", self.max_backoff_ms, self.initial_backoff_ms),
			});
		}
		if self.error_header.trim().is_empty() {
			return Err(SettingsError::Invalid {
				key: "error_header",
				reason: "must not be empty".to_string(),
			});
		}
		Ok(())
	}

	pub fn backoff_policy(&self) -> BackoffPolicy {
		BackoffPolicy::new(Duration::from_millis(self.initial_backoff_ms), Duration::from_millis(self.max_backoff_ms))
	}

	pub fn classifier(&self) -> ErrorClassifier {
		ErrorClassifier::new(self.error_header.clone())
	}
}

#[cfg(test)]
mod tests {
	use std::io::Write;

	use super::*;

	#[test]
	fn empty_document_yields_defaults() {
		let settings = AutosaveSettings::from_toml_str("").expect("defaults");
		assert_eq!(settings, AutosaveSettings::default());
		assert_eq!(settings.backoff_policy(), BackoffPolicy::default());
	}

	#[test]
	fn partial_document_overrides_fields() {
		let settings = AutosaveSettings::from_toml_str("initial_backoff_ms = 50\nerror_header = \"X-Bliss-Error\"").expect("valid");
		assert_eq!(settings.initial_backoff_ms, 50);
		assert_eq!(settings.max_backoff_ms, 120_000);
		assert_eq!(settings.classifier().error_header(), "X-Bliss-Error");
	}

	#[test]
	fn unknown_keys_are_rejected() {
		let err = AutosaveSettings::from_toml_str("retry_forever = true").unwrap_err();
		assert!(matches!(err, SettingsError::Parse(_)), "got {err}");
	}

	#[test]
	fn inverted_bounds_are_rejected() {
		let err = AutosaveSettings::from_toml_str("initial_backoff_ms = 5000\nmax_backoff_ms = 10").unwrap_err();
		assert!(matches!(err, SettingsError::Invalid { key: "max_backoff_ms", .. }), "got {err}");
	}

	#[test]
	fn load_reads_file_and_reports_missing_path() {
		let mut file = tempfile::NamedTempFile::new().expect("temp file");
		writeln!(file, "max_backoff_ms = 8000").expect("write settings");
		let settings = AutosaveSettings::load(file.path()).expect("load");
		assert_eq!(settings.max_backoff_ms, 8000);

		let missing = file.path().with_extension("missing");
		assert!(matches!(AutosaveSettings::load(&missing), Err(SettingsError::Io { .. })));
	}
}
