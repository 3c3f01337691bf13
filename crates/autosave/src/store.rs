//! Remote store seam.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::classify::Failure;

/// Mime type used when the store does not report one.
const FALLBACK_MIME: &str = "application/octet-stream";

/// Project identifiers and URLs, fetched once per session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectConfig {
	pub project_id: String,
	#[serde(default)]
	pub project_name: String,
	#[serde(default)]
	pub project_run_url: Option<String>,
	#[serde(default, alias = "PLAYGROUND_USER_CONTENT_HOST")]
	pub user_content_host: Option<String>,
}

impl ProjectConfig {
	pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
		serde_json::from_str(json)
	}
}

/// One entry of a project listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
	pub name: String,
	#[serde(default)]
	pub mime_type: Option<String>,
}

impl RemoteFile {
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			mime_type: None,
		}
	}
}

/// Contents of one fetched file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedFile {
	pub contents: String,
	/// Raw `Content-Type`, e.g. `text/html; charset=UTF-8`.
	pub content_type: Option<String>,
}

/// Asynchronous file store backing a project.
///
/// Every call of one session is issued from its serial queue, so
/// implementations never see two concurrent requests from the same session.
#[async_trait]
pub trait FileStore: Send + Sync + 'static {
	async fn project_config(&self) -> Result<ProjectConfig, Failure>;

	async fn list(&self) -> Result<Vec<RemoteFile>, Failure>;

	async fn get(&self, path: &str) -> Result<FetchedFile, Failure>;

	async fn put(&self, path: &str, contents: &str) -> Result<(), Failure>;

	async fn delete(&self, path: &str) -> Result<(), Failure>;

	async fn rename(&self, path: &str, new_path: &str) -> Result<(), Failure>;
}

/// Strips `Content-Type` parameters, falling back to `application/octet-stream`.
pub fn normalize_mime(content_type: Option<&str>) -> String {
	let essence = content_type.and_then(|raw| raw.split(';').next()).map(str::trim).unwrap_or_default();
	if essence.is_empty() {
		FALLBACK_MIME.to_string()
	} else {
		essence.to_string()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn mime_parameters_are_stripped() {
		assert_eq!(normalize_mime(Some("text/html; charset=UTF-8")), "text/html");
		assert_eq!(normalize_mime(Some("image/png")), "image/png");
	}

	#[test]
	fn missing_mime_falls_back_to_octet_stream() {
		assert_eq!(normalize_mime(None), FALLBACK_MIME);
		assert_eq!(normalize_mime(Some("  ")), FALLBACK_MIME);
	}

	#[test]
	fn project_config_accepts_legacy_host_key() {
		let config = ProjectConfig::from_json(
			r#"{"project_id": "42", "project_name": "demo", "PLAYGROUND_USER_CONTENT_HOST": "localhost:9100"}"#,
		)
		.expect("valid config");
		assert_eq!(config.project_id, "42");
		assert_eq!(config.user_content_host.as_deref(), Some("localhost:9100"));
		assert_eq!(config.project_run_url, None);
	}
}
