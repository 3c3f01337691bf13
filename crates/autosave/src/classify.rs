//! Failure normalization.
//!
//! Stores report failures either as a raw fault or as a response descriptor.
//! [`ErrorClassifier`] sorts them into three categories so that one reporting
//! path can render them and the session can decide whether to retry:
//!
//! * [`ErrorCategory::Application`]: the backend flagged a domain error with
//!   the sentinel header. Shown verbatim; retrying will not help.
//! * [`ErrorCategory::Transport`]: any other non-2xx response. Often
//!   transient.
//! * [`ErrorCategory::Runtime`]: a fault with no response attached.

use thiserror::Error;

/// Header the backend sets on responses carrying a user-facing error.
pub const DEFAULT_ERROR_HEADER: &str = "X-Cloud-Playground-Error";

/// Response descriptor for a completed request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
	pub method: String,
	pub url: String,
	pub status: u16,
	pub headers: Vec<(String, String)>,
	pub body: String,
}

impl Response {
	pub fn new(method: impl Into<String>, url: impl Into<String>, status: u16) -> Self {
		Self {
			method: method.into(),
			url: url.into(),
			status,
			..Self::default()
		}
	}

	#[must_use]
	pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.headers.push((name.into(), value.into()));
		self
	}

	#[must_use]
	pub fn with_body(mut self, body: impl Into<String>) -> Self {
		self.body = body.into();
		self
	}

	/// Case-insensitive header lookup.
	pub fn header(&self, name: &str) -> Option<&str> {
		self.headers
			.iter()
			.find(|(key, _)| key.eq_ignore_ascii_case(name))
			.map(|(_, value)| value.as_str())
	}

	pub fn is_success(&self) -> bool {
		(200..300).contains(&self.status)
	}
}

/// Failure returned by a store operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Failure {
	/// Raised without a response (connection reset, serialization bug, ...).
	#[error("{0}")]
	Fault(String),
	/// The request completed with an unsuccessful response.
	#[error("{} <- {} {}", .0.status, .0.method, .0.url)]
	Response(Response),
}

impl Failure {
	pub fn fault(message: impl Into<String>) -> Self {
		Self::Fault(message.into())
	}
}

/// Normalized failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
	Application,
	Transport,
	Runtime,
}

impl ErrorCategory {
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Application => "application_error",
			Self::Transport => "transport_error",
			Self::Runtime => "runtime_fault",
		}
	}
}

/// A failure sorted into its category with a displayable message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClassifiedError {
	/// Backend-signaled error; `message` is the response body.
	#[error("Error:\n{message}")]
	Application { message: String },
	/// Non-2xx response without the sentinel header.
	#[error("{message}")]
	Transport { status: u16, message: String },
	/// Fault unrelated to a response.
	#[error("{message}")]
	Runtime { message: String },
}

impl ClassifiedError {
	pub fn category(&self) -> ErrorCategory {
		match self {
			Self::Application { .. } => ErrorCategory::Application,
			Self::Transport { .. } => ErrorCategory::Transport,
			Self::Runtime { .. } => ErrorCategory::Runtime,
		}
	}

	pub fn message(&self) -> &str {
		match self {
			Self::Application { message } | Self::Transport { message, .. } | Self::Runtime { message } => message,
		}
	}

	/// Whether an automatic retry may succeed.
	///
	/// Application errors need user action, so they are never retried.
	pub fn is_retryable(&self) -> bool {
		!matches!(self, Self::Application { .. })
	}
}

/// Sorts store failures into [`ClassifiedError`]s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorClassifier {
	error_header: String,
}

impl Default for ErrorClassifier {
	fn default() -> Self {
		Self::new(DEFAULT_ERROR_HEADER)
	}
}

impl ErrorClassifier {
	pub fn new(error_header: impl Into<String>) -> Self {
		Self {
			error_header: error_header.into(),
		}
	}

	pub fn error_header(&self) -> &str {
		&self.error_header
	}

	/// Passes successful responses through unchanged; anything else becomes a
	/// [`Failure::Response`].
	pub fn screen(&self, response: Response) -> Result<Response, Failure> {
		if response.is_success() {
			Ok(response)
		} else {
			Err(Failure::Response(response))
		}
	}

	pub fn classify(&self, failure: &Failure) -> ClassifiedError {
		match failure {
			Failure::Fault(message) => ClassifiedError::Runtime { message: message.clone() },
			Failure::Response(response) if response.header(&self.error_header).is_some() => ClassifiedError::Application {
				message: response.body.clone(),
			},
			Failure::Response(response) => ClassifiedError::Transport {
				status: response.status,
				message: format!("{} <- {} {}\n{}", response.status, response.method, response.url, response.body),
			},
		}
	}
}
