//! User-visible status line and queued alerts.
//!
//! Frontends poll [`NoticeCenter::status`] for the transient save indicator
//! and drain [`NoticeCenter::take_pending`] for alerts to present.

use std::collections::VecDeque;

use crate::classify::{ClassifiedError, ErrorCategory};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
	Info,
	Warn,
	Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
	pub level: NoticeLevel,
	pub category: Option<ErrorCategory>,
	pub message: String,
}

impl Notice {
	pub fn info(message: impl Into<String>) -> Self {
		Self {
			level: NoticeLevel::Info,
			category: None,
			message: message.into(),
		}
	}

	/// Builds an alert for a classified failure, prefixed with `context`.
	pub fn failure(context: &str, error: &ClassifiedError) -> Self {
		let level = if error.is_retryable() { NoticeLevel::Warn } else { NoticeLevel::Error };
		Self {
			level,
			category: Some(error.category()),
			message: format!("{context}\n{}", error.message()),
		}
	}
}

#[derive(Debug, Default)]
pub struct NoticeCenter {
	pending: VecDeque<Notice>,
	status: String,
}

impl NoticeCenter {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn is_empty(&self) -> bool {
		self.pending.is_empty()
	}

	pub fn push(&mut self, notice: Notice) {
		self.pending.push_back(notice);
	}

	pub fn take_pending(&mut self) -> Vec<Notice> {
		self.pending.drain(..).collect()
	}

	pub fn status(&self) -> &str {
		&self.status
	}

	pub fn set_status(&mut self, status: impl Into<String>) {
		self.status = status.into();
	}

	pub fn clear_status(&mut self) {
		self.status.clear();
	}
}
