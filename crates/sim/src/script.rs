//! Line-oriented edit scripts.
//!
//! ```text
//! # seed the project
//! file app.yaml runtime: python
//! file main.py print("hi")\n
//!
//! edit main.py print("bye")\n
//! fail 2 503
//! wait 3500
//! flush
//! ```
//!
//! `file` lines seed the store before the session opens; every other line is
//! replayed in order. `\n` in text arguments becomes a newline.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("line {line}: {message}")]
pub struct ParseError {
	pub line: usize,
	pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
	Edit { path: String, text: String },
	/// Fail the next `count` writes with `status`.
	Fail { count: usize, status: u16 },
	/// Reject the next write with a backend-flagged error.
	AppError { message: String },
	Insert { path: String },
	Delete { path: String },
	Rename { from: String, to: String },
	Select { path: String },
	Wait(Duration),
	Flush,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct Script {
	pub files: Vec<(String, String)>,
	/// Commands paired with their 1-based line number.
	pub commands: Vec<(usize, Command)>,
}

impl Script {
	pub fn parse(text: &str) -> Result<Self, ParseError> {
		let mut script = Self::default();
		for (index, raw) in text.lines().enumerate() {
			let line = index + 1;
			let trimmed = raw.trim();
			if trimmed.is_empty() || trimmed.starts_with('#') {
				continue;
			}
			let (verb, rest) = trimmed.split_once(char::is_whitespace).unwrap_or((trimmed, ""));
			let rest = rest.trim_start();
			let err = |message: &str| ParseError {
				line,
				message: format!("{verb}: {message}"),
			};

			let command = match verb {
				"file" => {
					let (path, text) = path_and_text(rest).ok_or_else(|| err("expected <path> [contents]"))?;
					script.files.push((path, text));
					continue;
				}
				"edit" => {
					let (path, text) = path_and_text(rest).ok_or_else(|| err("expected <path> <text>"))?;
					Command::Edit { path, text }
				}
				"fail" => {
					let mut args = rest.split_whitespace();
					let count = match args.next() {
						Some(n) => n.parse::<usize>().map_err(|_| err("count must be a number"))?,
						None => 1,
					};
					let status = match args.next() {
						Some(s) => s.parse::<u16>().map_err(|_| err("status must be a number"))?,
						None => 503,
					};
					Command::Fail { count, status }
				}
				"app-error" => Command::AppError {
					message: unescape(rest),
				},
				"insert" => Command::Insert {
					path: single(rest).ok_or_else(|| err("expected <path>"))?,
				},
				"delete" => Command::Delete {
					path: single(rest).ok_or_else(|| err("expected <path>"))?,
				},
				"select" => Command::Select {
					path: single(rest).ok_or_else(|| err("expected <path>"))?,
				},
				"rename" => match rest.split_whitespace().collect::<Vec<_>>().as_slice() {
					[from, to] => Command::Rename {
						from: from.to_string(),
						to: to.to_string(),
					},
					_ => return Err(err("expected <from> <to>")),
				},
				"wait" => {
					let ms: u64 = rest.parse().map_err(|_| err("expected milliseconds"))?;
					Command::Wait(Duration::from_millis(ms))
				}
				"flush" => Command::Flush,
				_ => {
					return Err(ParseError {
						line,
						message: format!("unknown command {verb:?}"),
					});
				}
			};
			script.commands.push((line, command));
		}
		Ok(script)
	}
}

fn single(rest: &str) -> Option<String> {
	let mut parts = rest.split_whitespace();
	let path = parts.next()?;
	parts.next().is_none().then(|| path.to_string())
}

fn path_and_text(rest: &str) -> Option<(String, String)> {
	let (path, text) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
	(!path.is_empty()).then(|| (path.to_string(), unescape(text)))
}

fn unescape(text: &str) -> String {
	text.replace("\\n", "\n")
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;

	use super::*;

	#[test]
	fn seeds_and_commands_are_split() {
		let script = Script::parse(
			"# demo\nfile main.py print(1)\\n\nfile empty.txt\n\nedit main.py x = 1\nfail\nfail 3 500\nwait 1500\nrename a.txt b.txt\nflush\n",
		)
		.unwrap();
		assert_eq!(
			script.files,
			vec![("main.py".to_string(), "print(1)\n".to_string()), ("empty.txt".to_string(), String::new())]
		);
		assert_eq!(
			script.commands,
			vec![
				(
					5,
					Command::Edit {
						path: "main.py".into(),
						text: "x = 1".into()
					}
				),
				(6, Command::Fail { count: 1, status: 503 }),
				(7, Command::Fail { count: 3, status: 500 }),
				(8, Command::Wait(Duration::from_millis(1500))),
				(
					9,
					Command::Rename {
						from: "a.txt".into(),
						to: "b.txt".into()
					}
				),
				(10, Command::Flush),
			]
		);
	}

	#[test]
	fn bundled_script_parses() {
		let script = Script::parse(include_str!("../scripts/retry.txt")).unwrap();
		assert_eq!(script.files.len(), 2);
		assert_eq!(script.commands.last(), Some(&(19, Command::Flush)));
	}

	#[test]
	fn errors_carry_line_numbers() {
		assert_eq!(
			Script::parse("flush\nwait soon").unwrap_err(),
			ParseError {
				line: 2,
				message: "wait: expected milliseconds".into()
			}
		);
		assert_eq!(Script::parse("rename a.txt").unwrap_err().line, 1);
		assert_eq!(Script::parse("\n\nexplode").unwrap_err().to_string(), "line 3: unknown command \"explode\"");
	}

	#[test]
	fn single_path_commands_reject_extra_arguments() {
		assert!(Script::parse("insert a.txt b.txt").is_err());
		assert!(Script::parse("select").is_err());
		assert_eq!(
			Script::parse("app-error quota\\nexceeded").unwrap().commands,
			vec![(
				1,
				Command::AppError {
					message: "quota\nexceeded".into()
				}
			)]
		);
	}
}
