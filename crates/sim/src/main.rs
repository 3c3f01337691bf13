//! Quill autosave simulator.
//!
//! Seeds an in-memory project from a script, opens an autosave session on it
//! and replays the script's edits, injected failures and waits, printing the
//! status line and notices as they appear.

mod script;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use quill_autosave::{AutosaveSettings, Failure, MemoryStore, ProjectConfig, Response, Session, StoreOp};
use tracing::info;

use crate::script::{Command, Script};

/// Simulator command line arguments.
#[derive(Parser, Debug)]
#[command(name = "quill-sim")]
#[command(about = "Replay an edit script against an in-memory project")]
struct Args {
	/// Script to replay
	#[arg(short, long, value_name = "PATH")]
	script: PathBuf,

	/// Autosave settings (TOML)
	#[arg(long, value_name = "PATH")]
	settings: Option<PathBuf>,

	/// Verbose logging
	#[arg(short, long)]
	verbose: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
	let args = Args::parse();

	let subscriber = tracing_subscriber::fmt()
		.with_max_level(if args.verbose {
			tracing::Level::DEBUG
		} else {
			tracing::Level::INFO
		})
		.with_writer(std::io::stderr)
		.finish();
	tracing::subscriber::set_global_default(subscriber)?;

	let settings = match &args.settings {
		Some(path) => AutosaveSettings::load(path)?,
		None => AutosaveSettings::default(),
	};
	let text = std::fs::read_to_string(&args.script).with_context(|| format!("reading {}", args.script.display()))?;
	let script = Script::parse(&text)?;

	let store = script
		.files
		.iter()
		.fold(MemoryStore::new(sim_config()), |store, (path, contents)| store.with_file(path.as_str(), contents.as_str(), None));
	let store = Arc::new(store);
	info!(files = script.files.len(), commands = script.commands.len(), "sim.start");

	let session = Session::open(store.clone(), &settings).await?;
	for (line, command) in &script.commands {
		apply(&session, &store, &settings, command)
			.await
			.with_context(|| format!("line {line}: {command:?}"))?;
		report(&session);
	}

	session.queue().idle().await;
	report(&session);
	println!("-- files");
	for record in session.files() {
		println!("{:<24} {:?}", record.name(), record.state());
	}
	println!("-- store ({} puts)", store.count(StoreOp::Put));
	for path in store.paths() {
		println!("{path}: {:?}", store.contents(&path).unwrap_or_default());
	}
	Ok(())
}

fn sim_config() -> ProjectConfig {
	ProjectConfig {
		project_id: "sim".into(),
		project_name: "simulated project".into(),
		project_run_url: Some("http://localhost:8080/sim/".into()),
		user_content_host: None,
	}
}

async fn apply(session: &Session, store: &MemoryStore, settings: &AutosaveSettings, command: &Command) -> anyhow::Result<()> {
	match command {
		Command::Edit { path, text } => {
			session.edit_file(path, text.as_str())?;
		}
		Command::Fail { count, status } => {
			for _ in 0..*count {
				store.fail_next_with_status(StoreOp::Put, *status);
			}
		}
		Command::AppError { message } => {
			let response = Response::new("PUT", "/putfile", 400)
				.with_header(settings.error_header.as_str(), "True")
				.with_body(message.as_str());
			store.fail_next(StoreOp::Put, Failure::Response(response));
		}
		Command::Insert { path } => {
			session.insert(path)?;
		}
		Command::Delete { path } => session.delete(path)?,
		Command::Rename { from, to } => {
			session.rename(from, to)?;
		}
		Command::Select { path } => session.select(path)?,
		Command::Wait(duration) => tokio::time::sleep(*duration).await,
		Command::Flush => match session.run_url().await {
			Ok(url) => println!("flushed; run at {}", url.unwrap_or_default()),
			Err(err) => println!("flush incomplete: {err}"),
		},
	}
	Ok(())
}

fn report(session: &Session) {
	for notice in session.take_notices() {
		println!("[{:?}] {}", notice.level, notice.message.replace('\n', " | "));
	}
	let status = session.status();
	if !status.is_empty() {
		println!("status: {status}");
	}
}
