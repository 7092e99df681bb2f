#![deny(rust_2018_idioms)]

//! Entry point: gather [`Config`] from the environment, build the argv this
//! invocation should forward, and drive a single session to completion.

use std::env;

use miette::Result;
use tracing::debug;

mod client;
mod config;
mod connect;
mod error;
mod fallback;
mod flags;
mod gate;
mod instructions;
mod session;
mod signal;
mod socket;
mod supervisor;

use config::Config;
use session::Driver;

fn main() -> Result<()> {
	let config = Config::from_env();
	init_logging(&config);

	let argv: Vec<_> = env::args_os().skip(1).collect();
	debug!(version = %env!("CARGO_PKG_VERSION"), ?argv, "starting chg invocation");

	let driver = Driver::new(config, argv);
	let code = driver.run()?;

	std::process::exit(code);
}

/// Set up a `tracing` subscriber reading `RUST_LOG` if present, else
/// defaulting to a level gated by `<APP>DEBUG` — terse unless asked
/// otherwise, since this client runs on every invocation of the backing
/// tool and must not spam stderr in the common case.
fn init_logging(config: &Config) {
	let default_filter = if config.debug { "debug" } else { "warn" };
	let filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));

	let _ = tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_ansi(config.color)
		.with_writer(std::io::stderr)
		.try_init();
}
