//! Everything the C original kept in statics (cached tool path, debug/color
//! flags) lives here instead, gathered once in `main` into an immutable
//! [`Config`] and threaded down into every component. See Design Notes §9.

use std::env;
use std::ffi::OsStr;
use std::path::PathBuf;

use miette::Result;

use crate::error::ClientError;

/// Prefix used to namespace the environment variables this client reads and
/// writes (spec.md §6's `<APP>` placeholder). Kept distinct from [`Config::slug`]
/// because the original tool's own override variable (`HG`, unprefixed) has
/// no prefix at all.
pub const ENV_PREFIX: &str = "CHG";

/// Slug used to namespace the socket directory (spec.md §6: `<slug>`).
pub const SLUG: &str = "chg";

/// Assembled once per invocation; never mutated afterwards.
#[derive(Debug, Clone)]
pub struct Config {
	/// Namespace for `<APP>*` environment variables (`CHG` by default).
	pub env_prefix: &'static str,
	/// Namespace for the socket directory name (`chg` by default).
	pub slug: &'static str,
	/// Whether `<APP>DEBUG` was set at start-up.
	pub debug: bool,
	/// Whether diagnostics should be colorized (stderr is a tty and
	/// `HGPLAIN` is unset).
	pub color: bool,
	/// Retry timeout in seconds; `0` means wait forever.
	pub timeout_secs: u64,
	/// Explicit socket path override from `<APP>SOCKNAME`, if set.
	pub sockname_override: Option<PathBuf>,
}

impl Config {
	/// Gather configuration from the live process environment. Reads the
	/// environment directly (not a snapshot) once, at start-up; later
	/// environment changes only matter for the values that are re-read
	/// live, namely the set pushed to the server (see `session::Driver`).
	#[must_use]
	pub fn from_env() -> Self {
		let debug = env_nonempty(&envkey("DEBUG"));
		let plain = env_nonempty("HGPLAIN");
		let color = !plain && is_stderr_tty();

		let timeout_secs = env::var(envkey("TIMEOUT"))
			.ok()
			.and_then(|v| v.parse::<u64>().ok())
			.unwrap_or(60);

		let sockname_override = env::var_os(envkey("SOCKNAME"))
			.filter(|v| !v.is_empty())
			.map(PathBuf::from);

		Self {
			env_prefix: ENV_PREFIX,
			slug: SLUG,
			debug,
			color,
			timeout_secs,
			sockname_override,
		}
	}

	/// Build the `<APP>NAME` form of an environment variable name used
	/// throughout the other components (e.g. `INTERNALMARK`, `HG`).
	#[must_use]
	pub fn env(&self, name: &str) -> String {
		format!("{}{name}", self.env_prefix)
	}
}

/// Set an environment variable this client pushes to the backing tool or
/// its own future invocations (the loop marker, the locale-preservation
/// pair, the resolved tool path), surfacing the one way this can actually
/// fail on a Rust target: a value containing an embedded NUL byte (spec.md
/// §7's "putenv/setenv failure").
pub fn set_env(name: &str, value: impl AsRef<OsStr>) -> Result<()> {
	let value = value.as_ref();
	#[cfg(unix)]
	{
		use std::os::unix::ffi::OsStrExt;
		if value.as_bytes().contains(&0) {
			return Err(ClientError::SetEnvFailed {
				name: name.to_owned(),
			}
			.into());
		}
	}
	env::set_var(name, value);
	Ok(())
}

fn envkey(name: &str) -> String {
	format!("{ENV_PREFIX}{name}")
}

fn env_nonempty(key: &str) -> bool {
	env::var_os(key).is_some_and(|v| !v.is_empty())
}

#[cfg(unix)]
fn is_stderr_tty() -> bool {
	use nix::unistd::isatty;
	isatty(std::io::stderr()).unwrap_or(false)
}

#[cfg(not(unix))]
fn is_stderr_tty() -> bool {
	false
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn env_key_uses_prefix() {
		let cfg = Config::from_env();
		assert_eq!(cfg.env("HG"), "CHGHG");
		assert_eq!(cfg.env("INTERNALMARK"), "CHGINTERNALMARK");
	}

	#[test]
	fn set_env_rejects_embedded_nul() {
		let result = set_env("CHG_TEST_SETENV_NUL", "bad\0value");
		assert!(result.is_err());
	}

	#[test]
	fn set_env_accepts_ordinary_value() {
		set_env("CHG_TEST_SETENV_OK", "fine").unwrap();
		assert_eq!(env::var("CHG_TEST_SETENV_OK").unwrap(), "fine");
		env::remove_var("CHG_TEST_SETENV_OK");
	}
}
