//! Non-unix targets have no Unix-domain sockets, which spec.md §1 lists as
//! an explicit non-goal ("no support for environments lacking ... Unix
//! domain sockets"). This module exists only so the crate still type-checks
//! when cross-compiled for documentation purposes; every function errors.

use std::path::Path;

use miette::{IntoDiagnostic, Result};

pub(crate) fn effective_uid() -> u32 {
	0
}

pub(crate) fn dir_is_owned_and_mode(_dir: &Path, _mode: u32) -> Result<bool> {
	Ok(false)
}

pub(crate) fn prepare_socket_dir(_dir: &Path) -> Result<()> {
	Err(std::io::Error::new(
		std::io::ErrorKind::Unsupported,
		"this client requires a Unix-domain socket capable platform",
	))
	.into_diagnostic()
}
