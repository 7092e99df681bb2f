//! C1: socket path resolver (spec.md §4.1).
//!
//! Computes the secure socket directory and the two paths ([`SocketPaths`])
//! a session needs: the stable rendezvous path, and the transient
//! per-spawner path that gets renamed onto it after a successful handshake.

use std::path::PathBuf;

use miette::Result;

use crate::config::Config;
use crate::error::ClientError;

pub(crate) use imp::prepare_socket_dir;

#[cfg(unix)]
#[path = "socket/unix.rs"]
mod imp;
#[cfg(not(unix))]
#[path = "socket/fallback.rs"]
mod imp;

/// The two paths a [`crate::session::Driver`] needs to find or start a server.
#[derive(Debug, Clone)]
pub struct SocketPaths {
	/// Stable rendezvous path; matching clients converge here.
	pub socket_path: PathBuf,
	/// Transient per-spawner path, `<socket_path>.<pid>`, promoted to
	/// `socket_path` only after a successful handshake (spec.md invariant).
	pub init_socket_path: PathBuf,
}

/// Platform maximum path length the rename boundary must respect (the
/// kernel enforces this; we check ahead of time for a clearer diagnostic).
#[cfg(unix)]
pub const PATH_MAX: usize = libc::PATH_MAX as usize;
#[cfg(not(unix))]
pub const PATH_MAX: usize = 4096;

/// Resolve `(socket_path, init_socket_path)` per spec.md §4.1's policy.
pub fn resolve(config: &Config, pid: u32) -> Result<SocketPaths> {
	let socket_path = if let Some(explicit) = &config.sockname_override {
		explicit.clone()
	} else {
		let dir = default_socket_dir(config)?;
		prepare_socket_dir(&dir)?;
		dir.join("server")
	};

	check_len(&socket_path)?;

	let init_socket_path = {
		let mut s = socket_path.clone().into_os_string();
		s.push(format!(".{pid}"));
		PathBuf::from(s)
	};
	check_len(&init_socket_path)?;

	Ok(SocketPaths {
		socket_path,
		init_socket_path,
	})
}

/// `${XDG_RUNTIME_DIR}/<slug>` if that directory is secure, else
/// `${TMPDIR:-/tmp}/<slug><euid>` (spec.md §4.1 step 1).
fn default_socket_dir(config: &Config) -> Result<PathBuf> {
	if let Some(runtime_dir) = std::env::var_os("XDG_RUNTIME_DIR") {
		let runtime_dir = PathBuf::from(runtime_dir);
		if runtime_dir_is_eligible(&runtime_dir) {
			return Ok(runtime_dir.join(config.slug));
		}
	}

	let tmpdir = std::env::var_os("TMPDIR")
		.filter(|v| !v.is_empty())
		.map_or_else(|| PathBuf::from("/tmp"), PathBuf::from);
	Ok(tmpdir.join(format!("{}{}", config.slug, imp::effective_uid())))
}

/// A directory is eligible as `XDG_RUNTIME_DIR` only if it exists, is a real
/// directory, is owned by the effective user, and has exact mode `0700`
/// (spec.md §4.1 step 1, §8 property 3).
fn runtime_dir_is_eligible(dir: &std::path::Path) -> bool {
	imp::dir_is_owned_and_mode(dir, 0o700).unwrap_or(false)
}

fn check_len(path: &std::path::Path) -> Result<()> {
	let len = path.as_os_str().len();
	if len >= PATH_MAX {
		return Err(ClientError::PathTooLong {
			path: path.display().to_string(),
			limit: PATH_MAX,
		}
		.into());
	}
	Ok(())
}
