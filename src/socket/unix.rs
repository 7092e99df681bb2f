use std::fs;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::Path;

use miette::Result;
use nix::unistd::Uid;
use tracing::debug;

use crate::error::ClientError;

pub(crate) fn effective_uid() -> u32 {
	Uid::effective().as_raw()
}

/// `true` iff `dir` exists, is a directory, is owned by the effective user,
/// and has exactly the given mode bits set (spec.md §4.1 `checkruntimedir`).
pub(crate) fn dir_is_owned_and_mode(dir: &Path, mode: u32) -> Result<bool> {
	let meta = match fs::symlink_metadata(dir) {
		Ok(meta) => meta,
		Err(_) => return Ok(false),
	};
	if !meta.is_dir() {
		return Ok(false);
	}
	Ok(meta.uid() == effective_uid() && (meta.permissions().mode() & 0o777) == mode)
}

/// Ensure `dir` exists with mode `0700`, then re-stat without following
/// symlinks and refuse to continue if it's insecure (spec.md §4.1 step 2,
/// `preparesockdir`).
pub(crate) fn prepare_socket_dir(dir: &Path) -> Result<()> {
	match fs::create_dir(dir) {
		Ok(()) => {
			// create_dir uses the umask; pin the mode explicitly so a
			// permissive umask can't leave a freshly created directory
			// group/world accessible. A directory that already existed is
			// left untouched here and judged by the stat-and-abort checks
			// below instead (spec.md §3: "violations abort before any
			// socket is created" — a pre-existing insecure directory must
			// not be silently hardened and used).
			if let Ok(meta) = fs::symlink_metadata(dir) {
				if meta.is_dir() && meta.permissions().mode() & 0o777 != 0o700 {
					let mut perms = meta.permissions();
					perms.set_mode(0o700);
					let _ = fs::set_permissions(dir, perms);
				}
			}
		}
		Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {}
		Err(source) => {
			return Err(ClientError::SockDirCreate {
				path: dir.to_path_buf(),
				source,
			}
			.into());
		}
	}

	let meta = fs::symlink_metadata(dir).map_err(|source| ClientError::SockDirCreate {
		path: dir.to_path_buf(),
		source,
	})?;

	if !meta.is_dir() {
		return Err(ClientError::InsecureSockDir {
			path: dir.to_path_buf(),
			reason: "exists but is not a directory",
		}
		.into());
	}
	if meta.uid() != effective_uid() {
		return Err(ClientError::InsecureSockDir {
			path: dir.to_path_buf(),
			reason: "not owned by the effective user",
		}
		.into());
	}
	if meta.permissions().mode() & 0o077 != 0 {
		return Err(ClientError::InsecureSockDir {
			path: dir.to_path_buf(),
			reason: "group or other bits are set",
		}
		.into());
	}

	debug!(?dir, "socket directory is secure");
	Ok(())
}
