use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("io error: {0}")]
	Io(#[from] std::io::Error),

	#[error("directory is already locked by another process: {0}")]
	AlreadyLocked(PathBuf),
}

/// Holds an exclusive advisory lock on a directory for the lifetime of the
/// server process, guarding against two instances accidentally sharing the
/// same data directory.
///
/// The lock is taken on a `.lock` file inside the directory rather than the
/// directory itself, since `flock` semantics on directories are unreliable
/// across platforms.
pub struct DirLock {
	dir: PathBuf,
	file: File,
}

impl DirLock {
	/// Opens (creating if necessary) the given directory and takes an
	/// exclusive lock on it. Fails immediately if another process already
	/// holds the lock rather than blocking.
	pub fn open(dir: &Path) -> Result<DirLock, Error> {
		std::fs::create_dir_all(dir)?;

		let file = OpenOptions::new()
			.create(true)
			.write(true)
			.open(dir.join(".lock"))?;

		file.try_lock_exclusive()
			.map_err(|_| Error::AlreadyLocked(dir.to_owned()))?;

		Ok(DirLock { dir: dir.to_owned(), file })
	}

	pub fn path(&self) -> &Path {
		&self.dir
	}
}

impl Drop for DirLock {
	fn drop(&mut self) {
		let _ = fs2::FileExt::unlock(&self.file);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn double_open_fails() {
		let tmp = tempdir();
		let _first = DirLock::open(&tmp).unwrap();
		assert!(DirLock::open(&tmp).is_err());
	}

	fn tempdir() -> PathBuf {
		let mut p = std::env::temp_dir();
		p.push(format!("common-dirlock-test-{}", std::process::id()));
		p
	}
}
