//! Capability-based file helpers shared by the stores and the exporter.

use std::io;

use camino::Utf8Path;
use cap_std::{ambient_authority, fs_utf8::Dir};
use uuid::Uuid;

/// Splits `path` into its parent directory and file name.
pub(crate) fn split(path: &Utf8Path) -> io::Result<(&Utf8Path, &str)> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));
    let file_name = path.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{path} is missing a file name"),
        )
    })?;
    Ok((parent, file_name))
}

/// Opens `path` as a directory, creating it first when absent.
pub(crate) fn ensure_dir(path: &Utf8Path) -> io::Result<Dir> {
    Dir::create_ambient_dir_all(path, ambient_authority())?;
    Dir::open_ambient_dir(path, ambient_authority())
}

/// Returns whether `path` exists; a missing parent directory counts as
/// absent rather than as an error.
pub(crate) fn exists(path: &Utf8Path) -> io::Result<bool> {
    let (parent, file_name) = split(path)?;
    match Dir::open_ambient_dir(parent, ambient_authority()) {
        Ok(dir) => dir.try_exists(file_name),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

/// Reads `path` into a string.
pub(crate) fn read_to_string(path: &Utf8Path) -> io::Result<String> {
    let (parent, file_name) = split(path)?;
    Dir::open_ambient_dir(parent, ambient_authority())?.read_to_string(file_name)
}

/// Replaces `path` with `contents` so readers see either the previous file or
/// the new one, never a partial write.
///
/// The data goes to a uniquely named sibling first and is then renamed over
/// the target. The temporary file is removed when either step fails.
pub(crate) fn write_atomic(path: &Utf8Path, contents: &[u8]) -> io::Result<()> {
    let (parent, file_name) = split(path)?;
    let dir = ensure_dir(parent)?;
    let temp_name = format!(".{file_name}.tmp.{}", Uuid::new_v4());

    let result = dir
        .write(&temp_name, contents)
        .and_then(|()| dir.rename(&temp_name, &dir, file_name));
    if result.is_err() {
        dir.remove_file(&temp_name).ok();
    }
    result
}

/// Restricts `file_name` inside `dir` to owner read/write.
#[cfg(unix)]
pub(crate) fn restrict_to_owner(dir: &Dir, file_name: &str) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let permissions = cap_std::fs::Permissions::from_std(std::fs::Permissions::from_mode(0o600));
    dir.set_permissions(file_name, permissions)
}

#[cfg(not(unix))]
pub(crate) fn restrict_to_owner(_dir: &Dir, _file_name: &str) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use tempfile::TempDir;

    fn temp_root() -> (TempDir, Utf8PathBuf) {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
            .unwrap_or_else(|path| panic!("temp path should be utf8: {}", path.display()));
        (tmp, root)
    }

    #[test]
    fn split_defaults_parent_to_current_dir() {
        let (parent, name) = split(Utf8Path::new("cluster.yaml")).expect("split");
        assert_eq!(parent, Utf8Path::new("."));
        assert_eq!(name, "cluster.yaml");
    }

    #[test]
    fn write_atomic_creates_parents_and_leaves_no_temp_files() {
        let (_tmp, root) = temp_root();
        let target = root.join("nested").join("cluster.yaml");

        write_atomic(&target, b"first").expect("first write");
        write_atomic(&target, b"second").expect("overwrite");

        assert_eq!(read_to_string(&target).expect("read back"), "second");
        let entries: Vec<String> = std::fs::read_dir(root.join("nested"))
            .expect("list dir")
            .map(|entry| {
                entry
                    .expect("dir entry")
                    .file_name()
                    .to_string_lossy()
                    .into_owned()
            })
            .collect();
        assert_eq!(entries, ["cluster.yaml"]);
    }

    #[test]
    fn exists_treats_missing_parent_as_absent() {
        let (_tmp, root) = temp_root();
        let missing = root.join("missing").join("cluster.yaml");
        assert!(!exists(&missing).expect("exists should not fail"));
    }
}
