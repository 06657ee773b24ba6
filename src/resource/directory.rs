use super::{normalize, ResourceError, ResourceSet};
use std::path::{Component, Path, PathBuf};

/// Resources backed by an exploded directory on disk.
#[derive(Debug, Clone)]
pub struct DirectoryResources {
    root: PathBuf,
}

impl DirectoryResources {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    /// Map a logical path under the root, rejecting traversal components.
    fn map_path(&self, logical: &str) -> Option<PathBuf> {
        let mut pb = self.root.clone();
        for comp in Path::new(normalize(logical)).components() {
            match comp {
                Component::Normal(s) => pb.push(s),
                Component::CurDir => {}
                _ => return None,
            }
        }
        Some(pb)
    }

    fn collect(&self, dir: &Path, prefix: &str, out: &mut Vec<String>) {
        let entries = match std::fs::read_dir(dir) {
            Ok(e) => e,
            Err(_) => return,
        };
        let mut names: Vec<_> = entries.flatten().collect();
        names.sort_by_key(|e| e.file_name());
        for entry in names {
            let name = entry.file_name().to_string_lossy().into_owned();
            let logical = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{prefix}/{name}")
            };
            let path = entry.path();
            if path.is_dir() {
                self.collect(&path, &logical, out);
            } else {
                out.push(logical);
            }
        }
    }
}

impl ResourceSet for DirectoryResources {
    fn read(&self, path: &str) -> Result<Option<Vec<u8>>, ResourceError> {
        let Some(fs_path) = self.map_path(path) else {
            return Ok(None);
        };
        if !fs_path.is_file() {
            return Ok(None);
        }
        Ok(Some(std::fs::read(fs_path)?))
    }

    fn contains(&self, path: &str) -> bool {
        self.map_path(path).map(|p| p.is_file()).unwrap_or(false)
    }

    fn paths(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect(&self.root.clone(), "", &mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_parent_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let set = DirectoryResources::new(dir.path());
        assert!(set.read("../Cargo.toml").unwrap().is_none());
        assert!(!set.contains("../Cargo.toml"));
    }

    #[test]
    fn reads_and_enumerates_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("a.txt"), b"A").unwrap();
        std::fs::write(dir.path().join("sub/b.txt"), b"B").unwrap();

        let set = DirectoryResources::new(dir.path());
        assert_eq!(set.read("/a.txt").unwrap().unwrap(), b"A");
        assert_eq!(set.read("sub/b.txt").unwrap().unwrap(), b"B");
        let mut paths = set.paths();
        paths.sort();
        assert_eq!(paths, vec!["a.txt".to_string(), "sub/b.txt".to_string()]);
    }

    #[test]
    fn enumeration_matches_a_filesystem_walk() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a/b/c")).unwrap();
        for (path, bytes) in [
            ("top.txt", b"1".as_slice()),
            ("a/one.txt", b"2"),
            ("a/b/two.txt", b"3"),
            ("a/b/c/three.txt", b"4"),
        ] {
            std::fs::write(dir.path().join(path), bytes).unwrap();
        }

        let mut walked: Vec<String> = walkdir::WalkDir::new(dir.path())
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .map(|e| {
                e.path()
                    .strip_prefix(dir.path())
                    .unwrap()
                    .to_string_lossy()
                    .replace('\\', "/")
            })
            .collect();
        walked.sort();

        let set = DirectoryResources::new(dir.path());
        let mut paths = set.paths();
        paths.sort();
        assert_eq!(paths, walked);
        for path in &paths {
            assert!(set.contains(path));
        }
    }
}
