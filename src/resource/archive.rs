use super::{normalize, ResourceError, ResourceSet};
use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use std::path::Path;
use tracing::debug;
use zip::ZipArchive;

/// Resources backed by a zip archive (`.war` / `.jar`).
///
/// The archive is inflated into memory at construction so entries stay
/// readable after the source file goes away (jar-in-archive entries have no
/// backing file at all) and so lookups on the request path never touch disk.
#[derive(Debug)]
pub struct ArchiveResources {
    name: String,
    entries: BTreeMap<String, Vec<u8>>,
}

impl ArchiveResources {
    /// Open a zip archive from disk.
    pub fn open(path: &Path) -> Result<Self, ResourceError> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(path.display().to_string(), bytes)
    }

    /// Open a zip archive held in memory (e.g. a `WEB-INF/lib` jar read out
    /// of an enclosing war).
    pub fn from_bytes(name: String, bytes: Vec<u8>) -> Result<Self, ResourceError> {
        let mut zip = ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| ResourceError::Archive(e.to_string()))?;
        let mut entries = BTreeMap::new();
        for i in 0..zip.len() {
            let mut entry = zip
                .by_index(i)
                .map_err(|e| ResourceError::Archive(e.to_string()))?;
            if entry.is_dir() {
                continue;
            }
            let logical = normalize(entry.name()).to_string();
            let mut buf = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut buf)?;
            entries.insert(logical, buf);
        }
        debug!(archive = %name, entry_count = entries.len(), "Archive inflated");
        Ok(Self { name, entries })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl ResourceSet for ArchiveResources {
    fn read(&self, path: &str) -> Result<Option<Vec<u8>>, ResourceError> {
        Ok(self.entries.get(normalize(path)).cloned())
    }

    fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(normalize(path))
    }

    fn paths(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn zip_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut cursor);
            for (name, data) in files {
                writer
                    .start_file(*name, SimpleFileOptions::default())
                    .unwrap();
                writer.write_all(data).unwrap();
            }
            writer.finish().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn reads_entries_from_memory_archive() {
        let bytes = zip_bytes(&[
            ("WEB-INF/web.yaml", b"servlets: []"),
            ("index.html", b"<html/>"),
        ]);
        let set = ArchiveResources::from_bytes("test.war".into(), bytes).unwrap();
        assert_eq!(set.read("/index.html").unwrap().unwrap(), b"<html/>");
        assert!(set.contains("WEB-INF/web.yaml"));
        assert!(set.read("missing").unwrap().is_none());
        assert_eq!(set.paths().len(), 2);
    }

    #[test]
    fn rejects_non_zip_bytes() {
        assert!(ArchiveResources::from_bytes("bad".into(), vec![1, 2, 3]).is_err());
    }
}
