use crate::convert;
use crate::grpc::ProtoSnapshot;
use crate::persist::codec;
use crate::persist::PersistError;
use crate::raft_log::Snapshot;
use std::fs;
use std::path::{Path, PathBuf};

const SNAP_SUFFIX: &str = ".snap";

/// Snapshotter owns a directory of snapshot files named `{term:016}-{index:016}.snap`. Zero
/// padding makes lexicographic order match (term, index) order, so the newest file sorts last.
pub struct Snapshotter {
    dir: PathBuf,
    logger: slog::Logger,
}

impl Snapshotter {
    pub fn new(dir: PathBuf, logger: slog::Logger) -> Result<Self, PersistError> {
        fs::create_dir_all(&dir)?;
        Ok(Snapshotter { dir, logger })
    }

    #[cfg(test)]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes the snapshot to a new file. An existing file for the same (term, index) is left
    /// untouched; it already holds this snapshot.
    pub fn save(&self, snapshot: &Snapshot) -> Result<(), PersistError> {
        if snapshot.is_empty() {
            return Ok(());
        }

        let path = self.dir.join(Self::file_name(snapshot));
        if path.exists() {
            slog::debug!(self.logger, "Snapshot file {:?} already exists, not overwriting", path);
            return Ok(());
        }

        let framed = codec::encode(&convert::snapshot_to_proto(snapshot))?;
        codec::write_atomic(&path, &framed)?;
        slog::info!(
            self.logger,
            "Saved snapshot [index={}, term={}] to {:?}",
            snapshot.metadata.index,
            snapshot.metadata.term,
            path
        );
        Ok(())
    }

    /// Returns the newest snapshot that reads back intact, or `None` if there is none. Unreadable
    /// files are skipped; a crash mid-save can leave one behind.
    pub fn load(&self) -> Result<Option<Snapshot>, PersistError> {
        for name in self.snap_names()? {
            let path = self.dir.join(&name);
            match Self::read(&path) {
                Ok(snapshot) => return Ok(Some(snapshot)),
                Err(e) => slog::warn!(self.logger, "Skipping unreadable snapshot {:?}: {}", path, e),
            }
        }
        Ok(None)
    }

    fn read(path: &Path) -> Result<Snapshot, PersistError> {
        let framed = fs::read(path)?;
        let proto: ProtoSnapshot = codec::decode(path, &framed)?;
        Ok(convert::snapshot_from_proto(proto))
    }

    /// Snapshot file names, newest first.
    fn snap_names(&self) -> Result<Vec<String>, PersistError> {
        let mut names = Vec::new();
        for dir_entry in fs::read_dir(&self.dir)? {
            let name = dir_entry?.file_name();
            match name.to_str() {
                Some(name) if name.ends_with(SNAP_SUFFIX) => names.push(name.to_string()),
                _ => {}
            }
        }
        names.sort_unstable_by(|a, b| b.cmp(a));
        Ok(names)
    }

    fn file_name(snapshot: &Snapshot) -> String {
        format!(
            "{:016}-{:016}{}",
            snapshot.metadata.term, snapshot.metadata.index, SNAP_SUFFIX
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn snapshotter(dir: &Path) -> Snapshotter {
        Snapshotter::new(dir.join("snap"), slog::Logger::root(slog::Discard, slog::o!())).unwrap()
    }

    #[test]
    fn empty_dir_loads_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let snapshotter = snapshotter(tmp.path());
        assert_eq!(snapshotter.load().unwrap(), None);
    }

    #[test]
    fn load_returns_newest() {
        let tmp = tempfile::tempdir().unwrap();
        let snapshotter = snapshotter(tmp.path());

        snapshotter.save(&Snapshot::new(5, 1, Bytes::from("a"))).unwrap();
        snapshotter.save(&Snapshot::new(20, 3, Bytes::from("c"))).unwrap();
        snapshotter.save(&Snapshot::new(9, 2, Bytes::from("b"))).unwrap();

        assert_eq!(
            snapshotter.load().unwrap(),
            Some(Snapshot::new(20, 3, Bytes::from("c")))
        );
        assert!(snapshotter
            .dir()
            .join("0000000000000003-0000000000000020.snap")
            .exists());
    }

    #[test]
    fn never_overwrites_existing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let snapshotter = snapshotter(tmp.path());

        snapshotter.save(&Snapshot::new(5, 1, Bytes::from("first"))).unwrap();
        snapshotter.save(&Snapshot::new(5, 1, Bytes::from("second"))).unwrap();

        assert_eq!(
            snapshotter.load().unwrap(),
            Some(Snapshot::new(5, 1, Bytes::from("first")))
        );
    }

    #[test]
    fn skips_corrupt_newest_file() {
        let tmp = tempfile::tempdir().unwrap();
        let snapshotter = snapshotter(tmp.path());

        snapshotter.save(&Snapshot::new(5, 1, Bytes::from("good"))).unwrap();
        fs::write(
            snapshotter.dir().join("0000000000000002-0000000000000010.snap"),
            b"partial write",
        )
        .unwrap();

        assert_eq!(
            snapshotter.load().unwrap(),
            Some(Snapshot::new(5, 1, Bytes::from("good")))
        );
    }
}
