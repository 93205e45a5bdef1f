use crate::convert;
use crate::grpc::ProtoPersistedState;
use crate::persist::codec;
use crate::persist::snapshotter::Snapshotter;
use crate::persist::PersistError;
use crate::raft_log::{Entry, HardState, Snapshot};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const STATE_FILE: &str = "raft-state";
const SNAP_DIR: &str = "snap";

/// Everything a node needs to rebuild its log after a restart.
#[derive(Debug, Default, Eq, PartialEq)]
pub struct PersistedState {
    pub hard_state: HardState,
    pub entries: Vec<Entry>,
    pub snapshot: Option<Snapshot>,
}

/// Persister is the durable half of a node's log. It rewrites hard state and the full entry list
/// on every call, and delegates snapshots to a `Snapshotter`.
///
/// A data directory must be owned by exactly one Persister at a time.
pub struct Persister {
    state_path: PathBuf,
    snapshotter: Snapshotter,
    logger: slog::Logger,
}

impl Persister {
    pub fn new<P: AsRef<Path>>(data_dir: P, logger: slog::Logger) -> Result<Self, PersistError> {
        let data_dir = data_dir.as_ref();
        fs::create_dir_all(data_dir)?;

        let snapshotter = Snapshotter::new(data_dir.join(SNAP_DIR), logger.clone())?;

        Ok(Persister {
            state_path: data_dir.join(STATE_FILE),
            snapshotter,
            logger,
        })
    }

    /// Makes `hard_state` and `entries` durable, along with `snapshot` if given. The snapshot is
    /// written first: entries on disk must never start above the newest snapshot on disk.
    pub fn persist(
        &self,
        hard_state: &HardState,
        entries: &[Entry],
        snapshot: Option<&Snapshot>,
    ) -> Result<(), PersistError> {
        if let Some(snapshot) = snapshot {
            self.snapshotter.save(snapshot)?;
        }

        let state = ProtoPersistedState {
            hard_state: Some(convert::hard_state_to_proto(hard_state)),
            entries: entries.iter().map(convert::entry_to_proto).collect(),
        };
        let framed = codec::encode(&state)?;
        codec::write_atomic(&self.state_path, &framed)?;

        slog::trace!(
            self.logger,
            "Persisted {:?} with {} entries ({} bytes)",
            hard_state,
            entries.len(),
            framed.len()
        );
        Ok(())
    }

    pub fn load(&self) -> Result<PersistedState, PersistError> {
        let (hard_state, entries) = match self.read_state_file()? {
            Some(state) => state,
            None => (HardState::default(), Vec::new()),
        };
        let snapshot = self.load_snapshot()?;

        Ok(PersistedState {
            hard_state,
            entries,
            snapshot,
        })
    }

    pub fn load_hard_state(&self) -> Result<HardState, PersistError> {
        Ok(self.read_state_file()?.map(|(hs, _)| hs).unwrap_or_default())
    }

    pub fn load_entries(&self) -> Result<Vec<Entry>, PersistError> {
        Ok(self.read_state_file()?.map(|(_, entries)| entries).unwrap_or_default())
    }

    pub fn load_snapshot(&self) -> Result<Option<Snapshot>, PersistError> {
        self.snapshotter.load()
    }

    /// `None` if the node has never persisted anything.
    fn read_state_file(&self) -> Result<Option<(HardState, Vec<Entry>)>, PersistError> {
        let framed = match fs::read(&self.state_path) {
            Ok(framed) => framed,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let state: ProtoPersistedState = codec::decode(&self.state_path, &framed)?;
        let hard_state = state
            .hard_state
            .map(convert::hard_state_from_proto)
            .unwrap_or_default();
        let entries = state.entries.into_iter().map(convert::entry_from_proto).collect();

        Ok(Some((hard_state, entries)))
    }
}
