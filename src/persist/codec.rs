use crate::persist::PersistError;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;

/// Bytes of CRC32 checksum prefixed to every file we write.
const CHECKSUM_LEN: usize = 4;

/// Frames `message` as `crc32(payload) || payload`.
pub(super) fn encode<M: prost::Message>(message: &M) -> Result<Vec<u8>, PersistError> {
    let mut payload = Vec::with_capacity(message.encoded_len());
    message.encode(&mut payload)?;

    let checksum = crc32fast::hash(&payload);
    let mut framed = Vec::with_capacity(CHECKSUM_LEN + payload.len());
    framed.extend_from_slice(&checksum.to_le_bytes());
    framed.extend_from_slice(&payload);
    Ok(framed)
}

pub(super) fn decode<M: prost::Message + Default>(path: &Path, framed: &[u8]) -> Result<M, PersistError> {
    if framed.len() < CHECKSUM_LEN {
        return Err(PersistError::Truncated(path.to_path_buf()));
    }

    let (checksum_bytes, payload) = framed.split_at(CHECKSUM_LEN);
    let mut expected = [0u8; CHECKSUM_LEN];
    expected.copy_from_slice(checksum_bytes);
    if u32::from_le_bytes(expected) != crc32fast::hash(payload) {
        return Err(PersistError::ChecksumMismatch(path.to_path_buf()));
    }

    Ok(M::decode(payload)?)
}

/// Writes `contents` to `path` such that a crash leaves either the old or the new file, never a
/// mix: write to a temp sibling, fsync it, rename over, then fsync the directory.
pub(super) fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), PersistError> {
    let tmp_path = path.with_extension("tmp");

    let mut tmp = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp_path)?;
    tmp.write_all(contents)?;
    tmp.sync_all()?;
    drop(tmp);

    fs::rename(&tmp_path, path)?;
    if let Some(dir) = path.parent() {
        sync_dir(dir)?;
    }
    Ok(())
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<(), PersistError> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

// Directories can't be opened for fsync on Windows; rename is as durable as it gets there.
#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<(), PersistError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grpc::ProtoHardState;

    #[test]
    fn detects_corruption() {
        let path = Path::new("raft-state");
        let message = ProtoHardState {
            term: 4,
            vote: 2,
            commit: 10,
        };

        let mut framed = encode(&message).unwrap();
        let decoded: ProtoHardState = decode(path, &framed).unwrap();
        assert_eq!(decoded, message);

        let last = framed.len() - 1;
        framed[last] ^= 0xff;
        match decode::<ProtoHardState>(path, &framed) {
            Err(PersistError::ChecksumMismatch(_)) => {}
            other => panic!("expected checksum mismatch, got {:?}", other),
        }

        match decode::<ProtoHardState>(path, &framed[..2]) {
            Err(PersistError::Truncated(_)) => {}
            other => panic!("expected truncated, got {:?}", other),
        }
    }
}
