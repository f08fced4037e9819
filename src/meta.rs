//! The META file: durable hard state and snapshot metadata.
//!
//! Layout, little-endian:
//!
//! ```text
//! [magic u32][version u32]
//! [term u64][vote u64][commit u64]
//! [snap_index u64][snap_term u64][meta_len u32][meta_bytes]
//! [crc32 u32]
//! ```
//!
//! `meta_bytes` holds the length-prefixed opaque `conf` and `user_data`
//! blobs of the snapshot. The file is replaced atomically: the new content
//! is written to `META.tmp`, fsynced, renamed over `META`, and the
//! directory is fsynced.

use std::fs;
use std::fs::File;
use std::io;
use std::io::Write;
use std::path::Path;

use byteorder::LittleEndian;
use byteorder::ReadBytesExt;
use byteorder::WriteBytesExt;
use codeq::Decode;
use codeq::Encode;

use crate::api::types::HardState;
use crate::api::types::SnapshotMeta;
use crate::errors::StorageError;
use crate::Config;

pub(crate) const META_MAGIC: u32 = 0x4D45_5441;
pub(crate) const META_VERSION: u32 = 1;

/// Everything the META file persists.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) struct MetaState {
    pub(crate) hard: HardState,
    pub(crate) snapshot: SnapshotMeta,
}

impl Encode for MetaState {
    fn encode<W: io::Write>(&self, mut w: W) -> Result<usize, io::Error> {
        let mut n = 0;

        w.write_u64::<LittleEndian>(self.hard.term)?;
        w.write_u64::<LittleEndian>(self.hard.vote)?;
        w.write_u64::<LittleEndian>(self.hard.commit)?;
        n += 24;

        w.write_u64::<LittleEndian>(self.snapshot.index)?;
        w.write_u64::<LittleEndian>(self.snapshot.term)?;
        n += 16;

        let meta_len = 8 + self.snapshot.conf.len() + self.snapshot.user_data.len();
        w.write_u32::<LittleEndian>(meta_len as u32)?;
        n += 4;

        w.write_u32::<LittleEndian>(self.snapshot.conf.len() as u32)?;
        w.write_all(&self.snapshot.conf)?;
        w.write_u32::<LittleEndian>(self.snapshot.user_data.len() as u32)?;
        w.write_all(&self.snapshot.user_data)?;
        n += meta_len;

        Ok(n)
    }
}

impl Decode for MetaState {
    fn decode<R: io::Read>(mut r: R) -> Result<Self, io::Error> {
        let term = r.read_u64::<LittleEndian>()?;
        let vote = r.read_u64::<LittleEndian>()?;
        let commit = r.read_u64::<LittleEndian>()?;

        let index = r.read_u64::<LittleEndian>()?;
        let snap_term = r.read_u64::<LittleEndian>()?;

        let meta_len = r.read_u32::<LittleEndian>()? as usize;

        let conf_len = r.read_u32::<LittleEndian>()? as usize;
        if conf_len + 8 > meta_len {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "snapshot blob length {} exceeds meta length {}",
                    conf_len, meta_len
                ),
            ));
        }
        let mut conf = vec![0u8; conf_len];
        r.read_exact(&mut conf)?;

        let user_len = r.read_u32::<LittleEndian>()? as usize;
        if conf_len + user_len + 8 != meta_len {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "snapshot blob lengths {}+{} disagree with meta length {}",
                    conf_len, user_len, meta_len
                ),
            ));
        }
        let mut user_data = vec![0u8; user_len];
        r.read_exact(&mut user_data)?;

        Ok(Self {
            hard: HardState { term, vote, commit },
            snapshot: SnapshotMeta {
                index,
                term: snap_term,
                conf,
                user_data,
            },
        })
    }
}

/// Loads the META file, or returns `None` when it does not exist yet.
pub(crate) fn load(config: &Config) -> Result<Option<MetaState>, StorageError> {
    let path = config.meta_path();

    let bytes = match fs::read(&path) {
        Ok(b) => b,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let corrupt = |reason: String| {
        StorageError::corrupt(path.display(), 0, reason)
    };

    if bytes.len() < 12 {
        return Err(corrupt(format!("file too short: {} bytes", bytes.len())));
    }

    let body = &bytes[..bytes.len() - 4];
    let stored_crc =
        u32::from_le_bytes(bytes[bytes.len() - 4..].try_into().unwrap());

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(body);
    let got = hasher.finalize();
    if got != stored_crc {
        return Err(corrupt(format!(
            "checksum mismatch: stored {:08x}, computed {:08x}",
            stored_crc, got
        )));
    }

    let mut r = body;
    let magic = r.read_u32::<LittleEndian>()?;
    if magic != META_MAGIC {
        return Err(corrupt(format!("bad magic {:08x}", magic)));
    }
    let version = r.read_u32::<LittleEndian>()?;
    if version != META_VERSION {
        return Err(corrupt(format!("unsupported version {}", version)));
    }

    let state = MetaState::decode(&mut r)
        .map_err(|e| corrupt(format!("cannot decode: {}", e)))?;

    Ok(Some(state))
}

/// Persists the META file with a write-then-rename replace.
pub(crate) fn store(
    config: &Config,
    state: &MetaState,
) -> Result<(), io::Error> {
    let mut buf = Vec::new();
    buf.write_u32::<LittleEndian>(META_MAGIC)?;
    buf.write_u32::<LittleEndian>(META_VERSION)?;
    state.encode(&mut buf)?;

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&buf);
    let crc = hasher.finalize();
    buf.write_u32::<LittleEndian>(crc)?;

    let tmp_path = config.meta_tmp_path();
    {
        let mut f = File::create(&tmp_path)?;
        f.write_all(&buf)?;
        f.sync_all()?;
    }
    fs::rename(&tmp_path, config.meta_path())?;
    sync_dir(&config.dir)?;

    Ok(())
}

/// Fsyncs a directory so file creations, removals and renames inside it are
/// durable.
pub(crate) fn sync_dir(dir: impl AsRef<Path>) -> Result<(), io::Error> {
    File::open(dir.as_ref())?.sync_all()
}
