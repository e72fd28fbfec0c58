use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use parking_lot::RwLock;
use crc32fast::Hasher;
use crate::compression::vbyte::{ByteReader, write_len_prefixed};
use crate::core::error::{Error, Result};

/// Byte-oriented persistent associative store
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;
    fn remove(&self, key: &[u8]) -> Result<bool>;
    fn contains_key(&self, key: &[u8]) -> Result<bool>;
    fn keys(&self) -> Result<Vec<Vec<u8>>>;
    fn len(&self) -> usize;
    fn flush(&self) -> Result<()>;
    fn clear(&self) -> Result<()>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

const LOG_MAGIC: u32 = 0x474F_4C53; // "SLOG"
const MAP_MAGIC: u32 = 0x5041_4D53; // "SMAP"
const FORMAT_VERSION: u32 = 1;

const OP_PUT: u8 = 1;
const OP_REMOVE: u8 = 2;

/// Map + value log pair.
///
/// - `<name>.map`: compacted snapshot, replaced atomically on flush
/// - `<name>.log`: append-only mutations since the snapshot
///
/// Entries live in memory; the files only provide durability.
pub struct PersistentMap {
    map_path: PathBuf,
    log_path: PathBuf,
    inner: RwLock<MapInner>,
}

struct MapInner {
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
    log: BufWriter<File>,
    dirty: bool,
}

impl PersistentMap {
    pub fn open(dir: &Path, name: &str) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let map_path = dir.join(format!("{}.map", name));
        let log_path = dir.join(format!("{}.log", name));

        let mut entries = if map_path.exists() {
            read_snapshot(&map_path)?
        } else {
            BTreeMap::new()
        };

        let replayed = replay_log(&log_path, &mut entries)?;
        let log = open_log(&log_path)?;

        Ok(PersistentMap {
            map_path,
            log_path,
            inner: RwLock::new(MapInner {
                entries,
                log: BufWriter::new(log),
                dirty: replayed > 0,
            }),
        })
    }

    fn append(inner: &mut MapInner, op: u8, key: &[u8], value: &[u8]) -> Result<()> {
        let mut payload = Vec::with_capacity(key.len() + value.len() + 11);
        payload.push(op);
        write_len_prefixed(&mut payload, key);
        write_len_prefixed(&mut payload, value);

        let mut hasher = Hasher::new();
        hasher.update(&payload);

        inner.log.write_all(&(payload.len() as u32).to_le_bytes())?;
        inner.log.write_all(&hasher.finalize().to_le_bytes())?;
        inner.log.write_all(&payload)?;
        inner.dirty = true;
        Ok(())
    }

    fn reset_log(&self, inner: &mut MapInner) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.log_path)?;
        write_log_header(&mut file)?;
        file.sync_all()?;
        inner.log = BufWriter::new(open_log(&self.log_path)?);
        Ok(())
    }
}

impl KeyValueStore for PersistentMap {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.inner.read().entries.get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut inner = self.inner.write();
        Self::append(&mut inner, OP_PUT, key, value)?;
        inner.entries.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &[u8]) -> Result<bool> {
        let mut inner = self.inner.write();
        if !inner.entries.contains_key(key) {
            return Ok(false);
        }
        Self::append(&mut inner, OP_REMOVE, key, &[])?;
        inner.entries.remove(key);
        Ok(true)
    }

    fn contains_key(&self, key: &[u8]) -> Result<bool> {
        Ok(self.inner.read().entries.contains_key(key))
    }

    fn keys(&self) -> Result<Vec<Vec<u8>>> {
        Ok(self.inner.read().entries.keys().cloned().collect())
    }

    fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    // [ MAGIC ][ VERSION ][ body_len ][ crc32 ][ bincode body ]
    // Written to a temp file and renamed over the old snapshot.
    fn flush(&self) -> Result<()> {
        let mut inner = self.inner.write();
        inner.log.flush()?;
        if !inner.dirty {
            return Ok(());
        }

        let pairs: Vec<(&Vec<u8>, &Vec<u8>)> = inner.entries.iter().collect();
        let body = bincode::serialize(&pairs)?;
        let mut hasher = Hasher::new();
        hasher.update(&body);

        let tmp = self.map_path.with_extension("map.tmp");
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&MAP_MAGIC.to_le_bytes())?;
            file.write_all(&FORMAT_VERSION.to_le_bytes())?;
            file.write_all(&(body.len() as u64).to_le_bytes())?;
            file.write_all(&hasher.finalize().to_le_bytes())?;
            file.write_all(&body)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.map_path)?;

        self.reset_log(&mut inner)?;
        inner.dirty = false;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let mut inner = self.inner.write();
        inner.entries.clear();
        if self.map_path.exists() {
            fs::remove_file(&self.map_path)?;
        }
        self.reset_log(&mut inner)?;
        inner.dirty = false;
        Ok(())
    }
}

fn write_log_header(file: &mut File) -> Result<()> {
    file.write_all(&LOG_MAGIC.to_le_bytes())?;
    file.write_all(&FORMAT_VERSION.to_le_bytes())?;
    Ok(())
}

fn open_log(path: &Path) -> Result<File> {
    let exists = path.exists();
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    if !exists {
        write_log_header(&mut file)?;
    }
    Ok(file)
}

fn read_snapshot(path: &Path) -> Result<BTreeMap<Vec<u8>, Vec<u8>>> {
    let data = fs::read(path)?;
    if data.len() < 20 {
        return Err(Error::corrupted(format!("snapshot {:?} too small", path)));
    }
    let magic = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    let version = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
    if magic != MAP_MAGIC || version != FORMAT_VERSION {
        return Err(Error::corrupted(format!(
            "snapshot {:?} has header {:#x}/{}", path, magic, version
        )));
    }
    let mut len_buf = [0u8; 8];
    len_buf.copy_from_slice(&data[8..16]);
    let body_len = u64::from_le_bytes(len_buf) as usize;
    let checksum = u32::from_le_bytes([data[16], data[17], data[18], data[19]]);
    let body = &data[20..];
    if body.len() != body_len {
        return Err(Error::corrupted(format!("snapshot {:?} length mismatch", path)));
    }
    let mut hasher = Hasher::new();
    hasher.update(body);
    if hasher.finalize() != checksum {
        return Err(Error::corrupted(format!("snapshot {:?} checksum mismatch", path)));
    }

    let pairs: Vec<(Vec<u8>, Vec<u8>)> = bincode::deserialize(body)?;
    Ok(pairs.into_iter().collect())
}

/// Apply logged mutations on top of the snapshot. A torn final record (crash
/// mid-append) is cut off; a checksum failure anywhere else is corruption.
fn replay_log(path: &Path, entries: &mut BTreeMap<Vec<u8>, Vec<u8>>) -> Result<usize> {
    if !path.exists() {
        return Ok(0);
    }
    let mut data = Vec::new();
    File::open(path)?.read_to_end(&mut data)?;
    if data.len() < 8 {
        return Err(Error::corrupted(format!("value log {:?} has no header", path)));
    }
    let magic = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    let version = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
    if magic != LOG_MAGIC || version != FORMAT_VERSION {
        return Err(Error::corrupted(format!("value log {:?} has header {:#x}/{}", path, magic, version)));
    }

    let mut pos = 8;
    let mut applied = 0;
    while pos < data.len() {
        if data.len() - pos < 8 {
            break;
        }
        let len = u32::from_le_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]]) as usize;
        let crc = u32::from_le_bytes([data[pos + 4], data[pos + 5], data[pos + 6], data[pos + 7]]);
        if data.len() - pos - 8 < len {
            break;
        }
        let payload = &data[pos + 8..pos + 8 + len];
        let mut hasher = Hasher::new();
        hasher.update(payload);
        if hasher.finalize() != crc {
            return Err(Error::corrupted(format!("value log {:?} checksum mismatch at {}", path, pos)));
        }

        let mut reader = ByteReader::new(payload);
        let op = reader.read_u8()?;
        let key = reader.read_len_prefixed()?.to_vec();
        let value = reader.read_len_prefixed()?.to_vec();
        match op {
            OP_PUT => { entries.insert(key, value); }
            OP_REMOVE => { entries.remove(&key); }
            other => return Err(Error::corrupted(format!("value log {:?} unknown op {}", path, other))),
        }
        applied += 1;
        pos += 8 + len;
    }

    if pos < data.len() {
        tracing::warn!(path = ?path, dropped_bytes = data.len() - pos, "value log has a torn tail, truncating");
        let file = OpenOptions::new().write(true).open(path)?;
        file.set_len(pos as u64)?;
        file.sync_all()?;
    }

    Ok(applied)
}
