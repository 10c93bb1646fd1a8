use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use depot_types::{BlobId, BlobRecord};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::BlobMetadataStore;
use crate::error::{StoreError, StoreResult};

/// One mutation of the metadata map.
///
/// On-disk frame:
/// ```text
/// [4 bytes: magic "DLOG"]
/// [4 bytes: payload length (little-endian u32)]
/// [4 bytes: CRC32 of length and payload (little-endian u32)]
/// [N bytes: payload (bincode-serialized LogOp)]
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
enum LogOp {
    Put(BlobRecord),
    MarkDeleted(BlobId),
    Erase(BlobId),
}

impl LogOp {
    fn apply(self, index: &mut HashMap<BlobId, BlobRecord>) {
        match self {
            Self::Put(record) => {
                index.insert(record.blob_id.clone(), record);
            }
            Self::MarkDeleted(id) => {
                if let Some(record) = index.get_mut(&id) {
                    record.soft_deleted = true;
                }
            }
            Self::Erase(id) => {
                index.remove(&id);
            }
        }
    }
}

/// Flush/sync strategy for the metadata log.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncMode {
    /// `fsync` after every append.
    EveryWrite,
    /// Rely on OS page-cache buffering.
    #[default]
    OsDefault,
}

/// Configuration for [`LogMetadataStore`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub sync_mode: SyncMode,
    /// The log is never rewritten while it holds fewer frames than this.
    pub rewrite_min_entries: u64,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            sync_mode: SyncMode::default(),
            rewrite_min_entries: 1024,
        }
    }
}

const FRAME_MAGIC: [u8; 4] = *b"DLOG";
const HEADER_SIZE: usize = 12;

fn encode_frame(payload: &[u8]) -> StoreResult<Vec<u8>> {
    let length = u32::try_from(payload.len())
        .map_err(|_| StoreError::Serialization(format!("log frame of {} bytes is too large", payload.len())))?
        .to_le_bytes();
    let mut crc = crc32fast::Hasher::new();
    crc.update(&length);
    crc.update(payload);

    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
    frame.extend_from_slice(&FRAME_MAGIC);
    frame.extend_from_slice(&length);
    frame.extend_from_slice(&crc.finalize().to_le_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Payload of the intact frame at the start of `data`, if there is one.
fn decode_frame(data: &[u8]) -> Option<&[u8]> {
    let header = data.get(..HEADER_SIZE)?;
    if header[..4] != FRAME_MAGIC {
        return None;
    }
    let length = u32::from_le_bytes(<[u8; 4]>::try_from(&header[4..8]).ok()?) as usize;
    let expected = u32::from_le_bytes(<[u8; 4]>::try_from(&header[8..12]).ok()?);
    if length == 0 {
        return None;
    }
    let payload = data.get(HEADER_SIZE..HEADER_SIZE.checked_add(length)?)?;

    let mut crc = crc32fast::Hasher::new();
    crc.update(&header[4..8]);
    crc.update(payload);
    (crc.finalize() == expected).then_some(payload)
}

/// Offset of the first intact frame at or after `from`.
fn next_frame(data: &[u8], from: usize) -> Option<usize> {
    (from..data.len()).find(|&at| decode_frame(&data[at..]).is_some())
}

struct LogWriter {
    file: File,
    /// Length of the valid prefix of the log file.
    offset: u64,
    /// Frames in the file, live or superseded.
    frames: u64,
}

impl LogWriter {
    fn append(&mut self, frame: &[u8], sync_mode: SyncMode) -> io::Result<()> {
        let written = self.file.write_all(frame).and_then(|()| match sync_mode {
            SyncMode::EveryWrite => self.file.sync_data(),
            SyncMode::OsDefault => Ok(()),
        });
        if let Err(e) = written {
            // Drop any partial frame so later appends are not stranded behind it.
            if let Err(trunc) = self.file.set_len(self.offset) {
                warn!(offset = self.offset, error = %trunc, "failed to roll back partial log frame");
            }
            return Err(e);
        }

        self.offset += frame.len() as u64;
        self.frames += 1;
        Ok(())
    }
}

/// Metadata store backed by an append-only, CRC-framed log.
///
/// Every mutation is appended before it is applied to the in-memory index, so
/// the index can always be rebuilt by replaying the log. A damaged frame is
/// skipped on replay and reading resumes at the next intact one; only a
/// damaged tail with nothing intact after it is truncated away.
/// [`BlobMetadataStore::maintain`] rewrites the log with only live records once
/// superseded frames dominate.
pub struct LogMetadataStore {
    path: PathBuf,
    config: LogConfig,
    writer: Mutex<LogWriter>,
    index: RwLock<HashMap<BlobId, BlobRecord>>,
}

impl LogMetadataStore {
    /// Open (or create) the log at `path` and replay it into memory.
    pub fn open(path: &Path, config: LogConfig) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;

        let (ops, valid_len) = Self::replay(&file)?;
        let file_len = file.metadata()?.len();
        if valid_len < file_len {
            warn!(
                path = %path.display(),
                valid_len,
                file_len,
                "truncating damaged tail of metadata log"
            );
            file.set_len(valid_len)?;
        }

        let frames = ops.len() as u64;
        let mut index = HashMap::new();
        for op in ops.into_iter().flatten() {
            op.apply(&mut index);
        }

        info!(
            path = %path.display(),
            records = index.len(),
            frames,
            "metadata log opened"
        );

        Ok(Self {
            path: path.to_path_buf(),
            config,
            writer: Mutex::new(LogWriter {
                file,
                offset: valid_len,
                frames,
            }),
            index: RwLock::new(index),
        })
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of frames in the log, including superseded ones.
    pub fn frames(&self) -> u64 {
        self.writer.lock().frames
    }

    /// Read every frame. Returns one slot per frame or damaged region (`None`
    /// where nothing could be recovered) and the end of the last intact frame.
    fn replay(mut file: &File) -> StoreResult<(Vec<Option<LogOp>>, u64)> {
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;

        let mut ops = Vec::new();
        let mut offset = 0usize;
        let mut valid_len = 0usize;

        while offset < data.len() {
            if let Some(payload) = decode_frame(&data[offset..]) {
                match bincode::deserialize::<LogOp>(payload) {
                    Ok(op) => ops.push(Some(op)),
                    Err(e) => {
                        warn!(offset, error = %e, "failed to decode log frame; skipping");
                        ops.push(None);
                    }
                }
                offset += HEADER_SIZE + payload.len();
                valid_len = offset;
                continue;
            }

            match next_frame(&data, offset + 1) {
                Some(next) => {
                    warn!(offset, skipped = next - offset, "damaged log frame; resuming at next intact frame");
                    ops.push(None);
                    offset = next;
                }
                None => break,
            }
        }

        debug!(frames = ops.len(), valid_len, "metadata log replayed");
        Ok((ops, valid_len as u64))
    }

    fn encode(op: &LogOp) -> StoreResult<Vec<u8>> {
        bincode::serialize(op).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Append `op` and apply it to the index while holding the writer lock.
    fn commit(&self, writer: &mut LogWriter, op: LogOp) -> StoreResult<()> {
        let frame = encode_frame(&Self::encode(&op)?)?;
        writer.append(&frame, self.config.sync_mode)?;
        op.apply(&mut self.index.write());
        Ok(())
    }

    /// Rewrite the log with one `Put` frame per record, via a temp file and rename.
    fn rewrite(&self, writer: &mut LogWriter) -> StoreResult<()> {
        let records: Vec<BlobRecord> = self.index.read().values().cloned().collect();
        let tmp_path = self.path.with_extension("rewrite");

        let tmp = File::create(&tmp_path)?;
        let mut out = BufWriter::new(tmp);
        let mut offset = 0u64;
        for record in &records {
            let frame = encode_frame(&Self::encode(&LogOp::Put(record.clone()))?)?;
            out.write_all(&frame)?;
            offset += frame.len() as u64;
        }
        out.flush()?;
        out.get_ref().sync_all()?;
        drop(out);

        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new().read(true).append(true).open(&self.path)?;

        let before = writer.frames;
        *writer = LogWriter {
            file,
            offset,
            frames: records.len() as u64,
        };
        info!(before, after = writer.frames, "metadata log rewritten");
        Ok(())
    }
}

impl BlobMetadataStore for LogMetadataStore {
    fn put(&self, record: BlobRecord) -> StoreResult<()> {
        let mut writer = self.writer.lock();
        self.commit(&mut writer, LogOp::Put(record))
    }

    fn get(&self, id: &BlobId) -> StoreResult<Option<BlobRecord>> {
        Ok(self.index.read().get(id).cloned())
    }

    fn mark_deleted(&self, id: &BlobId) -> StoreResult<bool> {
        let mut writer = self.writer.lock();
        if !self.index.read().get(id).is_some_and(BlobRecord::is_live) {
            return Ok(false);
        }
        self.commit(&mut writer, LogOp::MarkDeleted(id.clone()))?;
        Ok(true)
    }

    fn erase(&self, id: &BlobId) -> StoreResult<bool> {
        let mut writer = self.writer.lock();
        if !self.index.read().contains_key(id) {
            return Ok(false);
        }
        self.commit(&mut writer, LogOp::Erase(id.clone()))?;
        Ok(true)
    }

    fn list(&self, include_soft_deleted: bool) -> StoreResult<Vec<BlobRecord>> {
        Ok(self
            .index
            .read()
            .values()
            .filter(|r| include_soft_deleted || r.is_live())
            .cloned()
            .collect())
    }

    fn maintain(&self) -> StoreResult<bool> {
        let mut writer = self.writer.lock();
        let live = self.index.read().len() as u64;
        let garbage = writer.frames.saturating_sub(live);
        if writer.frames < self.config.rewrite_min_entries || garbage <= live {
            return Ok(false);
        }
        self.rewrite(&mut writer)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depot_types::{Headers, Sha1Hash, StreamMetrics};
    use std::io::{Seek, SeekFrom};

    fn record(id: &str) -> BlobRecord {
        BlobRecord::new(
            BlobId::new(id).unwrap(),
            StreamMetrics::new(id.len() as u64, Sha1Hash::from_bytes([9; 20])),
            Headers::new(),
        )
    }

    fn open(path: &Path) -> LogMetadataStore {
        LogMetadataStore::open(path, LogConfig::default()).unwrap()
    }

    #[test]
    fn records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta/blobs.log");

        let store = open(&path);
        store.put(record("a")).unwrap();
        store.put(record("b")).unwrap();
        store.put(record("c")).unwrap();
        store.mark_deleted(&BlobId::new("b").unwrap()).unwrap();
        store.erase(&BlobId::new("c").unwrap()).unwrap();
        drop(store);

        let store = open(&path);
        assert!(store.get(&BlobId::new("a").unwrap()).unwrap().unwrap().is_live());
        assert!(store.get(&BlobId::new("b").unwrap()).unwrap().unwrap().soft_deleted);
        assert!(store.get(&BlobId::new("c").unwrap()).unwrap().is_none());
        assert_eq!(store.frames(), 5);
    }

    #[test]
    fn corrupt_frame_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blobs.log");

        let store = open(&path);
        store.put(record("first")).unwrap();
        store.put(record("second")).unwrap();
        drop(store);

        {
            let mut file = OpenOptions::new().read(true).write(true).open(&path).unwrap();
            file.seek(SeekFrom::Start(HEADER_SIZE as u64)).unwrap();
            let mut buf = [0u8; 1];
            file.read_exact(&mut buf).unwrap();
            buf[0] ^= 0xFF;
            file.seek(SeekFrom::Start(HEADER_SIZE as u64)).unwrap();
            file.write_all(&buf).unwrap();
        }

        let store = open(&path);
        assert!(store.get(&BlobId::new("first").unwrap()).unwrap().is_none());
        assert!(store.get(&BlobId::new("second").unwrap()).unwrap().is_some());
    }

    fn flip_byte(path: &Path, at: u64) {
        let mut file = OpenOptions::new().read(true).write(true).open(path).unwrap();
        let mut buf = [0u8; 1];
        file.seek(SeekFrom::Start(at)).unwrap();
        file.read_exact(&mut buf).unwrap();
        buf[0] ^= 0x5A;
        file.seek(SeekFrom::Start(at)).unwrap();
        file.write_all(&buf).unwrap();
    }

    #[test]
    fn damaged_length_field_loses_only_its_own_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blobs.log");

        let store = open(&path);
        for i in 0..10 {
            store.put(record(&format!("rec-{i}"))).unwrap();
        }
        drop(store);
        let len_before = fs::metadata(&path).unwrap().len();

        // High byte of the first frame's length field.
        flip_byte(&path, 7);

        let store = open(&path);
        assert!(store.get(&BlobId::new("rec-0").unwrap()).unwrap().is_none());
        assert_eq!(store.list(true).unwrap().len(), 9);
        assert_eq!(fs::metadata(&path).unwrap().len(), len_before);

        store.put(record("after")).unwrap();
        drop(store);
        let store = open(&path);
        assert_eq!(store.list(true).unwrap().len(), 10);
        assert!(store.get(&BlobId::new("after").unwrap()).unwrap().is_some());
    }

    #[test]
    fn damaged_magic_mid_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blobs.log");

        let store = open(&path);
        store.put(record("one")).unwrap();
        let second_frame = fs::metadata(&path).unwrap().len();
        store.put(record("two")).unwrap();
        store.put(record("three")).unwrap();
        drop(store);

        flip_byte(&path, second_frame);

        let store = open(&path);
        assert!(store.get(&BlobId::new("one").unwrap()).unwrap().is_some());
        assert!(store.get(&BlobId::new("two").unwrap()).unwrap().is_none());
        assert!(store.get(&BlobId::new("three").unwrap()).unwrap().is_some());
    }

    #[test]
    fn torn_tail_is_truncated_and_appends_survive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blobs.log");

        let store = open(&path);
        store.put(record("kept")).unwrap();
        drop(store);

        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&[200, 0, 0, 0, 1, 2]).unwrap();
        }

        let store = open(&path);
        store.put(record("after")).unwrap();
        drop(store);

        let store = open(&path);
        assert!(store.get(&BlobId::new("kept").unwrap()).unwrap().is_some());
        assert!(store.get(&BlobId::new("after").unwrap()).unwrap().is_some());
    }

    #[test]
    fn maintain_rewrites_when_garbage_dominates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blobs.log");
        let config = LogConfig {
            rewrite_min_entries: 4,
            ..LogConfig::default()
        };

        let store = LogMetadataStore::open(&path, config.clone()).unwrap();
        store.put(record("keep")).unwrap();
        for i in 0..5 {
            let id = format!("tmp-{i}");
            store.put(record(&id)).unwrap();
            store.erase(&BlobId::new(id).unwrap()).unwrap();
        }
        assert_eq!(store.frames(), 11);

        assert!(store.maintain().unwrap());
        assert_eq!(store.frames(), 1);
        assert!(!store.maintain().unwrap());

        store.put(record("later")).unwrap();
        drop(store);

        let store = LogMetadataStore::open(&path, config).unwrap();
        assert_eq!(store.list(true).unwrap().len(), 2);
        assert!(!path.with_extension("rewrite").exists());
    }

    #[test]
    fn mark_deleted_on_unknown_id_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir.path().join("blobs.log"));
        assert!(!store.mark_deleted(&BlobId::new("ghost").unwrap()).unwrap());
        assert!(!store.erase(&BlobId::new("ghost").unwrap()).unwrap());
        assert_eq!(store.frames(), 0);
    }

    #[test]
    fn sync_mode_parses_kebab_case() {
        let mode: SyncMode = serde_json::from_str("\"every-write\"").unwrap();
        assert_eq!(mode, SyncMode::EveryWrite);
    }
}
