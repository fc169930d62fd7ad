//! On-disk form of the persistent resume index (`vectors.bin`).
//!
//! ```text
//! header, 47 bytes
//!   0      version        u8
//!   1..33  model id       SHA-256 of the embedding model name
//!   33..35 dimensions     u16 LE
//!   35..43 entry count    u64 LE
//!   43..47 crc32          over bytes 0..43, u32 LE
//! entries, in index order
//!   id, text              u32 LE length + UTF-8
//!   metadata              u32 LE pair count, then key/value strings
//!   vector                dimensions x f32 LE
//! ```

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::semantic::index::{IndexEntry, Metadata, VectorIndex};

const FORMAT_VERSION: u8 = 1;

const HEADER_SIZE: usize = 47;
const CHECKSUM_OFFSET: usize = 43;

/// Longest string accepted while reading (64 MiB)
const MAX_STRING_LEN: u32 = 64 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum VectorStorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed index file: {0}")]
    InvalidFormat(String),

    #[error("index file has format version {0}, this build reads up to {1}")]
    VersionMismatch(u8, u8),

    #[error("index file was written by a different embedding model")]
    ModelMismatch,

    #[error("index file header checksum does not match")]
    ChecksumMismatch,

    #[error("index file holds {got}-d vectors, model produces {expected}-d")]
    DimensionMismatch { expected: usize, got: usize },
}

#[derive(Debug, PartialEq)]
struct Header {
    version: u8,
    model_id: [u8; 32],
    dimensions: u16,
    entry_count: u64,
}

impl Header {
    fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0] = self.version;
        buf[1..33].copy_from_slice(&self.model_id);
        buf[33..35].copy_from_slice(&self.dimensions.to_le_bytes());
        buf[35..CHECKSUM_OFFSET].copy_from_slice(&self.entry_count.to_le_bytes());

        let crc = crc32fast::hash(&buf[..CHECKSUM_OFFSET]);
        buf[CHECKSUM_OFFSET..].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    fn decode(buf: &[u8; HEADER_SIZE]) -> Result<Self, VectorStorageError> {
        let version = buf[0];
        if version > FORMAT_VERSION {
            return Err(VectorStorageError::VersionMismatch(version, FORMAT_VERSION));
        }

        let stored_crc = u32::from_le_bytes(le_array(&buf[CHECKSUM_OFFSET..]));
        if stored_crc != crc32fast::hash(&buf[..CHECKSUM_OFFSET]) {
            return Err(VectorStorageError::ChecksumMismatch);
        }

        Ok(Self {
            version,
            model_id: le_array(&buf[1..33]),
            dimensions: u16::from_le_bytes(le_array(&buf[33..35])),
            entry_count: u64::from_le_bytes(le_array(&buf[35..CHECKSUM_OFFSET])),
        })
    }

    /// Reject a file whose vectors cannot be compared with the current model.
    fn check_compatible(&self, model_id: &[u8; 32], dimensions: usize) -> Result<(), VectorStorageError> {
        if self.model_id != *model_id {
            return Err(VectorStorageError::ModelMismatch);
        }

        // an index saved before its first add has no dimensions yet
        if self.entry_count > 0 && self.dimensions as usize != dimensions {
            return Err(VectorStorageError::DimensionMismatch {
                expected: dimensions,
                got: self.dimensions as usize,
            });
        }

        Ok(())
    }
}

/// Copy a slice of known length into an array.
fn le_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    out
}

/// Location of a persisted [`VectorIndex`].
#[derive(Debug, Clone)]
pub struct VectorStorage {
    path: PathBuf,
}

impl VectorStorage {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Read the stored index, checking it was produced by the model
    /// identified by `model_id` with `dimensions`-sized vectors.
    pub fn load(&self, model_id: &[u8; 32], dimensions: usize) -> Result<VectorIndex, VectorStorageError> {
        let mut reader = BufReader::new(File::open(&self.path)?);

        let mut buf = [0u8; HEADER_SIZE];
        reader.read_exact(&mut buf).map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => {
                VectorStorageError::InvalidFormat("truncated header".to_string())
            }
            _ => VectorStorageError::Io(e),
        })?;
        let header = Header::decode(&buf)?;
        header.check_compatible(model_id, dimensions)?;

        if header.entry_count == 0 {
            return Ok(VectorIndex::new());
        }

        let file_dims = header.dimensions as usize;
        let mut entries = Vec::with_capacity((header.entry_count as usize).min(1 << 16));
        for _ in 0..header.entry_count {
            entries.push(read_entry(&mut reader, file_dims)?);
        }

        let mut index = VectorIndex::with_capacity(file_dims, entries.len());
        index
            .add_entries(entries)
            .map_err(|e| VectorStorageError::InvalidFormat(e.to_string()))?;

        Ok(index)
    }

    /// Replace the stored index with `index`.
    ///
    /// The file is written next to the target, synced and renamed over it,
    /// so a crash leaves either the old or the new index on disk.
    pub fn save(&self, index: &VectorIndex, model_id: &[u8; 32]) -> Result<(), VectorStorageError> {
        let staging = self.path.with_extension("tmp");

        if let Err(e) = write_index(&staging, index, model_id) {
            let _ = std::fs::remove_file(&staging);
            return Err(e);
        }

        std::fs::rename(&staging, &self.path)?;
        log::debug!("Saved {} vectors to {}", index.len(), self.path.display());
        Ok(())
    }

    /// Remove the stored index. A missing file is not an error.
    pub fn delete(&self) -> Result<(), VectorStorageError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn write_index(path: &Path, index: &VectorIndex, model_id: &[u8; 32]) -> Result<(), VectorStorageError> {
    let dims = index.dimensions().unwrap_or(0);
    let dimensions = u16::try_from(dims)
        .map_err(|_| VectorStorageError::InvalidFormat(format!("{dims}-d vectors are too wide")))?;

    let header = Header {
        version: FORMAT_VERSION,
        model_id: *model_id,
        dimensions,
        entry_count: index.len() as u64,
    };

    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_all(&header.encode())?;
    for entry in index.iter() {
        write_entry(&mut writer, entry)?;
    }

    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    Ok(())
}

fn read_entry(reader: &mut impl Read, dimensions: usize) -> Result<IndexEntry, VectorStorageError> {
    let id = read_string(reader)?;
    let text = read_string(reader)?;

    let pairs = read_u32(reader)?;
    let mut metadata = Metadata::new();
    for _ in 0..pairs {
        let key = read_string(reader)?;
        metadata.insert(key, read_string(reader)?);
    }

    let mut raw = vec![0u8; dimensions * 4];
    reader.read_exact(&mut raw)?;
    let vector = raw
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes(le_array(chunk)))
        .collect();

    Ok(IndexEntry {
        id,
        vector,
        text,
        metadata,
    })
}

fn write_entry(writer: &mut impl Write, entry: &IndexEntry) -> Result<(), VectorStorageError> {
    write_string(writer, &entry.id)?;
    write_string(writer, &entry.text)?;

    writer.write_all(&(entry.metadata.len() as u32).to_le_bytes())?;
    for (key, value) in &entry.metadata {
        write_string(writer, key)?;
        write_string(writer, value)?;
    }

    let raw: Vec<u8> = entry.vector.iter().flat_map(|v| v.to_le_bytes()).collect();
    writer.write_all(&raw)?;
    Ok(())
}

fn read_u32(reader: &mut impl Read) -> Result<u32, VectorStorageError> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_string(reader: &mut impl Read) -> Result<String, VectorStorageError> {
    let len = read_u32(reader)?;
    if len > MAX_STRING_LEN {
        return Err(VectorStorageError::InvalidFormat(format!(
            "string of {len} bytes exceeds limit"
        )));
    }

    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|e| VectorStorageError::InvalidFormat(e.to_string()))
}

fn write_string(writer: &mut impl Write, s: &str) -> Result<(), VectorStorageError> {
    let len = u32::try_from(s.len())
        .ok()
        .filter(|len| *len <= MAX_STRING_LEN)
        .ok_or_else(|| VectorStorageError::InvalidFormat(format!("string of {} bytes exceeds limit", s.len())))?;

    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(s.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::{Seek, SeekFrom};

    use super::*;

    const MODEL: [u8; 32] = [7u8; 32];

    fn resume(id: &str, vector: Vec<f32>) -> IndexEntry {
        let mut metadata = Metadata::new();
        metadata.insert("source".to_string(), id.to_string());
        metadata.insert("format".to_string(), "text".to_string());
        IndexEntry {
            id: id.to_string(),
            vector,
            text: format!("Résumé of {id}"),
            metadata,
        }
    }

    fn store(dir: &tempfile::TempDir) -> VectorStorage {
        VectorStorage::new(dir.path().join("vectors.bin"))
    }

    #[test]
    fn test_header_layout() {
        let header = Header {
            version: FORMAT_VERSION,
            model_id: MODEL,
            dimensions: 384,
            entry_count: 12,
        };
        let buf = header.encode();

        assert_eq!(buf.len(), 47);
        assert_eq!(buf[0], 1);
        assert_eq!(&buf[33..35], &384u16.to_le_bytes());
        assert_eq!(Header::decode(&buf).unwrap(), header);
    }

    #[test]
    fn test_newer_version_rejected() {
        let mut buf = Header {
            version: FORMAT_VERSION,
            model_id: MODEL,
            dimensions: 3,
            entry_count: 0,
        }
        .encode();
        buf[0] = FORMAT_VERSION + 1;

        assert!(matches!(
            Header::decode(&buf),
            Err(VectorStorageError::VersionMismatch(2, 1))
        ));
    }

    #[test]
    fn test_empty_index_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = store(&tmp);

        storage.save(&VectorIndex::new(), &MODEL).unwrap();

        // any dimensionality is accepted for an empty file
        let loaded = storage.load(&MODEL, 768).unwrap();
        assert!(loaded.is_empty());
        assert_eq!(loaded.dimensions(), None);
    }

    #[test]
    fn test_entries_round_trip_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = store(&tmp);

        let mut index = VectorIndex::new();
        index
            .add_entries(vec![
                resume("c.pdf", vec![0.0, 0.0, 1.0]),
                resume("a.txt", vec![0.6, 0.8, 0.0]),
                resume("b.docx", vec![0.0, 1.0, 0.0]),
            ])
            .unwrap();
        storage.save(&index, &MODEL).unwrap();

        let loaded = storage.load(&MODEL, 3).unwrap();
        assert_eq!(loaded.dimensions(), Some(3));
        assert_eq!(loaded.ids().collect::<Vec<_>>(), vec!["c.pdf", "a.txt", "b.docx"]);
        assert_eq!(loaded.get("a.txt"), index.get("a.txt"));
        assert_eq!(loaded.get("a.txt").unwrap().metadata["format"], "text");
    }

    #[test]
    fn test_other_model_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = store(&tmp);
        storage.save(&VectorIndex::new(), &MODEL).unwrap();

        let result = storage.load(&[9u8; 32], 3);
        assert!(matches!(result, Err(VectorStorageError::ModelMismatch)));
    }

    #[test]
    fn test_other_dimensions_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = store(&tmp);

        let mut index = VectorIndex::new();
        index.insert(resume("a.txt", vec![1.0, 0.0, 0.0])).unwrap();
        storage.save(&index, &MODEL).unwrap();

        let result = storage.load(&MODEL, 384);
        assert!(matches!(
            result,
            Err(VectorStorageError::DimensionMismatch { expected: 384, got: 3 })
        ));
    }

    #[test]
    fn test_failed_save_leaves_no_staging_file() {
        let path = PathBuf::from("/nonexistent/rrank/vectors.bin");
        let storage = VectorStorage::new(path.clone());

        assert!(storage.save(&VectorIndex::new(), &MODEL).is_err());
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_delete_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = store(&tmp);
        storage.save(&VectorIndex::new(), &MODEL).unwrap();

        storage.delete().unwrap();
        assert!(!storage.exists());
        storage.delete().unwrap();
    }

    #[test]
    fn test_flipped_header_byte_detected() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = store(&tmp);

        let mut index = VectorIndex::new();
        index.insert(resume("a.txt", vec![1.0, 0.0, 0.0])).unwrap();
        storage.save(&index, &MODEL).unwrap();

        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .open(storage.path())
            .unwrap();
        file.seek(SeekFrom::Start(20)).unwrap();
        file.write_all(&[0x00]).unwrap();

        let result = storage.load(&MODEL, 3);
        assert!(matches!(result, Err(VectorStorageError::ChecksumMismatch)));
    }

    #[test]
    fn test_truncated_header() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = store(&tmp);
        std::fs::write(storage.path(), [1u8; 10]).unwrap();

        let result = storage.load(&MODEL, 3);
        assert!(matches!(result, Err(VectorStorageError::InvalidFormat(_))));
    }

    #[test]
    fn test_truncated_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = store(&tmp);

        let mut index = VectorIndex::new();
        index.insert(resume("a.txt", vec![1.0, 0.0, 0.0])).unwrap();
        storage.save(&index, &MODEL).unwrap();

        let bytes = std::fs::read(storage.path()).unwrap();
        std::fs::write(storage.path(), &bytes[..bytes.len() - 5]).unwrap();

        assert!(storage.load(&MODEL, 3).is_err());
    }
}
