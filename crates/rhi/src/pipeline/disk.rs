//! On-disk persistence for the pipeline state cache.
//!
//! Three files live in the cache directory:
//!
//! - `graphics.psocache` and `compute.psocache` hold one record per pipeline
//!   state: the description encoded with `Encoding::Disk`, including bytecode,
//!   input layout strings and the root signature blob.
//! - `driverblobs.bin` holds the serialized driver pipeline library, tagged
//!   with the adapter it was produced on.
//!
//! Each file starts with a fixed header. A version, hash algorithm or
//! configuration mismatch discards the file and the cache is rebuilt from
//! scratch. A corrupted file disables the cache for the rest of the run.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use super::encode::{CacheReader, Sink};
use crate::error::DiskCacheError;

const RECORD_MAGIC: u32 = u32::from_le_bytes(*b"PSOC");
const DRIVER_MAGIC: u32 = u32::from_le_bytes(*b"PSOD");

/// Bumped whenever the record encoding changes.
pub const CACHE_VERSION: u32 = 1;

pub const GRAPHICS_FILE: &str = "graphics.psocache";
pub const COMPUTE_FILE: &str = "compute.psocache";
pub const DRIVER_BLOB_FILE: &str = "driverblobs.bin";

/// The hash used for every key in the cache files.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum HashAlgorithm {
    /// CRC32 (IEEE) low word, FNV-1a high word.
    Crc32Fnv1a = 2,
}

/// magic, version, algorithm, shared libraries, count, total size
pub(crate) const HEADER_SIZE: usize = 4 + 4 + 4 + 1 + 4 + 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Header {
    magic: u32,
    version: u32,
    hash_algorithm: u32,
    uses_shared_libraries: bool,
    pso_count: u32,
    total_size: u64,
}

impl Header {
    fn encode(&self, sink: &mut impl Sink) {
        sink.u32(self.magic);
        sink.u32(self.version);
        sink.u32(self.hash_algorithm);
        sink.bool(self.uses_shared_libraries);
        sink.u32(self.pso_count);
        sink.u64(self.total_size);
    }

    fn decode(reader: &mut CacheReader) -> Option<Self> {
        let header = Self {
            magic: reader.u32(),
            version: reader.u32(),
            hash_algorithm: reader.u32(),
            uses_shared_libraries: reader.bool(),
            pso_count: reader.u32(),
            total_size: reader.u64(),
        };
        (!reader.has_error()).then_some(header)
    }

    fn validate(&self, magic: u32, uses_shared_libraries: bool) -> Result<(), DiskCacheError> {
        if self.magic != magic {
            return Err(DiskCacheError::BadMagic);
        }
        if self.version != CACHE_VERSION {
            return Err(DiskCacheError::VersionMismatch {
                found: self.version,
                expected: CACHE_VERSION,
            });
        }
        if self.hash_algorithm != HashAlgorithm::Crc32Fnv1a as u32 {
            return Err(DiskCacheError::HashAlgorithmMismatch {
                found: self.hash_algorithm,
                expected: HashAlgorithm::Crc32Fnv1a as u32,
            });
        }
        if self.uses_shared_libraries != uses_shared_libraries {
            return Err(DiskCacheError::ConfigurationMismatch);
        }
        Ok(())
    }
}

/// Which record file a pipeline state belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordFile {
    Graphics,
    Compute,
}

impl RecordFile {
    fn file_name(self) -> &'static str {
        match self {
            Self::Graphics => GRAPHICS_FILE,
            Self::Compute => COMPUTE_FILE,
        }
    }
}

#[derive(Default)]
struct Records {
    count: u32,
    /// Length-prefixed records, without the header.
    data: Vec<u8>,
    dirty: bool,
}

impl Records {
    fn iter(&self) -> RecordIter<'_> {
        RecordIter {
            reader: CacheReader::new(&self.data),
            remaining: self.count,
        }
    }

    fn clear(&mut self) {
        self.count = 0;
        self.data.clear();
        self.dirty = true;
    }
}

/// Iterates over the records of one file.
pub struct RecordIter<'a> {
    reader: CacheReader<'a>,
    remaining: u32,
}

impl<'a> Iterator for RecordIter<'a> {
    type Item = Result<&'a [u8], DiskCacheError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let record = self.reader.blob();
        if self.reader.has_error() {
            self.remaining = 0;
            return Some(Err(DiskCacheError::Corrupted("truncated record")));
        }
        Some(Ok(record))
    }
}

/// The adapter a driver blob was produced on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AdapterId {
    pub vendor_id: u32,
    pub device_id: u32,
}

/// The in-memory image of the cache directory.
///
/// New records are appended in memory and written out by [`DiskCache::flush`],
/// which replaces each file atomically.
pub struct DiskCache {
    directory: PathBuf,
    uses_shared_libraries: bool,
    adapter: AdapterId,
    enabled: bool,
    graphics: Records,
    compute: Records,
    driver_blob: Vec<u8>,
}

impl DiskCache {
    /// Loads the cache files in `directory`. Missing files start empty;
    /// mismatched files are discarded; corrupted files disable the cache.
    pub fn open(directory: impl Into<PathBuf>, uses_shared_libraries: bool, adapter: AdapterId) -> Self {
        let mut cache = Self {
            directory: directory.into(),
            uses_shared_libraries,
            adapter,
            enabled: true,
            graphics: Records::default(),
            compute: Records::default(),
            driver_blob: Vec::new(),
        };

        if let Err(e) = fs::create_dir_all(&cache.directory) {
            log::warn!(
                "could not create pipeline cache directory {}: {e}; disabling the cache",
                cache.directory.display()
            );
            cache.enabled = false;
            return cache;
        }

        for file in [RecordFile::Graphics, RecordFile::Compute] {
            let path = cache.directory.join(file.file_name());
            match load_records(&path, uses_shared_libraries) {
                Ok(records) => *cache.records_mut(file) = records,
                Err(e) => cache.handle_load_error(&path, e),
            }
            if !cache.enabled {
                return cache;
            }
        }

        let path = cache.directory.join(DRIVER_BLOB_FILE);
        match load_driver_blob(&path, uses_shared_libraries, adapter) {
            Ok(blob) => cache.driver_blob = blob,
            Err(e) => cache.handle_load_error(&path, e),
        }

        if cache.enabled {
            log::info!(
                "pipeline cache {}: {} graphics, {} compute records, {} byte driver blob",
                cache.directory.display(),
                cache.graphics.count,
                cache.compute.count,
                cache.driver_blob.len()
            );
        }

        cache
    }

    fn handle_load_error(&mut self, path: &Path, error: DiskCacheError) {
        if error.is_corruption() {
            log::warn!("{}: {error}; clearing and disabling the pipeline cache", path.display());
            self.clear();
            self.enabled = false;
        } else {
            log::warn!("{}: {error}; rebuilding", path.display());
            remove_file(path);
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    #[must_use]
    pub fn len(&self, file: RecordFile) -> u32 {
        self.records(file).remaining
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.graphics.count == 0 && self.compute.count == 0
    }

    pub fn records(&self, file: RecordFile) -> RecordIter<'_> {
        match file {
            RecordFile::Graphics => self.graphics.iter(),
            RecordFile::Compute => self.compute.iter(),
        }
    }

    fn records_mut(&mut self, file: RecordFile) -> &mut Records {
        match file {
            RecordFile::Graphics => &mut self.graphics,
            RecordFile::Compute => &mut self.compute,
        }
    }

    /// The driver pipeline library saved by the previous run, if any.
    #[must_use]
    pub fn driver_blob(&self) -> &[u8] {
        &self.driver_blob
    }

    pub fn set_driver_blob(&mut self, blob: Vec<u8>) {
        if self.enabled {
            self.driver_blob = blob;
        }
    }

    /// Appends one encoded pipeline description.
    pub fn append(&mut self, file: RecordFile, record: &[u8]) {
        if !self.enabled {
            return;
        }
        let records = self.records_mut(file);
        records.data.blob(record);
        records.count += 1;
        records.dirty = true;
    }

    /// Drops every record and deletes the files.
    pub fn clear(&mut self) {
        self.graphics.clear();
        self.compute.clear();
        self.driver_blob.clear();
        for name in [GRAPHICS_FILE, COMPUTE_FILE, DRIVER_BLOB_FILE] {
            remove_file(&self.directory.join(name));
        }
    }

    /// Clears the cache and stops persisting for the rest of the run.
    pub fn disable(&mut self) {
        self.clear();
        self.enabled = false;
    }

    /// Writes every changed file.
    pub fn flush(&mut self) -> io::Result<()> {
        if !self.enabled {
            return Ok(());
        }

        for file in [RecordFile::Graphics, RecordFile::Compute] {
            let uses_shared_libraries = self.uses_shared_libraries;
            let path = self.directory.join(file.file_name());
            let records = self.records_mut(file);
            if !records.dirty {
                continue;
            }

            let header = Header {
                magic: RECORD_MAGIC,
                version: CACHE_VERSION,
                hash_algorithm: HashAlgorithm::Crc32Fnv1a as u32,
                uses_shared_libraries,
                pso_count: records.count,
                total_size: (HEADER_SIZE + records.data.len()) as u64,
            };

            let mut bytes = Vec::with_capacity(HEADER_SIZE + records.data.len());
            header.encode(&mut bytes);
            bytes.extend_from_slice(&records.data);
            write_atomic(&path, &bytes)?;
            records.dirty = false;
        }

        if !self.driver_blob.is_empty() {
            let mut bytes = Vec::with_capacity(HEADER_SIZE + 8 + self.driver_blob.len());
            Header {
                magic: DRIVER_MAGIC,
                version: CACHE_VERSION,
                hash_algorithm: HashAlgorithm::Crc32Fnv1a as u32,
                uses_shared_libraries: self.uses_shared_libraries,
                pso_count: 0,
                total_size: (HEADER_SIZE + 8 + self.driver_blob.len()) as u64,
            }
            .encode(&mut bytes);
            bytes.u32(self.adapter.vendor_id);
            bytes.u32(self.adapter.device_id);
            bytes.extend_from_slice(&self.driver_blob);
            write_atomic(&self.directory.join(DRIVER_BLOB_FILE), &bytes)?;
        }

        Ok(())
    }
}

fn read_file(path: &Path) -> Result<Option<Vec<u8>>, DiskCacheError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => {
            log::warn!("could not read {}: {e}", path.display());
            Err(DiskCacheError::Corrupted("unreadable file"))
        }
    }
}

fn load_records(path: &Path, uses_shared_libraries: bool) -> Result<Records, DiskCacheError> {
    let Some(bytes) = read_file(path)? else {
        return Ok(Records::default());
    };

    let mut reader = CacheReader::new(&bytes);
    let header = Header::decode(&mut reader).ok_or(DiskCacheError::Corrupted("truncated header"))?;
    header.validate(RECORD_MAGIC, uses_shared_libraries)?;

    if header.total_size != bytes.len() as u64 {
        return Err(DiskCacheError::Corrupted("size does not match header"));
    }

    let records = Records {
        count: header.pso_count,
        data: bytes[HEADER_SIZE..].to_vec(),
        dirty: false,
    };

    // Walk the records once so that a truncated file is caught at load.
    for record in records.iter() {
        record?;
    }

    Ok(records)
}

fn load_driver_blob(
    path: &Path,
    uses_shared_libraries: bool,
    adapter: AdapterId,
) -> Result<Vec<u8>, DiskCacheError> {
    let Some(bytes) = read_file(path)? else {
        return Ok(Vec::new());
    };

    let mut reader = CacheReader::new(&bytes);
    let header = Header::decode(&mut reader).ok_or(DiskCacheError::Corrupted("truncated header"))?;
    header.validate(DRIVER_MAGIC, uses_shared_libraries)?;

    let found = AdapterId {
        vendor_id: reader.u32(),
        device_id: reader.u32(),
    };

    if reader.has_error() || header.total_size != bytes.len() as u64 {
        return Err(DiskCacheError::Corrupted("size does not match header"));
    }
    if found != adapter {
        return Err(DiskCacheError::AdapterMismatch);
    }

    Ok(reader.bytes(reader.remaining()).to_vec())
}

fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)
}

fn remove_file(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("could not remove {}: {e}", path.display()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADAPTER: AdapterId = AdapterId {
        vendor_id: 0x10DE,
        device_id: 0x2204,
    };

    #[test]
    fn records_survive_a_flush() {
        let dir = tempfile::tempdir().unwrap();

        let mut cache = DiskCache::open(dir.path(), true, ADAPTER);
        assert!(cache.is_empty());
        cache.append(RecordFile::Graphics, b"first");
        cache.append(RecordFile::Graphics, b"second");
        cache.append(RecordFile::Compute, b"third");
        cache.set_driver_blob(vec![1, 2, 3]);
        cache.flush().unwrap();

        let cache = DiskCache::open(dir.path(), true, ADAPTER);
        let graphics: Vec<_> = cache
            .records(RecordFile::Graphics)
            .map(Result::unwrap)
            .collect();
        assert_eq!(graphics, [b"first".as_slice(), b"second".as_slice()]);
        assert_eq!(cache.len(RecordFile::Compute), 1);
        assert_eq!(cache.driver_blob(), [1, 2, 3]);
    }

    #[test]
    fn configuration_mismatch_rebuilds() {
        let dir = tempfile::tempdir().unwrap();

        let mut cache = DiskCache::open(dir.path(), true, ADAPTER);
        cache.append(RecordFile::Graphics, b"record");
        cache.flush().unwrap();

        let cache = DiskCache::open(dir.path(), false, ADAPTER);
        assert!(cache.is_enabled());
        assert_eq!(cache.len(RecordFile::Graphics), 0);
        assert!(!dir.path().join(GRAPHICS_FILE).exists());
    }

    #[test]
    fn other_adapter_discards_driver_blob() {
        let dir = tempfile::tempdir().unwrap();

        let mut cache = DiskCache::open(dir.path(), true, ADAPTER);
        cache.set_driver_blob(vec![9; 16]);
        cache.flush().unwrap();

        let other = AdapterId {
            vendor_id: 0x1002,
            device_id: 0x73BF,
        };
        let cache = DiskCache::open(dir.path(), true, other);
        assert!(cache.is_enabled());
        assert!(cache.driver_blob().is_empty());
    }

    #[test]
    fn corruption_disables_the_cache() {
        let dir = tempfile::tempdir().unwrap();

        let mut cache = DiskCache::open(dir.path(), true, ADAPTER);
        cache.append(RecordFile::Graphics, &[7; 64]);
        cache.flush().unwrap();

        let path = dir.path().join(GRAPHICS_FILE);
        let mut bytes = fs::read(&path).unwrap();
        bytes.truncate(bytes.len() - 10);
        fs::write(&path, &bytes).unwrap();

        let mut cache = DiskCache::open(dir.path(), true, ADAPTER);
        assert!(!cache.is_enabled());
        assert_eq!(cache.len(RecordFile::Graphics), 0);

        cache.append(RecordFile::Graphics, b"ignored");
        cache.flush().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn version_mismatch_rebuilds() {
        let dir = tempfile::tempdir().unwrap();

        let mut bytes = Vec::new();
        Header {
            magic: RECORD_MAGIC,
            version: CACHE_VERSION + 1,
            hash_algorithm: HashAlgorithm::Crc32Fnv1a as u32,
            uses_shared_libraries: true,
            pso_count: 0,
            total_size: HEADER_SIZE as u64,
        }
        .encode(&mut bytes);
        fs::write(dir.path().join(COMPUTE_FILE), &bytes).unwrap();

        let cache = DiskCache::open(dir.path(), true, ADAPTER);
        assert!(cache.is_enabled());
        assert!(!dir.path().join(COMPUTE_FILE).exists());
    }
}
