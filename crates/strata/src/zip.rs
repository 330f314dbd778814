//! Reading and writing uncompressed zip archives.
//!
//! This is not a general-purpose zip implementation: it exists to carry
//! package layers. Only stored (method 0), unencrypted entries can be
//! extracted; compressed or encrypted entries are surfaced in listings but
//! error at extraction time. The writer 64-byte aligns every entry's data
//! (padding through the local header's extra field) and writes the central
//! directory at save time. The reader prefers the end-of-central-directory
//! record but tolerates its absence by scanning local headers, which lets it
//! operate on partial archives.

use std::{
    fs,
    io::{BufWriter, Write},
    sync::Arc,
};

use ahash::AHashMap;

use crate::{
    error::{self, Error},
    resolver::Asset,
};

const LOCAL_HEADER_SIG: u32 = 0x0403_4b50;
const CENTRAL_HEADER_SIG: u32 = 0x0201_4b50;
const EOCD_SIG: u32 = 0x0605_4b50;
const LOCAL_HEADER_LEN: usize = 30;
const CENTRAL_HEADER_LEN: usize = 46;
const EOCD_LEN: usize = 22;
/// Data alignment for written entries, per the package-file convention.
const ALIGNMENT: u64 = 64;
/// Extra-field header id used for alignment padding.
const PADDING_EXTRA_ID: u16 = 0x1986;

/// Information for one file in a zip archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZipFileInfo {
    /// Offset of the file's data from the start of the archive.
    pub data_offset: u64,
    /// Size as stored (equals `uncompressed_size` for stored entries).
    pub size: u64,
    /// Uncompressed size.
    pub uncompressed_size: u64,
    /// CRC-32 of the uncompressed data.
    pub crc32: u32,
    /// Compression method; 0 means stored.
    pub compression_method: u16,
    /// Whether the entry is encrypted.
    pub encrypted: bool,
}

#[derive(Debug)]
struct Entry {
    name: String,
    info: ZipFileInfo,
}

/// A read-only view of a zip archive over any [`Asset`].
pub struct ZipArchive {
    buffer: Arc<[u8]>,
    entries: Vec<Entry>,
    by_name: AHashMap<String, usize>,
}

fn u16_at(buffer: &[u8], offset: usize) -> Option<u16> {
    Some(u16::from_le_bytes(buffer.get(offset..offset + 2)?.try_into().ok()?))
}

fn u32_at(buffer: &[u8], offset: usize) -> Option<u32> {
    Some(u32::from_le_bytes(buffer.get(offset..offset + 4)?.try_into().ok()?))
}

impl ZipArchive {
    /// Opens an archive over `asset`. Fails if no zip structure is found.
    pub fn open(asset: Arc<dyn Asset>) -> error::Result<Self> {
        let buffer = asset
            .buffer()
            .map_err(|err| Error::runtime(format!("cannot read archive: {err}")))?;
        let entries = match find_eocd(&buffer) {
            Some(eocd_offset) => parse_central_directory(&buffer, eocd_offset)?,
            None => scan_local_headers(&buffer)?,
        };
        if entries.is_empty() {
            return Err(Error::runtime("archive holds no entries"));
        }
        let by_name = entries
            .iter()
            .enumerate()
            .map(|(index, entry)| (entry.name.clone(), index))
            .collect();
        Ok(Self {
            buffer,
            entries,
            by_name,
        })
    }

    /// Opens the archive at a filesystem path.
    pub fn open_path(path: &str) -> error::Result<Self> {
        let asset = crate::resolver::FileAsset::open(path)
            .map_err(|err| Error::runtime(format!("cannot open {path:?}: {err}")))?;
        Self::open(Arc::new(asset))
    }

    /// Entry names in archive order.
    pub fn file_names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.name.as_str())
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the archive has no entries (never, for an open archive).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Information for the named entry.
    #[must_use]
    pub fn file_info(&self, name: &str) -> Option<ZipFileInfo> {
        let index = *self.by_name.get(name)?;
        Some(self.entries[index].info.clone())
    }

    /// The first entry's name: by convention, the package's root layer.
    #[must_use]
    pub fn root_layer_path(&self) -> Option<&str> {
        self.entries.first().map(|entry| entry.name.as_str())
    }

    /// Errors unless the named entry can be extracted (stored, unencrypted).
    pub fn check_extractable(&self, name: &str) -> error::Result<()> {
        let info = self
            .file_info(name)
            .ok_or_else(|| Error::runtime(format!("no entry {name:?} in archive")))?;
        if info.encrypted {
            return Err(Error::runtime(format!("entry {name:?} is encrypted")));
        }
        if info.compression_method != 0 {
            return Err(Error::runtime(format!(
                "entry {name:?} uses unsupported compression method {}",
                info.compression_method
            )));
        }
        Ok(())
    }

    /// The raw bytes of the named entry.
    pub fn entry_bytes(&self, name: &str) -> error::Result<Vec<u8>> {
        self.check_extractable(name)?;
        let info = self.file_info(name).expect("checked by check_extractable");
        let start = usize::try_from(info.data_offset).unwrap_or(usize::MAX);
        let end = start.saturating_add(usize::try_from(info.size).unwrap_or(usize::MAX));
        self.buffer
            .get(start..end)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| Error::runtime(format!("entry {name:?} extends past end of archive")))
    }
}

fn find_eocd(buffer: &[u8]) -> Option<usize> {
    let scan_from = buffer.len().saturating_sub(EOCD_LEN + u16::MAX as usize);
    let mut offset = buffer.len().checked_sub(EOCD_LEN)?;
    loop {
        if u32_at(buffer, offset) == Some(EOCD_SIG) {
            return Some(offset);
        }
        if offset == scan_from {
            return None;
        }
        offset -= 1;
    }
}

fn parse_central_directory(buffer: &[u8], eocd_offset: usize) -> error::Result<Vec<Entry>> {
    let bad = || Error::runtime("malformed central directory");
    let count = u16_at(buffer, eocd_offset + 10).ok_or_else(bad)? as usize;
    let cd_offset = u32_at(buffer, eocd_offset + 16).ok_or_else(bad)? as usize;
    let mut offset = cd_offset;
    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        if u32_at(buffer, offset) != Some(CENTRAL_HEADER_SIG) {
            return Err(bad());
        }
        let flags = u16_at(buffer, offset + 8).ok_or_else(bad)?;
        let method = u16_at(buffer, offset + 10).ok_or_else(bad)?;
        let crc32 = u32_at(buffer, offset + 16).ok_or_else(bad)?;
        let compressed = u32_at(buffer, offset + 20).ok_or_else(bad)?;
        let uncompressed = u32_at(buffer, offset + 24).ok_or_else(bad)?;
        let name_len = u16_at(buffer, offset + 28).ok_or_else(bad)? as usize;
        let extra_len = u16_at(buffer, offset + 30).ok_or_else(bad)? as usize;
        let comment_len = u16_at(buffer, offset + 32).ok_or_else(bad)? as usize;
        let local_offset = u32_at(buffer, offset + 42).ok_or_else(bad)? as usize;
        let name_bytes = buffer
            .get(offset + CENTRAL_HEADER_LEN..offset + CENTRAL_HEADER_LEN + name_len)
            .ok_or_else(bad)?;
        let name = String::from_utf8_lossy(name_bytes).into_owned();
        let data_offset = local_data_offset(buffer, local_offset)?;
        entries.push(Entry {
            name,
            info: ZipFileInfo {
                data_offset,
                size: u64::from(compressed),
                uncompressed_size: u64::from(uncompressed),
                crc32,
                compression_method: method,
                encrypted: flags & 0x1 != 0,
            },
        });
        offset += CENTRAL_HEADER_LEN + name_len + extra_len + comment_len;
    }
    Ok(entries)
}

/// Computes an entry's data offset from its local header, which carries its
/// own name/extra lengths (they can differ from the central copies).
fn local_data_offset(buffer: &[u8], local_offset: usize) -> error::Result<u64> {
    let bad = || Error::runtime("malformed local file header");
    if u32_at(buffer, local_offset) != Some(LOCAL_HEADER_SIG) {
        return Err(bad());
    }
    let name_len = u16_at(buffer, local_offset + 26).ok_or_else(bad)? as usize;
    let extra_len = u16_at(buffer, local_offset + 28).ok_or_else(bad)? as usize;
    Ok((local_offset + LOCAL_HEADER_LEN + name_len + extra_len) as u64)
}

/// Fallback for archives missing their end-of-central-directory record:
/// walk local headers from the front.
fn scan_local_headers(buffer: &[u8]) -> error::Result<Vec<Entry>> {
    let bad = || Error::runtime("malformed local file header");
    let mut entries = Vec::new();
    let mut offset = 0usize;
    while u32_at(buffer, offset) == Some(LOCAL_HEADER_SIG) {
        let flags = u16_at(buffer, offset + 6).ok_or_else(bad)?;
        if flags & 0x8 != 0 {
            // Sizes live in a trailing data descriptor; we cannot walk past
            // this entry without the central directory.
            return Err(Error::runtime(
                "archive uses data descriptors and lacks a central directory",
            ));
        }
        let method = u16_at(buffer, offset + 8).ok_or_else(bad)?;
        let crc32 = u32_at(buffer, offset + 14).ok_or_else(bad)?;
        let compressed = u32_at(buffer, offset + 18).ok_or_else(bad)? as usize;
        let uncompressed = u32_at(buffer, offset + 22).ok_or_else(bad)?;
        let name_len = u16_at(buffer, offset + 26).ok_or_else(bad)? as usize;
        let extra_len = u16_at(buffer, offset + 28).ok_or_else(bad)? as usize;
        let name_bytes = buffer
            .get(offset + LOCAL_HEADER_LEN..offset + LOCAL_HEADER_LEN + name_len)
            .ok_or_else(bad)?;
        let name = String::from_utf8_lossy(name_bytes).into_owned();
        let data_offset = offset + LOCAL_HEADER_LEN + name_len + extra_len;
        entries.push(Entry {
            name,
            info: ZipFileInfo {
                data_offset: data_offset as u64,
                size: compressed as u64,
                uncompressed_size: u64::from(uncompressed),
                crc32,
                compression_method: method,
                encrypted: flags & 0x1 != 0,
            },
        });
        offset = data_offset + compressed;
    }
    Ok(entries)
}

struct PendingEntry {
    name: String,
    local_offset: u64,
    crc32: u32,
    size: u64,
}

/// Streams a stored-entry zip archive to a destination path.
///
/// Writes stage into a sibling temporary file; [`save`](Self::save) writes
/// the central directory and atomically renames into place, and
/// [`discard`](Self::discard) aborts leaving the destination untouched.
/// Dropping an unsaved writer discards.
pub struct ZipWriter {
    destination: String,
    staging_path: String,
    out: BufWriter<fs::File>,
    written: u64,
    entries: Vec<PendingEntry>,
    finished: bool,
}

impl ZipWriter {
    /// Creates a writer targeting `path`.
    pub fn create_new(path: &str) -> error::Result<Self> {
        let staging_path = format!("{path}.tmp{}", std::process::id());
        let file = fs::File::create(&staging_path)
            .map_err(|err| Error::runtime(format!("cannot create {staging_path:?}: {err}")))?;
        Ok(Self {
            destination: path.to_owned(),
            staging_path,
            out: BufWriter::new(file),
            written: 0,
            entries: Vec::new(),
            finished: false,
        })
    }

    /// Adds the file at `source_path` as a stored entry. The entry is named
    /// `package_path` when given, else `source_path`. Returns the written
    /// entry name.
    pub fn add_file(&mut self, source_path: &str, package_path: Option<&str>) -> error::Result<String> {
        let bytes = fs::read(source_path)
            .map_err(|err| Error::runtime(format!("cannot read {source_path:?}: {err}")))?;
        let name = package_path.unwrap_or(source_path);
        self.add_bytes(&bytes, name)
    }

    /// Adds in-memory contents as a stored entry named `package_path`.
    pub fn add_bytes(&mut self, bytes: &[u8], package_path: &str) -> error::Result<String> {
        let name = normalize_entry_name(package_path);
        let mut crc = flate2::Crc::new();
        crc.update(bytes);
        let crc32 = crc.sum();

        // Pad the extra field so the entry's data lands 64-byte aligned.
        let header_end = self.written + LOCAL_HEADER_LEN as u64 + name.len() as u64;
        let mut padding = (ALIGNMENT - header_end % ALIGNMENT) % ALIGNMENT;
        if padding > 0 && padding < 4 {
            padding += ALIGNMENT;
        }
        let mut extra = Vec::with_capacity(padding as usize);
        if padding > 0 {
            extra.extend_from_slice(&PADDING_EXTRA_ID.to_le_bytes());
            extra.extend_from_slice(&u16::try_from(padding - 4).unwrap_or(0).to_le_bytes());
            extra.resize(padding as usize, 0);
        }

        let local_offset = self.written;
        let size = u32::try_from(bytes.len())
            .map_err(|_| Error::runtime(format!("entry {name:?} exceeds 4GiB")))?;
        let mut header = Vec::with_capacity(LOCAL_HEADER_LEN + name.len() + extra.len());
        header.extend_from_slice(&LOCAL_HEADER_SIG.to_le_bytes());
        header.extend_from_slice(&20u16.to_le_bytes()); // version needed
        header.extend_from_slice(&0u16.to_le_bytes()); // flags
        header.extend_from_slice(&0u16.to_le_bytes()); // method: stored
        header.extend_from_slice(&0u16.to_le_bytes()); // mod time
        header.extend_from_slice(&0u16.to_le_bytes()); // mod date
        header.extend_from_slice(&crc32.to_le_bytes());
        header.extend_from_slice(&size.to_le_bytes()); // compressed
        header.extend_from_slice(&size.to_le_bytes()); // uncompressed
        header.extend_from_slice(&u16::try_from(name.len()).unwrap_or(u16::MAX).to_le_bytes());
        header.extend_from_slice(&u16::try_from(extra.len()).unwrap_or(0).to_le_bytes());
        header.extend_from_slice(name.as_bytes());
        header.extend_from_slice(&extra);

        self.write_all(&header)?;
        self.write_all(bytes)?;
        self.entries.push(PendingEntry {
            name: name.clone(),
            local_offset,
            crc32,
            size: u64::from(size),
        });
        Ok(name)
    }

    fn write_all(&mut self, bytes: &[u8]) -> error::Result<()> {
        self.out
            .write_all(bytes)
            .map_err(|err| Error::runtime(format!("write failed: {err}")))?;
        self.written += bytes.len() as u64;
        Ok(())
    }

    /// Writes the central directory and atomically renames the staged file
    /// into place. The writer is consumed either way; on error the staging
    /// file is removed and the destination is left untouched.
    pub fn save(mut self) -> error::Result<()> {
        let result = self.finish();
        self.finished = true;
        if result.is_err() {
            let _ = fs::remove_file(&self.staging_path);
        }
        result
    }

    fn finish(&mut self) -> error::Result<()> {
        let cd_offset = self.written;
        let entries = std::mem::take(&mut self.entries);
        for entry in &entries {
            let mut header = Vec::with_capacity(CENTRAL_HEADER_LEN + entry.name.len());
            header.extend_from_slice(&CENTRAL_HEADER_SIG.to_le_bytes());
            header.extend_from_slice(&20u16.to_le_bytes()); // version made by
            header.extend_from_slice(&20u16.to_le_bytes()); // version needed
            header.extend_from_slice(&0u16.to_le_bytes()); // flags
            header.extend_from_slice(&0u16.to_le_bytes()); // method
            header.extend_from_slice(&0u16.to_le_bytes()); // time
            header.extend_from_slice(&0u16.to_le_bytes()); // date
            header.extend_from_slice(&entry.crc32.to_le_bytes());
            let size = u32::try_from(entry.size).unwrap_or(u32::MAX);
            header.extend_from_slice(&size.to_le_bytes());
            header.extend_from_slice(&size.to_le_bytes());
            header.extend_from_slice(&u16::try_from(entry.name.len()).unwrap_or(u16::MAX).to_le_bytes());
            header.extend_from_slice(&0u16.to_le_bytes()); // extra len
            header.extend_from_slice(&0u16.to_le_bytes()); // comment len
            header.extend_from_slice(&0u16.to_le_bytes()); // disk number
            header.extend_from_slice(&0u16.to_le_bytes()); // internal attrs
            header.extend_from_slice(&0u32.to_le_bytes()); // external attrs
            let local = u32::try_from(entry.local_offset).unwrap_or(u32::MAX);
            header.extend_from_slice(&local.to_le_bytes());
            header.extend_from_slice(entry.name.as_bytes());
            self.write_all(&header)?;
        }
        let cd_size = self.written - cd_offset;
        let count = u16::try_from(entries.len()).unwrap_or(u16::MAX);
        let mut eocd = Vec::with_capacity(EOCD_LEN);
        eocd.extend_from_slice(&EOCD_SIG.to_le_bytes());
        eocd.extend_from_slice(&0u16.to_le_bytes()); // disk
        eocd.extend_from_slice(&0u16.to_le_bytes()); // cd disk
        eocd.extend_from_slice(&count.to_le_bytes());
        eocd.extend_from_slice(&count.to_le_bytes());
        eocd.extend_from_slice(&u32::try_from(cd_size).unwrap_or(u32::MAX).to_le_bytes());
        eocd.extend_from_slice(&u32::try_from(cd_offset).unwrap_or(u32::MAX).to_le_bytes());
        eocd.extend_from_slice(&0u16.to_le_bytes()); // comment len
        self.write_all(&eocd)?;
        self.out
            .flush()
            .map_err(|err| Error::runtime(format!("flush failed: {err}")))?;
        fs::rename(&self.staging_path, &self.destination)
            .map_err(|err| Error::runtime(format!("cannot finalize {:?}: {err}", self.destination)))
    }

    /// Aborts without finalizing; the destination path is untouched.
    pub fn discard(mut self) {
        self.finished = true;
        let _ = fs::remove_file(&self.staging_path);
    }
}

impl Drop for ZipWriter {
    fn drop(&mut self) {
        if !self.finished {
            let _ = fs::remove_file(&self.staging_path);
        }
    }
}

/// Entry names use forward slashes and no leading `./`.
fn normalize_entry_name(name: &str) -> String {
    let name = name.replace('\\', "/");
    name.strip_prefix("./").unwrap_or(&name).to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::MemoryAsset;

    fn write_archive(entries: &[(&str, &[u8])]) -> Vec<u8> {
        use std::sync::atomic::{AtomicUsize, Ordering};
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        let dir = std::env::temp_dir().join(format!("strata-zip-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let dest = dir.join(format!("t{}.zip", COUNTER.fetch_add(1, Ordering::Relaxed)));
        let dest = dest.to_str().unwrap();
        let mut writer = ZipWriter::create_new(dest).unwrap();
        for (name, bytes) in entries {
            writer.add_bytes(bytes, name).unwrap();
        }
        writer.save().unwrap();
        let bytes = fs::read(dest).unwrap();
        let _ = fs::remove_file(dest);
        bytes
    }

    #[test]
    fn round_trip_with_alignment() {
        let bytes = write_archive(&[("first.bin", b"hello"), ("second.bin", b"world!")]);
        let archive = ZipArchive::open(Arc::new(MemoryAsset::new(bytes))).unwrap();
        assert_eq!(archive.len(), 2);
        assert_eq!(archive.root_layer_path(), Some("first.bin"));

        let first = archive.file_info("first.bin").unwrap();
        assert_eq!(first.data_offset, 64, "first entry data starts at offset 64");
        assert_eq!(first.size, 5);
        assert_eq!(first.compression_method, 0);
        assert!(!first.encrypted);
        let second = archive.file_info("second.bin").unwrap();
        assert_eq!(second.data_offset % 64, 0, "every entry is 64-byte aligned");

        assert_eq!(archive.entry_bytes("first.bin").unwrap(), b"hello");
        assert_eq!(archive.entry_bytes("second.bin").unwrap(), b"world!");
        assert!(archive.file_info("absent").is_none());
    }

    #[test]
    fn tolerates_missing_central_directory() {
        let mut bytes = write_archive(&[("only.bin", b"payload")]);
        // Truncate away the central directory and EOCD; local headers alone
        // must still be readable.
        let cd_start = bytes
            .windows(4)
            .position(|w| w == CENTRAL_HEADER_SIG.to_le_bytes())
            .unwrap();
        bytes.truncate(cd_start);
        let archive = ZipArchive::open(Arc::new(MemoryAsset::new(bytes))).unwrap();
        assert_eq!(archive.entry_bytes("only.bin").unwrap(), b"payload");
    }

    #[test]
    fn crc_matches_known_value() {
        let bytes = write_archive(&[("crc.bin", b"123456789")]);
        let archive = ZipArchive::open(Arc::new(MemoryAsset::new(bytes))).unwrap();
        // The canonical CRC-32 check value for "123456789".
        assert_eq!(archive.file_info("crc.bin").unwrap().crc32, 0xcbf4_3926);
    }

    #[test]
    fn compressed_entries_error_at_extraction() {
        let mut bytes = write_archive(&[("x.bin", b"data")]);
        // Flip the method field in both the local and central headers.
        bytes[8] = 8;
        let cd = bytes
            .windows(4)
            .position(|w| w == CENTRAL_HEADER_SIG.to_le_bytes())
            .unwrap();
        bytes[cd + 10] = 8;
        let archive = ZipArchive::open(Arc::new(MemoryAsset::new(bytes))).unwrap();
        assert!(archive.file_info("x.bin").is_some(), "listing still works");
        assert!(archive.entry_bytes("x.bin").is_err(), "extraction errors");
    }
}
