//! The asset-resolution seam: identifiers in, byte-addressable assets out.
//!
//! The engine treats resolution as a black box behind [`AssetResolver`]. A
//! filesystem resolver ships as the default; it also understands
//! package-relative paths (`pkg.strataz[inner/file.stratac]`, nesting
//! allowed), serving inner entries as offset views into the outer archive
//! without copying.
//!
//! Parsed zip archives are reference-counted through a per-thread scoped
//! cache: while a [`ResolverCacheScope`] is open on a thread, every archive
//! the resolver parses is shared by subsequent package resolutions on that
//! thread. Scopes nest by a counter and the cache releases its references
//! when the outermost scope closes; with no scope open, each resolution
//! parses its archive fresh.

use std::{
    cell::RefCell,
    fs,
    io::Read,
    marker::PhantomData,
    path::Path as FsPath,
    sync::Arc,
};

use ahash::AHashMap;

use crate::{error, zip::ZipArchive};

/// A byte-addressable asset.
pub trait Asset: Send + Sync {
    /// Total size in bytes.
    fn size(&self) -> u64;

    /// Reads up to `buffer.len()` bytes at `offset`, returning the count
    /// actually read.
    fn read(&self, buffer: &mut [u8], offset: u64) -> std::io::Result<usize>;

    /// The full contents.
    fn buffer(&self) -> std::io::Result<Arc<[u8]>>;

    /// For memory-mapping callers: the backing file handle and this asset's
    /// byte offset within it, when file-backed.
    fn file_and_offset(&self) -> Option<(&fs::File, u64)> {
        None
    }
}

/// An asset held fully in memory.
pub struct MemoryAsset {
    bytes: Arc<[u8]>,
}

impl MemoryAsset {
    #[must_use]
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self { bytes: bytes.into() }
    }
}

impl Asset for MemoryAsset {
    fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn read(&self, buffer: &mut [u8], offset: u64) -> std::io::Result<usize> {
        let offset = usize::try_from(offset).unwrap_or(usize::MAX);
        if offset >= self.bytes.len() {
            return Ok(0);
        }
        let available = &self.bytes[offset..];
        let count = buffer.len().min(available.len());
        buffer[..count].copy_from_slice(&available[..count]);
        Ok(count)
    }

    fn buffer(&self) -> std::io::Result<Arc<[u8]>> {
        Ok(Arc::clone(&self.bytes))
    }
}

/// A file-backed asset. Contents load once and stay shared; the file handle
/// is retained for memory-mapping callers.
pub struct FileAsset {
    file: fs::File,
    bytes: Arc<[u8]>,
}

impl FileAsset {
    pub fn open(path: &str) -> std::io::Result<Self> {
        let mut file = fs::File::open(path)?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        Ok(Self {
            file,
            bytes: bytes.into(),
        })
    }
}

impl Asset for FileAsset {
    fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn read(&self, buffer: &mut [u8], offset: u64) -> std::io::Result<usize> {
        MemoryAsset {
            bytes: Arc::clone(&self.bytes),
        }
        .read(buffer, offset)
    }

    fn buffer(&self) -> std::io::Result<Arc<[u8]>> {
        Ok(Arc::clone(&self.bytes))
    }

    fn file_and_offset(&self) -> Option<(&fs::File, u64)> {
        Some((&self.file, 0))
    }
}

/// A windowed view into another asset; how zip entries are served.
pub struct OffsetAsset {
    inner: Arc<dyn Asset>,
    offset: u64,
    length: u64,
}

impl OffsetAsset {
    #[must_use]
    pub fn new(inner: Arc<dyn Asset>, offset: u64, length: u64) -> Self {
        Self { inner, offset, length }
    }
}

impl Asset for OffsetAsset {
    fn size(&self) -> u64 {
        self.length
    }

    fn read(&self, buffer: &mut [u8], offset: u64) -> std::io::Result<usize> {
        if offset >= self.length {
            return Ok(0);
        }
        let remaining = usize::try_from(self.length - offset).unwrap_or(usize::MAX);
        let count = buffer.len().min(remaining);
        self.inner.read(&mut buffer[..count], self.offset + offset)
    }

    fn buffer(&self) -> std::io::Result<Arc<[u8]>> {
        let mut bytes = vec![0u8; usize::try_from(self.length).unwrap_or(usize::MAX)];
        let mut total = 0;
        while total < bytes.len() {
            let read = self.read_chunk(&mut bytes[total..], total as u64)?;
            if read == 0 {
                break;
            }
            total += read;
        }
        bytes.truncate(total);
        Ok(bytes.into())
    }

    fn file_and_offset(&self) -> Option<(&fs::File, u64)> {
        self.inner
            .file_and_offset()
            .map(|(file, base)| (file, base + self.offset))
    }
}

impl OffsetAsset {
    fn read_chunk(&self, buffer: &mut [u8], offset: u64) -> std::io::Result<usize> {
        Asset::read(self, buffer, offset)
    }
}

/// Resolution of identifiers to resolved paths and open assets.
pub trait AssetResolver: Send + Sync {
    /// Maps an identifier to a resolved path, or `None` when the asset does
    /// not exist.
    fn resolve(&self, identifier: &str) -> Option<String>;

    /// Opens the asset at a resolved path.
    fn open_asset(&self, resolved_path: &str) -> error::Result<Arc<dyn Asset>>;
}

// ----------------------------------------------------------------------
// Package-relative path grammar: outer[inner], nested as outer[a[b]].

/// True if `path` uses package-relative syntax.
#[must_use]
pub fn is_package_relative_path(path: &str) -> bool {
    path.contains('[') && path.ends_with(']')
}

/// Joins an outer package path and an inner packaged path.
#[must_use]
pub fn join_package_path(outer: &str, inner: &str) -> String {
    if outer.is_empty() {
        return inner.to_owned();
    }
    if inner.is_empty() {
        return outer.to_owned();
    }
    format!("{outer}[{inner}]")
}

/// Splits off the outermost package: `a[b[c]]` becomes `("a", "b[c]")`.
/// Non-package paths come back unchanged with an empty inner part.
#[must_use]
pub fn split_package_path_outer(path: &str) -> (String, String) {
    if !is_package_relative_path(path) {
        return (path.to_owned(), String::new());
    }
    let open = path.find('[').expect("checked by is_package_relative_path");
    let outer = &path[..open];
    let inner = &path[open + 1..path.len() - 1];
    (outer.to_owned(), inner.to_owned())
}

/// Splits off the innermost packaged path: `a[b[c]]` becomes `("a[b]", "c")`.
#[must_use]
pub fn split_package_path_inner(path: &str) -> (String, String) {
    if !is_package_relative_path(path) {
        return (path.to_owned(), String::new());
    }
    let (outer, inner) = split_package_path_outer(path);
    if !is_package_relative_path(&inner) {
        return (outer, inner);
    }
    let (inner_outer, innermost) = split_package_path_inner(&inner);
    (join_package_path(&outer, &inner_outer), innermost)
}

/// The default resolver: plain filesystem paths plus package-relative
/// syntax served through the zip reader.
#[derive(Debug, Default)]
pub struct FilesystemResolver;

use crate::error::Error;

// ----------------------------------------------------------------------
// Per-thread scoped archive cache

thread_local! {
    static ZIP_ARCHIVE_CACHE: RefCell<ZipCacheState> = RefCell::new(ZipCacheState {
        depth: 0,
        archives: AHashMap::new(),
    });
}

struct ZipCacheState {
    /// Open scope count; the cache is active while non-zero.
    depth: usize,
    /// Parsed archives keyed by the resolved (package-relative) path of
    /// the archive asset. The `Arc`s here are the references the cache
    /// holds on behalf of its scopes.
    archives: AHashMap<String, Arc<ZipArchive>>,
}

/// A scoped archive cache on the current thread; see the module docs.
///
/// Scopes nest: inner scopes extend the outer cache, and the archives are
/// released when the outermost scope closes, including during unwinding.
#[must_use = "dropping the scope immediately closes it"]
pub struct ResolverCacheScope {
    _not_send: PhantomData<*const ()>,
}

impl ResolverCacheScope {
    /// Opens a cache scope on the current thread.
    pub fn new() -> Self {
        ZIP_ARCHIVE_CACHE.with(|cache| cache.borrow_mut().depth += 1);
        Self {
            _not_send: PhantomData,
        }
    }
}

impl Default for ResolverCacheScope {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ResolverCacheScope {
    fn drop(&mut self) {
        ZIP_ARCHIVE_CACHE.with(|cache| {
            let mut cache = cache.borrow_mut();
            cache.depth -= 1;
            if cache.depth == 0 {
                cache.archives.clear();
            }
        });
    }
}

/// Returns the archive for `key`, reusing the current thread's cached
/// parse when a cache scope is open, parsing `asset` otherwise.
pub(crate) fn find_or_open_archive(key: &str, asset: &Arc<dyn Asset>) -> error::Result<Arc<ZipArchive>> {
    let cached = ZIP_ARCHIVE_CACHE.with(|cache| {
        let cache = cache.borrow();
        if cache.depth == 0 {
            None
        } else {
            cache.archives.get(key).cloned()
        }
    });
    if let Some(archive) = cached {
        return Ok(archive);
    }
    let archive = Arc::new(ZipArchive::open(Arc::clone(asset))?);
    ZIP_ARCHIVE_CACHE.with(|cache| {
        let mut cache = cache.borrow_mut();
        if cache.depth > 0 {
            cache.archives.insert(key.to_owned(), Arc::clone(&archive));
        }
    });
    Ok(archive)
}

impl FilesystemResolver {
    /// Peels one package level at a time, serving each entry as an offset
    /// view into its enclosing archive; nesting recurses. `outer_key` is
    /// the resolved path of the enclosing archive, the cache key under
    /// which its parse is shared.
    fn open_packaged(
        &self,
        outer_key: &str,
        outer_asset: Arc<dyn Asset>,
        inner: &str,
    ) -> error::Result<Arc<dyn Asset>> {
        let archive = find_or_open_archive(outer_key, &outer_asset)?;
        let (entry_name, rest) = if is_package_relative_path(inner) {
            split_package_path_outer(inner)
        } else {
            (inner.to_owned(), String::new())
        };
        let info = archive
            .file_info(&entry_name)
            .ok_or_else(|| Error::runtime(format!("no entry {entry_name:?} in package")))?;
        archive.check_extractable(&entry_name)?;
        let view: Arc<dyn Asset> = Arc::new(OffsetAsset::new(outer_asset, info.data_offset, info.size));
        if rest.is_empty() {
            Ok(view)
        } else {
            self.open_packaged(&join_package_path(outer_key, &entry_name), view, &rest)
        }
    }
}

impl AssetResolver for FilesystemResolver {
    fn resolve(&self, identifier: &str) -> Option<String> {
        if is_package_relative_path(identifier) {
            let (outer, inner) = split_package_path_outer(identifier);
            let resolved_outer = self.resolve(&outer)?;
            return Some(join_package_path(&resolved_outer, &inner));
        }
        FsPath::new(identifier).exists().then(|| identifier.to_owned())
    }

    fn open_asset(&self, resolved_path: &str) -> error::Result<Arc<dyn Asset>> {
        if is_package_relative_path(resolved_path) {
            let (outer, inner) = split_package_path_outer(resolved_path);
            let outer_asset = self.open_asset(&outer)?;
            return self.open_packaged(&outer, outer_asset, &inner);
        }
        FileAsset::open(resolved_path)
            .map(|asset| Arc::new(asset) as Arc<dyn Asset>)
            .map_err(|err| Error::runtime(format!("cannot open {resolved_path:?}: {err}")))
    }
}

/// The process-wide resolver used by layer I/O.
#[must_use]
pub fn default_resolver() -> &'static dyn AssetResolver {
    static RESOLVER: FilesystemResolver = FilesystemResolver;
    &RESOLVER
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn package_path_grammar() {
        assert!(is_package_relative_path("a.strataz[b.stratac]"));
        assert!(!is_package_relative_path("a.strataz"));
        assert_eq!(join_package_path("a", "b"), "a[b]");
        assert_eq!(split_package_path_outer("a[b[c]]"), ("a".into(), "b[c]".into()));
        assert_eq!(split_package_path_inner("a[b[c]]"), ("a[b]".into(), "c".into()));
        assert_eq!(split_package_path_outer("plain"), ("plain".into(), String::new()));
    }

    fn temp_archive(entries: &[(&str, &[u8])]) -> String {
        use std::sync::atomic::{AtomicUsize, Ordering};
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        let dir = std::env::temp_dir().join(format!("strata-resolver-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let dest = dir.join(format!("a{}.strataz", COUNTER.fetch_add(1, Ordering::Relaxed)));
        let dest = dest.to_str().unwrap().to_owned();
        let mut writer = crate::zip::ZipWriter::create_new(&dest).unwrap();
        for (name, bytes) in entries {
            writer.add_bytes(bytes, name).unwrap();
        }
        writer.save().unwrap();
        dest
    }

    #[test]
    fn cache_scope_shares_archive_parses() {
        let path = temp_archive(&[("entry.bin", b"payload")]);
        let resolver = FilesystemResolver;
        let asset = resolver.open_asset(&path).unwrap();

        // With no scope open, every resolution parses afresh.
        let a = find_or_open_archive(&path, &asset).unwrap();
        let b = find_or_open_archive(&path, &asset).unwrap();
        assert!(!Arc::ptr_eq(&a, &b), "no scope, no sharing");

        let outside;
        {
            let _scope = ResolverCacheScope::new();
            let c = find_or_open_archive(&path, &asset).unwrap();
            let d = find_or_open_archive(&path, &asset).unwrap();
            assert!(Arc::ptr_eq(&c, &d), "one parse per scope per archive");
            {
                let _inner = ResolverCacheScope::new();
                let e = find_or_open_archive(&path, &asset).unwrap();
                assert!(Arc::ptr_eq(&c, &e), "nested scopes extend the outer cache");
            }
            // The inner close must not have released anything.
            let f = find_or_open_archive(&path, &asset).unwrap();
            assert!(Arc::ptr_eq(&c, &f));
            outside = c;
        }
        // The outermost close released the cache's references.
        let g = find_or_open_archive(&path, &asset).unwrap();
        assert!(!Arc::ptr_eq(&outside, &g), "outermost close drops cached archives");
    }

    #[test]
    fn scoped_package_resolution_reads_through_the_cache() {
        let inner: Vec<u8> = b"inner bytes".to_vec();
        let path = temp_archive(&[("first.bin", &inner), ("second.bin", b"other")]);
        let resolver = FilesystemResolver;
        let _scope = ResolverCacheScope::new();
        // Two resolutions into the same package share one parse; the reads
        // still come back correct through the offset views.
        let first = resolver.open_asset(&format!("{path}[first.bin]")).unwrap();
        let second = resolver.open_asset(&format!("{path}[second.bin]")).unwrap();
        assert_eq!(&first.buffer().unwrap()[..], &inner[..]);
        assert_eq!(&second.buffer().unwrap()[..], b"other");
    }

    #[test]
    fn offset_asset_windows_reads() {
        let inner: Arc<dyn Asset> = Arc::new(MemoryAsset::new(&b"0123456789"[..]));
        let view = OffsetAsset::new(inner, 2, 5);
        assert_eq!(view.size(), 5);
        let mut buf = [0u8; 16];
        let read = view.read(&mut buf, 0).unwrap();
        assert_eq!(&buf[..read], b"23456");
        let read = view.read(&mut buf, 3).unwrap();
        assert_eq!(&buf[..read], b"56");
        assert_eq!(&view.buffer().unwrap()[..], b"23456");
    }
}
