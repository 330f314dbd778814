//! File format plugins: text, crate (binary), and package (zip).
//!
//! A [`FileFormat`] turns resolved assets into data stores and back. The
//! text format writes a cookie/version header line padded with trailing
//! spaces (so a later in-place version upgrade can overwrite the version
//! without moving the body) followed by a deterministic JSON body. The crate
//! format delegates to [`CrateData`]. The package format reads the root
//! layer out of a zip archive and writes archives with the root layer as the
//! first, 64-byte-aligned entry.

use std::sync::{Arc, LazyLock};

use serde::{Deserialize, Serialize};

use crate::{
    abstract_data::{AbstractData, SpecType},
    crate_data::{CRATE_READ_VERSION, CrateData},
    error::{self, Error},
    file_version::FileVersion,
    memory_data::MemoryData,
    path::ScenePath,
    resolver::{Asset, OffsetAsset, default_resolver, is_package_relative_path, split_package_path_inner},
    token::Token,
    value::Value,
    zip::{ZipArchive, ZipWriter},
};

/// Extension of text layer files.
pub const TEXT_EXTENSION: &str = "strata";
/// Extension of binary (crate) layer files.
pub const CRATE_EXTENSION: &str = "stratac";
/// Extension of package layer files.
pub const PACKAGE_EXTENSION: &str = "strataz";

/// Cookie opening every text layer file.
pub const TEXT_COOKIE: &str = "#strata";
/// The text version written by this build.
pub const TEXT_WRITE_VERSION: FileVersion = FileVersion::new(1, 0, 0);
/// The newest text version this build can read.
pub const TEXT_READ_VERSION: FileVersion = FileVersion::new(1, 0, 0);

/// Width the version field is padded to in the header line.
const HEADER_VERSION_WIDTH: usize = 16;

/// A reader/writer for one on-disk layer representation.
pub trait FileFormat: Send + Sync {
    /// Stable identifier of this format.
    fn format_id(&self) -> &'static str;

    /// The file extension this format serves (without the dot).
    fn extension(&self) -> &'static str;

    /// Cheap sniff: true if the asset at `resolved_path` looks readable by
    /// this format.
    fn can_read(&self, resolved_path: &str) -> bool {
        match default_resolver().open_asset(resolved_path) {
            Ok(asset) => self.can_read_asset(&asset),
            Err(_) => false,
        }
    }

    /// Sniffs an open asset.
    fn can_read_asset(&self, asset: &Arc<dyn Asset>) -> bool;

    /// Reads a layer's content from `resolved_path`. With `metadata_only`,
    /// only the pseudo-root record is retained.
    fn read(&self, resolved_path: &str, metadata_only: bool) -> error::Result<(Box<dyn AbstractData>, FileVersion)> {
        let asset = default_resolver().open_asset(resolved_path)?;
        self.read_asset(&asset, metadata_only)
    }

    /// Reads a layer's content from an open asset.
    fn read_asset(
        &self,
        asset: &Arc<dyn Asset>,
        metadata_only: bool,
    ) -> error::Result<(Box<dyn AbstractData>, FileVersion)>;

    /// Writes `data` to `path`, staging to a temporary file and renaming so
    /// a failed write leaves the destination untouched.
    fn write_to_file(&self, data: &dyn AbstractData, path: &str, comment: Option<&str>) -> error::Result<()>;

    /// In-place save; formats without one delegate to a full write.
    fn save_to_file(&self, data: &dyn AbstractData, path: &str) -> error::Result<()> {
        self.write_to_file(data, path, None)
    }

    /// Parses layer content from a string. Only the text format supports
    /// this.
    fn read_from_string(&self, _text: &str) -> error::Result<(Box<dyn AbstractData>, FileVersion)> {
        Err(Error::coding(format!(
            "format '{}' does not read from strings",
            self.format_id()
        )))
    }

    /// Serializes layer content to a string. Only the text format supports
    /// this.
    fn write_to_string(&self, _data: &dyn AbstractData, _comment: Option<&str>) -> error::Result<String> {
        Err(Error::coding(format!(
            "format '{}' does not write to strings",
            self.format_id()
        )))
    }
}

fn strip_to_metadata(data: &mut MemoryData) {
    let root = ScenePath::absolute_root();
    let paths: Vec<ScenePath> = crate::abstract_data::collect_spec_paths(data)
        .into_iter()
        .filter(|p| *p != root)
        .collect();
    for path in paths {
        data.erase_spec(&path);
    }
}

// ----------------------------------------------------------------------
// Text format

#[derive(Serialize, Deserialize)]
struct TextSpec {
    path: ScenePath,
    #[serde(rename = "type")]
    spec_type: SpecType,
    fields: Vec<(Token, Value)>,
}

#[derive(Serialize, Deserialize)]
struct TextDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    comment: Option<String>,
    specs: Vec<TextSpec>,
}

/// The text layer format; see the module docs for the header convention.
#[derive(Debug, Default)]
pub struct TextFileFormat;

impl TextFileFormat {
    fn header_line(version: FileVersion) -> String {
        format!(
            "{TEXT_COOKIE} {:<width$}\n",
            version.as_string(),
            width = HEADER_VERSION_WIDTH
        )
    }

    fn parse_header(text: &str) -> error::Result<(FileVersion, &str)> {
        let (line, body) = text
            .split_once('\n')
            .ok_or_else(|| Error::parse("missing text layer header"))?;
        let line = line.trim_end();
        let Some(rest) = line.strip_prefix(TEXT_COOKIE) else {
            return Err(Error::parse(format!("bad text layer cookie in {line:?}")));
        };
        let version = FileVersion::from_string(rest.trim())
            .ok_or_else(|| Error::parse(format!("bad text layer version in {line:?}")))?;
        if !TEXT_READ_VERSION.can_read(version) {
            return Err(Error::VersionMismatch {
                found: version,
                max_readable: TEXT_READ_VERSION,
            });
        }
        Ok((version, body))
    }

    fn to_document(data: &dyn AbstractData, comment: Option<&str>) -> TextDocument {
        let mut specs = Vec::new();
        for path in crate::abstract_data::collect_spec_paths(data) {
            let mut names = data.list(&path);
            names.sort();
            let fields = names.into_iter().map(|name| (name, data.get(&path, name))).collect();
            specs.push(TextSpec {
                spec_type: data.spec_type(&path),
                path,
                fields,
            });
        }
        TextDocument {
            comment: comment.map(str::to_owned),
            specs,
        }
    }

    fn from_document(document: TextDocument) -> MemoryData {
        let mut data = MemoryData::new();
        for spec in document.specs {
            data.create_spec(&spec.path, spec.spec_type);
            for (name, value) in spec.fields {
                data.set(&spec.path, name, value);
            }
        }
        data
    }

    /// Serializes with an explicit target version. Requesting a version this
    /// build cannot write is a coding error.
    pub fn write_to_string_with_version(
        &self,
        data: &dyn AbstractData,
        comment: Option<&str>,
        version: FileVersion,
    ) -> error::Result<String> {
        if !TEXT_WRITE_VERSION.can_write(version) {
            return Err(Error::coding(format!(
                "cannot write text version {version}; this build writes at most {TEXT_WRITE_VERSION}"
            )));
        }
        let document = Self::to_document(data, comment);
        let body = serde_json::to_string_pretty(&document)
            .map_err(|err| Error::runtime(format!("serialization failed: {err}")))?;
        Ok(format!("{}{body}\n", Self::header_line(version)))
    }
}

impl FileFormat for TextFileFormat {
    fn format_id(&self) -> &'static str {
        "strata_text"
    }

    fn extension(&self) -> &'static str {
        TEXT_EXTENSION
    }

    fn can_read_asset(&self, asset: &Arc<dyn Asset>) -> bool {
        let mut head = [0u8; 8];
        let Ok(read) = asset.read(&mut head, 0) else {
            return false;
        };
        head[..read].starts_with(TEXT_COOKIE.as_bytes())
    }

    fn read_asset(
        &self,
        asset: &Arc<dyn Asset>,
        metadata_only: bool,
    ) -> error::Result<(Box<dyn AbstractData>, FileVersion)> {
        let buffer = asset
            .buffer()
            .map_err(|err| Error::runtime(format!("cannot read text layer: {err}")))?;
        let text = std::str::from_utf8(&buffer).map_err(|_| Error::parse("text layer is not utf-8"))?;
        let (data, version) = self.read_from_string(text)?;
        let mut data = data;
        if metadata_only {
            if let Some(memory) = data.as_any_mut().downcast_mut::<MemoryData>() {
                strip_to_metadata(memory);
            }
        }
        Ok((data, version))
    }

    fn read_from_string(&self, text: &str) -> error::Result<(Box<dyn AbstractData>, FileVersion)> {
        let (version, body) = Self::parse_header(text)?;
        let document: TextDocument =
            serde_json::from_str(body).map_err(|err| Error::parse(format!("malformed text layer body: {err}")))?;
        Ok((Box::new(Self::from_document(document)), version))
    }

    fn write_to_file(&self, data: &dyn AbstractData, path: &str, comment: Option<&str>) -> error::Result<()> {
        let text = self.write_to_string(data, comment)?;
        write_file_atomically(path, text.as_bytes())
    }

    fn write_to_string(&self, data: &dyn AbstractData, comment: Option<&str>) -> error::Result<String> {
        self.write_to_string_with_version(data, comment, TEXT_WRITE_VERSION)
    }
}

// ----------------------------------------------------------------------
// Crate format

/// The binary layer format, backed by [`CrateData`].
#[derive(Debug, Default)]
pub struct CrateFileFormat;

impl FileFormat for CrateFileFormat {
    fn format_id(&self) -> &'static str {
        "strata_crate"
    }

    fn extension(&self) -> &'static str {
        CRATE_EXTENSION
    }

    fn can_read_asset(&self, asset: &Arc<dyn Asset>) -> bool {
        let mut head = [0u8; 12];
        let Ok(read) = asset.read(&mut head, 0) else {
            return false;
        };
        &head[..read] == crate::crate_data::CRATE_MAGIC
    }

    fn read_asset(
        &self,
        asset: &Arc<dyn Asset>,
        metadata_only: bool,
    ) -> error::Result<(Box<dyn AbstractData>, FileVersion)> {
        let mut data = CrateData::open(asset)?;
        let version = data.version();
        if metadata_only {
            let root = ScenePath::absolute_root();
            let paths: Vec<ScenePath> = crate::abstract_data::collect_spec_paths(&data)
                .into_iter()
                .filter(|p| *p != root)
                .collect();
            for path in paths {
                data.erase_spec(&path);
            }
        }
        Ok((Box::new(data), version))
    }

    fn write_to_file(&self, data: &dyn AbstractData, path: &str, _comment: Option<&str>) -> error::Result<()> {
        let bytes = encode_as_crate(data)?;
        write_file_atomically(path, &bytes)
    }
}

/// Encodes any data store as crate-file bytes, copying records when the
/// store is not already a [`CrateData`].
fn encode_as_crate(data: &dyn AbstractData) -> error::Result<Vec<u8>> {
    if let Some(crate_data) = data.as_any().downcast_ref::<CrateData>() {
        return crate_data.to_bytes();
    }
    let mut copy = CrateData::new();
    for path in crate::abstract_data::collect_spec_paths(data) {
        copy.create_spec(&path, data.spec_type(&path));
        for field in data.list(&path) {
            copy.set(&path, field, data.get(&path, field));
        }
    }
    copy.to_bytes()
}

// ----------------------------------------------------------------------
// Package format

/// The package layer format: a zip archive whose first entry is the root
/// layer.
#[derive(Debug, Default)]
pub struct PackageFileFormat;

impl FileFormat for PackageFileFormat {
    fn format_id(&self) -> &'static str {
        "strata_package"
    }

    fn extension(&self) -> &'static str {
        PACKAGE_EXTENSION
    }

    fn can_read_asset(&self, asset: &Arc<dyn Asset>) -> bool {
        let mut head = [0u8; 4];
        let Ok(read) = asset.read(&mut head, 0) else {
            return false;
        };
        head[..read] == [0x50, 0x4b, 0x03, 0x04]
    }

    fn read_asset(
        &self,
        asset: &Arc<dyn Asset>,
        metadata_only: bool,
    ) -> error::Result<(Box<dyn AbstractData>, FileVersion)> {
        let archive = ZipArchive::open(Arc::clone(asset))?;
        let root = archive
            .root_layer_path()
            .ok_or_else(|| Error::runtime("package holds no entries"))?
            .to_owned();
        archive.check_extractable(&root)?;
        let info = archive.file_info(&root).expect("root entry was just listed");
        let view: Arc<dyn Asset> = Arc::new(OffsetAsset::new(Arc::clone(asset), info.data_offset, info.size));
        let format = format_for_path(&root)
            .ok_or_else(|| Error::runtime(format!("package root layer {root:?} has no known format")))?;
        format.read_asset(&view, metadata_only)
    }

    fn write_to_file(&self, data: &dyn AbstractData, path: &str, _comment: Option<&str>) -> error::Result<()> {
        let bytes = encode_as_crate(data)?;
        let mut writer = ZipWriter::create_new(path)?;
        writer.add_bytes(&bytes, &format!("root.{CRATE_EXTENSION}"))?;
        writer.save()
    }
}

/// Returns the first file listed in a package, its root layer by
/// convention.
pub fn package_root_layer_path(package_path: &str) -> error::Result<String> {
    let asset = default_resolver().open_asset(package_path)?;
    let archive = ZipArchive::open(asset)?;
    archive
        .root_layer_path()
        .map(str::to_owned)
        .ok_or_else(|| Error::runtime("package holds no entries"))
}

// ----------------------------------------------------------------------
// Registry

static FORMATS: LazyLock<Vec<Arc<dyn FileFormat>>> = LazyLock::new(|| {
    vec![
        Arc::new(TextFileFormat) as Arc<dyn FileFormat>,
        Arc::new(CrateFileFormat),
        Arc::new(PackageFileFormat),
    ]
});

/// The registered text format.
#[must_use]
pub fn text_format() -> Arc<dyn FileFormat> {
    Arc::clone(&FORMATS[0])
}

/// Looks up a format by its stable identifier.
#[must_use]
pub fn format_by_id(id: &str) -> Option<Arc<dyn FileFormat>> {
    FORMATS.iter().find(|f| f.format_id() == id).cloned()
}

/// Picks the format serving `path` by extension. Package-relative paths are
/// dispatched on the innermost packaged file.
#[must_use]
pub fn format_for_path(path: &str) -> Option<Arc<dyn FileFormat>> {
    let effective = if is_package_relative_path(path) {
        split_package_path_inner(path).1
    } else {
        path.to_owned()
    };
    let extension = effective.rsplit('.').next()?;
    FORMATS.iter().find(|f| f.extension() == extension).cloned()
}

/// Writes `bytes` to `path` through a staged sibling file and an atomic
/// rename, so failures never clobber an existing file.
fn write_file_atomically(path: &str, bytes: &[u8]) -> error::Result<()> {
    let staging = format!("{path}.tmp{}", std::process::id());
    std::fs::write(&staging, bytes).map_err(|err| Error::runtime(format!("cannot write {staging:?}: {err}")))?;
    std::fs::rename(&staging, path).map_err(|err| {
        let _ = std::fs::remove_file(&staging);
        Error::runtime(format!("cannot finalize {path:?}: {err}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::Token;

    fn sample_data() -> MemoryData {
        let mut data = MemoryData::new();
        data.create_spec(&ScenePath::absolute_root(), SpecType::PseudoRoot);
        data.create_spec(&ScenePath::from_string("/Hello"), SpecType::Prim);
        data.set(&ScenePath::from_string("/Hello"), Token::new("size"), Value::from(1.0f32));
        data
    }

    #[test]
    fn text_round_trip_is_deterministic() {
        let data = sample_data();
        let format = TextFileFormat;
        let text = format.write_to_string(&data, None).unwrap();
        assert!(text.starts_with("#strata 1.0"));
        let (reread, version) = format.read_from_string(&text).unwrap();
        assert_eq!(version, TEXT_WRITE_VERSION);
        assert!((&data as &dyn AbstractData).equals(reread.as_ref()));
        let second = format.write_to_string(reread.as_ref(), None).unwrap();
        assert_eq!(text, second, "export is byte-stable across a round trip");
    }

    #[test]
    fn header_is_padded_for_in_place_upgrades() {
        let line = TextFileFormat::header_line(FileVersion::new(1, 0, 0));
        let longest = TextFileFormat::header_line(FileVersion::new(255, 255, 255));
        assert_eq!(line.len(), longest.len(), "version field is fixed-width");
        // A rewritten version fits without moving the body.
        let (version, _) = TextFileFormat::parse_header(&line).unwrap();
        assert_eq!(version, FileVersion::new(1, 0, 0));
    }

    #[test]
    fn version_gates() {
        let format = TextFileFormat;
        let data = sample_data();
        let err = format
            .write_to_string_with_version(&data, None, FileVersion::new(9, 9, 9))
            .unwrap_err();
        assert!(err.is_coding_error(), "upgrading past max output version is a coding error");

        let future = format!("{}{{\"specs\": []}}\n", TextFileFormat::header_line(FileVersion::new(1, 99, 0)));
        assert!(matches!(
            format.read_from_string(&future),
            Err(Error::VersionMismatch { .. })
        ));
        assert!(CRATE_READ_VERSION.is_valid());
    }

    #[test]
    fn format_registry_dispatch() {
        assert_eq!(format_for_path("a/b/c.strata").unwrap().format_id(), "strata_text");
        assert_eq!(format_for_path("c.stratac").unwrap().format_id(), "strata_crate");
        assert_eq!(format_for_path("c.strataz").unwrap().format_id(), "strata_package");
        assert_eq!(
            format_for_path("pkg.strataz[inner/root.stratac]").unwrap().format_id(),
            "strata_crate"
        );
        assert!(format_for_path("unknown.xyz").is_none());
        assert!(format_by_id("strata_text").is_some());
    }
}
