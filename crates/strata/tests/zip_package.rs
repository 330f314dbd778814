//! Package archives: alignment, nesting, and package-relative resolution.

use strata::{ResolverCacheScope, ZipArchive, ZipWriter, default_resolver};

fn temp_path(name: &str) -> String {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join(name).to_str().unwrap().to_owned();
    std::mem::forget(dir);
    path
}

/// Builds the canonical nested package: a top-level archive holding a crate
/// file, a nested archive, and a second copy of the crate file.
fn build_nested_package() -> (String, Vec<u8>, Vec<u8>) {
    let file_1: Vec<u8> = (0u8..=255).cycle().take(1000).collect();

    let nested_path = temp_path("nested.strataz");
    let mut nested = ZipWriter::create_new(&nested_path).unwrap();
    nested.add_bytes(&file_1, "file_1.stratac").unwrap();
    nested.save().unwrap();
    let nested_bytes = std::fs::read(&nested_path).unwrap();

    let package_path = temp_path("test.strataz");
    let mut package = ZipWriter::create_new(&package_path).unwrap();
    package.add_bytes(&file_1, "file_1.stratac").unwrap();
    package.add_bytes(&nested_bytes, "nested.strataz").unwrap();
    package.add_bytes(&file_1, "copies/file_1.stratac").unwrap();
    package.save().unwrap();

    (package_path, file_1, nested_bytes)
}

#[test]
fn entries_are_aligned_and_listed_in_order() {
    let (package_path, file_1, nested_bytes) = build_nested_package();
    let archive = ZipArchive::open_path(&package_path).unwrap();

    let names: Vec<&str> = archive.file_names().collect();
    assert_eq!(names, ["file_1.stratac", "nested.strataz", "copies/file_1.stratac"]);
    assert_eq!(archive.root_layer_path(), Some("file_1.stratac"));

    let first = archive.file_info("file_1.stratac").unwrap();
    assert_eq!(first.data_offset, 64, "the first entry begins at offset 64");
    for name in &names {
        let info = archive.file_info(name).unwrap();
        assert_eq!(info.data_offset % 64, 0, "entry {name} is 64-byte aligned");
        assert_eq!(info.size, info.uncompressed_size, "stored entries");
        assert_eq!(info.compression_method, 0);
        assert!(!info.encrypted);
    }

    assert_eq!(archive.entry_bytes("file_1.stratac").unwrap(), file_1);
    assert_eq!(archive.entry_bytes("nested.strataz").unwrap(), nested_bytes);
}

#[test]
fn package_relative_paths_resolve_through_nesting() {
    let (package_path, file_1, nested_bytes) = build_nested_package();
    let resolver = default_resolver();
    // All of these resolutions hit the same outer archive; one cache scope
    // shares its parse across them.
    let _cache = ResolverCacheScope::new();

    // Direct entry.
    let asset = resolver
        .open_asset(&format!("{package_path}[file_1.stratac]"))
        .unwrap();
    assert_eq!(&asset.buffer().unwrap()[..], &file_1[..]);
    assert_eq!(asset.size(), file_1.len() as u64);

    // The nested archive as raw bytes.
    let asset = resolver
        .open_asset(&format!("{package_path}[nested.strataz]"))
        .unwrap();
    assert_eq!(&asset.buffer().unwrap()[..], &nested_bytes[..]);

    // An entry inside the nested archive.
    let asset = resolver
        .open_asset(&format!("{package_path}[nested.strataz[file_1.stratac]]"))
        .unwrap();
    assert_eq!(&asset.buffer().unwrap()[..], &file_1[..]);

    // Random-access reads hit the stated offsets without extraction.
    let mut window = [0u8; 16];
    let read = asset.read(&mut window, 100).unwrap();
    assert_eq!(&window[..read], &file_1[100..116]);

    // Missing entries are runtime errors.
    assert!(resolver.open_asset(&format!("{package_path}[missing.bin]")).is_err());
}

#[test]
fn nested_entry_offsets_compose() {
    let (package_path, _file_1, _nested) = build_nested_package();
    let outer = ZipArchive::open_path(&package_path).unwrap();
    let nested_info = outer.file_info("nested.strataz").unwrap();

    // Open the nested archive through an offset view and check its first
    // entry lands 64-byte aligned *within the nested archive*.
    let resolver = default_resolver();
    let nested_view = resolver
        .open_asset(&format!("{package_path}[nested.strataz]"))
        .unwrap();
    let nested_archive = ZipArchive::open(nested_view).unwrap();
    let inner_info = nested_archive.file_info("file_1.stratac").unwrap();
    assert_eq!(inner_info.data_offset, 64);

    // The inner entry's absolute position in the outer file is the nested
    // archive's offset plus the inner offset.
    let outer_bytes = std::fs::read(&package_path).unwrap();
    let absolute = (nested_info.data_offset + inner_info.data_offset) as usize;
    let inner_bytes = nested_archive.entry_bytes("file_1.stratac").unwrap();
    assert_eq!(
        &outer_bytes[absolute..absolute + inner_bytes.len()],
        &inner_bytes[..]
    );
}
