//! End-to-end layer round trips through the text, crate, and package
//! formats.

use pretty_assertions::assert_eq;
use strata::{
    AttributeSpec, Layer, PrimSpec, ScenePath, SpecType, Token, Value, attribute_at_path, prim_at_path,
};

fn p(text: &str) -> ScenePath {
    ScenePath::from_string(text)
}

fn temp_path(name: &str) -> String {
    let dir = tempfile::tempdir().expect("temp dir");
    // Keep the directory alive for the process; tests read the file back.
    let path = dir.path().join(name).to_str().unwrap().to_owned();
    std::mem::forget(dir);
    path
}

/// Builds the canonical one-prim, one-attribute layer.
fn build_hello_layer(identifier: &str) -> strata::LayerHandle {
    let layer = Layer::create_new(identifier).expect("fresh identifier");
    layer.create_spec(&p("/Hello"), SpecType::Prim);
    let prim = PrimSpec::new(&layer, p("/Hello"));
    let attr = AttributeSpec::create(&prim, Token::new("size"), Token::new("float")).unwrap();
    attr.set_default_value(Value::from(1.0f32));
    layer
}

#[test]
fn text_round_trip_preserves_values_and_bytes() {
    let path = temp_path("hello.strata");
    let layer = build_hello_layer(&path);
    layer.set_time_sample(&p("/Hello.size"), 5.0, Value::from(2.5f32));
    assert!(layer.is_dirty());
    assert!(layer.save(false), "save must succeed");
    assert!(!layer.is_dirty(), "saving cleans the layer");

    let reopened = Layer::open_as_anonymous(&path, false, "roundtrip").expect("reopen");
    let prim = prim_at_path(&reopened, &p("/Hello")).expect("prim survives the round trip");
    let attr = prim.attribute(Token::new("size")).expect("attribute survives");
    assert_eq!(attr.get_default_value(), Value::from(1.0f32));
    assert_eq!(attr.type_name(), Token::new("float"));
    assert_eq!(attr.time_samples(), vec![5.0]);
    assert_eq!(attr.query_time_sample(5.0), Some(Value::from(2.5f32)));

    // The export is byte-stable across the round trip.
    let original_text = layer.export_to_string().unwrap();
    let reopened_text = reopened.export_to_string().unwrap();
    assert_eq!(original_text, reopened_text);
    assert!(original_text.starts_with("#strata 1.0"));
}

#[test]
fn crate_round_trip_preserves_time_samples() {
    let path = temp_path("anim.stratac");
    let layer = build_hello_layer(&path);
    let attr_path = p("/Hello.size");
    layer.set_time_sample(&attr_path, 1.0, Value::from(10.0f32));
    layer.set_time_sample(&attr_path, 2.0, Value::from(20.0f32));
    assert!(layer.save(false));

    let reopened = Layer::open_as_anonymous(&path, false, "crate-roundtrip").expect("reopen");
    assert_eq!(reopened.file_format_id(), "strata_crate");
    assert_eq!(reopened.list_time_samples_for_path(&attr_path), vec![1.0, 2.0]);
    assert_eq!(reopened.query_time_sample(&attr_path, 2.0), Some(Value::from(20.0f32)));
    let attr = attribute_at_path(&reopened, &attr_path).unwrap();
    assert_eq!(attr.get_default_value(), Value::from(1.0f32));
}

#[test]
fn package_export_reads_back_through_the_root_layer() {
    let anon = Layer::create_anonymous("package-export");
    anon.create_spec(&p("/Packaged"), SpecType::Prim);
    anon.set_field(&p("/Packaged"), Token::new("flag"), Value::from(true));

    let package = temp_path("bundle.strataz");
    assert!(anon.export(&package, None));

    let root = strata::package_root_layer_path(&package).unwrap();
    assert!(root.ends_with(".stratac"), "package roots are crate layers, got {root}");

    let reopened = Layer::open_as_anonymous(&package, false, "package-roundtrip").expect("reopen");
    assert_eq!(reopened.get_field(&p("/Packaged"), Token::new("flag")), Value::from(true));
}

#[test]
fn metadata_only_reads_keep_just_the_pseudo_root() {
    let path = temp_path("meta.strata");
    let layer = build_hello_layer(&path);
    layer.set_default_prim(&p("/Hello"));
    assert!(layer.save(false));

    let skimmed = Layer::open_as_anonymous(&path, true, "metadata-only").expect("reopen");
    assert_eq!(skimmed.default_prim(), p("/Hello"), "pseudo-root fields survive");
    assert!(!skimmed.has_spec(&p("/Hello")), "prim records are skipped");
}

#[test]
fn reload_refuses_dirty_layers_unless_forced() {
    let path = temp_path("reload.strata");
    let layer = build_hello_layer(&path);
    assert!(layer.save(false));

    layer.set_field(&p("/Hello"), Token::new("extra"), Value::from(1i32));
    assert!(layer.is_dirty());
    assert!(!layer.reload(false), "dirty layers refuse an unforced reload");
    assert!(layer.has_field(&p("/Hello"), Token::new("extra")));

    assert!(layer.reload(true));
    assert!(!layer.has_field(&p("/Hello"), Token::new("extra")), "forced reload drops edits");
    assert!(!layer.is_dirty());
}

#[test]
fn transfer_content_replaces_data_but_keeps_identity() {
    let source = Layer::create_anonymous("transfer-source");
    source.create_spec(&p("/FromSource"), SpecType::Prim);
    let target = Layer::create_anonymous("transfer-target");
    target.create_spec(&p("/Old"), SpecType::Prim);

    let identifier = target.identifier();
    assert!(target.transfer_content(&source));
    assert_eq!(target.identifier(), identifier);
    assert!(target.has_spec(&p("/FromSource")));
    assert!(!target.has_spec(&p("/Old")));
    // The source is untouched.
    assert!(source.has_spec(&p("/FromSource")));
}
