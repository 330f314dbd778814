use std::{env, process::ExitCode};

use strata::{Layer, ZipArchive, default_resolver, package_root_layer_path};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();
    match args.get(1).map(String::as_str) {
        Some("dump") if args.len() == 3 => dump(&args[2]),
        Some("zipinfo") if args.len() == 3 => zipinfo(&args[2]),
        _ => {
            eprintln!("usage: strata dump <layer>");
            eprintln!("       strata zipinfo <package>");
            ExitCode::FAILURE
        }
    }
}

/// Opens a layer of any registered format and prints its text form.
fn dump(path: &str) -> ExitCode {
    let Some(layer) = Layer::open_as_anonymous(path, false, "strata-cli") else {
        eprintln!("error: cannot open layer {path:?}");
        return ExitCode::FAILURE;
    };
    match layer.export_to_string() {
        Ok(text) => {
            print!("{text}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

/// Lists a package's entries with their offsets and sizes.
fn zipinfo(path: &str) -> ExitCode {
    let asset = match default_resolver().open_asset(path) {
        Ok(asset) => asset,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };
    let archive = match ZipArchive::open(asset) {
        Ok(archive) => archive,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };
    println!("{:>10}  {:>10}  {:>8}  name", "offset", "size", "crc32");
    for name in archive.file_names() {
        let info = archive.file_info(name).expect("listed entry has info");
        println!(
            "{:>10}  {:>10}  {:08x}  {}{}",
            info.data_offset,
            info.size,
            info.crc32,
            name,
            if info.compression_method != 0 { "  (compressed)" } else { "" },
        );
    }
    match package_root_layer_path(path) {
        Ok(root) => println!("root layer: {root}"),
        Err(err) => eprintln!("warning: {err}"),
    }
    ExitCode::SUCCESS
}
