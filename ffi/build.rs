//! Generate `include/client_request.h` from the `extern "C"` surface.

use std::{env, path::PathBuf};

fn main() {
    println!("cargo:rerun-if-changed=src");

    let crate_dir = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(err) => {
            println!("cargo:warning=CARGO_MANIFEST_DIR unavailable: {err}");
            return;
        }
    };
    let header = crate_dir.join("include").join("client_request.h");

    let config = cbindgen::Config {
        language: cbindgen::Language::C,
        include_guard: Some("CLIENT_REQUEST_H".to_string()),
        ..cbindgen::Config::default()
    };
    match cbindgen::Builder::new()
        .with_crate(&crate_dir)
        .with_config(config)
        .generate()
    {
        Ok(bindings) => {
            if let Err(err) = std::fs::create_dir_all(crate_dir.join("include")) {
                println!("cargo:warning=cannot create include dir: {err}");
                return;
            }
            bindings.write_to_file(header);
        }
        Err(err) => println!("cargo:warning=header generation failed: {err}"),
    }
}
