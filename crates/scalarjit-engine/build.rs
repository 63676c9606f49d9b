//! Build script for the runtime support module
//!
//! Builds the numeric helper library from IR and writes it to
//! `$OUT_DIR/runtime_functions.json`, which the engine embeds and decodes
//! once per process.

use std::env;
use std::fs;
use std::path::Path;

fn main() {
    let out_dir = env::var("OUT_DIR").expect("OUT_DIR is set by cargo");
    let output_path = Path::new(&out_dir).join("runtime_functions.json");

    let library = scalarjit_ir::build_library();
    let bytes = serde_json::to_vec(&library).expect("runtime library serializes");
    fs::write(&output_path, bytes).expect("failed to write runtime library");

    println!("cargo:rerun-if-changed=build.rs");
}
