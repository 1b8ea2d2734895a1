//! Build script for genresort.
//!
//! Copies the `.env.example` template next to where `config::load_env`
//! looks for `.env`, so a fresh install has something to start from.

use std::{env, fs, path::PathBuf};

/// Copies `<crate root>/.env.example` into the local data directory:
/// - Linux: `~/.local/share/genresort/.env.example`
/// - macOS: `~/Library/Application Support/genresort/.env.example`
/// - Windows: `%LOCALAPPDATA%/genresort/.env.example`
///
/// A missing template only produces a cargo warning. Failing to create the
/// directory or write the file fails the build.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=.env.example");

    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR")?);
    let template = manifest_dir.join(".env.example");

    let mut out_dir = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
    out_dir.push("genresort");
    fs::create_dir_all(&out_dir)?;

    if template.is_file() {
        fs::copy(&template, out_dir.join(".env.example"))?;
    } else {
        println!(
            "cargo:warning=.env.example not found at {}",
            template.display()
        );
    }

    Ok(())
}
