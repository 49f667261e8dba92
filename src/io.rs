//! Reading and writing of RON files.

use anyhow::{Context, Result, bail};
use serde::{Serialize, de::DeserializeOwned};
use std::{
    fs::{self, File},
    io::{self, BufReader, Read, Write},
    path::Path,
};

/// Creates any directories missing in order for the given file path to be
/// valid.
pub fn create_parent_directories_if_missing(file_path: impl AsRef<Path>) -> io::Result<()> {
    match file_path.as_ref().parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

/// Reads and returns the content of the specified text file.
pub fn read_text_file(file_path: impl AsRef<Path>) -> io::Result<String> {
    let file = File::open(file_path)?;
    let mut text = String::new();
    let _ = BufReader::new(file).read_to_string(&mut text)?;
    Ok(text)
}

/// Writes the given string as a text file with the specified path, regardless
/// of whether the file already exists.
pub fn write_text_file(text: &str, output_file_path: impl AsRef<Path>) -> io::Result<()> {
    create_parent_directories_if_missing(&output_file_path)?;
    let mut file = File::create(output_file_path)?;
    write!(&mut file, "{text}")
}

/// Reads the RON (Rusty Object Notation) file at the given path and
/// deserializes the contents into an object of type `T`.
///
/// # Errors
/// Returns an error if the file can not be read or does not hold a valid `T`.
pub fn parse_ron_file<T: DeserializeOwned>(file_path: impl AsRef<Path>) -> Result<T> {
    let file_path = file_path.as_ref();

    let text = read_text_file(file_path)
        .with_context(|| format!("Could not open {}", file_path.display()))?;

    ron::from_str::<T>(&text).with_context(|| format!("Invalid syntax in {}", file_path.display()))
}

/// Serializes the given value of type `T` to RON (Rusty Object Notation)
/// and writes it to the given path.
///
/// # Errors
/// Returns an error if serialization or writing fails, or if a file already
/// exists at the path and `overwrite` is `false`.
pub fn write_ron_file<T: Serialize>(
    value: &T,
    output_file_path: impl AsRef<Path>,
    overwrite: bool,
) -> Result<()> {
    let output_file_path = output_file_path.as_ref();
    if !overwrite && output_file_path.exists() {
        bail!("File {} already exists", output_file_path.display());
    }
    let text = ron::ser::to_string_pretty(value, ron::ser::PrettyConfig::default())?;
    write_text_file(&text, output_file_path)
        .with_context(|| format!("Could not write {}", output_file_path.display()))
}
