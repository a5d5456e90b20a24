//! Choosing a dataset file from the manifest, verifying it and unpacking it
//! to a raw SQLite image.

use std::io::{Cursor, Read as _};

use psm_core::sync::{Manifest, ManifestFile};
use reqwest::Url;
use sha2::{Digest as _, Sha256};
use strum::IntoStaticStr;

use crate::{Error, Result};

const SQLITE_MAGIC: &[u8] = b"SQLite format 3\0";

/// How a published dataset file is packed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum Format {
  Brotli,
  Gzip,
  Plain,
  Zip,
}

impl Format {
  /// Preference order when several forms are published.
  const PREFERENCE: [Format; 4] = [Format::Brotli, Format::Gzip, Format::Plain, Format::Zip];

  fn suffix(self) -> &'static str {
    match self {
      Format::Brotli => ".sqlite.br",
      Format::Gzip => ".sqlite.gz",
      Format::Plain => ".sqlite",
      Format::Zip => ".sqlite.zip",
    }
  }

  pub fn label(self) -> &'static str { self.into() }
}

/// Pick the preferred file: brotli, then gzip, then plain, then zip.
pub fn select_file(manifest: &Manifest) -> Result<(&ManifestFile, Format)> {
  Format::PREFERENCE
    .into_iter()
    .find_map(|format| {
      manifest
        .files
        .iter()
        .find(|f| f.location().is_some_and(|l| path_of(l).ends_with(format.suffix())))
        .map(|file| (file, format))
    })
    .ok_or_else(|| Error::Manifest("no usable dataset file listed".into()))
}

/// Strip any query or fragment so the suffix check sees the file name.
fn path_of(location: &str) -> &str {
  location.split(['?', '#']).next().unwrap_or(location)
}

/// Resolve a file location the way a browser would: `base_url` (default
/// `./`) against the manifest URL, then the location against that.
pub fn resolve_file_url(manifest_url: &str, base_url: Option<&str>, location: &str) -> Result<String> {
  let manifest = Url::parse(manifest_url)
    .map_err(|e| Error::Manifest(format!("bad manifest URL {manifest_url}: {e}")))?;
  let base = manifest
    .join(base_url.filter(|b| !b.trim().is_empty()).unwrap_or("./"))
    .map_err(|e| Error::Manifest(format!("bad base URL: {e}")))?;
  let file = base
    .join(location)
    .map_err(|e| Error::Manifest(format!("bad file location {location}: {e}")))?;
  Ok(file.into())
}

pub fn sha256_hex(data: &[u8]) -> String { hex::encode(Sha256::digest(data)) }

pub fn verify_sha256(data: &[u8], expected: &str) -> Result<()> {
  let actual = sha256_hex(data);
  if actual.eq_ignore_ascii_case(expected.trim()) {
    Ok(())
  } else {
    Err(Error::Checksum { expected: expected.trim().to_owned(), actual })
  }
}

/// Unpack `data` and check that the result is a SQLite image.
pub fn decompress(format: Format, data: Vec<u8>) -> Result<Vec<u8>> {
  let failed = |message: String| Error::Decompress { format: format.label(), message };

  let image = match format {
    Format::Plain => data,
    Format::Brotli => {
      let mut out = Vec::with_capacity(data.len() * 4);
      brotli::Decompressor::new(data.as_slice(), 64 * 1024)
        .read_to_end(&mut out)
        .map_err(|e| failed(e.to_string()))?;
      out
    }
    Format::Gzip => {
      let mut out = Vec::with_capacity(data.len() * 4);
      flate2::read::GzDecoder::new(data.as_slice())
        .read_to_end(&mut out)
        .map_err(|e| failed(e.to_string()))?;
      out
    }
    Format::Zip => unzip_sqlite(data).map_err(|e| failed(e.to_string()))?,
  };

  if !image.starts_with(SQLITE_MAGIC) {
    return Err(failed("result is not a SQLite database".into()));
  }
  Ok(image)
}

/// The first `.sqlite` entry of the archive, else its first file.
fn unzip_sqlite(data: Vec<u8>) -> zip::result::ZipResult<Vec<u8>> {
  let mut archive = zip::ZipArchive::new(Cursor::new(data))?;

  let mut chosen = None;
  for index in 0..archive.len() {
    let entry = archive.by_index(index)?;
    if !entry.is_file() {
      continue;
    }
    if entry.name().ends_with(".sqlite") {
      chosen = Some(index);
      break;
    }
    chosen.get_or_insert(index);
  }
  let Some(index) = chosen else {
    return Err(zip::result::ZipError::FileNotFound);
  };

  let mut entry = archive.by_index(index)?;
  let mut out = Vec::with_capacity(entry.size() as usize);
  entry.read_to_end(&mut out)?;
  Ok(out)
}
