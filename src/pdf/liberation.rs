//! Liberation font substitution for PDF/A output
//!
//! PDF/A forbids unembedded fonts, so the standard 14 names are remapped
//! onto metrically compatible Liberation faces (Sans for Helvetica, Serif
//! for Times, Mono for Courier) registered under the standard names. Font
//! bytes are cached process-wide; generation-time access is read-heavy.
//!
//! Lookup order: the configured fonts directory, OS-specific font paths,
//! the local download cache, and finally (opt-in, `font-download` feature)
//! a pinned release archive fetched over HTTPS.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lazy_static::lazy_static;
use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::pdf::truetype::CustomFont;

/// Pinned Liberation release; a known-good, stable artifact
#[allow(dead_code)]
const ARCHIVE_URL: &str =
    "https://github.com/liberationfonts/liberation-fonts/files/7261482/liberation-fonts-ttf-2.1.5.tar.gz";

lazy_static! {
    static ref FONT_CACHE: RwLock<HashMap<&'static str, Arc<Vec<u8>>>> =
        RwLock::new(HashMap::new());
}

/// Liberation file carrying the face for a standard font name
fn liberation_file(standard: &str) -> &'static str {
    match standard {
        "Helvetica" => "LiberationSans-Regular.ttf",
        "Helvetica-Bold" => "LiberationSans-Bold.ttf",
        "Helvetica-Oblique" => "LiberationSans-Italic.ttf",
        "Helvetica-BoldOblique" => "LiberationSans-BoldItalic.ttf",
        "Times-Roman" => "LiberationSerif-Regular.ttf",
        "Times-Bold" => "LiberationSerif-Bold.ttf",
        "Times-Italic" => "LiberationSerif-Italic.ttf",
        "Times-BoldItalic" => "LiberationSerif-BoldItalic.ttf",
        "Courier" => "LiberationMono-Regular.ttf",
        "Courier-Bold" => "LiberationMono-Bold.ttf",
        "Courier-Oblique" => "LiberationMono-Italic.ttf",
        "Courier-BoldOblique" => "LiberationMono-BoldItalic.ttf",
        // Symbol and ZapfDingbats have no Liberation counterpart
        _ => "LiberationSans-Regular.ttf",
    }
}

/// Directory the auto-download extracts into
fn download_cache_dir() -> PathBuf {
    std::env::temp_dir().join("pdf-suite-fonts")
}

fn search_dirs(configured: Option<&Path>) -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Some(dir) = configured {
        dirs.push(dir.to_path_buf());
    }
    if cfg!(target_os = "linux") {
        dirs.push(PathBuf::from("/usr/share/fonts/truetype/liberation"));
        dirs.push(PathBuf::from("/usr/share/fonts/liberation-fonts"));
        dirs.push(PathBuf::from("/usr/share/fonts/liberation"));
    } else if cfg!(target_os = "macos") {
        dirs.push(PathBuf::from("/Library/Fonts"));
    } else if cfg!(target_os = "windows") {
        dirs.push(PathBuf::from(r"C:\Windows\Fonts"));
    }
    dirs.push(download_cache_dir());
    dirs
}

fn find_on_disk(file: &str, configured: Option<&Path>) -> Option<Vec<u8>> {
    for dir in search_dirs(configured) {
        let path = dir.join(file);
        if path.is_file() {
            match std::fs::read(&path) {
                Ok(bytes) => return Some(bytes),
                Err(e) => log::warn!("failed reading {}: {e}", path.display()),
            }
        }
    }
    None
}

/// Load the Liberation bytes substituting for a standard font name
pub fn load_substitute(
    standard: &str,
    configured: Option<&Path>,
    allow_download: bool,
) -> Result<Arc<Vec<u8>>> {
    let file = liberation_file(standard);
    if let Some(bytes) = FONT_CACHE.read().get(file) {
        return Ok(bytes.clone());
    }

    let bytes = match find_on_disk(file, configured) {
        Some(bytes) => bytes,
        None if allow_download => {
            fetch_archive(&download_cache_dir())?;
            find_on_disk(file, configured).ok_or_else(|| {
                Error::MissingResource(format!("{file} missing from downloaded archive"))
            })?
        }
        None => {
            return Err(Error::MissingResource(format!(
                "Liberation font {file} not found; install the liberation-fonts \
                 package, set the fonts directory, or enable font download"
            )))
        }
    };

    let bytes = Arc::new(bytes);
    FONT_CACHE.write().insert(file, bytes.clone());
    Ok(bytes)
}

/// Build the substitute [`CustomFont`] for a standard font name
///
/// The font is registered under the standard name so reference resolution
/// transparently picks it up.
pub fn substitute_font(
    standard: &str,
    configured: Option<&Path>,
    allow_download: bool,
) -> Result<CustomFont> {
    let bytes = load_substitute(standard, configured, allow_download)?;
    CustomFont::parse(standard, bytes.as_ref().clone())
}

#[cfg(feature = "font-download")]
fn fetch_archive(dir: &Path) -> Result<()> {
    log::info!("fetching Liberation fonts from {ARCHIVE_URL}");
    let response = reqwest::blocking::get(ARCHIVE_URL)
        .and_then(|r| r.error_for_status())
        .map_err(|e| Error::MissingResource(format!("font download failed: {e}")))?;
    let gz = response
        .bytes()
        .map_err(|e| Error::MissingResource(format!("font download failed: {e}")))?;

    use std::io::Read as _;
    let mut tar = Vec::new();
    flate2::read::GzDecoder::new(gz.as_ref())
        .read_to_end(&mut tar)
        .map_err(|e| Error::MissingResource(format!("font archive not gzip: {e}")))?;

    std::fs::create_dir_all(dir)?;
    let extracted = untar_ttfs(&tar, dir)?;
    if extracted == 0 {
        return Err(Error::MissingResource(
            "font archive contained no .ttf entries".to_string(),
        ));
    }
    Ok(())
}

#[cfg(not(feature = "font-download"))]
fn fetch_archive(_dir: &Path) -> Result<()> {
    Err(Error::MissingResource(
        "font download requested but the font-download feature is disabled".to_string(),
    ))
}

/// Walk ustar 512-byte records and extract `.ttf` entries into `dir`
///
/// The release archive is plain ustar; a full tar implementation is not
/// needed for four fixed files per family.
#[allow(dead_code)]
fn untar_ttfs(tar: &[u8], dir: &Path) -> Result<usize> {
    let mut offset = 0;
    let mut extracted = 0;
    while offset + 512 <= tar.len() {
        let header = &tar[offset..offset + 512];
        if header.iter().all(|b| *b == 0) {
            break;
        }
        let name_end = header[..100].iter().position(|b| *b == 0).unwrap_or(100);
        let name = String::from_utf8_lossy(&header[..name_end]).to_string();
        let size_field = String::from_utf8_lossy(&header[124..136]);
        let size = usize::from_str_radix(size_field.trim_matches(&['\0', ' '][..]), 8)
            .map_err(|_| Error::ParseFailure("bad tar size field".to_string()))?;

        let data_start = offset + 512;
        let data_end = data_start + size;
        if data_end > tar.len() {
            break;
        }
        if name.ends_with(".ttf") {
            let base = name.rsplit('/').next().unwrap_or(&name);
            std::fs::write(dir.join(base), &tar[data_start..data_end])?;
            extracted += 1;
        }
        // Entries are padded to the next 512-byte boundary
        offset = data_start + size.div_ceil(512) * 512;
    }
    Ok(extracted)
}
