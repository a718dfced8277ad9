//! Archive codecs.
//!
//! Reading: zip goes through the `zip` crate; tar.gz is gunzipped with
//! `flate2` and walked header by header. Writing uses `zip` and
//! `tar::Builder` respectively. Both readers return a flat [`FileMap`] with
//! a single shared top-level folder stripped, and stop decompressing once
//! the expanded contents pass a byte limit.

use std::fmt;
use std::io::{Cursor, Read, Write};
use std::str::FromStr;

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use tracing::{debug, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::{FileMap, PluginFile};

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("unsupported archive type: {0:?} (expected .zip, .tar.gz or .tgz)")]
    UnsupportedFormat(String),

    #[error("gzip decompression failed: {0}")]
    Gzip(#[source] std::io::Error),

    #[error("invalid zip archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("archive is {size} bytes, over the {limit} byte limit")]
    TooLarge { size: u64, limit: u64 },

    #[error("archive expands past the {limit} byte limit")]
    ExpandedTooLarge { limit: u64 },

    #[error("failed to write archive: {0}")]
    Write(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Format
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ArchiveFormat {
    #[default]
    Zip,
    TarGz,
}

impl ArchiveFormat {
    /// Detect the format from a file name's extension (case-insensitive).
    pub fn from_file_name(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".zip") {
            Some(Self::Zip)
        } else if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Some(Self::TarGz)
        } else {
            None
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Zip => ".zip",
            Self::TarGz => ".tar.gz",
        }
    }

    /// `name` without its archive extension, if it has one.
    pub fn strip_extension(name: &str) -> &str {
        let lower = name.to_ascii_lowercase();
        for ext in [".tar.gz", ".tgz", ".zip"] {
            if lower.ends_with(ext) {
                return &name[..name.len() - ext.len()];
            }
        }
        name
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Zip => "zip",
            Self::TarGz => "tar.gz",
        };
        f.write_str(s)
    }
}

impl FromStr for ArchiveFormat {
    type Err = ArchiveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().trim_start_matches('.').to_ascii_lowercase().as_str() {
            "zip" => Ok(Self::Zip),
            "tar.gz" | "tgz" | "targz" => Ok(Self::TarGz),
            _ => Err(ArchiveError::UnsupportedFormat(s.to_owned())),
        }
    }
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// Files of an archive after root-folder stripping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedArchive {
    pub files: FileMap,
    /// The shared top-level folder that was stripped, if any.
    pub root_dir: Option<String>,
}

/// Expanded-size cap used by the readers that take no explicit limit.
pub const DEFAULT_EXPANDED_LIMIT: u64 = 256 * 1024 * 1024;

/// Decode an archive whose format is chosen by `file_name`'s extension.
pub fn read_archive(file_name: &str, bytes: &[u8]) -> Result<ExtractedArchive, ArchiveError> {
    read_archive_limited(file_name, bytes, DEFAULT_EXPANDED_LIMIT)
}

/// Like [`read_archive`], failing once the decompressed contents pass
/// `limit` bytes.
pub fn read_archive_limited(
    file_name: &str,
    bytes: &[u8],
    limit: u64,
) -> Result<ExtractedArchive, ArchiveError> {
    match ArchiveFormat::from_file_name(file_name) {
        Some(ArchiveFormat::Zip) => read_zip_limited(bytes, limit),
        Some(ArchiveFormat::TarGz) => read_tar_gz_limited(bytes, limit),
        None => Err(ArchiveError::UnsupportedFormat(file_name.to_owned())),
    }
}

/// Decode a zip archive. Entries that fail to decompress are skipped.
pub fn read_zip(bytes: &[u8]) -> Result<ExtractedArchive, ArchiveError> {
    read_zip_limited(bytes, DEFAULT_EXPANDED_LIMIT)
}

/// Decode a zip archive whose entries together expand to at most `limit`
/// bytes.
pub fn read_zip_limited(bytes: &[u8], limit: u64) -> Result<ExtractedArchive, ArchiveError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    let mut entries = Vec::with_capacity(archive.len());
    let mut remaining = limit;

    for i in 0..archive.len() {
        let mut entry = match archive.by_index(i) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(index = i, error = %e, "skipping unreadable zip entry");
                continue;
            }
        };
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().replace('\\', "/");
        let hint = entry.size().min(remaining);
        let mut data = Vec::with_capacity(usize::try_from(hint).unwrap_or(0));
        if let Err(e) = entry
            .by_ref()
            .take(remaining.saturating_add(1))
            .read_to_end(&mut data)
        {
            warn!(entry = %name, error = %e, "skipping undecodable zip entry");
            continue;
        }
        let read = data.len() as u64;
        if read > remaining {
            return Err(ArchiveError::ExpandedTooLarge { limit });
        }
        remaining -= read;
        entries.push((name, String::from_utf8_lossy(&data).into_owned()));
    }

    Ok(strip_common_root(entries))
}

/// Decode a gzip-compressed tar archive.
pub fn read_tar_gz(bytes: &[u8]) -> Result<ExtractedArchive, ArchiveError> {
    read_tar_gz_limited(bytes, DEFAULT_EXPANDED_LIMIT)
}

/// Decode a gzip-compressed tar archive whose tar stream is at most
/// `limit` bytes.
pub fn read_tar_gz_limited(bytes: &[u8], limit: u64) -> Result<ExtractedArchive, ArchiveError> {
    let mut tar = Vec::new();
    GzDecoder::new(bytes)
        .take(limit.saturating_add(1))
        .read_to_end(&mut tar)
        .map_err(ArchiveError::Gzip)?;
    if tar.len() as u64 > limit {
        return Err(ArchiveError::ExpandedTooLarge { limit });
    }

    let entries = walk_tar(&tar)
        .into_iter()
        .filter(|e| !e.is_dir)
        .map(|e| (e.name, e.content))
        .collect();
    Ok(strip_common_root(entries))
}

const BLOCK: usize = 512;

#[derive(Debug)]
struct TarEntry {
    name: String,
    content: String,
    is_dir: bool,
}

/// Walk raw tar blocks.
///
/// Understands USTAR `prefix` + `name`, GNU long names (`L`), and pax path
/// records (`x`). Stops at the first all-zero header or when the data runs
/// out.
fn walk_tar(bytes: &[u8]) -> Vec<TarEntry> {
    let mut entries = Vec::new();
    let mut offset = 0;
    let mut next_name: Option<String> = None;

    while offset + BLOCK <= bytes.len() {
        let header = &bytes[offset..offset + BLOCK];
        if header.iter().all(|&b| b == 0) {
            break;
        }

        let size = parse_octal(&header[124..136]);
        let type_flag = header[156];
        offset += BLOCK;

        let end = offset.saturating_add(size).min(bytes.len());
        if end - offset < size {
            warn!(expected = size, available = end - offset, "tar entry truncated");
        }
        let data = &bytes[offset..end];
        offset = offset.saturating_add(size.div_ceil(BLOCK) * BLOCK);

        match type_flag {
            b'L' => {
                next_name = Some(c_string(data));
                continue;
            }
            b'x' => {
                if let Some(path) = pax_path(data) {
                    next_name = Some(path);
                }
                continue;
            }
            b'g' => continue,
            _ => {}
        }

        let name = next_name.take().unwrap_or_else(|| header_path(header));
        let name = name.strip_prefix("./").unwrap_or(&name).to_owned();
        if name.is_empty() {
            continue;
        }
        let is_dir = type_flag == b'5' || name.ends_with('/');
        entries.push(TarEntry {
            content: String::from_utf8_lossy(data).into_owned(),
            name,
            is_dir,
        });
    }

    entries
}

fn header_path(header: &[u8]) -> String {
    let name = c_string(&header[0..100]);
    // Only POSIX ustar headers carry a prefix field; old GNU headers reuse
    // those bytes for timestamps.
    let is_posix = &header[257..263] == b"ustar\0";
    let prefix = if is_posix {
        c_string(&header[345..500])
    } else {
        String::new()
    };
    if prefix.is_empty() {
        name
    } else {
        format!("{prefix}/{name}")
    }
}

fn c_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

fn parse_octal(field: &[u8]) -> usize {
    let text = c_string(field);
    usize::from_str_radix(text.trim(), 8).unwrap_or(0)
}

/// Extract the `path` record from a pax extended header.
fn pax_path(data: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(data);
    text.lines().find_map(|record| {
        let (_len, kv) = record.split_once(' ')?;
        kv.strip_prefix("path=").map(str::to_owned)
    })
}

/// Layout directories that are never mistaken for a wrapping root folder.
const LAYOUT_DIRS: [&str; 5] = ["skills", "agents", "commands", "hooks", ".claude"];

/// Strip a single top-level folder shared by every entry.
///
/// The folder is detected, not assumed: it must prefix every entry, and a
/// known layout directory is never stripped.
fn strip_common_root(entries: Vec<(String, String)>) -> ExtractedArchive {
    let entries: Vec<(String, String)> = entries
        .into_iter()
        .map(|(name, content)| {
            let name = name.strip_prefix("./").unwrap_or(&name).to_owned();
            (name, content)
        })
        .filter(|(name, _)| !name.is_empty() && !name.ends_with('/'))
        .collect();

    let root = entries.first().and_then(|(first, _)| {
        let (candidate, _) = first.split_once('/')?;
        let prefix = format!("{candidate}/");
        let shared = entries.iter().all(|(name, _)| name.starts_with(&prefix));
        (shared && !LAYOUT_DIRS.contains(&candidate)).then(|| candidate.to_owned())
    });

    let files = match &root {
        Some(root) => {
            debug!(root = %root, "stripping archive root folder");
            let cut = root.len() + 1;
            entries
                .into_iter()
                .map(|(name, content)| (name[cut..].to_owned(), content))
                .filter(|(name, _)| !name.is_empty())
                .collect()
        }
        None => entries.into_iter().collect(),
    };

    ExtractedArchive {
        files,
        root_dir: root,
    }
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

/// Encode `files` in `format`. Tar archives wrap everything in `root/`.
pub fn write_archive(
    format: ArchiveFormat,
    root: &str,
    files: &[PluginFile],
) -> Result<Vec<u8>, ArchiveError> {
    match format {
        ArchiveFormat::Zip => write_zip(files),
        ArchiveFormat::TarGz => write_tar_gz(root, files),
    }
}

/// Deflate-compressed zip with entries at the archive root.
pub fn write_zip(files: &[PluginFile]) -> Result<Vec<u8>, ArchiveError> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for file in files {
        writer.start_file(file.path.as_str(), options)?;
        writer.write_all(file.content.as_bytes())?;
    }
    Ok(writer.finish()?.into_inner())
}

/// Gzip-compressed USTAR archive with every entry under `root/`.
pub fn write_tar_gz(root: &str, files: &[PluginFile]) -> Result<Vec<u8>, ArchiveError> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for file in files {
        let mut header = tar::Header::new_ustar();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(file.content.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(0);
        let path = if root.is_empty() {
            file.path.clone()
        } else {
            format!("{root}/{}", file.path)
        };
        builder.append_data(&mut header, path, file.content.as_bytes())?;
    }
    let encoder = builder.into_inner()?;
    Ok(encoder.finish()?)
}
