//! Utility functions for escaping, naming and durable file writes

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Characters that are not allowed in category and title directory names
const FORBIDDEN_DIR_CHARS: &[char] = &['/', '\\', '?', '*', '"', '<', '>', '|', ':', '.'];

/// Escape a subscription id for use in a feed page path
///
/// Only `%`, `?`, `&`, `=` and `#` are escaped. `%` goes first so the escapes
/// introduced for the other characters are not escaped a second time. An unescaped `#`
/// would start a URL fragment and cut the page parameters off the request.
///
/// # Examples
///
/// ```
/// use reader_export::utils::escape_feed_id;
///
/// assert_eq!(
///     escape_feed_id("feed/http://example.com/rss?a=1&b=%20"),
///     "feed/http://example.com/rss%3Fa%3D1%26b%3D%2520"
/// );
/// ```
#[must_use]
pub fn escape_feed_id(id: &str) -> String {
    id.replace('%', "%25")
        .replace('?', "%3F")
        .replace('&', "%26")
        .replace('=', "%3D")
        .replace('#', "%23")
}

/// Replace characters that are invalid in file names with `_`
///
/// # Examples
///
/// ```
/// use reader_export::utils::sanitize_dir_name;
///
/// assert_eq!(sanitize_dir_name("News: Tech/Science"), "News_ Tech_Science");
/// ```
#[must_use]
pub fn sanitize_dir_name(name: &str) -> String {
    name.chars()
        .map(|c| if FORBIDDEN_DIR_CHARS.contains(&c) { '_' } else { c })
        .collect()
}

/// Encode a subscription id into a single path component
///
/// Form encoding: letters, digits and `_ . -` stay, a space becomes `+`, everything else
/// is `%XX`. Trees written by earlier exporters use the same names, so they resume.
///
/// # Examples
///
/// ```
/// use reader_export::utils::encode_dir_name;
///
/// assert_eq!(encode_dir_name("feed/http://a.com/~me x"), "feed%2Fhttp%3A%2F%2Fa.com%2F%7Eme+x");
/// ```
#[must_use]
pub fn encode_dir_name(id: &str) -> String {
    // `encode` leaves `~` alone and turns a space into `%20`
    urlencoding::encode(id)
        .replace('~', "%7E")
        .replace("%20", "+")
}

/// Return the text between the first `<tag>` and the following `</tag>`
///
/// `None` when either tag is missing; an empty element yields `Some("")`.
#[must_use]
pub fn extract_tag<'a>(content: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");

    let start = content.find(&open)? + open.len();
    let len = content[start..].find(&close)?;
    Some(&content[start..start + len])
}

/// Gzip-compress a buffer
pub fn gzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

/// Decompress a gzip buffer
pub fn gunzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// Write a file so that readers see either the old or the new contents
///
/// Data goes to `<name>.tmp` first, is synced, and then renamed over the target.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let temp_path = temp_path_for(path);
    {
        let mut file = tokio::fs::File::create(&temp_path).await?;
        file.write_all(contents).await?;
        file.sync_all().await?;
    }
    tokio::fs::rename(&temp_path, path).await
}

/// Gzip `data` and write it atomically to `path`
pub async fn write_gz_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let compressed = gzip(data)?;
    write_atomic(path, &compressed).await
}

/// Read and decompress a gzip file
pub async fn read_gz(path: &Path) -> std::io::Result<Vec<u8>> {
    let raw = tokio::fs::read(path).await?;
    gunzip(&raw)
}

/// Create an empty file if it does not exist yet
pub async fn touch(path: &Path) -> std::io::Result<()> {
    tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    Ok(())
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
