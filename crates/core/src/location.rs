//! Conversion between `file://` URIs and local paths.
//!
//! Paths are handled as raw bytes on unix, so names that are not valid
//! UTF-8 survive the round trip.

use std::borrow::Cow;
use std::path::{Path, PathBuf};

const FILE_SCHEME: &str = "file://";

/// Resolves a `file://` URI or plain path to a local path.
///
/// URIs are percent-decoded; plain paths are taken as they are.
pub fn to_path(uri: &str) -> PathBuf {
    let Some(rest) = uri.strip_prefix(FILE_SCHEME) else {
        return PathBuf::from(uri);
    };

    // Drop an authority such as `localhost`.
    let path = match rest.find('/') {
        Some(0) => rest,
        Some(index) => &rest[index..],
        None => rest,
    };

    path_from_bytes(urlencoding::decode_binary(path.as_bytes()))
}

/// Builds a `file://` URI for a local path.
pub fn to_uri(path: &Path) -> String {
    let bytes = path_bytes(path);
    let encoded: Vec<Cow<'_, str>> = bytes
        .split(|b| *b == b'/')
        .map(urlencoding::encode_binary)
        .collect();
    format!("{}{}", FILE_SCHEME, encoded.join("/"))
}

#[cfg(unix)]
fn path_from_bytes(bytes: Cow<'_, [u8]>) -> PathBuf {
    use std::ffi::OsString;
    use std::os::unix::ffi::OsStringExt;

    PathBuf::from(OsString::from_vec(bytes.into_owned()))
}

#[cfg(not(unix))]
fn path_from_bytes(bytes: Cow<'_, [u8]>) -> PathBuf {
    PathBuf::from(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(unix)]
fn path_bytes(path: &Path) -> Cow<'_, [u8]> {
    use std::os::unix::ffi::OsStrExt;

    Cow::Borrowed(path.as_os_str().as_bytes())
}

#[cfg(not(unix))]
fn path_bytes(path: &Path) -> Cow<'_, [u8]> {
    match path.to_string_lossy() {
        Cow::Borrowed(s) => Cow::Borrowed(s.as_bytes()),
        Cow::Owned(s) => Cow::Owned(s.into_bytes()),
    }
}
