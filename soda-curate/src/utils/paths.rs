//! Archive-relative path handling
//!
//! Paths are archive-relative and always use `/`. A file inside a nested
//! archive is addressed as `outer.zip:inner/path.csv`.

/// Separator between an archive path and a member path
pub const ARCHIVE_MEMBER_SEPARATOR: char = ':';

/// Operating-system clutter that never counts as source data
const JUNK_NAMES: [&str; 4] = ["__MACOSX", ".DS_Store", "Thumbs.db", "desktop.ini"];

/// Normalize a relative path
///
/// Backslashes become `/`, `.` segments and empty segments are dropped, and a
/// leading `/` is removed. `..` is kept as-is. The archive member part, if any,
/// is normalized the same way.
pub fn normalize_path(path: &str) -> String {
    match split_archive_member(path) {
        Some((archive, member)) => format!(
            "{}{}{}",
            normalize_segments(archive),
            ARCHIVE_MEMBER_SEPARATOR,
            normalize_segments(member)
        ),
        None => normalize_segments(path),
    }
}

fn normalize_segments(path: &str) -> String {
    path.trim()
        .replace('\\', "/")
        .split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Split `outer.zip:inner/path` into its archive and member parts
///
/// Windows drive prefixes (`C:\`) are not treated as archive separators.
pub fn split_archive_member(path: &str) -> Option<(&str, &str)> {
    let idx = path.find(ARCHIVE_MEMBER_SEPARATOR)?;
    let (archive, rest) = path.split_at(idx);
    if archive.len() == 1 && archive.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    if !archive.to_ascii_lowercase().ends_with(".zip") {
        return None;
    }
    Some((archive, &rest[1..]))
}

/// Whether a path is OS clutter (resource forks, thumbnails, folder settings)
pub fn is_junk_path(path: &str) -> bool {
    path.replace('\\', "/")
        .split(['/', ARCHIVE_MEMBER_SEPARATOR])
        .any(|segment| JUNK_NAMES.contains(&segment) || segment.starts_with("._"))
}

/// Final path component
pub fn file_name(path: &str) -> &str {
    path.rsplit(['/', '\\', ARCHIVE_MEMBER_SEPARATOR])
        .next()
        .unwrap_or(path)
}
