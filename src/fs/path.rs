//! Translation of user-visible paths into store keys.
//!
//! Store keys are absolute, slash-separated and carry no scheme. Users may
//! additionally write paths relative to a working directory or to the home
//! alias `~~`.

use crate::errors::{FsError, FsResult};

/// Filesystem scheme, stripped from incoming paths.
pub const SCHEME: &str = "manta";

/// Alias for the home directory.
pub const HOME_ALIAS: &str = "~~";

/// Resolve `path` into a store key.
///
/// Absolute paths resolve to themselves, `~~/rest` resolves under `home`, and
/// anything else is joined onto `working_dir`. A relative path with no working
/// directory is a caller error.
pub fn resolve(path: &str, working_dir: Option<&str>, home: &str) -> FsResult<String> {
    let stripped = strip_scheme(path);
    if stripped.is_empty() {
        return Err(FsError::InvalidPath(path.to_string()));
    }

    if stripped.starts_with('/') {
        return Ok(normalize(stripped));
    }

    if let Some(rest) = home_relative(stripped) {
        return Ok(join(home, rest));
    }

    match working_dir {
        Some(dir) => Ok(join(strip_scheme(dir), stripped)),
        None => Err(FsError::InvalidPath(path.to_string())),
    }
}

/// Remove a leading `manta:` scheme token.
pub fn strip_scheme(path: &str) -> &str {
    path.strip_prefix(SCHEME)
        .and_then(|rest| rest.strip_prefix(':'))
        .unwrap_or(path)
}

/// Join `child` onto `base`; an absolute child wins.
pub fn join(base: &str, child: &str) -> String {
    if child.starts_with('/') || base.is_empty() {
        return normalize(child);
    }
    if child.is_empty() {
        return normalize(base);
    }
    normalize(&format!("{}/{}", base, child))
}

/// Collapse repeated slashes, drop `.` segments and any trailing slash.
/// `..` removes the preceding segment and never climbs above the root.
pub fn normalize(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => match segments.last() {
                Some(&last) if last != ".." => {
                    segments.pop();
                }
                _ if absolute => {}
                _ => segments.push(segment),
            },
            _ => segments.push(segment),
        }
    }

    let joined = segments.join("/");
    if absolute {
        format!("/{}", joined)
    } else {
        joined
    }
}

/// Parent key of an absolute key; `None` for the root.
pub fn parent(key: &str) -> Option<&str> {
    let trimmed = key.trim_end_matches('/');
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&trimmed[..idx]),
        None => None,
    }
}

/// Last segment of a key.
pub fn file_name(key: &str) -> &str {
    let trimmed = key.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

pub fn is_root(key: &str) -> bool {
    key.chars().all(|c| c == '/') && !key.is_empty()
}

fn home_relative(path: &str) -> Option<&str> {
    let rest = path.strip_prefix(HOME_ALIAS)?;
    if rest.is_empty() {
        Some("")
    } else {
        rest.strip_prefix('/')
    }
}
