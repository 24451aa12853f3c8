use std::path::{Component, Path, PathBuf};

/// Extensions never served, whatever sits under the deployment root.
const DENIED_EXTENSIONS: [&str; 14] = [
    "xml",
    "conf",
    "properties",
    "json",
    "log",
    "exe",
    "bat",
    "sh",
    "com",
    "class",
    "bak",
    "old",
    "org",
    "backup",
];

/// Why a request path is refused before the file system is consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Climbs above the root or is absolute.
    Traversal,
    /// Matches the denylist.
    Denied,
}

/// Whether one file or directory name is on the denylist.
#[must_use]
pub fn is_denied_name(name: &str) -> bool {
    if name.starts_with('.') || name.ends_with('~') || name.contains(".backup.") {
        return true;
    }
    match name.rsplit_once('.') {
        Some((_, ext)) => {
            let ext = ext.to_ascii_lowercase();
            DENIED_EXTENSIONS.contains(&ext.as_str())
        }
        None => false,
    }
}

/// Lexically resolve a decoded, root-relative request path.
///
/// `..` may not climb above the root; absolute components, drive prefixes
/// and any denied segment reject the whole path.
pub fn resolve_relative(relative: &str) -> Result<PathBuf, Rejection> {
    let mut out = PathBuf::new();
    let mut depth = 0usize;
    for comp in Path::new(relative).components() {
        match comp {
            Component::Normal(seg) => {
                let seg_str = seg.to_str().ok_or(Rejection::Denied)?;
                if is_denied_name(seg_str) {
                    return Err(Rejection::Denied);
                }
                out.push(seg);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return Err(Rejection::Traversal);
                }
                out.pop();
                depth -= 1;
            }
            Component::RootDir | Component::Prefix(_) => return Err(Rejection::Traversal),
        }
    }
    Ok(out)
}
