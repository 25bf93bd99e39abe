use std::path::Path;

pub fn as_posix_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Path of `local_path` relative to `local_root`, forward-slashed. `None` when outside the root.
pub fn relative_posix(local_root: &Path, local_path: &Path) -> Option<String> {
    let rel = local_path.strip_prefix(local_root).ok()?;
    let s = as_posix_path(rel);
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

pub fn join_remote(remote_root: &str, rel: &str) -> String {
    if rel.is_empty() {
        remote_root.to_string()
    } else if remote_root.ends_with('/') {
        format!("{remote_root}{rel}")
    } else {
        format!("{remote_root}/{rel}")
    }
}

/// Parent of a root-relative path; `""` denotes the root.
pub fn parent_of(rel: &str) -> &str {
    match rel.rfind('/') {
        Some(pos) => &rel[..pos],
        None => "",
    }
}

/// Parent of an absolute remote path; `None` for `/` and bare names.
pub fn remote_parent(path: &str) -> Option<&str> {
    match path.rfind('/') {
        Some(0) if path.len() > 1 => Some("/"),
        Some(0) | None => None,
        Some(pos) => Some(&path[..pos]),
    }
}

/// True when any segment of `rel` is a dotfile.
pub fn is_hidden(rel: &str) -> bool {
    rel.split('/').any(|seg| seg.starts_with('.'))
}
