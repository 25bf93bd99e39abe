use bisync_core::{EntryKind, RemoteStat};
use russh_sftp::client::error::Error;
use russh_sftp::protocol::{FileAttributes, StatusCode};

pub(crate) fn is_no_such_file(e: &Error) -> bool {
    matches!(e, Error::Status(status) if status.status_code == StatusCode::NoSuchFile)
}

pub(crate) fn to_stat(attrs: &FileAttributes) -> RemoteStat {
    let kind = if attrs.is_dir() {
        EntryKind::Dir
    } else if attrs.is_regular() {
        EntryKind::File
    } else {
        EntryKind::Other
    };
    RemoteStat {
        kind,
        mtime: attrs.mtime.map(f64::from),
        size: attrs.size,
    }
}

/// Attributes that change only access and modification times.
pub(crate) fn times_only(mtime: u32) -> FileAttributes {
    FileAttributes {
        atime: Some(mtime),
        mtime: Some(mtime),
        ..FileAttributes::empty()
    }
}
