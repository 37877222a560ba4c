mod dirent;
mod fd;
mod file_kind;
mod stat;

pub use dirent::{DIRENT_BUF_SIZE, DirStream, RawEntry};
pub use fd::{AT_CWD, DirFd, cstr};
pub use file_kind::FileKind;
pub use stat::{access_at, read_link_at, stat_at, stat_entry, unlink_at};
