use libc::{
    DT_BLK, DT_CHR, DT_DIR, DT_FIFO, DT_LNK, DT_REG, DT_SOCK, S_IFBLK, S_IFCHR, S_IFDIR, S_IFIFO,
    S_IFLNK, S_IFMT, S_IFREG, S_IFSOCK, mode_t,
};

/// Represents the kind of a visited filesystem object.
///
/// `Unknown` is what a `readdir` stream reports on filesystems that do not
/// fill `d_type`; a later stat refines it. `Error` marks a record that
/// could not be examined at all, with the errno carried alongside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FileKind {
    Block,
    Char,
    Dir,
    Door,
    Fifo,
    Regular,
    Link,
    Socket,
    Unknown,
    Error,
}

impl FileKind {
    /// Converts a `d_type` byte to a `FileKind`.
    ///
    /// Cheap but not authoritative: several filesystems hand back
    /// `DT_UNKNOWN` for everything, so callers must be prepared to fall
    /// back to [`from_mode`](Self::from_mode).
    #[must_use]
    #[inline]
    pub const fn from_dtype(d_type: u8) -> Self {
        match d_type {
            DT_DIR => Self::Dir,
            DT_REG => Self::Regular,
            DT_LNK => Self::Link,
            DT_BLK => Self::Block,
            DT_CHR => Self::Char,
            DT_FIFO => Self::Fifo,
            DT_SOCK => Self::Socket,
            _ => Self::Unknown,
        }
    }

    /// Converts a stat `st_mode` to a `FileKind`.
    #[must_use]
    #[inline]
    pub const fn from_mode(mode: mode_t) -> Self {
        match mode & S_IFMT {
            S_IFREG => Self::Regular,
            S_IFDIR => Self::Dir,
            S_IFLNK => Self::Link,
            S_IFBLK => Self::Block,
            S_IFCHR => Self::Char,
            S_IFIFO => Self::Fifo,
            S_IFSOCK => Self::Socket,
            _ => Self::Unknown,
        }
    }

    /// The single-letter spelling used by `-type` and the `%y` directive.
    #[must_use]
    pub const fn type_char(self) -> u8 {
        match self {
            Self::Block => b'b',
            Self::Char => b'c',
            Self::Dir => b'd',
            Self::Door => b'D',
            Self::Fifo => b'p',
            Self::Regular => b'f',
            Self::Link => b'l',
            Self::Socket => b's',
            Self::Unknown => b'U',
            Self::Error => b'?',
        }
    }

    /// Inverse of [`type_char`](Self::type_char), for `-type` arguments.
    #[must_use]
    pub const fn from_letter(letter: u8) -> Option<Self> {
        match letter {
            b'b' => Some(Self::Block),
            b'c' => Some(Self::Char),
            b'd' => Some(Self::Dir),
            b'D' => Some(Self::Door),
            b'p' => Some(Self::Fifo),
            b'f' => Some(Self::Regular),
            b'l' => Some(Self::Link),
            b's' => Some(Self::Socket),
            _ => None,
        }
    }

    /// Bit position for the masks `-type` builds out of letter lists.
    #[must_use]
    pub const fn mask_bit(self) -> u16 {
        1 << self as u16
    }
}

impl core::fmt::Display for FileKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match *self {
            Self::Block => "block device",
            Self::Char => "character device",
            Self::Dir => "directory",
            Self::Door => "door",
            Self::Fifo => "FIFO",
            Self::Regular => "regular file",
            Self::Link => "symbolic link",
            Self::Socket => "socket",
            Self::Unknown => "unknown",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}
