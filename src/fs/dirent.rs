use core::mem::offset_of;
use std::io;

use crate::fs::fd::DirFd;
use crate::fs::file_kind::FileKind;

/// Bytes handed to each `getdents64` call.
///
/// 32 KiB matches what ls and the mainstream walkers ask for; a bigger
/// buffer stops paying off once a directory fits in one call.
pub const DIRENT_BUF_SIZE: usize = 8 * 4096;

const INO_OFF: usize = offset_of!(libc::dirent64, d_ino);
const RECLEN_OFF: usize = offset_of!(libc::dirent64, d_reclen);
const TYPE_OFF: usize = offset_of!(libc::dirent64, d_type);
const NAME_OFF: usize = offset_of!(libc::dirent64, d_name);

/// One raw directory entry, borrowed out of the stream buffer.
#[derive(Debug)]
pub struct RawEntry<'buf> {
    pub name: &'buf [u8],
    pub kind: FileKind,
    pub ino: u64,
}

/// An iterator over the entries of one open directory.
///
/// Owns its descriptor (normally a duplicate of a cached fd) and reads
/// `dirent64` records straight out of a `getdents64` buffer, skipping
/// `.` and `..`. Not a std `Iterator` because each entry borrows the
/// buffer it was read into.
#[derive(Debug)]
pub struct DirStream {
    fd: DirFd,
    buf: Box<[u8]>,
    len: usize,
    pos: usize,
    eof: bool,
}

impl DirStream {
    #[must_use]
    pub fn new(fd: DirFd) -> Self {
        Self {
            fd,
            buf: vec![0_u8; DIRENT_BUF_SIZE].into_boxed_slice(),
            len: 0,
            pos: 0,
            eof: false,
        }
    }

    pub fn next_entry(&mut self) -> io::Result<Option<RawEntry<'_>>> {
        loop {
            if self.pos >= self.len {
                if self.eof || !self.refill()? {
                    return Ok(None);
                }
            }
            let rec = &self.buf[self.pos..self.len];
            let reclen = u16::from_ne_bytes([rec[RECLEN_OFF], rec[RECLEN_OFF + 1]]) as usize;
            if reclen == 0 || reclen > rec.len() {
                // a short record means the kernel handed us garbage
                return Err(io::Error::from_raw_os_error(libc::EIO));
            }
            let start = self.pos;
            self.pos += reclen;

            let rec = &self.buf[start..start + reclen];
            let name_area = &rec[NAME_OFF..];
            let name_len = name_area.iter().position(|&b| b == 0).unwrap_or(name_area.len());
            let name = &name_area[..name_len];
            if name == b"." || name == b".." {
                continue;
            }
            let ino = u64::from_ne_bytes([
                rec[INO_OFF],
                rec[INO_OFF + 1],
                rec[INO_OFF + 2],
                rec[INO_OFF + 3],
                rec[INO_OFF + 4],
                rec[INO_OFF + 5],
                rec[INO_OFF + 6],
                rec[INO_OFF + 7],
            ]);
            let kind = FileKind::from_dtype(rec[TYPE_OFF]);
            // reborrow to decouple the entry from &mut self
            let name = &self.buf[start + NAME_OFF..start + NAME_OFF + name_len];
            return Ok(Some(RawEntry { name, kind, ino }));
        }
    }

    fn refill(&mut self) -> io::Result<bool> {
        // SAFETY: fd is an open directory and buf is writable for its length
        let n = unsafe {
            libc::syscall(
                libc::SYS_getdents64,
                self.fd.raw(),
                self.buf.as_mut_ptr(),
                self.buf.len(),
            )
        };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        if n == 0 {
            self.eof = true;
            return Ok(false);
        }
        self.len = n as usize;
        self.pos = 0;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::fd::AT_CWD;
    use std::fs;

    #[test]
    fn reads_and_skips_dot_entries() {
        let dir = std::env::temp_dir().join("bfind_dirstream_test");
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(dir.join("sub")).unwrap();
        fs::write(dir.join("file1"), "x").unwrap();
        fs::write(dir.join("file2"), "y").unwrap();

        let fd = DirFd::open_at(AT_CWD, dir.as_os_str().as_encoded_bytes()).unwrap();
        let mut stream = DirStream::new(fd);
        let mut names = Vec::new();
        let mut dirs = 0;
        while let Some(entry) = stream.next_entry().unwrap() {
            assert_ne!(entry.name, b".");
            assert_ne!(entry.name, b"..");
            assert_ne!(entry.ino, 0);
            if entry.kind == FileKind::Dir {
                dirs += 1;
            }
            names.push(entry.name.to_vec());
        }
        names.sort();
        assert_eq!(names, vec![b"file1".to_vec(), b"file2".to_vec(), b"sub".to_vec()]);
        assert_eq!(dirs, 1);
        let _ = fs::remove_dir_all(&dir);
    }
}
