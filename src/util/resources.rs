//! Cached lookups against the system databases.
//!
//! User and group names come from the passwd/group databases through the
//! reentrant libc calls; filesystem types come from `/proc/self/mounts`.
//! Everything is resolved at most once per run and memoised, since a single
//! walk can ask for the same uid thousands of times.

use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::CStr;
use std::fs;
use std::mem::MaybeUninit;
use std::os::unix::fs::MetadataExt as _;
use std::ptr;

#[derive(Debug, Default)]
pub struct Resources {
    users: RefCell<HashMap<u32, Option<Box<str>>>>,
    groups: RefCell<HashMap<u32, Option<Box<str>>>>,
    mounts: RefCell<Option<Vec<(u64, Box<str>)>>>,
}

impl Resources {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seeded device table, for tests and for callers that already
    /// parsed a mount table of their own.
    #[must_use]
    pub fn with_mounts(mounts: Vec<(u64, Box<str>)>) -> Self {
        Self {
            mounts: RefCell::new(Some(mounts)),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn user_name(&self, uid: u32) -> Option<Box<str>> {
        self.users
            .borrow_mut()
            .entry(uid)
            .or_insert_with(|| lookup_user(uid))
            .clone()
    }

    #[must_use]
    pub fn group_name(&self, gid: u32) -> Option<Box<str>> {
        self.groups
            .borrow_mut()
            .entry(gid)
            .or_insert_with(|| lookup_group(gid))
            .clone()
    }

    /// Filesystem type name for a device id, or `None` when the mount
    /// table has nothing for it.
    #[must_use]
    pub fn fs_type(&self, dev: u64) -> Option<Box<str>> {
        let mut mounts = self.mounts.borrow_mut();
        let table = mounts.get_or_insert_with(read_mount_table);
        table
            .iter()
            .find(|&&(d, _)| d == dev)
            .map(|&(_, ref name)| name.clone())
    }
}

/// Resolve a user name to a uid.
#[must_use]
pub fn user_id(name: &str) -> Option<u32> {
    let cname = std::ffi::CString::new(name).ok()?;
    let mut pwd = MaybeUninit::<libc::passwd>::uninit();
    let mut buf = vec![0_u8; 1024];
    let mut result: *mut libc::passwd = ptr::null_mut();
    loop {
        let rc = unsafe {
            libc::getpwnam_r(
                cname.as_ptr(),
                pwd.as_mut_ptr(),
                buf.as_mut_ptr().cast(),
                buf.len(),
                &mut result,
            )
        };
        if rc == libc::ERANGE {
            buf.resize(buf.len() * 2, 0);
            continue;
        }
        if rc != 0 || result.is_null() {
            return None;
        }
        // SAFETY: getpwnam_r filled pwd on success
        return Some(unsafe { (*result).pw_uid });
    }
}

/// Resolve a group name to a gid.
#[must_use]
pub fn group_id(name: &str) -> Option<u32> {
    let cname = std::ffi::CString::new(name).ok()?;
    let mut grp = MaybeUninit::<libc::group>::uninit();
    let mut buf = vec![0_u8; 1024];
    let mut result: *mut libc::group = ptr::null_mut();
    loop {
        let rc = unsafe {
            libc::getgrnam_r(
                cname.as_ptr(),
                grp.as_mut_ptr(),
                buf.as_mut_ptr().cast(),
                buf.len(),
                &mut result,
            )
        };
        if rc == libc::ERANGE {
            buf.resize(buf.len() * 2, 0);
            continue;
        }
        if rc != 0 || result.is_null() {
            return None;
        }
        // SAFETY: getgrnam_r filled grp on success
        return Some(unsafe { (*result).gr_gid });
    }
}

fn lookup_user(uid: u32) -> Option<Box<str>> {
    let mut pwd = MaybeUninit::<libc::passwd>::uninit();
    let mut buf = vec![0_u8; 1024];
    let mut result: *mut libc::passwd = ptr::null_mut();
    loop {
        let rc = unsafe {
            libc::getpwuid_r(
                uid,
                pwd.as_mut_ptr(),
                buf.as_mut_ptr().cast(),
                buf.len(),
                &mut result,
            )
        };
        if rc == libc::ERANGE {
            buf.resize(buf.len() * 2, 0);
            continue;
        }
        if rc != 0 || result.is_null() {
            return None;
        }
        // SAFETY: pw_name points into buf, which outlives this copy
        let name = unsafe { CStr::from_ptr((*result).pw_name) };
        return Some(name.to_string_lossy().into_owned().into_boxed_str());
    }
}

fn lookup_group(gid: u32) -> Option<Box<str>> {
    let mut grp = MaybeUninit::<libc::group>::uninit();
    let mut buf = vec![0_u8; 1024];
    let mut result: *mut libc::group = ptr::null_mut();
    loop {
        let rc = unsafe {
            libc::getgrgid_r(
                gid,
                grp.as_mut_ptr(),
                buf.as_mut_ptr().cast(),
                buf.len(),
                &mut result,
            )
        };
        if rc == libc::ERANGE {
            buf.resize(buf.len() * 2, 0);
            continue;
        }
        if rc != 0 || result.is_null() {
            return None;
        }
        // SAFETY: gr_name points into buf, which outlives this copy
        let name = unsafe { CStr::from_ptr((*result).gr_name) };
        return Some(name.to_string_lossy().into_owned().into_boxed_str());
    }
}

/// One pass over `/proc/self/mounts`, stat'ing each mount point to learn
/// its device id. Unreadable mount points are skipped.
fn read_mount_table() -> Vec<(u64, Box<str>)> {
    let Ok(table) = fs::read_to_string("/proc/self/mounts") else {
        return Vec::new();
    };
    let mut out: Vec<(u64, Box<str>)> = Vec::new();
    for line in table.lines() {
        let mut fields = line.split_ascii_whitespace();
        let Some(_source) = fields.next() else { continue };
        let Some(target) = fields.next() else { continue };
        let Some(fstype) = fields.next() else { continue };
        let target = unescape_mount(target);
        let Ok(meta) = fs::symlink_metadata(&target) else {
            continue;
        };
        let dev = meta.dev();
        // later mounts shadow earlier ones on the same device
        if let Some(slot) = out.iter_mut().find(|&&mut (d, _)| d == dev) {
            slot.1 = fstype.into();
        } else {
            out.push((dev, fstype.into()));
        }
    }
    out
}

/// Mount points escape whitespace as octal (`\040` etc).
fn unescape_mount(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut chars = field.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let digits: String = chars.clone().take(3).collect();
        if digits.len() == 3
            && let Ok(code) = u8::from_str_radix(&digits, 8)
        {
            out.push(code as char);
            chars.nth(2);
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_user_resolves() {
        // uid 0 exists on any unix worth the name
        let res = Resources::new();
        assert_eq!(res.user_name(0).as_deref(), Some("root"));
        assert_eq!(user_id("root"), Some(0));
    }

    #[test]
    fn mount_escape() {
        assert_eq!(unescape_mount(r"/mnt/with\040space"), "/mnt/with space");
        assert_eq!(unescape_mount("/plain"), "/plain");
    }

    #[test]
    fn seeded_mount_table() {
        let res = Resources::with_mounts(vec![(7, "ext4".into())]);
        assert_eq!(res.fs_type(7).as_deref(), Some("ext4"));
        assert_eq!(res.fs_type(8), None);
    }
}
