use std::{
    ffi::{CStr, CString},
    fs,
    path::{Path, PathBuf},
};

use crate::error::ErrorKind;

pub const FILE_EXTENSION: &str = ".lg";

/// Match `s` against a pattern where `*` matches any run of characters and
/// `?` any single one.
pub fn wild_match(s: &str, pat: &str, case_sensitive: bool) -> bool {
    let s: Vec<char> = s.chars().collect();
    let pat: Vec<char> = pat.chars().collect();
    wild_match_chars(&s, &pat, case_sensitive)
}

fn wild_match_chars(s: &[char], pat: &[char], case_sensitive: bool) -> bool {
    match pat.split_first() {
        None => s.is_empty(),
        Some(('*', rest)) => (0..=s.len()).any(|i| wild_match_chars(&s[i..], rest, case_sensitive)),
        Some((&p, rest)) => match s.split_first() {
            None => false,
            Some((&c, s_rest)) => {
                let same = p == '?'
                    || if case_sensitive {
                        c == p
                    } else {
                        c.to_uppercase().eq(p.to_uppercase())
                    };
                same && wild_match_chars(s_rest, rest, case_sensitive)
            }
        },
    }
}

pub fn has_wildcards(path: &str) -> bool {
    path.contains(['*', '?', '~'])
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EntryKind {
    File,
    Dir,
}

/// Turns a user supplied path, possibly with wildcards, into an existing
/// file or directory.
pub trait PathResolver {
    fn match_path(&self, pattern: &str, kind: EntryKind) -> Result<PathBuf, ErrorKind>;
}

/// Resolves against the real filesystem. Each path segment may hold
/// wildcards; the first entry that matches wins.
#[derive(Clone, Debug, Default)]
pub struct FsResolver;

fn home_dir() -> Result<PathBuf, ErrorKind> {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .ok_or(ErrorKind::InvalidPath)
}

fn user_home(name: &str) -> Option<PathBuf> {
    let cname = CString::new(name).ok()?;
    // SAFETY: getpwnam returns null or a pointer to a static record that
    // stays valid until the next call, and we copy out of it right away.
    unsafe {
        let pwd = libc::getpwnam(cname.as_ptr());
        if pwd.is_null() || (*pwd).pw_dir.is_null() {
            return None;
        }
        let dir = CStr::from_ptr((*pwd).pw_dir);
        Some(PathBuf::from(dir.to_string_lossy().into_owned()))
    }
}

/// Split off where matching starts: the root, a home directory, the parent
/// or the current directory.
fn split_base(pattern: &str) -> Result<(PathBuf, &str), ErrorKind> {
    if let Some(rest) = pattern.strip_prefix('/') {
        return Ok((PathBuf::from("/"), rest));
    }
    if let Some(rest) = pattern.strip_prefix('~') {
        if rest.is_empty() {
            return Ok((home_dir()?, rest));
        }
        if let Some(rest) = rest.strip_prefix('/') {
            return Ok((home_dir()?, rest));
        }
        let (user, rest) = rest.split_once('/').unwrap_or((rest, ""));
        let home = user_home(user).ok_or(ErrorKind::InvalidPath)?;
        return Ok((home, rest));
    }
    if let Some(rest) = pattern.strip_prefix("../") {
        return Ok((PathBuf::from(".."), rest));
    }
    Ok((PathBuf::from("."), pattern.strip_prefix("./").unwrap_or(pattern)))
}

fn match_segments(dir: &Path, segs: &[&str], kind: EntryKind) -> Result<PathBuf, ErrorKind> {
    let Some((seg, more)) = segs.split_first() else {
        return Ok(dir.to_owned());
    };
    let mut names: Vec<String> = if *seg == "." || *seg == ".." {
        vec![seg.to_string()]
    } else {
        let entries = fs::read_dir(dir).map_err(|_| ErrorKind::OpenFail)?;
        entries
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| wild_match(name, seg, true))
            .collect()
    };
    names.sort();

    for name in names {
        let path = dir.join(&name);
        let meta = fs::metadata(&path).map_err(|_| ErrorKind::StatFail)?;
        if !more.is_empty() {
            if meta.is_dir() {
                if let Ok(found) = match_segments(&path, more, kind) {
                    return Ok(found);
                }
            }
            continue;
        }
        let wanted = match kind {
            EntryKind::File => !meta.is_dir(),
            EntryKind::Dir => meta.is_dir(),
        };
        if wanted {
            return Ok(path);
        }
    }
    Err(ErrorKind::InvalidPath)
}

impl PathResolver for FsResolver {
    fn match_path(&self, pattern: &str, kind: EntryKind) -> Result<PathBuf, ErrorKind> {
        let (base, rest) = split_base(pattern)?;
        let segs: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();
        let found = match_segments(&base, &segs, kind)?;
        log::trace!("path {pattern:?} resolved to {}", found.display());
        Ok(found)
    }
}

/// An existing procedure file, trying the name as given and then with the
/// file extension.
pub fn load_path(paths: &dyn PathResolver, name: &str) -> Result<PathBuf, ErrorKind> {
    match paths.match_path(name, EntryKind::File) {
        Ok(found) => Ok(found),
        Err(_) if !name.ends_with(FILE_EXTENSION) => {
            paths.match_path(&format!("{name}{FILE_EXTENSION}"), EntryKind::File)
        }
        Err(e) => Err(e),
    }
}

/// Where to save. The directory must exist; the file need not, unless it
/// is given with wildcards.
pub fn save_path(paths: &dyn PathResolver, name: &str) -> Result<PathBuf, ErrorKind> {
    let mut path = match name.rsplit_once('/') {
        Some((dir, file)) if !dir.is_empty() => {
            let dir = paths.match_path(dir, EntryKind::Dir)?;
            dir.join(file).to_string_lossy().into_owned()
        }
        _ => name.to_owned(),
    };
    if has_wildcards(&path) {
        return paths
            .match_path(&path, EntryKind::File)
            .map_err(|_| ErrorKind::InvalidPath);
    }
    if !path.ends_with(FILE_EXTENSION) {
        path.push_str(FILE_EXTENSION);
    }
    Ok(PathBuf::from(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcards() {
        assert!(wild_match("abc", "abc", true));
        assert!(wild_match("abc", "a*", true));
        assert!(wild_match("abc", "*c", true));
        assert!(wild_match("abc", "a?c", true));
        assert!(wild_match("abc", "abc**", true));
        assert!(wild_match("", "*", true));
        assert!(wild_match("a.lg", "*.lg", true));
        assert!(!wild_match("abc", "ab", true));
        assert!(!wild_match("ab", "abc", true));
        assert!(!wild_match("ABC", "abc", true));
        assert!(wild_match("ABC", "abc", false));
        assert!(wild_match("a-b-c", "*-*-?", false));
    }

    #[test]
    fn resolves_in_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/shapes.lg"), "").unwrap();
        let root = dir.path().to_string_lossy().into_owned();

        let found = FsResolver
            .match_path(&format!("{root}/s*/sha*"), EntryKind::File)
            .unwrap();
        assert_eq!(found, dir.path().join("sub/shapes.lg"));

        let found = load_path(&FsResolver, &format!("{root}/sub/shapes")).unwrap();
        assert_eq!(found, dir.path().join("sub/shapes.lg"));

        let found = FsResolver
            .match_path(&format!("{root}/s?b"), EntryKind::Dir)
            .unwrap();
        assert_eq!(found, dir.path().join("sub"));

        let err = FsResolver
            .match_path(&format!("{root}/sub/nope"), EntryKind::File)
            .unwrap_err();
        assert_eq!(err, ErrorKind::InvalidPath);
    }

    #[test]
    fn save_paths_get_the_extension() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_string_lossy().into_owned();
        let path = save_path(&FsResolver, &format!("{root}/new")).unwrap();
        assert_eq!(path, dir.path().join("new.lg"));
        let path = save_path(&FsResolver, &format!("{root}/new.lg")).unwrap();
        assert_eq!(path, dir.path().join("new.lg"));
        let err = save_path(&FsResolver, &format!("{root}/missing/new")).unwrap_err();
        assert_eq!(err, ErrorKind::InvalidPath);
    }
}
