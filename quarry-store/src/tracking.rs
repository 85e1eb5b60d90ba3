//! Tracking files — file-locked key-value records colocated with cached files.
//!
//! A tracking file is a newline-delimited `key=value` record with a leading
//! `#<ISO8601 UTC>` comment line. Keys are sorted, values percent-escaped, so
//! rewrites are deterministic. Readers take a shared lock, writers an
//! exclusive lock; concurrent updaters across processes serialize on the lock
//! and the last writer wins.
//!
//! I/O trouble fails open: a read that cannot complete yields an empty record,
//! a write that cannot complete is logged and the merged in-memory record is
//! returned anyway. Consumers only ever become *more* conservative (they may
//! re-fetch), never less.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use chrono::Utc;
use fs4::FileExt;

/// Read the record at `path`. Returns an empty map if the file is absent or
/// unreadable.
pub fn read(path: &Path) -> BTreeMap<String, String> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return BTreeMap::new(),
        Err(err) => {
            tracing::debug!("failed to open tracking file {}: {err}", path.display());
            return BTreeMap::new();
        }
    };
    if let Err(err) = file.lock_shared() {
        tracing::debug!("failed to lock tracking file {}: {err}", path.display());
        return BTreeMap::new();
    }
    let mut contents = String::new();
    let result = (&file).read_to_string(&mut contents);
    let _ = file.unlock();
    match result {
        Ok(_) => parse(&contents),
        Err(err) => {
            tracing::debug!("failed to read tracking file {}: {err}", path.display());
            BTreeMap::new()
        }
    }
}

/// Apply `updates` to the record at `path` under an exclusive lock and rewrite
/// it atomically (truncate + write while locked). A `None` value removes the
/// key. Returns the resulting record; persistence failures are logged and
/// swallowed.
pub fn update(
    path: &Path,
    updates: &BTreeMap<String, Option<String>>,
) -> BTreeMap<String, String> {
    match try_update(path, updates) {
        Ok(record) => record,
        Err((record, err)) => {
            tracing::warn!("failed to update tracking file {}: {err}", path.display());
            record
        }
    }
}

fn try_update(
    path: &Path,
    updates: &BTreeMap<String, Option<String>>,
) -> Result<BTreeMap<String, String>, (BTreeMap<String, String>, std::io::Error)> {
    let merge = |existing: &str| {
        let mut record = parse(existing);
        for (key, value) in updates {
            match value {
                Some(value) => record.insert(key.clone(), value.clone()),
                None => record.remove(key),
            };
        }
        record
    };

    if let Some(parent) = path.parent() {
        if let Err(err) = std::fs::create_dir_all(parent) {
            return Err((merge(""), err));
        }
    }

    let mut file = match OpenOptions::new().create(true).read(true).write(true).open(path) {
        Ok(file) => file,
        Err(err) => return Err((merge(""), err)),
    };
    if let Err(err) = file.lock_exclusive() {
        return Err((merge(""), err));
    }

    let result = (|| -> Result<_, std::io::Error> {
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        let record = merge(&contents);

        file.seek(SeekFrom::Start(0))?;
        file.set_len(0)?;
        file.write_all(render(&record).as_bytes())?;
        file.flush()?;
        Ok(record)
    })();
    let _ = file.unlock();

    result.map_err(|err| (merge(""), err))
}

fn render(record: &BTreeMap<String, String>) -> String {
    let mut out = format!("#{}\n", Utc::now().format("%Y-%m-%dT%H:%M:%SZ"));
    for (key, value) in record {
        out.push_str(&escape(key));
        out.push('=');
        out.push_str(&escape(value));
        out.push('\n');
    }
    out
}

fn parse(contents: &str) -> BTreeMap<String, String> {
    let mut record = BTreeMap::new();
    for line in contents.lines() {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        record.insert(unescape(key), unescape(value));
    }
    record
}

/// Percent-escape the characters that would break the line format.
fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '%' => out.push_str("%25"),
            '=' => out.push_str("%3D"),
            '\n' => out.push_str("%0A"),
            '\r' => out.push_str("%0D"),
            other => out.push(other),
        }
    }
    out
}

/// Reverse of [`escape`]; unknown escapes pass through verbatim.
fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.char_indices();
    while let Some((index, c)) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let escaped = text
            .get(index + 1..index + 3)
            .and_then(|hex| u8::from_str_radix(hex, 16).ok())
            .filter(u8::is_ascii);
        match escaped {
            Some(byte) => {
                out.push(byte as char);
                chars.next();
                chars.next();
            }
            None => out.push('%'),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn set(pairs: &[(&str, Option<&str>)]) -> BTreeMap<String, Option<String>> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.map(str::to_string)))
            .collect()
    }

    #[test]
    fn read_missing_file_returns_empty() {
        let tmp = TempDir::new().unwrap();
        assert!(read(&tmp.path().join("absent.lastUpdated")).is_empty());
    }

    #[test]
    fn update_then_read_round_trips() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("widget.jar.lastUpdated");

        let written = update(&path, &set(&[("a", Some("1")), ("b", Some("2"))]));
        assert_eq!(written.get("a").map(String::as_str), Some("1"));

        let read_back = read(&path);
        assert_eq!(read_back, written);
    }

    #[test]
    fn none_value_removes_the_key() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("record");

        update(&path, &set(&[("keep", Some("1")), ("drop", Some("2"))]));
        let record = update(&path, &set(&[("drop", None)]));

        assert!(record.contains_key("keep"));
        assert!(!record.contains_key("drop"));
        assert!(!read(&path).contains_key("drop"));
    }

    #[test]
    fn update_creates_parent_directories() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("g").join("a").join("1.0").join("record");
        update(&path, &set(&[("k", Some("v"))]));
        assert!(path.exists());
    }

    #[test]
    fn file_starts_with_timestamp_comment_and_sorted_keys() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("record");
        update(&path, &set(&[("zz", Some("1")), ("aa", Some("2"))]));

        let contents = std::fs::read_to_string(&path).unwrap();
        let mut lines = contents.lines();
        assert!(lines.next().unwrap().starts_with('#'));
        assert_eq!(lines.next(), Some("aa=2"));
        assert_eq!(lines.next(), Some("zz=1"));
        assert!(contents.ends_with('\n'));
    }

    #[test]
    fn keys_and_values_with_special_characters_round_trip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("record");

        let key = "https://repo.example.org/?a=b+c";
        let value = "line one\nline two=100%";
        update(&path, &set(&[(key, Some(value))]));

        let record = read(&path);
        assert_eq!(record.get(key).map(String::as_str), Some(value));
    }

    #[test]
    fn unknown_escapes_pass_through() {
        assert_eq!(unescape("50%ZZoff"), "50%ZZoff");
        assert_eq!(unescape("trailing%"), "trailing%");
        assert_eq!(unescape("a%3Db"), "a=b");
    }

    #[test]
    fn concurrent_updates_keep_both_entries() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("record");

        std::thread::scope(|scope| {
            for key in ["first", "second"] {
                let path = path.clone();
                scope.spawn(move || {
                    for round in 0..20 {
                        update(&path, &set(&[(&format!("{key}.{round}"), Some("1"))]));
                    }
                });
            }
        });

        let record = read(&path);
        assert!(record.contains_key("first.19"));
        assert!(record.contains_key("second.19"));
    }
}
