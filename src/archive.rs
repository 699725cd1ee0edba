//! In-memory tar pack/unpack for container file transfer
//!
//! The container runtime's file-transfer API speaks tar archives. Files are
//! packed with paths relative to the filesystem root and uploaded with the
//! destination path `/`, so an entry `sandbox/main.py` lands at
//! `/sandbox/main.py`.

use std::io::{Cursor, Read};

use anyhow::Context;

use crate::error::{SandboxError, SandboxResult};

/// Pack a single file into a ustar archive.
pub fn pack(path: &str, contents: &[u8]) -> SandboxResult<Vec<u8>> {
    pack_many(&[(path.to_string(), contents.to_vec())])
}

/// Pack a set of files into one ustar archive.
///
/// Paths must be absolute; the leading slash is stripped for the entry name.
pub fn pack_many(files: &[(String, Vec<u8>)]) -> SandboxResult<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());

    for (path, contents) in files {
        let rel = path
            .strip_prefix('/')
            .ok_or_else(|| SandboxError::BadRequest(format!("path must be absolute: {path}")))?;
        if rel.is_empty() {
            return Err(SandboxError::BadRequest(
                "path must name a file, not the root".to_string(),
            ));
        }
        // Entry names become extraction targets verbatim; never let a `..`
        // component through, whatever the caller validated
        if rel.split('/').any(|part| part == "..") {
            return Err(SandboxError::BadRequest(format!(
                "path must not contain '..': {path}"
            )));
        }

        let mut header = tar::Header::new_ustar();
        header
            .set_path(rel)
            .with_context(|| format!("tar entry path too long: {path}"))?;
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append(&header, Cursor::new(contents))
            .context("append tar entry")?;
    }

    let data = builder.into_inner().context("finalize tar archive")?;
    Ok(data)
}

/// Extract one file from a tar archive by path.
///
/// Accepts the path with or without a leading slash. Returns `None` when no
/// entry matches.
pub fn unpack(archive: &[u8], path: &str) -> SandboxResult<Option<Vec<u8>>> {
    let want = path.trim_start_matches('/');
    let mut ar = tar::Archive::new(Cursor::new(archive));

    for entry in ar.entries().context("read tar entries")? {
        let mut entry = entry.context("read tar entry")?;
        let name = {
            let path = entry.path().context("tar entry path")?;
            path.to_string_lossy().trim_start_matches("./").to_string()
        };
        if name.trim_start_matches('/') == want {
            let mut contents = Vec::with_capacity(entry.size() as usize);
            entry
                .read_to_end(&mut contents)
                .context("read tar entry contents")?;
            return Ok(Some(contents));
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_text() {
        let data = pack("/sandbox/main.py", b"print(1+1)\n").unwrap();
        let back = unpack(&data, "/sandbox/main.py").unwrap().unwrap();
        assert_eq!(back, b"print(1+1)\n");
    }

    #[test]
    fn test_roundtrip_binary_clean_one_mebibyte() {
        let payload: Vec<u8> = (0..1024 * 1024).map(|i| (i * 31 % 251) as u8).collect();
        let data = pack("/sandbox/blob.bin", &payload).unwrap();
        let back = unpack(&data, "/sandbox/blob.bin").unwrap().unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn test_roundtrip_empty_file() {
        let data = pack("/sandbox/empty", b"").unwrap();
        assert_eq!(unpack(&data, "/sandbox/empty").unwrap().unwrap(), b"");
    }

    #[test]
    fn test_pack_many_preserves_each_entry() {
        let files = vec![
            ("/sandbox/a.txt".to_string(), b"aaa".to_vec()),
            ("/sandbox/sub/b.txt".to_string(), b"bbb".to_vec()),
        ];
        let data = pack_many(&files).unwrap();
        assert_eq!(unpack(&data, "/sandbox/a.txt").unwrap().unwrap(), b"aaa");
        assert_eq!(
            unpack(&data, "/sandbox/sub/b.txt").unwrap().unwrap(),
            b"bbb"
        );
    }

    #[test]
    fn test_missing_entry_is_none() {
        let data = pack("/sandbox/a.txt", b"a").unwrap();
        assert!(unpack(&data, "/sandbox/missing").unwrap().is_none());
    }

    #[test]
    fn test_pack_rejects_relative_path() {
        assert!(pack("main.py", b"x").is_err());
        assert!(pack("/", b"x").is_err());
    }

    #[test]
    fn test_pack_rejects_traversal() {
        assert!(pack("/sandbox/../etc/passwd", b"x").is_err());
        assert!(pack("/..", b"x").is_err());
        assert!(pack("/sandbox/sub/../x", b"x").is_err());
        // Dots inside a name are not traversal
        assert!(pack("/sandbox/notes..txt", b"x").is_ok());
    }
}
