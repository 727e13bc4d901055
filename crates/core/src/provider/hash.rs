//! Video file hash in the OpenSubtitles convention.
//!
//! `size + sum(u64-le of first 64 KiB) + sum(u64-le of last 64 KiB)`,
//! truncated to 64 bits, rendered as 16 lowercase hex digits.

use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

const CHUNK: u64 = 65536;

/// Compute the hash and size of a file. Files smaller than 128 KiB hash
/// whatever bytes exist (both windows overlap).
pub fn compute_file_hash(path: &Path) -> std::io::Result<(String, u64)> {
    let mut file = std::fs::File::open(path)?;
    let size = file.metadata()?.len();

    let mut hash = size;
    hash = hash.wrapping_add(sum_chunk(&mut file)?);

    let tail_start = size.saturating_sub(CHUNK);
    file.seek(SeekFrom::Start(tail_start))?;
    hash = hash.wrapping_add(sum_chunk(&mut file)?);

    Ok((format!("{hash:016x}"), size))
}

fn sum_chunk(file: &mut std::fs::File) -> std::io::Result<u64> {
    let mut buf = vec![0u8; CHUNK as usize];
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled - filled % 8);

    Ok(buf
        .chunks_exact(8)
        .fold(0u64, |acc, chunk| {
            let mut word = [0u8; 8];
            word.copy_from_slice(chunk);
            acc.wrapping_add(u64::from_le_bytes(word))
        }))
}
