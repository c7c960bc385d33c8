//! Positional file I/O with retry for oversized transfers.
//!
//! A single positional read or write may return short or fail outright for
//! transfers in the 2 GiB class on some platforms. These wrappers chunk
//! large transfers and retry until the full count is satisfied, a terminal
//! error occurs, or end of file is reached (reads only).

use std::fs::File;
use std::io::ErrorKind;

use gsd_common::Result;

/// Largest transfer issued in a single positional I/O call.
const MAX_IO_CHUNK: usize = i32::MAX as usize / 2;

#[cfg(unix)]
fn pread(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.read_at(buf, offset)
}

#[cfg(unix)]
fn pwrite(file: &File, buf: &[u8], offset: u64) -> std::io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.write_at(buf, offset)
}

// On windows, seek_read/seek_write move the file cursor. The handle issues
// no cursor-relative I/O, so per-call behavior still matches positional I/O.
#[cfg(windows)]
fn pread(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_read(buf, offset)
}

#[cfg(windows)]
fn pwrite(file: &File, buf: &[u8], offset: u64) -> std::io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_write(buf, offset)
}

/// Reads up to `buf.len()` bytes starting at `offset`.
///
/// Returns the number of bytes read, which is less than `buf.len()` only
/// when end of file is reached first.
pub fn read_at_full(file: &File, buf: &mut [u8], offset: u64) -> Result<usize> {
    let mut total = 0usize;

    while total < buf.len() {
        let want = (buf.len() - total).min(MAX_IO_CHUNK);
        let n = match pread(file, &mut buf[total..total + want], offset + total as u64) {
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };

        if n == 0 {
            // end of file
            return Ok(total);
        }
        total += n;
    }

    Ok(total)
}

/// Writes all of `buf` starting at `offset`.
pub fn write_at_full(file: &File, buf: &[u8], offset: u64) -> Result<()> {
    let mut total = 0usize;

    while total < buf.len() {
        let want = (buf.len() - total).min(MAX_IO_CHUNK);
        let n = match pwrite(file, &buf[total..total + want], offset + total as u64) {
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };

        if n == 0 {
            return Err(std::io::Error::new(
                ErrorKind::WriteZero,
                "positional write returned zero bytes",
            )
            .into());
        }
        total += n;
    }

    Ok(())
}
