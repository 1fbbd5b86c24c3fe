use std::{
    fs::File,
    io::{
        ErrorKind,
        Read,
        Seek,
        SeekFrom,
        Write,
    },
};

use crate::deps::log::debug;

/// Seek to `offset` and fill `buf` entirely. A read that hits EOF partway
/// through zero-fills the remainder rather than erroring, matching the
/// sparse-file "hole reads as zero" semantics both on-disk formats rely on.
pub fn read_exact_at(
    file: &mut File,
    offset: u64,
    buf: &mut [u8],
) -> std::io::Result<()> {
    file.seek(SeekFrom::Start(offset))?;

    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }

    if filled < buf.len() {
        debug!(
            "short read at offset {}: got {} of {} bytes, zero-filling remainder",
            offset,
            filled,
            buf.len()
        );
        for b in &mut buf[filled..] {
            *b = 0;
        }
    }

    Ok(())
}

pub fn write_at(
    file: &mut File,
    offset: u64,
    buf: &[u8],
) -> std::io::Result<()> {
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(buf)
}

pub fn file_len(file: &File) -> std::io::Result<u64> {
    Ok(file.metadata()?.len())
}
