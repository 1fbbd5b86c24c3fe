//! The bitmap-backed binary trie recording which pages have split.
//!
//! Bit `dbit` in the trie means "the subtree rooted at this node has been
//! split". The trie is implicit: node `d`'s children are `2d+1` (hash bit 0)
//! and `2d+2` (hash bit 1). The bitmap itself lives in `DBLKSIZ`-byte blocks
//! of a sparse file, one block cached in memory at a time.

use std::fs::File;
use std::path::{Path, PathBuf};

use crate::deps::log::{debug, warn};
use crate::error::Error;
use crate::io::{file_len, read_exact_at, write_at};

pub const DBLKSIZ: usize = 4096;
pub const BITSIZ: usize = 8;

/// `HMASK[d] = (1 << d) - 1`, precomputed for every trie depth a 64-bit hash
/// can reach. `HMASK[64]` covers the (practically unreachable) case of
/// having consumed every bit of the hash: all bits open.
const HMASK: [u64; 65] = build_hmask_table();

const fn build_hmask_table() -> [u64; 65] {
    let mut table = [0u64; 65];
    let mut d = 0usize;
    while d < 64 {
        table[d] = (1u64 << d) - 1;
        d += 1;
    }
    table[64] = u64::MAX;
    table
}

pub struct Directory {
    path: PathBuf,
    file: File,
    /// Block number currently cached, or `-1` if none is loaded.
    dirbno: i64,
    /// Directory size, in bits.
    maxbno: u64,
    buf: [u8; DBLKSIZ],
}

impl Directory {
    pub fn open(
        path: &Path,
        file: File,
    ) -> Result<Self, Error> {
        let size = file_len(&file).map_err(|e| Error::io("open", path, e))?;
        let dirbno = if size == 0 { 0 } else { -1 };
        Ok(Directory {
            path: path.to_path_buf(),
            file,
            dirbno,
            maxbno: size * BITSIZ as u64,
            buf: [0u8; DBLKSIZ],
        })
    }

    pub fn close(mut self) -> Result<(), Error> {
        self.file.sync_all().map_err(|e| Error::io("close", self.path.clone(), e))
    }

    fn block_of(dbit: u64) -> (u64, u64, u8) {
        let c = dbit / BITSIZ as u64;
        let blk = c / DBLKSIZ as u64;
        let byte_in_block = c % DBLKSIZ as u64;
        let bit_in_byte = (dbit % BITSIZ as u64) as u8;
        (blk, byte_in_block, bit_in_byte)
    }

    fn ensure_loaded(
        &mut self,
        blk: u64,
    ) -> std::io::Result<()> {
        if self.dirbno == blk as i64 {
            return Ok(());
        }
        debug!("loading directory block {} from {:?}", blk, self.path);
        let offset = blk * DBLKSIZ as u64;
        read_exact_at(&mut self.file, offset, &mut self.buf)?;
        self.dirbno = blk as i64;
        Ok(())
    }

    /// Returns whether `dbit` is set; I/O failures are treated as "not
    /// split", matching the conflation present in the reference design.
    pub fn get_dbit(
        &mut self,
        dbit: u64,
    ) -> bool {
        let (blk, byte_in_block, bit_in_byte) = Self::block_of(dbit);
        if let Err(err) = self.ensure_loaded(blk) {
            warn!("directory read failed at block {}, treating bit {} as unset: {}", blk, dbit, err);
            return false;
        }
        self.buf[byte_in_block as usize] & (1 << bit_in_byte) != 0
    }

    pub fn set_dbit(
        &mut self,
        dbit: u64,
    ) -> Result<(), Error> {
        let (blk, byte_in_block, bit_in_byte) = Self::block_of(dbit);
        self.ensure_loaded(blk).map_err(|e| Error::io("read", self.path.clone(), e))?;

        self.buf[byte_in_block as usize] |= 1 << bit_in_byte;

        if dbit >= self.maxbno {
            self.maxbno += DBLKSIZ as u64 * BITSIZ as u64;
        }

        let offset = blk * DBLKSIZ as u64;
        write_at(&mut self.file, offset, &self.buf).map_err(|e| Error::io("write", self.path.clone(), e))?;
        Ok(())
    }

    pub fn maxbno(&self) -> u64 {
        self.maxbno
    }

    /// Walk the trie from the root using successive bits of `hash`, stopping
    /// at the first unsplit node. Returns `(dbit, hbit)`; callers derive
    /// `hmask` from `hbit` via `Directory::hmask_for_depth`.
    pub fn walk(
        &mut self,
        hash: i64,
    ) -> (u64, u32) {
        let hash = hash as u64;
        let mut dbit = 0u64;
        let mut hbit = 0u32;

        while hbit < 64 && dbit < self.maxbno && self.get_dbit(dbit) {
            if (hash >> hbit) & 1 != 0 {
                dbit = 2 * dbit + 2;
            } else {
                dbit = 2 * dbit + 1;
            }
            hbit += 1;
        }

        (dbit, hbit)
    }

    pub fn hmask_for_depth(hbit: u32) -> u64 {
        HMASK[hbit as usize]
    }
}
