//! In-memory representation of one `PBLKSIZ`-byte data page: a head-growing
//! offset table and a tail-growing heap of key/value bytes.
//!
//! Slot `i` (1-based, odd indices hold keys, the following even index holds
//! the matching value) stores its *start* offset in the table; the end of
//! its payload is implicit — either `PBLKSIZ` for the first key, or the
//! start offset of the previous slot.

use byteorder::{ByteOrder, LittleEndian};

use crate::deps::log::debug;
use crate::hash::hash;

pub const PBLKSIZ: usize = 1024;
pub const SHORTSIZE: usize = 2;

#[derive(Clone)]
pub struct Page {
    buf: [u8; PBLKSIZ],
}

impl Page {
    pub fn new() -> Self {
        Page { buf: [0u8; PBLKSIZ] }
    }

    pub fn from_bytes(buf: [u8; PBLKSIZ]) -> Self {
        Page { buf }
    }

    pub fn as_bytes(&self) -> &[u8; PBLKSIZ] {
        &self.buf
    }

    pub fn reset(&mut self) {
        self.buf = [0u8; PBLKSIZ];
    }

    pub fn n(&self) -> u16 {
        LittleEndian::read_u16(&self.buf[0..2])
    }

    fn set_n(
        &mut self,
        n: u16,
    ) {
        LittleEndian::write_u16(&mut self.buf[0..2], n);
    }

    /// `ino[0]` is conceptually `PBLKSIZ`; it is never actually stored.
    fn ino(
        &self,
        i: u16,
    ) -> u16 {
        if i == 0 {
            return PBLKSIZ as u16;
        }
        let at = i as usize * SHORTSIZE;
        LittleEndian::read_u16(&self.buf[at..at + 2])
    }

    fn set_ino(
        &mut self,
        i: u16,
        value: u16,
    ) {
        let at = i as usize * SHORTSIZE;
        LittleEndian::write_u16(&mut self.buf[at..at + 2], value);
    }

    fn prev_end(
        &self,
        i: u16,
    ) -> u16 {
        if i == 1 {
            PBLKSIZ as u16
        } else {
            self.ino(i - 1)
        }
    }

    /// Linear scan over odd (key) slots; returns the matching slot index, or
    /// 0 if `key` is not present.
    fn see_pair(
        &self,
        n: u16,
        key: &[u8],
    ) -> u16 {
        let mut i = 1u16;
        while i < n {
            let prev_end = self.prev_end(i);
            let start = self.ino(i);
            if &self.buf[start as usize..prev_end as usize] == key {
                return i;
            }
            i += 2;
        }
        0
    }

    pub fn fit_pair(
        &self,
        need: usize,
    ) -> bool {
        let n = self.n();
        let off = if n == 0 { PBLKSIZ as u16 } else { self.ino(n) };
        let free = (off as usize).saturating_sub((n as usize + 1) * SHORTSIZE);
        need + 2 * SHORTSIZE <= free
    }

    /// Must only be called after a successful `fit_pair` for the same pair.
    pub fn put_pair(
        &mut self,
        key: &[u8],
        val: &[u8],
    ) {
        let n = self.n();
        let off = if n == 0 { PBLKSIZ as u16 } else { self.ino(n) };

        let key_start = off - key.len() as u16;
        let val_start = key_start - val.len() as u16;

        self.buf[key_start as usize..off as usize].copy_from_slice(key);
        self.buf[val_start as usize..key_start as usize].copy_from_slice(val);

        self.set_ino(n + 1, key_start);
        self.set_ino(n + 2, val_start);
        self.set_n(n + 2);
    }

    pub fn get_pair(
        &self,
        key: &[u8],
    ) -> Option<Vec<u8>> {
        let n = self.n();
        let i = self.see_pair(n, key);
        if i == 0 {
            return None;
        }
        let val_start = self.ino(i + 1);
        let val_end = self.ino(i);
        Some(self.buf[val_start as usize..val_end as usize].to_vec())
    }

    pub fn dup_pair(
        &self,
        key: &[u8],
    ) -> bool {
        self.see_pair(self.n(), key) != 0
    }

    /// 1-based key ordinal within the page.
    pub fn get_nkey(
        &self,
        num: u16,
    ) -> Option<Vec<u8>> {
        let n = self.n();
        let slot = 2 * num - 1;
        if slot > n {
            return None;
        }
        let prev_end = self.prev_end(slot);
        let start = self.ino(slot);
        Some(self.buf[start as usize..prev_end as usize].to_vec())
    }

    pub fn del_pair(
        &mut self,
        key: &[u8],
    ) -> bool {
        let n = self.n();
        let i = self.see_pair(n, key);
        if i == 0 {
            return false;
        }

        let prev_end = self.prev_end(i);
        let val_start = self.ino(i + 1);
        let delta = prev_end - val_start;

        if i + 1 != n {
            let lowest = self.ino(n);
            self.buf.copy_within(lowest as usize..val_start as usize, (lowest + delta) as usize);

            // Every key *and* value slot after the deleted pair shifts down by
            // two table positions, not just the odd (key) ones.
            let mut j = i + 2;
            while j <= n {
                let shifted = self.ino(j) + delta;
                self.set_ino(j - 2, shifted);
                j += 1;
            }
        }

        self.set_n(n - 2);
        true
    }

    /// Redistribute this page's pairs between `self` and `new_page` based on
    /// one bit of each key's hash. `new_page` must already be empty; `self`
    /// is cleared as part of the split.
    pub fn spl_page(
        &mut self,
        new_page: &mut Page,
        sbit: u64,
    ) {
        debug_assert_eq!(new_page.n(), 0, "spl_page target must be empty");

        let n = self.n();
        let mut pairs = Vec::with_capacity(n as usize / 2);
        let mut i = 1u16;
        while i < n {
            let prev_end = self.prev_end(i);
            let key_start = self.ino(i);
            let val_start = self.ino(i + 1);
            let key = self.buf[key_start as usize..prev_end as usize].to_vec();
            let val = self.buf[val_start as usize..key_start as usize].to_vec();
            pairs.push((key, val));
            i += 2;
        }

        self.reset();

        for (key, val) in pairs {
            if hash(&key) as u64 & sbit != 0 {
                debug!("split: routing key to new page (sbit={})", sbit);
                new_page.put_pair(&key, &val);
            } else {
                self.put_pair(&key, &val);
            }
        }
    }

    /// Validate the page invariants of the on-disk format; `chk_page`
    /// rejecting a read page must not mutate any cache.
    pub fn chk_page(&self) -> bool {
        let n = self.n();
        if n % 2 != 0 || n as usize > PBLKSIZ / 2 {
            return false;
        }

        if n == 0 {
            return true;
        }

        let table_end = (n as usize + 1) * SHORTSIZE;
        if self.ino(n) as usize < table_end {
            return false;
        }

        let mut i = 1u16;
        while i < n {
            let prev_end = self.prev_end(i);
            let key_start = self.ino(i);
            let val_start = self.ino(i + 1);
            if !(val_start <= key_start && key_start <= prev_end) {
                return false;
            }
            i += 2;
        }

        true
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_page_is_valid() {
        let page = Page::new();
        assert!(page.chk_page());
        assert_eq!(page.n(), 0);
    }

    #[test]
    fn put_then_get_round_trips() {
        let mut page = Page::new();
        assert!(page.fit_pair(b"key".len() + b"value".len()));
        page.put_pair(b"key", b"value");
        assert!(page.chk_page());
        assert_eq!(page.get_pair(b"key"), Some(b"value".to_vec()));
        assert_eq!(page.get_pair(b"missing"), None);
    }

    #[test]
    fn dup_pair_reports_presence() {
        let mut page = Page::new();
        page.put_pair(b"k", b"v");
        assert!(page.dup_pair(b"k"));
        assert!(!page.dup_pair(b"other"));
    }

    #[test]
    fn get_nkey_is_one_based_insertion_order() {
        let mut page = Page::new();
        page.put_pair(b"k1", b"v1");
        page.put_pair(b"k2", b"v2");
        assert_eq!(page.get_nkey(1), Some(b"k1".to_vec()));
        assert_eq!(page.get_nkey(2), Some(b"k2".to_vec()));
        assert_eq!(page.get_nkey(3), None);
    }

    #[test]
    fn del_pair_last_entry_needs_no_shift() {
        let mut page = Page::new();
        page.put_pair(b"k1", b"v1");
        page.put_pair(b"k2", b"v2");
        assert!(page.del_pair(b"k2"));
        assert!(page.chk_page());
        assert_eq!(page.get_pair(b"k1"), Some(b"v1".to_vec()));
        assert_eq!(page.get_pair(b"k2"), None);
    }

    #[test]
    fn del_pair_middle_entry_compacts() {
        let mut page = Page::new();
        page.put_pair(b"k1", b"v1");
        page.put_pair(b"k2", b"v2");
        page.put_pair(b"k3", b"v3");
        assert!(page.del_pair(b"k1"));
        assert!(page.chk_page());
        assert_eq!(page.get_pair(b"k1"), None);
        assert_eq!(page.get_pair(b"k2"), Some(b"v2".to_vec()));
        assert_eq!(page.get_pair(b"k3"), Some(b"v3".to_vec()));
    }

    #[test]
    fn del_pair_middle_entry_with_differing_pair_sizes_preserves_bytes() {
        let mut page = Page::new();
        page.put_pair(b"A", b"BB");
        page.put_pair(b"CCC", b"D");
        page.put_pair(b"E", b"F");

        assert!(page.del_pair(b"A"));
        assert!(page.chk_page());

        assert_eq!(page.get_pair(b"A"), None);
        assert_eq!(page.get_pair(b"CCC"), Some(b"D".to_vec()));
        assert_eq!(page.get_pair(b"E"), Some(b"F".to_vec()));
        assert!(page.dup_pair(b"CCC"));
        assert!(page.dup_pair(b"E"));
    }

    #[test]
    fn del_pair_missing_key_returns_false() {
        let mut page = Page::new();
        page.put_pair(b"k1", b"v1");
        assert!(!page.del_pair(b"nope"));
        assert_eq!(page.n(), 2);
    }

    #[test]
    fn spl_page_partitions_by_hash_bit() {
        let mut keys = Vec::new();
        let mut page = Page::new();
        for i in 0..20u32 {
            let k = format!("key{}", i).into_bytes();
            let v = format!("val{}", i).into_bytes();
            assert!(page.fit_pair(k.len() + v.len()));
            page.put_pair(&k, &v);
            keys.push(k);
        }

        let sbit = 1u64;
        let mut new_page = Page::new();
        page.spl_page(&mut new_page, sbit);

        assert!(page.chk_page());
        assert!(new_page.chk_page());

        for k in &keys {
            let went_new = hash(k) as u64 & sbit != 0;
            if went_new {
                assert!(new_page.dup_pair(k));
                assert!(!page.dup_pair(k));
            } else {
                assert!(page.dup_pair(k));
                assert!(!new_page.dup_pair(k));
            }
        }
    }

    #[test]
    fn fit_pair_stops_accepting_once_the_page_fills() {
        let mut page = Page::new();
        // Fill until it no longer fits a reasonably sized pair.
        let mut i = 0u32;
        loop {
            let k = format!("key{:04}", i).into_bytes();
            let v = vec![b'x'; 20];
            if !page.fit_pair(k.len() + v.len()) {
                break;
            }
            page.put_pair(&k, &v);
            i += 1;
        }
        assert!(page.chk_page());
        assert!(i > 0);
    }
}
