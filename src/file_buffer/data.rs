use std::fmt;
use std::fs::File;
use std::io;
use std::path::Path;
use std::rc::Rc;

use memmap::Mmap;

/// Inline leaves freeze once they grow past this many bytes.
#[cfg(not(test))]
pub(crate) const MAX_LEAF: usize = 4096;
/// Small limit under test so the split and freeze paths are exercised densely.
#[cfg(test)]
pub(crate) const MAX_LEAF: usize = 8;

/// A contiguous byte region referenced by one tree node. Either owned bytes
/// or a slice of the memory-mapped backing file.
#[derive(Debug)]
pub(crate) enum Data {
    Buf(BufData),
    File(FileSlice),
}

impl Data {
    #[inline]
    pub fn len(&self) -> u64 {
        match self {
            Data::Buf(buf) => buf.len() as u64,
            Data::File(file) => file.len(),
        }
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        match self {
            Data::Buf(buf) => buf.as_slice(),
            Data::File(file) => file.as_slice(),
        }
    }

    /// Copy up to `dst.len()` bytes starting at `off` into `dst`.
    /// Returns the number of bytes copied, 0 at or past the end.
    pub fn read_at(&self, dst: &mut [u8], off: u64) -> usize {
        let src = self.as_slice();
        if off as usize >= src.len() {
            return 0;
        }
        let src = &src[off as usize..];
        let n = dst.len().min(src.len());
        dst[..n].copy_from_slice(&src[..n]);
        n
    }

    /// Call `f` with successive subslices of at most `MAX_LEAF` bytes
    /// starting at `from`. Returns true when the callback stopped the walk.
    pub fn iter_chunks<F: FnMut(&[u8]) -> bool>(&self, from: u64, f: &mut F) -> bool {
        let slice = self.as_slice();
        if from as usize >= slice.len() {
            return false;
        }
        let mut rest = &slice[from as usize..];
        while !rest.is_empty() {
            let n = rest.len().min(MAX_LEAF);
            if f(&rest[..n]) {
                return true;
            }
            rest = &rest[n..];
        }
        false
    }

    #[inline]
    pub fn appendable(&self) -> bool {
        matches!(self, Data::Buf(buf) if buf.appendable())
    }

    pub fn append_byte(&mut self, b: u8) {
        match self {
            Data::Buf(buf) => buf.append_byte(b),
            Data::File(_) => panic!("append on a file leaf"),
        }
    }

    pub fn append_bytes(&mut self, bytes: &[u8]) {
        match self {
            Data::Buf(buf) => buf.append_bytes(bytes),
            Data::File(_) => panic!("append on a file leaf"),
        }
    }

    /// Split into `[0, at)` and `[at, len)`. Both halves are frozen; no bytes
    /// are copied in either variant.
    pub fn split(&self, at: u64) -> (Data, Data) {
        match self {
            Data::Buf(buf) => {
                let (l, r) = buf.split(at as usize);
                (Data::Buf(l), Data::Buf(r))
            }
            Data::File(file) => {
                let (l, r) = file.split(at);
                (Data::File(l), Data::File(r))
            }
        }
    }

    /// Deep copy for thawed inline leaves (future appends to the original
    /// must not be visible through the copy), cheap alias for everything else.
    pub fn copy(&self) -> Data {
        match self {
            Data::Buf(buf) => Data::Buf(buf.copy()),
            Data::File(file) => Data::File(file.clone()),
        }
    }

    /// Fuse with the in-order following leaf `other` when cheap: two small
    /// inline leaves concatenate, two adjacent slices of the same mapping
    /// become one slice. Anything else stays fragmented.
    pub fn combine(&self, other: &Data) -> Option<Data> {
        match (self, other) {
            (Data::Buf(a), Data::Buf(b)) if a.len() < MAX_LEAF && b.len() < MAX_LEAF => {
                let mut bytes = Vec::with_capacity(a.len() + b.len());
                bytes.extend_from_slice(a.as_slice());
                bytes.extend_from_slice(b.as_slice());
                Some(Data::Buf(BufData::new_static(bytes)))
            }
            (Data::File(a), Data::File(b))
                if Rc::ptr_eq(&a.map, &b.map) && a.offset + a.len == b.offset =>
            {
                Some(Data::File(FileSlice {
                    map: a.map.clone(),
                    offset: a.offset,
                    len: a.len + b.len,
                }))
            }
            _ => None,
        }
    }
}

/// Owned bytes behind a shared allocation. A thawed leaf owns its allocation
/// uniquely and may be appended to; splitting hands out frozen `(start, len)`
/// views of the same allocation instead of copying.
#[derive(Debug)]
pub(crate) struct BufData {
    bytes: Rc<Vec<u8>>,
    start: usize,
    len: usize,
    frozen: bool,
}

impl BufData {
    /// Copies `bytes` into a fresh leaf, thawed iff it fits under `MAX_LEAF`.
    pub fn new(bytes: &[u8]) -> BufData {
        BufData {
            len: bytes.len(),
            frozen: bytes.len() > MAX_LEAF,
            bytes: Rc::new(bytes.to_vec()),
            start: 0,
        }
    }

    /// Takes ownership of `bytes` as a permanently frozen leaf.
    pub fn new_static(bytes: Vec<u8>) -> BufData {
        BufData {
            len: bytes.len(),
            frozen: true,
            bytes: Rc::new(bytes),
            start: 0,
        }
    }

    fn from_shared(bytes: Rc<Vec<u8>>, start: usize, len: usize) -> BufData {
        BufData {
            bytes,
            start,
            len,
            frozen: true,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[self.start..self.start + self.len]
    }

    #[inline]
    pub fn appendable(&self) -> bool {
        !self.frozen
    }

    pub fn append_byte(&mut self, b: u8) {
        assert!(!self.frozen, "append on a frozen leaf");
        let bytes = Rc::get_mut(&mut self.bytes).expect("thawed leaf is uniquely owned");
        bytes.push(b);
        self.len = bytes.len();
        self.frozen = self.len > MAX_LEAF;
    }

    pub fn append_bytes(&mut self, b: &[u8]) {
        assert!(!self.frozen, "append on a frozen leaf");
        let bytes = Rc::get_mut(&mut self.bytes).expect("thawed leaf is uniquely owned");
        bytes.extend_from_slice(b);
        self.len = bytes.len();
        self.frozen = self.len > MAX_LEAF;
    }

    /// Both halves alias the same allocation and come out frozen.
    pub fn split(&self, at: usize) -> (BufData, BufData) {
        assert!(
            0 < at && at < self.len,
            "split at {} inside leaf of {} bytes",
            at,
            self.len
        );
        let left = BufData::from_shared(self.bytes.clone(), self.start, at);
        let right = BufData::from_shared(self.bytes.clone(), self.start + at, self.len - at);
        (left, right)
    }

    pub fn copy(&self) -> BufData {
        if self.frozen {
            BufData::from_shared(self.bytes.clone(), self.start, self.len)
        } else {
            BufData::new(self.as_slice())
        }
    }
}

/// A `(map, offset, len)` descriptor over the read-only mapping of the
/// backing file. Splitting is offset arithmetic; no file bytes are touched.
#[derive(Debug, Clone)]
pub(crate) struct FileSlice {
    map: Rc<FileMap>,
    offset: u64,
    len: u64,
}

impl FileSlice {
    pub fn new(map: Rc<FileMap>, offset: u64, len: u64) -> FileSlice {
        FileSlice { map, offset, len }
    }

    #[inline]
    pub fn len(&self) -> u64 {
        self.len
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        let start = self.offset as usize;
        &self.map.as_slice()[start..start + self.len as usize]
    }

    pub fn split(&self, at: u64) -> (FileSlice, FileSlice) {
        assert!(
            0 < at && at < self.len,
            "split at {} inside slice of {} bytes",
            at,
            self.len
        );
        let left = FileSlice {
            map: self.map.clone(),
            offset: self.offset,
            len: at,
        };
        let right = FileSlice {
            map: self.map.clone(),
            offset: self.offset + at,
            len: self.len - at,
        };
        (left, right)
    }
}

/// The mapping itself, shared by every slice that references it and released
/// when the last one drops. An empty file maps to nothing.
pub(crate) struct FileMap {
    map: Option<Mmap>,
}

impl FileMap {
    pub fn open(path: &Path) -> io::Result<FileMap> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        if len == 0 {
            return Ok(FileMap { map: None });
        }
        // The mapping is read-only and the file is never written through it.
        let map = unsafe { Mmap::map(&file)? };
        log::debug!("mapped {} bytes from {}", map.len(), path.display());
        Ok(FileMap { map: Some(map) })
    }

    #[inline]
    pub fn len(&self) -> u64 {
        self.map.as_ref().map(|m| m.len() as u64).unwrap_or(0)
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        self.map.as_deref().unwrap_or(&[])
    }
}

impl fmt::Debug for FileMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileMap").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod test {
    use std::io::Write;

    use super::*;

    fn file_map(bytes: &[u8]) -> Rc<FileMap> {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(bytes).unwrap();
        file.flush().unwrap();
        let map = FileMap::open(file.path()).unwrap();
        assert_eq!(map.len(), bytes.len() as u64);
        Rc::new(map)
    }

    #[test]
    fn append_freezes_past_max_leaf() {
        let mut buf = BufData::new(b"");
        for b in 0..MAX_LEAF as u8 {
            buf.append_byte(b);
            assert!(buf.appendable());
        }
        buf.append_byte(0xff);
        assert_eq!(buf.len(), MAX_LEAF + 1);
        assert!(!buf.appendable());
    }

    #[test]
    fn append_bytes_freezes_past_max_leaf() {
        let mut buf = BufData::new(b"ab");
        buf.append_bytes(b"cd");
        assert!(buf.appendable());
        assert_eq!(buf.as_slice(), b"abcd");

        buf.append_bytes(&vec![b'x'; MAX_LEAF]);
        assert!(!buf.appendable());
        assert_eq!(buf.len(), 4 + MAX_LEAF);
    }

    #[test]
    fn new_over_max_leaf_starts_frozen() {
        let buf = BufData::new(&vec![b'x'; MAX_LEAF + 1]);
        assert!(!buf.appendable());

        let buf = BufData::new(&vec![b'x'; MAX_LEAF]);
        assert!(buf.appendable());
    }

    #[test]
    fn split_freezes_both_halves() {
        let buf = BufData::new(b"abcdef");
        let (l, r) = buf.split(2);
        assert_eq!(l.as_slice(), b"ab");
        assert_eq!(r.as_slice(), b"cdef");
        assert!(!l.appendable());
        assert!(!r.appendable());
        // both halves view the original allocation
        assert!(Rc::ptr_eq(&l.bytes, &r.bytes));
    }

    #[test]
    fn copy_of_thawed_is_independent() {
        let mut buf = BufData::new(b"abc");
        let copy = buf.copy();
        buf.append_byte(b'd');
        assert_eq!(buf.as_slice(), b"abcd");
        assert_eq!(copy.as_slice(), b"abc");
        assert!(copy.appendable());
    }

    #[test]
    fn copy_of_frozen_aliases() {
        let buf = BufData::new_static(b"abc".to_vec());
        let copy = buf.copy();
        assert!(Rc::ptr_eq(&buf.bytes, &copy.bytes));
        assert!(!copy.appendable());
    }

    #[test]
    fn read_at_bounds() {
        let data = Data::Buf(BufData::new(b"abcdef"));
        let mut dst = [0u8; 4];
        assert_eq!(data.read_at(&mut dst, 0), 4);
        assert_eq!(&dst, b"abcd");
        assert_eq!(data.read_at(&mut dst, 4), 2);
        assert_eq!(&dst[..2], b"ef");
        assert_eq!(data.read_at(&mut dst, 6), 0);
        assert_eq!(data.read_at(&mut dst, 7), 0);
    }

    #[test]
    fn file_slice_split_is_offset_arithmetic() {
        let map = file_map(b"abcdefgh");
        let slice = FileSlice::new(map, 0, 8);
        let (l, r) = slice.split(3);
        assert_eq!(l.as_slice(), b"abc");
        assert_eq!(r.as_slice(), b"defgh");
        assert_eq!(r.offset, 3);
    }

    #[test]
    fn file_leaf_never_appendable() {
        let map = file_map(b"abc");
        let data = Data::File(FileSlice::new(map, 0, 3));
        assert!(!data.appendable());
    }

    #[test]
    fn combine_small_inline() {
        let a = Data::Buf(BufData::new(b"ab"));
        let b = Data::Buf(BufData::new(b"cd"));
        let fused = a.combine(&b).unwrap();
        assert_eq!(fused.as_slice(), b"abcd");
        assert!(!fused.appendable());
    }

    #[test]
    fn combine_rejects_large_inline() {
        let a = Data::Buf(BufData::new(&vec![b'x'; MAX_LEAF]));
        let b = Data::Buf(BufData::new(b"y"));
        assert!(a.combine(&b).is_none());
    }

    #[test]
    fn combine_adjacent_file_slices() {
        let map = file_map(b"abcdefgh");
        let slice = FileSlice::new(map, 0, 8);
        let (l, r) = slice.split(5);
        let fused = Data::File(l).combine(&Data::File(r)).unwrap();
        assert_eq!(fused.as_slice(), b"abcdefgh");
        assert_eq!(fused.len(), 8);
    }

    #[test]
    fn combine_rejects_disjoint_file_slices() {
        let map = file_map(b"abcdefgh");
        let a = Data::File(FileSlice::new(map.clone(), 0, 2));
        let b = Data::File(FileSlice::new(map, 5, 3));
        assert!(a.combine(&b).is_none());

        let other = file_map(b"abcdefgh");
        let c = Data::File(FileSlice::new(other, 2, 3));
        let a = Data::File(FileSlice::new(file_map(b"abcdefgh"), 0, 2));
        assert!(a.combine(&c).is_none());
    }

    #[test]
    fn combine_rejects_mixed_kinds() {
        let map = file_map(b"abc");
        let file = Data::File(FileSlice::new(map, 0, 3));
        let buf = Data::Buf(BufData::new(b"xy"));
        assert!(buf.combine(&file).is_none());
        assert!(file.combine(&buf).is_none());
    }

    #[test]
    fn empty_file_maps_to_nothing() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let map = FileMap::open(file.path()).unwrap();
        assert_eq!(map.len(), 0);
        assert!(map.as_slice().is_empty());
    }
}
