pub(crate) mod data;
pub(crate) mod stats;
pub(crate) mod tree;

use std::io::{self, SeekFrom};
use std::path::Path;
use std::rc::Rc;

use crate::error::BufferError;

use self::data::{BufData, Data, FileMap, FileSlice};
use self::stats::Stats;
use self::tree::splay::splay;
use self::tree::{
    deep_copy, first, get, last, new_node, next, parent_of, prev, reset_size, set_left, set_parent,
    set_right, NodeRef,
};

/// An editable byte buffer over very large inputs.
///
/// The content lives in a splay tree whose leaves reference either slices of
/// a read-only memory-mapped backing file or small owned byte buffers. Edits
/// splay the target position to the root and rewire subtrees; memory grows
/// with the number of edits, not with the file size. `cut`, `copy` and
/// `paste` move or alias whole subtrees, so slicing a gigabyte out of a
/// buffer costs no byte copies.
///
/// Out-of-range offsets to `insert`, `seek` and `write` are reported as
/// [`BufferError`]; handing an out-of-range range to `cut`, `remove`, `copy`
/// or `paste` is a caller bug and panics.
#[derive(Debug)]
pub struct FileBuffer {
    root: NodeRef,
    pos: u64,
    file_backed: bool,
}

impl FileBuffer {
    /// Create an empty buffer.
    pub fn new() -> FileBuffer {
        FileBuffer {
            root: new_node(Data::Buf(BufData::new(&[]))),
            pos: 0,
            file_backed: false,
        }
    }

    /// Create a buffer holding a copy of `bytes`.
    pub fn from_bytes<B: AsRef<[u8]>>(bytes: B) -> FileBuffer {
        FileBuffer {
            root: new_node(Data::Buf(BufData::new(bytes.as_ref()))),
            pos: 0,
            file_backed: false,
        }
    }

    /// Open a buffer over a file. The file is memory-mapped once and never
    /// written; all edits live in the tree.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<FileBuffer, BufferError> {
        let map = FileMap::open(path.as_ref()).map_err(BufferError::Open)?;
        let len = map.len();
        let mut buf = if len == 0 {
            FileBuffer::new()
        } else {
            FileBuffer {
                root: new_node(Data::File(FileSlice::new(Rc::new(map), 0, len))),
                pos: 0,
                file_backed: false,
            }
        };
        buf.file_backed = true;
        Ok(buf)
    }

    /// Buffer length in bytes. Constant time.
    #[inline]
    pub fn len(&self) -> u64 {
        self.root.borrow().size
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether this buffer was opened over a backing file.
    #[inline]
    pub fn is_file_backed(&self) -> bool {
        self.file_backed
    }

    /// Move the read/write offset. The position one past the last byte is
    /// valid and is where appends through `write` land.
    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64, BufferError> {
        let size = self.len();
        let target = match pos {
            SeekFrom::Start(n) => n as i64,
            SeekFrom::Current(n) => self.pos as i64 + n,
            SeekFrom::End(n) => size as i64 + n,
        };
        if target < 0 || target as u64 > size {
            return Err(BufferError::BadOffset {
                offset: target,
                size,
            });
        }
        self.pos = target as u64;
        Ok(self.pos)
    }

    /// Copy bytes at the current offset into `dst` and advance the offset.
    /// Returns how many bytes were copied; 0 only at the end of the buffer.
    pub fn read(&mut self, dst: &mut [u8]) -> usize {
        if dst.is_empty() || self.pos >= self.len() {
            return 0;
        }
        self.find(self.pos);
        // the root leaf now starts exactly at the offset
        let mut filled = 0;
        let mut node = self.root.clone();
        loop {
            filled += node.borrow().data.read_at(&mut dst[filled..], 0);
            if filled == dst.len() {
                break;
            }
            match next(&node) {
                Some(succ) => node = succ,
                None => break,
            }
        }
        self.pos += filled as u64;
        filled
    }

    /// Overwrite `src` at the current offset and advance past it, growing
    /// the buffer when the write runs over the end. Writing with the offset
    /// already past the end is an error.
    pub fn write(&mut self, src: &[u8]) -> Result<usize, BufferError> {
        let size = self.len();
        if self.pos > size {
            return Err(BufferError::PastEof {
                offset: self.pos,
                size,
            });
        }
        if src.is_empty() {
            return Ok(0);
        }
        let overwritten = (src.len() as u64).min(size - self.pos);
        self.remove(self.pos, overwritten);
        self.insert(self.pos, src)?;
        self.pos += src.len() as u64;
        Ok(src.len())
    }

    /// Insert `bytes` before `offset`.
    pub fn insert<B: AsRef<[u8]>>(&mut self, offset: u64, bytes: B) -> Result<(), BufferError> {
        let bytes = bytes.as_ref();
        if offset > self.len() {
            return Err(BufferError::BadOffset {
                offset: offset as i64,
                size: self.len(),
            });
        }
        if bytes.is_empty() {
            return Ok(());
        }
        self.find_before(offset);
        self.make_appendable();
        self.root.borrow_mut().data.append_bytes(bytes);
        reset_size(&self.root);
        Ok(())
    }

    /// Insert a single byte before `offset`.
    pub fn insert_byte(&mut self, offset: u64, b: u8) -> Result<(), BufferError> {
        if offset > self.len() {
            return Err(BufferError::BadOffset {
                offset: offset as i64,
                size: self.len(),
            });
        }
        self.find_before(offset);
        self.make_appendable();
        self.root.borrow_mut().data.append_byte(b);
        reset_size(&self.root);
        Ok(())
    }

    /// Insert at the end of the buffer.
    #[inline]
    pub fn append<B: AsRef<[u8]>>(&mut self, bytes: B) {
        let end = self.len();
        self.insert(end, bytes)
            .expect("appending at the end is always in bounds");
    }

    /// Remove `len` bytes at `offset`.
    pub fn remove(&mut self, offset: u64, len: u64) {
        self.cut(offset, len);
    }

    /// Slice `[offset, offset + len)` out of the buffer and return it as a
    /// buffer of its own. The range must lie within the buffer.
    pub fn cut(&mut self, offset: u64, len: u64) -> FileBuffer {
        let size = self.len();
        assert!(
            offset <= size && len <= size - offset,
            "cut: range {}..{} over buffer of {} bytes",
            offset,
            offset + len,
            size
        );
        if len == 0 {
            return FileBuffer::new();
        }
        if len == size {
            let root = std::mem::replace(&mut self.root, new_node(Data::Buf(BufData::new(&[]))));
            return FileBuffer {
                root,
                pos: 0,
                file_backed: false,
            };
        }

        let cut_root = if offset == 0 {
            // the left subtree after find(len) is exactly the cut
            self.find(len);
            let head = self.root.borrow().left.clone();
            let head = head.expect("non-empty cut has a leading subtree");
            set_left(&self.root, None);
            set_parent(&head, None);
            head
        } else {
            self.find_before(offset);
            let detached = self.root.borrow().right.clone();
            let detached = detached.expect("non-empty cut has a trailing subtree");
            set_parent(&detached, None);
            let mut tail = FileBuffer {
                root: detached,
                pos: 0,
                file_backed: false,
            };
            tail.find_before(len);
            let rest = tail.root.borrow().right.clone();
            set_right(&self.root, rest);
            set_right(&tail.root, None);
            tail.root
        };
        self.coalesce_root();
        FileBuffer {
            root: cut_root,
            pos: 0,
            file_backed: false,
        }
    }

    /// Non-destructive slice: the returned buffer is independent of `self`.
    pub fn copy(&mut self, offset: u64, len: u64) -> FileBuffer {
        let cut = self.cut(offset, len);
        let copy = FileBuffer {
            root: deep_copy(&cut.root),
            pos: 0,
            file_backed: false,
        };
        self.paste(offset, &cut);
        copy
    }

    /// Splice a clone of `other` into the buffer before `offset`. The source
    /// buffer is left untouched and stays usable.
    pub fn paste(&mut self, offset: u64, other: &FileBuffer) {
        let size = self.len();
        assert!(
            offset <= size,
            "paste: offset {} over buffer of {} bytes",
            offset,
            size
        );
        if other.is_empty() {
            return;
        }
        let clone = deep_copy(&other.root);
        if size == 0 {
            self.root = clone;
            return;
        }
        if offset == 0 {
            let old_root = std::mem::replace(&mut self.root, clone);
            let back = last(&self.root);
            self.root = splay(&back);
            set_right(&self.root, Some(old_root));
        } else {
            self.find_before(offset);
            let tail = self.root.borrow().right.clone();
            set_right(&self.root, Some(clone));
            let back = last(&self.root);
            self.root = splay(&back);
            set_right(&self.root, tail);
        }
        self.coalesce_root();
    }

    /// Call `f` with successive in-order slices that concatenate to the
    /// buffer content. Slices never exceed `MAX_LEAF` bytes, so iterating a
    /// mapped multi-gigabyte region stays cheap per call. Returning `true`
    /// from the callback stops the walk.
    pub fn iter<F: FnMut(&[u8]) -> bool>(&self, f: F) {
        self.iter_from(0, f);
    }

    /// Like [`iter`](Self::iter), starting at `offset`.
    pub fn iter_from<F: FnMut(&[u8]) -> bool>(&self, offset: u64, mut f: F) {
        if offset >= self.len() {
            return;
        }
        let (node, in_leaf) = get(&self.root, offset);
        let mut skip = in_leaf;
        let mut node = Some(node);
        while let Some(cur) = node {
            if cur.borrow().data.iter_chunks(skip, &mut f) {
                return;
            }
            skip = 0;
            node = next(&cur);
        }
    }

    /// Stream the whole content into `writer`.
    pub fn dump<W: io::Write>(&self, mut writer: W) -> io::Result<()> {
        let mut result = Ok(());
        self.iter(|chunk| {
            result = writer.write_all(chunk);
            result.is_err()
        });
        result
    }

    /// Snapshot the tree shape. Walks every node; debugging only.
    pub fn stats(&self) -> Stats {
        stats::collect(&self.root)
    }

    /// Splay the leaf covering `offset` to the root and split it so the root
    /// leaf starts exactly at `offset` (or ends there, when `offset` is the
    /// buffer size).
    fn find(&mut self, offset: u64) {
        assert!(
            offset <= self.len(),
            "find: offset {} over buffer of {} bytes",
            offset,
            self.len()
        );
        let (node, in_leaf) = get(&self.root, offset);
        self.root = splay(&node);
        let leaf_len = self.root.borrow().data.len();
        if in_leaf == 0 || in_leaf == leaf_len {
            return;
        }
        let (ldata, rdata) = self.root.borrow().data.split(in_leaf);
        let l = new_node(ldata);
        let r = new_node(rdata);
        let (old_left, old_right) = {
            let root = self.root.borrow();
            (root.left.clone(), root.right.clone())
        };
        set_left(&l, old_left);
        set_right(&r, old_right);
        set_left(&r, Some(l));
        self.root = r;
    }

    /// Make the root the leaf whose in-order run ends exactly at `offset`,
    /// so appending to it inserts at `offset`. At offset 0 a fresh empty
    /// leaf is installed in front; it is filled by the insert that follows.
    fn find_before(&mut self, offset: u64) {
        let before = if offset >= self.len() {
            last(&self.root)
        } else {
            self.find(offset);
            match prev(&self.root) {
                Some(node) => node,
                None => {
                    debug_assert!(
                        self.root.borrow().left.is_none(),
                        "leaf at offset 0 carries a left subtree"
                    );
                    let node = new_node(Data::Buf(BufData::new(&[])));
                    set_left(&self.root, Some(node.clone()));
                    node
                }
            }
        };
        self.root = splay(&before);
    }

    /// Give the root an appendable leaf, hanging the current root under a
    /// fresh empty one when its leaf is frozen or file-backed.
    fn make_appendable(&mut self) {
        if self.root.borrow().data.appendable() {
            return;
        }
        let node = new_node(Data::Buf(BufData::new(&[])));
        let old_right = self.root.borrow().right.clone();
        set_right(&node, old_right);
        set_right(&self.root, None);
        set_left(&node, Some(self.root.clone()));
        self.root = node;
    }

    /// Try to fuse the root leaf with its in-order successor. Cut and paste
    /// leave their seam at the root, so this is where split slices meet
    /// again.
    fn coalesce_root(&mut self) {
        let succ = {
            let root = self.root.borrow();
            match &root.right {
                Some(r) => first(r),
                None => return,
            }
        };
        let combined = {
            let root = self.root.borrow();
            let succ = succ.borrow();
            root.data.combine(&succ.data)
        };
        let combined = match combined {
            Some(data) => data,
            None => return,
        };
        // unlink the successor; as a leftmost node it has no left child
        let succ_right = succ.borrow().right.clone();
        let parent = parent_of(&succ).expect("in-order successor has a parent");
        if Rc::ptr_eq(&parent, &self.root) {
            set_right(&parent, succ_right);
        } else {
            set_left(&parent, succ_right);
            let mut cur = parent;
            while let Some(p) = parent_of(&cur) {
                reset_size(&p);
                cur = p;
            }
        }
        self.root.borrow_mut().data = combined;
        reset_size(&self.root);
    }
}

impl Default for FileBuffer {
    fn default() -> FileBuffer {
        FileBuffer::new()
    }
}

impl io::Read for FileBuffer {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(FileBuffer::read(self, buf))
    }
}

impl io::Write for FileBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        FileBuffer::write(self, buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl io::Seek for FileBuffer {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        FileBuffer::seek(self, pos).map_err(io::Error::from)
    }
}

impl<B: AsRef<[u8]>> From<B> for FileBuffer {
    fn from(bytes: B) -> FileBuffer {
        FileBuffer::from_bytes(bytes)
    }
}

impl From<&FileBuffer> for Vec<u8> {
    fn from(buf: &FileBuffer) -> Vec<u8> {
        let mut out = Vec::with_capacity(buf.len() as usize);
        buf.iter(|chunk| {
            out.extend_from_slice(chunk);
            false
        });
        out
    }
}
