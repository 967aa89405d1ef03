//! Growable byte buffer with separate read/write cursors and a reclaimable
//! prepend region.
//!
//! Layout: `[0, read_pos)` is prependable (already consumed, reclaimable by
//! compaction), `[read_pos, write_pos)` is readable, `[write_pos, capacity)`
//! is writable. `ensure_writable` is the only growth point.

use std::alloc::{self, Layout};
use std::io::Write;
use std::ptr::{self, NonNull};

/// A contiguous byte buffer with a readable region and a writable region.
#[derive(Debug)]
pub struct Buffer {
    ptr: NonNull<u8>,
    capacity: usize,
    read_pos: usize,
    write_pos: usize,
    init_capacity: usize,
}

// SAFETY: Buffer owns its allocation exclusively; it is Send as long as its
// contents (bytes) are, which they always are.
unsafe impl Send for Buffer {}

impl Buffer {
    /// Creates a buffer with at least `init_capacity` bytes of initial
    /// capacity.
    pub fn new(init_capacity: usize) -> Self {
        let init_capacity = init_capacity.max(1);
        let layout = Layout::array::<u8>(init_capacity).unwrap();
        // SAFETY: layout is non-zero sized.
        let raw = unsafe { alloc::alloc(layout) };
        let ptr = NonNull::new(raw).unwrap_or_else(|| alloc::handle_alloc_error(layout));
        Self {
            ptr,
            capacity: init_capacity,
            read_pos: 0,
            write_pos: 0,
            init_capacity,
        }
    }

    /// Bytes available to read: `[read_pos, write_pos)`.
    pub fn readable_len(&self) -> usize {
        self.write_pos - self.read_pos
    }

    /// Bytes available to write: `[write_pos, capacity)`.
    pub fn writable_len(&self) -> usize {
        self.capacity - self.write_pos
    }

    /// Bytes reclaimable by compaction: `[0, read_pos)`.
    pub fn prependable_len(&self) -> usize {
        self.read_pos
    }

    /// Pointer to the start of the readable region. Invalidated by any
    /// mutating call.
    pub fn read_ptr(&self) -> *const u8 {
        // SAFETY: read_pos <= capacity, within the allocation.
        unsafe { self.ptr.as_ptr().add(self.read_pos) }
    }

    /// Pointer to the start of the writable region. Invalidated by any
    /// mutating call.
    pub fn write_ptr(&mut self) -> *mut u8 {
        // SAFETY: write_pos <= capacity, within the allocation.
        unsafe { self.ptr.as_ptr().add(self.write_pos) }
    }

    /// The readable region as a slice.
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: [read_pos, write_pos) is initialized and within bounds.
        unsafe { std::slice::from_raw_parts(self.read_ptr(), self.readable_len()) }
    }

    /// Marks `n` bytes as written, advancing `write_pos`. Requires
    /// `n <= writable_len()`.
    pub fn has_written(&mut self, n: usize) {
        debug_assert!(n <= self.writable_len());
        self.write_pos += n;
    }

    /// Consumes `n` bytes from the readable region. Requires
    /// `n <= readable_len()`.
    pub fn retrieve(&mut self, n: usize) {
        debug_assert!(n <= self.readable_len());
        self.read_pos += n;
        if self.read_pos == self.write_pos {
            self.read_pos = 0;
            self.write_pos = 0;
        }
    }

    /// Consumes bytes up to (but not including) `end`, which must point
    /// somewhere within `[read_ptr(), read_ptr() + readable_len()]`.
    pub fn retrieve_until(&mut self, end: *const u8) {
        let start = self.read_ptr();
        debug_assert!(end as usize >= start as usize);
        let n = end as usize - start as usize;
        self.retrieve(n);
    }

    /// Drains the entire readable region, resetting both cursors.
    pub fn retrieve_all(&mut self) {
        self.read_pos = 0;
        self.write_pos = 0;
    }

    /// Drains the readable region into an owned `String`, resetting both
    /// cursors. The only operation that both drains and resets.
    pub fn retrieve_all_as_string(&mut self) -> String {
        let s = String::from_utf8_lossy(self.as_slice()).into_owned();
        self.retrieve_all();
        s
    }

    /// Ensures at least `len` bytes of writable space, growing or
    /// compacting as needed. The only growth point.
    pub fn ensure_writable(&mut self, len: usize) {
        if self.writable_len() >= len {
            return;
        }
        if self.writable_len() + self.prependable_len() >= len {
            self.compact();
        } else {
            self.grow_to(self.write_pos + len + 1);
        }
    }

    /// Appends `bytes` to the writable region, growing first if needed.
    /// Never partial.
    pub fn append(&mut self, bytes: &[u8]) {
        self.ensure_writable(bytes.len());
        let dst = self.write_ptr();
        // SAFETY: ensure_writable just guaranteed bytes.len() writable bytes
        // starting at write_ptr, and src/dst cannot overlap (src is a
        // caller-owned slice, dst is inside our own allocation).
        unsafe { ptr::copy_nonoverlapping(bytes.as_ptr(), dst, bytes.len()) };
        self.has_written(bytes.len());
    }

    fn compact(&mut self) {
        let readable = self.readable_len();
        if readable > 0 {
            // SAFETY: [read_pos, write_pos) and [0, readable) are both
            // within the same allocation and may overlap; copy handles that.
            unsafe {
                ptr::copy(self.read_ptr(), self.ptr.as_ptr(), readable);
            }
        }
        self.read_pos = 0;
        self.write_pos = readable;
    }

    fn grow_to(&mut self, new_capacity: usize) {
        let new_layout = Layout::array::<u8>(new_capacity).unwrap();
        let old_layout = Layout::array::<u8>(self.capacity).unwrap();
        // SAFETY: old_layout matches the allocation made in `new`/prior
        // `grow_to`; new_layout is non-zero sized.
        let raw = unsafe { alloc::realloc(self.ptr.as_ptr(), old_layout, new_layout.size()) };
        self.ptr = NonNull::new(raw).unwrap_or_else(|| alloc::handle_alloc_error(new_layout));
        self.capacity = new_capacity;
    }
}

impl Default for Buffer {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        let layout = Layout::array::<u8>(self.capacity).unwrap();
        // SAFETY: matches the allocation made in `new`/`grow_to`.
        unsafe { alloc::dealloc(self.ptr.as_ptr(), layout) };
    }
}

impl Write for Buffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.append(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_then_retrieve_round_trips() {
        let mut buf = Buffer::new(4);
        buf.append(b"hello");
        assert_eq!(buf.readable_len(), 5);
        assert_eq!(buf.as_slice(), b"hello");
        buf.retrieve(5);
        assert_eq!(buf.readable_len(), 0);
    }

    #[test]
    fn append_preserves_existing_readable_order() {
        let mut buf = Buffer::new(4);
        buf.append(b"ab");
        buf.retrieve(1);
        buf.append(b"cd");
        assert_eq!(buf.as_slice(), b"bcd");
    }

    #[test]
    fn compaction_reclaims_prepended_space_without_growing() {
        let mut buf = Buffer::new(16);
        buf.append(b"0123456789abcdef");
        buf.retrieve(15);
        let cap_before = buf.capacity;
        buf.append(b"xyz");
        assert_eq!(buf.capacity, cap_before);
        assert_eq!(buf.as_slice(), b"fxyz");
    }

    #[test]
    fn grows_when_compaction_is_not_enough() {
        let mut buf = Buffer::new(4);
        buf.append(b"ab");
        buf.ensure_writable(100);
        assert!(buf.writable_len() >= 100);
        assert_eq!(buf.as_slice(), b"ab");
    }

    #[test]
    fn retrieve_until_consumes_exact_prefix() {
        let mut buf = Buffer::new(16);
        buf.append(b"GET / HTTP/1.1\r\n");
        let pos = buf.as_slice().windows(2).position(|w| w == b"\r\n").unwrap();
        // SAFETY: pointer derived from this buffer's own readable region.
        let end = unsafe { buf.read_ptr().add(pos + 2) };
        buf.retrieve_until(end);
        assert_eq!(buf.readable_len(), 0);
    }

    #[test]
    fn retrieve_all_as_string_drains_and_resets() {
        let mut buf = Buffer::new(8);
        buf.append(b"hi there");
        let s = buf.retrieve_all_as_string();
        assert_eq!(s, "hi there");
        assert_eq!(buf.readable_len(), 0);
        assert_eq!(buf.prependable_len(), 0);
    }
}
