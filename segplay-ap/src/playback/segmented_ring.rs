//! Segmented lock-free ring buffer for PCM bytes
//!
//! Single-producer single-consumer byte ring shared between the fill thread
//! (writer) and the real-time render callback (reader).
//!
//! Design:
//! - The arena is divided into `segment_count` contiguous segments. A region
//!   handed out by `request_write`/`request_read` never crosses a segment
//!   boundary or the end of the arena, so callers copy with a single
//!   `copy_from_slice` and never special-case wraparound.
//! - Cursors are monotonically increasing byte totals. The writer stores only
//!   `written`, the reader stores only `read`; each side publishes with a
//!   Release store and observes the other side with an Acquire load.
//! - `written - read` is always in `[0, capacity]`.
//! - Regions are RAII guards borrowed from their half, so at most one region
//!   per side is outstanding. Dropping a region without committing commits
//!   nothing.
//!
//! ```text
//!   fill thread                                    render callback
//!  request_write ─┐                               ┌─ request_read
//!                 ▼                               ▼
//!   | seg 0 | seg 1 | seg 2 | seg 3 |   (capacity bytes)
//!                 ▲                               ▲
//!   commit ───────┘ (Release written)  (Release read) └─── commit
//! ```

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Storage and cursors shared by both halves
struct Shared {
    arena: Box<[UnsafeCell<u8>]>,
    capacity: usize,
    segment_size: usize,
    segment_count: usize,

    /// Total bytes committed by the writer. Stored only by the writer half.
    written: AtomicU64,

    /// Total bytes committed by the reader. Stored only by the reader half.
    read: AtomicU64,
}

// SAFETY: bytes in the arena are only touched through regions. A write region
// covers free bytes (outside [read, written)) and a read region covers bytes in
// [read, written); the cursor protocol keeps the two disjoint, and each half
// hands out at most one region at a time (regions borrow the half mutably).
unsafe impl Sync for Shared {}

impl Shared {
    /// Length of the span starting at `pos`, clipped to `len` and to the next segment boundary
    fn clip(&self, pos: usize, len: usize) -> usize {
        let segment_end = (pos / self.segment_size + 1) * self.segment_size;
        let boundary = segment_end.min(self.capacity);
        len.min(boundary - pos)
    }

    fn position(&self, cursor: u64) -> usize {
        (cursor % self.capacity as u64) as usize
    }

    fn occupied(&self) -> usize {
        let written = self.written.load(Ordering::Acquire);
        let read = self.read.load(Ordering::Acquire);
        written.saturating_sub(read) as usize
    }

    /// # Safety
    /// `offset..offset + len` must lie in the arena and be owned by the caller's side.
    #[allow(clippy::mut_from_ref)]
    unsafe fn span_mut(&self, offset: usize, len: usize) -> &mut [u8] {
        let base = UnsafeCell::raw_get(self.arena.as_ptr().add(offset));
        std::slice::from_raw_parts_mut(base, len)
    }

    /// # Safety
    /// `offset..offset + len` must lie in the arena and be owned by the caller's side.
    unsafe fn span(&self, offset: usize, len: usize) -> &[u8] {
        let base = UnsafeCell::raw_get(self.arena.as_ptr().add(offset));
        std::slice::from_raw_parts(base as *const u8, len)
    }
}

/// Segmented SPSC byte ring buffer
///
/// Construct with [`SegmentedRingBuffer::new`] and [`split`](Self::split) into
/// a writer half (fill thread) and a reader half (render callback).
pub struct SegmentedRingBuffer {
    shared: Arc<Shared>,
}

impl SegmentedRingBuffer {
    /// Create a ring buffer of `capacity` bytes divided into `segment_count` segments
    ///
    /// Segment size is `ceil(capacity / segment_count)`; the last segment is
    /// shorter when `capacity` is not a multiple of `segment_count`. Rounding
    /// can leave fewer segments than requested (10 bytes in 6 segments gives
    /// five 2-byte segments); [`segment_count`](SegmentReader::segment_count)
    /// reports the effective number.
    ///
    /// # Panics
    /// Panics if `capacity` or `segment_count` is zero, or `segment_count > capacity`.
    pub fn new(capacity: usize, segment_count: usize) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be non-zero");
        assert!(
            segment_count > 0 && segment_count <= capacity,
            "segment count must be in 1..=capacity"
        );

        let segment_size = capacity.div_ceil(segment_count);
        let effective_count = capacity.div_ceil(segment_size);

        debug!(
            "Creating segmented ring buffer: capacity={} bytes, segments={}, segment_size={} bytes",
            capacity, effective_count, segment_size
        );
        if effective_count != segment_count {
            debug!(
                "Requested {} segments, {} fit after rounding segment size",
                segment_count, effective_count
            );
        }

        let arena: Box<[UnsafeCell<u8>]> = (0..capacity).map(|_| UnsafeCell::new(0)).collect();

        Self {
            shared: Arc::new(Shared {
                arena,
                capacity,
                segment_size,
                segment_count: effective_count,
                written: AtomicU64::new(0),
                read: AtomicU64::new(0),
            }),
        }
    }

    /// Split into writer and reader halves
    ///
    /// Each half can be moved to a different thread.
    pub fn split(self) -> (SegmentWriter, SegmentReader) {
        (
            SegmentWriter {
                shared: Arc::clone(&self.shared),
            },
            SegmentReader {
                shared: self.shared,
            },
        )
    }

    /// Reset both cursors to zero
    ///
    /// Taking both halves mutably guarantees neither side holds a region, so
    /// the buffer is quiescent. Afterwards it behaves like a freshly
    /// constructed buffer of the same capacity.
    ///
    /// # Panics
    /// Panics if the halves come from different buffers.
    pub fn reset(writer: &mut SegmentWriter, reader: &mut SegmentReader) {
        assert!(
            Arc::ptr_eq(&writer.shared, &reader.shared),
            "writer and reader belong to different ring buffers"
        );
        let shared = &writer.shared;
        shared.read.store(0, Ordering::Release);
        shared.written.store(0, Ordering::Release);
        debug!("Segmented ring buffer reset");
    }
}

/// Ring buffer fill statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingStats {
    /// Buffer capacity in bytes
    pub capacity: usize,

    /// Bytes currently readable
    pub occupied: usize,

    /// Total bytes committed by the writer since creation or reset
    pub total_written: u64,

    /// Total bytes committed by the reader since creation or reset
    pub total_read: u64,
}

impl RingStats {
    /// Fill fraction (0.0 to 1.0)
    pub fn fill_percent(&self) -> f32 {
        self.occupied as f32 / self.capacity as f32
    }
}

macro_rules! common_observers {
    () => {
        /// Buffer capacity in bytes
        pub fn capacity(&self) -> usize {
            self.shared.capacity
        }

        /// Nominal segment size in bytes
        pub fn segment_size(&self) -> usize {
            self.shared.segment_size
        }

        /// Number of segments actually laid out in the arena
        pub fn segment_count(&self) -> usize {
            self.shared.segment_count
        }

        /// Bytes currently readable (not clipped to a segment)
        pub fn available_read(&self) -> usize {
            self.shared.occupied()
        }

        /// Bytes currently writable (not clipped to a segment)
        pub fn available_write(&self) -> usize {
            self.shared.capacity - self.shared.occupied()
        }

        /// Snapshot of the cursors
        pub fn stats(&self) -> RingStats {
            let total_written = self.shared.written.load(Ordering::Acquire);
            let total_read = self.shared.read.load(Ordering::Acquire);
            RingStats {
                capacity: self.shared.capacity,
                occupied: total_written.saturating_sub(total_read) as usize,
                total_written,
                total_read,
            }
        }
    };
}

/// Read-only view of a ring buffer's dimensions and cursors
///
/// Holds neither half, so control threads can poll fill level without
/// contending for the reader or writer.
#[derive(Clone)]
pub struct RingObserver {
    shared: Arc<Shared>,
}

impl RingObserver {
    common_observers!();
}

/// Writer half (fill thread)
pub struct SegmentWriter {
    shared: Arc<Shared>,
}

impl SegmentWriter {
    /// Request a writable span of at least `min_bytes`
    ///
    /// The span ends at the next segment boundary or where free space ends,
    /// whichever comes first. Returns an empty region when fewer than
    /// `min_bytes` contiguous bytes are free. Never blocks.
    pub fn request_write(&mut self, min_bytes: usize) -> WriteRegion<'_> {
        let shared = &self.shared;
        let written = shared.written.load(Ordering::Relaxed);
        let read = shared.read.load(Ordering::Acquire);
        let free = shared.capacity - written.saturating_sub(read) as usize;
        let offset = shared.position(written);
        let mut len = shared.clip(offset, free);
        if len < min_bytes.max(1) {
            len = 0;
        }

        WriteRegion {
            writer: self,
            cursor: written,
            offset,
            len,
        }
    }

    common_observers!();
}

/// Reader half (render callback)
pub struct SegmentReader {
    shared: Arc<Shared>,
}

impl SegmentReader {
    /// Request the readable span since the last read commit
    ///
    /// Clipped at the next segment boundary; zero-length when empty. Callers
    /// needing more bytes loop request/commit. Never blocks.
    pub fn request_read(&mut self) -> ReadRegion<'_> {
        let shared = &self.shared;
        let read = shared.read.load(Ordering::Relaxed);
        let written = shared.written.load(Ordering::Acquire);
        let available = written.saturating_sub(read) as usize;
        let offset = shared.position(read);
        let len = shared.clip(offset, available);

        ReadRegion {
            reader: self,
            cursor: read,
            offset,
            len,
        }
    }

    /// Observer sharing this buffer
    pub fn observer(&self) -> RingObserver {
        RingObserver {
            shared: Arc::clone(&self.shared),
        }
    }

    common_observers!();
}

/// Writable span returned by [`SegmentWriter::request_write`]
pub struct WriteRegion<'a> {
    writer: &'a mut SegmentWriter,
    cursor: u64,
    offset: usize,
    len: usize,
}

impl WriteRegion<'_> {
    /// Span length in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when no space was available
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Arena offset of the span start
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Mutable view of the span
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: the span is free space owned by the writer until committed.
        unsafe { self.writer.shared.span_mut(self.offset, self.len) }
    }

    /// Publish the first `byte_count` bytes of the span to the reader
    ///
    /// `byte_count` is clamped to the span length.
    pub fn commit(self, byte_count: usize) {
        debug_assert!(byte_count <= self.len, "commit beyond write region");
        let count = byte_count.min(self.len) as u64;
        self.writer
            .shared
            .written
            .store(self.cursor + count, Ordering::Release);
    }
}

/// Readable span returned by [`SegmentReader::request_read`]
pub struct ReadRegion<'a> {
    reader: &'a mut SegmentReader,
    cursor: u64,
    offset: usize,
    len: usize,
}

impl ReadRegion<'_> {
    /// Span length in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when the buffer was empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Arena offset of the span start
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// View of the span
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the span holds committed bytes owned by the reader until released.
        unsafe { self.reader.shared.span(self.offset, self.len) }
    }

    /// Release the first `byte_count` bytes of the span back to the writer
    ///
    /// `byte_count` is clamped to the span length.
    pub fn commit(self, byte_count: usize) {
        debug_assert!(byte_count <= self.len, "commit beyond read region");
        let count = byte_count.min(self.len) as u64;
        self.reader
            .shared
            .read
            .store(self.cursor + count, Ordering::Release);
    }
}
