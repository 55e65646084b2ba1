//! Segmented ring buffer integration tests
//!
//! Invariant checks over pseudo-random request/commit sequences plus a
//! two-thread starvation scenario with a slow producer.

use segplay_ap::playback::{SegmentReader, SegmentWriter, SegmentedRingBuffer};
use std::thread;
use std::time::{Duration, Instant};

/// Small deterministic xorshift so sequences are reproducible
struct XorShift(u64);

impl XorShift {
    fn next(&mut self) -> u64 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        self.0
    }

    fn below(&mut self, n: usize) -> usize {
        (self.next() % n as u64) as usize
    }
}

fn pattern(i: u64) -> u8 {
    (i % 251) as u8
}

/// Write up to `max` pattern bytes starting at stream offset `next`
fn produce(writer: &mut SegmentWriter, next: &mut u64, max: usize) -> usize {
    let mut region = writer.request_write(1);
    let n = region.len().min(max);
    for (k, byte) in region.as_mut_slice()[..n].iter_mut().enumerate() {
        *byte = pattern(*next + k as u64);
    }
    region.commit(n);
    *next += n as u64;
    n
}

/// Read up to `max` bytes, checking them against the pattern
fn consume(reader: &mut SegmentReader, next: &mut u64, max: usize) -> usize {
    let region = reader.request_read();
    let n = region.len().min(max);
    for (k, &byte) in region.as_slice()[..n].iter().enumerate() {
        assert_eq!(byte, pattern(*next + k as u64), "corrupt byte at {}", *next + k as u64);
    }
    region.commit(n);
    *next += n as u64;
    n
}

#[test]
fn test_occupancy_stays_within_capacity() {
    for (capacity, segments) in [(64, 4), (100, 3), (10, 3), (7, 7), (4096, 8), (1, 1)] {
        let (mut writer, mut reader) = SegmentedRingBuffer::new(capacity, segments).split();
        let mut rng = XorShift(0x9E37_79B9_7F4A_7C15 ^ capacity as u64);
        let (mut written, mut read) = (0u64, 0u64);

        for _ in 0..2000 {
            if rng.below(2) == 0 {
                produce(&mut writer, &mut written, rng.below(capacity + 1));
            } else {
                consume(&mut reader, &mut read, rng.below(capacity + 1));
            }

            let stats = reader.stats();
            assert!(stats.occupied <= capacity);
            assert_eq!(stats.total_written, written);
            assert_eq!(stats.total_read, read);
            assert_eq!(reader.available_read() + writer.available_write(), capacity);
        }
    }
}

#[test]
fn test_regions_never_cross_segment_boundaries() {
    for (capacity, segments) in [(64, 4), (100, 3), (10, 3), (33, 8)] {
        let (mut writer, mut reader) = SegmentedRingBuffer::new(capacity, segments).split();
        let segment_size = writer.segment_size();
        let mut rng = XorShift(42 + capacity as u64);
        let (mut written, mut read) = (0u64, 0u64);

        for _ in 0..2000 {
            {
                let region = writer.request_write(1);
                if !region.is_empty() {
                    let start = region.offset();
                    let end = start + region.len();
                    assert!(end <= capacity);
                    assert_eq!(start / segment_size, (end - 1) / segment_size);
                }
            }
            {
                let region = reader.request_read();
                if !region.is_empty() {
                    let start = region.offset();
                    let end = start + region.len();
                    assert!(end <= capacity);
                    assert_eq!(start / segment_size, (end - 1) / segment_size);
                }
            }

            produce(&mut writer, &mut written, rng.below(segment_size * 2) + 1);
            consume(&mut reader, &mut read, rng.below(segment_size * 2) + 1);
        }
    }
}

#[test]
fn test_byte_stream_fidelity_with_uneven_chunks() {
    for (capacity, segments, write_chunk, read_chunk) in
        [(64, 4, 7, 5), (100, 3, 33, 34), (10, 3, 3, 10), (4096, 4, 100, 4096)]
    {
        let (mut writer, mut reader) = SegmentedRingBuffer::new(capacity, segments).split();
        let total = (capacity * 17) as u64;
        let (mut written, mut read) = (0u64, 0u64);

        while read < total {
            if written < total {
                let max = write_chunk.min((total - written) as usize);
                produce(&mut writer, &mut written, max);
            }
            consume(&mut reader, &mut read, read_chunk);
        }
        assert_eq!(written, total);
        assert_eq!(reader.available_read(), 0);
    }
}

#[test]
fn test_reset_behaves_like_new_buffer() {
    let (mut writer, mut reader) = SegmentedRingBuffer::new(100, 3).split();
    let (mut written, mut read) = (0u64, 0u64);
    produce(&mut writer, &mut written, 34);
    produce(&mut writer, &mut written, 20);
    consume(&mut reader, &mut read, 10);

    SegmentedRingBuffer::reset(&mut writer, &mut reader);

    let (mut fresh_writer, fresh_reader) = SegmentedRingBuffer::new(100, 3).split();
    assert_eq!(reader.stats(), fresh_reader.stats());
    assert_eq!(writer.available_write(), fresh_writer.available_write());

    let region = writer.request_write(1);
    let fresh_region = fresh_writer.request_write(1);
    assert_eq!(region.offset(), fresh_region.offset());
    assert_eq!(region.len(), fresh_region.len());
    drop(region);

    // Stream restarts at offset zero
    let (mut written, mut read) = (0u64, 0u64);
    produce(&mut writer, &mut written, 50);
    assert_eq!(consume(&mut reader, &mut read, 50), 34);
}

#[test]
fn test_slow_producer_starves_consumer_without_corruption() {
    const CAPACITY: usize = 4096;
    const SEGMENTS: usize = 4;
    const TOTAL: u64 = 20_000;

    let (mut writer, mut reader) = SegmentedRingBuffer::new(CAPACITY, SEGMENTS).split();
    let segment_size = reader.segment_size();

    let producer = thread::spawn(move || {
        let mut written = 0u64;
        while written < TOTAL {
            let max = 100.min((TOTAL - written) as usize);
            produce(&mut writer, &mut written, max);
            thread::sleep(Duration::from_micros(200));
        }
        writer
    });

    let mut read = 0u64;
    let mut starved_reads = 0;
    let deadline = Instant::now() + Duration::from_secs(30);
    while read < TOTAL {
        assert!(Instant::now() < deadline, "consumer stalled at {}", read);
        let mut tick = 0;
        while tick < CAPACITY {
            let n = consume(&mut reader, &mut read, CAPACITY - tick);
            if n == 0 {
                starved_reads += 1;
                break;
            }
            tick += n;
        }
        thread::sleep(Duration::from_millis(1));
    }
    assert!(starved_reads > 0, "consumer was never starved");

    // Producer fills the whole ring at once: full-size regions come back
    let mut writer = producer.join().unwrap();
    let mut written = TOTAL;
    while produce(&mut writer, &mut written, usize::MAX) > 0 {}
    assert_eq!(reader.available_read(), CAPACITY);

    let region = reader.request_read();
    let expected = segment_size - (read as usize % CAPACITY) % segment_size;
    assert_eq!(region.len(), expected);
    drop(region);
    let mut drained = 0;
    while drained < CAPACITY {
        drained += consume(&mut reader, &mut read, usize::MAX);
    }
    assert_eq!(read, written);
}
