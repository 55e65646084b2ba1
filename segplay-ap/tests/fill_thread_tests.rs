//! Buffer fill thread integration tests
//!
//! Exercises the fill thread against real ring buffers and test pipelines:
//! end-of-data latching, one-shot error reporting, pause quiescence,
//! repositioning, frame alignment checks and shutdown.

mod helpers;

use helpers::*;
use segplay_ap::audio::{PcmFormat, SampleFormat};
use segplay_ap::playback::{
    BufferFillThread, FillErrorCallback, FillSettings, FillThreadState, MemoryPipeline,
    PipelineError, SegmentReader, SegmentedRingBuffer,
};
use segplay_ap::Error;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

fn settings() -> FillSettings {
    FillSettings {
        chunk_frames: 8,
        backoff: Duration::from_millis(1),
    }
}

fn no_errors() -> FillErrorCallback {
    Arc::new(|_| {})
}

/// Read everything currently buffered
fn drain(reader: &mut SegmentReader) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let region = reader.request_read();
        if region.is_empty() {
            break;
        }
        out.extend_from_slice(region.as_slice());
        let n = region.len();
        region.commit(n);
    }
    out
}

#[test]
fn test_end_of_data_latch_after_small_ring() {
    let (writer, mut reader) = SegmentedRingBuffer::new(32, 2).split();
    let data = i16_ramp(100, 1);
    let fill = BufferFillThread::new(
        writer,
        Box::new(MemoryPipeline::new(test_format(), data.clone())),
        settings(),
        no_errors(),
    )
    .unwrap();
    fill.start().unwrap();

    // Ring holds 16 frames; the rest arrives as the consumer drains
    let mut received = Vec::new();
    assert!(wait_for(|| {
        received.extend(drain(&mut reader));
        fill.did_reach_end() && reader.available_read() == 0
    }));
    received.extend(drain(&mut reader));
    assert_eq!(received, data);

    // Latched: no further pulls once the end was seen
    let pulls = fill.stats().pulls;
    thread::sleep(Duration::from_millis(20));
    assert_eq!(fill.stats().pulls, pulls);
    assert!(fill.did_reach_end());
    assert_eq!(fill.state(), FillThreadState::Running);
}

#[test]
fn test_pipeline_error_reported_once() {
    let (writer, _reader) = SegmentedRingBuffer::new(4096, 4).split();
    let pipeline = FailingPipeline::new(10);
    let pulls = Arc::clone(&pipeline.pulls);

    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(Mutex::new(None));
    let on_error: FillErrorCallback = {
        let calls = Arc::clone(&calls);
        let seen = Arc::clone(&seen);
        Arc::new(move |e: &PipelineError| {
            calls.fetch_add(1, Ordering::SeqCst);
            *seen.lock().unwrap() = Some(e.clone());
        })
    };

    let fill = BufferFillThread::new(writer, Box::new(pipeline), settings(), on_error).unwrap();
    fill.start().unwrap();

    assert!(wait_for(|| calls.load(Ordering::SeqCst) == 1));
    let pulls_at_error = pulls.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(20));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(pulls.load(Ordering::SeqCst), pulls_at_error);
    assert_eq!(
        *seen.lock().unwrap(),
        Some(PipelineError::Decode("corrupt packet".to_string()))
    );
    assert_eq!(fill.stats().bytes_written, 20);

    // Resume clears the latch; the still-broken pipeline reports again
    fill.pause();
    fill.resume();
    assert!(wait_for(|| calls.load(Ordering::SeqCst) == 2));
}

#[test]
fn test_pause_waits_for_in_flight_step() {
    let (writer, _reader) = SegmentedRingBuffer::new(1 << 16, 4).split();
    let pipeline = SlowPipeline::new();
    let in_fill = Arc::clone(&pipeline.in_fill);
    let pulls = Arc::clone(&pipeline.pulls);

    let fill = BufferFillThread::new(writer, Box::new(pipeline), settings(), no_errors()).unwrap();
    fill.start().unwrap();
    assert!(wait_for(|| pulls.load(Ordering::SeqCst) >= 3));

    fill.pause();
    assert_eq!(in_fill.load(Ordering::SeqCst), 0);
    assert_eq!(fill.state(), FillThreadState::Paused);

    let paused_at = pulls.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(20));
    assert_eq!(pulls.load(Ordering::SeqCst), paused_at);

    fill.resume();
    assert!(wait_for(|| pulls.load(Ordering::SeqCst) > paused_at));
}

#[test]
fn test_reposition_refills_from_new_position() {
    let (writer, mut reader) = SegmentedRingBuffer::new(64, 4).split();
    let fill = BufferFillThread::new(
        writer,
        Box::new(MemoryPipeline::new(test_format(), i16_ramp(100, 1))),
        settings(),
        no_errors(),
    )
    .unwrap();
    fill.start().unwrap();
    assert!(wait_for(|| reader.available_read() == 64));

    fill.pause();
    fill.reposition(&mut reader, Duration::from_millis(50)).unwrap();
    assert_eq!(reader.available_read(), 0);
    assert!(!fill.did_reach_end());

    fill.resume();
    assert!(wait_for(|| reader.available_read() >= 16));
    let region = reader.request_read();
    let samples = decode_i16(region.as_slice());
    assert_eq!(samples[..8], (50..58).collect::<Vec<i16>>()[..]);
}

#[test]
fn test_reposition_clears_end_of_data() {
    let (writer, mut reader) = SegmentedRingBuffer::new(64, 4).split();
    let fill = BufferFillThread::new(
        writer,
        Box::new(MemoryPipeline::new(test_format(), i16_ramp(10, 1))),
        settings(),
        no_errors(),
    )
    .unwrap();
    fill.start().unwrap();
    assert!(wait_for(|| fill.did_reach_end()));

    fill.pause();
    fill.reposition(&mut reader, Duration::ZERO).unwrap();
    assert!(!fill.did_reach_end());
    fill.resume();

    assert!(wait_for(|| fill.did_reach_end()));
    assert_eq!(drain(&mut reader), i16_ramp(10, 1));
}

#[test]
fn test_reposition_after_pause_clears_end_of_data_from_in_flight_step() {
    let (writer, mut reader) = SegmentedRingBuffer::new(64, 4).split();
    let (pipeline, gate) = GatedEndPipeline::new();
    let in_fill = Arc::clone(&pipeline.in_fill);
    let pulls = Arc::clone(&pipeline.pulls);

    let fill = BufferFillThread::new(writer, Box::new(pipeline), settings(), no_errors()).unwrap();
    fill.start().unwrap();
    assert!(wait_for(|| in_fill.load(Ordering::SeqCst)));

    // Pause while the pull that ends the stream is still in progress
    thread::scope(|scope| {
        let pausing = scope.spawn(|| fill.pause());
        assert!(wait_for(|| fill.state() == FillThreadState::Paused));
        gate.open();
        pausing.join().unwrap();
    });

    // pause() returned only after that step finished, latch included
    assert!(fill.did_reach_end());
    fill.reposition(&mut reader, Duration::ZERO).unwrap();
    assert!(!fill.did_reach_end());

    fill.resume();
    let resumed_at = pulls.load(Ordering::SeqCst);
    assert!(wait_for(|| pulls.load(Ordering::SeqCst) > resumed_at + 3));
    assert!(!fill.did_reach_end());
}

#[test]
fn test_rejects_ring_not_aligned_to_frames() {
    // Stereo i16: 4 bytes per frame
    let stereo = PcmFormat::new(1000, 2, SampleFormat::I16);
    let pipeline = || Box::new(MemoryPipeline::new(stereo, vec![0u8; 400]));

    // 30 bytes: 8-byte segments but a 6-byte tail segment
    let (writer, _reader) = SegmentedRingBuffer::new(30, 4).split();
    assert!(matches!(
        BufferFillThread::new(writer, pipeline(), settings(), no_errors()),
        Err(Error::Config(_))
    ));

    // 36 bytes: whole frames overall, but 9-byte segments split them
    let (writer, _reader) = SegmentedRingBuffer::new(36, 4).split();
    assert!(matches!(
        BufferFillThread::new(writer, pipeline(), settings(), no_errors()),
        Err(Error::Config(_))
    ));
}

#[test]
fn test_aligned_small_ring_streams_everything() {
    let stereo = PcmFormat::new(1000, 2, SampleFormat::I16);
    let data: Vec<u8> = (0..400u32).map(|i| i as u8).collect();
    let (writer, mut reader) = SegmentedRingBuffer::new(32, 4).split();
    let fill = BufferFillThread::new(
        writer,
        Box::new(MemoryPipeline::new(stereo, data.clone())),
        settings(),
        no_errors(),
    )
    .unwrap();
    fill.start().unwrap();

    let mut received = Vec::new();
    assert!(wait_for(|| {
        received.extend(drain(&mut reader));
        fill.did_reach_end() && reader.available_read() == 0
    }));
    received.extend(drain(&mut reader));
    assert_eq!(received, data);
}

#[test]
fn test_drop_joins_worker() {
    let (writer, _reader) = SegmentedRingBuffer::new(1 << 16, 4).split();
    let pipeline = SlowPipeline::new();
    let in_fill = Arc::clone(&pipeline.in_fill);
    let pulls = Arc::clone(&pipeline.pulls);

    let fill = BufferFillThread::new(writer, Box::new(pipeline), settings(), no_errors()).unwrap();
    fill.start().unwrap();
    assert!(wait_for(|| pulls.load(Ordering::SeqCst) >= 1));

    drop(fill);
    assert_eq!(in_fill.load(Ordering::SeqCst), 0);
    let after_join = pulls.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(20));
    assert_eq!(pulls.load(Ordering::SeqCst), after_join);
}

#[test]
fn test_shutdown_before_start() {
    let (writer, _reader) = SegmentedRingBuffer::new(64, 4).split();
    let fill = BufferFillThread::new(
        writer,
        Box::new(MemoryPipeline::new(test_format(), i16_ramp(10, 1))),
        settings(),
        no_errors(),
    )
    .unwrap();
    fill.shutdown();
    assert_eq!(fill.state(), FillThreadState::ShuttingDown);
    assert!(fill.start().is_err());
}
