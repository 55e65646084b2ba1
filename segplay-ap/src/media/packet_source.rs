//! Packet sources over uniform-stride and varying-size packet catalogs
//!
//! Durations are in the media's own timescale units (for audio typically
//! sample frames). A source keeps a cursor naming the next packet to read;
//! seeks move the cursor, reads advance it.
//!
//! Seeking past the last packet leaves the cursor at `packet_count()`, where
//! reads report [`ReadOutcome::EndOfData`].

use super::storage::{RandomAccessStorage, StorageError};
use std::sync::Arc;
use thiserror::Error;
use tracing::trace;

/// Packet source failures
#[derive(Error, Debug)]
pub enum PacketSourceError {
    /// Operation not available on this source kind
    #[error("Operation not supported: {0}")]
    Unsupported(&'static str),

    /// Caller buffer cannot hold even the next packet
    #[error("Buffer of {available} bytes cannot hold next packet of {needed} bytes")]
    BufferTooSmall { needed: usize, available: usize },

    /// Keyframe seek was given an empty keyframe list
    #[error("Keyframe list is empty")]
    NoKeyframes,

    /// Packet index beyond the end of the catalog
    #[error("Packet index {index} out of range (packet count {count})")]
    IndexOutOfRange { index: usize, count: usize },

    /// Construction parameters do not describe a packet layout
    #[error("Invalid packet layout: {0}")]
    InvalidLayout(String),

    /// Backing storage failed
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Result of a read: data, or the end-of-data sentinel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome<T> {
    Data(T),
    EndOfData,
}

impl<T> ReadOutcome<T> {
    pub fn is_end_of_data(&self) -> bool {
        matches!(self, ReadOutcome::EndOfData)
    }
}

/// Location of one compressed packet in storage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketAndLocation {
    pub duration: u64,
    pub byte_count: usize,
    pub byte_offset: u64,
}

/// One packet read into its own buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataInfo {
    pub packet_index: usize,
    pub duration: u64,
    pub data: Vec<u8>,
}

/// One packet placed into a caller buffer by a batched read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketInfo {
    pub packet_index: usize,
    pub duration: u64,
    /// Offset of the packet within the caller buffer
    pub offset: usize,
    pub byte_count: usize,
}

/// Random access into a sequence of compressed packets
pub trait MediaPacketSource: Send {
    /// Move the cursor to the packet containing `duration`
    ///
    /// Returns how far into that packet `duration` lies. Past the end the
    /// cursor lands on end-of-data and the remainder is measured from the
    /// total duration.
    fn seek_to_duration(&mut self, duration: u64) -> u64;

    /// Move the cursor to packet `index` (`packet_count()` means end-of-data)
    fn seek_to_packet(&mut self, index: usize) -> Result<(), PacketSourceError>;

    /// Seek to the latest keyframe at or before `initial_frame_index`
    ///
    /// `keyframe_indexes` must be ascending. When every keyframe lies after
    /// the target the first one is used. Returns the chosen packet index.
    fn seek_to_keyframe(
        &mut self,
        initial_frame_index: usize,
        keyframe_indexes: &[usize],
    ) -> Result<usize, PacketSourceError> {
        let first = *keyframe_indexes.first().ok_or(PacketSourceError::NoKeyframes)?;
        let after = keyframe_indexes.partition_point(|&k| k <= initial_frame_index);
        let chosen = if after == 0 {
            first
        } else {
            keyframe_indexes[after - 1]
        };
        self.seek_to_packet(chosen)?;
        Ok(chosen)
    }

    /// Read the next packet into a freshly allocated buffer
    fn read_next(&mut self) -> Result<ReadOutcome<DataInfo>, PacketSourceError>;

    /// Read as many whole packets as fit in `buffer`, up to `max_packet_count`
    ///
    /// Fails with [`PacketSourceError::BufferTooSmall`] without advancing
    /// when the next packet alone does not fit.
    fn read_next_into(
        &mut self,
        buffer: &mut [u8],
        max_packet_count: usize,
    ) -> Result<ReadOutcome<Vec<PacketInfo>>, PacketSourceError>;

    /// Number of packets in the catalog
    fn packet_count(&self) -> usize;

    /// Index of the packet the next read returns
    fn next_packet_index(&self) -> usize;

    /// Sum of all packet durations
    fn total_duration(&self) -> u64;
}

fn read_single(
    storage: &dyn RandomAccessStorage,
    index: usize,
    location: PacketAndLocation,
) -> Result<DataInfo, PacketSourceError> {
    let mut data = vec![0u8; location.byte_count];
    storage.read_data(location.byte_offset, &mut data)?;
    Ok(DataInfo {
        packet_index: index,
        duration: location.duration,
        data,
    })
}

/// Shared batching: reads `locations` in order into `buffer`
///
/// The cursor is left to the caller so a storage failure advances nothing.
fn read_batch(
    storage: &dyn RandomAccessStorage,
    first_index: usize,
    locations: impl Iterator<Item = PacketAndLocation>,
    buffer: &mut [u8],
    max_packet_count: usize,
) -> Result<Vec<PacketInfo>, PacketSourceError> {
    let mut packets = Vec::new();
    let mut used = 0usize;

    for (i, location) in locations.take(max_packet_count.max(1)).enumerate() {
        if location.byte_count > buffer.len() - used {
            if packets.is_empty() {
                return Err(PacketSourceError::BufferTooSmall {
                    needed: location.byte_count,
                    available: buffer.len(),
                });
            }
            break;
        }

        let dest = &mut buffer[used..used + location.byte_count];
        storage.read_data(location.byte_offset, dest)?;
        packets.push(PacketInfo {
            packet_index: first_index + i,
            duration: location.duration,
            offset: used,
            byte_count: location.byte_count,
        });
        used += location.byte_count;
    }

    Ok(packets)
}

/// Packets of identical size and duration laid out back to back
///
/// Cannot address individual packets: [`MediaPacketSource::seek_to_packet`]
/// (and therefore keyframe seek) returns [`PacketSourceError::Unsupported`].
pub struct UniformPacketSource {
    storage: Arc<dyn RandomAccessStorage>,
    data_offset: u64,
    bytes_per_packet: usize,
    duration_per_packet: u64,
    packet_count: usize,
    next: usize,
}

impl UniformPacketSource {
    /// Describe `packet_count` packets starting at `data_offset`
    pub fn new(
        storage: Arc<dyn RandomAccessStorage>,
        data_offset: u64,
        bytes_per_packet: usize,
        duration_per_packet: u64,
        packet_count: usize,
    ) -> Result<Self, PacketSourceError> {
        if bytes_per_packet == 0 || duration_per_packet == 0 {
            return Err(PacketSourceError::InvalidLayout(format!(
                "bytes_per_packet={bytes_per_packet}, duration_per_packet={duration_per_packet}"
            )));
        }
        Ok(Self {
            storage,
            data_offset,
            bytes_per_packet,
            duration_per_packet,
            packet_count,
            next: 0,
        })
    }

    /// Derive the packet count from the storage size after `data_offset`
    pub fn spanning_storage(
        storage: Arc<dyn RandomAccessStorage>,
        data_offset: u64,
        bytes_per_packet: usize,
        duration_per_packet: u64,
    ) -> Result<Self, PacketSourceError> {
        let payload = storage.len().saturating_sub(data_offset);
        let count = payload / bytes_per_packet.max(1) as u64;
        Self::new(
            storage,
            data_offset,
            bytes_per_packet,
            duration_per_packet,
            count as usize,
        )
    }

    pub fn duration_per_packet(&self) -> u64 {
        self.duration_per_packet
    }

    fn location(&self, index: usize) -> PacketAndLocation {
        PacketAndLocation {
            duration: self.duration_per_packet,
            byte_count: self.bytes_per_packet,
            byte_offset: self.data_offset + (index * self.bytes_per_packet) as u64,
        }
    }
}

impl MediaPacketSource for UniformPacketSource {
    fn seek_to_duration(&mut self, duration: u64) -> u64 {
        let index = duration / self.duration_per_packet;
        if index >= self.packet_count as u64 {
            self.next = self.packet_count;
            return duration - self.total_duration();
        }
        self.next = index as usize;
        trace!(index, "Uniform seek to duration {}", duration);
        duration % self.duration_per_packet
    }

    fn seek_to_packet(&mut self, _index: usize) -> Result<(), PacketSourceError> {
        Err(PacketSourceError::Unsupported(
            "uniform packet source cannot seek to a packet index",
        ))
    }

    fn read_next(&mut self) -> Result<ReadOutcome<DataInfo>, PacketSourceError> {
        if self.next >= self.packet_count {
            return Ok(ReadOutcome::EndOfData);
        }
        let info = read_single(self.storage.as_ref(), self.next, self.location(self.next))?;
        self.next += 1;
        Ok(ReadOutcome::Data(info))
    }

    fn read_next_into(
        &mut self,
        buffer: &mut [u8],
        max_packet_count: usize,
    ) -> Result<ReadOutcome<Vec<PacketInfo>>, PacketSourceError> {
        if self.next >= self.packet_count {
            return Ok(ReadOutcome::EndOfData);
        }
        let locations = (self.next..self.packet_count).map(|i| self.location(i));
        let packets = read_batch(
            self.storage.as_ref(),
            self.next,
            locations,
            buffer,
            max_packet_count,
        )?;
        self.next += packets.len();
        Ok(ReadOutcome::Data(packets))
    }

    fn packet_count(&self) -> usize {
        self.packet_count
    }

    fn next_packet_index(&self) -> usize {
        self.next
    }

    fn total_duration(&self) -> u64 {
        self.duration_per_packet * self.packet_count as u64
    }
}

/// Packets described by an explicit location table
pub struct VaryingPacketSource {
    storage: Arc<dyn RandomAccessStorage>,
    packets: Vec<PacketAndLocation>,
    total_duration: u64,
    next: usize,
}

impl VaryingPacketSource {
    pub fn new(storage: Arc<dyn RandomAccessStorage>, packets: Vec<PacketAndLocation>) -> Self {
        let total_duration = packets.iter().map(|p| p.duration).sum();
        Self {
            storage,
            packets,
            total_duration,
            next: 0,
        }
    }

    pub fn packets(&self) -> &[PacketAndLocation] {
        &self.packets
    }
}

impl MediaPacketSource for VaryingPacketSource {
    fn seek_to_duration(&mut self, duration: u64) -> u64 {
        let mut start = 0u64;
        for (index, packet) in self.packets.iter().enumerate() {
            if duration < start + packet.duration {
                self.next = index;
                return duration - start;
            }
            start += packet.duration;
        }
        self.next = self.packets.len();
        duration - self.total_duration
    }

    fn seek_to_packet(&mut self, index: usize) -> Result<(), PacketSourceError> {
        if index > self.packets.len() {
            return Err(PacketSourceError::IndexOutOfRange {
                index,
                count: self.packets.len(),
            });
        }
        self.next = index;
        Ok(())
    }

    fn read_next(&mut self) -> Result<ReadOutcome<DataInfo>, PacketSourceError> {
        let Some(&location) = self.packets.get(self.next) else {
            return Ok(ReadOutcome::EndOfData);
        };
        let info = read_single(self.storage.as_ref(), self.next, location)?;
        self.next += 1;
        Ok(ReadOutcome::Data(info))
    }

    fn read_next_into(
        &mut self,
        buffer: &mut [u8],
        max_packet_count: usize,
    ) -> Result<ReadOutcome<Vec<PacketInfo>>, PacketSourceError> {
        if self.next >= self.packets.len() {
            return Ok(ReadOutcome::EndOfData);
        }
        let packets = read_batch(
            self.storage.as_ref(),
            self.next,
            self.packets[self.next..].iter().copied(),
            buffer,
            max_packet_count,
        )?;
        self.next += packets.len();
        Ok(ReadOutcome::Data(packets))
    }

    fn packet_count(&self) -> usize {
        self.packets.len()
    }

    fn next_packet_index(&self) -> usize {
        self.next
    }

    fn total_duration(&self) -> u64 {
        self.total_duration
    }
}
