//! Compressed media packet access
//!
//! Packet sources sit upstream of any codec: they hand out one compressed
//! packet (or a batch of them) at a time from random-access storage and
//! support the seek primitives a decoder needs to reposition.

pub mod packet_source;
pub mod storage;

pub use packet_source::{
    DataInfo, MediaPacketSource, PacketAndLocation, PacketInfo, PacketSourceError, ReadOutcome,
    UniformPacketSource, VaryingPacketSource,
};
pub use storage::{FileStorage, MemoryStorage, RandomAccessStorage, StorageError};
