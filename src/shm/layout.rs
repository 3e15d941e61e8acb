/// Fixed binary layout of one scoreboard record and the slot stride.
///
/// `RawRecord` is the `#[repr(C)]` description of the wire format. The codec
/// writes each field at its `offset_of!` position in little-endian order, so
/// the bytes are identical for every process that maps the region.
use std::mem::{offset_of, size_of};

use crate::error::{Result, ScoreboardError};
use crate::record::{Record, Status};

/// Encoded size of one record.
pub const RECORD_SIZE: usize = 32;

/// Wire layout of one record. Fields are ordered u64-first so `#[repr(C)]`
/// inserts no implicit padding.
#[repr(C)]
#[allow(dead_code)]
struct RawRecord {
    // 8-byte aligned group
    last_request_started_at: u64, // 0..8
    requests_served: u64,         // 8..16
    errors_served: u64,           // 16..24

    // 4-byte aligned group
    pid: u32, // 24..28

    status: u8,         // 28
    _reserved: [u8; 3], // 29..32, always zero
}

const _: () = assert!(size_of::<RawRecord>() == RECORD_SIZE);

const STARTED_AT: usize = offset_of!(RawRecord, last_request_started_at);
const REQUESTS: usize = offset_of!(RawRecord, requests_served);
const ERRORS: usize = offset_of!(RawRecord, errors_served);
const PID: usize = offset_of!(RawRecord, pid);
const STATUS: usize = offset_of!(RawRecord, status);

/// Encode a record into its fixed-size wire form.
pub fn encode(record: &Record) -> [u8; RECORD_SIZE] {
    let mut buf = [0u8; RECORD_SIZE];
    buf[STARTED_AT..STARTED_AT + 8].copy_from_slice(&record.last_request_started_at.to_le_bytes());
    buf[REQUESTS..REQUESTS + 8].copy_from_slice(&record.requests_served.to_le_bytes());
    buf[ERRORS..ERRORS + 8].copy_from_slice(&record.errors_served.to_le_bytes());
    buf[PID..PID + 4].copy_from_slice(&record.pid.to_le_bytes());
    buf[STATUS] = record.status.as_u8();
    buf
}

/// Decode a record from its wire form. Fails if the status byte is not one
/// of the defined states.
pub fn decode(buf: &[u8; RECORD_SIZE]) -> Result<Record> {
    Ok(Record {
        pid: u32::from_le_bytes(read_array(buf, PID)),
        status: Status::try_from(buf[STATUS])?,
        last_request_started_at: u64::from_le_bytes(read_array(buf, STARTED_AT)),
        requests_served: u64::from_le_bytes(read_array(buf, REQUESTS)),
        errors_served: u64::from_le_bytes(read_array(buf, ERRORS)),
    })
}

#[inline]
fn read_array<const N: usize>(buf: &[u8; RECORD_SIZE], at: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&buf[at..at + N]);
    out
}

/// Slot stride used by a region. Must be identical in every process that
/// maps the same region; there is no version negotiation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RecordLayout {
    record_size: usize,
}

impl RecordLayout {
    /// Slots packed back to back.
    pub const COMPACT: RecordLayout = RecordLayout {
        record_size: RECORD_SIZE,
    };

    /// One slot per 64-byte cache line, so neighbouring workers never write
    /// to the same line.
    pub const CACHE_LINE: RecordLayout = RecordLayout { record_size: 64 };

    /// A custom stride. It must hold an encoded record and be a multiple of 8.
    pub fn with_record_size(record_size: usize) -> Result<Self> {
        if record_size < RECORD_SIZE || record_size % 8 != 0 {
            return Err(ScoreboardError::LayoutMismatch {
                expected: RECORD_SIZE,
                actual: record_size,
            });
        }
        Ok(RecordLayout { record_size })
    }

    /// Bytes occupied by one slot, padding included.
    #[inline]
    pub fn record_size(&self) -> usize {
        self.record_size
    }

    /// Total region size for `capacity` slots, or `None` on overflow.
    pub fn region_size(&self, capacity: usize) -> Option<usize> {
        capacity.checked_mul(self.record_size)
    }

    /// Decode one slot's bytes. The slice must be exactly one stride long;
    /// anything else means writer and reader disagree on the layout.
    pub fn decode_slot(&self, slot: &[u8]) -> Result<Record> {
        if slot.len() != self.record_size {
            return Err(ScoreboardError::LayoutMismatch {
                expected: self.record_size,
                actual: slot.len(),
            });
        }
        let mut buf = [0u8; RECORD_SIZE];
        buf.copy_from_slice(&slot[..RECORD_SIZE]);
        decode(&buf)
    }
}

impl Default for RecordLayout {
    fn default() -> Self {
        Self::CACHE_LINE
    }
}
