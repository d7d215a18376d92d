//! SCSI types and constants for the Zone Domains target.
//!
//! Opcodes, service actions, status codes, sense data and the command
//! request/response plumbing shared by every handler. The zone-aware
//! commands (ZBC IN/OUT and ZONE ACTIVATE) follow the Zone Domains
//! command-set family; a few service-action values are still provisional
//! in the standard and are kept as single-site constants here.

pub mod bytes;

use std::collections::VecDeque;
use std::io::{self, Read, Write};

/// SCSI command opcodes handled by the target.
pub mod opcode {
    /// Test if the logical unit is ready
    pub const TEST_UNIT_READY: u8 = 0x00;
    /// Return deferred sense data
    pub const REQUEST_SENSE: u8 = 0x03;
    /// Re-initialize the medium (metadata region)
    pub const FORMAT_UNIT: u8 = 0x04;
    /// Return device identification
    pub const INQUIRY: u8 = 0x12;
    /// Set mode parameters (6-byte)
    pub const MODE_SELECT_6: u8 = 0x15;
    /// Return mode parameters (6-byte)
    pub const MODE_SENSE_6: u8 = 0x1A;
    /// Return diagnostic pages
    pub const RECEIVE_DIAGNOSTIC_RESULTS: u8 = 0x1C;
    /// Return logical block address capacity (10-byte)
    pub const READ_CAPACITY_10: u8 = 0x25;
    /// Read data (10-byte CDB)
    pub const READ_10: u8 = 0x28;
    /// Write data (10-byte CDB)
    pub const WRITE_10: u8 = 0x2A;
    /// Flush the write cache (10-byte)
    pub const SYNCHRONIZE_CACHE_10: u8 = 0x35;
    /// Sanitize the medium
    pub const SANITIZE: u8 = 0x48;
    /// Set mode parameters (10-byte)
    pub const MODE_SELECT_10: u8 = 0x55;
    /// Return mode parameters (10-byte)
    pub const MODE_SENSE_10: u8 = 0x5A;
    /// Variable-length CDB (carries ZONE ACTIVATE/QUERY(32))
    pub const VARIABLE_LENGTH: u8 = 0x7F;
    /// Read data (16-byte CDB)
    pub const READ_16: u8 = 0x88;
    /// Write data (16-byte CDB)
    pub const WRITE_16: u8 = 0x8A;
    /// Flush the write cache (16-byte)
    pub const SYNCHRONIZE_CACHE_16: u8 = 0x91;
    /// ZBC OUT: zone management commands
    pub const ZBC_OUT: u8 = 0x94;
    /// ZBC IN: zone reporting commands
    pub const ZBC_IN: u8 = 0x95;
    /// SERVICE ACTION IN(16) (carries READ CAPACITY(16))
    pub const SERVICE_ACTION_IN_16: u8 = 0x9E;
    /// Read data (12-byte CDB)
    pub const READ_12: u8 = 0xA8;
    /// Write data (12-byte CDB)
    pub const WRITE_12: u8 = 0xAA;
}

/// ZBC IN (0x95) service actions.
pub mod zbc_in_sa {
    pub const REPORT_ZONES: u8 = 0x00;
    /// Provisional value, single definition site.
    pub const REPORT_MUTATIONS: u8 = 0x05;
    pub const REPORT_REALMS: u8 = 0x06;
    pub const REPORT_ZONE_DOMAINS: u8 = 0x07;
    pub const ZONE_ACTIVATE_16: u8 = 0x08;
    pub const ZONE_QUERY_16: u8 = 0x09;
}

/// ZBC OUT (0x94) service actions.
pub mod zbc_out_sa {
    pub const CLOSE_ZONE: u8 = 0x01;
    pub const FINISH_ZONE: u8 = 0x02;
    pub const OPEN_ZONE: u8 = 0x03;
    pub const RESET_WRITE_POINTER: u8 = 0x04;
    pub const SEQUENTIALIZE_ZONE: u8 = 0x05;
    /// Provisional value, single definition site.
    pub const MUTATE: u8 = 0x06;
}

/// Variable-length CDB (0x7F) 16-bit service actions.
///
/// Both values are provisional in the Zone Domains drafts; change them here
/// and nowhere else.
pub mod var_len_sa {
    pub const ZONE_ACTIVATE_32: u16 = 0xF800;
    pub const ZONE_QUERY_32: u16 = 0xF801;
}

/// SERVICE ACTION IN(16) service actions.
pub mod sa_in_16 {
    pub const READ_CAPACITY_16: u8 = 0x10;
}

/// SCSI status codes.
pub mod status {
    pub const GOOD: u8 = 0x00;
    pub const CHECK_CONDITION: u8 = 0x02;
}

/// Sense key codes.
pub mod sense_key {
    pub const NO_SENSE: u8 = 0x00;
    pub const NOT_READY: u8 = 0x02;
    pub const MEDIUM_ERROR: u8 = 0x03;
    pub const HARDWARE_ERROR: u8 = 0x04;
    pub const ILLEGAL_REQUEST: u8 = 0x05;
    pub const UNIT_ATTENTION: u8 = 0x06;
    pub const DATA_PROTECT: u8 = 0x07;
    pub const ABORTED_COMMAND: u8 = 0x0B;
}

/// Additional sense code + qualifier pairs, packed `(ASC << 8) | ASCQ`.
pub mod asc {
    pub const INVALID_COMMAND_OPERATION_CODE: u16 = 0x2000;
    pub const LBA_OUT_OF_RANGE: u16 = 0x2100;
    pub const UNALIGNED_WRITE_COMMAND: u16 = 0x2104;
    pub const WRITE_BOUNDARY_VIOLATION: u16 = 0x2105;
    pub const ATTEMPT_TO_READ_INVALID_DATA: u16 = 0x2106;
    pub const READ_BOUNDARY_VIOLATION: u16 = 0x2107;
    pub const ATTEMPT_TO_ACCESS_GAP_ZONE: u16 = 0x2109;
    pub const INVALID_FIELD_IN_CDB: u16 = 0x2400;
    pub const INVALID_FIELD_IN_PARAMETER_LIST: u16 = 0x2600;
    pub const ZONE_IS_READ_ONLY: u16 = 0x2708;
    pub const ZONE_IS_OFFLINE: u16 = 0x2C0E;
    pub const ZONE_IS_INACTIVE: u16 = 0x2C12;
    pub const MEDIUM_FORMAT_CORRUPTED: u16 = 0x3100;
    pub const INTERNAL_TARGET_FAILURE: u16 = 0x4400;
    pub const INSUFFICIENT_ZONE_RESOURCES: u16 = 0x550E;
    pub const PARAMETER_LIST_LENGTH_ERROR: u16 = 0x1A00;
    pub const WRITE_ERROR: u16 = 0x0C00;
    pub const UNRECOVERED_READ_ERROR: u16 = 0x1100;
}

/// Fixed-format sense data (18 bytes).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SenseData {
    pub key: u8,
    pub asc: u8,
    pub ascq: u8,
}

impl SenseData {
    pub const SIZE: usize = 18;

    /// Build from a sense key and a packed ASC/ASCQ pair.
    pub fn new(key: u8, asc_ascq: u16) -> Self {
        Self {
            key,
            asc: (asc_ascq >> 8) as u8,
            ascq: (asc_ascq & 0xFF) as u8,
        }
    }

    /// Serialize as current fixed-format sense (response code 0x70).
    pub fn to_fixed(self) -> Vec<u8> {
        let mut buf = vec![0u8; Self::SIZE];
        buf[0] = 0x70;
        buf[2] = self.key;
        buf[7] = 10;
        buf[12] = self.asc;
        buf[13] = self.ascq;
        buf
    }
}

/// Result of executing one SCSI command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CmdOutput {
    pub status: u8,
    pub sense: Vec<u8>,
}

impl CmdOutput {
    pub fn ok() -> Self {
        Self {
            status: status::GOOD,
            sense: Vec::new(),
        }
    }

    pub fn check_condition(key: u8, asc_ascq: u16) -> Self {
        Self {
            status: status::CHECK_CONDITION,
            sense: SenseData::new(key, asc_ascq).to_fixed(),
        }
    }

    /// The sense triplet carried by this output, if any.
    pub fn sense_data(&self) -> Option<SenseData> {
        if self.sense.len() >= 14 {
            Some(SenseData {
                key: self.sense[2] & 0x0F,
                asc: self.sense[12],
                ascq: self.sense[13],
            })
        } else {
            None
        }
    }
}

/// A transport-level error while processing a command.
///
/// Anything else — malformed CDBs, protocol violations, internal I/O
/// failures — is reported as CHECK CONDITION in the `CmdOutput`.
#[derive(Debug, thiserror::Error)]
pub enum CmdError {
    #[error("CDB too short for its operation code")]
    CdbTooShort,
    #[error("data-in transfer failed: {0}")]
    DataIn(#[source] io::Error),
    #[error("data-out transfer failed: {0}")]
    DataOut(#[source] io::Error),
}

/// One SCSI command as delivered by the host runtime: the raw CDB plus the
/// data-in writer and data-out reader backing the scatter-gather buffers.
pub struct Request<'a, W: Write, R: Read> {
    pub cdb: &'a [u8],
    pub data_in: &'a mut W,
    pub data_out: &'a mut R,
}

/// A writer that drops everything past a byte budget.
///
/// SCSI allocation lengths truncate data-in payloads without error; handlers
/// write the full payload and let this adapter clip it.
pub struct SilentlyTruncate<W: Write>(W, usize);

impl<W: Write> SilentlyTruncate<W> {
    pub fn new(inner: W, budget: usize) -> Self {
        Self(inner, budget)
    }
}

impl<W: Write> Write for SilentlyTruncate<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.1 == 0 {
            // budget exhausted: pretend every write succeeds
            return Ok(buf.len());
        }
        let len = buf.len().min(self.1);
        let written = self.0.write(&buf[..len])?;
        self.1 -= written;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

/// Bounded FIFO of deferred sense triplets, drained by REQUEST SENSE.
#[derive(Debug, Default)]
pub struct SenseQueue {
    entries: VecDeque<SenseData>,
}

impl SenseQueue {
    const CAPACITY: usize = 8;

    /// Queue a triplet, dropping the oldest entry when full.
    pub fn push(&mut self, sense: SenseData) {
        if self.entries.len() == Self::CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back(sense);
    }

    /// Take the oldest queued triplet.
    pub fn pop(&mut self) -> Option<SenseData> {
        self.entries.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sense_data_fixed_format() {
        let s = SenseData::new(sense_key::ILLEGAL_REQUEST, asc::UNALIGNED_WRITE_COMMAND);
        let buf = s.to_fixed();
        assert_eq!(buf.len(), SenseData::SIZE);
        assert_eq!(buf[0], 0x70);
        assert_eq!(buf[2], 0x05);
        assert_eq!(buf[12], 0x21);
        assert_eq!(buf[13], 0x04);
    }

    #[test]
    fn cmd_output_sense_roundtrip() {
        let out = CmdOutput::check_condition(sense_key::ILLEGAL_REQUEST, asc::LBA_OUT_OF_RANGE);
        assert_eq!(out.status, status::CHECK_CONDITION);
        let s = out.sense_data().unwrap();
        assert_eq!(s.key, sense_key::ILLEGAL_REQUEST);
        assert_eq!(s.asc, 0x21);
        assert_eq!(s.ascq, 0x00);
    }

    #[test]
    fn truncating_writer_clips_payload() {
        let mut sink = Vec::new();
        let mut w = SilentlyTruncate::new(&mut sink, 4);
        w.write_all(&[1, 2, 3]).unwrap();
        w.write_all(&[4, 5, 6]).unwrap();
        w.write_all(&[7]).unwrap();
        assert_eq!(sink, vec![1, 2, 3, 4]);
    }

    #[test]
    fn sense_queue_drops_oldest() {
        let mut q = SenseQueue::default();
        for i in 0..10u16 {
            q.push(SenseData::new(sense_key::ILLEGAL_REQUEST, i));
        }
        let first = q.pop().unwrap();
        assert_eq!(first.ascq, 2);
    }
}
