//! SCSI command surface (C9).
//!
//! `ZdDevice::execute` maps each operation code + service action onto a
//! handler. Handlers return `CmdOutput` for everything SCSI-visible;
//! `CmdError` is reserved for transport failures on the data-in/data-out
//! streams.

mod admin;
mod inquiry;
mod mode;
mod report;
mod rw;
mod zone_mgmt;

use std::io::{Read, Write};

use tracing::debug;

use crate::device::ZdDevice;
use crate::scsi::{
    asc, opcode, sa_in_16, sense_key, var_len_sa, zbc_in_sa, CmdError, CmdOutput, Request,
};

/// Expected CDB length for an operation code.
fn cdb_len(op: u8) -> usize {
    match op >> 5 {
        0 => 6,
        1 | 2 => 10,
        4 => 16,
        5 => 12,
        _ => match op {
            opcode::VARIABLE_LENGTH => 32,
            _ => 16,
        },
    }
}

pub(crate) fn sense(key: u8, asc_ascq: u16) -> CmdOutput {
    CmdOutput::check_condition(key, asc_ascq)
}

pub(crate) fn invalid_cdb() -> CmdOutput {
    sense(sense_key::ILLEGAL_REQUEST, asc::INVALID_FIELD_IN_CDB)
}

impl ZdDevice {
    /// Execute one SCSI command against the device.
    pub fn execute<W: Write, R: Read>(
        &mut self,
        mut req: Request<'_, W, R>,
    ) -> Result<CmdOutput, CmdError> {
        let op = *req.cdb.first().ok_or(CmdError::CdbTooShort)?;
        if req.cdb.len() < cdb_len(op) {
            return Err(CmdError::CdbTooShort);
        }

        // commands arriving past the optimal open count are worth counting
        {
            let hdr = self.store.header();
            if hdr.counts.nr_open() > hdr.optimal_open {
                self.store.header_mut().stats.cmds_above_opt_lim += 1;
            }
        }
        debug!("dispatch op {op:#04x}");

        let result = match op {
            opcode::TEST_UNIT_READY => Ok(CmdOutput::ok()),
            opcode::REQUEST_SENSE => self.request_sense(&mut req),
            opcode::FORMAT_UNIT => self.format_unit(&req),
            opcode::INQUIRY => self.inquiry(&mut req),
            opcode::MODE_SENSE_6 => self.mode_sense(&mut req, false),
            opcode::MODE_SENSE_10 => self.mode_sense(&mut req, true),
            opcode::MODE_SELECT_6 => self.mode_select(&mut req, false),
            opcode::MODE_SELECT_10 => self.mode_select(&mut req, true),
            opcode::RECEIVE_DIAGNOSTIC_RESULTS => self.receive_diagnostics(&mut req),
            opcode::READ_CAPACITY_10 => self.read_capacity_10(&mut req),
            opcode::SANITIZE => self.sanitize(&req),
            opcode::READ_10 | opcode::READ_12 | opcode::READ_16 => self.read(&mut req),
            opcode::WRITE_10 | opcode::WRITE_12 | opcode::WRITE_16 => self.write(&mut req),
            opcode::SYNCHRONIZE_CACHE_10 | opcode::SYNCHRONIZE_CACHE_16 => {
                self.synchronize_cache()
            }
            opcode::SERVICE_ACTION_IN_16 => match req.cdb[1] & 0x1F {
                sa_in_16::READ_CAPACITY_16 => self.read_capacity_16(&mut req),
                _ => Ok(self.not_handled(op)),
            },
            opcode::ZBC_IN => {
                let sa = req.cdb[1] & 0x1F;
                match sa {
                    zbc_in_sa::REPORT_ZONES => self.report_zones(&mut req),
                    zbc_in_sa::REPORT_MUTATIONS => self.report_mutations(&mut req),
                    zbc_in_sa::REPORT_REALMS => self.report_realms(&mut req),
                    zbc_in_sa::REPORT_ZONE_DOMAINS => self.report_zone_domains(&mut req),
                    zbc_in_sa::ZONE_ACTIVATE_16 => self.zone_activate_16(&mut req, false),
                    zbc_in_sa::ZONE_QUERY_16 => self.zone_activate_16(&mut req, true),
                    _ => Ok(self.not_handled(op)),
                }
            }
            opcode::ZBC_OUT => self.zbc_out(&mut req),
            opcode::VARIABLE_LENGTH => {
                let sa = u16::from_be_bytes([req.cdb[8], req.cdb[9]]);
                match sa {
                    var_len_sa::ZONE_ACTIVATE_32 => self.zone_activate_32(&mut req, false),
                    var_len_sa::ZONE_QUERY_32 => self.zone_activate_32(&mut req, true),
                    _ => Ok(self.not_handled(op)),
                }
            }
            _ => Ok(self.not_handled(op)),
        };

        // mirror CHECK CONDITION sense into the deferred-sense FIFO so a
        // later REQUEST SENSE can replay it
        if op != opcode::REQUEST_SENSE {
            if let Ok(out) = &result {
                if out.status == crate::scsi::status::CHECK_CONDITION {
                    if let Some(sd) = out.sense_data() {
                        self.sense_queue.push(sd);
                    }
                }
            }
        }
        result
    }

    /// Unrecognized operation code or service action.
    fn not_handled(&mut self, op: u8) -> CmdOutput {
        self.store.header_mut().stats.nr_nh_cmds += 1;
        debug!("command {op:#04x} not handled");
        sense(
            sense_key::ILLEGAL_REQUEST,
            asc::INVALID_COMMAND_OPERATION_CODE,
        )
    }
}
