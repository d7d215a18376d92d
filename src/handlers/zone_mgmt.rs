//! ZBC OUT service actions: zone management plus MUTATE.

use std::io::{Read, Write};

use tracing::warn;

use crate::device::ZdDevice;
use crate::profile::{DeviceModel, DeviceType, PROFILES};
use crate::scsi::bytes::{get_be16, get_be32, get_be64};
use crate::scsi::{asc, sense_key, zbc_out_sa, CmdError, CmdOutput, Request};
use crate::zone::ops::ZoneMgmtOp;

use super::{invalid_cdb, sense};

impl ZdDevice {
    pub(super) fn zbc_out<W: Write, R: Read>(
        &mut self,
        req: &mut Request<'_, W, R>,
    ) -> Result<CmdOutput, CmdError> {
        let sa = req.cdb[1] & 0x1F;
        if sa == zbc_out_sa::MUTATE {
            return self.mutate_cmd(req);
        }
        if !self.profile.is_zoned() {
            return Ok(self.not_handled(req.cdb[0]));
        }
        let op = match sa {
            zbc_out_sa::CLOSE_ZONE => ZoneMgmtOp::Close,
            zbc_out_sa::FINISH_ZONE => ZoneMgmtOp::Finish,
            zbc_out_sa::OPEN_ZONE => ZoneMgmtOp::Open,
            zbc_out_sa::RESET_WRITE_POINTER => ZoneMgmtOp::Reset,
            zbc_out_sa::SEQUENTIALIZE_ZONE => ZoneMgmtOp::Sequentialize,
            _ => return Ok(self.not_handled(req.cdb[0])),
        };

        let lba = get_be64(req.cdb, 2);
        let count = get_be16(req.cdb, 12) as u32;
        let all = req.cdb[14] & 0x01 != 0;

        let result = if all {
            if count != 0 {
                return Ok(invalid_cdb());
            }
            self.store.zone_op_all(op)
        } else {
            self.store.zone_op_range(op, lba, count)
        };
        match result {
            Ok(()) => Ok(CmdOutput::ok()),
            Err(err) => {
                let (key, code) = err.sense();
                Ok(sense(key, code))
            }
        }
    }

    /// MUTATE: reformat the metadata region to a different personality,
    /// keeping the backing file.
    fn mutate_cmd<W: Write, R: Read>(
        &mut self,
        req: &mut Request<'_, W, R>,
    ) -> Result<CmdOutput, CmdError> {
        let dev_type = get_be32(req.cdb, 2);
        let model = get_be32(req.cdb, 6);
        let Some(model) = DeviceModel::from_wire(model) else {
            return Ok(invalid_cdb());
        };
        let Some(dev_type) = DeviceType::from_wire(dev_type) else {
            return Ok(invalid_cdb());
        };
        if !PROFILES
            .iter()
            .any(|p| p.model == model && p.dev_type == dev_type)
        {
            return Ok(invalid_cdb());
        }
        match self.mutate(model) {
            Ok(()) => Ok(CmdOutput::ok()),
            Err(err) => {
                warn!(%err, "mutation failed");
                Ok(sense(
                    sense_key::HARDWARE_ERROR,
                    asc::INTERNAL_TARGET_FAILURE,
                ))
            }
        }
    }
}
