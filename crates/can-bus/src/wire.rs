//! On-wire layout of the kernel `can_frame` record.
//!
//! A raw CAN socket exchanges fixed-size records: a 32-bit identifier field
//! whose high bits carry the frame-format flags, an 8-bit data length code,
//! three reserved bytes, and an 8-byte payload. Records are read and written
//! whole; the kernel never splits one across two transfers.

use crate::{CanFrame, CanId, Result, TransportError};

/// Extended frame format (29-bit identifier) flag.
pub const CAN_EFF_FLAG: u32 = 0x8000_0000;
/// Remote transmission request flag.
pub const CAN_RTR_FLAG: u32 = 0x4000_0000;
/// Error message frame flag.
pub const CAN_ERR_FLAG: u32 = 0x2000_0000;

/// Valid bits of a standard (11-bit) identifier.
pub const CAN_SFF_MASK: u32 = 0x0000_07FF;
/// Valid bits of an extended (29-bit) identifier.
pub const CAN_EFF_MASK: u32 = 0x1FFF_FFFF;

/// Size of one record: u32 id, u8 dlc, 3 reserved, 8 data.
pub const RECORD_LEN: usize = 16;

/// Encode one frame as the fixed-size socket record.
///
/// The identifier field uses the host's native byte order, matching the
/// kernel struct layout.
pub fn encode(frame: &CanFrame) -> [u8; RECORD_LEN] {
    let mut raw = frame.id.raw();
    if frame.id.is_extended() {
        raw |= CAN_EFF_FLAG;
    }
    if frame.rtr {
        raw |= CAN_RTR_FLAG;
    }
    if frame.err {
        raw |= CAN_ERR_FLAG;
    }
    let mut out = [0u8; RECORD_LEN];
    out[0..4].copy_from_slice(&raw.to_ne_bytes());
    out[4] = frame.len;
    out[8..16].copy_from_slice(&frame.data);
    out
}

/// Decode one fixed-size socket record.
pub fn decode(record: &[u8]) -> Result<CanFrame> {
    if record.len() < RECORD_LEN {
        return Err(TransportError::InvalidFrame("short record"));
    }
    let mut id_bytes = [0u8; 4];
    id_bytes.copy_from_slice(&record[0..4]);
    let raw = u32::from_ne_bytes(id_bytes);

    let dlc = record[4];
    if dlc > 8 {
        return Err(TransportError::InvalidFrame("dlc > 8"));
    }

    let id = if raw & CAN_EFF_FLAG != 0 {
        CanId::extended(raw & CAN_EFF_MASK)
            .ok_or(TransportError::InvalidFrame("extended id out of range"))?
    } else {
        CanId::standard((raw & CAN_SFF_MASK) as u16)
            .ok_or(TransportError::InvalidFrame("standard id out of range"))?
    };

    let mut data = [0u8; 8];
    data.copy_from_slice(&record[8..16]);
    Ok(CanFrame {
        id,
        len: dlc,
        data,
        rtr: raw & CAN_RTR_FLAG != 0,
        err: raw & CAN_ERR_FLAG != 0,
    })
}
