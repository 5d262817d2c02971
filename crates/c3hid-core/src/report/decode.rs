//! Packet classification and per-kind decoders.

use byteorder::{ByteOrder, LittleEndian};

use super::*;
use crate::protocol::constants::*;

/// Length of the custom measurement header (length, id, valid-bytes).
pub const MEASUREMENT_HEADER_LEN: usize = 5;

const HEADER_LEN: usize = 3;
const CONTACT_LEN: usize = 5;
const POINTER_TRAILER_LEN: usize = 4;
const MAX_POINTER_CONTACTS: usize = 3;

const MOUSE_LEN: usize = 7;
const MOUSE_PAN_LEN: usize = 8;
const KEYBOARD_LEN: usize = 11;
const ABSOLUTE_LEN: usize = 30;
const STICK_LEN: usize = 10;

/// Decode one input packet, reading absolute reports in the Cirque layout.
///
/// Bytes 0-1 hold the declared length and byte 2 the report id. A zero
/// length is a reset acknowledgment. Unrecognized ids, lengths that do not
/// fit the report kind and packets shorter than their declared length all
/// decode as `Unknown`.
pub fn decode_report(packet: &[u8]) -> HidReport {
    decode_report_with(packet, AbsoluteLayout::Cirque)
}

/// Decode one input packet with an explicit absolute report layout.
pub fn decode_report_with(packet: &[u8], layout: AbsoluteLayout) -> HidReport {
    if packet.len() < 2 {
        return HidReport::unknown(0, 0);
    }
    let length = LittleEndian::read_u16(&packet[0..2]);
    if length == 0 {
        return HidReport {
            length: 0,
            report_id: 0,
            data: ReportData::ResetResponse,
        };
    }

    let declared = length as usize;
    let Some(&report_id) = packet.get(2) else {
        return HidReport::unknown(length, 0);
    };
    if declared < HEADER_LEN || declared > packet.len() {
        return HidReport::unknown(length, report_id);
    }

    let body = &packet[..declared];
    let data = match report_id {
        REPORT_ID_PTP => decode_pointer(body),
        REPORT_ID_MOUSE => decode_mouse(body),
        REPORT_ID_KEYBOARD => decode_keyboard(body),
        REPORT_ID_ABSOLUTE => match layout {
            AbsoluteLayout::Cirque => decode_absolute(body),
            AbsoluteLayout::Alps => decode_alps_absolute(body),
        },
        REPORT_ID_STICK => decode_stick(body),
        REPORT_ID_MEASUREMENT => decode_measurement(body),
        _ => None,
    };

    HidReport {
        length,
        report_id,
        data: data.unwrap_or(ReportData::Unknown),
    }
}

/// Contact count follows from `len == 3 + 5n + 4`.
fn pointer_contacts(len: usize) -> Option<usize> {
    let payload = len.checked_sub(HEADER_LEN + POINTER_TRAILER_LEN)?;
    let n = payload / CONTACT_LEN;
    (payload % CONTACT_LEN == 0 && (1..=MAX_POINTER_CONTACTS).contains(&n)).then_some(n)
}

fn decode_pointer(b: &[u8]) -> Option<ReportData> {
    let n = pointer_contacts(b.len())?;
    let contacts = (0..n)
        .map(|i| {
            let c = &b[HEADER_LEN + i * CONTACT_LEN..HEADER_LEN + (i + 1) * CONTACT_LEN];
            Contact {
                confidence: c[0] & 0x01 != 0,
                tip: c[0] & 0x02 != 0,
                contact_id: c[0] >> 2,
                x: LittleEndian::read_u16(&c[1..3]),
                y: LittleEndian::read_u16(&c[3..5]),
            }
        })
        .collect();
    let t = &b[HEADER_LEN + n * CONTACT_LEN..];
    Some(ReportData::Pointer(PointerReport {
        contacts,
        timestamp: LittleEndian::read_u16(&t[0..2]),
        contact_count: t[2],
        buttons: t[3],
    }))
}

fn decode_mouse(b: &[u8]) -> Option<ReportData> {
    if b.len() != MOUSE_LEN && b.len() != MOUSE_PAN_LEN {
        return None;
    }
    Some(ReportData::Mouse(MouseReport {
        buttons: b[3],
        x: b[4] as i8,
        y: b[5] as i8,
        scroll: b[6] as i8,
        pan: b.get(7).map(|&p| p as i8),
    }))
}

fn decode_keyboard(b: &[u8]) -> Option<ReportData> {
    if b.len() != KEYBOARD_LEN {
        return None;
    }
    let mut keycodes = [0u8; 6];
    keycodes.copy_from_slice(&b[5..11]);
    Some(ReportData::Keyboard(KeyboardReport {
        modifiers: b[3],
        reserved: b[4],
        keycodes,
    }))
}

fn decode_absolute(b: &[u8]) -> Option<ReportData> {
    if b.len() != ABSOLUTE_LEN {
        return None;
    }
    let mut fingers = [Finger::default(); ABSOLUTE_FINGERS];
    for (i, finger) in fingers.iter_mut().enumerate() {
        let f = &b[4 + i * CONTACT_LEN..4 + (i + 1) * CONTACT_LEN];
        *finger = Finger {
            palm: f[0],
            x: LittleEndian::read_u16(&f[1..3]),
            y: LittleEndian::read_u16(&f[3..5]),
        };
    }
    Some(ReportData::AbsoluteMultiTouch(AbsoluteReport {
        contact_flags: b[3],
        fingers,
        buttons: b[29],
    }))
}

fn decode_alps_absolute(b: &[u8]) -> Option<ReportData> {
    if b.len() != ABSOLUTE_LEN {
        return None;
    }
    let mut fingers = [AlpsFinger::default(); ABSOLUTE_FINGERS];
    for (i, finger) in fingers.iter_mut().enumerate() {
        let f = &b[5 + i * CONTACT_LEN..5 + (i + 1) * CONTACT_LEN];
        *finger = AlpsFinger {
            x: LittleEndian::read_u16(&f[0..2]),
            y: LittleEndian::read_u16(&f[2..4]),
            z: f[4] & 0x7F,
            palm: f[4] & 0x80 != 0,
        };
    }
    Some(ReportData::AlpsAbsolute(AlpsAbsoluteReport {
        buttons: b[3],
        contact_flags: b[4],
        fingers,
    }))
}

fn decode_stick(b: &[u8]) -> Option<ReportData> {
    if b.len() != STICK_LEN {
        return None;
    }
    Some(ReportData::Stick(StickReport {
        buttons: b[3],
        x: LittleEndian::read_i16(&b[4..6]),
        y: LittleEndian::read_i16(&b[6..8]),
        z: LittleEndian::read_i16(&b[8..10]),
    }))
}

fn decode_measurement(b: &[u8]) -> Option<ReportData> {
    if b.len() < MEASUREMENT_HEADER_LEN {
        return None;
    }
    let valid_bytes = LittleEndian::read_u16(&b[3..5]);
    if MEASUREMENT_HEADER_LEN + valid_bytes as usize > b.len() {
        return None;
    }
    Some(ReportData::MeasurementHeader(MeasurementHeader { valid_bytes }))
}
