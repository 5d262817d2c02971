//! Input report model and queries.
//!
//! Raw packets are turned into [`HidReport`] values by [`decode_report`].
//! Every report kind is an explicit variant decoded field by field; a packet
//! whose declared length does not match its kind decodes as
//! [`ReportData::Unknown`].

mod decode;

pub use decode::{MEASUREMENT_HEADER_LEN, decode_report, decode_report_with};

use serde::{Deserialize, Serialize};

use crate::protocol::constants::{CONFIDENCE_MASK, PALM_REJECT_MASK, SINGLE_SAMPLE_MASK};

/// Number of finger slots in the absolute multi-touch report.
pub const ABSOLUTE_FINGERS: usize = 5;

/// Layout of the 30-byte absolute report. Both share report id 9 and the
/// firmware build decides which one is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AbsoluteLayout {
    /// Contact flags, then palm/x/y per finger, buttons last.
    #[default]
    Cirque,
    /// Buttons and contact flags first, then x/y/z per finger.
    Alps,
}

/// A decoded input report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HidReport {
    /// Declared length from bytes 0-1.
    pub length: u16,
    pub report_id: u8,
    pub data: ReportData,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportData {
    Mouse(MouseReport),
    Pointer(PointerReport),
    Keyboard(KeyboardReport),
    AbsoluteMultiTouch(AbsoluteReport),
    AlpsAbsolute(AlpsAbsoluteReport),
    Stick(StickReport),
    MeasurementHeader(MeasurementHeader),
    /// Zero-length packet sent after a HID reset.
    ResetResponse,
    Unknown,
}

/// Relative mouse report (7 bytes, or 8 with horizontal pan).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MouseReport {
    pub buttons: u8,
    pub x: i8,
    pub y: i8,
    pub scroll: i8,
    pub pan: Option<i8>,
}

/// One contact of a precision touchpad report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Contact {
    pub confidence: bool,
    pub tip: bool,
    pub contact_id: u8,
    pub x: u16,
    pub y: u16,
}

/// Precision touchpad report with one to three contacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointerReport {
    pub contacts: Vec<Contact>,
    pub timestamp: u16,
    pub contact_count: u8,
    pub buttons: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyboardReport {
    pub modifiers: u8,
    pub reserved: u8,
    pub keycodes: [u8; 6],
}

/// One finger slot of the absolute multi-touch report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Finger {
    pub palm: u8,
    pub x: u16,
    pub y: u16,
}

impl Finger {
    pub fn is_palm_rejected(&self) -> bool {
        self.palm & PALM_REJECT_MASK != 0
    }

    pub fn is_confident(&self) -> bool {
        self.palm & CONFIDENCE_MASK != 0
    }

    pub fn is_single_sample(&self) -> bool {
        self.palm & SINGLE_SAMPLE_MASK != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbsoluteReport {
    pub contact_flags: u8,
    pub fingers: [Finger; ABSOLUTE_FINGERS],
    pub buttons: u8,
}

/// One finger slot of the Alps absolute report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AlpsFinger {
    pub x: u16,
    pub y: u16,
    /// 7-bit pressure.
    pub z: u8,
    pub palm: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlpsAbsoluteReport {
    pub buttons: u8,
    pub contact_flags: u8,
    pub fingers: [AlpsFinger; ABSOLUTE_FINGERS],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StickReport {
    pub buttons: u8,
    pub x: i16,
    pub y: i16,
    pub z: i16,
}

/// Leading part of a custom measurement report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeasurementHeader {
    pub valid_bytes: u16,
}

impl HidReport {
    pub fn unknown(length: u16, report_id: u8) -> Self {
        Self {
            length,
            report_id,
            data: ReportData::Unknown,
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.data == ReportData::Unknown
    }

    /// True if any button in `mask` is down. False for kinds without buttons.
    pub fn is_button_pressed(&self, mask: u8) -> bool {
        let buttons = match &self.data {
            ReportData::Mouse(m) => m.buttons,
            ReportData::Pointer(p) => p.buttons,
            ReportData::AbsoluteMultiTouch(a) => a.buttons,
            ReportData::AlpsAbsolute(a) => a.buttons,
            ReportData::Stick(s) => s.buttons,
            _ => 0,
        };
        buttons & mask != 0
    }

    /// Finger `n` is confident and not a rejected palm.
    pub fn is_finger_valid(&self, n: usize) -> bool {
        match &self.data {
            ReportData::AbsoluteMultiTouch(a) => a
                .fingers
                .get(n)
                .is_some_and(|f| f.is_confident() && !f.is_palm_rejected()),
            ReportData::AlpsAbsolute(a) => a.fingers.get(n).is_some_and(|f| !f.palm),
            ReportData::Pointer(p) => p.contacts.get(n).is_some_and(|c| c.confidence),
            _ => false,
        }
    }

    /// Finger `n` is touching the surface.
    pub fn is_finger_contacted(&self, n: usize) -> bool {
        match &self.data {
            ReportData::AbsoluteMultiTouch(AbsoluteReport { contact_flags, .. })
            | ReportData::AlpsAbsolute(AlpsAbsoluteReport { contact_flags, .. }) => {
                n < ABSOLUTE_FINGERS && *contact_flags & (1u8 << n) != 0
            }
            ReportData::Pointer(p) => p.contacts.get(n).is_some_and(|c| c.tip),
            _ => false,
        }
    }

    /// Number of fingers touching the surface.
    pub fn number_fingers(&self) -> u32 {
        match &self.data {
            ReportData::AbsoluteMultiTouch(AbsoluteReport { contact_flags, .. })
            | ReportData::AlpsAbsolute(AlpsAbsoluteReport { contact_flags, .. }) => {
                contact_flags.count_ones()
            }
            ReportData::Pointer(p) => p.contacts.iter().filter(|c| c.tip).count() as u32,
            _ => 0,
        }
    }
}
