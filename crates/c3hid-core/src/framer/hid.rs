//! HID-over-I2C commands: command headers, feature reports, descriptor,
//! power, reset and input reports.

use byteorder::{ByteOrder, LittleEndian};
use tracing::{debug, instrument};

use super::{TransportError, TransportFramer};
use crate::protocol::constants::*;
use crate::protocol::header::{CommandHeader, HidDescriptor};
use crate::report::{HidReport, decode_report_with};
use crate::transport::HostBus;

impl<B: HostBus> TransportFramer<B> {
    /// Encode a command header against the current command register.
    pub fn build_command_header(&self, opcode: u8, report_id: u8, report_type: u8) -> Vec<u8> {
        CommandHeader::new(self.command_register, opcode, report_type, report_id).to_bytes()
    }

    /// Read a feature report. Returns `len` raw bytes starting at the length field.
    #[instrument(level = "debug", skip(self))]
    pub fn get_feature_report(
        &mut self,
        report_id: u8,
        len: usize,
    ) -> Result<Vec<u8>, TransportError> {
        let mut frame = self.build_command_header(OPCODE_GET_REPORT, report_id, REPORT_TYPE_FEATURE);
        frame.extend_from_slice(&self.data_register.to_le_bytes());
        self.send(&frame, false)?;
        self.receive(len)
    }

    /// Write a feature report carrying `payload` after the report id.
    #[instrument(level = "debug", skip(self, payload), fields(len = payload.len()))]
    pub fn set_feature_report(&mut self, report_id: u8, payload: &[u8]) -> Result<(), TransportError> {
        // length field counts itself and the report id
        let length = payload.len() + 3;
        if length > u16::MAX as usize {
            return Err(TransportError::ParameterOutOfRange(format!(
                "feature report of {length} bytes"
            )));
        }
        let mut frame = self.build_command_header(OPCODE_SET_REPORT, report_id, REPORT_TYPE_FEATURE);
        frame.extend_from_slice(&self.data_register.to_le_bytes());
        frame.extend_from_slice(&(length as u16).to_le_bytes());
        frame.push(report_id);
        frame.extend_from_slice(payload);
        self.send(&frame, true)
    }

    /// Read `len` bytes from a standard HID register.
    pub fn read_hid_register(&mut self, register: u16, len: usize) -> Result<Vec<u8>, TransportError> {
        self.send(&register.to_le_bytes(), false)?;
        let raw = self.receive(len)?;
        if raw.len() != len {
            return Err(TransportError::LengthMismatch {
                expected: len,
                actual: raw.len(),
            });
        }
        Ok(raw)
    }

    /// Read the HID descriptor and adopt its command and data registers.
    pub fn hid_descriptor(&mut self) -> Result<HidDescriptor, TransportError> {
        let raw = self.read_hid_register(HID_DESCRIPTOR_REGISTER, HidDescriptor::SIZE)?;
        let desc = HidDescriptor::from_bytes(&raw)?;
        debug!(
            cmd = desc.command_register,
            data = desc.data_register,
            vid = %format!("{:04X}", desc.vendor_id),
            pid = %format!("{:04X}", desc.product_id),
            "HID descriptor"
        );
        self.command_register = desc.command_register;
        self.data_register = desc.data_register;
        Ok(desc)
    }

    /// Switch the device between on and sleep.
    pub fn set_power(&mut self, on: bool) -> Result<(), TransportError> {
        let state = if on { 0x00 } else { 0x01 };
        let frame = CommandHeader::new(self.command_register, OPCODE_SET_POWER, 0, state).to_bytes();
        self.send(&frame, true)
    }

    /// Issue a HID reset. The device re-initializes, so the cached byte order
    /// is dropped.
    pub fn hid_reset(&mut self) -> Result<(), TransportError> {
        let frame = self.build_command_header(OPCODE_RESET, 0, 0);
        self.send(&frame, true)?;
        self.invalidate_endianness();
        Ok(())
    }

    /// Read the two-byte reset acknowledgment. True when it reads zero.
    pub fn read_reset_response(&mut self) -> Result<bool, TransportError> {
        let raw = self.receive(2)?;
        if raw.len() != 2 {
            return Err(TransportError::LengthMismatch {
                expected: 2,
                actual: raw.len(),
            });
        }
        Ok(LittleEndian::read_u16(&raw) == 0)
    }

    /// Read one input report of up to the configured maximum length and decode it.
    pub fn get_report(&mut self) -> Result<HidReport, TransportError> {
        let raw = self.receive(self.max_report_len)?;
        Ok(decode_report_with(&raw, self.absolute_layout))
    }

    /// Read an input report only if the device signals data ready.
    pub fn poll_report(&mut self) -> Result<Option<HidReport>, TransportError> {
        if !self.bus.data_ready_asserted() {
            return Ok(None);
        }
        self.get_report().map(Some)
    }
}

#[cfg(test)]
mod tests {
    use crate::framer::{TransportError, TransportFramer};
    use crate::protocol::constants::*;
    use crate::report::{AbsoluteLayout, ReportData};
    use crate::transport::{MockBus, SimulatedDevice};

    #[test]
    fn test_get_feature_report_frame() {
        let bus = MockBus::new();
        bus.queue_response(&[0x05, 0x00, 0x03, 0xAA, 0xBB]);
        let mut framer = TransportFramer::new(bus.clone(), 0x2C);
        let raw = framer.get_feature_report(3, 5).unwrap();
        assert_eq!(raw, vec![0x05, 0x00, 0x03, 0xAA, 0xBB]);

        let writes = bus.write_records();
        assert_eq!(writes[0].bytes, vec![0x05, 0x00, 0x33, 0x02, 0x06, 0x00]);
        assert!(!writes[0].stop);
    }

    #[test]
    fn test_set_feature_report_frame_with_escaped_id() {
        let bus = MockBus::new();
        let mut framer = TransportFramer::new(bus.clone(), 0x2C);
        framer.set_feature_report(15, &[0x01, 0x02]).unwrap();
        assert_eq!(
            bus.get_writes()[0],
            vec![0x05, 0x00, 0x3F, 0x03, 0x0F, 0x06, 0x00, 0x05, 0x00, 0x0F, 0x01, 0x02]
        );
    }

    #[test]
    fn test_feature_report_against_sim() {
        let sim = SimulatedDevice::default();
        let mut framer = TransportFramer::new(sim.clone(), sim.address());
        framer.set_feature_report(4, &[9, 8, 7]).unwrap();
        assert_eq!(sim.feature_report(4), Some(vec![9, 8, 7]));
        let raw = framer.get_feature_report(4, 6).unwrap();
        assert_eq!(raw, vec![0x06, 0x00, 0x04, 9, 8, 7]);
    }

    #[test]
    fn test_hid_descriptor_adopts_registers() {
        let sim = SimulatedDevice::default();
        let mut framer = TransportFramer::new(sim.clone(), sim.address());
        let desc = framer.hid_descriptor().unwrap();
        assert_eq!(desc.command_register, COMMAND_REGISTER);
        assert_eq!(desc.max_input_length as usize, MAX_REPORT_LEN);
        assert_eq!(desc.vendor_id, 0x0488);
    }

    #[test]
    fn test_short_hid_register_read_rejected() {
        let bus = MockBus::new();
        bus.queue_response(&[0x1E, 0x00, 0x00]);
        let mut framer = TransportFramer::new(bus.clone(), 0x2C);
        assert!(matches!(
            framer.hid_descriptor(),
            Err(TransportError::LengthMismatch {
                expected: 30,
                actual: 3
            })
        ));
        assert_eq!(bus.get_writes()[0], vec![0x20, 0x00]);
    }

    #[test]
    fn test_reset_and_power() {
        let sim = SimulatedDevice::default();
        let mut framer = TransportFramer::new(sim.clone(), sim.address());
        framer.endianness().unwrap();

        framer.hid_reset().unwrap();
        assert_eq!(framer.cached_endianness(), None);
        assert!(framer.read_reset_response().unwrap());

        framer.set_power(false).unwrap();
        assert!(!sim.is_powered());
        framer.set_power(true).unwrap();
        assert!(sim.is_powered());
    }

    #[test]
    fn test_poll_report() {
        let sim = SimulatedDevice::default();
        let mut framer = TransportFramer::new(sim.clone(), sim.address());
        assert!(framer.poll_report().unwrap().is_none());

        sim.push_input_report(&[0x08, 0x00, REPORT_ID_MOUSE, 0x01, 0x05, 0xFB, 0x00, 0x00]);
        let report = framer.poll_report().unwrap().unwrap();
        assert_eq!(report.report_id, REPORT_ID_MOUSE);
        assert!(matches!(report.data, ReportData::Mouse(m) if m.x == 5 && m.y == -5));
        assert!(framer.poll_report().unwrap().is_none());
    }

    #[test]
    fn test_get_report_uses_configured_absolute_layout() {
        let sim = SimulatedDevice::default();
        let mut framer = TransportFramer::new(sim.clone(), sim.address())
            .with_absolute_layout(AbsoluteLayout::Alps);

        let mut packet = vec![30, 0, REPORT_ID_ABSOLUTE, 0x00, 0x01];
        packet.extend_from_slice(&[0x10, 0x00, 0x20, 0x00, 0x85]);
        packet.resize(30, 0);
        sim.push_input_report(&packet);

        let report = framer.get_report().unwrap();
        let ReportData::AlpsAbsolute(a) = &report.data else {
            panic!("expected alps absolute report");
        };
        assert_eq!((a.fingers[0].x, a.fingers[0].y, a.fingers[0].z), (0x10, 0x20, 0x05));
        assert!(a.fingers[0].palm);
        assert_eq!(report.number_fingers(), 1);
    }
}
