//! Custom measurement mode: configuration block and result reports.

use byteorder::{ByteOrder, LittleEndian};
use tracing::{debug, warn};

use super::{TransportError, TransportFramer};
use crate::protocol::constants::REPORT_ID_MEASUREMENT;
use crate::protocol::registers::{
    MEAS_GROUP_COUNT, group_info_address, measurement_info_address, regs,
};
use crate::report::MEASUREMENT_HEADER_LEN;
use crate::transport::HostBus;

/// Upper bound on results in one measurement report (16 per measurement, 10 measurements).
pub const MAX_MEASUREMENT_RESULTS: usize = 160;

/// Global custom-measurement settings (7 bytes at 0x51000000).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MeasurementGlobalInfo {
    pub enable: bool,
    pub frame_millis: u16,
    pub persist: bool,
    pub restore: bool,
    pub por_enable: bool,
    pub low_power_mode: u8,
}

impl MeasurementGlobalInfo {
    pub const SIZE: usize = 7;

    pub fn from_bytes(raw: &[u8]) -> Option<Self> {
        if raw.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            enable: raw[0] != 0,
            frame_millis: LittleEndian::read_u16(&raw[1..3]),
            persist: raw[3] != 0,
            restore: raw[4] != 0,
            por_enable: raw[5] != 0,
            low_power_mode: raw[6],
        })
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let [lo, hi] = self.frame_millis.to_le_bytes();
        [
            u8::from(self.enable),
            lo,
            hi,
            u8::from(self.persist),
            u8::from(self.restore),
            u8::from(self.por_enable),
            self.low_power_mode,
        ]
    }
}

/// Calibration byte: run one calibration now.
const CALIBRATE_NOW: u8 = 0x40;
/// Calibration byte: periodic calibration enabled.
const CALIBRATION_ENABLED: u8 = 0x80;

/// Compensation settings of one measurement group (12 bytes per group block).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MeasurementGroupInfo {
    pub mode: u8,
    pub calibration: u8,
    pub frames_between_comps: u16,
    pub negative_threshold: u16,
    pub speed_threshold: u16,
    pub activity_threshold: u16,
    pub activity_timeout: u16,
}

impl MeasurementGroupInfo {
    pub const SIZE: usize = 12;

    pub fn from_bytes(raw: &[u8]) -> Option<Self> {
        if raw.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            mode: raw[0],
            calibration: raw[1],
            frames_between_comps: LittleEndian::read_u16(&raw[2..4]),
            negative_threshold: LittleEndian::read_u16(&raw[4..6]),
            speed_threshold: LittleEndian::read_u16(&raw[6..8]),
            activity_threshold: LittleEndian::read_u16(&raw[8..10]),
            activity_timeout: LittleEndian::read_u16(&raw[10..12]),
        })
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0] = self.mode;
        out[1] = self.calibration;
        LittleEndian::write_u16(&mut out[2..4], self.frames_between_comps);
        LittleEndian::write_u16(&mut out[4..6], self.negative_threshold);
        LittleEndian::write_u16(&mut out[6..8], self.speed_threshold);
        LittleEndian::write_u16(&mut out[8..10], self.activity_threshold);
        LittleEndian::write_u16(&mut out[10..12], self.activity_timeout);
        out
    }
}

/// Electrode and analog front-end setup of one measurement (41 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MeasurementConfig {
    pub control: u8,
    pub electrode_states: [u8; 24],
    pub gain: u8,
    pub global_offset: u8,
    pub channel_offset_multiplier: u8,
    pub channel_offsets: [u8; 8],
    pub toggle_frequency: u8,
    pub aperture_length: u8,
    pub waveform: u8,
    pub adc_channel_mask: u16,
}

impl MeasurementConfig {
    pub const SIZE: usize = 41;

    pub fn from_bytes(raw: &[u8]) -> Option<Self> {
        if raw.len() < Self::SIZE {
            return None;
        }
        let mut electrode_states = [0u8; 24];
        electrode_states.copy_from_slice(&raw[1..25]);
        let mut channel_offsets = [0u8; 8];
        channel_offsets.copy_from_slice(&raw[28..36]);
        Some(Self {
            control: raw[0],
            electrode_states,
            gain: raw[25],
            global_offset: raw[26],
            channel_offset_multiplier: raw[27],
            channel_offsets,
            toggle_frequency: raw[36],
            aperture_length: raw[37],
            waveform: raw[38],
            adc_channel_mask: LittleEndian::read_u16(&raw[39..41]),
        })
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0] = self.control;
        out[1..25].copy_from_slice(&self.electrode_states);
        out[25] = self.gain;
        out[26] = self.global_offset;
        out[27] = self.channel_offset_multiplier;
        out[28..36].copy_from_slice(&self.channel_offsets);
        out[36] = self.toggle_frequency;
        out[37] = self.aperture_length;
        out[38] = self.waveform;
        LittleEndian::write_u16(&mut out[39..41], self.adc_channel_mask);
        out
    }
}

fn group_address(group: u8) -> Result<u32, TransportError> {
    group_info_address(u32::from(group)).ok_or_else(|| {
        TransportError::ParameterOutOfRange(format!(
            "measurement group {group} (max {})",
            MEAS_GROUP_COUNT - 1
        ))
    })
}

fn config_address(index: u8) -> Result<u32, TransportError> {
    measurement_info_address(u32::from(index)).ok_or_else(|| {
        TransportError::ParameterOutOfRange(format!("measurement index {index}"))
    })
}

impl<B: HostBus> TransportFramer<B> {
    pub fn read_measurement_info(&mut self) -> Result<MeasurementGlobalInfo, TransportError> {
        let raw = self.read_extended_memory(regs::MEAS_GLOBAL_INFO.address, MeasurementGlobalInfo::SIZE)?;
        MeasurementGlobalInfo::from_bytes(&raw).ok_or(TransportError::LengthMismatch {
            expected: MeasurementGlobalInfo::SIZE,
            actual: raw.len(),
        })
    }

    pub fn write_measurement_info(
        &mut self,
        info: &MeasurementGlobalInfo,
    ) -> Result<(), TransportError> {
        self.write_extended_memory(regs::MEAS_GLOBAL_INFO.address, &info.to_bytes())
    }

    fn update_measurement_info(
        &mut self,
        f: impl FnOnce(&mut MeasurementGlobalInfo),
    ) -> Result<(), TransportError> {
        let mut info = self.read_measurement_info()?;
        f(&mut info);
        self.write_measurement_info(&info)
    }

    pub fn start_measurements(&mut self) -> Result<(), TransportError> {
        self.update_measurement_info(|i| i.enable = true)
    }

    pub fn stop_measurements(&mut self) -> Result<(), TransportError> {
        self.update_measurement_info(|i| i.enable = false)
    }

    pub fn set_measurement_period(&mut self, millis: u16) -> Result<(), TransportError> {
        self.update_measurement_info(|i| i.frame_millis = millis)
    }

    pub fn read_group_info(&mut self, group: u8) -> Result<MeasurementGroupInfo, TransportError> {
        let address = group_address(group)?;
        let raw = self.read_extended_memory(address, MeasurementGroupInfo::SIZE)?;
        MeasurementGroupInfo::from_bytes(&raw).ok_or(TransportError::LengthMismatch {
            expected: MeasurementGroupInfo::SIZE,
            actual: raw.len(),
        })
    }

    pub fn write_group_info(
        &mut self,
        group: u8,
        info: &MeasurementGroupInfo,
    ) -> Result<(), TransportError> {
        let address = group_address(group)?;
        self.write_extended_memory(address, &info.to_bytes())
    }

    fn update_group_calibration(
        &mut self,
        group: u8,
        f: impl FnOnce(u8) -> u8,
    ) -> Result<(), TransportError> {
        let mut info = self.read_group_info(group)?;
        info.calibration = f(info.calibration);
        self.write_group_info(group, &info)
    }

    /// Request a one-shot calibration of `group`.
    pub fn calibrate_group(&mut self, group: u8) -> Result<(), TransportError> {
        self.update_group_calibration(group, |c| c | CALIBRATE_NOW)
    }

    pub fn set_group_calibration(&mut self, group: u8, enabled: bool) -> Result<(), TransportError> {
        self.update_group_calibration(group, |c| {
            if enabled {
                c | CALIBRATION_ENABLED
            } else {
                c & !CALIBRATION_ENABLED
            }
        })
    }

    /// Calibrate every group, stopping at the first failure.
    pub fn calibrate_all_groups(&mut self) -> Result<(), TransportError> {
        (0..MEAS_GROUP_COUNT as u8).try_for_each(|g| self.calibrate_group(g))
    }

    pub fn set_all_group_calibration(&mut self, enabled: bool) -> Result<(), TransportError> {
        (0..MEAS_GROUP_COUNT as u8).try_for_each(|g| self.set_group_calibration(g, enabled))
    }

    pub fn read_measurement_config(&mut self, index: u8) -> Result<MeasurementConfig, TransportError> {
        let address = config_address(index)?;
        let raw = self.read_extended_memory(address, MeasurementConfig::SIZE)?;
        MeasurementConfig::from_bytes(&raw).ok_or(TransportError::LengthMismatch {
            expected: MeasurementConfig::SIZE,
            actual: raw.len(),
        })
    }

    pub fn write_measurement_config(
        &mut self,
        index: u8,
        config: &MeasurementConfig,
    ) -> Result<(), TransportError> {
        let address = config_address(index)?;
        debug!(index, address = %format!("0x{address:08X}"), "Write measurement config");
        self.write_extended_memory(address, &config.to_bytes())
    }

    /// Read one custom measurement report.
    ///
    /// The header is read first to learn the result count, then the whole
    /// report is read again with the results.
    pub fn read_measurements(&mut self) -> Result<Vec<i16>, TransportError> {
        let header = self.receive(MEASUREMENT_HEADER_LEN)?;
        if header.len() != MEASUREMENT_HEADER_LEN {
            return Err(TransportError::LengthMismatch {
                expected: MEASUREMENT_HEADER_LEN,
                actual: header.len(),
            });
        }
        if header[2] != REPORT_ID_MEASUREMENT {
            warn!(report_id = header[2], "Not a measurement report");
            return Err(TransportError::ParameterOutOfRange(format!(
                "report id {} is not a measurement report",
                header[2]
            )));
        }

        let valid = LittleEndian::read_u16(&header[3..5]) as usize;
        if valid > MAX_MEASUREMENT_RESULTS * 2 {
            return Err(TransportError::LengthMismatch {
                expected: MAX_MEASUREMENT_RESULTS * 2,
                actual: valid,
            });
        }

        let expected = MEASUREMENT_HEADER_LEN + valid;
        let raw = self.receive(expected)?;
        if raw.len() != expected {
            return Err(TransportError::LengthMismatch {
                expected,
                actual: raw.len(),
            });
        }
        let results: Vec<i16> = raw[MEASUREMENT_HEADER_LEN..]
            .chunks_exact(2)
            .map(LittleEndian::read_i16)
            .collect();
        debug!(count = results.len(), "Measurement results");
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::SimulatedDevice;

    #[test]
    fn test_global_info_start_stop() {
        let sim = SimulatedDevice::default();
        let mut framer = TransportFramer::new(sim.clone(), sim.address());

        framer.set_measurement_period(20).unwrap();
        framer.start_measurements().unwrap();
        let info = framer.read_measurement_info().unwrap();
        assert!(info.enable);
        assert_eq!(info.frame_millis, 20);
        assert_eq!(sim.memory(0x5100_0000, 3), vec![0x01, 20, 0]);

        framer.stop_measurements().unwrap();
        assert!(!framer.read_measurement_info().unwrap().enable);
    }

    #[test]
    fn test_group_calibration_bits() {
        let sim = SimulatedDevice::default();
        let mut framer = TransportFramer::new(sim.clone(), sim.address());

        let info = MeasurementGroupInfo {
            mode: 1,
            frames_between_comps: 300,
            activity_timeout: 0x1234,
            ..MeasurementGroupInfo::default()
        };
        framer.write_group_info(2, &info).unwrap();
        assert_eq!(sim.memory(0x5120_2000, 4), vec![1, 0, 0x2C, 0x01]);

        framer.calibrate_group(2).unwrap();
        framer.set_group_calibration(2, true).unwrap();
        let read = framer.read_group_info(2).unwrap();
        assert_eq!(read.calibration, CALIBRATE_NOW | CALIBRATION_ENABLED);
        assert_eq!(read.activity_timeout, 0x1234);

        framer.set_group_calibration(2, false).unwrap();
        assert_eq!(framer.read_group_info(2).unwrap().calibration, CALIBRATE_NOW);
    }

    #[test]
    fn test_all_groups_calibrated() {
        let sim = SimulatedDevice::default();
        let mut framer = TransportFramer::new(sim.clone(), sim.address());
        framer.calibrate_all_groups().unwrap();
        framer.set_all_group_calibration(true).unwrap();
        for group in 0..5u32 {
            let calibration = sim.memory(0x5120_0001 + group * 0x1000, 1)[0];
            assert_eq!(calibration, CALIBRATE_NOW | CALIBRATION_ENABLED);
        }
    }

    #[test]
    fn test_group_and_config_index_bounds() {
        let sim = SimulatedDevice::default();
        let mut framer = TransportFramer::new(sim.clone(), sim.address());
        assert!(matches!(
            framer.read_group_info(5),
            Err(TransportError::ParameterOutOfRange(_))
        ));
        assert!(matches!(
            framer.write_measurement_config(20, &MeasurementConfig::default()),
            Err(TransportError::ParameterOutOfRange(_))
        ));
    }

    #[test]
    fn test_measurement_config_layout() {
        let sim = SimulatedDevice::default();
        let mut framer = TransportFramer::new(sim.clone(), sim.address());

        let mut config = MeasurementConfig {
            control: 0x81,
            gain: 3,
            waveform: 2,
            adc_channel_mask: 0x0F0F,
            ..MeasurementConfig::default()
        };
        config.electrode_states[23] = 0x55;
        config.channel_offsets[0] = 9;
        framer.write_measurement_config(1, &config).unwrap();

        let raw = sim.memory(0x5110_1000, MeasurementConfig::SIZE);
        assert_eq!(raw[0], 0x81);
        assert_eq!(raw[24], 0x55);
        assert_eq!(raw[25], 3);
        assert_eq!(raw[28], 9);
        assert_eq!(&raw[39..41], &[0x0F, 0x0F]);
        assert_eq!(framer.read_measurement_config(1).unwrap(), config);
    }

    #[test]
    fn test_read_measurements() {
        let sim = SimulatedDevice::default();
        let mut framer = TransportFramer::new(sim.clone(), sim.address());

        let mut report = vec![0x00, 0x00, REPORT_ID_MEASUREMENT, 0x06, 0x00];
        for v in [100i16, -2, 3000] {
            report.extend_from_slice(&v.to_le_bytes());
        }
        let len = report.len() as u16;
        report[0..2].copy_from_slice(&len.to_le_bytes());
        sim.push_input_report(&report);

        assert_eq!(framer.read_measurements().unwrap(), vec![100, -2, 3000]);
    }

    #[test]
    fn test_read_measurements_rejects_other_reports() {
        let sim = SimulatedDevice::default();
        let mut framer = TransportFramer::new(sim.clone(), sim.address());
        sim.push_input_report(&[0x08, 0x00, 0x06, 0, 0, 0, 0, 0]);
        assert!(framer.read_measurements().is_err());
    }
}
