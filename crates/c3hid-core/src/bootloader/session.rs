//! Bootloader session: status polling, memory access and the image
//! programming pipeline.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use super::command::{BootCommand, CommandError, FormatImageParams};
use super::image::{FirmwareImage, ImageError};
use super::status::{BootloaderStatus, DeviceError, Mode, StatusError};
use crate::config::BootloaderConfig;
use crate::events::{BootEvent, BootObserver, TracingObserver};
use crate::framer::{TransportError, TransportFramer};
use crate::protocol::constants::*;
use crate::retry::{Attempt, Clock, PollError, SystemClock};
use crate::transport::HostBus;

/// Pipeline stage a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    StatusCheck,
    Reset,
    ModeCheck,
    InvokeBootloader,
    FormatImage,
    FormatRegion,
    WriteImage,
    Flush,
    Validate,
    FinalReset,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::StatusCheck => write!(f, "STATUS_CHECK"),
            Stage::Reset => write!(f, "RESET"),
            Stage::ModeCheck => write!(f, "MODE_CHECK"),
            Stage::InvokeBootloader => write!(f, "INVOKE_BOOTLOADER"),
            Stage::FormatImage => write!(f, "FORMAT_IMAGE"),
            Stage::FormatRegion => write!(f, "FORMAT_REGION"),
            Stage::WriteImage => write!(f, "WRITE_IMAGE"),
            Stage::Flush => write!(f, "FLUSH"),
            Stage::Validate => write!(f, "VALIDATE"),
            Stage::FinalReset => write!(f, "FINAL_RESET"),
        }
    }
}

/// One step actually executed by [`BootloaderSession::program`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    StatusCheck,
    Reset,
    InvokeBootloader,
    FormatImage,
    FormatRegion,
    /// Write phase with its chunk count.
    WriteChunks(usize),
    Flush,
    Validate,
    FinalReset,
}

#[derive(Error, Debug)]
pub enum BootloaderError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    #[error("Malformed status report: {0}")]
    Status(#[from] StatusError),

    #[error("Device still busy after {attempts} status reads")]
    Timeout { attempts: u32 },

    #[error("Invalid sentinel 0x{0:04X}")]
    InvalidSentinel(u16),

    #[error("Device error: {0}")]
    Device(DeviceError),

    #[error("Image not marked valid after validation")]
    ImageNotValid,

    #[error("Device did not enter bootloader mode")]
    NotInBootloader,

    #[error("Image error: {0}")]
    Image(#[from] ImageError),

    #[error("Parameter out of range: {0}")]
    ParameterOutOfRange(String),
}

/// Failed programming run, tagged with the first failing stage.
#[derive(Error, Debug)]
#[error("Stage {stage} failed: {cause}")]
pub struct ProgramError {
    pub stage: Stage,
    #[source]
    pub cause: BootloaderError,
    /// A recovery format-image was issued after the failure.
    pub reformatted: bool,
    pub steps: Vec<Step>,
}

/// Summary of a successful programming run.
#[derive(Debug, Clone)]
pub struct ProgramReport {
    pub steps: Vec<Step>,
    pub chunks: usize,
    pub bytes: usize,
    /// Status read after the final reset.
    pub final_status: BootloaderStatus,
}

struct Failure {
    stage: Stage,
    cause: BootloaderError,
    reformat: bool,
}

impl Failure {
    fn at(stage: Stage) -> impl FnOnce(BootloaderError) -> Failure {
        move |cause| Failure {
            stage,
            cause,
            reformat: false,
        }
    }

    fn reformat_at(stage: Stage) -> impl FnOnce(BootloaderError) -> Failure {
        move |cause| Failure {
            stage,
            cause,
            reformat: true,
        }
    }
}

/// Drives one device through the bootloader protocol.
pub struct BootloaderSession<B: HostBus, O: BootObserver = TracingObserver, C: Clock = SystemClock> {
    framer: TransportFramer<B>,
    config: BootloaderConfig,
    observer: Arc<O>,
    clock: C,
    last_status: Option<BootloaderStatus>,
}

impl<B: HostBus> BootloaderSession<B, TracingObserver, SystemClock> {
    /// Create a new session with default tracing observer.
    pub fn new(framer: TransportFramer<B>, config: BootloaderConfig) -> Self {
        Self::with_observer(framer, config, Arc::new(TracingObserver))
    }
}

impl<B: HostBus, O: BootObserver> BootloaderSession<B, O, SystemClock> {
    /// Create a new session with a custom observer.
    pub fn with_observer(framer: TransportFramer<B>, config: BootloaderConfig, observer: Arc<O>) -> Self {
        Self {
            framer,
            config,
            observer,
            clock: SystemClock::default(),
            last_status: None,
        }
    }
}

impl<B: HostBus, O: BootObserver, C: Clock> BootloaderSession<B, O, C> {
    /// Replace the clock used for every wait.
    pub fn with_clock<C2: Clock>(self, clock: C2) -> BootloaderSession<B, O, C2> {
        BootloaderSession {
            framer: self.framer,
            config: self.config,
            observer: self.observer,
            clock,
            last_status: self.last_status,
        }
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn config(&self) -> &BootloaderConfig {
        &self.config
    }

    pub fn framer(&self) -> &TransportFramer<B> {
        &self.framer
    }

    pub fn framer_mut(&mut self) -> &mut TransportFramer<B> {
        &mut self.framer
    }

    pub fn into_framer(self) -> TransportFramer<B> {
        self.framer
    }

    /// Most recent status read by this session.
    pub fn last_status(&self) -> Option<&BootloaderStatus> {
        self.last_status.as_ref()
    }

    fn wait(&mut self, ms: u64) {
        self.clock.sleep(Duration::from_millis(ms));
    }

    fn enter(&self, stage: Stage) {
        self.observer.on_event(&BootEvent::StageStarted { stage });
    }

    // ------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------

    /// Read the status report, polling while the device is busy.
    ///
    /// An unknown sentinel fails at once with `InvalidSentinel`; a busy flag
    /// that outlasts the retry policy yields `Timeout`.
    #[instrument(level = "debug", skip(self))]
    pub fn get_status(&mut self) -> Result<BootloaderStatus, BootloaderError> {
        let policy = self.config.retry;
        let report_id = self.config.report_id;
        let Self {
            framer,
            observer,
            clock,
            ..
        } = &mut *self;

        let polled = policy.poll(clock, || -> Result<Attempt<BootloaderStatus>, BootloaderError> {
            let raw = framer.get_feature_report(report_id, BOOTLOADER_REPORT_LEN)?;
            let status = BootloaderStatus::parse(&raw)?;
            observer.on_event(&BootEvent::Status {
                sentinel: status.sentinel,
                version: status.version,
                last_error: status.last_error,
                flags: status.flags,
            });
            if status.mode == Mode::Invalid {
                return Err(BootloaderError::InvalidSentinel(status.sentinel));
            }
            if status.is_busy() {
                Ok(Attempt::Pending)
            } else {
                Ok(Attempt::Ready(status))
            }
        });

        let status = match polled {
            Ok(status) => status,
            Err(PollError::Failed(e)) => return Err(e),
            Err(PollError::Exhausted { attempts }) => {
                return Err(BootloaderError::Timeout { attempts });
            }
        };
        self.last_status = Some(status.clone());
        Ok(status)
    }

    /// `get_status`, failing if the device reports an error.
    fn checked_status(&mut self) -> Result<BootloaderStatus, BootloaderError> {
        let status = self.get_status()?;
        match status.error() {
            Some(e) => Err(BootloaderError::Device(e)),
            None => Ok(status),
        }
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    fn send(&mut self, command: BootCommand<'_>) -> Result<(), BootloaderError> {
        let payload = command.encode()?;
        debug!(command = command.name(), "Bootloader command");
        self.framer.set_feature_report(self.config.report_id, &payload)?;
        Ok(())
    }

    pub fn reset(&mut self) -> Result<(), BootloaderError> {
        self.send(BootCommand::Reset)
    }

    pub fn invoke_bootloader(&mut self) -> Result<(), BootloaderError> {
        self.send(BootCommand::InvokeBootloader)
    }

    pub fn flush(&mut self) -> Result<(), BootloaderError> {
        self.send(BootCommand::Flush)
    }

    pub fn validate(&mut self, image_type: u8) -> Result<(), BootloaderError> {
        self.send(BootCommand::Validate { image_type })
    }

    pub fn format_image(&mut self, params: FormatImageParams) -> Result<(), BootloaderError> {
        self.send(BootCommand::FormatImage(params))
    }

    pub fn format_region(&mut self, offset: u32, size: u32, checksum: u32) -> Result<(), BootloaderError> {
        self.send(BootCommand::FormatRegion {
            region: 0,
            offset,
            size,
            checksum,
        })
    }

    pub fn write_chunk(&mut self, address: u32, data: &[u8]) -> Result<(), BootloaderError> {
        self.send(BootCommand::Write { address, data })
    }

    // ------------------------------------------------------------------
    // Memory
    // ------------------------------------------------------------------

    /// Read up to 514 bytes of device memory through the status report.
    ///
    /// The result holds at most `count` bytes and never more than the device
    /// reported.
    #[instrument(level = "debug", skip(self))]
    pub fn read_memory(&mut self, address: u32, count: usize) -> Result<Vec<u8>, BootloaderError> {
        if count > MAX_READ_PAYLOAD {
            return Err(BootloaderError::ParameterOutOfRange(format!(
                "read of {count} bytes exceeds {MAX_READ_PAYLOAD}"
            )));
        }
        self.send(BootCommand::ReadMemory {
            address,
            count: count as u16,
        })?;
        let status = self.checked_status()?;
        let mut data = status.data;
        data.truncate(count);
        Ok(data)
    }

    /// Write up to 520 bytes of device memory.
    #[instrument(level = "debug", skip(self, data), fields(len = data.len()))]
    pub fn write_memory(&mut self, address: u32, data: &[u8]) -> Result<(), BootloaderError> {
        if data.len() > MAX_WRITE_PAYLOAD {
            return Err(BootloaderError::ParameterOutOfRange(format!(
                "write of {} bytes exceeds {MAX_WRITE_PAYLOAD}",
                data.len()
            )));
        }
        self.send(BootCommand::WriteMemory { address, data })?;
        self.checked_status()?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Programming
    // ------------------------------------------------------------------

    /// Page write delay unit in milliseconds.
    fn page_write_ms(&self, status: &BootloaderStatus) -> u64 {
        match status.timing {
            Some(t) => u64::from(t.write_delay) * 10,
            None => self.config.timing.legacy_page_write_ms,
        }
    }

    fn chunk_delay_ms(&self, status: &BootloaderStatus, len: usize) -> u64 {
        let product = self.page_write_ms(status) * len as u64;
        if product > 1000 { product / 1000 } else { 1 }
    }

    fn format_region_ms(&self, status: &BootloaderStatus, len: usize) -> u64 {
        let per_kb = match status.timing {
            Some(t) => u64::from(t.format_delay),
            None => self.config.timing.legacy_format_region_ms,
        };
        per_kb * (len as u64 / 1024 + 1)
    }

    /// Issue format-image for `image` and wait for the device to erase.
    fn send_format_image(&mut self, image: &FirmwareImage, status: &BootloaderStatus) -> Result<(), BootloaderError> {
        let params = FormatImageParams::for_version(
            status.version,
            image.entry_point(),
            self.config.legacy_descriptor_address,
            self.config.legacy_bus_address,
        );
        debug!(
            entry = %format!("0x{:08X}", params.entry_point),
            descriptor = %format!("0x{:04X}", params.descriptor_address),
            "Format image"
        );
        self.format_image(params)?;
        let delay = self.page_write_ms(status);
        self.wait(delay);
        Ok(())
    }

    fn write_image(&mut self, image: &FirmwareImage, status: &BootloaderStatus) -> Result<(), BootloaderError> {
        let total = image.len() as u64;
        let max_payload = self.config.max_payload.clamp(1, MAX_WRITE_PAYLOAD);
        for chunk in image.chunks(max_payload) {
            debug!(
                chunk = chunk.index,
                address = %format!("0x{:08X}", chunk.address),
                len = chunk.data.len(),
                "Write chunk"
            );
            self.write_chunk(chunk.address, chunk.data)?;
            let delay = self.chunk_delay_ms(status, chunk.data.len());
            self.wait(delay);
            self.checked_status()?;
            self.observer.on_event(&BootEvent::Progress {
                current: (chunk.offset + chunk.data.len()) as u64,
                total,
            });
        }
        Ok(())
    }

    /// Every stage up to and including validation.
    fn run_pipeline(&mut self, image: &FirmwareImage, steps: &mut Vec<Step>) -> Result<usize, Failure> {
        let timing = self.config.timing;

        self.enter(Stage::StatusCheck);
        steps.push(Step::StatusCheck);
        let mut status = self.get_status().map_err(Failure::at(Stage::StatusCheck))?;

        if let Some(e) = status.error() {
            warn!(error = %e, "Device reports error, resetting");
            self.enter(Stage::Reset);
            steps.push(Step::Reset);
            self.reset().map_err(Failure::at(Stage::Reset))?;
            self.wait(timing.reset_ms);
            status = self.checked_status().map_err(Failure::at(Stage::Reset))?;
        }

        self.enter(Stage::ModeCheck);
        if status.mode != Mode::Bootloader {
            self.enter(Stage::InvokeBootloader);
            steps.push(Step::InvokeBootloader);
            self.invoke_bootloader().map_err(Failure::at(Stage::InvokeBootloader))?;
            self.wait(timing.invoke_ms);
            status = self.get_status().map_err(Failure::at(Stage::InvokeBootloader))?;
            if status.mode != Mode::Bootloader {
                return Err(Failure::at(Stage::ModeCheck)(BootloaderError::NotInBootloader));
            }
        }
        info!(version = status.version, "Device in bootloader mode");

        self.enter(Stage::FormatImage);
        steps.push(Step::FormatImage);
        self.send_format_image(image, &status)
            .map_err(Failure::at(Stage::FormatImage))?;
        status = self.checked_status().map_err(Failure::at(Stage::FormatImage))?;

        self.enter(Stage::FormatRegion);
        steps.push(Step::FormatRegion);
        self.format_region(image.address(), image.len() as u32, image.checksum())
            .map_err(Failure::at(Stage::FormatRegion))?;
        let delay = self.format_region_ms(&status, image.len());
        self.wait(delay);
        status = self.checked_status().map_err(Failure::at(Stage::FormatRegion))?;

        self.enter(Stage::WriteImage);
        let max_payload = self.config.max_payload.clamp(1, MAX_WRITE_PAYLOAD);
        let chunks = image.chunks(max_payload).total();
        steps.push(Step::WriteChunks(chunks));
        self.write_image(image, &status)
            .map_err(Failure::reformat_at(Stage::WriteImage))?;

        self.enter(Stage::Flush);
        steps.push(Step::Flush);
        self.flush().map_err(Failure::reformat_at(Stage::Flush))?;
        self.wait(timing.flush_ms);
        self.checked_status().map_err(Failure::reformat_at(Stage::Flush))?;

        self.enter(Stage::Validate);
        steps.push(Step::Validate);
        self.validate(VALIDATE_TYPE_IMAGE)
            .map_err(Failure::reformat_at(Stage::Validate))?;
        self.wait(timing.validate_ms);
        let status = self.checked_status().map_err(Failure::reformat_at(Stage::Validate))?;
        if !status.is_image_valid() {
            return Err(Failure::reformat_at(Stage::Validate)(BootloaderError::ImageNotValid));
        }

        Ok(chunks)
    }

    fn final_reset(&mut self) -> Result<BootloaderStatus, BootloaderError> {
        self.reset()?;
        self.wait(self.config.timing.final_reset_ms);
        self.checked_status()
    }

    /// Program `image` at its target address.
    ///
    /// The device is always reset at the end, even after a failure. A
    /// failure while writing, flushing or validating is followed by one
    /// recovery format-image, reported through `ProgramError::reformatted`.
    #[instrument(skip(self, image), fields(len = image.len(), address = %format!("0x{:08X}", image.address())))]
    pub fn program(&mut self, image: &FirmwareImage) -> Result<ProgramReport, ProgramError> {
        info!("Programming image");
        let mut steps = Vec::new();
        let failure = match self.run_pipeline(image, &mut steps) {
            Ok(chunks) => return self.finish(image, chunks, steps),
            Err(failure) => failure,
        };

        self.observer.on_event(&BootEvent::StageFailed {
            stage: failure.stage,
            message: failure.cause.to_string(),
        });
        if failure.reformat {
            self.observer.on_event(&BootEvent::Recovery { after: failure.stage });
            steps.push(Step::FormatImage);
            match self.last_status.clone() {
                Some(status) => {
                    if let Err(e) = self.send_format_image(image, &status) {
                        warn!(error = %e, "Recovery format failed");
                    }
                }
                None => warn!("No status read yet, skipping recovery format"),
            }
        }

        self.enter(Stage::FinalReset);
        steps.push(Step::FinalReset);
        if let Err(e) = self.final_reset() {
            warn!(error = %e, "Final reset failed");
        }

        Err(ProgramError {
            stage: failure.stage,
            cause: failure.cause,
            reformatted: failure.reformat,
            steps,
        })
    }

    fn finish(
        &mut self,
        image: &FirmwareImage,
        chunks: usize,
        mut steps: Vec<Step>,
    ) -> Result<ProgramReport, ProgramError> {
        self.enter(Stage::FinalReset);
        steps.push(Step::FinalReset);
        match self.final_reset() {
            Ok(final_status) => {
                self.observer.on_event(&BootEvent::Complete);
                info!(chunks, bytes = image.len(), "Programming complete");
                Ok(ProgramReport {
                    steps,
                    chunks,
                    bytes: image.len(),
                    final_status,
                })
            }
            Err(cause) => {
                self.observer.on_event(&BootEvent::StageFailed {
                    stage: Stage::FinalReset,
                    message: cause.to_string(),
                });
                Err(ProgramError {
                    stage: Stage::FinalReset,
                    cause,
                    reformatted: false,
                    steps,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::checksum::fletcher16;
    use crate::events::NullObserver;
    use crate::retry::FakeClock;
    use crate::transport::{CommandFault, MockBus, SimConfig, SimMode, SimulatedDevice};

    const TARGET: u32 = 0x0002_D420;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<BootEvent>>);

    impl BootObserver for Recorder {
        fn on_event(&self, event: &BootEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    fn session_with<O: BootObserver>(
        sim: &SimulatedDevice,
        observer: Arc<O>,
    ) -> BootloaderSession<SimulatedDevice, O, FakeClock> {
        let framer = TransportFramer::new(sim.clone(), sim.address());
        BootloaderSession::with_observer(framer, BootloaderConfig::default(), observer)
            .with_clock(FakeClock::new())
    }

    fn session(sim: &SimulatedDevice) -> BootloaderSession<SimulatedDevice, NullObserver, FakeClock> {
        session_with(sim, Arc::new(NullObserver))
    }

    fn image(len: usize) -> FirmwareImage {
        let mut data: Vec<u8> = (0..len).map(|i| (i * 7 + 3) as u8).collect();
        data[0..4].copy_from_slice(&0x0000_2000u32.to_le_bytes());
        FirmwareImage::new(data, TARGET).unwrap()
    }

    fn sim(version: u8) -> SimulatedDevice {
        SimulatedDevice::new(SimConfig {
            protocol_version: version,
            ..SimConfig::default()
        })
    }

    fn ms(values: &[u64]) -> Vec<Duration> {
        values.iter().map(|&v| Duration::from_millis(v)).collect()
    }

    #[test]
    fn test_program_version_9_end_to_end() {
        let sim = sim(9);
        let mut session = session(&sim);
        let image = image(1040);

        let report = session.program(&image).unwrap();
        assert_eq!(
            report.steps,
            vec![
                Step::StatusCheck,
                Step::InvokeBootloader,
                Step::FormatImage,
                Step::FormatRegion,
                Step::WriteChunks(2),
                Step::Flush,
                Step::Validate,
                Step::FinalReset,
            ]
        );
        assert_eq!(report.chunks, 2);
        assert_eq!(report.bytes, 1040);
        assert_eq!(report.final_status.mode, Mode::Image);

        assert_eq!(sim.flash(TARGET, 1040), image.data());
        assert!(sim.is_image_valid());
        assert_eq!(sim.mode(), SimMode::Image);

        let requests = sim.format_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].entry_point, 0x0000_2000);
        assert_eq!(requests[0].descriptor_address, SELF_DESCRIBING_DESCRIPTOR);
        assert_eq!(requests[0].bus_address, SELF_DESCRIBING_ADDRESS);
        assert_eq!(requests[0].report_id, REPORT_ID_BOOTLOADER);

        // write_delay 1 -> 10 ms page unit; format_delay 1 per started KiB
        assert_eq!(session.clock().sleeps(), &ms(&[100, 10, 2, 5, 5, 10, 100, 10])[..]);
    }

    #[test]
    fn test_program_writes_two_chunks_for_1040_bytes() {
        let sim = sim(9);
        let mut session = session(&sim);
        session.program(&image(1040)).unwrap();

        let writes = sim
            .commands()
            .iter()
            .filter(|&&c| c == BL_CMD_WRITE)
            .count();
        assert_eq!(writes, 2);
        assert_eq!(
            sim.commands(),
            vec![
                BL_CMD_INVOKE_BOOTLOADER,
                BL_CMD_FORMAT_IMAGE,
                BL_CMD_FORMAT_REGION,
                BL_CMD_WRITE,
                BL_CMD_WRITE,
                BL_CMD_FLUSH,
                BL_CMD_VALIDATE,
                BL_CMD_RESET,
            ]
        );
    }

    #[test]
    fn test_chunk_failure_reformats_once_then_resets() {
        let sim = sim(9);
        sim.fail_write_chunk(2, DeviceError::ChecksumMismatch);
        let mut session = session(&sim);

        let err = session.program(&image(1300)).unwrap_err();
        assert_eq!(err.stage, Stage::WriteImage);
        assert!(err.reformatted);
        assert!(matches!(
            err.cause,
            BootloaderError::Device(DeviceError::ChecksumMismatch)
        ));
        assert_eq!(
            err.steps,
            vec![
                Step::StatusCheck,
                Step::InvokeBootloader,
                Step::FormatImage,
                Step::FormatRegion,
                Step::WriteChunks(3),
                Step::FormatImage,
                Step::FinalReset,
            ]
        );

        let commands = sim.commands();
        assert_eq!(
            commands.iter().filter(|&&c| c == BL_CMD_FORMAT_IMAGE).count(),
            2
        );
        assert_eq!(
            commands,
            vec![
                BL_CMD_INVOKE_BOOTLOADER,
                BL_CMD_FORMAT_IMAGE,
                BL_CMD_FORMAT_REGION,
                BL_CMD_WRITE,
                BL_CMD_WRITE,
                BL_CMD_FORMAT_IMAGE,
                BL_CMD_RESET,
            ]
        );
        assert!(!sim.is_image_valid());
        assert_eq!(sim.mode(), SimMode::Bootloader);
    }

    #[test]
    fn test_failure_events_include_recovery() {
        let sim = sim(9);
        sim.fail_write_chunk(1, DeviceError::OffsetOutOfRange);
        let recorder = Arc::new(Recorder::default());
        let mut session = session_with(&sim, recorder.clone());

        session.program(&image(600)).unwrap_err();
        let events = recorder.0.lock().unwrap().clone();
        assert!(events.contains(&BootEvent::StageFailed {
            stage: Stage::WriteImage,
            message: "Device error: offset out of range".into(),
        }));
        assert!(events.contains(&BootEvent::Recovery {
            after: Stage::WriteImage
        }));
        assert!(!events.contains(&BootEvent::Complete));
    }

    #[test]
    fn test_success_events_report_progress() {
        let sim = sim(9);
        let recorder = Arc::new(Recorder::default());
        let mut session = session_with(&sim, recorder.clone());

        session.program(&image(1100)).unwrap();
        let events = recorder.0.lock().unwrap().clone();
        let progress: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                BootEvent::Progress { current, total } => Some((*current, *total)),
                _ => None,
            })
            .collect();
        assert_eq!(progress, vec![(520, 1100), (1040, 1100), (1100, 1100)]);
        assert_eq!(events.last(), Some(&BootEvent::Complete));
    }

    #[test]
    fn test_get_status_waits_out_busy() {
        let sim = sim(9);
        sim.set_busy_polls(3);
        let mut session = session(&sim);

        session.reset().unwrap();
        let status = session.get_status().unwrap();
        assert!(!status.is_busy());
        assert_eq!(session.clock().sleeps(), &ms(&[10, 10, 10])[..]);
        assert_eq!(session.last_status(), Some(&status));
    }

    #[test]
    fn test_get_status_times_out_when_stuck_busy() {
        let sim = sim(9);
        sim.set_stuck_busy(true);
        let mut session = session(&sim);

        let err = session.get_status().unwrap_err();
        assert!(matches!(err, BootloaderError::Timeout { attempts: 50 }));
        assert_eq!(session.clock().sleeps().len(), 49);
    }

    #[test]
    fn test_invalid_sentinel_still_resets() {
        let sim = sim(9);
        sim.set_sentinel(Some(0x1234));
        let recorder = Arc::new(Recorder::default());
        let mut session = session_with(&sim, recorder.clone());

        let err = session.program(&image(1040)).unwrap_err();
        assert_eq!(err.stage, Stage::StatusCheck);
        assert!(matches!(err.cause, BootloaderError::InvalidSentinel(0x1234)));
        assert!(!err.reformatted);
        assert_eq!(err.steps, vec![Step::StatusCheck, Step::FinalReset]);
        assert_eq!(sim.commands(), vec![BL_CMD_RESET]);

        let events = recorder.0.lock().unwrap().clone();
        assert!(!events.iter().any(|e| matches!(e, BootEvent::Recovery { .. })));
    }

    #[test]
    fn test_invalid_sentinel_mid_write_reformats_and_resets() {
        let sim = sim(9);
        sim.inject_command_fault(BL_CMD_WRITE, CommandFault::Sentinel(0xBEEF));
        let mut session = session(&sim);

        let err = session.program(&image(1040)).unwrap_err();
        assert_eq!(err.stage, Stage::WriteImage);
        assert!(matches!(err.cause, BootloaderError::InvalidSentinel(0xBEEF)));
        assert!(err.reformatted);
        assert_eq!(
            sim.commands(),
            vec![
                BL_CMD_INVOKE_BOOTLOADER,
                BL_CMD_FORMAT_IMAGE,
                BL_CMD_FORMAT_REGION,
                BL_CMD_WRITE,
                BL_CMD_FORMAT_IMAGE,
                BL_CMD_RESET,
            ]
        );
    }

    #[test]
    fn test_image_not_valid_after_validate() {
        let sim = sim(9);
        sim.inject_command_fault(BL_CMD_VALIDATE, CommandFault::ClearValidImage);
        let mut session = session(&sim);

        let err = session.program(&image(1040)).unwrap_err();
        assert_eq!(err.stage, Stage::Validate);
        assert!(matches!(err.cause, BootloaderError::ImageNotValid));
        assert!(err.reformatted);
        assert_eq!(
            err.steps,
            vec![
                Step::StatusCheck,
                Step::InvokeBootloader,
                Step::FormatImage,
                Step::FormatRegion,
                Step::WriteChunks(2),
                Step::Flush,
                Step::Validate,
                Step::FormatImage,
                Step::FinalReset,
            ]
        );
        assert_eq!(
            sim.commands(),
            vec![
                BL_CMD_INVOKE_BOOTLOADER,
                BL_CMD_FORMAT_IMAGE,
                BL_CMD_FORMAT_REGION,
                BL_CMD_WRITE,
                BL_CMD_WRITE,
                BL_CMD_FLUSH,
                BL_CMD_VALIDATE,
                BL_CMD_FORMAT_IMAGE,
                BL_CMD_RESET,
            ]
        );
        assert_eq!(sim.format_requests().len(), 2);
        assert_eq!(sim.mode(), SimMode::Bootloader);
    }

    #[test]
    fn test_flush_failure_reformats() {
        let sim = sim(9);
        sim.inject_command_fault(BL_CMD_FLUSH, CommandFault::Reject(DeviceError::AccessViolation));
        let mut session = session(&sim);

        let err = session.program(&image(600)).unwrap_err();
        assert_eq!(err.stage, Stage::Flush);
        assert!(matches!(
            err.cause,
            BootloaderError::Device(DeviceError::AccessViolation)
        ));
        assert!(err.reformatted);
        assert_eq!(
            sim.commands(),
            vec![
                BL_CMD_INVOKE_BOOTLOADER,
                BL_CMD_FORMAT_IMAGE,
                BL_CMD_FORMAT_REGION,
                BL_CMD_WRITE,
                BL_CMD_WRITE,
                BL_CMD_FLUSH,
                BL_CMD_FORMAT_IMAGE,
                BL_CMD_RESET,
            ]
        );
    }

    #[test]
    fn test_busy_timeout_after_flush() {
        let sim = sim(9);
        sim.inject_command_fault(BL_CMD_FLUSH, CommandFault::StickBusy);
        let mut session = session(&sim);

        let err = session.program(&image(1040)).unwrap_err();
        assert_eq!(err.stage, Stage::Flush);
        assert!(matches!(err.cause, BootloaderError::Timeout { attempts: 50 }));
        assert!(err.reformatted);
        assert_eq!(
            &err.steps[err.steps.len() - 3..],
            &[Step::Flush, Step::FormatImage, Step::FinalReset]
        );
        let commands = sim.commands();
        assert_eq!(
            &commands[commands.len() - 3..],
            &[BL_CMD_FLUSH, BL_CMD_FORMAT_IMAGE, BL_CMD_RESET]
        );
    }

    #[test]
    fn test_device_refusing_bootloader_fails_mode_check() {
        let sim = sim(9);
        sim.inject_command_fault(
            BL_CMD_INVOKE_BOOTLOADER,
            CommandFault::Reject(DeviceError::ProtectionViolation),
        );
        let mut session = session(&sim);

        let err = session.program(&image(64)).unwrap_err();
        assert_eq!(err.stage, Stage::ModeCheck);
        assert!(matches!(err.cause, BootloaderError::NotInBootloader));
        assert!(!err.reformatted);
        assert_eq!(
            err.steps,
            vec![Step::StatusCheck, Step::InvokeBootloader, Step::FinalReset]
        );
        assert_eq!(
            sim.commands(),
            vec![BL_CMD_INVOKE_BOOTLOADER, BL_CMD_RESET]
        );
        assert!(sim.format_requests().is_empty());
    }

    #[test]
    fn test_error_persisting_after_initial_reset() {
        let sim = sim(9);
        sim.set_last_error(DeviceError::Timeout);
        sim.inject_command_fault(BL_CMD_RESET, CommandFault::Reject(DeviceError::Timeout));
        let mut session = session(&sim);

        let err = session.program(&image(64)).unwrap_err();
        assert_eq!(err.stage, Stage::Reset);
        assert!(matches!(err.cause, BootloaderError::Device(DeviceError::Timeout)));
        assert!(!err.reformatted);
        assert_eq!(
            err.steps,
            vec![Step::StatusCheck, Step::Reset, Step::FinalReset]
        );
        assert_eq!(sim.commands(), vec![BL_CMD_RESET, BL_CMD_RESET]);
    }

    #[test]
    fn test_final_reset_failure_fails_run() {
        let sim = sim(9);
        sim.inject_command_fault(BL_CMD_RESET, CommandFault::Reject(DeviceError::UnknownError));
        let recorder = Arc::new(Recorder::default());
        let mut session = session_with(&sim, recorder.clone());

        let err = session.program(&image(1040)).unwrap_err();
        assert_eq!(err.stage, Stage::FinalReset);
        assert!(matches!(
            err.cause,
            BootloaderError::Device(DeviceError::UnknownError)
        ));
        assert!(!err.reformatted);
        assert_eq!(err.steps.last(), Some(&Step::FinalReset));
        assert_eq!(err.steps.len(), 8);
        // The image itself was written and validated.
        assert!(sim.is_image_valid());

        let events = recorder.0.lock().unwrap().clone();
        assert!(events.contains(&BootEvent::StageFailed {
            stage: Stage::FinalReset,
            message: "Device error: unknown error".into(),
        }));
        assert!(!events.contains(&BootEvent::Complete));
    }

    #[test]
    fn test_truncated_bus_write_fails_command() {
        let mock = MockBus::new();
        mock.set_write_limit(Some(64));
        let framer = TransportFramer::new(mock.clone(), DEFAULT_I2C_ADDRESS);
        let mut session = BootloaderSession::new(framer, BootloaderConfig::default());

        let err = session.reset().unwrap_err();
        assert!(matches!(
            err,
            BootloaderError::Transport(TransportError::LengthMismatch {
                expected: 539,
                actual: 64
            })
        ));
    }

    #[test]
    fn test_initial_error_triggers_reset() {
        let sim = sim(9);
        sim.set_last_error(DeviceError::Timeout);
        let mut session = session(&sim);

        let report = session.program(&image(64)).unwrap();
        assert_eq!(
            &report.steps[..3],
            &[Step::StatusCheck, Step::Reset, Step::InvokeBootloader]
        );
        assert_eq!(sim.commands()[0], BL_CMD_RESET);
    }

    #[test]
    fn test_already_in_bootloader_skips_invoke() {
        let sim = SimulatedDevice::new(SimConfig {
            mode: SimMode::Bootloader,
            ..SimConfig::default()
        });
        let mut session = session(&sim);

        let report = session.program(&image(64)).unwrap();
        assert_eq!(report.steps[1], Step::FormatImage);
        assert!(!sim.commands().contains(&BL_CMD_INVOKE_BOOTLOADER));
    }

    #[test]
    fn test_legacy_version_addressing_and_delays() {
        let sim = sim(7);
        let mut session = session(&sim);

        session.program(&image(1040)).unwrap();
        let requests = sim.format_requests();
        assert_eq!(requests[0].descriptor_address, HID_DESCRIPTOR_REGISTER);
        assert_eq!(requests[0].bus_address, DEFAULT_I2C_ADDRESS);

        // 100 ms page unit, 50 ms per started KiB, 52 ms per 520-byte chunk
        assert_eq!(
            session.clock().sleeps(),
            &ms(&[100, 100, 100, 52, 52, 10, 100, 10])[..]
        );
    }

    #[test]
    fn test_read_memory_both_layouts() {
        let data: Vec<u8> = (1..=16).collect();
        for version in [9, 7] {
            let sim = sim(version);
            sim.load_memory(0x2000_0100, &data);
            let mut session = session(&sim);

            assert_eq!(session.read_memory(0x2000_0100, 16).unwrap(), data);
            assert_eq!(session.read_memory(0x2000_0100, 4).unwrap(), &data[..4]);
            let status = session.last_status().unwrap();
            assert_eq!(status.mem_address, 0x2000_0100);
            assert_eq!(status.checksum, fletcher16(&data[..4]));
        }
    }

    #[test]
    fn test_read_memory_rejects_oversized_request() {
        let sim = sim(9);
        let mut session = session(&sim);
        assert!(matches!(
            session.read_memory(0, MAX_READ_PAYLOAD + 1),
            Err(BootloaderError::ParameterOutOfRange(_))
        ));
        assert!(sim.commands().is_empty());
    }

    #[test]
    fn test_write_memory() {
        let sim = sim(9);
        let mut session = session(&sim);
        session.write_memory(0x2000_0200, &[9, 8, 7]).unwrap();
        assert_eq!(sim.memory(0x2000_0200, 3), vec![9, 8, 7]);
    }

    #[test]
    fn test_reset_frame_layout() {
        let mock = MockBus::new();
        let framer = TransportFramer::new(mock.clone(), DEFAULT_I2C_ADDRESS);
        let mut session = BootloaderSession::new(framer, BootloaderConfig::default());

        session.reset().unwrap();
        let writes = mock.get_writes();
        assert_eq!(writes.len(), 1);
        let frame = &writes[0];
        assert_eq!(frame.len(), 4 + 2 + BOOTLOADER_REPORT_LEN);
        assert_eq!(
            &frame[..10],
            &[0x05, 0x00, 0x37, 0x03, 0x06, 0x00, 0x15, 0x02, 0x07, BL_CMD_RESET]
        );
        assert!(frame[10..].iter().all(|&b| b == BOOTLOADER_PAD));
    }
}
