//! Behavioral device model behind the `HostBus` trait.
//!
//! `SimulatedDevice` answers extended-memory frames, HID commands, input
//! report reads and the bootloader feature-report protocol. It is used by the
//! test suites and by the CLI `simulate` command.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use byteorder::{ByteOrder, LittleEndian};

use super::traits::{BusError, HostBus};
use crate::bootloader::DeviceError;
use crate::checksum::{byte_sum8, fletcher16, fletcher16_continue, fletcher32};
use crate::protocol::constants::*;
use crate::protocol::header::HidDescriptor;
use crate::protocol::regs;

/// Mode the simulated firmware is running in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimMode {
    Image,
    Bootloader,
}

/// Corruption applied to the next extended-memory read reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyFault {
    /// Flip the checksum byte.
    BadChecksum,
    /// Report one byte fewer in the length field.
    WrongLength,
    /// Drop the last byte of the transfer.
    ShortTransfer,
}

/// Misbehavior triggered by the next bootloader command with a given code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandFault {
    /// Reject the command with this error.
    Reject(DeviceError),
    /// Run the command, then report busy on every status read.
    StickBusy,
    /// Run the command, then answer status reads with this sentinel.
    Sentinel(u16),
    /// Run the command without error but leave the image marked invalid.
    ClearValidImage,
}

/// Parameters of a received format-image command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatImageRequest {
    pub image_type: u8,
    pub region_count: u8,
    pub entry_point: u32,
    pub descriptor_address: u16,
    pub bus_address: u8,
    pub report_id: u8,
}

/// Static characteristics of the simulated part.
#[derive(Debug, Clone)]
pub struct SimConfig {
    pub address: u8,
    pub protocol_version: u8,
    pub atomic_write_size: u8,
    pub write_delay: u8,
    pub format_delay: u8,
    /// Status reads that report busy after each bootloader command.
    pub busy_polls: u32,
    pub big_endian: bool,
    pub mode: SimMode,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_I2C_ADDRESS,
            protocol_version: VERSION_SELF_DESCRIBING,
            atomic_write_size: 4,
            write_delay: 1,
            format_delay: 1,
            busy_polls: 0,
            big_endian: false,
            mode: SimMode::Image,
        }
    }
}

#[derive(Debug)]
struct BootState {
    mode: SimMode,
    last_error: u8,
    valid_image: bool,
    busy_remaining: u32,
    stuck_busy: bool,
    sentinel_override: Option<u16>,
    format: Option<FormatImageRequest>,
    /// (offset, size, fletcher32)
    region: Option<(u32, u32, u32)>,
    flash: BTreeMap<u32, u8>,
    chunks_received: usize,
    fail_on_chunk: Option<(usize, u8)>,
    command_faults: Vec<(u8, CommandFault)>,
    read_window: Option<(u32, Vec<u8>)>,
    commands: Vec<u8>,
    format_requests: Vec<FormatImageRequest>,
}

#[derive(Debug)]
struct SimState {
    config: SimConfig,
    boot: BootState,
    memory: BTreeMap<u32, u8>,
    descriptor: HidDescriptor,
    feature_reports: HashMap<u8, Vec<u8>>,
    input_reports: VecDeque<Vec<u8>>,
    open: Option<(u8, Vec<u8>)>,
    pending_reply: Option<Vec<u8>>,
    rx: VecDeque<u8>,
    reply_fault: Option<ReplyFault>,
    reset_pending: bool,
    powered: bool,
    rejected_writes: usize,
}

/// Simulated touch controller. Clones share the same device.
#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    state: Arc<Mutex<SimState>>,
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::new(SimConfig::default())
    }
}

impl SimulatedDevice {
    pub fn new(config: SimConfig) -> Self {
        let descriptor = HidDescriptor {
            max_input_length: MAX_REPORT_LEN as u16,
            vendor_id: 0x0488,
            product_id: 0x1234,
            version_id: 0x0001,
            ..HidDescriptor::default()
        };
        let mut state = SimState {
            boot: BootState {
                mode: config.mode,
                last_error: 0,
                valid_image: config.mode == SimMode::Image,
                busy_remaining: 0,
                stuck_busy: false,
                sentinel_override: None,
                format: None,
                region: None,
                flash: BTreeMap::new(),
                chunks_received: 0,
                fail_on_chunk: None,
                command_faults: Vec::new(),
                read_window: None,
                commands: Vec::new(),
                format_requests: Vec::new(),
            },
            config,
            memory: BTreeMap::new(),
            descriptor,
            feature_reports: HashMap::new(),
            input_reports: VecDeque::new(),
            open: None,
            pending_reply: None,
            rx: VecDeque::new(),
            reply_fault: None,
            reset_pending: false,
            powered: true,
            rejected_writes: 0,
        };
        state.seed_system_info();
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn address(&self) -> u8 {
        self.lock().config.address
    }

    /// Preload extended memory.
    pub fn load_memory(&self, address: u32, bytes: &[u8]) {
        self.lock().store(address, bytes);
    }

    /// Inspect extended memory. Unwritten bytes read as zero.
    pub fn memory(&self, address: u32, len: usize) -> Vec<u8> {
        self.lock().load(address, len)
    }

    /// Inspect programmed flash. Erased bytes read as 0xFF.
    pub fn flash(&self, address: u32, len: usize) -> Vec<u8> {
        let state = self.lock();
        (0..len as u32)
            .map(|i| *state.boot.flash.get(&(address + i)).unwrap_or(&0xFF))
            .collect()
    }

    /// Queue an input report; data-ready asserts while any are queued.
    pub fn push_input_report(&self, report: &[u8]) {
        self.lock().input_reports.push_back(report.to_vec());
    }

    pub fn set_feature_report(&self, report_id: u8, body: &[u8]) {
        self.lock().feature_reports.insert(report_id, body.to_vec());
    }

    pub fn feature_report(&self, report_id: u8) -> Option<Vec<u8>> {
        self.lock().feature_reports.get(&report_id).cloned()
    }

    pub fn inject_reply_fault(&self, fault: ReplyFault) {
        self.lock().reply_fault = Some(fault);
    }

    pub fn set_last_error(&self, error: DeviceError) {
        self.lock().boot.last_error = error as u8;
    }

    pub fn set_sentinel(&self, sentinel: Option<u16>) {
        self.lock().boot.sentinel_override = sentinel;
    }

    /// Report `error` for the `n`th write chunk (1-based).
    pub fn fail_write_chunk(&self, n: usize, error: DeviceError) {
        self.lock().boot.fail_on_chunk = Some((n, error as u8));
    }

    /// Arm `fault` for the next bootloader command with code `command`.
    /// Faults fire once, in the order they were armed.
    pub fn inject_command_fault(&self, command: u8, fault: CommandFault) {
        self.lock().boot.command_faults.push((command, fault));
    }

    pub fn set_busy_polls(&self, polls: u32) {
        self.lock().config.busy_polls = polls;
    }

    /// Keep the busy flag set indefinitely.
    pub fn set_stuck_busy(&self, stuck: bool) {
        self.lock().boot.stuck_busy = stuck;
    }

    /// Bootloader command codes in the order received.
    pub fn commands(&self) -> Vec<u8> {
        self.lock().boot.commands.clone()
    }

    pub fn format_requests(&self) -> Vec<FormatImageRequest> {
        self.lock().boot.format_requests.clone()
    }

    pub fn mode(&self) -> SimMode {
        self.lock().boot.mode
    }

    pub fn is_image_valid(&self) -> bool {
        self.lock().boot.valid_image
    }

    pub fn is_powered(&self) -> bool {
        self.lock().powered
    }

    /// Extended-memory writes dropped for a bad checksum.
    pub fn rejected_writes(&self) -> usize {
        self.lock().rejected_writes
    }
}

impl SimState {
    fn seed_system_info(&mut self) {
        let mut info = [0u8; 29];
        info[0] = 0x50;
        info[1] = 0x0C;
        LittleEndian::write_u16(&mut info[2..4], self.descriptor.vendor_id);
        LittleEndian::write_u16(&mut info[4..6], self.descriptor.product_id);
        LittleEndian::write_u16(&mut info[6..8], self.descriptor.version_id);
        LittleEndian::write_u32(&mut info[8..12], 0x0000_1A2B);
        LittleEndian::write_u32(&mut info[16..20], 0x2000_1000);
        LittleEndian::write_u32(&mut info[20..24], 0x2000_2000);
        LittleEndian::write_u32(&mut info[24..28], 0x2000_3000);
        info[28] = u8::from(self.config.big_endian);
        self.store(regs::SYSTEM_INFO.address, &info);
    }

    fn store(&mut self, address: u32, bytes: &[u8]) {
        for (i, &b) in bytes.iter().enumerate() {
            self.memory.insert(address.wrapping_add(i as u32), b);
        }
    }

    fn load(&self, address: u32, len: usize) -> Vec<u8> {
        (0..len as u32)
            .map(|i| *self.memory.get(&address.wrapping_add(i)).unwrap_or(&0))
            .collect()
    }

    fn handle_transaction(&mut self, frame: &[u8]) {
        if frame.len() < 2 {
            return;
        }
        let register = LittleEndian::read_u16(&frame[0..2]);
        match register {
            EXT_MEM_WRITE_MAPPED | EXT_MEM_WRITE_RAW => self.ext_mem_write(frame),
            EXT_MEM_READ_MAPPED | EXT_MEM_READ_RAW => self.ext_mem_read(frame),
            HID_DESCRIPTOR_REGISTER => {
                self.pending_reply = Some(descriptor_bytes(&self.descriptor));
            }
            r if r == self.descriptor.command_register => self.hid_command(&frame[2..]),
            _ => {}
        }
    }

    fn ext_mem_write(&mut self, frame: &[u8]) {
        if frame.len() < EXT_MEM_HEADER_LEN + 1 {
            self.rejected_writes += 1;
            return;
        }
        let address = LittleEndian::read_u32(&frame[2..6]);
        let count = LittleEndian::read_u16(&frame[6..8]) as usize;
        let end = EXT_MEM_HEADER_LEN + count;
        if frame.len() != end + 1 || byte_sum8(&frame[..end]) != frame[end] {
            self.rejected_writes += 1;
            return;
        }
        let data = frame[EXT_MEM_HEADER_LEN..end].to_vec();
        self.store(address, &data);
    }

    fn ext_mem_read(&mut self, frame: &[u8]) {
        if frame.len() < EXT_MEM_HEADER_LEN {
            return;
        }
        let address = LittleEndian::read_u32(&frame[2..6]);
        let count = LittleEndian::read_u16(&frame[6..8]) as usize;
        let payload = self.load(address, count);

        let mut length = (count + EXT_MEM_REPLY_OVERHEAD) as u16;
        if self.reply_fault == Some(ReplyFault::WrongLength) {
            length -= 1;
        }
        let mut reply = Vec::with_capacity(count + EXT_MEM_REPLY_OVERHEAD);
        reply.extend_from_slice(&length.to_le_bytes());
        reply.extend_from_slice(&payload);
        let mut checksum = byte_sum8(&reply);
        if self.reply_fault == Some(ReplyFault::BadChecksum) {
            checksum = !checksum;
        }
        reply.push(checksum);
        if self.reply_fault == Some(ReplyFault::ShortTransfer) {
            reply.pop();
        }
        self.reply_fault = None;
        self.pending_reply = Some(reply);
    }

    fn hid_command(&mut self, cmd: &[u8]) {
        if cmd.len() < 2 {
            return;
        }
        let opcode = cmd[1] & 0x0F;
        let report_type = (cmd[0] >> 4) & 0x03;
        let (report_id, rest) = if cmd[0] & 0x0F == REPORT_ID_ESCAPE {
            match cmd.get(2) {
                Some(&id) => (id, &cmd[3..]),
                None => return,
            }
        } else {
            (cmd[0] & 0x0F, &cmd[2..])
        };

        match opcode {
            OPCODE_RESET => {
                self.input_reports.clear();
                self.reset_pending = true;
            }
            OPCODE_SET_POWER => {
                self.powered = cmd[0] & 0x03 == 0;
            }
            OPCODE_GET_REPORT if report_type == REPORT_TYPE_FEATURE => {
                self.pending_reply = Some(if report_id == REPORT_ID_BOOTLOADER {
                    self.bootloader_status()
                } else {
                    let body = self
                        .feature_reports
                        .get(&report_id)
                        .cloned()
                        .unwrap_or_default();
                    let mut reply = ((body.len() + 3) as u16).to_le_bytes().to_vec();
                    reply.push(report_id);
                    reply.extend_from_slice(&body);
                    reply
                });
            }
            OPCODE_SET_REPORT if report_type == REPORT_TYPE_FEATURE => {
                // data register (2) + length (2) + body
                if rest.len() < 5 {
                    return;
                }
                let length = LittleEndian::read_u16(&rest[2..4]) as usize;
                let end = (2 + length).min(rest.len());
                let body = &rest[4..end];
                if body.first() != Some(&report_id) {
                    return;
                }
                if report_id == REPORT_ID_BOOTLOADER {
                    if let Some((&command, params)) = body[1..].split_first() {
                        self.bootloader_command(command, params);
                    }
                } else {
                    self.feature_reports.insert(report_id, body[1..].to_vec());
                }
            }
            _ => {}
        }
    }

    fn bootloader_command(&mut self, command: u8, params: &[u8]) {
        self.boot.commands.push(command);
        self.boot.busy_remaining = self.config.busy_polls;
        let fault = self
            .boot
            .command_faults
            .iter()
            .position(|(c, _)| *c == command)
            .map(|i| self.boot.command_faults.remove(i).1);
        if let Some(CommandFault::Reject(error)) = fault {
            self.boot.last_error = error as u8;
            return;
        }
        let result = match command {
            BL_CMD_WRITE => self.bl_write(params),
            BL_CMD_FLUSH => self.require_bootloader(),
            BL_CMD_VALIDATE => self.bl_validate(),
            BL_CMD_RESET => {
                self.boot.mode = if self.boot.valid_image {
                    SimMode::Image
                } else {
                    SimMode::Bootloader
                };
                Ok(())
            }
            BL_CMD_FORMAT_IMAGE => self.bl_format_image(params),
            BL_CMD_FORMAT_REGION => self.bl_format_region(params),
            BL_CMD_INVOKE_BOOTLOADER => {
                self.boot.mode = SimMode::Bootloader;
                Ok(())
            }
            BL_CMD_WRITE_MEMORY => self.bl_write_memory(params),
            BL_CMD_READ_MEMORY => self.bl_read_memory(params),
            _ => Err(DeviceError::CommandUnknown),
        };
        self.boot.last_error = match result {
            Ok(()) => DeviceError::NoError as u8,
            Err(e) => e as u8,
        };
        match fault {
            Some(CommandFault::StickBusy) => self.boot.stuck_busy = true,
            Some(CommandFault::Sentinel(sentinel)) => self.boot.sentinel_override = Some(sentinel),
            Some(CommandFault::ClearValidImage) => self.boot.valid_image = false,
            Some(CommandFault::Reject(_)) | None => {}
        }
    }

    fn require_bootloader(&self) -> Result<(), DeviceError> {
        match self.boot.mode {
            SimMode::Bootloader => Ok(()),
            SimMode::Image => Err(DeviceError::AccessViolation),
        }
    }

    fn bl_format_image(&mut self, p: &[u8]) -> Result<(), DeviceError> {
        self.require_bootloader()?;
        if p.len() < 10 {
            return Err(DeviceError::OffsetOutOfRange);
        }
        let request = FormatImageRequest {
            image_type: p[0],
            region_count: p[1],
            entry_point: LittleEndian::read_u32(&p[2..6]),
            descriptor_address: LittleEndian::read_u16(&p[6..8]),
            bus_address: p[8],
            report_id: p[9],
        };
        self.boot.format_requests.push(request);
        self.boot.format = Some(request);
        self.boot.region = None;
        self.boot.valid_image = false;
        self.boot.flash.clear();
        self.boot.chunks_received = 0;
        Ok(())
    }

    fn bl_format_region(&mut self, p: &[u8]) -> Result<(), DeviceError> {
        self.require_bootloader()?;
        if self.boot.format.is_none() {
            return Err(DeviceError::NotInitialized);
        }
        if p.len() < 13 {
            return Err(DeviceError::OffsetOutOfRange);
        }
        let offset = LittleEndian::read_u32(&p[1..5]);
        let size = LittleEndian::read_u32(&p[5..9]);
        let checksum = LittleEndian::read_u32(&p[9..13]);
        self.boot.region = Some((offset, size, checksum));
        Ok(())
    }

    fn bl_write(&mut self, p: &[u8]) -> Result<(), DeviceError> {
        self.require_bootloader()?;
        let (offset, size, _) = self.boot.region.ok_or(DeviceError::NotInitialized)?;
        let (address, data) = checked_payload(BL_CMD_WRITE, p)?;

        self.boot.chunks_received += 1;
        match self.boot.fail_on_chunk {
            Some((n, code)) if n == self.boot.chunks_received => {
                return Err(DeviceError::from_code(code).unwrap_or(DeviceError::UnknownError));
            }
            _ => {}
        }
        let end = address as u64 + data.len() as u64;
        if address < offset || end > offset as u64 + size as u64 {
            return Err(DeviceError::OffsetOutOfRange);
        }
        for (i, &b) in data.iter().enumerate() {
            self.boot.flash.insert(address + i as u32, b);
        }
        Ok(())
    }

    fn bl_validate(&mut self) -> Result<(), DeviceError> {
        self.require_bootloader()?;
        let (offset, size, expected) = self.boot.region.ok_or(DeviceError::NoRecentImage)?;
        let image: Vec<u8> = (0..size)
            .map(|i| *self.boot.flash.get(&(offset + i)).unwrap_or(&0xFF))
            .collect();
        self.boot.valid_image = fletcher32(&image) == expected;
        if self.boot.valid_image {
            Ok(())
        } else {
            Err(DeviceError::ChecksumMismatch)
        }
    }

    fn bl_write_memory(&mut self, p: &[u8]) -> Result<(), DeviceError> {
        let (address, data) = checked_payload(BL_CMD_WRITE_MEMORY, p)?;
        self.store(address, data);
        Ok(())
    }

    fn bl_read_memory(&mut self, p: &[u8]) -> Result<(), DeviceError> {
        if p.len() < 6 {
            return Err(DeviceError::OffsetOutOfRange);
        }
        let address = LittleEndian::read_u32(&p[0..4]);
        let count = LittleEndian::read_u16(&p[4..6]) as usize;
        if count > MAX_READ_PAYLOAD {
            return Err(DeviceError::OffsetOutOfRange);
        }
        self.boot.read_window = Some((address, self.load(address, count)));
        Ok(())
    }

    fn bootloader_status(&mut self) -> Vec<u8> {
        let boot = &mut self.boot;
        let mut flags = 0;
        if boot.stuck_busy || boot.busy_remaining > 0 {
            flags |= STATUS_FLAG_BUSY;
            boot.busy_remaining = boot.busy_remaining.saturating_sub(1);
        }
        if boot.valid_image {
            flags |= STATUS_FLAG_VALID_IMAGE;
        }
        let sentinel = boot.sentinel_override.unwrap_or(match boot.mode {
            SimMode::Bootloader => BOOTLOADER_SENTINELS[0],
            SimMode::Image => IMAGE_SENTINELS[1],
        });

        let mut report = vec![0u8; BOOTLOADER_REPORT_LEN];
        LittleEndian::write_u16(&mut report[0..2], BOOTLOADER_REPORT_LEN as u16);
        report[2] = REPORT_ID_BOOTLOADER;
        LittleEndian::write_u16(&mut report[3..5], sentinel);
        report[5] = self.config.protocol_version;
        report[6] = boot.last_error;
        report[7] = flags;

        let (address, data) = boot.read_window.clone().unwrap_or_default();
        let data_start = if self.config.protocol_version >= VERSION_TIMING_HINTS {
            report[8] = self.config.atomic_write_size;
            report[9] = self.config.write_delay;
            report[10] = self.config.format_delay;
            LittleEndian::write_u32(&mut report[11..15], address);
            LittleEndian::write_u16(&mut report[15..17], data.len() as u16);
            17
        } else {
            LittleEndian::write_u32(&mut report[8..12], address);
            LittleEndian::write_u16(&mut report[12..14], data.len() as u16);
            14
        };
        let data_end = data_start + data.len();
        report[data_start..data_end].copy_from_slice(&data);
        LittleEndian::write_u16(&mut report[data_end..data_end + 2], fletcher16(&data));
        report
    }

    fn input_read(&mut self, count: usize) -> Option<Vec<u8>> {
        if self.reset_pending {
            self.reset_pending = false;
            return Some(vec![0; count]);
        }
        let front = self.input_reports.front()?;
        let mut reply = if count < front.len() {
            // Partial read leaves the report queued for a full re-read.
            front[..count].to_vec()
        } else {
            self.input_reports.pop_front()?
        };
        reply.resize(count, 0);
        Some(reply)
    }
}

/// Split `[offset:LE32, count:LE16, data, fletcher16:LE16]` and verify the
/// checksum seeded over `[command, offset, count]`.
fn checked_payload(command: u8, p: &[u8]) -> Result<(u32, &[u8]), DeviceError> {
    if p.len() < 6 {
        return Err(DeviceError::OffsetOutOfRange);
    }
    let count = LittleEndian::read_u16(&p[4..6]) as usize;
    if count > MAX_WRITE_PAYLOAD || p.len() < 6 + count + 2 {
        return Err(DeviceError::OffsetOutOfRange);
    }
    let data = &p[6..6 + count];
    let mut preamble = [0u8; 7];
    preamble[0] = command;
    preamble[1..7].copy_from_slice(&p[0..6]);
    let expected = fletcher16_continue(data, fletcher16(&preamble));
    if LittleEndian::read_u16(&p[6 + count..8 + count]) != expected {
        return Err(DeviceError::ChecksumMismatch);
    }
    Ok((LittleEndian::read_u32(&p[0..4]), data))
}

fn descriptor_bytes(d: &HidDescriptor) -> Vec<u8> {
    let fields = [
        d.descriptor_length,
        d.bcd_version,
        d.report_descriptor_length,
        d.report_descriptor_register,
        d.input_register,
        d.max_input_length,
        d.output_register,
        d.max_output_length,
        d.command_register,
        d.data_register,
        d.vendor_id,
        d.product_id,
        d.version_id,
    ];
    let mut out = vec![0u8; HidDescriptor::SIZE];
    for (i, f) in fields.iter().enumerate() {
        LittleEndian::write_u16(&mut out[i * 2..i * 2 + 2], *f);
    }
    out
}

impl HostBus for SimulatedDevice {
    fn begin_transmission(&mut self, address: u8) {
        self.lock().open = Some((address, Vec::new()));
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize, BusError> {
        let mut state = self.lock();
        let (_, buf) = state.open.as_mut().ok_or(BusError::NotStarted)?;
        buf.extend_from_slice(bytes);
        Ok(bytes.len())
    }

    fn end_transmission(&mut self, _send_stop: bool) -> Result<(), BusError> {
        let mut state = self.lock();
        let (address, frame) = state.open.take().ok_or(BusError::NotStarted)?;
        if address != state.config.address {
            return Err(BusError::Nack { address });
        }
        state.handle_transaction(&frame);
        Ok(())
    }

    fn request_read(
        &mut self,
        address: u8,
        count: usize,
        _send_stop: bool,
    ) -> Result<usize, BusError> {
        let mut state = self.lock();
        if address != state.config.address {
            return Err(BusError::Nack { address });
        }
        let mut reply = match state.pending_reply.take() {
            Some(reply) => reply,
            None => state
                .input_read(count)
                .ok_or(BusError::NoResponse { address })?,
        };
        reply.truncate(count);
        let available = reply.len();
        state.rx = reply.into();
        Ok(available)
    }

    fn read(&mut self) -> Result<u8, BusError> {
        self.lock().rx.pop_front().ok_or(BusError::Underflow)
    }

    fn data_ready_asserted(&mut self) -> bool {
        let state = self.lock();
        state.reset_pending || !state.input_reports.is_empty()
    }
}
