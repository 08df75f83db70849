// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Simulated Hardware
//!
//! Stand-ins for the serial port, the controller behind it and the host's
//! device list.
//!
//! [`SimulatedDevice`] answers real RTU frames from an in-memory register
//! and coil store. [`SimulatedOpener`] hands out links to it and records
//! every request written, so tests can check probe order and counts.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use coilbus_rtu::client::BoxedLink;
use coilbus_rtu::codec;
use coilbus_rtu::error::LinkError;
use coilbus_rtu::health::{DevicePath, PresenceSource};
use coilbus_rtu::registers::REG_MODBUS_ADDRESS;
use coilbus_rtu::{
    CancelFlag, Framing, HeartbeatProbe, LinkOpener, RtuError, RtuResult, SerialLink,
};

use super::fixtures::IDENTITY_PAYLOAD;

/// Registers and coils each simulated device holds.
pub const STORE_SIZE: usize = 64;

const COIL_ON: u16 = 0xFF00;

// Exception codes.
const ILLEGAL_FUNCTION: u8 = 0x01;
const ILLEGAL_DATA_ADDRESS: u8 = 0x02;

// =============================================================================
// Simulated Device
// =============================================================================

#[derive(Debug)]
struct DeviceState {
    address: u8,
    baud_rate: u32,
    holding: Vec<u16>,
    input: Vec<u16>,
    coils: Vec<bool>,
    identity: Vec<u8>,
    present: bool,
    holding_unsupported: bool,
    identity_only: bool,
    restart_on_address_write: bool,
    exception: Option<(u8, u8)>,
    corrupt_replies: usize,
}

/// A controller on the simulated bus.
///
/// Clones share state, so a test can keep one clone and mutate the device
/// while a client talks to another.
#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    state: Arc<Mutex<DeviceState>>,
}

impl SimulatedDevice {
    /// Creates a device listening on `address` at `baud_rate`.
    pub fn new(address: u8, baud_rate: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(DeviceState {
                address,
                baud_rate,
                holding: vec![0; STORE_SIZE],
                input: vec![0; STORE_SIZE],
                coils: vec![false; STORE_SIZE],
                identity: IDENTITY_PAYLOAD.to_vec(),
                present: true,
                holding_unsupported: false,
                identity_only: false,
                restart_on_address_write: false,
                exception: None,
                corrupt_replies: 0,
            })),
        }
    }

    /// Presets holding registers starting at `start`.
    pub fn with_holding(self, start: u16, values: &[u16]) -> Self {
        {
            let mut state = self.state.lock();
            for (i, value) in values.iter().enumerate() {
                state.holding[start as usize + i] = *value;
            }
        }
        self
    }

    /// Presets input registers starting at `start`.
    pub fn with_input(self, start: u16, values: &[u16]) -> Self {
        {
            let mut state = self.state.lock();
            for (i, value) in values.iter().enumerate() {
                state.input[start as usize + i] = *value;
            }
        }
        self
    }

    /// Answers FC03 with an illegal-function exception.
    pub fn without_holding_reads(self) -> Self {
        self.state.lock().holding_unsupported = true;
        self
    }

    /// Answers every request with the identification frame.
    pub fn identity_only(self) -> Self {
        self.state.lock().identity_only = true;
        self
    }

    /// Takes a written address register into effect at once, without
    /// echoing the write.
    pub fn restart_on_address_write(self) -> Self {
        self.state.lock().restart_on_address_write = true;
        self
    }

    /// Device address.
    pub fn address(&self) -> u8 {
        self.state.lock().address
    }

    /// Line speed the device listens at.
    pub fn baud_rate(&self) -> u32 {
        self.state.lock().baud_rate
    }

    /// Connects or disconnects the device from the bus. An absent device
    /// never answers.
    pub fn set_present(&self, present: bool) {
        self.state.lock().present = present;
    }

    /// Answers `function` with exception `code` from now on.
    pub fn fail_with_exception(&self, function: u8, code: u8) {
        self.state.lock().exception = Some((function, code));
    }

    /// Clears an exception set with [`fail_with_exception`](Self::fail_with_exception).
    pub fn clear_exception(&self) {
        self.state.lock().exception = None;
    }

    /// Corrupts the CRC of the next `n` replies.
    pub fn corrupt_next_replies(&self, n: usize) {
        self.state.lock().corrupt_replies = n;
    }

    /// Current holding register value.
    pub fn holding(&self, register: u16) -> u16 {
        self.state.lock().holding[register as usize]
    }

    /// Current coil states from `start`.
    pub fn coils(&self, start: u16, count: u16) -> Vec<bool> {
        let state = self.state.lock();
        state.coils[start as usize..(start + count) as usize].to_vec()
    }

    /// Builds the reply to `request`, or `None` if the device stays silent.
    pub fn respond(&self, request: &[u8]) -> Option<Vec<u8>> {
        let frame = codec::decode(request).ok()?;
        let mut state = self.state.lock();

        if !state.present || frame.address() != state.address {
            return None;
        }

        let address = state.address;
        let function = frame.function();
        let payload = frame.payload();

        let exception = state.exception;
        let mut reply = match exception {
            Some((failing, code)) if failing == function => {
                codec::encode(address, function | 0x80, &[code])
            }
            _ if state.identity_only => codec::encode(address, 0x11, &state.identity),
            _ => match state.execute(function, payload) {
                Ok(data) => codec::encode(address, function, &data),
                Err(code) => codec::encode(address, function | 0x80, &[code]),
            },
        };

        if state.restart_on_address_write && is_write(function) {
            let written = state.holding[REG_MODBUS_ADDRESS as usize];
            if written != 0 && written != u16::from(address) {
                state.address = written as u8;
                return None;
            }
        }

        if state.corrupt_replies > 0 {
            state.corrupt_replies -= 1;
            if let Some(last) = reply.last_mut() {
                *last ^= 0xFF;
            }
        }

        Some(reply)
    }
}

fn is_write(function: u8) -> bool {
    matches!(function, 0x06 | 0x10)
}

fn word(payload: &[u8], index: usize) -> u16 {
    u16::from_be_bytes([payload[index * 2], payload[index * 2 + 1]])
}

fn span(start: u16, count: u16) -> Result<std::ops::Range<usize>, u8> {
    let start = start as usize;
    let end = start + count as usize;
    if count == 0 || end > STORE_SIZE {
        return Err(ILLEGAL_DATA_ADDRESS);
    }
    Ok(start..end)
}

impl DeviceState {
    /// Executes one request; `Err` carries the exception code.
    fn execute(&mut self, function: u8, payload: &[u8]) -> Result<Vec<u8>, u8> {
        if function == 0x11 {
            return Ok(self.identity.clone());
        }
        if payload.len() < 4 {
            return Err(ILLEGAL_DATA_ADDRESS);
        }
        let (first, second) = (word(payload, 0), word(payload, 1));

        match function {
            0x01 => {
                let range = span(first, second)?;
                let packed = coilbus_rtu::types::pack_coils(&self.coils[range]);
                let mut data = vec![packed.len() as u8];
                data.extend(packed);
                Ok(data)
            }
            0x03 if self.holding_unsupported => Err(ILLEGAL_FUNCTION),
            0x03 | 0x04 => {
                let range = span(first, second)?;
                let store = if function == 0x03 { &self.holding } else { &self.input };
                let mut data = vec![(second * 2) as u8];
                data.extend(store[range].iter().flat_map(|v| v.to_be_bytes()));
                Ok(data)
            }
            0x05 => {
                let range = span(first, 1)?;
                self.coils[range.start] = second == COIL_ON;
                Ok(payload[..4].to_vec())
            }
            0x06 => {
                let range = span(first, 1)?;
                self.holding[range.start] = second;
                Ok(payload[..4].to_vec())
            }
            0x0F => {
                let range = span(first, second)?;
                let bits = coilbus_rtu::types::unpack_coils(
                    payload.get(5..).unwrap_or_default(),
                    second as usize,
                );
                for (slot, on) in self.coils[range].iter_mut().zip(bits) {
                    *slot = on;
                }
                Ok(payload[..4].to_vec())
            }
            0x10 => {
                let range = span(first, second)?;
                let data = payload.get(5..).unwrap_or_default();
                for (i, slot) in self.holding[range].iter_mut().enumerate() {
                    if data.len() >= (i + 1) * 2 {
                        *slot = word(data, i);
                    }
                }
                Ok(payload[..4].to_vec())
            }
            _ => Err(ILLEGAL_FUNCTION),
        }
    }
}

// =============================================================================
// Request Log
// =============================================================================

/// One request seen on the simulated bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestRecord {
    /// Address byte of the request.
    pub address: u8,
    /// Function code of the request.
    pub function: u8,
    /// Speed of the link it was written on.
    pub baud_rate: u32,
}

#[derive(Debug, Default)]
struct Recorder {
    requests: Mutex<Vec<RequestRecord>>,
    cancel_after: Mutex<Option<(usize, CancelFlag)>>,
}

impl Recorder {
    fn record(&self, record: RequestRecord) {
        let count = {
            let mut requests = self.requests.lock();
            requests.push(record);
            requests.len()
        };
        if let Some((limit, flag)) = &*self.cancel_after.lock() {
            if count >= *limit {
                flag.cancel();
            }
        }
    }
}

// =============================================================================
// Simulated Link
// =============================================================================

struct SimulatedLink {
    device: SimulatedDevice,
    recorder: Arc<Recorder>,
    port: String,
    baud_rate: u32,
    pending: Vec<u8>,
    latency: Duration,
}

#[async_trait]
impl SerialLink for SimulatedLink {
    async fn write_frame(&mut self, frame: &[u8]) -> RtuResult<()> {
        if frame.len() >= 2 {
            tracing::trace!(
                address = frame[0],
                function = frame[1],
                baud_rate = self.baud_rate,
                "Simulated request"
            );
            self.recorder.record(RequestRecord {
                address: frame[0],
                function: frame[1],
                baud_rate: self.baud_rate,
            });
        }
        // A speed mismatch garbles the request; the device stays silent.
        if self.baud_rate == self.device.baud_rate() {
            self.pending = self.device.respond(frame).unwrap_or_default();
        }
        Ok(())
    }

    async fn clear_input(&mut self) -> RtuResult<()> {
        self.pending.clear();
        Ok(())
    }

    async fn read_response(
        &mut self,
        _budget: usize,
        _timeout: Duration,
        _gap: Duration,
    ) -> RtuResult<Vec<u8>> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        Ok(std::mem::take(&mut self.pending))
    }

    fn port(&self) -> &str {
        &self.port
    }

    fn baud_rate(&self) -> u32 {
        self.baud_rate
    }
}

// =============================================================================
// Simulated Opener
// =============================================================================

/// Opens links to one [`SimulatedDevice`].
#[derive(Debug)]
pub struct SimulatedOpener {
    device: SimulatedDevice,
    recorder: Arc<Recorder>,
    opens: AtomicUsize,
    open_failures: AtomicUsize,
    unplugged: AtomicBool,
    latency: Mutex<Duration>,
}

impl SimulatedOpener {
    /// Creates an opener for `device`.
    pub fn new(device: SimulatedDevice) -> Self {
        Self {
            device,
            recorder: Arc::new(Recorder::default()),
            opens: AtomicUsize::new(0),
            open_failures: AtomicUsize::new(0),
            unplugged: AtomicBool::new(false),
            latency: Mutex::new(Duration::ZERO),
        }
    }

    /// The device behind this opener.
    pub fn device(&self) -> &SimulatedDevice {
        &self.device
    }

    /// Every request written so far.
    pub fn requests(&self) -> Vec<RequestRecord> {
        self.recorder.requests.lock().clone()
    }

    /// Number of requests written so far.
    pub fn request_count(&self) -> usize {
        self.recorder.requests.lock().len()
    }

    /// Number of successful opens.
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Raises `flag` once `n` requests were written.
    pub fn cancel_after(&self, n: usize, flag: CancelFlag) {
        *self.recorder.cancel_after.lock() = Some((n, flag));
    }

    /// Makes the next `n` opens fail with a transient error.
    pub fn fail_next_opens(&self, n: usize) {
        self.open_failures.store(n, Ordering::SeqCst);
    }

    /// Makes every open fail as if the adapter was unplugged.
    pub fn set_unplugged(&self, unplugged: bool) {
        self.unplugged.store(unplugged, Ordering::SeqCst);
    }

    /// Delays every read on links opened afterwards.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }
}

#[async_trait]
impl LinkOpener for SimulatedOpener {
    async fn open(&self, port: &str, baud_rate: u32, _framing: Framing) -> RtuResult<BoxedLink> {
        if self.unplugged.load(Ordering::SeqCst) {
            return Err(LinkError::not_found(port).into());
        }
        let failing = self
            .open_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(LinkError::unavailable(port, "simulated open failure").into());
        }

        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SimulatedLink {
            device: self.device.clone(),
            recorder: Arc::clone(&self.recorder),
            port: port.to_string(),
            baud_rate,
            pending: Vec::new(),
            latency: *self.latency.lock(),
        }))
    }
}

// =============================================================================
// Mock Presence
// =============================================================================

/// A device list the test edits.
#[derive(Debug, Default)]
pub struct MockPresence {
    devices: Mutex<Vec<DevicePath>>,
    fail: AtomicBool,
}

impl MockPresence {
    /// Creates a list holding `devices`.
    pub fn with_devices(devices: &[&str]) -> Self {
        Self {
            devices: Mutex::new(devices.iter().map(|d| d.to_string()).collect()),
            fail: AtomicBool::new(false),
        }
    }

    /// Adds a device.
    pub fn plug(&self, path: &str) {
        self.devices.lock().push(path.to_string());
    }

    /// Removes a device.
    pub fn unplug(&self, path: &str) {
        self.devices.lock().retain(|d| d != path);
    }

    /// Makes listing fail until reset.
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

impl PresenceSource for MockPresence {
    fn list_serial_devices(&self) -> RtuResult<Vec<DevicePath>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(LinkError::unavailable("enumeration", "simulated failure").into());
        }
        Ok(self.devices.lock().clone())
    }
}

// =============================================================================
// Scripted Probe
// =============================================================================

/// Outcome of one scripted heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeStep {
    /// The device answered.
    Ok,
    /// The device did not answer.
    Fail,
    /// The link was held by another operation.
    Busy,
}

/// A heartbeat that plays back a script, then repeats a fallback.
#[derive(Debug)]
pub struct ScriptedProbe {
    steps: Mutex<VecDeque<ProbeStep>>,
    fallback: ProbeStep,
    calls: AtomicUsize,
}

impl ScriptedProbe {
    /// Plays `steps`, then answers `fallback` forever.
    pub fn new(steps: impl IntoIterator<Item = ProbeStep>, fallback: ProbeStep) -> Self {
        Self {
            steps: Mutex::new(steps.into_iter().collect()),
            fallback,
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of heartbeats run.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HeartbeatProbe for ScriptedProbe {
    async fn heartbeat(&self) -> RtuResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self.steps.lock().pop_front().unwrap_or(self.fallback);
        match step {
            ProbeStep::Ok => Ok(()),
            ProbeStep::Fail => Err(RtuError::no_response()),
            ProbeStep::Busy => Err(RtuError::busy()),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_ignores_other_addresses() {
        let device = SimulatedDevice::new(7, 9600);
        assert!(device.respond(&codec::encode(8, 0x11, &[0, 0, 0, 0])).is_none());
        assert!(device.respond(&codec::encode(7, 0x11, &[0, 0, 0, 0])).is_some());
    }

    #[test]
    fn test_device_ignores_bad_crc() {
        let device = SimulatedDevice::new(1, 9600);
        let mut request = codec::encode(1, 0x03, &[0, 0, 0, 1]);
        request[6] ^= 0xFF;
        assert!(device.respond(&request).is_none());
    }

    #[test]
    fn test_device_out_of_range_read() {
        let device = SimulatedDevice::new(1, 9600);
        let reply = device
            .respond(&codec::encode(1, 0x03, &[0, 60, 0, 10]))
            .unwrap();
        assert_eq!(&reply[1..3], &[0x83, ILLEGAL_DATA_ADDRESS]);
    }

    #[test]
    fn test_corrupted_reply() {
        let device = SimulatedDevice::new(1, 9600);
        device.corrupt_next_replies(1);
        let reply = device.respond(&codec::encode(1, 0x03, &[0, 0, 0, 1])).unwrap();
        assert!(codec::decode(&reply).is_err());
        let reply = device.respond(&codec::encode(1, 0x03, &[0, 0, 0, 1])).unwrap();
        assert!(codec::decode(&reply).is_ok());
    }

    #[tokio::test]
    async fn test_scripted_probe() {
        let probe = ScriptedProbe::new([ProbeStep::Busy], ProbeStep::Ok);
        assert!(probe.heartbeat().await.unwrap_err().is_busy());
        assert!(probe.heartbeat().await.is_ok());
        assert_eq!(probe.calls(), 2);
    }
}
