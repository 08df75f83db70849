// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Transaction engine.
//!
//! One transaction is a single request/response exchange on an exclusively
//! held link:
//!
//! ```text
//!  clear input ─▶ write + flush ─▶ settle ─▶ read (timeout, gap) ─▶ classify
//! ```
//!
//! Classification never fails: every possible reply, including silence, maps
//! to a [`TransactionResult`] variant. Only link-level failures (I/O, port
//! gone) surface as `Err`. Callers decide which outcomes are fatal.

use std::time::{Duration, Instant};

use crate::codec::{self, Frame, MIN_FRAME_LEN};
use crate::error::{ProtocolError, RtuError, RtuResult, TimeoutError};
use crate::types::{DeviceAddress, FunctionCode, TimingConfig, EXCEPTION_BIT};

use super::transport::SerialLink;

/// Identification request body expected by the device.
pub const IDENTIFY_PAYLOAD: [u8; 4] = [0x00, 0x00, 0x00, 0x00];

/// Smallest identification reply that carries a usable header.
pub const MIN_IDENTIFY_LEN: usize = 7;

/// Smallest echo reply of a write request.
pub const MIN_WRITE_ECHO_LEN: usize = 8;

// =============================================================================
// TransactionRequest
// =============================================================================

/// A request frame before encoding. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRequest {
    address: DeviceAddress,
    function: u8,
    payload: Vec<u8>,
}

impl TransactionRequest {
    /// Creates a request with a raw function byte.
    pub fn new(address: DeviceAddress, function: u8, payload: Vec<u8>) -> Self {
        Self {
            address,
            function,
            payload,
        }
    }

    /// Read request (`start`, `count`) for FC01/03/04.
    pub fn read(address: DeviceAddress, function: FunctionCode, start: u16, count: u16) -> Self {
        let mut payload = Vec::with_capacity(4);
        payload.extend_from_slice(&start.to_be_bytes());
        payload.extend_from_slice(&count.to_be_bytes());
        Self::new(address, function.code(), payload)
    }

    /// Identification request (FC 0x11).
    pub fn identify(address: DeviceAddress) -> Self {
        Self::new(
            address,
            FunctionCode::Identify.code(),
            IDENTIFY_PAYLOAD.to_vec(),
        )
    }

    /// Single-value write (FC05/06): register address followed by value.
    pub fn write_single(
        address: DeviceAddress,
        function: FunctionCode,
        register: u16,
        value: u16,
    ) -> Self {
        let mut payload = Vec::with_capacity(4);
        payload.extend_from_slice(&register.to_be_bytes());
        payload.extend_from_slice(&value.to_be_bytes());
        Self::new(address, function.code(), payload)
    }

    /// Multi-value write (FC0F/10): start, quantity, byte count, data.
    pub fn write_multiple(
        address: DeviceAddress,
        function: FunctionCode,
        start: u16,
        quantity: u16,
        data: &[u8],
    ) -> Self {
        let mut payload = Vec::with_capacity(5 + data.len());
        payload.extend_from_slice(&start.to_be_bytes());
        payload.extend_from_slice(&quantity.to_be_bytes());
        payload.push(data.len() as u8);
        payload.extend_from_slice(data);
        Self::new(address, function.code(), payload)
    }

    /// Target device.
    pub fn address(&self) -> DeviceAddress {
        self.address
    }

    /// Function byte.
    pub fn function(&self) -> u8 {
        self.function
    }

    /// Request body.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Encodes the request with its CRC.
    pub fn encode(&self) -> Vec<u8> {
        codec::encode(self.address.get(), self.function, &self.payload)
    }
}

// =============================================================================
// OperationClass
// =============================================================================

/// Operation class; selects settle delay and read timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationClass {
    /// Register or coil read.
    Read,
    /// Identification request.
    Identify,
    /// Single register/coil write.
    SingleWrite,
    /// Multiple register/coil write.
    MultiWrite,
    /// Discovery probe.
    Probe,
}

impl OperationClass {
    /// Delay between write and read.
    pub fn settle(&self, timing: &TimingConfig) -> Duration {
        match self {
            Self::Read => timing.read_settle,
            Self::Identify => timing.identify_settle,
            Self::SingleWrite => timing.single_write_settle,
            Self::MultiWrite => timing.multi_write_settle,
            Self::Probe => timing.probe_settle,
        }
    }

    /// Time allowed for the first response byte.
    pub fn timeout(&self, timing: &TimingConfig) -> Duration {
        match self {
            Self::Probe => timing.probe_timeout,
            _ => timing.read_timeout,
        }
    }

    /// Returns `true` for write classes.
    pub fn is_write(&self) -> bool {
        matches!(self, Self::SingleWrite | Self::MultiWrite)
    }

    /// Name for logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Identify => "identify",
            Self::SingleWrite => "single_write",
            Self::MultiWrite => "multi_write",
            Self::Probe => "probe",
        }
    }
}

// =============================================================================
// TransactionResult
// =============================================================================

/// Classified outcome of one exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionResult {
    /// Valid reply with the requested function.
    Ok(Frame),
    /// Nothing arrived.
    NoResponse,
    /// Fewer bytes than a valid frame.
    ShortResponse {
        /// Bytes received.
        len: usize,
    },
    /// CRC check failed.
    CrcMismatch {
        /// CRC computed over the received bytes.
        expected: u16,
        /// CRC carried in the reply.
        actual: u16,
    },
    /// Reply from another address.
    AddressMismatch {
        /// Requested address.
        expected: u8,
        /// Address byte received.
        actual: u8,
    },
    /// Exception reply.
    ExceptionResponse {
        /// Exception code (1-6 are named).
        code: u8,
    },
    /// Valid frame with a different function byte and no exception bit.
    /// Carries the frame so callers can reinterpret it.
    UnexpectedFunction {
        /// Function byte received.
        code: u8,
        /// The complete reply.
        frame: Frame,
    },
}

impl TransactionResult {
    /// Returns `true` for [`TransactionResult::Ok`].
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    /// Returns `true` for [`TransactionResult::CrcMismatch`].
    pub fn is_crc_mismatch(&self) -> bool {
        matches!(self, Self::CrcMismatch { .. })
    }

    /// Demotes an `Ok` frame shorter than `min_len` to `ShortResponse`.
    pub fn require_len(self, min_len: usize) -> Self {
        match self {
            Self::Ok(frame) if frame.raw().len() < min_len => Self::ShortResponse {
                len: frame.raw().len(),
            },
            other => other,
        }
    }

    /// Converts into a `Result`, mapping every non-`Ok` outcome to its
    /// protocol error.
    pub fn into_result(self, function: u8) -> RtuResult<Frame> {
        match self {
            Self::Ok(frame) => Ok(frame),
            Self::NoResponse => Err(ProtocolError::NoResponse.into()),
            Self::ShortResponse { len } => Err(ProtocolError::ShortResponse { len }.into()),
            Self::CrcMismatch { expected, actual } => {
                Err(ProtocolError::crc_mismatch(expected, actual).into())
            }
            Self::AddressMismatch { expected, actual } => {
                Err(ProtocolError::AddressMismatch { expected, actual }.into())
            }
            Self::ExceptionResponse { code } => Err(RtuError::exception(function, code)),
            Self::UnexpectedFunction { code, .. } => Err(ProtocolError::UnexpectedFunction {
                expected: function,
                actual: code,
            }
            .into()),
        }
    }

    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Ok(_) => "ok",
            Self::NoResponse => "no_response",
            Self::ShortResponse { .. } => "short_response",
            Self::CrcMismatch { .. } => "crc_mismatch",
            Self::AddressMismatch { .. } => "address_mismatch",
            Self::ExceptionResponse { .. } => "exception",
            Self::UnexpectedFunction { .. } => "unexpected_function",
        }
    }
}

// =============================================================================
// Classification
// =============================================================================

/// Classifies received bytes against the request that produced them.
///
/// Order: empty, short, CRC, address, matching function, exception bit,
/// other function.
pub fn classify(request: &TransactionRequest, bytes: &[u8]) -> TransactionResult {
    if bytes.is_empty() {
        return TransactionResult::NoResponse;
    }
    if bytes.len() < MIN_FRAME_LEN {
        return TransactionResult::ShortResponse { len: bytes.len() };
    }

    let frame = match codec::decode(bytes) {
        Ok(frame) => frame,
        Err(ProtocolError::CrcMismatch { expected, actual }) => {
            return TransactionResult::CrcMismatch { expected, actual }
        }
        Err(_) => return TransactionResult::ShortResponse { len: bytes.len() },
    };

    let expected = request.address().get();
    if frame.address() != expected {
        return TransactionResult::AddressMismatch {
            expected,
            actual: frame.address(),
        };
    }

    let function = frame.function();
    if function == request.function() {
        TransactionResult::Ok(frame)
    } else if function & EXCEPTION_BIT != 0 {
        TransactionResult::ExceptionResponse {
            code: frame.exception_code().unwrap_or(0),
        }
    } else {
        TransactionResult::UnexpectedFunction {
            code: function,
            frame,
        }
    }
}

// =============================================================================
// Exchange
// =============================================================================

/// Longest a link may spend in one `read_response` before it counts as
/// stalled: the first-byte timeout plus one inter-byte gap per budget byte.
pub(crate) fn read_deadline(timeout: Duration, timing: &TimingConfig) -> Duration {
    let per_byte = u32::try_from(timing.read_budget).unwrap_or(u32::MAX);
    timeout.saturating_add(timing.inter_byte_gap.saturating_mul(per_byte))
}

/// Reads one response, bounding links that ignore their own timeout.
async fn read_bounded(
    link: &mut dyn SerialLink,
    timeout: Duration,
    timing: &TimingConfig,
) -> RtuResult<Vec<u8>> {
    let deadline = read_deadline(timeout, timing);
    let read = link.read_response(timing.read_budget, timeout, timing.inter_byte_gap);
    match tokio::time::timeout(deadline, read).await {
        Ok(bytes) => bytes,
        Err(_) => Err(RtuError::read_timeout(deadline)),
    }
}

/// Runs one exchange on `link`.
///
/// # Errors
///
/// Link failures and stalled writes or reads are returned as `Err`; every
/// reply is classified.
pub async fn exchange(
    link: &mut dyn SerialLink,
    request: &TransactionRequest,
    class: OperationClass,
    timing: &TimingConfig,
) -> RtuResult<TransactionResult> {
    let started = Instant::now();
    let frame = request.encode();

    link.clear_input().await?;

    let write_limit = class.timeout(timing);
    match tokio::time::timeout(write_limit, link.write_frame(&frame)).await {
        Ok(written) => written?,
        Err(_) => return Err(RtuError::timeout(TimeoutError::write(write_limit))),
    }

    let settle = class.settle(timing);
    if !settle.is_zero() {
        tokio::time::sleep(settle).await;
    }

    let bytes = read_bounded(link, class.timeout(timing), timing).await?;
    let result = classify(request, &bytes);

    tracing::debug!(
        port = link.port(),
        address = request.address().get(),
        function = request.function(),
        class = class.as_str(),
        len = bytes.len(),
        outcome = result.label(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "RTU transaction"
    );

    Ok(result)
}

/// Identification exchange with CRC recovery.
///
/// A CRC failure is followed by a back-off and up to
/// `timing.identify_retries` fresh reads of the line. The request is not
/// sent again; the device is often still transmitting.
pub async fn identify_exchange(
    link: &mut dyn SerialLink,
    request: &TransactionRequest,
    timing: &TimingConfig,
) -> RtuResult<TransactionResult> {
    let mut result = exchange(link, request, OperationClass::Identify, timing).await?;

    if result.is_crc_mismatch() && timing.identify_retries > 0 {
        tokio::time::sleep(timing.identify_retry_backoff).await;

        for attempt in 1..=timing.identify_retries {
            if attempt > 1 && !timing.identify_retry_interval.is_zero() {
                tokio::time::sleep(timing.identify_retry_interval).await;
            }

            let bytes = read_bounded(link, timing.read_timeout, timing).await?;
            result = classify(request, &bytes);

            tracing::debug!(
                port = link.port(),
                attempt,
                len = bytes.len(),
                outcome = result.label(),
                "Identification re-read"
            );

            if !result.is_crc_mismatch() {
                break;
            }
        }
    }

    Ok(result.require_len(MIN_IDENTIFY_LEN))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;

    fn addr(a: u8) -> DeviceAddress {
        DeviceAddress::new(a).unwrap()
    }

    /// Link replaying queued replies, one per read.
    struct ScriptedLink {
        replies: VecDeque<Vec<u8>>,
        written: Vec<Vec<u8>>,
        reads: usize,
    }

    impl ScriptedLink {
        fn new(replies: Vec<Vec<u8>>) -> Self {
            Self {
                replies: replies.into(),
                written: Vec::new(),
                reads: 0,
            }
        }
    }

    #[async_trait]
    impl SerialLink for ScriptedLink {
        async fn write_frame(&mut self, frame: &[u8]) -> RtuResult<()> {
            self.written.push(frame.to_vec());
            Ok(())
        }

        async fn clear_input(&mut self) -> RtuResult<()> {
            Ok(())
        }

        async fn read_response(
            &mut self,
            _budget: usize,
            _timeout: Duration,
            _gap: Duration,
        ) -> RtuResult<Vec<u8>> {
            self.reads += 1;
            Ok(self.replies.pop_front().unwrap_or_default())
        }

        fn port(&self) -> &str {
            "scripted"
        }

        fn baud_rate(&self) -> u32 {
            9600
        }
    }

    #[test]
    fn test_read_request_encoding() {
        let request = TransactionRequest::read(addr(1), FunctionCode::ReadHoldingRegisters, 0, 10);
        assert_eq!(
            request.encode(),
            vec![0x01, 0x03, 0x00, 0x00, 0x00, 0x0A, 0xC5, 0xCD]
        );
    }

    #[test]
    fn test_write_multiple_layout() {
        let request = TransactionRequest::write_multiple(
            addr(1),
            FunctionCode::WriteMultipleRegisters,
            1,
            2,
            &[0x00, 0x10, 0x00, 0x20],
        );
        assert_eq!(request.payload(), &[0, 1, 0, 2, 4, 0x00, 0x10, 0x00, 0x20]);
    }

    #[test]
    fn test_classify_empty_and_short() {
        let request = TransactionRequest::identify(addr(1));
        assert_eq!(classify(&request, &[]), TransactionResult::NoResponse);
        assert_eq!(
            classify(&request, &[0x01, 0x11, 0x00]),
            TransactionResult::ShortResponse { len: 3 }
        );
    }

    #[test]
    fn test_classify_exception_not_unexpected() {
        let request = TransactionRequest::write_multiple(
            addr(1),
            FunctionCode::WriteMultipleRegisters,
            0,
            1,
            &[0, 1],
        );
        let reply = codec::encode(0x01, 0x90, &[0x02]);
        assert_eq!(
            classify(&request, &reply),
            TransactionResult::ExceptionResponse { code: 2 }
        );

        let err = classify(&request, &reply).into_result(0x10).unwrap_err();
        assert!(err.to_string().contains("Illegal Data Address"));
    }

    #[test]
    fn test_classify_address_mismatch() {
        let request = TransactionRequest::read(addr(3), FunctionCode::ReadHoldingRegisters, 0, 1);
        let reply = codec::encode(0x04, 0x03, &[0x02, 0x00, 0x01]);
        assert_eq!(
            classify(&request, &reply),
            TransactionResult::AddressMismatch {
                expected: 3,
                actual: 4
            }
        );
    }

    #[test]
    fn test_classify_unexpected_function_keeps_frame() {
        let request = TransactionRequest::read(addr(1), FunctionCode::ReadHoldingRegisters, 0, 1);
        let reply = codec::encode(0x01, 0x11, &[0, 0, 0, 0, 0, 0, 0x00, 0x2A]);
        match classify(&request, &reply) {
            TransactionResult::UnexpectedFunction { code, frame } => {
                assert_eq!(code, 0x11);
                assert_eq!(frame.words_from(8, 1), vec![0x002A]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_require_len() {
        let frame = codec::decode(&codec::encode(0x01, 0x06, &[0x00])).unwrap();
        assert_eq!(
            TransactionResult::Ok(frame).require_len(MIN_WRITE_ECHO_LEN),
            TransactionResult::ShortResponse { len: 5 }
        );
    }

    #[tokio::test]
    async fn test_exchange_writes_and_classifies() {
        let request = TransactionRequest::read(addr(1), FunctionCode::ReadHoldingRegisters, 0, 1);
        let mut link = ScriptedLink::new(vec![codec::encode(0x01, 0x03, &[0x02, 0x00, 0x07])]);

        let result = exchange(
            &mut link,
            &request,
            OperationClass::Read,
            &TimingConfig::immediate(),
        )
        .await
        .unwrap();

        assert!(result.is_ok());
        assert_eq!(link.written, vec![request.encode()]);
    }

    #[tokio::test]
    async fn test_identify_rereads_after_crc_error() {
        let request = TransactionRequest::identify(addr(1));
        let good = codec::encode(0x01, 0x11, &[0x0F, 0xFF, 0x99, 0x87, 0x41, 0x77]);
        let mut bad = good.clone();
        let last = bad.len() - 1;
        bad[last] ^= 0x55;

        let mut link = ScriptedLink::new(vec![bad.clone(), bad, good]);
        let result = identify_exchange(&mut link, &request, &TimingConfig::immediate())
            .await
            .unwrap();

        assert!(result.is_ok());
        assert_eq!(link.written.len(), 1);
        assert_eq!(link.reads, 3);
    }

    #[tokio::test]
    async fn test_identify_gives_up_after_retries() {
        let request = TransactionRequest::identify(addr(1));
        let mut bad = codec::encode(0x01, 0x11, &[0x0F, 0xFF, 0x99]);
        bad[2] ^= 0x01;

        let mut link = ScriptedLink::new(vec![bad.clone(), bad.clone(), bad.clone(), bad]);
        let result = identify_exchange(&mut link, &request, &TimingConfig::immediate())
            .await
            .unwrap();

        assert!(result.is_crc_mismatch());
        assert_eq!(link.reads, 3);
    }

    /// Link whose write or read never completes.
    struct StalledLink {
        stall_write: bool,
    }

    #[async_trait]
    impl SerialLink for StalledLink {
        async fn write_frame(&mut self, _frame: &[u8]) -> RtuResult<()> {
            if self.stall_write {
                std::future::pending::<()>().await;
            }
            Ok(())
        }

        async fn clear_input(&mut self) -> RtuResult<()> {
            Ok(())
        }

        async fn read_response(
            &mut self,
            _budget: usize,
            _timeout: Duration,
            _gap: Duration,
        ) -> RtuResult<Vec<u8>> {
            std::future::pending().await
        }

        fn port(&self) -> &str {
            "stalled"
        }

        fn baud_rate(&self) -> u32 {
            9600
        }
    }

    #[test]
    fn test_read_deadline_covers_budget() {
        let timing = TimingConfig::immediate();
        assert_eq!(
            read_deadline(Duration::from_millis(50), &timing),
            Duration::from_millis(50) + timing.inter_byte_gap * timing.read_budget as u32
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_write_times_out() {
        let request = TransactionRequest::identify(addr(1));
        let timing = TimingConfig::immediate();
        let mut link = StalledLink { stall_write: true };

        let err = exchange(&mut link, &request, OperationClass::Read, &timing)
            .await
            .unwrap_err();

        assert_eq!(err.category(), "timeout");
        assert!(matches!(
            err,
            RtuError::Timeout(TimeoutError::Write { duration }) if duration == timing.read_timeout
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_read_times_out() {
        let request = TransactionRequest::identify(addr(1));
        let timing = TimingConfig::immediate();
        let mut link = StalledLink { stall_write: false };

        let err = identify_exchange(&mut link, &request, &timing)
            .await
            .unwrap_err();

        assert!(err.is_retryable());
        assert!(matches!(
            err,
            RtuError::Timeout(TimeoutError::Read { duration })
                if duration == read_deadline(timing.read_timeout, &timing)
        ));
    }
}
