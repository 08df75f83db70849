// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Register and coil access on top of the transaction engine.
//!
//! Reads are best effort: a CRC failure yields an empty block, a device that
//! ignores FC03 is asked again with FC04, and a device that answers every
//! request with its identification frame has its register values picked out
//! of that frame.
//!
//! Writes are strict: every write goes through one validated-write helper
//! that requires a complete, CRC-correct echo from the addressed device.
//! Exceptions and framing failures are returned as errors.

use crate::error::{OperationError, RtuError, RtuErrorContext, RtuResult};
use crate::types::{pack_coils, unpack_coils, CoilBlock, FunctionCode, RegisterBlock};

use super::transaction::{
    OperationClass, TransactionRequest, TransactionResult, MIN_WRITE_ECHO_LEN,
};
use super::RtuClient;

/// Most registers one read may request.
pub const MAX_READ_REGISTERS: u16 = 125;

/// Most coils one read may request.
pub const MAX_READ_COILS: u16 = 2000;

/// Most registers one FC16 write may carry.
pub const MAX_WRITE_REGISTERS: u16 = 123;

/// Most coils one FC0F write may carry.
pub const MAX_WRITE_COILS: u16 = 1968;

/// Full-frame offset of the first register value inside an identification
/// frame sent in reply to a register read.
const IDENTIFY_REGISTER_OFFSET: usize = 8;

const COIL_ON: u16 = 0xFF00;
const COIL_OFF: u16 = 0x0000;

/// The two 16-bit fields a write reply echoes back.
///
/// For single writes these are the address and the value, for multiple
/// writes the start address and the quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Echo {
    /// First echoed field.
    pub address: u16,
    /// Second echoed field.
    pub value: u16,
}

impl Echo {
    fn from_frame_payload(payload: &[u8]) -> Option<Self> {
        if payload.len() < 4 {
            return None;
        }
        Some(Self {
            address: u16::from_be_bytes([payload[0], payload[1]]),
            value: u16::from_be_bytes([payload[2], payload[3]]),
        })
    }
}

fn check_count(count: u16, max: u16) -> RtuResult<()> {
    if count == 0 || count > max {
        return Err(OperationError::InvalidCount { count, max }.into());
    }
    Ok(())
}

impl RtuClient {
    // =========================================================================
    // Reads
    // =========================================================================

    /// Reads holding registers (FC03), falling back to input registers
    /// (FC04) when the device does not answer FC03 usefully.
    ///
    /// Link failures (port closed, busy, I/O) are returned without fallback.
    pub async fn read_holding_registers(&self, start: u16, count: u16) -> RtuResult<RegisterBlock> {
        check_count(count, MAX_READ_REGISTERS)?;

        match self
            .read_register_block(FunctionCode::ReadHoldingRegisters, start, count)
            .await
        {
            Ok(block) if !block.is_empty() => return Ok(block),
            Ok(_) => {
                tracing::debug!(start, count, "FC03 returned nothing, trying FC04");
            }
            Err(RtuError::Protocol(e)) => {
                tracing::debug!(start, count, error = %e, "FC03 failed, trying FC04");
            }
            Err(e) => return Err(e),
        }

        self.read_register_block(FunctionCode::ReadInputRegisters, start, count)
            .await
    }

    /// Reads input registers (FC04) without fallback.
    pub async fn read_input_registers(&self, start: u16, count: u16) -> RtuResult<RegisterBlock> {
        check_count(count, MAX_READ_REGISTERS)?;
        self.read_register_block(FunctionCode::ReadInputRegisters, start, count)
            .await
    }

    /// Reads registers; same as [`read_holding_registers`](Self::read_holding_registers).
    pub async fn read_registers(&self, start: u16, count: u16) -> RtuResult<RegisterBlock> {
        self.read_holding_registers(start, count).await
    }

    /// Reads coils (FC01). A CRC failure yields an empty block.
    pub async fn read_coils(&self, start: u16, count: u16) -> RtuResult<CoilBlock> {
        check_count(count, MAX_READ_COILS)?;

        let request =
            TransactionRequest::read(self.address(), FunctionCode::ReadCoils, start, count);
        match self.transact(&request, OperationClass::Read).await? {
            TransactionResult::Ok(frame) => {
                let data = frame.payload().get(1..).unwrap_or_default();
                Ok(CoilBlock::new(start, unpack_coils(data, count as usize)))
            }
            TransactionResult::CrcMismatch { .. } => {
                tracing::warn!(start, count, "CRC error on coil read, returning no values");
                Ok(CoilBlock::new(start, Vec::new()))
            }
            other => other.into_result(request.function()).map(|_| CoilBlock::new(start, Vec::new())),
        }
    }

    async fn read_register_block(
        &self,
        function: FunctionCode,
        start: u16,
        count: u16,
    ) -> RtuResult<RegisterBlock> {
        let request = TransactionRequest::read(self.address(), function, start, count);
        let values = match self.transact(&request, OperationClass::Read).await? {
            TransactionResult::Ok(frame) => {
                // Byte count, then big-endian pairs.
                let data = frame.payload().get(1..).unwrap_or_default();
                data.chunks_exact(2)
                    .take(count as usize)
                    .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                    .collect()
            }
            TransactionResult::UnexpectedFunction { code, frame }
                if code == FunctionCode::Identify.code() =>
            {
                tracing::debug!(
                    function = function.code(),
                    start,
                    "Identification frame in reply to register read, extracting values"
                );
                frame.words_from(IDENTIFY_REGISTER_OFFSET, count as usize)
            }
            TransactionResult::CrcMismatch { expected, actual } => {
                tracing::warn!(
                    function = function.code(),
                    start,
                    count,
                    expected,
                    actual,
                    "CRC error on register read, returning no values"
                );
                Vec::new()
            }
            other => {
                other.into_result(request.function())?;
                Vec::new()
            }
        };
        Ok(RegisterBlock::new(start, values))
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Writes holding registers (FC16).
    pub async fn write_holding_registers(&self, start: u16, values: &[u16]) -> RtuResult<()> {
        if values.is_empty() {
            return Err(OperationError::EmptyWrite { address: start }.into());
        }
        let count = u16::try_from(values.len()).unwrap_or(u16::MAX);
        check_count(count, MAX_WRITE_REGISTERS)?;

        let data: Vec<u8> = values.iter().flat_map(|v| v.to_be_bytes()).collect();
        let request = TransactionRequest::write_multiple(
            self.address(),
            FunctionCode::WriteMultipleRegisters,
            start,
            count,
            &data,
        );
        self.validated_write(
            &request,
            OperationClass::MultiWrite,
            Echo {
                address: start,
                value: count,
            },
        )
        .await
        .with_register(start)
    }

    /// Writes registers; same as [`write_holding_registers`](Self::write_holding_registers).
    pub async fn write_registers(&self, start: u16, values: &[u16]) -> RtuResult<()> {
        self.write_holding_registers(start, values).await
    }

    /// Writes one holding register (FC06).
    pub async fn write_single_register(&self, address: u16, value: u16) -> RtuResult<()> {
        let request = TransactionRequest::write_single(
            self.address(),
            FunctionCode::WriteSingleRegister,
            address,
            value,
        );
        self.validated_write(&request, OperationClass::SingleWrite, Echo { address, value })
            .await
            .with_register(address)
    }

    /// Writes one coil (FC05).
    pub async fn write_single_coil(&self, address: u16, on: bool) -> RtuResult<()> {
        let value = if on { COIL_ON } else { COIL_OFF };
        let request = TransactionRequest::write_single(
            self.address(),
            FunctionCode::WriteSingleCoil,
            address,
            value,
        );
        self.validated_write(&request, OperationClass::SingleWrite, Echo { address, value })
            .await
    }

    /// Writes consecutive coils (FC0F), packed LSB-first.
    pub async fn write_multiple_coils(&self, start: u16, values: &[bool]) -> RtuResult<()> {
        if values.is_empty() {
            return Err(OperationError::EmptyWrite { address: start }.into());
        }
        let count = u16::try_from(values.len()).unwrap_or(u16::MAX);
        check_count(count, MAX_WRITE_COILS)?;

        let request = TransactionRequest::write_multiple(
            self.address(),
            FunctionCode::WriteMultipleCoils,
            start,
            count,
            &pack_coils(values),
        );
        self.validated_write(
            &request,
            OperationClass::MultiWrite,
            Echo {
                address: start,
                value: count,
            },
        )
        .await
    }

    /// The one write path.
    ///
    /// Requires an echo of at least [`MIN_WRITE_ECHO_LEN`] bytes with a valid
    /// CRC, the right address and the right function. A reply that echoes
    /// different fields is still accepted and reported with
    /// `echo_mismatch = true`.
    async fn validated_write(
        &self,
        request: &TransactionRequest,
        class: OperationClass,
        expected: Echo,
    ) -> RtuResult<()> {
        let frame = self
            .transact(request, class)
            .await?
            .require_len(MIN_WRITE_ECHO_LEN)
            .into_result(request.function())
            .context("validated write")?;

        match Echo::from_frame_payload(frame.payload()) {
            Some(actual) if actual == expected => {}
            actual => {
                tracing::warn!(
                    echo_mismatch = true,
                    function = request.function(),
                    expected_address = expected.address,
                    expected_value = expected.value,
                    actual_address = actual.map(|e| e.address),
                    actual_value = actual.map(|e| e.value),
                    "Write echo differs from request; treating write as applied"
                );
            }
        }

        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::client::{BoxedLink, LinkOpener, SerialLink};
    use crate::codec;
    use crate::error::{LinkError, ProtocolError};
    use crate::types::{Framing, RtuConfig, TimingConfig};

    type Responder = Arc<dyn Fn(&[u8]) -> Vec<u8> + Send + Sync>;

    struct FnLink {
        respond: Responder,
        pending: Vec<u8>,
        requests: Arc<parking_lot::Mutex<Vec<Vec<u8>>>>,
    }

    #[async_trait]
    impl SerialLink for FnLink {
        async fn write_frame(&mut self, frame: &[u8]) -> RtuResult<()> {
            self.requests.lock().push(frame.to_vec());
            self.pending = (self.respond)(frame);
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
            Ok(std::mem::take(&mut self.pending))
        }

        fn port(&self) -> &str {
            "fn"
        }

        fn baud_rate(&self) -> u32 {
            9600
        }
    }

    struct FnOpener {
        respond: Responder,
        requests: Arc<parking_lot::Mutex<Vec<Vec<u8>>>>,
    }

    #[async_trait]
    impl LinkOpener for FnOpener {
        async fn open(&self, _port: &str, _baud: u32, _framing: Framing) -> RtuResult<BoxedLink> {
            Ok(Box::new(FnLink {
                respond: Arc::clone(&self.respond),
                pending: Vec::new(),
                requests: Arc::clone(&self.requests),
            }))
        }
    }

    async fn connected(
        respond: impl Fn(&[u8]) -> Vec<u8> + Send + Sync + 'static,
    ) -> (RtuClient, Arc<parking_lot::Mutex<Vec<Vec<u8>>>>) {
        let requests = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let opener = FnOpener {
            respond: Arc::new(respond),
            requests: Arc::clone(&requests),
        };
        let config = RtuConfig::builder()
            .port("fn")
            .timing(TimingConfig::immediate())
            .build()
            .unwrap();
        let client = RtuClient::new(config, Arc::new(opener));
        client.connect().await.unwrap();
        (client, requests)
    }

    #[tokio::test]
    async fn test_fc03_success() {
        let (client, requests) = connected(|req| {
            codec::encode(req[0], 0x03, &[0x04, 0x00, 0x10, 0x00, 0x20])
        })
        .await;

        let block = client.read_holding_registers(1, 2).await.unwrap();
        assert_eq!(block.values, vec![0x10, 0x20]);
        assert_eq!(requests.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_falls_back_to_fc04() {
        let (client, requests) = connected(|req| match req[1] {
            0x04 => codec::encode(req[0], 0x04, &[0x02, 0x00, 0x07]),
            _ => Vec::new(),
        })
        .await;

        let block = client.read_holding_registers(3, 1).await.unwrap();
        assert_eq!(block.values, vec![7]);

        let sent: Vec<u8> = requests.lock().iter().map(|r| r[1]).collect();
        assert_eq!(sent, vec![0x03, 0x04]);
    }

    #[tokio::test]
    async fn test_identification_reply_reinterpreted() {
        let (client, _) = connected(|req| {
            codec::encode(
                req[0],
                0x11,
                &[0x0F, 0xFF, 0x99, 0x87, 0x41, 0x77, 0x00, 0x05, 0x00, 0x06, 0x00, 0x07],
            )
        })
        .await;

        let block = client.read_holding_registers(1, 2).await.unwrap();
        assert_eq!(block.values, vec![5, 6]);
    }

    #[tokio::test]
    async fn test_crc_error_degrades_to_empty() {
        let (client, _) = connected(|req| {
            let mut reply = codec::encode(req[0], req[1], &[0x02, 0x00, 0x07]);
            reply[3] ^= 0xFF;
            reply
        })
        .await;

        let block = client.read_holding_registers(1, 1).await.unwrap();
        assert!(block.is_empty());
        assert_eq!(client.stats().crc_errors(), 2);
    }

    #[tokio::test]
    async fn test_read_count_validated() {
        let (client, requests) = connected(|_| Vec::new()).await;
        assert!(matches!(
            client.read_holding_registers(0, 0).await,
            Err(RtuError::Operation(OperationError::InvalidCount { .. }))
        ));
        assert!(matches!(
            client.read_holding_registers(0, 126).await,
            Err(RtuError::Operation(OperationError::InvalidCount { .. }))
        ));
        assert!(requests.lock().is_empty());
    }

    #[tokio::test]
    async fn test_write_echo_accepted() {
        let (client, requests) =
            connected(|req| codec::encode(req[0], 0x10, &[0x00, 0x01, 0x00, 0x02])).await;

        client.write_holding_registers(1, &[8, 16]).await.unwrap();
        let sent = requests.lock()[0].clone();
        assert_eq!(&sent[..7], &[0x01, 0x10, 0x00, 0x01, 0x00, 0x02, 0x04]);
    }

    #[tokio::test]
    async fn test_write_echo_mismatch_is_tolerated() {
        let (client, _) =
            connected(|req| codec::encode(req[0], 0x10, &[0x00, 0x09, 0x00, 0x01])).await;
        assert!(client.write_holding_registers(1, &[8, 16]).await.is_ok());
    }

    #[tokio::test]
    async fn test_write_exception_fails() {
        let (client, _) = connected(|req| codec::encode(req[0], 0x90, &[0x02])).await;

        let err = client.write_holding_registers(500, &[1]).await.unwrap_err();
        match err {
            RtuError::Protocol(ProtocolError::ExceptionResponse {
                exception_code,
                exception_name,
                ..
            }) => {
                assert_eq!(exception_code, 2);
                assert_eq!(exception_name, "Illegal Data Address");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_write_crc_error_fails() {
        let (client, _) = connected(|req| {
            let mut reply = codec::encode(req[0], 0x06, &[0x00, 0x03, 0x00, 0x06]);
            reply[7] ^= 0x01;
            reply
        })
        .await;

        let err = client.write_single_register(3, 6).await.unwrap_err();
        assert!(matches!(
            err,
            RtuError::Protocol(ProtocolError::CrcMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_write_short_echo_fails() {
        let (client, _) = connected(|req| codec::encode(req[0], 0x06, &[0x00])).await;
        let err = client.write_single_register(3, 6).await.unwrap_err();
        assert!(matches!(
            err,
            RtuError::Protocol(ProtocolError::ShortResponse { len: 5 })
        ));
    }

    #[tokio::test]
    async fn test_empty_write_rejected() {
        let (client, _) = connected(|_| Vec::new()).await;
        assert!(matches!(
            client.write_holding_registers(0, &[]).await,
            Err(RtuError::Operation(OperationError::EmptyWrite { address: 0 }))
        ));
        assert!(matches!(
            client.write_multiple_coils(0, &[]).await,
            Err(RtuError::Operation(OperationError::EmptyWrite { .. }))
        ));
    }

    #[tokio::test]
    async fn test_single_coil_encoding() {
        let (client, requests) = connected(|req| {
            codec::encode(req[0], 0x05, &req[2..6])
        })
        .await;

        client.write_single_coil(32, true).await.unwrap();
        client.write_single_coil(32, false).await.unwrap();

        let sent = requests.lock().clone();
        assert_eq!(&sent[0][2..6], &[0x00, 0x20, 0xFF, 0x00]);
        assert_eq!(&sent[1][2..6], &[0x00, 0x20, 0x00, 0x00]);
    }

    #[tokio::test]
    async fn test_busy_link_is_rejected() {
        let (client, _) = connected(|_| Vec::new()).await;
        let _held = client.link.try_lock().unwrap();
        let err = client.read_coils(0, 1).await.unwrap_err();
        assert!(matches!(err, RtuError::Link(LinkError::Busy)));
    }
}
