// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Reading and applying the controller's configuration registers.
//!
//! The device is slow to settle after a configuration write and restarts
//! on its new address when register 6 changes, so the order of writes is
//! fixed: channels, line speed, CAN parameters, and the Modbus address
//! last.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::client::{RetryConfig, RtuClient};
use crate::error::{ConfigurationError, OperationError, RtuError, RtuResult};
use crate::registers::{
    CanSpeed, ModbusSpeed, MAX_CAN_ADDRESS, MIN_CAN_ADDRESS, REG_CAN_PARAMS, REG_CHANNELS,
    REG_MODBUS_ADDRESS, REG_MODBUS_SPEED,
};
use crate::types::{DeviceAddress, RegisterBlock};

/// Pause between two configuration writes.
pub const SETTINGS_WRITE_GAP: Duration = Duration::from_millis(300);

/// Wait after the last configuration write.
pub const SETTINGS_APPLY_WAIT: Duration = Duration::from_millis(500);

/// Default read policy: three attempts one second apart.
pub fn default_read_retry() -> RetryConfig {
    RetryConfig::fixed(2, Duration::from_secs(1))
}

// =============================================================================
// DeviceSettings
// =============================================================================

/// Configuration registers of the controller.
///
/// Fields other than the channel counts are optional: a read may recover
/// only some groups, and a write skips groups that are not set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSettings {
    /// Coil count of channel 1.
    #[serde(default)]
    pub channel1_coils: u16,
    /// Coil count of channel 2.
    #[serde(default)]
    pub channel2_coils: u16,
    /// Modbus line speed.
    #[serde(default)]
    pub modbus_speed: Option<ModbusSpeed>,
    /// Modbus device address.
    #[serde(default)]
    pub modbus_address: Option<DeviceAddress>,
    /// CAN bus speed.
    #[serde(default)]
    pub can_speed: Option<CanSpeed>,
    /// CAN node address (1-127).
    #[serde(default)]
    pub can_address: Option<u16>,
    /// When the settings were read from the device.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_at: Option<DateTime<Utc>>,
}

impl DeviceSettings {
    /// Returns every violation found.
    pub fn validate(&self) -> Vec<ConfigurationError> {
        let mut errors = Vec::new();
        if let Some(address) = self.can_address {
            if !(MIN_CAN_ADDRESS..=MAX_CAN_ADDRESS).contains(&address) {
                errors.push(ConfigurationError::InvalidCanAddress { address });
            }
        }
        if self.can_speed.is_some() != self.can_address.is_some() {
            errors.push(ConfigurationError::missing_field(if self.can_speed.is_none() {
                "can_speed"
            } else {
                "can_address"
            }));
        }
        errors
    }

    /// Returns `true` if every group is present.
    pub fn is_complete(&self) -> bool {
        self.modbus_speed.is_some()
            && self.modbus_address.is_some()
            && self.can_speed.is_some()
            && self.can_address.is_some()
    }
}

// =============================================================================
// Reading
// =============================================================================

/// Groups recovered by one pass over the registers.
#[derive(Debug, Default)]
struct ReadPass {
    channels: Option<(u16, u16)>,
    modbus_speed: Option<ModbusSpeed>,
    modbus_address: Option<DeviceAddress>,
    can: Option<(CanSpeed, u16)>,
}

impl ReadPass {
    fn is_complete(&self) -> bool {
        self.channels.is_some()
            && self.modbus_speed.is_some()
            && self.modbus_address.is_some()
            && self.can.is_some()
    }

    fn is_empty(&self) -> bool {
        self.channels.is_none()
            && self.modbus_speed.is_none()
            && self.modbus_address.is_none()
            && self.can.is_none()
    }

    /// Keeps groups of `self` and adds those only `later` recovered;
    /// groups present in both take the later value.
    fn merge(&mut self, later: ReadPass) {
        self.channels = later.channels.or(self.channels);
        self.modbus_speed = later.modbus_speed.or(self.modbus_speed);
        self.modbus_address = later.modbus_address.or(self.modbus_address);
        self.can = later.can.or(self.can);
    }

    fn into_settings(self) -> DeviceSettings {
        let (channel1_coils, channel2_coils) = self.channels.unwrap_or((0, 0));
        DeviceSettings {
            channel1_coils,
            channel2_coils,
            modbus_speed: self.modbus_speed,
            modbus_address: self.modbus_address,
            can_speed: self.can.map(|(speed, _)| speed),
            can_address: self.can.map(|(_, address)| address),
            read_at: Some(Utc::now()),
        }
    }
}

/// Reads one register group. Protocol failures count as a missing group;
/// link failures abort.
async fn read_group(client: &RtuClient, start: u16, count: u16) -> RtuResult<Option<Vec<u16>>> {
    match client.read_holding_registers(start, count).await {
        Ok(RegisterBlock { values, .. }) if values.len() >= count as usize => Ok(Some(values)),
        Ok(block) => {
            tracing::debug!(start, count, got = block.len(), "Settings group incomplete");
            Ok(None)
        }
        Err(RtuError::Protocol(e)) => {
            tracing::debug!(start, count, error = %e, "Settings group unreadable");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

async fn read_pass(client: &RtuClient) -> RtuResult<ReadPass> {
    let mut pass = ReadPass::default();

    if let Some(v) = read_group(client, REG_CHANNELS, 2).await? {
        pass.channels = Some((v[0], v[1]));
    }

    if let Some(v) = read_group(client, REG_MODBUS_SPEED, 1).await? {
        pass.modbus_speed = ModbusSpeed::from_code(v[0]);
        if pass.modbus_speed.is_none() {
            tracing::warn!(code = v[0], "Unknown Modbus speed code");
        }
    }

    if let Some(v) = read_group(client, REG_MODBUS_ADDRESS, 1).await? {
        match DeviceAddress::from_register(v[0]) {
            Ok(address) => pass.modbus_address = Some(address),
            Err(e) => tracing::warn!(value = v[0], error = %e, "Device reports invalid address"),
        }
    }

    if let Some(v) = read_group(client, REG_CAN_PARAMS, 2).await? {
        let speed = CanSpeed::from_code(v[0]);
        let address_ok = (MIN_CAN_ADDRESS..=MAX_CAN_ADDRESS).contains(&v[1]);
        match speed {
            Some(speed) if address_ok => pass.can = Some((speed, v[1])),
            _ => tracing::warn!(speed_code = v[0], can_address = v[1], "Invalid CAN parameters"),
        }
    }

    Ok(pass)
}

/// Reads the device settings with the default policy of three attempts one
/// second apart.
pub async fn read_settings(client: &RtuClient) -> RtuResult<DeviceSettings> {
    read_settings_with(client, &default_read_retry()).await
}

/// Reads the device settings, repeating the full pass while any group is
/// missing or out of range.
///
/// After the last attempt whatever was recovered is returned, with missing
/// channel counts set to 0.
///
/// # Errors
///
/// `OperationError::SettingsIncomplete` if no group could be read at all,
/// or the link error that aborted a pass.
pub async fn read_settings_with(
    client: &RtuClient,
    retry: &RetryConfig,
) -> RtuResult<DeviceSettings> {
    let mut recovered = ReadPass::default();

    for attempt in 0..retry.attempts() {
        if attempt > 0 {
            tokio::time::sleep(retry.strategy.delay(attempt - 1)).await;
        }

        let pass = read_pass(client).await?;
        let complete = pass.is_complete();
        recovered.merge(pass);

        if complete {
            return Ok(recovered.into_settings());
        }

        tracing::debug!(
            attempt = attempt + 1,
            attempts = retry.attempts(),
            "Settings read incomplete"
        );
    }

    if recovered.is_empty() {
        return Err(OperationError::SettingsIncomplete.into());
    }

    tracing::warn!("Returning partial device settings");
    Ok(recovered.into_settings())
}

// =============================================================================
// Applying
// =============================================================================

/// Steps of [`apply_settings`], reported as they start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApplyStep {
    /// Writing the channel coil counts.
    Channels,
    /// Writing the Modbus line speed.
    ModbusSpeed,
    /// Writing the CAN parameters.
    CanParams,
    /// Writing the Modbus address.
    ModbusAddress,
    /// Waiting for the device to settle.
    Settling,
}

/// Result of [`apply_settings`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// `false` if the address write was not acknowledged. The device may
    /// already be listening on the new address.
    pub address_acknowledged: bool,
}

fn report(progress: Option<&mpsc::Sender<ApplyStep>>, step: ApplyStep) {
    if let Some(tx) = progress {
        let _ = tx.try_send(step);
    }
}

/// Writes `settings` to the device.
///
/// The client keeps talking to the old address and speed; reconfigure it
/// afterwards if either changed.
///
/// # Errors
///
/// The first validation error, or the first failed write before the
/// address write.
pub async fn apply_settings(
    client: &RtuClient,
    settings: &DeviceSettings,
    progress: Option<&mpsc::Sender<ApplyStep>>,
) -> RtuResult<ApplyOutcome> {
    if let Some(error) = settings.validate().into_iter().next() {
        return Err(error.into());
    }

    report(progress, ApplyStep::Channels);
    client
        .write_holding_registers(
            REG_CHANNELS,
            &[settings.channel1_coils, settings.channel2_coils],
        )
        .await?;

    if let Some(speed) = settings.modbus_speed {
        tokio::time::sleep(SETTINGS_WRITE_GAP).await;
        report(progress, ApplyStep::ModbusSpeed);
        client
            .write_holding_registers(REG_MODBUS_SPEED, &[speed.code()])
            .await?;
    }

    if let (Some(speed), Some(address)) = (settings.can_speed, settings.can_address) {
        tokio::time::sleep(SETTINGS_WRITE_GAP).await;
        report(progress, ApplyStep::CanParams);
        client
            .write_holding_registers(REG_CAN_PARAMS, &[speed.code(), address])
            .await?;
    }

    let mut address_acknowledged = true;
    if let Some(address) = settings.modbus_address {
        tokio::time::sleep(SETTINGS_WRITE_GAP).await;
        report(progress, ApplyStep::ModbusAddress);
        if let Err(e) = client
            .write_holding_registers(REG_MODBUS_ADDRESS, &[u16::from(address.get())])
            .await
        {
            tracing::warn!(
                address = address.get(),
                error = %e,
                "Address write not acknowledged; device may have restarted"
            );
            address_acknowledged = false;
        }
    }

    report(progress, ApplyStep::Settling);
    tokio::time::sleep(SETTINGS_APPLY_WAIT).await;

    tracing::info!(
        channel1 = settings.channel1_coils,
        channel2 = settings.channel2_coils,
        address_acknowledged,
        "Device settings applied"
    );

    Ok(ApplyOutcome {
        address_acknowledged,
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_collects_all() {
        let settings = DeviceSettings {
            can_address: Some(200),
            ..Default::default()
        };
        let errors = settings.validate();
        assert_eq!(errors.len(), 2);
        assert!(matches!(
            errors[0],
            ConfigurationError::InvalidCanAddress { address: 200 }
        ));
    }

    #[test]
    fn test_validate_ok() {
        let settings = DeviceSettings {
            channel1_coils: 16,
            channel2_coils: 16,
            modbus_speed: Some(ModbusSpeed::B9600),
            modbus_address: Some(DeviceAddress::new(3).unwrap()),
            can_speed: Some(CanSpeed::K1000),
            can_address: Some(1),
            read_at: None,
        };
        assert!(settings.validate().is_empty());
        assert!(settings.is_complete());
    }

    #[test]
    fn test_merge_keeps_earlier_groups() {
        let mut first = ReadPass {
            channels: Some((8, 8)),
            ..Default::default()
        };
        first.merge(ReadPass {
            modbus_speed: Some(ModbusSpeed::B115200),
            ..Default::default()
        });
        assert_eq!(first.channels, Some((8, 8)));
        assert_eq!(first.modbus_speed, Some(ModbusSpeed::B115200));
        assert!(!first.is_complete());
    }

    #[test]
    fn test_partial_defaults_channels() {
        let settings = ReadPass {
            modbus_address: Some(DeviceAddress::new(9).unwrap()),
            ..Default::default()
        }
        .into_settings();
        assert_eq!(settings.channel1_coils, 0);
        assert_eq!(settings.channel2_coils, 0);
        assert!(settings.read_at.is_some());
    }

    #[test]
    fn test_settings_serde() {
        let settings = DeviceSettings {
            modbus_speed: Some(ModbusSpeed::B38400),
            can_speed: Some(CanSpeed::K125),
            can_address: Some(5),
            ..Default::default()
        };
        let json = serde_json::to_string(&settings).unwrap();
        assert!(json.contains("\"modbus_speed\":38400"));
        assert!(json.contains("\"can_speed\":\"125K\""));
        let back: DeviceSettings = serde_json::from_str(&json).unwrap();
        assert_eq!(back, settings);
    }
}
