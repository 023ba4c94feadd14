//! nusb-based EEPROM access through the MS2109 bridge's HID interface.
//!
//! The bridge exposes its EEPROM through 9-byte HID feature reports:
//!
//! ```text
//! [0]    report id (0)
//! [1]    command (0xE6 write, 0xE5 read)
//! [2..4] EEPROM address (u16 BE)
//! [4..8] data
//! [8]    reserved
//! ```
//!
//! Writes carry a single data byte per report; reads return four.

use std::time::Duration;

use byteorder::{BigEndian, ByteOrder};
use nusb::transfer::{ControlIn, ControlOut, ControlType, Recipient};
use nusb::{Interface, MaybeFuture, list_devices};
use tracing::{debug, info, instrument};

use super::traits::{DeviceError, EepromDevice};

/// Known (VID, PID) pairs of the bridge.
pub const SUPPORTED_IDS: &[(u16, u16)] = &[(0x534D, 0x2109), (0x345F, 0x2109)];

const HID_INTERFACE: u8 = 4;
const REPORT_LEN: usize = 9;
const CMD_EEPROM_READ: u8 = 0xE5;
const CMD_EEPROM_WRITE: u8 = 0xE6;
const WRITE_BYTES_PER_REPORT: usize = 1;
const READ_BYTES_PER_REPORT: usize = 4;

const HID_GET_REPORT: u8 = 0x01;
const HID_SET_REPORT: u8 = 0x09;
const FEATURE_REPORT: u16 = 0x0300;

const CONTROL_TIMEOUT: Duration = Duration::from_millis(1000);

/// HID feature-report EEPROM access.
pub struct HidEeprom {
    interface: Interface,
    vid: u16,
    pid: u16,
}

impl HidEeprom {
    /// Open the first attached bridge.
    #[instrument(level = "info")]
    pub fn open() -> Result<Self, DeviceError> {
        let device_info = list_devices()
            .wait()
            .map_err(|e| DeviceError::OpenFailed(e.to_string()))?
            .find(|d| SUPPORTED_IDS.contains(&(d.vendor_id(), d.product_id())))
            .ok_or(DeviceError::NotFound {
                vid: SUPPORTED_IDS[0].0,
                pid: SUPPORTED_IDS[0].1,
            })?;

        let vid = device_info.vendor_id();
        let pid = device_info.product_id();
        info!(
            vendor_id = %format!("{:04X}", vid),
            product_id = %format!("{:04X}", pid),
            "Found KVM bridge"
        );

        let device = device_info
            .open()
            .wait()
            .map_err(|e| DeviceError::OpenFailed(e.to_string()))?;

        // The kernel HID driver owns the interface by default.
        let interface = device
            .detach_and_claim_interface(HID_INTERFACE)
            .wait()
            .map_err(|e| DeviceError::OpenFailed(e.to_string()))?;

        Ok(Self {
            interface,
            vid,
            pid,
        })
    }

    pub fn vendor_id(&self) -> u16 {
        self.vid
    }

    pub fn product_id(&self) -> u16 {
        self.pid
    }

    fn set_report(&self, report: &[u8; REPORT_LEN]) -> Result<(), DeviceError> {
        self.interface
            .control_out(
                ControlOut {
                    control_type: ControlType::Class,
                    recipient: Recipient::Interface,
                    request: HID_SET_REPORT,
                    value: FEATURE_REPORT,
                    index: HID_INTERFACE as u16,
                    data: report,
                },
                CONTROL_TIMEOUT,
            )
            .wait()
            .map_err(|e| DeviceError::Io(e.to_string()))
    }

    fn get_report(&self) -> Result<Vec<u8>, DeviceError> {
        self.interface
            .control_in(
                ControlIn {
                    control_type: ControlType::Class,
                    recipient: Recipient::Interface,
                    request: HID_GET_REPORT,
                    value: FEATURE_REPORT,
                    index: HID_INTERFACE as u16,
                    length: REPORT_LEN as u16,
                },
                CONTROL_TIMEOUT,
            )
            .wait()
            .map_err(|e| DeviceError::Io(e.to_string()))
    }
}

fn build_report(command: u8, address: u16, data: &[u8]) -> [u8; REPORT_LEN] {
    let mut report = [0u8; REPORT_LEN];
    report[1] = command;
    BigEndian::write_u16(&mut report[2..4], address);
    report[4..4 + data.len()].copy_from_slice(data);
    report
}

impl EepromDevice for HidEeprom {
    #[instrument(skip_all, fields(address = %format!("0x{:04X}", address), len = payload.len()))]
    fn write_eeprom(&self, address: u16, payload: &[u8]) -> Result<(), DeviceError> {
        for (i, bytes) in payload.chunks(WRITE_BYTES_PER_REPORT).enumerate() {
            let at = address.wrapping_add((i * WRITE_BYTES_PER_REPORT) as u16);
            self.set_report(&build_report(CMD_EEPROM_WRITE, at, bytes))
                .map_err(|e| {
                    debug!(error = %e, "SET_REPORT failed");
                    DeviceError::Rejected { address: at }
                })?;
        }
        Ok(())
    }

    fn read_eeprom(&self, address: u16, len: usize) -> Result<Vec<u8>, DeviceError> {
        let mut out = Vec::with_capacity(len);
        while out.len() < len {
            let at = address.wrapping_add(out.len() as u16);
            self.set_report(&build_report(CMD_EEPROM_READ, at, &[]))?;
            let report = self.get_report()?;
            if report.len() < 4 + READ_BYTES_PER_REPORT {
                return Err(DeviceError::Io(format!(
                    "short read report: {} bytes",
                    report.len()
                )));
            }
            let take = READ_BYTES_PER_REPORT.min(len - out.len());
            out.extend_from_slice(&report[4..4 + take]);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_write_report() {
        let report = build_report(CMD_EEPROM_WRITE, 0x12AB, &[0x5A]);
        assert_eq!(report, [0x00, 0xE6, 0x12, 0xAB, 0x5A, 0, 0, 0, 0]);
    }

    #[test]
    fn test_build_read_report() {
        let report = build_report(CMD_EEPROM_READ, 0x0004, &[]);
        assert_eq!(report, [0x00, 0xE5, 0x00, 0x04, 0, 0, 0, 0, 0]);
    }
}
