//! Manufacturing test frames
//!
//! A frame is 12 bytes: length (always 11), command id, action, status,
//! then up to 8 payload bytes. The RCP answers in place and reports how
//! many bytes of the frame are meaningful.

use crate::error::{CliError, Result};

pub const FRAME_LEN: usize = 12;

pub const ACTION_GET: u8 = 0;
pub const ACTION_SET: u8 = 1;

const STATUS_OFFSET: usize = 3;
const PAYLOAD_OFFSET: usize = 4;

pub const CMD_GET_CHANNEL: u8 = 11;
pub const CMD_SET_CHANNEL: u8 = 12;
pub const CMD_GET_TX_POWER: u8 = 15;
pub const CMD_SET_TX_POWER: u8 = 16;
pub const CMD_CONTINUOUS_TX: u8 = 17;
pub const CMD_GET_PAYLOAD_SIZE: u8 = 20;
pub const CMD_SET_PAYLOAD_SIZE: u8 = 21;
pub const CMD_GET_RX_RESULT: u8 = 31;
pub const CMD_START_RX_TEST: u8 = 32;
pub const CMD_BURST_TX: u8 = 33;
pub const CMD_DUTY_CYCLE_TX: u8 = 35;
pub const CMD_GET_CCA_THRESHOLD: u8 = 47;
pub const CMD_SET_CCA_THRESHOLD: u8 = 48;
pub const CMD_CONTINUOUS_CCA_TEST: u8 = 49;
pub const CMD_GET_CCA_STATUS: u8 = 50;
pub const CMD_CONTINUOUS_ED_TEST: u8 = 55;
pub const CMD_GET_ED_VALUE: u8 = 56;
pub const CMD_PSDU_TX_TEST: u8 = 57;
pub const CMD_RX_TX_ACK_TEST: u8 = 58;
pub const CMD_SET_GENERIC_PARAM: u8 = 59;

/// Minimum response lengths
const GET_MIN_LEN: usize = 5;
const SET_MIN_LEN: usize = 4;
const RX_RESULT_MIN_LEN: usize = 11;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MfgFrame {
    bytes: [u8; FRAME_LEN],
}

impl MfgFrame {
    pub fn new(cmd: u8, action: u8) -> Self {
        let mut bytes = [0u8; FRAME_LEN];
        bytes[0] = (FRAME_LEN - 1) as u8;
        bytes[1] = cmd;
        bytes[2] = action;
        Self { bytes }
    }

    pub fn get(cmd: u8) -> Self {
        Self::new(cmd, ACTION_GET)
    }

    pub fn set(cmd: u8) -> Self {
        Self::new(cmd, ACTION_SET)
    }

    /// A frame taken verbatim from the caller
    pub fn raw(bytes: [u8; FRAME_LEN]) -> Self {
        Self { bytes }
    }

    /// Place `data` at the start of the payload area
    pub fn with_payload(mut self, data: &[u8]) -> Self {
        let n = data.len().min(FRAME_LEN - PAYLOAD_OFFSET);
        self.bytes[PAYLOAD_OFFSET..PAYLOAD_OFFSET + n].copy_from_slice(&data[..n]);
        self
    }

    pub fn cmd(&self) -> u8 {
        self.bytes[1]
    }

    pub fn bytes(&self) -> &[u8; FRAME_LEN] {
        &self.bytes
    }

    pub fn bytes_mut(&mut self) -> &mut [u8; FRAME_LEN] {
        &mut self.bytes
    }
}

/// RCP answer to an [`MfgFrame`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MfgResponse {
    bytes: [u8; FRAME_LEN],
    len: usize,
}

impl MfgResponse {
    pub fn new(frame: MfgFrame, len: usize) -> Self {
        Self {
            bytes: frame.bytes,
            len: len.min(FRAME_LEN),
        }
    }

    pub fn status(&self) -> u8 {
        self.bytes[STATUS_OFFSET]
    }

    /// Meaningful bytes of the response
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    /// First payload byte of a successful get
    pub fn get_value(&self) -> Result<u8> {
        if self.len >= GET_MIN_LEN && self.status() == 0 {
            Ok(self.bytes[PAYLOAD_OFFSET])
        } else {
            Err(CliError::Failed)
        }
    }

    pub fn check_set(&self) -> Result<()> {
        if self.len >= SET_MIN_LEN && self.status() == 0 {
            Ok(())
        } else {
            Err(CliError::Failed)
        }
    }

    /// Set commands that also return a payload byte
    pub fn check_set_with_payload(&self) -> Result<()> {
        self.get_value().map(|_| ())
    }

    pub fn rx_result(&self) -> Result<RxResult> {
        if self.len < RX_RESULT_MIN_LEN {
            return Err(CliError::Failed);
        }
        let b = &self.bytes;
        Ok(RxResult {
            status: b[4],
            rx_count: u16::from_le_bytes([b[5], b[6]]),
            total_count: u16::from_le_bytes([b[7], b[8]]),
            rssi: b[9] as i8,
            lqi: b[10],
        })
    }
}

/// Counters reported by [`CMD_GET_RX_RESULT`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RxResult {
    pub status: u8,
    pub rx_count: u16,
    pub total_count: u16,
    pub rssi: i8,
    pub lqi: u8,
}
