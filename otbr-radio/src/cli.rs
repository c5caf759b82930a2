//! `radio` command dispatcher
//!
//! Each subcommand receives the remaining arguments and writes its output
//! to the console buffer. Manufacturing commands are refused until enabled
//! with `mfgcmd 1`.

use std::fmt::Write;
use std::ops::RangeInclusive;

use tracing::{debug, info, warn};

use crate::args;
use crate::config::RadioConfig;
use crate::error::{CliError, Result};
use crate::mfg::*;
use crate::transport::{
    CMD_MFG, CcaConfig, PROP_CCA_CONFIG, PROP_FW_VERSION, PROP_SET_EUI64, PROP_TX_POWER_LIMIT, RadioTransport,
};

/// Subcommands in dispatch order
pub const COMMANDS: &[&str] = &["ircmd", "seteui64", "txpwrlimit", "mfgcmd", "ccacfg", "fwversion"];

const CCACFG_USAGE: &str = "\
CCA configuration FAILED! Invalid input arg
Format: ccacfg <CcaMode> <Cca1Threshold> <Cca2CorrThreshold> <Cca2MinNumOfCorrTh>
CcaMode: CCA Mode type [CCA1=1, CCA2=2, CCA3=3[CCA1 AND CCA2], CCA3=4[CCA1 OR CCA2], NoCCA=0xFF]
Cca1Threshold[1Byte Hex value]: Energy threshold for CCA Mode1
Cca2CorrThreshold[1Byte Hex value]: CCA Mode 2 Correlation Threshold
Cca2MinNumOfCorrTh: [0 to 6]";

type Handler<T> = fn(&mut RadioCli<T>, &[&str], &mut String) -> Result<()>;

pub struct RadioCli<T: RadioTransport> {
    transport: T,
    config: RadioConfig,
    mfg_enabled: bool,
}

impl<T: RadioTransport> RadioCli<T> {
    pub fn new(transport: T, config: RadioConfig) -> Self {
        let mfg_enabled = config.mfg_enabled;
        Self {
            transport,
            config,
            mfg_enabled,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn mfg_enabled(&self) -> bool {
        self.mfg_enabled
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Run `radio <subcommand> [args...]`; `args[0]` is the subcommand
    pub fn process(&mut self, args: &[&str], out: &mut String) -> Result<()> {
        let (name, rest) = args.split_first().ok_or(CliError::InvalidArgs)?;
        let handler: Handler<T> = match *name {
            "ircmd" => Self::ircmd,
            "seteui64" => Self::set_eui64,
            "txpwrlimit" => Self::tx_power_limit,
            "mfgcmd" => Self::mfg_command,
            "ccacfg" => Self::cca_config,
            "fwversion" => Self::fw_version,
            _ => {
                debug!(command = *name, "Unknown radio command");
                return Err(CliError::InvalidArgs);
            }
        };
        handler(self, rest, out)
    }

    fn ircmd(&mut self, _args: &[&str], _out: &mut String) -> Result<()> {
        info!("Independent reset of the RCP");
        self.transport.reset_rcp()?;
        Ok(())
    }

    fn set_eui64(&mut self, args: &[&str], _out: &mut String) -> Result<()> {
        let [hex] = args else {
            return Err(CliError::InvalidArgs);
        };
        let eui64 = args::eui64(hex)?;
        info!(eui64 = %format_args!("{eui64:016x}"), "Setting EUI-64");
        self.transport.set_prop_u64(PROP_SET_EUI64, eui64)?;
        Ok(())
    }

    fn tx_power_limit(&mut self, args: &[&str], out: &mut String) -> Result<()> {
        match args {
            [value] => {
                let limit: u8 = args::dec(value)?;
                if !(1..=self.config.tx_power_limit_max).contains(&limit) {
                    info!(limit, max = self.config.tx_power_limit_max, "TX power limit out of range");
                    return Err(CliError::InvalidArgs);
                }
                info!(limit, "Set TX power limit");
                self.transport.set_prop_u8(PROP_TX_POWER_LIMIT, limit)?;
            }
            [] => {
                let limit = self.transport.get_prop_u8(PROP_TX_POWER_LIMIT)?;
                debug!(limit, "Get TX power limit");
                writeln!(out, "{limit}")?;
            }
            _ => return Err(CliError::InvalidArgs),
        }
        Ok(())
    }

    fn mfg_command(&mut self, args: &[&str], out: &mut String) -> Result<()> {
        if let [toggle] = args
            && let Ok(enable @ 0..=1) = args::dec::<u8>(toggle)
        {
            self.mfg_enabled = enable == 1;
            info!(enabled = self.mfg_enabled, "Manufacturing commands toggled");
            return Ok(());
        }

        if !self.mfg_enabled {
            info!("Manufacturing commands not enabled");
            writeln!(out, "MFG command not enabled. to enable it : radio mfgcmd 1")?;
            return Err(CliError::Failed);
        }

        match self.run_mfg(args, out) {
            Ok(()) => {
                info!("MFG command succeeded");
                Ok(())
            }
            Err(e) if args.len() == FRAME_LEN => match raw_frame(args) {
                // a full frame on the command line goes to the RCP as is
                Some(frame) => self.send_raw(frame, out),
                None => Err(e),
            },
            Err(e) => {
                match e {
                    CliError::InvalidArgs => info!("MFG command invalid parameter"),
                    CliError::NotImplemented => info!("MFG command not implemented"),
                    _ => warn!(error = %e, "MFG command failed"),
                }
                Err(e)
            }
        }
    }

    fn run_mfg(&mut self, args: &[&str], out: &mut String) -> Result<()> {
        let Some(first) = args.first() else {
            return Err(CliError::InvalidArgs);
        };
        let cmd: u8 = args::dec(first)?;

        match cmd {
            CMD_GET_CHANNEL => self.mfg_get(CMD_GET_CHANNEL, args, out),
            CMD_SET_CHANNEL => self.mfg_set(CMD_GET_CHANNEL, args, 11..=26),
            CMD_GET_TX_POWER => self.mfg_get(CMD_GET_TX_POWER, args, out),
            CMD_SET_TX_POWER => self.mfg_set(CMD_GET_TX_POWER, args, -20..=22),
            CMD_CONTINUOUS_TX => self.mfg_set(CMD_CONTINUOUS_TX, args, 0..=1),
            CMD_GET_PAYLOAD_SIZE => self.mfg_get(CMD_GET_PAYLOAD_SIZE, args, out),
            CMD_SET_PAYLOAD_SIZE => self.mfg_set(CMD_GET_PAYLOAD_SIZE, args, 0..=127),
            CMD_GET_RX_RESULT => self.mfg_rx_result(args, out),
            CMD_START_RX_TEST => {
                expect_args(args, 1)?;
                self.exchange(MfgFrame::get(CMD_START_RX_TEST))?;
                Ok(())
            }
            CMD_BURST_TX => {
                expect_args(args, 3)?;
                let mode = args::dec_in::<u8>(args[1], 0..=7)?;
                let gap = args::dec::<u8>(args[2])?;
                self.exchange(MfgFrame::get(CMD_BURST_TX).with_payload(&[mode, gap]))?;
                Ok(())
            }
            CMD_DUTY_CYCLE_TX => self.mfg_set(CMD_DUTY_CYCLE_TX, args, 0..=1),
            CMD_GET_CCA_THRESHOLD => self.mfg_get(CMD_GET_CCA_THRESHOLD, args, out),
            CMD_SET_CCA_THRESHOLD => self.mfg_set(CMD_GET_CCA_THRESHOLD, args, -110..=0),
            CMD_CONTINUOUS_CCA_TEST => {
                expect_args(args, 3)?;
                let enable = args::dec::<u8>(args[1])?;
                let mode = args::dec::<u8>(args[2])?;
                self.exchange(MfgFrame::set(CMD_CONTINUOUS_CCA_TEST).with_payload(&[enable, mode]))?
                    .check_set()
            }
            CMD_GET_CCA_STATUS => self.mfg_get(CMD_GET_CCA_STATUS, args, out),
            CMD_CONTINUOUS_ED_TEST => self.mfg_set(CMD_CONTINUOUS_ED_TEST, args, -127..=127),
            CMD_GET_ED_VALUE => self.mfg_get(CMD_GET_ED_VALUE, args, out),
            CMD_PSDU_TX_TEST => {
                expect_args(args, 4)?;
                let count = args::dec::<u8>(args[1])?;
                let gap = args::dec::<u8>(args[2])?;
                let ack = args::dec::<u8>(args[3])?;
                if count >= 8 || gap <= 5 || ack >= 2 {
                    return Err(CliError::Failed);
                }
                self.exchange(MfgFrame::set(CMD_PSDU_TX_TEST).with_payload(&[count, gap, ack]))?
                    .check_set_with_payload()
            }
            CMD_RX_TX_ACK_TEST => self.mfg_set(CMD_RX_TX_ACK_TEST, args, 0..=1),
            CMD_SET_GENERIC_PARAM => {
                expect_args(args, 5)?;
                let seq = args::dec::<u8>(args[1])?;
                let pan_id = args::hex_u16(args[2])?.to_le_bytes();
                let dst = args::hex_u16(args[3])?.to_le_bytes();
                let src = args::hex_u16(args[4])?.to_le_bytes();
                let payload = [seq, pan_id[0], pan_id[1], dst[0], dst[1], src[0], src[1]];
                self.exchange(MfgFrame::set(CMD_SET_GENERIC_PARAM).with_payload(&payload))?
                    .check_set_with_payload()
            }
            _ => Err(CliError::NotImplemented),
        }
    }

    fn exchange(&mut self, mut frame: MfgFrame) -> Result<MfgResponse> {
        let len = self.transport.mfg_command(CMD_MFG, frame.bytes_mut())?;
        debug!(cmd = frame.cmd(), len, "MFG frame exchanged");
        Ok(MfgResponse::new(frame, len))
    }

    fn mfg_get(&mut self, cmd: u8, args: &[&str], out: &mut String) -> Result<()> {
        expect_args(args, 1)?;
        let mut value = self.exchange(MfgFrame::get(cmd))?.get_value()? as i8;
        if cmd == CMD_GET_TX_POWER && self.config.tx_power_half_dbm {
            value /= 2;
        }
        writeln!(out, "{value}")?;
        Ok(())
    }

    fn mfg_set(&mut self, cmd: u8, args: &[&str], range: RangeInclusive<i8>) -> Result<()> {
        expect_args(args, 2)?;
        let value = args::dec_in::<i8>(args[1], range)?;
        let byte = if cmd == CMD_GET_TX_POWER && self.config.tx_power_half_dbm {
            (value as u8) << 1
        } else {
            value as u8
        };
        self.exchange(MfgFrame::set(cmd).with_payload(&[byte]))?.check_set()
    }

    fn mfg_rx_result(&mut self, args: &[&str], out: &mut String) -> Result<()> {
        expect_args(args, 1)?;
        let result = self.exchange(MfgFrame::get(CMD_GET_RX_RESULT))?.rx_result()?;
        writeln!(out, "status : {}", result.status)?;
        writeln!(out, "rx_pkt_count : {}", result.rx_count)?;
        writeln!(out, "total_pkt_count : {}", result.total_count)?;
        writeln!(out, "rssi : {}", result.rssi)?;
        writeln!(out, "lqi : {}", result.lqi)?;
        Ok(())
    }

    fn send_raw(&mut self, frame: MfgFrame, out: &mut String) -> Result<()> {
        let response = self.exchange(frame)?;
        for b in response.as_bytes() {
            write!(out, "{b} ")?;
        }
        writeln!(out)?;
        info!("Raw MFG frame sent");
        Ok(())
    }

    fn cca_config(&mut self, args: &[&str], out: &mut String) -> Result<()> {
        match args {
            [mode, cca1, cca2_corr, cca2_min] => {
                let config = CcaConfig {
                    mode: args::hex_u8(mode)?,
                    cca1_threshold: args::hex_u8(cca1)?,
                    cca2_corr_threshold: args::hex_u8(cca2_corr)?,
                    cca2_min_corr: args::hex_u8(cca2_min)?,
                };
                if !config.is_valid() {
                    return Err(CliError::InvalidArgs);
                }
                self.transport.set_cca_config(PROP_CCA_CONFIG, &config)?;
                Ok(())
            }
            [] => {
                let config = self.transport.get_cca_config(PROP_CCA_CONFIG)?;
                writeln!(out, "CCA Configuration:")?;
                writeln!(
                    out,
                    "CCA Mode type [CCA1=1, CCA2=2, CCA3=3[CCA1 AND CCA2], CCA3=4[CCA1 OR CCA2], NoCCA=0xFF], : {:#x}",
                    config.mode
                )?;
                writeln!(out, "CCA1 Threshold Value : {:#x}", config.cca1_threshold)?;
                writeln!(out, "CCA2 Correlation Threshold Value : {:#x}", config.cca2_corr_threshold)?;
                writeln!(
                    out,
                    "CCA2 Minimim Number of Correlation Threshold Value : {:#x}",
                    config.cca2_min_corr
                )?;
                Ok(())
            }
            _ => {
                writeln!(out, "{CCACFG_USAGE}")?;
                Err(CliError::InvalidArgs)
            }
        }
    }

    fn fw_version(&mut self, args: &[&str], out: &mut String) -> Result<()> {
        if !args.is_empty() {
            return Err(CliError::InvalidArgs);
        }
        let version = self
            .transport
            .get_prop_string(PROP_FW_VERSION, self.config.max_version_len)?;
        writeln!(out, "{version}")?;
        Ok(())
    }
}

fn expect_args(args: &[&str], n: usize) -> Result<()> {
    if args.len() == n { Ok(()) } else { Err(CliError::InvalidArgs) }
}

fn raw_frame(args: &[&str]) -> Option<MfgFrame> {
    let mut bytes = [0u8; FRAME_LEN];
    for (slot, arg) in bytes.iter_mut().zip(args) {
        *slot = args::dec(arg).ok()?;
    }
    Some(MfgFrame::raw(bytes))
}
