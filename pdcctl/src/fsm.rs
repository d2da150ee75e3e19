//! Acquisition FSM sequencing: controller modes, ordered register writes and
//! configuration validation.
//!
//! The device's mode is never tracked locally. Each mode change is a command
//! that is assumed to succeed unless the channel reports an error.

use crate::channel::{CommandOutput, Shared};
use crate::error::{Error, Result};
use pdctools::cfg::{RegisterSetting, Timing};
use pdctools::reg::{self, Layout, PdcRegister};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info, span, warn, Level};

/// Status registers that must all read zero after configuring
pub const STATUS_FLAGS: [&str; 7] = [
    "BNK_RTN_CLK_ERR",
    "BNK_RTN_DATA_ERR",
    "PDC_CMD_VALID_ERR",
    "PDC_CFG_VALID_ERR",
    "PDC_CFG_CS_ERR",
    "PDC_CFG_VALID_LEN_ERR",
    "GENERAL_STATUS",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Mode {
    Config,
    Acquire,
    Trigger,
}

impl Mode {
    pub fn command(self) -> &'static str {
        match self {
            Mode::Config => "MODE_CFG",
            Mode::Acquire => "MODE_ACQ",
            Mode::Trigger => "MODE_TRG",
        }
    }
}

/// One-shot controller commands (`ctlCmd -c`)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CtlCommand {
    /// full reset of the controller, PDCs untouched
    ResetFull,
    /// reset of the controller FSM
    ResetSys,
    /// reset of the PDC system
    ResetPdcSys,
    ResetZpp,
    FsmStart,
    PdcTrigger,
    PackTriggerA,
    PackTriggerB,
}

impl CtlCommand {
    pub fn name(self) -> &'static str {
        match self {
            CtlCommand::ResetFull => "RSTN_FULL",
            CtlCommand::ResetSys => "RSTN_SYS",
            CtlCommand::ResetPdcSys => "PDC_RSTN_SYS",
            CtlCommand::ResetZpp => "RSTN_ZPP",
            CtlCommand::FsmStart => "FSM_START",
            CtlCommand::PdcTrigger => "PDC_TRG",
            CtlCommand::PackTriggerA => "PACK_TRG_A",
            CtlCommand::PackTriggerB => "PACK_TRG_B",
        }
    }
}

/// Controller packet banks
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Bank {
    A,
    B,
}

impl Bank {
    pub fn suffix(self) -> char {
        match self {
            Bank::A => 'A',
            Bank::B => 'B',
        }
    }

    pub fn trigger(self) -> CtlCommand {
        match self {
            Bank::A => CtlCommand::PackTriggerA,
            Bank::B => CtlCommand::PackTriggerB,
        }
    }
}

/// FSM configuration registers. The declaration order is the order they are
/// written in, which puts every enabling register after its parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FsmRegister {
    TOUT,
    FEND,
    FTX1,
    FTX0,
    ATX1,
    ATX0,
    SLW1,
    SLW0,
    FST1,
    FST0,
    FACQ,
    MISC,
    FSMM,
}

impl FsmRegister {
    pub const ALL: [FsmRegister; 13] = [
        FsmRegister::TOUT,
        FsmRegister::FEND,
        FsmRegister::FTX1,
        FsmRegister::FTX0,
        FsmRegister::ATX1,
        FsmRegister::ATX0,
        FsmRegister::SLW1,
        FsmRegister::SLW0,
        FsmRegister::FST1,
        FsmRegister::FST0,
        FsmRegister::FACQ,
        FsmRegister::MISC,
        FsmRegister::FSMM,
    ];

    pub fn name(self) -> &'static str {
        match self {
            FsmRegister::TOUT => "TOUT",
            FsmRegister::FEND => "FEND",
            FsmRegister::FTX1 => "FTX1",
            FsmRegister::FTX0 => "FTX0",
            FsmRegister::ATX1 => "ATX1",
            FsmRegister::ATX0 => "ATX0",
            FsmRegister::SLW1 => "SLW1",
            FsmRegister::SLW0 => "SLW0",
            FsmRegister::FST1 => "FST1",
            FsmRegister::FST0 => "FST0",
            FsmRegister::FACQ => "FACQ",
            FsmRegister::MISC => "MISC",
            FsmRegister::FSMM => "FSMM",
        }
    }

    pub fn layout(self) -> Option<&'static Layout> {
        reg::layout(self.name())
    }
}

impl fmt::Display for FsmRegister {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FsmRegister {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        FsmRegister::ALL
            .iter()
            .find(|r| r.name() == s)
            .copied()
            .ok_or_else(|| Error::Parse(format!("FSM register {}", s)))
    }
}

/// Registers that, when written in the same batch, must come before `register`
pub fn must_follow(register: &str) -> &'static [&'static str] {
    match register {
        "FTX0" => &["FTX1"],
        "ATX0" => &["ATX1"],
        "SLW0" => &["SLW1"],
        "FST0" => &["FST1"],
        "FSMM" => &[
            "TOUT", "FEND", "FTX1", "FTX0", "ATX1", "ATX0", "SLW1", "SLW0", "FST1", "FST0",
            "FACQ", "MISC",
        ],
        // ZPP timer: the enable bit lives in ZPL1
        "ZPL1" => &["ZPH0", "ZPH1", "ZPL0"],
        _ => &[],
    }
}

/// Reject a write batch where an enabling register precedes a parameter
/// register it depends on. Nothing is sent for a rejected batch.
pub fn check_order<S: AsRef<str>>(registers: &[S]) -> Result<()> {
    for (i, r) in registers.iter().enumerate() {
        let deps = must_follow(r.as_ref());
        for later in registers[i + 1..].iter() {
            if deps.contains(&later.as_ref()) {
                return Err(Error::Ordering {
                    register: r.as_ref().to_string(),
                    after: later.as_ref().to_string(),
                });
            }
        }
    }
    Ok(())
}

/// Values for the FSM registers of one acquisition session
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FsmConfig {
    regs: BTreeMap<FsmRegister, u16>,
}

impl FsmConfig {
    pub fn new() -> Self {
        FsmConfig::default()
    }

    pub fn set(&mut self, r: FsmRegister, word: u16) -> &mut Self {
        self.regs.insert(r, word);
        return self;
    }

    pub fn get(&self, r: FsmRegister) -> Option<u16> {
        self.regs.get(&r).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.regs.is_empty()
    }

    /// Writes in dependency-safe order
    pub fn writes(&self) -> Vec<(FsmRegister, u16)> {
        self.regs.iter().map(|(r, w)| (*r, *w)).collect()
    }

    /// Sequence started by a controller command, nothing else changed
    pub fn command_triggered() -> Self {
        let mut c = FsmConfig::new();
        c.set(FsmRegister::FSMM, 0x0101);
        return c;
    }

    /// Reference configuration of the controller: fast acquisition with
    /// automatic transmission to every PDC
    pub fn reference() -> Self {
        let mut c = FsmConfig::new();
        c.set(FsmRegister::TOUT, 0x5030)
            .set(FsmRegister::FEND, 0x8200)
            .set(FsmRegister::FTX1, 0x0080)
            .set(FsmRegister::FTX0, 0x8600)
            .set(FsmRegister::ATX1, 0x0000)
            .set(FsmRegister::ATX0, 0x0000)
            .set(FsmRegister::SLW1, 0x0000)
            .set(FsmRegister::SLW0, 0x0000)
            .set(FsmRegister::FST1, 0x0080)
            .set(FsmRegister::FST0, 0x8600)
            .set(FsmRegister::FACQ, 0x0007)
            .set(FsmRegister::FSMM, 0x0111);
        return c;
    }

    /// From run file settings; an empty list means `command_triggered`
    pub fn from_settings(settings: &[RegisterSetting]) -> Result<Self> {
        if settings.is_empty() {
            return Ok(FsmConfig::command_triggered());
        }
        let mut c = FsmConfig::new();
        for s in settings {
            let r = s.register.parse::<FsmRegister>()?;
            c.set(r, s.word()?);
        }
        Ok(c)
    }
}

/// Issues register writes and controller commands over the shared channel
#[derive(Clone)]
pub struct Sequencer {
    channel: Shared,
}

impl Sequencer {
    pub fn new(channel: Shared) -> Self {
        Sequencer { channel }
    }

    pub fn channel(&self) -> Shared {
        self.channel.clone()
    }

    pub fn exec(&self, cmd: &str) -> Result<CommandOutput> {
        self.channel.lock().exec(cmd)
    }

    pub fn exec_int(&self, cmd: &str) -> Result<u64> {
        self.channel.lock().exec_int(cmd)
    }

    pub fn set_mode(&self, mode: Mode) -> Result<()> {
        self.command(mode.command())
    }

    pub fn ctl(&self, c: CtlCommand) -> Result<()> {
        self.command(c.name())
    }

    fn command(&self, name: &str) -> Result<()> {
        self.exec(&format!("ctlCmd -c {}", name))?;
        Ok(())
    }

    /// Write one controller register
    pub fn write_ctl(&self, register: &str, word: u16) -> Result<()> {
        if let Some(l) = reg::layout(register) {
            debug!("{}", l.describe(word));
        }
        self.exec(&format!("ctlCfg -a {} -r 0x{:04x} -g", register, word))?;
        Ok(())
    }

    /// Write controller registers in the given order, after checking that no
    /// enabling register precedes its parameters
    pub fn write_ordered<S: AsRef<str>>(&self, writes: &[(S, u16)]) -> Result<()> {
        let names: Vec<&str> = writes.iter().map(|(r, _)| r.as_ref()).collect();
        check_order(&names)?;
        for (r, w) in writes {
            self.write_ctl(r.as_ref(), *w)?;
        }
        Ok(())
    }

    pub fn configure(&self, config: &FsmConfig) -> Result<()> {
        let span = span!(Level::INFO, "configure_fsm");
        let _enter = span.enter();
        let writes: Vec<(&str, u16)> = config
            .writes()
            .into_iter()
            .map(|(r, w)| (r.name(), w))
            .collect();
        self.write_ordered(&writes)?;
        info!("{} FSM registers written", writes.len());
        Ok(())
    }

    /// Write one PDC configuration register on every enabled PDC
    pub fn write_pdc(&self, register: PdcRegister, word: u16) -> Result<()> {
        if let Some(l) = register.layout() {
            debug!("{}", l.describe(word));
        }
        self.exec(&format!("pdcCfg -a {} -r 0x{:04x} -g", register, word))?;
        Ok(())
    }

    /// Pixel timing in nanoseconds; returns the resulting TIME word
    pub fn set_timing(&self, t: &Timing) -> Result<u16> {
        self.exec(&format!("pdcTime --hold {:.1} --rech {:.1} --flag {:.1} -g", t.hold, t.rech, t.flag))?;
        let w = self.exec_int("pdcTime -g")? as u16;
        debug!("{}", reg::TIME.describe(w));
        Ok(w)
    }

    pub fn disable_pixels(&self) -> Result<()> {
        self.exec("pdcPix --dis")?;
        Ok(())
    }

    /// Enable the SPADs in `pattern`, on one PDC or on all of them
    pub fn set_spads(&self, pattern: u64, pdc: Option<u8>) -> Result<()> {
        let cmd = match pdc {
            Some(p) => format!("pdcSpad --pattern 0x{:016x} --spdc {} --mode NONE", pattern, p),
            None => format!("pdcSpad --pattern 0x{:016x} --mode NONE", pattern),
        };
        self.exec(&cmd)?;
        Ok(())
    }

    /// Read back the status registers; any error flag aborts the run
    pub fn validate_status(&self) -> Result<()> {
        let cmd = format!("ctlCfg -s {}", STATUS_FLAGS.join(","));
        let out = self.channel.lock().run(&cmd)?;
        check_status(&cmd, &out)?;
        info!("configuration valid");
        Ok(())
    }

    pub fn start(&self) -> Result<()> {
        self.ctl(CtlCommand::FsmStart)
    }

    pub fn trigger(&self) -> Result<()> {
        self.ctl(CtlCommand::PdcTrigger)
    }

    pub fn pack_trigger(&self, bank: Bank) -> Result<()> {
        self.ctl(bank.trigger())
    }

    /// Best effort: ask the device to stop whatever it is doing
    pub fn stop(&self) {
        if let Err(e) = self.channel.lock().run("stop") {
            warn!("stop failed: {}", e);
        }
    }
}

/// Check the output of a status read: no stderr output, every flag present
/// at least once, every flag zero
pub fn check_status(cmd: &str, out: &CommandOutput) -> Result<()> {
    if !out.stderr.is_empty() {
        return Err(Error::StatusRead {
            cmd: cmd.to_string(),
            message: out.stderr.join("; "),
        });
    }
    let mut found = HashSet::new();
    for line in out.stdout.iter() {
        let flag = STATUS_FLAGS.iter().find(|&&f| line.starts_with(f));
        if let Some(&name) = flag {
            found.insert(name);
            let value = line
                .rsplit(':')
                .next()
                .and_then(crate::channel::parse_int)
                .ok_or_else(|| Error::Parse(line.clone()))?;
            debug!("{} = 0x{:08x}", name, value);
            if value != 0 {
                return Err(Error::StatusFlag { name: name.to_string(), value });
            }
        }
    }
    if found.len() != STATUS_FLAGS.len() {
        return Err(Error::StatusMissing { expected: STATUS_FLAGS.len(), found: found.len() });
    }
    Ok(())
}
