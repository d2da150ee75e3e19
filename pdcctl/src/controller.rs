//! Controller and PDC bring-up ahead of a measurement

use crate::error::{Error, Result};
use crate::fsm::{Bank, CtlCommand, FsmConfig, Mode, Sequencer};
use pdctools::cfg::{IoDelay, Packet, Run};
use pdctools::reg::PdcRegister;
use pdctools::bit::mask_to_pdcs;
use tracing::{info, span, warn, Level};

/// What the board reports about itself
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Board {
    /// PDC slots on the board
    pub n_pdc: usize,
    /// PDCs the run uses
    pub pdc_mask: u32,
    pub clock_period: f64,
}

pub struct Controller {
    pub seq: Sequencer,
    pub board: Board,
}

impl Controller {
    /// Query the board. This is the first command of a run, so a dead link
    /// shows up here.
    pub fn probe(seq: Sequencer, pdc_mask: u32, clock_period: f64) -> Result<Self> {
        let span = span!(Level::INFO, "probe");
        let _enter = span.enter();
        for line in seq.exec("boardInfo -l")?.stdout {
            info!("{}", line);
        }
        let n_pdc = seq.exec_int("boardInfo --numasic --raw")? as usize;
        if n_pdc == 0 || n_pdc > pdctools::N_PDC_MAX {
            return Err(Error::Setup(format!("board reports {} PDCs", n_pdc)));
        }
        let usable = ((1u64 << n_pdc) - 1) as u32;
        if pdc_mask & !usable != 0 || pdc_mask == 0 {
            return Err(Error::Setup(format!(
                "PDC mask 0x{:x} does not fit a board with {} PDCs",
                pdc_mask, n_pdc
            )));
        }
        info!("{} PDCs, using {:?}", n_pdc, mask_to_pdcs(pdc_mask));
        Ok(Controller {
            seq,
            board: Board { n_pdc, pdc_mask, clock_period },
        })
    }

    /// Resets the controller settings, so it comes first
    pub fn set_clock_period(&self) -> Result<()> {
        let ns = (self.board.clock_period * 1e9).round() as u64;
        self.seq.exec(&format!("clkSet -P {} --ns", ns))?;
        Ok(())
    }

    pub fn reset(&self) -> Result<()> {
        self.seq.ctl(CtlCommand::ResetFull)
    }

    pub fn set_packet(&self, bank: Bank, p: &Packet) -> Result<()> {
        let b = bank.suffix();
        self.seq.write_ctl(&format!("SCS{}", b), p.scs)?;
        self.seq.write_ctl(&format!("SCD{}", b), p.scd)?;
        self.seq.write_ctl(&format!("SPD{}", b), p.spd)?;
        Ok(())
    }

    /// Program every delay line of a signal to the same count
    pub fn set_delay(&self, d: &IoDelay) -> Result<()> {
        self.seq.exec(&format!("ioDelaySet --signal {} --reset", d.signal))?;
        let n = self.seq.exec_int(&format!("ioDelaySet --signal {} -n", d.signal))?;
        for line in 0..n {
            self.seq.exec(&format!(
                "ioDelaySet --signal {} --sel {} --count {} --get",
                d.signal, line, d.delay
            ))?;
        }
        Ok(())
    }

    pub fn check_power_good(&self) -> Result<()> {
        let pg = self.seq.exec_int("ctlCfg -P")? as u32;
        if pg & self.board.pdc_mask != self.board.pdc_mask {
            return Err(Error::Setup(format!(
                "adaptor board not powered: power good 0x{:x}, need 0x{:x}",
                pg, self.board.pdc_mask
            )));
        }
        Ok(())
    }

    /// Enable the configuration return lines of the PDCs in use
    pub fn set_return_enable(&self) -> Result<()> {
        let mask = self.board.pdc_mask;
        match self.board.n_pdc {
            8 => {
                let n = self.seq.exec_int("rtnEn -n")? as usize;
                if n != self.board.n_pdc {
                    return Err(Error::Setup(format!(
                        "{} return enable lines for {} PDCs",
                        n, self.board.n_pdc
                    )));
                }
                self.seq.exec(&format!("rtnEn -e 0x{:04x} -s", mask))?;
                let set = self.seq.exec_int("rtnEn -s")? as u32;
                if set != mask {
                    return Err(Error::Setup(format!(
                        "return enable reads 0x{:x}, wrote 0x{:x}",
                        set, mask
                    )));
                }
            }
            32 => {
                // one power good bit per 16-PDC adaptor
                let pg = self.seq.exec_int("rtnEn -s")? as u32;
                let mut expected = 0;
                if mask & 0xFFFF != 0 {
                    expected |= 0x1;
                }
                if mask >> 16 != 0 {
                    expected |= 0x2;
                }
                if pg & expected != expected {
                    return Err(Error::Setup(format!(
                        "adaptor board not powered: 0x{:x}, need 0x{:x}",
                        pg, expected
                    )));
                }
            }
            n => warn!("no return enable procedure for {} PDC boards", n),
        }
        Ok(())
    }

    /// Enable the PDCs in use and pulse their reset
    pub fn prepare_pdcs(&self) -> Result<()> {
        let mask = self.board.pdc_mask;
        self.seq.write_ordered(&[
            ("PDC0", (mask & 0xFFFF) as u16),
            ("PDC1", (mask >> 16) as u16),
            ("CFG0", (mask & 0xFFFF) as u16),
            ("CFG1", (mask >> 16) as u16),
            ("PRST", 0x0000),
        ])?;
        match self.board.n_pdc {
            32 => self.seq.write_ctl("PRST", 0x0001)?,
            _ => self.seq.write_ctl("PRST", (mask & 0xFFFF) as u16)?,
        }
        Ok(())
    }

    /// Bring up the controller: clock, reset, packets, delays, power checks
    pub fn setup(&self, run: &Run) -> Result<()> {
        let span = span!(Level::INFO, "setup");
        let _enter = span.enter();
        self.set_clock_period()?;
        self.reset()?;
        self.set_packet(Bank::A, &run.packet())?;
        for d in run.io_delays() {
            self.set_delay(&d)?;
        }
        self.check_power_good()?;
        self.set_return_enable()?;
        self.prepare_pdcs()?;
        info!("controller ready");
        Ok(())
    }

    /// Program the PDC registers for flag-based counting, then validate
    pub fn configure_pdcs(&self, run: &Run) -> Result<()> {
        let span = span!(Level::INFO, "configure_pdcs");
        let _enter = span.enter();
        let outputs = run.outputs();
        self.seq.set_mode(Mode::Config)?;
        self.seq.write_pdc(PdcRegister::PIXL, run.pixel().word())?;
        let time = self.seq.set_timing(&run.timing())?;
        info!("TIME = 0x{:04x}", time);
        self.seq.write_pdc(PdcRegister::ANLG, 0x0000)?;
        self.seq.write_pdc(PdcRegister::OUTD, outputs.outd())?;
        self.seq.write_pdc(PdcRegister::OUTF, outputs.outf())?;
        self.seq.write_pdc(PdcRegister::TRGC, 0x0000)?;
        self.seq.disable_pixels()?;
        self.seq.validate_status()?;
        // OUTC takes effect only once configuration is done
        self.seq.write_pdc(PdcRegister::OUTC, outputs.outc())?;
        Ok(())
    }

    pub fn configure_fsm(&self, run: &Run) -> Result<()> {
        let fsm = FsmConfig::from_settings(&run.fsm)?;
        self.seq.configure(&fsm)
    }
}
