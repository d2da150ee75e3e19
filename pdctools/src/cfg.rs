//! Configuration tools: formats for declaring and recording runs

use crate::reg::{self, OutMux, Pixel};
use crate::CLOCK_PERIOD;
use anyhow::{anyhow, Result};
use chrono::{DateTime, offset::Local};
use serde::{Serialize, Deserialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Count rate characterization run, for both declaring and recording runs in
/// JSON files.
///
/// ## Declaring a run
///
/// Every field but `name` is optional; the accessor methods below supply the
/// default used when a field is left out. Durations are parsed as in
/// [humantime](https://docs.rs/humantime/), e.g. `100ms` or `10s`.
///
/// ## Recording a run
///
/// After the sweep the declaration is written back with `timestamp` and
/// `duration` filled in, and with one entry in `spad_patterns` per PDC giving
/// the SPAD enable pattern that leaves the noisy SPADs off.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct Run {
    pub name:               String,
    pub timestamp:          Option<DateTime<Local>>,
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub duration:           Option<Duration>,
    pub host:               Option<Host>,
    /// System clock period in seconds
    pub clock_period:       Option<f64>,
    /// PDCs to enable, bit `i` for PDC `i`
    pub pdc_mask:           Option<u32>,
    /// Window used to estimate the rate before picking the ZPP period
    #[serde(default, with = "humantime_serde")]
    pub meas_time:          Option<Duration>,
    /// Number of ZPP periods per final measurement
    pub zpp_cycles:         Option<u32>,
    pub results:            Option<ResultStore>,
    /// TCR above `disable_factor` times the reference turns a SPAD off
    pub disable_factor:     Option<f64>,
    pub packet:             Option<Packet>,
    #[serde(default = "emptyvec", skip_serializing_if = "Vec::is_empty")]
    pub io_delays:          Vec<IoDelay>,
    pub pixel:              Option<Pixel>,
    pub timing:             Option<Timing>,
    pub outputs:            Option<Outputs>,
    #[serde(default = "emptyvec", skip_serializing_if = "Vec::is_empty")]
    pub fsm:                Vec<RegisterSetting>,
    #[serde(default = "emptyvec", skip_serializing_if = "Vec::is_empty")]
    pub spad_patterns:      Vec<SpadPattern>,
}

impl Run {
    pub fn clock_period(&self) -> f64 {
        self.clock_period.unwrap_or(CLOCK_PERIOD)
    }

    pub fn pdc_mask(&self) -> u32 {
        self.pdc_mask.unwrap_or(0x1)
    }

    pub fn meas_time(&self) -> Duration {
        self.meas_time.unwrap_or(Duration::from_millis(100))
    }

    pub fn zpp_cycles(&self) -> u32 {
        self.zpp_cycles.unwrap_or(1000)
    }

    pub fn disable_factor(&self) -> f64 {
        self.disable_factor.unwrap_or(1.0)
    }

    pub fn results(&self) -> ResultStore {
        self.results.clone().unwrap_or_default()
    }

    pub fn packet(&self) -> Packet {
        self.packet.unwrap_or_default()
    }

    pub fn io_delays(&self) -> Vec<IoDelay> {
        if self.io_delays.is_empty() {
            return vec![IoDelay { signal: String::from("CFG_DATA"), delay: 300 }];
        }
        return self.io_delays.clone();
    }

    pub fn pixel(&self) -> Pixel {
        self.pixel.unwrap_or(Pixel { flag_en: true, ..Pixel::default() })
    }

    pub fn timing(&self) -> Timing {
        self.timing.unwrap_or_default()
    }

    pub fn outputs(&self) -> Outputs {
        self.outputs.unwrap_or_default()
    }
}

/// Remote controller reached over ssh
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct Host {
    pub addr:       String,
    pub user:       Option<String>,
    pub port:       Option<u16>,
    pub identity:   Option<PathBuf>,
}

/// Where the conversion pipeline drops result files, and how to pick them up
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct ResultStore {
    pub dir:            PathBuf,
    pub extension:      String,
    #[serde(with = "humantime_serde")]
    pub timeout:        Duration,
    #[serde(with = "humantime_serde")]
    pub poll_interval:  Duration,
    /// Delete each file once its counters are read
    pub delete:         bool,
}

impl Default for ResultStore {
    fn default() -> Self {
        ResultStore {
            dir:            PathBuf::from("results"),
            extension:      String::from("h5"),
            timeout:        Duration::from_secs(10),
            poll_interval:  Duration::from_millis(10),
            delete:         true,
        }
    }
}

/// Contents of packet bank A: config status, controller data and PDC data
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone, Copy)]
pub struct Packet {
    pub scs: u16,
    pub scd: u16,
    pub spd: u16,
}

impl Default for Packet {
    /// Only ZPP data from the PDCs
    fn default() -> Self {
        Packet { scs: 0x0000, scd: 0x0000, spd: 0x00F7 }
    }
}

/// FPGA delay line setting for one signal
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct IoDelay {
    pub signal: String,
    pub delay:  u32,
}

/// Pixel timing, in nanoseconds
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone, Copy)]
pub struct Timing {
    pub hold: f64,
    pub rech: f64,
    pub flag: f64,
}

impl Default for Timing {
    fn default() -> Self {
        Timing { hold: 15.0, rech: 4.0, flag: 2.0 }
    }
}

/// Output multiplexer selections while acquiring (DATA and FLAG pins) and
/// while configuring (OUTC)
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone, Copy)]
pub struct Outputs {
    pub data:       OutMux,
    pub flag:       OutMux,
    pub cfg_data:   OutMux,
    pub cfg_flag:   OutMux,
}

impl Outputs {
    pub fn outd(&self) -> u16 {
        reg::output_word(self.data, self.data)
    }

    pub fn outf(&self) -> u16 {
        reg::output_word(self.flag, self.flag)
    }

    pub fn outc(&self) -> u16 {
        reg::output_word(self.cfg_data, self.cfg_flag)
    }
}

impl Default for Outputs {
    fn default() -> Self {
        Outputs {
            data:       OutMux::Vss,
            flag:       OutMux::Flag,
            cfg_data:   OutMux::Vss,
            cfg_flag:   OutMux::Vss,
        }
    }
}

/// A register value, either as a raw word or by named fields
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub enum RegisterValue {
    Word(u16),
    Fields(BTreeMap<String, u32>),
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct RegisterSetting {
    pub register:   String,
    pub value:      RegisterValue,
}

impl RegisterSetting {
    pub fn word(&self) -> Result<u16> {
        match &self.value {
            RegisterValue::Word(w) => Ok(*w),
            RegisterValue::Fields(fields) => {
                let layout = reg::layout(&self.register)
                    .ok_or_else(|| anyhow!("no field layout for register {}", self.register))?;
                layout.encode_named(fields.iter().map(|(k, v)| (k.as_str(), *v)))
            }
        }
    }
}

/// SPAD enable pattern recorded for a PDC after the sweep
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct SpadPattern {
    pub pdc:        u8,
    pub pattern:    u64,
    #[serde(default = "emptyvec", skip_serializing_if = "Vec::is_empty")]
    pub disabled:   Vec<u8>,
}

fn emptyvec<T>() -> Vec<T> {
    Vec::new()
}

/// Creates an empty Run; every setting falls back to its default.
impl Default for Run {
    fn default() -> Self {
        Run {
            name:               String::new(),
            timestamp:          None,
            duration:           None,
            host:               None,
            clock_period:       None,
            pdc_mask:           None,
            meas_time:          None,
            zpp_cycles:         None,
            results:            None,
            disable_factor:     None,
            packet:             None,
            io_delays:          Vec::new(),
            pixel:              None,
            timing:             None,
            outputs:            None,
            fsm:                Vec::new(),
            spad_patterns:      Vec::new(),
        }
    }
}
