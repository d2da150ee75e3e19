pub mod channel;
pub mod controller;
pub mod error;
pub mod fsm;
pub mod optimizer;
pub mod rendezvous;
pub mod sim;
pub mod timer;

use argh::FromArgs;
use error::{Error, Result};
use pdctools::sweep::Sweep;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, FromArgs, Clone)]
/// Characterize the count rates of every SPAD of the enabled PDCs
pub struct CliArgs {
    /// print version information
    #[argh(switch, short = 'v')]
    pub version: bool,
    /// run file path
    #[argh(option)]
    pub config: Option<String>,
    /// controller host or ssh alias, overrides the run file
    #[argh(option)]
    pub host: Option<String>,
    /// output directory for the sweep table and run record
    #[argh(option, default = "String::from(\"data\")")]
    pub out: String,
    /// simulate the board and result pipeline instead of connecting
    #[argh(switch)]
    pub dry_run: bool,
    /// pause for the operator to apply the SPAD high voltage
    #[argh(switch)]
    pub wait_hv: bool,
}

/// Operator abort, raised on Ctrl-C and checked at every blocking wait
#[derive(Clone, Debug, Default)]
pub struct Abort(Arc<AtomicBool>);

impl Abort {
    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<()> {
        match self.is_raised() {
            true => Err(Error::Interrupted),
            false => Ok(()),
        }
    }
}

/// Messages from the sweep worker to `main`
pub enum Event {
    /// Setup finished, the sweep starts
    Ready { n_pdc: usize },
    /// One SPAD done; `tcr` per PDC
    Progress { spad: usize, period: Option<f64>, tcr: Vec<Option<f64>> },
    Done(Box<Sweep>),
    Failed(Error),
}
