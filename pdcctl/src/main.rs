use anyhow::{anyhow, Context, Result};
use chrono::Local;
use flume::Sender;
use indicatif::{ProgressBar, ProgressStyle};
use pdcctl::channel::{self, SshChannel};
use pdcctl::controller::Controller;
use pdcctl::fsm::Sequencer;
use pdcctl::optimizer::Optimizer;
use pdcctl::sim::Simulator;
use pdcctl::{error, Abort, CliArgs, Event};
use pdctools::sweep::Sweep;
use pdctools::{cfg, ser, N_SPAD};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const GIT_VERSION: &str = git_version::git_version!(fallback = "unknown");

/// ssh alias of the controller when neither the run file nor `--host` has one
const DEFAULT_HOST: &str = "zcudev";

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args: CliArgs = argh::from_env();

    if args.version {
        println!(concat!(env!("CARGO_BIN_NAME"), " ", "{}"), GIT_VERSION);
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Load the run file
    let (cfg_path, mut config) = match &args.config {
        Some(c) => {
            let path = PathBuf::from(c);
            let f = File::open(&path).with_context(|| format!("cannot open run file {}", c))?;
            let config: cfg::Run = serde_json::from_reader(BufReader::new(f))
                .with_context(|| format!("cannot parse run file {}", c))?;
            (path, config)
        }
        None => (PathBuf::from("zpp"), cfg::Run::default()),
    };

    let out = PathBuf::from(&args.out);
    let seq = Sequencer::new(match args.dry_run {
        true => {
            let mut store = config.results();
            store.dir = out.join("dry_run");
            store.extension = String::from("json");
            config.results = Some(store.clone());
            let n_pdc = match config.pdc_mask() >> 8 {
                0 => 8,
                _ => pdctools::N_PDC_MAX,
            };
            info!("dry run with {} simulated PDCs", n_pdc);
            channel::shared(Simulator::new(n_pdc, config.pdc_mask(), config.clock_period(), store.dir))
        }
        false => {
            let host = match (&args.host, &config.host) {
                (Some(addr), _) => cfg::Host { addr: addr.clone(), user: None, port: None, identity: None },
                (None, Some(h)) => h.clone(),
                (None, None) => cfg::Host { addr: DEFAULT_HOST.into(), user: None, port: None, identity: None },
            };
            info!("connecting to {}", host.addr);
            channel::shared(SshChannel::new(&host.addr, host.user.as_deref(), host.port, host.identity.clone()))
        }
    });

    let abort = Abort::default();
    let (tx, rx) = flume::unbounded();
    let timestamp = Local::now();
    let started = Instant::now();

    // The sweep blocks on the controller, so it gets its own thread
    let worker = {
        let (seq, run, abort, wait_hv) = (seq.clone(), config.clone(), abort.clone(), args.wait_hv);
        std::thread::spawn(move || {
            let msg = match run_sweep(seq, &run, abort, wait_hv, tx.clone()) {
                Ok(s) => Event::Done(Box::new(s)),
                Err(e) => Event::Failed(e),
            };
            let _ = tx.send(msg);
        })
    };

    let pb = ProgressBar::new(N_SPAD as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{elapsed_precise} [{bar:40}] SPAD {pos}/{len} {msg}")
            .progress_chars("=> "),
    );

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let sweep = loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                abort.raise();
                pb.abandon_with_message("interrupted");
                seq.stop();
                return Err(error::Error::Interrupted.into());
            }
            msg = rx.recv_async() => match msg {
                Ok(Event::Ready { n_pdc }) => pb.set_message(format!("{} PDCs", n_pdc)),
                Ok(Event::Progress { spad, period, tcr }) => {
                    pb.set_position(spad as u64 + 1);
                    let valid: Vec<f64> = tcr.into_iter().flatten().collect();
                    let mean = valid.iter().sum::<f64>() / valid.len().max(1) as f64;
                    match period {
                        Some(p) => pb.set_message(format!("TCR {:.1} cps, ZPP {:.3e} s", mean, p)),
                        None => pb.set_message("no valid rate"),
                    }
                }
                Ok(Event::Done(s)) => break *s,
                Ok(Event::Failed(e)) => {
                    pb.abandon_with_message("failed");
                    seq.stop();
                    return Err(e.into());
                }
                Err(_) => {
                    seq.stop();
                    return Err(anyhow!("sweep worker exited without a result"));
                }
            }
        }
    };
    pb.finish_with_message("done");
    if worker.join().is_err() {
        warn!("sweep worker panicked after finishing");
    }

    // Export the sweep table
    fs::create_dir_all(&out)?;
    match sweep.valid().next() {
        Some(_) => {
            let path = out.join(ser::sweep_file_name(&Local::now(), &sweep));
            let mut wtr = csv::WriterBuilder::new().delimiter(b';').from_path(&path)?;
            let n = ser::sweep_csv(&mut wtr, &sweep)?;
            info!("{} PDCs exported to {}", n, path.display());
        }
        None => warn!("no PDC returned data, nothing exported"),
    }

    // Now record the run record to disk
    let record = cfg::Run {
        timestamp:      Some(timestamp),
        duration:       Some(started.elapsed()),
        spad_patterns:  sweep
            .valid()
            .map(|r| cfg::SpadPattern { pdc: r.pdc, pattern: r.enable_pattern(), disabled: r.disabled() })
            .collect(),
        ..config
    };
    let path = save_record(&record, &cfg_path, &out)?;
    info!("run record saved to {}", path.display());

    Ok(())
}

fn run_sweep(seq: Sequencer, run: &cfg::Run, abort: Abort, wait_hv: bool, tx: Sender<Event>) -> error::Result<Sweep> {
    let ctl = Controller::probe(seq, run.pdc_mask(), run.clock_period())?;
    ctl.setup(run)?;
    ctl.configure_pdcs(run)?;
    if wait_hv {
        println!("Apply the SPAD high voltage, then press Enter");
        let mut line = String::new();
        std::io::stdin().read_line(&mut line)?;
        abort.check()?;
    }
    ctl.configure_fsm(run)?;
    Optimizer::new(ctl.seq.clone(), ctl.board, run, abort)
        .with_events(tx)
        .sweep()
}

/// Write the record next to the other outputs, named after the run file.
/// Never overwrites an earlier record.
fn save_record(record: &cfg::Run, cfg_path: &Path, out: &Path) -> Result<PathBuf> {
    let json_record = serde_json::to_string_pretty(record)?;

    let ts = Local::now();
    let stem = cfg_path
        .file_stem()
        .unwrap_or_else(|| std::ffi::OsStr::new("zpp"))
        .to_string_lossy()
        .to_string();
    let path = out.join(format!("{}_{}.json", stem, ts.format("%F_%H-%M-%S")));
    let path2 = out.join(format!("{}_{}.json", stem, ts.format("%F_%H-%M-%S%.3f")));

    let (f, path) = match OpenOptions::new().write(true).create_new(true).open(&path) {
        Ok(f) => (f, path),
        Err(_) => {
            let f = OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path2)
                .context("saving more than one record per millisecond")?;
            (f, path2)
        }
    };
    let mut wtr = BufWriter::new(f);
    wtr.write_all(json_record.as_bytes())?;
    wtr.flush()?;
    Ok(path)
}
