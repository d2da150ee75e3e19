use chrono::{Local, TimeZone};
use pdctools::de::{self, Samples};
use pdctools::ser;
use pdctools::sweep::{SpadRecord, Sweep};
use pdctools::zpp::{ZppDerived, ZppSample};
use pdctools::N_SPAD;
use std::io::Write;

fn samples() -> Samples {
    let mut m = Samples::new();
    m.insert(0, ZppSample {
        avg: Some(5),
        bin: Some(1000),
        nul: Some(600),
        prd: Some(100),
        tot: Some(600),
        ..ZppSample::default()
    });
    m.insert(2, ZppSample { bin: Some(10), ..ZppSample::default() });
    return m;
}

#[test]
fn scientific_notation() {
    assert_eq!("5.000E+05", ser::sci(500_000.0));
    assert_eq!("-1.000E+00", ser::sci(-1.0));
    assert_eq!("0.000E+00", ser::sci(0.0));
    assert_eq!("1.235E-07", ser::sci(1.23456e-7));
    assert_eq!("1.000E+100", ser::sci(1e100));
}

#[test]
fn json_artifact() {
    let x = r#"{"pdc": {"0": {"AVG": 5, "BIN": 1000, "NUL": 600, "PRD": 100, "TOT": 600, "DGTL_SUM": 3},
                        "2": {"BIN": 10, "TOT": -1}}}"#;
    let m = de::json(x.as_bytes()).unwrap();
    assert_eq!(samples(), m);
}

#[test]
fn json_roundtrip() {
    let mut b: Vec<u8> = Vec::new();
    ser::json(&mut b, &samples()).unwrap();
    assert_eq!(samples(), de::json(&*b).unwrap());
}

#[test]
fn tsv_artifact() {
    let x = "0\tAVG\t5\n0\tBIN\t1000\n0\tNUL\t600\n0\tPRD\t100\n0\tTOT\t600\n2\tBIN\t10\n2\tTOT\t-1\n";
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .delimiter(b'\t')
        .from_reader(x.as_bytes());
    assert_eq!(samples(), de::tsv(&mut rdr).unwrap());

    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .delimiter(b'\t')
        .from_reader("0\tFOO\t1\n".as_bytes());
    assert!(de::tsv(&mut rdr).is_err());
}

#[test]
fn artifact_by_extension() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("result.json");
    {
        let mut f = std::fs::File::create(&path).unwrap();
        ser::json(&mut f, &samples()).unwrap();
        f.flush().unwrap();
    }
    let m = de::artifact(&path, 2).unwrap();
    assert_eq!(1, m.len());
    let by = de::by_pdc(&de::artifact(&path, 4).unwrap(), 4);
    assert_eq!(4, by.len());
    assert!(by[0].is_some());
    assert!(by[1].is_none());
    assert!(by[2].is_some());
    assert!(by[3].is_none());

    let bad = dir.path().join("result.bin");
    std::fs::write(&bad, b"x").unwrap();
    assert!(de::artifact(&bad, 1).is_err());
}

fn sweep() -> Sweep {
    let mut sweep = Sweep::new(2, 0.1);
    let s = samples()[&0];
    for i in 0..N_SPAD {
        let d = if i == 1 { ZppDerived::default() } else { s.reduce(10e-9) };
        let sample = if i == 1 { None } else { Some(s) };
        sweep.record(i, &[sample, None], &[d, ZppDerived::default()], Some(1e-6));
    }
    return sweep;
}

#[test]
fn sweep_export() {
    let mut wtr = csv::WriterBuilder::new().delimiter(b';').from_writer(Vec::new());
    let n = ser::sweep_csv(&mut wtr, &sweep()).unwrap();
    assert_eq!(1, n);
    let out = String::from_utf8(wtr.into_inner().unwrap()).unwrap();
    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(1 + N_SPAD, lines.len());
    assert_eq!(
        "PDC0_SPAD_idx;PDC0_TCR (cps);PDC0_UCR (cps);PDC0_CCR (%);PDC0_AVG;PDC0_BIN;PDC0_NUL;PDC0_PRD;PDC0_TOT",
        lines[0],
    );
    assert!(lines[1].starts_with("0;6.000E+05;5.108E+05;1.486E+01;5;1000;600;100;600"));
    assert_eq!("1;-1.000E+00;-1.000E+00;-1.000E+00;-1;-1;-1;-1;-1", lines[2]);

    let mut rdr = csv::ReaderBuilder::new().delimiter(b';').from_reader(out.as_bytes());
    let tcr = de::sweep_tcr(&mut rdr).unwrap();
    assert_eq!(1, tcr.len());
    assert_eq!(0, tcr[0].0);
    assert_eq!(N_SPAD, tcr[0].1.len());
    assert_eq!(None, tcr[0].1[1]);
    assert_eq!(Some(600_000.0), tcr[0].1[0]);
}

#[test]
fn screened_row_closes_the_export() {
    let mut sweep = sweep();
    let s = samples()[&0];
    sweep.results[0].screened = Some(SpadRecord {
        sample: Some(s),
        derived: s.reduce(10e-9),
        period: Some(0.1),
        enabled: true,
    });
    let mut wtr = csv::WriterBuilder::new().delimiter(b';').from_writer(Vec::new());
    ser::sweep_csv(&mut wtr, &sweep).unwrap();
    let out = String::from_utf8(wtr.into_inner().unwrap()).unwrap();
    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(2 + N_SPAD, lines.len());
    assert!(lines[1 + N_SPAD].starts_with("EN;6.000E+05;5.108E+05;1.486E+01;5;1000;600;100;600"));

    // the summary row is not a SPAD
    let mut rdr = csv::ReaderBuilder::new().delimiter(b';').from_reader(out.as_bytes());
    let tcr = de::sweep_tcr(&mut rdr).unwrap();
    assert_eq!(N_SPAD, tcr[0].1.len());
}

#[test]
fn empty_sweep_writes_nothing() {
    let mut wtr = csv::WriterBuilder::new().delimiter(b';').from_writer(Vec::new());
    assert_eq!(0, ser::sweep_csv(&mut wtr, &Sweep::new(2, 0.1)).unwrap());
    assert!(wtr.into_inner().unwrap().is_empty());
}

#[test]
fn sweep_file_name() {
    let ts = Local.with_ymd_and_hms(2024, 1, 31, 14, 5, 9).unwrap();
    assert_eq!("20240131_14h05m09_ZPP_PDC0_100ms.csv", ser::sweep_file_name(&ts, &sweep()));
}
