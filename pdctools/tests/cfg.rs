use pdctools::cfg::{IoDelay, Outputs, Packet, RegisterSetting, RegisterValue, ResultStore, Run, SpadPattern};
use pdctools::reg::OutMux;
use std::collections::BTreeMap;
use std::time::Duration;

fn serialize_config(config: &Run) -> String {
    let ser = serde_json::to_string(config).unwrap();
    return ser;
}

fn deserialize_config(config: &str) -> Run {
    let de: Run = serde_json::from_str(config).unwrap();
    return de;
}

#[test]
fn serde_roundtrip() {
    let mut fields = BTreeMap::new();
    fields.insert(String::from("EN"), 1);
    fields.insert(String::from("MODE"), 2);
    let config = Run {
        name: String::from("test_settings_serde"),
        pdc_mask: Some(0x3),
        meas_time: Some(Duration::from_millis(50)),
        zpp_cycles: Some(100),
        results: Some(ResultStore {
            dir: std::path::PathBuf::from("/tmp/h5"),
            ..ResultStore::default()
        }),
        packet: Some(Packet::default()),
        io_delays: vec![IoDelay { signal: String::from("FLAG"), delay: 12 }],
        outputs: Some(Outputs { data: OutMux::Data, ..Outputs::default() }),
        fsm: vec![
            RegisterSetting { register: String::from("FEND"), value: RegisterValue::Fields(fields) },
            RegisterSetting { register: String::from("FSMM"), value: RegisterValue::Word(0x0101) },
        ],
        spad_patterns: vec![SpadPattern { pdc: 0, pattern: !0b1000, disabled: vec![3] }],
        ..Run::default()
    };
    let serconfig = serialize_config(&config);
    let deconfig = deserialize_config(&serconfig);
    assert_eq!(config, deconfig);
}

#[test]
fn de_simple() {
    let x =
        r#"{
            "name": "dcr_sweep",
            "pdc_mask": 1,
            "meas_time": "100ms",
            "results": {
                "dir": "/home/data/h5",
                "extension": "h5",
                "timeout": "10s",
                "poll_interval": "10ms",
                "delete": true
            },
            "outputs": {
                "data": "VSS",
                "flag": "FLAG",
                "cfg_data": "VSS",
                "cfg_flag": "CLK_TX"
            },
            "fsm": [
                {"register": "FEND", "value": {"Fields": {"EN": 1, "MODE": 2}}},
                {"register": "FSMM", "value": {"Word": 257}}
            ]
        }"#;

    let de: Run = serde_json::from_str(x).unwrap();

    assert_eq!("dcr_sweep", de.name);
    assert_eq!(Duration::from_millis(100), de.meas_time());
    assert_eq!(Duration::from_secs(10), de.results().timeout);
    assert_eq!(Duration::from_millis(10), de.results().poll_interval);
    assert_eq!(0x8200, de.fsm[0].word().unwrap());
    assert_eq!(0x0101, de.fsm[1].word().unwrap());
    assert_eq!(0x0104, de.outputs().outd());
    assert_eq!(0x0044, de.outputs().outc());
    assert_eq!(1000, de.zpp_cycles());
}

#[test]
fn defaults() {
    let run = Run::default();
    assert_eq!(10e-9, run.clock_period());
    assert_eq!(0x1, run.pdc_mask());
    assert_eq!(Duration::from_millis(100), run.meas_time());
    assert_eq!(1.0, run.disable_factor());
    assert_eq!(0x00F7, run.packet().spd);
    assert_eq!("CFG_DATA", run.io_delays()[0].signal);
    assert_eq!(0x0100, run.pixel().word());
    assert_eq!(0x0104, run.outputs().outd());
    assert_eq!(0x0000, run.outputs().outf());
    assert_eq!(15.0, run.timing().hold);
}

#[test]
fn humantime_durations() {
    let x = r#"{"name": "t", "meas_time": "1s 500ms"}"#;
    let de: Run = serde_json::from_str(x).unwrap();
    assert_eq!(humantime::parse_duration("1500ms").ok(), de.meas_time);
}

#[test]
fn bad_register_field() {
    let x = r#"{"register": "FEND", "value": {"Fields": {"ENABLE": 1}}}"#;
    let s: RegisterSetting = serde_json::from_str(x).unwrap();
    assert!(s.word().is_err());
    let x = r#"{"register": "ZPH0", "value": {"Fields": {"EN": 1}}}"#;
    let s: RegisterSetting = serde_json::from_str(x).unwrap();
    assert!(s.word().is_err());
}
