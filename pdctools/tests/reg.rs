use pdctools::reg::{self, Field, PdcRegister, LAYOUTS, TIME};

#[test]
fn time_register_packing() {
    let w = reg::time_word(50, 10, 2);
    assert_eq!((50 & 0x3F) | ((10 & 0x1F) << 6) | ((2 & 0x1F) << 11), w);
    assert_eq!(50, TIME.get(w, "HOLD").unwrap());
    assert_eq!(10, TIME.get(w, "RECH").unwrap());
    assert_eq!(2, TIME.get(w, "FLAG").unwrap());
}

#[test]
fn time_register_default() {
    // 0xDEDE: HOLD=30, RECH=27, FLAG=27
    let w = PdcRegister::TIME.default_word();
    assert_eq!(vec![("HOLD", 30), ("RECH", 27), ("FLAG", 27)], TIME.decode_all(w));
    assert_eq!(w, reg::time_word(30, 27, 27));
}

/// Every value that fits its field decodes back unchanged
#[test]
fn roundtrip_all_fields() {
    for l in LAYOUTS {
        for f in l.fields {
            for v in 0..=f.mask() as u32 {
                let w = reg::encode(&[(*f, v)]);
                assert_eq!(v as u16, reg::decode(w, f), "{} {}", l.register, f.name);
            }
        }
    }
}

#[test]
fn roundtrip_combined() {
    let w = reg::FSMM
        .encode_named([("SEQ_START_MODE", 1), ("ACQ_ALL_PDC", 0), ("TX_ALL_PDC", 1)])
        .unwrap();
    assert_eq!(0x0101, w);
    let w = reg::FTX0
        .encode_named([("CMD_DELAY", 0), ("MODE", 2), ("CMD_MODE", 1), ("EN", 1)])
        .unwrap();
    assert_eq!(0x8600, w);
    assert_eq!(2, reg::FTX0.get(w, "MODE").unwrap());
}

#[test]
fn over_wide_values_truncate() {
    let hold = Field::new("HOLD", 0, 6);
    assert_eq!(0x3F & 100, reg::encode(&[(hold, 100)]));
    assert_eq!(36, reg::decode(reg::encode(&[(hold, 100)]), &hold));
    // truncation never spills into the neighbouring field
    let w = reg::time_word(0xFFFF, 0, 0);
    assert_eq!(0x003F, w);
    assert_eq!(0, TIME.get(w, "RECH").unwrap());
    let en = reg::FEND.field("EN").unwrap();
    assert_eq!(0x8000, en.encode(3));
}

#[test]
fn unknown_field_is_an_error() {
    assert!(reg::TIME.encode_named([("HOLD", 1), ("HLOD", 2)]).is_err());
    assert!(reg::TIME.get(0, "NOPE").is_err());
}

#[test]
fn describe_for_logs() {
    assert_eq!("TIME[HOLD=50 RECH=10 FLAG=2]", TIME.describe(reg::time_word(50, 10, 2)));
}
