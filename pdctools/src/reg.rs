//! Register codec: named bit fields packed into 16-bit hardware words
//!
//! Every PDC and controller register is a 16-bit word made of named fields.
//! Encoding masks each value to the width of its field, so an over-wide value
//! is silently truncated modulo `2^width`. Decoding is the exact inverse for
//! values that fit.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A named bit range inside a register word
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Field {
    pub name: &'static str,
    pub offset: u8,
    pub width: u8,
}

impl Field {
    pub const fn new(name: &'static str, offset: u8, width: u8) -> Self {
        Field { name, offset, width }
    }

    /// Unshifted mask covering `width` bits
    #[inline]
    pub fn mask(&self) -> u16 {
        ((1u32 << self.width) - 1) as u16
    }

    /// Mask of the bits this field occupies in the word
    #[inline]
    pub fn span(&self) -> u16 {
        self.mask() << self.offset
    }

    #[inline]
    pub fn encode(&self, value: u32) -> u16 {
        ((value & self.mask() as u32) as u16) << self.offset
    }

    #[inline]
    pub fn decode(&self, word: u16) -> u16 {
        (word >> self.offset) & self.mask()
    }
}

/// OR-combine field values into one word. Fields not listed stay 0.
pub fn encode(fields: &[(Field, u32)]) -> u16 {
    fields.iter().fold(0, |w, (f, v)| w | f.encode(*v))
}

pub fn decode(word: u16, field: &Field) -> u16 {
    field.decode(word)
}

/// The field layout of one named register
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Layout {
    pub register: &'static str,
    pub fields: &'static [Field],
}

impl Layout {
    pub fn field(&self, name: &str) -> Option<&'static Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Encode fields given by name, as found in run files.
    ///
    /// An unknown name is an error: dropping it would silently change the
    /// programmed word.
    pub fn encode_named<'a, I>(&self, values: I) -> Result<u16>
    where
        I: IntoIterator<Item = (&'a str, u32)>,
    {
        let mut w = 0u16;
        for (name, value) in values {
            match self.field(name) {
                Some(f) => w |= f.encode(value),
                None => bail!("register {} has no field {}", self.register, name),
            }
        }
        Ok(w)
    }

    pub fn get(&self, word: u16, name: &str) -> Result<u16> {
        match self.field(name) {
            Some(f) => Ok(f.decode(word)),
            None => bail!("register {} has no field {}", self.register, name),
        }
    }

    pub fn decode_all(&self, word: u16) -> Vec<(&'static str, u16)> {
        self.fields.iter().map(|f| (f.name, f.decode(word))).collect()
    }

    /// Human readable `NAME=value` listing, for logs
    pub fn describe(&self, word: u16) -> String {
        let parts: Vec<String> = self
            .decode_all(word)
            .into_iter()
            .map(|(n, v)| format!("{}={}", n, v))
            .collect();
        format!("{}[{}]", self.register, parts.join(" "))
    }
}

// PDC registers

pub const TIME: Layout = Layout {
    register: "TIME",
    fields: &[
        Field::new("HOLD", 0, 6),
        Field::new("RECH", 6, 5),
        Field::new("FLAG", 11, 5),
    ],
};

pub const PIXL: Layout = Layout {
    register: "PIXL",
    fields: &[
        Field::new("ACTIVE_QC_EN", 1, 1),
        Field::new("TRG_DGTL_FEN", 4, 1),
        Field::new("FLAG_EN", 8, 1),
        Field::new("EDGE_LVLN", 12, 1),
        Field::new("DIS_MEM", 13, 1),
    ],
};

const OUT_FIELDS: &[Field] = &[Field::new("DATA", 0, 5), Field::new("FLAG", 6, 5)];

pub const OUTD: Layout = Layout { register: "OUTD", fields: OUT_FIELDS };
pub const OUTF: Layout = Layout { register: "OUTF", fields: OUT_FIELDS };
pub const OUTC: Layout = Layout { register: "OUTC", fields: OUT_FIELDS };

// Controller FSM registers

pub const TOUT: Layout = Layout {
    register: "TOUT",
    fields: &[
        Field::new("PRD", 0, 10),
        Field::new("RETRY", 12, 2),
        Field::new("A1O0", 14, 1),
        Field::new("AUTO", 15, 1),
    ],
};

pub const FEND: Layout = Layout {
    register: "FEND",
    fields: &[
        Field::new("DELAY", 0, 8),
        Field::new("MODE", 8, 2),
        Field::new("EN", 15, 1),
    ],
};

const TX1_FIELDS: &[Field] = &[
    Field::new("N", 0, 8),
    Field::new("CANCEL_MODE", 8, 7),
    Field::new("CNL_SEND_RSTN", 15, 1),
];

pub const FTX1: Layout = Layout { register: "FTX1", fields: TX1_FIELDS };
pub const ATX1: Layout = Layout { register: "ATX1", fields: TX1_FIELDS };

pub const FTX0: Layout = Layout {
    register: "FTX0",
    fields: &[
        Field::new("CMD_DELAY", 0, 8),
        Field::new("MODE", 8, 2),
        Field::new("CMD_MODE", 10, 1),
        Field::new("EN", 15, 1),
    ],
};

pub const ATX0: Layout = Layout {
    register: "ATX0",
    fields: &[
        Field::new("CMD_DELAY", 0, 8),
        Field::new("CMD_MODE", 8, 3),
        Field::new("MODE", 11, 2),
        Field::new("EN", 15, 1),
    ],
};

pub const SLW1: Layout = Layout {
    register: "SLW1",
    fields: &[Field::new("N", 0, 8), Field::new("PRD", 8, 8)],
};

const ACQ0_FIELDS: &[Field] = &[
    Field::new("DELAY", 0, 8),
    Field::new("MODE", 8, 3),
    Field::new("EN", 15, 1),
];

pub const SLW0: Layout = Layout { register: "SLW0", fields: ACQ0_FIELDS };
pub const FST0: Layout = Layout { register: "FST0", fields: ACQ0_FIELDS };

pub const FST1: Layout = Layout {
    register: "FST1",
    fields: &[Field::new("N", 0, 8)],
};

pub const FACQ: Layout = Layout {
    register: "FACQ",
    fields: &[
        Field::new("CMD_MODE", 0, 3),
        Field::new("OVERLAP", 4, 4),
        Field::new("CANCEL_MODE", 8, 7),
        Field::new("CNL_SEND_RSTN", 15, 1),
    ],
};

pub const FSMM: Layout = Layout {
    register: "FSMM",
    fields: &[
        Field::new("SEQ_START_MODE", 0, 2),
        Field::new("ACQ_ALL_PDC", 4, 1),
        Field::new("TX_ALL_PDC", 8, 1),
    ],
};

pub const MISC: Layout = Layout {
    register: "MISC",
    fields: &[Field::new("RAW", 0, 16)],
};

pub const AUXI: Layout = Layout {
    register: "AUXI",
    fields: &[
        Field::new("CH_SEL", 0, 4),
        Field::new("REV_POL", 8, 1),
        Field::new("FUNC_SEL", 12, 4),
    ],
};

// Controller ZPP timer: low-period high word carries the enable bit

pub const ZPL1: Layout = Layout {
    register: "ZPL1",
    fields: &[Field::new("TICKS_HI", 0, 15), Field::new("EN", 15, 1)],
};

pub static LAYOUTS: &[Layout] = &[
    TIME, PIXL, OUTD, OUTF, OUTC, TOUT, FEND, FTX1, FTX0, ATX1, ATX0, SLW1, SLW0, FST1, FST0,
    FACQ, FSMM, MISC, AUXI, ZPL1,
];

pub fn layout(register: &str) -> Option<&'static Layout> {
    LAYOUTS.iter().find(|l| l.register == register)
}

/// Pack the TIME register from raw field values (not nanoseconds)
pub fn time_word(hold: u32, rech: u32, flag: u32) -> u16 {
    encode(&[
        (TIME.fields[0], hold),
        (TIME.fields[1], rech),
        (TIME.fields[2], flag),
    ])
}

/// Pixel behavior bits of the PIXL register
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pixel {
    /// active quenching (false: passive)
    pub active_qc_en: bool,
    /// trigger from the digital path (false: front end)
    pub trg_dgtl_fen: bool,
    pub flag_en: bool,
    pub edge_lvln: bool,
    pub dis_mem: bool,
}

impl Pixel {
    pub fn word(&self) -> u16 {
        let f = PIXL.fields;
        encode(&[
            (f[0], self.active_qc_en as u32),
            (f[1], self.trg_dgtl_fen as u32),
            (f[2], self.flag_en as u32),
            (f[3], self.edge_lvln as u32),
            (f[4], self.dis_mem as u32),
        ])
    }

    pub fn from_word(w: u16) -> Self {
        let f = PIXL.fields;
        Pixel {
            active_qc_en: f[0].decode(w) == 1,
            trg_dgtl_fen: f[1].decode(w) == 1,
            flag_en: f[2].decode(w) == 1,
            edge_lvln: f[3].decode(w) == 1,
            dis_mem: f[4].decode(w) == 1,
        }
    }
}

/// Signals routable to the PDC DATA and FLAG outputs
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum OutMux {
    Flag = 0,
    ClkTx = 1,
    Data = 2,
    Trg = 3,
    Vss = 4,
    PixFlag = 5,
    PixQc = 6,
    PixSync = 7,
    SumLt = 8,
    SumIb = 9,
    SumGt = 10,
    SumEq = 11,
    ModeAcq = 12,
    ModeTrg = 13,
    ModeCfg = 14,
    ClkCs = 15,
    ClkSync = 16,
    ClkPipe = 17,
    FifoWrEn = 18,
    FifoRdEn = 19,
    TxDataValid = 20,
    FifoEmpty = 21,
    FifoOverwr = 22,
    FifoFull = 23,
    CfgClk = 24,
    CfgData = 25,
    CfgValid = 26,
    CmdValid = 27,
    PgVddFe = 28,
    PgVddAm = 29,
    PgVddQc = 30,
    Unused = 31,
}

/// Pack an output selection register (OUTD, OUTF or OUTC)
pub fn output_word(data: OutMux, flag: OutMux) -> u16 {
    encode(&[(OUT_FIELDS[0], data as u32), (OUT_FIELDS[1], flag as u32)])
}

/// PDC configuration registers, in address order
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PdcRegister {
    PIXL = 1,
    TIME = 2,
    ANLG = 3,
    STHH = 4,
    STHL = 5,
    ACQA = 6,
    ACQB = 7,
    DBGC = 8,
    FIFO = 9,
    DTXC = 10,
    OUTD = 11,
    OUTF = 12,
    OUTC = 13,
    TRGC = 14,
}

impl PdcRegister {
    pub const ALL: [PdcRegister; 14] = [
        PdcRegister::PIXL,
        PdcRegister::TIME,
        PdcRegister::ANLG,
        PdcRegister::STHH,
        PdcRegister::STHL,
        PdcRegister::ACQA,
        PdcRegister::ACQB,
        PdcRegister::DBGC,
        PdcRegister::FIFO,
        PdcRegister::DTXC,
        PdcRegister::OUTD,
        PdcRegister::OUTF,
        PdcRegister::OUTC,
        PdcRegister::TRGC,
    ];

    pub fn address(self) -> u8 {
        self as u8
    }

    /// Power-on value of the register
    pub fn default_word(self) -> u16 {
        match self {
            PdcRegister::PIXL => 0x1100,
            PdcRegister::TIME => 0xDEDE,
            PdcRegister::ANLG => 0x0000,
            PdcRegister::STHH => 0x0000,
            PdcRegister::STHL => 0x1FFF,
            PdcRegister::ACQA => 0x1432,
            PdcRegister::ACQB => 0x020A,
            PdcRegister::DBGC => 0x11CD,
            PdcRegister::FIFO => 0x007F,
            PdcRegister::DTXC => 0x00CC,
            PdcRegister::OUTD => 0x0082,
            PdcRegister::OUTF => 0x030C,
            PdcRegister::OUTC => 0x03DA,
            PdcRegister::TRGC => 0x0000,
        }
    }

    pub fn layout(self) -> Option<&'static Layout> {
        layout(&self.to_string())
    }
}

impl fmt::Display for PdcRegister {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_do_not_overlap() {
        for l in LAYOUTS {
            let mut seen = 0u16;
            for f in l.fields {
                assert!(f.offset as u32 + f.width as u32 <= 16, "{} {}", l.register, f.name);
                assert_eq!(0, seen & f.span(), "{} {}", l.register, f.name);
                seen |= f.span();
            }
        }
    }

    #[test]
    fn layouts_by_name() {
        for l in LAYOUTS {
            assert_eq!(Some(l), layout(l.register));
        }
        assert_eq!(None, layout("ZZZZ"));
        assert_eq!(Some(&TIME), PdcRegister::TIME.layout());
        assert_eq!(None, PdcRegister::ANLG.layout());
    }

    #[test]
    fn pixel_defaults() {
        let p = Pixel::from_word(PdcRegister::PIXL.default_word());
        assert!(p.flag_en);
        assert!(p.edge_lvln);
        assert!(!p.active_qc_en);
        assert_eq!(0x1100, p.word());
    }

    #[test]
    fn output_defaults() {
        // OUTD powers up routing DATA to both outputs
        assert_eq!(0x0082, output_word(OutMux::Data, OutMux::Data));
        assert_eq!(0x030C, output_word(OutMux::ModeAcq, OutMux::ModeAcq));
        assert_eq!(0x0104, output_word(OutMux::Vss, OutMux::Vss));
    }
}
