//! Static field schemas for every decodable STDF V4 record kind.
//!
//! Fields are positional on the wire, so each table lists them in exactly
//! the order STDF V4 defines. Array fields name the earlier field holding
//! their element count.

use crate::constants::{INVALID_BIN, INVALID_COORD};
use crate::models::{FieldValue, RecordKind};

/// Binary encoding of one field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    U1,
    U2,
    U4,
    I1,
    I2,
    I4,
    R4,
    R8,
    /// One byte of flag bits
    B1,
    /// One character
    C1,
    /// 1-byte length, then text
    Cn,
    /// 1-byte length, then bytes
    Bn,
    /// 2-byte bit count, then `ceil(bits / 8)` bytes
    Dn,
    U1Array,
    U2Array,
    R4Array,
    /// Packed nibbles, two per byte, low nibble first
    N1Array,
}

impl FieldType {
    pub fn is_array(&self) -> bool {
        matches!(
            self,
            FieldType::U1Array | FieldType::U2Array | FieldType::R4Array | FieldType::N1Array
        )
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            FieldType::U1
                | FieldType::U2
                | FieldType::U4
                | FieldType::I1
                | FieldType::I2
                | FieldType::I4
                | FieldType::B1
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub ty: FieldType,
    /// Field holding the element count, for array types
    pub count_field: Option<&'static str>,
    /// Value used when the payload ends before this field
    pub missing: Option<i64>,
}

impl FieldSpec {
    /// Value this field takes when omitted from the end of a payload
    pub fn sentinel(&self) -> FieldValue {
        let int = self.missing.unwrap_or(0);
        match self.ty {
            FieldType::U1 | FieldType::B1 => FieldValue::U1(int as u8),
            FieldType::U2 => FieldValue::U2(int as u16),
            FieldType::U4 => FieldValue::U4(int as u32),
            FieldType::I1 => FieldValue::I1(int as i8),
            FieldType::I2 => FieldValue::I2(int as i16),
            FieldType::I4 => FieldValue::I4(int as i32),
            FieldType::R4 => FieldValue::R4(0.0),
            FieldType::R8 => FieldValue::R8(0.0),
            FieldType::C1 => FieldValue::Char(b' '),
            FieldType::Cn => FieldValue::Text(String::new()),
            FieldType::Bn => FieldValue::Bytes(Vec::new()),
            FieldType::Dn => FieldValue::Bits {
                bit_count: 0,
                bytes: Vec::new(),
            },
            FieldType::U1Array => FieldValue::U1Array(Vec::new()),
            FieldType::U2Array => FieldValue::U2Array(Vec::new()),
            FieldType::R4Array => FieldValue::R4Array(Vec::new()),
            FieldType::N1Array => FieldValue::Nibbles(Vec::new()),
        }
    }
}

#[derive(Debug, PartialEq)]
pub struct RecordSchema {
    pub kind: RecordKind,
    pub fields: &'static [FieldSpec],
}

impl RecordSchema {
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }
}

const fn field(name: &'static str, ty: FieldType) -> FieldSpec {
    FieldSpec {
        name,
        ty,
        count_field: None,
        missing: None,
    }
}

const fn array(name: &'static str, ty: FieldType, count_field: &'static str) -> FieldSpec {
    FieldSpec {
        name,
        ty,
        count_field: Some(count_field),
        missing: None,
    }
}

const fn with_missing(name: &'static str, ty: FieldType, missing: i64) -> FieldSpec {
    FieldSpec {
        name,
        ty,
        count_field: None,
        missing: Some(missing),
    }
}

use FieldType::*;

static FAR: RecordSchema = RecordSchema {
    kind: RecordKind::Far,
    fields: &[field("CPU_TYPE", U1), field("STDF_VER", U1)],
};

static ATR: RecordSchema = RecordSchema {
    kind: RecordKind::Atr,
    fields: &[field("MOD_TIM", U4), field("CMD_LINE", Cn)],
};

static MIR: RecordSchema = RecordSchema {
    kind: RecordKind::Mir,
    fields: &[
        field("SETUP_T", U4),
        field("START_T", U4),
        field("STAT_NUM", U1),
        field("MODE_COD", C1),
        field("RTST_COD", C1),
        field("PROT_COD", C1),
        with_missing("BURN_TIM", U2, 65535),
        field("CMOD_COD", C1),
        field("LOT_ID", Cn),
        field("PART_TYP", Cn),
        field("NODE_NAM", Cn),
        field("TSTR_TYP", Cn),
        field("JOB_NAM", Cn),
        field("JOB_REV", Cn),
        field("SBLOT_ID", Cn),
        field("OPER_NAM", Cn),
        field("EXEC_TYP", Cn),
        field("EXEC_VER", Cn),
        field("TEST_COD", Cn),
        field("TST_TEMP", Cn),
        field("USER_TXT", Cn),
        field("AUX_FILE", Cn),
        field("PKG_TYP", Cn),
        field("FAMLY_ID", Cn),
        field("DATE_COD", Cn),
        field("FACIL_ID", Cn),
        field("FLOOR_ID", Cn),
        field("PROC_ID", Cn),
        field("OPER_FRQ", Cn),
        field("SPEC_NAM", Cn),
        field("SPEC_VER", Cn),
        field("FLOW_ID", Cn),
        field("SETUP_ID", Cn),
        field("DSGN_REV", Cn),
        field("ENG_ID", Cn),
        field("ROM_COD", Cn),
        field("SERL_NUM", Cn),
        field("SUPR_NAM", Cn),
    ],
};

static MRR: RecordSchema = RecordSchema {
    kind: RecordKind::Mrr,
    fields: &[
        field("FINISH_T", U4),
        field("DISP_COD", C1),
        field("USR_DESC", Cn),
        field("EXC_DESC", Cn),
    ],
};

static PCR: RecordSchema = RecordSchema {
    kind: RecordKind::Pcr,
    fields: &[
        field("HEAD_NUM", U1),
        field("SITE_NUM", U1),
        field("PART_CNT", U4),
        with_missing("RTST_CNT", U4, 4_294_967_295),
        with_missing("ABRT_CNT", U4, 4_294_967_295),
        with_missing("GOOD_CNT", U4, 4_294_967_295),
        with_missing("FUNC_CNT", U4, 4_294_967_295),
    ],
};

static HBR: RecordSchema = RecordSchema {
    kind: RecordKind::Hbr,
    fields: &[
        field("HEAD_NUM", U1),
        field("SITE_NUM", U1),
        field("HBIN_NUM", U2),
        field("HBIN_CNT", U4),
        field("HBIN_PF", C1),
        field("HBIN_NAM", Cn),
    ],
};

static SBR: RecordSchema = RecordSchema {
    kind: RecordKind::Sbr,
    fields: &[
        field("HEAD_NUM", U1),
        field("SITE_NUM", U1),
        field("SBIN_NUM", U2),
        field("SBIN_CNT", U4),
        field("SBIN_PF", C1),
        field("SBIN_NAM", Cn),
    ],
};

static PMR: RecordSchema = RecordSchema {
    kind: RecordKind::Pmr,
    fields: &[
        field("PMR_INDX", U2),
        field("CHAN_TYP", U2),
        field("CHAN_NAM", Cn),
        field("PHY_NAM", Cn),
        field("LOG_NAM", Cn),
        field("HEAD_NUM", U1),
        field("SITE_NUM", U1),
    ],
};

static PGR: RecordSchema = RecordSchema {
    kind: RecordKind::Pgr,
    fields: &[
        field("GRP_INDX", U2),
        field("GRP_NAM", Cn),
        field("INDX_CNT", U2),
        array("PMR_INDX", U2Array, "INDX_CNT"),
    ],
};

static RDR: RecordSchema = RecordSchema {
    kind: RecordKind::Rdr,
    fields: &[
        field("NUM_BINS", U2),
        array("RTST_BIN", U2Array, "NUM_BINS"),
    ],
};

static SDR: RecordSchema = RecordSchema {
    kind: RecordKind::Sdr,
    fields: &[
        field("HEAD_NUM", U1),
        field("SITE_GRP", U1),
        field("SITE_CNT", U1),
        array("SITE_NUM", U1Array, "SITE_CNT"),
        field("HAND_TYP", Cn),
        field("HAND_ID", Cn),
        field("CARD_TYP", Cn),
        field("CARD_ID", Cn),
        field("LOAD_TYP", Cn),
        field("LOAD_ID", Cn),
        field("DIB_TYP", Cn),
        field("DIB_ID", Cn),
        field("CABL_TYP", Cn),
        field("CABL_ID", Cn),
        field("CONT_TYP", Cn),
        field("CONT_ID", Cn),
        field("LASR_TYP", Cn),
        field("LASR_ID", Cn),
        field("EXTR_TYP", Cn),
        field("EXTR_ID", Cn),
    ],
};

static WIR: RecordSchema = RecordSchema {
    kind: RecordKind::Wir,
    fields: &[
        field("HEAD_NUM", U1),
        with_missing("SITE_GRP", U1, 255),
        field("START_T", U4),
        field("WAFER_ID", Cn),
    ],
};

static WRR: RecordSchema = RecordSchema {
    kind: RecordKind::Wrr,
    fields: &[
        field("HEAD_NUM", U1),
        with_missing("SITE_GRP", U1, 255),
        field("FINISH_T", U4),
        field("PART_CNT", U4),
        with_missing("RTST_CNT", U4, 4_294_967_295),
        with_missing("ABRT_CNT", U4, 4_294_967_295),
        with_missing("GOOD_CNT", U4, 4_294_967_295),
        with_missing("FUNC_CNT", U4, 4_294_967_295),
        field("WAFER_ID", Cn),
        field("FABWF_ID", Cn),
        field("FRAME_ID", Cn),
        field("MASK_ID", Cn),
        field("USR_DESC", Cn),
        field("EXC_DESC", Cn),
    ],
};

static WCR: RecordSchema = RecordSchema {
    kind: RecordKind::Wcr,
    fields: &[
        field("WAFR_SIZ", R4),
        field("DIE_HT", R4),
        field("DIE_WID", R4),
        field("WF_UNITS", U1),
        field("WF_FLAT", C1),
        with_missing("CENTER_X", I2, INVALID_COORD as i64),
        with_missing("CENTER_Y", I2, INVALID_COORD as i64),
        field("POS_X", C1),
        field("POS_Y", C1),
    ],
};

static PIR: RecordSchema = RecordSchema {
    kind: RecordKind::Pir,
    fields: &[field("HEAD_NUM", U1), field("SITE_NUM", U1)],
};

static PRR: RecordSchema = RecordSchema {
    kind: RecordKind::Prr,
    fields: &[
        field("HEAD_NUM", U1),
        field("SITE_NUM", U1),
        field("PART_FLG", B1),
        field("NUM_TEST", U2),
        field("HARD_BIN", U2),
        with_missing("SOFT_BIN", U2, INVALID_BIN as i64),
        with_missing("X_COORD", I2, INVALID_COORD as i64),
        with_missing("Y_COORD", I2, INVALID_COORD as i64),
        field("TEST_T", U4),
        field("PART_ID", Cn),
        field("PART_TXT", Cn),
        field("PART_FIX", Bn),
    ],
};

static TSR: RecordSchema = RecordSchema {
    kind: RecordKind::Tsr,
    fields: &[
        field("HEAD_NUM", U1),
        field("SITE_NUM", U1),
        field("TEST_TYP", C1),
        field("TEST_NUM", U4),
        with_missing("EXEC_CNT", U4, 4_294_967_295),
        with_missing("FAIL_CNT", U4, 4_294_967_295),
        with_missing("ALRM_CNT", U4, 4_294_967_295),
        field("TEST_NAM", Cn),
        field("SEQ_NAME", Cn),
        field("TEST_LBL", Cn),
        field("OPT_FLAG", B1),
        field("TEST_TIM", R4),
        field("TEST_MIN", R4),
        field("TEST_MAX", R4),
        field("TST_SUMS", R4),
        field("TST_SQRS", R4),
    ],
};

static PTR: RecordSchema = RecordSchema {
    kind: RecordKind::Ptr,
    fields: &[
        field("TEST_NUM", U4),
        field("HEAD_NUM", U1),
        field("SITE_NUM", U1),
        field("TEST_FLG", B1),
        field("PARM_FLG", B1),
        field("RESULT", R4),
        field("TEST_TXT", Cn),
        field("ALARM_ID", Cn),
        field("OPT_FLAG", B1),
        field("RES_SCAL", I1),
        field("LLM_SCAL", I1),
        field("HLM_SCAL", I1),
        field("LO_LIMIT", R4),
        field("HI_LIMIT", R4),
        field("UNITS", Cn),
        field("C_RESFMT", Cn),
        field("C_LLMFMT", Cn),
        field("C_HLMFMT", Cn),
        field("LO_SPEC", R4),
        field("HI_SPEC", R4),
    ],
};

static MPR: RecordSchema = RecordSchema {
    kind: RecordKind::Mpr,
    fields: &[
        field("TEST_NUM", U4),
        field("HEAD_NUM", U1),
        field("SITE_NUM", U1),
        field("TEST_FLG", B1),
        field("PARM_FLG", B1),
        field("RTN_ICNT", U2),
        field("RSLT_CNT", U2),
        array("RTN_STAT", N1Array, "RTN_ICNT"),
        array("RTN_RSLT", R4Array, "RSLT_CNT"),
        field("TEST_TXT", Cn),
        field("ALARM_ID", Cn),
        field("OPT_FLAG", B1),
        field("RES_SCAL", I1),
        field("LLM_SCAL", I1),
        field("HLM_SCAL", I1),
        field("LO_LIMIT", R4),
        field("HI_LIMIT", R4),
        field("START_IN", R4),
        field("INCR_IN", R4),
        array("RTN_INDX", U2Array, "RTN_ICNT"),
        field("UNITS", Cn),
        field("UNITS_IN", Cn),
        field("C_RESFMT", Cn),
        field("C_LLMFMT", Cn),
        field("C_HLMFMT", Cn),
        field("LO_SPEC", R4),
        field("HI_SPEC", R4),
    ],
};

static FTR: RecordSchema = RecordSchema {
    kind: RecordKind::Ftr,
    fields: &[
        field("TEST_NUM", U4),
        field("HEAD_NUM", U1),
        field("SITE_NUM", U1),
        field("TEST_FLG", B1),
        field("OPT_FLAG", B1),
        field("CYCL_CNT", U4),
        field("REL_VADR", U4),
        field("REPT_CNT", U4),
        field("NUM_FAIL", U4),
        field("XFAIL_AD", I4),
        field("YFAIL_AD", I4),
        field("VECT_OFF", I2),
        field("RTN_ICNT", U2),
        field("PGM_ICNT", U2),
        array("RTN_INDX", U2Array, "RTN_ICNT"),
        array("RTN_STAT", N1Array, "RTN_ICNT"),
        array("PGM_INDX", U2Array, "PGM_ICNT"),
        array("PGM_STAT", N1Array, "PGM_ICNT"),
        field("FAIL_PIN", Dn),
        field("VECT_NAM", Cn),
        field("TIME_SET", Cn),
        field("OP_CODE", Cn),
        field("TEST_TXT", Cn),
        field("ALARM_ID", Cn),
        field("PROG_TXT", Cn),
        field("RSLT_TXT", Cn),
        with_missing("PATG_NUM", U1, 255),
        field("SPIN_MAP", Dn),
    ],
};

static BPS: RecordSchema = RecordSchema {
    kind: RecordKind::Bps,
    fields: &[field("SEQ_NAME", Cn)],
};

static EPS: RecordSchema = RecordSchema {
    kind: RecordKind::Eps,
    fields: &[],
};

static DTR: RecordSchema = RecordSchema {
    kind: RecordKind::Dtr,
    fields: &[field("TEXT_DAT", Cn)],
};

/// Schema for a record kind; `None` for `Unknown`
pub fn schema_for(kind: RecordKind) -> Option<&'static RecordSchema> {
    let schema = match kind {
        RecordKind::Far => &FAR,
        RecordKind::Atr => &ATR,
        RecordKind::Mir => &MIR,
        RecordKind::Mrr => &MRR,
        RecordKind::Pcr => &PCR,
        RecordKind::Hbr => &HBR,
        RecordKind::Sbr => &SBR,
        RecordKind::Pmr => &PMR,
        RecordKind::Pgr => &PGR,
        RecordKind::Rdr => &RDR,
        RecordKind::Sdr => &SDR,
        RecordKind::Wir => &WIR,
        RecordKind::Wrr => &WRR,
        RecordKind::Wcr => &WCR,
        RecordKind::Pir => &PIR,
        RecordKind::Prr => &PRR,
        RecordKind::Tsr => &TSR,
        RecordKind::Ptr => &PTR,
        RecordKind::Mpr => &MPR,
        RecordKind::Ftr => &FTR,
        RecordKind::Bps => &BPS,
        RecordKind::Eps => &EPS,
        RecordKind::Dtr => &DTR,
        RecordKind::Unknown => return None,
    };
    Some(schema)
}
