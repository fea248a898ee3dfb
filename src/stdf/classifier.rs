//! Maps `(REC_TYP, REC_SUB)` header bytes to logical record kinds.

use crate::constants::record_types as rt;
use crate::models::RecordKind;

/// Classify a record header. Pairs without a schema are `Unknown`.
pub fn classify(type_byte: u8, subtype_byte: u8) -> RecordKind {
    match (type_byte, subtype_byte) {
        rt::FAR => RecordKind::Far,
        rt::ATR => RecordKind::Atr,
        rt::MIR => RecordKind::Mir,
        rt::MRR => RecordKind::Mrr,
        rt::PCR => RecordKind::Pcr,
        rt::HBR => RecordKind::Hbr,
        rt::SBR => RecordKind::Sbr,
        rt::PMR => RecordKind::Pmr,
        rt::PGR => RecordKind::Pgr,
        rt::RDR => RecordKind::Rdr,
        rt::SDR => RecordKind::Sdr,
        rt::WIR => RecordKind::Wir,
        rt::WRR => RecordKind::Wrr,
        rt::WCR => RecordKind::Wcr,
        rt::PIR => RecordKind::Pir,
        rt::PRR => RecordKind::Prr,
        rt::TSR => RecordKind::Tsr,
        rt::PTR => RecordKind::Ptr,
        rt::MPR => RecordKind::Mpr,
        rt::FTR => RecordKind::Ftr,
        rt::BPS => RecordKind::Bps,
        rt::EPS => RecordKind::Eps,
        rt::DTR => RecordKind::Dtr,
        _ => RecordKind::Unknown,
    }
}

/// Header pair for a kind; `None` for `Unknown`
pub fn type_pair(kind: RecordKind) -> Option<(u8, u8)> {
    let pair = match kind {
        RecordKind::Far => rt::FAR,
        RecordKind::Atr => rt::ATR,
        RecordKind::Mir => rt::MIR,
        RecordKind::Mrr => rt::MRR,
        RecordKind::Pcr => rt::PCR,
        RecordKind::Hbr => rt::HBR,
        RecordKind::Sbr => rt::SBR,
        RecordKind::Pmr => rt::PMR,
        RecordKind::Pgr => rt::PGR,
        RecordKind::Rdr => rt::RDR,
        RecordKind::Sdr => rt::SDR,
        RecordKind::Wir => rt::WIR,
        RecordKind::Wrr => rt::WRR,
        RecordKind::Wcr => rt::WCR,
        RecordKind::Pir => rt::PIR,
        RecordKind::Prr => rt::PRR,
        RecordKind::Tsr => rt::TSR,
        RecordKind::Ptr => rt::PTR,
        RecordKind::Mpr => rt::MPR,
        RecordKind::Ftr => rt::FTR,
        RecordKind::Bps => rt::BPS,
        RecordKind::Eps => rt::EPS,
        RecordKind::Dtr => rt::DTR,
        RecordKind::Unknown => return None,
    };
    Some(pair)
}
