//! NMOS 6502 mnemonic tables and the addressing-mode encoder.
//!
//! Every mnemonic lists its (opcode, mode) candidates in a fixed order; the
//! encoder takes the first candidate whose syntax markers match and whose
//! operand fits. Candidates with an 8-bit operand are skipped while the
//! operand is unresolved (immediate mode excepted), so an instruction can
//! widen between passes but never shrink - shrinking would move every
//! following address and the passes could oscillate.

use super::Assembler;
use super::error::ErrorKind;
use super::expr::Prec;
use super::output::CoverageTag;
use super::scanner::Cursor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrMode {
    Acc,
    Imm,
    Ind,
    IndX,
    IndY,
    ZpX,
    ZpY,
    AbsX,
    AbsY,
    Zp,
    Abs,
    Rel,
    Imp,
}

impl AddrMode {
    pub fn operand_size(self) -> usize {
        match self {
            AddrMode::Acc | AddrMode::Imp => 0,
            AddrMode::Imm
            | AddrMode::IndX
            | AddrMode::IndY
            | AddrMode::ZpX
            | AddrMode::ZpY
            | AddrMode::Zp
            | AddrMode::Rel => 1,
            AddrMode::Ind | AddrMode::AbsX | AddrMode::AbsY | AddrMode::Abs => 2,
        }
    }

    /// Syntax before the operand expression.
    fn head(self) -> Option<char> {
        match self {
            AddrMode::Imm => Some('#'),
            AddrMode::Ind | AddrMode::IndX | AddrMode::IndY => Some('('),
            _ => None,
        }
    }

    /// Syntax after the operand expression (the whole operand for Acc).
    fn tail(self) -> &'static str {
        match self {
            AddrMode::Acc => "A",
            AddrMode::Ind => ")",
            AddrMode::IndX => ",X)",
            AddrMode::IndY => "),Y",
            AddrMode::ZpX | AddrMode::AbsX => ",X",
            AddrMode::ZpY | AddrMode::AbsY => ",Y",
            _ => "",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stability {
    /// Documented, or an illegal opcode with dependable behavior.
    Stable,
    /// Unstable in certain matters; gated behind UNSTABLE.
    Unstable,
    /// Results not predictable on some machines; gated behind HUNSTABLE.
    HighlyUnstable,
}

pub struct Mnemonic {
    pub name: &'static str,
    pub stability: Stability,
    pub modes: &'static [(u8, AddrMode)],
}

pub fn find(name: &str) -> Option<&'static Mnemonic> {
    MNEMONICS.iter().find(|m| m.name == name)
}

use AddrMode::*;
use Stability::*;

#[rustfmt::skip]
static MNEMONICS: &[Mnemonic] = &[
    Mnemonic { name: "BRK", stability: Stable, modes: &[(0x00, Imm), (0x00, Zp), (0x00, Imp)] },
    Mnemonic { name: "PHP", stability: Stable, modes: &[(0x08, Imp)] },
    Mnemonic { name: "BPL", stability: Stable, modes: &[(0x10, Rel)] },
    Mnemonic { name: "CLC", stability: Stable, modes: &[(0x18, Imp)] },
    Mnemonic { name: "JSR", stability: Stable, modes: &[(0x20, Abs)] },
    Mnemonic { name: "PLP", stability: Stable, modes: &[(0x28, Imp)] },
    Mnemonic { name: "BMI", stability: Stable, modes: &[(0x30, Rel)] },
    Mnemonic { name: "SEC", stability: Stable, modes: &[(0x38, Imp)] },
    Mnemonic { name: "RTI", stability: Stable, modes: &[(0x40, Imp)] },
    Mnemonic { name: "PHA", stability: Stable, modes: &[(0x48, Imp)] },
    Mnemonic { name: "BVC", stability: Stable, modes: &[(0x50, Rel)] },
    Mnemonic { name: "CLI", stability: Stable, modes: &[(0x58, Imp)] },
    Mnemonic { name: "RTS", stability: Stable, modes: &[(0x60, Imp)] },
    Mnemonic { name: "PLA", stability: Stable, modes: &[(0x68, Imp)] },
    Mnemonic { name: "BVS", stability: Stable, modes: &[(0x70, Rel)] },
    Mnemonic { name: "SEI", stability: Stable, modes: &[(0x78, Imp)] },
    Mnemonic { name: "DEY", stability: Stable, modes: &[(0x88, Imp)] },
    Mnemonic { name: "BCC", stability: Stable, modes: &[(0x90, Rel)] },
    Mnemonic { name: "TYA", stability: Stable, modes: &[(0x98, Imp)] },
    Mnemonic { name: "LDY", stability: Stable, modes: &[(0xA0, Imm), (0xB4, ZpX), (0xBC, AbsX), (0xA4, Zp), (0xAC, Abs)] },
    Mnemonic { name: "TAY", stability: Stable, modes: &[(0xA8, Imp)] },
    Mnemonic { name: "BCS", stability: Stable, modes: &[(0xB0, Rel)] },
    Mnemonic { name: "CLV", stability: Stable, modes: &[(0xB8, Imp)] },
    Mnemonic { name: "CPY", stability: Stable, modes: &[(0xC0, Imm), (0xC4, Zp), (0xCC, Abs)] },
    Mnemonic { name: "INY", stability: Stable, modes: &[(0xC8, Imp)] },
    Mnemonic { name: "BNE", stability: Stable, modes: &[(0xD0, Rel)] },
    Mnemonic { name: "CLD", stability: Stable, modes: &[(0xD8, Imp)] },
    Mnemonic { name: "CPX", stability: Stable, modes: &[(0xE0, Imm), (0xE4, Zp), (0xEC, Abs)] },
    Mnemonic { name: "INX", stability: Stable, modes: &[(0xE8, Imp)] },
    Mnemonic { name: "BEQ", stability: Stable, modes: &[(0xF0, Rel)] },
    Mnemonic { name: "SED", stability: Stable, modes: &[(0xF8, Imp)] },
    Mnemonic { name: "ORA", stability: Stable, modes: &[(0x09, Imm), (0x01, IndX), (0x11, IndY), (0x15, ZpX), (0x1D, AbsX), (0x19, AbsY), (0x05, Zp), (0x0D, Abs)] },
    Mnemonic { name: "AND", stability: Stable, modes: &[(0x29, Imm), (0x21, IndX), (0x31, IndY), (0x35, ZpX), (0x3D, AbsX), (0x39, AbsY), (0x25, Zp), (0x2D, Abs)] },
    Mnemonic { name: "EOR", stability: Stable, modes: &[(0x49, Imm), (0x41, IndX), (0x51, IndY), (0x55, ZpX), (0x5D, AbsX), (0x59, AbsY), (0x45, Zp), (0x4D, Abs)] },
    Mnemonic { name: "ADC", stability: Stable, modes: &[(0x69, Imm), (0x61, IndX), (0x71, IndY), (0x75, ZpX), (0x7D, AbsX), (0x79, AbsY), (0x65, Zp), (0x6D, Abs)] },
    Mnemonic { name: "STA", stability: Stable, modes: &[(0x81, IndX), (0x91, IndY), (0x95, ZpX), (0x9D, AbsX), (0x99, AbsY), (0x85, Zp), (0x8D, Abs)] },
    Mnemonic { name: "LDA", stability: Stable, modes: &[(0xA9, Imm), (0xA1, IndX), (0xB1, IndY), (0xB5, ZpX), (0xBD, AbsX), (0xB9, AbsY), (0xA5, Zp), (0xAD, Abs)] },
    Mnemonic { name: "CMP", stability: Stable, modes: &[(0xC9, Imm), (0xC1, IndX), (0xD1, IndY), (0xD5, ZpX), (0xDD, AbsX), (0xD9, AbsY), (0xC5, Zp), (0xCD, Abs)] },
    Mnemonic { name: "SBC", stability: Stable, modes: &[(0xE9, Imm), (0xE1, IndX), (0xF1, IndY), (0xF5, ZpX), (0xFD, AbsX), (0xF9, AbsY), (0xE5, Zp), (0xED, Abs)] },
    Mnemonic { name: "ASL", stability: Stable, modes: &[(0x0A, Acc), (0x16, ZpX), (0x1E, AbsX), (0x06, Zp), (0x0E, Abs), (0x0A, Imp)] },
    Mnemonic { name: "ROL", stability: Stable, modes: &[(0x2A, Acc), (0x36, ZpX), (0x3E, AbsX), (0x26, Zp), (0x2E, Abs), (0x2A, Imp)] },
    Mnemonic { name: "LSR", stability: Stable, modes: &[(0x4A, Acc), (0x56, ZpX), (0x5E, AbsX), (0x46, Zp), (0x4E, Abs), (0x4A, Imp)] },
    Mnemonic { name: "ROR", stability: Stable, modes: &[(0x6A, Acc), (0x76, ZpX), (0x7E, AbsX), (0x66, Zp), (0x6E, Abs), (0x6A, Imp)] },
    Mnemonic { name: "TXA", stability: Stable, modes: &[(0x8A, Imp)] },
    Mnemonic { name: "TXS", stability: Stable, modes: &[(0x9A, Imp)] },
    Mnemonic { name: "LDX", stability: Stable, modes: &[(0xA2, Imm), (0xB6, ZpY), (0xBE, AbsY), (0xA6, Zp), (0xAE, Abs)] },
    Mnemonic { name: "TAX", stability: Stable, modes: &[(0xAA, Imp)] },
    Mnemonic { name: "TSX", stability: Stable, modes: &[(0xBA, Imp)] },
    Mnemonic { name: "DEX", stability: Stable, modes: &[(0xCA, Imp)] },
    Mnemonic { name: "NOP", stability: Stable, modes: &[(0xEA, Imp)] },
    Mnemonic { name: "BIT", stability: Stable, modes: &[(0x24, Zp), (0x2C, Abs)] },
    Mnemonic { name: "JMP", stability: Stable, modes: &[(0x6C, Ind), (0x4C, Abs)] },
    Mnemonic { name: "STY", stability: Stable, modes: &[(0x94, ZpX), (0x84, Zp), (0x8C, Abs)] },
    Mnemonic { name: "STX", stability: Stable, modes: &[(0x96, ZpY), (0x86, Zp), (0x8E, Abs)] },
    Mnemonic { name: "DEC", stability: Stable, modes: &[(0xD6, ZpX), (0xDE, AbsX), (0xC6, Zp), (0xCE, Abs)] },
    Mnemonic { name: "INC", stability: Stable, modes: &[(0xF6, ZpX), (0xFE, AbsX), (0xE6, Zp), (0xEE, Abs)] },

    // Undocumented/illegal opcodes (NMOS 6502 only)
    Mnemonic { name: "SLO", stability: Stable, modes: &[(0x07, Zp), (0x17, ZpX), (0x03, IndX), (0x13, IndY), (0x0F, Abs), (0x1F, AbsX), (0x1B, AbsY)] },
    Mnemonic { name: "RLA", stability: Stable, modes: &[(0x27, Zp), (0x37, ZpX), (0x23, IndX), (0x33, IndY), (0x2F, Abs), (0x3F, AbsX), (0x3B, AbsY)] },
    Mnemonic { name: "SRE", stability: Stable, modes: &[(0x47, Zp), (0x57, ZpX), (0x43, IndX), (0x53, IndY), (0x4F, Abs), (0x5F, AbsX), (0x5B, AbsY)] },
    Mnemonic { name: "RRA", stability: Stable, modes: &[(0x67, Zp), (0x77, ZpX), (0x63, IndX), (0x73, IndY), (0x6F, Abs), (0x7F, AbsX), (0x7B, AbsY)] },
    Mnemonic { name: "SAX", stability: Stable, modes: &[(0x87, Zp), (0x97, ZpY), (0x83, IndX), (0x8F, Abs)] },
    Mnemonic { name: "LAX", stability: Stable, modes: &[(0xA7, Zp), (0xB7, ZpY), (0xA3, IndX), (0xB3, IndY), (0xAF, Abs), (0xBF, AbsY)] },
    Mnemonic { name: "DCP", stability: Stable, modes: &[(0xC7, Zp), (0xD7, ZpX), (0xC3, IndX), (0xD3, IndY), (0xCF, Abs), (0xDF, AbsX), (0xDB, AbsY)] },
    Mnemonic { name: "ISC", stability: Stable, modes: &[(0xE7, Zp), (0xF7, ZpX), (0xE3, IndX), (0xF3, IndY), (0xEF, Abs), (0xFF, AbsX), (0xFB, AbsY)] },
    Mnemonic { name: "ANC", stability: Stable, modes: &[(0x0B, Imm)] },
    Mnemonic { name: "ALR", stability: Stable, modes: &[(0x4B, Imm)] },
    Mnemonic { name: "ARR", stability: Stable, modes: &[(0x6B, Imm)] },
    Mnemonic { name: "AXS", stability: Stable, modes: &[(0xCB, Imm)] },
    Mnemonic { name: "LAS", stability: Stable, modes: &[(0xBB, AbsY)] },

    // Unstable in certain matters
    Mnemonic { name: "AHX", stability: Unstable, modes: &[(0x93, IndY), (0x9F, AbsY)] },
    Mnemonic { name: "SHY", stability: Unstable, modes: &[(0x9C, AbsX)] },
    Mnemonic { name: "SHX", stability: Unstable, modes: &[(0x9E, AbsY)] },
    Mnemonic { name: "TAS", stability: Unstable, modes: &[(0x9B, AbsY)] },

    // Highly unstable (results are not predictable on some machines)
    Mnemonic { name: "XAA", stability: HighlyUnstable, modes: &[(0x8B, Imm)] },
];

impl Assembler {
    /// Encode one instruction, trying the mnemonic's candidates in order.
    pub(crate) fn encode(
        &mut self,
        m: &'static Mnemonic,
        cur: &mut Cursor,
    ) -> Result<(), ErrorKind> {
        match m.stability {
            Stability::Unstable if !self.allow_unstable => {
                return Err(ErrorKind::UnstableOpcode);
            }
            Stability::HighlyUnstable if !self.allow_hunstable => {
                return Err(ErrorKind::HighlyUnstableOpcode);
            }
            _ => {}
        }
        let saved_nap = self.need_another_pass;
        let mut last_err = None;
        for &(code, mode) in m.modes {
            self.need_another_pass = saved_nap;
            self.dependant = false;
            let mut c = cur.clone();
            match self.try_mode(code, mode, &mut c) {
                Ok(true) => {
                    *cur = c;
                    return Ok(());
                }
                Ok(false) => {}
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or(ErrorKind::Illegal))
    }

    /// Attempt one candidate. `Ok(false)` means the candidate does not
    /// match syntactically (or needs a wider operand) and the next one
    /// should be tried.
    fn try_mode(&mut self, code: u8, mode: AddrMode, c: &mut Cursor) -> Result<bool, ErrorKind> {
        let mut operand: i64 = 0;
        if !matches!(mode, Imp | Acc) {
            if let Some(h) = mode.head() {
                if !c.eat_char(h) {
                    return Ok(false);
                }
            }
            let val = match self.eval(c, Prec::WholeExp) {
                Ok(v) => v,
                Err(e) => {
                    if mode == Rel {
                        // Keep following addresses stable even when the
                        // branch operand does not parse.
                        let _ = self.emit(&[code, 0], CoverageTag::Code);
                    }
                    return Err(e);
                }
            };
            if mode == Rel {
                if !c.at_end() {
                    return Ok(false);
                }
                if self.pc > 0xFFFF {
                    return Err(ErrorKind::PcOutOfRange);
                }
                let mut range_err = None;
                if !self.dependant {
                    operand = val - (self.pc + 2);
                    if !(-128..=127).contains(&operand) {
                        self.need_another_pass = true;
                        if self.last_chance {
                            range_err = Some(ErrorKind::BranchOutOfRange);
                        }
                    }
                }
                self.emit(&[code, operand as u8], CoverageTag::Code)?;
                return match range_err {
                    Some(e) => Err(e),
                    None => Ok(true),
                };
            }
            match mode.operand_size() {
                1 => {
                    if !self.dependant {
                        if val > 255 || val < -128 {
                            return Ok(false);
                        }
                    } else if mode != Imm {
                        // Default to the absolute encoding so a late
                        // resolution can't shrink the instruction.
                        return Ok(false);
                    }
                }
                _ => {
                    if !self.dependant && (val > 65535 || val < -32768) {
                        return Err(ErrorKind::OutOfRange);
                    }
                }
            }
            operand = val;
        }
        for t in mode.tail().chars() {
            if !eat_char_ci(c, t) {
                return Ok(false);
            }
        }
        if !c.at_end() {
            return Ok(false);
        }
        if self.pc > 0xFFFF {
            return Err(ErrorKind::PcOutOfRange);
        }
        match mode.operand_size() {
            0 => self.emit(&[code], CoverageTag::Code)?,
            1 => self.emit(&[code, operand as u8], CoverageTag::Code)?,
            _ => self.emit(&[code, operand as u8, (operand >> 8) as u8], CoverageTag::Code)?,
        }
        Ok(true)
    }
}

/// Register and accumulator markers match either case.
fn eat_char_ci(c: &mut Cursor, t: char) -> bool {
    c.eat_char(t) || c.eat_char(t.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_uppercase_only() {
        assert!(find("LDA").is_some());
        assert!(find("lda").is_none());
        assert!(find("LDQ").is_none());
    }

    #[test]
    fn candidate_order_prefers_zero_page_last_for_loads() {
        let lda = find("LDA").unwrap();
        let modes: Vec<AddrMode> = lda.modes.iter().map(|&(_, m)| m).collect();
        let zp = modes.iter().position(|&m| m == Zp).unwrap();
        let abs = modes.iter().position(|&m| m == Abs).unwrap();
        assert!(zp < abs);
    }

    #[test]
    fn operand_sizes() {
        assert_eq!(Imp.operand_size(), 0);
        assert_eq!(Imm.operand_size(), 1);
        assert_eq!(Abs.operand_size(), 2);
        assert_eq!(Rel.operand_size(), 1);
    }

    #[test]
    fn unstable_gating_classes() {
        assert_eq!(find("SHX").unwrap().stability, Stability::Unstable);
        assert_eq!(find("XAA").unwrap().stability, Stability::HighlyUnstable);
        assert_eq!(find("LAX").unwrap().stability, Stability::Stable);
    }
}
