//! Symbol-map exporters and the per-position comment store.
//!
//! Three text formats are produced from the final symbol table:
//! - per-bank label maps (`<out>.<bank>.nl` plus `<out>.ram.nl`), lines
//!   of `$ADDR#name#`, banks being 16 KiB of output file;
//! - a flat `name = 0xVALUE` map;
//! - a combined map with an address-class prefix per line
//!   (`P`rogram, `R`am, `W`ork, `S`ave, re`G`ister/global) and inline
//!   comments keyed by output position.
//!
//! Only global, non-hidden labels and values are exported; anonymous
//! labels, locals and macro parameters stay out.

use std::collections::BTreeMap;

use super::Assembler;
use super::symbols::{Symbol, SymbolKind};

/// Size of one PRG bank in the bank maps.
const BANK_SIZE: i64 = 16 * 1024;

/// Comments collected on the final pass, keyed by output position. Two
/// comments landing on the same position join with a newline.
#[derive(Default)]
pub struct Comments {
    map: BTreeMap<i64, String>,
}

impl Comments {
    pub fn new() -> Comments {
        Comments::default()
    }

    pub fn reset(&mut self) {
        self.map.clear();
    }

    pub fn add(&mut self, pos: i64, text: &str) {
        self.map
            .entry(pos)
            .and_modify(|t| {
                t.push('\n');
                t.push_str(text);
            })
            .or_insert_with(|| text.to_string());
    }

    pub fn get(&self, pos: i64) -> Option<&str> {
        self.map.get(&pos).map(String::as_str)
    }
}

fn exportable(sym: &Symbol) -> bool {
    !sym.hidden
        && sym.scope == 0
        && !sym.name.starts_with(['+', '-'])
        && matches!(
            sym.kind,
            SymbolKind::Label { .. } | SymbolKind::Value { .. }
        )
}

/// Does this symbol live in the output file (as opposed to RAM space)?
fn in_program(sym: &Symbol, data_offset: i64) -> bool {
    matches!(sym.kind, SymbolKind::Label { .. })
        && sym.pos >= data_offset
        && (0x8000..=0xFFFF).contains(&sym.value)
}

/// The flat `name = 0xVALUE` map (Lua-consumable).
pub fn flat_map(asm: &Assembler) -> String {
    let mut out = String::new();
    for sym in asm.symbols.iter().filter(|s| exportable(s)) {
        out.push_str(&format!("{} = 0x{:04X}\n", sym.name, sym.value & 0xFFFF));
    }
    out
}

/// The combined map with address classes and comments.
pub fn combined_map(asm: &Assembler) -> String {
    let offset = asm.data_offset();
    let mut out = String::new();
    for sym in asm.symbols.iter().filter(|s| exportable(s)) {
        if in_program(sym, offset) {
            let mut line = format!("P:{:X}:{}", sym.pos - offset, sym.name);
            if let Some(c) = asm.comments.get(sym.pos) {
                line.push(':');
                line.push_str(&c.replace('\n', "\\n"));
            }
            out.push_str(&line);
        } else {
            let class = match sym.value {
                v if (0..0x2000).contains(&v) => 'R',
                v if (0x6000..0x8000).contains(&v) => {
                    if asm.header.battery() { 'S' } else { 'W' }
                }
                _ => 'G',
            };
            out.push_str(&format!("{}:{:X}:{}", class, sym.value & 0xFFFF, sym.name));
        }
        out.push('\n');
    }
    out
}

/// The per-bank maps: `(suffix, content)` pairs, one per non-empty 16 KiB
/// bank of the output plus one for RAM-space symbols.
pub fn bank_maps(asm: &Assembler) -> Vec<(String, String)> {
    let offset = asm.data_offset();
    let mut banks: BTreeMap<i64, String> = BTreeMap::new();
    let mut ram = String::new();
    for sym in asm.symbols.iter().filter(|s| exportable(s)) {
        let line = format!("${:04X}#{}#\n", sym.value & 0xFFFF, sym.name);
        if in_program(sym, offset) {
            let bank = (sym.pos - offset) / BANK_SIZE;
            banks.entry(bank).or_default().push_str(&line);
        } else {
            ram.push_str(&line);
        }
    }
    let mut out: Vec<(String, String)> = banks
        .into_iter()
        .map(|(bank, text)| (format!("{bank:X}"), text))
        .collect();
    if !ram.is_empty() {
        out.push(("ram".to_string(), ram));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::{Assembler, Options};

    fn assembled(src: &str) -> Assembler {
        let mut asm = Assembler::new(Options::default());
        asm.run_source(src, "<test>").expect("source should assemble");
        asm
    }

    #[test]
    fn comments_join_at_same_position() {
        let mut c = Comments::new();
        c.add(0x10, "first");
        c.add(0x10, "second");
        c.add(0x20, "other");
        assert_eq!(c.get(0x10), Some("first\nsecond"));
        assert_eq!(c.get(0x20), Some("other"));
        assert_eq!(c.get(0x30), None);
    }

    #[test]
    fn flat_map_lists_globals_only() {
        let asm = assembled(
            "value = $0300\n\
             .org $8000\n\
             start:\n\
             @local:\n\
               lda value\n",
        );
        let map = flat_map(&asm);
        assert!(map.contains("value = 0x0300\n"));
        assert!(map.contains("start = 0x8000\n"));
        assert!(!map.contains("@local"));
    }

    #[test]
    fn hidden_symbols_stay_out_of_maps() {
        let asm = assembled(
            ".org $8000\n\
             .ignorenl\n\
             secret = $10\n\
             .endinl\n\
             shown = $20\n\
             .db 0\n",
        );
        let map = flat_map(&asm);
        assert!(!map.contains("secret"));
        assert!(map.contains("shown"));
    }

    #[test]
    fn program_labels_land_in_banks_by_file_position() {
        let asm = assembled(
            ".org $8000\n\
             early:\n\
             .dsb $4000\n\
             .base $8000\n\
             late:\n\
             .db 0\n",
        );
        let maps = bank_maps(&asm);
        let bank0 = maps.iter().find(|(s, _)| s == "0").expect("bank 0");
        let bank1 = maps.iter().find(|(s, _)| s == "1").expect("bank 1");
        assert!(bank0.1.contains("$8000#early#"));
        assert!(bank1.1.contains("$8000#late#"));
    }

    #[test]
    fn combined_map_classifies_by_address() {
        let asm = assembled(
            "zp = $10\n\
             wram = $6000\n\
             reg = $2002\n\
             .org $8000\n\
             entry:\n\
             .db 0\n",
        );
        let map = combined_map(&asm);
        assert!(map.contains("R:10:zp\n"));
        assert!(map.contains("W:6000:wram\n"));
        assert!(map.contains("G:2002:reg\n"));
        assert!(map.contains("P:0:entry\n"));
    }
}
