//! Directive dispatch and handlers.
//!
//! Directive names are case-insensitive and may carry a leading `.`; the
//! dispatch is a plain match over the uppercased word. Handlers parse
//! their own operands from the cursor and leave it at the end of what
//! they consumed, so the line processor can flag stray text.

use std::fs;

use super::error::ErrorKind;
use super::expr::Prec;
use super::header::validate_header;
use super::output::CoverageTag;
use super::scanner::Cursor;
use super::source::{LineCtx, MacroCapture, ReptCapture};
use super::symbols::SymbolKind;
use super::{Assembler, LabelSite, NO_ORIGIN, replace_ext};

/// Every directive in the source language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dir {
    Nothing,
    If,
    Elseif,
    Else,
    Endif,
    Ifdef,
    Ifndef,
    Equal,
    Equ,
    Org,
    Base,
    Pad,
    SeekAbs,
    SeekRel,
    SkipRel,
    Include,
    Incbin,
    Incnes,
    ClearPatch,
    Hex,
    Dw,
    Db,
    Dsw,
    Dsb,
    Align,
    Macro,
    Rept,
    Endm,
    Endr,
    Enum,
    Ende,
    IgnoreNl,
    EndInl,
    FillValue,
    Compare,
    EndCompare,
    Dl,
    Dh,
    Error,
    InesPrg,
    InesChr,
    InesMir,
    InesMap,
    IncInes,
    Nes2ChrRam,
    Nes2PrgRam,
    Nes2Sub,
    Nes2Tv,
    Nes2Vs,
    Nes2Bram,
    Nes2ChrBram,
    Unstable,
    Hunstable,
}

impl Dir {
    /// Resolve an uppercased word (without its optional `.`).
    pub fn lookup(name: &str) -> Option<Dir> {
        Some(match name {
            "IF" => Dir::If,
            "ELSEIF" => Dir::Elseif,
            "ELSE" => Dir::Else,
            "ENDIF" => Dir::Endif,
            "IFDEF" => Dir::Ifdef,
            "IFNDEF" => Dir::Ifndef,
            "EQU" => Dir::Equ,
            "ORG" => Dir::Org,
            "BASE" => Dir::Base,
            "PAD" => Dir::Pad,
            "SEEKABS" => Dir::SeekAbs,
            "SEEKREL" => Dir::SeekRel,
            "SKIPREL" => Dir::SkipRel,
            "INCLUDE" | "INCSRC" => Dir::Include,
            "INCBIN" | "BIN" => Dir::Incbin,
            "INCNES" => Dir::Incnes,
            "CLEARPATCH" => Dir::ClearPatch,
            "HEX" => Dir::Hex,
            "WORD" | "DW" | "DCW" | "DC.W" => Dir::Dw,
            "BYTE" | "DB" | "DCB" | "DC.B" => Dir::Db,
            "DSW" | "DS.W" => Dir::Dsw,
            "DSB" | "DS.B" => Dir::Dsb,
            "ALIGN" => Dir::Align,
            "MACRO" => Dir::Macro,
            "REPT" => Dir::Rept,
            "ENDM" => Dir::Endm,
            "ENDR" => Dir::Endr,
            "ENUM" => Dir::Enum,
            "ENDE" => Dir::Ende,
            "IGNORENL" => Dir::IgnoreNl,
            "ENDINL" => Dir::EndInl,
            "FILLVALUE" => Dir::FillValue,
            "COMPARE" => Dir::Compare,
            "ENDCOMPARE" => Dir::EndCompare,
            "DL" => Dir::Dl,
            "DH" => Dir::Dh,
            "ERROR" => Dir::Error,
            "INESPRG" => Dir::InesPrg,
            "INESCHR" => Dir::InesChr,
            "INESMIR" => Dir::InesMir,
            "INESMAP" => Dir::InesMap,
            "INCINES" => Dir::IncInes,
            "NES2CHRRAM" => Dir::Nes2ChrRam,
            "NES2PRGRAM" => Dir::Nes2PrgRam,
            "NES2SUB" => Dir::Nes2Sub,
            "NES2TV" => Dir::Nes2Tv,
            "NES2VS" => Dir::Nes2Vs,
            "NES2BRAM" => Dir::Nes2Bram,
            "NES2CHRBRAM" => Dir::Nes2ChrBram,
            "UNSTABLE" => Dir::Unstable,
            "HUNSTABLE" => Dir::Hunstable,
            _ => return None,
        })
    }
}

impl Assembler {
    pub(crate) fn directive(
        &mut self,
        d: Dir,
        cur: &mut Cursor,
        ctx: &LineCtx,
    ) -> Result<(), ErrorKind> {
        match d {
            Dir::Nothing => Ok(()),
            Dir::If => self.d_if(cur),
            Dir::Elseif => self.d_elseif(cur),
            Dir::Else => self.d_else(),
            Dir::Endif => self.d_endif(),
            Dir::Ifdef => self.d_ifdef(cur, false),
            Dir::Ifndef => self.d_ifdef(cur, true),
            Dir::Equal => self.d_equal(cur),
            Dir::Equ => self.d_equ(cur),
            Dir::Org => self.d_org(cur),
            Dir::Base => self.d_base(cur),
            Dir::Pad => self.d_pad(cur),
            Dir::SeekAbs => self.d_seekabs(cur),
            Dir::SeekRel => self.d_seek_relative(cur, true),
            Dir::SkipRel => self.d_seek_relative(cur, false),
            Dir::Include => self.d_include(cur),
            Dir::Incbin => self.d_incbin(cur),
            Dir::Incnes => self.d_incnes(cur),
            Dir::ClearPatch => self.output.clear_patch(),
            Dir::Hex => self.d_hex(cur),
            Dir::Dw => self.d_data(cur, DataWidth::Word),
            Dir::Db => self.d_data(cur, DataWidth::Byte),
            Dir::Dl => self.d_data(cur, DataWidth::Low),
            Dir::Dh => self.d_data(cur, DataWidth::High),
            Dir::Dsw => self.d_dsw(cur),
            Dir::Dsb => self.d_dsb(cur),
            Dir::Align => self.d_align(cur),
            Dir::Macro => self.d_macro(cur),
            Dir::Rept => self.d_rept(cur, ctx),
            Dir::Endm => Err(ErrorKind::ExtraEndm),
            Dir::Endr => Err(ErrorKind::ExtraEndr),
            Dir::Enum => self.d_enum(cur),
            Dir::Ende => self.d_ende(),
            Dir::IgnoreNl => {
                self.hidden_region = true;
                Ok(())
            }
            Dir::EndInl => {
                if self.hidden_region {
                    self.hidden_region = false;
                    Ok(())
                } else {
                    Err(ErrorKind::ExtraEndinl)
                }
            }
            Dir::FillValue => self.d_fillvalue(cur),
            Dir::Compare => {
                self.output.set_compare(true);
                Ok(())
            }
            Dir::EndCompare => {
                self.output.set_compare(false);
                Ok(())
            }
            Dir::Error => Err(ErrorKind::User(cur.filename())),
            Dir::InesPrg => self.d_inesprg(cur),
            Dir::InesChr => self.d_ineschr(cur),
            Dir::InesMir => self.d_inesmir(cur),
            Dir::InesMap => self.d_inesmap(cur),
            Dir::IncInes => self.d_incines(cur),
            Dir::Nes2ChrRam => self.d_nes2chrram(cur),
            Dir::Nes2PrgRam => self.d_nes2prgram(cur),
            Dir::Nes2Sub => self.d_nes2sub(cur),
            Dir::Nes2Tv => self.d_nes2tv(cur),
            Dir::Nes2Vs => self.d_nes2vs(cur),
            Dir::Nes2Bram => self.d_nes2bram(cur),
            Dir::Nes2ChrBram => self.d_nes2chrbram(cur),
            Dir::Unstable => {
                self.allow_unstable = true;
                Ok(())
            }
            Dir::Hunstable => {
                self.allow_hunstable = true;
                Ok(())
            }
        }
    }

    // ---- conditionals -----------------------------------------------

    fn d_if(&mut self, cur: &mut Cursor) -> Result<(), ErrorKind> {
        if self.if_stack.is_full() {
            return Err(ErrorKind::IfNestLimit);
        }
        self.dependant = false;
        match self.eval(cur, Prec::WholeExp) {
            Err(e) => {
                self.if_stack.open_unresolved();
                Err(e)
            }
            Ok(v) => {
                if self.dependant {
                    self.if_stack.open_unresolved();
                } else {
                    self.if_stack.open(v != 0);
                }
                Ok(())
            }
        }
    }

    fn d_elseif(&mut self, cur: &mut Cursor) -> Result<(), ErrorKind> {
        self.dependant = false;
        match self.eval(cur, Prec::WholeExp) {
            Err(e) => {
                self.if_stack.elseif_unresolved();
                Err(e)
            }
            Ok(v) => {
                if self.dependant {
                    self.if_stack.elseif_unresolved();
                } else {
                    self.if_stack.elseif(v != 0);
                }
                Ok(())
            }
        }
    }

    fn d_else(&mut self) -> Result<(), ErrorKind> {
        self.if_stack.elsebranch();
        Ok(())
    }

    fn d_endif(&mut self) -> Result<(), ErrorKind> {
        self.if_stack.endif();
        Ok(())
    }

    fn d_ifdef(&mut self, cur: &mut Cursor, negate: bool) -> Result<(), ErrorKind> {
        if self.if_stack.is_full() {
            return Err(ErrorKind::IfNestLimit);
        }
        let word = cur.label_word()?;
        let defined = self.symbols.lookup(word, self.scope, self.pass).is_some();
        self.if_stack.open(defined != negate);
        Ok(())
    }

    // ---- symbol assignment ------------------------------------------

    fn d_equal(&mut self, cur: &mut Cursor) -> Result<(), ErrorKind> {
        match self.label_here.clone() {
            None => Err(ErrorKind::NeedName),
            Some(LabelSite::Pc) => {
                self.dependant = false;
                let v = self.eval(cur, Prec::WholeExp)?;
                if !self.dependant {
                    self.pc = v;
                }
                Ok(())
            }
            Some(LabelSite::Sym(r)) => {
                self.dependant = false;
                let val = self.eval(cur, Prec::WholeExp)?;
                let known = !self.dependant;
                if !known {
                    self.need_another_pass = true;
                }
                let sym = self.symbols.get_mut(&r);
                sym.kind = SymbolKind::Value { known };
                sym.value = val;
                Ok(())
            }
        }
    }

    fn d_equ(&mut self, cur: &mut Cursor) -> Result<(), ErrorKind> {
        match self.label_here.clone() {
            None => Err(ErrorKind::NeedName),
            Some(LabelSite::Pc) => Err(ErrorKind::LabelDefined),
            Some(LabelSite::Sym(r)) => {
                let body = cur.rest().trim().to_string();
                cur.consume_all();
                let sym = self.symbols.get_mut(&r);
                match &sym.kind {
                    SymbolKind::Label { .. } => {
                        sym.kind = SymbolKind::Equate { body };
                        Ok(())
                    }
                    // Redefinition on a later pass; the body is kept.
                    SymbolKind::Equate { .. } => Ok(()),
                    _ => Err(ErrorKind::LabelDefined),
                }
            }
        }
    }

    // ---- origin and position ----------------------------------------

    fn d_org(&mut self, cur: &mut Cursor) -> Result<(), ErrorKind> {
        if self.pc < 0 {
            self.d_base(cur)
        } else {
            self.d_pad(cur)
        }
    }

    fn d_base(&mut self, cur: &mut Cursor) -> Result<(), ErrorKind> {
        self.dependant = false;
        match self.eval(cur, Prec::WholeExp) {
            Ok(v) if !self.dependant => {
                self.pc = v;
                Ok(())
            }
            Ok(_) => {
                self.pc = NO_ORIGIN;
                Ok(())
            }
            Err(e) => {
                self.pc = NO_ORIGIN;
                Err(e)
            }
        }
    }

    fn d_pad(&mut self, cur: &mut Cursor) -> Result<(), ErrorKind> {
        if self.pc < 0 {
            return Err(ErrorKind::UndefinedPc);
        }
        self.dependant = false;
        let target = self.eval(cur, Prec::WholeExp)?;
        let count = target - self.pc;
        self.filler(count, cur)
    }

    fn d_align(&mut self, cur: &mut Cursor) -> Result<(), ErrorKind> {
        self.dependant = false;
        let interval = self.eval(cur, Prec::WholeExp)?;
        let count = if !self.dependant && interval > 0 && interval <= u32::MAX as i64 {
            let rem = (self.pc as u32) % (interval as u32);
            if rem != 0 { interval - rem as i64 } else { 0 }
        } else {
            0
        };
        self.filler(count, cur)
    }

    fn d_fillvalue(&mut self, cur: &mut Cursor) -> Result<(), ErrorKind> {
        self.dependant = false;
        self.fill_byte = self.eval(cur, Prec::WholeExp)?;
        Ok(())
    }

    /// Emit `count` fill bytes, with an optional `,value` override. An
    /// unresolved count defers to a later pass.
    fn filler(&mut self, count: i64, cur: &mut Cursor) -> Result<(), ErrorKind> {
        let deferred = self.dependant;
        let mut val = self.fill_byte;
        if cur.eat_char(',') {
            self.dependant = false;
            val = self.eval(cur, Prec::WholeExp)?;
            if !self.dependant && (val > 255 || val < -128) {
                return Err(ErrorKind::OutOfRange);
            }
        }
        if deferred || self.dependant {
            return Ok(());
        }
        if !(0..=0x100000).contains(&count) {
            return Err(ErrorKind::OutOfRange);
        }
        self.emit(&vec![val as u8; count as usize], CoverageTag::Data)
    }

    fn d_seekabs(&mut self, cur: &mut Cursor) -> Result<(), ErrorKind> {
        self.dependant = false;
        let dest = self.eval(cur, Prec::WholeExp)?;
        if self.dependant {
            return Ok(());
        }
        if self.no_output {
            return Err(ErrorKind::CantSeekEnum);
        }
        let delta = dest - self.output.filepos();
        self.output.seek_abs(dest, self.header.bytes_if_enabled())?;
        if self.pc >= 0 {
            self.pc += delta;
        }
        Ok(())
    }

    /// SEEKREL moves both file position and PC; SKIPREL moves only the
    /// file position.
    fn d_seek_relative(&mut self, cur: &mut Cursor, move_pc: bool) -> Result<(), ErrorKind> {
        self.dependant = false;
        let offset = self.eval(cur, Prec::WholeExp)?;
        if self.dependant {
            return Ok(());
        }
        if self.no_output {
            return Err(ErrorKind::CantSeekEnum);
        }
        let dest = self.output.filepos() + offset;
        self.output.seek_abs(dest, self.header.bytes_if_enabled())?;
        if move_pc && self.pc >= 0 {
            self.pc += offset;
        }
        Ok(())
    }

    // ---- file inclusion ---------------------------------------------

    fn d_include(&mut self, cur: &mut Cursor) -> Result<(), ErrorKind> {
        let path = cur.filename();
        self.process_file(&path)
    }

    fn d_incbin(&mut self, cur: &mut Cursor) -> Result<(), ErrorKind> {
        let path = cur.filename();
        let data = fs::read(&path).map_err(|_| ErrorKind::CantOpen)?;
        let size = data.len() as i64;
        let mut seek = 0i64;
        if cur.eat_char(',') {
            self.dependant = false;
            seek = self.eval(cur, Prec::WholeExp)?;
            if self.dependant {
                seek = 0;
            } else if seek < 0 || seek > size {
                return Err(ErrorKind::SeekOutOfRange);
            }
        }
        let mut len = size - seek;
        if cur.eat_char(',') {
            self.dependant = false;
            let requested = self.eval(cur, Prec::WholeExp)?;
            if self.dependant {
                len = 0;
            } else if requested < 0 || requested > size - seek {
                return Err(ErrorKind::BadIncbinSize);
            } else {
                len = requested;
            }
        }
        self.emit(
            &data[seek as usize..(seek + len) as usize],
            CoverageTag::Data,
        )
    }

    /// Include an existing image: adopt its header, emit its data, and
    /// overlay its companion coverage when one sits next to it.
    fn d_incnes(&mut self, cur: &mut Cursor) -> Result<(), ErrorKind> {
        let path = cur.filename();
        let data = fs::read(&path).map_err(|_| ErrorKind::CantOpen)?;
        let h = validate_header(&data)?;
        self.header.set_raw(&h);
        let pos = self.output.filepos();
        self.emit(&data[16..], CoverageTag::Data)?;
        if self.opts.coverage.is_some() {
            if let Ok(tags) = fs::read(replace_ext(&path, "cdl")) {
                let span = tags.len().min(data.len() - 16);
                self.output.seed_coverage(pos, &tags[..span]);
            }
        }
        Ok(())
    }

    // ---- data emission ----------------------------------------------

    fn d_hex(&mut self, cur: &mut Cursor) -> Result<(), ErrorKind> {
        let mut first = true;
        loop {
            let word = cur.word(false);
            if word.is_empty() {
                if first {
                    return Err(ErrorKind::MissingOperand);
                }
                return Ok(());
            }
            first = false;
            let mut bytes = Vec::with_capacity(word.len() / 2 + 1);
            let mut digits = word.chars();
            while let Some(c1) = digits.next() {
                let hi = c1.to_digit(16).ok_or(ErrorKind::NotANumber)? as u8;
                match digits.next() {
                    Some(c2) => {
                        let lo = c2.to_digit(16).ok_or(ErrorKind::NotANumber)? as u8;
                        bytes.push((hi << 4) | lo);
                    }
                    None => bytes.push(hi),
                }
            }
            self.emit(&bytes, CoverageTag::Data)?;
        }
    }

    fn d_data(&mut self, cur: &mut Cursor, width: DataWidth) -> Result<(), ErrorKind> {
        loop {
            cur.eat_ws();
            match cur.peek() {
                Some(q @ ('"' | '\'')) if width.strings() => {
                    let body = match cur.string_body(q) {
                        Some(b) => b.to_string(),
                        None => return Err(ErrorKind::IncompleteExp),
                    };
                    // An expression right after the string is added to
                    // every character.
                    let mut probe = cur.clone();
                    probe.eat_ws();
                    let offset = match probe.peek() {
                        None | Some(',') => 0,
                        _ => self.eval(cur, Prec::WholeExp)?,
                    };
                    let mut out = Vec::new();
                    let mut bytes = body.bytes();
                    while let Some(b) = bytes.next() {
                        let b = if b == b'\\' {
                            match bytes.next() {
                                Some(escaped) => escaped,
                                None => break,
                            }
                        } else {
                            b
                        };
                        let v = (b as i64).wrapping_add(offset);
                        match width {
                            DataWidth::Word => {
                                out.extend_from_slice(&[v as u8, (v >> 8) as u8]);
                            }
                            _ => out.push(v as u8),
                        }
                    }
                    self.emit(&out, CoverageTag::Data)?;
                }
                _ => {
                    self.dependant = false;
                    let val = self.eval(cur, Prec::WholeExp)?;
                    if !self.dependant {
                        let (lo, hi) = width.range();
                        if val > hi || val < lo {
                            return Err(ErrorKind::OutOfRange);
                        }
                    }
                    match width {
                        DataWidth::Byte | DataWidth::Low => {
                            self.emit(&[val as u8], CoverageTag::Data)?;
                        }
                        DataWidth::High => self.emit(&[(val >> 8) as u8], CoverageTag::Data)?,
                        DataWidth::Word => {
                            self.emit(&[val as u8, (val >> 8) as u8], CoverageTag::Data)?;
                        }
                    }
                }
            }
            if !cur.eat_char(',') {
                return Ok(());
            }
        }
    }

    fn d_dsb(&mut self, cur: &mut Cursor) -> Result<(), ErrorKind> {
        self.dependant = false;
        let count = self.eval(cur, Prec::WholeExp)?;
        self.filler(count, cur)
    }

    fn d_dsw(&mut self, cur: &mut Cursor) -> Result<(), ErrorKind> {
        self.dependant = false;
        let count = self.eval(cur, Prec::WholeExp)?;
        let deferred = self.dependant;
        let mut val = self.fill_byte;
        if cur.eat_char(',') {
            self.dependant = false;
            val = self.eval(cur, Prec::WholeExp)?;
            if !self.dependant && (val > 65535 || val < -32768) {
                return Err(ErrorKind::OutOfRange);
            }
        }
        if deferred || self.dependant {
            return Ok(());
        }
        if !(0..=0x100000).contains(&count) {
            return Err(ErrorKind::OutOfRange);
        }
        let mut bytes = Vec::with_capacity(count as usize * 2);
        for _ in 0..count {
            bytes.push(val as u8);
            bytes.push((val >> 8) as u8);
        }
        self.emit(&bytes, CoverageTag::Data)
    }

    // ---- macro and repeat definitions -------------------------------

    fn d_macro(&mut self, cur: &mut Cursor) -> Result<(), ErrorKind> {
        self.label_here = None;
        let word = match cur.label_word() {
            Ok(w) => w.to_string(),
            Err(_) => return Err(ErrorKind::NeedName),
        };
        if let Err(e) = self.add_label(&word, false) {
            // Keep skipping to ENDM so the body doesn't assemble.
            self.capture_macro = Some(MacroCapture { target: None });
            return Err(e);
        }
        let r = match self.label_here.clone() {
            Some(LabelSite::Sym(r)) => r,
            _ => return Err(ErrorKind::NeedName),
        };
        let is_new = matches!(self.symbols.get(&r).kind, SymbolKind::Label { .. });
        let redefined = matches!(self.symbols.get(&r).kind, SymbolKind::Macro { .. });
        if is_new {
            let mut params = Vec::new();
            loop {
                let mut probe = cur.clone();
                match probe.label_word() {
                    Ok(p) if !p.is_empty() => {
                        params.push(p.to_string());
                        *cur = probe;
                        if !cur.eat_char(',') {
                            break;
                        }
                    }
                    _ => break,
                }
            }
            let sym = self.symbols.get_mut(&r);
            sym.kind = SymbolKind::Macro {
                params,
                body: Vec::new(),
            };
            self.capture_macro = Some(MacroCapture { target: Some(r) });
            Ok(())
        } else if redefined {
            // Defined on a previous pass: skip the body.
            self.capture_macro = Some(MacroCapture { target: None });
            cur.consume_all();
            Ok(())
        } else {
            self.capture_macro = Some(MacroCapture { target: None });
            Err(ErrorKind::LabelDefined)
        }
    }

    fn d_rept(&mut self, cur: &mut Cursor, ctx: &LineCtx) -> Result<(), ErrorKind> {
        self.dependant = false;
        let site = (ctx.file.to_string(), ctx.line);
        match self.eval(cur, Prec::WholeExp) {
            Ok(v) => {
                let times = if self.dependant { 0 } else { v.max(0) };
                self.capture_rept = Some(ReptCapture {
                    times,
                    depth: 1,
                    lines: Vec::new(),
                    file: site.0,
                    line: site.1,
                });
                Ok(())
            }
            Err(e) => {
                // Still capture the body so it doesn't assemble inline.
                self.capture_rept = Some(ReptCapture {
                    times: 0,
                    depth: 1,
                    lines: Vec::new(),
                    file: site.0,
                    line: site.1,
                });
                Err(e)
            }
        }
    }

    // ---- enum mode --------------------------------------------------

    fn d_enum(&mut self, cur: &mut Cursor) -> Result<(), ErrorKind> {
        self.dependant = false;
        let val = self.eval(cur, Prec::WholeExp)?;
        self.enum_saved_pc = self.pc;
        self.pc = if self.dependant { 0 } else { val };
        self.no_output = true;
        Ok(())
    }

    fn d_ende(&mut self) -> Result<(), ErrorKind> {
        if self.no_output {
            self.leave_enum();
            Ok(())
        } else {
            Err(ErrorKind::ExtraEnde)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DataWidth {
    Byte,
    Word,
    /// Low byte of each value.
    Low,
    /// High byte of each value.
    High,
}

impl DataWidth {
    /// String operands are only meaningful for byte and word data.
    fn strings(self) -> bool {
        matches!(self, DataWidth::Byte | DataWidth::Word)
    }

    fn range(self) -> (i64, i64) {
        match self {
            DataWidth::Byte => (-128, 255),
            _ => (-32768, 65535),
        }
    }
}
