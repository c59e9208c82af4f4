//! The line processor: equate expansion, capture, dispatch.
//!
//! Each line goes through three phases. First every identifier resolving
//! to an equate is rewritten to the equate's stored text (recursively,
//! guarded against cycles) and the comment is split off. Second, if a
//! macro or repeat body is being captured the line is stored verbatim,
//! looking only for the terminating keyword. Otherwise an optional label
//! definition is peeled off and the line dispatches to a directive
//! handler, the opcode encoder, or a macro expansion. Third, while the
//! conditional stack says "skipping", everything except the IF family is
//! silently dropped.

use std::fs;
use std::path::PathBuf;

use regex::Regex;

use super::directives::Dir;
use super::error::ErrorKind;
use super::opcodes::{self, Mnemonic};
use super::scanner::{Cursor, LOCAL_CHAR};
use super::symbols::{SymRef, Symbol, SymbolKind};
use super::{Assembler, LabelSite, NO_ORIGIN};

/// Where a line came from, for diagnostics.
pub(crate) struct LineCtx<'a> {
    pub file: &'a str,
    pub line: usize,
}

/// What the leading word of a line turned out to be.
pub(crate) enum Dispatch {
    Dir(Dir),
    Op(&'static Mnemonic),
    Mac(SymRef),
}

/// Macro body capture in progress. `target` is `None` when the macro was
/// already defined on an earlier pass and the body is skipped.
pub(crate) struct MacroCapture {
    pub target: Option<SymRef>,
}

/// Repeat body capture in progress.
pub(crate) struct ReptCapture {
    pub times: i64,
    pub depth: u32,
    pub lines: Vec<String>,
    pub file: String,
    pub line: usize,
}

impl Assembler {
    /// Process a whole source text (the root file or the string API).
    pub(crate) fn process_lines(
        &mut self,
        text: &str,
        name: &str,
        is_root: bool,
    ) -> Result<(), ErrorKind> {
        let mut last = 0;
        for (i, line) in text.lines().enumerate() {
            last = i + 1;
            self.process_line(line, &LineCtx { file: name, line: last })?;
        }
        if is_root {
            self.end_of_input_checks(name, last);
        }
        Ok(())
    }

    /// Process an included file. Re-inclusion of a file that is still
    /// open is refused.
    pub(crate) fn process_file(&mut self, path: &str) -> Result<(), ErrorKind> {
        let canon = fs::canonicalize(path).unwrap_or_else(|_| PathBuf::from(path));
        if self.include_stack.contains(&canon) {
            return Err(ErrorKind::CantOpen);
        }
        let text = fs::read_to_string(path).map_err(|_| ErrorKind::CantOpen)?;
        self.include_stack.push(canon);
        let mut fatal = None;
        for (i, line) in text.lines().enumerate() {
            if let Err(e) = self.process_line(line, &LineCtx { file: path, line: i + 1 }) {
                fatal = Some(e);
                break;
            }
        }
        self.include_stack.pop();
        match fatal {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Process one line, reporting line-scoped errors in place. Only fatal
    /// errors propagate.
    pub(crate) fn process_line(&mut self, raw: &str, ctx: &LineCtx) -> Result<(), ErrorKind> {
        match self.process_line_inner(raw, ctx) {
            Ok(()) => Ok(()),
            Err(kind) => {
                let fatal = kind.is_fatal();
                self.report(ctx.file, ctx.line, kind.clone());
                if fatal { Err(kind) } else { Ok(()) }
            }
        }
    }

    fn process_line_inner(&mut self, raw: &str, ctx: &LineCtx) -> Result<(), ErrorKind> {
        let (line, comment) = self.expand_line(raw)?;

        if self.inside_macro == 0 || self.listing.expand_bodies() {
            self.listing.begin_line(self.pc, &line, comment.as_deref());
        }
        if let Some(c) = &comment {
            if self.opts.combined_map.is_some() && self.last_chance {
                let text = c.trim_start_matches(';').trim();
                if !text.is_empty() {
                    self.comments.add(self.output.filepos(), text);
                }
            }
        }

        // Macro body capture: only ENDM (with a transparent label prefix)
        // is recognized, everything else is stored.
        if self.capture_macro.is_some() {
            let found = self.leading_keyword(&line);
            if matches!(found, Some(Dispatch::Dir(Dir::Endm))) {
                self.capture_macro = None;
            } else if let Some(cap) = &self.capture_macro {
                if let Some(target) = cap.target.clone() {
                    if let SymbolKind::Macro { body, .. } =
                        &mut self.symbols.get_mut(&target).kind
                    {
                        body.push(line.clone());
                    }
                }
            }
            return Ok(());
        }

        // Repeat body capture: nesting is tracked so only the outermost
        // ENDR terminates, and it triggers the expansion.
        if let Some(mut cap) = self.capture_rept.take() {
            match self.leading_keyword(&line) {
                Some(Dispatch::Dir(Dir::Rept)) => {
                    cap.depth += 1;
                    cap.lines.push(line.clone());
                    self.capture_rept = Some(cap);
                }
                Some(Dispatch::Dir(Dir::Endr)) => {
                    cap.depth -= 1;
                    if cap.depth == 0 {
                        self.run_rept(cap)?;
                    } else {
                        cap.lines.push(line.clone());
                        self.capture_rept = Some(cap);
                    }
                }
                _ => {
                    cap.lines.push(line.clone());
                    self.capture_rept = Some(cap);
                }
            }
            return Ok(());
        }

        self.label_here = None;
        let mut after = Cursor::new(&line);
        let mut disp = self.try_reserved(&mut after);

        // Conditional filter: while skipping, only the IF family runs.
        if self.if_stack.skipping() {
            if disp.is_none() {
                let mut past_label = Cursor::new(&line);
                let _ = past_label.word(true);
                disp = self.try_reserved(&mut past_label);
                after = past_label;
            }
            if let Some(Dispatch::Dir(d)) = disp {
                if matches!(
                    d,
                    Dir::If | Dir::Ifdef | Dir::Ifndef | Dir::Elseif | Dir::Else | Dir::Endif
                ) {
                    self.directive(d, &mut after, ctx)?;
                    if !after.at_end() {
                        return Err(ErrorKind::ExtraChars);
                    }
                }
            }
            return Ok(());
        }

        let dispatch;
        let mut cur;
        match disp {
            Some(d) => {
                dispatch = d;
                cur = after;
            }
            None => {
                let mut c = Cursor::new(&line);
                let word = c.label_word()?;
                let local = self.inside_macro > 0;
                self.add_label(word, local)?;
                match self.try_reserved(&mut c) {
                    Some(d) => {
                        dispatch = d;
                        cur = c;
                    }
                    None => return Err(ErrorKind::Illegal),
                }
            }
        }

        match dispatch {
            Dispatch::Dir(d) => self.directive(d, &mut cur, ctx)?,
            Dispatch::Op(m) => self.encode(m, &mut cur)?,
            Dispatch::Mac(r) => self.expand_macro(r, &mut cur, ctx)?,
        }
        if !cur.at_end() {
            return Err(ErrorKind::ExtraChars);
        }
        Ok(())
    }

    /// Identify the line's keyword for the capture phases, tolerating a
    /// label in front of it.
    fn leading_keyword(&self, line: &str) -> Option<Dispatch> {
        let mut probe = Cursor::new(line);
        if let Some(d) = self.try_reserved(&mut probe) {
            return Some(d);
        }
        let mut probe = Cursor::new(line);
        let _ = probe.word(true);
        self.try_reserved(&mut probe)
    }

    /// Read a word and resolve it against directives, mnemonics, and
    /// finally (case-sensitively) macros. Advances the cursor past the
    /// word either way.
    pub(crate) fn try_reserved(&self, cur: &mut Cursor) -> Option<Dispatch> {
        cur.eat_ws();
        match cur.peek() {
            Some('=') => {
                cur.bump();
                return Some(Dispatch::Dir(Dir::Equal));
            }
            Some('.') => {
                cur.bump();
            }
            _ => {}
        }
        let word = cur.word(true);
        if word.is_empty() {
            return Some(Dispatch::Dir(Dir::Nothing));
        }
        let upper = word.to_ascii_uppercase();
        if let Some(d) = Dir::lookup(&upper) {
            return Some(Dispatch::Dir(d));
        }
        if let Some(m) = opcodes::find(&upper) {
            return Some(Dispatch::Op(m));
        }
        if let Some(r) = self.symbols.lookup(word, self.scope, self.pass) {
            let sym = self.symbols.get(&r);
            if matches!(sym.kind, SymbolKind::Macro { .. }) && sym.pass == self.pass {
                return Some(Dispatch::Mac(r));
            }
        }
        None
    }

    /// Define the label at the start of a line (or via MACRO). `local` is
    /// set for labels appearing inside an expansion.
    pub(crate) fn add_label(&mut self, word: &str, local: bool) -> Result<(), ErrorKind> {
        let first = match word.chars().next() {
            Some(c) => c,
            None => return Err(ErrorKind::NeedName),
        };
        if word == "$" {
            self.scope = self.next_scope;
            self.next_scope += 1;
            self.label_here = Some(LabelSite::Pc);
            return Ok(());
        }
        let mut existing = self.symbols.lookup(word, self.scope, self.pass);
        if let Some(r) = &existing {
            let sym = self.symbols.get(r);
            // A local definition shadows a same-name global label.
            if local && sym.scope == 0 && !matches!(sym.kind, SymbolKind::Value { .. }) {
                existing = None;
            }
        }
        // Non-local definitions open a new scope.
        if first != LOCAL_CHAR && !local {
            self.scope = self.next_scope;
            self.next_scope += 1;
        }
        match existing {
            None => {
                let known = self.pc >= 0;
                let r = self.symbols.insert(Symbol {
                    name: word.to_string(),
                    value: self.pc,
                    pos: self.output.filepos(),
                    kind: SymbolKind::Label { known },
                    used: false,
                    pass: self.pass,
                    scope: if first == LOCAL_CHAR || local { self.scope } else { 0 },
                    hidden: self.hidden_region,
                });
                self.last_new_symbol = Some(r.clone());
                self.label_here = Some(LabelSite::Sym(r));
            }
            Some(r) => {
                self.label_here = Some(LabelSite::Sym(r.clone()));
                let pc = self.pc;
                let pos = self.output.filepos();
                let pass = self.pass;
                let last_chance = self.last_chance;
                let sym = self.symbols.get_mut(&r);
                if sym.pass == pass && first != '-' {
                    if matches!(sym.kind, SymbolKind::Value { .. }) {
                        return Ok(());
                    }
                    return Err(ErrorKind::LabelDefined);
                }
                sym.pass = pass;
                if let SymbolKind::Label { known } = &mut sym.kind {
                    let moved = sym.value != pc;
                    sym.value = pc;
                    sym.pos = pos;
                    *known = pc >= 0;
                    if moved && first != '-' {
                        self.need_another_pass = true;
                        if last_chance {
                            return Err(ErrorKind::BadAddr);
                        }
                    }
                    if last_chance && pc < 0 {
                        return Err(ErrorKind::BadAddr);
                    }
                }
            }
        }
        Ok(())
    }

    /// Expand equates in a raw source line and split off the comment.
    pub(crate) fn expand_line(
        &mut self,
        src: &str,
    ) -> Result<(String, Option<String>), ErrorKind> {
        let mut out = String::with_capacity(src.len());
        let mut def_skip = false;
        let comment = self.expand_into(src, &mut out, &mut def_skip)?;
        Ok((out, comment))
    }

    fn expand_into(
        &mut self,
        src: &str,
        out: &mut String,
        def_skip: &mut bool,
    ) -> Result<Option<String>, ErrorKind> {
        let mut i = 0;
        while let Some(c) = src[i..].chars().next() {
            if c == '$' || c.is_ascii_digit() {
                // Copy past numbers so $BEEF isn't mistaken for a symbol;
                // this also swallows trailing h/b radix suffixes.
                out.push(c);
                i += c.len_utf8();
                while let Some(c2) = src[i..].chars().next() {
                    if c2.is_ascii_digit() || ('A'..='H').contains(&c2) || ('a'..='h').contains(&c2)
                    {
                        out.push(c2);
                        i += 1;
                    } else {
                        break;
                    }
                }
            } else if c == '"' || c == '\'' {
                out.push(c);
                i += 1;
                while let Some(c2) = src[i..].chars().next() {
                    out.push(c2);
                    i += c2.len_utf8();
                    if c2 == '\\' {
                        if let Some(c3) = src[i..].chars().next() {
                            out.push(c3);
                            i += c3.len_utf8();
                        }
                    } else if c2 == c {
                        break;
                    }
                }
            } else if c == '_' || c == '.' || c == LOCAL_CHAR || c.is_ascii_alphabetic() {
                let start = i;
                i += c.len_utf8();
                while let Some(c2) = src[i..].chars().next() {
                    if c2 == '_' || c2 == '.' || c2 == LOCAL_CHAR || c2.is_ascii_alphanumeric() {
                        i += c2.len_utf8();
                    } else {
                        break;
                    }
                }
                let word = &src[start..i];
                if !*def_skip {
                    let upper = word.strip_prefix('.').unwrap_or(word).to_ascii_uppercase();
                    if upper == "IFDEF" || upper == "IFNDEF" {
                        // IFDEF must see the name itself, not its value.
                        *def_skip = true;
                        out.push_str(word);
                        continue;
                    }
                }
                let mut body = None;
                if !*def_skip {
                    if let Some(r) = self.symbols.lookup(word, self.scope, self.pass) {
                        let sym = self.symbols.get(&r);
                        // Equates must be defined before use; an entry from
                        // a previous pass is not expanded into its own
                        // definition line.
                        if let SymbolKind::Equate { body: text } = &sym.kind {
                            if sym.pass == self.pass {
                                if sym.used {
                                    return Err(ErrorKind::RecursiveEquate);
                                }
                                body = Some((r.clone(), text.clone()));
                            }
                        }
                    }
                }
                match body {
                    Some((r, text)) => {
                        self.symbols.get_mut(&r).used = true;
                        let result = self.expand_into(&text, out, def_skip);
                        self.symbols.get_mut(&r).used = false;
                        result?;
                    }
                    None => out.push_str(word),
                }
            } else if c == ';' {
                return Ok(Some(src[i..].to_string()));
            } else {
                out.push(c);
                i += c.len_utf8();
            }
        }
        Ok(None)
    }

    /// Expand a macro invocation: fresh scope, positional arguments bound
    /// as equates, body processed line by line.
    pub(crate) fn expand_macro(
        &mut self,
        r: SymRef,
        cur: &mut Cursor,
        ctx: &LineCtx,
    ) -> Result<(), ErrorKind> {
        let (params, body, name) = {
            let sym = self.symbols.get(&r);
            if sym.used {
                return Err(ErrorKind::RecursiveMacro);
            }
            match &sym.kind {
                SymbolKind::Macro { params, body } => {
                    (params.clone(), body.clone(), sym.name.clone())
                }
                _ => return Err(ErrorKind::Illegal),
            }
        };
        let args = split_args(cur.rest());
        cur.consume_all();

        let old_scope = self.scope;
        self.scope = self.next_scope;
        self.next_scope += 1;
        self.inside_macro += 1;
        self.symbols.get_mut(&r).used = true;

        for (i, param) in params.iter().enumerate() {
            let text = args.get(i).cloned().unwrap_or_default();
            self.symbols.insert(Symbol {
                name: param.clone(),
                value: 0,
                pos: self.output.filepos(),
                kind: SymbolKind::Equate { body: text },
                used: false,
                pass: self.pass,
                scope: self.scope,
                hidden: true,
            });
        }

        let mfile = format!("{}({}):{}", ctx.file, ctx.line, name);
        let mut fatal = None;
        for (n, line) in body.iter().enumerate() {
            let mctx = LineCtx {
                file: &mfile,
                line: n + 1,
            };
            if let Err(e) = self.process_line(line, &mctx) {
                fatal = Some(e);
                break;
            }
        }

        self.symbols.get_mut(&r).used = false;
        self.inside_macro -= 1;
        self.scope = old_scope;
        match fatal {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Iterate a captured repeat body, one fresh scope per iteration.
    fn run_rept(&mut self, cap: ReptCapture) -> Result<(), ErrorKind> {
        let rfile = format!("{}({}):REPT", cap.file, cap.line);
        let old_scope = self.scope;
        self.inside_macro += 1;
        let mut fatal = None;
        'outer: for _ in 0..cap.times {
            self.scope = self.next_scope;
            self.next_scope += 1;
            for (n, line) in cap.lines.iter().enumerate() {
                let rctx = LineCtx {
                    file: &rfile,
                    line: n + 1,
                };
                if let Err(e) = self.process_line(line, &rctx) {
                    fatal = Some(e);
                    break 'outer;
                }
            }
        }
        self.inside_macro -= 1;
        self.scope = old_scope;
        match fatal {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn end_of_input_checks(&mut self, name: &str, line: usize) {
        let mut err = None;
        if self.if_stack.depth() > 0 {
            err = Some(ErrorKind::NoEndif);
        }
        if self.capture_rept.is_some() {
            err = Some(ErrorKind::NoEndr);
        }
        if self.capture_macro.is_some() {
            err = Some(ErrorKind::NoEndm);
        }
        if self.no_output {
            err = Some(ErrorKind::NoEnde);
        }
        if self.hidden_region {
            err = Some(ErrorKind::NoEndinl);
        }
        if let Some(kind) = err {
            self.report(name, line, kind);
        }
    }

    /// Restore the PC after an enum region (shared by ENDE and pass ends).
    pub(crate) fn leave_enum(&mut self) {
        self.pc = self.enum_saved_pc;
        self.enum_saved_pc = NO_ORIGIN;
        self.no_output = false;
    }
}

/// Split a macro argument list on commas, leaving commas inside quotes
/// alone. Trailing and leading whitespace per argument is dropped.
pub(crate) fn split_args(s: &str) -> Vec<String> {
    let re = Regex::new(r#""[^"]*"|'[^']*'|[^,"']+|,|["']"#).unwrap();
    let mut args = vec![String::new()];
    for m in re.find_iter(s) {
        if m.as_str() == "," {
            args.push(String::new());
        } else {
            let last = args.len() - 1;
            args[last].push_str(m.as_str());
        }
    }
    let args: Vec<String> = args.into_iter().map(|a| a.trim().to_string()).collect();
    if args.len() == 1 && args[0].is_empty() {
        return Vec::new();
    }
    args
}
