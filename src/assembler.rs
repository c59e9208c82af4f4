//! A multi-pass 6502 assembler producing NES/Famicom images and patches.
//!
//! The whole source is reassembled from scratch up to seven times. Each
//! pass may leave symbols unresolved or move label addresses around; the
//! driver keeps going while progress is being made, then runs one final
//! "last chance" pass in which anything still unresolved becomes a hard
//! error. Within a pass, processing is line by line: equates are expanded
//! textually, a label definition is peeled off, and the rest dispatches to
//! a directive handler, the opcode encoder, or a macro expansion.
//!
//! The simplest entry points mirror a plain build:
//!
//! ```ignore
//! let image = famiasm::assembler::assemble(".org $8000\n  lda #$10\n  rts\n")?;
//! ```
//!
//! For file output, patches, listings and symbol exports, construct an
//! [`Assembler`] with [`Options`] and call [`Assembler::run_file`].

pub mod conditional;
pub mod directives;
pub mod error;
pub mod exports;
pub mod expr;
pub mod header;
pub mod listing;
pub mod opcodes;
pub mod output;
pub mod patch;
pub mod scanner;
pub mod source;
pub mod symbols;

use std::fs;
use std::path::{Path, PathBuf};

use crate::logging;
use conditional::IfStack;
use error::{Diagnostic, Error, ErrorKind};
use exports::Comments;
use header::HeaderConfig;
use listing::Listing;
pub use output::{OutputDest, OutputMode};
use output::{CoverageTag, Output};
use source::{MacroCapture, ReptCapture};
use symbols::{SymRef, Symbol, SymbolKind, SymbolTable};

/// Sentinel PC value while no origin has been set. An even power of two,
/// so alignment arithmetic works before the first ORG.
pub(crate) const NO_ORIGIN: i64 = -0x4000_0000;

/// Number of passes before giving up on convergence.
const MAX_PASSES: u32 = 7;

/// Everything configurable about one assembly run.
#[derive(Default)]
pub struct Options {
    /// Flat binary or IPS patch.
    pub mode: OutputMode,
    /// Where the artifact goes; `Memory` serves the string-level API.
    pub dest: OutputDest,
    /// Symbols predefined as value 1 (the `-d` flag).
    pub defines: Vec<String>,
    /// Listing file path, if one was requested.
    pub listing: Option<PathBuf>,
    /// Expand macro and repeat bodies in the listing (`-L`).
    pub expand_listing: bool,
    /// Coverage (CDL) file path.
    pub coverage: Option<PathBuf>,
    /// Base path for the per-bank label maps (`-n`).
    pub bank_maps: Option<PathBuf>,
    /// Path for the flat `name = 0xvalue` map (`-f`).
    pub flat_map: Option<PathBuf>,
    /// Path for the combined label map with comments (`-m`).
    pub combined_map: Option<PathBuf>,
}

/// What the label at the start of the current line refers to: a symbol
/// table entry, or the program counter itself (a line like `$ = $8000`).
#[derive(Clone)]
pub(crate) enum LabelSite {
    Sym(SymRef),
    Pc,
}

enum Root<'a> {
    File(&'a Path),
    Text { src: &'a str, name: &'a str },
}

pub struct Assembler {
    pub(crate) opts: Options,
    pub(crate) symbols: SymbolTable,
    pub(crate) header: HeaderConfig,
    pub(crate) output: Output,
    pub(crate) listing: Listing,
    pub(crate) comments: Comments,
    pub(crate) if_stack: IfStack,

    pub(crate) pass: u32,
    pub(crate) last_chance: bool,
    pub(crate) need_another_pass: bool,
    /// Raised by the evaluator when an expression referenced a symbol not
    /// resolvable this pass.
    pub(crate) dependant: bool,
    pub(crate) pc: i64,
    pub(crate) fill_byte: i64,
    pub(crate) scope: u32,
    pub(crate) next_scope: u32,
    pub(crate) label_here: Option<LabelSite>,
    /// Last symbol newly created; the driver's progress measure.
    pub(crate) last_new_symbol: Option<SymRef>,
    pub(crate) capture_macro: Option<MacroCapture>,
    pub(crate) capture_rept: Option<ReptCapture>,
    pub(crate) inside_macro: u32,
    /// Enum mode: PC advances, nothing is emitted.
    pub(crate) no_output: bool,
    pub(crate) enum_saved_pc: i64,
    /// IGNORENL region: defined symbols are left out of exports.
    pub(crate) hidden_region: bool,
    pub(crate) allow_unstable: bool,
    pub(crate) allow_hunstable: bool,
    /// Source files currently open, to refuse recursive inclusion.
    pub(crate) include_stack: Vec<PathBuf>,
    pub(crate) diagnostics: Vec<Diagnostic>,
}

/// Swap the extension of a path-like string (or append one if the name
/// has none).
pub fn replace_ext(path: &str, ext: &str) -> String {
    match path.rfind('.') {
        Some(i) if !path[i + 1..].contains(['/', '\\']) => format!("{}.{}", &path[..i], ext),
        _ => format!("{path}.{ext}"),
    }
}

/// Assemble source text into a flat binary image with default options.
pub fn assemble(source: &str) -> Result<Vec<u8>, Error> {
    let mut asm = Assembler::new(Options::default());
    asm.run_source(source, "<source>")?;
    Ok(asm.take_output())
}

/// Assemble a file into a flat binary image with default options.
pub fn assemble_from_file(path: &str) -> Result<Vec<u8>, Error> {
    let mut asm = Assembler::new(Options::default());
    asm.run_file(Path::new(path))?;
    Ok(asm.take_output())
}

impl Assembler {
    pub fn new(opts: Options) -> Assembler {
        let output = Output::new(opts.mode, opts.dest.clone(), opts.coverage.is_some());
        let listing_on = opts.listing.is_some();
        let expand = opts.expand_listing;
        Assembler {
            opts,
            symbols: SymbolTable::new(),
            header: HeaderConfig::new(),
            output,
            listing: Listing::new(listing_on, expand),
            comments: Comments::new(),
            if_stack: IfStack::new(),
            pass: 0,
            last_chance: false,
            need_another_pass: false,
            dependant: false,
            pc: NO_ORIGIN,
            fill_byte: 0,
            scope: 1,
            next_scope: 2,
            label_here: None,
            last_new_symbol: None,
            capture_macro: None,
            capture_rept: None,
            inside_macro: 0,
            no_output: false,
            enum_saved_pc: NO_ORIGIN,
            hidden_region: false,
            allow_unstable: false,
            allow_hunstable: false,
            include_stack: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    pub fn run_file(&mut self, path: &Path) -> Result<(), Error> {
        self.run(Root::File(path))
    }

    pub fn run_source(&mut self, src: &str, name: &str) -> Result<(), Error> {
        self.run(Root::Text { src, name })
    }

    fn run(&mut self, root: Root) -> Result<(), Error> {
        let root_text;
        let (src, name, root_path) = match root {
            Root::File(path) => {
                root_text = fs::read_to_string(path).map_err(|_| Error::Read {
                    path: path.display().to_string(),
                })?;
                (
                    root_text.as_str(),
                    path.display().to_string(),
                    Some(path.to_path_buf()),
                )
            }
            Root::Text { src, name } => (src, name.to_string(), None),
        };

        for name in self.opts.defines.clone() {
            self.predefine(&name);
        }

        let mut progress_mark = None;
        loop {
            self.pass += 1;
            if self.pass == MAX_PASSES
                || (self.pass > 1 && self.last_new_symbol == progress_mark)
            {
                self.last_chance = true;
            }
            progress_mark = self.last_new_symbol.clone();
            self.reset_pass();
            if let Some(p) = &root_path {
                self.include_stack
                    .push(fs::canonicalize(p).unwrap_or_else(|_| p.clone()));
            }
            if let Err(kind) = self.process_lines(src, &name, true) {
                // Fatal: already reported with its location.
                self.output.discard();
                let diag = match self.diagnostics.last() {
                    Some(d) => d.clone(),
                    None => Diagnostic {
                        file: name.clone(),
                        line: 0,
                        kind,
                    },
                };
                return Err(Error::Fatal(diag));
            }
            if !self.diagnostics.is_empty() || self.last_chance || !self.need_another_pass {
                break;
            }
        }

        if !self.diagnostics.is_empty() {
            self.output.discard();
            return Err(Error::Failed {
                first: self.diagnostics[0].clone(),
                count: self.diagnostics.len(),
            });
        }
        if !self.output.is_open() {
            return Err(Error::NothingToDo);
        }
        if let Err(kind) = self.output.finish() {
            self.output.discard();
            return Err(Error::Fatal(Diagnostic {
                file: name,
                line: 0,
                kind,
            }));
        }
        self.write_artifacts()
    }

    /// Take the in-memory artifact after a successful memory-destination
    /// run.
    pub fn take_output(&mut self) -> Vec<u8> {
        self.output.take_memory()
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Offset of the first program byte in the output file (the header
    /// size when one is configured).
    pub(crate) fn data_offset(&self) -> i64 {
        self.header.data_offset()
    }

    fn predefine(&mut self, name: &str) {
        if self.symbols.lookup(name, 0, 0).is_some() {
            return;
        }
        self.symbols.insert(Symbol {
            name: name.to_string(),
            value: 1,
            pos: 0,
            kind: SymbolKind::Value { known: true },
            used: false,
            pass: 0,
            scope: 0,
            hidden: false,
        });
    }

    fn reset_pass(&mut self) {
        self.pc = NO_ORIGIN;
        self.fill_byte = 0;
        self.if_stack.reset();
        self.scope = 1;
        self.next_scope = 2;
        self.need_another_pass = false;
        self.dependant = false;
        self.label_here = None;
        self.capture_macro = None;
        self.capture_rept = None;
        self.inside_macro = 0;
        self.no_output = false;
        self.enum_saved_pc = NO_ORIGIN;
        self.hidden_region = false;
        self.include_stack.clear();
        self.comments.reset();
        self.listing.reset();
        self.output = Output::new(
            self.opts.mode,
            self.opts.dest.clone(),
            self.opts.coverage.is_some(),
        );
    }

    /// Emit bytes: the PC always advances; the file only sees them outside
    /// enum mode.
    pub(crate) fn emit(&mut self, bytes: &[u8], tag: CoverageTag) -> Result<(), ErrorKind> {
        self.pc += bytes.len() as i64;
        if self.no_output {
            return Ok(());
        }
        self.listing.add_bytes(bytes);
        self.output.write(bytes, tag, self.header.bytes_if_enabled())
    }

    pub(crate) fn report(&mut self, file: &str, line: usize, kind: ErrorKind) {
        let diag = Diagnostic {
            file: file.to_string(),
            line,
            kind,
        };
        logging::error(&diag.to_string());
        self.diagnostics.push(diag);
    }

    /// Write listing, coverage and symbol maps after a clean run.
    fn write_artifacts(&mut self) -> Result<(), Error> {
        let write = |path: &Path, data: &[u8]| -> Result<(), Error> {
            fs::write(path, data).map_err(|_| Error::Write {
                path: path.display().to_string(),
            })
        };
        if let Some(path) = self.opts.listing.clone() {
            self.listing.finish();
            write(&path, self.listing.text().as_bytes())?;
        }
        if let Some(path) = self.opts.coverage.clone() {
            let offset = self.data_offset() as usize;
            let mut tags = self.output.coverage().unwrap_or(&[]).to_vec();
            tags.resize(self.output.filesize() as usize, 0);
            write(&path, &tags[offset.min(tags.len())..])?;
        }
        if let Some(path) = self.opts.flat_map.clone() {
            write(&path, exports::flat_map(self).as_bytes())?;
        }
        if let Some(path) = self.opts.combined_map.clone() {
            write(&path, exports::combined_map(self).as_bytes())?;
        }
        if let Some(base) = self.opts.bank_maps.clone() {
            for (suffix, text) in exports::bank_maps(self) {
                let name = format!("{}.{}.nl", base.display(), suffix);
                write(Path::new(&name), text.as_bytes())?;
            }
        }
        Ok(())
    }
}
