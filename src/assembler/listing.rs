//! The listing writer.
//!
//! Collects one text line per processed source line: the PC at the start
//! of the line, the bytes it emitted, and the (expanded) source text with
//! its comment. The buffer is rebuilt every pass and written out once
//! after the final one, so the file reflects converged addresses.

/// Bytes shown per listing line before eliding.
const SHOWN_BYTES: usize = 8;

struct Pending {
    pc: i64,
    line: String,
    comment: Option<String>,
    bytes: Vec<u8>,
    elided: bool,
}

pub struct Listing {
    active: bool,
    expand: bool,
    text: String,
    pending: Option<Pending>,
}

impl Listing {
    pub fn new(active: bool, expand: bool) -> Listing {
        Listing {
            active,
            expand,
            text: String::new(),
            pending: None,
        }
    }

    /// Whether macro/repeat body lines should be listed too (`-L`).
    pub fn expand_bodies(&self) -> bool {
        self.expand
    }

    pub fn reset(&mut self) {
        self.text.clear();
        self.pending = None;
    }

    /// Start a listing line; the previous one is finalized with whatever
    /// bytes it gathered.
    pub fn begin_line(&mut self, pc: i64, line: &str, comment: Option<&str>) {
        if !self.active {
            return;
        }
        self.flush_pending();
        self.pending = Some(Pending {
            pc,
            line: line.to_string(),
            comment: comment.map(str::to_string),
            bytes: Vec::new(),
            elided: false,
        });
    }

    /// Called from the emit path with every chunk of output bytes.
    pub fn add_bytes(&mut self, bytes: &[u8]) {
        if let Some(p) = &mut self.pending {
            for &b in bytes {
                if p.bytes.len() >= SHOWN_BYTES {
                    p.elided = true;
                    break;
                }
                p.bytes.push(b);
            }
        }
    }

    fn flush_pending(&mut self) {
        let Some(p) = self.pending.take() else {
            return;
        };
        let addr = if p.pc >= 0 {
            format!("{:05X}", p.pc)
        } else {
            "     ".to_string()
        };
        let mut hex = String::new();
        for b in &p.bytes {
            hex.push_str(&format!("{b:02X} "));
        }
        if p.elided {
            hex.push_str("..");
        }
        let mut out = format!("{addr} {hex:<26}{}", p.line);
        if let Some(c) = &p.comment {
            out.push_str(c);
        }
        self.text.push_str(out.trim_end());
        self.text.push('\n');
    }

    pub fn finish(&mut self) {
        self.flush_pending();
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_carry_address_bytes_and_source() {
        let mut l = Listing::new(true, false);
        l.begin_line(0x8000, "  lda #$10", None);
        l.add_bytes(&[0xA9, 0x10]);
        l.finish();
        assert!(l.text().starts_with("08000 A9 10"));
        assert!(l.text().contains("lda #$10"));
        assert!(l.text().ends_with('\n'));
    }

    #[test]
    fn undefined_pc_leaves_address_blank() {
        let mut l = Listing::new(true, false);
        l.begin_line(-0x4000_0000, "check equ 1", Some("; a comment"));
        l.finish();
        assert!(l.text().starts_with("      "));
        assert!(l.text().contains("; a comment"));
    }

    #[test]
    fn long_byte_runs_are_elided() {
        let mut l = Listing::new(true, false);
        l.begin_line(0, ".dsb 32", None);
        l.add_bytes(&[0; 32]);
        l.finish();
        assert!(l.text().contains(".."));
    }

    #[test]
    fn inactive_listing_collects_nothing() {
        let mut l = Listing::new(false, false);
        l.begin_line(0, "lda #0", None);
        l.add_bytes(&[0xA9, 0]);
        l.finish();
        assert!(l.text().is_empty());
    }
}
