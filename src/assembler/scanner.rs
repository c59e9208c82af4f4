//! Lexical helpers: a cursor over one source line.
//!
//! The grammar is line-oriented and very loose, so scanning is done with a
//! cheap position-tracking cursor rather than a token stream. A `:` counts
//! as whitespace everywhere except in filenames, which is what lets a label
//! definition carry an optional trailing colon.

use super::error::ErrorKind;

/// The character that makes a label local to the current scope.
pub const LOCAL_CHAR: char = '@';

/// Characters that terminate a word when operator cropping is requested.
const OPERATOR_CHARS: &str = "!^&|+-*/%()<>=,";

fn is_space(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\r' | '\n' | ':')
}

fn is_operator(c: char) -> bool {
    OPERATOR_CHARS.contains(c)
}

/// A cursor over a single line of source text.
#[derive(Clone)]
pub struct Cursor<'a> {
    s: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(s: &'a str) -> Cursor<'a> {
        Cursor { s, pos: 0 }
    }

    /// Everything from the cursor to the end of the line.
    pub fn rest(&self) -> &'a str {
        &self.s[self.pos..]
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Move the cursor to the end of the line.
    pub fn consume_all(&mut self) {
        self.pos = self.s.len();
    }

    pub fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    pub fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    /// Skip whitespace (which includes `:`).
    pub fn eat_ws(&mut self) {
        while let Some(c) = self.peek() {
            if is_space(c) {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
    }

    /// Skip whitespace, then consume `c` if it is next.
    pub fn eat_char(&mut self, c: char) -> bool {
        self.eat_ws();
        if self.peek() == Some(c) {
            self.pos += c.len_utf8();
            true
        } else {
            false
        }
    }

    /// Whether only whitespace remains on the line.
    pub fn at_end(&mut self) -> bool {
        self.eat_ws();
        self.rest().is_empty()
    }

    /// Read the next word. With `crop` set, the word is cut at the first
    /// operator character following its leading run of operator characters,
    /// so `target+1` yields `target` but `++` stays whole. A single colon
    /// right after the word is swallowed.
    pub fn word(&mut self, crop: bool) -> &'a str {
        self.eat_ws();
        let start = self.pos;
        let mut end = start;
        for c in self.s[start..].chars() {
            if is_space(c) {
                break;
            }
            end += c.len_utf8();
        }
        let mut w = &self.s[start..end];
        if crop {
            let lead = w
                .char_indices()
                .find(|&(_, c)| !is_operator(c))
                .map(|(i, _)| i)
                .unwrap_or(w.len());
            if let Some(cut) = w[lead..].find(is_operator) {
                w = &w[..lead + cut];
            }
        }
        self.pos = start + w.len();
        if self.peek() == Some(':') {
            self.pos += 1;
        }
        w
    }

    /// Read a word and check that it is shaped like a label: `$` alone, a
    /// run of `+` or `-` (optionally followed by a name), or a name starting
    /// with the local character, `_`, or a letter.
    pub fn label_word(&mut self) -> Result<&'a str, ErrorKind> {
        let w = self.word(true);
        let mut chars = w.chars();
        match chars.next() {
            None => Err(ErrorKind::Illegal),
            Some('$') if w.len() == 1 => Ok(w),
            Some(sign @ ('+' | '-')) => {
                let body = w.trim_start_matches(sign);
                match body.chars().next() {
                    None => Ok(w),
                    Some(c) if c == LOCAL_CHAR || c == '_' || c.is_ascii_alphabetic() => Ok(w),
                    Some(_) => Err(ErrorKind::Illegal),
                }
            }
            Some(c) if c == LOCAL_CHAR || c == '_' || c.is_ascii_alphabetic() => Ok(w),
            Some(_) => Err(ErrorKind::Illegal),
        }
    }

    /// With the cursor on an opening quote, consume through the matching
    /// close quote and return the raw content between them. The search is
    /// deliberately blind to backslashes; escapes are interpreted later.
    pub fn string_body(&mut self, quote: char) -> Option<&'a str> {
        self.pos += quote.len_utf8();
        let rest = self.rest();
        match rest.find(quote) {
            Some(end) => {
                let body = &rest[..end];
                self.pos += end + quote.len_utf8();
                Some(body)
            }
            None => {
                self.pos = self.s.len();
                None
            }
        }
    }

    /// Grab a filename, with optional surrounding quotes. Unlike `word`,
    /// colons are kept (think `C:\`), and an unterminated quote grabs
    /// everything up to trailing whitespace.
    pub fn filename(&mut self) -> String {
        while let Some(c) = self.peek() {
            if matches!(c, ' ' | '\t' | '\r' | '\n') {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
        if self.peek() == Some('"') {
            self.pos += 1;
            let rest = self.rest();
            match rest.find('"') {
                Some(end) => {
                    let name = &rest[..end];
                    self.pos += end + 1;
                    name.to_string()
                }
                None => {
                    let name = rest.trim_end();
                    self.pos += rest.len();
                    name.to_string()
                }
            }
        } else {
            let start = self.pos;
            let mut end = start;
            for c in self.s[start..].chars() {
                if matches!(c, ' ' | '\t' | '\r' | '\n' | '"') {
                    break;
                }
                end += c.len_utf8();
            }
            self.pos = end;
            self.s[start..end].to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_stops_at_whitespace_and_colon() {
        let mut c = Cursor::new("  start: lda");
        assert_eq!(c.word(true), "start");
        assert_eq!(c.word(true), "lda");
        assert!(c.at_end());
    }

    #[test]
    fn word_crops_at_operators() {
        let mut c = Cursor::new("target+1");
        assert_eq!(c.word(true), "target");
        assert_eq!(c.rest(), "+1");
    }

    #[test]
    fn anonymous_runs_stay_whole() {
        let mut c = Cursor::new("++");
        assert_eq!(c.word(true), "++");
        let mut c = Cursor::new("+loop+2");
        assert_eq!(c.word(true), "+loop");
        assert_eq!(c.rest(), "+2");
    }

    #[test]
    fn label_shapes() {
        assert!(Cursor::new("loop").label_word().is_ok());
        assert!(Cursor::new("@skip").label_word().is_ok());
        assert!(Cursor::new("_tmp").label_word().is_ok());
        assert!(Cursor::new("---").label_word().is_ok());
        assert!(Cursor::new("+done").label_word().is_ok());
        assert!(Cursor::new("$").label_word().is_ok());
        assert!(Cursor::new("5abc").label_word().is_err());
        assert!(Cursor::new("").label_word().is_err());
    }

    #[test]
    fn filenames_with_and_without_quotes() {
        let mut c = Cursor::new("  \"some file.bin\", 4");
        assert_eq!(c.filename(), "some file.bin");
        assert!(c.eat_char(','));
        let mut c = Cursor::new("plain.bin");
        assert_eq!(c.filename(), "plain.bin");
    }
}
