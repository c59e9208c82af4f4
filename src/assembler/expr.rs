//! The integer expression evaluator.
//!
//! A precedence-climbing parser over `i64`. Unresolved symbols do not stop
//! evaluation mid-pass: the value collapses to 0 and the `dependant` and
//! `need_another_pass` flags are raised out of band, so callers defer their
//! range checks until a later pass. Only on the last-chance pass does an
//! unresolved reference become a hard error.

use super::Assembler;
use super::error::ErrorKind;
use super::scanner::Cursor;
use super::symbols::SymbolKind;

/// Precedence levels, loosest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Prec {
    WholeExp,
    OrOr,
    AndAnd,
    Or,
    Xor,
    And,
    EqCompare,
    Compare,
    Shift,
    PlusMinus,
    MulDiv,
    Unary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    None,
    Equal,
    NotEqual,
    Greater,
    GreaterEq,
    Less,
    LessEq,
    Plus,
    Minus,
    Mul,
    Div,
    Mod,
    And,
    Xor,
    Or,
    AndAnd,
    OrOr,
    LeftShift,
    RightShift,
}

impl Op {
    fn prec(self) -> Prec {
        match self {
            Op::None => Prec::WholeExp,
            Op::OrOr => Prec::OrOr,
            Op::AndAnd => Prec::AndAnd,
            Op::Or => Prec::Or,
            Op::Xor => Prec::Xor,
            Op::And => Prec::And,
            Op::Equal | Op::NotEqual => Prec::EqCompare,
            Op::Greater | Op::GreaterEq | Op::Less | Op::LessEq => Prec::Compare,
            Op::LeftShift | Op::RightShift => Prec::Shift,
            Op::Plus | Op::Minus => Prec::PlusMinus,
            Op::Mul | Op::Div | Op::Mod => Prec::MulDiv,
        }
    }
}

/// Read a binary operator, if one is next.
fn get_operator(cur: &mut Cursor) -> Op {
    cur.eat_ws();
    let first = match cur.peek() {
        Some(c) => c,
        None => return Op::None,
    };
    match first {
        '&' => {
            cur.bump();
            if cur.peek() == Some('&') {
                cur.bump();
                Op::AndAnd
            } else {
                Op::And
            }
        }
        '|' => {
            cur.bump();
            if cur.peek() == Some('|') {
                cur.bump();
                Op::OrOr
            } else {
                Op::Or
            }
        }
        '^' => {
            cur.bump();
            Op::Xor
        }
        '+' => {
            cur.bump();
            Op::Plus
        }
        '-' => {
            cur.bump();
            Op::Minus
        }
        '*' => {
            cur.bump();
            Op::Mul
        }
        '%' => {
            cur.bump();
            Op::Mod
        }
        '/' => {
            cur.bump();
            Op::Div
        }
        '=' => {
            cur.bump();
            if cur.peek() == Some('=') {
                cur.bump();
            }
            Op::Equal
        }
        '>' => {
            cur.bump();
            match cur.peek() {
                Some('=') => {
                    cur.bump();
                    Op::GreaterEq
                }
                Some('>') => {
                    cur.bump();
                    Op::RightShift
                }
                _ => Op::Greater,
            }
        }
        '<' => {
            cur.bump();
            match cur.peek() {
                Some('=') => {
                    cur.bump();
                    Op::LessEq
                }
                Some('>') => {
                    cur.bump();
                    Op::NotEqual
                }
                Some('<') => {
                    cur.bump();
                    Op::LeftShift
                }
                _ => Op::Less,
            }
        }
        '!' => {
            let mut look = cur.clone();
            look.bump();
            if look.peek() == Some('=') {
                look.bump();
                *cur = look;
                Op::NotEqual
            } else {
                Op::None
            }
        }
        _ => Op::None,
    }
}

fn hex_digit(c: char) -> Result<i64, ErrorKind> {
    c.to_digit(16).map(i64::from).ok_or(ErrorKind::NotANumber)
}

impl Assembler {
    /// Evaluate an expression at the cursor, consuming as much as binds at
    /// `precedence` or tighter.
    pub(crate) fn eval(&mut self, cur: &mut Cursor, precedence: Prec) -> Result<i64, ErrorKind> {
        cur.eat_ws();
        let mut ret = match cur.peek() {
            Some('(') => {
                cur.bump();
                let v = self.eval(cur, Prec::WholeExp)?;
                if !cur.eat_char(')') {
                    return Err(ErrorKind::IncompleteExp);
                }
                v
            }
            Some('#') => {
                cur.bump();
                self.eval(cur, Prec::WholeExp)?
            }
            Some('~') => {
                cur.bump();
                !self.eval(cur, Prec::Unary)?
            }
            Some('!') => {
                cur.bump();
                (self.eval(cur, Prec::Unary)? == 0) as i64
            }
            Some('<') => {
                cur.bump();
                self.eval(cur, Prec::Unary)? & 0xFF
            }
            Some('>') => {
                cur.bump();
                (self.eval(cur, Prec::Unary)? >> 8) & 0xFF
            }
            Some(sign @ ('+' | '-')) => self.eval_sign_or_label(cur, sign)?,
            _ => self.get_value(cur)?,
        };
        loop {
            let mut look = cur.clone();
            let op = get_operator(&mut look);
            if precedence >= op.prec() {
                break;
            }
            let val2 = self.eval(&mut look, op.prec())?;
            if !self.dependant {
                ret = match op {
                    Op::And => ret & val2,
                    Op::AndAnd => (ret != 0 && val2 != 0) as i64,
                    Op::Or => ret | val2,
                    Op::OrOr => (ret != 0 || val2 != 0) as i64,
                    Op::Xor => ret ^ val2,
                    Op::Plus => ret.wrapping_add(val2),
                    Op::Minus => ret.wrapping_sub(val2),
                    Op::Mul => ret.wrapping_mul(val2),
                    Op::Div => {
                        if val2 == 0 {
                            return Err(ErrorKind::DivZero);
                        }
                        ret / val2
                    }
                    Op::Mod => {
                        if val2 == 0 {
                            return Err(ErrorKind::DivZero);
                        }
                        ret % val2
                    }
                    Op::Equal => (ret == val2) as i64,
                    Op::NotEqual => (ret != val2) as i64,
                    Op::Greater => (ret > val2) as i64,
                    Op::GreaterEq => (ret >= val2) as i64,
                    Op::Less => (ret < val2) as i64,
                    Op::LessEq => (ret <= val2) as i64,
                    Op::LeftShift => ret.wrapping_shl(val2 as u32),
                    Op::RightShift => ret.wrapping_shr(val2 as u32),
                    Op::None => unreachable!(),
                };
            } else {
                ret = 0;
            }
            *cur = look;
        }
        Ok(ret)
    }

    /// A leading `+` or `-` may open an anonymous-label reference rather
    /// than a unary operator. Try the label parse first; fall back to the
    /// unary operator when it consumed name characters but resolved to
    /// nothing, restoring the resolution flags around the attempt.
    fn eval_sign_or_label(&mut self, cur: &mut Cursor, sign: char) -> Result<i64, ErrorKind> {
        let mut trial = cur.clone();
        let saved_dep = self.dependant;
        let saved_nap = self.need_another_pass;
        self.dependant = false;
        let before = trial.pos();
        let tried = match self.get_value(&mut trial) {
            Err(ErrorKind::UnknownLabel) => Ok(0),
            other => other,
        };
        let val = tried?;
        if !self.dependant || trial.pos() == before + 1 {
            *cur = trial;
            self.dependant |= saved_dep;
            Ok(val)
        } else {
            self.dependant = saved_dep;
            self.need_another_pass = saved_nap;
            cur.bump();
            let v = self.eval(cur, Prec::Unary)?;
            Ok(if sign == '-' { v.wrapping_neg() } else { v })
        }
    }

    /// Parse one primary value: a literal, the PC (`$`), or a symbol.
    pub(crate) fn get_value(&mut self, cur: &mut Cursor) -> Result<i64, ErrorKind> {
        cur.eat_ws();
        let w = cur.word(true);
        let first = match w.chars().next() {
            Some(c) => c,
            None => return Err(ErrorKind::MissingOperand),
        };
        if first == '$' {
            let digits = &w[1..];
            if digits.is_empty() {
                return Ok(self.pc);
            }
            return parse_hex(digits);
        }
        if first == '%' {
            return parse_binary(&w[1..]);
        }
        if first == '\'' || first == '"' {
            return char_literal(first, w);
        }
        if first.is_ascii_digit() {
            if w.chars().all(|c| c.is_ascii_digit()) {
                return w.parse::<i64>().map_err(|_| ErrorKind::NotANumber);
            }
            if !w.is_char_boundary(w.len() - 1) {
                return Err(ErrorKind::NotANumber);
            }
            let (body, suffix) = w.split_at(w.len() - 1);
            return match suffix {
                "b" | "B" => parse_binary(body),
                "h" | "H" => parse_hex(body),
                _ => Err(ErrorKind::NotANumber),
            };
        }
        // A symbol reference.
        match self.symbols.lookup(w, self.scope, self.pass) {
            None => {
                self.dependant = true;
                self.need_another_pass = true;
                if self.last_chance {
                    Err(ErrorKind::UnknownLabel)
                } else {
                    Ok(0)
                }
            }
            Some(r) => {
                let sym = self.symbols.get(&r);
                self.dependant |= !sym.known();
                self.need_another_pass |= !sym.known();
                match sym.kind {
                    SymbolKind::Label { .. } | SymbolKind::Value { .. } => Ok(sym.value),
                    SymbolKind::Macro { .. } => Err(ErrorKind::MacroInExpression),
                    // An equate seen here was not defined yet this pass;
                    // substitution happens before parsing, so the raw name
                    // reaching the evaluator means the definition is ahead.
                    SymbolKind::Equate { .. } => Err(ErrorKind::UnknownLabel),
                }
            }
        }
    }

}

/// Quoted single character, with `\` escaping the next character. The word
/// scan delivered the whole quoted form, e.g. `'A'`.
fn char_literal(quote: char, word: &str) -> Result<i64, ErrorKind> {
    let mut inner = word[1..].chars();
    let mut c = match inner.next() {
        Some(c) => c,
        None => return Err(ErrorKind::NotANumber),
    };
    if c == '\\' {
        c = match inner.next() {
            Some(c) => c,
            None => return Err(ErrorKind::NotANumber),
        };
    }
    if inner.next() != Some(quote) {
        return Err(ErrorKind::NotANumber);
    }
    let mut buf = [0u8; 4];
    Ok(c.encode_utf8(&mut buf).as_bytes()[0] as i64)
}

fn parse_hex(digits: &str) -> Result<i64, ErrorKind> {
    let mut ret: i64 = 0;
    for c in digits.chars() {
        ret = ret.wrapping_shl(4) | hex_digit(c)?;
    }
    if digits.len() > 8 {
        return Err(ErrorKind::OutOfRange);
    }
    Ok(ret)
}

fn parse_binary(digits: &str) -> Result<i64, ErrorKind> {
    if digits.is_empty() {
        return Err(ErrorKind::NotANumber);
    }
    let mut ret: i64 = 0;
    for c in digits.chars() {
        match c {
            '0' => ret = ret.wrapping_shl(1),
            '1' => ret = ret.wrapping_shl(1) | 1,
            _ => return Err(ErrorKind::NotANumber),
        }
    }
    if digits.len() > 32 {
        return Err(ErrorKind::OutOfRange);
    }
    Ok(ret)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::{Assembler, Options};

    fn eval_str(src: &str) -> Result<i64, ErrorKind> {
        let mut asm = Assembler::new(Options::default());
        asm.pass = 1;
        let mut cur = Cursor::new(src);
        asm.eval(&mut cur, Prec::WholeExp)
    }

    #[test]
    fn literal_radixes() {
        assert_eq!(eval_str("$FF"), Ok(255));
        assert_eq!(eval_str("%1010"), Ok(10));
        assert_eq!(eval_str("123"), Ok(123));
        assert_eq!(eval_str("0Ah"), Ok(10));
        assert_eq!(eval_str("101b"), Ok(5));
        assert_eq!(eval_str("'A'"), Ok(65));
        assert_eq!(eval_str("\"z\""), Ok(122));
    }

    #[test]
    fn binary_precedence() {
        assert_eq!(eval_str("2+3*4"), Ok(14));
        assert_eq!(eval_str("2*3+4"), Ok(10));
        assert_eq!(eval_str("(2+3)*4"), Ok(20));
        assert_eq!(eval_str("1<<2|1"), Ok(5));
        assert_eq!(eval_str("1|1<<2"), Ok(5));
        assert_eq!(eval_str("10%3"), Ok(1));
        assert_eq!(eval_str("7/2"), Ok(3));
        assert_eq!(eval_str("1+2==3"), Ok(1));
    }

    #[test]
    fn unary_operators() {
        assert_eq!(eval_str("<$1234"), Ok(0x34));
        assert_eq!(eval_str(">$1234"), Ok(0x12));
        assert_eq!(eval_str("~0"), Ok(-1));
        assert_eq!(eval_str("!0"), Ok(1));
        assert_eq!(eval_str("!7"), Ok(0));
        assert_eq!(eval_str("-5"), Ok(-5));
        assert_eq!(eval_str("#$10"), Ok(16));
    }

    #[test]
    fn malformed_expressions() {
        assert_eq!(eval_str(""), Err(ErrorKind::MissingOperand));
        assert_eq!(eval_str("(1+2"), Err(ErrorKind::IncompleteExp));
        assert_eq!(eval_str("1/0"), Err(ErrorKind::DivZero));
        assert_eq!(eval_str("$GG"), Err(ErrorKind::NotANumber));
        assert_eq!(eval_str("%12"), Err(ErrorKind::NotANumber));
    }

    #[test]
    fn unknown_symbol_yields_zero_and_raises_flags() {
        let mut asm = Assembler::new(Options::default());
        asm.pass = 1;
        let mut cur = Cursor::new("missing+1");
        assert_eq!(asm.eval(&mut cur, Prec::WholeExp), Ok(0));
        assert!(asm.dependant);
        assert!(asm.need_another_pass);
    }

    #[test]
    fn unknown_symbol_is_hard_on_the_last_chance_pass() {
        let mut asm = Assembler::new(Options::default());
        asm.pass = 1;
        asm.last_chance = true;
        let mut cur = Cursor::new("missing");
        assert_eq!(
            asm.eval(&mut cur, Prec::WholeExp),
            Err(ErrorKind::UnknownLabel)
        );
    }
}
