//! The symbol table: a sorted store of scoped, chained symbols.
//!
//! All symbols sharing one name live in a chain kept in creation order.
//! Normal lookups pick the entry matching the current scope, falling back
//! to a global (scope 0) entry. Names made of `+` or `-` runs are anonymous
//! labels and resolve by pass position instead: a `-` name keeps a single
//! entry that is redefined in place as the pass walks the source (so a
//! reference always sees the most recent definition), while a `+` name has
//! one entry per definition site and a reference picks the first entry not
//! yet redefined this pass, which is exactly the next one ahead.

use std::collections::BTreeMap;

/// What a symbol is, and what it carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolKind {
    /// An address label. `known` is false while the PC was undefined at the
    /// definition site, which keeps referencing expressions provisional.
    Label { known: bool },
    /// Assigned with `=`; may be freely reassigned.
    Value { known: bool },
    /// A textual substitution; the body is re-parsed at every use.
    Equate { body: String },
    /// A parameterized body of captured source lines.
    Macro { params: Vec<String>, body: Vec<String> },
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub value: i64,
    /// Output-file position at the definition site (bank derivation).
    pub pos: i64,
    pub kind: SymbolKind,
    /// Re-entry guard for equate and macro expansion.
    pub used: bool,
    /// Pass in which the symbol was last defined.
    pub pass: u32,
    /// 0 = global, nonzero = private to one scope block.
    pub scope: u32,
    /// Suppress from symbol exports (IGNORENL regions).
    pub hidden: bool,
}

impl Symbol {
    /// Whether a referencing expression can rely on `value` this pass.
    pub fn known(&self) -> bool {
        match self.kind {
            SymbolKind::Label { known } | SymbolKind::Value { known } => known,
            SymbolKind::Equate { .. } | SymbolKind::Macro { .. } => true,
        }
    }
}

/// A stable handle to one chain entry. Chains only ever grow at the end,
/// so the index stays valid for the rest of the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymRef {
    pub name: String,
    idx: usize,
}

#[derive(Default)]
pub struct SymbolTable {
    map: BTreeMap<String, Vec<Symbol>>,
}

impl SymbolTable {
    pub fn new() -> SymbolTable {
        SymbolTable::default()
    }

    /// Find the entry visible from `scope` at this point of `pass`.
    pub fn lookup(&self, name: &str, scope: u32, pass: u32) -> Option<SymRef> {
        let chain = self.map.get(name)?;
        let idx = match name.chars().next() {
            Some('+') => chain.iter().position(|s| s.pass != pass)?,
            Some('-') => chain.iter().position(|s| s.pass == pass)?,
            _ => chain
                .iter()
                .rposition(|s| s.scope == scope)
                .or_else(|| chain.iter().rposition(|s| s.scope == 0))?,
        };
        Some(SymRef {
            name: name.to_string(),
            idx,
        })
    }

    pub fn get(&self, r: &SymRef) -> &Symbol {
        &self.map[&r.name][r.idx]
    }

    pub fn get_mut(&mut self, r: &SymRef) -> &mut Symbol {
        self.map
            .get_mut(&r.name)
            .map(|chain| &mut chain[r.idx])
            .expect("symbol handle outlived its entry")
    }

    /// Append a new entry to the name's chain.
    pub fn insert(&mut self, sym: Symbol) -> SymRef {
        let name = sym.name.clone();
        let chain = self.map.entry(sym.name.clone()).or_default();
        chain.push(sym);
        SymRef {
            name,
            idx: chain.len() - 1,
        }
    }

    /// All symbols in name order, chains in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &Symbol> {
        self.map.values().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label(name: &str, value: i64, scope: u32, pass: u32) -> Symbol {
        Symbol {
            name: name.to_string(),
            value,
            pos: 0,
            kind: SymbolKind::Label { known: true },
            used: false,
            pass,
            scope,
            hidden: false,
        }
    }

    #[test]
    fn local_shadows_global() {
        let mut t = SymbolTable::new();
        t.insert(label("x", 1, 0, 1));
        t.insert(label("x", 2, 5, 1));
        let r = t.lookup("x", 5, 1).unwrap();
        assert_eq!(t.get(&r).value, 2);
        let r = t.lookup("x", 7, 1).unwrap();
        assert_eq!(t.get(&r).value, 1);
    }

    #[test]
    fn missing_name_is_none() {
        let t = SymbolTable::new();
        assert!(t.lookup("nope", 0, 1).is_none());
    }

    #[test]
    fn global_invisible_when_only_foreign_locals_exist() {
        let mut t = SymbolTable::new();
        t.insert(label("y", 9, 3, 1));
        assert!(t.lookup("y", 4, 1).is_none());
    }

    #[test]
    fn forward_chain_picks_first_not_yet_redefined() {
        let mut t = SymbolTable::new();
        // Three `+` sites defined on pass 1, in source order.
        t.insert(label("+", 0x10, 2, 1));
        t.insert(label("+", 0x20, 3, 1));
        t.insert(label("+", 0x30, 4, 1));
        // Pass 2, after the first site was redefined: the next `+` ahead
        // is the second one.
        let r = t.lookup("+", 0, 2).unwrap();
        t.get_mut(&r).pass = 2;
        let r = t.lookup("+", 0, 2).unwrap();
        assert_eq!(t.get(&r).value, 0x20);
    }

    #[test]
    fn backward_label_needs_a_definition_this_pass() {
        let mut t = SymbolTable::new();
        t.insert(label("-", 0x80, 2, 1));
        // Pass 2, before the definition site is reached again.
        assert!(t.lookup("-", 0, 2).is_none());
        // After redefinition it resolves.
        let r = t.lookup("-", 0, 1).unwrap();
        assert_eq!(t.get(&r).value, 0x80);
    }

    #[test]
    fn iteration_is_name_sorted() {
        let mut t = SymbolTable::new();
        t.insert(label("zz", 1, 0, 1));
        t.insert(label("aa", 2, 0, 1));
        t.insert(label("mm", 3, 0, 1));
        let names: Vec<&str> = t.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["aa", "mm", "zz"]);
    }
}
