// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Symbol table and cross-reference store.

use std::collections::BTreeMap;
use std::io::{self, Write};

/// Result of a symbol insertion. Insertion is one-shot per label; the
/// caller turns `Duplicate` into a fatal error during pass 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolInsert {
    Added,
    Duplicate,
}

/// Label to 16-bit address map. Keys are stored case-folded; the ordered
/// map gives the `.sym` dump its sorted output.
#[derive(Debug, Default)]
pub struct SymbolTable {
    entries: BTreeMap<String, u16>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn insert(&mut self, name: &str, value: u16) -> SymbolInsert {
        if self.entries.contains_key(name) {
            return SymbolInsert::Duplicate;
        }
        self.entries.insert(name.to_string(), value);
        SymbolInsert::Added
    }

    pub fn get(&self, name: &str) -> Option<u16> {
        self.entries.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u16)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), *value))
    }

    /// Symbol file dump: one `AAAA NAME` line per symbol, address in
    /// uppercase 4-digit hex, name uppercased and truncated to 16 chars.
    pub fn dump<W: Write>(&self, out: &mut W) -> io::Result<()> {
        for (name, value) in &self.entries {
            let mut display = name.to_ascii_uppercase();
            display.truncate(16);
            writeln!(out, "{value:04X} {display}")?;
        }
        Ok(())
    }
}

/// Cross-reference store: label to signed 1-indexed line numbers. A
/// negative entry `-n` marks the definition at line `n`; positive entries
/// are references. Exact duplicates are skipped so pass-2 re-evaluation of
/// ORG/DS/EQU/IF expressions does not double every reference.
#[derive(Debug, Default)]
pub struct CrossReference {
    entries: BTreeMap<String, Vec<i32>>,
}

impl CrossReference {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn record_definition(&mut self, name: &str, line: u32) {
        self.record(name, -(line as i32));
    }

    pub fn record_reference(&mut self, name: &str, line: u32) {
        self.record(name, line as i32);
    }

    fn record(&mut self, name: &str, entry: i32) {
        let list = self.entries.entry(name.to_string()).or_default();
        if !list.contains(&entry) {
            list.push(entry);
        }
    }

    pub fn get(&self, name: &str) -> Option<&[i32]> {
        self.entries.get(name).map(|list| list.as_slice())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cross-reference report: 20-column left-justified name, 4-digit hex
    /// address, then line numbers sorted by absolute value with the
    /// definition line prefixed `#`.
    pub fn write_report<W: Write>(&self, out: &mut W, symbols: &SymbolTable) -> io::Result<()> {
        writeln!(out, "--- Cross-Reference Listing ---")?;
        writeln!(out)?;
        for (name, lines) in &self.entries {
            let addr = symbols.get(name).unwrap_or(0);
            let mut sorted = lines.clone();
            sorted.sort_by_key(|line| line.abs());
            let mut refs = String::new();
            for line in sorted {
                if line < 0 {
                    refs.push_str(&format!("#{} ", -line));
                } else {
                    refs.push_str(&format!("{line} "));
                }
            }
            writeln!(out, "{name:<20}{addr:04X}   {}", refs.trim_end())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{CrossReference, SymbolInsert, SymbolTable};

    #[test]
    fn insert_is_one_shot() {
        let mut symbols = SymbolTable::new();
        assert_eq!(symbols.insert("loop", 0x100), SymbolInsert::Added);
        assert_eq!(symbols.insert("loop", 0x200), SymbolInsert::Duplicate);
        assert_eq!(symbols.get("loop"), Some(0x100));
    }

    #[test]
    fn dump_uppercases_and_truncates() {
        let mut symbols = SymbolTable::new();
        symbols.insert("result", 0x0108);
        symbols.insert("a_very_long_symbol_name", 0x20);
        let mut out = Vec::new();
        symbols.dump(&mut out).expect("dump");
        let text = String::from_utf8(out).expect("utf8");
        assert!(text.contains("0108 RESULT"));
        assert!(text.contains("0020 A_VERY_LONG_SYMB\n"));
    }

    #[test]
    fn dump_is_sorted_by_name() {
        let mut symbols = SymbolTable::new();
        symbols.insert("zz", 1);
        symbols.insert("aa", 2);
        let mut out = Vec::new();
        symbols.dump(&mut out).expect("dump");
        let text = String::from_utf8(out).expect("utf8");
        let aa = text.find("AA").expect("aa");
        let zz = text.find("ZZ").expect("zz");
        assert!(aa < zz);
    }

    #[test]
    fn cross_reference_marks_definition_negative() {
        let mut xref = CrossReference::new();
        xref.record_definition("target", 4);
        xref.record_reference("target", 2);
        assert_eq!(xref.get("target"), Some(&[-4, 2][..]));
    }

    #[test]
    fn cross_reference_skips_exact_duplicates() {
        let mut xref = CrossReference::new();
        xref.record_reference("val", 3);
        xref.record_reference("val", 3);
        xref.record_reference("val", 7);
        assert_eq!(xref.get("val"), Some(&[3, 7][..]));
    }

    #[test]
    fn report_sorts_by_absolute_value_and_flags_definition() {
        let mut symbols = SymbolTable::new();
        symbols.insert("target", 0x0004);
        let mut xref = CrossReference::new();
        xref.record_reference("target", 2);
        xref.record_definition("target", 4);
        xref.record_reference("target", 9);
        let mut out = Vec::new();
        xref.write_report(&mut out, &symbols).expect("report");
        let text = String::from_utf8(out).expect("utf8");
        assert!(text.starts_with("--- Cross-Reference Listing ---\n\n"));
        assert!(text.contains("target              0004   2 #4 9"));
    }
}
