//! C1: the Breakpad `.sym` parser and the `SymbolTable` it produces.
//!
//! Grounded on `original_source/symParser.py`'s `SymbolInfo`/`ParseSymbolFile`:
//! only `PUBLIC` and `FUNC` lines are consumed, last write wins on an address
//! collision, and malformed lines are skipped rather than rejecting the whole
//! file.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::BufRead;

use crate::error::ParseError;

/// An address-ordered lookup table mapping PC offsets to function names.
///
/// `Lookup` preserves the upstream behavior of having no upper bound: a
/// `FUNC`'s size field is not used to cap attribution (§9 Open Question,
/// preserved as-is).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolTable {
    addresses: Vec<u64>,
    names: Vec<String>,
}

impl SymbolTable {
    pub fn entry_count(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    /// Returns the name at the largest index `i` with `addresses[i] <=
    /// offset`, or `None` if `offset` precedes the first recorded address.
    pub fn lookup(&self, offset: u64) -> Option<&str> {
        match self.addresses.binary_search(&offset) {
            Ok(i) => Some(self.names[i].as_str()),
            Err(0) => None,
            Err(i) => Some(self.names[i - 1].as_str()),
        }
    }

    fn from_map(map: BTreeMap<u64, String>) -> Self {
        let mut addresses = Vec::with_capacity(map.len());
        let mut names = Vec::with_capacity(map.len());
        for (addr, name) in map {
            addresses.push(addr);
            names.push(name);
        }
        SymbolTable { addresses, names }
    }

    #[cfg(test)]
    pub fn from_entries(entries: impl IntoIterator<Item = (u64, String)>) -> Self {
        Self::from_map(entries.into_iter().collect())
    }
}

/// Parses a Breakpad `.sym` byte stream into a [`SymbolTable`].
///
/// Recognizes two line kinds and ignores all others:
/// - `PUBLIC <hex_addr> <ignored> <name...>` (>= 4 fields)
/// - `FUNC <hex_addr> <ignored> <ignored> <name...>` (>= 5 fields)
///
/// A stream that yields zero valid entries still produces an empty table,
/// not an error; this only fails if reading the underlying stream fails.
pub fn parse_symbol_file<R: BufRead>(reader: R) -> Result<SymbolTable, ParseError> {
    let mut symbols: BTreeMap<u64, String> = BTreeMap::new();
    let mut public_count = 0usize;
    let mut func_count = 0usize;

    for (line_num, line) in reader.lines().enumerate() {
        let line = line?;
        if let Some(rest) = line.strip_prefix("PUBLIC ") {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 4 {
                log::warn!("sym file line {}: malformed PUBLIC line", line_num + 1);
                continue;
            }
            let _ = rest;
            match u64::from_str_radix(fields[1], 16) {
                Ok(addr) => {
                    symbols.insert(addr, fields[3..].join(" "));
                    public_count += 1;
                }
                Err(_) => {
                    log::warn!(
                        "sym file line {}: bad hex address in PUBLIC line",
                        line_num + 1
                    );
                }
            }
        } else if let Some(rest) = line.strip_prefix("FUNC ") {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 5 {
                log::warn!("sym file line {}: malformed FUNC line", line_num + 1);
                continue;
            }
            let _ = rest;
            match u64::from_str_radix(fields[1], 16) {
                Ok(addr) => {
                    symbols.insert(addr, fields[4..].join(" "));
                    func_count += 1;
                }
                Err(_) => {
                    log::warn!(
                        "sym file line {}: bad hex address in FUNC line",
                        line_num + 1
                    );
                }
            }
        }
    }

    log::debug!(
        "found {} unique entries from {} PUBLIC lines, {} FUNC lines",
        symbols.len(),
        public_count,
        func_count
    );

    Ok(SymbolTable::from_map(symbols))
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    fn parse(s: &str) -> SymbolTable {
        parse_symbol_file(Cursor::new(s.as_bytes())).unwrap()
    }

    #[test]
    fn scenario_1_literal_parse() {
        let table = parse("PUBLIC 1000 0 foo\nPUBLIC 2000 0 bar\nFUNC 1800 10 0 mid\n");
        assert_eq!(table.lookup(0x1000), Some("foo"));
        assert_eq!(table.lookup(0x17ff), Some("foo"));
        assert_eq!(table.lookup(0x1800), Some("mid"));
        assert_eq!(table.lookup(0x2000), Some("bar"));
        assert_eq!(table.lookup(0xfff), None);
    }

    #[test]
    fn empty_stream_yields_empty_table_not_error() {
        let table = parse("");
        assert!(table.is_empty());
        assert_eq!(table.entry_count(), 0);
    }

    #[test]
    fn malformed_lines_are_skipped_not_fatal() {
        let table = parse("PUBLIC nothex 0 foo\nPUBLIC 10 0 ok\nFUNC\n");
        assert_eq!(table.entry_count(), 1);
        assert_eq!(table.lookup(0x10), Some("ok"));
    }

    #[test]
    fn same_address_collision_last_write_wins() {
        let table = parse("PUBLIC 100 0 first\nFUNC 100 0 0 second\n");
        assert_eq!(table.entry_count(), 1);
        assert_eq!(table.lookup(0x100), Some("second"));
    }

    #[test]
    fn multi_word_names_are_joined_with_spaces() {
        let table = parse("PUBLIC 10 0 foo::bar(int, char)\n");
        assert_eq!(table.lookup(0x10), Some("foo::bar(int, char)"));
    }

    #[test]
    fn addresses_sorted_ascending_and_deduplicated() {
        let table = parse("PUBLIC 30 0 c\nPUBLIC 10 0 a\nPUBLIC 20 0 b\nPUBLIC 10 0 a2\n");
        assert_eq!(table.entry_count(), 3);
        assert_eq!(table.lookup(0x10), Some("a2"));
        assert_eq!(table.lookup(0x20), Some("b"));
        assert_eq!(table.lookup(0x30), Some("c"));
    }

    #[test]
    fn parsing_same_file_twice_yields_equal_tables() {
        let input = "PUBLIC 10 0 a\nFUNC 20 8 0 b\n1 2 3\n";
        assert_eq!(parse(input), parse(input));
    }
}
