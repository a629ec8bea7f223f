// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Macro definition collection and textual substitution.
//!
//! Definitions are gathered in a single scan before pass 1. Expansion is
//! driven by the assembler (it needs the conditional stack and symbol
//! state); this module owns the definition store and the substitution
//! helpers.

use std::collections::{BTreeMap, HashMap};

use crate::parser::{split_args, split_first_word};

#[derive(Debug, Clone)]
pub struct MacroError {
    message: String,
    line: Option<u32>,
}

impl MacroError {
    pub fn new(message: impl Into<String>, line: Option<u32>) -> Self {
        Self {
            message: message.into(),
            line,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn line(&self) -> Option<u32> {
        self.line
    }
}

/// One macro definition. The name is case-folded; parameters keep their
/// spelling because substitution is textual. Body lines are stored raw,
/// exactly as captured between MACRO and ENDM/MEND.
#[derive(Debug, Clone)]
pub struct Macro {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<String>,
}

#[derive(Debug, Default)]
pub struct MacroTable {
    macros: HashMap<String, Macro>,
}

impl MacroTable {
    pub fn new() -> Self {
        Self {
            macros: HashMap::new(),
        }
    }

    pub fn clear(&mut self) {
        self.macros.clear();
    }

    pub fn contains(&self, name: &str) -> bool {
        self.macros.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Macro> {
        self.macros.get(name)
    }

    pub fn len(&self) -> usize {
        self.macros.len()
    }

    pub fn is_empty(&self) -> bool {
        self.macros.is_empty()
    }

    /// Single linear scan over the source, keyed on the first two
    /// case-folded words of each line. Nested definitions are rejected,
    /// and a definition left open at end of file is fatal.
    pub fn collect(lines: &[String]) -> Result<MacroTable, MacroError> {
        let mut table = MacroTable::new();
        let mut current: Option<Macro> = None;
        for (idx, raw) in lines.iter().enumerate() {
            let line_num = idx as u32 + 1;
            let (first, rest) = split_first_word(raw.trim());
            let (second, after) = split_first_word(rest);
            if second.eq_ignore_ascii_case("macro") {
                if current.is_some() {
                    return Err(MacroError::new(
                        "Nested macro definitions are not supported",
                        Some(line_num),
                    ));
                }
                current = Some(Macro {
                    name: first.to_ascii_lowercase(),
                    params: split_args(after, ','),
                    body: Vec::new(),
                });
            } else if first.eq_ignore_ascii_case("endm") || first.eq_ignore_ascii_case("mend") {
                let Some(def) = current.take() else {
                    return Err(MacroError::new("ENDM without matching MACRO", Some(line_num)));
                };
                table.macros.insert(def.name.clone(), def);
            } else if let Some(def) = current.as_mut() {
                def.body.push(raw.clone());
            }
        }
        if current.is_some() {
            return Err(MacroError::new("Macro definition not closed with ENDM", None));
        }
        Ok(table)
    }
}

/// Collect the LOCAL declarations of a macro body and map each name to its
/// expansion-unique form `name_N`. The ordered map keeps substitution
/// deterministic.
pub fn local_label_map(def: &Macro, counter: u32) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    for body_line in &def.body {
        let (first, rest) = split_first_word(body_line.trim());
        if first.eq_ignore_ascii_case("local") {
            for name in split_args(rest, ',') {
                if name.is_empty() {
                    continue;
                }
                map.insert(name.clone(), format!("{name}_{counter}"));
            }
        }
    }
    map
}

/// Sequential textual substring replacement. Replacement text is never
/// rescanned for further matches. Empty names are skipped.
pub fn substitute(line: &str, replacements: &[(String, String)]) -> String {
    let mut result = line.to_string();
    for (from, to) in replacements {
        if from.is_empty() {
            continue;
        }
        result = result.replace(from.as_str(), to);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::{local_label_map, substitute, MacroTable};

    fn lines(src: &[&str]) -> Vec<String> {
        src.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn collects_a_simple_macro() {
        let table = MacroTable::collect(&lines(&[
            "DELAY MACRO COUNT",
            "      MVI B,COUNT",
            "      ENDM",
        ]))
        .expect("collect");
        let def = table.get("delay").expect("definition stored");
        assert_eq!(def.params, vec!["COUNT"]);
        assert_eq!(def.body, vec!["      MVI B,COUNT"]);
    }

    #[test]
    fn macro_name_is_case_folded() {
        let table =
            MacroTable::collect(&lines(&["Delay Macro", "      NOP", "      MEND"])).expect("collect");
        assert!(table.contains("delay"));
    }

    #[test]
    fn body_lines_are_kept_raw() {
        let table = MacroTable::collect(&lines(&[
            "M MACRO A,B",
            "LBL: MVI C,A ; keep me",
            "     ENDM",
        ]))
        .expect("collect");
        assert_eq!(table.get("m").expect("def").body, vec!["LBL: MVI C,A ; keep me"]);
    }

    #[test]
    fn nested_definition_is_fatal() {
        let err = MacroTable::collect(&lines(&["A MACRO", "B MACRO", "ENDM", "ENDM"]))
            .expect_err("nested definitions must fail");
        assert_eq!(err.line(), Some(2));
        assert!(err.message().contains("Nested"));
    }

    #[test]
    fn endm_without_macro_is_fatal() {
        let err = MacroTable::collect(&lines(&["  ENDM"])).expect_err("stray ENDM must fail");
        assert_eq!(err.line(), Some(1));
    }

    #[test]
    fn unclosed_definition_is_fatal() {
        let err = MacroTable::collect(&lines(&["A MACRO", " NOP"])).expect_err("open macro at eof");
        assert_eq!(err.line(), None);
        assert!(err.message().contains("not closed"));
    }

    #[test]
    fn local_map_builds_suffixed_names() {
        let table = MacroTable::collect(&lines(&[
            "DELAY MACRO COUNT",
            "      LOCAL LOOP, DONE",
            "LOOP: DCR B",
            "      ENDM",
        ]))
        .expect("collect");
        let map = local_label_map(table.get("delay").expect("def"), 2);
        assert_eq!(map.get("LOOP").map(String::as_str), Some("LOOP_2"));
        assert_eq!(map.get("DONE").map(String::as_str), Some("DONE_2"));
    }

    #[test]
    fn substitute_replaces_all_occurrences() {
        let replacements = vec![("COUNT".to_string(), "5".to_string())];
        assert_eq!(substitute("MVI B,COUNT ; COUNT", &replacements), "MVI B,5 ; 5");
    }

    #[test]
    fn substitute_skips_empty_names() {
        let replacements = vec![(String::new(), "5".to_string())];
        assert_eq!(substitute("NOP", &replacements), "NOP");
    }

    #[test]
    fn substitute_does_not_rescan_replacement_text() {
        let replacements = vec![("A".to_string(), "AA".to_string())];
        assert_eq!(substitute("A", &replacements), "AA");
    }

    #[test]
    fn zero_param_macro_keeps_single_empty_param() {
        // split_args on an empty tail yields one empty token; invocation
        // argument lists do the same, so the counts stay in agreement.
        let table =
            MacroTable::collect(&lines(&["PING MACRO", " NOP", " ENDM"])).expect("collect");
        assert_eq!(table.get("ping").expect("def").params, vec![""]);
    }
}
