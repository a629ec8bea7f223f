// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Lexical helpers and source-line parsing.
//!
//! Lines are broken into string fields rather than a token stream: the
//! operand text must survive verbatim so that macro substitution and the
//! expression evaluator can re-read it later.

/// A source line split into its five fields. Empty strings mean the field
/// is absent. `label` and `mnemonic` are case-folded to lower; operands
/// keep their original casing (character constants are byte-exact).
#[derive(Debug, Clone, Default)]
pub struct ParsedLine {
    pub label: String,
    pub mnemonic: String,
    pub operand1: String,
    pub operand2: String,
    pub comment: String,
}

/// Split `line` on `delimiter`, honoring quoted spans and angle-bracket
/// groups. A trailing `;` comment is stripped first. Every token is
/// trimmed, and even an empty line yields one empty token.
pub fn split_args(line: &str, delimiter: char) -> Vec<String> {
    let code = match line.find(';') {
        Some(pos) => &line[..pos],
        None => line,
    };
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut bracket_level = 0i32;
    let mut in_quotes = false;
    for c in code.chars() {
        if c == '\'' || c == '"' {
            in_quotes = !in_quotes;
        }
        if c == '<' {
            bracket_level += 1;
        }
        if c == '>' {
            bracket_level -= 1;
        }
        if c == delimiter && !in_quotes && bracket_level == 0 {
            tokens.push(current.trim().to_string());
            current.clear();
        } else {
            current.push(c);
        }
    }
    tokens.push(current.trim().to_string());
    tokens
}

/// Split off the first whitespace-delimited word. Both halves come back
/// trimmed on the facing side.
pub fn split_first_word(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    match s.find(char::is_whitespace) {
        Some(pos) => (&s[..pos], s[pos..].trim_start()),
        None => (s, ""),
    }
}

/// First two whitespace-delimited words of a line, case-folded. Used by
/// the macro pre-pass and the pass loop to spot `NAME MACRO` / `ENDM`
/// boundaries without a full parse.
pub fn first_two_words(line: &str) -> (String, String) {
    let (first, rest) = split_first_word(line.trim());
    let (second, _) = split_first_word(rest);
    (first.to_ascii_lowercase(), second.to_ascii_lowercase())
}

pub fn is_quote_delimited(s: &str) -> bool {
    if s.len() < 2 {
        return false;
    }
    let bytes = s.as_bytes();
    let first = bytes[0];
    let last = bytes[s.len() - 1];
    (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'')
}

pub fn is_char_constant(s: &str) -> bool {
    s.len() == 3 && s.starts_with('\'') && s.ends_with('\'')
}

/// Parse one raw source line into a [`ParsedLine`].
pub fn parse_line(raw: &str) -> ParsedLine {
    let mut out = ParsedLine::default();
    let line = raw.replace('\t', " ");
    let code = match line.find(';') {
        Some(pos) => {
            out.comment = line[pos + 1..].trim().to_string();
            line[..pos].to_string()
        }
        None => line,
    };
    let code = code.trim();
    if code.is_empty() {
        return out;
    }

    // `NAME EQU value` without a colon: the second word decides. Token
    // inspection rather than a substring search keeps labels and quoted
    // operands containing "equ" from misfiring.
    let (first, rest) = split_first_word(code);
    let (second, after_second) = split_first_word(rest);
    if second.eq_ignore_ascii_case("equ") {
        out.label = first.trim_end_matches(':').to_ascii_lowercase();
        out.mnemonic = "equ".to_string();
        out.operand1 = after_second.trim().to_string();
        return out;
    }

    // Colon-terminated label. The first colon outside quoted spans splits
    // the line, so character constants like ':' stay intact.
    let mut in_quotes = false;
    let mut label_split = None;
    for (i, c) in code.char_indices() {
        match c {
            '\'' | '"' => in_quotes = !in_quotes,
            ':' if !in_quotes => {
                label_split = Some(i);
                break;
            }
            _ => {}
        }
    }
    let code = match label_split {
        Some(pos) => {
            out.label = code[..pos].trim().to_ascii_lowercase();
            code[pos + 1..].trim()
        }
        None => code,
    };

    let (mnemonic, operands_part) = split_first_word(code);
    out.mnemonic = mnemonic.to_ascii_lowercase();
    let (operand1, operand2) = split_operands(operands_part);
    out.operand1 = operand1;
    out.operand2 = operand2;
    if out.mnemonic.is_empty() && !out.operand1.is_empty() {
        out.mnemonic = std::mem::take(&mut out.operand1).to_ascii_lowercase();
    }
    out
}

/// Split an operand field at the first comma outside quotes and angle
/// brackets.
fn split_operands(operands: &str) -> (String, String) {
    let mut in_quotes = false;
    let mut bracket_level = 0i32;
    for (i, c) in operands.char_indices() {
        match c {
            '\'' | '"' => in_quotes = !in_quotes,
            '<' => bracket_level += 1,
            '>' => bracket_level -= 1,
            ',' if !in_quotes && bracket_level == 0 => {
                return (
                    operands[..i].trim().to_string(),
                    operands[i + 1..].trim().to_string(),
                );
            }
            _ => {}
        }
    }
    (operands.trim().to_string(), String::new())
}

#[cfg(test)]
mod tests {
    use super::{
        first_two_words, is_char_constant, is_quote_delimited, parse_line, split_args,
        split_first_word,
    };

    #[test]
    fn split_args_handles_plain_lists() {
        assert_eq!(split_args("1, 2 , 3", ','), vec!["1", "2", "3"]);
    }

    #[test]
    fn split_args_empty_line_yields_one_empty_token() {
        assert_eq!(split_args("", ','), vec![""]);
    }

    #[test]
    fn split_args_does_not_split_inside_quotes() {
        assert_eq!(
            split_args("\"a,b\", 'c,d', 5", ','),
            vec!["\"a,b\"", "'c,d'", "5"]
        );
    }

    #[test]
    fn split_args_does_not_split_inside_angle_brackets() {
        assert_eq!(split_args("<1,2,3>, 4", ','), vec!["<1,2,3>", "4"]);
    }

    #[test]
    fn split_args_strips_trailing_comment() {
        assert_eq!(split_args("1, 2 ; a comment", ','), vec!["1", "2"]);
    }

    #[test]
    fn split_first_word_trims_remainder() {
        assert_eq!(split_first_word("  MVI   A,5"), ("MVI", "A,5"));
        assert_eq!(split_first_word("HLT"), ("HLT", ""));
        assert_eq!(split_first_word(""), ("", ""));
    }

    #[test]
    fn first_two_words_case_folds() {
        assert_eq!(
            first_two_words("  Delay MACRO count"),
            ("delay".to_string(), "macro".to_string())
        );
    }

    #[test]
    fn quote_helpers_match_both_quote_styles() {
        assert!(is_quote_delimited("\"AB\""));
        assert!(is_quote_delimited("'AB'"));
        assert!(!is_quote_delimited("AB"));
        assert!(is_char_constant("'C'"));
        assert!(!is_char_constant("'CD'"));
        assert!(!is_char_constant("\"C\""));
    }

    #[test]
    fn parse_plain_instruction_with_two_operands() {
        let line = parse_line("    MVI A, 5 ; load five");
        assert_eq!(line.label, "");
        assert_eq!(line.mnemonic, "mvi");
        assert_eq!(line.operand1, "A");
        assert_eq!(line.operand2, "5");
        assert_eq!(line.comment, "load five");
    }

    #[test]
    fn parse_colon_label() {
        let line = parse_line("LOOP: DCR B");
        assert_eq!(line.label, "loop");
        assert_eq!(line.mnemonic, "dcr");
        assert_eq!(line.operand1, "B");
    }

    #[test]
    fn parse_label_only_line() {
        let line = parse_line("START:");
        assert_eq!(line.label, "start");
        assert_eq!(line.mnemonic, "");
        assert_eq!(line.operand1, "");
    }

    #[test]
    fn parse_equ_without_colon() {
        let line = parse_line("VAL EQU 1234H");
        assert_eq!(line.label, "val");
        assert_eq!(line.mnemonic, "equ");
        assert_eq!(line.operand1, "1234H");
    }

    #[test]
    fn parse_equ_trims_stray_colon_from_label() {
        let line = parse_line("VAL: EQU 5");
        assert_eq!(line.label, "val");
        assert_eq!(line.mnemonic, "equ");
        assert_eq!(line.operand1, "5");
    }

    #[test]
    fn parse_equ_is_not_detected_inside_operands() {
        let line = parse_line("    DB \" equ \"");
        assert_eq!(line.mnemonic, "db");
        assert_eq!(line.operand1, "\" equ \"");
    }

    #[test]
    fn parse_keeps_operand_case() {
        let line = parse_line("    STA Result");
        assert_eq!(line.mnemonic, "sta");
        assert_eq!(line.operand1, "Result");
    }

    #[test]
    fn parse_splits_operands_at_top_level_comma_only() {
        let line = parse_line("    DB \"AB\",'C',65,<1,2,3>");
        assert_eq!(line.operand1, "\"AB\"");
        assert_eq!(line.operand2, "'C',65,<1,2,3>");
    }

    #[test]
    fn parse_colon_inside_char_constant_is_not_a_label() {
        let line = parse_line("    MVI A,':'");
        assert_eq!(line.label, "");
        assert_eq!(line.mnemonic, "mvi");
        assert_eq!(line.operand2, "':'");
    }

    #[test]
    fn parse_replaces_tabs_with_spaces() {
        let line = parse_line("\tMVI\tA,5");
        assert_eq!(line.mnemonic, "mvi");
        assert_eq!(line.operand1, "A");
        assert_eq!(line.operand2, "5");
    }

    #[test]
    fn parse_comment_only_line_is_empty() {
        let line = parse_line("; just a remark");
        assert_eq!(line.label, "");
        assert_eq!(line.mnemonic, "");
        assert_eq!(line.comment, "just a remark");
    }
}
