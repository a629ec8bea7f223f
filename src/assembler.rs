// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

// Assembler core pipeline and listing/output generation.

use std::fmt;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use clap::{ArgAction, Parser, ValueEnum};
use serde_json::json;

use crate::expr::{self, ExprEvaluator};
use crate::instructions::{self, Instruction, OperandShape, PairKind, Reg16Error};
use crate::parser::{self, ParsedLine};
use crate::preprocess::{self, MacroTable};
use crate::symbol_table::{CrossReference, SymbolInsert, SymbolTable};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const LONG_ABOUT: &str = "Intel 8080 cross-assembler with macros, conditional assembly and expressions.

The flat binary image is always written (default: <input base>.com).
Auxiliary reports are opt-in: -s/--symbols, -l/--list and -c/--cross-reference
are written next to the working directory using the input base name.
-O/--octal switches the listing address and byte columns from hex to octal.";

/// Macro expansions deeper than this abort instead of recursing forever.
const MAX_EXPANSION_DEPTH: usize = 64;

#[derive(Parser, Debug)]
#[command(
    name = "asm80",
    version = VERSION,
    about = "Intel 8080 cross-assembler with macros, conditionals and expressions",
    long_about = LONG_ABOUT
)]
pub struct Cli {
    #[arg(
        value_name = "SOURCE",
        long_help = "Input assembly file. Must end with .asm."
    )]
    pub source: PathBuf,
    #[arg(
        short = 'o',
        long = "outfile",
        value_name = "FILE",
        long_help = "Binary output filename. Defaults to the input base with a .com extension."
    )]
    pub outfile: Option<String>,
    #[arg(
        short = 's',
        long = "symbols",
        action = ArgAction::SetTrue,
        long_help = "Write a <base>.sym symbol table dump."
    )]
    pub symbols: bool,
    #[arg(
        short = 'l',
        long = "list",
        action = ArgAction::SetTrue,
        long_help = "Write a <base>.lst listing with per-line addresses and emitted bytes."
    )]
    pub listing: bool,
    #[arg(
        short = 'c',
        long = "cross-reference",
        action = ArgAction::SetTrue,
        long_help = "Write a <base>.crf cross-reference report."
    )]
    pub cross_reference: bool,
    #[arg(
        short = 'O',
        long = "octal",
        action = ArgAction::SetTrue,
        long_help = "Render listing addresses and bytes in octal instead of hex."
    )]
    pub octal: bool,
    #[arg(
        long = "format",
        value_enum,
        default_value_t = OutputFormat::Text,
        long_help = "Select CLI output format. text is default; json emits a machine-readable run summary and diagnostics."
    )]
    pub format: OutputFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Assemble one source file and write the requested outputs.
pub fn run_with_cli(cli: &Cli) -> Result<AsmRunReport, AsmRunError> {
    let (asm_name, base) = input_base_from_path(&cli.source)?;
    let out_path = cli.outfile.clone().unwrap_or_else(|| format!("{base}.com"));

    let contents = fs::read_to_string(&asm_name).map_err(|_| {
        AsmRunError::new(
            AsmError::new(AsmErrorKind::Io, "Cannot open input file", Some(&asm_name)),
            Vec::new(),
            Vec::new(),
        )
    })?;
    let src_lines: Vec<String> = contents.lines().map(|s| s.to_string()).collect();

    let mut assembler = Assembler::new();

    let list_path = format!("{base}.lst");
    let mut list_output: Box<dyn Write> = if cli.listing {
        Box::new(File::create(&list_path).map_err(|_| {
            io_run_error("Error opening file for write", &list_path, &src_lines)
        })?)
    } else {
        Box::new(io::sink())
    };
    let mut listing = ListingWriter::new(&mut *list_output, cli.octal);

    if let Err(diag) = assembler.assemble(&src_lines, &mut listing) {
        let error = diag.error().clone();
        return Err(AsmRunError::new(error, vec![diag], src_lines));
    }

    fs::write(&out_path, assembler.output())
        .map_err(|_| io_run_error("Error opening file for write", &out_path, &src_lines))?;

    let mut sym_path = None;
    if cli.symbols {
        let path = format!("{base}.sym");
        let mut file = File::create(&path)
            .map_err(|_| io_run_error("Error opening file for write", &path, &src_lines))?;
        assembler
            .symbols()
            .dump(&mut file)
            .map_err(|err| io_run_error(&err.to_string(), &path, &src_lines))?;
        sym_path = Some(path);
    }

    let mut crf_path = None;
    if cli.cross_reference {
        let path = format!("{base}.crf");
        let mut file = File::create(&path)
            .map_err(|_| io_run_error("Error opening file for write", &path, &src_lines))?;
        assembler
            .cross_reference()
            .write_report(&mut file, assembler.symbols())
            .map_err(|err| io_run_error(&err.to_string(), &path, &src_lines))?;
        crf_path = Some(path);
    }

    match cli.format {
        OutputFormat::Json => {
            println!(
                "{}",
                json!({
                    "output": out_path,
                    "bytes": assembler.output().len(),
                    "symbols": assembler.symbols().len(),
                    "listing": cli.listing.then_some(list_path),
                    "symbol_file": sym_path,
                    "cross_reference_file": crf_path,
                })
            );
        }
        OutputFormat::Text => {
            println!("{} bytes written to {}", assembler.output().len(), out_path);
            if cli.listing {
                println!("Listing file written to {list_path}");
            }
            if let Some(path) = &sym_path {
                println!("{} symbols written to {}", assembler.symbols().len(), path);
            }
            if let Some(path) = &crf_path {
                println!("Cross-Reference file written to {path}");
            }
        }
    }

    Ok(AsmRunReport::new(assembler.take_warnings(), src_lines))
}

fn io_run_error(msg: &str, param: &str, source_lines: &[String]) -> AsmRunError {
    AsmRunError::new(
        AsmError::new(AsmErrorKind::Io, msg, Some(param)),
        Vec::new(),
        source_lines.to_vec(),
    )
}

fn input_base_from_path(path: &Path) -> Result<(String, String), AsmRunError> {
    let asm_name = path.to_string_lossy().to_string();
    let file_name = match path.file_name().and_then(|s| s.to_str()) {
        Some(name) => name,
        None => {
            return Err(AsmRunError::new(
                AsmError::new(AsmErrorKind::Cli, "Invalid input file name", None),
                Vec::new(),
                Vec::new(),
            ))
        }
    };
    if !file_name.ends_with(".asm") {
        return Err(AsmRunError::new(
            AsmError::new(AsmErrorKind::Cli, "Input file must end with .asm", None),
            Vec::new(),
            Vec::new(),
        ));
    }
    let base = file_name.strip_suffix(".asm").unwrap_or(file_name);
    Ok((asm_name, base.to_string()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsmErrorKind {
    Assembler,
    Cli,
    Conditional,
    Directive,
    Expression,
    Instruction,
    Io,
    Preprocess,
    Symbol,
}

#[derive(Debug, Clone)]
pub struct AsmError {
    kind: AsmErrorKind,
    message: String,
}

impl AsmError {
    pub fn new(kind: AsmErrorKind, msg: &str, param: Option<&str>) -> Self {
        Self {
            kind,
            message: format_error(msg, param),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn kind(&self) -> AsmErrorKind {
        self.kind
    }
}

impl fmt::Display for AsmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AsmError {}

fn format_error(msg: &str, param: Option<&str>) -> String {
    match param {
        Some(p) => format!("{msg}: {p}"),
        None => msg.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    line: u32,
    severity: Severity,
    error: AsmError,
    file: Option<String>,
}

impl Diagnostic {
    fn new(line: u32, severity: Severity, error: AsmError) -> Self {
        Self {
            line,
            severity,
            error,
            file: None,
        }
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn error(&self) -> &AsmError {
        &self.error
    }

    pub fn message(&self) -> &str {
        self.error.message()
    }

    pub fn format(&self) -> String {
        let sev = match self.severity {
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
        };
        format!("{}: {} - {}", self.line, sev, self.error.message())
    }

    pub fn format_with_context(&self, lines: Option<&[String]>, use_color: bool) -> String {
        let sev = match self.severity {
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
        };
        let header = match &self.file {
            Some(file) => format!("{file}:{}: {sev}", self.line),
            None => format!("line {}: {sev}", self.line),
        };

        let mut out = String::new();
        out.push_str(&header);
        out.push('\n');
        for line in build_context_lines(self.line, lines, use_color) {
            out.push_str(&line);
            out.push('\n');
        }
        out.push_str(&format!("{sev}: {}", self.error.message()));
        out
    }

    pub fn to_json(&self) -> serde_json::Value {
        let severity = match self.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        json!({
            "line": self.line,
            "severity": severity,
            "message": self.error.message(),
            "file": self.file,
        })
    }
}

fn build_context_lines(line_num: u32, lines: Option<&[String]>, use_color: bool) -> Vec<String> {
    let mut out = Vec::new();
    let line_idx = line_num.saturating_sub(1) as usize;
    let lines = match lines {
        Some(lines) if !lines.is_empty() => lines,
        _ => {
            out.push(format!("{line_num:>5} | <source unavailable>"));
            return out;
        }
    };
    if line_idx >= lines.len() {
        out.push(format!("{line_num:>5} | <source unavailable>"));
        return out;
    }
    let line = &lines[line_idx];
    if use_color {
        out.push(format!("{line_num:>5} | \x1b[31m{line}\x1b[0m"));
    } else {
        out.push(format!("{line_num:>5} | {line}"));
    }
    out
}

pub struct AsmRunReport {
    diagnostics: Vec<Diagnostic>,
    source_lines: Vec<String>,
}

impl AsmRunReport {
    fn new(diagnostics: Vec<Diagnostic>, source_lines: Vec<String>) -> Self {
        Self {
            diagnostics,
            source_lines,
        }
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn source_lines(&self) -> &[String] {
        &self.source_lines
    }
}

#[derive(Debug)]
pub struct AsmRunError {
    error: AsmError,
    diagnostics: Vec<Diagnostic>,
    source_lines: Vec<String>,
}

impl AsmRunError {
    fn new(error: AsmError, diagnostics: Vec<Diagnostic>, source_lines: Vec<String>) -> Self {
        Self {
            error,
            diagnostics,
            source_lines,
        }
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn source_lines(&self) -> &[String] {
        &self.source_lines
    }
}

impl fmt::Display for AsmRunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl std::error::Error for AsmRunError {}

/// Two-pass assembler. Pass 1 builds the symbol table; pass 2 emits the
/// image and the listing. All mutable assembly state lives here; the
/// first error aborts the run.
pub struct Assembler {
    symbols: SymbolTable,
    xref: CrossReference,
    macros: MacroTable,
    output: Vec<u8>,
    address: u16,
    origin: u16,
    pass: u8,
    lineno: u32,
    if_stack: Vec<bool>,
    finished: bool,
    expansion_counter: u32,
    line: ParsedLine,
    warnings: Vec<Diagnostic>,
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new()
    }
}

impl Assembler {
    pub fn new() -> Self {
        Self {
            symbols: SymbolTable::new(),
            xref: CrossReference::new(),
            macros: MacroTable::new(),
            output: Vec::new(),
            address: 0,
            origin: 0,
            pass: 1,
            lineno: 0,
            if_stack: Vec::new(),
            finished: false,
            expansion_counter: 0,
            line: ParsedLine::default(),
            warnings: Vec::new(),
        }
    }

    pub fn output(&self) -> &[u8] {
        &self.output
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn cross_reference(&self) -> &CrossReference {
        &self.xref
    }

    pub fn address(&self) -> u16 {
        self.address
    }

    /// Address the first emitted byte of the image maps to.
    pub fn origin(&self) -> u16 {
        self.origin
    }

    pub fn take_warnings(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.warnings)
    }

    /// Run the macro pre-pass and both assembly passes. Symbols, macros
    /// and cross-references survive into pass 2; everything else resets.
    pub fn assemble<W: Write>(
        &mut self,
        lines: &[String],
        listing: &mut ListingWriter<W>,
    ) -> Result<(), Diagnostic> {
        self.reset_state();
        self.macros = MacroTable::collect(lines).map_err(|err| {
            let line = err.line().unwrap_or(lines.len() as u32 + 1);
            Diagnostic::new(
                line,
                Severity::Error,
                AsmError::new(AsmErrorKind::Preprocess, err.message(), None),
            )
        })?;
        self.pass = 1;
        self.do_pass(lines, listing)?;
        self.reset_pass_state();
        self.pass = 2;
        self.do_pass(lines, listing)
    }

    fn reset_state(&mut self) {
        self.symbols.clear();
        self.xref.clear();
        self.macros.clear();
        self.warnings.clear();
        self.lineno = 0;
        self.reset_pass_state();
    }

    fn reset_pass_state(&mut self) {
        self.output.clear();
        self.address = 0;
        self.origin = 0;
        self.finished = false;
        self.expansion_counter = 0;
        self.if_stack.clear();
    }

    fn do_pass<W: Write>(
        &mut self,
        lines: &[String],
        listing: &mut ListingWriter<W>,
    ) -> Result<(), Diagnostic> {
        self.if_stack.clear();
        let mut in_macro_def = false;
        for (idx, raw) in lines.iter().enumerate() {
            if self.finished {
                break;
            }
            self.lineno = idx as u32 + 1;
            let line_addr = self.address;
            let bytes_before = self.output.len();

            let trimmed = raw.trim();
            if trimmed.is_empty() {
                if self.pass == 2 {
                    listing
                        .write_source_only(raw)
                        .map_err(|err| self.io_diag(&err))?;
                }
                continue;
            }

            // Macro definitions are suppressed in both passes; the
            // pre-pass has already captured their bodies.
            let (first, second) = parser::first_two_words(trimmed);
            if second == "macro" {
                in_macro_def = true;
            }
            if in_macro_def {
                if first == "endm" || first == "mend" {
                    in_macro_def = false;
                }
                continue;
            }

            self.expand_and_process_line(raw, 0)
                .map_err(|err| Diagnostic::new(self.lineno, Severity::Error, err))?;

            if self.pass == 2 {
                listing
                    .write_line(line_addr, &self.output[bytes_before..], raw)
                    .map_err(|err| self.io_diag(&err))?;
            }
        }

        if !self.if_stack.is_empty() {
            return Err(Diagnostic::new(
                lines.len() as u32 + 1,
                Severity::Error,
                AsmError::new(AsmErrorKind::Conditional, "IF block not closed with ENDIF", None),
            ));
        }
        Ok(())
    }

    fn io_diag(&self, err: &io::Error) -> Diagnostic {
        Diagnostic::new(
            self.lineno,
            Severity::Error,
            AsmError::new(AsmErrorKind::Io, &err.to_string(), None),
        )
    }

    /// Conditional handling, macro expansion and dispatch for one line.
    /// Macro bodies recurse here with the invocation-site line number
    /// left in place.
    fn expand_and_process_line(&mut self, line: &str, depth: usize) -> Result<(), AsmError> {
        if depth > MAX_EXPANSION_DEPTH {
            return Err(AsmError::new(
                AsmErrorKind::Preprocess,
                "Macro expansion exceeded maximum depth",
                None,
            ));
        }
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with(';') {
            return Ok(());
        }
        let (first, rest) = parser::split_first_word(trimmed);
        let lower_first = first.to_ascii_lowercase();

        if lower_first == "if" {
            let result = if self.should_skip() {
                false
            } else {
                self.evaluate_conditional(rest)?
            };
            self.if_stack.push(result);
            return Ok(());
        }
        if lower_first == "endif" {
            if self.if_stack.pop().is_none() {
                return Err(AsmError::new(
                    AsmErrorKind::Conditional,
                    "ENDIF without matching IF",
                    None,
                ));
            }
            return Ok(());
        }
        if self.should_skip() {
            return Ok(());
        }
        if lower_first == "error" || lower_first == "local" {
            return Ok(());
        }

        if self.macros.contains(&lower_first) {
            self.expansion_counter += 1;
            let counter = self.expansion_counter;
            let def = self.macros.get(&lower_first).cloned().unwrap();
            let args = parser::split_args(rest, ',');
            if args.len() != def.params.len() {
                return Err(AsmError::new(
                    AsmErrorKind::Preprocess,
                    "Macro argument count mismatch",
                    Some(&def.name),
                ));
            }
            let mut replacements: Vec<(String, String)> =
                def.params.iter().cloned().zip(args).collect();
            replacements.extend(preprocess::local_label_map(&def, counter));
            for body_line in &def.body {
                let expanded = preprocess::substitute(body_line, &replacements);
                self.expand_and_process_line(&expanded, depth + 1)?;
            }
            return Ok(());
        }

        self.line = parser::parse_line(line);
        self.process_instruction()
    }

    fn should_skip(&self) -> bool {
        self.if_stack.iter().any(|active| !active)
    }

    fn evaluate_conditional(&mut self, operand: &str) -> Result<bool, AsmError> {
        expr::evaluate_conditional(
            operand,
            &self.symbols,
            &mut self.xref,
            self.pass,
            self.address,
            self.lineno,
        )
    }

    fn evaluate_expression(&mut self, text: &str) -> Result<i32, AsmError> {
        ExprEvaluator::new(
            text,
            &self.symbols,
            &mut self.xref,
            self.pass,
            self.address,
            self.lineno,
        )
        .evaluate()
    }

    fn process_instruction(&mut self) -> Result<(), AsmError> {
        if self.line.mnemonic.is_empty() && self.line.label.is_empty() {
            return Ok(());
        }
        let mnemonic = self.line.mnemonic.clone();
        match mnemonic.as_str() {
            "" => self.pass_action(0, &[], true),
            "org" => self.dir_org(),
            "equ" => self.dir_equ(),
            "db" => self.dir_db(),
            "dw" => self.dir_dw(),
            "ds" => self.dir_ds(),
            "end" => self.dir_end(),
            "name" | "title" => Ok(()),
            _ => match instructions::lookup(&mnemonic) {
                Some(inst) => self.encode_instruction(inst),
                None => Err(AsmError::new(
                    AsmErrorKind::Instruction,
                    "Unknown mnemonic",
                    Some(&mnemonic),
                )),
            },
        }
    }

    /// The single pass funnel. Pass 1 registers the line's label, pass 2
    /// appends the bytes, and both advance the location counter by the
    /// same amount, which keeps forward references aligned.
    fn pass_action(&mut self, size: u16, bytes: &[u8], add_label: bool) -> Result<(), AsmError> {
        if self.pass == 1 {
            if add_label && !self.line.label.is_empty() {
                self.add_label()?;
            }
        } else {
            self.output.extend_from_slice(bytes);
        }
        self.address = self.address.wrapping_add(size);
        Ok(())
    }

    fn add_label(&mut self) -> Result<(), AsmError> {
        let label = self.line.label.clone();
        if self.symbols.insert(&label, self.address) == SymbolInsert::Duplicate {
            return Err(AsmError::new(AsmErrorKind::Symbol, "Duplicate label", Some(&label)));
        }
        self.xref.record_definition(&label, self.lineno);
        Ok(())
    }

    fn check_operands(&self, valid: bool, name: &str) -> Result<(), AsmError> {
        if valid {
            Ok(())
        } else {
            Err(AsmError::new(
                AsmErrorKind::Instruction,
                "Invalid operands for mnemonic",
                Some(name),
            ))
        }
    }

    fn encode_instruction(&mut self, inst: &Instruction) -> Result<(), AsmError> {
        let op1 = self.line.operand1.clone();
        let op2 = self.line.operand2.clone();
        let name = inst.mnemonic;
        match inst.shape {
            OperandShape::None => {
                self.check_operands(op1.is_empty() && op2.is_empty(), name)?;
                self.pass_action(inst.shape.size(), &[inst.base], true)
            }
            OperandShape::Reg8Shifted => {
                self.check_operands(!op1.is_empty() && op2.is_empty(), name)?;
                let reg = self.reg8(&op1)?;
                self.pass_action(inst.shape.size(), &[inst.base | (reg << 3)], true)
            }
            OperandShape::Reg8Added => {
                self.check_operands(!op1.is_empty() && op2.is_empty(), name)?;
                let reg = self.reg8(&op1)?;
                self.pass_action(inst.shape.size(), &[inst.base + reg], true)
            }
            OperandShape::MovPair => {
                self.check_operands(!op1.is_empty() && !op2.is_empty(), name)?;
                let dst = self.reg8(&op1)?;
                let src = self.reg8(&op2)?;
                self.pass_action(inst.shape.size(), &[inst.base + (dst << 3) + src], true)
            }
            OperandShape::RegPairSp | OperandShape::RegPairPsw => {
                self.check_operands(!op1.is_empty() && op2.is_empty(), name)?;
                let pair = self.reg16(&op1, inst)?;
                self.pass_action(inst.shape.size(), &[inst.base + pair], true)
            }
            OperandShape::RegPairImm16 => {
                self.check_operands(!op1.is_empty() && !op2.is_empty(), name)?;
                let pair = self.reg16(&op1, inst)?;
                self.pass_action(inst.shape.size(), &[inst.base + pair], true)?;
                self.emit_immediate16(&op2)
            }
            OperandShape::Reg8Imm8 => {
                self.check_operands(!op1.is_empty() && !op2.is_empty(), name)?;
                let reg = self.reg8(&op1)?;
                self.pass_action(inst.shape.size(), &[inst.base | (reg << 3)], true)?;
                self.emit_immediate8(&op2)
            }
            OperandShape::Imm8 => {
                self.check_operands(!op1.is_empty() && op2.is_empty(), name)?;
                self.pass_action(inst.shape.size(), &[inst.base], true)?;
                self.emit_immediate8(&op1)
            }
            OperandShape::Addr16 => {
                self.check_operands(!op1.is_empty() && op2.is_empty(), name)?;
                self.pass_action(inst.shape.size(), &[inst.base], true)?;
                self.emit_immediate16(&op1)
            }
            OperandShape::RstVector => {
                self.check_operands(!op1.is_empty() && op2.is_empty(), name)?;
                let vector = expr::parse_number(&op1)?;
                if !(0..=7).contains(&vector) {
                    return Err(AsmError::new(
                        AsmErrorKind::Instruction,
                        "Invalid restart vector",
                        Some(&op1),
                    ));
                }
                self.pass_action(inst.shape.size(), &[inst.base + ((vector as u8) << 3)], true)
            }
            OperandShape::IndexPair => {
                self.check_operands(!op1.is_empty() && op2.is_empty(), name)?;
                let opcode = match op1.to_ascii_lowercase().as_str() {
                    "b" => inst.base,
                    "d" => inst.base + 0x10,
                    _ => {
                        return Err(AsmError::new(
                            AsmErrorKind::Instruction,
                            "Register pair must be B or D",
                            Some(name),
                        ))
                    }
                };
                self.pass_action(inst.shape.size(), &[opcode], true)
            }
        }
    }

    fn reg8(&self, name: &str) -> Result<u8, AsmError> {
        instructions::reg8_offset(name).ok_or_else(|| {
            AsmError::new(AsmErrorKind::Instruction, "Invalid 8-bit register", Some(name))
        })
    }

    fn reg16(&self, name: &str, inst: &Instruction) -> Result<u8, AsmError> {
        let kind = if inst.shape == OperandShape::RegPairPsw {
            PairKind::WithPsw
        } else {
            PairKind::WithSp
        };
        instructions::reg16_offset(name, kind).map_err(|err| match err {
            Reg16Error::Unknown => {
                AsmError::new(AsmErrorKind::Instruction, "Invalid 16-bit register", Some(name))
            }
            Reg16Error::PswNotAllowed => AsmError::new(
                AsmErrorKind::Instruction,
                "PSW cannot be used with this instruction",
                Some(inst.mnemonic),
            ),
            Reg16Error::SpNotAllowed => AsmError::new(
                AsmErrorKind::Instruction,
                "SP cannot be used with this instruction",
                Some(inst.mnemonic),
            ),
        })
    }

    // Immediate emission happens after pass_action has advanced the
    // location counter, so `$` inside an operand sees the address that
    // follows the instruction.
    fn emit_immediate8(&mut self, operand: &str) -> Result<(), AsmError> {
        if self.pass != 2 {
            return Ok(());
        }
        let value = self.evaluate_expression(operand)?;
        self.output.push((value & 0xff) as u8);
        Ok(())
    }

    fn emit_immediate16(&mut self, operand: &str) -> Result<(), AsmError> {
        if self.pass != 2 {
            return Ok(());
        }
        let value = self.evaluate_expression(operand)?;
        self.output.push((value & 0xff) as u8);
        self.output.push(((value >> 8) & 0xff) as u8);
        Ok(())
    }

    fn dir_org(&mut self) -> Result<(), AsmError> {
        let operand = self.line.operand1.clone();
        self.check_operands(
            !operand.is_empty() && self.line.label.is_empty() && self.line.operand2.is_empty(),
            "org",
        )?;
        let target = self.evaluate_expression(&operand)? as u16;
        if self.pass == 2 {
            if self.output.is_empty() {
                self.origin = target;
            } else if target > self.address {
                let padding = (target - self.address) as usize;
                self.output.extend(std::iter::repeat(0u8).take(padding));
            } else if target < self.address {
                // The image is append-only; a backward ORG repositions
                // the location counter without rewinding the buffer.
                self.warnings.push(Diagnostic::new(
                    self.lineno,
                    Severity::Warning,
                    AsmError::new(
                        AsmErrorKind::Directive,
                        "ORG moves the location counter backwards; output is not rewound",
                        None,
                    ),
                ));
            }
        }
        self.address = target;
        Ok(())
    }

    fn dir_equ(&mut self) -> Result<(), AsmError> {
        if self.line.label.is_empty() {
            return Err(AsmError::new(AsmErrorKind::Directive, "EQU requires a label", None));
        }
        let operand = self.line.operand1.clone();
        self.check_operands(!operand.is_empty() && self.line.operand2.is_empty(), "equ")?;
        let value = self.evaluate_expression(&operand)? as u16;
        if self.pass == 1 {
            let label = self.line.label.clone();
            if self.symbols.insert(&label, value) == SymbolInsert::Duplicate {
                return Err(AsmError::new(AsmErrorKind::Symbol, "Duplicate label", Some(&label)));
            }
        }
        Ok(())
    }

    fn dir_db(&mut self) -> Result<(), AsmError> {
        let mut all = self.line.operand1.clone();
        if !self.line.operand2.is_empty() {
            all.push(',');
            all.push_str(&self.line.operand2);
        }
        self.check_operands(!all.is_empty(), "db")?;
        let mut first_item = true;
        for arg in parser::split_args(&all, ',') {
            if arg.len() > 2 && arg.starts_with('<') && arg.ends_with('>') {
                let inner = arg[1..arg.len() - 1].to_string();
                for byte_expr in parser::split_args(&inner, ',') {
                    self.pass_action(1, &[], first_item)?;
                    if self.pass == 2 {
                        let value = self.evaluate_expression(&byte_expr)?;
                        self.output.push((value & 0xff) as u8);
                    }
                    first_item = false;
                }
            } else if parser::is_quote_delimited(&arg) {
                let text = arg[1..arg.len() - 1].to_string();
                self.pass_action(text.len() as u16, &[], first_item)?;
                if self.pass == 2 {
                    self.output.extend_from_slice(text.as_bytes());
                }
                first_item = false;
            } else {
                self.pass_action(1, &[], first_item)?;
                if self.pass == 2 {
                    let value = self.evaluate_expression(&arg)?;
                    self.output.push((value & 0xff) as u8);
                }
                first_item = false;
            }
        }
        Ok(())
    }

    fn dir_dw(&mut self) -> Result<(), AsmError> {
        let mut all = self.line.operand1.clone();
        if !self.line.operand2.is_empty() {
            all.push(',');
            all.push_str(&self.line.operand2);
        }
        self.check_operands(!all.is_empty(), "dw")?;
        let mut first_item = true;
        for arg in parser::split_args(&all, ',') {
            self.pass_action(2, &[], first_item)?;
            if self.pass == 2 {
                let value = self.evaluate_expression(&arg)?;
                self.output.push((value & 0xff) as u8);
                self.output.push(((value >> 8) & 0xff) as u8);
            }
            first_item = false;
        }
        Ok(())
    }

    fn dir_ds(&mut self) -> Result<(), AsmError> {
        let operand = self.line.operand1.clone();
        self.check_operands(!operand.is_empty(), "ds")?;
        let size = self.evaluate_expression(&operand)?;
        if size < 0 {
            return Err(AsmError::new(
                AsmErrorKind::Directive,
                "DS size cannot be negative",
                None,
            ));
        }
        let fill = if self.line.operand2.is_empty() {
            0u8
        } else {
            let operand2 = self.line.operand2.clone();
            (self.evaluate_expression(&operand2)? & 0xff) as u8
        };
        if self.pass == 2 {
            self.output.extend(std::iter::repeat(fill).take(size as usize));
        }
        self.pass_action(size as u16, &[], true)
    }

    fn dir_end(&mut self) -> Result<(), AsmError> {
        self.check_operands(
            self.line.label.is_empty()
                && self.line.operand1.is_empty()
                && self.line.operand2.is_empty(),
            "end",
        )?;
        self.finished = true;
        Ok(())
    }
}

/// Listing output: a 20-column left-justified prefix with the line's
/// starting address and emitted bytes, then the verbatim source line.
/// Hex by default, octal when enabled.
pub struct ListingWriter<W: Write> {
    out: W,
    octal: bool,
}

impl<W: Write> ListingWriter<W> {
    pub fn new(out: W, octal: bool) -> Self {
        Self { out, octal }
    }

    pub fn write_source_only(&mut self, source: &str) -> io::Result<()> {
        writeln!(self.out, "{source}")
    }

    pub fn write_line(&mut self, addr: u16, bytes: &[u8], source: &str) -> io::Result<()> {
        let mut prefix = if self.octal {
            format!("{addr:06o}  ")
        } else {
            format!("{addr:04X}  ")
        };
        for byte in bytes {
            if self.octal {
                prefix.push_str(&format!("{byte:03o} "));
            } else {
                prefix.push_str(&format!("{byte:02X} "));
            }
        }
        writeln!(self.out, "{prefix:<20}{source}")
    }
}
