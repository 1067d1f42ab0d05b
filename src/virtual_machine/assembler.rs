//! Text assembler for HIT programs.
//!
//! Converts human-readable assembly into a [`ProgramImage`].
//! Uses [`for_each_instruction!`](for_each_instruction) to generate the
//! operand parser and encoder for every opcode.
//!
//! # Syntax
//!
//! ```text
//! export 1001 intro         # track 1001 enters at `intro`
//! export 1002 0             # track 1002 plays its sound without bytecode
//! intro:
//!     loadl 5, 42           # mnemonic operand, operand
//!     wait 16
//!     jump intro
//! ```
//!
//! - Mnemonics are case-insensitive (`loadl`, `LOADL`)
//! - Variable operands are locations `0..=255`, decimal or `0x` hex
//! - `Imm8` accepts `-128..=255`, `Imm32` any 32-bit literal
//! - Address operands take an integer or a label
//! - `jump` with an integer `0..=15` jumps through that variable
//! - `#` or `;` starts a comment, commas between operands are optional

use crate::define_instructions;
use crate::for_each_instruction;
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::isa::{INDIRECT_JUMP_MAX, Instruction, JumpTarget};
use crate::virtual_machine::program::{ExportEntry, ProgramImage};
use std::collections::HashMap;
use std::fmt::Write;
use std::fs;
use std::path::Path;

const COMMENT_CHARS: [char; 2] = ['#', ';'];
const LABEL_SUFFIX: char = ':';
const EXPORT_DIRECTIVE: &str = "export";

/// Return the line/column/message triple for assembly-related errors.
fn assembly_error_location(err: &VMError) -> Option<(usize, usize, String)> {
    match err {
        VMError::AssemblyError {
            line,
            offset,
            source,
        } => Some((*line, *offset, source.clone())),
        _ => None,
    }
}

/// Formats a compiler-style diagnostic for assembly failures.
fn render_assembly_diagnostic(
    file: &str,
    source: &str,
    line: usize,
    offset: usize,
    message: &str,
) -> String {
    let mut diag = String::new();
    let _ = writeln!(diag, "error: {message}");
    let _ = writeln!(diag, " --> {file}:{line}:{offset}");

    if let Some(raw_line) = source.lines().nth(line.saturating_sub(1)) {
        let line_text = raw_line.trim_end_matches('\r');
        let underline = " ".repeat(offset.saturating_sub(1));
        let _ = writeln!(diag, "  |");
        let _ = writeln!(diag, "{:>4} | {}", line, line_text);
        let _ = writeln!(diag, "  | {}^", underline);
    }

    diag
}

/// Emit a diagnostic to stderr for assembly errors.
fn log_assembly_error(file: &str, source: &str, err: &VMError) {
    if let Some((line, offset, message)) = assembly_error_location(err) {
        eprintln!(
            "{}",
            render_assembly_diagnostic(file, source, line, offset, &message)
        );
    } else {
        eprintln!("error: {err}");
    }
}

/// Label table built during the first pass.
///
/// Labels hold absolute image offsets, so the header size is already folded in.
pub struct AsmContext {
    pub(crate) labels: HashMap<String, u32>,
}

impl AsmContext {
    pub fn new() -> Self {
        Self {
            labels: HashMap::new(),
        }
    }

    /// Registers a label at the given image offset.
    pub(crate) fn define_label(&mut self, name: String, offset: u32) -> Result<(), VMError> {
        if self.labels.contains_key(&name) {
            return Err(VMError::DuplicateLabel { label: name });
        }
        self.labels.insert(name, offset);
        Ok(())
    }

    /// Resolves a label to its image offset.
    pub(crate) fn resolve_label(&self, name: &str) -> Result<u32, VMError> {
        self.labels
            .get(name)
            .copied()
            .ok_or(VMError::UndefinedLabel {
                label: name.to_string(),
            })
    }
}

impl Default for AsmContext {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
struct Token<'a> {
    text: &'a str,
    /// 1-based column offset in the line.
    offset: usize,
}

/// Tokenize a single line of assembly.
///
/// Rules:
/// - `#` or `;` starts a comment
/// - commas are ignored
/// - whitespace-separated tokens
fn tokenize(line: &str) -> Vec<Token<'_>> {
    let code = match line.find(COMMENT_CHARS) {
        Some(end) => &line[..end],
        None => line,
    };

    let mut out = Vec::with_capacity(4);
    let mut start: Option<usize> = None;

    for (i, c) in code.char_indices() {
        if c == ',' || c.is_whitespace() {
            if let Some(s) = start.take() {
                out.push(Token {
                    text: &code[s..i],
                    offset: s + 1,
                });
            }
        } else if start.is_none() {
            start = Some(i);
        }
    }

    if let Some(s) = start {
        out.push(Token {
            text: &code[s..],
            offset: s + 1,
        });
    }

    out
}

/// Parses a decimal or `0x` hexadecimal integer, optionally negative.
pub fn parse_int(tok: &str) -> Option<i64> {
    let (negative, digits) = match tok.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, tok),
    };
    let value = match digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        Some(hex) => i64::from_str_radix(hex, 16).ok()?,
        None => digits.parse::<i64>().ok()?,
    };
    Some(if negative { -value } else { value })
}

/// Parse a variable location `0..=255`.
pub(crate) fn parse_var(tok: &str) -> Result<u8, VMError> {
    parse_int(tok)
        .and_then(|v| u8::try_from(v).ok())
        .ok_or_else(|| VMError::InvalidOperand {
            kind: "variable",
            token: tok.to_string(),
        })
}

/// Parse a byte literal `-128..=255`.
pub(crate) fn parse_imm8(tok: &str) -> Result<u8, VMError> {
    match parse_int(tok) {
        Some(v @ -128..=-1) => Ok(v as i8 as u8),
        Some(v @ 0..=255) => Ok(v as u8),
        _ => Err(VMError::InvalidOperand {
            kind: "imm8",
            token: tok.to_string(),
        }),
    }
}

/// Parse a 32-bit literal; unsigned values above `i32::MAX` wrap.
pub(crate) fn parse_imm32(tok: &str) -> Result<i32, VMError> {
    match parse_int(tok) {
        Some(v) if i32::try_from(v).is_ok() => Ok(v as i32),
        Some(v) if u32::try_from(v).is_ok() => Ok(v as u32 as i32),
        _ => Err(VMError::InvalidOperand {
            kind: "imm32",
            token: tok.to_string(),
        }),
    }
}

/// Parses an absolute address or a label reference.
pub(crate) fn parse_addr(tok: &str, ctx: &AsmContext) -> Result<u32, VMError> {
    if let Some(v) = parse_int(tok) {
        return u32::try_from(v).map_err(|_| VMError::InvalidOperand {
            kind: "address",
            token: tok.to_string(),
        });
    }
    ctx.resolve_label(tok)
}

/// Parses a `jump` operand.
///
/// An address whose low byte is `<= 15` would decode as an indirect jump, so
/// it is rejected.
pub(crate) fn parse_target(tok: &str, ctx: &AsmContext) -> Result<JumpTarget, VMError> {
    match parse_int(tok) {
        Some(v) if (0..=i64::from(INDIRECT_JUMP_MAX)).contains(&v) => {
            return Ok(JumpTarget::Variable(v as u8));
        }
        _ => {}
    }
    let addr = parse_addr(tok, ctx)?;
    if (addr & 0xFF) as u8 <= INDIRECT_JUMP_MAX {
        return Err(VMError::InvalidOperand {
            kind: "jump address (low byte must exceed 15)",
            token: format!("{tok} = 0x{addr:x}"),
        });
    }
    Ok(JumpTarget::Address(addr))
}

/// Encoded size of a `jump` operand, known before labels resolve.
fn target_size(tok: Option<&Token>) -> usize {
    match tok.and_then(|t| parse_int(t.text)) {
        Some(v) if (0..=i64::from(INDIRECT_JUMP_MAX)).contains(&v) => 1,
        _ => 4,
    }
}

/// Checks if a token is a label definition (ends with `:`)
fn is_label_def(tok: &str) -> bool {
    tok.ends_with(LABEL_SUFFIX) && tok.len() > 1
}

/// Extracts the label name from a label definition token.
fn label_name(tok: &str) -> &str {
    &tok[..tok.len() - 1]
}

macro_rules! define_parse_instruction {
    (
        $(
            $(#[$doc:meta])*
            $name:ident = $opcode:expr, $mnemonic:literal => [
                $( $field:ident : $kind:ident ),* $(,)?
            ]
        ),* $(,)?
    ) => {

        // =========================
        // Assembler IR
        // =========================
        #[derive(Debug, Clone)]
        enum AsmInstr {
            $(
                $name {
                    $( $field: define_instructions!(@ty $kind) ),*
                },
            )*
        }

        impl AsmInstr {
            /// Encodes the assembly instruction into bytecode
            fn assemble(&self, out: &mut Vec<u8>) {
                match self {
                    $(
                        AsmInstr::$name { $( $field ),* } => {
                            out.push($opcode);
                            $(
                                define_instructions!(@emit out, $kind, $field);
                            )*
                        }
                    ),*
                }
            }
        }

        fn instruction_from_str(name: &str) -> Result<Instruction, VMError> {
            match name.to_ascii_lowercase().as_str() {
                $( $mnemonic => Ok(Instruction::$name), )*
                _ => Err(VMError::InvalidInstructionName {
                    name: name.to_string(),
                }),
            }
        }

        /// Returns the bytecode size for an instruction (opcode + operands).
        ///
        /// `tokens` is the whole instruction line; only `jump` looks at it.
        #[allow(unused_mut, unused_assignments, unused_variables)]
        fn instruction_size(instr: Instruction, tokens: &[Token]) -> usize {
            let mut operand = 0usize;
            match instr {
                $(
                    Instruction::$name => {
                        1usize $( + {
                            operand += 1;
                            define_parse_instruction!(@size $kind, tokens.get(operand))
                        } )*
                    }
                ),*
            }
        }

        /// Parse one instruction from tokens into [`AsmInstr`].
        fn parse_instruction(ctx: &AsmContext, tokens: &[Token]) -> Result<AsmInstr, VMError> {
            if tokens.is_empty() {
                return Err(VMError::ArityMismatch {
                    instruction: "<missing opcode>".to_string(),
                    expected: 1,
                    actual: 0,
                });
            }

            let instr = instruction_from_str(tokens[0].text)?;

            match instr {
                $(
                    Instruction::$name => {
                        const EXPECTED: usize = 1 + define_parse_instruction!(@count $( $field ),*);
                        if tokens.len() != EXPECTED {
                            return Err(VMError::ArityMismatch {
                                instruction: tokens[0].text.to_string(),
                                expected: EXPECTED - 1,
                                actual: tokens.len() - 1,
                            });
                        }

                        define_parse_instruction!(
                            @construct ctx tokens; $name $( $field : $kind ),*
                        )
                    }
                ),*
            }
        }
    };

    // ---------- counting ----------
    (@count $( $x:ident ),* ) => {
        <[()]>::len(&[ $( define_parse_instruction!(@unit $x) ),* ])
    };

    (@unit $x:ident) => { () };

    // ---------- operand sizes ----------
    (@size Var, $tok:expr)    => { 1usize };
    (@size Imm8, $tok:expr)   => { 1usize };
    (@size Imm32, $tok:expr)  => { 4usize };
    (@size Addr, $tok:expr)   => { 4usize };
    (@size Target, $tok:expr) => { target_size($tok) };

    // ---------- parsing ----------
    (@construct $ctx:ident $tokens:ident; $name:ident) => {
        Ok(AsmInstr::$name { })
    };

    (@construct $ctx:ident $tokens:ident; $name:ident $( $field:ident : $kind:ident ),+ ) => {{
        let mut it = $tokens[1..].iter();
        Ok(AsmInstr::$name {
            $(
                $field: match it.next() {
                    Some(tok) => define_parse_instruction!(@parse_operand $kind, tok, $ctx)?,
                    None => unreachable!("arity checked above"),
                },
            )*
        })
    }};

    (@parse_operand Var, $tok:expr, $ctx:expr) => {
        parse_var($tok.text)
    };

    (@parse_operand Imm8, $tok:expr, $ctx:expr) => {
        parse_imm8($tok.text)
    };

    (@parse_operand Imm32, $tok:expr, $ctx:expr) => {
        parse_imm32($tok.text)
    };

    (@parse_operand Addr, $tok:expr, $ctx:expr) => {
        parse_addr($tok.text, $ctx)
    };

    (@parse_operand Target, $tok:expr, $ctx:expr) => {
        parse_target($tok.text, $ctx)
    };
}

for_each_instruction!(define_parse_instruction);

/// `export` directive awaiting label resolution.
struct PendingExport<'a> {
    track_id: u32,
    target: Token<'a>,
    line: usize,
}

fn at_line(line: usize, offset: usize) -> impl FnOnce(VMError) -> VMError {
    move |e| VMError::AssemblyError {
        line,
        offset,
        source: e.to_string(),
    }
}

/// Parses `export <track> <label|address>`.
fn parse_export<'a>(line: usize, tokens: &[Token<'a>]) -> Result<PendingExport<'a>, VMError> {
    if tokens.len() != 3 {
        return Err(at_line(line, tokens[0].offset)(VMError::ArityMismatch {
            instruction: EXPORT_DIRECTIVE.to_string(),
            expected: 2,
            actual: tokens.len() - 1,
        }));
    }
    let track_id = parse_int(tokens[1].text)
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| {
            at_line(line, tokens[1].offset)(VMError::InvalidOperand {
                kind: "track id",
                token: tokens[1].text.to_string(),
            })
        })?;
    Ok(PendingExport {
        track_id,
        target: tokens[2].clone(),
        line,
    })
}

/// Performs two-pass assembly.
///
/// Pass 1: tokenizes all lines, collects `export` directives, computes
/// instruction sizes and records label positions relative to the code start.
///
/// Pass 2: once the export count fixes the header size, labels become
/// absolute offsets and instructions are parsed and emitted.
fn assemble_lines(source: &str) -> Result<ProgramImage, VMError> {
    let mut parsed_lines: Vec<(usize, Vec<Token>)> = Vec::new();
    let mut pending_labels: Vec<(String, usize, usize, usize)> = Vec::new();
    let mut exports: Vec<PendingExport> = Vec::new();
    let mut code_size = 0usize;

    for (idx, line) in source.lines().enumerate() {
        let line_no = idx + 1;
        let tokens = tokenize(line);
        if tokens.is_empty() {
            continue;
        }

        if tokens[0].text.eq_ignore_ascii_case(EXPORT_DIRECTIVE) {
            exports.push(parse_export(line_no, &tokens)?);
            continue;
        }

        let instr_start = if is_label_def(tokens[0].text) {
            pending_labels.push((
                label_name(tokens[0].text).to_string(),
                code_size,
                line_no,
                tokens[0].offset,
            ));
            1
        } else {
            0
        };

        // Anything after a label is an instruction on the same line
        if tokens.len() > instr_start {
            let instr_tokens: Vec<Token> = tokens[instr_start..].to_vec();
            let instr = instruction_from_str(instr_tokens[0].text)
                .map_err(at_line(line_no, instr_tokens[0].offset))?;
            code_size += instruction_size(instr, &instr_tokens);
            parsed_lines.push((line_no, instr_tokens));
        }
    }

    let code_start = ProgramImage::header_len(exports.len());
    let mut asm_context = AsmContext::new();
    for (name, offset, line_no, tok_offset) in pending_labels {
        asm_context
            .define_label(name, (code_start + offset) as u32)
            .map_err(at_line(line_no, tok_offset))?;
    }

    let mut code = Vec::with_capacity(code_size);
    for (line_no, tokens) in parsed_lines {
        let offset = tokens.first().map(|t| t.offset).unwrap_or(1);
        let instr = parse_instruction(&asm_context, &tokens).map_err(at_line(line_no, offset))?;
        instr.assemble(&mut code);
    }

    let mut table = Vec::with_capacity(exports.len());
    for export in exports {
        let address = parse_addr(export.target.text, &asm_context)
            .map_err(at_line(export.line, export.target.offset))?;
        table.push(ExportEntry {
            track_id: export.track_id,
            address,
        });
    }

    ProgramImage::new(table, &code)
}

/// Assemble a full source string into a program image.
pub fn assemble_source(source: impl AsRef<str>) -> Result<ProgramImage, VMError> {
    assemble_source_with_name(source.as_ref(), "<source>")
}

/// Assembles source with an associated filename for error diagnostics.
///
/// Logs a compiler-style diagnostic to stderr on failure.
fn assemble_source_with_name(source: &str, source_name: &str) -> Result<ProgramImage, VMError> {
    let result = assemble_lines(source);
    if let Err(err) = &result {
        log_assembly_error(source_name, source, err);
    }
    result
}

/// Convenience: assemble directly from file path
pub fn assemble_file<P: AsRef<Path>>(path: P) -> Result<ProgramImage, VMError> {
    let path_ref = path.as_ref();
    let source = fs::read_to_string(path_ref).map_err(|e| VMError::IoError {
        path: path_ref.display().to_string(),
        source: e.to_string(),
    })?;
    assemble_source_with_name(&source, &path_ref.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: u32 = ProgramImage::header_len(0) as u32;

    fn code(image: &ProgramImage) -> &[u8] {
        &image.bytes()[image.code_start()..]
    }

    fn source_error(source: &str) -> (usize, usize, String) {
        match assemble_source(source).unwrap_err() {
            VMError::AssemblyError {
                line,
                offset,
                source,
            } => (line, offset, source),
            other => panic!("expected AssemblyError, got {other:?}"),
        }
    }

    #[test]
    fn tokenize_strips_comments_and_commas() {
        let toks = tokenize("  loadl 5, 42 # set volume");
        let texts: Vec<&str> = toks.iter().map(|t| t.text).collect();
        assert_eq!(texts, vec!["loadl", "5", "42"]);
        assert_eq!(toks[0].offset, 3);
        assert_eq!(toks[2].offset, 12);

        let toks = tokenize("export 1 0 ; simple");
        assert_eq!(toks.len(), 3);
    }

    #[test]
    fn parse_int_forms() {
        assert_eq!(parse_int("42"), Some(42));
        assert_eq!(parse_int("-7"), Some(-7));
        assert_eq!(parse_int("0x1F"), Some(31));
        assert_eq!(parse_int("-0x10"), Some(-16));
        assert_eq!(parse_int("intro"), None);
    }

    #[test]
    fn parse_var_range() {
        assert_eq!(parse_var("0").unwrap(), 0);
        assert_eq!(parse_var("0xFF").unwrap(), 255);
        assert!(matches!(
            parse_var("256"),
            Err(VMError::InvalidOperand { kind: "variable", .. })
        ));
        assert!(parse_var("-1").is_err());
    }

    #[test]
    fn parse_imm8_accepts_signed_and_unsigned() {
        assert_eq!(parse_imm8("-1").unwrap(), 0xFF);
        assert_eq!(parse_imm8("-128").unwrap(), 0x80);
        assert_eq!(parse_imm8("200").unwrap(), 200);
        assert!(parse_imm8("256").is_err());
        assert!(parse_imm8("-129").is_err());
    }

    #[test]
    fn parse_imm32_wraps_unsigned() {
        assert_eq!(parse_imm32("-5").unwrap(), -5);
        assert_eq!(parse_imm32("0xFFFFFFFF").unwrap(), -1);
        assert!(parse_imm32("0x100000000").is_err());
    }

    #[test]
    fn assemble_empty_source() {
        let image = assemble_source("").unwrap();
        assert!(code(&image).is_empty());
        assert!(image.exports().is_empty());
    }

    #[test]
    fn assemble_comments_and_blank_lines() {
        let image = assemble_source("\n# comment\n\n   ; another\n").unwrap();
        assert!(code(&image).is_empty());
    }

    #[test]
    fn assemble_loadl_end() {
        let image = assemble_source("loadl 5, 42\nend").unwrap();
        let mut expected = vec![Instruction::LoadL as u8, 5];
        expected.extend_from_slice(&42i32.to_le_bytes());
        expected.push(Instruction::End as u8);
        assert_eq!(code(&image), expected.as_slice());
    }

    #[test]
    fn mnemonics_are_case_insensitive() {
        let image = assemble_source("NOP\nEnd").unwrap();
        assert_eq!(
            code(&image),
            &[Instruction::Nop as u8, Instruction::End as u8]
        );
    }

    #[test]
    fn loadb_negative_literal() {
        let image = assemble_source("loadb 20, -2").unwrap();
        assert_eq!(code(&image), &[Instruction::LoadB as u8, 20, 0xFE]);
    }

    #[test]
    fn labels_resolve_to_absolute_offsets() {
        let image = assemble_source("export 9 start\nnop\nstart: end\nifeq start").unwrap();
        let start = ProgramImage::header_len(1) as u32 + 1;
        assert_eq!(image.entry_address(9), Some(start));

        let bytes = code(&image);
        assert_eq!(bytes[2], Instruction::IfEq as u8);
        assert_eq!(&bytes[3..7], &start.to_le_bytes());
    }

    #[test]
    fn export_zero_is_simple_mode() {
        let image = assemble_source("export 44 0").unwrap();
        assert_eq!(image.entry_address(44), Some(0));
    }

    #[test]
    fn jump_indirect_is_one_byte() {
        let image = assemble_source("jump 7\nend").unwrap();
        assert_eq!(
            code(&image),
            &[Instruction::Jump as u8, 7, Instruction::End as u8]
        );
    }

    #[test]
    fn jump_to_label_is_four_bytes() {
        let image = assemble_source("top: nop\njump top").unwrap();
        let mut expected = vec![Instruction::Nop as u8, Instruction::Jump as u8];
        expected.extend_from_slice(&BASE.to_le_bytes());
        assert_eq!(code(&image), expected.as_slice());
    }

    #[test]
    fn jump_address_with_low_byte_in_variable_range_is_rejected() {
        let (line, _, message) = source_error("jump 0x100");
        assert_eq!(line, 1);
        assert!(message.contains("jump address"));
    }

    #[test]
    fn placeholders_take_operands() {
        let image = assemble_source("getsrcdatafield 1 2 3\nunduck\nduck 4").unwrap();
        assert_eq!(
            code(&image),
            &[
                Instruction::GetSrcDataField as u8,
                1,
                2,
                3,
                Instruction::Unduck as u8,
                Instruction::Duck as u8,
                4
            ]
        );
    }

    #[test]
    fn instruction_size_matches_encoding() {
        for (line, size) in [
            ("loadl 5 1", 6),
            ("rand 5 6 7", 4),
            ("ifgt 40", 5),
            ("jump 3", 2),
            ("jump 300", 5),
            ("end", 1),
        ] {
            let toks = tokenize(line);
            let instr = instruction_from_str(toks[0].text).unwrap();
            assert_eq!(instruction_size(instr, &toks), size, "{line}");
            let image = assemble_source(line).unwrap();
            assert_eq!(code(&image).len(), size, "{line}");
        }
    }

    #[test]
    fn unknown_mnemonic_reports_column() {
        let (line, offset, message) = source_error("nop\n   fly 1");
        assert_eq!((line, offset), (2, 4));
        assert!(message.contains("fly"));
    }

    #[test]
    fn arity_mismatch() {
        let (_, _, message) = source_error("set 5");
        assert!(message.contains("expects 2 operands, got 1"));
    }

    #[test]
    fn duplicate_label_error() {
        let (line, _, message) = source_error("a: nop\na: end");
        assert_eq!(line, 2);
        assert!(message.contains("duplicate label"));
    }

    #[test]
    fn undefined_label_error() {
        let (_, _, message) = source_error("call nowhere");
        assert!(message.contains("undefined label: nowhere"));
    }

    #[test]
    fn export_undefined_label_error() {
        let (line, offset, _) = source_error("export 1 missing");
        assert_eq!((line, offset), (1, 10));
    }

    #[test]
    fn export_bad_track_id() {
        let (_, _, message) = source_error("export track intro");
        assert!(message.contains("track id"));
    }

    #[test]
    fn diagnostic_points_at_column() {
        let diag = render_assembly_diagnostic("song.asm", "nop\n  bogus", 2, 3, "oops");
        assert!(diag.contains(" --> song.asm:2:3"));
        assert!(diag.contains("   2 |   bogus"));
        assert!(diag.ends_with("  |   ^\n"));
    }
}
