//! Parsing P8X32A assembly source (the first assembler pass).
//!
//! The parser reads the source line by line (see [`lex::Lines`]) and,
//! for every token of a line, tries in order:
//! 1. a directive (`FIT`, `ORG`, `RES`, `_CLKFREQ`),
//! 2. an instruction (optionally prefixed by an `IF_*` condition), `NOP` or `LONG`,
//! 3. a label declaration (optionally followed by `=`/`EQU` and a value).
//!
//! Instructions are written into an [`AssemblyContext`] with their operands
//! kept as unevaluated [`Expr`]s, since they may refer to labels declared later.
//! They are evaluated by [`AssemblyContext::resolve`].
//!
//! The first error aborts parsing.

pub mod expr;
pub mod lex;

use tracing::trace;

use crate::asm::{AsmErr, AsmErrKind, AssemblyContext, RawKind, MAX_LABEL_LEN};
use crate::ast::table::{special_reg, OpcodeEntry};
use crate::ast::{Cond, Instr, Side};
use expr::{parse_number, BinOp, Expr, Operand};
use lex::{Lines, Token, TokenStream};

/// The surface syntax of the source: comment markers and operand prefixes.
///
/// Two profiles are provided, [`Syntax::PARALLAX`] (the default) and [`Syntax::C`].
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct Syntax {
    /// Marker starting a comment which runs until the end of the line.
    pub line_comment: &'static str,
    /// Markers opening and closing a block comment (which may span lines).
    pub block_comment: (&'static str, &'static str),
    /// Prefix marking an immediate source operand.
    pub immediate_prefix: char,
    /// Prefix marking a local label.
    pub local_prefix: char,
}
impl Syntax {
    /// Parallax-style syntax: `' comment`, `{ block }`, `#immediate`, `:local`.
    pub const PARALLAX: Syntax = Syntax {
        line_comment: "'",
        block_comment: ("{", "}"),
        immediate_prefix: '#',
        local_prefix: ':',
    };
    /// C-style syntax: `// comment`, `/* block */`, `$immediate`, `.local`.
    pub const C: Syntax = Syntax {
        line_comment: "//",
        block_comment: ("/*", "*/"),
        immediate_prefix: '$',
        local_prefix: '.',
    };
}
impl Default for Syntax {
    fn default() -> Self {
        Syntax::PARALLAX
    }
}

/// Parses a source file into an [`AssemblyContext`] (the first assembler pass).
///
/// # Example
/// ```
/// use ppasm::parse::{parse_program, Syntax};
///
/// let ctx = parse_program("start  jmp #start", &Syntax::PARALLAX).unwrap();
/// assert_eq!(ctx.symbols().lookup("start"), Some(0));
///
/// let program = ctx.resolve().unwrap();
/// assert_eq!(program.len(), 1);
/// ```
pub fn parse_program(src: &str, syntax: &Syntax) -> Result<AssemblyContext, AsmErr> {
    let mut ctx = AssemblyContext::new();

    for line in Lines::new(src, syntax) {
        trace!(line = line.number, text = %line.text, "parsing line");
        Parser {
            ctx: &mut ctx,
            syntax,
            tokens: TokenStream::new(&line.text),
            line: line.number,
        }.parse_line()?;
    }

    Ok(ctx)
}

/// Parser state for a single line.
struct Parser<'a> {
    ctx: &'a mut AssemblyContext,
    syntax: &'a Syntax,
    tokens: TokenStream<'a>,
    line: usize,
}
impl<'a> Parser<'a> {
    fn err(&self, kind: AsmErrKind) -> AsmErr {
        AsmErr::new(kind, self.line)
    }

    fn peek(&mut self) -> Result<Option<Token<'a>>, AsmErr> {
        self.tokens.peek().map_err(|e| AsmErr::new(AsmErrKind::Lex(e), self.line))
    }
    fn next(&mut self) -> Result<Option<Token<'a>>, AsmErr> {
        self.tokens.next().map_err(|e| AsmErr::new(AsmErrKind::Lex(e), self.line))
    }
    /// Peeks the next token if it is a word.
    fn peek_word(&mut self) -> Result<Option<&'a str>, AsmErr> {
        match self.peek()? {
            Some(Token::Word(w)) => Ok(Some(w)),
            _ => Ok(None),
        }
    }

    fn parse_line(&mut self) -> Result<(), AsmErr> {
        while self.peek()?.is_some() {
            if self.parse_directive()? { continue; }
            if self.parse_instruction()? { continue; }
            self.parse_label()?;
        }
        Ok(())
    }

    /// Parses `FIT`, `ORG`, `RES` or `_CLKFREQ` with its argument.
    /// Returns whether the next token was a directive.
    fn parse_directive(&mut self) -> Result<bool, AsmErr> {
        let Some(word) = self.peek_word()? else { return Ok(false) };

        let name = match word.to_ascii_lowercase().as_str() {
            "fit" => "FIT",
            "org" => "ORG",
            "res" => "RES",
            _ if word == "_CLKFREQ" => "_CLKFREQ",
            _ => return Ok(false),
        };
        self.next()?;
        if name == "_CLKFREQ" && self.peek()? == Some(Token::Op("=")) {
            self.next()?;
        }

        let value = self.parse_value(name)?;
        trace!(line = self.line, directive = name, value);

        match name {
            "FIT" => self.ctx.fit = usize::try_from(value).unwrap_or(usize::MAX),
            "ORG" => self.ctx.curr_op = usize::try_from(value).unwrap_or(usize::MAX),
            "RES" => self.ctx.curr_op = self.ctx.curr_op.saturating_add(usize::try_from(value).unwrap_or(usize::MAX)),
            _     => self.ctx.program.clkfreq = u32::try_from(value)
                .map_err(|_| self.err(AsmErrKind::OutOfRange(name, value)))?,
        }
        Ok(true)
    }

    /// Parses an argument which must be known at this point of the file
    /// (directive arguments and `EQU` values).
    fn parse_value(&mut self, what: &'static str) -> Result<u64, AsmErr> {
        if self.peek()?.is_none() {
            return Err(self.err(AsmErrKind::MissingArgument(what)));
        }
        self.parse_expr(Side::Src)?
            .evaluate(&self.ctx.program.symbols)
            .map_err(|e| self.err(AsmErrKind::Expr(e)))
    }

    /// Parses an instruction, `NOP` or `LONG`, with an optional condition prefix.
    /// Returns whether the next token was an instruction.
    fn parse_instruction(&mut self) -> Result<bool, AsmErr> {
        let Some(mut word) = self.peek_word()? else { return Ok(false) };

        let mut cond = None;
        if word.len() > 3 && word.get(..3).is_some_and(|p| p.eq_ignore_ascii_case("if_")) {
            let c = Cond::from_name(&word[3..])
                .ok_or_else(|| self.err(AsmErrKind::UnknownCondition(word.to_string())))?;
            self.next()?;

            word = self.peek_word()?
                .ok_or_else(|| self.err(AsmErrKind::MissingOpcode))?;
            cond = Some(c);
        }

        let mnemonic = word.to_ascii_lowercase();
        let entry = match mnemonic.as_str() {
            "nop" | "long" => None,
            m => match OpcodeEntry::lookup(m) {
                Some(e) => Some(e),
                None if cond.is_some() => return Err(self.err(AsmErrKind::UnknownOpcode(word.to_string()))),
                None => return Ok(false),
            },
        };
        self.next()?;
        trace!(line = self.line, %mnemonic, ?cond);

        let slot = match entry {
            None if mnemonic == "nop" => self.ctx.emit(Instr::NOP, None, None, None, self.line),
            None => {
                let value = self.parse_expr(Side::Src)?;
                self.ctx.emit(Instr::NOP, Some(RawKind::Long), None, Some(value), self.line)
            },
            Some(entry) => {
                let (instr, dest, src) = self.parse_operands(entry, cond.unwrap_or_default())?;
                self.ctx.emit(instr, None, dest, src, self.line)
            },
        };
        slot.map_err(|kind| self.err(kind))?;

        Ok(true)
    }

    /// Parses the operands and flags of a table instruction.
    fn parse_operands(&mut self, entry: &OpcodeEntry, cond: Cond) -> Result<(Instr, Option<Expr>, Option<Expr>), AsmErr> {
        let mut instr = Instr::encode_defaults(entry, cond);

        let dest = match entry.need_dest {
            true  => Some(self.parse_expr(Side::Dest)?),
            false => None,
        };

        let src = match entry.need_src && !entry.predefined_src {
            true => {
                let imm = self.tokens.strip_prefix(self.syntax.immediate_prefix)
                    .map_err(|e| self.err(AsmErrKind::Lex(e)))?;
                if imm {
                    if self.peek()?.is_none() {
                        return Err(self.err(AsmErrKind::MissingImmediate));
                    }
                    instr.set_imm(true);
                }
                Some(self.parse_expr(Side::Src)?)
            },
            false => None,
        };

        self.parse_flags(&mut instr)?;
        Ok((instr, dest, src))
    }

    /// Applies trailing `WZ`, `WC`, `WR`, `NR` flags.
    ///
    /// `NR` clears all three result bits, including any `WZ`/`WC` before it.
    /// Stops at the first token that is not a flag without consuming it.
    /// A two-letter token starting with `w` that is not a flag is an error.
    fn parse_flags(&mut self, instr: &mut Instr) -> Result<(), AsmErr> {
        while let Some(word) = self.peek_word()? {
            if word.len() != 2 { break; }

            match word.to_ascii_lowercase().as_str() {
                "wz" => instr.set_z(true),
                "wc" => instr.set_c(true),
                "wr" => instr.set_r(true),
                "nr" => {
                    instr.set_z(false);
                    instr.set_c(false);
                    instr.set_r(false);
                },
                f if f.starts_with('w') => return Err(self.err(AsmErrKind::InvalidFlag(word.to_string()))),
                _ => break,
            }
            self.next()?;
        }
        Ok(())
    }

    /// Parses a label declaration, with an optional `=`/`EQU` value.
    fn parse_label(&mut self) -> Result<(), AsmErr> {
        let Some(token) = self.next()? else { return Ok(()) };
        let Token::Word(word) = token else {
            return Err(self.err(AsmErrKind::InvalidLabel(token.to_string())));
        };
        let name = self.expand_label(word)?;

        let is_equ = match self.peek()? {
            Some(Token::Op("=")) => true,
            Some(Token::Word(w)) => w.eq_ignore_ascii_case("equ"),
            _ => false,
        };
        let value = match is_equ {
            true => {
                self.next()?;
                self.parse_value("EQU")?
            },
            false => self.ctx.curr_op as u64,
        };

        trace!(line = self.line, label = %name, value);
        self.ctx.program.symbols.insert(&name, value)
            .map_err(|kind| self.err(kind))?;

        if !word.starts_with(self.syntax.local_prefix) {
            self.ctx.last_global = Some(name);
        }
        Ok(())
    }

    /// Validates a label name and expands it to its full name
    /// (local labels are prefixed by the last global label).
    fn expand_label(&self, word: &str) -> Result<String, AsmErr> {
        if !is_valid_label(word, self.syntax.local_prefix) {
            let kind = match word.len() > MAX_LABEL_LEN {
                true  => AsmErrKind::LabelTooLong(word.len()),
                false => AsmErrKind::InvalidLabel(word.to_string()),
            };
            return Err(self.err(kind));
        }

        match word.starts_with(self.syntax.local_prefix) {
            true => match &self.ctx.last_global {
                Some(global) => Ok(format!("{global}{word}")),
                None => Err(self.err(AsmErrKind::LocalWithoutGlobal(word.to_string()))),
            },
            false => Ok(word.to_string()),
        }
    }

    /// Parses an expression chain: an operand followed by any number of `op operand` pairs.
    fn parse_expr(&mut self, side: Side) -> Result<Expr, AsmErr> {
        let mut expr = Expr::new(self.parse_operand(side)?);

        while let Some(Token::Op(op)) = self.peek()? {
            if op == "=" { break; }
            let op = BinOp::from_token(op)
                .ok_or_else(|| self.err(AsmErrKind::InvalidOperator(op.to_string())))?;
            self.next()?;

            expr.push(op, self.parse_operand(side)?);
        }

        Ok(expr)
    }

    /// Parses one operand of a chain: a number, a special register, or a label.
    fn parse_operand(&mut self, side: Side) -> Result<Operand, AsmErr> {
        let Some(Token::Word(word)) = self.next()? else {
            return Err(self.err(AsmErrKind::MissingOperand(side)));
        };

        if let Some(n) = parse_number(word) {
            return n.map(Operand::Number)
                .map_err(|_| self.err(AsmErrKind::InvalidNumber(word.to_string())));
        }
        if let Some(reg) = special_reg(word) {
            if side == Side::Dest && reg.read_only {
                return Err(self.err(AsmErrKind::ReadOnlyRegister(reg.name)));
            }
            return Ok(Operand::Number(u64::from(reg.addr)));
        }
        self.expand_label(word).map(Operand::Label)
    }
}

/// Whether a word can name a label:
/// an optional local prefix, then a letter or `_`, then letters, digits or `_`.
fn is_valid_label(word: &str, local_prefix: char) -> bool {
    let name = word.strip_prefix(local_prefix).unwrap_or(word);
    let mut chars = name.chars();

    word.len() <= MAX_LABEL_LEN
        && chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
