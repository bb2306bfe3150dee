//! Assembling P8X32A source into programs.
//!
//! Assembly happens in two passes:
//! 1. [`parse_program`] reads the source into an [`AssemblyContext`],
//!    recording every label's value and every instruction with its operands
//!    still in expression form.
//! 2. [`AssemblyContext::resolve`] evaluates the pending operands against the
//!    completed [`SymbolTable`] and writes them into the instruction words,
//!    producing a [`Program`].
//!
//! [`assemble`] runs both passes.
//! A [`Program`] can then be turned into a binary image (see [`encoding`]).
//!
//! [`parse_program`]: crate::parse::parse_program

pub mod encoding;

use std::borrow::Cow;
use std::collections::HashMap;

use tracing::debug;

use crate::ast::{Instr, Side};
use crate::err::ErrSpan;
use crate::parse::expr::{Expr, ExprErr};
use crate::parse::lex::LexErr;
use crate::parse::{parse_program, Syntax};

/// Number of longs in cog memory, and so the maximum number of instruction slots.
pub const MAX_INSTRUCTIONS: usize = 512;
/// Maximum length of a label (after the local prefix, if any).
pub const MAX_LABEL_LEN: usize = 256;

/// Configuration for the assembler.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Default)]
pub struct AsmFlags {
    /// The syntax profile of the source.
    pub syntax: Syntax,
}

/// Assembles source code into a program.
///
/// # Example
/// ```
/// use ppasm::asm::{assemble, AsmFlags};
///
/// let src = "
///     entry   mov     dira, pins
///     :loop   xor     outa, pins
///             jmp     #:loop
///     pins    long    $0001_0000
/// ";
/// let program = assemble(src, &AsmFlags::default()).unwrap();
/// assert_eq!(program.len(), 4);
/// assert_eq!(program.symbols().lookup("entry:loop"), Some(1));
/// assert_eq!(program.slots()[2].instr.src(), 1);
/// ```
pub fn assemble(src: &str, flags: &AsmFlags) -> Result<Program, AsmErr> {
    parse_program(src, &flags.syntax)?.resolve()
}

/// Kinds of errors that can occur from assembling given assembly code.
///
/// See [`AsmErr`] for this error type with span information included.
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub enum AsmErrKind {
    /// The line could not be tokenized.
    Lex(LexErr),
    /// A condition prefix was not followed by a known mnemonic.
    UnknownOpcode(String),
    /// An `IF_` prefix named an unknown condition.
    UnknownCondition(String),
    /// A condition prefix ended the line.
    MissingOpcode,
    /// A word was not an instruction, directive or valid label.
    InvalidLabel(String),
    /// A label was too long.
    LabelTooLong(usize),
    /// A label was defined more than once.
    DuplicateLabel(String),
    /// A local label was used before any global label.
    LocalWithoutGlobal(String),
    /// A two-letter `w` token was not `WZ`, `WC` or `WR`.
    InvalidFlag(String),
    /// A numeric literal had invalid digits or did not fit 64 bits.
    InvalidNumber(String),
    /// An operator token was not one of `+ - * /`.
    InvalidOperator(String),
    /// An instruction operand was missing.
    MissingOperand(Side),
    /// The immediate prefix was not followed by anything.
    MissingImmediate,
    /// A directive or `EQU` had no argument.
    MissingArgument(&'static str),
    /// A read-only special register was used as a destination.
    ReadOnlyRegister(&'static str),
    /// An instruction was placed at or past the `FIT` bound.
    DoesNotFit(usize),
    /// An instruction was placed past the end of cog memory.
    ProgramTooLarge,
    /// A directive argument does not fit its field.
    OutOfRange(&'static str, u64),
    /// A directive or `EQU` argument could not be evaluated.
    Expr(ExprErr),
    /// A pending operand could not be evaluated (second pass).
    Unresolved(Side, ExprErr),
}
impl std::fmt::Display for AsmErrKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lex(e)                => e.fmt(f),
            Self::UnknownOpcode(s)      => write!(f, "unknown opcode {s}"),
            Self::UnknownCondition(s)   => write!(f, "unknown condition {s}"),
            Self::MissingOpcode         => f.write_str("expected opcode after condition"),
            Self::InvalidLabel(s)       => write!(f, "invalid label {s}"),
            Self::LabelTooLong(n)       => write!(f, "label is {n} characters long"),
            Self::DuplicateLabel(s)     => write!(f, "label {s} was already defined"),
            Self::LocalWithoutGlobal(s) => write!(f, "local label {s} has no global label before it"),
            Self::InvalidFlag(s)        => write!(f, "invalid flag {s}"),
            Self::InvalidNumber(s)      => write!(f, "invalid number {s}"),
            Self::InvalidOperator(s)    => write!(f, "invalid operator {s}"),
            Self::MissingOperand(side)  => write!(f, "expected {side} operand"),
            Self::MissingImmediate      => f.write_str("nothing after immediate symbol"),
            Self::MissingArgument(d)    => write!(f, "missing {d} argument"),
            Self::ReadOnlyRegister(r)   => write!(f, "cannot write to read-only register {r}"),
            Self::DoesNotFit(n)         => write!(f, "program doesn't fit in {n} longs"),
            Self::ProgramTooLarge       => write!(f, "program doesn't fit in cog memory ({MAX_INSTRUCTIONS} longs)"),
            Self::OutOfRange(d, v)      => write!(f, "{d} argument {v} is out of range"),
            Self::Expr(e)               => e.fmt(f),
            Self::Unresolved(side, e)   => write!(f, "error resolving {side} expression: {e}"),
        }
    }
}

/// Error from assembling given assembly code.
#[derive(Debug)]
pub struct AsmErr {
    /// The value with a span.
    pub kind: AsmErrKind,
    /// The span in the source associated with this value.
    pub span: ErrSpan
}
impl AsmErr {
    /// Creates a new [`AsmErr`].
    pub fn new<E: Into<ErrSpan>>(kind: AsmErrKind, span: E) -> Self {
        AsmErr { kind, span: span.into() }
    }
}
impl std::fmt::Display for AsmErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.kind.fmt(f)
    }
}
impl std::error::Error for AsmErr {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            AsmErrKind::Lex(e) => Some(e),
            AsmErrKind::Expr(e) | AsmErrKind::Unresolved(_, e) => Some(e),
            _ => None
        }
    }
}
impl crate::err::Error for AsmErr {
    fn span(&self) -> Option<ErrSpan> {
        Some(self.span)
    }

    fn help(&self) -> Option<Cow<str>> {
        match &self.kind {
            AsmErrKind::Lex(_)                => None,
            AsmErrKind::UnknownOpcode(_)      => Some("a condition must be followed by an instruction".into()),
            AsmErrKind::UnknownCondition(_)   => Some("conditions are written like if_z, if_nc_and_nz or if_always".into()),
            AsmErrKind::MissingOpcode         => Some("a condition must be followed by an instruction".into()),
            AsmErrKind::InvalidLabel(_)       => Some("labels start with a letter or _ and consist of letters, digits and _".into()),
            AsmErrKind::LabelTooLong(_)       => Some(format!("labels are limited to {MAX_LABEL_LEN} characters").into()),
            AsmErrKind::DuplicateLabel(_)     => Some("labels must be unique within a file, try renaming one of the labels".into()),
            AsmErrKind::LocalWithoutGlobal(_) => Some("try adding a global label before this one".into()),
            AsmErrKind::InvalidFlag(_)        => Some("the flags are wz, wc, wr and nr".into()),
            AsmErrKind::InvalidNumber(_)      => Some("numbers are decimal, $hexadecimal or %binary".into()),
            AsmErrKind::InvalidOperator(_)    => Some("only one of + - * / can be used between two operands".into()),
            AsmErrKind::MissingOperand(_)     => None,
            AsmErrKind::MissingImmediate      => None,
            AsmErrKind::MissingArgument(_)    => None,
            AsmErrKind::ReadOnlyRegister(_)   => Some("par, cnt, ina and inb can only be used as a source".into()),
            AsmErrKind::DoesNotFit(_)         => Some("try raising the FIT bound or shortening the program".into()),
            AsmErrKind::ProgramTooLarge       => None,
            AsmErrKind::OutOfRange("_CLKFREQ", _) => Some("the clock frequency is a 32-bit value (in Hz)".into()),
            AsmErrKind::OutOfRange(_, _)      => None,
            AsmErrKind::Expr(ExprErr::UnresolvedLabel(_)) => Some("directive and EQU arguments can only use labels defined above them".into()),
            AsmErrKind::Expr(e)               => crate::err::Error::help(e),
            AsmErrKind::Unresolved(_, e)      => crate::err::Error::help(e),
        }
    }
}

/// The symbol table: every label and its value, in declaration order.
///
/// Local labels are stored under their expanded name (`global:local`).
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct SymbolTable {
    entries: Vec<(String, u64)>,
    index: HashMap<String, usize>,
}
impl SymbolTable {
    /// Creates an empty symbol table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a label.
    ///
    /// Fails with [`AsmErrKind::DuplicateLabel`] if the label already exists.
    pub fn insert(&mut self, name: &str, value: u64) -> Result<(), AsmErrKind> {
        if self.index.contains_key(name) {
            return Err(AsmErrKind::DuplicateLabel(name.to_string()));
        }
        self.index.insert(name.to_string(), self.entries.len());
        self.entries.push((name.to_string(), value));
        Ok(())
    }

    /// Gets the value of a label.
    pub fn lookup(&self, name: &str) -> Option<u64> {
        self.index.get(name).map(|&i| self.entries[i].1)
    }

    /// Iterates over all labels in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> + '_ {
        self.entries.iter().map(|(n, v)| (n.as_str(), *v))
    }

    /// Number of labels.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no labels.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// How a raw (`LONG`) slot's value is written into its word.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum RawKind {
    /// Writes one byte (0 to 3, least significant first).
    Byte(u8),
    /// Writes the low 16 bits.
    LowWord,
    /// Writes the high 16 bits.
    HighWord,
    /// Writes the whole word.
    Long,
}
impl RawKind {
    /// The numeric code of this kind (1 to 7).
    pub fn code(self) -> u8 {
        match self {
            RawKind::Byte(i)  => i + 1,
            RawKind::LowWord  => 5,
            RawKind::HighWord => 6,
            RawKind::Long     => 7,
        }
    }

    /// Gets the kind for a numeric code (1 to 7).
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1..=4 => Some(RawKind::Byte(code - 1)),
            5 => Some(RawKind::LowWord),
            6 => Some(RawKind::HighWord),
            7 => Some(RawKind::Long),
            _ => None,
        }
    }

    fn write(self, instr: &mut Instr, value: u64) {
        match self {
            RawKind::Byte(i)  => instr.set_byte(u32::from(i), value as u8),
            RawKind::LowWord  => instr.set_half(0, value as u16),
            RawKind::HighWord => instr.set_half(1, value as u16),
            RawKind::Long     => *instr = Instr(value as u32),
        }
    }
}

/// One instruction slot of a program.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Default)]
pub struct Slot {
    /// The instruction word.
    pub instr: Instr,
    /// Whether anything was emitted into this slot.
    pub valid: bool,
    /// Whether (and how) this slot holds raw data rather than an instruction.
    pub raw: Option<RawKind>,
}

/// An assembled program: up to [`MAX_INSTRUCTIONS`] slots,
/// the symbol table, and the clock frequency for the image preamble.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Program {
    pub(crate) slots: Vec<Slot>,
    pub(crate) symbols: SymbolTable,
    pub(crate) clkfreq: u32,
}
impl Program {
    /// Creates an empty program.
    pub fn new() -> Self {
        Self {
            slots: vec![Slot::default(); MAX_INSTRUCTIONS],
            symbols: SymbolTable::new(),
            clkfreq: 0,
        }
    }

    /// Creates a program holding the given words, starting at slot 0.
    ///
    /// Returns `None` if there are more than [`MAX_INSTRUCTIONS`] words.
    pub fn from_words(words: impl IntoIterator<Item = Instr>, clkfreq: u32) -> Option<Self> {
        let mut program = Program::new();
        program.clkfreq = clkfreq;

        for (i, instr) in words.into_iter().enumerate() {
            let slot = program.slots.get_mut(i)?;
            *slot = Slot { instr, valid: true, raw: None };
        }
        Some(program)
    }

    /// The effective length of the program: the index of the highest
    /// valid slot plus one (0 for an empty program).
    ///
    /// Slots skipped by `ORG`/`RES` below that index count as (zero) words.
    pub fn len(&self) -> usize {
        self.slots.iter().rposition(|s| s.valid).map_or(0, |i| i + 1)
    }

    /// Whether nothing was emitted.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The slots up to [`Program::len`].
    pub fn slots(&self) -> &[Slot] {
        &self.slots[..self.len()]
    }

    /// The symbol table.
    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    /// The clock frequency set by `_CLKFREQ` (0 if unset).
    pub fn clkfreq(&self) -> u32 {
        self.clkfreq
    }
}
impl Default for Program {
    fn default() -> Self {
        Self::new()
    }
}

/// Operands of a slot which are still to be evaluated.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
struct Pending {
    line: usize,
    dest: Option<Expr>,
    src: Option<Expr>,
}

/// The state of one assembly run between the two passes.
///
/// This is created by [`parse_program`] and consumed by [`AssemblyContext::resolve`].
///
/// [`parse_program`]: crate::parse::parse_program
#[derive(Debug)]
pub struct AssemblyContext {
    pub(crate) program: Program,
    pending: Vec<Pending>,
    pub(crate) curr_op: usize,
    pub(crate) fit: usize,
    pub(crate) last_global: Option<String>,
}
impl AssemblyContext {
    /// Creates an empty context.
    pub fn new() -> Self {
        Self {
            program: Program::new(),
            pending: vec![Pending::default(); MAX_INSTRUCTIONS],
            curr_op: 0,
            fit: MAX_INSTRUCTIONS,
            last_global: None,
        }
    }

    /// The labels declared so far.
    pub fn symbols(&self) -> &SymbolTable {
        &self.program.symbols
    }

    /// Writes an instruction into the current slot and advances to the next one.
    ///
    /// `dest` and `src` are evaluated later by [`AssemblyContext::resolve`].
    /// For raw slots, the value is taken from `src`.
    pub fn emit(
        &mut self,
        instr: Instr,
        raw: Option<RawKind>,
        dest: Option<Expr>,
        src: Option<Expr>,
        line: usize,
    ) -> Result<usize, AsmErrKind> {
        let index = self.curr_op;
        if index >= MAX_INSTRUCTIONS {
            return Err(AsmErrKind::ProgramTooLarge);
        }
        if index >= self.fit {
            return Err(AsmErrKind::DoesNotFit(self.fit));
        }

        self.program.slots[index] = Slot { instr, valid: true, raw };
        self.pending[index] = Pending { line, dest, src };
        self.curr_op += 1;
        Ok(index)
    }

    /// Evaluates all pending operands (the second assembler pass).
    ///
    /// Raw slots write their value according to their [`RawKind`].
    /// Other slots write the low 9 bits of their operands into the dest and src fields.
    pub fn resolve(self) -> Result<Program, AsmErr> {
        let AssemblyContext { mut program, pending, .. } = self;
        let symbols = &program.symbols;

        for (slot, pending) in program.slots.iter_mut().zip(pending) {
            if !slot.valid { continue; }
            let Pending { line, dest, src } = pending;

            let eval = |side: Side, expr: Option<Expr>| -> Result<Option<u64>, AsmErr> {
                expr.map(|e| e.evaluate(symbols))
                    .transpose()
                    .map_err(|e| AsmErr::new(AsmErrKind::Unresolved(side, e), line))
            };
            let dest = eval(Side::Dest, dest)?;
            let src = eval(Side::Src, src)?;

            match slot.raw {
                Some(kind) => if let Some(value) = src {
                    kind.write(&mut slot.instr, value);
                },
                None => {
                    if let Some(d) = dest { slot.instr.set_dest(d as u32); }
                    if let Some(s) = src { slot.instr.set_src(s as u32); }
                },
            }
        }

        debug!(len = program.len(), labels = program.symbols.len(), "resolved program");
        Ok(program)
    }
}
impl Default for AssemblyContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use crate::ast::{Cond, Instr, Side};
    use crate::parse::lex::LexErr;
    use crate::parse::expr::{BinOp, Expr, ExprErr, Operand};

    use super::{assemble, AsmErrKind, AsmFlags, AssemblyContext, RawKind, SymbolTable, MAX_INSTRUCTIONS};

    fn label(s: &str) -> Expr {
        Expr::new(Operand::Label(s.to_string()))
    }

    #[test]
    fn test_symbol_table() {
        let mut symbols = SymbolTable::new();
        assert!(symbols.is_empty());
        symbols.insert("b", 1).unwrap();
        symbols.insert("a", 2).unwrap();
        assert_eq!(symbols.insert("b", 3), Err(AsmErrKind::DuplicateLabel("b".to_string())));
        assert_eq!(symbols.lookup("b"), Some(1));

        assert_eq!(symbols.lookup("c"), None);
        assert_eq!(symbols.iter().collect::<Vec<_>>(), [("b", 1), ("a", 2)]);
        assert_eq!(symbols.len(), 2);
    }

    #[test]
    fn test_forward_reference() {
        let program = assemble("
                    jmp     #later
                    nop
            later   mov     later, #later
        ", &AsmFlags::default()).unwrap();

        let slots = program.slots();
        assert_eq!(slots[0].instr.src(), 2);
        assert_eq!((slots[2].instr.dest(), slots[2].instr.src()), (2, 2));
    }

    #[test]
    fn test_unresolved_label() {
        let err = assemble("nop\njmp #nowhere", &AsmFlags::default()).unwrap_err();
        assert_eq!(err.kind, AsmErrKind::Unresolved(Side::Src, ExprErr::UnresolvedLabel("nowhere".to_string())));
        assert_eq!(err.span.line(), 2);

        let err = assemble("mov nowhere, #1", &AsmFlags::default()).unwrap_err();
        assert_eq!(err.kind, AsmErrKind::Unresolved(Side::Dest, ExprErr::UnresolvedLabel("nowhere".to_string())));

        let err = assemble("mov 1, #4 / 0", &AsmFlags::default()).unwrap_err();
        assert_eq!(err.kind, AsmErrKind::Unresolved(Side::Src, ExprErr::DivideByZero));
    }

    #[test]
    fn test_operands_truncate_to_nine_bits() {
        let program = assemble("mov $3FF, #$201", &AsmFlags::default()).unwrap();
        let instr = program.slots()[0].instr;
        assert_eq!((instr.dest(), instr.src()), (0x1FF, 0x001));
        assert_eq!(instr.opcode(), 0b101000);
        assert_eq!(instr.cond(), Cond::ALWAYS);
    }

    #[test]
    fn test_expression_operands() {
        let program = assemble("
            base    long    0
                    long    0
            top     mov     top - base, #14 - 4 / 2 * 3
        ", &AsmFlags::default()).unwrap();
        let instr = program.slots()[2].instr;
        assert_eq!((instr.dest(), instr.src()), (2, 15));
    }

    #[test]
    fn test_raw_kinds() {
        let mut ctx = AssemblyContext::new();
        let kinds = [
            RawKind::Byte(0), RawKind::Byte(1), RawKind::Byte(2), RawKind::Byte(3),
            RawKind::LowWord, RawKind::HighWord, RawKind::Long,
        ];
        ctx.program.symbols.insert("v", 0xAB).unwrap();
        for kind in kinds {
            let mut value = label("v");
            value.push(BinOp::Mul, Operand::Number(0x0101));
            ctx.emit(Instr(0x1111_1111), Some(kind), None, Some(value), 1).unwrap();
        }

        let program = ctx.resolve().unwrap();
        let words = program.slots().iter().map(|s| s.instr.0).collect::<Vec<_>>();
        assert_eq!(words, [
            0x1111_11AB, 0x1111_AB11, 0x11AB_1111, 0xAB11_1111,
            0x1111_ABAB, 0xABAB_1111, 0x0000_ABAB,
        ]);

        for kind in kinds {
            assert_eq!(RawKind::from_code(kind.code()), Some(kind));
        }
        assert_eq!(RawKind::from_code(0), None);
        assert_eq!(RawKind::from_code(8), None);
    }

    #[test]
    fn test_effective_length() {
        let program = assemble("", &AsmFlags::default()).unwrap();
        assert!(program.is_empty());
        assert!(program.slots().is_empty());

        let program = assemble("org 10\nnop", &AsmFlags::default()).unwrap();
        assert_eq!(program.len(), 11);
        assert!(!program.slots()[0].valid);
        assert!(program.slots()[10].valid);

        // trailing reserved space does not count
        let program = assemble("nop\nres 20\nbuffer", &AsmFlags::default()).unwrap();
        assert_eq!(program.len(), 1);
        assert_eq!(program.symbols().lookup("buffer"), Some(21));
    }

    #[test]
    fn test_emit_bounds() {
        let mut ctx = AssemblyContext::new();
        ctx.fit = 1;
        assert_eq!(ctx.emit(Instr::NOP, None, None, None, 1), Ok(0));
        assert_eq!(ctx.emit(Instr::NOP, None, None, None, 2), Err(AsmErrKind::DoesNotFit(1)));

        let mut ctx = AssemblyContext::new();
        ctx.curr_op = MAX_INSTRUCTIONS;
        assert_eq!(ctx.emit(Instr::NOP, None, None, None, 1), Err(AsmErrKind::ProgramTooLarge));
        assert_eq!(ctx.curr_op, MAX_INSTRUCTIONS);
    }

    #[test]
    fn test_error_kinds_deduplicate() {
        let kinds: HashSet<_> = [
            AsmErrKind::Lex(LexErr::InvalidSymbol),
            AsmErrKind::Lex(LexErr::InvalidSymbol),
            AsmErrKind::Unresolved(Side::Src, ExprErr::DivideByZero),
            AsmErrKind::ProgramTooLarge,
        ].into_iter().collect();
        assert_eq!(kinds.len(), 3);
        assert!(kinds.contains(&AsmErrKind::Lex(LexErr::InvalidSymbol)));
    }
}
