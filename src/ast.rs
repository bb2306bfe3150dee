//! Components relating to the 32-bit P8X32A instruction word.
//!
//! The word is laid out as follows (from the most significant bit):
//! ```text
//! 31     26 25 24 23 22 21  18 17       9 8        0
//! | opcode | z| c| r| i| cond |   dest    |   src    |
//! ```
//!
//! [`Instr`] wraps a raw word and exposes each field through a getter/setter pair.
//! The static tables (opcodes, conditions and special registers) live in [`table`].

pub mod table;

use table::{OpcodeEntry, CONDITIONS, OPCODES};

/// A single 32-bit instruction word.
///
/// Fields are read and written with explicit shifts and masks,
/// so the in-memory layout is always the word itself.
///
/// # Example
/// ```
/// use ppasm::ast::{Cond, Instr};
///
/// let mut instr = Instr::default();
/// instr.set_opcode(0b101000);
/// instr.set_cond(Cond::ALWAYS);
/// instr.set_dest(3);
/// instr.set_src(0x1F4);
/// assert_eq!(instr.opcode(), 0b101000);
/// assert_eq!(instr.dest(), 3);
/// assert_eq!(instr.src(), 0x1F4);
/// ```
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Default)]
pub struct Instr(pub u32);

const SRC_SHIFT: u32 = 0;
const DEST_SHIFT: u32 = 9;
const COND_SHIFT: u32 = 18;
const IMM_SHIFT: u32 = 22;
const R_SHIFT: u32 = 23;
const C_SHIFT: u32 = 24;
const Z_SHIFT: u32 = 25;
const OPCODE_SHIFT: u32 = 26;

/// Width of the dest and src operand fields.
pub const OPERAND_BITS: u32 = 9;
/// Mask of the dest and src operand fields.
pub const OPERAND_MASK: u32 = (1 << OPERAND_BITS) - 1;

impl Instr {
    /// The `NOP` word.
    pub const NOP: Instr = Instr(0);

    /// Creates a word holding the opcode and default flags of the given table entry,
    /// as well as its predefined source if it has one.
    pub fn encode_defaults(entry: &OpcodeEntry, cond: Cond) -> Self {
        let mut instr = Instr(0);
        instr.set_opcode(entry.opcode);
        instr.set_cond(cond);
        instr.set_z(entry.z);
        instr.set_c(entry.c);
        instr.set_r(entry.r);
        instr.set_imm(entry.imm);
        if entry.predefined_src {
            instr.set_src(entry.src);
        }
        instr
    }

    fn get(self, shift: u32, bits: u32) -> u32 {
        (self.0 >> shift) & ((1 << bits) - 1)
    }
    fn set(&mut self, shift: u32, bits: u32, value: u32) {
        let mask = ((1 << bits) - 1) << shift;
        self.0 = (self.0 & !mask) | ((value << shift) & mask);
    }

    /// The 6-bit opcode.
    pub fn opcode(self) -> u8 {
        self.get(OPCODE_SHIFT, 6) as u8
    }
    /// Sets the 6-bit opcode (extra bits are dropped).
    pub fn set_opcode(&mut self, opcode: u8) {
        self.set(OPCODE_SHIFT, 6, u32::from(opcode));
    }
    /// The Z (write zero flag) bit.
    pub fn z(self) -> bool {
        self.get(Z_SHIFT, 1) != 0
    }
    /// Sets the Z bit.
    pub fn set_z(&mut self, z: bool) {
        self.set(Z_SHIFT, 1, u32::from(z));
    }
    /// The C (write carry flag) bit.
    pub fn c(self) -> bool {
        self.get(C_SHIFT, 1) != 0
    }
    /// Sets the C bit.
    pub fn set_c(&mut self, c: bool) {
        self.set(C_SHIFT, 1, u32::from(c));
    }
    /// The R (write result) bit.
    pub fn r(self) -> bool {
        self.get(R_SHIFT, 1) != 0
    }
    /// Sets the R bit.
    pub fn set_r(&mut self, r: bool) {
        self.set(R_SHIFT, 1, u32::from(r));
    }
    /// The I (immediate source) bit.
    pub fn imm(self) -> bool {
        self.get(IMM_SHIFT, 1) != 0
    }
    /// Sets the I bit.
    pub fn set_imm(&mut self, imm: bool) {
        self.set(IMM_SHIFT, 1, u32::from(imm));
    }
    /// The 4-bit execution condition.
    pub fn cond(self) -> Cond {
        Cond(self.get(COND_SHIFT, 4) as u8)
    }
    /// Sets the execution condition.
    pub fn set_cond(&mut self, cond: Cond) {
        self.set(COND_SHIFT, 4, u32::from(cond.0));
    }
    /// The 9-bit destination operand.
    pub fn dest(self) -> u32 {
        self.get(DEST_SHIFT, OPERAND_BITS)
    }
    /// Sets the destination operand. Only the low 9 bits are kept.
    pub fn set_dest(&mut self, dest: u32) {
        self.set(DEST_SHIFT, OPERAND_BITS, dest);
    }
    /// The 9-bit source operand.
    pub fn src(self) -> u32 {
        self.get(SRC_SHIFT, OPERAND_BITS)
    }
    /// Sets the source operand. Only the low 9 bits are kept.
    pub fn set_src(&mut self, src: u32) {
        self.set(SRC_SHIFT, OPERAND_BITS, src);
    }

    /// Writes one byte of the word (byte 0 is the least significant).
    pub fn set_byte(&mut self, index: u32, value: u8) {
        self.set(index * 8, 8, u32::from(value));
    }
    /// Writes one 16-bit half of the word (half 0 is the least significant).
    pub fn set_half(&mut self, index: u32, value: u16) {
        self.set(index * 16, 16, u32::from(value));
    }

    /// Recovers the table entry this word was most likely assembled from.
    ///
    /// Several mnemonics share an opcode (e.g. `sub`/`cmp`, `jmp`/`call`/`ret`/`jmpret`,
    /// and the hub operations). Predefined sources are matched exactly,
    /// otherwise the entry whose default `r` bit, operand usage and default `i` bit
    /// agree the most with this word is chosen (first in table order on a tie).
    /// `jmp #0` is indistinguishable from `ret` and is named `ret`.
    ///
    /// Returns `None` for the all-zero `NOP` word and for the four unused opcodes
    /// (`0b000100` to `0b000111`).
    pub fn entry(self) -> Option<&'static OpcodeEntry> {
        if self == Instr::NOP { return None; }

        let candidates = || OPCODES.iter().filter(move |e| e.opcode == self.opcode());

        if self.imm() {
            let predefined = candidates()
                .find(|e| e.predefined_src && e.src == self.src());
            if predefined.is_some() { return predefined; }
        }

        let mut best: Option<(&OpcodeEntry, u8)> = None;
        for entry in candidates().filter(|e| !e.predefined_src) {
            // r is fixed per mnemonic, while i is often overridden by the source
            let score = 4 * u8::from(entry.r == self.r())
                + 2 * u8::from(entry.need_dest || self.dest() == 0)
                + 2 * u8::from(entry.need_src || self.src() == 0)
                + u8::from(entry.imm == self.imm());
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((entry, score));
            }
        }

        best.map(|(e, _)| e).or_else(|| candidates().next())
    }

    /// The mnemonic of this word (see [`Instr::entry`]).
    ///
    /// Words with an unused opcode can only come from data, so they are named `long`.
    pub fn mnemonic(self) -> &'static str {
        match self.entry() {
            Some(e) => e.name,
            None if self == Instr::NOP => "nop",
            None => "long",
        }
    }
}
impl From<u32> for Instr {
    fn from(value: u32) -> Self {
        Instr(value)
    }
}
impl From<Instr> for u32 {
    fn from(value: Instr) -> Self {
        value.0
    }
}

/// A 4-bit execution condition (the `IF_*` prefixes).
///
/// The condition is evaluated against the C and Z flags;
/// each bit of the code selects one of the four combinations of (C, Z).
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct Cond(pub(crate) u8);
impl Cond {
    /// Always execute (`0b1111`), the default condition.
    pub const ALWAYS: Cond = Cond(0b1111);
    /// Never execute (`0b0000`).
    pub const NEVER: Cond = Cond(0b0000);

    /// Creates a condition from its 4-bit code, returning `None` if it does not fit.
    pub fn new(code: u8) -> Option<Self> {
        (code < 16).then_some(Cond(code))
    }

    /// Looks up a condition by name, without the `if_` prefix (case-insensitive).
    ///
    /// ```
    /// use ppasm::ast::Cond;
    ///
    /// assert_eq!(Cond::from_name("NC_AND_NZ"), Cond::new(0b0001));
    /// assert_eq!(Cond::from_name("a"), Cond::new(0b0001));
    /// assert_eq!(Cond::from_name("sometimes"), None);
    /// ```
    pub fn from_name(name: &str) -> Option<Self> {
        CONDITIONS.iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|&(_, code)| Cond(code))
    }

    /// The 4-bit code of this condition.
    pub fn code(self) -> u8 {
        self.0
    }

    /// The canonical name of this condition (first table name with this code).
    pub fn name(self) -> &'static str {
        CONDITIONS.iter()
            .find(|&&(_, code)| code == self.0)
            .map_or("never", |&(n, _)| n)
    }
}
impl Default for Cond {
    fn default() -> Self {
        Cond::ALWAYS
    }
}
impl std::fmt::Display for Cond {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "if_{}", self.name())
    }
}

/// Which operand of an instruction something refers to.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum Side {
    #[allow(missing_docs)]
    Dest,
    #[allow(missing_docs)]
    Src,
}
impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Dest => f.write_str("dest"),
            Side::Src  => f.write_str("src"),
        }
    }
}
