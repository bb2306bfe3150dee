//! Static tables of the P8X32A instruction set:
//! - [`OPCODES`]: every assembler mnemonic with its opcode, default flags and operand usage,
//! - [`CONDITIONS`]: every `IF_*` condition name with its 4-bit code,
//! - [`SPECIAL_REGS`]: the named cog registers at `$1F0..=$1FF`.

/// An entry of the opcode table.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct OpcodeEntry {
    /// Lowercase mnemonic.
    pub name: &'static str,
    /// The 6-bit opcode.
    pub opcode: u8,
    /// Source written by the assembler when `predefined_src` is set
    /// (the hub operation selector of `COGID`, `LOCKNEW`, ...).
    pub src: u32,
    /// Whether the instruction takes a destination operand.
    pub need_dest: bool,
    /// Whether the instruction takes a source operand.
    pub need_src: bool,
    /// Whether the source is fixed by the mnemonic.
    pub predefined_src: bool,
    /// Default Z bit.
    pub z: bool,
    /// Default C bit.
    pub c: bool,
    /// Default R bit.
    pub r: bool,
    /// Default I bit.
    pub imm: bool,
}
impl OpcodeEntry {
    // flags: [need_dest, need_src, predefined_src, z, c, r, imm]
    const fn new(name: &'static str, opcode: u8, src: u32, flags: [u8; 7]) -> Self {
        Self {
            name, opcode, src,
            need_dest:      flags[0] != 0,
            need_src:       flags[1] != 0,
            predefined_src: flags[2] != 0,
            z:              flags[3] != 0,
            c:              flags[4] != 0,
            r:              flags[5] != 0,
            imm:            flags[6] != 0,
        }
    }

    /// Finds the entry for a mnemonic (case-insensitive).
    ///
    /// ```
    /// use ppasm::ast::table::OpcodeEntry;
    ///
    /// let entry = OpcodeEntry::lookup("DJNZ").unwrap();
    /// assert_eq!(entry.opcode, 0b111001);
    /// assert!(entry.need_dest && entry.need_src && entry.r);
    /// assert!(OpcodeEntry::lookup("halt").is_none());
    /// ```
    pub fn lookup(name: &str) -> Option<&'static OpcodeEntry> {
        OPCODES.iter().find(|e| e.name.eq_ignore_ascii_case(name))
    }
}

const DS_R: [u8; 7]   = [1, 1, 0, 0, 0, 1, 0];
const DS_NR: [u8; 7]  = [1, 1, 0, 0, 0, 0, 0];
const HUB_R: [u8; 7]  = [1, 0, 1, 0, 0, 1, 1];
const HUB_NR: [u8; 7] = [1, 0, 1, 0, 0, 0, 1];

/// All assembler mnemonics, in alphabetical order.
pub static OPCODES: [OpcodeEntry; 78] = [
    OpcodeEntry::new("abs",     0b101010, 0, DS_R),
    OpcodeEntry::new("absneg",  0b101011, 0, DS_R),
    OpcodeEntry::new("add",     0b100000, 0, DS_R),
    OpcodeEntry::new("addabs",  0b100010, 0, DS_R),
    OpcodeEntry::new("adds",    0b110100, 0, DS_R),
    OpcodeEntry::new("addsx",   0b110110, 0, DS_R),
    OpcodeEntry::new("addx",    0b110010, 0, DS_R),
    OpcodeEntry::new("and",     0b011000, 0, DS_R),
    OpcodeEntry::new("andn",    0b011001, 0, DS_R),
    OpcodeEntry::new("call",    0b010111, 0, [0, 1, 0, 0, 0, 1, 1]),
    OpcodeEntry::new("clkset",  0b000011, 0, HUB_NR),
    OpcodeEntry::new("cmp",     0b100001, 0, DS_NR),
    OpcodeEntry::new("cmps",    0b110000, 0, DS_NR),
    OpcodeEntry::new("cmpsub",  0b111000, 0, DS_R),
    OpcodeEntry::new("cmpsx",   0b110001, 0, DS_NR),
    OpcodeEntry::new("cmpx",    0b110011, 0, DS_NR),
    OpcodeEntry::new("cogid",   0b000011, 1, HUB_R),
    OpcodeEntry::new("coginit", 0b000011, 2, HUB_NR),
    OpcodeEntry::new("cogstop", 0b000011, 3, HUB_NR),
    OpcodeEntry::new("djnz",    0b111001, 0, DS_R),
    OpcodeEntry::new("hubop",   0b000011, 0, DS_NR),
    OpcodeEntry::new("jmp",     0b010111, 0, [0, 1, 0, 0, 0, 0, 0]),
    OpcodeEntry::new("jmpret",  0b010111, 0, DS_R),
    OpcodeEntry::new("lockclr", 0b000011, 7, HUB_NR),
    OpcodeEntry::new("locknew", 0b000011, 4, HUB_R),
    OpcodeEntry::new("lockret", 0b000011, 5, HUB_NR),
    OpcodeEntry::new("lockset", 0b000011, 6, HUB_NR),
    OpcodeEntry::new("max",     0b010011, 0, DS_R),
    OpcodeEntry::new("maxs",    0b010001, 0, DS_R),
    OpcodeEntry::new("min",     0b010010, 0, DS_R),
    OpcodeEntry::new("mins",    0b010000, 0, DS_R),
    OpcodeEntry::new("mov",     0b101000, 0, DS_R),
    OpcodeEntry::new("movd",    0b010101, 0, DS_R),
    OpcodeEntry::new("movi",    0b010110, 0, DS_R),
    OpcodeEntry::new("movs",    0b010100, 0, DS_R),
    OpcodeEntry::new("muxc",    0b011100, 0, DS_R),
    OpcodeEntry::new("muxnc",   0b011101, 0, DS_R),
    OpcodeEntry::new("muxnz",   0b011111, 0, DS_R),
    OpcodeEntry::new("muxz",    0b011110, 0, DS_R),
    OpcodeEntry::new("neg",     0b101001, 0, DS_R),
    OpcodeEntry::new("negc",    0b101100, 0, DS_R),
    OpcodeEntry::new("negnc",   0b101101, 0, DS_R),
    OpcodeEntry::new("negnz",   0b101111, 0, DS_R),
    OpcodeEntry::new("negz",    0b101110, 0, DS_R),
    OpcodeEntry::new("or",      0b011010, 0, DS_R),
    OpcodeEntry::new("rcl",     0b001101, 0, DS_R),
    OpcodeEntry::new("rcr",     0b001100, 0, DS_R),
    OpcodeEntry::new("rdbyte",  0b000000, 0, DS_R),
    OpcodeEntry::new("rdlong",  0b000010, 0, DS_R),
    OpcodeEntry::new("rdword",  0b000001, 0, DS_R),
    OpcodeEntry::new("ret",     0b010111, 0, [0, 0, 0, 0, 0, 0, 1]),
    OpcodeEntry::new("rev",     0b001111, 0, DS_R),
    OpcodeEntry::new("rol",     0b001001, 0, DS_R),
    OpcodeEntry::new("ror",     0b001000, 0, DS_R),
    OpcodeEntry::new("sar",     0b001110, 0, DS_R),
    OpcodeEntry::new("shl",     0b001011, 0, DS_R),
    OpcodeEntry::new("shr",     0b001010, 0, DS_R),
    OpcodeEntry::new("sub",     0b100001, 0, DS_R),
    OpcodeEntry::new("subabs",  0b100011, 0, DS_R),
    OpcodeEntry::new("subs",    0b110101, 0, DS_R),
    OpcodeEntry::new("subsx",   0b110111, 0, DS_R),
    OpcodeEntry::new("subx",    0b110011, 0, DS_R),
    OpcodeEntry::new("sumc",    0b100100, 0, DS_R),
    OpcodeEntry::new("sumnc",   0b100101, 0, DS_R),
    OpcodeEntry::new("sumnz",   0b100111, 0, DS_R),
    OpcodeEntry::new("sumz",    0b100110, 0, DS_R),
    OpcodeEntry::new("test",    0b011000, 0, DS_NR),
    OpcodeEntry::new("testn",   0b011001, 0, DS_NR),
    OpcodeEntry::new("tjnz",    0b111010, 0, DS_NR),
    OpcodeEntry::new("tjz",     0b111011, 0, DS_NR),
    OpcodeEntry::new("waitcnt", 0b111110, 0, DS_R),
    OpcodeEntry::new("waitpeq", 0b111100, 0, DS_NR),
    OpcodeEntry::new("waitpne", 0b111101, 0, DS_NR),
    OpcodeEntry::new("waitvid", 0b111111, 0, DS_NR),
    OpcodeEntry::new("wrbyte",  0b000000, 0, DS_NR),
    OpcodeEntry::new("wrlong",  0b000010, 0, DS_NR),
    OpcodeEntry::new("wrword",  0b000001, 0, DS_NR),
    OpcodeEntry::new("xor",     0b011011, 0, DS_R),
];

/// All condition names (without the `if_` prefix) and their codes.
///
/// The first name listed for a code is its canonical name.
pub static CONDITIONS: [(&str, u8); 32] = [
    ("always",    0b1111),
    ("never",     0b0000),
    ("e",         0b1010),
    ("ne",        0b0101),
    ("a",         0b0001),
    ("b",         0b1100),
    ("ae",        0b0011),
    ("be",        0b1110),
    ("c",         0b1100),
    ("nc",        0b0011),
    ("z",         0b1010),
    ("nz",        0b0101),
    ("c_eq_z",    0b1001),
    ("c_ne_z",    0b0110),
    ("c_and_z",   0b1000),
    ("c_and_nz",  0b0100),
    ("nc_and_z",  0b0010),
    ("nc_and_nz", 0b0001),
    ("c_or_z",    0b1110),
    ("c_or_nz",   0b1101),
    ("nc_or_z",   0b1011),
    ("nc_or_nz",  0b0111),
    ("z_eq_c",    0b1001),
    ("z_ne_c",    0b0110),
    ("z_and_c",   0b1000),
    ("z_and_nc",  0b0010),
    ("nz_and_c",  0b0100),
    ("nz_and_nc", 0b0001),
    ("z_or_c",    0b1110),
    ("z_or_nc",   0b1011),
    ("nz_or_c",   0b1101),
    ("nz_or_nc",  0b0111),
];

/// The named special registers and their cog addresses.
pub static SPECIAL_REGS: [(&str, u32); 16] = [
    ("par",  0x1F0),
    ("cnt",  0x1F1),
    ("ina",  0x1F2),
    ("inb",  0x1F3),
    ("outa", 0x1F4),
    ("outb", 0x1F5),
    ("dira", 0x1F6),
    ("dirb", 0x1F7),
    ("ctra", 0x1F8),
    ("ctrb", 0x1F9),
    ("frqa", 0x1FA),
    ("frqb", 0x1FB),
    ("phsa", 0x1FC),
    ("phsb", 0x1FD),
    ("vcfg", 0x1FE),
    ("vscl", 0x1FF),
];

/// The number of leading [`SPECIAL_REGS`] entries which are read-only
/// (`par`, `cnt`, `ina`, `inb`).
pub const NUM_READ_ONLY_REGS: usize = 4;

/// A special register found by [`special_reg`].
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct SpecialReg {
    /// Canonical (lowercase) name.
    pub name: &'static str,
    /// Cog address.
    pub addr: u32,
    /// Whether the register can only appear as a source.
    pub read_only: bool,
}

/// Looks up a special register by name (case-insensitive).
///
/// ```
/// use ppasm::ast::table::special_reg;
///
/// let outa = special_reg("OUTA").unwrap();
/// assert_eq!(outa.addr, 0x1F4);
/// assert!(!outa.read_only);
/// assert!(special_reg("ina").unwrap().read_only);
/// ```
pub fn special_reg(name: &str) -> Option<SpecialReg> {
    SPECIAL_REGS.iter()
        .position(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|i| SpecialReg {
            name: SPECIAL_REGS[i].0,
            addr: SPECIAL_REGS[i].1,
            read_only: i < NUM_READ_ONLY_REGS,
        })
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::{special_reg, OpcodeEntry, CONDITIONS, OPCODES, SPECIAL_REGS};

    #[test]
    fn test_opcode_table_shape() {
        let names: HashSet<_> = OPCODES.iter().map(|e| e.name).collect();
        assert_eq!(names.len(), OPCODES.len(), "mnemonics should be unique");

        for e in &OPCODES {
            assert!(e.opcode < 64, "{} has an opcode wider than 6 bits", e.name);
            assert_eq!(e.name, e.name.to_lowercase());
            if e.predefined_src {
                assert!(!e.need_src, "{} has a predefined source and a source operand", e.name);
                assert_eq!(e.opcode, 0b000011);
            } else {
                assert_eq!(e.src, 0);
            }
        }

        let mut sorted = OPCODES.iter().map(|e| e.name).collect::<Vec<_>>();
        sorted.sort_unstable();
        assert_eq!(sorted, OPCODES.iter().map(|e| e.name).collect::<Vec<_>>());
    }

    #[test]
    fn test_lookup_case_insensitive() {
        assert_eq!(OpcodeEntry::lookup("MoV"), OpcodeEntry::lookup("mov"));
        assert_eq!(OpcodeEntry::lookup("locknew").map(|e| e.src), Some(4));
        assert_eq!(OpcodeEntry::lookup("nop"), None);
        assert_eq!(OpcodeEntry::lookup("long"), None);
    }

    #[test]
    fn test_condition_table() {
        let names: HashSet<_> = CONDITIONS.iter().map(|(n, _)| *n).collect();
        assert_eq!(names.len(), 32);

        let codes: HashSet<_> = CONDITIONS.iter().map(|(_, c)| *c).collect();
        assert_eq!(codes.len(), 16, "every 4-bit code should be nameable");

        // the mirrored spellings agree with each other
        let code = |name: &str| CONDITIONS.iter().find(|(n, _)| *n == name).map(|(_, c)| *c);
        assert_eq!(code("c_and_nz"), code("nz_and_c"));
        assert_eq!(code("nc_or_z"), code("z_or_nc"));
        assert_eq!(code("b"), code("c"));
        assert_eq!(code("ae"), code("nc"));
    }

    #[test]
    fn test_special_regs() {
        for (i, (name, addr)) in SPECIAL_REGS.iter().enumerate() {
            assert_eq!(*addr, 0x1F0 + i as u32);
            assert_eq!(special_reg(name).map(|r| r.addr), Some(*addr));
        }
        let read_only = SPECIAL_REGS.iter()
            .filter(|(n, _)| special_reg(n).is_some_and(|r| r.read_only))
            .map(|(n, _)| *n)
            .collect::<Vec<_>>();
        assert_eq!(read_only, ["par", "cnt", "ina", "inb"]);
        assert_eq!(special_reg("Dira").map(|r| r.name), Some("dira"));
        assert_eq!(special_reg("r0"), None);
    }
}
