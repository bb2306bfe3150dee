//! Formatters which write programs into images and listings.
//!
//! The [`ImageFormat`] trait describes an implementation of reading/writing programs.
//! This module provides these implementations of the trait:
//! - [`RawImage`]: the program words, with no header
//! - [`BootImage`]: the program words, behind the 32-byte bootloader preamble
//! - [`Listing`]: a text listing of the program, one line per word
//!
//! All words are written least significant byte first.

use std::fmt::Write;

use super::{Program, MAX_INSTRUCTIONS};
use crate::ast::Instr;

/// Size of the bootloader preamble.
pub const PREAMBLE_SIZE: usize = 32;
/// Clock frequency written into the preamble when none was set (80 MHz).
pub const DEFAULT_CLKFREQ: u32 = 80_000_000;
/// Clock mode register written into the preamble (`XTAL1 + PLL16X`).
pub const DEFAULT_CLKMODE: u8 = 0x6F;
/// Value the bytes of a boot image sum up to, modulo 256.
pub const CHECKSUM_TARGET: u8 = 0x14;

/// A trait defining program image formats.
pub trait ImageFormat {
    /// Representation of the serialized format.
    ///
    /// For binary formats, `[u8]` should be used.
    /// For text-based formats,`str` should be used.
    type Stream: ToOwned + ?Sized;
    /// Serializes into the stream format.
    fn serialize(p: &Program) -> <Self::Stream as ToOwned>::Owned;
    /// Deserializes from the stream format, returning `None`
    /// if an error occurred during deserialization.
    ///
    /// Label names do not survive serialization,
    /// so the deserialized program has an empty symbol table.
    fn deserialize(i: &Self::Stream) -> Option<Program>;
}

/// The checksum byte which makes `bytes` (including the checksum) sum to [`CHECKSUM_TARGET`].
pub fn checksum<'a>(bytes: impl IntoIterator<Item = &'a u8>) -> u8 {
    let sum = bytes.into_iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    CHECKSUM_TARGET.wrapping_sub(sum)
}

/// Creates the bootloader preamble for a program of `program.len() / 4` words.
///
/// A `clkfreq` of 0 selects [`DEFAULT_CLKFREQ`].
/// The checksum covers both the preamble and the program bytes.
///
/// # Example
/// ```
/// use ppasm::asm::encoding::create_preamble;
///
/// let preamble = create_preamble(0, 0x6F, &[0; 8]);
/// assert_eq!(preamble[..4], [0x00, 0xB4, 0xC4, 0x04]);
/// assert_eq!(preamble[8..10], [0x28, 0x00]);
///
/// let sum = preamble.iter().fold(0u8, |a, &b| a.wrapping_add(b));
/// assert_eq!(sum, 0x14);
/// ```
pub fn create_preamble(clkfreq: u32, clkmode: u8, program: &[u8]) -> [u8; PREAMBLE_SIZE] {
    let clkfreq = match clkfreq {
        0 => DEFAULT_CLKFREQ,
        f => f,
    };
    // program words plus the preamble, in bytes
    let imgsz = (program.len() + PREAMBLE_SIZE) as u16;

    let mut p = [0u8; PREAMBLE_SIZE];
    p[0x00..0x04].copy_from_slice(&clkfreq.to_le_bytes());
    p[0x04] = clkmode;
    p[0x05] = 0; // checksum
    p[0x06..0x08].copy_from_slice(&0x0010u16.to_le_bytes()); // program base
    p[0x08..0x0A].copy_from_slice(&imgsz.to_le_bytes()); // variable base
    p[0x0A..0x0C].copy_from_slice(&imgsz.wrapping_add(8).to_le_bytes()); // stack base
    p[0x0C..0x0E].copy_from_slice(&0x0018u16.to_le_bytes()); // initial program counter
    p[0x0E..0x10].copy_from_slice(&imgsz.wrapping_add(12).to_le_bytes()); // initial stack pointer
    p[0x10..0x12].copy_from_slice(&imgsz.wrapping_sub(16).to_le_bytes());
    p[0x12..0x18].copy_from_slice(&[0x02, 0x00, 0x08, 0x00, 0x00, 0x00]);
    // spin bootstrap: coginit(0, @program, @stack)
    p[0x18..0x20].copy_from_slice(&[0x35, 0x37, 0x04, 0x35, 0x2C, 0x00, 0x00, 0x00]);

    p[0x05] = checksum(p.iter().chain(program));
    p
}

fn program_bytes(p: &Program) -> Vec<u8> {
    p.slots().iter()
        .flat_map(|s| s.instr.0.to_le_bytes())
        .collect()
}

fn read_words(bytes: &[u8]) -> Option<Vec<Instr>> {
    if bytes.len() % 4 != 0 || bytes.len() / 4 > MAX_INSTRUCTIONS {
        return None;
    }
    let words = bytes.chunks_exact(4)
        .map(|c| Instr(u32::from_le_bytes([c[0], c[1], c[2], c[3]])))
        .collect();
    Some(words)
}

/// The program words with no header (the `-r` output).
pub struct RawImage;
impl ImageFormat for RawImage {
    type Stream = [u8];

    fn serialize(p: &Program) -> <Self::Stream as ToOwned>::Owned {
        program_bytes(p)
    }

    fn deserialize(i: &Self::Stream) -> Option<Program> {
        Program::from_words(read_words(i)?, 0)
    }
}

/// The program words behind the bootloader preamble (see [`create_preamble`]).
pub struct BootImage;
impl ImageFormat for BootImage {
    type Stream = [u8];

    fn serialize(p: &Program) -> <Self::Stream as ToOwned>::Owned {
        let program = program_bytes(p);
        let preamble = create_preamble(p.clkfreq(), DEFAULT_CLKMODE, &program);

        let mut image = Vec::with_capacity(PREAMBLE_SIZE + program.len());
        image.extend_from_slice(&preamble);
        image.extend_from_slice(&program);
        image
    }

    /// Reads the image up to the size in its preamble (or up to its end, if shorter),
    /// checking the checksum over that part.
    ///
    /// Anything past the image size (such as the padding of an EEPROM dump) is ignored,
    /// and at most [`MAX_INSTRUCTIONS`] words are read.
    fn deserialize(i: &Self::Stream) -> Option<Program> {
        if i.len() < PREAMBLE_SIZE {
            return None;
        }
        let imgsz = usize::from(u16::from_le_bytes([i[8], i[9]]));
        if imgsz < PREAMBLE_SIZE {
            return None;
        }

        let image = &i[..imgsz.min(i.len())];
        if checksum(image) != 0 {
            return None;
        }
        let (preamble, program) = image.split_at(PREAMBLE_SIZE);
        let program = &program[..program.len().min(MAX_INSTRUCTIONS * 4)];
        let clkfreq = u32::from_le_bytes([preamble[0], preamble[1], preamble[2], preamble[3]]);

        Program::from_words(read_words(program)?, clkfreq)
    }
}

/// A text listing of the program.
///
/// Each word is listed on its own line as:
/// ```text
/// <slot> <word> if_<cond> <mnemonic> $<dest>, $<src> zcri:<z><c><r><i>
/// ```
/// with the slot and word in uppercase hex and the operands in lowercase hex.
///
/// # Example
/// ```
/// use ppasm::asm::{assemble, AsmFlags};
/// use ppasm::asm::encoding::{ImageFormat, Listing};
///
/// let program = assemble("if_z add $10, #3 wc", &AsmFlags::default()).unwrap();
/// assert_eq!(
///     Listing::serialize(&program),
///     "0000 81E82003 if_e add $10, $3 zcri:0111\n"
/// );
/// ```
pub struct Listing;
impl ImageFormat for Listing {
    type Stream = str;

    fn serialize(p: &Program) -> <Self::Stream as ToOwned>::Owned {
        let mut out = String::new();
        for (i, slot) in p.slots().iter().enumerate() {
            let _ = writeln!(out, "{}", ListingLine(i, slot.instr));
        }
        out
    }

    /// Reads back the word column of each line.
    fn deserialize(i: &Self::Stream) -> Option<Program> {
        let words = i.lines()
            .filter(|l| !l.trim().is_empty())
            .enumerate()
            .map(|(n, line)| {
                let mut columns = line.split_whitespace();
                let index = usize::from_str_radix(columns.next()?, 16).ok()?;
                let word = u32::from_str_radix(columns.next()?, 16).ok()?;
                (index == n).then_some(Instr(word))
            })
            .collect::<Option<Vec<_>>>()?;

        Program::from_words(words, 0)
    }
}

struct ListingLine(usize, Instr);
impl std::fmt::Display for ListingLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let &ListingLine(i, instr) = self;
        write!(
            f, "{i:04X} {:08X} {} {} ${:x}, ${:x} zcri:{}{}{}{}",
            instr.0, instr.cond(), instr.mnemonic(), instr.dest(), instr.src(),
            u8::from(instr.z()), u8::from(instr.c()), u8::from(instr.r()), u8::from(instr.imm()),
        )
    }
}

/// Lists the words of an image (the `-d` output).
///
/// A boot image is validated and its preamble skipped;
/// a raw image is listed as is.
/// Returns `None` if the image is malformed.
pub fn disassemble(image: &[u8], raw: bool) -> Option<String> {
    let program = match raw {
        true  => RawImage::deserialize(image)?,
        false => BootImage::deserialize(image)?,
    };
    Some(Listing::serialize(&program))
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use crate::asm::{assemble, AsmFlags, Program};
    use crate::ast::table::{CONDITIONS, OPCODES};
    use crate::ast::{Cond, Instr};

    use super::{checksum, create_preamble, disassemble, BootImage, ImageFormat, Listing, RawImage, PREAMBLE_SIZE};

    fn byte_sum(bytes: &[u8]) -> u8 {
        bytes.iter().fold(0u8, |a, &b| a.wrapping_add(b))
    }

    #[test]
    fn test_preamble_layout() {
        let program = [0x01, 0x02, 0x03, 0x04];
        let p = create_preamble(0, 0x6F, &program);
        let imgsz: u16 = 4 + 32;

        assert_eq!(p[0..4], [0x00, 0xB4, 0xC4, 0x04]);
        assert_eq!(p[4], 0x6F);
        assert_eq!(p[6..8], [0x10, 0x00]);
        assert_eq!(p[8..10], imgsz.to_le_bytes());
        assert_eq!(p[10..12], (imgsz + 8).to_le_bytes());
        assert_eq!(p[12..14], [0x18, 0x00]);
        assert_eq!(p[14..16], (imgsz + 12).to_le_bytes());
        assert_eq!(p[16..18], (imgsz - 16).to_le_bytes());
        assert_eq!(p[18..24], [0x02, 0x00, 0x08, 0x00, 0x00, 0x00]);
        assert_eq!(p[24..32], [0x35, 0x37, 0x04, 0x35, 0x2C, 0x00, 0x00, 0x00]);

        let mut all = p.to_vec();
        all.extend_from_slice(&program);
        assert_eq!(byte_sum(&all), 0x14);
    }

    #[test]
    fn test_clkfreq() {
        let p = create_preamble(12_000_000, 0x6F, &[]);
        assert_eq!(p[0..4], 12_000_000u32.to_le_bytes());

        let program = assemble("_CLKFREQ 5_000_000\nnop", &AsmFlags::default()).unwrap();
        let image = BootImage::serialize(&program);
        assert_eq!(image[0..4], 5_000_000u32.to_le_bytes());
    }

    #[test]
    fn test_checksum_invariant() {
        let mut rng = StdRng::seed_from_u64(0x1234_5678);

        for _ in 0..100 {
            let len = rng.gen_range(0..=512);
            let words = (0..len).map(|_| Instr(rng.gen())).collect::<Vec<_>>();
            let program = Program::from_words(words, rng.gen_range(1..=u32::MAX)).unwrap();

            let image = BootImage::serialize(&program);
            assert_eq!(image.len(), PREAMBLE_SIZE + 4 * len);
            assert_eq!(checksum(&image), 0, "sum of image bytes should be 0x14");
            assert_eq!(BootImage::deserialize(&image), Some(program));
        }
    }

    #[test]
    fn test_boot_image_validation() {
        let program = assemble("mov 1, #2\nlong 7", &AsmFlags::default()).unwrap();
        let mut image = BootImage::serialize(&program);
        assert!(BootImage::deserialize(&image).is_some());

        image[PREAMBLE_SIZE] ^= 1;
        assert_eq!(BootImage::deserialize(&image), None, "bad checksum");

        let image = BootImage::serialize(&program);
        assert_eq!(BootImage::deserialize(&image[..PREAMBLE_SIZE + 4]), None, "truncated");
        assert_eq!(BootImage::deserialize(&image[..10]), None);
    }

    #[test]
    fn test_padded_boot_image() {
        let program = assemble("mov 1, #2\nlong 7", &AsmFlags::default()).unwrap();
        let image = BootImage::serialize(&program);

        // an EEPROM dump carries the image followed by the rest of the 32K
        let mut eeprom = image.clone();
        eeprom.resize(0x8000, 0);
        eeprom[0x7FF8..0x8000].copy_from_slice(&[0xFF, 0xFF, 0xF9, 0xFF, 0xFF, 0xFF, 0xF9, 0xFF]);

        let words = |p: &Program| p.slots().iter().map(|s| s.instr).collect::<Vec<_>>();
        assert_eq!(BootImage::deserialize(&eeprom).as_ref().map(words), Some(words(&program)));
        assert_eq!(disassemble(&eeprom, false), disassemble(&image, false));

        let mut bad = eeprom.clone();
        bad[PREAMBLE_SIZE + 4] ^= 1;
        assert_eq!(BootImage::deserialize(&bad), None);
    }

    #[test]
    fn test_raw_image() {
        let program = assemble("long $11223344\nlong $AABBCCDD", &AsmFlags::default()).unwrap();
        let image = RawImage::serialize(&program);
        assert_eq!(image, [0x44, 0x33, 0x22, 0x11, 0xDD, 0xCC, 0xBB, 0xAA]);

        let back = RawImage::deserialize(&image).unwrap();
        assert_eq!(back.slots().iter().map(|s| s.instr.0).collect::<Vec<_>>(), [0x11223344, 0xAABBCCDD]);
        assert_eq!(RawImage::deserialize(&image[..7]), None);
    }

    #[test]
    fn test_listing() {
        let program = assemble("
                    nop
            loop    if_nc_and_nz djnz count, #loop wz
                    jmp #loop
            count   long 0
        ", &AsmFlags::default()).unwrap();

        let listing = Listing::serialize(&program);
        let lines = listing.lines().collect::<Vec<_>>();
        assert_eq!(lines[0], "0000 00000000 if_never nop $0, $0 zcri:0000");
        assert_eq!(lines[1], "0001 E6C40601 if_a djnz $3, $1 zcri:1011");
        assert_eq!(lines[2], "0002 5C7C0001 if_always jmp $0, $1 zcri:0001");
        assert_eq!(lines[3], "0003 00000000 if_never nop $0, $0 zcri:0000");

        let back = Listing::deserialize(&listing).unwrap();
        assert_eq!(back.slots(), program.slots().iter().map(|s| crate::asm::Slot { raw: None, ..*s }).collect::<Vec<_>>());
    }

    #[test]
    fn test_disassemble() {
        let program = assemble("mov 1, #2", &AsmFlags::default()).unwrap();
        let expected = Listing::serialize(&program);

        assert_eq!(disassemble(&BootImage::serialize(&program), false).as_deref(), Some(&*expected));
        assert_eq!(disassemble(&RawImage::serialize(&program), true).as_deref(), Some(&*expected));
        assert_eq!(disassemble(&RawImage::serialize(&program), false), None);
    }

    #[test]
    fn test_round_trip_every_opcode() {
        // canonical condition names, cycled through the instructions
        let conds = CONDITIONS.iter()
            .filter(|(n, c)| Cond::new(*c).map(Cond::name) == Some(*n))
            .map(|(n, _)| *n)
            .collect::<Vec<_>>();
        assert_eq!(conds.len(), 16);

        let mut src = String::new();
        for (i, e) in OPCODES.iter().enumerate() {
            let cond = conds[i % conds.len()];
            let operands = match (e.need_dest, e.need_src && !e.predefined_src) {
                (true, true)   => "target, target",
                (true, false)  => "target",
                (false, true)  => "target",
                (false, false) => "",
            };
            src.push_str(&format!("if_{cond} {} {operands}\n", e.name));
        }
        src.push_str("target long 0\n");

        let program = assemble(&src, &AsmFlags::default()).unwrap();
        let slots = program.slots();

        for (i, e) in OPCODES.iter().enumerate() {
            let instr = slots[i].instr;
            assert_eq!(instr.mnemonic(), e.name, "slot {i}");
            assert_eq!(instr.cond().name(), conds[i % conds.len()], "slot {i}");
            assert_eq!((instr.z(), instr.c(), instr.r()), (e.z, e.c, e.r), "slot {i}");
        }

        // reassembling the recovered source gives the same words
        let mut again = String::new();
        for slot in &slots[..OPCODES.len()] {
            let instr = slot.instr;
            let e = instr.entry().unwrap();
            let src = match instr.imm() && !e.predefined_src {
                true  => format!("#{}", instr.src()),
                false => instr.src().to_string(),
            };
            let operands = match (e.need_dest, e.need_src && !e.predefined_src) {
                (true, true)   => format!("{}, {src}", instr.dest()),
                (true, false)  => instr.dest().to_string(),
                (false, true)  => src,
                (false, false) => String::new(),
            };
            again.push_str(&format!("{} {} {operands}\n", instr.cond(), e.name));
        }
        again.push_str("long 0\n");

        let reassembled = assemble(&again, &AsmFlags::default()).unwrap();
        assert_eq!(RawImage::serialize(&reassembled), RawImage::serialize(&program));
    }
}
