//! A P8X32A (Propeller) assembler and serial bootloader client.
//!
//! This assembles Propeller cog assembly into images
//! that the Propeller's ROM bootloader can load, and can send those images
//! to a chip over a serial port.
//!
//! # Usage
//!
//! Source code is assembled in two passes (statements, then operand resolution):
//! ```
//! use ppasm::asm::{assemble, AsmFlags};
//!
//! let code = "
//! entry   mov     dira, pin
//! :loop   xor     outa, pin
//!         jmp     #:loop
//! pin     long    $1_0000
//! ";
//! let program = assemble(code, &AsmFlags::default()).unwrap();
//! assert_eq!(program.len(), 4);
//! ```
//!
//! The assembled program can then be written in one of the image formats
//! (see [`asm::encoding`]):
//! ```
//! # use ppasm::asm::{assemble, AsmFlags};
//! # let program = assemble("nop", &AsmFlags::default()).unwrap();
//! use ppasm::asm::encoding::{BootImage, ImageFormat, Listing};
//!
//! let image = BootImage::serialize(&program); // 32-byte preamble + program
//! assert_eq!(image.len(), 36);
//! println!("{}", Listing::serialize(&program));
//! ```
//!
//! A boot image can be sent to a connected chip with [`link::transfer`].
#![warn(missing_docs)]

pub mod parse;
pub mod ast;
pub mod asm;
pub mod link;
pub mod err;
