//! SC324 AES accelerator front end
//!
//! The firmware's crypto driver streams 32-bit words through a small
//! register window:
//!
//! | offset | register | role                                   |
//! |--------|----------|----------------------------------------|
//! | 0x00   | AESMOD   | write: reset session (command, IV)     |
//! | 0x04   | AESCMD   | write: OR into command; read: ready    |
//! | 0x08   | AESKW0   | key words                              |
//! | 0x0C   | AESIVW   | IV words                               |
//! | 0x10   | AESDW    | write: input words; read: output words |
//!
//! Every word is byte-swapped on the way in and out (the SC324 register
//! file is big-endian relative to the Cortex-M bus). A shared fill index
//! steps through each four-word group and wraps; the fourth input word
//! triggers exactly one block operation. Reading AESCMD returns the
//! ready pattern and rewinds the index, which is how the FSP driver
//! resynchronizes between groups.
//!
//! Command layout: bit 0 selects direction (0 encrypt, 1 decrypt), bits
//! 4-5 select chaining (0 ECB, 1 CBC, other values ignored). The block
//! math is AES-128 from the `aes` crate; the chaining state lives here.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes128;
use log::{debug, trace};

/// AES block length in bytes.
pub const BLOCK_LENGTH: usize = 16;

/// Value returned by an AESCMD read: engine idle, result available.
pub const READY_PATTERN: u32 = 0x7F00_0000;

/// Register offsets within the accelerator block
mod regs {
    pub const AESMOD: u32 = 0x00;
    pub const AESCMD: u32 = 0x04;
    pub const AESKW0: u32 = 0x08;
    pub const AESIVW: u32 = 0x0C;
    pub const AESDW: u32 = 0x10;
}

/// AESCMD bit fields
mod cmd {
    pub const DECRYPT: u32 = 0x01;
    pub const MODE_SHIFT: u32 = 4;
    pub const MODE_MASK: u32 = 0x3;
    pub const MODE_ECB: u32 = 0;
    pub const MODE_CBC: u32 = 1;
}

/// Which four-word register group a streamed word lands in.
#[derive(Debug, Clone, Copy)]
enum Target {
    Key,
    Iv,
    Input,
}

/// One accelerator instance. All state is dispatcher-thread-only.
#[derive(Debug)]
pub struct AesAccelerator {
    key: [u8; BLOCK_LENGTH],
    iv: [u8; BLOCK_LENGTH],
    input: [u8; BLOCK_LENGTH],
    output: [u8; BLOCK_LENGTH],
    aescmd: u32,
    /// Word fill index, always in 0..4.
    windex: usize,
}

impl AesAccelerator {
    pub fn new() -> Self {
        Self {
            key: [0; BLOCK_LENGTH],
            iv: [0; BLOCK_LENGTH],
            input: [0; BLOCK_LENGTH],
            output: [0; BLOCK_LENGTH],
            aescmd: 0,
            windex: 0,
        }
    }

    /// Read an accelerator register.
    pub fn read(&mut self, offset: u32, _size: u32) -> u32 {
        match offset {
            regs::AESCMD => {
                self.windex = 0;
                READY_PATTERN
            }
            regs::AESDW => {
                let i = self.windex * 4;
                let word = u32::from_be_bytes([
                    self.output[i],
                    self.output[i + 1],
                    self.output[i + 2],
                    self.output[i + 3],
                ]);
                self.advance();
                word
            }
            _ => 0,
        }
    }

    /// Write an accelerator register.
    pub fn write(&mut self, offset: u32, _size: u32, value: u32) {
        match offset {
            regs::AESMOD => {
                // New session: command, IV, and fill position all reset
                self.aescmd = 0;
                self.iv = [0; BLOCK_LENGTH];
                self.windex = 0;
            }
            regs::AESCMD => {
                self.aescmd |= value;
                debug!("sc324: command now {:#010x}", self.aescmd);
            }
            regs::AESKW0 => {
                self.store_word(Target::Key, value);
                self.advance();
            }
            regs::AESIVW => {
                self.store_word(Target::Iv, value);
                self.advance();
            }
            regs::AESDW => {
                self.store_word(Target::Input, value);
                self.advance();
                // Index wrapped: the block is full, run it
                if self.windex == 0 {
                    self.process_block();
                }
            }
            _ => trace!("sc324: ignored write {offset:#x} <- {value:#x}"),
        }
    }

    fn store_word(&mut self, target: Target, value: u32) {
        let group = match target {
            Target::Key => &mut self.key,
            Target::Iv => &mut self.iv,
            Target::Input => &mut self.input,
        };
        group[self.windex * 4..self.windex * 4 + 4].copy_from_slice(&value.to_be_bytes());
    }

    fn advance(&mut self) {
        self.windex = (self.windex + 1) % 4;
    }

    /// Run one AES-128 block in the direction and chaining mode the
    /// command selects. Unknown modes leave the output untouched.
    fn process_block(&mut self) {
        let core = Aes128::new(GenericArray::from_slice(&self.key));
        let mode = (self.aescmd >> cmd::MODE_SHIFT) & cmd::MODE_MASK;
        let decrypt = self.aescmd & cmd::DECRYPT != 0;

        match (mode, decrypt) {
            (cmd::MODE_ECB, false) => {
                let mut block = GenericArray::clone_from_slice(&self.input);
                core.encrypt_block(&mut block);
                self.output.copy_from_slice(&block);
            }
            (cmd::MODE_ECB, true) => {
                let mut block = GenericArray::clone_from_slice(&self.input);
                core.decrypt_block(&mut block);
                self.output.copy_from_slice(&block);
            }
            (cmd::MODE_CBC, false) => {
                let mut block = GenericArray::clone_from_slice(&self.input);
                for (b, v) in block.iter_mut().zip(self.iv.iter()) {
                    *b ^= v;
                }
                core.encrypt_block(&mut block);
                self.output.copy_from_slice(&block);
                // Ciphertext chains into the next block
                self.iv.copy_from_slice(&block);
            }
            (cmd::MODE_CBC, true) => {
                let mut block = GenericArray::clone_from_slice(&self.input);
                core.decrypt_block(&mut block);
                for (b, v) in block.iter_mut().zip(self.iv.iter()) {
                    *b ^= v;
                }
                self.output.copy_from_slice(&block);
                // Input ciphertext chains into the next block
                self.iv.copy_from_slice(&self.input);
            }
            _ => debug!("sc324: unsupported mode {mode}, block dropped"),
        }
    }
}

impl Default for AesAccelerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // FIPS-197 appendix C.1 vector
    const KEY_WORDS: [u32; 4] = [0x0001_0203, 0x0405_0607, 0x0809_0A0B, 0x0C0D_0E0F];
    const PLAIN_WORDS: [u32; 4] = [0x0011_2233, 0x4455_6677, 0x8899_AABB, 0xCCDD_EEFF];
    const CIPHER_WORDS: [u32; 4] = [0x69C4_E0D8, 0x6A7B_0430, 0xD8CD_B780, 0x70B4_C55A];

    fn begin_session(aes: &mut AesAccelerator, command: u32) {
        aes.write(regs::AESMOD, 4, 0);
        aes.write(regs::AESCMD, 4, command);
        for w in KEY_WORDS {
            aes.write(regs::AESKW0, 4, w);
        }
        assert_eq!(aes.read(regs::AESCMD, 4), READY_PATTERN);
    }

    fn run_block(aes: &mut AesAccelerator, input: [u32; 4]) -> [u32; 4] {
        for w in input {
            aes.write(regs::AESDW, 4, w);
        }
        assert_eq!(aes.read(regs::AESCMD, 4), READY_PATTERN);
        let mut out = [0u32; 4];
        for w in out.iter_mut() {
            *w = aes.read(regs::AESDW, 4);
        }
        out
    }

    fn load_iv(aes: &mut AesAccelerator, iv: [u32; 4]) {
        for w in iv {
            aes.write(regs::AESIVW, 4, w);
        }
        assert_eq!(aes.read(regs::AESCMD, 4), READY_PATTERN);
    }

    #[test]
    fn test_ecb_encrypt_known_vector() {
        let mut aes = AesAccelerator::new();
        begin_session(&mut aes, 0);

        assert_eq!(run_block(&mut aes, PLAIN_WORDS), CIPHER_WORDS);
    }

    #[test]
    fn test_ecb_decrypt_inverts() {
        let mut aes = AesAccelerator::new();
        begin_session(&mut aes, cmd::DECRYPT);

        assert_eq!(run_block(&mut aes, CIPHER_WORDS), PLAIN_WORDS);
    }

    #[test]
    fn test_cbc_round_trip_chains_across_blocks() {
        let iv = [0x0102_0304, 0x0506_0708, 0x090A_0B0C, 0x0D0E_0F10];
        let plain2 = [0xDEAD_BEEF, 0xCAFE_F00D, 0x0123_4567, 0x89AB_CDEF];

        let mut aes = AesAccelerator::new();
        begin_session(&mut aes, cmd::MODE_CBC << cmd::MODE_SHIFT);
        load_iv(&mut aes, iv);
        let ct1 = run_block(&mut aes, PLAIN_WORDS);
        let ct2 = run_block(&mut aes, plain2);
        // Chaining makes equal-plaintext analysis fail and blocks distinct
        assert_ne!(ct1, CIPHER_WORDS);
        assert_ne!(ct1, ct2);

        begin_session(&mut aes, cmd::MODE_CBC << cmd::MODE_SHIFT | cmd::DECRYPT);
        load_iv(&mut aes, iv);
        assert_eq!(run_block(&mut aes, ct1), PLAIN_WORDS);
        assert_eq!(run_block(&mut aes, ct2), plain2);
    }

    #[test]
    fn test_cbc_zero_iv_first_block_matches_ecb() {
        let mut aes = AesAccelerator::new();
        begin_session(&mut aes, cmd::MODE_CBC << cmd::MODE_SHIFT);
        // Session reset zeroed the IV; XOR with zero is identity
        assert_eq!(run_block(&mut aes, PLAIN_WORDS), CIPHER_WORDS);
    }

    #[test]
    fn test_command_accumulates_with_or() {
        let mut aes = AesAccelerator::new();
        aes.write(regs::AESMOD, 4, 0);
        aes.write(regs::AESCMD, 4, cmd::DECRYPT);
        aes.write(regs::AESCMD, 4, cmd::MODE_CBC << cmd::MODE_SHIFT);
        assert_eq!(aes.aescmd, 0x11);
    }

    #[test]
    fn test_mode_write_resets_session() {
        let mut aes = AesAccelerator::new();
        begin_session(&mut aes, cmd::MODE_CBC << cmd::MODE_SHIFT | cmd::DECRYPT);
        load_iv(&mut aes, [1, 2, 3, 4]);

        // Fresh session: command and IV both cleared, ECB encrypt again
        begin_session(&mut aes, 0);
        assert_eq!(run_block(&mut aes, PLAIN_WORDS), CIPHER_WORDS);
    }

    #[test]
    fn test_command_read_rewinds_fill_index() {
        let mut aes = AesAccelerator::new();
        aes.write(regs::AESMOD, 4, 0);
        // Partial key load abandoned mid-group
        aes.write(regs::AESKW0, 4, 0xFFFF_FFFF);
        aes.write(regs::AESKW0, 4, 0xFFFF_FFFF);
        assert_eq!(aes.read(regs::AESCMD, 4), READY_PATTERN);
        // Full reload starts back at word 0
        for w in KEY_WORDS {
            aes.write(regs::AESKW0, 4, w);
        }
        assert_eq!(run_block(&mut aes, PLAIN_WORDS), CIPHER_WORDS);
    }

    #[test]
    fn test_fill_index_stays_bounded_through_streaming() {
        let iv = [0x0102_0304, 0x0506_0708, 0x090A_0B0C, 0x0D0E_0F10];
        let mut aes = AesAccelerator::new();

        aes.write(regs::AESMOD, 4, 0);
        aes.write(regs::AESCMD, 4, cmd::MODE_CBC << cmd::MODE_SHIFT);
        for w in KEY_WORDS {
            aes.write(regs::AESKW0, 4, w);
            assert!(aes.windex < 4);
        }
        assert_eq!(aes.read(regs::AESCMD, 4), READY_PATTERN);
        for w in iv {
            aes.write(regs::AESIVW, 4, w);
            assert!(aes.windex < 4);
        }
        assert_eq!(aes.read(regs::AESCMD, 4), READY_PATTERN);

        let mut ciphertext = Vec::new();
        for _ in 0..3 {
            for w in PLAIN_WORDS {
                aes.write(regs::AESDW, 4, w);
                assert!(aes.windex < 4);
            }
            assert_eq!(aes.read(regs::AESCMD, 4), READY_PATTERN);
            let mut block = [0u32; 4];
            for w in block.iter_mut() {
                *w = aes.read(regs::AESDW, 4);
                assert!(aes.windex < 4);
            }
            ciphertext.push(block);
        }

        begin_session(&mut aes, cmd::MODE_CBC << cmd::MODE_SHIFT | cmd::DECRYPT);
        load_iv(&mut aes, iv);
        for block in ciphertext {
            assert_eq!(run_block(&mut aes, block), PLAIN_WORDS);
        }
    }

    #[test]
    fn test_partial_block_never_triggers() {
        let mut aes = AesAccelerator::new();
        begin_session(&mut aes, 0);

        aes.write(regs::AESDW, 4, PLAIN_WORDS[0]);
        aes.write(regs::AESDW, 4, PLAIN_WORDS[1]);
        aes.write(regs::AESDW, 4, PLAIN_WORDS[2]);
        assert_eq!(aes.output, [0; BLOCK_LENGTH]);
    }

    #[test]
    fn test_unknown_mode_drops_block() {
        let mut aes = AesAccelerator::new();
        begin_session(&mut aes, 2 << cmd::MODE_SHIFT);

        run_block(&mut aes, PLAIN_WORDS);
        assert_eq!(aes.output, [0; BLOCK_LENGTH]);
    }
}
