#![allow(dead_code)]

// filename according to https://doc.rust-lang.org/book/ch11-03-test-organization.html
use revolution_flash::address::{CAPACITY, PAGE_SIZE};
use revolution_flash::device::Opcode;
use revolution_flash::platform::Transport;
use revolution_flash::{Config, Storage};

pub const DEVICE_ID_AT45DQ321: [u8; 5] = [0x1F, 0x27, 0x01, 0x01, 0x00];
pub const CONFIGURATION_REGISTER: u8 = 0x00;

const CHIP_ERASE: [u8; 4] = [0xC7, 0x94, 0x80, 0x9A];
const BINARY_PAGE_SIZE: [u8; 4] = [0x3D, 0x2A, 0x80, 0xA6];
const DISABLE_SECTOR_PROTECT: [u8; 4] = [0x3D, 0x2A, 0x7F, 0x9A];

const ADDRESS_BYTES: usize = 3;
const PAGE_READ_HEADER: usize = 1 + ADDRESS_BYTES + 4;
const CONTINUOUS_READ_HEADER: usize = 1 + ADDRESS_BYTES + 2;
const PROGRAM_HEADER: usize = 1 + ADDRESS_BYTES;

#[derive(Debug, PartialEq, Clone)]
pub enum Operation {
    Read {
        opcode: Opcode,
        page: u16,
        byte: u16,
        len: usize,
    },
    Program {
        opcode: Opcode,
        page: u16,
        byte: u16,
        len: usize,
    },
    ErasePage {
        page: u16,
    },
    EraseChip,
    StatusRead,
    ConfigurationRead,
    DeviceIdRead,
    DisableSectorProtect,
    BinaryPageSize,
}

#[derive(Debug)]
pub struct TransportFault;

/// Simulates an AT45DQ321 at the byte transfer level. The two SRAM buffers keep their content
/// between commands and a program replaces the whole page with the whole buffer, like the
/// built-in erase program op-codes of the real chip.
pub struct Chip {
    pub mem: Vec<u8>,
    pub operations: Vec<Operation>,
    /// Transfers (select, deselect and byte transfers) before every further one fails
    pub fail_after_transfer: usize,
    pub transfers: usize,
    /// Status reads reporting busy after each erase or program
    pub busy_polls: usize,
    /// Reports busy on every status read
    pub stuck: bool,
    /// Flags the next erase or program as failed
    pub program_error: bool,
    pub binary_page_size: bool,
    pub sector_protection: bool,
    pub device_id: [u8; 5],
    pub selected: bool,
    /// Power-up content is undefined, zero makes stale buffer bytes visible on erased pages
    pub buffers: [[u8; PAGE_SIZE]; 2],
    cmd: Vec<u8>,
    busy_remaining: usize,
    epe: bool,
}

impl Chip {
    pub fn new() -> Self {
        Self {
            mem: vec![0xFFu8; CAPACITY],
            operations: Vec::new(),
            fail_after_transfer: usize::MAX,
            transfers: 0,
            busy_polls: 0,
            stuck: false,
            program_error: false,
            binary_page_size: true,
            sector_protection: false,
            device_id: DEVICE_ID_AT45DQ321,
            selected: false,
            buffers: [[0u8; PAGE_SIZE]; 2],
            cmd: Vec::new(),
            busy_remaining: 0,
            epe: false,
        }
    }

    /// Fresh from the factory: 528 byte pages and sector protection enabled.
    pub fn factory_new() -> Self {
        Self {
            binary_page_size: false,
            sector_protection: true,
            ..Self::new()
        }
    }

    pub fn disable_faults(&mut self) {
        self.fail_after_transfer = usize::MAX;
    }

    pub fn page(&self, page: u16) -> &[u8] {
        let start = page as usize * PAGE_SIZE;
        &self.mem[start..start + PAGE_SIZE]
    }

    pub fn at(&self, page: u16, byte: u16) -> u8 {
        self.mem[page as usize * PAGE_SIZE + byte as usize]
    }

    /// All operations except status polling.
    pub fn commands(&self) -> Vec<Operation> {
        self.operations
            .iter()
            .filter(|op| **op != Operation::StatusRead)
            .cloned()
            .collect()
    }

    pub fn status_reads(&self) -> usize {
        self.operations
            .iter()
            .filter(|op| **op == Operation::StatusRead)
            .count()
    }

    pub fn erases(&self) -> usize {
        self.operations
            .iter()
            .filter(|op| matches!(op, Operation::ErasePage { .. } | Operation::EraseChip))
            .count()
    }

    pub fn dump_operations(&self) {
        println!("Operations:");
        for op in &self.operations {
            println!("  {:?}", op);
        }
    }

    fn is_ready(&self) -> bool {
        !self.stuck && self.busy_remaining == 0
    }

    fn status(&self) -> [u8; 2] {
        let ready = if self.is_ready() { 0x80 } else { 0x00 };
        let mut high = ready | 0b1101 << 2;
        if self.sector_protection {
            high |= 0x02;
        }
        if self.binary_page_size {
            high |= 0x01;
        }
        let low = ready | if self.epe { 0x20 } else { 0x00 };
        [high, low]
    }

    fn address(&self) -> (u16, u16) {
        let linear = u32::from_be_bytes([0, self.cmd[1], self.cmd[2], self.cmd[3]]) as usize
            % CAPACITY;
        ((linear / PAGE_SIZE) as u16, (linear % PAGE_SIZE) as u16)
    }

    fn respond(&self, index: usize) -> u8 {
        let Some(opcode) = Opcode::from_repr(self.cmd[0]) else {
            return 0xFF;
        };
        match opcode {
            Opcode::StatusRegisterRead if index >= 1 => self.status()[(index - 1) % 2],
            Opcode::DeviceId if (1..=5).contains(&index) => self.device_id[index - 1],
            Opcode::ConfigurationRegisterRead if index == 1 => CONFIGURATION_REGISTER,
            Opcode::MainMemoryPageRead if index >= PAGE_READ_HEADER => {
                let (page, byte) = self.address();
                let n = index - PAGE_READ_HEADER;
                self.at(page, ((byte as usize + n) % PAGE_SIZE) as u16)
            }
            Opcode::ContinuousArrayRead if index >= CONTINUOUS_READ_HEADER => {
                let (page, byte) = self.address();
                let n = index - CONTINUOUS_READ_HEADER;
                self.mem[(page as usize * PAGE_SIZE + byte as usize + n) % CAPACITY]
            }
            _ => 0xFF,
        }
    }

    fn start_operation(&mut self) {
        self.busy_remaining = self.busy_polls;
        self.epe = self.program_error;
    }

    fn execute(&mut self) {
        if self.cmd.is_empty() {
            return;
        }
        let Some(opcode) = Opcode::from_repr(self.cmd[0]) else {
            panic!("unknown opcode {:#04x}", self.cmd[0]);
        };
        if opcode != Opcode::StatusRegisterRead {
            assert!(
                self.busy_remaining == 0,
                "{opcode} issued while the chip is busy"
            );
        }

        match opcode {
            Opcode::StatusRegisterRead => {
                self.operations.push(Operation::StatusRead);
                if self.busy_remaining > 0 {
                    self.busy_remaining -= 1;
                }
            }
            Opcode::DeviceId => self.operations.push(Operation::DeviceIdRead),
            Opcode::ConfigurationRegisterRead => self.operations.push(Operation::ConfigurationRead),
            Opcode::MainMemoryPageRead | Opcode::ContinuousArrayRead => {
                let header = if opcode == Opcode::MainMemoryPageRead {
                    PAGE_READ_HEADER
                } else {
                    CONTINUOUS_READ_HEADER
                };
                let (page, byte) = self.address();
                self.operations.push(Operation::Read {
                    opcode,
                    page,
                    byte,
                    len: self.cmd.len().saturating_sub(header),
                });
            }
            Opcode::ProgramThroughBuffer1 | Opcode::ProgramThroughBuffer2 => {
                let (page, byte) = self.address();
                let buffer = if opcode == Opcode::ProgramThroughBuffer1 {
                    &mut self.buffers[0]
                } else {
                    &mut self.buffers[1]
                };
                let data = &self.cmd[PROGRAM_HEADER..];
                for (n, &value) in data.iter().enumerate() {
                    buffer[(byte as usize + n) % PAGE_SIZE] = value;
                }
                let len = data.len();
                let start = page as usize * PAGE_SIZE;
                self.mem[start..start + PAGE_SIZE].copy_from_slice(&buffer[..]);
                self.operations.push(Operation::Program {
                    opcode,
                    page,
                    byte,
                    len,
                });
                self.start_operation();
            }
            Opcode::PageErase => {
                let (page, _) = self.address();
                let start = page as usize * PAGE_SIZE;
                self.mem[start..start + PAGE_SIZE].fill(0xFF);
                self.operations.push(Operation::ErasePage { page });
                self.start_operation();
            }
            Opcode::ChipErase => {
                assert_eq!(self.cmd, CHIP_ERASE);
                self.mem.fill(0xFF);
                self.operations.push(Operation::EraseChip);
                self.start_operation();
            }
            Opcode::Configure => {
                if self.cmd == BINARY_PAGE_SIZE {
                    self.binary_page_size = true;
                    self.operations.push(Operation::BinaryPageSize);
                    self.start_operation();
                } else if self.cmd == DISABLE_SECTOR_PROTECT {
                    self.sector_protection = false;
                    self.operations.push(Operation::DisableSectorProtect);
                } else {
                    panic!("unknown configuration sequence {:x?}", self.cmd);
                }
            }
        }
    }

    fn count_transfer(&mut self) -> Result<(), TransportFault> {
        if self.transfers >= self.fail_after_transfer {
            println!("    chip: FAULT");
            return Err(TransportFault);
        }
        self.transfers += 1;
        Ok(())
    }
}

impl Transport for Chip {
    type Error = TransportFault;

    fn select(&mut self) -> Result<(), Self::Error> {
        self.count_transfer()?;
        assert!(!self.selected, "chip-select asserted twice");
        self.selected = true;
        self.cmd.clear();
        Ok(())
    }

    fn deselect(&mut self) -> Result<(), Self::Error> {
        // releasing chip-select always ends the command, even if the transport reports an error
        let result = self.count_transfer();
        assert!(self.selected, "chip-select released while not asserted");
        self.selected = false;
        if result.is_ok() {
            self.execute();
        }
        self.cmd.clear();
        result
    }

    fn transfer(&mut self, byte: u8) -> Result<u8, Self::Error> {
        self.count_transfer()?;
        assert!(self.selected, "transfer without chip-select");
        self.cmd.push(byte);
        Ok(self.respond(self.cmd.len() - 1))
    }
}

pub fn storage(chip: &mut Chip) -> Storage<&mut Chip> {
    Storage::new(chip, Config::default()).unwrap()
}

/// Pseudo random column content without any period, different for every seed.
pub fn pattern(seed: u8) -> [u8; revolution_flash::layout::COLUMN_SIZE] {
    let mut data = [0u8; revolution_flash::layout::COLUMN_SIZE];
    // xorshift32, the seed is spread so that no state is zero
    let mut state = (0x9E37_79B9u32 ^ (seed as u32).wrapping_mul(0x0101_0101)) | 1;
    for byte in data.iter_mut() {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        *byte = (state >> 24) as u8;
    }
    data
}
