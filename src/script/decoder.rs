//! # Bytecode Decoder
//!
//! Turns the script region of a container into decoded [`Instruction`]s.
//! Every opcode has a known operand layout, so instructions the interpreter
//! does not model still decode cleanly and keep later addresses in sync.

use super::instruction::{
    BinaryOperator, Instruction, InstructionKind, NumericKind, Operands, SwitchCase,
    UnaryOperator,
};
use super::natives::NativeDb;
use crate::resource::Arch;
use crate::{Error, Result};

/// Operand encoding following an opcode byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
    None,
    U8,
    U8x2,
    U8x3,
    U16,
    S16,
    U24,
    U32,
    F32,
    Branch,
    Native,
    Enter,
    Leave,
    Switch,
}

use Layout as L;

/// Mnemonic and operand layout, indexed by opcode
const OPCODES: [(&str, Layout); 127] = [
    ("NOP", L::None),
    ("IADD", L::None),
    ("ISUB", L::None),
    ("IMUL", L::None),
    ("IDIV", L::None),
    ("IMOD", L::None),
    ("INOT", L::None),
    ("INEG", L::None),
    ("IEQ", L::None),
    ("INE", L::None),
    ("IGT", L::None),
    ("IGE", L::None),
    ("ILT", L::None),
    ("ILE", L::None),
    ("FADD", L::None),
    ("FSUB", L::None),
    ("FMUL", L::None),
    ("FDIV", L::None),
    ("FMOD", L::None),
    ("FNEG", L::None),
    ("FEQ", L::None),
    ("FNE", L::None),
    ("FGT", L::None),
    ("FGE", L::None),
    ("FLT", L::None),
    ("FLE", L::None),
    ("VADD", L::None),
    ("VSUB", L::None),
    ("VMUL", L::None),
    ("VDIV", L::None),
    ("VNEG", L::None),
    ("IAND", L::None),
    ("IOR", L::None),
    ("IXOR", L::None),
    ("I2F", L::None),
    ("F2I", L::None),
    ("F2V", L::None),
    ("PUSH_CONST_U8", L::U8),
    ("PUSH_CONST_U8_U8", L::U8x2),
    ("PUSH_CONST_U8_U8_U8", L::U8x3),
    ("PUSH_CONST_U32", L::U32),
    ("PUSH_CONST_F", L::F32),
    ("DUP", L::None),
    ("DROP", L::None),
    ("NATIVE", L::Native),
    ("ENTER", L::Enter),
    ("LEAVE", L::Leave),
    ("LOAD", L::None),
    ("STORE", L::None),
    ("STORE_REV", L::None),
    ("LOAD_N", L::None),
    ("STORE_N", L::None),
    ("ARRAY_U8", L::U8),
    ("ARRAY_U8_LOAD", L::U8),
    ("ARRAY_U8_STORE", L::U8),
    ("LOCAL_U8", L::U8),
    ("LOCAL_U8_LOAD", L::U8),
    ("LOCAL_U8_STORE", L::U8),
    ("STATIC_U8", L::U8),
    ("STATIC_U8_LOAD", L::U8),
    ("STATIC_U8_STORE", L::U8),
    ("IADD_U8", L::U8),
    ("IMUL_U8", L::U8),
    ("IOFFSET", L::None),
    ("IOFFSET_U8", L::U8),
    ("IOFFSET_U8_LOAD", L::U8),
    ("IOFFSET_U8_STORE", L::U8),
    ("PUSH_CONST_S16", L::S16),
    ("IADD_S16", L::S16),
    ("IMUL_S16", L::S16),
    ("IOFFSET_S16", L::S16),
    ("IOFFSET_S16_LOAD", L::S16),
    ("IOFFSET_S16_STORE", L::S16),
    ("ARRAY_U16", L::U16),
    ("ARRAY_U16_LOAD", L::U16),
    ("ARRAY_U16_STORE", L::U16),
    ("LOCAL_U16", L::U16),
    ("LOCAL_U16_LOAD", L::U16),
    ("LOCAL_U16_STORE", L::U16),
    ("STATIC_U16", L::U16),
    ("STATIC_U16_LOAD", L::U16),
    ("STATIC_U16_STORE", L::U16),
    ("GLOBAL_U16", L::U16),
    ("GLOBAL_U16_LOAD", L::U16),
    ("GLOBAL_U16_STORE", L::U16),
    ("J", L::Branch),
    ("JZ", L::Branch),
    ("IEQ_JZ", L::Branch),
    ("INE_JZ", L::Branch),
    ("IGT_JZ", L::Branch),
    ("IGE_JZ", L::Branch),
    ("ILT_JZ", L::Branch),
    ("ILE_JZ", L::Branch),
    ("CALL", L::U24),
    ("GLOBAL_U24", L::U24),
    ("GLOBAL_U24_LOAD", L::U24),
    ("GLOBAL_U24_STORE", L::U24),
    ("PUSH_CONST_U24", L::U24),
    ("SWITCH", L::Switch),
    ("STRING", L::None),
    ("STRINGHASH", L::None),
    ("TEXT_LABEL_ASSIGN_STRING", L::U8),
    ("TEXT_LABEL_ASSIGN_INT", L::U8),
    ("TEXT_LABEL_APPEND_STRING", L::U8),
    ("TEXT_LABEL_APPEND_INT", L::U8),
    ("TEXT_LABEL_COPY", L::None),
    ("CATCH", L::None),
    ("THROW", L::None),
    ("CALLINDIRECT", L::None),
    ("PUSH_CONST_M1", L::None),
    ("PUSH_CONST_0", L::None),
    ("PUSH_CONST_1", L::None),
    ("PUSH_CONST_2", L::None),
    ("PUSH_CONST_3", L::None),
    ("PUSH_CONST_4", L::None),
    ("PUSH_CONST_5", L::None),
    ("PUSH_CONST_6", L::None),
    ("PUSH_CONST_7", L::None),
    ("PUSH_CONST_FM1", L::None),
    ("PUSH_CONST_F0", L::None),
    ("PUSH_CONST_F1", L::None),
    ("PUSH_CONST_F2", L::None),
    ("PUSH_CONST_F3", L::None),
    ("PUSH_CONST_F4", L::None),
    ("PUSH_CONST_F5", L::None),
    ("PUSH_CONST_F6", L::None),
    ("PUSH_CONST_F7", L::None),
];

/// Raw operand values read for one instruction
#[derive(Debug, Clone, PartialEq)]
enum Raw {
    None,
    Ints(Vec<i32>),
    Float(f32),
    Branch(u32),
    Native { packed: u8, index: u16 },
    Enter { args: u8, frame: u16, name: Option<String> },
    Leave { args: u8, returns: u8 },
    Switch(Vec<SwitchCase>),
}

/// Byte-order aware cursor over the script region
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
    arch: Arch,
    base: usize,
}

impl<'a> Reader<'a> {
    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        let end = self.pos + N;
        let slice = self.bytes.get(self.pos..end).ok_or_else(|| {
            Error::decode(
                self.pos.saturating_sub(self.base) as u32,
                format!("truncated operand, needed {} bytes", N),
            )
        })?;
        self.pos = end;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take::<1>()?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take::<2>()?;
        Ok(if self.arch.is_big_endian() {
            u16::from_be_bytes(b)
        } else {
            u16::from_le_bytes(b)
        })
    }

    fn u24(&mut self) -> Result<u32> {
        let b = self.take::<3>()?;
        Ok(if self.arch.is_big_endian() {
            u32::from_be_bytes([0, b[0], b[1], b[2]])
        } else {
            u32::from_le_bytes([b[0], b[1], b[2], 0])
        })
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take::<4>()?;
        Ok(self.arch.read_u32(b))
    }

    fn u64(&mut self) -> Result<u64> {
        let b = self.take::<8>()?;
        Ok(if self.arch.is_big_endian() {
            u64::from_be_bytes(b)
        } else {
            u64::from_le_bytes(b)
        })
    }

    /// Code-relative address of the cursor
    fn address(&self) -> u32 {
        (self.pos - self.base) as u32
    }
}

/// Decodes script bytecode for one architecture
#[derive(Debug, Clone, Copy)]
pub struct Decoder<'a> {
    arch: Arch,
    natives: Option<&'a NativeDb>,
}

impl<'a> Decoder<'a> {
    /// Create a decoder, optionally resolving native names through `natives`
    pub fn new(arch: Arch, natives: Option<&'a NativeDb>) -> Self {
        Self { arch, natives }
    }

    /// Decode a script region, emitting instructions in address order
    ///
    /// The region starts with the code length, the native count and the native
    /// hash table, followed by the code. Returns the number of instructions.
    pub fn decode(&self, region: &[u8], mut emit: impl FnMut(Instruction)) -> Result<usize> {
        let mut reader = Reader {
            bytes: region,
            pos: 0,
            arch: self.arch,
            base: 0,
        };
        let code_length = reader.u32()? as usize;
        let native_count = reader.u32()? as usize;
        let mut hashes = Vec::with_capacity(native_count.min(region.len() / 8));
        for _ in 0..native_count {
            hashes.push(reader.u64()?);
        }

        let base = reader.pos;
        let end = base
            .checked_add(code_length)
            .filter(|&end| end <= region.len())
            .ok_or_else(|| {
                Error::decode(
                    0,
                    format!(
                        "code length {} exceeds region of {} bytes",
                        code_length,
                        region.len()
                    ),
                )
            })?;
        let mut reader = Reader {
            bytes: &region[..end],
            pos: base,
            arch: self.arch,
            base,
        };

        let mut count = 0;
        while reader.pos < end {
            let instruction = self.decode_one(&mut reader, &hashes)?;
            emit(instruction);
            count += 1;
        }

        tracing::debug!(
            "decoded {} instructions ({} natives referenced)",
            count,
            hashes.len()
        );
        Ok(count)
    }

    /// Decode into a vector
    pub fn decode_all(&self, region: &[u8]) -> Result<Vec<Instruction>> {
        let mut code = Vec::new();
        self.decode(region, |instr| code.push(instr))?;
        Ok(code)
    }

    fn decode_one(&self, reader: &mut Reader<'_>, hashes: &[u64]) -> Result<Instruction> {
        let address = reader.address();
        let opcode = reader.u8()?;
        let (mnemonic, layout) = *OPCODES
            .get(opcode as usize)
            .ok_or_else(|| Error::decode(address, format!("unknown opcode {}", opcode)))?;

        let raw = match layout {
            L::None => Raw::None,
            L::U8 => Raw::Ints(vec![reader.u8()? as i32]),
            L::U8x2 => Raw::Ints(vec![reader.u8()? as i32, reader.u8()? as i32]),
            L::U8x3 => Raw::Ints(vec![
                reader.u8()? as i32,
                reader.u8()? as i32,
                reader.u8()? as i32,
            ]),
            L::U16 => Raw::Ints(vec![reader.u16()? as i32]),
            L::S16 => Raw::Ints(vec![reader.u16()? as i16 as i32]),
            L::U24 => Raw::Ints(vec![reader.u24()? as i32]),
            L::U32 => Raw::Ints(vec![reader.u32()? as i32]),
            L::F32 => Raw::Float(f32::from_bits(reader.u32()?)),
            L::Branch => {
                let offset = reader.u16()? as i16 as i64;
                Raw::Branch(relative_target(address, reader.address(), offset)?)
            }
            L::Native => Raw::Native {
                packed: reader.u8()?,
                index: reader.u16()?,
            },
            L::Enter => {
                let args = reader.u8()?;
                let frame = reader.u16()?;
                let len = reader.u8()? as usize;
                let mut name = Vec::with_capacity(len);
                for _ in 0..len {
                    name.push(reader.u8()?);
                }
                let name = String::from_utf8_lossy(&name)
                    .trim_end_matches('\0')
                    .to_string();
                Raw::Enter {
                    args,
                    frame,
                    name: Some(name).filter(|n| !n.is_empty()),
                }
            }
            L::Leave => Raw::Leave {
                args: reader.u8()?,
                returns: reader.u8()?,
            },
            L::Switch => {
                let count = reader.u8()? as usize;
                let mut entries = Vec::with_capacity(count);
                for _ in 0..count {
                    let value = reader.u32()? as i32;
                    let offset = reader.u16()? as i16 as i64;
                    entries.push((value, offset));
                }
                let next = reader.address();
                let cases = entries
                    .into_iter()
                    .map(|(value, offset)| {
                        Ok(SwitchCase {
                            value,
                            target: relative_target(address, next, offset)?,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Raw::Switch(cases)
            }
        };

        let (kind, operands) = self.lift(address, opcode, mnemonic, raw, hashes)?;
        Ok(Instruction::new(address, kind, operands))
    }

    /// Map an opcode and its raw operands onto the instruction alphabet
    fn lift(
        &self,
        address: u32,
        opcode: u8,
        mnemonic: &'static str,
        raw: Raw,
        hashes: &[u64],
    ) -> Result<(InstructionKind, Operands)> {
        use BinaryOperator as B;
        use InstructionKind as K;
        use NumericKind::{Float, Int};

        let mismatch = || Error::decode(address, format!("{} operand layout mismatch", mnemonic));
        let first = match &raw {
            Raw::Ints(values) => values.first().copied().unwrap_or(0),
            _ => 0,
        };

        let lifted = match opcode {
            0 => (K::Nop, Operands::None),
            1..=5 | 8..=13 | 31..=33 => {
                let op = match opcode {
                    1 => B::Add,
                    2 => B::Sub,
                    3 => B::Mul,
                    4 => B::Div,
                    5 => B::Mod,
                    8 => B::Eq,
                    9 => B::Ne,
                    10 => B::Gt,
                    11 => B::Ge,
                    12 => B::Lt,
                    13 => B::Le,
                    31 => B::And,
                    32 => B::Or,
                    _ => B::Xor,
                };
                (K::BinaryOp(op, Int), Operands::None)
            }
            14..=18 | 20..=25 => {
                let op = match opcode {
                    14 => B::Add,
                    15 => B::Sub,
                    16 => B::Mul,
                    17 => B::Div,
                    18 => B::Mod,
                    20 => B::Eq,
                    21 => B::Ne,
                    22 => B::Gt,
                    23 => B::Ge,
                    24 => B::Lt,
                    _ => B::Le,
                };
                (K::BinaryOp(op, Float), Operands::None)
            }
            6 => (K::UnaryOp(UnaryOperator::Not), Operands::None),
            7 | 19 => (K::UnaryOp(UnaryOperator::Neg), Operands::None),
            34 => (K::UnaryOp(UnaryOperator::IntToFloat), Operands::None),
            35 => (K::UnaryOp(UnaryOperator::FloatToInt), Operands::None),
            37 | 40 | 67 | 97 => (K::PushImmediate, Operands::Int(first)),
            38 | 39 => match raw {
                Raw::Ints(values) => (K::PushImmediate, Operands::Ints(values)),
                _ => return Err(mismatch()),
            },
            41 => match raw {
                Raw::Float(value) => (K::PushImmediate, Operands::Float(value)),
                _ => return Err(mismatch()),
            },
            109..=117 => (K::PushImmediate, Operands::Int(opcode as i32 - 110)),
            118..=126 => (K::PushImmediate, Operands::Float(opcode as f32 - 119.0)),
            42 => (K::Dup, Operands::None),
            43 => (K::Drop, Operands::None),
            61 | 68 => (K::BinaryOp(B::Add, Int), Operands::Int(first)),
            62 | 69 => (K::BinaryOp(B::Mul, Int), Operands::Int(first)),
            56 | 77 => (K::LoadLocal, Operands::Local(first as u16)),
            57 | 78 => (K::StoreLocal, Operands::Local(first as u16)),
            59 | 80 => (K::LoadStatic, Operands::Static(first as u16)),
            60 | 81 => (K::StoreStatic, Operands::Static(first as u16)),
            83 | 95 => (K::LoadGlobal, Operands::Global(first as u32)),
            84 | 96 => (K::StoreGlobal, Operands::Global(first as u32)),
            85..=92 => {
                let Raw::Branch(target) = raw else {
                    return Err(mismatch())
                };
                let kind = match opcode {
                    85 => K::Jump,
                    86 => K::JumpIfFalse,
                    87 => K::CompareJump(B::Eq),
                    88 => K::CompareJump(B::Ne),
                    89 => K::CompareJump(B::Gt),
                    90 => K::CompareJump(B::Ge),
                    91 => K::CompareJump(B::Lt),
                    _ => K::CompareJump(B::Le),
                };
                (kind, Operands::Branch(target))
            }
            93 => (K::Call, Operands::Call(first as u32)),
            98 => match raw {
                Raw::Switch(cases) => (K::Switch, Operands::Switch(cases)),
                _ => return Err(mismatch()),
            },
            44 => {
                let Raw::Native { packed, index } = raw else {
                    return Err(mismatch())
                };
                let hash = *hashes.get(index as usize).ok_or_else(|| {
                    Error::decode(
                        address,
                        format!("native index {} outside table of {}", index, hashes.len()),
                    )
                })?;
                let name = self
                    .natives
                    .and_then(|db| db.resolve(hash))
                    .map(str::to_string);
                (
                    K::Native,
                    Operands::Native {
                        arg_count: packed >> 2,
                        return_count: packed & 0x3,
                        hash,
                        name,
                    },
                )
            }
            45 => {
                let Raw::Enter { args, frame, name } = raw else {
                    return Err(mismatch())
                };
                (
                    K::Enter,
                    Operands::Enter {
                        arg_count: args,
                        frame_size: frame,
                        name,
                    },
                )
            }
            46 => {
                let Raw::Leave { args, returns } = raw else {
                    return Err(mismatch())
                };
                (
                    K::Return,
                    Operands::Return {
                        arg_count: args,
                        return_count: returns,
                    },
                )
            }
            _ => (K::Unknown { opcode, mnemonic }, Operands::None),
        };

        Ok(lifted)
    }
}

/// Absolute target of a branch whose offset is relative to `next`
fn relative_target(address: u32, next: u32, offset: i64) -> Result<u32> {
    u32::try_from(next as i64 + offset)
        .map_err(|_| Error::decode(address, format!("branch offset {} underflows", offset)))
}
