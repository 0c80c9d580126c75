//! # Decoded Instructions
//!
//! The instruction alphabet consumed by the decompiler core. Instructions are
//! produced by a [`Decoder`](super::decoder::Decoder) and never mutated afterwards.

use std::fmt;

/// Binary operators shared by arithmetic instructions, compare-jumps and the AST
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOperator {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Mod,
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `&`
    And,
    /// `|`
    Or,
    /// `^`
    Xor,
}

impl BinaryOperator {
    /// C token for this operator
    pub fn token(self) -> &'static str {
        match self {
            BinaryOperator::Add => "+",
            BinaryOperator::Sub => "-",
            BinaryOperator::Mul => "*",
            BinaryOperator::Div => "/",
            BinaryOperator::Mod => "%",
            BinaryOperator::Eq => "==",
            BinaryOperator::Ne => "!=",
            BinaryOperator::Gt => ">",
            BinaryOperator::Ge => ">=",
            BinaryOperator::Lt => "<",
            BinaryOperator::Le => "<=",
            BinaryOperator::And => "&",
            BinaryOperator::Or => "|",
            BinaryOperator::Xor => "^",
        }
    }

    /// Whether the operator yields a boolean
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOperator::Eq
                | BinaryOperator::Ne
                | BinaryOperator::Gt
                | BinaryOperator::Ge
                | BinaryOperator::Lt
                | BinaryOperator::Le
        )
    }

    /// Logical negation of a comparison (`a < b` becomes `a >= b`)
    pub fn negate(self) -> Option<BinaryOperator> {
        Some(match self {
            BinaryOperator::Eq => BinaryOperator::Ne,
            BinaryOperator::Ne => BinaryOperator::Eq,
            BinaryOperator::Gt => BinaryOperator::Le,
            BinaryOperator::Ge => BinaryOperator::Lt,
            BinaryOperator::Lt => BinaryOperator::Ge,
            BinaryOperator::Le => BinaryOperator::Gt,
            _ => return None,
        })
    }
}

impl fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOperator {
    /// Logical not
    Not,
    /// Arithmetic negation
    Neg,
    /// Integer to float conversion
    IntToFloat,
    /// Float to integer conversion
    FloatToInt,
}

/// Whether an arithmetic instruction works on integers or floats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NumericKind {
    /// 32-bit integer
    Int,
    /// 32-bit float
    Float,
}

/// What an instruction does, independent of its operands
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InstructionKind {
    /// No operation
    Nop,
    /// Push a constant
    PushImmediate,
    /// Pop two, push the result. An `Int` operand replaces the right-hand pop.
    BinaryOp(BinaryOperator, NumericKind),
    /// Pop one, push the result
    UnaryOp(UnaryOperator),
    /// Duplicate the top of stack
    Dup,
    /// Discard the top of stack
    Drop,
    /// Push a frame slot
    LoadLocal,
    /// Pop into a frame slot
    StoreLocal,
    /// Push a script static
    LoadStatic,
    /// Pop into a script static
    StoreStatic,
    /// Push a global
    LoadGlobal,
    /// Pop into a global
    StoreGlobal,
    /// Unconditional branch
    Jump,
    /// Pop a condition, branch when it is zero
    JumpIfFalse,
    /// Pop two, branch when the comparison is false
    CompareJump(BinaryOperator),
    /// Pop a scrutinee, branch to the matching case
    Switch,
    /// Call a function in this script
    Call,
    /// Call an engine-provided native
    Native,
    /// Function prologue
    Enter,
    /// Function epilogue
    Return,
    /// Decoded but not modeled by the interpreter
    Unknown {
        /// Raw opcode byte
        opcode: u8,
        /// Mnemonic from the opcode table
        mnemonic: &'static str,
    },
}

impl InstructionKind {
    /// Whether this kind ends a basic block
    pub fn is_control_transfer(&self) -> bool {
        matches!(
            self,
            InstructionKind::Jump
                | InstructionKind::JumpIfFalse
                | InstructionKind::CompareJump(_)
                | InstructionKind::Switch
                | InstructionKind::Return
        )
    }

    /// Whether execution can continue at the next instruction
    pub fn falls_through(&self) -> bool {
        !matches!(self, InstructionKind::Jump | InstructionKind::Return)
    }

    /// Short name used in diagnostics
    pub fn name(&self) -> String {
        match self {
            InstructionKind::BinaryOp(op, _) => format!("BinaryOp({})", op),
            InstructionKind::CompareJump(op) => format!("CompareJump({})", op),
            InstructionKind::Unknown { mnemonic, .. } => mnemonic.to_string(),
            other => format!("{:?}", other),
        }
    }
}

/// One arm of a switch table
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchCase {
    /// Value compared against the scrutinee
    pub value: i32,
    /// Absolute branch target
    pub target: u32,
}

/// Operand payload attached to an instruction
#[derive(Debug, Clone, PartialEq)]
pub enum Operands {
    /// No operands
    None,
    /// Integer constant
    Int(i32),
    /// Several integer constants pushed in order
    Ints(Vec<i32>),
    /// Float constant
    Float(f32),
    /// Frame slot index
    Local(u16),
    /// Static slot index
    Static(u16),
    /// Global index
    Global(u32),
    /// Absolute branch target
    Branch(u32),
    /// Switch table
    Switch(Vec<SwitchCase>),
    /// Absolute address of a callee
    Call(u32),
    /// Native call
    Native {
        /// Number of arguments popped
        arg_count: u8,
        /// Number of results pushed
        return_count: u8,
        /// Native hash
        hash: u64,
        /// Resolved name, when a native database is loaded
        name: Option<String>,
    },
    /// Function prologue
    Enter {
        /// Number of input slots
        arg_count: u8,
        /// Total frame size in slots
        frame_size: u16,
        /// Embedded function name, if any
        name: Option<String>,
    },
    /// Function epilogue
    Return {
        /// Number of argument slots released
        arg_count: u8,
        /// Number of values returned
        return_count: u8,
    },
}

/// A decoded instruction
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// Address of the first byte of the instruction
    pub address: u32,
    /// What the instruction does
    pub kind: InstructionKind,
    /// Operand payload
    pub operands: Operands,
}

impl Instruction {
    /// Create an instruction from its parts
    pub fn new(address: u32, kind: InstructionKind, operands: Operands) -> Self {
        Self {
            address,
            kind,
            operands,
        }
    }

    /// `PushImmediate` of an integer
    pub fn push_int(address: u32, value: i32) -> Self {
        Self::new(address, InstructionKind::PushImmediate, Operands::Int(value))
    }

    /// `PushImmediate` of a float
    pub fn push_float(address: u32, value: f32) -> Self {
        Self::new(address, InstructionKind::PushImmediate, Operands::Float(value))
    }

    /// Integer `BinaryOp`
    pub fn binary(address: u32, op: BinaryOperator) -> Self {
        Self::new(
            address,
            InstructionKind::BinaryOp(op, NumericKind::Int),
            Operands::None,
        )
    }

    /// `LoadLocal` of a frame slot
    pub fn load_local(address: u32, slot: u16) -> Self {
        Self::new(address, InstructionKind::LoadLocal, Operands::Local(slot))
    }

    /// `StoreLocal` into a frame slot
    pub fn store_local(address: u32, slot: u16) -> Self {
        Self::new(address, InstructionKind::StoreLocal, Operands::Local(slot))
    }

    /// Unconditional jump
    pub fn jump(address: u32, target: u32) -> Self {
        Self::new(address, InstructionKind::Jump, Operands::Branch(target))
    }

    /// Branch when the popped condition is zero
    pub fn jump_if_false(address: u32, target: u32) -> Self {
        Self::new(address, InstructionKind::JumpIfFalse, Operands::Branch(target))
    }

    /// `Return` with no arguments released
    pub fn ret(address: u32, return_count: u8) -> Self {
        Self::new(
            address,
            InstructionKind::Return,
            Operands::Return {
                arg_count: 0,
                return_count,
            },
        )
    }

    /// Function prologue
    pub fn enter(address: u32, arg_count: u8, frame_size: u16) -> Self {
        Self::new(
            address,
            InstructionKind::Enter,
            Operands::Enter {
                arg_count,
                frame_size,
                name: None,
            },
        )
    }

    /// Absolute branch targets of this instruction
    pub fn branch_targets(&self) -> Vec<u32> {
        match (&self.kind, &self.operands) {
            (
                InstructionKind::Jump
                | InstructionKind::JumpIfFalse
                | InstructionKind::CompareJump(_),
                Operands::Branch(target),
            ) => vec![*target],
            (InstructionKind::Switch, Operands::Switch(cases)) => {
                cases.iter().map(|case| case.target).collect()
            }
            _ => Vec::new(),
        }
    }

    /// Whether this instruction ends a basic block
    pub fn is_control_transfer(&self) -> bool {
        self.kind.is_control_transfer()
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:06x}: {}", self.address, self.kind.name())?;
        match &self.operands {
            Operands::None => Ok(()),
            Operands::Int(v) => write!(f, " {}", v),
            Operands::Ints(vs) => {
                for v in vs {
                    write!(f, " {}", v)?;
                }
                Ok(())
            }
            Operands::Float(v) => write!(f, " {}", v),
            Operands::Local(slot) | Operands::Static(slot) => write!(f, " {}", slot),
            Operands::Global(idx) => write!(f, " {}", idx),
            Operands::Branch(target) | Operands::Call(target) => write!(f, " 0x{:06x}", target),
            Operands::Switch(cases) => write!(f, " [{} cases]", cases.len()),
            Operands::Native { hash, name, .. } => match name {
                Some(name) => write!(f, " {}", name),
                None => write!(f, " 0x{:016x}", hash),
            },
            Operands::Enter {
                arg_count,
                frame_size,
                ..
            } => write!(f, " {} {}", arg_count, frame_size),
            Operands::Return {
                arg_count,
                return_count,
            } => write!(f, " {} {}", arg_count, return_count),
        }
    }
}
