//! # Instruction Stream
//!
//! Cursor over a function's decoded instructions. As the cursor moves past an
//! instruction, the operand stack live at that point is recorded against it,
//! so later passes can resume with the right stack context at any boundary.

use super::instruction::Instruction;
use super::stack::StackRef;
use crate::{Error, Result};

/// A consumed instruction paired with the stack live after it executed
#[derive(Debug, Clone)]
pub struct InstructionState {
    /// The instruction
    pub instruction: Instruction,
    /// Stack snapshot taken when the cursor moved past this instruction
    pub stack: Option<StackRef>,
}

/// Position-tracked access over address-ordered instructions
#[derive(Debug, Clone, Default)]
pub struct InstructionStream {
    code: Vec<InstructionState>,
    idx: usize,
    floor: usize,
}

impl InstructionStream {
    /// Wrap an address-ordered instruction list
    pub fn new(instructions: Vec<Instruction>) -> Self {
        Self {
            code: instructions
                .into_iter()
                .map(|instruction| InstructionState {
                    instruction,
                    stack: None,
                })
                .collect(),
            idx: 0,
            floor: 0,
        }
    }

    /// Append an instruction at the end
    pub fn append(&mut self, instruction: Instruction) {
        self.code.push(InstructionState {
            instruction,
            stack: None,
        });
    }

    /// Return the instruction under the cursor and advance
    ///
    /// `current` is recorded as the exit snapshot of the previously consumed
    /// instruction before the cursor moves.
    pub fn next(&mut self, current: StackRef) -> Result<Instruction> {
        let instruction = self.peek()?.clone();
        self.record_exit(current);
        self.idx += 1;
        Ok(instruction)
    }

    /// The instruction under the cursor, without advancing
    pub fn peek(&self) -> Result<&Instruction> {
        self.code
            .get(self.idx)
            .map(|state| &state.instruction)
            .ok_or(Error::EndOfStream { position: self.idx })
    }

    /// Record `stack` as the exit snapshot of the last consumed instruction
    ///
    /// Nothing is recorded right after a `seek`, since no instruction has been
    /// consumed from the new position yet.
    pub fn record_exit(&mut self, stack: StackRef) {
        if self.idx > self.floor {
            self.code[self.idx - 1].stack = Some(stack);
        }
    }

    /// Rewind to the first instruction. Recorded snapshots are kept.
    pub fn reset(&mut self) {
        self.idx = 0;
        self.floor = 0;
    }

    /// Move the cursor to `index`
    pub fn seek(&mut self, index: usize) -> Result<()> {
        if index > self.code.len() {
            return Err(Error::EndOfStream { position: index });
        }
        self.idx = index;
        self.floor = index;
        Ok(())
    }

    /// Current cursor position
    pub fn position(&self) -> usize {
        self.idx
    }

    /// Whether the cursor is past the last instruction
    pub fn is_eof(&self) -> bool {
        self.idx >= self.code.len()
    }

    /// Number of instructions
    pub fn len(&self) -> usize {
        self.code.len()
    }

    /// Whether the stream holds no instructions
    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Instruction at `index`
    pub fn get(&self, index: usize) -> Option<&Instruction> {
        self.code.get(index).map(|state| &state.instruction)
    }

    /// Full state at `index`
    pub fn state(&self, index: usize) -> Option<&InstructionState> {
        self.code.get(index)
    }

    /// Exit snapshot recorded for the instruction at `index`
    pub fn snapshot(&self, index: usize) -> Option<StackRef> {
        self.code.get(index).and_then(|state| state.stack)
    }

    /// Position of the instruction starting at `address`
    pub fn index_of(&self, address: u32) -> Option<usize> {
        self.code
            .binary_search_by_key(&address, |state| state.instruction.address)
            .ok()
    }

    /// Iterate all instructions in address order
    pub fn instructions(&self) -> impl Iterator<Item = &Instruction> {
        self.code.iter().map(|state| &state.instruction)
    }
}
