//! # Decompiler Machine
//!
//! Drives decompilation: splits the script into functions, discovers each
//! function's blocks, and abstractly interprets every block against the
//! persistent operand stack to build the AST.
//!
//! Each instruction kind has one interpretation rule that pops its operands,
//! emits at most one statement and optionally pushes a result. Control
//! transfers hand the current stack to their successors; at join points the
//! first predecessor interpreted decides the entry stack.

use super::ast::{CallTarget, DataType, Immediate, Node};
use super::function::Function;
use super::instruction::{BinaryOperator, Instruction, InstructionKind, Operands};
use super::stack::{OperandStack, StackRef};
use super::{DecompileOptions, ScriptFile};
use crate::{Error, Result};
use std::collections::BTreeMap;

/// Calling convention of a function in the script, gathered before interpretation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    /// Function identifier
    pub name: String,
    /// Number of arguments popped by a call
    pub arg_count: usize,
    /// Values returned, from the first return instruction
    pub return_count: Option<usize>,
}

/// Abstract interpreter over a decoded script
pub struct Machine {
    name: String,
    code: Vec<Instruction>,
    options: DecompileOptions,
    stack: OperandStack,
    signatures: BTreeMap<u32, Signature>,
    warnings: Vec<String>,
}

impl Machine {
    /// Create a machine over address-ordered instructions
    pub fn new(name: impl Into<String>, code: Vec<Instruction>, options: DecompileOptions) -> Self {
        Self {
            name: name.into(),
            code,
            options,
            stack: OperandStack::new(),
            signatures: BTreeMap::new(),
            warnings: Vec::new(),
        }
    }

    /// Decompile every function in the script
    pub fn decompile(mut self) -> Result<ScriptFile> {
        let code = std::mem::take(&mut self.code);
        let parts = split_functions(code);
        tracing::debug!("{}: {} functions", self.name, parts.len());

        let mut functions: Vec<Function> = parts
            .into_iter()
            .enumerate()
            .map(|(index, (implicit, instrs))| {
                let fallback = if implicit {
                    "main".to_string()
                } else {
                    format!("func_{}", index)
                };
                Function::from_prologue(fallback, instrs)
            })
            .collect();

        for function in &functions {
            self.signatures.insert(function.address, signature_of(function));
        }

        for function in &mut functions {
            self.decompile_function(function)?;
        }

        Ok(ScriptFile {
            name: self.name,
            functions,
            warnings: self.warnings,
        })
    }

    /// Diagnostics recorded so far
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    fn warn(&mut self, message: String) {
        tracing::warn!("{}", message);
        self.warnings.push(message);
    }

    /// Discover blocks, interpret them, and infer types for one function
    pub fn decompile_function(&mut self, function: &mut Function) -> Result<()> {
        let order = function.discover_blocks();

        function.reset_visited();
        for address in order {
            if !function.visit(address) {
                continue;
            }
            self.interpret_block(function, address)?;
        }

        function.infer_types()
    }

    fn interpret_block(&mut self, function: &mut Function, address: u32) -> Result<()> {
        let Some(block) = function.block(address) else {
            return Ok(());
        };
        let window = block.window.clone();
        let outs: Vec<u32> = block.outs.iter().copied().collect();
        let mut stack = block.entry_stack.unwrap_or(StackRef::EMPTY);

        let mut statements = Vec::new();
        if self.options.show_addresses {
            statements.push(Node::Comment(format!("block 0x{:06x}", address)));
        }

        function.stream_mut().seek(window.start)?;
        for _ in window {
            let instr = function.stream_mut().next(stack)?;
            stack = self.step(function, &instr, stack, &mut statements)?;
        }
        function.stream_mut().record_exit(stack);

        if let Some(block) = function.block_mut(address) {
            block.statements = statements;
            block.exit_stack = Some(stack);
        }

        for succ in outs {
            self.reconcile(function, address, succ, stack);
        }
        Ok(())
    }

    /// Hand `stack` to a successor, checking agreement at join points
    fn reconcile(&mut self, function: &mut Function, from: u32, to: u32, stack: StackRef) {
        let depth = self.stack.depth(stack);
        let Some(succ) = function.block_mut(to) else {
            return;
        };
        match succ.entry_stack {
            None => succ.entry_stack = Some(stack),
            Some(existing) => {
                let expected = self.stack.depth(existing);
                if expected != depth {
                    let message = format!(
                        "stack mismatch at join 0x{:06x}: depth {} from 0x{:06x}, expected {}",
                        to, depth, from, expected
                    );
                    self.warn(message);
                }
            }
        }
    }

    fn pop(&mut self, at: &Instruction, stack: StackRef) -> (Node, StackRef) {
        if stack.is_empty() {
            self.warn(format!(
                "node stack underflow at 0x{:06x} ({})",
                at.address,
                at.kind.name()
            ));
            return (Node::sentinel(), StackRef::EMPTY);
        }
        self.stack.pop(stack)
    }

    fn pop_n(&mut self, at: &Instruction, mut stack: StackRef, count: usize) -> (Vec<Node>, StackRef) {
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            let (node, next) = self.pop(at, stack);
            values.push(node);
            stack = next;
        }
        values.reverse();
        (values, stack)
    }

    /// Push a call's results, or emit it as a statement when it returns nothing
    fn call_results(
        &mut self,
        at: &Instruction,
        call: Node,
        return_count: usize,
        mut stack: StackRef,
        out: &mut Vec<Node>,
    ) -> StackRef {
        match return_count {
            0 => out.push(Node::ExprStmt(Box::new(call))),
            1 => stack = self.stack.push(stack, call),
            count => {
                self.warn(format!(
                    "call at 0x{:06x} yields {} values; results replaced by placeholders",
                    at.address, count
                ));
                out.push(Node::ExprStmt(Box::new(call)));
                for _ in 0..count {
                    stack = self.stack.push(stack, Node::sentinel());
                }
            }
        }
        stack
    }

    fn slot_name(&mut self, function: &Function, slot: u16) -> String {
        match function.variable_by_slot(slot as usize) {
            Some(var) => var.identifier.clone(),
            None => {
                self.warn(format!(
                    "{}: frame slot {} has no declaration",
                    function.identifier, slot
                ));
                format!("slot_{}", slot)
            }
        }
    }

    /// Interpret one instruction, returning the new stack
    fn step(
        &mut self,
        function: &mut Function,
        instr: &Instruction,
        stack: StackRef,
        out: &mut Vec<Node>,
    ) -> Result<StackRef> {
        let mismatch = || Error::OperandMismatch {
            address: instr.address,
            kind: instr.kind.name(),
        };

        let next = match (&instr.kind, &instr.operands) {
            (InstructionKind::Nop | InstructionKind::Enter, _) => stack,

            (InstructionKind::PushImmediate, Operands::Int(value)) => {
                self.stack.push(stack, Node::int(*value))
            }
            (InstructionKind::PushImmediate, Operands::Ints(values)) => values
                .iter()
                .fold(stack, |s, value| self.stack.push(s, Node::int(*value))),
            (InstructionKind::PushImmediate, Operands::Float(value)) => self.stack.push(
                stack,
                Node::Immediate(Immediate::Float(*value)),
            ),

            (InstructionKind::BinaryOp(op, _), Operands::None) => {
                let (rhs, s) = self.pop(instr, stack);
                let (lhs, s) = self.pop(instr, s);
                self.stack.push(s, Node::binary(lhs, *op, rhs))
            }
            (InstructionKind::BinaryOp(op, _), Operands::Int(value)) => {
                let (lhs, s) = self.pop(instr, stack);
                self.stack.push(s, Node::binary(lhs, *op, Node::int(*value)))
            }
            (InstructionKind::UnaryOp(op), _) => {
                let (operand, s) = self.pop(instr, stack);
                self.stack.push(s, Node::unary(*op, operand))
            }

            (InstructionKind::Dup, _) => {
                if stack.is_empty() {
                    let (node, s) = self.pop(instr, stack);
                    let s = self.stack.push(s, node.clone());
                    self.stack.push(s, node)
                } else {
                    let top = self.stack.peek(stack);
                    self.stack.push(stack, top)
                }
            }
            (InstructionKind::Drop, _) => {
                let (value, s) = self.pop(instr, stack);
                if value.has_side_effects() {
                    out.push(Node::ExprStmt(Box::new(value)));
                }
                s
            }

            (InstructionKind::LoadLocal, Operands::Local(slot)) => {
                let name = self.slot_name(function, *slot);
                self.stack.push(stack, Node::var(name))
            }
            (InstructionKind::StoreLocal, Operands::Local(slot)) => {
                let name = self.slot_name(function, *slot);
                let (value, s) = self.pop(instr, stack);
                out.push(Node::assign(Node::var(name), value));
                s
            }
            (InstructionKind::LoadStatic, Operands::Static(idx)) => {
                self.stack.push(stack, Node::var(format!("static_{}", idx)))
            }
            (InstructionKind::StoreStatic, Operands::Static(idx)) => {
                let (value, s) = self.pop(instr, stack);
                out.push(Node::assign(Node::var(format!("static_{}", idx)), value));
                s
            }
            (InstructionKind::LoadGlobal, Operands::Global(idx)) => {
                self.stack.push(stack, Node::var(format!("global_{}", idx)))
            }
            (InstructionKind::StoreGlobal, Operands::Global(idx)) => {
                let (value, s) = self.pop(instr, stack);
                out.push(Node::assign(Node::var(format!("global_{}", idx)), value));
                s
            }

            (InstructionKind::Jump, Operands::Branch(target)) => {
                out.push(Node::Goto(*target));
                stack
            }
            (InstructionKind::JumpIfFalse, Operands::Branch(target)) => {
                let (condition, s) = self.pop(instr, stack);
                out.push(Node::IfStmt {
                    condition: Box::new(condition.negated()),
                    then_block: vec![Node::Goto(*target)],
                });
                s
            }
            (InstructionKind::CompareJump(op), Operands::Branch(target)) => {
                let (rhs, s) = self.pop(instr, stack);
                let (lhs, s) = self.pop(instr, s);
                out.push(Node::IfStmt {
                    condition: Box::new(Node::binary(lhs, *op, rhs).negated()),
                    then_block: vec![Node::Goto(*target)],
                });
                s
            }
            (InstructionKind::Switch, Operands::Switch(cases)) => {
                let (scrutinee, s) = self.pop(instr, stack);
                for case in cases {
                    out.push(Node::IfStmt {
                        condition: Box::new(Node::binary(
                            scrutinee.clone(),
                            BinaryOperator::Eq,
                            Node::int(case.value),
                        )),
                        then_block: vec![Node::Goto(case.target)],
                    });
                }
                s
            }

            (InstructionKind::Call, Operands::Call(target)) => {
                let signature = match self.signatures.get(target) {
                    Some(signature) => signature.clone(),
                    None => {
                        self.warn(format!(
                            "call at 0x{:06x} to unknown function 0x{:06x}",
                            instr.address, target
                        ));
                        Signature {
                            name: format!("sub_{:06x}", target),
                            arg_count: 0,
                            return_count: Some(0),
                        }
                    }
                };
                let (args, s) = self.pop_n(instr, stack, signature.arg_count);
                let call = Node::Call {
                    target: CallTarget::Function {
                        name: signature.name,
                    },
                    args,
                };
                self.call_results(instr, call, signature.return_count.unwrap_or(0), s, out)
            }
            (
                InstructionKind::Native,
                Operands::Native {
                    arg_count,
                    return_count,
                    hash,
                    name,
                },
            ) => {
                let (args, s) = self.pop_n(instr, stack, *arg_count as usize);
                let call = Node::Call {
                    target: CallTarget::Native {
                        hash: *hash,
                        name: name.clone(),
                    },
                    args,
                };
                self.call_results(instr, call, *return_count as usize, s, out)
            }

            (InstructionKind::Return, Operands::Return { return_count, .. }) => {
                let returned = match self.stack.try_pop(stack) {
                    Some((top, _)) => top.data_type(&*function),
                    None => DataType::Int,
                };
                function.infer_return_type(instr, returned)?;
                let (values, s) = self.pop_n(instr, stack, *return_count as usize);
                out.push(Node::ReturnStmt(values));
                s
            }

            (InstructionKind::Unknown { mnemonic, .. }, _) => {
                self.warn(format!(
                    "unmodeled {} at 0x{:06x}",
                    mnemonic, instr.address
                ));
                out.push(Node::Comment(format!(
                    "unhandled {} at 0x{:06x}",
                    mnemonic, instr.address
                )));
                stack
            }

            _ => return Err(mismatch()),
        };

        Ok(next)
    }
}

/// Split address-ordered instructions at function prologues
///
/// Returns `(implicit, instructions)` pairs; `implicit` marks code that
/// precedes the first prologue.
pub fn split_functions(code: Vec<Instruction>) -> Vec<(bool, Vec<Instruction>)> {
    let mut parts: Vec<(bool, Vec<Instruction>)> = Vec::new();
    for instr in code {
        let starts_function = instr.kind == InstructionKind::Enter;
        match parts.last_mut() {
            Some((_, current)) if !starts_function => current.push(instr),
            _ => parts.push((!starts_function, vec![instr])),
        }
    }
    parts
}

fn signature_of(function: &Function) -> Signature {
    let return_count = function.stream().instructions().find_map(|instr| {
        match (&instr.kind, &instr.operands) {
            (InstructionKind::Return, Operands::Return { return_count, .. }) => {
                Some(*return_count as usize)
            }
            _ => None,
        }
    });
    Signature {
        name: function.identifier.clone(),
        arg_count: function.inputs.len(),
        return_count,
    }
}
