//! # Functions
//!
//! A decompiled function: its signature, its locals, and the block graph that
//! holds the interpreted statements. Owns type inference and rendering.

use super::ast::{label_name, DataType, Declarations, Inference, Node, TypeScope, Variable};
use super::cfg::{self, BasicBlock};
use super::instruction::{Instruction, Operands};
use super::stream::InstructionStream;
use crate::{Error, Result};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// Frame slots between the inputs and the locals (return address and frame link)
pub const FRAME_LINK_SLOTS: usize = 2;

/// A function recovered from the instruction stream
#[derive(Debug, Clone)]
pub struct Function {
    /// Function name
    pub identifier: String,
    /// Parameters, in slot order
    pub inputs: Declarations,
    /// Return value; its type is fixed the first time a return is interpreted
    pub output: Option<Variable>,
    /// Address of the first instruction
    pub address: u32,
    /// Frame locals, in slot order
    pub locals: Declarations,
    /// Start address of the entry block
    pub entry_block: u32,
    /// Blocks keyed by start address
    pub blocks: BTreeMap<u32, BasicBlock>,
    stream: InstructionStream,
    visited: HashSet<u32>,
    return_arity: Option<u8>,
}

impl Function {
    /// Create a function over an address-ordered instruction list
    pub fn new(identifier: impl Into<String>, instructions: Vec<Instruction>) -> Self {
        let address = instructions.first().map_or(0, |instr| instr.address);
        Self {
            identifier: identifier.into(),
            inputs: Declarations::new(),
            output: Some(Variable::new("retval")),
            address,
            locals: Declarations::new(),
            entry_block: address,
            blocks: BTreeMap::new(),
            stream: InstructionStream::new(instructions),
            visited: HashSet::new(),
            return_arity: None,
        }
    }

    /// Create a function whose frame layout comes from its `Enter` prologue
    pub fn from_prologue(fallback_name: String, instructions: Vec<Instruction>) -> Self {
        let prologue = instructions.first().and_then(|instr| match &instr.operands {
            Operands::Enter {
                arg_count,
                frame_size,
                name,
            } => Some((*arg_count as usize, *frame_size as usize, name.clone())),
            _ => None,
        });

        match prologue {
            Some((args, frame_size, name)) => {
                let locals = frame_size.saturating_sub(args + FRAME_LINK_SLOTS);
                let name = name.filter(|n| !n.is_empty()).unwrap_or(fallback_name);
                let mut function = Function::new(name, instructions);
                function.inputs = Declarations::numbered("a", args);
                function.locals = Declarations::numbered("l", locals);
                function
            }
            None => Function::new(fallback_name, instructions),
        }
    }

    /// The function's instruction stream
    pub fn stream(&self) -> &InstructionStream {
        &self.stream
    }

    /// The function's instruction stream, mutably
    pub fn stream_mut(&mut self) -> &mut InstructionStream {
        &mut self.stream
    }

    /// Forget which blocks the previous walk visited
    pub fn reset_visited(&mut self) {
        self.visited.clear();
    }

    /// Mark `address` visited; false if it already was
    pub fn visit(&mut self, address: u32) -> bool {
        self.visited.insert(address)
    }

    /// Build the block graph from the entry block
    ///
    /// Returns block addresses in discovery order.
    pub fn discover_blocks(&mut self) -> Vec<u32> {
        self.reset_visited();
        cfg::discover(
            &self.stream,
            self.entry_block,
            self.address,
            &mut self.blocks,
            &mut self.visited,
        )
    }

    /// Block starting at `address`
    pub fn block(&self, address: u32) -> Option<&BasicBlock> {
        self.blocks.get(&address)
    }

    /// Block starting at `address`, mutably
    pub fn block_mut(&mut self, address: u32) -> Option<&mut BasicBlock> {
        self.blocks.get_mut(&address)
    }

    /// Variable addressed by a bytecode frame slot
    ///
    /// Inputs occupy the first slots, then the frame link, then the locals.
    pub fn variable_by_slot(&self, slot: usize) -> Option<&Variable> {
        let args = self.inputs.len();
        if slot < args {
            return self.inputs.by_index(slot);
        }
        slot.checked_sub(args + FRAME_LINK_SLOTS)
            .and_then(|idx| self.locals.by_index(idx))
    }

    /// Input or local with this identifier
    pub fn variable_by_name(&self, identifier: &str) -> Option<&Variable> {
        self.inputs
            .by_name(identifier)
            .or_else(|| self.locals.by_name(identifier))
    }

    fn variable_by_name_mut(&mut self, identifier: &str) -> Option<&mut Variable> {
        match self.inputs.by_name_mut(identifier) {
            Some(var) => Some(var),
            None => self.locals.by_name_mut(identifier),
        }
    }

    /// Infer the output type from a return instruction
    ///
    /// `returned` is the type of the value on top of the stack. Zero return
    /// values infer `void`. More than one is unsupported. Every return must
    /// yield as many values as the first one, whatever their types.
    pub fn infer_return_type(&mut self, ret: &Instruction, returned: DataType) -> Result<()> {
        let count = match &ret.operands {
            Operands::Return { return_count, .. } => *return_count,
            _ => {
                return Err(Error::OperandMismatch {
                    address: ret.address,
                    kind: ret.kind.name(),
                })
            }
        };

        let inferred = match count {
            0 => DataType::Void,
            1 => returned,
            count => {
                return Err(Error::UnsupportedReturnArity {
                    address: ret.address,
                    count,
                })
            }
        };

        match self.return_arity {
            None => self.return_arity = Some(count),
            Some(existing) if existing != count => {
                return Err(Error::ReturnArityConflict {
                    function: self.identifier.clone(),
                    address: ret.address,
                    existing,
                    found: count,
                })
            }
            Some(_) => {}
        }

        let identifier = self.identifier.clone();
        let output = self.output.get_or_insert_with(|| Variable::new("retval"));
        match output.infer_type(inferred) {
            Inference::Conflict(existing) => Err(Error::ReturnTypeConflict {
                function: identifier,
                existing: existing.to_string(),
                inferred: inferred.to_string(),
            }),
            _ => Ok(()),
        }
    }

    /// Infer input and local types from how they are used
    ///
    /// Assignments type their target from the assigned value; binary
    /// expressions type a variable operand from the other side. Runs until no
    /// rule fires. Conflicts keep the first type and are logged.
    ///
    /// Returned values are then re-typed against the output, which settles a
    /// return type left open at interpretation time. A conflict there is an
    /// error.
    pub fn infer_types(&mut self) -> Result<()> {
        self.infer_variable_types();

        let returned: Vec<DataType> = self
            .blocks
            .values()
            .flat_map(|block| block.statements.iter())
            .filter_map(|stmt| match stmt {
                Node::ReturnStmt(values) if values.len() == 1 => Some(values[0].data_type(self)),
                _ => None,
            })
            .collect();

        let Some(output) = self.output.as_mut() else {
            return Ok(());
        };
        for inferred in returned {
            if let Inference::Conflict(existing) = output.infer_type(inferred) {
                return Err(Error::ReturnTypeConflict {
                    function: self.identifier.clone(),
                    existing: existing.to_string(),
                    inferred: inferred.to_string(),
                });
            }
        }
        Ok(())
    }

    fn infer_variable_types(&mut self) {
        loop {
            let facts = self.collect_type_facts();
            let mut changed = false;
            for (identifier, inferred) in facts {
                let function = self.identifier.clone();
                let Some(var) = self.variable_by_name_mut(&identifier) else {
                    continue;
                };
                match var.infer_type(inferred) {
                    Inference::Resolved => changed = true,
                    Inference::Unchanged => {}
                    Inference::Conflict(existing) => {
                        tracing::warn!(
                            "{}: {} used as {} but already inferred as {}",
                            function,
                            identifier,
                            inferred,
                            existing
                        );
                    }
                }
            }
            if !changed {
                break;
            }
        }
    }

    fn collect_type_facts(&mut self) -> Vec<(String, DataType)> {
        self.reset_visited();
        let mut facts = Vec::new();
        let mut worklist = vec![self.entry_block];

        while let Some(address) = worklist.pop() {
            if !self.visit(address) {
                continue;
            }
            let Some(block) = self.blocks.get(&address) else {
                continue;
            };
            for stmt in &block.statements {
                self.collect_node_facts(stmt, &mut facts);
            }
            worklist.extend(block.outs.iter().rev());
        }

        facts
    }

    fn collect_node_facts(&self, node: &Node, facts: &mut Vec<(String, DataType)>) {
        match node {
            Node::AssignStmt { target, value } => {
                if let Node::VariableRef(identifier) = target.as_ref() {
                    facts.push((identifier.clone(), value.data_type(self)));
                }
                self.collect_node_facts(value, facts);
            }
            Node::BinaryExpr { left, right, .. } => {
                if let Node::VariableRef(identifier) = left.as_ref() {
                    facts.push((identifier.clone(), right.data_type(self)));
                }
                if let Node::VariableRef(identifier) = right.as_ref() {
                    facts.push((identifier.clone(), left.data_type(self)));
                }
                self.collect_node_facts(left, facts);
                self.collect_node_facts(right, facts);
            }
            Node::UnaryExpr { operand, .. } | Node::ExprStmt(operand) => {
                self.collect_node_facts(operand, facts)
            }
            Node::Call { args, .. } | Node::ReturnStmt(args) => {
                for arg in args {
                    self.collect_node_facts(arg, facts);
                }
            }
            Node::IfStmt {
                condition,
                then_block,
            } => {
                self.collect_node_facts(condition, facts);
                for stmt in then_block {
                    self.collect_node_facts(stmt, facts);
                }
            }
            _ => {}
        }
    }

    /// Declared return type
    ///
    /// `void` when no value is returned, unknown when a value is returned but
    /// its type could not be inferred.
    pub fn return_type(&self) -> DataType {
        match &self.output {
            Some(var) if var.data_type.is_resolved() => var.data_type,
            _ if self.return_arity == Some(1) => DataType::Unknown,
            _ => DataType::Void,
        }
    }

    /// Render the function as pseudo-C
    pub fn render(&self) -> String {
        let params = self
            .inputs
            .iter()
            .map(Variable::c_declaration)
            .collect::<Vec<_>>()
            .join(", ");

        let mut out = format!("{} {}({}) {{\n", self.return_type(), self.identifier, params);

        for var in self.locals.iter() {
            Node::Declaration(var.clone()).render_statement(1, &mut out);
        }
        if !self.locals.is_empty() {
            out.push('\n');
        }

        for block in self.blocks.values() {
            if block.is_branch_target {
                out.push_str(&format!("{}:\n", label_name(block.start_address)));
            }
            for stmt in &block.statements {
                stmt.render_statement(1, &mut out);
            }
        }

        out.push_str("}\n");
        out
    }
}

impl TypeScope for Function {
    fn type_of(&self, identifier: &str) -> DataType {
        self.variable_by_name(identifier)
            .map(|var| var.data_type)
            .unwrap_or_default()
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::ast::Immediate;
    use crate::script::instruction::BinaryOperator;

    #[test]
    fn test_slot_addressing() {
        let mut function = Function::new("f", Vec::new());
        function.inputs = Declarations::numbered("a", 2);
        function.locals = Declarations::numbered("l", 2);

        assert_eq!(function.variable_by_slot(1).unwrap().identifier, "a1");
        assert!(function.variable_by_slot(2).is_none());
        assert!(function.variable_by_slot(3).is_none());
        assert_eq!(function.variable_by_slot(4).unwrap().identifier, "l0");
        assert!(function.variable_by_slot(6).is_none());
    }

    #[test]
    fn test_from_prologue() {
        let function = Function::from_prologue(
            "func_0".into(),
            vec![Instruction::enter(0x10, 2, 5), Instruction::ret(0x15, 0)],
        );
        assert_eq!(function.address, 0x10);
        assert_eq!(function.inputs.len(), 2);
        assert_eq!(function.locals.len(), 1);
        assert_eq!(function.identifier, "func_0");
    }

    #[test]
    fn test_return_inference() {
        let mut function = Function::new("f", Vec::new());
        function
            .infer_return_type(&Instruction::ret(0, 1), DataType::Int)
            .unwrap();
        assert_eq!(function.return_type(), DataType::Int);

        let conflict = function.infer_return_type(&Instruction::ret(4, 1), DataType::Float);
        assert!(matches!(conflict, Err(Error::ReturnTypeConflict { .. })));

        let multi = function.infer_return_type(&Instruction::ret(8, 2), DataType::Int);
        assert!(matches!(
            multi,
            Err(Error::UnsupportedReturnArity { count: 2, .. })
        ));
    }

    #[test]
    fn test_void_inference() {
        let mut function = Function::new("f", Vec::new());
        function
            .infer_return_type(&Instruction::ret(0, 0), DataType::Unknown)
            .unwrap();
        assert_eq!(function.output.as_ref().unwrap().data_type, DataType::Void);
    }

    #[test]
    fn test_usage_inference() {
        let mut function = Function::new("f", vec![Instruction::ret(0, 0)]);
        function.inputs = Declarations::numbered("a", 1);
        function.locals = Declarations::numbered("l", 1);
        function.discover_blocks();
        let block = function.block_mut(0).unwrap();
        block.emit(Node::assign(
            Node::var("l0"),
            Node::Immediate(Immediate::Float(1.5)),
        ));
        block.emit(Node::ReturnStmt(vec![Node::binary(
            Node::var("a0"),
            BinaryOperator::Mul,
            Node::var("l0"),
        )]));

        function.infer_types().unwrap();
        assert_eq!(function.type_of("l0"), DataType::Float);
        assert_eq!(function.type_of("a0"), DataType::Float);
    }

    #[test]
    fn test_return_arity_conflict() {
        let mut function = Function::new("f", Vec::new());
        function
            .infer_return_type(&Instruction::ret(0, 1), DataType::Unknown)
            .unwrap();
        let mixed = function.infer_return_type(&Instruction::ret(4, 0), DataType::Unknown);
        assert!(matches!(
            mixed,
            Err(Error::ReturnArityConflict {
                existing: 1,
                found: 0,
                ..
            })
        ));
    }

    #[test]
    fn test_deferred_return_conflict_is_error() {
        let mut function = Function::new("f", vec![Instruction::ret(0, 1)]);
        function.inputs = Declarations::numbered("a", 2);
        function.discover_blocks();
        let block = function.block_mut(0).unwrap();
        block.emit(Node::assign(Node::var("a0"), Node::int(1)));
        block.emit(Node::ReturnStmt(vec![Node::var("a0")]));
        block.emit(Node::assign(
            Node::var("a1"),
            Node::Immediate(Immediate::Float(1.5)),
        ));
        block.emit(Node::ReturnStmt(vec![Node::var("a1")]));

        assert!(matches!(
            function.infer_types(),
            Err(Error::ReturnTypeConflict { .. })
        ));
    }
}
