//! # Pseudocode AST
//!
//! Expression and statement nodes produced by abstract interpretation, the
//! variable model they refer to, and their rendering to C-like text.
//!
//! Rendering is a pure function of the tree: the same nodes always render to
//! the same text.

use super::instruction::{BinaryOperator, UnaryOperator};
use std::fmt;

/// Inferred data type of a value or variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DataType {
    /// Not yet inferred
    #[default]
    Unknown,
    /// No value
    Void,
    /// 32-bit integer
    Int,
    /// 32-bit float
    Float,
    /// Boolean (stored as an integer by the VM)
    Bool,
}

impl DataType {
    /// Whether an inference rule has fired for this type
    pub fn is_resolved(self) -> bool {
        self != DataType::Unknown
    }

    /// Whether two resolved types may describe the same slot
    ///
    /// The VM stores booleans as integers, so `Int` and `Bool` never conflict.
    pub fn is_compatible(self, other: DataType) -> bool {
        self == other
            || matches!(
                (self, other),
                (DataType::Int, DataType::Bool) | (DataType::Bool, DataType::Int)
            )
    }

    /// C spelling of the type
    pub fn c_name(self) -> &'static str {
        match self {
            DataType::Unknown => "var",
            DataType::Void => "void",
            DataType::Int => "int",
            DataType::Float => "float",
            DataType::Bool => "bool",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.c_name())
    }
}

/// Outcome of applying an inference rule to a variable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inference {
    /// The variable was unresolved and now has a type
    Resolved,
    /// The variable already had a compatible type, or nothing was inferred
    Unchanged,
    /// The variable already had a different, incompatible type
    Conflict(DataType),
}

/// A named, typed storage location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    /// Synthesized name
    pub identifier: String,
    /// Inferred type
    pub data_type: DataType,
}

impl Variable {
    /// Create an unresolved variable
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            data_type: DataType::Unknown,
        }
    }

    /// Create a variable with a known type
    pub fn typed(identifier: impl Into<String>, data_type: DataType) -> Self {
        Self {
            identifier: identifier.into(),
            data_type,
        }
    }

    /// Apply an inference rule. The first resolved type sticks.
    pub fn infer_type(&mut self, inferred: DataType) -> Inference {
        if !inferred.is_resolved() {
            return Inference::Unchanged;
        }
        if !self.data_type.is_resolved() {
            self.data_type = inferred;
            return Inference::Resolved;
        }
        if self.data_type.is_compatible(inferred) {
            Inference::Unchanged
        } else {
            Inference::Conflict(self.data_type)
        }
    }

    /// `type identifier`, as used in parameter lists and declarations
    pub fn c_declaration(&self) -> String {
        format!("{} {}", self.data_type, self.identifier)
    }
}

/// An ordered set of variables, addressable by name or by position
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Declarations {
    vars: Vec<Variable>,
}

impl Declarations {
    /// Create an empty declaration list
    pub fn new() -> Self {
        Self::default()
    }

    /// `count` unresolved variables named `{prefix}0..`
    pub fn numbered(prefix: &str, count: usize) -> Self {
        Self {
            vars: (0..count)
                .map(|i| Variable::new(format!("{}{}", prefix, i)))
                .collect(),
        }
    }

    /// Append a variable
    pub fn push(&mut self, var: Variable) {
        self.vars.push(var);
    }

    /// Look up a variable by identifier
    pub fn by_name(&self, identifier: &str) -> Option<&Variable> {
        self.vars.iter().find(|v| v.identifier == identifier)
    }

    /// Look up a variable by identifier, mutably
    pub fn by_name_mut(&mut self, identifier: &str) -> Option<&mut Variable> {
        self.vars.iter_mut().find(|v| v.identifier == identifier)
    }

    /// Look up a variable by declaration position
    pub fn by_index(&self, index: usize) -> Option<&Variable> {
        self.vars.get(index)
    }

    /// Number of variables
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// Whether there are no variables
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Iterate in declaration order
    pub fn iter(&self) -> impl Iterator<Item = &Variable> {
        self.vars.iter()
    }
}

/// Resolves a variable identifier to its current type
pub trait TypeScope {
    /// Type of the named variable, `Unknown` if it is not declared here
    fn type_of(&self, identifier: &str) -> DataType;
}

impl TypeScope for Declarations {
    fn type_of(&self, identifier: &str) -> DataType {
        self.by_name(identifier)
            .map(|v| v.data_type)
            .unwrap_or_default()
    }
}

/// Constant operand
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Immediate {
    /// Integer constant
    Int(i32),
    /// Float constant
    Float(f32),
    /// Placeholder produced when the operand stack underflows
    Sentinel,
}

impl Immediate {
    /// Marker value rendered for a [`Immediate::Sentinel`]
    pub const SENTINEL_VALUE: u32 = 0xBABE;

    /// Type of the constant
    pub fn data_type(self) -> DataType {
        match self {
            Immediate::Float(_) => DataType::Float,
            Immediate::Int(_) | Immediate::Sentinel => DataType::Int,
        }
    }
}

impl fmt::Display for Immediate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Immediate::Int(v) => write!(f, "{}", v),
            Immediate::Float(v) => write!(f, "{:?}", v),
            Immediate::Sentinel => write!(f, "0x{:X}", Self::SENTINEL_VALUE),
        }
    }
}

/// Target of a call expression
#[derive(Debug, Clone, PartialEq)]
pub enum CallTarget {
    /// Function in the same script
    Function {
        /// Callee identifier
        name: String,
    },
    /// Engine native
    Native {
        /// Native hash
        hash: u64,
        /// Resolved name, if the native database knows it
        name: Option<String>,
    },
}

impl fmt::Display for CallTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallTarget::Function { name } => f.write_str(name),
            CallTarget::Native {
                name: Some(name), ..
            } => f.write_str(name),
            CallTarget::Native { hash, name: None } => write!(f, "native_0x{:016X}", hash),
        }
    }
}

/// AST node: expression or statement
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Constant
    Immediate(Immediate),
    /// Reference to a named variable
    VariableRef(String),
    /// `left op right`
    BinaryExpr {
        /// Left operand
        left: Box<Node>,
        /// Operator
        op: BinaryOperator,
        /// Right operand
        right: Box<Node>,
    },
    /// `op operand`
    UnaryExpr {
        /// Operator
        op: UnaryOperator,
        /// Operand
        operand: Box<Node>,
    },
    /// Function or native call
    Call {
        /// Callee
        target: CallTarget,
        /// Arguments in source order
        args: Vec<Node>,
    },
    /// `target = value;`
    AssignStmt {
        /// Assigned location
        target: Box<Node>,
        /// Assigned value
        value: Box<Node>,
    },
    /// `if (condition) { ... }`
    IfStmt {
        /// Condition under which the body runs
        condition: Box<Node>,
        /// Body statements
        then_block: Vec<Node>,
    },
    /// `return;` or `return value;`
    ReturnStmt(Vec<Node>),
    /// `goto label_XXXX;`
    Goto(u32),
    /// An expression evaluated for its side effects
    ExprStmt(Box<Node>),
    /// Free-form comment
    Comment(String),
    /// Local declaration
    Declaration(Variable),
}

impl Node {
    /// Integer constant
    pub fn int(value: i32) -> Self {
        Node::Immediate(Immediate::Int(value))
    }

    /// Underflow placeholder
    pub fn sentinel() -> Self {
        Node::Immediate(Immediate::Sentinel)
    }

    /// Reference to a named variable
    pub fn var(identifier: impl Into<String>) -> Self {
        Node::VariableRef(identifier.into())
    }

    /// Build `left op right`
    pub fn binary(left: Node, op: BinaryOperator, right: Node) -> Self {
        Node::BinaryExpr {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    /// Build `op operand`
    pub fn unary(op: UnaryOperator, operand: Node) -> Self {
        Node::UnaryExpr {
            op,
            operand: Box::new(operand),
        }
    }

    /// Build `target = value`
    pub fn assign(target: Node, value: Node) -> Self {
        Node::AssignStmt {
            target: Box::new(target),
            value: Box::new(value),
        }
    }

    /// Logical negation, folding comparisons and double negation
    pub fn negated(self) -> Self {
        match self {
            Node::BinaryExpr { left, op, right } => match op.negate() {
                Some(negated) => Node::BinaryExpr {
                    left,
                    op: negated,
                    right,
                },
                None => Node::unary(UnaryOperator::Not, Node::BinaryExpr { left, op, right }),
            },
            Node::UnaryExpr {
                op: UnaryOperator::Not,
                operand,
            } => *operand,
            other => Node::unary(UnaryOperator::Not, other),
        }
    }

    /// Whether this node is a statement rather than an expression
    pub fn is_statement(&self) -> bool {
        matches!(
            self,
            Node::AssignStmt { .. }
                | Node::IfStmt { .. }
                | Node::ReturnStmt(_)
                | Node::Goto(_)
                | Node::ExprStmt(_)
                | Node::Comment(_)
                | Node::Declaration(_)
        )
    }

    /// Whether evaluating this expression has side effects
    pub fn has_side_effects(&self) -> bool {
        match self {
            Node::Call { .. } => true,
            Node::BinaryExpr { left, right, .. } => {
                left.has_side_effects() || right.has_side_effects()
            }
            Node::UnaryExpr { operand, .. } => operand.has_side_effects(),
            _ => false,
        }
    }

    /// Inferred type of an expression
    pub fn data_type(&self, scope: &dyn TypeScope) -> DataType {
        match self {
            Node::Immediate(imm) => imm.data_type(),
            Node::VariableRef(identifier) => scope.type_of(identifier),
            Node::BinaryExpr { left, op, right } => {
                if op.is_comparison() {
                    return DataType::Bool;
                }
                let lhs = left.data_type(scope);
                if lhs.is_resolved() {
                    lhs
                } else {
                    right.data_type(scope)
                }
            }
            Node::UnaryExpr { op, operand } => match op {
                UnaryOperator::Not => DataType::Bool,
                UnaryOperator::Neg => operand.data_type(scope),
                UnaryOperator::IntToFloat => DataType::Float,
                UnaryOperator::FloatToInt => DataType::Int,
            },
            _ => DataType::Unknown,
        }
    }

    fn is_atomic(&self) -> bool {
        matches!(
            self,
            Node::Immediate(_) | Node::VariableRef(_) | Node::Call { .. }
        )
    }

    /// Render an operand, parenthesized unless it is atomic
    fn fmt_operand(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_atomic() {
            write!(f, "{}", self)
        } else {
            write!(f, "({})", self)
        }
    }

    /// Render this node as a statement at the given nesting depth
    ///
    /// Simple statements end with `;`. Conditionals and comments manage their
    /// own layout.
    pub fn render_statement(&self, indent: usize, out: &mut String) {
        let pad = "\t".repeat(indent);
        match self {
            Node::Comment(text) => {
                out.push_str(&format!("{}// {}\n", pad, text));
            }
            Node::IfStmt {
                condition,
                then_block,
            } => {
                out.push_str(&format!("{}if ({}) {{\n", pad, condition));
                for stmt in then_block {
                    stmt.render_statement(indent + 1, out);
                }
                out.push_str(&format!("{}}}\n", pad));
            }
            other => {
                out.push_str(&format!("{}{};\n", pad, other));
            }
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Immediate(imm) => write!(f, "{}", imm),
            Node::VariableRef(identifier) => f.write_str(identifier),
            Node::BinaryExpr { left, op, right } => {
                left.fmt_operand(f)?;
                write!(f, " {} ", op)?;
                right.fmt_operand(f)
            }
            Node::UnaryExpr { op, operand } => {
                match op {
                    UnaryOperator::Not => f.write_str("!")?,
                    UnaryOperator::Neg => f.write_str("-")?,
                    UnaryOperator::IntToFloat => f.write_str("(float)")?,
                    UnaryOperator::FloatToInt => f.write_str("(int)")?,
                }
                operand.fmt_operand(f)
            }
            Node::Call { target, args } => {
                write!(f, "{}(", target)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                f.write_str(")")
            }
            Node::AssignStmt { target, value } => write!(f, "{} = {}", target, value),
            Node::IfStmt { condition, .. } => write!(f, "if ({}) {{ ... }}", condition),
            Node::ReturnStmt(values) => match values.as_slice() {
                [] => f.write_str("return"),
                [value] => write!(f, "return {}", value),
                values => {
                    f.write_str("return ")?;
                    for (i, value) in values.iter().enumerate() {
                        if i > 0 {
                            f.write_str(", ")?;
                        }
                        write!(f, "{}", value)?;
                    }
                    Ok(())
                }
            },
            Node::Goto(address) => write!(f, "goto {}", label_name(*address)),
            Node::ExprStmt(expr) => write!(f, "{}", expr),
            Node::Comment(text) => write!(f, "/* {} */", text),
            Node::Declaration(var) => f.write_str(&var.c_declaration()),
        }
    }
}

/// Label naming scheme shared by `goto` statements and block headers
pub fn label_name(address: u32) -> String {
    format!("label_{:04X}", address)
}
