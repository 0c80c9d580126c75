//! # Script Decompiler
//!
//! Turns decoded script bytecode into readable pseudo-C.
//!
//! ## Pipeline
//!
//! 1. [`decoder::Decoder`] lifts the bytecode region into [`Instruction`]s
//! 2. [`machine::Machine`] splits them into [`Function`]s at each prologue
//! 3. Each function discovers its basic blocks ([`cfg`]) from the entry
//! 4. Blocks are interpreted once against the persistent [`stack::OperandStack`]
//! 5. Types are inferred from return sites and variable usage
//! 6. [`ScriptFile::render`] prints the result
//!
//! ## Example
//!
//! ```rust
//! use ragescript::script::{DecompileOptions, Machine};
//! use ragescript::script::instruction::{BinaryOperator, Instruction};
//!
//! let code = vec![
//!     Instruction::push_int(0, 1),
//!     Instruction::push_int(1, 2),
//!     Instruction::binary(2, BinaryOperator::Add),
//!     Instruction::ret(3, 1),
//! ];
//! let file = Machine::new("demo", code, DecompileOptions::default())
//!     .decompile()
//!     .unwrap();
//! assert!(file.render().contains("return 1 + 2;"));
//! ```

pub mod ast;
pub mod cfg;
pub mod decoder;
pub mod function;
pub mod instruction;
pub mod machine;
pub mod natives;
pub mod stack;
pub mod stream;

pub use ast::{DataType, Node, Variable};
pub use decoder::Decoder;
pub use function::Function;
pub use instruction::{Instruction, InstructionKind, Operands};
pub use machine::Machine;
pub use natives::NativeDb;

use crate::Result;
use std::fmt;
use std::path::PathBuf;

/// Decompilation options
#[derive(Debug, Clone, Default)]
pub struct DecompileOptions {
    /// Prefix every block with a comment holding its start address
    pub show_addresses: bool,
    /// Natives dictionary used to name native calls
    pub natives_path: Option<PathBuf>,
    /// Hash translation table paired with the natives dictionary
    pub translation_path: Option<PathBuf>,
}

/// A fully decompiled script
#[derive(Debug, Clone)]
pub struct ScriptFile {
    /// Script name
    pub name: String,
    /// Functions in address order
    pub functions: Vec<Function>,
    /// Recoverable problems met while decompiling
    pub warnings: Vec<String>,
}

impl DecompileOptions {
    /// Load the native name database named by these options
    ///
    /// Returns `None` when either path is unset.
    pub fn load_natives(&self) -> Result<Option<NativeDb>> {
        match (&self.natives_path, &self.translation_path) {
            (Some(natives), Some(translation)) => NativeDb::load(natives, translation).map(Some),
            _ => Ok(None),
        }
    }
}

impl ScriptFile {
    /// Render every function, separated by blank lines
    pub fn render(&self) -> String {
        self.functions
            .iter()
            .map(Function::render)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Function with this identifier
    pub fn function(&self, identifier: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.identifier == identifier)
    }
}

impl fmt::Display for ScriptFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_separates_functions() {
        let code = vec![
            Instruction::enter(0, 0, 2),
            Instruction::ret(5, 0),
            Instruction::enter(7, 0, 2),
            Instruction::ret(12, 0),
        ];
        let file = Machine::new("two", code, DecompileOptions::default())
            .decompile()
            .unwrap();
        assert_eq!(
            file.render(),
            "void func_0() {\n\treturn;\n}\n\nvoid func_1() {\n\treturn;\n}\n"
        );
        assert!(file.function("func_1").is_some());
        assert!(file.warnings.is_empty());
    }

    #[test]
    fn test_show_addresses() {
        let options = DecompileOptions {
            show_addresses: true,
            ..Default::default()
        };
        let file = Machine::new("a", vec![Instruction::ret(0, 0)], options)
            .decompile()
            .unwrap();
        assert!(file.render().contains("\t// block 0x000000\n"));
    }

    #[test]
    fn test_load_natives_from_options() {
        use std::io::Write;

        assert!(DecompileOptions::default().load_natives().unwrap().is_none());

        let mut natives = tempfile::NamedTempFile::new().unwrap();
        natives
            .write_all(br#"{"SYSTEM": {"0x10": {"name": "WAIT"}}}"#)
            .unwrap();
        let translation = tempfile::NamedTempFile::new().unwrap();
        let options = DecompileOptions {
            natives_path: Some(natives.path().to_path_buf()),
            translation_path: Some(translation.path().to_path_buf()),
            ..Default::default()
        };
        let db = options.load_natives().unwrap().unwrap();
        assert_eq!(db.resolve(0x10), Some("WAIT"));

        let missing = DecompileOptions {
            natives_path: Some("/nonexistent/natives.json".into()),
            ..options
        };
        assert!(matches!(
            missing.load_natives(),
            Err(crate::Error::NativeDb(_))
        ));
    }
}
