//! End-to-end decompilation tests
//!
//! Covers the interpretation rules, block discovery, join handling and the
//! full container -> decoder -> machine pipeline.

use ragescript::resource::{Arch, Container};
use ragescript::script::ast::{DataType, Declarations, Variable};
use ragescript::script::instruction::{BinaryOperator, Instruction};
use ragescript::script::{DecompileOptions, Decoder, Function, Machine, NativeDb};
use std::collections::HashSet;
use std::io::Write;

fn decompile(code: Vec<Instruction>) -> ragescript::ScriptFile {
    Machine::new("test", code, DecompileOptions::default())
        .decompile()
        .unwrap()
}

// =============================================================================
// EXPRESSIONS AND RETURNS
// =============================================================================

#[test]
fn test_constant_addition() {
    let file = decompile(vec![
        Instruction::push_int(0, 1),
        Instruction::push_int(1, 2),
        Instruction::binary(2, BinaryOperator::Add),
        Instruction::ret(3, 1),
    ]);
    assert_eq!(file.render(), "int main() {\n\treturn 1 + 2;\n}\n");
    assert_eq!(file.functions[0].return_type(), DataType::Int);
}

#[test]
fn test_void_return() {
    let file = decompile(vec![Instruction::ret(0, 0)]);
    assert_eq!(file.render(), "void main() {\n\treturn;\n}\n");
}

#[test]
fn test_underflow_renders_sentinel() {
    let file = decompile(vec![Instruction::ret(0, 1)]);
    assert!(file.render().contains("\treturn 0xBABE;\n"));
    assert_eq!(file.functions[0].return_type(), DataType::Int);
    assert!(file.warnings.iter().any(|w| w.contains("underflow")));
}

#[test]
fn test_typed_inputs_add() {
    let mut function = Function::new(
        "f",
        vec![
            Instruction::load_local(0, 0),
            Instruction::load_local(1, 1),
            Instruction::binary(2, BinaryOperator::Add),
            Instruction::ret(3, 1),
        ],
    );
    let mut inputs = Declarations::new();
    inputs.push(Variable::typed("a", DataType::Int));
    inputs.push(Variable::typed("b", DataType::Int));
    function.inputs = inputs;

    let mut machine = Machine::new("test", Vec::new(), DecompileOptions::default());
    machine.decompile_function(&mut function).unwrap();

    assert_eq!(function.return_type(), DataType::Int);
    assert_eq!(
        function.render(),
        "int f(int a, int b) {\n\treturn a + b;\n}\n"
    );
}

#[test]
fn test_multi_value_return_is_fatal() {
    let result = Machine::new(
        "test",
        vec![
            Instruction::push_int(0, 1),
            Instruction::push_int(1, 2),
            Instruction::ret(2, 2),
        ],
        DecompileOptions::default(),
    )
    .decompile();
    assert!(matches!(
        result,
        Err(ragescript::Error::UnsupportedReturnArity { count: 2, .. })
    ));
}

#[test]
fn test_conflicting_return_types_are_fatal() {
    let result = Machine::new(
        "test",
        vec![
            Instruction::load_local(0, 0),
            Instruction::jump_if_false(1, 6),
            Instruction::push_int(4, 1),
            Instruction::ret(5, 1),
            Instruction::push_float(6, 1.0),
            Instruction::ret(7, 1),
        ],
        DecompileOptions::default(),
    )
    .decompile();
    assert!(matches!(
        result,
        Err(ragescript::Error::ReturnTypeConflict { .. })
    ));
}

fn decompile_with_inputs(inputs: usize, code: Vec<Instruction>) -> ragescript::Result<Function> {
    let mut function = Function::new("f", code);
    function.inputs = Declarations::numbered("a", inputs);
    let mut machine = Machine::new("test", Vec::new(), DecompileOptions::default());
    machine.decompile_function(&mut function)?;
    Ok(function)
}

#[test]
fn test_value_and_void_returns_conflict() {
    // if (a0) return a0; else return;
    let result = decompile_with_inputs(
        1,
        vec![
            Instruction::load_local(0, 0),
            Instruction::jump_if_false(1, 6),
            Instruction::load_local(4, 0),
            Instruction::ret(5, 1),
            Instruction::ret(6, 0),
        ],
    );
    assert!(matches!(
        result,
        Err(ragescript::Error::ReturnArityConflict {
            existing: 1,
            found: 0,
            ..
        })
    ));
}

#[test]
fn test_return_conflict_found_by_usage_inference() {
    // if (a0) { a0 = 1; return a0; } a1 = 1.5; return a1;
    let result = decompile_with_inputs(
        2,
        vec![
            Instruction::load_local(0, 0),
            Instruction::jump_if_false(1, 9),
            Instruction::push_int(4, 1),
            Instruction::store_local(5, 0),
            Instruction::load_local(7, 0),
            Instruction::ret(8, 1),
            Instruction::push_float(9, 1.5),
            Instruction::store_local(10, 1),
            Instruction::load_local(12, 1),
            Instruction::ret(13, 1),
        ],
    );
    assert!(matches!(
        result,
        Err(ragescript::Error::ReturnTypeConflict { .. })
    ));
}

#[test]
fn test_usage_inference_settles_return_type() {
    let function = decompile_with_inputs(
        1,
        vec![
            Instruction::push_int(0, 4),
            Instruction::store_local(1, 0),
            Instruction::load_local(3, 0),
            Instruction::ret(4, 1),
        ],
    )
    .unwrap();
    assert_eq!(function.return_type(), DataType::Int);
    assert!(function.render().starts_with("int f(int a0) {
"));
}

// =============================================================================
// CONTROL FLOW
// =============================================================================

#[test]
fn test_join_mismatch_is_recoverable() {
    let file = decompile(vec![
        Instruction::push_int(0, 1),
        Instruction::jump_if_false(1, 5),
        Instruction::push_int(4, 9),
        Instruction::ret(5, 0),
    ]);
    assert!(file.warnings.iter().any(|w| w.contains("stack mismatch")));

    let text = file.render();
    assert!(text.contains("label_0005:\n\treturn;\n"));
}

#[test]
fn test_join_keeps_fall_through_stack() {
    // if (!1) goto 8; push 10; goto 9; 8: push 20; 9: return top
    let file = decompile(vec![
        Instruction::push_int(0, 1),
        Instruction::jump_if_false(1, 8),
        Instruction::push_int(4, 10),
        Instruction::jump(5, 9),
        Instruction::push_int(8, 20),
        Instruction::ret(9, 1),
    ]);
    let text = file.render();
    assert!(text.contains("label_0009:\n\treturn 10;\n"));
    assert!(!text.contains("return 20;"));
    assert!(file.warnings.is_empty());
}

#[test]
fn test_loop_visits_each_block_once() {
    let file = decompile(vec![
        Instruction::load_local(0, 0),
        Instruction::jump_if_false(1, 0),
        Instruction::ret(4, 0),
    ]);
    let function = &file.functions[0];
    assert_eq!(function.blocks.len(), 2);

    let text = file.render();
    assert!(text.starts_with("void main() {\nlabel_0000:\n"));
    assert_eq!(text.matches("goto label_0000;").count(), 1);
    assert!(function.blocks[&0].ins.contains(&0));
}

#[test]
fn test_blocks_partition_instructions() {
    let file = decompile(vec![
        Instruction::load_local(0, 0),
        Instruction::jump_if_false(1, 8),
        Instruction::push_int(4, 1),
        Instruction::jump(5, 9),
        Instruction::push_int(8, 2),
        Instruction::ret(9, 1),
    ]);
    let function = &file.functions[0];

    let mut seen = HashSet::new();
    for block in function.blocks.values() {
        for index in block.window.clone() {
            assert!(seen.insert(index), "instruction {} in two blocks", index);
        }
    }
    assert_eq!(seen.len(), 6);

    for (address, block) in &function.blocks {
        for succ in &block.outs {
            assert!(function.blocks[succ].ins.contains(address));
        }
    }
}

#[test]
fn test_switch_renders_case_gotos() {
    use ragescript::script::instruction::{InstructionKind, Operands, SwitchCase};

    let file = decompile(vec![
        Instruction::push_int(0, 2),
        Instruction::new(
            1,
            InstructionKind::Switch,
            Operands::Switch(vec![
                SwitchCase { value: 1, target: 20 },
                SwitchCase { value: 2, target: 21 },
            ]),
        ),
        Instruction::ret(14, 0),
        Instruction::ret(20, 0),
        Instruction::ret(21, 0),
    ]);
    let text = file.render();
    assert!(text.contains("\tif (2 == 1) {\n\t\tgoto label_0014;\n\t}\n"));
    assert!(text.contains("\tif (2 == 2) {\n\t\tgoto label_0015;\n\t}\n"));
    assert!(text.contains("label_0014:\n"));
}

#[test]
fn test_output_is_deterministic() {
    let code = vec![
        Instruction::load_local(0, 0),
        Instruction::jump_if_false(1, 8),
        Instruction::push_int(4, 1),
        Instruction::jump(5, 9),
        Instruction::push_int(8, 2),
        Instruction::ret(9, 1),
    ];
    let first = decompile(code.clone()).render();
    let second = decompile(code).render();
    assert_eq!(first, second);
}

// =============================================================================
// FULL PIPELINE
// =============================================================================

const NATIVES: &str = r#"{ "SYSTEM": { "0x4EDE34FBADD967A6": { "name": "WAIT" } } }"#;

fn pc_script(natives: &[u64], code: &[u8]) -> Vec<u8> {
    let mut data = b"RSC7".to_vec();
    data.extend_from_slice(&10u32.to_le_bytes());
    data.extend_from_slice(&0u32.to_le_bytes());
    data.extend_from_slice(&0u32.to_le_bytes());
    data.extend_from_slice(&(code.len() as u32).to_le_bytes());
    data.extend_from_slice(&(natives.len() as u32).to_le_bytes());
    for hash in natives {
        data.extend_from_slice(&hash.to_le_bytes());
    }
    data.extend_from_slice(code);
    data
}

#[test]
fn test_container_to_pseudo_c() {
    let code = [
        45, 0, 3, 0, 5, b'm', b'a', b'i', b'n', 0, // ENTER 0 args, frame 3, "main"
        37, 100, // PUSH_CONST_U8 100
        44, 1 << 2, 0, 0, // NATIVE 1 arg, no returns, index 0
        115, // PUSH_CONST_5
        57, 2, // LOCAL_U8_STORE 2
        46, 0, 0, // LEAVE 0 0
    ];
    let data = pc_script(&[0x4EDE34FBADD967A6], &code);

    let mut script = tempfile::NamedTempFile::new().unwrap();
    script.write_all(&data).unwrap();
    let arch = Arch::from_path("scripts/main.ysc").unwrap();

    let bytes = std::fs::read(script.path()).unwrap();
    let container = Container::unpack(&bytes, "main.ysc", bytes.len() as u32, arch).unwrap();
    let db = NativeDb::parse(NATIVES, &[]).unwrap();
    let instrs = Decoder::new(arch, Some(&db))
        .decode_all(container.region())
        .unwrap();

    let file = Machine::new("main.ysc", instrs, DecompileOptions::default())
        .decompile()
        .unwrap();
    assert_eq!(
        file.render(),
        "void main() {\n\tint l0;\n\n\tWAIT(100);\n\tl0 = 5;\n\treturn;\n}\n"
    );
}

#[test]
fn test_pipeline_without_native_names() {
    let code = [44, 1 << 2, 0, 0, 46, 0, 0];
    let data = pc_script(&[0x4EDE34FBADD967A6], &code);
    let container = Container::unpack(&data, "x.ysc", data.len() as u32, Arch::Pc).unwrap();
    let instrs = Decoder::new(Arch::Pc, None)
        .decode_all(container.region())
        .unwrap();
    let file = Machine::new("x.ysc", instrs, DecompileOptions::default())
        .decompile()
        .unwrap();

    let text = file.render();
    assert!(text.contains("native_0x4EDE34FBADD967A6(0xBABE);"));
    assert!(file.warnings.iter().any(|w| w.contains("underflow")));
}
