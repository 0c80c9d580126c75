use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ragescript::script::instruction::{BinaryOperator, Instruction};
use ragescript::script::{DecompileOptions, Decoder, Machine};
use ragescript::Arch;

/// Guarded arithmetic blocks, each branching forward and looping back to
/// the entry
fn looping_program(blocks: u32) -> Vec<Instruction> {
    let mut code = Vec::new();
    for i in 0..blocks {
        let base = i * 10;
        code.push(Instruction::push_int(base, i as i32));
        code.push(Instruction::push_int(base + 1, 3));
        code.push(Instruction::binary(base + 2, BinaryOperator::Mul));
        code.push(Instruction::jump_if_false(base + 3, base + 10));
        code.push(Instruction::push_int(base + 6, 0));
        code.push(Instruction::jump_if_false(base + 7, 0));
    }
    code.push(Instruction::ret(blocks * 10, 0));
    code
}

fn decompile_benchmark(c: &mut Criterion) {
    let code = looping_program(200);

    c.bench_function("decompile 200 looping blocks", |b| {
        b.iter(|| {
            Machine::new("bench", black_box(code.clone()), DecompileOptions::default())
                .decompile()
                .unwrap()
        })
    });
}

fn decode_benchmark(c: &mut Criterion) {
    // LOCAL_U8_LOAD 0, PUSH_CONST_1, IADD, LOCAL_U8_STORE 0, repeated
    let body: Vec<u8> = std::iter::repeat([56u8, 0, 111, 1, 57, 0])
        .take(2000)
        .flatten()
        .collect();
    let mut region = (body.len() as u32).to_le_bytes().to_vec();
    region.extend_from_slice(&0u32.to_le_bytes());
    region.extend_from_slice(&body);

    c.bench_function("decode 8000 instructions", |b| {
        b.iter(|| {
            Decoder::new(Arch::Pc, None)
                .decode_all(black_box(&region))
                .unwrap()
        })
    });
}

criterion_group!(benches, decompile_benchmark, decode_benchmark);
criterion_main!(benches);
