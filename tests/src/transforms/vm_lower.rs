//! Semantic preservation: a lowered procedure must compute exactly what the
//! reference evaluator computes for the original blocks, across every flag
//! combination.

use rand::rngs::StdRng;
use rand::SeedableRng;
use vmcloak_core::decoder::decode;
use vmcloak_core::{run_bytecode_with_args, Value, Vm};
use vmcloak_ir::eval::eval_procedure;
use vmcloak_ir::{BinOp, Constant, FunctionBuilder, Module, Procedure, Type};
use vmcloak_transforms::vm_lower::{lower_procedure, LowerFlags, VmLower};
use vmcloak_transforms::{PassConfig, Transform};

const FLAG_SETS: [LowerFlags; 4] = [
    LowerFlags::empty(),
    LowerFlags::TYPE_CHECK,
    LowerFlags::TYPE_CHECK
        .union(LowerFlags::CLEAR_DEAD_REGS)
        .union(LowerFlags::POLY_INSTRUCTION),
    LowerFlags::TYPE_CHECK
        .union(LowerFlags::CLEAR_DEAD_REGS)
        .union(LowerFlags::POLY_INSTRUCTION)
        .union(LowerFlags::RANDOM_REG_MAPPING),
];

/// Void procedures return `undef` through the uniform return protocol.
fn normalize(result: Option<Value>) -> Option<Value> {
    match result {
        Some(Value::Undef) => None,
        other => other,
    }
}

fn check_preserved(proc: &Procedure, inputs: &[Vec<Value>]) {
    for flags in FLAG_SETS {
        let mut rng = StdRng::seed_from_u64(0xc10a);
        let bytecode = lower_procedure(proc, flags, &mut rng)
            .unwrap_or_else(|e| panic!("{}: lowering failed: {e}", proc.name));
        let program = decode(&bytecode)
            .unwrap_or_else(|e| panic!("{}: emitted stream must decode: {e}", proc.name));

        for args in inputs {
            let expected = normalize(eval_procedure(proc, args).unwrap());

            let mut vm = Vm::new();
            vm.push_args(args);
            let got = normalize(vm.execute(&program).unwrap_or_else(|e| {
                panic!("{}: vm failed on {args:?} with flags {flags:?}: {e}", proc.name)
            }));

            assert_eq!(
                got, expected,
                "{} diverged on {args:?} with flags {flags:?}",
                proc.name
            );
            assert_eq!(vm.stack_depth(), 0, "{}: stack not drained", proc.name);
        }
    }
}

fn i32s(values: &[i32]) -> Vec<Vec<Value>> {
    values.iter().map(|v| vec![Value::I32(*v)]).collect()
}

#[test]
fn arithmetic_with_repeated_operands() {
    // (a + b) * a - b
    let mut b = FunctionBuilder::new("mix", &[Type::I64, Type::I64], Some(Type::I64));
    let entry = FunctionBuilder::ENTRY;
    let sum = b.binary(
        entry,
        BinOp::Add,
        Type::I64,
        b.param(0).into(),
        b.param(1).into(),
    );
    let prod = b.binary(entry, BinOp::Mul, Type::I64, sum.into(), b.param(0).into());
    let out = b.binary(entry, BinOp::Sub, Type::I64, prod.into(), b.param(1).into());
    b.ret(entry, Some(out.into()));
    let proc = b.finish();

    check_preserved(
        &proc,
        &[
            vec![Value::I64(3), Value::I64(4)],
            vec![Value::I64(-7), Value::I64(11)],
            vec![Value::I64(0), Value::I64(0)],
            vec![Value::I64(i64::MAX), Value::I64(1)],
        ],
    );
}

#[test]
fn conditional_with_phi() {
    // if p != 0 { p + 1 } else { p - 1 }
    let mut b = FunctionBuilder::new("sel", &[Type::I32], Some(Type::I32));
    let entry = FunctionBuilder::ENTRY;
    let then_bb = b.create_block();
    let else_bb = b.create_block();
    let join = b.create_block();
    b.cond_br(entry, b.param(0).into(), then_bb, else_bb);
    let inc = b.binary(
        then_bb,
        BinOp::Add,
        Type::I32,
        b.param(0).into(),
        Constant::I32(1).into(),
    );
    b.br(then_bb, join);
    let dec = b.binary(
        else_bb,
        BinOp::Sub,
        Type::I32,
        b.param(0).into(),
        Constant::I32(1).into(),
    );
    b.br(else_bb, join);
    let merged = b.phi(
        join,
        Type::I32,
        vec![(then_bb, inc.into()), (else_bb, dec.into())],
    );
    b.ret(join, Some(merged.into()));
    let proc = b.finish();

    check_preserved(&proc, &i32s(&[0, 1, -5, 42]));
}

#[test]
fn branch_edges_into_phi_blocks_are_split() {
    // Both CondBr targets start with phis, forcing per-edge stubs.
    let mut b = FunctionBuilder::new("stubs", &[Type::I32], Some(Type::I32));
    let entry = FunctionBuilder::ENTRY;
    let then_bb = b.create_block();
    let else_bb = b.create_block();
    b.cond_br(entry, b.param(0).into(), then_bb, else_bb);
    let t = b.phi(then_bb, Type::I32, vec![(entry, Constant::I32(5).into())]);
    b.ret(then_bb, Some(t.into()));
    let e = b.phi(else_bb, Type::I32, vec![(entry, Constant::I32(7).into())]);
    b.ret(else_bb, Some(e.into()));
    let proc = b.finish();

    check_preserved(&proc, &i32s(&[0, 1]));
}

#[test]
fn loop_with_phis() {
    // sum of 1..=n by counting down
    let mut b = FunctionBuilder::new("tri", &[Type::I32], Some(Type::I32));
    let entry = FunctionBuilder::ENTRY;
    let header = b.create_block();
    let body = b.create_block();
    let exit = b.create_block();

    b.br(entry, header);
    let i = b.phi(header, Type::I32, vec![(entry, b.param(0).into())]);
    let sum = b.phi(header, Type::I32, vec![(entry, Constant::I32(0).into())]);
    b.cond_br(header, i.into(), body, exit);

    let sum2 = b.binary(body, BinOp::Add, Type::I32, sum.into(), i.into());
    let i2 = b.binary(body, BinOp::Sub, Type::I32, i.into(), Constant::I32(1).into());
    b.br(body, header);
    b.add_incoming(header, i, body, i2.into());
    b.add_incoming(header, sum, body, sum2.into());

    b.ret(exit, Some(sum.into()));
    let proc = b.finish();

    check_preserved(&proc, &i32s(&[0, 1, 4, 10]));
}

#[test]
fn memory_static_dynamic_and_offsets() {
    let mut b = FunctionBuilder::new("mem", &[Type::I32], Some(Type::I32));
    let entry = FunctionBuilder::ENTRY;

    // Static slot at offset 0, a second value 8 bytes in.
    let slot = b.alloca(entry, 16);
    b.store(entry, slot.into(), b.param(0).into());
    let off = b.binary(
        entry,
        BinOp::Add,
        Type::Ptr,
        slot.into(),
        Constant::I64(8).into(),
    );
    b.store(entry, off.into(), Constant::I32(100).into());

    // Dynamically sized slot.
    let dynamic = b.alloca_dyn(entry, Constant::I64(4).into());
    b.store(entry, dynamic.into(), Constant::I32(1000).into());

    let a = b.load(entry, Type::I32, slot.into());
    let c = b.load(entry, Type::I32, off.into());
    let d = b.load(entry, Type::I32, dynamic.into());
    let ac = b.binary(entry, BinOp::Add, Type::I32, a.into(), c.into());
    let out = b.binary(entry, BinOp::Add, Type::I32, ac.into(), d.into());
    b.ret(entry, Some(out.into()));
    let proc = b.finish();

    check_preserved(&proc, &i32s(&[0, 7, -1]));
}

#[test]
fn calls_match_the_default_resolver() {
    let mut b = FunctionBuilder::new("caller", &[Type::I32], Some(Type::I32));
    let entry = FunctionBuilder::ENTRY;
    let t = b
        .call(
            entry,
            "external_fn",
            vec![b.param(0).into(), Constant::I32(9).into()],
            Some(Type::I32),
        )
        .unwrap();
    b.call(entry, "log_fn", vec![b.param(0).into()], None);
    let out = b.binary(
        entry,
        BinOp::Add,
        Type::I32,
        t.into(),
        Constant::I32(5).into(),
    );
    b.ret(entry, Some(out.into()));
    let proc = b.finish();

    check_preserved(&proc, &i32s(&[3]));
}

#[test]
fn float_arithmetic() {
    let mut b = FunctionBuilder::new("fp", &[Type::F64, Type::F64], Some(Type::F64));
    let entry = FunctionBuilder::ENTRY;
    let prod = b.binary(
        entry,
        BinOp::Mul,
        Type::F64,
        b.param(0).into(),
        b.param(1).into(),
    );
    let quot = b.binary(
        entry,
        BinOp::Div,
        Type::F64,
        b.param(0).into(),
        b.param(1).into(),
    );
    let out = b.binary(entry, BinOp::Add, Type::F64, prod.into(), quot.into());
    b.ret(entry, Some(out.into()));
    let proc = b.finish();

    check_preserved(
        &proc,
        &[
            vec![Value::F64(1.5), Value::F64(2.0)],
            vec![Value::F64(-3.25), Value::F64(0.5)],
            // IEEE division by zero does not trap.
            vec![Value::F64(1.0), Value::F64(0.0)],
        ],
    );
}

#[test]
fn switch_lowering() {
    let mut b = FunctionBuilder::new("dispatch", &[Type::I32], Some(Type::I32));
    let entry = FunctionBuilder::ENTRY;
    let one = b.create_block();
    let two = b.create_block();
    let three = b.create_block();
    let fallback = b.create_block();
    b.switch(
        entry,
        b.param(0).into(),
        vec![
            (Constant::I32(1), one),
            (Constant::I32(2), two),
            (Constant::I32(3), three),
        ],
        fallback,
    );
    b.ret(one, Some(Constant::I32(10).into()));
    b.ret(two, Some(Constant::I32(20).into()));
    b.ret(three, Some(Constant::I32(30).into()));
    b.ret(fallback, Some(Constant::I32(0).into()));
    let proc = b.finish();

    check_preserved(&proc, &i32s(&[1, 2, 3, 4, 0, -1]));
}

#[test]
fn switch_feeding_a_phi_join() {
    let mut b = FunctionBuilder::new("joined", &[Type::I32], Some(Type::I32));
    let entry = FunctionBuilder::ENTRY;
    let small = b.create_block();
    let large = b.create_block();
    let join = b.create_block();
    b.switch(
        entry,
        b.param(0).into(),
        vec![(Constant::I32(1), small), (Constant::I32(2), small)],
        large,
    );
    b.br(small, join);
    b.br(large, join);
    let merged = b.phi(
        join,
        Type::I32,
        vec![
            (small, Constant::I32(111).into()),
            (large, Constant::I32(222).into()),
        ],
    );
    b.ret(join, Some(merged.into()));
    let proc = b.finish();

    check_preserved(&proc, &i32s(&[1, 2, 3]));
}

#[test]
fn void_procedures_use_the_uniform_return_protocol() {
    let mut b = FunctionBuilder::new("effect", &[Type::I32], None);
    let entry = FunctionBuilder::ENTRY;
    let slot = b.alloca(entry, 4);
    b.store(entry, slot.into(), b.param(0).into());
    b.ret(entry, None);
    let proc = b.finish();

    check_preserved(&proc, &i32s(&[9]));
}

#[test]
fn unreachable_blocks_are_dropped() {
    let mut b = FunctionBuilder::new("orphaned", &[], Some(Type::I32));
    let entry = FunctionBuilder::ENTRY;
    let orphan = b.create_block();
    b.ret(entry, Some(Constant::I32(3).into()));
    b.ret(orphan, Some(Constant::I32(99).into()));
    let proc = b.finish();

    let mut rng = StdRng::seed_from_u64(1);
    let bytecode = lower_procedure(&proc, LowerFlags::default(), &mut rng).unwrap();
    assert_eq!(
        run_bytecode_with_args(&bytecode, &[], false).unwrap(),
        Some(Value::I32(3))
    );
    check_preserved(&proc, &[vec![]]);
}

#[test]
fn peak_stack_depth_stays_bounded() {
    // ((((p + 1) + p) + p) + p): a single chained accumulator never needs
    // more than the accumulator plus one operand on the stack, plus the
    // argument present at entry.
    let mut b = FunctionBuilder::new("deep", &[Type::I32], Some(Type::I32));
    let entry = FunctionBuilder::ENTRY;
    let mut acc = b.binary(
        entry,
        BinOp::Add,
        Type::I32,
        b.param(0).into(),
        Constant::I32(1).into(),
    );
    for _ in 0..10 {
        acc = b.binary(entry, BinOp::Add, Type::I32, acc.into(), b.param(0).into());
    }
    b.ret(entry, Some(acc.into()));
    let proc = b.finish();

    let mut rng = StdRng::seed_from_u64(2);
    let bytecode = lower_procedure(&proc, LowerFlags::empty(), &mut rng).unwrap();
    let program = decode(&bytecode).unwrap();

    let mut vm = Vm::new();
    vm.push_args(&[Value::I32(4)]);
    let result = vm.execute(&program).unwrap();
    assert_eq!(result, Some(Value::I32(45)));
    assert!(
        vm.stats().stack_max_depth <= 3,
        "peak depth {} exceeds the live-value bound",
        vm.stats().stack_max_depth
    );
}

#[test]
fn lowering_is_deterministic_per_seed() {
    let build = || {
        let mut b = FunctionBuilder::new("det", &[Type::I32], Some(Type::I32));
        let entry = FunctionBuilder::ENTRY;
        let slot = b.alloca(entry, 8);
        b.store(entry, slot.into(), b.param(0).into());
        let v = b.load(entry, Type::I32, slot.into());
        b.ret(entry, Some(v.into()));
        b.finish()
    };
    let flags = LowerFlags::all();

    let mut rng_a = StdRng::seed_from_u64(99);
    let mut rng_b = StdRng::seed_from_u64(99);
    let a = lower_procedure(&build(), flags, &mut rng_a).unwrap();
    let b = lower_procedure(&build(), flags, &mut rng_b).unwrap();
    assert_eq!(a, b, "same seed must produce identical bytecode");
}

#[test]
fn unsupported_procedures_survive_the_transform_untouched() {
    use vmcloak_ir::{BitOpKind, CastKind};

    let mut module = Module::new("m");

    let mut b = FunctionBuilder::new("bits", &[Type::I32], Some(Type::I32));
    let entry = FunctionBuilder::ENTRY;
    let v = b.bit(
        entry,
        BitOpKind::Xor,
        Type::I32,
        b.param(0).into(),
        Constant::I32(0x55).into(),
    );
    b.ret(entry, Some(v.into()));
    module.procedures.push(b.finish());

    let mut b = FunctionBuilder::new("widen", &[Type::I32], Some(Type::I64));
    let entry = FunctionBuilder::ENTRY;
    let v = b.cast(entry, CastKind::SExt, Type::I64, b.param(0).into());
    b.ret(entry, Some(v.into()));
    module.procedures.push(b.finish());

    let mut b = FunctionBuilder::new("plain", &[], Some(Type::I32));
    b.ret(FunctionBuilder::ENTRY, Some(Constant::I32(1).into()));
    module.procedures.push(b.finish());

    let before = module.clone();
    let transform = VmLower::new(PassConfig::default());
    let mut rng = StdRng::seed_from_u64(5);
    let changed = transform.apply(&mut module, &mut rng).unwrap();

    assert!(changed);
    assert_eq!(module.procedure("bits"), before.procedure("bits"));
    assert_eq!(module.procedure("widen"), before.procedure("widen"));
    assert!(module.procedure("plain").unwrap().is_virtualized());
}
