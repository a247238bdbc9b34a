//! End-to-end interpreter scenarios over encoded byte streams.

use vmcloak_core::decoder::decode;
use vmcloak_core::encoder::encode;
use vmcloak_core::hashing::symbol_hash;
use vmcloak_core::instr::{BitOp, Instr};
use vmcloak_core::{run_bytecode, Program, Value, Vm, VmError};
use vmcloak_utils::errors::ExecError;

fn run(instrs: &[Instr]) -> Result<Option<Value>, VmError> {
    run_bytecode(&encode(instrs), false)
}

#[test]
fn scenario_identity_i32() {
    let result = run(&[
        Instr::Push {
            value: Value::I32(7),
        },
        Instr::Ret,
    ])
    .unwrap();
    assert_eq!(result, Some(Value::I32(7)));
}

#[test]
fn scenario_arithmetic() {
    let result = run(&[
        Instr::Push {
            value: Value::I64(3),
        },
        Instr::Push {
            value: Value::I64(4),
        },
        Instr::Add {
            nsw: false,
            nuw: false,
        },
        Instr::Ret,
    ])
    .unwrap();
    assert_eq!(result, Some(Value::I64(7)));
}

#[test]
fn scenario_conditional() {
    let l1 = symbol_hash("L1");
    let l2 = symbol_hash("L2");
    let result = run(&[
        Instr::Push {
            value: Value::I1(false),
        },
        Instr::JumpIfNot { target: l1 },
        Instr::Push {
            value: Value::I32(1),
        },
        Instr::Jump { target: l2 },
        Instr::Label { label: l1 },
        Instr::Push {
            value: Value::I32(2),
        },
        Instr::Label { label: l2 },
        Instr::Ret,
    ])
    .unwrap();
    assert_eq!(result, Some(Value::I32(2)));
}

#[test]
fn scenario_heap_roundtrip() {
    let result = run(&[
        Instr::Alloca { size: 4 },
        Instr::Dup,
        Instr::Push {
            value: Value::I32(0x41424344),
        },
        Instr::Swap,
        Instr::StoreValue,
        Instr::LoadValue,
        Instr::Ret,
    ])
    .unwrap();
    assert_eq!(result, Some(Value::I32(0x41424344)));
}

#[test]
fn scenario_div_by_zero() {
    let err = run(&[
        Instr::Push {
            value: Value::I32(10),
        },
        Instr::Push {
            value: Value::I32(0),
        },
        Instr::Div,
        Instr::Ret,
    ])
    .unwrap_err();
    // The failing pc is the Div instruction.
    assert!(matches!(err, VmError::Exec(ExecError::DivByZero { at: 2 })));
}

#[test]
fn scenario_type_check_trips() {
    let err = run(&[
        Instr::Push {
            value: Value::I32(1),
        },
        Instr::TypeCheckInt { width: 64 },
        Instr::Ret,
    ])
    .unwrap_err();
    assert!(matches!(
        err,
        VmError::Exec(ExecError::TypeCheckFailed {
            expected: 64,
            found: 32,
            at: 1
        })
    ));
}

/// Minimal reproducer per run-time error kind, at the documented site.
#[test]
fn exec_errors_are_deterministic() {
    let cases: Vec<(Vec<Instr>, fn(&ExecError) -> bool)> = vec![
        (vec![Instr::Pop], |e| {
            matches!(e, ExecError::StackUnderflow { at: 0 })
        }),
        (vec![Instr::PushFromReg { reg: 9 }], |e| {
            matches!(e, ExecError::UnknownRegister { reg: 9, at: 0 })
        }),
        (
            vec![
                Instr::Push {
                    value: Value::I32(1),
                },
                Instr::Push {
                    value: Value::I64(1),
                },
                Instr::Add {
                    nsw: false,
                    nuw: false,
                },
            ],
            |e| matches!(e, ExecError::TypeMismatch { at: 2, .. }),
        ),
        (
            vec![
                Instr::Push {
                    value: Value::I16(1),
                },
                Instr::Push {
                    value: Value::I16(0),
                },
                Instr::Div,
            ],
            |e| matches!(e, ExecError::DivByZero { at: 2 }),
        ),
        (
            vec![
                Instr::Push {
                    value: Value::Ptr(0xdead_0000),
                },
                Instr::LoadValue,
            ],
            |e| matches!(e, ExecError::OutOfBounds { at: 1, .. }),
        ),
        (
            vec![
                Instr::Push {
                    value: Value::F32(1.0),
                },
                Instr::TypeCheckInt { width: 32 },
            ],
            |e| matches!(e, ExecError::TypeCheckFailed { at: 1, .. }),
        ),
        (vec![Instr::Bit { op: BitOp::And }], |e| {
            matches!(e, ExecError::NotImplemented { at: 0, .. })
        }),
    ];

    for (instrs, check) in cases {
        for _ in 0..2 {
            match run(&instrs) {
                Err(VmError::Exec(e)) => assert!(check(&e), "unexpected error {e}"),
                other => panic!("expected an execution error, got {other:?}"),
            }
        }
    }
}

#[test]
fn unknown_label_is_a_runtime_error_for_handmade_programs() {
    // Decode rejects unresolved jumps, so reach the interpreter check by
    // constructing the program directly.
    let program = Program {
        instrs: vec![Instr::Jump { target: 0xf00d }],
        labels: Default::default(),
    };
    let err = Vm::new().execute(&program).unwrap_err();
    assert!(matches!(
        err,
        ExecError::UnknownLabel {
            label: 0xf00d,
            at: 0
        }
    ));
}

#[test]
fn stack_is_empty_after_return() {
    let program = decode(&encode(&[
        Instr::Push {
            value: Value::I32(1),
        },
        Instr::Push {
            value: Value::I32(2),
        },
        Instr::Add {
            nsw: false,
            nuw: false,
        },
        Instr::Ret,
    ]))
    .unwrap();
    let mut vm = Vm::new();
    let result = vm.execute(&program).unwrap();
    assert_eq!(result, Some(Value::I32(3)));
    assert_eq!(vm.stack_depth(), 0);
    assert_eq!(vm.stats().stack_max_depth, 2);
}

#[test]
fn debug_mode_reports_statistics() {
    // Debug output goes to the diagnostic sink; here we only assert it does
    // not disturb execution.
    let result = run_bytecode(
        &encode(&[
            Instr::Push {
                value: Value::I64(5),
            },
            Instr::Dup,
            Instr::Mul,
            Instr::Ret,
        ]),
        true,
    )
    .unwrap();
    assert_eq!(result, Some(Value::I64(25)));
}
