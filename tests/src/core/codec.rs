//! Codec properties: header handling and encode/decode round-trips over the
//! whole operand grammar.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use vmcloak_core::decoder::decode;
use vmcloak_core::encoder::encode;
use vmcloak_core::instr::{BitOp, CmpPred, Instr};
use vmcloak_core::{Value, VmError};
use vmcloak_utils::errors::DecodeError;

#[test]
fn header_starts_every_stream() {
    let bytes = encode(&[Instr::Ret]);
    assert_eq!(&bytes[..4], b"VMP1");
    assert_eq!(u32::from_le_bytes(bytes[4..8].try_into().unwrap()), 1);
}

#[test]
fn any_header_mutation_is_rejected() {
    let good = encode(&[Instr::Ret]);
    for byte in 0..8 {
        let mut mutated = good.clone();
        mutated[byte] ^= 0x01;
        assert!(
            matches!(decode(&mutated), Err(DecodeError::BadHeader { .. })),
            "mutation of header byte {byte} must be rejected"
        );
    }
    assert!(decode(&good).is_ok());
}

/// Draws one instruction from the full operand grammar.
fn arbitrary_instr(rng: &mut StdRng) -> Instr {
    let value = |rng: &mut StdRng| match rng.random_range(0..9) {
        0 => Value::Undef,
        1 => Value::I1(rng.random()),
        2 => Value::I8(rng.random()),
        3 => Value::I16(rng.random()),
        4 => Value::I32(rng.random()),
        5 => Value::I64(rng.random()),
        6 => Value::F32(rng.random::<f32>()),
        7 => Value::F64(rng.random::<f64>()),
        _ => Value::Ptr(rng.random()),
    };
    match rng.random_range(0..30) {
        0 => Instr::Push { value: value(rng) },
        1 => Instr::Pop,
        2 => Instr::PopToReg { reg: rng.random() },
        3 => Instr::PushFromReg { reg: rng.random() },
        4 => Instr::ClearReg { reg: rng.random() },
        5 => Instr::Alloca { size: rng.random() },
        6 => Instr::Alloca2,
        7 => Instr::Store {
            address: rng.random(),
        },
        8 => Instr::StoreValue,
        9 => Instr::Load {
            address: rng.random(),
        },
        10 => Instr::LoadValue,
        11 => Instr::Call {
            callee: rng.random(),
            is_void: rng.random(),
            argc: rng.random_range(0..16),
        },
        12 => Instr::Add {
            nsw: rng.random(),
            nuw: rng.random(),
        },
        13 => Instr::Sub,
        14 => Instr::Mul,
        15 => Instr::Div,
        16 => Instr::Nop,
        17 => Instr::Swap,
        18 => Instr::Dup,
        19 => Instr::TypeCheckInt {
            width: rng.random_range(1..128),
        },
        20 => Instr::ICmp {
            pred: [
                CmpPred::Eq,
                CmpPred::Ne,
                CmpPred::Slt,
                CmpPred::Sle,
                CmpPred::Sgt,
                CmpPred::Sge,
                CmpPred::Ult,
                CmpPred::Ule,
                CmpPred::Ugt,
                CmpPred::Uge,
            ][rng.random_range(0..10)],
        },
        21 => Instr::Bit {
            op: [
                BitOp::And,
                BitOp::Or,
                BitOp::Xor,
                BitOp::Shl,
                BitOp::LShr,
                BitOp::AShr,
            ][rng.random_range(0..6)],
        },
        22 => Instr::Trunc {
            target_width: rng.random(),
        },
        23 => Instr::ZExt {
            target_width: rng.random(),
        },
        24 => Instr::SExt {
            target_width: rng.random(),
        },
        25 => Instr::FPToSI {
            target_width: rng.random(),
        },
        26 => Instr::FPToUI {
            target_width: rng.random(),
        },
        27 => Instr::SIToFP {
            is_double: rng.random(),
        },
        28 => Instr::UIToFP {
            is_double: rng.random(),
        },
        _ => Instr::MetaGVar,
    }
}

#[test]
fn random_listings_roundtrip() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    for round in 0..64 {
        let mut instrs = Vec::new();
        // Unique labels so decode's duplicate check stays quiet, with a jump
        // to each so resolution is exercised too.
        for l in 0..rng.random_range(1..5u64) {
            let label = (round as u64) << 32 | l;
            instrs.push(Instr::Label { label });
            instrs.push(Instr::Jump { target: label });
        }
        for _ in 0..rng.random_range(0..40) {
            instrs.push(arbitrary_instr(&mut rng));
        }
        instrs.push(Instr::Ret);

        let program = decode(&encode(&instrs)).expect("round-trip must decode");
        assert_eq!(program.instrs, instrs, "round {round} altered the listing");
        for (label, index) in &program.labels {
            assert_eq!(program.instrs[*index], Instr::Label { label: *label });
        }
    }
}

#[test]
fn float_payloads_roundtrip_bitwise() {
    let instrs = vec![
        Instr::Push {
            value: Value::F32(f32::NAN),
        },
        Instr::Push {
            value: Value::F64(-0.0),
        },
        Instr::Ret,
    ];
    let decoded = decode(&encode(&instrs)).unwrap().instrs;
    match (&decoded[0], &decoded[1]) {
        (Instr::Push { value: Value::F32(a) }, Instr::Push { value: Value::F64(b) }) => {
            assert!(a.is_nan());
            assert_eq!(b.to_bits(), (-0.0f64).to_bits());
        }
        other => panic!("unexpected decode {other:?}"),
    }
}

/// Minimal reproducer per decode-time error kind; rerunning is identical.
#[test]
fn decode_errors_are_deterministic() {
    let cases: Vec<(Vec<u8>, fn(&DecodeError) -> bool)> = vec![
        (b"XMP1\x01\x00\x00\x00".to_vec(), |e| {
            matches!(e, DecodeError::BadHeader { offset: 0, .. })
        }),
        (b"VMP1\x02\x00\x00\x00".to_vec(), |e| {
            matches!(e, DecodeError::BadHeader { offset: 4, .. })
        }),
        (
            {
                let mut b = encode(&[]);
                b.extend_from_slice(&2u16.to_le_bytes()); // PopToReg, no index
                b
            },
            |e| matches!(e, DecodeError::Truncated { .. }),
        ),
        (
            {
                let mut b = encode(&[]);
                b.extend_from_slice(&999u16.to_le_bytes());
                b
            },
            |e| matches!(e, DecodeError::UnknownOpcode { opcode: 999, .. }),
        ),
        (
            {
                let mut b = encode(&[]);
                b.extend_from_slice(&0u16.to_le_bytes()); // Push
                b.push(0xff);
                b
            },
            |e| matches!(e, DecodeError::BadValueTag { tag: 0xff, .. }),
        ),
        (
            encode(&[Instr::Label { label: 3 }, Instr::Label { label: 3 }]),
            |e| matches!(e, DecodeError::DuplicateLabel { label: 3, .. }),
        ),
        (encode(&[Instr::JumpIf { target: 4 }]), |e| {
            matches!(e, DecodeError::UnresolvedJump { label: 4, .. })
        }),
    ];

    for (bytes, check) in cases {
        for _ in 0..2 {
            let err = decode(&bytes).unwrap_err();
            assert!(check(&err), "unexpected error {err}");
        }
    }
}

#[test]
fn decode_errors_surface_through_run() {
    let err = vmcloak_core::run_bytecode(b"nope", false).unwrap_err();
    assert!(matches!(err, VmError::Decode(DecodeError::BadHeader { .. })));
}
