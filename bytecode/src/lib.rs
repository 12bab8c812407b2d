mod abc;
mod builder;
mod decoder;
mod instruction;
mod op;
mod reader;
mod stream;
mod unit_builder;
mod writer;

pub use abc::{
    AbcFile, ClassInfo, ConstValue, ConstantPool, ExceptionInfo, InstanceFlags, InstanceInfo,
    MAJOR_VERSION, MINOR_VERSION, MetadataInfo, MethodBody, MethodFlags, MethodInfo,
    MultinameInfo, NamespaceInfo, NamespaceKindInfo, ScriptInfo, TraitAttributes, TraitData,
    TraitInfo,
};
pub use builder::{BuildError, BytecodeBuilder, Label};
pub use decoder::{BytecodeDecoder, DecodeError, decode_all};
pub use instruction::{Condition, Instruction};
pub use op::Op;
pub use reader::{ReadError, read_abc};
pub use unit_builder::UnitBuilder;
pub use writer::write_abc;

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn encode(instructions: &[Instruction]) -> Vec<u8> {
        let mut b = BytecodeBuilder::new();
        for inst in instructions {
            b.emit(inst).unwrap();
        }
        b.finish().unwrap()
    }

    fn decode(bytes: &[u8]) -> Vec<Instruction> {
        decode_all(bytes)
            .unwrap()
            .into_iter()
            .map(|(_, inst)| inst)
            .collect()
    }

    // ── Instructions ──────────────────────────────────────────────────

    #[test]
    fn encode_decode_operands() {
        let program = vec![
            Instruction::GetLocal { reg: 0 },
            Instruction::PushScope,
            Instruction::GetLocal { reg: 7 },
            Instruction::PushByte { value: -5 },
            Instruction::PushShort { value: -300 },
            Instruction::CallProperty { name: 300, argc: 2 },
            Instruction::GetScopeObject { index: 1 },
            Instruction::HasNext2 {
                object_reg: 2,
                index_reg: 3,
            },
            Instruction::Debug {
                kind: 1,
                name: 4,
                reg: 2,
                extra: 0,
            },
            Instruction::ReturnValue,
        ];
        assert_eq!(decode(&encode(&program)), program);
    }

    #[test]
    fn short_local_forms() {
        let bytes = encode(&[Instruction::GetLocal { reg: 2 }, Instruction::SetLocal { reg: 3 }]);
        assert_eq!(bytes, vec![Op::GetLocal2 as u8, Op::SetLocal3 as u8]);
    }

    #[test]
    fn branch_targets_are_absolute() {
        let mut b = BytecodeBuilder::new();
        let top = b.here();
        b.op(Op::PushTrue);
        let exit = b.new_label();
        b.branch(Op::IfFalse, exit);
        b.jump(top);
        b.bind(exit);
        b.op(Op::ReturnVoid);
        let code = b.finish().unwrap();

        let decoded = decode_all(&code).unwrap();
        assert_eq!(
            decoded,
            vec![
                (0, Instruction::PushTrue),
                (1, Instruction::IfFalse { target: 9 }),
                (5, Instruction::Jump { target: 0 }),
                (9, Instruction::ReturnVoid),
            ]
        );
    }

    #[test]
    fn lookup_switch_offsets_from_instruction_start() {
        let mut b = BytecodeBuilder::new();
        b.emit(&Instruction::PushByte { value: 1 }).unwrap();
        let default = b.new_label();
        let one = b.new_label();
        let two = b.new_label();
        b.lookup_switch(default, &[one, two]);
        b.bind(one);
        b.op(Op::Nop);
        b.bind(two);
        b.op(Op::Nop);
        b.bind(default);
        b.op(Op::ReturnVoid);
        let code = b.finish().unwrap();

        let decoded = decode_all(&code).unwrap();
        match &decoded[2] {
            (2, Instruction::LookupSwitch { default, cases }) => {
                assert_eq!(&cases[..], &[13, 14]);
                assert_eq!(*default, 15);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn conditions_map_to_opcodes() {
        for &op in Op::ALL {
            if let Some(cond) = Condition::from_op(op) {
                assert_eq!(cond.op(), op);
                assert!(op.is_branch());
            }
        }
    }

    #[test]
    fn unbound_label_is_an_error() {
        let mut b = BytecodeBuilder::new();
        let nowhere = b.new_label();
        b.jump(nowhere);
        assert_eq!(b.finish(), Err(BuildError::UnboundLabel(0)));
    }

    // ── Decoder errors ────────────────────────────────────────────────

    #[test]
    fn unknown_opcode() {
        let err = decode_all(&[Op::Nop as u8, 0xFF]).unwrap_err();
        assert_eq!(
            err,
            DecodeError::UnknownOpcode {
                offset: 1,
                byte: 0xFF
            }
        );
    }

    #[test]
    fn truncated_operand() {
        let err = decode_all(&[Op::GetProperty as u8, 0x80]).unwrap_err();
        assert_eq!(err, DecodeError::Truncated { offset: 2 });
    }

    #[test]
    fn negative_branch_target() {
        let err = decode_all(&[Op::Jump as u8, 0xF0, 0xFF, 0xFF]).unwrap_err();
        assert!(matches!(err, DecodeError::BadTarget { offset: 0, target: -12 }));
    }

    #[test]
    fn display_uses_mnemonics() {
        assert_eq!(
            Instruction::CallPropVoid { name: 3, argc: 1 }.to_string(),
            "callpropvoid mn#3 (1)"
        );
        assert_eq!(Instruction::GetLocal { reg: 0 }.to_string(), "getlocal_0");
        assert_eq!(Instruction::GetLocal { reg: 9 }.to_string(), "getlocal r9");
        assert_eq!(Instruction::If { cond: Condition::NotLt, target: 12 }.to_string(), "ifnlt @12");
    }

    // ── ABC files ─────────────────────────────────────────────────────

    fn sample_unit() -> AbcFile {
        let mut u = UnitBuilder::new();
        let public = u.public_ns();
        let private = u.private_ns("Point");
        let set = u.ns_set(&[public, private]);
        let x = u.qname(public, "x");
        let int = u.public_name("int");
        let any_x = u.multiname("x", set);
        let late = u.multiname_late(set);
        u.int(-7);
        u.uint(u32::MAX);
        u.double(0.5);

        let mut code = BytecodeBuilder::new();
        code.emit(&Instruction::GetLocal { reg: 0 }).unwrap();
        code.emit(&Instruction::GetProperty { name: any_x }).unwrap();
        code.emit(&Instruction::GetProperty { name: late }).unwrap();
        code.op(Op::ReturnValue);
        let getter = u.function_with(
            MethodInfo {
                return_type: int,
                optional: vec![ConstValue::Null],
                params: vec![int],
                flags: MethodFlags::NEED_ACTIVATION,
                ..MethodInfo::default()
            },
            2,
            code.finish().unwrap(),
            vec![ExceptionInfo {
                from: 0,
                to: 3,
                target: 3,
                exc_type: 0,
                var_name: 0,
            }],
        );

        let init = u.function("", 0, 1, vec![Op::ReturnVoid as u8]);
        let name = u.public_name("Point");
        let len = u.public_name("len");
        let class = u.class(
            InstanceInfo {
                name,
                flags: InstanceFlags::SEALED | InstanceFlags::PROTECTED_NS,
                protected_ns: private,
                init,
                traits: vec![
                    TraitInfo::slot(x, 1, int, Some(ConstValue::Int(1))),
                    TraitInfo::getter(len, getter)
                        .with_attributes(TraitAttributes::FINAL),
                ],
                ..InstanceInfo::default()
            },
            ClassInfo {
                init,
                traits: Vec::new(),
            },
        );
        u.script(init, vec![TraitInfo::class(name, 1, class)]);
        u.finish()
    }

    #[test]
    fn abc_write_then_read() {
        let unit = sample_unit();
        let bytes = write_abc(&unit);
        let read = read_abc(&bytes).unwrap();
        assert_eq!(read.constant_pool.strings, unit.constant_pool.strings);
        assert_eq!(read.constant_pool.multinames, unit.constant_pool.multinames);
        assert_eq!(read.methods, unit.methods);
        assert_eq!(read.instances, unit.instances);
        assert_eq!(read.scripts, unit.scripts);
        assert_eq!(read.bodies, unit.bodies);
    }

    #[test]
    fn pool_placeholders_survive() {
        let bytes = write_abc(&AbcFile::default());
        let read = read_abc(&bytes).unwrap();
        assert_eq!(read.constant_pool.strings, vec![String::new()]);
        assert_eq!(read.constant_pool.multinames, vec![MultinameInfo::ANY]);
        assert!(read.constant_pool.doubles[0].is_nan());
    }

    #[test]
    fn wrong_version_is_rejected() {
        let mut bytes = write_abc(&AbcFile::default());
        bytes[2] = 47;
        assert_eq!(
            read_abc(&bytes).unwrap_err(),
            ReadError::Version {
                major: 47,
                minor: MINOR_VERSION
            }
        );
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut bytes = write_abc(&AbcFile::default());
        bytes.push(0);
        assert_eq!(read_abc(&bytes).unwrap_err(), ReadError::Trailing(1));
    }

    #[test]
    fn bad_trait_kind_is_reported() {
        let file = |getter: bool| {
            let mut u = UnitBuilder::new();
            let init = u.function("", 0, 1, vec![Op::ReturnVoid as u8]);
            let name = u.public_name("f");
            let t = if getter {
                TraitInfo::getter(name, init)
            } else {
                TraitInfo::method(name, init)
            };
            u.script(init, vec![t]);
            write_abc(&u.finish())
        };
        let (method, getter) = (file(false), file(true));
        let kind_pos = method
            .iter()
            .zip(&getter)
            .position(|(a, b)| a != b)
            .unwrap();

        let mut bytes = method;
        bytes[kind_pos] = 0x09;
        assert!(matches!(
            read_abc(&bytes),
            Err(ReadError::BadKind { what: "trait", kind: 0x09, .. })
        ));
    }

    // ── Properties ────────────────────────────────────────────────────

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(500))]

        #[test]
        fn decoder_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
            for item in BytecodeDecoder::new(&bytes) {
                if item.is_err() {
                    break;
                }
            }
        }

        #[test]
        fn reader_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
            let _ = read_abc(&bytes);
        }

        #[test]
        fn decoded_offsets_are_increasing(bytes in proptest::collection::vec(any::<u8>(), 0..128)) {
            let mut last = None;
            for (offset, _) in BytecodeDecoder::new(&bytes).map_while(Result::ok) {
                prop_assert!(last.is_none_or(|prev| offset > prev));
                last = Some(offset);
            }
        }
    }
}
