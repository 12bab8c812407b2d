macro_rules! opcodes {
    ($( $(#[$doc:meta])* $name:ident = $byte:literal, $mnemonic:literal; )*) => {
        /// AVM2 opcodes.
        ///
        /// Operands follow the opcode byte. Indices into the constant pool,
        /// local registers and argument counts are variable-length `u30`;
        /// branch offsets are signed 24-bit, relative to the end of the
        /// instruction.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum Op {
            $( $(#[$doc])* $name = $byte, )*
        }

        impl Op {
            /// Every defined opcode, in byte order.
            pub const ALL: &'static [Op] = &[$(Op::$name),*];

            /// Assembly mnemonic, as printed by the disassembler.
            pub const fn mnemonic(self) -> &'static str {
                match self {
                    $( Op::$name => $mnemonic, )*
                }
            }
        }

        impl TryFrom<u8> for Op {
            type Error = u8;

            fn try_from(byte: u8) -> Result<Self, u8> {
                match byte {
                    $( $byte => Ok(Op::$name), )*
                    _ => Err(byte),
                }
            }
        }
    };
}

opcodes! {
    Bkpt = 0x01, "bkpt";
    Nop = 0x02, "nop";
    /// Pop a value and raise it as an exception.
    Throw = 0x03, "throw";
    GetSuper = 0x04, "getsuper";
    SetSuper = 0x05, "setsuper";
    /// Operands: `reg:u30`. Overwrite a local with `undefined`.
    Kill = 0x08, "kill";
    Label = 0x09, "label";
    IfNlt = 0x0C, "ifnlt";
    IfNle = 0x0D, "ifnle";
    IfNgt = 0x0E, "ifngt";
    IfNge = 0x0F, "ifnge";
    /// Operands: `offset:s24`.
    Jump = 0x10, "jump";
    IfTrue = 0x11, "iftrue";
    IfFalse = 0x12, "iffalse";
    IfEq = 0x13, "ifeq";
    IfNe = 0x14, "ifne";
    IfLt = 0x15, "iflt";
    IfLe = 0x16, "ifle";
    IfGt = 0x17, "ifgt";
    IfGe = 0x18, "ifge";
    IfStrictEq = 0x19, "ifstricteq";
    IfStrictNe = 0x1A, "ifstrictne";
    /// Operands: `default:s24`, `count:u30`, `count + 1` case offsets
    /// (`s24`). Offsets are relative to the start of the instruction.
    LookupSwitch = 0x1B, "lookupswitch";
    PushWith = 0x1C, "pushwith";
    PopScope = 0x1D, "popscope";
    NextName = 0x1E, "nextname";
    HasNext = 0x1F, "hasnext";
    PushNull = 0x20, "pushnull";
    PushUndefined = 0x21, "pushundefined";
    NextValue = 0x23, "nextvalue";
    /// Operands: `value:u8`, sign-extended.
    PushByte = 0x24, "pushbyte";
    /// Operands: `value:u30`, truncated to 16 bits and sign-extended.
    PushShort = 0x25, "pushshort";
    PushTrue = 0x26, "pushtrue";
    PushFalse = 0x27, "pushfalse";
    PushNaN = 0x28, "pushnan";
    Pop = 0x29, "pop";
    Dup = 0x2A, "dup";
    Swap = 0x2B, "swap";
    PushString = 0x2C, "pushstring";
    PushInt = 0x2D, "pushint";
    PushUInt = 0x2E, "pushuint";
    PushDouble = 0x2F, "pushdouble";
    PushScope = 0x30, "pushscope";
    PushNamespace = 0x31, "pushnamespace";
    /// Operands: `object_reg:u30`, `index_reg:u30`.
    HasNext2 = 0x32, "hasnext2";
    NewFunction = 0x40, "newfunction";
    Call = 0x41, "call";
    Construct = 0x42, "construct";
    /// Operands: `disp_id:u30`, `argc:u30`.
    CallMethod = 0x43, "callmethod";
    /// Operands: `method:u30`, `argc:u30`.
    CallStatic = 0x44, "callstatic";
    CallSuper = 0x45, "callsuper";
    CallProperty = 0x46, "callproperty";
    ReturnVoid = 0x47, "returnvoid";
    ReturnValue = 0x48, "returnvalue";
    ConstructSuper = 0x49, "constructsuper";
    ConstructProp = 0x4A, "constructprop";
    CallPropLex = 0x4C, "callproplex";
    CallSuperVoid = 0x4E, "callsupervoid";
    CallPropVoid = 0x4F, "callpropvoid";
    NewObject = 0x55, "newobject";
    NewArray = 0x56, "newarray";
    NewActivation = 0x57, "newactivation";
    NewClass = 0x58, "newclass";
    NewCatch = 0x5A, "newcatch";
    FindPropStrict = 0x5D, "findpropstrict";
    FindProperty = 0x5E, "findproperty";
    FindDef = 0x5F, "finddef";
    GetLex = 0x60, "getlex";
    SetProperty = 0x61, "setproperty";
    GetLocal = 0x62, "getlocal";
    SetLocal = 0x63, "setlocal";
    GetGlobalScope = 0x64, "getglobalscope";
    /// Operands: `index:u8`.
    GetScopeObject = 0x65, "getscopeobject";
    GetProperty = 0x66, "getproperty";
    InitProperty = 0x68, "initproperty";
    DeleteProperty = 0x6A, "deleteproperty";
    GetSlot = 0x6C, "getslot";
    SetSlot = 0x6D, "setslot";
    GetGlobalSlot = 0x6E, "getglobalslot";
    SetGlobalSlot = 0x6F, "setglobalslot";
    ConvertS = 0x70, "convert_s";
    ConvertI = 0x73, "convert_i";
    ConvertU = 0x74, "convert_u";
    ConvertD = 0x75, "convert_d";
    ConvertB = 0x76, "convert_b";
    ConvertO = 0x77, "convert_o";
    Coerce = 0x80, "coerce";
    CoerceB = 0x81, "coerce_b";
    CoerceA = 0x82, "coerce_a";
    CoerceI = 0x83, "coerce_i";
    CoerceD = 0x84, "coerce_d";
    CoerceS = 0x85, "coerce_s";
    AsType = 0x86, "astype";
    AsTypeLate = 0x87, "astypelate";
    CoerceU = 0x88, "coerce_u";
    CoerceO = 0x89, "coerce_o";
    Negate = 0x90, "negate";
    Increment = 0x91, "increment";
    IncLocal = 0x92, "inclocal";
    Decrement = 0x93, "decrement";
    DecLocal = 0x94, "declocal";
    TypeOf = 0x95, "typeof";
    Not = 0x96, "not";
    BitNot = 0x97, "bitnot";
    Add = 0xA0, "add";
    Subtract = 0xA1, "subtract";
    Multiply = 0xA2, "multiply";
    Divide = 0xA3, "divide";
    Modulo = 0xA4, "modulo";
    LShift = 0xA5, "lshift";
    RShift = 0xA6, "rshift";
    URShift = 0xA7, "urshift";
    BitAnd = 0xA8, "bitand";
    BitOr = 0xA9, "bitor";
    BitXor = 0xAA, "bitxor";
    Equals = 0xAB, "equals";
    StrictEquals = 0xAC, "strictequals";
    LessThan = 0xAD, "lessthan";
    LessEquals = 0xAE, "lessequals";
    GreaterThan = 0xAF, "greaterthan";
    GreaterEquals = 0xB0, "greaterequals";
    InstanceOf = 0xB1, "instanceof";
    IsType = 0xB2, "istype";
    IsTypeLate = 0xB3, "istypelate";
    In = 0xB4, "in";
    IncrementI = 0xC0, "increment_i";
    DecrementI = 0xC1, "decrement_i";
    IncLocalI = 0xC2, "inclocal_i";
    DecLocalI = 0xC3, "declocal_i";
    NegateI = 0xC4, "negate_i";
    AddI = 0xC5, "add_i";
    SubtractI = 0xC6, "subtract_i";
    MultiplyI = 0xC7, "multiply_i";
    GetLocal0 = 0xD0, "getlocal_0";
    GetLocal1 = 0xD1, "getlocal_1";
    GetLocal2 = 0xD2, "getlocal_2";
    GetLocal3 = 0xD3, "getlocal_3";
    SetLocal0 = 0xD4, "setlocal_0";
    SetLocal1 = 0xD5, "setlocal_1";
    SetLocal2 = 0xD6, "setlocal_2";
    SetLocal3 = 0xD7, "setlocal_3";
    /// Operands: `kind:u8`, `name:u30`, `reg:u8`, `extra:u30`.
    Debug = 0xEF, "debug";
    DebugLine = 0xF0, "debugline";
    DebugFile = 0xF1, "debugfile";
}

impl Op {
    /// Whether the operand is a signed 24-bit branch offset.
    pub const fn is_branch(self) -> bool {
        matches!(
            self,
            Op::Jump
                | Op::IfTrue
                | Op::IfFalse
                | Op::IfEq
                | Op::IfNe
                | Op::IfLt
                | Op::IfLe
                | Op::IfGt
                | Op::IfGe
                | Op::IfStrictEq
                | Op::IfStrictNe
                | Op::IfNlt
                | Op::IfNle
                | Op::IfNgt
                | Op::IfNge
        )
    }
}

impl core::fmt::Display for Op {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.mnemonic())
    }
}
