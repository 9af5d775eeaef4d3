// Maps the instruction byte found in a method's code array to symbolic
// `Opcode` identifiers, covering the subset of the JVM's instruction set
// this core dispatches. Discriminants match the real JVM opcode bytes
// (http://docs.oracle.com/javase/specs/jvms/se7/html/jvms-6.html) so a
// real `ClassFileReader` needs no translation table of its own.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Nop = 0,
    AconstNull = 1,
    IconstM1 = 2,
    Iconst0 = 3,
    Iconst1 = 4,
    Iconst2 = 5,
    Iconst3 = 6,
    Iconst4 = 7,
    Iconst5 = 8,
    Lconst0 = 9,
    Lconst1 = 10,
    Bipush = 16,
    Sipush = 17,
    Ldc = 18,
    LdcW = 19,
    Ldc2W = 20,
    Iload = 21,
    Lload = 22,
    Aload = 25,
    Iload0 = 26,
    Iload1 = 27,
    Iload2 = 28,
    Iload3 = 29,
    Lload0 = 30,
    Lload1 = 31,
    Lload2 = 32,
    Lload3 = 33,
    Aload0 = 42,
    Aload1 = 43,
    Aload2 = 44,
    Aload3 = 45,
    Iaload = 46,
    Laload = 47,
    Aaload = 50,
    Baload = 51,
    Caload = 52,
    Saload = 53,
    Istore = 54,
    Lstore = 55,
    Astore = 58,
    Istore0 = 59,
    Istore1 = 60,
    Istore2 = 61,
    Istore3 = 62,
    Lstore0 = 63,
    Lstore1 = 64,
    Lstore2 = 65,
    Lstore3 = 66,
    Astore0 = 75,
    Astore1 = 76,
    Astore2 = 77,
    Astore3 = 78,
    Iastore = 79,
    Lastore = 80,
    Aastore = 83,
    Bastore = 84,
    Castore = 85,
    Sastore = 86,
    Pop = 87,
    Pop2 = 88,
    Dup = 89,
    DupX1 = 90,
    DupX2 = 91,
    Dup2 = 92,
    Dup2X1 = 93,
    Dup2X2 = 94,
    Swap = 95,
    Iadd = 96,
    Ladd = 97,
    Isub = 100,
    Lsub = 101,
    Imul = 104,
    Lmul = 105,
    Idiv = 108,
    Ldiv = 109,
    Irem = 112,
    Lrem = 113,
    Ineg = 116,
    Lneg = 117,
    Ishl = 120,
    Lshl = 121,
    Ishr = 122,
    Lshr = 123,
    Iushr = 124,
    Lushr = 125,
    Iand = 126,
    Land = 127,
    Ior = 128,
    Lor = 129,
    Ixor = 130,
    Lxor = 131,
    Iinc = 132,
    I2l = 133,
    L2i = 136,
    I2b = 145,
    I2c = 146,
    I2s = 147,
    Lcmp = 148,
    Ifeq = 153,
    Ifne = 154,
    Iflt = 155,
    Ifge = 156,
    Ifgt = 157,
    Ifle = 158,
    IfIcmpeq = 159,
    IfIcmpne = 160,
    IfIcmplt = 161,
    IfIcmpge = 162,
    IfIcmpgt = 163,
    IfIcmple = 164,
    IfAcmpeq = 165,
    IfAcmpne = 166,
    Goto = 167,
    Jsr = 168,
    Ret = 169,
    Ireturn = 172,
    Lreturn = 173,
    Areturn = 176,
    Return = 177,
    Getstatic = 178,
    Putstatic = 179,
    Getfield = 180,
    Putfield = 181,
    Invokevirtual = 182,
    Invokespecial = 183,
    Invokestatic = 184,
    Invokeinterface = 185,
    New = 187,
    Newarray = 188,
    Anewarray = 189,
    Arraylength = 190,
    Athrow = 191,
    Checkcast = 192,
    Instanceof = 193,
    Wide = 196,
    GotoW = 200,
    JsrW = 201,
    Ifnull = 198,
    Ifnonnull = 199,
}

impl Opcode {
    pub fn from_byte(b: u8) -> Option<Opcode> {
        use Opcode::*;
        Some(match b {
            0 => Nop,
            1 => AconstNull,
            2 => IconstM1,
            3 => Iconst0,
            4 => Iconst1,
            5 => Iconst2,
            6 => Iconst3,
            7 => Iconst4,
            8 => Iconst5,
            9 => Lconst0,
            10 => Lconst1,
            16 => Bipush,
            17 => Sipush,
            18 => Ldc,
            19 => LdcW,
            20 => Ldc2W,
            21 => Iload,
            22 => Lload,
            25 => Aload,
            26 => Iload0,
            27 => Iload1,
            28 => Iload2,
            29 => Iload3,
            30 => Lload0,
            31 => Lload1,
            32 => Lload2,
            33 => Lload3,
            42 => Aload0,
            43 => Aload1,
            44 => Aload2,
            45 => Aload3,
            46 => Iaload,
            47 => Laload,
            50 => Aaload,
            51 => Baload,
            52 => Caload,
            53 => Saload,
            54 => Istore,
            55 => Lstore,
            58 => Astore,
            59 => Istore0,
            60 => Istore1,
            61 => Istore2,
            62 => Istore3,
            63 => Lstore0,
            64 => Lstore1,
            65 => Lstore2,
            66 => Lstore3,
            75 => Astore0,
            76 => Astore1,
            77 => Astore2,
            78 => Astore3,
            79 => Iastore,
            80 => Lastore,
            83 => Aastore,
            84 => Bastore,
            85 => Castore,
            86 => Sastore,
            87 => Pop,
            88 => Pop2,
            89 => Dup,
            90 => DupX1,
            91 => DupX2,
            92 => Dup2,
            93 => Dup2X1,
            94 => Dup2X2,
            95 => Swap,
            96 => Iadd,
            97 => Ladd,
            100 => Isub,
            101 => Lsub,
            104 => Imul,
            105 => Lmul,
            108 => Idiv,
            109 => Ldiv,
            112 => Irem,
            113 => Lrem,
            116 => Ineg,
            117 => Lneg,
            120 => Ishl,
            121 => Lshl,
            122 => Ishr,
            123 => Lshr,
            124 => Iushr,
            125 => Lushr,
            126 => Iand,
            127 => Land,
            128 => Ior,
            129 => Lor,
            130 => Ixor,
            131 => Lxor,
            132 => Iinc,
            133 => I2l,
            136 => L2i,
            145 => I2b,
            146 => I2c,
            147 => I2s,
            148 => Lcmp,
            153 => Ifeq,
            154 => Ifne,
            155 => Iflt,
            156 => Ifge,
            157 => Ifgt,
            158 => Ifle,
            159 => IfIcmpeq,
            160 => IfIcmpne,
            161 => IfIcmplt,
            162 => IfIcmpge,
            163 => IfIcmpgt,
            164 => IfIcmple,
            165 => IfAcmpeq,
            166 => IfAcmpne,
            167 => Goto,
            168 => Jsr,
            169 => Ret,
            172 => Ireturn,
            173 => Lreturn,
            176 => Areturn,
            177 => Return,
            178 => Getstatic,
            179 => Putstatic,
            180 => Getfield,
            181 => Putfield,
            182 => Invokevirtual,
            183 => Invokespecial,
            184 => Invokestatic,
            185 => Invokeinterface,
            187 => New,
            188 => Newarray,
            189 => Anewarray,
            190 => Arraylength,
            191 => Athrow,
            192 => Checkcast,
            193 => Instanceof,
            196 => Wide,
            198 => Ifnull,
            199 => Ifnonnull,
            200 => GotoW,
            201 => JsrW,
            _ => return None,
        })
    }

    /// The fixed operand-stack depth delta for opcodes whose effect does
    /// not depend on resolved metadata: for any opcode sequence that
    /// performs no allocation, `sp` evolves exactly per this table.
    /// Returns `None` for opcodes whose delta depends on runtime-resolved
    /// arity (`invoke*`, `getfield` et al.) -- those are checked directly
    /// against the interpreter's own bookkeeping instead of this table.
    pub fn fixed_stack_delta(self) -> Option<i32> {
        use Opcode::*;
        Some(match self {
            Nop => 0,
            AconstNull | IconstM1 | Iconst0 | Iconst1 | Iconst2 | Iconst3 | Iconst4 | Iconst5
            | Bipush | Sipush | Iload | Iload0 | Iload1 | Iload2 | Iload3 | Aload | Aload0
            | Aload1 | Aload2 | Aload3 => 1,
            Lconst0 | Lconst1 | Lload | Lload0 | Lload1 | Lload2 | Lload3 => 2,
            Istore | Istore0 | Istore1 | Istore2 | Istore3 | Astore | Astore0 | Astore1
            | Astore2 | Astore3 => -1,
            Lstore | Lstore0 | Lstore1 | Lstore2 | Lstore3 => -2,
            Iaload | Baload | Caload | Saload | Aaload => -1, // arrayref,index -> value
            Laload => 0,                                      // arrayref,index(2) -> value(2)
            Iastore | Bastore | Castore | Sastore | Aastore => -3,
            Lastore => -4,
            Pop => -1,
            Pop2 => -2,
            Dup => 1,
            DupX1 | DupX2 => 1,
            Dup2 => 2,
            Dup2X1 | Dup2X2 => 2,
            Swap => 0,
            Iadd | Isub | Imul | Idiv | Irem | Iand | Ior | Ixor | Ishl | Ishr | Iushr => -1,
            Ladd | Lsub | Lmul | Ldiv | Lrem | Land | Lor | Lxor => -2,
            Lshl | Lshr | Lushr => -1, // long,int(1+2) -> long(2): net -1
            Ineg => 0,
            Lneg => 0,
            Iinc => 0,
            I2l => 1,
            L2i => -1,
            I2b | I2c | I2s => 0,
            Lcmp => -3,
            Ifeq | Ifne | Iflt | Ifge | Ifgt | Ifle | Ifnull | Ifnonnull => -1,
            IfIcmpeq | IfIcmpne | IfIcmplt | IfIcmpge | IfIcmpgt | IfIcmple | IfAcmpeq
            | IfAcmpne => -2,
            Goto | GotoW => 0,
            Jsr | JsrW => 1,
            Ret => 0,
            Ireturn | Lreturn | Areturn | Return => 0, // handled by frame teardown, not sp
            Arraylength => 0,
            Athrow => 0, // pops then pushes the same exception after unwind
            Checkcast => 0,
            Instanceof => 0, // ref -> int
            New => 1,
            Newarray | Anewarray => 0, // count -> arrayref
            Wide => 0,
            Ldc | LdcW => 1,
            Ldc2W => 2,
            _ => return None,
        })
    }
}
