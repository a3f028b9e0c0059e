//! Instruction set and its 32-bit encoding.
//!
//! The opcode lives in the low byte. The remaining 24 bits are either three
//! byte fields `A B C`, a byte `A` and a 16 bit `Bx` (signed as `sBx` for
//! jumps), or a single signed 24 bit `sAx`.

/// Highest register an 8 bit operand can name.
pub const NEAR_SLOT_MAX: u32 = 0xFF;
/// Highest register a 16 bit operand can name.
pub const FAR_SLOT_MAX: u32 = 0xFFFF;
/// Highest constant or sub-function index (`Bx`).
pub const INDEX_MAX: u32 = 0xFFFF;
/// Highest environment reference (`B`).
pub const ENV_MAX: u32 = 0xFF;

pub type Instruction = u32;

macro_rules! opcodes {
    ($($op:ident => $mnemonic:literal, $layout:expr;)*) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum Opcode {
            $($op,)*
        }

        impl Opcode {
            const ALL: &'static [Opcode] = &[$(Opcode::$op,)*];

            pub fn from_byte(byte: u8) -> Option<Self> {
                Self::ALL.get(byte as usize).copied()
            }

            pub fn mnemonic(self) -> &'static str {
                match self {
                    $(Opcode::$op => $mnemonic,)*
                }
            }

            pub fn layout(self) -> Layout {
                use Operand::*;
                match self {
                    $(Opcode::$op => $layout,)*
                }
            }
        }
    };
}

opcodes! {
    Noop => "noop", Layout::None;
    Return => "ret", Layout::A(Reg);
    ReturnNil => "retn", Layout::None;
    LoadNil => "ldn", Layout::A(Reg);
    LoadTrue => "ldt", Layout::A(Reg);
    LoadFalse => "ldf", Layout::A(Reg);
    LoadConstant => "ldc", Layout::ABx(Reg, Const);
    LoadUpvalue => "ldu", Layout::ABC(Reg, Env, EnvSlot);
    SetUpvalue => "setu", Layout::ABC(Reg, Env, EnvSlot);
    LoadSelf => "ldself", Layout::A(Reg);
    Closure => "clo", Layout::ABx(Reg, Def);
    // A <- Bx
    MoveNear => "movn", Layout::ABx(Reg, FarReg);
    // Bx <- A
    MoveFar => "movf", Layout::ABx(Reg, FarReg);
    Jump => "jmp", Layout::Ax(Jump);
    JumpIf => "jmpif", Layout::ABx(Reg, Jump);
    JumpIfNot => "jmpno", Layout::ABx(Reg, Jump);
    Push => "push", Layout::A(Reg);
    Push2 => "push2", Layout::AB(Reg, Reg);
    Push3 => "push3", Layout::ABC(Reg, Reg, Reg);
    // A <- call B with the pushed arguments
    Call => "call", Layout::AB(Reg, Reg);
    TailCall => "tcall", Layout::A(Reg);
    MakeArray => "mkarr", Layout::A(Reg);
    MakeStruct => "mkstu", Layout::A(Reg);
    // A <- B[C]
    GetIndex => "geti", Layout::ABC(Reg, Reg, Imm);
    // A[C] <- B
    PutIndex => "puti", Layout::ABC(Reg, Reg, Imm);
    Add => "add", Layout::ABC(Reg, Reg, Reg);
    Subtract => "sub", Layout::ABC(Reg, Reg, Reg);
    Multiply => "mul", Layout::ABC(Reg, Reg, Reg);
    Divide => "div", Layout::ABC(Reg, Reg, Reg);
    LessThan => "lt", Layout::ABC(Reg, Reg, Reg);
    GreaterThan => "gt", Layout::ABC(Reg, Reg, Reg);
    LessThanEqual => "lte", Layout::ABC(Reg, Reg, Reg);
    GreaterThanEqual => "gte", Layout::ABC(Reg, Reg, Reg);
    Equals => "eq", Layout::ABC(Reg, Reg, Reg);
}

/// What an operand field refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    /// register of the current frame, 8 bits
    Reg,
    /// register of the current frame, 16 bits
    FarReg,
    Const,
    Def,
    /// environment reference
    Env,
    /// register inside a captured environment
    EnvSlot,
    Imm,
    /// signed offset from the next instruction
    Jump,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    None,
    A(Operand),
    AB(Operand, Operand),
    ABC(Operand, Operand, Operand),
    ABx(Operand, Operand),
    Ax(Operand),
}

pub fn encode(op: Opcode) -> Instruction {
    op as u32
}

pub fn encode_a(op: Opcode, a: u8) -> Instruction {
    op as u32 | (a as u32) << 8
}

pub fn encode_ab(op: Opcode, a: u8, b: u8) -> Instruction {
    encode_a(op, a) | (b as u32) << 16
}

pub fn encode_abc(op: Opcode, a: u8, b: u8, c: u8) -> Instruction {
    encode_ab(op, a, b) | (c as u32) << 24
}

pub fn encode_abx(op: Opcode, a: u8, bx: u16) -> Instruction {
    encode_a(op, a) | (bx as u32) << 16
}

pub fn encode_asbx(op: Opcode, a: u8, sbx: i16) -> Instruction {
    encode_abx(op, a, sbx as u16)
}

/// `sax` must fit in 24 bits.
pub fn encode_sax(op: Opcode, sax: i32) -> Instruction {
    op as u32 | ((sax as u32) & 0x00FF_FFFF) << 8
}

pub fn opcode(instr: Instruction) -> Option<Opcode> {
    Opcode::from_byte(instr as u8)
}

pub fn field_a(instr: Instruction) -> u32 {
    (instr >> 8) & 0xFF
}

pub fn field_b(instr: Instruction) -> u32 {
    (instr >> 16) & 0xFF
}

pub fn field_c(instr: Instruction) -> u32 {
    instr >> 24
}

pub fn field_bx(instr: Instruction) -> u32 {
    instr >> 16
}

pub fn field_sbx(instr: Instruction) -> i32 {
    (instr >> 16) as u16 as i16 as i32
}

pub fn field_sax(instr: Instruction) -> i32 {
    // arithmetic shift sign-extends the 24 bit field
    (instr as i32) >> 8
}

/// Decoded operands paired with what they refer to. Jump operands are
/// already signed.
pub fn operands(instr: Instruction) -> Vec<(Operand, i64)> {
    let Some(op) = opcode(instr) else {
        return vec![];
    };
    let signed = |operand: Operand, raw: u32, wide: i32| match operand {
        Operand::Jump => wide as i64,
        _ => raw as i64,
    };
    match op.layout() {
        Layout::None => vec![],
        Layout::A(a) => vec![(a, field_a(instr) as i64)],
        Layout::AB(a, b) => vec![(a, field_a(instr) as i64), (b, field_b(instr) as i64)],
        Layout::ABC(a, b, c) => vec![
            (a, field_a(instr) as i64),
            (b, field_b(instr) as i64),
            (c, field_c(instr) as i64),
        ],
        Layout::ABx(a, bx) => vec![
            (a, field_a(instr) as i64),
            (bx, signed(bx, field_bx(instr), field_sbx(instr))),
        ],
        Layout::Ax(ax) => vec![(ax, field_sax(instr) as i64)],
    }
}

/// Registers of the current frame an instruction reads or writes.
pub fn registers(instr: Instruction) -> impl Iterator<Item = u32> {
    operands(instr)
        .into_iter()
        .filter(|(operand, _)| matches!(operand, Operand::Reg | Operand::FarReg))
        .map(|(_, value)| value as u32)
}
