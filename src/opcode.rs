// File: src/opcode.rs
//
// 32-bit instruction encoding per §4.1: low 6 bits are the opcode (≤64 of
// them), the remaining 26 bits are either absent (`i`), an unsigned
// argument (`iAx`), or a signed argument encoded as biased-unsigned
// (`iAxs`). A static opcode → layout table is the single source of truth
// the disassembler and the serializer both consult.

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::convert::TryFrom;

pub const OPCODE_BITS: u32 = 6;
pub const AX_BITS: u32 = 32 - OPCODE_BITS;
pub const AX_MASK: u32 = (1u32 << AX_BITS) - 1;
/// Bias applied so a signed argument in `[-AX_BIAS, AX_BIAS - 1]` encodes as
/// an unsigned value in `[0, 2*AX_BIAS - 1]`.
pub const AX_BIAS: i64 = 1i64 << (AX_BITS - 1);

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Layout {
    I,
    IAx,
    IAxs,
}

macro_rules! opcodes {
    ($($name:ident = $val:expr),* $(,)?) => {
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
        #[repr(u8)]
        pub enum OpCode {
            $($name = $val),*
        }

        impl TryFrom<u8> for OpCode {
            type Error = String;
            fn try_from(byte: u8) -> Result<Self, Self::Error> {
                match byte {
                    $($val => Ok(OpCode::$name),)*
                    other => Err(format!("invalid opcode byte {}", other)),
                }
            }
        }

        impl OpCode {
            pub fn name(&self) -> &'static str {
                match self {
                    $(OpCode::$name => stringify!($name)),*
                }
            }
        }
    };
}

opcodes! {
    // Loads & stores
    LoadConstant = 0,
    DefineGlobal = 1,
    GetGlobal = 2,
    SetGlobal = 3,
    GetBase = 4,
    SetBase = 5,
    GetUpvalue = 6,
    SetUpvalue = 7,
    // Closures
    MakeClosure = 8,
    CloseLocal = 9,
    // Stack
    Pop = 10,
    // Control flow
    IfJump = 11,
    CndJump = 12,
    CndNotJump = 13,
    Jump = 14,
    JumpBack = 15,
    // Calls
    Call = 16,
    Return = 17,
    End = 18,
    // Tables
    NewTable = 19,
    Index = 20,
    NewIndex = 21,
    ForEach = 22,
    // Arithmetic / comparison
    Negate = 23,
    Not = 24,
    Length = 25,
    Add = 26,
    Sub = 27,
    Mul = 28,
    Div = 29,
    Mod = 30,
    Equal = 31,
    Greater = 32,
    Less = 33,
    Inc = 34,
    Dec = 35,
    Concat = 36,
    // Literals
    PushTrue = 37,
    PushFalse = 38,
    PushNil = 39,
}

pub static LAYOUTS: Lazy<HashMap<OpCode, Layout>> = Lazy::new(|| {
    use Layout::*;
    use OpCode::*;
    let mut m = HashMap::new();
    for (op, layout) in [
        (LoadConstant, IAx),
        (DefineGlobal, IAx),
        (GetGlobal, IAx),
        (SetGlobal, IAx),
        (GetBase, IAx),
        (SetBase, IAx),
        (GetUpvalue, IAx),
        (SetUpvalue, IAx),
        (MakeClosure, IAx),
        (CloseLocal, IAx),
        (Pop, IAx),
        (IfJump, IAxs),
        (CndJump, IAxs),
        (CndNotJump, IAxs),
        (Jump, IAxs),
        (JumpBack, IAxs),
        (Call, IAx),
        (Return, I),
        (End, I),
        (NewTable, IAx),
        (Index, I),
        (NewIndex, I),
        (ForEach, I),
        (Negate, I),
        (Not, I),
        (Length, I),
        (Add, I),
        (Sub, I),
        (Mul, I),
        (Div, I),
        (Mod, I),
        (Equal, I),
        (Greater, I),
        (Less, I),
        (Inc, IAx),
        (Dec, IAx),
        (Concat, IAx),
        (PushTrue, I),
        (PushFalse, I),
        (PushNil, I),
    ] {
        m.insert(op, layout);
    }
    m
});

pub fn layout_of(op: OpCode) -> Layout {
    *LAYOUTS.get(&op).expect("every OpCode has a registered layout")
}

pub fn decode_opcode(word: u32) -> Result<OpCode, String> {
    OpCode::try_from((word & 0x3f) as u8)
}

pub fn decode_ax(word: u32) -> u32 {
    (word >> OPCODE_BITS) & AX_MASK
}

pub fn decode_axs(word: u32) -> i32 {
    (decode_ax(word) as i64 - AX_BIAS) as i32
}

pub fn encode_i(op: OpCode) -> u32 {
    op as u32
}

pub fn encode_iax(op: OpCode, ax: u32) -> u32 {
    debug_assert!(ax <= AX_MASK, "Ax argument overflows 26 bits");
    ((ax & AX_MASK) << OPCODE_BITS) | (op as u32)
}

pub fn encode_iaxs(op: OpCode, ax: i32) -> u32 {
    let biased = (ax as i64 + AX_BIAS) as u32;
    encode_iax(op, biased)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_iax() {
        let word = encode_iax(OpCode::LoadConstant, 12345);
        assert_eq!(decode_opcode(word).unwrap(), OpCode::LoadConstant);
        assert_eq!(decode_ax(word), 12345);
    }

    #[test]
    fn roundtrip_iaxs_negative() {
        let word = encode_iaxs(OpCode::JumpBack, -42);
        assert_eq!(decode_opcode(word).unwrap(), OpCode::JumpBack);
        assert_eq!(decode_axs(word), -42);
    }

    #[test]
    fn roundtrip_iaxs_positive() {
        let word = encode_iaxs(OpCode::Jump, 1000);
        assert_eq!(decode_axs(word), 1000);
    }

    #[test]
    fn every_opcode_has_a_layout() {
        for byte in 0..40u8 {
            let op = OpCode::try_from(byte).unwrap();
            let _ = layout_of(op);
        }
    }
}
