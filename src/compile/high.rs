//! High-level compiler: a structured, self-describing byte encoding of a
//! function body. Multi-byte immediates are always big-endian — this format
//! favors straightforward decoding over the low-level backend's raw jump
//! speed, so there's no configurable byte order to get right.

use crate::error::CompileError;
use crate::isa::Opcode;
use crate::section::{BlockType, Inst};
use crate::types::{Signature, ValueType};

/// Pseudo-tags used only by the high-level encoding, for the structured
/// control constructs the flat [`Opcode`] vocabulary has no room for. Chosen
/// comfortably above the highest `Opcode` discriminant so the two tag spaces
/// never collide.
const TAG_BLOCK: u8 = 250;
const TAG_LOOP: u8 = 251;
const TAG_IF: u8 = 252;
const TAG_NOP: u8 = 253;

#[derive(Debug, Clone)]
pub struct Code {
    pub bytes: Vec<u8>,
    pub num_params: u32,
    pub num_locals: u32,
    pub return_arity: u32,
}

pub fn compile(code: &[Inst], locals: &[ValueType], signature: &Signature) -> Result<Code, CompileError> {
    let mut bytes = Vec::new();
    encode_seq(code, &mut bytes)?;
    // An implicit `return` covers falling off the end of the function body,
    // unless the body already ends in one (which would make this one dead).
    if !matches!(code.last(), Some(Inst::Return)) {
        bytes.push(Opcode::Return as u8);
    }
    Ok(Code {
        bytes,
        num_params: signature.params().len() as u32,
        num_locals: locals.len() as u32,
        return_arity: signature.return_type().is_some() as u32,
    })
}

fn encode_seq(insts: &[Inst], out: &mut Vec<u8>) -> Result<(), CompileError> {
    for inst in insts {
        encode_inst(inst, out)?;
    }
    Ok(())
}

fn block_type_byte(ty: BlockType) -> u8 {
    match ty {
        BlockType::Empty => 0,
        BlockType::Value(ValueType::I32) => 1,
        BlockType::Value(ValueType::I64) => 2,
        BlockType::Value(ValueType::F32) => 3,
        BlockType::Value(ValueType::F64) => 4,
    }
}

pub(crate) fn block_type_from_byte(b: u8) -> BlockType {
    match b {
        1 => BlockType::Value(ValueType::I32),
        2 => BlockType::Value(ValueType::I64),
        3 => BlockType::Value(ValueType::F32),
        4 => BlockType::Value(ValueType::F64),
        _ => BlockType::Empty,
    }
}

fn encode_inst(inst: &Inst, out: &mut Vec<u8>) -> Result<(), CompileError> {
    match inst {
        Inst::Nop => out.push(TAG_NOP),
        Inst::Unreachable => out.push(Opcode::Unreachable as u8),
        Inst::Block { ty, body } => {
            out.push(TAG_BLOCK);
            out.push(block_type_byte(*ty));
            let mut body_bytes = Vec::new();
            encode_seq(body, &mut body_bytes)?;
            out.extend_from_slice(&(body_bytes.len() as u32).to_be_bytes());
            out.extend_from_slice(&body_bytes);
        }
        Inst::Loop { ty, body } => {
            out.push(TAG_LOOP);
            out.push(block_type_byte(*ty));
            let mut body_bytes = Vec::new();
            encode_seq(body, &mut body_bytes)?;
            out.extend_from_slice(&(body_bytes.len() as u32).to_be_bytes());
            out.extend_from_slice(&body_bytes);
        }
        Inst::If { ty, then, else_ } => {
            out.push(TAG_IF);
            out.push(block_type_byte(*ty));
            let mut then_bytes = Vec::new();
            encode_seq(then, &mut then_bytes)?;
            out.extend_from_slice(&(then_bytes.len() as u32).to_be_bytes());
            out.extend_from_slice(&then_bytes);
            let mut else_bytes = Vec::new();
            if let Some(else_body) = else_ {
                encode_seq(else_body, &mut else_bytes)?;
            }
            out.extend_from_slice(&(else_bytes.len() as u32).to_be_bytes());
            out.extend_from_slice(&else_bytes);
        }
        Inst::Br(depth) => {
            out.push(Opcode::Br as u8);
            out.extend_from_slice(&depth.to_be_bytes());
        }
        Inst::BrIf(depth) => {
            out.push(Opcode::BrIfNez as u8);
            out.extend_from_slice(&depth.to_be_bytes());
        }
        Inst::BrTable { targets, default } => {
            out.push(Opcode::BrTable as u8);
            out.extend_from_slice(&(targets.len() as u32).to_be_bytes());
            for t in targets {
                out.extend_from_slice(&t.to_be_bytes());
            }
            out.extend_from_slice(&default.to_be_bytes());
        }
        Inst::Return => out.push(Opcode::Return as u8),
        Inst::Call(idx) => {
            out.push(Opcode::Call as u8);
            out.extend_from_slice(&idx.to_be_bytes());
        }
        Inst::CallIndirect(idx) => {
            out.push(Opcode::CallIndirect as u8);
            out.extend_from_slice(&idx.to_be_bytes());
        }
        Inst::Drop => out.push(Opcode::Drop as u8),
        Inst::Select => out.push(Opcode::Select as u8),
        Inst::LocalGet(idx) => {
            out.push(Opcode::LocalGet as u8);
            out.extend_from_slice(&idx.to_be_bytes());
        }
        Inst::LocalSet(idx) => {
            out.push(Opcode::LocalSet as u8);
            out.extend_from_slice(&idx.to_be_bytes());
        }
        Inst::LocalTee(idx) => {
            out.push(Opcode::LocalTee as u8);
            out.extend_from_slice(&idx.to_be_bytes());
        }
        Inst::GlobalGet(idx) => {
            out.push(Opcode::GlobalGet as u8);
            out.extend_from_slice(&idx.to_be_bytes());
        }
        Inst::GlobalSet(idx) => {
            out.push(Opcode::GlobalSet as u8);
            out.extend_from_slice(&idx.to_be_bytes());
        }
        Inst::MemorySize => out.push(Opcode::MemorySize as u8),
        Inst::MemoryGrow => out.push(Opcode::MemoryGrow as u8),
        Inst::I32Const(v) => {
            out.push(Opcode::I32Const as u8);
            out.extend_from_slice(&v.to_be_bytes());
        }
        Inst::I64Const(v) => {
            out.push(Opcode::I64Const as u8);
            out.extend_from_slice(&v.to_be_bytes());
        }
        Inst::F32Const(v) => {
            out.push(Opcode::F32Const as u8);
            out.extend_from_slice(&v.to_be_bytes());
        }
        Inst::F64Const(v) => {
            out.push(Opcode::F64Const as u8);
            out.extend_from_slice(&v.to_be_bytes());
        }
        Inst::Simple(op) => out.push(*op as u8),
        memarg_inst => encode_memarg_inst(memarg_inst, out)?,
    }
    Ok(())
}

fn encode_memarg_inst(inst: &Inst, out: &mut Vec<u8>) -> Result<(), CompileError> {
    macro_rules! mem {
        ($op:ident, $memarg:expr) => {{
            out.push(Opcode::$op as u8);
            out.extend_from_slice(&$memarg.offset.to_be_bytes());
        }};
    }
    match inst {
        Inst::I32Load(m) => mem!(I32Load, m),
        Inst::I64Load(m) => mem!(I64Load, m),
        Inst::F32Load(m) => mem!(F32Load, m),
        Inst::F64Load(m) => mem!(F64Load, m),
        Inst::I32Load8S(m) => mem!(I32Load8S, m),
        Inst::I32Load8U(m) => mem!(I32Load8U, m),
        Inst::I32Load16S(m) => mem!(I32Load16S, m),
        Inst::I32Load16U(m) => mem!(I32Load16U, m),
        Inst::I64Load8S(m) => mem!(I64Load8S, m),
        Inst::I64Load8U(m) => mem!(I64Load8U, m),
        Inst::I64Load16S(m) => mem!(I64Load16S, m),
        Inst::I64Load16U(m) => mem!(I64Load16U, m),
        Inst::I64Load32S(m) => mem!(I64Load32S, m),
        Inst::I64Load32U(m) => mem!(I64Load32U, m),
        Inst::I32Store(m) => mem!(I32Store, m),
        Inst::I64Store(m) => mem!(I64Store, m),
        Inst::F32Store(m) => mem!(F32Store, m),
        Inst::F64Store(m) => mem!(F64Store, m),
        Inst::I32Store8(m) => mem!(I32Store8, m),
        Inst::I32Store16(m) => mem!(I32Store16, m),
        Inst::I64Store8(m) => mem!(I64Store8, m),
        Inst::I64Store16(m) => mem!(I64Store16, m),
        Inst::I64Store32(m) => mem!(I64Store32, m),
        other => return Err(CompileError(format!("unhandled instruction in high-level compiler: {other:?}"))),
    }
    Ok(())
}
