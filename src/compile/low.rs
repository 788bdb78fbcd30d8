//! Low-level compiler: flattens Wasm's structured control flow into a plain
//! stack machine with absolute byte-offset jumps.
//!
//! Structured code has to be unwound to plain gotos because interpreting
//! `block`/`loop`/`if` directly means scanning forward for the matching `end`
//! every time a branch is taken. Forward branches (exiting a `block`, the
//! `else` arm of an `if`, every non-default `br_table` target) don't know
//! their destination until the compiler reaches it, so each is recorded as a
//! [`Reloc`] and patched once the destination's byte offset is known —
//! backward branches (`loop`) know their destination immediately, since the
//! compiler already walked past it.
//!
//! Locals and parameters live in a side array at interpretation time, not on
//! the operand stack — so unlike the nested encoding, `local.get`/`.set`/
//! `.tee` address an absolute local index here, not a stack-relative depth.

use byteorder::{BigEndian, ByteOrder as _, LittleEndian, NativeEndian};

use crate::engine::ByteOrder;
use crate::error::CompileError;
use crate::isa::{DropKeep, Keep, Opcode, Reloc, Target};
use crate::section::{BlockType, Inst};
use crate::types::{Signature, ValueType};

#[derive(Debug, Clone)]
pub struct Code {
    pub bytes: Vec<u8>,
    pub num_params: u32,
    pub num_locals: u32,
    pub return_arity: u32,
    pub byte_order: ByteOrder,
}

struct LabelFrame {
    height_at_entry: u32,
    branch_arity: u32,
    loop_start_pc: Option<u32>,
    pending_relocs: Vec<Reloc>,
}

struct Compiler<'a> {
    bytes: Vec<u8>,
    labels: Vec<LabelFrame>,
    height: u32,
    byte_order: ByteOrder,
    types: &'a [Signature],
    call_signature: &'a dyn Fn(u32) -> Signature,
}

pub fn compile(
    code: &[Inst],
    locals: &[ValueType],
    signature: &Signature,
    byte_order: ByteOrder,
    types: &[Signature],
    call_signature: &dyn Fn(u32) -> Signature,
) -> Result<Code, CompileError> {
    let mut compiler = Compiler {
        bytes: Vec::new(),
        labels: Vec::new(),
        height: 0,
        byte_order,
        types,
        call_signature,
    };
    let ends_in_return = compiler.compile_seq(code)?;
    // An implicit `return` covers falling off the end of the function body,
    // unless the body already ends in one (which would make this one dead).
    if !ends_in_return {
        compiler.emit_return(signature.return_type().is_some());
    }
    Ok(Code {
        bytes: compiler.bytes,
        num_params: signature.params().len() as u32,
        num_locals: locals.len() as u32,
        return_arity: signature.return_type().is_some() as u32,
        byte_order,
    })
}

fn write_u32(order: ByteOrder, out: &mut Vec<u8>, value: u32) {
    let mut buf = [0u8; 4];
    match order {
        ByteOrder::Big => BigEndian::write_u32(&mut buf, value),
        ByteOrder::Little => LittleEndian::write_u32(&mut buf, value),
        ByteOrder::Native => NativeEndian::write_u32(&mut buf, value),
    }
    out.extend_from_slice(&buf);
}

fn write_u64(order: ByteOrder, out: &mut Vec<u8>, value: u64) {
    let mut buf = [0u8; 8];
    match order {
        ByteOrder::Big => BigEndian::write_u64(&mut buf, value),
        ByteOrder::Little => LittleEndian::write_u64(&mut buf, value),
        ByteOrder::Native => NativeEndian::write_u64(&mut buf, value),
    }
    out.extend_from_slice(&buf);
}

pub(crate) fn read_u32(order: ByteOrder, bytes: &[u8]) -> u32 {
    match order {
        ByteOrder::Big => BigEndian::read_u32(bytes),
        ByteOrder::Little => LittleEndian::read_u32(bytes),
        ByteOrder::Native => NativeEndian::read_u32(bytes),
    }
}

pub(crate) fn read_u64(order: ByteOrder, bytes: &[u8]) -> u64 {
    match order {
        ByteOrder::Big => BigEndian::read_u64(bytes),
        ByteOrder::Little => LittleEndian::read_u64(bytes),
        ByteOrder::Native => NativeEndian::read_u64(bytes),
    }
}

fn block_arity(ty: BlockType) -> u32 {
    match ty {
        BlockType::Empty => 0,
        BlockType::Value(_) => 1,
    }
}

impl<'a> Compiler<'a> {
    fn pc(&self) -> u32 {
        self.bytes.len() as u32
    }

    fn push_op(&mut self, op: Opcode) {
        self.bytes.push(op as u8);
    }

    fn push_u32(&mut self, v: u32) {
        write_u32(self.byte_order, &mut self.bytes, v);
    }

    fn push_i32(&mut self, v: i32) {
        write_u32(self.byte_order, &mut self.bytes, v as u32);
    }

    fn push_i64(&mut self, v: i64) {
        write_u64(self.byte_order, &mut self.bytes, v as u64);
    }

    fn drop_keep_to(&self, frame_height: u32, arity: u32) -> DropKeep {
        let drop = self.height.saturating_sub(frame_height + arity);
        DropKeep::new(drop, if arity == 0 { Keep::None } else { Keep::Single })
    }

    fn emit_target_reloc(&mut self, depth: u32) {
        let idx = self.labels.len() - 1 - depth as usize;
        let frame_height = self.labels[idx].height_at_entry;
        let arity = self.labels[idx].branch_arity;
        let drop_keep = self.drop_keep_to(frame_height, arity);
        if let Some(loop_pc) = self.labels[idx].loop_start_pc {
            self.push_target(Target { dst_pc: loop_pc, drop_keep });
        } else {
            let pc = self.pc();
            self.push_target(Target { dst_pc: 0, drop_keep });
            self.labels[idx].pending_relocs.push(Reloc::Br { pc });
        }
    }

    fn push_target(&mut self, target: Target) {
        self.push_u32(target.dst_pc);
        self.bytes.push(target.drop_keep.keep_byte());
        self.push_u32(target.drop_keep.drop);
    }

    fn emit_return(&mut self, has_value: bool) {
        self.push_op(Opcode::Return);
        let drop = self.height.saturating_sub(has_value as u32);
        let keep = if has_value { Keep::Single } else { Keep::None };
        self.bytes.push(DropKeep::new(drop, keep).keep_byte());
        self.push_u32(drop);
    }

    /// Compile a sequence, stopping at the first terminal instruction (the
    /// rest of `insts` would be unreachable dead code). Returns whether the
    /// last instruction actually emitted was `Return`.
    fn compile_seq(&mut self, insts: &[Inst]) -> Result<bool, CompileError> {
        let mut ends_in_return = false;
        for inst in insts {
            let terminal = self.compile_inst(inst)?;
            ends_in_return = matches!(inst, Inst::Return);
            if terminal {
                break;
            }
        }
        Ok(ends_in_return)
    }

    /// Compile one instruction, returning whether it's terminal (`br`,
    /// `br_table`, `return`, `unreachable` — anything after it in the same
    /// block is unreachable).
    fn compile_inst(&mut self, inst: &Inst) -> Result<bool, CompileError> {
        let terminal = match inst {
            Inst::Nop => false,
            Inst::Unreachable => {
                self.push_op(Opcode::Unreachable);
                true
            }
            Inst::Block { ty, body } => {
                self.labels.push(LabelFrame {
                    height_at_entry: self.height,
                    branch_arity: block_arity(*ty),
                    loop_start_pc: None,
                    pending_relocs: Vec::new(),
                });
                self.compile_seq(body)?;
                self.end_block();
                false
            }
            Inst::Loop { ty, body } => {
                let height_at_entry = self.height;
                self.labels.push(LabelFrame {
                    height_at_entry,
                    branch_arity: 0,
                    loop_start_pc: Some(self.pc()),
                    pending_relocs: Vec::new(),
                });
                self.compile_seq(body)?;
                self.labels.pop();
                self.height = height_at_entry + block_arity(*ty);
                false
            }
            Inst::If { ty, then, else_ } => {
                self.height = self.height.saturating_sub(1);
                self.push_op(Opcode::BrIfEqz);
                let jump_to_else_pc = self.pc();
                self.push_target(Target {
                    dst_pc: 0,
                    drop_keep: DropKeep::new(0, Keep::None),
                });

                self.labels.push(LabelFrame {
                    height_at_entry: self.height,
                    branch_arity: block_arity(*ty),
                    loop_start_pc: None,
                    pending_relocs: Vec::new(),
                });
                self.compile_seq(then)?;

                if let Some(else_body) = else_ {
                    self.push_op(Opcode::Br);
                    let jump_to_end_pc = self.pc();
                    self.push_target(Target {
                        dst_pc: 0,
                        drop_keep: DropKeep::new(0, Keep::None),
                    });
                    self.patch_branch(jump_to_else_pc, self.pc());
                    self.height = self.labels.last().unwrap().height_at_entry;
                    self.compile_seq(else_body)?;
                    self.patch_branch(jump_to_end_pc, self.pc());
                } else {
                    self.patch_branch(jump_to_else_pc, self.pc());
                }
                self.end_block();
                false
            }
            Inst::Br(depth) => {
                self.push_op(Opcode::Br);
                self.emit_target_reloc(*depth);
                true
            }
            Inst::BrIf(depth) => {
                self.height = self.height.saturating_sub(1);
                self.push_op(Opcode::BrIfNez);
                self.emit_target_reloc(*depth);
                false
            }
            Inst::BrTable { targets, default } => {
                self.height = self.height.saturating_sub(1);
                self.push_op(Opcode::BrTable);
                self.push_u32(targets.len() as u32);
                for depth in targets {
                    self.emit_target_reloc(*depth);
                }
                self.emit_target_reloc(*default);
                true
            }
            Inst::Return => {
                let has_value = self.height > 0;
                self.emit_return(has_value);
                true
            }
            Inst::Call(idx) => {
                let sig = (self.call_signature)(*idx);
                self.height = self.height.saturating_sub(sig.params().len() as u32);
                self.height += sig.return_type().is_some() as u32;
                self.push_op(Opcode::Call);
                self.push_u32(*idx);
                false
            }
            Inst::CallIndirect(type_idx) => {
                self.height = self.height.saturating_sub(1);
                let sig = &self.types[*type_idx as usize];
                self.height = self.height.saturating_sub(sig.params().len() as u32);
                self.height += sig.return_type().is_some() as u32;
                self.push_op(Opcode::CallIndirect);
                self.push_u32(*type_idx);
                false
            }
            Inst::Drop => {
                self.height = self.height.saturating_sub(1);
                self.push_op(Opcode::Drop);
                false
            }
            Inst::Select => {
                self.height = self.height.saturating_sub(2);
                self.push_op(Opcode::Select);
                false
            }
            Inst::LocalGet(idx) => {
                self.height += 1;
                self.push_op(Opcode::LocalGet);
                self.push_u32(*idx);
                false
            }
            Inst::LocalSet(idx) => {
                self.height = self.height.saturating_sub(1);
                self.push_op(Opcode::LocalSet);
                self.push_u32(*idx);
                false
            }
            Inst::LocalTee(idx) => {
                self.push_op(Opcode::LocalTee);
                self.push_u32(*idx);
                false
            }
            Inst::GlobalGet(idx) => {
                self.height += 1;
                self.push_op(Opcode::GlobalGet);
                self.push_u32(*idx);
                false
            }
            Inst::GlobalSet(idx) => {
                self.height = self.height.saturating_sub(1);
                self.push_op(Opcode::GlobalSet);
                self.push_u32(*idx);
                false
            }
            Inst::MemorySize => {
                self.height += 1;
                self.push_op(Opcode::MemorySize);
                false
            }
            Inst::MemoryGrow => {
                self.push_op(Opcode::MemoryGrow);
                false
            }
            Inst::I32Const(v) => {
                self.height += 1;
                self.push_op(Opcode::I32Const);
                self.push_i32(*v);
                false
            }
            Inst::I64Const(v) => {
                self.height += 1;
                self.push_op(Opcode::I64Const);
                self.push_i64(*v);
                false
            }
            Inst::F32Const(v) => {
                self.height += 1;
                self.push_op(Opcode::F32Const);
                self.push_u32(*v);
                false
            }
            Inst::F64Const(v) => {
                self.height += 1;
                self.push_op(Opcode::F64Const);
                write_u64(self.byte_order, &mut self.bytes, *v);
                false
            }
            Inst::Simple(op) => {
                self.compile_simple(*op);
                false
            }
            memarg_inst => {
                self.compile_memarg(memarg_inst)?;
                false
            }
        };
        Ok(terminal)
    }

    fn end_block(&mut self) {
        let frame = self.labels.pop().expect("compile_inst only calls end_block for a frame it just pushed");
        self.height = frame.height_at_entry + frame.branch_arity;
        let end_pc = self.pc();
        for reloc in frame.pending_relocs {
            match reloc {
                Reloc::Br { pc } => self.patch_branch(pc, end_pc),
                Reloc::BrTable { pc, .. } => self.patch_branch(pc, end_pc),
            }
        }
    }

    fn patch_branch(&mut self, target_field_pc: u32, dst_pc: u32) {
        let mut patched = Vec::with_capacity(4);
        write_u32(self.byte_order, &mut patched, dst_pc);
        self.bytes[target_field_pc as usize..target_field_pc as usize + 4].copy_from_slice(&patched);
    }

    fn compile_simple(&mut self, op: Opcode) {
        let (pops, pushes) = simple_arity(op);
        self.height = self.height.saturating_sub(pops) + pushes;
        self.push_op(op);
    }

    fn compile_memarg(&mut self, inst: &Inst) -> Result<(), CompileError> {
        macro_rules! load {
            ($op:ident, $m:expr) => {{
                self.push_op(Opcode::$op);
                self.push_u32($m.offset);
            }};
        }
        macro_rules! store {
            ($op:ident, $m:expr) => {{
                self.height = self.height.saturating_sub(2);
                self.push_op(Opcode::$op);
                self.push_u32($m.offset);
            }};
        }
        match inst {
            Inst::I32Load(m) => load!(I32Load, m),
            Inst::I64Load(m) => load!(I64Load, m),
            Inst::F32Load(m) => load!(F32Load, m),
            Inst::F64Load(m) => load!(F64Load, m),
            Inst::I32Load8S(m) => load!(I32Load8S, m),
            Inst::I32Load8U(m) => load!(I32Load8U, m),
            Inst::I32Load16S(m) => load!(I32Load16S, m),
            Inst::I32Load16U(m) => load!(I32Load16U, m),
            Inst::I64Load8S(m) => load!(I64Load8S, m),
            Inst::I64Load8U(m) => load!(I64Load8U, m),
            Inst::I64Load16S(m) => load!(I64Load16S, m),
            Inst::I64Load16U(m) => load!(I64Load16U, m),
            Inst::I64Load32S(m) => load!(I64Load32S, m),
            Inst::I64Load32U(m) => load!(I64Load32U, m),
            Inst::I32Store(m) => store!(I32Store, m),
            Inst::I64Store(m) => store!(I64Store, m),
            Inst::F32Store(m) => store!(F32Store, m),
            Inst::F64Store(m) => store!(F64Store, m),
            Inst::I32Store8(m) => store!(I32Store8, m),
            Inst::I32Store16(m) => store!(I32Store16, m),
            Inst::I64Store8(m) => store!(I64Store8, m),
            Inst::I64Store16(m) => store!(I64Store16, m),
            Inst::I64Store32(m) => store!(I64Store32, m),
            other => return Err(CompileError(format!("unhandled instruction in low-level compiler: {other:?}"))),
        }
        Ok(())
    }
}

/// Net stack effect (pops, pushes) of an arity-fixed opcode.
fn simple_arity(op: Opcode) -> (u32, u32) {
    use Opcode::*;
    match op {
        I32Eqz | I64Eqz => (1, 1),
        I32Clz | I32Ctz | I32Popcnt | I64Clz | I64Ctz | I64Popcnt => (1, 1),
        F32Abs | F32Neg | F32Ceil | F32Floor | F32Trunc | F32Nearest | F32Sqrt => (1, 1),
        F64Abs | F64Neg | F64Ceil | F64Floor | F64Trunc | F64Nearest | F64Sqrt => (1, 1),
        I32WrapI64 | I32TruncSF32 | I32TruncUF32 | I32TruncSF64 | I32TruncUF64 => (1, 1),
        I64ExtendSI32 | I64ExtendUI32 | I64TruncSF32 | I64TruncUF32 | I64TruncSF64 | I64TruncUF64 => (1, 1),
        F32ConvertSI32 | F32ConvertUI32 | F32ConvertSI64 | F32ConvertUI64 | F32DemoteF64 => (1, 1),
        F64ConvertSI32 | F64ConvertUI32 | F64ConvertSI64 | F64ConvertUI64 | F64PromoteF32 => (1, 1),
        I32ReinterpretF32 | I64ReinterpretF64 | F32ReinterpretI32 | F64ReinterpretI64 => (1, 1),
        _ => (2, 1),
    }
}
