//! High-level interpreter: recursive descent over the structured, self-
//! describing byte encoding [`crate::compile::high`] produces. Block/Loop/If
//! nesting in the source is still nesting here — a branch that exits several
//! levels just bubbles a [`Flow::Branch`] up through the matching number of
//! recursive calls, rather than jumping through a flat instruction stream.

use crate::common::stack::StackWithLimit;
use crate::compile::high::{block_type_from_byte, Code};
use crate::engine::Engine;
use crate::error::{TrapCode, TrapError};
use crate::func::{FuncInstance, FuncRef};
use crate::host::Externals;
use crate::instance::Instance;
use crate::isa::Opcode;
use crate::memory::MemoryRef;
use crate::section::BlockType;
use crate::types::Signature;
use crate::value::{UntypedValue, Value};

use super::ops;

const TAG_BLOCK: u8 = 250;
const TAG_LOOP: u8 = 251;
const TAG_IF: u8 = 252;
const TAG_NOP: u8 = 253;

/// How a sequence of instructions finished running.
enum Flow {
    /// Ran off the end normally.
    Normal,
    /// A `br`/`br_if`/`br_table` is unwinding `n` more enclosing labels.
    Branch(u32),
    /// A `return` is unwinding to the function's own boundary.
    Return,
}

struct Ctx<'a, E: Externals> {
    instance: &'a Instance,
    locals: &'a mut [UntypedValue],
    stack: &'a mut StackWithLimit<UntypedValue>,
    externals: &'a mut E,
}

pub fn execute<E: Externals>(
    engine: &Engine,
    instance: &Instance,
    code: &Code,
    signature: &Signature,
    args: &[Value],
    externals: &mut E,
) -> Result<Option<Value>, TrapError> {
    let mut locals = Vec::with_capacity((code.num_params + code.num_locals) as usize);
    locals.extend(args.iter().map(|v| UntypedValue::from(*v)));
    locals.resize(locals.len() + code.num_locals as usize, UntypedValue::from_bits(0));

    let mut stack = StackWithLimit::with_limit(engine.config().value_stack_limit());
    let mut ctx = Ctx {
        instance,
        locals: &mut locals,
        stack: &mut stack,
        externals,
    };

    let flow = exec_seq(&code.bytes, &mut ctx)?;
    match flow {
        Flow::Normal | Flow::Return => {
            unwind_to(ctx.stack, 0, code.return_arity);
            let result = if code.return_arity == 1 {
                Some(pop(ctx.stack).with_type(
                    signature
                        .return_type()
                        .expect("return_arity == 1 implies the signature has a return type"),
                ))
            } else {
                None
            };
            Ok(result)
        }
        Flow::Branch(_) => unreachable!("validation guarantees a function body never branches past its own end"),
    }
}

fn pop(stack: &mut StackWithLimit<UntypedValue>) -> UntypedValue {
    stack.pop().expect("validated stack shape guarantees an operand here")
}

fn push<E: Externals>(ctx: &mut Ctx<E>, value: UntypedValue) -> Result<(), TrapError> {
    ctx.stack.push(value).map_err(|_| TrapError::Code(TrapCode::StackOverflow))
}

/// Truncate the stack to `height + arity`, keeping the top value first if
/// `arity == 1`. `height` is always the live stack length recorded when the
/// label being unwound to was entered, so this is exact no matter how deep
/// the branch originated from.
fn unwind_to(stack: &mut StackWithLimit<UntypedValue>, height: usize, arity: u32) {
    if arity == 1 {
        let top = pop(stack);
        stack.truncate(height);
        stack.push(top).expect("unwind only restores a value it just popped");
    } else {
        stack.truncate(height);
    }
}

fn arity_of(ty: BlockType) -> u32 {
    matches!(ty, BlockType::Value(_)) as u32
}

fn read_u32(bytes: &[u8], pos: usize) -> u32 {
    u32::from_be_bytes(bytes[pos..pos + 4].try_into().unwrap())
}

fn read_u64(bytes: &[u8], pos: usize) -> u64 {
    u64::from_be_bytes(bytes[pos..pos + 8].try_into().unwrap())
}

/// Run one instruction sequence (a function body, or a block/loop/if arm)
/// from start to finish, or until a branch/return escapes it.
fn exec_seq<E: Externals>(bytes: &[u8], ctx: &mut Ctx<E>) -> Result<Flow, TrapError> {
    let mut pos = 0;
    while pos < bytes.len() {
        let tag = bytes[pos];
        pos += 1;
        match tag {
            TAG_NOP => {}
            TAG_BLOCK => {
                let ty = block_type_from_byte(bytes[pos]);
                pos += 1;
                let len = read_u32(bytes, pos) as usize;
                pos += 4;
                let body = &bytes[pos..pos + len];
                pos += len;
                let height = ctx.stack.len();
                match exec_seq(body, ctx)? {
                    Flow::Normal => {}
                    Flow::Branch(0) => unwind_to(ctx.stack, height, arity_of(ty)),
                    Flow::Branch(n) => return Ok(Flow::Branch(n - 1)),
                    Flow::Return => return Ok(Flow::Return),
                }
            }
            TAG_LOOP => {
                // A loop's label type is its params, not its result type (empty in
                // this subset), so the result-type byte here only needs skipping.
                pos += 1;
                let len = read_u32(bytes, pos) as usize;
                pos += 4;
                let body = &bytes[pos..pos + len];
                pos += len;
                let height = ctx.stack.len();
                loop {
                    match exec_seq(body, ctx)? {
                        Flow::Normal => break,
                        Flow::Branch(0) => {
                            unwind_to(ctx.stack, height, 0);
                            continue;
                        }
                        Flow::Branch(n) => return Ok(Flow::Branch(n - 1)),
                        Flow::Return => return Ok(Flow::Return),
                    }
                }
            }
            TAG_IF => {
                let ty = block_type_from_byte(bytes[pos]);
                pos += 1;
                let then_len = read_u32(bytes, pos) as usize;
                pos += 4;
                let then_body = &bytes[pos..pos + then_len];
                pos += then_len;
                let else_len = read_u32(bytes, pos) as usize;
                pos += 4;
                let else_body = &bytes[pos..pos + else_len];
                pos += else_len;

                let cond = pop(ctx.stack).i32();
                let height = ctx.stack.len();
                let arm = if cond != 0 { then_body } else { else_body };
                match exec_seq(arm, ctx)? {
                    Flow::Normal => {}
                    Flow::Branch(0) => unwind_to(ctx.stack, height, arity_of(ty)),
                    Flow::Branch(n) => return Ok(Flow::Branch(n - 1)),
                    Flow::Return => return Ok(Flow::Return),
                }
            }

            byte => {
                let opcode = Opcode::from_u8(byte).expect("compiler only emits recognized opcodes and control tags");
                match opcode {
                    Opcode::Unreachable => return Err(TrapError::Code(TrapCode::Unreachable)),

                    Opcode::Br => {
                        let depth = read_u32(bytes, pos);
                        return Ok(Flow::Branch(depth));
                    }
                    Opcode::BrIfNez => {
                        let depth = read_u32(bytes, pos);
                        pos += 4;
                        if pop(ctx.stack).i32() != 0 {
                            return Ok(Flow::Branch(depth));
                        }
                    }
                    Opcode::BrIfEqz => unreachable!("the high-level compiler only ever emits BrIfNez"),
                    Opcode::BrTable => {
                        let count = read_u32(bytes, pos) as usize;
                        pos += 4;
                        let mut targets = Vec::with_capacity(count);
                        for _ in 0..count {
                            targets.push(read_u32(bytes, pos));
                            pos += 4;
                        }
                        let default = read_u32(bytes, pos);
                        pos += 4;
                        let index = pop(ctx.stack).i32();
                        let depth = if index >= 0 && (index as usize) < count {
                            targets[index as usize]
                        } else {
                            default
                        };
                        return Ok(Flow::Branch(depth));
                    }
                    Opcode::Return => return Ok(Flow::Return),

                    Opcode::Call => {
                        let idx = read_u32(bytes, pos);
                        pos += 4;
                        let callee = ctx
                            .instance
                            .func_by_index(idx)
                            .expect("validation guarantees call targets are in range");
                        call_function(&callee, ctx)?;
                    }
                    Opcode::CallIndirect => {
                        let type_idx = read_u32(bytes, pos);
                        pos += 4;
                        let elem_idx = pop(ctx.stack).i32() as u32;
                        let table = ctx
                            .instance
                            .table_by_index(0)
                            .expect("validation guarantees a table exists for call_indirect");
                        let slot = table.get(elem_idx).ok_or(TrapError::Code(TrapCode::TableAccessOutOfBounds))?;
                        let callee = slot.ok_or(TrapError::Code(TrapCode::ElemUninitialized))?;
                        if callee.signature() != ctx.instance.signature_by_index(type_idx) {
                            return Err(TrapError::Code(TrapCode::UnexpectedSignature));
                        }
                        call_function(&callee, ctx)?;
                    }

                    Opcode::Drop => {
                        pop(ctx.stack);
                    }
                    Opcode::Select => {
                        let cond = pop(ctx.stack).i32();
                        let on_false = pop(ctx.stack);
                        let on_true = pop(ctx.stack);
                        push(ctx, if cond != 0 { on_true } else { on_false })?;
                    }

                    Opcode::LocalGet => {
                        let idx = read_u32(bytes, pos) as usize;
                        pos += 4;
                        push(ctx, ctx.locals[idx])?;
                    }
                    Opcode::LocalSet => {
                        let idx = read_u32(bytes, pos) as usize;
                        pos += 4;
                        let value = pop(ctx.stack);
                        ctx.locals[idx] = value;
                    }
                    Opcode::LocalTee => {
                        let idx = read_u32(bytes, pos) as usize;
                        pos += 4;
                        ctx.locals[idx] = *ctx.stack.top().expect("validated stack shape guarantees an operand here");
                    }
                    Opcode::GlobalGet => {
                        let idx = read_u32(bytes, pos);
                        pos += 4;
                        let global = ctx
                            .instance
                            .global_by_index(idx)
                            .expect("validation guarantees global indices are in range");
                        push(ctx, UntypedValue::from(global.get()))?;
                    }
                    Opcode::GlobalSet => {
                        let idx = read_u32(bytes, pos);
                        pos += 4;
                        let global = ctx
                            .instance
                            .global_by_index(idx)
                            .expect("validation guarantees global indices are in range");
                        let value = pop(ctx.stack).with_type(global.value_type());
                        global.set(value).expect("validation guarantees global.set is well-typed and mutable");
                    }

                    Opcode::MemorySize => {
                        let memory = ctx.instance.memory_by_index(0).expect("validation guarantees a memory exists");
                        push(ctx, UntypedValue::from(memory.current_pages() as i32))?;
                    }
                    Opcode::MemoryGrow => {
                        let memory = ctx.instance.memory_by_index(0).expect("validation guarantees a memory exists");
                        let delta = pop(ctx.stack).i32() as u32;
                        let result = memory.grow(delta).map(|prev| prev as i32).unwrap_or(-1);
                        push(ctx, UntypedValue::from(result))?;
                    }

                    Opcode::I32Const => {
                        push(ctx, UntypedValue::from(read_u32(bytes, pos) as i32))?;
                        pos += 4;
                    }
                    Opcode::I64Const => {
                        push(ctx, UntypedValue::from(read_u64(bytes, pos) as i64))?;
                        pos += 8;
                    }
                    Opcode::F32Const => {
                        push(ctx, UntypedValue::from(read_u32(bytes, pos)))?;
                        pos += 4;
                    }
                    Opcode::F64Const => {
                        push(ctx, UntypedValue::from_bits(read_u64(bytes, pos)))?;
                        pos += 8;
                    }

                    Opcode::I32Load | Opcode::F32Load => {
                        let buf = load_bytes::<4>(ctx, bytes, &mut pos)?;
                        push(ctx, UntypedValue::from(u32::from_le_bytes(buf)))?;
                    }
                    Opcode::I64Load | Opcode::F64Load => {
                        let buf = load_bytes::<8>(ctx, bytes, &mut pos)?;
                        push(ctx, UntypedValue::from_bits(u64::from_le_bytes(buf)))?;
                    }
                    Opcode::I32Load8S => {
                        let buf = load_bytes::<1>(ctx, bytes, &mut pos)?;
                        push(ctx, UntypedValue::from(buf[0] as i8 as i32))?;
                    }
                    Opcode::I32Load8U => {
                        let buf = load_bytes::<1>(ctx, bytes, &mut pos)?;
                        push(ctx, UntypedValue::from(buf[0] as u32))?;
                    }
                    Opcode::I32Load16S => {
                        let buf = load_bytes::<2>(ctx, bytes, &mut pos)?;
                        push(ctx, UntypedValue::from(i16::from_le_bytes(buf) as i32))?;
                    }
                    Opcode::I32Load16U => {
                        let buf = load_bytes::<2>(ctx, bytes, &mut pos)?;
                        push(ctx, UntypedValue::from(u16::from_le_bytes(buf) as u32))?;
                    }
                    Opcode::I64Load8S => {
                        let buf = load_bytes::<1>(ctx, bytes, &mut pos)?;
                        push(ctx, UntypedValue::from(buf[0] as i8 as i64))?;
                    }
                    Opcode::I64Load8U => {
                        let buf = load_bytes::<1>(ctx, bytes, &mut pos)?;
                        push(ctx, UntypedValue::from(buf[0] as u64))?;
                    }
                    Opcode::I64Load16S => {
                        let buf = load_bytes::<2>(ctx, bytes, &mut pos)?;
                        push(ctx, UntypedValue::from(i16::from_le_bytes(buf) as i64))?;
                    }
                    Opcode::I64Load16U => {
                        let buf = load_bytes::<2>(ctx, bytes, &mut pos)?;
                        push(ctx, UntypedValue::from(u16::from_le_bytes(buf) as u64))?;
                    }
                    Opcode::I64Load32S => {
                        let buf = load_bytes::<4>(ctx, bytes, &mut pos)?;
                        push(ctx, UntypedValue::from(i32::from_le_bytes(buf) as i64))?;
                    }
                    Opcode::I64Load32U => {
                        let buf = load_bytes::<4>(ctx, bytes, &mut pos)?;
                        push(ctx, UntypedValue::from(u32::from_le_bytes(buf) as u64))?;
                    }

                    Opcode::I32Store | Opcode::F32Store => {
                        let offset = read_u32(bytes, pos);
                        pos += 4;
                        let value = pop(ctx.stack).u32();
                        let addr = pop(ctx.stack).i32() as u32;
                        store_bytes(ctx, addr, offset, value.to_le_bytes())?;
                    }
                    Opcode::I64Store | Opcode::F64Store => {
                        let offset = read_u32(bytes, pos);
                        pos += 4;
                        let value = pop(ctx.stack).u64();
                        let addr = pop(ctx.stack).i32() as u32;
                        store_bytes(ctx, addr, offset, value.to_le_bytes())?;
                    }
                    Opcode::I32Store8 => {
                        let offset = read_u32(bytes, pos);
                        pos += 4;
                        let value = pop(ctx.stack).u32() as u8;
                        let addr = pop(ctx.stack).i32() as u32;
                        store_bytes(ctx, addr, offset, [value])?;
                    }
                    Opcode::I32Store16 => {
                        let offset = read_u32(bytes, pos);
                        pos += 4;
                        let value = pop(ctx.stack).u32() as u16;
                        let addr = pop(ctx.stack).i32() as u32;
                        store_bytes(ctx, addr, offset, value.to_le_bytes())?;
                    }
                    Opcode::I64Store8 => {
                        let offset = read_u32(bytes, pos);
                        pos += 4;
                        let value = pop(ctx.stack).u64() as u8;
                        let addr = pop(ctx.stack).i32() as u32;
                        store_bytes(ctx, addr, offset, [value])?;
                    }
                    Opcode::I64Store16 => {
                        let offset = read_u32(bytes, pos);
                        pos += 4;
                        let value = pop(ctx.stack).u64() as u16;
                        let addr = pop(ctx.stack).i32() as u32;
                        store_bytes(ctx, addr, offset, value.to_le_bytes())?;
                    }
                    Opcode::I64Store32 => {
                        let offset = read_u32(bytes, pos);
                        pos += 4;
                        let value = pop(ctx.stack).u64() as u32;
                        let addr = pop(ctx.stack).i32() as u32;
                        store_bytes(ctx, addr, offset, value.to_le_bytes())?;
                    }

                    op => ops::eval(op, ctx.stack).map_err(TrapError::Code)?,
                }
            }
        }
    }
    Ok(Flow::Normal)
}

fn call_function<E: Externals>(callee: &FuncRef, ctx: &mut Ctx<E>) -> Result<(), TrapError> {
    let params = callee.signature().params();
    let mut call_args = vec![Value::I32(0); params.len()];
    for (i, ty) in params.iter().enumerate().rev() {
        call_args[i] = pop(ctx.stack).with_type(*ty);
    }
    if let Some(result) = FuncInstance::invoke(callee, &call_args, ctx.externals)? {
        push(ctx, UntypedValue::from(result))?;
    }
    Ok(())
}

fn effective_addr(addr: u32, offset: u32) -> Result<u32, TrapError> {
    addr.checked_add(offset).ok_or(TrapError::Code(TrapCode::MemoryAccessOutOfBounds))
}

fn memory_of(instance: &Instance) -> MemoryRef {
    instance.memory_by_index(0).expect("validation guarantees a memory exists for this op")
}

fn load_bytes<const N: usize, E: Externals>(ctx: &mut Ctx<E>, bytes: &[u8], pos: &mut usize) -> Result<[u8; N], TrapError> {
    let offset = read_u32(bytes, *pos);
    *pos += 4;
    let addr = pop(ctx.stack).i32() as u32;
    let ea = effective_addr(addr, offset)?;
    let mut buf = [0u8; N];
    memory_of(ctx.instance).get_into(ea, &mut buf).map_err(TrapError::Code)?;
    Ok(buf)
}

fn store_bytes<const N: usize, E: Externals>(ctx: &mut Ctx<E>, addr: u32, offset: u32, buf: [u8; N]) -> Result<(), TrapError> {
    let ea = effective_addr(addr, offset)?;
    memory_of(ctx.instance).set(ea, &buf).map_err(TrapError::Code)
}
