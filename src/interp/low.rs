//! Low-level interpreter: a threaded dispatcher over the flat byte stream
//! [`crate::compile::low`] produces. Control flow is already resolved to
//! absolute byte offsets at compile time, so branching here is just setting
//! `pc` — no recursion, no scanning for a matching `end`.

use crate::common::stack::StackWithLimit;
use crate::compile::low::{read_u32, read_u64, Code};
use crate::engine::{ByteOrder, Engine};
use crate::error::{TrapCode, TrapError};
use crate::func::{FuncInstance, FuncRef};
use crate::host::Externals;
use crate::instance::Instance;
use crate::isa::Opcode;
use crate::memory::MemoryRef;
use crate::types::Signature;
use crate::value::{UntypedValue, Value};

use super::ops;

/// Byte length of a wire-encoded `Target`: a 4-byte destination, a 1-byte
/// keep flag, and a 4-byte drop count.
const TARGET_LEN: usize = 9;

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
    let order = code.byte_order;
    let bytes = &code.bytes;
    let mut pc: usize = 0;

    loop {
        let opcode = Opcode::from_u8(bytes[pc]).expect("compiler only emits recognized opcodes");
        pc += 1;
        match opcode {
            Opcode::Unreachable => return Err(TrapError::Code(TrapCode::Unreachable)),

            Opcode::Br => pc = apply_branch(&mut stack, order, bytes, pc),

            Opcode::BrIfEqz => {
                let cond = pop(&mut stack).i32();
                pc = if cond == 0 {
                    apply_branch(&mut stack, order, bytes, pc)
                } else {
                    pc + TARGET_LEN
                };
            }
            Opcode::BrIfNez => {
                let cond = pop(&mut stack).i32();
                pc = if cond != 0 {
                    apply_branch(&mut stack, order, bytes, pc)
                } else {
                    pc + TARGET_LEN
                };
            }
            Opcode::BrTable => {
                let index = pop(&mut stack).i32();
                let count = read_u32(order, &bytes[pc..]) as usize;
                pc += 4;
                let chosen = if index >= 0 && (index as usize) < count {
                    pc + index as usize * TARGET_LEN
                } else {
                    pc + count * TARGET_LEN
                };
                pc = apply_branch(&mut stack, order, bytes, chosen);
            }

            Opcode::Return => {
                let keep = bytes[pc];
                let drop = read_u32(order, &bytes[pc + 1..]);
                pc += 5;
                apply_drop_keep(&mut stack, keep, drop);
                let result = signature.return_type().map(|ty| pop(&mut stack).with_type(ty));
                return Ok(result);
            }

            Opcode::Call => {
                let idx = read_u32(order, &bytes[pc..]);
                pc += 4;
                let callee = instance
                    .func_by_index(idx)
                    .expect("validation guarantees call targets are in range");
                call_function(&callee, &mut stack, externals)?;
            }
            Opcode::CallIndirect => {
                let type_idx = read_u32(order, &bytes[pc..]);
                pc += 4;
                let elem_idx = pop(&mut stack).i32() as u32;
                let table = instance
                    .table_by_index(0)
                    .expect("validation guarantees a table exists for call_indirect");
                let slot = table.get(elem_idx).ok_or(TrapError::Code(TrapCode::TableAccessOutOfBounds))?;
                let callee = slot.ok_or(TrapError::Code(TrapCode::ElemUninitialized))?;
                if callee.signature() != instance.signature_by_index(type_idx) {
                    return Err(TrapError::Code(TrapCode::UnexpectedSignature));
                }
                call_function(&callee, &mut stack, externals)?;
            }

            Opcode::Drop => {
                pop(&mut stack);
            }
            Opcode::Select => {
                let cond = pop(&mut stack).i32();
                let on_false = pop(&mut stack);
                let on_true = pop(&mut stack);
                push(&mut stack, if cond != 0 { on_true } else { on_false })?;
            }

            Opcode::LocalGet => {
                let idx = read_u32(order, &bytes[pc..]) as usize;
                pc += 4;
                push(&mut stack, locals[idx])?;
            }
            Opcode::LocalSet => {
                let idx = read_u32(order, &bytes[pc..]) as usize;
                pc += 4;
                locals[idx] = pop(&mut stack);
            }
            Opcode::LocalTee => {
                let idx = read_u32(order, &bytes[pc..]) as usize;
                pc += 4;
                locals[idx] = *stack.top().expect("validated stack shape guarantees an operand here");
            }
            Opcode::GlobalGet => {
                let idx = read_u32(order, &bytes[pc..]);
                pc += 4;
                let global = instance
                    .global_by_index(idx)
                    .expect("validation guarantees global indices are in range");
                push(&mut stack, UntypedValue::from(global.get()))?;
            }
            Opcode::GlobalSet => {
                let idx = read_u32(order, &bytes[pc..]);
                pc += 4;
                let global = instance
                    .global_by_index(idx)
                    .expect("validation guarantees global indices are in range");
                let value = pop(&mut stack).with_type(global.value_type());
                global.set(value).expect("validation guarantees global.set is well-typed and mutable");
            }

            Opcode::MemorySize => {
                let memory = instance.memory_by_index(0).expect("validation guarantees a memory exists");
                push(&mut stack, UntypedValue::from(memory.current_pages() as i32))?;
            }
            Opcode::MemoryGrow => {
                let memory = instance.memory_by_index(0).expect("validation guarantees a memory exists");
                let delta = pop(&mut stack).i32() as u32;
                let result = memory.grow(delta).map(|prev| prev as i32).unwrap_or(-1);
                push(&mut stack, UntypedValue::from(result))?;
            }

            Opcode::I32Const => {
                push(&mut stack, UntypedValue::from(read_u32(order, &bytes[pc..]) as i32))?;
                pc += 4;
            }
            Opcode::I64Const => {
                push(&mut stack, UntypedValue::from(read_u64(order, &bytes[pc..]) as i64))?;
                pc += 8;
            }
            Opcode::F32Const => {
                push(&mut stack, UntypedValue::from(read_u32(order, &bytes[pc..])))?;
                pc += 4;
            }
            Opcode::F64Const => {
                push(&mut stack, UntypedValue::from_bits(read_u64(order, &bytes[pc..])))?;
                pc += 8;
            }

            Opcode::I32Load | Opcode::F32Load => {
                let (v, next) = load_32(instance, &mut stack, order, bytes, pc)?;
                push(&mut stack, UntypedValue::from(v))?;
                pc = next;
            }
            Opcode::I64Load | Opcode::F64Load => {
                let (v, next) = load_64(instance, &mut stack, order, bytes, pc)?;
                push(&mut stack, UntypedValue::from_bits(v))?;
                pc = next;
            }
            Opcode::I32Load8S => {
                let (buf, next) = load_bytes::<1>(instance, &mut stack, order, bytes, pc)?;
                push(&mut stack, UntypedValue::from(buf[0] as i8 as i32))?;
                pc = next;
            }
            Opcode::I32Load8U => {
                let (buf, next) = load_bytes::<1>(instance, &mut stack, order, bytes, pc)?;
                push(&mut stack, UntypedValue::from(buf[0] as u32))?;
                pc = next;
            }
            Opcode::I32Load16S => {
                let (buf, next) = load_bytes::<2>(instance, &mut stack, order, bytes, pc)?;
                push(&mut stack, UntypedValue::from(i16::from_le_bytes(buf) as i32))?;
                pc = next;
            }
            Opcode::I32Load16U => {
                let (buf, next) = load_bytes::<2>(instance, &mut stack, order, bytes, pc)?;
                push(&mut stack, UntypedValue::from(u16::from_le_bytes(buf) as u32))?;
                pc = next;
            }
            Opcode::I64Load8S => {
                let (buf, next) = load_bytes::<1>(instance, &mut stack, order, bytes, pc)?;
                push(&mut stack, UntypedValue::from(buf[0] as i8 as i64))?;
                pc = next;
            }
            Opcode::I64Load8U => {
                let (buf, next) = load_bytes::<1>(instance, &mut stack, order, bytes, pc)?;
                push(&mut stack, UntypedValue::from(buf[0] as u64))?;
                pc = next;
            }
            Opcode::I64Load16S => {
                let (buf, next) = load_bytes::<2>(instance, &mut stack, order, bytes, pc)?;
                push(&mut stack, UntypedValue::from(i16::from_le_bytes(buf) as i64))?;
                pc = next;
            }
            Opcode::I64Load16U => {
                let (buf, next) = load_bytes::<2>(instance, &mut stack, order, bytes, pc)?;
                push(&mut stack, UntypedValue::from(u16::from_le_bytes(buf) as u64))?;
                pc = next;
            }
            Opcode::I64Load32S => {
                let (buf, next) = load_bytes::<4>(instance, &mut stack, order, bytes, pc)?;
                push(&mut stack, UntypedValue::from(i32::from_le_bytes(buf) as i64))?;
                pc = next;
            }
            Opcode::I64Load32U => {
                let (buf, next) = load_bytes::<4>(instance, &mut stack, order, bytes, pc)?;
                push(&mut stack, UntypedValue::from(u32::from_le_bytes(buf) as u64))?;
                pc = next;
            }

            Opcode::I32Store | Opcode::F32Store => {
                let offset = read_u32(order, &bytes[pc..]);
                pc += 4;
                let value = pop(&mut stack).u32();
                let addr = pop(&mut stack).i32() as u32;
                store_bytes(instance, addr, offset, value.to_le_bytes())?;
            }
            Opcode::I64Store | Opcode::F64Store => {
                let offset = read_u32(order, &bytes[pc..]);
                pc += 4;
                let value = pop(&mut stack).u64();
                let addr = pop(&mut stack).i32() as u32;
                store_bytes(instance, addr, offset, value.to_le_bytes())?;
            }
            Opcode::I32Store8 => {
                let offset = read_u32(order, &bytes[pc..]);
                pc += 4;
                let value = pop(&mut stack).u32() as u8;
                let addr = pop(&mut stack).i32() as u32;
                store_bytes(instance, addr, offset, [value])?;
            }
            Opcode::I32Store16 => {
                let offset = read_u32(order, &bytes[pc..]);
                pc += 4;
                let value = pop(&mut stack).u32() as u16;
                let addr = pop(&mut stack).i32() as u32;
                store_bytes(instance, addr, offset, value.to_le_bytes())?;
            }
            Opcode::I64Store8 => {
                let offset = read_u32(order, &bytes[pc..]);
                pc += 4;
                let value = pop(&mut stack).u64() as u8;
                let addr = pop(&mut stack).i32() as u32;
                store_bytes(instance, addr, offset, [value])?;
            }
            Opcode::I64Store16 => {
                let offset = read_u32(order, &bytes[pc..]);
                pc += 4;
                let value = pop(&mut stack).u64() as u16;
                let addr = pop(&mut stack).i32() as u32;
                store_bytes(instance, addr, offset, value.to_le_bytes())?;
            }
            Opcode::I64Store32 => {
                let offset = read_u32(order, &bytes[pc..]);
                pc += 4;
                let value = pop(&mut stack).u64() as u32;
                let addr = pop(&mut stack).i32() as u32;
                store_bytes(instance, addr, offset, value.to_le_bytes())?;
            }

            op => ops::eval(op, &mut stack).map_err(TrapError::Code)?,
        }
    }
}

fn pop(stack: &mut StackWithLimit<UntypedValue>) -> UntypedValue {
    stack.pop().expect("validated stack shape guarantees an operand here")
}

fn push(stack: &mut StackWithLimit<UntypedValue>, value: UntypedValue) -> Result<(), TrapError> {
    stack.push(value).map_err(|_| TrapError::Code(TrapCode::StackOverflow))
}

/// Apply a branch target's drop/keep and return the destination `pc`.
fn apply_branch(stack: &mut StackWithLimit<UntypedValue>, order: ByteOrder, bytes: &[u8], pc: usize) -> usize {
    let dst_pc = read_u32(order, &bytes[pc..]) as usize;
    let keep = bytes[pc + 4];
    let drop = read_u32(order, &bytes[pc + 5..]);
    apply_drop_keep(stack, keep, drop);
    dst_pc
}

/// Unwind `drop` operands, optionally keeping the top one first. Never grows
/// the stack past its height before the call, so this can't overflow.
fn apply_drop_keep(stack: &mut StackWithLimit<UntypedValue>, keep: u8, drop: u32) {
    if keep == 1 {
        let top = pop(stack);
        for _ in 0..drop {
            pop(stack);
        }
        stack.push(top).expect("drop_keep only restores a value it just popped");
    } else {
        for _ in 0..drop {
            pop(stack);
        }
    }
}

fn call_function<E: Externals>(callee: &FuncRef, stack: &mut StackWithLimit<UntypedValue>, externals: &mut E) -> Result<(), TrapError> {
    let params = callee.signature().params();
    let mut call_args = vec![Value::I32(0); params.len()];
    for (i, ty) in params.iter().enumerate().rev() {
        call_args[i] = pop(stack).with_type(*ty);
    }
    if let Some(result) = FuncInstance::invoke(callee, &call_args, externals)? {
        push(stack, UntypedValue::from(result))?;
    }
    Ok(())
}

fn effective_addr(addr: u32, offset: u32) -> Result<u32, TrapError> {
    addr.checked_add(offset).ok_or(TrapError::Code(TrapCode::MemoryAccessOutOfBounds))
}

fn memory_of(instance: &Instance) -> MemoryRef {
    instance.memory_by_index(0).expect("validation guarantees a memory exists for this op")
}

fn load_bytes<const N: usize>(
    instance: &Instance,
    stack: &mut StackWithLimit<UntypedValue>,
    order: ByteOrder,
    bytes: &[u8],
    pc: usize,
) -> Result<([u8; N], usize), TrapError> {
    let offset = read_u32(order, &bytes[pc..]);
    let pc = pc + 4;
    let addr = pop(stack).i32() as u32;
    let ea = effective_addr(addr, offset)?;
    let mut buf = [0u8; N];
    memory_of(instance).get_into(ea, &mut buf).map_err(TrapError::Code)?;
    Ok((buf, pc))
}

fn load_32(
    instance: &Instance,
    stack: &mut StackWithLimit<UntypedValue>,
    order: ByteOrder,
    bytes: &[u8],
    pc: usize,
) -> Result<(u32, usize), TrapError> {
    let (buf, pc) = load_bytes::<4>(instance, stack, order, bytes, pc)?;
    Ok((u32::from_le_bytes(buf), pc))
}

fn load_64(
    instance: &Instance,
    stack: &mut StackWithLimit<UntypedValue>,
    order: ByteOrder,
    bytes: &[u8],
    pc: usize,
) -> Result<(u64, usize), TrapError> {
    let (buf, pc) = load_bytes::<8>(instance, stack, order, bytes, pc)?;
    Ok((u64::from_le_bytes(buf), pc))
}

fn store_bytes<const N: usize>(instance: &Instance, addr: u32, offset: u32, buf: [u8; N]) -> Result<(), TrapError> {
    let ea = effective_addr(addr, offset)?;
    memory_of(instance).set(ea, &buf).map_err(TrapError::Code)
}
