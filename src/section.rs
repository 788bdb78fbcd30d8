//! The Section Assembler: turns validated Wasm bytes into a [`crate::module::Module`].
//!
//! Driven by [`wasmparser::Parser`] combined with [`wasmparser::Validator`]: a
//! single pass validates each payload and folds the accepted sections into a
//! [`ModuleBuilder`]. Function bodies are restructured from wasmparser's flat
//! `OperatorsReader` into the nested [`Inst`] tree immediately, by a small
//! control-stack builder — this is the bridge between a real flat-token
//! decoder and the nested-AST shape the two compiler backends expect.

use wasmparser::{FunctionBody, Operator, Parser, Payload, Validator};

use crate::compile;
use crate::engine::{Backend, ByteOrder};
use crate::error::{DecodeError, ValidationError};
use crate::module::{DataSegment, ElementSegment, Module, ModuleFunction};
use crate::types::{GlobalDescriptor, MemoryDescriptor, Signature, TableDescriptor, ValueType};

/// A constant initializer expression, as used by global initializers and
/// element/data segment offsets. Wasm only allows a handful of instructions
/// here.
#[derive(Debug, Clone, Copy)]
pub enum ConstExpr {
    I32Const(i32),
    I64Const(i64),
    F32Const(u32),
    F64Const(u64),
    GlobalGet(u32),
}

/// `(offset, align)` immediate shared by every load/store instruction.
#[derive(Debug, Clone, Copy)]
pub struct MemArg {
    pub offset: u32,
    pub align: u32,
}

impl From<wasmparser::MemArg> for MemArg {
    fn from(m: wasmparser::MemArg) -> Self {
        MemArg {
            offset: m.offset as u32,
            align: m.align as u32,
        }
    }
}

/// The result type of a `block`/`loop`/`if`.
#[derive(Debug, Clone, Copy)]
pub enum BlockType {
    Empty,
    Value(ValueType),
}

/// Nested instruction tree for a single function body: the decoder contract
/// both compiler backends consume.
#[derive(Debug, Clone)]
pub enum Inst {
    Unreachable,
    Nop,
    Block { ty: BlockType, body: Vec<Inst> },
    Loop { ty: BlockType, body: Vec<Inst> },
    If { ty: BlockType, then: Vec<Inst>, else_: Option<Vec<Inst>> },
    /// Relative label depth, as written in the source (0 = innermost).
    Br(u32),
    BrIf(u32),
    BrTable { targets: Vec<u32>, default: u32 },
    Return,
    Call(u32),
    CallIndirect(u32),
    Drop,
    Select,
    LocalGet(u32),
    LocalSet(u32),
    LocalTee(u32),
    GlobalGet(u32),
    GlobalSet(u32),

    I32Load(MemArg),
    I64Load(MemArg),
    F32Load(MemArg),
    F64Load(MemArg),
    I32Load8S(MemArg),
    I32Load8U(MemArg),
    I32Load16S(MemArg),
    I32Load16U(MemArg),
    I64Load8S(MemArg),
    I64Load8U(MemArg),
    I64Load16S(MemArg),
    I64Load16U(MemArg),
    I64Load32S(MemArg),
    I64Load32U(MemArg),
    I32Store(MemArg),
    I64Store(MemArg),
    F32Store(MemArg),
    F64Store(MemArg),
    I32Store8(MemArg),
    I32Store16(MemArg),
    I64Store8(MemArg),
    I64Store16(MemArg),
    I64Store32(MemArg),

    MemorySize,
    MemoryGrow,

    I32Const(i32),
    I64Const(i64),
    F32Const(u32),
    F64Const(u64),

    /// Every instruction with a fixed arity and no immediate: comparisons,
    /// arithmetic, conversions. `op` names the mnemonic via the shared opcode
    /// vocabulary; both compilers re-use it verbatim.
    Simple(crate::isa::Opcode),
}

/// A module function body before compilation: its declared locals (beyond the
/// parameters, which are implicit slots 0..params.len()) and its instruction
/// tree.
pub(crate) struct DecodedBody {
    pub locals: Vec<ValueType>,
    pub code: Vec<Inst>,
}

pub(crate) fn decode_function_body(body: FunctionBody) -> Result<DecodedBody, DecodeError> {
    let mut locals = Vec::new();
    let mut locals_reader = body.get_locals_reader().map_err(to_decode_error)?;
    for _ in 0..locals_reader.get_count() {
        let (count, ty) = locals_reader.read().map_err(to_decode_error)?;
        let ty = ValueType::from_wasmparser(ty);
        for _ in 0..count {
            locals.push(ty);
        }
    }

    let operators = body.get_operators_reader().map_err(to_decode_error)?;
    let code = decode_operators(operators)?;
    Ok(DecodedBody { locals, code })
}

/// One entry in the control-flow nesting stack while re-assembling flat
/// operators into a tree.
struct ControlFrame {
    ty: BlockType,
    kind: ControlKind,
    body: Vec<Inst>,
    else_body: Option<Vec<Inst>>,
}

enum ControlKind {
    Block,
    Loop,
    If,
    /// Inside the `else` arm of an `if`.
    Else,
}

fn decode_operators(reader: wasmparser::OperatorsReader) -> Result<Vec<Inst>, DecodeError> {
    let mut frames: Vec<ControlFrame> = vec![ControlFrame {
        ty: BlockType::Empty,
        kind: ControlKind::Block,
        body: Vec::new(),
        else_body: None,
    }];

    for item in reader.into_iter() {
        let op = item.map_err(to_decode_error)?;
        match op {
            Operator::Block { blockty } => frames.push(ControlFrame {
                ty: block_type(blockty)?,
                kind: ControlKind::Block,
                body: Vec::new(),
                else_body: None,
            }),
            Operator::Loop { blockty } => frames.push(ControlFrame {
                ty: block_type(blockty)?,
                kind: ControlKind::Loop,
                body: Vec::new(),
                else_body: None,
            }),
            Operator::If { blockty } => frames.push(ControlFrame {
                ty: block_type(blockty)?,
                kind: ControlKind::If,
                body: Vec::new(),
                else_body: None,
            }),
            Operator::Else => {
                let top = frames.last_mut().ok_or_else(|| DecodeError("else outside of if".into()))?;
                top.kind = ControlKind::Else;
                top.else_body = Some(Vec::new());
            }
            Operator::End => {
                if frames.len() == 1 {
                    // Function-ending `end`; leave the root frame for the caller.
                    continue;
                }
                let frame = frames.pop().expect("checked len() > 1 above");
                let inst = match frame.kind {
                    ControlKind::Block => Inst::Block { ty: frame.ty, body: frame.body },
                    ControlKind::Loop => Inst::Loop { ty: frame.ty, body: frame.body },
                    ControlKind::If => Inst::If {
                        ty: frame.ty,
                        then: frame.body,
                        else_: None,
                    },
                    ControlKind::Else => Inst::If {
                        ty: frame.ty,
                        then: frame.body,
                        else_: frame.else_body,
                    },
                };
                push(&mut frames, inst);
            }
            other => {
                let inst = map_simple_operator(other)?;
                push(&mut frames, inst);
            }
        }
    }

    let root = frames.pop().ok_or_else(|| DecodeError("unterminated control frame".into()))?;
    Ok(root.body)
}

fn push(frames: &mut [ControlFrame], inst: Inst) {
    let top = frames.last_mut().expect("root frame is never popped mid-loop");
    match top.kind {
        ControlKind::Else => top.else_body.as_mut().expect("Else frames always carry an else_body").push(inst),
        _ => top.body.push(inst),
    }
}

fn block_type(ty: wasmparser::BlockType) -> Result<BlockType, DecodeError> {
    match ty {
        wasmparser::BlockType::Empty => Ok(BlockType::Empty),
        wasmparser::BlockType::Type(vt) => Ok(BlockType::Value(ValueType::from_wasmparser(vt))),
        wasmparser::BlockType::FuncType(_) => {
            Err(DecodeError("multi-value block types are not supported".into()))
        }
    }
}

use crate::isa::Opcode;

fn map_simple_operator(op: Operator) -> Result<Inst, DecodeError> {
    Ok(match op {
        Operator::Unreachable => Inst::Unreachable,
        Operator::Nop => Inst::Nop,
        Operator::Br { relative_depth } => Inst::Br(relative_depth),
        Operator::BrIf { relative_depth } => Inst::BrIf(relative_depth),
        Operator::BrTable { targets } => {
            let default = targets.default();
            let targets = targets.targets().collect::<Result<Vec<_>, _>>().map_err(to_decode_error)?;
            Inst::BrTable { targets, default }
        }
        Operator::Return => Inst::Return,
        Operator::Call { function_index } => Inst::Call(function_index),
        Operator::CallIndirect { type_index, .. } => Inst::CallIndirect(type_index),
        Operator::Drop => Inst::Drop,
        Operator::Select | Operator::TypedSelect { .. } => Inst::Select,
        Operator::LocalGet { local_index } => Inst::LocalGet(local_index),
        Operator::LocalSet { local_index } => Inst::LocalSet(local_index),
        Operator::LocalTee { local_index } => Inst::LocalTee(local_index),
        Operator::GlobalGet { global_index } => Inst::GlobalGet(global_index),
        Operator::GlobalSet { global_index } => Inst::GlobalSet(global_index),

        Operator::I32Load { memarg } => Inst::I32Load(memarg.into()),
        Operator::I64Load { memarg } => Inst::I64Load(memarg.into()),
        Operator::F32Load { memarg } => Inst::F32Load(memarg.into()),
        Operator::F64Load { memarg } => Inst::F64Load(memarg.into()),
        Operator::I32Load8S { memarg } => Inst::I32Load8S(memarg.into()),
        Operator::I32Load8U { memarg } => Inst::I32Load8U(memarg.into()),
        Operator::I32Load16S { memarg } => Inst::I32Load16S(memarg.into()),
        Operator::I32Load16U { memarg } => Inst::I32Load16U(memarg.into()),
        Operator::I64Load8S { memarg } => Inst::I64Load8S(memarg.into()),
        Operator::I64Load8U { memarg } => Inst::I64Load8U(memarg.into()),
        Operator::I64Load16S { memarg } => Inst::I64Load16S(memarg.into()),
        Operator::I64Load16U { memarg } => Inst::I64Load16U(memarg.into()),
        Operator::I64Load32S { memarg } => Inst::I64Load32S(memarg.into()),
        Operator::I64Load32U { memarg } => Inst::I64Load32U(memarg.into()),
        Operator::I32Store { memarg } => Inst::I32Store(memarg.into()),
        Operator::I64Store { memarg } => Inst::I64Store(memarg.into()),
        Operator::F32Store { memarg } => Inst::F32Store(memarg.into()),
        Operator::F64Store { memarg } => Inst::F64Store(memarg.into()),
        Operator::I32Store8 { memarg } => Inst::I32Store8(memarg.into()),
        Operator::I32Store16 { memarg } => Inst::I32Store16(memarg.into()),
        Operator::I64Store8 { memarg } => Inst::I64Store8(memarg.into()),
        Operator::I64Store16 { memarg } => Inst::I64Store16(memarg.into()),
        Operator::I64Store32 { memarg } => Inst::I64Store32(memarg.into()),

        Operator::MemorySize { .. } => Inst::MemorySize,
        Operator::MemoryGrow { .. } => Inst::MemoryGrow,

        Operator::I32Const { value } => Inst::I32Const(value),
        Operator::I64Const { value } => Inst::I64Const(value),
        Operator::F32Const { value } => Inst::F32Const(value.bits()),
        Operator::F64Const { value } => Inst::F64Const(value.bits()),

        Operator::I32Eqz => Inst::Simple(Opcode::I32Eqz),
        Operator::I32Eq => Inst::Simple(Opcode::I32Eq),
        Operator::I32Ne => Inst::Simple(Opcode::I32Ne),
        Operator::I32LtS => Inst::Simple(Opcode::I32LtS),
        Operator::I32LtU => Inst::Simple(Opcode::I32LtU),
        Operator::I32GtS => Inst::Simple(Opcode::I32GtS),
        Operator::I32GtU => Inst::Simple(Opcode::I32GtU),
        Operator::I32LeS => Inst::Simple(Opcode::I32LeS),
        Operator::I32LeU => Inst::Simple(Opcode::I32LeU),
        Operator::I32GeS => Inst::Simple(Opcode::I32GeS),
        Operator::I32GeU => Inst::Simple(Opcode::I32GeU),

        Operator::I64Eqz => Inst::Simple(Opcode::I64Eqz),
        Operator::I64Eq => Inst::Simple(Opcode::I64Eq),
        Operator::I64Ne => Inst::Simple(Opcode::I64Ne),
        Operator::I64LtS => Inst::Simple(Opcode::I64LtS),
        Operator::I64LtU => Inst::Simple(Opcode::I64LtU),
        Operator::I64GtS => Inst::Simple(Opcode::I64GtS),
        Operator::I64GtU => Inst::Simple(Opcode::I64GtU),
        Operator::I64LeS => Inst::Simple(Opcode::I64LeS),
        Operator::I64LeU => Inst::Simple(Opcode::I64LeU),
        Operator::I64GeS => Inst::Simple(Opcode::I64GeS),
        Operator::I64GeU => Inst::Simple(Opcode::I64GeU),

        Operator::F32Eq => Inst::Simple(Opcode::F32Eq),
        Operator::F32Ne => Inst::Simple(Opcode::F32Ne),
        Operator::F32Lt => Inst::Simple(Opcode::F32Lt),
        Operator::F32Gt => Inst::Simple(Opcode::F32Gt),
        Operator::F32Le => Inst::Simple(Opcode::F32Le),
        Operator::F32Ge => Inst::Simple(Opcode::F32Ge),

        Operator::F64Eq => Inst::Simple(Opcode::F64Eq),
        Operator::F64Ne => Inst::Simple(Opcode::F64Ne),
        Operator::F64Lt => Inst::Simple(Opcode::F64Lt),
        Operator::F64Gt => Inst::Simple(Opcode::F64Gt),
        Operator::F64Le => Inst::Simple(Opcode::F64Le),
        Operator::F64Ge => Inst::Simple(Opcode::F64Ge),

        Operator::I32Clz => Inst::Simple(Opcode::I32Clz),
        Operator::I32Ctz => Inst::Simple(Opcode::I32Ctz),
        Operator::I32Popcnt => Inst::Simple(Opcode::I32Popcnt),
        Operator::I32Add => Inst::Simple(Opcode::I32Add),
        Operator::I32Sub => Inst::Simple(Opcode::I32Sub),
        Operator::I32Mul => Inst::Simple(Opcode::I32Mul),
        Operator::I32DivS => Inst::Simple(Opcode::I32DivS),
        Operator::I32DivU => Inst::Simple(Opcode::I32DivU),
        Operator::I32RemS => Inst::Simple(Opcode::I32RemS),
        Operator::I32RemU => Inst::Simple(Opcode::I32RemU),
        Operator::I32And => Inst::Simple(Opcode::I32And),
        Operator::I32Or => Inst::Simple(Opcode::I32Or),
        Operator::I32Xor => Inst::Simple(Opcode::I32Xor),
        Operator::I32Shl => Inst::Simple(Opcode::I32Shl),
        Operator::I32ShrS => Inst::Simple(Opcode::I32ShrS),
        Operator::I32ShrU => Inst::Simple(Opcode::I32ShrU),
        Operator::I32Rotl => Inst::Simple(Opcode::I32Rotl),
        Operator::I32Rotr => Inst::Simple(Opcode::I32Rotr),

        Operator::I64Clz => Inst::Simple(Opcode::I64Clz),
        Operator::I64Ctz => Inst::Simple(Opcode::I64Ctz),
        Operator::I64Popcnt => Inst::Simple(Opcode::I64Popcnt),
        Operator::I64Add => Inst::Simple(Opcode::I64Add),
        Operator::I64Sub => Inst::Simple(Opcode::I64Sub),
        Operator::I64Mul => Inst::Simple(Opcode::I64Mul),
        Operator::I64DivS => Inst::Simple(Opcode::I64DivS),
        Operator::I64DivU => Inst::Simple(Opcode::I64DivU),
        Operator::I64RemS => Inst::Simple(Opcode::I64RemS),
        Operator::I64RemU => Inst::Simple(Opcode::I64RemU),
        Operator::I64And => Inst::Simple(Opcode::I64And),
        Operator::I64Or => Inst::Simple(Opcode::I64Or),
        Operator::I64Xor => Inst::Simple(Opcode::I64Xor),
        Operator::I64Shl => Inst::Simple(Opcode::I64Shl),
        Operator::I64ShrS => Inst::Simple(Opcode::I64ShrS),
        Operator::I64ShrU => Inst::Simple(Opcode::I64ShrU),
        Operator::I64Rotl => Inst::Simple(Opcode::I64Rotl),
        Operator::I64Rotr => Inst::Simple(Opcode::I64Rotr),

        Operator::F32Abs => Inst::Simple(Opcode::F32Abs),
        Operator::F32Neg => Inst::Simple(Opcode::F32Neg),
        Operator::F32Ceil => Inst::Simple(Opcode::F32Ceil),
        Operator::F32Floor => Inst::Simple(Opcode::F32Floor),
        Operator::F32Trunc => Inst::Simple(Opcode::F32Trunc),
        Operator::F32Nearest => Inst::Simple(Opcode::F32Nearest),
        Operator::F32Sqrt => Inst::Simple(Opcode::F32Sqrt),
        Operator::F32Add => Inst::Simple(Opcode::F32Add),
        Operator::F32Sub => Inst::Simple(Opcode::F32Sub),
        Operator::F32Mul => Inst::Simple(Opcode::F32Mul),
        Operator::F32Div => Inst::Simple(Opcode::F32Div),
        Operator::F32Min => Inst::Simple(Opcode::F32Min),
        Operator::F32Max => Inst::Simple(Opcode::F32Max),
        Operator::F32Copysign => Inst::Simple(Opcode::F32Copysign),

        Operator::F64Abs => Inst::Simple(Opcode::F64Abs),
        Operator::F64Neg => Inst::Simple(Opcode::F64Neg),
        Operator::F64Ceil => Inst::Simple(Opcode::F64Ceil),
        Operator::F64Floor => Inst::Simple(Opcode::F64Floor),
        Operator::F64Trunc => Inst::Simple(Opcode::F64Trunc),
        Operator::F64Nearest => Inst::Simple(Opcode::F64Nearest),
        Operator::F64Sqrt => Inst::Simple(Opcode::F64Sqrt),
        Operator::F64Add => Inst::Simple(Opcode::F64Add),
        Operator::F64Sub => Inst::Simple(Opcode::F64Sub),
        Operator::F64Mul => Inst::Simple(Opcode::F64Mul),
        Operator::F64Div => Inst::Simple(Opcode::F64Div),
        Operator::F64Min => Inst::Simple(Opcode::F64Min),
        Operator::F64Max => Inst::Simple(Opcode::F64Max),
        Operator::F64Copysign => Inst::Simple(Opcode::F64Copysign),

        Operator::I32WrapI64 => Inst::Simple(Opcode::I32WrapI64),
        Operator::I32TruncF32S => Inst::Simple(Opcode::I32TruncSF32),
        Operator::I32TruncF32U => Inst::Simple(Opcode::I32TruncUF32),
        Operator::I32TruncF64S => Inst::Simple(Opcode::I32TruncSF64),
        Operator::I32TruncF64U => Inst::Simple(Opcode::I32TruncUF64),
        Operator::I64ExtendI32S => Inst::Simple(Opcode::I64ExtendSI32),
        Operator::I64ExtendI32U => Inst::Simple(Opcode::I64ExtendUI32),
        Operator::I64TruncF32S => Inst::Simple(Opcode::I64TruncSF32),
        Operator::I64TruncF32U => Inst::Simple(Opcode::I64TruncUF32),
        Operator::I64TruncF64S => Inst::Simple(Opcode::I64TruncSF64),
        Operator::I64TruncF64U => Inst::Simple(Opcode::I64TruncUF64),
        Operator::F32ConvertI32S => Inst::Simple(Opcode::F32ConvertSI32),
        Operator::F32ConvertI32U => Inst::Simple(Opcode::F32ConvertUI32),
        Operator::F32ConvertI64S => Inst::Simple(Opcode::F32ConvertSI64),
        Operator::F32ConvertI64U => Inst::Simple(Opcode::F32ConvertUI64),
        Operator::F32DemoteF64 => Inst::Simple(Opcode::F32DemoteF64),
        Operator::F64ConvertI32S => Inst::Simple(Opcode::F64ConvertSI32),
        Operator::F64ConvertI32U => Inst::Simple(Opcode::F64ConvertUI32),
        Operator::F64ConvertI64S => Inst::Simple(Opcode::F64ConvertSI64),
        Operator::F64ConvertI64U => Inst::Simple(Opcode::F64ConvertUI64),
        Operator::F64PromoteF32 => Inst::Simple(Opcode::F64PromoteF32),

        Operator::I32ReinterpretF32 => Inst::Simple(Opcode::I32ReinterpretF32),
        Operator::I64ReinterpretF64 => Inst::Simple(Opcode::I64ReinterpretF64),
        Operator::F32ReinterpretI32 => Inst::Simple(Opcode::F32ReinterpretI32),
        Operator::F64ReinterpretI64 => Inst::Simple(Opcode::F64ReinterpretI64),

        other => return Err(DecodeError(format!("unsupported instruction: {other:?}"))),
    })
}

fn const_expr(reader: wasmparser::ConstExpr) -> Result<ConstExpr, DecodeError> {
    let mut ops = reader.get_operators_reader();
    let op = ops.read().map_err(to_decode_error)?;
    match op {
        Operator::I32Const { value } => Ok(ConstExpr::I32Const(value)),
        Operator::I64Const { value } => Ok(ConstExpr::I64Const(value)),
        Operator::F32Const { value } => Ok(ConstExpr::F32Const(value.bits())),
        Operator::F64Const { value } => Ok(ConstExpr::F64Const(value.bits())),
        Operator::GlobalGet { global_index } => Ok(ConstExpr::GlobalGet(global_index)),
        other => Err(DecodeError(format!("unsupported constant expression: {other:?}"))),
    }
}

fn to_decode_error(e: wasmparser::BinaryReaderError) -> DecodeError {
    DecodeError(e.to_string())
}

fn to_validation_error(e: wasmparser::BinaryReaderError) -> ValidationError {
    ValidationError(e.to_string())
}

/// Drive [`wasmparser::Parser`] + [`wasmparser::Validator`] over `bytes`,
/// folding every accepted section into a [`Module`].
pub(crate) fn assemble(bytes: &[u8], backend: Backend, byte_order: ByteOrder) -> Result<Module, crate::error::Error> {
    let mut validator = Validator::new();
    let mut builder = ModuleBuilder::default();

    for payload in Parser::new(0).parse_all(bytes) {
        let payload = payload.map_err(to_decode_error)?;
        validator.payload(&payload).map_err(to_validation_error)?;
        builder.accept(payload, backend, byte_order)?;
    }

    Ok(builder.finish())
}

#[derive(Default)]
struct ModuleBuilder {
    types: Vec<Signature>,
    func_type_indices: Vec<u32>,
    funcs: Vec<ModuleFunction>,
    imported_func_count: u32,
    import_funcs: Vec<(String, String, u32)>,
    import_globals: Vec<(String, String, GlobalDescriptor)>,
    import_memories: Vec<(String, String, MemoryDescriptor)>,
    import_tables: Vec<(String, String, TableDescriptor)>,
    tables: Vec<TableDescriptor>,
    memories: Vec<MemoryDescriptor>,
    globals: Vec<(GlobalDescriptor, ConstExpr)>,
    exports: Vec<(String, crate::module::ExportKind, u32)>,
    start: Option<u32>,
    elements: Vec<ElementSegment>,
    data: Vec<DataSegment>,
    custom_sections: Vec<(String, Vec<u8>)>,
    code_funcs_seen: u32,
}

impl ModuleBuilder {
    fn accept(&mut self, payload: Payload, backend: Backend, byte_order: ByteOrder) -> Result<(), crate::error::Error> {
        match payload {
            Payload::TypeSection(reader) => {
                for group in reader {
                    let group = group.map_err(to_decode_error)?;
                    for ty in group.into_types() {
                        let func_ty = ty.composite_type.unwrap_func().clone();
                        self.types.push(Signature::from_wasmparser(&func_ty));
                    }
                }
            }
            Payload::ImportSection(reader) => {
                for import in reader {
                    let import = import.map_err(to_decode_error)?;
                    let module = import.module.to_string();
                    let field = import.name.to_string();
                    match import.ty {
                        wasmparser::TypeRef::Func(idx) => {
                            self.import_funcs.push((module, field, idx));
                            self.imported_func_count += 1;
                        }
                        wasmparser::TypeRef::Global(ty) => {
                            self.import_globals.push((module, field, GlobalDescriptor::from_wasmparser(&ty)));
                        }
                        wasmparser::TypeRef::Memory(ty) => {
                            self.import_memories.push((module, field, MemoryDescriptor::from_wasmparser(&ty)));
                        }
                        wasmparser::TypeRef::Table(ty) => {
                            self.import_tables.push((module, field, TableDescriptor::from_wasmparser(&ty)));
                        }
                        wasmparser::TypeRef::Tag(_) => {
                            return Err(DecodeError("exception handling is not supported".into()).into());
                        }
                    }
                }
            }
            Payload::FunctionSection(reader) => {
                for ty in reader {
                    self.func_type_indices.push(ty.map_err(to_decode_error)?);
                }
            }
            Payload::TableSection(reader) => {
                for table in reader {
                    let table = table.map_err(to_decode_error)?;
                    self.tables.push(TableDescriptor::from_wasmparser(&table.ty));
                }
            }
            Payload::MemorySection(reader) => {
                for memory in reader {
                    let memory = memory.map_err(to_decode_error)?;
                    self.memories.push(MemoryDescriptor::from_wasmparser(&memory));
                }
            }
            Payload::GlobalSection(reader) => {
                for global in reader {
                    let global = global.map_err(to_decode_error)?;
                    let descriptor = GlobalDescriptor::from_wasmparser(&global.ty);
                    let init = const_expr(global.init_expr)?;
                    self.globals.push((descriptor, init));
                }
            }
            Payload::ExportSection(reader) => {
                for export in reader {
                    let export = export.map_err(to_decode_error)?;
                    let kind = match export.kind {
                        wasmparser::ExternalKind::Func => crate::module::ExportKind::Func,
                        wasmparser::ExternalKind::Global => crate::module::ExportKind::Global,
                        wasmparser::ExternalKind::Memory => crate::module::ExportKind::Memory,
                        wasmparser::ExternalKind::Table => crate::module::ExportKind::Table,
                        wasmparser::ExternalKind::Tag => {
                            return Err(DecodeError("exception handling is not supported".into()).into())
                        }
                    };
                    self.exports.push((export.name.to_string(), kind, export.index));
                }
            }
            Payload::StartSection { func, .. } => {
                self.start = Some(func);
            }
            Payload::ElementSection(reader) => {
                for elem in reader {
                    let elem = elem.map_err(to_decode_error)?;
                    self.elements.push(decode_element(elem)?);
                }
            }
            Payload::DataSection(reader) => {
                for data in reader {
                    let data = data.map_err(to_decode_error)?;
                    self.data.push(decode_data(data)?);
                }
            }
            Payload::CodeSectionEntry(body) => {
                let func_index = self.code_funcs_seen;
                self.code_funcs_seen += 1;
                let type_index = self.func_type_indices[func_index as usize];
                let signature = self.types[type_index as usize].clone();
                let decoded = decode_function_body(body)?;
                let compiled = match backend {
                    Backend::High => {
                        compile::high::compile(&decoded.code, &decoded.locals, &signature).map(crate::module::CompiledFunction::High)
                    }
                    Backend::Low => {
                        let call_signature = |idx: u32| -> Signature {
                            if idx < self.imported_func_count {
                                let (_, _, type_idx) = &self.import_funcs[idx as usize];
                                self.types[*type_idx as usize].clone()
                            } else {
                                let local_idx = idx - self.imported_func_count;
                                self.types[self.func_type_indices[local_idx as usize] as usize].clone()
                            }
                        };
                        compile::low::compile(&decoded.code, &decoded.locals, &signature, byte_order, &self.types, &call_signature)
                            .map(crate::module::CompiledFunction::Low)
                    }
                }?;
                self.funcs.push(ModuleFunction {
                    signature,
                    compiled,
                });
            }
            Payload::CustomSection(s) => {
                self.custom_sections.push((s.name().to_string(), s.data().to_vec()));
            }
            _ => {}
        }
        Ok(())
    }

    fn finish(self) -> Module {
        Module {
            types: self.types,
            import_funcs: self.import_funcs,
            import_globals: self.import_globals,
            import_memories: self.import_memories,
            import_tables: self.import_tables,
            funcs: self.funcs,
            imported_func_count: self.imported_func_count,
            tables: self.tables,
            memories: self.memories,
            globals: self.globals,
            exports: self.exports,
            start: self.start,
            elements: self.elements,
            data: self.data,
            custom_sections: self.custom_sections,
        }
    }
}

fn decode_element(elem: wasmparser::Element) -> Result<ElementSegment, DecodeError> {
    let (table_index, offset) = match elem.kind {
        wasmparser::ElementKind::Active { table_index, offset_expr } => {
            (table_index.unwrap_or(0), const_expr(offset_expr)?)
        }
        _ => return Err(DecodeError("passive/declared element segments are not supported".into())),
    };
    let func_indices = match elem.items {
        wasmparser::ElementItems::Functions(reader) => {
            reader.into_iter().map(|f| f.map(Some).map_err(to_decode_error)).collect::<Result<Vec<_>, _>>()?
        }
        wasmparser::ElementItems::Expressions(..) => {
            return Err(DecodeError("expression element items are not supported".into()))
        }
    };
    Ok(ElementSegment {
        table_index,
        offset,
        func_indices,
    })
}

fn decode_data(data: wasmparser::Data) -> Result<DataSegment, DecodeError> {
    let (memory_index, offset) = match data.kind {
        wasmparser::DataKind::Active { memory_index, offset_expr } => (memory_index, const_expr(offset_expr)?),
        wasmparser::DataKind::Passive => return Err(DecodeError("passive data segments are not supported".into())),
    };
    Ok(DataSegment {
        memory_index,
        offset,
        bytes: data.data.to_vec(),
    })
}
