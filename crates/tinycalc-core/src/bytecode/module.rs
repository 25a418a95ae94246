//! Loadable module: constant pool, methods and the `.tcbc` binary layout.
//!
//! ```text
//! "TCBC" | version:u16 | flags:u8 | reserved:u8
//! [NAME][len][utf-8]
//! [FLTS][len][count:u32][f64 LE]*
//! [CODE][len][count:u32][method]*
//! [SRCE][len][utf-8]              (absent when stripped)
//! [CRCC][4][crc32 of every preceding byte]
//! ```

use std::borrow::Cow;

use crate::{
    bytecode::{helpers, Instruction, InstructionSink},
    crc32_ieee, ByteReader, ByteWriter, CoreError, CoreResult, SectionTag, MAGIC_TCBC, TCBC_VERSION,
};

/// Name of the entry method run by the VM.
pub const ENTRY_POINT: &str = "main";

const OP_LOAD_CONST: u8 = 0x01;
const OP_ADD: u8 = 0x10;
const OP_SUB: u8 = 0x11;
const OP_MUL: u8 = 0x12;
const OP_DIV: u8 = 0x13;
const OP_INVOKE: u8 = 0x20;
const OP_PRINT: u8 = 0x30;
const OP_RETURN_VALUE: u8 = 0x40;
const OP_RETURN: u8 = 0x41;

const RET_VOID: u8 = 0;
const RET_F64: u8 = 1;

const FLAG_STRIPPED: u8 = 0b0000_0001;

/// Flags stored in the module header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModuleFlags {
    /// True if the module carries no embedded source.
    pub stripped: bool,
}

/// Debug payload kept for tooling.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DebugInfo {
    /// Source text the module was compiled from.
    pub source: Option<String>,
}

/// Constant pool of `f64` values, interned by bit pattern.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConstPool {
    values: Vec<f64>,
}

impl ConstPool {
    /// Create an empty pool.
    pub const fn new() -> Self { Self { values: Vec::new() } }

    /// Number of stored constants.
    pub fn len(&self) -> usize { self.values.len() }

    /// Whether the pool is empty.
    pub fn is_empty(&self) -> bool { self.values.is_empty() }

    /// Iterate as `(index, value)`.
    pub fn iter(&self) -> impl Iterator<Item = (u32, f64)> + '_ {
        (0u32..).zip(self.values.iter().copied())
    }

    /// Return the index of `value`, adding it if needed.
    ///
    /// `0.0` and `-0.0` are distinct entries.
    pub fn intern(&mut self, value: f64) -> CoreResult<u32> {
        let bits = value.to_bits();
        if let Some(pos) = self.values.iter().position(|v| v.to_bits() == bits) {
            return index_u32(pos);
        }
        let idx = index_u32(self.values.len())?;
        self.values.push(value);
        Ok(idx)
    }

    /// Lookup a constant by index.
    pub fn get(&self, idx: u32) -> Option<f64> { self.values.get(idx as usize).copied() }

    /// Drop every constant from index `len` on.
    pub fn truncate(&mut self, len: usize) { self.values.truncate(len); }
}

/// What a method leaves for its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Returns {
    /// Nothing.
    Void,
    /// One `f64`.
    F64,
}

/// Concrete operations stored in a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// Push constant `u32` from the pool.
    LoadConst(u32),
    /// Pop `r`, pop `l`, push `l + r`.
    Add,
    /// Pop `r`, pop `l`, push `l - r`.
    Sub,
    /// Pop `r`, pop `l`, push `l * r`.
    Mul,
    /// Pop `r`, pop `l`, push `l / r`.
    Div,
    /// Call method `u32`; its result (if any) is pushed.
    Invoke(u32),
    /// Pop a value and print it followed by a newline.
    Print,
    /// Return the top of the stack.
    ReturnValue,
    /// Return nothing.
    Return,
}

impl Op {
    /// Whether the op ends the method.
    pub const fn is_return(self) -> bool { matches!(self, Self::ReturnValue | Self::Return) }
}

/// A named method body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Method {
    /// Method name, unique within the module.
    pub name: String,
    /// Return kind.
    pub returns: Returns,
    /// Maximal operand stack depth reached by the body.
    pub max_stack: u16,
    /// Linear list of operations.
    pub ops: Vec<Op>,
}

/// Compiled TinyCalc module.
#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    version: u16,
    flags: ModuleFlags,
    /// Module (class) name.
    pub name: String,
    /// Constant pool shared by all methods.
    pub consts: ConstPool,
    /// Methods in definition order.
    pub methods: Vec<Method>,
    /// Optional debug payload.
    pub debug: DebugInfo,
}

impl Module {
    /// Create an empty module.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            version: TCBC_VERSION,
            flags: ModuleFlags { stripped: true },
            name: name.into(),
            consts: ConstPool::new(),
            methods: Vec::new(),
            debug: DebugInfo::default(),
        }
    }

    /// Format version.
    pub const fn version(&self) -> u16 { self.version }

    /// Header flags.
    pub const fn flags(&self) -> ModuleFlags { self.flags }

    /// Attach (or drop) the source text.
    pub fn set_source(&mut self, source: Option<String>) {
        self.flags.stripped = source.is_none();
        self.debug.source = source;
    }

    /// Find a method by name.
    pub fn method(&self, name: &str) -> Option<(u32, &Method)> {
        (0u32..).zip(&self.methods).find(|(_, m)| m.name == name)
    }

    /// Method at `idx`.
    pub fn method_at(&self, idx: u32) -> Option<&Method> { self.methods.get(idx as usize) }

    /// Open a new method body. Nothing is added to the module until
    /// [`MethodBuilder::finish`] succeeds: constants interned by a builder
    /// that fails or is dropped are removed again.
    pub fn begin_method(&mut self, name: impl Into<String>, returns: Returns) -> MethodBuilder<'_> {
        let consts_mark = self.consts.len();
        MethodBuilder {
            module: self,
            name: name.into(),
            returns,
            ops: Vec::new(),
            error: None,
            consts_mark,
            closed: false,
        }
    }

    /// Total number of ops over all methods.
    pub fn op_count(&self) -> usize { self.methods.iter().map(|m| m.ops.len()).sum() }

    /* ─────────────── encoding ─────────────── */

    /// Encode the module to its binary form.
    pub fn to_bytes(&self) -> CoreResult<Vec<u8>> {
        let mut w = ByteWriter::new();
        w.write_bytes(MAGIC_TCBC);
        w.write_u16_le(self.version);
        w.write_u8(if self.debug.source.is_none() { FLAG_STRIPPED } else { 0 });
        w.write_u8(0);

        w.write_section(SectionTag::NAME, self.name.as_bytes())?;

        let mut flts = ByteWriter::new();
        flts.write_u32_le(index_u32(self.consts.len())?);
        for (_, v) in self.consts.iter() {
            flts.write_f64_le(v);
        }
        w.write_section(SectionTag::FLTS, flts.as_slice())?;

        let mut code = ByteWriter::new();
        code.write_u32_le(index_u32(self.methods.len())?);
        for m in &self.methods {
            encode_method(&mut code, m)?;
        }
        w.write_section(SectionTag::CODE, code.as_slice())?;

        if let Some(src) = &self.debug.source {
            w.write_section(SectionTag::SRCE, src.as_bytes())?;
        }

        let crc = crc32_ieee(w.as_slice());
        w.write_section(SectionTag::CRCC, &crc.to_le_bytes())?;
        Ok(w.into_vec())
    }

    /// Decode a module produced by [`Module::to_bytes`].
    pub fn from_bytes(data: &[u8]) -> CoreResult<Self> {
        let mut r = ByteReader::new(data);
        if r.read_bytes(MAGIC_TCBC.len()).map_err(|_| CoreError::InvalidMagic)? != MAGIC_TCBC {
            return Err(CoreError::InvalidMagic);
        }
        let version = r.read_u16_le()?;
        if version != TCBC_VERSION {
            return Err(CoreError::corrupted(format!("unsupported version {version}")));
        }
        let flags = r.read_u8()?;
        let _reserved = r.read_u8()?;

        let mut name = None;
        let mut consts = None;
        let mut methods = None;
        let mut source = None;

        loop {
            let section_start = r.offset();
            let tag = r.read_tag()?;
            let len = r.read_u32_le()? as usize;
            if len > r.remaining() {
                return Err(CoreError::InvalidLength { section: Some(Cow::Borrowed(tag.name())), len: len as u64 });
            }
            let payload = r.read_bytes(len)?;
            match tag {
                SectionTag::NAME => set_once(&mut name, tag, decode_utf8(payload)?)?,
                SectionTag::FLTS => set_once(&mut consts, tag, decode_consts(payload)?)?,
                SectionTag::CODE => set_once(&mut methods, tag, decode_methods(payload)?)?,
                SectionTag::SRCE => set_once(&mut source, tag, decode_utf8(payload)?)?,
                SectionTag::CRCC => {
                    if len != 4 {
                        return Err(CoreError::InvalidLength { section: Some(Cow::Borrowed("CRCC")), len: len as u64 });
                    }
                    let found = ByteReader::new(payload).read_u32_le()?;
                    let expected = crc32_ieee(&data[..section_start]);
                    if expected != found {
                        return Err(CoreError::HashMismatch { expected, found });
                    }
                    if !r.is_at_end() {
                        return Err(CoreError::corrupted("trailing bytes after CRCC"));
                    }
                    break;
                }
            }
        }

        let stripped = flags & FLAG_STRIPPED != 0;
        if stripped == source.is_some() {
            return Err(CoreError::corrupted("stripped flag disagrees with SRCE section"));
        }

        Ok(Self {
            version,
            flags: ModuleFlags { stripped },
            name: name.ok_or_else(|| missing(SectionTag::NAME))?,
            consts: consts.ok_or_else(|| missing(SectionTag::FLTS))?,
            methods: methods.ok_or_else(|| missing(SectionTag::CODE))?,
            debug: DebugInfo { source },
        })
    }
}

/* ─────────────────────────── Method builder ─────────────────────────── */

/// Open method body. Receives abstract [`Instruction`]s (via
/// [`InstructionSink`]) or concrete [`Op`]s.
pub struct MethodBuilder<'m> {
    module: &'m mut Module,
    name: String,
    returns: Returns,
    ops: Vec<Op>,
    error: Option<CoreError>,
    /// Pool size when the body was opened.
    consts_mark: usize,
    closed: bool,
}

impl MethodBuilder<'_> {
    /// Append a concrete op.
    pub fn push(&mut self, op: Op) { self.ops.push(op); }

    /// Ops emitted so far.
    pub fn ops(&self) -> &[Op] { &self.ops }

    /// Close the body: checks the stack discipline, records `max_stack`
    /// and appends the method. Returns the new method index.
    pub fn finish(mut self) -> CoreResult<u32> { self.close() }

    fn close(&mut self) -> CoreResult<u32> {
        if let Some(err) = self.error.take() {
            return Err(err);
        }
        if self.module.method(&self.name).is_some() {
            return Err(CoreError::corrupted(format!("duplicate method `{}`", self.name)));
        }
        let depth = helpers::stack_depth(self.module, &self.name, self.returns, &self.ops)?;
        let max_stack = u16::try_from(depth)
            .map_err(|_| CoreError::corrupted(format!("`{}` needs a stack of {depth}", self.name)))?;
        let idx = index_u32(self.module.methods.len())?;
        let method = Method {
            name: std::mem::take(&mut self.name),
            returns: self.returns,
            max_stack,
            ops: std::mem::take(&mut self.ops),
        };
        self.module.methods.push(method);
        self.closed = true;
        Ok(idx)
    }
}

impl Drop for MethodBuilder<'_> {
    fn drop(&mut self) {
        if !self.closed {
            self.module.consts.truncate(self.consts_mark);
        }
    }
}

impl InstructionSink for MethodBuilder<'_> {
    fn emit(&mut self, insn: Instruction) {
        let op = match insn {
            Instruction::PushConstant(v) => match self.module.consts.intern(v) {
                Ok(ix) => Op::LoadConst(ix),
                Err(err) => {
                    self.error.get_or_insert(err);
                    return;
                }
            },
            Instruction::Add => Op::Add,
            Instruction::Subtract => Op::Sub,
            Instruction::Multiply => Op::Mul,
            Instruction::Divide => Op::Div,
            Instruction::Return => match self.returns {
                Returns::F64 => Op::ReturnValue,
                Returns::Void => Op::Return,
            },
        };
        self.ops.push(op);
    }
}

/* ─────────────────────────── Codec helpers ─────────────────────────── */

fn index_u32(n: usize) -> CoreResult<u32> {
    u32::try_from(n).map_err(|_| CoreError::InvalidLength { section: None, len: n as u64 })
}

fn missing(tag: SectionTag) -> CoreError { CoreError::corrupted(format!("missing section {tag}")) }

fn set_once<T>(slot: &mut Option<T>, tag: SectionTag, value: T) -> CoreResult<()> {
    if slot.is_some() {
        return Err(CoreError::corrupted(format!("duplicate section {tag}")));
    }
    *slot = Some(value);
    Ok(())
}

fn decode_utf8(payload: &[u8]) -> CoreResult<String> {
    std::str::from_utf8(payload).map(str::to_owned).map_err(|_| CoreError::InvalidUtf8)
}

fn expect_end(r: &ByteReader<'_>, tag: SectionTag) -> CoreResult<()> {
    if r.is_at_end() { Ok(()) } else { Err(CoreError::corrupted(format!("trailing bytes in {tag}"))) }
}

fn decode_consts(payload: &[u8]) -> CoreResult<ConstPool> {
    let mut r = ByteReader::new(payload);
    let count = r.read_u32_le()? as usize;
    if count.saturating_mul(8) > r.remaining() {
        return Err(CoreError::InvalidLength { section: Some(Cow::Borrowed("FLTS")), len: count as u64 });
    }
    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        values.push(r.read_f64_le()?);
    }
    expect_end(&r, SectionTag::FLTS)?;
    Ok(ConstPool { values })
}

fn encode_method(w: &mut ByteWriter, m: &Method) -> CoreResult<()> {
    w.write_str(&m.name)?;
    w.write_u8(match m.returns {
        Returns::Void => RET_VOID,
        Returns::F64 => RET_F64,
    });
    w.write_u16_le(m.max_stack);
    w.write_u32_le(index_u32(m.ops.len())?);
    for op in &m.ops {
        match *op {
            Op::LoadConst(ix) => {
                w.write_u8(OP_LOAD_CONST);
                w.write_u32_le(ix);
            }
            Op::Invoke(ix) => {
                w.write_u8(OP_INVOKE);
                w.write_u32_le(ix);
            }
            Op::Add => w.write_u8(OP_ADD),
            Op::Sub => w.write_u8(OP_SUB),
            Op::Mul => w.write_u8(OP_MUL),
            Op::Div => w.write_u8(OP_DIV),
            Op::Print => w.write_u8(OP_PRINT),
            Op::ReturnValue => w.write_u8(OP_RETURN_VALUE),
            Op::Return => w.write_u8(OP_RETURN),
        }
    }
    Ok(())
}

fn decode_methods(payload: &[u8]) -> CoreResult<Vec<Method>> {
    let mut r = ByteReader::new(payload);
    let count = r.read_u32_le()? as usize;
    let mut methods = Vec::with_capacity(count.min(r.remaining()));
    for _ in 0..count {
        let name = r.read_str()?.to_owned();
        let returns = match r.read_u8()? {
            RET_VOID => Returns::Void,
            RET_F64 => Returns::F64,
            other => return Err(CoreError::corrupted(format!("invalid return kind {other} for `{name}`"))),
        };
        let max_stack = r.read_u16_le()?;
        let op_count = r.read_u32_le()? as usize;
        let mut ops = Vec::with_capacity(op_count.min(r.remaining()));
        for _ in 0..op_count {
            let op = match r.read_u8()? {
                OP_LOAD_CONST => Op::LoadConst(r.read_u32_le()?),
                OP_INVOKE => Op::Invoke(r.read_u32_le()?),
                OP_ADD => Op::Add,
                OP_SUB => Op::Sub,
                OP_MUL => Op::Mul,
                OP_DIV => Op::Div,
                OP_PRINT => Op::Print,
                OP_RETURN_VALUE => Op::ReturnValue,
                OP_RETURN => Op::Return,
                other => return Err(CoreError::corrupted(format!("unknown opcode 0x{other:02X} in `{name}`"))),
            };
            ops.push(op);
        }
        methods.push(Method { name, returns, max_stack, ops });
    }
    expect_end(&r, SectionTag::CODE)?;
    Ok(methods)
}
