//! Instruction set emitted by the expression compiler.
//!
//! Every binary operation pops two values (the first pushed is the left
//! operand) and pushes one result. Order is the only thing that carries
//! meaning in a stream of instructions.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// One stack-machine instruction.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Instruction {
    /// Push a double-precision constant.
    PushConstant(f64),
    /// `left + right`
    Add,
    /// `left - right`
    Subtract,
    /// `left * right`
    Multiply,
    /// `left / right` (IEEE-754, division by zero is not trapped)
    Divide,
    /// Return the top of the stack from the current method.
    Return,
}

impl Instruction {
    /// Number of operands popped before anything is pushed.
    pub const fn pops(self) -> u32 {
        match self {
            Self::PushConstant(_) => 0,
            Self::Add | Self::Subtract | Self::Multiply | Self::Divide => 2,
            Self::Return => 1,
        }
    }

    /// Number of values pushed once the operands are popped.
    pub const fn pushes(self) -> u32 {
        match self {
            Self::Return => 0,
            Self::PushConstant(_) | Self::Add | Self::Subtract | Self::Multiply | Self::Divide => 1,
        }
    }

    /// Apply a binary arithmetic instruction; `None` for the other kinds.
    pub fn apply(self, left: f64, right: f64) -> Option<f64> {
        match self {
            Self::Add => Some(left + right),
            Self::Subtract => Some(left - right),
            Self::Multiply => Some(left * right),
            Self::Divide => Some(left / right),
            Self::PushConstant(_) | Self::Return => None,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PushConstant(v) => write!(f, "push {v:?}"),
            Self::Add => f.write_str("add"),
            Self::Subtract => f.write_str("sub"),
            Self::Multiply => f.write_str("mul"),
            Self::Divide => f.write_str("div"),
            Self::Return => f.write_str("ret"),
        }
    }
}

/// Append-only target for the instructions of a single method body.
///
/// The compiler only ever appends; it never reads back what it emitted.
pub trait InstructionSink {
    /// Append one instruction.
    fn emit(&mut self, insn: Instruction);
}

impl InstructionSink for Vec<Instruction> {
    fn emit(&mut self, insn: Instruction) { self.push(insn); }
}

impl<S: InstructionSink + ?Sized> InstructionSink for &mut S {
    fn emit(&mut self, insn: Instruction) { (**self).emit(insn); }
}
