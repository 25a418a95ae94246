//! Bytecode de la machine à pile : instructions abstraites, modules `.tcbc`,
//! validation, évaluation et désassemblage.

/// Instructions produites par le compilateur et cible d’émission.
pub mod instruction;
/// Module compilé (pool de constantes, méthodes) + format binaire.
pub mod module;
pub mod helpers;
pub mod disasm;
pub mod runtime;

pub use instruction::{Instruction, InstructionSink};
pub use module::{ConstPool, DebugInfo, Method, MethodBuilder, Module, ModuleFlags, Op, Returns};
