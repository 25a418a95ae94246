//! Validations structurelles et analyse de pile, utilisées par le
//! constructeur de méthodes, le chargeur et la CLI.

use std::borrow::Cow;

use crate::{
    bytecode::{
        module::{Module, Op, Returns, ENTRY_POINT},
        Instruction,
    },
    CoreError, CoreResult,
};

/// Profil de pile d’une suite d’[`Instruction`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StackProfile {
    /// Profondeur à la fin de la suite.
    pub final_depth: u32,
    /// Profondeur maximale atteinte.
    pub max_depth: u32,
}

/// Simule une suite d’instructions abstraites sur une pile vide.
///
/// Un `Return` doit être la dernière instruction et consomme une valeur.
pub fn stack_profile(insns: &[Instruction]) -> CoreResult<StackProfile> {
    let mut depth: u32 = 0;
    let mut max_depth: u32 = 0;
    for (pc, insn) in (0u32..).zip(insns) {
        if depth < insn.pops() {
            return Err(underflow("<instructions>", pc));
        }
        if matches!(insn, Instruction::Return) && (pc as usize) + 1 != insns.len() {
            return Err(CoreError::corrupted(format!("instruction after return at pc {pc}")));
        }
        depth = depth - insn.pops() + insn.pushes();
        max_depth = max_depth.max(depth);
    }
    Ok(StackProfile { final_depth: depth, max_depth })
}

/// Simule le corps d’une méthode et renvoie sa profondeur de pile maximale.
///
/// Erreurs : pile vide, retour avec une profondeur incorrecte, retour
/// manquant ou code après le retour, index de constante/méthode invalide.
pub fn stack_depth(module: &Module, name: &str, returns: Returns, ops: &[Op]) -> CoreResult<u32> {
    let mut depth: u32 = 0;
    let mut max_depth: u32 = 0;
    let mut returned = false;

    for (pc, op) in (0u32..).zip(ops) {
        if returned {
            return Err(CoreError::corrupted(format!("code after return in `{name}` at pc {pc}")));
        }
        let (pops, pushes) = match *op {
            Op::LoadConst(ix) => {
                if module.consts.get(ix).is_none() {
                    return Err(CoreError::corrupted(format!(
                        "`{name}` pc {pc} references const {ix} but pool size is {}",
                        module.consts.len()
                    )));
                }
                (0, 1)
            }
            Op::Add | Op::Sub | Op::Mul | Op::Div => (2, 1),
            Op::Invoke(ix) => {
                let callee = module.method_at(ix).ok_or_else(|| {
                    CoreError::corrupted(format!("`{name}` pc {pc} invokes unknown method #{ix}"))
                })?;
                (0, u32::from(callee.returns == Returns::F64))
            }
            Op::Print => (1, 0),
            Op::ReturnValue => {
                if returns != Returns::F64 {
                    return Err(CoreError::corrupted(format!("`{name}` returns a value but is declared void")));
                }
                returned = true;
                (1, 0)
            }
            Op::Return => {
                if returns != Returns::Void {
                    return Err(CoreError::corrupted(format!("`{name}` must return a value")));
                }
                returned = true;
                (0, 0)
            }
        };
        if depth < pops {
            return Err(underflow(name, pc));
        }
        depth = depth - pops + pushes;
        if returned && depth != 0 {
            return Err(CoreError::corrupted(format!("`{name}` leaves {depth} extra value(s) at return")));
        }
        max_depth = max_depth.max(depth);
    }

    if !returned {
        return Err(CoreError::corrupted(format!("`{name}` does not end with a return")));
    }
    Ok(max_depth)
}

/// Validation complète d’un module chargé.
///
/// Vérifie l’unicité des noms, la discipline de pile et le `max_stack`
/// déclaré de chaque méthode, puis la présence d’un point d’entrée `main`
/// sans valeur de retour.
pub fn validate_module(module: &Module) -> CoreResult<()> {
    for (i, m) in module.methods.iter().enumerate() {
        if module.methods[..i].iter().any(|other| other.name == m.name) {
            return Err(CoreError::corrupted(format!("duplicate method `{}`", m.name)));
        }
        let depth = stack_depth(module, &m.name, m.returns, &m.ops)?;
        if depth != u32::from(m.max_stack) {
            return Err(CoreError::corrupted(format!(
                "`{}` declares max_stack {} but needs {depth}",
                m.name, m.max_stack
            )));
        }
    }

    match module.method(ENTRY_POINT) {
        Some((_, m)) if m.returns == Returns::Void => Ok(()),
        Some(_) => Err(CoreError::corrupted("entry point `main` must not return a value")),
        None => Err(CoreError::unknown_method(ENTRY_POINT)),
    }
}

fn underflow(method: &str, pc: u32) -> CoreError {
    CoreError::StackUnderflow { method: Cow::Owned(method.to_owned()), pc }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::InstructionSink;

    #[test]
    fn profile_counts_depth() -> CoreResult<()> {
        use Instruction::*;
        let p = stack_profile(&[PushConstant(1.0), PushConstant(2.0), PushConstant(3.0), Multiply, Add])?;
        assert_eq!(p, StackProfile { final_depth: 1, max_depth: 3 });
        assert!(stack_profile(&[PushConstant(1.0), Subtract]).is_err());
        assert!(stack_profile(&[PushConstant(1.0), Return, PushConstant(1.0)]).is_err());
        Ok(())
    }

    #[test]
    fn missing_entry_point() -> CoreResult<()> {
        let mut m = Module::new("NoMain");
        let mut get = m.begin_method("get", Returns::F64);
        get.emit(Instruction::PushConstant(4.0));
        get.emit(Instruction::Return);
        get.finish()?;
        assert_eq!(validate_module(&m), Err(CoreError::unknown_method("main")));
        Ok(())
    }

    #[test]
    fn tampered_max_stack_is_rejected() -> CoreResult<()> {
        let mut m = Module::new("T");
        let mut main = m.begin_method(ENTRY_POINT, Returns::Void);
        main.push(Op::Return);
        main.finish()?;
        validate_module(&m)?;
        m.methods[0].max_stack = 9;
        assert!(validate_module(&m).is_err());
        Ok(())
    }

    #[test]
    fn bad_indices_are_rejected() {
        let m = Module::new("I");
        assert!(stack_depth(&m, "x", Returns::F64, &[Op::LoadConst(0), Op::ReturnValue]).is_err());
        assert!(stack_depth(&m, "x", Returns::Void, &[Op::Invoke(3), Op::Return]).is_err());
        assert!(stack_depth(&m, "x", Returns::Void, &[Op::Return, Op::Return]).is_err());
        assert!(stack_depth(&m, "x", Returns::Void, &[]).is_err());
    }
}
