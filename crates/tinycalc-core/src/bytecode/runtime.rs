//! Petite VM à pile pour exécuter les modules `.tcbc` et les suites
//! d’instructions brutes.

/// Évaluateur utilisé par la CLI (`run`, `eval`) et les tests.
pub mod eval {
    use std::io::Write as _;

    use crate::{
        bytecode::{
            module::{Module, Op, Returns, ENTRY_POINT},
            Instruction,
        },
        CoreError, CoreResult,
    };

    /// Profondeur d’appel maximale (protège des cycles `Invoke`).
    pub const MAX_CALL_DEPTH: usize = 64;

    /// Options de l’évaluateur.
    #[derive(Debug, Clone, Default)]
    pub struct EvalOptions {
        /// Si vrai, la sortie n’est que capturée ; sinon elle est aussi
        /// écrite sur la sortie standard du processus.
        pub capture_stdout: bool,
    }

    /// Résultat de l’évaluation d’un module.
    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct EvalOutput {
        /// Texte produit par les `Print` (une ligne par valeur).
        pub stdout: String,
    }

    /// Exécute le point d’entrée `main` du module.
    pub fn eval_module(module: &Module, opts: EvalOptions) -> CoreResult<EvalOutput> {
        let (entry, _) = module.method(ENTRY_POINT).ok_or_else(|| CoreError::unknown_method(ENTRY_POINT))?;
        let mut vm = Vm { module, opts, out: String::new() };
        vm.call(entry, 0)?;
        Ok(EvalOutput { stdout: vm.out })
    }

    /// Appelle une méthode qui renvoie un `f64` (ex. `get`) et renvoie sa valeur.
    pub fn invoke(module: &Module, name: &str) -> CoreResult<f64> {
        let (idx, method) = module.method(name).ok_or_else(|| CoreError::unknown_method(name.to_owned()))?;
        if method.returns != Returns::F64 {
            return Err(CoreError::corrupted(format!("`{name}` does not return a value")));
        }
        let mut vm = Vm { module, opts: EvalOptions { capture_stdout: true }, out: String::new() };
        vm.call(idx, 0)?.ok_or_else(|| CoreError::corrupted(format!("`{name}` returned nothing")))
    }

    /// Évalue une suite d’instructions abstraites (un `Return` final est
    /// accepté). La pile doit contenir exactement une valeur à la fin.
    pub fn eval_instructions(insns: &[Instruction]) -> CoreResult<f64> {
        let mut stack: Vec<f64> = Vec::new();
        for (pc, insn) in (0u32..).zip(insns) {
            match *insn {
                Instruction::PushConstant(v) => stack.push(v),
                Instruction::Return => {
                    if (pc as usize) + 1 != insns.len() {
                        return Err(CoreError::corrupted(format!("instruction after return at pc {pc}")));
                    }
                    break;
                }
                op => {
                    let (l, r) = pop2(&mut stack, "<instructions>", pc)?;
                    stack.extend(op.apply(l, r));
                }
            }
        }
        match stack.as_slice() {
            [v] => Ok(*v),
            other => Err(CoreError::corrupted(format!("expected exactly one value, found {}", other.len()))),
        }
    }

    /// Rendu textuel d’un `f64` : décimal entre 10⁻³ et 10⁷, notation
    /// scientifique `d.dddE±n` sinon, toujours au moins un chiffre après le point.
    pub fn format_f64(v: f64) -> String {
        if v.is_nan() {
            return "NaN".into();
        }
        if v.is_infinite() {
            return if v > 0.0 { "Infinity".into() } else { "-Infinity".into() };
        }
        let abs = v.abs();
        if abs == 0.0 || (1e-3..1e7).contains(&abs) {
            let s = format!("{v}");
            return if s.contains('.') { s } else { s + ".0" };
        }
        let s = format!("{v:e}");
        match s.split_once('e') {
            Some((mantissa, exp)) if mantissa.contains('.') => format!("{mantissa}E{exp}"),
            Some((mantissa, exp)) => format!("{mantissa}.0E{exp}"),
            None => s,
        }
    }

    struct Vm<'m> {
        module: &'m Module,
        opts: EvalOptions,
        out: String,
    }

    impl Vm<'_> {
        fn call(&mut self, idx: u32, depth: usize) -> CoreResult<Option<f64>> {
            if depth >= MAX_CALL_DEPTH {
                return Err(CoreError::corrupted(format!("call depth exceeds {MAX_CALL_DEPTH}")));
            }
            let module = self.module;
            let method = module
                .method_at(idx)
                .ok_or_else(|| CoreError::corrupted(format!("method #{idx} inexistante")))?;
            let name = method.name.as_str();
            let mut stack: Vec<f64> = Vec::with_capacity(usize::from(method.max_stack));

            for (pc, op) in (0u32..).zip(&method.ops) {
                match *op {
                    Op::LoadConst(ix) => {
                        let v = module
                            .consts
                            .get(ix)
                            .ok_or_else(|| CoreError::corrupted(format!("const {ix} inexistante")))?;
                        stack.push(v);
                    }
                    Op::Add | Op::Sub | Op::Mul | Op::Div => {
                        let (l, r) = pop2(&mut stack, name, pc)?;
                        stack.push(match *op {
                            Op::Add => l + r,
                            Op::Sub => l - r,
                            Op::Mul => l * r,
                            _ => l / r,
                        });
                    }
                    Op::Invoke(callee) => {
                        if let Some(v) = self.call(callee, depth + 1)? {
                            stack.push(v);
                        }
                    }
                    Op::Print => {
                        let v = pop1(&mut stack, name, pc)?;
                        self.print(&format_f64(v))?;
                    }
                    Op::ReturnValue => return pop1(&mut stack, name, pc).map(Some),
                    Op::Return => return Ok(None),
                }
            }
            Err(CoreError::corrupted(format!("`{name}` fell off the end without returning")))
        }

        fn print(&mut self, line: &str) -> CoreResult<()> {
            self.out.push_str(line);
            self.out.push('\n');
            if !self.opts.capture_stdout {
                writeln!(std::io::stdout().lock(), "{line}")
                    .map_err(|e| CoreError::corrupted(format!("stdout: {e}")))?;
            }
            Ok(())
        }
    }

    fn pop1(stack: &mut Vec<f64>, method: &str, pc: u32) -> CoreResult<f64> {
        stack.pop().ok_or_else(|| CoreError::StackUnderflow { method: method.to_owned().into(), pc })
    }

    fn pop2(stack: &mut Vec<f64>, method: &str, pc: u32) -> CoreResult<(f64, f64)> {
        let r = pop1(stack, method, pc)?;
        let l = pop1(stack, method, pc)?;
        Ok((l, r))
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::bytecode::InstructionSink;

        #[test]
        fn java_style_rendering() {
            assert_eq!(format_f64(7.0), "7.0");
            assert_eq!(format_f64(-35.0), "-35.0");
            assert_eq!(format_f64(0.0), "0.0");
            assert_eq!(format_f64(-0.0), "-0.0");
            assert_eq!(format_f64(0.5), "0.5");
            assert_eq!(format_f64(1e7), "1.0E7");
            assert_eq!(format_f64(1.5e-5), "1.5E-5");
            assert_eq!(format_f64(f64::NAN), "NaN");
            assert_eq!(format_f64(f64::NEG_INFINITY), "-Infinity");
        }

        #[test]
        fn raw_instructions() -> CoreResult<()> {
            use Instruction::*;
            // 10 - 4 / 2
            let insns = [PushConstant(10.0), PushConstant(4.0), PushConstant(2.0), Divide, Subtract, Return];
            assert_eq!(eval_instructions(&insns)?, 8.0);
            assert!(matches!(eval_instructions(&[Add]), Err(CoreError::StackUnderflow { pc: 0, .. })));
            assert!(eval_instructions(&[PushConstant(1.0), PushConstant(2.0)]).is_err());
            assert!(eval_instructions(&[]).is_err());
            Ok(())
        }

        #[test]
        fn module_prints_result() -> CoreResult<()> {
            let mut m = Module::new("Calc");
            let mut get = m.begin_method("get", Returns::F64);
            get.emit(Instruction::PushConstant(6.0));
            get.emit(Instruction::PushConstant(0.0));
            get.emit(Instruction::Divide);
            get.emit(Instruction::Return);
            let get = get.finish()?;
            let mut main = m.begin_method(ENTRY_POINT, Returns::Void);
            main.push(Op::Invoke(get));
            main.push(Op::Print);
            main.push(Op::Return);
            main.finish()?;

            let out = eval_module(&m, EvalOptions { capture_stdout: true })?;
            assert_eq!(out.stdout, "Infinity\n");
            assert_eq!(invoke(&m, "get")?, f64::INFINITY);
            assert!(invoke(&m, "main").is_err());
            assert!(invoke(&m, "nope").is_err());
            Ok(())
        }

        #[test]
        fn cyclic_invoke_is_bounded() {
            let mut m = Module::new("Loop");
            // construit à la main : `main` s’appelle lui-même
            m.methods.push(crate::bytecode::Method {
                name: ENTRY_POINT.into(),
                returns: Returns::Void,
                max_stack: 0,
                ops: vec![Op::Invoke(0), Op::Return],
            });
            assert!(eval_module(&m, EvalOptions { capture_stdout: true }).is_err());
        }
    }
}
