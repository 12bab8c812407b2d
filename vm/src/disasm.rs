//! Text listing of a loaded unit: every method body with its byte
//! offsets, exception table and the operand types the analysis infers.

use std::fmt::Write;

use object::{SlotType, StringTable};

use crate::codegen::{CompileRequest, analysis};
use crate::loader::{LoadedUnit, TraitDesc, TraitDescKind};
use crate::{UnitHandle, Vm, VmError};

impl Vm {
    pub fn disassemble(&self, unit: UnitHandle) -> Result<String, VmError> {
        let loaded = self
            .units
            .get(unit.0 as usize)
            .ok_or_else(|| VmError::Internal(format!("no unit {}", unit.0)))?;
        Ok(listing(loaded, &self.strings))
    }
}

fn type_name(ty: &SlotType, strings: &StringTable) -> String {
    match ty {
        SlotType::Any => "*".to_owned(),
        SlotType::Int => "int".to_owned(),
        SlotType::UInt => "uint".to_owned(),
        SlotType::Number => "Number".to_owned(),
        SlotType::Boolean => "Boolean".to_owned(),
        SlotType::String => "String".to_owned(),
        SlotType::Class(name) => name.display(strings),
    }
}

/// A readable label for every method of `unit` that a trait, class or
/// script refers to.
fn method_labels(unit: &LoadedUnit, strings: &StringTable) -> Vec<Option<String>> {
    let mut labels = vec![None; unit.methods.len()];
    let mut label = |index: u32, text: String| {
        if let Some(slot) = labels.get_mut(index as usize) {
            slot.get_or_insert(text);
        }
    };
    let traits = |owner: &str, traits: &[TraitDesc], label: &mut dyn FnMut(u32, String)| {
        for t in traits {
            let name = t.name.display(strings);
            match t.kind {
                TraitDescKind::Method(m) | TraitDescKind::Function { method: m, .. } => {
                    label(m, format!("{owner}{name}"))
                }
                TraitDescKind::Getter(m) => label(m, format!("{owner}get {name}")),
                TraitDescKind::Setter(m) => label(m, format!("{owner}set {name}")),
                _ => {}
            }
        }
    };
    for class in &unit.classes {
        let name = class.name.display(strings);
        label(class.iinit, format!("{name} constructor"));
        label(class.cinit, format!("{name} class initializer"));
        traits(&format!("{name}/"), &class.instance_traits, &mut label);
        traits(&format!("{name}$/"), &class.static_traits, &mut label);
    }
    for (i, script) in unit.scripts.iter().enumerate() {
        label(script.init, format!("script {i} initializer"));
        traits("", &script.traits, &mut label);
    }
    labels
}

fn listing(unit: &LoadedUnit, strings: &StringTable) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "unit {}: {} scripts, {} classes, {} methods",
        unit.index,
        unit.scripts.len(),
        unit.classes.len(),
        unit.methods.len()
    );
    let labels = method_labels(unit, strings);

    for (index, method) in unit.methods.iter().enumerate() {
        let params: Vec<String> = method.params.iter().map(|p| type_name(p, strings)).collect();
        let label = labels[index]
            .clone()
            .unwrap_or_else(|| strings.get(method.name).to_string());
        let _ = writeln!(
            out,
            "\nmethod {index} {label}({}): {}",
            params.join(", "),
            type_name(&method.return_type, strings)
        );
        let Some(body) = &method.body else {
            let _ = writeln!(out, "  (native)");
            continue;
        };
        let _ = writeln!(
            out,
            "  locals {}, max stack {}, flags {:?}{}",
            body.local_count,
            body.max_stack,
            method.flags,
            if body.activation.is_some() { ", activation" } else { "" }
        );

        let name = strings.get(method.name);
        let handler_targets: Vec<usize> = body.handlers.iter().map(|h| h.target).collect();
        let request = CompileRequest {
            name: &name,
            code: &body.code,
            offsets: &body.offsets,
            params: &method.params,
            return_type: method.return_type,
            local_count: body.local_count,
            flags: method.flags,
            handler_targets: &handler_targets,
            has_activation: body.activation.is_some(),
            ints: &unit.ints,
            uints: &unit.uints,
            doubles: &unit.doubles,
            multinames: &unit.multinames,
        };
        let analysis = analysis::analyze(&request);
        if let Err(err) = &analysis {
            let _ = writeln!(out, "  ; types unavailable: {err}");
        }

        for (i, (offset, instruction)) in body.offsets.iter().zip(&body.code).enumerate() {
            let text = instruction.to_string();
            match analysis.as_ref().ok().map(|a| a.at(i)) {
                Some(Some(frame)) if !frame.stack.is_empty() => {
                    let stack: Vec<String> = frame.stack.iter().map(ToString::to_string).collect();
                    let _ = writeln!(out, "  {offset:04}: {text:<32} ; [{}]", stack.join(", "));
                }
                Some(None) => {
                    let _ = writeln!(out, "  {offset:04}: {text:<32} ; unreachable");
                }
                _ => {
                    let _ = writeln!(out, "  {offset:04}: {text}");
                }
            }
        }

        if !body.handlers.is_empty() {
            let _ = writeln!(out, "  exceptions:");
            for handler in &body.handlers {
                let at = |i: usize| match body.offsets.get(i) {
                    Some(offset) => format!("{offset:04}"),
                    None => "end".to_owned(),
                };
                let _ = writeln!(
                    out,
                    "    [{}, {}) -> {} catch {}",
                    at(handler.from),
                    at(handler.to),
                    at(handler.target),
                    type_name(&handler.exc_type, strings)
                );
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use bytecode::{BytecodeBuilder, Instruction, MethodInfo, TraitInfo, UnitBuilder};

    use crate::{Vm, VmSettings};

    fn code_of(insts: &[Instruction]) -> Vec<u8> {
        let mut b = BytecodeBuilder::new();
        for inst in insts {
            b.emit(inst).unwrap();
        }
        b.finish().unwrap()
    }

    #[test]
    fn listing_shows_offsets_and_types() {
        let mut u = UnitBuilder::new();
        let int = u.public_name("int");
        let name = u.string("add");
        let add = u.function_with(
            MethodInfo {
                params: vec![int, int],
                return_type: int,
                name,
                ..MethodInfo::default()
            },
            3,
            code_of(&[
                Instruction::GetLocal { reg: 1 },
                Instruction::GetLocal { reg: 2 },
                Instruction::AddI,
                Instruction::ReturnValue,
            ]),
            Vec::new(),
        );
        let init = u.function("", 0, 1, code_of(&[Instruction::ReturnVoid]));
        let trait_name = u.public_name("add");
        u.script(init, vec![TraitInfo::method(trait_name, add)]);
        let file = u.finish();

        let mut vm = Vm::new(VmSettings::default()).unwrap();
        let handle = vm.load(&file).unwrap();
        let text = vm.disassemble(handle).unwrap();
        assert!(text.contains("add(int, int): int"), "{text}");
        assert!(text.contains("add_i"), "{text}");
        assert!(text.contains("; [int, int]"), "{text}");
        assert!(text.contains("script 0 initializer"), "{text}");
    }
}
