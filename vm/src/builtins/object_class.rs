use object::{
    Atom, ClassFlags, InstanceKind, Multiname, Namespace, ObjectKind, parse_array_index,
};

use super::{ClassSpec, Member, NativeDesc, arg};
use crate::{ErrorKind, Vm, VmError};

// ── Object ────────────────────────────────────────────────────────────

pub fn object_spec() -> ClassSpec {
    ClassSpec {
        name: "Object",
        call: Some(object_call),
        prototype: vec![
            NativeDesc::new("hasOwnProperty", 1, object_has_own_property),
            NativeDesc::new("propertyIsEnumerable", 1, object_property_is_enumerable),
            NativeDesc::new("toString", 0, object_to_string),
            NativeDesc::new("valueOf", 0, object_value_of),
        ],
        ..ClassSpec::default()
    }
}

/// `Object(x)`: `x` itself, or a fresh object for `null`/`undefined`.
fn object_call(vm: &mut Vm, _this: &Atom, args: &[Atom]) -> Result<Atom, VmError> {
    match arg(args, 0) {
        value if value.is_nullish() => Ok(Atom::Object(vm.alloc_object())),
        value => Ok(value),
    }
}

fn element_present(items: Option<&Vec<Atom>>, name: &str) -> bool {
    match (items, parse_array_index(name)) {
        (Some(items), Some(index)) => items
            .get(index as usize)
            .is_some_and(|value| !matches!(value, Atom::Invalid)),
        _ => false,
    }
}

pub fn object_has_own_property(vm: &mut Vm, this: &Atom, args: &[Atom]) -> Result<Atom, VmError> {
    let name = vm.to_string_id(&arg(args, 0))?;
    let Atom::Object(object) = this else {
        return Ok(Atom::Bool(false));
    };
    let object = object.borrow();
    let text = vm.strings.get(name);
    let own = object.has_dynamic(name)
        || object.layout.find(&Multiname::public(name)).is_some()
        || element_present(object.as_array(), &text);
    Ok(Atom::Bool(own))
}

pub fn object_property_is_enumerable(
    vm: &mut Vm,
    this: &Atom,
    args: &[Atom],
) -> Result<Atom, VmError> {
    let name = vm.to_string_id(&arg(args, 0))?;
    let Atom::Object(object) = this else {
        return Ok(Atom::Bool(false));
    };
    let object = object.borrow();
    let text = vm.strings.get(name);
    Ok(Atom::Bool(
        object.is_enumerable(name) || element_present(object.as_array(), &text),
    ))
}

pub fn object_to_string(vm: &mut Vm, this: &Atom, _args: &[Atom]) -> Result<Atom, VmError> {
    let text = match this {
        Atom::Object(object) => {
            let object = object.borrow();
            match object.kind {
                ObjectKind::Class(id) => {
                    let name = vm.class_def(id).name.name;
                    format!("[class {}]", vm.strings.get(name))
                }
                _ => format!("[object {}]", vm.strings.get(object.class.name.name)),
            }
        }
        other => format!("[object {}]", vm.class_name_of(other)),
    };
    Ok(vm.new_string(&text))
}

pub fn object_value_of(_vm: &mut Vm, this: &Atom, _args: &[Atom]) -> Result<Atom, VmError> {
    Ok(this.clone())
}

// ── Class ─────────────────────────────────────────────────────────────

pub fn class_spec() -> ClassSpec {
    ClassSpec {
        name: "Class",
        kind: InstanceKind::Abstract,
        flags: ClassFlags::FINAL,
        ..ClassSpec::default()
    }
}

// ── Namespace ─────────────────────────────────────────────────────────

pub fn namespace_spec() -> ClassSpec {
    ClassSpec {
        name: "Namespace",
        kind: InstanceKind::Namespace,
        flags: ClassFlags::FINAL | ClassFlags::SEALED,
        init: Some(NativeDesc::new("Namespace", 1, namespace_init)),
        call: Some(namespace_call),
        instance: vec![Member::Getter(NativeDesc::new("uri", 0, namespace_uri))],
        prototype: vec![NativeDesc::new("toString", 0, namespace_uri)],
        ..ClassSpec::default()
    }
}

fn namespace_of_arg(vm: &mut Vm, value: &Atom) -> Result<Namespace, VmError> {
    if let Atom::Object(object) = value {
        if let ObjectKind::Namespace(ns) = object.borrow().kind {
            return Ok(ns);
        }
    }
    if value.is_nullish() {
        return Ok(Namespace::PUBLIC);
    }
    let uri = vm.to_string_id(value)?;
    Ok(Namespace::package(uri))
}

fn namespace_init(vm: &mut Vm, this: &Atom, args: &[Atom]) -> Result<Atom, VmError> {
    let ns = namespace_of_arg(vm, &arg(args, 0))?;
    if let Atom::Object(object) = this {
        object.borrow_mut().kind = ObjectKind::Namespace(ns);
    }
    Ok(Atom::Undefined)
}

fn namespace_call(vm: &mut Vm, _this: &Atom, args: &[Atom]) -> Result<Atom, VmError> {
    let ns = namespace_of_arg(vm, &arg(args, 0))?;
    Ok(Atom::Object(vm.new_namespace(ns)))
}

pub fn namespace_uri(vm: &mut Vm, this: &Atom, _args: &[Atom]) -> Result<Atom, VmError> {
    let ns = match this {
        Atom::Object(object) => match object.borrow().kind {
            ObjectKind::Namespace(ns) => Some(ns),
            _ => None,
        },
        _ => None,
    };
    match ns {
        Some(ns) => Ok(Atom::String(ns.uri)),
        None => {
            let from = vm.describe_value(this);
            Err(vm.throw(ErrorKind::TypeError, 1034, &[&from, "Namespace"]))
        }
    }
}
