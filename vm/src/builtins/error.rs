//! `Error` and its native subclasses, plus the helpers the runtime uses
//! to raise numbered errors as script values.

use object::{Atom, ClassId, Multiname, ObjectRef, SlotType};

use super::{ClassSpec, Member, NativeDesc, arg};
use crate::{ErrorKind, UncaughtError, Vm, VmError, error_message};

pub(crate) const MESSAGE_SLOT: u32 = 0;
pub(crate) const NAME_SLOT: u32 = 1;
pub(crate) const ERROR_ID_SLOT: u32 = 2;

/// Spec of the builtin class for `kind`. Only `Error` itself (`base` is
/// `None`) declares the instance slots; subclasses inherit them.
pub fn spec(kind: ErrorKind, base: Option<ClassId>) -> ClassSpec {
    let (instance, statics) = match base {
        None => (
            vec![
                Member::slot("message", SlotType::String, Atom::Null),
                Member::slot("name", SlotType::String, Atom::Null),
                Member::Slot {
                    name: "errorID",
                    ty: SlotType::Int,
                    value: Atom::Int(0),
                    constant: true,
                },
            ],
            vec![Member::Method(NativeDesc::new("getErrorMessage", 1, error_get_message))],
        ),
        Some(_) => (Vec::new(), Vec::new()),
    };
    ClassSpec {
        name: kind.class_name(),
        base,
        init: Some(NativeDesc::new(kind.class_name(), 2, error_init)),
        instance,
        statics,
        prototype: match base {
            None => vec![
                NativeDesc::new("toString", 0, error_to_string),
                NativeDesc::new("getStackTrace", 0, error_get_stack_trace),
            ],
            Some(_) => Vec::new(),
        },
        ..ClassSpec::default()
    }
}

/// Name of the nearest builtin error class `object` descends from.
fn error_name(vm: &Vm, object: &ObjectRef) -> Atom {
    let object = object.borrow();
    let name = object
        .class
        .ancestors()
        .find(|def| {
            ErrorKind::ALL
                .iter()
                .any(|&kind| vm.builtins.error(kind) == def.id)
        })
        .map(|def| def.name.name);
    match name {
        Some(name) => Atom::String(name),
        None => vm.new_string(ErrorKind::Error.class_name()),
    }
}

fn error_init(vm: &mut Vm, this: &Atom, args: &[Atom]) -> Result<Atom, VmError> {
    let Atom::Object(object) = this else {
        return Ok(Atom::Undefined);
    };
    let message = match arg(args, 0) {
        Atom::Undefined => vm.new_string(""),
        value => Atom::String(vm.to_string_id(&value)?),
    };
    let id = vm.to_int32(&arg(args, 1))?;
    let name = error_name(vm, object);
    let mut object = object.borrow_mut();
    // The three slots always exist on error instances.
    let _ = object.set_slot(MESSAGE_SLOT, message);
    let _ = object.set_slot(NAME_SLOT, name);
    let _ = object.set_slot(ERROR_ID_SLOT, Atom::Int(id));
    Ok(Atom::Undefined)
}

pub fn error_to_string(vm: &mut Vm, this: &Atom, _args: &[Atom]) -> Result<Atom, VmError> {
    let name = vm.get_prop(this, &Multiname::public(vm.names.name))?;
    let message = vm.get_prop(this, &Multiname::public(vm.names.message))?;
    let name = match name {
        value if value.is_nullish() => ErrorKind::Error.class_name().to_owned(),
        value => vm.to_rust_string(&value)?,
    };
    let message = match message {
        value if value.is_nullish() => String::new(),
        value => vm.to_rust_string(&value)?,
    };
    let text = if message.is_empty() {
        name
    } else {
        format!("{name}: {message}")
    };
    Ok(vm.new_string(&text))
}

fn error_get_stack_trace(_vm: &mut Vm, _this: &Atom, _args: &[Atom]) -> Result<Atom, VmError> {
    Ok(Atom::Null)
}

/// `Error.getErrorMessage(id)`: the template of a numbered error.
fn error_get_message(vm: &mut Vm, _this: &Atom, args: &[Atom]) -> Result<Atom, VmError> {
    let code = vm.to_int32(&arg(args, 0))?;
    let text = error_message(code.max(0) as u32, &[]);
    Ok(vm.new_string(&text))
}

impl Vm {
    /// An instance of the builtin error class for `kind`.
    pub(crate) fn new_error(
        &mut self,
        kind: ErrorKind,
        message: &str,
        code: u32,
    ) -> Result<ObjectRef, VmError> {
        let object = self.alloc_instance(self.builtins.error(kind))?;
        {
            let mut error = object.borrow_mut();
            let _ = error.set_slot(MESSAGE_SLOT, Atom::String(self.strings.intern(message)));
            let _ = error.set_slot(NAME_SLOT, Atom::String(self.strings.intern(kind.class_name())));
            let _ = error.set_slot(ERROR_ID_SLOT, Atom::Int(code as i32));
        }
        Ok(object)
    }

    /// Raise runtime error `code` as a catchable `kind` instance.
    pub(crate) fn throw(&mut self, kind: ErrorKind, code: u32, args: &[&str]) -> VmError {
        let message = format!("Error #{code}: {}", error_message(code, args));
        log::debug!("throwing {}: {message}", kind.class_name());
        match self.new_error(kind, &message, code) {
            Ok(object) => VmError::Script(Atom::Object(object)),
            Err(err) => err,
        }
    }

    /// Whether `value` is an instance of `Error` or a subclass.
    pub(crate) fn is_error(&self, value: &Atom) -> bool {
        self.is_type(value, self.builtins.error(ErrorKind::Error))
    }

    /// Host-facing description of an error that left the VM. `None` for
    /// cancellation, which is not an error of the script.
    pub fn describe_uncaught(&mut self, error: &VmError) -> Option<UncaughtError> {
        Some(match error {
            VmError::Cancelled => return None,
            VmError::Script(value) => self.describe_thrown(value),
            VmError::Verify { code, message } => UncaughtError {
                class_name: ErrorKind::VerifyError.class_name().to_owned(),
                error_id: Some(*code),
                message: format!("Error #{code}: {message}"),
            },
            VmError::ResourceExhausted { code, message } => UncaughtError {
                class_name: match code {
                    1502 => ErrorKind::ScriptTimeoutError,
                    1023 => ErrorKind::RangeError,
                    _ => ErrorKind::Error,
                }
                .class_name()
                .to_owned(),
                error_id: Some(*code),
                message: format!("Error #{code}: {message}"),
            },
            VmError::Internal(message) => UncaughtError {
                class_name: ErrorKind::Error.class_name().to_owned(),
                error_id: None,
                message: message.clone(),
            },
        })
    }

    fn describe_thrown(&mut self, value: &Atom) -> UncaughtError {
        if let (true, Atom::Object(object)) = (self.is_error(value), value) {
            let (message, name, id) = {
                let error = object.borrow();
                let read = |slot| error.slot(slot).cloned().unwrap_or_default();
                (read(MESSAGE_SLOT), read(NAME_SLOT), read(ERROR_ID_SLOT))
            };
            let text = |atom: Atom| match atom {
                Atom::String(id) => self.strings.get(id).to_string(),
                _ => String::new(),
            };
            let class_name = match text(name) {
                name if name.is_empty() => self.class_name_of(value),
                name => name,
            };
            return UncaughtError {
                class_name,
                error_id: match id {
                    Atom::Int(0) => None,
                    Atom::Int(id) => Some(id as u32),
                    _ => None,
                },
                message: text(message),
            };
        }
        // A thrown non-error value: report its string form, without
        // letting a failing toString replace the original error.
        let message = match value {
            Atom::Object(_) => self.describe_value(value),
            _ => value.primitive_to_string(&self.strings),
        };
        UncaughtError {
            class_name: self.class_name_of(value),
            error_id: None,
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VmSettings;

    fn vm() -> Vm {
        Vm::new(VmSettings::default()).expect("vm")
    }

    #[test]
    fn thrown_errors_carry_code_and_name() {
        let mut vm = vm();
        let err = vm.throw(ErrorKind::TypeError, 1009, &[]);
        let VmError::Script(value) = &err else {
            panic!("expected a script error, got {err:?}");
        };
        assert!(vm.is_error(value));
        let described = vm.describe_uncaught(&err).expect("described");
        assert_eq!(described.class_name, "TypeError");
        assert_eq!(described.error_id, Some(1009));
        assert_eq!(
            described.message,
            "Error #1009: Cannot access a property or method of a null object reference."
        );
    }

    #[test]
    fn error_to_string_joins_name_and_message() {
        let mut vm = vm();
        let error = vm
            .new_error(ErrorKind::RangeError, "out of range", 0)
            .expect("error");
        let text = error_to_string(&mut vm, &Atom::Object(error), &[]).expect("toString");
        assert_eq!(vm.to_rust_string(&text).expect("string"), "RangeError: out of range");
    }

    #[test]
    fn resource_errors_are_described_by_code() {
        let mut vm = vm();
        let timeout = vm
            .describe_uncaught(&VmError::exhausted(1502))
            .expect("described");
        assert_eq!(timeout.class_name, "ScriptTimeoutError");
        let overflow = vm
            .describe_uncaught(&VmError::exhausted(1023))
            .expect("described");
        assert_eq!(overflow.class_name, "RangeError");
        assert_eq!(overflow.error_id, Some(1023));
        assert!(vm.describe_uncaught(&VmError::Cancelled).is_none());
    }

    #[test]
    fn thrown_primitives_report_their_value() {
        let mut vm = vm();
        let described = vm
            .describe_uncaught(&VmError::Script(Atom::Int(42)))
            .expect("described");
        assert_eq!(described.class_name, "int");
        assert_eq!(described.message, "42");
        assert_eq!(described.error_id, None);
    }
}
