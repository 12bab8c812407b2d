//! Value and object model: atoms, interned strings, namespaces and
//! multinames, trait layouts, classes, scope chains and heap objects.

mod atom;
mod class;
mod lookup;
mod name;
pub mod number;
mod object;
mod ops;
mod scope;
mod strings;
mod traits;

pub use atom::{Atom, AtomKind};
pub use class::{ClassDef, ClassFlags, ClassId, InstanceKind};
pub use lookup::{Access, Lookup, check_write, has_property, resolve, resolve_declared};
pub use name::{Multiname, MultinameFlags, Namespace, NamespaceKind, NsSet, QName};
pub use number::{number_to_string, parse_array_index, string_to_number};
pub use object::{
    CloneError, DynamicProp, EnumKey, FunctionObject, ObjectKind, ObjectRef, PropertyError,
    ScriptObject,
};
pub use scope::{Scope, ScopeChain};
pub use strings::{StringId, StringTable};
pub use traits::{
    BoundTrait, Layout, MethodBinding, MethodId, MethodOwner, SlotType, TraitError, TraitKind,
};

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use heap::{Heap, HeapSettings};
    use proptest::prelude::*;

    use super::*;

    fn plain_class(id: u32, name: StringId, layout: Layout, flags: ClassFlags) -> Arc<ClassDef> {
        Arc::new(ClassDef {
            id: ClassId(id),
            name: QName::public(name),
            super_class: None,
            interfaces: Vec::new(),
            flags,
            protected_ns: None,
            instance_layout: Arc::new(layout),
            static_layout: Arc::new(Layout::new()),
            instance_init: None,
            class_init: None,
            instance_kind: InstanceKind::Plain,
        })
    }

    fn heap() -> Heap<ScriptObject> {
        Heap::new(HeapSettings::default()).unwrap()
    }

    // ── Atoms ─────────────────────────────────────────────────────────

    #[test]
    fn number_normalizes_to_int() {
        assert!(matches!(Atom::from_number(3.0), Atom::Int(3)));
        assert!(matches!(Atom::from_number(3.5), Atom::Number(_)));
        assert!(matches!(Atom::from_number(-0.0), Atom::Number(_)));
        assert!(matches!(Atom::from_number(f64::NAN), Atom::Number(_)));
    }

    #[test]
    fn add_concatenates_when_either_side_is_string() {
        let strings = StringTable::new();
        let a = Atom::from_string(strings.intern("a"));
        let sum = a.add(&Atom::Int(1), &strings);
        let id = sum.as_string().unwrap();
        assert_eq!(&*strings.get(id), "a1");
        assert!(matches!(Atom::Int(2).add(&Atom::Int(3), &strings), Atom::Int(5)));
    }

    #[test]
    fn int_overflow_promotes_to_number() {
        let strings = StringTable::new();
        let sum = Atom::Int(i32::MAX).add(&Atom::Int(1), &strings);
        assert_eq!(sum.as_f64(), Some(i32::MAX as f64 + 1.0));
    }

    #[test]
    fn nullish_equality() {
        let strings = StringTable::new();
        assert!(Atom::Null.loose_equals(&Atom::Undefined, &strings));
        assert!(!Atom::Null.strict_equals(&Atom::Undefined));
        let one = Atom::from_string(strings.intern("1"));
        assert!(one.loose_equals(&Atom::Int(1), &strings));
        assert!(Atom::Int(1).strict_equals(&Atom::Number(1.0)));
    }

    // ── Namespaces ────────────────────────────────────────────────────

    #[test]
    fn private_namespaces_compare_by_identity() {
        let strings = StringTable::new();
        let uri = strings.intern("Foo");
        let a = Namespace::private(uri, 1);
        let b = Namespace::private(uri, 2);
        assert_ne!(a, b);
        assert_eq!(a, Namespace::private(uri, 1));
        assert_eq!(Namespace::package(uri), Namespace::new(NamespaceKind::Namespace, uri));
        assert_ne!(Namespace::package(uri), Namespace::internal(uri));
    }

    // ── Resolution ────────────────────────────────────────────────────

    #[test]
    fn wildcard_namespace_finds_dynamic_and_declared() {
        let strings = StringTable::new();
        let heap = heap();
        let x = strings.intern("x");
        let y = strings.intern("y");
        let pkg = Namespace::package(strings.intern("pkg"));

        let mut layout = Layout::new();
        layout
            .declare_slot(QName::new(pkg, x), TraitKind::Slot, SlotType::Any, 0, Atom::Int(7))
            .unwrap();
        let class = plain_class(1, strings.intern("C"), layout, ClassFlags::empty());
        let obj = heap.alloc(ScriptObject::instance(class, None, ObjectKind::Plain));
        obj.borrow_mut().set_dynamic(y, Atom::Int(8)).unwrap();

        match resolve(&obj, &Multiname::any_ns(x), Access::Get, &strings) {
            Lookup::Trait { binding: BoundTrait::Slot { index: 0, .. }, .. } => {}
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            resolve(&obj, &Multiname::any_ns(y), Access::Get, &strings),
            Lookup::Dynamic { .. }
        ));
        assert!(!has_property(&obj, &Multiname::public(x), &strings));
    }

    #[test]
    fn prototype_chain_is_read_only() {
        let strings = StringTable::new();
        let heap = heap();
        let name = strings.intern("shared");
        let class = plain_class(1, strings.intern("Object"), Layout::new(), ClassFlags::empty());

        let proto = heap.alloc(ScriptObject::instance(class.clone(), None, ObjectKind::Plain));
        proto.borrow_mut().set_dynamic(name, Atom::Int(1)).unwrap();
        let obj = heap.alloc(ScriptObject::instance(class, Some(proto.clone()), ObjectKind::Plain));

        match resolve(&obj, &Multiname::public(name), Access::Get, &strings) {
            Lookup::Dynamic { holder, .. } => assert!(holder == proto),
            other => panic!("unexpected {other:?}"),
        }
        assert!(!resolve(&obj, &Multiname::public(name), Access::Set, &strings).is_found());
    }

    #[test]
    fn setter_only_accessor_is_invisible_to_reads() {
        let strings = StringTable::new();
        let heap = heap();
        let x = strings.intern("x");
        let mut layout = Layout::new();
        let setter = MethodBinding::new(MethodId::Native(0), MethodOwner::Free);
        layout.declare_accessor(QName::public(x), None, Some(setter)).unwrap();
        let class = plain_class(1, strings.intern("C"), layout, ClassFlags::SEALED);
        let obj = heap.alloc(ScriptObject::instance(class, None, ObjectKind::Plain));

        assert!(!resolve(&obj, &Multiname::public(x), Access::Get, &strings).is_found());
        assert!(resolve(&obj, &Multiname::public(x), Access::Set, &strings).is_found());
    }

    #[test]
    fn array_elements_resolve_by_index_name() {
        let strings = StringTable::new();
        let heap = heap();
        let class = plain_class(1, strings.intern("Array"), Layout::new(), ClassFlags::empty());
        let items = vec![Atom::Int(1), Atom::Invalid, Atom::Int(3)];
        let obj = heap.alloc(ScriptObject::instance(class, None, ObjectKind::Array(items)));

        let two = Multiname::public(strings.intern("2"));
        assert!(matches!(
            resolve(&obj, &two, Access::Get, &strings),
            Lookup::Element { index: 2, .. }
        ));
        let hole = Multiname::public(strings.intern("1"));
        assert!(!resolve(&obj, &hole, Access::Get, &strings).is_found());
        assert!(resolve(&obj, &hole, Access::Set, &strings).is_found());
    }

    #[test]
    fn proxy_cycles_terminate() {
        let strings = StringTable::new();
        let heap = heap();
        let class = plain_class(1, strings.intern("P"), Layout::new(), ClassFlags::empty());
        let target = heap.alloc(ScriptObject::instance(class.clone(), None, ObjectKind::Plain));
        let a = heap.alloc(ScriptObject::instance(
            class.clone(),
            None,
            ObjectKind::Proxy(target.clone()),
        ));
        let b = heap.alloc(ScriptObject::instance(class, None, ObjectKind::Proxy(a.clone())));
        a.borrow_mut().kind = ObjectKind::Proxy(b.clone());

        let missing = Multiname::public(strings.intern("missing"));
        assert!(!resolve(&a, &missing, Access::Get, &strings).is_found());

        a.borrow_mut().kind = ObjectKind::Plain;
        drop((a, b, target));
    }

    #[test]
    fn const_traits_accept_only_initialization() {
        let strings = StringTable::new();
        let name = QName::public(strings.intern("LIMIT"));
        let constant = BoundTrait::Slot {
            index: 0,
            kind: TraitKind::Const,
            ty: SlotType::Int,
        };
        assert_eq!(
            check_write(&constant, &name, false),
            Err(PropertyError::ConstWrite { name: name.name })
        );
        assert!(check_write(&constant, &name, true).is_ok());

        let method = BoundTrait::Method(MethodBinding::new(MethodId::Native(0), MethodOwner::Free));
        assert_eq!(
            check_write(&method, &name, true),
            Err(PropertyError::MethodWrite { name: name.name })
        );
    }

    // ── Objects ───────────────────────────────────────────────────────

    #[test]
    fn sealed_objects_reject_new_properties() {
        let strings = StringTable::new();
        let class = plain_class(1, strings.intern("S"), Layout::new(), ClassFlags::SEALED);
        let mut obj = ScriptObject::instance(class, None, ObjectKind::Plain);
        let name = strings.intern("extra");
        assert_eq!(
            obj.set_dynamic(name, Atom::Int(1)),
            Err(PropertyError::Sealed { name })
        );
        obj.define_hidden(name, Atom::Int(1));
        assert!(obj.has_dynamic(name));
        assert!(!obj.is_enumerable(name));
    }

    #[test]
    fn enumeration_visits_elements_then_properties() {
        let strings = StringTable::new();
        let class = plain_class(1, strings.intern("A"), Layout::new(), ClassFlags::empty());
        let items = vec![Atom::Int(1), Atom::Invalid, Atom::Int(3)];
        let mut obj = ScriptObject::instance(class, None, ObjectKind::Array(items));
        let a = strings.intern("a");
        let hidden = strings.intern("hidden");
        let b = strings.intern("b");
        obj.set_dynamic(a, Atom::Int(10)).unwrap();
        obj.define_hidden(hidden, Atom::Int(0));
        obj.set_dynamic(b, Atom::Int(20)).unwrap();

        let mut keys = Vec::new();
        let mut index = obj.next_enumerable(0);
        while index != 0 {
            keys.push(obj.key_at(index).unwrap());
            index = obj.next_enumerable(index);
        }
        assert_eq!(
            keys,
            vec![
                EnumKey::Index(0),
                EnumKey::Index(2),
                EnumKey::Name(a),
                EnumKey::Name(b)
            ]
        );
        assert!(matches!(obj.value_at(5), Atom::Int(20)));
    }

    #[test]
    fn delete_keeps_insertion_order() {
        let strings = StringTable::new();
        let class = plain_class(1, strings.intern("O"), Layout::new(), ClassFlags::empty());
        let mut obj = ScriptObject::instance(class, None, ObjectKind::Plain);
        let names: Vec<_> = ["p", "q", "r"].iter().map(|n| strings.intern(n)).collect();
        for (i, name) in names.iter().enumerate() {
            obj.set_dynamic(*name, Atom::Int(i as i32)).unwrap();
        }
        assert!(obj.delete_dynamic(names[1]));
        assert!(!obj.delete_dynamic(names[1]));
        let order: Vec<_> = obj.dynamic.keys().copied().collect();
        assert_eq!(order, vec![names[0], names[2]]);
    }

    #[test]
    fn clone_instance_rejects_shared_references() {
        let strings = StringTable::new();
        let heap = heap();
        let class = plain_class(1, strings.intern("V"), Layout::new(), ClassFlags::empty());
        let mut original = ScriptObject::instance(class.clone(), None, ObjectKind::Plain);
        let x = strings.intern("x");
        original.set_dynamic(x, Atom::Int(4)).unwrap();

        let mut copy = original.clone_instance().unwrap();
        copy.set_dynamic(x, Atom::Int(5)).unwrap();
        assert!(matches!(original.get_dynamic(x), Some(Atom::Int(4))));

        let other = heap.alloc(ScriptObject::instance(class, None, ObjectKind::Plain));
        original.set_dynamic(x, Atom::Object(other)).unwrap();
        assert_eq!(
            original.clone_instance().unwrap_err(),
            CloneError::SharedProperty { name: x }
        );
    }

    // ── Laws ──────────────────────────────────────────────────────────

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(500))]

        #[test]
        fn int_arithmetic_matches_f64(a in any::<i32>(), b in any::<i32>()) {
            let strings = StringTable::new();
            let (x, y) = (Atom::Int(a), Atom::Int(b));
            prop_assert_eq!(x.add(&y, &strings).as_f64(), Some(a as f64 + b as f64));
            prop_assert_eq!(x.subtract(&y, &strings).as_f64(), Some(a as f64 - b as f64));
            prop_assert_eq!(x.multiply(&y, &strings).as_f64(), Some(a as f64 * b as f64));
        }

        #[test]
        fn from_number_round_trips(n in any::<f64>()) {
            let atom = Atom::from_number(n);
            let back = atom.as_f64().unwrap();
            prop_assert!(back == n || (back.is_nan() && n.is_nan()));
        }

        #[test]
        fn nan_is_never_equal_to_itself(bits in any::<u64>()) {
            let n = f64::from_bits(bits | 0x7ff8_0000_0000_0000);
            let atom = Atom::Number(n);
            prop_assert!(!atom.strict_equals(&atom));
        }

        #[test]
        fn int32_conversion_is_modular(n in any::<i64>()) {
            let strings = StringTable::new();
            let atom = Atom::Number(n as f64);
            let expected = (n as f64) as i64 as i32;
            if (n as f64).abs() < 9.0e15 {
                prop_assert_eq!(atom.to_int32(&strings), expected);
            }
        }

        #[test]
        fn number_strings_parse_back(n in -1.0e12f64..1.0e12) {
            let text = number_to_string(n);
            prop_assert_eq!(string_to_number(&text), n);
        }
    }
}
