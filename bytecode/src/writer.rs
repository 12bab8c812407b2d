//! Serialisation of an [`AbcFile`] back to the binary layout read by
//! [`read_abc`](crate::read_abc).

use crate::abc::*;
use crate::stream::ByteWriter;

pub fn write_abc(file: &AbcFile) -> Vec<u8> {
    let mut w = ByteWriter::new();
    w.write_u16(file.minor_version);
    w.write_u16(file.major_version);

    let pool = &file.constant_pool;
    pool_count(&mut w, pool.ints.len());
    for &v in pool.ints.iter().skip(1) {
        w.write_s32(v);
    }
    pool_count(&mut w, pool.uints.len());
    for &v in pool.uints.iter().skip(1) {
        w.write_u32(v);
    }
    pool_count(&mut w, pool.doubles.len());
    for &v in pool.doubles.iter().skip(1) {
        w.write_d64(v);
    }
    pool_count(&mut w, pool.strings.len());
    for s in pool.strings.iter().skip(1) {
        w.write_u32(s.len() as u32);
        w.write_bytes(s.as_bytes());
    }
    pool_count(&mut w, pool.namespaces.len());
    for ns in pool.namespaces.iter().skip(1) {
        w.write_u8(ns.kind.to_byte());
        w.write_u32(ns.name);
    }
    pool_count(&mut w, pool.ns_sets.len());
    for set in pool.ns_sets.iter().skip(1) {
        w.write_u32(set.len() as u32);
        for &ns in set {
            w.write_u32(ns);
        }
    }
    pool_count(&mut w, pool.multinames.len());
    for mn in pool.multinames.iter().skip(1) {
        multiname(&mut w, mn);
    }

    w.write_u32(file.methods.len() as u32);
    for method in &file.methods {
        method_info(&mut w, method);
    }

    w.write_u32(file.metadata.len() as u32);
    for meta in &file.metadata {
        w.write_u32(meta.name);
        w.write_u32(meta.items.len() as u32);
        for &(key, _) in &meta.items {
            w.write_u32(key);
        }
        for &(_, value) in &meta.items {
            w.write_u32(value);
        }
    }

    w.write_u32(file.instances.len() as u32);
    for instance in &file.instances {
        w.write_u32(instance.name);
        w.write_u32(instance.super_name);
        w.write_u8(instance.flags.bits());
        if instance.flags.contains(InstanceFlags::PROTECTED_NS) {
            w.write_u32(instance.protected_ns);
        }
        w.write_u32(instance.interfaces.len() as u32);
        for &i in &instance.interfaces {
            w.write_u32(i);
        }
        w.write_u32(instance.init);
        traits(&mut w, &instance.traits);
    }
    for class in &file.classes {
        w.write_u32(class.init);
        traits(&mut w, &class.traits);
    }

    w.write_u32(file.scripts.len() as u32);
    for script in &file.scripts {
        w.write_u32(script.init);
        traits(&mut w, &script.traits);
    }

    w.write_u32(file.bodies.len() as u32);
    for body in &file.bodies {
        w.write_u32(body.method);
        w.write_u32(body.max_stack);
        w.write_u32(body.local_count);
        w.write_u32(body.init_scope_depth);
        w.write_u32(body.max_scope_depth);
        w.write_u32(body.code.len() as u32);
        w.write_bytes(&body.code);
        w.write_u32(body.exceptions.len() as u32);
        for e in &body.exceptions {
            w.write_u32(e.from);
            w.write_u32(e.to);
            w.write_u32(e.target);
            w.write_u32(e.exc_type);
            w.write_u32(e.var_name);
        }
        traits(&mut w, &body.traits);
    }

    w.into_bytes()
}

/// Pool tables count their implicit entry 0, except when empty.
fn pool_count(w: &mut ByteWriter, len: usize) {
    w.write_u32(if len <= 1 { 0 } else { len as u32 });
}

fn multiname(w: &mut ByteWriter, mn: &MultinameInfo) {
    match mn {
        MultinameInfo::QName {
            ns,
            name,
            attribute,
        } => {
            w.write_u8(if *attribute {
                MultinameInfo::QNAME_A
            } else {
                MultinameInfo::QNAME
            });
            w.write_u32(*ns);
            w.write_u32(*name);
        }
        MultinameInfo::RtQName { name, attribute } => {
            w.write_u8(if *attribute {
                MultinameInfo::RTQNAME_A
            } else {
                MultinameInfo::RTQNAME
            });
            w.write_u32(*name);
        }
        MultinameInfo::RtQNameL { attribute } => {
            w.write_u8(if *attribute {
                MultinameInfo::RTQNAME_LA
            } else {
                MultinameInfo::RTQNAME_L
            });
        }
        MultinameInfo::Multiname {
            name,
            ns_set,
            attribute,
        } => {
            w.write_u8(if *attribute {
                MultinameInfo::MULTINAME_A
            } else {
                MultinameInfo::MULTINAME
            });
            w.write_u32(*name);
            w.write_u32(*ns_set);
        }
        MultinameInfo::MultinameL { ns_set, attribute } => {
            w.write_u8(if *attribute {
                MultinameInfo::MULTINAME_LA
            } else {
                MultinameInfo::MULTINAME_L
            });
            w.write_u32(*ns_set);
        }
        MultinameInfo::TypeName { base, params } => {
            w.write_u8(MultinameInfo::TYPENAME);
            w.write_u32(*base);
            w.write_u32(params.len() as u32);
            for &p in params {
                w.write_u32(p);
            }
        }
    }
}

fn method_info(w: &mut ByteWriter, method: &MethodInfo) {
    let mut flags = method.flags;
    flags.set(MethodFlags::HAS_OPTIONAL, !method.optional.is_empty());
    flags.set(MethodFlags::HAS_PARAM_NAMES, !method.param_names.is_empty());

    w.write_u32(method.params.len() as u32);
    w.write_u32(method.return_type);
    for &p in &method.params {
        w.write_u32(p);
    }
    w.write_u32(method.name);
    w.write_u8(flags.bits());
    if flags.contains(MethodFlags::HAS_OPTIONAL) {
        w.write_u32(method.optional.len() as u32);
        for value in &method.optional {
            let (index, kind) = value.encode();
            w.write_u32(index);
            w.write_u8(kind);
        }
    }
    if flags.contains(MethodFlags::HAS_PARAM_NAMES) {
        for &name in &method.param_names {
            w.write_u32(name);
        }
    }
}

fn traits(w: &mut ByteWriter, traits: &[TraitInfo]) {
    w.write_u32(traits.len() as u32);
    for t in traits {
        let mut attributes = t.attributes;
        attributes.set(TraitAttributes::METADATA, !t.metadata.is_empty());
        w.write_u32(t.name);
        w.write_u8(t.data.kind_byte() | (attributes.bits() << 4));
        match &t.data {
            TraitData::Slot {
                slot_id,
                type_name,
                value,
            }
            | TraitData::Const {
                slot_id,
                type_name,
                value,
            } => {
                w.write_u32(*slot_id);
                w.write_u32(*type_name);
                match value.map(ConstValue::encode) {
                    Some((index, kind)) if index != 0 => {
                        w.write_u32(index);
                        w.write_u8(kind);
                    }
                    _ => w.write_u32(0),
                }
            }
            TraitData::Method { disp_id, method }
            | TraitData::Getter { disp_id, method }
            | TraitData::Setter { disp_id, method } => {
                w.write_u32(*disp_id);
                w.write_u32(*method);
            }
            TraitData::Class { slot_id, class } => {
                w.write_u32(*slot_id);
                w.write_u32(*class);
            }
            TraitData::Function { slot_id, method } => {
                w.write_u32(*slot_id);
                w.write_u32(*method);
            }
        }
        if !t.metadata.is_empty() {
            w.write_u32(t.metadata.len() as u32);
            for &m in &t.metadata {
                w.write_u32(m);
            }
        }
    }
}
