//! Structural decoding of the ABC binary layout.
//!
//! Only the shape of the file is checked here: lengths, kind bytes and
//! variable-length integers. Whether indices point at the right kind of
//! pool entry is decided by the loader.

use crate::DecodeError;
use crate::abc::*;
use crate::stream::ByteReader;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReadError {
    #[error("unsupported ABC version {major}.{minor}")]
    Version { major: u16, minor: u16 },
    #[error("malformed {section}: {source}")]
    Malformed {
        section: &'static str,
        #[source]
        source: DecodeError,
    },
    #[error("invalid {what} kind 0x{kind:02x} at byte {offset}")]
    BadKind {
        what: &'static str,
        kind: u8,
        offset: usize,
    },
    #[error("{0} trailing bytes after the last method body")]
    Trailing(usize),
}

/// Parse a complete ABC file.
pub fn read_abc(bytes: &[u8]) -> Result<AbcFile, ReadError> {
    let mut reader = AbcReader {
        r: ByteReader::new(bytes),
        section: "header",
    };
    reader.file(bytes.len())
}

struct AbcReader<'a> {
    r: ByteReader<'a>,
    section: &'static str,
}

impl AbcReader<'_> {
    fn wrap<T>(&self, result: Result<T, DecodeError>) -> Result<T, ReadError> {
        result.map_err(|source| ReadError::Malformed {
            section: self.section,
            source,
        })
    }

    fn u8(&mut self) -> Result<u8, ReadError> {
        let v = self.r.read_u8();
        self.wrap(v)
    }

    fn u16(&mut self) -> Result<u16, ReadError> {
        let v = self.r.read_u16();
        self.wrap(v)
    }

    fn u30(&mut self) -> Result<u32, ReadError> {
        let v = self.r.read_u30();
        self.wrap(v)
    }

    fn u32(&mut self) -> Result<u32, ReadError> {
        let v = self.r.read_u32();
        self.wrap(v)
    }

    fn s32(&mut self) -> Result<i32, ReadError> {
        let v = self.r.read_s32();
        self.wrap(v)
    }

    fn d64(&mut self) -> Result<f64, ReadError> {
        let v = self.r.read_d64();
        self.wrap(v)
    }

    fn bytes(&mut self, len: usize) -> Result<Vec<u8>, ReadError> {
        let v = self.r.read_bytes(len).map(<[u8]>::to_vec);
        self.wrap(v)
    }

    /// `count` followed by `count` items.
    fn list<T>(
        &mut self,
        mut item: impl FnMut(&mut Self) -> Result<T, ReadError>,
    ) -> Result<Vec<T>, ReadError> {
        let count = self.u30()? as usize;
        let mut items = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            items.push(item(self)?);
        }
        Ok(items)
    }

    /// Pool tables store `count - 1` entries after the implicit entry 0.
    fn pool<T>(
        &mut self,
        placeholder: T,
        mut item: impl FnMut(&mut Self) -> Result<T, ReadError>,
    ) -> Result<Vec<T>, ReadError> {
        let count = self.u30()? as usize;
        let mut items = Vec::with_capacity(count.clamp(1, 4096));
        items.push(placeholder);
        for _ in 1..count {
            items.push(item(self)?);
        }
        Ok(items)
    }

    fn file(&mut self, len: usize) -> Result<AbcFile, ReadError> {
        let minor_version = self.u16()?;
        let major_version = self.u16()?;
        if major_version != MAJOR_VERSION {
            return Err(ReadError::Version {
                major: major_version,
                minor: minor_version,
            });
        }

        let constant_pool = self.constant_pool()?;

        self.section = "method info";
        let methods = self.list(Self::method_info)?;

        self.section = "metadata";
        let metadata = self.list(Self::metadata_info)?;

        self.section = "instance info";
        let class_count = self.u30()? as usize;
        let mut instances = Vec::with_capacity(class_count.min(4096));
        for _ in 0..class_count {
            instances.push(self.instance_info()?);
        }

        self.section = "class info";
        let mut classes = Vec::with_capacity(class_count.min(4096));
        for _ in 0..class_count {
            let init = self.u30()?;
            let traits = self.traits()?;
            classes.push(ClassInfo { init, traits });
        }

        self.section = "script info";
        let scripts = self.list(|this| {
            let init = this.u30()?;
            let traits = this.traits()?;
            Ok(ScriptInfo { init, traits })
        })?;

        self.section = "method body";
        let bodies = self.list(Self::method_body)?;

        let consumed = self.r.pos();
        if consumed < len {
            return Err(ReadError::Trailing(len - consumed));
        }

        Ok(AbcFile {
            minor_version,
            major_version,
            constant_pool,
            methods,
            metadata,
            instances,
            classes,
            scripts,
            bodies,
        })
    }

    fn constant_pool(&mut self) -> Result<ConstantPool, ReadError> {
        self.section = "integer pool";
        let ints = self.pool(0, Self::s32)?;
        self.section = "uint pool";
        let uints = self.pool(0, Self::u32)?;
        self.section = "double pool";
        let doubles = self.pool(f64::NAN, Self::d64)?;
        self.section = "string pool";
        let strings = self.pool(String::new(), |this| {
            let len = this.u30()? as usize;
            let bytes = this.bytes(len)?;
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        })?;
        self.section = "namespace pool";
        let any_ns = NamespaceInfo {
            kind: NamespaceKindInfo::Namespace,
            name: 0,
        };
        let namespaces = self.pool(any_ns, Self::namespace)?;
        self.section = "namespace set pool";
        let ns_sets = self.pool(Vec::new(), |this| this.list(Self::u30))?;
        self.section = "multiname pool";
        let multinames = self.pool(MultinameInfo::ANY, Self::multiname)?;

        Ok(ConstantPool {
            ints,
            uints,
            doubles,
            strings,
            namespaces,
            ns_sets,
            multinames,
        })
    }

    fn namespace(&mut self) -> Result<NamespaceInfo, ReadError> {
        let offset = self.r.pos();
        let byte = self.u8()?;
        let kind = NamespaceKindInfo::from_byte(byte).ok_or(ReadError::BadKind {
            what: "namespace",
            kind: byte,
            offset,
        })?;
        let name = self.u30()?;
        Ok(NamespaceInfo { kind, name })
    }

    fn multiname(&mut self) -> Result<MultinameInfo, ReadError> {
        let offset = self.r.pos();
        let kind = self.u8()?;
        let attribute = matches!(
            kind,
            MultinameInfo::QNAME_A
                | MultinameInfo::RTQNAME_A
                | MultinameInfo::RTQNAME_LA
                | MultinameInfo::MULTINAME_A
                | MultinameInfo::MULTINAME_LA
        );
        Ok(match kind {
            MultinameInfo::QNAME | MultinameInfo::QNAME_A => {
                let ns = self.u30()?;
                let name = self.u30()?;
                MultinameInfo::QName {
                    ns,
                    name,
                    attribute,
                }
            }
            MultinameInfo::RTQNAME | MultinameInfo::RTQNAME_A => MultinameInfo::RtQName {
                name: self.u30()?,
                attribute,
            },
            MultinameInfo::RTQNAME_L | MultinameInfo::RTQNAME_LA => {
                MultinameInfo::RtQNameL { attribute }
            }
            MultinameInfo::MULTINAME | MultinameInfo::MULTINAME_A => {
                let name = self.u30()?;
                let ns_set = self.u30()?;
                MultinameInfo::Multiname {
                    name,
                    ns_set,
                    attribute,
                }
            }
            MultinameInfo::MULTINAME_L | MultinameInfo::MULTINAME_LA => MultinameInfo::MultinameL {
                ns_set: self.u30()?,
                attribute,
            },
            MultinameInfo::TYPENAME => {
                let base = self.u30()?;
                let params = self.list(Self::u30)?;
                MultinameInfo::TypeName { base, params }
            }
            _ => {
                return Err(ReadError::BadKind {
                    what: "multiname",
                    kind,
                    offset,
                });
            }
        })
    }

    fn method_info(&mut self) -> Result<MethodInfo, ReadError> {
        let param_count = self.u30()? as usize;
        let return_type = self.u30()?;
        let mut params = Vec::with_capacity(param_count.min(256));
        for _ in 0..param_count {
            params.push(self.u30()?);
        }
        let name = self.u30()?;
        let flags = MethodFlags::from_bits_retain(self.u8()?);

        let mut optional = Vec::new();
        if flags.contains(MethodFlags::HAS_OPTIONAL) {
            optional = self.list(|this| {
                let offset = this.r.pos();
                let index = this.u30()?;
                let kind = this.u8()?;
                ConstValue::decode(index, kind).ok_or(ReadError::BadKind {
                    what: "default value",
                    kind,
                    offset,
                })
            })?;
        }

        let mut param_names = Vec::new();
        if flags.contains(MethodFlags::HAS_PARAM_NAMES) {
            for _ in 0..param_count {
                param_names.push(self.u30()?);
            }
        }

        Ok(MethodInfo {
            params,
            return_type,
            name,
            flags,
            optional,
            param_names,
        })
    }

    fn metadata_info(&mut self) -> Result<MetadataInfo, ReadError> {
        let name = self.u30()?;
        let count = self.u30()? as usize;
        let mut keys = Vec::with_capacity(count.min(256));
        for _ in 0..count {
            keys.push(self.u30()?);
        }
        let mut items = Vec::with_capacity(keys.len());
        for key in keys {
            items.push((key, self.u30()?));
        }
        Ok(MetadataInfo { name, items })
    }

    fn traits(&mut self) -> Result<Vec<TraitInfo>, ReadError> {
        self.list(Self::trait_info)
    }

    fn trait_info(&mut self) -> Result<TraitInfo, ReadError> {
        let name = self.u30()?;
        let offset = self.r.pos();
        let tag = self.u8()?;
        let attributes = TraitAttributes::from_bits_retain(tag >> 4);
        let data = match tag & 0x0F {
            kind @ (0 | 6) => {
                let slot_id = self.u30()?;
                let type_name = self.u30()?;
                let vindex = self.u30()?;
                let value = if vindex != 0 {
                    let voffset = self.r.pos();
                    let vkind = self.u8()?;
                    Some(ConstValue::decode(vindex, vkind).ok_or(ReadError::BadKind {
                        what: "slot value",
                        kind: vkind,
                        offset: voffset,
                    })?)
                } else {
                    None
                };
                if kind == 0 {
                    TraitData::Slot {
                        slot_id,
                        type_name,
                        value,
                    }
                } else {
                    TraitData::Const {
                        slot_id,
                        type_name,
                        value,
                    }
                }
            }
            kind @ (1..=3) => {
                let disp_id = self.u30()?;
                let method = self.u30()?;
                match kind {
                    1 => TraitData::Method { disp_id, method },
                    2 => TraitData::Getter { disp_id, method },
                    _ => TraitData::Setter { disp_id, method },
                }
            }
            4 => {
                let slot_id = self.u30()?;
                let class = self.u30()?;
                TraitData::Class { slot_id, class }
            }
            5 => {
                let slot_id = self.u30()?;
                let method = self.u30()?;
                TraitData::Function { slot_id, method }
            }
            kind => {
                return Err(ReadError::BadKind {
                    what: "trait",
                    kind,
                    offset,
                });
            }
        };
        let metadata = if attributes.contains(TraitAttributes::METADATA) {
            self.list(Self::u30)?
        } else {
            Vec::new()
        };
        Ok(TraitInfo {
            name,
            data,
            attributes,
            metadata,
        })
    }

    fn instance_info(&mut self) -> Result<InstanceInfo, ReadError> {
        let name = self.u30()?;
        let super_name = self.u30()?;
        let flags = InstanceFlags::from_bits_retain(self.u8()?);
        let protected_ns = if flags.contains(InstanceFlags::PROTECTED_NS) {
            self.u30()?
        } else {
            0
        };
        let interfaces = self.list(Self::u30)?;
        let init = self.u30()?;
        let traits = self.traits()?;
        Ok(InstanceInfo {
            name,
            super_name,
            flags,
            protected_ns,
            interfaces,
            init,
            traits,
        })
    }

    fn method_body(&mut self) -> Result<MethodBody, ReadError> {
        let method = self.u30()?;
        let max_stack = self.u30()?;
        let local_count = self.u30()?;
        let init_scope_depth = self.u30()?;
        let max_scope_depth = self.u30()?;
        let code_len = self.u30()? as usize;
        let code = self.bytes(code_len)?;
        let exceptions = self.list(|this| {
            Ok(ExceptionInfo {
                from: this.u30()?,
                to: this.u30()?,
                target: this.u30()?,
                exc_type: this.u30()?,
                var_name: this.u30()?,
            })
        })?;
        let traits = self.traits()?;
        Ok(MethodBody {
            method,
            max_stack,
            local_count,
            init_scope_depth,
            max_scope_depth,
            code,
            exceptions,
            traits,
        })
    }
}
