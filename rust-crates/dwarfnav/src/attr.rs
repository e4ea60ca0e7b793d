// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Decoding of attribute values.
//!
//! Attributes are stored with the form they were encoded in. [`Attribute::decode`]
//! maps each supported form family onto one [`Value`] variant and degrades to
//! [`Value::Absent`] (with a warning) for everything else: producers vary
//! across toolchains and callers must keep working on debug data that uses
//! forms we don't know about yet.

#![allow(non_upper_case_globals)]

use std::fmt;

use crate::image::{AttrData, RawValue};
use crate::names::*;
use crate::{warning, Entry};

/// Error returned by [`Attribute::try_decode`] for forms without a decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("unsupported form {form} for attribute {attr}")]
pub struct UnsupportedForm {
    /// The form that we can't decode.
    pub form: Form,

    /// The attribute that was encoded with it.
    pub attr: AttrName,
}

/// Decoded attribute value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value<'img> {
    /// Address, unsigned constant or index.
    Unsigned(u64),

    /// Signed constant.
    Signed(i64),

    /// String.
    Text(&'img str),

    /// Reference to another entry.
    Entry(Entry<'img>),

    /// Flag.
    Bool(bool),

    /// Attribute is missing or couldn't be decoded.
    Absent,
}

impl<'img> Value<'img> {
    /// Whether this is [`Value::Absent`].
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    /// Integer value, if it is representable as `u64`.
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Self::Unsigned(x) => Some(x),
            Self::Signed(x) => x.try_into().ok(),
            _ => None,
        }
    }

    /// Integer value, if it is representable as `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Self::Signed(x) => Some(x),
            Self::Unsigned(x) => x.try_into().ok(),
            _ => None,
        }
    }

    /// String value.
    pub fn as_str(&self) -> Option<&'img str> {
        match *self {
            Self::Text(x) => Some(x),
            _ => None,
        }
    }

    /// Referenced entry.
    pub fn as_entry(&self) -> Option<Entry<'img>> {
        match *self {
            Self::Entry(x) => Some(x),
            _ => None,
        }
    }

    /// Flag value.
    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Self::Bool(x) => Some(x),
            _ => None,
        }
    }
}

impl fmt::Display for Value<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsigned(x) => write!(f, "{x:#x}"),
            Self::Signed(x) => write!(f, "{x}"),
            Self::Text(x) => write!(f, "{x:?}"),
            Self::Entry(x) => write!(f, "<{:#x}>", x.offset()),
            Self::Bool(x) => write!(f, "{x}"),
            Self::Absent => f.write_str("<absent>"),
        }
    }
}

/// Attribute lookup result on an [`Entry`].
///
/// Created via [`Entry::attribute`]. Exists regardless of whether the entry
/// carries the attribute: see [`Self::is_valid`].
#[derive(Clone, Copy)]
pub struct Attribute<'img> {
    entry: Entry<'img>,
    name: AttrName,
    data: Option<&'img AttrData>,
}

impl fmt::Debug for Attribute<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.data {
            Some(data) => write!(f, "Attribute({}, {}, {:?})", self.name, data.form, data.payload),
            None => write!(f, "Attribute({}, <missing>)", self.name),
        }
    }
}

impl<'img> Attribute<'img> {
    pub(crate) fn new(entry: Entry<'img>, name: AttrName, data: Option<&'img AttrData>) -> Self {
        Self { entry, name, data }
    }

    /// Entry that this attribute was looked up on.
    pub fn entry(&self) -> Entry<'img> {
        self.entry
    }

    /// Name of the attribute.
    pub fn name(&self) -> AttrName {
        self.name
    }

    /// Whether the entry actually carries this attribute.
    pub fn is_valid(&self) -> bool {
        self.data.is_some()
    }

    /// Encoding form, if the attribute is present.
    pub fn form(&self) -> Option<Form> {
        self.data.map(|x| x.form)
    }

    /// Payload as stored in the image, if the attribute is present.
    pub fn raw(&self) -> Option<&'img RawValue> {
        self.data.map(|x| &x.payload)
    }

    /// Text of a string attribute, regardless of the string form used.
    pub fn as_str(&self) -> Option<&'img str> {
        match self.raw()? {
            RawValue::Text(x) => Some(&**x),
            _ => None,
        }
    }

    /// Decode the attribute, degrading to [`Value::Absent`] on unsupported
    /// forms.
    ///
    /// Unsupported forms are reported as a warning naming the form, the
    /// attribute and the entry.
    pub fn decode(&self) -> Value<'img> {
        match self.try_decode() {
            Ok(value) => value,
            Err(e) => {
                warning!("{e} on entry {:#x}", self.entry.offset());
                Value::Absent
            }
        }
    }

    /// Decode the attribute, failing on unsupported forms.
    ///
    /// Missing attributes decode to [`Value::Absent`]. So do payloads that
    /// can't be resolved, like references to entries that don't exist: these
    /// emit a warning but aren't considered errors.
    pub fn try_decode(&self) -> Result<Value<'img>, UnsupportedForm> {
        let Some(data) = self.data else {
            return Ok(Value::Absent);
        };

        let value = match (data.form, &data.payload) {
            (
                DW_FORM_addr | DW_FORM_data1 | DW_FORM_data2 | DW_FORM_data4 | DW_FORM_udata
                | DW_FORM_addrx | DW_FORM_addrx1 | DW_FORM_addrx2 | DW_FORM_addrx3
                | DW_FORM_addrx4 | DW_FORM_GNU_addr_index,
                RawValue::Const(x),
            ) => Value::Unsigned(*x),

            (
                DW_FORM_sdata | DW_FORM_data8 | DW_FORM_implicit_const,
                RawValue::Const(x),
            ) => Value::Signed(*x as i64),

            (
                DW_FORM_string | DW_FORM_strp | DW_FORM_GNU_strp_alt | DW_FORM_strp_sup
                | DW_FORM_line_strp | DW_FORM_strx | DW_FORM_strx1 | DW_FORM_strx2
                | DW_FORM_strx3 | DW_FORM_strx4 | DW_FORM_GNU_str_index,
                RawValue::Text(x),
            ) => Value::Text(x),

            (
                DW_FORM_ref1 | DW_FORM_ref2 | DW_FORM_ref4 | DW_FORM_ref8 | DW_FORM_ref_udata
                | DW_FORM_ref_addr,
                &RawValue::Ref(target),
            ) => self.resolve_ref(self.entry.image().entry_by_offset(target), target),

            (
                DW_FORM_GNU_ref_alt | DW_FORM_ref_sup4 | DW_FORM_ref_sup8,
                &RawValue::SupRef(target),
            ) => {
                let sup = self.entry.image().supplementary();
                self.resolve_ref(sup.and_then(|x| x.entry_by_offset(target)), target)
            }

            (DW_FORM_flag_present, _) => Value::Bool(true),
            (DW_FORM_flag, RawValue::Const(x)) => Value::Bool(*x != 0),

            // Known form whose payload couldn't be resolved while loading,
            // e.g. alternate strings without a supplementary file.
            (form, RawValue::Opaque) if Self::is_decodable(form) => {
                warning!(
                    "unresolved {} value for attribute {} on entry {:#x}",
                    form,
                    self.name,
                    self.entry.offset()
                );
                Value::Absent
            }

            (form, _) => {
                return Err(UnsupportedForm {
                    form,
                    attr: self.name,
                })
            }
        };

        Ok(value)
    }

    fn resolve_ref(&self, target: Option<Entry<'img>>, offset: u64) -> Value<'img> {
        match target {
            Some(entry) => Value::Entry(entry),
            None => {
                warning!(
                    "attribute {} on entry {:#x} references missing entry {:#x}",
                    self.name,
                    self.entry.offset(),
                    offset
                );
                Value::Absent
            }
        }
    }

    fn is_decodable(form: Form) -> bool {
        matches!(
            form,
            DW_FORM_GNU_strp_alt
                | DW_FORM_strp_sup
                | DW_FORM_strx
                | DW_FORM_strx1
                | DW_FORM_strx2
                | DW_FORM_strx3
                | DW_FORM_strx4
                | DW_FORM_GNU_str_index
                | DW_FORM_addrx
                | DW_FORM_addrx1
                | DW_FORM_addrx2
                | DW_FORM_addrx3
                | DW_FORM_addrx4
                | DW_FORM_GNU_addr_index
                | DW_FORM_GNU_ref_alt
                | DW_FORM_ref_sup4
                | DW_FORM_ref_sup8
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ImageBuilder;
    use crate::dbglog::warning_count;
    use crate::tests::testdata;
    use crate::DebugImage;

    #[test]
    fn dwarf4_forms() {
        let image = DebugImage::load(testdata("scopes-dwarf4")).unwrap();

        // 0x0000028b:   DW_TAG_variable
        //                 DW_AT_name      ("s_def")
        //                 DW_AT_decl_line (39)           <- DW_FORM_data1
        //                 DW_AT_type      (0x00000130)   <- DW_FORM_ref4
        //                 DW_AT_external  (true)         <- DW_FORM_flag_present
        //                 DW_AT_location  (DW_OP_addr)   <- DW_FORM_exprloc
        let s_def = image.entry_by_offset(0x28b).unwrap();
        assert_eq!(s_def.attribute(DW_AT_name).decode(), Value::Text("s_def"));
        assert_eq!(s_def.attribute(DW_AT_decl_line).decode(), Value::Unsigned(39));
        assert_eq!(s_def.attribute(DW_AT_external).decode(), Value::Bool(true));
        assert_eq!(s_def.attribute(DW_AT_external).form(), Some(DW_FORM_flag_present));

        let ty = s_def.attribute(DW_AT_type);
        assert_eq!(ty.form(), Some(DW_FORM_ref4));
        let ty = ty.decode().as_entry().unwrap();
        assert_eq!(ty.offset(), 0x130);
        assert_eq!(ty.local_name(), Some("S"));

        // 0x00000328:   DW_TAG_subprogram
        //                 DW_AT_name      ("main")
        //                 DW_AT_low_pc    (0x1153)       <- DW_FORM_addr
        //                 DW_AT_high_pc   (0x14)         <- DW_FORM_data8
        let main = image.entry_by_offset(0x328).unwrap();
        assert_eq!(main.attribute(DW_AT_low_pc).decode(), Value::Unsigned(0x1153));
        assert_eq!(main.attribute(DW_AT_high_pc).decode(), Value::Signed(0x14));
        assert_eq!(main.attribute(DW_AT_high_pc).form(), Some(DW_FORM_data8));

        // Enumerators: DW_AT_const_value is DW_FORM_data1.
        let green = image.entry_by_offset(0x1d7).unwrap();
        assert_eq!(green.local_name(), Some("Green"));
        assert_eq!(green.attribute(DW_AT_const_value).decode().as_u64(), Some(5));

        // The definition of `N::counter` points back at its declaration.
        let counter = image.entry_by_offset(0x346).unwrap();
        let spec = counter.attribute(DW_AT_specification).decode();
        assert_eq!(spec.as_entry().map(|x| x.offset()), Some(0x1f0));
    }

    #[test]
    fn dwarf5_forms() {
        let image = DebugImage::load(testdata("scopes-dwarf5")).unwrap();
        let root = image.units().next().unwrap();
        assert_eq!(root.attribute(DW_AT_name).form(), Some(DW_FORM_line_strp));
        assert_eq!(root.attribute(DW_AT_name).decode(), Value::Text("decl.cpp"));

        // `DW_AT_decl_file` is shared via `DW_FORM_implicit_const` by many
        // abbreviations in GCC's DWARF 5 output.
        let mut found = 0;
        let mut stack: Vec<_> = image.units().collect();
        while let Some(entry) = stack.pop() {
            stack.extend(entry.children());
            let attr = entry.attribute(DW_AT_decl_file);
            if attr.form() == Some(DW_FORM_implicit_const) {
                assert_eq!(attr.decode(), Value::Signed(1));
                found += 1;
            }
        }
        assert!(found > 0);
    }

    #[test]
    fn missing_attribute_is_absent() {
        let image = DebugImage::load(testdata("scopes-dwarf4")).unwrap();
        let s = image.entry_by_offset(0x130).unwrap();

        let decl = s.attribute(DW_AT_declaration);
        assert!(!decl.is_valid());
        assert_eq!(decl.form(), None);
        assert_eq!(decl.try_decode(), Ok(Value::Absent));
        assert_eq!(decl.decode(), Value::Absent);
    }

    #[test]
    fn unsupported_form_is_absent() {
        let image = DebugImage::load(testdata("scopes-dwarf4")).unwrap();
        let s_def = image.entry_by_offset(0x28b).unwrap();
        let location = s_def.attribute(DW_AT_location);
        assert!(location.is_valid());

        assert_eq!(
            location.try_decode(),
            Err(UnsupportedForm {
                form: DW_FORM_exprloc,
                attr: DW_AT_location,
            })
        );

        let before = warning_count();
        assert_eq!(location.decode(), Value::Absent);
        assert!(warning_count() > before);
    }

    #[test]
    fn synthetic_forms() {
        let mut builder = ImageBuilder::new("forms.so");
        let cu = builder.compile_unit(0x0, 0xb, "forms.c");
        let var = builder.child(cu, 0x20, DW_TAG_variable);
        builder
            .attr(var, DW_AT_const_value, DW_FORM_sdata, RawValue::Const(-3i64 as u64))
            .attr(var, DW_AT_declaration, DW_FORM_flag, RawValue::Const(1))
            .attr(var, DW_AT_type, DW_FORM_ref_addr, RawValue::Ref(0x999))
            .attr(var, DW_AT_bit_size, DW_FORM_data16, RawValue::Opaque)
            .attr(var, DW_AT_specification, DW_FORM_GNU_ref_alt, RawValue::SupRef(0x10))
            .attr(var, DW_AT_linkage_name, DW_FORM_GNU_strp_alt, RawValue::Opaque)
            .attr(var, AttrName(0x3fff), Form(0x7777), RawValue::Const(0));
        let image = builder.build().unwrap();
        let var = image.entry_by_offset(0x20).unwrap();

        assert_eq!(var.attribute(DW_AT_const_value).decode(), Value::Signed(-3));
        assert_eq!(var.attribute(DW_AT_const_value).decode().as_u64(), None);
        assert_eq!(var.attribute(DW_AT_const_value).decode().as_i64(), Some(-3));
        assert_eq!(var.attribute(DW_AT_const_value).decode().as_bool(), None);
        assert_eq!(var.attribute(DW_AT_declaration).decode(), Value::Bool(true));
        assert_eq!(var.attribute(DW_AT_declaration).decode().as_bool(), Some(true));
        assert!(!var.attribute(DW_AT_declaration).decode().is_absent());
        assert!(var.is_declaration());

        assert_eq!(Value::Unsigned(u64::MAX).as_i64(), None);
        assert_eq!(Value::Unsigned(7).as_i64(), Some(7));
        assert!(var.attribute(DW_AT_byte_size).decode().is_absent());

        let before = warning_count();

        // Dangling reference.
        assert_eq!(var.attribute(DW_AT_type).try_decode(), Ok(Value::Absent));

        // Alternate reference and string without a supplementary image.
        assert_eq!(var.attribute(DW_AT_specification).try_decode(), Ok(Value::Absent));
        assert_eq!(var.attribute(DW_AT_linkage_name).try_decode(), Ok(Value::Absent));
        assert_eq!(var.attribute(DW_AT_linkage_name).as_str(), None);

        assert!(warning_count() >= before + 3);

        let err = var.attribute(DW_AT_bit_size).try_decode().unwrap_err();
        assert_eq!(err.form, DW_FORM_data16);

        let unknown = var.attribute(AttrName(0x3fff));
        assert_eq!(
            unknown.try_decode().unwrap_err().to_string(),
            "unsupported form 0x7777 for attribute 0x3fff"
        );
        assert_eq!(unknown.decode(), Value::Absent);
    }

    #[test]
    fn supplementary_refs() {
        let mut sup = ImageBuilder::new("common.debug");
        let cu = sup.compile_unit(0x0, 0xb, "<artificial>");
        let int = sup.child(cu, 0x10, DW_TAG_base_type);
        sup.name(int, "int");
        let sup = sup.build().unwrap();

        let mut builder = ImageBuilder::new("main.so");
        let cu = builder.compile_unit(0x0, 0xb, "main.c");
        let var = builder.child(cu, 0x10, DW_TAG_variable);
        builder
            .attr(var, DW_AT_type, DW_FORM_GNU_ref_alt, RawValue::SupRef(0x10))
            .attr(var, DW_AT_name, DW_FORM_GNU_strp_alt, RawValue::Text("shared".into()))
            .supplementary(sup);
        let image = builder.build().unwrap();

        let var = image.entry_by_offset(0x10).unwrap();
        assert_eq!(var.name(), "shared");

        let ty = var.attribute(DW_AT_type).decode().as_entry().unwrap();
        assert_eq!(ty.local_name(), Some("int"));
        assert_eq!(ty.source_file(), std::path::Path::new("common.debug"));

        // Identity ignores which image an entry lives in.
        assert_eq!(ty.offset(), var.offset());
        assert_eq!(ty, var);
    }

    #[test]
    fn display() {
        assert_eq!(Value::Unsigned(0x20).to_string(), "0x20");
        assert_eq!(Value::Signed(-1).to_string(), "-1");
        assert_eq!(Value::Text("x").to_string(), "\"x\"");
        assert_eq!(Value::Absent.to_string(), "<absent>");
    }
}
