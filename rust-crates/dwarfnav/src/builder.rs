// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! In-memory construction of [`DebugImage`]s.
//!
//! Useful for callers that synthesize debug information and for exercising
//! the navigation layer on trees with precisely controlled offsets.
//!
//! ```
//! use dwarfnav::builder::ImageBuilder;
//! use dwarfnav::names::{DW_TAG_namespace, DW_TAG_structure_type};
//!
//! let mut builder = ImageBuilder::new("libfoo.so");
//! let cu = builder.compile_unit(0x0, 0xb, "foo.cpp");
//! let ns = builder.child(cu, 0x10, DW_TAG_namespace);
//! let s = builder.child(ns, 0x20, DW_TAG_structure_type);
//! builder.name(ns, "N").name(s, "S");
//!
//! let image = builder.build()?;
//! let s = image.entry_by_offset(0x20).unwrap();
//! assert_eq!(s.full_name().to_string(), "N::S");
//! # Ok::<(), dwarfnav::LoadError>(())
//! ```

use std::path::PathBuf;

use crate::image::{AttrData, DebugImage, EntryData, LoadError, RawValue, UnitData};
use crate::names::{
    AttrName, Form, Tag, DW_AT_declaration, DW_AT_name, DW_FORM_flag_present, DW_FORM_string,
    DW_TAG_compile_unit,
};

/// Handle to an entry created by an [`ImageBuilder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    unit: u32,
    idx: u32,
}

/// Incrementally constructs a [`DebugImage`].
///
/// Units and entries are listed in the order they are added. Offsets are
/// taken as given; [`ImageBuilder::build`] rejects images in which two
/// entries share an offset.
#[derive(Debug)]
pub struct ImageBuilder {
    path: PathBuf,
    units: Vec<UnitData>,
    sup: Option<Box<DebugImage>>,
}

impl ImageBuilder {
    /// Start an image that pretends to be loaded from `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            units: Vec::new(),
            sup: None,
        }
    }

    /// Add a `DW_TAG_compile_unit` with the given unit and root offsets and
    /// `DW_AT_name`.
    pub fn compile_unit(&mut self, unit_offset: u64, root_offset: u64, name: &str) -> NodeId {
        let root = self.unit(unit_offset, root_offset, DW_TAG_compile_unit);
        self.name(root, name);
        root
    }

    /// Add a unit whose root entry has an arbitrary tag, e.g. a
    /// `DW_TAG_partial_unit`.
    pub fn unit(&mut self, unit_offset: u64, root_offset: u64, tag: Tag) -> NodeId {
        self.units.push(UnitData {
            offset: unit_offset,
            entries: vec![EntryData {
                offset: root_offset,
                tag,
                parent: None,
                children: Vec::new(),
                attrs: Vec::new(),
            }],
        });

        NodeId {
            unit: (self.units.len() - 1) as u32,
            idx: 0,
        }
    }

    /// Append a child entry to `parent`.
    pub fn child(&mut self, parent: NodeId, offset: u64, tag: Tag) -> NodeId {
        let entries = &mut self.units[parent.unit as usize].entries;
        let idx = entries.len() as u32;

        entries.push(EntryData {
            offset,
            tag,
            parent: Some(parent.idx),
            children: Vec::new(),
            attrs: Vec::new(),
        });
        entries[parent.idx as usize].children.push(idx);

        NodeId {
            unit: parent.unit,
            idx,
        }
    }

    /// Add an attribute with an explicit form and payload.
    ///
    /// Adding an attribute that the entry already has replaces it.
    pub fn attr(
        &mut self,
        node: NodeId,
        name: AttrName,
        form: Form,
        payload: RawValue,
    ) -> &mut Self {
        let attrs = &mut self.units[node.unit as usize].entries[node.idx as usize].attrs;
        let attr = AttrData {
            name,
            form,
            payload,
        };

        match attrs.iter_mut().find(|x| x.name == name) {
            Some(existing) => *existing = attr,
            None => attrs.push(attr),
        }

        self
    }

    /// Set `DW_AT_name` as an inline string.
    pub fn name(&mut self, node: NodeId, name: &str) -> &mut Self {
        self.attr(node, DW_AT_name, DW_FORM_string, RawValue::Text(name.into()))
    }

    /// Mark the entry with `DW_AT_declaration`.
    pub fn declaration(&mut self, node: NodeId) -> &mut Self {
        self.attr(node, DW_AT_declaration, DW_FORM_flag_present, RawValue::Const(1))
    }

    /// Attach a supplementary image for alternate references.
    pub fn supplementary(&mut self, image: DebugImage) -> &mut Self {
        self.sup = Some(Box::new(image));
        self
    }

    /// Finish the image.
    pub fn build(self) -> Result<DebugImage, LoadError> {
        DebugImage::from_units(self.path.clone(), self.units, self.sup)
            .map_err(|e| e.at(&self.path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::LoadErrorKind;
    use crate::names::*;

    #[test]
    fn structure() {
        let mut builder = ImageBuilder::new("built.so");
        let cu = builder.compile_unit(0x0, 0xb, "built.c");
        let a = builder.child(cu, 0x10, DW_TAG_structure_type);
        let b = builder.child(cu, 0x20, DW_TAG_variable);
        let a_x = builder.child(a, 0x18, DW_TAG_member);
        builder.name(a, "A").name(b, "b").name(a_x, "x");
        let pu = builder.unit(0x30, 0x3b, DW_TAG_partial_unit);
        builder.child(pu, 0x40, DW_TAG_base_type);

        let image = builder.build().unwrap();
        let roots: Vec<_> = image.units().map(|x| (x.tag(), x.offset())).collect();
        assert_eq!(roots, [(DW_TAG_compile_unit, 0xb), (DW_TAG_partial_unit, 0x3b)]);

        let root = image.units().next().unwrap();
        assert_eq!(root.local_name(), Some("built.c"));
        let children: Vec<_> = root.children().map(|x| x.name().into_owned()).collect();
        assert_eq!(children, ["A", "b"]);

        // Offsets need not follow insertion order.
        let x = image.entry_by_offset(0x18).unwrap();
        assert_eq!(x.parent_offset(), 0x10);
        assert_eq!(x.full_name().to_string(), "A::x");
        assert_eq!(image.entry_count(), 6);
    }

    #[test]
    fn replaces_attributes() {
        let mut builder = ImageBuilder::new("attrs.so");
        let cu = builder.compile_unit(0x0, 0xb, "attrs.c");
        let s = builder.child(cu, 0x10, DW_TAG_structure_type);
        builder.name(s, "Old").name(s, "New");
        let image = builder.build().unwrap();

        let s = image.entry_by_offset(0x10).unwrap();
        assert_eq!(s.name(), "New");
        assert_eq!(s.attributes().len(), 1);
    }

    #[test]
    fn duplicate_offsets() {
        let mut builder = ImageBuilder::new("dupes.so");
        let cu = builder.compile_unit(0x0, 0xb, "dupes.c");
        builder.child(cu, 0x10, DW_TAG_base_type);
        builder.child(cu, 0x10, DW_TAG_base_type);

        let err = builder.build().unwrap_err();
        assert_eq!(err.path, PathBuf::from("dupes.so"));
        assert!(matches!(err.kind, LoadErrorKind::DuplicateOffset(0x10)));
        assert_eq!(
            err.to_string(),
            "failed to load debug info from `dupes.so`: more than one entry uses offset 0x10"
        );
    }
}
