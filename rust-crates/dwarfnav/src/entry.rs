// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Handles to individual debug entries.

use std::borrow::Cow;
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::{fmt, slice};

use crate::attr::{Attribute, Value};
use crate::image::{AttrData, CompileUnit, DebugImage, EntryData};
use crate::names::{AttrName, Tag, DW_AT_declaration, DW_AT_name};

/// Debug information entry (DIE) within a [`DebugImage`].
///
/// Cheap to copy: this is a pair of indices plus a reference to the image.
///
/// Identity is the pair `(unit_offset, offset)`. Equality, ordering and
/// hashing all consider only that pair, so entries of the main image and of
/// its supplementary image can compare equal if their offsets collide.
#[derive(Clone, Copy)]
pub struct Entry<'img> {
    image: &'img DebugImage,
    unit: u32,
    idx: u32,
}

impl<'img> Entry<'img> {
    pub(crate) fn new(image: &'img DebugImage, unit: u32, idx: u32) -> Self {
        Self { image, unit, idx }
    }

    fn data(&self) -> &'img EntryData {
        &self.image.units[self.unit as usize].entries[self.idx as usize]
    }

    pub(crate) fn attr_data(&self, name: AttrName) -> Option<&'img AttrData> {
        self.data().attrs.iter().find(|x| x.name == name)
    }

    /// Image that this entry belongs to.
    pub fn image(&self) -> &'img DebugImage {
        self.image
    }

    /// Kind of the entry.
    pub fn tag(&self) -> Tag {
        self.data().tag
    }

    /// Absolute offset of the entry in `.debug_info`.
    pub fn offset(&self) -> u64 {
        self.data().offset
    }

    /// Offset of the header of the unit containing this entry.
    pub fn unit_offset(&self) -> u64 {
        self.unit().offset()
    }

    /// Unit containing this entry.
    pub fn unit(&self) -> CompileUnit<'img> {
        CompileUnit::new(self.image, self.unit)
    }

    /// Offset of the parent entry, `0` for top-level entries.
    pub fn parent_offset(&self) -> u64 {
        self.parent().map_or(0, |x| x.offset())
    }

    /// Parent entry, `None` for top-level entries.
    pub fn parent(&self) -> Option<Entry<'img>> {
        let parent = self.data().parent?;
        Some(Self::new(self.image, self.unit, parent))
    }

    /// Whether this is the top-level entry of its unit.
    pub fn is_top_level(&self) -> bool {
        self.data().parent.is_none()
    }

    /// Look up an attribute by name.
    ///
    /// Always returns an [`Attribute`]: use [`Attribute::is_valid`] to check
    /// whether the entry actually carries it.
    pub fn attribute(&self, name: AttrName) -> Attribute<'img> {
        Attribute::new(*self, name, self.attr_data(name))
    }

    /// Iterate over all attributes present on the entry, in encoding order.
    pub fn attributes(&self) -> impl ExactSizeIterator<Item = Attribute<'img>> + 'img {
        let this = *self;
        self.data()
            .attrs
            .iter()
            .map(move |x| Attribute::new(this, x.name, Some(x)))
    }

    /// Iterate over the direct children of this entry, in declaration order.
    ///
    /// Each call starts a fresh traversal.
    pub fn children(&self) -> Children<'img> {
        Children {
            image: self.image,
            unit: self.unit,
            iter: self.data().children.iter(),
        }
    }

    /// Whether the entry has any children.
    pub fn has_children(&self) -> bool {
        !self.data().children.is_empty()
    }

    /// Name of the entry, without any scope qualification.
    ///
    /// Anonymous entries get the placeholder `anon_<offset>`, with the
    /// offset in decimal.
    pub fn name(&self) -> Cow<'img, str> {
        match self.local_name() {
            Some(name) => Cow::Borrowed(name),
            None => Cow::Owned(format!("anon_{}", self.offset())),
        }
    }

    /// Value of `DW_AT_name`, if present and a string.
    pub fn local_name(&self) -> Option<&'img str> {
        self.attribute(DW_AT_name).as_str()
    }

    /// Whether the entry is marked with `DW_AT_declaration`.
    pub fn is_declaration(&self) -> bool {
        matches!(
            self.attribute(DW_AT_declaration).try_decode(),
            Ok(Value::Bool(true))
        )
    }

    /// Path of the object file this entry was loaded from.
    pub fn source_file(&self) -> &'img Path {
        self.image.path()
    }

    fn identity(&self) -> (u64, u64) {
        (self.unit_offset(), self.offset())
    }
}

impl fmt::Debug for Entry<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entry({} @ {:#x}", self.tag(), self.offset())?;
        if let Some(name) = self.local_name() {
            write!(f, " {name:?}")?;
        }
        f.write_str(")")
    }
}

impl PartialEq for Entry<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for Entry<'_> {}

impl PartialOrd for Entry<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.identity().cmp(&other.identity())
    }
}

impl Hash for Entry<'_> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

/// Iterator over the children of an [`Entry`].
///
/// Created via [`Entry::children`].
#[derive(Clone)]
pub struct Children<'img> {
    image: &'img DebugImage,
    unit: u32,
    iter: slice::Iter<'img, u32>,
}

impl<'img> Iterator for Children<'img> {
    type Item = Entry<'img>;

    fn next(&mut self) -> Option<Self::Item> {
        let idx = *self.iter.next()?;
        Some(Entry::new(self.image, self.unit, idx))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.iter.size_hint()
    }
}

impl ExactSizeIterator for Children<'_> {}

impl fmt::Debug for Children<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.clone()).finish()
    }
}
