// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Scope-qualified names of entries.

use std::borrow::Cow;
use std::fmt;

use smallvec::SmallVec;

use crate::names::{
    Tag, DW_TAG_class_type, DW_TAG_namespace, DW_TAG_structure_type, DW_TAG_union_type,
};
use crate::Entry;

/// Tags of entries that open a named scope.
///
/// Only ancestors with one of these tags contribute a segment to the
/// qualified name of their descendants.
pub const SCOPE_TAGS: [Tag; 4] = [
    DW_TAG_structure_type,
    DW_TAG_class_type,
    DW_TAG_union_type,
    DW_TAG_namespace,
];

/// Checks whether entries with the given tag open a named scope.
pub fn is_scope(tag: Tag) -> bool {
    SCOPE_TAGS.contains(&tag)
}

/// Qualified name of an entry: scope names, outermost first, followed by the
/// name of the entry itself.
///
/// Formatting with [`fmt::Display`] joins the segments with `::`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScopedName<'img>(SmallVec<[Cow<'img, str>; 4]>);

impl<'img> ScopedName<'img> {
    /// All segments, outermost scope first.
    pub fn segments(&self) -> &[Cow<'img, str>] {
        &self.0
    }

    /// Name of the entry itself.
    pub fn leaf(&self) -> &str {
        self.0.last().map_or("", |x| &**x)
    }

    /// Names of the enclosing scopes, outermost first.
    pub fn scopes(&self) -> &[Cow<'img, str>] {
        &self.0[..self.0.len().saturating_sub(1)]
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no segments. Never true for names produced by
    /// [`Entry::full_name`].
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Copy the segments into owned strings.
    pub fn to_strings(&self) -> Vec<String> {
        self.0.iter().map(|x| x.to_string()).collect()
    }

    /// Join the segments with the given separator.
    pub fn join(&self, sep: &str) -> String {
        self.0.join(sep)
    }
}

impl fmt::Display for ScopedName<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            if i != 0 {
                f.write_str("::")?;
            }
            f.write_str(segment)?;
        }
        Ok(())
    }
}

/// Hashable `(tag, qualified name)` key of an entry.
///
/// Entries describing the same type in different units (or images) share the
/// same key, which makes it suitable for deduplication.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryKey {
    /// Tag of the entry.
    pub tag: Tag,
    /// Qualified name segments of the entry.
    pub name: Vec<String>,
}

impl<'img> Entry<'img> {
    /// Compute the scope-qualified name of this entry.
    ///
    /// The entry's own name is always included. Ancestors only contribute a
    /// segment if their tag is in [`SCOPE_TAGS`]: functions, lexical blocks
    /// and units are skipped.
    pub fn full_name(&self) -> ScopedName<'img> {
        let mut segments: SmallVec<[Cow<'img, str>; 4]> = SmallVec::new();
        segments.push(self.name());

        let mut cur = self.parent();
        while let Some(scope) = cur {
            if is_scope(scope.tag()) {
                segments.push(scope.name());
            }
            cur = scope.parent();
        }

        segments.reverse();
        ScopedName(segments)
    }

    /// `(tag, qualified name)` key of this entry.
    pub fn key(&self) -> EntryKey {
        EntryKey {
            tag: self.tag(),
            name: self.full_name().to_strings(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ImageBuilder;
    use crate::names::*;
    use crate::tests::testdata;
    use crate::DebugImage;
    use std::collections::HashSet;

    #[test]
    fn anonymous_struct_in_namespace() {
        let mut builder = ImageBuilder::new("anon.so");
        let cu = builder.compile_unit(0x0, 0xb, "anon.cpp");
        let ns = builder.child(cu, 0x10, DW_TAG_namespace);
        builder.name(ns, "N");
        builder.child(ns, 0x20, DW_TAG_structure_type);
        let image = builder.build().unwrap();

        let anon = image.entry_by_offset(0x20).unwrap();
        let name = anon.full_name();
        assert_eq!(name.to_strings(), ["N", "anon_32"]);
        assert_eq!(name.leaf(), "anon_32");
        assert_eq!(name.scopes(), ["N"]);
        assert_eq!(name.to_string(), "N::anon_32");
    }

    #[test]
    fn nested_scopes() {
        let image = DebugImage::load(testdata("scopes-dwarf4")).unwrap();

        // N::Inner::Widget::Payload::i
        let i = image.entry_by_offset(0x18d).unwrap();
        assert_eq!(i.tag(), DW_TAG_member);
        let name = i.full_name();
        assert_eq!(name.to_strings(), ["N", "Inner", "Widget", "Payload", "i"]);
        assert_eq!(name.join("."), "N.Inner.Widget.Payload.i");

        // The anonymous struct in `N` is named after its offset.
        let anon = image.entry_by_offset(0x147).unwrap();
        assert_eq!(anon.full_name().to_string(), "N::anon_327");
        let anon_field = image.entry_by_offset(0x150).unwrap();
        assert_eq!(anon_field.full_name().to_string(), "N::anon_327::anon_field");

        // Subprograms don't open a scope: `arg` is a parameter of `N::counter`
        // whose definition lives at the unit level.
        let arg = image.entry_by_offset(0x35d).unwrap();
        assert_eq!(arg.tag(), DW_TAG_formal_parameter);
        assert_eq!(arg.full_name().to_strings(), ["arg"]);

        let local = image.entry_by_offset(0x36c).unwrap();
        assert_eq!(local.full_name().to_strings(), ["local"]);

        // Top-level entries are just their own name.
        let root = image.units().next().unwrap();
        assert_eq!(root.full_name().to_strings(), ["decl.cpp"]);
    }

    #[test]
    fn full_name_ends_with_name() {
        let image = DebugImage::load(testdata("scopes-dwarf5")).unwrap();

        let mut stack: Vec<_> = image.units().collect();
        while let Some(entry) = stack.pop() {
            stack.extend(entry.children());

            let name = entry.full_name();
            assert_eq!(name.leaf(), entry.name());

            let mut scopes = Vec::new();
            let mut cur = entry.parent();
            while let Some(parent) = cur {
                if is_scope(parent.tag()) {
                    scopes.push(parent.name().into_owned());
                }
                cur = parent.parent();
            }
            scopes.reverse();
            assert_eq!(name.scopes(), &scopes[..]);
        }
    }

    #[test]
    fn anonymous_names_are_distinct() {
        for fixture in ["scopes-dwarf4", "scopes-dwarf5"] {
            let image = DebugImage::load(testdata(fixture)).unwrap();

            let mut seen = HashSet::new();
            let mut stack: Vec<_> = image.units().collect();
            while let Some(entry) = stack.pop() {
                stack.extend(entry.children());

                if entry.local_name().is_none() {
                    let name = entry.name().into_owned();
                    assert!(seen.insert(name.clone()), "{fixture}: {name} assigned twice");
                }
            }

            // Pointer and const types, the anonymous struct, the unnamed
            // parameter of `N::counter` and the out-of-line definitions.
            assert_eq!(seen.len(), 10, "{fixture}");
            assert!(seen.iter().all(|x| x.starts_with("anon_")));
        }
    }

    #[test]
    fn keys_deduplicate_across_units() {
        let image = DebugImage::load(testdata("scopes-dwarf4")).unwrap();

        // `N::S` is declared in decl.cpp and defined in defn.cpp.
        let decl = image.entry_by_offset(0x5d).unwrap();
        let defn = image.entry_by_offset(0x130).unwrap();
        assert_ne!(decl, defn);
        assert_eq!(decl.key(), defn.key());
        assert_eq!(
            defn.key(),
            EntryKey {
                tag: DW_TAG_structure_type,
                name: vec!["N".into(), "S".into()],
            }
        );

        // Same name, different tag.
        let ns = image.entry_by_offset(0x126).unwrap();
        let keys: HashSet<_> = [decl.key(), defn.key(), ns.key()].into_iter().collect();
        assert_eq!(keys.len(), 2);
    }
}
