// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Resolution of forward declarations to their defining entries.
//!
//! A declaration like `namespace N { struct S; }` only carries the name of
//! the type. The definition can live in any other unit, so we search for an
//! entry with the same qualified name and tag that is not itself a
//! declaration. The search descends only into entries whose name matches the
//! next segment of the qualified name, keeping it close to linear in the
//! number of top-level entries.

use smallvec::{smallvec, SmallVec};

use crate::entry::Children;
use crate::names::{Tag, DW_TAG_class_type, DW_TAG_namespace, DW_TAG_structure_type};
use crate::{DebugImage, Entry};

/// Tags that the search may descend through.
///
/// Unions are missing on purpose: types nested into unions are not
/// addressable by a qualified name in C++.
const DESCEND_TAGS: [Tag; 3] = [DW_TAG_namespace, DW_TAG_structure_type, DW_TAG_class_type];

/// What to do with an entry visited during the search.
enum Step {
    Found,
    Descend,
    Skip,
}

impl DebugImage {
    /// Find the defining entry for a declaration.
    ///
    /// `decl` may belong to any image: only its tag and qualified name are
    /// used. Returns the first match in unit order and, within each unit, in
    /// declaration order. Returns `None` if no unit defines the entry.
    pub fn find_definition(&self, decl: &Entry<'_>) -> Option<Entry<'_>> {
        let name = decl.full_name();
        self.find_by_name(decl.tag(), name.segments())
    }

    /// Find the first non-declaration entry with the given tag and qualified
    /// name, e.g. `["N", "Inner", "Widget"]`.
    pub fn find_by_name<S: AsRef<str>>(&self, tag: Tag, segments: &[S]) -> Option<Entry<'_>> {
        if segments.is_empty() {
            return None;
        }

        self.units()
            .find_map(|root| search_unit(root, tag, segments))
    }
}

/// Depth-first search below a unit root.
///
/// Unit roots don't have a name and are passed through without consuming a
/// segment. The explicit stack holds the remaining children of every entry
/// on the current path along with the index of the segment they must match.
fn search_unit<'img, S: AsRef<str>>(
    root: Entry<'img>,
    tag: Tag,
    segments: &[S],
) -> Option<Entry<'img>> {
    let mut stack: SmallVec<[(Children<'img>, usize); 8]> = smallvec![(root.children(), 0)];

    loop {
        let (children, depth) = stack.last_mut()?;
        let depth = *depth;

        let Some(entry) = children.next() else {
            stack.pop();
            continue;
        };

        match step(entry, tag, segments, depth) {
            Step::Found => return Some(entry),
            Step::Descend => stack.push((entry.children(), depth + 1)),
            Step::Skip => {}
        }
    }
}

/// Match a single entry against the segment at index `depth`.
fn step<S: AsRef<str>>(entry: Entry<'_>, tag: Tag, segments: &[S], depth: usize) -> Step {
    if entry.local_name() != Some(segments[depth].as_ref()) {
        return Step::Skip;
    }

    if depth + 1 == segments.len() {
        if entry.tag() == tag && !entry.is_declaration() {
            return Step::Found;
        }
        return Step::Skip;
    }

    if DESCEND_TAGS.contains(&entry.tag()) {
        Step::Descend
    } else {
        Step::Skip
    }
}

/// Resolve an entry to its definition across several images.
///
/// Entries that aren't declarations are returned as they are. For
/// declarations, the images are searched in order and the first definition
/// found is returned.
pub fn resolve_definition<'img, I, T>(images: I, entry: Entry<'img>) -> Option<Entry<'img>>
where
    I: IntoIterator<Item = &'img T>,
    T: AsRef<DebugImage> + 'img,
{
    if !entry.is_declaration() {
        return Some(entry);
    }

    let name = entry.full_name();
    images
        .into_iter()
        .find_map(|image| image.as_ref().find_by_name(entry.tag(), name.segments()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ImageBuilder;
    use crate::names::*;
    use crate::tests::testdata;
    use std::sync::Arc;

    /// CU0: `namespace N { struct S; }`, CU1: `namespace N { struct S { int x; }; }`.
    fn split_image() -> DebugImage {
        let mut builder = ImageBuilder::new("split.so");

        let cu0 = builder.compile_unit(0x0, 0xb, "decl.cpp");
        let n0 = builder.child(cu0, 0xc, DW_TAG_namespace);
        let s_decl = builder.child(n0, 0x10, DW_TAG_structure_type);
        builder.name(n0, "N").name(s_decl, "S").declaration(s_decl);

        let cu1 = builder.compile_unit(0x30, 0x3b, "defn.cpp");
        let n1 = builder.child(cu1, 0x3c, DW_TAG_namespace);
        let s_defn = builder.child(n1, 0x40, DW_TAG_structure_type);
        let x = builder.child(s_defn, 0x48, DW_TAG_member);
        builder.name(n1, "N").name(s_defn, "S").name(x, "x");

        builder.build().unwrap()
    }

    #[test]
    fn declaration_in_other_unit() {
        let image = split_image();
        let decl = image.entry_by_offset(0x10).unwrap();
        assert!(decl.is_declaration());
        assert_eq!(decl.full_name().to_strings(), ["N", "S"]);

        let defn = image.find_definition(&decl).unwrap();
        assert_eq!(defn.unit_offset(), 0x30);
        assert_eq!(defn.offset(), 0x40);
        assert_ne!(defn, decl);
        assert_eq!(defn.tag(), decl.tag());
        assert_eq!(defn.full_name(), decl.full_name());
        assert!(!defn.is_declaration());
    }

    #[test]
    fn tag_must_match() {
        let image = split_image();
        assert!(image.find_by_name(DW_TAG_class_type, &["N", "S"]).is_none());
        assert!(image.find_by_name(DW_TAG_structure_type, &["S"]).is_none());
        assert!(image.find_by_name(DW_TAG_structure_type, &["N", "T"]).is_none());
        assert!(image.find_by_name(DW_TAG_structure_type, &[] as &[&str]).is_none());

        let ns = image.find_by_name(DW_TAG_namespace, &["N"]).unwrap();
        assert_eq!(ns.offset(), 0xc);
    }

    #[test]
    fn first_found_wins() {
        let mut builder = ImageBuilder::new("dupes.so");
        for (unit, root, def) in [(0x0, 0xb, 0x10), (0x20, 0x2b, 0x30)] {
            let cu = builder.compile_unit(unit, root, "dupe.c");
            let s = builder.child(cu, def, DW_TAG_structure_type);
            builder.name(s, "S");
        }
        let image = builder.build().unwrap();

        let found = image.find_by_name(DW_TAG_structure_type, &["S"]).unwrap();
        assert_eq!(found.offset(), 0x10);
    }

    #[test]
    fn no_descent_through_unions_or_functions() {
        let mut builder = ImageBuilder::new("nested.so");
        let cu = builder.compile_unit(0x0, 0xb, "nested.c");
        let u = builder.child(cu, 0x10, DW_TAG_union_type);
        let in_union = builder.child(u, 0x18, DW_TAG_structure_type);
        let f = builder.child(cu, 0x20, DW_TAG_subprogram);
        let in_fn = builder.child(f, 0x28, DW_TAG_structure_type);
        builder
            .name(u, "U")
            .name(in_union, "S")
            .name(f, "f")
            .name(in_fn, "S");
        let image = builder.build().unwrap();

        assert!(image.find_by_name(DW_TAG_structure_type, &["U", "S"]).is_none());
        assert!(image.find_by_name(DW_TAG_structure_type, &["f", "S"]).is_none());
        assert!(image.find_by_name(DW_TAG_structure_type, &["S"]).is_none());
        assert_eq!(
            image.find_by_name(DW_TAG_union_type, &["U"]).map(|x| x.offset()),
            Some(0x10)
        );
    }

    #[test]
    fn fixture_declarations() {
        let image = DebugImage::load(testdata("scopes-dwarf4")).unwrap();

        // decl.cpp: `namespace N { struct S; }` at 0x5d, defined in defn.cpp.
        let s_decl = image.entry_by_offset(0x5d).unwrap();
        assert!(s_decl.is_declaration());
        let s = image.find_definition(&s_decl).unwrap();
        assert_eq!((s.unit_offset(), s.offset()), (0xf9, 0x130));

        // decl.cpp: `namespace N::Inner { class Widget; }` at 0x68.
        let widget_decl = image.entry_by_offset(0x68).unwrap();
        let widget = image.find_definition(&widget_decl).unwrap();
        assert_eq!(widget.offset(), 0x176);
        assert_eq!(widget.tag(), DW_TAG_class_type);

        // decl.cpp: `struct Outer { struct Nested; ... }` at 0x3a. `Outer`
        // itself is complete in both units, so the search has to descend
        // into the first one and backtrack.
        let nested_decl = image.entry_by_offset(0x3a).unwrap();
        assert_eq!(nested_decl.full_name().to_string(), "Outer::Nested");
        let nested = image.find_definition(&nested_decl).unwrap();
        assert_eq!(nested.offset(), 0x23f);

        // A definition resolves to the first definition, which is itself here.
        assert_eq!(image.find_definition(&s), Some(s));
    }

    #[test]
    fn fixture_dwarf5() {
        let image = DebugImage::load(testdata("scopes-dwarf5")).unwrap();
        let s_decl = image.entry_by_offset(0x5d).unwrap();
        assert_eq!(image.find_definition(&s_decl).unwrap().offset(), 0x12c);

        let widget_decl = image.entry_by_offset(0x68).unwrap();
        assert_eq!(image.find_definition(&widget_decl).unwrap().offset(), 0x170);
    }

    #[test]
    fn across_images() {
        let mut builder = ImageBuilder::new("user.so");
        let cu = builder.compile_unit(0x0, 0xb, "user.cpp");
        let n = builder.child(cu, 0x10, DW_TAG_namespace);
        let s = builder.child(n, 0x18, DW_TAG_structure_type);
        builder.name(n, "N").name(s, "S").declaration(s);
        let user = Arc::new(builder.build().unwrap());

        let provider = Arc::new(split_image());
        let images = vec![user.clone(), provider.clone()];

        let decl = user.entry_by_offset(0x18).unwrap();
        let defn = resolve_definition(&images, decl).unwrap();
        assert_eq!(defn.offset(), 0x40);
        assert_eq!(defn.source_file(), std::path::Path::new("split.so"));

        // Definitions resolve to themselves.
        let defn_again = resolve_definition(&images, defn).unwrap();
        assert!(std::ptr::eq(defn_again.image(), defn.image()));
        assert_eq!(defn_again, defn);

        // Not found anywhere.
        assert!(resolve_definition(&images[..1], decl).is_none());
    }
}
