// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Batch lookup of types, functions and variables by qualified name.
//!
//! Binding generators typically know up front which names they need. Instead
//! of computing the qualified name of every entry in an image, a [`Query`]
//! arranges the requested names into a tree of scopes and walks the entries
//! guided by that tree: the walk only descends into namespaces, structures and
//! classes that lead to a requested name and stops as soon as everything was
//! found.

use std::collections::HashMap;
use std::fmt;

use smallvec::{smallvec, SmallVec};

use crate::entry::Children;
use crate::names::{
    Tag, DW_TAG_base_type, DW_TAG_class_type, DW_TAG_enumeration_type, DW_TAG_namespace,
    DW_TAG_structure_type, DW_TAG_subprogram, DW_TAG_typedef, DW_TAG_union_type, DW_TAG_variable,
};
use crate::{debug, DebugImage, Entry};

/// Tags of entries that can satisfy a [`Kind::Type`] request.
const TYPE_TAGS: [Tag; 6] = [
    DW_TAG_structure_type,
    DW_TAG_class_type,
    DW_TAG_union_type,
    DW_TAG_enumeration_type,
    DW_TAG_typedef,
    DW_TAG_base_type,
];

/// Tags of entries that the walk descends into.
const DESCEND_TAGS: [Tag; 3] = [DW_TAG_namespace, DW_TAG_structure_type, DW_TAG_class_type];

/// Kind of entity requested from a [`Query`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Kind {
    /// Structure, class, union, enumeration, typedef or base type.
    Type,

    /// Function definition.
    Function,

    /// Variable, possibly only declared.
    Variable,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Type => "type",
            Self::Function => "function",
            Self::Variable => "variable",
        })
    }
}

/// Error returned when a name is requested twice for the same kind.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("duplicate {kind} name `{name}`")]
pub struct DuplicateName {
    /// Kind of the request.
    pub kind: Kind,

    /// The qualified name that was requested twice.
    pub name: String,
}

/// Requested names below one scope.
#[derive(Debug, Default)]
struct Scope {
    /// Leaf names in this scope, mapping to the request index per [`Kind`].
    leaves: HashMap<String, [Option<usize>; 3]>,

    /// Nested scopes that contain requested names.
    subscopes: HashMap<String, Scope>,
}

impl Scope {
    fn request(&self, kind: Kind, name: &str) -> Option<usize> {
        self.leaves.get(name)?[kind as usize]
    }
}

/// Collection of qualified names to resolve.
#[derive(Debug, Default)]
pub struct Query {
    root: Scope,
    requests: Vec<(Kind, String)>,
}

impl Query {
    /// Create an empty query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a qualified name like `N::Inner::Widget`.
    pub fn add(&mut self, kind: Kind, name: &str) -> Result<&mut Self, DuplicateName> {
        let mut scope = &mut self.root;
        let leaf = match name.rsplit_once("::") {
            Some((scopes, leaf)) => {
                for segment in scopes.split("::") {
                    scope = scope.subscopes.entry(segment.to_owned()).or_default();
                }
                leaf
            }
            None => name,
        };

        let slot = &mut scope.leaves.entry(leaf.to_owned()).or_default()[kind as usize];
        if slot.is_some() {
            return Err(DuplicateName {
                kind,
                name: name.to_owned(),
            });
        }

        *slot = Some(self.requests.len());
        self.requests.push((kind, name.to_owned()));

        Ok(self)
    }

    /// Shorthand for [`Self::add`] with [`Kind::Type`].
    pub fn add_type(&mut self, name: &str) -> Result<&mut Self, DuplicateName> {
        self.add(Kind::Type, name)
    }

    /// Shorthand for [`Self::add`] with [`Kind::Function`].
    pub fn add_function(&mut self, name: &str) -> Result<&mut Self, DuplicateName> {
        self.add(Kind::Function, name)
    }

    /// Shorthand for [`Self::add`] with [`Kind::Variable`].
    pub fn add_variable(&mut self, name: &str) -> Result<&mut Self, DuplicateName> {
        self.add(Kind::Variable, name)
    }

    /// Number of requested names.
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// Whether no names were requested.
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Search the given images, in order, for all requested names.
    ///
    /// For every name, the first matching entry wins. The walk ends early
    /// once every name was found.
    pub fn resolve<'img, I, T>(&self, images: I) -> Resolution<'_, 'img>
    where
        I: IntoIterator<Item = &'img T>,
        T: AsRef<DebugImage> + 'img,
    {
        let mut walk = Walk {
            found: vec![None; self.requests.len()],
            remaining: self.requests.len(),
        };

        'images: for image in images {
            for root in image.as_ref().units() {
                if walk.remaining == 0 {
                    break 'images;
                }
                walk.unit(root, &self.root);
            }
        }

        debug!(
            "resolved {} of {} requested names",
            self.requests.len() - walk.remaining,
            self.requests.len()
        );

        Resolution {
            requests: &self.requests,
            found: walk.found,
        }
    }
}

/// State of a running [`Query::resolve`].
struct Walk<'img> {
    found: Vec<Option<Entry<'img>>>,
    remaining: usize,
}

impl<'img> Walk<'img> {
    /// Walk one unit. The root is transparent: its children are matched
    /// against the top-level scope.
    fn unit<'q>(&mut self, root: Entry<'img>, scope: &'q Scope) {
        let mut stack: SmallVec<[(Children<'img>, &'q Scope); 8]> =
            smallvec![(root.children(), scope)];

        while let Some((children, scope)) = stack.last_mut() {
            let scope: &'q Scope = *scope;
            let Some(entry) = children.next() else {
                stack.pop();
                continue;
            };

            if let Some(nested) = self.visit(entry, scope) {
                stack.push((entry.children(), nested));
            }

            if self.remaining == 0 {
                return;
            }
        }
    }

    /// Record a match for `entry` in `scope`. Returns the nested scope to
    /// descend into, if any.
    fn visit<'q>(&mut self, entry: Entry<'img>, scope: &'q Scope) -> Option<&'q Scope> {
        let name = entry.local_name()?;
        let tag = entry.tag();

        if tag == DW_TAG_variable {
            self.record(scope, Kind::Variable, name, entry);
            return None;
        }

        if entry.is_declaration() {
            return None;
        }

        if tag == DW_TAG_subprogram {
            self.record(scope, Kind::Function, name, entry);
            return None;
        }

        if TYPE_TAGS.contains(&tag) {
            self.record(scope, Kind::Type, name, entry);
        }

        if DESCEND_TAGS.contains(&tag) {
            return scope.subscopes.get(name);
        }

        None
    }

    fn record(&mut self, scope: &Scope, kind: Kind, name: &str, entry: Entry<'img>) {
        let Some(idx) = scope.request(kind, name) else {
            return;
        };

        let slot = &mut self.found[idx];
        if slot.is_none() {
            *slot = Some(entry);
            self.remaining -= 1;
        }
    }
}

/// Result of [`Query::resolve`].
#[derive(Debug)]
pub struct Resolution<'q, 'img> {
    requests: &'q [(Kind, String)],
    found: Vec<Option<Entry<'img>>>,
}

impl<'q, 'img> Resolution<'q, 'img> {
    /// Entry found for the given request.
    pub fn get(&self, kind: Kind, name: &str) -> Option<Entry<'img>> {
        let idx = self
            .requests
            .iter()
            .position(|(k, n)| *k == kind && n == name)?;

        self.found[idx]
    }

    /// Iterate over all resolved requests.
    pub fn resolved(&self) -> impl Iterator<Item = (Kind, &'q str, Entry<'img>)> + '_ {
        self.requests
            .iter()
            .zip(&self.found)
            .filter_map(|((kind, name), entry)| Some((*kind, name.as_str(), (*entry)?)))
    }

    /// Iterate over the requests for which nothing was found.
    pub fn unresolved(&self) -> impl Iterator<Item = (Kind, &'q str)> + '_ {
        self.requests
            .iter()
            .zip(&self.found)
            .filter(|(_, entry)| entry.is_none())
            .map(|((kind, name), _)| (*kind, name.as_str()))
    }

    /// Whether every requested name was found.
    pub fn is_complete(&self) -> bool {
        self.found.iter().all(Option::is_some)
    }
}
