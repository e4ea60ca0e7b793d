// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

pub mod attr;
pub mod builder;
pub mod cache;
pub mod dbglog;
pub mod definition;
pub mod entry;
pub mod image;
pub mod lookup;
pub mod names;
pub mod objfile;
pub mod scope;

pub use attr::{Attribute, UnsupportedForm, Value};
pub use cache::{open_image, ImageCache};
pub use definition::resolve_definition;
pub use entry::Entry;
pub use image::{CompileUnit, DebugImage, Lang, LoadError, LoadErrorKind, RawValue};
pub use lookup::{Kind, Query, Resolution};
pub use names::{AttrName, Form, Tag};
pub use scope::{EntryKey, ScopedName};

/// Type-erased error type.
///
/// We primarily use this to hand out errors from third-party libraries where
/// lifting them into distinct error variants didn't make sense because no
/// consumer cares about differentiating between different error variants.
pub type AnyError = Box<dyn std::error::Error + Send + Sync>;
