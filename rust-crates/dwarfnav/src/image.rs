// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Loading of debug information into an owned, immutable arena.
//!
//! The main type here is [`DebugImage`], created via [`DebugImage::load`] or
//! synthesized with [`crate::builder::ImageBuilder`]. Loading walks every unit
//! in `.debug_info` once and copies tags, tree structure and attribute payloads
//! out of the DWARF sections. The object file can be unmapped afterwards and
//! all later navigation is plain slice indexing.

// Compiler complains about using the gimli constants in match patterns.
#![allow(non_upper_case_globals)]

use std::path::{Path, PathBuf};
use std::{fmt, io};

use fallible_iterator::FallibleIterator;
use gimli::{constants::*, AttributeValue as AV};
use smallvec::SmallVec;

use crate::names::{self, AttrName, Form, Tag};
use crate::objfile::{self, MappedFile};
use crate::{debug, AnyError, Entry};

/// Shorthand for the [`gimli`] reader type that we use everywhere.
///
/// Only little-endian inputs are supported, so we hard-code it at compile time.
type R<'dwarf> = gimli::EndianSlice<'dwarf, gimli::LittleEndian>;

/// Maximum number of units to load per object file.
const MAX_COMP_UNITS: usize = 256 * 1024;

/// Maximum nesting depth of the entry tree within a unit.
const MAX_TREE_DEPTH: usize = 64 * 1024;

/// Error returned when an image cannot be loaded.
#[derive(Debug, thiserror::Error)]
#[error("failed to load debug info from `{}`: {kind}", .path.display())]
pub struct LoadError {
    /// Path of the offending file.
    pub path: PathBuf,

    /// Why loading failed.
    #[source]
    pub kind: LoadErrorKind,
}

/// Reasons for a [`LoadError`].
#[non_exhaustive]
#[allow(missing_docs)]
#[derive(Debug, thiserror::Error)]
pub enum LoadErrorKind {
    #[error("big endian object files are not supported")]
    BigEndian,

    #[error("the input file has too many units")]
    UnitLimitExceeded,

    #[error("the entry tree is too deep")]
    TreeTooDeep,

    #[error("unit header has an invalid offset")]
    BadUnitOffset,

    #[error("more than one entry uses offset {0:#x}")]
    DuplicateOffset(u64),

    #[error("object file error: {0}")]
    Objfile(#[from] objfile::Error),

    #[error(transparent)]
    Other(AnyError),
}

/// Conversion of [`gimli`] errors into ours, with type erasure.
impl From<gimli::Error> for LoadErrorKind {
    fn from(e: gimli::Error) -> Self {
        Self::Other(Box::new(e))
    }
}

impl LoadErrorKind {
    pub(crate) fn at(self, path: &Path) -> LoadError {
        LoadError {
            path: path.to_owned(),
            kind: self,
        }
    }
}

/// Attribute payload as stored in a [`DebugImage`].
///
/// Signed constants and flags are stored as their bit pattern in
/// [`RawValue::Const`]: the encoding form of the attribute determines how
/// they are interpreted when decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawValue {
    /// Integer constant, address or flag.
    Const(u64),

    /// String, already resolved from whatever string section it lives in.
    Text(Box<str>),

    /// Absolute `.debug_info` offset of an entry in the same image.
    Ref(u64),

    /// Absolute `.debug_info` offset of an entry in the supplementary image.
    SupRef(u64),

    /// Payload that we don't keep (blocks, expressions, section offsets).
    Opaque,
}

/// Attribute of an entry, as stored in the arena.
#[derive(Debug, Clone)]
pub(crate) struct AttrData {
    pub name: AttrName,
    pub form: Form,
    pub payload: RawValue,
}

/// Entry node, as stored in the arena.
#[derive(Debug, Clone)]
pub(crate) struct EntryData {
    pub offset: u64,
    pub tag: Tag,
    pub parent: Option<u32>,
    pub children: Vec<u32>,
    pub attrs: Vec<AttrData>,
}

/// All entries of one unit in depth-first order.
#[derive(Debug, Clone)]
pub(crate) struct UnitData {
    pub offset: u64,
    pub entries: Vec<EntryData>,
}

/// Debug information of one object file.
///
/// Owns all units and entries. [`Entry`] and [`CompileUnit`] handles borrow
/// from it and can't outlive it.
pub struct DebugImage {
    path: PathBuf,
    pub(crate) units: Vec<UnitData>,

    /// `(offset, unit index, entry index)` of every entry, sorted by offset.
    index: Vec<(u64, u32, u32)>,

    sup: Option<Box<DebugImage>>,
}

impl fmt::Debug for DebugImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DebugImage")
            .field("path", &self.path)
            .field("units", &self.units.len())
            .field("entries", &self.index.len())
            .field("sup", &self.sup)
            .finish()
    }
}

impl AsRef<DebugImage> for DebugImage {
    fn as_ref(&self) -> &DebugImage {
        self
    }
}

impl DebugImage {
    /// Load the debug information of the object file at the given path.
    ///
    /// If the file names a supplementary debug file via `.gnu_debugaltlink`
    /// and that file exists, it is loaded as well and exposed through
    /// [`Self::supplementary`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let path = path.as_ref();
        load_object(path).map_err(|e| e.at(path))
    }

    /// Assemble an image from already decoded units.
    pub(crate) fn from_units(
        path: PathBuf,
        units: Vec<UnitData>,
        sup: Option<Box<DebugImage>>,
    ) -> Result<Self, LoadErrorKind> {
        let mut index = Vec::with_capacity(units.iter().map(|x| x.entries.len()).sum());
        for (unit_idx, unit) in units.iter().enumerate() {
            for (entry_idx, entry) in unit.entries.iter().enumerate() {
                index.push((entry.offset, unit_idx as u32, entry_idx as u32));
            }
        }

        index.sort_unstable_by_key(|&(offset, ..)| offset);
        if let Some(dupe) = index.windows(2).find(|x| x[0].0 == x[1].0) {
            return Err(LoadErrorKind::DuplicateOffset(dupe[0].0));
        }

        Ok(Self {
            path,
            units,
            index,
            sup,
        })
    }

    /// Path of the file this image was loaded from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Iterate over the top-level entry of every unit, in file order.
    pub fn units(&self) -> impl Iterator<Item = Entry<'_>> + '_ {
        self.compile_units().filter_map(|unit| unit.root())
    }

    /// Iterate over all units, in file order.
    pub fn compile_units(&self) -> impl ExactSizeIterator<Item = CompileUnit<'_>> + '_ {
        (0..self.units.len()).map(|idx| CompileUnit::new(self, idx as u32))
    }

    /// Supplementary image that alternate references and strings point into.
    pub fn supplementary(&self) -> Option<&DebugImage> {
        self.sup.as_deref()
    }

    /// Number of entries in this image, excluding the supplementary image.
    pub fn entry_count(&self) -> usize {
        self.index.len()
    }

    /// Look up an entry by its absolute `.debug_info` offset.
    pub fn entry_by_offset(&self, offset: u64) -> Option<Entry<'_>> {
        let pos = self
            .index
            .binary_search_by_key(&offset, |&(offset, ..)| offset)
            .ok()?;

        let (_, unit, idx) = self.index[pos];
        Some(Entry::new(self, unit, idx))
    }

    /// Look up an entry by the offset of its unit and its own offset.
    pub fn entry(&self, unit_offset: u64, offset: u64) -> Option<Entry<'_>> {
        self.entry_by_offset(offset)
            .filter(|x| x.unit_offset() == unit_offset)
    }
}

/// Programming language a unit was compiled from.
///
/// Only maps the languages that callers commonly special-case, mapping all
/// others to [`Self::Other`]. Language versions (C11, C++17, ...) are folded
/// into the base language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lang {
    /// C.
    C,

    /// C++.
    Cxx,

    /// Go.
    Go,

    /// Rust.
    Rust,

    /// Language is known but currently not mapped in this enum type.
    Other,
}

/// References a unit of a [`DebugImage`].
#[derive(Clone, Copy)]
pub struct CompileUnit<'img> {
    image: &'img DebugImage,
    idx: u32,
}

impl fmt::Debug for CompileUnit<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.name().unwrap_or("<unnamed>");
        write!(f, "Unit(\"{name}\" @ {:#08x})", self.offset())
    }
}

impl PartialEq for CompileUnit<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.image, other.image) && self.idx == other.idx
    }
}

impl Eq for CompileUnit<'_> {}

impl<'img> CompileUnit<'img> {
    pub(crate) fn new(image: &'img DebugImage, idx: u32) -> Self {
        Self { image, idx }
    }

    fn data(&self) -> &'img UnitData {
        &self.image.units[self.idx as usize]
    }

    /// Image that this unit belongs to.
    pub fn image(&self) -> &'img DebugImage {
        self.image
    }

    /// Offset of the unit header in `.debug_info`.
    pub fn offset(&self) -> u64 {
        self.data().offset
    }

    /// Top-level entry of the unit (`DW_TAG_compile_unit` or similar).
    pub fn root(&self) -> Option<Entry<'img>> {
        if self.data().entries.is_empty() {
            return None;
        }

        Some(Entry::new(self.image, self.idx, 0))
    }

    /// Name of the translation unit, typically the primary source file.
    pub fn name(&self) -> Option<&'img str> {
        self.root()?.local_name()
    }

    /// Producer (compiler) that created this unit.
    pub fn producer(&self) -> Option<&'img str> {
        self.root()?.attribute(names::DW_AT_producer).as_str()
    }

    /// Programming language this unit was compiled from.
    pub fn language(&self) -> Option<Lang> {
        let lang = self.root()?.attribute(names::DW_AT_language).decode().as_u64()?;
        let lang = gimli::DwLang(u16::try_from(lang).ok()?);

        Some(match lang {
            DW_LANG_C | DW_LANG_C89 | DW_LANG_C99 | DW_LANG_C11 | DW_LANG_C17 => Lang::C,
            DW_LANG_C_plus_plus
            | DW_LANG_C_plus_plus_03
            | DW_LANG_C_plus_plus_11
            | DW_LANG_C_plus_plus_14
            | DW_LANG_C_plus_plus_17
            | DW_LANG_C_plus_plus_20 => Lang::Cxx,
            DW_LANG_Rust => Lang::Rust,
            DW_LANG_Go => Lang::Go,
            _ => Lang::Other,
        })
    }

    /// Number of entries in this unit.
    pub fn entry_count(&self) -> usize {
        self.data().entries.len()
    }
}

/// Reads an object file and, if present, its supplementary file.
fn load_object(path: &Path) -> Result<DebugImage, LoadErrorKind> {
    let file = MappedFile::open(path)?;
    let obj = file.parse()?;
    if !obj.is_little_endian() {
        return Err(LoadErrorKind::BigEndian);
    }

    let main = gimli::DwarfSections::load(|id| obj.debug_section(id.name().as_bytes()))?;

    // Keep the supplementary mapping alive until we copied everything out.
    let sup_path = supplementary_path(path, &obj)?;
    let sup_file = match &sup_path {
        Some(sup_path) => match MappedFile::open(sup_path) {
            Ok(file) => Some(file),
            Err(objfile::Error::IO(e)) if e.kind() == io::ErrorKind::NotFound => {
                debug!(
                    "{}: supplementary file `{}` not found",
                    path.display(),
                    sup_path.display()
                );
                None
            }
            Err(e) => return Err(e.into()),
        },
        None => None,
    };

    let sup_obj = sup_file.as_ref().map(MappedFile::parse).transpose()?;
    let sup = match &sup_obj {
        Some(sup_obj) if !sup_obj.is_little_endian() => return Err(LoadErrorKind::BigEndian),
        Some(sup_obj) => Some(gimli::DwarfSections::load(|id| {
            sup_obj.debug_section(id.name().as_bytes())
        })?),
        None => None,
    };

    // Create a borrowing DWARF instance from our owned one.
    fn borrow<'a>(section: &'a Option<objfile::DebugSection<'a>>) -> R<'a> {
        let data = match section {
            Some(x) => &x[..],
            None => &[][..],
        };

        R::new(data, gimli::LittleEndian)
    }

    let mut dwarf = main.borrow(borrow);
    if let Some(sup) = &sup {
        dwarf.set_sup(sup.borrow(borrow));
    }

    let sup_image = match (dwarf.sup(), sup_path) {
        (Some(sup_dwarf), Some(sup_path)) => {
            debug!("{}: loading supplementary file", sup_path.display());
            let units = read_units(sup_dwarf)?;
            Some(Box::new(DebugImage::from_units(sup_path, units, None)?))
        }
        _ => None,
    };

    let units = read_units(&dwarf)?;
    DebugImage::from_units(path.to_owned(), units, sup_image)
}

/// Determine where the supplementary file named by the alt link lives.
///
/// Relative paths are resolved against the directory of the main file.
fn supplementary_path(
    path: &Path,
    obj: &objfile::ObjectReader<'_>,
) -> Result<Option<PathBuf>, LoadErrorKind> {
    let Some(link) = obj.gnu_debug_alt_link()? else {
        return Ok(None);
    };

    let link_path = PathBuf::from(String::from_utf8_lossy(&link.path).into_owned());
    debug!(
        "{}: alt link to `{}` ({:?})",
        path.display(),
        link_path.display(),
        link.build_id
    );

    if link_path.is_absolute() {
        return Ok(Some(link_path));
    }

    let dir = path.parent().unwrap_or(Path::new(""));
    Ok(Some(dir.join(link_path)))
}

/// Copy all units of the given DWARF file into the arena representation.
fn read_units(dwarf: &gimli::Dwarf<R<'_>>) -> Result<Vec<UnitData>, LoadErrorKind> {
    let mut unit_iter = dwarf.units().enumerate();
    let mut units = Vec::with_capacity(unit_iter.size_hint().0);

    while let Some((i, header)) = unit_iter.next()? {
        if i >= MAX_COMP_UNITS {
            return Err(LoadErrorKind::UnitLimitExceeded);
        }

        let unit = dwarf.unit(header)?;
        units.push(read_unit(dwarf, &unit)?);
    }

    Ok(units)
}

/// Copy the entry tree of a single unit.
fn read_unit(
    dwarf: &gimli::Dwarf<R<'_>>,
    unit: &gimli::Unit<R<'_>>,
) -> Result<UnitData, LoadErrorKind> {
    let Some(offset) = unit.header.offset().as_debug_info_offset() else {
        return Err(LoadErrorKind::BadUnitOffset);
    };

    let mut entries: Vec<EntryData> = Vec::new();
    let mut stack: SmallVec<[u32; 32]> = SmallVec::new();
    let mut die_iter = unit.entries();

    while let Some((depth_delta, die)) = die_iter.next_dfs()? {
        // Remove as many levels as we have left behind, plus one since we
        // always push the current element even if it doesn't have children.
        for _ in 0..1 - depth_delta {
            stack.pop();
        }

        if stack.len() >= MAX_TREE_DEPTH {
            return Err(LoadErrorKind::TreeTooDeep);
        }

        let Some(die_offset) = die.offset().to_debug_info_offset(&unit.header) else {
            return Err(LoadErrorKind::BadUnitOffset);
        };

        let idx = entries.len() as u32;
        let parent = stack.last().copied();
        if let Some(parent) = parent {
            entries[parent as usize].children.push(idx);
        }

        entries.push(EntryData {
            offset: die_offset.0 as u64,
            tag: die.tag().into(),
            parent,
            children: Vec::new(),
            attrs: read_attrs(dwarf, unit, die)?,
        });

        stack.push(idx);
    }

    Ok(UnitData {
        offset: offset.0 as u64,
        entries,
    })
}

/// Copy the attributes of an entry along with their encoding forms.
fn read_attrs(
    dwarf: &gimli::Dwarf<R<'_>>,
    unit: &gimli::Unit<R<'_>>,
    die: &gimli::DebuggingInformationEntry<'_, '_, R<'_>>,
) -> Result<Vec<AttrData>, LoadErrorKind> {
    let specs = unit
        .abbreviations
        .get(die.code())
        .map(|abbrev| abbrev.attributes())
        .unwrap_or_default();

    let mut attrs = die.attrs();
    let mut out = Vec::with_capacity(specs.len());

    while let Some(attr) = attrs.next()? {
        let raw = attr.raw_value();

        // Indirect forms are resolved by gimli: infer them from the value.
        let form = match specs.get(out.len()).map(|spec| spec.form()) {
            Some(DW_FORM_indirect) | None => implied_form(&raw),
            Some(form) => form.into(),
        };

        out.push(AttrData {
            name: attr.name().into(),
            form,
            payload: read_payload(dwarf, unit, raw),
        });
    }

    Ok(out)
}

/// Convert a raw gimli value into an arena payload.
///
/// Failures to resolve strings or addresses are not fatal: the payload is
/// kept as [`RawValue::Opaque`] and decodes to an absent value later.
fn read_payload(
    dwarf: &gimli::Dwarf<R<'_>>,
    unit: &gimli::Unit<R<'_>>,
    raw: AV<R<'_>>,
) -> RawValue {
    match raw {
        AV::Addr(x) | AV::Data8(x) | AV::Udata(x) => RawValue::Const(x),
        AV::Data1(x) => RawValue::Const(x.into()),
        AV::Data2(x) => RawValue::Const(x.into()),
        AV::Data4(x) => RawValue::Const(x.into()),
        AV::Sdata(x) => RawValue::Const(x as u64),
        AV::Flag(x) => RawValue::Const(x.into()),
        AV::DebugAddrIndex(_) => match dwarf.attr_address(unit, raw) {
            Ok(Some(addr)) => RawValue::Const(addr),
            Ok(None) => RawValue::Opaque,
            Err(e) => {
                debug!("failed to resolve address index: {e}");
                RawValue::Opaque
            }
        },
        AV::String(_)
        | AV::DebugStrRef(_)
        | AV::DebugStrRefSup(_)
        | AV::DebugLineStrRef(_)
        | AV::DebugStrOffsetsIndex(_) => match dwarf.attr_string(unit, raw) {
            Ok(s) => RawValue::Text(s.to_string_lossy().into()),
            Err(e) => {
                debug!("failed to resolve string attribute: {e}");
                RawValue::Opaque
            }
        },
        AV::UnitRef(x) => match x.to_debug_info_offset(&unit.header) {
            Some(x) => RawValue::Ref(x.0 as u64),
            None => RawValue::Opaque,
        },
        AV::DebugInfoRef(x) => RawValue::Ref(x.0 as u64),
        AV::DebugInfoRefSup(x) => RawValue::SupRef(x.0 as u64),
        _ => RawValue::Opaque,
    }
}

/// Best guess of the encoding form when the abbreviation doesn't tell.
fn implied_form(raw: &AV<R<'_>>) -> Form {
    match raw {
        AV::Addr(_) => names::DW_FORM_addr,
        AV::Data1(_) => names::DW_FORM_data1,
        AV::Data2(_) => names::DW_FORM_data2,
        AV::Data4(_) => names::DW_FORM_data4,
        AV::Data8(_) => names::DW_FORM_data8,
        AV::Sdata(_) => names::DW_FORM_sdata,
        AV::Udata(_) => names::DW_FORM_udata,
        AV::Flag(_) => names::DW_FORM_flag,
        AV::String(_) => names::DW_FORM_string,
        AV::DebugStrRef(_) => names::DW_FORM_strp,
        AV::DebugStrRefSup(_) => names::DW_FORM_GNU_strp_alt,
        AV::DebugLineStrRef(_) => names::DW_FORM_line_strp,
        AV::DebugStrOffsetsIndex(_) => names::DW_FORM_strx,
        AV::DebugAddrIndex(_) => names::DW_FORM_addrx,
        AV::UnitRef(_) => names::DW_FORM_ref_udata,
        AV::DebugInfoRef(_) => names::DW_FORM_ref_addr,
        AV::DebugInfoRefSup(_) => names::DW_FORM_GNU_ref_alt,
        AV::Exprloc(_) => names::DW_FORM_exprloc,
        AV::SecOffset(_) => names::DW_FORM_sec_offset,
        _ => names::DW_FORM_block,
    }
}
