// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Access to the debug sections of memory-mapped object files.
//!
//! The [`object`] library does the heavy lifting of parsing the container
//! format. This module adds what the DWARF layer needs on top of it:
//! decompression of compressed debug sections, relocation of debug sections in
//! relocatable objects and parsing of the `.gnu_debugaltlink` section.

use std::io::Read as _;
use std::{fmt, fs, io, ops, path};

use flate2::read::ZlibDecoder;
use memmap2::{Mmap, MmapMut};
use object::{CompressionFormat, Object as _, ObjectSection as _, ObjectSymbol as _};
use zstd::stream::read::Decoder as ZstdDecoder;

use crate::AnyError;

/// Length of a GNU build ID.
const BUILD_ID_LEN: usize = 20;

/// Maximum size of the path stored in a GNU debug alt link.
const MAX_DEBUG_LINK_LENGTH: usize = 4096;

/// Decompressed sections at least this large are spilled into an anonymous
/// temporary file instead of being kept on the heap.
const SWAP_THRESH: usize = 16 * 1024 * 1024;

/// Result type shorthand.
pub type Result<T = (), E = Error> = std::result::Result<T, E>;

/// Errors that can occur while reading object files.
#[non_exhaustive]
#[allow(missing_docs)]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("GNU alt link section is malformed")]
    MalformedGnuAltLink,

    #[error("Sections are compressed in an unsupported format")]
    UnsupportedCompressionFormat,

    #[error("Section uses an unsupported relocation {0}")]
    UnsupportedReloc(&'static str),

    #[error("Relocation offset {0:#x} is out of bounds for the section")]
    OutOfBoundsRelocOffset(u64),

    #[error("Relocation references a symbol or section that doesn't exist")]
    BadRelocTarget,

    #[error("Section is too big to be loaded")]
    SectionTooBig,

    #[error("IO error")]
    IO(#[from] io::Error),

    #[error(transparent)]
    Other(AnyError),
}

/// Conversion of [`object`] errors into ours, with type erasure.
impl From<object::Error> for Error {
    fn from(e: object::Error) -> Self {
        Self::Other(Box::new(e))
    }
}

/// Object file mapped into memory.
///
/// Keeps the mapping alive for as long as any [`ObjectReader`] or
/// [`DebugSection`] borrows from it.
pub struct MappedFile(Mmap);

impl MappedFile {
    /// Map the file at the given path into memory.
    pub fn open(path: &path::Path) -> Result<Self> {
        let file = fs::File::open(path)?;
        Ok(Self(unsafe { Mmap::map(&file)? }))
    }

    /// Parse the container headers and create a reader.
    pub fn parse(&self) -> Result<ObjectReader<'_>> {
        Ok(ObjectReader(object::File::parse(&self.0[..])?))
    }
}

/// Read access to the sections of a parsed object file.
///
/// Created via [`MappedFile::parse`].
pub struct ObjectReader<'obj>(object::File<'obj>);

impl<'obj> ObjectReader<'obj> {
    /// Checks whether this file has little-endian byte-order.
    pub fn is_little_endian(&self) -> bool {
        self.0.is_little_endian()
    }

    /// Whether this is a relocatable object (`ET_REL` for ELF).
    pub fn is_relocatable(&self) -> bool {
        self.0.kind() == object::ObjectKind::Relocatable
    }

    /// Loads the section with the given name, decompressing it if needed.
    pub fn section(&self, name: &[u8]) -> Result<Option<DebugSection<'obj>>> {
        let Some(sec) = self.0.section_by_name_bytes(name) else {
            return Ok(None);
        };

        DebugSection::from_obj_section(&sec).map(Some)
    }

    /// Like [`Self::section`], but also applies the relocations recorded for
    /// the section.
    ///
    /// Relocations are only applied for relocatable objects: executables and
    /// shared libraries sometimes ship relocations for their debug sections
    /// that would relocate already-final addresses a second time.
    pub fn debug_section(&self, name: &[u8]) -> Result<Option<DebugSection<'obj>>> {
        let Some(sec) = self.0.section_by_name_bytes(name) else {
            return Ok(None);
        };

        let mut section = DebugSection::from_obj_section(&sec)?;
        if !self.is_relocatable() || sec.relocations().next().is_none() {
            return Ok(Some(section));
        }

        let base = section.addr;
        let data = section.data.make_mut()?;
        for (offset, reloc) in sec.relocations() {
            self.apply_reloc(data, base, offset, &reloc)?;
        }

        Ok(Some(section))
    }

    /// Patches the section bytes at `offset` with the relocated value.
    fn apply_reloc(
        &self,
        data: &mut [u8],
        base: u64,
        offset: u64,
        reloc: &object::Relocation,
    ) -> Result {
        if reloc.encoding() != object::RelocationEncoding::Generic {
            return Err(Error::UnsupportedReloc("encoding"));
        }

        // Place being relocated (`P` in the psABI formulas).
        let place = match reloc.kind() {
            object::RelocationKind::Absolute => 0,
            object::RelocationKind::Relative => base.wrapping_add(offset),
            _ => return Err(Error::UnsupportedReloc("kind")),
        };

        // Value of the referenced symbol (`S`).
        let symbol = match reloc.target() {
            object::RelocationTarget::Absolute => 0,
            object::RelocationTarget::Symbol(idx) => self
                .0
                .symbol_by_index(idx)
                .map_err(|_| Error::BadRelocTarget)?
                .address(),
            object::RelocationTarget::Section(idx) => self
                .0
                .section_by_index(idx)
                .map_err(|_| Error::BadRelocTarget)?
                .address(),
            _ => return Err(Error::UnsupportedReloc("target")),
        };

        let width = match reloc.size() {
            32 => 4,
            64 => 8,
            _ => return Err(Error::UnsupportedReloc("size")),
        };

        let start = usize::try_from(offset).map_err(|_| Error::OutOfBoundsRelocOffset(offset))?;
        let Some(slot) = data.get_mut(start..start.saturating_add(width)) else {
            return Err(Error::OutOfBoundsRelocOffset(offset));
        };

        // REL-style relocations keep their addend in the patched bytes.
        let implicit = if !reloc.has_implicit_addend() {
            0
        } else if width == 4 {
            u64::from(u32::from_le_bytes([slot[0], slot[1], slot[2], slot[3]]))
        } else {
            let mut raw = [0; 8];
            raw.copy_from_slice(slot);
            u64::from_le_bytes(raw)
        };

        let value = implicit
            .wrapping_add(symbol)
            .wrapping_add_signed(reloc.addend())
            .wrapping_sub(place);

        if width == 4 {
            slot.copy_from_slice(&(value as u32).to_le_bytes());
        } else {
            slot.copy_from_slice(&value.to_le_bytes());
        }

        Ok(())
    }

    /// Read the contents of the `.gnu_debugaltlink` section, if present.
    pub fn gnu_debug_alt_link(&self) -> Result<Option<GnuDebugAltLink>> {
        let Some(sec) = self.section(b".gnu_debugaltlink")? else {
            return Ok(None);
        };

        GnuDebugAltLink::parse(&sec).map(Some)
    }
}

/// Raw bytes of an object file section.
#[derive(Debug)]
pub struct DebugSection<'obj> {
    addr: u64,
    data: SectionData<'obj>,
}

impl<'obj> DebugSection<'obj> {
    fn from_obj_section(sec: &object::Section<'obj, '_>) -> Result<Self> {
        Ok(Self {
            addr: sec.address(),
            data: SectionData::load(sec)?,
        })
    }

    /// Tells where the section bytes are kept.
    pub fn storage(&self) -> Storage {
        match self.data {
            SectionData::Borrowed(_) => Storage::Mapped,
            SectionData::InMemory(_) => Storage::Heap,
            SectionData::Swapped(_) => Storage::TempFile,
        }
    }
}

/// Allow using sections where slices are expected.
impl ops::Deref for DebugSection<'_> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        match &self.data {
            SectionData::Borrowed(x) => x,
            SectionData::InMemory(x) => &x[..],
            SectionData::Swapped(x) => &x[..],
        }
    }
}

/// Where the bytes of a [`DebugSection`] live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Storage {
    /// Borrowed straight from the file mapping.
    Mapped,
    /// Decompressed or copied into a heap buffer.
    Heap,
    /// Decompressed into a memory-mapped temporary file.
    TempFile,
}

/// Storage for object file sections.
enum SectionData<'obj> {
    Borrowed(&'obj [u8]),
    InMemory(Vec<u8>),
    Swapped(MmapMut),
}

impl<'obj> SectionData<'obj> {
    /// Load the data of the given section, decompressing it if required.
    fn load(sec: &object::Section<'obj, '_>) -> Result<Self> {
        let compressed = sec.compressed_data()?;
        let size: usize = compressed
            .uncompressed_size
            .try_into()
            .map_err(|_| Error::SectionTooBig)?;

        let decoder: Box<dyn io::Read> = match compressed.format {
            CompressionFormat::None => return Ok(Self::Borrowed(compressed.data)),
            CompressionFormat::Zlib => Box::new(ZlibDecoder::new(compressed.data)),
            CompressionFormat::Zstandard => Box::new(ZstdDecoder::new(compressed.data)?),
            _ => return Err(Error::UnsupportedCompressionFormat),
        };

        Self::read(size, decoder.take(size as u64), SWAP_THRESH)
    }

    /// Reads `size` bytes into the heap, or into a temporary file if there
    /// are at least `swap_thresh` of them.
    fn read(size: usize, mut reader: impl io::Read, swap_thresh: usize) -> Result<Self> {
        if size < swap_thresh {
            let mut buf = Vec::with_capacity(size);
            reader.read_to_end(&mut buf)?;
            return Ok(Self::InMemory(buf));
        }

        let mut file = tempfile::tempfile()?;
        io::copy(&mut reader, &mut file)?;
        Ok(Self::Swapped(unsafe { MmapMut::map_mut(&file)? }))
    }

    /// Mutable access to the section bytes, copying borrowed data first.
    fn make_mut(&mut self) -> Result<&mut [u8]> {
        if let Self::Borrowed(x) = *self {
            *self = Self::read(x.len(), x, SWAP_THRESH)?;
        }

        Ok(match self {
            Self::InMemory(x) => &mut x[..],
            Self::Swapped(x) => &mut x[..],
            Self::Borrowed(_) => unreachable!("borrowed data was copied above"),
        })
    }
}

impl fmt::Debug for SectionData<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (storage, len) = match self {
            Self::Borrowed(x) => ("borrowed", x.len()),
            Self::InMemory(x) => ("in-memory", x.len()),
            Self::Swapped(x) => ("mmapped", x.len()),
        };

        write!(f, "SectionData([{len} bytes, {storage}])")
    }
}

/// Represents a GNU build ID.
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct GnuBuildId(pub [u8; BUILD_ID_LEN]);

impl fmt::Debug for GnuBuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex: String = self.0.iter().map(|x| format!("{x:02X}")).collect();
        f.debug_tuple("GnuBuildId").field(&hex).finish()
    }
}

/// Parsed contents of the `.gnu_debugaltlink` section.
///
/// Points at the supplementary debug file that `dwz` moved shared entries and
/// strings into.
#[derive(Debug, Clone)]
pub struct GnuDebugAltLink {
    /// Relative or absolute path to the supplementary debug file.
    ///
    /// May contain non UTF-8 characters, hence represented as raw bytes.
    pub path: Vec<u8>,

    /// GNU build ID of the supplementary debug file.
    pub build_id: GnuBuildId,
}

impl GnuDebugAltLink {
    fn parse(sec: &[u8]) -> Result<Self> {
        let end = sec
            .iter()
            .position(|&x| x == 0)
            .filter(|&end| end <= MAX_DEBUG_LINK_LENGTH)
            .ok_or(Error::MalformedGnuAltLink)?;

        let build_id = sec[end + 1..]
            .try_into()
            .map_err(|_| Error::MalformedGnuAltLink)?;

        Ok(Self {
            path: sec[..end].to_owned(),
            build_id: GnuBuildId(build_id),
        })
    }
}
