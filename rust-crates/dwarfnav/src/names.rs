// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Symbolic DWARF tag, attribute and form identifiers.
//!
//! Each identifier is a thin newtype around the numeric code found in the
//! debug data. Codes that aren't in our tables remain representable: they are
//! simply printed as hex numbers. The constants mirror the names used in the
//! DWARF standard so that code reads like the corresponding `llvm-dwarfdump`
//! output.

#![allow(non_upper_case_globals)]

use std::{fmt, str::FromStr};

/// Error returned when parsing an unknown identifier name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} `{input}`")]
pub struct ParseNameError {
    /// Which kind of identifier was being parsed.
    pub kind: &'static str,
    /// The rejected input.
    pub input: String,
}

/// Parse a numeric code in either decimal or `0x` prefixed hex notation.
fn parse_code(s: &str) -> Option<u16> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16).ok(),
        None => s.parse().ok(),
    }
}

macro_rules! dwarf_names {
    (
        $(#[$meta:meta])*
        $ty:ident ($kind:literal, $gimli:ty) {
            $( $name:ident = $code:literal, )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $ty(pub u16);

        $(
            #[allow(missing_docs)]
            pub const $name: $ty = $ty($code);
        )*

        impl $ty {
            const KNOWN: &'static [($ty, &'static str)] = &[
                $( ($name, stringify!($name)), )*
            ];

            /// Symbolic name of this identifier, if it is known.
            pub fn name(self) -> Option<&'static str> {
                Self::KNOWN
                    .iter()
                    .find(|(x, _)| *x == self)
                    .map(|(_, name)| *name)
            }

            /// Look up an identifier by its symbolic name.
            pub fn from_name(name: &str) -> Option<Self> {
                Self::KNOWN
                    .iter()
                    .find(|(_, x)| *x == name)
                    .map(|(id, _)| *id)
            }
        }

        impl From<u16> for $ty {
            fn from(code: u16) -> Self {
                Self(code)
            }
        }

        impl From<$gimli> for $ty {
            fn from(x: $gimli) -> Self {
                Self(x.0)
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self.name() {
                    Some(name) => f.write_str(name),
                    None => write!(f, "{:#x}", self.0),
                }
            }
        }

        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(self, f)
            }
        }

        impl FromStr for $ty {
            type Err = ParseNameError;

            /// Accepts the symbolic name or the numeric code.
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::from_name(s)
                    .or_else(|| parse_code(s).map(Self))
                    .ok_or_else(|| ParseNameError {
                        kind: $kind,
                        input: s.to_owned(),
                    })
            }
        }
    };
}

dwarf_names! {
    /// Kind of a debug entry (`DW_TAG_*`).
    Tag ("tag", gimli::DwTag) {
        DW_TAG_null = 0x00,
        DW_TAG_array_type = 0x01,
        DW_TAG_class_type = 0x02,
        DW_TAG_entry_point = 0x03,
        DW_TAG_enumeration_type = 0x04,
        DW_TAG_formal_parameter = 0x05,
        DW_TAG_imported_declaration = 0x08,
        DW_TAG_label = 0x0a,
        DW_TAG_lexical_block = 0x0b,
        DW_TAG_member = 0x0d,
        DW_TAG_pointer_type = 0x0f,
        DW_TAG_reference_type = 0x10,
        DW_TAG_compile_unit = 0x11,
        DW_TAG_string_type = 0x12,
        DW_TAG_structure_type = 0x13,
        DW_TAG_subroutine_type = 0x15,
        DW_TAG_typedef = 0x16,
        DW_TAG_union_type = 0x17,
        DW_TAG_unspecified_parameters = 0x18,
        DW_TAG_variant = 0x19,
        DW_TAG_common_block = 0x1a,
        DW_TAG_common_inclusion = 0x1b,
        DW_TAG_inheritance = 0x1c,
        DW_TAG_inlined_subroutine = 0x1d,
        DW_TAG_module = 0x1e,
        DW_TAG_ptr_to_member_type = 0x1f,
        DW_TAG_set_type = 0x20,
        DW_TAG_subrange_type = 0x21,
        DW_TAG_with_stmt = 0x22,
        DW_TAG_access_declaration = 0x23,
        DW_TAG_base_type = 0x24,
        DW_TAG_catch_block = 0x25,
        DW_TAG_const_type = 0x26,
        DW_TAG_constant = 0x27,
        DW_TAG_enumerator = 0x28,
        DW_TAG_file_type = 0x29,
        DW_TAG_friend = 0x2a,
        DW_TAG_namelist = 0x2b,
        DW_TAG_namelist_item = 0x2c,
        DW_TAG_packed_type = 0x2d,
        DW_TAG_subprogram = 0x2e,
        DW_TAG_template_type_parameter = 0x2f,
        DW_TAG_template_value_parameter = 0x30,
        DW_TAG_thrown_type = 0x31,
        DW_TAG_try_block = 0x32,
        DW_TAG_variant_part = 0x33,
        DW_TAG_variable = 0x34,
        DW_TAG_volatile_type = 0x35,
        DW_TAG_dwarf_procedure = 0x36,
        DW_TAG_restrict_type = 0x37,
        DW_TAG_interface_type = 0x38,
        DW_TAG_namespace = 0x39,
        DW_TAG_imported_module = 0x3a,
        DW_TAG_unspecified_type = 0x3b,
        DW_TAG_partial_unit = 0x3c,
        DW_TAG_imported_unit = 0x3d,
        DW_TAG_condition = 0x3f,
        DW_TAG_shared_type = 0x40,
        DW_TAG_type_unit = 0x41,
        DW_TAG_rvalue_reference_type = 0x42,
        DW_TAG_template_alias = 0x43,
        DW_TAG_coarray_type = 0x44,
        DW_TAG_generic_subrange = 0x45,
        DW_TAG_dynamic_type = 0x46,
        DW_TAG_atomic_type = 0x47,
        DW_TAG_call_site = 0x48,
        DW_TAG_call_site_parameter = 0x49,
        DW_TAG_skeleton_unit = 0x4a,
        DW_TAG_immutable_type = 0x4b,
        DW_TAG_MIPS_loop = 0x4081,
        DW_TAG_format_label = 0x4101,
        DW_TAG_function_template = 0x4102,
        DW_TAG_class_template = 0x4103,
        DW_TAG_GNU_BINCL = 0x4104,
        DW_TAG_GNU_EINCL = 0x4105,
        DW_TAG_GNU_template_template_param = 0x4106,
        DW_TAG_GNU_template_parameter_pack = 0x4107,
        DW_TAG_GNU_formal_parameter_pack = 0x4108,
        DW_TAG_GNU_call_site = 0x4109,
        DW_TAG_GNU_call_site_parameter = 0x410a,
    }
}

dwarf_names! {
    /// Name of an attribute (`DW_AT_*`).
    AttrName ("attribute", gimli::DwAt) {
        DW_AT_sibling = 0x01,
        DW_AT_location = 0x02,
        DW_AT_name = 0x03,
        DW_AT_ordering = 0x09,
        DW_AT_byte_size = 0x0b,
        DW_AT_bit_offset = 0x0c,
        DW_AT_bit_size = 0x0d,
        DW_AT_stmt_list = 0x10,
        DW_AT_low_pc = 0x11,
        DW_AT_high_pc = 0x12,
        DW_AT_language = 0x13,
        DW_AT_discr = 0x15,
        DW_AT_discr_value = 0x16,
        DW_AT_visibility = 0x17,
        DW_AT_import = 0x18,
        DW_AT_string_length = 0x19,
        DW_AT_common_reference = 0x1a,
        DW_AT_comp_dir = 0x1b,
        DW_AT_const_value = 0x1c,
        DW_AT_containing_type = 0x1d,
        DW_AT_default_value = 0x1e,
        DW_AT_inline = 0x20,
        DW_AT_is_optional = 0x21,
        DW_AT_lower_bound = 0x22,
        DW_AT_producer = 0x25,
        DW_AT_prototyped = 0x27,
        DW_AT_return_addr = 0x2a,
        DW_AT_start_scope = 0x2c,
        DW_AT_bit_stride = 0x2e,
        DW_AT_upper_bound = 0x2f,
        DW_AT_abstract_origin = 0x31,
        DW_AT_accessibility = 0x32,
        DW_AT_address_class = 0x33,
        DW_AT_artificial = 0x34,
        DW_AT_base_types = 0x35,
        DW_AT_calling_convention = 0x36,
        DW_AT_count = 0x37,
        DW_AT_data_member_location = 0x38,
        DW_AT_decl_column = 0x39,
        DW_AT_decl_file = 0x3a,
        DW_AT_decl_line = 0x3b,
        DW_AT_declaration = 0x3c,
        DW_AT_discr_list = 0x3d,
        DW_AT_encoding = 0x3e,
        DW_AT_external = 0x3f,
        DW_AT_frame_base = 0x40,
        DW_AT_friend = 0x41,
        DW_AT_identifier_case = 0x42,
        DW_AT_macro_info = 0x43,
        DW_AT_namelist_item = 0x44,
        DW_AT_priority = 0x45,
        DW_AT_segment = 0x46,
        DW_AT_specification = 0x47,
        DW_AT_static_link = 0x48,
        DW_AT_type = 0x49,
        DW_AT_use_location = 0x4a,
        DW_AT_variable_parameter = 0x4b,
        DW_AT_virtuality = 0x4c,
        DW_AT_vtable_elem_location = 0x4d,
        DW_AT_allocated = 0x4e,
        DW_AT_associated = 0x4f,
        DW_AT_data_location = 0x50,
        DW_AT_byte_stride = 0x51,
        DW_AT_entry_pc = 0x52,
        DW_AT_use_UTF8 = 0x53,
        DW_AT_extension = 0x54,
        DW_AT_ranges = 0x55,
        DW_AT_trampoline = 0x56,
        DW_AT_call_column = 0x57,
        DW_AT_call_file = 0x58,
        DW_AT_call_line = 0x59,
        DW_AT_description = 0x5a,
        DW_AT_binary_scale = 0x5b,
        DW_AT_decimal_scale = 0x5c,
        DW_AT_small = 0x5d,
        DW_AT_decimal_sign = 0x5e,
        DW_AT_digit_count = 0x5f,
        DW_AT_picture_string = 0x60,
        DW_AT_mutable = 0x61,
        DW_AT_threads_scaled = 0x62,
        DW_AT_explicit = 0x63,
        DW_AT_object_pointer = 0x64,
        DW_AT_endianity = 0x65,
        DW_AT_elemental = 0x66,
        DW_AT_pure = 0x67,
        DW_AT_recursive = 0x68,
        DW_AT_signature = 0x69,
        DW_AT_main_subprogram = 0x6a,
        DW_AT_data_bit_offset = 0x6b,
        DW_AT_const_expr = 0x6c,
        DW_AT_enum_class = 0x6d,
        DW_AT_linkage_name = 0x6e,
        DW_AT_string_length_bit_size = 0x6f,
        DW_AT_string_length_byte_size = 0x70,
        DW_AT_rank = 0x71,
        DW_AT_str_offsets_base = 0x72,
        DW_AT_addr_base = 0x73,
        DW_AT_rnglists_base = 0x74,
        DW_AT_dwo_name = 0x76,
        DW_AT_reference = 0x77,
        DW_AT_rvalue_reference = 0x78,
        DW_AT_macros = 0x79,
        DW_AT_call_all_calls = 0x7a,
        DW_AT_call_all_source_calls = 0x7b,
        DW_AT_call_all_tail_calls = 0x7c,
        DW_AT_call_return_pc = 0x7d,
        DW_AT_call_value = 0x7e,
        DW_AT_call_origin = 0x7f,
        DW_AT_call_parameter = 0x80,
        DW_AT_call_pc = 0x81,
        DW_AT_call_tail_call = 0x82,
        DW_AT_call_target = 0x83,
        DW_AT_call_target_clobbered = 0x84,
        DW_AT_call_data_location = 0x85,
        DW_AT_call_data_value = 0x86,
        DW_AT_noreturn = 0x87,
        DW_AT_alignment = 0x88,
        DW_AT_export_symbols = 0x89,
        DW_AT_deleted = 0x8a,
        DW_AT_defaulted = 0x8b,
        DW_AT_loclists_base = 0x8c,
        DW_AT_MIPS_linkage_name = 0x2007,
        DW_AT_sf_names = 0x2101,
        DW_AT_src_info = 0x2102,
        DW_AT_mac_info = 0x2103,
        DW_AT_src_coords = 0x2104,
        DW_AT_body_begin = 0x2105,
        DW_AT_body_end = 0x2106,
        DW_AT_GNU_vector = 0x2107,
        DW_AT_GNU_odr_signature = 0x210f,
        DW_AT_GNU_template_name = 0x2110,
        DW_AT_GNU_call_site_value = 0x2111,
        DW_AT_GNU_call_site_data_value = 0x2112,
        DW_AT_GNU_call_site_target = 0x2113,
        DW_AT_GNU_call_site_target_clobbered = 0x2114,
        DW_AT_GNU_tail_call = 0x2115,
        DW_AT_GNU_all_tail_call_sites = 0x2116,
        DW_AT_GNU_all_call_sites = 0x2117,
        DW_AT_GNU_all_source_call_sites = 0x2118,
        DW_AT_GNU_macros = 0x2119,
        DW_AT_GNU_deleted = 0x211a,
        DW_AT_GNU_dwo_name = 0x2130,
        DW_AT_GNU_dwo_id = 0x2131,
        DW_AT_GNU_ranges_base = 0x2132,
        DW_AT_GNU_addr_base = 0x2133,
        DW_AT_GNU_pubnames = 0x2134,
        DW_AT_GNU_pubtypes = 0x2135,
        DW_AT_GNU_discriminator = 0x2136,
        DW_AT_GNU_locviews = 0x2137,
        DW_AT_GNU_entry_view = 0x2138,
    }
}

dwarf_names! {
    /// Encoding form of an attribute value (`DW_FORM_*`).
    Form ("form", gimli::DwForm) {
        DW_FORM_addr = 0x01,
        DW_FORM_block2 = 0x03,
        DW_FORM_block4 = 0x04,
        DW_FORM_data2 = 0x05,
        DW_FORM_data4 = 0x06,
        DW_FORM_data8 = 0x07,
        DW_FORM_string = 0x08,
        DW_FORM_block = 0x09,
        DW_FORM_block1 = 0x0a,
        DW_FORM_data1 = 0x0b,
        DW_FORM_flag = 0x0c,
        DW_FORM_sdata = 0x0d,
        DW_FORM_strp = 0x0e,
        DW_FORM_udata = 0x0f,
        DW_FORM_ref_addr = 0x10,
        DW_FORM_ref1 = 0x11,
        DW_FORM_ref2 = 0x12,
        DW_FORM_ref4 = 0x13,
        DW_FORM_ref8 = 0x14,
        DW_FORM_ref_udata = 0x15,
        DW_FORM_indirect = 0x16,
        DW_FORM_sec_offset = 0x17,
        DW_FORM_exprloc = 0x18,
        DW_FORM_flag_present = 0x19,
        DW_FORM_strx = 0x1a,
        DW_FORM_addrx = 0x1b,
        DW_FORM_ref_sup4 = 0x1c,
        DW_FORM_strp_sup = 0x1d,
        DW_FORM_data16 = 0x1e,
        DW_FORM_line_strp = 0x1f,
        DW_FORM_ref_sig8 = 0x20,
        DW_FORM_implicit_const = 0x21,
        DW_FORM_loclistx = 0x22,
        DW_FORM_rnglistx = 0x23,
        DW_FORM_ref_sup8 = 0x24,
        DW_FORM_strx1 = 0x25,
        DW_FORM_strx2 = 0x26,
        DW_FORM_strx3 = 0x27,
        DW_FORM_strx4 = 0x28,
        DW_FORM_addrx1 = 0x29,
        DW_FORM_addrx2 = 0x2a,
        DW_FORM_addrx3 = 0x2b,
        DW_FORM_addrx4 = 0x2c,
        DW_FORM_GNU_addr_index = 0x1f01,
        DW_FORM_GNU_str_index = 0x1f02,
        DW_FORM_GNU_ref_alt = 0x1f20,
        DW_FORM_GNU_strp_alt = 0x1f21,
    }
}
