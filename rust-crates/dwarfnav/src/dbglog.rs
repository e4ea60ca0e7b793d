// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Minimal logging support.
//!
//! Debug messages are opt-in via [`ENABLED`]. Warnings are always printed:
//! they flag debug data that we could only partially understand, which is
//! something callers generating bindings from it want to know about.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

// Re-export to make the macros show up in this module in rustdoc.
pub use crate::{debug, warning};

/// Determines whether [`debug`] messages are actually printed or not.
pub static ENABLED: AtomicBool = AtomicBool::new(false);

/// Number of warnings emitted via [`warning`] since process start.
#[doc(hidden)]
pub static WARNINGS: AtomicU64 = AtomicU64::new(0);

/// Returns the number of warnings emitted so far by this process.
pub fn warning_count() -> u64 {
    WARNINGS.load(Ordering::Relaxed)
}

/// Print to stderr if debug printing is enabled.
///
/// See [`eprintln`] documentation for usage.
#[macro_export]
macro_rules! debug {
    ( $($args:tt)* ) => {
        if $crate::dbglog::ENABLED.load(::std::sync::atomic::Ordering::Relaxed) {
            ::std::eprintln!( $($args)* );
        }
    }
}

/// Print a warning to stderr and count it.
///
/// See [`eprintln`] documentation for usage.
#[macro_export]
macro_rules! warning {
    ( $($args:tt)* ) => {{
        $crate::dbglog::WARNINGS.fetch_add(1, ::std::sync::atomic::Ordering::Relaxed);
        ::std::eprintln!("warning: {}", ::std::format_args!( $($args)* ));
    }}
}
