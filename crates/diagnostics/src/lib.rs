// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Lightweight logging shared by the vlayer crates
//!
//! Usage:
//! - Set VLAYER_LOG=off (default) - no logs
//! - Set VLAYER_LOG=info - commit summaries
//! - Set VLAYER_LOG=debug - cache, classification and filter decisions

use std::sync::Once;

// Re-export emit so macros can use it
pub use emit;

/// Environment variable consulted by [`init_diagnostics`]
pub const LOG_ENV_VAR: &str = "VLAYER_LOG";

static INIT: Once = Once::new();

/// Map a `VLAYER_LOG` value to a minimum level.
///
/// `Ok(None)` means logging is switched off. Unknown values are returned
/// as `Err` so the caller can fall back and report them.
pub fn parse_level(value: &str) -> Result<Option<emit::Level>, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "off" => Ok(None),
        "debug" => Ok(Some(emit::Level::Debug)),
        "info" => Ok(Some(emit::Level::Info)),
        "warn" => Ok(Some(emit::Level::Warn)),
        "error" => Ok(Some(emit::Level::Error)),
        other => Err(other.to_string()),
    }
}

/// Initialize diagnostics based on the VLAYER_LOG environment variable
///
/// Safe to call multiple times; only the first call has an effect.
pub fn init_diagnostics() {
    INIT.call_once(|| {
        let raw = std::env::var(LOG_ENV_VAR).unwrap_or_else(|_| "off".to_string());

        let (level, unknown) = match parse_level(&raw) {
            Ok(None) => return,
            Ok(Some(level)) => (level, None),
            Err(unknown) => (emit::Level::Info, Some(unknown)),
        };

        let rt = emit::setup()
            .emit_to(emit_term::stderr())
            .emit_when(emit::level::min_filter(level))
            .init();

        if let Some(unknown) = unknown {
            emit::warn!("Unknown VLAYER_LOG value {unknown}, using info");
        }

        // The runtime lives for the rest of the process
        std::mem::forget(rt);
    });
}

// The level macros are re-exported from emit rather than wrapped in
// `macro_rules!`, so in-scope captures like `debug!("... {node_id}")`
// resolve at the call site.

/// Log detailed diagnostics (cache hits, dispatch decisions, filter steps)
pub use emit::debug;

/// Log basic operations users might want to see (commits, refreshes)
pub use emit::info;

/// Log conditions that don't prevent operation but should be noted
pub use emit::warn;

/// Log failures, e.g. a provider that could not populate a node
pub use emit::error;

pub use init_diagnostics as init;
