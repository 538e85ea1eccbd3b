// ==============================================================================
// logging.rs - Tracing Initialisation and Log Helpers
// ==============================================================================
// Description: Shared tracing-subscriber setup for the worker, gateway and CLI,
//              plus bounded rendering of large payloads in log lines
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Longest payload rendering emitted in a single log line
pub const MAX_LOG_LENGTH: usize = 1024;

/// Initialise the global subscriber
///
/// `RUST_LOG` wins when set; otherwise `default_directive` (e.g.
/// `"annotation_worker=info,annotation_pipeline=info"`). `LOG_FORMAT=json`
/// switches to JSON lines.
pub fn init(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_target(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().compact().with_target(false))
            .init();
    }
}

/// Cut the middle out of `text` so it fits in `max_length` bytes
///
/// The removed span is replaced with a `<N bytes>` placeholder whose own
/// length is accounted for. Cuts always land on char boundaries.
pub fn truncate_middle(text: &str, max_length: usize) -> String {
    let length = text.len();
    if length <= max_length {
        return text.to_string();
    }

    let excess = length - max_length;
    let mut removed = excess + placeholder_len(excess);
    while removed < length && removed - placeholder_len(removed) < excess {
        removed += 1;
    }

    if removed >= length {
        return text[..floor_boundary(text, max_length)].to_string();
    }

    let snip_start = floor_boundary(text, (length - removed) / 2);
    let snip_end = ceil_boundary(text, snip_start + removed);
    format!("{}<{} bytes>{}", &text[..snip_start], snip_end - snip_start, &text[snip_end..])
}

fn placeholder_len(removed: usize) -> usize {
    format!("<{} bytes>", removed).len()
}

fn floor_boundary(text: &str, mut index: usize) -> usize {
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn ceil_boundary(text: &str, mut index: usize) -> usize {
    while index < text.len() && !text.is_char_boundary(index) {
        index += 1;
    }
    index.min(text.len())
}
