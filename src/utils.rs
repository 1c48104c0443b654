//! # Utilities Module
//!
//! ## Purpose
//! Common helpers used throughout the search engine: operation timing for
//! the `took_ms`/`index_time_ms` surfaces, snippet text manipulation, and a
//! lightweight cancellation token for long-running reindex operations.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Performance timer for measuring operation duration
pub struct Timer {
    start: Instant,
    name: String,
}

impl Timer {
    /// Start a new timer with a name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            name: name.into(),
        }
    }

    /// Get elapsed time in milliseconds
    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    /// Stop timer and log duration
    pub fn stop(self) -> u64 {
        let elapsed = self.elapsed_ms();
        tracing::debug!("Timer '{}' completed in {}ms", self.name, elapsed);
        elapsed
    }
}

/// Cooperative cancellation handle checked between reindex batches.
/// Cloning shares the underlying flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a fresh, uncancelled token
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Text processing utilities
pub struct TextUtils;

impl TextUtils {
    /// Truncate text to at most `max_chars` characters with an ellipsis,
    /// respecting UTF-8 boundaries
    pub fn truncate(text: &str, max_chars: usize) -> String {
        if text.chars().count() <= max_chars {
            text.to_string()
        } else {
            let cut: String = text.chars().take(max_chars.saturating_sub(1)).collect();
            format!("{}…", cut)
        }
    }

    /// Extract a window of `radius` characters around a byte offset,
    /// snapped to character boundaries
    pub fn window_around(text: &str, offset: usize, radius: usize) -> &str {
        let chars: Vec<(usize, char)> = text.char_indices().collect();
        if chars.is_empty() {
            return text;
        }
        let center = chars
            .iter()
            .position(|(i, _)| *i >= offset)
            .unwrap_or(chars.len() - 1);
        let start_idx = center.saturating_sub(radius);
        let end_idx = (center + radius).min(chars.len() - 1);
        let start = chars[start_idx].0;
        let end = chars[end_idx].0 + chars[end_idx].1.len_utf8();
        &text[start..end]
    }
}
