//! Overlap merger: stitches per-segment transcripts into one string.
//!
//! Consecutive segments share `overlap_seconds` of audio, so the end of one
//! transcript should repeat at the start of the next. Matching tiers run
//! from strictest to most permissive; exact matching wins when the backend
//! reproduces identical wording (the common case), and the later tiers
//! absorb re-punctuation and slight rewording of the same audio. When no
//! tier finds the overlap, the texts are joined with a paragraph break —
//! a stitching miss must never drop text.

use crate::defaults;
use serde::{Deserialize, Serialize};

/// Tuning for the overlap matcher.
///
/// The similarity threshold and mismatch budget are empirically chosen;
/// they are configuration, not invariants, and may need adjustment against
/// real backend output.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MergeConfig {
    /// Maximum overlap search window in characters.
    pub max_window: usize,
    /// Minimum overlap length the exact tier will accept.
    pub min_overlap: usize,
    /// Minimum normalized-character core for the normalized and tolerant
    /// tiers, and the smallest window the fuzzy tier will try.
    pub min_normalized: usize,
    /// Character mismatches tolerated by the lock-step tier.
    pub mismatch_budget: usize,
    /// Positional similarity required by the fuzzy fallback.
    pub fuzzy_similarity: f64,
    /// Largest window the fuzzy fallback may trim.
    pub fuzzy_max_window: usize,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            max_window: defaults::MERGE_MAX_WINDOW,
            min_overlap: defaults::MERGE_MIN_OVERLAP,
            min_normalized: defaults::MERGE_MIN_NORMALIZED,
            mismatch_budget: defaults::MERGE_MISMATCH_BUDGET,
            fuzzy_similarity: defaults::MERGE_FUZZY_SIMILARITY,
            fuzzy_max_window: defaults::MERGE_FUZZY_MAX_WINDOW,
        }
    }
}

/// Common ASR noise markers stripped before a transcript enters the ledger.
const NOISE_MARKERS: [&str; 7] = [
    "[BLANK_AUDIO]",
    "[INAUDIBLE]",
    "[MUSIC]",
    "[APPLAUSE]",
    "[LAUGHTER]",
    "(BLANK_AUDIO)",
    "(inaudible)",
];

/// Removes noise markers and surrounding whitespace from backend output.
///
/// A transcript that is nothing but markers cleans to the empty string,
/// which the scheduler treats as an empty (retryable) result.
pub fn clean_transcript(text: &str) -> String {
    let mut cleaned = text.to_string();
    for marker in NOISE_MARKERS {
        cleaned = cleaned.replace(marker, "");
    }
    cleaned.trim().to_string()
}

/// Stitches ordered segment transcripts by removing boundary overlap.
#[derive(Debug, Clone, Default)]
pub struct OverlapMerger {
    config: MergeConfig,
}

impl OverlapMerger {
    pub fn new(config: MergeConfig) -> Self {
        Self { config }
    }

    /// Merges the running text with the next segment's transcript.
    pub fn merge_pair(&self, base: &str, next: &str) -> String {
        let base = base.trim_end();
        let next = next.trim_start();
        if base.is_empty() {
            return next.to_string();
        }
        if next.is_empty() {
            return base.to_string();
        }

        let base_chars: Vec<char> = base.chars().collect();
        let next_chars: Vec<char> = next.chars().collect();
        let window = self
            .config
            .max_window
            .min(base_chars.len())
            .min(next_chars.len());

        let drop = self
            .exact_overlap(&base_chars, &next_chars, window)
            .or_else(|| self.normalized_overlap(&base_chars, &next_chars, window))
            .or_else(|| self.tolerant_overlap(&base_chars, &next_chars, window))
            .or_else(|| self.fuzzy_overlap(&base_chars, &next_chars));

        match drop {
            Some(k) => {
                let mut merged = base.to_string();
                merged.extend(&next_chars[k..]);
                merged
            }
            // No plausible overlap: keep everything, separated.
            None => format!("{}\n{}", base, next),
        }
    }

    /// Merges all transcripts in order. Recomputing from scratch with this
    /// is equivalent to folding [`merge_pair`] incrementally, which is what
    /// makes the persisted checkpoint safe to rebuild after a crash.
    pub fn merge_all<S: AsRef<str>>(&self, texts: &[S]) -> String {
        let mut merged = String::new();
        for text in texts {
            let text = text.as_ref().trim();
            if text.is_empty() {
                continue;
            }
            merged = if merged.is_empty() {
                text.to_string()
            } else {
                self.merge_pair(&merged, text)
            };
        }
        merged
    }

    /// Tier 1: largest k where base's last k chars equal next's first k.
    fn exact_overlap(&self, base: &[char], next: &[char], window: usize) -> Option<usize> {
        if window < self.config.min_overlap {
            return None;
        }
        for k in (self.config.min_overlap..=window).rev() {
            if base[base.len() - k..] == next[..k] {
                return Some(k);
            }
        }
        None
    }

    /// Tier 2: same search over lower-cased alphanumeric characters only,
    /// tolerating punctuation jitter across the boundary.
    fn normalized_overlap(&self, base: &[char], next: &[char], window: usize) -> Option<usize> {
        let base_window = &base[base.len() - window..];
        let next_window = &next[..window];

        let norm_base = normalize(base_window);
        let (norm_next, next_map) = normalize_with_map(next_window);

        let limit = norm_base.len().min(norm_next.len());
        if limit < self.config.min_normalized {
            return None;
        }
        for k in (self.config.min_normalized..=limit).rev() {
            if norm_base[norm_base.len() - k..] == norm_next[..k] {
                // Drop everything in next up to and including the source
                // character of the k-th matched normalized char.
                return Some(next_map[k - 1] + 1);
            }
        }
        None
    }

    /// Tier 3: lock-step walk skipping ignorable characters on either side
    /// independently, allowing a small mismatch budget. Accepts only if the
    /// entire base-side window is consumed.
    fn tolerant_overlap(&self, base: &[char], next: &[char], window: usize) -> Option<usize> {
        let next_limit = self.config.max_window.min(next.len());
        for w in (self.config.min_normalized..=window).rev() {
            if let Some(consumed) = self.lock_step(&base[base.len() - w..], &next[..next_limit]) {
                return Some(consumed);
            }
        }
        None
    }

    /// Walks `base_window` against the head of `next`, returning how many
    /// chars of `next` the match consumed.
    fn lock_step(&self, base_window: &[char], next: &[char]) -> Option<usize> {
        let mut i = 0;
        let mut j = 0;
        let mut mismatches = 0usize;
        let mut core = 0usize;

        loop {
            while i < base_window.len() && !base_window[i].is_alphanumeric() {
                i += 1;
            }
            // Base window exhausted: stop before skipping anything more on
            // the next side, so the cut point lands right after the last
            // matched character and the following separator survives.
            if i >= base_window.len() {
                break;
            }
            while j < next.len() && !next[j].is_alphanumeric() {
                j += 1;
            }
            if j >= next.len() {
                // Next exhausted before the base window was consumed.
                return None;
            }
            if chars_eq_fold(base_window[i], next[j]) {
                core += 1;
            } else {
                mismatches += 1;
                if mismatches > self.config.mismatch_budget {
                    return None;
                }
            }
            i += 1;
            j += 1;
        }

        (core >= self.config.min_normalized).then_some(j)
    }

    /// Tier 4: positional similarity over aligned windows, largest first.
    /// Capped well below the exact tier's window so coincidental similarity
    /// cannot trim much unrelated text.
    fn fuzzy_overlap(&self, base: &[char], next: &[char]) -> Option<usize> {
        let max = self
            .config
            .fuzzy_max_window
            .min(base.len())
            .min(next.len());
        if max < self.config.min_normalized {
            return None;
        }
        for w in (self.config.min_normalized..=max).rev() {
            let tail = &base[base.len() - w..];
            let head = &next[..w];
            let equal = tail.iter().zip(head).filter(|(a, b)| a == b).count();
            if equal as f64 / w as f64 >= self.config.fuzzy_similarity {
                return Some(w);
            }
        }
        None
    }
}

fn chars_eq_fold(a: char, b: char) -> bool {
    a == b || a.to_lowercase().eq(b.to_lowercase())
}

fn normalize(chars: &[char]) -> Vec<char> {
    chars
        .iter()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

/// Normalizes and records, for every normalized char, the index of the
/// source character it came from.
fn normalize_with_map(chars: &[char]) -> (Vec<char>, Vec<usize>) {
    let mut out = Vec::new();
    let mut map = Vec::new();
    for (i, &c) in chars.iter().enumerate() {
        if c.is_alphanumeric() {
            for lower in c.to_lowercase() {
                out.push(lower);
                map.push(i);
            }
        }
    }
    (out, map)
}
