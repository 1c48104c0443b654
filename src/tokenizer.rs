//! # Tokenizer and Normalizer Module
//!
//! ## Purpose
//! Turns raw mixed Chinese/Latin legal text into a normalized token stream
//! suitable for indexing and querying: case-folding, punctuation stripping,
//! dictionary-assisted CJK segmentation, stopword removal with a legal-keyword
//! allowlist, and Latin suffix stemming.
//!
//! ## Input/Output Specification
//! - **Input**: Raw UTF-8 text plus the document field it came from
//! - **Output**: Ordered sequence of `(token, position, field)`
//! - **Determinism**: Identical input always yields the identical sequence;
//!   the index is reproducible and tests are stable
//!
//! ## Key Features
//! - NFKC normalization and Latin case-folding
//! - Intra-word hyphens and apostrophes preserved ("cross-examination")
//! - Longest-match CJK segmentation against a legal-term dictionary, with
//!   dictionary sub-words emitted inside long matches and overlapping
//!   bigrams for unmatched runs
//! - Stopword filtering that never drops allowlisted legal keywords
//! - Suffix-stripping stemming applied to Latin-script tokens only

use crate::config::TokenizerConfig;
use crate::Field;
use regex::Regex;
use std::collections::HashSet;
use unicode_normalization::UnicodeNormalization;

/// A single analyzed token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// Normalized token text
    pub text: String,
    /// Position within the analyzed field, in token increments
    pub position: u32,
    /// Field the token came from
    pub field: Field,
}

/// Text analysis pipeline shared by the index writer and the query parser
pub struct Tokenizer {
    stopwords: HashSet<String>,
    legal_keywords: HashSet<String>,
    cjk_dictionary: HashSet<String>,
    /// Longest dictionary entry, in chars; bounds the longest-match scan
    max_dict_len: usize,
    enable_stemming: bool,
    min_token_length: usize,
    whitespace: Regex,
}

impl Tokenizer {
    /// Build a tokenizer from configuration dictionaries
    pub fn new(config: &TokenizerConfig) -> Self {
        let stopwords: HashSet<String> =
            config.stopwords.iter().map(|s| s.to_lowercase()).collect();
        let legal_keywords: HashSet<String> = config
            .legal_keywords
            .iter()
            .map(|s| s.to_lowercase())
            .collect();
        let cjk_dictionary: HashSet<String> = config.cjk_dictionary.iter().cloned().collect();
        let max_dict_len = cjk_dictionary
            .iter()
            .map(|t| t.chars().count())
            .max()
            .unwrap_or(2);

        Self {
            stopwords,
            legal_keywords,
            cjk_dictionary,
            max_dict_len,
            enable_stemming: config.enable_stemming,
            min_token_length: config.min_token_length,
            whitespace: Regex::new(r"\s+").expect("static whitespace pattern"),
        }
    }

    /// Analyze one field's text into an ordered token sequence
    pub fn analyze(&self, text: &str, field: Field) -> Vec<Token> {
        let normalized = self.normalize(text);
        let mut tokens = Vec::new();
        let mut position: u32 = 0;

        for segment in self.split_segments(&normalized) {
            match segment {
                Segment::Latin(word) => {
                    if let Some(token) = self.latin_token(&word) {
                        tokens.push(Token {
                            text: token,
                            position,
                            field,
                        });
                        position += 1;
                    }
                }
                Segment::Cjk(run) => {
                    position = self.segment_cjk(&run, field, position, &mut tokens);
                }
            }
        }

        tokens
    }

    /// Analyze query text into bare terms, using the identical pipeline as
    /// indexing so query terms and postings agree
    pub fn analyze_terms(&self, text: &str) -> Vec<String> {
        self.analyze(text, Field::Content)
            .into_iter()
            .map(|t| t.text)
            .collect()
    }

    /// NFKC-normalize, case-fold, and collapse whitespace
    fn normalize(&self, text: &str) -> String {
        let folded: String = text.nfkc().collect::<String>().to_lowercase();
        self.whitespace.replace_all(&folded, " ").trim().to_string()
    }

    /// Split normalized text into Latin word segments and CJK runs,
    /// discarding punctuation except intra-word hyphens/apostrophes
    fn split_segments(&self, text: &str) -> Vec<Segment> {
        let mut segments = Vec::new();
        let mut latin = String::new();
        let mut cjk = String::new();

        let chars: Vec<char> = text.chars().collect();
        for (i, &c) in chars.iter().enumerate() {
            if is_cjk(c) {
                if !latin.is_empty() {
                    segments.push(Segment::Latin(std::mem::take(&mut latin)));
                }
                cjk.push(c);
            } else if c.is_alphanumeric() {
                if !cjk.is_empty() {
                    segments.push(Segment::Cjk(std::mem::take(&mut cjk)));
                }
                latin.push(c);
            } else if (c == '-' || c == '\'')
                && !latin.is_empty()
                && chars.get(i + 1).is_some_and(|n| n.is_alphanumeric() && !is_cjk(*n))
            {
                // Intra-word hyphen/apostrophe
                latin.push(c);
            } else {
                if !latin.is_empty() {
                    segments.push(Segment::Latin(std::mem::take(&mut latin)));
                }
                if !cjk.is_empty() {
                    segments.push(Segment::Cjk(std::mem::take(&mut cjk)));
                }
            }
        }
        if !latin.is_empty() {
            segments.push(Segment::Latin(latin));
        }
        if !cjk.is_empty() {
            segments.push(Segment::Cjk(cjk));
        }
        segments
    }

    /// Filter and stem a single Latin token; None when dropped
    fn latin_token(&self, word: &str) -> Option<String> {
        if self.legal_keywords.contains(word) {
            // Allowlisted legal terms bypass both the stopword filter
            // and the stemmer
            return Some(word.to_string());
        }
        if word.chars().count() < self.min_token_length {
            return None;
        }
        if self.stopwords.contains(word) {
            return None;
        }
        if self.enable_stemming {
            Some(stem(word))
        } else {
            Some(word.to_string())
        }
    }

    /// Dictionary longest-match segmentation of a CJK run.
    ///
    /// Each longest match advances the position counter once; dictionary
    /// sub-words found inside a longer match are emitted at the same
    /// position so that e.g. "合同" is searchable inside "劳动合同".
    /// Runs with no dictionary coverage fall back to overlapping bigrams.
    fn segment_cjk(
        &self,
        run: &str,
        field: Field,
        mut position: u32,
        tokens: &mut Vec<Token>,
    ) -> u32 {
        let chars: Vec<char> = run.chars().collect();
        let mut i = 0;

        while i < chars.len() {
            let max_len = self.max_dict_len.min(chars.len() - i);
            let mut matched = 0;
            for len in (1..=max_len).rev() {
                let candidate: String = chars[i..i + len].iter().collect();
                if self.cjk_dictionary.contains(&candidate) {
                    if !self.stopwords.contains(&candidate)
                        || self.legal_keywords.contains(&candidate)
                    {
                        tokens.push(Token {
                            text: candidate,
                            position,
                            field,
                        });
                        self.emit_subwords(&chars[i..i + len], field, position, tokens);
                        position += 1;
                    }
                    matched = len;
                    break;
                }
            }
            if matched > 0 {
                i += matched;
                continue;
            }

            // No dictionary entry starts here; collect the unmatched stretch
            // and emit bigrams over it
            let start = i;
            while i < chars.len() && !self.dict_match_at(&chars, i) {
                i += 1;
            }
            position = self.emit_bigrams(&chars[start..i], field, position, tokens);
        }

        position
    }

    /// Whether any dictionary entry begins at `chars[i]`
    fn dict_match_at(&self, chars: &[char], i: usize) -> bool {
        let max_len = self.max_dict_len.min(chars.len() - i);
        (1..=max_len).any(|len| {
            let candidate: String = chars[i..i + len].iter().collect();
            self.cjk_dictionary.contains(&candidate)
        })
    }

    /// Emit dictionary words nested inside a longer match, at the parent's
    /// position
    fn emit_subwords(&self, chars: &[char], field: Field, position: u32, tokens: &mut Vec<Token>) {
        if chars.len() <= 2 {
            return;
        }
        for len in 2..chars.len() {
            for start in 0..=(chars.len() - len) {
                let sub: String = chars[start..start + len].iter().collect();
                if self.cjk_dictionary.contains(&sub)
                    && (!self.stopwords.contains(&sub) || self.legal_keywords.contains(&sub))
                {
                    tokens.push(Token {
                        text: sub,
                        position,
                        field,
                    });
                }
            }
        }
    }

    /// Overlapping-bigram fallback for CJK runs with no dictionary coverage;
    /// a single stray character is emitted as-is
    fn emit_bigrams(
        &self,
        chars: &[char],
        field: Field,
        mut position: u32,
        tokens: &mut Vec<Token>,
    ) -> u32 {
        if chars.is_empty() {
            return position;
        }
        if chars.len() == 1 {
            let single = chars[0].to_string();
            if !self.stopwords.contains(&single) {
                tokens.push(Token {
                    text: single,
                    position,
                    field,
                });
                position += 1;
            }
            return position;
        }
        for window in chars.windows(2) {
            let bigram: String = window.iter().collect();
            if self.stopwords.contains(&bigram) {
                continue;
            }
            tokens.push(Token {
                text: bigram,
                position,
                field,
            });
            position += 1;
        }
        position
    }
}

/// CJK ideograph ranges requiring segmentation rather than whitespace
/// tokenization
fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{4E00}'..='\u{9FFF}'   // CJK Unified Ideographs
        | '\u{3400}'..='\u{4DBF}' // Extension A
        | '\u{F900}'..='\u{FAFF}' // Compatibility Ideographs
        | '\u{3040}'..='\u{30FF}' // Hiragana, Katakana
        | '\u{AC00}'..='\u{D7AF}' // Hangul Syllables
    )
}

/// Small deterministic suffix-stripping stemmer for Latin tokens.
/// Table-driven on purpose: legal search needs reproducibility more than
/// linguistic coverage, and allowlisted keywords never reach it.
fn stem(word: &str) -> String {
    let w = word;
    if w.len() < 4 || !w.is_ascii() {
        return w.to_string();
    }
    if let Some(base) = w.strip_suffix("sses") {
        return format!("{}ss", base);
    }
    if let Some(base) = w.strip_suffix("ies") {
        return format!("{}y", base);
    }
    if let Some(base) = w.strip_suffix("ational") {
        return format!("{}ate", base);
    }
    if let Some(base) = w.strip_suffix("tional") {
        return format!("{}tion", base);
    }
    for suffix in ["ments", "ment", "ness", "ingly"] {
        if let Some(base) = w.strip_suffix(suffix) {
            if base.len() >= 3 {
                return base.to_string();
            }
        }
    }
    if let Some(base) = w.strip_suffix("ing") {
        if base.len() >= 3 {
            return base.to_string();
        }
    }
    if let Some(base) = w.strip_suffix("ed") {
        if base.len() >= 3 {
            return base.to_string();
        }
    }
    if w.ends_with('s') && !w.ends_with("ss") && !w.ends_with("us") {
        return w[..w.len() - 1].to_string();
    }
    w.to_string()
}

enum Segment {
    Latin(String),
    Cjk(String),
}
