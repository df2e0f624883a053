//! Overlap-aware concatenation of generation chunks.
//!
//! Continuation rounds often repeat the last few lines of the previous
//! round. The merger drops the repeated prefix of the incoming chunk when it
//! matches a suffix of the assembly.

/// Joins an incoming chunk onto an existing assembly.
pub trait OverlapMerger: Send + Sync {
    fn merge(&self, existing: &str, incoming: &str) -> String;
}

/// Longest suffix/prefix match within a bounded character window.
#[derive(Debug, Clone)]
pub struct SuffixPrefixMerger {
    max_window: usize,
    min_overlap: usize,
}

impl SuffixPrefixMerger {
    pub fn new(max_window: usize, min_overlap: usize) -> Self {
        Self {
            max_window,
            min_overlap: min_overlap.max(1),
        }
    }
}

impl Default for SuffixPrefixMerger {
    fn default() -> Self {
        Self::new(1200, 1)
    }
}

impl OverlapMerger for SuffixPrefixMerger {
    fn merge(&self, existing: &str, incoming: &str) -> String {
        if existing.is_empty() {
            return incoming.to_string();
        }
        if incoming.is_empty() {
            return existing.to_string();
        }

        // Byte offsets of every char boundary, plus the end of the string.
        let existing_bounds: Vec<usize> = existing
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(existing.len()))
            .collect();
        let incoming_bounds: Vec<usize> = incoming
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(incoming.len()))
            .collect();
        let existing_chars = existing_bounds.len() - 1;
        let incoming_chars = incoming_bounds.len() - 1;

        let window = self.max_window.min(existing_chars).min(incoming_chars);
        let mut size = window;
        while size >= self.min_overlap && size > 0 {
            let suffix = &existing[existing_bounds[existing_chars - size]..];
            let prefix = &incoming[..incoming_bounds[size]];
            if suffix == prefix {
                let mut merged = String::with_capacity(existing.len() + incoming.len());
                merged.push_str(existing);
                merged.push_str(&incoming[incoming_bounds[size]..]);
                return merged;
            }
            size -= 1;
        }

        let mut merged = String::with_capacity(existing.len() + incoming.len());
        merged.push_str(existing);
        merged.push_str(incoming);
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_drops_repeated_overlap() {
        let merger = SuffixPrefixMerger::default();
        assert_eq!(merger.merge("hello world", "world peace"), "hello world peace");
    }

    #[test]
    fn test_merge_without_overlap_concatenates_exactly() {
        let merger = SuffixPrefixMerger::default();
        assert_eq!(merger.merge("abc", "xyz"), "abcxyz");
        assert_eq!(merger.merge("line one\n", "Line two"), "line one\nLine two");
    }

    #[test]
    fn test_merge_empty_sides() {
        let merger = SuffixPrefixMerger::default();
        assert_eq!(merger.merge("", "next"), "next");
        assert_eq!(merger.merge("prev", ""), "prev");
        assert_eq!(merger.merge("", ""), "");
    }

    #[test]
    fn test_merge_prefers_longest_overlap() {
        let merger = SuffixPrefixMerger::default();
        // "aa" and "a" both match; the longer one wins.
        assert_eq!(merger.merge("baa", "aac"), "baac");
    }

    #[test]
    fn test_merge_respects_min_overlap() {
        let merger = SuffixPrefixMerger::new(1200, 5);
        assert_eq!(merger.merge("ends with ab", "ab starts"), "ends with abab starts");
        assert_eq!(merger.merge("repeat tail", " tail again"), "repeat tail again");
        assert_eq!(merger.merge("xx tail", "tail again"), "xx tailtail again");
    }

    #[test]
    fn test_merge_respects_window() {
        let merger = SuffixPrefixMerger::new(3, 1);
        // The real overlap is 5 chars, outside the 3-char window.
        assert_eq!(merger.merge("say hello", "hello there"), "say hellohello there");
    }

    #[test]
    fn test_merge_is_char_boundary_safe() {
        let merger = SuffixPrefixMerger::default();
        assert_eq!(merger.merge("前端设计", "设计规范"), "前端设计规范");
        assert_eq!(merger.merge("naïve", "ïve café"), "naïve café");
        assert_eq!(merger.merge("日本", "語"), "日本語");
    }
}
