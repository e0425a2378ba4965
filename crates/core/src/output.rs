/// Append-only buffer of chunk outputs, kept in chunk order and joined once
/// when the run is finalized.
#[derive(Debug, Clone, Default)]
pub struct OutputBuffer {
    parts: Vec<(usize, String)>,
}

pub const PART_SEPARATOR: &str = "\n\n";

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, index: usize, content: impl Into<String>) {
        let content = content.into();
        let content = content.trim();
        if content.is_empty() {
            return;
        }
        let at = self.parts.partition_point(|(existing, _)| *existing <= index);
        self.parts.insert(at, (index, content.to_string()));
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Last `max_chars` characters of the joined output, cut on a char
    /// boundary.
    pub fn tail(&self, max_chars: usize) -> String {
        if max_chars == 0 {
            return String::new();
        }
        let mut pieces: Vec<&str> = Vec::new();
        let mut remaining = max_chars;
        for (position, (_, part)) in self.parts.iter().enumerate().rev() {
            let count = part.chars().count();
            if count >= remaining {
                pieces.push(tail_chars(part, remaining));
                break;
            }
            pieces.push(part);
            remaining -= count;
            if position > 0 {
                let sep = PART_SEPARATOR.chars().count();
                if sep >= remaining {
                    pieces.push(tail_chars(PART_SEPARATOR, remaining));
                    break;
                }
                pieces.push(PART_SEPARATOR);
                remaining -= sep;
            }
        }
        pieces.into_iter().rev().collect()
    }

    pub fn join(&self) -> String {
        self.parts
            .iter()
            .map(|(_, part)| part.as_str())
            .collect::<Vec<_>>()
            .join(PART_SEPARATOR)
    }
}

fn tail_chars(text: &str, max_chars: usize) -> &str {
    let count = text.chars().count();
    if count <= max_chars {
        return text;
    }
    match text.char_indices().nth(count - max_chars) {
        Some((idx, _)) => &text[idx..],
        None => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_in_index_order() {
        let mut buffer = OutputBuffer::new();
        buffer.push(2, "third");
        buffer.push(0, "first");
        buffer.push(1, "  second\n");
        assert_eq!(buffer.join(), "first\n\nsecond\n\nthird");
    }

    #[test]
    fn skips_blank_outputs() {
        let mut buffer = OutputBuffer::new();
        buffer.push(0, "   ");
        assert!(buffer.is_empty());
        assert_eq!(buffer.join(), "");
    }

    #[test]
    fn tail_matches_suffix_of_join() {
        let mut buffer = OutputBuffer::new();
        buffer.push(0, "alpha beta");
        buffer.push(1, "gamma");
        let joined = buffer.join();
        for n in 0..=joined.len() + 3 {
            let expected: String = {
                let chars: Vec<char> = joined.chars().collect();
                chars[chars.len().saturating_sub(n)..].iter().collect()
            };
            assert_eq!(buffer.tail(n), expected, "n = {n}");
        }
    }

    #[test]
    fn tail_respects_multibyte_characters() {
        let mut buffer = OutputBuffer::new();
        buffer.push(0, "déjà vu über");
        assert_eq!(buffer.tail(4), "über");
        assert_eq!(buffer.tail(100), "déjà vu über");
    }
}
