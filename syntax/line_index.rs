/// Zero-based line and UTF-16 column
///
/// This is the position encoding mandated by the Language Server Protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

impl Position {
    pub fn new(line: u32, character: u32) -> Position {
        Position { line, character }
    }
}

/// Maps between byte offsets and [`Position`]s for a fixed text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineIndex {
    line_offsets: Vec<usize>,
    len: usize,
}

fn line_offsets_for_str(source: &str) -> Vec<usize> {
    std::iter::once(0)
        .chain(source.match_indices('\n').map(|(i, _)| i + 1))
        .collect()
}

impl LineIndex {
    pub fn new(text: &str) -> LineIndex {
        LineIndex {
            line_offsets: line_offsets_for_str(text),
            len: text.len(),
        }
    }

    pub fn line_count(&self) -> usize {
        self.line_offsets.len()
    }

    /// Returns the position of the given byte offset
    ///
    /// Offsets past the end of the text are clamped to the end of the text.
    pub fn position(&self, text: &str, offset: usize) -> Position {
        let mut offset = offset.min(text.len());
        while !text.is_char_boundary(offset) {
            offset -= 1;
        }

        let line = self.line_offsets.partition_point(|&o| o <= offset) - 1;
        let line_start = self.line_offsets[line];

        Position {
            line: line as u32,
            character: text[line_start..offset].encode_utf16().count() as u32,
        }
    }

    /// Returns the byte offset of the given position
    ///
    /// A column past the end of its line resolves to the end of that line and a line past the end
    /// of the text resolves to the end of the text. Positions inside a surrogate pair resolve to
    /// the start of the encoded character.
    pub fn offset(&self, text: &str, position: Position) -> usize {
        let line_start = match self.line_offsets.get(position.line as usize) {
            Some(line_start) => *line_start,
            None => return self.len,
        };

        let line_end = self
            .line_offsets
            .get(position.line as usize + 1)
            .map(|next_start| next_start - 1)
            .unwrap_or(self.len);

        let mut utf16_chars_remaining = position.character as usize;
        for (char_offset, c) in text[line_start..line_end].char_indices() {
            if utf16_chars_remaining < c.len_utf16() {
                return line_start + char_offset;
            }

            utf16_chars_remaining -= c.len_utf16();
        }

        line_end
    }

    /// Returns the byte offset of the given position if it lies within the text
    ///
    /// Unlike [`LineIndex::offset`] this rejects lines past the end of the text, columns past the
    /// end of their line and columns inside a surrogate pair.
    pub fn resolve(&self, text: &str, position: Position) -> Option<usize> {
        let line_start = *self.line_offsets.get(position.line as usize)?;
        let line_end = self
            .line_offsets
            .get(position.line as usize + 1)
            .map(|next_start| next_start - 1)
            .unwrap_or(self.len);

        let mut utf16_chars_remaining = position.character as usize;
        for (char_offset, c) in text[line_start..line_end].char_indices() {
            if utf16_chars_remaining == 0 {
                return Some(line_start + char_offset);
            } else if utf16_chars_remaining < c.len_utf16() {
                return None;
            }

            utf16_chars_remaining -= c.len_utf16();
        }

        if utf16_chars_remaining == 0 {
            Some(line_end)
        } else {
            None
        }
    }
}

/// Incrementally computes positions for monotonically increasing offsets
///
/// The lexer uses this to stamp tokens without rescanning each line from its start.
#[derive(Debug, Clone)]
pub(crate) struct PositionTracker {
    offset: usize,
    position: Position,
}

impl PositionTracker {
    pub(crate) fn new() -> PositionTracker {
        PositionTracker {
            offset: 0,
            position: Position::default(),
        }
    }

    pub(crate) fn advance_to(&mut self, source: &str, offset: usize) -> Position {
        debug_assert!(offset >= self.offset, "position tracker moved backwards");

        for c in source[self.offset..offset].chars() {
            if c == '\n' {
                self.position.line += 1;
                self.position.character = 0;
            } else {
                self.position.character += c.len_utf16() as u32;
            }
        }

        self.offset = offset;
        self.position
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn positions_of_offsets() {
        let text = "ab\ncd\n\nef";
        let index = LineIndex::new(text);

        assert_eq!(4, index.line_count());
        assert_eq!(Position::new(0, 0), index.position(text, 0));
        assert_eq!(Position::new(0, 2), index.position(text, 2));
        assert_eq!(Position::new(1, 0), index.position(text, 3));
        assert_eq!(Position::new(2, 0), index.position(text, 6));
        assert_eq!(Position::new(3, 2), index.position(text, 9));
        assert_eq!(Position::new(3, 2), index.position(text, 400));
    }

    #[test]
    fn offsets_of_positions() {
        let text = "ab\ncd\n";
        let index = LineIndex::new(text);

        assert_eq!(0, index.offset(text, Position::new(0, 0)));
        assert_eq!(4, index.offset(text, Position::new(1, 1)));
        // Past the end of the line
        assert_eq!(5, index.offset(text, Position::new(1, 80)));
        // Past the end of the text
        assert_eq!(6, index.offset(text, Position::new(2, 0)));
        assert_eq!(6, index.offset(text, Position::new(9, 0)));
    }

    #[test]
    fn strict_resolution() {
        let text = "ab\ncd\n";
        let index = LineIndex::new(text);

        assert_eq!(Some(0), index.resolve(text, Position::new(0, 0)));
        assert_eq!(Some(2), index.resolve(text, Position::new(0, 2)));
        assert_eq!(Some(6), index.resolve(text, Position::new(2, 0)));
        assert_eq!(None, index.resolve(text, Position::new(0, 3)));
        assert_eq!(None, index.resolve(text, Position::new(3, 0)));

        let text = "💣";
        let index = LineIndex::new(text);
        assert_eq!(None, index.resolve(text, Position::new(0, 1)));
        assert_eq!(Some(4), index.resolve(text, Position::new(0, 2)));
    }

    #[test]
    fn utf16_columns() {
        let text = "Defuse 💣 me";
        let index = LineIndex::new(text);

        assert_eq!(Position::new(0, 9), index.position(text, 11));
        assert_eq!(11, index.offset(text, Position::new(0, 9)));
        // Inside the surrogate pair
        assert_eq!(7, index.offset(text, Position::new(0, 8)));
    }

    #[test]
    fn tracker_matches_index() {
        let text = "a\n💣b\ncc";
        let index = LineIndex::new(text);
        let mut tracker = PositionTracker::new();

        for offset in [0, 1, 2, 6, 7, 8, 10] {
            assert_eq!(index.position(text, offset), tracker.advance_to(text, offset));
        }
    }
}
