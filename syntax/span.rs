use std::fmt;

/// Half-open byte range into a template source
#[derive(PartialEq, Eq, Hash, Clone, PartialOrd, Ord, Copy)]
pub struct Span {
    start: u32,
    end: u32,
}

impl Span {
    pub fn new(start: u32, end: u32) -> Span {
        Span { start, end }
    }

    pub fn from_offsets(start: usize, end: usize) -> Span {
        Span::new(start as u32, end as u32)
    }

    pub fn start(self) -> u32 {
        self.start
    }

    pub fn end(self) -> u32 {
        self.end
    }

    pub fn len(self) -> u32 {
        self.end - self.start
    }

    pub fn is_empty(self) -> bool {
        self.start == self.end
    }

    pub fn with_start(self, start: u32) -> Span {
        Span {
            start,
            end: self.end,
        }
    }

    pub fn with_end(self, end: u32) -> Span {
        Span {
            start: self.start,
            end,
        }
    }

    /// Returns a span covering both `self` and `other`
    pub fn cover(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    pub fn to_non_empty(self) -> Option<Span> {
        if self.start != self.end {
            Some(self)
        } else {
            None
        }
    }

    pub fn contains(self, other: Span) -> bool {
        (other.start >= self.start) && (other.end <= self.end)
    }

    /// Returns true if the byte at `offset` is inside the span
    pub fn contains_offset(self, offset: u32) -> bool {
        offset >= self.start && offset < self.end
    }

    /// Returns true if a cursor at `offset` touches the span
    ///
    /// Unlike [`Span::contains_offset`] this includes the position directly after the last byte,
    /// which is where an editor cursor sits after typing an identifier.
    pub fn touches_offset(self, offset: u32) -> bool {
        offset >= self.start && offset <= self.end
    }

    pub fn slice(self, source: &str) -> &str {
        &source[self.start as usize..self.end as usize]
    }
}

impl fmt::Debug for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "Span[>{}]", self.start)
        } else {
            write!(f, "Span[{}:{}]", self.start, self.end)
        }
    }
}

pub const EMPTY_SPAN: Span = Span { start: 0, end: 0 };

// This isn't #[cfg(test)] because it's used by the server's tests
pub fn t2s(v: &str) -> Span {
    if let Some(zero_size_off) = v.find('>') {
        let byte_pos = (zero_size_off + 1) as u32;

        return Span::new(byte_pos, byte_pos);
    }

    let start = v.find('^').expect("Positioning character not found") as u32;
    let end = v.rfind('^').map(|i| i + 1).unwrap() as u32;

    Span::new(start, end)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn caret_spans() {
        assert_eq!(Span::new(2, 5), t2s("  ^^^ "));
        assert_eq!(Span::new(4, 4), t2s("   >"));
    }

    #[test]
    fn offset_containment() {
        let span = t2s("  ^^^ ");

        assert!(!span.contains_offset(1));
        assert!(span.contains_offset(2));
        assert!(span.contains_offset(4));
        assert!(!span.contains_offset(5));
        assert!(span.touches_offset(5));
    }

    #[test]
    fn cover_spans() {
        assert_eq!(Span::new(1, 9), Span::new(4, 9).cover(Span::new(1, 3)));
    }
}
