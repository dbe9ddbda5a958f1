use std::fmt;
use std::fs;
use std::rc::Rc;

use anyhow::Context;

/// A loaded source file. `origin` is the path the file was loaded from, or
/// empty for synthetic sources created by the identifier interner.
pub struct Source {
    pub origin: String,
    pub contents: String,
}

pub fn load_source(path: &str) -> anyhow::Result<Rc<Source>> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path))?;
    Ok(Rc::new(Source {
        origin: path.to_string(),
        contents,
    }))
}

pub fn synthetic_source(text: &str) -> Rc<Source> {
    Rc::new(Source {
        origin: String::new(),
        contents: text.to_string(),
    })
}

/// A half-open byte range into a source. Locations widen as parsing
/// progresses; `extend` and `range` only combine locations from the same
/// source.
#[derive(Clone)]
pub struct Location {
    pub source: Rc<Source>,
    pub start: usize,
    pub end: usize,
}

impl Location {
    pub fn new(source: Rc<Source>, start: usize, end: usize) -> Self {
        Location { source, start, end }
    }

    pub fn view(&self) -> &str {
        &self.source.contents[self.start..self.end]
    }

    /// Widen this location's end to cover `other`.
    pub fn extend(&mut self, other: &Location) {
        if Rc::ptr_eq(&self.source, &other.source) && other.end > self.end {
            self.end = other.end;
        }
    }

    /// A location spanning from this location's start to `other`'s end.
    pub fn range(&self, other: &Location) -> Location {
        let mut loc = self.clone();
        loc.extend(other);
        loc
    }

    pub fn line_col(&self) -> (usize, usize) {
        let before = &self.source.contents[..self.start.min(self.source.contents.len())];
        let line = before.bytes().filter(|&b| b == b'\n').count() + 1;
        let col = before
            .rfind('\n')
            .map(|i| self.start - i)
            .unwrap_or(self.start + 1);
        (line, col)
    }

    /// The source line containing the start of this location, plus an
    /// underline marking the located range within it.
    pub fn text(&self) -> String {
        let contents = &self.source.contents;
        let start = self.start.min(contents.len());
        let line_start = contents[..start].rfind('\n').map(|i| i + 1).unwrap_or(0);
        let line_end = contents[line_start..]
            .find('\n')
            .map(|i| line_start + i)
            .unwrap_or(contents.len());
        let line = &contents[line_start..line_end];

        let mut underline = String::new();
        for _ in line_start..start {
            underline.push(' ');
        }
        let marked = self.end.min(line_end).max(start + 1) - start;
        for _ in 0..marked {
            underline.push('^');
        }
        format!("  {}\n  {}", line, underline)
    }
}

impl PartialEq for Location {
    fn eq(&self, other: &Self) -> bool {
        self.view() == other.view()
    }
}

impl Eq for Location {}

impl PartialEq<str> for Location {
    fn eq(&self, other: &str) -> bool {
        self.view() == other
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.source.origin.is_empty() {
            return write!(f, "(internal):{}", self.view());
        }
        let (line, col) = self.line_col();
        write!(f, "{}:{}:{}", self.source.origin, line, col)
    }
}

impl fmt::Debug for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:?}", self, self.view())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn line_col_counts_from_one() {
        let src = Rc::new(Source {
            origin: "test.quill".to_string(),
            contents: "class A {}\nclass B {}\n".to_string(),
        });
        let loc = Location::new(src.clone(), 17, 18);
        assert_eq!(loc.view(), "B");
        assert_eq!(loc.line_col(), (2, 7));
        assert_eq!(loc.to_string(), "test.quill:2:7");
    }

    #[test]
    fn text_underlines_the_range() {
        let src = Rc::new(Source {
            origin: "test.quill".to_string(),
            contents: "let xyz = 1".to_string(),
        });
        let loc = Location::new(src, 4, 7);
        assert_eq!(loc.text(), "  let xyz = 1\n      ^^^");
    }

    #[test]
    fn extend_ignores_other_sources() {
        let a = synthetic_source("apply");
        let b = synthetic_source("create");
        let mut loc = Location::new(a, 0, 5);
        loc.extend(&Location::new(b, 0, 6));
        assert_eq!(loc.end, 5);
    }
}
