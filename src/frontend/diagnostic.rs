use std::io::{self, Write};

use super::source::Location;

/// A secondary location/message pair attached to a diagnostic, e.g. the
/// site of a previous definition. Notes without a location render as bare
/// text lines.
pub struct Note {
    pub location: Option<Location>,
    pub message: String,
}

pub struct Diagnostic {
    pub location: Option<Location>,
    pub message: String,
    pub notes: Vec<Note>,
}

impl Diagnostic {
    pub fn new(location: Option<Location>, message: impl Into<String>) -> Self {
        Diagnostic {
            location,
            message: message.into(),
            notes: Vec::new(),
        }
    }

    pub fn note(mut self, location: Location, message: impl Into<String>) -> Self {
        self.notes.push(Note {
            location: Some(location),
            message: message.into(),
        });
        self
    }

    pub fn plain_note(mut self, message: impl Into<String>) -> Self {
        self.notes.push(Note {
            location: None,
            message: message.into(),
        });
        self
    }
}

#[derive(Default)]
pub struct Diagnostics {
    pub items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn push(&mut self, diag: Diagnostic) {
        self.items.push(diag);
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn render(&self, out: &mut dyn Write) -> io::Result<()> {
        for diag in &self.items {
            writeln!(out, "--------")?;
            write_entry(out, diag.location.as_ref(), &diag.message)?;
            for note in &diag.notes {
                write_entry(out, note.location.as_ref(), &note.message)?;
            }
        }
        Ok(())
    }
}

fn write_entry(out: &mut dyn Write, location: Option<&Location>, message: &str) -> io::Result<()> {
    match location {
        Some(loc) => {
            writeln!(out, "{}: {}", loc, message)?;
            writeln!(out, "{}", loc.text())
        }
        None => writeln!(out, "{}", message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::source::Location;
    use std::rc::Rc;

    #[test]
    fn render_includes_all_locations() {
        let src = Rc::new(crate::frontend::source::Source {
            origin: "a.quill".to_string(),
            contents: "class C {}".to_string(),
        });
        let first = Location::new(src.clone(), 6, 7);
        let second = Location::new(src, 6, 7);

        let mut diags = Diagnostics::default();
        diags.push(
            Diagnostic::new(Some(first), "there is a previous definition of \"C\"")
                .note(second, "the previous definition is here"),
        );

        let mut out = Vec::new();
        diags.render(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("--------\n"));
        assert!(text.contains("a.quill:1:7: there is a previous definition of \"C\""));
        assert!(text.contains("the previous definition is here"));
        assert!(text.matches("class C {}").count() == 2);
    }
}
