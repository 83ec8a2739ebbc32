// File: src/error.rs
//
// `Objection` is the single error kind (§7): compile-time errors carry a
// one-frame trace with just the offending line; runtime errors carry the
// synthesized call trace built while unwinding the VM. `Display` follows
// the teacher's `errors.rs`: a colored kind/message line, then one
// `at <name> (line N)` line per frame, innermost first, embedded frames
// elided.

use crate::object::{Objection, TraceFrame};
use colored::Colorize;
use std::fmt;

impl fmt::Display for Objection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} {}", "Objection:".red().bold(), self.message)?;
        for frame in self.trace.iter().filter(|fr| !fr.embedded) {
            writeln!(f, "  {} {} (line {})", "at".dimmed(), frame.name, frame.line)?;
        }
        Ok(())
    }
}

impl std::error::Error for Objection {}

impl Objection {
    pub fn compile_error(message: impl Into<String>, line: u32) -> Self {
        Objection {
            message: message.into().into_boxed_str(),
            trace: vec![TraceFrame {
                name: "<compile>".into(),
                line,
                embedded: false,
            }],
        }
    }

    pub fn push_frame(&mut self, name: impl Into<Box<str>>, line: u32, embedded: bool) {
        self.trace.push(TraceFrame {
            name: name.into(),
            line,
            embedded,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_elides_embedded_frames() {
        let mut o = Objection::new("bad stuff");
        o.push_frame("h", 3, false);
        o.push_frame("_forEachBody", 3, true);
        o.push_frame("_MAIN", 1, false);
        let rendered = format!("{}", o);
        assert!(rendered.contains("h"));
        assert!(rendered.contains("_MAIN"));
        assert!(!rendered.contains("_forEachBody"));
    }
}
