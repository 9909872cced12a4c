//! Test report assembly
//!
//! A report is an ordered list of sections, one per phase. Each append is
//! written and flushed straight away so a run that dies halfway still
//! leaves the sections it finished on disk.

use std::fmt;
use std::io::Write;

use crate::Result;

/// Terminal marker of a report section
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Marker {
    /// The phase converged
    Success,
    /// The phase did not converge or found problems
    Failed,
}

impl Marker {
    /// Literal text written to the report
    pub fn as_str(&self) -> &'static str {
        match self {
            Marker::Success => "success!",
            Marker::Failed => "failed",
        }
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One phase's section: a header label and its lines
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReportSection {
    /// Header label, written as `<header>:`
    pub header: String,
    /// Body lines in append order
    pub lines: Vec<String>,
    /// Terminal marker, once recorded
    pub marker: Option<Marker>,
}

/// In-memory view of everything written so far
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TestReport {
    /// Sections in append order
    pub sections: Vec<ReportSection>,
}

impl TestReport {
    /// Find a section by header label
    pub fn section(&self, header: &str) -> Option<&ReportSection> {
        self.sections.iter().find(|s| s.header == header)
    }
}

/// Append-only writer for a [`TestReport`]
pub struct ReportWriter<W: Write> {
    sink: W,
    report: TestReport,
}

impl<W: Write> ReportWriter<W> {
    /// Wrap a sink (usually the report file)
    pub fn new(sink: W) -> Self {
        Self {
            sink,
            report: TestReport::default(),
        }
    }

    /// Start a new section
    pub fn begin_section(&mut self, header: &str) -> Result<()> {
        self.emit(&format!("{}:\n", header))?;
        self.report.sections.push(ReportSection {
            header: header.to_string(),
            ..Default::default()
        });
        Ok(())
    }

    /// Append a body line to the current section
    pub fn line(&mut self, text: &str) -> Result<()> {
        self.emit(&format!("{}\n", text))?;
        if let Some(section) = self.report.sections.last_mut() {
            section.lines.push(text.to_string());
        }
        Ok(())
    }

    /// Close the current section with a marker followed by a blank line
    pub fn finish_section(&mut self, marker: Marker) -> Result<()> {
        self.emit(&format!("{}\n\n", marker))?;
        if let Some(section) = self.report.sections.last_mut() {
            section.marker = Some(marker);
        }
        Ok(())
    }

    /// Everything recorded so far
    pub fn report(&self) -> &TestReport {
        &self.report
    }

    /// Give back the sink, e.g. to inspect an in-memory buffer
    pub fn into_inner(self) -> W {
        self.sink
    }

    fn emit(&mut self, text: &str) -> Result<()> {
        self.sink.write_all(text.as_bytes())?;
        self.sink.flush()?;
        Ok(())
    }
}
