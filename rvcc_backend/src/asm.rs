//! Assembly output buffer, split by section.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Text,
    Rodata,
    Data,
    Bss,
}

/// Collects emitted lines per section; `to_string` renders the final
/// assembler input.
#[derive(Debug, Default)]
pub struct AsmStream {
    text: Vec<String>,
    rodata: Vec<String>,
    data: Vec<String>,
    bss: Vec<String>,
}

impl AsmStream {
    pub fn new() -> Self {
        Self::default()
    }

    fn buf(&mut self, section: Section) -> &mut Vec<String> {
        match section {
            Section::Text => &mut self.text,
            Section::Rodata => &mut self.rodata,
            Section::Data => &mut self.data,
            Section::Bss => &mut self.bss,
        }
    }

    pub fn line(&mut self, section: Section, line: impl Into<String>) {
        self.buf(section).push(line.into());
    }

    /// An instruction or directive, indented.
    pub fn code(&mut self, line: impl fmt::Display) {
        self.text.push(format!("\t{}", line));
    }

    pub fn label(&mut self, section: Section, label: &str) {
        self.buf(section).push(format!("{}:", label));
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.rodata.is_empty() && self.data.is_empty() && self.bss.is_empty()
    }
}

impl fmt::Display for AsmStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sections = [
            (".text", &self.text),
            (".section .rodata", &self.rodata),
            (".data", &self.data),
            (".bss", &self.bss),
        ];
        for (header, lines) in sections {
            if lines.is_empty() {
                continue;
            }
            writeln!(f, "{}", header)?;
            for line in lines {
                writeln!(f, "{}", line)?;
            }
        }
        Ok(())
    }
}
