//! Ordered command sequences handed to the streamer.
//!
//! A [`Program`] is fixed once built. It can come from G-code text, a file,
//! or a plotted path of vertices.
//!
//! # Example
//!
//! ```
//! use sandtable_streamer::{Program, Vertex, PlotOptions};
//!
//! let program = Program::from_text("G28\n\nG1 X0 Y0\n");
//! assert_eq!(program.len(), 2);
//!
//! let path = [Vertex::new(0.0, 0.0), Vertex::new(10.0, -5.0)];
//! let program = Program::from_vertices(&path, PlotOptions::centered(200.0, 200.0));
//! assert_eq!(program.get(1).unwrap().as_str(), "G1 X110.000 Y95.000");
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::path::Path;

use crate::error::Result;
use crate::protocol::CommandLine;

// ============================================================================
// Program
// ============================================================================

/// An ordered, immutable sequence of command lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Program {
    lines: Vec<CommandLine>,
}

impl Program {
    /// Creates a program from lines, kept exactly as given.
    #[must_use]
    pub fn new(lines: impl IntoIterator<Item = impl Into<CommandLine>>) -> Self {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
        }
    }

    /// Parses G-code text: one command per line, whitespace trimmed,
    /// blank lines dropped.
    #[must_use]
    pub fn from_text(text: &str) -> Self {
        Self::new(
            text.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty()),
        )
    }

    /// Reads and parses a G-code file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`](crate::Error::Io) if the file cannot be read.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(Self::from_text(&text))
    }

    /// Converts a plotted path into linear moves.
    ///
    /// Each vertex becomes `G1 X<x> Y<y>` with three decimals after the
    /// offsets are applied.
    #[must_use]
    pub fn from_vertices(vertices: &[Vertex], options: PlotOptions) -> Self {
        let line = |v: &Vertex| {
            CommandLine::new(format!(
                "G1 X{:.3} Y{:.3}",
                v.x + options.offset_x,
                v.y + options.offset_y
            ))
        };

        let lines = if options.reverse {
            vertices.iter().rev().map(line).collect()
        } else {
            vertices.iter().map(line).collect()
        };

        Self { lines }
    }

    /// Returns the number of lines.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Returns `true` if there are no lines.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Returns the line at `index`.
    #[inline]
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&CommandLine> {
        self.lines.get(index)
    }

    /// Iterates over the lines in order.
    pub fn iter(&self) -> impl Iterator<Item = &CommandLine> {
        self.lines.iter()
    }
}

impl FromIterator<CommandLine> for Program {
    fn from_iter<I: IntoIterator<Item = CommandLine>>(iter: I) -> Self {
        Self {
            lines: iter.into_iter().collect(),
        }
    }
}

// ============================================================================
// Vertex / PlotOptions
// ============================================================================

/// A point on the plotted path, in machine units relative to the centre.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vertex {
    /// X coordinate.
    pub x: f64,
    /// Y coordinate.
    pub y: f64,
}

impl Vertex {
    /// Creates a vertex.
    #[inline]
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// How vertices are placed on the table.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PlotOptions {
    /// Added to every X coordinate.
    pub offset_x: f64,
    /// Added to every Y coordinate.
    pub offset_y: f64,
    /// Emit the path back to front.
    pub reverse: bool,
}

impl PlotOptions {
    /// Offsets that move a centre-origin path onto a table whose origin is
    /// its lower-left corner.
    #[inline]
    #[must_use]
    pub fn centered(width: f64, height: f64) -> Self {
        Self {
            offset_x: width / 2.0,
            offset_y: height / 2.0,
            reverse: false,
        }
    }

    /// Offsets for a polar table of the given radius.
    #[inline]
    #[must_use]
    pub fn polar(max_radius: f64) -> Self {
        Self {
            offset_x: max_radius,
            offset_y: max_radius,
            reverse: false,
        }
    }

    /// Emits the path in reverse order.
    #[inline]
    #[must_use]
    pub fn reversed(mut self) -> Self {
        self.reverse = true;
        self
    }
}

// ============================================================================
// Tests
// ============================================================================
