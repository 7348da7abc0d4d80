//! Ledger windows and the contiguity rule between checkpoints

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WindowError {
    #[error("window size must be at least 1")]
    ZeroSize,

    #[error("window starting at {starting_index} with size {tree_size} overflows the ledger index")]
    Overflow { starting_index: u64, tree_size: u64 },

    #[error("window starting at {requested} does not chain from last committed {}; expected start {expected}", DisplayLast(.last))]
    NotContiguous {
        expected: u64,
        requested: u64,
        last: Option<Window>,
    },
}

struct DisplayLast<'a>(&'a Option<Window>);

impl fmt::Display for DisplayLast<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(w) => write!(f, "{w}"),
            None => f.write_str("(none)"),
        }
    }
}

/// Half-open ledger range `[starting_index, starting_index + tree_size)`
///
/// Deserialization goes through [`Window::new`], so a stored window is
/// never empty and its end never overflows.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "WindowFields")]
pub struct Window {
    pub starting_index: u64,
    pub tree_size: u64,
}

#[derive(Deserialize)]
struct WindowFields {
    starting_index: u64,
    tree_size: u64,
}

impl TryFrom<WindowFields> for Window {
    type Error = WindowError;

    fn try_from(f: WindowFields) -> Result<Self, WindowError> {
        Window::new(f.starting_index, f.tree_size)
    }
}

impl Window {
    pub fn new(starting_index: u64, tree_size: u64) -> Result<Self, WindowError> {
        if tree_size == 0 {
            return Err(WindowError::ZeroSize);
        }
        if starting_index.checked_add(tree_size).is_none() {
            return Err(WindowError::Overflow { starting_index, tree_size });
        }
        Ok(Self { starting_index, tree_size })
    }

    /// One past the last ledger index covered
    pub fn end(&self) -> u64 {
        self.starting_index + self.tree_size
    }

    pub fn contains(&self, ledger_index: u64) -> bool {
        ledger_index >= self.starting_index && ledger_index < self.end()
    }

    /// Ledger index of the leaf at `leaf_index` within this window
    pub fn ledger_index(&self, leaf_index: usize) -> u64 {
        self.starting_index + leaf_index as u64
    }

    pub fn follows(&self, previous: &Window) -> bool {
        self.starting_index == previous.end()
    }

    /// Shrink to `len` leaves (a short ledger read ends the window early)
    pub fn truncated(self, len: u64) -> Self {
        Self {
            starting_index: self.starting_index,
            tree_size: self.tree_size.min(len),
        }
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.starting_index, self.end())
    }
}

fn contiguous_start(last: Option<&Window>) -> u64 {
    last.map(Window::end).unwrap_or(0)
}

/// Window for the next checkpoint after `last` (or from 0 if nothing was committed)
pub fn next_window(last: Option<&Window>, requested_size: u64) -> Result<Window, WindowError> {
    Window::new(contiguous_start(last), requested_size)
}

/// Check an operator-supplied window against the last committed one
pub fn validate_window(last: Option<&Window>, requested: Window) -> Result<Window, WindowError> {
    let expected = contiguous_start(last);
    if requested.starting_index != expected {
        return Err(WindowError::NotContiguous {
            expected,
            requested: requested.starting_index,
            last: last.copied(),
        });
    }
    Window::new(requested.starting_index, requested.tree_size)
}
