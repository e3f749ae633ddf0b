//! Current-page selection for a whiteboard group.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ParseDirectionError;
use crate::surface::SurfaceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PageDirection {
    Left,
    Right,
}

impl PageDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            PageDirection::Left => "left",
            PageDirection::Right => "right",
        }
    }
}

impl fmt::Display for PageDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PageDirection {
    type Err = ParseDirectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("left") {
            Ok(PageDirection::Left)
        } else if s.eq_ignore_ascii_case("right") {
            Ok(PageDirection::Right)
        } else {
            Err(ParseDirectionError(s.to_string()))
        }
    }
}

/// Replicated page switch. Only the direction travels; receivers apply it
/// against their own current index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageChange {
    pub direction: PageDirection,
}

/// Authoritative page index in `[0, page_count)`.
///
/// Exactly one page is active at a time; the active page is the surface that
/// markers draw on.
#[derive(Debug, Clone)]
pub struct PageSelector {
    current: u32,
    page_count: u32,
}

impl PageSelector {
    /// `page_count` below 1 is raised to 1.
    pub fn new(page_count: u32) -> Self {
        Self {
            current: 0,
            page_count: page_count.max(1),
        }
    }

    pub fn current(&self) -> u32 {
        self.current
    }

    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    pub fn active_surface(&self) -> SurfaceId {
        SurfaceId(self.current)
    }

    /// Index the direction would move to, `None` at the bound.
    pub fn target(&self, direction: PageDirection) -> Option<u32> {
        match direction {
            PageDirection::Left => self.current.checked_sub(1),
            PageDirection::Right => {
                let next = self.current + 1;
                (next < self.page_count).then_some(next)
            }
        }
    }

    /// Move one page. Returns the new index, or `None` (unchanged) at the bound.
    pub fn switch(&mut self, direction: PageDirection) -> Option<u32> {
        let next = self.target(direction)?;
        log::debug!("Page {} -> {} ({})", self.current, next, direction);
        self.current = next;
        Some(next)
    }

    /// `"Page n/N"`, 1-based.
    pub fn page_label(&self) -> String {
        format!("Page {}/{}", self.current + 1, self.page_count)
    }
}
