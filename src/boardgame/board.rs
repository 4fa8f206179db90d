//! Fixed geometry of the 52-cell ring and its per-colour home stretches
//!.

use serde::{Deserialize, Serialize};

/// Cells on the shared ring.
pub const RING_SIZE: u8 = 52;
/// Cells in a colour's private home stretch, not counting the finish.
pub const HOME_STRETCH_LEN: u8 = 5;
/// A piece's local path position once it finishes (57 = 52 ring steps,
/// 0-indexed through 51, plus 5 stretch cells, plus the finish itself).
pub const FINISH_STEP: u8 = RING_SIZE + HOME_STRETCH_LEN;
pub const PIECES_PER_PLAYER: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Colour {
    Red,
    Blue,
    Green,
    Yellow,
}

impl Colour {
    pub const ALL: [Colour; 4] = [Colour::Red, Colour::Blue, Colour::Green, Colour::Yellow];

    /// Ring cell a colour's pieces leave home onto.
    pub fn start_cell(self) -> u8 {
        match self {
            Colour::Red => 0,
            Colour::Blue => 13,
            Colour::Green => 26,
            Colour::Yellow => 39,
        }
    }

    pub fn for_seat(seat: usize) -> Colour {
        Colour::ALL[seat % Colour::ALL.len()]
    }
}

/// Fixed set of cells no capture may occur on.
pub const SAFE_CELLS: [u8; 8] = [0, 8, 13, 21, 26, 34, 39, 47];

pub fn is_safe_cell(ring_cell: u8) -> bool {
    SAFE_CELLS.contains(&ring_cell)
}

/// Maps a piece's local path step (0 = just left home, at its colour's
/// start cell) to a global ring cell. Only meaningful while
/// `local_step <= RING_SIZE - 1`; beyond that the piece is in its
/// private home stretch and has no ring cell.
pub fn ring_cell_for(colour: Colour, local_step: u8) -> u8 {
    debug_assert!(local_step < RING_SIZE);
    (colour.start_cell() as u16 + local_step as u16).rem_euclid(RING_SIZE as u16) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_cells_match_colour_layout() {
        assert_eq!(Colour::Red.start_cell(), 0);
        assert_eq!(Colour::Blue.start_cell(), 13);
        assert_eq!(Colour::Green.start_cell(), 26);
        assert_eq!(Colour::Yellow.start_cell(), 39);
    }

    #[test]
    fn ring_cell_wraps_around() {
        // Yellow's 51st step lands one cell before its own start (the
        // home-stretch entry cell).
        assert_eq!(ring_cell_for(Colour::Yellow, 51), 38);
    }

    #[test]
    fn safe_cells_are_the_documented_set() {
        for c in SAFE_CELLS {
            assert!(is_safe_cell(c));
        }
        assert!(!is_safe_cell(1));
    }
}
