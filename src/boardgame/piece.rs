//! Per-piece state: `home`, `active`, `safe_zone`, or `finished`.

use serde::{Deserialize, Serialize};

use super::board::{Colour, FINISH_STEP, RING_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PieceStatus {
    Home,
    Active,
    SafeZone,
    Finished,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Piece {
    pub colour: Colour,
    pub piece_id: u8,
    /// Local path position: `0` is a colour's start cell, `RING_SIZE..
    /// FINISH_STEP` is the home stretch, `FINISH_STEP` is finished.
    /// Only meaningful when `status != Home`.
    pub local_step: u8,
    pub status: PieceStatus,
}

impl Piece {
    pub fn new_at_home(colour: Colour, piece_id: u8) -> Self {
        Piece {
            colour,
            piece_id,
            local_step: 0,
            status: PieceStatus::Home,
        }
    }

    pub fn ring_cell(&self) -> Option<u8> {
        if self.status == PieceStatus::Active && self.local_step < RING_SIZE {
            Some(super::board::ring_cell_for(self.colour, self.local_step))
        } else {
            None
        }
    }

    /// Computes the would-be `local_step` after advancing by `roll`, and
    /// whether that lands exactly on a legal square (home-stretch
    /// overshoot is illegal).
    pub fn proposed_step(&self, roll: u8) -> Option<u8> {
        match self.status {
            PieceStatus::Home => {
                if roll == 6 {
                    Some(0)
                } else {
                    None
                }
            }
            PieceStatus::Active | PieceStatus::SafeZone => {
                let next = self.local_step + roll;
                if next <= FINISH_STEP {
                    Some(next)
                } else {
                    None
                }
            }
            PieceStatus::Finished => None,
        }
    }

    /// Applies a previously-validated `proposed_step`, updating `status`
    /// to match the new local position.
    pub fn apply_step(&mut self, new_step: u8) {
        self.local_step = new_step;
        self.status = if new_step == FINISH_STEP {
            PieceStatus::Finished
        } else if new_step >= RING_SIZE {
            PieceStatus::SafeZone
        } else {
            PieceStatus::Active
        };
    }

    pub fn send_home(&mut self) {
        self.local_step = 0;
        self.status = PieceStatus::Home;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_piece_at_home_only_leaves_on_a_six() {
        let piece = Piece::new_at_home(Colour::Red, 0);
        assert_eq!(piece.proposed_step(6), Some(0));
        assert_eq!(piece.proposed_step(5), None);
    }

    #[test]
    fn overshooting_the_finish_has_no_legal_move() {
        let mut piece = Piece::new_at_home(Colour::Red, 0);
        piece.apply_step(RING_SIZE + 3); // 3 steps into the 5-cell stretch
        assert_eq!(piece.proposed_step(6), None);
        assert_eq!(piece.proposed_step(2), Some(super::super::board::FINISH_STEP));
    }

    #[test]
    fn landing_exactly_on_the_finish_marks_the_piece_finished() {
        let mut piece = Piece::new_at_home(Colour::Red, 0);
        piece.apply_step(super::super::board::FINISH_STEP);
        assert_eq!(piece.status, PieceStatus::Finished);
    }
}
