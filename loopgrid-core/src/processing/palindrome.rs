use serde::{Deserialize, Serialize};

use crate::models::error::LooperError;

/// Traversal direction of a palindrome sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Forward,
    Reverse,
}

/// Forward-then-backward frame index generator over a frozen frame count.
///
/// For `total = 5` the sequence is `0,1,2,3,4,3,2,1,0,1,2,…`. The end frames
/// are not repeated at the turn. With `total = 1` every index is 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PalindromeSequencer {
    total: usize,
    current: usize,
    direction: Direction,
}

impl PalindromeSequencer {
    pub fn new(total_frames: usize) -> Result<Self, LooperError> {
        if total_frames == 0 {
            return Err(LooperError::Allocation(
                "palindrome sequence needs at least one frame".into(),
            ));
        }
        Ok(Self {
            total: total_frames,
            current: 0,
            direction: Direction::Forward,
        })
    }

    /// Return the current index, then step one position.
    pub fn advance(&mut self) -> usize {
        let index = self.current;
        let total = self.total as isize;
        let mut next = self.current as isize;

        match self.direction {
            Direction::Forward => {
                next += 1;
                if next >= total {
                    self.direction = Direction::Reverse;
                    next = (total - 2).max(0);
                }
            }
            Direction::Reverse => {
                next -= 1;
                if next < 0 {
                    self.direction = Direction::Forward;
                    next = 1.min(total - 1);
                }
            }
        }

        self.current = next as usize;
        index
    }

    pub fn reset(&mut self) {
        self.current = 0;
        self.direction = Direction::Forward;
    }

    pub fn total_frames(&self) -> usize {
        self.total
    }

    /// Index the next `advance()` will return.
    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }
}

impl Iterator for PalindromeSequencer {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        Some(self.advance())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn five_frames() {
        let seq = PalindromeSequencer::new(5).unwrap();
        let got: Vec<usize> = seq.take(11).collect();
        assert_eq!(got, vec![0, 1, 2, 3, 4, 3, 2, 1, 0, 1, 2]);
    }

    #[test]
    fn single_frame_is_constant() {
        let mut seq = PalindromeSequencer::new(1).unwrap();
        for _ in 0..20 {
            assert_eq!(seq.advance(), 0);
        }
    }

    #[test]
    fn two_frames_alternate() {
        let seq = PalindromeSequencer::new(2).unwrap();
        let got: Vec<usize> = seq.take(6).collect();
        assert_eq!(got, vec![0, 1, 0, 1, 0, 1]);
    }

    #[test]
    fn direction_flips_at_ends() {
        let mut seq = PalindromeSequencer::new(3).unwrap();
        assert_eq!(seq.direction(), Direction::Forward);
        seq.advance();
        seq.advance();
        seq.advance(); // returned 2, turned around
        assert_eq!(seq.direction(), Direction::Reverse);
        assert_eq!(seq.current_index(), 1);
    }

    #[test]
    fn reset_restarts() {
        let mut seq = PalindromeSequencer::new(4).unwrap();
        for _ in 0..5 {
            seq.advance();
        }
        seq.reset();
        let got: Vec<usize> = seq.take(4).collect();
        assert_eq!(got, vec![0, 1, 2, 3]);
    }

    #[test]
    fn stays_in_range() {
        for total in 1..8 {
            let seq = PalindromeSequencer::new(total).unwrap();
            assert!(seq.take(100).all(|i| i < total));
        }
    }

    #[test]
    fn zero_frames_rejected() {
        assert!(PalindromeSequencer::new(0).is_err());
    }
}
