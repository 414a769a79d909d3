use std::fmt;

use crate::platform::Reaction;

/// Points awarded by one rating reaction. Zero is an explicit "no reward" rating.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Score(u8);

#[cfg(test)]
impl Score {
    pub const ZERO: Score = Score(0);
    pub const MAX: u8 = 9;

    pub fn new(value: u8) -> Option<Self> {
        (value <= Self::MAX).then_some(Self(value))
    }
}

impl Score {
    pub fn points(&self) -> u64 {
        u64::from(self.0)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

const RATING_SYMBOLS: [(&str, u8); 10] = [
    ("x_", 0),
    ("1\u{fe0f}\u{20e3}", 1),
    ("2\u{fe0f}\u{20e3}", 2),
    ("3\u{fe0f}\u{20e3}", 3),
    ("4\u{fe0f}\u{20e3}", 4),
    ("5\u{fe0f}\u{20e3}", 5),
    ("6\u{fe0f}\u{20e3}", 6),
    ("7\u{fe0f}\u{20e3}", 7),
    ("8\u{fe0f}\u{20e3}", 8),
    ("9\u{fe0f}\u{20e3}", 9),
];

/// Maps reaction symbols to scores: the `x_` guild emoji for zero, keycaps one through nine.
#[derive(Debug, Clone, Copy, Default)]
pub struct RatingEmojiTable;

impl RatingEmojiTable {
    pub fn score(&self, symbol: &str) -> Option<Score> {
        RATING_SYMBOLS
            .iter()
            .find(|(s, _)| *s == symbol)
            .map(|(_, value)| Score(*value))
    }

    pub fn is_rating(&self, symbol: &str) -> bool {
        self.score(symbol).is_some()
    }

    /// First reaction, in the platform's order, whose symbol is a rating symbol
    pub fn first_rating<'a>(&self, reactions: &'a [Reaction]) -> Option<(&'a Reaction, Score)> {
        reactions
            .iter()
            .find_map(|r| self.score(r.emoji.name()).map(|score| (r, score)))
    }
}
