//! The incision scale: how safe it is to cut the document between two units.
//!
//! Every unit carries an incision at its start and at its end. Two adjacent
//! units combine the left unit's end and the right unit's start into a *join
//! level*; the higher the join level, the stronger the evidence that the
//! boundary is not a real cut and the content should travel together.

use crate::error::InciseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lowest possible join level. Also the level of the root segment.
pub const FLOOR_LEVEL: i32 = -1;

/// Ordinal confidence at one side of a unit boundary.
///
/// Ordered from lowest to highest grouping affinity.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum Incision {
    /// Nothing may be joined across this side (document edges, index gaps).
    Impossible,
    /// No evidence either way.
    #[default]
    Uncertain,
    /// The text probably continues across the boundary.
    MostLikely,
    /// The text definitely continues across the boundary.
    MustBe,
}

impl Incision {
    pub const fn value(self) -> i32 {
        match self {
            Incision::Impossible => -1,
            Incision::Uncertain => 0,
            Incision::MostLikely => 1,
            Incision::MustBe => 2,
        }
    }

    /// Join level of a boundary: `max(-1, left_end + right_start)`.
    pub fn join(left_end: Incision, right_start: Incision) -> i32 {
        (left_end.value() + right_start.value()).max(FLOOR_LEVEL)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Incision::Impossible => "impossible",
            Incision::Uncertain => "uncertain",
            Incision::MostLikely => "most-likely",
            Incision::MustBe => "must-be",
        }
    }
}

impl fmt::Display for Incision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Incision {
    type Err = InciseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "impossible" | "-1" => Ok(Incision::Impossible),
            "uncertain" | "0" => Ok(Incision::Uncertain),
            "most-likely" | "most_likely" | "1" => Ok(Incision::MostLikely),
            "must-be" | "must_be" | "2" => Ok(Incision::MustBe),
            other => Err(InciseError::malformed(
                "incision",
                format!("unknown incision '{other}'"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_follows_affinity() {
        assert!(Incision::Impossible < Incision::Uncertain);
        assert!(Incision::Uncertain < Incision::MostLikely);
        assert!(Incision::MostLikely < Incision::MustBe);
    }

    #[test]
    fn join_is_floored() {
        assert_eq!(Incision::join(Incision::Impossible, Incision::Impossible), -1);
        assert_eq!(Incision::join(Incision::Impossible, Incision::Uncertain), -1);
        assert_eq!(Incision::join(Incision::Uncertain, Incision::MostLikely), 1);
        assert_eq!(Incision::join(Incision::MustBe, Incision::MustBe), 4);
        // One forced side does not cancel a strong other side.
        assert_eq!(Incision::join(Incision::Impossible, Incision::MustBe), 1);
    }

    #[test]
    fn parse_names_and_numbers() {
        assert_eq!("must-be".parse::<Incision>().unwrap(), Incision::MustBe);
        assert_eq!("Most_Likely".parse::<Incision>().unwrap(), Incision::MostLikely);
        assert_eq!("-1".parse::<Incision>().unwrap(), Incision::Impossible);
        assert!("sometimes".parse::<Incision>().is_err());
    }

    #[test]
    fn serde_uses_kebab_case() {
        let json = serde_json::to_string(&Incision::MostLikely).unwrap();
        assert_eq!(json, "\"most-likely\"");
    }
}
