use crate::BreakpointError;
use std::{fmt, str::FromStr};

/// Gate applied to the hit counter of a breakpoint.
///
/// Hits are counted from 1 and only hits whose condition held are counted.
/// Only two forms are accepted: a bare `N`, which stops on exactly the Nth
/// hit, and `> N`, which stops on every hit after the Nth.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum HitCondition {
    Equal(u64),
    Greater(u64),
}

impl HitCondition {
    pub fn is_satisfied(&self, hit_count: u64) -> bool {
        match *self {
            HitCondition::Equal(n) => hit_count == n,
            HitCondition::Greater(n) => hit_count > n,
        }
    }
}

impl FromStr for HitCondition {
    type Err = BreakpointError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let invalid = || BreakpointError::InvalidHitCondition(text.to_string());
        let trimmed = text.trim();

        if let Some(rest) = trimmed.strip_prefix('>') {
            if rest.starts_with('=') {
                return Err(invalid());
            }
            let threshold = rest.trim().parse::<u64>().map_err(|_| invalid())?;
            return Ok(HitCondition::Greater(threshold));
        }

        match trimmed.parse::<u64>() {
            Ok(0) | Err(_) => Err(invalid()),
            Ok(n) => Ok(HitCondition::Equal(n)),
        }
    }
}

impl fmt::Display for HitCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HitCondition::Equal(n) => write!(f, "{n}"),
            HitCondition::Greater(n) => write!(f, "> {n}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_forms() {
        assert_eq!("5".parse(), Ok(HitCondition::Equal(5)));
        assert_eq!(" 12 ".parse(), Ok(HitCondition::Equal(12)));
        assert_eq!("> 5".parse(), Ok(HitCondition::Greater(5)));
        assert_eq!(">5".parse(), Ok(HitCondition::Greater(5)));
        assert_eq!("> 0".parse(), Ok(HitCondition::Greater(0)));
    }

    #[test]
    fn test_parse_rejects_unsupported_forms() {
        for text in ["", "0", ">= 3", "% 2", "== 4", "< 3", "five", "> -1"] {
            assert_eq!(
                text.parse::<HitCondition>(),
                Err(BreakpointError::InvalidHitCondition(text.to_string())),
                "{text:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_bare_count_stops_once() {
        let condition = HitCondition::Equal(5);
        let stops: Vec<u64> = (1..=10).filter(|hit| condition.is_satisfied(*hit)).collect();
        assert_eq!(stops, vec![5]);
    }

    #[test]
    fn test_greater_stops_after_threshold() {
        let condition = HitCondition::Greater(5);
        let stops: Vec<u64> = (1..=8).filter(|hit| condition.is_satisfied(*hit)).collect();
        assert_eq!(stops, vec![6, 7, 8]);
    }

    #[test]
    fn test_display_round_trips_through_parse() {
        for condition in [HitCondition::Equal(3), HitCondition::Greater(9)] {
            assert_eq!(condition.to_string().parse(), Ok(condition));
        }
    }
}
