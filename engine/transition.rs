use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// States of the illness-death process. `Dead` is absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum State {
    Healthy,
    Relapsed,
    Dead,
}

impl State {
    pub const ALL: [State; 3] = [State::Healthy, State::Relapsed, State::Dead];

    /// Zero-based row/column position in a transition probability matrix.
    #[inline]
    pub fn index(self) -> usize {
        match self {
            State::Healthy => 0,
            State::Relapsed => 1,
            State::Dead => 2,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            State::Healthy => "healthy",
            State::Relapsed => "relapsed",
            State::Dead => "dead",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The three fixed transitions. Each one is fitted separately; the engine only
/// composes their marginal cumulative hazards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Transition {
    #[serde(rename = "1->2")]
    Relapse,
    #[serde(rename = "1->3")]
    DirectDeath,
    #[serde(rename = "2->3")]
    DeathAfterRelapse,
}

impl Transition {
    pub const ALL: [Transition; 3] = [
        Transition::Relapse,
        Transition::DirectDeath,
        Transition::DeathAfterRelapse,
    ];

    #[inline]
    pub fn index(self) -> usize {
        match self {
            Transition::Relapse => 0,
            Transition::DirectDeath => 1,
            Transition::DeathAfterRelapse => 2,
        }
    }

    pub fn from_state(self) -> State {
        match self {
            Transition::Relapse | Transition::DirectDeath => State::Healthy,
            Transition::DeathAfterRelapse => State::Relapsed,
        }
    }

    pub fn to_state(self) -> State {
        match self {
            Transition::Relapse => State::Relapsed,
            Transition::DirectDeath | Transition::DeathAfterRelapse => State::Dead,
        }
    }

    /// Every transition leaving the same origin state, including `self`.
    pub fn competing(self) -> &'static [Transition] {
        match self.from_state() {
            State::Healthy => &[Transition::Relapse, Transition::DirectDeath],
            _ => &[Transition::DeathAfterRelapse],
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Transition::Relapse => "1->2",
            Transition::DirectDeath => "1->3",
            Transition::DeathAfterRelapse => "2->3",
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Transition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1->2" | "12" | "relapse" => Ok(Transition::Relapse),
            "1->3" | "13" | "direct-death" => Ok(Transition::DirectDeath),
            "2->3" | "23" | "death-after-relapse" => Ok(Transition::DeathAfterRelapse),
            other => Err(format!("unknown transition '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn competing_transitions_share_origin() {
        for transition in Transition::ALL {
            for other in transition.competing() {
                assert_eq!(other.from_state(), transition.from_state());
            }
            assert!(transition.competing().contains(&transition));
        }
        assert_eq!(Transition::Relapse.competing().len(), 2);
        assert_eq!(Transition::DeathAfterRelapse.competing().len(), 1);
    }

    #[test]
    fn labels_parse_back() {
        for transition in Transition::ALL {
            assert_eq!(transition.label().parse::<Transition>().unwrap(), transition);
        }
        assert!("3->1".parse::<Transition>().is_err());
    }

    #[test]
    fn indices_are_dense() {
        let mut seen = [false; 3];
        for state in State::ALL {
            seen[state.index()] = true;
        }
        assert!(seen.iter().all(|&v| v));
        assert_eq!(Transition::DeathAfterRelapse.to_state(), State::Dead);
    }
}
