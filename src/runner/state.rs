use std::fmt;

/// Scheduler state
///
/// Happy path is `Disconnected -> Discovering -> Collecting`. Any failure
/// while connected goes through `Resetting` back to `Disconnected`, and a
/// due rediscovery goes `Collecting -> Discovering -> Collecting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    /// Initial state, no connection held
    Disconnected,
    /// Connected, mapping remote objects to metric sources
    Discovering,
    /// Sampling the current sources on a fixed delay
    Collecting,
    /// Tearing the connection down before starting over
    Resetting,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::Disconnected => "DISCONNECTED",
            State::Discovering => "DISCOVERING",
            State::Collecting => "COLLECTING",
            State::Resetting => "RESETTING",
        };
        f.write_str(name)
    }
}

/// Outcome of the work done in one state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    Connected,
    ConnectFailed,
    Discovered,
    DiscoveryFailed,
    RediscoveryDue,
    Collected,
    CollectionFailed,
    Released,
}

/// Next state for an event; events that do not apply leave the state alone
pub fn transition(state: State, event: Event) -> State {
    use Event::*;
    use State::*;

    match (state, event) {
        (Disconnected, Connected) => Discovering,
        (Disconnected, ConnectFailed) => Disconnected,
        (Discovering, Discovered) => Collecting,
        (Discovering, DiscoveryFailed) => Resetting,
        (Collecting, RediscoveryDue) => Discovering,
        (Collecting, Collected) => Collecting,
        (Collecting, CollectionFailed) => Resetting,
        (Resetting, Released) => Disconnected,
        (state, _) => state,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let state = transition(State::Disconnected, Event::Connected);
        assert_eq!(state, State::Discovering);
        let state = transition(state, Event::Discovered);
        assert_eq!(state, State::Collecting);
        assert_eq!(transition(state, Event::Collected), State::Collecting);
    }

    #[test]
    fn test_failures_reset() {
        assert_eq!(
            transition(State::Discovering, Event::DiscoveryFailed),
            State::Resetting
        );
        assert_eq!(
            transition(State::Collecting, Event::CollectionFailed),
            State::Resetting
        );
        assert_eq!(
            transition(State::Resetting, Event::Released),
            State::Disconnected
        );
        assert_eq!(
            transition(State::Disconnected, Event::ConnectFailed),
            State::Disconnected
        );
    }

    #[test]
    fn test_rediscovery() {
        assert_eq!(
            transition(State::Collecting, Event::RediscoveryDue),
            State::Discovering
        );
    }

    #[test]
    fn test_unrelated_events_are_ignored() {
        assert_eq!(
            transition(State::Disconnected, Event::Collected),
            State::Disconnected
        );
        assert_eq!(
            transition(State::Resetting, Event::Connected),
            State::Resetting
        );
        assert_eq!(
            transition(State::Discovering, Event::RediscoveryDue),
            State::Discovering
        );
        assert_eq!(
            transition(State::Collecting, Event::Released),
            State::Collecting
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(State::Collecting.to_string(), "COLLECTING");
    }
}
