//! Topic identifiers and their broker destinations.

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

const DESTINATION_PREFIX: &str = "/topic/";

/// An addressable channel on the live-update connection
///
/// `Display` renders the short form (`user:42`, `tickets:*`); [`Topic::destination`]
/// renders the broker destination the server publishes on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    User(String),
    Department(String),
    /// Global admin broadcast of every ticket event
    AllTickets,
    Ticket(String),
    /// Any other destination, carried verbatim
    Custom(String),
}

impl Topic {
    pub fn user(id: impl Into<String>) -> Self {
        Topic::User(id.into())
    }

    pub fn department(name: impl Into<String>) -> Self {
        Topic::Department(name.into())
    }

    pub fn ticket(id: impl Into<String>) -> Self {
        Topic::Ticket(id.into())
    }

    pub fn destination(&self) -> String {
        match self {
            Topic::User(id) => format!("{DESTINATION_PREFIX}user/{id}"),
            Topic::Department(name) => format!("{DESTINATION_PREFIX}department/{name}"),
            Topic::AllTickets => format!("{DESTINATION_PREFIX}tickets"),
            Topic::Ticket(id) => format!("{DESTINATION_PREFIX}ticket/{id}"),
            Topic::Custom(raw) => raw.clone(),
        }
    }

    /// Map a broker destination back to its topic
    pub fn from_destination(destination: &str) -> Self {
        let Some(rest) = destination.strip_prefix(DESTINATION_PREFIX) else {
            return Topic::Custom(destination.to_string());
        };

        match rest.split_once('/') {
            Some(("user", id)) if !id.is_empty() => Topic::User(id.to_string()),
            Some(("department", name)) if !name.is_empty() => Topic::Department(name.to_string()),
            Some(("ticket", id)) if !id.is_empty() => Topic::Ticket(id.to_string()),
            None if rest == "tickets" => Topic::AllTickets,
            _ => Topic::Custom(destination.to_string()),
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::User(id) => write!(f, "user:{id}"),
            Topic::Department(name) => write!(f, "department:{name}"),
            Topic::AllTickets => f.write_str("tickets:*"),
            Topic::Ticket(id) => write!(f, "ticket:{id}"),
            Topic::Custom(raw) => f.write_str(raw),
        }
    }
}

impl FromStr for Topic {
    type Err = Infallible;

    /// Accepts the short form or a broker destination
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.starts_with('/') {
            return Ok(Topic::from_destination(s));
        }
        Ok(match s.split_once(':') {
            Some(("user", id)) if !id.is_empty() => Topic::User(id.to_string()),
            Some(("department", name)) if !name.is_empty() => Topic::Department(name.to_string()),
            Some(("tickets", "*")) => Topic::AllTickets,
            Some(("ticket", id)) if !id.is_empty() => Topic::Ticket(id.to_string()),
            _ => Topic::Custom(s.to_string()),
        })
    }
}

/// Lifetime class of a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Restored automatically after every reconnect
    Persistent,
    /// Owned by the active-ticket bridge and torn down on focus change
    Transient,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_form_and_destination() {
        let topic: Topic = "department:IT".parse().unwrap();
        assert_eq!(topic, Topic::department("IT"));
        assert_eq!(topic.to_string(), "department:IT");
        assert_eq!(topic.destination(), "/topic/department/IT");

        assert_eq!("tickets:*".parse::<Topic>().unwrap(), Topic::AllTickets);
        assert_eq!(Topic::AllTickets.destination(), "/topic/tickets");
    }

    #[test]
    fn test_destination_maps_back() {
        for topic in [
            Topic::user("42"),
            Topic::department("IT"),
            Topic::AllTickets,
            Topic::ticket("t9"),
        ] {
            assert_eq!(Topic::from_destination(&topic.destination()), topic);
        }
    }

    #[test]
    fn test_unknown_destinations_stay_custom() {
        assert_eq!(
            Topic::from_destination("/topic/users"),
            Topic::Custom("/topic/users".into())
        );
        assert_eq!(
            "/queue/errors".parse::<Topic>().unwrap(),
            Topic::Custom("/queue/errors".into())
        );
        assert_eq!("user:".parse::<Topic>().unwrap(), Topic::Custom("user:".into()));
    }
}
