use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A realtime subscription group.
///
/// Rooms are not stored; a room exists while at least one connection has
/// joined it. The textual form is part of the client contract:
/// `project:{id}`, `issue:{id}`, `user:{id}`, and the empty string for the
/// no-key room that contains every live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RoomKey {
    Global,
    Project(i64),
    Issue(i64),
    User(i64),
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoomKey::Global => Ok(()),
            RoomKey::Project(id) => write!(f, "project:{}", id),
            RoomKey::Issue(id) => write!(f, "issue:{}", id),
            RoomKey::User(id) => write!(f, "user:{}", id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed room key: {0:?}")]
pub struct MalformedRoomKey(pub String);

impl FromStr for RoomKey {
    type Err = MalformedRoomKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Ok(RoomKey::Global);
        }

        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| MalformedRoomKey(s.to_string()))?;
        let id: i64 = id.parse().map_err(|_| MalformedRoomKey(s.to_string()))?;

        match kind {
            "project" => Ok(RoomKey::Project(id)),
            "issue" => Ok(RoomKey::Issue(id)),
            "user" => Ok(RoomKey::User(id)),
            _ => Err(MalformedRoomKey(s.to_string())),
        }
    }
}

impl Serialize for RoomKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RoomKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_names_match_client_contract() {
        assert_eq!(RoomKey::Project(7).to_string(), "project:7");
        assert_eq!(RoomKey::Issue(12).to_string(), "issue:12");
        assert_eq!(RoomKey::User(3).to_string(), "user:3");
        assert_eq!(RoomKey::Global.to_string(), "");
    }

    #[test]
    fn parses_room_names() {
        assert_eq!("project:7".parse::<RoomKey>().unwrap(), RoomKey::Project(7));
        assert_eq!("".parse::<RoomKey>().unwrap(), RoomKey::Global);
        assert!("project:".parse::<RoomKey>().is_err());
        assert!("team:4".parse::<RoomKey>().is_err());
        assert!("7".parse::<RoomKey>().is_err());
    }

    #[test]
    fn serializes_as_plain_string() {
        let json = serde_json::to_string(&RoomKey::Issue(5)).unwrap();
        assert_eq!(json, "\"issue:5\"");
        let back: RoomKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, RoomKey::Issue(5));
    }
}
