//! Column family definitions for the session store
//!
//! Each row kind lives in its own column family. Every key starts with a
//! short tag and the room id, so one room's rows form a contiguous range.

/// Column family for session rows
pub const CF_SESSIONS: &str = "sessions";

/// Column family for player rows
pub const CF_PLAYERS: &str = "players";

/// Column family for night action claims
pub const CF_NIGHT_ACTIONS: &str = "night_actions";

/// Column family for vote claims
pub const CF_VOTES: &str = "votes";

/// Column family for one-shot consumable claims
pub const CF_CONSUMABLES: &str = "consumables";

/// Column family for the append-only action log
pub const CF_ACTION_LOG: &str = "action_log";

/// All column family names
pub const ALL_CFS: &[&str] = &[
    CF_SESSIONS,
    CF_PLAYERS,
    CF_NIGHT_ACTIONS,
    CF_VOTES,
    CF_CONSUMABLES,
    CF_ACTION_LOG,
];

/// Column families holding `{tag}:{room}:...` ranges, with their tag
pub const ROOM_RANGES: &[(&str, &str)] = &[
    (CF_PLAYERS, "player"),
    (CF_NIGHT_ACTIONS, "night"),
    (CF_VOTES, "vote"),
    (CF_CONSUMABLES, "item"),
    (CF_ACTION_LOG, "log"),
];

/// Key builders
pub mod keys {
    pub const SESSION_PREFIX: &str = "sess:";

    pub fn session(room: &str) -> String {
        format!("sess:{}", room)
    }

    pub fn player(room: &str, seat: u16) -> String {
        format!("player:{}:{:04}", room, seat)
    }

    pub fn night_action(room: &str, cycle: u32, action: &str, actor: &str) -> String {
        format!("night:{}:{:06}:{}:{}", room, cycle, action, actor)
    }

    pub fn vote(room: &str, kind: &str, ballot: u32, voter: &str) -> String {
        format!("vote:{}:{}:{:06}:{}", room, kind, ballot, voter)
    }

    pub fn consumable(room: &str, item: &str) -> String {
        format!("item:{}:{}", room, item)
    }

    /// Zero-padded so lexical order is append order
    pub fn log(room: &str, seq: u64) -> String {
        format!("log:{}:{:010}", room, seq)
    }

    /// Prefix covering one room's rows under `tag`
    pub fn room_prefix(tag: &str, room: &str) -> String {
        format!("{}:{}:", tag, room)
    }

    /// Exclusive upper bound of a prefix range
    pub fn prefix_end(prefix: &str) -> Vec<u8> {
        let mut end = prefix.as_bytes().to_vec();
        while let Some(last) = end.pop() {
            if last < u8::MAX {
                end.push(last + 1);
                return end;
            }
        }
        // All 0xFF: unbounded
        vec![u8::MAX; prefix.len() + 1]
    }

    /// Room id from a session key
    pub fn parse_session_room(key: &str) -> Option<&str> {
        key.strip_prefix(SESSION_PREFIX).filter(|r| !r.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_generation() {
        assert_eq!(keys::session("abc"), "sess:abc");
        assert_eq!(keys::player("abc", 3), "player:abc:0003");
        assert_eq!(
            keys::night_action("abc", 2, "heal", "u1"),
            "night:abc:000002:heal:u1"
        );
        assert_eq!(keys::vote("abc", "pack", 7, "u1"), "vote:abc:pack:000007:u1");
        assert_eq!(keys::consumable("abc", "life_potion"), "item:abc:life_potion");
    }

    #[test]
    fn test_log_key_ordering() {
        assert!(keys::log("r", 9) < keys::log("r", 10));
    }

    #[test]
    fn test_prefix_end_bounds_room() {
        let prefix = keys::room_prefix("player", "abc");
        let end = keys::prefix_end(&prefix);
        assert!(keys::player("abc", 9999).as_bytes() < end.as_slice());
        assert!(keys::player("abd", 0).as_bytes() >= end.as_slice());
        assert_eq!(keys::parse_session_room("sess:abc"), Some("abc"));
        assert_eq!(keys::parse_session_room("sess:"), None);
    }
}
