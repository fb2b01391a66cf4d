//! Client-side room membership bookkeeping.
//!
//! Membership is optimistic: the server never acknowledges joins or leaves,
//! so this only records what the client has asked for.

#[derive(Debug, Default)]
pub(crate) struct RoomRegistry {
    /// Joined rooms in the order they were first joined.
    joined: Vec<String>,
}

impl RoomRegistry {
    /// Record a join. Returns `false` if the room was already joined.
    pub(crate) fn join(&mut self, room: &str) -> bool {
        if self.contains(room) {
            return false;
        }
        self.joined.push(room.to_string());
        true
    }

    /// Record a leave. Returns `false` if the room was not joined.
    pub(crate) fn leave(&mut self, room: &str) -> bool {
        let before = self.joined.len();
        self.joined.retain(|r| r != room);
        self.joined.len() != before
    }

    pub(crate) fn contains(&self, room: &str) -> bool {
        self.joined.iter().any(|r| r == room)
    }

    pub(crate) fn rooms(&self) -> Vec<String> {
        self.joined.clone()
    }

    /// Rooms to join on a fresh Open, default room first.
    ///
    /// Without `rejoin`, previously joined rooms are forgotten since the new
    /// server session knows nothing about them.
    pub(crate) fn on_open(&mut self, default_room: Option<&str>, rejoin: bool) -> Vec<String> {
        if !rejoin {
            self.joined.clear();
        }
        let mut to_join = Vec::with_capacity(self.joined.len() + 1);
        if let Some(default) = default_room {
            self.join(default);
            to_join.push(default.to_string());
        }
        to_join.extend(
            self.joined
                .iter()
                .filter(|r| Some(r.as_str()) != default_room)
                .cloned(),
        );
        to_join
    }
}
