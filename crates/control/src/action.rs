use std::collections::HashSet;
use std::fmt;

pub type UserId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Wake,
    Shutdown,
    Sleep,
}

/// Button rows of the control keyboard attached to every status message.
pub const KEYBOARD_LAYOUT: &[&[ActionKind]] = &[
    &[ActionKind::Wake],
    &[ActionKind::Shutdown, ActionKind::Sleep],
];

impl ActionKind {
    pub const ALL: [ActionKind; 3] = [Self::Wake, Self::Shutdown, Self::Sleep];

    /// Identifier carried by the keyboard button.
    pub fn callback_data(self) -> &'static str {
        match self {
            Self::Wake => "wake_pc",
            Self::Shutdown => "shutdown_pc",
            Self::Sleep => "sleep_pc",
        }
    }

    pub fn from_callback_data(data: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.callback_data() == data)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Wake => "Power on PC",
            Self::Shutdown => "Shut down PC",
            Self::Sleep => "Put PC to sleep",
        }
    }

    /// Command written to the agent, `None` for actions that never touch the
    /// link.
    pub fn wire_command(self) -> Option<&'static str> {
        match self {
            Self::Wake => None,
            Self::Shutdown => Some("shutdown"),
            Self::Sleep => Some("sleep"),
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Wake => "wake",
            Self::Shutdown => "shutdown",
            Self::Sleep => "sleep",
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct AllowList {
    users: HashSet<UserId>,
}

impl AllowList {
    pub fn new(users: impl IntoIterator<Item = UserId>) -> Self {
        Self {
            users: users.into_iter().collect(),
        }
    }

    pub fn contains(&self, user: UserId) -> bool {
        self.users.contains(&user)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callback_data_maps_back_to_kind() {
        for kind in ActionKind::ALL {
            assert_eq!(ActionKind::from_callback_data(kind.callback_data()), Some(kind));
        }
        assert_eq!(ActionKind::from_callback_data("reboot_pc"), None);
    }

    #[test]
    fn only_link_actions_have_wire_commands() {
        assert_eq!(ActionKind::Wake.wire_command(), None);
        assert_eq!(ActionKind::Shutdown.wire_command(), Some("shutdown"));
        assert_eq!(ActionKind::Sleep.wire_command(), Some("sleep"));
    }

    #[test]
    fn keyboard_lists_every_action_once() {
        let mut seen: Vec<_> = KEYBOARD_LAYOUT.iter().flat_map(|row| row.iter().copied()).collect();
        seen.sort_by_key(|kind| kind.callback_data());
        assert_eq!(seen.len(), ActionKind::ALL.len());
        seen.dedup();
        assert_eq!(seen.len(), ActionKind::ALL.len());
    }

    #[test]
    fn allow_list_membership() {
        let allow = AllowList::new([42, 7]);
        assert!(allow.contains(42));
        assert!(!allow.contains(8));
        assert!(AllowList::default().is_empty());
    }
}
