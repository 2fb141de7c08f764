//! Logical operations understood by the gateway.

use std::fmt;

/// The string-valued `action` field of a request envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Authenticate,
    Token,
    DeviceSave,
    NetworkInsert,
    CommandInsert,
    CommandUpdate,
    CommandSubscribe,
    NotificationInsert,
    NotificationSubscribe,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Authenticate => "authenticate",
            Action::Token => "token",
            Action::DeviceSave => "device/save",
            Action::NetworkInsert => "network/insert",
            Action::CommandInsert => "command/insert",
            Action::CommandUpdate => "command/update",
            Action::CommandSubscribe => "command/subscribe",
            Action::NotificationInsert => "notification/insert",
            Action::NotificationSubscribe => "notification/subscribe",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
