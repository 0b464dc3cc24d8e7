//! Table registry and storage mode.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The allow-list of tables.
///
/// Every storage call names a `Table`, so an unlisted table cannot be
/// reached from typed code. String names coming from the wire, the CLI or
/// the fallback document go through [`Table::from_str`], which rejects
/// unlisted names before any I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    /// Accounts.
    Users,
    /// Events being organized.
    Events,
    /// Agenda sessions within an event.
    Sessions,
    /// Speaker profiles.
    Speakers,
    /// Sponsor entries.
    Sponsors,
    /// Attendee registrations.
    Registrations,
    /// Issued tickets.
    Tickets,
    /// Checkout payments.
    Payments,
    /// Attendee wallets.
    Wallets,
    /// Wallet transfers, one record per transfer.
    Ledger,
    /// Chat messages.
    Messages,
    /// Live polls.
    Polls,
    /// Votes cast on polls.
    PollVotes,
    /// User notifications.
    Notifications,
    /// Video call rooms and signaling state.
    VideoRooms,
    /// Attendee networking connections.
    Connections,
}

impl Table {
    /// Every allowed table, in declaration order.
    pub const ALL: [Table; 16] = [
        Table::Users,
        Table::Events,
        Table::Sessions,
        Table::Speakers,
        Table::Sponsors,
        Table::Registrations,
        Table::Tickets,
        Table::Payments,
        Table::Wallets,
        Table::Ledger,
        Table::Messages,
        Table::Polls,
        Table::PollVotes,
        Table::Notifications,
        Table::VideoRooms,
        Table::Connections,
    ];

    /// Returns the storage and wire name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Table::Users => "users",
            Table::Events => "events",
            Table::Sessions => "sessions",
            Table::Speakers => "speakers",
            Table::Sponsors => "sponsors",
            Table::Registrations => "registrations",
            Table::Tickets => "tickets",
            Table::Payments => "payments",
            Table::Wallets => "wallets",
            Table::Ledger => "ledger",
            Table::Messages => "messages",
            Table::Polls => "polls",
            Table::PollVotes => "poll_votes",
            Table::Notifications => "notifications",
            Table::VideoRooms => "video_rooms",
            Table::Connections => "connections",
        }
    }

    /// Returns the high-frequency domain this table belongs to, if any.
    ///
    /// Tables in a domain get a narrow `refresh:<domain>` network event in
    /// addition to the generic one.
    pub const fn domain(self) -> Option<&'static str> {
        match self {
            Table::Polls | Table::PollVotes => Some("polls"),
            Table::Messages => Some("chat"),
            Table::VideoRooms => Some("video"),
            _ => None,
        }
    }
}

impl FromStr for Table {
    type Err = CoreError;

    fn from_str(name: &str) -> CoreResult<Self> {
        Table::ALL
            .into_iter()
            .find(|t| t.as_str() == name)
            .ok_or_else(|| CoreError::unknown_table(name))
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which tier the engine tries first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageMode {
    /// Try the primary backend, fall back per call on failure.
    Primary,
    /// Serve everything from the fallback store.
    Fallback,
}

impl fmt::Display for StorageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageMode::Primary => f.write_str("primary"),
            StorageMode::Fallback => f.write_str("fallback"),
        }
    }
}
