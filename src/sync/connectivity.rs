//! Online/offline state and change notifications.

use chrono::{DateTime, Utc};
use std::fmt;

/// Connectivity as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
  Online,
  Offline,
}

impl Connectivity {
  pub fn is_online(self) -> bool {
    matches!(self, Connectivity::Online)
  }
}

impl From<bool> for Connectivity {
  fn from(online: bool) -> Self {
    if online {
      Connectivity::Online
    } else {
      Connectivity::Offline
    }
  }
}

impl fmt::Display for Connectivity {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Online => write!(f, "online"),
      Self::Offline => write!(f, "offline"),
    }
  }
}

/// Broadcast on every connectivity transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectivityEvent {
  pub online: bool,
  pub at: DateTime<Utc>,
}
