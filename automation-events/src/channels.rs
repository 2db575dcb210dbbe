//! Log channels
//!
//! Messages posted to a channel become notifications named after the
//! channel, with the message as event text. They are mirrored to `tracing`.

use std::fmt;

use crate::bus::EventBus;
use crate::error::EventResult;

/// Output channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Diagnostics for developers
    Debug,
    /// Detailed progress, logged at trace level
    Verbose,
    /// Normal progress
    Info,
    /// Recoverable problems
    Warning,
    /// Failures, including failed event handlers
    Error,
}

impl Channel {
    /// Event name notifications on this channel use.
    pub fn name(&self) -> &'static str {
        match self {
            Channel::Debug => "debug",
            Channel::Verbose => "verbose",
            Channel::Info => "info",
            Channel::Warning => "warning",
            Channel::Error => "error",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl EventBus {
    /// Post a message to a channel.
    pub fn post(&self, channel: Channel, message: impl Into<String>) -> EventResult<()> {
        let message = message.into();
        match channel {
            Channel::Debug => tracing::debug!(channel = %channel, "{message}"),
            Channel::Verbose => tracing::trace!(channel = %channel, "{message}"),
            Channel::Info => tracing::info!(channel = %channel, "{message}"),
            Channel::Warning => tracing::warn!(channel = %channel, "{message}"),
            Channel::Error => tracing::error!(channel = %channel, "{message}"),
        }
        self.notify(channel.name(), message)
    }

    /// Post a message to the debug channel.
    pub fn debug(&self, message: impl Into<String>) -> EventResult<()> {
        self.post(Channel::Debug, message)
    }

    /// Post a message to the verbose channel.
    pub fn verbose(&self, message: impl Into<String>) -> EventResult<()> {
        self.post(Channel::Verbose, message)
    }

    /// Post a message to the info channel.
    pub fn info(&self, message: impl Into<String>) -> EventResult<()> {
        self.post(Channel::Info, message)
    }

    /// Post a message to the warning channel.
    pub fn warning(&self, message: impl Into<String>) -> EventResult<()> {
        self.post(Channel::Warning, message)
    }

    /// Post a message to the error channel.
    pub fn error(&self, message: impl Into<String>) -> EventResult<()> {
        self.post(Channel::Error, message)
    }
}
