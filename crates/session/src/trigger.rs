//! Edge detection for token-style triggers.
//!
//! Hosts that can only pass values down (not call methods) fire a command
//! by bumping a per-channel token. A command fires when the token is set
//! and differs from the last value observed on that channel. A cleared
//! token (`None`) is not a value: it never fires and never re-arms a channel.

use std::collections::HashMap;

use crate::command::Command;

/// Whether a token transition fires its command.
pub fn should_fire(last: Option<u64>, new: Option<u64>) -> bool {
    new.is_some() && new != last
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerChannel {
    Finish,
    AddRoom,
    Export,
    CapturePhoto,
    Resume,
}

impl TriggerChannel {
    /// Evaluation order for a whole-snapshot diff.
    pub const ALL: [TriggerChannel; 5] = [
        Self::Finish,
        Self::AddRoom,
        Self::Export,
        Self::CapturePhoto,
        Self::Resume,
    ];

    pub fn command(self) -> Command {
        match self {
            Self::Finish => Command::Finish,
            Self::AddRoom => Command::AddRoom,
            Self::Export => Command::Export,
            Self::CapturePhoto => Command::CapturePhoto,
            Self::Resume => Command::Resume,
        }
    }
}

/// All trigger tokens as delivered by the host in one update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TriggerInputs {
    pub finish: Option<u64>,
    pub add_room: Option<u64>,
    pub export: Option<u64>,
    pub capture_photo: Option<u64>,
    pub resume: Option<u64>,
}

impl TriggerInputs {
    pub fn token(&self, channel: TriggerChannel) -> Option<u64> {
        match channel {
            TriggerChannel::Finish => self.finish,
            TriggerChannel::AddRoom => self.add_room,
            TriggerChannel::Export => self.export,
            TriggerChannel::CapturePhoto => self.capture_photo,
            TriggerChannel::Resume => self.resume,
        }
    }
}

/// Remembers the last token value per channel.
#[derive(Debug, Default)]
pub struct TriggerDeduper {
    last: HashMap<TriggerChannel, u64>,
}

impl TriggerDeduper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `token` and report whether it fires. The token is stored
    /// before returning so a re-entrant delivery of the same value is a no-op.
    pub fn observe(&mut self, channel: TriggerChannel, token: Option<u64>) -> bool {
        let Some(value) = token else {
            return false;
        };
        let last = self.last.insert(channel, value);
        should_fire(last, token)
    }

    /// Commands fired by a full snapshot, in [`TriggerChannel::ALL`] order.
    pub fn diff(&mut self, inputs: &TriggerInputs) -> Vec<Command> {
        TriggerChannel::ALL
            .into_iter()
            .filter(|channel| self.observe(*channel, inputs.token(*channel)))
            .map(TriggerChannel::command)
            .collect()
    }
}
