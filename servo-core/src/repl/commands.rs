//! Console command dispatcher.
//!
//! Parsed commands are applied directly to a [`ServoController`]. Enabling
//! and disabling go through the same configuration path the scheduler uses,
//! so they take effect on the next tick.

use core::fmt;

use crate::config::ConfigError;
use crate::controller::{EtbModeError, ServoController, TargetError};
use crate::faults::FaultSet;
use crate::hal::LineIo;
use crate::peers::EnginePeers;
use crate::telemetry::TelemetrySnapshot;
use crate::timing::ControlInstant;

use super::catalog::{self, CommandSpec};
use super::grammar::{self, Command, EtbCommand, FaultsCommand};

/// Command execution successes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CommandOutcome {
    Enabled,
    Disabled,
    /// Target accepted, after clamping to the travel limits.
    TargetSet(f32),
    Released,
    EtbMode(bool),
    Faults(FaultSet),
    FaultsCleared,
    Status(TelemetrySnapshot),
    /// `None` lists the whole catalog.
    Help(Option<&'static CommandSpec>),
}

/// Errors surfaced while executing a command.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CommandError<'a> {
    Parse(grammar::ParseError),
    NotConfigured,
    Config(ConfigError),
    Target(TargetError),
    Etb(EtbModeError),
    UnknownTopic(&'a str),
}

impl From<grammar::ParseError> for CommandError<'_> {
    fn from(error: grammar::ParseError) -> Self {
        Self::Parse(error)
    }
}

impl fmt::Display for CommandError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::Parse(error) => error.fmt(f),
            CommandError::NotConfigured => f.write_str("no configuration loaded"),
            CommandError::Config(error) => write!(f, "configuration rejected: {error}"),
            CommandError::Target(error) => error.fmt(f),
            CommandError::Etb(error) => write!(f, "ETB mode refused: {error}"),
            CommandError::UnknownTopic(topic) => write!(f, "no help for `{topic}`"),
        }
    }
}

/// Applies console commands to a controller.
pub struct CommandExecutor<'c, I, L, P>
where
    I: ControlInstant,
    L: LineIo,
    P: EnginePeers,
{
    controller: &'c mut ServoController<I, L, P>,
}

impl<'c, I, L, P> CommandExecutor<'c, I, L, P>
where
    I: ControlInstant,
    L: LineIo,
    P: EnginePeers,
{
    pub fn new(controller: &'c mut ServoController<I, L, P>) -> Self {
        Self { controller }
    }

    pub fn controller(&self) -> &ServoController<I, L, P> {
        self.controller
    }

    /// Parses and executes a console line.
    pub fn execute<'a>(&mut self, line: &'a str, now: I) -> Result<CommandOutcome, CommandError<'a>> {
        let command = grammar::parse(line)?;
        self.dispatch(command, now)
    }

    fn dispatch<'a>(
        &mut self,
        command: Command<'a>,
        now: I,
    ) -> Result<CommandOutcome, CommandError<'a>> {
        match command {
            Command::Enable => {
                self.set_enabled(true)?;
                Ok(CommandOutcome::Enabled)
            }
            Command::Disable => {
                self.set_enabled(false)?;
                Ok(CommandOutcome::Disabled)
            }
            Command::Target(percent) => {
                self.controller
                    .set_target(percent)
                    .map_err(CommandError::Target)?;
                Ok(CommandOutcome::TargetSet(self.controller.targets().servo))
            }
            Command::Release => {
                self.controller.release();
                Ok(CommandOutcome::Released)
            }
            Command::Etb(request) => {
                let enable = request == EtbCommand::On;
                self.controller
                    .try_set_etb_mode(enable, now)
                    .map_err(CommandError::Etb)?;
                Ok(CommandOutcome::EtbMode(enable))
            }
            Command::Faults(FaultsCommand::Show) => {
                Ok(CommandOutcome::Faults(self.controller.faults()))
            }
            Command::Faults(FaultsCommand::Clear) => {
                self.controller.clear_faults(now);
                Ok(CommandOutcome::FaultsCleared)
            }
            Command::Status => Ok(CommandOutcome::Status(*self.controller.telemetry())),
            Command::Help(None) => Ok(CommandOutcome::Help(None)),
            Command::Help(Some(topic)) => catalog::find(topic)
                .map(|spec| CommandOutcome::Help(Some(spec)))
                .ok_or(CommandError::UnknownTopic(topic)),
        }
    }

    fn set_enabled<'a>(&mut self, enabled: bool) -> Result<(), CommandError<'a>> {
        let mut config = *self
            .controller
            .config()
            .ok_or(CommandError::NotConfigured)?;
        config.enabled = enabled;
        self.controller.on_configuration_change(Some(config));

        match self.controller.config_error() {
            Some(error) if enabled => Err(CommandError::Config(error)),
            _ => Ok(()),
        }
    }
}
