//! Command catalog shared by the parser and the `help` command.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandTag {
    Enable,
    Disable,
    Target,
    Release,
    Etb,
    Faults,
    Status,
    Help,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommandSpec {
    pub name: &'static str,
    pub tag: CommandTag,
    pub usage: &'static str,
    pub summary: &'static str,
}

const COMMANDS: [CommandSpec; 8] = [
    CommandSpec {
        name: "enable",
        tag: CommandTag::Enable,
        usage: "enable",
        summary: "enable the servo with the loaded configuration",
    },
    CommandSpec {
        name: "disable",
        tag: CommandTag::Disable,
        usage: "disable",
        summary: "stop the motor and return to disabled",
    },
    CommandSpec {
        name: "target",
        tag: CommandTag::Target,
        usage: "target <percent>",
        summary: "track a direct servo target",
    },
    CommandSpec {
        name: "release",
        tag: CommandTag::Release,
        usage: "release",
        summary: "stop tracking the direct servo target",
    },
    CommandSpec {
        name: "etb",
        tag: CommandTag::Etb,
        usage: "etb on|off",
        summary: "take or return throttle authority from the conventional ETB",
    },
    CommandSpec {
        name: "faults",
        tag: CommandTag::Faults,
        usage: "faults [clear]",
        summary: "show or clear latched faults",
    },
    CommandSpec {
        name: "status",
        tag: CommandTag::Status,
        usage: "status",
        summary: "print the latest telemetry snapshot",
    },
    CommandSpec {
        name: "help",
        tag: CommandTag::Help,
        usage: "help [command]",
        summary: "list commands or describe one",
    },
];

/// Returns the full command catalog.
#[must_use]
pub const fn commands() -> &'static [CommandSpec] {
    &COMMANDS
}

/// Finds a command by name (case insensitive).
#[must_use]
pub fn find(name: &str) -> Option<&'static CommandSpec> {
    COMMANDS
        .iter()
        .find(|command| command.name.eq_ignore_ascii_case(name))
}
