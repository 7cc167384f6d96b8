use std::cell::RefCell;
use std::fmt::Write as _;
use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;

use servo_core::config::ServoConfig;
use servo_core::controller::ServoController;
use servo_core::repl::catalog;
use servo_core::repl::commands::{CommandExecutor, CommandOutcome};
use servo_core::repl::status::StatusFormatter;
use servo_core::task::{PeriodicTask, TaskScheduler};

use crate::plant::{Plant, PlantTask, SimLines, SimPeers, wired_config};

/// Longest span a single `run` may simulate.
const MAX_RUN: Duration = Duration::from_secs(600);
const PLANT_PERIOD: Duration = Duration::from_millis(1);

/// Commands handled by the emulator itself rather than the controller console.
pub const HELP_TOPICS: &[(&str, &str)] = &[
    (
        "run",
        "run <n>[ms|s]                 - advance simulated time",
    ),
    (
        "pedal",
        "pedal <volts>                 - set the pedal sensor voltage",
    ),
    (
        "inject",
        "inject <overcurrent|hall|etb-error> <value|off> - force a plant fault",
    ),
    (
        "plant",
        "plant                         - show the simulated rotor and ETB",
    ),
];

type SimController = ServoController<Duration, SimLines, SimPeers>;

/// Everything the simulation loop schedules.
enum SimTask<'a> {
    Plant(&'a mut PlantTask),
    Controller(&'a mut SimController),
}

impl PeriodicTask<Duration> for SimTask<'_> {
    fn period(&self) -> Duration {
        match self {
            SimTask::Plant(task) => task.period(),
            SimTask::Controller(task) => task.period(),
        }
    }

    fn run(&mut self, now: Duration) {
        match self {
            SimTask::Plant(task) => task.run(now),
            SimTask::Controller(task) => task.run(now),
        }
    }
}

/// Options picked on the command line.
#[derive(Clone, Debug, Default)]
pub struct SessionOptions {
    pub homing: bool,
    pub transcript: Option<String>,
}

pub struct Session {
    controller: SimController,
    plant: Rc<RefCell<Plant>>,
    plant_task: PlantTask,
    clock: Duration,
    transcript: Option<TranscriptLogger>,
}

impl Session {
    pub fn new(options: &SessionOptions) -> io::Result<Self> {
        let transcript = options
            .transcript
            .as_deref()
            .map(TranscriptLogger::new)
            .transpose()?;

        let config = ServoConfig {
            enabled: false,
            homing_enabled: options.homing,
            ..wired_config()
        };
        let plant = Plant::shared(config.current_sense);
        let mut controller =
            SimController::new(SimLines::new(plant.clone()), SimPeers::new(plant.clone()));
        controller.on_configuration_change(Some(config));

        Ok(Self {
            controller,
            plant_task: PlantTask::new(plant.clone(), PLANT_PERIOD),
            plant,
            clock: Duration::ZERO,
            transcript,
        })
    }

    #[cfg(test)]
    pub fn controller(&self) -> &SimController {
        &self.controller
    }

    pub fn handle_command(&mut self, line: &str) -> io::Result<Vec<String>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }

        self.log(TranscriptRole::Host, trimmed)?;

        let mut words = trimmed.split_whitespace();
        let head = words.next().unwrap_or_default().to_ascii_lowercase();
        let args: Vec<&str> = words.collect();

        let lines = match (head.as_str(), args.as_slice()) {
            ("run", [span]) => self.handle_run(span),
            ("pedal", [volts]) => self.handle_pedal(volts),
            ("inject", [kind, value]) => self.handle_inject(kind, value),
            ("plant", []) => vec![self.plant_line()],
            ("help", []) => help_listing(),
            ("help", [topic]) if find_topic(topic).is_some() => {
                find_topic(topic).into_iter().map(str::to_string).collect()
            }
            ("run" | "pedal" | "inject" | "plant", _) => {
                let usage = find_topic(&head).unwrap_or_default();
                vec![format!("ERR usage: {usage}")]
            }
            _ => self.handle_console(trimmed),
        };

        for line in &lines {
            self.log(TranscriptRole::Emulator, line)?;
        }
        Ok(lines)
    }

    fn handle_console(&mut self, line: &str) -> Vec<String> {
        let now = self.clock;
        let mut executor = CommandExecutor::new(&mut self.controller);
        match executor.execute(line, now) {
            Ok(outcome) => self.describe(outcome),
            Err(error) => vec![format!("ERR {error}")],
        }
    }

    fn describe(&self, outcome: CommandOutcome) -> Vec<String> {
        match outcome {
            CommandOutcome::Enabled => vec!["OK enabled; takes effect on the next tick".to_string()],
            CommandOutcome::Disabled => vec!["OK disabled".to_string()],
            CommandOutcome::TargetSet(target) => vec![format!("OK target {target:.1}%")],
            CommandOutcome::Released => vec!["OK released".to_string()],
            CommandOutcome::EtbMode(enabled) => {
                vec![format!("OK etb {}", if enabled { "on" } else { "off" })]
            }
            CommandOutcome::Faults(faults) => vec![format!("faults {faults}")],
            CommandOutcome::FaultsCleared => vec!["OK faults cleared".to_string()],
            CommandOutcome::Status(snapshot) => {
                let mut text = String::new();
                // Writing into a String cannot fail.
                let _ = StatusFormatter::new(&snapshot).write_all(&mut text);
                let mut lines: Vec<String> = text.lines().map(str::to_string).collect();
                lines.push(self.plant_line());
                lines
            }
            CommandOutcome::Help(Some(spec)) => {
                vec![format!("{:<30}- {}", spec.usage, spec.summary)]
            }
            CommandOutcome::Help(None) => help_listing(),
        }
    }

    fn handle_run(&mut self, span: &str) -> Vec<String> {
        let Some(span) = parse_span(span) else {
            return vec![format!("ERR invalid duration `{span}`")];
        };
        if span > MAX_RUN {
            return vec![format!("ERR run is limited to {}s", MAX_RUN.as_secs())];
        }

        let before = self.controller.tick_count();
        if let Err(error) = self.run_for(span) {
            return vec![format!("ERR scheduler {error}")];
        }
        let ticks = self.controller.tick_count().wrapping_sub(before);

        let snapshot = self.controller.telemetry();
        let mut state = String::new();
        let _ = StatusFormatter::new(snapshot).write_state_line(&mut state);
        vec![
            format!("OK t={}ms ticks={ticks}", self.clock.as_millis()),
            state,
        ]
    }

    /// Advances the simulation clock, running the controller and plant as they fall due.
    fn run_for(&mut self, span: Duration) -> Result<(), servo_core::task::SchedulerError> {
        let end = self.clock + span;
        let mut now = self.clock;
        let mut scheduler: TaskScheduler<Duration, SimTask<'_>, 2> = TaskScheduler::new();
        scheduler.register(SimTask::Plant(&mut self.plant_task))?;
        scheduler.register(SimTask::Controller(&mut self.controller))?;

        while now < end {
            scheduler.poll(now);
            now = scheduler.next_deadline().unwrap_or(end).min(end);
        }

        self.clock = now;
        Ok(())
    }

    fn handle_pedal(&mut self, volts: &str) -> Vec<String> {
        match volts.parse::<f32>() {
            Ok(volts) if volts.is_finite() && (0.0..=5.0).contains(&volts) => {
                self.plant.borrow_mut().set_pedal(volts);
                vec![format!("OK pedal {volts:.3}V")]
            }
            _ => vec![format!("ERR pedal voltage must be within 0-5 V, got `{volts}`")],
        }
    }

    fn handle_inject(&mut self, kind: &str, value: &str) -> Vec<String> {
        let off = value.eq_ignore_ascii_case("off");
        let mut plant = self.plant.borrow_mut();
        let injections = plant.injections_mut();
        let applied = match kind.to_ascii_lowercase().as_str() {
            "overcurrent" if off || value.eq_ignore_ascii_case("on") => {
                injections.overcurrent = !off;
                true
            }
            "hall" if off => {
                injections.hall = None;
                true
            }
            "hall" => match value.parse::<u8>() {
                Ok(code) if code <= 7 => {
                    injections.hall = Some(code);
                    true
                }
                _ => false,
            },
            "etb-error" if off => {
                injections.etb_error = None;
                true
            }
            "etb-error" => value.parse::<u16>().is_ok_and(|code| {
                injections.etb_error = Some(code);
                true
            }),
            _ => false,
        };

        if applied {
            vec![format!("OK inject {kind} {value}")]
        } else {
            vec![format!("ERR cannot inject {kind} {value}")]
        }
    }

    fn plant_line(&self) -> String {
        let plant = self.plant.borrow();
        let injections = plant.injections();
        let mut line = format!(
            "plant rotor={:.1}% current={:.2}A pedal={:.3}V etb={:.1}%",
            plant.rotor_percent(),
            plant.current(),
            plant.pedal(),
            plant.etb_position(),
        );
        if let Some((position, target)) = plant.reported() {
            let _ = write!(line, " reported={position:.1}/{target:.1}");
        }
        if injections.overcurrent {
            line.push_str(" inject=overcurrent");
        }
        if let Some(code) = injections.hall {
            let _ = write!(line, " inject=hall:{code}");
        }
        if let Some(code) = injections.etb_error {
            let _ = write!(line, " inject=etb-error:{code}");
        }
        line
    }

    fn log(&mut self, role: TranscriptRole, line: &str) -> io::Result<()> {
        match self.transcript.as_mut() {
            Some(transcript) => transcript.append_line(self.clock, role, line),
            None => Ok(()),
        }
    }
}

fn find_topic(name: &str) -> Option<&'static str> {
    HELP_TOPICS
        .iter()
        .find(|(topic, _)| topic.eq_ignore_ascii_case(name))
        .map(|(_, detail)| *detail)
}

fn help_listing() -> Vec<String> {
    let mut lines = vec!["Available commands:".to_string()];
    for spec in catalog::commands() {
        lines.push(format!("  {:<30}- {}", spec.usage, spec.summary));
    }
    for (_, detail) in HELP_TOPICS {
        lines.push(format!("  {detail}"));
    }
    lines.push("Type `help <topic>` for a specific command.".to_string());
    lines
}

/// Parses `250ms`, `2s`, or a bare millisecond count.
fn parse_span(text: &str) -> Option<Duration> {
    let text = text.to_ascii_lowercase();
    if let Some(millis) = text.strip_suffix("ms") {
        millis.parse().ok().map(Duration::from_millis)
    } else if let Some(secs) = text.strip_suffix('s') {
        secs.parse::<f64>()
            .ok()
            .filter(|secs| secs.is_finite() && *secs >= 0.0)
            .map(Duration::from_secs_f64)
    } else {
        text.parse().ok().map(Duration::from_millis)
    }
}

struct TranscriptLogger {
    writer: BufWriter<std::fs::File>,
}

impl TranscriptLogger {
    fn new(path: &str) -> io::Result<Self> {
        let path = Path::new(path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut logger = Self {
            writer: BufWriter::new(file),
        };

        logger.write_header()?;
        Ok(logger)
    }

    fn write_header(&mut self) -> io::Result<()> {
        writeln!(self.writer, "# Throttle servo emulator transcript")?;
        writeln!(
            self.writer,
            "# Timestamps are simulated milliseconds since power-up"
        )?;
        writeln!(self.writer)?;
        self.writer.flush()
    }

    fn append_line(&mut self, clock: Duration, role: TranscriptRole, line: &str) -> io::Result<()> {
        writeln!(
            self.writer,
            "[+{:>8} ms] {} {}",
            clock.as_millis(),
            role.prefix(),
            line
        )?;
        self.writer.flush()
    }
}

enum TranscriptRole {
    Host,
    Emulator,
}

impl TranscriptRole {
    fn prefix(&self) -> &'static str {
        match self {
            TranscriptRole::Host => "HOST>",
            TranscriptRole::Emulator => "EMU <",
        }
    }
}

#[cfg(test)]
mod tests {
    use servo_core::controller::OperatingState;
    use servo_core::faults::Fault;
    use servo_core::homing::HomingState;

    use super::*;

    fn session(homing: bool) -> Session {
        Session::new(&SessionOptions {
            homing,
            transcript: None,
        })
        .unwrap()
    }

    fn send(session: &mut Session, line: &str) -> Vec<String> {
        session.handle_command(line).unwrap()
    }

    #[test]
    fn run_accepts_units() {
        assert_eq!(parse_span("250ms"), Some(Duration::from_millis(250)));
        assert_eq!(parse_span("2s"), Some(Duration::from_secs(2)));
        assert_eq!(parse_span("15"), Some(Duration::from_millis(15)));
        assert_eq!(parse_span("soon"), None);
    }

    #[test]
    fn enable_then_run_reaches_idle() {
        let mut session = session(false);
        assert_eq!(send(&mut session, "enable")[0], "OK enabled; takes effect on the next tick");

        let lines = send(&mut session, "run 10ms");
        assert_eq!(lines[0], "OK t=10ms ticks=10");
        assert_eq!(session.controller().state(), OperatingState::Idle);
    }

    #[test]
    fn homing_completes_and_target_is_tracked() {
        let mut session = session(true);
        send(&mut session, "enable");
        send(&mut session, "run 3s");
        assert_eq!(session.controller().homing_state(), HomingState::Complete);
        assert_eq!(session.controller().state(), OperatingState::Idle);

        send(&mut session, "target 50");
        send(&mut session, "run 1s");
        let controller = session.controller();
        assert_eq!(controller.state(), OperatingState::PositionControl);
        assert!(controller.faults().is_empty());
        assert!((controller.position().unwrap() - 50.0).abs() < 10.0);
    }

    #[test]
    fn injected_overcurrent_faults_the_controller() {
        let mut session = session(false);
        send(&mut session, "enable");
        send(&mut session, "run 5ms");
        send(&mut session, "inject overcurrent on");
        send(&mut session, "run 2ms");

        assert!(session.controller().faults().contains(Fault::Overcurrent));
        assert_eq!(session.controller().state(), OperatingState::Fault);
        assert_eq!(send(&mut session, "faults")[0], "faults overcurrent");
    }

    #[test]
    fn status_includes_the_plant() {
        let mut session = session(false);
        let lines = send(&mut session, "status");
        assert_eq!(lines.len(), 5);
        assert!(lines[0].starts_with("state disabled"));
        assert!(lines[4].starts_with("plant rotor="));
    }

    #[test]
    fn errors_are_prefixed() {
        let mut session = session(false);
        assert!(send(&mut session, "launch")[0].starts_with("ERR "));
        assert!(send(&mut session, "pedal 9")[0].starts_with("ERR "));
        assert!(send(&mut session, "run")[0].starts_with("ERR usage"));
    }

    #[test]
    fn help_lists_console_and_emulator_commands() {
        let mut session = session(false);
        let lines = send(&mut session, "help");
        assert!(lines.iter().any(|line| line.contains("target <percent>")));
        assert!(lines.iter().any(|line| line.contains("pedal <volts>")));
        assert_eq!(send(&mut session, "help run").len(), 1);
    }
}
