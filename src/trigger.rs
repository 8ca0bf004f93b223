use std::str::FromStr;
use std::time::Duration;

/// `:TRIG:POS?` answer while the instrument is still waiting for a trigger.
pub const TRIGGER_NOT_READY: i64 = -2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerStatus {
    Triggered,
    Waiting,
    Running,
    Auto,
    Stopped,
}

impl TriggerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Triggered => "TD",
            Self::Waiting => "WAIT",
            Self::Running => "RUN",
            Self::Auto => "AUTO",
            Self::Stopped => "STOP",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown trigger status '{0}'")]
pub struct UnknownTriggerStatus(pub String);

impl FromStr for TriggerStatus {
    type Err = UnknownTriggerStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TD" => Ok(Self::Triggered),
            "WAIT" => Ok(Self::Waiting),
            "RUN" => Ok(Self::Running),
            "AUTO" => Ok(Self::Auto),
            "STOP" => Ok(Self::Stopped),
            other => Err(UnknownTriggerStatus(other.to_string())),
        }
    }
}

/// How long a run request waits for the trigger afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerWait {
    No,
    Forever,
    UpTo(Duration),
}

/// One step of a run request as sent to the instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStep {
    Send(&'static str),
    /// Give the instrument time to digest the previous command
    Settle,
}

/// Start an acquisition: continuous, single shot, forced, optionally waiting.
///
/// ```rust
/// use rigolscope_rs::trigger::{RunRequest, RunStep};
/// use std::time::Duration;
///
/// let request = RunRequest::single().forced().wait_up_to(Duration::from_secs(1));
/// assert_eq!(
///     request.steps(),
///     vec![RunStep::Send(":SING"), RunStep::Settle, RunStep::Send(":TFORce")]
/// );
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunRequest {
    single: bool,
    force: bool,
    wait: TriggerWait,
}

impl RunRequest {
    pub fn continuous() -> Self {
        Self {
            single: false,
            force: false,
            wait: TriggerWait::No,
        }
    }

    pub fn single() -> Self {
        Self {
            single: true,
            ..Self::continuous()
        }
    }

    /// Force a trigger instead of (or after arming) waiting for one.
    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }

    /// Block until the instrument reports a trigger.
    pub fn wait(mut self) -> Self {
        self.wait = TriggerWait::Forever;
        self
    }

    pub fn wait_up_to(mut self, timeout: Duration) -> Self {
        self.wait = TriggerWait::UpTo(timeout);
        self
    }

    pub fn trigger_wait(&self) -> TriggerWait {
        self.wait
    }

    /// Commands to send. A force right after arming a single shot needs a
    /// pause first, and a forced or single request never sends `:RUN`.
    pub fn steps(&self) -> Vec<RunStep> {
        let mut steps = Vec::with_capacity(3);
        if self.single {
            steps.push(RunStep::Send(":SING"));
        }
        if self.force {
            if self.single {
                steps.push(RunStep::Settle);
            }
            steps.push(RunStep::Send(":TFORce"));
        }
        if !self.single && !self.force {
            steps.push(RunStep::Send(":RUN"));
        }
        steps
    }
}

impl Default for RunRequest {
    fn default() -> Self {
        Self::continuous()
    }
}
