//! Tokio runtime adapter
//!
//! Each [`Link`] runs in its own task. The task is the only place the link is
//! touched, so commands, inbound frames and timer expirations are handled one
//! at a time. Timers are kept as deadlines: arming a timer replaces any
//! running instance of it and stopping it removes the deadline, so a fire
//! never outlives its cancellation.

use crate::link::{Link, LinkAction, LinkEvent, TimerId};
use crate::{Error, Result};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, trace};

/// Capacity of the command and event channels
const CHANNEL_SIZE: usize = 64;

/// Request for a running link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkCommand {
    Open,
    Close,
    LowerUp,
    LowerDown,
    /// A PPP frame received from the transport
    Input(Vec<u8>),
    /// Answer to a pending secret lookup
    Credentials { name: String, secret: String },
}

/// Sending side of a running link
#[derive(Debug, Clone)]
pub struct LinkHandle {
    name: String,
    commands: mpsc::Sender<LinkCommand>,
}

impl LinkHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn send(&self, command: LinkCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| Error::LinkNotFound {
                name: self.name.clone(),
            })
    }

    pub async fn open(&self) -> Result<()> {
        self.send(LinkCommand::Open).await
    }

    pub async fn close(&self) -> Result<()> {
        self.send(LinkCommand::Close).await
    }

    pub async fn lower_up(&self) -> Result<()> {
        self.send(LinkCommand::LowerUp).await
    }

    pub async fn lower_down(&self) -> Result<()> {
        self.send(LinkCommand::LowerDown).await
    }

    pub async fn input(&self, frame: Vec<u8>) -> Result<()> {
        self.send(LinkCommand::Input(frame)).await
    }

    pub async fn credentials(&self, name: &str, secret: &str) -> Result<()> {
        self.send(LinkCommand::Credentials {
            name: name.to_string(),
            secret: secret.to_string(),
        })
        .await
    }
}

/// A started link: its handle, its event stream and the task running it
#[derive(Debug)]
pub struct RunningLink {
    pub handle: LinkHandle,
    pub events: mpsc::Receiver<LinkEvent>,
    pub task: JoinHandle<()>,
}

/// Start `link` on the current runtime. Outbound frames go to `output`.
///
/// The task ends when every [`LinkHandle`] is dropped.
pub fn spawn(link: Link, output: mpsc::Sender<Vec<u8>>) -> RunningLink {
    let (cmd_tx, cmd_rx) = mpsc::channel(CHANNEL_SIZE);
    let (event_tx, event_rx) = mpsc::channel(CHANNEL_SIZE);
    let handle = LinkHandle {
        name: link.name().to_string(),
        commands: cmd_tx,
    };

    let task = tokio::spawn(run(link, cmd_rx, output, event_tx));

    RunningLink {
        handle,
        events: event_rx,
        task,
    }
}

/// Feed every frame from `frames` into `to` until either side goes away
pub async fn pipe(mut frames: mpsc::Receiver<Vec<u8>>, to: LinkHandle) {
    while let Some(frame) = frames.recv().await {
        if to.input(frame).await.is_err() {
            break;
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Deadline {
    at: Instant,
    every: Option<Duration>,
}

/// Armed timers of one link
#[derive(Debug, Default)]
struct Timers {
    deadlines: HashMap<TimerId, Deadline>,
}

impl Timers {
    fn start(&mut self, timer: TimerId, after: Duration, recurring: bool) {
        let deadline = Deadline {
            at: Instant::now() + after,
            every: recurring.then_some(after),
        };
        self.deadlines.insert(timer, deadline);
    }

    fn stop(&mut self, timer: TimerId) {
        self.deadlines.remove(&timer);
    }

    fn next(&self) -> Option<Instant> {
        self.deadlines.values().map(|d| d.at).min()
    }

    /// Take the earliest timer due at `now`; a recurring one is re-armed
    fn pop_due(&mut self, now: Instant) -> Option<TimerId> {
        let (id, deadline) = self
            .deadlines
            .iter()
            .filter(|(_, d)| d.at <= now)
            .min_by_key(|(_, d)| d.at)
            .map(|(id, d)| (*id, *d))?;

        match deadline.every {
            Some(every) => {
                self.deadlines.insert(id, Deadline { at: now + every, every: Some(every) });
            }
            None => {
                self.deadlines.remove(&id);
            }
        }
        Some(id)
    }
}

struct Runner {
    link: Link,
    timers: Timers,
    output: mpsc::Sender<Vec<u8>>,
    events: mpsc::Sender<LinkEvent>,
}

async fn run(
    link: Link,
    mut commands: mpsc::Receiver<LinkCommand>,
    output: mpsc::Sender<Vec<u8>>,
    events: mpsc::Sender<LinkEvent>,
) {
    info!("DRIVER: started {}", link.name());
    let mut runner = Runner {
        link,
        timers: Timers::default(),
        output,
        events,
    };

    loop {
        let next = runner.timers.next();
        tokio::select! {
            command = commands.recv() => {
                let Some(command) = command else { break };
                let actions = runner.command(command);
                runner.apply(actions).await;
            }
            _ = sleep_until(next.unwrap_or_else(Instant::now)), if next.is_some() => {
                if let Some(timer) = runner.timers.pop_due(Instant::now()) {
                    trace!("DRIVER: {:?} fired on {}", timer, runner.link.name());
                    let actions = runner.link.timeout(timer);
                    runner.apply(actions).await;
                }
            }
        }
    }

    info!("DRIVER: stopped {}", runner.link.name());
}

impl Runner {
    fn command(&mut self, command: LinkCommand) -> Vec<LinkAction> {
        match command {
            LinkCommand::Open => self.link.open(),
            LinkCommand::Close => self.link.close(),
            LinkCommand::LowerUp => self.link.lower_up(),
            LinkCommand::LowerDown => self.link.lower_down(),
            LinkCommand::Input(frame) => self.link.input(&frame),
            LinkCommand::Credentials { name, secret } => {
                self.link.credentials_ready(&name, &secret)
            }
        }
    }

    async fn apply(&mut self, actions: Vec<LinkAction>) {
        for action in actions {
            match action {
                LinkAction::Send(frame) => {
                    if self.output.send(frame).await.is_err() {
                        debug!("DRIVER: transport closed on {}", self.link.name());
                    }
                }
                LinkAction::StartTimer {
                    timer,
                    after,
                    recurring,
                } => self.timers.start(timer, after, recurring),
                LinkAction::StopTimer(timer) => self.timers.stop(timer),
                LinkAction::Event(event) => {
                    if self.events.send(event).await.is_err() {
                        trace!("DRIVER: nobody listening on {}", self.link.name());
                    }
                }
            }
        }
    }
}
