use crate::{
    config::NodeConfig,
    error::{ConfigError, StartupError},
    log,
    message::NodeEvent,
    node::{Action, Node, NodeSnapshot},
    timer::Timers,
    transport::{InboundListener, SuccessorLink},
};
use color_print::cformat;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};

/// Capacity of the event queue shared by the receive path and the timers.
const EVENT_QUEUE: usize = 64;

/// One ring node process.
pub struct Peer {
    pub config: NodeConfig,
}

/// Handle to a peer running in the background.
pub struct PeerHandle {
    snapshots: watch::Receiver<NodeSnapshot>,
    task: JoinHandle<Result<(), StartupError>>,
}

impl Peer {
    pub fn new(config: NodeConfig) -> Self {
        Self { config }
    }

    /// Listens on every interface at the configured port and runs until the process exits.
    pub async fn run(self) -> Result<(), StartupError> {
        self.config.validate()?;

        let listen = format!("0.0.0.0:{}", self.config.listen_port()?);
        let listener = InboundListener::bind(&listen).await?;
        log::info(&cformat!("Listening for predecessor on <bold>{}</bold>", listen));

        let (snapshots, _) = watch::channel(self.node().snapshot());
        self.run_with(listener, snapshots).await
    }

    /// Runs the peer in the background on an already bound listener.
    pub fn spawn(self, listener: InboundListener) -> Result<PeerHandle, ConfigError> {
        self.config.validate()?;

        let (snapshots, receiver) = watch::channel(self.node().snapshot());
        let task = tokio::spawn(self.run_with(listener, snapshots));

        Ok(PeerHandle {
            snapshots: receiver,
            task,
        })
    }

    fn node(&self) -> Node {
        Node::new(self.config.address.clone(), self.config.successor.clone())
            .with_faults(self.config.faults)
            .with_regeneration(self.config.regeneration)
    }

    /// The event loop: the only place the node state is touched.
    async fn run_with(
        self,
        listener: InboundListener,
        snapshots: watch::Sender<NodeSnapshot>,
    ) -> Result<(), StartupError> {
        let (events, mut queue) = mpsc::channel::<NodeEvent>(EVENT_QUEUE);

        let inbound = listener.spawn(events.clone());
        let link = match SuccessorLink::connect(
            &self.config.successor,
            self.config.connect,
            self.config.timing.forward_delay,
        )
        .await
        {
            Ok(link) => link,
            Err(e) => {
                inbound.abort();
                return Err(e.into());
            }
        };

        let mut timers = Timers::new(events, &self.config.timing);
        let mut node = self.node();

        let actions = node.start(self.config.originate);
        execute(&link, &mut timers, actions);
        snapshots.send_replace(node.snapshot());

        while let Some(event) = queue.recv().await {
            let actions = node.handle(event);
            execute(&link, &mut timers, actions);
            snapshots.send_replace(node.snapshot());
        }

        Ok(())
    }
}

fn execute(link: &SuccessorLink, timers: &mut Timers, actions: Vec<Action>) {
    for action in actions {
        match action {
            Action::Send(token) => {
                if let Err(e) = link.send(token) {
                    log::error(&cformat!(
                        "Failed to send token to <bold>{}</bold>: {}",
                        link.address(),
                        e
                    ));
                }
            }
            Action::StartCsTimer => {
                timers.start_cs();
            }
            Action::ScheduleWantsCs => {
                timers.schedule_wants_cs();
            }
        }
    }
}

impl PeerHandle {
    /// Latest state published by the event loop.
    pub fn snapshot(&self) -> NodeSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<NodeSnapshot> {
        self.snapshots.clone()
    }

    pub fn abort(&self) {
        self.task.abort();
    }

    /// The event loop task; it only finishes on a startup error.
    pub fn into_task(self) -> JoinHandle<Result<(), StartupError>> {
        self.task
    }
}
