//! In-memory radio link for tests and the `--demo` mode.
//!
//! Presents the same boundary as a real link but runs on channels alone:
//! a driver handle injects advertisements, power transitions, and inbound
//! payloads, while the link task answers connection commands from a small
//! behavior script (the happy path by default: connects succeed, the
//! channel is found, subscriptions acknowledge). Every command the engine
//! issues is mirrored back to the driver for inspection.

use std::collections::HashSet;

use tokio::sync::mpsc;

use orbit_core::{PeerToken, PingEnvelope, RadioState};

use crate::radio::{
    RadioCommand, RadioEvent, RadioPort, COMMAND_CHANNEL_CAPACITY, EVENT_CHANNEL_CAPACITY,
};

/// How the scripted link responds to connection commands.
#[derive(Debug, Clone, Default)]
pub struct MockBehavior {
    /// Tokens whose connect attempts fail.
    pub refuse_connect: HashSet<PeerToken>,
    /// Tokens whose channel probe fails after a successful connect.
    pub fail_channel_discovery: HashSet<PeerToken>,
    /// Suppress the initial powered-on transition.
    pub start_powered_off: bool,
}

/// Driver side of a spawned mock link.
pub struct MockHandle {
    events: mpsc::Sender<RadioEvent>,
    commands: mpsc::UnboundedReceiver<RadioCommand>,
}

impl MockHandle {
    /// Inject a raw radio event.
    pub async fn emit(&self, event: RadioEvent) {
        let _ = self.events.send(event).await;
    }

    /// Inject a power/authorization transition.
    pub async fn power(&self, state: RadioState) {
        self.emit(RadioEvent::StateChanged { state }).await;
    }

    /// Inject one advertisement sighting.
    pub async fn advertise(&self, token: PeerToken, name: Option<&str>, signal_dbm: f64) {
        self.emit(RadioEvent::AdvertisementObserved {
            token,
            name: name.map(str::to_owned),
            signal_dbm,
        })
        .await;
    }

    /// Inject an inbound write to this node's server channel.
    pub async fn deliver_write(&self, payload: Vec<u8>) {
        self.emit(RadioEvent::WriteReceived { payload }).await;
    }

    /// Next command the engine issued, in order.
    pub async fn next_command(&mut self) -> Option<RadioCommand> {
        self.commands.recv().await
    }

    /// Everything the engine has issued so far.
    pub fn drain_commands(&mut self) -> Vec<RadioCommand> {
        let mut drained = Vec::new();
        while let Ok(command) = self.commands.try_recv() {
            drained.push(command);
        }
        drained
    }
}

/// The scripted in-memory link.
pub struct MockRadio;

impl MockRadio {
    /// Spawn the link task. Returns the engine's port and the driver handle.
    pub fn spawn(behavior: MockBehavior) -> (RadioPort, MockHandle) {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (command_tx, mut command_rx) = mpsc::channel::<RadioCommand>(COMMAND_CHANNEL_CAPACITY);
        let (mirror_tx, mirror_rx) = mpsc::unbounded_channel();

        let task_events = event_tx.clone();
        tokio::spawn(async move {
            if !behavior.start_powered_off {
                let _ = task_events
                    .send(RadioEvent::StateChanged {
                        state: RadioState::PoweredOn,
                    })
                    .await;
            }

            while let Some(command) = command_rx.recv().await {
                let _ = mirror_tx.send(command.clone());

                let reply = match command {
                    RadioCommand::Connect { token } => {
                        Some(if behavior.refuse_connect.contains(&token) {
                            RadioEvent::ConnectFailed { token }
                        } else {
                            RadioEvent::Connected { token }
                        })
                    }
                    RadioCommand::DiscoverChannel { token } => {
                        Some(if behavior.fail_channel_discovery.contains(&token) {
                            RadioEvent::ChannelDiscoveryFailed { token }
                        } else {
                            RadioEvent::ChannelDiscovered { token }
                        })
                    }
                    RadioCommand::Subscribe { token } => {
                        Some(RadioEvent::SubscriptionActive { token })
                    }
                    RadioCommand::Disconnect { token } => {
                        Some(RadioEvent::Disconnected { token })
                    }
                    _ => None,
                };

                if let Some(event) = reply {
                    if task_events.send(event).await.is_err() {
                        break;
                    }
                }
            }
        });

        (
            RadioPort {
                commands: command_tx,
                events: event_rx,
            },
            MockHandle {
                events: event_tx,
                commands: mirror_rx,
            },
        )
    }
}

/// Demo script: three synthetic peers whose signals take a small random
/// walk, with an occasional inbound ping, so the daemon has something to
/// show without a second machine.
pub fn spawn_demo_driver(handle: MockHandle) -> tokio::task::JoinHandle<()> {
    use rand::Rng;

    tokio::spawn(async move {
        let mut peers = [
            (PeerToken(1), "workshop-phone", -47.0f64),
            (PeerToken(2), "kitchen-tablet", -73.0f64),
            (PeerToken(3), "office-laptop", -84.0f64),
        ];

        let mut interval = tokio::time::interval(std::time::Duration::from_millis(1100));
        let mut tick: u32 = 0;

        loop {
            interval.tick().await;
            tick = tick.wrapping_add(1);

            for (token, name, signal) in peers.iter_mut() {
                let delta: f64 = rand::thread_rng().gen_range(-2.0..=2.0);
                *signal = (*signal + delta).clamp(-95.0, -40.0);
                handle.advertise(*token, Some(*name), *signal).await;
            }

            // Every few ticks one of the peers pings us.
            if tick % 4 == 0 {
                let index = rand::thread_rng().gen_range(0..peers.len());
                if let Ok(payload) = PingEnvelope::from_sender(peers[index].1).encode() {
                    handle.deliver_write(payload).await;
                }
            }
        }
    })
}
