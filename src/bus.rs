//! Bus integration – OverlayBusAgent ticks the service and fans its output
//! out as JSON frames.
//!
//! ## Role on the bus
//!
//! The agent owns the tick loop. Each tick it locks the shared
//! [`OverlayService`], advances it, releases the lock, then drains the
//! [`Outbox`] and publishes one frame per packet on a broadcast channel.
//! Subscribers (a network bridge, a recorder, tests) call
//! [`OverlayBusAgent::subscribe`].
//!
//! ## Event contract (inbound)
//!
//! | Command                  | Payload            | Effect                       |
//! |--------------------------|--------------------|------------------------------|
//! | `overlay.command.stats`  | *(empty)*          | reply with `OverlayStats`    |
//! | `overlay.command.submit` | `InboundMsg`       | `submit_inbound`             |
//!
//! ## Event contract (outbound)
//!
//! | Subject                          | Payload type                   |
//! |----------------------------------|--------------------------------|
//! | `overlay.block.change`           | `OverlayEvent<Outbound>`       |
//! | `overlay.block.multi_change`     | `OverlayEvent<Outbound>`       |
//! | `overlay.chunk.data`             | `OverlayEvent<Outbound>`       |
//! | `overlay.block.break_animation`  | `OverlayEvent<Outbound>`       |
//! | `overlay.effect.apply` / `remove`| `OverlayEvent<Outbound>`       |
//! | `overlay.inbound.forward`        | `OverlayEvent<Forwarded>`      |

use crate::protocol::subjects::{self, cmd};
use crate::protocol::{Forwarded, Outbound, OverlayEvent, ServerboundPacket};
use crate::service::{OverlayService, TickEvents};
use crate::terrain::Outbox;
use crate::types::ViewerId;
use anyhow::{bail, Context, Result};
use bytes::Bytes;
use log::{debug, info};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// Wire messages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMsg {
    pub viewer: ViewerId,
    pub packet: ServerboundPacket,
}

/// One published frame: subject plus JSON payload.
#[derive(Debug, Clone)]
pub struct PublishedFrame {
    pub subject: String,
    pub payload: Bytes,
}

// ---------------------------------------------------------------------------
// Config for OverlayBusAgent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct OverlayBusConfig {
    /// Session stamped on every frame.
    pub session: String,
    /// Participant ID advertised in logs.
    pub participant_id: String,
    /// Tick rate in Hz.
    pub tick_rate_hz: f32,
    /// Frames buffered per subscriber before the slowest one lags.
    pub channel_capacity: usize,
}

impl Default for OverlayBusConfig {
    fn default() -> Self {
        Self {
            session: "default".into(),
            participant_id: "overlay-service".into(),
            tick_rate_hz: 20.0,
            channel_capacity: 1024,
        }
    }
}

// ---------------------------------------------------------------------------
// OverlayBusAgent
// ---------------------------------------------------------------------------

/// Wraps an [`OverlayService`] and drives it on a fixed interval.
///
/// Call [`OverlayBusAgent::run`] inside a Tokio task to start the agent.
pub struct OverlayBusAgent {
    config: OverlayBusConfig,
    service: Arc<Mutex<OverlayService>>,
    outbox: Arc<Outbox>,
    frames: broadcast::Sender<PublishedFrame>,
}

impl OverlayBusAgent {
    pub fn new(config: OverlayBusConfig, service: Arc<Mutex<OverlayService>>, outbox: Arc<Outbox>) -> Self {
        let (frames, _) = broadcast::channel(config.channel_capacity.max(1));
        Self {
            config,
            service,
            outbox,
            frames,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PublishedFrame> {
        self.frames.subscribe()
    }

    pub fn service(&self) -> &Arc<Mutex<OverlayService>> {
        &self.service
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    /// Handles a command frame, returning the reply payload if there is one.
    pub fn handle_command(&self, subject: &str, payload: &[u8]) -> Result<Option<Bytes>> {
        match subject {
            cmd::STATS => {
                let stats = self.service.lock().stats();
                let reply = serde_json::to_vec(&stats).context("Failed to serialise stats")?;
                Ok(Some(Bytes::from(reply)))
            }
            cmd::SUBMIT => {
                let msg: InboundMsg =
                    serde_json::from_slice(payload).context("Invalid inbound payload")?;
                self.service.lock().submit_inbound(msg.viewer, msg.packet);
                Ok(None)
            }
            other => bail!("Unknown command subject '{}'", other),
        }
    }

    // -----------------------------------------------------------------------
    // Tick
    // -----------------------------------------------------------------------

    /// Runs one tick and publishes everything it produced.
    pub fn step(&self) -> TickEvents {
        // Hold the lock only long enough to tick, then release before publishing.
        let events = {
            let mut svc = self.service.lock();
            svc.tick()
        };
        let published = self.flush(events.tick);
        if published > 0 {
            debug!("Tick {} published {} frame(s)", events.tick, published);
        }
        events
    }

    /// Publishes every packet waiting in the outbox, stamped with `frame`.
    pub fn flush(&self, frame: u64) -> usize {
        let session = self.config.session.as_str();
        let mut published = 0;

        for (viewer, packet) in self.outbox.drain_sent() {
            let subject = subjects::for_packet(&packet);
            if self.publish_event(subject, OverlayEvent::new(session, frame, Outbound { viewer, packet })) {
                published += 1;
            }
        }

        for (viewer, packet) in self.outbox.drain_forwarded() {
            if self.publish_event(
                subjects::INBOUND_FORWARD,
                OverlayEvent::new(session, frame, Forwarded { viewer, packet }),
            ) {
                published += 1;
            }
        }
        published
    }

    /// Ticks `ticks` times on the configured interval, then returns.
    pub async fn run_for(&self, ticks: u64) -> Result<()> {
        let mut timer = tokio::time::interval(tick_period(self.config.tick_rate_hz)?);
        for _ in 0..ticks {
            timer.tick().await;
            self.step();
        }
        Ok(())
    }

    /// Start the agent and run the tick loop until SIGINT.
    pub async fn run(self) -> Result<()> {
        let period = tick_period(self.config.tick_rate_hz)?;
        info!(
            "OverlayBusAgent '{}' active in session '{}' – ticking at {:.0}Hz",
            self.config.participant_id, self.config.session, self.config.tick_rate_hz
        );

        let agent = Arc::new(self);
        let tick_agent = agent.clone();
        let tick_handle = tokio::spawn(async move {
            let mut timer = tokio::time::interval(period);
            loop {
                timer.tick().await;
                tick_agent.step();
            }
        });

        // -----------------------------------------------------------------------
        // Wait for shutdown signal
        // -----------------------------------------------------------------------

        tokio::select! {
            _ = tick_handle => {
                log::error!("Overlay tick loop exited unexpectedly");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("OverlayBusAgent shutting down (SIGINT)");
            }
        }

        let stats = agent.service.lock().stats();
        info!("Final stats: {} tick(s), {} active break(s)", stats.total_ticks, stats.active_breaks);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Publish helper
    // -----------------------------------------------------------------------

    /// Serialise `event` and publish it on `subject`.
    ///
    /// Errors are logged and swallowed. A send with no subscribers is not an
    /// error.
    fn publish_event<T: Serialize>(&self, subject: &str, event: OverlayEvent<T>) -> bool {
        match serde_json::to_vec(&event) {
            Ok(payload) => {
                let _ = self.frames.send(PublishedFrame {
                    subject: subject.to_string(),
                    payload: Bytes::from(payload),
                });
                true
            }
            Err(e) => {
                log::warn!("Failed to serialise event for {}: {}", subject, e);
                false
            }
        }
    }
}

fn tick_period(tick_rate_hz: f32) -> Result<Duration> {
    if !tick_rate_hz.is_finite() || tick_rate_hz <= 0.0 {
        bail!("Tick rate must be positive, got {}", tick_rate_hz);
    }
    Ok(Duration::from_secs_f32(1.0 / tick_rate_hz))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NoopEvents;
    use crate::geometry::BoundingGeometry;
    use crate::host::EngineContext;
    use crate::terrain::{FlatTerrain, Roster};
    use crate::types::{BlockState, OverlayServiceConfig, OverlayStats, Position, ViewerInfo};

    fn make_agent() -> (OverlayBusAgent, Arc<Roster>) {
        let roster = Arc::new(Roster::new());
        let outbox = Arc::new(Outbox::new());
        let ctx = EngineContext::new(
            Arc::new(FlatTerrain::new().with_world("world", -64, 63)),
            roster.clone(),
            outbox.clone(),
            Arc::new(NoopEvents),
            Arc::new(BoundingGeometry::empty()),
        );
        let service = OverlayService::new(OverlayServiceConfig::default(), ctx);
        let config = OverlayBusConfig {
            session: "test".into(),
            tick_rate_hz: 1000.0,
            ..Default::default()
        };
        (
            OverlayBusAgent::new(config, Arc::new(Mutex::new(service)), outbox),
            roster,
        )
    }

    #[test]
    fn stats_command_replies_with_json() {
        let (agent, _) = make_agent();
        let reply = agent.handle_command(cmd::STATS, b"").unwrap().unwrap();
        let stats: OverlayStats = serde_json::from_slice(&reply).unwrap();
        assert_eq!(stats.total_ticks, 0);
    }

    #[test]
    fn unknown_command_is_an_error() {
        let (agent, _) = make_agent();
        assert!(agent.handle_command("overlay.command.nope", b"").is_err());
        assert!(agent.handle_command(cmd::SUBMIT, b"not json").is_err());
    }

    #[test]
    fn submitted_packets_are_forwarded_on_the_next_tick() {
        let (agent, roster) = make_agent();
        let viewer = ViewerInfo::new(ViewerId::random(), 1, "world");
        roster.join(viewer.clone());
        let mut frames = agent.subscribe();

        let msg = serde_json::json!({
            "viewer": viewer.id,
            "packet": {"type": "digging", "position": {"x": 0, "y": 63, "z": 0}, "face": "up", "action": "start"}
        });
        agent
            .handle_command(cmd::SUBMIT, msg.to_string().as_bytes())
            .unwrap();

        let events = agent.step();
        assert_eq!(events.inbound_processed, 1);
        assert_eq!(events.forwarded, 1);

        let frame = frames.try_recv().unwrap();
        assert_eq!(frame.subject, subjects::INBOUND_FORWARD);
        let event: OverlayEvent<Forwarded> = serde_json::from_slice(&frame.payload).unwrap();
        assert_eq!(event.session, "test");
        assert_eq!(event.frame, 1);
        assert_eq!(event.payload.viewer, viewer.id);
    }

    #[test]
    fn run_for_ticks_and_publishes_overlay_packets() {
        let (agent, roster) = make_agent();
        let viewer = ViewerInfo::new(ViewerId::random(), 1, "world");
        roster.join(viewer.clone());
        let mut frames = agent.subscribe();

        {
            let svc = agent.service().lock();
            let cell = svc
                .registry()
                .create_cell(Position::new("world", 0, 64, 0), BlockState::new("minecraft:glass"))
                .unwrap();
            cell.add_and_update_viewer(svc.context(), viewer.id);
        }

        tokio_test::block_on(agent.run_for(3)).unwrap();
        assert_eq!(agent.service().lock().stats().total_ticks, 3);

        let frame = frames.try_recv().unwrap();
        assert_eq!(frame.subject, subjects::BLOCK_CHANGE);
        let event: OverlayEvent<Outbound> = serde_json::from_slice(&frame.payload).unwrap();
        assert_eq!(event.frame, 1);
        assert_eq!(event.payload.viewer, viewer.id);
    }

    #[test]
    fn zero_tick_rate_is_rejected() {
        assert!(tick_period(0.0).is_err());
        assert!(tick_period(20.0).is_ok());
    }
}
