//! The map screen: a single task that owns the refresher (and with it the map).
//!
//! Lifecycle commands, location events and fetch completions all arrive on
//! channels and are handled one at a time here, which is what keeps marker
//! mutation single-threaded.

use anyhow::{anyhow, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::geo::LatLng;
use crate::image_fetcher::ImageFetcher;
use crate::location::{ListenerId, LocationEvent, LocationProvider, LocationReceiver, LocationSender};
use crate::map_surface::MapSurface;
use crate::refresher::{FetchCompletion, MarkerRefresher, RefreshOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Start,
    Resume,
    Pause,
    Stop,
    LowMemory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScreenPhase {
    Created,
    Started,
    Resumed,
    Paused,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenStatus {
    pub phase: ScreenPhase,
    pub map_ready: bool,
    pub listening: bool,
    pub generation: u64,
}

pub enum ScreenCommand<M> {
    Lifecycle(Lifecycle),
    MapReady(M),
    Status(oneshot::Sender<ScreenStatus>),
    Shutdown,
}

/// Cheap, cloneable way to talk to a running [`MapScreen`].
pub struct ScreenHandle<M> {
    tx: mpsc::UnboundedSender<ScreenCommand<M>>,
}

impl<M> Clone for ScreenHandle<M> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<M> ScreenHandle<M> {
    fn send(&self, command: ScreenCommand<M>) -> Result<()> {
        self.tx
            .send(command)
            .map_err(|_| anyhow!("map screen is no longer running"))
    }

    pub fn lifecycle(&self, event: Lifecycle) -> Result<()> {
        self.send(ScreenCommand::Lifecycle(event))
    }

    pub fn map_ready(&self, map: M) -> Result<()> {
        self.send(ScreenCommand::MapReady(map))
    }

    pub async fn status(&self) -> Result<ScreenStatus> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(ScreenCommand::Status(reply_tx))?;
        reply_rx
            .await
            .map_err(|_| anyhow!("map screen stopped before answering"))
    }

    pub fn shutdown(&self) -> Result<()> {
        self.send(ScreenCommand::Shutdown)
    }
}

pub struct MapScreen<M, P, F, R> {
    refresher: MarkerRefresher<M, P, F, R>,
    completions: mpsc::UnboundedReceiver<FetchCompletion>,
    commands: mpsc::UnboundedReceiver<ScreenCommand<M>>,
    location_tx: LocationSender,
    location_rx: LocationReceiver,
    listener: Option<ListenerId>,
    phase: ScreenPhase,
}

impl<M, P, F, R> MapScreen<M, P, F, R>
where
    M: MapSurface + 'static,
    P: LocationProvider + 'static,
    F: ImageFetcher,
    R: Rng + Send + 'static,
{
    pub fn new(
        refresher: MarkerRefresher<M, P, F, R>,
        completions: mpsc::UnboundedReceiver<FetchCompletion>,
    ) -> (Self, ScreenHandle<M>) {
        let (tx, commands) = mpsc::unbounded_channel();
        let (location_tx, location_rx) = mpsc::unbounded_channel();
        let screen = Self {
            refresher,
            completions,
            commands,
            location_tx,
            location_rx,
            listener: None,
            phase: ScreenPhase::Created,
        };
        (screen, ScreenHandle { tx })
    }

    /// Runs the screen on its own task.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        info!("🗺️  Map screen running");
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(ScreenCommand::Shutdown) | None => break,
                    Some(command) => self.handle(command),
                },
                Some(event) = self.location_rx.recv() => self.on_location_event(event),
                Some(completion) = self.completions.recv() => {
                    let outcome = self.refresher.on_fetch_completed(completion);
                    debug!(?outcome, "fetch completion handled");
                }
            }
        }

        if self.listener.is_some() {
            self.pause();
        }
        info!("👋 Map screen stopped");
    }

    fn handle(&mut self, command: ScreenCommand<M>) {
        match command {
            ScreenCommand::Lifecycle(event) => self.on_lifecycle(event),
            ScreenCommand::MapReady(map) => {
                info!("Map is ready");
                self.refresher.attach_map(map);
                let last = self.refresher.provider().last_known_location();
                self.refresh(last);
            }
            ScreenCommand::Status(reply) => {
                let _ = reply.send(self.status());
            }
            ScreenCommand::Shutdown => {}
        }
    }

    fn status(&self) -> ScreenStatus {
        ScreenStatus {
            phase: self.phase,
            map_ready: self.refresher.has_map(),
            listening: self.listener.is_some(),
            generation: self.refresher.generation(),
        }
    }

    fn on_lifecycle(&mut self, event: Lifecycle) {
        debug!(?event, phase = ?self.phase, "lifecycle event");
        match event {
            Lifecycle::Start => self.phase = ScreenPhase::Started,
            Lifecycle::Resume => self.resume(),
            Lifecycle::Pause => self.pause(),
            Lifecycle::Stop => self.phase = ScreenPhase::Stopped,
            Lifecycle::LowMemory => {
                if let Some(map) = self.refresher.map_mut() {
                    map.on_low_memory();
                }
            }
        }
    }

    fn resume(&mut self) {
        self.phase = ScreenPhase::Resumed;
        let provider = self.refresher.provider();
        provider.activate();
        if self.listener.is_none() {
            self.listener = Some(provider.add_listener(self.location_tx.clone()));
        }
        provider.request_updates();
        let last = provider.last_known_location();
        self.refresh(last);
    }

    fn pause(&mut self) {
        self.phase = ScreenPhase::Paused;
        let provider = self.refresher.provider();
        provider.deactivate();
        provider.remove_updates();
        if let Some(id) = self.listener.take() {
            provider.remove_listener(id);
        }
    }

    fn on_location_event(&mut self, event: LocationEvent) {
        match event {
            LocationEvent::Connected => {
                info!("Location engine connected");
                let last = self.refresher.provider().last_known_location();
                self.refresh(last);
            }
            LocationEvent::Changed(fix) => self.refresh(Some(fix)),
        }
    }

    fn refresh(&mut self, location: Option<LatLng>) {
        match self.refresher.on_location_changed(location) {
            RefreshOutcome::Started { generation, requested } => {
                debug!(generation, requested, "refresh started");
            }
            outcome => debug!(?outcome, "refresh skipped"),
        }
    }
}
