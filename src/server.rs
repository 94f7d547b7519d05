//! Room hosting: one worker per room.
//!
//! Every room runs on its own thread at the fixed 60 Hz tick. Client
//! commands arrive through the room's inbound channel and are drained
//! with a per-tick bound so a chatty client cannot starve outbound
//! work. All room state is owned by the worker; there is no locking
//! and no cross-room mutation.
//!
//! A worker exits when the room stays empty past the grace period,
//! when a shutdown is requested, or when a tick panics (the room is
//! torn down, subscribers get a `roomTerminated` event, the rest of
//! the service keeps running).

use crate::commands::ClientCommand;
use crate::config::GameModeConfig;
use crate::error::FatalRoomError;
use crate::events::GameEvent;
use crate::room::{Room, TICK_DT};
use crate::snapshot::{Broadcaster, Subscriber};
use rand::distr::Alphanumeric;
use rand::Rng;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::mpsc::{channel, Receiver, Sender, TryRecvError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Commands a tick may drain from the inbound queue.
const MAX_DRAIN_PER_TICK: usize = 64;
/// Seconds an empty room survives before its worker exits.
const EMPTY_GRACE: f32 = 30.0;

/// Message into a room worker.
pub enum HostCommand {
    Client(ClientCommand),
    Subscribe(Box<dyn Subscriber>),
    Shutdown,
}

/// Handle to a running room worker.
pub struct RoomHandle {
    pub room_id: String,
    tx: Sender<HostCommand>,
    join: Option<JoinHandle<()>>,
}

impl RoomHandle {
    /// Queue a client command. Returns false when the worker is gone.
    pub fn send(&self, cmd: ClientCommand) -> bool {
        self.tx.send(HostCommand::Client(cmd)).is_ok()
    }

    pub fn subscribe(&self, sub: Box<dyn Subscriber>) -> bool {
        self.tx.send(HostCommand::Subscribe(sub)).is_ok()
    }

    /// Request shutdown and wait for the worker to exit. Pending
    /// scheduled work (grenades, horde waves) is dropped with the room.
    pub fn shutdown(mut self) {
        let _ = self.tx.send(HostCommand::Shutdown);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map(|j| j.is_finished()).unwrap_or(true)
    }
}

/// Spawn a room worker thread driving the room at 60 Hz.
pub fn spawn_room(room_id: impl Into<String>, world_seed: u32, config: GameModeConfig) -> RoomHandle {
    let room_id = room_id.into();
    let (tx, rx) = channel();
    let thread_room_id = room_id.clone();
    let join = std::thread::Builder::new()
        .name(format!("room-{room_id}"))
        .spawn(move || run_room_worker(thread_room_id, world_seed, config, rx))
        .expect("spawn room worker");
    RoomHandle {
        room_id,
        tx,
        join: Some(join),
    }
}

fn run_room_worker(room_id: String, world_seed: u32, config: GameModeConfig, rx: Receiver<HostCommand>) {
    let mut room = Room::with_config(room_id.clone(), world_seed, config);
    let mut broadcaster = Broadcaster::new();
    #[cfg(feature = "profile")]
    let mut profiler = crate::profiler::Profiler::new();
    let tick_duration = Duration::from_secs_f32(TICK_DT);
    let mut next_tick = Instant::now();
    let mut empty_for = 0.0f32;
    let mut ever_joined = false;
    info!(room = %room_id, seed = world_seed, "room worker started");

    'main: loop {
        // Bounded inbound drain at tick start.
        for _ in 0..MAX_DRAIN_PER_TICK {
            match rx.try_recv() {
                Ok(HostCommand::Client(cmd)) => {
                    if let Err(reject) = room.handle(cmd) {
                        // Validation rejections are normal traffic.
                        tracing::debug!(room = %room_id, %reject, "command rejected");
                    }
                }
                Ok(HostCommand::Subscribe(sub)) => broadcaster.subscribe(sub),
                Ok(HostCommand::Shutdown) => {
                    info!(room = %room_id, "shutdown requested");
                    break 'main;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    info!(room = %room_id, "host channel closed");
                    break 'main;
                }
            }
        }

        // The tick itself; a panic is Fatal for this room only.
        #[cfg(feature = "profile")]
        profiler.begin("tick");
        let result = std::panic::catch_unwind(AssertUnwindSafe(|| room.tick(TICK_DT)));
        #[cfg(feature = "profile")]
        profiler.end();
        if result.is_err() {
            let fatal = FatalRoomError {
                room_id: room_id.clone(),
                detail: "tick panicked".to_string(),
            };
            error!(%fatal, "tearing the room down");
            room.bus.emit(GameEvent::RoomTerminated { reason: fatal.detail });
            broadcaster.sample(0.0, &mut room);
            break 'main;
        }
        #[cfg(feature = "profile")]
        profiler.begin("broadcast");
        broadcaster.sample(TICK_DT, &mut room);
        #[cfg(feature = "profile")]
        {
            profiler.end();
            profiler.tick();
            if profiler.tick_count() % 600 == 0 {
                profiler.log_summary(&room_id);
            }
        }

        // Empty-room grace.
        if room.is_empty() {
            if ever_joined {
                empty_for += TICK_DT;
                if empty_for >= EMPTY_GRACE {
                    info!(room = %room_id, "room empty past grace, exiting");
                    break 'main;
                }
            }
        } else {
            ever_joined = true;
            empty_for = 0.0;
        }

        // Fixed-rate pacing; never run the clock backwards.
        next_tick += tick_duration;
        let now = Instant::now();
        if next_tick > now {
            std::thread::sleep(next_tick - now);
        } else if now - next_tick > Duration::from_millis(250) {
            // Fell badly behind; resync instead of spiraling.
            warn!(room = %room_id, "tick overrun, resyncing clock");
            next_tick = now;
        }
    }
    info!(room = %room_id, "room worker exited");
}

/// Owns the set of live rooms.
#[derive(Default)]
pub struct RoomManager {
    rooms: HashMap<String, RoomHandle>,
}

impl RoomManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a room with a random id and seed. Ids are not part of
    /// the simulation, so plain thread randomness is fine here.
    pub fn create_room(&mut self, config: GameModeConfig) -> String {
        let mut rng = rand::rng();
        let room_id: String = (&mut rng)
            .sample_iter(&Alphanumeric)
            .take(8)
            .map(char::from)
            .collect();
        let seed: u32 = rng.random();
        let handle = spawn_room(room_id.clone(), seed, config);
        self.rooms.insert(room_id.clone(), handle);
        room_id
    }

    pub fn get(&self, room_id: &str) -> Option<&RoomHandle> {
        self.rooms.get(room_id)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Drop handles whose workers already exited.
    pub fn reap(&mut self) {
        self.rooms.retain(|_, h| !h.is_finished());
    }

    pub fn remove_room(&mut self, room_id: &str) {
        if let Some(handle) = self.rooms.remove(room_id) {
            handle.shutdown();
        }
    }

    pub fn shutdown_all(&mut self) {
        for (_, handle) in self.rooms.drain() {
            handle.shutdown();
        }
    }
}

/// Step a batch of embedded rooms from one call, in parallel. For
/// hosts that own their rooms directly instead of using workers.
#[cfg(feature = "parallel")]
pub fn step_rooms(rooms: &mut [Room], dt: f32) {
    use rayon::prelude::*;
    rooms.par_iter_mut().for_each(|room| room.tick(dt));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::ChannelSubscriber;
    use std::sync::mpsc::sync_channel;

    #[test]
    fn test_room_worker_ticks_and_replicates() {
        let handle = spawn_room("worker_room", 5, GameModeConfig::test());
        let (tx, rx) = sync_channel(256);
        assert!(handle.subscribe(Box::new(ChannelSubscriber { tx })));
        assert!(handle.send(ClientCommand::Join {
            player_id: "p1".into(),
            name: "A".into()
        }));

        // Give the worker a few ticks to produce snapshots.
        let msg = rx.recv_timeout(Duration::from_secs(2));
        assert!(msg.is_ok(), "expected at least one outbound message");
        handle.shutdown();
    }

    #[test]
    fn test_manager_create_and_remove() {
        let mut mgr = RoomManager::new();
        let id = mgr.create_room(GameModeConfig::test());
        assert_eq!(id.len(), 8);
        assert_eq!(mgr.room_count(), 1);
        assert!(mgr.get(&id).is_some());
        mgr.remove_room(&id);
        assert_eq!(mgr.room_count(), 0);
    }

    #[test]
    fn test_shutdown_is_clean() {
        let handle = spawn_room("bye_room", 6, GameModeConfig::test());
        handle.send(ClientCommand::Join { player_id: "p1".into(), name: "A".into() });
        std::thread::sleep(Duration::from_millis(50));
        handle.shutdown(); // joins the worker; hanging here fails the test harness
    }
}
