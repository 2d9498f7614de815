use crate::coordinator::AgentProfile;
use crate::errors::{ArenaError, Result};
use crate::events::{EventLog, GameEvent};
use crate::game::{Game, PlayerSide};
use crate::resolver::ResolutionCache;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

/// Most concurrently tracked games before the least recently touched
/// session is evicted.
pub const MAX_ACTIVE_SESSIONS: usize = 100;

const RESOLUTION_CACHE_CAPACITY: usize = 2048;
const RESOLUTION_CACHE_TTL: Duration = Duration::from_secs(600);

/// All per-game state: the game itself, the two agent profiles, the
/// candidate resolution cache, and the event log.
#[derive(Debug)]
pub struct GameSession {
    game: Game,
    white_profile: AgentProfile,
    black_profile: AgentProfile,
    resolution_cache: ResolutionCache,
    events: EventLog,
}

impl GameSession {
    pub fn new(game_id: &str, white: AgentProfile, black: AgentProfile) -> Self {
        let game = Game::new(game_id, white.label(), black.label());
        Self::from_game(game, white, black)
    }

    pub fn from_fen(
        game_id: &str,
        white: AgentProfile,
        black: AgentProfile,
        fen: &str,
    ) -> Result<Self> {
        let game = Game::from_fen(game_id, white.label(), black.label(), fen)?;
        Ok(Self::from_game(game, white, black))
    }

    fn from_game(game: Game, white: AgentProfile, black: AgentProfile) -> Self {
        let mut events = EventLog::new();
        events.record(GameEvent::started(
            game.game_id(),
            &white.name,
            &black.name,
            &game.position().to_fen(),
        ));
        Self {
            game,
            white_profile: white,
            black_profile: black,
            resolution_cache: ResolutionCache::new(
                RESOLUTION_CACHE_CAPACITY,
                RESOLUTION_CACHE_TTL,
            ),
            events,
        }
    }

    pub fn game(&self) -> &Game {
        &self.game
    }

    pub fn game_mut(&mut self) -> &mut Game {
        &mut self.game
    }

    pub fn profile_for(&self, side: PlayerSide) -> &AgentProfile {
        match side {
            PlayerSide::White => &self.white_profile,
            PlayerSide::Black => &self.black_profile,
        }
    }

    pub fn resolution_cache(&self) -> &ResolutionCache {
        &self.resolution_cache
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn events_mut(&mut self) -> &mut EventLog {
        &mut self.events
    }

    /// Drops memoized candidate resolutions. Called once the game is
    /// over; finished positions will not be probed again.
    pub fn clear_resolution_cache(&self) {
        self.resolution_cache.clear();
    }
}

pub type SharedSession = Arc<tokio::sync::Mutex<GameSession>>;

/// LRU-bounded registry of active sessions keyed by game id.
pub struct SessionStore {
    sessions: Mutex<LruCache<String, SharedSession>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::with_capacity(MAX_ACTIVE_SESSIONS)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1).unwrap());
        Self {
            sessions: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Registers a new session. Fails if a session with the same game id
    /// is already active.
    pub fn create(
        &self,
        game_id: &str,
        white: AgentProfile,
        black: AgentProfile,
    ) -> Result<SharedSession> {
        self.insert(game_id, GameSession::new(game_id, white, black))
    }

    pub fn create_from_fen(
        &self,
        game_id: &str,
        white: AgentProfile,
        black: AgentProfile,
        fen: &str,
    ) -> Result<SharedSession> {
        let session = GameSession::from_fen(game_id, white, black, fen)?;
        self.insert(game_id, session)
    }

    fn insert(&self, game_id: &str, session: GameSession) -> Result<SharedSession> {
        let mut guard = self
            .sessions
            .lock()
            .map_err(|_| ArenaError::StateCorruption {
                game_id: game_id.to_string(),
                detail: "session store lock poisoned".to_string(),
            })?;
        if guard.contains(game_id) {
            return Err(ArenaError::Configuration(format!(
                "game id already active: {game_id}"
            )));
        }
        let shared = Arc::new(tokio::sync::Mutex::new(session));
        guard.put(game_id.to_string(), Arc::clone(&shared));
        debug!(game_id, active = guard.len(), "session created");
        Ok(shared)
    }

    /// Returns the session for `game_id`, marking it most recently used.
    pub fn get(&self, game_id: &str) -> Option<SharedSession> {
        if let Ok(mut guard) = self.sessions.lock() {
            guard.get(game_id).map(Arc::clone)
        } else {
            None
        }
    }

    pub fn remove(&self, game_id: &str) -> Option<SharedSession> {
        if let Ok(mut guard) = self.sessions.lock() {
            guard.pop(game_id)
        } else {
            None
        }
    }

    /// Active game ids, most recently used first.
    pub fn game_ids(&self) -> Vec<String> {
        self.sessions
            .lock()
            .map(|guard| guard.iter().map(|(id, _)| id.clone()).collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().map(|guard| guard.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}
