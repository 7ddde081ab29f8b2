//! World model and the operations the engine needs from it.
//!
//! A [`World`] is a plain value. Every [`WorldOps`] transform consumes one and
//! returns the next, so callers can keep an old world around and rewind by
//! swapping references.

use serde::{Deserialize, Serialize};
use steward_contracts::{AgentDecision, Command, DecideContext, DecisionResult};

pub mod hostel;
pub mod signature;

pub use hostel::HostelOps;
pub use signature::world_signature;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Distance in the ground plane.
    pub fn distance_xz(&self, other: &Vec3) -> f64 {
        let dx = self.x - other.x;
        let dz = self.z - other.z;
        (dx * dx + dz * dz).sqrt()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: String,
    pub name: String,
    pub position: Vec3,
    pub size: Vec3,
}

impl Room {
    pub fn contains(&self, p: &Vec3) -> bool {
        (p.x - self.position.x).abs() <= self.size.x / 2.0
            && (p.z - self.position.z).abs() <= self.size.z / 2.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentState {
    Idle,
    Moving,
    Talking,
    Sleeping,
    Eating,
    Agitated,
}

impl AgentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentState::Idle => "IDLE",
            AgentState::Moving => "MOVING",
            AgentState::Talking => "TALKING",
            AgentState::Sleeping => "SLEEPING",
            AgentState::Eating => "EATING",
            AgentState::Agitated => "AGITATED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentRole {
    Guest,
    Staff,
    Guard,
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Guest => "GUEST",
            AgentRole::Staff => "STAFF",
            AgentRole::Guard => "GUARD",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub role: AgentRole,
    pub room_id: String,
    pub position: Vec3,
    pub speed: f64,
    pub state: AgentState,
    pub energy: f64,
    pub hunger: f64,
    pub anxiety: f64,
    pub aggression: f64,
    pub nav_target: Option<Vec3>,
    pub current_intent: Option<AgentDecision>,
    /// Ticks left on a timed activity (talking, eating, idling).
    pub activity_ticks_left: u32,
    pub last_think_tick: u64,
    pub think_cooldown_ticks: u64,
    pub memory_revision: u64,
    pub decisions_applied: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DomainEventKind {
    Movement,
    Conversation,
    Conflict,
    Calming,
    Meal,
    Rest,
    Report,
    Command,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainEvent {
    pub id: String,
    pub tick: u64,
    pub kind: DomainEventKind,
    pub description: String,
    pub room_id: String,
    pub agent_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct World {
    pub tick: u64,
    pub time_of_day: f64,
    pub rooms: Vec<Room>,
    /// Kept sorted by id.
    pub agents: Vec<Agent>,
}

impl World {
    pub fn agent(&self, id: &str) -> Option<&Agent> {
        self.agents.iter().find(|a| a.id == id)
    }

    pub fn agent_mut(&mut self, id: &str) -> Option<&mut Agent> {
        self.agents.iter_mut().find(|a| a.id == id)
    }

    pub fn room(&self, id: &str) -> Option<&Room> {
        self.rooms.iter().find(|r| r.id == id)
    }
}

/// A world transform result: the next world plus what happened.
#[derive(Debug, Clone)]
pub struct Transition {
    pub world: World,
    pub events: Vec<DomainEvent>,
}

#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub world: World,
    pub events: Vec<DomainEvent>,
    /// `(command id, reason)` for each command that could not be applied.
    pub rejected: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub world: World,
    pub events: Vec<DomainEvent>,
    pub needing_decision: Vec<String>,
}

/// Everything the engine asks of a world implementation.
///
/// None of these may panic or fail for an unknown agent: lookups return `None`
/// and transforms skip what they cannot resolve.
pub trait WorldOps {
    fn context_hash(&self, world: &World, agent_id: &str) -> Option<String>;

    fn decision_context(
        &self,
        world: &World,
        agent_id: &str,
        allowlist: &[String],
    ) -> Option<DecideContext>;

    fn apply_decisions(&self, world: World, decisions: &[DecisionResult]) -> Transition;

    fn reduce_commands(&self, world: World, commands: &[Command]) -> CommandOutcome;

    fn step(&self, world: World, sim_dt: f64) -> StepOutcome;
}
