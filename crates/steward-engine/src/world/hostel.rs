//! The reference hostel world: five rooms, guests/staff/guards with drifting needs.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use steward_contracts::{
    AgentDecision, Command, DecideContext, DecisionResult, NearbyAgent, Needs, RoomRef,
    NEARBY_LIMIT,
};
use steward_kernel::{clamp01, fnv1a32, quantize, round2, short_hash};

use super::{
    Agent, AgentRole, AgentState, CommandOutcome, DomainEvent, DomainEventKind, Room, StepOutcome,
    Transition, Vec3, World, WorldOps,
};

pub const DORM_A: &str = "r1";
pub const DORM_B: &str = "r2";
pub const COMMON_ROOM: &str = "r3";
pub const KITCHEN: &str = "r4";
pub const OFFICE: &str = "r5";

const TICKS_PER_DAY: u64 = 3_600;
const POSITION_STEP: f64 = 0.25;
const REST_UNTIL_ENERGY: f64 = 0.95;

const NAMES: &[&str] = &[
    "Ada", "Bram", "Cleo", "Dov", "Esme", "Finn", "Gus", "Hana", "Ivo", "Juno", "Kai", "Lia",
];

fn room(id: &str, name: &str, position: Vec3, size: Vec3) -> Room {
    Room {
        id: id.to_string(),
        name: name.to_string(),
        position,
        size,
    }
}

fn hostel_rooms() -> Vec<Room> {
    vec![
        room(DORM_A, "Dorm A", Vec3::new(0.0, 0.0, 0.0), Vec3::new(6.0, 3.0, 6.0)),
        room(DORM_B, "Dorm B", Vec3::new(8.0, 0.0, 0.0), Vec3::new(6.0, 3.0, 6.0)),
        room(COMMON_ROOM, "Common Room", Vec3::new(0.0, 0.0, 9.0), Vec3::new(10.0, 3.0, 8.0)),
        room(KITCHEN, "Kitchen", Vec3::new(12.0, 0.0, 9.0), Vec3::new(6.0, 3.0, 6.0)),
        room(OFFICE, "Office", Vec3::new(16.0, 0.0, 0.0), Vec3::new(4.0, 3.0, 4.0)),
    ]
}

/// Builds the initial world. Same `(seed, agents)` always yields the same world.
pub fn generate_world(seed: u64, agents: usize) -> World {
    let mut rng = StdRng::seed_from_u64(seed);
    let rooms = hostel_rooms();
    let spawn_rooms = [DORM_A, DORM_B, COMMON_ROOM, KITCHEN];

    let mut population = Vec::with_capacity(agents);
    for i in 0..agents {
        let role = match i % 5 {
            4 => AgentRole::Guard,
            3 => AgentRole::Staff,
            _ => AgentRole::Guest,
        };
        let spawn_id = spawn_rooms[rng.gen_range(0..spawn_rooms.len())];
        let spawn = rooms
            .iter()
            .find(|r| r.id == spawn_id)
            .cloned()
            .unwrap_or_else(|| rooms[0].clone());
        let position = Vec3::new(
            spawn.position.x + rng.gen_range(-0.4..0.4) * spawn.size.x,
            0.0,
            spawn.position.z + rng.gen_range(-0.4..0.4) * spawn.size.z,
        );
        population.push(Agent {
            id: format!("agent-{i:03}"),
            name: format!("{} {}", NAMES[i % NAMES.len()], i),
            role,
            room_id: spawn.id.clone(),
            position,
            speed: 1.4,
            state: AgentState::Idle,
            energy: rng.gen_range(0.2..1.0),
            hunger: rng.gen_range(0.0..0.8),
            anxiety: rng.gen_range(0.0..0.5),
            aggression: rng.gen_range(0.0..0.4),
            nav_target: None,
            current_intent: None,
            activity_ticks_left: 0,
            last_think_tick: 0,
            think_cooldown_ticks: rng.gen_range(0..30),
            memory_revision: 0,
            decisions_applied: 0,
        });
    }
    population.sort_by(|a, b| a.id.cmp(&b.id));

    World {
        tick: 0,
        time_of_day: 0.0,
        rooms,
        agents: population,
    }
}

/// Pure transforms over a hostel [`World`].
#[derive(Debug, Clone)]
pub struct HostelOps {
    pub think_cooldown_ticks: u64,
}

impl Default for HostelOps {
    fn default() -> Self {
        Self {
            think_cooldown_ticks: 30,
        }
    }
}

enum Plan {
    MoveTo(Vec3),
    Eat,
    Rest,
    Talk(String),
    Calm(String),
    Conflict(String),
    Report,
    Idle,
}

fn q(v: f64) -> f64 {
    // + 0.0 folds -0.0 into 0.0
    quantize(v, POSITION_STEP) + 0.0
}

fn home_dorm(agent_id: &str) -> &'static str {
    if fnv1a32(agent_id) % 2 == 0 {
        DORM_A
    } else {
        DORM_B
    }
}

fn is_dorm(room_id: &str) -> bool {
    room_id == DORM_A || room_id == DORM_B
}

fn wander_point(world: &World, agent: &Agent) -> Vec3 {
    let area = world
        .room(&agent.room_id)
        .or_else(|| world.room(COMMON_ROOM))
        .map(|r| (r.position, r.size))
        .unwrap_or_default();
    let h = fnv1a32(&format!("{}:{}", agent.id, world.tick));
    let fx = f64::from(h & 0xffff) / 65_535.0 - 0.5;
    let fz = f64::from((h >> 16) & 0xffff) / 65_535.0 - 0.5;
    Vec3::new(
        area.0.x + fx * area.1.x * 0.8,
        0.0,
        area.0.z + fz * area.1.z * 0.8,
    )
}

struct EventSink<'a> {
    phase: &'static str,
    tick: u64,
    events: &'a mut Vec<DomainEvent>,
}

impl EventSink<'_> {
    fn emit(
        &mut self,
        kind: DomainEventKind,
        room_id: &str,
        agent_ids: Vec<String>,
        description: String,
    ) {
        let id = format!("{}-{}-{}", self.phase, self.tick, self.events.len());
        self.events.push(DomainEvent {
            id,
            tick: self.tick,
            kind,
            description,
            room_id: room_id.to_string(),
            agent_ids,
        });
    }
}

impl HostelOps {
    fn plan_for(&self, world: &World, agent: &Agent, decision: &AgentDecision) -> Plan {
        let center = |id: &str| world.room(id).map(|r| r.position);
        let peer = |target: Option<&str>| {
            target
                .and_then(|t| world.agent(t))
                .filter(|t| t.id != agent.id && t.room_id == agent.room_id)
                .map(|t| t.id.clone())
        };

        match decision.action.as_str() {
            "GO_TO_ROOM" => decision
                .target_room_id
                .as_deref()
                .and_then(center)
                .map(Plan::MoveTo)
                .unwrap_or(Plan::Idle),
            "EAT_IN_KITCHEN" if agent.room_id == KITCHEN => Plan::Eat,
            "EAT_IN_KITCHEN" => center(KITCHEN).map(Plan::MoveTo).unwrap_or(Plan::Idle),
            "REST_IN_DORM" if is_dorm(&agent.room_id) => Plan::Rest,
            "REST_IN_DORM" => center(home_dorm(&agent.id))
                .map(Plan::MoveTo)
                .unwrap_or(Plan::Idle),
            "REPORT_TO_GUARD" if agent.room_id == OFFICE => Plan::Report,
            "REPORT_TO_GUARD" => center(OFFICE).map(Plan::MoveTo).unwrap_or(Plan::Idle),
            "TALK_TO_AGENT" => peer(decision.target_agent_id.as_deref())
                .map(Plan::Talk)
                .unwrap_or(Plan::Idle),
            "CALM_SOMEONE" => peer(decision.target_agent_id.as_deref())
                .map(Plan::Calm)
                .unwrap_or(Plan::Idle),
            "START_CONFLICT" => peer(decision.target_agent_id.as_deref())
                .map(Plan::Conflict)
                .unwrap_or(Plan::Idle),
            "WANDER" => {
                let requested = decision
                    .target_point
                    .map(|p| Vec3::new(p.x, 0.0, p.z))
                    .filter(|p| world.rooms.iter().any(|r| r.contains(p)));
                Plan::MoveTo(requested.unwrap_or_else(|| wander_point(world, agent)))
            }
            _ => Plan::Idle,
        }
    }

    fn apply_one(&self, world: &mut World, result: &DecisionResult, sink: &mut EventSink<'_>) {
        let Some(agent) = world.agent(&result.agent_id).cloned() else {
            return;
        };
        let mut decision = result.decision.clone();
        decision.tick_planned = world.tick;
        let plan = self.plan_for(world, &agent, &decision);
        let action = decision.action.clone();
        let room_id = agent.room_id.clone();
        let tick = world.tick;

        match &plan {
            Plan::Talk(peer) | Plan::Calm(peer) | Plan::Conflict(peer) => {
                if let Some(other) = world.agent_mut(peer) {
                    match &plan {
                        Plan::Talk(_) => other.anxiety = clamp01(other.anxiety - 0.05),
                        Plan::Calm(_) => {
                            other.aggression = clamp01(other.aggression - 0.2);
                            other.anxiety = clamp01(other.anxiety - 0.1);
                        }
                        _ => {
                            other.aggression = clamp01(other.aggression + 0.2);
                            other.anxiety = clamp01(other.anxiety + 0.1);
                        }
                    }
                }
            }
            _ => {}
        }

        let Some(a) = world.agent_mut(&result.agent_id) else {
            return;
        };
        a.current_intent = Some(decision);
        a.decisions_applied += 1;
        a.memory_revision += 1;
        a.last_think_tick = tick;
        a.think_cooldown_ticks = self.think_cooldown_ticks;
        a.nav_target = None;
        a.activity_ticks_left = 0;

        match plan {
            Plan::MoveTo(target) => {
                a.nav_target = Some(target);
                a.state = AgentState::Moving;
                sink.emit(
                    DomainEventKind::Movement,
                    &room_id,
                    vec![a.id.clone()],
                    format!("{} sets off ({action})", a.name),
                );
            }
            Plan::Eat => {
                a.state = AgentState::Eating;
                a.activity_ticks_left = 90;
                sink.emit(
                    DomainEventKind::Meal,
                    &room_id,
                    vec![a.id.clone()],
                    format!("{} eats", a.name),
                );
            }
            Plan::Rest => {
                a.state = AgentState::Sleeping;
                sink.emit(
                    DomainEventKind::Rest,
                    &room_id,
                    vec![a.id.clone()],
                    format!("{} lies down", a.name),
                );
            }
            Plan::Talk(peer) => {
                a.state = AgentState::Talking;
                a.activity_ticks_left = 60;
                a.anxiety = clamp01(a.anxiety - 0.05);
                sink.emit(
                    DomainEventKind::Conversation,
                    &room_id,
                    vec![a.id.clone(), peer.clone()],
                    format!("{} talks to {peer}", a.name),
                );
            }
            Plan::Calm(peer) => {
                a.state = AgentState::Talking;
                a.activity_ticks_left = 45;
                sink.emit(
                    DomainEventKind::Calming,
                    &room_id,
                    vec![a.id.clone(), peer.clone()],
                    format!("{} calms {peer}", a.name),
                );
            }
            Plan::Conflict(peer) => {
                a.state = AgentState::Agitated;
                a.activity_ticks_left = 60;
                a.aggression = clamp01(a.aggression + 0.2);
                a.anxiety = clamp01(a.anxiety + 0.1);
                sink.emit(
                    DomainEventKind::Conflict,
                    &room_id,
                    vec![a.id.clone(), peer.clone()],
                    format!("{} picks a fight with {peer}", a.name),
                );
            }
            Plan::Report => {
                a.state = AgentState::Idle;
                a.activity_ticks_left = 45;
                sink.emit(
                    DomainEventKind::Report,
                    &room_id,
                    vec![a.id.clone()],
                    format!("{} files a report", a.name),
                );
            }
            Plan::Idle => {
                a.state = AgentState::Idle;
                a.activity_ticks_left = 60;
            }
        }
    }

    fn reduce_one(
        &self,
        world: &mut World,
        cmd: &Command,
        sink: &mut EventSink<'_>,
    ) -> Result<(), String> {
        let agent_id = cmd
            .payload
            .get("agentId")
            .and_then(|v| v.as_str())
            .or(cmd.actor_id.as_deref())
            .ok_or_else(|| "missing_agent_id".to_string())?
            .to_string();
        if world.agent(&agent_id).is_none() {
            return Err("unknown_agent".to_string());
        }

        let (target, action, target_room_id) = match cmd.kind.as_str() {
            "MOVE_TO_ROOM" => {
                let room_id = cmd
                    .payload
                    .get("roomId")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| "missing_room_id".to_string())?;
                let room = world.room(room_id).ok_or_else(|| "unknown_room".to_string())?;
                (room.position, "GO_TO_ROOM", Some(room.id.clone()))
            }
            "MOVE_TO_POINT" => {
                let x = cmd.payload.get("x").and_then(|v| v.as_f64());
                let z = cmd.payload.get("z").and_then(|v| v.as_f64());
                match (x, z) {
                    (Some(x), Some(z)) if x.is_finite() && z.is_finite() => {
                        (Vec3::new(x, 0.0, z), "WANDER", None)
                    }
                    _ => return Err("invalid_point".to_string()),
                }
            }
            _ => return Err("unknown_command_type".to_string()),
        };

        let tick = world.tick;
        let Some(a) = world.agent_mut(&agent_id) else {
            return Err("unknown_agent".to_string());
        };
        a.current_intent = Some(AgentDecision {
            agent_id: agent_id.clone(),
            tick_planned: tick,
            action: action.to_string(),
            reason: format!("command:{}", cmd.id),
            target_room_id,
            target_agent_id: None,
            target_point: None,
        });
        a.nav_target = Some(target);
        a.state = AgentState::Moving;
        a.activity_ticks_left = 0;
        a.memory_revision += 1;
        let room_id = a.room_id.clone();
        sink.emit(
            DomainEventKind::Command,
            &room_id,
            vec![agent_id],
            format!("command {} ({})", cmd.id, cmd.kind),
        );
        Ok(())
    }
}

fn complete_intent(agent: &mut Agent) {
    agent.current_intent = None;
    agent.nav_target = None;
    agent.activity_ticks_left = 0;
    agent.state = AgentState::Idle;
}

fn drift_toward(v: f64, target: f64, rate: f64) -> f64 {
    if v > target {
        (v - rate).max(target)
    } else {
        (v + rate).min(target)
    }
}

impl WorldOps for HostelOps {
    fn context_hash(&self, world: &World, agent_id: &str) -> Option<String> {
        let a = world.agent(agent_id)?;
        let snapshot = json!({
            "agentId": a.id,
            "roomId": a.room_id,
            "pos": { "x": q(a.position.x), "z": q(a.position.z) },
            "state": a.state.as_str(),
            "memoryRevision": a.memory_revision,
        });
        short_hash(&snapshot).ok()
    }

    fn decision_context(
        &self,
        world: &World,
        agent_id: &str,
        allowlist: &[String],
    ) -> Option<DecideContext> {
        let a = world.agent(agent_id)?;

        let mut rooms: Vec<RoomRef> = world
            .rooms
            .iter()
            .map(|r| RoomRef {
                id: r.id.clone(),
                name: Some(r.name.clone()),
            })
            .collect();
        rooms.sort_by(|x, y| x.id.cmp(&y.id));

        let mut nearby: Vec<NearbyAgent> = world
            .agents
            .iter()
            .filter(|o| o.id != a.id && o.room_id == a.room_id)
            .map(|o| NearbyAgent {
                id: o.id.clone(),
                role: Some(o.role.as_str().to_string()),
                dist: Some(round2(a.position.distance_xz(&o.position))),
                state: Some(o.state.as_str().to_string()),
            })
            .collect();
        nearby.sort_by(|x, y| {
            x.dist
                .partial_cmp(&y.dist)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| x.id.cmp(&y.id))
        });
        nearby.truncate(NEARBY_LIMIT);

        Some(DecideContext {
            agent_id: a.id.clone(),
            room_id: a.room_id.clone(),
            state: a.state.as_str().to_string(),
            needs: Some(Needs {
                energy: Some(round2(clamp01(a.energy))),
                hunger: Some(round2(clamp01(a.hunger))),
                anxiety: Some(round2(clamp01(a.anxiety))),
                aggression: Some(round2(clamp01(a.aggression))),
            }),
            nearby_agents: Some(nearby),
            rooms: Some(rooms),
            allowlist_actions: allowlist.to_vec(),
        })
    }

    fn apply_decisions(&self, world: World, decisions: &[DecisionResult]) -> Transition {
        let mut world = world;
        let mut events = Vec::new();
        let mut sink = EventSink {
            phase: "dec",
            tick: world.tick,
            events: &mut events,
        };
        for result in decisions {
            self.apply_one(&mut world, result, &mut sink);
        }
        Transition { world, events }
    }

    fn reduce_commands(&self, world: World, commands: &[Command]) -> CommandOutcome {
        let mut world = world;
        let mut events = Vec::new();
        let mut rejected = Vec::new();
        let mut sink = EventSink {
            phase: "cmd",
            tick: world.tick,
            events: &mut events,
        };
        for cmd in commands {
            if let Err(reason) = self.reduce_one(&mut world, cmd, &mut sink) {
                rejected.push((cmd.id.clone(), reason));
            }
        }
        CommandOutcome {
            world,
            events,
            rejected,
        }
    }

    fn step(&self, world: World, sim_dt: f64) -> StepOutcome {
        let mut world = world;
        world.tick += 1;
        world.time_of_day = (world.tick % TICKS_PER_DAY) as f64 / TICKS_PER_DAY as f64 * 24.0;
        let tick = world.tick;
        let rooms = world.rooms.clone();
        let mut events = Vec::new();
        let mut sink = EventSink {
            phase: "step",
            tick,
            events: &mut events,
        };
        let mut needing_decision = Vec::new();

        for a in world.agents.iter_mut() {
            match a.state {
                AgentState::Sleeping => a.energy = clamp01(a.energy + 0.04 * sim_dt),
                AgentState::Eating => a.hunger = clamp01(a.hunger - 0.08 * sim_dt),
                AgentState::Moving => a.energy = clamp01(a.energy - 0.006 * sim_dt),
                _ => a.energy = clamp01(a.energy - 0.004 * sim_dt),
            }
            if a.state != AgentState::Eating {
                a.hunger = clamp01(a.hunger + 0.003 * sim_dt);
            }
            a.anxiety = drift_toward(a.anxiety, 0.2, 0.01 * sim_dt);
            a.aggression = drift_toward(a.aggression, 0.1, 0.01 * sim_dt);

            if let Some(target) = a.nav_target {
                let dist = a.position.distance_xz(&target);
                let stride = a.speed * sim_dt;
                if dist <= stride {
                    a.position = target;
                    let from = a.room_id.clone();
                    if let Some(r) = rooms.iter().find(|r| r.contains(&a.position)) {
                        a.room_id = r.id.clone();
                    }
                    sink.emit(
                        DomainEventKind::Movement,
                        &a.room_id,
                        vec![a.id.clone()],
                        format!("{} arrived (from {from})", a.name),
                    );
                    complete_intent(a);
                } else {
                    let k = stride / dist;
                    a.position.x += (target.x - a.position.x) * k;
                    a.position.z += (target.z - a.position.z) * k;
                    if let Some(r) = rooms.iter().find(|r| r.contains(&a.position)) {
                        a.room_id = r.id.clone();
                    }
                }
            }

            if a.activity_ticks_left > 0 {
                a.activity_ticks_left -= 1;
                if a.activity_ticks_left == 0 {
                    complete_intent(a);
                }
            }
            if a.state == AgentState::Sleeping && a.energy >= REST_UNTIL_ENERGY {
                complete_intent(a);
            }

            if a.current_intent.is_none()
                && a.nav_target.is_none()
                && tick >= a.last_think_tick + a.think_cooldown_ticks
            {
                needing_decision.push(a.id.clone());
            }
        }

        StepOutcome {
            world,
            events,
            needing_decision,
        }
    }
}
