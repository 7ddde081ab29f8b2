use serde_json::{json, Value};
use steward_kernel::{jcs_sha256_hex, quantize};

use super::{Vec3, World};

fn q(v: f64) -> f64 {
    quantize(v, 0.25) + 0.0
}

fn point(p: &Vec3) -> Value {
    json!({ "x": q(p.x), "z": q(p.z) })
}

/// sha256 over the canonical encoding of the deterministic parts of `world`.
///
/// Needs and domain events are left out; positions are quantised to 0.25.
pub fn world_signature(world: &World) -> Result<String, String> {
    let mut rooms: Vec<&str> = world.rooms.iter().map(|r| r.id.as_str()).collect();
    rooms.sort();

    let mut agents: Vec<Value> = world
        .agents
        .iter()
        .map(|a| {
            let intent = a.current_intent.as_ref().map(|d| {
                json!({
                    "action": d.action,
                    "tickPlanned": d.tick_planned,
                    "targetRoomId": d.target_room_id,
                    "targetAgentId": d.target_agent_id,
                })
            });
            json!({
                "id": a.id,
                "roomId": a.room_id,
                "state": a.state.as_str(),
                "pos": point(&a.position),
                "navTarget": a.nav_target.as_ref().map(point),
                "intent": intent,
                "memoryRevision": a.memory_revision,
                "decisionsApplied": a.decisions_applied,
                "lastThinkTick": a.last_think_tick,
            })
        })
        .collect();
    agents.sort_by(|x, y| x["id"].as_str().cmp(&y["id"].as_str()));

    let snapshot = json!({
        "tick": world.tick,
        "timeOfDay": (world.time_of_day * 1000.0).round() / 1000.0,
        "rooms": rooms,
        "agents": agents,
    });
    jcs_sha256_hex(&snapshot)
}
