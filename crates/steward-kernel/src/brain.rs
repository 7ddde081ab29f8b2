//! Deterministic L0 decision brain.
//!
//! Turns a [`DecideContext`] into an [`AgentDecision`] without randomness: the
//! only variation comes from FNV rolls over `seed` and the request id, so the
//! same request always yields the same decision.

use std::collections::BTreeSet;

use steward_contracts::{AgentDecision, DecideContext, RoomRef};

use crate::fnv1a32;

/// Room ids the brain knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct L0WorldMap {
    pub dorm_a: &'static str,
    pub dorm_b: &'static str,
    pub kitchen: &'static str,
}

pub const DEFAULT_L0_WORLD_MAP: L0WorldMap = L0WorldMap {
    dorm_a: "r1",
    dorm_b: "r2",
    kitchen: "r4",
};

const ENERGY_REST: f64 = 0.25;
const HUNGER_EAT: f64 = 0.75;
const TALK_CHANCE_PERCENT: u32 = 30;

/// Action used when no real decision is available (rate limiting, fallbacks).
pub fn fallback_action(allowlist: &[String]) -> String {
    if allowlist.iter().any(|a| a == "WANDER") {
        "WANDER".to_string()
    } else if allowlist.iter().any(|a| a == "IDLE") {
        "IDLE".to_string()
    } else {
        allowlist
            .first()
            .cloned()
            .unwrap_or_else(|| "IDLE".to_string())
    }
}

pub fn l0_decide(
    request_id: &str,
    agent_id: &str,
    ctx: &DecideContext,
    seed: u64,
    map: &L0WorldMap,
) -> AgentDecision {
    let mut allow: Vec<String> = ctx.allowlist_actions.clone();
    allow.sort();
    allow.dedup();
    if allow.is_empty() {
        return decision(agent_id, "IDLE", "l0_empty_allowlist".to_string());
    }
    let allow_set: BTreeSet<&str> = allow.iter().map(|a| a.as_str()).collect();

    let needs = ctx.needs.clone().unwrap_or_default();
    let rooms = ctx.rooms.as_deref();
    let room_id = ctx.room_id.as_str();
    let kitchen = find_room_by_name(rooms, "kitchen").unwrap_or_else(|| map.kitchen.to_string());
    let dorm_target = if fnv1a32(agent_id) % 2 == 0 {
        map.dorm_a
    } else {
        map.dorm_b
    };

    let chosen = if let Some(energy) = needs.energy.filter(|e| *e < ENERGY_REST) {
        let rest = pick_first_allowed(&allow, &["REST_IN_DORM", "REST", "IDLE"]);
        let go = pick_first_allowed(&allow, &["GO_TO_ROOM", "MOVE_TO_ROOM"]);
        if room_id != map.dorm_a && room_id != map.dorm_b {
            let target = if has_room(rooms, dorm_target) {
                dorm_target
            } else if has_room(rooms, map.dorm_a) {
                map.dorm_a
            } else {
                map.dorm_b
            };
            if is_move(&go) {
                let mut d = decision(
                    agent_id,
                    &go,
                    format!("l0_rest_go_dorm (en={energy:.2}, target={target})"),
                );
                d.target_room_id = Some(target.to_string());
                d
            } else {
                decision(
                    agent_id,
                    &rest,
                    format!("l0_rest_no_move_capability (en={energy:.2})"),
                )
            }
        } else {
            decision(
                agent_id,
                &rest,
                format!("l0_rest (en={energy:.2}, room={room_id})"),
            )
        }
    } else if let Some(hunger) = needs.hunger.filter(|h| *h > HUNGER_EAT) {
        let eat = pick_first_allowed(&allow, &["EAT_IN_KITCHEN", "EAT", "IDLE"]);
        let go = pick_first_allowed(&allow, &["GO_TO_ROOM", "MOVE_TO_ROOM"]);
        if room_id != kitchen {
            if has_room(rooms, &kitchen) && is_move(&go) {
                let mut d = decision(
                    agent_id,
                    &go,
                    format!("l0_eat_go_kitchen (hunger={hunger:.2}, target={kitchen})"),
                );
                d.target_room_id = Some(kitchen.clone());
                d
            } else {
                decision(
                    agent_id,
                    &eat,
                    format!("l0_eat_no_move_capability (hunger={hunger:.2})"),
                )
            }
        } else {
            decision(
                agent_id,
                &eat,
                format!("l0_eat (hunger={hunger:.2}, room={room_id})"),
            )
        }
    } else {
        let mut near: Vec<&str> = ctx
            .nearby_agents
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|a| a.id.as_str())
            .collect();
        near.sort();

        let mut talk = None;
        if let Some(target) = near.first() {
            let roll = fnv1a32(&format!("{seed}:{request_id}")) % 100;
            if roll < TALK_CHANCE_PERCENT && allow_set.contains("TALK_TO_AGENT") {
                let mut d = decision(
                    agent_id,
                    "TALK_TO_AGENT",
                    format!("l0_talk (roll={roll}, target={target}, near={})", near.len()),
                );
                d.target_agent_id = Some(target.to_string());
                talk = Some(d);
            }
        }
        talk.unwrap_or_else(|| {
            let action = pick_first_allowed(&allow, &["WANDER", "IDLE"]);
            decision(
                agent_id,
                &action,
                format!(
                    "l0_default (en={}, hunger={}, near={})",
                    fmt_need(needs.energy),
                    fmt_need(needs.hunger),
                    near.len()
                ),
            )
        })
    };

    sanitize(chosen, &allow, &allow_set, rooms)
}

fn decision(agent_id: &str, action: &str, reason: String) -> AgentDecision {
    AgentDecision {
        agent_id: agent_id.to_string(),
        tick_planned: 0,
        action: action.to_string(),
        reason,
        target_room_id: None,
        target_agent_id: None,
        target_point: None,
    }
}

fn fmt_need(v: Option<f64>) -> String {
    v.map(|n| format!("{n:.2}")).unwrap_or_else(|| "?".to_string())
}

fn is_move(action: &str) -> bool {
    action == "GO_TO_ROOM" || action == "MOVE_TO_ROOM"
}

fn pick_first_allowed(allow: &[String], preferred: &[&str]) -> String {
    preferred
        .iter()
        .find(|p| allow.iter().any(|a| a == *p))
        .map(|p| p.to_string())
        .unwrap_or_else(|| allow.first().cloned().unwrap_or_else(|| "IDLE".to_string()))
}

fn has_room(rooms: Option<&[RoomRef]>, id: &str) -> bool {
    match rooms {
        Some(rooms) => rooms.iter().any(|r| r.id == id),
        None => true,
    }
}

fn find_room_by_name(rooms: Option<&[RoomRef]>, pattern: &str) -> Option<String> {
    let pattern = pattern.to_lowercase();
    rooms?
        .iter()
        .find(|r| {
            r.name
                .as_deref()
                .map(|n| n.to_lowercase().contains(&pattern))
                .unwrap_or(false)
        })
        .map(|r| r.id.clone())
}

fn sanitize(
    mut d: AgentDecision,
    allow: &[String],
    allow_set: &BTreeSet<&str>,
    rooms: Option<&[RoomRef]>,
) -> AgentDecision {
    if !allow_set.contains(d.action.as_str()) {
        d.action = if allow_set.contains("IDLE") {
            "IDLE".to_string()
        } else {
            allow[0].clone()
        };
        d.reason = format!("{}_sanitized", d.reason);
        d.target_room_id = None;
        d.target_agent_id = None;
        return d;
    }
    if let Some(target) = d.target_room_id.as_deref() {
        if rooms.is_some() && !has_room(rooms, target) {
            d.target_room_id = None;
            d.reason = format!("{}_invalid_room", d.reason);
        }
    }
    d
}

#[cfg(test)]
mod tests {
    use super::*;
    use steward_contracts::{NearbyAgent, Needs};

    fn ctx(room: &str, energy: f64, hunger: f64) -> DecideContext {
        DecideContext {
            agent_id: "a1".to_string(),
            room_id: room.to_string(),
            state: "IDLE".to_string(),
            needs: Some(Needs {
                energy: Some(energy),
                hunger: Some(hunger),
                anxiety: Some(0.1),
                aggression: Some(0.1),
            }),
            nearby_agents: None,
            rooms: Some(vec![
                RoomRef { id: "r1".to_string(), name: Some("Dorm A".to_string()) },
                RoomRef { id: "r2".to_string(), name: Some("Dorm B".to_string()) },
                RoomRef { id: "r3".to_string(), name: Some("Common Room".to_string()) },
                RoomRef { id: "r4".to_string(), name: Some("Kitchen".to_string()) },
            ]),
            allowlist_actions: vec![
                "IDLE".to_string(),
                "WANDER".to_string(),
                "GO_TO_ROOM".to_string(),
                "EAT_IN_KITCHEN".to_string(),
                "REST_IN_DORM".to_string(),
                "TALK_TO_AGENT".to_string(),
            ],
        }
    }

    #[test]
    fn tired_agent_outside_dorm_goes_to_a_dorm() {
        let d = l0_decide("req-1", "a1", &ctx("r3", 0.1, 0.2), 0, &DEFAULT_L0_WORLD_MAP);
        assert_eq!(d.action, "GO_TO_ROOM");
        let target = d.target_room_id.unwrap();
        assert!(target == "r1" || target == "r2");
    }

    #[test]
    fn tired_agent_in_dorm_rests() {
        let d = l0_decide("req-1", "a1", &ctx("r1", 0.1, 0.2), 0, &DEFAULT_L0_WORLD_MAP);
        assert_eq!(d.action, "REST_IN_DORM");
    }

    #[test]
    fn hungry_agent_goes_to_kitchen_found_by_name() {
        let d = l0_decide("req-1", "a1", &ctx("r3", 0.8, 0.9), 0, &DEFAULT_L0_WORLD_MAP);
        assert_eq!(d.action, "GO_TO_ROOM");
        assert_eq!(d.target_room_id.as_deref(), Some("r4"));

        let d = l0_decide("req-1", "a1", &ctx("r4", 0.8, 0.9), 0, &DEFAULT_L0_WORLD_MAP);
        assert_eq!(d.action, "EAT_IN_KITCHEN");
    }

    #[test]
    fn decisions_are_deterministic_per_request() {
        let mut c = ctx("r3", 0.8, 0.2);
        c.nearby_agents = Some(vec![
            NearbyAgent { id: "b".to_string(), role: None, dist: Some(1.0), state: None },
            NearbyAgent { id: "a".to_string(), role: None, dist: Some(2.0), state: None },
        ]);
        for i in 0..20 {
            let rid = format!("req-{i}");
            let first = l0_decide(&rid, "a1", &c, 7, &DEFAULT_L0_WORLD_MAP);
            let second = l0_decide(&rid, "a1", &c, 7, &DEFAULT_L0_WORLD_MAP);
            assert_eq!(first, second);
            if first.action == "TALK_TO_AGENT" {
                assert_eq!(first.target_agent_id.as_deref(), Some("a"));
            } else {
                assert_eq!(first.action, "WANDER");
            }
        }
    }

    #[test]
    fn empty_allowlist_idles() {
        let mut c = ctx("r3", 0.8, 0.2);
        c.allowlist_actions.clear();
        let d = l0_decide("req-1", "a1", &c, 0, &DEFAULT_L0_WORLD_MAP);
        assert_eq!(d.action, "IDLE");
        assert_eq!(d.reason, "l0_empty_allowlist");
    }

    #[test]
    fn fallback_prefers_wander_then_idle() {
        let list = |xs: &[&str]| xs.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        assert_eq!(fallback_action(&list(&["IDLE", "WANDER"])), "WANDER");
        assert_eq!(fallback_action(&list(&["TALK_TO_AGENT", "IDLE"])), "IDLE");
        assert_eq!(fallback_action(&list(&["TALK_TO_AGENT"])), "TALK_TO_AGENT");
    }
}
