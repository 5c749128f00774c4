#![no_main]

use std::collections::BTreeMap;

use libfuzzer_sys::fuzz_target;
use slotgate_core::backend::{BackendCall, RecordingBackend};
use slotgate_core::config::Config;
use slotgate_core::host::{PageContext, StaticHost};
use slotgate_core::lifecycle::{
    Collaborators, ControllerSnapshot, LifecycleController, SlotEvent,
};
use slotgate_core::slot::{AdSize, Priority, RenderOutcome, SlotConfig, SlotKind};
use slotgate_core::storage::MemoryStore;

const MAX_SLOTS: usize = 10;

fn slot_id(index: usize) -> String {
    if index % 4 == 0 {
        format!("billboard.{index}")
    } else {
        format!("rect.{index}")
    }
}

fn kind_for(tag: u8) -> SlotKind {
    match tag % 6 {
        0 => SlotKind::Standard,
        1 => SlotKind::OutOfPage,
        2 => SlotKind::Talkback,
        3 => SlotKind::Popunder,
        4 => SlotKind::InterstitialSmall,
        _ => SlotKind::InterstitialFull,
    }
}

/// Build one slot declaration from two bytes. Blockers may form cycles
/// or point at slots that don't exist.
fn declaration(index: usize, shape: u8, mask: u8) -> SlotConfig {
    let mut cfg = SlotConfig::new(slot_id(index), kind_for(shape));
    cfg.priority = match (shape >> 3) % 3 {
        0 => Priority::High,
        1 => Priority::Normal,
        _ => Priority::Low,
    };
    cfg.deferred = shape & 0x40 != 0;
    if shape & 0x80 != 0 {
        cfg.responsive = true;
        for (i, tier) in ["xxs", "xs", "s", "m", "l", "xl", "xxl"].iter().enumerate() {
            let sizes = if mask & (1 << (i % 8)) == 0 {
                vec![AdSize::ZERO]
            } else {
                vec![AdSize::new(728, 90)]
            };
            cfg.size_mapping.insert((*tier).to_string(), sizes);
        }
    } else {
        cfg.blocked_by = (0..8)
            .filter(|bit| mask & (1 << bit) != 0)
            .map(|bit| slot_id((index + bit + 1) % (MAX_SLOTS + 2)))
            .collect();
    }
    cfg
}

fuzz_target!(|data: &[u8]| {
    if data.len() > 65_536 || data.is_empty() {
        return;
    }

    let count = usize::from(data[0]) % MAX_SLOTS + 1;
    let header = 1 + count * 2;
    if data.len() < header {
        return;
    }

    let configs: Vec<SlotConfig> = (0..count)
        .map(|i| declaration(i, data[1 + i * 2], data[2 + i * 2]))
        .collect();
    let host = (0..MAX_SLOTS + 2).fold(StaticHost::new(), |h, i| h.with_element(slot_id(i)));

    let mut config = Config::default();
    config.throttle.affiliate_referrers = vec!["partner".to_string()];
    let context = PageContext {
        ready: true,
        interstitial_ready: true,
        referrer: "https://partner.example/".to_string(),
        viewport_width: 1024,
        ..PageContext::default()
    };
    let Ok(mut ctl) = LifecycleController::new(
        &config,
        context,
        Collaborators {
            host: Box::new(host),
            backend: RecordingBackend::new(),
            durable: Box::new(MemoryStore::new()),
            session: Box::new(MemoryStore::new()),
        },
    ) else {
        return;
    };

    let mut now_ms = 1_700_000_000_000i64;
    ctl.set_now(now_ms);
    ctl.register_slots(configs);
    ctl.run_initial_pass();

    for chunk in data[header..].chunks(4) {
        let [op, a, b, c] = match chunk {
            [a, b, c, d] => [*a, *b, *c, *d],
            _ => break,
        };
        let target = slot_id(usize::from(a) % (MAX_SLOTS + 2));

        match op % 6 {
            0 => ctl.enqueue(SlotEvent::Outcome {
                id: target,
                outcome: RenderOutcome::Empty,
            }),
            1 => ctl.enqueue(SlotEvent::Outcome {
                id: target,
                outcome: RenderOutcome::Sized(AdSize::new(u32::from(b) + 1, u32::from(c) + 1)),
            }),
            2 => ctl.enqueue(SlotEvent::BreakpointChanged {
                width: u32::from(u16::from_le_bytes([b, c])),
            }),
            3 => {
                ctl.process_events();
            }
            4 => {
                now_ms = now_ms.saturating_add(i64::from(u16::from_le_bytes([b, c])) * 100);
                ctl.set_now(now_ms);
                ctl.run_initial_pass();
            }
            _ => {
                let index = MAX_SLOTS + usize::from(b % 2);
                ctl.register_slots([declaration(index, c, a)]);
            }
        }
    }
    ctl.process_events();

    let snapshot = ctl.snapshot();
    for id in &snapshot.deferred {
        assert!(ctl.slot(id).is_some(), "deferred slot {id} is not registered");
    }

    let mut displays: BTreeMap<&str, usize> = BTreeMap::new();
    let mut requests = 0u64;
    for call in ctl.backend().calls() {
        match call {
            BackendCall::Display { id } => {
                *displays.entry(id.as_str()).or_default() += 1;
                requests += 1;
            }
            BackendCall::Refresh { ids } => requests += ids.len() as u64,
            BackendCall::Define { .. } => {}
        }
    }
    assert!(
        displays.values().all(|&n| n == 1),
        "slot displayed more than once: {displays:?}"
    );
    assert_eq!(
        requests,
        snapshot.counters.admitted,
        "every admitted slot is displayed or refreshed exactly once"
    );

    let json = serde_json::to_string(&snapshot).expect("snapshot serializes");
    let back: ControllerSnapshot = serde_json::from_str(&json).expect("snapshot deserializes");
    assert_eq!(back, snapshot);
});
