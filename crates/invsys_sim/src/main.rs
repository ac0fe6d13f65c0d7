//! Inventory replication simulation
//!
//! Runs a host and two observers in one process over fault-injecting loopback
//! links, heals the links, checks that every side agrees, hands the shared
//! chest to an observer, and saves the host.
//!
//! Run with: cargo run -p invsys_sim -- [peer.toml] [items.toml]

use crossbeam_channel::Receiver;
use invsys_core::{ContainerId, OwnerKind, PeerId};
use invsys_inventory::{catalog, Capacity, ItemStack, ItemTable, SlotRef, Transaction};
use invsys_net::{FaultConfig, FaultyTransport, LoopbackHub, LoopbackTransport};
use invsys_peer::{InventoryPeer, PeerConfig, PeerEvent, SaveManager, Submission};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::error::Error;
use std::time::{Duration, Instant};

const DEFAULT_ITEMS: &str = r#"
[[items]]
id = "potion"
name = "Healing Potion"
category = "Consumable"
max_stack = 10
weight = 0.5

[[items]]
id = "arrow"
name = "Arrow"
category = "Weapon"
max_stack = 50
weight = 0.1

[[items]]
id = "sword"
name = "Iron Sword"
category = "Weapon"
weight = 3.0

[[items]]
id = "ore"
name = "Iron Ore"
category = "Material"
max_stack = 20
weight = 1.0
"#;

const ITEMS: [&str; 4] = ["potion", "arrow", "sword", "ore"];
const STEPS: u32 = 200;
const STEP: Duration = Duration::from_millis(20);
const SEED: u64 = 42;

type Side = InventoryPeer<FaultyTransport<LoopbackTransport>>;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(err) = run() {
        log::error!("Simulation failed: {}", err);
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => PeerConfig::load(&path)?,
        None => PeerConfig::development(PeerId::HOST),
    };
    let items = match args.next() {
        Some(path) => std::fs::read_to_string(path)?,
        None => DEFAULT_ITEMS.to_string(),
    };
    let catalog = catalog::install(ItemTable::from_toml_str(&items)?)?;
    log::info!("{} item types loaded", catalog.len());

    let hub = LoopbackHub::new();
    let mut sides: Vec<Side> = [PeerId::HOST, PeerId(1), PeerId(2)]
        .into_iter()
        .map(|id| {
            let link = FaultyTransport::new(hub.connect(id), FaultConfig::lossy(SEED + id.raw() as u64));
            InventoryPeer::new(config.clone().with_peer_id(id), catalog.clone(), link)
        })
        .collect();
    let receivers: Vec<Receiver<PeerEvent>> = sides.iter().map(|side| side.events()).collect();

    let mut now = Instant::now();
    let ada = sides[0].on_owner_spawned(OwnerKind::Character, "Ada", Capacity::Fixed(8));
    let chest = sides[0].on_owner_spawned(OwnerKind::Container, "chest", Capacity::Fixed(12));
    for side in &mut sides[1..] {
        side.subscribe(chest, PeerId::HOST, now);
    }

    // Lossy phase
    let mut rng = StdRng::seed_from_u64(SEED);
    for step in 0..STEPS {
        now += STEP;
        let actor = rng.gen_range(0..sides.len());
        let tx = if actor == 0 {
            host_transaction(&mut rng, ada, chest)
        } else {
            observer_transaction(&mut rng, chest)
        };
        match sides[actor].request_transaction(tx, now) {
            Ok(Submission::Committed(applied)) => {
                log::debug!("step {}: {} committed {} slots", step, actor, applied.changed_slots())
            }
            Ok(Submission::Speculative { request, .. }) => {
                log::debug!("step {}: {} speculating {}", step, actor, request)
            }
            Err(err) => log::debug!("step {}: {} refused: {}", step, actor, err),
        }
        for side in &mut sides {
            side.tick(now)?;
        }
    }

    // Heal and resync
    for side in &mut sides {
        side.transport_mut().set_config(FaultConfig::reliable());
        side.transport_mut().flush()?;
    }
    for side in &mut sides[1..] {
        side.resync(chest, now)?;
    }
    settle(&mut sides, &mut now)?;
    check_agreement(&sides, chest)?;
    log::info!("All sides agree on the chest after {} steps", STEPS);

    // Hand the chest to the second observer
    sides[2].request_authority(chest, now)?;
    settle(&mut sides, &mut now)?;
    for side in &sides {
        log::info!(
            "{} sees {} held by {:?}",
            side.local_peer(),
            chest,
            side.authority_of(chest)
        );
    }
    sides[1].request_transaction(
        Transaction::builder(chest)
            .insert(chest, ItemStack::new("potion", 1))
            .build(),
        now,
    )?;
    settle(&mut sides, &mut now)?;
    check_agreement(&sides, chest)?;
    sides[2].log_inventory(chest);
    sides[0].log_inventory(ada);

    for (side, receiver) in sides.iter().zip(&receivers) {
        report(side, receiver);
    }

    let mut manager = SaveManager::new(config.save_dir.clone()).with_format(config.save_format);
    sides[0].save(&mut manager, "host", "simulation")?;
    log::info!("Host saved to {}", manager.save_dir().display());
    Ok(())
}

fn host_transaction(rng: &mut StdRng, ada: ContainerId, chest: ContainerId) -> Transaction {
    match rng.gen_range(0..3) {
        0 => Transaction::builder(ada)
            .insert(ada, random_stack(rng))
            .build(),
        1 => Transaction::builder(ada)
            .transfer(
                SlotRef::new(ada, rng.gen_range(0..8)),
                SlotRef::new(chest, rng.gen_range(0..12)),
                None,
            )
            .build(),
        _ => Transaction::builder(chest)
            .insert(chest, random_stack(rng))
            .build(),
    }
}

fn observer_transaction(rng: &mut StdRng, chest: ContainerId) -> Transaction {
    let slot = SlotRef::new(chest, rng.gen_range(0..12));
    match rng.gen_range(0..3) {
        0 => Transaction::builder(chest)
            .insert(chest, random_stack(rng))
            .build(),
        1 => Transaction::builder(chest)
            .swap(slot, SlotRef::new(chest, rng.gen_range(0..12)))
            .build(),
        _ => Transaction::builder(chest).remove(slot, 1).build(),
    }
}

fn random_stack(rng: &mut StdRng) -> ItemStack {
    let item = ITEMS[rng.gen_range(0..ITEMS.len())];
    let quantity = if item == "sword" { 1 } else { rng.gen_range(1..6) };
    ItemStack::new(item, quantity)
}

/// Tick every side until in-flight traffic is through
fn settle(sides: &mut [Side], now: &mut Instant) -> Result<(), Box<dyn Error>> {
    for _ in 0..6 {
        *now += STEP;
        for side in sides.iter_mut() {
            side.tick(*now)?;
        }
    }
    Ok(())
}

fn check_agreement(sides: &[Side], chest: ContainerId) -> Result<(), Box<dyn Error>> {
    let views: Vec<_> = sides.iter().map(|side| side.snapshot(chest)).collect();
    match views.first() {
        Some(Some(first)) if views.iter().all(|v| v.as_ref() == Some(first)) => Ok(()),
        _ => Err(format!("sides disagree on {}: {:?}", chest, views).into()),
    }
}

fn report(side: &Side, events: &Receiver<PeerEvent>) {
    let (mut confirmed, mut reverted, mut resyncs, mut rejected) = (0, 0, 0, 0);
    for event in events.try_iter() {
        match event {
            PeerEvent::SpeculationConfirmed { .. } => confirmed += 1,
            PeerEvent::SpeculationReverted { .. } => reverted += 1,
            PeerEvent::ResyncRequested { .. } => resyncs += 1,
            PeerEvent::TransactionRejected { .. } => rejected += 1,
            _ => {}
        }
    }
    let stats = side.transport_stats();
    let sync = side.sync_stats();
    log::info!(
        "{}: {} confirmed, {} reverted, {} rejected, {} resyncs, {} duplicates; link dropped {} duplicated {} reordered {}",
        side.local_peer(),
        confirmed,
        reverted,
        rejected,
        resyncs,
        sync.duplicates,
        stats.dropped,
        stats.duplicated,
        stats.reordered
    );
}
