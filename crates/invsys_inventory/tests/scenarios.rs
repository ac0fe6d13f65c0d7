//! End-to-end transaction scenarios against a shared container store

use invsys_core::{ContainerId, Handle, Version};
use invsys_inventory::prelude::*;
use std::sync::Arc;
use std::thread;

fn catalog() -> Arc<ItemTable> {
    let table = ItemTable::builder()
        .item(ItemDefinition::new("sword", "Sword").with_category(ItemCategory::Weapon))
        .item(
            ItemDefinition::new("potion", "Potion")
                .with_category(ItemCategory::Consumable)
                .with_max_stack(10),
        )
        .item(ItemDefinition::new("ore", "Iron Ore").with_category(ItemCategory::Material).with_max_stack(50))
        .build()
        .unwrap();
    Arc::new(table)
}

fn container(store: &ContainerStore, capacity: Capacity) -> ContainerId {
    let id = ContainerId::new();
    store.insert(InventoryContainer::new(id, Handle::null(), capacity));
    id
}

fn fill(engine: &TransactionEngine, store: &ContainerStore, id: ContainerId, stacks: &[(&str, u32)]) {
    let mut builder = Transaction::builder(id);
    for (item, qty) in stacks {
        builder = builder.insert(id, ItemStack::new(*item, *qty));
    }
    engine.apply(store, &builder.build(), &AllowAll).unwrap();
}

#[test]
fn move_sword_into_empty_slot() {
    let engine = TransactionEngine::new(catalog());
    let store = ContainerStore::new();
    let bag = container(&store, Capacity::Fixed(2));
    fill(&engine, &store, bag, &[("sword", 1)]);
    let before = store.read(bag, |c| c.version()).unwrap();

    let tx = Transaction::builder(bag)
        .move_stack(SlotRef::new(bag, 0), SlotRef::new(bag, 1))
        .build();
    engine.apply(&store, &tx, &AllowAll).unwrap();

    let snap = store.snapshot(bag).unwrap();
    assert_eq!(snap.slots, vec![None, Some(ItemStack::new("sword", 1))]);
    assert_eq!(snap.version, before.next());
}

#[test]
fn merge_potions_spills_remainder() {
    let engine = TransactionEngine::new(catalog());
    let store = ContainerStore::new();
    let bag = container(&store, Capacity::Fixed(2));
    let tx = Transaction::builder(bag)
        .insert(bag, ItemStack::new("potion", 8))
        .build();
    engine.apply(&store, &tx, &AllowAll).unwrap();
    // Build (8, 5) across both slots
    let tx = Transaction::builder(bag)
        .insert(bag, ItemStack::new("potion", 2))
        .split(SlotRef::new(bag, 0), SlotRef::new(bag, 1), 5)
        .build();
    engine.apply(&store, &tx, &AllowAll).unwrap();
    assert_eq!(
        store.snapshot(bag).unwrap().slots,
        vec![Some(ItemStack::new("potion", 5)), Some(ItemStack::new("potion", 5))]
    );
    let tx = Transaction::builder(bag)
        .insert(bag, ItemStack::new("potion", 3))
        .build();
    engine.apply(&store, &tx, &AllowAll).unwrap();
    assert_eq!(
        store.snapshot(bag).unwrap().slots,
        vec![Some(ItemStack::new("potion", 8)), Some(ItemStack::new("potion", 5))]
    );
    let version = store.read(bag, |c| c.version()).unwrap();

    let tx = Transaction::builder(bag)
        .merge(SlotRef::new(bag, 1), SlotRef::new(bag, 0))
        .build();
    let applied = engine.apply(&store, &tx, &AllowAll).unwrap();

    let snap = store.snapshot(bag).unwrap();
    assert_eq!(
        snap.slots,
        vec![Some(ItemStack::new("potion", 10)), Some(ItemStack::new("potion", 3))]
    );
    assert_eq!(snap.version, version.next());
    assert_eq!(applied.deltas.len(), 1);
    assert_eq!(applied.deltas[0].changes.len(), 2);
}

#[test]
fn transfer_between_containers_is_cross_container() {
    let engine = TransactionEngine::new(catalog());
    let store = ContainerStore::new();
    let chest = container(&store, Capacity::Fixed(4));
    let bag = container(&store, Capacity::Fixed(2));
    fill(&engine, &store, chest, &[("ore", 40)]);

    let tx = Transaction::builder(bag)
        .transfer(SlotRef::new(chest, 0), SlotRef::new(bag, 0), Some(15))
        .build();
    assert_eq!(tx.scope(), TransactionScope::CrossContainer);

    let applied = engine.apply(&store, &tx, &AllowAll).unwrap();
    assert_eq!(applied.deltas.len(), 2);
    assert_eq!(store.read(chest, |c| c.count_item("ore")), Some(25));
    assert_eq!(store.read(bag, |c| c.count_item("ore")), Some(15));
    assert_eq!(store.read(bag, |c| c.version()), Some(Version::new(1)));
    assert_eq!(store.read(chest, |c| c.version()), Some(Version::new(2)));
}

#[test]
fn requesting_container_keeps_its_version_when_untouched() {
    let engine = TransactionEngine::new(catalog());
    let store = ContainerStore::new();
    let chest = container(&store, Capacity::Fixed(2));
    let bag = container(&store, Capacity::Fixed(2));
    fill(&engine, &store, chest, &[("sword", 1)]);

    let tx = Transaction::builder(bag)
        .move_stack(SlotRef::new(chest, 0), SlotRef::new(chest, 1))
        .build();
    let applied = engine.apply(&store, &tx, &AllowAll).unwrap();

    assert_eq!(applied.containers().collect::<Vec<_>>(), vec![chest]);
    assert_eq!(store.read(chest, |c| c.version()), Some(Version::new(2)));
    assert_eq!(store.read(bag, |c| c.version()), Some(Version::ZERO));
}

#[test]
fn transfer_onto_other_item_changes_nothing() {
    let engine = TransactionEngine::new(catalog());
    let store = ContainerStore::new();
    let chest = container(&store, Capacity::Fixed(2));
    let bag = container(&store, Capacity::Fixed(1));
    fill(&engine, &store, chest, &[("sword", 1)]);
    fill(&engine, &store, bag, &[("potion", 1)]);
    let chest_before = store.snapshot(chest).unwrap();
    let bag_before = store.snapshot(bag).unwrap();

    let tx = Transaction::builder(bag)
        .transfer(SlotRef::new(chest, 0), SlotRef::new(bag, 0), None)
        .build();
    let err = engine.apply(&store, &tx, &AllowAll).unwrap_err();
    assert!(matches!(err, TransactionError::TypeMismatch { .. }));

    assert_eq!(store.snapshot(chest).unwrap(), chest_before);
    assert_eq!(store.snapshot(bag).unwrap(), bag_before);
}

#[test]
fn opposite_transfers_from_many_threads_do_not_deadlock() {
    let engine = Arc::new(TransactionEngine::new(catalog()));
    let store = Arc::new(ContainerStore::new());
    let left = container(&store, Capacity::Fixed(8));
    let right = container(&store, Capacity::Fixed(8));
    fill(&engine, &store, left, &[("ore", 200)]);
    fill(&engine, &store, right, &[("ore", 200)]);

    let workers: Vec<_> = (0..8)
        .map(|i| {
            let engine = engine.clone();
            let store = store.clone();
            let (from, to) = if i % 2 == 0 { (left, right) } else { (right, left) };
            thread::spawn(move || {
                let mut committed = 0u32;
                for _ in 0..50 {
                    let tx = Transaction::builder(from)
                        .transfer(SlotRef::new(from, 0), SlotRef::new(to, 0), Some(1))
                        .build();
                    if engine.apply(&store, &tx, &AllowAll).is_ok() {
                        committed += 1;
                    }
                }
                committed
            })
        })
        .collect();

    let committed: u32 = workers.into_iter().map(|w| w.join().unwrap()).sum();
    assert!(committed > 0);

    let total = store.read(left, |c| c.total_quantity()).unwrap()
        + store.read(right, |c| c.total_quantity()).unwrap();
    assert_eq!(total, 400);

    let versions = store.read(left, |c| c.version().get()).unwrap()
        + store.read(right, |c| c.version().get()).unwrap();
    // Each container started at 1 after filling; every commit bumps both
    assert_eq!(versions, 2 + 2 * u64::from(committed));
}

#[test]
fn unknown_container_is_rejected() {
    let engine = TransactionEngine::new(catalog());
    let store = ContainerStore::new();
    let bag = container(&store, Capacity::Fixed(1));
    let ghost = ContainerId::new();

    let tx = Transaction::builder(bag)
        .transfer(SlotRef::new(ghost, 0), SlotRef::new(bag, 0), None)
        .build();
    assert_eq!(
        engine.apply(&store, &tx, &AllowAll),
        Err(TransactionError::UnknownContainer(ghost))
    );
}

#[test]
fn replaying_deltas_rebuilds_the_container() {
    let engine = TransactionEngine::new(catalog());
    let store = ContainerStore::new();
    let bag = container(&store, Capacity::Fixed(4));
    let mut replica = InventoryContainer::new(bag, Handle::null(), Capacity::Fixed(4));

    let transactions = vec![
        Transaction::builder(bag).insert(bag, ItemStack::new("potion", 14)).build(),
        Transaction::builder(bag)
            .split(SlotRef::new(bag, 0), SlotRef::new(bag, 3), 4)
            .build(),
        Transaction::builder(bag).insert(bag, ItemStack::new("sword", 1)).build(),
        Transaction::builder(bag)
            .swap(SlotRef::new(bag, 0), SlotRef::new(bag, 2))
            .remove(SlotRef::new(bag, 1), 2)
            .build(),
    ];
    for tx in &transactions {
        let applied = engine.apply(&store, tx, &AllowAll).unwrap();
        for delta in &applied.deltas {
            replica.apply_delta(delta).unwrap();
        }
    }

    assert_eq!(replica.snapshot(), store.snapshot(bag).unwrap());
}
