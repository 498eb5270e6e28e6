//! Delivery-order tests: nested emissions, failing listeners, forwarding and
//! destruction while events are in flight.

use std::cell::RefCell;
use std::rc::Rc;

use futures::FutureExt;
use serde_json::json;
use xatro_world::prelude::*;

fn journaled() -> (World, Rc<RefCell<EventJournal>>) {
    let journal = Rc::new(RefCell::new(EventJournal::new()));
    (World::new(EventJournal::recorder(&journal)), journal)
}

fn log_listener(world: &World, tag: &'static str, log: &Rc<RefCell<Vec<String>>>) -> ListenerId {
    let log = Rc::clone(log);
    world.listener(move |_, ev| {
        log.borrow_mut().push(format!("{tag}: {ev}"));
        Ok(())
    })
}

// -- breadth-first delivery -------------------------------------------------

#[test]
fn nested_emissions_are_delivered_after_current_event() {
    let world = World::default();
    let a = world.create("a").id();
    let log = Rc::new(RefCell::new(Vec::new()));

    // First listener reacts to hp changes by setting "echo".
    let a2 = a.clone();
    let reacting = {
        let log = Rc::clone(&log);
        world.listener(move |w, ev| {
            log.borrow_mut().push(format!("first: {ev}"));
            if let Event::AttrSet { name, value, .. } = ev {
                if name == "hp" {
                    w.set_attr(&a2, "echo", value.clone())?;
                    // Applied already, even though not yet delivered.
                    assert_eq!(w.get(&a2)?["echo"], value.clone());
                }
            }
            Ok(())
        })
    };
    let second = log_listener(&world, "second", &log);
    world.subscribe_to(&a, reacting).unwrap();
    world.subscribe_to(&a, second).unwrap();

    world.set_attr(&a, "hp", 3).unwrap();

    let expected: Vec<String> = vec![
        format!("first: {a}.hp = 3"),
        format!("second: {a}.hp = 3"),
        format!("first: {a}.echo = 3"),
        format!("second: {a}.echo = 3"),
    ];
    assert_eq!(*log.borrow(), expected);
    assert!(!world.is_dispatching());
}

#[test]
fn receiver_sees_events_in_emission_order() {
    let (world, journal) = journaled();
    let a = world.create("a").id();
    let a2 = a.clone();
    let l = world.listener(move |w, ev| {
        if matches!(ev, Event::AttrSet { name, .. } if name == "hp") {
            w.add_item(&a2, "log", "hit")?;
            w.set_attr(&a2, "flag", true)?;
        }
        Ok(())
    });
    world.subscribe_to(&a, l).unwrap();
    world.set_attr(&a, "hp", 1).unwrap();

    let tags: Vec<&str> = journal.borrow().events().map(Event::tag).collect();
    assert_eq!(tags, vec!["created", "attr_set", "attr_set", "item_added", "attr_set"]);
    assert_eq!(journal.borrow().replay(), world.state());
}

// -- listener failures ------------------------------------------------------

#[test]
fn failing_listener_does_not_stop_others() {
    let world = World::default();
    let a = world.create("a").id();
    let log = Rc::new(RefCell::new(Vec::new()));
    let failing = world.listener(|_, _| anyhow::bail!("boom"));
    let ok = log_listener(&world, "ok", &log);
    world.subscribe_to(&a, failing).unwrap();
    world.subscribe_to(&a, ok).unwrap();

    world.set_attr(&a, "hp", 1).unwrap();
    world.set_attr(&a, "hp", 2).unwrap();
    assert_eq!(log.borrow().len(), 2);
    assert_eq!(world.get(&a).unwrap()["hp"], json!(2));
}

#[test]
fn failing_receiver_is_contained() {
    let world = World::new(|_| anyhow::bail!("disk full"));
    let a = world.create("a").id();
    world.set_attr(&a, "hp", 1).unwrap();
    assert_eq!(world.get(&a).unwrap()["hp"], json!(1));
}

// -- forwarding -------------------------------------------------------------

#[test]
fn room_hears_forwarded_bot_emissions() {
    let world = World::default();
    let room = world.create("square").id();
    let bot = world.create("bot").id();
    let log = Rc::new(RefCell::new(Vec::new()));
    let room_watcher = log_listener(&world, "room", &log);
    world.subscribe_to(&room, room_watcher).unwrap();
    world.subscribe_to(&bot, Subscriber::Forward(room.clone())).unwrap();

    world.set_attr(&bot, "hp", 5).unwrap();
    assert_eq!(*log.borrow(), vec![format!("room: {bot}.hp = 5")]);
}

#[test]
fn forward_cycle_delivers_once() {
    let world = World::default();
    let a = world.create("a").id();
    let b = world.create("b").id();
    world.subscribe_to(&a, Subscriber::Forward(b.clone())).unwrap();
    world.subscribe_to(&b, Subscriber::Forward(a.clone())).unwrap();
    let log = Rc::new(RefCell::new(Vec::new()));
    let l = log_listener(&world, "l", &log);
    world.subscribe_to(&a, l).unwrap();
    world.subscribe_to(&b, l).unwrap();

    world.set_attr(&a, "x", 1).unwrap();
    assert_eq!(log.borrow().len(), 1);
}

#[test]
fn forward_cycle_reaches_each_listener_once() {
    let world = World::default();
    let a = world.create("a").id();
    let b = world.create("b").id();
    world.subscribe_to(&a, Subscriber::Forward(b.clone())).unwrap();
    world.subscribe_to(&b, Subscriber::Forward(a.clone())).unwrap();
    let log = Rc::new(RefCell::new(Vec::new()));
    let on_a = log_listener(&world, "on a", &log);
    let on_b = log_listener(&world, "on b", &log);
    world.subscribe_to(&a, on_a).unwrap();
    world.subscribe_to(&b, on_b).unwrap();

    world.set_attr(&a, "x", 1).unwrap();
    assert_eq!(*log.borrow(), vec![format!("on a: {a}.x = 1"), format!("on b: {a}.x = 1")]);

    log.borrow_mut().clear();
    world.set_attr(&b, "x", 2).unwrap();
    assert_eq!(*log.borrow(), vec![format!("on b: {b}.x = 2"), format!("on a: {b}.x = 2")]);
}

#[test]
fn bots_in_a_square_hear_each_other() {
    let world = World::default();
    let square = world.create("square").id();
    let alice = world.create("bot").id();
    let bob = world.create("bot").id();
    for bot in [&alice, &bob] {
        world.subscribe_to(bot, Subscriber::Forward(square.clone())).unwrap();
        world.subscribe_to(&square, Subscriber::Receiver(bot.clone())).unwrap();
    }
    let log = Rc::new(RefCell::new(Vec::new()));
    let bob_ears = log_listener(&world, "bob", &log);
    world.receive_for(&bob, bob_ears).unwrap();

    world.set_attr(&alice, "hp", 9).unwrap();
    assert_eq!(*log.borrow(), vec![format!("bob: {alice}.hp = 9")]);
}

// -- destruction ------------------------------------------------------------

#[test]
fn subscribers_hear_destroyed_then_nothing() {
    let world = World::default();
    let a = world.create("a").id();
    let log = Rc::new(RefCell::new(Vec::new()));
    let l = log_listener(&world, "l", &log);
    world.subscribe_to(&a, l).unwrap();

    world.destroy(&a).unwrap();
    assert_eq!(*log.borrow(), vec![format!("l: {a} DESTROYED")]);
    assert!(matches!(world.subscribe_to(&a, l), Err(WorldError::NotFound { .. })));
}

#[test]
fn listener_can_destroy_its_source() {
    let (world, journal) = journaled();
    let a = world.create("a").id();
    let a2 = a.clone();
    let reaper = world.listener(move |w, ev| {
        if matches!(ev, Event::AttrSet { name, value, .. } if name == "hp" && *value == json!(0)) {
            w.destroy(&a2)?;
        }
        Ok(())
    });
    world.subscribe_to(&a, reaper).unwrap();

    let death = world.on_event(&a, Event::Destroyed { id: a.clone() }).unwrap();
    world.set_attr(&a, "hp", 0).unwrap();

    assert!(!world.contains(&a));
    assert_eq!(death.now_or_never(), Some(Ok(Event::Destroyed { id: a.clone() })));
    assert_eq!(journal.borrow().replay(), world.state());
}

#[test]
fn cascade_wait_in_envelope_is_cancelled_with_holder() {
    let world = World::default();
    let bot = world.create("bot").id();
    let target = world.create("bot").id();
    let wait = world.on_become(&target, "hp", 0).unwrap();
    world.envelope(&bot).unwrap().attach("cascade", Box::new(wait));

    world.destroy(&bot).unwrap();
    assert_eq!(world.pending_waits(&target), 0);
    world.set_attr(&target, "hp", 0).unwrap();
    assert!(world.contains(&target));
}

// -- custom events ----------------------------------------------------------

#[test]
fn custom_events_leave_state_alone() {
    let (world, journal) = journaled();
    let a = world.create("a").id();
    let before = world.state();
    world
        .emit(
            Event::Custom { name: "winner".into(), id: Some(a.clone()), payload: json!({"team": "red"}) },
            Some(&a),
        )
        .unwrap();
    assert_eq!(world.state(), before);
    assert_eq!(journal.borrow().events_tagged("custom").count(), 1);
    let line = journal.borrow().transcript().pop().unwrap_or_default();
    assert!(line.ends_with(&format!("{a} winner {}", json!({"team": "red"}))));
}

// -- emitting state changes -------------------------------------------------

#[test]
fn emitted_destroyed_tears_the_object_down() {
    let world = World::default();
    let a = world.create("a").id();
    let other = world.create("other").id();
    let log = Rc::new(RefCell::new(Vec::new()));
    let l = log_listener(&world, "l", &log);
    world.subscribe_to(&a, l).unwrap();
    let pending = world.on_become(&a, "hp", 0).unwrap();
    world.envelope(&a).unwrap().insert("note", 1);

    world.emit(Event::Destroyed { id: a.clone() }, Some(&a)).unwrap();

    assert!(!world.contains(&a));
    assert_eq!(*log.borrow(), vec![format!("l: {a} DESTROYED")]);
    assert_eq!(pending.now_or_never(), Some(Err(WorldError::Abandoned { id: a.clone() })));
    assert_eq!(world.pending_waits(&a), 0);
    assert!(matches!(world.envelope(&a), Err(WorldError::NotFound { .. })));

    // The listener is no longer reachable through the dead object.
    world.subscribe_to(&other, Subscriber::Forward(a.clone())).unwrap_err();
    world.set_attr(&other, "hp", 1).unwrap();
    assert_eq!(log.borrow().len(), 1);
}

#[test]
fn emitted_created_cannot_revive_an_object() {
    let (world, journal) = journaled();
    let a = world.create("a").id();
    assert_eq!(
        world.emit(Event::Created { id: a.clone() }, None),
        Err(WorldError::AlreadyExists { id: a.clone() })
    );
    world.destroy(&a).unwrap();
    let before = journal.borrow().len();

    assert_eq!(
        world.emit(Event::Created { id: a.clone() }, None),
        Err(WorldError::AlreadyExists { id: a.clone() })
    );
    assert!(!world.contains(&a));
    assert_eq!(journal.borrow().len(), before);

    assert_eq!(
        world.emit(Event::Destroyed { id: a.clone() }, None),
        Err(WorldError::NotFound { id: a.clone() })
    );
}

#[test]
fn emitted_changes_follow_the_mutation_rules() {
    let (world, journal) = journaled();
    let a = world.create("a").id();
    world.set_attr(&a, "hp", 3).unwrap();
    let before = journal.borrow().len();

    assert_eq!(
        world.emit(
            Event::AttrSet { id: a.clone(), name: ID_ATTR.into(), value: json!("someone-else") },
            Some(&a),
        ),
        Err(WorldError::ReadOnlyAttr { id: a.clone(), name: ID_ATTR.into() })
    );
    assert_eq!(
        world.emit(Event::AttrDel { id: a.clone(), name: KIND_ATTR.into() }, Some(&a)),
        Err(WorldError::ReadOnlyAttr { id: a.clone(), name: KIND_ATTR.into() })
    );
    assert_eq!(
        world.emit(Event::ItemAdded { id: a.clone(), name: "hp".into(), value: json!(1) }, Some(&a)),
        Err(WorldError::NotAList { id: a.clone(), name: "hp".into() })
    );
    assert_eq!(
        world.emit(
            Event::ItemRemoved { id: a.clone(), name: "bag".into(), value: json!(1) },
            Some(&a),
        ),
        Err(WorldError::MissingItem { id: a.clone(), name: "bag".into(), value: json!(1) })
    );
    assert_eq!(world.get(&a).unwrap().id(), a);
    assert_eq!(journal.borrow().len(), before);

    world
        .emit(Event::AttrSet { id: a.clone(), name: "hp".into(), value: json!(4) }, Some(&a))
        .unwrap();
    assert_eq!(world.get(&a).unwrap()["hp"], json!(4));
    assert_eq!(journal.borrow().replay(), world.state());
}

// -- listener panics --------------------------------------------------------

#[test]
fn events_queued_before_a_panic_are_dropped() {
    let world = World::default();
    let a = world.create("a").id();
    let b = world.create("b").id();
    let log = Rc::new(RefCell::new(Vec::new()));
    let on_a = log_listener(&world, "on a", &log);
    world.subscribe_to(&a, on_a).unwrap();
    let b_hp = world.on_become(&b, "hp", 0).unwrap();

    let (a2, b2) = (a.clone(), b.clone());
    let panicking = world.listener(move |w, ev| {
        if matches!(ev, Event::AttrSet { name, .. } if name == "trigger") {
            w.set_attr(&a2, "echo", 1)?;
            w.destroy(&b2)?;
            panic!("listener bug");
        }
        Ok(())
    });
    world.subscribe_to(&b, panicking).unwrap();

    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        world.set_attr(&b, "trigger", true)
    }));
    assert!(outcome.is_err());
    assert!(!world.is_dispatching());

    // Changes made before the panic are kept; their events are not delivered.
    assert_eq!(world.get(&a).unwrap()["echo"], json!(1));
    assert!(!world.contains(&b));
    assert_eq!(b_hp.now_or_never(), Some(Err(WorldError::Abandoned { id: b.clone() })));
    assert_eq!(world.pending_waits(&b), 0);

    // A later, unrelated change delivers only its own event.
    world.set_attr(&a, "hp", 2).unwrap();
    assert_eq!(*log.borrow(), vec![format!("on a: {a}.hp = 2")]);
}
