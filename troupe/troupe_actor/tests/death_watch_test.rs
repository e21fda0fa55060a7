//! Integration tests for death watch.

use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use troupe_actor::{
    Actor, ActorRef, ActorSystem, Context, Envelope, Fault, Lifecycle, Props, Terminated,
};
use troupe_core::Settings;

/// Messages understood by [`Watcher`].
enum WatchCmd {
    Watch(ActorRef),
    Unwatch(ActorRef),
}

/// Reports every `Terminated` it receives. With `handle_terminated` off it
/// leaves them unhandled instead.
struct Watcher {
    seen: Sender<Terminated>,
    handle_terminated: bool,
}

impl Actor for Watcher {
    fn receive(&mut self, ctx: &mut Context<'_>, envelope: Envelope) -> Result<(), Fault> {
        let envelope = match envelope.downcast::<WatchCmd>() {
            Ok((WatchCmd::Watch(subject), _)) => {
                ctx.watch(&subject);
                return Ok(());
            }
            Ok((WatchCmd::Unwatch(subject), _)) => {
                ctx.unwatch(&subject);
                return Ok(());
            }
            Err(envelope) => envelope,
        };
        if self.handle_terminated {
            if let Some(terminated) = envelope.downcast_ref::<Terminated>() {
                let _ = self.seen.send(terminated.clone());
                return Ok(());
            }
        }
        ctx.unhandled(envelope)
    }
}

fn watcher(
    system: &ActorSystem,
    name: &str,
    handle_terminated: bool,
) -> (ActorRef, Receiver<Terminated>) {
    let (tx, rx) = unbounded();
    let watcher = system
        .actor_of(
            Props::new(move || Watcher {
                seen: tx.clone(),
                handle_terminated,
            }),
            name,
        )
        .unwrap();
    (watcher, rx)
}

/// Shape of a subtree of [`Node`]s.
#[derive(Clone)]
struct Shape {
    name: &'static str,
    children: Vec<Shape>,
}

fn leaf(name: &'static str) -> Shape {
    Shape {
        name,
        children: Vec::new(),
    }
}

/// Does nothing but create the children described by `children`, reporting
/// the reference of every actor it creates.
struct Node {
    children: Vec<Shape>,
    created: Sender<ActorRef>,
}

impl Actor for Node {
    fn receive(&mut self, ctx: &mut Context<'_>, envelope: Envelope) -> Result<(), Fault> {
        ctx.unhandled(envelope)
    }

    fn pre_start(&mut self, ctx: &mut Context<'_>) -> Result<(), Fault> {
        for shape in &self.children {
            let props = node_props(shape.children.clone(), self.created.clone());
            let child = ctx.actor_of(props, shape.name)?;
            let _ = self.created.send(child);
        }
        Ok(())
    }
}

fn node_props(children: Vec<Shape>, created: Sender<ActorRef>) -> Props {
    Props::new(move || Node {
        children: children.clone(),
        created: created.clone(),
    })
}

fn system() -> ActorSystem {
    ActorSystem::with_settings(Settings::calling_thread()).unwrap()
}

#[test]
fn test_cascading_stop_reports_parent_last() {
    let system = system();
    let (created_tx, created_rx) = unbounded();
    let parent = system
        .actor_of(node_props(vec![leaf("child")], created_tx), "parent")
        .unwrap();
    system.run_until_idle();
    let child = created_rx.try_recv().unwrap();
    assert_eq!(child.path(), "troupe://troupe/user/parent/child");

    let (watcher, seen) = watcher(&system, "watcher", true);
    watcher.tell(WatchCmd::Watch(parent.clone()), None);
    watcher.tell(WatchCmd::Watch(child.clone()), None);
    system.run_until_idle();

    system.stop(&parent);
    system.run_until_idle();

    let order: Vec<ActorRef> = seen.try_iter().map(|t| t.actor).collect();
    assert_eq!(order, vec![child.clone(), parent.clone()]);
    assert!(parent.is_terminated());
    assert!(child.is_terminated());
    assert_eq!(watcher.lifecycle(), Lifecycle::Started);
}

#[test]
fn test_cascading_stop_across_two_levels() {
    let system = system();
    let (created_tx, created_rx) = unbounded();
    let shape = vec![
        Shape {
            name: "a",
            children: vec![leaf("a1")],
        },
        leaf("b"),
    ];
    let parent = system.actor_of(node_props(shape, created_tx), "root").unwrap();
    system.run_until_idle();

    let descendants: Vec<ActorRef> = created_rx.try_iter().collect();
    let named = |name: &str| {
        descendants
            .iter()
            .find(|d| d.name() == name)
            .cloned()
            .unwrap()
    };
    let (a, a1, b) = (named("a"), named("a1"), named("b"));
    assert_eq!(a1.path(), "troupe://troupe/user/root/a/a1");

    let (watcher, seen) = watcher(&system, "watcher", true);
    for subject in [&parent, &a, &a1, &b] {
        watcher.tell(WatchCmd::Watch(subject.clone()), None);
    }
    system.run_until_idle();

    system.stop(&parent);
    system.run_until_idle();

    let order: Vec<ActorRef> = seen.try_iter().map(|t| t.actor).collect();
    assert_eq!(order.len(), 4);
    assert_eq!(order.last(), Some(&parent));
    let position = |actor: &ActorRef| order.iter().position(|o| o == actor).unwrap();
    assert!(position(&a1) < position(&a));
    for actor in [&parent, &a, &a1, &b] {
        assert!(actor.is_terminated());
    }
}

#[test]
fn test_terminated_carries_flags() {
    let system = system();
    let (tx, _rx) = unbounded();
    let subject = system.actor_of(node_props(Vec::new(), tx), "subject").unwrap();
    let (watcher, seen) = watcher(&system, "watcher", true);
    watcher.tell(WatchCmd::Watch(subject.clone()), None);
    system.run_until_idle();

    subject.stop();
    system.run_until_idle();

    let terminated = seen.try_recv().unwrap();
    assert_eq!(terminated.actor, subject);
    assert!(terminated.existence_confirmed);
    assert!(!terminated.address_terminated);
    assert!(seen.try_recv().is_err());
}

#[test]
fn test_watching_a_dead_actor() {
    let system = system();
    let (tx, _rx) = unbounded();
    let subject = system.actor_of(node_props(Vec::new(), tx), "short-lived").unwrap();
    subject.stop();
    system.run_until_idle();
    assert!(subject.is_terminated());

    let (watcher, seen) = watcher(&system, "latecomer", true);
    watcher.tell(WatchCmd::Watch(subject.clone()), None);
    system.run_until_idle();

    let terminated = seen.try_recv().unwrap();
    assert_eq!(terminated.actor, subject);
    assert!(!terminated.existence_confirmed);
}

#[test]
fn test_unwatch_discards_queued_terminated() {
    let system = system();
    let (tx, _rx) = unbounded();
    let subject = system.actor_of(node_props(Vec::new(), tx), "subject").unwrap();
    let (watcher, seen) = watcher(&system, "fickle", true);
    watcher.tell(WatchCmd::Watch(subject.clone()), None);
    system.run_until_idle();

    // The death notification reaches the watcher before it gets to the
    // unwatch, so `Terminated` is already queued behind it.
    subject.stop();
    watcher.tell(WatchCmd::Unwatch(subject.clone()), None);
    system.run_until_idle();

    assert!(seen.try_recv().is_err());
    assert_eq!(watcher.lifecycle(), Lifecycle::Started);
}

#[test]
fn test_unhandled_terminated_is_a_death_pact() {
    let system = system();
    let (tx, _rx) = unbounded();
    let subject = system.actor_of(node_props(Vec::new(), tx), "subject").unwrap();
    let (watcher, _seen) = watcher(&system, "loyal", false);
    watcher.tell(WatchCmd::Watch(subject.clone()), None);
    system.run_until_idle();

    subject.stop();
    system.run_until_idle();

    // Death pacts stop the watcher under the default strategy
    assert!(watcher.is_terminated());
}

#[test]
fn test_injected_notification_for_unreachable_host() {
    let system = system();
    let (tx, _rx) = unbounded();
    let subject = system.actor_of(node_props(Vec::new(), tx), "remote").unwrap();
    let (watcher, seen) = watcher(&system, "observer", true);
    watcher.tell(WatchCmd::Watch(subject.clone()), None);
    system.run_until_idle();

    watcher.deliver_death_watch_notification(&subject, true);
    system.run_until_idle();

    let terminated = seen.try_recv().unwrap();
    assert_eq!(terminated.actor, subject);
    assert!(!terminated.existence_confirmed);
    assert!(terminated.address_terminated);
    // Only the watcher's view changed
    assert_eq!(subject.lifecycle(), Lifecycle::Started);
}

#[test]
fn test_death_watch_across_worker_threads() {
    let mut settings = Settings::default();
    settings.dispatcher.worker_threads = 2;
    let system = ActorSystem::with_settings(settings).unwrap();

    let (tx, _rx) = unbounded();
    let subject = system.actor_of(node_props(Vec::new(), tx), "subject").unwrap();
    let (watcher, seen) = watcher(&system, "watcher", true);
    watcher.tell(WatchCmd::Watch(subject.clone()), None);
    subject.stop();

    // Whether the watch lands before or after the stop, a Terminated comes
    let terminated = seen.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(terminated.actor, subject);

    system.terminate();
    assert!(system.await_termination(Duration::from_secs(5)));
}
