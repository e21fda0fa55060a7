//! Integration tests for message delivery and the actor system.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{unbounded, Sender};
use troupe_actor::{
    Actor, ActorSystem, Context, DeadLetterReason, Envelope, Fault, MailboxType, Props,
};
use troupe_core::{ActorError, Settings};

/// Forwards every `(sender id, sequence)` pair it receives and checks that no
/// two threads ever run it at once.
struct Recorder {
    seen: Sender<(usize, usize)>,
    busy: Arc<AtomicBool>,
    overlaps: Arc<AtomicUsize>,
}

impl Actor for Recorder {
    fn receive(&mut self, ctx: &mut Context<'_>, envelope: Envelope) -> Result<(), Fault> {
        if self.busy.swap(true, Ordering::SeqCst) {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        let result = match envelope.downcast::<(usize, usize)>() {
            Ok((pair, _)) => {
                let _ = self.seen.send(pair);
                Ok(())
            }
            Err(envelope) => ctx.unhandled(envelope),
        };
        self.busy.store(false, Ordering::SeqCst);
        result
    }
}

/// Ignores everything it is sent.
struct Sink;

impl Actor for Sink {
    fn receive(&mut self, _ctx: &mut Context<'_>, _envelope: Envelope) -> Result<(), Fault> {
        Ok(())
    }
}

/// Echoes strings back through a channel. After `shout` it echoes in upper
/// case until told to `calm` down.
struct Echo {
    out: Sender<String>,
}

impl Actor for Echo {
    fn receive(&mut self, ctx: &mut Context<'_>, envelope: Envelope) -> Result<(), Fault> {
        match envelope.downcast::<&'static str>() {
            Ok(("shout", _)) => {
                let out = self.out.clone();
                ctx.become_behavior(
                    move |ctx, envelope| match envelope.downcast::<&'static str>() {
                        Ok(("calm", _)) => {
                            ctx.unbecome();
                            Ok(())
                        }
                        Ok((text, _)) => {
                            let _ = out.send(text.to_uppercase());
                            Ok(())
                        }
                        Err(envelope) => ctx.unhandled(envelope),
                    },
                    false,
                );
                Ok(())
            }
            Ok((text, _)) => {
                let _ = self.out.send(text.to_string());
                Ok(())
            }
            Err(envelope) => ctx.unhandled(envelope),
        }
    }
}

fn calling_thread() -> ActorSystem {
    ActorSystem::with_settings(Settings::calling_thread()).unwrap()
}

#[test]
fn test_order_and_exclusivity_on_the_thread_pool() {
    const SENDERS: usize = 4;
    const PER_SENDER: usize = 200;

    let mut settings = Settings::default();
    settings.dispatcher.worker_threads = 4;
    settings.dispatcher.throughput = 3;
    let system = ActorSystem::with_settings(settings).unwrap();

    let (tx, rx) = unbounded();
    let busy = Arc::new(AtomicBool::new(false));
    let overlaps = Arc::new(AtomicUsize::new(0));
    let props = {
        let busy = Arc::clone(&busy);
        let overlaps = Arc::clone(&overlaps);
        Props::new(move || Recorder {
            seen: tx.clone(),
            busy: Arc::clone(&busy),
            overlaps: Arc::clone(&overlaps),
        })
    };
    let recorder = system.actor_of(props, "recorder").unwrap();

    let handles: Vec<_> = (0..SENDERS)
        .map(|id| {
            let recorder = recorder.clone();
            thread::spawn(move || {
                for seq in 0..PER_SENDER {
                    recorder.tell((id, seq), None);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let mut next = [0usize; SENDERS];
    for _ in 0..SENDERS * PER_SENDER {
        let (id, seq) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(seq, next[id], "messages from sender {} reordered", id);
        next[id] += 1;
    }
    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    assert!(system.pool_stats().tasks_completed > 0);

    system.terminate();
    assert!(system.await_termination(Duration::from_secs(5)));
}

#[test]
fn test_queued_messages_become_dead_letters_once() {
    let system = calling_thread();
    let letters = system.dead_letters().subscribe();
    let sink = system.actor_of(Props::new(|| Sink), "sink").unwrap();
    system.run_until_idle();

    // Stop is a system message, so it overtakes the user messages
    sink.stop();
    for n in 0..3u32 {
        sink.tell(n, None);
    }
    system.run_until_idle();
    assert!(sink.is_terminated());

    let reasons: Vec<_> = letters.try_iter().map(|l| l.reason).collect();
    assert_eq!(reasons, vec![DeadLetterReason::RecipientTerminated; 3]);

    sink.tell(3u32, None);
    let late = letters.try_recv().unwrap();
    assert_eq!(late.recipient, sink);
    assert_eq!(late.reason, DeadLetterReason::RecipientTerminated);
    assert_eq!(system.dead_letters().count(), 4);
}

#[test]
fn test_become_and_unbecome() {
    let system = calling_thread();
    let (tx, rx) = unbounded();
    let echo = system
        .actor_of(Props::new(move || Echo { out: tx.clone() }), "echo")
        .unwrap();

    for text in ["hello", "shout", "hello", "calm", "hello"] {
        echo.tell(text, None);
    }
    system.run_until_idle();

    let out: Vec<String> = rx.try_iter().collect();
    assert_eq!(out, vec!["hello", "HELLO", "hello"]);
}

#[test]
fn test_priority_mailbox() {
    let system = calling_thread();
    let (tx, rx) = unbounded();
    let props = Props::new(move || Echo { out: tx.clone() }).with_mailbox(
        MailboxType::priority(|envelope| match envelope.downcast_ref::<&'static str>() {
            Some(&"urgent") => 0,
            _ => 10,
        }),
    );
    let echo = system.actor_of(props, "triage").unwrap();

    for text in ["first", "second", "urgent", "third"] {
        echo.tell(text, None);
    }
    system.run_until_idle();

    let out: Vec<String> = rx.try_iter().collect();
    assert_eq!(out, vec!["urgent", "first", "second", "third"]);
}

#[test]
fn test_bounded_mailbox_overflow() {
    let system = calling_thread();
    let letters = system.dead_letters().subscribe();
    let (tx, rx) = unbounded();
    let props = Props::new(move || Echo { out: tx.clone() })
        .with_mailbox(MailboxType::Bounded { capacity: 2 });
    let echo = system.actor_of(props, "narrow").unwrap();

    for text in ["a", "b", "c", "d", "e"] {
        echo.tell(text, None);
    }
    system.run_until_idle();

    let out: Vec<String> = rx.try_iter().collect();
    assert_eq!(out, vec!["a", "b"]);
    let reasons: Vec<_> = letters.try_iter().map(|l| l.reason).collect();
    assert_eq!(reasons, vec![DeadLetterReason::MailboxFull; 3]);
}

#[test]
fn test_child_names() {
    let system = calling_thread();
    system.actor_of(Props::new(|| Sink), "taken").unwrap();

    assert_eq!(
        system.actor_of(Props::new(|| Sink), "taken").unwrap_err(),
        ActorError::NameTaken("taken".into())
    );
    for bad in ["", "$system", "a/b", "a#b"] {
        assert!(matches!(
            system.actor_of(Props::new(|| Sink), bad),
            Err(ActorError::InvalidName(..))
        ));
    }

    // A stopped child frees its name once it has terminated
    let taken = system.actor_of(Props::new(|| Sink), "recycled").unwrap();
    system.stop(&taken);
    system.run_until_idle();
    assert!(system.actor_of(Props::new(|| Sink), "recycled").is_ok());
}

#[test]
fn test_unhandled_messages_become_dead_letters() {
    let system = calling_thread();
    let letters = system.dead_letters().subscribe();
    let (tx, _rx) = unbounded();
    let echo = system
        .actor_of(Props::new(move || Echo { out: tx.clone() }), "picky")
        .unwrap();

    echo.tell(42u64, Some(system.guardian()));
    system.run_until_idle();

    let letter = letters.try_recv().unwrap();
    assert_eq!(letter.reason, DeadLetterReason::Unhandled);
    assert_eq!(letter.recipient, echo);
    assert_eq!(letter.sender.as_ref(), Some(system.guardian()));
    assert_eq!(letter.message_type, "u64");
}

#[test]
fn test_terminate_runs_post_stop_on_the_thread_pool() {
    struct Tracked(Arc<AtomicUsize>);

    impl Actor for Tracked {
        fn receive(&mut self, _ctx: &mut Context<'_>, _envelope: Envelope) -> Result<(), Fault> {
            Ok(())
        }

        fn post_stop(&mut self, _ctx: &mut Context<'_>) -> Result<(), Fault> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    let mut settings = Settings::default();
    settings.dispatcher.worker_threads = 2;
    let system = ActorSystem::with_settings(settings).unwrap();
    let stopped = Arc::new(AtomicUsize::new(0));
    for name in ["one", "two", "three"] {
        let stopped = Arc::clone(&stopped);
        system
            .actor_of(Props::new(move || Tracked(Arc::clone(&stopped))), name)
            .unwrap();
    }

    system.terminate();
    assert!(system.await_termination(Duration::from_secs(5)));
    assert!(system.is_terminated());
    assert_eq!(stopped.load(Ordering::SeqCst), 3);
    assert!(system.termination_cause().is_none());
}
