//! Property-based tests for reconciliation and interrupt queueing
//!
//! Uses proptest to check that arbitrary interleavings of sends,
//! confirmations, stream deliveries and redeliveries never duplicate or lose
//! committed rows, and that the interrupt queue keeps its single-active rule.

use std::collections::HashSet;

use fieldops_core::chat::{Conversation, RemoteOutcome};
use fieldops_core::interrupt::{InterruptQueue, Receipt};
use fieldops_core::{Identity, InterruptEvent, InterruptId, LocalId, Message, MessageId, TopicId};
use proptest::prelude::*;

// ============================================================================
// Strategy Generators
// ============================================================================

/// Where the stream copy of an own message lands relative to its confirmation
#[derive(Debug, Clone, Copy)]
enum Echo {
    BeforeConfirm,
    AfterConfirm,
    Never,
}

#[derive(Debug, Clone, Copy)]
enum Resolution {
    Fail,
    Confirm(Echo),
}

/// Operations against a conversation
#[derive(Debug, Clone)]
enum ChatOp {
    Send(String),
    Remote(String),
    Resolve(usize, Resolution),
    Redeliver(usize),
}

/// Few distinct bodies so identical texts collide often
fn body_strategy() -> impl Strategy<Value = String> {
    prop_oneof![Just("ok".to_string()), Just("on it".to_string()), Just("hi".to_string())]
}

fn resolution_strategy() -> impl Strategy<Value = Resolution> {
    prop_oneof![
        1 => Just(Resolution::Fail),
        2 => Just(Resolution::Confirm(Echo::BeforeConfirm)),
        2 => Just(Resolution::Confirm(Echo::AfterConfirm)),
        1 => Just(Resolution::Confirm(Echo::Never)),
    ]
}

fn chat_ops_strategy(max_ops: usize) -> impl Strategy<Value = Vec<ChatOp>> {
    prop::collection::vec(
        prop_oneof![
            3 => body_strategy().prop_map(ChatOp::Send),
            2 => body_strategy().prop_map(ChatOp::Remote),
            3 => (0..16usize, resolution_strategy()).prop_map(|(i, r)| ChatOp::Resolve(i, r)),
            1 => (0..32usize).prop_map(ChatOp::Redeliver),
        ],
        0..max_ops,
    )
}

/// Operations against the interrupt queue
#[derive(Debug, Clone)]
enum InterruptOp {
    Receive(u8),
    AckActive,
    Ack(u8),
}

fn interrupt_ops_strategy(max_ops: usize) -> impl Strategy<Value = Vec<InterruptOp>> {
    prop::collection::vec(
        prop_oneof![
            3 => (0..8u8).prop_map(InterruptOp::Receive),
            2 => Just(InterruptOp::AckActive),
            1 => (0..8u8).prop_map(InterruptOp::Ack),
        ],
        0..max_ops,
    )
}

// ============================================================================
// Simulation
// ============================================================================

fn topic() -> TopicId {
    TopicId::new("prop")
}

fn me() -> Identity {
    Identity::new("me")
}

/// Drives a conversation the way the chat client and the platform would.
struct ChatSim {
    convo: Conversation,
    unresolved: Vec<(LocalId, String)>,
    committed: Vec<Message>,
    failed: usize,
    next_seq: u64,
}

impl ChatSim {
    fn new() -> Self {
        Self {
            convo: Conversation::new(topic(), me()),
            unresolved: Vec::new(),
            committed: Vec::new(),
            failed: 0,
            next_seq: 0,
        }
    }

    fn commit(&mut self, sender: Identity, body: &str) -> Message {
        self.next_seq += 1;
        let message = Message::confirmed(
            MessageId::new(format!("msg-{}", self.next_seq)),
            topic(),
            sender,
            body,
            self.next_seq as i64,
        );
        self.committed.push(message.clone());
        message
    }

    fn apply(&mut self, op: ChatOp) {
        match op {
            ChatOp::Send(body) => {
                let local_id = LocalId::new();
                self.convo.push_pending(local_id, body.as_str());
                self.unresolved.push((local_id, body));
            }
            ChatOp::Remote(body) => {
                let message = self.commit(Identity::new("them"), &body);
                self.convo.apply_remote(message);
            }
            ChatOp::Resolve(i, resolution) => {
                if self.unresolved.is_empty() {
                    return;
                }
                let (local_id, body) = self.unresolved.remove(i % self.unresolved.len());
                self.resolve(local_id, &body, resolution);
            }
            ChatOp::Redeliver(i) => {
                if self.committed.is_empty() {
                    return;
                }
                let message = self.committed[i % self.committed.len()].clone();
                assert_eq!(self.convo.apply_remote(message), RemoteOutcome::Duplicate);
            }
        }
    }

    fn resolve(&mut self, local_id: LocalId, body: &str, resolution: Resolution) {
        match resolution {
            Resolution::Fail => {
                self.convo.fail(local_id);
                self.failed += 1;
            }
            Resolution::Confirm(echo) => {
                let message = self.commit(me(), body);
                if let Echo::BeforeConfirm = echo {
                    self.convo.apply_remote(message.clone());
                }
                self.convo.confirm(local_id, message.clone());
                if let Echo::AfterConfirm = echo {
                    self.convo.apply_remote(message);
                }
            }
        }
    }

    fn finish(&mut self) {
        for (local_id, body) in std::mem::take(&mut self.unresolved) {
            self.resolve(local_id, &body, Resolution::Confirm(Echo::AfterConfirm));
        }
    }

    fn shown_ids(&self) -> Vec<MessageId> {
        self.convo
            .messages()
            .iter()
            .filter_map(|m| m.id.clone())
            .collect()
    }
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    /// No server id ever appears twice, at any point of any interleaving
    #[test]
    fn ids_never_duplicated(ops in chat_ops_strategy(60)) {
        let mut sim = ChatSim::new();
        for op in ops {
            sim.apply(op);
            let ids = sim.shown_ids();
            let unique: HashSet<_> = ids.iter().collect();
            prop_assert_eq!(unique.len(), ids.len());
        }
    }

    /// Once every send resolved, each committed row is shown exactly once
    #[test]
    fn committed_rows_shown_exactly_once(ops in chat_ops_strategy(60)) {
        let mut sim = ChatSim::new();
        for op in ops {
            sim.apply(op);
        }
        sim.finish();

        let mut shown = sim.shown_ids();
        shown.sort();
        let mut expected: Vec<_> = sim.committed.iter().filter_map(|m| m.id.clone()).collect();
        expected.sort();
        prop_assert_eq!(shown, expected);
        prop_assert_eq!(sim.convo.held_count(), 0);
    }

    /// Resolved sends leave no pending echo behind; failures stay visible
    #[test]
    fn no_pending_after_resolution(ops in chat_ops_strategy(60)) {
        let mut sim = ChatSim::new();
        for op in ops {
            sim.apply(op);
        }
        sim.finish();

        let messages = sim.convo.messages();
        prop_assert!(!messages.iter().any(|m| m.is_pending()));
        prop_assert_eq!(messages.iter().filter(|m| m.is_failed()).count(), sim.failed);
        prop_assert_eq!(messages.len(), sim.committed.len() + sim.failed);
    }

    /// At most one active interrupt; FIFO promotion; each id handled once
    #[test]
    fn interrupt_queue_invariants(ops in interrupt_ops_strategy(80)) {
        let mut queue = InterruptQueue::new(1024);
        let mut acknowledged: Vec<InterruptId> = Vec::new();
        let mut arrivals: Vec<InterruptId> = Vec::new();

        for op in ops {
            match op {
                InterruptOp::Receive(n) => {
                    let id = InterruptId::new(format!("e{}", n));
                    let event = InterruptEvent::new(id.clone(), "alert", serde_json::Value::Null);
                    if queue.receive(event) != Receipt::Redelivered {
                        prop_assert!(!arrivals.contains(&id));
                        arrivals.push(id);
                    }
                }
                InterruptOp::AckActive => {
                    if let Some(id) = queue.active().map(|e| e.id.clone()) {
                        let done = queue.acknowledge(&id);
                        prop_assert!(done.is_some());
                        acknowledged.push(id);
                    }
                }
                InterruptOp::Ack(n) => {
                    let id = InterruptId::new(format!("e{}", n));
                    let was_active = queue.active().is_some_and(|e| e.id == id);
                    let done = queue.acknowledge(&id);
                    prop_assert_eq!(done.is_some(), was_active);
                    if was_active {
                        acknowledged.push(id);
                    }
                }
            }

            // Nothing queued without something active
            if queue.queued_len() > 0 {
                prop_assert!(queue.is_blocking());
            }
        }

        // Acknowledgements happen in arrival order, each id once
        prop_assert_eq!(&acknowledged[..], &arrivals[..acknowledged.len()]);
        let unique: HashSet<_> = acknowledged.iter().collect();
        prop_assert_eq!(unique.len(), acknowledged.len());
    }
}
