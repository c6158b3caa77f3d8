//! WebSocket connections of the loopback engine.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::{Rc, Weak};

use bytes::{Bytes, BytesMut};
use rivet_core::transport::{NativeSocket, OpCode, RouteId, SendStatus, WsRouteOptions};
use uuid::Uuid;

use crate::engine::{Event, LoopbackEngine};

/// Close code the engine reports when a connection is dropped without a
/// close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

#[derive(Default)]
pub(crate) struct SocketState {
    pub(crate) topics: BTreeSet<String>,
    pub(crate) received: Vec<(Bytes, OpCode)>,
    pending: Vec<(Bytes, OpCode)>,
    fragment: Option<(OpCode, BytesMut)>,
    buffered: usize,
    pub(crate) stalled: bool,
    pub(crate) closed: Option<(u16, Bytes)>,
    cork_depth: u32,
    cork_dirty: bool,
    pub(crate) flushes: usize,
}

/// Server side of one WebSocket connection.
pub struct LoopbackSocket {
    pub(crate) id: u64,
    pub(crate) route: RouteId,
    options: WsRouteOptions,
    user_data: Option<Uuid>,
    remote_address: String,
    me: Weak<LoopbackSocket>,
    pub(crate) state: RefCell<SocketState>,
    engine: Weak<LoopbackEngine>,
}

impl LoopbackSocket {
    pub(crate) fn new(
        id: u64,
        route: RouteId,
        options: WsRouteOptions,
        user_data: Option<Uuid>,
        remote_address: String,
        engine: Weak<LoopbackEngine>,
    ) -> Rc<Self> {
        Rc::new_cyclic(|me| Self {
            id,
            route,
            options,
            user_data,
            remote_address,
            me: me.clone(),
            state: RefCell::new(SocketState::default()),
            engine,
        })
    }

    pub(crate) fn is_open(&self) -> bool {
        self.state.borrow().closed.is_none()
    }

    pub(crate) fn engine_handle(&self) -> Option<Rc<LoopbackEngine>> {
        self.engine.upgrade()
    }

    pub(crate) fn handle(&self) -> Option<Rc<Self>> {
        self.me.upgrade()
    }

    /// Queues one complete message toward the client.
    pub(crate) fn deliver(&self, payload: &[u8], opcode: OpCode) -> SendStatus {
        let close = {
            let mut state = self.state.borrow_mut();
            if state.closed.is_some() {
                return SendStatus::Dropped;
            }
            let message = (Bytes::copy_from_slice(payload), opcode);
            if !state.stalled {
                state.received.push(message);
                if state.cork_depth > 0 {
                    state.cork_dirty = true;
                } else {
                    state.flushes += 1;
                }
                return SendStatus::Success;
            }
            let limit = self.options.max_backpressure as usize;
            if state.buffered + payload.len() > limit {
                self.options.close_on_backpressure_limit
            } else {
                state.buffered += payload.len();
                state.pending.push(message);
                return SendStatus::Backpressure;
            }
        };
        if close {
            self.shut(ABNORMAL_CLOSURE, Bytes::new());
        }
        SendStatus::Dropped
    }

    /// The client stops reading.
    pub(crate) fn stall(&self) {
        self.state.borrow_mut().stalled = true;
    }

    /// The client reads everything buffered.
    pub(crate) fn drain(&self) {
        let had_pending = {
            let mut state = self.state.borrow_mut();
            state.stalled = false;
            state.buffered = 0;
            let pending = std::mem::take(&mut state.pending);
            let had_pending = !pending.is_empty();
            state.received.extend(pending);
            had_pending
        };
        if let (true, Some(me)) = (had_pending, self.handle()) {
            self.enqueue(Event::WsDrain(me));
        }
    }

    fn enqueue(&self, event: Event) {
        if let Some(engine) = self.engine.upgrade() {
            engine.enqueue_all(vec![event]);
        }
    }

    /// Closes the connection and schedules the close event.
    pub(crate) fn shut(&self, code: u16, reason: Bytes) {
        let topics = {
            let mut state = self.state.borrow_mut();
            if state.closed.is_some() {
                return;
            }
            state.closed = Some((code, reason.clone()));
            std::mem::take(&mut state.topics)
        };
        if let Some(engine) = self.engine.upgrade() {
            for topic in &topics {
                engine.broker_remove(topic, self.id);
            }
        }
        if let Some(me) = self.handle() {
            self.enqueue(Event::WsClose { socket: me, code, reason });
        }
    }

    fn subscription_change(&self, topic: &str, subscribe: bool) -> bool {
        let changed = {
            let mut state = self.state.borrow_mut();
            if state.closed.is_some() {
                return false;
            }
            if subscribe {
                state.topics.insert(topic.to_string())
            } else {
                state.topics.remove(topic)
            }
        };
        if !changed {
            return false;
        }
        let (Some(engine), Some(me)) = (self.engine.upgrade(), self.handle()) else {
            return true;
        };
        let old_count = engine.num_subscribers_of(topic);
        if subscribe {
            engine.broker_add(topic, &me);
        } else {
            engine.broker_remove(topic, self.id);
        }
        let new_count = engine.num_subscribers_of(topic);
        engine.enqueue_all(vec![Event::Subscription {
            socket: me,
            topic: topic.to_string(),
            new_count,
            old_count,
        }]);
        true
    }
}

impl NativeSocket for LoopbackSocket {
    fn send(&self, payload: &[u8], opcode: OpCode, _compress: bool, _fin: bool) -> SendStatus {
        self.deliver(payload, opcode)
    }

    fn send_fragment(&self, payload: &[u8], _compress: bool) -> SendStatus {
        let mut state = self.state.borrow_mut();
        if state.closed.is_some() {
            return SendStatus::Dropped;
        }
        match state.fragment.as_mut() {
            Some((_, buffer)) => {
                buffer.extend_from_slice(payload);
                SendStatus::Success
            }
            None => SendStatus::Dropped,
        }
    }

    fn send_first_fragment(&self, payload: &[u8], opcode: OpCode, _compress: bool) -> SendStatus {
        let mut state = self.state.borrow_mut();
        if state.closed.is_some() {
            return SendStatus::Dropped;
        }
        state.fragment = Some((opcode, BytesMut::from(payload)));
        SendStatus::Success
    }

    fn send_last_fragment(&self, payload: &[u8], _compress: bool) -> SendStatus {
        let fragment = self.state.borrow_mut().fragment.take();
        match fragment {
            Some((opcode, mut buffer)) => {
                buffer.extend_from_slice(payload);
                self.deliver(&buffer, opcode)
            }
            None => SendStatus::Dropped,
        }
    }

    fn end(&self, code: u16, message: &[u8]) {
        self.shut(code, Bytes::copy_from_slice(message));
    }

    fn close(&self) {
        self.shut(ABNORMAL_CLOSURE, Bytes::new());
    }

    fn cork(&self, scope: &mut dyn FnMut()) {
        self.state.borrow_mut().cork_depth += 1;
        scope();
        let mut state = self.state.borrow_mut();
        state.cork_depth -= 1;
        if state.cork_depth == 0 && std::mem::take(&mut state.cork_dirty) {
            state.flushes += 1;
        }
    }

    fn subscribe(&self, topic: &str) -> bool {
        self.subscription_change(topic, true)
    }

    fn unsubscribe(&self, topic: &str) -> bool {
        self.subscription_change(topic, false)
    }

    fn is_subscribed(&self, topic: &str) -> bool {
        self.state.borrow().topics.contains(topic)
    }

    fn topics(&self) -> Vec<String> {
        self.state.borrow().topics.iter().cloned().collect()
    }

    fn buffered_amount(&self) -> usize {
        self.state.borrow().buffered
    }

    fn remote_address(&self) -> Option<String> {
        Some(self.remote_address.clone())
    }

    fn user_data(&self) -> Option<Uuid> {
        self.user_data
    }
}
