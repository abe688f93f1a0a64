//! Per-call context and the message pool.
//!
//! A [`Context`] owns at most one [`Msg`] and an optional deadline. Derived
//! contexts (a server calling downstream, a stream re-entering the server)
//! get a fresh pooled message seeded from the parent's.
//!
//! Dropping a context returns its message to the pool when the message came
//! from the pool; externally supplied messages are simply dropped.

use std::borrow::Cow;
use std::time::{Duration, Instant};

use crate::msg::Msg;
use crate::pool::Pool;

/// Number of idle messages kept by the global pool.
const MSG_POOL_MAX_IDLE: usize = 4096;

static GLOBAL_MSG_POOL: MsgPool = MsgPool::with_max_idle(MSG_POOL_MAX_IDLE);

/// Free list of reusable messages.
#[derive(Debug)]
pub struct MsgPool {
    pool: Pool<Box<Msg>>,
}

impl MsgPool {
    /// Create a pool keeping at most `max_idle` released messages.
    pub const fn with_max_idle(max_idle: usize) -> Self {
        Self {
            pool: Pool::with_max_idle(max_idle),
        }
    }

    /// The process-wide pool used by [`Context`].
    pub fn global() -> &'static MsgPool {
        &GLOBAL_MSG_POOL
    }

    /// Take a zeroed message from the pool.
    pub fn acquire(&self) -> Box<Msg> {
        self.pool.get_or_else(|| Box::new(Msg::new_pooled()))
    }

    /// Reset `msg` and return it to the pool.
    ///
    /// Messages that did not come from a pool are dropped without error.
    pub fn release(&self, mut msg: Box<Msg>) {
        if !msg.is_pooled() {
            return;
        }
        msg.reset();
        self.pool.put(msg);
    }

    /// Number of idle messages held by the pool.
    pub fn idle_len(&self) -> usize {
        self.pool.idle_len()
    }
}

/// The per-call context threaded through codecs, filters and handlers.
#[derive(Debug, Default)]
pub struct Context {
    msg: Option<Box<Msg>>,
    deadline: Option<Instant>,
}

impl Context {
    /// A context with no message attached.
    pub fn new() -> Self {
        Self::default()
    }

    /// A context carrying a zeroed message from the global pool.
    pub fn with_new_message() -> Self {
        Self {
            msg: Some(MsgPool::global().acquire()),
            deadline: None,
        }
    }

    /// A context carrying an externally supplied message.
    ///
    /// The message is never returned to the pool.
    pub fn with_message(msg: Msg) -> Self {
        Self {
            msg: Some(Box::new(msg)),
            deadline: None,
        }
    }

    /// Returns true if a message is attached.
    pub fn has_message(&self) -> bool {
        self.msg.is_some()
    }

    /// The attached message, or a throwaway empty one if none is attached.
    ///
    /// The throwaway message is not pooled and changes to it are not visible
    /// through this context.
    pub fn msg(&self) -> Cow<'_, Msg> {
        match self.msg.as_deref() {
            Some(msg) => Cow::Borrowed(msg),
            None => Cow::Owned(Msg::default()),
        }
    }

    /// The attached message, attaching a pooled one first if needed.
    pub fn msg_mut(&mut self) -> &mut Msg {
        self.msg.get_or_insert_with(|| MsgPool::global().acquire())
    }

    /// Derive a context for a downstream call made while serving this one.
    ///
    /// The new message inherits the common fields and takes this call's
    /// callee as its caller. The deadline carries over.
    pub fn clone_context(&self) -> Context {
        let mut ctx = Context::with_new_message();
        ctx.deadline = self.deadline;
        if let (Some(src), Some(dst)) = (self.msg.as_deref(), ctx.msg.as_deref_mut()) {
            dst.copy_common(src);
            dst.copy_server_to_client(src);
        }
        ctx
    }

    /// Derive a context for streaming re-entry on the server side.
    ///
    /// The new message inherits the common fields plus both caller and
    /// callee identity.
    pub fn clone_context_for_stream(&self) -> Context {
        let mut ctx = Context::with_new_message();
        ctx.deadline = self.deadline;
        if let (Some(src), Some(dst)) = (self.msg.as_deref(), ctx.msg.as_deref_mut()) {
            dst.copy_common(src);
            dst.copy_server_to_server(src);
        }
        ctx
    }

    /// Deadline for the call, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Install a deadline. An existing earlier deadline wins.
    pub fn set_deadline(&mut self, deadline: Instant) {
        self.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
    }

    /// Install a deadline `timeout` from now. An existing earlier deadline wins.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.set_deadline(Instant::now() + timeout);
    }

    /// Time left until the deadline; zero once it has passed.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Release the context, returning its message to the pool.
    pub fn release(self) {
        drop(self);
    }

    /// Detach the message without returning it to the pool.
    pub fn take_msg(&mut self) -> Option<Box<Msg>> {
        self.msg.take()
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        if let Some(msg) = self.msg.take() {
            MsgPool::global().release(msg);
        }
    }
}

/// Copy every field of `src` into `dst`.
///
/// Unlike [`Context::clone_context`], nothing is filtered out.
pub fn copy_msg(dst: &mut Msg, src: &Msg) {
    dst.copy_from(src);
}
