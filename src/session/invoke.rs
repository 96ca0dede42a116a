//! Outstanding invoke bookkeeping
//!
//! Every command that expects an answer is registered under its
//! transaction id. A reply resolves exactly one entry and removes it;
//! closing the session fails whatever is left.

use std::collections::HashMap;

use tokio::sync::oneshot;

use crate::error::{Error, Result};
use crate::protocol::message::Command;

/// An invoke awaiting its reply
#[derive(Debug)]
pub struct PendingInvoke {
    pub transaction_id: u32,
    pub method: String,
    reply_tx: Option<oneshot::Sender<Result<Command>>>,
}

impl PendingInvoke {
    fn complete(mut self, result: Result<Command>) {
        if let Some(tx) = self.reply_tx.take() {
            // Receiver may have been dropped; the caller did not want the reply
            let _ = tx.send(result);
        }
    }
}

/// Caller-side handle to an invoke's eventual reply
#[derive(Debug)]
pub struct PendingCall {
    transaction_id: u32,
    method: String,
    rx: oneshot::Receiver<Result<Command>>,
}

impl PendingCall {
    pub fn transaction_id(&self) -> u32 {
        self.transaction_id
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Wait for the reply
    ///
    /// Resolves only if something else drives the session, or once the
    /// session closes. Use [`crate::RtmpConnector::wait_for`] to drive the
    /// read loop while waiting.
    pub async fn wait(self) -> Result<Command> {
        self.rx.await.unwrap_or(Err(Error::ConnectionClosed))
    }

    /// The reply, if it has arrived
    pub fn try_result(&mut self) -> Option<Result<Command>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(Error::ConnectionClosed)),
        }
    }
}

/// Transaction id → pending invoke
#[derive(Debug)]
pub struct InvokeRegistry {
    next_transaction_id: u32,
    pending: HashMap<u32, PendingInvoke>,
}

impl InvokeRegistry {
    pub fn new() -> Self {
        Self {
            // 1 is reserved for connect
            next_transaction_id: 2,
            pending: HashMap::new(),
        }
    }

    /// Fresh transaction id
    pub fn next_transaction_id(&mut self) -> u32 {
        let id = self.next_transaction_id;
        self.next_transaction_id = self.next_transaction_id.wrapping_add(1).max(2);
        id
    }

    /// Record an invoke and return the handle its reply is delivered to
    pub fn register(&mut self, transaction_id: u32, method: impl Into<String>) -> PendingCall {
        let method = method.into();
        let (tx, rx) = oneshot::channel();

        tracing::debug!(transaction_id, method = %method, "Invoke registered");
        self.pending.insert(
            transaction_id,
            PendingInvoke {
                transaction_id,
                method: method.clone(),
                reply_tx: Some(tx),
            },
        );

        PendingCall {
            transaction_id,
            method,
            rx,
        }
    }

    /// Method name of a pending invoke
    pub fn method_of(&self, transaction_id: u32) -> Option<&str> {
        self.pending.get(&transaction_id).map(|p| p.method.as_str())
    }

    /// Oldest pending invoke of `method`
    pub fn oldest(&self, method: &str) -> Option<u32> {
        self.pending
            .values()
            .filter(|p| p.method == method)
            .map(|p| p.transaction_id)
            .min()
    }

    /// Deliver a reply; returns the resolved invoke's method
    pub fn resolve(&mut self, transaction_id: u32, result: Result<Command>) -> Option<String> {
        let invoke = self.pending.remove(&transaction_id)?;
        let method = invoke.method.clone();
        tracing::debug!(
            transaction_id,
            method = %method,
            ok = result.is_ok(),
            "Invoke resolved"
        );
        invoke.complete(result);
        Some(method)
    }

    /// Fail every pending invoke with [`Error::ConnectionClosed`]
    pub fn fail_all(&mut self) -> usize {
        let count = self.pending.len();
        for (_, invoke) in self.pending.drain() {
            invoke.complete(Err(Error::ConnectionClosed));
        }
        count
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl Default for InvokeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Transaction id carried by a command, if it is a valid integer id
pub fn transaction_id_of(command: &Command) -> Option<u32> {
    let id = command.transaction_id;
    if id >= 0.0 && id <= u32::MAX as f64 && id.fract() == 0.0 {
        Some(id as u32)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteError;
    use crate::protocol::constants::*;

    #[test]
    fn test_reply_resolves_exactly_once() {
        let mut registry = InvokeRegistry::new();
        let id = registry.next_transaction_id();
        let mut call = registry.register(id, CMD_CREATE_STREAM);
        assert!(call.try_result().is_none());

        let reply = Command::new(CMD_RESULT, id as f64).with_arg(1.0);
        assert_eq!(
            registry.resolve(id, Ok(reply.clone())).as_deref(),
            Some(CMD_CREATE_STREAM)
        );
        assert!(registry.resolve(id, Ok(reply.clone())).is_none());

        assert_eq!(call.try_result().unwrap().unwrap(), reply);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_ids_only_resolve_their_own_invoke() {
        let mut registry = InvokeRegistry::new();
        let ids: Vec<u32> = (0..4).map(|_| registry.next_transaction_id()).collect();
        let mut calls: Vec<PendingCall> = ids
            .iter()
            .map(|id| registry.register(*id, format!("m{}", id)))
            .collect();

        registry.resolve(ids[2], Ok(Command::new(CMD_RESULT, ids[2] as f64)));
        for (i, call) in calls.iter_mut().enumerate() {
            assert_eq!(call.try_result().is_some(), i == 2);
        }
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_oldest_by_method() {
        let mut registry = InvokeRegistry::new();
        let _a = registry.register(5, CMD_PLAY);
        let _b = registry.register(3, CMD_PLAY);
        let _c = registry.register(4, CMD_SEEK);
        assert_eq!(registry.oldest(CMD_PLAY), Some(3));
        assert_eq!(registry.oldest(CMD_PAUSE), None);
        assert_eq!(registry.method_of(4), Some(CMD_SEEK));
    }

    #[tokio::test]
    async fn test_fail_all_on_close() {
        let mut registry = InvokeRegistry::new();
        let first = registry.register(2, CMD_CREATE_STREAM);
        let second = registry.register(3, CMD_PLAY);

        assert_eq!(registry.fail_all(), 2);
        assert!(registry.is_empty());

        assert!(matches!(first.wait().await, Err(Error::ConnectionClosed)));
        assert!(matches!(second.wait().await, Err(Error::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_remote_failure_delivered() {
        let mut registry = InvokeRegistry::new();
        let call = registry.register(2, CMD_PLAY);
        registry.resolve(
            2,
            Err(RemoteError {
                method: CMD_PLAY.into(),
                code: Some(NS_PLAY_STREAM_NOT_FOUND.into()),
                description: None,
            }
            .into()),
        );
        assert!(matches!(call.wait().await, Err(Error::Remote(_))));
    }

    #[test]
    fn test_dropped_registry_reads_as_closed() {
        let mut registry = InvokeRegistry::new();
        let mut call = registry.register(2, CMD_PLAY);
        drop(registry);
        assert!(matches!(call.try_result(), Some(Err(Error::ConnectionClosed))));
    }

    #[test]
    fn test_transaction_id_of() {
        assert_eq!(transaction_id_of(&Command::new(CMD_RESULT, 7.0)), Some(7));
        assert_eq!(transaction_id_of(&Command::new(CMD_RESULT, 1.5)), None);
        assert_eq!(transaction_id_of(&Command::new(CMD_RESULT, -1.0)), None);
    }
}
