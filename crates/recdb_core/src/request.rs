//! Single-completion futures for blocking store work.
//!
//! Every request resolves exactly once, to a value or to one [`StoreError`].
//! The work runs on tokio's blocking pool so file I/O never stalls the
//! caller's executor thread.
//!
//! Dropping a [`Request`] detaches the work rather than cancelling it: once
//! spawned it runs to the end, so anything it owns is finished consistently.

use crate::error::{StoreError, StoreResult};
use crate::types::TableName;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::task::JoinHandle;

/// Which operation a request belongs to; picks the error kind a lost worker
/// is reported as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Opening the connection.
    Open,
    /// Inserting into a table.
    Add(TableName),
    /// Reading from a table.
    Get(TableName),
    /// Writing a merged record back.
    Put(TableName),
    /// Deleting from a table.
    Delete(TableName),
    /// Clearing a table.
    Clear(TableName),
}

impl RequestKind {
    /// Builds this kind's failure.
    pub fn failure(self, reason: impl Into<String>) -> StoreError {
        let reason = reason.into();
        match self {
            Self::Open => StoreError::OpenFailed { reason },
            Self::Add(table) => StoreError::AddRequest { table, reason },
            Self::Get(table) => StoreError::GetRequest { table, reason },
            Self::Put(table) => StoreError::PutRequest { table, reason },
            Self::Delete(table) => StoreError::DeleteRequest { table, reason },
            Self::Clear(table) => StoreError::ClearRequest {
                table,
                cleared: 0,
                reason,
            },
        }
    }
}

/// A pending store request.
#[must_use = "requests do nothing observable unless awaited"]
#[derive(Debug)]
pub struct Request<T> {
    kind: RequestKind,
    handle: JoinHandle<StoreResult<T>>,
}

impl<T: Send + 'static> Request<T> {
    /// Starts `work` on the blocking pool.
    pub fn spawn<F>(kind: RequestKind, work: F) -> Self
    where
        F: FnOnce() -> StoreResult<T> + Send + 'static,
    {
        Self {
            kind,
            handle: tokio::task::spawn_blocking(work),
        }
    }

    /// The operation this request belongs to.
    pub fn kind(&self) -> RequestKind {
        self.kind
    }
}

impl<T> Future for Request<T> {
    type Output = StoreResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let kind = self.kind;
        match Pin::new(&mut self.handle).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(join)) => {
                Poll::Ready(Err(kind.failure(format!("request worker failed: {join}"))))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
