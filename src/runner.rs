//! Running components as one unit.
//!
//! A process here is a handful of long-running loops: controllers, watch
//! pumps, cache invalidation. [`RunGroup`] spawns each one with a shared
//! child cancellation token and treats the first exit, clean or not, as the
//! signal to bring the rest down.

use std::{
    fmt,
    future::Future,
    panic::{self, AssertUnwindSafe},
};

use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Long-running components that live and die together.
///
/// Every component receives a child token of `parent`. When any component
/// returns, the whole group is cancelled; [`RunGroup::join`] then waits for
/// the rest to wind down.
pub struct RunGroup {
    cancel: CancellationToken,
    tasks: Vec<Task>,
}

struct Task {
    name: &'static str,
    handle: JoinHandle<()>,
}

impl RunGroup {
    pub fn new(parent: &CancellationToken) -> Self {
        Self {
            cancel: parent.child_token(),
            tasks: Vec::new(),
        }
    }

    /// Spawns `component` with the group's cancellation token.
    pub fn spawn<F, Fut, E>(&mut self, name: &'static str, component: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let cancel = self.cancel.clone();
        let fut = component(cancel.clone());
        let handle = tokio::spawn(async move {
            let outcome = AssertUnwindSafe(fut).catch_unwind().await;
            // one component going down takes the group with it
            cancel.cancel();
            match outcome {
                Ok(Ok(())) => log::info!("{name}: exited"),
                Ok(Err(err)) => log::error!("{name}: failed: {err}"),
                Err(panic) => panic::resume_unwind(panic),
            }
        });
        self.tasks.push(Task { name, handle });
    }

    /// Waits for every component to finish. A panic inside a component
    /// resurfaces here.
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(err) = task.handle.await {
                if let Ok(panic) = err.try_into_panic() {
                    panic::resume_unwind(panic);
                }
            }
            log::debug!("{}: joined", task.name);
        }
    }
}
