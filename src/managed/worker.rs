use super::Shared;
use crate::context::Context;
use crate::error::LoopError;
use crate::log::{self, TARGET};
use crate::main_loop::MainLoop;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::sync::mpsc::Sender;

/// Handles published by the loop thread once its context exists.
pub(crate) struct Ready {
    pub(crate) context: Context,
    pub(crate) main_loop: MainLoop,
}

/// Body of a loop thread.
///
/// The thread goes through four stages:
/// 1. Create the context and the loop bound to it
/// 2. Publish both through `gate`, which unblocks the constructor
/// 3. Acquire the context and run the loop until it is quit
/// 4. Mark the instance stopping and destroy every remaining source
///
/// Failures are logged and end the thread; they never panic across it.
pub(crate) fn run(id: u64, shared: Arc<Shared>, gate: Sender<Result<Ready, LoopError>>) {
    let span = log::loop_span(id);
    let _entered = span.enter();

    let context = match Context::new() {
        Ok(context) => context,
        Err(error) => {
            tracing::error!(target: TARGET, %error, "Can not create context");
            let _ = gate.send(Err(error));
            return;
        }
    };
    let main_loop = MainLoop::new(&context);

    let ready = Ready {
        context: context.clone(),
        main_loop: main_loop.clone(),
    };

    if gate.send(Ok(ready)).is_err() {
        return;
    }
    drop(gate);

    if context.acquire() {
        tracing::debug!(target: TARGET, "Running main loop");

        if let Err(error) = main_loop.run() {
            tracing::error!(target: TARGET, %error, "Main loop failed");
        }

        context.release();
    } else {
        tracing::error!(target: TARGET, "Can not acquire context");
    }

    shared.stopping.store(true, Ordering::Release);
    context.close();

    tracing::debug!(target: TARGET, "Thread finished");
}
