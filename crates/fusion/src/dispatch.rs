//! Per-world dispatcher thread
//!
//! Invocations addressed to a world are handled on a dedicated thread that
//! runs a calloop event loop, so a world can serve calls while its main
//! thread is blocked in one of its own outgoing calls.

use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use calloop::{EventLoop, LoopHandle, LoopSignal};

use crate::error::{FusionError, FusionResult};

pub(crate) struct Dispatcher {
    name: String,
    signal: LoopSignal,
    thread: Option<JoinHandle<()>>,
}

impl Dispatcher {
    /// Start the dispatcher thread
    ///
    /// `setup` runs on the new thread and registers the event sources.
    /// Returns once the loop is ready, or with the error `setup` reported.
    pub(crate) fn spawn<F>(name: impl Into<String>, setup: F) -> FusionResult<Self>
    where
        F: FnOnce(&LoopHandle<'static, ()>) -> FusionResult<()> + Send + 'static,
    {
        let name = name.into();
        let (ready_tx, ready_rx) = mpsc::sync_channel::<FusionResult<LoopSignal>>(1);

        let thread = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let mut event_loop = match EventLoop::<'static, ()>::try_new() {
                    Ok(event_loop) => event_loop,
                    Err(e) => {
                        let _ = ready_tx.send(Err(FusionError::Dispatcher(e.to_string())));
                        return;
                    }
                };

                if let Err(e) = setup(&event_loop.handle()) {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
                if ready_tx.send(Ok(event_loop.get_signal())).is_err() {
                    return;
                }

                if let Err(e) = event_loop.run(None, &mut (), |_| {}) {
                    tracing::error!(error = %e, "dispatcher loop failed");
                }
            })?;

        let signal = match ready_rx.recv() {
            Ok(Ok(signal)) => signal,
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                let _ = thread.join();
                return Err(FusionError::Dispatcher(format!("{name} exited during startup")));
            }
        };

        tracing::debug!(%name, "dispatcher started");

        Ok(Self {
            name,
            signal,
            thread: Some(thread),
        })
    }

    /// Stop the loop and wait for the thread
    pub(crate) fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.signal.stop();
        self.signal.wakeup();

        // Stopping from inside a handler must not join itself
        if thread.thread().id() == thread::current().id() {
            return;
        }
        if thread.join().is_err() {
            tracing::warn!(name = %self.name, "dispatcher thread panicked");
        } else {
            tracing::debug!(name = %self.name, "dispatcher stopped");
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn channel_messages_reach_the_loop() {
        let (tx, rx) = calloop::channel::channel::<u32>();
        let (seen_tx, seen_rx) = mpsc::channel();

        let mut dispatcher = Dispatcher::spawn("test-dispatch", move |handle| {
            handle
                .insert_source(rx, move |event, _, _| {
                    if let calloop::channel::Event::Msg(value) = event {
                        let _ = seen_tx.send(value);
                    }
                })
                .map_err(|e| FusionError::Dispatcher(e.error.to_string()))?;
            Ok(())
        })
        .unwrap();

        tx.send(7).unwrap();
        assert_eq!(seen_rx.recv_timeout(Duration::from_secs(5)).unwrap(), 7);
        dispatcher.stop();
    }

    #[test]
    fn setup_error_is_reported() {
        let result = Dispatcher::spawn("test-dispatch", |_| Err(FusionError::Dispatcher("nope".into())));
        assert!(matches!(result, Err(FusionError::Dispatcher(msg)) if msg == "nope"));
    }
}
