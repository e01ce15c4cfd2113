//! Background sealing task.
//!
//! A plain OS thread that takes prepared headers, runs them through the
//! engine's `seal` (which waits out the period and the no-turn wiggle) and
//! hands sealed headers back. An explicit stop channel drains the task.

use crate::Engine;
use aura_primitives::{Header, SealedHeader};
use std::{
    sync::{
        mpsc::{self, Receiver, Sender},
        Arc,
    },
    thread::JoinHandle,
};
use tracing::{debug, warn};

/// What the sealing loop produced for one work item.
#[derive(Debug)]
pub enum SealOutcome {
    /// The header was sealed and is ready for import/broadcast.
    Sealed(SealedHeader),
    /// The engine declined the slot (recently signed, stop fired).
    Skipped,
}

/// Handle to the sealing thread.
pub struct SealTask {
    work_tx: Sender<Header>,
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for SealTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SealTask").finish_non_exhaustive()
    }
}

impl SealTask {
    /// Spawns the sealing loop. Sealed headers are delivered through
    /// `out_tx`.
    pub fn spawn(engine: Arc<dyn Engine>, out_tx: Sender<SealOutcome>) -> Self {
        let (work_tx, work_rx): (Sender<Header>, Receiver<Header>) = mpsc::channel();
        let (stop_tx, stop_rx) = mpsc::channel();

        let handle = std::thread::Builder::new()
            .name("aura-sealer".into())
            .spawn(move || {
                while let Ok(header) = work_rx.recv() {
                    let number = header.number;
                    match engine.seal(header, &stop_rx) {
                        Ok(Some(sealed)) => {
                            debug!(target: "consensus::sealer", number, hash = %sealed.hash(), "sealed block");
                            if out_tx.send(SealOutcome::Sealed(sealed)).is_err() {
                                break;
                            }
                        }
                        Ok(None) => {
                            debug!(target: "consensus::sealer", number, "slot skipped");
                            if out_tx.send(SealOutcome::Skipped).is_err() {
                                break;
                            }
                        }
                        Err(err) => {
                            warn!(target: "consensus::sealer", number, %err, "sealing failed");
                            if out_tx.send(SealOutcome::Skipped).is_err() {
                                break;
                            }
                        }
                    }
                }
            })
            .expect("failed to spawn sealer thread");

        Self { work_tx, stop_tx, handle: Some(handle) }
    }

    /// Queues a prepared header for sealing.
    pub fn submit(&self, header: Header) -> bool {
        self.work_tx.send(header).is_ok()
    }

    /// Interrupts an in-flight seal wait (the current slot is skipped).
    pub fn interrupt(&self) {
        let _ = self.stop_tx.send(());
    }

    /// A clonable handle onto the stop channel, for shutdown paths that
    /// live on other threads (signal handlers).
    pub fn stop_handle(&self) -> Sender<()> {
        self.stop_tx.clone()
    }
}

impl Drop for SealTask {
    fn drop(&mut self) {
        // closing the work channel ends the loop; join for a clean exit
        let (drained_tx, _) = mpsc::channel();
        let _ = std::mem::replace(&mut self.work_tx, drained_tx);
        let _ = self.stop_tx.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Faker;

    #[test]
    fn faker_sealing_round_trips_through_the_task() {
        let (out_tx, out_rx) = mpsc::channel();
        let task = SealTask::spawn(Arc::new(Faker), out_tx);

        let header = Header { number: 9, ..Default::default() };
        assert!(task.submit(header.clone()));

        match out_rx.recv().unwrap() {
            SealOutcome::Sealed(sealed) => assert_eq!(sealed.number(), 9),
            SealOutcome::Skipped => panic!("faker never skips"),
        }
        drop(task);
    }
}
