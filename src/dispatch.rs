//! Dispatcher — one I/O thread, a bounded worker pool, strict by-index
//! output order.
//!
//! The calling thread is the I/O thread: it reads blocks, hands them to
//! workers over a bounded channel (the bound is the backpressure: reading
//! stops while the pool is full), collects finished blocks, and writes
//! them strictly in issue order.  Workers never perform I/O and never
//! touch the digest.
//!
//! Cancellation is cooperative: the first error anywhere sets the abort
//! flag, remaining blocks drain unprocessed, and the first error is
//! returned to the caller.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crossbeam_channel::bounded;

use crate::error::{BiozError, Result};
use crate::vblock::VBlock;

/// Abort flag + first-error slot shared between the I/O thread and the
/// workers.
#[derive(Default)]
pub struct AbortFlag {
    flag: AtomicBool,
    err:  Mutex<Option<BiozError>>,
}

impl AbortFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Record an error; only the first one is kept.
    pub fn signal(&self, e: BiozError) {
        let mut slot = self.err.lock().unwrap();
        if slot.is_none() {
            *slot = Some(e);
        }
        self.flag.store(true, Ordering::Release);
    }

    pub fn take(&self) -> Option<BiozError> {
        self.err.lock().unwrap().take()
    }
}

/// Number of worker threads for a requested maximum (0 = all cores).
pub fn worker_count(requested: usize) -> usize {
    let cores = num_cpus::get();
    if requested == 0 { cores } else { requested.min(cores).max(1) }
}

/// Run one component's blocks through the pool.
///
/// `read_next` fills a recycled block with text and assigns its index,
/// returning `false` when the input is exhausted.  `process` runs on
/// worker threads (segment → merge → compress).  `write` runs on the
/// I/O thread, exactly once per block, in issue order.
pub fn run_pipeline(
    nworkers:  usize,
    read_next: &mut dyn FnMut(&mut VBlock) -> Result<bool>,
    process:   &(dyn Fn(&mut VBlock) -> Result<()> + Sync),
    write:     &mut dyn FnMut(&mut VBlock) -> Result<()>,
) -> Result<()> {
    let pool_cap = nworkers + 2;
    let abort = AbortFlag::new();
    let (work_tx, work_rx) = bounded::<VBlock>(pool_cap);
    let (done_tx, done_rx) = bounded::<VBlock>(pool_cap);

    std::thread::scope(|s| {
        for _ in 0..nworkers {
            let work_rx = work_rx.clone();
            let done_tx = done_tx.clone();
            let abort = &abort;
            s.spawn(move || {
                while let Ok(mut vb) = work_rx.recv() {
                    if !abort.is_set() {
                        if let Err(e) = process(&mut vb) {
                            abort.signal(e);
                        }
                    }
                    if done_tx.send(vb).is_err() {
                        break;
                    }
                }
            });
        }
        drop(done_tx);
        drop(work_rx);

        let mut pool: Vec<VBlock> = (0..pool_cap).map(|_| VBlock::new()).collect();
        let mut pending: BTreeMap<u32, VBlock> = BTreeMap::new();
        let mut expected: VecDeque<u32> = VecDeque::new();
        let mut inflight = 0usize;
        let mut eof = false;

        loop {
            // 1. Issue new blocks while worker slots exist.
            while !eof && !abort.is_set() && inflight < pool_cap {
                let mut vb = pool.pop().unwrap_or_default();
                match read_next(&mut vb) {
                    Ok(true) => {
                        expected.push_back(vb.vblock_i);
                        inflight += 1;
                        if work_tx.send(vb).is_err() {
                            abort.signal(BiozError::Corrupt("worker pool terminated".into()));
                            return;
                        }
                    }
                    Ok(false) => {
                        pool.push(vb);
                        eof = true;
                    }
                    Err(e) => {
                        pool.push(vb);
                        abort.signal(e);
                        eof = true;
                    }
                }
            }
            if abort.is_set() {
                eof = true;
            }
            if inflight == 0 && eof {
                break;
            }

            // 2. Collect one finished block (blocks until a worker is done).
            let vb = match done_rx.recv() {
                Ok(vb) => vb,
                Err(_) => break,
            };
            pending.insert(vb.vblock_i, vb);

            // 3. Flush the processed queue head while it is the next
            //    expected index.
            while let Some(&front) = expected.front() {
                let Some(mut vb) = pending.remove(&front) else { break };
                expected.pop_front();
                inflight -= 1;
                if !abort.is_set() {
                    if let Err(e) = write(&mut vb) {
                        abort.signal(e);
                    }
                }
                vb.recycle();
                pool.push(vb);
            }
        }
        drop(work_tx); // workers drain and exit; scope joins them
    });

    match abort.take() {
        Some(e) => Err(e),
        None    => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Blocks processed out of order must still be written in order.
    #[test]
    fn output_preserves_issue_order() {
        let total = 40u32;
        let mut issued = 0u32;
        let written = Mutex::new(Vec::new());
        run_pipeline(
            4,
            &mut |vb| {
                if issued == total {
                    return Ok(false);
                }
                vb.prepare(issued, 0);
                issued += 1;
                Ok(true)
            },
            &|vb| {
                // Uneven work so completion order scrambles.
                std::thread::sleep(std::time::Duration::from_micros(
                    ((vb.vblock_i * 7919) % 199) as u64,
                ));
                Ok(())
            },
            &mut |vb| {
                written.lock().unwrap().push(vb.vblock_i);
                Ok(())
            },
        )
        .unwrap();
        let written = written.into_inner().unwrap();
        assert_eq!(written, (0..total).collect::<Vec<_>>());
    }

    #[test]
    fn worker_error_aborts_with_first_error() {
        let mut issued = 0u32;
        let result = run_pipeline(
            2,
            &mut |vb| {
                if issued == 10 {
                    return Ok(false);
                }
                vb.prepare(issued, 0);
                issued += 1;
                Ok(true)
            },
            &|vb| {
                if vb.vblock_i == 3 {
                    Err(BiozError::Corrupt("boom".into()))
                } else {
                    Ok(())
                }
            },
            &mut |_| Ok(()),
        );
        assert!(matches!(result, Err(BiozError::Corrupt(_))));
    }

    #[test]
    fn worker_count_clamps() {
        assert!(worker_count(0) >= 1);
        assert_eq!(worker_count(1), 1);
    }
}
