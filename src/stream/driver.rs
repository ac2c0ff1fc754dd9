//! The clock driver: one task per stream, ticking on the host runtime

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, trace, warn};

use super::buffer::TICK_MS;
use super::{Command, Refill, StreamShared, StreamState};

const TICK: Duration = Duration::from_millis(TICK_MS);

/// Event loop for one stream
///
/// Commands and ticks are handled on a single task, so state transitions and
/// buffer drains are strictly ordered: once a `Stop` or pause is acked, no
/// further tick can run.
pub(crate) async fn run(shared: Arc<StreamShared>, mut commands: mpsc::UnboundedReceiver<Command>) {
    let mut playing = false;
    let mut ticker = new_ticker();
    let mut in_underrun = false;

    loop {
        let command = if playing {
            tokio::select! {
                biased;
                cmd = commands.recv() => cmd,
                _ = ticker.tick() => {
                    tick(&shared, &mut in_underrun);
                    continue;
                }
            }
        } else {
            // Clock stopped: nothing to do until the next command.
            commands.recv().await
        };

        match command {
            Some(Command::SetPlaying(play, ack)) => {
                if play && !playing {
                    // Fresh interval so ticks align to the play event.
                    ticker = new_ticker();
                    // Prebuffer: a callback-fed stream gets asked for data
                    // now rather than underrunning on the first tick.
                    if shared.refill_set.load(Ordering::Relaxed)
                        && shared.buffer.len() < shared.buffer.low_water()
                    {
                        dispatch_refill(&shared);
                    }
                }
                playing = play;
                *shared.state.lock() = if play {
                    StreamState::Playing
                } else {
                    StreamState::Paused
                };
                trace!(playing, "transition applied");
                let _ = ack.send(());
            }
            Some(Command::Stop(ack)) => {
                *shared.state.lock() = StreamState::Stopped;
                debug!("clock driver stopped");
                let _ = ack.send(());
                break;
            }
            // Every handle dropped without an explicit close.
            None => {
                *shared.state.lock() = StreamState::Stopped;
                break;
            }
        }
    }
}

fn new_ticker() -> Interval {
    // First tick one full interval out, then steady 10ms; Delay keeps a
    // stalled callback from causing a burst of catch-up drains.
    let mut ticker = time::interval_at(Instant::now() + TICK, TICK);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Drain one tick's worth of audio and request a refill if we're low
fn tick(shared: &StreamShared, in_underrun: &mut bool) {
    let wanted = shared.buffer.tick_bytes();
    let got = shared.buffer.drain(wanted);
    shared.bytes_consumed.fetch_add(got as u64, Ordering::Relaxed);

    // A short drain is an underrun only if someone is supposed to be
    // producing; a stream nobody ever wrote to just plays silence.
    let expecting_data = shared.refill_set.load(Ordering::Relaxed)
        || shared.producer_seen.load(Ordering::Relaxed);
    if got < wanted && expecting_data {
        shared.underruns.fetch_add(1, Ordering::Relaxed);
        if !*in_underrun {
            warn!(wanted, got, "buffer underrun");
            *in_underrun = true;
        }
    } else if got == wanted {
        *in_underrun = false;
    }

    if shared.buffer.len() < shared.buffer.low_water() && shared.refill_set.load(Ordering::Relaxed)
    {
        dispatch_refill(shared);
    }
}

/// Invoke the refill callback
///
/// The dispatch mutex is taken on the first line and the callback runs
/// inside its critical section; there is no path that reaches the callback
/// without it. An external holder of the same mutex therefore blocks
/// dispatch entirely until they release it.
fn dispatch_refill(shared: &StreamShared) {
    let _lock = shared.dispatch.lock();
    let mut slot = shared.refill.lock();
    let Some(callback) = slot.as_mut() else {
        return;
    };

    let requested = shared.buffer.free();
    if requested < shared.buffer.frame_size() {
        return;
    }

    trace!(requested, "dispatching refill callback");
    let mut refill = Refill::new(&shared.buffer, &shared.producer_seen, requested);
    callback(&mut refill);
}
