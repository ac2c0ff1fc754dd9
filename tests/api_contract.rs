//! Non-timing contract tests: settings math, error kinds, teardown order

use lautlos::{DispatchLock, Error, Host, Stream, StreamSettings, StreamState};

const SETTINGS: StreamSettings = StreamSettings {
    sample_size: 2,
    n_channels: 1,
    sample_rate: 44100,
    buffer_ms: 250,
};

#[test]
fn capacity_matches_formula() {
    // 44100 * 1 * 2 * 250 / 1000 = 22050, already frame-aligned
    assert_eq!(SETTINGS.capacity_bytes(), Some(22050));

    // 44100 * 1 * 2 * 125 / 1000 = 11025, rounded down to frame size 2
    let odd = StreamSettings {
        buffer_ms: 125,
        ..SETTINGS
    };
    assert_eq!(odd.capacity_bytes(), Some(11024));

    // Stereo 16-bit: frame is 4 bytes
    let stereo = StreamSettings {
        n_channels: 2,
        sample_rate: 48000,
        buffer_ms: 100,
        ..SETTINGS
    };
    assert_eq!(stereo.frame_size(), 4);
    assert_eq!(stereo.capacity_bytes(), Some(19200));

    let mut stream = Stream::open(SETTINGS).unwrap();
    assert_eq!(stream.capacity(), 22050);
    assert_eq!(stream.low_water(), 11024); // 22050 / 2, frame-rounded
    stream.close().unwrap();
}

#[test]
fn zero_or_tiny_settings_are_rejected() {
    for bad in [
        StreamSettings { sample_size: 0, ..SETTINGS },
        StreamSettings { n_channels: 0, ..SETTINGS },
        StreamSettings { sample_rate: 0, ..SETTINGS },
        // 4 Hz of mono u8 over 100ms rounds to zero frames
        StreamSettings {
            sample_size: 1,
            n_channels: 1,
            sample_rate: 4,
            buffer_ms: 100,
        },
    ] {
        assert!(matches!(
            Stream::open(bad),
            Err(Error::InvalidSettings(_))
        ));
    }
}

#[test]
fn overfull_write_fails_without_partial_write() {
    let mut stream = Stream::open(SETTINGS).unwrap();
    let capacity = stream.capacity();

    // One byte too many, starting from empty: nothing may land
    let too_big = vec![0u8; capacity + 1];
    match stream.write(&too_big) {
        Err(Error::BufferOverflow { requested, available }) => {
            assert_eq!(requested, capacity + 1);
            assert_eq!(available, capacity);
        }
        other => panic!("expected BufferOverflow, got {:?}", other),
    }
    assert_eq!(stream.occupancy(), 0);

    // Fill to the brim, then any further byte is refused
    stream.write(&vec![0u8; capacity]).unwrap();
    assert_eq!(stream.occupancy(), capacity);
    assert!(matches!(
        stream.write(&[0u8]),
        Err(Error::BufferOverflow { .. })
    ));
    assert_eq!(stream.occupancy(), capacity);

    stream.close().unwrap();
}

#[test]
fn state_machine_transitions() {
    let mut stream = Stream::open(SETTINGS).unwrap();
    assert_eq!(stream.state(), StreamState::Created);

    stream.start().unwrap();
    assert_eq!(stream.state(), StreamState::Playing);
    assert!(matches!(stream.start(), Err(Error::AlreadyStarted)));

    stream.play(false).unwrap();
    assert_eq!(stream.state(), StreamState::Paused);
    // Idempotent in both directions
    stream.play(false).unwrap();
    stream.play(true).unwrap();
    stream.play(true).unwrap();
    assert_eq!(stream.state(), StreamState::Playing);

    stream.close().unwrap();
    assert_eq!(stream.state(), StreamState::Stopped);
    // Closed streams refuse everything, loudly
    assert!(matches!(stream.play(true), Err(Error::Stopped)));
    assert!(matches!(stream.write(&[0u8; 2]), Err(Error::Stopped)));
    assert!(matches!(stream.start(), Err(Error::Stopped)));
    // ...except close, which is idempotent
    stream.close().unwrap();
}

#[test]
fn play_on_created_stream_starts_the_clock() {
    // The one-call variant used by callback-driven clients
    let mut stream = Stream::open(SETTINGS).unwrap();
    stream.play(true).unwrap();
    assert_eq!(stream.state(), StreamState::Playing);
    stream.close().unwrap();
}

#[test]
fn teardown_order_is_enforced() {
    let host = Host::new().unwrap();
    let lock = DispatchLock::new(&host).unwrap();
    let mut stream = Stream::open_with(&host, &lock, SETTINGS).unwrap();
    assert_eq!(host.dependents(), 2);

    // Stream and lock are still alive
    assert!(matches!(host.shutdown(), Err(Error::InUse)));

    stream.close().unwrap();
    assert!(matches!(host.shutdown(), Err(Error::InUse)));
    drop(lock);

    host.shutdown().unwrap();
    assert!(matches!(host.shutdown(), Err(Error::AlreadyShutDown)));

    // Nothing new can be created against a dead host
    assert!(matches!(DispatchLock::new(&host), Err(Error::HostClosed)));
    assert!(matches!(
        Stream::open_on(&host, SETTINGS),
        Err(Error::HostClosed)
    ));
}

#[test]
fn lock_must_match_host() {
    let host_a = Host::new().unwrap();
    let host_b = Host::new().unwrap();
    let lock_b = DispatchLock::new(&host_b).unwrap();

    assert!(matches!(
        Stream::open_with(&host_a, &lock_b, SETTINGS),
        Err(Error::HostMismatch)
    ));
}

#[test]
fn try_write_reports_contention() {
    let host = Host::new().unwrap();
    let lock = DispatchLock::new(&host).unwrap();
    let mut stream = Stream::open_with(&host, &lock, SETTINGS).unwrap();

    let guard = lock.lock();
    assert!(matches!(stream.try_write(&[0u8; 2]), Err(Error::LockHeld)));
    drop(guard);

    stream.try_write(&[0u8; 2]).unwrap();
    assert_eq!(stream.occupancy(), 2);

    stream.close().unwrap();
}

#[test]
fn try_set_refill_reports_contention() {
    let host = Host::new().unwrap();
    let lock = DispatchLock::new(&host).unwrap();
    let mut stream = Stream::open_with(&host, &lock, SETTINGS).unwrap();

    let guard = lock.lock();
    assert!(matches!(
        stream.try_set_refill(|_refill| {}),
        Err(Error::Busy)
    ));
    drop(guard);
    stream.try_set_refill(|_refill| {}).unwrap();

    stream.close().unwrap();
}

#[test]
fn shared_host_runs_multiple_streams() {
    let host = Host::new().unwrap();
    let mut a = Stream::open_on(&host, SETTINGS).unwrap();
    let mut b = Stream::open_on(&host, SETTINGS).unwrap();
    assert_eq!(host.dependents(), 2);

    a.start().unwrap();
    b.start().unwrap();
    assert_eq!(a.state(), StreamState::Playing);
    assert_eq!(b.state(), StreamState::Playing);

    a.close().unwrap();
    b.close().unwrap();
    host.shutdown().unwrap();
}
