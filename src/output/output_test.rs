use super::*;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use bytes::Bytes;

#[derive(Default)]
struct MockState {
    constructed: AtomicUsize,
    dropped: AtomicUsize,
    closes: AtomicUsize,
    connects: Mutex<Vec<(String, Option<String>)>>,
    writes: Mutex<Vec<(Bytes, i64, bool)>>,
}

impl MockState {
    fn live(&self) -> usize {
        self.constructed.load(Ordering::SeqCst) - self.dropped.load(Ordering::SeqCst)
    }

    fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    fn writes(&self) -> Vec<(Bytes, i64, bool)> {
        self.writes.lock().unwrap().clone()
    }

    fn durations(&self, is_audio: bool) -> Vec<i64> {
        self.writes()
            .into_iter()
            .filter(|(_, _, audio)| *audio == is_audio)
            .map(|(_, duration, _)| duration)
            .collect()
    }
}

struct MockSession {
    state: Arc<MockState>,
    fail_connect: bool,
    fail_write_at: Option<usize>,
    closed: bool,
}

impl Session for MockSession {
    fn connect(&mut self, url: &str, auth_token: Option<&str>) -> Result<()> {
        self.state
            .connects
            .lock()
            .unwrap()
            .push((url.to_owned(), auth_token.map(str::to_owned)));
        if self.fail_connect {
            return Err(Error::ErrWhipStatus {
                status: 401,
                body: "unauthorized".to_owned(),
            });
        }
        Ok(())
    }

    fn write(&mut self, payload: Bytes, duration: i64, is_audio: bool) -> bool {
        assert!(!self.closed, "write on a closed session");
        let mut writes = self.state.writes.lock().unwrap();
        writes.push((payload, duration, is_audio));
        self.fail_write_at != Some(writes.len())
    }

    fn close(&mut self) {
        assert!(!self.closed, "session closed twice");
        self.closed = true;
        self.state.closes.fetch_add(1, Ordering::SeqCst);
    }
}

impl Drop for MockSession {
    fn drop(&mut self) {
        self.state.dropped.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default, Clone)]
struct MockFactory {
    state: Arc<MockState>,
    unavailable: bool,
    fail_connect: bool,
    /// 1-based index of the write that fails.
    fail_write_at: Option<usize>,
}

impl SessionFactory for MockFactory {
    fn new_session(&self) -> Option<Box<dyn Session>> {
        if self.unavailable {
            return None;
        }
        self.state.constructed.fetch_add(1, Ordering::SeqCst);
        Some(Box::new(MockSession {
            state: Arc::clone(&self.state),
            fail_connect: self.fail_connect,
            fail_write_at: self.fail_write_at,
            closed: false,
        }))
    }
}

const URL: &str = "https://ingest.example.com/whip/live";

fn video(dts: i64) -> Packet {
    Packet::new(0, MediaType::Video, dts, vec![0u8, 0, 0, 1, 0x65])
}

fn audio(dts: i64) -> Packet {
    Packet::new(1, MediaType::Audio, dts, vec![0xfc, 0xff])
}

#[test]
fn test_output_lifecycle() -> Result<()> {
    let factory = MockFactory::default();
    let state = Arc::clone(&factory.state);
    let output = WhipOutput::new(factory);

    assert_eq!(output.state(), ConnectionState::Uninitialized);
    output.open(URL, None)?;
    assert_eq!(output.state(), ConnectionState::Connected);
    assert_eq!(
        *state.connects.lock().unwrap(),
        vec![(URL.to_owned(), None)]
    );

    for dts in [0, 33, 66, 100] {
        output.write_packet(&video(dts))?;
    }
    assert_eq!(state.durations(false), vec![0, 33, 33, 34]);

    output.close()?;
    assert_eq!(output.state(), ConnectionState::Closed(CloseReason::Trailer));
    assert_eq!(state.closes(), 1);
    assert_eq!(state.live(), 0);

    let stats = output.stats();
    assert_eq!(stats.packets_written, 4);
    assert_eq!(stats.bytes_written, 20);
    assert_eq!(stats.packets_dropped, 0);

    Ok(())
}

#[test]
fn test_output_durations_interleaved() -> Result<()> {
    let orders: Vec<Vec<Packet>> = vec![
        vec![audio(100), video(100), audio(150), video(133), audio(225), video(166)],
        vec![video(100), video(133), video(166), audio(100), audio(150), audio(225)],
        vec![audio(100), audio(150), video(100), audio(225), video(133), video(166)],
    ];

    for packets in orders {
        let factory = MockFactory::default();
        let state = Arc::clone(&factory.state);
        let output = WhipOutput::new(factory);
        output.open(URL, None)?;

        for packet in &packets {
            output.write_packet(packet)?;
        }

        assert_eq!(state.durations(true), vec![100, 50, 75]);
        assert_eq!(state.durations(false), vec![100, 33, 33]);
    }

    Ok(())
}

#[test]
fn test_output_durations_not_clamped() -> Result<()> {
    let factory = MockFactory::default();
    let state = Arc::clone(&factory.state);
    let output = WhipOutput::new(factory);
    output.open(URL, None)?;

    for dts in [40, 40, 20, 60] {
        output.write_packet(&video(dts))?;
    }

    assert_eq!(state.durations(false), vec![40, 0, -20, 40]);
    Ok(())
}

#[test]
fn test_output_other_media_type() -> Result<()> {
    let factory = MockFactory::default();
    let state = Arc::clone(&factory.state);
    let output = WhipOutput::new(factory);
    output.open(URL, None)?;

    output.write_packet(&video(90))?;
    output.write_packet(&Packet::new(2, MediaType::Other, 500, vec![7u8]))?;
    output.write_packet(&video(120))?;

    let writes = state.writes();
    assert_eq!(writes.len(), 3);
    assert_eq!(writes[1], (Bytes::from_static(&[7u8]), 0, false));
    // The data packet does not disturb video bookkeeping.
    assert_eq!(state.durations(false), vec![90, 0, 30]);

    Ok(())
}

#[test]
fn test_output_write_failure_closes_session() -> Result<()> {
    let factory = MockFactory {
        fail_write_at: Some(2),
        ..Default::default()
    };
    let state = Arc::clone(&factory.state);
    let output = WhipOutput::new(factory);
    let mut state_rx = output.subscribe();

    output.open(URL, None)?;
    assert_eq!(*state_rx.borrow_and_update(), ConnectionState::Connected);

    output.write_packet(&video(0))?;
    output.write_packet(&video(33))?;
    assert_eq!(state.closes(), 1);
    assert_eq!(state.live(), 0);
    assert!(state_rx.has_changed().unwrap_or(false));
    assert_eq!(
        *state_rx.borrow_and_update(),
        ConnectionState::Closed(CloseReason::ConnectivityLost)
    );

    for dts in [66, 100, 133] {
        assert!(output.write_packet(&video(dts)).is_ok());
    }
    assert!(output.write_packet(&audio(20)).is_ok());
    assert_eq!(state.writes().len(), 2);

    output.close()?;
    assert_eq!(state.closes(), 1);
    assert_eq!(
        output.state(),
        ConnectionState::Closed(CloseReason::ConnectivityLost)
    );

    let stats = output.stats();
    assert_eq!(stats.packets_written, 1);
    assert_eq!(stats.packets_dropped, 5);

    Ok(())
}

#[test]
fn test_output_close_idempotent() -> Result<()> {
    let factory = MockFactory::default();
    let state = Arc::clone(&factory.state);
    let output = WhipOutput::new(factory);

    output.open(URL, None)?;
    output.close()?;
    output.close()?;
    assert_eq!(state.closes(), 1);
    assert_eq!(output.state(), ConnectionState::Closed(CloseReason::Trailer));

    Ok(())
}

#[test]
fn test_output_close_before_open_is_terminal() -> Result<()> {
    let factory = MockFactory::default();
    let state = Arc::clone(&factory.state);
    let output = WhipOutput::new(factory);

    output.close()?;
    assert_eq!(output.state(), ConnectionState::Closed(CloseReason::Trailer));
    assert_eq!(state.closes(), 0);

    assert!(matches!(output.open(URL, None), Err(Error::ErrOutputClosed)));
    assert_eq!(state.constructed.load(Ordering::SeqCst), 0);
    assert_eq!(state.live(), 0);
    assert_eq!(output.state(), ConnectionState::Closed(CloseReason::Trailer));

    Ok(())
}

#[test]
fn test_output_durations_wrap_on_overflow() -> Result<()> {
    let factory = MockFactory::default();
    let state = Arc::clone(&factory.state);
    let output = WhipOutput::new(factory);
    output.open(URL, None)?;

    output.write_packet(&video(-5_000_000_000_000_000_000))?;
    output.write_packet(&video(5_000_000_000_000_000_000))?;
    output.write_packet(&audio(i64::MIN))?;
    output.write_packet(&audio(i64::MAX))?;

    assert_eq!(
        state.durations(false),
        vec![
            -5_000_000_000_000_000_000,
            5_000_000_000_000_000_000i64.wrapping_sub(-5_000_000_000_000_000_000),
        ]
    );
    assert_eq!(state.durations(true), vec![i64::MIN, -1]);
    assert_eq!(output.state(), ConnectionState::Connected);
    assert_eq!(output.stats().packets_written, 4);

    Ok(())
}

#[test]
fn test_output_open_session_unavailable() {
    let factory = MockFactory {
        unavailable: true,
        ..Default::default()
    };
    let state = Arc::clone(&factory.state);
    let output = WhipOutput::new(factory);

    let result = output.open(URL, None);
    assert!(matches!(result, Err(Error::ErrSessionUnavailable(_))));
    assert_eq!(output.state(), ConnectionState::Uninitialized);

    assert!(output.write_packet(&video(0)).is_ok());
    assert!(output.close().is_ok());
    assert_eq!(output.state(), ConnectionState::Closed(CloseReason::Trailer));
    assert!(matches!(output.open(URL, None), Err(Error::ErrOutputClosed)));
    assert_eq!(state.constructed.load(Ordering::SeqCst), 0);
    assert!(state.writes().is_empty());
    assert_eq!(state.closes(), 0);
    assert_eq!(output.stats().packets_dropped, 1);
}

#[test]
fn test_output_open_connect_failure() {
    let factory = MockFactory {
        fail_connect: true,
        ..Default::default()
    };
    let state = Arc::clone(&factory.state);
    let output = WhipOutput::new(factory);

    let result = output.open(URL, Some("stream-key"));
    assert!(matches!(result, Err(Error::ErrSessionUnavailable(reason)) if reason.contains("401")));
    assert_eq!(
        output.state(),
        ConnectionState::Closed(CloseReason::ConnectFailed)
    );
    assert_eq!(state.closes(), 1);
    assert_eq!(state.live(), 0);

    assert!(output.write_packet(&video(0)).is_ok());
    assert!(state.writes().is_empty());

    assert!(matches!(output.open(URL, None), Err(Error::ErrOutputClosed)));
    assert_eq!(state.constructed.load(Ordering::SeqCst), 1);
}

#[test]
fn test_output_open_twice() -> Result<()> {
    let factory = MockFactory::default();
    let state = Arc::clone(&factory.state);
    let output = WhipOutput::new(factory);

    output.open(URL, None)?;
    assert!(matches!(output.open(URL, None), Err(Error::ErrAlreadyOpened)));
    assert_eq!(state.constructed.load(Ordering::SeqCst), 1);
    assert_eq!(state.live(), 1);

    output.close()?;
    assert!(matches!(output.open(URL, None), Err(Error::ErrOutputClosed)));
    assert_eq!(state.constructed.load(Ordering::SeqCst), 1);

    Ok(())
}

#[test]
fn test_output_auth_token_forwarded() -> Result<()> {
    let factory = MockFactory::default();
    let state = Arc::clone(&factory.state);
    let output = WhipOutput::new(factory);

    output.open(URL, Some("stream-key"))?;
    assert_eq!(
        *state.connects.lock().unwrap(),
        vec![(URL.to_owned(), Some("stream-key".to_owned()))]
    );

    Ok(())
}

#[test]
fn test_output_drop_releases_session() -> Result<()> {
    let factory = MockFactory::default();
    let state = Arc::clone(&factory.state);

    {
        let output = WhipOutput::new(factory);
        output.open(URL, None)?;
        assert_eq!(state.live(), 1);
    }

    assert_eq!(state.live(), 0);
    assert_eq!(state.closes(), 0);
    Ok(())
}

#[test]
fn test_output_as_muxer() -> Result<()> {
    let factory = MockFactory::default();
    let state = Arc::clone(&factory.state);
    let muxer: Box<dyn Muxer> = Box::new(WhipOutput::new(factory));

    muxer.write_header(URL, Some(""))?;
    muxer.write_packet(&audio(960))?;
    muxer.write_trailer()?;

    assert_eq!(state.durations(true), vec![960]);
    assert_eq!(state.closes(), 1);
    Ok(())
}

#[test]
fn test_output_concurrent_write_close() -> Result<()> {
    const ITERATIONS: usize = 200;
    const WRITERS: usize = 4;
    const PACKETS: i64 = 50;

    for i in 0..ITERATIONS {
        let factory = MockFactory {
            // Every third run also loses connectivity mid-stream.
            fail_write_at: if i % 3 == 0 { Some(17) } else { None },
            ..Default::default()
        };
        let state = Arc::clone(&factory.state);
        let output = WhipOutput::new(factory);
        output.open(URL, None)?;

        thread::scope(|s| {
            for w in 0..WRITERS {
                let output = &output;
                s.spawn(move || {
                    for dts in 0..PACKETS {
                        let packet = if w % 2 == 0 { video(dts) } else { audio(dts) };
                        assert!(output.write_packet(&packet).is_ok());
                    }
                });
            }
            s.spawn(|| {
                thread::yield_now();
                assert!(output.close().is_ok());
            });
        });

        assert_eq!(state.closes(), 1, "iteration {i}");
        assert_eq!(state.live(), 0, "iteration {i}");
        assert!(output.state().is_closed());

        let stats = output.stats();
        assert_eq!(
            stats.packets_written + stats.packets_dropped,
            WRITERS as u64 * PACKETS as u64
        );
    }

    Ok(())
}
